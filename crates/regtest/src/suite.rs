//! Running a whole suite: selection, repositories, tools, the test loop, and the run report.
//!
//! Everything here that goes wrong is a [SuiteError] and stops the suite before any test runs, with one exception:
//! once the loop has started, every test runs to completion and failures are only counted.
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDate;
use itertools::Itertools;

use crate::benchmark::BenchmarkStore;
use crate::collaborators::{BuildRequest, BuildSystem, GitRepo, MakeBuild, VersionControl};
use crate::compare::ComparisonTools;
use crate::config::{SuiteConfig, TestSpec};
use crate::discovery::most_recent_file;
use crate::error::{Result, SuiteError};
use crate::flags::CompileFlags;
use crate::history::PerformanceHistory;
use crate::layout::{tests_root, RunLayout};
use crate::lifecycle::{realclean_flags, resolve_output, Orchestrator, RunSettings};
use crate::model::TestCase;
use crate::process::{quote_path, CommandSpec};
use crate::report::{write_branch_status, RepoSummary, RunHistory, RunSummary};
use crate::reporter::{report_run, report_test};
use crate::selection::Selection;
use crate::status::{write_status, StatusRecord, TestStatus};

/// Written into the web directory when a repository is not on the suite's default branch.
pub const BRANCH_MARKER_FILE: &str = "branch.status";

/// Everything about a suite run that doesn't come from the suite file.
#[derive(Clone, Debug, Default, derive_builder::Builder)]
#[builder(pattern = "owned", default)]
pub struct RunOptions {
    pub settings: RunSettings,
    pub selection: Selection,

    /// Shown at the top of the run's report.
    #[builder(setter(into, strip_option))]
    pub note: Option<String>,

    /// Repositories to leave alone.  `all` matches every repository and `none` matches nothing.
    #[builder(setter(into))]
    pub no_update: Vec<String>,

    #[builder(setter(into, strip_option))]
    pub source_branch: Option<String>,
    #[builder(setter(into, strip_option))]
    pub source_hash: Option<String>,
    #[builder(setter(strip_option))]
    pub source_pr: Option<u32>,
    #[builder(setter(strip_option))]
    pub amrex_pr: Option<u32>,

    /// The date the run is named after.  Today if not given.
    #[builder(setter(strip_option))]
    pub date: Option<NaiveDate>,
}

impl RunOptions {
    fn skips_update(&self, repo: &str) -> bool {
        self.no_update
            .iter()
            .any(|n| n.eq_ignore_ascii_case("all") || n.eq_ignore_ascii_case(repo))
    }

    fn making_benchmarks(&self) -> bool {
        !self.settings.mode.is_normal()
    }
}

/// What a finished run left behind.
#[derive(Debug)]
pub struct SuiteOutcome {
    pub summary: RunSummary,

    /// Keeps a temporary web root alive until the outcome is dropped.
    pub layout: RunLayout,
}

impl SuiteOutcome {
    pub fn num_failed(&self) -> usize {
        self.summary.num_failed
    }
}

/// Decide, for each test in order, whether its build directory must be cleaned first.
///
/// A test whose compile flags are all ones that can change without cleaning may reuse the previous build, but only
/// once a clean build of that kind has happened.
pub fn realclean_plan(tests: &[&TestSpec]) -> Vec<bool> {
    let mut last_safe = false;
    tests
        .iter()
        .map(|t| {
            if !t.compile_flags.is_realclean_safe() {
                true
            } else if last_safe {
                false
            } else {
                last_safe = true;
                true
            }
        })
        .collect()
}

pub struct Suite {
    config: SuiteConfig,
    options: RunOptions,
    build: Box<dyn BuildSystem>,
    repos: Vec<Box<dyn VersionControl>>,
    tools: Option<ComparisonTools>,
}

impl Suite {
    /// A suite which builds with make and updates its repositories with git.
    pub fn new(mut config: SuiteConfig, options: RunOptions) -> Suite {
        apply_repo_overrides(&mut config, &options);
        let build = Box::new(MakeBuild::from_config(&config.main, &config.amrex().dir));
        let repos = config
            .repos
            .iter()
            .map(|r| Box::new(GitRepo::from_config(r)) as Box<dyn VersionControl>)
            .collect();
        Suite {
            config,
            options,
            build,
            repos,
            tools: None,
        }
    }

    pub fn with_build_system(mut self, build: Box<dyn BuildSystem>) -> Suite {
        self.build = build;
        self
    }

    pub fn with_repositories(mut self, repos: Vec<Box<dyn VersionControl>>) -> Suite {
        self.repos = repos;
        self
    }

    /// Use these comparison tools instead of finding or building them.
    pub fn with_tools(mut self, tools: ComparisonTools) -> Suite {
        self.tools = Some(tools);
        self
    }

    pub fn config(&self) -> &SuiteConfig {
        &self.config
    }

    /// Run the suite.
    pub fn run(mut self) -> Result<SuiteOutcome> {
        if self.options.settings.mode.is_copy_benchmarks() {
            return self.copy_benchmarks();
        }

        let previous_failures = if self.options.selection.needs_previous_failures() {
            Some(self.last_run_failures()?.1)
        } else {
            None
        };
        let selected = self
            .options
            .selection
            .apply(&self.config, previous_failures.as_deref())?
            .into_iter()
            .cloned()
            .collect::<Vec<_>>();
        log::info!(
            "Running tests: {}",
            selected.iter().map(|t| t.name.as_str()).join(" ")
        );

        let overrides = &self.options.settings.overrides;
        let skip_comparison = overrides.skip_comparison;
        let all_compile_only =
            overrides.compile_only || selected.iter().all(|t| t.kind.is_compile_only());
        let making_benchmarks = self.options.making_benchmarks();
        let layout = RunLayout::create(
            &self.config,
            self.options.settings.temporary,
            making_benchmarks || all_compile_only,
            self.date(),
        )?;
        let bench = BenchmarkStore::new(&layout.bench_dir);

        let (repositories, updated) = self.update_repositories(&layout)?;
        self.mark_branch(&layout);

        let tools = match self.tools.take() {
            Some(t) => t,
            None if all_compile_only || skip_comparison => ComparisonTools::new("fcompare"),
            None => self.resolve_tools()?,
        };

        let refs = selected.iter().collect::<Vec<_>>();
        self.initial_realclean(&refs);
        let plan = realclean_plan(&refs);

        let mut history = PerformanceHistory::load(&layout.history_file);
        let mut records = vec![];
        {
            let mut orchestrator = Orchestrator {
                config: &self.config,
                layout: &layout,
                settings: &self.options.settings,
                build: &*self.build,
                tools: &tools,
                bench: &bench,
                history: &mut history,
            };

            for (spec, reclean) in selected.into_iter().zip(plan) {
                let unneeded =
                    spec.restart.is_some() || spec.kind.is_compile_only() || spec.kind.is_self_test();
                if making_benchmarks && unneeded {
                    log::warn!("Benchmarks not needed for test {}", spec.name);
                    continue;
                }
                let mut case = TestCase::new(spec);
                let record = orchestrator.run_test(&mut case, reclean);
                log::info!("{}", report_test(&case, &record.status));
                records.push(record);
            }
        }

        if !self.options.settings.temporary {
            if let Err(e) = history.save(&layout.history_file) {
                log::warn!("{e}");
            }
        }

        let mut summary = RunSummary::from_records(
            &self.config.main.suite_name,
            &layout.run_id,
            &records,
            making_benchmarks,
        );
        summary.note = self.options.note.clone();
        summary.benchmark_comment = self.options.settings.mode.comment().map(str::to_string);
        summary.repositories = repositories;
        summary.write(&layout.web_dir).map_err(|e| SuiteError::io(&layout.web_dir, e))?;
        make_world_readable(&layout.web_dir);

        self.restore_repositories(&updated);

        if !layout.temporary {
            self.write_branch_status(&layout, &summary);
        }

        log::info!("{}", report_run(&summary));
        Ok(SuiteOutcome { summary, layout })
    }

    fn date(&self) -> NaiveDate {
        self.options
            .date
            .unwrap_or_else(|| chrono::Local::now().date_naive())
    }

    /// The last run under the web root and the tests which failed in it.
    fn last_run_failures(&self) -> Result<(String, Vec<String>)> {
        let Some(web_root) = self.config.main.web_top_dir.as_deref() else {
            return Err(SuiteError::selection(
                "no web directory is configured, so there are no previous runs",
            ));
        };
        let history = RunHistory::scan(web_root).map_err(|e| SuiteError::io(web_root, e))?;
        let Some(last) = history.last_run() else {
            return Err(SuiteError::selection(format!(
                "no previous runs in {}",
                web_root.display()
            )));
        };
        let failed = history.failed_tests(last);
        log::info!("Last run was {last}, with failures: {}", failed.join(" "));
        Ok((last.to_string(), failed))
    }

    /// Bring every repository to the wanted revision.  Returns the summary of each and whether it was updated.
    fn update_repositories(&mut self, layout: &RunLayout) -> Result<(Vec<RepoSummary>, Vec<bool>)> {
        let mut summaries = vec![];
        let mut updated = vec![];
        for repo in self.repos.iter_mut() {
            let wants_hash = self
                .config
                .repo(repo.name())
                .is_some_and(|r| r.hash.is_some());
            let update = wants_hash || !self.options.skips_update(repo.name());

            let hash = if update {
                let hash = repo.update(&layout.web_dir)?;
                if let Err(e) = repo.changelog(&layout.web_dir) {
                    log::warn!("Unable to write the change log of {}: {e}", repo.name());
                }
                hash
            } else {
                log::info!("Not updating {}", repo.name());
                repo.current_hash()?
            };

            summaries.push(RepoSummary {
                name: repo.name().to_string(),
                branch: repo.branch(),
                hash: Some(hash),
            });
            updated.push(update);
        }
        Ok((summaries, updated))
    }

    fn restore_repositories(&mut self, updated: &[bool]) {
        for (repo, updated) in self.repos.iter_mut().zip(updated.iter()) {
            if !*updated {
                continue;
            }
            if let Err(e) = repo.restore() {
                log::warn!("Unable to restore {}: {e}", repo.name());
            }
        }
    }

    /// Flag the run if any repository is off the suite's default branch.
    fn mark_branch(&self, layout: &RunLayout) {
        let default = &self.config.main.default_branch;
        let off_branch = self
            .repos
            .iter()
            .filter_map(|r| r.branch().map(|b| (r.name().to_string(), b)))
            .find(|(_, b)| b != default);
        let Some((repo, branch)) = off_branch else {
            return;
        };

        log::warn!("{repo} is on branch {branch}, not the suite default {default}");
        let path = layout.web_file(BRANCH_MARKER_FILE);
        if let Err(e) = std::fs::write(&path, "branch different than suite default\n") {
            log::warn!("Unable to write {}: {e}", path.display());
        }
    }

    fn write_branch_status(&self, layout: &RunLayout, summary: &RunSummary) {
        let source = &self.config.source_repo().name;
        let Some(repo) = summary.repositories.iter().find(|r| &r.name == source) else {
            return;
        };
        let branch = repo
            .branch
            .as_deref()
            .unwrap_or(self.config.main.default_branch.as_str())
            .replace('/', "_");
        if let Err(e) = write_branch_status(
            &layout.web_root,
            &branch,
            &repo.name,
            summary.num_failed,
            repo.hash.as_deref().unwrap_or(""),
        ) {
            log::warn!("Unable to write the branch status: {e}");
        }
    }

    /// Clean each build directory the selection uses, once.
    fn initial_realclean(&self, tests: &[&TestSpec]) {
        let mut seen = HashSet::new();
        for t in tests {
            let dir = self.config.build_dir_for(t);
            if !seen.insert((dir.clone(), t.extra_build_repo.clone())) {
                continue;
            }
            let repo = t
                .extra_build_repo
                .as_deref()
                .and_then(|r| self.config.repo(r))
                .unwrap_or_else(|| self.config.source_repo());
            log::info!("make realclean in {}", dir.display());
            if let Err(e) = self.build.realclean(&dir, &realclean_flags(&self.config, repo)) {
                log::warn!("realclean in {} failed: {e}", dir.display());
            }
        }
    }

    /// Find the comparison tools, building any that are missing from the framework's plotfile tools.
    fn resolve_tools(&self) -> Result<ComparisonTools> {
        let configured = &self.config.main.tools;
        let tool_dir = self.config.amrex().dir.join("Tools").join("Plotfile");

        let fcompare = self
            .resolve_tool("fcompare", configured.fcompare.as_deref(), &tool_dir, true)?
            .ok_or_else(|| SuiteError::tool_build("fcompare"))?;
        let mut tools = ComparisonTools::new(fcompare);
        tools.fboxinfo = self.resolve_tool("fboxinfo", configured.fboxinfo.as_deref(), &tool_dir, true)?;
        tools.fsnapshot = self.resolve_tool("fsnapshot", configured.fsnapshot.as_deref(), &tool_dir, true)?;
        tools.particle_compare = self.resolve_tool(
            "particle_compare",
            configured.particle_compare.as_deref(),
            &tool_dir.parent().unwrap_or(tool_dir.as_path()).join("Postprocessing"),
            false,
        )?;
        Ok(tools)
    }

    /// A configured tool must exist.  Otherwise look for a built one in `dir`, building it if allowed.
    fn resolve_tool(
        &self,
        tool: &str,
        configured: Option<&Path>,
        dir: &Path,
        may_build: bool,
    ) -> Result<Option<PathBuf>> {
        if let Some(p) = configured {
            return if p.is_file() {
                Ok(Some(p.to_path_buf()))
            } else {
                Err(SuiteError::tool_build(tool))
            };
        }
        if !dir.is_dir() {
            log::warn!("No {tool}: {} does not exist", dir.display());
            return Ok(None);
        }

        let find = || {
            most_recent_file(dir, |n| n.starts_with(tool) && n.ends_with(".ex"))
                .map_err(|e| SuiteError::io(dir, e))
        };
        if let Some(found) = find()? {
            return Ok(Some(found));
        }
        if !may_build {
            return Ok(None);
        }

        log::info!("Building {tool}");
        let mut request = BuildRequest::new(
            dir,
            CompileFlags::new()
                .with("DEBUG", "FALSE")
                .with("USE_MPI", "FALSE")
                .with("USE_OMP", "FALSE"),
        );
        request.target = format!("programs={tool}");
        request.make_additions = Some(String::new());
        request.log_path = Some(dir.join(format!("{tool}.make.out")));
        match self.build.build(&request) {
            Ok(o) if o.success() => {}
            Ok(o) => log::warn!("Building {tool} exited with {}", o.exit_code),
            Err(e) => log::warn!("Building {tool} failed: {e}"),
        }

        let found = find()?;
        if found.is_none() {
            log::warn!("{tool} could not be built");
        }
        Ok(found)
    }

    /// Install the output of the last run's failures as benchmarks, without building or running anything.
    fn copy_benchmarks(self) -> Result<SuiteOutcome> {
        let (last_run, failed) = self.last_run_failures()?;
        let selected = self.options.selection.apply(&self.config, Some(&failed))?;

        let layout = RunLayout::create(&self.config, self.options.settings.temporary, true, self.date())?;
        let bench = BenchmarkStore::new(&layout.bench_dir);
        let old_output = tests_root(&self.config).join(&last_run);

        let mut records = vec![];
        for spec in selected {
            let status = copy_one(spec, &old_output.join(&spec.name), &bench);
            log::info!("{}: {status}", spec.name);
            let record = StatusRecord {
                name: spec.name.clone(),
                status,
                dim: spec.dim,
                message: None,
                build_time: Duration::ZERO,
                wall_time: Duration::ZERO,
                compared_artifact: None,
                nlevels: None,
                mpi_procs: spec.parallel.mpi_procs,
                omp_threads: spec.parallel.omp_threads,
                compile_only: false,
                restart: spec.restart.is_some(),
                build_command: None,
                run_command: None,
                structural_errors: vec![],
                performance: None,
                job_info: vec![],
                lifecycle: vec![],
            };
            if let Err(e) = write_status(&layout.web_dir, &record) {
                log::error!("Unable to write the status of {}: {e}", spec.name);
            }
            records.push(record);
        }

        let mut summary = RunSummary::from_records(&self.config.main.suite_name, &layout.run_id, &records, true);
        summary.note = Some(format!("benchmarks copied from run {last_run}; no new tests run"));
        summary.benchmark_comment = self.options.settings.mode.comment().map(str::to_string);
        summary.write(&layout.web_dir).map_err(|e| SuiteError::io(&layout.web_dir, e))?;
        make_world_readable(&layout.web_dir);

        log::info!("{}", report_run(&summary));
        Ok(SuiteOutcome { summary, layout })
    }
}

fn apply_repo_overrides(config: &mut SuiteConfig, options: &RunOptions) {
    let source = config.source_repo().name.clone();
    let amrex = config.amrex().name.clone();
    for r in config.repos.iter_mut() {
        if r.name == source {
            if let Some(b) = &options.source_branch {
                r.branch = Some(b.clone());
            }
            if let Some(h) = &options.source_hash {
                r.hash = Some(h.clone());
            }
            if let Some(pr) = options.source_pr {
                r.pr = Some(pr);
            }
        }
        if r.name == amrex {
            if let Some(pr) = options.amrex_pr {
                r.pr = Some(pr);
            }
        }
    }
}

fn unarchive(dir: &Path, archive: &str) -> bool {
    let command = format!("tar -xzf {}", quote_path(Path::new(archive)));
    match CommandSpec::new(command, dir).run() {
        Ok(o) if o.success() => true,
        Ok(o) => {
            log::warn!("Unable to extract {archive}: tar exited with {}", o.code());
            false
        }
        Err(e) => {
            log::warn!("Unable to extract {archive}: {e}");
            false
        }
    }
}

/// Store one test's output from an earlier run as its benchmark.
fn copy_one(spec: &TestSpec, test_dir: &Path, bench: &BenchmarkStore) -> TestStatus {
    let comparison = &spec.comparison;
    for f in comparison.output_file.iter().chain(comparison.compare_file.iter()) {
        let archived = format!("{f}.tgz");
        if !test_dir.join(f).exists() && test_dir.join(&archived).is_file() {
            unarchive(test_dir, &archived);
        }
    }

    let case = TestCase::new(spec.clone());
    let Some(mut resolved) = resolve_output(&case, test_dir) else {
        return TestStatus::BenchmarksFailed;
    };
    if let Some(stem) = resolved.output.strip_suffix(".tgz").map(str::to_string) {
        if !unarchive(test_dir, &resolved.output) {
            return TestStatus::BenchmarksFailed;
        }
        resolved.entry = resolved
            .entry
            .strip_suffix(".tgz")
            .unwrap_or(&resolved.entry)
            .to_string();
        resolved.output = stem;
    }

    if let Err(e) = bench.update(&resolved.entry, &test_dir.join(&resolved.output)) {
        log::error!("{}: unable to store {}: {e}", spec.name, resolved.entry);
        return TestStatus::BenchmarksFailed;
    }

    if let Some(diff_dir) = &comparison.diff_dir {
        let entry = BenchmarkStore::diff_dir_entry(&spec.name, diff_dir);
        if let Err(e) = bench.update(&entry, &test_dir.join(diff_dir)) {
            log::error!("{}: unable to store {entry}: {e}", spec.name);
            return TestStatus::BenchmarksFailed;
        }
    }

    TestStatus::BenchmarksUpdated {
        file: resolved.entry,
    }
}

#[cfg(unix)]
fn make_world_readable(web_dir: &Path) {
    use std::os::unix::fs::PermissionsExt;

    let Ok(entries) = std::fs::read_dir(web_dir) else {
        return;
    };
    for e in entries.flatten() {
        let p = e.path();
        if p.is_file() {
            if let Err(err) = std::fs::set_permissions(&p, std::fs::Permissions::from_mode(0o644)) {
                log::debug!("Unable to chmod {}: {err}", p.display());
            }
        }
    }
}

#[cfg(not(unix))]
fn make_world_readable(_web_dir: &Path) {}

/// Regenerate the summary of a run which died before writing one.
pub fn rebuild_report(config: &SuiteConfig, run_id: &str) -> Result<RunSummary> {
    let Some(web_root) = config.main.web_top_dir.as_deref() else {
        return Err(SuiteError::selection("no web directory is configured"));
    };
    let web_dir = web_root.join(run_id);
    crate::layout::check_dir(&web_dir)?;
    let summary = RunSummary::rebuild(&config.main.suite_name, run_id, &web_dir)
        .map_err(|e| SuiteError::io(&web_dir, e))?;
    summary.write(&web_dir).map_err(|e| SuiteError::io(&web_dir, e))?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn suite(tests: &str) -> SuiteConfig {
        SuiteConfig::from_yaml_str(&format!(
            "main:\n  test_top_dir: /tmp\nrepos:\n  - name: AMReX\n    dir: /amrex\n  - name: source\n    dir: /src\n    branch: development\ntests:\n{tests}"
        ))
        .unwrap()
    }

    #[test]
    fn realclean_only_when_flags_require_it() {
        let cfg = suite(
            "  - name: a\n    dim: 2\n    add_to_compile_string: USE_MPI=TRUE\n  - name: b\n    dim: 2\n    add_to_compile_string: DEBUG=TRUE\n  - name: c\n    dim: 2\n    add_to_compile_string: NETWORK_DIR=aprox13\n  - name: d\n    dim: 2\n",
        );
        let refs = cfg.tests.iter().collect::<Vec<_>>();
        assert_eq!(realclean_plan(&refs), vec![true, false, true, false]);
    }

    #[test]
    fn overrides_go_to_the_source_repository() {
        let mut cfg = suite("  - name: a\n    dim: 2\n");
        let options = RunOptionsBuilder::default()
            .source_branch("feature/x")
            .amrex_pr(42)
            .build()
            .unwrap();
        apply_repo_overrides(&mut cfg, &options);
        assert_eq!(cfg.repo("source").unwrap().branch.as_deref(), Some("feature/x"));
        assert_eq!(cfg.amrex().pr, Some(42));
        assert_eq!(cfg.amrex().branch, None);
    }

    #[test]
    fn no_update_matching() {
        let options = RunOptionsBuilder::default()
            .no_update(vec!["AMReX".to_string()])
            .build()
            .unwrap();
        assert!(options.skips_update("amrex"));
        assert!(!options.skips_update("source"));

        let options = RunOptionsBuilder::default()
            .no_update(vec!["All".to_string()])
            .build()
            .unwrap();
        assert!(options.skips_update("source"));
        assert!(!RunOptions::default().skips_update("source"));
    }

    #[test]
    fn copying_a_plotfile_benchmark() {
        let cfg = suite("  - name: Sod-x\n    dim: 1\n");
        let scratch = tempfile::tempdir().unwrap();
        let test_dir = scratch.path().join("Sod-x");
        std::fs::create_dir_all(test_dir.join("Sod-x_plt00020")).unwrap();
        std::fs::write(test_dir.join("Sod-x_plt00020").join("Header"), "h").unwrap();
        let bench = BenchmarkStore::new(scratch.path().join("bench"));

        let status = copy_one(&cfg.tests[0], &test_dir, &bench);
        assert_eq!(
            status,
            TestStatus::BenchmarksUpdated {
                file: "Sod-x_plt00020".into()
            }
        );
        assert!(bench.path_for("Sod-x_plt00020").join("Header").is_file());
    }

    #[test]
    fn copying_without_output_fails() {
        let cfg = suite("  - name: Sod-x\n    dim: 1\n");
        let scratch = tempfile::tempdir().unwrap();
        let bench = BenchmarkStore::new(scratch.path().join("bench"));
        assert_eq!(
            copy_one(&cfg.tests[0], scratch.path(), &bench),
            TestStatus::BenchmarksFailed
        );
    }
}
