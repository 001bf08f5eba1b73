use std::path::Path;

use crate::discovery::{job_info_fields, most_recent_file};
use crate::lifecycle::{LifecycleState, Orchestrator};
use crate::model::{files, TestCase};
use crate::process::{quote_path, Capture, CommandSpec};

impl<'a> Orchestrator<'a> {
    /// Everything after the comparison that only informs: job info, visualization, and the analysis routine.
    ///
    /// Only the analysis routine's exit code affects whether the test passes.
    pub(super) fn analyse(&mut self, test: &mut TestCase, test_dir: &Path) {
        if !test.spec.kind.is_standard() {
            return;
        }
        let name = test.name().to_string();
        let Some(artifact) = test.state.output_artifact.clone() else {
            if test.spec.vis_var.is_some() || test.spec.analysis.is_some() {
                log::warn!("{name}: no output file, skipping visualization and analysis");
            }
            return;
        };
        test.state.trace.enter(&name, LifecycleState::Analysing);

        self.read_job_info(test, &test_dir.join(&artifact));
        if let Some(var) = test.spec.vis_var.clone() {
            test.state.png_file = self.visualize(test, test_dir, &artifact, &var);
        }
        if test.spec.analysis.is_some() {
            let ok = self.run_analysis(test, test_dir, &artifact);
            if !ok {
                log::warn!("{name}: analysis failed");
            }
            test.state.analysis_result = Some(ok);
        }
    }

    fn read_job_info(&self, test: &mut TestCase, plotfile: &Path) {
        let job_info = plotfile.join("job_info");
        let text = match std::fs::read_to_string(&job_info) {
            Ok(t) => t,
            Err(e) => {
                log::warn!("Unable to open the job_info file {}: {e}", job_info.display());
                return;
            }
        };
        self.to_web(&job_info, &format!("{}.job_info", test.name()));
        test.state.job_info = job_info_fields(&text, &self.config.main.summary_job_info_fields);
    }

    /// Render one variable of the plotfile to a PNG.  Returns the image name on success.
    fn visualize(&self, test: &TestCase, test_dir: &Path, artifact: &str, var: &str) -> Option<String> {
        if test.spec.dim == 1 {
            log::info!("Visualization not supported for dim = 1");
            return None;
        }
        let Some(fsnapshot) = &self.tools.fsnapshot else {
            log::warn!("No fsnapshot tool is available, skipping visualization");
            return None;
        };

        let palette = self.config.amrex().dir.join("Tools/Plotfile/Palette");
        let command = format!(
            "{} --palette {} --variable {} {}",
            quote_path(fsnapshot),
            quote_path(&palette),
            shlex::try_quote(var).ok()?,
            shlex::try_quote(artifact).ok()?,
        );
        match CommandSpec::new(command, test_dir).run() {
            Ok(o) if o.success() => {}
            Ok(o) => {
                log::warn!("fsnapshot exited with {}", o.code());
                return None;
            }
            Err(e) => {
                log::warn!("{e}");
                return None;
            }
        }

        let ppm = most_recent_file(test_dir, |n| n.ends_with(".ppm")).ok()??;
        let png = ppm.with_extension("png");
        let command = format!("convert {} {}", quote_path(&ppm), quote_path(&png));
        match CommandSpec::new(command, test_dir).run() {
            Ok(o) if o.success() => png
                .file_name()
                .map(|n| n.to_string_lossy().into_owned()),
            Ok(o) => {
                log::warn!("convert exited with {}", o.code());
                None
            }
            Err(e) => {
                log::warn!("{e}");
                None
            }
        }
    }

    /// Copy the analysis routine next to the output and run it.  Its exit code is the verdict.
    fn run_analysis(&self, test: &TestCase, test_dir: &Path, artifact: &str) -> bool {
        let Some(analysis) = &test.spec.analysis else {
            return true;
        };
        let source = self.source_root_for(test).join(&analysis.routine);
        let Some(routine) = analysis.routine.file_name() else {
            log::warn!("{} does not name a file", analysis.routine.display());
            return false;
        };
        if let Err(e) = std::fs::copy(&source, test_dir.join(routine)) {
            log::warn!("Unable to copy {}: {e}", source.display());
            return false;
        }

        let command = [
            format!("./{}", routine.to_string_lossy()),
            analysis.args.trim().to_string(),
            artifact.to_string(),
        ]
        .into_iter()
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
        log::info!("{command}");

        let out = test_dir.join(files::analysis_out(test.name()));
        match CommandSpec::new(command, test_dir)
            .stdout_to(Capture::File(out))
            .record_command(true)
            .run()
        {
            Ok(o) => o.success(),
            Err(e) => {
                log::warn!("{e}");
                false
            }
        }
    }
}
