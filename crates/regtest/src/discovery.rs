//! Finding things a run left behind in its output directory.
//!
//! Plotfiles and checkpoints are named `{test}_plt{step}` and `{test}_chk{step}` with zero-padded step numbers, which
//! is what makes lexical order the same as step order.  Nothing checks that the padding is actually fixed-width.
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use regex::Regex;

pub fn plotfile_prefix(test: &str) -> String {
    format!("{test}_plt")
}

/// Name of the checkpoint a restart test restarts from.
pub fn checkpoint_name(test: &str, index: u32) -> String {
    format!("{test}_chk{index:05}")
}

fn entries(dir: &Path) -> std::io::Result<Vec<(String, bool)>> {
    let mut ret = vec![];
    for e in std::fs::read_dir(dir)? {
        let e = e?;
        let Ok(name) = e.file_name().into_string() else {
            continue;
        };
        let is_dir = e.file_type().map(|t| t.is_dir()).unwrap_or(false);
        ret.push((name, is_dir));
    }
    Ok(ret)
}

/// The most recent plotfile of a test, by lexical order of the name.
///
/// Plotfiles are directories, or `.tgz` files if a previous step archived them.  A lone step-zero plotfile means the
/// run never got anywhere, and is treated as no output.
pub fn latest_plotfile(dir: &Path, test: &str) -> std::io::Result<Option<String>> {
    let prefix = plotfile_prefix(test);
    let mut candidates = entries(dir)?
        .into_iter()
        .filter(|(name, is_dir)| name.starts_with(&prefix) && (*is_dir || name.ends_with(".tgz")))
        .map(|(name, _)| name)
        .collect::<Vec<_>>();
    candidates.sort();

    let Some(last) = candidates.pop() else {
        return Ok(None);
    };
    if last.ends_with("00000") {
        log::warn!("Only the initial plotfile {last} was found");
        return Ok(None);
    }
    Ok(Some(last))
}

/// Backtrace files left by a crash, sorted by name.
pub fn backtraces(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut ret = entries(dir)?
        .into_iter()
        .filter(|(name, is_dir)| !is_dir && name.starts_with("Backtrace."))
        .map(|(name, _)| name)
        .collect::<Vec<_>>();
    ret.sort();
    Ok(ret)
}

/// The regex matching plotfiles and checkpoints of a test, which are what gets archived.
pub fn archivable_regex(test: &str) -> Regex {
    // An escaped test name is always a valid regex.
    Regex::new(&format!(r"^{}.*_(plt|chk)[0-9]+$", regex::escape(test)))
        .unwrap_or_else(|e| unreachable!("escaped regex failed to compile: {e}"))
}

/// Plotfile and checkpoint directories of a test, sorted by name.
pub fn archivable_entries(dir: &Path, test: &str) -> std::io::Result<Vec<String>> {
    let re = archivable_regex(test);
    let mut ret = entries(dir)?
        .into_iter()
        .filter(|(name, is_dir)| *is_dir && re.is_match(name))
        .map(|(name, _)| name)
        .collect::<Vec<_>>();
    ret.sort();
    Ok(ret)
}

/// The most recently modified regular file in `dir` whose name matches `filter`.
///
/// Used to find the executable a build produced, whose name depends on build options we don't want to replicate.
pub fn most_recent_file(dir: &Path, filter: impl Fn(&str) -> bool) -> std::io::Result<Option<PathBuf>> {
    let mut best: Option<(SystemTime, PathBuf)> = None;
    for e in std::fs::read_dir(dir)? {
        let e = e?;
        let meta = e.metadata()?;
        if !meta.is_file() {
            continue;
        }
        let name = e.file_name();
        if !filter(&name.to_string_lossy()) {
            continue;
        }
        let mtime = meta.modified()?;
        if best.as_ref().map(|(t, _)| mtime > *t).unwrap_or(true) {
            best = Some((mtime, e.path()));
        }
    }
    Ok(best.map(|(_, p)| p))
}

/// Pull the interesting fields out of a plotfile's `job_info`.
///
/// A field is a line that starts with the field's name and contains a colon.  The value is what follows the first
/// colon; values are usually paths, so only the last path component is kept.
pub fn job_info_fields(job_info: &str, fields: &[String]) -> Vec<(String, String)> {
    let mut ret = vec![];
    for field in fields.iter() {
        let found = job_info
            .lines()
            .map(str::trim)
            .find(|l| l.starts_with(field.as_str()) && l.contains(':'));
        if let Some(line) = found {
            let after_colon = line.split(':').nth(1).unwrap_or_default();
            let value = after_colon.rsplit('/').next().unwrap_or_default().trim().to_string();
            ret.push((field.clone(), value));
        }
    }
    ret
}
