//! The benchmark store: the last accepted output of every test.
//!
//! Benchmarks live flat in one directory, `{suite}-benchmarks/`, and are only ever written when benchmarks are being
//! made or copied.  An entry is a plotfile directory or a single file.
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

#[derive(Clone, Debug)]
pub struct BenchmarkStore {
    dir: PathBuf,
}

impl BenchmarkStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        BenchmarkStore { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where the benchmark named `entry` lives.
    pub fn path_for(&self, entry: &str) -> PathBuf {
        self.dir.join(entry)
    }

    pub fn exists(&self, entry: &str) -> bool {
        self.path_for(entry).exists()
    }

    /// The benchmark for `entry`, if there is one.
    pub fn fetch(&self, entry: &str) -> Option<PathBuf> {
        let p = self.path_for(entry);
        p.exists().then_some(p)
    }

    /// Replace the benchmark `entry` with the file or directory at `source`.
    pub fn update(&self, entry: &str, source: &Path) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let dest = self.path_for(entry);
        remove_any(&dest)?;
        copy_any(source, &dest)?;
        log::info!("New benchmark {} from {}", dest.display(), source.display());
        Ok(dest)
    }

    /// Name of the stored copy of a test's diff directory.
    pub fn diff_dir_entry(test: &str, diff_dir: &Path) -> String {
        format!("{test}_{}", diff_dir.display())
    }
}

/// Remove a file or directory tree.  A missing path is fine.
pub fn remove_any(path: &Path) -> std::io::Result<()> {
    match std::fs::symlink_metadata(path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
        Ok(m) if m.is_dir() => std::fs::remove_dir_all(path),
        Ok(_) => std::fs::remove_file(path),
    }
}

/// Copy a file, or a directory recursively.
pub fn copy_any(source: &Path, dest: &Path) -> std::io::Result<()> {
    if !source.is_dir() {
        std::fs::copy(source, dest)?;
        return Ok(());
    }

    for entry in WalkDir::new(source) {
        let entry = entry.map_err(std::io::Error::other)?;
        let rel = entry
            .path()
            .strip_prefix(source)
            .map_err(std::io::Error::other)?;
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn update_replaces_directories() {
        let scratch = tempfile::tempdir().unwrap();
        let store = BenchmarkStore::new(scratch.path().join("Castro-benchmarks"));

        let out = scratch.path().join("t_plt00010");
        std::fs::create_dir_all(out.join("Level_0")).unwrap();
        std::fs::write(out.join("Header"), "v2").unwrap();
        std::fs::write(out.join("Level_0").join("Cell_D_00000"), "data").unwrap();

        // A stale benchmark with a file the new one doesn't have.
        let stale = store.path_for("t_plt00010");
        std::fs::create_dir_all(&stale).unwrap();
        std::fs::write(stale.join("old"), "").unwrap();

        assert!(!store.exists("t_plt00020"));
        let dest = store.update("t_plt00010", &out).unwrap();

        assert_eq!(std::fs::read_to_string(dest.join("Header")).unwrap(), "v2");
        assert!(dest.join("Level_0").join("Cell_D_00000").exists());
        assert!(!dest.join("old").exists());
        assert_eq!(store.fetch("t_plt00010"), Some(dest));
    }

    #[test]
    fn update_copies_single_files() {
        let scratch = tempfile::tempdir().unwrap();
        let store = BenchmarkStore::new(scratch.path().join("bench"));
        let src = scratch.path().join("script.run.out");
        std::fs::write(&src, "answer 42\n").unwrap();

        store.update("script.run.out", &src).unwrap();
        assert_eq!(
            std::fs::read_to_string(store.path_for("script.run.out")).unwrap(),
            "answer 42\n"
        );
    }

    #[test]
    fn diff_dir_entries() {
        assert_eq!(
            BenchmarkStore::diff_dir_entry("t", Path::new("diagnostics")),
            "t_diagnostics"
        );
    }
}
