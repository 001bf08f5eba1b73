use std::path::Path;

use crate::benchmark::remove_any;
use crate::discovery::archivable_entries;
use crate::lifecycle::Orchestrator;
use crate::model::TestCase;
use crate::process::{quote_path, CommandSpec};

impl<'a> Orchestrator<'a> {
    /// Compress or delete the plotfiles and checkpoints of a test.  Nothing here can fail the test.
    pub(super) fn archive(&self, test: &TestCase, test_dir: &Path) {
        let entries = match archivable_entries(test_dir, test.name()) {
            Ok(e) => e,
            Err(e) => {
                log::warn!("Unable to list {}: {e}", test_dir.display());
                return;
            }
        };

        for entry in entries {
            let path = test_dir.join(&entry);
            let compared = test.state.output_artifact.as_deref() == Some(entry.as_str());

            if self.config.main.purge_output && !compared {
                if let Err(e) = remove_any(&path) {
                    log::warn!("Unable to remove {}: {e}", path.display());
                }
                continue;
            }

            let quoted = quote_path(Path::new(&entry));
            let command = format!("tar -czf {quoted}.tgz {quoted}");
            match CommandSpec::new(command, test_dir).run() {
                Ok(o) if o.success() => {
                    if let Err(e) = remove_any(&path) {
                        log::warn!("Unable to remove {}: {e}", path.display());
                    }
                }
                Ok(o) => log::warn!("Unable to tar output file {entry}: tar exited with {}", o.code()),
                Err(e) => log::warn!("Unable to tar output file {entry}: {e}"),
            }
        }
    }
}
