use std::path::Path;

use crate::lifecycle::Orchestrator;
use crate::model::{files, TestCase};

impl<'a> Orchestrator<'a> {
    /// Copy everything a human looks at for a finished test into the web directory.
    pub(super) fn publish(&mut self, test: &mut TestCase, test_dir: &Path) {
        let name = test.name().to_string();
        self.publish_run_output(test, test_dir);

        for f in [files::compare_out(&name), files::analysis_out(&name)] {
            let p = test_dir.join(&f);
            if p.is_file() {
                self.to_web(&p, &f);
            }
        }

        // Inputs are prefixed with the test name since tests often share input file names.
        let inputs = test
            .spec
            .input_file
            .iter()
            .chain(test.spec.probin_file.iter())
            .chain(test.spec.aux_files.iter())
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        for input in inputs {
            self.to_web(&test_dir.join(&input), &format!("{name}.{input}"));
        }

        if let Some(png) = test.state.png_file.clone() {
            if !self.to_web(&test_dir.join(&png), &png) {
                test.state.png_file = None;
            }
        }

        let image = test
            .spec
            .analysis
            .as_ref()
            .and_then(|a| a.output_image.as_ref())
            .and_then(|i| i.file_name())
            .map(|n| n.to_string_lossy().into_owned());
        if let Some(image) = image {
            let p = test_dir.join(&image);
            if p.is_file() {
                self.to_web(&p, &image);
            } else {
                log::warn!("{name}: analysis image {image} was not produced");
            }
        }
    }
}
