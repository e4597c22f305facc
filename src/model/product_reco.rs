use candle_core::Tensor;
use std::path::{Path, PathBuf};

use super::engine::{InferenceSession, OnnxSession, Provider};
use super::runner::{Inference, ModelRunner};
use super::shufflenet::{first_input, run_first};
use crate::config::Config;
use crate::error::{RunnerError, RunnerResult};
use crate::testdata::TestCase;

const MODEL_DIR: &str = "cvs_models/two_stage_product_reco";
const MODEL_FILE: &str = "two_stage_product_reco.onnx";

/// Two-stage product recognition model, expected next to the workdir in
/// `../cvs_models`. It is never downloaded.
pub struct ProductRecoRunner<S = OnnxSession> {
    session: S,
    model_path: PathBuf,
    test_data_dir: PathBuf,
}

pub fn paths(root: &Path) -> (PathBuf, PathBuf) {
    let dir = root.join("..").join(MODEL_DIR);
    (dir.join(MODEL_FILE), dir)
}

impl<S: InferenceSession> ProductRecoRunner<S> {
    pub fn new(config: &Config) -> RunnerResult<Self> {
        Self::open_in(&config.workdir()?, config.provider())
    }

    pub fn open_in(root: &Path, provider: Provider) -> RunnerResult<Self> {
        let (model_path, test_data_dir) = paths(root);
        if !model_path.is_file() {
            return Err(RunnerError::ArtifactNotFound(model_path));
        }

        let session = S::open(&model_path, provider).map_err(|source| RunnerError::Session {
            path: model_path.clone(),
            source,
        })?;
        Ok(Self {
            session,
            model_path,
            test_data_dir,
        })
    }

    pub fn session(&self) -> &S {
        &self.session
    }
}

impl<S: InferenceSession> ModelRunner for ProductRecoRunner<S> {
    /// Input tensors of one test case; only the first is fed.
    type Input = Vec<Tensor>;
    type Output = [Tensor; 1];

    fn name(&self) -> &str {
        "two-stage-product-reco"
    }

    fn model_path(&self) -> &Path {
        &self.model_path
    }

    fn test_data_dir(&self) -> &Path {
        &self.test_data_dir
    }

    fn validate_decimal(&self) -> u32 {
        3
    }

    fn input_from_case(case: &TestCase) -> Option<Vec<Tensor>> {
        (!case.inputs.is_empty()).then(|| case.inputs.clone())
    }

    fn inference(&mut self, batch: &[Vec<Tensor>]) -> RunnerResult<Inference<[Tensor; 1]>> {
        let mut outputs = Vec::with_capacity(batch.len());
        if batch.is_empty() {
            return Ok(Inference::Completed(outputs));
        }

        let input_name = first_input(&self.session, &self.model_path)?;
        for (index, case) in batch.iter().enumerate() {
            let image = case.first().ok_or_else(|| RunnerError::Inference {
                index,
                source: anyhow::anyhow!("input item holds no tensors"),
            })?;
            let output = run_first(&mut self.session, &input_name, image, index)?;
            outputs.push([output]);
        }
        Ok(Inference::Completed(outputs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::runner::OutputCollection;
    use crate::model::runner::tests::{FakeSession, opened, tensor, values};

    fn runner() -> (tempfile::TempDir, ProductRecoRunner<FakeSession>) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("work");
        std::fs::create_dir_all(&root).unwrap();
        let (model_path, test_data_dir) = paths(&root);
        std::fs::create_dir_all(test_data_dir).unwrap();
        std::fs::write(model_path, b"onnx").unwrap();

        let runner = ProductRecoRunner::<FakeSession>::open_in(&root, Provider::Cpu).unwrap();
        (dir, runner)
    }

    #[test]
    fn test_paths_are_relative_to_parent() {
        let (model, data) = paths(Path::new("/srv/perf"));
        assert_eq!(
            model,
            PathBuf::from("/srv/perf/../cvs_models/two_stage_product_reco/two_stage_product_reco.onnx")
        );
        assert_eq!(data, PathBuf::from("/srv/perf/../cvs_models/two_stage_product_reco"));
    }

    #[test]
    fn test_missing_model_is_artifact_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let before = opened();

        let result = ProductRecoRunner::<FakeSession>::open_in(dir.path(), Provider::Cpu);

        match result {
            Err(RunnerError::ArtifactNotFound(path)) => assert!(path.ends_with(MODEL_FILE)),
            _ => panic!("expected ArtifactNotFound"),
        }
        assert_eq!(opened(), before);
    }

    #[test]
    fn test_outputs_are_wrapped_first_results() {
        let (_dir, mut runner) = runner();
        let batch = vec![
            vec![tensor(&[1.0]), tensor(&[100.0])],
            vec![tensor(&[2.0, 3.0])],
        ];

        let Inference::Completed(outputs) = runner.inference(&batch).unwrap() else {
            panic!("expected completed inference");
        };

        assert_eq!(outputs.len(), 2);
        assert_eq!(values(&outputs[0][0]), vec![2.0]);
        assert_eq!(values(&outputs[1][0]), vec![4.0, 6.0]);
        assert_eq!(runner.session().runs, 2);
    }

    #[test]
    fn test_empty_batch_clears_outputs() {
        let (_dir, mut runner) = runner();
        let mut outputs = OutputCollection::new();
        outputs.apply(runner.inference(&[vec![tensor(&[1.0])]]).unwrap());
        assert_eq!(outputs.len(), 1);

        outputs.apply(runner.inference(&[]).unwrap());
        assert!(outputs.is_empty());
    }

    #[test]
    fn test_repeated_inference_replaces_outputs() {
        let (_dir, mut runner) = runner();
        let mut outputs = OutputCollection::new();
        outputs.apply(runner.inference(&[vec![tensor(&[1.0])], vec![tensor(&[2.0])]]).unwrap());
        outputs.apply(runner.inference(&[vec![tensor(&[5.0])]]).unwrap());

        assert_eq!(outputs.len(), 1);
        assert_eq!(values(&outputs.items()[0][0]), vec![10.0]);
    }

    #[test]
    fn test_item_without_tensors_fails() {
        let (_dir, mut runner) = runner();
        let err = runner.inference(&[vec![tensor(&[1.0])], vec![]]).unwrap_err();
        assert!(matches!(err, RunnerError::Inference { index: 1, .. }));
    }

    #[test]
    fn test_lifecycle_hooks_do_not_touch_state() {
        let (_dir, mut runner) = runner();
        let model_path = runner.model_path().to_path_buf();
        runner.preprocess();
        runner.postprocess();
        assert_eq!(runner.session().runs, 0);

        let mut outputs = OutputCollection::new();
        outputs.apply(runner.inference(&[vec![tensor(&[3.0])]]).unwrap());
        runner.preprocess();
        runner.postprocess();

        assert_eq!(runner.session().runs, 1);
        assert_eq!(runner.model_path(), model_path);
        assert_eq!(outputs.len(), 1);
        assert_eq!(values(&outputs.items()[0][0]), vec![6.0]);
    }

    #[test]
    fn test_validate_decimal() {
        let (_dir, runner) = runner();
        assert_eq!(runner.validate_decimal(), 3);
        assert_eq!(runner.name(), "two-stage-product-reco");
    }
}
