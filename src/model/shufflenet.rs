use candle_core::Tensor;
use log::{debug, info};
use std::path::{Path, PathBuf};

use super::engine::{InferenceSession, OnnxSession, Provider};
use super::fetch::fetch_archive;
use super::runner::{Inference, ModelRunner};
use crate::config::Config;
use crate::error::{RunnerError, RunnerResult};
use crate::testdata::TestCase;

pub const SHUFFLENET_URL: &str =
    "https://github.com/onnx/models/raw/master/vision/classification/shufflenet/model/shufflenet-v2-10.tar.gz";
const ARCHIVE_NAME: &str = "shufflenet-v2-10.tar.gz";
const MODEL_DIR: &str = "model/test_shufflenetv2";

/// ShuffleNet v2 from the ONNX model zoo, fetched on first use.
pub struct ShuffleNetRunner<S = OnnxSession> {
    session: S,
    model_path: PathBuf,
    test_data_dir: PathBuf,
}

impl<S: InferenceSession> ShuffleNetRunner<S> {
    pub fn new(config: &Config) -> RunnerResult<Self> {
        let root = config.workdir()?;
        Self::open_in(
            &root,
            config.shufflenet_url.as_deref().unwrap_or(SHUFFLENET_URL),
            config.shufflenet_sha256.as_deref(),
            config.provider(),
        )
    }

    /// Open the model under `root`, downloading it from `url` if absent.
    pub fn open_in(
        root: &Path,
        url: &str,
        sha256: Option<&str>,
        provider: Provider,
    ) -> RunnerResult<Self> {
        let model_path = ensure_model(root, url, sha256)?;
        let (_, test_data_dir) = paths(root);

        let session = S::open(&model_path, provider).map_err(|source| RunnerError::Session {
            path: model_path.clone(),
            source,
        })?;
        Ok(Self::with_session(session, model_path, test_data_dir))
    }

    pub fn with_session(session: S, model_path: PathBuf, test_data_dir: PathBuf) -> Self {
        Self {
            session,
            model_path,
            test_data_dir,
        }
    }

    pub fn session(&self) -> &S {
        &self.session
    }
}

/// Make sure the model exists under `root`, fetching the archive if not.
pub fn ensure_model(root: &Path, url: &str, sha256: Option<&str>) -> RunnerResult<PathBuf> {
    let (model_path, _) = paths(root);
    if model_path.exists() {
        return Ok(model_path);
    }

    info!("{} missing, fetching", model_path.display());
    fetch_archive(url, root, ARCHIVE_NAME, sha256)?;
    if !model_path.exists() {
        return Err(RunnerError::ArtifactNotFound(model_path));
    }
    Ok(model_path)
}

pub fn paths(root: &Path) -> (PathBuf, PathBuf) {
    let dir = root.join(MODEL_DIR);
    (dir.join("model.onnx"), dir)
}

impl<S: InferenceSession> ModelRunner for ShuffleNetRunner<S> {
    type Input = Tensor;
    type Output = Tensor;

    fn name(&self) -> &str {
        "Shufflenet-v2"
    }

    fn model_path(&self) -> &Path {
        &self.model_path
    }

    fn test_data_dir(&self) -> &Path {
        &self.test_data_dir
    }

    fn input_from_case(case: &TestCase) -> Option<Tensor> {
        case.inputs.first().cloned()
    }

    fn inference(&mut self, batch: &[Tensor]) -> RunnerResult<Inference<Tensor>> {
        if batch.is_empty() {
            debug!("{}: empty input, nothing to run", self.name());
            return Ok(Inference::EmptyInput);
        }

        let input_name = first_input(&self.session, &self.model_path)?;
        let mut outputs = Vec::with_capacity(batch.len());
        for (index, input) in batch.iter().enumerate() {
            let output = run_first(&mut self.session, &input_name, input, index)?;
            outputs.push(output);
        }
        Ok(Inference::Completed(outputs))
    }
}

pub(crate) fn first_input<S: InferenceSession>(session: &S, model_path: &Path) -> RunnerResult<String> {
    session
        .input_names()
        .into_iter()
        .next()
        .ok_or_else(|| RunnerError::Session {
            path: model_path.to_path_buf(),
            source: anyhow::anyhow!("model declares no inputs"),
        })
}

/// Run one input and keep only output 0.
pub(crate) fn run_first<S: InferenceSession>(
    session: &mut S,
    input_name: &str,
    input: &Tensor,
    index: usize,
) -> RunnerResult<Tensor> {
    let outputs = session
        .run(input_name, input)
        .map_err(|source| RunnerError::Inference { index, source })?;
    outputs.into_iter().next().ok_or_else(|| RunnerError::Inference {
        index,
        source: anyhow::anyhow!("model returned no outputs"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fetch::tests::{archive_bytes, noisy_text, serve_once};
    use crate::model::runner::OutputCollection;
    use crate::model::runner::tests::{FakeSession, opened, tensor, values};

    fn runner() -> ShuffleNetRunner<FakeSession> {
        let session = FakeSession::open(Path::new("model.onnx"), Provider::Cpu).unwrap();
        ShuffleNetRunner::with_session(session, "model.onnx".into(), "data".into())
    }

    #[test]
    fn test_one_output_per_input_in_order() {
        let mut runner = runner();
        let batch = vec![tensor(&[1.0]), tensor(&[2.0, 3.0]), tensor(&[4.0])];

        let Inference::Completed(outputs) = runner.inference(&batch).unwrap() else {
            panic!("expected completed inference");
        };

        assert_eq!(outputs.len(), 3);
        assert_eq!(values(&outputs[0]), vec![2.0]);
        assert_eq!(values(&outputs[1]), vec![4.0, 6.0]);
        assert_eq!(values(&outputs[2]), vec![8.0]);
        assert_eq!(runner.session().runs, 3);
    }

    #[test]
    fn test_empty_input_leaves_outputs_untouched() {
        let mut runner = runner();
        let mut outputs = OutputCollection::new();
        outputs.apply(runner.inference(&[tensor(&[5.0])]).unwrap());

        let result = runner.inference(&[]).unwrap();
        assert!(result.is_empty_input());
        outputs.apply(result);

        assert_eq!(outputs.len(), 1);
        assert_eq!(values(&outputs.items()[0]), vec![10.0]);
        assert_eq!(runner.session().runs, 1);
    }

    #[test]
    fn test_repeated_inference_replaces_outputs() {
        let mut runner = runner();
        let mut outputs = OutputCollection::new();
        outputs.apply(runner.inference(&[tensor(&[1.0]), tensor(&[2.0])]).unwrap());
        outputs.apply(runner.inference(&[tensor(&[9.0])]).unwrap());

        assert_eq!(outputs.len(), 1);
        assert_eq!(values(&outputs.items()[0]), vec![18.0]);
    }

    #[test]
    fn test_engine_fault_reports_index() {
        let mut runner = runner();
        let scalar = Tensor::new(1f32, &candle_core::Device::Cpu).unwrap();
        let err = runner
            .inference(&[tensor(&[1.0]), scalar])
            .unwrap_err();
        assert!(matches!(err, RunnerError::Inference { index: 1, .. }));
    }

    #[test]
    fn test_failed_download_opens_no_session() {
        let dir = tempfile::tempdir().unwrap();
        let before = opened();

        let result = ShuffleNetRunner::<FakeSession>::open_in(
            dir.path(),
            "http://127.0.0.1:9/shufflenet-v2-10.tar.gz",
            None,
            Provider::Cpu,
        );

        assert!(matches!(result, Err(RunnerError::Acquisition { .. })));
        assert_eq!(opened(), before);
    }

    #[test]
    fn test_missing_model_is_fetched_then_opened() {
        let dir = tempfile::tempdir().unwrap();
        let body = archive_bytes(&[
            ("model/test_shufflenetv2/model.onnx", "onnx"),
            ("model/test_shufflenetv2/test_data_set_0/input_0.pb", ""),
        ]);
        let url = serve_once(body);

        let runner =
            ShuffleNetRunner::<FakeSession>::open_in(dir.path(), &url, None, Provider::Cpu).unwrap();

        let (model_path, _) = paths(dir.path());
        assert_eq!(runner.session().path, model_path);
        assert!(dir.path().join(ARCHIVE_NAME).exists());
    }

    #[test]
    fn test_archive_without_model_is_artifact_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let url = serve_once(archive_bytes(&[("model/other/model.onnx", "onnx")]));
        let before = opened();

        let result = ShuffleNetRunner::<FakeSession>::open_in(dir.path(), &url, None, Provider::Cpu);

        assert!(matches!(result, Err(RunnerError::ArtifactNotFound(_))));
        assert_eq!(opened(), before);
    }

    #[test]
    fn test_truncated_archive_leaves_no_partial_model() {
        let dir = tempfile::tempdir().unwrap();
        let weights = noisy_text(200_000);
        let mut body = archive_bytes(&[("model/test_shufflenetv2/model.onnx", weights.as_str())]);
        body.truncate(body.len() / 2);
        let url = serve_once(body);
        let before = opened();

        let result = ShuffleNetRunner::<FakeSession>::open_in(dir.path(), &url, None, Provider::Cpu);

        assert!(matches!(result, Err(RunnerError::Acquisition { .. })));
        let (model_path, _) = paths(dir.path());
        assert!(!model_path.exists());
        assert!(!dir.path().join("model").exists());
        assert_eq!(opened(), before);
    }

    #[test]
    fn test_existing_model_skips_download() {
        let dir = tempfile::tempdir().unwrap();
        let (model_path, test_data_dir) = paths(dir.path());
        std::fs::create_dir_all(&test_data_dir).unwrap();
        std::fs::write(&model_path, b"onnx").unwrap();

        let runner = ShuffleNetRunner::<FakeSession>::open_in(
            dir.path(),
            "http://127.0.0.1:9/unused.tar.gz",
            None,
            Provider::Cpu,
        )
        .unwrap();

        assert_eq!(runner.session().path, model_path);
        assert_eq!(runner.test_data_dir(), test_data_dir);
        assert!(!dir.path().join(ARCHIVE_NAME).exists());
    }

    #[test]
    fn test_lifecycle_hooks_do_not_touch_state() {
        let mut runner = runner();
        runner.preprocess();
        runner.postprocess();
        assert_eq!(runner.session().runs, 0);
        runner.inference(&[tensor(&[1.0])]).unwrap();
        runner.postprocess();
        assert_eq!(runner.session().runs, 1);
    }
}
