//! Model-zoo style test sets: `test_data_set_<N>/{input,output}_<K>.{pb,npy}`.

pub mod tensor_proto;

use candle_core::Tensor;
use log::debug;
use std::path::{Path, PathBuf};

use crate::error::{RunnerError, RunnerResult};

const SET_PREFIX: &str = "test_data_set_";

/// One test set: model inputs and the reference outputs they should produce.
#[derive(Debug, Clone, Default)]
pub struct TestCase {
    pub inputs: Vec<Tensor>,
    pub outputs: Vec<Tensor>,
}

pub fn load_test_cases(dir: &Path) -> RunnerResult<Vec<TestCase>> {
    if !dir.is_dir() {
        return Err(RunnerError::ArtifactNotFound(dir.to_path_buf()));
    }

    let mut sets: Vec<(usize, PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        let index = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix(SET_PREFIX))
            .and_then(|n| n.parse().ok());
        if let Some(index) = index {
            sets.push((index, path));
        }
    }
    sets.sort_by_key(|(index, _)| *index);

    let cases = sets
        .iter()
        .map(|(_, path)| load_case(path))
        .collect::<RunnerResult<Vec<_>>>()?;
    debug!("loaded {} test cases from {}", cases.len(), dir.display());
    Ok(cases)
}

fn load_case(dir: &Path) -> RunnerResult<TestCase> {
    let mut inputs = Vec::new();
    let mut outputs = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let Some((kind, index)) = classify(&path) else {
            continue;
        };
        match kind {
            Kind::Input => inputs.push((index, path)),
            Kind::Output => outputs.push((index, path)),
        }
    }
    inputs.sort_by_key(|(index, _)| *index);
    outputs.sort_by_key(|(index, _)| *index);

    Ok(TestCase {
        inputs: load_all(&inputs)?,
        outputs: load_all(&outputs)?,
    })
}

enum Kind {
    Input,
    Output,
}

fn classify(path: &Path) -> Option<(Kind, usize)> {
    let ext = path.extension()?.to_str()?;
    if ext != "pb" && ext != "npy" {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    if let Some(index) = stem.strip_prefix("input_") {
        return Some((Kind::Input, index.parse().ok()?));
    }
    if let Some(index) = stem.strip_prefix("output_") {
        return Some((Kind::Output, index.parse().ok()?));
    }
    None
}

fn load_all(files: &[(usize, PathBuf)]) -> RunnerResult<Vec<Tensor>> {
    files.iter().map(|(_, path)| load_tensor(path)).collect()
}

pub fn load_tensor(path: &Path) -> RunnerResult<Tensor> {
    let result = match path.extension().and_then(|e| e.to_str()) {
        Some("npy") => Tensor::read_npy(path).map_err(anyhow::Error::from),
        _ => std::fs::read(path)
            .map_err(anyhow::Error::from)
            .and_then(|bytes| tensor_proto::decode(&bytes)),
    };
    result.map_err(|e| RunnerError::TestData {
        path: path.to_path_buf(),
        reason: format!("{e:#}"),
    })
}
