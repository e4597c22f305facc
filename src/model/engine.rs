use anyhow::{Result, anyhow, bail};
use candle_core::{DType, Device, Tensor};
use log::debug;
use ort::execution_providers::{CUDAExecutionProvider, TensorRTExecutionProvider};
use ort::session::Session;
use ort::value::{DynValue, Tensor as OrtTensor};
use serde::Deserialize;
use std::path::Path;

/// Execution backend the session is created with.
#[derive(Deserialize, clap::ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Cpu,
    Cuda,
    #[value(name = "tensorrt")]
    TensorRt,
}

/// A loaded model that can execute forward passes.
pub trait InferenceSession {
    fn open(model_path: &Path, provider: Provider) -> Result<Self>
    where
        Self: Sized;

    fn input_names(&self) -> Vec<String>;

    /// Run one forward pass. Returns every model output in declaration order.
    fn run(&mut self, input_name: &str, input: &Tensor) -> Result<Vec<Tensor>>;
}

pub struct OnnxSession {
    session: Session,
    input_names: Vec<String>,
    output_names: Vec<String>,
}

impl InferenceSession for OnnxSession {
    fn open(model_path: &Path, provider: Provider) -> Result<Self> {
        let builder = Session::builder().map_err(ort_err)?;
        // ort falls back to CPU when a provider fails to register.
        let mut builder = match provider {
            Provider::Cpu => builder,
            Provider::Cuda => builder
                .with_execution_providers([CUDAExecutionProvider::default().build()])
                .map_err(ort_err)?,
            Provider::TensorRt => builder
                .with_execution_providers([
                    TensorRTExecutionProvider::default().build(),
                    CUDAExecutionProvider::default().build(),
                ])
                .map_err(ort_err)?,
        };
        let session = builder.commit_from_file(model_path).map_err(ort_err)?;

        let input_names: Vec<String> = session.inputs.iter().map(|i| i.name.clone()).collect();
        let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();
        debug!(
            "opened {} (inputs: {:?}, outputs: {:?})",
            model_path.display(),
            input_names,
            output_names
        );

        Ok(Self {
            session,
            input_names,
            output_names,
        })
    }

    fn input_names(&self) -> Vec<String> {
        self.input_names.clone()
    }

    fn run(&mut self, input_name: &str, input: &Tensor) -> Result<Vec<Tensor>> {
        let value = to_ort(input)?;
        let outputs = self
            .session
            .run(ort::inputs![input_name => value])
            .map_err(ort_err)?;

        self.output_names
            .iter()
            .map(|name| to_candle(&outputs[name.as_str()]))
            .collect()
    }
}

fn ort_err(e: impl std::fmt::Display) -> anyhow::Error {
    anyhow!("onnxruntime: {e}")
}

fn to_ort(tensor: &Tensor) -> Result<DynValue> {
    let shape: Vec<i64> = tensor.dims().iter().map(|&d| d as i64).collect();
    let flat = tensor.flatten_all()?;
    let value = match tensor.dtype() {
        DType::I64 => OrtTensor::from_array((shape, flat.to_vec1::<i64>()?))
            .map_err(ort_err)?
            .into_dyn(),
        DType::F64 => OrtTensor::from_array((shape, flat.to_vec1::<f64>()?))
            .map_err(ort_err)?
            .into_dyn(),
        DType::F32 => OrtTensor::from_array((shape, flat.to_vec1::<f32>()?))
            .map_err(ort_err)?
            .into_dyn(),
        other => bail!("unsupported input tensor type {other:?}"),
    };
    Ok(value)
}

fn to_candle(value: &DynValue) -> Result<Tensor> {
    let dims = |shape: &[i64]| -> Vec<usize> { shape.iter().map(|&d| d as usize).collect() };

    if let Ok((shape, data)) = value.try_extract_tensor::<f32>() {
        return Ok(Tensor::from_slice(data, dims(shape), &Device::Cpu)?);
    }
    if let Ok((shape, data)) = value.try_extract_tensor::<i64>() {
        return Ok(Tensor::from_slice(data, dims(shape), &Device::Cpu)?);
    }
    if let Ok((shape, data)) = value.try_extract_tensor::<f64>() {
        return Ok(Tensor::from_slice(data, dims(shape), &Device::Cpu)?);
    }
    bail!("unsupported output tensor element type")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_unsupported_input_dtype() {
        let input = Tensor::new(&[1u8, 2, 3], &Device::Cpu).unwrap();
        let err = to_ort(&input).unwrap_err();
        assert!(err.to_string().contains("unsupported input tensor type"), "{err}");

        let half = Tensor::new(&[1f32, 2.0], &Device::Cpu)
            .unwrap()
            .to_dtype(DType::F16)
            .unwrap();
        assert!(to_ort(&half).is_err());
    }
}
