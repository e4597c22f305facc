use candle_core::{DType, Tensor};
use log::debug;
use serde::Serialize;
use std::time::Instant;

use crate::error::{RunnerError, RunnerResult};
use crate::model::{CapturedOutput, Inference, ModelRunner, OutputCollection};
use crate::testdata::TestCase;

#[derive(Serialize, Debug, Clone)]
pub struct BenchReport {
    pub model: String,
    pub iterations: usize,
    pub inputs: usize,
    pub mean_ms: f64,
    pub min_ms: f64,
    pub p50_ms: f64,
    pub p90_ms: f64,
    pub p99_ms: f64,
}

/// Check captured outputs against the reference outputs of `cases`, to
/// `decimal` places (`|expected - actual| < 1.5 * 10^-decimal`).
pub fn validate<T: CapturedOutput>(
    outputs: &[T],
    cases: &[TestCase],
    decimal: u32,
) -> RunnerResult<()> {
    if outputs.len() != cases.len() {
        return Err(RunnerError::OutputCount {
            case: outputs.len().min(cases.len()),
            expected: cases.len(),
            actual: outputs.len(),
        });
    }
    let tolerance = 1.5 * 10f64.powi(-(decimal as i32));

    for (case, (captured, reference)) in outputs.iter().zip(cases).enumerate() {
        let actual = captured.tensors();
        // Refs may list more outputs than the runner keeps; compare the kept prefix.
        if reference.outputs.len() < actual.len() {
            return Err(RunnerError::OutputCount {
                case,
                expected: reference.outputs.len(),
                actual: actual.len(),
            });
        }
        for (output, (actual, expected)) in actual.iter().zip(&reference.outputs).enumerate() {
            compare(case, output, expected, actual, tolerance)?;
        }
    }
    Ok(())
}

fn compare(
    case: usize,
    output: usize,
    expected: &Tensor,
    actual: &Tensor,
    tolerance: f64,
) -> RunnerResult<()> {
    if expected.dims() != actual.dims() {
        return Err(RunnerError::ShapeMismatch {
            case,
            output,
            expected: expected.dims().to_vec(),
            actual: actual.dims().to_vec(),
        });
    }
    let expected = flat_f64(expected)?;
    let actual = flat_f64(actual)?;

    for (index, (&e, &a)) in expected.iter().zip(&actual).enumerate() {
        let close = (e - a).abs() < tolerance || e == a || (e.is_nan() && a.is_nan());
        if !close {
            return Err(RunnerError::Mismatch {
                case,
                output,
                index,
                expected: e,
                actual: a,
            });
        }
    }
    Ok(())
}

fn flat_f64(tensor: &Tensor) -> candle_core::Result<Vec<f64>> {
    tensor.flatten_all()?.to_dtype(DType::F64)?.to_vec1::<f64>()
}

/// Run the full lifecycle `iterations` times over `batch`, timing each
/// `inference` call. The outputs of the last run are left in `outputs`.
pub fn time_inference<R: ModelRunner>(
    runner: &mut R,
    batch: &[R::Input],
    iterations: usize,
    outputs: &mut OutputCollection<R::Output>,
) -> RunnerResult<BenchReport> {
    let mut latencies = Vec::with_capacity(iterations);
    for i in 0..iterations {
        runner.preprocess();
        let start = Instant::now();
        let result = runner.inference(batch)?;
        let elapsed = start.elapsed().as_secs_f64() * 1000.0;
        runner.postprocess();

        if let Inference::Completed(items) = &result {
            debug!("{}: iteration {} ran {} inputs in {:.3}ms", runner.name(), i, items.len(), elapsed);
        }
        outputs.apply(result);
        latencies.push(elapsed);
    }

    Ok(summarize(runner.name(), batch.len(), latencies))
}

pub fn summarize(model: &str, inputs: usize, mut latencies: Vec<f64>) -> BenchReport {
    latencies.sort_by(|a, b| a.total_cmp(b));
    let iterations = latencies.len();
    let mean_ms = if iterations == 0 {
        0.0
    } else {
        latencies.iter().sum::<f64>() / iterations as f64
    };

    BenchReport {
        model: model.to_string(),
        iterations,
        inputs,
        mean_ms,
        min_ms: latencies.first().copied().unwrap_or(0.0),
        p50_ms: percentile(&latencies, 50.0),
        p90_ms: percentile(&latencies, 90.0),
        p99_ms: percentile(&latencies, 99.0),
    }
}

/// Nearest-rank percentile over sorted samples.
fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
