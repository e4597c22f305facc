//! Performance harness for pretrained ONNX models.
//!
//! Each runner acquires its model artifact, opens an inference session and
//! runs caller-supplied batches through it. Timing and validation against
//! reference outputs live in [`bench`].

pub mod bench;
pub mod config;
pub mod error;
pub mod model;
pub mod testdata;

pub use error::{RunnerError, RunnerResult};
