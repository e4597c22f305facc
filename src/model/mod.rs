pub mod engine;
pub mod fetch;
pub mod product_reco;
pub mod runner;
pub mod shufflenet;

pub use engine::{InferenceSession, OnnxSession, Provider};
pub use product_reco::ProductRecoRunner;
pub use runner::{CapturedOutput, Inference, ModelRunner, OutputCollection};
pub use shufflenet::ShuffleNetRunner;
