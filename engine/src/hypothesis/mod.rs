//! Research hypotheses
//!
//! Once a branch has enough validated evidence it switches to hypothesis
//! mode: the [`generator`] asks a chat model for hypotheses bridging the
//! branch's summaries and the [`validator`] checks each one against its
//! supporting summaries with the grounding validator.

pub mod generator;
pub mod validator;

pub use generator::HypothesisGenerator;
pub use validator::{HypothesisValidator, HypothesisVerdict};
