//! Core request handling
//!
//! Request and result types, text sanitization, and the network-free
//! local explanation used when no provider can answer.

pub mod local;
pub mod request;
pub mod text_normalizer;

pub use local::local_explanation;
pub use request::{
    ExplainRequest, ExplainResponse, ExplanationRequest, ExplanationResult, LOCAL_PROVIDER,
};
pub use text_normalizer::TextNormalizer;
