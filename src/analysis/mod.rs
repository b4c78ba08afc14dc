//! Payload classification and content analysis
//!
//! Both stages are pure and synchronous; the session controller runs them
//! inline for every delivered message.

pub mod analyzer;
pub mod classifier;

pub use analyzer::{analyze, ContentReport, StructuredReport, TextReport, RECOGNIZED_FIELDS};
pub use classifier::{classify_payload, ClassifiedContent};
