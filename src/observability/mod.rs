//! Observability: structured logging, the observation sink and the HTTP
//! status endpoint

pub mod health;
pub mod logging;
pub mod sink;

pub use health::StatusServer;
pub use logging::{init_default_logging, init_logging, LogFormat, LogSettings};
pub use sink::{LogSink, MessageObservation, ObservationSink};

// Span macros for structured logging
pub use logging::{message_span, session_span};
