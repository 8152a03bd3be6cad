//! Observability for feedping
//!
//! Structured logging on stderr through `tracing`, with span macros for the
//! publish and connection paths.

pub mod logging;

// Re-export for convenience
pub use logging::{init_default_logging, init_logging, level_for_verbosity, LogFormat};

// Span macros for structured logging
pub use logging::{connection_span, publish_span};
