//! Shared error taxonomy for the Strongroom engine.
//!
//! Every layer fails with an [`EngineError`] carrying exactly one
//! [`ErrorKind`]. Kinds cross layer boundaries unchanged; messages are
//! sanitized for the caller and the wrapped cause stays behind for logs.

pub mod types;

pub use types::{EngineError, EngineResult, ErrorKind};
