//! Single-use sandboxed script execution.
//!
//! A request flows through four stages: the workspace manager materializes the
//! script and its attachments into a fresh directory, the engine runs the
//! interpreter against it under a wall-clock limit, the normalizer shapes the
//! raw streams into a response, and the workspace is destroyed on every path.

pub mod engine;
pub mod error;
pub mod executor;
pub mod normalizer;
pub mod workspace;


pub use error::{ExecuteError, RejectedFile, SubmissionError};
pub use executor::Sandbox;
