//! Background processing of upload batches.

pub mod batch;
pub mod consolidate;

pub use batch::{PipelineError, run_batch};
pub use consolidate::{build_digest, consolidate};
