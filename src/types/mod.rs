//! Core type definitions: sources, attempt outcomes and execution results.

pub mod outcome;
pub mod result;
pub mod source;

pub use outcome::{AttemptError, AttemptOutcome, ResultKind};
pub use result::{AttemptDetail, ExecutionResult};
pub use source::{Source, SourceBuilder, SourceSpec};
