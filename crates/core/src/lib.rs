//! `docproc-core` — shared building blocks for the document pipeline.
//!
//! Pure types only: identifiers and the domain error model. No IO.

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{FileId, ProcessId};
