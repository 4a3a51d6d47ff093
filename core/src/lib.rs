//! Shared building blocks for the Python-to-Go modernization pipeline: configuration, logging
//! setup, source file identity, and the interface to the external inference service.

pub mod config;
pub mod diagnostics;
pub mod inference;
#[cfg(feature = "llm-support")]
pub mod llm;
mod source;
pub mod test_util;

pub use source::{ContentDigest, SourceFile};
pub use tokio_util::sync::CancellationToken;
