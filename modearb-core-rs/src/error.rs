//! Error types for the arbitration engine

use thiserror::Error;

use crate::types::{Control, LinkKind};

/// Result type for modearb operations
pub type Result<T> = std::result::Result<T, Error>;

/// Arbitration errors
///
/// None of these abort the node: workers log, back off and continue.
/// `BackendUnavailable` closes the affected pair until it is reselected, and
/// `Closed` stops the worker that sees it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("{backend} unavailable after {attempts} health checks")]
    BackendUnavailable { backend: &'static str, attempts: u32 },

    #[error("{link} transmit failed: {reason}")]
    Transmit { link: &'static str, reason: String },

    #[error("{backend} access failed: {reason}")]
    Storage { backend: &'static str, reason: String },

    #[error("{backend} access out of range: offset {offset} + {len} > {capacity}")]
    OutOfRange {
        backend: &'static str,
        offset: u32,
        len: usize,
        capacity: u32,
    },

    #[error("host transport write failed: {0}")]
    Host(String),

    #[error("{link} link is not in control (control is {control})")]
    NotInControl { link: LinkKind, control: Control },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("channel closed")]
    Closed,
}
