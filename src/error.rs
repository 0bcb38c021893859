//! Error taxonomy.
//!
//! Contract violations (linking a node that is already linked, erasing a
//! detached node, handing in a malformed bucket array) panic. Missing keys
//! and duplicate keys are ordinary outcomes expressed through `Option` and
//! `Inserted`. Only allocation failure is an `Error`.

use std::collections::TryReserveError;
use thiserror::Error;

/// Failures surfaced by allocating operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A fastbin page or bucket array could not be allocated. The structure
    /// that attempted the allocation is left unchanged.
    #[error("allocation of {bytes} bytes failed")]
    Alloc {
        bytes: usize,
        #[source]
        source: TryReserveError,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A structural invariant that does not hold. Produced by the
/// `validate`/`check_invariants` helpers; never by normal operations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum InvariantViolation {
    #[error("node {node}: stored height {stored}, expected {expected}")]
    Height {
        node: String,
        stored: u32,
        expected: u32,
    },
    #[error("node {node}: child heights {left}/{right} out of balance")]
    Balance { node: String, left: u32, right: u32 },
    #[error("node {node}: parent link does not point back at {expected}")]
    ParentLink { node: String, expected: String },
    #[error("node {node} is out of order")]
    Order { node: String },
    #[error("bucket {bucket}: {reason}")]
    Bucket { bucket: usize, reason: &'static str },
    #[error("count is {stored}, but {counted} nodes are reachable")]
    Count { stored: usize, counted: usize },
}
