//! Error kinds this crate can produce. Validation and invariant errors abort
//! the call synchronously; driver/timeout/backoff errors are instead
//! recorded on a [`crate::transaction::Transaction`] so a batch call can
//! report a per-transaction failure without rejecting the whole batch.

use crate::key::Scope;
use modbusdb_driver::DriverError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // --- Validation ---
    #[error("scope {0} is not one of PhysicalState(1)/InternalState(2)/PhysicalRegister(3)/InternalRegister(4)")]
    InvalidScope(u8),

    #[error("bit index {0} is out of range 0..=15")]
    InvalidBit(u8),

    #[error("bit scopes ({0:?}) cannot declare a non-zero bit")]
    BitNotAllowedForScope(Scope),

    #[error("type mismatch: expected an integer or boolean value")]
    TypeMismatch,

    #[error("buffer length mismatch: wanted {want} bytes, got {got}")]
    BufferLength { want: usize, got: usize },

    #[error("scale {0} is out of range 0..=3")]
    InvalidScale(u8),

    #[error("freq {0} is out of range 0..=60")]
    InvalidFreq(u8),

    #[error("max_request_size must be at least 1")]
    InvalidMaxRequestSize,

    #[error("duplicate key {0} declared in datamap")]
    DuplicateKey(u32),

    #[error("no entry declared for key {0}")]
    UnknownKey(u32),

    #[error("no unit config declared for unit {0}")]
    UnknownUnit(u8),

    #[error("cannot mix units or scopes within one transaction")]
    CrossUnitOrScope,

    #[error("key set must not be empty")]
    EmptyKeySet,

    #[error("scope {0:?} is read-only")]
    ScopeNotWritable(Scope),

    #[error("register span {0} is out of the wire-legal range 1..=999")]
    SpanOutOfRange(u32),

    #[error("value array length mismatch: expected {want}, got {got}")]
    LengthMismatch { want: usize, got: usize },

    // --- Planner / executor invariant ---
    #[error("select_one produced {0} selects, expected exactly 1")]
    NotExactlyOneSelect(usize),

    #[error("missing response value for address {0}")]
    MissingResponseValue(u16),

    // --- Driver failure ---
    #[error(transparent)]
    Driver(#[from] DriverError),

    // --- Timeout ---
    #[error("transaction timed out")]
    Timeout,

    // --- Backoff shortcut ---
    #[error("too many timeouts for this unit")]
    UnitBackoff,

    // --- Destroyed ---
    #[error("instance has been destroyed")]
    Aborted,
}

impl Error {
    /// Whether this error represents a request timeout, consulted by
    /// `Transaction::is_timed_out` and the executor's backoff predicate.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout)
    }
}
