//! The typed envelope for one enqueued wire request.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::codec::Value;
use crate::datamap::{Method, Select};
use crate::entry::Entry;
use crate::error::Error;
use crate::key::Scope;

/// Dispatch priority. Higher runs first; FIFO within a band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Low = 1,
    Normal = 3,
    High = 5,
}

/// Monotonically increasing, wrapping modulo 1024.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionId(pub u16);

/// Per-key values produced by a successful read, or accepted by a write.
pub type TransactionData = HashMap<u32, Value>;

/// One planned [`Select`] in flight. Immutable except for the tail state
/// written exactly once by [`Transaction::finish`].
#[derive(Debug)]
pub struct Transaction {
    pub id: TransactionId,
    pub method: Method,
    pub entries: Vec<Entry>,
    pub unit: u8,
    pub scope: Scope,
    pub big_endian: bool,
    pub swap_words: bool,
    pub force_write_many: bool,
    pub priority: Priority,
    pub timeout: Duration,
    pub started_at: Instant,

    finished_at: Option<Instant>,
    data: Option<TransactionData>,
    error: Option<ErrorKind>,
}

/// Distinguishes "this transaction's error came from a timeout" (consulted
/// by executor backoff) from every other error kind, without requiring
/// `Error` itself to be `Clone`.
#[derive(Debug)]
pub enum ErrorKind {
    Timeout,
    Other(String),
}

impl Transaction {
    /// Asserts all entries share unit and scope — a transaction always maps
    /// to exactly one wire request against one unit's one address space.
    pub fn new(id: TransactionId, select: Select, priority: Priority, timeout: Duration) -> Result<Self, Error> {
        if select.entries.is_empty() {
            return Err(Error::EmptyKeySet);
        }
        let unit = select.unit;
        let scope = select.scope;
        if select.entries.iter().any(|e| e.unit != unit || e.scope != scope) {
            return Err(Error::CrossUnitOrScope);
        }

        Ok(Transaction {
            id,
            method: select.method,
            entries: select.entries,
            unit,
            scope,
            big_endian: select.big_endian,
            swap_words: select.swap_words,
            force_write_many: select.force_write_many,
            priority,
            timeout,
            started_at: Instant::now(),
            finished_at: None,
            data: None,
            error: None,
        })
    }

    /// Idempotent: only the first call records completion. Takes a borrowed
    /// `Result` so the caller can still deliver the owned `Error` (not
    /// `Clone`, since it wraps an opaque driver failure) to its own
    /// `oneshot` reply after recording it here.
    pub fn finish(&mut self, result: Result<&TransactionData, &Error>) {
        if self.finished_at.is_some() {
            return;
        }
        self.finished_at = Some(Instant::now());
        match result {
            Ok(data) => self.data = Some(data.clone()),
            Err(err) => {
                self.error = Some(if err.is_timeout() {
                    ErrorKind::Timeout
                } else {
                    ErrorKind::Other(err.to_string())
                });
            }
        }
    }

    pub fn duration(&self) -> Duration {
        let end = self.finished_at.unwrap_or_else(Instant::now);
        end.saturating_duration_since(self.started_at)
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self.error, Some(ErrorKind::Timeout))
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    pub fn data(&self) -> Option<&TransactionData> {
        self.data.as_ref()
    }

    pub fn error(&self) -> Option<&ErrorKind> {
        self.error.as_ref()
    }

    /// An owned, `Clone`-able snapshot for the broadcast event surface.
    pub fn snapshot(&self) -> TransactionSnapshot {
        TransactionSnapshot {
            id: self.id,
            method: self.method,
            unit: self.unit,
            scope: self.scope,
            priority: self.priority,
            duration: self.duration(),
            is_timed_out: self.is_timed_out(),
            data: self.data.clone(),
            error: self.error.as_ref().map(|e| match e {
                ErrorKind::Timeout => "transaction timed out".to_string(),
                ErrorKind::Other(msg) => msg.clone(),
            }),
        }
    }
}

/// Owned, cloneable view of a [`Transaction`] at the moment it was snapshot.
#[derive(Debug, Clone)]
pub struct TransactionSnapshot {
    pub id: TransactionId,
    pub method: Method,
    pub unit: u8,
    pub scope: Scope,
    pub priority: Priority,
    pub duration: Duration,
    pub is_timed_out: bool,
    pub data: Option<TransactionData>,
    pub error: Option<String>,
}
