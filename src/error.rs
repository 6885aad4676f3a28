use std::{error::Error, fmt};

use backtrace::Backtrace;

/// Error categories the engine reports. Most of them surface to the
/// handler that triggered the operation; see the variant comments for
/// who is expected to recover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// An api that needs a worker context was called from outside one,
    /// or the other way around.
    InvalidContext,
    /// The order tried to touch a table it never declared, or the table
    /// is not mapped to this worker.
    UnknownTable,
    /// No handler is registered for the order name.
    UnknownOrder,
    /// Push past the configured `max_queue`; the caller may retry.
    QueueFull,
    /// A big value failed its checksum on read.
    CrcMismatch,
    /// The block store cannot produce a page for a live address; fatal
    /// for the current order, the transaction rolls back.
    PageMiss,
    /// The per-worker order ticket reached its 22-bit limit.
    OrderIdExhausted,
    /// A non-zero order id was attached to a shared-queue order.
    OrderIdMisuse,
    Io,
    /// On-disk bytes that violate the page format.
    Corrupt,
    NotFound,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug)]
pub struct ShoalError {
    kind: ErrorKind,
    details: String,
}

impl ShoalError {
    pub fn new(kind: ErrorKind, msg: &str) -> ShoalError {
        ShoalError {
            kind,
            details: msg.to_string(),
        }
    }

    pub fn io(msg: &str) -> ShoalError {
        ShoalError::new(ErrorKind::Io, msg)
    }

    pub fn corrupt(msg: &str) -> ShoalError {
        ShoalError::new(ErrorKind::Corrupt, msg)
    }

    pub fn page_miss(addr: u32) -> ShoalError {
        ShoalError::new(ErrorKind::PageMiss, &format!("no page for address {}", addr))
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn show_backtrace(&self) {
        let bt = Backtrace::new();
        log::error!("{}\n{:?}", self, bt);
    }
}

impl fmt::Display for ShoalError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.details)
    }
}

impl Error for ShoalError {}

impl From<std::io::Error> for ShoalError {
    fn from(e: std::io::Error) -> ShoalError {
        ShoalError::new(ErrorKind::Io, &e.to_string())
    }
}
