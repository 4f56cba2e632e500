//! # Engine Error Kinds
//!
//! Typed error kinds for the storage engine and VM. Fallible APIs return
//! [`eyre::Result`] throughout; where the *kind* of failure matters to a
//! caller (the VM boundary distinguishes a logical abort from an I/O or
//! corruption failure), the kind is attached as an [`EngineError`] so the
//! caller can recover it with `report.downcast_ref::<EngineError>()`.
//!
//! ## Kinds
//!
//! - `Io`: a read, write, sync or truncate on the database or journal file
//!   failed. Poisons the open transaction; the driver must roll back.
//! - `Protocol`: the pager was asked to do something its state machine
//!   forbids (mutation outside a transaction, double `BEGIN`). These are
//!   programmer errors in compiled programs, not data-dependent failures.
//! - `Corruption`: a structural invariant of the tree or file was violated
//!   during traversal. Fatal for the current program; the database should
//!   be treated as suspect until reopened (which re-runs recovery).
//! - `Abort`: a logical failure recognized at runtime — division by zero,
//!   or an embedded function returning failure. The program terminates
//!   with the `Abort` outcome and the driver rolls back.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("pager I/O error on page {page}: {source}")]
    Io {
        page: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("pager protocol violation: {0}")]
    Protocol(&'static str),

    #[error("database corruption: {0}")]
    Corruption(String),

    #[error("runtime abort: {0}")]
    Abort(String),
}

impl EngineError {
    pub fn io(page: u32, source: std::io::Error) -> Self {
        EngineError::Io { page, source }
    }

    pub fn corruption(detail: impl Into<String>) -> Self {
        EngineError::Corruption(detail.into())
    }

    pub fn abort(detail: impl Into<String>) -> Self {
        EngineError::Abort(detail.into())
    }

    /// True if this kind terminates the program with `Abort` rather than
    /// `Error` (see the VM's outcome mapping).
    pub fn is_abort(&self) -> bool {
        matches!(self, EngineError::Abort(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_kind_is_distinguishable_through_eyre() {
        let report: eyre::Report = EngineError::abort("divide by zero").into();
        let kind = report.downcast_ref::<EngineError>().unwrap();
        assert!(kind.is_abort());
    }

    #[test]
    fn io_kind_carries_page_number() {
        let err = EngineError::io(7, std::io::Error::other("disk gone"));
        assert!(err.to_string().contains("page 7"));
        assert!(!err.is_abort());
    }
}
