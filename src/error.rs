//! Unified error types for nachos_vm using thiserror

use thiserror::Error;

use crate::types::SpaceId;

/// Errors raised by a backing store (executable image or swap file)
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    #[error("backing store unavailable")]
    Unavailable,

    #[error("access at offset {offset} exceeds store capacity {capacity}")]
    OutOfRange { offset: u64, capacity: u64 },

    #[error("I/O failure at offset {offset}")]
    Io { offset: u64 },
}

/// How far an error reaches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Kill the faulting process; other address spaces are intact
    Process,
    /// Bookkeeping or storage is broken; halt the whole machine
    Machine,
}

/// Top-level error type for VM operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VmError {
    #[error("bad executable header magic {0:#010x}")]
    BadMagic(u32),

    #[error("executable header truncated ({0} bytes)")]
    TruncatedHeader(usize),

    #[error("invalid configuration: {0}")]
    Config(&'static str),

    #[error("virtual page {vpn} outside address space of {num_pages} pages")]
    AddressOutOfRange { vpn: usize, num_pages: usize },

    #[error("write to read-only page {0}")]
    ReadOnly(usize),

    #[error("physical memory exhausted")]
    OutOfMemory,

    #[error("swap space exhausted")]
    SwapExhausted,

    #[error("frame directory inconsistent at frame {0}")]
    DirectoryInconsistent(usize),

    #[error("paging bookkeeping violated: {0}")]
    Invariant(&'static str),

    #[error("no address space is running")]
    NoCurrentSpace,

    #[error("unknown address space {0}")]
    UnknownSpace(SpaceId),

    #[error("backing store error: {0}")]
    Store(#[from] StoreError),
}

impl VmError {
    /// Classify the error
    pub fn severity(&self) -> Severity {
        match self {
            VmError::BadMagic(_)
            | VmError::TruncatedHeader(_)
            | VmError::Config(_)
            | VmError::AddressOutOfRange { .. }
            | VmError::ReadOnly(_)
            | VmError::OutOfMemory
            | VmError::NoCurrentSpace
            | VmError::UnknownSpace(_) => Severity::Process,
            VmError::SwapExhausted
            | VmError::DirectoryInconsistent(_)
            | VmError::Invariant(_)
            | VmError::Store(_) => Severity::Machine,
        }
    }

    /// Check if the machine must halt
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Machine
    }
}

/// Result alias used throughout the crate
pub type VmResult<T> = Result<T, VmError>;
