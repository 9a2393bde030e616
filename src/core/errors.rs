/*!
 * Error Types
 * Centralized error handling with thiserror and miette diagnostics
 */

use miette::Diagnostic;
use std::io;
use thiserror::Error;

use crate::channels::LimitKind;

/// Kernel operation result
///
/// # Must Use
/// Channel and descriptor operations guard the sandbox boundary and must be handled
#[must_use = "sandbox I/O operations can fail and must be handled"]
pub type KernelResult<T> = Result<T, KernelError>;

/// Process return codes reported when a session terminates on an error
pub mod exit_codes {
    pub const OK: u8 = 0;
    pub const IO: u8 = 32;
    pub const MEMORY: u8 = 33;
    pub const SYSTEM: u8 = 34;
    pub const INVALID_CALL: u8 = 35;
    pub const MANIFEST_SYNTAX: u8 = 36;
    pub const MANIFEST_DEFINITION: u8 = 37;
    pub const SIGNAL_SERVICE: u8 = 38;
    pub const CHANNEL_QUOTA: u8 = 41;
    pub const SESSION_ADDRESS: u8 = 66;
}

/// Unified kernel error type with miette diagnostics
#[derive(Error, Debug, Diagnostic)]
pub enum KernelError {
    #[error("I/O error: {context}")]
    #[diagnostic(
        code(kernel::io),
        help("The host resource could not be opened, read, written or resized.")
    )]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("Quota exceeded on {alias}: {kind} would reach {requested} (limit {limit})")]
    #[diagnostic(
        code(kernel::quota),
        help("Raise the channel limit in the manifest or reduce guest I/O.")
    )]
    Quota {
        alias: String,
        kind: LimitKind,
        requested: i64,
        limit: i64,
    },

    #[error("Manifest syntax error at line {line}: {message}")]
    #[diagnostic(
        code(kernel::manifest_syntax),
        help("Check the key = value layout and the number of comma separated fields.")
    )]
    ManifestSyntax { line: usize, message: String },

    #[error("Invalid manifest definition: {0}")]
    #[diagnostic(
        code(kernel::manifest_definition),
        help("A declared value is out of range or names an unsupported channel combination.")
    )]
    ManifestSemantic(String),

    #[error("Session handoff rejected: {0}")]
    #[diagnostic(
        code(kernel::protocol),
        help("The incoming job must declare the same aliases, access types and limits as the open channels.")
    )]
    Protocol(String),

    #[error("Out of memory: {0}")]
    #[diagnostic(code(kernel::out_of_memory))]
    OutOfMemory(String),

    #[error("Operation not implemented for this descriptor: {0}")]
    #[diagnostic(
        code(kernel::not_implemented),
        help("Host I/O descriptors never act as locks, sockets or semaphores.")
    )]
    NotImplemented(&'static str),

    #[error("Invalid argument: {0}")]
    #[diagnostic(code(kernel::invalid_argument))]
    InvalidArgument(String),

    #[error("No free guest address space for {0} bytes")]
    #[diagnostic(
        code(kernel::out_of_address_space),
        help("Unmap unused regions or enlarge the guest address space.")
    )]
    OutOfAddressSpace(usize),

    #[error("Address space busy: {0}")]
    #[diagnostic(code(kernel::address_space_busy))]
    Busy(String),

    #[error("Signal handling error: {0}")]
    #[diagnostic(code(kernel::signal))]
    Signal(String),
}

impl KernelError {
    /// Wrap a host I/O failure with context
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        KernelError::Io {
            context: context.into(),
            source,
        }
    }

    /// Wrap a raw errno from nix with context
    pub fn errno(context: impl Into<String>, errno: nix::errno::Errno) -> Self {
        Self::io(context, io::Error::from(errno))
    }

    pub fn syntax(line: usize, message: impl Into<String>) -> Self {
        KernelError::ManifestSyntax {
            line,
            message: message.into(),
        }
    }

    pub fn semantic(message: impl Into<String>) -> Self {
        KernelError::ManifestSemantic(message.into())
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        KernelError::Protocol(message.into())
    }

    /// Process return code for a session that terminates with this error
    pub fn exit_code(&self) -> u8 {
        match self {
            KernelError::Io { .. } => exit_codes::IO,
            KernelError::OutOfMemory(_) => exit_codes::MEMORY,
            KernelError::Protocol(_) => exit_codes::SYSTEM,
            KernelError::NotImplemented(_) | KernelError::InvalidArgument(_) => {
                exit_codes::INVALID_CALL
            }
            KernelError::ManifestSyntax { .. } => exit_codes::MANIFEST_SYNTAX,
            KernelError::ManifestSemantic(_) => exit_codes::MANIFEST_DEFINITION,
            KernelError::Signal(_) => exit_codes::SIGNAL_SERVICE,
            KernelError::Quota { .. } => exit_codes::CHANNEL_QUOTA,
            KernelError::OutOfAddressSpace(_) | KernelError::Busy(_) => {
                exit_codes::SESSION_ADDRESS
            }
        }
    }
}
