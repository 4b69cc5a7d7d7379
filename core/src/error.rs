use thiserror::Error;

/// Errors that can be surfaced synchronously to a caller (the decoder, the
/// loader, or the allocator). Once a process is actually running on the CPU,
/// the same conditions are instead posted onto the interrupt queue — see
/// [`crate::interrupt::Interrupt`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VmError {
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("math overflow: {0}")]
    MathOverflow(String),

    #[error("out of memory: {0}")]
    OutOfMemory(String),

    #[error("decode error: {0}")]
    DecodeError(String),
}
