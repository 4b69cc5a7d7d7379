use crate::error::VmError;
use crate::process::Pid;

/// The syscall an executing `TRAP` selected, with its address operand already
/// resolved to a relative address — captured at TRAP-execution time so the
/// I/O worker never has to guess which register held what.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Syscall {
    /// Read an integer from the input source, store it as `DATA` at `addr`.
    In { addr: usize },
    /// Read the `DATA` cell at `addr`, write its value to the output sink.
    Out { addr: usize },
}

/// Events carried on the CPU's interrupt queue. The queue is FIFO and
/// unbounded, fed by the CPU itself, the I/O worker, and (for `Shutdown`)
/// the remote shell.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Interrupt {
    /// A `TRAP` was executed; routes a syscall request to the I/O worker.
    Trap { pid: Pid, syscall: Syscall },
    /// The I/O worker finished a request on behalf of `pid`.
    IoComplete(Pid),
    /// The I/O worker could not complete `pid`'s request (non-integer or
    /// exhausted input on IN, a non-`DATA` target on OUT, or a translation
    /// failure) — fatal to `pid`, which is BLOCKED rather than RUNNING at
    /// the time this is posted, so it cannot be folded into the
    /// current-process-only `InvalidCommand`/`InvalidAddress` variants below.
    IoFailed { pid: Pid, msg: String },
    /// `STOP` was executed: normal termination of the current process.
    ProgramEnd,
    /// The CPU quantum elapsed: preempt (not terminate) the current process.
    VirtualAlarm,
    /// No more work remains; the CPU loop should exit.
    Shutdown,
    /// A decoder/runtime error naming an unrecognised opcode or operand,
    /// fatal to the current process (not the VM).
    InvalidCommand(String),
    /// A translation failure, fatal to the current process.
    InvalidAddress(String),
    /// Signed arithmetic overflowed, fatal to the current process.
    MathOverflow(String),
    /// The allocator could not satisfy a runtime allocation request (e.g. an
    /// `STD`/`STX` that would grow a process past available frames), fatal
    /// to the current process.
    OutOfMemory(String),
}

impl From<VmError> for Interrupt {
    fn from(err: VmError) -> Interrupt {
        match err {
            VmError::InvalidCommand(msg) => Interrupt::InvalidCommand(msg),
            VmError::InvalidAddress(msg) => Interrupt::InvalidAddress(msg),
            VmError::MathOverflow(msg) => Interrupt::MathOverflow(msg),
            VmError::OutOfMemory(msg) => Interrupt::OutOfMemory(msg),
            VmError::DecodeError(msg) => Interrupt::InvalidCommand(msg),
        }
    }
}
