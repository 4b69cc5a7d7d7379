use std::fmt;

use crate::register::RegisterId;

/// Process identifier. PID 0 is the synthetic system process created at
/// construction time; it is never scheduled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pid(pub u64);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic PID allocator.
#[derive(Debug, Default)]
pub struct PidGenerator(u64);

impl PidGenerator {
    pub fn next(&mut self) -> Pid {
        let pid = Pid(self.0);
        self.0 += 1;
        pid
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessState {
    Ready,
    Running,
    Blocked,
    Ended,
}

/// Per-process saved context, frame list, and state.
#[derive(Clone, Debug)]
pub struct Pcb {
    pub name: String,
    pub pid: Pid,
    pub process_size: usize,
    /// Frame indices owned by this process, in address order (the frames
    /// themselves need not be contiguous in memory).
    pub frames: Vec<usize>,
    pub current_frame: usize,
    pub current_offset: usize,
    pub state: ProcessState,
    pub saved_pc: usize,
    pub saved_registers: Vec<(RegisterId, i64)>,
}

impl Pcb {
    pub fn new(name: String, pid: Pid, frames: Vec<usize>, process_size: usize) -> Self {
        Pcb {
            name,
            pid,
            process_size,
            frames,
            current_frame: 0,
            current_offset: 0,
            state: ProcessState::Ready,
            saved_pc: 0,
            saved_registers: Vec::new(),
        }
    }

    /// Captures PC (optionally `PC + 1`) and every register value, then marks
    /// the process READY or BLOCKED. `advance_pc` distinguishes preemption
    /// points where the CPU has already executed but not yet incremented
    /// past the current instruction from ones where it has not.
    pub fn suspend(
        &mut self,
        pc: usize,
        registers: Vec<(RegisterId, i64)>,
        advance_pc: bool,
        blocked: bool,
    ) {
        self.saved_pc = if advance_pc { pc + 1 } else { pc };
        self.saved_registers = registers;
        self.state = if blocked {
            ProcessState::Blocked
        } else {
            ProcessState::Ready
        };
    }

    /// Returns the PC to write and the registers to overlay on resume. The
    /// caller (the CPU) does the actual zero-then-overlay and flips state to
    /// RUNNING.
    pub fn resume(&mut self) -> (usize, Vec<(RegisterId, i64)>) {
        self.state = ProcessState::Running;
        (self.saved_pc, std::mem::take(&mut self.saved_registers))
    }

    pub fn dump_lines(&self) -> Vec<String> {
        vec![
            format!("\tNAME: {}", self.name),
            format!("\tPID: {}", self.pid),
            format!("\tSIZE: {}", self.process_size),
            format!("\tNUM. FRAMES: {}", self.frames.len()),
            format!("\tCURRENT_FRAME: {}", self.current_frame),
            format!("\tCURRENT_OFFSET: {}", self.current_offset),
            format!("\tSTATE: {:?}", self.state),
        ]
    }
}
