use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex};

use log::{debug, trace, warn};

use crate::instruction::{ExecCtx, Instruction};
use crate::interrupt::{Interrupt, Syscall};
use crate::process::Pid;
use crate::process_manager::ProcessManager;
use crate::register::RegisterFile;

pub const DEFAULT_QUANTUM: u32 = 5;

#[derive(Debug, PartialEq, Eq)]
enum StepOutcome {
    Continue,
    Shutdown,
}

/// The single emulated CPU: register file, program counter, instruction
/// register, interrupt queue consumer, and the quantum counter that drives
/// preemption. Owns no process state directly — every translated access and
/// every scheduling decision goes through the shared [`ProcessManager`].
pub struct Cpu {
    regs: RegisterFile,
    pc: usize,
    ir: Instruction,
    instr_count_since_resume: u32,
    last_pc_value: usize,
    quantum: u32,
    current_pid: Pid,
    interrupt_rx: Receiver<Interrupt>,
    interrupt_tx: Sender<Interrupt>,
    io_tx: Sender<(Pid, Syscall)>,
    process_manager: Arc<Mutex<ProcessManager>>,
}

impl Cpu {
    pub fn new(
        interrupt_rx: Receiver<Interrupt>,
        interrupt_tx: Sender<Interrupt>,
        io_tx: Sender<(Pid, Syscall)>,
        process_manager: Arc<Mutex<ProcessManager>>,
        quantum: u32,
    ) -> Self {
        let current_pid = process_manager
            .lock()
            .unwrap()
            .current_pid()
            .unwrap_or(Pid(0));
        Cpu {
            regs: RegisterFile::new(),
            pc: 0,
            ir: Instruction::Empty {
                original: String::from("____"),
            },
            instr_count_since_resume: 0,
            last_pc_value: 0,
            quantum,
            current_pid,
            interrupt_rx,
            interrupt_tx,
            io_tx,
            process_manager,
        }
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    pub fn ir(&self) -> &Instruction {
        &self.ir
    }

    pub fn current_pid(&self) -> Pid {
        self.current_pid
    }

    /// Runs until `EShutdown` is observed, calling `after_step` once per
    /// completed step (used by the CLI to rewrite the dump file on every
    /// observable CPU step).
    pub fn run(&mut self, mut after_step: impl FnMut(&Cpu, &ProcessManager)) {
        loop {
            let outcome = self.step();
            {
                let pm = self.process_manager.lock().unwrap();
                after_step(self, &pm);
            }
            if outcome == StepOutcome::Shutdown {
                break;
            }
        }
    }

    fn step(&mut self) -> StepOutcome {
        let curr_addr = self.pc;

        let tx = self.interrupt_tx.clone();
        let post = move |interrupt: Interrupt| {
            let _ = tx.send(interrupt);
        };

        let mut pm_guard = self.process_manager.lock().unwrap();
        self.ir = match pm_guard.access(curr_addr) {
            Ok(instruction) => instruction,
            Err(e) => {
                post(e.into());
                Instruction::Empty {
                    original: String::from("____"),
                }
            }
        };
        trace!("pid {} pc {curr_addr}: {}", self.current_pid, self.ir.dump());

        {
            let mut ctx = ExecCtx {
                regs: &mut self.regs,
                pc: &mut self.pc,
                pid: self.current_pid,
                pm: &mut pm_guard,
                post: &post,
            };
            self.ir.clone().execute(&mut ctx);
        }
        drop(pm_guard);

        if self.instr_count_since_resume >= self.quantum {
            let _ = self.interrupt_tx.send(Interrupt::VirtualAlarm);
        } else {
            self.instr_count_since_resume += 1;
        }

        let mut skip_increment = false;
        let mut shutdown = false;

        while let Ok(interrupt) = self.interrupt_rx.try_recv() {
            debug!("dispatching {interrupt:?}");
            match interrupt {
                Interrupt::Trap { pid, syscall } => {
                    let _ = self.io_tx.send((pid, syscall));
                    self.yield_current(curr_addr, true);
                    skip_increment = true;
                }
                Interrupt::IoComplete(pid) => {
                    let mut pm = self.process_manager.lock().unwrap();
                    pm.unblock(pid);
                }
                Interrupt::IoFailed { pid, msg } => {
                    warn!("pid {pid} fatal I/O error, ending process: {msg}");
                    let mut pm = self.process_manager.lock().unwrap();
                    pm.fail_blocked(pid);
                }
                Interrupt::ProgramEnd => {
                    self.last_pc_value = self.pc;
                    self.pc = 0;
                    self.instr_count_since_resume = 0;
                    self.end_current();
                    skip_increment = true;
                }
                Interrupt::VirtualAlarm => {
                    self.yield_current(curr_addr, false);
                    skip_increment = true;
                }
                Interrupt::Shutdown => {
                    self.pc = self.last_pc_value;
                    shutdown = true;
                }
                Interrupt::InvalidCommand(msg)
                | Interrupt::InvalidAddress(msg)
                | Interrupt::MathOverflow(msg)
                | Interrupt::OutOfMemory(msg) => {
                    warn!("pid {} fatal error, ending process: {msg}", self.current_pid);
                    self.end_current();
                    skip_increment = true;
                }
            }
        }

        if !skip_increment && self.pc == curr_addr {
            self.pc += 1;
        }

        if shutdown {
            StepOutcome::Shutdown
        } else {
            StepOutcome::Continue
        }
    }

    /// Suspends the RUNNING process (READY if `blocked` is false, BLOCKED
    /// otherwise) and installs whatever the process manager schedules next.
    /// `advance_pc` is true when the instruction that triggered the yield
    /// left the PC untouched (so resume should move past it), false when it
    /// already branched (so resume should re-enter at the new target).
    fn yield_current(&mut self, curr_addr: usize, blocked: bool) {
        let advance_pc = self.pc == curr_addr;
        let registers = self.regs.snapshot();
        let mut pm = self.process_manager.lock().unwrap();
        pm.suspend_current(self.pc, registers, advance_pc, blocked);
        match pm.schedule_next() {
            Some((pid, pc, saved_registers)) => {
                drop(pm);
                self.current_pid = pid;
                self.pc = pc;
                self.regs.reset_and_overlay(&saved_registers);
                self.instr_count_since_resume = 0;
            }
            None => {
                drop(pm);
                let _ = self.interrupt_tx.send(Interrupt::Shutdown);
            }
        }
    }

    fn end_current(&mut self) {
        let mut pm = self.process_manager.lock().unwrap();
        match pm.end_current() {
            Some((pid, pc, saved_registers)) => {
                drop(pm);
                self.current_pid = pid;
                self.pc = pc;
                self.regs.reset_and_overlay(&saved_registers);
                self.instr_count_since_resume = 0;
            }
            None => {
                drop(pm);
                let _ = self.interrupt_tx.send(Interrupt::Shutdown);
            }
        }
    }

    pub fn dump_lines(&self) -> Vec<String> {
        let mut lines = vec![
            String::from("---- CPU ----"),
            format!("PC: {:#06x}", self.pc),
            format!("IR: {}", self.ir.dump()),
            format!("RUNNING pid: {}", self.current_pid),
        ];
        for (id, value) in self.regs.snapshot() {
            lines.push(format!("r{}: {value}", id.index()));
        }
        lines
    }

    /// Exposed for tests that need to single-step without running to
    /// `EShutdown` (e.g. observing preemption fairness on processes that
    /// never terminate on their own).
    #[cfg(test)]
    fn step_once(&mut self) -> StepOutcome {
        self.step()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::Instruction;
    use crate::process_manager::ProcessManager;
    use std::sync::mpsc;
    use std::sync::{Arc, Mutex};

    /// Three processes that never STOP on their own (`JMP 0` forever), run
    /// under a quantum of 5. No process should ever execute more than
    /// `quantum + 1` instructions between two resumptions (`spec.md` §8,
    /// scenario 6).
    #[test]
    fn no_process_exceeds_quantum_plus_one_between_resumptions() {
        let quantum = 5;
        let pm = Arc::new(Mutex::new(ProcessManager::new(4096, 16).unwrap()));
        {
            let mut guard = pm.lock().unwrap();
            for _ in 0..3 {
                guard
                    .create_process(
                        "spin",
                        vec![Instruction::Jmp {
                            target: 0,
                            original: String::from("JMP 0"),
                        }],
                    )
                    .unwrap();
            }
        }

        let (interrupt_tx, interrupt_rx) = mpsc::channel();
        let (io_tx, _io_rx) = mpsc::channel();
        let mut cpu = Cpu::new(interrupt_rx, interrupt_tx, io_tx, Arc::clone(&pm), quantum);

        let mut run_lengths = Vec::new();
        let mut current_pid = cpu.current_pid();
        let mut run_len: u32 = 0;

        for _ in 0..400 {
            cpu.step_once();
            if cpu.current_pid() == current_pid {
                run_len += 1;
            } else {
                run_lengths.push(run_len);
                current_pid = cpu.current_pid();
                run_len = 1;
            }
        }
        run_lengths.push(run_len);

        for len in run_lengths {
            assert!(
                len <= quantum + 1,
                "a process ran {len} instructions between resumptions, exceeding quantum + 1 ({})",
                quantum + 1
            );
        }
    }
}
