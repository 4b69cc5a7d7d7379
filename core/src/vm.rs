use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use log::info;

use crate::cpu::{Cpu, DEFAULT_QUANTUM};
use crate::decoder;
use crate::error::VmError;
use crate::interrupt::Interrupt;
use crate::io_handler::{self, StdIo, TrapIo};
use crate::process::Pid;
use crate::process_manager::ProcessManager;

pub const DEFAULT_MEMORY_WORDS: usize = 4096;
pub const DEFAULT_PAGE_SIZE: usize = 16;

/// Wires the CPU, the process manager, and the I/O worker together and owns
/// the channels between them. The composition root: nothing outside this
/// module knows how the pieces are threaded.
pub struct Vm {
    process_manager: Arc<Mutex<ProcessManager>>,
    cpu: Cpu,
    shutdown_tx: mpsc::Sender<Interrupt>,
    io_worker: JoinHandle<()>,
}

impl Vm {
    pub fn new(memory_words: usize, page_size: usize, quantum: u32) -> Result<Self, VmError> {
        Self::with_io(memory_words, page_size, quantum, Box::new(StdIo))
    }

    pub fn with_io(
        memory_words: usize,
        page_size: usize,
        quantum: u32,
        io_sink: Box<dyn TrapIo>,
    ) -> Result<Self, VmError> {
        let process_manager = Arc::new(Mutex::new(ProcessManager::new(memory_words, page_size)?));

        let (interrupt_tx, interrupt_rx) = mpsc::channel();
        let (io_tx, io_rx) = mpsc::channel();

        let io_worker = io_handler::spawn(
            io_rx,
            interrupt_tx.clone(),
            Arc::clone(&process_manager),
            io_sink,
        );

        let cpu = Cpu::new(
            interrupt_rx,
            interrupt_tx.clone(),
            io_tx,
            Arc::clone(&process_manager),
            quantum,
        );

        Ok(Vm {
            process_manager,
            cpu,
            shutdown_tx: interrupt_tx,
            io_worker,
        })
    }

    pub fn with_default_quantum(memory_words: usize, page_size: usize) -> Result<Self, VmError> {
        Self::new(memory_words, page_size, DEFAULT_QUANTUM)
    }

    pub fn process_manager(&self) -> Arc<Mutex<ProcessManager>> {
        Arc::clone(&self.process_manager)
    }

    /// A handle that can trigger `EShutdown` from another thread (the remote
    /// shell's `shutdown` command).
    pub fn shutdown_handle(&self) -> mpsc::Sender<Interrupt> {
        self.shutdown_tx.clone()
    }

    /// Decodes `source` and queues it as a new READY process, mirroring
    /// `load_from_file` reading an assembly file into the process table.
    pub fn load_program(&self, name: &str, source: &str) -> Result<Pid, VmError> {
        let instructions = decoder::decode_program(source)?;
        let mut pm = self.process_manager.lock().unwrap();
        let pid = pm.create_process(name, instructions)?;
        info!("loaded process {name}, pid {pid}");
        Ok(pid)
    }

    /// Runs the CPU loop to completion (`EShutdown`), calling `after_step`
    /// once per observable step — the CLI's dump writer hooks in here.
    pub fn run(mut self, after_step: impl FnMut(&Cpu, &ProcessManager)) {
        self.cpu.run(after_step);
        drop(self.io_worker); // daemon-like: not joined, matches the I/O worker's original daemon thread
    }

    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io_handler::MockIo;

    #[test]
    fn a_stop_only_program_terminates_immediately_with_no_side_effects() {
        let vm = Vm::with_io(256, 16, DEFAULT_QUANTUM, Box::new(MockIo::default())).unwrap();
        let pid = vm.load_program("halt", "STOP\n").unwrap();
        let pm = vm.process_manager();
        vm.run(|_, _| {});
        let pm = pm.lock().unwrap();
        // the process ended; its sole cell is untouched (still STOP)
        assert!(pm.access_for(pid, 0).is_ok());
    }
}
