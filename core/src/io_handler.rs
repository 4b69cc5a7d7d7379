use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;

use log::{debug, warn};

use crate::instruction::Instruction;
use crate::interrupt::{Interrupt, Syscall};
use crate::process::Pid;
use crate::process_manager::ProcessManager;

/// Where a `TRAP`'s IN/OUT syscalls actually read and write. Swappable so
/// tests can feed a fixed sequence of integers instead of blocking on stdin,
/// the same role `mock.patch('builtins.input', ...)` plays in the original
/// test suite.
pub trait TrapIo: Send {
    fn read_int(&mut self) -> Option<i64>;
    fn write_int(&mut self, value: i64);
}

/// Blocks on real stdin for IN, writes to real stdout for OUT.
pub struct StdIo;

impl TrapIo for StdIo {
    fn read_int(&mut self) -> Option<i64> {
        let mut line = String::new();
        io::stdin().read_line(&mut line).ok()?;
        line.trim().parse().ok()
    }

    fn write_int(&mut self, value: i64) {
        println!("{value}");
        let _ = io::stdout().flush();
    }
}

/// Feeds a fixed queue of integers for IN and records every OUT, for tests.
#[derive(Default)]
pub struct MockIo {
    pub inputs: VecDeque<i64>,
    pub outputs: Vec<i64>,
}

impl MockIo {
    pub fn with_inputs(inputs: impl IntoIterator<Item = i64>) -> Self {
        MockIo {
            inputs: inputs.into_iter().collect(),
            outputs: Vec::new(),
        }
    }
}

impl TrapIo for MockIo {
    fn read_int(&mut self) -> Option<i64> {
        self.inputs.pop_front()
    }

    fn write_int(&mut self, value: i64) {
        self.outputs.push(value);
    }
}

/// One pending syscall, queued by the CPU when it executes a `TRAP`.
struct IoRequest {
    pid: Pid,
    syscall: Syscall,
}

/// Runs the async I/O worker on its own thread. Decoupled from the CPU loop
/// by two unbounded MPSC channels: `io_rx` feeds in requests, `interrupt_tx`
/// reports completion back. Daemon-like: never joined, just dropped with the
/// process on shutdown.
pub fn spawn(
    io_rx: Receiver<(Pid, Syscall)>,
    interrupt_tx: Sender<Interrupt>,
    process_manager: Arc<Mutex<ProcessManager>>,
    mut sink: Box<dyn TrapIo>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while let Ok((pid, syscall)) = io_rx.recv() {
            let request = IoRequest { pid, syscall };
            let outcome = service(&request, &process_manager, sink.as_mut());
            let interrupt = match outcome {
                Ok(()) => {
                    debug!("I/O request for pid {} completed", request.pid);
                    Interrupt::IoComplete(request.pid)
                }
                Err(msg) => {
                    warn!("pid {} I/O request failed: {msg}", request.pid);
                    Interrupt::IoFailed { pid: request.pid, msg }
                }
            };
            if interrupt_tx.send(interrupt).is_err() {
                break; // CPU loop has already shut down
            }
        }
    })
}

/// Runs one queued syscall to completion. `Err` carries the reason the
/// process should be considered fatally broken (non-integer/exhausted IN,
/// non-`DATA` OUT target, or a translation failure) — the CPU turns this
/// into `Interrupt::IoFailed` rather than silently dropping the request.
fn service(request: &IoRequest, process_manager: &Arc<Mutex<ProcessManager>>, sink: &mut dyn TrapIo) -> Result<(), String> {
    match request.syscall {
        Syscall::In { addr } => {
            let value = sink
                .read_int()
                .ok_or_else(|| String::from("IN: input source exhausted or not an integer"))?;
            let mut pm = process_manager.lock().unwrap();
            pm.save_for(request.pid, Instruction::data(value), addr)
                .map_err(|e| format!("IN: {e}"))
        }
        Syscall::Out { addr } => {
            let pm = process_manager.lock().unwrap();
            match pm.access_for(request.pid, addr) {
                Ok(Instruction::Data { value, .. }) => {
                    drop(pm);
                    sink.write_int(value);
                    Ok(())
                }
                Ok(_) => Err(format!("OUT: address {addr} does not hold DATA")),
                Err(e) => Err(format!("OUT: {e}")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_io_round_trips_inputs_and_outputs() {
        let mut io = MockIo::with_inputs([1, 2, 3]);
        assert_eq!(io.read_int(), Some(1));
        io.write_int(99);
        assert_eq!(io.outputs, vec![99]);
    }

    #[test]
    fn mock_io_read_returns_none_once_exhausted() {
        let mut io = MockIo::with_inputs([]);
        assert_eq!(io.read_int(), None);
    }
}
