use std::collections::{HashMap, VecDeque};

use log::{debug, info};

use crate::error::VmError;
use crate::instruction::Instruction;
use crate::memory::MemoryManager;
use crate::process::{Pcb, Pid, PidGenerator, ProcessState};
use crate::register::RegisterId;

/// Owns the process table and the memory manager together, since a relative
/// address can only be translated in the context of a particular process's
/// frame list. A PCB lives in exactly one of `ready`, `blocked`, `current`,
/// or `ended` at any time.
pub struct ProcessManager {
    memory: MemoryManager,
    pid_gen: PidGenerator,
    ready: VecDeque<Pcb>,
    blocked: HashMap<Pid, Pcb>,
    ended: HashMap<Pid, Pcb>,
    current: Option<Pcb>,
    idle_spawn_count: u64,
}

impl ProcessManager {
    pub fn new(total_words: usize, page_size: usize) -> Result<Self, VmError> {
        let mut pm = ProcessManager {
            memory: MemoryManager::new(total_words, page_size),
            pid_gen: PidGenerator::default(),
            ready: VecDeque::new(),
            blocked: HashMap::new(),
            ended: HashMap::new(),
            current: None,
            idle_spawn_count: 0,
        };
        let system_program = vec![Instruction::Stop {
            original: String::from("STOP"),
        }];
        pm.create_process("system", system_program)?;
        pm.schedule_next();
        Ok(pm)
    }

    pub fn page_size(&self) -> usize {
        self.memory.page_size()
    }

    pub fn current_pid(&self) -> Option<Pid> {
        self.current.as_ref().map(|p| p.pid)
    }

    pub fn is_idle(&self) -> bool {
        self.ready.is_empty() && self.blocked.is_empty() && self.current.is_none()
    }

    /// Loads `instructions` into newly-allocated frames and queues the
    /// resulting process as READY.
    pub fn create_process(
        &mut self,
        name: &str,
        instructions: Vec<Instruction>,
    ) -> Result<Pid, VmError> {
        let pid = self.pid_gen.next();
        let process_size = instructions.len();
        let frames = self.memory.allocate(process_size.max(1), pid)?;
        let page_size = self.memory.page_size();

        for (i, instruction) in instructions.into_iter().enumerate() {
            let frame_index = frames[i / page_size];
            let offset = i % page_size;
            let absolute = self.memory.frame(frame_index).start + offset;
            self.memory.raw_save(absolute, instruction);
        }

        let pcb = Pcb::new(format!("{name}_{pid}"), pid, frames, process_size);
        info!("loaded process {} (pid {pid})", pcb.name);
        self.ready.push_back(pcb);
        Ok(pid)
    }

    /// Promotes the next READY process to RUNNING. If the ready queue is
    /// empty but processes are BLOCKED, spawns a synthetic idle process so
    /// the CPU keeps stepping until an I/O completion unblocks one of them.
    /// Returns the PC and registers the caller must install.
    pub fn schedule_next(&mut self) -> Option<(Pid, usize, Vec<(RegisterId, i64)>)> {
        if self.ready.is_empty() && !self.blocked.is_empty() {
            self.idle_spawn_count += 1;
            let idle_name = format!("idle-{}", self.idle_spawn_count);
            let idle_program = vec![Instruction::Jmp {
                target: 0,
                original: String::from("JMP 0"),
            }];
            // Allocation exhaustion here must not panic: a starved VM halts
            // cleanly instead, so a failure just falls through to `None`.
            if self.create_process(&idle_name, idle_program).is_err() {
                return None;
            }
        }

        let mut pcb = self.ready.pop_front()?;
        let (pc, registers) = pcb.resume();
        let pid = pcb.pid;
        debug!("scheduled pid {pid} ({})", pcb.name);
        self.current = Some(pcb);
        Some((pid, pc, registers))
    }

    /// Suspends the RUNNING process, moving it to the ready queue or the
    /// blocked map depending on `blocked`.
    pub fn suspend_current(
        &mut self,
        pc: usize,
        registers: Vec<(RegisterId, i64)>,
        advance_pc: bool,
        blocked: bool,
    ) -> Option<Pid> {
        let mut pcb = self.current.take()?;
        pcb.suspend(pc, registers, advance_pc, blocked);
        let pid = pcb.pid;
        if blocked {
            self.blocked.insert(pid, pcb);
        } else {
            self.ready.push_back(pcb);
        }
        Some(pid)
    }

    /// Moves a BLOCKED process back onto the ready queue once its I/O
    /// request has completed.
    pub fn unblock(&mut self, pid: Pid) -> bool {
        if let Some(mut pcb) = self.blocked.remove(&pid) {
            pcb.state = ProcessState::Ready;
            self.ready.push_back(pcb);
            true
        } else {
            false
        }
    }

    /// Deallocates the RUNNING process's frames and retires it, then
    /// schedules whatever runs next.
    pub fn end_current(&mut self) -> Option<(Pid, usize, Vec<(RegisterId, i64)>)> {
        let mut finished = self.current.take()?;
        finished.state = ProcessState::Ended;
        self.memory.deallocate(&finished.frames);
        info!("process {} ended", finished.name);
        self.ended.insert(finished.pid, finished);
        self.schedule_next()
    }

    /// Ends a BLOCKED process outright — used when the I/O worker discovers
    /// its TRAP request is unrecoverable (bad input, bad OUT target, a
    /// translation failure). Unlike `end_current`, this never touches the
    /// RUNNING process or triggers a reschedule: the process being failed
    /// is not occupying the CPU, so there is nothing to hand off.
    pub fn fail_blocked(&mut self, pid: Pid) -> bool {
        if let Some(mut pcb) = self.blocked.remove(&pid) {
            pcb.state = ProcessState::Ended;
            self.memory.deallocate(&pcb.frames);
            info!("process {} ended (I/O failure)", pcb.name);
            self.ended.insert(pid, pcb);
            true
        } else {
            false
        }
    }

    fn find_pcb(&self, pid: Pid) -> Option<&Pcb> {
        if let Some(current) = &self.current {
            if current.pid == pid {
                return Some(current);
            }
        }
        self.blocked
            .get(&pid)
            .or_else(|| self.ready.iter().find(|p| p.pid == pid))
            .or_else(|| self.ended.get(&pid))
    }

    fn relative_to_absolute(&self, pcb: &Pcb, addr: usize) -> Result<usize, VmError> {
        let page_size = self.memory.page_size();
        let page = addr / page_size;
        let offset = addr % page_size;
        if page >= pcb.frames.len() {
            return Err(VmError::InvalidAddress(format!(
                "address {addr} is beyond process {}'s allocation",
                pcb.pid
            )));
        }
        let frame_index = pcb.frames[page];
        Ok(self.memory.frame(frame_index).start + offset)
    }

    /// Grows the given process's frame list so that `addr` falls within it.
    /// Only `save` paths call this — `access` fails closed instead.
    fn grow_for(&mut self, pid: Pid, addr: usize) -> Result<(), VmError> {
        let page_size = self.memory.page_size();
        let page = addr / page_size;
        let current_len = self
            .find_pcb(pid)
            .ok_or_else(|| VmError::InvalidAddress(format!("pid {pid} is not resident")))?
            .frames
            .len();
        if page < current_len {
            return Ok(());
        }
        let extra_frames = page + 1 - current_len;
        let new_frames = self.memory.allocate(extra_frames * page_size, pid)?;

        if let Some(current) = &mut self.current {
            if current.pid == pid {
                current.frames.extend(new_frames);
                return Ok(());
            }
        }
        if let Some(pcb) = self.blocked.get_mut(&pid) {
            pcb.frames.extend(new_frames);
            return Ok(());
        }
        if let Some(pcb) = self.ready.iter_mut().find(|p| p.pid == pid) {
            pcb.frames.extend(new_frames);
        }
        Ok(())
    }

    /// Reads relative to the RUNNING process. Never grows the allocation.
    pub fn access(&self, addr: usize) -> Result<Instruction, VmError> {
        let pcb = self
            .current
            .as_ref()
            .ok_or_else(|| VmError::InvalidAddress(String::from("no process is running")))?;
        let absolute = self.relative_to_absolute(pcb, addr)?;
        Ok(self.memory.raw_access(absolute).clone())
    }

    /// Writes relative to the RUNNING process, growing its frame list first
    /// if `addr` lands past the current allocation.
    pub fn save(&mut self, instruction: Instruction, addr: usize) -> Result<(), VmError> {
        let pid = self
            .current
            .as_ref()
            .ok_or_else(|| VmError::InvalidAddress(String::from("no process is running")))?
            .pid;
        self.grow_for(pid, addr)?;
        let pcb = self.current.as_ref().unwrap();
        let absolute = self.relative_to_absolute(pcb, addr)?;
        self.memory.raw_save(absolute, instruction);
        Ok(())
    }

    /// Reads relative to a specific process, RUNNING or not. Used by the I/O
    /// worker thread, which must translate using the PCB that actually made
    /// the request rather than whichever process happens to be current —
    /// the requesting process is typically BLOCKED by the time the I/O
    /// worker gets to it.
    pub fn access_for(&self, pid: Pid, addr: usize) -> Result<Instruction, VmError> {
        let pcb = self
            .find_pcb(pid)
            .ok_or_else(|| VmError::InvalidAddress(format!("pid {pid} is not resident")))?;
        let absolute = self.relative_to_absolute(pcb, addr)?;
        Ok(self.memory.raw_access(absolute).clone())
    }

    pub fn save_for(&mut self, pid: Pid, instruction: Instruction, addr: usize) -> Result<(), VmError> {
        self.grow_for(pid, addr)?;
        let pcb = self
            .find_pcb(pid)
            .ok_or_else(|| VmError::InvalidAddress(format!("pid {pid} is not resident")))?;
        let absolute = self.relative_to_absolute(pcb, addr)?;
        self.memory.raw_save(absolute, instruction);
        Ok(())
    }

    pub fn dump_lines(&self) -> Vec<String> {
        let mut lines = vec![String::from("---- Process table ----")];
        if let Some(current) = &self.current {
            lines.push(format!("RUNNING pid {}:", current.pid));
            lines.extend(current.dump_lines());
        }
        for pcb in &self.ready {
            lines.push(format!("READY pid {}:", pcb.pid));
            lines.extend(pcb.dump_lines());
        }
        for pcb in self.blocked.values() {
            lines.push(format!("BLOCKED pid {}:", pcb.pid));
            lines.extend(pcb.dump_lines());
        }
        for pcb in self.ended.values() {
            lines.push(format!("ENDED pid {}:", pcb.pid));
            lines.extend(pcb.dump_lines());
        }
        lines.extend(self.memory.dump_lines());
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stop() -> Instruction {
        Instruction::Stop {
            original: String::from("STOP"),
        }
    }

    #[test]
    fn new_process_manager_schedules_the_system_process() {
        let pm = ProcessManager::new(64, 16).unwrap();
        assert_eq!(pm.current_pid(), Some(Pid(0)));
    }

    #[test]
    fn save_grows_the_current_process_allocation() {
        let mut pm = ProcessManager::new(64, 16).unwrap();
        pm.create_process("p", vec![stop()]).unwrap();
        pm.end_current(); // system ends, p (pid 1) is scheduled
        assert_eq!(pm.current_pid(), Some(Pid(1)));
        // address 20 is on the process's second page, not yet allocated
        pm.save(Instruction::data(5), 20).unwrap();
        assert_eq!(pm.access(20).unwrap(), Instruction::data(5));
    }

    #[test]
    fn access_does_not_grow_the_allocation() {
        let mut pm = ProcessManager::new(64, 16).unwrap();
        pm.create_process("p", vec![stop()]).unwrap();
        pm.end_current();
        assert!(pm.access(20).is_err());
    }

    #[test]
    fn blocked_process_keeps_its_own_frames_when_queried_by_pid() {
        let mut pm = ProcessManager::new(64, 16).unwrap();
        let pid = pm.create_process("p", vec![stop()]).unwrap();
        pm.end_current(); // schedules p
        assert_eq!(pm.current_pid(), Some(pid));
        let regs = Vec::new();
        pm.suspend_current(0, regs, false, true); // block it
        assert!(pm.access_for(pid, 0).is_ok());
    }

    #[test]
    fn ending_the_last_process_leaves_nothing_scheduled() {
        let mut pm = ProcessManager::new(64, 16).unwrap();
        assert!(pm.end_current().is_none());
        assert!(pm.current_pid().is_none());
    }
}
