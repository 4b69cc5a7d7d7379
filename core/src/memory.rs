use log::trace;

use crate::cell::Cell;
use crate::error::VmError;
use crate::frame::Frame;
use crate::instruction::Instruction;
use crate::process::Pid;

/// Owns the flat cell array and the frame pool. Allocation is first-fit over
/// the (static-length) frame vector; frames never move.
pub struct MemoryManager {
    cells: Vec<Cell>,
    frames: Vec<Frame>,
    page_size: usize,
}

impl MemoryManager {
    pub fn new(total_words: usize, page_size: usize) -> Self {
        let cells = (0..total_words).map(Cell::empty).collect();
        let frame_count = total_words / page_size;
        let frames = (0..frame_count)
            .map(|i| Frame::new(i, i * page_size, page_size))
            .collect();
        MemoryManager {
            cells,
            frames,
            page_size,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn frame(&self, index: usize) -> &Frame {
        &self.frames[index]
    }

    /// Allocates enough frames to hold `n_words`, first-fit over the frame
    /// vector. On insufficient free frames, rolls back every frame it had
    /// provisionally marked and reports `OUT-OF-MEMORY`; no partial state is
    /// left behind.
    pub fn allocate(&mut self, n_words: usize, owner: Pid) -> Result<Vec<usize>, VmError> {
        let needed = n_words.div_ceil(self.page_size);
        let mut claimed = Vec::with_capacity(needed);

        for frame in self.frames.iter_mut() {
            if claimed.len() == needed {
                break;
            }
            if frame.free {
                frame.free = false;
                frame.owner = owner;
                claimed.push(frame.index);
            }
        }

        if claimed.len() < needed {
            for &idx in &claimed {
                self.frames[idx].free = true;
            }
            return Err(VmError::OutOfMemory(format!(
                "requested {needed} frames, only {} were free",
                claimed.len()
            )));
        }

        for &idx in &claimed {
            self.zero_frame(idx);
        }
        trace!("allocated frames {claimed:?} to pid {owner}");
        Ok(claimed)
    }

    /// Flips each frame's free flag; cells are left untouched and the owner
    /// tag is preserved, so a later dump can still show who last held it.
    pub fn deallocate(&mut self, frame_indices: &[usize]) {
        for &idx in frame_indices {
            self.frames[idx].free = true;
        }
    }

    fn zero_frame(&mut self, frame_index: usize) {
        let frame = &self.frames[frame_index];
        let (start, len) = (frame.start, frame.len);
        for offset in 0..len {
            self.cells[start + offset].instruction = Instruction::Empty {
                original: String::from("____"),
            };
        }
    }

    pub fn raw_access(&self, absolute: usize) -> &Instruction {
        &self.cells[absolute].instruction
    }

    pub fn raw_save(&mut self, absolute: usize, instruction: Instruction) {
        self.cells[absolute].instruction = instruction;
    }

    pub fn dump_lines(&self) -> Vec<String> {
        let mut lines = vec![String::from(
            "[ ADDRESS ][ FRAME INDEX ][ FRAME OWNER ] ORIGINAL | DECODED",
        )];
        for (addr, cell) in self.cells.iter().enumerate() {
            let frame_index = addr / self.page_size;
            let owner = self.frames[frame_index].owner;
            lines.push(format!(
                "[{addr:#06x}][{frame_index:#04x}][{owner:>3}]\t{:<24} | {}",
                cell.instruction.original(),
                cell.instruction.dump()
            ));
        }
        lines
    }
}
