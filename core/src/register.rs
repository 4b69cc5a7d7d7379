use crate::error::VmError;

/// One of the CPU's ten general-purpose registers.
///
/// Values are held as `i64` rather than a fixed machine width so that
/// arithmetic overflow can be detected deliberately (`checked_add` et al.)
/// instead of silently wrapping; overflow must surface as a fatal interrupt,
/// never as silent wraparound.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Register(pub i64);

impl Register {
    pub fn get(&self) -> i64 {
        self.0
    }

    pub fn set(&mut self, value: i64) {
        self.0 = value;
    }
}

/// Identifies one of `r0..r9`. TRAP is special-cased in the decoder to only
/// ever accept `R8`/`R9`, but the register file itself has no notion of
/// reserved roles — any instruction may name any register.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RegisterId(u8);

pub const REGISTER_COUNT: usize = 10;

impl RegisterId {
    pub const R8: RegisterId = RegisterId(8);
    pub const R9: RegisterId = RegisterId(9);

    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Parses a register name case-insensitively (`r0`..`r9` or `R0`..`R9`).
    pub fn parse(token: &str) -> Result<RegisterId, VmError> {
        let lower = token.trim().to_lowercase();
        let digits = lower.strip_prefix('r').ok_or_else(|| {
            VmError::InvalidCommand(format!("'{token}' is not a valid register"))
        })?;
        let idx: u8 = digits
            .parse()
            .map_err(|_| VmError::InvalidCommand(format!("'{token}' is not a valid register")))?;
        if (idx as usize) < REGISTER_COUNT {
            Ok(RegisterId(idx))
        } else {
            Err(VmError::InvalidCommand(format!(
                "'{token}' is not a valid register"
            )))
        }
    }
}

/// The ten general-purpose registers owned by the CPU. The program counter is
/// deliberately not part of this file — it is a dedicated register on `Cpu`.
#[derive(Clone, Debug)]
pub struct RegisterFile {
    slots: [Register; REGISTER_COUNT],
}

impl Default for RegisterFile {
    fn default() -> Self {
        RegisterFile {
            slots: [Register::default(); REGISTER_COUNT],
        }
    }
}

impl RegisterFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: RegisterId) -> i64 {
        self.slots[id.index()].get()
    }

    pub fn set(&mut self, id: RegisterId, value: i64) {
        self.slots[id.index()].set(value);
    }

    /// Zeroes every register, then overlays the given saved values. Used
    /// when a process resumes after being suspended.
    pub fn reset_and_overlay(&mut self, saved: &[(RegisterId, i64)]) {
        self.slots = [Register::default(); REGISTER_COUNT];
        for (id, value) in saved {
            self.set(*id, *value);
        }
    }

    pub fn snapshot(&self) -> Vec<(RegisterId, i64)> {
        (0..REGISTER_COUNT)
            .map(|i| (RegisterId(i as u8), self.slots[i].get()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_register_names_case_insensitively() {
        assert_eq!(RegisterId::parse("r3").unwrap().index(), 3);
        assert_eq!(RegisterId::parse("R3").unwrap().index(), 3);
    }

    #[test]
    fn rejects_out_of_range_registers() {
        assert!(RegisterId::parse("r10").is_err());
        assert!(RegisterId::parse("rX").is_err());
    }

    #[test]
    fn swap_is_its_own_inverse() {
        let mut regs = RegisterFile::new();
        regs.set(RegisterId::parse("r0").unwrap(), 42);
        regs.set(RegisterId::parse("r1").unwrap(), 7);
        let (r0, r1) = (RegisterId::parse("r0").unwrap(), RegisterId::parse("r1").unwrap());

        let (a, b) = (regs.get(r0), regs.get(r1));
        regs.set(r0, b);
        regs.set(r1, a);
        let (a, b) = (regs.get(r0), regs.get(r1));
        regs.set(r0, b);
        regs.set(r1, a);

        assert_eq!(regs.get(r0), 42);
        assert_eq!(regs.get(r1), 7);
    }
}
