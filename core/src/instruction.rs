use crate::error::VmError;
use crate::interrupt::{Interrupt, Syscall};
use crate::process::Pid;
use crate::process_manager::ProcessManager;
use crate::register::{RegisterFile, RegisterId};

/// Everything an instruction's `execute` needs, passed in explicitly rather
/// than injected onto the instruction object at runtime. Instructions carry
/// only their operands; all mutable machine state lives here instead.
pub struct ExecCtx<'a> {
    pub regs: &'a mut RegisterFile,
    pub pc: &'a mut usize,
    pub pid: Pid,
    pub pm: &'a mut ProcessManager,
    /// Enqueues an interrupt on the CPU's interrupt queue. A `&dyn Fn` rather
    /// than a concrete channel type so this module stays ignorant of how the
    /// CPU actually wires its queue.
    pub post: &'a dyn Fn(Interrupt),
}

impl ExecCtx<'_> {
    fn data_at(&mut self, addr: usize) -> Option<i64> {
        match self.pm.access(addr) {
            Ok(Instruction::Data { value, .. }) => Some(value),
            Ok(_) => {
                (self.post)(Interrupt::InvalidCommand(format!(
                    "address {addr} does not contain DATA"
                )));
                None
            }
            Err(e) => {
                (self.post)(e.into());
                None
            }
        }
    }

    fn store_data(&mut self, addr: usize, value: i64) {
        if let Err(e) = self.pm.save(Instruction::data(value), addr) {
            // A runtime allocation failure while growing for this write is
            // reported as INVALID-ADDRESS, not OUT-OF-MEMORY — the latter is
            // reserved for the loader path (`spec.md` §7: "runtime
            // allocation in STX/STD posts INVALID-ADDRESS").
            let interrupt = match e {
                VmError::OutOfMemory(msg) => Interrupt::InvalidAddress(msg),
                other => other.into(),
            };
            (self.post)(interrupt);
        }
    }

    fn checked(&self, result: Option<i64>) -> Option<i64> {
        if result.is_none() {
            (self.post)(Interrupt::MathOverflow(String::from(
                "arithmetic operation overflowed i64",
            )));
        }
        result
    }
}

/// One variant per opcode. Each instruction carries only its typed operands
/// and the trimmed source text it was decoded from (`original`, used by
/// dumps) — no mutable state, no back-reference to the machine that will
/// run it.
#[derive(Clone, Debug, PartialEq)]
pub enum Instruction {
    Data { value: i64, original: String },
    Empty { original: String },

    Jmp { target: usize, original: String },
    Jmpi { r1: RegisterId, original: String },
    JmpiCond { cmp: Cmp, r1: RegisterId, r2: RegisterId, original: String },
    Jmpim { addr: usize, original: String },
    JmpimCond { cmp: Cmp, addr: usize, r2: RegisterId, original: String },

    Stop { original: String },

    Addi { r1: RegisterId, p: i64, original: String },
    Subi { r1: RegisterId, p: i64, original: String },
    Add { r1: RegisterId, r2: RegisterId, original: String },
    Sub { r1: RegisterId, r2: RegisterId, original: String },
    Mult { r1: RegisterId, r2: RegisterId, original: String },

    Ldi { r1: RegisterId, p: i64, original: String },
    Ldd { r1: RegisterId, addr: usize, original: String },
    Std { addr: usize, r1: RegisterId, original: String },
    Ldx { r1: RegisterId, r2: RegisterId, original: String },
    Stx { r1: RegisterId, r2: RegisterId, original: String },

    Swap { r1: RegisterId, r2: RegisterId, original: String },

    Trap { original: String },
}

/// The condition a `JMPIG`/`JMPIL`/`JMPIE` family instruction tests on `r2`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cmp {
    Greater,
    Less,
    Equal,
}

impl Cmp {
    fn holds(self, value: i64) -> bool {
        match self {
            Cmp::Greater => value > 0,
            Cmp::Less => value < 0,
            Cmp::Equal => value == 0,
        }
    }
}

impl Instruction {
    pub fn data(value: i64) -> Instruction {
        Instruction::Data {
            value,
            original: format!("DATA {value}"),
        }
    }

    pub fn original(&self) -> &str {
        match self {
            Instruction::Data { original, .. }
            | Instruction::Empty { original }
            | Instruction::Jmp { original, .. }
            | Instruction::Jmpi { original, .. }
            | Instruction::JmpiCond { original, .. }
            | Instruction::Jmpim { original, .. }
            | Instruction::JmpimCond { original, .. }
            | Instruction::Stop { original }
            | Instruction::Addi { original, .. }
            | Instruction::Subi { original, .. }
            | Instruction::Add { original, .. }
            | Instruction::Sub { original, .. }
            | Instruction::Mult { original, .. }
            | Instruction::Ldi { original, .. }
            | Instruction::Ldd { original, .. }
            | Instruction::Std { original, .. }
            | Instruction::Ldx { original, .. }
            | Instruction::Stx { original, .. }
            | Instruction::Swap { original, .. }
            | Instruction::Trap { original } => original,
        }
    }

    /// A short, fixed-width mnemonic + operand dump, used by the memory
    /// section of the persisted dump.
    pub fn dump(&self) -> String {
        match self {
            Instruction::Data { value, .. } => format!("DATA {value}"),
            Instruction::Empty { .. } => String::from("____"),
            Instruction::Jmp { target, .. } => format!("JMP {target}"),
            Instruction::Jmpi { r1, .. } => format!("JMPI r{}", r1.index()),
            Instruction::JmpiCond { cmp, r1, r2, .. } => {
                format!("{} r{}, r{}", cmp_mnemonic(*cmp, false), r1.index(), r2.index())
            }
            Instruction::Jmpim { addr, .. } => format!("JMPIM [{addr}]"),
            Instruction::JmpimCond { cmp, addr, r2, .. } => {
                format!("{} [{}], r{}", cmp_mnemonic(*cmp, true), addr, r2.index())
            }
            Instruction::Stop { .. } => String::from("STOP"),
            Instruction::Addi { r1, p, .. } => format!("ADDI r{}, {p}", r1.index()),
            Instruction::Subi { r1, p, .. } => format!("SUBI r{}, {p}", r1.index()),
            Instruction::Add { r1, r2, .. } => format!("ADD r{}, r{}", r1.index(), r2.index()),
            Instruction::Sub { r1, r2, .. } => format!("SUB r{}, r{}", r1.index(), r2.index()),
            Instruction::Mult { r1, r2, .. } => format!("MULT r{}, r{}", r1.index(), r2.index()),
            Instruction::Ldi { r1, p, .. } => format!("LDI r{}, {p}", r1.index()),
            Instruction::Ldd { r1, addr, .. } => format!("LDD r{}, [{addr}]", r1.index()),
            Instruction::Std { addr, r1, .. } => format!("STD [{addr}], r{}", r1.index()),
            Instruction::Ldx { r1, r2, .. } => format!("LDX r{}, [r{}]", r1.index(), r2.index()),
            Instruction::Stx { r1, r2, .. } => format!("STX [r{}], r{}", r1.index(), r2.index()),
            Instruction::Swap { r1, r2, .. } => format!("SWAP r{}, r{}", r1.index(), r2.index()),
            Instruction::Trap { .. } => String::from("TRAP r8, r9"),
        }
    }

    /// Runs the instruction. Branches set `ctx.pc` explicitly; everything
    /// else leaves it untouched and relies on the CPU's auto-increment.
    /// Errors and control events are posted through `ctx.post`, never
    /// returned — see `ExecCtx`.
    pub fn execute(&self, ctx: &mut ExecCtx) {
        match self {
            Instruction::Data { .. } | Instruction::Empty { .. } => {}

            Instruction::Jmp { target, .. } => *ctx.pc = *target,
            Instruction::Jmpi { r1, .. } => {
                *ctx.pc = ctx.regs.get(*r1).max(0) as usize;
            }
            Instruction::JmpiCond { cmp, r1, r2, .. } => {
                if cmp.holds(ctx.regs.get(*r2)) {
                    *ctx.pc = ctx.regs.get(*r1).max(0) as usize;
                } else {
                    *ctx.pc += 1;
                }
            }
            Instruction::Jmpim { addr, .. } => {
                if let Some(v) = ctx.data_at(*addr) {
                    *ctx.pc = v.max(0) as usize;
                }
            }
            Instruction::JmpimCond { cmp, addr, r2, .. } => {
                if cmp.holds(ctx.regs.get(*r2)) {
                    if let Some(v) = ctx.data_at(*addr) {
                        *ctx.pc = v.max(0) as usize;
                    }
                } else {
                    *ctx.pc += 1;
                }
            }

            Instruction::Stop { .. } => (ctx.post)(Interrupt::ProgramEnd),

            Instruction::Addi { r1, p, .. } => {
                if let Some(v) = ctx.checked(ctx.regs.get(*r1).checked_add(*p)) {
                    ctx.regs.set(*r1, v);
                }
            }
            Instruction::Subi { r1, p, .. } => {
                if let Some(v) = ctx.checked(ctx.regs.get(*r1).checked_sub(*p)) {
                    ctx.regs.set(*r1, v);
                }
            }
            Instruction::Add { r1, r2, .. } => {
                if let Some(v) = ctx.checked(ctx.regs.get(*r1).checked_add(ctx.regs.get(*r2))) {
                    ctx.regs.set(*r1, v);
                }
            }
            Instruction::Sub { r1, r2, .. } => {
                if let Some(v) = ctx.checked(ctx.regs.get(*r1).checked_sub(ctx.regs.get(*r2))) {
                    ctx.regs.set(*r1, v);
                }
            }
            Instruction::Mult { r1, r2, .. } => {
                if let Some(v) = ctx.checked(ctx.regs.get(*r1).checked_mul(ctx.regs.get(*r2))) {
                    ctx.regs.set(*r1, v);
                }
            }

            Instruction::Ldi { r1, p, .. } => ctx.regs.set(*r1, *p),
            Instruction::Ldd { r1, addr, .. } => {
                if let Some(v) = ctx.data_at(*addr) {
                    ctx.regs.set(*r1, v);
                }
            }
            Instruction::Std { addr, r1, .. } => {
                let v = ctx.regs.get(*r1);
                ctx.store_data(*addr, v);
            }
            Instruction::Ldx { r1, r2, .. } => {
                let addr = ctx.regs.get(*r2).max(0) as usize;
                if let Some(v) = ctx.data_at(addr) {
                    ctx.regs.set(*r1, v);
                }
            }
            Instruction::Stx { r1, r2, .. } => {
                let addr = ctx.regs.get(*r1).max(0) as usize;
                let v = ctx.regs.get(*r2);
                ctx.store_data(addr, v);
            }

            Instruction::Swap { r1, r2, .. } => {
                let (a, b) = (ctx.regs.get(*r1), ctx.regs.get(*r2));
                ctx.regs.set(*r1, b);
                ctx.regs.set(*r2, a);
            }

            Instruction::Trap { .. } => {
                let syscall_no = ctx.regs.get(RegisterId::R8);
                let addr = ctx.regs.get(RegisterId::R9).max(0) as usize;
                let syscall = match syscall_no {
                    1 => Syscall::In { addr },
                    2 => Syscall::Out { addr },
                    other => {
                        (ctx.post)(Interrupt::InvalidCommand(format!(
                            "syscall number {other} is not 1 (IN) or 2 (OUT)"
                        )));
                        return;
                    }
                };
                (ctx.post)(Interrupt::Trap { pid: ctx.pid, syscall });
            }
        }
    }
}

fn cmp_mnemonic(cmp: Cmp, memory_form: bool) -> &'static str {
    match (cmp, memory_form) {
        (Cmp::Greater, false) => "JMPIG",
        (Cmp::Less, false) => "JMPIL",
        (Cmp::Equal, false) => "JMPIE",
        (Cmp::Greater, true) => "JMPIGM",
        (Cmp::Less, true) => "JMPILM",
        (Cmp::Equal, true) => "JMPIEM",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process_manager::ProcessManager;
    use crate::register::RegisterFile;
    use std::cell::RefCell;

    /// A `STD` whose address would require growing past the last free frame
    /// posts INVALID-ADDRESS, not OUT-OF-MEMORY — `spec.md` §7 reserves
    /// OUT-OF-MEMORY for the loader path.
    #[test]
    fn std_past_available_memory_posts_invalid_address_not_out_of_memory() {
        // 1 frame total; the sole process owns it, leaving nothing to grow into.
        let mut pm = ProcessManager::new(16, 16).unwrap();
        pm.end_current(); // retires the synthetic system process, frees its frame
        pm.create_process("p", vec![Instruction::Stop { original: "STOP".into() }])
            .unwrap();
        pm.schedule_next(); // makes "p" current, owning the only frame

        let mut regs = RegisterFile::new();
        let mut pc = 0usize;
        let posted = RefCell::new(Vec::new());
        let post = |i: Interrupt| posted.borrow_mut().push(i);
        let mut ctx = ExecCtx {
            regs: &mut regs,
            pc: &mut pc,
            pid: crate::process::Pid(1),
            pm: &mut pm,
            post: &post,
        };
        let std = Instruction::Std {
            addr: 64, // four frames past the one this process owns
            r1: RegisterId::parse("r0").unwrap(),
            original: String::from("STD [64], r0"),
        };
        std.execute(&mut ctx);

        let posted = posted.into_inner();
        assert_eq!(posted.len(), 1);
        assert!(matches!(posted[0], Interrupt::InvalidAddress(_)));
    }

    /// `ADD` (and, by the same `ctx.checked` path, `SUB`/`MULT`/`ADDI`/`SUBI`)
    /// posts MATH-OVERFLOW rather than wrapping when the result doesn't fit
    /// in `i64` — `spec.md` §7: overflow is "fatal to current process".
    #[test]
    fn arithmetic_overflow_posts_math_overflow() {
        let mut pm = ProcessManager::new(64, 16).unwrap();
        let mut regs = RegisterFile::new();
        let mut pc = 0usize;
        let posted = RefCell::new(Vec::new());
        let post = |i: Interrupt| posted.borrow_mut().push(i);

        let r0 = RegisterId::parse("r0").unwrap();
        let r1 = RegisterId::parse("r1").unwrap();
        regs.set(r0, i64::MAX);
        regs.set(r1, 1);

        let mut ctx = ExecCtx {
            regs: &mut regs,
            pc: &mut pc,
            pid: crate::process::Pid(1),
            pm: &mut pm,
            post: &post,
        };
        let add = Instruction::Add {
            r1: r0,
            r2: r1,
            original: String::from("ADD r0, r1"),
        };
        add.execute(&mut ctx);

        let posted = posted.into_inner();
        assert_eq!(posted.len(), 1);
        assert!(matches!(posted[0], Interrupt::MathOverflow(_)));
        // the register is left unchanged — `ctx.checked` never writes back on overflow.
        assert_eq!(regs.get(r0), i64::MAX);
    }
}
