use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::VmError;
use crate::instruction::{Cmp, Instruction};
use crate::register::RegisterId;

struct OpcodeInfo {
    mnemonic: &'static str,
    pattern: Lazy<Regex>,
}

macro_rules! opcode {
    ($mnemonic:literal, $pattern:literal) => {
        OpcodeInfo {
            mnemonic: $mnemonic,
            pattern: Lazy::new(|| Regex::new($pattern).unwrap()),
        }
    };
}

/// One regex per opcode, keyed by mnemonic — the same shape as the line
/// format table this decoder is built from, just checked at compile time
/// instead of assembled into a runtime dict.
static TABLE: &[OpcodeInfo] = &[
    opcode!("DATA", r"^DATA\s+(-?\d+)$"),
    opcode!("JMP", r"^JMP\s+(-?\d+)$"),
    opcode!("JMPI", r"^JMPI\s+[Rr](\d+)$"),
    opcode!("JMPIG", r"^JMPIG\s+[Rr](\d+),\s*[Rr](\d+)$"),
    opcode!("JMPIL", r"^JMPIL\s+[Rr](\d+),\s*[Rr](\d+)$"),
    opcode!("JMPIE", r"^JMPIE\s+[Rr](\d+),\s*[Rr](\d+)$"),
    opcode!("JMPIM", r"^JMPIM\s+\[(\d+)\]$"),
    opcode!("JMPIGM", r"^JMPIGM\s+\[(\d+)\],\s*[Rr](\d+)$"),
    opcode!("JMPILM", r"^JMPILM\s+\[(\d+)\],\s*[Rr](\d+)$"),
    opcode!("JMPIEM", r"^JMPIEM\s+\[(\d+)\],\s*[Rr](\d+)$"),
    opcode!("STOP", r"^STOP$"),
    opcode!("ADDI", r"^ADDI\s+[Rr](\d+),\s*(-?\d+)$"),
    opcode!("SUBI", r"^SUBI\s+[Rr](\d+),\s*(-?\d+)$"),
    opcode!("ADD", r"^ADD\s+[Rr](\d+),\s*[Rr](\d+)$"),
    opcode!("SUB", r"^SUB\s+[Rr](\d+),\s*[Rr](\d+)$"),
    opcode!("MULT", r"^MULT\s+[Rr](\d+),\s*[Rr](\d+)$"),
    opcode!("LDI", r"^LDI\s+[Rr](\d+),\s*(-?\d+)$"),
    opcode!("LDD", r"^LDD\s+[Rr](\d+),\s*\[(\d+)\]$"),
    opcode!("STD", r"^STD\s+\[(\d+)\],\s*[Rr](\d+)$"),
    opcode!("LDX", r"^LDX\s+[Rr](\d+),\s*\[[Rr](\d+)\]$"),
    opcode!("STX", r"^STX\s+\[[Rr](\d+)\],\s*[Rr](\d+)$"),
    opcode!("SWAP", r"^SWAP\s+[Rr](\d+),\s*[Rr](\d+)$"),
    opcode!("TRAP", r"^TRAP\s+[Rr]8,\s*[Rr]9$"),
];

fn reg(token: &str) -> Result<RegisterId, VmError> {
    RegisterId::parse(&format!("r{token}"))
}

fn int(token: &str) -> Result<i64, VmError> {
    token
        .parse()
        .map_err(|_| VmError::DecodeError(format!("'{token}' is not an integer")))
}

fn uint(token: &str) -> Result<usize, VmError> {
    token
        .parse()
        .map_err(|_| VmError::DecodeError(format!("'{token}' is not an address")))
}

/// Decodes one trimmed source line into an [`Instruction`]. Blank lines and
/// lines starting with `;` decode to [`Instruction::Empty`] rather than
/// failing, mirroring assemblers that treat comments as no-ops.
pub fn decode_line(raw: &str) -> Result<Instruction, VmError> {
    let trimmed = raw.trim();
    let original = trimmed.to_string();

    if trimmed.is_empty() || trimmed.starts_with(';') {
        return Ok(Instruction::Empty { original });
    }

    let mnemonic = trimmed.split_whitespace().next().unwrap_or("");
    let info = TABLE
        .iter()
        .find(|info| info.mnemonic == mnemonic)
        .ok_or_else(|| VmError::DecodeError(format!("'{trimmed}' is not a recognised opcode")))?;

    let captures = info
        .pattern
        .captures(trimmed)
        .ok_or_else(|| VmError::DecodeError(format!("'{trimmed}' is not a valid {mnemonic}")))?;
    let group = |i: usize| captures.get(i).unwrap().as_str();

    let instruction = match mnemonic {
        "DATA" => Instruction::Data {
            value: int(group(1))?,
            original,
        },
        "JMP" => Instruction::Jmp {
            target: uint(group(1))?,
            original,
        },
        "JMPI" => Instruction::Jmpi {
            r1: reg(group(1))?,
            original,
        },
        "JMPIG" => Instruction::JmpiCond {
            cmp: Cmp::Greater,
            r1: reg(group(1))?,
            r2: reg(group(2))?,
            original,
        },
        "JMPIL" => Instruction::JmpiCond {
            cmp: Cmp::Less,
            r1: reg(group(1))?,
            r2: reg(group(2))?,
            original,
        },
        "JMPIE" => Instruction::JmpiCond {
            cmp: Cmp::Equal,
            r1: reg(group(1))?,
            r2: reg(group(2))?,
            original,
        },
        "JMPIM" => Instruction::Jmpim {
            addr: uint(group(1))?,
            original,
        },
        "JMPIGM" => Instruction::JmpimCond {
            cmp: Cmp::Greater,
            addr: uint(group(1))?,
            r2: reg(group(2))?,
            original,
        },
        "JMPILM" => Instruction::JmpimCond {
            cmp: Cmp::Less,
            addr: uint(group(1))?,
            r2: reg(group(2))?,
            original,
        },
        "JMPIEM" => Instruction::JmpimCond {
            cmp: Cmp::Equal,
            addr: uint(group(1))?,
            r2: reg(group(2))?,
            original,
        },
        "STOP" => Instruction::Stop { original },
        "ADDI" => Instruction::Addi {
            r1: reg(group(1))?,
            p: int(group(2))?,
            original,
        },
        "SUBI" => Instruction::Subi {
            r1: reg(group(1))?,
            p: int(group(2))?,
            original,
        },
        "ADD" => Instruction::Add {
            r1: reg(group(1))?,
            r2: reg(group(2))?,
            original,
        },
        "SUB" => Instruction::Sub {
            r1: reg(group(1))?,
            r2: reg(group(2))?,
            original,
        },
        "MULT" => Instruction::Mult {
            r1: reg(group(1))?,
            r2: reg(group(2))?,
            original,
        },
        "LDI" => Instruction::Ldi {
            r1: reg(group(1))?,
            p: int(group(2))?,
            original,
        },
        "LDD" => Instruction::Ldd {
            r1: reg(group(1))?,
            addr: uint(group(2))?,
            original,
        },
        "STD" => Instruction::Std {
            addr: uint(group(1))?,
            r1: reg(group(2))?,
            original,
        },
        "LDX" => Instruction::Ldx {
            r1: reg(group(1))?,
            r2: reg(group(2))?,
            original,
        },
        "STX" => Instruction::Stx {
            r1: reg(group(1))?,
            r2: reg(group(2))?,
            original,
        },
        "SWAP" => Instruction::Swap {
            r1: reg(group(1))?,
            r2: reg(group(2))?,
            original,
        },
        "TRAP" => Instruction::Trap { original },
        _ => unreachable!("TABLE only contains known mnemonics"),
    };
    Ok(instruction)
}

/// Decodes a whole program, one instruction per non-empty, non-comment line.
/// Blank/comment lines still produce an `Instruction::Empty` cell so address
/// arithmetic in hand-written assembly lines up with the source file.
pub fn decode_program(source: &str) -> Result<Vec<Instruction>, VmError> {
    source.lines().map(decode_line).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_every_opcode_family() {
        assert!(matches!(decode_line("DATA 42").unwrap(), Instruction::Data { value: 42, .. }));
        assert!(matches!(decode_line("JMP 10").unwrap(), Instruction::Jmp { target: 10, .. }));
        assert!(matches!(decode_line("JMPI r1").unwrap(), Instruction::Jmpi { .. }));
        assert!(matches!(decode_line("STOP").unwrap(), Instruction::Stop { .. }));
        assert!(matches!(decode_line("TRAP r8, r9").unwrap(), Instruction::Trap { .. }));
        assert!(matches!(decode_line("SWAP r0, r1").unwrap(), Instruction::Swap { .. }));
    }

    #[test]
    fn blank_and_comment_lines_decode_to_empty() {
        assert!(matches!(decode_line("").unwrap(), Instruction::Empty { .. }));
        assert!(matches!(decode_line("   ").unwrap(), Instruction::Empty { .. }));
        assert!(matches!(decode_line("; a comment").unwrap(), Instruction::Empty { .. }));
    }

    #[test]
    fn rejects_unknown_opcodes() {
        assert!(decode_line("FROBNICATE r0").is_err());
    }

    #[test]
    fn rejects_malformed_operands() {
        assert!(decode_line("ADDI r0, not-a-number").is_err());
        assert!(decode_line("JMPI r99").is_err());
    }

    #[test]
    fn trap_rejects_registers_other_than_r8_r9() {
        assert!(decode_line("TRAP r0, r1").is_err());
    }
}
