//! The persisted, human-readable dump file. Rewritten wholesale on every
//! observable CPU step and once more on shutdown — write-only, never read
//! back to resume a VM, so there is no format-stability concern across
//! versions.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use log::warn;
use vcpu_core::{Cpu, ProcessManager};

/// Rewrites `path` with the CPU section followed by the process-table
/// section (which itself ends with the memory section) — see
/// [`Cpu::dump_lines`] and [`ProcessManager::dump_lines`].
pub fn write(path: &Path, cpu: &Cpu, pm: &ProcessManager) -> io::Result<()> {
    let file = File::create(path)?;
    let mut out = BufWriter::new(file);
    for line in cpu.dump_lines() {
        writeln!(out, "{line}")?;
    }
    for line in pm.dump_lines() {
        writeln!(out, "{line}")?;
    }
    out.flush()
}

/// A step hook suitable for [`vcpu_core::Vm::run`]: rewrites the dump file
/// on every step, logging (not panicking) on a write failure so a transient
/// disk error doesn't take the whole VM down.
pub fn step_hook(path: &Path) -> impl FnMut(&Cpu, &ProcessManager) + '_ {
    move |cpu: &Cpu, pm: &ProcessManager| {
        if let Err(e) = write(path, cpu, pm) {
            warn!("failed to write dump file {}: {e}", path.display());
        }
    }
}
