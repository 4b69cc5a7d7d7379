//! `vcpu` binary: parses arguments, wires up logging, preloads assembly
//! programs, and runs the VM to completion (or spins up the optional
//! memory-viewer stub / remote shell instead).

mod dump;
mod shell;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use vcpu_core::{Vm, DEFAULT_MEMORY_WORDS, DEFAULT_PAGE_SIZE, DEFAULT_QUANTUM};

/// Default directory of example programs, loaded when no files are given
/// on the command line (mirrors the original's bundled `example_programs/`).
const DEFAULT_PROGRAMS_DIR: &str = "programs";

#[derive(Parser, Debug)]
#[command(name = "vcpu", about = "paged-memory, preemptively-scheduled register machine")]
struct Args {
    /// Assembly files to preload. If none are given, every `.asm` file in
    /// `programs/` is loaded instead.
    programs: Vec<PathBuf>,

    /// Print a one-shot text dump of memory and exit immediately, in place
    /// of the original's Tkinter memory viewer.
    #[arg(long)]
    gui: bool,

    /// Accept `load`/`shutdown` commands on a TCP socket.
    #[arg(long)]
    shell: bool,

    /// Port the remote shell listens on, when `--shell` is given.
    #[arg(long, default_value_t = 8899)]
    shell_port: u16,

    /// Instructions a process may run before being preempted.
    #[arg(long, default_value_t = DEFAULT_QUANTUM)]
    quantum: u32,

    /// Cells per frame.
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
    page_size: usize,

    /// Total cells of memory.
    #[arg(long, default_value_t = DEFAULT_MEMORY_WORDS)]
    memory_words: usize,

    /// Path the memory dump is rewritten to on every observable CPU step.
    #[arg(long, default_value = "memory.dump")]
    dump_path: PathBuf,
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        error!("{e:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();

    let files = if args.programs.is_empty() {
        default_programs()?
    } else {
        args.programs.clone()
    };

    let vm = Vm::new(args.memory_words, args.page_size, args.quantum)
        .context("failed to construct the virtual machine")?;

    for path in &files {
        let source = fs::read_to_string(path)
            .with_context(|| format!("failed to read program {}", path.display()))?;
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("program");
        let pid = vm
            .load_program(name, &source)
            .with_context(|| format!("failed to load program {}", path.display()))?;
        info!("loaded {} as pid {pid}", path.display());
    }

    if args.gui {
        let pm = vm.process_manager();
        let pm = pm.lock().unwrap();
        for line in pm.dump_lines() {
            println!("{line}");
        }
        return Ok(());
    }

    if args.shell {
        shell::spawn(vm.process_manager(), vm.shutdown_handle(), args.shell_port)
            .context("failed to start the remote shell")?;
    }

    vm.run(dump::step_hook(&args.dump_path));
    Ok(())
}

/// Loads every `.asm` file in `programs/`, sorted for deterministic PID
/// assignment (the loader has no other ordering guarantee to lean on).
fn default_programs() -> Result<Vec<PathBuf>> {
    let dir = Path::new(DEFAULT_PROGRAMS_DIR);
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("failed to read default program directory {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "asm"))
        .collect();
    files.sort();
    Ok(files)
}
