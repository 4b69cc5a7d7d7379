//! The server half of the line-oriented TCP remote shell. One thread per
//! connection; each request line gets exactly one reply line; the
//! connection closes on EOF. `echo`, `help`, and `exit` are handled by the
//! shell client, not here — the server only understands `load` and
//! `shutdown`.

use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread;

use log::{info, warn};
use vcpu_core::{decoder, Interrupt, ProcessManager};

/// Binds `port` and accepts connections for as long as the process lives.
/// Detached like the I/O worker: the returned handle is never joined, it
/// just stops accepting once the process exits.
pub fn spawn(
    process_manager: Arc<Mutex<ProcessManager>>,
    shutdown_tx: Sender<Interrupt>,
    port: u16,
) -> std::io::Result<thread::JoinHandle<()>> {
    let listener = TcpListener::bind(("0.0.0.0", port))?;
    info!("remote shell listening on port {port}");
    Ok(thread::spawn(move || {
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let pm = Arc::clone(&process_manager);
                    let shutdown_tx = shutdown_tx.clone();
                    thread::spawn(move || handle_connection(stream, pm, shutdown_tx));
                }
                Err(e) => warn!("remote shell accept failed: {e}"),
            }
        }
    }))
}

fn handle_connection(stream: TcpStream, pm: Arc<Mutex<ProcessManager>>, shutdown_tx: Sender<Interrupt>) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| String::from("unknown"));
    info!("remote shell connection from {peer}");

    let mut writer = match stream.try_clone() {
        Ok(w) => w,
        Err(e) => {
            warn!("remote shell connection from {peer}: clone failed: {e}");
            return;
        }
    };
    let reader = BufReader::new(stream);

    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(_) => break, // EOF or a broken connection
        };
        let reply = dispatch(&line, &pm, &shutdown_tx);
        if writeln!(writer, "{reply}").is_err() {
            break;
        }
    }
    info!("remote shell connection from {peer} closed");
}

fn dispatch(line: &str, pm: &Arc<Mutex<ProcessManager>>, shutdown_tx: &Sender<Interrupt>) -> String {
    let line = line.trim();
    if line == "shutdown" {
        let _ = shutdown_tx.send(Interrupt::Shutdown);
        return String::from("Halting...");
    }
    if let Some(path) = line.strip_prefix("load ") {
        return load(path.trim(), pm);
    }
    format!("unrecognised command: {line}")
}

fn load(path: &str, pm: &Arc<Mutex<ProcessManager>>) -> String {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => return format!("error reading {path}: {e}"),
    };
    let instructions = match decoder::decode_program(&source) {
        Ok(instructions) => instructions,
        Err(e) => return format!("error decoding {path}: {e}"),
    };
    let name = std::path::Path::new(path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("program");
    let mut pm = pm.lock().unwrap();
    match pm.create_process(name, instructions) {
        Ok(pid) => format!("New process PID: {pid}"),
        Err(e) => format!("error loading {path}: {e}"),
    }
}
