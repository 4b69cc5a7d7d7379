//! End-to-end tests that load a fixture program from `programs/`, run the
//! whole machine to completion, and inspect the final memory contents. Each
//! fixture's relative address layout is documented alongside it here rather
//! than in the fixture file itself, since the fixture is meant to read like
//! assembly, not prose.

use std::sync::mpsc;
use std::time::Duration;

use vcpu_core::io_handler::MockIo;
use vcpu_core::{Cpu, Instruction, ProcessManager, Vm};

const FIBONACCI: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/../programs/fibonacci.asm"));
const P2: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/../programs/p2.asm"));
const P2_TRAPS: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/../programs/p2_traps.asm"));
const P3: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/../programs/p3.asm"));
const P3_TRAPS: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/../programs/p3_traps.asm"));
const P4: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/../programs/p4.asm"));

const BUBBLE_SORT_FIXTURE: [i64; 50] = [
    73, 29, 8, 82, 199, 62, 164, 182, 29, 197, 38, 2, 186, 192, 35, 18, 122, 138, 181, 195, 86,
    174, 75, 135, 7, 12, 33, 67, 62, 133, 55, 104, 78, 84, 91, 121, 73, 178, 117, 109, 4, 163, 11,
    182, 54, 77, 107, 197, 81, 100,
];

fn run_to_completion(vm: Vm) {
    // `run` blocks until `EShutdown`; a background thread with a watchdog
    // keeps a stalled fixture from hanging a full test-suite run.
    let (done_tx, done_rx) = mpsc::channel();
    std::thread::spawn(move || {
        vm.run(|_: &Cpu, _: &ProcessManager| {});
        let _ = done_tx.send(());
    });
    done_rx
        .recv_timeout(Duration::from_secs(10))
        .expect("program did not halt within the watchdog timeout");
}

fn data_value(pm: &ProcessManager, pid: vcpu_core::Pid, addr: usize) -> i64 {
    match pm.access_for(pid, addr).expect("address should be resident") {
        Instruction::Data { value, .. } => value,
        other => panic!("expected DATA at {addr}, found {other:?}"),
    }
}

#[test]
fn fibonacci_fills_cells_50_through_59() {
    let vm = Vm::with_io(4096, 16, 5, Box::new(MockIo::default())).unwrap();
    let pid = vm.load_program("fibonacci", FIBONACCI).unwrap();
    let pm = vm.process_manager();
    run_to_completion(vm);

    let pm = pm.lock().unwrap();
    let expected = [0, 1, 1, 2, 3, 5, 8, 13, 21, 34];
    for (i, value) in expected.iter().enumerate() {
        assert_eq!(data_value(&pm, pid, 50 + i), *value, "cell {}", 50 + i);
    }
}

#[test]
fn p2_writes_the_parameter_count_then_n_fib_values() {
    let vm = Vm::with_io(4096, 16, 5, Box::new(MockIo::default())).unwrap();
    let pid = vm.load_program("p2", P2).unwrap();
    let pm = vm.process_manager();
    run_to_completion(vm);

    let pm = pm.lock().unwrap();
    assert_eq!(data_value(&pm, pid, 100), 5);
    let expected = [0, 1, 1, 2, 3];
    for (i, value) in expected.iter().enumerate() {
        assert_eq!(data_value(&pm, pid, 101 + i), *value, "cell {}", 101 + i);
    }
}

#[test]
fn p2_traps_reads_n_from_the_input_source() {
    let vm = Vm::with_io(4096, 16, 5, Box::new(MockIo::with_inputs([5]))).unwrap();
    let pid = vm.load_program("p2_traps", P2_TRAPS).unwrap();
    let pm = vm.process_manager();
    run_to_completion(vm);

    let pm = pm.lock().unwrap();
    assert_eq!(data_value(&pm, pid, 100), 5);
    let expected = [0, 1, 1, 2, 3];
    for (i, value) in expected.iter().enumerate() {
        assert_eq!(data_value(&pm, pid, 101 + i), *value, "cell {}", 101 + i);
    }
}

#[test]
fn p3_computes_factorial_of_a_positive_parameter() {
    let vm = Vm::with_io(4096, 16, 5, Box::new(MockIo::default())).unwrap();
    let pid = vm.load_program("p3", P3).unwrap();
    let pm = vm.process_manager();
    run_to_completion(vm);

    let pm = pm.lock().unwrap();
    assert_eq!(data_value(&pm, pid, 50), 120); // 5!
}

#[test]
fn p3_traps_reads_x_and_returns_minus_one_for_negative_input() {
    let vm = Vm::with_io(4096, 16, 5, Box::new(MockIo::with_inputs([-3]))).unwrap();
    let pid = vm.load_program("p3_traps", P3_TRAPS).unwrap();
    let pm = vm.process_manager();
    run_to_completion(vm);

    let pm = pm.lock().unwrap();
    assert_eq!(data_value(&pm, pid, 50), -1);
}

#[test]
fn five_trap_driven_factorials_share_one_input_stream_without_crosstalk() {
    let vm = Vm::with_io(4096, 16, 5, Box::new(MockIo::with_inputs([5, 4, 3, 2, 1]))).unwrap();
    let pids: Vec<_> = (0..5)
        .map(|_| vm.load_program("p3_traps", P3_TRAPS).unwrap())
        .collect();
    let pm = vm.process_manager();
    run_to_completion(vm);

    let pm = pm.lock().unwrap();
    let mut results: Vec<i64> = pids.iter().map(|&pid| data_value(&pm, pid, 50)).collect();
    results.sort();
    assert_eq!(results, vec![1, 2, 6, 24, 120]);
}

#[test]
fn p4_bubble_sorts_the_array_at_cells_300_to_349() {
    let vm = Vm::with_io(4096, 16, 5, Box::new(MockIo::default())).unwrap();
    let pid = vm.load_program("p4", P4).unwrap();
    let pm = vm.process_manager();
    run_to_completion(vm);

    let mut expected = BUBBLE_SORT_FIXTURE;
    expected.sort();

    let pm = pm.lock().unwrap();
    for (i, value) in expected.iter().enumerate() {
        assert_eq!(data_value(&pm, pid, 300 + i), *value, "cell {}", 300 + i);
    }
}

#[test]
fn multiple_processes_interleave_under_preemption_and_both_complete() {
    let vm = Vm::with_io(4096, 16, 5, Box::new(MockIo::default())).unwrap();
    let fib_pid = vm.load_program("fibonacci", FIBONACCI).unwrap();
    let p3_pid = vm.load_program("p3", P3).unwrap();
    let pm = vm.process_manager();
    run_to_completion(vm);

    let pm = pm.lock().unwrap();
    assert_eq!(data_value(&pm, fib_pid, 59), 34);
    assert_eq!(data_value(&pm, p3_pid, 50), 120);
}
