// tests/integration_tests.rs
use rvooo_rust::functional_simulator::instructions::{
    encode_add, encode_addi, encode_beq, encode_bne, encode_ecall, encode_jal,
};
use rvooo_rust::functional_simulator::memory::Memory;
use rvooo_rust::timing_simulator::config::{
    IcacheConfig, PredictorConfig, RenamerConfig, SimulatorConfig, TraceCacheConfig,
};
use rvooo_rust::{FunctionalSimulator, TimingSimulator};

/// End-to-end tests driving the whole front end over real programs

/// Helper function: a counted loop that runs `iterations` times and then
/// falls through to an ecall.
///
///   0x00 addi x5, x0, iterations
///   0x04 addi x6, x0, 0
///   0x08 add  x6, x6, x5      <- loop head
///   0x0C addi x5, x5, -1
///   0x10 bne  x5, x0, -8
///   0x14 ecall
fn counted_loop(iterations: i32) -> Vec<u32> {
    vec![
        encode_addi(5, 0, iterations),
        encode_addi(6, 0, 0),
        encode_add(6, 6, 5),
        encode_addi(5, 5, -1),
        encode_bne(5, 0, -8),
        encode_ecall(),
    ]
}

fn build_simulator(words: &[u32], config: SimulatorConfig) -> TimingSimulator {
    let mut memory = Memory::new(config.memory_size);
    memory
        .load_program(0, words)
        .expect("program fits in memory");
    TimingSimulator::with_memory(config, memory)
}

fn default_config() -> SimulatorConfig {
    SimulatorConfig::new(65536)
        .with_fetch_width(4)
        .with_max_cycles(200_000)
        .with_renamer(RenamerConfig::new(32, 128, 16))
        .with_predictor(PredictorConfig::new())
        .with_trace_cache(TraceCacheConfig::new(3, 16, 64, 4))
        .with_icache(IcacheConfig::new(64, 4, 6))
}

#[test]
fn test_oracle_runs_counted_loop() {
    let mut memory = Memory::new(4096);
    memory.load_program(0, &counted_loop(10)).unwrap();
    let mut oracle = FunctionalSimulator::with_memory(memory);
    let entries = oracle.run_collect(10_000);

    // 2 setup + 10 * 3 loop body + ecall.
    assert_eq!(entries.len(), 2 + 10 * 3 + 1);
    assert_eq!(entries[0].pc, 0);
    assert_eq!(entries.last().unwrap().pc, 0x14);
    // x6 accumulated 10 + 9 + ... + 1.
    assert_eq!(oracle.registers.read(6), 55);

    // The back edge is taken on all but the final iteration.
    let taken_back_edges = entries
        .iter()
        .filter(|e| e.pc == 0x10 && e.next_pc == 0x08)
        .count();
    assert_eq!(taken_back_edges, 9);
}

#[test]
fn test_timing_simulator_retires_reference_stream() {
    let mut simulator = build_simulator(&counted_loop(50), default_config());
    let expected = simulator.oracle.len();
    simulator.run();

    assert!(simulator.halted(), "run must end by halting, not by timeout");
    assert_eq!(
        simulator.retired(),
        expected,
        "every reference instruction retires exactly once"
    );
    assert!(simulator.stats.cycles > 0);
    assert!(simulator.stats.ipc() > 0.0);
}

#[test]
fn test_trace_cache_warms_up_on_loop() {
    let mut simulator = build_simulator(&counted_loop(200), default_config());
    simulator.run();

    assert!(simulator.halted());
    let tc = &simulator.trace_cache.stats;
    assert!(tc.accesses > 0);
    assert!(
        tc.fills_completed > 0,
        "the loop body must complete at least one trace fill"
    );
    assert!(
        tc.hits > 0,
        "a hot loop must eventually hit in the trace cache"
    );
}

#[test]
fn test_predictor_learns_loop_branch() {
    let mut simulator = build_simulator(&counted_loop(200), default_config());
    simulator.run();

    let bp = &simulator.predictor.stats;
    assert!(bp.num_cond_pred > 0);
    // A 200-iteration loop branch is highly predictable once trained: far
    // fewer mispredictions than predictions.
    assert!(
        bp.num_cond_miss * 4 < bp.num_cond_pred,
        "mispredictions ({}) should be rare against {} predictions",
        bp.num_cond_miss,
        bp.num_cond_pred
    );

    let fetch = &simulator.fetch_unit.stats;
    assert!(fetch.num_prediction_samples > 0);
}

#[test]
fn test_timing_matches_oracle_without_trace_cache() {
    // The front end must retire the same stream with the trace cache off.
    let config = default_config().with_trace_cache(
        TraceCacheConfig::new(3, 16, 64, 4).with_enabled(false),
    );
    let mut simulator = build_simulator(&counted_loop(50), config);
    let expected = simulator.oracle.len();
    simulator.run();

    assert!(simulator.halted());
    assert_eq!(simulator.retired(), expected);
    assert_eq!(simulator.trace_cache.stats.accesses, 0);
}

#[test]
fn test_nested_loops_with_jumps() {
    // Outer loop closed by a JAL, inner by a conditional: exercises direct
    // jumps, multi-prediction, and recovery together.
    let program = vec![
        encode_addi(5, 0, 10),  // 0x00 outer count
        encode_addi(6, 0, 0),   // 0x04 accumulator
        encode_addi(7, 0, 4),   // 0x08 inner count  <- outer head
        encode_add(6, 6, 7),    // 0x0C               <- inner head
        encode_addi(7, 7, -1),  // 0x10
        encode_bne(7, 0, -8),   // 0x14 inner back edge
        encode_addi(5, 5, -1),  // 0x18
        encode_beq(5, 0, 8),    // 0x1C exit
        encode_jal(0, -24),     // 0x20 outer back edge
        encode_ecall(),         // 0x24
    ];
    let mut simulator = build_simulator(&program, default_config());
    let expected = simulator.oracle.len();
    simulator.run();

    assert!(simulator.halted());
    assert_eq!(simulator.retired(), expected);
    // The cold inner back edge is taken but predicted not-taken, so at
    // least one immediate branch recovery must have happened.
    assert!(simulator.stats.branch_recoveries > 0);
}

#[test]
fn test_prediction_exhaustion_splits_bundle() {
    // Four back-to-back conditionals against k = 3 prediction bits: the
    // fourth branch of the first bundle gets no bit, its push is undone,
    // and it is refetched next cycle with a fresh future buffer. The
    // stream must still retire exactly once per reference instruction.
    // bne x1, x2 with both registers zero is never taken, so the
    // architectural path is the straight line through all four branches.
    let program = vec![
        encode_bne(1, 2, 0x40),
        encode_bne(1, 2, 0x40),
        encode_bne(1, 2, 0x40),
        encode_bne(1, 2, 0x40),
        encode_ecall(),
    ];

    let mut simulator = build_simulator(&program, default_config());
    let expected = simulator.oracle.len();
    assert_eq!(expected, 5);
    simulator.run();

    assert!(simulator.halted());
    assert_eq!(simulator.retired(), expected);
}

#[test]
fn test_perfect_icache_configuration() {
    let config = default_config().with_icache(IcacheConfig::perfect());
    let mut simulator = build_simulator(&counted_loop(30), config);
    let expected = simulator.oracle.len();
    simulator.run();

    assert!(simulator.halted());
    assert_eq!(simulator.retired(), expected);
    assert_eq!(simulator.icache.stats.accesses, 0);
}

#[test]
fn test_program_too_large_is_rejected() {
    let mut memory = Memory::new(16);
    let program = counted_loop(5);
    assert!(memory.load_program(0, &program).is_err());
}
