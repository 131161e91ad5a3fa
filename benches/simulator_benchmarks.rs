use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rvooo_rust::functional_simulator::instructions::{
    encode_add, encode_addi, encode_bne, encode_ecall,
};
use rvooo_rust::functional_simulator::memory::Memory;
use rvooo_rust::timing_simulator::config::{RenamerConfig, SimulatorConfig};
use rvooo_rust::timing_simulator::renamer::Renamer;
use rvooo_rust::TimingSimulator;

fn create_loop_program(iterations: i32) -> Vec<u32> {
    vec![
        encode_addi(5, 0, iterations),
        encode_addi(6, 0, 0),
        encode_add(6, 6, 5),
        encode_addi(5, 5, -1),
        encode_bne(5, 0, -8),
        encode_ecall(),
    ]
}

fn renamer_benchmark(c: &mut Criterion) {
    c.bench_function("renamer_rename_commit_cycle", |b| {
        b.iter(|| {
            let mut renamer = Renamer::new(&RenamerConfig::new(32, 128, 16));
            for i in 0..64u64 {
                let log_reg = 1 + (i % 31);
                let phy_reg = renamer.rename_rdst(black_box(log_reg));
                let al_idx = renamer.dispatch_inst(
                    true, log_reg, phy_reg, false, false, false, false, false, i * 4,
                );
                renamer.set_complete(al_idx);
                renamer.commit();
            }
            black_box(renamer.free_list_size())
        })
    });
}

fn checkpoint_benchmark(c: &mut Criterion) {
    c.bench_function("renamer_checkpoint_rollback", |b| {
        b.iter(|| {
            let mut renamer = Renamer::new(&RenamerConfig::new(32, 128, 16));
            let branch_id = renamer.checkpoint();
            let al_idx = renamer.dispatch_inst(
                false, 0, 0, false, false, true, false, false, 0,
            );
            for log_reg in 1..16u64 {
                let phy_reg = renamer.rename_rdst(log_reg);
                let _ = renamer.dispatch_inst(
                    true, log_reg, phy_reg, false, false, false, false, false, log_reg * 4,
                );
            }
            renamer.resolve(al_idx, branch_id, false);
            black_box(renamer.free_list_size())
        })
    });
}

fn timing_simulator_benchmark(c: &mut Criterion) {
    let program = create_loop_program(100);

    c.bench_function("timing_frontend_loop_100", |b| {
        b.iter(|| {
            let config = SimulatorConfig::new(65536).with_max_cycles(100_000);
            let mut memory = Memory::new(65536);
            memory.load_program(0, &program).expect("program fits");
            let mut simulator = TimingSimulator::with_memory(config, memory);
            simulator.run();
            black_box(simulator.retired())
        })
    });
}

criterion_group!(
    benches,
    renamer_benchmark,
    checkpoint_benchmark,
    timing_simulator_benchmark
);
criterion_main!(benches);
