// Copyright (c) 2024 Mudit Bhargava
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.
//

// main.rs
//
// This file contains the main entry point for the front-end simulator.
// It provides a command-line interface for running either the reference
// functional simulator or the cycle-level timing front end over a raw
// program image (little-endian 32-bit instruction words), or over a
// built-in loop-heavy demo program when no input is given.

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::fs;
use std::path::PathBuf;

use rvooo_rust::functional_simulator::instructions::{
    encode_add, encode_addi, encode_beq, encode_bne, encode_ecall, encode_jal,
};
use rvooo_rust::functional_simulator::memory::Memory;
use rvooo_rust::timing_simulator::config::{
    IcacheConfig, PredictorConfig, RenamerConfig, SimulatorConfig, TerminateHeuristic,
    TraceCacheConfig,
};
use rvooo_rust::{FunctionalSimulator, TimingSimulator};

#[derive(Parser)]
#[command(name = "rvooo_rust")]
#[command(about = "A cycle-level out-of-order front-end simulator with a trace cache")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the reference functional simulator and print the committed stream
    Oracle {
        /// Input raw program image (little-endian 32-bit words)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Memory size in bytes
        #[arg(short, long, default_value = "65536")]
        memory_size: usize,

        /// Maximum instructions to execute
        #[arg(long, default_value = "100000")]
        max_steps: usize,
    },
    /// Run the cycle-level timing front end
    Timing {
        /// Input raw program image (little-endian 32-bit words)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Memory size in bytes
        #[arg(short, long, default_value = "65536")]
        memory_size: usize,

        /// Maximum cycles to simulate
        #[arg(long, default_value = "1000000")]
        max_cycles: u64,

        /// Fetch width (instructions per cycle)
        #[arg(long, default_value = "4")]
        fetch_width: usize,

        /// Disable the trace cache
        #[arg(long)]
        no_trace_cache: bool,

        /// End traces at backward conditional branches
        #[arg(long)]
        backward_branch_heuristic: bool,

        /// Model a perfect (always hitting) instruction cache
        #[arg(long)]
        perfect_icache: bool,

        /// Cycle interval between statistics log lines (0 disables)
        #[arg(long, default_value = "0")]
        stats_period: u64,

        /// Write the end-of-run statistics report as JSON
        #[arg(long)]
        stats_json: Option<PathBuf>,
    },
}

/// A loop-heavy demo: an inner counted loop nested in an outer counted loop,
/// with enough straight-line filler for traces to form.
fn create_demo_program() -> Vec<u32> {
    vec![
        encode_addi(5, 0, 20),  // 0x00: x5 = outer trip count
        encode_addi(6, 0, 0),   // 0x04: x6 = accumulator
        // outer loop head
        encode_addi(7, 0, 8),   // 0x08: x7 = inner trip count
        // inner loop head
        encode_add(6, 6, 7),    // 0x0C: accumulate
        encode_addi(6, 6, 1),   // 0x10: filler
        encode_addi(7, 7, -1),  // 0x14: decrement inner counter
        encode_bne(7, 0, -12),  // 0x18: inner back-edge to 0x0C
        encode_addi(5, 5, -1),  // 0x1C: decrement outer counter
        encode_beq(5, 0, 8),    // 0x20: exit when outer count hits zero
        encode_jal(0, -28),     // 0x24: outer back-edge to 0x08
        encode_ecall(),         // 0x28: done
    ]
}

fn load_image(input: Option<&PathBuf>) -> Result<Vec<u32>, Box<dyn std::error::Error>> {
    match input {
        Some(path) => {
            let bytes = fs::read(path)?;
            if bytes.len() % 4 != 0 {
                return Err(format!(
                    "program image size {} is not a multiple of 4",
                    bytes.len()
                )
                .into());
            }
            Ok(bytes
                .chunks_exact(4)
                .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
                .collect())
        },
        None => {
            println!("No input given, using the built-in demo program");
            Ok(create_demo_program())
        },
    }
}

fn run_oracle(words: &[u32], memory_size: usize, max_steps: usize) {
    let mut memory = Memory::new(memory_size);
    if let Err(e) = memory.load_program(0, words) {
        eprintln!("Failed to load program: {}", e);
        return;
    }

    let mut simulator = FunctionalSimulator::with_memory(memory);
    let entries = simulator.run_collect(max_steps);

    println!("Committed {} instructions:", entries.len());
    for (i, entry) in entries.iter().take(64).enumerate() {
        println!(
            "  [{:4}] pc=0x{:08X} next=0x{:08X} insn=0x{:08X}",
            i, entry.pc, entry.next_pc, entry.insn_bits
        );
    }
    if entries.len() > 64 {
        println!("  ... ({} more)", entries.len() - 64);
    }
}

#[allow(clippy::too_many_arguments)]
fn run_timing(
    words: &[u32],
    memory_size: usize,
    max_cycles: u64,
    fetch_width: usize,
    no_trace_cache: bool,
    backward_branch_heuristic: bool,
    perfect_icache: bool,
    stats_period: u64,
    stats_json: Option<&PathBuf>,
) {
    let heuristic = if backward_branch_heuristic {
        TerminateHeuristic::BackwardBranch
    } else {
        TerminateHeuristic::None
    };
    let trace_cache_config = TraceCacheConfig::new(3, 16, 64, 4)
        .with_enabled(!no_trace_cache)
        .with_terminate_heuristic(heuristic);
    let icache_config = if perfect_icache {
        IcacheConfig::perfect()
    } else {
        IcacheConfig::new(64, 4, 6)
    };

    let config = SimulatorConfig::new(memory_size)
        .with_fetch_width(fetch_width)
        .with_max_cycles(max_cycles)
        .with_stats_period(stats_period)
        .with_renamer(RenamerConfig::new(32, 128, 16))
        .with_predictor(PredictorConfig::new())
        .with_trace_cache(trace_cache_config)
        .with_icache(icache_config);

    let mut memory = Memory::new(memory_size);
    if let Err(e) = memory.load_program(0, words) {
        eprintln!("Failed to load program: {}", e);
        return;
    }

    let mut simulator = TimingSimulator::with_memory(config, memory);
    println!(
        "Reference stream: {} instructions. Running timing simulation...",
        simulator.oracle.len()
    );
    simulator.run();

    print_summary(&simulator);

    if let Some(path) = stats_json {
        match write_stats_json(&simulator, path) {
            Ok(()) => println!("Statistics written to {}", path.display()),
            Err(e) => eprintln!("Failed to write statistics: {}", e),
        }
    }
}

fn print_summary(simulator: &TimingSimulator) {
    let stats = &simulator.stats;
    let tc = &simulator.trace_cache.stats;
    let fetch = &simulator.fetch_unit.stats;
    let bp = &simulator.predictor.stats;

    println!();
    println!("{}", "Simulation Summary".bold());
    println!(
        "  Cycles: {}, Retired: {}, IPC: {}",
        stats.cycles,
        stats.instructions_retired,
        format!("{:.3}", stats.ipc()).green()
    );
    println!(
        "  Recoveries: {} branch, {} full squash",
        stats.branch_recoveries, stats.full_squashes
    );
    println!(
        "  Trace cache: {}/{} hits ({}), fill success {}/{}, mean hit length {:.2}",
        tc.hits,
        tc.accesses,
        format!("{:.1}%", tc.hit_rate() * 100.0).cyan(),
        tc.fills_completed,
        tc.fills_started,
        tc.avg_hit_trace_length
    );
    println!(
        "  Predictor: {} predictions, {} conditional, {} mispredicted",
        bp.num_pred, bp.num_cond_pred, bp.num_cond_miss
    );
    print!("  Multi-prediction accuracy by bit:");
    for bit in 0..fetch.bit_correct.len() {
        print!(" [{}]={:.1}%", bit, fetch.accuracy(bit) * 100.0);
    }
    println!();
}

fn write_stats_json(
    simulator: &TimingSimulator,
    path: &PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    let report = serde_json::json!({
        "config": simulator.config,
        "pipeline": simulator.stats,
        "trace_cache": simulator.trace_cache.stats,
        "icache": simulator.icache.stats,
        "predictor": simulator.predictor.stats,
        "fetch": simulator.fetch_unit.stats,
    });
    fs::write(path, serde_json::to_string_pretty(&report)?)?;
    Ok(())
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Oracle {
            input,
            memory_size,
            max_steps,
        } => match load_image(input.as_ref()) {
            Ok(words) => run_oracle(&words, memory_size, max_steps),
            Err(e) => eprintln!("Failed to load program: {}", e),
        },
        Commands::Timing {
            input,
            memory_size,
            max_cycles,
            fetch_width,
            no_trace_cache,
            backward_branch_heuristic,
            perfect_icache,
            stats_period,
            stats_json,
        } => match load_image(input.as_ref()) {
            Ok(words) => run_timing(
                &words,
                memory_size,
                max_cycles,
                fetch_width,
                no_trace_cache,
                backward_branch_heuristic,
                perfect_icache,
                stats_period,
                stats_json.as_ref(),
            ),
            Err(e) => eprintln!("Failed to load program: {}", e),
        },
    }
}
