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

// simulator.rs
//
// This file contains the top-level cycle loop. It owns the memory, MMU,
// reference (oracle) stream, payload buffer, renamer, branch predictor,
// trace cache, I-cache, and fetch unit, and advances them in the
// later-stages-first order: retire, execute/writeback, rename/dispatch,
// fetch. The execute model is deliberately simple (fixed per-class
// latencies): the subject of this simulator is the front end and the
// rename/recovery discipline, and the backend exists to drive them with
// realistic resolution and retirement traffic.

use log::{debug, info};
use serde::Serialize;

use crate::errors::SimulatorError;
use crate::functional_simulator::instructions::{Insn, Opcode};
use crate::functional_simulator::memory::{Memory, Mmu};
use crate::functional_simulator::simulator::{OracleBuffer, Simulator as FunctionalSimulator};
use crate::timing_simulator::branch_predictor::MultiBranchPredictor;
use crate::timing_simulator::config::SimulatorConfig;
use crate::timing_simulator::fetch::{DecodeSlot, FetchUnit};
use crate::timing_simulator::icache::InstructionCache;
use crate::timing_simulator::payload::PayloadBuffer;
use crate::timing_simulator::renamer::Renamer;
use crate::timing_simulator::trace_cache::TraceCache;

/// An instruction between dispatch and writeback.
#[derive(Debug, Clone, Copy)]
struct InFlight {
    al_index: usize,
    payload_index: usize,
    sequence: u64,
    branch_id: Option<u64>,
    dest_phy_reg: Option<u64>,
    complete_cycle: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SimulatorStats {
    pub cycles: u64,
    pub instructions_retired: u64,
    pub full_squashes: u64,
    pub branch_recoveries: u64,
}

impl SimulatorStats {
    pub fn ipc(&self) -> f64 {
        if self.cycles == 0 {
            0.0
        } else {
            self.instructions_retired as f64 / self.cycles as f64
        }
    }
}

pub struct Simulator {
    pub config: SimulatorConfig,
    pub memory: Memory,
    mmu: Mmu,
    pub oracle: OracleBuffer,
    pub payload: PayloadBuffer,
    pub renamer: Renamer,
    pub predictor: MultiBranchPredictor,
    pub trace_cache: TraceCache,
    pub icache: InstructionCache,
    pub fetch_unit: FetchUnit,
    decode: Vec<DecodeSlot>,
    inflight: Vec<InFlight>,
    /// Committed-instruction count; doubles as the oracle cursor.
    retired: usize,
    pub cycle: u64,
    halted: bool,
    pub stats: SimulatorStats,
}

impl Simulator {
    pub fn new(config: SimulatorConfig) -> Self {
        let memory = Memory::new(config.memory_size);
        Self::with_memory(config, memory)
    }

    /// Build a simulator around pre-loaded memory. The reference machine
    /// runs ahead of time over the same image to produce the oracle stream.
    pub fn with_memory(config: SimulatorConfig, memory: Memory) -> Self {
        // A trace embeds at most max_branches conditionals, and every one
        // consumed while streaming needs a future-buffer bit.
        assert!(
            config.trace_cache.max_branches <= config.predictor.num_multi_pred,
            "branches per trace must not exceed the multi-prediction width"
        );

        let mut reference = FunctionalSimulator::with_memory(memory.clone());
        let oracle = OracleBuffer::from_entries(reference.run_collect(config.max_oracle_steps));

        let mmu = Mmu::new(memory.clone());
        let fetch_unit = FetchUnit::new(config.fetch_width, config.predictor.num_multi_pred, 0);

        Self {
            memory,
            mmu,
            oracle,
            payload: PayloadBuffer::new(config.payload_buffer_size),
            renamer: Renamer::new(&config.renamer),
            predictor: MultiBranchPredictor::new(&config.predictor),
            trace_cache: TraceCache::new(config.trace_cache.clone()),
            icache: InstructionCache::new(config.icache.clone()),
            fetch_unit,
            decode: vec![DecodeSlot::default(); config.fetch_width],
            inflight: Vec::new(),
            retired: 0,
            cycle: 0,
            halted: false,
            stats: SimulatorStats::default(),
            config,
        }
    }

    pub fn load_program(&mut self, words: &[u32]) -> Result<(), SimulatorError> {
        self.memory.load_program(0, words)?;
        // Memory changed: rebuild the MMU view and the reference stream.
        let mut reference = FunctionalSimulator::with_memory(self.memory.clone());
        self.oracle =
            OracleBuffer::from_entries(reference.run_collect(self.config.max_oracle_steps));
        self.mmu = Mmu::new(self.memory.clone());
        Ok(())
    }

    pub fn halted(&self) -> bool {
        self.halted
    }

    pub fn retired(&self) -> usize {
        self.retired
    }

    /// Advance one cycle: retire, execute/writeback, rename/dispatch, fetch.
    /// Later-stage effects come first so a newly dispatched instruction
    /// never observes its own side effects within the cycle.
    pub fn step(&mut self) {
        self.cycle += 1;
        self.stats.cycles = self.cycle;

        self.retire();
        if self.halted {
            return;
        }
        self.execute();
        self.dispatch();
        self.fetch_unit.fetch(
            self.cycle,
            &mut self.decode,
            &mut self.payload,
            &mut self.predictor,
            &mut self.trace_cache,
            &mut self.icache,
            &self.mmu,
            &self.oracle,
            self.retired,
        );

        if self.config.stats_period != 0 && self.cycle % self.config.stats_period == 0 {
            self.log_stats();
        }
    }

    /// Run until the reference stream is exhausted or the cycle budget runs
    /// out.
    pub fn run(&mut self) {
        while !self.halted && self.cycle < self.config.max_cycles {
            self.step();
        }
        self.log_stats();
    }

    // ------------------------------------------------------------------
    // Retire.
    // ------------------------------------------------------------------

    fn retire(&mut self) {
        for _ in 0..self.config.fetch_width {
            let head = match self.renamer.precommit() {
                Some(head) => head,
                None => return,
            };

            if !head.complete {
                return;
            }

            if head.exception || head.load_violation || head.branch_mispred || head.value_mispred {
                // Deferred recovery: the offender reached the head of the
                // active list, so roll the whole machine back to the
                // committed state and restart fetch on the architectural
                // path.
                self.full_squash();
                return;
            }

            let payload = self.payload.pop_head();
            self.renamer.commit();
            if let Some(tag) = payload.pred_tag {
                self.predictor.verify_pred(tag, payload.next_pc, payload.fm);
            }
            self.retired += 1;
            self.stats.instructions_retired = self.retired as u64;

            if head.is_csr {
                // System instruction: in this subset it ends the run.
                self.halted = true;
                return;
            }
            if self.retired >= self.oracle.len() {
                self.halted = true;
                return;
            }
            if head.is_atomic {
                // The fetch unit has been injecting NOPs since this
                // instruction was fetched; flush them and resume on the
                // architectural path.
                self.full_squash();
                return;
            }
        }
    }

    fn full_squash(&mut self) {
        self.stats.full_squashes += 1;
        debug!("cycle {}: full squash, retired={}", self.cycle, self.retired);

        self.renamer.squash();
        self.predictor.flush();
        self.trace_cache.squash_unfinished_fill();
        self.payload.clear();
        self.inflight.clear();
        for slot in &mut self.decode {
            slot.valid = false;
        }
        self.fetch_unit.clear_fetch_flags();

        // Restart on the architectural path.
        match self.oracle.peek(self.retired) {
            Some(entry) => self.fetch_unit.redirect(entry.pc),
            None => self.halted = true,
        }
    }

    // ------------------------------------------------------------------
    // Execute / writeback.
    // ------------------------------------------------------------------

    fn execute(&mut self) {
        let mut due: Vec<InFlight> = self
            .inflight
            .iter()
            .copied()
            .filter(|f| f.complete_cycle <= self.cycle)
            .collect();
        if due.is_empty() {
            return;
        }
        self.inflight.retain(|f| f.complete_cycle > self.cycle);

        // Resolve in program order so an older misprediction squashes the
        // younger completions in this same pass.
        due.sort_by_key(|f| f.sequence);
        let mut squash_boundary: Option<u64> = None;

        for flight in due {
            if let Some(boundary) = squash_boundary {
                if flight.sequence > boundary {
                    continue;
                }
            }

            self.renamer.set_complete(flight.al_index);
            if let Some(phy_reg) = flight.dest_phy_reg {
                // Values are not modeled; completing writes back a zero so
                // the PRF/readiness path is still exercised.
                self.renamer.write(phy_reg, 0);
                self.renamer.set_ready(phy_reg);
            }

            let branch_id = match flight.branch_id {
                Some(branch_id) => branch_id,
                None => continue,
            };

            // Resolve against the reference stream. Wrong-path branches
            // have no architectural outcome; they resolve as predicted and
            // disappear when the older misprediction rewinds the window.
            let payload = self.payload.at(flight.payload_index).clone();
            let actual_next_pc = if payload.good_instruction {
                match self.oracle.peek(payload.db_index) {
                    Some(entry) => entry.next_pc,
                    None => payload.next_pc,
                }
            } else {
                payload.next_pc
            };

            if actual_next_pc == payload.next_pc {
                self.renamer.resolve(flight.al_index, branch_id, true);
            } else {
                self.recover_branch(&flight, actual_next_pc);
                squash_boundary = Some(flight.sequence);
            }
        }
    }

    fn recover_branch(&mut self, flight: &InFlight, actual_next_pc: u64) {
        self.stats.branch_recoveries += 1;
        debug!(
            "cycle {}: branch misprediction at AL {} -> 0x{:08X}",
            self.cycle, flight.al_index, actual_next_pc
        );

        let branch_id = flight.branch_id.expect("checkpointed branch");
        self.renamer.resolve(flight.al_index, branch_id, false);

        let pred_tag = self
            .payload
            .at(flight.payload_index)
            .pred_tag
            .expect("resolvable branch carries a prediction tag");
        self.predictor.fix_pred(pred_tag, actual_next_pc);

        // The corrected outcome is what retire will train with.
        self.payload.at_mut(flight.payload_index).next_pc = actual_next_pc;
        self.payload.drop_newer(flight.payload_index);

        // Everything younger than the branch leaves the machine.
        let sequence = flight.sequence;
        self.inflight.retain(|f| f.sequence <= sequence);
        for slot in &mut self.decode {
            slot.valid = false;
        }
        self.trace_cache.squash_unfinished_fill();
        self.fetch_unit.clear_fetch_flags();
        self.fetch_unit.redirect(actual_next_pc);
    }

    // ------------------------------------------------------------------
    // Rename / dispatch.
    // ------------------------------------------------------------------

    fn dispatch(&mut self) {
        if !self.decode[0].valid {
            return;
        }

        let bundle: Vec<usize> = self
            .decode
            .iter()
            .filter(|slot| slot.valid)
            .map(|slot| slot.payload_index)
            .collect();

        let mut bundle_dst = 0;
        let mut bundle_branch = 0;
        for &index in &bundle {
            let insn = self.payload.at(index).inst;
            if insn.writes_rd() {
                bundle_dst += 1;
            }
            if takes_checkpoint(insn) {
                bundle_branch += 1;
            }
        }

        // All structural-hazard checks happen before any mutation.
        if self.renamer.stall_reg(bundle_dst)
            || self.renamer.stall_branch(bundle_branch)
            || self.renamer.stall_dispatch(bundle.len())
        {
            return;
        }

        for &index in &bundle {
            let entry = self.payload.at(index).clone();
            let insn = entry.inst;

            // Source renaming; in a full backend the mappings feed the
            // issue machinery, here they exercise the RMT/AMT path.
            match insn.opcode() {
                Opcode::Op | Opcode::Branch | Opcode::Store | Opcode::Amo => {
                    let _ = self.renamer.rename_rsrc(insn.rs1());
                    let _ = self.renamer.rename_rsrc(insn.rs2());
                },
                Opcode::OpImm | Opcode::Load | Opcode::Jalr => {
                    let _ = self.renamer.rename_rsrc(insn.rs1());
                },
                _ => {},
            }

            let branch_mask = self.renamer.get_branch_mask();
            self.payload.at_mut(index).branch_mask = branch_mask;

            let branch_id = if takes_checkpoint(insn) {
                Some(self.renamer.checkpoint())
            } else {
                None
            };

            let dest_phy_reg = if insn.writes_rd() {
                let phy_reg = self.renamer.rename_rdst(insn.rd());
                self.renamer.clear_ready(phy_reg);
                Some(phy_reg)
            } else {
                None
            };

            let al_index = self.renamer.dispatch_inst(
                dest_phy_reg.is_some(),
                insn.rd(),
                dest_phy_reg.unwrap_or(0),
                insn.opcode() == Opcode::Load,
                insn.opcode() == Opcode::Store,
                takes_checkpoint(insn),
                insn.opcode() == Opcode::Amo,
                insn.opcode() == Opcode::System,
                entry.pc,
            );

            if entry.fetch_exception {
                self.renamer.set_exception(al_index);
            }

            let latency = match insn.opcode() {
                Opcode::Load => self.config.load_latency,
                _ => self.config.alu_latency,
            };
            self.inflight.push(InFlight {
                al_index,
                payload_index: index,
                sequence: entry.sequence,
                branch_id,
                dest_phy_reg,
                complete_cycle: self.cycle + latency,
            });
        }

        for slot in &mut self.decode {
            slot.valid = false;
        }
    }

    // ------------------------------------------------------------------
    // Reporting.
    // ------------------------------------------------------------------

    fn log_stats(&self) {
        let tc = &self.trace_cache.stats;
        let fetch = &self.fetch_unit.stats;
        info!(
            "cycle={} retired={} ipc={:.3} | TC hit={}/{}={:.1}% fill_succ={}/{}={:.1}% avg_len={:.2} | MBP samples={} acc[0]={:.1}%",
            self.cycle,
            self.retired,
            self.stats.ipc(),
            tc.hits,
            tc.accesses,
            tc.hit_rate() * 100.0,
            tc.fills_completed,
            tc.fills_started,
            tc.fill_success_rate() * 100.0,
            tc.avg_hit_trace_length,
            fetch.num_prediction_samples,
            fetch.accuracy(0) * 100.0,
        );
    }
}

/// Whether an instruction claims a GBM bit and a rename checkpoint: control
/// transfers whose outcome is uncertain at fetch. Direct unconditional jumps
/// never mispredict and take none.
fn takes_checkpoint(insn: Insn) -> bool {
    matches!(insn.opcode(), Opcode::Branch | Opcode::Jalr)
}
