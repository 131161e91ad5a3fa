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

// trace_cache.rs
//
// This file contains the trace cache: a set-associative cache keyed by
// (start PC, predicted branch direction vector) whose entries describe
// sequences of instructions spanning up to M branches and N instructions.
// Traces are built incrementally by feeding each fetched instruction into the
// pending fill slots, and replayed through the MMU by the trace iterator.

use serde::Serialize;

use crate::functional_simulator::instructions::{increment_pc, Insn, Opcode, UNKNOWN_PC_ADDR};
use crate::functional_simulator::memory::Mmu;
use crate::timing_simulator::config::{TerminateHeuristic, TraceCacheConfig};
use crate::timing_simulator::payload::PayloadEntry;

/// Successor address of one instruction under a branch-direction assumption.
/// Indirect jumps have no statically known successor.
pub fn calc_insn_next_addr(pc: u64, insn: Insn, br_dir_assumption: bool) -> u64 {
    match insn.opcode() {
        Opcode::Jalr => UNKNOWN_PC_ADDR,
        Opcode::Jal => pc.wrapping_add(insn.uj_imm() as u64),
        Opcode::Branch => {
            if br_dir_assumption {
                pc.wrapping_add(insn.sb_imm() as u64)
            } else {
                increment_pc(pc)
            }
        },
        _ => increment_pc(pc),
    }
}

#[derive(Debug, Clone, Default)]
pub struct TraceEntry {
    pub start_pc: u64,
    pub num_insn: usize,
    pub num_br: usize,
    /// Bit i is the direction of the i-th branch embedded in the trace.
    pub br_direction_vec: u32,
    pub fall_thru_addr: u64,
    pub target_addr: u64,
    pub end_with_br: bool,
    pub valid: bool,
    pub filling: bool,
    lru_cnt: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TraceCacheStats {
    pub accesses: u64,
    pub hits: u64,
    pub fills_started: u64,
    pub fills_completed: u64,
    pub avg_hit_trace_length: f64,
}

impl TraceCacheStats {
    pub fn hit_rate(&self) -> f64 {
        if self.accesses == 0 {
            0.0
        } else {
            self.hits as f64 / self.accesses as f64
        }
    }

    pub fn fill_success_rate(&self) -> f64 {
        if self.fills_started == 0 {
            0.0
        } else {
            self.fills_completed as f64 / self.fills_started as f64
        }
    }
}

pub struct TraceCache {
    config: TraceCacheConfig,
    /// `storage[set][way]`. Pending fills reference slots by (set, way)
    /// index so entry storage stays relocatable.
    storage: Vec<Vec<TraceEntry>>,
    pending_fill: Vec<(usize, usize)>,
    pub stats: TraceCacheStats,
}

impl TraceCache {
    pub fn new(config: TraceCacheConfig) -> Self {
        let num_sets = config.num_sets();
        let mut storage = Vec::with_capacity(num_sets);
        for _ in 0..num_sets {
            let mut set = Vec::with_capacity(config.associativity);
            for way in 0..config.associativity {
                set.push(TraceEntry {
                    lru_cnt: way,
                    ..TraceEntry::default()
                });
            }
            storage.push(set);
        }
        Self {
            config,
            storage,
            pending_fill: Vec::new(),
            stats: TraceCacheStats::default(),
        }
    }

    fn calc_index(&self, pc: u64, pred_vec: u32) -> usize {
        let sets = self.config.num_sets() as u64;
        if self.config.index_with_pred_bits {
            ((pc ^ pred_vec as u64) % sets) as usize
        } else {
            (pc % sets) as usize
        }
    }

    /// A stored trace matches a lookup iff the start PC agrees and the
    /// predicted direction vector agrees on the meaningful bits: the low
    /// `num_br` bits, minus the last one when the trace ends with a branch
    /// (that branch's direction only decides the next PC after the trace).
    pub fn match_br_direction(
        pred_vec: u32,
        actual_dir: u32,
        num_br: usize,
        end_with_br: bool,
    ) -> bool {
        let mut mask = 0u32;
        for _ in 0..num_br {
            mask = (mask << 1) | 1;
        }
        if end_with_br && num_br > 0 {
            mask &= !(1 << (num_br - 1));
        }
        (pred_vec & mask) == (actual_dir & mask)
    }

    fn search_trace(&self, pc: u64, pred_vec: u32) -> Option<usize> {
        let set = &self.storage[self.calc_index(pc, pred_vec)];
        set.iter().position(|way| {
            way.valid
                && pc == way.start_pc
                && Self::match_br_direction(
                    pred_vec,
                    way.br_direction_vec,
                    way.num_br,
                    way.end_with_br,
                )
        })
    }

    /// Look up (pc, pred_vec). A hit returns a snapshot of the entry and
    /// refreshes LRU. A miss prepares a fill on the LRU way when fill
    /// capacity allows, and returns None either way.
    pub fn access(&mut self, pc: u64, pred_vec: u32) -> Option<TraceEntry> {
        if !self.config.enabled {
            return None;
        }
        self.stats.accesses += 1;

        let set_idx = self.calc_index(pc, pred_vec);
        let hit_way = self.search_trace(pc, pred_vec);

        match hit_way {
            Some(way_idx) => {
                self.stats.hits += 1;

                // LRU shuffle: the hit way becomes most recent, ways that
                // were more recent than it age by one.
                let hit_cnt = self.storage[set_idx][way_idx].lru_cnt;
                for way in self.storage[set_idx].iter_mut() {
                    if way.lru_cnt < hit_cnt {
                        way.lru_cnt += 1;
                    }
                }
                self.storage[set_idx][way_idx].lru_cnt = 0;

                let entry = self.storage[set_idx][way_idx].clone();
                let n = self.stats.accesses as f64;
                self.stats.avg_hit_trace_length =
                    (self.stats.avg_hit_trace_length * (n - 1.0) + entry.num_insn as f64) / n;

                Some(entry)
            },
            None => {
                // With blocking fill, one outstanding fill shuts out new
                // ones; with non-blocking fill, the concurrency cap does.
                if !self.config.non_blocking_fill && !self.pending_fill.is_empty() {
                    return None;
                }
                if self.pending_fill.len() >= self.config.max_ongoing_fill {
                    return None;
                }

                let replace_way = self.storage[set_idx]
                    .iter()
                    .position(|way| way.lru_cnt == self.config.associativity - 1)
                    .expect("LRU counters form a permutation");

                if !self.storage[set_idx][replace_way].filling {
                    self.stats.fills_started += 1;
                    {
                        let slot = &mut self.storage[set_idx][replace_way];
                        slot.start_pc = pc;
                        slot.br_direction_vec = 0;
                        slot.valid = false;
                        slot.filling = true;
                        slot.num_insn = 0;
                        slot.num_br = 0;
                    }

                    for (i, way) in self.storage[set_idx].iter_mut().enumerate() {
                        if i == replace_way {
                            way.lru_cnt = 0;
                        } else {
                            way.lru_cnt += 1;
                        }
                    }

                    self.pending_fill.push((set_idx, replace_way));
                }

                None
            },
        }
    }

    /// Append one fetched instruction to every pending fill. Called once per
    /// instruction from the fetch loop.
    pub fn feed(&mut self, payload: &PayloadEntry) {
        if self.pending_fill.is_empty() {
            return;
        }

        let insn = payload.inst;
        let term_cond = self.test_terminate_cond(insn);
        let mut completed = 0u64;

        for &(set_idx, way_idx) in &self.pending_fill {
            let max_branches = self.config.max_branches;
            let max_insns = self.config.max_insns;
            let slot = &mut self.storage[set_idx][way_idx];
            if !slot.filling {
                continue;
            }

            if insn.opcode() == Opcode::Branch {
                if slot.num_br == max_branches {
                    // No room for another embedded branch: the trace ends
                    // just before this instruction.
                    slot.valid = true;
                    slot.filling = false;
                    completed += 1;
                    continue;
                }
                if payload.next_pc != increment_pc(payload.pc) {
                    slot.br_direction_vec |= 1 << slot.num_br;
                }
                slot.fall_thru_addr = increment_pc(payload.pc);
                slot.target_addr = payload.pc.wrapping_add(insn.sb_imm() as u64);
                slot.num_insn += 1;
                slot.num_br += 1;
                slot.end_with_br = true;
            } else if insn.opcode() == Opcode::Jal {
                // A direct jump ends the trace with a statically known
                // target.
                slot.fall_thru_addr = increment_pc(payload.pc);
                slot.target_addr = payload.pc.wrapping_add(insn.uj_imm() as u64);
                slot.num_insn += 1;
                slot.end_with_br = false;
            } else {
                slot.fall_thru_addr = increment_pc(payload.pc);
                slot.num_insn += 1;
                slot.end_with_br = false;
            }

            if term_cond || slot.num_insn == max_insns {
                slot.valid = true;
                slot.filling = false;
                completed += 1;
            }
        }

        self.stats.fills_completed += completed;

        // Sweep finished records.
        let storage = &self.storage;
        self.pending_fill
            .retain(|&(set_idx, way_idx)| storage[set_idx][way_idx].filling);
    }

    fn test_terminate_cond(&self, insn: Insn) -> bool {
        match insn.opcode() {
            // Jumps, atomics, and system operations always end a trace.
            Opcode::Jal | Opcode::Jalr | Opcode::Amo | Opcode::System => true,
            Opcode::Branch => match self.config.terminate_heuristic {
                TerminateHeuristic::None => false,
                TerminateHeuristic::BackwardBranch => insn.sb_imm() < 0,
            },
            _ => false,
        }
    }

    /// Abort every in-progress fill, leaving the slots invalid.
    pub fn squash_unfinished_fill(&mut self) {
        for &(set_idx, way_idx) in &self.pending_fill {
            let slot = &mut self.storage[set_idx][way_idx];
            slot.valid = false;
            slot.filling = false;
        }
        self.pending_fill.clear();
    }

    /// Invalidate the whole cache and reset LRU state.
    pub fn flush(&mut self) {
        for set in &mut self.storage {
            for (way_idx, way) in set.iter_mut().enumerate() {
                *way = TraceEntry {
                    lru_cnt: way_idx,
                    ..TraceEntry::default()
                };
            }
        }
        self.squash_unfinished_fill();
    }

    pub fn pending_fill_count(&self) -> usize {
        self.pending_fill.len()
    }
}

/// Streams the instructions of a hit trace by re-fetching them through the
/// MMU, steering each embedded conditional branch by the stored direction
/// vector.
pub struct TraceIterator<'a> {
    entry: &'a TraceEntry,
    mmu: &'a Mmu,
    next_br_idx: usize,
    next_insn_idx: usize,
    next_pc: u64,
}

impl<'a> TraceIterator<'a> {
    pub fn new(entry: &'a TraceEntry, mmu: &'a Mmu) -> Self {
        assert!(entry.valid, "iterating an invalid trace");
        assert!(entry.num_insn > 0);
        Self {
            entry,
            mmu,
            next_br_idx: 0,
            next_insn_idx: 0,
            next_pc: entry.start_pc,
        }
    }

    /// Fetch the next instruction of the trace, or None at the end. With
    /// `do_term_check`, instructions that must only appear at the end of a
    /// trace are asserted not to appear mid-trace.
    pub fn next(&mut self, do_term_check: bool) -> Option<Insn> {
        if self.next_insn_idx >= self.entry.num_insn {
            return None;
        }
        assert_ne!(self.next_pc, UNKNOWN_PC_ADDR);

        let pc = self.next_pc;
        let insn = self
            .mmu
            .load_insn(pc)
            .expect("trace cache re-fetch must not fault");
        let assumption = self.entry.br_direction_vec & (1 << self.next_br_idx) != 0;
        self.next_pc = calc_insn_next_addr(pc, insn, assumption);

        if do_term_check && self.next_insn_idx < self.entry.num_insn - 1 {
            assert_ne!(insn.opcode(), Opcode::Jalr);
            assert_ne!(insn.opcode(), Opcode::Amo);
            assert_ne!(insn.opcode(), Opcode::System);
        }

        self.next_insn_idx += 1;
        if insn.opcode() == Opcode::Branch {
            self.next_br_idx += 1;
        }

        Some(insn)
    }

    /// PC of the next instruction the iterator will deliver, or the
    /// trace-terminal next PC once exhausted (`UNKNOWN_PC_ADDR` when the
    /// trace ends at an indirect jump).
    pub fn next_pc(&self) -> u64 {
        self.next_pc
    }

    pub fn end(&self) -> bool {
        self.next_insn_idx >= self.entry.num_insn
    }

    pub fn rewind(&mut self) {
        self.next_br_idx = 0;
        self.next_insn_idx = 0;
        self.next_pc = self.entry.start_pc;
    }
}
