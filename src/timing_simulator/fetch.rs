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

// fetch.rs
//
// This file contains the fetch coupler: the per-cycle loop that asks the
// predictor for a multi-branch prediction vector, probes the trace cache
// with it, streams either the hit trace or a line-by-line instruction
// sequence through the MMU, feeds pending trace fills, and latches the
// composed bundle into the decode stage. It also samples multi-prediction
// accuracy against the reference stream.

use serde::Serialize;

use crate::functional_simulator::instructions::{increment_pc, Insn, Opcode, UNKNOWN_PC_ADDR};
use crate::functional_simulator::memory::Mmu;
use crate::functional_simulator::simulator::OracleBuffer;
use crate::timing_simulator::branch_predictor::MultiBranchPredictor;
use crate::timing_simulator::icache::InstructionCache;
use crate::timing_simulator::payload::PayloadBuffer;
use crate::timing_simulator::trace_cache::{TraceCache, TraceIterator};

/// One fetch-to-decode latch slot.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecodeSlot {
    pub valid: bool,
    pub payload_index: usize,
}

/// Multi-prediction accuracy bins. Bit position i counts samples whose
/// vector matched the perfect vector on all bits up to and including i;
/// counting for a sample stops at its first mismatching bit.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FetchStats {
    pub bundles_fetched: u64,
    pub insns_fetched: u64,
    pub trace_bundles: u64,
    pub num_prediction_samples: u64,
    pub bit_correct: Vec<u64>,
}

impl FetchStats {
    pub fn accuracy(&self, bit: usize) -> f64 {
        if self.num_prediction_samples == 0 {
            0.0
        } else {
            self.bit_correct[bit] as f64 / self.num_prediction_samples as f64
        }
    }
}

pub struct FetchUnit {
    fetch_width: usize,
    num_multi_pred: usize,
    pub pc: u64,
    sequence: u64,
    next_fetch_cycle: u64,
    fetch_exception: bool,
    fetch_amo: bool,
    fetch_csr: bool,
    pub stats: FetchStats,
}

impl FetchUnit {
    pub fn new(fetch_width: usize, num_multi_pred: usize, start_pc: u64) -> Self {
        Self {
            fetch_width,
            num_multi_pred,
            pc: start_pc,
            sequence: 0,
            next_fetch_cycle: 0,
            fetch_exception: false,
            fetch_amo: false,
            fetch_csr: false,
            stats: FetchStats {
                bit_correct: vec![0; num_multi_pred],
                ..FetchStats::default()
            },
        }
    }

    /// Steer fetch to a new PC (branch recovery or squash restart).
    pub fn redirect(&mut self, pc: u64) {
        self.pc = pc;
    }

    /// Clear the fetch-level stall conditions once the offending
    /// instruction has been handled at retire.
    pub fn clear_fetch_flags(&mut self) {
        self.fetch_exception = false;
        self.fetch_amo = false;
        self.fetch_csr = false;
    }

    pub fn has_fetch_flag(&self) -> bool {
        self.fetch_exception || self.fetch_amo || self.fetch_csr
    }

    /// Run one fetch cycle.
    #[allow(clippy::too_many_arguments)]
    pub fn fetch(
        &mut self,
        cycle: u64,
        decode: &mut [DecodeSlot],
        payload: &mut PayloadBuffer,
        predictor: &mut MultiBranchPredictor,
        trace_cache: &mut TraceCache,
        icache: &mut InstructionCache,
        mmu: &Mmu,
        oracle: &OracleBuffer,
        retired_count: usize,
    ) {
        // Stall while the decode latch is occupied or an I$ miss is
        // outstanding.
        if decode[0].valid || cycle < self.next_fetch_cycle {
            return;
        }

        let real_vec = predictor.prepare_multi_pred_future_buf(self.pc);

        let trace = trace_cache.access(self.pc, real_vec);
        let trace_end_with_br = trace.as_ref().map(|t| t.end_with_br).unwrap_or(false);
        let mut trace_it = trace.as_ref().map(|entry| TraceIterator::new(entry, mmu));
        if trace_it.is_some() {
            self.stats.trace_bundles += 1;
        }

        // Model I$ misses only when the bundle does not stream from a trace.
        if !icache.perfect() && trace_it.is_none() {
            let line_size = icache.line_size_log2();
            let line1 = self.pc >> line_size;
            let (hit1, resolve1) = icache.access(cycle, line1 << line_size);
            let (hit2, resolve2) = if icache.interleaved() {
                icache.access(cycle, (line1 + 1) << line_size)
            } else {
                (true, cycle)
            };
            if !hit1 || !hit2 {
                self.next_fetch_cycle = std::cmp::max(
                    if hit1 { 0 } else { resolve1 },
                    if hit2 { 0 } else { resolve2 },
                );
                assert!(self.next_fetch_cycle > cycle);
                return;
            }
        }

        let mut i = 0;
        let mut stop = false;
        let mut has_branch_in_bundle = false;
        let mut first_db_idx: Option<usize> = None;

        while i < self.fetch_width && !stop {
            if let Some(ref iter) = trace_it {
                if iter.end() {
                    break;
                }
            }

            // Fetch the instruction, or inject a NOP while a prior
            // fetch-level event (exception, atomic, system op) is
            // outstanding. A literal stall could deadlock rename, which
            // needs full bundles to progress.
            let mut trap_cause = 0u64;
            let insn = if self.has_fetch_flag() {
                trace_it = None;
                trace_cache.squash_unfinished_fill();
                Insn::nop()
            } else {
                match mmu.load_insn(self.pc) {
                    Ok(insn) => {
                        if let Some(iter) = trace_it.as_mut() {
                            let trace_pc = iter.next_pc();
                            let trace_insn =
                                iter.next(true).expect("trace exhausted mid-bundle");
                            assert_eq!(trace_pc, self.pc, "trace stream diverged from fetch");
                            assert_eq!(
                                trace_insn.bits(),
                                insn.bits(),
                                "trace stream delivered a different instruction"
                            );
                        }
                        insn
                    },
                    Err(trap) => {
                        self.fetch_exception = true;
                        trap_cause = trap.cause();
                        trace_it = None;
                        trace_cache.squash_unfinished_fill();
                        Insn::nop()
                    },
                }
            };

            match insn.opcode() {
                Opcode::Amo => self.fetch_amo = true,
                Opcode::System => self.fetch_csr = true,
                _ => {},
            }

            let index = payload.push();
            {
                let entry = payload.at_mut(index);
                entry.inst = insn;
                entry.pc = self.pc;
                entry.sequence = self.sequence;
                entry.fetch_exception = self.fetch_exception;
                entry.fetch_exception_cause = trap_cause;
                entry.pred_tag = None;
                entry.fm = false;
            }
            let db_index = retired_count + payload.size() - 1;
            payload.map_to_actual(index, db_index, oracle);
            if first_db_idx.is_none() && payload.at(index).good_instruction {
                first_db_idx = Some(db_index);
            }

            // Next-PC selection.
            let mut pred_valid = true;
            let mut pred_tag = None;
            let mut pred_fm = false;
            let next_pc = match insn.opcode() {
                Opcode::Jal => {
                    let direct_target = self.pc.wrapping_add(insn.uj_imm() as u64);
                    let pred = predictor.get_pred(self.pc, insn, direct_target);
                    pred_tag = Some(pred.tag);
                    pred_fm = pred.fm;
                    if let Some(ref iter) = trace_it {
                        assert_eq!(pred.next_pc, iter.next_pc());
                        stop = iter.end();
                    } else {
                        stop = true;
                    }
                    assert_eq!(pred.next_pc, direct_target);
                    pred.next_pc
                },
                Opcode::Jalr => {
                    let pred = predictor.get_pred(self.pc, insn, 0);
                    pred_tag = Some(pred.tag);
                    pred_fm = pred.fm;
                    if let Some(ref iter) = trace_it {
                        assert_eq!(iter.next_pc(), UNKNOWN_PC_ADDR);
                    }
                    stop = true;
                    pred.next_pc
                },
                Opcode::Branch => {
                    let direct_target = self.pc.wrapping_add(insn.sb_imm() as u64);
                    has_branch_in_bundle = true;
                    let pred = predictor.get_multi_pred_for_branch(self.pc, insn, direct_target);

                    assert!(
                        pred.next_pc == self.pc
                            || pred.next_pc == direct_target
                            || pred.next_pc == increment_pc(self.pc)
                    );
                    assert_eq!(pred.next_pc == self.pc, !pred.valid);

                    if let Some(ref iter) = trace_it {
                        // A trace hit implies its direction bits came from
                        // the same future buffer, so a bit must be there.
                        assert!(pred.valid, "trace hit without a prediction bit");
                        if trace_end_with_br {
                            assert!(
                                iter.next_pc() == increment_pc(self.pc)
                                    || iter.next_pc() == direct_target
                            );
                        } else {
                            assert_eq!(pred.next_pc, iter.next_pc());
                        }
                        stop = iter.end();
                    } else if !pred.valid || pred.next_pc != increment_pc(self.pc) {
                        stop = true;
                    }

                    pred_valid = pred.valid;
                    if pred.valid {
                        pred_tag = Some(pred.tag);
                        pred_fm = pred.fm;
                        predictor.multi_pred_notify_branch();
                    }
                    pred.next_pc
                },
                _ => {
                    let next_pc = increment_pc(self.pc);
                    if let Some(ref iter) = trace_it {
                        assert_eq!(next_pc, iter.next_pc());
                    }
                    next_pc
                },
            };

            if pred_valid {
                {
                    let entry = payload.at_mut(index);
                    entry.next_pc = next_pc;
                    entry.pred_tag = pred_tag;
                    entry.fm = pred_fm;
                }
                decode[i].valid = true;
                decode[i].payload_index = index;
                self.stats.insns_fetched += 1;
                self.sequence += 1;

                trace_cache.feed(payload.at(index));
            } else {
                // Out of prediction bits: this branch never happened.
                payload.undo_push();
            }

            i += 1;

            // Without interleaving, a line-by-line bundle cannot cross an
            // I$ line boundary.
            if trace_it.is_none() && !stop && !icache.interleaved() {
                let line_size = icache.line_size_log2();
                stop = (self.pc >> line_size) != (next_pc >> line_size);
            }

            self.pc = next_pc;
        }

        if i > 0 {
            self.stats.bundles_fetched += 1;
        }

        if has_branch_in_bundle {
            let (perfect_vec, useful_bits) =
                self.mk_multi_br_pred_perfect(oracle, first_db_idx);
            self.stat_pred_accuracy(real_vec, perfect_vec, useful_bits);
        }
    }

    /// Derive the perfect direction vector from the reference stream by
    /// scanning the instructions following the bundle head, collecting up to
    /// k branch outcomes. Those are enough clues for perfect trace-hit
    /// detection.
    fn mk_multi_br_pred_perfect(
        &self,
        oracle: &OracleBuffer,
        first_db_idx: Option<usize>,
    ) -> (u32, usize) {
        let mut vector = 0u32;
        let mut br_found = 0usize;
        if let Some(first) = first_db_idx {
            let mut db_index = first;
            for _ in 0..self.fetch_width {
                if br_found >= self.num_multi_pred {
                    break;
                }
                db_index += 1;
                let entry = match oracle.peek(db_index) {
                    Some(entry) => entry,
                    None => break,
                };
                if Insn::new(entry.insn_bits).opcode() == Opcode::Branch {
                    if entry.next_pc != increment_pc(entry.pc) {
                        vector |= 1 << br_found;
                    }
                    br_found += 1;
                }
            }
        }
        (vector, br_found)
    }

    fn stat_pred_accuracy(&mut self, real_vec: u32, perfect_vec: u32, useful_bits: usize) {
        self.stats.num_prediction_samples += 1;
        let mut useful_mask = 0u32;
        for i in 0..useful_bits {
            useful_mask |= 1 << i;
        }
        let real_cmp = real_vec & useful_mask;
        let perfect_cmp = perfect_vec & useful_mask;
        for i in 0..self.num_multi_pred {
            let bit = 1u32 << i;
            if real_cmp & bit == perfect_cmp & bit {
                self.stats.bit_correct[i] += 1;
            } else {
                break;
            }
        }
    }
}
