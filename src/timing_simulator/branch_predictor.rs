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

// branch_predictor.rs
//
// This file contains the multiple-branch predictor: a global-history PHT,
// a tagged BTB with hysteresis, a vector-backed return address stack,
// confidence and false-misprediction estimators, a CTI queue that backs up
// verify/fix ordering, and the multi-prediction future buffer that issues up
// to k branch directions from a single compound lookup per fetch cycle.

use serde::Serialize;

use crate::functional_simulator::instructions::{increment_pc, Insn, Opcode};
use crate::timing_simulator::config::PredictorConfig;
use crate::utils::CircularQueue;

/// Global history is a 16-bit right-shift register: the newest outcome
/// enters at bit 15 and older outcomes fall off the bottom.
const HIST_BIT: u32 = 0x8000;
const HIST_MASK: u32 = 0xFFFF;

pub fn gen_next_history(old_history: u32, taken: bool) -> u32 {
    ((old_history >> 1) | if taken { HIST_BIT } else { 0 }) & HIST_MASK
}

/// A small prediction automaton: a prediction bit with one bit of
/// hysteresis. `conf_update` reuses the storage as a saturating counter.
#[derive(Debug, Clone, Copy, Default)]
pub struct PredictAutomaton {
    pub pred: u32,
    pub hyst: u8,
}

impl PredictAutomaton {
    pub fn update(&mut self, outcome: u32) {
        if outcome == self.pred {
            if self.hyst < 1 {
                self.hyst += 1;
            }
        } else if self.hyst > 0 {
            self.hyst -= 1;
        } else {
            self.pred = outcome;
        }
    }

    pub fn conf_update(&mut self, outcome: bool, use_reset: bool, max_value: u32) {
        if outcome {
            if self.pred < max_value {
                self.pred += 1;
            }
        } else if use_reset {
            self.pred = 0;
        } else if self.pred > 0 {
            self.pred -= 1;
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct BtbEntry {
    valid: bool,
    tag: u64,
    target: u64,
    hyst: u8,
}

/// One slot of the multi-prediction future buffer.
#[derive(Debug, Clone, Copy, Default)]
struct FutureBranchPred {
    taken: bool,
}

/// In-flight prediction record. One is allocated per control-transfer
/// prediction and retired in order by `verify_pred`; `fix_pred` rewinds the
/// speculative state to the checkpoint stored here.
#[derive(Debug, Clone, Default)]
struct CtiEntry {
    pc: u64,
    predicted_next_pc: u64,
    is_cond: bool,
    use_btb: bool,
    from_multi: bool,
    multi_row: usize,
    multi_col: usize,
    pht_index: usize,
    /// Speculative history as it was before this prediction shifted it.
    history_checkpoint: u32,
    /// +1 push, -1 pop, 0 no RAS activity.
    ras_action: i8,
    ras_value: u64,
    conf: bool,
}

/// A single-prediction result (JAL / JALR / conditional via the scalar path).
#[derive(Debug, Clone, Copy)]
pub struct Prediction {
    pub next_pc: u64,
    pub tag: usize,
    pub conf: bool,
    pub fm: bool,
}

/// A multi-prediction result for one conditional branch of a fetch bundle.
/// `valid == false` means the future buffer is exhausted: `next_pc` equals
/// the branch's own PC and the caller must undo the fetch and stall.
#[derive(Debug, Clone, Copy)]
pub struct MultiPrediction {
    pub next_pc: u64,
    pub valid: bool,
    pub tag: usize,
    pub conf: bool,
    pub fm: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PredictorStats {
    pub num_pred: u64,
    pub num_miss: u64,
    pub num_cond_pred: u64,
    pub num_cond_miss: u64,
    pub num_flush_ras: u64,
    pub num_conf_corr: u64,
    pub num_conf_ncorr: u64,
    pub num_nconf_corr: u64,
    pub num_nconf_ncorr: u64,
}

pub struct MultiBranchPredictor {
    config: PredictorConfig,
    pht: Vec<PredictAutomaton>,
    btb: Vec<BtbEntry>,
    conf_table: Vec<PredictAutomaton>,
    fm_table: Vec<PredictAutomaton>,
    multi_pred_table: Vec<Vec<PredictAutomaton>>,
    ras: Vec<u64>,
    cti_queue: CircularQueue<CtiEntry>,
    speculative_history: u32,
    committed_history: u32,
    multi_buf: Vec<FutureBranchPred>,
    multi_buf_row: usize,
    multi_buf_cursor: usize,
    multi_buf_valid: bool,
    pub stats: PredictorStats,
}

impl MultiBranchPredictor {
    pub fn new(config: &PredictorConfig) -> Self {
        Self {
            pht: vec![PredictAutomaton::default(); config.pht_size],
            btb: vec![BtbEntry::default(); config.btb_size],
            conf_table: vec![PredictAutomaton::default(); config.pht_size],
            fm_table: vec![PredictAutomaton::default(); config.pht_size],
            multi_pred_table: vec![
                vec![PredictAutomaton::default(); config.num_multi_pred];
                config.multi_pred_size
            ],
            ras: Vec::with_capacity(config.ras_size),
            cti_queue: CircularQueue::new(config.cti_queue_size),
            speculative_history: 0,
            committed_history: 0,
            multi_buf: vec![FutureBranchPred::default(); config.num_multi_pred],
            multi_buf_row: 0,
            multi_buf_cursor: 0,
            multi_buf_valid: false,
            stats: PredictorStats::default(),
            config: config.clone(),
        }
    }

    fn pht_index(&self, history: u32, pc: u64) -> usize {
        ((history as u64 ^ (pc >> 2)) & (self.config.pht_size as u64 - 1)) as usize
    }

    fn multi_index(&self, history: u32, pc: u64) -> usize {
        ((history as u64 ^ (pc >> 2)) & (self.config.multi_pred_size as u64 - 1)) as usize
    }

    fn btb_index(&self, pc: u64) -> usize {
        ((pc >> 2) & (self.config.btb_size as u64 - 1)) as usize
    }

    fn ras_push(&mut self, addr: u64) {
        if self.ras.len() == self.config.ras_size {
            // Fixed depth: the oldest return address falls off the bottom.
            let _ = self.ras.remove(0);
        }
        self.ras.push(addr);
    }

    fn ras_pop(&mut self) -> Option<u64> {
        self.ras.pop()
    }

    pub fn speculative_history(&self) -> u32 {
        self.speculative_history
    }

    pub fn committed_history(&self) -> u32 {
        self.committed_history
    }

    // ------------------------------------------------------------------
    // Scalar prediction path (JAL / JALR / conditional branch).
    // ------------------------------------------------------------------

    /// Predict the next PC for a single control-transfer instruction and
    /// allocate a CTI queue entry for it. `direct_target` is the
    /// statically-computed target for direct CTIs.
    pub fn get_pred(&mut self, pc: u64, insn: Insn, direct_target: u64) -> Prediction {
        assert!(!self.cti_queue.is_full(), "CTI queue exhausted");
        self.stats.num_pred += 1;

        let mut entry = CtiEntry {
            pc,
            history_checkpoint: self.speculative_history,
            ..CtiEntry::default()
        };
        let pht_index = self.pht_index(self.speculative_history, pc);
        entry.pht_index = pht_index;
        let conf = self.conf_table[pht_index].pred == self.config.conf_max;
        let fm = self.fm_table[pht_index].pred != 0;

        let next_pc = match insn.opcode() {
            Opcode::Jal => {
                if insn.is_call() {
                    self.ras_push(increment_pc(pc));
                    entry.ras_action = 1;
                    entry.ras_value = increment_pc(pc);
                }
                direct_target
            },
            Opcode::Jalr => {
                if insn.is_return() {
                    match self.ras_pop() {
                        Some(target) => {
                            entry.ras_action = -1;
                            entry.ras_value = target;
                            target
                        },
                        None => self.btb_lookup(pc, &mut entry),
                    }
                } else {
                    let target = self.btb_lookup(pc, &mut entry);
                    if insn.is_call() {
                        self.ras_push(increment_pc(pc));
                        entry.ras_action = 1;
                        entry.ras_value = increment_pc(pc);
                    }
                    target
                }
            },
            Opcode::Branch => {
                self.stats.num_cond_pred += 1;
                entry.is_cond = true;
                let taken = self.pht[pht_index].pred != 0;
                self.speculative_history = gen_next_history(self.speculative_history, taken);
                if taken {
                    direct_target
                } else {
                    increment_pc(pc)
                }
            },
            _ => increment_pc(pc),
        };

        entry.predicted_next_pc = next_pc;
        entry.conf = conf;
        let tag = self.cti_queue.push(entry);

        Prediction {
            next_pc,
            tag,
            conf,
            fm,
        }
    }

    fn btb_lookup(&mut self, pc: u64, entry: &mut CtiEntry) -> u64 {
        entry.use_btb = true;
        let slot = &self.btb[self.btb_index(pc)];
        if slot.valid && slot.tag == pc {
            slot.target
        } else {
            increment_pc(pc)
        }
    }

    // ------------------------------------------------------------------
    // Multi-prediction path.
    // ------------------------------------------------------------------

    /// Run the compound lookup for a fresh fetch cycle. The returned vector
    /// has bit i set iff the i-th upcoming conditional branch is predicted
    /// taken. Subsequent `get_multi_pred_for_branch` calls consume
    /// successive bits of this vector.
    pub fn prepare_multi_pred_future_buf(&mut self, pc: u64) -> u32 {
        let row = self.multi_index(self.speculative_history, pc);
        let mut vector = 0u32;
        for col in 0..self.config.num_multi_pred {
            let taken = self.multi_pred_table[row][col].pred != 0;
            if taken {
                vector |= 1 << col;
            }
            self.multi_buf[col] = FutureBranchPred { taken };
        }
        self.multi_buf_row = row;
        self.multi_buf_cursor = 0;
        self.multi_buf_valid = true;
        vector
    }

    /// Consume the next direction bit of the future buffer for one
    /// conditional branch. When no bit is left, no state changes and the
    /// result carries `valid == false` with `next_pc == pc`.
    pub fn get_multi_pred_for_branch(
        &mut self,
        pc: u64,
        insn: Insn,
        direct_target: u64,
    ) -> MultiPrediction {
        debug_assert_eq!(insn.opcode(), Opcode::Branch);
        self.stats.num_pred += 1;
        self.stats.num_cond_pred += 1;

        if !self.multi_buf_valid || self.multi_buf_cursor >= self.config.num_multi_pred {
            return MultiPrediction {
                next_pc: pc,
                valid: false,
                tag: 0,
                conf: false,
                fm: false,
            };
        }
        assert!(!self.cti_queue.is_full(), "CTI queue exhausted");

        let col = self.multi_buf_cursor;
        let taken = self.multi_buf[col].taken;
        let next_pc = if taken {
            direct_target
        } else {
            increment_pc(pc)
        };

        let pht_index = self.pht_index(self.speculative_history, pc);
        let conf = self.conf_table[pht_index].pred == self.config.conf_max;
        let fm = self.fm_table[pht_index].pred != 0;

        let entry = CtiEntry {
            pc,
            predicted_next_pc: next_pc,
            is_cond: true,
            from_multi: true,
            multi_row: self.multi_buf_row,
            multi_col: col,
            pht_index,
            history_checkpoint: self.speculative_history,
            conf,
            ..CtiEntry::default()
        };
        self.speculative_history = gen_next_history(self.speculative_history, taken);
        let tag = self.cti_queue.push(entry);

        MultiPrediction {
            next_pc,
            valid: true,
            tag,
            conf,
            fm,
        }
    }

    /// Advance the future buffer's consumed cursor after the branch has
    /// actually been fetched into the bundle.
    pub fn multi_pred_notify_branch(&mut self) {
        if self.multi_buf_valid && self.multi_buf_cursor < self.config.num_multi_pred {
            self.multi_buf_cursor += 1;
        }
    }

    // ------------------------------------------------------------------
    // Resolution.
    // ------------------------------------------------------------------

    /// The prediction identified by `tag` executed and was found wrong.
    /// Rewinds the speculative history and RAS to the state just after the
    /// corrected prediction and drops all younger in-flight predictions.
    pub fn fix_pred(&mut self, tag: usize, next_pc: u64) {
        let cap = self.cti_queue.capacity();

        // Undo the RAS effects of younger predictions, youngest first.
        let mut idx = (self.cti_queue.tail_idx() + cap - 1) % cap;
        while idx != tag {
            let (action, value) = {
                let younger = self.cti_queue.at(idx);
                (younger.ras_action, younger.ras_value)
            };
            match action {
                1 => {
                    let _ = self.ras_pop();
                },
                -1 => self.ras_push(value),
                _ => {},
            }
            idx = (idx + cap - 1) % cap;
        }
        self.cti_queue.drop_newer(tag);

        let (pc, is_cond, checkpoint) = {
            let entry = self.cti_queue.at(tag);
            (entry.pc, entry.is_cond, entry.history_checkpoint)
        };
        let actual_taken = next_pc != increment_pc(pc);

        // Replay history from the checkpointed state as of this CTI.
        self.speculative_history = if is_cond {
            gen_next_history(checkpoint, actual_taken)
        } else {
            checkpoint
        };

        // Record the resolved outcome so training at retire sees it.
        self.cti_queue.at_mut(tag).predicted_next_pc = next_pc;

        // Whatever the future buffer held belongs to the wrong path.
        self.multi_buf_valid = false;

        self.stats.num_miss += 1;
        if is_cond {
            self.stats.num_cond_miss += 1;
        }
    }

    /// Retire the oldest in-flight prediction and train the tables with the
    /// architectural outcome. Predictions must be verified in program order.
    pub fn verify_pred(&mut self, tag: usize, next_pc: u64, fm: bool) {
        assert_eq!(
            tag,
            self.cti_queue.head_idx(),
            "predictions must be verified in order"
        );
        let entry = self.cti_queue.pop();
        let taken = next_pc != increment_pc(entry.pc);
        let correct = entry.predicted_next_pc == next_pc;

        if entry.is_cond {
            if entry.from_multi {
                self.multi_pred_table[entry.multi_row][entry.multi_col].update(taken as u32);
            } else {
                self.pht[entry.pht_index].update(taken as u32);
            }
            self.conf_table[entry.pht_index].conf_update(
                correct,
                self.config.conf_reset,
                self.config.conf_max,
            );
            self.fm_table[entry.pht_index].conf_update(fm, false, 3);
            self.committed_history = gen_next_history(self.committed_history, taken);

            match (entry.conf, correct) {
                (true, true) => self.stats.num_conf_corr += 1,
                (true, false) => self.stats.num_conf_ncorr += 1,
                (false, true) => self.stats.num_nconf_corr += 1,
                (false, false) => self.stats.num_nconf_ncorr += 1,
            }
        }

        if entry.use_btb && taken {
            let index = self.btb_index(entry.pc);
            let slot = &mut self.btb[index];
            if slot.valid && slot.tag == entry.pc {
                if slot.target == next_pc {
                    if slot.hyst < 1 {
                        slot.hyst += 1;
                    }
                } else if slot.hyst > 0 {
                    slot.hyst -= 1;
                } else {
                    slot.target = next_pc;
                }
            } else {
                *slot = BtbEntry {
                    valid: true,
                    tag: entry.pc,
                    target: next_pc,
                    hyst: 0,
                };
            }
        }
    }

    /// Discard every in-flight prediction and re-seat the speculative state
    /// on the committed state. Used on full pipeline squashes.
    pub fn flush(&mut self) {
        self.cti_queue.reset();
        self.speculative_history = self.committed_history;
        if !self.ras.is_empty() {
            self.stats.num_flush_ras += 1;
            self.ras.clear();
        }
        self.multi_buf_valid = false;
    }

    pub fn pending_predictions(&self) -> usize {
        self.cti_queue.size()
    }
}
