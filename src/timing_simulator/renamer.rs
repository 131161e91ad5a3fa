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

// renamer.rs
//
// This file contains the register renaming unit: rename map table (RMT),
// architectural map table (AMT), physical register file with ready bits,
// active list, free list, and the branch checkpoint machinery (GBM plus
// shadow map array). One public operation per pipeline stage; all
// structural-hazard checks are the caller's obligation via the stall_*
// queries, and violations are fatal.

use crate::timing_simulator::config::RenamerConfig;
use crate::utils::{Bitmap, CircularQueue};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RmtEntry {
    pub valid: bool,
    pub phy_reg_idx: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ActiveListEntry {
    // Destination register fields.
    pub has_dst_reg: bool,
    pub dst_logic_reg: u64,
    pub dst_phy_reg: u64,

    // Completion status.
    pub complete: bool,

    // Squash flags for deferred recovery at retire.
    pub squash_exception: bool,
    pub squash_load_violation: bool,
    pub squash_branch_mispred: bool,
    pub squash_value_mispred: bool,

    // Instruction class flags.
    pub is_load: bool,
    pub is_store: bool,
    pub is_branch: bool,
    pub is_atomic: bool,
    pub is_csr: bool,

    pub pc: u64,
}

/// Checkpoint taken when a branch renames: the full RMT, the free-list head
/// at that point, and the GBM as it was before the branch claimed its bit.
#[derive(Debug, Clone, Default)]
struct ShadowMapEntry {
    saved_rmt: Vec<RmtEntry>,
    saved_free_list_head: usize,
    saved_gbm: Bitmap,
}

/// Snapshot of the active-list head returned by `precommit`.
#[derive(Debug, Clone, Copy)]
pub struct PrecommitInfo {
    pub complete: bool,
    pub exception: bool,
    pub load_violation: bool,
    pub branch_mispred: bool,
    pub value_mispred: bool,
    pub is_load: bool,
    pub is_store: bool,
    pub is_branch: bool,
    pub is_atomic: bool,
    pub is_csr: bool,
    pub pc: u64,
}

pub struct Renamer {
    rmt: Vec<RmtEntry>,
    amt: Vec<u64>,
    prf: Vec<u64>,
    prf_ready: Vec<bool>,
    free_list: CircularQueue<u64>,
    active_list: CircularQueue<ActiveListEntry>,
    shadow_maps: Vec<ShadowMapEntry>,
    gbm: Bitmap,

    n_log_regs: u64,
    n_phy_regs: u64,
    n_branches: u8,
}

impl Renamer {
    pub fn new(config: &RenamerConfig) -> Self {
        assert!(config.n_phy_regs > config.n_log_regs);
        assert!(config.n_branches >= 1 && config.n_branches <= 64);
        assert!(config.active_list_size > 0);

        let n_log = config.n_log_regs;
        let n_phy = config.n_phy_regs;
        let n_br = config.n_branches as u8;
        let fl_size = (n_phy - n_log) as usize;

        let mut renamer = Self {
            rmt: vec![RmtEntry::default(); n_log as usize],
            amt: (0..n_log).collect(),
            prf: vec![0; n_phy as usize],
            prf_ready: vec![true; n_phy as usize],
            free_list: CircularQueue::new(fl_size),
            active_list: CircularQueue::new(config.active_list_size),
            shadow_maps: vec![
                ShadowMapEntry {
                    saved_rmt: vec![RmtEntry::default(); n_log as usize],
                    saved_free_list_head: 0,
                    saved_gbm: Bitmap::new(n_br),
                };
                n_br as usize
            ],
            gbm: Bitmap::new(n_br),
            n_log_regs: n_log,
            n_phy_regs: n_phy,
            n_branches: n_br,
        };

        // The pipeline starts empty: AMT holds the identity mapping and the
        // non-architectural registers populate the free list.
        for i in 0..fl_size {
            let _ = renamer.free_list.push(n_log + i as u64);
        }

        renamer
    }

    // ------------------------------------------------------------------
    // Rename stage.
    // ------------------------------------------------------------------

    /// Stall if the free list cannot cover `bundle_dst` destinations.
    pub fn stall_reg(&self, bundle_dst: usize) -> bool {
        self.free_list.size() < bundle_dst
    }

    /// Stall if there are fewer free checkpoints than `bundle_branch`.
    pub fn stall_branch(&self, bundle_branch: usize) -> bool {
        (self.gbm.avail() as usize) < bundle_branch
    }

    /// The current GBM word, used to tag instructions entering the window.
    pub fn get_branch_mask(&self) -> u64 {
        self.gbm.word()
    }

    /// Rename a source register: the speculative mapping if one is live,
    /// otherwise the committed one.
    pub fn rename_rsrc(&self, log_reg: u64) -> u64 {
        assert!(log_reg < self.n_log_regs);
        if self.rmt[log_reg as usize].valid {
            self.rmt[log_reg as usize].phy_reg_idx
        } else {
            self.amt[log_reg as usize]
        }
    }

    /// Rename a destination register, claiming a physical register from the
    /// free list. The caller must have checked `stall_reg` first.
    pub fn rename_rdst(&mut self, log_reg: u64) -> u64 {
        assert!(log_reg != 0, "register 0 is never renamed");
        assert!(log_reg < self.n_log_regs);
        assert!(!self.free_list.is_empty());

        let phy_reg = self.free_list.pop();
        self.rmt[log_reg as usize].phy_reg_idx = phy_reg;
        self.rmt[log_reg as usize].valid = true;
        phy_reg
    }

    /// Create a branch checkpoint and return the branch ID (its GBM bit).
    /// The caller must have checked `stall_branch` first.
    pub fn checkpoint(&mut self) -> u64 {
        assert!(self.gbm.avail() > 0, "checkpoint with no free GBM bit");
        let old_gbm = self.gbm;
        let branch_id = self.gbm.first_free(0);
        assert!(branch_id < self.n_branches);
        self.gbm.set(branch_id);

        let shadow = &mut self.shadow_maps[branch_id as usize];
        shadow.saved_free_list_head = self.free_list.head_idx();
        shadow.saved_gbm = old_gbm;
        shadow.saved_rmt.copy_from_slice(&self.rmt);

        branch_id as u64
    }

    // ------------------------------------------------------------------
    // Dispatch stage.
    // ------------------------------------------------------------------

    /// Stall if the active list cannot hold `bundle_inst` more instructions.
    pub fn stall_dispatch(&self, bundle_inst: usize) -> bool {
        self.active_list.available() < bundle_inst
    }

    /// Enter one instruction into the active list and return its index.
    #[allow(clippy::too_many_arguments)]
    pub fn dispatch_inst(
        &mut self,
        dest_valid: bool,
        log_reg: u64,
        phy_reg: u64,
        load: bool,
        store: bool,
        branch: bool,
        amo: bool,
        csr: bool,
        pc: u64,
    ) -> usize {
        assert!(!self.active_list.is_full());

        self.active_list.push(ActiveListEntry {
            has_dst_reg: dest_valid,
            dst_logic_reg: log_reg,
            dst_phy_reg: phy_reg,
            complete: false,
            squash_exception: false,
            squash_load_violation: false,
            squash_branch_mispred: false,
            squash_value_mispred: false,
            is_load: load,
            is_store: store,
            is_branch: branch,
            is_atomic: amo,
            is_csr: csr,
            pc,
        })
    }

    // ------------------------------------------------------------------
    // Schedule / register-read / writeback stages.
    // ------------------------------------------------------------------

    pub fn is_ready(&self, phy_reg: u64) -> bool {
        assert!(phy_reg < self.n_phy_regs);
        self.prf_ready[phy_reg as usize]
    }

    pub fn clear_ready(&mut self, phy_reg: u64) {
        assert!(phy_reg < self.n_phy_regs);
        self.prf_ready[phy_reg as usize] = false;
    }

    pub fn set_ready(&mut self, phy_reg: u64) {
        assert!(phy_reg < self.n_phy_regs);
        self.prf_ready[phy_reg as usize] = true;
    }

    pub fn read(&self, phy_reg: u64) -> u64 {
        assert!(phy_reg < self.n_phy_regs);
        self.prf[phy_reg as usize]
    }

    pub fn write(&mut self, phy_reg: u64, value: u64) {
        assert!(phy_reg < self.n_phy_regs);
        self.prf[phy_reg as usize] = value;
    }

    pub fn set_complete(&mut self, al_index: usize) {
        self.active_list.at_mut(al_index).complete = true;
    }

    /// Branch resolution.
    ///
    /// On a correct prediction the branch's GBM bit is released, both in the
    /// live GBM and in every still-live checkpoint's saved GBM, so that
    /// younger branches' checkpoints forget this one. On a misprediction the
    /// GBM, free-list head, and RMT are restored from the branch's
    /// checkpoint, and the active list is truncated so the branch becomes
    /// the youngest instruction in the window.
    ///
    /// The branch misprediction flag in the active list is deliberately NOT
    /// set here: recovery is immediate, and a second squash at retire must
    /// not happen.
    pub fn resolve(&mut self, al_index: usize, branch_id: u64, correct: bool) {
        assert!(branch_id < self.n_branches as u64);
        assert!(self.active_list.at(al_index).is_branch);
        let branch_id = branch_id as u8;
        assert!(self.gbm.test(branch_id));

        if correct {
            self.gbm.clear(branch_id);
            let mut live = self.gbm.first_set(0);
            while live < self.n_branches {
                self.shadow_maps[live as usize].saved_gbm.clear(branch_id);
                live = self.gbm.first_set(live + 1);
            }
        } else {
            self.gbm = self.shadow_maps[branch_id as usize].saved_gbm;
            assert!(
                !self.gbm.test(branch_id),
                "a resolved branch must not appear in its own restored GBM"
            );

            let saved_head = self.shadow_maps[branch_id as usize].saved_free_list_head;
            self.free_list.restore_head(saved_head);

            let shadow_rmt = &self.shadow_maps[branch_id as usize].saved_rmt;
            self.rmt.copy_from_slice(shadow_rmt);

            self.active_list.drop_newer(al_index);
        }
    }

    // ------------------------------------------------------------------
    // Retire stage.
    // ------------------------------------------------------------------

    /// Examine the instruction at the head of the active list, or None when
    /// the window is empty.
    pub fn precommit(&self) -> Option<PrecommitInfo> {
        if self.active_list.is_empty() {
            return None;
        }
        let head = self.active_list.at(self.active_list.head_idx());
        Some(PrecommitInfo {
            complete: head.complete,
            exception: head.squash_exception,
            load_violation: head.squash_load_violation,
            branch_mispred: head.squash_branch_mispred,
            value_mispred: head.squash_value_mispred,
            is_load: head.is_load,
            is_store: head.is_store,
            is_branch: head.is_branch,
            is_atomic: head.is_atomic,
            is_csr: head.is_csr,
            pc: head.pc,
        })
    }

    /// Commit the head instruction. The caller must have validated the head
    /// via `precommit`; committing an incomplete or faulted instruction is
    /// fatal.
    pub fn commit(&mut self) {
        assert!(!self.active_list.is_empty(), "commit on empty active list");

        let head_idx = self.active_list.head_idx();
        let head = self.active_list.at(head_idx).clone();
        assert!(head.complete, "commit of an incomplete instruction");
        assert!(!head.squash_exception, "commit of a faulted instruction");
        assert!(!head.squash_load_violation, "commit of a violating load");

        if head.has_dst_reg {
            let log = head.dst_logic_reg as usize;
            // Only clear the RMT entry if it still names this instruction's
            // mapping; a younger rename may have superseded it.
            if self.rmt[log].valid && self.rmt[log].phy_reg_idx == head.dst_phy_reg {
                self.rmt[log].valid = false;
                self.rmt[log].phy_reg_idx = 0;
            }
            // The register being freed is the OLD committed mapping, never
            // the one this instruction produced.
            let to_free = self.amt[log];
            self.amt[log] = head.dst_phy_reg;
            let _ = self.free_list.push(to_free);
        }

        let _ = self.active_list.pop();
    }

    /// Roll the renamer back to the committed state of the machine: empty
    /// active list, no speculative mappings, every non-architectural
    /// register back on the free list, no live checkpoints.
    pub fn squash(&mut self) {
        for entry in &mut self.rmt {
            entry.valid = false;
        }
        self.active_list.reset();
        let tail = self.free_list.tail_idx();
        self.free_list.restore_head(tail);
        self.gbm.clear_all();
    }

    // ------------------------------------------------------------------
    // Flag setters, not tied to a specific stage.
    // ------------------------------------------------------------------

    pub fn set_exception(&mut self, al_index: usize) {
        self.active_list.at_mut(al_index).squash_exception = true;
    }

    pub fn set_load_violation(&mut self, al_index: usize) {
        self.active_list.at_mut(al_index).squash_load_violation = true;
    }

    pub fn set_branch_misprediction(&mut self, al_index: usize) {
        self.active_list.at_mut(al_index).squash_branch_mispred = true;
    }

    pub fn set_value_misprediction(&mut self, al_index: usize) {
        self.active_list.at_mut(al_index).squash_value_mispred = true;
    }

    pub fn get_exception(&self, al_index: usize) -> bool {
        self.active_list.at(al_index).squash_exception
    }

    // ------------------------------------------------------------------
    // Queries used by the pipeline and by tests.
    // ------------------------------------------------------------------

    pub fn active_list_size(&self) -> usize {
        self.active_list.size()
    }

    pub fn free_list_size(&self) -> usize {
        self.free_list.size()
    }

    pub fn committed_mapping(&self, log_reg: u64) -> u64 {
        assert!(log_reg < self.n_log_regs);
        self.amt[log_reg as usize]
    }

    pub fn speculative_mapping(&self, log_reg: u64) -> RmtEntry {
        assert!(log_reg < self.n_log_regs);
        self.rmt[log_reg as usize]
    }
}
