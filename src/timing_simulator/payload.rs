// payload.rs
//
// Pipeline-global ring of fetched instructions. Fetch pushes entries (and
// can undo the most recent push when a prediction bit runs out), retire pops
// them from the head, and branch recovery truncates everything younger than
// the resolving branch. Each entry can be linked to the reference stream via
// map_to_actual.

use crate::functional_simulator::instructions::Insn;
use crate::functional_simulator::simulator::OracleBuffer;
use crate::utils::CircularQueue;

#[derive(Debug, Clone, Default)]
pub struct PayloadEntry {
    pub inst: Insn,
    pub pc: u64,
    pub next_pc: u64,
    pub sequence: u64,
    /// CTI queue tag when this instruction carries a prediction.
    pub pred_tag: Option<usize>,
    pub fm: bool,
    pub fetch_exception: bool,
    pub fetch_exception_cause: u64,
    /// Branch mask snapshot taken at rename.
    pub branch_mask: u64,
    /// Index into the reference stream, when a link was established.
    pub db_index: usize,
    /// Whether the link points at the instruction the reference machine
    /// actually executed at this position.
    pub good_instruction: bool,
}

pub struct PayloadBuffer {
    buf: CircularQueue<PayloadEntry>,
}

impl PayloadBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: CircularQueue::new(capacity),
        }
    }

    /// Reserve the next slot and return its absolute index.
    pub fn push(&mut self) -> usize {
        self.buf.push(PayloadEntry::default())
    }

    /// Roll back the most recent push.
    pub fn undo_push(&mut self) {
        let cap = self.buf.capacity();
        let last = (self.buf.tail_idx() + cap - 1) % cap;
        let head = self.buf.head_idx();
        if last == head {
            self.buf.reset();
        } else {
            self.buf.drop_newer((last + cap - 1) % cap);
        }
    }

    pub fn at(&self, index: usize) -> &PayloadEntry {
        self.buf.at(index)
    }

    pub fn at_mut(&mut self, index: usize) -> &mut PayloadEntry {
        self.buf.at_mut(index)
    }

    /// Pop the oldest entry (the instruction retiring this cycle).
    pub fn pop_head(&mut self) -> PayloadEntry {
        self.buf.pop()
    }

    pub fn head_idx(&self) -> usize {
        self.buf.head_idx()
    }

    /// Drop every entry younger than `index` (branch recovery).
    pub fn drop_newer(&mut self, index: usize) {
        self.buf.drop_newer(index);
    }

    /// Drop everything (full squash).
    pub fn clear(&mut self) {
        self.buf.reset();
    }

    pub fn size(&self) -> usize {
        self.buf.size()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.buf.is_full()
    }

    /// Link the entry at `index` to the reference stream. `db_index` is the
    /// position this instruction occupies if the speculative path is the
    /// architectural one; the link is good only when the PCs agree.
    pub fn map_to_actual(&mut self, index: usize, db_index: usize, oracle: &OracleBuffer) {
        let entry = self.buf.at_mut(index);
        entry.db_index = db_index;
        entry.good_instruction = match oracle.peek(db_index) {
            Some(actual) => actual.pc == entry.pc,
            None => false,
        };
    }
}
