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

// circular_queue.rs
//
// This file contains a fixed-capacity ring buffer with index-preserving
// head/tail pointers. It backs the renamer's free list, active list, and the
// branch predictor's CTI queue. Indices handed out by push() are absolute
// slot indices and stay valid until the slot is dropped, which is what lets
// the renamer checkpoint a free-list head and the pipeline hold on to active
// list positions across cycles.

/// A fixed-capacity circular queue.
///
/// Empty and full are distinguished at `head == tail` by the `full` flag.
/// Storage is never reallocated; capacity is immutable after construction.
pub struct CircularQueue<T> {
    buf: Vec<T>,
    head: usize,
    tail: usize,
    full: bool,
}

impl<T: Clone + Default> CircularQueue<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "circular queue capacity must be positive");
        Self {
            buf: vec![T::default(); capacity],
            head: 0,
            tail: 0,
            full: false,
        }
    }

    /// Append an item and return its absolute slot index.
    ///
    /// Pushing into a full queue is a structural-hazard protocol violation
    /// and aborts the simulation.
    pub fn push(&mut self, item: T) -> usize {
        assert!(!self.full, "circular queue overflow");
        let idx = self.tail;
        self.buf[idx] = item;
        self.tail = (self.tail + 1) % self.buf.len();
        self.full = self.tail == self.head;
        idx
    }

    /// Remove and return the head item.
    pub fn pop(&mut self) -> T {
        assert!(!self.is_empty(), "circular queue underflow");
        let val = self.buf[self.head].clone();
        self.full = false;
        self.head = (self.head + 1) % self.buf.len();
        val
    }

    pub fn head_idx(&self) -> usize {
        self.head
    }

    pub fn tail_idx(&self) -> usize {
        self.tail
    }

    /// Move the head backward to a previously recorded index, growing the
    /// queue. Only slots still logically present in storage may be un-popped,
    /// so the restored size must not be smaller than the current size.
    pub fn restore_head(&mut self, restore: usize) {
        assert!(restore < self.buf.len(), "restored head out of range");
        let old_size = self.size();
        self.head = restore;
        self.full = self.tail == self.head;
        assert!(
            old_size <= self.size(),
            "restore_head may only un-pop, never drop"
        );
    }

    /// Truncate the tail so that `pos` becomes the newest element. No-op when
    /// the tail is already just past `pos`.
    pub fn drop_newer(&mut self, pos: usize) {
        self.bound_check(pos);
        let new_tail = (pos + 1) % self.buf.len();
        if new_tail != self.tail {
            self.tail = new_tail;
            self.full = false;
        }
    }

    /// Empty the queue without releasing storage.
    pub fn reset(&mut self) {
        self.tail = self.head;
        self.full = false;
    }

    pub fn is_empty(&self) -> bool {
        !self.full && self.tail == self.head
    }

    pub fn is_full(&self) -> bool {
        self.full
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn size(&self) -> usize {
        if self.full {
            self.buf.len()
        } else if self.tail >= self.head {
            self.tail - self.head
        } else {
            self.buf.len() + self.tail - self.head
        }
    }

    pub fn available(&self) -> usize {
        self.capacity() - self.size()
    }

    /// Access a slot by its absolute index, validated against the active
    /// range `head..tail` (modulo capacity).
    pub fn at(&self, pos: usize) -> &T {
        self.bound_check(pos);
        &self.buf[pos]
    }

    pub fn at_mut(&mut self, pos: usize) -> &mut T {
        self.bound_check(pos);
        &mut self.buf[pos]
    }

    fn bound_check(&self, pos: usize) {
        assert!(pos < self.buf.len(), "circular queue access out of bound");
        let in_range = if self.full {
            true
        } else if self.tail >= self.head {
            self.head <= pos && pos < self.tail
        } else {
            pos >= self.head || pos < self.tail
        };
        assert!(in_range, "circular queue access outside valid range");
    }
}
