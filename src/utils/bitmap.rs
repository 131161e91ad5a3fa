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

// bitmap.rs
//
// This file contains a fixed-width occupancy bitmap with first-free and
// first-set search. It is the basis of the global branch mask (GBM) in the
// renamer and of similar small allocators.

/// A fixed-width (at most 64 bits) occupancy vector.
///
/// Bit index rule: LSB is position 0, MSB is position 63. `avail` tracks the
/// number of zero bits so the common "any free slot?" query is O(1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bitmap {
    word: u64,
    len: u8,
    avail: u8,
}

impl Default for Bitmap {
    fn default() -> Self {
        Self {
            word: 0,
            len: 0,
            avail: 0,
        }
    }
}

impl Bitmap {
    pub fn new(len: u8) -> Self {
        assert!(len >= 1 && len <= 64, "bitmap width must be in [1, 64]");
        Self {
            word: 0,
            len,
            avail: len,
        }
    }

    pub fn len(&self) -> u8 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The raw occupancy word.
    pub fn word(&self) -> u64 {
        self.word
    }

    /// Number of zero bits.
    pub fn avail(&self) -> u8 {
        self.avail
    }

    pub fn set(&mut self, pos: u8) {
        assert!(pos < self.len, "bitmap position {} out of range", pos);
        let mask = 1u64 << pos;
        if self.word & mask == 0 {
            self.avail -= 1;
        }
        self.word |= mask;
    }

    pub fn clear(&mut self, pos: u8) {
        assert!(pos < self.len, "bitmap position {} out of range", pos);
        let mask = 1u64 << pos;
        if self.word & mask != 0 {
            self.avail += 1;
        }
        self.word &= !mask;
    }

    pub fn test(&self, pos: u8) -> bool {
        assert!(pos < self.len, "bitmap position {} out of range", pos);
        self.word & (1u64 << pos) != 0
    }

    pub fn clear_all(&mut self) {
        self.word = 0;
        self.avail = self.len;
    }

    /// Position of the first zero bit at or after `from`, or `len` if none.
    pub fn first_free(&self, from: u8) -> u8 {
        self.search(false, from)
    }

    /// Position of the first one bit at or after `from`, or `len` if none.
    pub fn first_set(&self, from: u8) -> u8 {
        self.search(true, from)
    }

    fn search(&self, target_set: bool, from: u8) -> u8 {
        if from >= self.len {
            return self.len;
        }
        let map = if target_set { self.word } else { !self.word };
        for pos in from..self.len {
            if map & (1u64 << pos) != 0 {
                return pos;
            }
        }
        self.len
    }
}
