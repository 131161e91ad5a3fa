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

// memory.rs
//
// This file contains the flat word-addressed memory shared by the reference
// (oracle) simulator and the timing front end, plus the Mmu wrapper that
// turns instruction fetches into either instruction words or fetch traps.

use crate::errors::{SimulatorError, Trap};
use crate::functional_simulator::instructions::Insn;

#[derive(Clone)]
pub struct Memory {
    pub data: Vec<u8>,
    pub size: usize,
}

impl Memory {
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0; size],
            size,
        }
    }

    pub fn read_word(&self, address: usize) -> Option<u32> {
        if address % 4 != 0 || address + 4 > self.size {
            return None;
        }
        Some(u32::from_le_bytes([
            self.data[address],
            self.data[address + 1],
            self.data[address + 2],
            self.data[address + 3],
        ]))
    }

    pub fn write_word(&mut self, address: usize, value: u32) -> bool {
        if address % 4 != 0 || address + 4 > self.size {
            return false;
        }
        self.data[address..address + 4].copy_from_slice(&value.to_le_bytes());
        true
    }

    /// Load a program image of little-endian instruction words at `base`.
    pub fn load_program(&mut self, base: usize, words: &[u32]) -> Result<(), SimulatorError> {
        let size = words.len() * 4;
        if base % 4 != 0 {
            return Err(SimulatorError::MisalignedProgramImage(base));
        }
        if base + size > self.size {
            return Err(SimulatorError::ProgramTooLarge {
                size: base + size,
                memory: self.size,
            });
        }
        for (i, &word) in words.iter().enumerate() {
            let _ = self.write_word(base + i * 4, word);
        }
        Ok(())
    }
}

/// Instruction-fetch view of memory. Fetch faults come back as traps; the
/// fetch unit converts them into NOP-with-exception entries rather than
/// letting them propagate.
pub struct Mmu {
    mem: Memory,
}

impl Mmu {
    pub fn new(mem: Memory) -> Self {
        Self { mem }
    }

    pub fn load_insn(&self, pc: u64) -> Result<Insn, Trap> {
        if pc % 4 != 0 {
            return Err(Trap::InstructionAddressMisaligned(pc));
        }
        match self.mem.read_word(pc as usize) {
            Some(bits) => Ok(Insn::new(bits)),
            None => Err(Trap::InstructionAccessFault(pc)),
        }
    }
}
