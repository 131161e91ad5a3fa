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
// This file contains the reference functional simulator. It executes a small
// integer subset (enough to produce real control flow) and records the
// committed instruction stream into an oracle buffer. The timing front end
// never executes semantics itself: it links speculative payload entries to
// oracle entries to detect mispredictions and to derive perfect
// multi-prediction vectors.

use log::debug;

use crate::functional_simulator::instructions::{increment_pc, Insn, Opcode};
use crate::functional_simulator::memory::Memory;
use crate::functional_simulator::registers::Registers;

/// One committed instruction of the reference stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct OracleEntry {
    pub pc: u64,
    pub next_pc: u64,
    pub insn_bits: u32,
}

/// The reference instruction stream, indexed by `db_index` from payload
/// entries.
#[derive(Debug, Clone, Default)]
pub struct OracleBuffer {
    entries: Vec<OracleEntry>,
}

impl OracleBuffer {
    pub fn from_entries(entries: Vec<OracleEntry>) -> Self {
        Self { entries }
    }

    pub fn peek(&self, db_index: usize) -> Option<&OracleEntry> {
        self.entries.get(db_index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct Simulator {
    pub registers: Registers,
    pub memory: Memory,
    pub pc: u64,
    pub halted: bool,
}

impl Simulator {
    pub fn new(memory_size: usize) -> Self {
        Self {
            registers: Registers::new(),
            memory: Memory::new(memory_size),
            pc: 0,
            halted: false,
        }
    }

    pub fn with_memory(memory: Memory) -> Self {
        Self {
            registers: Registers::new(),
            memory,
            pc: 0,
            halted: false,
        }
    }

    /// Execute one instruction and return its committed-stream record, or
    /// None once the machine has halted or run off the program image.
    pub fn step(&mut self) -> Option<OracleEntry> {
        if self.halted {
            return None;
        }

        let pc = self.pc;
        let bits = match self.memory.read_word(pc as usize) {
            Some(bits) => bits,
            None => {
                self.halted = true;
                return None;
            },
        };
        let insn = Insn::new(bits);
        let mut next_pc = increment_pc(pc);

        match insn.opcode() {
            Opcode::OpImm => {
                // Only addi is modeled; other OP-IMM encodings behave as NOPs.
                if insn.funct3() == 0 {
                    let val = self
                        .registers
                        .read(insn.rs1())
                        .wrapping_add(insn.i_imm() as u64);
                    self.registers.write(insn.rd(), val);
                }
            },
            Opcode::Op => {
                let a = self.registers.read(insn.rs1());
                let b = self.registers.read(insn.rs2());
                if insn.funct3() == 0 {
                    let val = if insn.funct7() == 0x20 {
                        a.wrapping_sub(b)
                    } else {
                        a.wrapping_add(b)
                    };
                    self.registers.write(insn.rd(), val);
                }
            },
            Opcode::Lui => {
                self.registers.write(insn.rd(), insn.u_imm() as u64);
            },
            Opcode::Load => {
                let addr = self
                    .registers
                    .read(insn.rs1())
                    .wrapping_add(insn.i_imm() as u64);
                let val = self.memory.read_word(addr as usize).unwrap_or(0);
                self.registers.write(insn.rd(), val as i32 as i64 as u64);
            },
            Opcode::Store => {
                let addr = self
                    .registers
                    .read(insn.rs1())
                    .wrapping_add(insn.s_imm() as u64);
                let _ = self
                    .memory
                    .write_word(addr as usize, self.registers.read(insn.rs2()) as u32);
            },
            Opcode::Branch => {
                let a = self.registers.read(insn.rs1());
                let b = self.registers.read(insn.rs2());
                let taken = match insn.funct3() {
                    0 => a == b,
                    1 => a != b,
                    4 => (a as i64) < (b as i64),
                    5 => (a as i64) >= (b as i64),
                    6 => a < b,
                    7 => a >= b,
                    _ => false,
                };
                if taken {
                    next_pc = pc.wrapping_add(insn.sb_imm() as u64);
                }
            },
            Opcode::Jal => {
                self.registers.write(insn.rd(), increment_pc(pc));
                next_pc = pc.wrapping_add(insn.uj_imm() as u64);
            },
            Opcode::Jalr => {
                let target = self
                    .registers
                    .read(insn.rs1())
                    .wrapping_add(insn.i_imm() as u64)
                    & !1u64;
                self.registers.write(insn.rd(), increment_pc(pc));
                next_pc = target;
            },
            Opcode::System => {
                // ecall ends the reference run.
                self.halted = true;
            },
            Opcode::Amo | Opcode::Other => {},
        }

        self.pc = next_pc;
        Some(OracleEntry {
            pc,
            next_pc,
            insn_bits: bits,
        })
    }

    /// Run up to `max_steps` instructions and collect the committed stream.
    pub fn run_collect(&mut self, max_steps: usize) -> Vec<OracleEntry> {
        let mut entries = Vec::new();
        while entries.len() < max_steps {
            match self.step() {
                Some(entry) => entries.push(entry),
                None => break,
            }
        }
        debug!(
            "reference run produced {} instructions (halted={})",
            entries.len(),
            self.halted
        );
        entries
    }
}
