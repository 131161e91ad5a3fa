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

// instructions.rs
//
// This file contains the raw-bits instruction wrapper consumed by the timing
// simulator. The front end never interprets full ISA semantics; it only needs
// the opcode class of each word plus the branch/jump immediates and the
// register fields that matter for renaming and return-address prediction.
// Encoding helpers for the same fields are provided for building test
// programs word by word.

/// Canonical NOP encoding (addi x0, x0, 0).
pub const INSN_NOP: u32 = 0x0000_0013;

/// Sentinel produced by the trace iterator when a trace ends at an indirect
/// jump whose target cannot be derived from the stored trace.
pub const UNKNOWN_PC_ADDR: u64 = u64::MAX;

/// Sequential PC increment.
pub fn increment_pc(pc: u64) -> u64 {
    pc.wrapping_add(4)
}

/// Opcode classes the front end distinguishes. Everything the fetch engine
/// does not care about lands in `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Load,
    Store,
    Branch,
    Jal,
    Jalr,
    Amo,
    System,
    OpImm,
    Op,
    Lui,
    Other,
}

/// A 32-bit instruction word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Insn {
    bits: u32,
}

impl Default for Insn {
    fn default() -> Self {
        Self { bits: INSN_NOP }
    }
}

impl Insn {
    pub fn new(bits: u32) -> Self {
        Self { bits }
    }

    pub fn nop() -> Self {
        Self { bits: INSN_NOP }
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    pub fn opcode(&self) -> Opcode {
        match self.bits & 0x7F {
            0x03 => Opcode::Load,
            0x23 => Opcode::Store,
            0x63 => Opcode::Branch,
            0x67 => Opcode::Jalr,
            0x6F => Opcode::Jal,
            0x2F => Opcode::Amo,
            0x73 => Opcode::System,
            0x13 => Opcode::OpImm,
            0x33 => Opcode::Op,
            0x37 => Opcode::Lui,
            _ => Opcode::Other,
        }
    }

    pub fn rd(&self) -> u64 {
        ((self.bits >> 7) & 0x1F) as u64
    }

    pub fn rs1(&self) -> u64 {
        ((self.bits >> 15) & 0x1F) as u64
    }

    pub fn rs2(&self) -> u64 {
        ((self.bits >> 20) & 0x1F) as u64
    }

    pub fn funct3(&self) -> u32 {
        (self.bits >> 12) & 0x7
    }

    pub fn funct7(&self) -> u32 {
        self.bits >> 25
    }

    /// I-type immediate, sign extended.
    pub fn i_imm(&self) -> i64 {
        ((self.bits as i32) >> 20) as i64
    }

    /// S-type immediate, sign extended.
    pub fn s_imm(&self) -> i64 {
        let imm = ((self.bits >> 25) << 5) | ((self.bits >> 7) & 0x1F);
        sign_extend(imm as u64, 12)
    }

    /// B-type (conditional branch) immediate, sign extended.
    pub fn sb_imm(&self) -> i64 {
        let b = self.bits;
        let imm = (((b >> 31) & 0x1) << 12)
            | (((b >> 7) & 0x1) << 11)
            | (((b >> 25) & 0x3F) << 5)
            | (((b >> 8) & 0xF) << 1);
        sign_extend(imm as u64, 13)
    }

    /// J-type (direct jump) immediate, sign extended.
    pub fn uj_imm(&self) -> i64 {
        let b = self.bits;
        let imm = (((b >> 31) & 0x1) << 20)
            | (((b >> 12) & 0xFF) << 12)
            | (((b >> 20) & 0x1) << 11)
            | (((b >> 21) & 0x3FF) << 1);
        sign_extend(imm as u64, 21)
    }

    /// U-type immediate (upper 20 bits), sign extended.
    pub fn u_imm(&self) -> i64 {
        ((self.bits & 0xFFFF_F000) as i32) as i64
    }

    /// Whether this is a call (direct or indirect jump linking through x1).
    pub fn is_call(&self) -> bool {
        matches!(self.opcode(), Opcode::Jal | Opcode::Jalr) && self.rd() == 1
    }

    /// Whether this is a return (indirect jump through x1 with no link).
    pub fn is_return(&self) -> bool {
        self.opcode() == Opcode::Jalr && self.rs1() == 1 && self.rd() == 0
    }

    /// Whether this instruction writes a destination register.
    pub fn writes_rd(&self) -> bool {
        match self.opcode() {
            Opcode::Load
            | Opcode::Jal
            | Opcode::Jalr
            | Opcode::Amo
            | Opcode::OpImm
            | Opcode::Op
            | Opcode::Lui => self.rd() != 0,
            _ => false,
        }
    }
}

fn sign_extend(value: u64, bits: u32) -> i64 {
    let shift = 64 - bits;
    ((value << shift) as i64) >> shift
}

// ---------------------------------------------------------------------------
// Encoding helpers for building test programs.
// ---------------------------------------------------------------------------

pub fn encode_addi(rd: u32, rs1: u32, imm: i32) -> u32 {
    ((imm as u32 & 0xFFF) << 20) | (rs1 << 15) | (rd << 7) | 0x13
}

pub fn encode_add(rd: u32, rs1: u32, rs2: u32) -> u32 {
    (rs2 << 20) | (rs1 << 15) | (rd << 7) | 0x33
}

pub fn encode_sub(rd: u32, rs1: u32, rs2: u32) -> u32 {
    (0x20 << 25) | (rs2 << 20) | (rs1 << 15) | (rd << 7) | 0x33
}

pub fn encode_lui(rd: u32, imm20: u32) -> u32 {
    (imm20 << 12) | (rd << 7) | 0x37
}

pub fn encode_lw(rd: u32, rs1: u32, imm: i32) -> u32 {
    ((imm as u32 & 0xFFF) << 20) | (rs1 << 15) | (0x2 << 12) | (rd << 7) | 0x03
}

pub fn encode_sw(rs2: u32, rs1: u32, imm: i32) -> u32 {
    let imm = imm as u32;
    ((imm >> 5) & 0x7F) << 25 | (rs2 << 20) | (rs1 << 15) | (0x2 << 12) | ((imm & 0x1F) << 7) | 0x23
}

/// Encode a conditional branch. `funct3`: 0 = beq, 1 = bne, 4 = blt, 5 = bge.
pub fn encode_branch(funct3: u32, rs1: u32, rs2: u32, offset: i32) -> u32 {
    let imm = offset as u32;
    assert!(offset % 2 == 0, "branch offset must be even");
    (((imm >> 12) & 0x1) << 31)
        | (((imm >> 5) & 0x3F) << 25)
        | (rs2 << 20)
        | (rs1 << 15)
        | (funct3 << 12)
        | (((imm >> 1) & 0xF) << 8)
        | (((imm >> 11) & 0x1) << 7)
        | 0x63
}

pub fn encode_beq(rs1: u32, rs2: u32, offset: i32) -> u32 {
    encode_branch(0, rs1, rs2, offset)
}

pub fn encode_bne(rs1: u32, rs2: u32, offset: i32) -> u32 {
    encode_branch(1, rs1, rs2, offset)
}

pub fn encode_jal(rd: u32, offset: i32) -> u32 {
    let imm = offset as u32;
    assert!(offset % 2 == 0, "jump offset must be even");
    (((imm >> 20) & 0x1) << 31)
        | (((imm >> 1) & 0x3FF) << 21)
        | (((imm >> 11) & 0x1) << 20)
        | (((imm >> 12) & 0xFF) << 12)
        | (rd << 7)
        | 0x6F
}

pub fn encode_jalr(rd: u32, rs1: u32, imm: i32) -> u32 {
    ((imm as u32 & 0xFFF) << 20) | (rs1 << 15) | (rd << 7) | 0x67
}

pub fn encode_ecall() -> u32 {
    0x0000_0073
}
