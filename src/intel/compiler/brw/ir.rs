/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

extern crate brw_ir_proc;

use crate::api::CompileError;
pub use crate::builder::{
    Builder, FsBuilder, InstrBuilder, ScopedBuilder, VgrfBuilder,
};
use crate::payload::ThreadPayload;
use brw_ir_proc::*;
use log::debug;
use smallvec::SmallVec;
use std::fmt;

/// Size of one hardware register in bytes
pub const REG_SIZE: u32 = 32;

/// Number of general registers available to a thread
pub const MAX_GRF: u32 = 128;

/// Number of message registers
pub const BRW_MAX_MRF: u32 = 16;

/// First GRF used to emulate the message register file on Gen7+
pub const GEN7_MRF_HACK_START: u32 = 112;

pub const BRW_ARF_NULL: u32 = 0x00;
pub const BRW_ARF_ACCUMULATOR: u32 = 0x20;
pub const BRW_ARF_FLAG: u32 = 0x30;

/// Represents a register file
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum RegFile {
    /// Virtual general register file
    ///
    /// Virtual registers are allocated per value and later mapped onto the
    /// hardware register file by the register allocator.
    Vgrf,

    /// Push or pull constants, indexed by component
    Uniform,

    /// An immediate value
    Imm,

    /// A fixed hardware general register
    Grf,

    /// The architecture register file: null, accumulator and flags
    Arf,

    /// The message register file
    ///
    /// On Gen7+ there is no MRF and the top 16 GRFs stand in for it.
    Mrf,

    /// Interpolation setup data for a varying slot
    ///
    /// `nr` is the URB setup slot and `reg_offset` the component.  These
    /// become fixed GRFs once the URB setup is placed after the CURB.
    Attr,

    /// An uninitialized or unused source
    Bad,
}

/// Element type of a register region
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum RegType {
    UD,
    D,
    UW,
    W,
    UB,
    B,
    F,
}

impl RegType {
    /// Size of one element in bytes
    pub fn size(&self) -> u32 {
        match self {
            RegType::UD | RegType::D | RegType::F => 4,
            RegType::UW | RegType::W => 2,
            RegType::UB | RegType::B => 1,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, RegType::F)
    }

    pub fn is_int(&self) -> bool {
        !self.is_float()
    }

    pub fn is_signed(&self) -> bool {
        matches!(self, RegType::D | RegType::W | RegType::B | RegType::F)
    }

    /// Returns true for the 32-bit integer types
    pub fn is_dword_int(&self) -> bool {
        matches!(self, RegType::D | RegType::UD)
    }

    /// The type encoding shared by Gen6 through Gen8
    pub fn hw_type(&self) -> u32 {
        match self {
            RegType::UD => 0,
            RegType::D => 1,
            RegType::UW => 2,
            RegType::W => 3,
            RegType::UB => 4,
            RegType::B => 5,
            RegType::F => 7,
        }
    }

    pub fn letters(&self) -> &'static str {
        match self {
            RegType::UD => "UD",
            RegType::D => "D",
            RegType::UW => "UW",
            RegType::W => "W",
            RegType::UB => "UB",
            RegType::B => "B",
            RegType::F => "F",
        }
    }
}

impl fmt::Display for RegType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letters())
    }
}

/// A register reference in the virtual IR
///
/// The meaning of `nr` depends on the file: the virtual register number for
/// VGRFs, the component index for uniforms, the hardware register number for
/// GRFs, MRFs and ARFs, and the setup slot for attributes.  `reg_offset` is
/// counted in whole registers except for uniforms and attributes where it
/// counts components.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct FsReg {
    pub file: RegFile,
    pub ty: RegType,
    pub nr: u32,
    pub reg_offset: u32,
    pub subreg_offset: u32,
    pub stride: u8,
    pub negate: bool,
    pub abs: bool,
    pub imm: u32,
}

impl FsReg {
    fn new(file: RegFile, nr: u32, ty: RegType) -> FsReg {
        FsReg {
            file: file,
            ty: ty,
            nr: nr,
            reg_offset: 0,
            subreg_offset: 0,
            stride: if file == RegFile::Uniform { 0 } else { 1 },
            negate: false,
            abs: false,
            imm: 0,
        }
    }

    pub fn bad() -> FsReg {
        FsReg::new(RegFile::Bad, 0, RegType::F)
    }

    pub fn vgrf(nr: u32, ty: RegType) -> FsReg {
        FsReg::new(RegFile::Vgrf, nr, ty)
    }

    pub fn uniform(nr: u32, ty: RegType) -> FsReg {
        FsReg::new(RegFile::Uniform, nr, ty)
    }

    pub fn grf(nr: u32, ty: RegType) -> FsReg {
        FsReg::new(RegFile::Grf, nr, ty)
    }

    /// A scalar region of a fixed GRF at the given element
    pub fn grf_scalar(nr: u32, elem: u32, ty: RegType) -> FsReg {
        let mut reg = FsReg::new(RegFile::Grf, nr, ty);
        reg.subreg_offset = elem * ty.size();
        reg.stride = 0;
        reg
    }

    pub fn mrf(nr: u32, ty: RegType) -> FsReg {
        FsReg::new(RegFile::Mrf, nr, ty)
    }

    pub fn attr(slot: u32, comp: u32, ty: RegType) -> FsReg {
        let mut reg = FsReg::new(RegFile::Attr, slot, ty);
        reg.reg_offset = comp;
        reg.stride = 0;
        reg
    }

    pub fn null(ty: RegType) -> FsReg {
        FsReg::new(RegFile::Arf, BRW_ARF_NULL, ty)
    }

    pub fn acc(ty: RegType) -> FsReg {
        FsReg::new(RegFile::Arf, BRW_ARF_ACCUMULATOR, ty)
    }

    /// The 16-bit flag subregister f0.`subreg`
    pub fn flag(subreg: u8) -> FsReg {
        let mut reg = FsReg::new(RegFile::Arf, BRW_ARF_FLAG, RegType::UW);
        reg.subreg_offset = u32::from(subreg) * 2;
        reg.stride = 0;
        reg
    }

    fn new_imm(ty: RegType, bits: u32) -> FsReg {
        let mut reg = FsReg::new(RegFile::Imm, 0, ty);
        reg.stride = 0;
        reg.imm = bits;
        reg
    }

    pub fn imm_f(f: f32) -> FsReg {
        FsReg::new_imm(RegType::F, f.to_bits())
    }

    pub fn imm_d(d: i32) -> FsReg {
        FsReg::new_imm(RegType::D, d as u32)
    }

    pub fn imm_ud(ud: u32) -> FsReg {
        FsReg::new_imm(RegType::UD, ud)
    }

    pub fn imm_uw(uw: u16) -> FsReg {
        FsReg::new_imm(RegType::UW, u32::from(uw))
    }

    pub fn imm_w(w: i16) -> FsReg {
        FsReg::new_imm(RegType::W, u32::from(w as u16))
    }

    pub fn retype(mut self, ty: RegType) -> FsReg {
        self.ty = ty;
        self
    }

    pub fn fneg(mut self) -> FsReg {
        if self.file == RegFile::Imm {
            return self.imm_negated();
        }
        self.negate = !self.negate;
        self
    }

    pub fn fabs(mut self) -> FsReg {
        if self.file == RegFile::Imm {
            return match self.ty {
                RegType::F => FsReg::imm_f(self.f32().abs()),
                RegType::D => FsReg::imm_d(self.i32().wrapping_abs()),
                _ => self,
            };
        }
        self.abs = true;
        self.negate = false;
        self
    }

    pub fn with_stride(mut self, stride: u8) -> FsReg {
        self.stride = stride;
        self
    }

    /// Broadcasts element `elem` of the register
    pub fn smear(mut self, elem: u32) -> FsReg {
        assert!(self.file != RegFile::Imm);
        self.subreg_offset = elem * self.ty.size();
        self.stride = 0;
        self
    }

    /// Advances the register by `delta` registers (components for uniforms
    /// and attributes)
    pub fn offset(mut self, delta: u32) -> FsReg {
        match self.file {
            RegFile::Bad | RegFile::Imm | RegFile::Arf => (),
            RegFile::Grf | RegFile::Mrf => self.nr += delta,
            RegFile::Vgrf | RegFile::Uniform | RegFile::Attr => {
                self.reg_offset += delta
            }
        }
        self
    }

    /// Advances the register by `chans` channels of its own region
    pub fn horiz_offset(mut self, chans: u32) -> FsReg {
        match self.file {
            RegFile::Bad | RegFile::Imm | RegFile::Uniform | RegFile::Arf => {
                self
            }
            _ => {
                if self.stride == 0 {
                    return self;
                }
                let bytes = self.subreg_offset
                    + chans * u32::from(self.stride) * self.ty.size();
                let regs = bytes / REG_SIZE;
                self.subreg_offset = bytes % REG_SIZE;
                self.offset(regs)
            }
        }
    }

    pub fn is_null(&self) -> bool {
        self.file == RegFile::Arf && self.nr == BRW_ARF_NULL
    }

    pub fn is_accumulator(&self) -> bool {
        self.file == RegFile::Arf && self.nr == BRW_ARF_ACCUMULATOR
    }

    pub fn is_imm(&self) -> bool {
        self.file == RegFile::Imm
    }

    pub fn is_vgrf(&self) -> bool {
        self.file == RegFile::Vgrf
    }

    pub fn is_contiguous(&self) -> bool {
        self.stride == 1
    }

    pub fn f32(&self) -> f32 {
        f32::from_bits(self.imm)
    }

    pub fn i32(&self) -> i32 {
        self.imm as i32
    }

    pub fn u32(&self) -> u32 {
        self.imm
    }

    pub fn is_zero(&self) -> bool {
        if self.file != RegFile::Imm {
            return false;
        }
        match self.ty {
            RegType::F => self.f32() == 0.0,
            _ => self.imm == 0,
        }
    }

    pub fn is_one(&self) -> bool {
        if self.file != RegFile::Imm {
            return false;
        }
        match self.ty {
            RegType::F => self.f32() == 1.0,
            _ => self.imm == 1,
        }
    }

    pub fn is_negative_one(&self) -> bool {
        if self.file != RegFile::Imm {
            return false;
        }
        match self.ty {
            RegType::F => self.f32() == -1.0,
            RegType::D => self.i32() == -1,
            RegType::W => self.imm as u16 as i16 == -1,
            _ => false,
        }
    }

    fn imm_negated(self) -> FsReg {
        match self.ty {
            RegType::F => FsReg::imm_f(-self.f32()),
            RegType::D | RegType::UD => {
                FsReg::new_imm(self.ty, self.i32().wrapping_neg() as u32)
            }
            RegType::W | RegType::UW => FsReg::new_imm(
                self.ty,
                u32::from((self.imm as u16 as i16).wrapping_neg() as u16),
            ),
            _ => panic!("Cannot negate a byte immediate"),
        }
    }

    /// Size in bytes of one channel-group component at the given width
    pub fn component_size(&self, width: u8) -> u32 {
        std::cmp::max(u32::from(width) * u32::from(self.stride), 1)
            * self.ty.size()
    }

    /// Returns true if `[self, self + self_regs)` and `[other, other +
    /// other_regs)` touch a common register
    pub fn regions_overlap(
        &self,
        self_regs: u32,
        other: &FsReg,
        other_regs: u32,
    ) -> bool {
        if self.file != other.file || self.nr != other.nr {
            return false;
        }
        match self.file {
            RegFile::Vgrf | RegFile::Uniform | RegFile::Attr => {
                self.reg_offset < other.reg_offset + other_regs
                    && other.reg_offset < self.reg_offset + self_regs
            }
            _ => true,
        }
    }

    /// Returns true if `self` lies within the `n` registers starting at `r`
    pub fn in_range(&self, r: &FsReg, n: u32) -> bool {
        self.file == r.file
            && self.nr == r.nr
            && self.reg_offset >= r.reg_offset
            && self.reg_offset < r.reg_offset + n
    }

    /// Compares everything but the source modifiers and type
    pub fn same_location(&self, other: &FsReg) -> bool {
        self.file == other.file
            && self.nr == other.nr
            && self.reg_offset == other.reg_offset
            && self.subreg_offset == other.subreg_offset
            && self.stride == other.stride
    }
}

impl fmt::Display for FsReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negate {
            write!(f, "-")?;
        }
        if self.abs {
            write!(f, "|")?;
        }
        match self.file {
            RegFile::Vgrf => {
                write!(f, "vgrf{}", self.nr)?;
                if self.reg_offset != 0 || self.subreg_offset != 0 {
                    write!(f, "+{}.{}", self.reg_offset, self.subreg_offset)?;
                }
            }
            RegFile::Uniform => {
                write!(f, "u{}", self.nr + self.reg_offset)?;
                if self.subreg_offset != 0 {
                    write!(f, "+{}", self.subreg_offset)?;
                }
            }
            RegFile::Imm => match self.ty {
                RegType::F => write!(f, "{:?}f", self.f32())?,
                RegType::D | RegType::W | RegType::B => {
                    write!(f, "{}d", self.i32())?
                }
                _ => write!(f, "{}u", self.imm)?,
            },
            RegFile::Grf => {
                write!(f, "g{}", self.nr)?;
                if self.subreg_offset != 0 {
                    write!(f, ".{}", self.subreg_offset / self.ty.size())?;
                }
            }
            RegFile::Arf => match self.nr {
                BRW_ARF_NULL => write!(f, "null")?,
                BRW_ARF_ACCUMULATOR => write!(f, "acc0")?,
                BRW_ARF_FLAG => write!(f, "f0.{}", self.subreg_offset / 2)?,
                nr => write!(f, "arf{}", nr)?,
            },
            RegFile::Mrf => write!(f, "m{}", self.nr)?,
            RegFile::Attr => {
                write!(f, "attr{}.{}", self.nr, self.reg_offset)?
            }
            RegFile::Bad => write!(f, "(null)")?,
        }
        if self.abs {
            write!(f, "|")?;
        }
        if self.file != RegFile::Imm && self.file != RegFile::Bad {
            write!(f, ":{}", self.ty)?;
        }
        Ok(())
    }
}

/// Conditional modifier
///
/// For math opcodes the same field holds the math function, which the IR
/// keeps in the opcode instead.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum CondMod {
    None = 0,
    Z = 1,
    NZ = 2,
    G = 3,
    GE = 4,
    L = 5,
    LE = 6,
    O = 8,
    U = 9,
}

impl CondMod {
    pub fn is_none(&self) -> bool {
        *self == CondMod::None
    }

    /// The modifier which tests the same relation with swapped operands
    ///
    /// Used when the compared source carries a negate: `-x > 0` is `x < 0`.
    pub fn swap(&self) -> CondMod {
        match self {
            CondMod::G => CondMod::L,
            CondMod::GE => CondMod::LE,
            CondMod::L => CondMod::G,
            CondMod::LE => CondMod::GE,
            c => *c,
        }
    }

    /// The modifier testing the logical inverse
    pub fn negate(&self) -> CondMod {
        match self {
            CondMod::Z => CondMod::NZ,
            CondMod::NZ => CondMod::Z,
            CondMod::G => CondMod::LE,
            CondMod::GE => CondMod::L,
            CondMod::L => CondMod::GE,
            CondMod::LE => CondMod::G,
            c => panic!("Cannot negate condition {:?}", c),
        }
    }

    pub fn hw_encoding(&self) -> u32 {
        *self as u32
    }
}

impl fmt::Display for CondMod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CondMod::None => "",
            CondMod::Z => ".z",
            CondMod::NZ => ".nz",
            CondMod::G => ".g",
            CondMod::GE => ".ge",
            CondMod::L => ".l",
            CondMod::LE => ".le",
            CondMod::O => ".o",
            CondMod::U => ".u",
        };
        write!(f, "{}", s)
    }
}

/// Predication control
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Predicate {
    None,
    Normal,
    /// Any channel of each group of eight
    Any8h,
    /// Any channel of each group of sixteen
    Any16h,
}

impl Predicate {
    pub fn is_none(&self) -> bool {
        *self == Predicate::None
    }

    pub fn hw_encoding(&self) -> u32 {
        match self {
            Predicate::None => 0,
            Predicate::Normal => 1,
            Predicate::Any8h => 8,
            Predicate::Any16h => 10,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, OpcodeInfo)]
pub enum Opcode {
    #[op(hw = 1, cmod)]
    Mov,
    #[op(hw = 2)]
    Sel,
    #[op(hw = 4, cmod)]
    Not,
    #[op(hw = 5, cmod, commutative)]
    And,
    #[op(hw = 6, cmod, commutative)]
    Or,
    #[op(hw = 7, cmod, commutative)]
    Xor,
    #[op(hw = 8, cmod)]
    Shr,
    #[op(hw = 9, cmod)]
    Shl,
    #[op(hw = 12, cmod)]
    Asr,
    #[op(hw = 16, cmod)]
    Cmp,
    #[op(hw = 23)]
    Bfrev,
    #[op(hw = 24, three_src)]
    Bfe,
    #[op(hw = 25)]
    Bfi1,
    #[op(hw = 26, three_src)]
    Bfi2,
    #[op(hw = 34, control_flow)]
    If,
    #[op(hw = 36, control_flow)]
    Else,
    #[op(hw = 37, control_flow)]
    Endif,
    #[op(hw = 38, control_flow)]
    Do,
    #[op(hw = 39, control_flow)]
    While,
    #[op(hw = 40, control_flow)]
    Break,
    #[op(hw = 41, control_flow)]
    Continue,
    #[op(hw = 42, control_flow)]
    Halt,
    #[op(hw = 64, cmod, commutative)]
    Add,
    #[op(hw = 65, cmod, commutative)]
    Mul,
    #[op(hw = 67, cmod)]
    Frc,
    #[op(hw = 68, cmod)]
    Rndu,
    #[op(hw = 69, cmod)]
    Rndd,
    #[op(hw = 70, cmod)]
    Rnde,
    #[op(hw = 71, cmod)]
    Rndz,
    #[op(hw = 72, cmod)]
    Mac,
    #[op(hw = 73, cmod)]
    Mach,
    #[op(hw = 74, cmod)]
    Lzd,
    #[op(hw = 75)]
    Fbh,
    #[op(hw = 76)]
    Fbl,
    #[op(hw = 77)]
    Cbit,
    #[op(hw = 89, cmod)]
    Line,
    #[op(hw = 90, cmod)]
    Pln,
    #[op(hw = 91, cmod, three_src)]
    Mad,
    #[op(hw = 92, cmod, three_src)]
    Lrp,
    #[op(hw = 126)]
    Nop,

    #[op(name = "rcp", math = 1)]
    Rcp,
    #[op(name = "log2", math = 2)]
    Log2,
    #[op(name = "exp2", math = 3)]
    Exp2,
    #[op(name = "sqrt", math = 4)]
    Sqrt,
    #[op(name = "rsq", math = 5)]
    Rsq,
    #[op(name = "sin", math = 6)]
    Sin,
    #[op(name = "cos", math = 7)]
    Cos,
    #[op(name = "pow", math = 10)]
    Pow,
    #[op(name = "int_quotient", math = 12)]
    IntQuotient,
    #[op(name = "int_remainder", math = 13)]
    IntRemainder,

    #[op(name = "mulh")]
    Mulh,
    #[op(name = "load_payload")]
    LoadPayload,
    #[op(name = "ddx")]
    Ddx,
    #[op(name = "ddy")]
    Ddy,
    #[op(name = "pixel_x")]
    PixelX,
    #[op(name = "pixel_y")]
    PixelY,
    #[op(name = "cinterp")]
    Cinterp,
    #[op(name = "linterp")]
    Linterp,
    #[op(name = "discard_jump", control_flow)]
    DiscardJump,
    #[op(name = "placeholder_halt", control_flow)]
    PlaceholderHalt,
    #[op(name = "mov_dispatch_to_flags")]
    MovDispatchToFlags,

    #[op(name = "fb_write_logical", logical, side_effects)]
    FbWriteLogical,
    #[op(name = "tex_logical", logical, tex, send)]
    TexLogical,
    #[op(name = "txb_logical", logical, tex, send)]
    TxbLogical,
    #[op(name = "txl_logical", logical, tex, send)]
    TxlLogical,
    #[op(name = "txd_logical", logical, tex, send)]
    TxdLogical,
    #[op(name = "txf_logical", logical, tex, send)]
    TxfLogical,
    #[op(name = "txs_logical", logical, tex, send)]
    TxsLogical,
    #[op(name = "lod_logical", logical, tex, send)]
    LodLogical,
    #[op(name = "tg4_logical", logical, tex, send)]
    Tg4Logical,
    #[op(name = "tg4_offset_logical", logical, tex, send)]
    Tg4OffsetLogical,
    #[op(name = "untyped_surface_read_logical", logical, send)]
    UntypedSurfaceReadLogical,
    #[op(name = "untyped_surface_write_logical", logical, send, side_effects)]
    UntypedSurfaceWriteLogical,
    #[op(name = "typed_surface_read_logical", logical, send)]
    TypedSurfaceReadLogical,
    #[op(name = "typed_surface_write_logical", logical, send, side_effects)]
    TypedSurfaceWriteLogical,

    #[op(name = "fb_write", send, side_effects)]
    FbWrite,
    #[op(name = "tex", tex, send)]
    Tex,
    #[op(name = "txb", tex, send)]
    Txb,
    #[op(name = "txl", tex, send)]
    Txl,
    #[op(name = "txd", tex, send)]
    Txd,
    #[op(name = "txf", tex, send)]
    Txf,
    #[op(name = "txs", tex, send)]
    Txs,
    #[op(name = "lod", tex, send)]
    Lod,
    #[op(name = "tg4", tex, send)]
    Tg4,
    #[op(name = "tg4_offset", tex, send)]
    Tg4Offset,
    #[op(name = "untyped_surface_read", send)]
    UntypedSurfaceRead,
    #[op(name = "untyped_surface_write", send, side_effects)]
    UntypedSurfaceWrite,
    #[op(name = "typed_surface_read", send)]
    TypedSurfaceRead,
    #[op(name = "typed_surface_write", send, side_effects)]
    TypedSurfaceWrite,
    #[op(name = "scratch_read", send)]
    ScratchRead,
    #[op(name = "scratch_write", send, side_effects)]
    ScratchWrite,
    #[op(name = "gen7_scratch_read", send)]
    Gen7ScratchRead,
    #[op(name = "uniform_pull_const", send)]
    UniformPullConstantLoad,
    #[op(name = "uniform_pull_const_gen7", send)]
    UniformPullConstantLoadGen7,
}

impl Opcode {
    /// Maps a texturing opcode between its logical and physical forms
    pub fn tex_physical(&self) -> Option<Opcode> {
        Some(match self {
            Opcode::TexLogical => Opcode::Tex,
            Opcode::TxbLogical => Opcode::Txb,
            Opcode::TxlLogical => Opcode::Txl,
            Opcode::TxdLogical => Opcode::Txd,
            Opcode::TxfLogical => Opcode::Txf,
            Opcode::TxsLogical => Opcode::Txs,
            Opcode::LodLogical => Opcode::Lod,
            Opcode::Tg4Logical => Opcode::Tg4,
            Opcode::Tg4OffsetLogical => Opcode::Tg4Offset,
            _ => return None,
        })
    }

    pub fn is_surface_access(&self) -> bool {
        matches!(
            self,
            Opcode::UntypedSurfaceRead
                | Opcode::UntypedSurfaceWrite
                | Opcode::TypedSurfaceRead
                | Opcode::TypedSurfaceWrite
        )
    }
}

/// Source slots of FB_WRITE_LOGICAL
pub const FB_WRITE_LOGICAL_SRC_COLOR0: usize = 0;
pub const FB_WRITE_LOGICAL_SRC_COLOR1: usize = 1;
pub const FB_WRITE_LOGICAL_SRC_SRC0_ALPHA: usize = 2;
pub const FB_WRITE_LOGICAL_SRC_SRC_DEPTH: usize = 3;
pub const FB_WRITE_LOGICAL_SRC_DST_DEPTH: usize = 4;
pub const FB_WRITE_LOGICAL_SRC_COMPONENTS: usize = 5;
pub const FB_WRITE_LOGICAL_NUM_SRCS: usize = 6;

/// Source slots of the texturing logical opcodes
pub const TEX_LOGICAL_SRC_COORDINATE: usize = 0;
pub const TEX_LOGICAL_SRC_SHADOW_C: usize = 1;
pub const TEX_LOGICAL_SRC_LOD: usize = 2;
pub const TEX_LOGICAL_SRC_LOD2: usize = 3;
pub const TEX_LOGICAL_SRC_SAMPLER: usize = 4;
pub const TEX_LOGICAL_SRC_OFFSET_VALUE: usize = 5;
pub const TEX_LOGICAL_SRC_COORD_COMPONENTS: usize = 6;
pub const TEX_LOGICAL_SRC_GRAD_COMPONENTS: usize = 7;
pub const TEX_LOGICAL_NUM_SRCS: usize = 8;

/// Source slots of the surface access logical opcodes
pub const SURFACE_LOGICAL_SRC_ADDRESS: usize = 0;
pub const SURFACE_LOGICAL_SRC_DATA: usize = 1;
pub const SURFACE_LOGICAL_SRC_SURFACE: usize = 2;
pub const SURFACE_LOGICAL_SRC_DIMS: usize = 3;
pub const SURFACE_LOGICAL_SRC_ARG: usize = 4;
pub const SURFACE_LOGICAL_NUM_SRCS: usize = 5;

pub type SrcList = SmallVec<[FsReg; 4]>;

#[derive(Clone, Debug, PartialEq)]
pub struct Instr {
    pub opcode: Opcode,
    pub dst: FsReg,
    pub srcs: SrcList,
    pub exec_size: u8,
    /// First channel covered by this instruction
    pub group: u8,
    pub predicate: Predicate,
    pub predicate_inverse: bool,
    pub cmod: CondMod,
    pub flag_subreg: u8,
    pub saturate: bool,
    pub force_writemask_all: bool,
    pub eot: bool,
    pub header_size: u8,
    pub mlen: u8,
    /// Response length of a message, in registers
    pub rlen: u8,
    pub base_mrf: Option<u32>,
    pub target: u32,
    pub offset: u32,
    pub shadow_compare: bool,
}

impl Instr {
    pub fn new(
        opcode: Opcode,
        exec_size: u8,
        dst: FsReg,
        srcs: &[FsReg],
    ) -> Instr {
        Instr {
            opcode: opcode,
            dst: dst,
            srcs: srcs.iter().copied().collect(),
            exec_size: exec_size,
            group: 0,
            predicate: Predicate::None,
            predicate_inverse: false,
            cmod: CondMod::None,
            flag_subreg: 0,
            saturate: false,
            force_writemask_all: false,
            eot: false,
            header_size: 0,
            mlen: 0,
            rlen: 0,
            base_mrf: None,
            target: 0,
            offset: 0,
            shadow_compare: false,
        }
    }

    pub fn new_boxed(
        opcode: Opcode,
        exec_size: u8,
        dst: FsReg,
        srcs: &[FsReg],
    ) -> Box<Instr> {
        Box::new(Instr::new(opcode, exec_size, dst, srcs))
    }

    pub fn new_mov(exec_size: u8, dst: FsReg, src: FsReg) -> Instr {
        Instr::new(Opcode::Mov, exec_size, dst, &[src])
    }

    /// Number of registers this instruction writes through its destination
    pub fn regs_written(&self) -> u32 {
        if self.opcode.is_send() {
            return u32::from(self.rlen);
        }

        if self.opcode == Opcode::LoadPayload {
            return (0..self.srcs.len())
                .map(|i| {
                    if i < usize::from(self.header_size) {
                        1
                    } else {
                        (u32::from(self.exec_size) * 4).div_ceil(REG_SIZE)
                    }
                })
                .sum();
        }

        match self.dst.file {
            RegFile::Vgrf | RegFile::Grf | RegFile::Mrf => {
                let bytes = self.dst.subreg_offset
                    + u32::from(self.exec_size)
                        * u32::from(std::cmp::max(self.dst.stride, 1))
                        * self.dst.ty.size();
                bytes.div_ceil(REG_SIZE)
            }
            _ => 0,
        }
    }

    /// Number of logical components read from source `i`
    pub fn components_read(&self, i: usize) -> u32 {
        match self.opcode {
            Opcode::Linterp => {
                if i == 0 {
                    2
                } else {
                    1
                }
            }
            Opcode::FbWriteLogical => {
                if i < 2 {
                    self.srcs[FB_WRITE_LOGICAL_SRC_COMPONENTS].u32()
                } else {
                    1
                }
            }
            Opcode::UntypedSurfaceReadLogical
            | Opcode::TypedSurfaceReadLogical => match i {
                SURFACE_LOGICAL_SRC_ADDRESS => {
                    self.srcs[SURFACE_LOGICAL_SRC_DIMS].u32()
                }
                SURFACE_LOGICAL_SRC_DATA => 0,
                _ => 1,
            },
            Opcode::UntypedSurfaceWriteLogical
            | Opcode::TypedSurfaceWriteLogical => match i {
                SURFACE_LOGICAL_SRC_ADDRESS => {
                    self.srcs[SURFACE_LOGICAL_SRC_DIMS].u32()
                }
                SURFACE_LOGICAL_SRC_DATA => {
                    self.srcs[SURFACE_LOGICAL_SRC_ARG].u32()
                }
                _ => 1,
            },
            op if op.is_tex() && op.is_logical() => match i {
                TEX_LOGICAL_SRC_COORDINATE => {
                    self.srcs[TEX_LOGICAL_SRC_COORD_COMPONENTS].u32()
                }
                TEX_LOGICAL_SRC_LOD | TEX_LOGICAL_SRC_LOD2
                    if op == Opcode::TxdLogical =>
                {
                    self.srcs[TEX_LOGICAL_SRC_GRAD_COMPONENTS].u32()
                }
                TEX_LOGICAL_SRC_OFFSET_VALUE => 2,
                _ => 1,
            },
            _ => 1,
        }
    }

    /// Number of registers read from source `i`
    pub fn regs_read(&self, i: usize) -> u32 {
        match self.opcode {
            Opcode::FbWrite
            | Opcode::UntypedSurfaceRead
            | Opcode::UntypedSurfaceWrite
            | Opcode::TypedSurfaceRead
            | Opcode::TypedSurfaceWrite
                if i == 0 =>
            {
                return u32::from(self.mlen);
            }
            Opcode::UniformPullConstantLoadGen7 if i == 1 => {
                return u32::from(self.mlen);
            }
            Opcode::ScratchWrite if i == 0 && self.base_mrf.is_none() => {
                return u32::from(self.mlen);
            }
            Opcode::Linterp if i == 1 => return 1,
            Opcode::LoadPayload if i < usize::from(self.header_size) => {
                return 1;
            }
            op if op.is_tex()
                && !op.is_logical()
                && i == 0
                && self.srcs[0].file == RegFile::Vgrf =>
            {
                return u32::from(self.mlen);
            }
            _ => (),
        }

        let src = &self.srcs[i];
        match src.file {
            RegFile::Bad | RegFile::Arf => 0,
            RegFile::Uniform | RegFile::Imm => 1,
            RegFile::Vgrf | RegFile::Grf | RegFile::Attr | RegFile::Mrf => {
                let bytes = src.subreg_offset % REG_SIZE
                    + self.components_read(i)
                        * src.component_size(self.exec_size);
                bytes.div_ceil(REG_SIZE)
            }
        }
    }

    /// Returns true if the instruction may leave part of its destination
    /// untouched
    pub fn is_partial_write(&self) -> bool {
        (!self.predicate.is_none() && self.opcode != Opcode::Sel)
            || u32::from(self.exec_size) * self.dst.ty.size() < REG_SIZE
            || !self.dst.is_contiguous()
    }

    pub fn overwrites_reg(&self, reg: &FsReg) -> bool {
        reg.in_range(&self.dst, self.regs_written())
    }

    pub fn reads_flag(&self) -> bool {
        !self.predicate.is_none()
    }

    pub fn writes_flag(&self) -> bool {
        (!self.cmod.is_none()
            && !matches!(
                self.opcode,
                Opcode::Sel | Opcode::If | Opcode::While
            ))
            || self.opcode == Opcode::MovDispatchToFlags
    }

    /// Returns true if the instruction has effects besides its destination
    pub fn has_side_effects(&self) -> bool {
        self.eot || self.opcode.has_side_effects()
    }

    /// Returns true if DCE may delete this instruction when its result is
    /// unused
    pub fn can_eliminate(&self) -> bool {
        !self.has_side_effects()
            && !self.writes_flag()
            && !self.opcode.is_control_flow()
    }

    /// Returns true if this message takes its payload from a GRF
    pub fn is_send_from_grf(&self) -> bool {
        match self.opcode {
            Opcode::UntypedSurfaceRead
            | Opcode::UntypedSurfaceWrite
            | Opcode::TypedSurfaceRead
            | Opcode::TypedSurfaceWrite => true,
            Opcode::UniformPullConstantLoadGen7 => true,
            Opcode::ScratchWrite => self.base_mrf.is_none(),
            Opcode::FbWrite => {
                self.srcs.first().is_some_and(|s| s.file == RegFile::Vgrf)
            }
            op if op.is_tex() && !op.is_logical() => {
                self.srcs[0].file == RegFile::Vgrf
            }
            _ => false,
        }
    }

    /// Returns true if this instruction accepts negate/abs on its sources
    pub fn can_do_source_mods(&self, gen: u32) -> bool {
        if gen == 6 && self.opcode.is_math() {
            return false;
        }
        if self.is_send_from_grf() || self.opcode.is_send() {
            return false;
        }
        !matches!(
            self.opcode,
            Opcode::And
                | Opcode::Or
                | Opcode::Xor
                | Opcode::Not
                | Opcode::Shr
                | Opcode::Shl
                | Opcode::Asr
                | Opcode::Bfrev
                | Opcode::Bfe
                | Opcode::Bfi1
                | Opcode::Bfi2
                | Opcode::Fbh
                | Opcode::Fbl
                | Opcode::Cbit
                | Opcode::LoadPayload
                | Opcode::Mulh
        )
    }

    /// Returns true if the hardware writes the accumulator as a side effect
    pub fn writes_accumulator_implicitly(&self) -> bool {
        self.dst.is_accumulator()
            || matches!(self.opcode, Opcode::Mach | Opcode::Mulh)
    }

    pub fn reads_accumulator_implicitly(&self) -> bool {
        matches!(self.opcode, Opcode::Mac | Opcode::Mach | Opcode::Mulh)
    }

    /// Number of MRFs starting at `base_mrf` the generated code for this
    /// message writes on top of the explicit payload
    pub fn implied_mrf_writes(&self) -> u32 {
        if self.mlen == 0 || self.base_mrf.is_none() {
            return 0;
        }
        match self.opcode {
            Opcode::FbWrite => 2,
            Opcode::UniformPullConstantLoad | Opcode::ScratchRead => 1,
            Opcode::ScratchWrite => u32::from(self.mlen),
            op if op.is_surface_access() => 0,
            op if op.is_tex() => 1,
            _ => u32::from(self.mlen),
        }
    }

    /// Returns true if `other` computes exactly the same value
    pub fn equals(&self, other: &Instr) -> bool {
        self.opcode == other.opcode
            && self.dst == other.dst
            && self.srcs == other.srcs
            && self.saturate == other.saturate
            && self.predicate == other.predicate
            && self.cmod == other.cmod
            && self.mlen == other.mlen
            && self.base_mrf == other.base_mrf
            && self.target == other.target
            && self.eot == other.eot
            && self.header_size == other.header_size
            && self.shadow_compare == other.shadow_compare
            && self.exec_size == other.exec_size
            && self.offset == other.offset
    }

    /// Returns true if this LOAD_PAYLOAD is a plain copy of one whole VGRF
    pub fn is_copy_payload(&self, alloc: &VirtualGrfs) -> bool {
        if self.opcode != Opcode::LoadPayload {
            return false;
        }

        let mut reg = self.srcs[0];
        if reg.file != RegFile::Vgrf || reg.reg_offset != 0 || reg.stride == 0
        {
            return false;
        }

        if alloc.size(reg.nr) != self.regs_written() {
            return false;
        }

        for (i, src) in self.srcs.iter().enumerate() {
            reg.ty = src.ty;
            if *src != reg {
                return false;
            }
            if i < usize::from(self.header_size) {
                reg.reg_offset += 1;
            } else {
                reg.reg_offset += u32::from(self.exec_size) / 8;
            }
        }
        true
    }

    pub fn is_control_flow(&self) -> bool {
        self.opcode.is_control_flow()
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.predicate.is_none() {
            let inv = if self.predicate_inverse { '-' } else { '+' };
            write!(f, "({}f0.{}) ", inv, self.flag_subreg)?;
        }
        write!(f, "{}", self.opcode)?;
        if self.saturate {
            write!(f, ".sat")?;
        }
        if !self.cmod.is_none() {
            write!(f, "{}", self.cmod)?;
            if self.writes_flag() && self.predicate.is_none() {
                write!(f, ".f0.{}", self.flag_subreg)?;
            }
        }
        write!(f, "({}) ", self.exec_size)?;
        if self.mlen > 0 {
            write!(f, "(mlen: {}) ", self.mlen)?;
        }
        write!(f, "{}", self.dst)?;
        for src in &self.srcs {
            if src.file != RegFile::Bad {
                write!(f, ", {}", src)?;
            }
        }
        if self.group > 0 {
            write!(f, " group{}", self.group)?;
        }
        if self.force_writemask_all {
            write!(f, " NoMask")?;
        }
        if self.eot {
            write!(f, " EOT")?;
        }
        Ok(())
    }
}

/// The result of map() done on a Box<Instr>. A Vec is only allocated if the
/// mapping results in multiple instructions.
pub enum MappedInstrs {
    None,
    One(Box<Instr>),
    Many(Vec<Box<Instr>>),
}

impl MappedInstrs {
    pub fn push(&mut self, i: Box<Instr>) {
        match self {
            MappedInstrs::None => {
                *self = MappedInstrs::One(i);
            }
            MappedInstrs::One(_) => {
                *self = match std::mem::replace(self, MappedInstrs::None) {
                    MappedInstrs::One(o) => MappedInstrs::Many(vec![o, i]),
                    _ => panic!("Not a One"),
                };
            }
            MappedInstrs::Many(v) => {
                v.push(i);
            }
        }
    }

    pub fn last_mut(&mut self) -> Option<&mut Box<Instr>> {
        match self {
            MappedInstrs::None => None,
            MappedInstrs::One(i) => Some(i),
            MappedInstrs::Many(v) => v.last_mut(),
        }
    }
}

/// Sizes of the virtual GRFs, in registers
#[derive(Clone, Debug, Default)]
pub struct VirtualGrfs {
    pub sizes: Vec<u32>,
}

impl VirtualGrfs {
    pub fn new() -> VirtualGrfs {
        VirtualGrfs { sizes: Vec::new() }
    }

    pub fn allocate(&mut self, size: u32) -> u32 {
        assert!(size > 0);
        let nr = self.sizes.len() as u32;
        self.sizes.push(size);
        nr
    }

    pub fn count(&self) -> u32 {
        self.sizes.len() as u32
    }

    pub fn size(&self, nr: u32) -> u32 {
        self.sizes[nr as usize]
    }

    pub fn total_size(&self) -> u32 {
        self.sizes.iter().sum()
    }
}

/// A fragment shader being compiled at one dispatch width
pub struct Shader {
    pub dispatch_width: u8,
    pub instrs: Vec<Box<Instr>>,
    pub alloc: VirtualGrfs,

    /// Number of uniform components referenced by the program
    pub uniforms: u32,
    /// Caller-side parameter index for every uniform component
    pub param: Vec<u32>,
    pub push_constant_loc: Vec<Option<u32>>,
    pub pull_constant_loc: Vec<Option<u32>>,

    pub payload: ThreadPayload,
    pub first_non_payload_grf: u32,
    pub max_grf: u32,
    pub grf_used: u32,
    pub last_scratch: u32,
    pub spilled_any_registers: bool,
    /// VGRFs numbered from here on were created by spilling
    pub spill_temps_start: Option<u32>,

    pub error: Option<CompileError>,
    pub simd16_unsupported: bool,
    pub no16_msg: Option<String>,
}

impl Shader {
    pub fn new(dispatch_width: u8) -> Shader {
        assert!(dispatch_width == 8 || dispatch_width == 16);
        Shader {
            dispatch_width: dispatch_width,
            instrs: Vec::new(),
            alloc: VirtualGrfs::new(),
            uniforms: 0,
            param: Vec::new(),
            push_constant_loc: Vec::new(),
            pull_constant_loc: Vec::new(),
            payload: ThreadPayload::default(),
            first_non_payload_grf: 0,
            max_grf: MAX_GRF,
            grf_used: 0,
            last_scratch: 0,
            spilled_any_registers: false,
            spill_temps_start: None,
            error: None,
            simd16_unsupported: false,
            no16_msg: None,
        }
    }

    /// Records a compile failure.  The first failure wins.
    pub fn fail(&mut self, msg: impl Into<String>) {
        self.fail_with(CompileError::Unsupported(msg.into()));
    }

    pub fn fail_with(&mut self, err: CompileError) {
        if self.error.is_some() {
            return;
        }
        debug!("SIMD{} {}", self.dispatch_width, err);
        self.error = Some(err);
    }

    pub fn failed(&self) -> bool {
        self.error.is_some()
    }

    /// Marks a construct the SIMD16 compile cannot handle
    pub fn no16(&mut self, msg: &str) {
        if self.dispatch_width == 16 {
            self.fail_with(CompileError::Simd16Unsupported(msg.to_string()));
        } else {
            self.simd16_unsupported = true;
            if self.no16_msg.is_none() {
                self.no16_msg = Some(msg.to_string());
            }
        }
    }

    pub fn vgrf(&mut self, ty: RegType, components: u32) -> FsReg {
        let regs = components * u32::from(self.dispatch_width) / 8;
        FsReg::vgrf(self.alloc.allocate(regs), ty)
    }

    pub fn map_instrs<F: FnMut(Box<Instr>, &mut VirtualGrfs) -> MappedInstrs>(
        &mut self,
        mut map: F,
    ) {
        let mut instrs = Vec::with_capacity(self.instrs.len());
        for i in self.instrs.drain(..) {
            match map(i, &mut self.alloc) {
                MappedInstrs::None => (),
                MappedInstrs::One(i) => {
                    instrs.push(i);
                }
                MappedInstrs::Many(mut v) => {
                    instrs.append(&mut v);
                }
            }
        }
        self.instrs = instrs;
    }

    /// Removes the instructions at the given sorted indices
    pub fn remove_instrs(&mut self, ips: &[usize]) {
        if ips.is_empty() {
            return;
        }
        let mut next = ips.iter().peekable();
        let mut ip = 0;
        self.instrs.retain(|_| {
            let keep = next.peek() != Some(&&ip);
            if !keep {
                next.next();
            }
            ip += 1;
            keep
        });
    }

    /// Applies `f` to every register referenced by the program
    pub fn for_each_reg_mut(&mut self, mut f: impl FnMut(&mut FsReg)) {
        for instr in &mut self.instrs {
            f(&mut instr.dst);
            for src in instr.srcs.iter_mut() {
                f(src);
            }
        }
    }
}

impl fmt::Display for Shader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "SIMD{} shader {{", self.dispatch_width)?;
        for (ip, instr) in self.instrs.iter().enumerate() {
            writeln!(f, "{:4}: {}", ip, instr)?;
        }
        writeln!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regs_written_by_width() {
        let dst = FsReg::vgrf(0, RegType::F);
        let i = Instr::new(Opcode::Add, 8, dst, &[dst, dst]);
        assert_eq!(i.regs_written(), 1);

        let i = Instr::new(Opcode::Add, 16, dst, &[dst, dst]);
        assert_eq!(i.regs_written(), 2);

        let i = Instr::new(Opcode::Mov, 16, dst.retype(RegType::UW), &[dst]);
        assert_eq!(i.regs_written(), 1);

        let i = Instr::new(Opcode::Cmp, 8, FsReg::null(RegType::F), &[dst, dst]);
        assert_eq!(i.regs_written(), 0);
    }

    #[test]
    fn send_regs_use_message_lengths() {
        let dst = FsReg::vgrf(0, RegType::F);
        let payload = FsReg::vgrf(1, RegType::F);
        let mut tex =
            Instr::new(Opcode::Tex, 8, dst, &[payload, FsReg::imm_ud(0)]);
        tex.mlen = 3;
        tex.rlen = 4;
        assert_eq!(tex.regs_written(), 4);
        assert_eq!(tex.regs_read(0), 3);
        assert_eq!(tex.regs_read(1), 1);
        assert!(tex.is_send_from_grf());
        assert!(!tex.can_do_source_mods(7));
    }

    #[test]
    fn partial_writes() {
        let dst = FsReg::vgrf(0, RegType::F);
        let mut i = Instr::new(Opcode::Mov, 8, dst, &[FsReg::imm_f(1.0)]);
        assert!(!i.is_partial_write());

        i.predicate = Predicate::Normal;
        assert!(i.is_partial_write());

        i.opcode = Opcode::Sel;
        assert!(!i.is_partial_write());

        let i = Instr::new(
            Opcode::Mov,
            8,
            dst.retype(RegType::UW),
            &[FsReg::imm_uw(1)],
        );
        assert!(i.is_partial_write());
    }

    #[test]
    fn cond_mod_swap_and_negate() {
        assert_eq!(CondMod::GE.swap(), CondMod::LE);
        assert_eq!(CondMod::L.swap(), CondMod::G);
        assert_eq!(CondMod::NZ.swap(), CondMod::NZ);
        assert_eq!(CondMod::GE.negate(), CondMod::L);
        assert_eq!(CondMod::Z.negate(), CondMod::NZ);
    }

    #[test]
    fn horiz_offset_crosses_registers() {
        let r = FsReg::vgrf(3, RegType::F);
        let h = r.horiz_offset(8);
        assert_eq!(h.reg_offset, 1);
        assert_eq!(h.subreg_offset, 0);

        let r = FsReg::vgrf(3, RegType::UW);
        let h = r.horiz_offset(8);
        assert_eq!(h.reg_offset, 0);
        assert_eq!(h.subreg_offset, 16);

        let u = FsReg::uniform(2, RegType::F);
        assert_eq!(u.horiz_offset(8), u);
    }

    #[test]
    fn immediates() {
        assert!(FsReg::imm_f(0.0).is_zero());
        assert!(FsReg::imm_f(-0.0).is_zero());
        assert!(!FsReg::imm_f(1.0).is_zero());
        assert!(FsReg::imm_d(1).is_one());
        assert!(FsReg::imm_f(-1.0).is_negative_one());
        assert_eq!(FsReg::imm_f(2.0).fneg().f32(), -2.0);
        assert_eq!(FsReg::imm_d(-5).fabs().i32(), 5);
    }

    #[test]
    fn remove_and_map() {
        let mut s = Shader::new(8);
        let dst = s.vgrf(RegType::F, 1);
        for i in 0..5 {
            s.instrs.push(Instr::new_boxed(
                Opcode::Mov,
                8,
                dst,
                &[FsReg::imm_f(i as f32)],
            ));
        }
        s.remove_instrs(&[1, 3]);
        let vals: Vec<f32> = s.instrs.iter().map(|i| i.srcs[0].f32()).collect();
        assert_eq!(vals, vec![0.0, 2.0, 4.0]);

        s.map_instrs(|i, _| {
            if i.srcs[0].f32() == 2.0 {
                MappedInstrs::None
            } else {
                MappedInstrs::One(i)
            }
        });
        assert_eq!(s.instrs.len(), 2);
    }

    #[test]
    fn display() {
        let dst = FsReg::vgrf(1, RegType::F);
        let mut i = Instr::new(
            Opcode::Add,
            8,
            dst,
            &[FsReg::vgrf(0, RegType::F).fneg(), FsReg::imm_f(0.5)],
        );
        i.cmod = CondMod::GE;
        assert_eq!(
            format!("{}", i),
            "add.ge.f0.0(8) vgrf1:F, -vgrf0:F, 0.5f"
        );
    }
}
