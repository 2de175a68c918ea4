/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

use crate::api::{
    CompileContext, CompileError, DeviceInfo, WmProgData, WmProgKey,
};
use crate::bitview::*;
use crate::ir::*;
use crate::{GetDebugFlags, DEBUG};

use log::debug;
use std::ops::Range;

const BRW_OPCODE_SEND: u32 = 49;
const BRW_OPCODE_SENDC: u32 = 50;
const BRW_OPCODE_MATH: u32 = 56;

const BRW_ARCHITECTURE_REGISTER_FILE: u32 = 0;
const BRW_GENERAL_REGISTER_FILE: u32 = 1;
const BRW_MESSAGE_REGISTER_FILE: u32 = 2;
const BRW_IMMEDIATE_VALUE: u32 = 3;

/// Immediate type of eight packed signed 4-bit values
const BRW_HW_IMM_TYPE_V: u32 = 6;

const SWIZZLE_XYZW: u32 = 0xe4;
const SWIZZLE_XYXY: u32 = 0x44;
const SWIZZLE_ZWZW: u32 = 0xee;

const BRW_SFID_SAMPLER: u32 = 2;
const GEN6_SFID_DATAPORT_SAMPLER_CACHE: u32 = 4;
const GEN6_SFID_DATAPORT_RENDER_CACHE: u32 = 5;
const GEN7_SFID_DATAPORT_DATA_CACHE: u32 = 10;
const HSW_SFID_DATAPORT_DATA_CACHE_1: u32 = 12;

const BRW_SAMPLER_SIMD_MODE_SIMD4X2: u32 = 0;
const BRW_SAMPLER_SIMD_MODE_SIMD8: u32 = 1;
const BRW_SAMPLER_SIMD_MODE_SIMD16: u32 = 2;

const GEN5_SAMPLER_MESSAGE_SAMPLE: u32 = 0;
const GEN5_SAMPLER_MESSAGE_SAMPLE_BIAS: u32 = 1;
const GEN5_SAMPLER_MESSAGE_SAMPLE_LOD: u32 = 2;
const GEN5_SAMPLER_MESSAGE_SAMPLE_COMPARE: u32 = 3;
const GEN5_SAMPLER_MESSAGE_SAMPLE_DERIVS: u32 = 4;
const GEN5_SAMPLER_MESSAGE_SAMPLE_BIAS_COMPARE: u32 = 5;
const GEN5_SAMPLER_MESSAGE_SAMPLE_LOD_COMPARE: u32 = 6;
const GEN5_SAMPLER_MESSAGE_SAMPLE_LD: u32 = 7;
const GEN7_SAMPLER_MESSAGE_SAMPLE_GATHER4: u32 = 8;
const GEN5_SAMPLER_MESSAGE_LOD: u32 = 9;
const GEN5_SAMPLER_MESSAGE_SAMPLE_RESINFO: u32 = 10;
const GEN7_SAMPLER_MESSAGE_SAMPLE_GATHER4_C: u32 = 16;
const GEN7_SAMPLER_MESSAGE_SAMPLE_GATHER4_PO: u32 = 17;
const GEN7_SAMPLER_MESSAGE_SAMPLE_GATHER4_PO_C: u32 = 18;
const HSW_SAMPLER_MESSAGE_SAMPLE_DERIV_COMPARE: u32 = 20;

/// Bytes of sampler state per sampler
const SAMPLER_STATE_SIZE: u32 = 16;

const BRW_DATAPORT_RENDER_TARGET_WRITE_SIMD16_SINGLE_SOURCE: u32 = 0;
const BRW_DATAPORT_RENDER_TARGET_WRITE_SIMD8_DUAL_SOURCE_SUBSPAN01: u32 = 2;
const BRW_DATAPORT_RENDER_TARGET_WRITE_SIMD8_DUAL_SOURCE_SUBSPAN23: u32 = 3;
const BRW_DATAPORT_RENDER_TARGET_WRITE_SIMD8_SINGLE_SOURCE_SUBSPAN01: u32 = 4;
const BRW_DATAPORT_RENDER_TARGET_WRITE_LAST: u32 = 1 << 4;
const GEN6_DATAPORT_WRITE_MESSAGE_RENDER_TARGET_WRITE: u32 = 12;

const BRW_DATAPORT_OWORD_BLOCK_1_OWORDLOW: u32 = 0;
const BRW_DATAPORT_OWORD_BLOCK_2_OWORDS: u32 = 2;
const BRW_DATAPORT_OWORD_BLOCK_4_OWORDS: u32 = 3;
const BRW_DATAPORT_READ_MESSAGE_OWORD_BLOCK_READ: u32 = 0;
const GEN6_DATAPORT_WRITE_MESSAGE_OWORD_BLOCK_WRITE: u32 = 8;

/// Binding table index of the stateless scratch surface
const BRW_SCRATCH_SURFACE: u32 = 255;

const GEN7_DATAPORT_DC_UNTYPED_SURFACE_READ: u32 = 1;
const GEN7_DATAPORT_DC_UNTYPED_SURFACE_WRITE: u32 = 13;
const GEN7_DATAPORT_RC_TYPED_SURFACE_READ: u32 = 5;
const GEN7_DATAPORT_RC_TYPED_SURFACE_WRITE: u32 = 13;
const HSW_DATAPORT_DC_PORT1_UNTYPED_SURFACE_READ: u32 = 1;
const HSW_DATAPORT_DC_PORT1_UNTYPED_SURFACE_WRITE: u32 = 9;
const HSW_DATAPORT_DC_PORT1_TYPED_SURFACE_READ: u32 = 5;
const HSW_DATAPORT_DC_PORT1_TYPED_SURFACE_WRITE: u32 = 13;

/// Bit positions of the fields which moved between generations
struct Layout {
    mask_control: usize,
    flag_reg: Option<usize>,
    flag_subreg: usize,
    dst_file: Range<usize>,
    dst_type: Range<usize>,
    src0_file: Range<usize>,
    src0_type: Range<usize>,
    src1_file: Range<usize>,
    src1_type: Range<usize>,
    three_src_flag_reg: Option<usize>,
    three_src_flag_subreg: usize,
    three_src_mods: usize,
    three_src_src_type: Range<usize>,
    three_src_dst_type: Range<usize>,
    jip: Range<usize>,
    uip: Range<usize>,
}

const GEN6_LAYOUT: Layout = Layout {
    mask_control: 9,
    flag_reg: None,
    flag_subreg: 89,
    dst_file: 32..34,
    dst_type: 34..37,
    src0_file: 37..39,
    src0_type: 39..42,
    src1_file: 42..44,
    src1_type: 44..47,
    three_src_flag_reg: None,
    three_src_flag_subreg: 33,
    three_src_mods: 36,
    three_src_src_type: 42..44,
    three_src_dst_type: 44..46,
    jip: 96..112,
    uip: 112..128,
};

const GEN7_LAYOUT: Layout = Layout {
    flag_reg: Some(90),
    three_src_flag_reg: Some(34),
    ..GEN6_LAYOUT
};

const GEN8_LAYOUT: Layout = Layout {
    mask_control: 34,
    flag_reg: Some(33),
    flag_subreg: 32,
    dst_file: 35..37,
    dst_type: 37..41,
    src0_file: 41..43,
    src0_type: 43..47,
    src1_file: 89..91,
    src1_type: 91..95,
    three_src_flag_reg: Some(33),
    three_src_flag_subreg: 32,
    three_src_mods: 42,
    three_src_src_type: 36..39,
    three_src_dst_type: 39..42,
    jip: 96..128,
    uip: 64..96,
};

fn hw(op: Opcode) -> u32 {
    op.hw_opcode()
        .unwrap_or_else(|| panic!("{} has no hardware encoding", op))
}

fn hstride_code(hstride: u32) -> u32 {
    match hstride {
        0 => 0,
        1 => 1,
        2 => 2,
        4 => 3,
        _ => panic!("Invalid horizontal stride {}", hstride),
    }
}

fn width_code(width: u32) -> u32 {
    assert!(width.is_power_of_two() && width <= 16);
    width.trailing_zeros()
}

fn vstride_code(vstride: u32) -> u32 {
    if vstride == 0 {
        return 0;
    }
    assert!(vstride.is_power_of_two() && vstride <= 32);
    vstride.trailing_zeros() + 1
}

fn exec_size_code(exec_size: u8) -> u32 {
    assert!(exec_size.is_power_of_two() && exec_size <= 16);
    exec_size.trailing_zeros()
}

/// A hardware register region or immediate
#[derive(Clone, Copy, Debug, PartialEq)]
struct HwReg {
    file: u32,
    ty: RegType,
    vector_imm: bool,
    nr: u32,
    /// Byte offset within the register
    subnr: u32,
    vstride: u32,
    width: u32,
    hstride: u32,
    negate: bool,
    abs: bool,
    /// Align16 channel selects, two bits each
    swizzle: u32,
    imm: u32,
}

impl HwReg {
    fn new(file: u32, nr: u32, ty: RegType) -> HwReg {
        HwReg {
            file: file,
            ty: ty,
            vector_imm: false,
            nr: nr,
            subnr: 0,
            vstride: 8,
            width: 8,
            hstride: 1,
            negate: false,
            abs: false,
            swizzle: SWIZZLE_XYZW,
            imm: 0,
        }
    }

    fn grf(nr: u32, ty: RegType) -> HwReg {
        HwReg::new(BRW_GENERAL_REGISTER_FILE, nr, ty)
    }

    fn mrf(nr: u32, ty: RegType) -> HwReg {
        HwReg::new(BRW_MESSAGE_REGISTER_FILE, nr, ty)
    }

    fn null(ty: RegType) -> HwReg {
        HwReg::new(BRW_ARCHITECTURE_REGISTER_FILE, BRW_ARF_NULL, ty)
    }

    fn flag(subreg: u8) -> HwReg {
        let mut reg = HwReg::new(
            BRW_ARCHITECTURE_REGISTER_FILE,
            BRW_ARF_FLAG,
            RegType::UW,
        );
        reg.subnr = u32::from(subreg) * 2;
        reg.vec1()
    }

    fn imm(ty: RegType, bits: u32) -> HwReg {
        let mut reg = HwReg::new(BRW_IMMEDIATE_VALUE, 0, ty).vec1();
        /* Word immediates are replicated into both halves */
        reg.imm = match ty {
            RegType::UW | RegType::W => (bits & 0xffff) | (bits << 16),
            _ => bits,
        };
        reg
    }

    fn imm_ud(ud: u32) -> HwReg {
        HwReg::imm(RegType::UD, ud)
    }

    fn imm_v(bits: u32) -> HwReg {
        let mut reg = HwReg::imm(RegType::W, 0);
        reg.vector_imm = true;
        reg.imm = bits;
        reg
    }

    fn from_fs_reg(reg: &FsReg, exec_size: u8) -> HwReg {
        let mut hw = match reg.file {
            RegFile::Grf | RegFile::Mrf | RegFile::Arf => {
                let (file, nr) = match reg.file {
                    RegFile::Grf => (
                        BRW_GENERAL_REGISTER_FILE,
                        reg.nr + reg.subreg_offset / REG_SIZE,
                    ),
                    RegFile::Mrf => (
                        BRW_MESSAGE_REGISTER_FILE,
                        reg.nr + reg.subreg_offset / REG_SIZE,
                    ),
                    _ => (BRW_ARCHITECTURE_REGISTER_FILE, reg.nr),
                };
                let mut hw = HwReg::new(file, nr, reg.ty);
                hw.subnr = reg.subreg_offset % REG_SIZE;

                let stride = u32::from(reg.stride);
                if stride == 0 || exec_size == 1 {
                    hw.vec1()
                } else {
                    /* A row may not cross a register so wide regions go
                     * eight channels at a time.
                     */
                    let width = u32::from(std::cmp::min(exec_size, 8));
                    hw.region(width * stride, width, stride)
                }
            }
            RegFile::Imm => HwReg::imm(reg.ty, reg.imm),
            RegFile::Bad => HwReg::null(reg.ty),
            RegFile::Vgrf | RegFile::Uniform | RegFile::Attr => {
                panic!("{} was never assigned a hardware register", reg)
            }
        };
        hw.negate = reg.negate;
        hw.abs = reg.abs;
        hw
    }

    fn hw_type(&self) -> u32 {
        if self.vector_imm {
            BRW_HW_IMM_TYPE_V
        } else {
            self.ty.hw_type()
        }
    }

    fn is_imm(&self) -> bool {
        self.file == BRW_IMMEDIATE_VALUE
    }

    fn is_scalar(&self) -> bool {
        self.vstride == 0 && self.width == 1 && self.hstride == 0
    }

    fn retype(mut self, ty: RegType) -> HwReg {
        self.ty = ty;
        self
    }

    fn region(mut self, vstride: u32, width: u32, hstride: u32) -> HwReg {
        self.vstride = vstride;
        self.width = width;
        self.hstride = hstride;
        self
    }

    fn vec1(self) -> HwReg {
        self.region(0, 1, 0)
    }

    fn vec8(self) -> HwReg {
        self.region(8, 8, 1)
    }

    /// Moves the region start by `elems` elements of its type
    fn suboffset(mut self, elems: u32) -> HwReg {
        let bytes = self.subnr + elems * self.ty.size();
        self.nr += bytes / REG_SIZE;
        self.subnr = bytes % REG_SIZE;
        self
    }

    fn at_element(mut self, elem: u32) -> HwReg {
        self.subnr = 0;
        self.suboffset(elem)
    }

    fn swizzle(mut self, swizzle: u32) -> HwReg {
        self.swizzle = swizzle;
        self
    }

    fn negated(mut self) -> HwReg {
        self.negate = !self.negate;
        self
    }

    /// The region covering the second eight channels
    fn sechalf(self) -> HwReg {
        if self.is_imm()
            || self.is_scalar()
            || self.file == BRW_ARCHITECTURE_REGISTER_FILE
        {
            return self;
        }
        self.suboffset(8 * std::cmp::max(self.hstride, 1))
    }
}

/// Per-instruction control state
#[derive(Clone, Copy, Debug)]
struct InstrState {
    exec_size: u8,
    group: u8,
    predicate: Predicate,
    predicate_inverse: bool,
    flag_subreg: u8,
    cmod: CondMod,
    saturate: bool,
    mask_disable: bool,
    acc_write: bool,
    align16: bool,
}

impl InstrState {
    fn for_instr(instr: &Instr) -> InstrState {
        InstrState {
            exec_size: instr.exec_size,
            group: instr.group,
            predicate: instr.predicate,
            predicate_inverse: instr.predicate_inverse,
            flag_subreg: instr.flag_subreg,
            cmod: instr.cmod,
            saturate: instr.saturate,
            mask_disable: instr.force_writemask_all,
            acc_write: instr.opcode == Opcode::Mach,
            align16: false,
        }
    }

    /// Unpredicated state for header setup, which ignores the channel
    /// enables
    fn exec_all(exec_size: u8) -> InstrState {
        InstrState {
            exec_size: exec_size,
            group: 0,
            predicate: Predicate::None,
            predicate_inverse: false,
            flag_subreg: 0,
            cmod: CondMod::None,
            saturate: false,
            mask_disable: true,
            acc_write: false,
            align16: false,
        }
    }

    fn half(mut self, h: u8) -> InstrState {
        assert!(self.exec_size == 16);
        self.exec_size = 8;
        self.group += 8 * h;
        self
    }
}

/// One 128-bit native instruction
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
struct NativeInstr {
    inst: [u32; 4],
}

impl BitViewable for NativeInstr {
    fn bits(&self) -> usize {
        BitView::new(&self.inst).bits()
    }

    fn get_bit_range_u64(&self, range: Range<usize>) -> u64 {
        BitView::new(&self.inst).get_bit_range_u64(range)
    }
}

impl BitMutViewable for NativeInstr {
    fn set_bit_range_u64(&mut self, range: Range<usize>, val: u64) {
        BitMutView::new(&mut self.inst).set_bit_range_u64(range, val);
    }
}

impl SetFieldU64 for NativeInstr {
    fn set_field_u64(&mut self, range: Range<usize>, val: u64) {
        BitMutView::new(&mut self.inst).set_field_u64(range, val);
    }
}

impl NativeInstr {
    fn nop() -> NativeInstr {
        let mut ni = NativeInstr::default();
        ni.set_field(0..7, hw(Opcode::Nop));
        ni
    }

    fn set_control(
        &mut self,
        l: &Layout,
        op: u32,
        st: &InstrState,
        three_src: bool,
    ) {
        self.set_field(0..7, op);
        self.set_bit(8, st.align16 || three_src);
        self.set_bit(l.mask_control, st.mask_disable);
        self.set_field(12..14, u32::from(st.group / 8));
        self.set_field(16..20, st.predicate.hw_encoding());
        self.set_bit(20, st.predicate_inverse);
        self.set_field(21..24, exec_size_code(st.exec_size));
        self.set_field(24..28, st.cmod.hw_encoding());
        self.set_bit(28, st.acc_write);
        self.set_bit(31, st.saturate);

        /* Only f0 is used */
        let (flag_reg, flag_subreg) = if three_src {
            (l.three_src_flag_reg, l.three_src_flag_subreg)
        } else {
            (l.flag_reg, l.flag_subreg)
        };
        if let Some(bit) = flag_reg {
            self.set_bit(bit, false);
        }
        self.set_bit(flag_subreg, st.flag_subreg != 0);
    }

    fn set_dst(&mut self, l: &Layout, dst: &HwReg, align16: bool) {
        assert!(!dst.is_imm());
        self.set_field(l.dst_file.clone(), dst.file);
        self.set_field(l.dst_type.clone(), dst.hw_type());
        if align16 {
            self.set_field(48..52, 0xf_u32);
            self.set_field(52..53, dst.subnr / 16);
        } else {
            self.set_field(48..53, dst.subnr);
        }
        self.set_field(53..61, dst.nr);
        self.set_field(61..63, hstride_code(std::cmp::max(dst.hstride, 1)));
    }

    fn set_src_region(&mut self, base: usize, src: &HwReg, align16: bool) {
        let mut f = BitMutView::new_subset(&mut self.inst, base..(base + 32));
        if align16 {
            f.set_field(0..2, src.swizzle & 3);
            f.set_field(2..4, (src.swizzle >> 2) & 3);
            f.set_field(4..5, src.subnr / 16);
            f.set_field(16..18, (src.swizzle >> 4) & 3);
            f.set_field(18..20, (src.swizzle >> 6) & 3);
        } else {
            f.set_field(0..5, src.subnr);
            f.set_field(16..18, hstride_code(src.hstride));
            f.set_field(18..21, width_code(src.width));
        }
        f.set_field(5..13, src.nr);
        f.set_bit(13, src.abs);
        f.set_bit(14, src.negate);
        f.set_field(21..25, vstride_code(src.vstride));
    }

    fn set_src0(&mut self, l: &Layout, src: &HwReg, align16: bool) {
        self.set_field(l.src0_file.clone(), src.file);
        self.set_field(l.src0_type.clone(), src.hw_type());
        if src.is_imm() {
            self.set_field(96..128, src.imm);
            /* A lone immediate also gives src1 its type */
            self.set_field(l.src1_type.clone(), src.hw_type());
        } else {
            self.set_src_region(64, src, align16);
        }
    }

    fn set_src1(&mut self, l: &Layout, src: &HwReg, align16: bool) {
        self.set_field(l.src1_file.clone(), src.file);
        self.set_field(l.src1_type.clone(), src.hw_type());
        if src.is_imm() {
            self.set_field(96..128, src.imm);
        } else {
            self.set_src_region(96, src, align16);
        }
    }

    /// Sets a field of the message descriptor in the src1 dword
    fn set_desc_field(&mut self, range: Range<usize>, val: u32) {
        let mut desc = BitMutView::new_subset(&mut self.inst, 96..128);
        desc.set_field(range, val);
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum JumpKind {
    If,
    Else,
    Endif,
    /// Start of a loop body, which has no instruction of its own
    Do,
    While,
    Break,
    Continue,
    DiscardHalt,
    FinalHalt,
}

enum Nesting {
    If { if_ip: usize, else_ip: Option<usize> },
    Loop { do_ip: usize, breaks: Vec<usize>, conts: Vec<usize> },
}

/// Everything about a SEND besides its function control bits
struct Message {
    sendc: bool,
    sfid: u32,
    mlen: u8,
    rlen: u8,
    header: bool,
    eot: bool,
}

fn three_src_type(ty: RegType) -> Option<u32> {
    match ty {
        RegType::F => Some(0),
        RegType::D => Some(1),
        RegType::UD => Some(2),
        _ => None,
    }
}

/// Translates allocated and scheduled shaders into native code
pub struct Generator<'a> {
    devinfo: &'a DeviceInfo,
    key: &'a WmProgKey,
    prog_data: &'a WmProgData,
    program: &'a mut Vec<u32>,
    layout: &'static Layout,
    dispatch_width: u8,
    store: Vec<NativeInstr>,
    jumps: Vec<(usize, JumpKind)>,
}

impl<'a> Generator<'a> {
    pub fn new(
        ctx: &'a CompileContext<'a>,
        prog_data: &'a WmProgData,
        program: &'a mut Vec<u32>,
    ) -> Generator<'a> {
        let layout = match ctx.devinfo.gen {
            6 => &GEN6_LAYOUT,
            7 => &GEN7_LAYOUT,
            _ => &GEN8_LAYOUT,
        };
        Generator {
            devinfo: ctx.devinfo,
            key: ctx.key,
            prog_data: prog_data,
            program: program,
            layout: layout,
            dispatch_width: 8,
            store: Vec::new(),
            jumps: Vec::new(),
        }
    }

    fn gen(&self) -> u32 {
        self.devinfo.gen
    }

    fn push(&mut self, ni: NativeInstr) -> &mut NativeInstr {
        let ip = self.store.len();
        self.store.push(ni);
        &mut self.store[ip]
    }

    fn alu(
        &mut self,
        st: &InstrState,
        op: u32,
        dst: HwReg,
        srcs: &[HwReg],
    ) -> &mut NativeInstr {
        assert!(srcs.len() <= 2);
        let l = self.layout;
        let mut ni = NativeInstr::default();
        ni.set_control(l, op, st, false);
        ni.set_dst(l, &dst, st.align16);
        if let Some(src0) = srcs.first() {
            ni.set_src0(l, src0, st.align16);
        }
        if let Some(src1) = srcs.get(1) {
            assert!(!srcs[0].is_imm());
            ni.set_src1(l, src1, st.align16);
        }
        self.push(ni)
    }

    fn mov(&mut self, st: &InstrState, dst: HwReg, src: HwReg) {
        let op = hw(Opcode::Mov);
        self.alu(st, op, dst, &[src]);
    }

    fn three_src(
        &mut self,
        st: &InstrState,
        op: u32,
        dst: &HwReg,
        srcs: &[HwReg],
    ) -> Result<(), CompileError> {
        assert!(srcs.len() == 3);
        let l = self.layout;

        if dst.file != BRW_GENERAL_REGISTER_FILE
            || srcs.iter().any(|s| s.file != BRW_GENERAL_REGISTER_FILE)
        {
            return Err(CompileError::Unsupported(
                "three-source instructions only take GRF operands".into(),
            ));
        }
        let (Some(src_type), Some(dst_type)) =
            (three_src_type(srcs[0].ty), three_src_type(dst.ty))
        else {
            return Err(CompileError::Unsupported(format!(
                "no three-source encoding for type {}",
                dst.ty
            )));
        };

        let mut ni = NativeInstr::default();
        ni.set_control(l, op, st, true);
        ni.set_field(49..53, 0xf_u32);
        ni.set_field(53..56, dst.subnr / 4);
        ni.set_field(56..64, dst.nr);
        if self.gen() >= 7 {
            ni.set_field(l.three_src_src_type.clone(), src_type);
            ni.set_field(l.three_src_dst_type.clone(), dst_type);
        }

        for (i, src) in srcs.iter().enumerate() {
            ni.set_bit(l.three_src_mods + 2 * i, src.abs);
            ni.set_bit(l.three_src_mods + 2 * i + 1, src.negate);

            let base = 64 + 21 * i;
            let mut f = BitMutView::new_subset(&mut ni.inst, base..(base + 20));
            f.set_bit(0, src.is_scalar());
            f.set_field(1..9, SWIZZLE_XYZW);
            f.set_field(9..12, src.subnr / 4);
            f.set_field(12..20, src.nr);
        }
        self.push(ni);
        Ok(())
    }

    fn send(
        &mut self,
        st: &InstrState,
        msg: &Message,
        dst: HwReg,
        payload: HwReg,
    ) -> &mut NativeInstr {
        let l = self.layout;
        let op = if msg.sendc {
            BRW_OPCODE_SENDC
        } else {
            BRW_OPCODE_SEND
        };

        let mut ni = NativeInstr::default();
        let mut st = *st;
        st.cmod = CondMod::None;
        ni.set_control(l, op, &st, false);
        ni.set_field(24..28, msg.sfid);
        ni.set_dst(l, &dst, false);
        ni.set_src0(l, &payload, false);
        ni.set_field(l.src1_file.clone(), BRW_IMMEDIATE_VALUE);
        ni.set_field(l.src1_type.clone(), RegType::UD.hw_type());
        ni.set_desc_field(19..20, u32::from(msg.header));
        ni.set_desc_field(20..25, u32::from(msg.rlen));
        ni.set_desc_field(25..29, u32::from(msg.mlen));
        ni.set_desc_field(31..32, u32::from(msg.eot));
        self.push(ni)
    }

    /// Fills in the data port function control bits of a descriptor
    fn set_dp_desc(
        &self,
        ni: &mut NativeInstr,
        surface: u32,
        msg_control: u32,
        msg_type: u32,
    ) {
        ni.set_desc_field(0..8, surface);
        if self.gen() == 6 {
            ni.set_desc_field(8..13, msg_control);
            ni.set_desc_field(13..17, msg_type);
        } else {
            ni.set_desc_field(8..14, msg_control);
            ni.set_desc_field(14..18, msg_type);
        }
    }

    fn set_sampler_desc(
        &self,
        ni: &mut NativeInstr,
        surface: u32,
        sampler: u32,
        msg_type: u32,
        simd_mode: u32,
    ) {
        ni.set_desc_field(0..8, surface);
        ni.set_desc_field(8..12, sampler % 16);
        if self.gen() == 6 {
            ni.set_desc_field(12..16, msg_type);
            ni.set_desc_field(16..18, simd_mode);
        } else {
            ni.set_desc_field(12..17, msg_type);
            ni.set_desc_field(17..19, simd_mode);
        }
    }

    fn flow(&mut self, st: &InstrState, op: Opcode, kind: JumpKind) {
        let hw = hw(op);
        let null = HwReg::null(RegType::D);
        let mut st = *st;
        st.cmod = CondMod::None;
        let ip = self.store.len();
        self.alu(&st, hw, null, &[null.vec1(), HwReg::imm(RegType::D, 0)]);
        self.jumps.push((ip, kind));
    }

    fn generate_math(
        &mut self,
        instr: &Instr,
        st: &InstrState,
        dst: HwReg,
        srcs: &[HwReg],
    ) {
        let func = instr
            .opcode
            .math_function()
            .unwrap_or_else(|| panic!("{} is not a math function", instr.opcode));
        let src1 = srcs.get(1).copied().unwrap_or(HwReg::null(RegType::F));

        /* Gen6 math can't be compressed and neither can Gen7+ integer
         * division.
         */
        let split = instr.exec_size == 16
            && (self.gen() == 6
                || matches!(
                    instr.opcode,
                    Opcode::IntQuotient | Opcode::IntRemainder
                ));
        if split {
            for h in 0..2 {
                let (d, s0, s1) = if h == 0 {
                    (dst, srcs[0], src1)
                } else {
                    (dst.sechalf(), srcs[0].sechalf(), src1.sechalf())
                };
                let ni =
                    self.alu(&st.half(h), BRW_OPCODE_MATH, d, &[s0, s1]);
                ni.set_field(24..28, func);
            }
        } else {
            let ni = self.alu(st, BRW_OPCODE_MATH, dst, &[srcs[0], src1]);
            ni.set_field(24..28, func);
        }
    }

    fn generate_split_3src(
        &mut self,
        instr: &Instr,
        st: &InstrState,
        dst: HwReg,
        srcs: &[HwReg],
    ) -> Result<(), CompileError> {
        let hw = hw(instr.opcode);

        /* Align16 can't be compressed on Ivy Bridge and BFI2 needs SIMD8
         * before Gen8.
         */
        let split = instr.exec_size == 16
            && self.gen() < 8
            && (!self.devinfo.is_haswell || instr.opcode == Opcode::Bfi2);
        if split {
            self.three_src(&st.half(0), hw, &dst, srcs)?;
            let sec: Vec<HwReg> = srcs.iter().map(|s| s.sechalf()).collect();
            self.three_src(&st.half(1), hw, &dst.sechalf(), &sec)
        } else {
            self.three_src(st, hw, &dst, srcs)
        }
    }

    fn generate_pixel_xy(&mut self, st: &InstrState, dst: HwReg, is_x: bool) {
        let g1_uw = HwReg::grf(1, RegType::UW);
        let (src, deltas) = if is_x {
            (g1_uw.suboffset(4), HwReg::imm_v(0x10101010))
        } else {
            (g1_uw.suboffset(5), HwReg::imm_v(0x11001100))
        };
        /* A UW destination fits one register even at SIMD16 */
        let mut st = *st;
        st.group = 0;
        let add = hw(Opcode::Add);
        self.alu(&st, add, dst, &[src.region(2, 4, 0), deltas]);
    }

    fn generate_linterp(&mut self, st: &InstrState, dst: HwReg, srcs: &[HwReg]) {
        let delta_x = srcs[0];
        let interp = srcs[1];

        if self.devinfo.has_pln {
            let pln = hw(Opcode::Pln);
            self.alu(st, pln, dst, &[interp, delta_x]);
        } else {
            let delta_y = HwReg {
                nr: delta_x.nr + u32::from(st.exec_size) / 8,
                ..delta_x
            };
            let line = hw(Opcode::Line);
            let mac = hw(Opcode::Mac);
            let mut line_st = *st;
            line_st.cmod = CondMod::None;
            line_st.saturate = false;
            self.alu(&line_st, line, HwReg::null(RegType::F), &[interp, delta_x]);
            self.alu(st, mac, dst, &[interp.suboffset(1), delta_y]);
        }
    }

    /// Horizontal derivative between the two pixels of each subspan row
    fn generate_ddx(&mut self, st: &InstrState, dst: HwReg, src: HwReg) {
        let (vstride, width) = if self.key.high_quality_derivatives {
            (2, 2)
        } else {
            (4, 4)
        };
        let src = src.retype(RegType::F);
        let src0 = src.at_element(1).region(vstride, width, 0);
        let src1 = src.at_element(0).region(vstride, width, 0);
        let add = hw(Opcode::Add);
        self.alu(st, add, dst, &[src0, src1.negated()]);
    }

    /// Vertical derivative between the rows of each subspan
    ///
    /// Window system framebuffers have y pointing up, which flips the sign.
    fn generate_ddy(&mut self, st: &InstrState, dst: HwReg, src: HwReg) {
        let negate_value = self.key.render_to_fbo;
        let add = hw(Opcode::Add);
        let src = src.retype(RegType::F);

        if self.key.high_quality_derivatives {
            let top = src.at_element(0).region(4, 4, 1).swizzle(SWIZZLE_XYXY);
            let bottom = src.at_element(0).region(4, 4, 1).swizzle(SWIZZLE_ZWZW);
            let (a, b) = if negate_value {
                (bottom, top)
            } else {
                (top, bottom)
            };

            let mut st = *st;
            st.align16 = true;
            if st.exec_size == 16 && self.devinfo.is_gen7_ivb_class() {
                self.alu(&st.half(0), add, dst, &[a, b.negated()]);
                self.alu(
                    &st.half(1),
                    add,
                    dst.sechalf(),
                    &[a.sechalf(), b.sechalf().negated()],
                );
            } else {
                self.alu(&st, add, dst, &[a, b.negated()]);
            }
        } else {
            let top = src.at_element(0).region(4, 4, 0);
            let bottom = src.at_element(2).region(4, 4, 0);
            let (a, b) = if negate_value {
                (bottom, top)
            } else {
                (top, bottom)
            };
            self.alu(st, add, dst, &[a, b.negated()]);
        }
    }

    fn generate_fb_write(&mut self, instr: &Instr, st: &InstrState) {
        let payload = match instr.base_mrf {
            Some(mrf) => HwReg::mrf(mrf, RegType::UD),
            None => HwReg::from_fs_reg(&instr.srcs[0], 8)
                .retype(RegType::UD)
                .vec8(),
        };

        /* The header is g0 and g1, with the pixel enables of discarded
         * channels knocked out of g1.7.
         */
        if instr.header_size > 0 {
            if self.prog_data.uses_kill {
                let pixel_mask =
                    HwReg::grf(1, RegType::UW).suboffset(7).vec1();
                self.mov(&InstrState::exec_all(1), pixel_mask, HwReg::flag(1));
            }

            self.mov(
                &InstrState::exec_all(16),
                payload,
                HwReg::grf(0, RegType::UD),
            );

            if instr.target > 0 && self.key.replicate_alpha {
                /* Source0 alpha present to render target */
                let or = hw(Opcode::Or);
                self.alu(
                    &InstrState::exec_all(1),
                    or,
                    payload.vec1(),
                    &[
                        HwReg::grf(0, RegType::UD).vec1(),
                        HwReg::imm_ud(1 << 11),
                    ],
                );
            }

            if instr.target > 0 {
                /* Selects the BLEND_STATE entry */
                self.mov(
                    &InstrState::exec_all(1),
                    payload.suboffset(2).vec1(),
                    HwReg::imm_ud(instr.target),
                );
            }
        }

        let mut msg_control = if self.prog_data.dual_src_blend {
            if instr.group >= 8 {
                BRW_DATAPORT_RENDER_TARGET_WRITE_SIMD8_DUAL_SOURCE_SUBSPAN23
            } else {
                BRW_DATAPORT_RENDER_TARGET_WRITE_SIMD8_DUAL_SOURCE_SUBSPAN01
            }
        } else if instr.exec_size == 16 {
            BRW_DATAPORT_RENDER_TARGET_WRITE_SIMD16_SINGLE_SOURCE
        } else {
            BRW_DATAPORT_RENDER_TARGET_WRITE_SIMD8_SINGLE_SOURCE_SUBSPAN01
        };
        if instr.eot {
            msg_control |= BRW_DATAPORT_RENDER_TARGET_WRITE_LAST;
        }

        let surface =
            self.prog_data.binding_table.render_target_start + instr.target;
        let msg = Message {
            sendc: true,
            sfid: GEN6_SFID_DATAPORT_RENDER_CACHE,
            mlen: instr.mlen,
            rlen: 0,
            header: instr.header_size > 0,
            eot: instr.eot,
        };
        let mut ni = *self.send(st, &msg, HwReg::null(RegType::UW), payload);
        self.set_dp_desc(
            &mut ni,
            surface,
            msg_control,
            GEN6_DATAPORT_WRITE_MESSAGE_RENDER_TARGET_WRITE,
        );
        self.replace_last(ni);
    }

    fn replace_last(&mut self, ni: NativeInstr) {
        let ip = self.store.len() - 1;
        self.store[ip] = ni;
    }

    fn sampler_msg_type(&self, instr: &Instr) -> Result<u32, CompileError> {
        let shadow = instr.shadow_compare;
        let msg_type = match instr.opcode {
            Opcode::Tex if shadow => GEN5_SAMPLER_MESSAGE_SAMPLE_COMPARE,
            Opcode::Tex => GEN5_SAMPLER_MESSAGE_SAMPLE,
            Opcode::Txb if shadow => GEN5_SAMPLER_MESSAGE_SAMPLE_BIAS_COMPARE,
            Opcode::Txb => GEN5_SAMPLER_MESSAGE_SAMPLE_BIAS,
            Opcode::Txl if shadow => GEN5_SAMPLER_MESSAGE_SAMPLE_LOD_COMPARE,
            Opcode::Txl => GEN5_SAMPLER_MESSAGE_SAMPLE_LOD,
            Opcode::Txd if shadow => {
                if self.gen() < 8 && !self.devinfo.is_haswell {
                    return Err(CompileError::Unsupported(
                        "shadow comparison with explicit gradients".into(),
                    ));
                }
                HSW_SAMPLER_MESSAGE_SAMPLE_DERIV_COMPARE
            }
            Opcode::Txd => GEN5_SAMPLER_MESSAGE_SAMPLE_DERIVS,
            Opcode::Txf => GEN5_SAMPLER_MESSAGE_SAMPLE_LD,
            Opcode::Txs => GEN5_SAMPLER_MESSAGE_SAMPLE_RESINFO,
            Opcode::Lod => GEN5_SAMPLER_MESSAGE_LOD,
            Opcode::Tg4 if shadow => GEN7_SAMPLER_MESSAGE_SAMPLE_GATHER4_C,
            Opcode::Tg4 => GEN7_SAMPLER_MESSAGE_SAMPLE_GATHER4,
            Opcode::Tg4Offset if shadow => {
                GEN7_SAMPLER_MESSAGE_SAMPLE_GATHER4_PO_C
            }
            Opcode::Tg4Offset => GEN7_SAMPLER_MESSAGE_SAMPLE_GATHER4_PO,
            op => panic!("{} is not a sampler message", op),
        };

        /* Gen6 has four bits of message type */
        if self.gen() == 6 && msg_type > 15 {
            return Err(CompileError::Unsupported(format!(
                "{} requires Gen7+",
                instr.opcode
            )));
        }
        Ok(msg_type)
    }

    fn generate_tex(
        &mut self,
        instr: &Instr,
        st: &InstrState,
        dst: HwReg,
    ) -> Result<(), CompileError> {
        let sampler = instr.srcs[1];
        if !sampler.is_imm() {
            return Err(CompileError::Unsupported(
                "non-constant sampler index".into(),
            ));
        }
        let sampler = sampler.u32();
        let msg_type = self.sampler_msg_type(instr)?;
        let simd_mode = match instr.exec_size {
            8 => BRW_SAMPLER_SIMD_MODE_SIMD8,
            16 => BRW_SAMPLER_SIMD_MODE_SIMD16,
            w => panic!("Invalid width {} for a texture instruction", w),
        };

        let payload = match instr.base_mrf {
            Some(mrf) => HwReg::mrf(mrf, RegType::UD),
            None => HwReg::from_fs_reg(&instr.srcs[0], 8)
                .retype(RegType::UD)
                .vec8(),
        };

        if instr.header_size > 0 {
            self.mov(
                &InstrState::exec_all(8),
                payload,
                HwReg::grf(0, RegType::UD),
            );

            if instr.offset != 0 {
                /* Texel offsets go in dword 2 */
                self.mov(
                    &InstrState::exec_all(1),
                    payload.suboffset(2).vec1(),
                    HwReg::imm_ud(instr.offset),
                );
            }

            if sampler >= 16 {
                /* The sampler field only has four bits, so point the
                 * sampler state pointer at the right block of sixteen.
                 */
                let add = hw(Opcode::Add);
                self.alu(
                    &InstrState::exec_all(1),
                    add,
                    payload.suboffset(3).vec1(),
                    &[
                        HwReg::grf(0, RegType::UD).suboffset(3).vec1(),
                        HwReg::imm_ud(16 * (sampler / 16) * SAMPLER_STATE_SIZE),
                    ],
                );
            }
        }

        let bt = &self.prog_data.binding_table;
        let base = if matches!(instr.opcode, Opcode::Tg4 | Opcode::Tg4Offset) {
            bt.gather_texture_start
        } else {
            bt.texture_start
        };

        let msg = Message {
            sendc: false,
            sfid: BRW_SFID_SAMPLER,
            mlen: instr.mlen,
            rlen: instr.rlen,
            header: instr.header_size > 0,
            eot: false,
        };
        let mut ni = *self.send(st, &msg, dst.vec8(), payload);
        self.set_sampler_desc(&mut ni, base + sampler, sampler, msg_type, simd_mode);
        self.replace_last(ni);
        Ok(())
    }

    /// Copies g0 into a scratch or constant header and points it at
    /// `offset` bytes
    fn oword_header(&mut self, mrf: u32, offset: u32) {
        let header = HwReg::mrf(mrf, RegType::UD);
        self.mov(&InstrState::exec_all(8), header, HwReg::grf(0, RegType::UD));
        self.mov(
            &InstrState::exec_all(1),
            header.suboffset(2).vec1(),
            HwReg::imm_ud(offset / 16),
        );
    }

    fn oword_block_size(regs: u32) -> u32 {
        match regs {
            1 => BRW_DATAPORT_OWORD_BLOCK_2_OWORDS,
            2 => BRW_DATAPORT_OWORD_BLOCK_4_OWORDS,
            n => panic!("Invalid oword block of {} registers", n),
        }
    }

    fn generate_scratch_write(&mut self, instr: &Instr, st: &InstrState) {
        let data_regs = u32::from(instr.mlen) - 1;
        let msg = Message {
            sendc: false,
            sfid: 0,
            mlen: instr.mlen,
            rlen: 0,
            header: true,
            eot: false,
        };

        match instr.base_mrf {
            Some(mrf) => {
                let src = HwReg::from_fs_reg(&instr.srcs[0], instr.exec_size)
                    .retype(RegType::UD);
                self.mov(st, HwReg::mrf(mrf + 1, RegType::UD), src);
                self.oword_header(mrf, instr.offset);

                let msg = Message {
                    sfid: GEN6_SFID_DATAPORT_RENDER_CACHE,
                    ..msg
                };
                let payload = HwReg::mrf(mrf, RegType::UD);
                let mut ni =
                    *self.send(st, &msg, HwReg::null(RegType::UW), payload);
                self.set_dp_desc(
                    &mut ni,
                    BRW_SCRATCH_SURFACE,
                    Self::oword_block_size(data_regs),
                    GEN6_DATAPORT_WRITE_MESSAGE_OWORD_BLOCK_WRITE,
                );
                self.replace_last(ni);
            }
            None => {
                let payload = HwReg::from_fs_reg(&instr.srcs[0], 8)
                    .retype(RegType::UD)
                    .vec8();
                let msg = Message {
                    sfid: GEN7_SFID_DATAPORT_DATA_CACHE,
                    ..msg
                };
                let ni =
                    self.send(st, &msg, HwReg::null(RegType::UW), payload);
                Self::set_gen7_scratch_desc(ni, true, data_regs, instr.offset);
            }
        }
    }

    /// Scratch block messages address 32-byte rows from the thread's
    /// scratch base
    fn set_gen7_scratch_desc(
        ni: &mut NativeInstr,
        write: bool,
        regs: u32,
        offset: u32,
    ) {
        assert!(regs == 1 || regs == 2 || regs == 4);
        ni.set_desc_field(18..19, 1);
        ni.set_desc_field(17..18, u32::from(write));
        ni.set_desc_field(12..14, regs - 1);
        ni.set_desc_field(0..12, offset / REG_SIZE);
    }

    fn generate_scratch_read(&mut self, instr: &Instr, st: &InstrState, dst: HwReg) {
        let mut msg = Message {
            sendc: false,
            sfid: 0,
            mlen: instr.mlen,
            rlen: instr.rlen,
            header: true,
            eot: false,
        };

        if instr.opcode == Opcode::Gen7ScratchRead {
            msg.sfid = GEN7_SFID_DATAPORT_DATA_CACHE;
            let g0 = HwReg::grf(0, RegType::UD);
            let ni = self.send(st, &msg, dst.vec8(), g0);
            Self::set_gen7_scratch_desc(
                ni,
                false,
                u32::from(instr.rlen),
                instr.offset,
            );
            return;
        }

        let mrf = instr
            .base_mrf
            .unwrap_or_else(|| panic!("{} needs a message register", instr.opcode));
        self.oword_header(mrf, instr.offset);
        msg.sfid = GEN6_SFID_DATAPORT_RENDER_CACHE;
        let payload = HwReg::mrf(mrf, RegType::UD);
        let mut ni = *self.send(st, &msg, dst.vec8(), payload);
        self.set_dp_desc(
            &mut ni,
            BRW_SCRATCH_SURFACE,
            Self::oword_block_size(u32::from(instr.rlen)),
            BRW_DATAPORT_READ_MESSAGE_OWORD_BLOCK_READ,
        );
        self.replace_last(ni);
    }

    fn generate_uniform_pull_constant_load(
        &mut self,
        instr: &Instr,
        st: &InstrState,
        dst: HwReg,
    ) {
        let surface = instr.srcs[0];
        assert!(surface.is_imm() && surface.ty == RegType::UD);

        let mut msg = Message {
            sendc: false,
            sfid: 0,
            mlen: instr.mlen,
            rlen: instr.rlen,
            header: false,
            eot: false,
        };

        if instr.opcode == Opcode::UniformPullConstantLoadGen7 {
            /* SIMD4x2 LD: the dword offset in the first channel returns
             * the four consecutive components.
             */
            let offset = HwReg::from_fs_reg(&instr.srcs[1], 1).vec1();
            let mut st = *st;
            st.mask_disable = true;
            st.group = 0;
            msg.sfid = BRW_SFID_SAMPLER;
            let mut ni = *self.send(&st, &msg, dst.region(4, 4, 1), offset);
            self.set_sampler_desc(
                &mut ni,
                surface.u32(),
                0,
                GEN5_SAMPLER_MESSAGE_SAMPLE_LD,
                BRW_SAMPLER_SIMD_MODE_SIMD4X2,
            );
            self.replace_last(ni);
            return;
        }

        let offset = instr.srcs[1];
        assert!(offset.is_imm() && offset.ty == RegType::UD);
        let mrf = instr
            .base_mrf
            .unwrap_or_else(|| panic!("{} needs a message register", instr.opcode));
        self.oword_header(mrf, offset.u32());

        msg.sfid = GEN6_SFID_DATAPORT_SAMPLER_CACHE;
        msg.header = true;
        let payload = HwReg::mrf(mrf, RegType::UD);
        let mut ni = *self.send(st, &msg, dst.vec8(), payload);
        self.set_dp_desc(
            &mut ni,
            surface.u32(),
            BRW_DATAPORT_OWORD_BLOCK_1_OWORDLOW,
            BRW_DATAPORT_READ_MESSAGE_OWORD_BLOCK_READ,
        );
        self.replace_last(ni);
    }

    fn generate_surface(
        &mut self,
        instr: &Instr,
        st: &InstrState,
        dst: HwReg,
    ) -> Result<(), CompileError> {
        if self.gen() < 7 {
            return Err(CompileError::Unsupported(format!(
                "{} requires Gen7+",
                instr.opcode
            )));
        }

        let surface = instr.srcs[1];
        let channels = instr.srcs[2];
        assert!(surface.is_imm() && channels.is_imm());
        let channels = channels.u32();
        assert!((1..=4).contains(&channels));

        let hsw = self.devinfo.is_haswell || self.gen() >= 8;
        let typed = matches!(
            instr.opcode,
            Opcode::TypedSurfaceRead | Opcode::TypedSurfaceWrite
        );
        let (sfid, msg_type) = match (instr.opcode, hsw) {
            (Opcode::UntypedSurfaceRead, false) => (
                GEN7_SFID_DATAPORT_DATA_CACHE,
                GEN7_DATAPORT_DC_UNTYPED_SURFACE_READ,
            ),
            (Opcode::UntypedSurfaceWrite, false) => (
                GEN7_SFID_DATAPORT_DATA_CACHE,
                GEN7_DATAPORT_DC_UNTYPED_SURFACE_WRITE,
            ),
            (Opcode::TypedSurfaceRead, false) => (
                GEN6_SFID_DATAPORT_RENDER_CACHE,
                GEN7_DATAPORT_RC_TYPED_SURFACE_READ,
            ),
            (Opcode::TypedSurfaceWrite, false) => (
                GEN6_SFID_DATAPORT_RENDER_CACHE,
                GEN7_DATAPORT_RC_TYPED_SURFACE_WRITE,
            ),
            (Opcode::UntypedSurfaceRead, true) => (
                HSW_SFID_DATAPORT_DATA_CACHE_1,
                HSW_DATAPORT_DC_PORT1_UNTYPED_SURFACE_READ,
            ),
            (Opcode::UntypedSurfaceWrite, true) => (
                HSW_SFID_DATAPORT_DATA_CACHE_1,
                HSW_DATAPORT_DC_PORT1_UNTYPED_SURFACE_WRITE,
            ),
            (Opcode::TypedSurfaceRead, true) => (
                HSW_SFID_DATAPORT_DATA_CACHE_1,
                HSW_DATAPORT_DC_PORT1_TYPED_SURFACE_READ,
            ),
            (Opcode::TypedSurfaceWrite, true) => (
                HSW_SFID_DATAPORT_DATA_CACHE_1,
                HSW_DATAPORT_DC_PORT1_TYPED_SURFACE_WRITE,
            ),
            (op, _) => panic!("{} is not a surface message", op),
        };

        /* The low bits mask off the channels which aren't accessed */
        let mut msg_control = 0xf & !((1 << channels) - 1);
        if typed {
            msg_control |= u32::from(instr.group / 8) << 5;
        } else {
            let simd_mode = if instr.exec_size == 16 { 1 } else { 2 };
            msg_control |= simd_mode << 4;
        }

        let msg = Message {
            sendc: false,
            sfid: sfid,
            mlen: instr.mlen,
            rlen: instr.rlen,
            header: instr.header_size > 0,
            eot: false,
        };
        let payload = HwReg::from_fs_reg(&instr.srcs[0], 8)
            .retype(RegType::UD)
            .vec8();
        let dst = if instr.rlen > 0 {
            dst.vec8()
        } else {
            HwReg::null(RegType::UD)
        };
        let mut ni = *self.send(st, &msg, dst, payload);
        self.set_dp_desc(&mut ni, surface.u32(), msg_control, msg_type);
        self.replace_last(ni);
        Ok(())
    }

    fn generate_instr(&mut self, instr: &Instr) -> Result<(), CompileError> {
        let st = InstrState::for_instr(instr);
        let dst = HwReg::from_fs_reg(&instr.dst, instr.exec_size);
        let srcs: Vec<HwReg> = instr
            .srcs
            .iter()
            .map(|s| HwReg::from_fs_reg(s, instr.exec_size))
            .collect();

        match instr.opcode {
            Opcode::Mad | Opcode::Lrp | Opcode::Bfe | Opcode::Bfi2 => {
                self.generate_split_3src(instr, &st, dst, &srcs)?;
            }
            Opcode::Bfi1 if instr.exec_size == 16 && self.devinfo.is_haswell => {
                /* Haswell runs BFI at SIMD8 only */
                let hw = hw(Opcode::Bfi1);
                self.alu(&st.half(0), hw, dst, &srcs);
                let sec: Vec<HwReg> = srcs.iter().map(|s| s.sechalf()).collect();
                self.alu(&st.half(1), hw, dst.sechalf(), &sec);
            }
            Opcode::Bfrev | Opcode::Fbh | Opcode::Fbl | Opcode::Cbit => {
                /* These only write UD */
                let hw = hw(instr.opcode);
                let mut srcs = srcs;
                if instr.opcode == Opcode::Bfrev {
                    srcs[0] = srcs[0].retype(RegType::UD);
                }
                self.alu(&st, hw, dst.retype(RegType::UD), &srcs);
            }
            op if op.is_math() => self.generate_math(instr, &st, dst, &srcs),

            Opcode::If => self.flow(&st, Opcode::If, JumpKind::If),
            Opcode::Else => self.flow(&st, Opcode::Else, JumpKind::Else),
            Opcode::Endif => self.flow(&st, Opcode::Endif, JumpKind::Endif),
            Opcode::Do => {
                /* Loops start at the next instruction */
                self.jumps.push((self.store.len(), JumpKind::Do));
            }
            Opcode::While => self.flow(&st, Opcode::While, JumpKind::While),
            Opcode::Break => self.flow(&st, Opcode::Break, JumpKind::Break),
            Opcode::Continue => {
                self.flow(&st, Opcode::Continue, JumpKind::Continue)
            }
            Opcode::Halt | Opcode::DiscardJump => {
                let mut st = st;
                st.mask_disable = true;
                self.flow(&st, Opcode::Halt, JumpKind::DiscardHalt);
            }
            Opcode::PlaceholderHalt => {
                /* Every channel which halted to the discard UIP has to see
                 * a HALT to it before the program ends.
                 */
                if self.jumps.iter().any(|j| j.1 == JumpKind::DiscardHalt) {
                    let mut st = st;
                    st.predicate = Predicate::None;
                    self.flow(&st, Opcode::Halt, JumpKind::FinalHalt);
                }
            }
            Opcode::Nop => {
                self.push(NativeInstr::nop());
            }

            Opcode::PixelX => self.generate_pixel_xy(&st, dst, true),
            Opcode::PixelY => self.generate_pixel_xy(&st, dst, false),
            Opcode::Cinterp => self.mov(&st, dst, srcs[0]),
            Opcode::Linterp => self.generate_linterp(&st, dst, &srcs),
            Opcode::Ddx => self.generate_ddx(&st, dst, srcs[0]),
            Opcode::Ddy => self.generate_ddy(&st, dst, srcs[0]),
            Opcode::MovDispatchToFlags => {
                let dispatch_mask =
                    HwReg::grf(1, RegType::UW).suboffset(7).vec1();
                self.mov(
                    &InstrState::exec_all(1),
                    HwReg::flag(instr.flag_subreg),
                    dispatch_mask,
                );
            }

            Opcode::FbWrite => self.generate_fb_write(instr, &st),
            op if op.is_tex() && !op.is_logical() => {
                self.generate_tex(instr, &st, dst)?;
            }
            Opcode::ScratchWrite => self.generate_scratch_write(instr, &st),
            Opcode::ScratchRead | Opcode::Gen7ScratchRead => {
                self.generate_scratch_read(instr, &st, dst)
            }
            Opcode::UniformPullConstantLoad
            | Opcode::UniformPullConstantLoadGen7 => {
                self.generate_uniform_pull_constant_load(instr, &st, dst)
            }
            op if op.is_surface_access() => {
                self.generate_surface(instr, &st, dst)?;
            }

            op if op.is_logical()
                || matches!(op, Opcode::LoadPayload | Opcode::Mulh) =>
            {
                panic!("{} should have been lowered", op)
            }
            op => {
                self.alu(&st, hw(op), dst, &srcs);
            }
        }
        Ok(())
    }

    fn set_jip(&mut self, ip: usize, kind: JumpKind, target: usize) {
        let scale = if self.gen() >= 8 { 16 } else { 2 };
        let dist = (target as i32 - ip as i32) * scale;
        let range = if self.gen() == 6
            && matches!(
                kind,
                JumpKind::If | JumpKind::Else | JumpKind::Endif | JumpKind::While
            ) {
            /* Gen6 keeps the jump count where the destination would go */
            48..64
        } else {
            self.layout.jip.clone()
        };
        self.store[ip].set_field(range, dist);
    }

    fn set_uip(&mut self, ip: usize, target: usize) {
        let scale = if self.gen() >= 8 { 16 } else { 2 };
        let dist = (target as i32 - ip as i32) * scale;
        let range = self.layout.uip.clone();
        self.store[ip].set_field(range, dist);
    }

    /// Where channels waiting on the jump at `jumps[k]` rejoin: the next
    /// ELSE, ENDIF, WHILE or HALT at the same nesting depth
    fn block_end(&self, k: usize) -> usize {
        let mut depth = 0_u32;
        for &(ip, kind) in &self.jumps[(k + 1)..] {
            match kind {
                JumpKind::If | JumpKind::Do => depth += 1,
                JumpKind::Endif | JumpKind::While => {
                    if depth == 0 {
                        return ip;
                    }
                    depth -= 1;
                }
                JumpKind::Else | JumpKind::DiscardHalt | JumpKind::FinalHalt => {
                    if depth == 0 {
                        return ip;
                    }
                }
                JumpKind::Break | JumpKind::Continue => (),
            }
        }
        self.store.len()
    }

    fn patch_jumps(&mut self) {
        let final_halt = self
            .jumps
            .iter()
            .find(|j| j.1 == JumpKind::FinalHalt)
            .map(|j| j.0);
        let mut stack: Vec<Nesting> = Vec::new();

        for k in 0..self.jumps.len() {
            let (ip, kind) = self.jumps[k];
            match kind {
                JumpKind::If => stack.push(Nesting::If {
                    if_ip: ip,
                    else_ip: None,
                }),
                JumpKind::Else => match stack.last_mut() {
                    Some(Nesting::If { else_ip, .. }) => *else_ip = Some(ip),
                    _ => panic!("ELSE outside of an IF"),
                },
                JumpKind::Endif => {
                    let Some(Nesting::If { if_ip, else_ip }) = stack.pop()
                    else {
                        panic!("ENDIF outside of an IF");
                    };
                    match else_ip {
                        Some(else_ip) => {
                            self.set_jip(if_ip, JumpKind::If, else_ip + 1);
                            self.set_jip(else_ip, JumpKind::Else, ip);
                            if self.gen() >= 7 {
                                self.set_uip(if_ip, ip);
                                self.set_uip(else_ip, ip);
                            }
                        }
                        None => {
                            self.set_jip(if_ip, JumpKind::If, ip);
                            if self.gen() >= 7 {
                                self.set_uip(if_ip, ip);
                            }
                        }
                    }
                    self.set_jip(ip, JumpKind::Endif, ip + 1);
                }
                JumpKind::Do => stack.push(Nesting::Loop {
                    do_ip: ip,
                    breaks: Vec::new(),
                    conts: Vec::new(),
                }),
                JumpKind::Break | JumpKind::Continue => {
                    let end = self.block_end(k);
                    self.set_jip(ip, kind, end);
                    let frame = stack.iter_mut().rev().find_map(|n| match n {
                        Nesting::Loop { breaks, conts, .. } => {
                            Some((breaks, conts))
                        }
                        _ => None,
                    });
                    let Some((breaks, conts)) = frame else {
                        panic!("{:?} outside of a loop", kind);
                    };
                    if kind == JumpKind::Break {
                        breaks.push(ip);
                    } else {
                        conts.push(ip);
                    }
                }
                JumpKind::While => {
                    let Some(Nesting::Loop {
                        do_ip,
                        breaks,
                        conts,
                    }) = stack.pop()
                    else {
                        panic!("WHILE outside of a loop");
                    };
                    self.set_jip(ip, JumpKind::While, do_ip);
                    /* Gen6 BREAK lands past the WHILE */
                    let break_target = if self.gen() == 6 { ip + 1 } else { ip };
                    for b in breaks {
                        self.set_uip(b, break_target);
                    }
                    for c in conts {
                        self.set_uip(c, ip);
                    }
                }
                JumpKind::DiscardHalt => {
                    let end = self.block_end(k);
                    self.set_jip(ip, kind, end);
                    let target = final_halt.unwrap_or(self.store.len());
                    self.set_uip(ip, target);
                }
                JumpKind::FinalHalt => {
                    self.set_jip(ip, kind, ip + 1);
                    self.set_uip(ip, ip + 1);
                }
            }
        }
        assert!(stack.is_empty());
    }

    /// Appends native code for `s` to the program and returns its byte
    /// offset
    pub fn generate_code(&mut self, s: &Shader) -> Result<u32, CompileError> {
        /* Programs start on a 64 byte boundary */
        while self.program.len() % 16 != 0 {
            self.program.extend_from_slice(&NativeInstr::nop().inst);
        }
        let start = (self.program.len() * 4) as u32;

        self.dispatch_width = s.dispatch_width;
        self.store.clear();
        self.jumps.clear();

        let mut loop_count = 0;
        for instr in &s.instrs {
            if DEBUG.ann() {
                debug!("{:#06x}: {}", start as usize + self.store.len() * 16, instr);
            }
            self.generate_instr(instr)?;
            if instr.opcode == Opcode::While {
                loop_count += 1;
            }
        }
        self.patch_jumps();

        debug!(
            "SIMD{} shader: {} instructions. {} loops. {} bytes.",
            self.dispatch_width,
            self.store.len(),
            loop_count,
            self.store.len() * 16
        );

        for ni in &self.store {
            self.program.extend_from_slice(&ni.inst);
        }
        Ok(start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::glsl::Program;

    fn generate_with(
        devinfo: &DeviceInfo,
        key: &WmProgKey,
        prog_data: &WmProgData,
        s: &Shader,
    ) -> Result<Vec<[u32; 4]>, CompileError> {
        let prog = Program::new();
        let ctx = CompileContext::new(devinfo, key, &prog);
        let mut program = Vec::new();
        Generator::new(&ctx, prog_data, &mut program).generate_code(s)?;
        Ok(program.chunks(4).map(|c| [c[0], c[1], c[2], c[3]]).collect())
    }

    fn generate(devinfo: &DeviceInfo, s: &Shader) -> Vec<[u32; 4]> {
        generate_with(devinfo, &WmProgKey::default(), &WmProgData::new(), s)
            .unwrap()
    }

    fn field(inst: &[u32; 4], range: Range<usize>) -> u64 {
        BitView::new(inst).get_bit_range_u64(range)
    }

    fn signed(inst: &[u32; 4], range: Range<usize>) -> i64 {
        let bits = range.len();
        let v = field(inst, range) as i64;
        (v << (64 - bits)) >> (64 - bits)
    }

    #[test]
    fn mov_fields() {
        let mut s = Shader::new(8);
        s.mov(FsReg::grf(4, RegType::F), FsReg::grf(2, RegType::F));

        let code = generate(&DeviceInfo::ivb(), &s);
        assert_eq!(code.len(), 1);
        let mov = &code[0];
        assert_eq!(field(mov, 0..7), 1);
        assert_eq!(field(mov, 21..24), 3);
        assert_eq!(field(mov, 32..34), u64::from(BRW_GENERAL_REGISTER_FILE));
        assert_eq!(field(mov, 34..37), 7);
        assert_eq!(field(mov, 53..61), 4);
        assert_eq!(field(mov, 69..77), 2);
        /* <8;8,1> */
        assert_eq!(field(mov, 85..89), 4);
        assert_eq!(field(mov, 82..85), 3);
        assert_eq!(field(mov, 80..82), 1);
    }

    #[test]
    fn immediates_and_modifiers() {
        let mut s = Shader::new(8);
        let add = s.add(
            FsReg::grf(5, RegType::F),
            FsReg::grf(3, RegType::F).fneg(),
            FsReg::imm_f(1.0),
        );
        add.saturate = true;
        add.cmod = CondMod::G;

        let code = generate(&DeviceInfo::snb(), &s);
        let add = &code[0];
        assert_eq!(field(add, 0..7), 64);
        assert!(field(add, 31..32) == 1);
        assert_eq!(field(add, 24..28), 3);
        assert_eq!(field(add, 78..79), 1);
        assert_eq!(field(add, 42..44), u64::from(BRW_IMMEDIATE_VALUE));
        assert_eq!(field(add, 96..128), 0x3f80_0000);
    }

    #[test]
    fn gen8_moves_type_fields() {
        let mut s = Shader::new(8);
        s.mov(FsReg::grf(4, RegType::D), FsReg::imm_d(-1));

        let code = generate(&DeviceInfo::bdw(), &s);
        let mov = &code[0];
        assert_eq!(field(mov, 35..37), u64::from(BRW_GENERAL_REGISTER_FILE));
        assert_eq!(field(mov, 37..41), 1);
        assert_eq!(field(mov, 41..43), u64::from(BRW_IMMEDIATE_VALUE));
        assert_eq!(field(mov, 96..128), 0xffff_ffff);
    }

    #[test]
    fn quarter_control_follows_group() {
        let mut s = Shader::new(16);
        s.add(
            FsReg::grf(10, RegType::F),
            FsReg::grf(4, RegType::F),
            FsReg::grf(6, RegType::F),
        );
        s.half(1).mov(FsReg::grf(12, RegType::F), FsReg::grf(7, RegType::F));

        let code = generate(&DeviceInfo::hsw(), &s);
        assert_eq!(field(&code[0], 21..24), 4);
        assert_eq!(field(&code[0], 12..14), 0);
        assert_eq!(field(&code[1], 21..24), 3);
        assert_eq!(field(&code[1], 12..14), 1);
    }

    #[test]
    fn gen6_simd16_math_split() {
        let mut s = Shader::new(16);
        s.emit(
            Opcode::Rcp,
            FsReg::grf(10, RegType::F),
            &[FsReg::grf(4, RegType::F)],
        );

        let code = generate(&DeviceInfo::snb(), &s);
        assert_eq!(code.len(), 2);
        for (h, math) in code.iter().enumerate() {
            assert_eq!(field(math, 0..7), u64::from(BRW_OPCODE_MATH));
            assert_eq!(field(math, 24..28), 1);
            assert_eq!(field(math, 21..24), 3);
            assert_eq!(field(math, 12..14), h as u64);
            assert_eq!(field(math, 53..61), 10 + h as u64);
            assert_eq!(field(math, 69..77), 4 + h as u64);
        }

        let code = generate(&DeviceInfo::ivb(), &s);
        assert_eq!(code.len(), 1);
    }

    #[test]
    fn if_else_endif_jumps() {
        let mut s = Shader::new(8);
        let dst = FsReg::grf(4, RegType::F);
        s.emit(Opcode::If, FsReg::null(RegType::D), &[]).predicate =
            Predicate::Normal;
        s.mov(dst, FsReg::imm_f(1.0));
        s.emit(Opcode::Else, FsReg::null(RegType::D), &[]);
        s.mov(dst, FsReg::imm_f(2.0));
        s.emit(Opcode::Endif, FsReg::null(RegType::D), &[]);

        let code = generate(&DeviceInfo::ivb(), &s);
        assert_eq!(code.len(), 5);
        assert_eq!(field(&code[0], 16..20), 1);
        /* IF skips past the ELSE; both reconverge at the ENDIF */
        assert_eq!(signed(&code[0], 96..112), 6);
        assert_eq!(signed(&code[0], 112..128), 8);
        assert_eq!(signed(&code[2], 96..112), 4);
        assert_eq!(signed(&code[2], 112..128), 4);
        assert_eq!(signed(&code[4], 96..112), 2);

        let code = generate(&DeviceInfo::snb(), &s);
        assert_eq!(signed(&code[0], 48..64), 6);
        assert_eq!(signed(&code[2], 48..64), 4);
    }

    #[test]
    fn loop_with_break() {
        let mut s = Shader::new(8);
        let dst = FsReg::grf(4, RegType::F);
        s.emit(Opcode::Do, FsReg::null(RegType::D), &[]);
        s.emit(Opcode::Break, FsReg::null(RegType::D), &[]).predicate =
            Predicate::Normal;
        s.mov(dst, FsReg::imm_f(1.0));
        s.emit(Opcode::While, FsReg::null(RegType::D), &[]);

        let code = generate(&DeviceInfo::bdw(), &s);
        assert_eq!(code.len(), 3);
        assert_eq!(signed(&code[0], 96..128), 32);
        assert_eq!(signed(&code[0], 64..96), 32);
        assert_eq!(signed(&code[2], 96..128), -32);

        /* Gen6 breaks out past the WHILE */
        let code = generate(&DeviceInfo::snb(), &s);
        assert_eq!(signed(&code[0], 112..128), 6);
        assert_eq!(signed(&code[2], 48..64), -4);
    }

    #[test]
    fn discards_halt_to_the_end() {
        let mut s = Shader::new(8);
        s.emit(Opcode::DiscardJump, FsReg::null(RegType::UD), &[])
            .predicate = Predicate::Any8h;
        s.mov(FsReg::grf(4, RegType::F), FsReg::imm_f(1.0));
        s.emit(Opcode::PlaceholderHalt, FsReg::null(RegType::UD), &[]);

        let code = generate(&DeviceInfo::hsw(), &s);
        assert_eq!(code.len(), 3);
        let halt = hw(Opcode::Halt);
        assert_eq!(field(&code[0], 0..7), u64::from(halt));
        assert_eq!(field(&code[0], 9..10), 1);
        assert_eq!(signed(&code[0], 112..128), 4);
        assert_eq!(field(&code[2], 0..7), u64::from(halt));
        assert_eq!(signed(&code[2], 112..128), 2);

        /* Without discards the placeholder emits nothing */
        let mut s = Shader::new(8);
        s.emit(Opcode::PlaceholderHalt, FsReg::null(RegType::UD), &[]);
        assert!(generate(&DeviceInfo::hsw(), &s).is_empty());
    }

    #[test]
    fn render_target_write() {
        let mut s = Shader::new(8);
        let fb = s.emit(
            Opcode::FbWrite,
            FsReg::null(RegType::UD),
            &[FsReg::grf(120, RegType::F)],
        );
        fb.mlen = 4;
        fb.eot = true;

        let mut prog_data = WmProgData::new();
        prog_data.binding_table.render_target_start = 3;
        let code = generate_with(
            &DeviceInfo::ivb(),
            &WmProgKey::default(),
            &prog_data,
            &s,
        )
        .unwrap();
        assert_eq!(code.len(), 1);
        let send = &code[0];
        assert_eq!(field(send, 0..7), u64::from(BRW_OPCODE_SENDC));
        assert_eq!(field(send, 24..28), u64::from(GEN6_SFID_DATAPORT_RENDER_CACHE));
        assert_eq!(field(send, 69..77), 120);
        assert_eq!(field(send, 96..104), 3);
        assert_eq!(field(send, 104..110), 4 | 16);
        assert_eq!(field(send, 110..114), 12);
        assert_eq!(field(send, 115..116), 0);
        assert_eq!(field(send, 121..125), 4);
        assert_eq!(field(send, 127..128), 1);
    }

    #[test]
    fn fb_write_header_setup() {
        let mut s = Shader::new(8);
        let fb = s.emit(Opcode::FbWrite, FsReg::null(RegType::UD), &[]);
        fb.base_mrf = Some(1);
        fb.mlen = 6;
        fb.header_size = 2;
        fb.target = 1;
        fb.eot = true;

        let mut prog_data = WmProgData::new();
        prog_data.uses_kill = true;
        let code = generate_with(
            &DeviceInfo::snb(),
            &WmProgKey::default(),
            &prog_data,
            &s,
        )
        .unwrap();

        /* Pixel mask, g0-g1 copy, target index, then the write */
        assert_eq!(code.len(), 4);
        assert_eq!(field(&code[0], 53..61), 1);
        assert_eq!(field(&code[0], 48..53), 14);
        assert_eq!(field(&code[1], 32..34), u64::from(BRW_MESSAGE_REGISTER_FILE));
        assert_eq!(field(&code[1], 21..24), 4);
        assert_eq!(field(&code[2], 48..53), 8);
        assert_eq!(field(&code[2], 96..128), 1);
        let send = &code[3];
        assert_eq!(field(send, 37..39), u64::from(BRW_MESSAGE_REGISTER_FILE));
        assert_eq!(field(send, 69..77), 1);
        assert_eq!(field(send, 115..116), 1);
    }

    #[test]
    fn dispatch_mask_read_from_g1_7() {
        let mut s = Shader::new(16);
        s.emit(Opcode::MovDispatchToFlags, FsReg::null(RegType::UW), &[]);

        let code = generate_with(
            &DeviceInfo::ivb(),
            &WmProgKey::default(),
            &WmProgData::new(),
            &s,
        )
        .unwrap();

        /* g1.7:uw is byte 14 of g1 */
        let mov = &code[0];
        assert_eq!(field(mov, 69..77), 1);
        assert_eq!(field(mov, 64..69), 14);
        assert_eq!(field(mov, 21..24), 0);
    }

    #[test]
    fn texel_fetch_with_offset() {
        let mut s = Shader::new(16);
        let tex = s.emit(
            Opcode::Txf,
            FsReg::grf(30, RegType::F),
            &[FsReg::grf(20, RegType::F), FsReg::imm_ud(2)],
        );
        tex.mlen = 5;
        tex.rlen = 8;
        tex.header_size = 1;
        tex.offset = 0x110;

        let mut prog_data = WmProgData::new();
        prog_data.binding_table.texture_start = 4;
        let code = generate_with(
            &DeviceInfo::hsw(),
            &WmProgKey::default(),
            &prog_data,
            &s,
        )
        .unwrap();

        assert_eq!(code.len(), 3);
        assert_eq!(field(&code[0], 53..61), 20);
        assert_eq!(field(&code[0], 9..10), 1);
        assert_eq!(field(&code[1], 48..53), 8);
        assert_eq!(field(&code[1], 96..128), 0x110);

        let send = &code[2];
        assert_eq!(field(send, 0..7), u64::from(BRW_OPCODE_SEND));
        assert_eq!(field(send, 24..28), u64::from(BRW_SFID_SAMPLER));
        assert_eq!(field(send, 53..61), 30);
        assert_eq!(field(send, 96..104), 6);
        assert_eq!(field(send, 104..108), 2);
        assert_eq!(field(send, 108..113), u64::from(GEN5_SAMPLER_MESSAGE_SAMPLE_LD));
        assert_eq!(field(send, 113..115), u64::from(BRW_SAMPLER_SIMD_MODE_SIMD16));
        assert_eq!(field(send, 116..121), 8);
        assert_eq!(field(send, 121..125), 5);
    }

    #[test]
    fn gen7_scratch_messages() {
        let mut s = Shader::new(8);
        let read = s.emit(
            Opcode::Gen7ScratchRead,
            FsReg::grf(40, RegType::UD),
            &[],
        );
        read.force_writemask_all = true;
        read.mlen = 1;
        read.rlen = 1;
        read.offset = 64;

        let code = generate(&DeviceInfo::ivb(), &s);
        let send = &code[0];
        assert_eq!(field(send, 24..28), u64::from(GEN7_SFID_DATAPORT_DATA_CACHE));
        assert_eq!(field(send, 69..77), 0);
        assert_eq!(field(send, 96..108), 2);
        assert_eq!(field(send, 113..114), 0);
        assert_eq!(field(send, 114..115), 1);
    }

    #[test]
    fn gen6_spill_goes_through_mrfs() {
        let mut s = Shader::new(8);
        let write = s.emit(
            Opcode::ScratchWrite,
            FsReg::null(RegType::UD),
            &[FsReg::grf(9, RegType::F)],
        );
        write.force_writemask_all = true;
        write.mlen = 2;
        write.base_mrf = Some(21);
        write.offset = 32;

        let code = generate(&DeviceInfo::snb(), &s);
        assert_eq!(code.len(), 4);
        /* Data into m22, g0 into m21, the offset in owords into m21.2 */
        assert_eq!(field(&code[0], 53..61), 22);
        assert_eq!(field(&code[0], 69..77), 9);
        assert_eq!(field(&code[1], 53..61), 21);
        assert_eq!(field(&code[2], 96..128), 2);
        let send = &code[3];
        assert_eq!(field(send, 96..104), u64::from(BRW_SCRATCH_SURFACE));
        assert_eq!(
            field(send, 109..113),
            u64::from(GEN6_DATAPORT_WRITE_MESSAGE_OWORD_BLOCK_WRITE)
        );
    }

    #[test]
    fn programs_are_aligned() {
        let mut s = Shader::new(8);
        s.mov(FsReg::grf(4, RegType::F), FsReg::grf(2, RegType::F));

        let prog = Program::new();
        let key = WmProgKey::default();
        let devinfo = DeviceInfo::hsw();
        let ctx = CompileContext::new(&devinfo, &key, &prog);
        let prog_data = WmProgData::new();
        let mut program = Vec::new();
        let (first, second) = {
            let mut generator = Generator::new(&ctx, &prog_data, &mut program);
            (
                generator.generate_code(&s).unwrap(),
                generator.generate_code(&s).unwrap(),
            )
        };
        assert_eq!(first, 0);
        assert_eq!(second, 64);
        assert_eq!(program.len(), 20);
        assert_eq!(program[4] & 0x7f, 126);
    }

    #[test]
    fn ivb_simd16_mad_split() {
        let mut s = Shader::new(16);
        s.emit(
            Opcode::Mad,
            FsReg::grf(10, RegType::F),
            &[
                FsReg::grf(2, RegType::F),
                FsReg::grf(4, RegType::F),
                FsReg::grf(6, RegType::F),
            ],
        );

        let code = generate(&DeviceInfo::ivb(), &s);
        assert_eq!(code.len(), 2);
        assert_eq!(field(&code[1], 56..64), 11);
        assert_eq!(field(&code[1], 76..84), 3);
        assert_eq!(field(&code[1], 97..105), 5);
        assert_eq!(field(&code[1], 118..126), 7);

        assert_eq!(generate(&DeviceInfo::hsw(), &s).len(), 1);
    }

    #[test]
    fn unencodable_operands_fail() {
        let mut s = Shader::new(8);
        s.emit(
            Opcode::Mad,
            FsReg::grf(10, RegType::F),
            &[
                FsReg::grf(2, RegType::F),
                FsReg::imm_f(2.0),
                FsReg::grf(6, RegType::F),
            ],
        );
        let err = generate_with(
            &DeviceInfo::hsw(),
            &WmProgKey::default(),
            &WmProgData::new(),
            &s,
        )
        .unwrap_err();
        assert!(matches!(err, CompileError::Unsupported(_)));
    }
}
