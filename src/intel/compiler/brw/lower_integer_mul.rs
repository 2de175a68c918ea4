/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

use crate::api::DeviceInfo;
use crate::ir::*;

/// The low or high 16-bit words of a dword region
fn word(mut reg: FsReg, high: bool) -> FsReg {
    reg.ty = RegType::UW;
    if reg.stride != 0 {
        assert!(reg.stride == 1);
        reg.stride = 2;
    }
    if high {
        reg.subreg_offset += RegType::UW.size();
    }
    reg
}

fn is_word(reg: &FsReg) -> bool {
    matches!(reg.ty, RegType::W | RegType::UW)
}

fn needs_lowering(devinfo: &DeviceInfo, instr: &Instr) -> bool {
    match instr.opcode {
        Opcode::Mul => {
            /* The 32x16 source the hardware reads natively */
            let word_src = if devinfo.gen >= 7 {
                &instr.srcs[1]
            } else {
                &instr.srcs[0]
            };
            !instr.dst.is_accumulator()
                && matches!(instr.dst.ty, RegType::D | RegType::UD)
                && !is_word(word_src)
                /* Gen8 multiplies full dwords, except on Cherryview */
                && (devinfo.gen < 8 || devinfo.is_cherryview)
        }
        Opcode::Mulh => true,
        _ => false,
    }
}

/// 32x32 bit multiplies from two 32x16 bit ones
///
/// The hardware reads only 16 bits of one MUL source: src0 before Gen7
/// and src1 after.  The low word product lands in `low` and the high word
/// product gets added into the upper half of each dword.
fn lower_mul_dword(
    devinfo: &DeviceInfo,
    instr: &Instr,
    b: &mut impl VgrfBuilder,
) {
    let (src0, src1) = (instr.srcs[0], instr.srcs[1]);

    if src1.is_imm() && src1.u32() < (1 << 16) {
        if devinfo.gen < 7 {
            let imm = b.vgrf(RegType::UW, 1);
            b.mov(imm, FsReg::imm_uw(src1.u32() as u16));
            b.mul(instr.dst, imm, src0).cmod = instr.cmod;
        } else {
            b.mul(instr.dst, src0, src1).cmod = instr.cmod;
        }
        return;
    }

    let orig_dst = instr.dst;
    let low = if orig_dst.is_null() || orig_dst.file == RegFile::Mrf {
        b.vgrf(orig_dst.ty, 1)
    } else {
        orig_dst
    };
    let high = b.vgrf(orig_dst.ty, 1);

    if devinfo.gen >= 7 {
        let (lo_w, hi_w) = if src1.is_imm() {
            (FsReg::imm_ud(src1.u32() & 0xffff), FsReg::imm_ud(src1.u32() >> 16))
        } else {
            (word(src1, false), word(src1, true))
        };
        b.mul(low, src0, lo_w.retype(RegType::UW));
        b.mul(high, src0, hi_w.retype(RegType::UW));
    } else {
        b.mul(low, word(src0, false), src1);
        b.mul(high, word(src0, true), src1);
    }

    let mut sum_dst = low.retype(RegType::UW).with_stride(2);
    sum_dst.subreg_offset += 2;
    b.add(sum_dst, sum_dst, high.retype(RegType::UW).with_stride(2));

    if !instr.cmod.is_none() || orig_dst.file == RegFile::Mrf {
        b.mov(orig_dst, low).cmod = instr.cmod;
    }
}

/// The high dword of a 32x32 bit multiply through the accumulator
fn lower_mulh(devinfo: &DeviceInfo, instr: &Instr, b: &mut impl VgrfBuilder) {
    assert!(instr.exec_size <= 8);
    let acc = FsReg::acc(instr.dst.ty);

    let mul = b.mul(acc, instr.srcs[0], instr.srcs[1]);
    if devinfo.gen >= 8 {
        /* Gen8 MUL is a full 32x32 multiply, so narrow src1 to keep the
         * partial product MACH expects in the accumulator.
         */
        let src1 = &mut mul.srcs[1];
        assert!(matches!(src1.ty, RegType::D | RegType::UD));
        src1.ty = if src1.ty.is_signed() {
            RegType::W
        } else {
            RegType::UW
        };
        src1.stride *= 2;
        b.emit(Opcode::Mach, instr.dst, &[instr.srcs[0], instr.srcs[1]]);
    } else if devinfo.is_gen7_ivb_class() && instr.group >= 8 {
        /* A second-half MACH would use acc1, which doesn't exist for
         * integers on Ivy Bridge.  Run it as the first quarter on all
         * channels and copy out under the real channel enables.
         */
        let tmp = b.vgrf(instr.dst.ty, 1);
        b.group_builder(8, 0)
            .with_exec_all()
            .emit(Opcode::Mach, tmp, &[instr.srcs[0], instr.srcs[1]]);
        b.mov(instr.dst, tmp);
    } else {
        b.emit(Opcode::Mach, instr.dst, &[instr.srcs[0], instr.srcs[1]]);
    }
}

impl Shader {
    /// Replaces dword multiplies the hardware can't do in one instruction
    pub fn lower_integer_multiplication(&mut self, devinfo: &DeviceInfo) -> bool {
        let mut progress = false;
        self.map_instrs(|instr, alloc| {
            if !needs_lowering(devinfo, &instr) {
                return MappedInstrs::One(instr);
            }
            /* Gen7 takes a 16-bit immediate as is */
            if instr.opcode == Opcode::Mul
                && devinfo.gen >= 7
                && instr.srcs[1].is_imm()
                && instr.srcs[1].u32() < (1 << 16)
            {
                return MappedInstrs::One(instr);
            }

            let mut b = FsBuilder::for_instr(alloc, &instr);
            if instr.opcode == Opcode::Mul {
                lower_mul_dword(devinfo, &instr, &mut b);
            } else {
                lower_mulh(devinfo, &instr, &mut b);
            }
            progress = true;
            b.as_mapped_instrs()
        });
        progress
    }
}
