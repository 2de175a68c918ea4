/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

use crate::api::DeviceInfo;
use crate::ir::*;

fn is_regioned_alu(op: Opcode) -> bool {
    op.is_math()
        || matches!(
            op,
            Opcode::Mov
                | Opcode::Sel
                | Opcode::Not
                | Opcode::And
                | Opcode::Or
                | Opcode::Xor
                | Opcode::Shr
                | Opcode::Shl
                | Opcode::Asr
                | Opcode::Cmp
                | Opcode::Bfrev
                | Opcode::Bfe
                | Opcode::Bfi1
                | Opcode::Bfi2
                | Opcode::Add
                | Opcode::Mul
                | Opcode::Frc
                | Opcode::Rndu
                | Opcode::Rndd
                | Opcode::Rnde
                | Opcode::Rndz
                | Opcode::Lzd
                | Opcode::Fbh
                | Opcode::Fbl
                | Opcode::Cbit
                | Opcode::Mad
                | Opcode::Lrp
        )
}

/// Sources every channel reads the same value from
fn is_uniform(reg: &FsReg) -> bool {
    matches!(reg.file, RegFile::Uniform | RegFile::Imm) || reg.stride == 0
}

/// The widest execution size the hardware can run `instr` at
pub fn lowered_simd_width(devinfo: &DeviceInfo, instr: &Instr) -> u8 {
    let has_shadow = || {
        instr.srcs[TEX_LOGICAL_SRC_SHADOW_C].file != RegFile::Bad
    };

    match instr.opcode {
        op if is_regioned_alu(op) => {
            /* No region may span more than two registers */
            let regs = (0..instr.srcs.len())
                .map(|i| instr.regs_read(i))
                .fold(instr.regs_written(), std::cmp::max);
            instr.exec_size / std::cmp::max(regs.div_ceil(2), 1) as u8
        }
        /* The accumulator is eight channels wide */
        Opcode::Mulh if devinfo.gen >= 7 => 8,
        Opcode::FbWriteLogical
            if instr.srcs[FB_WRITE_LOGICAL_SRC_COLOR1].file
                != RegFile::Bad =>
        {
            8
        }
        Opcode::TxdLogical => 8,
        Opcode::Tg4OffsetLogical if has_shadow() => 8,
        /* Too long for the sampler at SIMD16 */
        Opcode::TxlLogical | Opcode::TxbLogical
            if devinfo.gen < 7 && has_shadow() =>
        {
            8
        }
        Opcode::TypedSurfaceReadLogical | Opcode::TypedSurfaceWriteLogical => 8,
        _ => instr.exec_size,
    }
}

fn split_instr(
    instr: &Instr,
    lower_width: u8,
    b: &mut impl VgrfBuilder,
) {
    assert!(instr.mlen == 0 && !instr.dst.is_accumulator());
    let n = instr.exec_size / lower_width;
    let writes_dst = instr.regs_written() > 0;
    let dst_size = if writes_dst {
        instr.regs_written() * REG_SIZE
            / instr.dst.component_size(instr.exec_size)
    } else {
        0
    };

    let mut dsts = Vec::new();
    for i in 0..n {
        let group = instr.group + i * lower_width;

        /* The i-th chunk of each varying source, one full-width component
         * at a time.
         */
        let chunks: Vec<Option<Vec<FsReg>>> = instr
            .srcs
            .iter()
            .enumerate()
            .map(|(j, src)| {
                if src.file == RegFile::Bad || is_uniform(src) {
                    return None;
                }
                let chunk = src.horiz_offset(u32::from(lower_width * i));
                Some(
                    (0..instr.components_read(j))
                        .map(|k| b.offset(chunk, k))
                        .collect(),
                )
            })
            .collect();

        let mut split = Box::new(instr.clone());
        split.exec_size = lower_width;
        split.group = group;
        split.eot = instr.eot && i == n - 1;

        let mut lb = b.group_builder(lower_width, group);
        for (j, chunk) in chunks.into_iter().enumerate() {
            let Some(comps) = chunk else {
                continue;
            };
            let tmp = lb.vgrf(instr.srcs[j].ty, comps.len() as u32);
            for (k, comp) in comps.into_iter().enumerate() {
                let d = lb.offset(tmp, k as u32);
                lb.mov(d, comp);
            }
            split.srcs[j] = tmp;
        }

        if writes_dst {
            let tmp = lb.vgrf(instr.dst.ty, dst_size);
            split.dst = tmp;
            if instr.opcode.is_send() {
                split.rlen = instr.rlen / n;
            }
            dsts.push((group, tmp));
        }

        lb.push_instr(split);
    }

    /* Stitch the results back together under the original write mask */
    let predicated = !instr.predicate.is_none() && instr.opcode != Opcode::Sel;
    for (i, (group, tmp)) in dsts.into_iter().enumerate() {
        let full: Vec<FsReg> = (0..dst_size)
            .map(|k| {
                b.offset(instr.dst, k)
                    .horiz_offset(u32::from(lower_width) * i as u32)
            })
            .collect();

        let mut lb = b.group_builder(lower_width, group);
        if predicated {
            lb = lb.with_predicate(
                instr.predicate,
                instr.predicate_inverse,
                instr.flag_subreg,
            );
        }
        for (k, d) in full.into_iter().enumerate() {
            let s = lb.offset(tmp, k as u32);
            lb.mov(d, s);
        }
    }
}

impl Shader {
    /// Splits instructions wider than the hardware supports into
    /// narrower ones
    pub fn lower_simd_width(&mut self, devinfo: &DeviceInfo) -> bool {
        let mut progress = false;
        self.map_instrs(|instr, alloc| {
            let lower_width = lowered_simd_width(devinfo, &instr);
            if lower_width == instr.exec_size {
                return MappedInstrs::One(instr);
            }
            assert!(lower_width < instr.exec_size);

            let mut b = FsBuilder::for_instr(alloc, &instr);
            split_instr(&instr, lower_width, &mut b);
            progress = true;
            b.as_mapped_instrs()
        });
        progress
    }
}
