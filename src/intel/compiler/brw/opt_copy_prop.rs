/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

use crate::api::DeviceInfo;
use crate::cfg::CFG;
use crate::ir::*;

use rustc_hash::FxHashMap;

/// A copy whose source may stand in for reads of its destination
#[derive(Clone, Copy, Debug)]
struct CopyEntry {
    dst: FsReg,
    src: FsReg,
    regs_written: u32,
    opcode: Opcode,
    saturate: bool,
}

impl CopyEntry {
    /// Returns true if source `i` of `instr` only reads what this copy
    /// wrote
    fn covers(&self, instr: &Instr, i: usize) -> bool {
        let src = &instr.srcs[i];
        if src.file != RegFile::Vgrf
            || src.nr != self.dst.nr
            || src.reg_offset < self.dst.reg_offset
        {
            return false;
        }

        let end = src.reg_offset * REG_SIZE
            + src.subreg_offset
            + instr.regs_read(i) * u32::from(src.stride) * REG_SIZE;
        end <= (self.dst.reg_offset + self.regs_written) * REG_SIZE
    }

    fn src_regs(&self) -> u32 {
        if self.src.stride == 0 {
            1
        } else {
            self.regs_written
        }
    }
}

fn can_propagate_from(instr: &Instr) -> bool {
    instr.opcode == Opcode::Mov
        && instr.dst.file == RegFile::Vgrf
        && match instr.srcs[0].file {
            RegFile::Vgrf => !instr.srcs[0].same_location(&instr.dst),
            RegFile::Uniform | RegFile::Imm => true,
            _ => false,
        }
        && instr.srcs[0].ty == instr.dst.ty
        && !instr.is_partial_write()
}

fn try_copy_propagate(
    gen: u32,
    instr: &mut Instr,
    i: usize,
    entry: &CopyEntry,
) -> bool {
    if entry.src.file == RegFile::Imm {
        return false;
    }

    if entry.opcode == Opcode::LoadPayload
        && instr.opcode == Opcode::LoadPayload
    {
        return false;
    }

    if !entry.covers(instr, i) {
        return false;
    }

    if entry.dst.subreg_offset != 0 || entry.dst.stride != 1 {
        return false;
    }

    let src = instr.srcs[i];

    /* A negated UD source may later be read as signed */
    if src.ty == RegType::UD && src.negate {
        return false;
    }

    let has_source_modifiers = entry.src.abs || entry.src.negate;
    if (has_source_modifiers
        || entry.src.file == RegFile::Uniform
        || !entry.src.is_contiguous())
        && !instr.can_do_source_mods(gen)
    {
        return false;
    }

    if has_source_modifiers && entry.dst.ty != src.ty {
        return false;
    }

    let stride = u32::from(entry.src.stride) * u32::from(src.stride);
    if stride > 4 {
        return false;
    }

    if instr.opcode.is_three_src() && stride > 1 {
        return false;
    }

    /* Each channel would read several channels of the copy */
    if entry.dst.ty.size() < src.ty.size() {
        return false;
    }

    /* The composed region must still be expressible as one stride */
    if entry.src.stride != 1
        && (u32::from(src.stride) * src.ty.size()) % entry.src.ty.size() != 0
    {
        return false;
    }

    if entry.saturate {
        let sel_in_range = instr.opcode == Opcode::Sel
            && instr.srcs[1].is_imm()
            && instr.srcs[1].f32() >= 0.0
            && instr.srcs[1].f32() <= 1.0;
        if !sel_in_range {
            return false;
        }
    }

    let rel_offset = (src.reg_offset - entry.dst.reg_offset) * REG_SIZE
        + src.subreg_offset;
    let component = rel_offset / entry.dst.ty.size();
    let suboffset = rel_offset % entry.dst.ty.size();

    /* Uniform offsets count components rather than registers */
    let reg_size = if entry.src.file == RegFile::Uniform {
        entry.src.ty.size()
    } else {
        REG_SIZE
    };
    let first_offset =
        entry.src.reg_offset * reg_size + entry.src.subreg_offset;
    let offset = suboffset
        + component * u32::from(entry.src.stride) * entry.src.ty.size()
        + first_offset;

    let new = &mut instr.srcs[i];
    new.file = entry.src.file;
    new.nr = entry.src.nr;
    new.stride = stride as u8;
    new.reg_offset = offset / reg_size;
    new.subreg_offset = offset % reg_size;
    if has_source_modifiers && !new.abs {
        new.abs = entry.src.abs;
        new.negate ^= entry.src.negate;
    }
    instr.saturate |= entry.saturate;

    true
}

/// Returns the immediate `entry` provides for source `i`, with the
/// source's own modifiers folded in
fn immediate_for_src(src: &FsReg, entry: &CopyEntry) -> Option<FsReg> {
    let mut val = entry.src.retype(src.ty);
    if src.abs {
        if !matches!(val.ty, RegType::F | RegType::D | RegType::UD) {
            return None;
        }
        val = val.fabs();
    }
    if src.negate {
        if val.ty.size() < 2 {
            return None;
        }
        val = val.fneg();
    }
    Some(val)
}

fn try_constant_propagate(
    gen: u32,
    instr: &mut Instr,
    i: usize,
    entry: &CopyEntry,
) -> bool {
    if entry.src.file != RegFile::Imm || entry.saturate {
        return false;
    }

    if !entry.covers(instr, i) {
        return false;
    }

    let Some(val) = immediate_for_src(&instr.srcs[i], entry) else {
        return false;
    };

    let src1_imm = instr.srcs.len() > 1 && instr.srcs[1].is_imm();

    match instr.opcode {
        Opcode::Mov | Opcode::LoadPayload | Opcode::UniformPullConstantLoad => {
            instr.srcs[i] = val;
            true
        }
        op if op.is_logical() => {
            instr.srcs[i] = val;
            true
        }

        /* Math takes immediates in src1 from Gen8 on */
        Opcode::Pow | Opcode::IntQuotient | Opcode::IntRemainder => {
            if gen >= 8 && i == 1 {
                instr.srcs[i] = val;
                true
            } else {
                false
            }
        }

        Opcode::Bfi1 | Opcode::Asr | Opcode::Shl | Opcode::Shr => {
            if i == 1 {
                instr.srcs[i] = val;
                true
            } else {
                false
            }
        }

        Opcode::Mach
        | Opcode::Mul
        | Opcode::Mulh
        | Opcode::Add
        | Opcode::Or
        | Opcode::And
        | Opcode::Xor => {
            if i == 1 {
                instr.srcs[i] = val;
                true
            } else if i == 0 && !src1_imm {
                /* 32-bit integer multiplies need the dword source in src0 */
                if matches!(instr.opcode, Opcode::Mul | Opcode::Mach)
                    && instr.srcs[1].ty.is_dword_int()
                {
                    return false;
                }
                instr.srcs[0] = instr.srcs[1];
                instr.srcs[1] = val;
                true
            } else {
                false
            }
        }

        Opcode::Cmp => {
            if i == 1 {
                instr.srcs[i] = val;
                true
            } else if i == 0 && !src1_imm {
                instr.srcs[0] = instr.srcs[1];
                instr.srcs[1] = val;
                instr.cmod = instr.cmod.swap();
                true
            } else {
                false
            }
        }

        Opcode::Sel => {
            if i == 1 {
                instr.srcs[i] = val;
                true
            } else if i == 0 && !src1_imm {
                instr.srcs[0] = instr.srcs[1];
                instr.srcs[1] = val;
                if instr.cmod.is_none() {
                    instr.predicate_inverse = !instr.predicate_inverse;
                }
                true
            } else {
                false
            }
        }

        _ => false,
    }
}

struct CopyPropPass {
    gen: u32,
    acp: FxHashMap<u32, Vec<CopyEntry>>,
}

impl CopyPropPass {
    fn new(devinfo: &DeviceInfo) -> Self {
        Self {
            gen: devinfo.gen,
            acp: FxHashMap::default(),
        }
    }

    fn propagate_into(&self, instr: &mut Instr) -> bool {
        let mut progress = false;
        for i in (0..instr.srcs.len()).rev() {
            if instr.srcs[i].file != RegFile::Vgrf {
                continue;
            }
            let Some(entries) = self.acp.get(&instr.srcs[i].nr) else {
                continue;
            };
            for entry in entries {
                if try_constant_propagate(self.gen, instr, i, entry)
                    || try_copy_propagate(self.gen, instr, i, entry)
                {
                    progress = true;
                    break;
                }
            }
        }
        progress
    }

    fn kill(&mut self, instr: &Instr) {
        if instr.dst.file != RegFile::Vgrf {
            return;
        }
        let written = instr.regs_written();
        for entries in self.acp.values_mut() {
            entries.retain(|e| {
                !e.dst.regions_overlap(e.regs_written, &instr.dst, written)
                    && !e.src.regions_overlap(e.src_regs(), &instr.dst, written)
            });
        }
    }

    fn add_copies(&mut self, instr: &Instr) {
        if can_propagate_from(instr) {
            self.acp.entry(instr.dst.nr).or_default().push(CopyEntry {
                dst: instr.dst,
                src: instr.srcs[0],
                regs_written: instr.regs_written(),
                opcode: instr.opcode,
                saturate: instr.saturate,
            });
        } else if instr.opcode == Opcode::LoadPayload
            && instr.dst.file == RegFile::Vgrf
        {
            let mut offset = 0;
            for (i, src) in instr.srcs.iter().enumerate() {
                let regs = if i < usize::from(instr.header_size) {
                    1
                } else {
                    (u32::from(instr.exec_size) * 4).div_ceil(REG_SIZE)
                };
                let dst = instr.dst.offset(offset);
                if src.file == RegFile::Vgrf && !src.same_location(&dst) {
                    self.acp.entry(dst.nr).or_default().push(CopyEntry {
                        dst: dst,
                        src: *src,
                        regs_written: regs,
                        opcode: instr.opcode,
                        saturate: false,
                    });
                }
                offset += regs;
            }
        }
    }

    fn run(&mut self, s: &mut Shader) -> bool {
        let cfg = CFG::for_shader(s);
        let mut progress = false;

        for block in cfg.iter() {
            self.acp.clear();
            for ip in block.ips.clone() {
                let instr = &mut s.instrs[ip];
                progress |= self.propagate_into(instr);
                self.kill(instr);
                self.add_copies(instr);
            }
        }

        progress
    }
}

impl Shader {
    /// Forwards MOV and LOAD_PAYLOAD sources into later reads within a
    /// block
    pub fn opt_copy_propagate(&mut self, devinfo: &DeviceInfo) -> bool {
        CopyPropPass::new(devinfo).run(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push(s: &mut Shader, op: Opcode, dst: FsReg, srcs: &[FsReg]) -> usize {
        s.instrs.push(Instr::new_boxed(op, 8, dst, srcs));
        s.instrs.len() - 1
    }

    #[test]
    fn forwards_vgrf_copy() {
        let mut s = Shader::new(8);
        let v0 = s.vgrf(RegType::F, 1);
        let v1 = s.vgrf(RegType::F, 1);
        let v2 = s.vgrf(RegType::F, 1);
        let v3 = s.vgrf(RegType::F, 1);
        push(&mut s, Opcode::Mov, v1, &[v0]);
        let add = push(&mut s, Opcode::Add, v3, &[v1, v2]);

        assert!(s.opt_copy_propagate(&DeviceInfo::ivb()));
        assert_eq!(s.instrs[add].srcs[0], v0);
        assert_eq!(s.instrs[add].srcs[1], v2);
    }

    #[test]
    fn constant_commutes_into_src1() {
        let mut s = Shader::new(8);
        let v1 = s.vgrf(RegType::F, 1);
        let v2 = s.vgrf(RegType::F, 1);
        let v3 = s.vgrf(RegType::F, 1);
        push(&mut s, Opcode::Mov, v1, &[FsReg::imm_f(2.0)]);
        let mul = push(&mut s, Opcode::Mul, v3, &[v1, v2]);

        assert!(s.opt_copy_propagate(&DeviceInfo::ivb()));
        assert_eq!(s.instrs[mul].srcs[0], v2);
        assert_eq!(s.instrs[mul].srcs[1], FsReg::imm_f(2.0));
    }

    #[test]
    fn constant_into_cmp_src0_swaps_condition() {
        let mut s = Shader::new(8);
        let v1 = s.vgrf(RegType::F, 1);
        let v2 = s.vgrf(RegType::F, 1);
        push(&mut s, Opcode::Mov, v1, &[FsReg::imm_f(1.0)]);
        let cmp =
            push(&mut s, Opcode::Cmp, FsReg::null(RegType::F), &[v1, v2]);
        s.instrs[cmp].cmod = CondMod::G;

        assert!(s.opt_copy_propagate(&DeviceInfo::ivb()));
        assert_eq!(s.instrs[cmp].srcs[0], v2);
        assert!(s.instrs[cmp].srcs[1].is_imm());
        assert_eq!(s.instrs[cmp].cmod, CondMod::L);
    }

    #[test]
    fn negated_constant_folds_modifier() {
        let mut s = Shader::new(8);
        let v1 = s.vgrf(RegType::F, 1);
        let v2 = s.vgrf(RegType::F, 1);
        push(&mut s, Opcode::Mov, v1, &[FsReg::imm_f(3.0)]);
        let mov = push(&mut s, Opcode::Mov, v2, &[v1.fneg()]);

        assert!(s.opt_copy_propagate(&DeviceInfo::ivb()));
        assert_eq!(s.instrs[mov].srcs[0], FsReg::imm_f(-3.0));
    }

    #[test]
    fn uniform_not_forwarded_into_gen6_math() {
        let build = || {
            let mut s = Shader::new(8);
            let v1 = s.vgrf(RegType::F, 1);
            let v2 = s.vgrf(RegType::F, 1);
            push(&mut s, Opcode::Mov, v1, &[FsReg::uniform(0, RegType::F)]);
            push(&mut s, Opcode::Rcp, v2, &[v1]);
            s
        };

        let mut s = build();
        assert!(!s.opt_copy_propagate(&DeviceInfo::snb()));
        assert_eq!(s.instrs[1].srcs[0].file, RegFile::Vgrf);

        let mut s = build();
        assert!(s.opt_copy_propagate(&DeviceInfo::ivb()));
        assert_eq!(s.instrs[1].srcs[0].file, RegFile::Uniform);
    }

    #[test]
    fn overwritten_source_kills_copy() {
        let mut s = Shader::new(8);
        let v0 = s.vgrf(RegType::F, 1);
        let v1 = s.vgrf(RegType::F, 1);
        let v3 = s.vgrf(RegType::F, 1);
        push(&mut s, Opcode::Mov, v1, &[v0]);
        push(&mut s, Opcode::Mov, v0, &[FsReg::imm_f(1.0)]);
        let add = push(&mut s, Opcode::Add, v3, &[v1, v1]);

        assert!(!s.opt_copy_propagate(&DeviceInfo::ivb()));
        assert_eq!(s.instrs[add].srcs[0], v1);
    }

    #[test]
    fn copies_do_not_cross_blocks() {
        let mut s = Shader::new(8);
        let v0 = s.vgrf(RegType::F, 1);
        let v1 = s.vgrf(RegType::F, 1);
        let v3 = s.vgrf(RegType::F, 1);
        push(&mut s, Opcode::Mov, v1, &[v0]);
        push(&mut s, Opcode::If, FsReg::null(RegType::D), &[]);
        let add = push(&mut s, Opcode::Add, v3, &[v1, v1]);
        push(&mut s, Opcode::Endif, FsReg::null(RegType::D), &[]);

        assert!(!s.opt_copy_propagate(&DeviceInfo::ivb()));
        assert_eq!(s.instrs[add].srcs[0], v1);
    }

    #[test]
    fn scalar_load_is_smeared_into_use() {
        let mut s = Shader::new(16);
        let packed = s.vgrf(RegType::F, 1);
        let v1 = s.vgrf(RegType::F, 1);
        let v2 = s.vgrf(RegType::F, 1);
        s.instrs.push(Instr::new_boxed(
            Opcode::Mov,
            16,
            v1,
            &[packed.smear(2)],
        ));
        s.instrs
            .push(Instr::new_boxed(Opcode::Add, 16, v2, &[v1, v1]));

        assert!(s.opt_copy_propagate(&DeviceInfo::ivb()));
        let src = s.instrs[1].srcs[0];
        assert_eq!(src.nr, packed.nr);
        assert_eq!(src.stride, 0);
        assert_eq!(src.subreg_offset, 8);
    }
}
