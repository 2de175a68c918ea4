/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

use crate::cfg::CFG;
use crate::ir::*;

fn is_expression(instr: &Instr, alloc: &VirtualGrfs) -> bool {
    match instr.opcode {
        Opcode::Sel
        | Opcode::Not
        | Opcode::And
        | Opcode::Or
        | Opcode::Xor
        | Opcode::Shr
        | Opcode::Shl
        | Opcode::Asr
        | Opcode::Cmp
        | Opcode::Add
        | Opcode::Mul
        | Opcode::Mulh
        | Opcode::Frc
        | Opcode::Rndu
        | Opcode::Rndd
        | Opcode::Rnde
        | Opcode::Rndz
        | Opcode::Line
        | Opcode::Pln
        | Opcode::Mad
        | Opcode::Lrp
        | Opcode::Cinterp
        | Opcode::Linterp
        | Opcode::UniformPullConstantLoad
        | Opcode::UniformPullConstantLoadGen7 => true,
        Opcode::LoadPayload => !instr.is_copy_payload(alloc),
        op if op.is_math() => true,
        /* Surface reads may observe earlier writes */
        op if op.is_surface_access() => false,
        _ => instr.is_send_from_grf() && !instr.has_side_effects(),
    }
}

/// Compares the sources of two instructions with the same opcode
///
/// Returns `Some(negate)` on a match, where `negate` says that `b`
/// computes the negation of `a`.
fn operands_match(a: &Instr, b: &Instr) -> Option<bool> {
    let (xs, ys) = (&a.srcs, &b.srcs);
    if xs.len() != ys.len() {
        return None;
    }

    let matched = if a.opcode == Opcode::Mad {
        xs[0] == ys[0]
            && ((xs[1] == ys[1] && xs[2] == ys[2])
                || (xs[2] == ys[1] && xs[1] == ys[2]))
    } else if a.opcode == Opcode::Mul && a.dst.ty == RegType::F {
        /* Float products match up to the sign of either factor */
        let strip = |r: &FsReg| -> (FsReg, bool) {
            if r.is_imm() {
                (FsReg::imm_f(r.f32().abs()), r.f32() < 0.0)
            } else {
                let mut r = *r;
                let neg = r.negate;
                r.negate = false;
                (r, neg)
            }
        };
        let (x0, x0n) = strip(&xs[0]);
        let (x1, x1n) = strip(&xs[1]);
        let (y0, y0n) = strip(&ys[0]);
        let (y1, y1n) = strip(&ys[1]);
        if (x0 == y0 && x1 == y1) || (x1 == y0 && x0 == y1) {
            return Some((x0n != x1n) != (y0n != y1n));
        }
        false
    } else if !a.opcode.is_commutative() {
        xs == ys
    } else {
        (xs[0] == ys[0] && xs[1] == ys[1]) || (xs[1] == ys[0] && xs[0] == ys[1])
    };

    matched.then_some(false)
}

fn instructions_match(a: &Instr, b: &Instr) -> Option<bool> {
    if a.opcode != b.opcode
        || a.force_writemask_all != b.force_writemask_all
        || a.exec_size != b.exec_size
        || a.group != b.group
        || a.saturate != b.saturate
        || a.predicate != b.predicate
        || a.predicate_inverse != b.predicate_inverse
        || a.cmod != b.cmod
        || a.flag_subreg != b.flag_subreg
        || a.dst.ty != b.dst.ty
        || a.offset != b.offset
        || a.mlen != b.mlen
        || a.rlen != b.rlen
        || a.regs_written() != b.regs_written()
        || a.base_mrf != b.base_mrf
        || a.eot != b.eot
        || a.header_size != b.header_size
        || a.target != b.target
        || a.shadow_compare != b.shadow_compare
    {
        return None;
    }
    operands_match(a, b)
}

/// Builds the instructions copying `src` to the destination of `instr`
fn create_copy(instr: &Instr, src: FsReg, negate: bool) -> Vec<Box<Instr>> {
    let written = instr.regs_written();
    let dst_width = instr
        .dst
        .component_size(instr.exec_size)
        .div_ceil(REG_SIZE);

    let mut b = InstrBuilder::for_instr(instr);
    if written > dst_width {
        let (sources, header_size) = if instr.opcode == Opcode::LoadPayload {
            (instr.srcs.len(), instr.header_size)
        } else {
            assert!(written % dst_width == 0);
            ((written / dst_width) as usize, 0)
        };

        let mut payload = Vec::with_capacity(sources);
        let mut src = src;
        for i in 0..sources {
            payload.push(src);
            src = if i < usize::from(header_size) {
                src.offset(1)
            } else {
                b.offset(src, 1)
            };
        }
        b.load_payload(instr.dst, &payload, header_size);
    } else {
        b.mov(instr.dst, if negate { src.fneg() } else { src });
    }

    let copy = b.as_vec();
    debug_assert_eq!(copy[0].regs_written(), written);
    copy
}

/// An available expression and the temporary holding its value, once a
/// second use has been found
struct AebEntry {
    generator: usize,
    tmp: Option<FsReg>,
}

struct CsePass {
    /// Each original instruction followed by the copies inserted after
    /// it.  An empty slot is a removed instruction.
    slots: Vec<Vec<Box<Instr>>>,
    progress: bool,
}

impl CsePass {
    fn new(s: &mut Shader) -> Self {
        Self {
            slots: s.instrs.drain(..).map(|i| vec![i]).collect(),
            progress: false,
        }
    }

    fn generator(&self, e: &AebEntry) -> &Instr {
        &self.slots[e.generator][0]
    }

    fn find_match(
        &self,
        aeb: &[AebEntry],
        instr: &Instr,
    ) -> Option<(usize, bool)> {
        aeb.iter().enumerate().find_map(|(idx, e)| {
            let g = self.generator(e);
            if g.dst.is_null() && !instr.dst.is_null() {
                return None;
            }
            instructions_match(instr, g).map(|negate| (idx, negate))
        })
    }

    fn replace_with_tmp(
        &mut self,
        alloc: &mut VirtualGrfs,
        entry: &mut AebEntry,
        ip: usize,
        negate: bool,
    ) {
        let gen = entry.generator;
        if entry.tmp.is_none() && !self.slots[gen][0].dst.is_null() {
            let g = &self.slots[gen][0];
            let tmp = FsReg::vgrf(alloc.allocate(g.regs_written()), g.dst.ty);
            let copy = create_copy(g, tmp, false);
            self.slots[gen][0].dst = tmp;
            self.slots[gen].extend(copy);
            entry.tmp = Some(tmp);
        }

        let instr = &self.slots[ip][0];
        let copy = if instr.dst.is_null() {
            Vec::new()
        } else {
            let tmp = entry.tmp.expect("Matched generator has a temporary");
            create_copy(instr, tmp, negate)
        };
        self.slots[ip] = copy;
        self.progress = true;
    }

    fn kill(&self, aeb: &mut Vec<AebEntry>, ip: usize) {
        for instr in &self.slots[ip] {
            aeb.retain(|e| {
                let g = self.generator(e);
                if instr.writes_flag()
                    && (g.reads_flag()
                        || (g.writes_flag()
                            && instructions_match(instr, g).is_none()))
                {
                    return false;
                }
                !g.srcs.iter().any(|src| instr.overwrites_reg(src))
            });
        }
    }

    fn run(mut self, s: &mut Shader, cfg: &CFG) -> bool {
        for block in cfg.iter() {
            let mut aeb: Vec<AebEntry> = Vec::new();
            for ip in block.ips.clone() {
                let instr = &self.slots[ip][0];
                if is_expression(instr, &s.alloc)
                    && !instr.is_partial_write()
                    && (instr.dst.is_vgrf() || instr.dst.is_null())
                {
                    match self.find_match(&aeb, instr) {
                        Some((idx, negate)) => {
                            let mut entry = aeb.remove(idx);
                            self.replace_with_tmp(
                                &mut s.alloc,
                                &mut entry,
                                ip,
                                negate,
                            );
                            aeb.insert(idx, entry);
                        }
                        None => aeb.push(AebEntry {
                            generator: ip,
                            tmp: None,
                        }),
                    }
                }
                self.kill(&mut aeb, ip);
            }
        }

        s.instrs = self.slots.into_iter().flatten().collect();
        self.progress
    }
}

impl Shader {
    /// Replaces repeated computations within a block with copies of the
    /// first result
    pub fn opt_cse(&mut self) -> bool {
        let cfg = CFG::for_shader(self);
        CsePass::new(self).run(self, &cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Shader, [FsReg; 4]) {
        let mut s = Shader::new(8);
        let regs = [
            s.vgrf(RegType::F, 1),
            s.vgrf(RegType::F, 1),
            s.vgrf(RegType::F, 1),
            s.vgrf(RegType::F, 1),
        ];
        (s, regs)
    }

    #[test]
    fn repeated_add_reuses_result() {
        let (mut s, [a, b, d0, d1]) = setup();
        s.add(d0, a, b);
        s.add(d1, b, a);

        assert!(s.opt_cse());
        assert_eq!(s.instrs.len(), 3);
        let tmp = s.instrs[0].dst;
        assert_eq!(tmp.nr, 4);
        assert_eq!(s.instrs[1].opcode, Opcode::Mov);
        assert_eq!(s.instrs[1].dst, d0);
        assert_eq!(s.instrs[1].srcs[0], tmp);
        assert_eq!(s.instrs[2].opcode, Opcode::Mov);
        assert_eq!(s.instrs[2].dst, d1);
        assert_eq!(s.instrs[2].srcs[0], tmp);

        assert!(!s.opt_cse());
    }

    #[test]
    fn repeated_flag_write_is_removed() {
        let (mut s, [a, b, _, _]) = setup();
        s.cmp(FsReg::null(RegType::F), a, b, CondMod::G);
        s.cmp(FsReg::null(RegType::F), a, b, CondMod::G);

        assert!(s.opt_cse());
        assert_eq!(s.instrs.len(), 1);
    }

    #[test]
    fn overwritten_source_blocks_reuse() {
        let (mut s, [a, b, d0, d1]) = setup();
        s.add(d0, a, b);
        s.mov(a, FsReg::imm_f(1.0));
        s.add(d1, a, b);

        assert!(!s.opt_cse());
        assert_eq!(s.instrs.len(), 3);
    }

    #[test]
    fn negated_product() {
        let (mut s, [a, b, d0, d1]) = setup();
        s.mul(d0, a, b.fneg());
        s.mul(d1, a, b);

        assert!(s.opt_cse());
        let tmp = s.instrs[0].dst;
        assert_eq!(s.instrs[1].srcs[0], tmp);
        assert_eq!(s.instrs[2].dst, d1);
        assert_eq!(s.instrs[2].srcs[0], tmp.fneg());
    }

    #[test]
    fn texture_result_copied_with_payload() {
        let (mut s, [coord, _, _, _]) = setup();
        let d0 = s.vgrf(RegType::F, 4);
        let d1 = s.vgrf(RegType::F, 4);
        for d in [d0, d1] {
            let tex = s.emit(Opcode::Tex, d, &[coord, FsReg::imm_ud(0)]);
            tex.rlen = 4;
            tex.mlen = 1;
        }

        assert!(s.opt_cse());
        assert_eq!(s.instrs.len(), 3);
        assert_eq!(s.instrs[1].opcode, Opcode::LoadPayload);
        assert_eq!(s.instrs[1].srcs.len(), 4);
        assert_eq!(s.instrs[2].opcode, Opcode::LoadPayload);
        assert_eq!(s.instrs[2].dst, d1);
    }
}
