/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

use crate::cfg::CFG;
use crate::ir::*;

/// Returns true if `instr` only tests its first source against zero and
/// could instead be folded into whatever computed that source
fn is_flag_test(instr: &Instr) -> bool {
    if !matches!(instr.opcode, Opcode::And | Opcode::Cmp | Opcode::Mov)
        || !instr.predicate.is_none()
        || !instr.dst.is_null()
        || instr.srcs[0].file != RegFile::Vgrf
        || instr.srcs[0].abs
    {
        return false;
    }

    match instr.opcode {
        /* Only AND.NZ with 1 tests the low bit of a boolean.  AND.Z would
         * need the producer's condition inverted, which changes its
         * destination value too.
         */
        Opcode::And => {
            instr.srcs[1].is_one()
                && instr.cmod == CondMod::NZ
                && !instr.srcs[0].negate
        }
        Opcode::Cmp => instr.srcs[1].is_zero(),
        Opcode::Mov => instr.cmod == CondMod::NZ,
        _ => false,
    }
}

struct CmodPropPass {
    dead: Vec<usize>,
}

impl CmodPropPass {
    fn new() -> Self {
        Self { dead: Vec::new() }
    }

    /// Tries to fold the test at `ip` into an earlier instruction of the
    /// block starting at `start`
    fn try_propagate(&mut self, s: &mut Shader, start: usize, ip: usize) {
        let test = &s.instrs[ip];
        let src = test.srcs[0];
        let test_op = test.opcode;
        let test_cmod = test.cmod;
        let test_ty = test.dst.ty;

        let mut read_flag = false;
        for scan_ip in (start..ip).rev() {
            let scan = &mut s.instrs[scan_ip];

            if scan.overwrites_reg(&src) {
                if scan.is_partial_write()
                    || scan.dst.reg_offset != src.reg_offset
                {
                    return;
                }

                /* A CMP writes the same flag whatever its destination type */
                if test_cmod == CondMod::NZ
                    && scan.opcode == Opcode::Cmp
                    && test_ty.is_dword_int()
                {
                    self.dead.push(ip);
                    return;
                }

                if test_op == Opcode::And {
                    return;
                }

                /* Integer and float comparisons differ */
                if scan.dst.ty != test_ty {
                    return;
                }

                /* The producer already wrote the flag we would test */
                if test_cmod == CondMod::NZ
                    && !src.negate
                    && scan.writes_flag()
                {
                    self.dead.push(ip);
                    return;
                }

                let cond = if src.negate {
                    test_cmod.swap()
                } else {
                    test_cmod
                };

                if scan.opcode.can_do_cmod()
                    && ((!read_flag && scan.cmod.is_none())
                        || scan.cmod == cond)
                {
                    scan.cmod = cond;
                    self.dead.push(ip);
                }
                return;
            }

            if scan.writes_flag() {
                return;
            }

            read_flag |= scan.reads_flag();
        }
    }

    fn run(&mut self, s: &mut Shader) -> bool {
        let cfg = CFG::for_shader(s);

        for block in cfg.iter() {
            for ip in block.ips.clone().rev() {
                if is_flag_test(&s.instrs[ip]) {
                    self.try_propagate(s, block.start_ip(), ip);
                }
            }
        }

        self.dead.sort();
        s.remove_instrs(&self.dead);
        !self.dead.is_empty()
    }
}

impl Shader {
    /// Folds comparisons against zero into the conditional modifier of the
    /// instruction which produced the compared value
    pub fn opt_cmod_propagation(&mut self) -> bool {
        CmodPropPass::new().run(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn null_f() -> FsReg {
        FsReg::null(RegType::F)
    }

    fn opcodes(s: &Shader) -> Vec<Opcode> {
        s.instrs.iter().map(|i| i.opcode).collect()
    }

    #[test]
    fn basic() {
        let mut s = Shader::new(8);
        let dest = s.vgrf(RegType::F, 1);
        let src0 = s.vgrf(RegType::F, 1);
        let src1 = s.vgrf(RegType::F, 1);
        s.add(dest, src0, src1);
        s.cmp(null_f(), dest, FsReg::imm_f(0.0), CondMod::GE);

        assert!(s.opt_cmod_propagation());
        assert_eq!(opcodes(&s), [Opcode::Add]);
        assert_eq!(s.instrs[0].cmod, CondMod::GE);
    }

    #[test]
    fn cmp_nonzero() {
        let mut s = Shader::new(8);
        let dest = s.vgrf(RegType::F, 1);
        let src0 = s.vgrf(RegType::F, 1);
        let src1 = s.vgrf(RegType::F, 1);
        s.add(dest, src0, src1);
        s.cmp(null_f(), dest, FsReg::imm_f(1.0), CondMod::GE);

        assert!(!s.opt_cmod_propagation());
        assert_eq!(opcodes(&s), [Opcode::Add, Opcode::Cmp]);
        assert_eq!(s.instrs[1].cmod, CondMod::GE);
    }

    #[test]
    fn non_cmod_instruction() {
        let mut s = Shader::new(8);
        let dest = s.vgrf(RegType::UD, 1);
        let src0 = s.vgrf(RegType::UD, 1);
        s.emit(Opcode::Fbl, dest, &[src0]);
        s.cmp(
            FsReg::null(RegType::UD),
            dest,
            FsReg::imm_ud(0),
            CondMod::GE,
        );

        assert!(!s.opt_cmod_propagation());
        assert_eq!(opcodes(&s), [Opcode::Fbl, Opcode::Cmp]);
        assert_eq!(s.instrs[1].cmod, CondMod::GE);
    }

    #[test]
    fn intervening_flag_write() {
        let mut s = Shader::new(8);
        let dest = s.vgrf(RegType::F, 1);
        let src0 = s.vgrf(RegType::F, 1);
        let src1 = s.vgrf(RegType::F, 1);
        let src2 = s.vgrf(RegType::F, 1);
        s.add(dest, src0, src1);
        s.cmp(null_f(), src2, FsReg::imm_f(0.0), CondMod::GE);
        s.cmp(null_f(), dest, FsReg::imm_f(0.0), CondMod::GE);

        assert!(!s.opt_cmod_propagation());
        assert_eq!(opcodes(&s), [Opcode::Add, Opcode::Cmp, Opcode::Cmp]);
        assert_eq!(s.instrs[0].cmod, CondMod::None);
        assert_eq!(s.instrs[1].cmod, CondMod::GE);
        assert_eq!(s.instrs[2].cmod, CondMod::GE);
    }

    #[test]
    fn intervening_flag_read() {
        let mut s = Shader::new(8);
        let dest0 = s.vgrf(RegType::F, 1);
        let dest1 = s.vgrf(RegType::F, 1);
        let src0 = s.vgrf(RegType::F, 1);
        let src1 = s.vgrf(RegType::F, 1);
        let src2 = s.vgrf(RegType::F, 1);
        s.add(dest0, src0, src1);
        s.predicate(Predicate::Normal)
            .sel(dest1, src2, FsReg::imm_f(0.0));
        s.cmp(null_f(), dest0, FsReg::imm_f(0.0), CondMod::GE);

        assert!(!s.opt_cmod_propagation());
        assert_eq!(opcodes(&s), [Opcode::Add, Opcode::Sel, Opcode::Cmp]);
        assert_eq!(s.instrs[1].predicate, Predicate::Normal);
        assert_eq!(s.instrs[2].cmod, CondMod::GE);
    }

    #[test]
    fn intervening_dest_write() {
        let mut s = Shader::new(8);
        let dest = s.vgrf(RegType::F, 4);
        let src0 = s.vgrf(RegType::F, 1);
        let src1 = s.vgrf(RegType::F, 1);
        let src2 = s.vgrf(RegType::F, 2);
        s.add(dest.offset(2), src0, src1);
        s.emit(Opcode::Tex, dest, &[src2]).rlen = 4;
        s.cmp(null_f(), dest.offset(2), FsReg::imm_f(0.0), CondMod::GE);

        assert!(!s.opt_cmod_propagation());
        assert_eq!(opcodes(&s), [Opcode::Add, Opcode::Tex, Opcode::Cmp]);
        assert_eq!(s.instrs[0].cmod, CondMod::None);
        assert_eq!(s.instrs[2].cmod, CondMod::GE);
    }

    #[test]
    fn intervening_flag_read_same_value() {
        let mut s = Shader::new(8);
        let dest0 = s.vgrf(RegType::F, 1);
        let dest1 = s.vgrf(RegType::F, 1);
        let src0 = s.vgrf(RegType::F, 1);
        let src1 = s.vgrf(RegType::F, 1);
        let src2 = s.vgrf(RegType::F, 1);
        s.add(dest0, src0, src1).cmod = CondMod::GE;
        s.predicate(Predicate::Normal)
            .sel(dest1, src2, FsReg::imm_f(0.0));
        s.cmp(null_f(), dest0, FsReg::imm_f(0.0), CondMod::GE);

        assert!(s.opt_cmod_propagation());
        assert_eq!(opcodes(&s), [Opcode::Add, Opcode::Sel]);
        assert_eq!(s.instrs[0].cmod, CondMod::GE);
        assert_eq!(s.instrs[1].predicate, Predicate::Normal);
    }

    #[test]
    fn negate() {
        let mut s = Shader::new(8);
        let dest = s.vgrf(RegType::F, 1);
        let src0 = s.vgrf(RegType::F, 1);
        let src1 = s.vgrf(RegType::F, 1);
        s.add(dest, src0, src1);
        s.cmp(null_f(), dest.fneg(), FsReg::imm_f(0.0), CondMod::GE);

        assert!(s.opt_cmod_propagation());
        assert_eq!(opcodes(&s), [Opcode::Add]);
        assert_eq!(s.instrs[0].cmod, CondMod::LE);
    }

    #[test]
    fn movnz() {
        let mut s = Shader::new(8);
        let dest = s.vgrf(RegType::F, 1);
        let src0 = s.vgrf(RegType::F, 1);
        let src1 = s.vgrf(RegType::F, 1);
        s.cmp(dest, src0, src1, CondMod::GE);
        s.mov(null_f(), dest).cmod = CondMod::NZ;

        assert!(s.opt_cmod_propagation());
        assert_eq!(opcodes(&s), [Opcode::Cmp]);
        assert_eq!(s.instrs[0].cmod, CondMod::GE);
    }

    #[test]
    fn different_types_cmod_with_zero() {
        let mut s = Shader::new(8);
        let dest = s.vgrf(RegType::D, 1);
        let src0 = s.vgrf(RegType::D, 1);
        let src1 = s.vgrf(RegType::D, 1);
        s.add(dest, src0, src1);
        s.cmp(
            null_f(),
            dest.retype(RegType::F),
            FsReg::imm_f(0.0),
            CondMod::GE,
        );

        assert!(!s.opt_cmod_propagation());
        assert_eq!(opcodes(&s), [Opcode::Add, Opcode::Cmp]);
        assert_eq!(s.instrs[1].cmod, CondMod::GE);
    }

    #[test]
    fn andnz_one() {
        let mut s = Shader::new(8);
        let dest = s.vgrf(RegType::D, 1);
        let src0 = s.vgrf(RegType::F, 1);
        s.cmp(dest.retype(RegType::F), src0, FsReg::imm_f(0.0), CondMod::L);
        s.and(FsReg::null(RegType::D), dest, FsReg::imm_d(1)).cmod =
            CondMod::NZ;

        assert!(s.opt_cmod_propagation());
        assert_eq!(opcodes(&s), [Opcode::Cmp]);
        assert_eq!(s.instrs[0].cmod, CondMod::L);
        assert_eq!(s.instrs[0].dst, dest.retype(RegType::F));
    }

    #[test]
    fn andnz_non_one() {
        let mut s = Shader::new(8);
        let dest = s.vgrf(RegType::D, 1);
        let src0 = s.vgrf(RegType::F, 1);
        s.cmp(dest.retype(RegType::F), src0, FsReg::imm_f(0.0), CondMod::L);
        s.and(FsReg::null(RegType::D), dest, FsReg::imm_d(38)).cmod =
            CondMod::NZ;

        assert!(!s.opt_cmod_propagation());
        assert_eq!(opcodes(&s), [Opcode::Cmp, Opcode::And]);
        assert_eq!(s.instrs[0].cmod, CondMod::L);
        assert_eq!(s.instrs[1].cmod, CondMod::NZ);
    }

    #[test]
    fn andz_one() {
        let mut s = Shader::new(8);
        let dest = s.vgrf(RegType::D, 1);
        let src0 = s.vgrf(RegType::F, 1);
        s.cmp(dest.retype(RegType::F), src0, FsReg::imm_f(0.0), CondMod::L);
        s.and(FsReg::null(RegType::D), dest, FsReg::imm_d(1)).cmod =
            CondMod::Z;

        assert!(!s.opt_cmod_propagation());
        assert_eq!(opcodes(&s), [Opcode::Cmp, Opcode::And]);
        assert_eq!(s.instrs[0].cmod, CondMod::L);
        assert_eq!(s.instrs[1].cmod, CondMod::Z);
    }
}
