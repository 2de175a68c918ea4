/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

use crate::bitset::BitSet;
use crate::ir::*;
use crate::liveness::{Analyzed, LiveVariables};

#[derive(Clone, Copy, Eq, PartialEq)]
enum DeadCode {
    Keep,
    NullDst,
    Remove,
}

/// Backwards walk over each block tracking which VGRF registers and flag
/// subregisters are still read.
///
/// Flags are not tracked across blocks, so both subregisters are
/// considered live at every block exit.
struct DeadCodePass<'a> {
    live_vars: &'a LiveVariables,
    live: BitSet,
    flag_live: [bool; 2],
}

impl<'a> DeadCodePass<'a> {
    fn new(live_vars: &'a LiveVariables) -> Self {
        Self {
            live_vars: live_vars,
            live: BitSet::new(),
            flag_live: [true; 2],
        }
    }

    fn is_result_live(&self, instr: &Instr) -> bool {
        let var = self.live_vars.var_from_reg(&instr.dst);
        (0..instr.regs_written() as usize).any(|i| self.live.get(var + i))
    }

    fn visit_instr(&mut self, instr: &Instr) -> DeadCode {
        let mut action = DeadCode::Keep;

        if instr.dst.file == RegFile::Vgrf
            && !instr.has_side_effects()
            && !self.is_result_live(instr)
        {
            if instr.writes_flag() || instr.writes_accumulator_implicitly() {
                /* Keep the instruction for its other results */
                action = DeadCode::NullDst;
            } else {
                action = DeadCode::Remove;
            }
        }

        let null_dst = instr.dst.is_null() || action == DeadCode::NullDst;
        if null_dst
            && instr.writes_flag()
            && !instr.opcode.is_control_flow()
            && !self.flag_live[usize::from(instr.flag_subreg)]
        {
            action = DeadCode::Remove;
        }

        if instr.dst.file == RegFile::Vgrf && !instr.is_partial_write() {
            let var = self.live_vars.var_from_reg(&instr.dst);
            for i in 0..instr.regs_written() as usize {
                self.live.remove(var + i);
            }
        }

        if instr.writes_flag() && instr.predicate.is_none() {
            self.flag_live[usize::from(instr.flag_subreg)] = false;
        }

        if action == DeadCode::Remove {
            return action;
        }

        for (i, src) in instr.srcs.iter().enumerate() {
            if src.file == RegFile::Vgrf {
                let var = self.live_vars.var_from_reg(src);
                for j in 0..instr.regs_read(i) as usize {
                    self.live.insert(var + j);
                }
            }
        }

        if instr.reads_flag() {
            self.flag_live[usize::from(instr.flag_subreg)] = true;
        }

        action
    }

    fn run(&mut self, a: &Analyzed) -> Vec<(usize, DeadCode)> {
        let mut edits = Vec::new();

        for b in (0..a.cfg.len()).rev() {
            self.live.clear();
            for var in 0..self.live_vars.num_vars() {
                if self.live_vars.is_live_out(b, var) {
                    self.live.insert(var);
                }
            }
            self.flag_live = [true; 2];

            for ip in a.cfg[b].ips.clone().rev() {
                match self.visit_instr(&a.shader.instrs[ip]) {
                    DeadCode::Keep => (),
                    action => edits.push((ip, action)),
                }
            }
        }

        edits.sort_by_key(|(ip, _)| *ip);
        edits
    }
}

impl Shader {
    pub fn opt_dead_code_eliminate(&mut self) -> bool {
        let edits = {
            let a = self.analyze();
            DeadCodePass::new(&a.live).run(&a)
        };

        let mut dead = Vec::new();
        for (ip, action) in &edits {
            match action {
                DeadCode::NullDst => {
                    let instr = &mut self.instrs[*ip];
                    instr.dst = FsReg::null(instr.dst.ty);
                }
                DeadCode::Remove => dead.push(*ip),
                DeadCode::Keep => (),
            }
        }
        self.remove_instrs(&dead);

        !edits.is_empty()
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
    fn removes_unused_results() {
        let mut s = Shader::new(8);
        let a = s.vgrf(RegType::F, 1);
        let b = s.vgrf(RegType::F, 1);
        push(&mut s, Opcode::Mov, a, &[FsReg::imm_f(1.0)]);
        push(&mut s, Opcode::Add, b, &[a, a]);
        push(&mut s, Opcode::Mov, FsReg::mrf(1, RegType::F), &[a]);

        assert!(s.opt_dead_code_eliminate());
        assert_eq!(s.instrs.len(), 2);
        assert_eq!(s.instrs[1].dst.file, RegFile::Mrf);
        assert!(!s.opt_dead_code_eliminate());
    }

    #[test]
    fn keeps_flag_write_of_dead_result() {
        let mut s = Shader::new(8);
        let a = s.vgrf(RegType::F, 1);
        let b = s.vgrf(RegType::F, 1);
        push(&mut s, Opcode::Mov, a, &[FsReg::imm_f(1.0)]);
        let cmp = push(&mut s, Opcode::Cmp, b, &[a, FsReg::imm_f(0.0)]);
        s.instrs[cmp].cmod = CondMod::G;
        let sel = push(&mut s, Opcode::Sel, FsReg::mrf(1, RegType::F), &[a, a]);
        s.instrs[sel].predicate = Predicate::Normal;

        assert!(s.opt_dead_code_eliminate());
        assert_eq!(s.instrs.len(), 3);
        assert!(s.instrs[1].dst.is_null());
    }

    #[test]
    fn removes_overwritten_flag_write() {
        let mut s = Shader::new(8);
        let a = s.vgrf(RegType::F, 1);
        push(&mut s, Opcode::Mov, a, &[FsReg::imm_f(1.0)]);
        let c0 = push(
            &mut s,
            Opcode::Cmp,
            FsReg::null(RegType::F),
            &[a, FsReg::imm_f(0.0)],
        );
        s.instrs[c0].cmod = CondMod::G;
        let c1 = push(
            &mut s,
            Opcode::Cmp,
            FsReg::null(RegType::F),
            &[a, FsReg::imm_f(2.0)],
        );
        s.instrs[c1].cmod = CondMod::L;
        let sel = push(&mut s, Opcode::Sel, FsReg::mrf(1, RegType::F), &[a, a]);
        s.instrs[sel].predicate = Predicate::Normal;

        assert!(s.opt_dead_code_eliminate());
        assert_eq!(s.instrs.len(), 3);
        assert_eq!(s.instrs[1].cmod, CondMod::L);
    }
}
