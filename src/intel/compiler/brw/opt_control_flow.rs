/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

use crate::ir::*;

use rustc_hash::FxHashMap;

/// Most MOV pairs turned into SELs per IF
const MAX_MOVS: usize = 8;

/// Returns the ELSE or ENDIF closing the IF at `if_ip`
fn find_else_endif(instrs: &[Box<Instr>], if_ip: usize) -> Option<usize> {
    let mut depth = 0_u32;
    for (ip, instr) in instrs.iter().enumerate().skip(if_ip + 1) {
        match instr.opcode {
            Opcode::If => depth += 1,
            Opcode::Else if depth == 0 => return Some(ip),
            Opcode::Endif if depth == 0 => return Some(ip),
            Opcode::Endif => depth -= 1,
            _ => (),
        }
    }
    None
}

/// Leading MOVs of the block starting at `start`
fn leading_movs(instrs: &[Box<Instr>], start: usize) -> Vec<usize> {
    instrs
        .iter()
        .enumerate()
        .skip(start)
        .take(MAX_MOVS)
        .take_while(|(_, i)| i.opcode == Opcode::Mov)
        .map(|(ip, _)| ip)
        .collect()
}

fn movs_pair_up(then_mov: &Instr, else_mov: &Instr) -> bool {
    then_mov.dst == else_mov.dst
        && then_mov.exec_size == else_mov.exec_size
        && then_mov.group == else_mov.group
        && then_mov.saturate == else_mov.saturate
        && !then_mov.is_partial_write()
        && !else_mov.is_partial_write()
        && then_mov.cmod.is_none()
        && else_mov.cmod.is_none()
        && then_mov.srcs[0].ty == else_mov.srcs[0].ty
}

impl Shader {
    /// Turns MOVs to the same destination on both sides of an IF/ELSE
    /// into predicated SELs ahead of the IF
    pub fn opt_peephole_sel(&mut self) -> bool {
        let mut sels: FxHashMap<usize, Vec<Box<Instr>>> = FxHashMap::default();
        let mut dead = Vec::new();

        let instrs = &self.instrs;
        let alloc = &mut self.alloc;
        for (if_ip, if_instr) in instrs.iter().enumerate() {
            if if_instr.opcode != Opcode::If || if_instr.predicate.is_none() {
                continue;
            }
            let Some(else_ip) = find_else_endif(instrs, if_ip) else {
                continue;
            };
            if instrs[else_ip].opcode != Opcode::Else {
                continue;
            }

            let then_movs = leading_movs(instrs, if_ip + 1);
            let else_movs = leading_movs(instrs, else_ip + 1);

            let mut emitted = Vec::new();
            for (t, e) in then_movs.iter().zip(else_movs.iter()) {
                let (then_mov, else_mov) = (&instrs[*t], &instrs[*e]);
                if !movs_pair_up(then_mov, else_mov) {
                    break;
                }

                let mut b = FsBuilder::for_instr(alloc, then_mov);
                if then_mov.srcs[0] == else_mov.srcs[0] {
                    b.mov(then_mov.dst, then_mov.srcs[0]).saturate =
                        then_mov.saturate;
                } else {
                    /* Only src1 can hold an immediate */
                    let mut src0 = then_mov.srcs[0];
                    if src0.is_imm() {
                        src0 = b.copy(src0);
                    }
                    let sel = b.sel(then_mov.dst, src0, else_mov.srcs[0]);
                    sel.predicate = if_instr.predicate;
                    sel.predicate_inverse = if_instr.predicate_inverse;
                    sel.flag_subreg = if_instr.flag_subreg;
                    sel.saturate = then_mov.saturate;
                }
                emitted.extend(b.as_vec());
                dead.push(*t);
                dead.push(*e);
            }

            if !emitted.is_empty() {
                sels.insert(if_ip, emitted);
            }
        }

        if sels.is_empty() {
            return false;
        }

        dead.sort_unstable();
        let mut dead = dead.into_iter().peekable();
        let mut instrs = Vec::with_capacity(self.instrs.len());
        for (ip, instr) in self.instrs.drain(..).enumerate() {
            if dead.peek() == Some(&ip) {
                dead.next();
                continue;
            }
            if let Some(sel) = sels.remove(&ip) {
                instrs.extend(sel);
            }
            instrs.push(instr);
        }
        self.instrs = instrs;
        true
    }

    /// Removes IF/ENDIF pairs with nothing between them and ELSEs with an
    /// empty else block
    pub fn dead_control_flow_eliminate(&mut self) -> bool {
        let mut dead = Vec::new();
        for ip in 1..self.instrs.len() {
            if self.instrs[ip].opcode != Opcode::Endif {
                continue;
            }

            let mut prev = ip - 1;
            if self.instrs[prev].opcode == Opcode::Else {
                dead.push(prev);
                if prev == 0 {
                    continue;
                }
                prev -= 1;
            }

            if self.instrs[prev].opcode == Opcode::If {
                dead.push(prev);
                dead.push(ip);
            }
        }

        dead.sort_unstable();
        self.remove_instrs(&dead);
        !dead.is_empty()
    }

    /// Folds `IF; BREAK; ENDIF` into a predicated BREAK, and likewise for
    /// CONTINUE
    pub fn opt_peephole_predicated_break(&mut self) -> bool {
        let mut dead = Vec::new();
        for ip in 1..self.instrs.len().saturating_sub(1) {
            let jump = &self.instrs[ip];
            if !matches!(jump.opcode, Opcode::Break | Opcode::Continue)
                || !jump.predicate.is_none()
            {
                continue;
            }

            let if_instr = &self.instrs[ip - 1];
            if if_instr.opcode != Opcode::If
                || if_instr.predicate.is_none()
                || self.instrs[ip + 1].opcode != Opcode::Endif
            {
                continue;
            }

            let (pred, inv, flag) = (
                if_instr.predicate,
                if_instr.predicate_inverse,
                if_instr.flag_subreg,
            );
            let jump = &mut self.instrs[ip];
            jump.predicate = pred;
            jump.predicate_inverse = inv;
            jump.flag_subreg = flag;
            dead.push(ip - 1);
            dead.push(ip + 1);
        }

        self.remove_instrs(&dead);
        !dead.is_empty()
    }

    /// Removes discard jumps directly ahead of the final HALT, which would
    /// only jump to the next instruction
    pub fn opt_redundant_discard_jumps(&mut self) -> bool {
        let halt = self
            .instrs
            .iter()
            .rposition(|i| {
                i.opcode == Opcode::PlaceholderHalt || i.is_control_flow()
            })
            .filter(|ip| self.instrs[*ip].opcode == Opcode::PlaceholderHalt);
        let Some(halt) = halt else {
            return false;
        };

        let mut start = halt;
        while start > 0 && self.instrs[start - 1].opcode == Opcode::DiscardJump
        {
            start -= 1;
        }
        if start == halt {
            return false;
        }

        self.instrs.drain(start..halt);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cf(s: &mut Shader, op: Opcode) -> &mut Instr {
        s.emit(op, FsReg::null(RegType::D), &[])
    }

    fn emit_if(s: &mut Shader, x: FsReg) {
        s.cmp(FsReg::null(RegType::F), x, FsReg::imm_f(0.0), CondMod::G);
        cf(s, Opcode::If).predicate = Predicate::Normal;
    }

    fn opcodes(s: &Shader) -> Vec<Opcode> {
        s.instrs.iter().map(|i| i.opcode).collect()
    }

    #[test]
    fn empty_if_removed() {
        let mut s = Shader::new(8);
        let x = s.vgrf(RegType::F, 1);
        emit_if(&mut s, x);
        cf(&mut s, Opcode::Endif);

        assert!(s.dead_control_flow_eliminate());
        assert_eq!(opcodes(&s), vec![Opcode::Cmp]);
    }

    #[test]
    fn empty_else_removed() {
        let mut s = Shader::new(8);
        let x = s.vgrf(RegType::F, 1);
        emit_if(&mut s, x);
        s.mov(x, FsReg::imm_f(1.0));
        cf(&mut s, Opcode::Else);
        cf(&mut s, Opcode::Endif);

        assert!(s.dead_control_flow_eliminate());
        assert_eq!(
            opcodes(&s),
            vec![Opcode::Cmp, Opcode::If, Opcode::Mov, Opcode::Endif]
        );
        assert!(!s.dead_control_flow_eliminate());
    }

    #[test]
    fn predicated_break() {
        let mut s = Shader::new(8);
        let x = s.vgrf(RegType::F, 1);
        cf(&mut s, Opcode::Do);
        s.add(x, x, FsReg::imm_f(1.0));
        s.cmp(FsReg::null(RegType::F), x, FsReg::imm_f(4.0), CondMod::G);
        let i = cf(&mut s, Opcode::If);
        i.predicate = Predicate::Normal;
        i.predicate_inverse = true;
        cf(&mut s, Opcode::Break);
        cf(&mut s, Opcode::Endif);
        cf(&mut s, Opcode::While);

        assert!(s.opt_peephole_predicated_break());
        assert_eq!(
            opcodes(&s),
            vec![
                Opcode::Do,
                Opcode::Add,
                Opcode::Cmp,
                Opcode::Break,
                Opcode::While
            ]
        );
        assert_eq!(s.instrs[3].predicate, Predicate::Normal);
        assert!(s.instrs[3].predicate_inverse);
    }

    #[test]
    fn movs_become_sel() {
        let mut s = Shader::new(8);
        let [x, a, d] = [
            s.vgrf(RegType::F, 1),
            s.vgrf(RegType::F, 1),
            s.vgrf(RegType::F, 1),
        ];
        emit_if(&mut s, x);
        s.mov(d, a);
        cf(&mut s, Opcode::Else);
        s.mov(d, FsReg::imm_f(2.0));
        cf(&mut s, Opcode::Endif);

        assert!(s.opt_peephole_sel());
        assert_eq!(
            opcodes(&s),
            vec![
                Opcode::Cmp,
                Opcode::Sel,
                Opcode::If,
                Opcode::Else,
                Opcode::Endif
            ]
        );
        let sel = &s.instrs[1];
        assert_eq!(sel.dst, d);
        assert_eq!(&sel.srcs[..], &[a, FsReg::imm_f(2.0)]);
        assert_eq!(sel.predicate, Predicate::Normal);

        assert!(s.dead_control_flow_eliminate());
        assert_eq!(opcodes(&s), vec![Opcode::Cmp, Opcode::Sel]);
    }

    #[test]
    fn immediate_then_value_is_copied() {
        let mut s = Shader::new(8);
        let [x, a, d] = [
            s.vgrf(RegType::F, 1),
            s.vgrf(RegType::F, 1),
            s.vgrf(RegType::F, 1),
        ];
        emit_if(&mut s, x);
        s.mov(d, FsReg::imm_f(1.0));
        cf(&mut s, Opcode::Else);
        s.mov(d, a);
        cf(&mut s, Opcode::Endif);

        assert!(s.opt_peephole_sel());
        assert_eq!(s.instrs[1].opcode, Opcode::Mov);
        let tmp = s.instrs[1].dst;
        assert_eq!(s.instrs[2].opcode, Opcode::Sel);
        assert_eq!(&s.instrs[2].srcs[..], &[tmp, a]);
    }

    #[test]
    fn mismatched_destinations_stay() {
        let mut s = Shader::new(8);
        let [x, a, d] = [
            s.vgrf(RegType::F, 1),
            s.vgrf(RegType::F, 1),
            s.vgrf(RegType::F, 1),
        ];
        emit_if(&mut s, x);
        s.mov(d, a);
        cf(&mut s, Opcode::Else);
        s.mov(a, d);
        cf(&mut s, Opcode::Endif);

        assert!(!s.opt_peephole_sel());
        assert_eq!(s.instrs.len(), 6);
    }

    #[test]
    fn redundant_discard_jumps() {
        let mut s = Shader::new(8);
        let x = s.vgrf(RegType::F, 1);
        cf(&mut s, Opcode::DiscardJump);
        s.mov(x, FsReg::imm_f(0.0));
        cf(&mut s, Opcode::DiscardJump);
        cf(&mut s, Opcode::DiscardJump);
        cf(&mut s, Opcode::PlaceholderHalt);
        s.mov(FsReg::mrf(1, RegType::F), x);

        assert!(s.opt_redundant_discard_jumps());
        assert_eq!(
            opcodes(&s),
            vec![
                Opcode::DiscardJump,
                Opcode::Mov,
                Opcode::PlaceholderHalt,
                Opcode::Mov
            ]
        );
        assert!(!s.opt_redundant_discard_jumps());
    }
}
