/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

use crate::ir::*;

fn make_mov(instr: &mut Instr, src: FsReg) {
    instr.opcode = Opcode::Mov;
    instr.srcs.clear();
    instr.srcs.push(src);
}

fn make_binop(instr: &mut Instr, op: Opcode, x: FsReg, y: FsReg) {
    instr.opcode = op;
    instr.srcs.clear();
    instr.srcs.push(x);
    instr.srcs.push(y);
}

/// Folds a binary operation on two immediates of the same type
fn fold_imm(op: Opcode, x: &FsReg, y: &FsReg) -> Option<FsReg> {
    if !x.is_imm() || !y.is_imm() || x.ty != y.ty {
        return None;
    }
    match (op, x.ty) {
        (Opcode::Add, RegType::F) => Some(FsReg::imm_f(x.f32() + y.f32())),
        (Opcode::Mul, RegType::F) => Some(FsReg::imm_f(x.f32() * y.f32())),
        (Opcode::Add, RegType::D | RegType::UD) => {
            Some(FsReg::imm_ud(x.u32().wrapping_add(y.u32())).retype(x.ty))
        }
        (Opcode::Mul, RegType::D | RegType::UD) => {
            Some(FsReg::imm_ud(x.u32().wrapping_mul(y.u32())).retype(x.ty))
        }
        _ => None,
    }
}

fn opt_mov(instr: &mut Instr) -> bool {
    let src = instr.srcs[0];
    if !instr.saturate || !src.is_imm() || src.ty != RegType::F {
        return false;
    }
    if instr.dst.ty != RegType::F {
        return false;
    }
    instr.srcs[0] = FsReg::imm_f(src.f32().clamp(0.0, 1.0));
    instr.saturate = false;
    true
}

fn opt_mul(instr: &mut Instr) -> bool {
    let [x, y] = [instr.srcs[0], instr.srcs[1]];
    if !y.is_imm() {
        return false;
    }

    if y.is_one() {
        make_mov(instr, x);
    } else if y.is_negative_one() {
        make_mov(instr, x.fneg());
    } else if y.is_zero() {
        make_mov(instr, y);
    } else if let Some(val) = fold_imm(Opcode::Mul, &x, &y) {
        make_mov(instr, val);
    } else {
        return false;
    }
    true
}

fn opt_add(instr: &mut Instr) -> bool {
    let [x, y] = [instr.srcs[0], instr.srcs[1]];
    if !y.is_imm() {
        return false;
    }

    if y.is_zero() {
        make_mov(instr, x);
    } else if let Some(val) = fold_imm(Opcode::Add, &x, &y) {
        make_mov(instr, val);
    } else {
        return false;
    }
    true
}

fn opt_sel(instr: &mut Instr) -> bool {
    let [x, y] = [instr.srcs[0], instr.srcs[1]];
    if x == y {
        make_mov(instr, x);
        instr.predicate = Predicate::None;
        instr.predicate_inverse = false;
        instr.cmod = CondMod::None;
        return true;
    }

    /* A saturated min/max against a bound outside [0, 1] is a no-op */
    if instr.saturate && y.is_imm() && y.ty == RegType::F {
        let redundant = match instr.cmod {
            CondMod::L | CondMod::LE => y.f32() >= 1.0,
            CondMod::G | CondMod::GE => y.f32() <= 0.0,
            _ => false,
        };
        if redundant {
            make_mov(instr, x);
            instr.cmod = CondMod::None;
            return true;
        }
    }
    false
}

/// MAD computes `src0 + src1 * src2`
fn opt_mad(instr: &mut Instr) -> bool {
    let [a, b, c] = [instr.srcs[0], instr.srcs[1], instr.srcs[2]];

    if b.is_zero() || c.is_zero() {
        make_mov(instr, a);
    } else if a.is_zero() {
        make_binop(instr, Opcode::Mul, b, c);
    } else if b.is_one() {
        make_binop(instr, Opcode::Add, a, c);
    } else if c.is_one() {
        make_binop(instr, Opcode::Add, a, b);
    } else if let Some(val) = fold_imm(Opcode::Mul, &b, &c) {
        make_binop(instr, Opcode::Add, a, val);
    } else {
        return false;
    }
    true
}

fn opt_instr(instr: &mut Instr, prev: Option<&Instr>) -> bool {
    let progress = match instr.opcode {
        Opcode::Mov => opt_mov(instr),
        Opcode::Mul => opt_mul(instr),
        Opcode::Add => opt_add(instr),
        Opcode::Or => {
            if instr.srcs[0] == instr.srcs[1] {
                let x = instr.srcs[0];
                make_mov(instr, x);
                true
            } else {
                false
            }
        }
        Opcode::Lrp => {
            if instr.srcs[1] == instr.srcs[2] {
                let x = instr.srcs[1];
                make_mov(instr, x);
                true
            } else {
                false
            }
        }
        Opcode::Cmp => {
            let x = instr.srcs[0];
            if instr.cmod == CondMod::GE
                && x.abs
                && x.negate
                && instr.srcs[1].is_zero()
            {
                let x = &mut instr.srcs[0];
                x.abs = false;
                x.negate = false;
                instr.cmod = CondMod::Z;
                true
            } else {
                false
            }
        }
        Opcode::Sel => opt_sel(instr),
        Opcode::Mad => opt_mad(instr),
        Opcode::Rcp => match prev {
            Some(sqrt)
                if sqrt.opcode == Opcode::Sqrt
                    && sqrt.predicate.is_none()
                    && sqrt.exec_size == instr.exec_size
                    && instr.srcs[0] == sqrt.dst
                    && !sqrt.dst.regions_overlap(
                        sqrt.regs_written(),
                        &sqrt.srcs[0],
                        1,
                    ) =>
            {
                instr.opcode = Opcode::Rsq;
                instr.srcs[0] = sqrt.srcs[0];
                true
            }
            _ => false,
        },
        _ => false,
    };

    /* Keep immediates in src1 where the encoding allows them */
    if instr.opcode.is_commutative()
        && instr.srcs.len() == 2
        && instr.srcs[0].is_imm()
        && !instr.srcs[1].is_imm()
    {
        instr.srcs.swap(0, 1);
        return true;
    }

    progress
}

impl Shader {
    pub fn opt_algebraic(&mut self) -> bool {
        let mut progress = false;
        for ip in 0..self.instrs.len() {
            let (before, rest) = self.instrs.split_at_mut(ip);
            let prev = before.last().map(|i| i.as_ref());
            progress |= opt_instr(&mut rest[0], prev);
        }
        progress
    }
}
