/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

use crate::bitset::BitSet;
use crate::ir::*;
use crate::liveness::Analyzed;

fn is_nop_mov(instr: &Instr, alloc: &VirtualGrfs) -> bool {
    match instr.opcode {
        Opcode::Mov => instr.dst == instr.srcs[0],
        Opcode::LoadPayload => {
            instr.is_copy_payload(alloc)
                && instr.dst.nr == instr.srcs[0].nr
                && instr.dst.reg_offset == 0
        }
        _ => false,
    }
}

fn is_coalesce_candidate(instr: &Instr, alloc: &VirtualGrfs) -> bool {
    if !matches!(instr.opcode, Opcode::Mov | Opcode::LoadPayload)
        || instr.is_partial_write()
        || instr.saturate
        || !instr.cmod.is_none()
    {
        return false;
    }

    let src = &instr.srcs[0];
    if !src.is_vgrf()
        || src.negate
        || src.abs
        || !src.is_contiguous()
        || src.subreg_offset != 0
        || !instr.dst.is_vgrf()
        || instr.dst.subreg_offset != 0
        || instr.dst.ty != src.ty
    {
        return false;
    }

    if alloc.size(src.nr) > alloc.size(instr.dst.nr) {
        return false;
    }

    instr.opcode != Opcode::LoadPayload || instr.is_copy_payload(alloc)
}

/// Returns true if the register `var_to` can take over the value of
/// `var_from` which `copy` moves into it
fn can_coalesce_vars(
    a: &Analyzed,
    copy: &Instr,
    var_to: usize,
    var_from: usize,
) -> bool {
    let live = &a.live;
    if !live.vars_interfere(var_from, var_to) {
        return true;
    }

    let (start_to, end_to) = (live.start(var_to), live.end(var_to));
    let (start_from, end_from) = (live.start(var_from), live.end(var_from));

    /* The ranges overlap and neither contains the other */
    if (end_to > end_from && start_from < start_to)
        || (end_from > end_to && start_to < start_from)
    {
        return false;
    }

    let start_ip = std::cmp::min(start_to, start_from);
    for (ip, scan) in a.shader.instrs.iter().enumerate().skip(start_ip) {
        if scan.is_control_flow() {
            return false;
        }
        if ip <= start_to {
            continue;
        }
        if ip > end_to {
            return true;
        }
        if scan.dst == copy.dst || scan.dst == copy.srcs[0] {
            return false;
        }
    }
    true
}

/// The copies of one source VGRF into one destination VGRF seen so far
struct Pending {
    reg_from: u32,
    reg_to: u32,
    /// Destination register for every register of the source
    reg_to_offset: Vec<u32>,
    /// Which copy covers every register of the source
    covered: Vec<Option<usize>>,
    remaining: u32,
    last: usize,
}

impl Pending {
    fn new(reg_from: u32, reg_to: u32, size: u32) -> Self {
        Self {
            reg_from: reg_from,
            reg_to: reg_to,
            reg_to_offset: vec![0; size as usize],
            covered: vec![None; size as usize],
            remaining: size,
            last: 0,
        }
    }

    /// Records the copy at `ip`, returning false if it can't be part of a
    /// whole-register coalesce
    fn add_copy(&mut self, ip: usize, instr: &Instr) -> bool {
        let written = instr.regs_written();
        let first = if instr.opcode == Opcode::LoadPayload {
            0
        } else {
            instr.srcs[0].reg_offset
        };

        for k in 0..written {
            let r = (first + k) as usize;
            if r >= self.covered.len() || self.covered[r].is_some() {
                return false;
            }
            self.covered[r] = Some(ip);
            self.reg_to_offset[r] = if instr.opcode == Opcode::LoadPayload {
                k
            } else {
                instr.dst.reg_offset + k
            };
        }

        self.remaining -= written;
        self.last = ip;
        true
    }

    fn is_in_order(&self) -> bool {
        let base = self.reg_to_offset[0];
        self.reg_to_offset
            .iter()
            .enumerate()
            .all(|(i, off)| *off == base + i as u32)
    }
}

/// A source VGRF to be renamed onto the destination of its copies
struct Coalesce {
    reg_from: u32,
    reg_to: u32,
    reg_to_offset: Vec<u32>,
    copies: Vec<usize>,
}

#[derive(Default)]
struct CoalescePlan {
    nops: Vec<usize>,
    coalesces: Vec<Coalesce>,
}

/// Plans coalesces against one liveness snapshot
///
/// Each VGRF takes part in at most one coalesce per plan since renaming
/// changes its live range.
fn plan_coalesces(a: &Analyzed) -> CoalescePlan {
    let s = a.shader;
    let mut plan = CoalescePlan::default();
    let mut touched = BitSet::new();
    let mut pending: Option<Pending> = None;

    for (ip, instr) in s.instrs.iter().enumerate() {
        if !is_coalesce_candidate(instr, &s.alloc) {
            continue;
        }

        if is_nop_mov(instr, &s.alloc) {
            plan.nops.push(ip);
            continue;
        }

        let src = instr.srcs[0];
        let mut p = match pending.take() {
            Some(p) if p.reg_from == src.nr => p,
            _ => Pending::new(src.nr, instr.dst.nr, s.alloc.size(src.nr)),
        };

        if p.reg_to != instr.dst.nr {
            pending = Some(p);
            continue;
        }

        /* A register copied twice can't be renamed */
        if !p.add_copy(ip, instr) {
            continue;
        }

        if p.remaining > 0 {
            pending = Some(p);
            continue;
        }

        if touched.get(p.reg_from as usize)
            || touched.get(p.reg_to as usize)
            || !p.is_in_order()
        {
            continue;
        }

        let last = &s.instrs[p.last];
        let vars_ok = (0..p.reg_to_offset.len()).all(|i| {
            let to = FsReg::vgrf(p.reg_to, RegType::F)
                .offset(p.reg_to_offset[i]);
            let from = FsReg::vgrf(p.reg_from, RegType::F).offset(i as u32);
            can_coalesce_vars(
                a,
                last,
                a.live.var_from_reg(&to),
                a.live.var_from_reg(&from),
            )
        });
        if !vars_ok {
            continue;
        }

        touched.insert(p.reg_from as usize);
        touched.insert(p.reg_to as usize);

        let mut copies: Vec<usize> = p.covered.iter().flatten().copied().collect();
        copies.dedup();
        plan.coalesces.push(Coalesce {
            reg_from: p.reg_from,
            reg_to: p.reg_to,
            reg_to_offset: p.reg_to_offset,
            copies: copies,
        });
    }

    plan
}

impl Shader {
    /// Removes copies between VGRFs by renaming the source onto the
    /// destination where their live ranges allow
    pub fn register_coalesce(&mut self) -> bool {
        let mut progress = false;
        loop {
            let plan = {
                let a = self.analyze();
                plan_coalesces(&a)
            };
            if plan.nops.is_empty() && plan.coalesces.is_empty() {
                break;
            }
            progress = true;

            let mut dead = plan.nops;
            for c in &plan.coalesces {
                dead.extend_from_slice(&c.copies);
                self.for_each_reg_mut(|reg| {
                    if reg.file == RegFile::Vgrf && reg.nr == c.reg_from {
                        reg.nr = c.reg_to;
                        reg.reg_offset = c.reg_to_offset[reg.reg_offset as usize];
                    }
                });
            }
            dead.sort_unstable();
            dead.dedup();
            self.remove_instrs(&dead);
        }
        progress
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic() {
        let mut s = Shader::new(8);
        let [a, b, t, d] = [
            s.vgrf(RegType::F, 1),
            s.vgrf(RegType::F, 1),
            s.vgrf(RegType::F, 1),
            s.vgrf(RegType::F, 1),
        ];
        s.add(t, a, b);
        s.mov(d, t);
        s.mov(FsReg::mrf(1, RegType::F), d);

        assert!(s.register_coalesce());
        assert_eq!(s.instrs.len(), 2);
        assert_eq!(s.instrs[0].opcode, Opcode::Add);
        assert_eq!(s.instrs[0].dst, d);
        assert_eq!(s.instrs[1].srcs[0], d);
        assert!(!s.register_coalesce());
    }

    #[test]
    fn interfering_ranges() {
        let mut s = Shader::new(8);
        let [a, b, t, d, e] = [
            s.vgrf(RegType::F, 1),
            s.vgrf(RegType::F, 1),
            s.vgrf(RegType::F, 1),
            s.vgrf(RegType::F, 1),
            s.vgrf(RegType::F, 1),
        ];
        s.add(t, a, b);
        s.mov(d, t);
        s.add(e, t, a);
        s.mov(FsReg::mrf(1, RegType::F), d);
        s.mov(FsReg::mrf(2, RegType::F), e);

        assert!(!s.register_coalesce());
        assert_eq!(s.instrs.len(), 5);
    }

    #[test]
    fn multi_register_copy() {
        let mut s = Shader::new(8);
        let a = s.vgrf(RegType::F, 1);
        let t = s.vgrf(RegType::F, 2);
        let d = s.vgrf(RegType::F, 2);
        s.add(t, a, a);
        s.mul(t.offset(1), a, a);
        s.mov(d, t);
        s.mov(d.offset(1), t.offset(1));
        s.mov(FsReg::mrf(1, RegType::F), d);
        s.mov(FsReg::mrf(2, RegType::F), d.offset(1));

        assert!(s.register_coalesce());
        assert_eq!(s.instrs.len(), 4);
        assert_eq!(s.instrs[0].dst, d);
        assert_eq!(s.instrs[1].dst, d.offset(1));
    }

    #[test]
    fn out_of_order_copy() {
        let mut s = Shader::new(8);
        let a = s.vgrf(RegType::F, 1);
        let t = s.vgrf(RegType::F, 2);
        let d = s.vgrf(RegType::F, 2);
        s.add(t, a, a);
        s.mul(t.offset(1), a, a);
        s.mov(d, t.offset(1));
        s.mov(d.offset(1), t);
        s.mov(FsReg::mrf(1, RegType::F), d);
        s.mov(FsReg::mrf(2, RegType::F), d.offset(1));

        assert!(!s.register_coalesce());
    }

    #[test]
    fn self_copy_removed() {
        let mut s = Shader::new(8);
        let a = s.vgrf(RegType::F, 1);
        s.mov(a, FsReg::imm_f(1.0));
        s.mov(a, a);
        s.mov(FsReg::mrf(1, RegType::F), a);

        assert!(s.register_coalesce());
        assert_eq!(s.instrs.len(), 2);
    }

    #[test]
    fn copy_across_control_flow() {
        let mut s = Shader::new(8);
        let [a, t, d] = [
            s.vgrf(RegType::F, 1),
            s.vgrf(RegType::F, 1),
            s.vgrf(RegType::F, 1),
        ];
        s.mov(d, FsReg::imm_f(0.0));
        s.add(t, a, a);
        s.cmp(FsReg::null(RegType::F), a, FsReg::imm_f(0.0), CondMod::G);
        s.emit(Opcode::If, FsReg::null(RegType::D), &[])
            .predicate = Predicate::Normal;
        s.mov(d, t);
        s.emit(Opcode::Endif, FsReg::null(RegType::D), &[]);
        s.mov(FsReg::mrf(1, RegType::F), d);

        assert!(!s.register_coalesce());
    }
}
