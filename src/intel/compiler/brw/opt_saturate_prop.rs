/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

use crate::ir::*;

fn can_do_saturate(op: Opcode) -> bool {
    match op {
        Opcode::Add
        | Opcode::Asr
        | Opcode::Frc
        | Opcode::Line
        | Opcode::Lrp
        | Opcode::Mac
        | Opcode::Mad
        | Opcode::Mov
        | Opcode::Mul
        | Opcode::Pln
        | Opcode::Rndd
        | Opcode::Rnde
        | Opcode::Rndu
        | Opcode::Rndz
        | Opcode::Sel
        | Opcode::Shl
        | Opcode::Shr
        | Opcode::Linterp => true,
        op => op.is_math(),
    }
}

fn is_saturating_copy(instr: &Instr) -> bool {
    instr.opcode == Opcode::Mov
        && instr.saturate
        && instr.dst.is_vgrf()
        && instr.srcs[0].is_vgrf()
        && !instr.srcs[0].abs
        && !instr.srcs[0].negate
}

/// A `MOV.sat` together with what liveness says about its source
struct Candidate {
    ip: usize,
    block_start: usize,
    src_end: usize,
}

/// Moves the saturate of `mov` onto the instruction which computed its
/// source
fn propagate(s: &mut Shader, c: &Candidate) -> bool {
    let mov = &s.instrs[c.ip];
    let src = mov.srcs[0];
    let dst = mov.dst;
    /* The source must die here unless the copy is in place */
    let src_dies = c.src_end <= c.ip || dst == src;

    for scan_ip in (c.block_start..c.ip).rev() {
        let scan = &s.instrs[scan_ip];
        if scan.overwrites_reg(&src) {
            if scan.is_partial_write() || scan.dst.reg_offset != src.reg_offset
            {
                return false;
            }

            if scan.saturate {
                s.instrs[c.ip].saturate = false;
                return true;
            }

            if src_dies
                && can_do_saturate(scan.opcode)
                && scan.dst.ty == dst.ty
            {
                s.instrs[scan_ip].saturate = true;
                s.instrs[c.ip].saturate = false;
                return true;
            }
            return false;
        }

        /* Another reader would observe the saturated value */
        if scan.srcs.iter().any(|r| {
            r.file == RegFile::Vgrf
                && r.nr == src.nr
                && r.reg_offset == src.reg_offset
        }) {
            return false;
        }
    }
    false
}

impl Shader {
    pub fn opt_saturate_propagation(&mut self) -> bool {
        let candidates: Vec<Candidate> = {
            let a = self.analyze();
            let mut candidates = Vec::new();
            for block in a.cfg.iter() {
                for ip in block.ips.clone() {
                    let instr = &self.instrs[ip];
                    if is_saturating_copy(instr) {
                        let var = a.live.var_from_reg(&instr.srcs[0]);
                        candidates.push(Candidate {
                            ip: ip,
                            block_start: block.start_ip(),
                            src_end: a.live.end(var),
                        });
                    }
                }
            }
            candidates
        };

        let mut progress = false;
        for c in candidates.iter().rev() {
            progress |= propagate(self, c);
        }
        progress
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Shader, [FsReg; 5]) {
        let mut s = Shader::new(8);
        let regs = [
            s.vgrf(RegType::F, 1),
            s.vgrf(RegType::F, 1),
            s.vgrf(RegType::F, 1),
            s.vgrf(RegType::F, 1),
            s.vgrf(RegType::F, 1),
        ];
        (s, regs)
    }

    #[test]
    fn basic() {
        let (mut s, [a, b, d0, d1, _]) = setup();
        s.add(d0, a, b);
        s.mov(d1, d0).saturate = true;

        assert!(s.opt_saturate_propagation());
        assert!(s.instrs[0].saturate);
        assert!(!s.instrs[1].saturate);
    }

    #[test]
    fn other_non_saturated_use() {
        let (mut s, [a, b, d0, d1, d2]) = setup();
        s.add(d0, a, b);
        s.mov(d1, d0).saturate = true;
        s.add(d2, d0, a);

        assert!(!s.opt_saturate_propagation());
        assert!(!s.instrs[0].saturate);
        assert!(s.instrs[1].saturate);
    }

    #[test]
    fn producer_saturates() {
        let (mut s, [a, b, d0, d1, _]) = setup();
        s.add(d0, a, b).saturate = true;
        s.mov(d1, d0).saturate = true;
        s.add(a, d0, b);

        assert!(s.opt_saturate_propagation());
        assert!(s.instrs[0].saturate);
        assert!(!s.instrs[1].saturate);
    }

    #[test]
    fn negated_copy() {
        let (mut s, [a, b, d0, d1, _]) = setup();
        s.add(d0, a, b);
        s.mov(d1, d0.fneg()).saturate = true;

        assert!(!s.opt_saturate_propagation());
        assert!(s.instrs[1].saturate);
    }

    #[test]
    fn intervening_read() {
        let (mut s, [a, b, d0, d1, d2]) = setup();
        s.add(d0, a, b);
        s.add(d2, d0, a);
        s.mov(d1, d0).saturate = true;

        assert!(!s.opt_saturate_propagation());
        assert!(!s.instrs[0].saturate);
    }
}
