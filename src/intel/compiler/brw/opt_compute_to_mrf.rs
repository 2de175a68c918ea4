/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

use crate::api::DeviceInfo;
use crate::ir::*;
use crate::liveness::Analyzed;

/// Inclusive range of hardware MRFs an instruction's destination covers
fn mrf_range(instr: &Instr) -> (u32, u32) {
    let low = instr.dst.nr;
    let high = low + std::cmp::max(instr.regs_written(), 1) - 1;
    (low, high)
}

fn ranges_overlap(a: (u32, u32), b: (u32, u32)) -> bool {
    a.0 <= b.1 && b.0 <= a.1
}

fn is_mrf_copy(instr: &Instr) -> bool {
    if instr.opcode != Opcode::Mov {
        return false;
    }
    let src = &instr.srcs[0];
    !instr.is_partial_write()
        && instr.dst.file == RegFile::Mrf
        && src.is_vgrf()
        && instr.dst.ty == src.ty
        && !src.abs
        && !src.negate
        && src.is_contiguous()
        && src.subreg_offset == 0
}

/// Finds the instruction computing the source of the MRF copy at `ip`
/// which may write the MRF directly instead
fn find_producer(
    a: &Analyzed,
    gen: u32,
    block_start: usize,
    ip: usize,
) -> Option<usize> {
    let s = a.shader;
    let copy = &s.instrs[ip];
    let src = copy.srcs[0];
    let mrfs = mrf_range(copy);

    /* Someone else reads the value later */
    if a.live.vgrf_end(src.nr) > ip {
        return None;
    }

    for scan_ip in (block_start..ip).rev() {
        let scan = &s.instrs[scan_ip];
        if scan.dst.is_vgrf() && scan.dst.nr == src.nr {
            if scan.is_partial_write()
                || scan.regs_written() > u32::from(scan.exec_size) / 8
                || scan.mlen > 0
                || scan.opcode.is_send()
                || scan.opcode == Opcode::LoadPayload
                || (gen == 6 && scan.opcode.is_math())
                || scan.exec_size != copy.exec_size
                || scan.group != copy.group
            {
                return None;
            }
            return (scan.dst.reg_offset == src.reg_offset).then_some(scan_ip);
        }

        /* MRFs can't be read, so any other reader of the value blocks */
        if scan.srcs.iter().any(|r| {
            r.file == RegFile::Vgrf
                && r.nr == src.nr
                && r.reg_offset == src.reg_offset
        }) {
            return None;
        }

        if scan.dst.file == RegFile::Mrf
            && ranges_overlap(mrfs, mrf_range(scan))
        {
            return None;
        }

        /* A message still holding its payload in our MRFs */
        if let Some(base) = scan.base_mrf {
            if scan.mlen > 0
                && ranges_overlap(mrfs, (base, base + u32::from(scan.mlen) - 1))
            {
                return None;
            }
        }
    }
    None
}

impl Shader {
    /// Rewrites the computation of a value only copied to an MRF to write
    /// the MRF directly
    pub fn compute_to_mrf(&mut self, devinfo: &DeviceInfo) -> bool {
        /* Gen7+ has no MRFs */
        if devinfo.gen >= 7 {
            return false;
        }

        let rewrites: Vec<(usize, usize)> = {
            let a = self.analyze();
            let mut rewrites = Vec::new();
            for block in a.cfg.iter() {
                for ip in block.ips.clone() {
                    if !is_mrf_copy(&self.instrs[ip]) {
                        continue;
                    }
                    if let Some(producer) =
                        find_producer(&a, devinfo.gen, block.start_ip(), ip)
                    {
                        rewrites.push((producer, ip));
                    }
                }
            }
            rewrites
        };

        let mut dead = Vec::with_capacity(rewrites.len());
        for (producer, ip) in &rewrites {
            let copy_dst = self.instrs[*ip].dst;
            let saturate = self.instrs[*ip].saturate;
            let p = &mut self.instrs[*producer];
            p.dst = FsReg::mrf(copy_dst.nr, p.dst.ty);
            p.saturate |= saturate;
            dead.push(*ip);
        }
        dead.sort_unstable();
        self.remove_instrs(&dead);

        !dead.is_empty()
    }

    /// Removes MOVs to an MRF which already holds the same value
    pub fn remove_duplicate_mrf_writes(&mut self) -> bool {
        /* Compressed writes cover two MRFs, which isn't tracked */
        if self.dispatch_width == 16 {
            return false;
        }

        let mut last_mrf_move: [Option<usize>; BRW_MAX_MRF as usize] =
            [None; BRW_MAX_MRF as usize];
        let mut dead = Vec::new();

        for (ip, instr) in self.instrs.iter().enumerate() {
            if instr.is_control_flow() {
                last_mrf_move = [None; BRW_MAX_MRF as usize];
            }

            let mrf = instr.dst.nr as usize;
            let is_mrf_write =
                instr.dst.file == RegFile::Mrf && mrf < last_mrf_move.len();

            if is_mrf_write && instr.opcode == Opcode::Mov {
                if let Some(prev) = last_mrf_move[mrf] {
                    if instr.equals(&self.instrs[prev]) {
                        dead.push(ip);
                        continue;
                    }
                }
            }

            if is_mrf_write {
                last_mrf_move[mrf] = None;
            }

            if let Some(base) = instr.base_mrf {
                for i in 0..instr.implied_mrf_writes() {
                    if let Some(m) = last_mrf_move.get_mut((base + i) as usize) {
                        *m = None;
                    }
                }
            }

            /* Forget copies whose source just changed */
            if instr.dst.is_vgrf() {
                for m in last_mrf_move.iter_mut() {
                    if let Some(prev) = *m {
                        let src = &self.instrs[prev].srcs[0];
                        if src.is_vgrf() && src.nr == instr.dst.nr {
                            *m = None;
                        }
                    }
                }
            }

            if is_mrf_write
                && instr.opcode == Opcode::Mov
                && instr.srcs[0].is_vgrf()
                && !instr.is_partial_write()
            {
                last_mrf_move[mrf] = Some(ip);
            }
        }

        self.remove_instrs(&dead);
        !dead.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Shader, [FsReg; 3]) {
        let mut s = Shader::new(8);
        let regs = [
            s.vgrf(RegType::F, 1),
            s.vgrf(RegType::F, 1),
            s.vgrf(RegType::F, 1),
        ];
        (s, regs)
    }

    #[test]
    fn producer_writes_mrf() {
        let (mut s, [a, b, t]) = setup();
        s.add(t, a, b);
        s.mov(FsReg::mrf(2, RegType::F), t);

        assert!(s.compute_to_mrf(&DeviceInfo::snb()));
        assert_eq!(s.instrs.len(), 1);
        assert_eq!(s.instrs[0].dst, FsReg::mrf(2, RegType::F));
    }

    #[test]
    fn copies_inside_control_flow() {
        let (mut s, [a, b, t]) = setup();
        s.emit(Opcode::Do, FsReg::null(RegType::D), &[]);
        s.emit(Opcode::If, FsReg::null(RegType::D), &[]).predicate =
            Predicate::Normal;
        s.emit(Opcode::Break, FsReg::null(RegType::D), &[]);
        s.emit(Opcode::Endif, FsReg::null(RegType::D), &[]);
        s.add(t, a, b);
        s.mov(FsReg::mrf(2, RegType::F), t);
        s.emit(Opcode::While, FsReg::null(RegType::D), &[]);

        assert!(s.compute_to_mrf(&DeviceInfo::snb()));
        assert_eq!(s.instrs.len(), 6);
        assert_eq!(s.instrs[4].opcode, Opcode::Add);
        assert_eq!(s.instrs[4].dst, FsReg::mrf(2, RegType::F));
    }

    #[test]
    fn nothing_to_do_on_gen7() {
        let (mut s, [a, b, t]) = setup();
        s.add(t, a, b);
        s.mov(FsReg::mrf(2, RegType::F), t);

        assert!(!s.compute_to_mrf(&DeviceInfo::ivb()));
        assert_eq!(s.instrs.len(), 2);
    }

    #[test]
    fn value_read_elsewhere() {
        let (mut s, [a, b, t]) = setup();
        s.add(t, a, b);
        s.mov(FsReg::mrf(2, RegType::F), t);
        s.mov(FsReg::mrf(3, RegType::F), t);

        assert!(!s.compute_to_mrf(&DeviceInfo::snb()));
    }

    #[test]
    fn gen6_math_needs_grf_destination() {
        let (mut s, [a, _, t]) = setup();
        s.emit(Opcode::Rcp, t, &[a]);
        s.mov(FsReg::mrf(2, RegType::F), t);

        assert!(!s.compute_to_mrf(&DeviceInfo::snb()));
    }

    #[test]
    fn intervening_mrf_write() {
        let (mut s, [a, b, t]) = setup();
        s.add(t, a, b);
        s.mov(FsReg::mrf(2, RegType::F), a);
        s.mov(FsReg::mrf(2, RegType::F), t);

        assert!(!s.compute_to_mrf(&DeviceInfo::snb()));
    }

    #[test]
    fn duplicate_mrf_write() {
        let (mut s, [a, b, _]) = setup();
        s.mov(FsReg::mrf(2, RegType::F), a);
        s.mov(FsReg::mrf(3, RegType::F), b);
        s.mov(FsReg::mrf(2, RegType::F), a);

        assert!(s.remove_duplicate_mrf_writes());
        assert_eq!(s.instrs.len(), 2);
        assert!(!s.remove_duplicate_mrf_writes());
    }

    #[test]
    fn rewritten_source_keeps_mrf_write() {
        let (mut s, [a, b, _]) = setup();
        s.mov(FsReg::mrf(2, RegType::F), a);
        s.mov(a, b);
        s.mov(FsReg::mrf(2, RegType::F), a);

        assert!(!s.remove_duplicate_mrf_writes());
        assert_eq!(s.instrs.len(), 3);
    }
}
