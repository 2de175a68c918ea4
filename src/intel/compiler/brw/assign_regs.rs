/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

use crate::api::{CompileContext, CompileError, DeviceInfo};
use crate::bitset::BitSet;
use crate::ir::*;
use crate::liveness::Analyzed;
use crate::schedule::ScheduleMode;
use crate::{GetDebugFlags, DEBUG};

use log::debug;
use rustc_hash::FxHashMap;

/// Gen6 has 24 MRFs and the spill messages take the last three
const GEN6_SPILL_MRF: u32 = 21;

/// Spill cost multiplier for every level of loop nesting
const LOOP_WEIGHT: u64 = 10;

struct InterferenceGraph {
    /// VGRF of every node
    vgrfs: Vec<u32>,
    sizes: Vec<u32>,
    adj: Vec<BitSet>,
    /// Nodes whose first register is forced
    fixed: FxHashMap<usize, u32>,
}

impl InterferenceGraph {
    fn build(a: &Analyzed, devinfo: &DeviceInfo) -> InterferenceGraph {
        let s = a.shader;

        let mut node_of = vec![None; s.alloc.count() as usize];
        let mut vgrfs = Vec::new();
        for instr in &s.instrs {
            for reg in std::iter::once(&instr.dst).chain(instr.srcs.iter()) {
                if reg.file == RegFile::Vgrf && node_of[reg.nr as usize].is_none()
                {
                    node_of[reg.nr as usize] = Some(vgrfs.len());
                    vgrfs.push(reg.nr);
                }
            }
        }
        let n = vgrfs.len();
        let sizes = vgrfs.iter().map(|nr| s.alloc.size(*nr)).collect();

        let mut g = InterferenceGraph {
            vgrfs: vgrfs,
            sizes: sizes,
            adj: (0..n).map(|_| BitSet::with_capacity(n)).collect(),
            fixed: FxHashMap::default(),
        };

        for i in 0..n {
            for j in 0..i {
                if a.live.vgrfs_interfere(g.vgrfs[i], g.vgrfs[j]) {
                    g.add_edge(i, j);
                }
            }
        }

        for instr in &s.instrs {
            if instr.dst.file != RegFile::Vgrf {
                continue;
            }
            let Some(d) = node_of[instr.dst.nr as usize] else {
                continue;
            };

            /* A compressed instruction runs as two halves, so a source
             * overlapping the destination one register off would be
             * clobbered by the first half before the second reads it.
             */
            if instr.exec_size == 16 && instr.regs_written() > 1 {
                for src in instr.srcs.iter() {
                    if src.file == RegFile::Vgrf && src.nr != instr.dst.nr {
                        if let Some(n) = node_of[src.nr as usize] {
                            g.add_edge(d, n);
                        }
                    }
                }
            }

            if instr.is_send_from_grf() && instr.srcs[0].nr != instr.dst.nr {
                if let Some(p) = node_of[instr.srcs[0].nr as usize] {
                    g.add_edge(d, p);
                }
            }
        }

        /* Gen7+ requires the payload of a thread-ending message to live in
         * the last registers.
         */
        if devinfo.gen >= 7 {
            for instr in &s.instrs {
                if instr.eot && instr.is_send_from_grf() {
                    let payload = &instr.srcs[0];
                    if let Some(p) = node_of[payload.nr as usize] {
                        let size = g.sizes[p];
                        g.fixed.insert(p, s.max_grf - size);
                    }
                }
            }
        }

        g
    }

    fn add_edge(&mut self, a: usize, b: usize) {
        self.adj[a].insert(b);
        self.adj[b].insert(a);
    }

    fn len(&self) -> usize {
        self.vgrfs.len()
    }

    /// First registers of every node in `[first, limit)`, or None if the
    /// graph can't be colored
    fn color(&self, first: u32, limit: u32) -> Option<Vec<u32>> {
        let n = self.len();
        let regs = limit.saturating_sub(first);

        /* Number of starting positions the remaining neighbors of a node
         * can block
         */
        let blocked_by = |a: usize, b: usize| self.sizes[a] + self.sizes[b] - 1;
        let mut blocked: Vec<u32> = (0..n)
            .map(|i| self.adj[i].iter().map(|j| blocked_by(i, j)).sum())
            .collect();

        let mut removed = vec![false; n];
        let mut stack = Vec::with_capacity(n);
        for i in self.fixed.keys() {
            removed[*i] = true;
        }

        let mut remaining = n - self.fixed.len();
        while remaining > 0 {
            let trivial = (0..n).find(|i| {
                !removed[*i] && blocked[*i] + self.sizes[*i] <= regs
            });

            /* Nothing is trivially colorable, so push the most constrained
             * node and hope its neighbors end up sharing registers.
             */
            let node = trivial.unwrap_or_else(|| {
                (0..n)
                    .filter(|i| !removed[*i])
                    .max_by_key(|i| blocked[*i])
                    .expect("A node is left")
            });

            removed[node] = true;
            remaining -= 1;
            for j in self.adj[node].iter() {
                if !removed[j] {
                    blocked[j] -= blocked_by(node, j);
                }
            }
            stack.push(node);
        }

        let mut colors: Vec<Option<u32>> = vec![None; n];
        for (i, reg) in &self.fixed {
            colors[*i] = Some(*reg);
        }

        let mut used = vec![false; limit as usize];
        while let Some(node) = stack.pop() {
            used.fill(false);
            for j in self.adj[node].iter() {
                if let Some(c) = colors[j] {
                    let end = std::cmp::min(c + self.sizes[j], limit);
                    for r in c..end {
                        used[r as usize] = true;
                    }
                }
            }

            let size = self.sizes[node];
            let reg = (first..(limit + 1).saturating_sub(size)).find(|r| {
                (*r..*r + size).all(|x| !used[x as usize])
            })?;
            colors[node] = Some(reg);
        }

        Some(colors.into_iter().map(|c| c.unwrap_or(first)).collect())
    }
}

/// Moves the contents of `tmp` to scratch at `offset`, one register at a
/// time
fn emit_spill(
    devinfo: &DeviceInfo,
    b: &mut impl VgrfBuilder,
    tmp: u32,
    offset: u32,
    regs: u32,
) {
    let mut sb = b.group_builder(8, 0).with_exec_all();
    for i in 0..regs {
        let data = FsReg::vgrf(tmp, RegType::UD).offset(i);
        let write = if devinfo.gen >= 7 {
            let payload = FsReg::vgrf(sb.alloc_vgrf(2), RegType::UD);
            sb.mov(payload, FsReg::grf(0, RegType::UD));
            sb.mov(payload.offset(1), data);
            let w = sb.emit(
                Opcode::ScratchWrite,
                FsReg::null(RegType::UD),
                &[payload],
            );
            w.base_mrf = None;
            w
        } else {
            let w = sb.emit(
                Opcode::ScratchWrite,
                FsReg::null(RegType::UD),
                &[data],
            );
            w.base_mrf = Some(GEN6_SPILL_MRF);
            w
        };
        write.mlen = 2;
        write.offset = offset + i * REG_SIZE;
    }
}

/// Loads `regs` registers from scratch at `offset` into `tmp`
fn emit_unspill(
    devinfo: &DeviceInfo,
    b: &mut impl Builder,
    tmp: u32,
    offset: u32,
    regs: u32,
) {
    let mut sb = b.group_builder(8, 0).with_exec_all();
    for i in 0..regs {
        let dst = FsReg::vgrf(tmp, RegType::UD).offset(i);
        let read = if devinfo.gen >= 7 {
            let r = sb.emit(Opcode::Gen7ScratchRead, dst, &[]);
            r.base_mrf = None;
            r
        } else {
            let r = sb.emit(Opcode::ScratchRead, dst, &[]);
            r.base_mrf = Some(GEN6_SPILL_MRF);
            r
        };
        read.mlen = 1;
        read.rlen = 1;
        read.offset = offset + i * REG_SIZE;
    }
}

impl Shader {
    fn is_spill_temp(&self, nr: u32) -> bool {
        self.spill_temps_start.is_some_and(|start| nr >= start)
    }

    /// Picks the VGRF whose spilling costs the least
    ///
    /// Every def and use costs one scratch message, weighted by the loop
    /// depth.  Among equal costs the longest live range goes first.
    fn choose_spill_reg(&self, a: &Analyzed) -> Option<u32> {
        let mut cost: Vec<Option<u64>> = vec![None; self.alloc.count() as usize];
        for block in a.cfg.iter() {
            if block.is_empty() {
                continue;
            }
            let weight = LOOP_WEIGHT.saturating_pow(block.loop_depth);
            for ip in block.start_ip()..=block.end_ip() {
                let instr = &self.instrs[ip];
                for reg in
                    std::iter::once(&instr.dst).chain(instr.srcs.iter())
                {
                    if reg.file == RegFile::Vgrf {
                        let c = cost[reg.nr as usize].get_or_insert(0);
                        *c += weight;
                    }
                }
            }
        }

        let range = |nr: u32| {
            a.live.vgrf_end(nr).saturating_sub(a.live.vgrf_start(nr))
        };

        (0..self.alloc.count())
            .filter(|nr| !self.is_spill_temp(*nr))
            .filter_map(|nr| cost[nr as usize].map(|c| (nr, c)))
            .min_by(|(a_nr, a_cost), (b_nr, b_cost)| {
                a_cost
                    .cmp(b_cost)
                    .then_with(|| range(*b_nr).cmp(&range(*a_nr)))
            })
            .map(|(nr, _)| nr)
    }

    /// Rewrites every access of `spill_nr` to go through scratch memory
    fn spill_reg(&mut self, devinfo: &DeviceInfo, spill_nr: u32) {
        let size = self.alloc.size(spill_nr);
        let spill_offset = self.last_scratch;
        self.last_scratch += size * REG_SIZE;
        self.spilled_any_registers = true;
        if self.spill_temps_start.is_none() {
            self.spill_temps_start = Some(self.alloc.count());
        }
        debug!(
            "SIMD{}: spilling vgrf{} to scratch offset {}",
            self.dispatch_width, spill_nr, spill_offset
        );

        self.map_instrs(|mut instr, alloc| {
            let reads = instr
                .srcs
                .iter()
                .any(|s| s.file == RegFile::Vgrf && s.nr == spill_nr);
            let writes =
                instr.dst.file == RegFile::Vgrf && instr.dst.nr == spill_nr;
            if !reads && !writes {
                return MappedInstrs::One(instr);
            }

            let mut b = FsBuilder::for_instr(alloc, &instr);
            for i in 0..instr.srcs.len() {
                let src = instr.srcs[i];
                if src.file != RegFile::Vgrf || src.nr != spill_nr {
                    continue;
                }
                let regs = instr.regs_read(i);
                let tmp = b.alloc_vgrf(regs);
                let offset = spill_offset + src.reg_offset * REG_SIZE;
                emit_unspill(devinfo, &mut b, tmp, offset, regs);
                instr.srcs[i].nr = tmp;
                instr.srcs[i].reg_offset = 0;
            }

            let mut spill = None;
            if writes {
                let regs = instr.regs_written();
                let tmp = b.alloc_vgrf(regs);
                let offset = spill_offset + instr.dst.reg_offset * REG_SIZE;
                if instr.is_partial_write() {
                    emit_unspill(devinfo, &mut b, tmp, offset, regs);
                }
                instr.dst.nr = tmp;
                instr.dst.reg_offset = 0;
                spill = Some((tmp, offset, regs));
            }

            b.push_instr(instr);
            if let Some((tmp, offset, regs)) = spill {
                emit_spill(devinfo, &mut b, tmp, offset, regs);
            }
            b.as_mapped_instrs()
        });
    }

    /// Tries to map every VGRF onto a hardware register
    ///
    /// On failure with `allow_spilling` set, one register is spilled so
    /// the next attempt sees less pressure.  Running out of spill
    /// candidates fails the compile.
    pub fn assign_regs(
        &mut self,
        devinfo: &DeviceInfo,
        allow_spilling: bool,
    ) -> bool {
        let (colors, spill_nr) = {
            let a = self.analyze();
            let g = InterferenceGraph::build(&a, devinfo);
            match g.color(self.first_non_payload_grf, self.max_grf) {
                Some(colors) => {
                    let colors: FxHashMap<u32, (u32, u32)> = (0..g.len())
                        .map(|i| (g.vgrfs[i], (colors[i], g.sizes[i])))
                        .collect();
                    (Some(colors), None)
                }
                None if allow_spilling => (None, self.choose_spill_reg(&a)),
                None => (None, None),
            }
        };

        if let Some(colors) = colors {
            self.grf_used = colors
                .values()
                .map(|(reg, size)| reg + size)
                .fold(self.first_non_payload_grf, std::cmp::max);
            self.for_each_reg_mut(|r| {
                if r.file == RegFile::Vgrf {
                    let (reg, _) = colors[&r.nr];
                    r.file = RegFile::Grf;
                    r.nr = reg + r.reg_offset;
                    r.reg_offset = 0;
                }
            });
            return true;
        }

        if !allow_spilling {
            return false;
        }

        match spill_nr {
            Some(nr) => self.spill_reg(devinfo, nr),
            None => self.fail_with(CompileError::RegAlloc {
                dispatch_width: self.dispatch_width,
            }),
        }
        false
    }

    /// Spills every register which isn't a spill temporary
    fn spill_everything(&mut self, devinfo: &DeviceInfo) {
        let count = self.alloc.count();
        let mut used = vec![false; count as usize];
        for instr in &self.instrs {
            for reg in std::iter::once(&instr.dst).chain(instr.srcs.iter()) {
                if reg.file == RegFile::Vgrf {
                    used[reg.nr as usize] = true;
                }
            }
        }
        for nr in 0..count {
            if used[nr as usize] {
                self.spill_reg(devinfo, nr);
            }
        }
    }

    /// Schedules and allocates registers, spilling when nothing else works
    pub fn allocate_registers(&mut self, ctx: &CompileContext) {
        let devinfo = ctx.devinfo;

        if DEBUG.spill() {
            self.spill_everything(devinfo);
        }

        /* Ordered by decreasing performance but increasing likelihood of
         * allocating
         */
        let mut allocated_without_spills = false;
        for mode in [
            ScheduleMode::Pre,
            ScheduleMode::PreNonLifo,
            ScheduleMode::PreLifo,
        ] {
            self.schedule_instructions(devinfo, mode);
            if self.assign_regs(devinfo, false) {
                allocated_without_spills = true;
                break;
            }
        }

        if !allocated_without_spills {
            /* Spilling is assumed to be worse than running SIMD8 */
            if self.dispatch_width == 16 {
                self.fail_with(CompileError::RegAlloc { dispatch_width: 16 });
                return;
            }
            ctx.diag.perf(
                "Fragment shader triggered register spilling.  Try reducing \
                 the number of live scalar values to improve performance.",
            );

            while !self.assign_regs(devinfo, true) {
                if self.failed() {
                    return;
                }
            }

            self.schedule_instructions(devinfo, ScheduleMode::Post);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shader(width: u8, regs: u32) -> Shader {
        let mut s = Shader::new(width);
        s.first_non_payload_grf = 2;
        s.max_grf = 2 + regs;
        s
    }

    fn allocate_with_spills(s: &mut Shader, devinfo: &DeviceInfo) {
        for _ in 0..32 {
            if s.assign_regs(devinfo, true) {
                return;
            }
            assert!(!s.failed());
        }
        panic!("Spilling did not converge");
    }

    /// Defines `count` values, all live at once, and sums them
    fn pressure(s: &mut Shader, count: u32) -> FsReg {
        let vals: Vec<FsReg> = (0..count)
            .map(|i| {
                let v = s.vgrf(RegType::F, 1);
                s.mov(v, FsReg::imm_f(i as f32));
                v
            })
            .collect();
        let sum = s.vgrf(RegType::F, 1);
        s.add(sum, vals[0], vals[1]);
        for v in &vals[2..] {
            s.add(sum, sum, *v);
        }
        s.mov(FsReg::mrf(1, RegType::F), sum);
        sum
    }

    #[test]
    fn colors_after_payload() {
        let mut s = shader(8, 8);
        let a = s.vgrf(RegType::F, 1);
        let b = s.vgrf(RegType::F, 2);
        s.mov(a, FsReg::imm_f(1.0));
        s.mov(b, a);
        s.mov(b.offset(1), a);
        s.add(FsReg::mrf(1, RegType::F), b, b.offset(1));

        assert!(s.assign_regs(&DeviceInfo::snb(), false));
        assert_eq!(s.instrs[0].dst.file, RegFile::Grf);
        assert!(s.instrs[0].dst.nr >= 2);

        /* a and b are live together and must not overlap */
        let a_reg = s.instrs[0].dst.nr;
        let b_reg = s.instrs[1].dst.nr;
        assert!(a_reg < b_reg || a_reg >= b_reg + 2);
        assert_eq!(s.instrs[2].dst.nr, b_reg + 1);
        assert_eq!(s.instrs[3].srcs[1].nr, b_reg + 1);
        assert!(s.grf_used <= 5);
    }

    #[test]
    fn disjoint_ranges_share() {
        let mut s = shader(8, 1);
        let a = s.vgrf(RegType::F, 1);
        let b = s.vgrf(RegType::F, 1);
        s.mov(a, FsReg::imm_f(1.0));
        s.add(b, a, FsReg::imm_f(1.0));
        s.mov(FsReg::mrf(1, RegType::F), b);

        assert!(s.assign_regs(&DeviceInfo::snb(), false));
        assert_eq!(s.instrs[0].dst.nr, 2);
        assert_eq!(s.instrs[1].dst.nr, 2);
        assert_eq!(s.grf_used, 3);
    }

    #[test]
    fn compressed_sources_dont_overlap() {
        let mut s = shader(16, 2);
        let a = s.vgrf(RegType::F, 1);
        let b = s.vgrf(RegType::F, 1);
        s.mov(a, FsReg::imm_f(1.0));
        s.add(b, a, FsReg::imm_f(1.0));
        s.mov(FsReg::mrf(1, RegType::F), b);

        /* Two registers would do for SIMD8, but the halves of the ADD
         * would step on each other.
         */
        assert!(!s.assign_regs(&DeviceInfo::snb(), false));
        s.max_grf = 6;
        assert!(s.assign_regs(&DeviceInfo::snb(), false));
        assert!(s.instrs[1].dst.nr != s.instrs[1].srcs[0].nr);
    }

    #[test]
    fn gen6_spills_through_mrfs() {
        let mut s = shader(8, 4);
        pressure(&mut s, 6);
        let devinfo = DeviceInfo::snb();

        assert!(!s.assign_regs(&devinfo, false));
        allocate_with_spills(&mut s, &devinfo);

        assert!(s.spilled_any_registers);
        assert!(s.last_scratch >= REG_SIZE);
        let writes: Vec<&Instr> = s
            .instrs
            .iter()
            .filter(|i| i.opcode == Opcode::ScratchWrite)
            .map(|i| i.as_ref())
            .collect();
        assert!(!writes.is_empty());
        assert!(writes.iter().all(|w| w.base_mrf == Some(GEN6_SPILL_MRF)));
        assert!(s.instrs.iter().any(|i| i.opcode == Opcode::ScratchRead));
        for instr in &s.instrs {
            assert!(instr.dst.file != RegFile::Vgrf);
            if instr.dst.file == RegFile::Grf {
                assert!(instr.dst.nr >= 2 && instr.dst.nr < s.max_grf);
            }
        }
    }

    #[test]
    fn gen7_spills_from_grfs() {
        let mut s = shader(16, 8);
        pressure(&mut s, 6);
        let devinfo = DeviceInfo::ivb();

        allocate_with_spills(&mut s, &devinfo);

        let write = s
            .instrs
            .iter()
            .find(|i| i.opcode == Opcode::ScratchWrite)
            .unwrap();
        assert_eq!(write.base_mrf, None);
        assert_eq!(write.srcs[0].file, RegFile::Grf);
        assert_eq!(write.mlen, 2);
        assert!(s.instrs.iter().any(|i| i.opcode == Opcode::Gen7ScratchRead));
        /* SIMD16 values take two single-register messages */
        assert!(s.last_scratch % (2 * REG_SIZE) == 0);
    }

    #[test]
    fn no_candidates_fails() {
        let mut s = shader(8, 0);
        let a = s.vgrf(RegType::F, 1);
        s.mov(a, FsReg::imm_f(1.0));
        s.mov(FsReg::mrf(1, RegType::F), a);

        let devinfo = DeviceInfo::snb();
        for _ in 0..4 {
            if s.assign_regs(&devinfo, true) || s.failed() {
                break;
            }
        }
        assert_eq!(
            s.error,
            Some(CompileError::RegAlloc { dispatch_width: 8 })
        );
    }

    #[test]
    fn eot_payload_in_last_registers() {
        let mut s = shader(8, 126);
        let payload = s.vgrf(RegType::F, 4);
        for i in 0..4 {
            s.mov(payload.offset(i), FsReg::imm_f(1.0));
        }
        let fb = s.emit(Opcode::FbWrite, FsReg::null(RegType::UD), &[payload]);
        fb.mlen = 4;
        fb.eot = true;

        assert!(s.assign_regs(&DeviceInfo::hsw(), false));
        assert_eq!(s.instrs[4].srcs[0].nr, MAX_GRF - 4);
        assert_eq!(s.grf_used, MAX_GRF);
    }
}
