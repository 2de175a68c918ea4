/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

use crate::api::DeviceInfo;
use crate::ir::*;
use crate::liveness::LiveVariables;

use log::debug;
use rustc_hash::FxHashMap;
use std::cmp::{max, Ordering};

/// List scheduling heuristics
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScheduleMode {
    /// Before allocation, critical path first
    Pre,
    /// Before allocation, freeing registers first and otherwise keeping
    /// the original order
    PreNonLifo,
    /// Before allocation, freeing registers first and otherwise taking
    /// what most recently became ready
    PreLifo,
    /// After allocation, critical path first
    Post,
}

impl ScheduleMode {
    fn is_pre(&self) -> bool {
        *self != ScheduleMode::Post
    }
}

/// Anything an instruction can depend on another through
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
enum Resource {
    Vgrf(u32),
    Grf(u32),
    Mrf(u32),
    Flag,
    Acc,
    Memory,
}

/// Cycles until the result of `instr` is available
fn latency(devinfo: &DeviceInfo, instr: &Instr) -> u32 {
    match instr.opcode {
        Opcode::Sin | Opcode::Cos => 30,
        Opcode::Pow => 24,
        Opcode::IntQuotient | Opcode::IntRemainder => 44,
        op if op.is_math() => {
            if devinfo.gen == 6 {
                24
            } else {
                22
            }
        }
        Opcode::FbWrite | Opcode::ScratchWrite => 14,
        op if op.is_send() => 200,
        _ => 14,
    }
}

struct Node {
    children: Vec<(usize, u32)>,
    parents: u32,
    latency: u32,
    /// Longest latency path from here to the end of the segment
    delay: u32,
    unblocked_time: u32,
    ready_seq: u32,
}

/// Register indices per VGRF, for tracking dependencies pre-allocation
struct VgrfRegs {
    first_reg: Vec<u32>,
}

impl VgrfRegs {
    fn new(alloc: &VirtualGrfs) -> VgrfRegs {
        let mut first_reg = Vec::with_capacity(alloc.count() as usize);
        let mut next = 0;
        for size in &alloc.sizes {
            first_reg.push(next);
            next += size;
        }
        VgrfRegs {
            first_reg: first_reg,
        }
    }

    fn reg(&self, reg: &FsReg) -> u32 {
        self.first_reg[reg.nr as usize] + reg.reg_offset
    }
}

fn for_each_read(
    instr: &Instr,
    vgrf_regs: &VgrfRegs,
    mut f: impl FnMut(Resource),
) {
    for (i, src) in instr.srcs.iter().enumerate() {
        let regs = instr.regs_read(i);
        match src.file {
            RegFile::Vgrf => {
                let first = vgrf_regs.reg(src);
                (0..regs).for_each(|r| f(Resource::Vgrf(first + r)));
            }
            RegFile::Grf => (0..regs).for_each(|r| f(Resource::Grf(src.nr + r))),
            RegFile::Mrf => (0..regs).for_each(|r| f(Resource::Mrf(src.nr + r))),
            RegFile::Arf if src.is_accumulator() => f(Resource::Acc),
            RegFile::Arf if src.nr == BRW_ARF_FLAG => f(Resource::Flag),
            _ => (),
        }
    }

    if let Some(base) = instr.base_mrf {
        (0..u32::from(instr.mlen)).for_each(|r| f(Resource::Mrf(base + r)));
    }
    if instr.reads_flag() {
        f(Resource::Flag);
    }
    if matches!(instr.opcode, Opcode::Mac | Opcode::Mach | Opcode::Linterp) {
        f(Resource::Acc);
    }
    if matches!(
        instr.opcode,
        Opcode::ScratchRead
            | Opcode::Gen7ScratchRead
            | Opcode::UntypedSurfaceRead
            | Opcode::TypedSurfaceRead
    ) {
        f(Resource::Memory);
    }
}

fn for_each_write(
    instr: &Instr,
    vgrf_regs: &VgrfRegs,
    mut f: impl FnMut(Resource),
) {
    let dst = &instr.dst;
    let regs = instr.regs_written();
    match dst.file {
        RegFile::Vgrf => {
            let first = vgrf_regs.reg(dst);
            (0..regs).for_each(|r| f(Resource::Vgrf(first + r)));
        }
        RegFile::Grf => (0..regs).for_each(|r| f(Resource::Grf(dst.nr + r))),
        RegFile::Mrf => (0..regs).for_each(|r| f(Resource::Mrf(dst.nr + r))),
        RegFile::Arf if dst.is_accumulator() => f(Resource::Acc),
        RegFile::Arf if dst.nr == BRW_ARF_FLAG => f(Resource::Flag),
        _ => (),
    }

    if let Some(base) = instr.base_mrf {
        (0..instr.implied_mrf_writes())
            .for_each(|r| f(Resource::Mrf(base + r)));
    }
    if instr.writes_flag() {
        f(Resource::Flag);
    }
    if matches!(instr.opcode, Opcode::Mac | Opcode::Mach | Opcode::Linterp) {
        f(Resource::Acc);
    }
    if instr.has_side_effects() {
        f(Resource::Memory);
    }
}

/// Instructions which nothing may be moved across
fn is_barrier(instr: &Instr) -> bool {
    instr.is_control_flow() || instr.eot
}

struct SegmentScheduler<'a> {
    mode: ScheduleMode,
    instrs: &'a [Box<Instr>],
    nodes: Vec<Node>,
    /// VGRFs read in the segment which die in it, with their size
    dying: FxHashMap<u32, u32>,
    reads_left: FxHashMap<u32, u32>,
    /// VGRFs first defined in the segment which haven't been written yet
    undefined: FxHashMap<u32, u32>,
}

impl<'a> SegmentScheduler<'a> {
    fn new(
        devinfo: &DeviceInfo,
        mode: ScheduleMode,
        instrs: &'a [Box<Instr>],
        vgrf_regs: &VgrfRegs,
    ) -> Self {
        let mut nodes: Vec<Node> = instrs
            .iter()
            .map(|i| Node {
                children: Vec::new(),
                parents: 0,
                latency: latency(devinfo, i),
                delay: 0,
                unblocked_time: 0,
                ready_seq: 0,
            })
            .collect();

        let mut last_write: FxHashMap<Resource, usize> = FxHashMap::default();
        let mut reads: FxHashMap<Resource, Vec<usize>> = FxHashMap::default();
        let add_dep = |nodes: &mut Vec<Node>, p: usize, c: usize, lat: u32| {
            if p != c && !nodes[p].children.iter().any(|(n, _)| *n == c) {
                nodes[p].children.push((c, lat));
                nodes[c].parents += 1;
            }
        };

        for (n, instr) in instrs.iter().enumerate() {
            let mut deps = Vec::new();
            for_each_read(instr, vgrf_regs, |res| {
                if let Some(w) = last_write.get(&res) {
                    deps.push((*w, true));
                }
                reads.entry(res).or_default().push(n);
            });
            for_each_write(instr, vgrf_regs, |res| {
                if let Some(w) = last_write.insert(res, n) {
                    deps.push((w, false));
                }
                for r in reads.remove(&res).unwrap_or_default() {
                    deps.push((r, false));
                }
            });
            for (p, true_dep) in deps {
                let lat = if true_dep { nodes[p].latency } else { 0 };
                add_dep(&mut nodes, p, n, lat);
            }
        }

        for n in (0..nodes.len()).rev() {
            let delay = nodes[n]
                .children
                .iter()
                .map(|(c, lat)| lat + nodes[*c].delay)
                .max()
                .unwrap_or(nodes[n].latency);
            nodes[n].delay = delay;
        }

        SegmentScheduler {
            mode: mode,
            instrs: instrs,
            nodes: nodes,
            dying: FxHashMap::default(),
            reads_left: FxHashMap::default(),
            undefined: FxHashMap::default(),
        }
    }

    /// Gathers which VGRFs the segment kills and which it defines
    fn track_pressure(
        &mut self,
        live: &LiveVariables,
        alloc: &VirtualGrfs,
        start_ip: usize,
    ) {
        let end_ip = start_ip + self.instrs.len() - 1;
        for instr in self.instrs {
            for src in instr.srcs.iter() {
                if src.file == RegFile::Vgrf {
                    *self.reads_left.entry(src.nr).or_default() += 1;
                    if live.vgrf_end(src.nr) <= end_ip {
                        self.dying.insert(src.nr, alloc.size(src.nr));
                    }
                }
            }
            let dst = &instr.dst;
            if dst.file == RegFile::Vgrf && live.vgrf_start(dst.nr) >= start_ip {
                self.undefined.insert(dst.nr, alloc.size(dst.nr));
            }
        }
    }

    /// Registers freed minus registers newly occupied by scheduling `n`
    fn pressure_benefit(&self, n: usize) -> i64 {
        let instr = &self.instrs[n];
        let mut benefit = 0_i64;

        let mut counted: Vec<u32> = Vec::new();
        for src in instr.srcs.iter() {
            if src.file != RegFile::Vgrf || counted.contains(&src.nr) {
                continue;
            }
            counted.push(src.nr);
            let Some(size) = self.dying.get(&src.nr) else {
                continue;
            };
            let reads_here = instr
                .srcs
                .iter()
                .filter(|s| s.file == RegFile::Vgrf && s.nr == src.nr)
                .count() as u32;
            if self.reads_left[&src.nr] == reads_here {
                benefit += i64::from(*size);
            }
        }

        if instr.dst.file == RegFile::Vgrf {
            if let Some(size) = self.undefined.get(&instr.dst.nr) {
                benefit -= i64::from(*size);
            }
        }

        benefit
    }

    fn scheduled(&mut self, n: usize) {
        let instr = &self.instrs[n];
        for src in instr.srcs.iter() {
            if src.file == RegFile::Vgrf {
                if let Some(left) = self.reads_left.get_mut(&src.nr) {
                    *left -= 1;
                }
            }
        }
        if instr.dst.file == RegFile::Vgrf {
            self.undefined.remove(&instr.dst.nr);
        }
    }

    fn choose(&self, ready: &[usize], time: u32) -> usize {
        let by_critical_path = |a: &usize, b: &usize| {
            let (na, nb) = (&self.nodes[*a], &self.nodes[*b]);
            /* Prefer what can issue now */
            let (a_now, b_now) =
                (na.unblocked_time <= time, nb.unblocked_time <= time);
            a_now
                .cmp(&b_now)
                .then(na.delay.cmp(&nb.delay))
                .then(b.cmp(a))
        };

        let by_pressure = |a: &usize, b: &usize| {
            let benefit = self
                .pressure_benefit(*a)
                .cmp(&self.pressure_benefit(*b));
            let order = if self.mode == ScheduleMode::PreLifo {
                self.nodes[*a].ready_seq.cmp(&self.nodes[*b].ready_seq)
            } else {
                Ordering::Equal
            };
            benefit.then(order).then(b.cmp(a))
        };

        let best = match self.mode {
            ScheduleMode::Pre | ScheduleMode::Post => {
                ready.iter().max_by(|a, b| by_critical_path(a, b))
            }
            ScheduleMode::PreNonLifo | ScheduleMode::PreLifo => {
                ready.iter().max_by(|a, b| by_pressure(a, b))
            }
        };
        *best.expect("Ready list is not empty")
    }

    /// The order the segment's instructions should be emitted in
    fn schedule(mut self) -> Vec<usize> {
        let mut ready: Vec<usize> = (0..self.nodes.len())
            .filter(|n| self.nodes[*n].parents == 0)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut time = 0_u32;
        let mut seq = 0_u32;

        while !ready.is_empty() {
            let n = self.choose(&ready, time);
            ready.retain(|r| *r != n);
            order.push(n);
            self.scheduled(n);

            time = max(time, self.nodes[n].unblocked_time) + 2;
            let children = std::mem::take(&mut self.nodes[n].children);
            for (c, lat) in children {
                let child = &mut self.nodes[c];
                child.unblocked_time = max(child.unblocked_time, time + lat);
                child.parents -= 1;
                if child.parents == 0 {
                    seq += 1;
                    child.ready_seq = seq;
                    ready.push(c);
                }
            }
        }

        assert!(order.len() == self.nodes.len());
        order
    }
}

impl Shader {
    /// Reorders the instructions of every basic block to hide latency or,
    /// before register allocation, to keep register pressure down
    pub fn schedule_instructions(
        &mut self,
        devinfo: &DeviceInfo,
        mode: ScheduleMode,
    ) {
        let live = if mode.is_pre() {
            let a = self.analyze();
            Some(a.live)
        } else {
            None
        };
        let vgrf_regs = VgrfRegs::new(&self.alloc);

        let mut order: Vec<usize> = Vec::with_capacity(self.instrs.len());
        let mut start = 0;
        while start < self.instrs.len() {
            if is_barrier(&self.instrs[start]) {
                order.push(start);
                start += 1;
                continue;
            }

            let end = (start..self.instrs.len())
                .find(|ip| is_barrier(&self.instrs[*ip]))
                .unwrap_or(self.instrs.len());

            let mut sched = SegmentScheduler::new(
                devinfo,
                mode,
                &self.instrs[start..end],
                &vgrf_regs,
            );
            if let Some(live) = &live {
                sched.track_pressure(live, &self.alloc, start);
            }
            order.extend(sched.schedule().into_iter().map(|n| start + n));
            start = end;
        }

        let mut old: Vec<Option<Box<Instr>>> =
            self.instrs.drain(..).map(Some).collect();
        self.instrs = order
            .into_iter()
            .map(|ip| old[ip].take().expect("Each instruction is placed once"))
            .collect();

        debug!("SIMD{}: scheduled ({:?})", self.dispatch_width, mode);
    }
}
