/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

use crate::bitset::BitSet;
use crate::cfg::CFG;
use crate::ir::*;

use std::cmp::{max, min};

/// Per-block dataflow sets, indexed by variable
struct BlockLiveness {
    /// Variables fully written before any read in the block
    def: BitSet,
    /// Variables read before any full write in the block
    uses: BitSet,
    live_in: BitSet,
    live_out: BitSet,
}

/// Live ranges of every register of every virtual GRF
///
/// Each register of a VGRF is tracked as its own variable so that
/// partially live values don't keep the whole allocation alive.  Ranges
/// are inclusive instruction indices.
pub struct LiveVariables {
    var_from_vgrf: Vec<usize>,
    vgrf_from_var: Vec<u32>,
    start: Vec<usize>,
    end: Vec<usize>,
    vgrf_start: Vec<usize>,
    vgrf_end: Vec<usize>,
    blocks: Vec<BlockLiveness>,
}

impl LiveVariables {
    fn var(&self, nr: u32, reg_offset: u32) -> Option<usize> {
        let first = self.var_from_vgrf[nr as usize];
        let var = first + reg_offset as usize;
        let next = self
            .var_from_vgrf
            .get(nr as usize + 1)
            .copied()
            .unwrap_or(self.vgrf_from_var.len());
        if var < next {
            Some(var)
        } else {
            None
        }
    }

    fn note_read(&mut self, b: usize, ip: usize, var: usize) {
        self.start[var] = min(self.start[var], ip);
        self.end[var] = max(self.end[var], ip);

        let bl = &mut self.blocks[b];
        if !bl.def.get(var) {
            bl.uses.insert(var);
        }
    }

    fn note_write(&mut self, b: usize, ip: usize, var: usize, instr: &Instr) {
        self.start[var] = min(self.start[var], ip);
        self.end[var] = max(self.end[var], ip);

        /* Only a write which covers every channel screens off the value
         * coming into the block.
         */
        let bl = &mut self.blocks[b];
        let predicated =
            !instr.predicate.is_none() && instr.opcode != Opcode::Sel;
        if !bl.uses.get(var) && !predicated && !instr.is_partial_write() {
            bl.def.insert(var);
        }
    }

    fn setup_def_use(&mut self, instrs: &[Box<Instr>], cfg: &CFG) {
        for (b, block) in cfg.iter().enumerate() {
            for ip in block.ips.clone() {
                let instr = &instrs[ip];
                for (i, src) in instr.srcs.iter().enumerate() {
                    if src.file != RegFile::Vgrf {
                        continue;
                    }
                    for j in 0..instr.regs_read(i) {
                        if let Some(var) = self.var(src.nr, src.reg_offset + j) {
                            self.note_read(b, ip, var);
                        }
                    }
                }

                if instr.dst.file == RegFile::Vgrf {
                    for j in 0..instr.regs_written() {
                        let dst = &instr.dst;
                        if let Some(var) = self.var(dst.nr, dst.reg_offset + j) {
                            self.note_write(b, ip, var, instr);
                        }
                    }
                }
            }
        }
    }

    fn compute_live_variables(&mut self, cfg: &CFG) {
        let mut progress = true;
        while progress {
            progress = false;

            for b in (0..cfg.len()).rev() {
                let mut live_out = std::mem::take(&mut self.blocks[b].live_out);
                for s in cfg.block_successors(b) {
                    progress |= live_out.union_with(&self.blocks[*s].live_in);
                }

                let bl = &mut self.blocks[b];
                let mut live_in = bl.uses.clone();
                for var in live_out.iter() {
                    if !bl.def.get(var) {
                        live_in.insert(var);
                    }
                }
                progress |= bl.live_in.union_with(&live_in);
                bl.live_out = live_out;
            }
        }
    }

    /// Extends the ranges of values live across block boundaries
    fn compute_start_end(&mut self, cfg: &CFG) {
        for (b, block) in cfg.iter().enumerate() {
            if block.is_empty() {
                continue;
            }
            let bl = &self.blocks[b];
            for var in bl.live_in.iter() {
                self.start[var] = min(self.start[var], block.start_ip());
                self.end[var] = max(self.end[var], block.start_ip());
            }
            for var in bl.live_out.iter() {
                self.start[var] = min(self.start[var], block.end_ip());
                self.end[var] = max(self.end[var], block.end_ip());
            }
        }
    }

    pub fn for_shader(s: &Shader, cfg: &CFG) -> LiveVariables {
        let mut var_from_vgrf = Vec::new();
        let mut vgrf_from_var = Vec::new();
        for nr in 0..s.alloc.count() {
            var_from_vgrf.push(vgrf_from_var.len());
            for _ in 0..s.alloc.size(nr) {
                vgrf_from_var.push(nr);
            }
        }
        let num_vars = vgrf_from_var.len();

        let mut live = LiveVariables {
            var_from_vgrf: var_from_vgrf,
            vgrf_from_var: vgrf_from_var,
            start: vec![usize::MAX; num_vars],
            end: vec![0; num_vars],
            vgrf_start: Vec::new(),
            vgrf_end: Vec::new(),
            blocks: (0..cfg.len())
                .map(|_| BlockLiveness {
                    def: BitSet::with_capacity(num_vars),
                    uses: BitSet::with_capacity(num_vars),
                    live_in: BitSet::with_capacity(num_vars),
                    live_out: BitSet::with_capacity(num_vars),
                })
                .collect(),
        };

        live.setup_def_use(&s.instrs, cfg);
        live.compute_live_variables(cfg);
        live.compute_start_end(cfg);

        live.vgrf_start = vec![usize::MAX; s.alloc.count() as usize];
        live.vgrf_end = vec![0; s.alloc.count() as usize];
        for var in 0..num_vars {
            let nr = live.vgrf_from_var[var] as usize;
            live.vgrf_start[nr] = min(live.vgrf_start[nr], live.start[var]);
            live.vgrf_end[nr] = max(live.vgrf_end[nr], live.end[var]);
        }

        live
    }

    pub fn num_vars(&self) -> usize {
        self.vgrf_from_var.len()
    }

    /// Variable index of the first register of `reg`
    pub fn var_from_reg(&self, reg: &FsReg) -> usize {
        assert!(reg.file == RegFile::Vgrf);
        self.var_from_vgrf[reg.nr as usize] + reg.reg_offset as usize
    }

    pub fn vgrf_from_var(&self, var: usize) -> u32 {
        self.vgrf_from_var[var]
    }

    /// Whether the variable is never referenced
    pub fn is_unused(&self, var: usize) -> bool {
        self.start[var] == usize::MAX
    }

    pub fn start(&self, var: usize) -> usize {
        self.start[var]
    }

    pub fn end(&self, var: usize) -> usize {
        self.end[var]
    }

    pub fn vgrf_start(&self, nr: u32) -> usize {
        self.vgrf_start[nr as usize]
    }

    pub fn vgrf_end(&self, nr: u32) -> usize {
        self.vgrf_end[nr as usize]
    }

    pub fn is_live_in(&self, b: usize, var: usize) -> bool {
        self.blocks[b].live_in.get(var)
    }

    pub fn is_live_out(&self, b: usize, var: usize) -> bool {
        self.blocks[b].live_out.get(var)
    }

    pub fn vars_interfere(&self, a: usize, b: usize) -> bool {
        !(self.end[b] <= self.start[a] || self.end[a] <= self.start[b])
    }

    pub fn vgrfs_interfere(&self, a: u32, b: u32) -> bool {
        let (a, b) = (a as usize, b as usize);
        /* A register which is never used interferes with nothing */
        if self.vgrf_start[a] == usize::MAX || self.vgrf_start[b] == usize::MAX
        {
            return false;
        }
        !(self.vgrf_end[b] <= self.vgrf_start[a]
            || self.vgrf_end[a] <= self.vgrf_start[b])
    }

    /// Number of virtual registers live at every instruction
    pub fn regs_live_at_ip(&self, s: &Shader) -> Vec<u32> {
        let mut regs = vec![0_u32; s.instrs.len()];
        for nr in 0..s.alloc.count() {
            let start = self.vgrf_start(nr);
            if start == usize::MAX {
                continue;
            }
            let end = min(self.vgrf_end(nr), s.instrs.len().saturating_sub(1));
            for ip in start..=end {
                regs[ip] += s.alloc.size(nr);
            }
        }
        regs
    }
}

/// Control flow and liveness of a shader's current instruction list
///
/// Holds a shared borrow of the shader, so the results can only be consulted
/// while the program is unchanged.  Passes gather their edits from an
/// `Analyzed` and apply them once it has been dropped.
pub struct Analyzed<'a> {
    pub shader: &'a Shader,
    pub cfg: CFG,
    pub live: LiveVariables,
}

impl Shader {
    pub fn analyze(&self) -> Analyzed<'_> {
        let cfg = CFG::for_shader(self);
        let live = LiveVariables::for_shader(self, &cfg);
        Analyzed {
            shader: self,
            cfg: cfg,
            live: live,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mov(s: &mut Shader, dst: FsReg, src: FsReg) {
        let width = s.dispatch_width;
        s.instrs.push(Instr::new_boxed(Opcode::Mov, width, dst, &[src]));
    }

    fn cf(s: &mut Shader, op: Opcode) {
        let width = s.dispatch_width;
        s.instrs
            .push(Instr::new_boxed(op, width, FsReg::null(RegType::D), &[]));
    }

    #[test]
    fn straight_line_ranges() {
        let mut s = Shader::new(8);
        let a = s.vgrf(RegType::F, 1);
        let b = s.vgrf(RegType::F, 1);
        mov(&mut s, a, FsReg::imm_f(1.0));
        mov(&mut s, b, FsReg::imm_f(2.0));
        mov(&mut s, b, a);

        let a_live = s.analyze();
        let live = &a_live.live;
        assert_eq!(live.vgrf_start(a.nr), 0);
        assert_eq!(live.vgrf_end(a.nr), 2);
        assert_eq!(live.vgrf_start(b.nr), 1);
        assert!(live.vgrfs_interfere(a.nr, b.nr));
    }

    #[test]
    fn values_live_across_loop() {
        let mut s = Shader::new(16);
        let a = s.vgrf(RegType::F, 1);
        let t = s.vgrf(RegType::F, 1);
        mov(&mut s, a, FsReg::imm_f(1.0));
        cf(&mut s, Opcode::Do);
        mov(&mut s, t, a);
        let mut brk = Instr::new_boxed(
            Opcode::Break,
            16,
            FsReg::null(RegType::D),
            &[],
        );
        brk.predicate = Predicate::Normal;
        s.instrs.push(brk);
        cf(&mut s, Opcode::While);
        mov(&mut s, t, FsReg::imm_f(0.0));

        let cfg = CFG::for_shader(&s);
        let live = LiveVariables::for_shader(&s, &cfg);

        /* a is read every iteration so it lives through the WHILE */
        let var = live.var_from_reg(&a);
        assert_eq!(live.start(var), 0);
        assert_eq!(live.end(var), 4);
        assert_eq!(live.end(var + 1), 4);
        assert!(live.is_live_in(1, var));

        /* t is redefined after the loop and dead in between */
        let tv = live.var_from_reg(&t);
        assert!(!live.is_live_out(1, tv));
    }
}
