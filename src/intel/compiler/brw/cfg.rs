/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

use crate::ir::*;

use std::ops::Range;

/// A run of instructions with a single entry and a single exit
pub struct BasicBlock {
    pub ips: Range<usize>,
    pub pred: Vec<usize>,
    pub succ: Vec<usize>,
    pub loop_depth: u32,
}

impl BasicBlock {
    pub fn start_ip(&self) -> usize {
        self.ips.start
    }

    /// Last instruction of the block, which must not be empty
    pub fn end_ip(&self) -> usize {
        assert!(!self.ips.is_empty());
        self.ips.end - 1
    }

    pub fn is_empty(&self) -> bool {
        self.ips.is_empty()
    }
}

/// Control flow graph over a shader's flat instruction list
///
/// Blocks are numbered in program order.  IF, ELSE, BREAK, CONTINUE and
/// WHILE end a block, while DO and ENDIF begin one.
pub struct CFG {
    blocks: Vec<BasicBlock>,
}

struct LoopState {
    do_block: usize,
    breaks: Vec<usize>,
}

struct IfState {
    if_block: usize,
    else_block: Option<usize>,
}

impl CFG {
    fn new_block(&mut self, start_ip: usize, loop_depth: u32) -> usize {
        self.blocks.push(BasicBlock {
            ips: start_ip..start_ip,
            pred: Vec::new(),
            succ: Vec::new(),
            loop_depth: loop_depth,
        });
        self.blocks.len() - 1
    }

    fn add_edge(&mut self, from: usize, to: usize) {
        if !self.blocks[from].succ.contains(&to) {
            self.blocks[from].succ.push(to);
            self.blocks[to].pred.push(from);
        }
    }

    fn end_block(&mut self, b: usize, end_ip: usize) {
        self.blocks[b].ips.end = end_ip;
    }

    pub fn for_instrs(instrs: &[Box<Instr>]) -> CFG {
        let mut cfg = CFG { blocks: Vec::new() };
        let mut ifs: Vec<IfState> = Vec::new();
        let mut loops: Vec<LoopState> = Vec::new();

        let mut cur = cfg.new_block(0, 0);
        for (ip, instr) in instrs.iter().enumerate() {
            let depth = loops.len() as u32;
            match instr.opcode {
                Opcode::If => {
                    cfg.end_block(cur, ip + 1);
                    ifs.push(IfState {
                        if_block: cur,
                        else_block: None,
                    });
                    let next = cfg.new_block(ip + 1, depth);
                    cfg.add_edge(cur, next);
                    cur = next;
                }
                Opcode::Else => {
                    cfg.end_block(cur, ip + 1);
                    let state = ifs.last_mut().expect("ELSE outside of IF");
                    state.else_block = Some(cur);
                    let if_block = state.if_block;
                    let next = cfg.new_block(ip + 1, depth);
                    cfg.add_edge(if_block, next);
                    cur = next;
                }
                Opcode::Endif => {
                    let endif = if cfg.blocks[cur].ips.start == ip {
                        cur
                    } else {
                        cfg.end_block(cur, ip);
                        let endif = cfg.new_block(ip, depth);
                        cfg.add_edge(cur, endif);
                        endif
                    };
                    let state = ifs.pop().expect("ENDIF outside of IF");
                    let from = state.else_block.unwrap_or(state.if_block);
                    cfg.add_edge(from, endif);
                    cur = endif;
                }
                Opcode::Do => {
                    let do_block = if cfg.blocks[cur].ips.start == ip {
                        cfg.blocks[cur].loop_depth = depth + 1;
                        cur
                    } else {
                        cfg.end_block(cur, ip);
                        let do_block = cfg.new_block(ip, depth + 1);
                        cfg.add_edge(cur, do_block);
                        do_block
                    };
                    loops.push(LoopState {
                        do_block: do_block,
                        breaks: Vec::new(),
                    });
                    cur = do_block;
                }
                Opcode::Break | Opcode::Continue => {
                    cfg.end_block(cur, ip + 1);
                    let state = loops.last_mut().expect("jump outside of loop");
                    if instr.opcode == Opcode::Break {
                        state.breaks.push(cur);
                    } else {
                        let do_block = state.do_block;
                        cfg.add_edge(cur, do_block);
                    }
                    let next = cfg.new_block(ip + 1, depth);
                    if !instr.predicate.is_none() {
                        cfg.add_edge(cur, next);
                    }
                    cur = next;
                }
                Opcode::While => {
                    cfg.end_block(cur, ip + 1);
                    let state = loops.pop().expect("WHILE outside of loop");
                    cfg.add_edge(cur, state.do_block);
                    let next = cfg.new_block(ip + 1, depth - 1);
                    if !instr.predicate.is_none() {
                        cfg.add_edge(cur, next);
                    }
                    for b in state.breaks {
                        cfg.add_edge(b, next);
                    }
                    cur = next;
                }
                _ => (),
            }
        }
        cfg.end_block(cur, instrs.len());
        assert!(ifs.is_empty() && loops.is_empty());

        cfg
    }

    pub fn for_shader(s: &Shader) -> CFG {
        CFG::for_instrs(&s.instrs)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, BasicBlock> {
        self.blocks.iter()
    }

    pub fn block(&self, b: usize) -> &BasicBlock {
        &self.blocks[b]
    }

    pub fn block_predecessors(&self, b: usize) -> &[usize] {
        &self.blocks[b].pred
    }

    pub fn block_successors(&self, b: usize) -> &[usize] {
        &self.blocks[b].succ
    }

    /// Returns the block containing `ip`
    pub fn block_for_ip(&self, ip: usize) -> usize {
        let b = self.blocks.partition_point(|b| b.ips.start <= ip);
        /* Skip back over empty blocks which start at the same ip */
        let mut b = b - 1;
        while self.blocks[b].ips.is_empty() && b > 0 {
            b -= 1;
        }
        assert!(self.blocks[b].ips.contains(&ip));
        b
    }
}

impl std::ops::Index<usize> for CFG {
    type Output = BasicBlock;

    fn index(&self, b: usize) -> &BasicBlock {
        &self.blocks[b]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instr(op: Opcode) -> Box<Instr> {
        Instr::new_boxed(op, 8, FsReg::null(RegType::D), &[])
    }

    fn mov() -> Box<Instr> {
        let dst = FsReg::vgrf(0, RegType::F);
        Instr::new_boxed(Opcode::Mov, 8, dst, &[FsReg::imm_f(1.0)])
    }

    #[test]
    fn if_else_diamond() {
        let instrs = vec![
            mov(),
            instr(Opcode::If),
            mov(),
            instr(Opcode::Else),
            mov(),
            instr(Opcode::Endif),
            mov(),
        ];
        let cfg = CFG::for_instrs(&instrs);
        assert_eq!(cfg.len(), 4);
        assert_eq!(cfg[0].ips, 0..2);
        assert_eq!(cfg[1].ips, 2..4);
        assert_eq!(cfg[2].ips, 4..5);
        assert_eq!(cfg[3].ips, 5..7);

        assert_eq!(cfg.block_successors(0), &[1, 2]);
        assert_eq!(cfg.block_successors(1), &[3]);
        assert_eq!(cfg.block_predecessors(3), &[2, 1]);
        assert_eq!(cfg.block_for_ip(5), 3);
    }

    #[test]
    fn loop_with_break() {
        let mut brk = instr(Opcode::Break);
        brk.predicate = Predicate::Normal;
        let instrs = vec![
            mov(),
            instr(Opcode::Do),
            mov(),
            brk,
            mov(),
            instr(Opcode::While),
            mov(),
        ];
        let cfg = CFG::for_instrs(&instrs);
        assert_eq!(cfg.len(), 4);
        assert_eq!(cfg[1].ips, 1..4);
        assert_eq!(cfg[1].loop_depth, 1);
        assert_eq!(cfg[2].ips, 4..6);
        assert_eq!(cfg[3].loop_depth, 0);

        /* Back edge from the WHILE block and the break to the exit */
        assert_eq!(cfg.block_successors(2), &[1]);
        assert_eq!(cfg.block_successors(1), &[2, 3]);
        assert_eq!(cfg.block_predecessors(1), &[0, 2]);
        assert_eq!(cfg.block_predecessors(3), &[1]);
    }
}
