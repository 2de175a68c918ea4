/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

use crate::ir::*;

impl Shader {
    /// Splits multi-register VGRFs into the smallest pieces which are never
    /// accessed together
    ///
    /// Smaller VGRFs have shorter live ranges, which helps dead code
    /// elimination, coalescing and register allocation.
    pub fn split_virtual_grfs(&mut self) {
        let num_vgrfs = self.alloc.count() as usize;

        let mut vgrf_to_reg = Vec::with_capacity(num_vgrfs);
        let mut reg_count = 0_usize;
        for nr in 0..num_vgrfs {
            vgrf_to_reg.push(reg_count);
            reg_count += self.alloc.size(nr as u32) as usize;
        }

        /* For every register, whether it may be separated from the one
         * before it.  Start with everything referenced as splittable and
         * then join whatever a single access covers.
         */
        let mut split_points = vec![false; reg_count];
        for instr in &self.instrs {
            for reg in std::iter::once(&instr.dst).chain(instr.srcs.iter()) {
                if reg.file == RegFile::Vgrf {
                    let first = vgrf_to_reg[reg.nr as usize];
                    let size = self.alloc.size(reg.nr) as usize;
                    split_points[first + 1..first + size].fill(true);
                }
            }
        }

        let mut join = |reg: &FsReg, regs: u32| {
            if reg.file == RegFile::Vgrf {
                let first =
                    vgrf_to_reg[reg.nr as usize] + reg.reg_offset as usize;
                for j in 1..regs as usize {
                    split_points[first + j] = false;
                }
            }
        };
        for instr in &self.instrs {
            join(&instr.dst, instr.regs_written());
            for i in 0..instr.srcs.len() {
                join(&instr.srcs[i], instr.regs_read(i));
            }
        }

        let mut new_vgrf = vec![0_u32; reg_count];
        let mut new_reg_offset = vec![0_u32; reg_count];
        let mut reg = 0;
        for nr in 0..num_vgrfs as u32 {
            debug_assert!(!split_points[reg]);
            new_reg_offset[reg] = 0;
            reg += 1;
            let mut offset = 1;

            for _ in 1..self.alloc.size(nr) {
                if split_points[reg] {
                    let piece = self.alloc.allocate(offset);
                    new_vgrf[reg - offset as usize..reg].fill(piece);
                    offset = 0;
                }
                new_reg_offset[reg] = offset;
                offset += 1;
                reg += 1;
            }

            /* The last piece keeps the original number */
            self.alloc.sizes[nr as usize] = offset;
            new_vgrf[reg - offset as usize..reg].fill(nr);
        }
        debug_assert!(reg == reg_count);

        self.for_each_reg_mut(|r| {
            if r.file == RegFile::Vgrf {
                let reg = vgrf_to_reg[r.nr as usize] + r.reg_offset as usize;
                r.nr = new_vgrf[reg];
                r.reg_offset = new_reg_offset[reg];
            }
        });
    }

    /// Drops VGRFs nothing references and renumbers the rest densely
    pub fn compact_virtual_grfs(&mut self) -> bool {
        let mut remap: Vec<Option<u32>> = vec![None; self.alloc.count() as usize];
        for instr in &self.instrs {
            for reg in std::iter::once(&instr.dst).chain(instr.srcs.iter()) {
                if reg.file == RegFile::Vgrf {
                    remap[reg.nr as usize] = Some(0);
                }
            }
        }

        let mut progress = false;
        let mut sizes = Vec::with_capacity(remap.len());
        for (nr, slot) in remap.iter_mut().enumerate() {
            if slot.is_some() {
                *slot = Some(sizes.len() as u32);
                sizes.push(self.alloc.sizes[nr]);
            } else {
                progress = true;
            }
        }
        self.alloc.sizes = sizes;

        self.for_each_reg_mut(|r| {
            if r.file == RegFile::Vgrf {
                r.nr = remap[r.nr as usize].expect("Referenced VGRF was dropped");
            }
        });

        progress
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_independent_registers() {
        let mut s = Shader::new(8);
        let v = s.vgrf(RegType::F, 3);
        s.mov(v, FsReg::imm_f(0.0));
        s.mov(v.offset(1), FsReg::imm_f(1.0));
        s.mov(v.offset(2), FsReg::imm_f(2.0));
        s.add(FsReg::mrf(1, RegType::F), v.offset(1), v.offset(2));

        s.split_virtual_grfs();

        assert_eq!(s.alloc.count(), 3);
        let nrs: Vec<u32> = s.instrs[..3].iter().map(|i| i.dst.nr).collect();
        assert_eq!(nrs[2], v.nr);
        assert!(nrs[1] != nrs[0] && nrs[2] != nrs[1] && nrs[2] != nrs[0]);
        assert!(s.instrs.iter().all(|i| i.dst.reg_offset == 0));
        assert!(s.alloc.sizes.iter().all(|size| *size == 1));
        assert_eq!(s.instrs[3].srcs[0].nr, nrs[1]);
        assert_eq!(s.instrs[3].srcs[1].nr, nrs[2]);
    }

    #[test]
    fn payload_stays_contiguous() {
        let mut s = Shader::new(8);
        let a = s.vgrf(RegType::F, 1);
        let b = s.vgrf(RegType::F, 1);
        let payload = s.vgrf(RegType::F, 2);
        s.load_payload(payload, &[a, b], 0);
        s.mov(FsReg::mrf(1, RegType::F), payload.offset(1));

        s.split_virtual_grfs();

        assert_eq!(s.alloc.count(), 3);
        assert_eq!(s.alloc.size(payload.nr), 2);
        assert_eq!(s.instrs[1].srcs[0], payload.offset(1));
    }

    #[test]
    fn compact_drops_unused() {
        let mut s = Shader::new(8);
        let _unused = s.vgrf(RegType::F, 1);
        let a = s.vgrf(RegType::F, 2);
        s.mov(a.offset(1), FsReg::imm_f(1.0));

        assert!(s.compact_virtual_grfs());
        assert_eq!(s.alloc.count(), 1);
        assert_eq!(s.alloc.size(0), 2);
        assert_eq!(s.instrs[0].dst, FsReg::vgrf(0, RegType::F).offset(1));
        assert!(!s.compact_virtual_grfs());
    }
}
