/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

use crate::api::{DeviceInfo, WmProgData};
use crate::ir::*;

/// At most 16 registers of push constants
const MAX_PUSH_COMPONENTS: u32 = 16 * 8;

/// MRF the Gen6 constant cache read takes its header from
const PULL_CONSTANT_BASE_MRF: u32 = 14;

impl Shader {
    /// Splits the live uniforms between push constants and the pull
    /// constant buffer
    ///
    /// Only the SIMD8 compile decides the layout; the SIMD16 compile takes
    /// it over through `import_constant_locations`.
    pub fn assign_constant_locations(&mut self, prog_data: &mut WmProgData) {
        if self.dispatch_width != 8 {
            return;
        }

        let uniforms = self.uniforms as usize;
        let mut is_live = vec![false; uniforms];
        for instr in &self.instrs {
            for src in instr.srcs.iter() {
                if src.file == RegFile::Uniform {
                    let nr = (src.nr + src.reg_offset) as usize;
                    if nr < uniforms {
                        is_live[nr] = true;
                    }
                }
            }
        }

        self.push_constant_loc = vec![None; uniforms];
        self.pull_constant_loc = vec![None; uniforms];
        prog_data.param.clear();
        prog_data.pull_param.clear();

        /* Everything past the limit is demoted, in order */
        for i in 0..uniforms {
            if !is_live[i] {
                continue;
            }
            let num_push = prog_data.param.len() as u32;
            if num_push < MAX_PUSH_COMPONENTS {
                self.push_constant_loc[i] = Some(num_push);
                prog_data.param.push(self.param[i]);
            } else {
                self.pull_constant_loc[i] = Some(prog_data.nr_pull_params());
                prog_data.pull_param.push(self.param[i]);
            }
        }
        prog_data.nr_params = prog_data.param.len() as u32;
    }

    pub fn import_constant_locations(&mut self, simd8: &Shader) {
        self.push_constant_loc = simd8.push_constant_loc.clone();
        self.pull_constant_loc = simd8.pull_constant_loc.clone();
    }

    /// Replaces reads of demoted uniforms with loads from the pull constant
    /// buffer
    pub fn demote_pull_constants(&mut self, pull_constants_start: u32) {
        let uniforms = self.uniforms;
        let pull_constant_loc = std::mem::take(&mut self.pull_constant_loc);

        self.map_instrs(|mut instr, alloc| {
            let mut b = FsBuilder::for_instr(alloc, &instr);
            for src in instr.srcs.iter_mut() {
                if src.file != RegFile::Uniform {
                    continue;
                }

                let location = src.nr + src.reg_offset;
                let pull_index = if location < uniforms {
                    pull_constant_loc.get(location as usize).copied().flatten()
                } else {
                    None
                };
                let Some(pull_index) = pull_index else {
                    continue;
                };

                assert!(src.stride == 0);
                let mut ub = b.group_builder(8, 0).with_exec_all();
                let dst = ub.vgrf(RegType::F, 1);
                ub.emit(
                    Opcode::UniformPullConstantLoad,
                    dst,
                    &[
                        FsReg::imm_ud(pull_constants_start),
                        FsReg::imm_ud((pull_index * 4) & !15),
                    ],
                )
                .rlen = 1;

                let mut reg = dst.retype(src.ty).smear(pull_index & 3);
                reg.negate = src.negate;
                reg.abs = src.abs;
                *src = reg;
            }

            let mut mapped = b.as_mapped_instrs();
            mapped.push(instr);
            mapped
        });

        self.pull_constant_loc = pull_constant_loc;
    }

    /// Turns the logical constant cache reads into their hardware form
    ///
    /// Gen7+ sends the dword offset from a GRF payload while Gen6 builds the
    /// message header in a fixed MRF.
    pub fn lower_uniform_pull_constant_loads(&mut self, devinfo: &DeviceInfo) {
        let gen = devinfo.gen;
        self.map_instrs(|mut instr, alloc| {
            if instr.opcode != Opcode::UniformPullConstantLoad {
                return MappedInstrs::One(instr);
            }

            if gen < 7 {
                instr.base_mrf = Some(PULL_CONSTANT_BASE_MRF);
                instr.mlen = 1;
                return MappedInstrs::One(instr);
            }

            /* The offset was a 16-byte aligned byte offset; the message
             * wants dwords.
             */
            let offset = instr.srcs[1];
            assert!(offset.is_imm() && offset.ty == RegType::UD);

            let mut b = FsBuilder::new(alloc, 8);
            let mut ub = b.exec_all_builder();
            let payload = FsReg::vgrf(ub.alloc_vgrf(1), RegType::UD);
            ub.mov(payload, FsReg::imm_ud(offset.u32() / 4));

            instr.opcode = Opcode::UniformPullConstantLoadGen7;
            instr.srcs[1] = payload;
            instr.mlen = 1;
            instr.base_mrf = None;

            let mut mapped = b.as_mapped_instrs();
            mapped.push(instr);
            mapped
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shader_with_uniforms(count: u32) -> Shader {
        let mut s = Shader::new(8);
        s.uniforms = count;
        s.param = (0..count).collect();
        s
    }

    #[test]
    fn dead_uniforms_are_dropped() {
        let mut s = shader_with_uniforms(4);
        let d = s.vgrf(RegType::F, 1);
        s.add(d, FsReg::uniform(1, RegType::F), FsReg::uniform(3, RegType::F));

        let mut prog_data = WmProgData::new();
        s.assign_constant_locations(&mut prog_data);

        assert_eq!(prog_data.nr_params, 2);
        assert_eq!(prog_data.param, vec![1, 3]);
        assert_eq!(s.push_constant_loc, vec![None, Some(0), None, Some(1)]);
        assert!(prog_data.pull_param.is_empty());
    }

    #[test]
    fn excess_uniforms_demoted() {
        let mut s = shader_with_uniforms(MAX_PUSH_COMPONENTS + 6);
        let d = s.vgrf(RegType::F, 1);
        for i in 0..s.uniforms {
            s.add(d, d, FsReg::uniform(i, RegType::F));
        }

        let mut prog_data = WmProgData::new();
        s.assign_constant_locations(&mut prog_data);
        assert_eq!(prog_data.nr_params, MAX_PUSH_COMPONENTS);
        assert_eq!(prog_data.nr_pull_params(), 6);
        assert_eq!(
            s.pull_constant_loc[MAX_PUSH_COMPONENTS as usize + 5],
            Some(5)
        );

        s.demote_pull_constants(7);
        let last = s.instrs.len() - 1;
        let load = &s.instrs[last - 1];
        assert_eq!(load.opcode, Opcode::UniformPullConstantLoad);
        assert!(load.force_writemask_all);
        assert_eq!(&load.srcs[..], &[FsReg::imm_ud(7), FsReg::imm_ud(16)]);
        assert_eq!(s.instrs[last].srcs[1], load.dst.smear(1));

        s.lower_uniform_pull_constant_loads(&DeviceInfo::ivb());
        let last = s.instrs.len() - 1;
        let setup = &s.instrs[last - 2];
        assert_eq!(setup.opcode, Opcode::Mov);
        assert_eq!(setup.srcs[0], FsReg::imm_ud(4));
        let load = &s.instrs[last - 1];
        assert_eq!(load.opcode, Opcode::UniformPullConstantLoadGen7);
        assert_eq!(load.srcs[1], setup.dst);
        assert_eq!(load.mlen, 1);
    }

    #[test]
    fn gen6_pull_load_uses_mrf() {
        let mut s = Shader::new(8);
        let d = s.vgrf(RegType::F, 1);
        s.exec_all_builder()
            .emit(
                Opcode::UniformPullConstantLoad,
                d,
                &[FsReg::imm_ud(3), FsReg::imm_ud(32)],
            )
            .rlen = 1;

        s.lower_uniform_pull_constant_loads(&DeviceInfo::snb());
        assert_eq!(s.instrs.len(), 1);
        assert_eq!(s.instrs[0].base_mrf, Some(14));
        assert_eq!(s.instrs[0].mlen, 1);
    }
}
