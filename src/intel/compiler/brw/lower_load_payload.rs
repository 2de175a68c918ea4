/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

use crate::ir::*;

fn lower_load_payload(instr: &Instr, b: &mut impl Builder) {
    assert!(matches!(instr.dst.file, RegFile::Vgrf | RegFile::Mrf));
    assert!(!instr.saturate);

    let mut dst = instr.dst.retype(RegType::UD);
    let header_size = usize::from(instr.header_size);

    {
        let mut hb = b.group_builder(8, 0).with_exec_all();
        for src in &instr.srcs[..header_size] {
            if src.file != RegFile::Bad {
                hb.mov(dst, src.retype(RegType::UD));
            }
            dst = dst.offset(1);
        }
    }

    for src in &instr.srcs[header_size..] {
        if src.file != RegFile::Bad {
            b.mov(dst.retype(src.ty), *src);
        }
        dst = b.offset(dst, 1);
    }
}

impl Shader {
    /// Expands every LOAD_PAYLOAD into the MOVs it stands for
    pub fn lower_load_payload(&mut self) -> bool {
        let mut progress = false;
        self.map_instrs(|instr, _| {
            if instr.opcode != Opcode::LoadPayload {
                return MappedInstrs::One(instr);
            }

            let mut b = InstrBuilder::for_instr(&instr);
            lower_load_payload(&instr, &mut b);
            progress = true;
            b.as_mapped_instrs()
        });
        progress
    }
}
