/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

use crate::api::{CompileContext, CompileError, DeviceInfo, WmProgData};
use crate::ir::*;

/// Longest message the sampler accepts
pub const MAX_SAMPLER_MESSAGE_SIZE: u32 = 11;

/// Longest render target write, which has to fit in m1..m15
pub const MAX_FB_WRITE_MESSAGE_SIZE: u32 = 15;

/// First MRF of a Gen6 sampler message without a header
const GEN6_SAMPLER_MRF: u32 = 2;

/// Registers a LOAD_PAYLOAD of `len` sources at `exec_size` fills
fn payload_regs(exec_size: u8, len: usize, header_size: usize) -> u32 {
    let comp_regs = (u32::from(exec_size) * 4).div_ceil(REG_SIZE);
    header_size as u32 + (len - header_size) as u32 * comp_regs
}

fn check_mlen(mlen: u32, max: u32) -> Result<(), CompileError> {
    if mlen > max {
        Err(CompileError::MessageTooLong {
            mlen: mlen,
            max: max,
        })
    } else {
        Ok(())
    }
}

/// The payload slots of one color, clamped if the key asks for it
fn color_payload(
    clamp: bool,
    b: &mut impl VgrfBuilder,
    color: FsReg,
    components: u32,
) -> Vec<FsReg> {
    let color = if clamp {
        assert!(color.ty == RegType::F);
        let tmp = b.vgrf(RegType::F, 4);
        for i in 0..components {
            let (d, s) = (b.offset(tmp, i), b.offset(color, i));
            b.mov(d, s).saturate = true;
        }
        tmp
    } else {
        color
    };
    (0..components).map(|i| b.offset(color, i)).collect()
}

fn lower_fb_write(
    ctx: &CompileContext,
    prog_data: &WmProgData,
    b: &mut impl VgrfBuilder,
    instr: &mut Instr,
) -> Result<(), CompileError> {
    let devinfo = ctx.devinfo;
    let key = ctx.key;
    let color0 = instr.srcs[FB_WRITE_LOGICAL_SRC_COLOR0];
    let color1 = instr.srcs[FB_WRITE_LOGICAL_SRC_COLOR1];
    let src0_alpha = instr.srcs[FB_WRITE_LOGICAL_SRC_SRC0_ALPHA];
    let src_depth = instr.srcs[FB_WRITE_LOGICAL_SRC_SRC_DEPTH];
    let dst_depth = instr.srcs[FB_WRITE_LOGICAL_SRC_DST_DEPTH];
    let components = instr.srcs[FB_WRITE_LOGICAL_SRC_COMPONENTS].u32();

    /* The header carries the dispatched pixel enables, which only the
     * final write, dual-source writes and pre-Haswell discards need.
     */
    let header_size = if (devinfo.is_haswell
        || devinfo.gen >= 8
        || !prog_data.uses_kill)
        && color1.file == RegFile::Bad
        && key.nr_color_regions == 1
    {
        0
    } else {
        2
    };

    let mut sources = vec![FsReg::bad(); header_size];

    if src0_alpha.file != RegFile::Bad {
        sources.extend(color_payload(
            key.clamp_fragment_color,
            b,
            src0_alpha,
            1,
        ));
    }

    let mut colors = vec![color0];
    if color1.file != RegFile::Bad {
        colors.push(color1);
    }
    for color in colors {
        let mut slots =
            color_payload(key.clamp_fragment_color, b, color, components);
        slots.resize(4, FsReg::bad());
        sources.extend(slots);
    }

    for depth in [src_depth, dst_depth] {
        if depth.file != RegFile::Bad {
            sources.push(depth);
        }
    }

    let mlen = payload_regs(instr.exec_size, sources.len(), header_size);
    check_mlen(mlen, MAX_FB_WRITE_MESSAGE_SIZE)?;

    if devinfo.gen >= 7 {
        let payload = FsReg::vgrf(b.alloc_vgrf(mlen), RegType::F);
        b.load_payload(payload, &sources, header_size as u8);
        instr.srcs = [payload].into_iter().collect();
        instr.base_mrf = None;
    } else {
        b.load_payload(FsReg::mrf(1, RegType::F), &sources, header_size as u8);
        instr.srcs.clear();
        instr.base_mrf = Some(1);
    }

    instr.opcode = Opcode::FbWrite;
    instr.mlen = mlen as u8;
    instr.header_size = header_size as u8;
    Ok(())
}

/// The sampler state index only has four bits, so larger ones go through
/// the header
fn is_high_sampler(devinfo: &DeviceInfo, sampler: FsReg) -> bool {
    if devinfo.gen < 8 && !devinfo.is_haswell {
        return false;
    }
    !sampler.is_imm() || sampler.u32() >= 16
}

/// The logical operands of a texturing instruction
struct TexSources {
    coordinate: FsReg,
    shadow_c: FsReg,
    lod: FsReg,
    lod2: FsReg,
    sampler: FsReg,
    offset_value: FsReg,
    coord_components: u32,
    grad_components: u32,
}

impl TexSources {
    fn from_instr(instr: &Instr) -> Self {
        Self {
            coordinate: instr.srcs[TEX_LOGICAL_SRC_COORDINATE],
            shadow_c: instr.srcs[TEX_LOGICAL_SRC_SHADOW_C],
            lod: instr.srcs[TEX_LOGICAL_SRC_LOD],
            lod2: instr.srcs[TEX_LOGICAL_SRC_LOD2],
            sampler: instr.srcs[TEX_LOGICAL_SRC_SAMPLER],
            offset_value: instr.srcs[TEX_LOGICAL_SRC_OFFSET_VALUE],
            coord_components: instr.srcs[TEX_LOGICAL_SRC_COORD_COMPONENTS]
                .u32(),
            grad_components: instr.srcs[TEX_LOGICAL_SRC_GRAD_COMPONENTS].u32(),
        }
    }
}

/// Gen7+ sampler messages come from a GRF payload whose parameter order
/// depends on the message
fn lower_sampler_gen7(
    devinfo: &DeviceInfo,
    b: &mut impl VgrfBuilder,
    instr: &mut Instr,
    op: Opcode,
) -> Result<(), CompileError> {
    let t = TexSources::from_instr(instr);
    let coords: Vec<FsReg> = (0..t.coord_components)
        .map(|i| b.offset(t.coordinate, i))
        .collect();

    let header_size = usize::from(
        matches!(op, Opcode::Tg4 | Opcode::Tg4Offset)
            || t.offset_value.file != RegFile::Bad
            || instr.offset != 0
            || is_high_sampler(devinfo, t.sampler),
    );

    /* The header is filled in by the generator */
    let mut sources = vec![FsReg::bad(); header_size];

    if t.shadow_c.file != RegFile::Bad {
        sources.push(t.shadow_c);
    }

    let mut coordinate_done = false;
    match op {
        Opcode::Txb | Opcode::Txl => sources.push(t.lod),
        Opcode::Txd => {
            /* Each coordinate is followed by its derivatives */
            for i in 0..t.coord_components {
                sources.push(coords[i as usize]);
                if i < t.grad_components {
                    sources.push(b.offset(t.lod, i));
                    sources.push(b.offset(t.lod2, i));
                }
            }
            coordinate_done = true;
        }
        Opcode::Txs => sources.push(t.lod.retype(RegType::UD)),
        Opcode::Txf => {
            /* u, lod, v, r */
            sources.push(coords[0].retype(RegType::D));
            sources.push(t.lod.retype(RegType::D));
            for i in 1..t.coord_components {
                sources.push(coords[i as usize].retype(RegType::D));
            }
            coordinate_done = true;
        }
        Opcode::Tg4Offset => {
            /* u, v, offu, offv, r */
            for i in 0..2 {
                sources.push(coords[i as usize]);
            }
            for i in 0..2 {
                sources.push(b.offset(t.offset_value, i).retype(RegType::D));
            }
            if t.coord_components == 3 {
                sources.push(coords[2]);
            }
            coordinate_done = true;
        }
        _ => (),
    }

    if !coordinate_done {
        for i in 0..t.coord_components {
            sources.push(coords[i as usize]);
        }
    }

    let mlen = payload_regs(instr.exec_size, sources.len(), header_size);
    check_mlen(mlen, MAX_SAMPLER_MESSAGE_SIZE)?;

    let payload = FsReg::vgrf(b.alloc_vgrf(mlen), RegType::F);
    b.load_payload(payload, &sources, header_size as u8);

    instr.opcode = op;
    instr.srcs = [payload, t.sampler].into_iter().collect();
    instr.base_mrf = None;
    instr.mlen = mlen as u8;
    instr.header_size = header_size as u8;
    Ok(())
}

/// Gen6 sampler messages are written to the MRFs in a fixed layout
fn lower_sampler_gen6(
    b: &mut impl VgrfBuilder,
    instr: &mut Instr,
    op: Opcode,
) -> Result<(), CompileError> {
    let t = TexSources::from_instr(instr);

    let header = matches!(op, Opcode::Tg4 | Opcode::Tg4Offset)
        || t.offset_value.file != RegFile::Bad
        || instr.offset != 0;
    let base_mrf = GEN6_SAMPLER_MRF - u32::from(header);

    let msg_coords = FsReg::mrf(GEN6_SAMPLER_MRF, RegType::F);
    for i in 0..t.coord_components {
        let d = b.offset(msg_coords, i).retype(t.coordinate.ty);
        let s = b.offset(t.coordinate, i);
        b.mov(d, s);
    }
    let mut msg_end = b.offset(msg_coords, t.coord_components);
    let mut msg_lod = b.offset(msg_coords, 4);

    if t.shadow_c.file != RegFile::Bad {
        b.mov(msg_lod, t.shadow_c);
        msg_lod = b.offset(msg_lod, 1);
        msg_end = msg_lod;
    }

    match op {
        Opcode::Txl | Opcode::Txb => {
            b.mov(msg_lod, t.lod);
            msg_end = b.offset(msg_lod, 1);
        }
        Opcode::Txd => {
            /* dudx, dudy, dvdx, dvdy, drdx, drdy */
            msg_end = msg_lod;
            for i in 0..t.grad_components {
                let (dx, dy) = (b.offset(t.lod, i), b.offset(t.lod2, i));
                b.mov(msg_end, dx);
                msg_end = b.offset(msg_end, 1);
                b.mov(msg_end, dy);
                msg_end = b.offset(msg_end, 1);
            }
        }
        Opcode::Txs => {
            msg_lod = msg_end.retype(RegType::UD);
            b.mov(msg_lod, t.lod);
            msg_end = b.offset(msg_lod, 1);
        }
        Opcode::Txf => {
            msg_lod = b.offset(msg_coords, 3).retype(RegType::UD);
            b.mov(msg_lod, t.lod);
            msg_end = b.offset(msg_lod, 1);
        }
        _ => (),
    }

    let mlen = msg_end.nr - base_mrf;
    check_mlen(mlen, MAX_SAMPLER_MESSAGE_SIZE)?;

    instr.opcode = op;
    instr.srcs = [FsReg::bad(), t.sampler].into_iter().collect();
    instr.base_mrf = Some(base_mrf);
    instr.mlen = mlen as u8;
    instr.header_size = u8::from(header);
    Ok(())
}

/// Typed and untyped surface messages start with a header holding the
/// mask of pixels allowed to write
fn lower_surface(
    prog_data: &WmProgData,
    b: &mut impl VgrfBuilder,
    instr: &mut Instr,
) {
    let op = match instr.opcode {
        Opcode::UntypedSurfaceReadLogical => Opcode::UntypedSurfaceRead,
        Opcode::UntypedSurfaceWriteLogical => Opcode::UntypedSurfaceWrite,
        Opcode::TypedSurfaceReadLogical => Opcode::TypedSurfaceRead,
        Opcode::TypedSurfaceWriteLogical => Opcode::TypedSurfaceWrite,
        op => panic!("{} is not a surface message", op.name()),
    };

    let sample_mask = if matches!(
        op,
        Opcode::UntypedSurfaceRead | Opcode::TypedSurfaceRead
    ) {
        FsReg::imm_ud(0xffff)
    } else if prog_data.uses_kill {
        FsReg::flag(1)
    } else {
        FsReg::grf_scalar(1, 7, RegType::UD)
    };

    let header = {
        let mut ub = b.group_builder(8, 0).with_exec_all();
        let header = FsReg::vgrf(ub.alloc_vgrf(1), RegType::UD);
        ub.mov(header, FsReg::imm_ud(0));
        ub.group_builder(1, 0)
            .mov(header.horiz_offset(7), sample_mask);
        header
    };

    let addr = instr.srcs[SURFACE_LOGICAL_SRC_ADDRESS];
    let data = instr.srcs[SURFACE_LOGICAL_SRC_DATA];
    let addr_sz = instr.components_read(SURFACE_LOGICAL_SRC_ADDRESS);
    let data_sz = instr.components_read(SURFACE_LOGICAL_SRC_DATA);

    let mut sources = vec![header];
    sources.extend((0..addr_sz).map(|i| b.offset(addr, i)));
    sources.extend((0..data_sz).map(|i| b.offset(data, i)));

    let mlen = payload_regs(instr.exec_size, sources.len(), 1);
    let payload = FsReg::vgrf(b.alloc_vgrf(mlen), RegType::UD);
    b.load_payload(payload, &sources, 1);

    let surface = instr.srcs[SURFACE_LOGICAL_SRC_SURFACE];
    let arg = instr.srcs[SURFACE_LOGICAL_SRC_ARG];
    instr.opcode = op;
    instr.srcs = [payload, surface, arg].into_iter().collect();
    instr.mlen = mlen as u8;
    instr.header_size = 1;
}

impl Shader {
    /// Builds the message payloads of the logical send opcodes and turns
    /// them into their hardware form
    pub fn lower_logical_sends(
        &mut self,
        ctx: &CompileContext,
        prog_data: &WmProgData,
    ) -> bool {
        let devinfo = ctx.devinfo;
        let mut progress = false;
        let mut error = None;

        self.map_instrs(|mut instr, alloc| {
            if !instr.opcode.is_logical() {
                return MappedInstrs::One(instr);
            }

            let mut b = FsBuilder::for_instr(alloc, &instr);
            let res = match instr.opcode {
                Opcode::FbWriteLogical => {
                    lower_fb_write(ctx, prog_data, &mut b, &mut instr)
                }
                op if op.is_tex() => {
                    let physical = op.tex_physical().expect("texturing opcode");
                    if devinfo.gen >= 7 {
                        lower_sampler_gen7(devinfo, &mut b, &mut instr, physical)
                    } else {
                        lower_sampler_gen6(&mut b, &mut instr, physical)
                    }
                }
                _ => {
                    lower_surface(prog_data, &mut b, &mut instr);
                    Ok(())
                }
            };
            if let Err(err) = res {
                error.get_or_insert(err);
            }
            progress = true;

            let mut mapped = b.as_mapped_instrs();
            mapped.push(instr);
            mapped
        });

        if let Some(err) = error {
            self.fail_with(err);
        }
        progress
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::WmProgKey;
    use crate::glsl::Program;

    fn context<'a>(
        devinfo: &'a DeviceInfo,
        key: &'a WmProgKey,
    ) -> CompileContext<'a> {
        CompileContext::new(devinfo, key, &Program::new())
    }

    fn fb_write(s: &mut Shader, color: FsReg) {
        let mut srcs = [FsReg::bad(); FB_WRITE_LOGICAL_NUM_SRCS];
        srcs[FB_WRITE_LOGICAL_SRC_COLOR0] = color;
        srcs[FB_WRITE_LOGICAL_SRC_COMPONENTS] = FsReg::imm_ud(4);
        s.emit(Opcode::FbWriteLogical, FsReg::null(RegType::UD), &srcs)
            .eot = true;
    }

    fn tex(s: &mut Shader, op: Opcode, coord: FsReg, comps: u32) -> FsReg {
        let dst = s.vgrf(RegType::F, 4);
        let mut srcs = [FsReg::bad(); TEX_LOGICAL_NUM_SRCS];
        srcs[TEX_LOGICAL_SRC_COORDINATE] = coord;
        srcs[TEX_LOGICAL_SRC_SAMPLER] = FsReg::imm_ud(0);
        srcs[TEX_LOGICAL_SRC_COORD_COMPONENTS] = FsReg::imm_ud(comps);
        srcs[TEX_LOGICAL_SRC_GRAD_COMPONENTS] = FsReg::imm_ud(0);
        if op == Opcode::TxfLogical {
            srcs[TEX_LOGICAL_SRC_LOD] = FsReg::imm_d(0);
        }
        let rlen = 4 * s.dispatch_width / 8;
        s.emit(op, dst, &srcs).rlen = rlen;
        dst
    }

    #[test]
    fn headerless_fb_write_from_grf() {
        let devinfo = DeviceInfo::hsw();
        let key = WmProgKey {
            nr_color_regions: 1,
            ..Default::default()
        };
        let ctx = context(&devinfo, &key);
        let mut s = Shader::new(16);
        let color = s.vgrf(RegType::F, 4);
        fb_write(&mut s, color);

        assert!(s.lower_logical_sends(&ctx, &WmProgData::new()));
        assert_eq!(s.instrs.len(), 2);
        let load = &s.instrs[0];
        assert_eq!(load.opcode, Opcode::LoadPayload);
        assert_eq!(load.srcs.len(), 4);
        assert_eq!(load.srcs[1], color.offset(2));

        let fb = &s.instrs[1];
        assert_eq!(fb.opcode, Opcode::FbWrite);
        assert_eq!(fb.mlen, 8);
        assert_eq!(fb.header_size, 0);
        assert_eq!(fb.srcs[0], load.dst);
        assert!(fb.eot);

        assert!(!s.lower_logical_sends(&ctx, &WmProgData::new()));
        assert_eq!(s.instrs.len(), 2);
    }

    #[test]
    fn gen6_fb_write_with_header_in_mrfs() {
        let devinfo = DeviceInfo::snb();
        let key = WmProgKey {
            nr_color_regions: 2,
            ..Default::default()
        };
        let ctx = context(&devinfo, &key);
        let mut s = Shader::new(8);
        let color = s.vgrf(RegType::F, 4);
        fb_write(&mut s, color);

        assert!(s.lower_logical_sends(&ctx, &WmProgData::new()));
        let load = &s.instrs[0];
        assert_eq!(load.dst, FsReg::mrf(1, RegType::F));
        assert_eq!(load.header_size, 2);
        let fb = &s.instrs[1];
        assert_eq!(fb.base_mrf, Some(1));
        assert_eq!(fb.mlen, 6);
        assert_eq!(fb.header_size, 2);
        assert!(fb.srcs.is_empty());
    }

    #[test]
    fn clamped_colors() {
        let devinfo = DeviceInfo::bdw();
        let key = WmProgKey {
            nr_color_regions: 1,
            clamp_fragment_color: true,
            ..Default::default()
        };
        let ctx = context(&devinfo, &key);
        let mut s = Shader::new(8);
        let color = s.vgrf(RegType::F, 4);
        fb_write(&mut s, color);

        assert!(s.lower_logical_sends(&ctx, &WmProgData::new()));
        assert_eq!(s.instrs.len(), 6);
        assert!(s.instrs[..4].iter().all(|i| i.saturate));
    }

    #[test]
    fn gen7_texel_fetch_interleaves_lod() {
        let devinfo = DeviceInfo::ivb();
        let key = WmProgKey::default();
        let ctx = context(&devinfo, &key);
        let mut s = Shader::new(8);
        let coord = s.vgrf(RegType::D, 2);
        tex(&mut s, Opcode::TxfLogical, coord, 2);

        assert!(s.lower_logical_sends(&ctx, &WmProgData::new()));
        let load = &s.instrs[0];
        assert_eq!(
            &load.srcs[..],
            &[coord, FsReg::imm_d(0), coord.offset(1)]
        );
        let txf = &s.instrs[1];
        assert_eq!(txf.opcode, Opcode::Txf);
        assert_eq!(txf.mlen, 3);
        assert_eq!(txf.header_size, 0);
        assert_eq!(txf.srcs[1], FsReg::imm_ud(0));
    }

    #[test]
    fn gen6_sample_in_mrfs() {
        let devinfo = DeviceInfo::snb();
        let key = WmProgKey::default();
        let ctx = context(&devinfo, &key);
        let mut s = Shader::new(16);
        let coord = s.vgrf(RegType::F, 2);
        tex(&mut s, Opcode::TexLogical, coord, 2);

        assert!(s.lower_logical_sends(&ctx, &WmProgData::new()));
        assert_eq!(s.instrs.len(), 3);
        assert_eq!(s.instrs[0].dst, FsReg::mrf(2, RegType::F));
        assert_eq!(s.instrs[1].dst, FsReg::mrf(4, RegType::F));
        let t = &s.instrs[2];
        assert_eq!(t.opcode, Opcode::Tex);
        assert_eq!(t.base_mrf, Some(2));
        assert_eq!(t.mlen, 4);

        assert!(!s.lower_logical_sends(&ctx, &WmProgData::new()));
        assert_eq!(s.instrs.len(), 3);
    }

    #[test]
    fn texture_offsets_need_header() {
        let devinfo = DeviceInfo::snb();
        let key = WmProgKey::default();
        let ctx = context(&devinfo, &key);
        let mut s = Shader::new(8);
        let coord = s.vgrf(RegType::F, 2);
        tex(&mut s, Opcode::TexLogical, coord, 2);
        s.instrs[0].offset = 0x110;

        assert!(s.lower_logical_sends(&ctx, &WmProgData::new()));
        let t = s.instrs.last().unwrap();
        assert_eq!(t.base_mrf, Some(1));
        assert_eq!(t.header_size, 1);
        assert_eq!(t.mlen, 3);
    }

    #[test]
    fn surface_write_header() {
        let devinfo = DeviceInfo::hsw();
        let key = WmProgKey::default();
        let ctx = context(&devinfo, &key);
        let mut s = Shader::new(8);
        let addr = s.vgrf(RegType::UD, 1);
        let data = s.vgrf(RegType::UD, 2);
        let mut srcs = [FsReg::bad(); SURFACE_LOGICAL_NUM_SRCS];
        srcs[SURFACE_LOGICAL_SRC_ADDRESS] = addr;
        srcs[SURFACE_LOGICAL_SRC_DATA] = data;
        srcs[SURFACE_LOGICAL_SRC_SURFACE] = FsReg::imm_ud(3);
        srcs[SURFACE_LOGICAL_SRC_DIMS] = FsReg::imm_ud(1);
        srcs[SURFACE_LOGICAL_SRC_ARG] = FsReg::imm_ud(2);
        s.emit(Opcode::UntypedSurfaceWriteLogical, FsReg::null(RegType::UD), &srcs);

        let mut prog_data = WmProgData::new();
        prog_data.uses_kill = true;
        assert!(s.lower_logical_sends(&ctx, &prog_data));

        let mask = &s.instrs[1];
        assert_eq!(mask.exec_size, 1);
        assert_eq!(mask.srcs[0], FsReg::flag(1));
        let send = s.instrs.last().unwrap();
        assert_eq!(send.opcode, Opcode::UntypedSurfaceWrite);
        assert_eq!(send.mlen, 4);
        assert_eq!(&send.srcs[1..], &[FsReg::imm_ud(3), FsReg::imm_ud(2)]);
    }

    #[test]
    fn long_messages_fail() {
        let devinfo = DeviceInfo::ivb();
        let key = WmProgKey::default();
        let ctx = context(&devinfo, &key);
        let mut s = Shader::new(16);
        let coord = s.vgrf(RegType::F, 3);
        let dx = s.vgrf(RegType::F, 3);
        let dy = s.vgrf(RegType::F, 3);
        tex(&mut s, Opcode::TxdLogical, coord, 3);
        let txd = &mut s.instrs[0];
        txd.srcs[TEX_LOGICAL_SRC_LOD] = dx;
        txd.srcs[TEX_LOGICAL_SRC_LOD2] = dy;
        txd.srcs[TEX_LOGICAL_SRC_GRAD_COMPONENTS] = FsReg::imm_ud(3);

        s.lower_logical_sends(&ctx, &WmProgData::new());
        assert_eq!(
            s.error,
            Some(CompileError::MessageTooLong { mlen: 18, max: 11 })
        );
    }
}
