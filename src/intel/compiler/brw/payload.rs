/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

use crate::api::{DeviceInfo, WmProgData, WmProgKey};
use crate::glsl::*;
use crate::ir::*;

pub const BRW_WM_PERSPECTIVE_PIXEL_BARYCENTRIC: usize = 0;
pub const BRW_WM_PERSPECTIVE_CENTROID_BARYCENTRIC: usize = 1;
pub const BRW_WM_PERSPECTIVE_SAMPLE_BARYCENTRIC: usize = 2;
pub const BRW_WM_NONPERSPECTIVE_PIXEL_BARYCENTRIC: usize = 3;
pub const BRW_WM_NONPERSPECTIVE_CENTROID_BARYCENTRIC: usize = 4;
pub const BRW_WM_NONPERSPECTIVE_SAMPLE_BARYCENTRIC: usize = 5;
pub const BRW_WM_BARYCENTRIC_INTERP_MODE_COUNT: usize = 6;

/// Varying slots which go through the setup stage.  The position and the
/// facing bit come from the thread payload instead.
pub const BRW_FS_VARYING_INPUT_MASK: u64 =
    !((1_u64 << VARYING_SLOT_POS) | (1_u64 << VARYING_SLOT_FACE))
        & ((1_u64 << VARYING_SLOT_MAX) - 1);

/// Where the fixed-function hardware puts things in the initial GRFs
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ThreadPayload {
    pub num_regs: u32,
    pub barycentric_coord_reg: [u32; BRW_WM_BARYCENTRIC_INTERP_MODE_COUNT],
    pub source_depth_reg: u32,
    pub source_w_reg: u32,
}

impl ThreadPayload {
    /// Lays out the Gen6+ pixel shader payload
    ///
    /// g0-g1 hold the masks and pixel coordinates, followed by one set of
    /// barycentric coordinates per enabled mode (two registers per eight
    /// channels), then source depth and W when the position is read.
    pub fn setup_gen6(
        dispatch_width: u8,
        barycentric_interp_modes: u32,
        uses_depth: bool,
    ) -> ThreadPayload {
        let regs_per_value = u32::from(dispatch_width) / 8;
        let mut payload = ThreadPayload {
            num_regs: 2,
            ..Default::default()
        };

        for i in 0..BRW_WM_BARYCENTRIC_INTERP_MODE_COUNT {
            if barycentric_interp_modes & (1 << i) != 0 {
                payload.barycentric_coord_reg[i] = payload.num_regs;
                payload.num_regs += 2 * regs_per_value;
            }
        }

        if uses_depth {
            payload.source_depth_reg = payload.num_regs;
            payload.num_regs += regs_per_value;
            payload.source_w_reg = payload.num_regs;
            payload.num_regs += regs_per_value;
        }

        payload
    }
}

/// Returns the interpolation an input actually gets, or `None` if it is
/// constant across the primitive
pub fn effective_interpolation(
    key: &WmProgKey,
    var: &Variable,
) -> Option<InterpQualifier> {
    let is_color = var.location == VARYING_SLOT_COL0
        || var.location == VARYING_SLOT_COL1;
    match var.interpolation {
        InterpQualifier::Flat => None,
        InterpQualifier::Default if is_color && key.flat_shade => None,
        InterpQualifier::Default => Some(InterpQualifier::Smooth),
        i => Some(i),
    }
}

/// Computes which barycentric coordinate sets the program needs
pub fn compute_barycentric_interp_modes(
    devinfo: &DeviceInfo,
    key: &WmProgKey,
    prog: &Program,
) -> u32 {
    let mut modes = 0_u32;
    for var in &prog.vars {
        if var.mode != VarMode::ShaderIn
            || var.location == VARYING_SLOT_POS
            || var.location == VARYING_SLOT_FACE
        {
            continue;
        }

        let (pixel, centroid) = match effective_interpolation(key, var) {
            None => continue,
            Some(InterpQualifier::NoPerspective) => (
                BRW_WM_NONPERSPECTIVE_PIXEL_BARYCENTRIC,
                BRW_WM_NONPERSPECTIVE_CENTROID_BARYCENTRIC,
            ),
            Some(_) => (
                BRW_WM_PERSPECTIVE_PIXEL_BARYCENTRIC,
                BRW_WM_PERSPECTIVE_CENTROID_BARYCENTRIC,
            ),
        };

        if var.centroid {
            modes |= 1 << centroid;
            if devinfo.needs_unlit_centroid_workaround {
                modes |= 1 << pixel;
            }
        } else {
            modes |= 1 << pixel;
        }
    }
    modes
}

/// Slot layout of the previous stage's output, for Gen6+
///
/// Slot 0 is the header holding the point size, layer and viewport, slot 1
/// the position, then the clip distances and colors in a fixed order so the
/// front and back colors stay adjacent.  Everything else follows in slot
/// order.
fn compute_vue_map(slots_valid: u64) -> Vec<u32> {
    let header_slots = (1_u64 << VARYING_SLOT_PSIZ)
        | (1_u64 << VARYING_SLOT_LAYER)
        | (1_u64 << VARYING_SLOT_VIEWPORT);
    let slots_valid = slots_valid & !header_slots;

    let mut slot_to_varying = vec![VARYING_SLOT_PSIZ, VARYING_SLOT_POS];
    for varying in [
        VARYING_SLOT_CLIP_DIST0,
        VARYING_SLOT_CLIP_DIST1,
        VARYING_SLOT_COL0,
        VARYING_SLOT_BFC0,
        VARYING_SLOT_COL1,
        VARYING_SLOT_BFC1,
    ] {
        if slots_valid & (1 << varying) != 0 {
            slot_to_varying.push(varying);
        }
    }
    for varying in 0..(VARYING_SLOT_MAX as u32) {
        if slots_valid & (1 << varying) != 0
            && !slot_to_varying.contains(&varying)
        {
            slot_to_varying.push(varying);
        }
    }
    slot_to_varying
}

/// Decides which URB setup slot each varying input lands in
pub fn calculate_urb_setup(
    key: &WmProgKey,
    prog: &Program,
    prog_data: &mut WmProgData,
) {
    let inputs = prog.inputs_read() & BRW_FS_VARYING_INPUT_MASK;
    prog_data.urb_setup = vec![None; VARYING_SLOT_MAX];

    if inputs.count_ones() <= 16 {
        /* The setup stage can rearrange up to 16 inputs, so just pack the
         * ones we read in slot order.
         */
        let mut urb_next = 0;
        for i in 0..VARYING_SLOT_MAX {
            if inputs & (1 << i) != 0 {
                prog_data.urb_setup[i] = Some(urb_next);
                urb_next += 1;
            }
        }
        prog_data.num_varying_inputs = urb_next;
    } else {
        /* Too many to rearrange: match the previous stage's layout, skipping
         * the header and position.
         */
        let vue_map = compute_vue_map(key.input_slots_valid);
        let first_slot = 2;
        for (slot, varying) in vue_map.iter().enumerate().skip(first_slot) {
            if inputs & (1 << varying) != 0 {
                prog_data.urb_setup[*varying as usize] =
                    Some((slot - first_slot) as u32);
            }
        }
        prog_data.num_varying_inputs =
            vue_map.len().saturating_sub(first_slot) as u32;
    }
}

impl Shader {
    /// Maps uniforms onto the push constant registers which follow the
    /// thread payload
    pub fn assign_curb_setup(&mut self, prog_data: &mut WmProgData) {
        if self.dispatch_width == 8 {
            prog_data.dispatch_grf_start_reg = self.payload.num_regs;
        } else {
            prog_data.dispatch_grf_start_reg_16 = self.payload.num_regs;
        }

        prog_data.curb_read_length = prog_data.nr_params.div_ceil(8);

        let num_regs = self.payload.num_regs;
        let uniforms = self.uniforms;
        let push_constant_loc = &self.push_constant_loc;
        for instr in &mut self.instrs {
            for src in instr.srcs.iter_mut() {
                if src.file != RegFile::Uniform {
                    continue;
                }

                let uniform_nr = src.nr + src.reg_offset;
                /* Out-of-bounds reads return undefined values, so we just
                 * return the first push constant.
                 */
                let constant_nr = if uniform_nr < uniforms {
                    push_constant_loc
                        .get(uniform_nr as usize)
                        .copied()
                        .flatten()
                        .unwrap_or(0)
                } else {
                    0
                };

                assert!(src.stride == 0);
                let mut reg = FsReg::grf_scalar(
                    num_regs + constant_nr / 8,
                    constant_nr % 8,
                    src.ty,
                );
                reg.subreg_offset += src.subreg_offset;
                reg.negate = src.negate;
                reg.abs = src.abs;
                *src = reg;
            }
        }
    }

    /// Rewrites interpolation setup references into the GRFs which follow
    /// the push constants
    pub fn assign_urb_setup(&mut self, prog_data: &WmProgData) {
        let urb_start = self.payload.num_regs + prog_data.curb_read_length;

        self.for_each_reg_mut(|reg| {
            if reg.file != RegFile::Attr {
                return;
            }

            /* Each attribute is four setup channels of half a register */
            let chan = reg.reg_offset;
            let mut hw = FsReg::grf_scalar(
                urb_start + reg.nr * 2 + chan / 2,
                (chan & 1) * 4,
                reg.ty,
            );
            hw.subreg_offset += reg.subreg_offset;
            hw.negate = reg.negate;
            hw.abs = reg.abs;
            *reg = hw;
        });

        self.first_non_payload_grf =
            urb_start + prog_data.num_varying_inputs * 2;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_layout() {
        let modes = (1 << BRW_WM_PERSPECTIVE_PIXEL_BARYCENTRIC)
            | (1 << BRW_WM_NONPERSPECTIVE_CENTROID_BARYCENTRIC);

        let p = ThreadPayload::setup_gen6(8, modes, true);
        assert_eq!(p.barycentric_coord_reg[0], 2);
        assert_eq!(p.barycentric_coord_reg[4], 4);
        assert_eq!(p.source_depth_reg, 6);
        assert_eq!(p.source_w_reg, 7);
        assert_eq!(p.num_regs, 8);

        let p = ThreadPayload::setup_gen6(16, modes, false);
        assert_eq!(p.barycentric_coord_reg[4], 6);
        assert_eq!(p.num_regs, 10);
    }

    fn color_prog(centroid: bool) -> Program {
        let mut prog = Program::new();
        let mut col = Variable::input(
            "col",
            Type::vec(BaseType::Float, 4),
            VARYING_SLOT_COL0,
        );
        col.centroid = centroid;
        prog.add_var(col);
        prog.add_var(
            Variable::input(
                "n",
                Type::vec(BaseType::Float, 3),
                VARYING_SLOT_VAR0,
            )
            .with_interpolation(InterpQualifier::NoPerspective),
        );
        prog
    }

    #[test]
    fn barycentric_modes() {
        let key = WmProgKey::default();
        let prog = color_prog(false);
        assert_eq!(
            compute_barycentric_interp_modes(&DeviceInfo::hsw(), &key, &prog),
            (1 << BRW_WM_PERSPECTIVE_PIXEL_BARYCENTRIC)
                | (1 << BRW_WM_NONPERSPECTIVE_PIXEL_BARYCENTRIC)
        );

        let flat = WmProgKey {
            flat_shade: true,
            ..Default::default()
        };
        assert_eq!(
            compute_barycentric_interp_modes(&DeviceInfo::hsw(), &flat, &prog),
            1 << BRW_WM_NONPERSPECTIVE_PIXEL_BARYCENTRIC
        );

        let prog = color_prog(true);
        let modes = compute_barycentric_interp_modes(&DeviceInfo::ivb(), &key, &prog);
        assert!(modes & (1 << BRW_WM_PERSPECTIVE_CENTROID_BARYCENTRIC) != 0);
        assert!(modes & (1 << BRW_WM_PERSPECTIVE_PIXEL_BARYCENTRIC) != 0);
        let modes = compute_barycentric_interp_modes(&DeviceInfo::hsw(), &key, &prog);
        assert!(modes & (1 << BRW_WM_PERSPECTIVE_PIXEL_BARYCENTRIC) == 0);
    }

    #[test]
    fn urb_setup_packs_inputs() {
        let mut prog = color_prog(false);
        prog.add_var(Variable::input(
            "pos",
            Type::vec(BaseType::Float, 4),
            VARYING_SLOT_POS,
        ));
        let mut prog_data = WmProgData::new();
        calculate_urb_setup(&WmProgKey::default(), &prog, &mut prog_data);
        assert_eq!(prog_data.urb_setup[VARYING_SLOT_POS as usize], None);
        assert_eq!(prog_data.urb_setup[VARYING_SLOT_COL0 as usize], Some(0));
        assert_eq!(prog_data.urb_setup[VARYING_SLOT_VAR0 as usize], Some(1));
        assert_eq!(prog_data.num_varying_inputs, 2);
    }

    #[test]
    fn urb_setup_follows_vue_map() {
        let mut prog = Program::new();
        let mut valid = (1 << VARYING_SLOT_POS) | (1 << VARYING_SLOT_PSIZ);
        for i in 0..17 {
            prog.add_var(Variable::input(
                "v",
                Type::vec(BaseType::Float, 4),
                VARYING_SLOT_VAR0 + i,
            ));
            valid |= 1 << (VARYING_SLOT_VAR0 + i);
        }
        valid |= 1 << VARYING_SLOT_COL0;
        valid |= 1 << VARYING_SLOT_CLIP_DIST0;

        let key = WmProgKey {
            input_slots_valid: valid,
            ..Default::default()
        };
        let mut prog_data = WmProgData::new();
        calculate_urb_setup(&key, &prog, &mut prog_data);

        /* CLIP_DIST0 and COL0 are written but not read */
        assert_eq!(prog_data.urb_setup[VARYING_SLOT_VAR0 as usize], Some(2));
        assert_eq!(prog_data.urb_setup[VARYING_SLOT_COL0 as usize], None);
        assert_eq!(prog_data.num_varying_inputs, 19);
    }

    #[test]
    fn curb_and_urb_assignment() {
        let mut s = Shader::new(8);
        s.payload = ThreadPayload::setup_gen6(8, 1, false);
        s.uniforms = 10;
        s.push_constant_loc = (0..10).map(Some).collect();
        let dst = s.vgrf(RegType::F, 1);
        s.instrs.push(Instr::new_boxed(
            Opcode::Add,
            8,
            dst,
            &[FsReg::uniform(9, RegType::F), FsReg::uniform(100, RegType::F)],
        ));
        s.instrs.push(Instr::new_boxed(
            Opcode::Linterp,
            8,
            dst,
            &[FsReg::grf(2, RegType::F), FsReg::attr(1, 3, RegType::F)],
        ));

        let mut prog_data = WmProgData::new();
        prog_data.nr_params = 10;
        prog_data.num_varying_inputs = 2;
        s.assign_curb_setup(&mut prog_data);
        assert_eq!(prog_data.dispatch_grf_start_reg, 4);
        assert_eq!(prog_data.curb_read_length, 2);
        assert_eq!(s.instrs[0].srcs[0], FsReg::grf_scalar(5, 1, RegType::F));
        assert_eq!(s.instrs[0].srcs[1], FsReg::grf_scalar(4, 0, RegType::F));

        s.assign_urb_setup(&prog_data);
        /* urb_start = 4 + 2, slot 1 channel 3 is the second half of g9 */
        assert_eq!(s.instrs[1].srcs[1], FsReg::grf_scalar(9, 4, RegType::F));
        assert_eq!(s.first_non_payload_grf, 10);
    }
}
