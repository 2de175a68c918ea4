/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

use crate::api::{CompareFunc, CompileContext, WmProgData, MAX_SAMPLERS};
use crate::api::{SWIZZLE_ONE, SWIZZLE_ZERO};
use crate::glsl::*;
use crate::ir::*;
use crate::payload::*;

use log::trace;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

/// Maximum number of color render targets
const MAX_DRAW_BUFFERS: usize = 8;

fn reg_type_for(ty: &Type) -> RegType {
    match ty {
        Type::Numeric { base, .. } => match base {
            BaseType::Float => RegType::F,
            BaseType::Int | BaseType::Bool => RegType::D,
            BaseType::Uint => RegType::UD,
        },
        Type::Array(elem, _) => reg_type_for(elem),
        Type::Sampler { .. } | Type::Image { .. } => RegType::UD,
        Type::Struct(_) | Type::Void => RegType::F,
    }
}

fn cond_for_comparison(op: ExprOp) -> Option<CondMod> {
    match op {
        ExprOp::Less => Some(CondMod::L),
        ExprOp::Greater => Some(CondMod::G),
        ExprOp::Lequal => Some(CondMod::LE),
        ExprOp::Gequal => Some(CondMod::GE),
        ExprOp::Equal => Some(CondMod::Z),
        ExprOp::Nequal => Some(CondMod::NZ),
        _ => None,
    }
}

fn cond_for_alpha_func(func: CompareFunc) -> CondMod {
    match func {
        CompareFunc::Greater => CondMod::G,
        CompareFunc::GEqual => CondMod::GE,
        CompareFunc::Less => CondMod::L,
        CompareFunc::LEqual => CondMod::LE,
        CompareFunc::Equal => CondMod::Z,
        CompareFunc::NotEqual => CondMod::NZ,
        CompareFunc::Never | CompareFunc::Always => {
            panic!("Alpha test {:?} has no condition", func)
        }
    }
}

/// Packs constant texel offsets into the sampler message header layout:
/// U in bits 11:8, V in 7:4 and R in 3:0.
fn texture_offset(offsets: &[u32]) -> u32 {
    let mut bits = 0;
    for (i, o) in offsets.iter().take(3).enumerate() {
        let shift = 4 * (2 - i as u32);
        bits |= (o << shift) & (0xf << shift);
    }
    bits
}

fn const_index(idx: &Rvalue) -> Option<u32> {
    idx.as_constant().map(|c| c.bits[0])
}

/// Whether the program can kill pixels, either by discarding or through
/// the alpha test
pub fn uses_kill(ctx: &CompileContext, prog: &Program) -> bool {
    let alpha_test = matches!(
        ctx.key.alpha_test_func,
        Some(f) if f != CompareFunc::Always
    );
    prog.uses_discard() || alpha_test
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Nesting {
    If,
    Loop,
}

struct ShaderFromGlsl<'a> {
    ctx: &'a CompileContext<'a>,
    prog: &'a Program,
    prog_data: &'a mut WmProgData,
    s: &'a mut Shader,

    var_regs: FxHashMap<VarId, FsReg>,
    outputs: [FsReg; MAX_DRAW_BUFFERS],
    output_components: [u32; MAX_DRAW_BUFFERS],
    dual_src_output: FsReg,
    frag_depth: FsReg,

    pixel_x: FsReg,
    pixel_y: FsReg,
    wpos_w: FsReg,
    delta_xy: [FsReg; BRW_WM_BARYCENTRIC_INTERP_MODE_COUNT],

    /// Register holding the value of the last visited expression
    result: FsReg,
    nesting: Vec<Nesting>,
    returned: bool,
}

impl<'a> ShaderFromGlsl<'a> {
    fn new(
        ctx: &'a CompileContext<'a>,
        prog: &'a Program,
        prog_data: &'a mut WmProgData,
        s: &'a mut Shader,
    ) -> Self {
        Self {
            ctx: ctx,
            prog: prog,
            prog_data: prog_data,
            s: s,
            var_regs: FxHashMap::default(),
            outputs: [FsReg::bad(); MAX_DRAW_BUFFERS],
            output_components: [0; MAX_DRAW_BUFFERS],
            dual_src_output: FsReg::bad(),
            frag_depth: FsReg::bad(),
            pixel_x: FsReg::bad(),
            pixel_y: FsReg::bad(),
            wpos_w: FsReg::bad(),
            delta_xy: [FsReg::bad(); BRW_WM_BARYCENTRIC_INTERP_MODE_COUNT],
            result: FsReg::bad(),
            nesting: Vec::new(),
            returned: false,
        }
    }

    fn gen(&self) -> u32 {
        self.ctx.devinfo.gen
    }

    fn width(&self) -> u8 {
        self.s.dispatch_width
    }

    /// Registers per component of a full-width value
    fn comp_regs(&self) -> u32 {
        u32::from(self.width()) / 8
    }

    fn comp(&self, reg: FsReg, n: u32) -> FsReg {
        self.s.offset(reg, n)
    }

    fn setup_uniforms(&mut self) {
        let mut uniforms = 0;
        for var in &self.prog.vars {
            if var.mode == VarMode::Uniform && var.ty.sampler_dim().is_none() {
                uniforms =
                    std::cmp::max(uniforms, var.location + var.ty.type_size());
            }
        }
        self.s.uniforms = uniforms;
        self.s.param = (0..uniforms).collect();
    }

    fn setup_outputs(&mut self) {
        let nr_color_regions =
            std::cmp::max(self.ctx.key.nr_color_regions, 1) as usize;

        for (id, var) in self.prog.vars.iter().enumerate() {
            if var.mode != VarMode::ShaderOut {
                continue;
            }

            let size = std::cmp::max(var.ty.type_size(), 1);
            let reg = self.s.vgrf(reg_type_for(&var.ty), size);
            self.var_regs.insert(id, reg);

            match var.location {
                FRAG_RESULT_DEPTH => self.frag_depth = reg,
                FRAG_RESULT_COLOR => {
                    for i in 0..std::cmp::min(nr_color_regions, MAX_DRAW_BUFFERS)
                    {
                        self.outputs[i] = reg;
                        self.output_components[i] = 4;
                    }
                }
                FRAG_RESULT_STENCIL | FRAG_RESULT_SAMPLE_MASK => {
                    self.s.fail(format!("unsupported output {}", var.name));
                }
                loc => {
                    let (elems, elem_ty) = match &var.ty {
                        Type::Array(elem, len) => (*len, elem.as_ref()),
                        ty => (1, ty),
                    };
                    let vec_size = elem_ty.vector_elements();

                    if var.index == 1 {
                        self.dual_src_output = reg;
                        continue;
                    }

                    let first = (loc - FRAG_RESULT_DATA0) as usize;
                    for i in 0..(elems as usize) {
                        if first + i >= MAX_DRAW_BUFFERS {
                            self.s.fail("too many render targets");
                            break;
                        }
                        self.outputs[first + i] =
                            self.comp(reg, (i as u32) * vec_size);
                        self.output_components[first + i] = vec_size;
                    }
                }
            }
        }
    }

    fn emit_interpolation_setup(&mut self) {
        let pixel_x_uw = self.s.vgrf(RegType::UW, 1);
        let pixel_y_uw = self.s.vgrf(RegType::UW, 1);
        self.s.emit(Opcode::PixelX, pixel_x_uw, &[]);
        self.s.emit(Opcode::PixelY, pixel_y_uw, &[]);

        self.pixel_x = self.s.vgrf(RegType::F, 1);
        self.pixel_y = self.s.vgrf(RegType::F, 1);
        self.s.mov(self.pixel_x, pixel_x_uw);
        self.s.mov(self.pixel_y, pixel_y_uw);

        if self.prog_data.uses_src_w {
            let pixel_w = FsReg::grf(self.s.payload.source_w_reg, RegType::F);
            self.wpos_w = self.s.vgrf(RegType::F, 1);
            self.emit_math(Opcode::Rcp, self.wpos_w, &[pixel_w]);
        }

        for i in 0..BRW_WM_BARYCENTRIC_INTERP_MODE_COUNT {
            self.delta_xy[i] = FsReg::grf(
                self.s.payload.barycentric_coord_reg[i],
                RegType::F,
            );
        }
    }

    fn emit_fragcoord_interpolation(&mut self, var: &Variable) -> FsReg {
        let key = self.ctx.key;
        let wpos = self.s.vgrf(RegType::F, 4);

        /* gl_FragCoord.x */
        if var.pixel_center_integer {
            self.s.mov(wpos, self.pixel_x);
        } else {
            self.s.add(wpos, self.pixel_x, FsReg::imm_f(0.5));
        }

        /* gl_FragCoord.y */
        let y = self.comp(wpos, 1);
        let flip = !var.origin_upper_left ^ key.render_to_fbo;
        if !flip && var.pixel_center_integer {
            self.s.mov(y, self.pixel_y);
        } else {
            let mut pixel_y = self.pixel_y;
            let mut offset = if var.pixel_center_integer { 0.0 } else { 0.5 };
            if flip {
                pixel_y = pixel_y.fneg();
                offset += key.drawable_height as f32 - 1.0;
            }
            self.s.add(y, pixel_y, FsReg::imm_f(offset));
        }

        /* gl_FragCoord.z */
        let z = self.comp(wpos, 2);
        let depth = FsReg::grf(self.s.payload.source_depth_reg, RegType::F);
        self.s.mov(z, depth);

        /* gl_FragCoord.w */
        let w = self.comp(wpos, 3);
        self.s.mov(w, self.wpos_w);

        wpos
    }

    fn emit_frontfacing_interpolation(&mut self) -> FsReg {
        let reg = self.s.vgrf(RegType::D, 1);

        /* Bit 15 of g0.0 is clear for front facing polygons.  Negating the
         * word and sign extending it through the shift yields ~0 for front
         * facing, which we then reduce to a 0/1 boolean.
         */
        let g0 = FsReg::grf_scalar(0, 0, RegType::W).fneg();
        self.s.asr(reg, g0, FsReg::imm_d(15));
        self.s.and(reg, reg, FsReg::imm_d(1));
        reg
    }

    fn emit_general_interpolation(&mut self, var: &Variable) -> FsReg {
        let ty = reg_type_for(&var.ty);
        let size = std::cmp::max(var.ty.type_size(), 1);
        let reg = self.s.vgrf(ty, size);

        let (elems, elem_ty) = match &var.ty {
            Type::Array(elem, len) => (*len, elem.as_ref().clone()),
            t => (1, t.clone()),
        };
        if !matches!(elem_ty, Type::Numeric { .. }) {
            self.s.fail(format!("unsupported input type for {}", var.name));
            return reg;
        }

        let mut interp = effective_interpolation(self.ctx.key, var);
        if !elem_ty.is_float() {
            interp = None;
        }

        let mut attr = reg;
        let mut location = var.location as usize;
        for _ in 0..elems {
            for _ in 0..elem_ty.matrix_columns() {
                let comps = elem_ty.vector_elements();
                let Some(slot) = self.prog_data.urb_setup[location] else {
                    /* Not written by the previous stage */
                    attr = self.comp(attr, comps);
                    location += 1;
                    continue;
                };

                for k in 0..comps {
                    let dst = self.comp(attr, k);
                    match interp {
                        None => {
                            /* Constant interpolation reads the vertex value
                             * stored in the fourth setup channel.
                             */
                            let mut src = FsReg::attr(slot, k, ty);
                            src.subreg_offset = 12;
                            self.s.emit(Opcode::Cinterp, dst, &[src]);
                        }
                        Some(mode) => {
                            self.emit_linterp(dst, slot, k, mode, var.centroid);
                        }
                    }
                }
                attr = self.comp(attr, comps);
                location += 1;
            }
        }
        reg
    }

    fn emit_linterp(
        &mut self,
        dst: FsReg,
        slot: u32,
        chan: u32,
        mode: InterpQualifier,
        centroid: bool,
    ) {
        let (pixel, centroid_mode) = if mode == InterpQualifier::NoPerspective
        {
            (
                BRW_WM_NONPERSPECTIVE_PIXEL_BARYCENTRIC,
                BRW_WM_NONPERSPECTIVE_CENTROID_BARYCENTRIC,
            )
        } else {
            (
                BRW_WM_PERSPECTIVE_PIXEL_BARYCENTRIC,
                BRW_WM_PERSPECTIVE_CENTROID_BARYCENTRIC,
            )
        };
        let src = FsReg::attr(slot, chan, RegType::F);

        if centroid && self.ctx.devinfo.needs_unlit_centroid_workaround {
            /* Channels which are not lit use the pixel barycentrics since
             * their centroid ones are garbage.
             */
            self.s.emit(Opcode::MovDispatchToFlags, FsReg::null(RegType::UD), &[]);

            let i = self.s.emit(
                Opcode::Linterp,
                dst,
                &[self.delta_xy[pixel], src],
            );
            i.predicate = Predicate::Normal;
            i.predicate_inverse = true;

            let i = self.s.emit(
                Opcode::Linterp,
                dst,
                &[self.delta_xy[centroid_mode], src],
            );
            i.predicate = Predicate::Normal;
        } else {
            let mode = if centroid { centroid_mode } else { pixel };
            self.s.emit(Opcode::Linterp, dst, &[self.delta_xy[mode], src]);
        }
    }

    fn emit_inputs(&mut self) {
        let prog = self.prog;
        for (id, var) in prog.vars.iter().enumerate() {
            if var.mode != VarMode::ShaderIn {
                continue;
            }
            let reg = match var.location {
                VARYING_SLOT_POS => self.emit_fragcoord_interpolation(var),
                VARYING_SLOT_FACE => self.emit_frontfacing_interpolation(),
                _ => self.emit_general_interpolation(var),
            };
            self.var_regs.insert(id, reg);
        }
    }

    fn var_reg(&mut self, id: VarId) -> Option<FsReg> {
        if let Some(reg) = self.var_regs.get(&id) {
            return Some(*reg);
        }

        let var = self.prog.var(id);
        let reg = match var.mode {
            VarMode::Uniform => {
                if var.ty.sampler_dim().is_some() {
                    self.s.fail(format!(
                        "{} cannot be used as a value",
                        var.name
                    ));
                    return None;
                }
                FsReg::uniform(var.location, reg_type_for(&var.ty))
            }
            VarMode::Temporary => {
                let size = std::cmp::max(var.ty.type_size(), 1);
                self.s.vgrf(reg_type_for(&var.ty), size)
            }
            VarMode::ShaderIn | VarMode::ShaderOut => {
                panic!("Shader I/O {} has no storage", var.name)
            }
        };
        self.var_regs.insert(id, reg);
        Some(reg)
    }

    /// Returns the storage of a dereference, typed for its value
    fn deref_reg(&mut self, d: &Deref) -> Option<FsReg> {
        let reg = match d {
            Deref::Var(id) => self.var_reg(*id)?,
            Deref::Array(base, idx) => {
                let reg = self.deref_reg(base)?;
                let elem_size = match base.ty(self.prog) {
                    Type::Array(elem, _) => elem.type_size(),
                    _ => {
                        self.s.fail("indexing a non-array value");
                        return None;
                    }
                };
                let Some(i) = const_index(idx) else {
                    self.s.fail("variable indexing unsupported");
                    return None;
                };
                self.comp(reg, i * elem_size)
            }
            Deref::Record(base, field) => {
                let reg = self.deref_reg(base)?;
                let offset = base.ty(self.prog).field_offset(*field);
                self.comp(reg, offset)
            }
        };
        Some(reg.retype(reg_type_for(d.ty(self.prog))))
    }

    /// Binding table relative index of a sampler or image dereference
    fn resource_index(&mut self, d: &Deref) -> Option<u32> {
        match d {
            Deref::Var(id) => Some(self.prog.var(*id).location),
            Deref::Array(base, idx) => {
                let base = self.resource_index(base)?;
                match const_index(idx) {
                    Some(i) => Some(base + i),
                    None => {
                        self.s.fail("variable indexing unsupported");
                        None
                    }
                }
            }
            Deref::Record(_, _) => {
                self.s.fail("opaque types in structures unsupported");
                None
            }
        }
    }

    fn eval(&mut self, rv: &Rvalue) -> FsReg {
        self.visit_rvalue(rv);
        self.result
    }

    /// Evaluates `rv`, returning its register and component count
    fn eval_sized(&mut self, rv: &Rvalue) -> (FsReg, u32) {
        let reg = self.eval(rv);
        (reg, rv.ty(self.prog).components())
    }

    fn visit_rvalue(&mut self, rv: &Rvalue) {
        self.result = FsReg::bad();
        if self.s.failed() {
            return;
        }

        match rv {
            Rvalue::Deref(d) => {
                if let Some(reg) = self.deref_reg(d) {
                    self.result = reg;
                }
            }
            Rvalue::Constant(c) => self.visit_constant(c),
            Rvalue::Expression { op, ty, operands } => {
                self.visit_expression(*op, ty, operands)
            }
            Rvalue::Swizzle { val, comps, len } => {
                let src = self.eval(val);
                if src.file == RegFile::Bad {
                    return;
                }
                if *len == 1 {
                    self.result = self.comp(src, u32::from(comps[0]));
                    return;
                }
                let dst = self.s.vgrf(src.ty, u32::from(*len));
                for i in 0..usize::from(*len) {
                    let d = self.comp(dst, i as u32);
                    let s = self.comp(src, u32::from(comps[i]));
                    self.s.mov(d, s);
                }
                self.result = dst;
            }
            Rvalue::Texture(t) => self.visit_texture(t),
            Rvalue::ImageLoad { image, coord, ty } => {
                self.visit_image_load(image, coord, ty)
            }
            Rvalue::BufferLoad { block, offset, ty } => {
                self.visit_buffer_load(*block, offset, ty)
            }
            Rvalue::Call { .. } => self.s.fail("unsupported function call"),
        }
    }

    fn visit_constant(&mut self, c: &Constant) {
        let ty = reg_type_for(&c.ty);
        let dst = self.s.vgrf(ty, std::cmp::max(c.bits.len() as u32, 1));
        for (i, bits) in c.bits.iter().enumerate() {
            let imm = match ty {
                RegType::F => FsReg::imm_f(f32::from_bits(*bits)),
                RegType::D => FsReg::imm_d(*bits as i32),
                _ => FsReg::imm_ud(*bits),
            };
            let d = self.comp(dst, i as u32);
            self.s.mov(d, imm);
        }
        self.result = dst;
    }

    fn fix_math_operand(&mut self, src: FsReg) -> FsReg {
        /* Gen6 math can't take scalar regions or source modifiers and Gen7
         * math can't take immediates.
         */
        let needs_copy = match self.gen() {
            6 => {
                src.file == RegFile::Uniform
                    || src.file == RegFile::Imm
                    || src.stride == 0
                    || src.abs
                    || src.negate
            }
            7 => src.file == RegFile::Imm,
            _ => false,
        };
        if !needs_copy {
            return src;
        }
        let tmp = self.s.vgrf(src.ty, 1);
        self.s.mov(tmp, src);
        tmp
    }

    fn emit_math(&mut self, op: Opcode, dst: FsReg, srcs: &[FsReg]) {
        assert!(op.is_math());
        let srcs: SmallVec<[FsReg; 2]> =
            srcs.iter().map(|s| self.fix_math_operand(*s)).collect();
        self.s.emit(op, dst, &srcs);
    }

    /// Tries to fuse `a * b + c` into a MAD
    fn try_emit_mad(&mut self, ty: &Type, operands: &[Rvalue]) -> bool {
        if !ty.is_float() {
            return false;
        }

        for i in 0..2 {
            let Rvalue::Expression {
                op: ExprOp::Mul,
                operands: mul,
                ..
            } = &operands[i]
            else {
                continue;
            };
            let nonmul = &operands[1 - i];
            if nonmul.as_constant().is_some()
                || mul[0].as_constant().is_some()
                || mul[1].as_constant().is_some()
            {
                return false;
            }

            let srcs = [
                self.eval_sized(nonmul),
                self.eval_sized(&mul[0]),
                self.eval_sized(&mul[1]),
            ];
            let comps = ty.components();
            let dst = self.s.vgrf(RegType::F, comps);
            for c in 0..comps {
                let s = self.broadcast(&srcs, c);
                let d = self.comp(dst, c);
                self.s.mad(d, s[0], s[1], s[2]);
            }
            self.result = dst;
            return true;
        }
        false
    }

    /// Component `c` of each operand, with scalars broadcast
    fn broadcast(&self, srcs: &[(FsReg, u32)], c: u32) -> SmallVec<[FsReg; 4]> {
        srcs.iter()
            .map(|(r, n)| if *n == 1 { *r } else { self.comp(*r, c) })
            .collect()
    }

    fn visit_expression(&mut self, op: ExprOp, ty: &Type, operands: &[Rvalue]) {
        if op == ExprOp::Add && self.try_emit_mad(ty, operands) {
            return;
        }

        let mut srcs: SmallVec<[(FsReg, u32); 4]> = SmallVec::new();
        for o in operands {
            let src = self.eval_sized(o);
            if self.s.failed() {
                return;
            }
            srcs.push(src);
        }

        let dst_ty = reg_type_for(ty);
        match op {
            ExprOp::Vector => {
                let dst = self.s.vgrf(dst_ty, ty.components());
                let mut c = 0;
                for (reg, n) in srcs {
                    for i in 0..n {
                        let d = self.comp(dst, c);
                        let s = self.comp(reg, i);
                        self.s.mov(d, s);
                        c += 1;
                    }
                }
                self.result = dst;
            }
            ExprOp::Dot => {
                let n = std::cmp::max(srcs[0].1, srcs[1].1);
                let dst = self.s.vgrf(dst_ty, 1);
                let s = self.broadcast(&srcs, 0);
                self.s.mul(dst, s[0], s[1]);
                for c in 1..n {
                    let s = self.broadcast(&srcs, c);
                    self.s.mad(dst, dst, s[0], s[1]);
                }
                self.result = dst;
            }
            ExprOp::AllEqual | ExprOp::AnyNequal => {
                let (cmod, combine) = if op == ExprOp::AllEqual {
                    (CondMod::Z, Opcode::And)
                } else {
                    (CondMod::NZ, Opcode::Or)
                };
                let n = std::cmp::max(srcs[0].1, srcs[1].1);
                let dst = self.s.vgrf(RegType::D, 1);
                for c in 0..n {
                    let s = self.broadcast(&srcs, c);
                    if c == 0 {
                        self.s.cmp(dst, s[0], s[1], cmod);
                    } else {
                        let tmp = self.s.vgrf(RegType::D, 1);
                        self.s.cmp(tmp, s[0], s[1], cmod);
                        self.s.emit(combine, dst, &[dst, tmp]);
                    }
                }
                self.s.and(dst, dst, FsReg::imm_d(1));
                self.result = dst;
            }
            _ => {
                let comps = ty.components();
                if srcs.iter().any(|(_, n)| *n != 1 && *n != comps) {
                    self.s.fail(format!(
                        "operand sizes of {:?} do not match its result",
                        op
                    ));
                    return;
                }
                let dst = self.s.vgrf(dst_ty, comps);
                for c in 0..comps {
                    let s = self.broadcast(&srcs, c);
                    let d = self.comp(dst, c);
                    self.emit_alu_comp(op, d, &s);
                }
                self.result = dst;
            }
        }
    }

    /// Emits one component of a component-wise expression
    fn emit_alu_comp(&mut self, op: ExprOp, dst: FsReg, s: &[FsReg]) {
        match op {
            ExprOp::BitNot => {
                self.s.not(dst, s[0]);
            }
            ExprOp::LogicNot => {
                self.s.xor(dst, s[0], FsReg::imm_d(1));
            }
            ExprOp::Neg => {
                self.s.mov(dst, s[0].fneg());
            }
            ExprOp::Abs => {
                self.s.mov(dst, s[0].fabs());
            }
            ExprOp::Sign => self.emit_sign(dst, s[0]),
            ExprOp::Rcp => self.emit_math(Opcode::Rcp, dst, &s[..1]),
            ExprOp::Rsq => self.emit_math(Opcode::Rsq, dst, &s[..1]),
            ExprOp::Sqrt => self.emit_math(Opcode::Sqrt, dst, &s[..1]),
            ExprOp::Exp2 => self.emit_math(Opcode::Exp2, dst, &s[..1]),
            ExprOp::Log2 => self.emit_math(Opcode::Log2, dst, &s[..1]),
            ExprOp::Sin => self.emit_math(Opcode::Sin, dst, &s[..1]),
            ExprOp::Cos => self.emit_math(Opcode::Cos, dst, &s[..1]),
            ExprOp::Pow => self.emit_math(Opcode::Pow, dst, &s[..2]),
            ExprOp::F2I
            | ExprOp::F2U
            | ExprOp::I2F
            | ExprOp::U2F
            | ExprOp::I2U
            | ExprOp::U2I
            | ExprOp::B2I
            | ExprOp::B2F => {
                self.s.mov(dst, s[0]);
            }
            ExprOp::BitcastF2I
            | ExprOp::BitcastI2F
            | ExprOp::BitcastF2U
            | ExprOp::BitcastU2F => {
                self.s.mov(dst, s[0].retype(dst.ty));
            }
            ExprOp::F2B => {
                self.s.cmp(dst, s[0], FsReg::imm_f(0.0), CondMod::NZ);
                self.s.and(dst, dst, FsReg::imm_d(1));
            }
            ExprOp::I2B => {
                self.s.cmp(dst, s[0], FsReg::imm_d(0), CondMod::NZ);
                self.s.and(dst, dst, FsReg::imm_d(1));
            }
            ExprOp::Trunc => {
                self.s.rndz(dst, s[0]);
            }
            ExprOp::Ceil => {
                let tmp = self.s.vgrf(RegType::F, 1);
                self.s.rndd(tmp, s[0].fneg());
                self.s.mov(dst, tmp.fneg());
            }
            ExprOp::Floor => {
                self.s.rndd(dst, s[0]);
            }
            ExprOp::Fract => {
                self.s.frc(dst, s[0]);
            }
            ExprOp::RoundEven => {
                self.s.rnde(dst, s[0]);
            }
            ExprOp::Dfdx => {
                self.s.emit(Opcode::Ddx, dst, &[s[0]]);
            }
            ExprOp::Dfdy => {
                self.s.emit(Opcode::Ddy, dst, &[s[0]]);
            }
            ExprOp::BitfieldReverse => {
                self.s.emit(
                    Opcode::Bfrev,
                    dst.retype(RegType::UD),
                    &[s[0].retype(RegType::UD)],
                );
            }
            ExprOp::BitCount => {
                self.s.emit(
                    Opcode::Cbit,
                    dst.retype(RegType::UD),
                    &[s[0].retype(RegType::UD)],
                );
            }
            ExprOp::FindMsb => {
                /* FBH counts from the MSB side and reports no bit found as
                 * ~0, which findMSB() wants as -1.
                 */
                self.s.emit(Opcode::Fbh, dst.retype(RegType::UD), &[s[0]]);
                self.s.cmp(
                    FsReg::null(RegType::D),
                    dst.retype(RegType::D),
                    FsReg::imm_d(-1),
                    CondMod::NZ,
                );
                let i = self.s.add(
                    dst.retype(RegType::D),
                    dst.retype(RegType::D).fneg(),
                    FsReg::imm_d(31),
                );
                i.predicate = Predicate::Normal;
            }
            ExprOp::FindLsb => {
                self.s.emit(
                    Opcode::Fbl,
                    dst.retype(RegType::UD),
                    &[s[0].retype(RegType::UD)],
                );
            }
            ExprOp::Saturate => {
                self.s.mov(dst, s[0]).saturate = true;
            }
            ExprOp::Add => {
                self.s.add(dst, s[0], s[1]);
            }
            ExprOp::Sub => {
                self.s.add(dst, s[0], s[1].fneg());
            }
            ExprOp::Mul => {
                self.s.mul(dst, s[0], s[1]);
            }
            ExprOp::ImulHigh => {
                self.s.emit(Opcode::Mulh, dst, &[s[0], s[1]]);
            }
            ExprOp::Div => {
                if dst.ty.is_float() {
                    let rcp = self.s.vgrf(RegType::F, 1);
                    self.emit_math(Opcode::Rcp, rcp, &[s[1]]);
                    self.s.mul(dst, s[0], rcp);
                } else {
                    self.emit_math(Opcode::IntQuotient, dst, &s[..2]);
                }
            }
            ExprOp::Mod => {
                if dst.ty.is_float() {
                    /* x - y * floor(x / y) */
                    let tmp = self.s.vgrf(RegType::F, 1);
                    self.emit_math(Opcode::Rcp, tmp, &[s[1]]);
                    self.s.mul(tmp, s[0], tmp);
                    self.s.rndd(tmp, tmp);
                    self.s.mul(tmp, s[1], tmp);
                    self.s.add(dst, s[0], tmp.fneg());
                } else {
                    self.emit_math(Opcode::IntRemainder, dst, &s[..2]);
                }
            }
            ExprOp::Less
            | ExprOp::Greater
            | ExprOp::Lequal
            | ExprOp::Gequal
            | ExprOp::Equal
            | ExprOp::Nequal => {
                let cmod = cond_for_comparison(op).unwrap();
                self.s.cmp(dst, s[0], s[1], cmod);
                self.s.and(dst, dst, FsReg::imm_d(1));
            }
            ExprOp::LShift => {
                self.s.shl(dst, s[0], s[1]);
            }
            ExprOp::RShift => {
                if s[0].ty == RegType::D {
                    self.s.asr(dst, s[0], s[1]);
                } else {
                    self.s.shr(dst, s[0], s[1]);
                }
            }
            ExprOp::BitAnd | ExprOp::LogicAnd => {
                self.s.and(dst, s[0], s[1]);
            }
            ExprOp::BitXor | ExprOp::LogicXor => {
                self.s.xor(dst, s[0], s[1]);
            }
            ExprOp::BitOr | ExprOp::LogicOr => {
                self.s.or(dst, s[0], s[1]);
            }
            ExprOp::Min => {
                self.s.emit_minmax(dst, s[0], s[1], CondMod::L);
            }
            ExprOp::Max => {
                self.s.emit_minmax(dst, s[0], s[1], CondMod::GE);
            }
            ExprOp::Fma => {
                self.s.mad(dst, s[2], s[1], s[0]);
            }
            ExprOp::Lrp => {
                /* lrp(x, y, a) = x * (1 - a) + y * a */
                self.s.lrp(dst, s[2], s[1], s[0]);
            }
            ExprOp::Csel => {
                self.s.cmp(
                    FsReg::null(RegType::D),
                    s[0],
                    FsReg::imm_d(0),
                    CondMod::NZ,
                );
                self.s.sel(dst, s[1], s[2]).predicate = Predicate::Normal;
            }
            ExprOp::BitfieldExtract => {
                self.s.emit(Opcode::Bfe, dst, &[s[2], s[1], s[0]]);
            }
            ExprOp::BitfieldInsert => {
                /* BFI1 builds the mask from bits and offset, BFI2 merges */
                let mask = self.s.vgrf(RegType::UD, 1);
                self.s.emit(Opcode::Bfi1, mask, &[s[3], s[2]]);
                self.s.emit(Opcode::Bfi2, dst, &[mask, s[1], s[0]]);
            }
            ExprOp::Dot | ExprOp::AllEqual | ExprOp::AnyNequal | ExprOp::Vector => {
                panic!("{:?} is not component-wise", op)
            }
        }
    }

    fn emit_sign(&mut self, dst: FsReg, x: FsReg) {
        if dst.ty.is_float() {
            /* Keep the sign bit of x and OR in 1.0 unless x is zero */
            self.s
                .cmp(FsReg::null(RegType::F), x, FsReg::imm_f(0.0), CondMod::NZ);
            let dst_ud = dst.retype(RegType::UD);
            self.s.and(dst_ud, x.retype(RegType::UD), FsReg::imm_ud(0x80000000));
            self.s
                .or(dst_ud, dst_ud, FsReg::imm_ud(0x3f800000))
                .predicate = Predicate::Normal;
        } else {
            /* ASR 31 yields -1 or 0, then OR in 1 for positive values */
            self.s.cmp(FsReg::null(RegType::D), x, FsReg::imm_d(0), CondMod::G);
            self.s.asr(dst, x, FsReg::imm_d(31));
            self.s.or(dst, dst, FsReg::imm_d(1)).predicate = Predicate::Normal;
        }
    }

    /// Evaluates a boolean into the flag register f0.0
    fn emit_bool_to_cond_code(&mut self, rv: &Rvalue) {
        if let Rvalue::Expression { op, operands, .. } = rv {
            let scalar = operands
                .iter()
                .all(|o| o.ty(self.prog).components() == 1);
            match op {
                ExprOp::LogicNot => {
                    let x = self.eval(&operands[0]);
                    self.s.and(FsReg::null(RegType::D), x, FsReg::imm_d(1)).cmod =
                        CondMod::Z;
                    return;
                }
                ExprOp::F2B => {
                    let x = self.eval(&operands[0]);
                    self.s.cmp(
                        FsReg::null(RegType::F),
                        x,
                        FsReg::imm_f(0.0),
                        CondMod::NZ,
                    );
                    return;
                }
                ExprOp::I2B => {
                    let x = self.eval(&operands[0]);
                    self.s.cmp(
                        FsReg::null(RegType::D),
                        x,
                        FsReg::imm_d(0),
                        CondMod::NZ,
                    );
                    return;
                }
                op if scalar && cond_for_comparison(*op).is_some() => {
                    let a = self.eval(&operands[0]);
                    let b = self.eval(&operands[1]);
                    let cmod = cond_for_comparison(*op).unwrap();
                    self.s.cmp(FsReg::null(a.ty), a, b, cmod);
                    return;
                }
                _ => (),
            }
        }

        let x = self.eval(rv);
        self.s.and(FsReg::null(RegType::D), x, FsReg::imm_d(1)).cmod =
            CondMod::NZ;
    }

    /// Copies every scalar slot of a value of type `ty`
    fn emit_copy(&mut self, dst: FsReg, src: FsReg, ty: &Type, predicated: bool) {
        match ty {
            Type::Numeric { .. } => {
                let rt = reg_type_for(ty);
                for c in 0..ty.components() {
                    let d = self.comp(dst, c).retype(rt);
                    let s = self.comp(src, c).retype(rt);
                    let i = self.s.mov(d, s);
                    if predicated {
                        i.predicate = Predicate::Normal;
                    }
                }
            }
            Type::Array(elem, len) => {
                let size = elem.type_size();
                for i in 0..*len {
                    let d = self.comp(dst, i * size);
                    let s = self.comp(src, i * size);
                    self.emit_copy(d, s, elem, predicated);
                }
            }
            Type::Struct(fields) => {
                let mut offset = 0;
                for (_, fty) in fields {
                    let d = self.comp(dst, offset);
                    let s = self.comp(src, offset);
                    self.emit_copy(d, s, fty, predicated);
                    offset += fty.type_size();
                }
            }
            Type::Void | Type::Sampler { .. } | Type::Image { .. } => (),
        }
    }

    fn visit_assign(
        &mut self,
        lhs: &Deref,
        rhs: &Rvalue,
        write_mask: u8,
        condition: Option<&Rvalue>,
    ) {
        let (r, r_comps) = self.eval_sized(rhs);
        if self.s.failed() {
            return;
        }
        let Some(l) = self.deref_reg(lhs) else {
            return;
        };

        let predicated = condition.is_some();
        if let Some(cond) = condition {
            self.emit_bool_to_cond_code(cond);
        }

        let lty = lhs.ty(self.prog).clone();
        if matches!(lty, Type::Numeric { .. }) && !lty.is_matrix() {
            let mut src_comp = 0;
            for c in 0..lty.vector_elements() {
                if write_mask & (1 << c) == 0 {
                    continue;
                }
                let d = self.comp(l, c);
                let s = if r_comps == 1 { r } else { self.comp(r, src_comp) };
                let i = self.s.mov(d, s.retype(d.ty));
                if predicated {
                    i.predicate = Predicate::Normal;
                }
                src_comp += 1;
            }
        } else {
            self.emit_copy(l, r, &lty, predicated);
        }
    }

    fn visit_if(&mut self, cond: &Rvalue, then_body: &[Stmt], else_body: &[Stmt]) {
        self.emit_bool_to_cond_code(cond);
        self.s
            .emit(Opcode::If, FsReg::null(RegType::D), &[])
            .predicate = Predicate::Normal;

        self.nesting.push(Nesting::If);
        self.visit_stmts(then_body);
        if !else_body.is_empty() {
            self.s.emit(Opcode::Else, FsReg::null(RegType::D), &[]);
            self.visit_stmts(else_body);
        }
        self.s.emit(Opcode::Endif, FsReg::null(RegType::D), &[]);
        if self.nesting.pop() != Some(Nesting::If) {
            self.s.fail("unbalanced control flow");
        }
    }

    fn visit_loop(&mut self, body: &[Stmt]) {
        self.s.emit(Opcode::Do, FsReg::null(RegType::D), &[]);
        self.nesting.push(Nesting::Loop);
        self.visit_stmts(body);
        if self.nesting.pop() != Some(Nesting::Loop) {
            self.s.fail("unbalanced control flow");
        }
        self.s.emit(Opcode::While, FsReg::null(RegType::D), &[]);
    }

    fn visit_loop_jump(&mut self, op: Opcode) {
        if !self.nesting.contains(&Nesting::Loop) {
            self.s.fail(format!("{} outside of a loop", op));
            return;
        }
        self.s.emit(op, FsReg::null(RegType::D), &[]);
    }

    fn emit_discard_jump(&mut self) {
        /* Jump to the end of the program once every channel is dead */
        let pred = if self.width() == 8 {
            Predicate::Any8h
        } else {
            Predicate::Any16h
        };
        let i = self
            .s
            .emit(Opcode::DiscardJump, FsReg::null(RegType::UD), &[]);
        i.predicate = pred;
        i.predicate_inverse = true;
        i.flag_subreg = 1;
    }

    fn visit_discard(&mut self, condition: Option<&Rvalue>) {
        /* f0.1 holds the live pixel mask; clearing a channel kills it */
        let cmp = match condition {
            Some(cond) => {
                let x = self.eval(cond);
                if self.s.failed() {
                    return;
                }
                self.s.cmp(FsReg::null(RegType::D), x, FsReg::imm_d(0), CondMod::Z)
            }
            None => {
                let g0 = FsReg::grf(0, RegType::UW);
                self.s.cmp(FsReg::null(RegType::UW), g0, g0, CondMod::NZ)
            }
        };
        cmp.predicate = Predicate::Normal;
        cmp.flag_subreg = 1;

        self.emit_discard_jump();
    }

    fn visit_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Assign {
                lhs,
                rhs,
                write_mask,
                condition,
            } => self.visit_assign(lhs, rhs, *write_mask, condition.as_ref()),
            Stmt::If {
                condition,
                then_body,
                else_body,
            } => self.visit_if(condition, then_body, else_body),
            Stmt::Loop { body } => self.visit_loop(body),
            Stmt::Break => self.visit_loop_jump(Opcode::Break),
            Stmt::Continue => self.visit_loop_jump(Opcode::Continue),
            Stmt::Discard { condition } => self.visit_discard(condition.as_ref()),
            Stmt::ImageStore {
                image,
                coord,
                value,
            } => self.visit_image_store(image, coord, value),
            Stmt::BufferStore {
                block,
                offset,
                value,
                write_mask,
            } => self.visit_buffer_store(*block, offset, value, *write_mask),
            Stmt::Call { .. } => self.s.fail("unsupported function call"),
            Stmt::Return => {
                if self.nesting.is_empty() {
                    self.returned = true;
                } else {
                    self.s.fail("return from inside control flow unsupported");
                }
            }
        }
    }

    fn visit_stmts(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            if self.s.failed() || self.returned {
                return;
            }
            self.visit_stmt(stmt);
        }
    }

    fn visit_texture(&mut self, t: &Texture) {
        let Some(unit) = self.resource_index(&t.sampler) else {
            return;
        };
        if unit as usize >= MAX_SAMPLERS {
            self.s.fail(format!("texture unit {} out of range", unit));
            return;
        }
        let sampler_ty = t.sampler.ty(self.prog).clone();
        let Some(dim) = sampler_ty.sampler_dim() else {
            self.s.fail("texturing from a non-sampler");
            return;
        };
        let is_cube_array = dim == SamplerDim::Cube && sampler_ty.sampler_is_array();
        let ctx = self.ctx;
        let tex_key = &ctx.key.tex;
        let dst_ty = reg_type_for(&t.ty);

        if let TexOp::Tg4 { component } = t.op {
            if self.gen() < 7 {
                self.s.fail("texture gather requires Gen7+");
                return;
            }

            /* Gathering a channel swizzled to a constant needs no sampling */
            let swz = tex_key.swizzle_channel(unit as usize, component.into());
            if swz == SWIZZLE_ZERO || swz == SWIZZLE_ONE {
                let dst = self.s.vgrf(dst_ty, 4);
                let one = swz == SWIZZLE_ONE;
                let imm = if dst_ty.is_float() {
                    FsReg::imm_f(if one { 1.0 } else { 0.0 })
                } else {
                    FsReg::imm_d(i32::from(one))
                };
                for i in 0..4 {
                    let d = self.comp(dst, i);
                    self.s.mov(d, imm);
                }
                self.result = dst;
                return;
            }
        }

        let (mut coordinate, coord_components) = match &t.coordinate {
            Some(c) => self.eval_sized(c),
            None => (FsReg::bad(), 0),
        };
        let mut shadow_c = match &t.shadow_comparitor {
            Some(c) => self.eval(c),
            None => FsReg::bad(),
        };

        if let Some(proj) = &t.projector {
            let proj = self.eval(proj);
            let inv = self.s.vgrf(RegType::F, 1);
            self.emit_math(Opcode::Rcp, inv, &[proj]);

            let projected = self.s.vgrf(RegType::F, coord_components);
            for c in 0..coord_components {
                let d = self.comp(projected, c);
                let s = self.comp(coordinate, c);
                self.s.mul(d, s, inv);
            }
            coordinate = projected;

            if shadow_c.file != RegFile::Bad {
                let c = self.s.vgrf(RegType::F, 1);
                self.s.mul(c, shadow_c, inv);
                shadow_c = c;
            }
        }

        if !matches!(t.op, TexOp::Txf | TexOp::Txs) && coord_components > 0 {
            coordinate =
                self.rescale_texcoord(coordinate, coord_components, dim, unit);
        }

        let eval_or = |this: &mut Self, rv: &Option<Rvalue>, default: FsReg| {
            match rv {
                Some(rv) => this.eval(rv),
                None => default,
            }
        };
        let mut lod = FsReg::bad();
        let mut lod2 = FsReg::bad();
        let mut grad_components = 0;
        match t.op {
            TexOp::Txb | TexOp::Txl => {
                lod = eval_or(self, &t.lod, FsReg::imm_f(0.0));
            }
            TexOp::Txf => lod = eval_or(self, &t.lod, FsReg::imm_d(0)),
            TexOp::Txs => lod = eval_or(self, &t.lod, FsReg::imm_ud(0)),
            TexOp::Txd => {
                let (Some(dpdx), Some(dpdy)) = (&t.dpdx, &t.dpdy) else {
                    self.s.fail("texture gradient without derivatives");
                    return;
                };
                let (x, n) = self.eval_sized(dpdx);
                lod = x;
                lod2 = self.eval(dpdy);
                grad_components = n;
            }
            TexOp::Tex | TexOp::Lod | TexOp::Tg4 { .. } => (),
        }

        let mut offset_bits = 0;
        let mut offset_value = FsReg::bad();
        if let Some(off) = &t.offset {
            if let Some(c) = off.as_constant() {
                if t.op == TexOp::Txf {
                    /* Texel fetches take integer coordinates, so apply the
                     * offset to them directly.
                     */
                    let moved = self.s.vgrf(RegType::D, coord_components);
                    for i in 0..coord_components {
                        let d = self.comp(moved, i);
                        let s = self.comp(coordinate, i).retype(RegType::D);
                        match c.bits.get(i as usize) {
                            Some(o) => {
                                self.s.add(d, s, FsReg::imm_d(*o as i32));
                            }
                            None => {
                                self.s.mov(d, s);
                            }
                        }
                    }
                    coordinate = moved;
                } else {
                    offset_bits = texture_offset(&c.bits);
                }
            } else if matches!(t.op, TexOp::Tg4 { .. }) {
                offset_value = self.eval(off);
            } else {
                self.s.fail("non-constant texel offsets unsupported");
                return;
            }
        }
        if self.s.failed() {
            return;
        }

        let opcode = match t.op {
            TexOp::Tex => Opcode::TexLogical,
            TexOp::Txb => Opcode::TxbLogical,
            TexOp::Txl => Opcode::TxlLogical,
            TexOp::Txd => Opcode::TxdLogical,
            TexOp::Txf => Opcode::TxfLogical,
            TexOp::Txs => Opcode::TxsLogical,
            TexOp::Lod => Opcode::LodLogical,
            TexOp::Tg4 { .. } if offset_value.file != RegFile::Bad => {
                Opcode::Tg4OffsetLogical
            }
            TexOp::Tg4 { .. } => Opcode::Tg4Logical,
        };

        let dst = self.s.vgrf(dst_ty, 4);
        let mut srcs = [FsReg::bad(); TEX_LOGICAL_NUM_SRCS];
        srcs[TEX_LOGICAL_SRC_COORDINATE] = coordinate;
        srcs[TEX_LOGICAL_SRC_SHADOW_C] = shadow_c;
        srcs[TEX_LOGICAL_SRC_LOD] = lod;
        srcs[TEX_LOGICAL_SRC_LOD2] = lod2;
        srcs[TEX_LOGICAL_SRC_SAMPLER] = FsReg::imm_ud(unit);
        srcs[TEX_LOGICAL_SRC_OFFSET_VALUE] = offset_value;
        srcs[TEX_LOGICAL_SRC_COORD_COMPONENTS] =
            FsReg::imm_ud(coord_components);
        srcs[TEX_LOGICAL_SRC_GRAD_COMPONENTS] = FsReg::imm_ud(grad_components);

        let rlen = (4 * self.comp_regs()) as u8;
        let i = self.s.emit(opcode, dst, &srcs);
        i.rlen = rlen;
        i.offset = offset_bits;
        i.shadow_compare = shadow_c.file != RegFile::Bad;
        if let TexOp::Tg4 { component } = t.op {
            /* The gather channel goes in bits 16-17 of the header */
            let channel = tex_key.swizzle_channel(unit as usize, component.into());
            i.offset |= u32::from(channel) << 16;
        }

        if t.op == TexOp::Txs && is_cube_array {
            /* The sampler reports the layer count of a cube array in faces */
            let depth = self.comp(dst, 2);
            let fixed = self.s.vgrf(RegType::D, 1);
            self.emit_math(
                Opcode::IntQuotient,
                fixed,
                &[depth.retype(RegType::D), FsReg::imm_d(6)],
            );
            self.s.mov(depth.retype(RegType::D), fixed);
        }

        self.result = self.swizzle_result(t, dst, unit);
    }

    /// Emulates GL_CLAMP, which the sampler lacks, on the coordinates
    fn rescale_texcoord(
        &mut self,
        coordinate: FsReg,
        coord_components: u32,
        dim: SamplerDim,
        unit: u32,
    ) -> FsReg {
        let mask = self.ctx.key.tex.gl_clamp_mask;
        let clamped: Vec<u32> = (0..std::cmp::min(coord_components, 3))
            .filter(|i| mask[*i as usize] & (1 << unit) != 0)
            .collect();
        if clamped.is_empty() {
            return coordinate;
        }

        let coord = self.s.vgrf(RegType::F, coord_components);
        for c in 0..coord_components {
            let d = self.comp(coord, c);
            let s = self.comp(coordinate, c);
            self.s.mov(d, s);
        }

        if dim == SamplerDim::Rect {
            /* Rectangle coordinates are unnormalized, so clamp to
             * [0, size] with the size queried from the sampler.
             */
            let size = self.s.vgrf(RegType::D, 4);
            let mut srcs = [FsReg::bad(); TEX_LOGICAL_NUM_SRCS];
            srcs[TEX_LOGICAL_SRC_LOD] = FsReg::imm_ud(0);
            srcs[TEX_LOGICAL_SRC_SAMPLER] = FsReg::imm_ud(unit);
            srcs[TEX_LOGICAL_SRC_COORD_COMPONENTS] = FsReg::imm_ud(0);
            srcs[TEX_LOGICAL_SRC_GRAD_COMPONENTS] = FsReg::imm_ud(0);
            let rlen = (4 * self.comp_regs()) as u8;
            self.s.emit(Opcode::TxsLogical, size, &srcs).rlen = rlen;

            for i in clamped.into_iter().filter(|i| *i < 2) {
                let chan = self.comp(coord, i);
                self.s.emit_minmax(chan, chan, FsReg::imm_f(0.0), CondMod::GE);
                let limit = self.s.vgrf(RegType::F, 1);
                let s = self.comp(size, i);
                self.s.mov(limit, s);
                self.s.emit_minmax(chan, chan, limit, CondMod::L);
            }
        } else {
            for i in clamped {
                let chan = self.comp(coord, i);
                self.s.mov(chan, chan).saturate = true;
            }
        }
        coord
    }

    fn swizzle_result(&mut self, t: &Texture, orig: FsReg, unit: u32) -> FsReg {
        if matches!(t.op, TexOp::Txs | TexOp::Lod | TexOp::Tg4 { .. }) {
            return orig;
        }
        /* Shadow lookups return one value and ignore the depth mode */
        if t.ty.components() == 1 {
            return orig;
        }

        let ctx = self.ctx;
        let tex_key = &ctx.key.tex;
        if tex_key.swizzles[unit as usize] == crate::api::SWIZZLE_XYZW {
            return orig;
        }

        let dst = self.s.vgrf(orig.ty, 4);
        for i in 0..4 {
            let swz = tex_key.swizzle_channel(unit as usize, i);
            let d = self.comp(dst, i as u32);
            let src = match swz {
                SWIZZLE_ZERO | SWIZZLE_ONE => {
                    let one = swz == SWIZZLE_ONE;
                    if orig.ty.is_float() {
                        FsReg::imm_f(if one { 1.0 } else { 0.0 })
                    } else {
                        FsReg::imm_d(i32::from(one))
                    }
                }
                c => self.comp(orig, u32::from(c)),
            };
            self.s.mov(d, src);
        }
        dst
    }

    fn image_surface(&mut self, image: &Deref) -> Option<u32> {
        if self.gen() < 7 {
            self.s.fail("image access requires Gen7+");
            return None;
        }
        let index = self.resource_index(image)?;
        Some(self.ctx.binding_table.image_start + index)
    }

    fn visit_image_load(&mut self, image: &Deref, coord: &Rvalue, ty: &Type) {
        let Some(surface) = self.image_surface(image) else {
            return;
        };
        let (coord, dims) = self.eval_sized(coord);
        if self.s.failed() {
            return;
        }

        let dst = self.s.vgrf(reg_type_for(ty), 4);
        let mut srcs = [FsReg::bad(); SURFACE_LOGICAL_NUM_SRCS];
        srcs[SURFACE_LOGICAL_SRC_ADDRESS] = coord;
        srcs[SURFACE_LOGICAL_SRC_SURFACE] = FsReg::imm_ud(surface);
        srcs[SURFACE_LOGICAL_SRC_DIMS] = FsReg::imm_ud(dims);
        srcs[SURFACE_LOGICAL_SRC_ARG] = FsReg::imm_ud(4);

        let rlen = (4 * self.comp_regs()) as u8;
        self.s
            .emit(Opcode::TypedSurfaceReadLogical, dst, &srcs)
            .rlen = rlen;
        self.result = dst;
    }

    fn visit_image_store(&mut self, image: &Deref, coord: &Rvalue, value: &Rvalue) {
        let Some(surface) = self.image_surface(image) else {
            return;
        };
        let (coord, dims) = self.eval_sized(coord);
        let (value, comps) = self.eval_sized(value);
        if self.s.failed() {
            return;
        }

        let mut srcs = [FsReg::bad(); SURFACE_LOGICAL_NUM_SRCS];
        srcs[SURFACE_LOGICAL_SRC_ADDRESS] = coord;
        srcs[SURFACE_LOGICAL_SRC_DATA] = value;
        srcs[SURFACE_LOGICAL_SRC_SURFACE] = FsReg::imm_ud(surface);
        srcs[SURFACE_LOGICAL_SRC_DIMS] = FsReg::imm_ud(dims);
        srcs[SURFACE_LOGICAL_SRC_ARG] = FsReg::imm_ud(comps);
        self.s.emit(
            Opcode::TypedSurfaceWriteLogical,
            FsReg::null(RegType::UD),
            &srcs,
        );
    }

    fn visit_buffer_load(&mut self, block: u32, offset: &Rvalue, ty: &Type) {
        let surface = self.ctx.binding_table.ubo_start + block;
        let comps = ty.components();
        let rt = reg_type_for(ty);

        if let Some(c) = offset.as_constant() {
            /* Constant offsets go through the constant cache one 16-byte
             * block at a time.
             */
            let dst = self.s.vgrf(rt, comps);
            let mut loaded: Option<(u32, FsReg)> = None;
            for i in 0..comps {
                let byte = c.bits[0] + 4 * i;
                let aligned = byte & !15;
                let packed = match loaded {
                    Some((off, reg)) if off == aligned => reg,
                    _ => {
                        let reg = FsReg::vgrf(self.s.alloc.allocate(1), rt);
                        self.s
                            .group_builder(8, 0)
                            .with_exec_all()
                            .emit(
                                Opcode::UniformPullConstantLoad,
                                reg,
                                &[FsReg::imm_ud(surface), FsReg::imm_ud(aligned)],
                            )
                            .rlen = 1;
                        loaded = Some((aligned, reg));
                        reg
                    }
                };
                let d = self.comp(dst, i);
                self.s.mov(d, packed.smear((byte % 16) / 4));
            }
            self.result = dst;
            return;
        }

        if self.gen() < 7 {
            self.s.fail("buffer access with a variable offset requires Gen7+");
            return;
        }
        let addr = self.eval(offset);
        if self.s.failed() {
            return;
        }

        let dst = self.s.vgrf(rt, comps);
        let mut srcs = [FsReg::bad(); SURFACE_LOGICAL_NUM_SRCS];
        srcs[SURFACE_LOGICAL_SRC_ADDRESS] = addr.retype(RegType::UD);
        srcs[SURFACE_LOGICAL_SRC_SURFACE] = FsReg::imm_ud(surface);
        srcs[SURFACE_LOGICAL_SRC_DIMS] = FsReg::imm_ud(1);
        srcs[SURFACE_LOGICAL_SRC_ARG] = FsReg::imm_ud(comps);

        let rlen = (comps * self.comp_regs()) as u8;
        self.s
            .emit(Opcode::UntypedSurfaceReadLogical, dst, &srcs)
            .rlen = rlen;
        self.result = dst;
    }

    fn visit_buffer_store(
        &mut self,
        block: u32,
        offset: &Rvalue,
        value: &Rvalue,
        write_mask: u8,
    ) {
        if self.gen() < 7 {
            self.s.fail("buffer stores require Gen7+");
            return;
        }
        let surface = self.ctx.binding_table.ubo_start + block;
        let addr = self.eval(offset).retype(RegType::UD);
        let (value, comps) = self.eval_sized(value);
        if self.s.failed() {
            return;
        }

        for c in 0..comps {
            if write_mask & (1 << c) == 0 {
                continue;
            }
            let addr_c = if c == 0 {
                addr
            } else {
                let tmp = self.s.vgrf(RegType::UD, 1);
                self.s.add(tmp, addr, FsReg::imm_ud(4 * c));
                tmp
            };

            let mut srcs = [FsReg::bad(); SURFACE_LOGICAL_NUM_SRCS];
            srcs[SURFACE_LOGICAL_SRC_ADDRESS] = addr_c;
            srcs[SURFACE_LOGICAL_SRC_DATA] = self.comp(value, c);
            srcs[SURFACE_LOGICAL_SRC_SURFACE] = FsReg::imm_ud(surface);
            srcs[SURFACE_LOGICAL_SRC_DIMS] = FsReg::imm_ud(1);
            srcs[SURFACE_LOGICAL_SRC_ARG] = FsReg::imm_ud(1);
            self.s.emit(
                Opcode::UntypedSurfaceWriteLogical,
                FsReg::null(RegType::UD),
                &srcs,
            );
        }
    }

    fn emit_alpha_test(&mut self) {
        let func = match self.ctx.key.alpha_test_func {
            Some(f) if f != CompareFunc::Always => f,
            _ => return,
        };

        let cmp = if func == CompareFunc::Never {
            /* Kill every pixel */
            let g0 = FsReg::grf(0, RegType::UW);
            self.s.cmp(FsReg::null(RegType::F), g0, g0, CondMod::NZ)
        } else {
            if self.outputs[0].file == RegFile::Bad {
                return;
            }
            let alpha = self.comp(self.outputs[0], 3);
            let alpha_ref = FsReg::imm_f(self.ctx.key.alpha_test_ref);
            self.s.cmp(
                FsReg::null(RegType::F),
                alpha,
                alpha_ref,
                cond_for_alpha_func(func),
            )
        };
        cmp.predicate = Predicate::Normal;
        cmp.flag_subreg = 1;
    }

    fn emit_single_fb_write(
        &mut self,
        color0: FsReg,
        color1: FsReg,
        src0_alpha: FsReg,
        components: u32,
        target: u32,
    ) {
        let devinfo = self.ctx.devinfo;
        let mut srcs = [FsReg::bad(); FB_WRITE_LOGICAL_NUM_SRCS];
        srcs[FB_WRITE_LOGICAL_SRC_COLOR0] = color0;
        srcs[FB_WRITE_LOGICAL_SRC_COLOR1] = color1;
        srcs[FB_WRITE_LOGICAL_SRC_SRC0_ALPHA] = src0_alpha;
        srcs[FB_WRITE_LOGICAL_SRC_SRC_DEPTH] = self.frag_depth;
        srcs[FB_WRITE_LOGICAL_SRC_COMPONENTS] = FsReg::imm_ud(components);

        let uses_kill = self.prog_data.uses_kill;
        let i = self.s.emit(
            Opcode::FbWriteLogical,
            FsReg::null(RegType::UD),
            &srcs,
        );
        i.target = target;

        /* Haswell and later take the pixel mask from the predicate rather
         * than from the message header.
         */
        if (devinfo.is_haswell || devinfo.gen >= 8) && uses_kill {
            i.predicate = Predicate::Normal;
            i.flag_subreg = 1;
        }
    }

    fn emit_fb_writes(&mut self) {
        if self.frag_depth.file != RegFile::Bad {
            self.prog_data.computed_depth = true;
            if self.gen() == 6 {
                self.s.no16("Missing support for simd16 depth writes on gen6");
                if self.s.failed() {
                    return;
                }
            }
        }

        let first_write = self.s.instrs.len();
        if self.dual_src_output.file != RegFile::Bad {
            self.prog_data.dual_src_blend = true;
            self.emit_single_fb_write(
                self.outputs[0],
                self.dual_src_output,
                FsReg::bad(),
                4,
                0,
            );
        } else {
            let key = self.ctx.key;
            let nr_color_regions =
                std::cmp::max(key.nr_color_regions, 1) as usize;
            for target in 0..std::cmp::min(nr_color_regions, MAX_DRAW_BUFFERS) {
                if self.outputs[target].file == RegFile::Bad {
                    continue;
                }
                let src0_alpha = if key.replicate_alpha && target != 0 {
                    self.comp(self.outputs[0], 3)
                } else {
                    FsReg::bad()
                };
                self.emit_single_fb_write(
                    self.outputs[target],
                    FsReg::bad(),
                    src0_alpha,
                    self.output_components[target],
                    target as u32,
                );
            }
        }

        if self.s.instrs.len() == first_write {
            /* Even without color outputs something has to go down the pipe
             * to the null render target.
             */
            let color = self.s.vgrf(RegType::F, 4);
            for c in 0..4 {
                let d = self.comp(color, c);
                self.s.mov(d, FsReg::imm_f(0.0));
            }
            self.emit_single_fb_write(color, FsReg::bad(), FsReg::bad(), 4, 0);
        }

        let last = self.s.instrs.last_mut().unwrap();
        assert!(last.opcode == Opcode::FbWriteLogical);
        last.eot = true;
    }

    fn emit_shader(mut self) {
        let uses_kill = uses_kill(self.ctx, self.prog);
        self.prog_data.uses_kill = uses_kill;

        self.setup_uniforms();
        self.setup_outputs();

        if self.prog.inputs_read() != 0 {
            self.emit_interpolation_setup();
            self.emit_inputs();
        }

        if uses_kill {
            /* f0.1 tracks the pixels still alive */
            self.s
                .emit(Opcode::MovDispatchToFlags, FsReg::null(RegType::UD), &[])
                .flag_subreg = 1;
        }

        let prog = self.prog;
        self.visit_stmts(&prog.main);
        if self.s.failed() {
            return;
        }

        if uses_kill {
            self.s
                .emit(Opcode::PlaceholderHalt, FsReg::null(RegType::UD), &[]);
        }

        self.emit_alpha_test();
        self.emit_fb_writes();

        trace!("SIMD{} IR from GLSL:\n{}", self.width(), self.s);
    }
}

/// Translates `prog` into virtual instructions appended to `s`
///
/// The thread payload and URB setup must already be laid out.  Failures
/// are recorded in `s.error`.
pub fn emit_fs(
    ctx: &CompileContext,
    prog: &Program,
    prog_data: &mut WmProgData,
    s: &mut Shader,
) {
    ShaderFromGlsl::new(ctx, prog, prog_data, s).emit_shader()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{CompileError, DeviceInfo, WmProgKey};

    fn translate(
        devinfo: &DeviceInfo,
        key: &WmProgKey,
        prog: &Program,
        width: u8,
    ) -> (Shader, WmProgData) {
        let _ = env_logger::builder().is_test(true).try_init();

        let ctx = CompileContext::new(devinfo, key, prog);
        let mut prog_data = WmProgData::new();
        prog_data.uses_src_w =
            prog.inputs_read() & (1 << VARYING_SLOT_POS) != 0;
        prog_data.barycentric_interp_modes =
            compute_barycentric_interp_modes(devinfo, key, prog);
        calculate_urb_setup(key, prog, &mut prog_data);

        let mut s = Shader::new(width);
        s.payload = ThreadPayload::setup_gen6(
            width,
            prog_data.barycentric_interp_modes,
            prog_data.uses_src_w,
        );
        emit_fs(&ctx, prog, &mut prog_data, &mut s);
        (s, prog_data)
    }

    fn color_out(prog: &mut Program) -> VarId {
        prog.add_var(Variable::output(
            "color",
            Type::vec(BaseType::Float, 4),
            FRAG_RESULT_DATA0,
        ))
    }

    fn count(s: &Shader, op: Opcode) -> usize {
        s.instrs.iter().filter(|i| i.opcode == op).count()
    }

    #[test]
    fn constant_color() {
        let mut prog = Program::new();
        let out = color_out(&mut prog);
        prog.main.push(Stmt::assign(
            Deref::var(out),
            Rvalue::constant_vec_f(&[1.0, 0.0, 0.0, 1.0]),
        ));

        let (s, _) =
            translate(&DeviceInfo::hsw(), &WmProgKey::default(), &prog, 8);
        assert!(!s.failed());
        assert_eq!(count(&s, Opcode::Mov), 8);

        let fb = s.instrs.last().unwrap();
        assert_eq!(fb.opcode, Opcode::FbWriteLogical);
        assert!(fb.eot);
        assert_eq!(fb.target, 0);
        assert_eq!(fb.srcs[FB_WRITE_LOGICAL_SRC_COMPONENTS].u32(), 4);
        assert_eq!(fb.srcs[FB_WRITE_LOGICAL_SRC_COLOR1].file, RegFile::Bad);
        assert!(fb.predicate.is_none());
    }

    #[test]
    fn fragcoord_flips_y() {
        let mut prog = Program::new();
        let pos = prog.add_var(Variable::input(
            "gl_FragCoord",
            Type::vec(BaseType::Float, 4),
            VARYING_SLOT_POS,
        ));
        let out = color_out(&mut prog);
        prog.main.push(Stmt::assign(Deref::var(out), Rvalue::var(pos)));

        let key = WmProgKey {
            drawable_height: 100,
            ..Default::default()
        };
        let (s, _) = translate(&DeviceInfo::ivb(), &key, &prog, 8);
        assert!(!s.failed());

        let adds: Vec<_> =
            s.instrs.iter().filter(|i| i.opcode == Opcode::Add).collect();
        assert_eq!(adds.len(), 2);
        assert_eq!(adds[0].srcs[1].f32(), 0.5);
        assert!(adds[1].srcs[0].negate);
        assert_eq!(adds[1].srcs[1].f32(), 99.5);

        /* Rendering to a texture keeps the y axis */
        let key = WmProgKey {
            render_to_fbo: true,
            drawable_height: 100,
            ..Default::default()
        };
        let (s, _) = translate(&DeviceInfo::ivb(), &key, &prog, 8);
        let adds: Vec<_> =
            s.instrs.iter().filter(|i| i.opcode == Opcode::Add).collect();
        assert!(!adds[1].srcs[0].negate);
        assert_eq!(adds[1].srcs[1].f32(), 0.5);
        assert_eq!(count(&s, Opcode::Rcp), 1);
    }

    #[test]
    fn discard_jumps_to_halt() {
        let mut prog = Program::new();
        let out = color_out(&mut prog);
        prog.main.push(Stmt::Discard { condition: None });
        prog.main.push(Stmt::assign(
            Deref::var(out),
            Rvalue::constant_vec_f(&[0.0; 4]),
        ));

        let (s, prog_data) =
            translate(&DeviceInfo::hsw(), &WmProgKey::default(), &prog, 16);
        assert!(!s.failed());
        assert!(prog_data.uses_kill);

        assert_eq!(s.instrs[0].opcode, Opcode::MovDispatchToFlags);
        assert_eq!(s.instrs[0].flag_subreg, 1);

        let cmp = &s.instrs[1];
        assert_eq!(cmp.opcode, Opcode::Cmp);
        assert_eq!(cmp.predicate, Predicate::Normal);
        assert_eq!(cmp.flag_subreg, 1);

        let jump = &s.instrs[2];
        assert_eq!(jump.opcode, Opcode::DiscardJump);
        assert_eq!(jump.predicate, Predicate::Any16h);
        assert!(jump.predicate_inverse);

        assert_eq!(count(&s, Opcode::PlaceholderHalt), 1);

        /* Haswell predicates the render target write on the live mask */
        let fb = s.instrs.last().unwrap();
        assert_eq!(fb.predicate, Predicate::Normal);
        assert_eq!(fb.flag_subreg, 1);
    }

    #[test]
    fn alpha_test_compares_alpha() {
        let mut prog = Program::new();
        let out = color_out(&mut prog);
        prog.main.push(Stmt::assign(
            Deref::var(out),
            Rvalue::constant_vec_f(&[0.0; 4]),
        ));

        let key = WmProgKey {
            alpha_test_func: Some(CompareFunc::GEqual),
            alpha_test_ref: 0.25,
            ..Default::default()
        };
        let (s, prog_data) = translate(&DeviceInfo::ivb(), &key, &prog, 8);
        assert!(prog_data.uses_kill);

        let cmp = s
            .instrs
            .iter()
            .find(|i| i.opcode == Opcode::Cmp)
            .unwrap();
        assert_eq!(cmp.cmod, CondMod::GE);
        assert_eq!(cmp.srcs[1].f32(), 0.25);
        assert_eq!(cmp.flag_subreg, 1);

        /* Ivy Bridge takes the mask from the header instead */
        assert!(s.instrs.last().unwrap().predicate.is_none());
    }

    #[test]
    fn unsupported_call_fails() {
        let mut prog = Program::new();
        color_out(&mut prog);
        prog.main.push(Stmt::Call {
            callee: "helper".into(),
        });

        let (s, _) =
            translate(&DeviceInfo::ivb(), &WmProgKey::default(), &prog, 8);
        assert_eq!(
            s.error,
            Some(CompileError::Unsupported("unsupported function call".into()))
        );
    }

    #[test]
    fn variable_indexing_fails() {
        let mut prog = Program::new();
        let out = color_out(&mut prog);
        let arr = prog.add_var(Variable::uniform(
            "arr",
            Type::array(Type::vec(BaseType::Float, 4), 4),
            0,
        ));
        let idx = prog.add_var(Variable::uniform("i", Type::int(), 16));
        prog.main.push(Stmt::assign(
            Deref::var(out),
            Rvalue::deref(Deref::var(arr).index(Rvalue::var(idx))),
        ));

        let (s, _) =
            translate(&DeviceInfo::ivb(), &WmProgKey::default(), &prog, 8);
        assert_eq!(
            s.error,
            Some(CompileError::Unsupported(
                "variable indexing unsupported".into()
            ))
        );
    }

    #[test]
    fn break_outside_loop_fails() {
        let mut prog = Program::new();
        color_out(&mut prog);
        prog.main.push(Stmt::Break);

        let (s, _) =
            translate(&DeviceInfo::ivb(), &WmProgKey::default(), &prog, 8);
        assert!(s.failed());
    }

    #[test]
    fn multiply_add_fuses() {
        let mut prog = Program::new();
        let out = color_out(&mut prog);
        let vec4 = Type::vec(BaseType::Float, 4);
        let a = prog.add_var(Variable::uniform("a", vec4.clone(), 0));
        let b = prog.add_var(Variable::uniform("b", vec4.clone(), 4));
        let c = prog.add_var(Variable::uniform("c", vec4.clone(), 8));
        prog.main.push(Stmt::assign(
            Deref::var(out),
            Rvalue::binop(
                ExprOp::Add,
                vec4.clone(),
                Rvalue::binop(
                    ExprOp::Mul,
                    vec4.clone(),
                    Rvalue::var(a),
                    Rvalue::var(b),
                ),
                Rvalue::var(c),
            ),
        ));

        let (s, _) =
            translate(&DeviceInfo::snb(), &WmProgKey::default(), &prog, 8);
        assert!(!s.failed());
        assert_eq!(s.uniforms, 12);
        assert_eq!(count(&s, Opcode::Mad), 4);
        assert_eq!(count(&s, Opcode::Mul), 0);

        let mad = s.instrs.iter().find(|i| i.opcode == Opcode::Mad).unwrap();
        assert_eq!(mad.srcs[0], FsReg::uniform(8, RegType::F));
    }

    #[test]
    fn gen6_depth_write_blocks_simd16() {
        let mut prog = Program::new();
        let depth = prog.add_var(Variable::output(
            "gl_FragDepth",
            Type::float(),
            FRAG_RESULT_DEPTH,
        ));
        prog.main
            .push(Stmt::assign(Deref::var(depth), Rvalue::constant_f(0.5)));

        let (s, prog_data) =
            translate(&DeviceInfo::snb(), &WmProgKey::default(), &prog, 8);
        assert!(!s.failed());
        assert!(s.simd16_unsupported);
        assert!(prog_data.computed_depth);

        let (s, _) =
            translate(&DeviceInfo::snb(), &WmProgKey::default(), &prog, 16);
        assert!(matches!(s.error, Some(CompileError::Simd16Unsupported(_))));
    }

    #[test]
    fn if_uses_comparison_flag() {
        let mut prog = Program::new();
        let out = color_out(&mut prog);
        let x = prog.add_var(Variable::uniform("x", Type::float(), 0));
        prog.main.push(Stmt::if_else(
            Rvalue::binop(
                ExprOp::Less,
                Type::bool(),
                Rvalue::var(x),
                Rvalue::constant_f(0.5),
            ),
            vec![Stmt::Discard { condition: None }],
            vec![Stmt::assign(
                Deref::var(out),
                Rvalue::constant_vec_f(&[1.0; 4]),
            )],
        ));

        let (s, _) =
            translate(&DeviceInfo::bdw(), &WmProgKey::default(), &prog, 8);
        assert!(!s.failed());

        let if_ip = s.instrs.iter().position(|i| i.opcode == Opcode::If).unwrap();
        let cmp = &s.instrs[if_ip - 1];
        assert_eq!(cmp.opcode, Opcode::Cmp);
        assert_eq!(cmp.cmod, CondMod::L);
        assert!(cmp.dst.is_null());
        assert_eq!(s.instrs[if_ip].predicate, Predicate::Normal);
        assert_eq!(count(&s, Opcode::Else), 1);
        assert_eq!(count(&s, Opcode::Endif), 1);
    }

    #[test]
    fn texture_swizzle_and_offset() {
        let mut prog = Program::new();
        let out = color_out(&mut prog);
        let tex = prog.add_var(Variable::uniform(
            "tex",
            Type::sampler(SamplerDim::Dim2D, false),
            1,
        ));
        prog.main.push(Stmt::assign(
            Deref::var(out),
            Rvalue::texture(TexOp::Tex, Deref::var(tex))
                .coordinate(Rvalue::constant_vec_f(&[0.5, 0.5]))
                .offset(Rvalue::constant_vec_i(&[1, -1]))
                .build(Type::vec(BaseType::Float, 4)),
        ));

        let mut key = WmProgKey::default();
        /* Swap red and blue, force alpha to one */
        key.tex.swizzles[1] = 2 | (1 << 3) | (0 << 6) | (SWIZZLE_ONE << 9);
        let (s, _) = translate(&DeviceInfo::ivb(), &key, &prog, 8);
        assert!(!s.failed());

        let tex = s
            .instrs
            .iter()
            .position(|i| i.opcode == Opcode::TexLogical)
            .unwrap();
        let t = &s.instrs[tex];
        assert_eq!(t.offset, (1 << 8) | (0xf << 4));
        assert_eq!(t.rlen, 4);
        assert_eq!(t.srcs[TEX_LOGICAL_SRC_SAMPLER].u32(), 1);
        assert_eq!(t.srcs[TEX_LOGICAL_SRC_COORD_COMPONENTS].u32(), 2);

        let swizzled = &s.instrs[tex + 1..tex + 5];
        assert_eq!(swizzled[0].srcs[0].reg_offset, t.dst.reg_offset + 2);
        assert_eq!(swizzled[3].srcs[0].f32(), 1.0);
    }
}
