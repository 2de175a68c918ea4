/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

use crate::api::{CompileContext, CompileError, DeviceInfo, WmProgData};
use crate::from_glsl::emit_fs;
use crate::glsl::{Program, VARYING_SLOT_POS};
use crate::ir::*;
use crate::payload::*;
use crate::{GetDebugFlags, DEBUG};

use log::debug;

/// Smallest scratch allocation the hardware takes, in bytes
const MIN_SCRATCH_SIZE: u32 = 1024;

fn dump_pass(s: &Shader, iteration: u32, pass: &str, progress: bool) {
    if progress && DEBUG.optimizer() {
        debug!(
            "SIMD{} IR after {} (iteration {}):\n{}",
            s.dispatch_width, pass, iteration, s
        );
    }
}

/// Runs `$pass` on `$s`, dumping the IR when it made progress
macro_rules! opt {
    ($s:expr, $iteration:expr, $pass:ident $(, $arg:expr)*) => {{
        let progress = $s.$pass($($arg),*);
        dump_pass($s, $iteration, stringify!($pass), progress);
        progress
    }};
}

/// Register blocks of 16 GRFs, less one, as the thread dispatch state
/// wants them
pub fn register_blocks(grf_used: u32) -> u32 {
    grf_used.next_multiple_of(16) / 16 - 1
}

/// Per-thread scratch space for `last_scratch` bytes of spills
pub fn scratch_size(last_scratch: u32) -> u32 {
    std::cmp::max(MIN_SCRATCH_SIZE, last_scratch.next_power_of_two())
}

/// Gives three-source instructions a real destination
///
/// The three-source encodings have no way to name the null register, so
/// results nobody reads go to a throwaway temporary instead.
fn fixup_3src_null_dest(s: &mut Shader) {
    for instr in s.instrs.iter_mut() {
        if !instr.opcode.is_three_src() || !instr.dst.is_null() {
            continue;
        }
        let bytes = u32::from(instr.exec_size) * instr.dst.ty.size();
        let regs = std::cmp::max(bytes / REG_SIZE, 1);
        instr.dst = FsReg::vgrf(s.alloc.allocate(regs), instr.dst.ty);
    }
}

fn check(s: &Shader) -> Result<(), CompileError> {
    match &s.error {
        Some(err) => Err(err.clone()),
        None => Ok(()),
    }
}

/// One round of every optimization pass, returning whether any of them
/// changed the shader
fn optimize_iteration(
    devinfo: &DeviceInfo,
    s: &mut Shader,
    iteration: u32,
) -> bool {
    let mut progress = false;

    progress |= opt!(s, iteration, remove_duplicate_mrf_writes);
    progress |= opt!(s, iteration, opt_algebraic);
    progress |= opt!(s, iteration, opt_cse);
    progress |= opt!(s, iteration, opt_copy_propagate, devinfo);
    progress |= opt!(s, iteration, opt_peephole_predicated_break);
    progress |= opt!(s, iteration, opt_cmod_propagation);
    progress |= opt!(s, iteration, opt_dead_code_eliminate);
    progress |= opt!(s, iteration, opt_peephole_sel);
    progress |= opt!(s, iteration, dead_control_flow_eliminate);
    progress |= opt!(s, iteration, opt_redundant_discard_jumps);
    progress |= opt!(s, iteration, opt_saturate_propagation);
    progress |= opt!(s, iteration, register_coalesce);
    progress |= opt!(s, iteration, compute_to_mrf, devinfo);
    progress |= opt!(s, iteration, compact_virtual_grfs);

    progress
}

/// Lowers and optimizes the virtual IR until it only holds instructions
/// the generator can encode
pub fn optimize(ctx: &CompileContext, prog_data: &WmProgData, s: &mut Shader) {
    let devinfo = ctx.devinfo;
    let mut iteration = 0;

    s.split_virtual_grfs();

    opt!(s, iteration, lower_simd_width, devinfo);
    opt!(s, iteration, lower_logical_sends, ctx, prog_data);
    if s.failed() {
        return;
    }

    loop {
        iteration += 1;
        if !optimize_iteration(devinfo, s, iteration) {
            break;
        }
    }

    if opt!(s, iteration, lower_load_payload) {
        s.split_virtual_grfs();
        opt!(s, iteration, register_coalesce);
        opt!(s, iteration, compute_to_mrf, devinfo);
        opt!(s, iteration, opt_dead_code_eliminate);
    }

    opt!(s, iteration, lower_integer_multiplication, devinfo);
    s.lower_uniform_pull_constant_loads(devinfo);
}

/// Builds the virtual IR for `prog` and lays out its constants
fn emit(
    ctx: &CompileContext,
    prog: &Program,
    dispatch_width: u8,
    prog_data: &mut WmProgData,
    simd8: Option<&Shader>,
) -> Result<Shader, CompileError> {
    let devinfo = ctx.devinfo;
    let mut s = Shader::new(dispatch_width);

    let reads_pos = prog.inputs_read() & (1 << VARYING_SLOT_POS) != 0;
    prog_data.uses_src_depth = reads_pos;
    prog_data.uses_src_w = reads_pos;
    prog_data.barycentric_interp_modes =
        compute_barycentric_interp_modes(devinfo, ctx.key, prog);
    calculate_urb_setup(ctx.key, prog, prog_data);
    s.payload = ThreadPayload::setup_gen6(
        dispatch_width,
        prog_data.barycentric_interp_modes,
        reads_pos,
    );

    emit_fs(ctx, prog, prog_data, &mut s);
    check(&s)?;

    match simd8 {
        Some(simd8) => s.import_constant_locations(simd8),
        None => s.assign_constant_locations(prog_data),
    }
    s.demote_pull_constants(ctx.binding_table.pull_constants_start);

    Ok(s)
}

/// Compiles `prog` down to allocated hardware registers at
/// `dispatch_width`
///
/// The SIMD16 compile reuses the push constant layout of `simd8`.
pub fn run_fs(
    ctx: &CompileContext,
    prog: &Program,
    dispatch_width: u8,
    prog_data: &mut WmProgData,
    simd8: Option<&Shader>,
) -> Result<Shader, CompileError> {
    let mut s = emit(ctx, prog, dispatch_width, prog_data, simd8)?;

    optimize(ctx, prog_data, &mut s);
    check(&s)?;

    s.assign_curb_setup(prog_data);
    s.assign_urb_setup(prog_data);

    fixup_3src_null_dest(&mut s);
    s.allocate_registers(ctx);
    check(&s)?;

    if s.last_scratch > 0 {
        prog_data.total_scratch = std::cmp::max(
            prog_data.total_scratch,
            scratch_size(s.last_scratch),
        );
    }

    let reg_blocks = register_blocks(s.grf_used);
    if dispatch_width == 8 {
        prog_data.reg_blocks = reg_blocks;
    } else {
        prog_data.reg_blocks_16 = reg_blocks;
    }

    if DEBUG.wm() {
        debug!("SIMD{} final IR:\n{}", dispatch_width, s);
    }

    Ok(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::WmProgKey;
    use crate::glsl::*;

    fn color_out(prog: &mut Program) -> VarId {
        prog.add_var(Variable::output(
            "color",
            Type::vec(BaseType::Float, 4),
            FRAG_RESULT_DATA0,
        ))
    }

    fn only_hw_regs(s: &Shader) -> bool {
        s.instrs.iter().all(|i| {
            std::iter::once(&i.dst).chain(i.srcs.iter()).all(|r| {
                !matches!(
                    r.file,
                    RegFile::Vgrf | RegFile::Uniform | RegFile::Attr
                )
            })
        })
    }

    #[test]
    fn register_block_counts() {
        assert_eq!(register_blocks(1), 0);
        assert_eq!(register_blocks(16), 0);
        assert_eq!(register_blocks(17), 1);
        assert_eq!(register_blocks(MAX_GRF), 7);
    }

    #[test]
    fn scratch_rounding() {
        assert_eq!(scratch_size(32), 1024);
        assert_eq!(scratch_size(1024), 1024);
        assert_eq!(scratch_size(1056), 2048);
    }

    #[test]
    fn three_src_null_dest_replaced() {
        let mut s = Shader::new(16);
        let [a, b, c] = [
            s.vgrf(RegType::F, 1),
            s.vgrf(RegType::F, 1),
            s.vgrf(RegType::F, 1),
        ];
        s.mad(FsReg::null(RegType::F), a, b, c);
        s.add(FsReg::null(RegType::F), a, b);

        let vgrfs = s.alloc.count();
        fixup_3src_null_dest(&mut s);

        assert_eq!(s.instrs[0].dst.file, RegFile::Vgrf);
        assert_eq!(s.instrs[0].dst.nr, vgrfs);
        assert_eq!(s.alloc.size(vgrfs), 2);
        assert!(s.instrs[1].dst.is_null());
    }

    #[test]
    fn constant_color_compiles() {
        let _ = env_logger::builder().is_test(true).try_init();

        let mut prog = Program::new();
        let out = color_out(&mut prog);
        prog.main.push(Stmt::assign(
            Deref::var(out),
            Rvalue::constant_vec_f(&[1.0, 0.0, 0.0, 1.0]),
        ));

        let devinfo = DeviceInfo::hsw();
        let key = WmProgKey::default();
        let ctx = CompileContext::new(&devinfo, &key, &prog);
        let mut prog_data = WmProgData::new();
        let s = run_fs(&ctx, &prog, 8, &mut prog_data, None).unwrap();

        assert!(only_hw_regs(&s));
        assert!(!s.instrs.iter().any(|i| i.opcode.is_logical()));

        let fb = s.instrs.last().unwrap();
        assert_eq!(fb.opcode, Opcode::FbWrite);
        assert!(fb.eot);

        assert_eq!(prog_data.dispatch_grf_start_reg, 2);
        assert_eq!(prog_data.reg_blocks, register_blocks(s.grf_used));
        assert_eq!(prog_data.total_scratch, 0);
    }

    #[test]
    fn simd16_shares_push_constants() {
        let mut prog = Program::new();
        let tint = prog.add_var(Variable::uniform(
            "tint",
            Type::vec(BaseType::Float, 4),
            0,
        ));
        let out = color_out(&mut prog);
        prog.main.push(Stmt::assign(Deref::var(out), Rvalue::var(tint)));

        let devinfo = DeviceInfo::ivb();
        let key = WmProgKey::default();
        let ctx = CompileContext::new(&devinfo, &key, &prog);
        let mut prog_data = WmProgData::new();

        let simd8 = run_fs(&ctx, &prog, 8, &mut prog_data, None).unwrap();
        assert_eq!(prog_data.nr_params, 4);
        assert_eq!(prog_data.curb_read_length, 1);

        let simd16 =
            run_fs(&ctx, &prog, 16, &mut prog_data, Some(&simd8)).unwrap();
        assert_eq!(simd16.push_constant_loc, simd8.push_constant_loc);
        assert_eq!(prog_data.dispatch_grf_start_reg_16, 2);
        assert!(only_hw_regs(&simd16));
    }

    #[test]
    fn optimizer_settles() {
        let mut prog = Program::new();
        let out = color_out(&mut prog);
        let vec4 = Type::vec(BaseType::Float, 4);
        let a = prog.add_var(Variable::uniform("a", vec4.clone(), 0));
        let b = prog.add_var(Variable::uniform("b", vec4.clone(), 4));
        let x = prog.add_var(Variable::uniform("x", Type::float(), 8));
        let sum = Rvalue::binop(
            ExprOp::Add,
            vec4.clone(),
            Rvalue::binop(
                ExprOp::Mul,
                vec4.clone(),
                Rvalue::var(a),
                Rvalue::constant_vec_f(&[1.0; 4]),
            ),
            Rvalue::var(b),
        );
        prog.main.push(Stmt::if_else(
            Rvalue::binop(
                ExprOp::Less,
                Type::bool(),
                Rvalue::var(x),
                Rvalue::constant_f(0.5),
            ),
            vec![Stmt::assign(Deref::var(out), sum)],
            vec![Stmt::assign(Deref::var(out), Rvalue::var(a))],
        ));

        for devinfo in [DeviceInfo::snb(), DeviceInfo::hsw()] {
            let key = WmProgKey::default();
            let ctx = CompileContext::new(&devinfo, &key, &prog);
            let mut prog_data = WmProgData::new();
            let mut s = emit(&ctx, &prog, 8, &mut prog_data, None).unwrap();
            s.split_virtual_grfs();
            s.lower_simd_width(&devinfo);
            s.lower_logical_sends(&ctx, &prog_data);

            let mut iteration = 0;
            while optimize_iteration(&devinfo, &mut s, iteration) {
                iteration += 1;
                assert!(iteration < 100);
            }

            /* Another round finds nothing and leaves the IR alone */
            let before = s.to_string();
            assert!(!optimize_iteration(&devinfo, &mut s, iteration));
            assert_eq!(s.to_string(), before);
        }
    }

    #[test]
    fn frontend_errors_propagate() {
        let mut prog = Program::new();
        color_out(&mut prog);
        prog.main.push(Stmt::Call {
            callee: "helper".into(),
        });

        let devinfo = DeviceInfo::snb();
        let key = WmProgKey::default();
        let ctx = CompileContext::new(&devinfo, &key, &prog);
        let mut prog_data = WmProgData::new();
        let res = run_fs(&ctx, &prog, 8, &mut prog_data, None);
        assert!(matches!(res, Err(CompileError::Unsupported(_))));
    }
}
