/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

use crate::encode::Generator;
use crate::glsl::{Program, VARYING_SLOT_MAX};
use crate::ir::Shader;
use crate::optimize::run_fs;
use crate::{GetDebugFlags, DEBUG};

use log::{debug, warn};
use std::cell::RefCell;
use thiserror::Error;

/// Number of texture units a key carries swizzle state for
pub const MAX_SAMPLERS: usize = 32;

/// Hardware description of the target part
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeviceInfo {
    pub gen: u32,
    pub is_ivybridge: bool,
    pub is_baytrail: bool,
    pub is_haswell: bool,
    pub is_cherryview: bool,
    pub has_pln: bool,
    pub needs_unlit_centroid_workaround: bool,
    pub max_wm_threads: u32,
}

impl DeviceInfo {
    fn gen6(max_wm_threads: u32) -> DeviceInfo {
        DeviceInfo {
            gen: 6,
            is_ivybridge: false,
            is_baytrail: false,
            is_haswell: false,
            is_cherryview: false,
            has_pln: true,
            needs_unlit_centroid_workaround: true,
            max_wm_threads: max_wm_threads,
        }
    }

    pub fn snb() -> DeviceInfo {
        DeviceInfo::gen6(80)
    }

    pub fn ivb() -> DeviceInfo {
        DeviceInfo {
            gen: 7,
            is_ivybridge: true,
            max_wm_threads: 172,
            ..DeviceInfo::gen6(0)
        }
    }

    pub fn byt() -> DeviceInfo {
        DeviceInfo {
            gen: 7,
            is_baytrail: true,
            max_wm_threads: 48,
            ..DeviceInfo::gen6(0)
        }
    }

    pub fn hsw() -> DeviceInfo {
        DeviceInfo {
            gen: 7,
            is_haswell: true,
            needs_unlit_centroid_workaround: false,
            max_wm_threads: 204,
            ..DeviceInfo::gen6(0)
        }
    }

    pub fn bdw() -> DeviceInfo {
        DeviceInfo {
            gen: 8,
            needs_unlit_centroid_workaround: false,
            max_wm_threads: 384,
            ..DeviceInfo::gen6(0)
        }
    }

    pub fn chv() -> DeviceInfo {
        DeviceInfo {
            is_cherryview: true,
            max_wm_threads: 128,
            ..DeviceInfo::bdw()
        }
    }

    /// A representative part of the given generation
    pub fn from_gen(gen: u32) -> Result<DeviceInfo, CompileError> {
        match gen {
            6 => Ok(DeviceInfo::snb()),
            7 => Ok(DeviceInfo::ivb()),
            8 => Ok(DeviceInfo::bdw()),
            _ => Err(CompileError::UnsupportedGen(gen)),
        }
    }

    /// Returns true for Ivy Bridge class Gen7 parts (not Haswell)
    pub fn is_gen7_ivb_class(&self) -> bool {
        self.gen == 7 && !self.is_haswell
    }
}

/// The comparison used by the alpha test
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CompareFunc {
    Never,
    Less,
    Equal,
    LEqual,
    Greater,
    NotEqual,
    GEqual,
    Always,
}

/// Per texture unit state baked into the program
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SamplerProgKey {
    /// Packed 3-bit swizzles, one per channel, as in `SWIZZLE_XYZW`
    pub swizzles: [u16; MAX_SAMPLERS],
    /// Units which emulate GL_CLAMP on the s, t and r coordinates
    pub gl_clamp_mask: [u32; 3],
}

/// Identity swizzle: X, Y, Z, W in three bits each
pub const SWIZZLE_XYZW: u16 = 0 | (1 << 3) | (2 << 6) | (3 << 9);
pub const SWIZZLE_ZERO: u16 = 4;
pub const SWIZZLE_ONE: u16 = 5;

impl Default for SamplerProgKey {
    fn default() -> Self {
        SamplerProgKey {
            swizzles: [SWIZZLE_XYZW; MAX_SAMPLERS],
            gl_clamp_mask: [0; 3],
        }
    }
}

impl SamplerProgKey {
    pub fn swizzle_channel(&self, unit: usize, chan: usize) -> u16 {
        (self.swizzles[unit] >> (3 * chan)) & 7
    }
}

/// State the fragment program is specialized on
#[derive(Clone, Debug, PartialEq)]
pub struct WmProgKey {
    pub nr_color_regions: u32,
    pub flat_shade: bool,
    pub render_to_fbo: bool,
    pub drawable_height: u32,
    pub tex: SamplerProgKey,
    pub alpha_test_func: Option<CompareFunc>,
    pub alpha_test_ref: f32,
    pub clamp_fragment_color: bool,
    pub replicate_alpha: bool,
    pub high_quality_derivatives: bool,
    /// Varying slots written by the previous stage
    pub input_slots_valid: u64,
}

impl Default for WmProgKey {
    fn default() -> Self {
        WmProgKey {
            nr_color_regions: 1,
            flat_shade: false,
            render_to_fbo: false,
            drawable_height: 0,
            tex: SamplerProgKey::default(),
            alpha_test_func: None,
            alpha_test_ref: 0.0,
            clamp_fragment_color: false,
            replicate_alpha: false,
            high_quality_derivatives: false,
            input_slots_valid: 0,
        }
    }
}

/// Surface indices assigned to the program
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BindingTableLayout {
    pub render_target_start: u32,
    pub texture_start: u32,
    pub gather_texture_start: u32,
    pub ubo_start: u32,
    pub image_start: u32,
    pub pull_constants_start: u32,
    pub size_bytes: u32,
}

/// Hands out contiguous ranges of binding table entries
#[derive(Debug, Default)]
pub struct BindingTable {
    next: u32,
}

impl BindingTable {
    pub fn new() -> BindingTable {
        BindingTable { next: 0 }
    }

    /// Reserves `count` entries and returns the first one
    pub fn assign(&mut self, count: u32) -> u32 {
        let start = self.next;
        self.next += count;
        start
    }

    pub fn size(&self) -> u32 {
        self.next
    }

    /// Lays out the table for `prog`: render targets first, then textures,
    /// gather textures (Gen6-7 only), buffers, images and the pull constant
    /// buffer.
    pub fn layout(
        devinfo: &DeviceInfo,
        key: &WmProgKey,
        prog: &Program,
    ) -> BindingTableLayout {
        let mut bt = BindingTable::new();
        let mut layout = BindingTableLayout::default();

        /* With no color regions we still write to a null renderbuffer */
        layout.render_target_start =
            bt.assign(std::cmp::max(key.nr_color_regions, 1));

        let num_textures = prog.num_texture_units();
        layout.texture_start = bt.assign(num_textures);
        layout.gather_texture_start = if prog.uses_gather() && devinfo.gen < 8
        {
            bt.assign(num_textures)
        } else {
            layout.texture_start
        };
        layout.ubo_start = bt.assign(prog.num_buffers());
        layout.image_start = bt.assign(prog.num_images());
        layout.pull_constants_start = bt.assign(1);
        layout.size_bytes = bt.size() * 4;
        layout
    }
}

/// Everything the driver needs to program the pixel shader state
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WmProgData {
    pub binding_table: BindingTableLayout,

    /// Number of push constant components
    pub nr_params: u32,
    /// Caller parameter index for each push constant component
    pub param: Vec<u32>,
    /// Caller parameter index for each pull constant component
    pub pull_param: Vec<u32>,
    pub curb_read_length: u32,

    /// URB setup slot for every varying slot read by the program
    pub urb_setup: Vec<Option<u32>>,
    pub num_varying_inputs: u32,

    pub dispatch_grf_start_reg: u32,
    pub dispatch_grf_start_reg_16: u32,
    pub reg_blocks: u32,
    pub reg_blocks_16: u32,
    pub total_scratch: u32,

    pub uses_kill: bool,
    pub computed_depth: bool,
    pub uses_src_depth: bool,
    pub uses_src_w: bool,
    pub dual_src_blend: bool,
    pub barycentric_interp_modes: u32,
    pub no_8: bool,

    /// Byte offset of the SIMD16 program, zero if there is none
    pub prog_offset_16: u32,
}

impl WmProgData {
    pub fn new() -> WmProgData {
        WmProgData {
            urb_setup: vec![None; VARYING_SLOT_MAX],
            ..Default::default()
        }
    }

    pub fn nr_pull_params(&self) -> u32 {
        self.pull_param.len() as u32
    }
}

#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CompileError {
    #[error("FS compile failed: {0}")]
    Unsupported(String),
    #[error("FS compile failed: SIMD16 unsupported: {0}")]
    Simd16Unsupported(String),
    #[error(
        "FS compile failed: Failure to register allocate at SIMD{dispatch_width}.  \
         Reduce number of live scalar values to avoid this."
    )]
    RegAlloc { dispatch_width: u8 },
    #[error(
        "FS compile failed: message length {mlen} exceeds the maximum of {max}"
    )]
    MessageTooLong { mlen: u32, max: u32 },
    #[error("unsupported hardware generation {0}")]
    UnsupportedGen(u32),
}

/// Collects performance warnings raised while compiling
#[derive(Debug, Default)]
pub struct Diagnostics {
    msgs: RefCell<Vec<String>>,
}

impl Diagnostics {
    pub fn perf(&self, msg: impl Into<String>) {
        let msg = msg.into();
        warn!("FS: {}", msg);
        self.msgs.borrow_mut().push(msg);
    }

    pub fn messages(&self) -> Vec<String> {
        self.msgs.borrow().clone()
    }
}

/// Read-only state shared by every stage of one compile
pub struct CompileContext<'a> {
    pub devinfo: &'a DeviceInfo,
    pub key: &'a WmProgKey,
    pub binding_table: BindingTableLayout,
    pub diag: Diagnostics,
}

impl<'a> CompileContext<'a> {
    pub fn new(
        devinfo: &'a DeviceInfo,
        key: &'a WmProgKey,
        prog: &Program,
    ) -> CompileContext<'a> {
        CompileContext {
            devinfo: devinfo,
            key: key,
            binding_table: BindingTable::layout(devinfo, key, prog),
            diag: Diagnostics::default(),
        }
    }
}

/// A compiled pixel shader
#[derive(Clone, Debug)]
pub struct CompiledFs {
    /// Native instruction words; SIMD16 code starts at
    /// `prog_data.prog_offset_16`
    pub program: Vec<u32>,
    pub prog_data: WmProgData,
    pub diagnostics: Vec<String>,
}

impl CompiledFs {
    pub fn size_bytes(&self) -> usize {
        self.program.len() * 4
    }
}

/// Compiles `prog` into SIMD8 and, when possible, SIMD16 native code
pub fn compile_fs(
    devinfo: &DeviceInfo,
    key: &WmProgKey,
    prog: &Program,
) -> Result<CompiledFs, CompileError> {
    if !(6..=8).contains(&devinfo.gen) {
        return Err(CompileError::UnsupportedGen(devinfo.gen));
    }

    let ctx = CompileContext::new(devinfo, key, prog);
    let mut prog_data = WmProgData::new();
    prog_data.binding_table = ctx.binding_table.clone();

    let simd8 = run_fs(&ctx, prog, 8, &mut prog_data, None)?;

    let mut simd16: Option<Shader> = None;
    if DEBUG.no16() {
        debug!("SIMD16 compile disabled by BRW_DEBUG");
    } else if simd8.simd16_unsupported {
        let why = simd8.no16_msg.as_deref().unwrap_or("unknown reason");
        ctx.diag.perf(format!("SIMD16 shader failed to compile: {}", why));
    } else {
        match run_fs(&ctx, prog, 16, &mut prog_data, Some(&simd8)) {
            Ok(s) => simd16 = Some(s),
            Err(err) => ctx
                .diag
                .perf(format!("SIMD16 shader failed to compile: {}", err)),
        }
    }
    prog_data.no_8 = false;

    let mut program = Vec::new();
    let mut offset_16 = 0;
    {
        let mut gen = Generator::new(&ctx, &prog_data, &mut program);
        gen.generate_code(&simd8)?;
        if let Some(s) = &simd16 {
            offset_16 = gen.generate_code(s)?;
        }
    }
    prog_data.prog_offset_16 = offset_16;

    if DEBUG.wm() {
        debug!(
            "FS compiled: {} bytes, SIMD16 {}",
            program.len() * 4,
            if simd16.is_some() { "yes" } else { "no" }
        );
    }

    Ok(CompiledFs {
        program: program,
        prog_data: prog_data,
        diagnostics: ctx.diag.messages(),
    })
}
