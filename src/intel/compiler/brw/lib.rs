/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

//! Fragment shader compiler for Gen6 through Gen8 Intel graphics

mod api;
mod assign_regs;
mod bitset;
mod bitview;
mod builder;
mod cfg;
mod encode;
mod from_glsl;
pub mod glsl;
mod ir;
mod liveness;
mod lower_constants;
mod lower_integer_mul;
mod lower_load_payload;
mod lower_logical_sends;
mod lower_simd_width;
mod opt_algebraic;
mod opt_cmod_prop;
mod opt_compute_to_mrf;
mod opt_control_flow;
mod opt_copy_prop;
mod opt_cse;
mod opt_dce;
mod opt_register_coalesce;
mod opt_saturate_prop;
mod optimize;
mod payload;
mod schedule;
mod split_grfs;

pub use api::{
    compile_fs, BindingTable, BindingTableLayout, CompareFunc, CompileError,
    CompiledFs, DeviceInfo, SamplerProgKey, WmProgData, WmProgKey,
    SWIZZLE_ONE, SWIZZLE_XYZW, SWIZZLE_ZERO,
};

use log::warn;
use std::env;
use std::sync::OnceLock;

#[repr(u8)]
enum DebugFlags {
    No16,
    Optimizer,
    Spill,
    Wm,
    Ann,
}

pub struct Debug {
    flags: u32,
}

impl Debug {
    fn new() -> Debug {
        let debug_var = "BRW_DEBUG";
        let debug_str = match env::var(debug_var) {
            Ok(s) => s,
            Err(_) => {
                return Debug { flags: 0 };
            }
        };

        let mut flags = 0;
        for flag in debug_str.split(',') {
            match flag.trim() {
                "no16" => flags |= 1 << DebugFlags::No16 as u8,
                "optimizer" => flags |= 1 << DebugFlags::Optimizer as u8,
                "spill" => flags |= 1 << DebugFlags::Spill as u8,
                "wm" => flags |= 1 << DebugFlags::Wm as u8,
                "ann" => flags |= 1 << DebugFlags::Ann as u8,
                "" => (),
                unk => warn!("Unknown {} flag found: {}", debug_var, unk),
            }
        }
        Debug { flags: flags }
    }
}

pub trait GetDebugFlags {
    fn debug_flags(&self) -> u32;

    /// Skip the SIMD16 compile
    fn no16(&self) -> bool {
        self.debug_flags() & (1 << DebugFlags::No16 as u8) != 0
    }

    /// Dump the IR after every optimization pass which makes progress
    fn optimizer(&self) -> bool {
        self.debug_flags() & (1 << DebugFlags::Optimizer as u8) != 0
    }

    /// Spill every spillable register
    fn spill(&self) -> bool {
        self.debug_flags() & (1 << DebugFlags::Spill as u8) != 0
    }

    /// Dump the final IR of each compiled width
    fn wm(&self) -> bool {
        self.debug_flags() & (1 << DebugFlags::Wm as u8) != 0
    }

    /// Annotate the emitted code with the IR it came from
    fn ann(&self) -> bool {
        self.debug_flags() & (1 << DebugFlags::Ann as u8) != 0
    }
}

pub static DEBUG: OnceLock<Debug> = OnceLock::new();

impl GetDebugFlags for OnceLock<Debug> {
    fn debug_flags(&self) -> u32 {
        self.get_or_init(Debug::new).flags
    }
}
