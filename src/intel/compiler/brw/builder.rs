/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

use crate::ir::*;

pub trait Builder {
    fn push_instr(&mut self, instr: Box<Instr>) -> &mut Instr;

    /// Execution size given to new instructions
    fn exec_size(&self) -> u8;

    /// First channel of new instructions
    fn group(&self) -> u8;

    fn is_exec_all(&self) -> bool;

    fn emit(
        &mut self,
        opcode: Opcode,
        dst: FsReg,
        srcs: &[FsReg],
    ) -> &mut Instr {
        let mut instr = Instr::new_boxed(opcode, self.exec_size(), dst, srcs);
        instr.group = self.group();
        instr.force_writemask_all = self.is_exec_all();
        self.push_instr(instr)
    }

    /// Returns a builder which emits at `exec_size` starting at channel
    /// `group`
    fn group_builder(
        &mut self,
        exec_size: u8,
        group: u8,
    ) -> ScopedBuilder<'_, Self>
    where
        Self: Sized,
    {
        let exec_all = self.is_exec_all();
        ScopedBuilder {
            b: self,
            exec_size: exec_size,
            group: group,
            exec_all: exec_all,
            pred: Predicate::None,
            pred_inv: false,
            flag_subreg: 0,
        }
    }

    /// Returns a builder for eight-wide half `i` of the current width
    fn half(&mut self, i: u8) -> ScopedBuilder<'_, Self>
    where
        Self: Sized,
    {
        assert!(self.exec_size() == 16 && i < 2);
        let group = self.group() + 8 * i;
        self.group_builder(8, group)
    }

    /// Returns a builder whose instructions ignore the channel enables
    fn exec_all_builder(&mut self) -> ScopedBuilder<'_, Self>
    where
        Self: Sized,
    {
        let (exec_size, group) = (self.exec_size(), self.group());
        self.group_builder(exec_size, group).with_exec_all()
    }

    fn predicate(&mut self, pred: Predicate) -> ScopedBuilder<'_, Self>
    where
        Self: Sized,
    {
        let (exec_size, group) = (self.exec_size(), self.group());
        self.group_builder(exec_size, group)
            .with_predicate(pred, false, 0)
    }

    /// Advances `reg` by `n` components of this builder's width
    fn offset(&self, reg: FsReg, n: u32) -> FsReg {
        match reg.file {
            RegFile::Uniform | RegFile::Attr => reg.offset(n),
            RegFile::Imm | RegFile::Bad | RegFile::Arf => reg,
            RegFile::Vgrf | RegFile::Grf | RegFile::Mrf => {
                let bytes = u32::from(self.exec_size())
                    * reg.ty.size()
                    * u32::from(std::cmp::max(reg.stride, 1));
                reg.offset(n * bytes.div_ceil(REG_SIZE))
            }
        }
    }

    fn mov(&mut self, dst: FsReg, src: FsReg) -> &mut Instr {
        self.emit(Opcode::Mov, dst, &[src])
    }

    fn sel(&mut self, dst: FsReg, x: FsReg, y: FsReg) -> &mut Instr {
        self.emit(Opcode::Sel, dst, &[x, y])
    }

    fn not(&mut self, dst: FsReg, x: FsReg) -> &mut Instr {
        self.emit(Opcode::Not, dst, &[x])
    }

    fn and(&mut self, dst: FsReg, x: FsReg, y: FsReg) -> &mut Instr {
        self.emit(Opcode::And, dst, &[x, y])
    }

    fn or(&mut self, dst: FsReg, x: FsReg, y: FsReg) -> &mut Instr {
        self.emit(Opcode::Or, dst, &[x, y])
    }

    fn xor(&mut self, dst: FsReg, x: FsReg, y: FsReg) -> &mut Instr {
        self.emit(Opcode::Xor, dst, &[x, y])
    }

    fn shl(&mut self, dst: FsReg, x: FsReg, y: FsReg) -> &mut Instr {
        self.emit(Opcode::Shl, dst, &[x, y])
    }

    fn shr(&mut self, dst: FsReg, x: FsReg, y: FsReg) -> &mut Instr {
        self.emit(Opcode::Shr, dst, &[x, y])
    }

    fn asr(&mut self, dst: FsReg, x: FsReg, y: FsReg) -> &mut Instr {
        self.emit(Opcode::Asr, dst, &[x, y])
    }

    fn add(&mut self, dst: FsReg, x: FsReg, y: FsReg) -> &mut Instr {
        self.emit(Opcode::Add, dst, &[x, y])
    }

    fn mul(&mut self, dst: FsReg, x: FsReg, y: FsReg) -> &mut Instr {
        self.emit(Opcode::Mul, dst, &[x, y])
    }

    /// `dst = a + b * c`, in hardware operand order
    fn mad(
        &mut self,
        dst: FsReg,
        a: FsReg,
        b: FsReg,
        c: FsReg,
    ) -> &mut Instr {
        self.emit(Opcode::Mad, dst, &[a, b, c])
    }

    /// `dst = a * b + (1 - a) * c`, in hardware operand order
    fn lrp(
        &mut self,
        dst: FsReg,
        a: FsReg,
        b: FsReg,
        c: FsReg,
    ) -> &mut Instr {
        self.emit(Opcode::Lrp, dst, &[a, b, c])
    }

    fn cmp(
        &mut self,
        dst: FsReg,
        x: FsReg,
        y: FsReg,
        cmod: CondMod,
    ) -> &mut Instr {
        let instr = self.emit(Opcode::Cmp, dst, &[x, y]);
        instr.cmod = cmod;
        instr
    }

    /// SEL with a conditional modifier computes a minimum or maximum
    fn emit_minmax(
        &mut self,
        dst: FsReg,
        x: FsReg,
        y: FsReg,
        cmod: CondMod,
    ) -> &mut Instr {
        let instr = self.sel(dst, x, y);
        instr.cmod = cmod;
        instr
    }

    fn frc(&mut self, dst: FsReg, x: FsReg) -> &mut Instr {
        self.emit(Opcode::Frc, dst, &[x])
    }

    fn rndd(&mut self, dst: FsReg, x: FsReg) -> &mut Instr {
        self.emit(Opcode::Rndd, dst, &[x])
    }

    fn rnde(&mut self, dst: FsReg, x: FsReg) -> &mut Instr {
        self.emit(Opcode::Rnde, dst, &[x])
    }

    fn rndz(&mut self, dst: FsReg, x: FsReg) -> &mut Instr {
        self.emit(Opcode::Rndz, dst, &[x])
    }

    fn load_payload(
        &mut self,
        dst: FsReg,
        srcs: &[FsReg],
        header_size: u8,
    ) -> &mut Instr {
        let instr = self.emit(Opcode::LoadPayload, dst, srcs);
        instr.header_size = header_size;
        instr
    }
}

/// A builder which can allocate virtual registers
pub trait VgrfBuilder: Builder {
    fn alloc_vgrf(&mut self, regs: u32) -> u32;

    /// Allocates storage for `comps` components at this builder's width
    fn vgrf(&mut self, ty: RegType, comps: u32) -> FsReg {
        let comp_regs =
            std::cmp::max(u32::from(self.exec_size()) * ty.size() / REG_SIZE, 1);
        FsReg::vgrf(self.alloc_vgrf(comps * comp_regs), ty)
    }

    /// Copies `src` into a fresh temporary
    fn copy(&mut self, src: FsReg) -> FsReg {
        let dst = self.vgrf(src.ty, 1);
        self.mov(dst, src);
        dst
    }
}

pub struct InstrBuilder {
    instrs: MappedInstrs,
    exec_size: u8,
    group: u8,
    exec_all: bool,
}

impl InstrBuilder {
    pub fn new(exec_size: u8) -> Self {
        Self {
            instrs: MappedInstrs::None,
            exec_size: exec_size,
            group: 0,
            exec_all: false,
        }
    }

    /// A builder emitting with the channel controls of `instr`
    pub fn for_instr(instr: &Instr) -> Self {
        Self {
            instrs: MappedInstrs::None,
            exec_size: instr.exec_size,
            group: instr.group,
            exec_all: instr.force_writemask_all,
        }
    }

    pub fn as_vec(self) -> Vec<Box<Instr>> {
        match self.instrs {
            MappedInstrs::None => Vec::new(),
            MappedInstrs::One(i) => vec![i],
            MappedInstrs::Many(v) => v,
        }
    }

    pub fn as_mapped_instrs(self) -> MappedInstrs {
        self.instrs
    }
}

impl Builder for InstrBuilder {
    fn push_instr(&mut self, instr: Box<Instr>) -> &mut Instr {
        self.instrs.push(instr);
        self.instrs.last_mut().unwrap().as_mut()
    }

    fn exec_size(&self) -> u8 {
        self.exec_size
    }

    fn group(&self) -> u8 {
        self.group
    }

    fn is_exec_all(&self) -> bool {
        self.exec_all
    }
}

/// An instruction builder which allocates from a shader's VGRF table
pub struct FsBuilder<'a> {
    b: InstrBuilder,
    alloc: &'a mut VirtualGrfs,
}

impl<'a> FsBuilder<'a> {
    pub fn new(alloc: &'a mut VirtualGrfs, exec_size: u8) -> Self {
        Self {
            b: InstrBuilder::new(exec_size),
            alloc: alloc,
        }
    }

    pub fn for_instr(alloc: &'a mut VirtualGrfs, instr: &Instr) -> Self {
        Self {
            b: InstrBuilder::for_instr(instr),
            alloc: alloc,
        }
    }

    pub fn as_vec(self) -> Vec<Box<Instr>> {
        self.b.as_vec()
    }

    pub fn as_mapped_instrs(self) -> MappedInstrs {
        self.b.as_mapped_instrs()
    }
}

impl<'a> Builder for FsBuilder<'a> {
    fn push_instr(&mut self, instr: Box<Instr>) -> &mut Instr {
        self.b.push_instr(instr)
    }

    fn exec_size(&self) -> u8 {
        self.b.exec_size
    }

    fn group(&self) -> u8 {
        self.b.group
    }

    fn is_exec_all(&self) -> bool {
        self.b.exec_all
    }
}

impl<'a> VgrfBuilder for FsBuilder<'a> {
    fn alloc_vgrf(&mut self, regs: u32) -> u32 {
        self.alloc.allocate(regs)
    }
}

/// Appending to a shader emits at its full dispatch width
impl Builder for Shader {
    fn push_instr(&mut self, instr: Box<Instr>) -> &mut Instr {
        self.instrs.push(instr);
        self.instrs.last_mut().unwrap().as_mut()
    }

    fn exec_size(&self) -> u8 {
        self.dispatch_width
    }

    fn group(&self) -> u8 {
        0
    }

    fn is_exec_all(&self) -> bool {
        false
    }
}

impl VgrfBuilder for Shader {
    fn alloc_vgrf(&mut self, regs: u32) -> u32 {
        self.alloc.allocate(regs)
    }
}

/// Wraps a builder, overriding the channel controls of what it emits
pub struct ScopedBuilder<'a, T: Builder> {
    b: &'a mut T,
    exec_size: u8,
    group: u8,
    exec_all: bool,
    pred: Predicate,
    pred_inv: bool,
    flag_subreg: u8,
}

impl<'a, T: Builder> ScopedBuilder<'a, T> {
    pub fn with_exec_all(mut self) -> Self {
        self.exec_all = true;
        self
    }

    pub fn with_predicate(
        mut self,
        pred: Predicate,
        inverse: bool,
        flag_subreg: u8,
    ) -> Self {
        self.pred = pred;
        self.pred_inv = inverse;
        self.flag_subreg = flag_subreg;
        self
    }
}

impl<'a, T: Builder> Builder for ScopedBuilder<'a, T> {
    fn push_instr(&mut self, instr: Box<Instr>) -> &mut Instr {
        let mut instr = instr;
        if !self.pred.is_none() {
            assert!(instr.predicate.is_none());
            instr.predicate = self.pred;
            instr.predicate_inverse = self.pred_inv;
            instr.flag_subreg = self.flag_subreg;
        }
        self.b.push_instr(instr)
    }

    fn exec_size(&self) -> u8 {
        self.exec_size
    }

    fn group(&self) -> u8 {
        self.group
    }

    fn is_exec_all(&self) -> bool {
        self.exec_all
    }
}

impl<'a, T: VgrfBuilder> VgrfBuilder for ScopedBuilder<'a, T> {
    fn alloc_vgrf(&mut self, regs: u32) -> u32 {
        self.b.alloc_vgrf(regs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halves_and_offsets() {
        let mut alloc = VirtualGrfs::new();
        let mut b = FsBuilder::new(&mut alloc, 16);
        let dst = b.vgrf(RegType::F, 2);
        let src = FsReg::uniform(0, RegType::F);

        let dst1 = b.offset(dst, 1);
        b.half(1).mov(dst1, src);
        let instrs = b.as_vec();
        assert_eq!(alloc.size(0), 4);
        assert_eq!(instrs.len(), 1);
        assert_eq!(instrs[0].exec_size, 8);
        assert_eq!(instrs[0].group, 8);
        assert_eq!(instrs[0].dst.reg_offset, 2);
    }

    #[test]
    fn predicated_exec_all() {
        let mut b = InstrBuilder::new(8);
        let dst = FsReg::vgrf(0, RegType::F);
        b.exec_all_builder()
            .with_predicate(Predicate::Normal, true, 1)
            .mov(dst, FsReg::imm_f(1.0));
        b.cmp(FsReg::null(RegType::F), dst, FsReg::imm_f(0.0), CondMod::GE);
        let instrs = b.as_vec();
        assert!(instrs[0].force_writemask_all);
        assert_eq!(instrs[0].predicate, Predicate::Normal);
        assert!(instrs[0].predicate_inverse);
        assert_eq!(instrs[0].flag_subreg, 1);
        assert_eq!(instrs[1].cmod, CondMod::GE);
        assert!(!instrs[1].force_writemask_all);
    }
}
