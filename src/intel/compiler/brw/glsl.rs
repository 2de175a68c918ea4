/*
 * Copyright © 2022 Collabora, Ltd.
 * SPDX-License-Identifier: MIT
 */

//! The typed shader IR consumed by the compiler
//!
//! This is the already-linked, already-lowered form of a fragment program
//! the front-end hands over: variables with a storage class, and a `main`
//! body of statements over expression trees.

pub type VarId = usize;

pub const VARYING_SLOT_POS: u32 = 0;
pub const VARYING_SLOT_COL0: u32 = 1;
pub const VARYING_SLOT_COL1: u32 = 2;
pub const VARYING_SLOT_FOGC: u32 = 3;
pub const VARYING_SLOT_TEX0: u32 = 4;
pub const VARYING_SLOT_PSIZ: u32 = 12;
pub const VARYING_SLOT_BFC0: u32 = 13;
pub const VARYING_SLOT_BFC1: u32 = 14;
pub const VARYING_SLOT_EDGE: u32 = 15;
pub const VARYING_SLOT_CLIP_VERTEX: u32 = 16;
pub const VARYING_SLOT_CLIP_DIST0: u32 = 17;
pub const VARYING_SLOT_CLIP_DIST1: u32 = 18;
pub const VARYING_SLOT_PRIMITIVE_ID: u32 = 19;
pub const VARYING_SLOT_LAYER: u32 = 20;
pub const VARYING_SLOT_VIEWPORT: u32 = 21;
pub const VARYING_SLOT_FACE: u32 = 22;
pub const VARYING_SLOT_PNTC: u32 = 23;
pub const VARYING_SLOT_VAR0: u32 = 26;
pub const VARYING_SLOT_MAX: usize = VARYING_SLOT_VAR0 as usize + 32;

pub const FRAG_RESULT_DEPTH: u32 = 0;
pub const FRAG_RESULT_STENCIL: u32 = 1;
pub const FRAG_RESULT_COLOR: u32 = 2;
pub const FRAG_RESULT_SAMPLE_MASK: u32 = 3;
pub const FRAG_RESULT_DATA0: u32 = 4;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BaseType {
    Float,
    Int,
    Uint,
    Bool,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SamplerDim {
    Dim1D,
    Dim2D,
    Dim3D,
    Cube,
    Rect,
    Buf,
}

impl SamplerDim {
    /// Number of coordinate components addressing one texel
    pub fn coord_components(&self) -> u32 {
        match self {
            SamplerDim::Dim1D | SamplerDim::Buf => 1,
            SamplerDim::Dim2D | SamplerDim::Rect => 2,
            SamplerDim::Dim3D | SamplerDim::Cube => 3,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Type {
    Void,
    /// Scalars, vectors and column-major matrices
    Numeric {
        base: BaseType,
        vector_elements: u8,
        matrix_columns: u8,
    },
    Sampler {
        dim: SamplerDim,
        shadow: bool,
        array: bool,
    },
    Image {
        dim: SamplerDim,
        array: bool,
    },
    Array(Box<Type>, u32),
    Struct(Vec<(String, Type)>),
}

impl Type {
    pub fn vec(base: BaseType, n: u8) -> Type {
        assert!(n >= 1 && n <= 4);
        Type::Numeric {
            base: base,
            vector_elements: n,
            matrix_columns: 1,
        }
    }

    pub fn float() -> Type {
        Type::vec(BaseType::Float, 1)
    }

    pub fn int() -> Type {
        Type::vec(BaseType::Int, 1)
    }

    pub fn uint() -> Type {
        Type::vec(BaseType::Uint, 1)
    }

    pub fn bool() -> Type {
        Type::vec(BaseType::Bool, 1)
    }

    pub fn mat(columns: u8, rows: u8) -> Type {
        Type::Numeric {
            base: BaseType::Float,
            vector_elements: rows,
            matrix_columns: columns,
        }
    }

    pub fn sampler(dim: SamplerDim, shadow: bool) -> Type {
        Type::Sampler {
            dim: dim,
            shadow: shadow,
            array: false,
        }
    }

    pub fn image(dim: SamplerDim) -> Type {
        Type::Image {
            dim: dim,
            array: false,
        }
    }

    pub fn array(elem: Type, len: u32) -> Type {
        Type::Array(Box::new(elem), len)
    }

    pub fn base_type(&self) -> BaseType {
        match self {
            Type::Numeric { base, .. } => *base,
            Type::Array(elem, _) => elem.base_type(),
            Type::Sampler { .. } | Type::Image { .. } => BaseType::Int,
            Type::Void | Type::Struct(_) => {
                panic!("Type {:?} has no base type", self)
            }
        }
    }

    pub fn vector_elements(&self) -> u32 {
        match self {
            Type::Numeric {
                vector_elements, ..
            } => u32::from(*vector_elements),
            _ => 0,
        }
    }

    pub fn matrix_columns(&self) -> u32 {
        match self {
            Type::Numeric { matrix_columns, .. } => u32::from(*matrix_columns),
            _ => 0,
        }
    }

    pub fn is_scalar(&self) -> bool {
        self.vector_elements() == 1 && self.matrix_columns() == 1
    }

    pub fn is_matrix(&self) -> bool {
        self.matrix_columns() > 1
    }

    pub fn is_float(&self) -> bool {
        matches!(
            self,
            Type::Numeric {
                base: BaseType::Float,
                ..
            }
        )
    }

    pub fn is_boolean(&self) -> bool {
        matches!(
            self,
            Type::Numeric {
                base: BaseType::Bool,
                ..
            }
        )
    }

    /// The type of one column of a matrix or of a single vector
    pub fn column_type(&self) -> Type {
        match self {
            Type::Numeric {
                base,
                vector_elements,
                ..
            } => Type::vec(*base, *vector_elements),
            _ => panic!("Type {:?} has no columns", self),
        }
    }

    /// A scalar of the same base type
    pub fn scalar_type(&self) -> Type {
        Type::vec(self.base_type(), 1)
    }

    /// Number of scalar components in the natural layout
    pub fn components(&self) -> u32 {
        match self {
            Type::Numeric {
                vector_elements,
                matrix_columns,
                ..
            } => u32::from(*vector_elements) * u32::from(*matrix_columns),
            _ => 0,
        }
    }

    /// Number of scalar register slots a value of this type occupies
    ///
    /// Samplers and images live in the binding table and take no storage.
    pub fn type_size(&self) -> u32 {
        match self {
            Type::Void | Type::Sampler { .. } | Type::Image { .. } => 0,
            Type::Numeric { .. } => self.components(),
            Type::Array(elem, len) => elem.type_size() * len,
            Type::Struct(fields) => fields.iter().map(|(_, t)| t.type_size()).sum(),
        }
    }

    /// Number of varying slots covered by an input of this type
    pub fn varying_slots(&self) -> u32 {
        match self {
            Type::Numeric { matrix_columns, .. } => u32::from(*matrix_columns),
            Type::Array(elem, len) => elem.varying_slots() * len,
            Type::Struct(fields) => {
                fields.iter().map(|(_, t)| t.varying_slots()).sum()
            }
            _ => 0,
        }
    }

    pub fn array_elem(&self) -> &Type {
        match self {
            Type::Array(elem, _) => elem,
            _ => panic!("Type {:?} is not an array", self),
        }
    }

    pub fn field(&self, idx: usize) -> &Type {
        match self {
            Type::Struct(fields) => &fields[idx].1,
            _ => panic!("Type {:?} is not a struct", self),
        }
    }

    /// Register slot offset of field `idx` within a struct
    pub fn field_offset(&self, idx: usize) -> u32 {
        match self {
            Type::Struct(fields) => {
                fields[..idx].iter().map(|(_, t)| t.type_size()).sum()
            }
            _ => panic!("Type {:?} is not a struct", self),
        }
    }

    pub fn sampler_dim(&self) -> Option<SamplerDim> {
        match self {
            Type::Sampler { dim, .. } | Type::Image { dim, .. } => Some(*dim),
            Type::Array(elem, _) => elem.sampler_dim(),
            _ => None,
        }
    }

    pub fn sampler_is_array(&self) -> bool {
        match self {
            Type::Sampler { array, .. } | Type::Image { array, .. } => *array,
            Type::Array(elem, _) => elem.sampler_is_array(),
            _ => false,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VarMode {
    Temporary,
    Uniform,
    ShaderIn,
    ShaderOut,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InterpQualifier {
    /// Smooth, except for colors when flat shading is on
    Default,
    Smooth,
    Flat,
    NoPerspective,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Variable {
    pub name: String,
    pub ty: Type,
    pub mode: VarMode,
    /// Varying slot for inputs, result slot for outputs, first parameter
    /// index for numeric uniforms, texture unit for samplers, and binding for
    /// images
    pub location: u32,
    /// Dual-source blend index of a color output
    pub index: u32,
    pub interpolation: InterpQualifier,
    pub centroid: bool,
    /// gl_FragCoord layout qualifiers
    pub origin_upper_left: bool,
    pub pixel_center_integer: bool,
}

impl Variable {
    fn new(name: &str, ty: Type, mode: VarMode, location: u32) -> Variable {
        Variable {
            name: name.to_string(),
            ty: ty,
            mode: mode,
            location: location,
            index: 0,
            interpolation: InterpQualifier::Default,
            centroid: false,
            origin_upper_left: false,
            pixel_center_integer: false,
        }
    }

    pub fn temp(name: &str, ty: Type) -> Variable {
        Variable::new(name, ty, VarMode::Temporary, 0)
    }

    pub fn uniform(name: &str, ty: Type, location: u32) -> Variable {
        Variable::new(name, ty, VarMode::Uniform, location)
    }

    pub fn input(name: &str, ty: Type, slot: u32) -> Variable {
        Variable::new(name, ty, VarMode::ShaderIn, slot)
    }

    pub fn output(name: &str, ty: Type, slot: u32) -> Variable {
        Variable::new(name, ty, VarMode::ShaderOut, slot)
    }

    pub fn with_interpolation(mut self, interp: InterpQualifier) -> Self {
        self.interpolation = interp;
        self
    }

    pub fn with_centroid(mut self) -> Self {
        self.centroid = true;
        self
    }

    pub fn with_index(mut self, index: u32) -> Self {
        self.index = index;
        self
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExprOp {
    // Unary
    BitNot,
    LogicNot,
    Neg,
    Abs,
    Sign,
    Rcp,
    Rsq,
    Sqrt,
    Exp2,
    Log2,
    F2I,
    F2U,
    I2F,
    U2F,
    I2U,
    U2I,
    B2I,
    B2F,
    F2B,
    I2B,
    BitcastF2I,
    BitcastI2F,
    BitcastF2U,
    BitcastU2F,
    Trunc,
    Ceil,
    Floor,
    Fract,
    RoundEven,
    Sin,
    Cos,
    Dfdx,
    Dfdy,
    BitfieldReverse,
    BitCount,
    FindMsb,
    FindLsb,
    Saturate,

    // Binary
    Add,
    Sub,
    Mul,
    ImulHigh,
    Div,
    Mod,
    Less,
    Greater,
    Lequal,
    Gequal,
    Equal,
    Nequal,
    AllEqual,
    AnyNequal,
    LShift,
    RShift,
    BitAnd,
    BitXor,
    BitOr,
    LogicAnd,
    LogicXor,
    LogicOr,
    Dot,
    Min,
    Max,
    Pow,

    // Ternary
    Fma,
    Lrp,
    Csel,
    BitfieldExtract,

    // Quaternary
    BitfieldInsert,
    /// Builds a vector from scalar operands
    Vector,
}

impl ExprOp {
    pub fn num_operands(&self) -> Option<usize> {
        use ExprOp::*;
        match self {
            BitNot | LogicNot | Neg | Abs | Sign | Rcp | Rsq | Sqrt | Exp2
            | Log2 | F2I | F2U | I2F | U2F | I2U | U2I | B2I | B2F | F2B
            | I2B | BitcastF2I | BitcastI2F | BitcastF2U | BitcastU2F
            | Trunc | Ceil | Floor | Fract | RoundEven | Sin | Cos | Dfdx
            | Dfdy | BitfieldReverse | BitCount | FindMsb | FindLsb
            | Saturate => Some(1),
            Add | Sub | Mul | ImulHigh | Div | Mod | Less | Greater
            | Lequal | Gequal | Equal | Nequal | AllEqual | AnyNequal
            | LShift | RShift | BitAnd | BitXor | BitOr | LogicAnd
            | LogicXor | LogicOr | Dot | Min | Max | Pow => Some(2),
            Fma | Lrp | Csel | BitfieldExtract => Some(3),
            BitfieldInsert => Some(4),
            Vector => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TexOp {
    Tex,
    Txb,
    Txl,
    Txd,
    Txf,
    Txs,
    Lod,
    Tg4 { component: u8 },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Texture {
    pub op: TexOp,
    pub ty: Type,
    pub sampler: Deref,
    pub coordinate: Option<Rvalue>,
    pub projector: Option<Rvalue>,
    pub shadow_comparitor: Option<Rvalue>,
    pub offset: Option<Rvalue>,
    /// Bias for txb, LOD for txl/txf/txs
    pub lod: Option<Rvalue>,
    pub dpdx: Option<Rvalue>,
    pub dpdy: Option<Rvalue>,
}

/// Fluent construction of a `Texture` rvalue
pub struct TextureBuilder {
    tex: Texture,
}

impl TextureBuilder {
    pub fn coordinate(mut self, coord: Rvalue) -> Self {
        self.tex.coordinate = Some(coord);
        self
    }

    pub fn projector(mut self, proj: Rvalue) -> Self {
        self.tex.projector = Some(proj);
        self
    }

    pub fn shadow_comparitor(mut self, c: Rvalue) -> Self {
        self.tex.shadow_comparitor = Some(c);
        self
    }

    pub fn offset(mut self, offset: Rvalue) -> Self {
        self.tex.offset = Some(offset);
        self
    }

    pub fn lod(mut self, lod: Rvalue) -> Self {
        self.tex.lod = Some(lod);
        self
    }

    pub fn grad(mut self, dpdx: Rvalue, dpdy: Rvalue) -> Self {
        self.tex.dpdx = Some(dpdx);
        self.tex.dpdy = Some(dpdy);
        self
    }

    pub fn build(mut self, ty: Type) -> Rvalue {
        self.tex.ty = ty;
        Rvalue::Texture(Box::new(self.tex))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Deref {
    Var(VarId),
    Array(Box<Deref>, Box<Rvalue>),
    Record(Box<Deref>, usize),
}

impl Deref {
    pub fn var(id: VarId) -> Deref {
        Deref::Var(id)
    }

    pub fn index(self, idx: Rvalue) -> Deref {
        Deref::Array(Box::new(self), Box::new(idx))
    }

    pub fn field(self, idx: usize) -> Deref {
        Deref::Record(Box::new(self), idx)
    }

    /// The variable at the root of the dereference chain
    pub fn root(&self) -> VarId {
        match self {
            Deref::Var(v) => *v,
            Deref::Array(d, _) | Deref::Record(d, _) => d.root(),
        }
    }

    pub fn ty<'a>(&self, prog: &'a Program) -> &'a Type {
        match self {
            Deref::Var(v) => &prog.vars[*v].ty,
            Deref::Array(d, _) => d.ty(prog).array_elem(),
            Deref::Record(d, f) => d.ty(prog).field(*f),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Constant {
    pub ty: Type,
    /// Raw 32-bit pattern of each component
    pub bits: Vec<u32>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Rvalue {
    Deref(Deref),
    Constant(Constant),
    Expression {
        op: ExprOp,
        ty: Type,
        operands: Vec<Rvalue>,
    },
    Swizzle {
        val: Box<Rvalue>,
        comps: [u8; 4],
        len: u8,
    },
    Texture(Box<Texture>),
    ImageLoad {
        image: Deref,
        coord: Box<Rvalue>,
        ty: Type,
    },
    /// A load from a shader storage or uniform buffer
    BufferLoad {
        block: u32,
        offset: Box<Rvalue>,
        ty: Type,
    },
    Call {
        callee: String,
        ty: Type,
    },
}

impl Rvalue {
    pub fn deref(d: Deref) -> Rvalue {
        Rvalue::Deref(d)
    }

    pub fn var(id: VarId) -> Rvalue {
        Rvalue::Deref(Deref::Var(id))
    }

    pub fn constant_f(f: f32) -> Rvalue {
        Rvalue::constant_vec_f(&[f])
    }

    pub fn constant_vec_f(v: &[f32]) -> Rvalue {
        Rvalue::Constant(Constant {
            ty: Type::vec(BaseType::Float, v.len() as u8),
            bits: v.iter().map(|f| f.to_bits()).collect(),
        })
    }

    pub fn constant_i(i: i32) -> Rvalue {
        Rvalue::Constant(Constant {
            ty: Type::int(),
            bits: vec![i as u32],
        })
    }

    pub fn constant_vec_i(v: &[i32]) -> Rvalue {
        Rvalue::Constant(Constant {
            ty: Type::vec(BaseType::Int, v.len() as u8),
            bits: v.iter().map(|i| *i as u32).collect(),
        })
    }

    pub fn constant_u(u: u32) -> Rvalue {
        Rvalue::Constant(Constant {
            ty: Type::uint(),
            bits: vec![u],
        })
    }

    pub fn constant_b(b: bool) -> Rvalue {
        Rvalue::Constant(Constant {
            ty: Type::bool(),
            bits: vec![u32::from(b)],
        })
    }

    pub fn expr(op: ExprOp, ty: Type, operands: Vec<Rvalue>) -> Rvalue {
        if let Some(n) = op.num_operands() {
            assert!(operands.len() == n);
        }
        Rvalue::Expression {
            op: op,
            ty: ty,
            operands: operands,
        }
    }

    pub fn unop(op: ExprOp, ty: Type, a: Rvalue) -> Rvalue {
        Rvalue::expr(op, ty, vec![a])
    }

    pub fn binop(op: ExprOp, ty: Type, a: Rvalue, b: Rvalue) -> Rvalue {
        Rvalue::expr(op, ty, vec![a, b])
    }

    pub fn swizzle(val: Rvalue, comps: &[u8]) -> Rvalue {
        assert!(!comps.is_empty() && comps.len() <= 4);
        let mut c = [0; 4];
        c[..comps.len()].copy_from_slice(comps);
        Rvalue::Swizzle {
            val: Box::new(val),
            comps: c,
            len: comps.len() as u8,
        }
    }

    pub fn texture(op: TexOp, sampler: Deref) -> TextureBuilder {
        TextureBuilder {
            tex: Texture {
                op: op,
                ty: Type::Void,
                sampler: sampler,
                coordinate: None,
                projector: None,
                shadow_comparitor: None,
                offset: None,
                lod: None,
                dpdx: None,
                dpdy: None,
            },
        }
    }

    pub fn ty(&self, prog: &Program) -> Type {
        match self {
            Rvalue::Deref(d) => d.ty(prog).clone(),
            Rvalue::Constant(c) => c.ty.clone(),
            Rvalue::Expression { ty, .. } => ty.clone(),
            Rvalue::Swizzle { val, len, .. } => {
                Type::vec(val.ty(prog).base_type(), *len)
            }
            Rvalue::Texture(t) => t.ty.clone(),
            Rvalue::ImageLoad { ty, .. }
            | Rvalue::BufferLoad { ty, .. }
            | Rvalue::Call { ty, .. } => ty.clone(),
        }
    }

    pub fn as_constant(&self) -> Option<&Constant> {
        match self {
            Rvalue::Constant(c) => Some(c),
            _ => None,
        }
    }

    /// Calls `f` on this rvalue and every rvalue nested inside it
    pub fn for_each(&self, f: &mut impl FnMut(&Rvalue)) {
        f(self);
        match self {
            Rvalue::Deref(d) => d.for_each_index(f),
            Rvalue::Constant(_) | Rvalue::Call { .. } => (),
            Rvalue::Expression { operands, .. } => {
                for op in operands {
                    op.for_each(f);
                }
            }
            Rvalue::Swizzle { val, .. } => val.for_each(f),
            Rvalue::Texture(t) => {
                t.sampler.for_each_index(f);
                for v in [
                    &t.coordinate,
                    &t.projector,
                    &t.shadow_comparitor,
                    &t.offset,
                    &t.lod,
                    &t.dpdx,
                    &t.dpdy,
                ]
                .into_iter()
                .flatten()
                {
                    v.for_each(f);
                }
            }
            Rvalue::ImageLoad { image, coord, .. } => {
                image.for_each_index(f);
                coord.for_each(f);
            }
            Rvalue::BufferLoad { offset, .. } => offset.for_each(f),
        }
    }
}

impl Deref {
    fn for_each_index(&self, f: &mut impl FnMut(&Rvalue)) {
        match self {
            Deref::Var(_) => (),
            Deref::Array(d, idx) => {
                d.for_each_index(f);
                idx.for_each(f);
            }
            Deref::Record(d, _) => d.for_each_index(f),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
    Assign {
        lhs: Deref,
        rhs: Rvalue,
        write_mask: u8,
        condition: Option<Rvalue>,
    },
    If {
        condition: Rvalue,
        then_body: Vec<Stmt>,
        else_body: Vec<Stmt>,
    },
    Loop {
        body: Vec<Stmt>,
    },
    Break,
    Continue,
    Discard {
        condition: Option<Rvalue>,
    },
    ImageStore {
        image: Deref,
        coord: Rvalue,
        value: Rvalue,
    },
    BufferStore {
        block: u32,
        offset: Rvalue,
        value: Rvalue,
        write_mask: u8,
    },
    Call {
        callee: String,
    },
    Return,
}

impl Stmt {
    /// Assigns every component of `lhs`
    pub fn assign(lhs: Deref, rhs: Rvalue) -> Stmt {
        Stmt::Assign {
            lhs: lhs,
            rhs: rhs,
            write_mask: 0xf,
            condition: None,
        }
    }

    pub fn assign_masked(lhs: Deref, rhs: Rvalue, write_mask: u8) -> Stmt {
        Stmt::Assign {
            lhs: lhs,
            rhs: rhs,
            write_mask: write_mask,
            condition: None,
        }
    }

    pub fn assign_cond(lhs: Deref, rhs: Rvalue, cond: Rvalue) -> Stmt {
        Stmt::Assign {
            lhs: lhs,
            rhs: rhs,
            write_mask: 0xf,
            condition: Some(cond),
        }
    }

    pub fn if_else(cond: Rvalue, then_body: Vec<Stmt>, else_body: Vec<Stmt>) -> Stmt {
        Stmt::If {
            condition: cond,
            then_body: then_body,
            else_body: else_body,
        }
    }

    /// Calls `f` on every statement, depth first
    pub fn for_each(stmts: &[Stmt], f: &mut impl FnMut(&Stmt)) {
        for stmt in stmts {
            f(stmt);
            match stmt {
                Stmt::If {
                    then_body,
                    else_body,
                    ..
                } => {
                    Stmt::for_each(then_body, f);
                    Stmt::for_each(else_body, f);
                }
                Stmt::Loop { body } => Stmt::for_each(body, f),
                _ => (),
            }
        }
    }

    /// Calls `f` on every rvalue in `stmts`, including nested ones
    pub fn for_each_rvalue(stmts: &[Stmt], f: &mut impl FnMut(&Rvalue)) {
        Stmt::for_each(stmts, &mut |stmt| match stmt {
            Stmt::Assign {
                lhs,
                rhs,
                condition,
                ..
            } => {
                lhs.for_each_index(f);
                rhs.for_each(f);
                if let Some(c) = condition {
                    c.for_each(f);
                }
            }
            Stmt::If { condition, .. } => condition.for_each(f),
            Stmt::Discard {
                condition: Some(c),
            } => c.for_each(f),
            Stmt::ImageStore {
                image,
                coord,
                value,
            } => {
                image.for_each_index(f);
                coord.for_each(f);
                value.for_each(f);
            }
            Stmt::BufferStore { offset, value, .. } => {
                offset.for_each(f);
                value.for_each(f);
            }
            _ => (),
        });
    }
}

/// A linked fragment program
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Program {
    pub vars: Vec<Variable>,
    pub main: Vec<Stmt>,
}

impl Program {
    pub fn new() -> Program {
        Program {
            vars: Vec::new(),
            main: Vec::new(),
        }
    }

    pub fn add_var(&mut self, var: Variable) -> VarId {
        self.vars.push(var);
        self.vars.len() - 1
    }

    pub fn var(&self, id: VarId) -> &Variable {
        &self.vars[id]
    }

    fn vars_with_mode(&self, mode: VarMode) -> impl Iterator<Item = &Variable> {
        self.vars.iter().filter(move |v| v.mode == mode)
    }

    /// Bitmask of the varying slots read
    pub fn inputs_read(&self) -> u64 {
        let mut mask = 0_u64;
        for v in self.vars_with_mode(VarMode::ShaderIn) {
            let slots = std::cmp::max(v.ty.varying_slots(), 1);
            for s in v.location..(v.location + slots) {
                mask |= 1_u64 << s;
            }
        }
        mask
    }

    /// Bitmask of the fragment result slots written
    pub fn outputs_written(&self) -> u64 {
        let mut mask = 0_u64;
        for v in self.vars_with_mode(VarMode::ShaderOut) {
            let slots = std::cmp::max(v.ty.varying_slots(), 1);
            for s in v.location..(v.location + slots) {
                mask |= 1_u64 << s;
            }
        }
        mask
    }

    pub fn num_texture_units(&self) -> u32 {
        self.vars_with_mode(VarMode::Uniform)
            .filter(|v| matches!(v.ty.sampler_dim(), Some(_)))
            .filter(|v| !matches!(v.ty, Type::Image { .. }))
            .filter(|v| match &v.ty {
                Type::Array(elem, _) => matches!(**elem, Type::Sampler { .. }),
                _ => true,
            })
            .map(|v| v.location + self.array_len(&v.ty))
            .max()
            .unwrap_or(0)
    }

    pub fn num_images(&self) -> u32 {
        self.vars_with_mode(VarMode::Uniform)
            .filter(|v| match &v.ty {
                Type::Image { .. } => true,
                Type::Array(elem, _) => matches!(**elem, Type::Image { .. }),
                _ => false,
            })
            .map(|v| v.location + self.array_len(&v.ty))
            .max()
            .unwrap_or(0)
    }

    fn array_len(&self, ty: &Type) -> u32 {
        match ty {
            Type::Array(_, len) => *len,
            _ => 1,
        }
    }

    pub fn num_buffers(&self) -> u32 {
        let mut num = 0;
        Stmt::for_each(&self.main, &mut |stmt| {
            if let Stmt::BufferStore { block, .. } = stmt {
                num = std::cmp::max(num, block + 1);
            }
        });
        Stmt::for_each_rvalue(&self.main, &mut |rv| {
            if let Rvalue::BufferLoad { block, .. } = rv {
                num = std::cmp::max(num, block + 1);
            }
        });
        num
    }

    pub fn uses_gather(&self) -> bool {
        let mut gather = false;
        Stmt::for_each_rvalue(&self.main, &mut |rv| {
            if let Rvalue::Texture(t) = rv {
                gather |= matches!(t.op, TexOp::Tg4 { .. });
            }
        });
        gather
    }

    pub fn uses_discard(&self) -> bool {
        let mut discard = false;
        Stmt::for_each(&self.main, &mut |stmt| {
            discard |= matches!(stmt, Stmt::Discard { .. });
        });
        discard
    }

    /// Number of uniform components, in declaration order
    pub fn num_uniform_components(&self) -> u32 {
        self.vars_with_mode(VarMode::Uniform)
            .map(|v| v.ty.type_size())
            .sum()
    }
}
