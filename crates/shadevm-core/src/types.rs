//! Type descriptors for shading values.
//!
//! A [`TypeDesc`] describes the shape of a simple value (base type,
//! aggregation, optional fixed array length). A [`TypeSpec`] layers the
//! rest of the shading type system on top: structures (by id) and closures
//! over simple types. Exactly one of {simple, structure, closure-of-simple}
//! is meaningful at a time.

use std::fmt;

/// Scalar element type underlying a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BaseType {
    /// No data (void, or a structure placeholder).
    #[default]
    None,
    Int,
    Float,
    String,
}

/// How many scalar elements one value aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Aggregate {
    #[default]
    Scalar,
    Vec3,
    Matrix44,
}

impl Aggregate {
    /// Number of scalar elements in the aggregate.
    pub fn elements(self) -> usize {
        match self {
            Aggregate::Scalar => 1,
            Aggregate::Vec3 => 3,
            Aggregate::Matrix44 => 16,
        }
    }
}

/// Geometric interpretation of a Vec3 aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VecSemantics {
    #[default]
    None,
    Color,
    Point,
    Vector,
    Normal,
}

/// Shape of a simple value: base type, aggregation, array length.
///
/// `arraylen == 0` means "not an array".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TypeDesc {
    pub basetype: BaseType,
    pub aggregate: Aggregate,
    pub vecsemantics: VecSemantics,
    pub arraylen: u16,
}

impl TypeDesc {
    pub const NONE: TypeDesc = TypeDesc::new(BaseType::None, Aggregate::Scalar, VecSemantics::None);
    pub const FLOAT: TypeDesc =
        TypeDesc::new(BaseType::Float, Aggregate::Scalar, VecSemantics::None);
    pub const INT: TypeDesc = TypeDesc::new(BaseType::Int, Aggregate::Scalar, VecSemantics::None);
    pub const STRING: TypeDesc =
        TypeDesc::new(BaseType::String, Aggregate::Scalar, VecSemantics::None);
    pub const COLOR: TypeDesc = TypeDesc::new(BaseType::Float, Aggregate::Vec3, VecSemantics::Color);
    pub const POINT: TypeDesc = TypeDesc::new(BaseType::Float, Aggregate::Vec3, VecSemantics::Point);
    pub const VECTOR: TypeDesc =
        TypeDesc::new(BaseType::Float, Aggregate::Vec3, VecSemantics::Vector);
    pub const NORMAL: TypeDesc =
        TypeDesc::new(BaseType::Float, Aggregate::Vec3, VecSemantics::Normal);
    pub const MATRIX44: TypeDesc =
        TypeDesc::new(BaseType::Float, Aggregate::Matrix44, VecSemantics::None);

    pub const fn new(basetype: BaseType, aggregate: Aggregate, vecsemantics: VecSemantics) -> Self {
        TypeDesc {
            basetype,
            aggregate,
            vecsemantics,
            arraylen: 0,
        }
    }

    /// This type as an array of `len` elements (0 makes it a non-array).
    pub fn array_of(mut self, len: u16) -> Self {
        self.arraylen = len;
        self
    }

    pub fn is_array(&self) -> bool {
        self.arraylen != 0
    }

    /// The type of a single array element (or the type itself).
    pub fn elementtype(&self) -> TypeDesc {
        self.array_of(0)
    }

    /// Number of scalar elements one whole value occupies, arrays included.
    pub fn size(&self) -> usize {
        self.aggregate.elements() * (self.arraylen.max(1) as usize)
    }
}

impl fmt::Display for TypeDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let elem = match (self.basetype, self.aggregate, self.vecsemantics) {
            (BaseType::None, _, _) => "void",
            (BaseType::Int, _, _) => "int",
            (BaseType::String, _, _) => "string",
            (BaseType::Float, Aggregate::Scalar, _) => "float",
            (BaseType::Float, Aggregate::Matrix44, _) => "matrix",
            (BaseType::Float, Aggregate::Vec3, VecSemantics::Color) => "color",
            (BaseType::Float, Aggregate::Vec3, VecSemantics::Point) => "point",
            (BaseType::Float, Aggregate::Vec3, VecSemantics::Vector) => "vector",
            (BaseType::Float, Aggregate::Vec3, VecSemantics::Normal) => "normal",
            (BaseType::Float, Aggregate::Vec3, VecSemantics::None) => "vector",
        };
        if self.is_array() {
            write!(f, "{}[{}]", elem, self.arraylen)
        } else {
            f.write_str(elem)
        }
    }
}

/// Full shading type: a simple type, a structure id, or a closure over a
/// simple type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TypeSpec {
    simple: TypeDesc,
    structure: i16,
    closure: bool,
}

impl TypeSpec {
    /// An ordinary simple type (including arrays of simple types).
    pub const fn simple(desc: TypeDesc) -> Self {
        TypeSpec {
            simple: desc,
            structure: 0,
            closure: false,
        }
    }

    /// A closure over a simple type.
    pub const fn closure(desc: TypeDesc) -> Self {
        TypeSpec {
            simple: desc,
            structure: 0,
            closure: true,
        }
    }

    /// A structure (or array of structures) by structure id.
    pub fn structure(structid: i16, arraylen: u16) -> Self {
        TypeSpec {
            simple: TypeDesc::NONE.array_of(arraylen),
            structure: structid,
            closure: false,
        }
    }

    pub const fn float() -> Self {
        TypeSpec::simple(TypeDesc::FLOAT)
    }

    pub const fn int() -> Self {
        TypeSpec::simple(TypeDesc::INT)
    }

    pub const fn string() -> Self {
        TypeSpec::simple(TypeDesc::STRING)
    }

    /// The simple type underneath; UNKNOWN-ish (`NONE`) for structures.
    pub fn simpletype(&self) -> TypeDesc {
        self.simple
    }

    pub fn is_closure(&self) -> bool {
        self.closure
    }

    /// Is this a single structure? Returns false for arrays of structs;
    /// array-ness is tracked separately.
    pub fn is_structure(&self) -> bool {
        self.structure > 0 && !self.is_array()
    }

    /// Structure id, or 0 if not a struct.
    pub fn structure_id(&self) -> i16 {
        self.structure
    }

    pub fn is_structure_based(&self) -> bool {
        self.structure > 0
    }

    pub fn is_array(&self) -> bool {
        self.simple.arraylen != 0
    }

    pub fn arraylength(&self) -> u16 {
        self.simple.arraylen
    }

    pub fn is_void(&self) -> bool {
        self.simple.basetype == BaseType::None && self.structure == 0
    }

    pub fn is_int(&self) -> bool {
        !self.closure && !self.is_array() && self.simple == TypeDesc::INT
    }

    pub fn is_float(&self) -> bool {
        !self.closure && !self.is_array() && self.simple == TypeDesc::FLOAT
    }

    pub fn is_string(&self) -> bool {
        !self.closure && !self.is_array() && self.simple.basetype == BaseType::String
    }

    /// A color, point, vector, or normal (not an array or closure).
    pub fn is_triple(&self) -> bool {
        !self.closure
            && !self.is_array()
            && self.simple.basetype == BaseType::Float
            && self.simple.aggregate == Aggregate::Vec3
    }

    /// A point, vector, or normal (not a color, array, or closure).
    pub fn is_vectriple(&self) -> bool {
        self.is_triple() && self.simple.vecsemantics != VecSemantics::Color
    }

    /// Based on a point/vector/normal, allowing arrays and closures.
    pub fn is_vectriple_based(&self) -> bool {
        let elem = self.simple.elementtype();
        elem.basetype == BaseType::Float
            && elem.aggregate == Aggregate::Vec3
            && matches!(
                elem.vecsemantics,
                VecSemantics::Point | VecSemantics::Vector | VecSemantics::Normal
            )
    }

    /// A simple float-based type (float, triple, matrix) -- false for
    /// closures, arrays, and structs.
    pub fn is_floatbased(&self) -> bool {
        !self.closure
            && !self.is_array()
            && self.structure == 0
            && self.simple.basetype == BaseType::Float
    }

    pub fn is_numeric(&self) -> bool {
        !self.closure
            && !self.is_array()
            && matches!(self.simple.basetype, BaseType::Float | BaseType::Int)
    }

    pub fn is_scalarnum(&self) -> bool {
        self.is_numeric() && self.simple.aggregate == Aggregate::Scalar
    }

    pub fn is_matrix(&self) -> bool {
        !self.closure && !self.is_array() && self.simple == TypeDesc::MATRIX44
    }

    pub fn is_color_closure(&self) -> bool {
        self.closure && self.simple.vecsemantics == VecSemantics::Color
    }

    /// Scalar elements one whole value occupies. Closures hold one
    /// reference slot per value; structures hold no data of their own
    /// (their fields are separate symbols).
    pub fn size(&self) -> usize {
        if self.closure {
            1
        } else if self.is_structure_based() {
            0
        } else {
            self.simple.size()
        }
    }
}

impl fmt::Display for TypeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_structure_based() {
            if self.is_array() {
                write!(f, "struct{}[{}]", self.structure, self.simple.arraylen)
            } else {
                write!(f, "struct{}", self.structure)
            }
        } else if self.closure {
            write!(f, "closure {}", self.simple)
        } else {
            write!(f, "{}", self.simple)
        }
    }
}

/// Types are equivalent if identical, or both are point/vector/normal-like
/// with matching array length and closure-ness.
pub fn equivalent(a: &TypeSpec, b: &TypeSpec) -> bool {
    a == b
        || (a.is_vectriple_based()
            && b.is_vectriple_based()
            && a.is_closure() == b.is_closure()
            && a.arraylength() == b.arraylength())
}

/// Is `b` assignable to `a`? Equivalence, plus float-or-float-aggregate
/// from float or int.
pub fn assignable(a: &TypeSpec, b: &TypeSpec) -> bool {
    equivalent(a, b) || (a.is_floatbased() && (b.is_float() || b.is_int()))
}

/// Kinds of shaders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ShaderType {
    #[default]
    Generic,
    Surface,
    Displacement,
    Volume,
    Light,
}

impl ShaderType {
    pub fn name(self) -> &'static str {
        match self {
            ShaderType::Generic => "shader",
            ShaderType::Surface => "surface",
            ShaderType::Displacement => "displacement",
            ShaderType::Volume => "volume",
            ShaderType::Light => "light",
        }
    }

    pub fn from_name(name: &str) -> Option<ShaderType> {
        match name {
            "shader" => Some(ShaderType::Generic),
            "surface" => Some(ShaderType::Surface),
            "displacement" => Some(ShaderType::Displacement),
            "volume" => Some(ShaderType::Volume),
            "light" => Some(ShaderType::Light),
            _ => None,
        }
    }
}

impl fmt::Display for ShaderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Uses of shaders at execution time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ShaderUse {
    #[default]
    Surface,
    Displacement,
    Volume,
    Light,
}

impl ShaderUse {
    pub fn name(self) -> &'static str {
        match self {
            ShaderUse::Surface => "surface",
            ShaderUse::Displacement => "displacement",
            ShaderUse::Volume => "volume",
            ShaderUse::Light => "light",
        }
    }
}
