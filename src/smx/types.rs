//! SMX metadata: functions, natives, globals, and the RTTI type records that
//! describe them. Immutable after the parser builds it; the Typer and the
//! lifter only ever read through `&SmxImage`.

use crate::cell::Cell;

/// The tag of an `SmxType`, matching `spec.md` §3's `{tag, dims[], const,
/// by_ref, ref_to_metadata?}` model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmxTypeTag {
    Unknown,
    Void,
    Bool,
    Int,
    Float,
    Char,
    Any,
    Enum,
    Typedef,
    Typeset,
    Classdef,
    EnumStruct,
}

/// An index into one of `SmxImage`'s RTTI tables, used in place of the raw
/// pointers the original keeps inline in a tagged union.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RttiRef {
    Enum(u32),
    Typedef(u32),
    Typeset(u32),
    Classdef(u32),
    EnumStruct(u32),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SmxType {
    pub tag: SmxTypeTagOrUnknown,
    /// Per-dimension sizes, outermost first; `0` means "unspecified size".
    pub dims: Vec<u32>,
    pub is_const: bool,
    pub by_ref: bool,
    pub rtti_ref: Option<RttiRef>,
}

/// `SmxTypeTag` wrapped so `SmxType::default()` can exist without picking an
/// arbitrary tag to mean "none".
pub type SmxTypeTagOrUnknown = SmxTypeTag;

impl Default for SmxTypeTag {
    fn default() -> Self {
        SmxTypeTag::Unknown
    }
}

impl SmxType {
    pub fn unknown() -> Self {
        SmxType::default()
    }

    pub fn simple(tag: SmxTypeTag) -> Self {
        SmxType {
            tag,
            ..Default::default()
        }
    }

    pub fn dim_count(&self) -> usize {
        self.dims.len()
    }

    pub fn is_array(&self) -> bool {
        !self.dims.is_empty()
    }

    /// The type with the outermost dimension stripped, used when propagating
    /// types through `ArrayElementVar`/`Load`/`Store`.
    pub fn one_less_dim(&self) -> SmxType {
        let mut inner = self.clone();
        if !inner.dims.is_empty() {
            inner.dims.remove(0);
        }
        inner
    }

    /// The type with one more outer dimension, used when demanding a type
    /// for an `ArrayElementVar`'s base.
    pub fn one_more_dim(&self) -> SmxType {
        let mut outer = self.clone();
        outer.dims.insert(0, 0);
        outer
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Copy)]
pub enum SmxVariableClass {
    Global,
    Local,
    Static,
    Arg,
}

#[derive(Debug, Clone)]
pub struct SmxFunctionSignatureArg {
    pub name: Option<String>,
    pub ty: SmxType,
}

#[derive(Debug, Clone, Default)]
pub struct SmxFunctionSignature {
    /// `None` means `void`.
    pub ret: Option<SmxType>,
    pub args: Vec<SmxFunctionSignatureArg>,
    pub varargs: bool,
}

#[derive(Debug, Clone)]
pub struct SmxVariable {
    pub name: String,
    pub address: Cell,
    pub ty: SmxType,
    pub vclass: SmxVariableClass,
    pub is_public: bool,
}

#[derive(Debug, Clone)]
pub struct SmxFunction {
    pub raw_name: String,
    pub name: String,
    pub pcode_start: Cell,
    pub pcode_end: Cell,
    pub is_public: bool,
    pub signature: SmxFunctionSignature,
    pub locals: Vec<SmxVariable>,
}

impl SmxFunction {
    pub fn find_local_by_stack_offset(&self, stack_offset: i32) -> Option<&SmxVariable> {
        self.locals
            .iter()
            .find(|v| v.address.as_i32() == stack_offset)
    }
}

#[derive(Debug, Clone)]
pub struct SmxNative {
    pub name: String,
    pub signature: SmxFunctionSignature,
}

#[derive(Debug, Clone)]
pub struct SmxEnum {
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct SmxTypeDef {
    pub name: String,
    pub signature: SmxFunctionSignature,
}

#[derive(Debug, Clone)]
pub struct SmxTypeSet {
    pub name: String,
    pub signatures: Vec<SmxFunctionSignature>,
}

#[derive(Debug, Clone)]
pub struct SmxEsField {
    pub name: String,
    pub ty: SmxType,
    pub offset: u32,
}

#[derive(Debug, Clone)]
pub struct SmxEnumStruct {
    pub name: String,
    pub fields: Vec<SmxEsField>,
    pub size: u32,
}

impl SmxEnumStruct {
    pub fn find_field_at_offset(&self, offset: u32) -> Option<&SmxEsField> {
        self.fields.iter().find(|f| f.offset == offset)
    }
}

#[derive(Debug, Clone)]
pub struct SmxField {
    pub name: String,
    pub ty: SmxType,
}

#[derive(Debug, Clone)]
pub struct SmxClassDef {
    pub name: String,
    pub fields: Vec<SmxField>,
}

/// The parsed, queryable metadata for one SMX file: functions, natives,
/// globals, and the RTTI tables that back `SmxType::rtti_ref`. This is the
/// "SMX metadata (in)" interface from `spec.md` §6.
#[derive(Debug, Clone, Default)]
pub struct SmxImage {
    pub code: Vec<Cell>,
    pub data: Vec<Cell>,
    pub functions: Vec<SmxFunction>,
    pub natives: Vec<SmxNative>,
    pub globals: Vec<SmxVariable>,
    pub enums: Vec<SmxEnum>,
    pub typedefs: Vec<SmxTypeDef>,
    pub typesets: Vec<SmxTypeSet>,
    pub enum_structs: Vec<SmxEnumStruct>,
    pub classdefs: Vec<SmxClassDef>,
}

impl SmxImage {
    pub fn find_function_by_name(&self, name: &str) -> Option<&SmxFunction> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn find_function_at(&self, addr: Cell) -> Option<&SmxFunction> {
        self.functions
            .iter()
            .find(|f| addr >= f.pcode_start && addr < f.pcode_end)
    }

    pub fn find_function_by_id(&self, id: usize) -> Option<&SmxFunction> {
        self.functions.get(id)
    }

    pub fn find_native_by_index(&self, index: usize) -> Option<&SmxNative> {
        self.natives.get(index)
    }

    pub fn find_global_at(&self, addr: Cell) -> Option<&SmxVariable> {
        self.globals.iter().find(|v| v.address == addr)
    }

    pub fn find_global_by_name(&self, name: &str) -> Option<&SmxVariable> {
        self.globals.iter().find(|v| v.name == name)
    }

    pub fn native_index_of(&self, name: &str) -> Option<usize> {
        self.natives.iter().position(|n| n.name == name)
    }

    /// Reads `len` cells starting at `addr` from the code section, the
    /// primitive the CFG builder and lifter use to walk pcode and case
    /// tables.
    pub fn code_at(&self, addr: Cell) -> &[Cell] {
        &self.code[addr.as_usize()..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_less_dim_strips_outermost() {
        let arr = SmxType {
            tag: SmxTypeTag::Int,
            dims: vec![0, 4],
            ..Default::default()
        };
        let inner = arr.one_less_dim();
        assert_eq!(inner.dims, vec![4]);
    }

    #[test]
    fn one_more_dim_adds_unspecified_outer() {
        let scalar = SmxType::simple(SmxTypeTag::Int);
        let arr = scalar.one_more_dim();
        assert_eq!(arr.dims, vec![0]);
    }

    #[test]
    fn find_local_by_stack_offset() {
        let f = SmxFunction {
            raw_name: "f".into(),
            name: "f".into(),
            pcode_start: Cell(0),
            pcode_end: Cell(10),
            is_public: false,
            signature: SmxFunctionSignature::default(),
            locals: vec![SmxVariable {
                name: "x".into(),
                address: Cell(-8),
                ty: SmxType::simple(SmxTypeTag::Int),
                vclass: SmxVariableClass::Local,
                is_public: false,
            }],
        };
        assert!(f.find_local_by_stack_offset(-8).is_some());
        assert!(f.find_local_by_stack_offset(-4).is_none());
    }
}
