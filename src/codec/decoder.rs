//! Argument decoders specialised per event type layout.
//!
//! A decoder is built once when a type is defined. Fixed-width fields that
//! precede the first variable-width field get word offsets computed here, at
//! generation time; everything from the first array onwards is read through a
//! running cursor. Decoders are cached by the canonical argument string so
//! types sharing a layout share a decoder.

use std::collections::HashMap;
use std::sync::Arc;

use crate::codec::reader::{LegacyReader, PackedInput};
use crate::codec::string_table::StringTable;
use crate::data::args::{ArgValue, ArgumentData};
use crate::data::variable::{format_args_string, ArgType, ScalarType, Variable};
use crate::error::{Result, TraceError};

/// Marker for an absent array in modern buffers.
pub const NULL_ARRAY: u32 = 0xFFFF_FFFF;

/// Decodes the argument block of one event type.
pub trait Decoder: Send + Sync {
    /// Decode a modern argument block starting at word `offset`. Returns the
    /// record (`None` for argument-less types) and the word offset just past it.
    fn decode_packed(
        &self,
        input: &PackedInput<'_>,
        offset: usize,
    ) -> Result<(Option<ArgumentData>, usize)>;

    /// Decode a legacy argument block from the reader's current position.
    fn decode_legacy(&self, reader: &mut LegacyReader<'_>) -> Result<Option<ArgumentData>>;

    /// Size of the block in words when it does not depend on the values.
    fn fixed_size(&self) -> Option<usize>;
}

type ScalarReadFn = fn(u32, &StringTable) -> Result<ArgValue>;
type CursorReadFn = Box<dyn Fn(&PackedInput<'_>, &mut usize) -> Result<ArgValue> + Send + Sync>;
type LegacyReadFn = fn(&mut LegacyReader<'_>) -> Result<ArgValue>;

/// A field read at a constant word offset from the start of the block.
struct FixedField {
    name: String,
    word: usize,
    read: ScalarReadFn,
}

/// A field read at the running cursor.
struct CursorField {
    name: String,
    read: CursorReadFn,
}

struct LegacyField {
    name: String,
    read: LegacyReadFn,
}

fn decode_legacy_fields(
    fields: &[LegacyField],
    reader: &mut LegacyReader<'_>,
) -> Result<Option<ArgumentData>> {
    let mut args = ArgumentData::with_capacity(fields.len());
    for field in fields {
        args.set(field.name.clone(), (field.read)(reader)?);
    }
    Ok(Some(args))
}

/// Argument-less types.
struct NoArgs;

impl Decoder for NoArgs {
    fn decode_packed(
        &self,
        _input: &PackedInput<'_>,
        offset: usize,
    ) -> Result<(Option<ArgumentData>, usize)> {
        Ok((None, offset))
    }

    fn decode_legacy(&self, _reader: &mut LegacyReader<'_>) -> Result<Option<ArgumentData>> {
        Ok(None)
    }

    fn fixed_size(&self) -> Option<usize> {
        Some(0)
    }
}

/// Every field is fixed-width; the block has a constant size.
struct FixedLayout {
    fields: Vec<FixedField>,
    size: usize,
    legacy: Vec<LegacyField>,
}

impl Decoder for FixedLayout {
    fn decode_packed(
        &self,
        input: &PackedInput<'_>,
        offset: usize,
    ) -> Result<(Option<ArgumentData>, usize)> {
        let strings = input.strings();
        let mut args = ArgumentData::with_capacity(self.fields.len());
        for field in &self.fields {
            let word = input.word(offset + field.word)?;
            args.set(field.name.clone(), (field.read)(word, strings)?);
        }
        Ok((Some(args), offset + self.size))
    }

    fn decode_legacy(&self, reader: &mut LegacyReader<'_>) -> Result<Option<ArgumentData>> {
        decode_legacy_fields(&self.legacy, reader)
    }

    fn fixed_size(&self) -> Option<usize> {
        Some(self.size)
    }
}

/// Fixed prefix followed by fields read through the running cursor.
struct VariableLayout {
    prefix: Vec<FixedField>,
    prefix_size: usize,
    tail: Vec<CursorField>,
    legacy: Vec<LegacyField>,
}

impl Decoder for VariableLayout {
    fn decode_packed(
        &self,
        input: &PackedInput<'_>,
        offset: usize,
    ) -> Result<(Option<ArgumentData>, usize)> {
        let strings = input.strings();
        let mut args = ArgumentData::with_capacity(self.prefix.len() + self.tail.len());
        for field in &self.prefix {
            let word = input.word(offset + field.word)?;
            args.set(field.name.clone(), (field.read)(word, strings)?);
        }
        let mut cursor = offset + self.prefix_size;
        for field in &self.tail {
            let value = (field.read)(input, &mut cursor)?;
            args.set(field.name.clone(), value);
        }
        Ok((Some(args), cursor))
    }

    fn decode_legacy(&self, reader: &mut LegacyReader<'_>) -> Result<Option<ArgumentData>> {
        decode_legacy_fields(&self.legacy, reader)
    }

    fn fixed_size(&self) -> Option<usize> {
        None
    }
}

/// Build a decoder for the given argument list.
pub fn generate_decoder(args: &[Variable]) -> Arc<dyn Decoder> {
    if args.is_empty() {
        return Arc::new(NoArgs);
    }

    let legacy: Vec<LegacyField> = args
        .iter()
        .map(|v| LegacyField {
            name: v.name.clone(),
            read: legacy_reader(v.arg_type),
        })
        .collect();

    let mut prefix = Vec::new();
    let mut tail = Vec::new();
    let mut constant_offset = 0usize;
    for var in args {
        match var.arg_type {
            ArgType::Scalar(scalar) if tail.is_empty() => {
                prefix.push(FixedField {
                    name: var.name.clone(),
                    word: constant_offset,
                    read: scalar_reader(scalar),
                });
                constant_offset += 1;
            }
            ArgType::Scalar(scalar) => {
                let read = scalar_reader(scalar);
                tail.push(CursorField {
                    name: var.name.clone(),
                    read: Box::new(move |input: &PackedInput<'_>, cursor: &mut usize| {
                        let word = input.word(*cursor)?;
                        *cursor += 1;
                        read(word, input.strings())
                    }),
                });
            }
            ArgType::Array(element) => tail.push(CursorField {
                name: var.name.clone(),
                read: array_reader(element),
            }),
        }
    }

    if tail.is_empty() {
        Arc::new(FixedLayout {
            fields: prefix,
            size: constant_offset,
            legacy,
        })
    } else {
        Arc::new(VariableLayout {
            prefix,
            prefix_size: constant_offset,
            tail,
            legacy,
        })
    }
}

fn read_string(word: u32, strings: &StringTable) -> Result<ArgValue> {
    Ok(match strings.get(word)? {
        Some(s) => ArgValue::String(s.to_string()),
        None => ArgValue::Null,
    })
}

fn read_json(word: u32, strings: &StringTable) -> Result<ArgValue> {
    match strings.get(word)? {
        Some(s) => parse_json_arg(s),
        None => Ok(ArgValue::Null),
    }
}

fn parse_json_arg(text: &str) -> Result<ArgValue> {
    serde_json::from_str(text)
        .map(ArgValue::Json)
        .map_err(|e| TraceError::fatal(format!("invalid JSON argument: {e}")))
}

fn scalar_reader(scalar: ScalarType) -> ScalarReadFn {
    match scalar {
        ScalarType::Bool => |w, _| Ok(ArgValue::Bool(w as u8 != 0)),
        ScalarType::Int8 => |w, _| Ok(ArgValue::Int(w as u8 as i8 as i64)),
        ScalarType::Uint8 => |w, _| Ok(ArgValue::Int(w as u8 as i64)),
        ScalarType::Int16 => |w, _| Ok(ArgValue::Int(w as u16 as i16 as i64)),
        ScalarType::Uint16 => |w, _| Ok(ArgValue::Int(w as u16 as i64)),
        ScalarType::Int32 => |w, _| Ok(ArgValue::Int(w as i32 as i64)),
        ScalarType::Uint32 | ScalarType::FlowId | ScalarType::Time32 => {
            |w, _| Ok(ArgValue::Int(w as i64))
        }
        ScalarType::Float32 => |w, _| Ok(ArgValue::Float(f32::from_bits(w) as f64)),
        ScalarType::Ascii | ScalarType::Utf8 => read_string,
        ScalarType::Any => read_json,
        ScalarType::Char => |w, _| Ok(ArgValue::String((w as u8 as char).to_string())),
        ScalarType::Wchar => |w, _| Ok(ArgValue::String(String::from_utf16_lossy(&[w as u16]))),
    }
}

/// Elements per word for packed array storage.
fn elements_per_word(element: ScalarType) -> usize {
    match element {
        ScalarType::Int8 | ScalarType::Uint8 | ScalarType::Char => 4,
        ScalarType::Int16 | ScalarType::Uint16 | ScalarType::Wchar => 2,
        _ => 1,
    }
}

fn array_reader(element: ScalarType) -> CursorReadFn {
    let per_word = elements_per_word(element);
    Box::new(move |input: &PackedInput<'_>, cursor: &mut usize| {
        let len = input.word(*cursor)?;
        *cursor += 1;
        if len == NULL_ARRAY {
            return Ok(ArgValue::Null);
        }
        let len = len as usize;
        let words = len.div_ceil(per_word);
        let value = match element {
            ScalarType::Char => {
                let bytes = input.bytes_at_word(*cursor, len)?;
                ArgValue::String(bytes.iter().map(|b| *b as char).collect())
            }
            ScalarType::Int8 | ScalarType::Uint8 => {
                let bytes = input.bytes_at_word(*cursor, len)?;
                let signed = element == ScalarType::Int8;
                ArgValue::Array(
                    bytes
                        .iter()
                        .map(|b| ArgValue::Int(if signed { *b as i8 as i64 } else { *b as i64 }))
                        .collect(),
                )
            }
            ScalarType::Int16 | ScalarType::Uint16 | ScalarType::Wchar => {
                let bytes = input.bytes_at_word(*cursor, len * 2)?;
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|c| u16::from_le_bytes([c[0], c[1]]))
                    .collect();
                match element {
                    ScalarType::Wchar => ArgValue::String(String::from_utf16_lossy(&units)),
                    ScalarType::Int16 => {
                        ArgValue::Array(units.iter().map(|u| ArgValue::Int(*u as i16 as i64)).collect())
                    }
                    _ => ArgValue::Array(units.iter().map(|u| ArgValue::Int(*u as i64)).collect()),
                }
            }
            _ => {
                let mut items = Vec::with_capacity(len);
                for n in 0..len {
                    let w = input.word(*cursor + n)?;
                    items.push(match element {
                        ScalarType::Int32 => ArgValue::Int(w as i32 as i64),
                        ScalarType::Float32 => ArgValue::Float(f32::from_bits(w) as f64),
                        _ => ArgValue::Int(w as i64),
                    });
                }
                ArgValue::Array(items)
            }
        };
        *cursor += words;
        Ok(value)
    })
}

fn legacy_reader(arg_type: ArgType) -> LegacyReadFn {
    match arg_type {
        ArgType::Scalar(scalar) => match scalar {
            ScalarType::Bool => |r| Ok(ArgValue::Bool(r.read_i8()? != 0)),
            ScalarType::Int8 => |r| Ok(ArgValue::Int(r.read_i8()? as i64)),
            ScalarType::Uint8 => |r| Ok(ArgValue::Int(r.read_u8()? as i64)),
            ScalarType::Int16 => |r| Ok(ArgValue::Int(r.read_i16()? as i64)),
            ScalarType::Uint16 => |r| Ok(ArgValue::Int(r.read_u16()? as i64)),
            ScalarType::Int32 => |r| Ok(ArgValue::Int(r.read_i32()? as i64)),
            ScalarType::Uint32 | ScalarType::FlowId | ScalarType::Time32 => {
                |r| Ok(ArgValue::Int(r.read_u32()? as i64))
            }
            ScalarType::Float32 => |r| Ok(ArgValue::Float(r.read_f32()? as f64)),
            ScalarType::Ascii => |r| Ok(r.read_ascii_string()?.map_or(ArgValue::Null, ArgValue::String)),
            ScalarType::Utf8 => |r| Ok(r.read_utf8_string()?.map_or(ArgValue::Null, ArgValue::String)),
            ScalarType::Any => |r| match r.read_utf8_string()? {
                Some(text) => parse_json_arg(&text),
                None => Ok(ArgValue::Null),
            },
            ScalarType::Char => |r| Ok(ArgValue::String((r.read_u8()? as char).to_string())),
            ScalarType::Wchar => {
                |r| Ok(ArgValue::String(String::from_utf16_lossy(&[r.read_u16()?])))
            }
        },
        ArgType::Array(element) => match element {
            ScalarType::Int8 => |r| read_legacy_array(r, |r| Ok(ArgValue::Int(r.read_i8()? as i64))),
            ScalarType::Uint8 => |r| read_legacy_array(r, |r| Ok(ArgValue::Int(r.read_u8()? as i64))),
            ScalarType::Int16 => {
                |r| read_legacy_array(r, |r| Ok(ArgValue::Int(r.read_i16()? as i64)))
            }
            ScalarType::Uint16 => {
                |r| read_legacy_array(r, |r| Ok(ArgValue::Int(r.read_u16()? as i64)))
            }
            ScalarType::Int32 => {
                |r| read_legacy_array(r, |r| Ok(ArgValue::Int(r.read_i32()? as i64)))
            }
            ScalarType::Float32 => {
                |r| read_legacy_array(r, |r| Ok(ArgValue::Float(r.read_f32()? as f64)))
            }
            ScalarType::Char => |r| {
                let len = r.read_u32()? as usize;
                let bytes = r.read_bytes(len)?;
                Ok(ArgValue::String(bytes.iter().map(|b| *b as char).collect()))
            },
            ScalarType::Wchar => |r| {
                let len = r.read_u32()? as usize;
                let mut units = Vec::with_capacity(len);
                for _ in 0..len {
                    units.push(r.read_u16()?);
                }
                Ok(ArgValue::String(String::from_utf16_lossy(&units)))
            },
            _ => |r| read_legacy_array(r, |r| Ok(ArgValue::Int(r.read_u32()? as i64))),
        },
    }
}

fn read_legacy_array(reader: &mut LegacyReader<'_>, element: LegacyReadFn) -> Result<ArgValue> {
    let len = reader.read_u32()? as usize;
    if len > reader.remaining() {
        return Err(TraceError::fatal(format!(
            "legacy array of {len} elements exceeds remaining buffer"
        )));
    }
    let mut items = Vec::with_capacity(len);
    for _ in 0..len {
        items.push(element(reader)?);
    }
    Ok(ArgValue::Array(items))
}

/// Decoders keyed by canonical argument string.
#[derive(Default)]
pub struct DecoderCache {
    decoders: HashMap<String, Arc<dyn Decoder>>,
}

impl DecoderCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_generate(&mut self, args: &[Variable]) -> Arc<dyn Decoder> {
        let key = format_args_string(args);
        self.decoders
            .entry(key)
            .or_insert_with(|| generate_decoder(args))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }
}
