//! Argument encoders, the inverse of the generated decoders.

use crate::codec::decoder::NULL_ARRAY;
use crate::codec::string_table::{StringTableBuilder, NULL_STRING};
use crate::data::args::{ArgValue, ArgumentData};
use crate::data::variable::{ArgType, ScalarType, Variable};
use crate::error::{Result, TraceError};

fn mismatch(var: &Variable, value: &ArgValue) -> TraceError {
    TraceError::Encode(format!(
        "argument '{}' of type {} cannot hold {value:?}",
        var.name, var.arg_type
    ))
}

fn int_of(var: &Variable, value: &ArgValue) -> Result<i64> {
    match value {
        ArgValue::Null => Ok(0),
        v => v.as_i64().ok_or_else(|| mismatch(var, v)),
    }
}

fn float_of(var: &Variable, value: &ArgValue) -> Result<f32> {
    match value {
        ArgValue::Null => Ok(0.0),
        v => v.as_f64().map(|f| f as f32).ok_or_else(|| mismatch(var, v)),
    }
}

fn char_of(var: &Variable, value: &ArgValue) -> Result<u32> {
    match value {
        ArgValue::Null => Ok(0),
        ArgValue::String(s) => Ok(s.chars().next().map_or(0, |c| c as u32)),
        v => int_of(var, v).map(|i| i as u32),
    }
}

fn json_text(value: &ArgValue) -> Option<String> {
    match value {
        ArgValue::Null => None,
        other => Some(other.to_json().to_string()),
    }
}

fn push_word(out: &mut Vec<u8>, word: u32) {
    out.extend_from_slice(&word.to_le_bytes());
}

fn pad_to_word(out: &mut Vec<u8>) {
    while out.len() % 4 != 0 {
        out.push(0);
    }
}

/// Encode an argument block in the modern word-aligned layout.
pub fn encode_packed(
    vars: &[Variable],
    values: Option<&ArgumentData>,
    strings: &mut StringTableBuilder,
    out: &mut Vec<u8>,
) -> Result<()> {
    debug_assert!(out.len() % 4 == 0);
    for var in vars {
        let value = values
            .and_then(|v| v.get(&var.name))
            .unwrap_or(&ArgValue::Null);
        match var.arg_type {
            ArgType::Scalar(scalar) => {
                let word = match scalar {
                    ScalarType::Bool => (int_of(var, value)? != 0) as u32,
                    ScalarType::Float32 => float_of(var, value)?.to_bits(),
                    ScalarType::Ascii | ScalarType::Utf8 => match value {
                        ArgValue::Null => NULL_STRING,
                        ArgValue::String(s) => strings.add(s),
                        other => return Err(mismatch(var, other)),
                    },
                    ScalarType::Any => match json_text(value) {
                        Some(text) => strings.add(&text),
                        None => NULL_STRING,
                    },
                    ScalarType::Char | ScalarType::Wchar => char_of(var, value)?,
                    _ => int_of(var, value)? as u32,
                };
                push_word(out, word);
            }
            ArgType::Array(element) => encode_packed_array(var, element, value, out)?,
        }
    }
    Ok(())
}

fn encode_packed_array(
    var: &Variable,
    element: ScalarType,
    value: &ArgValue,
    out: &mut Vec<u8>,
) -> Result<()> {
    match (element, value) {
        (_, ArgValue::Null) => push_word(out, NULL_ARRAY),
        (ScalarType::Char, ArgValue::String(s)) => {
            let bytes: Vec<u8> = s.chars().map(|c| c as u32 as u8).collect();
            push_word(out, bytes.len() as u32);
            out.extend_from_slice(&bytes);
            pad_to_word(out);
        }
        (ScalarType::Wchar, ArgValue::String(s)) => {
            let units: Vec<u16> = s.encode_utf16().collect();
            push_word(out, units.len() as u32);
            for unit in units {
                out.extend_from_slice(&unit.to_le_bytes());
            }
            pad_to_word(out);
        }
        (_, ArgValue::Array(items)) => {
            push_word(out, items.len() as u32);
            for item in items {
                match element {
                    ScalarType::Int8 | ScalarType::Uint8 | ScalarType::Char => {
                        out.push(int_of(var, item)? as u8)
                    }
                    ScalarType::Int16 | ScalarType::Uint16 | ScalarType::Wchar => {
                        out.extend_from_slice(&(int_of(var, item)? as u16).to_le_bytes())
                    }
                    ScalarType::Float32 => push_word(out, float_of(var, item)?.to_bits()),
                    _ => push_word(out, int_of(var, item)? as u32),
                }
            }
            pad_to_word(out);
        }
        (_, other) => return Err(mismatch(var, other)),
    }
    Ok(())
}

/// Encode an argument block in the legacy sequential big-endian layout.
pub fn encode_legacy(vars: &[Variable], values: Option<&ArgumentData>, out: &mut Vec<u8>) -> Result<()> {
    for var in vars {
        let value = values
            .and_then(|v| v.get(&var.name))
            .unwrap_or(&ArgValue::Null);
        match var.arg_type {
            ArgType::Scalar(scalar) => match scalar {
                ScalarType::Bool | ScalarType::Int8 | ScalarType::Uint8 => {
                    out.push(int_of(var, value)? as u8)
                }
                ScalarType::Char => out.push(char_of(var, value)? as u8),
                ScalarType::Int16 | ScalarType::Uint16 => {
                    out.extend_from_slice(&(int_of(var, value)? as u16).to_be_bytes())
                }
                ScalarType::Wchar => out.extend_from_slice(&(char_of(var, value)? as u16).to_be_bytes()),
                ScalarType::Float32 => {
                    out.extend_from_slice(&float_of(var, value)?.to_bits().to_be_bytes())
                }
                ScalarType::Ascii => match value {
                    ArgValue::Null => out.extend_from_slice(&0u16.to_be_bytes()),
                    ArgValue::String(s) => write_legacy_ascii(out, s),
                    other => return Err(mismatch(var, other)),
                },
                ScalarType::Utf8 => match value {
                    ArgValue::Null => out.extend_from_slice(&0u16.to_be_bytes()),
                    ArgValue::String(s) => write_legacy_utf8(out, s),
                    other => return Err(mismatch(var, other)),
                },
                ScalarType::Any => match json_text(value) {
                    Some(text) => write_legacy_utf8(out, &text),
                    None => out.extend_from_slice(&0u16.to_be_bytes()),
                },
                _ => out.extend_from_slice(&(int_of(var, value)? as u32).to_be_bytes()),
            },
            ArgType::Array(element) => {
                match (element, value) {
                    (ScalarType::Char, ArgValue::String(s)) => {
                        out.extend_from_slice(&(s.chars().count() as u32).to_be_bytes());
                        out.extend(s.chars().map(|c| c as u32 as u8));
                    }
                    (ScalarType::Wchar, ArgValue::String(s)) => {
                        let units: Vec<u16> = s.encode_utf16().collect();
                        out.extend_from_slice(&(units.len() as u32).to_be_bytes());
                        for unit in units {
                            out.extend_from_slice(&unit.to_be_bytes());
                        }
                    }
                    (_, ArgValue::Null) => out.extend_from_slice(&0u32.to_be_bytes()),
                    (_, ArgValue::Array(items)) => {
                        out.extend_from_slice(&(items.len() as u32).to_be_bytes());
                        for item in items {
                            match element {
                                ScalarType::Int8 | ScalarType::Uint8 => out.push(int_of(var, item)? as u8),
                                ScalarType::Int16 | ScalarType::Uint16 => {
                                    out.extend_from_slice(&(int_of(var, item)? as u16).to_be_bytes())
                                }
                                ScalarType::Float32 => out
                                    .extend_from_slice(&float_of(var, item)?.to_bits().to_be_bytes()),
                                _ => out.extend_from_slice(&(int_of(var, item)? as u32).to_be_bytes()),
                            }
                        }
                    }
                    (_, other) => return Err(mismatch(var, other)),
                }
            }
        }
    }
    Ok(())
}

fn write_legacy_ascii(out: &mut Vec<u8>, value: &str) {
    let bytes: Vec<u8> = value.chars().map(|c| c as u32 as u8).collect();
    out.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    out.extend_from_slice(&bytes);
}

pub(crate) fn write_legacy_utf8(out: &mut Vec<u8>, value: &str) {
    let chars = value.chars().count().max(1) as u16;
    out.extend_from_slice(&chars.to_be_bytes());
    out.extend_from_slice(&(value.len() as u16).to_be_bytes());
    out.extend_from_slice(value.as_bytes());
}
