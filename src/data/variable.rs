//! Argument types and event signature parsing.
//!
//! A signature looks like `my.app#render(uint32 frame, ascii name, float32[] times)`.
//! Argument types accept the usual aliases (`byte`, `short`, `long`, `octet`,
//! `unsigned short`, `unsigned long`, `float`, `DOMString`) and arrays may be
//! written either as `T[]` or `sequence<T>`.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Result, TraceError};

/// Pattern for a single signature argument: `unsigned long[] foo` or `uint8 b@3`.
static SIGNATURE_ARG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([a-zA-Z0-9 \[\]<>]+?)\s+([a-zA-Z0-9_]+)(?:@(\d+))?\s*$")
        .expect("Invalid signature argument regex pattern")
});

/// Pattern for a whole signature: `name(args)` or a bare `name`.
static SIGNATURE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([^()\s]+)\s*(?:\((.*)\))?\s*$").expect("Invalid signature regex pattern")
});

/// Element type of an argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Bool,
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float32,
    Ascii,
    Utf8,
    /// Arbitrary JSON value.
    Any,
    FlowId,
    /// Microsecond duration carried in 32 bits.
    Time32,
    Char,
    Wchar,
}

impl ScalarType {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "bool" => ScalarType::Bool,
            "int8" | "byte" => ScalarType::Int8,
            "uint8" | "octet" => ScalarType::Uint8,
            "int16" | "short" => ScalarType::Int16,
            "uint16" | "unsigned short" => ScalarType::Uint16,
            "int32" | "long" => ScalarType::Int32,
            "uint32" | "unsigned long" => ScalarType::Uint32,
            "float32" | "float" => ScalarType::Float32,
            "ascii" => ScalarType::Ascii,
            "utf8" | "DOMString" => ScalarType::Utf8,
            "any" => ScalarType::Any,
            "flowId" => ScalarType::FlowId,
            "time32" => ScalarType::Time32,
            "char" => ScalarType::Char,
            "wchar" => ScalarType::Wchar,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            ScalarType::Bool => "bool",
            ScalarType::Int8 => "int8",
            ScalarType::Uint8 => "uint8",
            ScalarType::Int16 => "int16",
            ScalarType::Uint16 => "uint16",
            ScalarType::Int32 => "int32",
            ScalarType::Uint32 => "uint32",
            ScalarType::Float32 => "float32",
            ScalarType::Ascii => "ascii",
            ScalarType::Utf8 => "utf8",
            ScalarType::Any => "any",
            ScalarType::FlowId => "flowId",
            ScalarType::Time32 => "time32",
            ScalarType::Char => "char",
            ScalarType::Wchar => "wchar",
        }
    }

    /// Whether the type may appear as an array element.
    fn is_array_element(&self) -> bool {
        matches!(
            self,
            ScalarType::Int8
                | ScalarType::Uint8
                | ScalarType::Int16
                | ScalarType::Uint16
                | ScalarType::Int32
                | ScalarType::Uint32
                | ScalarType::Float32
                | ScalarType::Char
                | ScalarType::Wchar
        )
    }
}

/// Type of a single event argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgType {
    Scalar(ScalarType),
    Array(ScalarType),
}

impl ArgType {
    /// Parse a type name, resolving aliases and both array spellings.
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        if let Some(element) = name.strip_suffix("[]") {
            let element = ScalarType::parse(element.trim())?;
            return element.is_array_element().then_some(ArgType::Array(element));
        }
        if let Some(element) = name
            .strip_prefix("sequence<")
            .and_then(|rest| rest.strip_suffix('>'))
        {
            let element = ScalarType::parse(element.trim())?;
            return element.is_array_element().then_some(ArgType::Array(element));
        }
        ScalarType::parse(name).map(ArgType::Scalar)
    }

    /// Whether the encoded width depends on the value.
    pub fn is_variable_width(&self) -> bool {
        matches!(self, ArgType::Array(_))
    }
}

impl fmt::Display for ArgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgType::Scalar(s) => write!(f, "{}", s.name()),
            ArgType::Array(s) => write!(f, "{}[]", s.name()),
        }
    }
}

/// A named, typed argument slot of an event type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Variable {
    pub name: String,
    pub arg_type: ArgType,
    /// Positional index used by callers that pass arguments by position.
    pub ordinal: u32,
}

impl Variable {
    pub fn new(name: impl Into<String>, arg_type: ArgType) -> Self {
        Self {
            name: name.into(),
            arg_type,
            ordinal: 0,
        }
    }
}

/// A parsed signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub name: String,
    pub args: Vec<Variable>,
}

impl Signature {
    /// Canonical argument list, e.g. `uint32 a, ascii b`.
    pub fn args_string(&self) -> String {
        format_args_string(&self.args)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.args_string())
    }
}

pub fn format_args_string(args: &[Variable]) -> String {
    args.iter()
        .map(|v| format!("{} {}", v.arg_type, v.name))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse a full signature string `name(type a, type b)`.
pub fn parse_signature(signature: &str) -> Result<Signature> {
    let caps = SIGNATURE_RE
        .captures(signature)
        .ok_or_else(|| TraceError::fatal(format!("malformed event signature '{signature}'")))?;
    let name = caps[1].to_string();
    let args = match caps.get(2) {
        Some(args) => parse_signature_arguments(args.as_str())
            .map_err(|e| TraceError::fatal(format!("signature '{signature}': {e}")))?,
        None => Vec::new(),
    };
    Ok(Signature { name, args })
}

/// Parse the argument block of a signature, e.g. `uint8 a, uint8 b@3, uint8[] c`.
pub fn parse_signature_arguments(args: &str) -> Result<Vec<Variable>, String> {
    let mut result = Vec::new();
    if args.trim().is_empty() {
        return Ok(result);
    }

    let mut ordinal = 0u32;
    for raw in args.split(',') {
        let caps = SIGNATURE_ARG_RE
            .captures(raw)
            .ok_or_else(|| format!("malformed argument '{}'", raw.trim()))?;
        let type_name = &caps[1];
        let arg_type =
            ArgType::parse(type_name).ok_or_else(|| format!("unknown argument type '{type_name}'"))?;
        if let Some(at) = caps.get(3) {
            ordinal = at
                .as_str()
                .parse()
                .map_err(|_| format!("bad ordinal '{}'", at.as_str()))?;
        }
        if result.iter().any(|v: &Variable| v.name == caps[2]) {
            return Err(format!("duplicate argument '{}'", &caps[2]));
        }
        result.push(Variable {
            name: caps[2].to_string(),
            arg_type,
            ordinal,
        });
        ordinal += 1;
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_signature() {
        let sig = parse_signature("my.app#render(uint32 frame, ascii name)").unwrap();
        assert_eq!(sig.name, "my.app#render");
        assert_eq!(sig.args.len(), 2);
        assert_eq!(sig.args[0].arg_type, ArgType::Scalar(ScalarType::Uint32));
        assert_eq!(sig.args[1].name, "name");
        assert_eq!(sig.args[1].ordinal, 1);
    }

    #[test]
    fn test_parse_bare_and_empty() {
        assert!(parse_signature("foo").unwrap().args.is_empty());
        assert!(parse_signature("wtf.scope#leave()").unwrap().args.is_empty());
    }

    #[test]
    fn test_aliases_and_arrays() {
        let sig = parse_signature(
            "x(unsigned long[] a, sequence<short> b, DOMString c, octet d, float e)",
        )
        .unwrap();
        let types: Vec<String> = sig.args.iter().map(|v| v.arg_type.to_string()).collect();
        assert_eq!(types, vec!["uint32[]", "int16[]", "utf8", "uint8", "float32"]);
        assert_eq!(sig.to_string(), "x(uint32[] a, int16[] b, utf8 c, uint8 d, float32 e)");
    }

    #[test]
    fn test_ordinals() {
        let args = parse_signature_arguments("uint8 a, uint8 b@3, uint8 c").unwrap();
        let ordinals: Vec<u32> = args.iter().map(|v| v.ordinal).collect();
        assert_eq!(ordinals, vec![0, 3, 4]);
    }

    #[test]
    fn test_rejects_unknown_types() {
        assert!(parse_signature("x(quaternion q)").is_err());
        assert!(parse_signature("x(ascii[] names)").is_err());
        assert!(parse_signature("x(uint8 a, uint8 a)").is_err());
    }
}
