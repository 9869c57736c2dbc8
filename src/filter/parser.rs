//! Parser for the event filter language.
//!
//! ```text
//! query      := type_query? ( "(" comparisons? ")" )?
//! type_query := "/" pattern "/" flags | substring
//! comparisons:= comparison ( ("," | "&&") comparison )*
//! comparison := operand op operand
//! operand    := "@" name | reference | literal
//! reference  := name ( "." name | "[" number "]" | "[" string "]" )*
//! op         := "==" | "!=" | "<" | ">" | "<=" | ">=" | "=~" | "~" | "!~"
//! literal    := number | string | "/" pattern "/" flags | true | false | null
//!             | array | object
//! ```

use serde_json::Value;

use crate::error::{Result, TraceError};

#[derive(Debug, Clone, PartialEq)]
pub struct FilterExpr {
    pub type_query: TypeQuery,
    /// `None` when no parenthesised list was given at all.
    pub arg_query: Option<Vec<Comparison>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeQuery {
    /// Matches every type.
    Any,
    /// Case-insensitive substring of the type name.
    Substring(String),
    Regex { pattern: String, flags: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub lhs: Operand,
    pub op: CompareOp,
    pub rhs: Operand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    /// `=~` or `~`.
    Match,
    NotMatch,
}

impl CompareOp {
    pub fn is_regex(self) -> bool {
        matches!(self, CompareOp::Match | CompareOp::NotMatch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribute {
    Time,
    Duration,
    UserDuration,
    OwnDuration,
    FlowId,
}

impl Attribute {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "time" => Attribute::Time,
            "duration" => Attribute::Duration,
            "userDuration" => Attribute::UserDuration,
            "ownDuration" => Attribute::OwnDuration,
            "flowId" => Attribute::FlowId,
            _ => return None,
        })
    }

    /// Only defined for scope events.
    pub fn is_scope_only(self) -> bool {
        matches!(
            self,
            Attribute::Duration | Attribute::UserDuration | Attribute::OwnDuration
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PathStep {
    Field(String),
    Index(usize),
}

/// Argument name followed by object/array accessors.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessPath {
    pub base: String,
    pub steps: Vec<PathStep>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Attribute(Attribute),
    Reference(AccessPath),
    Value(Value),
    Regex { pattern: String, flags: String },
}

fn error(message: impl Into<String>, pos: usize) -> TraceError {
    TraceError::FilterCompile(format!("{} at offset {}", message.into(), pos))
}

pub fn parse(input: &str) -> Result<FilterExpr> {
    let input = input.trim();
    if input.is_empty() {
        return Err(TraceError::FilterCompile("empty expression".to_string()));
    }
    let mut parser = Parser::new(input);
    let expr = parser.query()?;
    parser.skip_ws();
    if !parser.at_end() {
        return Err(error("unexpected trailing input", parser.pos));
    }
    Ok(expr)
}

struct Parser<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn eat(&mut self, token: &str) -> bool {
        if self.src[self.pos..].starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &str) -> Result<()> {
        self.skip_ws();
        if self.eat(token) {
            Ok(())
        } else {
            Err(error(format!("expected '{token}'"), self.pos))
        }
    }

    fn query(&mut self) -> Result<FilterExpr> {
        let type_query = if self.peek() == Some(b'/') {
            let (pattern, flags) = self.regex_literal()?;
            TypeQuery::Regex { pattern, flags }
        } else {
            let end = self.src[self.pos..]
                .find('(')
                .map_or(self.src.len(), |i| self.pos + i);
            let text = self.src[self.pos..end].trim();
            self.pos = end;
            if text.is_empty() {
                TypeQuery::Any
            } else {
                TypeQuery::Substring(text.to_string())
            }
        };

        self.skip_ws();
        let arg_query = if self.eat("(") {
            Some(self.comparisons()?)
        } else {
            None
        };
        Ok(FilterExpr {
            type_query,
            arg_query,
        })
    }

    fn comparisons(&mut self) -> Result<Vec<Comparison>> {
        let mut list = Vec::new();
        self.skip_ws();
        if self.eat(")") {
            return Ok(list);
        }
        loop {
            list.push(self.comparison()?);
            self.skip_ws();
            if self.eat(")") {
                return Ok(list);
            }
            if !(self.eat(",") || self.eat("&&")) {
                return Err(error("expected ',', '&&' or ')'", self.pos));
            }
        }
    }

    fn comparison(&mut self) -> Result<Comparison> {
        let lhs = self.operand()?;
        self.skip_ws();
        let op = self.operator()?;
        let rhs = self.operand()?;
        Ok(Comparison { lhs, op, rhs })
    }

    fn operator(&mut self) -> Result<CompareOp> {
        // Longest tokens first.
        const OPS: [(&str, CompareOp); 9] = [
            ("==", CompareOp::Eq),
            ("!=", CompareOp::Ne),
            ("<=", CompareOp::Le),
            (">=", CompareOp::Ge),
            ("=~", CompareOp::Match),
            ("!~", CompareOp::NotMatch),
            ("<", CompareOp::Lt),
            (">", CompareOp::Gt),
            ("~", CompareOp::Match),
        ];
        for (token, op) in OPS {
            if self.eat(token) {
                return Ok(op);
            }
        }
        Err(error("expected comparison operator", self.pos))
    }

    fn operand(&mut self) -> Result<Operand> {
        self.skip_ws();
        let start = self.pos;
        match self.peek() {
            Some(b'@') => {
                self.pos += 1;
                let name = self.identifier()?;
                Attribute::from_name(name)
                    .map(Operand::Attribute)
                    .ok_or_else(|| error(format!("unknown attribute '@{name}'"), start))
            }
            Some(b'/') => {
                let (pattern, flags) = self.regex_literal()?;
                Ok(Operand::Regex { pattern, flags })
            }
            Some(b'"' | b'[' | b'{') => self.json_literal().map(Operand::Value),
            Some(b'\'') => self.single_quoted().map(|s| Operand::Value(Value::String(s))),
            Some(b) if b == b'-' || b.is_ascii_digit() => self.number().map(Operand::Value),
            Some(b) if b == b'_' || b == b'$' || b.is_ascii_alphabetic() => {
                let name = self.identifier()?;
                match name {
                    "true" => Ok(Operand::Value(Value::Bool(true))),
                    "false" => Ok(Operand::Value(Value::Bool(false))),
                    "null" => Ok(Operand::Value(Value::Null)),
                    _ => {
                        let base = name.to_string();
                        let steps = self.access_steps()?;
                        Ok(Operand::Reference(AccessPath { base, steps }))
                    }
                }
            }
            _ => Err(error("expected operand", start)),
        }
    }

    fn identifier(&mut self) -> Result<&'a str> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|b| b == b'_' || b == b'$' || b.is_ascii_alphanumeric())
        {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(error("expected identifier", start));
        }
        Ok(&self.src[start..self.pos])
    }

    fn access_steps(&mut self) -> Result<Vec<PathStep>> {
        let mut steps = Vec::new();
        loop {
            if self.eat(".") {
                steps.push(PathStep::Field(self.identifier()?.to_string()));
            } else if self.eat("[") {
                self.skip_ws();
                let step = match self.peek() {
                    Some(b'"') => match self.json_literal()? {
                        Value::String(s) => PathStep::Field(s),
                        _ => return Err(error("expected string key", self.pos)),
                    },
                    Some(b'\'') => PathStep::Field(self.single_quoted()?),
                    _ => {
                        let start = self.pos;
                        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
                            self.pos += 1;
                        }
                        let index = self.src[start..self.pos]
                            .parse::<usize>()
                            .map_err(|_| error("expected array index", start))?;
                        PathStep::Index(index)
                    }
                };
                self.expect("]")?;
                steps.push(step);
            } else {
                return Ok(steps);
            }
        }
    }

    /// `/pattern/flags`, with `\/` allowed inside the pattern.
    fn regex_literal(&mut self) -> Result<(String, String)> {
        let start = self.pos;
        self.pos += 1;
        let mut pattern = String::new();
        let mut chars = self.src[self.pos..].char_indices();
        let mut closed = None;
        while let Some((i, c)) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    Some((_, '/')) => pattern.push('/'),
                    Some((_, other)) => {
                        pattern.push('\\');
                        pattern.push(other);
                    }
                    None => break,
                },
                '/' => {
                    closed = Some(i);
                    break;
                }
                other => pattern.push(other),
            }
        }
        let Some(close) = closed else {
            return Err(error("unterminated regular expression", start));
        };
        if pattern.is_empty() {
            return Err(error("empty regular expression", start));
        }
        self.pos += close + 1;
        let flags_start = self.pos;
        while self.peek().is_some_and(|b| b.is_ascii_alphabetic()) {
            self.pos += 1;
        }
        Ok((pattern, self.src[flags_start..self.pos].to_string()))
    }

    /// Strings, arrays and objects, parsed as JSON.
    fn json_literal(&mut self) -> Result<Value> {
        let mut stream = serde_json::Deserializer::from_str(&self.src[self.pos..]).into_iter::<Value>();
        match stream.next() {
            Some(Ok(value)) => {
                self.pos += stream.byte_offset();
                Ok(value)
            }
            Some(Err(e)) => Err(error(format!("invalid literal: {e}"), self.pos)),
            None => Err(error("expected literal", self.pos)),
        }
    }

    fn single_quoted(&mut self) -> Result<String> {
        let start = self.pos;
        self.pos += 1;
        let mut value = String::new();
        let mut chars = self.src[self.pos..].char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                '\\' => {
                    if let Some((_, escaped)) = chars.next() {
                        value.push(escaped);
                    }
                }
                '\'' => {
                    self.pos += i + 1;
                    return Ok(value);
                }
                other => value.push(other),
            }
        }
        Err(error("unterminated string", start))
    }

    /// Decimal, float, exponent or `0x` hex, optionally negative.
    fn number(&mut self) -> Result<Value> {
        let start = self.pos;
        let negative = self.eat("-");
        if self.eat("0x") || self.eat("0X") {
            let digits = self.pos;
            while self.peek().is_some_and(|b| b.is_ascii_hexdigit()) {
                self.pos += 1;
            }
            let magnitude = i64::from_str_radix(&self.src[digits..self.pos], 16)
                .map_err(|_| error("invalid hex number", start))?;
            return Ok(Value::from(if negative { -magnitude } else { magnitude }));
        }
        while self
            .peek()
            .is_some_and(|b| b.is_ascii_digit() || b == b'.' || b == b'e' || b == b'E')
        {
            let was_exponent = matches!(self.peek(), Some(b'e' | b'E'));
            self.pos += 1;
            if was_exponent && matches!(self.peek(), Some(b'+' | b'-')) {
                self.pos += 1;
            }
        }
        let text = &self.src[start..self.pos];
        if let Ok(int) = text.parse::<i64>() {
            return Ok(Value::from(int));
        }
        text.parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| error(format!("invalid number '{text}'"), start))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reference(base: &str) -> Operand {
        Operand::Reference(AccessPath {
            base: base.to_string(),
            steps: vec![],
        })
    }

    #[test]
    fn test_substring_type_query() {
        let expr = parse("abc123_456").unwrap();
        assert_eq!(expr.type_query, TypeQuery::Substring("abc123_456".into()));
        assert_eq!(expr.arg_query, None);
        assert_eq!(parse("abc123_456()").unwrap().arg_query, Some(vec![]));

        let expr = parse("abc123_456(foo<5)").unwrap();
        assert_eq!(
            expr.arg_query.unwrap(),
            vec![Comparison {
                lhs: reference("foo"),
                op: CompareOp::Lt,
                rhs: Operand::Value(json!(5)),
            }]
        );
    }

    #[test]
    fn test_regex_type_query() {
        let expr = parse(r"/abc\[5\]\(2\)/").unwrap();
        assert_eq!(
            expr.type_query,
            TypeQuery::Regex {
                pattern: r"abc\[5\]\(2\)".into(),
                flags: String::new()
            }
        );
        let expr = parse("/abc/gi(foo<5)").unwrap();
        assert_eq!(
            expr.type_query,
            TypeQuery::Regex {
                pattern: "abc".into(),
                flags: "gi".into()
            }
        );
        assert_eq!(expr.arg_query.unwrap().len(), 1);
    }

    #[test]
    fn test_access_paths() {
        let expr = parse(r#"a(foo.bar[5]["3"].taco<5)"#).unwrap();
        let cmp = &expr.arg_query.unwrap()[0];
        assert_eq!(
            cmp.lhs,
            Operand::Reference(AccessPath {
                base: "foo".into(),
                steps: vec![
                    PathStep::Field("bar".into()),
                    PathStep::Index(5),
                    PathStep::Field("3".into()),
                    PathStep::Field("taco".into()),
                ],
            })
        );
    }

    #[test]
    fn test_literals() {
        let rhs = |q: &str| parse(q).unwrap().arg_query.unwrap()[0].rhs.clone();
        assert_eq!(rhs("a(foo<0x125)"), Operand::Value(json!(0x125)));
        assert_eq!(rhs("a(foo<43.233)"), Operand::Value(json!(43.233)));
        assert_eq!(rhs("a(foo<-7)"), Operand::Value(json!(-7)));
        assert_eq!(rhs(r#"a(foo<"hello world!")"#), Operand::Value(json!("hello world!")));
        assert_eq!(rhs("a(foo<'x')"), Operand::Value(json!("x")));
        assert_eq!(rhs("a(foo<true)"), Operand::Value(json!(true)));
        assert_eq!(rhs("a(foo<null)"), Operand::Value(Value::Null));
        assert_eq!(rhs("a(foo<[1,2])"), Operand::Value(json!([1, 2])));
        assert_eq!(rhs(r#"a(foo<{"a": 5})"#), Operand::Value(json!({"a": 5})));
        assert_eq!(
            rhs("a(foo !~ /blah/)"),
            Operand::Regex {
                pattern: "blah".into(),
                flags: String::new()
            }
        );
    }

    #[test]
    fn test_attributes_and_conjunctions() {
        let expr = parse("(@duration > 100 && @time >= 5, name ~ /x/)").unwrap();
        assert_eq!(expr.type_query, TypeQuery::Any);
        let list = expr.arg_query.unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list[0].lhs, Operand::Attribute(Attribute::Duration));
        assert_eq!(list[1].op, CompareOp::Ge);
        assert_eq!(list[2].op, CompareOp::Match);
    }

    #[test]
    fn test_syntax_errors() {
        assert!(parse("").is_err());
        assert!(parse("a(foo <)").is_err());
        assert!(parse("a(foo 5)").is_err());
        assert!(parse("a(@bogus == 1)").is_err());
        assert!(parse("/unterminated").is_err());
        assert!(parse("a(foo == 1").is_err());
        assert!(parse("a(foo == 1) extra").is_err());
    }
}
