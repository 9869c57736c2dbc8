//! Turn a parsed filter expression into event and type predicates.

use std::cmp::Ordering;

use regex::{Regex, RegexBuilder};
use serde_json::Value;

use crate::data::event_type::{EventFlags, EventType};
use crate::db::cursor::EventCursor;
use crate::error::{Result, TraceError};
use crate::filter::parser::{
    AccessPath, Attribute, CompareOp, Comparison, FilterExpr, Operand, PathStep, TypeQuery,
};

pub type TypePredicate = Box<dyn Fn(&EventType) -> bool + Send + Sync>;
pub type EventPredicate = Box<dyn Fn(&EventCursor<'_>) -> bool + Send + Sync>;

pub struct CompiledFilter {
    pub type_predicate: TypePredicate,
    /// `None` when the expression had no argument list.
    pub arg_predicate: Option<EventPredicate>,
}

pub fn compile(expr: &FilterExpr) -> Result<CompiledFilter> {
    let type_regex = match &expr.type_query {
        TypeQuery::Any => None,
        TypeQuery::Substring(text) => Some(build_regex(&regex::escape(text), "i")?),
        TypeQuery::Regex { pattern, flags } => Some(build_regex(pattern, flags)?),
    };
    let type_predicate: TypePredicate = Box::new(move |event_type: &EventType| {
        !event_type.flags.contains(EventFlags::INTERNAL)
            && type_regex
                .as_ref()
                .map_or(true, |re| re.is_match(&event_type.name))
    });

    let arg_predicate = match &expr.arg_query {
        None => None,
        Some(comparisons) => {
            let compiled = comparisons
                .iter()
                .map(compile_comparison)
                .collect::<Result<Vec<_>>>()?;
            let predicate: EventPredicate =
                Box::new(move |event: &EventCursor<'_>| compiled.iter().all(|p| p(event)));
            Some(predicate)
        }
    };

    Ok(CompiledFilter {
        type_predicate,
        arg_predicate,
    })
}

/// Build a regex from JavaScript-style flags. `g` is accepted and ignored.
fn build_regex(pattern: &str, flags: &str) -> Result<Regex> {
    let mut builder = RegexBuilder::new(pattern);
    for flag in flags.chars() {
        match flag {
            'i' => {
                builder.case_insensitive(true);
            }
            'm' => {
                builder.multi_line(true);
            }
            's' => {
                builder.dot_matches_new_line(true);
            }
            'g' => {}
            other => {
                return Err(TraceError::FilterCompile(format!(
                    "unsupported regex flag '{other}'"
                )))
            }
        }
    }
    builder
        .build()
        .map_err(|e| TraceError::FilterCompile(format!("invalid regex /{pattern}/: {e}")))
}

enum Resolved {
    Attribute(Attribute),
    Reference(AccessPath),
    Value(Value),
}

impl Resolved {
    fn evaluate(&self, event: &EventCursor<'_>) -> Option<Value> {
        match self {
            Resolved::Value(value) => Some(value.clone()),
            Resolved::Attribute(attribute) => attribute_value(*attribute, event),
            Resolved::Reference(path) => {
                let mut value = event.argument(&path.base)?.to_json();
                for step in &path.steps {
                    value = match (step, value) {
                        (PathStep::Field(name), Value::Object(mut map)) => map.remove(name)?,
                        (PathStep::Index(index), Value::Array(mut items)) if *index < items.len() => {
                            items.swap_remove(*index)
                        }
                        _ => return None,
                    };
                }
                Some(value)
            }
        }
    }
}

fn attribute_value(attribute: Attribute, event: &EventCursor<'_>) -> Option<Value> {
    if attribute.is_scope_only() && !event.is_scope() {
        return None;
    }
    match attribute {
        Attribute::Time => Some(Value::from(event.time())),
        Attribute::Duration => Some(Value::from(event.total_duration())),
        Attribute::UserDuration => Some(Value::from(event.user_duration())),
        Attribute::OwnDuration => Some(Value::from(event.own_duration())),
        Attribute::FlowId => event.flow_id().map(Value::from),
    }
}

fn resolve(operand: &Operand) -> Option<Resolved> {
    match operand {
        Operand::Attribute(a) => Some(Resolved::Attribute(*a)),
        Operand::Reference(path) => Some(Resolved::Reference(path.clone())),
        Operand::Value(v) => Some(Resolved::Value(v.clone())),
        Operand::Regex { .. } => None,
    }
}

fn compile_comparison(comparison: &Comparison) -> Result<EventPredicate> {
    let op = comparison.op;
    let lhs = resolve(&comparison.lhs).ok_or_else(|| {
        TraceError::FilterCompile("a regular expression cannot be compared against".to_string())
    })?;

    if op.is_regex() {
        let regex = match &comparison.rhs {
            Operand::Regex { pattern, flags } => build_regex(pattern, flags)?,
            Operand::Value(Value::String(pattern)) => build_regex(pattern, "")?,
            _ => {
                return Err(TraceError::FilterCompile(
                    "regex operators need a regex or string on the right".to_string(),
                ))
            }
        };
        let negate = op == CompareOp::NotMatch;
        return Ok(Box::new(move |event: &EventCursor<'_>| {
            match lhs.evaluate(event) {
                Some(Value::String(s)) => regex.is_match(&s) != negate,
                Some(Value::Null) | None => false,
                Some(other) => regex.is_match(&other.to_string()) != negate,
            }
        }));
    }

    let rhs = resolve(&comparison.rhs).ok_or_else(|| {
        TraceError::FilterCompile("a regular expression needs '=~' or '!~'".to_string())
    })?;
    Ok(Box::new(move |event: &EventCursor<'_>| {
        let (Some(a), Some(b)) = (lhs.evaluate(event), rhs.evaluate(event)) else {
            return false;
        };
        match op {
            CompareOp::Eq => loose_eq(&a, &b),
            CompareOp::Ne => !loose_eq(&a, &b),
            CompareOp::Lt => order(&a, &b) == Some(Ordering::Less),
            CompareOp::Gt => order(&a, &b) == Some(Ordering::Greater),
            CompareOp::Le => matches!(order(&a, &b), Some(Ordering::Less | Ordering::Equal)),
            CompareOp::Ge => matches!(order(&a, &b), Some(Ordering::Greater | Ordering::Equal)),
            CompareOp::Match | CompareOp::NotMatch => false,
        }
    }))
}

/// Numbers compare by value regardless of integer/float representation.
fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn order(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::args::{ArgValue, ArgumentData};
    use crate::data::event_type::EventClass;
    use crate::db::store::EventStore;
    use crate::db::type_table::EventTypeTable;
    use crate::filter::parser::parse;

    fn compiled(query: &str) -> CompiledFilter {
        compile(&parse(query).unwrap()).unwrap()
    }

    #[test]
    fn test_type_predicate() {
        let mut table = EventTypeTable::new();
        let draw = table
            .define_type("app#Draw", EventClass::Scope, EventFlags::NONE)
            .unwrap();
        let internal = table
            .define_type("app#drawInternal", EventClass::Scope, EventFlags::INTERNAL)
            .unwrap();

        let filter = compiled("draw");
        assert!((filter.type_predicate)(&draw));
        assert!(!(filter.type_predicate)(&internal));
        assert!(filter.arg_predicate.is_none());

        let filter = compiled("/^app#D/");
        assert!((filter.type_predicate)(&draw));
        assert!(!(compiled("/^app#d/").type_predicate)(&draw));
        assert!((compiled("/^app#d/gi").type_predicate)(&draw));
    }

    #[test]
    fn test_argument_comparisons() {
        let mut table = EventTypeTable::new();
        let load = table
            .define_type("load(uint32 size, ascii url, any info)", EventClass::Scope, EventFlags::NONE)
            .unwrap();
        let mut store = EventStore::new(8);
        let args: ArgumentData = [
            ("size", ArgValue::Int(512)),
            ("url", ArgValue::String("http://a/b.png".into())),
            ("info", ArgValue::Json(serde_json::json!({"tags": ["x", "y"]}))),
        ]
        .into_iter()
        .collect();
        store.insert(load, 10, Some(args));
        store.leave(60);
        store.reconcile();
        let event = EventCursor::new(&store, 0).unwrap();

        let check = |query: &str| (compiled(query).arg_predicate.unwrap())(&event);
        assert!(check("(size > 100)"));
        assert!(check("(size == 512.0)"));
        assert!(!check("(size < 100)"));
        assert!(check("(url =~ /\\.png$/)"));
        assert!(check("(url !~ /jpg/)"));
        assert!(check("(url ~ 'b.png')"));
        assert!(check(r#"(info.tags[1] == "y")"#));
        assert!(!check("(missing == 1)"));
        assert!(check("(@duration == 50, @time >= 10)"));
        assert!(check("(@userDuration == 50 && @ownDuration == 50)"));
        assert!(!check("(@flowId == 1)"));
        assert!(check("(size != 'abc')"));
    }

    #[test]
    fn test_scope_attributes_on_instances() {
        let mut table = EventTypeTable::new();
        let tick = table
            .define_type("tick", EventClass::Instance, EventFlags::NONE)
            .unwrap();
        let mut store = EventStore::new(8);
        store.insert(tick, 5, None);
        store.reconcile();
        let event = EventCursor::new(&store, 0).unwrap();
        assert!(!(compiled("(@duration >= 0)").arg_predicate.unwrap())(&event));
        assert!((compiled("(@time == 5)").arg_predicate.unwrap())(&event));
    }

    #[test]
    fn test_compile_errors() {
        let fails = |query: &str| compile(&parse(query).unwrap()).is_err();
        assert!(fails("/abc/q"));
        assert!(fails("/a(b/"));
        assert!(fails("(a =~ 5)"));
        assert!(fails("(a == /x/)"));
    }
}
