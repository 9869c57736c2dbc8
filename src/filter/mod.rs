//! Textual event filters: `typeQuery(arg comparisons)`.
//!
//! A [`Filter`] keeps its last successfully compiled expression. Setting an
//! invalid expression reports [`FilterOutcome::Failed`] and leaves the
//! active filter untouched.

pub mod compile;
pub mod parser;

use std::collections::HashMap;
use std::fmt;

use crate::data::event_type::EventType;
use crate::db::cursor::EventCursor;
use crate::db::type_table::EventTypeTable;
use crate::error::Result;

pub use compile::CompiledFilter;
pub use parser::{parse, FilterExpr};

/// Result of changing a filter's expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterOutcome {
    Updated,
    NoChange,
    /// The expression did not compile; the previous filter stays active.
    Failed(String),
}

#[derive(Default)]
pub struct Filter {
    source: String,
    compiled: Option<CompiledFilter>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and compile without installing.
    pub fn compile(expression: &str) -> Result<CompiledFilter> {
        compile::compile(&parse(expression)?)
    }

    pub fn set_from_string(&mut self, expression: &str) -> FilterOutcome {
        let expression = expression.trim();
        if expression.is_empty() {
            return if self.clear() {
                FilterOutcome::Updated
            } else {
                FilterOutcome::NoChange
            };
        }
        if self.compiled.is_some() && expression == self.source {
            return FilterOutcome::NoChange;
        }
        match Filter::compile(expression) {
            Ok(compiled) => {
                tracing::debug!("Filter set to '{}'", expression);
                self.source = expression.to_string();
                self.compiled = Some(compiled);
                FilterOutcome::Updated
            }
            Err(e) => {
                tracing::debug!("Filter '{}' rejected: {}", expression, e);
                FilterOutcome::Failed(e.to_string())
            }
        }
    }

    /// Returns whether a filter was active.
    pub fn clear(&mut self) -> bool {
        self.source.clear();
        self.compiled.take().is_some()
    }

    pub fn is_active(&self) -> bool {
        self.compiled.is_some()
    }

    pub fn expression(&self) -> &str {
        &self.source
    }

    /// Whether events of `event_type` can match. An inactive filter matches
    /// everything.
    pub fn matches_type(&self, event_type: &EventType) -> bool {
        self.compiled
            .as_ref()
            .map_or(true, |c| (c.type_predicate)(event_type))
    }

    /// Whether the event's arguments pass. Does not check the type.
    pub fn matches_arguments(&self, event: &EventCursor<'_>) -> bool {
        self.compiled
            .as_ref()
            .and_then(|c| c.arg_predicate.as_ref())
            .map_or(true, |p| p(event))
    }

    pub fn matches(&self, event: &EventCursor<'_>) -> bool {
        self.matches_type(event.event_type()) && self.matches_arguments(event)
    }

    /// Type id to match flag for every type in the table.
    pub fn matched_event_types(&self, table: &EventTypeTable) -> HashMap<u32, bool> {
        table
            .get_all()
            .iter()
            .map(|t| (t.id, self.matches_type(t)))
            .collect()
    }

    /// Evaluate the type query once per defined type.
    pub fn type_mask(&self, table: &EventTypeTable) -> TypeMask {
        TypeMask {
            matched: self.matched_event_types(table),
        }
    }

    /// Like [`Filter::matches`], with the type query answered by `mask`.
    pub fn matches_with(&self, mask: &TypeMask, event: &EventCursor<'_>) -> bool {
        mask.contains(event.type_id()) && self.matches_arguments(event)
    }

    #[cfg(test)]
    pub(crate) fn with_compiled(expression: &str, compiled: CompiledFilter) -> Self {
        Self {
            source: expression.to_string(),
            compiled: Some(compiled),
        }
    }
}

/// Type match flags captured from one filter and type table. Types defined
/// after the mask was built never match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeMask {
    matched: HashMap<u32, bool>,
}

impl TypeMask {
    pub fn contains(&self, type_id: u32) -> bool {
        self.matched.get(&type_id).copied().unwrap_or(false)
    }

    pub fn matched_count(&self) -> usize {
        self.matched.values().filter(|m| **m).count()
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filter")
            .field("expression", &self.source)
            .field("active", &self.is_active())
            .finish()
    }
}
