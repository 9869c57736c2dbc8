//! Registry of event types, shared by every zone of a database.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use regex::Regex;

use crate::codec::DecoderCache;
use crate::data::event_type::{Builtin, EventClass, EventFlags, EventType};
use crate::data::variable::{parse_signature, Variable};
use crate::error::{Result, TraceError};

/// Event types by id and by name. Ids are assigned sequentially from 1 and
/// stay stable for the life of the table; names are the identity across
/// sources.
#[derive(Default)]
pub struct EventTypeTable {
    types: Vec<Arc<EventType>>,
    by_name: HashMap<String, Arc<EventType>>,
    decoders: DecoderCache,
}

impl EventTypeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define a type from a signature such as `app#draw(uint32 frame)`.
    pub fn define_type(
        &mut self,
        signature: &str,
        class: EventClass,
        flags: EventFlags,
    ) -> Result<Arc<EventType>> {
        let parsed = parse_signature(signature)?;
        self.define(&parsed.name, class, flags, parsed.args)
    }

    /// Define a type, or return the existing type with the same name.
    ///
    /// Redefining a name with a different class or argument list is a fatal
    /// decode error.
    pub fn define(
        &mut self,
        name: &str,
        class: EventClass,
        flags: EventFlags,
        args: Vec<Variable>,
    ) -> Result<Arc<EventType>> {
        if let Some(existing) = self.by_name.get(name) {
            let same_args = existing.args.len() == args.len()
                && existing
                    .args
                    .iter()
                    .zip(&args)
                    .all(|(a, b)| a.name == b.name && a.arg_type == b.arg_type);
            if existing.class == class && same_args {
                return Ok(existing.clone());
            }
            return Err(TraceError::fatal(format!(
                "event type '{}' redefined as '{}({})' with class {:?}",
                existing.signature(),
                name,
                crate::data::variable::format_args_string(&args),
                class
            )));
        }

        let id = self.types.len() as u32 + 1;
        let decoder = self.decoders.get_or_generate(&args);
        let event_type = Arc::new(EventType::new(
            id,
            name.to_string(),
            class,
            flags,
            args,
            decoder,
        ));
        tracing::debug!("Defined event type {} = {}", id, event_type.signature());
        self.types.push(event_type.clone());
        self.by_name.insert(name.to_string(), event_type.clone());
        Ok(event_type)
    }

    /// Define a builtin with its default signature if it is not yet known.
    pub fn define_builtin(&mut self, builtin: Builtin) -> Result<Arc<EventType>> {
        if let Some(existing) = self.by_name.get(builtin.name()) {
            return Ok(existing.clone());
        }
        let (signature, class, flags) = builtin.definition();
        self.define_type(signature, class, flags)
    }

    /// Type named by a generic `scope#enter` or `trace#timeStamp`. Any type
    /// already registered under `name` is reused whatever its class or
    /// arguments; otherwise an argument-less type of `class` is defined.
    pub fn get_or_define_named(&mut self, name: &str, class: EventClass) -> Result<Arc<EventType>> {
        if let Some(existing) = self.by_name.get(name) {
            return Ok(existing.clone());
        }
        self.define(name, class, EventFlags::NONE, Vec::new())
    }

    pub fn get_by_id(&self, id: u32) -> Option<&Arc<EventType>> {
        id.checked_sub(1).and_then(|idx| self.types.get(idx as usize))
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Arc<EventType>> {
        self.by_name.get(name)
    }

    pub fn get_all(&self) -> &[Arc<EventType>] {
        &self.types
    }

    /// Types whose name matches `regex`, optionally restricted to one class.
    pub fn get_all_matching(&self, regex: &Regex, class: Option<EventClass>) -> Vec<Arc<EventType>> {
        self.types
            .iter()
            .filter(|t| class.map_or(true, |c| t.class == c))
            .filter(|t| regex.is_match(&t.name))
            .cloned()
            .collect()
    }

    /// Ids of the types whose name matches `regex`.
    pub fn get_set_matching(&self, regex: &Regex) -> HashSet<u32> {
        self.types
            .iter()
            .filter(|t| regex.is_match(&t.name))
            .map(|t| t.id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_sequential_from_one() {
        let mut table = EventTypeTable::new();
        let a = table
            .define_type("a#x(uint32 v)", EventClass::Instance, EventFlags::NONE)
            .unwrap();
        let b = table
            .define_type("b#y()", EventClass::Scope, EventFlags::NONE)
            .unwrap();
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert_eq!(table.get_by_id(2).unwrap().name, "b#y");
        assert!(table.get_by_id(0).is_none());
        assert_eq!(table.get_by_name("a#x").unwrap().id, 1);
    }

    #[test]
    fn test_identical_redefinition_is_noop() {
        let mut table = EventTypeTable::new();
        let a = table
            .define_type("a(uint32 v)", EventClass::Instance, EventFlags::NONE)
            .unwrap();
        let again = table
            .define_type("a(uint32 v)", EventClass::Instance, EventFlags::HIGH_FREQUENCY)
            .unwrap();
        assert!(Arc::ptr_eq(&a, &again));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_conflicting_redefinition_is_fatal() {
        let mut table = EventTypeTable::new();
        table
            .define_type("a(uint32 v)", EventClass::Instance, EventFlags::NONE)
            .unwrap();
        let err = table
            .define_type("a(ascii v)", EventClass::Instance, EventFlags::NONE)
            .unwrap_err();
        assert!(matches!(err, TraceError::FatalDecode(_)));
        assert!(table
            .define_type("a(uint32 v)", EventClass::Scope, EventFlags::NONE)
            .is_err());
    }

    #[test]
    fn test_matching_queries() {
        let mut table = EventTypeTable::new();
        table
            .define_type("gl#draw()", EventClass::Scope, EventFlags::NONE)
            .unwrap();
        table
            .define_type("gl#flush()", EventClass::Instance, EventFlags::NONE)
            .unwrap();
        table
            .define_type("net#send()", EventClass::Scope, EventFlags::NONE)
            .unwrap();
        let re = Regex::new("^gl#").unwrap();
        assert_eq!(table.get_all_matching(&re, None).len(), 2);
        assert_eq!(table.get_all_matching(&re, Some(EventClass::Scope)).len(), 1);
        assert_eq!(table.get_set_matching(&re), HashSet::from([1, 2]));
    }

    #[test]
    fn test_builtins_and_named_types() {
        let mut table = EventTypeTable::new();
        let define = table.define_builtin(Builtin::EventDefine).unwrap();
        assert_eq!(define.builtin, Some(Builtin::EventDefine));
        assert_eq!(define.args.len(), 5);
        let scope = table.get_or_define_named("myScope", EventClass::Scope).unwrap();
        assert!(scope.is_scope());
        let same = table.get_or_define_named("myScope", EventClass::Scope).unwrap();
        assert_eq!(scope.id, same.id);
    }

    #[test]
    fn test_named_type_reuses_any_existing_type() {
        let mut table = EventTypeTable::new();
        let draw = table
            .define_type("render(uint32 frame)", EventClass::Scope, EventFlags::NONE)
            .unwrap();
        let named = table.get_or_define_named("render", EventClass::Instance).unwrap();
        assert!(Arc::ptr_eq(&draw, &named));
        assert_eq!(table.len(), 1);
    }
}
