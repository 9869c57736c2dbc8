//! Event type definitions: class, flags and the builtin control events.

use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;

use crate::codec::Decoder;
use crate::data::variable::{format_args_string, ArgType, ScalarType, Variable};

/// Whether events of a type span time or mark a single point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventClass {
    Instance,
    Scope,
}

impl EventClass {
    pub fn from_wire(value: u32) -> Self {
        if value == 1 {
            EventClass::Scope
        } else {
            EventClass::Instance
        }
    }

    pub fn to_wire(self) -> u32 {
        match self {
            EventClass::Instance => 0,
            EventClass::Scope => 1,
        }
    }
}

/// Bitset of event type flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct EventFlags(pub u32);

impl EventFlags {
    pub const NONE: EventFlags = EventFlags(0);
    /// Emitted at a high rate; renderers may thin it out.
    pub const HIGH_FREQUENCY: EventFlags = EventFlags(1 << 1);
    /// Time spent in this scope is attributed to its ancestors' system time.
    pub const SYSTEM_TIME: EventFlags = EventFlags(1 << 2);
    /// Hidden from filters and statistics.
    pub const INTERNAL: EventFlags = EventFlags(1 << 3);
    /// Arguments are merged into the enclosing scope instead of stored.
    pub const APPEND_SCOPE_DATA: EventFlags = EventFlags(1 << 4);
    pub const BUILTIN: EventFlags = EventFlags(1 << 5);
    pub const APPEND_FLOW_DATA: EventFlags = EventFlags(1 << 6);

    pub fn contains(self, other: EventFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for EventFlags {
    type Output = EventFlags;

    fn bitor(self, rhs: EventFlags) -> EventFlags {
        EventFlags(self.0 | rhs.0)
    }
}

/// Control and well-known events recognised by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    EventDefine,
    Discontinuity,
    ZoneCreate,
    ZoneDelete,
    ZoneSet,
    ScopeEnter,
    ScopeEnterTracing,
    ScopeLeave,
    ScopeAppendData,
    FlowBranch,
    FlowExtend,
    FlowTerminate,
    TraceMark,
    TraceTimeStamp,
    TimeRangeBegin,
    TimeRangeEnd,
    FrameStart,
    FrameEnd,
}

impl Builtin {
    pub const ALL: [Builtin; 18] = [
        Builtin::EventDefine,
        Builtin::Discontinuity,
        Builtin::ZoneCreate,
        Builtin::ZoneDelete,
        Builtin::ZoneSet,
        Builtin::ScopeEnter,
        Builtin::ScopeEnterTracing,
        Builtin::ScopeLeave,
        Builtin::ScopeAppendData,
        Builtin::FlowBranch,
        Builtin::FlowExtend,
        Builtin::FlowTerminate,
        Builtin::TraceMark,
        Builtin::TraceTimeStamp,
        Builtin::TimeRangeBegin,
        Builtin::TimeRangeEnd,
        Builtin::FrameStart,
        Builtin::FrameEnd,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Builtin::EventDefine => "wtf.event#define",
            Builtin::Discontinuity => "wtf.trace#discontinuity",
            Builtin::ZoneCreate => "wtf.zone#create",
            Builtin::ZoneDelete => "wtf.zone#delete",
            Builtin::ZoneSet => "wtf.zone#set",
            Builtin::ScopeEnter => "wtf.scope#enter",
            Builtin::ScopeEnterTracing => "wtf.scope#enterTracing",
            Builtin::ScopeLeave => "wtf.scope#leave",
            Builtin::ScopeAppendData => "wtf.scope#appendData",
            Builtin::FlowBranch => "wtf.flow#branch",
            Builtin::FlowExtend => "wtf.flow#extend",
            Builtin::FlowTerminate => "wtf.flow#terminate",
            Builtin::TraceMark => "wtf.trace#mark",
            Builtin::TraceTimeStamp => "wtf.trace#timeStamp",
            Builtin::TimeRangeBegin => "wtf.timeRange#begin",
            Builtin::TimeRangeEnd => "wtf.timeRange#end",
            Builtin::FrameStart => "wtf.timing#frameStart",
            Builtin::FrameEnd => "wtf.timing#frameEnd",
        }
    }

    pub fn from_name(name: &str) -> Option<Builtin> {
        Builtin::ALL.iter().copied().find(|b| b.name() == name)
    }

    /// Default definition used when a source references a builtin it never
    /// defined: (signature, class, flags).
    pub fn definition(&self) -> (&'static str, EventClass, EventFlags) {
        let hidden = EventFlags::BUILTIN | EventFlags::INTERNAL;
        match self {
            Builtin::EventDefine => (
                "wtf.event#define(uint16 wireId, uint16 eventClass, uint32 flags, ascii name, ascii args)",
                EventClass::Instance,
                hidden,
            ),
            Builtin::Discontinuity => (
                "wtf.trace#discontinuity()",
                EventClass::Instance,
                EventFlags::BUILTIN,
            ),
            Builtin::ZoneCreate => (
                "wtf.zone#create(uint16 zoneId, ascii name, ascii type, ascii location)",
                EventClass::Instance,
                hidden,
            ),
            Builtin::ZoneDelete => ("wtf.zone#delete(uint16 zoneId)", EventClass::Instance, hidden),
            Builtin::ZoneSet => ("wtf.zone#set(uint16 zoneId)", EventClass::Instance, hidden),
            Builtin::ScopeEnter => (
                "wtf.scope#enter(ascii name)",
                EventClass::Scope,
                EventFlags::BUILTIN,
            ),
            Builtin::ScopeEnterTracing => (
                "wtf.scope#enterTracing()",
                EventClass::Scope,
                hidden | EventFlags::SYSTEM_TIME,
            ),
            Builtin::ScopeLeave => ("wtf.scope#leave()", EventClass::Instance, hidden),
            Builtin::ScopeAppendData => (
                "wtf.scope#appendData(ascii name, any value)",
                EventClass::Instance,
                hidden | EventFlags::APPEND_SCOPE_DATA,
            ),
            Builtin::FlowBranch => (
                "wtf.flow#branch(flowId id, flowId parentId, ascii name, any value)",
                EventClass::Instance,
                hidden,
            ),
            Builtin::FlowExtend => (
                "wtf.flow#extend(flowId id, ascii name, any value)",
                EventClass::Instance,
                hidden,
            ),
            Builtin::FlowTerminate => (
                "wtf.flow#terminate(flowId id, any value)",
                EventClass::Instance,
                hidden,
            ),
            Builtin::TraceMark => (
                "wtf.trace#mark(ascii name, any value)",
                EventClass::Instance,
                hidden,
            ),
            Builtin::TraceTimeStamp => (
                "wtf.trace#timeStamp(ascii name, any value)",
                EventClass::Instance,
                EventFlags::BUILTIN,
            ),
            Builtin::TimeRangeBegin => (
                "wtf.timeRange#begin(int32 id, ascii name, any value)",
                EventClass::Instance,
                hidden,
            ),
            Builtin::TimeRangeEnd => ("wtf.timeRange#end(int32 id)", EventClass::Instance, hidden),
            Builtin::FrameStart => (
                "wtf.timing#frameStart(uint32 number)",
                EventClass::Instance,
                hidden,
            ),
            Builtin::FrameEnd => (
                "wtf.timing#frameEnd(uint32 number)",
                EventClass::Instance,
                hidden,
            ),
        }
    }
}

/// A registered event type. Immutable once registered.
pub struct EventType {
    pub id: u32,
    pub name: String,
    pub class: EventClass,
    pub flags: EventFlags,
    pub args: Vec<Variable>,
    pub builtin: Option<Builtin>,
    decoder: Arc<dyn Decoder>,
}

impl EventType {
    pub(crate) fn new(
        id: u32,
        name: String,
        class: EventClass,
        flags: EventFlags,
        args: Vec<Variable>,
        decoder: Arc<dyn Decoder>,
    ) -> Self {
        let builtin = Builtin::from_name(&name);
        Self {
            id,
            name,
            class,
            flags,
            args,
            builtin,
            decoder,
        }
    }

    pub fn is_scope(&self) -> bool {
        self.class == EventClass::Scope
    }

    /// Hidden types are not counted or matched by filters.
    pub fn is_hidden(&self) -> bool {
        self.flags.contains(EventFlags::INTERNAL) || self.flags.contains(EventFlags::BUILTIN)
    }

    pub fn decoder(&self) -> &dyn Decoder {
        self.decoder.as_ref()
    }

    /// `name(type a, type b)`.
    pub fn signature(&self) -> String {
        format!("{}({})", self.name, self.args_string())
    }

    pub fn args_string(&self) -> String {
        format_args_string(&self.args)
    }

    /// Name of the first flowId-typed argument.
    pub fn flow_id_arg(&self) -> Option<&str> {
        self.args
            .iter()
            .find(|v| v.arg_type == ArgType::Scalar(ScalarType::FlowId))
            .map(|v| v.name.as_str())
    }
}

impl fmt::Debug for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventType")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("class", &self.class)
            .field("flags", &self.flags)
            .field("args", &self.args_string())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::variable::parse_signature;

    #[test]
    fn test_flags() {
        let flags = EventFlags::BUILTIN | EventFlags::INTERNAL;
        assert!(flags.contains(EventFlags::INTERNAL));
        assert!(!flags.contains(EventFlags::SYSTEM_TIME));
        assert_eq!(flags.bits(), 0x28);
    }

    #[test]
    fn test_builtin_definitions_parse() {
        for builtin in Builtin::ALL {
            let (signature, _, _) = builtin.definition();
            let parsed = parse_signature(signature).unwrap();
            assert_eq!(parsed.name, builtin.name());
            assert_eq!(Builtin::from_name(&parsed.name), Some(builtin));
        }
    }

    #[test]
    fn test_class_wire_values() {
        assert_eq!(EventClass::from_wire(1), EventClass::Scope);
        assert_eq!(EventClass::from_wire(0), EventClass::Instance);
        assert_eq!(EventClass::Scope.to_wire(), 1);
    }
}
