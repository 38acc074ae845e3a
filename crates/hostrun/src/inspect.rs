//! # Introspection Contexts
//!
//! The `ContextProvider` the agent actually runs: each session gets an
//! `IntrospectionContext` that answers `hostrpc` requests against the shared
//! `TypeProvider`.
//!
//! ## Invariants
//! - **Pinned Ids**: A wire object id is an index into the session's pin table.
//!   Ids are only valid on the session that issued them, and stay valid until
//!   the session closes.
//! - **Release On Teardown**: Every object pinned by a session is released
//!   exactly once, by `teardown`.
//! - **Answer Everything**: A request that decodes always gets a response with
//!   its id. Resolver and normalizer failures become `Error` bodies.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context as _;
use hostreflect::HostValue;
use hostreflect::MemberKind;
use hostreflect::ObjectRef;
use hostreflect::TypeHandle;
use hostreflect::TypeProvider;
use hostreflect::descriptor;
use hostreflect::normalize;
use hostreflect::provider::ClassKind;
use hostreflect::provider::OBJECT_CLASS;
use hostreflect::provider::STRING_CLASS;
use hostreflect::resolver;
use hostrpc::ClassCategory;
use hostrpc::ClassEntry;
use hostrpc::FieldEntry;
use hostrpc::NO_OBJECT;
use hostrpc::Request;
use hostrpc::RequestBody;
use hostrpc::Response;
use hostrpc::ResponseBody;
use hostrpc::Target;
use hostrpc::ThreadEntry;
use hostrpc::WireValue;
use tracing::debug;

use crate::context::ContextProvider;
use crate::context::Event;
use crate::context::ExecutionContext;
use crate::logtail::LogToggle;
use crate::session::ConnectionId;

/// Nesting depth past which sequences are sent as object references.
pub const MAX_SERIALIZE_DEPTH: usize = 8;

/// Reply id used when a failed request's own id cannot be recovered.
pub const UNKNOWN_REQUEST_ID: i64 = 0;

#[derive(Debug)]
pub enum Error {
    Reflect(hostreflect::Error),
    /// The id was never issued by this session.
    UnknownObjectId(i64),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reflect(e) => write!(f, "{}", e),
            Self::UnknownObjectId(id) => write!(f, "Unknown object id: {}", id),
        }
    }
}

impl std::error::Error for Error {}

impl From<hostreflect::Error> for Error {
    fn from(e: hostreflect::Error) -> Self {
        Self::Reflect(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

pub struct IntrospectionProvider {
    types: Arc<dyn TypeProvider>,
    log_toggle: LogToggle,
}

impl IntrospectionProvider {
    pub fn new(types: Arc<dyn TypeProvider>, log_toggle: LogToggle) -> Self {
        Self { types, log_toggle }
    }
}

impl ContextProvider for IntrospectionProvider {
    fn create_context(&self, id: ConnectionId) -> anyhow::Result<Box<dyn ExecutionContext>> {
        Ok(Box::new(IntrospectionContext::new(id, self.types.clone(), self.log_toggle.clone())))
    }

    fn encode_event(&self, event: &Event) -> anyhow::Result<Vec<u8>> {
        match event {
            Event::Log(line) => Ok(Response::log_stream(line.as_str()).encode()?),
        }
    }

    fn encode_failure(&self, request: &[u8], message: &str) -> Vec<u8> {
        let id = hostrpc::peek_id(request).unwrap_or(UNKNOWN_REQUEST_ID);
        // an empty payload is still a reply the client can observe
        Response::error(id, message).encode().unwrap_or_default()
    }
}

pub struct IntrospectionContext {
    id: ConnectionId,
    types: Arc<dyn TypeProvider>,
    log_toggle: LogToggle,
    /// Index is the wire object id.
    pinned: Vec<ObjectRef>,
    pin_ids: HashMap<ObjectRef, i64>,
}

impl IntrospectionContext {
    pub fn new(id: ConnectionId, types: Arc<dyn TypeProvider>, log_toggle: LogToggle) -> Self {
        Self {
            id,
            types,
            log_toggle,
            pinned: Vec::new(),
            pin_ids: HashMap::new(),
        }
    }

    /// Number of objects this session currently keeps alive.
    pub fn pinned_count(&self) -> usize {
        self.pinned.len()
    }

    /// Answers one decoded request body.
    pub fn answer(&mut self, body: RequestBody) -> Result<ResponseBody> {
        match body {
            RequestBody::LoadedClasses => Ok(ResponseBody::LoadedClasses(self.loaded_classes())),
            RequestBody::StaticFields { class_name } => {
                let fields = resolver::enumerate_fields(&*self.types, &class_name, MemberKind::Static)?;
                let entries = fields
                    .into_iter()
                    .map(|summary| {
                        let value = self.types.static_field(&class_name, &summary.name);
                        self.field_entry(summary, value)
                    })
                    .collect();
                Ok(ResponseBody::Fields(entries))
            }
            RequestBody::ObjectFields { object_id } => {
                let object = self.object(object_id)?;
                let class = self.member_class(object)?;
                let fields = resolver::enumerate_fields(&*self.types, &class, MemberKind::Instance)?;
                let entries = fields
                    .into_iter()
                    .map(|summary| {
                        let value = self.types.instance_field(object, &summary.name);
                        self.field_entry(summary, value)
                    })
                    .collect();
                Ok(ResponseBody::Fields(entries))
            }
            RequestBody::FieldSignature { target, field } => {
                let (class, kind) = self.target(&target)?;
                let found = resolver::find_field_signature(&*self.types, &class, &field, kind)?;
                Ok(found.map_or(ResponseBody::NotFound, ResponseBody::Signature))
            }
            RequestBody::MethodSignature { target, method, hints } => {
                let (class, kind) = self.target(&target)?;
                let hints: Vec<&str> = hints.iter().map(String::as_str).collect();
                let found = resolver::find_method_signature(&*self.types, &class, &method, &hints, kind)?;
                Ok(found.map_or(ResponseBody::NotFound, ResponseBody::Signature))
            }
            RequestBody::ReadSequence { object_id } => {
                let object = self.object(object_id)?;
                let sequence = normalize::to_sequence(&*self.types, object)?;
                let items = sequence
                    .iter()
                    .map(|item| self.serialize(item.value, 1).0)
                    .collect();
                Ok(ResponseBody::Sequence {
                    list_type: descriptor::display_name(sequence.source_type()),
                    items,
                })
            }
            RequestBody::ProcessStatus => {
                let threads = self
                    .types
                    .threads()
                    .into_iter()
                    .map(|t| ThreadEntry {
                        name: t.name,
                        daemon: t.daemon,
                        stack_trace: t.stack_trace,
                    })
                    .collect();
                Ok(ResponseBody::ProcessStatus { threads })
            }
            RequestBody::SetLogStream { enabled } => {
                self.log_toggle.set(enabled);
                debug!(id = %self.id, enabled, "log stream toggled");
                Ok(ResponseBody::Ack)
            }
        }
    }

    fn loaded_classes(&self) -> Vec<ClassEntry> {
        self.types
            .loaded_classes()
            .into_iter()
            .map(|class| ClassEntry {
                name: class.name,
                category: match class.kind {
                    ClassKind::Class => ClassCategory::Class,
                    ClassKind::Interface => ClassCategory::Interface,
                    ClassKind::Enum => ClassCategory::Enum,
                    ClassKind::Annotation => ClassCategory::Annotation,
                    ClassKind::Unresolved => ClassCategory::Unresolved,
                },
                loaded: class.loaded,
            })
            .collect()
    }

    fn field_entry(&mut self, summary: resolver::FieldSummary, value: Option<HostValue>) -> FieldEntry {
        let (value, object_id) = match value {
            Some(value) => self.serialize(value, 0),
            None => (WireValue::NotPresent, NO_OBJECT),
        };
        FieldEntry {
            name: summary.name,
            type_name: summary.type_name,
            descriptor: summary.descriptor,
            value,
            object_id,
        }
    }

    fn object(&self, object_id: i64) -> Result<ObjectRef> {
        usize::try_from(object_id)
            .ok()
            .and_then(|index| self.pinned.get(index))
            .copied()
            .ok_or(Error::UnknownObjectId(object_id))
    }

    /// The class whose members an object exposes. Arrays expose `Object`'s.
    fn member_class(&self, object: ObjectRef) -> Result<String> {
        let ty = self
            .types
            .type_of(object)
            .ok_or(hostreflect::Error::UnknownObject(object.0))?;
        Ok(ty.class_name().unwrap_or(OBJECT_CLASS).to_string())
    }

    fn target(&self, target: &Target) -> Result<(String, MemberKind)> {
        match target {
            Target::Class(name) => Ok((name.clone(), MemberKind::Static)),
            Target::Object(id) => {
                let object = self.object(*id)?;
                Ok((self.member_class(object)?, MemberKind::Instance))
            }
        }
    }

    fn pin(&mut self, object: ObjectRef) -> i64 {
        if let Some(id) = self.pin_ids.get(&object) {
            return *id;
        }
        self.types.pin(object);
        let id = self.pinned.len() as i64;
        self.pinned.push(object);
        self.pin_ids.insert(object, id);
        id
    }

    /// Converts a host value to its wire form, returning the pinned id when the
    /// value went out as an object reference.
    fn serialize(&mut self, value: HostValue, depth: usize) -> (WireValue, i64) {
        let wire = match value {
            HostValue::Byte(v) => WireValue::Int(v.into()),
            HostValue::Short(v) => WireValue::Int(v.into()),
            HostValue::Int(v) => WireValue::Int(v.into()),
            HostValue::Long(v) => WireValue::Int(v),
            HostValue::Char(v) => WireValue::Int(v.into()),
            HostValue::Float(v) => WireValue::Float(v.into()),
            HostValue::Double(v) => WireValue::Float(v),
            HostValue::Boolean(v) => WireValue::Bool(v),
            HostValue::Null => WireValue::Null,
            HostValue::Object(object) => return self.serialize_object(object, depth),
        };
        (wire, NO_OBJECT)
    }

    fn serialize_object(&mut self, object: ObjectRef, depth: usize) -> (WireValue, i64) {
        let Some(ty) = self.types.type_of(object) else {
            return (WireValue::Null, NO_OBJECT);
        };

        if ty.class_name() == Some(STRING_CLASS) {
            if let Some(text) = self.types.string_value(object) {
                return (WireValue::Str(text), NO_OBJECT);
            }
        }
        if let Some(inner) = self.types.unbox(object) {
            return self.serialize(inner, depth);
        }
        if depth < MAX_SERIALIZE_DEPTH {
            if let Ok(sequence) = self.sequence(object) {
                let items = sequence
                    .iter()
                    .map(|item| self.serialize(item.value, depth + 1).0)
                    .collect();
                let list_type = descriptor::display_name(sequence.source_type());
                return (WireValue::List { list_type, items }, NO_OBJECT);
            }
        }

        let object_id = self.pin(object);
        (
            WireValue::Object {
                class_name: descriptor::display_name(&ty),
                object_id,
            },
            object_id,
        )
    }

    fn sequence(&self, object: ObjectRef) -> Result<normalize::NormalizedSequence> {
        if !normalize::is_sequence_like(&*self.types, object)? {
            let ty = self.types.type_of(object).unwrap_or(TypeHandle::Void);
            return Err(hostreflect::Error::NotSequence(ty.to_string()).into());
        }
        Ok(normalize::to_sequence(&*self.types, object)?)
    }
}

impl ExecutionContext for IntrospectionContext {
    fn handle_request(&mut self, request: &[u8]) -> anyhow::Result<Vec<u8>> {
        let request = Request::decode(request).context("malformed request")?;
        debug!(id = %self.id, request = request.id, "handling request");

        let body = self.answer(request.body).unwrap_or_else(|e| ResponseBody::Error(e.to_string()));
        Ok(Response::new(request.id, body).encode()?)
    }

    fn teardown(&mut self) {
        for object in self.pinned.drain(..) {
            self.types.release(object);
        }
        self.pin_ids.clear();
        debug!(id = %self.id, "context released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostreflect::PrimitiveKind;
    use hostreflect::mock::MockRuntime;

    const INT: TypeHandle = TypeHandle::Primitive(PrimitiveKind::Int);

    fn runtime() -> Arc<MockRuntime> {
        let runtime = Arc::new(MockRuntime::with_core_classes());
        let numbers = runtime.new_array(INT, vec![HostValue::Int(1), HostValue::Int(2)]);
        let name = runtime.new_string("widget");
        let point = runtime.new_instance("t.Point", &[("x", HostValue::Int(3))]);
        runtime
            .define_class("t.Point")
            .field("x", INT)
            .field("y", INT)
            .method("move", vec![INT, INT], TypeHandle::Void)
            .build();
        runtime
            .define_class("t.Demo")
            .static_field("numbers", TypeHandle::array_of(INT, 1), HostValue::Object(numbers))
            .static_field("name", TypeHandle::class(STRING_CLASS), HostValue::Object(name))
            .static_field("origin", TypeHandle::class("t.Point"), HostValue::Object(point))
            .static_field("enabled", TypeHandle::Primitive(PrimitiveKind::Boolean), HostValue::Boolean(true))
            .build();
        runtime
    }

    fn context(runtime: &Arc<MockRuntime>) -> IntrospectionContext {
        IntrospectionContext::new(ConnectionId(1), runtime.clone(), LogToggle::new(true))
    }

    fn statics(ctx: &mut IntrospectionContext) -> Vec<FieldEntry> {
        match ctx.answer(RequestBody::StaticFields { class_name: "t.Demo".into() }).unwrap() {
            ResponseBody::Fields(fields) => fields,
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_static_fields_are_serialized() {
        let runtime = runtime();
        let mut ctx = context(&runtime);
        let fields = statics(&mut ctx);

        let names: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["numbers", "name", "origin", "enabled"]);

        assert_eq!(fields[0].type_name, "int[]");
        assert_eq!(fields[0].descriptor, "[I");
        assert_eq!(
            fields[0].value,
            WireValue::List {
                list_type: "int[]".into(),
                items: vec![WireValue::Int(1), WireValue::Int(2)],
            }
        );
        assert_eq!(fields[0].object_id, NO_OBJECT);
        assert_eq!(fields[1].value, WireValue::Str("widget".into()));
        assert_eq!(
            fields[2].value,
            WireValue::Object { class_name: "t.Point".into(), object_id: 0 }
        );
        assert_eq!(fields[2].object_id, 0);
        assert_eq!(fields[3].value, WireValue::Bool(true));
    }

    #[test]
    fn test_pinned_object_can_be_inspected() {
        let runtime = runtime();
        let mut ctx = context(&runtime);
        statics(&mut ctx);

        let ResponseBody::Fields(fields) = ctx.answer(RequestBody::ObjectFields { object_id: 0 }).unwrap() else {
            panic!("expected fields");
        };
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].value, WireValue::Int(3));
        // declared but never assigned
        assert_eq!(fields[1].value, WireValue::Int(0));

        let sig = ctx
            .answer(RequestBody::MethodSignature {
                target: Target::Object(0),
                method: "move".into(),
                hints: vec!["I".into(), "I".into()],
            })
            .unwrap();
        assert_eq!(sig, ResponseBody::Signature("(II)V".into()));
    }

    #[test]
    fn test_pins_released_on_teardown() {
        let runtime = runtime();
        let mut ctx = context(&runtime);
        statics(&mut ctx);
        statics(&mut ctx);

        assert_eq!(ctx.pinned_count(), 1);
        assert_eq!(runtime.total_pins(), 1);

        ctx.teardown();
        assert_eq!(ctx.pinned_count(), 0);
        assert_eq!(runtime.total_pins(), 0);
        assert!(matches!(
            ctx.answer(RequestBody::ObjectFields { object_id: 0 }),
            Err(Error::UnknownObjectId(0))
        ));
    }

    #[test]
    fn test_not_found_and_errors_are_distinct() {
        let runtime = runtime();
        let mut ctx = context(&runtime);

        let missing = ctx
            .answer(RequestBody::FieldSignature {
                target: Target::Class("t.Demo".into()),
                field: "missing".into(),
            })
            .unwrap();
        assert_eq!(missing, ResponseBody::NotFound);

        let unknown = ctx.answer(RequestBody::FieldSignature {
            target: Target::Class("t.Nowhere".into()),
            field: "x".into(),
        });
        assert!(matches!(unknown, Err(Error::Reflect(hostreflect::Error::UnknownType(_)))));
    }

    #[test]
    fn test_read_sequence_requires_sequence() {
        let runtime = runtime();
        let mut ctx = context(&runtime);
        statics(&mut ctx);

        let result = ctx.answer(RequestBody::ReadSequence { object_id: 0 });
        assert!(matches!(result, Err(Error::Reflect(hostreflect::Error::NotSequence(_)))));
    }

    #[test]
    fn test_set_log_stream_flips_shared_toggle() {
        let runtime = runtime();
        let toggle = LogToggle::new(true);
        let mut ctx = IntrospectionContext::new(ConnectionId(7), runtime, toggle.clone());

        assert_eq!(ctx.answer(RequestBody::SetLogStream { enabled: false }).unwrap(), ResponseBody::Ack);
        assert!(!toggle.is_enabled());
    }

    #[test]
    fn test_loaded_classes_report_category() {
        let runtime = runtime();
        runtime.define_class("t.Mode").kind(ClassKind::Enum).build();
        runtime.define_class("t.Marker").kind(ClassKind::Annotation).build();
        let mut ctx = context(&runtime);

        let classes = match ctx.answer(RequestBody::LoadedClasses).unwrap() {
            ResponseBody::LoadedClasses(classes) => classes,
            other => panic!("unexpected {:?}", other),
        };
        let category = |name: &str| classes.iter().find(|c| c.name == name).map(|c| c.category);
        assert_eq!(category("t.Mode"), Some(ClassCategory::Enum));
        assert_eq!(category("t.Marker"), Some(ClassCategory::Annotation));
        assert_eq!(category("t.Point"), Some(ClassCategory::Class));
    }

    #[test]
    fn test_failure_reply_recovers_id() {
        let provider = IntrospectionProvider::new(runtime(), LogToggle::default());
        let request = Request::new(42, RequestBody::ProcessStatus).encode().unwrap();

        let reply = Response::decode(&provider.encode_failure(&request, "boom")).unwrap();
        assert_eq!(reply, Response::error(42, "boom"));

        let reply = Response::decode(&provider.encode_failure(b"\xff\xff", "boom")).unwrap();
        assert_eq!(reply.id, UNKNOWN_REQUEST_ID);
    }

    #[test]
    fn test_deep_nesting_falls_back_to_reference() {
        let runtime = Arc::new(MockRuntime::with_core_classes());
        let mut value = HostValue::Int(1);
        for _ in 0..MAX_SERIALIZE_DEPTH + 2 {
            let list = runtime.new_list("java.util.ArrayList", vec![value]);
            value = HostValue::Object(list);
        }
        let mut ctx = context(&runtime);

        let (mut wire, _) = ctx.serialize(value, 0);
        let mut depth = 0;
        while let WireValue::List { mut items, .. } = wire {
            wire = items.remove(0);
            depth += 1;
        }
        assert_eq!(depth, MAX_SERIALIZE_DEPTH);
        assert!(matches!(wire, WireValue::Object { .. }));
    }
}
