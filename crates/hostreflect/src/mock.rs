//! # Mock Runtime
//!
//! An in-memory `TypeProvider` with a mutable class graph and heap. Tests build
//! hierarchies with `define_class`, allocate objects with the `new_*` methods and
//! mutate them from other threads while the engine reads.
//!
//! Classes defined without `extends` get `java.lang.Object` as their superclass,
//! except interfaces and `java.lang.Object` itself.

use std::collections::HashMap;
use std::sync::PoisonError;
use std::sync::RwLock;
use std::sync::RwLockReadGuard;
use std::sync::RwLockWriteGuard;

use crate::descriptor::PrimitiveKind;
use crate::descriptor::TypeHandle;
use crate::descriptor::normalize_class_name;
use crate::provider::ClassKind;
use crate::provider::FieldDecl;
use crate::provider::HostValue;
use crate::provider::LoadedClass;
use crate::provider::MethodDecl;
use crate::provider::OBJECT_CLASS;
use crate::provider::ObjectRef;
use crate::provider::STRING_CLASS;
use crate::provider::ThreadInfo;
use crate::provider::TypeProvider;

#[derive(Debug, Clone)]
struct ClassDef {
    kind: ClassKind,
    superclass: Option<String>,
    interfaces: Vec<String>,
    fields: Vec<FieldDecl>,
    methods: Vec<MethodDecl>,
    statics: HashMap<String, HostValue>,
}

#[derive(Debug, Clone)]
enum HeapObject {
    Array { component: TypeHandle, elements: Vec<HostValue> },
    List { class: String, items: Vec<HostValue> },
    Instance { class: String, fields: HashMap<String, HostValue> },
    Str(String),
    Boxed { class: String, value: HostValue },
}

impl HeapObject {
    fn type_handle(&self) -> TypeHandle {
        match self {
            Self::Array { component, .. } => TypeHandle::Array(Box::new(component.clone())),
            Self::List { class, .. } | Self::Instance { class, .. } | Self::Boxed { class, .. } => {
                TypeHandle::Class(class.clone())
            }
            Self::Str(_) => TypeHandle::Class(STRING_CLASS.to_string()),
        }
    }
}

#[derive(Debug, Default)]
struct State {
    classes: HashMap<String, ClassDef>,
    heap: HashMap<u64, HeapObject>,
    pins: HashMap<u64, usize>,
    threads: Vec<ThreadInfo>,
    next_object: u64,
}

impl State {
    fn alloc(&mut self, object: HeapObject) -> ObjectRef {
        self.next_object += 1;
        self.heap.insert(self.next_object, object);
        ObjectRef(self.next_object)
    }
}

#[derive(Debug, Default)]
pub struct MockRuntime {
    state: RwLock<State>,
}

impl MockRuntime {
    /// An empty runtime with no classes at all.
    pub fn new() -> Self {
        Self::default()
    }

    /// A runtime preloaded with the handful of platform classes the engine
    /// relies on: the root, strings, boxed numbers and the list hierarchy.
    pub fn with_core_classes() -> Self {
        let rt = Self::new();
        rt.define_class(OBJECT_CLASS).build();
        rt.define_class("java.io.Serializable").interface().build();
        rt.define_class("java.lang.Cloneable").interface().build();
        rt.define_class("java.lang.CharSequence").interface().build();
        rt.define_class("java.lang.Comparable").interface().build();
        rt.define_class(STRING_CLASS)
            .implements("java.io.Serializable")
            .implements("java.lang.CharSequence")
            .implements("java.lang.Comparable")
            .build();

        rt.define_class("java.lang.Number").implements("java.io.Serializable").build();
        for boxed in ["Byte", "Short", "Integer", "Long", "Float", "Double"] {
            rt.define_class(&format!("java.lang.{boxed}"))
                .extends("java.lang.Number")
                .implements("java.lang.Comparable")
                .build();
        }
        for boxed in ["Character", "Boolean"] {
            rt.define_class(&format!("java.lang.{boxed}"))
                .implements("java.io.Serializable")
                .implements("java.lang.Comparable")
                .build();
        }

        rt.define_class("java.lang.Iterable").interface().build();
        rt.define_class("java.util.Collection").interface().implements("java.lang.Iterable").build();
        rt.define_class("java.util.List").interface().implements("java.util.Collection").build();
        rt.define_class("java.util.AbstractCollection").implements("java.util.Collection").build();
        rt.define_class("java.util.AbstractList")
            .extends("java.util.AbstractCollection")
            .implements("java.util.List")
            .build();
        rt.define_class("java.util.ArrayList")
            .extends("java.util.AbstractList")
            .implements("java.lang.Cloneable")
            .implements("java.io.Serializable")
            .build();
        rt.define_class("java.util.Set").interface().implements("java.util.Collection").build();
        rt.define_class("java.util.HashSet")
            .extends("java.util.AbstractCollection")
            .implements("java.util.Set")
            .build();

        rt.add_thread("main", false, "at android.os.Looper.loop(Looper.java)");
        rt
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts defining (or redefining) a class. Nothing is visible until `build`.
    pub fn define_class(&self, name: &str) -> ClassBuilder<'_> {
        let name = normalize_class_name(name);
        let superclass = (name != OBJECT_CLASS).then(|| OBJECT_CLASS.to_string());
        ClassBuilder {
            runtime: self,
            name,
            def: ClassDef {
                kind: ClassKind::Class,
                superclass,
                interfaces: Vec::new(),
                fields: Vec::new(),
                methods: Vec::new(),
                statics: HashMap::new(),
            },
        }
    }

    pub fn add_thread(&self, name: &str, daemon: bool, stack_trace: &str) {
        self.write().threads.push(ThreadInfo {
            name: name.to_string(),
            daemon,
            stack_trace: stack_trace.to_string(),
        });
    }

    pub fn new_array(&self, component: TypeHandle, elements: Vec<HostValue>) -> ObjectRef {
        self.write().alloc(HeapObject::Array { component, elements })
    }

    /// Allocates an ordered collection of the given class.
    pub fn new_list(&self, class: &str, items: Vec<HostValue>) -> ObjectRef {
        self.write().alloc(HeapObject::List { class: normalize_class_name(class), items })
    }

    pub fn new_string(&self, value: &str) -> ObjectRef {
        self.write().alloc(HeapObject::Str(value.to_string()))
    }

    /// Boxes a primitive into its wrapper class (`Int` into `java.lang.Integer`, ...).
    pub fn new_boxed(&self, value: HostValue) -> ObjectRef {
        let wrapper = match value {
            HostValue::Byte(_) => "Byte",
            HostValue::Short(_) => "Short",
            HostValue::Int(_) => "Integer",
            HostValue::Long(_) => "Long",
            HostValue::Float(_) => "Float",
            HostValue::Double(_) => "Double",
            HostValue::Char(_) => "Character",
            HostValue::Boolean(_) => "Boolean",
            HostValue::Null | HostValue::Object(_) => return self.new_instance(OBJECT_CLASS, &[]),
        };
        self.write().alloc(HeapObject::Boxed { class: format!("java.lang.{wrapper}"), value })
    }

    /// Allocates a plain object with the given instance field values.
    pub fn new_instance(&self, class: &str, fields: &[(&str, HostValue)]) -> ObjectRef {
        let fields = fields.iter().map(|(name, value)| (name.to_string(), *value)).collect();
        self.write().alloc(HeapObject::Instance { class: normalize_class_name(class), fields })
    }

    pub fn set_array_element(&self, object: ObjectRef, index: usize, value: HostValue) -> bool {
        match self.write().heap.get_mut(&object.0) {
            Some(HeapObject::Array { elements, .. }) if index < elements.len() => {
                elements[index] = value;
                true
            }
            _ => false,
        }
    }

    pub fn push_list(&self, object: ObjectRef, value: HostValue) -> bool {
        match self.write().heap.get_mut(&object.0) {
            Some(HeapObject::List { items, .. }) => {
                items.push(value);
                true
            }
            _ => false,
        }
    }

    pub fn set_field(&self, object: ObjectRef, field: &str, value: HostValue) -> bool {
        match self.write().heap.get_mut(&object.0) {
            Some(HeapObject::Instance { fields, .. }) => {
                fields.insert(field.to_string(), value);
                true
            }
            _ => false,
        }
    }

    pub fn set_static(&self, class: &str, field: &str, value: HostValue) -> bool {
        match self.write().classes.get_mut(&normalize_class_name(class)) {
            Some(def) => {
                def.statics.insert(field.to_string(), value);
                true
            }
            None => false,
        }
    }

    /// Outstanding `pin` calls for an object.
    pub fn pin_count(&self, object: ObjectRef) -> usize {
        self.read().pins.get(&object.0).copied().unwrap_or(0)
    }

    /// Total outstanding pins across the heap.
    pub fn total_pins(&self) -> usize {
        self.read().pins.values().sum()
    }
}

/// Accumulates a class definition; `build` publishes it atomically.
pub struct ClassBuilder<'a> {
    runtime: &'a MockRuntime,
    name: String,
    def: ClassDef,
}

impl ClassBuilder<'_> {
    pub fn extends(mut self, superclass: &str) -> Self {
        self.def.superclass = Some(normalize_class_name(superclass));
        self
    }

    pub fn implements(mut self, interface: &str) -> Self {
        self.def.interfaces.push(normalize_class_name(interface));
        self
    }

    pub fn interface(mut self) -> Self {
        self.def.kind = ClassKind::Interface;
        self.def.superclass = None;
        self
    }

    pub fn kind(mut self, kind: ClassKind) -> Self {
        self.def.kind = kind;
        self
    }

    pub fn field(mut self, name: &str, ty: TypeHandle) -> Self {
        self.def.fields.push(FieldDecl::new(name, ty, false));
        self
    }

    /// Declares a static field and sets its initial value.
    pub fn static_field(mut self, name: &str, ty: TypeHandle, value: HostValue) -> Self {
        self.def.fields.push(FieldDecl::new(name, ty, true));
        self.def.statics.insert(name.to_string(), value);
        self
    }

    pub fn method(mut self, name: &str, params: Vec<TypeHandle>, ret: TypeHandle) -> Self {
        self.def.methods.push(MethodDecl::new(name, params, ret, false));
        self
    }

    pub fn static_method(mut self, name: &str, params: Vec<TypeHandle>, ret: TypeHandle) -> Self {
        self.def.methods.push(MethodDecl::new(name, params, ret, true));
        self
    }

    pub fn build(self) {
        self.runtime.write().classes.insert(self.name, self.def);
    }
}

/// Zero value of a declared field type, used for fields never assigned.
fn default_value(ty: &TypeHandle) -> HostValue {
    match ty {
        TypeHandle::Primitive(kind) => match kind {
            PrimitiveKind::Byte => HostValue::Byte(0),
            PrimitiveKind::Short => HostValue::Short(0),
            PrimitiveKind::Int => HostValue::Int(0),
            PrimitiveKind::Long => HostValue::Long(0),
            PrimitiveKind::Float => HostValue::Float(0.0),
            PrimitiveKind::Double => HostValue::Double(0.0),
            PrimitiveKind::Char => HostValue::Char(0),
            PrimitiveKind::Boolean => HostValue::Boolean(false),
        },
        _ => HostValue::Null,
    }
}

impl TypeProvider for MockRuntime {
    fn class_exists(&self, name: &str) -> bool {
        self.read().classes.contains_key(name)
    }

    fn declared_fields(&self, class: &str) -> Vec<FieldDecl> {
        self.read().classes.get(class).map(|def| def.fields.clone()).unwrap_or_default()
    }

    fn declared_methods(&self, class: &str) -> Vec<MethodDecl> {
        self.read().classes.get(class).map(|def| def.methods.clone()).unwrap_or_default()
    }

    fn superclass(&self, class: &str) -> Option<String> {
        self.read().classes.get(class).and_then(|def| def.superclass.clone())
    }

    fn interfaces(&self, class: &str) -> Vec<String> {
        self.read().classes.get(class).map(|def| def.interfaces.clone()).unwrap_or_default()
    }

    fn type_of(&self, object: ObjectRef) -> Option<TypeHandle> {
        self.read().heap.get(&object.0).map(HeapObject::type_handle)
    }

    fn array_length(&self, object: ObjectRef) -> Option<usize> {
        match self.read().heap.get(&object.0)? {
            HeapObject::Array { elements, .. } => Some(elements.len()),
            _ => None,
        }
    }

    fn array_element(&self, object: ObjectRef, index: usize) -> Option<HostValue> {
        match self.read().heap.get(&object.0)? {
            HeapObject::Array { elements, .. } => elements.get(index).copied(),
            _ => None,
        }
    }

    fn collection_snapshot(&self, object: ObjectRef) -> Option<Vec<HostValue>> {
        match self.read().heap.get(&object.0)? {
            HeapObject::List { items, .. } => Some(items.clone()),
            _ => None,
        }
    }

    fn static_field(&self, class: &str, field: &str) -> Option<HostValue> {
        let state = self.read();
        let mut level = Some(class.to_string());
        while let Some(current) = level {
            let def = state.classes.get(&current)?;
            if let Some(decl) = def.fields.iter().find(|f| f.is_static && f.name == field) {
                return Some(def.statics.get(field).copied().unwrap_or_else(|| default_value(&decl.ty)));
            }
            level = def.superclass.clone();
        }
        None
    }

    fn instance_field(&self, object: ObjectRef, field: &str) -> Option<HostValue> {
        let state = self.read();
        let HeapObject::Instance { class, fields } = state.heap.get(&object.0)? else {
            return None;
        };
        if let Some(value) = fields.get(field) {
            return Some(*value);
        }
        // declared but never assigned
        let mut level = Some(class.clone());
        while let Some(current) = level {
            let def = state.classes.get(&current)?;
            if let Some(decl) = def.fields.iter().find(|f| !f.is_static && f.name == field) {
                return Some(default_value(&decl.ty));
            }
            level = def.superclass.clone();
        }
        None
    }

    fn string_value(&self, object: ObjectRef) -> Option<String> {
        match self.read().heap.get(&object.0)? {
            HeapObject::Str(value) => Some(value.clone()),
            _ => None,
        }
    }

    fn unbox(&self, object: ObjectRef) -> Option<HostValue> {
        match self.read().heap.get(&object.0)? {
            HeapObject::Boxed { value, .. } => Some(*value),
            _ => None,
        }
    }

    fn pin(&self, object: ObjectRef) {
        *self.write().pins.entry(object.0).or_default() += 1;
    }

    fn release(&self, object: ObjectRef) {
        let mut state = self.write();
        if let Some(count) = state.pins.get_mut(&object.0) {
            *count -= 1;
            if *count == 0 {
                state.pins.remove(&object.0);
            }
        }
    }

    fn loaded_classes(&self) -> Vec<LoadedClass> {
        let mut classes: Vec<_> = self
            .read()
            .classes
            .iter()
            .map(|(name, def)| LoadedClass { name: name.clone(), kind: def.kind, loaded: true })
            .collect();
        classes.sort_by(|a, b| a.name.cmp(&b.name));
        classes
    }

    fn threads(&self) -> Vec<ThreadInfo> {
        self.read().threads.clone()
    }
}
