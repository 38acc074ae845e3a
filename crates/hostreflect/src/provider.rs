//! # Runtime Type Provider
//!
//! The capability the host process lends to the introspection engine. Everything
//! here is read-only from the engine's point of view: classes are addressed by
//! dotted name and re-resolved on every call, objects by an opaque reference.
//!
//! Only `class_exists`, the per-level member listings and the two ancestry
//! queries are required. Value access defaults to "not available" so a provider
//! can start with pure type introspection.

use std::collections::HashSet;
use std::collections::VecDeque;

use crate::descriptor::TypeHandle;

/// The root of the reference type hierarchy.
pub const OBJECT_CLASS: &str = "java.lang.Object";
pub const STRING_CLASS: &str = "java.lang.String";

/// Interfaces every array type implements.
const ARRAY_INTERFACES: [&str; 2] = ["java.lang.Cloneable", "java.io.Serializable"];

/// Opaque handle to a live object owned by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef(pub u64);

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "object-{}", self.0)
    }
}

/// A value read out of the host, with its primitive kind preserved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HostValue {
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Char(u16),
    Boolean(bool),
    Null,
    Object(ObjectRef),
}

/// A field as declared on exactly one class level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDecl {
    pub name: String,
    pub ty: TypeHandle,
    pub is_static: bool,
}

impl FieldDecl {
    pub fn new(name: &str, ty: TypeHandle, is_static: bool) -> Self {
        Self { name: name.to_string(), ty, is_static }
    }
}

/// A method as declared on exactly one class level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDecl {
    pub name: String,
    pub params: Vec<TypeHandle>,
    pub ret: TypeHandle,
    pub is_static: bool,
}

impl MethodDecl {
    pub fn new(name: &str, params: Vec<TypeHandle>, ret: TypeHandle, is_static: bool) -> Self {
        Self { name: name.to_string(), params, ret, is_static }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassKind {
    Class,
    Interface,
    Enum,
    Annotation,
    /// Present on the class path but not loaded yet.
    Unresolved,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedClass {
    pub name: String,
    pub kind: ClassKind,
    pub loaded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    pub name: String,
    pub daemon: bool,
    pub stack_trace: String,
}

/// Reflective access to the host's live type system and heap.
///
/// Implementations must be callable from several threads at once. The engine
/// never mutates types or objects through this interface.
pub trait TypeProvider: Send + Sync + 'static {
    /// Whether a reference type with this dotted name exists.
    fn class_exists(&self, name: &str) -> bool;

    /// Fields declared on this class level only, in declaration order.
    fn declared_fields(&self, class: &str) -> Vec<FieldDecl>;

    /// Methods declared on this class level only, in declaration order.
    fn declared_methods(&self, class: &str) -> Vec<MethodDecl>;

    /// The immediate superclass, or `None` at the hierarchy root and for interfaces.
    fn superclass(&self, class: &str) -> Option<String>;

    /// Interfaces directly implemented (or, for interfaces, directly extended).
    fn interfaces(&self, class: &str) -> Vec<String>;

    /// Whether a value of type `source` may be stored where `target` is declared.
    fn is_assignable(&self, target: &TypeHandle, source: &TypeHandle) -> bool {
        is_assignable(self, target, source)
    }

    /// The runtime type of a live object.
    fn type_of(&self, _object: ObjectRef) -> Option<TypeHandle> {
        None
    }

    fn array_length(&self, _object: ObjectRef) -> Option<usize> {
        None
    }

    fn array_element(&self, _object: ObjectRef, _index: usize) -> Option<HostValue> {
        None
    }

    /// A point-in-time copy of an ordered collection's elements.
    ///
    /// The copy must be taken atomically with respect to writers of the collection.
    fn collection_snapshot(&self, _object: ObjectRef) -> Option<Vec<HostValue>> {
        None
    }

    fn static_field(&self, _class: &str, _field: &str) -> Option<HostValue> {
        None
    }

    fn instance_field(&self, _object: ObjectRef, _field: &str) -> Option<HostValue> {
        None
    }

    /// The contents of a string object.
    fn string_value(&self, _object: ObjectRef) -> Option<String> {
        None
    }

    /// The primitive inside a boxed primitive object.
    fn unbox(&self, _object: ObjectRef) -> Option<HostValue> {
        None
    }

    /// Keeps an object reachable while a session refers to it.
    fn pin(&self, _object: ObjectRef) {}

    /// Drops a reference previously taken with `pin`.
    fn release(&self, _object: ObjectRef) {}

    fn loaded_classes(&self) -> Vec<LoadedClass> {
        Vec::new()
    }

    fn threads(&self) -> Vec<ThreadInfo> {
        Vec::new()
    }
}

/// Reference assignability over the provider's class graph.
///
/// - identical types are assignable
/// - primitives and void are assignable only to themselves
/// - every reference type is assignable to `java.lang.Object`
/// - a class is assignable to its superclasses and to every interface reachable
///   through superclasses and super-interfaces
/// - arrays are assignable to `Cloneable` and `Serializable`, and covariantly to
///   arrays whose reference component accepts their component
pub fn is_assignable<P: TypeProvider + ?Sized>(provider: &P, target: &TypeHandle, source: &TypeHandle) -> bool {
    let mut target = target;
    let mut source = source;

    // strip matching array levels without recursing
    loop {
        if target == source {
            return true;
        }
        match (target, source) {
            (TypeHandle::Array(t), TypeHandle::Array(s)) => {
                if !t.is_reference() || !s.is_reference() {
                    return false;
                }
                target = t;
                source = s;
            }
            (TypeHandle::Class(t), TypeHandle::Array(_)) => {
                return t == OBJECT_CLASS || ARRAY_INTERFACES.contains(&t.as_str());
            }
            (TypeHandle::Class(t), TypeHandle::Class(s)) => {
                return t == OBJECT_CLASS || class_extends(provider, s, t);
            }
            _ => return false,
        }
    }
}

/// Breadth-first search over superclasses and interfaces of `class` for `ancestor`.
fn class_extends<P: TypeProvider + ?Sized>(provider: &P, class: &str, ancestor: &str) -> bool {
    let mut queue = VecDeque::from([class.to_string()]);
    let mut seen = HashSet::new();

    while let Some(current) = queue.pop_front() {
        if current == ancestor {
            return true;
        }
        if !seen.insert(current.clone()) {
            continue;
        }
        if let Some(parent) = provider.superclass(&current) {
            queue.push_back(parent);
        }
        queue.extend(provider.interfaces(&current));
    }
    false
}
