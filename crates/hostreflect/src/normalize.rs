//! # Value Normalizer
//!
//! Flattens arrays and ordered collections into a `NormalizedSequence`: an owned,
//! ordered list of values, each tagged with the kind it was stored as.
//!
//! Arrays are read element by element and tagged with the array's component kind,
//! so an `int[]` yields `Primitive(Int)` items rather than boxed references.
//! Collections are copied through `TypeProvider::collection_snapshot` first and
//! every item is tagged `Reference`. In both cases the result owns its data and
//! is unaffected by later writes to the source.

use std::collections::HashSet;

use crate::descriptor::PrimitiveKind;
use crate::descriptor::TypeHandle;
use crate::error::Error;
use crate::error::Result;
use crate::provider::HostValue;
use crate::provider::ObjectRef;
use crate::provider::TypeProvider;

/// The host's standard ordered-collection interface.
pub const ORDERED_COLLECTION: &str = "java.util.List";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementTag {
    Primitive(PrimitiveKind),
    Reference,
}

impl ElementTag {
    fn of(component: &TypeHandle) -> Self {
        match component {
            TypeHandle::Primitive(kind) => Self::Primitive(*kind),
            _ => Self::Reference,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaggedValue {
    pub tag: ElementTag,
    pub value: HostValue,
}

/// A read-only, point-in-time copy of a sequence-like value.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedSequence {
    source_type: TypeHandle,
    items: Vec<TaggedValue>,
}

impl NormalizedSequence {
    /// Runtime type of the value the sequence was taken from.
    pub fn source_type(&self) -> &TypeHandle {
        &self.source_type
    }

    pub fn items(&self) -> &[TaggedValue] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TaggedValue> {
        self.items.iter()
    }
}

impl<'a> IntoIterator for &'a NormalizedSequence {
    type Item = &'a TaggedValue;
    type IntoIter = std::slice::Iter<'a, TaggedValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// Whether `object` is an array or implements the ordered-collection interface.
///
/// Every class level up to and including the hierarchy root is checked, and
/// interfaces are followed through their super-interfaces.
pub fn is_sequence_like<P: TypeProvider + ?Sized>(provider: &P, object: ObjectRef) -> Result<bool> {
    let ty = provider.type_of(object).ok_or(Error::UnknownObject(object.0))?;
    Ok(match &ty {
        TypeHandle::Array(_) => true,
        TypeHandle::Class(name) => implements_collection(provider, name),
        _ => false,
    })
}

fn implements_collection<P: TypeProvider + ?Sized>(provider: &P, class: &str) -> bool {
    let mut seen = HashSet::new();
    let mut level = Some(class.to_string());

    while let Some(current) = level {
        if !seen.insert(current.clone()) {
            break;
        }
        let mut pending = provider.interfaces(&current);
        while let Some(iface) = pending.pop() {
            if iface == ORDERED_COLLECTION {
                return true;
            }
            if seen.insert(iface.clone()) {
                pending.extend(provider.interfaces(&iface));
            }
        }
        level = provider.superclass(&current);
    }
    false
}

/// Copies `object` into a `NormalizedSequence`.
///
/// Fails with `NotSequence` if `is_sequence_like` would return false.
pub fn to_sequence<P: TypeProvider + ?Sized>(provider: &P, object: ObjectRef) -> Result<NormalizedSequence> {
    let ty = provider.type_of(object).ok_or(Error::UnknownObject(object.0))?;

    let items = match &ty {
        TypeHandle::Array(component) => {
            let tag = ElementTag::of(component);
            let len = provider.array_length(object).ok_or(Error::UnknownObject(object.0))?;
            (0..len)
                .map(|index| {
                    provider
                        .array_element(object, index)
                        .map(|value| TaggedValue { tag, value })
                        .ok_or(Error::UnknownObject(object.0))
                })
                .collect::<Result<Vec<_>>>()?
        }
        TypeHandle::Class(name) if implements_collection(provider, name) => provider
            .collection_snapshot(object)
            .ok_or(Error::UnknownObject(object.0))?
            .into_iter()
            .map(|value| TaggedValue { tag: ElementTag::Reference, value })
            .collect(),
        other => return Err(Error::NotSequence(other.to_string())),
    };

    Ok(NormalizedSequence { source_type: ty, items })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockRuntime;

    fn ints(values: &[i32]) -> Vec<HostValue> {
        values.iter().map(|v| HostValue::Int(*v)).collect()
    }

    #[test]
    fn test_primitive_array_is_tagged_in_order() {
        let rt = MockRuntime::with_core_classes();
        let array = rt.new_array(TypeHandle::Primitive(PrimitiveKind::Int), ints(&[5, 4, 3, 2, 1]));

        assert!(is_sequence_like(&rt, array).unwrap());
        let seq = to_sequence(&rt, array).unwrap();
        assert_eq!(seq.len(), 5);
        assert_eq!(seq.source_type().to_string(), "int[]");
        for (item, expected) in seq.iter().zip([5, 4, 3, 2, 1]) {
            assert_eq!(item.tag, ElementTag::Primitive(PrimitiveKind::Int));
            assert_eq!(item.value, HostValue::Int(expected));
        }
    }

    #[test]
    fn test_sequence_is_a_snapshot() {
        let rt = MockRuntime::with_core_classes();
        let array = rt.new_array(TypeHandle::Primitive(PrimitiveKind::Int), ints(&[1, 2, 3, 4, 5]));

        let first = to_sequence(&rt, array).unwrap();
        let second = to_sequence(&rt, array).unwrap();
        assert_eq!(first, second);

        rt.set_array_element(array, 0, HostValue::Int(99));
        assert_eq!(first, second);
        assert_eq!(first.items()[0].value, HostValue::Int(1));
        assert_eq!(to_sequence(&rt, array).unwrap().items()[0].value, HostValue::Int(99));
    }

    #[test]
    fn test_snapshot_survives_concurrent_writer() {
        let rt = std::sync::Arc::new(MockRuntime::with_core_classes());
        let list = rt.new_list("java.util.ArrayList", ints(&[0; 16]));

        let writer = {
            let rt = rt.clone();
            std::thread::spawn(move || {
                for i in 0..500 {
                    rt.push_list(list, HostValue::Int(i));
                }
            })
        };

        for _ in 0..50 {
            let seq = to_sequence(&*rt, list).unwrap();
            assert!(seq.len() >= 16);
            assert!(seq.iter().all(|item| item.tag == ElementTag::Reference));
            // every snapshot is some prefix of the writer's history
            for (index, item) in seq.iter().enumerate().skip(16) {
                assert_eq!(item.value, HostValue::Int(index as i32 - 16));
            }
            std::thread::yield_now();
        }
        writer.join().unwrap();
        assert_eq!(to_sequence(&*rt, list).unwrap().len(), 516);
    }

    #[test]
    fn test_reference_array_and_collections() {
        let rt = MockRuntime::with_core_classes();
        let hello = rt.new_string("hello");
        let names = rt.new_array(TypeHandle::class("java.lang.String"), vec![HostValue::Object(hello), HostValue::Null]);
        let seq = to_sequence(&rt, names).unwrap();
        assert_eq!(seq.items()[0], TaggedValue { tag: ElementTag::Reference, value: HostValue::Object(hello) });
        assert_eq!(seq.items()[1].value, HostValue::Null);

        // ArrayList only reaches List through AbstractList
        let list = rt.new_list("java.util.ArrayList", vec![]);
        assert!(is_sequence_like(&rt, list).unwrap());
        assert!(to_sequence(&rt, list).unwrap().is_empty());
    }

    #[test]
    fn test_non_sequences() {
        let rt = MockRuntime::with_core_classes();
        let text = rt.new_string("not a list");
        assert!(!is_sequence_like(&rt, text).unwrap());
        assert_eq!(to_sequence(&rt, text), Err(Error::NotSequence("java.lang.String".into())));

        let missing = ObjectRef(4242);
        assert_eq!(is_sequence_like(&rt, missing), Err(Error::UnknownObject(4242)));
    }
}
