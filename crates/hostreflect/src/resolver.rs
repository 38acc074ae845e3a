//! # Member Resolver
//!
//! Finds fields and methods by name across a class and its superclass chain.
//!
//! Levels are visited from the most-derived class up to the hierarchy root. Each
//! level is scanned completely, in declaration order, before its parent, and the
//! first eligible member wins. Method overloads are filtered by arity and by
//! assignability of each hint to the declared parameter; there is no ambiguity
//! detection, so two overloads accepting the same hints resolve to whichever is
//! declared first.

use std::collections::HashSet;

use crate::descriptor;
use crate::descriptor::TypeHandle;
use crate::error::Error;
use crate::error::Result;
use crate::provider::FieldDecl;
use crate::provider::MethodDecl;
use crate::provider::TypeProvider;

/// Which declared members a query may see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberKind {
    Static,
    Instance,
}

impl MemberKind {
    fn admits(self, is_static: bool) -> bool {
        match self {
            Self::Static => is_static,
            Self::Instance => !is_static,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberShape {
    Field { ty: TypeHandle },
    Method { params: Vec<TypeHandle>, ret: TypeHandle },
}

/// A resolved member, tagged with the class level that declares it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberDescriptor {
    pub name: String,
    pub declaring_class: String,
    pub shape: MemberShape,
    pub kind: MemberKind,
}

impl MemberDescriptor {
    /// The field descriptor, or the method signature `(params)ret`.
    pub fn signature(&self) -> String {
        match &self.shape {
            MemberShape::Field { ty } => descriptor::encode(ty),
            MemberShape::Method { params, ret } => descriptor::method_signature(params, ret),
        }
    }

    fn from_field(class: &str, decl: FieldDecl, kind: MemberKind) -> Self {
        Self {
            name: decl.name,
            declaring_class: class.to_string(),
            shape: MemberShape::Field { ty: decl.ty },
            kind,
        }
    }

    fn from_method(class: &str, decl: MethodDecl, kind: MemberKind) -> Self {
        Self {
            name: decl.name,
            declaring_class: class.to_string(),
            shape: MemberShape::Method { params: decl.params, ret: decl.ret },
            kind,
        }
    }
}

/// One row of a field enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSummary {
    pub name: String,
    /// Dotted display form, e.g. `java.lang.String[]`.
    pub type_name: String,
    pub descriptor: String,
}

impl From<&FieldDecl> for FieldSummary {
    fn from(decl: &FieldDecl) -> Self {
        Self {
            name: decl.name.clone(),
            type_name: descriptor::display_name(&decl.ty),
            descriptor: descriptor::encode(&decl.ty),
        }
    }
}

/// The class followed by its superclasses, most-derived first.
///
/// Fails with `UnknownType` if `class` itself does not exist. A superclass cycle
/// ends the walk at the first repeated class.
pub fn hierarchy<P: TypeProvider + ?Sized>(provider: &P, class: &str) -> Result<Vec<String>> {
    let class = descriptor::normalize_class_name(class);
    if !provider.class_exists(&class) {
        return Err(Error::UnknownType(class));
    }

    let mut levels = Vec::new();
    let mut seen = HashSet::new();
    let mut current = Some(class);
    while let Some(level) = current {
        if !seen.insert(level.clone()) {
            tracing::warn!(class = %level, "superclass cycle in host hierarchy");
            break;
        }
        current = provider.superclass(&level);
        levels.push(level);
    }
    Ok(levels)
}

/// Resolves a field by exact name.
pub fn resolve_field<P: TypeProvider + ?Sized>(
    provider: &P,
    class: &str,
    field: &str,
    kind: MemberKind,
) -> Result<Option<MemberDescriptor>> {
    for level in hierarchy(provider, class)? {
        let found = provider
            .declared_fields(&level)
            .into_iter()
            .find(|decl| kind.admits(decl.is_static) && decl.name == field);
        if let Some(decl) = found {
            return Ok(Some(MemberDescriptor::from_field(&level, decl, kind)));
        }
    }
    Ok(None)
}

/// Resolves a method by name and parameter hints.
///
/// `hints` are type descriptors. Every hint is decoded before the walk starts,
/// so an unresolvable hint fails with `UnknownType` even when no method of that
/// name exists.
pub fn resolve_method<P: TypeProvider + ?Sized>(
    provider: &P,
    class: &str,
    method: &str,
    hints: &[&str],
    kind: MemberKind,
) -> Result<Option<MemberDescriptor>> {
    let levels = hierarchy(provider, class)?;
    let hints = hints
        .iter()
        .map(|hint| descriptor::decode(provider, hint))
        .collect::<Result<Vec<_>>>()?;

    for level in levels {
        let found = provider.declared_methods(&level).into_iter().find(|decl| {
            kind.admits(decl.is_static)
                && decl.name == method
                && decl.params.len() == hints.len()
                && decl
                    .params
                    .iter()
                    .zip(&hints)
                    .all(|(param, hint)| provider.is_assignable(param, hint))
        });
        if let Some(decl) = found {
            return Ok(Some(MemberDescriptor::from_method(&level, decl, kind)));
        }
    }
    Ok(None)
}

/// Every field of `kind` visible from `class`, most-derived level first.
///
/// Shadowed fields are listed once per declaring level, as the host reports them.
pub fn enumerate_fields<P: TypeProvider + ?Sized>(
    provider: &P,
    class: &str,
    kind: MemberKind,
) -> Result<Vec<FieldSummary>> {
    let mut fields = Vec::new();
    for level in hierarchy(provider, class)? {
        fields.extend(
            provider
                .declared_fields(&level)
                .iter()
                .filter(|decl| kind.admits(decl.is_static))
                .map(FieldSummary::from),
        );
    }
    Ok(fields)
}

/// Descriptor of the resolved field, if any.
pub fn find_field_signature<P: TypeProvider + ?Sized>(
    provider: &P,
    class: &str,
    field: &str,
    kind: MemberKind,
) -> Result<Option<String>> {
    Ok(resolve_field(provider, class, field, kind)?.map(|member| member.signature()))
}

/// Signature of the resolved method, if any.
pub fn find_method_signature<P: TypeProvider + ?Sized>(
    provider: &P,
    class: &str,
    method: &str,
    hints: &[&str],
    kind: MemberKind,
) -> Result<Option<String>> {
    Ok(resolve_method(provider, class, method, hints, kind)?.map(|member| member.signature()))
}
