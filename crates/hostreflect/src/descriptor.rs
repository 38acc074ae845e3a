//! # Descriptor Codec
//!
//! Converts between `TypeHandle` and its two textual forms:
//!
//! - **Descriptor**: `I`, `Ljava/lang/String;`, `[[D`. One code per primitive,
//!   an `L...;` wrapper with `/` separators for reference types, and one `[`
//!   per array dimension. Resolution queries use this form.
//! - **Display name**: `int`, `java.lang.String`, `double[][]`. Dotted names with
//!   a `[]` suffix per dimension. Enumeration responses use this form.
//!
//! `parse` and `parse_display_name` are purely syntactic. `decode` and
//! `decode_display_name` additionally resolve the element class against a
//! `TypeProvider` and fail with `UnknownType` when it does not exist.

use crate::error::Error;
use crate::error::Result;
use crate::provider::TypeProvider;

/// Array nesting limit imposed by the host's class file format.
pub const MAX_ARRAY_DIMENSIONS: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    Char,
    Boolean,
}

impl PrimitiveKind {
    pub const ALL: [PrimitiveKind; 8] = [
        PrimitiveKind::Byte,
        PrimitiveKind::Short,
        PrimitiveKind::Int,
        PrimitiveKind::Long,
        PrimitiveKind::Float,
        PrimitiveKind::Double,
        PrimitiveKind::Char,
        PrimitiveKind::Boolean,
    ];

    pub fn code(self) -> char {
        match self {
            Self::Byte => 'B',
            Self::Short => 'S',
            Self::Int => 'I',
            Self::Long => 'J',
            Self::Float => 'F',
            Self::Double => 'D',
            Self::Char => 'C',
            Self::Boolean => 'Z',
        }
    }

    pub fn from_code(code: char) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.code() == code)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Byte => "byte",
            Self::Short => "short",
            Self::Int => "int",
            Self::Long => "long",
            Self::Float => "float",
            Self::Double => "double",
            Self::Char => "char",
            Self::Boolean => "boolean",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

/// A type in the host's type system.
///
/// Reference types are held by their dotted, fully-qualified name only. The
/// host owns the actual class; callers re-resolve through the provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeHandle {
    Primitive(PrimitiveKind),
    Void,
    Array(Box<TypeHandle>),
    Class(String),
}

impl TypeHandle {
    /// Builds a class handle, accepting either `a.b.C` or `a/b/C`.
    pub fn class(name: &str) -> Self {
        Self::Class(normalize_class_name(name))
    }

    /// Wraps `element` in `dimensions` levels of array.
    pub fn array_of(element: TypeHandle, dimensions: usize) -> Self {
        let mut ty = element;
        for _ in 0..dimensions {
            ty = Self::Array(Box::new(ty));
        }
        ty
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, Self::Array(_) | Self::Class(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Self::Array(_))
    }

    /// The component type of an array, one level down.
    pub fn component(&self) -> Option<&TypeHandle> {
        match self {
            Self::Array(component) => Some(component),
            _ => None,
        }
    }

    /// Strips every array level, returning `(element, dimensions)`.
    pub fn element(&self) -> (&TypeHandle, usize) {
        let mut ty = self;
        let mut dimensions = 0;
        while let Self::Array(component) = ty {
            ty = component;
            dimensions += 1;
        }
        (ty, dimensions)
    }

    /// The class name if this is a (non-array) reference type.
    pub fn class_name(&self) -> Option<&str> {
        match self {
            Self::Class(name) => Some(name),
            _ => None,
        }
    }
}

impl std::fmt::Display for TypeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&display_name(self))
    }
}

/// Converts `a/b/C` to `a.b.C`. Dotted names pass through unchanged.
pub fn normalize_class_name(name: &str) -> String {
    name.replace('/', ".")
}

/// Converts `a.b.C` to `a/b/C`.
pub fn internal_name(name: &str) -> String {
    name.replace('.', "/")
}

/// Encodes a type as a descriptor string.
pub fn encode(ty: &TypeHandle) -> String {
    let (element, dimensions) = ty.element();
    let mut out = String::with_capacity(dimensions + 16);
    for _ in 0..dimensions {
        out.push('[');
    }
    match element {
        TypeHandle::Primitive(kind) => out.push(kind.code()),
        TypeHandle::Void => out.push('V'),
        TypeHandle::Class(name) => {
            out.push('L');
            out.push_str(&internal_name(name));
            out.push(';');
        }
        TypeHandle::Array(_) => unreachable!("element() strips every array level"),
    }
    out
}

/// Formats a method signature: `(` parameter descriptors `)` return descriptor.
pub fn method_signature(params: &[TypeHandle], ret: &TypeHandle) -> String {
    let mut out = String::from("(");
    for param in params {
        out.push_str(&encode(param));
    }
    out.push(')');
    out.push_str(&encode(ret));
    out
}

/// Parses a descriptor without consulting the host.
pub fn parse(descriptor: &str) -> Result<TypeHandle> {
    let malformed = || Error::MalformedDescriptor(descriptor.to_string());

    let dimensions = descriptor.bytes().take_while(|b| *b == b'[').count();
    if dimensions > MAX_ARRAY_DIMENSIONS {
        return Err(malformed());
    }
    let rest = &descriptor[dimensions..];

    let mut chars = rest.chars();
    let element = match chars.next() {
        Some('V') if chars.as_str().is_empty() => {
            if dimensions > 0 {
                return Err(malformed());
            }
            TypeHandle::Void
        }
        Some('L') => {
            let body = chars.as_str();
            let name = body.strip_suffix(';').ok_or_else(malformed)?;
            if !is_valid_internal_name(name) {
                return Err(malformed());
            }
            TypeHandle::Class(normalize_class_name(name))
        }
        Some(code) if chars.as_str().is_empty() => {
            TypeHandle::Primitive(PrimitiveKind::from_code(code).ok_or_else(malformed)?)
        }
        _ => return Err(malformed()),
    };

    Ok(TypeHandle::array_of(element, dimensions))
}

/// Parses a descriptor and resolves its element class against the host.
pub fn decode<P: TypeProvider + ?Sized>(provider: &P, descriptor: &str) -> Result<TypeHandle> {
    let ty = parse(descriptor)?;
    ensure_resolvable(provider, &ty)?;
    Ok(ty)
}

/// Formats a type as a display name (`int`, `java.lang.String[]`).
pub fn display_name(ty: &TypeHandle) -> String {
    let (element, dimensions) = ty.element();
    let mut out = match element {
        TypeHandle::Primitive(kind) => kind.name().to_string(),
        TypeHandle::Void => "void".to_string(),
        TypeHandle::Class(name) => name.clone(),
        TypeHandle::Array(_) => unreachable!("element() strips every array level"),
    };
    for _ in 0..dimensions {
        out.push_str("[]");
    }
    out
}

/// Parses a display name without consulting the host.
pub fn parse_display_name(name: &str) -> Result<TypeHandle> {
    let malformed = || Error::MalformedDescriptor(name.to_string());

    let mut base = name;
    let mut dimensions = 0;
    while let Some(stripped) = base.strip_suffix("[]") {
        base = stripped;
        dimensions += 1;
    }
    if dimensions > MAX_ARRAY_DIMENSIONS {
        return Err(malformed());
    }

    let element = if base == "void" {
        if dimensions > 0 {
            return Err(malformed());
        }
        TypeHandle::Void
    } else if let Some(kind) = PrimitiveKind::from_name(base) {
        TypeHandle::Primitive(kind)
    } else {
        if base.contains('/') || !is_valid_internal_name(&internal_name(base)) {
            return Err(malformed());
        }
        TypeHandle::Class(base.to_string())
    };

    Ok(TypeHandle::array_of(element, dimensions))
}

/// Parses a display name and resolves its element class against the host.
pub fn decode_display_name<P: TypeProvider + ?Sized>(provider: &P, name: &str) -> Result<TypeHandle> {
    let ty = parse_display_name(name)?;
    ensure_resolvable(provider, &ty)?;
    Ok(ty)
}

fn ensure_resolvable<P: TypeProvider + ?Sized>(provider: &P, ty: &TypeHandle) -> Result<()> {
    if let (TypeHandle::Class(name), _) = ty.element() {
        if !provider.class_exists(name) {
            return Err(Error::UnknownType(name.clone()));
        }
    }
    Ok(())
}

/// Slash-separated segments, none empty, no descriptor punctuation.
fn is_valid_internal_name(name: &str) -> bool {
    !name.is_empty()
        && name.split('/').all(|segment| {
            !segment.is_empty() && !segment.contains(['.', ';', '[', ']'])
        })
}
