//! # Error Definitions
//!
//! Failures of the introspection primitives. A query that is well formed but
//! matches nothing is not an error: resolvers report it as `Ok(None)`.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The input is not a well-formed descriptor or display name.
    MalformedDescriptor(String),
    /// The named type cannot be resolved against the type provider.
    UnknownType(String),
    /// The value is neither an array nor an ordered collection.
    NotSequence(String),
    /// The object reference is not known to the type provider.
    UnknownObject(u64),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MalformedDescriptor(input) => write!(f, "malformed type descriptor: {:?}", input),
            Self::UnknownType(name) => write!(f, "unknown type: {}", name),
            Self::NotSequence(ty) => write!(f, "value of type {} is not sequence-like", ty),
            Self::UnknownObject(id) => write!(f, "unknown object reference: {}", id),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
