//! # Hostreflect
//!
//! Introspection primitives over a live managed runtime, independent of any
//! transport or session machinery:
//!
//! - [`descriptor`]: type descriptor and display-name codec.
//! - [`provider`]: the injected [`TypeProvider`] capability and assignability rules.
//! - [`resolver`]: field and overloaded-method resolution across a class hierarchy.
//! - [`normalize`]: arrays and ordered collections as tagged, owned sequences.
//! - [`mock`]: an in-memory runtime for tests and for running without a real host.

pub mod descriptor;
pub mod error;
pub mod mock;
pub mod normalize;
pub mod provider;
pub mod resolver;

pub use descriptor::PrimitiveKind;
pub use descriptor::TypeHandle;
pub use error::Error;
pub use error::Result;
pub use normalize::NormalizedSequence;
pub use provider::HostValue;
pub use provider::ObjectRef;
pub use provider::TypeProvider;
pub use resolver::MemberDescriptor;
pub use resolver::MemberKind;
