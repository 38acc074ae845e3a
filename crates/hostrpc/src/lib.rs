//! # Hostrpc
//!
//! The message schema spoken between the host agent and a remote inspector,
//! layered on `hostpack`.
//!
//! Clients send a `Request` and receive exactly one `Response` with the same id.
//! The agent also pushes `LogStream` responses with id `LOG_STREAM_ID` at any time.
//! A query that matches nothing answers `NotFound`; a query that cannot be
//! evaluated answers `Error`. The two are never conflated.


pub mod error;
pub mod frame;
pub mod value;

pub use error::Error;
pub use error::Result;
pub use frame::ClassCategory;
pub use frame::ClassEntry;
pub use frame::FieldEntry;
pub use frame::LOG_STREAM_ID;
pub use frame::Request;
pub use frame::RequestBody;
pub use frame::Response;
pub use frame::ResponseBody;
pub use frame::Target;
pub use frame::ThreadEntry;
pub use frame::peek_id;
pub use value::MAX_VALUE_DEPTH;
pub use value::NO_OBJECT;
pub use value::WireValue;
