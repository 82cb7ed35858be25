//! Core types, capability traits, errors and configuration for askdb.

pub mod cancel;
pub mod config;
pub mod corpus;
pub mod error;
pub mod normalize;
pub mod query;
pub mod stream;
pub mod traits;
pub mod types;

pub use cancel::CancelHandle;
pub use error::{Error, ErrorKind, PublicError, Result};
pub use query::QueryRequest;
pub use stream::{GenerationState, GenerationStream};
