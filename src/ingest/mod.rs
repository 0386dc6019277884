pub mod auth;
mod gateway;
mod sink;

pub use auth::{credential_key, Authorizer, StaticKeyAuthorizer};
pub use gateway::{Accepted, IngestError, IngestGateway};
pub use sink::IngestSink;
