//! Remote drive API: transport, typed errors, wire types and the batcher

pub mod batcher;
pub mod client;
pub mod errors;
pub mod types;

pub use batcher::RequestBatcher;
pub use client::{ApiRequest, DriveClient, RemoteTransport};
pub use errors::ApiError;
pub use types::*;
