//! Ibtikar backend over HTTP.

pub mod client;
pub mod wire;

pub use client::BackendClient;
pub use wire::classify_error;
