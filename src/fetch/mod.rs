//! Network retrieval of screen documents.
//!
//! - [`source`]: `DocumentSource` trait and the HTTP implementation
//! - [`fetcher`]: Async/blocking fetch entry points with retry and backoff

pub mod fetcher;
pub mod source;
