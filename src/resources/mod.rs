//! Concrete resource types.
//!
//! Each resource type is a plain schema built with
//! [`ResourceType::builder`](crate::schema::ResourceType::builder) plus the
//! adapter functions that talk to the outside world.

pub mod file;

pub use file::{content_digest, file_type, FILE_TYPE};
