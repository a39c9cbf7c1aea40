//! Object store client interface for omirror
//!
//! The transfer pipeline talks to storage only through the [`ObjectStore`] trait. A store holds
//! named containers; each container holds objects identified by a unique key. Every object
//! carries an opaque content fingerprint that the pipeline compares to decide whether a copy is
//! needed.
//!
//! Two backends are bundled:
//!
//! - [`LocalStore`] - a directory on the local filesystem; every sub-directory of the root
//!   (other than `.omirror-tmp`, which holds in-flight writes) is a container and every regular
//!   file below it is an object
//! - [`MemoryStore`] - an in-process store with operation counters and fault injection
//!
//! Implementations must be safe to share between concurrently running tasks.

use futures::StreamExt;

pub mod error;
pub mod fingerprint;
pub mod local;
pub mod memory;

pub use error::{Result, StoreError};
pub use fingerprint::{Fingerprinter, fingerprint};
pub use local::LocalStore;
pub use memory::MemoryStore;

/// Lazily read object body.
pub type Body = futures::stream::BoxStream<'static, Result<bytes::Bytes>>;

/// Lazy listing of a container; pagination, if any, is hidden behind the stream.
pub type Listing<'a> = futures::stream::BoxStream<'a, Result<ObjectRecord>>;

/// Description of a single object as reported by a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRecord {
    pub key: String,
    pub fingerprint: String,
    pub size_hint: Option<u64>,
}

#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync + std::fmt::Debug {
    /// Human readable location of the store, used in log output.
    fn describe(&self) -> String;

    /// Lists every object in `container`. The stream may fail mid-way.
    fn list_all<'a>(&'a self, container: &'a str) -> Listing<'a>;

    /// Returns the record for `key`, or `None` if the object does not exist.
    async fn object_metadata(&self, container: &str, key: &str) -> Result<Option<ObjectRecord>>;

    /// Opens the body of an existing object.
    async fn get_body(&self, container: &str, key: &str) -> Result<Body>;

    /// Creates `key`, replacing any existing object with the same key.
    async fn put_object(
        &self,
        container: &str,
        key: &str,
        body: Body,
        fingerprint: &str,
    ) -> Result<()>;
}

/// Builds a [`Body`] from an in-memory buffer.
pub fn body_from_bytes(data: bytes::Bytes) -> Body {
    futures::stream::once(async move { Ok(data) }).boxed()
}

/// Reads a whole body into memory.
pub async fn collect_body(mut body: Body) -> Result<bytes::Bytes> {
    let mut buf = bytes::BytesMut::new();
    while let Some(chunk) = body.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf.freeze())
}

/// Validates a `/`-separated object key and returns its segments.
pub(crate) fn key_segments(key: &str) -> Result<Vec<&str>> {
    if key.is_empty() {
        return Err(StoreError::InvalidName {
            name: key.to_string(),
            reason: "key is empty",
        });
    }
    let segments: Vec<&str> = key.split('/').collect();
    for segment in &segments {
        if segment.is_empty() || *segment == "." || *segment == ".." {
            return Err(StoreError::InvalidName {
                name: key.to_string(),
                reason: "key segments must be non-empty and must not be '.' or '..'",
            });
        }
    }
    Ok(segments)
}
