//! In-process object store.
//!
//! Keeps every container in a map behind a mutex. Besides serving as a scratch backend it counts
//! every operation it serves and can be told to fail specific operations, which makes it the
//! backend of choice for exercising the transfer pipeline.

use futures::StreamExt;

use crate::error::{Result, StoreError};
use crate::{Body, Listing, ObjectRecord, ObjectStore};

#[derive(Debug, Clone)]
struct StoredObject {
    data: bytes::Bytes,
    fingerprint: String,
}

#[derive(Debug, Default)]
struct Faults {
    fail_listing_after: Option<usize>,
    fail_metadata_for: std::collections::HashSet<String>,
    fail_put_for: std::collections::HashSet<String>,
}

/// Snapshot of the operations served by a [`MemoryStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub listed: u64,
    pub metadata_lookups: u64,
    pub body_reads: u64,
    pub puts: u64,
    pub bytes_written: u64,
}

type Containers =
    std::collections::HashMap<String, std::collections::BTreeMap<String, StoredObject>>;

#[derive(Debug, Default)]
pub struct MemoryStore {
    containers: std::sync::Mutex<Containers>,
    faults: std::sync::Mutex<Faults>,
    stats: std::sync::Mutex<MemoryStats>,
}

fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_container(&self, container: &str) {
        lock(&self.containers)
            .entry(container.to_string())
            .or_default();
    }

    /// Stores `data` under `key`, creating the container if needed. Returns the fingerprint.
    pub fn insert(&self, container: &str, key: &str, data: impl Into<bytes::Bytes>) -> String {
        let data = data.into();
        let fingerprint = crate::fingerprint(&data);
        self.insert_with_fingerprint(container, key, data, &fingerprint);
        fingerprint
    }

    /// Stores `data` with an arbitrary fingerprint; the fingerprint is not verified.
    pub fn insert_with_fingerprint(
        &self,
        container: &str,
        key: &str,
        data: impl Into<bytes::Bytes>,
        fingerprint: &str,
    ) {
        lock(&self.containers)
            .entry(container.to_string())
            .or_default()
            .insert(
                key.to_string(),
                StoredObject {
                    data: data.into(),
                    fingerprint: fingerprint.to_string(),
                },
            );
    }

    /// Returns body and fingerprint of `key`.
    pub fn get(&self, container: &str, key: &str) -> Option<(bytes::Bytes, String)> {
        lock(&self.containers)
            .get(container)
            .and_then(|objects| objects.get(key))
            .map(|object| (object.data.clone(), object.fingerprint.clone()))
    }

    /// All keys of `container` with their fingerprints, in key order.
    pub fn fingerprints(&self, container: &str) -> Vec<(String, String)> {
        lock(&self.containers)
            .get(container)
            .map(|objects| {
                objects
                    .iter()
                    .map(|(key, object)| (key.clone(), object.fingerprint.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn stats(&self) -> MemoryStats {
        *lock(&self.stats)
    }

    /// Makes listings fail after yielding `count` objects.
    pub fn fail_listing_after(&self, count: usize) {
        lock(&self.faults).fail_listing_after = Some(count);
    }

    /// Makes existence checks for `key` fail.
    pub fn fail_metadata_for(&self, key: &str) {
        lock(&self.faults).fail_metadata_for.insert(key.to_string());
    }

    /// Makes writes of `key` fail.
    pub fn fail_put_for(&self, key: &str) {
        lock(&self.faults).fail_put_for.insert(key.to_string());
    }

    fn missing_container(container: &str) -> StoreError {
        StoreError::ContainerNotFound {
            container: container.to_string(),
        }
    }

    /// Returns the first object with a key greater than `after`.
    fn next_after(&self, container: &str, after: Option<&str>) -> Result<Option<ObjectRecord>> {
        let containers = lock(&self.containers);
        let objects = containers
            .get(container)
            .ok_or_else(|| Self::missing_container(container))?;
        let next = match after {
            Some(after) => objects
                .range::<str, _>((
                    std::ops::Bound::Excluded(after),
                    std::ops::Bound::Unbounded,
                ))
                .next(),
            None => objects.iter().next(),
        };
        Ok(next.map(|(key, object)| ObjectRecord {
            key: key.clone(),
            fingerprint: object.fingerprint.clone(),
            size_hint: Some(object.data.len() as u64),
        }))
    }
}

struct Cursor<'a> {
    store: &'a MemoryStore,
    container: &'a str,
    last: Option<String>,
    yielded: usize,
}

#[async_trait::async_trait]
impl ObjectStore for MemoryStore {
    fn describe(&self) -> String {
        "memory://".to_string()
    }

    fn list_all<'a>(&'a self, container: &'a str) -> Listing<'a> {
        let cursor = Cursor {
            store: self,
            container,
            last: None,
            yielded: 0,
        };
        futures::stream::try_unfold(cursor, |mut cursor| async move {
            let interrupted = lock(&cursor.store.faults)
                .fail_listing_after
                .is_some_and(|limit| cursor.yielded >= limit);
            if interrupted {
                return Err(StoreError::Unavailable {
                    operation: "list",
                    message: format!(
                        "listing of {} interrupted after {} objects",
                        cursor.container, cursor.yielded
                    ),
                });
            }
            let Some(record) = cursor
                .store
                .next_after(cursor.container, cursor.last.as_deref())?
            else {
                return Ok(None);
            };
            lock(&cursor.store.stats).listed += 1;
            cursor.last = Some(record.key.clone());
            cursor.yielded += 1;
            Ok(Some((record, cursor)))
        })
        .boxed()
    }

    async fn object_metadata(&self, container: &str, key: &str) -> Result<Option<ObjectRecord>> {
        lock(&self.stats).metadata_lookups += 1;
        if lock(&self.faults).fail_metadata_for.contains(key) {
            return Err(StoreError::Unavailable {
                operation: "head",
                message: format!("injected failure for {container}/{key}"),
            });
        }
        let containers = lock(&self.containers);
        let objects = containers
            .get(container)
            .ok_or_else(|| Self::missing_container(container))?;
        Ok(objects.get(key).map(|object| ObjectRecord {
            key: key.to_string(),
            fingerprint: object.fingerprint.clone(),
            size_hint: Some(object.data.len() as u64),
        }))
    }

    async fn get_body(&self, container: &str, key: &str) -> Result<Body> {
        lock(&self.stats).body_reads += 1;
        match self.get(container, key) {
            Some((data, _)) => Ok(crate::body_from_bytes(data)),
            None => Err(StoreError::NotFound {
                container: container.to_string(),
                key: key.to_string(),
            }),
        }
    }

    async fn put_object(
        &self,
        container: &str,
        key: &str,
        body: Body,
        fingerprint: &str,
    ) -> Result<()> {
        if lock(&self.faults).fail_put_for.contains(key) {
            return Err(StoreError::Unavailable {
                operation: "put",
                message: format!("injected failure for {container}/{key}"),
            });
        }
        if !lock(&self.containers).contains_key(container) {
            return Err(Self::missing_container(container));
        }
        let data = crate::collect_body(body).await?;
        let actual = crate::fingerprint(&data);
        if actual != fingerprint {
            return Err(StoreError::FingerprintMismatch {
                key: key.to_string(),
                expected: fingerprint.to_string(),
                actual,
            });
        }
        {
            let mut stats = lock(&self.stats);
            stats.puts += 1;
            stats.bytes_written += data.len() as u64;
        }
        self.insert_with_fingerprint(container, key, data, fingerprint);
        Ok(())
    }
}
