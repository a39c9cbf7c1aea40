use std::sync::Arc;

use crate::mirror::Endpoint;

pub const SRC: &str = "src";
pub const DST: &str = "dst";

/// Two in-memory stores with an empty container each, plus endpoints pointing at them.
pub fn memory_endpoints() -> (
    Arc<store::MemoryStore>,
    Arc<store::MemoryStore>,
    Endpoint,
    Endpoint,
) {
    let src = Arc::new(store::MemoryStore::new());
    src.create_container(SRC);
    let dst = Arc::new(store::MemoryStore::new());
    dst.create_container(DST);
    let source = Endpoint::new(src.clone(), SRC);
    let destination = Endpoint::new(dst.clone(), DST);
    (src, dst, source, destination)
}

/// Record of an object already stored in the source container.
pub fn record(src: &store::MemoryStore, key: &str) -> store::ObjectRecord {
    let (data, fingerprint) = src.get(SRC, key).unwrap();
    store::ObjectRecord {
        key: key.to_string(),
        fingerprint,
        size_hint: Some(data.len() as u64),
    }
}
