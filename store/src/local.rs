//! Object store backed by a local directory.
//!
//! Layout: `<root>/<container>/<key>` where `/` separators in the key map onto
//! sub-directories. Objects are first written to a temporary file under `<root>/.omirror-tmp/`,
//! outside of every container, and renamed into place once the data hashes to the expected
//! fingerprint, so a reader never observes a partially written object.

use futures::{StreamExt, TryStreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::instrument;

use crate::error::{Result, StoreError};
use crate::{Body, Fingerprinter, Listing, ObjectRecord, ObjectStore};

/// Directory under the store root holding in-flight writes; never a container
const TMP_DIR: &str = ".omirror-tmp";
const READ_BUFFER: usize = 128 * 1024;

#[derive(Debug)]
pub struct LocalStore {
    root: std::path::PathBuf,
    next_tmp: std::sync::atomic::AtomicU64,
}

struct Walk {
    container_root: std::path::PathBuf,
    pending: Vec<std::path::PathBuf>,
    entries: Option<tokio::fs::ReadDir>,
}

impl LocalStore {
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self {
            root: root.into(),
            next_tmp: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    fn container_path(&self, container: &str) -> Result<std::path::PathBuf> {
        if container.is_empty()
            || container.contains('/')
            || container == "."
            || container == ".."
            || container == TMP_DIR
        {
            return Err(StoreError::InvalidName {
                name: container.to_string(),
                reason: "container must be a single non-empty path component",
            });
        }
        Ok(self.root.join(container))
    }

    fn object_path(&self, container: &str, key: &str) -> Result<std::path::PathBuf> {
        let mut path = self.container_path(container)?;
        for segment in crate::key_segments(key)? {
            path.push(segment);
        }
        Ok(path)
    }

    /// Creates the temporary directory and returns a fresh path inside it.
    async fn tmp_path(&self) -> Result<std::path::PathBuf> {
        let dir = self.root.join(TMP_DIR);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|error| StoreError::io(&dir, error))?;
        let seq = self
            .next_tmp
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Ok(dir.join(format!("{}-{seq}", std::process::id())))
    }

    async fn ensure_container(&self, container: &str) -> Result<std::path::PathBuf> {
        let path = self.container_path(container)?;
        match tokio::fs::metadata(&path).await {
            Ok(md) if md.is_dir() => Ok(path),
            Ok(_) => Err(StoreError::ContainerNotFound {
                container: container.to_string(),
            }),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::ContainerNotFound {
                    container: container.to_string(),
                })
            }
            Err(error) => Err(StoreError::io(path, error)),
        }
    }
}

fn key_for(container_root: &std::path::Path, path: &std::path::Path) -> Result<String> {
    let relative = path
        .strip_prefix(container_root)
        .map_err(|_| StoreError::InvalidName {
            name: path.display().to_string(),
            reason: "path is outside of the container",
        })?;
    let mut segments = Vec::new();
    for component in relative.components() {
        match component.as_os_str().to_str() {
            Some(segment) => segments.push(segment),
            None => {
                return Err(StoreError::InvalidName {
                    name: path.display().to_string(),
                    reason: "file name is not valid UTF-8",
                });
            }
        }
    }
    Ok(segments.join("/"))
}

/// Hashes a file and returns its record.
async fn describe_file(path: &std::path::Path, key: String) -> Result<ObjectRecord> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|error| StoreError::io(path, error))?;
    let mut buf = vec![0u8; READ_BUFFER];
    let mut fp = Fingerprinter::new();
    loop {
        let n = file
            .read(&mut buf)
            .await
            .map_err(|error| StoreError::io(path, error))?;
        if n == 0 {
            break;
        }
        fp.update(&buf[..n]);
    }
    Ok(ObjectRecord {
        key,
        size_hint: Some(fp.len()),
        fingerprint: fp.finish(),
    })
}

async fn next_record(mut walk: Walk) -> Result<Option<(ObjectRecord, Walk)>> {
    loop {
        if walk.entries.is_none() {
            let Some(dir) = walk.pending.pop() else {
                return Ok(None);
            };
            let entries = tokio::fs::read_dir(&dir)
                .await
                .map_err(|error| StoreError::io(&dir, error))?;
            walk.entries = Some(entries);
        }
        let Some(entries) = walk.entries.as_mut() else {
            continue;
        };
        let entry = entries
            .next_entry()
            .await
            .map_err(|error| StoreError::io(&walk.container_root, error))?;
        let Some(entry) = entry else {
            walk.entries = None;
            continue;
        };
        let path = entry.path();
        let file_type = entry
            .file_type()
            .await
            .map_err(|error| StoreError::io(&path, error))?;
        if file_type.is_dir() {
            walk.pending.push(path);
        } else if file_type.is_file() {
            let key = key_for(&walk.container_root, &path)?;
            let record = describe_file(&path, key).await?;
            return Ok(Some((record, walk)));
        } else {
            tracing::debug!("ignoring {:?}", &path);
        }
    }
}

#[async_trait::async_trait]
impl ObjectStore for LocalStore {
    fn describe(&self) -> String {
        format!("file://{}", self.root.display())
    }

    fn list_all<'a>(&'a self, container: &'a str) -> Listing<'a> {
        let container_root = match self.container_path(container) {
            Ok(path) => path,
            Err(error) => return futures::stream::once(async move { Err(error) }).boxed(),
        };
        let walk = Walk {
            container_root: container_root.clone(),
            pending: vec![container_root],
            entries: None,
        };
        futures::stream::try_unfold(walk, next_record).boxed()
    }

    #[instrument(skip(self))]
    async fn object_metadata(&self, container: &str, key: &str) -> Result<Option<ObjectRecord>> {
        let path = self.object_path(container, key)?;
        match tokio::fs::metadata(&path).await {
            Ok(md) if md.is_file() => Ok(Some(describe_file(&path, key.to_string()).await?)),
            Ok(_) => Ok(None),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(StoreError::io(path, error)),
        }
    }

    #[instrument(skip(self))]
    async fn get_body(&self, container: &str, key: &str) -> Result<Body> {
        let path = self.object_path(container, key)?;
        let file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound {
                    container: container.to_string(),
                    key: key.to_string(),
                });
            }
            Err(error) => return Err(StoreError::io(path, error)),
        };
        Ok(tokio_util::io::ReaderStream::with_capacity(file, READ_BUFFER)
            .map_err(move |error| StoreError::io(path.clone(), error))
            .boxed())
    }

    #[instrument(skip(self, body))]
    async fn put_object(
        &self,
        container: &str,
        key: &str,
        mut body: Body,
        fingerprint: &str,
    ) -> Result<()> {
        self.ensure_container(container).await?;
        let path = self.object_path(container, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|error| StoreError::io(parent, error))?;
        }
        let partial = self.tmp_path().await?;
        let mut file = tokio::fs::File::create(&partial)
            .await
            .map_err(|error| StoreError::io(&partial, error))?;
        let mut fp = Fingerprinter::new();
        let written: Result<()> = async {
            while let Some(chunk) = body.next().await {
                let chunk = chunk?;
                fp.update(&chunk);
                file.write_all(&chunk)
                    .await
                    .map_err(|error| StoreError::io(&partial, error))?;
            }
            file.flush()
                .await
                .map_err(|error| StoreError::io(&partial, error))
        }
        .await;
        drop(file);
        if let Err(error) = written {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(error);
        }
        let actual = fp.finish();
        if actual != fingerprint {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(StoreError::FingerprintMismatch {
                key: key.to_string(),
                expected: fingerprint.to_string(),
                actual,
            });
        }
        if let Err(error) = tokio::fs::rename(&partial, &path).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(StoreError::io(&path, error));
        }
        tracing::debug!("stored {:?}", &path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{body_from_bytes, collect_body, fingerprint};
    use tracing_test::traced_test;

    fn setup() -> (tempfile::TempDir, LocalStore) {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("src").join("nested")).unwrap();
        std::fs::write(tmp.path().join("src").join("a.txt"), "alpha").unwrap();
        std::fs::write(tmp.path().join("src").join("nested").join("b.txt"), "beta").unwrap();
        std::fs::create_dir(tmp.path().join("dst")).unwrap();
        let store = LocalStore::new(tmp.path());
        (tmp, store)
    }

    #[tokio::test]
    async fn lists_nested_objects() -> Result<()> {
        let (_tmp, store) = setup();
        let mut records: Vec<ObjectRecord> = store.list_all("src").try_collect().await?;
        records.sort_by(|a, b| a.key.cmp(&b.key));
        assert_eq!(
            records,
            vec![
                ObjectRecord {
                    key: "a.txt".to_string(),
                    fingerprint: fingerprint(b"alpha"),
                    size_hint: Some(5),
                },
                ObjectRecord {
                    key: "nested/b.txt".to_string(),
                    fingerprint: fingerprint(b"beta"),
                    size_hint: Some(4),
                },
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn listing_missing_container_fails() {
        let (_tmp, store) = setup();
        let res: Result<Vec<ObjectRecord>> = store.list_all("nope").try_collect().await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn metadata_of_missing_object_is_none() -> Result<()> {
        let (_tmp, store) = setup();
        assert!(store.object_metadata("dst", "a.txt").await?.is_none());
        assert!(store.object_metadata("src", "nested").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn put_then_read_back() -> Result<()> {
        let (tmp, store) = setup();
        let data = bytes::Bytes::from_static(b"gamma");
        store
            .put_object(
                "dst",
                "deep/dir/c.txt",
                body_from_bytes(data.clone()),
                &fingerprint(&data),
            )
            .await?;
        let record = store.object_metadata("dst", "deep/dir/c.txt").await?.unwrap();
        assert_eq!(record.fingerprint, fingerprint(&data));
        assert_eq!(collect_body(store.get_body("dst", "deep/dir/c.txt").await?).await?, data);
        // no temporary files are left behind
        let entries: Vec<_> = std::fs::read_dir(tmp.path().join("dst").join("deep").join("dir"))
            .unwrap()
            .collect();
        assert_eq!(entries.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn put_rejects_wrong_fingerprint() {
        let (tmp, store) = setup();
        let res = store
            .put_object(
                "dst",
                "a.txt",
                body_from_bytes(bytes::Bytes::from_static(b"alpha")),
                "not-a-digest",
            )
            .await;
        assert!(matches!(res, Err(StoreError::FingerprintMismatch { .. })));
        assert!(!tmp.path().join("dst").join("a.txt").exists());
        assert_eq!(std::fs::read_dir(tmp.path().join("dst")).unwrap().count(), 0);
        assert_eq!(std::fs::read_dir(tmp.path().join(TMP_DIR)).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn put_into_missing_container_fails() {
        let (_tmp, store) = setup();
        let data = bytes::Bytes::from_static(b"x");
        let res = store
            .put_object("missing", "x", body_from_bytes(data.clone()), &fingerprint(&data))
            .await;
        assert!(matches!(res, Err(StoreError::ContainerNotFound { .. })));
    }

    #[tokio::test]
    async fn get_missing_object_is_not_found() {
        let (_tmp, store) = setup();
        match store.get_body("src", "zzz").await {
            Err(error) => assert!(matches!(error, StoreError::NotFound { .. })),
            Ok(_) => panic!("expected the read to fail"),
        }
    }

    #[tokio::test]
    async fn lists_files_named_like_temporary_writes() -> Result<()> {
        let (tmp, store) = setup();
        std::fs::write(tmp.path().join("src").join("report.omirror-partial"), "r").unwrap();
        std::fs::write(tmp.path().join("src").join(".c.txt.omirror-partial"), "c").unwrap();
        let mut keys: Vec<String> = store
            .list_all("src")
            .map_ok(|record| record.key)
            .try_collect()
            .await?;
        keys.sort();
        assert_eq!(
            keys,
            vec![".c.txt.omirror-partial", "a.txt", "nested/b.txt", "report.omirror-partial"]
        );
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn put_writes_through_temporary_directory() -> Result<()> {
        let (tmp, store) = setup();
        let data = bytes::Bytes::from_static(b"r");
        store
            .put_object(
                "dst",
                "report.omirror-partial",
                body_from_bytes(data.clone()),
                &fingerprint(&data),
            )
            .await?;
        assert!(logs_contain("stored"));
        assert_eq!(
            std::fs::read(tmp.path().join("dst").join("report.omirror-partial")).unwrap(),
            b"r"
        );
        assert_eq!(std::fs::read_dir(tmp.path().join(TMP_DIR)).unwrap().count(), 0);
        // the temporary directory never shows up as an object
        let records: Vec<ObjectRecord> = store.list_all("dst").try_collect().await?;
        assert_eq!(records.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn temporary_directory_is_not_a_container() {
        let (_tmp, store) = setup();
        let res: Result<Vec<ObjectRecord>> = store.list_all(TMP_DIR).try_collect().await;
        assert!(matches!(res, Err(StoreError::InvalidName { .. })));
    }
}
