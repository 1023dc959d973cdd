use std::fs;
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Object storage holding source videos and rendered clips.
pub trait ObjectStorage: Send + Sync {
    /// Download `key` into the local file `dest`.
    fn fetch(&self, key: &str, dest: &Path) -> Result<()>;

    /// Upload the local file `src` as `key`.
    fn store(&self, src: &Path, key: &str) -> Result<()>;
}

/// The "directory" part of a key: everything before the last `/`, or `""`.
pub fn key_prefix(key: &str) -> &str {
    key.rsplit_once('/').map_or("", |(dir, _)| dir)
}

/// Key for a rendered clip next to its source: `<dir>/clip_<index>[_<lang>].<ext>`.
pub fn clip_key(source_key: &str, index: usize, language: Option<&str>, ext: &str) -> String {
    let suffix = language
        .map(|lang| {
            lang.chars()
                .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
                .collect::<String>()
        })
        .filter(|lang| !lang.is_empty())
        .map(|lang| format!("_{lang}"))
        .unwrap_or_default();

    let name = format!("clip_{index}{suffix}.{ext}");
    match key_prefix(source_key) {
        "" => name,
        dir => format!("{dir}/{name}"),
    }
}

/// Keys map to files under a root directory. Useful for local runs and tests.
#[derive(Debug, Clone)]
pub struct DirStorage {
    root: PathBuf,
}

impl DirStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key.trim_start_matches('/'));
        let escapes = relative
            .components()
            .any(|c| !matches!(c, std::path::Component::Normal(_)));
        if key.trim().is_empty() || escapes {
            return Err(Error::msg(format!("invalid storage key: {key:?}")));
        }
        Ok(self.root.join(relative))
    }
}

impl ObjectStorage for DirStorage {
    fn fetch(&self, key: &str, dest: &Path) -> Result<()> {
        let src = self.path_for(key)?;
        if !src.is_file() {
            return Err(Error::external("storage", format!("no object at {key}")));
        }
        fs::copy(src, dest)?;
        Ok(())
    }

    fn store(&self, src: &Path, key: &str) -> Result<()> {
        let dest = self.path_for(key)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(src, dest)?;
        Ok(())
    }
}

#[cfg(feature = "storage")]
pub use remote::RemoteStorage;

#[cfg(feature = "storage")]
mod remote {
    use std::fs::File;
    use std::future::Future;
    use std::io::Write;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    use futures_util::StreamExt;
    use object_store::aws::AmazonS3Builder;
    use object_store::local::LocalFileSystem;
    use object_store::path::Path as ObjectPath;
    use object_store::{ObjectStore, PutPayload};
    use tokio::runtime::Handle;
    use tracing::debug;

    use super::ObjectStorage;
    use crate::{Error, Result};

    const SERVICE: &str = "object storage";

    /// [`ObjectStorage`] over any `object_store` backend.
    ///
    /// The pipeline is synchronous, so every call blocks on `handle`. Calls must come from
    /// outside async contexts (worker threads or `spawn_blocking`). With a timeout set, a call
    /// that runs past it fails with [`Error::External`].
    pub struct RemoteStorage {
        store: Arc<dyn ObjectStore>,
        handle: Handle,
        timeout: Option<Duration>,
    }

    impl RemoteStorage {
        pub fn new(store: Arc<dyn ObjectStore>, handle: Handle) -> Self {
            Self {
                store,
                handle,
                timeout: None,
            }
        }

        /// Bound each `fetch` (the whole download) and each `store`.
        pub fn with_timeout(mut self, timeout: Duration) -> Self {
            self.timeout = Some(timeout);
            self
        }

        /// S3 bucket, credentials from the usual `AWS_*` environment variables.
        pub fn s3(bucket: &str, region: &str, handle: Handle) -> Result<Self> {
            let store = AmazonS3Builder::from_env()
                .with_bucket_name(bucket)
                .with_region(region)
                .build()
                .map_err(|err| Error::external(SERVICE, err))?;
            Ok(Self::new(Arc::new(store), handle))
        }

        /// Keys resolve under a local directory.
        pub fn local(root: &Path, handle: Handle) -> Result<Self> {
            std::fs::create_dir_all(root)?;
            let store = LocalFileSystem::new_with_prefix(root).map_err(|err| Error::external(SERVICE, err))?;
            Ok(Self::new(Arc::new(store), handle))
        }
    }

    async fn within<T>(timeout: Option<Duration>, op: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        let Some(limit) = timeout else {
            return fut.await;
        };
        tokio::time::timeout(limit, fut).await.map_err(|_| {
            Error::external(SERVICE, format!("{op} timed out after {:.1}s", limit.as_secs_f64()))
        })?
    }

    fn object_path(key: &str) -> Result<ObjectPath> {
        ObjectPath::parse(key.trim_start_matches('/'))
            .map_err(|err| Error::msg(format!("invalid storage key {key:?}: {err}")))
    }

    impl ObjectStorage for RemoteStorage {
        fn fetch(&self, key: &str, dest: &Path) -> Result<()> {
            let location = object_path(key)?;
            let mut file = File::create(dest)?;

            let written = self.handle.block_on(within(self.timeout, "get", async {
                let mut stream = self
                    .store
                    .get(&location)
                    .await
                    .map_err(|err| Error::external(SERVICE, err))?
                    .into_stream();

                let mut written = 0usize;
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk.map_err(|err| Error::external(SERVICE, err))?;
                    file.write_all(&chunk)?;
                    written += chunk.len();
                }
                Ok::<_, Error>(written)
            }))?;

            file.flush()?;
            debug!(key, bytes = written, "fetched object");
            Ok(())
        }

        fn store(&self, src: &Path, key: &str) -> Result<()> {
            let location = object_path(key)?;
            let bytes = std::fs::read(src)?;
            let len = bytes.len();

            self.handle.block_on(within(self.timeout, "put", async {
                self.store
                    .put(&location, PutPayload::from(bytes))
                    .await
                    .map_err(|err| Error::external(SERVICE, err))
            }))?;

            debug!(key, bytes = len, "stored object");
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn local_round_trip_through_object_store() -> anyhow::Result<()> {
            let rt = tokio::runtime::Runtime::new()?;
            let root = tempfile::tempdir()?;
            let scratch = tempfile::tempdir()?;
            let storage = RemoteStorage::local(root.path(), rt.handle().clone())?;

            let src = scratch.path().join("clip.mp4");
            std::fs::write(&src, b"not really a video")?;
            storage.store(&src, "uploads/abc/clip_0.mp4")?;

            let dest = scratch.path().join("back.mp4");
            storage.fetch("uploads/abc/clip_0.mp4", &dest)?;
            assert_eq!(std::fs::read(dest)?, b"not really a video");

            assert!(storage.fetch("uploads/abc/missing.mp4", &scratch.path().join("x")).is_err());
            Ok(())
        }

        #[test]
        fn stalled_calls_fail_at_the_deadline() -> anyhow::Result<()> {
            let rt = tokio::runtime::Runtime::new()?;
            let stalled = std::future::pending::<Result<()>>();

            let err = rt
                .block_on(within(Some(Duration::from_millis(50)), "get", stalled))
                .unwrap_err();
            assert!(matches!(&err, Error::External { message, .. } if message.contains("get timed out")));
            assert!(err.is_window_scoped());

            assert_eq!(rt.block_on(within(None, "put", async { Ok(7) }))?, 7);
            Ok(())
        }
    }
}
