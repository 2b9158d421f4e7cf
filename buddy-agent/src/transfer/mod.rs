//! Moves snapshot directories between the data directory and the object store.
//!
//! Uploads fan out one task per file under a semaphore of `max_parallel`
//! permits; downloads fan out one task per table directory. Both wait for
//! every task before returning.

pub mod outcome;

pub use outcome::{format_bytes, RestoreOutcome, TransferOutcome, TransferRecord};

use crate::config::StoreConfig;
use crate::fs::{list_files, FileInfo};
use crate::manifest::{join_remote, remote_parent, Manifest};
use crate::{AgentError, Result};
use futures_util::StreamExt;
use object_store::path::Path as ObjectPath;
use object_store::{parse_url_opts, ObjectStore, WriteMultipart};
use outcome::InFlight;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, warn};
use url::Url;

/// Files above this size are streamed as multipart uploads
const MULTIPART_THRESHOLD: u64 = 16 * 1024 * 1024;

/// Parts of one multipart upload allowed in flight at once
const PARTS_IN_FLIGHT: usize = 4;

pub struct TransferEngine {
    store: Arc<dyn ObjectStore>,
    /// Prefix every key is placed under (the path part of the store URL)
    root: ObjectPath,
    data_root: PathBuf,
    max_parallel: usize,
    strict: bool,
    multipart_threshold: u64,
}

impl TransferEngine {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        root: ObjectPath,
        data_root: PathBuf,
        max_parallel: usize,
        strict: bool,
    ) -> Self {
        Self {
            store,
            root,
            data_root,
            max_parallel: max_parallel.max(1),
            strict,
            multipart_threshold: MULTIPART_THRESHOLD,
        }
    }

    /// Build the store from its URL. S3 credentials and region come from the
    /// `AWS_*` environment variables.
    pub fn from_config(config: &StoreConfig, data_root: &Path) -> Result<Self> {
        let url = Url::parse(&config.url)
            .map_err(|e| AgentError::Config(format!("invalid store url {}: {}", config.url, e)))?;

        let (store, root) = parse_url_opts(&url, aws_env_options())?;
        info!("Using object store {} (root '{}')", url, root);

        Ok(Self::new(
            Arc::from(store),
            root,
            data_root.to_path_buf(),
            config.max_parallel,
            config.strict,
        ))
    }

    pub fn with_multipart_threshold(mut self, bytes: u64) -> Self {
        self.multipart_threshold = bytes;
        self
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    /// Object key for a `/`-separated path relative to the store root
    fn key(&self, relative: &str) -> ObjectPath {
        relative
            .split('/')
            .filter(|segment| !segment.is_empty())
            .fold(self.root.clone(), |path, segment| path.child(segment))
    }

    /// `<keyspace>/<table>` for a snapshot directory
    /// `<data_root>/<keyspace>/<table>/snapshots/<name>`
    fn table_path(&self, directory: &Path, name: &str) -> Result<String> {
        let relative = directory.strip_prefix(&self.data_root).map_err(|_| {
            AgentError::Transfer(format!(
                "{} is outside the data directory {}",
                directory.display(),
                self.data_root.display()
            ))
        })?;

        let mut segments: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        if segments.len() >= 2
            && segments[segments.len() - 2] == "snapshots"
            && segments[segments.len() - 1] == name
        {
            segments.truncate(segments.len() - 2);
        }

        Ok(segments.join("/"))
    }

    /// Upload every directory of `manifest`, then the manifest itself.
    ///
    /// `manifest.paths` is rebuilt here, one entry per directory in order.
    /// A directory that cannot be listed aborts the upload before any file
    /// is sent. Files that fail are logged and recorded; the manifest is
    /// written anyway unless the engine is strict.
    pub async fn put(&self, manifest: &mut Manifest) -> Result<TransferOutcome> {
        let mut listings = Vec::with_capacity(manifest.directories.len());
        for directory in &manifest.directories {
            let table_path = self.table_path(directory, &manifest.name)?;
            let files = list_files(directory).map_err(|e| {
                error!("Failed to list {}: {}", directory.display(), e);
                AgentError::Io(e)
            })?;
            listings.push((table_path, files));
        }

        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let in_flight = InFlight::default();
        let mut records = Vec::new();
        let mut handles = Vec::new();

        manifest.paths.clear();

        for (table_path, files) in listings {
            let remote_dir = join_remote(&[&manifest.path, &table_path]);
            manifest.paths.push(table_path);
            debug!("Uploading {} files to {}", files.len(), remote_dir);

            for file in files {
                let remote = join_remote(&[&remote_dir, &file.name]);
                let key = self.key(&remote);
                let store = Arc::clone(&self.store);
                let sem = Arc::clone(&semaphore);
                let in_flight = in_flight.clone();
                let threshold = self.multipart_threshold;
                let local = file.path.clone();

                let handle = tokio::spawn(async move {
                    let _permit = match sem.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(e) => return TransferRecord::failed(file.path, remote, e),
                    };
                    let _running = in_flight.enter();

                    match upload_file(store.as_ref(), &key, &file, threshold).await {
                        Ok(bytes) => {
                            debug!("Uploaded {} ({})", remote, format_bytes(bytes));
                            TransferRecord::succeeded(file.path, remote, bytes)
                        }
                        Err(e) => {
                            warn!("Failed to upload {}: {}", file.path.display(), e);
                            TransferRecord::failed(file.path, remote, e)
                        }
                    }
                });

                handles.push((local, handle));
            }
        }

        for (local, handle) in handles {
            match handle.await {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!("Upload task for {} panicked: {}", local.display(), e);
                    records.push(TransferRecord::failed(local, String::new(), e));
                }
            }
        }

        let outcome = TransferOutcome {
            records,
            peak_in_flight: in_flight.peak(),
        };
        info!(
            "Uploaded {} files ({}), {} failed",
            outcome.succeeded(),
            format_bytes(outcome.total_bytes()),
            outcome.failed()
        );

        if self.strict && outcome.failed() > 0 {
            return Err(AgentError::Transfer(format!(
                "{} of {} files failed to upload",
                outcome.failed(),
                outcome.records.len()
            )));
        }

        let location = manifest.location();
        self.store
            .put(&self.key(&location), manifest.to_json()?.into())
            .await
            .map_err(|e| AgentError::Transfer(format!("failed to upload {}: {}", location, e)))?;
        info!("Wrote manifest {}", location);

        Ok(outcome)
    }

    /// Download the manifest at `manifest_path` and every directory it lists
    /// into the data directory.
    ///
    /// All directory tasks run to completion; if any failed, the first
    /// failure is returned.
    pub async fn get(&self, manifest_path: &str) -> Result<(Manifest, RestoreOutcome)> {
        let data = self.store.get(&self.key(manifest_path)).await?.bytes().await?;
        let mut manifest = Manifest::from_json(&data)?;
        manifest.path = remote_parent(manifest_path);

        let mut handles = Vec::with_capacity(manifest.paths.len());
        for table_path in &manifest.paths {
            let local_dir = self.local_dir(table_path)?;
            let remote_dir = self.key(&join_remote(&[&manifest.path, table_path]));
            let store = Arc::clone(&self.store);

            let handle =
                tokio::spawn(async move { download_directory(store, remote_dir, local_dir).await });
            handles.push((table_path.clone(), handle));
        }

        let mut outcome = RestoreOutcome::default();
        let mut first_error = None;
        for (table_path, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(e.into()),
            };
            match result {
                Ok(directory) => outcome.absorb(directory),
                Err(e) => {
                    error!("Failed to restore {}: {}", table_path, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        info!(
            "Restored {} directories, {} files ({}) from {}",
            outcome.directories,
            outcome.files,
            format_bytes(outcome.bytes),
            manifest.path
        );
        Ok((manifest, outcome))
    }

    /// Local target for a manifest entry; entries may not leave the data root
    fn local_dir(&self, table_path: &str) -> Result<PathBuf> {
        let relative = Path::new(table_path);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(AgentError::Validation(format!(
                "manifest path {} escapes the data directory",
                table_path
            )));
        }
        Ok(self.data_root.join(relative))
    }
}

/// `AWS_*` environment variables as lowercase object store options
fn aws_env_options() -> Vec<(String, String)> {
    std::env::vars_os()
        .filter_map(|(key, value)| {
            let (key, value) = (key.to_str()?, value.to_str()?);
            key.starts_with("AWS_")
                .then(|| (key.to_ascii_lowercase(), value.to_string()))
        })
        .collect()
}

async fn upload_file(
    store: &dyn ObjectStore,
    key: &ObjectPath,
    file: &FileInfo,
    multipart_threshold: u64,
) -> Result<u64> {
    if file.size <= multipart_threshold {
        let data = tokio::fs::read(&file.path).await?;
        let size = data.len() as u64;
        store.put(key, data.into()).await?;
        return Ok(size);
    }

    let upload = store.put_multipart(key).await?;
    let mut writer = WriteMultipart::new(upload);
    match stream_file(&mut writer, &file.path).await {
        Ok(size) => {
            writer.finish().await?;
            Ok(size)
        }
        Err(e) => {
            if let Err(abort_err) = writer.abort().await {
                warn!("Failed to abort upload of {}: {}", key, abort_err);
            }
            Err(e)
        }
    }
}

async fn stream_file(writer: &mut WriteMultipart, path: &Path) -> Result<u64> {
    let mut stream = ReaderStream::new(tokio::fs::File::open(path).await?);
    let mut size = 0;
    while let Some(chunk) = stream.next().await {
        writer.wait_for_capacity(PARTS_IN_FLIGHT).await?;
        let chunk = chunk?;
        size += chunk.len() as u64;
        writer.write(&chunk);
    }
    Ok(size)
}

/// Copy every object directly under `remote_dir` into `local_dir`
async fn download_directory(
    store: Arc<dyn ObjectStore>,
    remote_dir: ObjectPath,
    local_dir: PathBuf,
) -> Result<RestoreOutcome> {
    tokio::fs::create_dir_all(&local_dir).await?;
    let listing = store.list_with_delimiter(Some(&remote_dir)).await?;

    let mut outcome = RestoreOutcome {
        directories: 1,
        ..RestoreOutcome::default()
    };
    for object in listing.objects {
        let Some(name) = object.location.filename() else {
            continue;
        };
        let target = local_dir.join(name);

        let mut stream = store.get(&object.location).await?.into_stream();
        let mut file = tokio::fs::File::create(&target).await?;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            outcome.bytes += chunk.len() as u64;
        }
        file.flush().await?;

        debug!("Restored {}", target.display());
        outcome.files += 1;
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ManifestBuilder;
    use object_store::local::LocalFileSystem;
    use object_store::memory::InMemory;
    use std::fs;
    use tempfile::TempDir;

    const NAME: &str = "20240101120000";

    fn snapshot(root: &Path, keyspace: &str, table: &str, files: &[(&str, &[u8])]) -> PathBuf {
        let dir = root.join(keyspace).join(table).join("snapshots").join(NAME);
        fs::create_dir_all(&dir).unwrap();
        for (name, data) in files {
            fs::write(dir.join(name), data).unwrap();
        }
        dir
    }

    fn memory_engine(data_root: &Path, max_parallel: usize) -> (Arc<InMemory>, TransferEngine) {
        let store = Arc::new(InMemory::new());
        let engine = TransferEngine::new(
            store.clone(),
            ObjectPath::from("bucket-root"),
            data_root.to_path_buf(),
            max_parallel,
            false,
        );
        (store, engine)
    }

    fn build_manifest(data_root: &Path) -> Manifest {
        ManifestBuilder::default()
            .build(data_root, NAME, &format!("backups/c/h/{}", NAME))
            .unwrap()
    }

    #[tokio::test]
    async fn test_put_uploads_files_and_manifest() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        snapshot(root, "ks1", "t1", &[("a-Data.db", b"aaaa"), ("a-Index.db", b"ii")]);
        snapshot(root, "ks2", "t9", &[("b-Data.db", b"bbbbbb")]);
        let (store, engine) = memory_engine(root, 4);
        let mut manifest = build_manifest(root);

        let outcome = engine.put(&mut manifest).await.unwrap();

        assert_eq!(outcome.succeeded(), 3);
        assert_eq!(outcome.failed(), 0);
        assert_eq!(outcome.total_bytes(), 12);
        assert_eq!(manifest.paths, vec!["ks1/t1", "ks2/t9"]);

        let data = store
            .get(&ObjectPath::from("bucket-root/backups/c/h/20240101120000/ks1/t1/a-Data.db"))
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        assert_eq!(&data[..], b"aaaa");

        let stored = store
            .get(&ObjectPath::from("bucket-root/backups/c/h/20240101120000/manifest.json"))
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        let stored = Manifest::from_json(&stored).unwrap();
        assert_eq!(stored.name, NAME);
        assert_eq!(stored.paths, vec!["ks1/t1", "ks2/t9"]);
        assert_eq!(stored.keyspaces, vec!["ks1", "ks2"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_put_respects_parallelism_bound() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let names: Vec<String> = (0..50).map(|i| format!("f{:02}-Data.db", i)).collect();
        let files: Vec<(&str, &[u8])> = names.iter().map(|n| (n.as_str(), &b"x"[..])).collect();
        snapshot(root, "ks1", "t1", &files);
        let (_store, engine) = memory_engine(root, 3);
        let mut manifest = build_manifest(root);

        let outcome = engine.put(&mut manifest).await.unwrap();

        assert_eq!(outcome.succeeded(), 50);
        assert!(outcome.peak_in_flight >= 1);
        assert!(outcome.peak_in_flight <= 3);
    }

    #[tokio::test]
    async fn test_put_empty_manifest_still_writes_manifest() {
        let temp_dir = TempDir::new().unwrap();
        let (store, engine) = memory_engine(temp_dir.path(), 2);
        let mut manifest = Manifest::new(NAME, "backups/c/h/empty");

        let outcome = engine.put(&mut manifest).await.unwrap();

        assert_eq!(outcome.records.len(), 0);
        assert!(store
            .head(&ObjectPath::from("bucket-root/backups/c/h/empty/manifest.json"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_large_files_use_multipart() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let big = vec![7u8; 64 * 1024];
        snapshot(root, "ks1", "t1", &[("big-Data.db", &big)]);
        let (store, engine) = memory_engine(root, 2);
        let engine = engine.with_multipart_threshold(1024);
        let mut manifest = build_manifest(root);

        let outcome = engine.put(&mut manifest).await.unwrap();
        assert_eq!(outcome.total_bytes(), big.len() as u64);

        let data = store
            .get(&ObjectPath::from("bucket-root/backups/c/h/20240101120000/ks1/t1/big-Data.db"))
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        assert_eq!(data.len(), big.len());
    }

    /// A regular file where the store needs a directory makes every upload
    /// below it fail
    fn blocked_store(temp: &Path) -> Arc<LocalFileSystem> {
        let store_root = temp.join("store");
        fs::create_dir_all(store_root.join("backups/c/h").join(NAME)).unwrap();
        fs::write(store_root.join("backups/c/h").join(NAME).join("ks1"), b"").unwrap();
        Arc::new(LocalFileSystem::new_with_prefix(&store_root).unwrap())
    }

    #[tokio::test]
    async fn test_failed_files_are_recorded() {
        let temp_dir = TempDir::new().unwrap();
        let data_root = temp_dir.path().join("data");
        snapshot(&data_root, "ks1", "t1", &[("a-Data.db", b"a")]);
        snapshot(&data_root, "ks2", "t2", &[("b-Data.db", b"b")]);
        let store = blocked_store(temp_dir.path());
        let engine = TransferEngine::new(store.clone(), ObjectPath::default(), data_root.clone(), 2, false);
        let mut manifest = build_manifest(&data_root);

        let outcome = engine.put(&mut manifest).await.unwrap();

        assert_eq!(outcome.succeeded(), 1);
        assert_eq!(outcome.failed(), 1);
        let failed: Vec<_> = outcome.failures().map(|r| r.local.clone()).collect();
        assert!(failed[0].ends_with("a-Data.db"));
        assert!(store
            .head(&ObjectPath::from(format!("backups/c/h/{}/manifest.json", NAME)))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_strict_mode_skips_manifest_on_failure() {
        let temp_dir = TempDir::new().unwrap();
        let data_root = temp_dir.path().join("data");
        snapshot(&data_root, "ks1", "t1", &[("a-Data.db", b"a")]);
        let store = blocked_store(temp_dir.path());
        let engine = TransferEngine::new(store.clone(), ObjectPath::default(), data_root.clone(), 2, true);
        let mut manifest = build_manifest(&data_root);

        let err = engine.put(&mut manifest).await.unwrap_err();

        assert!(matches!(err, AgentError::Transfer(_)));
        assert!(store
            .head(&ObjectPath::from(format!("backups/c/h/{}/manifest.json", NAME)))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_unlistable_directory_aborts_before_manifest() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        snapshot(root, "ks1", "t1", &[("a-Data.db", b"a")]);
        let vanished = snapshot(root, "ks1", "t2", &[("b-Data.db", b"b")]);
        let (store, engine) = memory_engine(root, 2);
        let mut manifest = build_manifest(root);
        fs::remove_dir_all(&vanished).unwrap();

        let err = engine.put(&mut manifest).await.unwrap_err();

        assert!(matches!(err, AgentError::Io(_)));
        assert!(store
            .head(&ObjectPath::from("bucket-root/backups/c/h/20240101120000/manifest.json"))
            .await
            .is_err());
        assert!(store
            .head(&ObjectPath::from("bucket-root/backups/c/h/20240101120000/ks1/t1/a-Data.db"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_get_restores_into_data_root() {
        let source = TempDir::new().unwrap();
        snapshot(source.path(), "ks1", "t1", &[("a-Data.db", b"aaaa"), ("a-Index.db", b"ii")]);
        snapshot(source.path(), "ks2", "t9", &[("b-Data.db", b"bbbbbb")]);
        let (store, uploader) = memory_engine(source.path(), 4);
        let mut manifest = build_manifest(source.path());
        uploader.put(&mut manifest).await.unwrap();

        let target = TempDir::new().unwrap();
        let downloader = TransferEngine::new(
            store,
            ObjectPath::from("bucket-root"),
            target.path().to_path_buf(),
            4,
            false,
        );
        let (restored, outcome) = downloader
            .get(&format!("backups/c/h/{}/manifest.json", NAME))
            .await
            .unwrap();

        assert_eq!(restored.path, format!("backups/c/h/{}", NAME));
        assert_eq!(outcome, RestoreOutcome { directories: 2, files: 3, bytes: 12 });
        assert_eq!(fs::read(target.path().join("ks1/t1/a-Data.db")).unwrap(), b"aaaa");
        assert_eq!(fs::read(target.path().join("ks1/t1/a-Index.db")).unwrap(), b"ii");
        assert_eq!(fs::read(target.path().join("ks2/t9/b-Data.db")).unwrap(), b"bbbbbb");
    }

    #[tokio::test]
    async fn test_get_missing_manifest_fails() {
        let temp_dir = TempDir::new().unwrap();
        let (_store, engine) = memory_engine(temp_dir.path(), 2);

        let err = engine.get("backups/c/h/none/manifest.json").await.unwrap_err();
        assert!(matches!(err, AgentError::ObjectStore(_)));
    }

    #[tokio::test]
    async fn test_get_rejects_escaping_paths() {
        let temp_dir = TempDir::new().unwrap();
        let (store, engine) = memory_engine(temp_dir.path(), 2);
        let mut manifest = Manifest::new(NAME, "backups/c/h/evil");
        manifest.paths = vec!["../outside".to_string()];
        store
            .put(
                &ObjectPath::from("bucket-root/backups/c/h/evil/manifest.json"),
                manifest.to_json().unwrap().into(),
            )
            .await
            .unwrap();

        let err = engine.get("backups/c/h/evil/manifest.json").await.unwrap_err();
        assert!(matches!(err, AgentError::Validation(_)));
    }

    #[test]
    fn test_table_path_drops_snapshot_suffix() {
        let (_store, engine) = memory_engine(Path::new("/data"), 1);
        assert_eq!(
            engine
                .table_path(Path::new("/data/ks1/t1/snapshots/2024"), "2024")
                .unwrap(),
            "ks1/t1"
        );
        assert!(engine.table_path(Path::new("/elsewhere/ks1/t1"), "2024").is_err());
    }

    #[test]
    fn test_from_config_memory_and_bad_url() {
        let mut config = StoreConfig {
            url: "memory://".to_string(),
            prefix: "cassandra-backups".to_string(),
            max_parallel: 0,
            strict: false,
        };
        let engine = TransferEngine::from_config(&config, Path::new("/data")).unwrap();
        assert_eq!(engine.max_parallel, 1);

        config.url = "not a url".to_string();
        let err = TransferEngine::from_config(&config, Path::new("/data")).err().unwrap();
        assert!(matches!(err, AgentError::Config(_)));
    }
}
