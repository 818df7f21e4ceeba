use anyhow::{Context, Result, anyhow};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const TEMP_PREFIX: &str = "tmp-";
const ENTRY_EXTENSION: &str = "bin";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub fn as_header(&self) -> &'static str {
        match self {
            Self::Hit => "HIT",
            Self::Miss => "MISS",
        }
    }
}

/// Flat-directory artifact cache with per-key single-flight generation.
///
/// Writers always go through temp-file-then-rename, so readers never lock.
/// Expired artifacts are ignored on read and removed by [`WallCache::purge_expired`];
/// a purge racing a regeneration can at worst delete a fresh artifact, which
/// costs one extra regeneration and never exposes a partial file.
#[derive(Clone)]
pub struct WallCache {
    dir: PathBuf,
    ttl: Duration,
    locks: KeyedLocks,
}

/// Lazily created per-key mutexes. Entries live as long as the registry.
#[derive(Clone, Default)]
pub struct KeyedLocks {
    inner: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        self.inner
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.len()
    }
}

impl WallCache {
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> Result<Self> {
        let dir = dir.into();
        if dir.as_os_str().is_empty() {
            return Err(anyhow!("cache directory cannot be empty"));
        }
        if ttl.is_zero() {
            return Err(anyhow!("cache ttl must be greater than zero"));
        }
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create cache dir {}", dir.display()))?;
        Ok(Self {
            dir,
            ttl,
            locks: KeyedLocks::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(entry_file_name(key))
    }

    /// Reads a fresh, non-empty artifact for `key`.
    pub async fn get(&self, key: &str, ttl: Duration) -> Result<Option<Vec<u8>>> {
        let path = self.entry_path(key);
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(anyhow!(err).context("stat cache entry")),
        };
        if metadata.len() == 0 {
            debug!(path = %path.display(), "ignoring empty cache entry");
            return Ok(None);
        }
        let modified = metadata.modified().context("cache entry mtime")?;
        if is_expired(modified, ttl) {
            debug!(path = %path.display(), "cache entry expired");
            return Ok(None);
        }
        match tokio::fs::read(&path).await {
            Ok(bytes) if !bytes.is_empty() => Ok(Some(bytes)),
            Ok(_) => Ok(None),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(anyhow!(err).context("read cache entry")),
        }
    }

    /// Returns the cached bytes for `key`, running `generator` at most once per
    /// key at a time when nothing fresh is on disk. Generator failures are
    /// returned as-is and never stored.
    ///
    /// Generation and the store run on a spawned task holding the key lock, so
    /// a caller that goes away does not abort work other callers wait on.
    pub async fn get_or_create<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        generator: F,
    ) -> Result<(Vec<u8>, CacheStatus)>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Vec<u8>>> + Send + 'static,
    {
        if let Some(bytes) = self.get(key, ttl).await? {
            return Ok((bytes, CacheStatus::Hit));
        }

        let cache = self.clone();
        let key = key.to_string();
        tokio::spawn(async move { cache.fill(&key, ttl, generator).await })
            .await
            .context("cache fill task")?
    }

    async fn fill<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        generator: F,
    ) -> Result<(Vec<u8>, CacheStatus)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<u8>>>,
    {
        let lock = self.locks.lock_for(key);
        let _guard = lock.lock().await;

        if let Some(bytes) = self.get(key, ttl).await? {
            debug!(key, "cache filled while waiting for generation lock");
            return Ok((bytes, CacheStatus::Hit));
        }

        let bytes = generator().await?;
        self.store(key, &bytes).await?;
        info!(key, size = bytes.len(), "cache entry regenerated");
        Ok((bytes, CacheStatus::Miss))
    }

    /// Writes `bytes` as the artifact for `key` via fsynced temp file + rename.
    pub async fn store(&self, key: &str, bytes: &[u8]) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .context("ensure cache dir")?;
        let final_path = self.entry_path(key);
        let temp_path = self.dir.join(temp_file_name(key));
        if let Err(err) = write_synced(&temp_path, bytes).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(err);
        }
        if let Err(err) = tokio::fs::rename(&temp_path, &final_path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(anyhow!(err).context("rename cache temp file"));
        }
        Ok(())
    }

    /// Removes every file in the cache directory older than the TTL, including
    /// temp files abandoned by a crashed writer. Returns the number removed.
    pub async fn purge_expired(&self) -> Result<usize> {
        let dir = self.dir.clone();
        let ttl = self.ttl;
        tokio::task::spawn_blocking(move || purge_dir(&dir, ttl))
            .await
            .context("purge cache task")?
    }

    pub async fn purge_loop(self, interval: Duration) {
        loop {
            tokio::time::sleep(interval).await;
            match self.purge_expired().await {
                Ok(0) => {}
                Ok(removed) => info!(removed, "purged expired cache entries"),
                Err(err) => warn!(error = ?err, "cache purge error"),
            }
        }
    }
}

async fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
        .context("create cache temp file")?;
    file.write_all(bytes)
        .await
        .context("write cache temp file")?;
    file.sync_all().await.context("sync cache temp file")?;
    drop(file);
    Ok(())
}

fn purge_dir(dir: &Path, ttl: Duration) -> Result<usize> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(anyhow!(err).context("read cache dir")),
    };
    let mut removed = 0usize;
    for entry in entries {
        let Ok(entry) = entry else { continue };
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        if !metadata.is_file() {
            continue;
        }
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        if is_expired(modified, ttl) && std::fs::remove_file(entry.path()).is_ok() {
            removed += 1;
        }
    }
    Ok(removed)
}

pub fn entry_file_name(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    format!("{}.{ENTRY_EXTENSION}", hex::encode(&digest[..16]))
}

fn temp_file_name(key: &str) -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let nonce = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_nanos())
        .unwrap_or(0);
    let sequence = COUNTER.fetch_add(1, Ordering::Relaxed);
    let digest = Sha256::digest(key.as_bytes());
    format!(
        "{TEMP_PREFIX}{}-{}-{nonce}-{sequence}",
        hex::encode(&digest[..8]),
        std::process::id()
    )
}

fn is_expired(modified: SystemTime, ttl: Duration) -> bool {
    if let Ok(age) = SystemTime::now().duration_since(modified) {
        age > ttl
    } else {
        false
    }
}
