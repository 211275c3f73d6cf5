//! Embedded persistence for model versions, metrics and predictions.
//!
//! A [`Database`] is either purely in-memory or backed by a directory that
//! several processes may share (a running server and CLI commands):
//!
//! ```text
//! {dir}/model_versions.json   full snapshot, replaced atomically on commit
//! {dir}/metrics.jsonl         append-only
//! {dir}/predictions.jsonl     append-only
//! {dir}/.lock                 held exclusively for the life of a transaction
//! ```
//!
//! All writes go through a [`Transaction`]. A transaction holds the in-process
//! lock and the directory lock from [`Database::begin`] until it is committed
//! or dropped, and starts from a fresh read of the files, so transitions made
//! by another process are never overwritten. Dropping without
//! [`Transaction::commit`] discards every staged change.
//!
//! In-memory state is a cache of the files. Reads pick up changes written by
//! other processes; JSONL files are tailed from the last complete line seen.

use crate::error::{ChurnError, Result};
use crate::types::{Metric, ModelStatus, ModelVersion, Prediction};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

const VERSIONS_FILE: &str = "model_versions.json";
const METRICS_FILE: &str = "metrics.jsonl";
const PREDICTIONS_FILE: &str = "predictions.jsonl";
const LOCK_FILE: &str = ".lock";

/// Predictions kept in memory for queries; older rows live only on disk.
const PREDICTION_TAIL: usize = 10_000;

/// Identity of the versions snapshot last read from disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    len: u64,
    modified: Option<SystemTime>,
    inode: u64,
}

impl FileStamp {
    fn of(meta: &std::fs::Metadata) -> Self {
        #[cfg(unix)]
        let inode = std::os::unix::fs::MetadataExt::ino(meta);
        #[cfg(not(unix))]
        let inode = 0;

        Self {
            len: meta.len(),
            modified: meta.modified().ok(),
            inode,
        }
    }
}

#[derive(Debug)]
struct State {
    versions: Vec<ModelVersion>,
    versions_stamp: Option<FileStamp>,
    metrics: Vec<Metric>,
    metrics_offset: u64,
    predictions: VecDeque<Prediction>,
    predictions_offset: u64,
    prediction_count: u64,
    next_metric_id: u64,
    next_prediction_id: u64,
}

impl Default for State {
    fn default() -> Self {
        Self {
            versions: Vec::new(),
            versions_stamp: None,
            metrics: Vec::new(),
            metrics_offset: 0,
            predictions: VecDeque::new(),
            predictions_offset: 0,
            prediction_count: 0,
            next_metric_id: 1,
            next_prediction_id: 1,
        }
    }
}

impl State {
    /// Brings the cache up to date with `dir`. The versions snapshot is
    /// re-read when `force` is set or its stamp changed.
    async fn refresh(&mut self, dir: &Path, force: bool) -> Result<()> {
        let path = dir.join(VERSIONS_FILE);
        match tokio::fs::metadata(&path).await {
            Ok(meta) => {
                let stamp = FileStamp::of(&meta);
                if force || self.versions_stamp != Some(stamp) {
                    let bytes = tokio::fs::read(&path).await?;
                    self.versions = serde_json::from_slice(&bytes)?;
                    self.versions_stamp = Some(stamp);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.versions.clear();
                self.versions_stamp = None;
            }
            Err(e) => return Err(e.into()),
        }

        let metrics: Vec<Metric> = tail_jsonl(&dir.join(METRICS_FILE), &mut self.metrics_offset).await?;
        if let Some(max) = metrics.iter().map(|m| m.id).max() {
            self.next_metric_id = self.next_metric_id.max(max + 1);
        }
        self.metrics.extend(metrics);

        let predictions: Vec<Prediction> =
            tail_jsonl(&dir.join(PREDICTIONS_FILE), &mut self.predictions_offset).await?;
        if let Some(max) = predictions.iter().map(|p| p.id).max() {
            self.next_prediction_id = self.next_prediction_id.max(max + 1);
        }
        self.prediction_count += predictions.len() as u64;
        self.predictions.extend(predictions);
        self.trim_predictions();
        Ok(())
    }

    fn trim_predictions(&mut self) {
        while self.predictions.len() > PREDICTION_TAIL {
            self.predictions.pop_front();
        }
    }
}

/// Database statistics
#[derive(Debug, Default)]
pub struct DatabaseStats {
    pub commits: AtomicU64,
    pub rollbacks: AtomicU64,
}

/// Transactional store shared by the registry and the services.
#[derive(Clone)]
pub struct Database {
    state: Arc<Mutex<State>>,
    dir: Option<PathBuf>,
    stats: Arc<DatabaseStats>,
}

impl Database {
    /// Creates an empty database that lives only in memory.
    pub fn in_memory() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            dir: None,
            stats: Arc::new(DatabaseStats::default()),
        }
    }

    /// Opens (or creates) a directory-backed database.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;

        let mut state = State::default();
        state.refresh(&dir, true).await?;

        info!(
            dir = %dir.display(),
            versions = state.versions.len(),
            metrics = state.metrics.len(),
            predictions = state.prediction_count,
            "Opened database"
        );

        Ok(Self {
            state: Arc::new(Mutex::new(state)),
            dir: Some(dir),
            stats: Arc::new(DatabaseStats::default()),
        })
    }

    /// Opens the database at `dir`, or an in-memory one when `dir` is `None`.
    pub async fn connect(dir: Option<&Path>) -> Result<Self> {
        match dir {
            Some(dir) => Self::open(dir).await,
            None => Ok(Self::in_memory()),
        }
    }

    /// Starts an exclusive unit of work over the latest committed state.
    pub async fn begin(&self) -> Result<Transaction<'_>> {
        let mut guard = self.state.lock().await;
        let lock = match &self.dir {
            Some(dir) => {
                let lock = DirLock::acquire(dir).await?;
                guard.refresh(dir, true).await?;
                Some(lock)
            }
            None => None,
        };

        Ok(Transaction {
            versions: guard.versions.clone(),
            next_metric_id: guard.next_metric_id,
            next_prediction_id: guard.next_prediction_id,
            new_metrics: Vec::new(),
            new_predictions: Vec::new(),
            versions_dirty: false,
            committed: false,
            _lock: lock,
            guard,
            db: self,
        })
    }

    /// Locks the cache after picking up writes from other processes.
    async fn read(&self) -> MutexGuard<'_, State> {
        let mut guard = self.state.lock().await;
        if let Some(dir) = &self.dir {
            if let Err(e) = guard.refresh(dir, false).await {
                warn!(dir = %dir.display(), error = %e, "Failed to refresh database; serving cached state");
            }
        }
        guard
    }

    /// All versions, newest first.
    pub async fn list_versions(&self) -> Vec<ModelVersion> {
        let state = self.read().await;
        let mut versions = state.versions.clone();
        versions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        versions
    }

    pub async fn find_version(&self, version: &str) -> Option<ModelVersion> {
        let state = self.read().await;
        state.versions.iter().find(|v| v.version == version).cloned()
    }

    /// The newest version with the given status.
    pub async fn find_by_status(&self, status: ModelStatus) -> Option<ModelVersion> {
        let state = self.read().await;
        newest_with_status(&state.versions, status).cloned()
    }

    /// Metrics recorded for a version, in insertion order.
    pub async fn metrics_for(&self, version: &str) -> Vec<Metric> {
        let state = self.read().await;
        state
            .metrics
            .iter()
            .filter(|m| m.model_version == version)
            .cloned()
            .collect()
    }

    /// Most recent predictions, newest first.
    pub async fn recent_predictions(&self, limit: usize) -> Vec<Prediction> {
        let state = self.read().await;
        state.predictions.iter().rev().take(limit).cloned().collect()
    }

    /// Total predictions ever stored.
    pub async fn prediction_count(&self) -> u64 {
        self.read().await.prediction_count
    }

    /// Checks that the backing directory is still usable.
    pub async fn ping(&self) -> bool {
        match &self.dir {
            Some(dir) => tokio::fs::metadata(dir).await.map(|m| m.is_dir()).unwrap_or(false),
            None => true,
        }
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn stats(&self) -> (u64, u64) {
        (
            self.stats.commits.load(Ordering::Relaxed),
            self.stats.rollbacks.load(Ordering::Relaxed),
        )
    }
}

/// Exclusive lock on `{dir}/.lock`, shared by every process using the
/// directory. Released when dropped.
struct DirLock {
    _file: std::fs::File,
}

impl DirLock {
    async fn acquire(dir: &Path) -> Result<Self> {
        let path = dir.join(LOCK_FILE);
        tokio::task::spawn_blocking(move || -> Result<DirLock> {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .open(&path)?;
            lock_exclusive(&file)?;
            Ok(DirLock { _file: file })
        })
        .await
        .map_err(|e| ChurnError::Internal(format!("lock task failed: {}", e)))?
    }
}

#[cfg(unix)]
fn lock_exclusive(file: &std::fs::File) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;

    loop {
        if unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) } == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        if err.kind() != std::io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

#[cfg(not(unix))]
fn lock_exclusive(_file: &std::fs::File) -> std::io::Result<()> {
    Ok(())
}

fn newest_with_status(versions: &[ModelVersion], status: ModelStatus) -> Option<&ModelVersion> {
    versions
        .iter()
        .filter(|v| v.status == status)
        .max_by_key(|v| v.created_at)
}

/// Reads complete lines past `offset` and advances it. A trailing partial
/// line is left for the next call; malformed lines are skipped.
async fn tail_jsonl<T: serde::de::DeserializeOwned>(
    path: &Path,
    offset: &mut u64,
) -> Result<Vec<T>> {
    let mut file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let meta = file.metadata().await?;
    if !meta.is_file() {
        warn!(path = %path.display(), "Not a regular file; skipping");
        return Ok(Vec::new());
    }
    let len = meta.len();
    if len <= *offset {
        return Ok(Vec::new());
    }

    file.seek(SeekFrom::Start(*offset)).await?;
    let mut buf = Vec::with_capacity((len - *offset) as usize);
    file.take(len - *offset).read_to_end(&mut buf).await?;

    let Some(end) = buf.iter().rposition(|b| *b == b'\n') else {
        return Ok(Vec::new());
    };
    *offset += end as u64 + 1;

    let mut rows = Vec::new();
    for line in buf[..end].split(|b| *b == b'\n') {
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match serde_json::from_slice(line) {
            Ok(row) => rows.push(row),
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping malformed row"),
        }
    }
    Ok(rows)
}

async fn append_jsonl<T: serde::Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)
        .await?;

    // Start on a fresh line if an earlier append was cut short.
    let mut buf = Vec::new();
    let len = file.metadata().await?.len();
    if len > 0 {
        let mut last = [0u8; 1];
        file.seek(SeekFrom::Start(len - 1)).await?;
        file.read_exact(&mut last).await?;
        if last[0] != b'\n' {
            buf.push(b'\n');
        }
    }

    for row in rows {
        serde_json::to_writer(&mut buf, row)?;
        buf.push(b'\n');
    }
    file.write_all(&buf).await?;
    file.flush().await?;
    Ok(())
}

/// An exclusive unit of work over a [`Database`].
///
/// Reads see the transaction's own staged writes. Nothing is visible to other
/// callers until [`commit`](Transaction::commit) succeeds.
pub struct Transaction<'a> {
    _lock: Option<DirLock>,
    guard: MutexGuard<'a, State>,
    db: &'a Database,
    versions: Vec<ModelVersion>,
    new_metrics: Vec<Metric>,
    new_predictions: Vec<Prediction>,
    next_metric_id: u64,
    next_prediction_id: u64,
    versions_dirty: bool,
    committed: bool,
}

impl<'a> Transaction<'a> {
    pub fn versions(&self) -> &[ModelVersion] {
        &self.versions
    }

    pub fn find_version(&self, version: &str) -> Option<&ModelVersion> {
        self.versions.iter().find(|v| v.version == version)
    }

    pub fn find_by_status(&self, status: ModelStatus) -> Option<&ModelVersion> {
        newest_with_status(&self.versions, status)
    }

    /// Latest `created_at` across all versions.
    pub fn latest_created_at(&self) -> Option<DateTime<Utc>> {
        self.versions.iter().map(|v| v.created_at).max()
    }

    pub fn insert_version(&mut self, version: ModelVersion) -> Result<()> {
        if self.find_version(&version.version).is_some() {
            return Err(ChurnError::AlreadyExists(format!(
                "model version {}",
                version.version
            )));
        }
        self.versions.push(version);
        self.versions_dirty = true;
        Ok(())
    }

    /// Sets the status and traffic of one version.
    pub fn update_status(
        &mut self,
        version: &str,
        status: ModelStatus,
        traffic_percent: u8,
    ) -> Result<()> {
        let entry = self
            .versions
            .iter_mut()
            .find(|v| v.version == version)
            .ok_or_else(|| ChurnError::VersionNotFound(version.to_string()))?;
        entry.status = status;
        entry.traffic_percent = traffic_percent;
        self.versions_dirty = true;
        Ok(())
    }

    /// Moves every version in `from` (other than `except`) to `to`, setting
    /// its traffic to 0. Returns the affected versions.
    pub fn update_status_where(
        &mut self,
        from: ModelStatus,
        to: ModelStatus,
        except: Option<&str>,
    ) -> Vec<String> {
        let mut changed = Vec::new();
        for v in self.versions.iter_mut() {
            if v.status == from && Some(v.version.as_str()) != except {
                v.status = to;
                v.traffic_percent = 0;
                changed.push(v.version.clone());
            }
        }
        if !changed.is_empty() {
            self.versions_dirty = true;
        }
        changed
    }

    pub fn insert_metric(
        &mut self,
        model_version: &str,
        metric_name: &str,
        metric_value: f64,
        metadata: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> u64 {
        let id = self.next_metric_id;
        self.next_metric_id += 1;
        self.new_metrics.push(Metric {
            id,
            model_version: model_version.to_string(),
            metric_name: metric_name.to_string(),
            metric_value,
            timestamp: Utc::now(),
            metadata,
        });
        id
    }

    /// Stages a prediction, assigning its id.
    pub fn insert_prediction(&mut self, mut prediction: Prediction) -> u64 {
        let id = self.next_prediction_id;
        self.next_prediction_id += 1;
        prediction.id = id;
        self.new_predictions.push(prediction);
        id
    }

    /// Persists staged writes and publishes them.
    ///
    /// On disk the appends go first and the versions snapshot is replaced
    /// last, so a failed commit never leaves a version change behind. The
    /// cache is then rebuilt from the files.
    pub async fn commit(mut self) -> Result<()> {
        let db = self.db;
        match &db.dir {
            Some(dir) => {
                append_jsonl(&dir.join(METRICS_FILE), &self.new_metrics).await?;
                append_jsonl(&dir.join(PREDICTIONS_FILE), &self.new_predictions).await?;
                if self.versions_dirty {
                    let path = dir.join(VERSIONS_FILE);
                    let tmp = path.with_extension("json.tmp");
                    tokio::fs::write(&tmp, serde_json::to_vec_pretty(&self.versions)?).await?;
                    tokio::fs::rename(&tmp, &path).await?;
                }

                if let Err(e) = self.guard.refresh(dir, true).await {
                    warn!(error = %e, "Committed, but failed to refresh the cache");
                }
            }
            None => {
                let versions = std::mem::take(&mut self.versions);
                let metrics = std::mem::take(&mut self.new_metrics);
                let predictions = std::mem::take(&mut self.new_predictions);

                let state = &mut *self.guard;
                if self.versions_dirty {
                    state.versions = versions;
                }
                state.metrics.extend(metrics);
                state.prediction_count += predictions.len() as u64;
                state.predictions.extend(predictions);
                state.trim_predictions();
                state.next_metric_id = self.next_metric_id;
                state.next_prediction_id = self.next_prediction_id;
            }
        }

        self.committed = true;
        self.db.stats.commits.fetch_add(1, Ordering::Relaxed);
        debug!("Transaction committed");
        Ok(())
    }

    /// Discards staged writes.
    pub fn rollback(self) {}
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.db.stats.rollbacks.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ModelType;
    use std::collections::HashMap;

    fn version(name: &str, status: ModelStatus) -> ModelVersion {
        ModelVersion {
            version: name.to_string(),
            model_type: ModelType::RandomForest,
            status,
            traffic_percent: 100,
            artifact_ref: format!("run-{}", name),
            created_at: Utc::now(),
            performance_metrics: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_commit_publishes_writes() {
        let db = Database::in_memory();
        let mut tx = db.begin().await.unwrap();
        tx.insert_version(version("v1", ModelStatus::Active)).unwrap();
        tx.insert_metric("v1", "accuracy", 0.9, None);
        tx.commit().await.unwrap();

        assert_eq!(db.list_versions().await.len(), 1);
        assert_eq!(db.metrics_for("v1").await[0].metric_value, 0.9);
        assert_eq!(db.stats(), (1, 0));
    }

    #[tokio::test]
    async fn test_drop_rolls_back() {
        let db = Database::in_memory();
        {
            let mut tx = db.begin().await.unwrap();
            tx.insert_version(version("v1", ModelStatus::Active)).unwrap();
            assert!(tx.find_version("v1").is_some());
        }
        assert!(db.list_versions().await.is_empty());
        assert_eq!(db.stats(), (0, 1));
    }

    #[tokio::test]
    async fn test_duplicate_version_rejected() {
        let db = Database::in_memory();
        let mut tx = db.begin().await.unwrap();
        tx.insert_version(version("v1", ModelStatus::Active)).unwrap();
        assert!(matches!(
            tx.insert_version(version("v1", ModelStatus::Canary)),
            Err(ChurnError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_bulk_status_update() {
        let db = Database::in_memory();
        let mut tx = db.begin().await.unwrap();
        tx.insert_version(version("v1", ModelStatus::Canary)).unwrap();
        tx.insert_version(version("v2", ModelStatus::Canary)).unwrap();
        let changed = tx.update_status_where(ModelStatus::Canary, ModelStatus::Deprecated, Some("v2"));
        assert_eq!(changed, vec!["v1".to_string()]);
        assert_eq!(tx.find_version("v1").unwrap().traffic_percent, 0);
        tx.commit().await.unwrap();

        assert_eq!(
            db.find_by_status(ModelStatus::Canary).await.unwrap().version,
            "v2"
        );
    }

    #[tokio::test]
    async fn test_reopen_restores_state() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = Database::open(dir.path()).await.unwrap();
            let mut tx = db.begin().await.unwrap();
            tx.insert_version(version("v1", ModelStatus::Active)).unwrap();
            tx.insert_metric("v1", "roc_auc", 0.8, None);
            tx.insert_prediction(Prediction {
                id: 0,
                customer_id: "CUST_1".into(),
                prediction: 1,
                probability: 0.7,
                model_version: "v1".into(),
                features: serde_json::json!({"age": 30}),
                timestamp: Utc::now(),
                is_churn: None,
            });
            tx.commit().await.unwrap();
        }

        let db = Database::open(dir.path()).await.unwrap();
        assert_eq!(db.find_version("v1").await.unwrap().status, ModelStatus::Active);
        assert_eq!(db.metrics_for("v1").await.len(), 1);
        assert_eq!(db.prediction_count().await, 1);

        let mut tx = db.begin().await.unwrap();
        let id = tx.insert_metric("v1", "f1_score", 0.5, None);
        assert_eq!(id, 2);
    }

    #[tokio::test]
    async fn test_transactions_are_exclusive() {
        let db = Database::in_memory();
        let tx = db.begin().await.unwrap();

        let db2 = db.clone();
        let pending = tokio::spawn(async move {
            let mut tx = db2.begin().await.unwrap();
            tx.insert_version(version("v2", ModelStatus::Active)).unwrap();
            tx.commit().await.unwrap();
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!pending.is_finished());
        drop(tx);

        pending.await.unwrap();
        assert_eq!(db.list_versions().await.len(), 1);
    }

    fn prediction(customer_id: &str) -> Prediction {
        Prediction {
            id: 0,
            customer_id: customer_id.into(),
            prediction: 0,
            probability: 0.2,
            model_version: "v1".into(),
            features: serde_json::json!({}),
            timestamp: Utc::now(),
            is_churn: None,
        }
    }

    #[tokio::test]
    async fn test_handles_on_one_directory_see_each_other() {
        let dir = tempfile::tempdir().unwrap();
        let server = Database::open(dir.path()).await.unwrap();
        let cli = Database::open(dir.path()).await.unwrap();

        let mut tx = cli.begin().await.unwrap();
        tx.insert_version(version("v1", ModelStatus::Active)).unwrap();
        tx.insert_metric("v1", "accuracy", 0.9, None);
        tx.commit().await.unwrap();

        assert_eq!(
            server.find_by_status(ModelStatus::Active).await.unwrap().version,
            "v1"
        );
        assert_eq!(server.metrics_for("v1").await.len(), 1);

        // The server's next write starts from the CLI's state.
        let mut tx = server.begin().await.unwrap();
        assert!(tx.find_version("v1").is_some());
        let id = tx.insert_metric("v1", "roc_auc", 0.8, None);
        assert_eq!(id, 2);
        tx.insert_version(version("v2", ModelStatus::Canary)).unwrap();
        tx.commit().await.unwrap();

        assert_eq!(cli.list_versions().await.len(), 2);
        assert_eq!(cli.metrics_for("v1").await.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_append_leaves_versions_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path()).await.unwrap();
        tokio::fs::create_dir(dir.path().join(METRICS_FILE)).await.unwrap();

        let mut tx = db.begin().await.unwrap();
        tx.insert_version(version("v1", ModelStatus::Active)).unwrap();
        tx.insert_metric("v1", "accuracy", 0.9, None);
        tx.insert_prediction(prediction("CUST_1"));
        assert!(tx.commit().await.is_err());

        assert!(db.find_version("v1").await.is_none());
        assert!(Database::open(dir.path()).await.unwrap().find_version("v1").await.is_none());
        assert_eq!(db.stats(), (0, 1));

        tokio::fs::remove_dir(dir.path().join(METRICS_FILE)).await.unwrap();
        let mut tx = db.begin().await.unwrap();
        tx.insert_version(version("v1", ModelStatus::Active)).unwrap();
        assert_eq!(tx.insert_metric("v1", "accuracy", 0.9, None), 1);
        tx.commit().await.unwrap();
        assert_eq!(db.find_version("v1").await.unwrap().status, ModelStatus::Active);
    }

    #[tokio::test]
    async fn test_truncated_row_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = Database::open(dir.path()).await.unwrap();
            let mut tx = db.begin().await.unwrap();
            tx.insert_prediction(prediction("CUST_1"));
            tx.commit().await.unwrap();
        }

        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(dir.path().join(PREDICTIONS_FILE))
            .await
            .unwrap();
        file.write_all(b"{\"id\": 2, \"customer_").await.unwrap();
        drop(file);

        let db = Database::open(dir.path()).await.unwrap();
        assert_eq!(db.prediction_count().await, 1);

        let mut tx = db.begin().await.unwrap();
        assert_eq!(tx.insert_prediction(prediction("CUST_2")), 2);
        tx.commit().await.unwrap();
        assert_eq!(db.prediction_count().await, 2);

        let reopened = Database::open(dir.path()).await.unwrap();
        let recent = reopened.recent_predictions(5).await;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].customer_id, "CUST_2");
    }
}
