//! Long-running operation tracking
//!
//! Operation tokens are persisted in an [`OperationStore`] keyed by operation
//! id, so a reconcile pass that is interrupted (or a process that restarts)
//! resumes polling the same operation instead of issuing the initiating call
//! again. The tracker itself holds no per-operation state.

use crate::client::ResourceClient;
use crate::context::CallContext;
use crate::error::{CloudError, Result, ResultExt};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;

const TABLE_VERSION: u32 = 1;
const OPERATIONS_FILE: &str = "operations.json";
const OPERATIONS_BACKUP: &str = "operations.json.backup";
const OPERATIONS_TEMP: &str = "operations.json.tmp";

/// Opaque handle for an in-flight long-running operation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationToken(String);

impl OperationToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Status reported by the remote for one operation
#[derive(Debug, Clone, PartialEq)]
pub enum OperationStatus {
    InProgress,
    Succeeded(Option<serde_json::Value>),
    Failed(String),
}

/// Non-terminal or successful result of a single poll
///
/// Terminal failure is reported as [`CloudError::OperationFailed`].
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Pending,
    Succeeded(Option<serde_json::Value>),
}

impl PollOutcome {
    pub fn is_pending(&self) -> bool {
        matches!(self, PollOutcome::Pending)
    }
}

/// Persisted record of an operation started by this engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRecord {
    /// Owner key, e.g. a resource key
    pub id: String,

    /// What the operation does (for operators)
    pub kind: String,

    pub token: OperationToken,

    pub started_at: DateTime<Utc>,
}

impl OperationRecord {
    pub fn new(id: impl Into<String>, kind: impl Into<String>, token: OperationToken) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            token,
            started_at: Utc::now(),
        }
    }
}

/// Table of persisted operation records
#[async_trait]
pub trait OperationStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<OperationRecord>>;

    async fn put(&self, record: OperationRecord) -> Result<()>;

    async fn remove(&self, id: &str) -> Result<Option<OperationRecord>>;

    async fn list(&self) -> Result<Vec<OperationRecord>>;
}

/// Process-local store, for tests and embedding
#[derive(Debug, Default)]
pub struct MemoryOperationStore {
    records: Mutex<HashMap<String, OperationRecord>>,
}

impl MemoryOperationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OperationStore for MemoryOperationStore {
    async fn get(&self, id: &str) -> Result<Option<OperationRecord>> {
        Ok(self.records.lock().await.get(id).cloned())
    }

    async fn put(&self, record: OperationRecord) -> Result<()> {
        self.records.lock().await.insert(record.id.clone(), record);
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<Option<OperationRecord>> {
        Ok(self.records.lock().await.remove(id))
    }

    async fn list(&self) -> Result<Vec<OperationRecord>> {
        let mut records: Vec<_> = self.records.lock().await.values().cloned().collect();
        records.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(records)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct OperationTable {
    version: u32,
    updated_at: DateTime<Utc>,
    operations: HashMap<String, OperationRecord>,
}

impl Default for OperationTable {
    fn default() -> Self {
        Self {
            version: TABLE_VERSION,
            updated_at: Utc::now(),
            operations: HashMap::new(),
        }
    }
}

/// JSON file store under a state directory (`<dir>/operations.json`)
///
/// Assumes a single writer; the orchestrator serializes passes.
pub struct FileOperationStore {
    state_dir: PathBuf,
}

impl FileOperationStore {
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            state_dir: state_dir.as_ref().to_path_buf(),
        }
    }

    fn table_path(&self) -> PathBuf {
        self.state_dir.join(OPERATIONS_FILE)
    }

    fn backup_path(&self) -> PathBuf {
        self.state_dir.join(OPERATIONS_BACKUP)
    }

    fn temp_path(&self) -> PathBuf {
        self.state_dir.join(OPERATIONS_TEMP)
    }

    async fn load(&self) -> Result<OperationTable> {
        let path = self.table_path();
        if !path.exists() {
            return Ok(OperationTable::default());
        }

        let content = fs::read_to_string(&path).await?;
        let table: OperationTable = serde_json::from_str(&content)?;

        if table.version > TABLE_VERSION {
            return Err(CloudError::Permanent(format!(
                "operation table version {} is newer than supported version {}",
                table.version, TABLE_VERSION
            )));
        }

        Ok(table)
    }

    async fn save(&self, table: &mut OperationTable) -> Result<()> {
        if !self.state_dir.exists() {
            fs::create_dir_all(&self.state_dir).await?;
            tracing::debug!("Created state directory: {}", self.state_dir.display());
        }

        table.updated_at = Utc::now();
        let content = serde_json::to_string_pretty(table)?;

        // Live table is replaced only by rename
        let path = self.table_path();
        let temp = self.temp_path();
        fs::write(&temp, content).await?;
        if path.exists() {
            fs::copy(&path, self.backup_path()).await?;
        }
        fs::rename(&temp, &path).await?;

        tracing::debug!("Saved {} operation records", table.operations.len());
        Ok(())
    }
}

#[async_trait]
impl OperationStore for FileOperationStore {
    async fn get(&self, id: &str) -> Result<Option<OperationRecord>> {
        Ok(self.load().await?.operations.remove(id))
    }

    async fn put(&self, record: OperationRecord) -> Result<()> {
        let mut table = self.load().await?;
        table.operations.insert(record.id.clone(), record);
        self.save(&mut table).await
    }

    async fn remove(&self, id: &str) -> Result<Option<OperationRecord>> {
        let mut table = self.load().await?;
        let removed = table.operations.remove(id);
        if removed.is_some() {
            self.save(&mut table).await?;
        }
        Ok(removed)
    }

    async fn list(&self) -> Result<Vec<OperationRecord>> {
        let mut records: Vec<_> = self.load().await?.operations.into_values().collect();
        records.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(records)
    }
}

/// Starts, records and polls long-running operations
pub struct OperationTracker<C> {
    client: Arc<C>,
    store: Arc<dyn OperationStore>,
}

impl<C> Clone for OperationTracker<C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            store: Arc::clone(&self.store),
        }
    }
}

impl<C: ResourceClient> OperationTracker<C> {
    pub fn new(client: Arc<C>, store: Arc<dyn OperationStore>) -> Self {
        Self { client, store }
    }

    pub fn store(&self) -> &Arc<dyn OperationStore> {
        &self.store
    }

    /// Start an operation unless one is already recorded for `id`
    ///
    /// When a record exists its token is returned and `initiate` is not
    /// called, so an interrupted pass never issues the initiating call twice.
    pub async fn start<F, Fut>(
        &self,
        ctx: &CallContext,
        id: &str,
        kind: &str,
        initiate: F,
    ) -> Result<OperationToken>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<OperationToken>> + Send,
    {
        if let Some(record) = self.store.get(id).await? {
            tracing::debug!(operation = id, token = %record.token, "resuming recorded operation");
            return Ok(record.token);
        }

        let token = ctx
            .run(initiate())
            .await
            .with_context(|| format!("cannot start {} operation for {}", kind, id))?;
        self.track(id, kind, token.clone()).await?;
        Ok(token)
    }

    /// Record a token handed out by some other call
    pub async fn track(&self, id: &str, kind: &str, token: OperationToken) -> Result<()> {
        tracing::debug!(operation = id, token = %token, "recording operation");
        self.store
            .put(OperationRecord::new(id, kind, token))
            .await
            .with_context(|| format!("cannot persist operation for {}", id))
    }

    /// Recorded operation for `id`, if any
    pub async fn pending(&self, id: &str) -> Result<Option<OperationRecord>> {
        self.store.get(id).await
    }

    /// One non-blocking status check for `token`
    pub async fn poll(&self, ctx: &CallContext, token: &OperationToken) -> Result<PollOutcome> {
        let status = ctx
            .run(self.client.operation_status(token))
            .await
            .map_err(|e| match e {
                CloudError::NotFound(_) => CloudError::OperationNotFound(token.to_string()),
                other => other,
            })?;

        match status {
            OperationStatus::InProgress => Ok(PollOutcome::Pending),
            OperationStatus::Succeeded(result) => Ok(PollOutcome::Succeeded(result)),
            OperationStatus::Failed(message) => Err(CloudError::OperationFailed {
                token: token.to_string(),
                message,
            }),
        }
    }

    /// Poll the recorded operation for `id` and clear it once terminal
    ///
    /// Returns `Ok(None)` when nothing is recorded. The record is removed on
    /// success, on terminal failure and when the remote no longer knows the
    /// token; it is kept when the poll itself fails transiently or is
    /// interrupted.
    pub async fn settle(&self, ctx: &CallContext, id: &str) -> Result<Option<PollOutcome>> {
        let Some(record) = self.store.get(id).await? else {
            return Ok(None);
        };

        match self.poll(ctx, &record.token).await {
            Ok(PollOutcome::Pending) => Ok(Some(PollOutcome::Pending)),
            Ok(outcome) => {
                self.store.remove(id).await?;
                Ok(Some(outcome))
            }
            Err(e) => {
                if matches!(
                    e,
                    CloudError::OperationFailed { .. } | CloudError::OperationNotFound(_)
                ) {
                    tracing::warn!(operation = id, error = %e, "clearing terminal operation");
                    // A record left behind is cleared by the next settle
                    if let Err(remove_err) = self.store.remove(id).await {
                        tracing::warn!(
                            operation = id,
                            error = %remove_err,
                            "failed to clear terminal operation"
                        );
                    }
                }
                Err(e)
            }
        }
    }
}
