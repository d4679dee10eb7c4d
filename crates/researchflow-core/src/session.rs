//! Session records for finished and in-flight runs, plus the stores that keep them.

use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File, OpenOptions, create_dir_all};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

use crate::redaction::sanitize_text;
use crate::workflow::ResearchReport;

const SESSIONS_FILE: &str = "sessions.jsonl";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Processing,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Processing => "processing",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub query: String,
    pub status: SessionStatus,
    #[serde(default)]
    pub research_data: String,
    #[serde(default)]
    pub verified_facts: String,
    #[serde(default)]
    pub final_report: String,
    #[serde(default)]
    pub iterations: u32,
    #[serde(default)]
    pub fact_check_iterations: u32,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub processing_time_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub redactions: Vec<String>,
}

impl SessionRecord {
    pub fn processing(id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            query: query.into(),
            status: SessionStatus::Processing,
            research_data: String::new(),
            verified_facts: String::new(),
            final_report: String::new(),
            iterations: 0,
            fact_check_iterations: 0,
            error: None,
            processing_time_ms: None,
            created_at: Utc::now(),
            completed_at: None,
            redactions: Vec::new(),
        }
    }

    pub fn complete(&mut self, report: &ResearchReport, processing_time_ms: u64) {
        self.status = SessionStatus::Completed;
        self.research_data = report.research_data.clone();
        self.verified_facts = report.verified_facts.clone();
        self.final_report = report.final_report.clone();
        self.iterations = report.iterations;
        self.fact_check_iterations = report.fact_check_iterations;
        self.processing_time_ms = Some(processing_time_ms);
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: impl Into<String>, processing_time_ms: u64) {
        self.status = SessionStatus::Failed;
        self.error = Some(error.into());
        self.processing_time_ms = Some(processing_time_ms);
        self.completed_at = Some(Utc::now());
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            query: self.query.clone(),
            status: self.status,
            created_at: self.created_at,
            processing_time_ms: self.processing_time_ms,
        }
    }

    /// Copy with credential-looking text masked in every free-form field.
    fn redacted(&self) -> Self {
        let mut redactions = BTreeSet::new();
        let mut record = self.clone();
        record.query = sanitize_text(&self.query, &mut redactions);
        record.research_data = sanitize_text(&self.research_data, &mut redactions);
        record.verified_facts = sanitize_text(&self.verified_facts, &mut redactions);
        record.final_report = sanitize_text(&self.final_report, &mut redactions);
        record.error = self
            .error
            .as_deref()
            .map(|error| sanitize_text(error, &mut redactions));
        record.redactions = redactions.into_iter().collect();
        record
    }
}

/// Listing entry returned by [`SessionStore::history`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub query: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub processing_time_ms: Option<u64>,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert or replace the record with `record.id`.
    async fn save(&self, record: &SessionRecord) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<SessionRecord>>;

    /// Newest first.
    async fn history(&self, skip: usize, limit: usize) -> Result<Vec<SessionSummary>>;

    /// Returns whether anything was removed.
    async fn delete(&self, id: &str) -> Result<bool>;
}

fn page(mut records: Vec<SessionRecord>, skip: usize, limit: usize) -> Vec<SessionSummary> {
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    records
        .iter()
        .skip(skip)
        .take(limit)
        .map(SessionRecord::summary)
        .collect()
}

#[derive(Default)]
pub struct InMemorySessionStore {
    records: DashMap<String, SessionRecord>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn save(&self, record: &SessionRecord) -> Result<()> {
        self.records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<SessionRecord>> {
        Ok(self.records.get(id).map(|entry| entry.value().clone()))
    }

    async fn history(&self, skip: usize, limit: usize) -> Result<Vec<SessionSummary>> {
        let records = self
            .records
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        Ok(page(records, skip, limit))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.records.remove(id).is_some())
    }
}

/// Append-only JSONL file; the last line for an id is its current state.
pub struct JsonlSessionStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlSessionStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(SESSIONS_FILE),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Path) -> Result<T> + Send + 'static,
    {
        let _guard = self.lock.lock().await;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || op(&path))
            .await
            .context("session file task failed")?
    }
}

fn load_latest(path: &Path) -> Result<Vec<SessionRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(path)
        .with_context(|| format!("failed to open session file {}", path.display()))?;

    let mut order = Vec::new();
    let mut latest: HashMap<String, SessionRecord> = HashMap::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<SessionRecord>(&line) {
            Ok(record) => {
                if !latest.contains_key(&record.id) {
                    order.push(record.id.clone());
                }
                latest.insert(record.id.clone(), record);
            }
            Err(err) => {
                warn!(line = idx + 1, error = %err, "skipping unreadable session line");
            }
        }
    }

    Ok(order
        .into_iter()
        .filter_map(|id| latest.remove(&id))
        .collect())
}

fn append_json_line<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)
            .with_context(|| format!("failed to create session directory {}", parent.display()))?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open session file {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    let line = serde_json::to_string(value)?;
    writeln!(writer, "{line}")
        .with_context(|| format!("failed to append session to {}", path.display()))?;
    writer.flush()?;
    Ok(())
}

fn rewrite_jsonl_without(path: &Path, id: &str) -> Result<bool> {
    if !path.exists() {
        return Ok(false);
    }

    let file = File::open(path)
        .with_context(|| format!("failed to open session file {}", path.display()))?;
    let mut retained = Vec::new();
    let mut removed = false;
    for line in BufReader::new(file).lines() {
        let line = line?;
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&line) {
            if value.get("id").and_then(|v| v.as_str()) == Some(id) {
                removed = true;
                continue;
            }
        }
        retained.push(line);
    }

    if removed {
        if retained.is_empty() {
            fs::remove_file(path)
                .with_context(|| format!("failed to remove session file {}", path.display()))?;
            return Ok(true);
        }
        let file = File::create(path)
            .with_context(|| format!("failed to rewrite session file {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        for line in retained {
            writeln!(writer, "{line}")?;
        }
        writer.flush()?;
    }

    Ok(removed)
}

#[async_trait]
impl SessionStore for JsonlSessionStore {
    async fn save(&self, record: &SessionRecord) -> Result<()> {
        let redacted = record.redacted();
        if !redacted.redactions.is_empty() {
            warn!(
                session_id = %record.id,
                fields = ?redacted.redactions,
                "redacted potential secrets from session record"
            );
        }
        self.blocking(move |path| append_json_line(path, &redacted))
            .await
    }

    async fn get(&self, id: &str) -> Result<Option<SessionRecord>> {
        let records = self.blocking(load_latest).await?;
        Ok(records.into_iter().find(|record| record.id == id))
    }

    async fn history(&self, skip: usize, limit: usize) -> Result<Vec<SessionSummary>> {
        let records = self.blocking(load_latest).await?;
        Ok(page(records, skip, limit))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.blocking(move |path| rewrite_jsonl_without(path, &id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn report() -> ResearchReport {
        ResearchReport {
            research_data: "research".into(),
            verified_facts: "facts".into(),
            final_report: "# Research Report: X".into(),
            iterations: 2,
            fact_check_iterations: 1,
            success: true,
        }
    }

    fn record_at(id: &str, minutes_ago: i64) -> SessionRecord {
        let mut record = SessionRecord::processing(id, format!("query {id}"));
        record.created_at = Utc::now() - Duration::minutes(minutes_ago);
        record
    }

    #[tokio::test]
    async fn in_memory_history_is_newest_first() {
        let store = InMemorySessionStore::new();
        store.save(&record_at("old", 10)).await.unwrap();
        store.save(&record_at("new", 1)).await.unwrap();
        store.save(&record_at("mid", 5)).await.unwrap();

        let ids: Vec<String> = store
            .history(0, 10)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec!["new", "mid", "old"]);

        let paged = store.history(1, 1).await.unwrap();
        assert_eq!(paged[0].id, "mid");

        assert!(store.delete("mid").await.unwrap());
        assert!(!store.delete("mid").await.unwrap());
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn jsonl_latest_line_wins_and_delete_rewrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlSessionStore::new(dir.path());

        let mut first = record_at("s1", 3);
        store.save(&first).await.unwrap();
        first.complete(&report(), 1200);
        store.save(&first).await.unwrap();
        store.save(&record_at("s2", 1)).await.unwrap();

        let loaded = store.get("s1").await.unwrap().unwrap();
        assert_eq!(loaded.status, SessionStatus::Completed);
        assert_eq!(loaded.processing_time_ms, Some(1200));
        assert_eq!(loaded.iterations, 2);

        let history = store.history(0, 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, "s2");

        assert!(store.delete("s1").await.unwrap());
        assert!(store.get("s1").await.unwrap().is_none());
        assert_eq!(store.history(0, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn jsonl_records_are_redacted_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlSessionStore::new(dir.path());

        let mut record = record_at("s1", 0);
        record.fail("provider failure: HTTP 401 api_key=abcd1234", 50);
        store.save(&record).await.unwrap();

        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(!raw.contains("abcd1234"));

        let loaded = store.get("s1").await.unwrap().unwrap();
        assert_eq!(loaded.status, SessionStatus::Failed);
        assert_eq!(loaded.redactions, vec!["api_key".to_string()]);
    }

    #[tokio::test]
    async fn deleting_the_last_session_removes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlSessionStore::new(dir.path());
        store.save(&record_at("only", 0)).await.unwrap();
        assert!(store.path().exists());

        assert!(store.delete("only").await.unwrap());
        assert!(!store.path().exists());
        assert!(store.history(0, 10).await.unwrap().is_empty());
        assert!(!store.delete("only").await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_saves_keep_every_line() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(JsonlSessionStore::new(dir.path()));

        let mut handles = Vec::new();
        for idx in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.save(&record_at(&format!("s{idx}"), idx)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.history(0, 100).await.unwrap().len(), 16);
    }

    #[tokio::test]
    async fn missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlSessionStore::new(dir.path().join("nested"));
        assert!(store.history(0, 5).await.unwrap().is_empty());
        assert!(!store.delete("nope").await.unwrap());
    }
}
