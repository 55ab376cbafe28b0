//! Journal rows and the row-store contracts the API persists them through.
//!
//! The `content` columns hold whatever the caller hands in; the API layer
//! always hands in an encrypted envelope, so stores never see plaintext.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{auth::UserId, summary::SummaryKind};

/// How an entry was captured.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntrySource {
    #[default]
    Text,
    Voice,
}

/// Stored diary entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NoteRow {
    pub id: Uuid,
    pub user_id: UserId,
    /// Encrypted envelope.
    pub content: String,
    pub source: EntrySource,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NoteRow {
    pub fn new(user_id: UserId, content: String, source: EntrySource) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            content,
            source,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Stored AI summary; `content` is the envelope of the JSON-encoded summary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SummaryRow {
    pub id: Uuid,
    pub user_id: UserId,
    pub kind: SummaryKind,
    pub period_start: NaiveDate,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl SummaryRow {
    pub fn new(user_id: UserId, kind: SummaryKind, period_start: NaiveDate, content: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            kind,
            period_start,
            content,
            created_at: Utc::now(),
        }
    }
}

/// Errors produced by row stores.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RowStoreError {
    /// No row with this id for this user.
    #[error("row not found: {id}")]
    NotFound { id: Uuid },
    /// Underlying storage failure.
    #[error("storage failure: {reason}")]
    Storage { reason: String },
}

/// Note persistence, always scoped by owner.
#[async_trait]
pub trait NoteStore: Send + Sync {
    async fn insert(&self, row: NoteRow) -> Result<NoteRow, RowStoreError>;

    /// Notes created in `[from, to)`, oldest first. Open bounds are unbounded.
    async fn list(
        &self,
        user: &UserId,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<NoteRow>, RowStoreError>;

    async fn get(&self, user: &UserId, id: Uuid) -> Result<NoteRow, RowStoreError>;

    /// Replace the content column wholesale and bump `updated_at`.
    async fn update_content(
        &self,
        user: &UserId,
        id: Uuid,
        content: String,
    ) -> Result<NoteRow, RowStoreError>;

    async fn delete(&self, user: &UserId, id: Uuid) -> Result<(), RowStoreError>;
}

/// Summary persistence; one row per user, kind and period.
#[async_trait]
pub trait SummaryStore: Send + Sync {
    /// Insert, replacing any existing row for the same user/kind/period.
    async fn upsert(&self, row: SummaryRow) -> Result<SummaryRow, RowStoreError>;

    /// Newest period first.
    async fn list_summaries(
        &self,
        user: &UserId,
        kind: Option<SummaryKind>,
    ) -> Result<Vec<SummaryRow>, RowStoreError>;
}

/// In-memory row store implementing both contracts, for tests and local runs.
#[derive(Debug, Default, Clone)]
pub struct InMemoryJournalStore {
    notes: Arc<Mutex<HashMap<Uuid, NoteRow>>>,
    summaries: Arc<Mutex<Vec<SummaryRow>>>,
}

impl InMemoryJournalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<E: std::fmt::Display>(err: E) -> RowStoreError {
    RowStoreError::Storage {
        reason: format!("lock poisoned: {err}"),
    }
}

#[async_trait]
impl NoteStore for InMemoryJournalStore {
    async fn insert(&self, row: NoteRow) -> Result<NoteRow, RowStoreError> {
        let mut map = self.notes.lock().map_err(poisoned)?;
        map.insert(row.id, row.clone());
        Ok(row)
    }

    async fn list(
        &self,
        user: &UserId,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<NoteRow>, RowStoreError> {
        let map = self.notes.lock().map_err(poisoned)?;
        let mut rows: Vec<NoteRow> = map
            .values()
            .filter(|row| &row.user_id == user)
            .filter(|row| from.is_none_or(|from| row.created_at >= from))
            .filter(|row| to.is_none_or(|to| row.created_at < to))
            .cloned()
            .collect();
        rows.sort_by_key(|row| row.created_at);
        Ok(rows)
    }

    async fn get(&self, user: &UserId, id: Uuid) -> Result<NoteRow, RowStoreError> {
        let map = self.notes.lock().map_err(poisoned)?;
        map.get(&id)
            .filter(|row| &row.user_id == user)
            .cloned()
            .ok_or(RowStoreError::NotFound { id })
    }

    async fn update_content(
        &self,
        user: &UserId,
        id: Uuid,
        content: String,
    ) -> Result<NoteRow, RowStoreError> {
        let mut map = self.notes.lock().map_err(poisoned)?;
        let row = map
            .get_mut(&id)
            .filter(|row| &row.user_id == user)
            .ok_or(RowStoreError::NotFound { id })?;
        row.content = content;
        row.updated_at = Utc::now();
        Ok(row.clone())
    }

    async fn delete(&self, user: &UserId, id: Uuid) -> Result<(), RowStoreError> {
        let mut map = self.notes.lock().map_err(poisoned)?;
        match map.get(&id) {
            Some(row) if &row.user_id == user => {
                map.remove(&id);
                Ok(())
            }
            _ => Err(RowStoreError::NotFound { id }),
        }
    }
}

#[async_trait]
impl SummaryStore for InMemoryJournalStore {
    async fn upsert(&self, row: SummaryRow) -> Result<SummaryRow, RowStoreError> {
        let mut rows = self.summaries.lock().map_err(poisoned)?;
        rows.retain(|existing| {
            !(existing.user_id == row.user_id
                && existing.kind == row.kind
                && existing.period_start == row.period_start)
        });
        rows.push(row.clone());
        Ok(row)
    }

    async fn list_summaries(
        &self,
        user: &UserId,
        kind: Option<SummaryKind>,
    ) -> Result<Vec<SummaryRow>, RowStoreError> {
        let rows = self.summaries.lock().map_err(poisoned)?;
        let mut out: Vec<SummaryRow> = rows
            .iter()
            .filter(|row| &row.user_id == user)
            .filter(|row| kind.is_none_or(|kind| row.kind == kind))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.period_start.cmp(&a.period_start));
        Ok(out)
    }
}
