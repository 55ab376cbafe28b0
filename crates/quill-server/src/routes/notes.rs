use axum::{
    extract::{
        rejection::{PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use quill_core::journal::{EntrySource, NoteRow};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::{
    error::ApiError,
    field::FieldCodec,
    middleware::{AuthUser, Validate, ValidatedJson},
    state::AppState,
};

pub const MAX_NOTE_CHARS: usize = 10_000;

#[derive(Debug, Deserialize)]
pub struct CreateNote {
    pub content: String,
    #[serde(default)]
    pub source: EntrySource,
}

#[derive(Debug, Deserialize)]
pub struct UpdateNote {
    pub content: String,
}

fn validate_content(content: &str) -> Result<(), String> {
    if content.trim().is_empty() {
        return Err("content must not be empty".to_string());
    }
    if content.chars().count() > MAX_NOTE_CHARS {
        return Err(format!("content exceeds {MAX_NOTE_CHARS} characters"));
    }
    Ok(())
}

impl Validate for CreateNote {
    fn validate(&self) -> Result<(), String> {
        validate_content(&self.content)
    }
}

impl Validate for UpdateNote {
    fn validate(&self) -> Result<(), String> {
        validate_content(&self.content)
    }
}

/// Half-open creation range `[from, to)`.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// Note as returned to its owner, with content decrypted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NoteView {
    pub id: Uuid,
    pub content: String,
    pub source: EntrySource,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NoteView {
    fn open(row: NoteRow, fields: &FieldCodec) -> Result<Self, ApiError> {
        Ok(Self {
            id: row.id,
            content: fields.decrypt_field(&row.content)?,
            source: row.source,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[instrument(skip_all, fields(user = %user))]
pub async fn create(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ValidatedJson(body): ValidatedJson<CreateNote>,
) -> Result<(StatusCode, Json<NoteView>), ApiError> {
    let envelope = state.fields.encrypt_field(&body.content)?;
    let row = state
        .notes
        .insert(NoteRow::new(user, envelope, body.source))
        .await?;
    debug!(note = %row.id, "note created");

    let view = NoteView {
        id: row.id,
        content: body.content,
        source: row.source,
        created_at: row.created_at,
        updated_at: row.updated_at,
    };
    Ok((StatusCode::CREATED, Json(view)))
}

#[instrument(skip_all, fields(user = %user))]
pub async fn list(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<Vec<NoteView>>, ApiError> {
    let Query(range) = query.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    if let (Some(from), Some(to)) = (range.from, range.to) {
        if from >= to {
            return Err(ApiError::BadRequest("`from` must be before `to`".to_string()));
        }
    }

    let rows = state.notes.list(&user, range.from, range.to).await?;
    let notes = rows
        .into_iter()
        .map(|row| NoteView::open(row, &state.fields))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(notes))
}

#[instrument(skip_all, fields(user = %user))]
pub async fn update(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    path: Result<Path<Uuid>, PathRejection>,
    ValidatedJson(body): ValidatedJson<UpdateNote>,
) -> Result<Json<NoteView>, ApiError> {
    let Path(id) = path.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    let envelope = state.fields.encrypt_field(&body.content)?;
    let row = state.notes.update_content(&user, id, envelope).await?;
    debug!(note = %row.id, "note updated");

    Ok(Json(NoteView {
        id: row.id,
        content: body.content,
        source: row.source,
        created_at: row.created_at,
        updated_at: row.updated_at,
    }))
}

#[instrument(skip_all, fields(user = %user))]
pub async fn remove(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    let Path(id) = path.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    state.notes.delete(&user, id).await?;
    debug!(note = %id, "note deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_rules() {
        assert!(validate_content("Today was good").is_ok());
        assert!(validate_content(" \n\t").is_err());
        assert!(validate_content(&"é".repeat(MAX_NOTE_CHARS)).is_ok());
        assert!(validate_content(&"a".repeat(MAX_NOTE_CHARS + 1)).is_err());
    }
}
