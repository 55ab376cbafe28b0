use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Datelike, Days, NaiveDate, NaiveTime, Utc};
use quill_core::{
    journal::SummaryRow,
    observability::ReportContext,
    summary::{Summary, SummaryKind, SummaryRequest},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::{AuthUser, Validate, ValidatedJson},
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct GenerateSummary {
    pub kind: SummaryKind,
    /// Defaults to today; weekly periods snap back to Monday.
    pub period_start: Option<NaiveDate>,
}

impl Validate for GenerateSummary {
    fn validate(&self) -> Result<(), String> {
        match self.period_start {
            Some(start) if start > Utc::now().date_naive() => {
                Err("period_start must not be in the future".to_string())
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SummaryQuery {
    pub kind: Option<SummaryKind>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SummaryView {
    pub id: Uuid,
    pub kind: SummaryKind,
    pub period_start: NaiveDate,
    #[serde(flatten)]
    pub summary: Summary,
    pub created_at: DateTime<Utc>,
}

/// First day of the period containing `day`.
pub fn period_anchor(kind: SummaryKind, day: NaiveDate) -> NaiveDate {
    match kind {
        SummaryKind::Daily => day,
        SummaryKind::Weekly => day
            .checked_sub_days(Days::new(u64::from(day.weekday().num_days_from_monday())))
            .unwrap_or(day),
    }
}

/// `[start, end)` in UTC for a period beginning on `start`.
fn period_bounds(kind: SummaryKind, start: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let from = start.and_time(NaiveTime::MIN).and_utc();
    let to = from + chrono::Duration::days(kind.days());
    (from, to)
}

#[instrument(skip_all, fields(user = %user, kind = ?body.kind))]
pub async fn generate(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ValidatedJson(body): ValidatedJson<GenerateSummary>,
) -> Result<(StatusCode, Json<SummaryView>), ApiError> {
    let kind = body.kind;
    let start = period_anchor(kind, body.period_start.unwrap_or_else(|| Utc::now().date_naive()));
    let (from, to) = period_bounds(kind, start);

    let rows = state.notes.list(&user, Some(from), Some(to)).await?;
    if rows.is_empty() {
        return Err(ApiError::BadRequest("No entries for this period".to_string()));
    }
    let entries = rows
        .iter()
        .map(|row| state.fields.decrypt_field(&row.content))
        .collect::<Result<Vec<_>, _>>()?;
    debug!(entries = entries.len(), summarizer = state.summarizer.name(), "summarizing");

    let summary = state
        .summarizer
        .summarize(SummaryRequest {
            kind,
            period_start: start,
            entries,
        })
        .await
        .map_err(|err| {
            let source: &(dyn std::error::Error + 'static) = err.as_ref();
            state.reporter.capture_exception(
                source,
                &ReportContext::operation("generate_summary")
                    .tag("summarizer", state.summarizer.name()),
            );
            ApiError::Summary
        })?;

    let envelope = state.fields.encrypt_json_field(&summary)?;
    let row = state
        .summaries
        .upsert(SummaryRow::new(user, kind, start, envelope))
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(SummaryView {
            id: row.id,
            kind: row.kind,
            period_start: row.period_start,
            summary,
            created_at: row.created_at,
        }),
    ))
}

#[instrument(skip_all, fields(user = %user))]
pub async fn list(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    query: Result<Query<SummaryQuery>, QueryRejection>,
) -> Result<Json<Vec<SummaryView>>, ApiError> {
    let Query(filter) = query.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    let rows = state.summaries.list_summaries(&user, filter.kind).await?;
    let views = rows
        .into_iter()
        .map(|row| {
            Ok(SummaryView {
                summary: state.fields.decrypt_json_field(&row.content)?,
                id: row.id,
                kind: row.kind,
                period_start: row.period_start,
                created_at: row.created_at,
            })
        })
        .collect::<Result<Vec<_>, ApiError>>()?;
    Ok(Json(views))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("date")
    }

    #[test]
    fn weekly_periods_start_on_monday() {
        // 2025-04-10 is a Thursday.
        assert_eq!(period_anchor(SummaryKind::Weekly, date(2025, 4, 10)), date(2025, 4, 7));
        assert_eq!(period_anchor(SummaryKind::Weekly, date(2025, 4, 7)), date(2025, 4, 7));
        assert_eq!(period_anchor(SummaryKind::Daily, date(2025, 4, 10)), date(2025, 4, 10));
    }

    #[test]
    fn bounds_cover_whole_days() {
        let (from, to) = period_bounds(SummaryKind::Weekly, date(2025, 4, 7));
        assert_eq!(from.to_rfc3339(), "2025-04-07T00:00:00+00:00");
        assert_eq!(to.to_rfc3339(), "2025-04-14T00:00:00+00:00");
    }

    #[test]
    fn future_periods_are_rejected() {
        let tomorrow = Utc::now().date_naive() + Days::new(1);
        let body = GenerateSummary {
            kind: SummaryKind::Daily,
            period_start: Some(tomorrow),
        };
        assert!(body.validate().is_err());
    }
}
