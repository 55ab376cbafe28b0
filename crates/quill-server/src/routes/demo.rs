use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DemoResponse {
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Public endpoint for watching the shared demo quota run out.
pub async fn demo() -> Json<DemoResponse> {
    Json(DemoResponse {
        message: "Request allowed".to_string(),
        timestamp: Utc::now(),
    })
}
