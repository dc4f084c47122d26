use crate::db::{self, FeedbackRecord, NewFeedback};
use crate::error::AppError;
use crate::state::SharedState;
use crate::web::session::{AdminSession, UserSession};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::SecondsFormat;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

const ADMIN_LIST_LIMIT: i64 = 200;
const CSV_HEADER: &str =
    "id,user_id,session_id,felt_real,helpful_feedback,score_fair,issues,would_use_again,note,created_at";
const WOULD_USE_AGAIN: [&str; 3] = ["yes", "maybe", "no"];

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", post(create_feedback))
        .route("/admin", get(list_feedback))
        .route("/admin.csv", get(list_feedback_csv))
        .with_state(state)
}

/// First present, non-null value among `keys`.
fn first_of<'a>(body: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| body.get(*key))
        .find(|value| !value.is_null())
}

/// First present, non-empty string among `keys`.
fn first_text(body: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| body.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

fn rating(body: &Value, name: &str, aliases: &[&str]) -> Result<i16, AppError> {
    let value = first_of(body, aliases)
        .ok_or_else(|| AppError::Validation(format!("Missing field: {name}")))?;
    value
        .as_i64()
        .filter(|n| (1..=5).contains(n))
        .map(|n| n as i16)
        .ok_or_else(|| AppError::Validation(format!("{name} must be 1-5")))
}

/// Builds a feedback row from a request body, accepting legacy field names.
pub fn parse_feedback(user_id: Uuid, body: &Value) -> Result<NewFeedback, AppError> {
    let felt_real = rating(body, "realistic", &["realistic", "feltReal", "realism"])?;
    let helpful_feedback = rating(body, "helpful", &["helpful", "helpfulFeedback", "helpfulness"])?;
    let score_fair = rating(body, "scoringFair", &["scoringFair", "scoreFair", "fairness"])?;

    let would_use_again = first_text(body, &["wouldUseAgain", "would_use_again"]);
    if let Some(answer) = &would_use_again {
        if !WOULD_USE_AGAIN.contains(&answer.as_str()) {
            return Err(AppError::Validation("wouldUseAgain must be yes|maybe|no".to_string()));
        }
    }

    let session_id = first_text(body, &["sessionId", "session_id"])
        .map(|raw| {
            Uuid::parse_str(&raw)
                .map_err(|_| AppError::Validation("sessionId must be a UUID".to_string()))
        })
        .transpose()?;

    let issues = body
        .get("issues")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Ok(NewFeedback {
        user_id,
        session_id,
        felt_real,
        helpful_feedback,
        score_fair,
        issues,
        would_use_again,
        note: first_text(body, &["notes", "note"]),
    })
}

fn quoted(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

/// CSV export, one line per entry under [`CSV_HEADER`].
pub fn feedback_csv(records: &[FeedbackRecord]) -> String {
    let rows = records.iter().map(|r| {
        [
            r.id.to_string(),
            r.user_id.to_string(),
            r.session_id.map(|id| id.to_string()).unwrap_or_default(),
            r.felt_real.to_string(),
            r.helpful_feedback.to_string(),
            r.score_fair.to_string(),
            quoted(&r.issues.join(";")),
            r.would_use_again.clone().unwrap_or_default(),
            quoted(r.note.as_deref().unwrap_or_default()),
            r.created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        ]
        .join(",")
    });
    std::iter::once(CSV_HEADER.to_string())
        .chain(rows)
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FeedbackCreated {
    ok: bool,
    feedback_id: Uuid,
}

async fn create_feedback(
    UserSession { user_id, .. }: UserSession,
    State(state): State<SharedState>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<FeedbackCreated>), AppError> {
    let feedback = parse_feedback(user_id, &body)?;
    let feedback_id = db::insert_feedback(&state.pool, &feedback).await?;
    tracing::info!("Feedback {} saved for user {}", feedback_id, user_id);
    Ok((
        StatusCode::CREATED,
        Json(FeedbackCreated {
            ok: true,
            feedback_id,
        }),
    ))
}

#[derive(Serialize)]
struct FeedbackList {
    feedback: Vec<FeedbackRecord>,
}

async fn list_feedback(
    AdminSession(admin_id): AdminSession,
    State(state): State<SharedState>,
) -> Result<Json<FeedbackList>, AppError> {
    let feedback = db::list_feedback(&state.pool, ADMIN_LIST_LIMIT).await?;
    tracing::info!("Admin {} listed {} feedback entries", admin_id, feedback.len());
    Ok(Json(FeedbackList { feedback }))
}

async fn list_feedback_csv(
    AdminSession(admin_id): AdminSession,
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, AppError> {
    let records = db::list_feedback(&state.pool, ADMIN_LIST_LIMIT).await?;
    tracing::info!("Admin {} exported {} feedback entries", admin_id, records.len());
    Ok(([(header::CONTENT_TYPE, "text/csv")], feedback_csv(&records)))
}
