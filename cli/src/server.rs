use std::sync::{Arc, Mutex};

use anyhow::Context;
use axum::{
    Extension, Json, Router,
    extract::{Path, Query, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
};
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;

use journal_core::auth;
use journal_core::db::Database;
use journal_core::models::{
    BackupData, NewEntry, NewHabit, NewNote, OverwriteOptions, UpdateNote, validate_mood,
    validate_note_type,
};

const BODY_LIMIT: usize = 50 * 1024 * 1024; // 50 MB

#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Database>>,
    jwt_secret: Arc<String>,
}

/// Authenticated caller, attached by `require_auth` from the token claims.
#[derive(Clone)]
struct AuthUser {
    id: i64,
    username: String,
}

// --- Request / Response types ---

#[derive(Deserialize)]
struct CredentialsRequest {
    username: Option<String>,
    password: Option<String>,
}

#[derive(Deserialize)]
struct SaveEntryRequest {
    date: Option<String>,
    content: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    mood: Option<i64>,
}

#[derive(Deserialize)]
struct SearchQuery {
    q: Option<String>,
    tags: Option<String>,
}

#[derive(Deserialize)]
struct CreateHabitRequest {
    name: Option<String>,
    icon: Option<String>,
    color: Option<String>,
    category: Option<String>,
    frequency_days: Option<Vec<i64>>,
    target_count: Option<i64>,
}

#[derive(Deserialize)]
struct ToggleHabitRequest {
    date: Option<String>,
}

#[derive(Deserialize)]
struct HistoryQuery {
    days: Option<i64>,
}

#[derive(Deserialize)]
struct InsightsQuery {
    range: Option<String>,
}

#[derive(Deserialize)]
struct CreateNoteRequest {
    content: Option<String>,
    #[serde(default)]
    title: String,
    color: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(rename = "type")]
    note_type: Option<String>,
}

#[derive(Deserialize)]
struct UpdateNoteRequest {
    content: Option<String>,
    title: Option<String>,
    color: Option<String>,
    tags: Option<Vec<String>>,
    #[serde(rename = "type")]
    note_type: Option<String>,
}

#[derive(Deserialize)]
struct ReorderNotesRequest {
    #[serde(rename = "noteIds")]
    note_ids: Option<Vec<i64>>,
}

#[derive(Deserialize)]
struct ImportCheckRequest {
    data: Option<BackupData>,
}

#[derive(Deserialize)]
struct ImportExecuteRequest {
    data: Option<BackupData>,
    #[serde(rename = "overwriteOptions", default)]
    overwrite_options: OverwriteOptions,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// --- Error handling ---

enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            Self::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::Conflict(msg) => (StatusCode::CONFLICT, msg),
            Self::Internal(err) => {
                eprintln!("Internal server error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

fn parse_date_param(date: &str) -> Result<NaiveDate, ApiError> {
    journal_core::models::parse_date(date).map_err(|e| ApiError::BadRequest(format!("{e}")))
}

// --- Middleware ---

/// Missing token is 401; a token that fails validation is 403.
async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let Some(token) = token else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse {
                error: "Access token required".to_string(),
            }),
        )
            .into_response();
    };

    match auth::verify_token(&state.jwt_secret, token) {
        Ok(claims) => {
            request.extensions_mut().insert(AuthUser {
                id: claims.id,
                username: claims.username,
            });
            next.run(request).await
        }
        Err(_) => (
            StatusCode::FORBIDDEN,
            Json(ErrorResponse {
                error: "Invalid or expired token".to_string(),
            }),
        )
            .into_response(),
    }
}

/// Layered inside `require_auth`, so the extension is always present.
async fn admin_only(request: Request, next: Next) -> Response {
    let is_admin = request
        .extensions()
        .get::<AuthUser>()
        .is_some_and(|user| user.username == "admin");
    if is_admin {
        next.run(request).await
    } else {
        (
            StatusCode::FORBIDDEN,
            Json(ErrorResponse {
                error: "Admin access required".to_string(),
            }),
        )
            .into_response()
    }
}

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}

// --- Auth handlers ---

async fn root() -> &'static str {
    "Journal App Backend is Running!"
}

async fn register(
    State(state): State<AppState>,
    Json(req): Json<CredentialsRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let username = req
        .username
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Username and password required".to_string()))?;
    let password = req
        .password
        .ok_or_else(|| ApiError::BadRequest("Username and password required".to_string()))?;
    if password.len() < 4 {
        return Err(ApiError::BadRequest(
            "Password must be at least 4 characters".to_string(),
        ));
    }

    let password_hash = auth::hash_password(&password)?;

    let db = state
        .db
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    if db.get_user_by_username(&username)?.is_some() {
        return Err(ApiError::Conflict("Username already exists".to_string()));
    }
    let user = db
        .create_user(&username, &password_hash)
        .context("failed to create user")?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "message": "User created successfully",
            "userId": user.id,
        })),
    ))
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<CredentialsRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let username = req
        .username
        .ok_or_else(|| ApiError::BadRequest("Username and password required".to_string()))?;
    let password = req
        .password
        .ok_or_else(|| ApiError::BadRequest("Username and password required".to_string()))?;

    let user = {
        let db = state
            .db
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        db.get_user_by_username(&username)?
    };
    let Some(user) = user else {
        return Err(ApiError::Unauthorized("Invalid credentials".to_string()));
    };
    if !auth::verify_password(&password, &user.password_hash)? {
        return Err(ApiError::Unauthorized("Invalid credentials".to_string()));
    }

    let token = auth::issue_token(&state.jwt_secret, user.id, &user.username)?;
    Ok(Json(serde_json::json!({
        "token": token,
        "user": { "id": user.id, "username": user.username },
    })))
}

async fn profile(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let db = state
        .db
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let user = db
        .get_user_by_id(auth_user.id)?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;
    let value = serde_json::to_value(user).context("failed to serialize user")?;
    Ok(Json(value))
}

// --- Entry handlers ---

async fn save_entry(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<SaveEntryRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let date_str = req
        .date
        .ok_or_else(|| ApiError::BadRequest("Date and content required".to_string()))?;
    let content = req
        .content
        .ok_or_else(|| ApiError::BadRequest("Date and content required".to_string()))?;
    let date = parse_date_param(&date_str)?;
    let mood = validate_mood(req.mood).map_err(|e| ApiError::BadRequest(format!("{e}")))?;

    let entry = {
        let db = state
            .db
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        db.upsert_entry(
            user.id,
            &NewEntry {
                date,
                content,
                tags: req.tags,
                mood,
            },
        )
        .context("failed to save entry")?
    };
    let value = serde_json::to_value(entry).context("failed to serialize entry")?;
    Ok(Json(value))
}

async fn get_entry(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(date): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let db = state
        .db
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let entry = db
        .get_entry(user.id, &date)?
        .ok_or_else(|| ApiError::NotFound("Entry not found".to_string()))?;
    let value = serde_json::to_value(entry).context("failed to serialize entry")?;
    Ok(Json(value))
}

async fn delete_entry(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(date): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let db = state
        .db
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    db.delete_entry(user.id, &date).context("database error")?;
    Ok(Json(serde_json::json!({ "message": "Entry deleted" })))
}

async fn list_entry_dates(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Vec<String>>, ApiError> {
    let db = state
        .db
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    Ok(Json(db.entry_dates(user.id).context("database error")?))
}

async fn list_all_entries(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let db = state
        .db
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let entries = db.list_entries(user.id).context("database error")?;
    let value = serde_json::to_value(entries).context("failed to serialize entries")?;
    Ok(Json(value))
}

async fn search_entries(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(params): Query<SearchQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let tags: Vec<String> = params
        .tags
        .as_deref()
        .unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();

    let db = state
        .db
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let entries = db
        .search_entries(user.id, params.q.as_deref(), &tags)
        .context("database error")?;
    let value = serde_json::to_value(entries).context("failed to serialize entries")?;
    Ok(Json(value))
}

async fn list_tags(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Vec<String>>, ApiError> {
    let db = state
        .db
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    Ok(Json(db.list_tags(user.id).context("database error")?))
}

async fn get_streak(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let today = Local::now().date_naive();
    let db = state
        .db
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let streak = db.entry_streak(user.id, today).context("database error")?;
    let value = serde_json::to_value(streak).context("failed to serialize streak")?;
    Ok(Json(value))
}

async fn get_stats(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let db = state
        .db
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let stats = db.entry_stats(user.id).context("database error")?;
    let value = serde_json::to_value(stats).context("failed to serialize stats")?;
    Ok(Json(value))
}

/// Journal-only export, distinct from the full backup at /api/data/export.
async fn export_entries(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let db = state
        .db
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let entries = db.list_entries(user.id).context("database error")?;
    Ok(Json(serde_json::json!({
        "exportDate": Local::now().to_rfc3339(),
        "totalEntries": entries.len(),
        "entries": entries,
    })))
}

// --- Habit handlers ---

async fn list_habits(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let today = Local::now().date_naive();
    let db = state
        .db
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let habits = db
        .list_habits_with_status(user.id, today)
        .context("database error")?;
    let value = serde_json::to_value(habits).context("failed to serialize habits")?;
    Ok(Json(value))
}

async fn create_habit(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<CreateHabitRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let name = req
        .name
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Habit name required".to_string()))?;

    let habit = {
        let db = state
            .db
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        db.create_habit(
            user.id,
            &NewHabit {
                name,
                icon: req.icon,
                color: req.color,
                category: req.category,
                frequency_days: req.frequency_days,
                target_count: req.target_count,
            },
        )
        .context("failed to create habit")?
    };
    let value = serde_json::to_value(habit).context("failed to serialize habit")?;
    Ok((StatusCode::CREATED, Json(value)))
}

async fn delete_habit(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let db = state
        .db
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    if db.delete_habit(user.id, id).context("database error")? {
        Ok(Json(serde_json::json!({ "message": "Habit deleted" })))
    } else {
        Err(ApiError::NotFound("Habit not found".to_string()))
    }
}

async fn toggle_habit(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
    Json(req): Json<ToggleHabitRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let date = match req.date.as_deref() {
        Some(d) => parse_date_param(d)?,
        None => Local::now().date_naive(),
    };

    let db = state
        .db
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let completed = db
        .toggle_habit(user.id, id, date)
        .context("database error")?
        .ok_or_else(|| ApiError::NotFound("Habit not found".to_string()))?;
    Ok(Json(serde_json::json!({ "completed": completed })))
}

async fn habit_history(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let days = params.days.unwrap_or(30);
    if days < 1 {
        return Err(ApiError::BadRequest("days must be at least 1".to_string()));
    }
    // Cap the window so date arithmetic stays in range.
    let days = days.min(365);
    let today = Local::now().date_naive();

    let db = state
        .db
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let history = db
        .habit_history(user.id, id, days, today)
        .context("database error")?
        .ok_or_else(|| ApiError::NotFound("Habit not found".to_string()))?;
    let value = serde_json::to_value(history).context("failed to serialize history")?;
    Ok(Json(value))
}

async fn habit_insights(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(params): Query<InsightsQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let range = journal_core::models::InsightRange::parse(params.range.as_deref().unwrap_or(""));
    let today = Local::now().date_naive();

    let db = state
        .db
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let insights = db
        .habit_insights(user.id, range, today)
        .context("database error")?;
    let value = serde_json::to_value(insights).context("failed to serialize insights")?;
    Ok(Json(value))
}

// --- Note handlers ---

async fn list_notes(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let db = state
        .db
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let notes = db.list_notes(user.id).context("database error")?;
    let value = serde_json::to_value(notes).context("failed to serialize notes")?;
    Ok(Json(value))
}

async fn create_note(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<CreateNoteRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let content = req
        .content
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Note content required".to_string()))?;
    let note_type = req
        .note_type
        .as_deref()
        .map(validate_note_type)
        .transpose()
        .map_err(|e| ApiError::BadRequest(format!("{e}")))?;

    let note = {
        let db = state
            .db
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        db.create_note(
            user.id,
            &NewNote {
                title: req.title,
                content,
                color: req.color,
                tags: req.tags,
                note_type,
            },
        )
        .context("failed to create note")?
    };
    let value = serde_json::to_value(note).context("failed to serialize note")?;
    Ok((StatusCode::CREATED, Json(value)))
}

async fn update_note(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateNoteRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let content = req
        .content
        .ok_or_else(|| ApiError::BadRequest("Note content required".to_string()))?;
    let note_type = req
        .note_type
        .as_deref()
        .map(validate_note_type)
        .transpose()
        .map_err(|e| ApiError::BadRequest(format!("{e}")))?;

    let db = state
        .db
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let note = db
        .update_note(
            user.id,
            id,
            &UpdateNote {
                content,
                title: req.title,
                color: req.color,
                tags: req.tags,
                note_type,
            },
        )
        .context("database error")?
        .ok_or_else(|| ApiError::NotFound("Note not found".to_string()))?;
    let value = serde_json::to_value(note).context("failed to serialize note")?;
    Ok(Json(value))
}

async fn reorder_notes(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<ReorderNotesRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let note_ids = req
        .note_ids
        .ok_or_else(|| ApiError::BadRequest("noteIds array required".to_string()))?;

    let db = state
        .db
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    db.reorder_notes(user.id, &note_ids)
        .context("database error")?;
    Ok(Json(serde_json::json!({ "message": "Notes reordered" })))
}

async fn delete_note(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let db = state
        .db
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    if db.delete_note(user.id, id).context("database error")? {
        Ok(Json(serde_json::json!({ "message": "Note deleted" })))
    } else {
        Err(ApiError::NotFound("Note not found".to_string()))
    }
}

async fn pin_note(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let db = state
        .db
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let pinned = db
        .toggle_pin(user.id, id)
        .context("database error")?
        .ok_or_else(|| ApiError::NotFound("Note not found".to_string()))?;
    Ok(Json(serde_json::json!({ "pinned": pinned })))
}

// --- Backup handlers ---

async fn export_data(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let db = state
        .db
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let backup = db.export_backup(user.id).context("database error")?;
    let value = serde_json::to_value(backup).context("failed to serialize backup")?;
    Ok(Json(value))
}

async fn import_check(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<ImportCheckRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let data = req
        .data
        .ok_or_else(|| ApiError::BadRequest("Import data required".to_string()))?;

    let db = state
        .db
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let conflicts = db
        .check_import_conflicts(user.id, &data)
        .context("database error")?;
    Ok(Json(serde_json::json!({ "conflicts": conflicts })))
}

async fn import_execute(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<ImportExecuteRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let data = req
        .data
        .ok_or_else(|| ApiError::BadRequest("Import data required".to_string()))?;

    let db = state
        .db
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let summary = db
        .import_backup(user.id, &data, req.overwrite_options)
        .context("import failed")?;
    Ok(Json(serde_json::json!({
        "message": "Import completed",
        "imported": summary,
    })))
}

// --- Admin handlers ---

async fn admin_stats(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let db = state
        .db
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let stats = db.system_stats().context("database error")?;
    let value = serde_json::to_value(stats).context("failed to serialize stats")?;
    Ok(Json(value))
}

async fn admin_users(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let db = state
        .db
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let users = db.list_users_admin().context("database error")?;
    let value = serde_json::to_value(users).context("failed to serialize users")?;
    Ok(Json(value))
}

async fn admin_delete_user(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if id == user.id {
        return Err(ApiError::BadRequest(
            "Cannot delete your own account".to_string(),
        ));
    }

    let db = state
        .db
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    if db.delete_user(id).context("database error")? {
        Ok(Json(serde_json::json!({ "message": "User deleted" })))
    } else {
        Err(ApiError::NotFound("User not found".to_string()))
    }
}

// --- Router ---

fn build_router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/api/admin/stats", get(admin_stats))
        .route("/api/admin/users", get(admin_users))
        .route("/api/admin/users/{id}", delete(admin_delete_user))
        .route_layer(middleware::from_fn(admin_only));

    let protected = Router::new()
        .route("/api/auth/profile", get(profile))
        .route("/api/entries", post(save_entry).put(save_entry))
        .route("/api/entries/all", get(list_all_entries))
        .route("/api/entries/dates", get(list_entry_dates))
        .route("/api/entries/{date}", get(get_entry).delete(delete_entry))
        .route("/api/search", get(search_entries))
        .route("/api/tags", get(list_tags))
        .route("/api/streak", get(get_streak))
        .route("/api/stats", get(get_stats))
        .route("/api/export", get(export_entries))
        .route("/api/habits", get(list_habits).post(create_habit))
        .route("/api/habits/insights", get(habit_insights))
        .route("/api/habits/{id}", delete(delete_habit))
        .route("/api/habits/{id}/toggle", post(toggle_habit))
        .route("/api/habits/{id}/history", get(habit_history))
        .route("/api/notes", get(list_notes).post(create_note))
        .route("/api/notes/reorder", put(reorder_notes))
        .route("/api/notes/{id}", put(update_note).delete(delete_note))
        .route("/api/notes/{id}/pin", post(pin_note))
        .route("/api/data/export", get(export_data))
        .route("/api/data/import/check", post(import_check))
        .route("/api/data/import/execute", post(import_execute))
        .merge(admin)
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/", get(root))
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .merge(protected)
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(CorsLayer::permissive())
        .layer(middleware::from_fn(security_headers))
        .with_state(state)
}

// --- Server startup ---

pub async fn start_server(
    db: Database,
    port: u16,
    bind: &str,
    jwt_secret: String,
) -> anyhow::Result<()> {
    let state = AppState {
        db: Arc::new(Mutex::new(db)),
        jwt_secret: Arc::new(jwt_secret),
    };

    let app = build_router(state);

    if bind != "127.0.0.1" && bind != "localhost" {
        eprintln!("Warning: Listening on {bind}. Any device on your network can reach this API.");
    }

    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}"))
        .await
        .context("failed to bind")?;
    eprintln!("Listening on http://{bind}:{port}");
    axum::serve(listener, app).await?;

    Ok(())
}
