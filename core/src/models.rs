use std::collections::BTreeMap;

use anyhow::{Result, bail};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
}

/// Full user row including the password hash. Never serialized.
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Entry {
    pub id: i64,
    pub user_id: i64,
    pub entry_date: String,
    pub content: String,
    pub tags: Vec<String>,
    pub mood: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct NewEntry {
    pub date: NaiveDate,
    pub content: String,
    pub tags: Vec<String>,
    pub mood: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Streak {
    pub current: i64,
    pub longest: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryStats {
    pub total_entries: i64,
    pub total_words: i64,
    pub avg_words_per_entry: i64,
    pub mood_distribution: BTreeMap<i64, i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Habit {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub icon: String,
    pub color: String,
    pub category: String,
    pub frequency_days: Vec<i64>,
    pub target_count: i64,
    pub created_at: String,
}

/// Habit plus status derived from its logs, as returned by `GET /api/habits`.
#[derive(Debug, Clone, Serialize)]
pub struct HabitWithStatus {
    #[serde(flatten)]
    pub habit: Habit,
    pub completed_today: bool,
    pub streak: i64,
}

#[derive(Debug, Clone)]
pub struct NewHabit {
    pub name: String,
    pub icon: Option<String>,
    pub color: Option<String>,
    pub category: Option<String>,
    pub frequency_days: Option<Vec<i64>>,
    pub target_count: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryDay {
    pub date: String,
    pub completed: bool,
}

/// Completion window for habit insights.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsightRange {
    Today,
    Week,
    Month,
    Year,
    All,
}

impl InsightRange {
    /// Unknown tokens fall back to `Month`, matching the API's default range.
    #[must_use]
    pub fn parse(token: &str) -> Self {
        match token {
            "today" => Self::Today,
            "week" => Self::Week,
            "year" => Self::Year,
            "all" => Self::All,
            _ => Self::Month,
        }
    }

    /// Days to look back from today, or `None` for an unbounded window.
    #[must_use]
    pub fn lookback_days(self) -> Option<i64> {
        match self {
            Self::Today => Some(0),
            Self::Week => Some(7),
            Self::Month => Some(30),
            Self::Year => Some(365),
            Self::All => None,
        }
    }

    /// Fixed denominator for the completion-rate percentage.
    /// `All` has no denominator; its rate is pinned to 0.
    #[must_use]
    pub fn rate_denominator(self) -> Option<i64> {
        match self {
            Self::Today => Some(1),
            Self::Week => Some(7),
            Self::Month => Some(30),
            Self::Year => Some(365),
            Self::All => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HabitStat {
    pub id: i64,
    pub name: String,
    pub icon: String,
    pub color: String,
    pub completion_count: i64,
    pub rate: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HabitInsights {
    pub total_completions: i64,
    pub habit_stats: Vec<HabitStat>,
    pub best_day: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuickNote {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub content: String,
    pub color: String,
    pub pinned: bool,
    pub tags: Vec<String>,
    #[serde(rename = "type")]
    pub note_type: String,
    pub position: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct NewNote {
    pub title: String,
    pub content: String,
    pub color: Option<String>,
    pub tags: Vec<String>,
    pub note_type: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateNote {
    pub content: String,
    pub title: Option<String>,
    pub color: Option<String>,
    pub tags: Option<Vec<String>>,
    pub note_type: Option<String>,
}

// --- Backup / import types ---
//
// The backup file is a JSON envelope `{version, exportedAt, data}` with
// camelCase collection keys, so it round-trips with exports produced by
// the web client.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupPayload {
    pub version: i64,
    #[serde(rename = "exportedAt")]
    pub exported_at: String,
    pub data: BackupData,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackupData {
    #[serde(default)]
    pub entries: Vec<BackupEntry>,
    #[serde(default)]
    pub habits: Vec<BackupHabit>,
    #[serde(rename = "habitLogs", default)]
    pub habit_logs: Vec<BackupHabitLog>,
    #[serde(rename = "quickNotes", default)]
    pub quick_notes: Vec<BackupNote>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupEntry {
    #[serde(default)]
    pub id: i64,
    pub entry_date: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub mood: Option<i64>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupHabit {
    pub id: i64,
    pub name: String,
    #[serde(default = "default_habit_icon")]
    pub icon: String,
    #[serde(default = "default_habit_color")]
    pub color: String,
    #[serde(default = "default_habit_category")]
    pub category: String,
    #[serde(default = "default_frequency_days")]
    pub frequency_days: Vec<i64>,
    #[serde(default = "default_target_count")]
    pub target_count: i64,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupHabitLog {
    #[serde(default)]
    pub id: i64,
    pub habit_id: i64,
    pub log_date: String,
    #[serde(default)]
    pub completed: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupNote {
    #[serde(default)]
    pub title: String,
    pub content: String,
    #[serde(default = "default_note_color")]
    pub color: String,
    #[serde(default)]
    pub pinned: i64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(rename = "type", default = "default_note_type")]
    pub note_type: String,
    #[serde(default)]
    pub position: i64,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

fn default_habit_icon() -> String {
    "✅".to_string()
}

fn default_habit_color() -> String {
    "#8B5CF6".to_string()
}

fn default_habit_category() -> String {
    "General".to_string()
}

fn default_frequency_days() -> Vec<i64> {
    vec![0, 1, 2, 3, 4, 5, 6]
}

fn default_target_count() -> i64 {
    1
}

fn default_note_color() -> String {
    "#FFE066".to_string()
}

fn default_note_type() -> String {
    "text".to_string()
}

/// Conflict counts by natural key: entry date, habit name, note content.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportConflicts {
    pub entries: i64,
    pub habits: i64,
    #[serde(rename = "quickNotes")]
    pub quick_notes: i64,
}

/// Per-category overwrite flags. Habit logs ride along with the `habits`
/// flag since logs are only meaningful alongside their parent habit.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct OverwriteOptions {
    #[serde(default)]
    pub entries: bool,
    #[serde(default)]
    pub habits: bool,
    #[serde(rename = "quickNotes", default)]
    pub quick_notes: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub entries_imported: i64,
    pub habits_imported: i64,
    pub habit_logs_imported: i64,
    pub quick_notes_imported: i64,
}

// --- Admin types ---

#[derive(Debug, Clone, Serialize)]
pub struct SystemStats {
    pub users: i64,
    pub entries: i64,
    pub habits: i64,
    pub notes: i64,
    #[serde(rename = "storageMB")]
    pub storage_mb: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdminUser {
    pub id: i64,
    pub username: String,
    pub entry_count: i64,
    pub note_count: i64,
    pub last_active: Option<String>,
}

// --- Validation helpers ---

pub const NOTE_TYPES: &[&str] = &["text", "checklist"];

pub fn validate_note_type(note_type: &str) -> Result<String> {
    if NOTE_TYPES.contains(&note_type) {
        Ok(note_type.to_string())
    } else {
        bail!(
            "Invalid note type '{note_type}'. Must be one of: {}",
            NOTE_TYPES.join(", ")
        )
    }
}

pub fn validate_mood(mood: Option<i64>) -> Result<Option<i64>> {
    match mood {
        None => Ok(None),
        Some(m) if (1..=5).contains(&m) => Ok(Some(m)),
        Some(m) => bail!("Invalid mood {m}. Must be between 1 and 5"),
    }
}

pub fn parse_date(date: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|_| anyhow::anyhow!("Invalid date '{date}'. Use YYYY-MM-DD"))
}

/// Weekday names indexed by SQLite's `strftime('%w', ...)` (0 = Sunday).
pub const WEEKDAY_NAMES: &[&str] = &[
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insight_range_parse() {
        assert_eq!(InsightRange::parse("today"), InsightRange::Today);
        assert_eq!(InsightRange::parse("week"), InsightRange::Week);
        assert_eq!(InsightRange::parse("month"), InsightRange::Month);
        assert_eq!(InsightRange::parse("year"), InsightRange::Year);
        assert_eq!(InsightRange::parse("all"), InsightRange::All);
    }

    #[test]
    fn test_insight_range_unknown_defaults_to_month() {
        assert_eq!(InsightRange::parse("fortnight"), InsightRange::Month);
        assert_eq!(InsightRange::parse(""), InsightRange::Month);
    }

    #[test]
    fn test_insight_range_denominators() {
        assert_eq!(InsightRange::Today.rate_denominator(), Some(1));
        assert_eq!(InsightRange::Week.rate_denominator(), Some(7));
        assert_eq!(InsightRange::Month.rate_denominator(), Some(30));
        assert_eq!(InsightRange::Year.rate_denominator(), Some(365));
        assert_eq!(InsightRange::All.rate_denominator(), None);
    }

    #[test]
    fn test_validate_note_type() {
        assert_eq!(validate_note_type("text").unwrap(), "text");
        assert_eq!(validate_note_type("checklist").unwrap(), "checklist");
        assert!(validate_note_type("todo").is_err());
        assert!(validate_note_type("").is_err());
    }

    #[test]
    fn test_validate_mood() {
        assert_eq!(validate_mood(None).unwrap(), None);
        assert_eq!(validate_mood(Some(1)).unwrap(), Some(1));
        assert_eq!(validate_mood(Some(5)).unwrap(), Some(5));
        assert!(validate_mood(Some(0)).is_err());
        assert!(validate_mood(Some(6)).is_err());
    }

    #[test]
    fn test_parse_date() {
        assert!(parse_date("2024-06-15").is_ok());
        // chrono accepts unpadded month/day for %m/%d.
        assert!(parse_date("2024-6-15").is_ok());
        assert!(parse_date("2024-13-01").is_err());
        assert!(parse_date("not-a-date").is_err());
    }

    #[test]
    fn test_backup_payload_defaults() {
        let json = r#"{
            "version": 1,
            "exportedAt": "2024-06-15T10:00:00Z",
            "data": {
                "entries": [{"id": 1, "entry_date": "2024-06-15", "content": "hi", "tags": ["a"], "mood": 3}],
                "habits": [{"id": 2, "name": "Run"}],
                "habitLogs": [{"habit_id": 2, "log_date": "2024-06-15", "completed": 1}],
                "quickNotes": [{"content": "milk"}]
            }
        }"#;
        let payload: BackupPayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.version, 1);
        assert_eq!(payload.data.entries.len(), 1);
        assert_eq!(payload.data.entries[0].tags, vec!["a"]);
        assert_eq!(payload.data.habits[0].icon, "✅");
        assert_eq!(
            payload.data.habits[0].frequency_days,
            vec![0, 1, 2, 3, 4, 5, 6]
        );
        assert_eq!(payload.data.habit_logs[0].completed, 1);
        assert_eq!(payload.data.quick_notes[0].note_type, "text");
        assert_eq!(payload.data.quick_notes[0].color, "#FFE066");
    }

    #[test]
    fn test_backup_payload_missing_sections() {
        let json = r#"{"version": 1, "exportedAt": "now", "data": {}}"#;
        let payload: BackupPayload = serde_json::from_str(json).unwrap();
        assert!(payload.data.entries.is_empty());
        assert!(payload.data.habits.is_empty());
        assert!(payload.data.habit_logs.is_empty());
        assert!(payload.data.quick_notes.is_empty());
    }

    #[test]
    fn test_overwrite_options_default_off() {
        let opts: OverwriteOptions = serde_json::from_str("{}").unwrap();
        assert!(!opts.entries);
        assert!(!opts.habits);
        assert!(!opts.quick_notes);
    }

    #[test]
    fn test_quick_note_serializes_type_key() {
        let note = QuickNote {
            id: 1,
            user_id: 1,
            title: String::new(),
            content: "x".to_string(),
            color: "#FFE066".to_string(),
            pinned: false,
            tags: vec![],
            note_type: "checklist".to_string(),
            position: 0,
            created_at: String::new(),
            updated_at: String::new(),
        };
        let value = serde_json::to_value(&note).unwrap();
        assert_eq!(value["type"], "checklist");
        assert_eq!(value["pinned"], false);
    }
}
