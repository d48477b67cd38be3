use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use rusqlite::{Connection, OptionalExtension, params};

use crate::models::{
    AdminUser, BackupData, BackupEntry, BackupHabit, BackupHabitLog, BackupNote, BackupPayload,
    Entry, EntryStats, Habit, HabitInsights, HabitStat, HabitWithStatus, HistoryDay,
    ImportConflicts, ImportSummary, InsightRange, NewEntry, NewHabit, NewNote, QuickNote, Streak,
    SystemStats, UpdateNote, User, UserCredentials, WEEKDAY_NAMES,
};

pub struct Database {
    conn: Connection,
}

/// Streak over distinct entry dates sorted most-recent-first.
///
/// `current` counts back from today (or yesterday, when today has no entry
/// yet); `longest` is the longest consecutive run anywhere in the list.
#[must_use]
pub fn compute_streak(dates_desc: &[NaiveDate], today: NaiveDate) -> Streak {
    if dates_desc.is_empty() {
        return Streak {
            current: 0,
            longest: 0,
        };
    }

    let yesterday = today - chrono::Duration::days(1);
    let current = if dates_desc[0] == today || dates_desc[0] == yesterday {
        let mut run: i64 = 1;
        for pair in dates_desc.windows(2) {
            if pair[0] - pair[1] == chrono::Duration::days(1) {
                run += 1;
            } else {
                break;
            }
        }
        run
    } else {
        0
    };

    let mut longest: i64 = 1;
    let mut run: i64 = 1;
    for pair in dates_desc.windows(2) {
        if pair[0] - pair[1] == chrono::Duration::days(1) {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 1;
        }
    }

    Streak { current, longest }
}

fn tags_to_json(tags: &[String]) -> Result<String> {
    serde_json::to_string(tags).context("Failed to serialize tags")
}

fn tags_from_json(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

fn frequency_days_to_json(days: &[i64]) -> Result<String> {
    serde_json::to_string(days).context("Failed to serialize frequency days")
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    username TEXT NOT NULL UNIQUE,
                    password_hash TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS entries (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id),
                    entry_date TEXT NOT NULL,
                    content TEXT NOT NULL,
                    tags TEXT NOT NULL DEFAULT '[]',
                    mood INTEGER,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    UNIQUE(user_id, entry_date)
                );

                CREATE TABLE IF NOT EXISTS habits (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id),
                    name TEXT NOT NULL,
                    icon TEXT NOT NULL DEFAULT '✅',
                    color TEXT NOT NULL DEFAULT '#8B5CF6',
                    category TEXT NOT NULL DEFAULT 'General',
                    frequency_days TEXT NOT NULL DEFAULT '[0,1,2,3,4,5,6]',
                    target_count INTEGER NOT NULL DEFAULT 1,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS habit_logs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    habit_id INTEGER NOT NULL REFERENCES habits(id),
                    user_id INTEGER NOT NULL REFERENCES users(id),
                    log_date TEXT NOT NULL,
                    completed INTEGER NOT NULL DEFAULT 0,
                    UNIQUE(habit_id, log_date)
                );

                CREATE TABLE IF NOT EXISTS quick_notes (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id),
                    title TEXT NOT NULL DEFAULT '',
                    content TEXT NOT NULL,
                    color TEXT NOT NULL DEFAULT '#FFE066',
                    pinned INTEGER NOT NULL DEFAULT 0,
                    tags TEXT NOT NULL DEFAULT '[]',
                    type TEXT NOT NULL DEFAULT 'text',
                    position INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_entries_user_date ON entries(user_id, entry_date);
                CREATE INDEX IF NOT EXISTS idx_habits_user ON habits(user_id);
                CREATE INDEX IF NOT EXISTS idx_habit_logs_habit_date ON habit_logs(habit_id, log_date);
                CREATE INDEX IF NOT EXISTS idx_habit_logs_user ON habit_logs(user_id);
                CREATE INDEX IF NOT EXISTS idx_quick_notes_user ON quick_notes(user_id);

                PRAGMA user_version = 1;",
            )?;
        }

        Ok(())
    }

    // --- Row mapping helpers ---

    fn user_from_row(row: &rusqlite::Row) -> rusqlite::Result<User> {
        Ok(User {
            id: row.get(0)?,
            username: row.get(1)?,
        })
    }

    // Expects columns:
    // 0: id, 1: user_id, 2: entry_date, 3: content, 4: tags,
    // 5: mood, 6: created_at, 7: updated_at
    fn entry_from_row(row: &rusqlite::Row) -> rusqlite::Result<Entry> {
        let raw_tags: String = row.get(4)?;
        Ok(Entry {
            id: row.get(0)?,
            user_id: row.get(1)?,
            entry_date: row.get(2)?,
            content: row.get(3)?,
            tags: tags_from_json(&raw_tags),
            mood: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn habit_from_row(row: &rusqlite::Row) -> rusqlite::Result<Habit> {
        let raw_days: String = row.get(6)?;
        Ok(Habit {
            id: row.get(0)?,
            user_id: row.get(1)?,
            name: row.get(2)?,
            icon: row.get(3)?,
            color: row.get(4)?,
            category: row.get(5)?,
            frequency_days: serde_json::from_str(&raw_days).unwrap_or_default(),
            target_count: row.get(7)?,
            created_at: row.get(8)?,
        })
    }

    fn note_from_row(row: &rusqlite::Row) -> rusqlite::Result<QuickNote> {
        let raw_tags: String = row.get(6)?;
        Ok(QuickNote {
            id: row.get(0)?,
            user_id: row.get(1)?,
            title: row.get(2)?,
            content: row.get(3)?,
            color: row.get(4)?,
            pinned: row.get::<_, i64>(5)? != 0,
            tags: tags_from_json(&raw_tags),
            note_type: row.get(7)?,
            position: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    // --- Users ---

    pub fn create_user(&self, username: &str, password_hash: &str) -> Result<User> {
        let now = Local::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO users (username, password_hash, created_at) VALUES (?1, ?2, ?3)",
            params![username, password_hash, now],
        )?;
        let id = self.conn.last_insert_rowid();
        Ok(User {
            id,
            username: username.to_string(),
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserCredentials>> {
        self.conn
            .query_row(
                "SELECT id, username, password_hash FROM users WHERE username = ?1",
                params![username],
                |row| {
                    Ok(UserCredentials {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        password_hash: row.get(2)?,
                    })
                },
            )
            .optional()
            .context("Failed to look up user")
    }

    pub fn get_user_by_id(&self, id: i64) -> Result<Option<User>> {
        self.conn
            .query_row(
                "SELECT id, username FROM users WHERE id = ?1",
                params![id],
                Self::user_from_row,
            )
            .optional()
            .context("Failed to look up user")
    }

    /// Remove a user and everything they own in one transaction.
    /// Returns false when the user does not exist.
    pub fn delete_user(&self, id: i64) -> Result<bool> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM habit_logs WHERE user_id = ?1", params![id])?;
        tx.execute("DELETE FROM habits WHERE user_id = ?1", params![id])?;
        tx.execute("DELETE FROM entries WHERE user_id = ?1", params![id])?;
        tx.execute("DELETE FROM quick_notes WHERE user_id = ?1", params![id])?;
        let deleted = tx.execute("DELETE FROM users WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(deleted > 0)
    }

    // --- Entries ---

    pub fn upsert_entry(&self, user_id: i64, entry: &NewEntry) -> Result<Entry> {
        let now = Local::now().to_rfc3339();
        let date_str = entry.date.format("%Y-%m-%d").to_string();
        let tags = tags_to_json(&entry.tags)?;
        self.conn.execute(
            "INSERT INTO entries (user_id, entry_date, content, tags, mood, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT(user_id, entry_date)
             DO UPDATE SET content = ?3, tags = ?4, mood = ?5, updated_at = ?6",
            params![user_id, date_str, entry.content, tags, entry.mood, now],
        )?;
        self.get_entry(user_id, &date_str)?
            .context("Entry vanished after upsert")
    }

    pub fn get_entry(&self, user_id: i64, date: &str) -> Result<Option<Entry>> {
        self.conn
            .query_row(
                "SELECT id, user_id, entry_date, content, tags, mood, created_at, updated_at
                 FROM entries WHERE user_id = ?1 AND entry_date = ?2",
                params![user_id, date],
                Self::entry_from_row,
            )
            .optional()
            .context("Failed to fetch entry")
    }

    /// Idempotent: deleting a missing entry is not an error.
    pub fn delete_entry(&self, user_id: i64, date: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM entries WHERE user_id = ?1 AND entry_date = ?2",
            params![user_id, date],
        )?;
        Ok(())
    }

    pub fn list_entries(&self, user_id: i64) -> Result<Vec<Entry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, entry_date, content, tags, mood, created_at, updated_at
             FROM entries WHERE user_id = ?1 ORDER BY entry_date DESC",
        )?;
        let entries = stmt
            .query_map(params![user_id], Self::entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn entry_dates(&self, user_id: i64) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT entry_date FROM entries WHERE user_id = ?1 ORDER BY entry_date ASC",
        )?;
        let dates = stmt
            .query_map(params![user_id], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(dates)
    }

    /// Content LIKE filter plus per-tag containment filters, newest first.
    pub fn search_entries(
        &self,
        user_id: i64,
        query: Option<&str>,
        tags: &[String],
    ) -> Result<Vec<Entry>> {
        let mut sql = String::from(
            "SELECT id, user_id, entry_date, content, tags, mood, created_at, updated_at
             FROM entries WHERE user_id = ?1",
        );
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(user_id)];

        if let Some(q) = query {
            if !q.is_empty() {
                args.push(Box::new(format!("%{q}%")));
                sql.push_str(&format!(" AND content LIKE ?{}", args.len()));
            }
        }
        for tag in tags {
            // Tags are stored as a JSON array string, so a quoted match
            // avoids hitting substrings of longer tags.
            args.push(Box::new(format!("%\"{tag}\"%")));
            sql.push_str(&format!(" AND tags LIKE ?{}", args.len()));
        }
        sql.push_str(" ORDER BY entry_date DESC LIMIT 50");

        let mut stmt = self.conn.prepare(&sql)?;
        let params = rusqlite::params_from_iter(args.iter().map(|a| a.as_ref()));
        let entries = stmt
            .query_map(params, Self::entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Union of every tag used in the user's entries, sorted.
    pub fn list_tags(&self, user_id: i64) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT tags FROM entries WHERE user_id = ?1")?;
        let raw: Vec<String> = stmt
            .query_map(params![user_id], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut tags: Vec<String> = raw.iter().flat_map(|t| tags_from_json(t)).collect();
        tags.sort();
        tags.dedup();
        Ok(tags)
    }

    pub fn entry_streak(&self, user_id: i64, today: NaiveDate) -> Result<Streak> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT entry_date FROM entries WHERE user_id = ?1 ORDER BY entry_date DESC",
        )?;
        let raw: Vec<String> = stmt
            .query_map(params![user_id], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let dates: Vec<NaiveDate> = raw
            .iter()
            .filter_map(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
            .collect();
        Ok(compute_streak(&dates, today))
    }

    #[allow(clippy::cast_possible_wrap, clippy::cast_precision_loss)]
    #[allow(clippy::cast_possible_truncation)]
    pub fn entry_stats(&self, user_id: i64) -> Result<EntryStats> {
        let mut stmt = self
            .conn
            .prepare("SELECT content, mood FROM entries WHERE user_id = ?1")?;
        let rows: Vec<(String, Option<i64>)> = stmt
            .query_map(params![user_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        let total_entries = rows.len() as i64;
        let total_words: i64 = rows
            .iter()
            .map(|(content, _)| content.split_whitespace().count() as i64)
            .sum();
        let avg_words_per_entry = if total_entries == 0 {
            0
        } else {
            (total_words as f64 / total_entries as f64).round() as i64
        };

        let mut mood_distribution: BTreeMap<i64, i64> = (1..=5).map(|m| (m, 0)).collect();
        for (_, mood) in &rows {
            if let Some(m) = mood {
                if let Some(count) = mood_distribution.get_mut(m) {
                    *count += 1;
                }
            }
        }

        Ok(EntryStats {
            total_entries,
            total_words,
            avg_words_per_entry,
            mood_distribution,
        })
    }

    // --- Habits ---

    pub fn create_habit(&self, user_id: i64, habit: &NewHabit) -> Result<Habit> {
        let now = Local::now().to_rfc3339();
        let icon = habit.icon.as_deref().unwrap_or("✅");
        let color = habit.color.as_deref().unwrap_or("#8B5CF6");
        let category = habit.category.as_deref().unwrap_or("General");
        let days = match &habit.frequency_days {
            Some(days) => frequency_days_to_json(days)?,
            None => "[0,1,2,3,4,5,6]".to_string(),
        };
        let target_count = habit.target_count.unwrap_or(1);
        self.conn.execute(
            "INSERT INTO habits (user_id, name, icon, color, category, frequency_days, target_count, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![user_id, habit.name, icon, color, category, days, target_count, now],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get_habit(user_id, id)?
            .context("Habit vanished after insert")
    }

    pub fn get_habit(&self, user_id: i64, id: i64) -> Result<Option<Habit>> {
        self.conn
            .query_row(
                "SELECT id, user_id, name, icon, color, category, frequency_days, target_count, created_at
                 FROM habits WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
                Self::habit_from_row,
            )
            .optional()
            .context("Failed to fetch habit")
    }

    /// Habits with completion status for `today` and their running streaks.
    pub fn list_habits_with_status(
        &self,
        user_id: i64,
        today: NaiveDate,
    ) -> Result<Vec<HabitWithStatus>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, name, icon, color, category, frequency_days, target_count, created_at
             FROM habits WHERE user_id = ?1 ORDER BY category ASC, created_at ASC",
        )?;
        let habits = stmt
            .query_map(params![user_id], Self::habit_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let today_str = today.format("%Y-%m-%d").to_string();
        let mut result = Vec::with_capacity(habits.len());
        for habit in habits {
            let completed_today: bool = self
                .conn
                .query_row(
                    "SELECT completed FROM habit_logs WHERE habit_id = ?1 AND log_date = ?2",
                    params![habit.id, today_str],
                    |row| row.get::<_, i64>(0),
                )
                .optional()?
                .is_some_and(|c| c != 0);
            let streak = self.habit_streak(habit.id, today)?;
            result.push(HabitWithStatus {
                habit,
                completed_today,
                streak,
            });
        }
        Ok(result)
    }

    /// Consecutive completed days counting back from today, or from
    /// yesterday when today is still unchecked.
    fn habit_streak(&self, habit_id: i64, today: NaiveDate) -> Result<i64> {
        let mut stmt = self.conn.prepare(
            "SELECT log_date FROM habit_logs
             WHERE habit_id = ?1 AND completed = 1 ORDER BY log_date DESC",
        )?;
        let raw: Vec<String> = stmt
            .query_map(params![habit_id], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        let dates: Vec<NaiveDate> = raw
            .iter()
            .filter_map(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
            .collect();
        Ok(compute_streak(&dates, today).current)
    }

    /// Returns false when the habit does not exist or belongs to someone else.
    pub fn delete_habit(&self, user_id: i64, id: i64) -> Result<bool> {
        if self.get_habit(user_id, id)?.is_none() {
            return Ok(false);
        }
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM habit_logs WHERE habit_id = ?1", params![id])?;
        tx.execute(
            "DELETE FROM habits WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
        )?;
        tx.commit()?;
        Ok(true)
    }

    /// Flip the log for `date`, creating a completed one when absent.
    /// Returns the new completed state, or None when the habit is not
    /// visible to this user.
    pub fn toggle_habit(
        &self,
        user_id: i64,
        habit_id: i64,
        date: NaiveDate,
    ) -> Result<Option<bool>> {
        if self.get_habit(user_id, habit_id)?.is_none() {
            return Ok(None);
        }
        let date_str = date.format("%Y-%m-%d").to_string();
        let existing: Option<(i64, i64)> = self
            .conn
            .query_row(
                "SELECT id, completed FROM habit_logs WHERE habit_id = ?1 AND log_date = ?2",
                params![habit_id, date_str],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match existing {
            Some((log_id, completed)) => {
                let flipped = i64::from(completed == 0);
                self.conn.execute(
                    "UPDATE habit_logs SET completed = ?1 WHERE id = ?2",
                    params![flipped, log_id],
                )?;
                Ok(Some(flipped != 0))
            }
            None => {
                self.conn.execute(
                    "INSERT INTO habit_logs (habit_id, user_id, log_date, completed)
                     VALUES (?1, ?2, ?3, 1)",
                    params![habit_id, user_id, date_str],
                )?;
                Ok(Some(true))
            }
        }
    }

    /// Most-recent-first completion history covering the last `days` days.
    pub fn habit_history(
        &self,
        user_id: i64,
        habit_id: i64,
        days: i64,
        today: NaiveDate,
    ) -> Result<Option<Vec<HistoryDay>>> {
        if self.get_habit(user_id, habit_id)?.is_none() {
            return Ok(None);
        }
        let start = today - chrono::Duration::days(days - 1);
        let start_str = start.format("%Y-%m-%d").to_string();
        let today_str = today.format("%Y-%m-%d").to_string();

        let mut stmt = self.conn.prepare(
            "SELECT log_date, completed FROM habit_logs
             WHERE habit_id = ?1 AND log_date >= ?2 AND log_date <= ?3",
        )?;
        let logs: HashMap<String, i64> = stmt
            .query_map(params![habit_id, start_str, today_str], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<Result<HashMap<_, _>, _>>()?;

        let mut history = Vec::with_capacity(usize::try_from(days).unwrap_or(0));
        for offset in 0..days {
            let date = today - chrono::Duration::days(offset);
            let date_str = date.format("%Y-%m-%d").to_string();
            let completed = logs.get(&date_str).is_some_and(|c| *c != 0);
            history.push(HistoryDay {
                date: date_str,
                completed,
            });
        }
        Ok(Some(history))
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn habit_insights(
        &self,
        user_id: i64,
        range: InsightRange,
        today: NaiveDate,
    ) -> Result<HabitInsights> {
        let today_str = today.format("%Y-%m-%d").to_string();
        let start_str = range.lookback_days().map(|days| {
            (today - chrono::Duration::days(days))
                .format("%Y-%m-%d")
                .to_string()
        });
        // Unbounded windows reuse the same query with an always-true bound.
        let lower = start_str.unwrap_or_else(|| "0000-00-00".to_string());

        let total_completions: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM habit_logs
             WHERE user_id = ?1 AND completed = 1 AND log_date >= ?2 AND log_date <= ?3",
            params![user_id, lower, today_str],
            |row| row.get(0),
        )?;

        let mut stmt = self.conn.prepare(
            "SELECT h.id, h.name, h.icon, h.color, COUNT(l.id)
             FROM habits h
             LEFT JOIN habit_logs l ON l.habit_id = h.id
                 AND l.completed = 1 AND l.log_date >= ?2 AND l.log_date <= ?3
             WHERE h.user_id = ?1
             GROUP BY h.id ORDER BY h.created_at ASC",
        )?;
        let mut habit_stats: Vec<HabitStat> = stmt
            .query_map(params![user_id, lower, today_str], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|(id, name, icon, color, completion_count)| {
                let rate = range.rate_denominator().map_or(0, |denom| {
                    ((completion_count as f64 / denom as f64) * 100.0).round() as i64
                });
                HabitStat {
                    id,
                    name,
                    icon,
                    color,
                    completion_count,
                    rate,
                }
            })
            .collect();
        habit_stats.sort_by(|a, b| {
            b.rate
                .cmp(&a.rate)
                .then(b.completion_count.cmp(&a.completion_count))
        });

        // strftime('%w') yields 0 for Sunday.
        let best_day: Option<i64> = self
            .conn
            .query_row(
                "SELECT CAST(strftime('%w', log_date) AS INTEGER) AS dow
                 FROM habit_logs
                 WHERE user_id = ?1 AND completed = 1 AND log_date >= ?2 AND log_date <= ?3
                 GROUP BY dow ORDER BY COUNT(*) DESC LIMIT 1",
                params![user_id, lower, today_str],
                |row| row.get(0),
            )
            .optional()?;
        let best_day = best_day
            .and_then(|d| usize::try_from(d).ok())
            .and_then(|d| WEEKDAY_NAMES.get(d))
            .map_or_else(|| "N/A".to_string(), |name| (*name).to_string());

        Ok(HabitInsights {
            total_completions,
            habit_stats,
            best_day,
        })
    }

    // --- Quick notes ---

    pub fn list_notes(&self, user_id: i64) -> Result<Vec<QuickNote>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, title, content, color, pinned, tags, type, position, created_at, updated_at
             FROM quick_notes WHERE user_id = ?1
             ORDER BY position ASC, pinned DESC, updated_at DESC",
        )?;
        let notes = stmt
            .query_map(params![user_id], Self::note_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(notes)
    }

    pub fn get_note(&self, user_id: i64, id: i64) -> Result<Option<QuickNote>> {
        self.conn
            .query_row(
                "SELECT id, user_id, title, content, color, pinned, tags, type, position, created_at, updated_at
                 FROM quick_notes WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
                Self::note_from_row,
            )
            .optional()
            .context("Failed to fetch note")
    }

    pub fn create_note(&self, user_id: i64, note: &NewNote) -> Result<QuickNote> {
        let now = Local::now().to_rfc3339();
        let color = note.color.as_deref().unwrap_or("#FFE066");
        let note_type = note.note_type.as_deref().unwrap_or("text");
        let tags = tags_to_json(&note.tags)?;
        let position: i64 = self.conn.query_row(
            "SELECT COALESCE(MAX(position) + 1, 0) FROM quick_notes WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        self.conn.execute(
            "INSERT INTO quick_notes (user_id, title, content, color, tags, type, position, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![user_id, note.title, note.content, color, tags, note_type, position, now],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get_note(user_id, id)?
            .context("Note vanished after insert")
    }

    pub fn update_note(
        &self,
        user_id: i64,
        id: i64,
        update: &UpdateNote,
    ) -> Result<Option<QuickNote>> {
        let Some(existing) = self.get_note(user_id, id)? else {
            return Ok(None);
        };
        let now = Local::now().to_rfc3339();
        let title = update.title.as_deref().unwrap_or(&existing.title);
        let color = update.color.as_deref().unwrap_or(&existing.color);
        let tags = tags_to_json(update.tags.as_ref().unwrap_or(&existing.tags))?;
        let note_type = update.note_type.as_deref().unwrap_or(&existing.note_type);
        self.conn.execute(
            "UPDATE quick_notes
             SET title = ?1, content = ?2, color = ?3, tags = ?4, type = ?5, updated_at = ?6
             WHERE id = ?7 AND user_id = ?8",
            params![title, update.content, color, tags, note_type, now, id, user_id],
        )?;
        self.get_note(user_id, id)
    }

    pub fn delete_note(&self, user_id: i64, id: i64) -> Result<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM quick_notes WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
        )?;
        Ok(deleted > 0)
    }

    pub fn toggle_pin(&self, user_id: i64, id: i64) -> Result<Option<bool>> {
        let Some(existing) = self.get_note(user_id, id)? else {
            return Ok(None);
        };
        let pinned = i64::from(!existing.pinned);
        let now = Local::now().to_rfc3339();
        self.conn.execute(
            "UPDATE quick_notes SET pinned = ?1, updated_at = ?2 WHERE id = ?3 AND user_id = ?4",
            params![pinned, now, id, user_id],
        )?;
        Ok(Some(pinned != 0))
    }

    /// Assign positions 0..n-1 following the given order, atomically.
    #[allow(clippy::cast_possible_wrap)]
    pub fn reorder_notes(&self, user_id: i64, note_ids: &[i64]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        for (position, note_id) in note_ids.iter().enumerate() {
            tx.execute(
                "UPDATE quick_notes SET position = ?1 WHERE id = ?2 AND user_id = ?3",
                params![position as i64, note_id, user_id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    // --- Backup ---

    pub fn export_backup(&self, user_id: i64) -> Result<BackupPayload> {
        let entries = self
            .list_entries(user_id)?
            .into_iter()
            .map(|e| BackupEntry {
                id: e.id,
                entry_date: e.entry_date,
                content: e.content,
                tags: e.tags,
                mood: e.mood,
                created_at: Some(e.created_at),
                updated_at: Some(e.updated_at),
            })
            .collect();

        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, name, icon, color, category, frequency_days, target_count, created_at
             FROM habits WHERE user_id = ?1 ORDER BY id ASC",
        )?;
        let habits = stmt
            .query_map(params![user_id], Self::habit_from_row)?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|h| BackupHabit {
                id: h.id,
                name: h.name,
                icon: h.icon,
                color: h.color,
                category: h.category,
                frequency_days: h.frequency_days,
                target_count: h.target_count,
                created_at: Some(h.created_at),
            })
            .collect();

        let mut stmt = self.conn.prepare(
            "SELECT id, habit_id, log_date, completed FROM habit_logs
             WHERE user_id = ?1 ORDER BY id ASC",
        )?;
        let habit_logs = stmt
            .query_map(params![user_id], |row| {
                Ok(BackupHabitLog {
                    id: row.get(0)?,
                    habit_id: row.get(1)?,
                    log_date: row.get(2)?,
                    completed: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let quick_notes = self
            .list_notes(user_id)?
            .into_iter()
            .map(|n| BackupNote {
                title: n.title,
                content: n.content,
                color: n.color,
                pinned: i64::from(n.pinned),
                tags: n.tags,
                note_type: n.note_type,
                position: n.position,
                created_at: Some(n.created_at),
                updated_at: Some(n.updated_at),
            })
            .collect();

        Ok(BackupPayload {
            version: 1,
            exported_at: Local::now().to_rfc3339(),
            data: BackupData {
                entries,
                habits,
                habit_logs,
                quick_notes,
            },
        })
    }

    /// Count would-be collisions without touching anything. Natural keys:
    /// entry date, habit name, exact note content.
    pub fn check_import_conflicts(
        &self,
        user_id: i64,
        data: &BackupData,
    ) -> Result<ImportConflicts> {
        let mut conflicts = ImportConflicts::default();
        for entry in &data.entries {
            if self.get_entry(user_id, &entry.entry_date)?.is_some() {
                conflicts.entries += 1;
            }
        }
        for habit in &data.habits {
            if self.find_habit_by_name(user_id, &habit.name)?.is_some() {
                conflicts.habits += 1;
            }
        }
        for note in &data.quick_notes {
            if self.find_note_by_content(user_id, &note.content)?.is_some() {
                conflicts.quick_notes += 1;
            }
        }
        Ok(conflicts)
    }

    fn find_habit_by_name(&self, user_id: i64, name: &str) -> Result<Option<i64>> {
        self.conn
            .query_row(
                "SELECT id FROM habits WHERE user_id = ?1 AND name = ?2",
                params![user_id, name],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to look up habit by name")
    }

    fn find_note_by_content(&self, user_id: i64, content: &str) -> Result<Option<i64>> {
        self.conn
            .query_row(
                "SELECT id FROM quick_notes WHERE user_id = ?1 AND content = ?2",
                params![user_id, content],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to look up note by content")
    }

    /// All-or-nothing import. Habits go first so their logs can be remapped
    /// from backup ids to fresh ids; logs reuse the habits overwrite flag.
    #[allow(clippy::too_many_lines)]
    pub fn import_backup(
        &self,
        user_id: i64,
        data: &BackupData,
        overwrite: crate::models::OverwriteOptions,
    ) -> Result<ImportSummary> {
        let now = Local::now().to_rfc3339();
        let mut summary = ImportSummary::default();
        let tx = self.conn.unchecked_transaction()?;

        // Habits, building the old-id -> new-id map. Existing habits are
        // mapped either way so their logs can still merge; overwrite updates
        // the habit row in place rather than replacing it.
        let mut habit_ids: HashMap<i64, i64> = HashMap::new();
        for habit in &data.habits {
            let existing: Option<i64> = tx
                .query_row(
                    "SELECT id FROM habits WHERE user_id = ?1 AND name = ?2",
                    params![user_id, habit.name],
                    |row| row.get(0),
                )
                .optional()?;
            match existing {
                Some(existing_id) => {
                    habit_ids.insert(habit.id, existing_id);
                    if overwrite.habits {
                        let days = frequency_days_to_json(&habit.frequency_days)?;
                        tx.execute(
                            "UPDATE habits SET icon = ?1, color = ?2, category = ?3,
                                    frequency_days = ?4, target_count = ?5
                             WHERE id = ?6",
                            params![
                                habit.icon,
                                habit.color,
                                habit.category,
                                days,
                                habit.target_count,
                                existing_id,
                            ],
                        )?;
                        summary.habits_imported += 1;
                    }
                }
                None => {
                    let days = frequency_days_to_json(&habit.frequency_days)?;
                    let created_at = habit.created_at.clone().unwrap_or_else(|| now.clone());
                    tx.execute(
                        "INSERT INTO habits (user_id, name, icon, color, category, frequency_days, target_count, created_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                        params![
                            user_id,
                            habit.name,
                            habit.icon,
                            habit.color,
                            habit.category,
                            days,
                            habit.target_count,
                            created_at,
                        ],
                    )?;
                    habit_ids.insert(habit.id, tx.last_insert_rowid());
                    summary.habits_imported += 1;
                }
            }
        }

        // Logs merge per date: overwrite replaces a clashing day, otherwise
        // the local log wins and only new days land.
        for log in &data.habit_logs {
            let Some(&new_id) = habit_ids.get(&log.habit_id) else {
                continue;
            };
            let sql = if overwrite.habits {
                "INSERT OR REPLACE INTO habit_logs (habit_id, user_id, log_date, completed)
                 VALUES (?1, ?2, ?3, ?4)"
            } else {
                "INSERT OR IGNORE INTO habit_logs (habit_id, user_id, log_date, completed)
                 VALUES (?1, ?2, ?3, ?4)"
            };
            let changed = tx.execute(sql, params![new_id, user_id, log.log_date, log.completed])?;
            if changed > 0 {
                summary.habit_logs_imported += 1;
            }
        }

        for entry in &data.entries {
            let exists: Option<i64> = tx
                .query_row(
                    "SELECT id FROM entries WHERE user_id = ?1 AND entry_date = ?2",
                    params![user_id, entry.entry_date],
                    |row| row.get(0),
                )
                .optional()?;
            let tags = tags_to_json(&entry.tags)?;
            match exists {
                Some(id) => {
                    if !overwrite.entries {
                        continue;
                    }
                    tx.execute(
                        "UPDATE entries SET content = ?1, tags = ?2, mood = ?3, updated_at = ?4
                         WHERE id = ?5",
                        params![entry.content, tags, entry.mood, now, id],
                    )?;
                }
                None => {
                    let created_at = entry.created_at.clone().unwrap_or_else(|| now.clone());
                    let updated_at = entry.updated_at.clone().unwrap_or_else(|| now.clone());
                    tx.execute(
                        "INSERT INTO entries (user_id, entry_date, content, tags, mood, created_at, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                        params![
                            user_id,
                            entry.entry_date,
                            entry.content,
                            tags,
                            entry.mood,
                            created_at,
                            updated_at,
                        ],
                    )?;
                }
            }
            summary.entries_imported += 1;
        }

        let mut next_position: i64 = tx.query_row(
            "SELECT COALESCE(MAX(position) + 1, 0) FROM quick_notes WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        for note in &data.quick_notes {
            let exists: Option<i64> = tx
                .query_row(
                    "SELECT id FROM quick_notes WHERE user_id = ?1 AND content = ?2",
                    params![user_id, note.content],
                    |row| row.get(0),
                )
                .optional()?;
            let tags = tags_to_json(&note.tags)?;
            match exists {
                Some(id) => {
                    if !overwrite.quick_notes {
                        continue;
                    }
                    tx.execute(
                        "UPDATE quick_notes
                         SET title = ?1, color = ?2, pinned = ?3, tags = ?4, type = ?5, updated_at = ?6
                         WHERE id = ?7",
                        params![note.title, note.color, note.pinned, tags, note.note_type, now, id],
                    )?;
                }
                None => {
                    let created_at = note.created_at.clone().unwrap_or_else(|| now.clone());
                    let updated_at = note.updated_at.clone().unwrap_or_else(|| now.clone());
                    tx.execute(
                        "INSERT INTO quick_notes (user_id, title, content, color, pinned, tags, type, position, created_at, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                        params![
                            user_id,
                            note.title,
                            note.content,
                            note.color,
                            note.pinned,
                            tags,
                            note.note_type,
                            next_position,
                            created_at,
                            updated_at,
                        ],
                    )?;
                    next_position += 1;
                }
            }
            summary.quick_notes_imported += 1;
        }

        tx.commit()?;
        Ok(summary)
    }

    // --- Admin ---

    pub fn system_stats(&self) -> Result<SystemStats> {
        let users: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        let entries: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
        let habits: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM habits", [], |row| row.get(0))?;
        let notes: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM quick_notes", [], |row| row.get(0))?;

        // Rough storage estimate from content sizes.
        let content_bytes: i64 = self.conn.query_row(
            "SELECT COALESCE((SELECT SUM(LENGTH(content)) FROM entries), 0)
                  + COALESCE((SELECT SUM(LENGTH(content)) FROM quick_notes), 0)",
            [],
            |row| row.get(0),
        )?;
        #[allow(clippy::cast_precision_loss)]
        let storage_mb = format!("{:.2}", content_bytes as f64 / (1024.0 * 1024.0));

        Ok(SystemStats {
            users,
            entries,
            habits,
            notes,
            storage_mb,
        })
    }

    pub fn list_users_admin(&self) -> Result<Vec<AdminUser>> {
        let mut stmt = self.conn.prepare(
            "SELECT u.id, u.username,
                    (SELECT COUNT(*) FROM entries e WHERE e.user_id = u.id),
                    (SELECT COUNT(*) FROM quick_notes n WHERE n.user_id = u.id),
                    (SELECT MAX(e.created_at) FROM entries e WHERE e.user_id = u.id)
             FROM users u ORDER BY u.id ASC",
        )?;
        let users = stmt
            .query_map([], |row| {
                Ok(AdminUser {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    entry_count: row.get(2)?,
                    note_count: row.get(3)?,
                    last_active: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OverwriteOptions;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn test_db() -> (Database, i64) {
        let db = Database::open_in_memory().unwrap();
        let user = db.create_user("alice", "hash").unwrap();
        (db, user.id)
    }

    fn sample_entry(day: u32) -> NewEntry {
        NewEntry {
            date: date(2024, 6, day),
            content: format!("entry for day {day}"),
            tags: vec!["daily".to_string()],
            mood: Some(3),
        }
    }

    // --- Users ---

    #[test]
    fn test_create_and_get_user() {
        let db = Database::open_in_memory().unwrap();
        let user = db.create_user("alice", "hash").unwrap();
        assert_eq!(user.username, "alice");

        let creds = db.get_user_by_username("alice").unwrap().unwrap();
        assert_eq!(creds.id, user.id);
        assert_eq!(creds.password_hash, "hash");

        assert!(db.get_user_by_username("bob").unwrap().is_none());
        assert!(db.get_user_by_id(user.id).unwrap().is_some());
    }

    #[test]
    fn test_duplicate_username_rejected() {
        let db = Database::open_in_memory().unwrap();
        db.create_user("alice", "hash").unwrap();
        assert!(db.create_user("alice", "other").is_err());
    }

    #[test]
    fn test_delete_user_cascades() {
        let (db, user_id) = test_db();
        db.upsert_entry(user_id, &sample_entry(1)).unwrap();
        let habit = db
            .create_habit(
                user_id,
                &NewHabit {
                    name: "Run".to_string(),
                    icon: None,
                    color: None,
                    category: None,
                    frequency_days: None,
                    target_count: None,
                },
            )
            .unwrap();
        db.toggle_habit(user_id, habit.id, date(2024, 6, 1)).unwrap();
        db.create_note(
            user_id,
            &NewNote {
                title: String::new(),
                content: "milk".to_string(),
                color: None,
                tags: vec![],
                note_type: None,
            },
        )
        .unwrap();

        assert!(db.delete_user(user_id).unwrap());
        assert!(db.get_user_by_id(user_id).unwrap().is_none());
        let stats = db.system_stats().unwrap();
        assert_eq!(stats.users, 0);
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.habits, 0);
        assert_eq!(stats.notes, 0);

        assert!(!db.delete_user(user_id).unwrap());
    }

    // --- Entries ---

    #[test]
    fn test_upsert_entry_overwrites_same_date() {
        let (db, user_id) = test_db();
        let first = db.upsert_entry(user_id, &sample_entry(1)).unwrap();
        assert_eq!(first.entry_date, "2024-06-01");
        assert_eq!(first.tags, vec!["daily"]);

        let second = db
            .upsert_entry(
                user_id,
                &NewEntry {
                    date: date(2024, 6, 1),
                    content: "revised".to_string(),
                    tags: vec![],
                    mood: Some(5),
                },
            )
            .unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.content, "revised");
        assert_eq!(second.mood, Some(5));
        assert!(second.tags.is_empty());

        assert_eq!(db.list_entries(user_id).unwrap().len(), 1);
    }

    #[test]
    fn test_entries_are_scoped_per_user() {
        let (db, alice) = test_db();
        let bob = db.create_user("bob", "hash").unwrap().id;
        db.upsert_entry(alice, &sample_entry(1)).unwrap();

        assert!(db.get_entry(bob, "2024-06-01").unwrap().is_none());
        assert!(db.list_entries(bob).unwrap().is_empty());
    }

    #[test]
    fn test_delete_entry_is_idempotent() {
        let (db, user_id) = test_db();
        db.upsert_entry(user_id, &sample_entry(1)).unwrap();
        db.delete_entry(user_id, "2024-06-01").unwrap();
        assert!(db.get_entry(user_id, "2024-06-01").unwrap().is_none());
        // Second delete of the same date is fine.
        db.delete_entry(user_id, "2024-06-01").unwrap();
    }

    #[test]
    fn test_entry_dates_ascending() {
        let (db, user_id) = test_db();
        db.upsert_entry(user_id, &sample_entry(3)).unwrap();
        db.upsert_entry(user_id, &sample_entry(1)).unwrap();
        db.upsert_entry(user_id, &sample_entry(2)).unwrap();
        assert_eq!(
            db.entry_dates(user_id).unwrap(),
            vec!["2024-06-01", "2024-06-02", "2024-06-03"]
        );
    }

    #[test]
    fn test_search_entries() {
        let (db, user_id) = test_db();
        db.upsert_entry(
            user_id,
            &NewEntry {
                date: date(2024, 6, 1),
                content: "went for a long run".to_string(),
                tags: vec!["fitness".to_string()],
                mood: None,
            },
        )
        .unwrap();
        db.upsert_entry(
            user_id,
            &NewEntry {
                date: date(2024, 6, 2),
                content: "quiet day reading".to_string(),
                tags: vec!["books".to_string()],
                mood: None,
            },
        )
        .unwrap();

        let results = db.search_entries(user_id, Some("run"), &[]).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].entry_date, "2024-06-01");

        let results = db
            .search_entries(user_id, None, &["books".to_string()])
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].entry_date, "2024-06-02");

        // Tag filter must not match substrings of longer tags.
        let results = db
            .search_entries(user_id, None, &["book".to_string()])
            .unwrap();
        assert!(results.is_empty());

        let results = db.search_entries(user_id, Some("pizza"), &[]).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_list_tags_sorted_distinct() {
        let (db, user_id) = test_db();
        db.upsert_entry(
            user_id,
            &NewEntry {
                date: date(2024, 6, 1),
                content: "a".to_string(),
                tags: vec!["zebra".to_string(), "alpha".to_string()],
                mood: None,
            },
        )
        .unwrap();
        db.upsert_entry(
            user_id,
            &NewEntry {
                date: date(2024, 6, 2),
                content: "b".to_string(),
                tags: vec!["alpha".to_string()],
                mood: None,
            },
        )
        .unwrap();
        assert_eq!(db.list_tags(user_id).unwrap(), vec!["alpha", "zebra"]);
    }

    // --- Streaks ---

    #[test]
    fn test_compute_streak_empty() {
        let streak = compute_streak(&[], date(2024, 6, 15));
        assert_eq!(streak.current, 0);
        assert_eq!(streak.longest, 0);
    }

    #[test]
    fn test_compute_streak_today_only() {
        let streak = compute_streak(&[date(2024, 6, 15)], date(2024, 6, 15));
        assert_eq!(streak.current, 1);
        assert_eq!(streak.longest, 1);
    }

    #[test]
    fn test_compute_streak_starts_yesterday() {
        let dates = vec![date(2024, 6, 14), date(2024, 6, 13)];
        let streak = compute_streak(&dates, date(2024, 6, 15));
        assert_eq!(streak.current, 2);
        assert_eq!(streak.longest, 2);
    }

    #[test]
    fn test_compute_streak_broken_by_gap() {
        // Most recent entry two days ago: current resets to 0.
        let dates = vec![date(2024, 6, 13), date(2024, 6, 12), date(2024, 6, 11)];
        let streak = compute_streak(&dates, date(2024, 6, 15));
        assert_eq!(streak.current, 0);
        assert_eq!(streak.longest, 3);
    }

    #[test]
    fn test_compute_streak_longest_exceeds_current() {
        let dates = vec![
            date(2024, 6, 15),
            date(2024, 6, 14),
            // gap
            date(2024, 6, 10),
            date(2024, 6, 9),
            date(2024, 6, 8),
            date(2024, 6, 7),
        ];
        let streak = compute_streak(&dates, date(2024, 6, 15));
        assert_eq!(streak.current, 2);
        assert_eq!(streak.longest, 4);
    }

    #[test]
    fn test_entry_streak_from_db() {
        let (db, user_id) = test_db();
        db.upsert_entry(user_id, &sample_entry(15)).unwrap();
        db.upsert_entry(user_id, &sample_entry(14)).unwrap();
        db.upsert_entry(user_id, &sample_entry(12)).unwrap();

        let streak = db.entry_streak(user_id, date(2024, 6, 15)).unwrap();
        assert_eq!(streak.current, 2);
        assert_eq!(streak.longest, 2);
    }

    // --- Stats ---

    #[test]
    fn test_entry_stats() {
        let (db, user_id) = test_db();
        db.upsert_entry(
            user_id,
            &NewEntry {
                date: date(2024, 6, 1),
                content: "one two three".to_string(),
                tags: vec![],
                mood: Some(4),
            },
        )
        .unwrap();
        db.upsert_entry(
            user_id,
            &NewEntry {
                date: date(2024, 6, 2),
                content: "four five".to_string(),
                tags: vec![],
                mood: Some(4),
            },
        )
        .unwrap();

        let stats = db.entry_stats(user_id).unwrap();
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.total_words, 5);
        assert_eq!(stats.avg_words_per_entry, 3); // 2.5 rounds up
        assert_eq!(stats.mood_distribution[&4], 2);
        assert_eq!(stats.mood_distribution[&1], 0);
    }

    #[test]
    fn test_entry_stats_empty() {
        let (db, user_id) = test_db();
        let stats = db.entry_stats(user_id).unwrap();
        assert_eq!(stats.total_entries, 0);
        assert_eq!(stats.total_words, 0);
        assert_eq!(stats.avg_words_per_entry, 0);
        assert_eq!(stats.mood_distribution.len(), 5);
    }

    // --- Habits ---

    fn sample_habit(name: &str) -> NewHabit {
        NewHabit {
            name: name.to_string(),
            icon: Some("🏃".to_string()),
            color: None,
            category: Some("Health".to_string()),
            frequency_days: Some(vec![1, 3, 5]),
            target_count: None,
        }
    }

    #[test]
    fn test_create_habit_defaults() {
        let (db, user_id) = test_db();
        let habit = db
            .create_habit(
                user_id,
                &NewHabit {
                    name: "Meditate".to_string(),
                    icon: None,
                    color: None,
                    category: None,
                    frequency_days: None,
                    target_count: None,
                },
            )
            .unwrap();
        assert_eq!(habit.icon, "✅");
        assert_eq!(habit.color, "#8B5CF6");
        assert_eq!(habit.category, "General");
        assert_eq!(habit.frequency_days, vec![0, 1, 2, 3, 4, 5, 6]);
        assert_eq!(habit.target_count, 1);
    }

    #[test]
    fn test_toggle_habit_roundtrip() {
        let (db, user_id) = test_db();
        let habit = db.create_habit(user_id, &sample_habit("Run")).unwrap();
        let day = date(2024, 6, 15);

        assert_eq!(db.toggle_habit(user_id, habit.id, day).unwrap(), Some(true));
        assert_eq!(
            db.toggle_habit(user_id, habit.id, day).unwrap(),
            Some(false)
        );
        assert_eq!(db.toggle_habit(user_id, habit.id, day).unwrap(), Some(true));
    }

    #[test]
    fn test_toggle_habit_not_owned() {
        let (db, alice) = test_db();
        let bob = db.create_user("bob", "hash").unwrap().id;
        let habit = db.create_habit(alice, &sample_habit("Run")).unwrap();
        assert_eq!(
            db.toggle_habit(bob, habit.id, date(2024, 6, 15)).unwrap(),
            None
        );
    }

    #[test]
    fn test_habits_with_status() {
        let (db, user_id) = test_db();
        let habit = db.create_habit(user_id, &sample_habit("Run")).unwrap();
        let today = date(2024, 6, 15);
        db.toggle_habit(user_id, habit.id, today).unwrap();
        db.toggle_habit(user_id, habit.id, date(2024, 6, 14)).unwrap();

        let habits = db.list_habits_with_status(user_id, today).unwrap();
        assert_eq!(habits.len(), 1);
        assert!(habits[0].completed_today);
        assert_eq!(habits[0].streak, 2);
    }

    #[test]
    fn test_habit_streak_ignores_uncompleted_logs() {
        let (db, user_id) = test_db();
        let habit = db.create_habit(user_id, &sample_habit("Run")).unwrap();
        let today = date(2024, 6, 15);
        // Toggle on then off: the log row exists but counts as incomplete.
        db.toggle_habit(user_id, habit.id, today).unwrap();
        db.toggle_habit(user_id, habit.id, today).unwrap();

        let habits = db.list_habits_with_status(user_id, today).unwrap();
        assert!(!habits[0].completed_today);
        assert_eq!(habits[0].streak, 0);
    }

    #[test]
    fn test_delete_habit_removes_logs() {
        let (db, user_id) = test_db();
        let habit = db.create_habit(user_id, &sample_habit("Run")).unwrap();
        db.toggle_habit(user_id, habit.id, date(2024, 6, 15)).unwrap();

        assert!(db.delete_habit(user_id, habit.id).unwrap());
        assert!(db.get_habit(user_id, habit.id).unwrap().is_none());
        let stats = db.system_stats().unwrap();
        assert_eq!(stats.habits, 0);

        assert!(!db.delete_habit(user_id, habit.id).unwrap());
    }

    #[test]
    fn test_habit_history_window() {
        let (db, user_id) = test_db();
        let habit = db.create_habit(user_id, &sample_habit("Run")).unwrap();
        let today = date(2024, 6, 15);
        db.toggle_habit(user_id, habit.id, today).unwrap();
        db.toggle_habit(user_id, habit.id, date(2024, 6, 13)).unwrap();

        let history = db
            .habit_history(user_id, habit.id, 7, today)
            .unwrap()
            .unwrap();
        assert_eq!(history.len(), 7);
        assert_eq!(history[0].date, "2024-06-15");
        assert!(history[0].completed);
        assert!(!history[1].completed);
        assert!(history[2].completed);
        assert_eq!(history[6].date, "2024-06-09");

        let bob = db.create_user("bob", "hash").unwrap().id;
        assert!(db.habit_history(bob, habit.id, 7, today).unwrap().is_none());
    }

    // --- Insights ---

    #[test]
    fn test_habit_insights_week() {
        let (db, user_id) = test_db();
        let run = db.create_habit(user_id, &sample_habit("Run")).unwrap();
        let read = db.create_habit(user_id, &sample_habit("Read")).unwrap();
        let today = date(2024, 6, 15);

        for offset in 0..3 {
            db.toggle_habit(user_id, run.id, today - chrono::Duration::days(offset))
                .unwrap();
        }
        db.toggle_habit(user_id, read.id, today).unwrap();
        // Outside the 7-day window.
        db.toggle_habit(user_id, read.id, date(2024, 5, 1)).unwrap();

        let insights = db
            .habit_insights(user_id, InsightRange::Week, today)
            .unwrap();
        assert_eq!(insights.total_completions, 4);
        assert_eq!(insights.habit_stats.len(), 2);
        assert_eq!(insights.habit_stats[0].name, "Run");
        assert_eq!(insights.habit_stats[0].completion_count, 3);
        assert_eq!(insights.habit_stats[0].rate, 43); // 3/7 rounds to 43%
        assert_eq!(insights.habit_stats[1].completion_count, 1);
    }

    #[test]
    fn test_habit_insights_all_range_rate_is_zero() {
        let (db, user_id) = test_db();
        let habit = db.create_habit(user_id, &sample_habit("Run")).unwrap();
        let today = date(2024, 6, 15);
        db.toggle_habit(user_id, habit.id, today).unwrap();
        db.toggle_habit(user_id, habit.id, date(2023, 1, 1)).unwrap();

        let insights = db.habit_insights(user_id, InsightRange::All, today).unwrap();
        assert_eq!(insights.total_completions, 2);
        assert_eq!(insights.habit_stats[0].completion_count, 2);
        assert_eq!(insights.habit_stats[0].rate, 0);
    }

    #[test]
    fn test_habit_insights_today_range() {
        let (db, user_id) = test_db();
        let habit = db.create_habit(user_id, &sample_habit("Run")).unwrap();
        let today = date(2024, 6, 15);
        db.toggle_habit(user_id, habit.id, today).unwrap();
        db.toggle_habit(user_id, habit.id, date(2024, 6, 14)).unwrap();

        let insights = db
            .habit_insights(user_id, InsightRange::Today, today)
            .unwrap();
        assert_eq!(insights.total_completions, 1);
        assert_eq!(insights.habit_stats[0].rate, 100);
    }

    #[test]
    fn test_habit_insights_best_day() {
        let (db, user_id) = test_db();
        let habit = db.create_habit(user_id, &sample_habit("Run")).unwrap();
        let today = date(2024, 6, 15);
        // 2024-06-09 and 2024-06-02 are both Sundays.
        db.toggle_habit(user_id, habit.id, date(2024, 6, 9)).unwrap();
        db.toggle_habit(user_id, habit.id, date(2024, 6, 2)).unwrap();
        db.toggle_habit(user_id, habit.id, date(2024, 6, 10)).unwrap();

        let insights = db
            .habit_insights(user_id, InsightRange::Month, today)
            .unwrap();
        assert_eq!(insights.best_day, "Sunday");
    }

    #[test]
    fn test_habit_insights_empty() {
        let (db, user_id) = test_db();
        let insights = db
            .habit_insights(user_id, InsightRange::Month, date(2024, 6, 15))
            .unwrap();
        assert_eq!(insights.total_completions, 0);
        assert!(insights.habit_stats.is_empty());
        assert_eq!(insights.best_day, "N/A");
    }

    // --- Notes ---

    fn sample_note(content: &str) -> NewNote {
        NewNote {
            title: String::new(),
            content: content.to_string(),
            color: None,
            tags: vec![],
            note_type: None,
        }
    }

    #[test]
    fn test_create_note_appends_position() {
        let (db, user_id) = test_db();
        let first = db.create_note(user_id, &sample_note("a")).unwrap();
        let second = db.create_note(user_id, &sample_note("b")).unwrap();
        assert_eq!(first.position, 0);
        assert_eq!(second.position, 1);
        assert_eq!(first.color, "#FFE066");
        assert_eq!(first.note_type, "text");
        assert!(!first.pinned);
    }

    #[test]
    fn test_update_note_partial_fields() {
        let (db, user_id) = test_db();
        let note = db.create_note(user_id, &sample_note("draft")).unwrap();

        let updated = db
            .update_note(
                user_id,
                note.id,
                &UpdateNote {
                    content: "final".to_string(),
                    title: Some("Title".to_string()),
                    ..UpdateNote::default()
                },
            )
            .unwrap()
            .unwrap();
        assert_eq!(updated.content, "final");
        assert_eq!(updated.title, "Title");
        // Untouched fields survive.
        assert_eq!(updated.color, "#FFE066");
        assert_eq!(updated.note_type, "text");

        assert!(db
            .update_note(user_id, 999, &UpdateNote::default())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_toggle_pin() {
        let (db, user_id) = test_db();
        let note = db.create_note(user_id, &sample_note("pin me")).unwrap();
        assert_eq!(db.toggle_pin(user_id, note.id).unwrap(), Some(true));
        assert_eq!(db.toggle_pin(user_id, note.id).unwrap(), Some(false));
        assert_eq!(db.toggle_pin(user_id, 999).unwrap(), None);
    }

    #[test]
    fn test_reorder_notes() {
        let (db, user_id) = test_db();
        let a = db.create_note(user_id, &sample_note("a")).unwrap();
        let b = db.create_note(user_id, &sample_note("b")).unwrap();
        let c = db.create_note(user_id, &sample_note("c")).unwrap();

        db.reorder_notes(user_id, &[c.id, a.id, b.id]).unwrap();
        let notes = db.list_notes(user_id).unwrap();
        assert_eq!(notes[0].id, c.id);
        assert_eq!(notes[1].id, a.id);
        assert_eq!(notes[2].id, b.id);
        assert_eq!(notes[0].position, 0);
        assert_eq!(notes[2].position, 2);
    }

    #[test]
    fn test_delete_note_scoped() {
        let (db, alice) = test_db();
        let bob = db.create_user("bob", "hash").unwrap().id;
        let note = db.create_note(alice, &sample_note("mine")).unwrap();

        assert!(!db.delete_note(bob, note.id).unwrap());
        assert!(db.delete_note(alice, note.id).unwrap());
        assert!(!db.delete_note(alice, note.id).unwrap());
    }

    // --- Backup ---

    fn seeded_db() -> (Database, i64) {
        let (db, user_id) = test_db();
        db.upsert_entry(user_id, &sample_entry(1)).unwrap();
        db.upsert_entry(user_id, &sample_entry(2)).unwrap();
        let habit = db.create_habit(user_id, &sample_habit("Run")).unwrap();
        db.toggle_habit(user_id, habit.id, date(2024, 6, 1)).unwrap();
        db.create_note(user_id, &sample_note("milk")).unwrap();
        (db, user_id)
    }

    #[test]
    fn test_export_backup_shape() {
        let (db, user_id) = seeded_db();
        let backup = db.export_backup(user_id).unwrap();
        assert_eq!(backup.version, 1);
        assert_eq!(backup.data.entries.len(), 2);
        assert_eq!(backup.data.habits.len(), 1);
        assert_eq!(backup.data.habit_logs.len(), 1);
        assert_eq!(backup.data.quick_notes.len(), 1);
        assert_eq!(backup.data.habit_logs[0].habit_id, backup.data.habits[0].id);
    }

    #[test]
    fn test_export_only_includes_own_data() {
        let (db, alice) = seeded_db();
        let bob = db.create_user("bob", "hash").unwrap().id;
        db.upsert_entry(bob, &sample_entry(9)).unwrap();

        let backup = db.export_backup(alice).unwrap();
        assert_eq!(backup.data.entries.len(), 2);
        assert!(backup
            .data
            .entries
            .iter()
            .all(|e| e.entry_date != "2024-06-09"));
    }

    #[test]
    fn test_import_into_fresh_account() {
        let (db, alice) = seeded_db();
        let backup = db.export_backup(alice).unwrap();
        let bob = db.create_user("bob", "hash").unwrap().id;

        let summary = db
            .import_backup(bob, &backup.data, OverwriteOptions::default())
            .unwrap();
        assert_eq!(summary.entries_imported, 2);
        assert_eq!(summary.habits_imported, 1);
        assert_eq!(summary.habit_logs_imported, 1);
        assert_eq!(summary.quick_notes_imported, 1);

        let habits = db.list_habits_with_status(bob, date(2024, 6, 1)).unwrap();
        assert_eq!(habits.len(), 1);
        assert!(habits[0].completed_today);
    }

    #[test]
    fn test_reimport_without_overwrite_is_noop() {
        let (db, user_id) = seeded_db();
        let backup = db.export_backup(user_id).unwrap();

        let conflicts = db.check_import_conflicts(user_id, &backup.data).unwrap();
        assert_eq!(conflicts.entries, 2);
        assert_eq!(conflicts.habits, 1);
        assert_eq!(conflicts.quick_notes, 1);

        let summary = db
            .import_backup(user_id, &backup.data, OverwriteOptions::default())
            .unwrap();
        assert_eq!(summary.entries_imported, 0);
        assert_eq!(summary.habits_imported, 0);
        assert_eq!(summary.habit_logs_imported, 0);
        assert_eq!(summary.quick_notes_imported, 0);

        assert_eq!(db.list_entries(user_id).unwrap().len(), 2);
        assert_eq!(db.list_notes(user_id).unwrap().len(), 1);
    }

    #[test]
    fn test_import_overwrite_entries() {
        let (db, user_id) = seeded_db();
        let mut backup = db.export_backup(user_id).unwrap();
        backup.data.entries[0].content = "from backup".to_string();
        let target_date = backup.data.entries[0].entry_date.clone();

        let summary = db
            .import_backup(
                user_id,
                &backup.data,
                OverwriteOptions {
                    entries: true,
                    ..OverwriteOptions::default()
                },
            )
            .unwrap();
        assert_eq!(summary.entries_imported, 2);
        assert_eq!(summary.habits_imported, 0);

        let entry = db.get_entry(user_id, &target_date).unwrap().unwrap();
        assert_eq!(entry.content, "from backup");
    }

    #[test]
    fn test_import_overwrite_habits_updates_in_place() {
        let (db, user_id) = seeded_db();
        let habit_id = db
            .list_habits_with_status(user_id, date(2024, 6, 1))
            .unwrap()[0]
            .habit
            .id;
        // A local log the backup does not know about.
        db.toggle_habit(user_id, habit_id, date(2024, 6, 5)).unwrap();

        let mut backup = db.export_backup(user_id).unwrap();
        backup.data.habits[0].icon = "🚴".to_string();
        backup.data.habit_logs.retain(|log| log.log_date == "2024-06-01");

        let summary = db
            .import_backup(
                user_id,
                &backup.data,
                OverwriteOptions {
                    habits: true,
                    ..OverwriteOptions::default()
                },
            )
            .unwrap();
        assert_eq!(summary.habits_imported, 1);
        assert_eq!(summary.habit_logs_imported, 1);

        // Same row, new attributes; the local-only log survives.
        let habit = db.get_habit(user_id, habit_id).unwrap().unwrap();
        assert_eq!(habit.icon, "🚴");
        let history = db
            .habit_history(user_id, habit_id, 30, date(2024, 6, 30))
            .unwrap()
            .unwrap();
        assert!(history.iter().any(|d| d.date == "2024-06-01" && d.completed));
        assert!(history.iter().any(|d| d.date == "2024-06-05" && d.completed));
    }

    #[test]
    fn test_import_merges_new_logs_for_existing_habit() {
        let (db, user_id) = seeded_db();
        let mut backup = db.export_backup(user_id).unwrap();
        let backup_habit_id = backup.data.habits[0].id;
        backup.data.habit_logs.push(BackupHabitLog {
            id: 0,
            habit_id: backup_habit_id,
            log_date: "2024-06-03".to_string(),
            completed: 1,
        });

        let summary = db
            .import_backup(user_id, &backup.data, OverwriteOptions::default())
            .unwrap();
        // The habit itself is skipped, but its new-day log still lands.
        assert_eq!(summary.habits_imported, 0);
        assert_eq!(summary.habit_logs_imported, 1);

        let history = db
            .habit_history(user_id, backup_habit_id, 30, date(2024, 6, 30))
            .unwrap()
            .unwrap();
        assert!(history.iter().any(|d| d.date == "2024-06-03" && d.completed));
    }

    #[test]
    fn test_import_without_overwrite_keeps_local_log_state() {
        let (db, user_id) = seeded_db();
        let habit_id = db
            .list_habits_with_status(user_id, date(2024, 6, 1))
            .unwrap()[0]
            .habit
            .id;
        let mut backup = db.export_backup(user_id).unwrap();
        backup.data.habit_logs[0].completed = 0;

        let summary = db
            .import_backup(user_id, &backup.data, OverwriteOptions::default())
            .unwrap();
        assert_eq!(summary.habit_logs_imported, 0);

        // The local completed log wins over the backup's uncompleted one.
        let history = db
            .habit_history(user_id, habit_id, 30, date(2024, 6, 30))
            .unwrap()
            .unwrap();
        assert!(history.iter().any(|d| d.date == "2024-06-01" && d.completed));
    }

    #[test]
    fn test_import_logs_skipped_when_habit_skipped() {
        let (db, user_id) = seeded_db();
        let mut backup = db.export_backup(user_id).unwrap();
        // A log for a habit id the backup does not contain.
        backup.data.habit_logs.push(BackupHabitLog {
            id: 0,
            habit_id: 9999,
            log_date: "2024-06-03".to_string(),
            completed: 1,
        });

        let summary = db
            .import_backup(user_id, &backup.data, OverwriteOptions::default())
            .unwrap();
        assert_eq!(summary.habit_logs_imported, 0);
    }

    // --- Admin ---

    #[test]
    fn test_system_stats_counts() {
        let (db, _user_id) = seeded_db();
        let stats = db.system_stats().unwrap();
        assert_eq!(stats.users, 1);
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.habits, 1);
        assert_eq!(stats.notes, 1);
        assert!(stats.storage_mb.parse::<f64>().is_ok());
    }

    #[test]
    fn test_list_users_admin() {
        let (db, alice) = seeded_db();
        db.create_user("bob", "hash").unwrap();

        let users = db.list_users_admin().unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].id, alice);
        assert_eq!(users[0].entry_count, 2);
        assert_eq!(users[0].note_count, 1);
        assert!(users[0].last_active.is_some());
        assert_eq!(users[1].entry_count, 0);
        assert!(users[1].last_active.is_none());
    }
}
