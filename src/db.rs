//! Database module for the influence engine
//!
//! Provides persistence for users, chat messages and the coaching instruction.

mod schema;

pub use schema::*;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("User not found: {0}")]
    UserNotFound(String),
    #[error("Instruction not found: {0}")]
    InstructionNotFound(i64),
}

pub type DbResult<T> = Result<T, DbError>;

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    #[allow(dead_code)] // Used in tests
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run_migrations(&self) -> DbResult<()> {
        self.conn().execute_batch(SCHEMA)?;
        Ok(())
    }

    // ==================== Message Operations ====================

    /// Append a message to a session
    pub fn insert_message(
        &self,
        id: &str,
        user_id: &str,
        session_id: &str,
        content: &str,
        role: Role,
        created_at: DateTime<Utc>,
    ) -> DbResult<StoredMessage> {
        let conn = self.conn();

        let sequence_id: i64 = conn.query_row(
            "SELECT COALESCE(MAX(sequence_id), 0) + 1 FROM messages WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;

        conn.execute(
            "INSERT INTO messages
             (id, user_id, session_id, sequence_id, message_content, message_role, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id,
                user_id,
                session_id,
                sequence_id,
                content,
                role.as_str(),
                format_datetime(created_at),
            ],
        )?;

        Ok(StoredMessage {
            id: id.to_string(),
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            sequence_id,
            content: content.to_string(),
            role,
            created_at,
        })
    }

    /// All of a user's messages with one of `roles`, newest first
    pub fn list_messages_by_user(
        &self,
        user_id: &str,
        roles: &[Role],
    ) -> DbResult<Vec<StoredMessage>> {
        if roles.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn();
        let sql = format!(
            "SELECT id, user_id, session_id, sequence_id, message_content, message_role, created_at
             FROM messages WHERE user_id = ?1 AND message_role IN ({})
             ORDER BY created_at DESC, rowid DESC",
            role_placeholders(roles.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let bind = std::iter::once(user_id).chain(roles.iter().map(|r| r.as_str()));
        let rows = stmt.query_map(params_from_iter(bind), parse_message_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// Messages of one session with one of `roles`, oldest first.
    ///
    /// Ordered by creation time; `sequence_id` reflects insert completion
    /// order and only breaks ties.
    pub fn list_messages_by_session(
        &self,
        session_id: &str,
        roles: &[Role],
    ) -> DbResult<Vec<StoredMessage>> {
        if roles.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn();
        let sql = format!(
            "SELECT id, user_id, session_id, sequence_id, message_content, message_role, created_at
             FROM messages WHERE session_id = ?1 AND message_role IN ({})
             ORDER BY created_at ASC, sequence_id ASC",
            role_placeholders(roles.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let bind = std::iter::once(session_id).chain(roles.iter().map(|r| r.as_str()));
        let rows = stmt.query_map(params_from_iter(bind), parse_message_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    // ==================== User Operations ====================

    /// Create or update a user profile
    pub fn upsert_user(&self, profile: &UserProfile) -> DbResult<()> {
        let now = format_datetime(Utc::now());
        self.conn().execute(
            "INSERT INTO users
             (user_id, name, email, influence_style, color, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT(user_id) DO UPDATE SET
                name = excluded.name,
                email = excluded.email,
                influence_style = excluded.influence_style,
                color = excluded.color,
                updated_at = excluded.updated_at",
            params![
                profile.user_id,
                profile.name,
                profile.email,
                profile.influence_style,
                profile.color,
                now,
            ],
        )?;
        Ok(())
    }

    pub fn get_user(&self, user_id: &str) -> DbResult<UserProfile> {
        self.conn()
            .query_row(
                "SELECT user_id, name, email, influence_style, color FROM users WHERE user_id = ?1",
                params![user_id],
                parse_user_row,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => DbError::UserNotFound(user_id.to_string()),
                other => DbError::Sqlite(other),
            })
    }

    /// Every profile, ordered by name for the admin console
    pub fn list_users(&self) -> DbResult<Vec<UserProfile>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT user_id, name, email, influence_style, color FROM users
             ORDER BY name COLLATE NOCASE ASC, user_id ASC",
        )?;
        let rows = stmt.query_map([], parse_user_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    // ==================== Instruction Operations ====================

    /// Coaching instruction text by row id
    pub fn get_instruction(&self, id: i64) -> DbResult<String> {
        self.conn()
            .query_row(
                "SELECT instruction FROM instructions WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(DbError::InstructionNotFound(id))
    }

    pub fn set_instruction(&self, id: i64, instruction: &str) -> DbResult<()> {
        self.conn().execute(
            "INSERT INTO instructions (id, instruction) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET instruction = excluded.instruction",
            params![id, instruction],
        )?;
        Ok(())
    }
}

fn role_placeholders(count: usize) -> String {
    (0..count)
        .map(|i| format!("?{}", i + 2))
        .collect::<Vec<_>>()
        .join(", ")
}

fn parse_user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserProfile> {
    Ok(UserProfile {
        user_id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        influence_style: row.get(3)?,
        color: row.get(4)?,
    })
}

/// Parse a message row from the database
fn parse_message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage> {
    let role_str: String = row.get(5)?;
    let role = role_str.parse::<Role>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, Type::Text, e.into())
    })?;
    let created_str: String = row.get(6)?;
    let created_at = parse_datetime(&created_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e))
    })?;

    Ok(StoredMessage {
        id: row.get(0)?,
        user_id: row.get(1)?,
        session_id: row.get(2)?,
        sequence_id: row.get(3)?,
        content: row.get(4)?,
        role,
        created_at,
    })
}

/// Fixed-width timestamps keep lexical order equal to chronological order
fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}
