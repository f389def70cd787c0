// src/history/models.rs

//! Row models and value types for the revision store

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::str::FromStr;

/// Length of the public (short) revision identifier
pub const SHORT_ID_LEN: usize = 8;

/// Kind of operation a revision records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevisionType {
    Install,
    Update,
    Rollback,
    ConfigChange,
}

impl RevisionType {
    pub fn as_str(&self) -> &str {
        match self {
            RevisionType::Install => "INSTALL",
            RevisionType::Update => "UPDATE",
            RevisionType::Rollback => "ROLLBACK",
            RevisionType::ConfigChange => "CONFIG_CHANGE",
        }
    }
}

impl FromStr for RevisionType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INSTALL" => Ok(RevisionType::Install),
            "UPDATE" => Ok(RevisionType::Update),
            "ROLLBACK" => Ok(RevisionType::Rollback),
            "CONFIG_CHANGE" => Ok(RevisionType::ConfigChange),
            _ => Err(format!("Invalid revision type: {}", s)),
        }
    }
}

impl std::fmt::Display for RevisionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable committed snapshot, as exposed to callers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedState {
    /// Short, stable prefix of the revision content hash
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: RevisionType,
    pub summary: String,
}

impl std::fmt::Display for SavedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {} {}",
            self.id,
            self.timestamp.to_rfc3339(),
            self.kind
        )?;
        if !self.summary.is_empty() {
            write!(f, " {}", self.summary)?;
        }
        Ok(())
    }
}

/// A revision row in the commit log
#[derive(Debug, Clone)]
pub struct Revision {
    pub seq: i64,
    pub hash: String,
    pub message: String,
    pub author: String,
    pub committed_at: String,
}

impl Revision {
    /// Insert this revision into the log
    pub fn insert(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "INSERT INTO revisions (hash, message, author, committed_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![&self.hash, &self.message, &self.author, &self.committed_at],
        )?;
        Ok(())
    }

    /// The most recent revision, if any
    pub fn head(conn: &Connection) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(
            "SELECT seq, hash, message, author, committed_at FROM revisions
             ORDER BY seq DESC LIMIT 1",
        )?;
        let revision = stmt.query_row([], Self::from_row).optional()?;
        Ok(revision)
    }

    /// Walk the full log, newest first
    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT seq, hash, message, author, committed_at FROM revisions
             ORDER BY committed_at DESC, seq DESC",
        )?;
        let revisions = stmt
            .query_map([], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(revisions)
    }

    /// Look up a revision by any unique hash prefix
    pub fn find_by_prefix(conn: &Connection, prefix: &str) -> Result<Self> {
        if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::RevisionNotFound(prefix.to_string()));
        }

        let pattern = format!("{}%", prefix);
        let mut stmt = conn.prepare(
            "SELECT seq, hash, message, author, committed_at FROM revisions
             WHERE hash LIKE ?1 ORDER BY seq DESC LIMIT 2",
        )?;
        let matches = stmt
            .query_map([&pattern], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut matches = matches.into_iter();
        match (matches.next(), matches.next()) {
            (Some(revision), None) => Ok(revision),
            (Some(_), Some(_)) => Err(Error::Argument(format!(
                "Revision prefix '{}' is ambiguous",
                prefix
            ))),
            (None, _) => Err(Error::RevisionNotFound(prefix.to_string())),
        }
    }

    /// The parent revision of this one, if any
    pub fn parent(&self, conn: &Connection) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(
            "SELECT seq, hash, message, author, committed_at FROM revisions
             WHERE seq < ?1 ORDER BY seq DESC LIMIT 1",
        )?;
        let revision = stmt.query_row([self.seq], Self::from_row).optional()?;
        Ok(revision)
    }

    /// All snapshot files belonging to this revision
    pub fn files(&self, conn: &Connection) -> Result<Vec<RevisionFile>> {
        RevisionFile::find_by_revision(conn, &self.hash)
    }

    /// One snapshot file of this revision by name
    pub fn file(&self, conn: &Connection, file_name: &str) -> Result<Option<RevisionFile>> {
        RevisionFile::find(conn, &self.hash, file_name)
    }

    pub fn short_id(&self) -> &str {
        &self.hash[..SHORT_ID_LEN.min(self.hash.len())]
    }

    /// Parse this row into a SavedState: leading message token is the type
    /// (case-insensitive), the remainder is the summary.
    pub fn to_saved_state(&self) -> Result<SavedState> {
        let trimmed = self.message.trim();
        let (type_token, summary) = match trimmed.split_once(' ') {
            Some((t, rest)) => (t.trim(), rest.trim()),
            None => (trimmed, ""),
        };

        let kind = type_token
            .parse::<RevisionType>()
            .map_err(|e| Error::Argument(e))?;
        let timestamp = DateTime::parse_from_rfc3339(&self.committed_at)
            .map_err(|e| Error::Argument(format!("Invalid revision timestamp: {}", e)))?
            .with_timezone(&Utc);

        Ok(SavedState {
            id: self.short_id().to_string(),
            timestamp,
            kind,
            summary: summary.to_string(),
        })
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            seq: row.get(0)?,
            hash: row.get(1)?,
            message: row.get(2)?,
            author: row.get(3)?,
            committed_at: row.get(4)?,
        })
    }
}

/// One tracked file's content snapshot within a revision
#[derive(Debug, Clone)]
pub struct RevisionFile {
    pub revision_hash: String,
    pub file_name: String,
    pub content: Vec<u8>,
    pub sha256: String,
}

impl RevisionFile {
    /// Insert this snapshot file
    pub fn insert(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "INSERT INTO revision_files (revision_hash, file_name, content, sha256)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                &self.revision_hash,
                &self.file_name,
                &self.content,
                &self.sha256,
            ],
        )?;
        Ok(())
    }

    /// All snapshot files of a revision
    pub fn find_by_revision(conn: &Connection, revision_hash: &str) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT revision_hash, file_name, content, sha256 FROM revision_files
             WHERE revision_hash = ?1 ORDER BY file_name",
        )?;
        let files = stmt
            .query_map([revision_hash], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(files)
    }

    /// A single snapshot file of a revision by name
    pub fn find(conn: &Connection, revision_hash: &str, file_name: &str) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(
            "SELECT revision_hash, file_name, content, sha256 FROM revision_files
             WHERE revision_hash = ?1 AND file_name = ?2",
        )?;
        let file = stmt
            .query_row(params![revision_hash, file_name], Self::from_row)
            .optional()?;
        Ok(file)
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            revision_hash: row.get(0)?,
            file_name: row.get(1)?,
            content: row.get(2)?,
            sha256: row.get(3)?,
        })
    }
}
