//! Durable notes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Note identifier.
pub type NoteId = Uuid;

/// Where a note is known to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Only in the local store.
    Local,
    /// Only reported by the remote mirror.
    Remote,
    /// Local, and confirmed by the remote mirror.
    Both,
}

/// A small text record that must stay readable even when the remote side
/// cannot serve it back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Unique note identifier.
    pub id: NoteId,
    /// Note body.
    pub text: String,
    /// Category, e.g. `insight`.
    pub category: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Where the note is known to exist.
    pub origin: Origin,
}

impl Note {
    /// Create a local note stamped with the current time.
    #[must_use]
    pub fn new(text: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            category: category.into(),
            created_at: Utc::now(),
            origin: Origin::Local,
        }
    }

    /// Whether the remote mirror is known to hold this note.
    #[must_use]
    pub const fn is_mirrored(&self) -> bool {
        matches!(self.origin, Origin::Remote | Origin::Both)
    }
}

/// A note as reported by the remote mirror.
///
/// Remote memos do not always carry timestamps; such entries match local
/// notes on text alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirroredNote {
    /// Note body.
    pub text: String,
    /// Creation time, when the remote side reports one.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl MirroredNote {
    /// Create a mirrored note without a timestamp.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            created_at: None,
        }
    }

    /// Whether this remote entry denotes the given local note.
    #[must_use]
    pub fn matches(&self, note: &Note) -> bool {
        self.text == note.text && self.created_at.is_none_or(|t| t == note.created_at)
    }
}
