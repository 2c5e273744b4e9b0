//! Local-first notes with a best-effort remote mirror.
//!
//! Every note is written to local storage before anything touches the
//! network, so a note is never lost to a remote failure. The remote copy is
//! pushed in the background (or awaited, on request) and remote reads are
//! merged with the local notes, falling back to local alone when the remote
//! side fails or times out.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use mcp_resilience_core::{MirroredNote, Note, NoteMirror, NoteStorage, Origin};
use mcp_resilience_executor::{Interrupted, with_timeout};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use uuid::Uuid;

use crate::lifecycle::TaskScope;

/// Default deadline for remote note writes and reads.
pub const DEFAULT_NOTE_TIMEOUT: Duration = Duration::from_secs(5);

/// Remote mirror deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallbackConfig {
    pub write_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            write_timeout: DEFAULT_NOTE_TIMEOUT,
            read_timeout: DEFAULT_NOTE_TIMEOUT,
        }
    }
}

/// Note store that degrades to local storage.
pub struct FallbackStore {
    local: Arc<dyn NoteStorage>,
    mirror: Option<Arc<dyn NoteMirror>>,
    config: FallbackConfig,
    tasks: TaskTracker,
    cancel: CancellationToken,
}

impl FallbackStore {
    /// Create a store without a remote mirror.
    #[must_use]
    pub fn new(local: Arc<dyn NoteStorage>, config: FallbackConfig) -> Self {
        Self {
            local,
            mirror: None,
            config,
            tasks: TaskTracker::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Attach a remote mirror.
    #[must_use]
    pub fn with_mirror(mut self, mirror: Arc<dyn NoteMirror>) -> Self {
        self.mirror = Some(mirror);
        self
    }

    /// Tie remote calls to an outer cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Background push tasks as a resource the session lifecycle releases.
    #[must_use]
    pub fn task_scope(&self) -> TaskScope {
        TaskScope::new("note-mirror", self.tasks.clone(), self.cancel.clone())
    }

    /// Store a note locally and push it to the mirror in the background.
    ///
    /// Returns the local record right away; a failed push is only logged.
    /// Must be called from within a Tokio runtime when a mirror is set.
    pub fn append(&self, text: impl Into<String>, category: impl Into<String>) -> Note {
        let note = Note::new(text, category);
        self.local.insert(note.clone());

        if let Some(mirror) = self.mirror_for(&note.category) {
            let local = Arc::clone(&self.local);
            let mirror = Arc::clone(mirror);
            let pending = note.clone();
            let deadline = self.config.write_timeout;
            let cancel = self.cancel.clone();
            self.tasks.spawn(async move {
                push(local.as_ref(), mirror.as_ref(), pending, deadline, &cancel).await;
            });
        }
        note
    }

    /// Store a note locally and wait for the mirror push to finish.
    ///
    /// The returned note has origin `Both` when the push succeeded and
    /// `Local` otherwise.
    pub async fn append_confirmed(
        &self,
        text: impl Into<String>,
        category: impl Into<String>,
    ) -> Note {
        let note = Note::new(text, category);
        self.local.insert(note.clone());

        match self.mirror_for(&note.category) {
            Some(mirror) => {
                push(
                    self.local.as_ref(),
                    mirror.as_ref(),
                    note,
                    self.config.write_timeout,
                    &self.cancel,
                )
                .await
            }
            None => note,
        }
    }

    /// Notes of a category, oldest first.
    ///
    /// Merges the mirror's copy with the local notes when the mirror answers
    /// in time; otherwise returns the local notes alone.
    pub async fn read(&self, category: &str) -> Vec<Note> {
        let local = self.local.list(category);
        let Some(mirror) = self.mirror_for(category) else {
            return local;
        };
        if self.cancel.is_cancelled() {
            return local;
        }

        let fetched = with_timeout(self.config.read_timeout, &self.cancel, |token| {
            mirror.fetch(category, token)
        })
        .await;

        match fetched {
            Ok(Ok(remote)) => merge(self.local.as_ref(), local, remote, category),
            Ok(Err(e)) => {
                tracing::warn!(category, error = %e, "Remote note read failed, serving local notes");
                local
            }
            Err(Interrupted::TimedOut(e)) => {
                tracing::warn!(category, error = %e, "Remote note read timed out, serving local notes");
                local
            }
            Err(Interrupted::Cancelled) => {
                tracing::debug!(category, "Remote note read cancelled, serving local notes");
                local
            }
        }
    }

    /// Local notes of a category, without asking the mirror.
    #[must_use]
    pub fn local(&self, category: &str) -> Vec<Note> {
        self.local.list(category)
    }

    fn mirror_for(&self, category: &str) -> Option<&Arc<dyn NoteMirror>> {
        self.mirror.as_ref().filter(|mirror| mirror.mirrors(category))
    }

    /// Wait for every background push started so far.
    pub async fn settle(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }
}

async fn push(
    local: &dyn NoteStorage,
    mirror: &dyn NoteMirror,
    note: Note,
    deadline: Duration,
    cancel: &CancellationToken,
) -> Note {
    if cancel.is_cancelled() {
        tracing::debug!(id = %note.id, "Note mirror closed, kept locally");
        return note;
    }
    let pushed = with_timeout(deadline, cancel, |token| mirror.push(&note, token)).await;
    match pushed {
        Ok(Ok(())) => {
            tracing::debug!(id = %note.id, category = %note.category, "Note mirrored");
            local.mark_mirrored(note.id).unwrap_or(note)
        }
        Ok(Err(e)) => {
            tracing::warn!(id = %note.id, category = %note.category, error = %e, "Remote note write failed, kept locally");
            note
        }
        Err(Interrupted::TimedOut(e)) => {
            tracing::warn!(id = %note.id, category = %note.category, error = %e, "Remote note write timed out, kept locally");
            note
        }
        Err(Interrupted::Cancelled) => {
            tracing::debug!(id = %note.id, "Remote note write cancelled, kept locally");
            note
        }
    }
}

/// Combine local notes with the mirror's copy.
///
/// A remote entry that matches a local note confirms it; the rest become
/// remote-only notes. Duplicate remote entries collapse into one.
fn merge(
    storage: &dyn NoteStorage,
    mut notes: Vec<Note>,
    remote: Vec<MirroredNote>,
    category: &str,
) -> Vec<Note> {
    let fetched_at = Utc::now();
    let mut confirmed = vec![false; notes.len()];

    for entry in remote {
        let matched = (0..confirmed.len()).find(|&i| !confirmed[i] && entry.matches(&notes[i]));
        if let Some(i) = matched {
            confirmed[i] = true;
            if notes[i].origin == Origin::Local {
                notes[i].origin = Origin::Both;
                storage.mark_mirrored(notes[i].id);
            }
            continue;
        }

        let duplicate = notes.iter().any(|note| {
            note.origin == Origin::Remote
                && note.text == entry.text
                && entry.created_at.is_none_or(|t| t == note.created_at)
        });
        if duplicate {
            continue;
        }

        notes.push(Note {
            id: Uuid::new_v4(),
            text: entry.text,
            category: category.to_string(),
            created_at: entry.created_at.unwrap_or(fetched_at),
            origin: Origin::Remote,
        });
    }

    notes.sort_by_key(|note| note.created_at);
    notes
}
