//! Per-download conversation state.
//!
//! A session is opened once a download identifier has been allocated and
//! lives until the file is delivered, the pipeline fails, or an unanswered
//! format offer expires. The expiry clock starts when the offer is made;
//! running downloads and deliveries never expire. Format choices are only
//! honoured for the user that requested the download and only once.

use std::{
    collections::HashMap,
    fmt,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use crate::storage::DownloadId;

/// Chat user that owns a session.
pub type UserKey = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Idle,
    AwaitingMetadata,
    Confirmed,
    Downloading,
    AwaitingFormatChoice,
    Delivering,
    Done,
    Failed,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Done | Stage::Failed)
    }

    /// Forward edges of the pipeline plus `Failed` from any live stage.
    pub fn can_advance_to(self, next: Stage) -> bool {
        use Stage::*;
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (_, Failed)
                | (Idle, AwaitingMetadata)
                | (AwaitingMetadata, Confirmed)
                | (Confirmed, Downloading)
                | (Downloading, AwaitingFormatChoice)
                | (AwaitingFormatChoice, Delivering)
                | (Delivering, Done)
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Idle => "idle",
            Stage::AwaitingMetadata => "awaiting metadata",
            Stage::Confirmed => "confirmed",
            Stage::Downloading => "downloading",
            Stage::AwaitingFormatChoice => "awaiting format choice",
            Stage::Delivering => "delivering",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("no session for download {id}")]
    Unknown { id: DownloadId },

    #[error("session for download {id} expired")]
    Expired { id: DownloadId },

    #[error("download {id} belongs to another user")]
    NotOwner { id: DownloadId },

    #[error("download {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: DownloadId,
        from: Stage,
        to: Stage,
    },
}

#[derive(Debug, Clone)]
struct Session {
    owner: UserKey,
    stage: Stage,
    touched: Instant,
}

impl Session {
    fn expired(&self, ttl: Duration) -> bool {
        self.stage == Stage::AwaitingFormatChoice && self.touched.elapsed() > ttl
    }
}

#[derive(Debug)]
pub struct SessionStore {
    ttl: Duration,
    sessions: Mutex<HashMap<DownloadId, Session>>,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Starts tracking a freshly allocated download in `Downloading`.
    pub fn open(&self, id: DownloadId, owner: UserKey) {
        let purged = self.purge_expired();
        if purged > 0 {
            debug!(purged, "dropped unanswered format offers");
        }
        self.sessions.lock().insert(
            id,
            Session {
                owner,
                stage: Stage::Downloading,
                touched: Instant::now(),
            },
        );
    }

    /// Moves the session for `id` to `next`. Terminal stages drop the entry.
    pub fn advance(&self, id: DownloadId, owner: UserKey, next: Stage) -> Result<Stage, SessionError> {
        let mut sessions = self.sessions.lock();
        let session = sessions.get_mut(&id).ok_or(SessionError::Unknown { id })?;

        if session.expired(self.ttl) {
            sessions.remove(&id);
            return Err(SessionError::Expired { id });
        }
        if session.owner != owner {
            return Err(SessionError::NotOwner { id });
        }
        let previous = session.stage;
        if !previous.can_advance_to(next) {
            return Err(SessionError::InvalidTransition {
                id,
                from: previous,
                to: next,
            });
        }

        debug!(%id, from = %previous, to = %next, "session transition");
        if next.is_terminal() {
            sessions.remove(&id);
        } else {
            session.stage = next;
            session.touched = Instant::now();
        }
        Ok(previous)
    }

    pub fn stage(&self, id: DownloadId) -> Option<Stage> {
        self.sessions.lock().get(&id).map(|session| session.stage)
    }

    /// Drops every expired offer and returns how many were removed.
    fn purge_expired(&self) -> usize {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, session| !session.expired(self.ttl));
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: UserKey = 1;
    const BOB: UserKey = 2;

    fn store() -> SessionStore {
        SessionStore::new(Duration::from_secs(60))
    }

    #[test]
    fn stage_graph_only_moves_forward() {
        assert!(Stage::Idle.can_advance_to(Stage::AwaitingMetadata));
        assert!(Stage::Downloading.can_advance_to(Stage::AwaitingFormatChoice));
        assert!(Stage::Delivering.can_advance_to(Stage::Failed));
        assert!(!Stage::Downloading.can_advance_to(Stage::Delivering));
        assert!(!Stage::AwaitingFormatChoice.can_advance_to(Stage::Downloading));
        assert!(!Stage::Done.can_advance_to(Stage::Failed));
        assert!(!Stage::Failed.can_advance_to(Stage::Failed));
    }

    #[test]
    fn full_happy_path_removes_session() {
        let sessions = store();
        let id = DownloadId::new();
        sessions.open(id, ALICE);
        assert_eq!(sessions.stage(id), Some(Stage::Downloading));

        sessions.advance(id, ALICE, Stage::AwaitingFormatChoice).unwrap();
        sessions.advance(id, ALICE, Stage::Delivering).unwrap();
        assert_eq!(sessions.stage(id), Some(Stage::Delivering));
        sessions.advance(id, ALICE, Stage::Done).unwrap();
        assert!(sessions.is_empty());
    }

    #[test]
    fn choice_before_download_finished_is_rejected() {
        let sessions = store();
        let id = DownloadId::new();
        sessions.open(id, ALICE);
        let err = sessions.advance(id, ALICE, Stage::Delivering).unwrap_err();
        assert!(matches!(err, SessionError::InvalidTransition { from: Stage::Downloading, .. }));
    }

    #[test]
    fn second_choice_is_rejected() {
        let sessions = store();
        let id = DownloadId::new();
        sessions.open(id, ALICE);
        sessions.advance(id, ALICE, Stage::AwaitingFormatChoice).unwrap();
        sessions.advance(id, ALICE, Stage::Delivering).unwrap();

        let err = sessions.advance(id, ALICE, Stage::Delivering).unwrap_err();
        assert!(matches!(err, SessionError::InvalidTransition { .. }));

        sessions.advance(id, ALICE, Stage::Done).unwrap();
        assert_eq!(
            sessions.advance(id, ALICE, Stage::Delivering).unwrap_err(),
            SessionError::Unknown { id }
        );
    }

    #[test]
    fn other_users_cannot_advance() {
        let sessions = store();
        let id = DownloadId::new();
        sessions.open(id, ALICE);
        sessions.advance(id, ALICE, Stage::AwaitingFormatChoice).unwrap();

        assert_eq!(
            sessions.advance(id, BOB, Stage::Delivering).unwrap_err(),
            SessionError::NotOwner { id }
        );
        assert_eq!(sessions.stage(id), Some(Stage::AwaitingFormatChoice));
    }

    #[test]
    fn unanswered_offers_expire() {
        let sessions = SessionStore::new(Duration::ZERO);
        let id = DownloadId::new();
        sessions.open(id, ALICE);
        sessions.advance(id, ALICE, Stage::AwaitingFormatChoice).unwrap();
        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(
            sessions.advance(id, ALICE, Stage::Delivering).unwrap_err(),
            SessionError::Expired { id }
        );
        assert!(sessions.is_empty());
    }

    #[test]
    fn running_downloads_outlive_the_offer_ttl() {
        let sessions = SessionStore::new(Duration::ZERO);
        let slow = DownloadId::new();
        sessions.open(slow, ALICE);
        std::thread::sleep(Duration::from_millis(5));

        sessions.open(DownloadId::new(), BOB);
        assert_eq!(sessions.stage(slow), Some(Stage::Downloading));
        sessions.advance(slow, ALICE, Stage::AwaitingFormatChoice).unwrap();
    }

    #[test]
    fn deliveries_do_not_expire() {
        let sessions = SessionStore::new(Duration::ZERO);
        let id = DownloadId::new();
        sessions.open(id, ALICE);
        sessions.advance(id, ALICE, Stage::AwaitingFormatChoice).unwrap();
        sessions.advance(id, ALICE, Stage::Delivering).unwrap();
        std::thread::sleep(Duration::from_millis(5));

        sessions.advance(id, ALICE, Stage::Done).unwrap();
        assert!(sessions.is_empty());
    }

    #[test]
    fn purge_keeps_fresh_sessions() {
        let sessions = store();
        sessions.open(DownloadId::new(), ALICE);
        sessions.open(DownloadId::new(), BOB);
        assert_eq!(sessions.purge_expired(), 0);
        assert_eq!(sessions.len(), 2);
    }

    #[test]
    fn purge_drops_stale_offers() {
        let sessions = SessionStore::new(Duration::ZERO);
        let id = DownloadId::new();
        sessions.open(id, ALICE);
        sessions.advance(id, ALICE, Stage::AwaitingFormatChoice).unwrap();
        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(sessions.purge_expired(), 1);
        assert_eq!(sessions.stage(id), None);
    }
}
