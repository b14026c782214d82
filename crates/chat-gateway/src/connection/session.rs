//! Session identity and resume decision

use parking_lot::Mutex;

/// What to send after Hello
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handshake {
    Identify,
    Resume { session_id: String, sequence: u64 },
}

/// Result of recording a dispatch sequence number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceCheck {
    InOrder,
    /// Numbers between `expected` and `received` never arrived
    Gap { expected: u64, received: u64 },
    /// Not newer than the last recorded number; ignored
    Stale { last: u64, received: u64 },
}

#[derive(Debug, Default)]
struct SessionInner {
    session_id: Option<String>,
    resume_url: Option<String>,
    last_sequence: Option<u64>,
}

/// Per-shard session state; survives reconnects
#[derive(Debug, Default)]
pub struct SessionState {
    inner: Mutex<SessionInner>,
}

impl SessionState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume when a session exists, otherwise Identify
    pub fn handshake(&self) -> Handshake {
        let inner = self.inner.lock();
        match &inner.session_id {
            Some(session_id) => Handshake::Resume {
                session_id: session_id.clone(),
                sequence: inner.last_sequence.unwrap_or(0),
            },
            None => Handshake::Identify,
        }
    }

    /// Track the sequence of a dispatch frame; only moves forward
    pub fn record_sequence(&self, sequence: u64) -> SequenceCheck {
        let mut inner = self.inner.lock();
        let check = match inner.last_sequence {
            Some(last) if sequence <= last => SequenceCheck::Stale {
                last,
                received: sequence,
            },
            Some(last) if sequence > last + 1 => SequenceCheck::Gap {
                expected: last + 1,
                received: sequence,
            },
            _ => SequenceCheck::InOrder,
        };
        if !matches!(check, SequenceCheck::Stale { .. }) {
            inner.last_sequence = Some(sequence);
        }
        check
    }

    /// A new session started; READY without a sequence starts at 0
    pub fn on_ready(&self, session_id: String, resume_url: Option<String>, sequence: Option<u64>) {
        let mut inner = self.inner.lock();
        inner.session_id = Some(session_id);
        inner.resume_url = resume_url;
        inner.last_sequence = Some(sequence.unwrap_or(0));
    }

    /// Forget the session; the next handshake is an Identify
    pub fn invalidate(&self) {
        let mut inner = self.inner.lock();
        inner.session_id = None;
        inner.resume_url = None;
        inner.last_sequence = None;
    }

    pub fn session_id(&self) -> Option<String> {
        self.inner.lock().session_id.clone()
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.inner.lock().last_sequence
    }

    /// URL to resume on, when READY named one
    pub fn resume_url(&self) -> Option<String> {
        let inner = self.inner.lock();
        inner
            .session_id
            .as_ref()
            .and(inner.resume_url.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identify_until_ready() {
        let session = SessionState::new();
        assert_eq!(session.handshake(), Handshake::Identify);

        session.on_ready("abc".into(), None, None);
        assert_eq!(session.last_sequence(), Some(0));
        assert_eq!(
            session.handshake(),
            Handshake::Resume {
                session_id: "abc".into(),
                sequence: 0
            }
        );
    }

    #[test]
    fn test_sequence_tracking() {
        let session = SessionState::new();
        session.on_ready("abc".into(), None, Some(1));

        assert_eq!(session.record_sequence(2), SequenceCheck::InOrder);
        assert_eq!(
            session.record_sequence(5),
            SequenceCheck::Gap {
                expected: 3,
                received: 5
            }
        );
        assert_eq!(
            session.record_sequence(4),
            SequenceCheck::Stale {
                last: 5,
                received: 4
            }
        );
        assert_eq!(session.last_sequence(), Some(5));
    }

    #[test]
    fn test_invalidate_forces_identify() {
        let session = SessionState::new();
        session.on_ready("abc".into(), Some("wss://resume".into()), Some(3));
        assert_eq!(session.resume_url().as_deref(), Some("wss://resume"));

        session.invalidate();
        assert_eq!(session.handshake(), Handshake::Identify);
        assert_eq!(session.last_sequence(), None);
        assert_eq!(session.resume_url(), None);
    }
}
