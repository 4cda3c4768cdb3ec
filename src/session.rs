//! Remote Sandbox Sessions
//!
//! The remote sandbox server keeps one database per session. The client mints
//! the session id itself and decides when the server needs the dataset again:
//!
//! ```text
//! (no session) ──first execute──► minted, not established ──success──► established
//!       ▲                                  ▲                                 │
//!       │ reset / target change            └──── server says "expired" ──────┘
//!       └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! While a session is not established every request carries the schema and
//! seed scripts; once established they are omitted.

/// Client-minted session identifier (random UUID, not guessable)
pub type SessionId = String;

pub fn mint_session_id() -> SessionId {
    uuid::Uuid::new_v4().to_string()
}

/// Client-side view of one remote session
#[derive(Debug, Clone, Default)]
pub struct RemoteSession {
    id: Option<SessionId>,
    established: bool,
}

impl RemoteSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn is_established(&self) -> bool {
        self.established
    }

    /// Whether the next request has to carry schema and seed
    pub fn needs_setup(&self) -> bool {
        !self.established
    }

    /// Current id, minting one when there is none
    pub fn ensure_id(&mut self) -> SessionId {
        self.id.get_or_insert_with(mint_session_id).clone()
    }

    /// Replace the id after the server dropped the old session
    pub fn renew(&mut self) -> SessionId {
        let id = mint_session_id();
        self.id = Some(id.clone());
        self.established = false;
        id
    }

    /// The server now holds state for this session. An echoed id wins over
    /// the one we sent.
    pub fn mark_established(&mut self, echoed: Option<&str>) {
        if let Some(echoed) = echoed.filter(|id| !id.is_empty()) {
            if self.id.as_deref() != Some(echoed) {
                self.id = Some(echoed.to_string());
            }
        }
        self.established = self.id.is_some();
    }

    /// Forget the session, returning the id so it can be released
    pub fn take(&mut self) -> Option<SessionId> {
        self.established = false;
        self.id.take()
    }
}

/// Recognizes the server's "session expired" error text.
///
/// Matching is exact after trimming, ignoring ASCII case, so ordinary SQL
/// errors that merely mention a session are not mistaken for expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpirySentinel(String);

impl ExpirySentinel {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, message: Option<&str>) -> bool {
        message.is_some_and(|m| m.trim().eq_ignore_ascii_case(self.0.trim()))
    }
}
