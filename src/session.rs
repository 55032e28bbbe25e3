//! Chat session controller.
//!
//! A [`ChatSession`] owns an append-only list of [`ChatTurn`]s. Each new
//! question is sent to the [`QueryEngine`] with the whole history rendered
//! in front of it as plain text, and the exchange is appended only after the
//! engine answers. [`ChatSession::reset`] empties the history; the index is
//! never touched.
//!
//! The web front end keeps one session per browser tab in a [`SessionStore`].
//! Sessions idle longer than [`SessionLimits::idle_ttl`] are dropped, and the
//! least recently used one is dropped when the store is full.

use anyhow::Result;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::models::ChatTurn;
use crate::query::{QueryEngine, QueryResponse};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("question must not be empty")]
    EmptyQuestion,
}

/// How past turns are labelled when rendered as context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryFormat {
    /// `Human:` / `Assistant:` (web chat).
    HumanAssistant,
    /// `Q:` / `A:` (scripted demo).
    QuestionAnswer,
}

impl HistoryFormat {
    fn labels(self) -> (&'static str, &'static str) {
        match self {
            HistoryFormat::HumanAssistant => ("Human", "Assistant"),
            HistoryFormat::QuestionAnswer => ("Q", "A"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatSession {
    turns: Vec<ChatTurn>,
    format: HistoryFormat,
}

impl ChatSession {
    pub fn new(format: HistoryFormat) -> Self {
        Self {
            turns: Vec::new(),
            format,
        }
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// One labelled line per question and per answer, oldest first.
    pub fn render_history(&self) -> String {
        let (q, a) = self.format.labels();
        self.turns
            .iter()
            .map(|t| format!("{}: {}\n{}: {}", q, t.question, a, t.answer))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// The text handed to the query engine for `question`.
    pub fn compose_query(&self, question: &str) -> String {
        let (q, a) = self.format.labels();
        let turn = format!("{}: {}\n{}:", q, question, a);
        if self.turns.is_empty() {
            turn
        } else {
            format!("{}\n{}", self.render_history(), turn)
        }
    }

    /// Ask `question` in the context of this session's history.
    ///
    /// On success exactly one turn is appended and returned along with the
    /// engine's response. On failure the history is unchanged.
    pub async fn ask(
        &mut self,
        engine: &QueryEngine,
        question: &str,
    ) -> Result<(ChatTurn, QueryResponse)> {
        let question = question.trim();
        if question.is_empty() {
            return Err(SessionError::EmptyQuestion.into());
        }

        let response = engine.query(&self.compose_query(question)).await?;
        let turn = ChatTurn {
            question: question.to_string(),
            answer: response.answer.clone(),
            asked_at: Utc::now(),
        };
        self.turns.push(turn.clone());
        Ok((turn, response))
    }

    pub fn reset(&mut self) {
        self.turns.clear();
    }
}

pub type SharedSession = Arc<Mutex<ChatSession>>;

/// Bounds on how many web sessions are kept and for how long.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    pub idle_ttl: Duration,
    pub max_sessions: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        SessionLimits::from(&ServerConfig::default())
    }
}

impl From<&ServerConfig> for SessionLimits {
    fn from(c: &ServerConfig) -> Self {
        Self {
            idle_ttl: Duration::from_secs(c.session_idle_secs),
            max_sessions: c.max_sessions.max(1),
        }
    }
}

struct StoredSession {
    session: SharedSession,
    last_used: Instant,
}

/// Sessions of the web front end, keyed by a random id.
///
/// Each session has its own lock, held for a whole turn, so turns within a
/// session are ordered while different sessions proceed independently.
pub struct SessionStore {
    format: HistoryFormat,
    limits: SessionLimits,
    sessions: Mutex<HashMap<Uuid, StoredSession>>,
}

impl SessionStore {
    pub fn new(format: HistoryFormat, limits: SessionLimits) -> Self {
        Self {
            format,
            limits,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Start a new empty session, evicting idle ones first.
    pub async fn create(&self) -> Uuid {
        let now = Instant::now();
        let mut sessions = self.sessions.lock().await;

        let before = sessions.len();
        sessions.retain(|_, s| now.duration_since(s.last_used) < self.limits.idle_ttl);
        while sessions.len() >= self.limits.max_sessions {
            let Some(oldest) = sessions
                .iter()
                .min_by_key(|(_, s)| s.last_used)
                .map(|(id, _)| *id)
            else {
                break;
            };
            sessions.remove(&oldest);
        }
        if sessions.len() < before {
            debug!(evicted = before - sessions.len(), "dropped idle sessions");
        }

        let id = Uuid::new_v4();
        sessions.insert(
            id,
            StoredSession {
                session: Arc::new(Mutex::new(ChatSession::new(self.format))),
                last_used: now,
            },
        );
        id
    }

    /// Look up a live session and mark it used.
    pub async fn get(&self, id: &Uuid) -> Option<SharedSession> {
        let now = Instant::now();
        let mut sessions = self.sessions.lock().await;
        let stored = sessions.get_mut(id)?;
        if now.duration_since(stored.last_used) >= self.limits.idle_ttl {
            sessions.remove(id);
            return None;
        }
        stored.last_used = now;
        Some(stored.session.clone())
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(q: &str, a: &str) -> ChatTurn {
        ChatTurn {
            question: q.to_string(),
            answer: a.to_string(),
            asked_at: Utc::now(),
        }
    }

    #[test]
    fn test_compose_query_without_history() {
        let session = ChatSession::new(HistoryFormat::HumanAssistant);
        assert_eq!(
            session.compose_query("Who is Anya?"),
            "Human: Who is Anya?\nAssistant:"
        );
    }

    #[test]
    fn test_compose_query_keeps_turn_order() {
        let mut session = ChatSession::new(HistoryFormat::QuestionAnswer);
        session.turns.push(turn("first?", "one"));
        session.turns.push(turn("second?", "two"));
        assert_eq!(session.render_history(), "Q: first?\nA: one\nQ: second?\nA: two");
        assert_eq!(
            session.compose_query("third?"),
            "Q: first?\nA: one\nQ: second?\nA: two\nQ: third?\nA:"
        );
    }

    #[test]
    fn test_reset_is_idempotent() {
        let mut session = ChatSession::new(HistoryFormat::HumanAssistant);
        session.turns.push(turn("q", "a"));
        session.reset();
        assert!(session.is_empty());
        session.reset();
        assert_eq!(session.len(), 0);
    }

    #[tokio::test]
    async fn test_store_isolates_sessions() {
        let store = SessionStore::new(HistoryFormat::HumanAssistant, SessionLimits::default());
        let a = store.create().await;
        let b = store.create().await;
        assert_ne!(a, b);
        assert_eq!(store.len().await, 2);

        store.get(&a).await.unwrap().lock().await.turns.push(turn("q", "a"));
        assert_eq!(store.get(&a).await.unwrap().lock().await.len(), 1);
        assert!(store.get(&b).await.unwrap().lock().await.is_empty());
        assert!(store.get(&Uuid::new_v4()).await.is_none());
    }

    #[tokio::test]
    async fn test_idle_sessions_expire() {
        let store = SessionStore::new(
            HistoryFormat::HumanAssistant,
            SessionLimits {
                idle_ttl: Duration::from_millis(50),
                max_sessions: 10,
            },
        );
        let stale = store.create().await;
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert!(store.get(&stale).await.is_none());
        store.create().await;
        store.create().await;
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_full_store_drops_least_recently_used() {
        let store = SessionStore::new(
            HistoryFormat::QuestionAnswer,
            SessionLimits {
                idle_ttl: Duration::from_secs(3600),
                max_sessions: 2,
            },
        );
        let a = store.create().await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let b = store.create().await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(store.get(&a).await.is_some());
        tokio::time::sleep(Duration::from_millis(5)).await;

        let c = store.create().await;
        assert_eq!(store.len().await, 2);
        assert!(store.get(&a).await.is_some());
        assert!(store.get(&b).await.is_none());
        assert!(store.get(&c).await.is_some());
    }
}
