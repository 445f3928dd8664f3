//! Session-scoped conversation memory.
//!
//! [`ConversationMemory`] keeps a sliding window of turns plus a rolling
//! summary. It never holds chunk or document data.
//!
//! [`SessionStore`] owns every session's memory, keyed by session id. Each
//! memory sits behind its own async mutex so one request at a time appends
//! to a given conversation. TTL sweeps and capacity eviction read time from
//! an injected [`Clock`].

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::router::AnswerMode;

/// Chars of a turn kept in the structured recent-turns context.
pub const STRUCTURED_TURN_CHARS: usize = 250;
/// Chars of a turn kept in the flat context and in summary input.
pub const CONTEXT_TURN_CHARS: usize = 300;
/// With no summary yet, summarize once history grows past this.
pub const UNSUMMARIZED_TURN_LIMIT: usize = 6;

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests and simulations.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    fn label(&self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub query_type: Option<AnswerMode>,
}

/// Memory handed to the synthesizer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StructuredContext {
    pub summary_memory: String,
    pub recent_turns: String,
}

#[derive(Debug, Clone)]
pub struct ConversationMemory {
    history: VecDeque<Turn>,
    max_turns: usize,
    summarize_after_turns: usize,
    summary: String,
    turns_since_summary: usize,
}

impl ConversationMemory {
    pub fn new(max_turns: usize, summarize_after_turns: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(max_turns),
            max_turns: max_turns.max(1),
            summarize_after_turns,
            summary: String::new(),
            turns_since_summary: 0,
        }
    }

    /// Append a turn, dropping the oldest once the window is full.
    pub fn add_turn(
        &mut self,
        role: Role,
        content: impl Into<String>,
        query_type: Option<AnswerMode>,
        at: DateTime<Utc>,
    ) {
        if self.history.len() == self.max_turns {
            self.history.pop_front();
        }
        self.history.push_back(Turn {
            role,
            content: content.into(),
            timestamp: at,
            query_type,
        });
        self.turns_since_summary += 1;
    }

    pub fn turn_count(&self) -> usize {
        self.history.len()
    }

    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.history.iter()
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn turns_since_summary(&self) -> usize {
        self.turns_since_summary
    }

    pub fn should_summarize(&self) -> bool {
        self.turns_since_summary >= self.summarize_after_turns
            || (self.history.len() > UNSUMMARIZED_TURN_LIMIT && self.summary.is_empty())
    }

    /// Replace the rolling summary and reset the trigger counter.
    pub fn update_summary(&mut self, summary: impl Into<String>) {
        self.summary = summary.into();
        self.turns_since_summary = 0;
    }

    /// The last `count` turns as `Role: content` lines for summarization.
    pub fn recent_turns_for_summary(&self, count: usize) -> String {
        let skip = self.history.len().saturating_sub(count);
        self.history
            .iter()
            .skip(skip)
            .map(|t| format!("{}: {}", t.role.label(), take_chars(&t.content, CONTEXT_TURN_CHARS)))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Summary plus the two turns preceding the newest one.
    ///
    /// The newest turn is the query being answered and is excluded.
    pub fn structured_context(&self) -> StructuredContext {
        let n = self.history.len();
        let recent_turns = if n > 1 {
            self.history
                .iter()
                .skip(n.saturating_sub(3))
                .take(n - 1 - n.saturating_sub(3))
                .map(|t| {
                    format!(
                        "{}: {}",
                        t.role.label(),
                        take_chars(&t.content, STRUCTURED_TURN_CHARS)
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        } else {
            String::new()
        };
        StructuredContext {
            summary_memory: self.summary.clone(),
            recent_turns,
        }
    }

    /// Newest-first history bounded by `max_chars`, returned oldest-first.
    ///
    /// Turns longer than 300 chars are cut and marked with `...`.
    pub fn context(&self, max_chars: usize) -> String {
        let mut lines: VecDeque<String> = VecDeque::new();
        let mut total = 0usize;
        for t in self.history.iter().rev() {
            let content = if t.content.chars().count() > CONTEXT_TURN_CHARS {
                format!("{}...", take_chars(&t.content, CONTEXT_TURN_CHARS))
            } else {
                t.content.clone()
            };
            let line = format!("{}: {}", t.role.label(), content);
            let len = line.chars().count();
            if total + len > max_chars {
                break;
            }
            lines.push_front(line);
            total += len + 1;
        }
        Vec::from(lines).join("\n")
    }

}

fn take_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((byte, _)) => &s[..byte],
        None => s,
    }
}

/// Shared handle to one session's memory.
pub type SessionHandle = Arc<tokio::sync::Mutex<ConversationMemory>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub max_turns: usize,
    pub summarize_after_turns: usize,
    pub ttl_secs: u64,
    pub max_sessions: usize,
    /// Share of sessions evicted when at capacity.
    pub evict_fraction: f64,
    pub sweep_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_turns: 8,
            summarize_after_turns: 3,
            ttl_secs: 1800,
            max_sessions: 1000,
            evict_fraction: 0.1,
            sweep_interval_secs: 300,
        }
    }
}

struct SessionEntry {
    memory: SessionHandle,
    last_activity: DateTime<Utc>,
}

struct Sessions {
    entries: HashMap<String, SessionEntry>,
    last_sweep: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStats {
    pub active_sessions: usize,
    pub max_sessions: usize,
    pub expiry_minutes: u64,
}

/// Owner of all live conversations.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`create`](SessionStore::create) | New empty session (replaces any existing) |
/// | [`get`](SessionStore::get) | Existing session, if live |
/// | [`get_or_create`](SessionStore::get_or_create) | Request entry point |
/// | [`touch`](SessionStore::touch) | Mark activity |
/// | [`sweep_expired`](SessionStore::sweep_expired) | Drop idle sessions |
/// | [`evict_oldest_fraction`](SessionStore::evict_oldest_fraction) | Make room at capacity |
pub struct SessionStore {
    config: SessionConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<Sessions>,
}

impl SessionStore {
    pub fn new(config: SessionConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            config,
            clock,
            inner: Mutex::new(Sessions {
                entries: HashMap::new(),
                last_sweep: now,
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn lock(&self) -> MutexGuard<'_, Sessions> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn new_memory(&self) -> SessionHandle {
        Arc::new(tokio::sync::Mutex::new(ConversationMemory::new(
            self.config.max_turns,
            self.config.summarize_after_turns,
        )))
    }

    /// Start a fresh session under `id`, evicting if at capacity.
    pub fn create(&self, id: &str) -> SessionHandle {
        let now = self.clock.now();
        let mut inner = self.lock();
        if !inner.entries.contains_key(id) && inner.entries.len() >= self.config.max_sessions {
            self.evict_locked(&mut inner);
        }
        let memory = self.new_memory();
        inner.entries.insert(
            id.to_string(),
            SessionEntry {
                memory: memory.clone(),
                last_activity: now,
            },
        );
        memory
    }

    pub fn get(&self, id: &str) -> Option<SessionHandle> {
        self.lock().entries.get(id).map(|e| e.memory.clone())
    }

    /// Fetch or create the session for a request and mark it active.
    ///
    /// Runs an expiry sweep first when the sweep interval has elapsed.
    /// Lookup and insert happen under one guard, so concurrent first
    /// requests for the same id share a single handle.
    pub fn get_or_create(&self, id: &str) -> SessionHandle {
        let now = self.clock.now();
        let mut inner = self.lock();
        let interval = Duration::seconds(self.config.sweep_interval_secs as i64);
        if now - inner.last_sweep > interval {
            self.sweep_locked(&mut inner, now);
        }
        if !inner.entries.contains_key(id) && inner.entries.len() >= self.config.max_sessions {
            self.evict_locked(&mut inner);
        }
        let entry = inner
            .entries
            .entry(id.to_string())
            .or_insert_with(|| SessionEntry {
                memory: self.new_memory(),
                last_activity: now,
            });
        entry.last_activity = now;
        entry.memory.clone()
    }

    /// Mark activity. Returns false for an unknown id.
    pub fn touch(&self, id: &str) -> bool {
        let now = self.clock.now();
        match self.lock().entries.get_mut(id) {
            Some(entry) => {
                entry.last_activity = now;
                true
            }
            None => false,
        }
    }

    /// Remove a session. Returns false for an unknown id.
    pub fn remove(&self, id: &str) -> bool {
        self.lock().entries.remove(id).is_some()
    }

    /// Drop sessions idle longer than the TTL. Returns how many went.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let mut inner = self.lock();
        self.sweep_locked(&mut inner, now)
    }

    fn sweep_locked(&self, inner: &mut Sessions, now: DateTime<Utc>) -> usize {
        let ttl = Duration::seconds(self.config.ttl_secs as i64);
        let before = inner.entries.len();
        inner.entries.retain(|_, e| now - e.last_activity <= ttl);
        inner.last_sweep = now;
        let removed = before - inner.entries.len();
        if removed > 0 {
            info!(removed, remaining = inner.entries.len(), "swept expired sessions");
        }
        removed
    }

    /// Drop the least recently active `evict_fraction` of sessions, at
    /// least one. Returns how many went.
    pub fn evict_oldest_fraction(&self) -> usize {
        let mut inner = self.lock();
        self.evict_locked(&mut inner)
    }

    fn evict_locked(&self, inner: &mut Sessions) -> usize {
        if inner.entries.is_empty() {
            return 0;
        }
        let mut by_age: Vec<(String, DateTime<Utc>)> = inner
            .entries
            .iter()
            .map(|(k, e)| (k.clone(), e.last_activity))
            .collect();
        by_age.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        let n = ((by_age.len() as f64 * self.config.evict_fraction) as usize).max(1);
        for (id, _) in by_age.into_iter().take(n) {
            inner.entries.remove(&id);
        }
        info!(evicted = n, "evicted oldest sessions at capacity");
        n
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            active_sessions: self.len(),
            max_sessions: self.config.max_sessions,
            expiry_minutes: self.config.ttl_secs / 60,
        }
    }
}
