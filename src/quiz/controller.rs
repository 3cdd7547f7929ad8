//! Drives a [`QuizSession`] through request, retry and fallback, and keeps
//! track of the request task each chat has in flight.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::{AbortHandle, JoinHandle};

use super::session::{FailureAction, Phase, QuizSession, SessionError, SessionId, RETRY_DELAY};
use super::QuizItem;
use crate::error::GenerateError;

/// Anything that can turn a keyword into a normalized quiz: the HTTP API or
/// the generation backend itself.
#[async_trait]
pub trait QuizSource: Send + Sync {
    async fn fetch_quiz(&self, keyword: &str, era: Option<&str>) -> Result<QuizItem, GenerateError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Generated,
    FallBack,
}

pub struct QuizController {
    source: Arc<dyn QuizSource>,
    retry_delay: Duration,
    request_timeout: Duration,
}

impl QuizController {
    pub fn new(source: Arc<dyn QuizSource>, request_timeout: Duration) -> Self {
        Self {
            source,
            retry_delay: RETRY_DELAY,
            request_timeout,
        }
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Requests the current keyword until the session shows a question,
    /// generated or fallback. Waiting between attempts is a timer, so the
    /// returned future can be dropped or aborted at any point.
    pub async fn resolve(&self, session: &mut QuizSession) -> Result<Resolution, SessionError> {
        match session.phase() {
            Phase::Requesting => {}
            Phase::Retrying { .. } => session.retry_due()?,
            _ => return Err(SessionError::NotRequesting),
        }

        loop {
            let keyword = session
                .current_keyword()
                .ok_or(SessionError::Finished)?
                .to_string();

            match self.fetch_once(&keyword, session.era()).await {
                Ok(quiz) => {
                    session.quiz_ready(quiz)?;
                    return Ok(Resolution::Generated);
                }
                Err(e) if !e.is_retryable() => {
                    log::error!("Quiz request for {:?} cannot succeed: {}", keyword, e);
                    session.give_up()?;
                    return Ok(Resolution::FallBack);
                }
                Err(e) => {
                    log::warn!("Quiz request for {:?} failed: {}", keyword, e);
                    match session.request_failed()? {
                        FailureAction::Retry { attempt, .. } => {
                            log::info!(
                                "Retrying {:?} in {:?} (attempt {})",
                                keyword,
                                self.retry_delay,
                                attempt
                            );
                            tokio::time::sleep(self.retry_delay).await;
                            session.retry_due()?;
                        }
                        FailureAction::FallBack => {
                            log::warn!("Falling back to a local quiz for {:?}", keyword);
                            return Ok(Resolution::FallBack);
                        }
                    }
                }
            }
        }
    }

    async fn fetch_once(&self, keyword: &str, era: &str) -> Result<QuizItem, GenerateError> {
        let era = Some(era).filter(|e| !e.is_empty());
        match tokio::time::timeout(self.request_timeout, self.source.fetch_quiz(keyword, era)).await
        {
            Ok(result) => result,
            Err(_) => Err(GenerateError::Timeout(self.request_timeout)),
        }
    }
}

/// Request tasks in flight, one per key (a chat), tagged with the session
/// they belong to. Spawning for a key aborts whatever that key had pending.
pub struct SessionTasks<K> {
    pending: Mutex<HashMap<K, (SessionId, AbortHandle)>>,
}

impl<K: Eq + Hash + Clone> SessionTasks<K> {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn spawn<F>(&self, key: K, session: SessionId, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let handle = tokio::spawn(task);
        let previous = self
            .lock()
            .insert(key, (session, handle.abort_handle()));
        if let Some((old_session, old)) = previous {
            if !old.is_finished() {
                log::info!("Abandoning pending request of session {}", old_session);
            }
            old.abort();
        }
        handle
    }

    /// Aborts the pending task for `key`, whichever session it belongs to.
    pub fn cancel(&self, key: &K) -> bool {
        match self.lock().remove(key) {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Forgets the entry for `key` if it still belongs to `session`.
    pub fn finish(&self, key: &K, session: SessionId) {
        let mut pending = self.lock();
        if matches!(pending.get(key), Some((id, _)) if *id == session) {
            pending.remove(key);
        }
    }

    pub fn is_pending(&self, key: &K, session: SessionId) -> bool {
        matches!(self.lock().get(key), Some((id, handle)) if *id == session && !handle.is_finished())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<K, (SessionId, AbortHandle)>> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<K: Eq + Hash + Clone> Default for SessionTasks<K> {
    fn default() -> Self {
        Self::new()
    }
}
