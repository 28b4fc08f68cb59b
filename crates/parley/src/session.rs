use lru::LruCache;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::agent::Agent;
use crate::errors::AgentResult;

/// One agent, shareable across tasks; the lock serialises its turns
pub type SharedAgent = Arc<tokio::sync::Mutex<Agent>>;

pub const DEFAULT_CAPACITY: usize = 256;

type AgentFactory<K> = Box<dyn Fn(&K) -> AgentResult<Agent> + Send + Sync>;

struct Session {
    agent: SharedAgent,
    last_used: Instant,
}

/// Keeps one agent per session key (a chat id, a user), created on first use.
///
/// The least recently used session is dropped once `capacity` is exceeded, and
/// sessions idle for longer than the TTL are dropped when next looked at.
pub struct SessionRegistry<K: Hash + Eq> {
    sessions: Mutex<LruCache<K, Session>>,
    factory: AgentFactory<K>,
    ttl: Option<Duration>,
}

impl<K: Hash + Eq + Clone> SessionRegistry<K> {
    pub fn new<F>(capacity: usize, factory: F) -> Self
    where
        F: Fn(&K) -> AgentResult<Agent> + Send + Sync + 'static,
    {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            sessions: Mutex::new(LruCache::new(capacity)),
            factory: Box::new(factory),
            ttl: None,
        }
    }

    /// Drop sessions that have been idle for longer than `ttl`
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<K, Session>> {
        // A panic elsewhere can't leave the cache itself inconsistent
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn sweep(&self, sessions: &mut LruCache<K, Session>, now: Instant) -> usize {
        let Some(ttl) = self.ttl else {
            return 0;
        };
        let expired: Vec<K> = sessions
            .iter()
            .filter(|(_, session)| now.duration_since(session.last_used) > ttl)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            sessions.pop(key);
        }
        if !expired.is_empty() {
            tracing::debug!(count = expired.len(), "evicted idle sessions");
        }
        expired.len()
    }

    /// The agent for `key`, built by the factory if there is none yet
    pub fn get_or_create(&self, key: K) -> AgentResult<SharedAgent> {
        let now = Instant::now();
        let mut sessions = self.lock();
        self.sweep(&mut sessions, now);

        if let Some(session) = sessions.get_mut(&key) {
            session.last_used = now;
            return Ok(session.agent.clone());
        }

        let agent = Arc::new(tokio::sync::Mutex::new((self.factory)(&key)?));
        let session = Session {
            agent: agent.clone(),
            last_used: now,
        };
        if sessions.push(key, session).is_some() {
            tracing::debug!("session capacity reached, dropped the least recently used");
        }
        Ok(agent)
    }

    /// The agent for `key` if the session is live, without touching its recency
    pub fn get(&self, key: &K) -> Option<SharedAgent> {
        let now = Instant::now();
        let mut sessions = self.lock();
        self.sweep(&mut sessions, now);
        sessions.peek(key).map(|session| session.agent.clone())
    }

    /// Drop every idle session now, returning how many went
    pub fn evict_expired(&self) -> usize {
        let mut sessions = self.lock();
        self.sweep(&mut sessions, Instant::now())
    }

    pub fn remove(&self, key: &K) -> Option<SharedAgent> {
        self.lock().pop(key).map(|session| session.agent)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.lock().contains(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::SendOptions;
    use crate::errors::AgentError;
    use crate::providers::base::Completion;
    use crate::providers::mock::MockProvider;
    use anyhow::Result;

    fn registry(capacity: usize) -> SessionRegistry<u64> {
        SessionRegistry::new(capacity, |chat: &u64| {
            Ok(Agent::new(Box::new(MockProvider::always(Completion::text(
                format!("chat {}", chat),
            )))))
        })
    }

    #[tokio::test]
    async fn test_same_key_same_agent() -> Result<()> {
        let sessions = registry(4);
        let first = sessions.get_or_create(1)?;
        first.lock().await.send("hi", SendOptions::default()).await?;

        let again = sessions.get_or_create(1)?;
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(again.lock().await.message_count(), 2);

        let other = sessions.get_or_create(2)?;
        assert_eq!(other.lock().await.message_count(), 0);
        assert_eq!(
            other.lock().await.send("hi", SendOptions::default()).await?,
            "chat 2"
        );
        assert_eq!(sessions.len(), 2);
        Ok(())
    }

    #[test]
    fn test_lru_eviction() -> Result<()> {
        let sessions = registry(2);
        sessions.get_or_create(1)?;
        sessions.get_or_create(2)?;
        // touch 1 so 2 becomes least recently used
        sessions.get_or_create(1)?;
        sessions.get_or_create(3)?;

        assert!(sessions.contains(&1));
        assert!(!sessions.contains(&2));
        assert!(sessions.contains(&3));
        assert_eq!(sessions.len(), 2);
        Ok(())
    }

    #[test]
    fn test_idle_sessions_expire() -> Result<()> {
        let sessions = registry(8).with_ttl(Duration::from_millis(30));
        let first = sessions.get_or_create(1)?;
        std::thread::sleep(Duration::from_millis(60));

        assert!(sessions.get(&1).is_none());
        let fresh = sessions.get_or_create(1)?;
        assert!(!Arc::ptr_eq(&first, &fresh));

        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(sessions.evict_expired(), 1);
        assert!(sessions.is_empty());
        Ok(())
    }

    #[test]
    fn test_factory_error_is_returned() {
        let sessions: SessionRegistry<&str> = SessionRegistry::new(2, |_: &&str| {
            Err(AgentError::Configuration("no api key".into()))
        });
        assert!(matches!(
            sessions.get_or_create("chat"),
            Err(AgentError::Configuration(_))
        ));
        assert!(sessions.is_empty());
    }

    #[test]
    fn test_remove() -> Result<()> {
        let sessions = registry(2);
        sessions.get_or_create(7)?;
        assert!(sessions.remove(&7).is_some());
        assert!(sessions.remove(&7).is_none());
        assert!(!sessions.contains(&7));
        Ok(())
    }
}
