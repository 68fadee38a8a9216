//! Conversation persistence keyed by conversation id.
//!
//! Histories are stored as whole JSON-serialized turn lists with an idle
//! expiry that restarts on every write.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use redis::Commands;
use tracing::{debug, instrument};

use crate::core::types::Turn;

/// Redis key namespace for conversation histories.
pub const REDIS_KEY_PREFIX: &str = "agent:conversation:";

/// Durable mapping from conversation id to ordered history.
pub trait ConversationStore: Send + Sync {
    /// Fetch a history. `None` when the id was never written or has expired.
    fn get(&self, id: &str) -> Result<Option<Vec<Turn>>>;

    /// Replace the history for `id` and restart its expiry.
    fn put(&self, id: &str, turns: &[Turn], ttl: Duration) -> Result<()>;
}

impl<T: ConversationStore + ?Sized> ConversationStore for Box<T> {
    fn get(&self, id: &str) -> Result<Option<Vec<Turn>>> {
        (**self).get(id)
    }

    fn put(&self, id: &str, turns: &[Turn], ttl: Duration) -> Result<()> {
        (**self).put(id, turns, ttl)
    }
}

/// Process-local store used by tests and single-process deployments.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, (Instant, Vec<Turn>)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConversationStore for MemoryStore {
    fn get(&self, id: &str) -> Result<Option<Vec<Turn>>> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow!("conversation store lock poisoned"))?;
        let expired = match entries.get(id) {
            Some((deadline, _)) => Instant::now() >= *deadline,
            None => return Ok(None),
        };
        if expired {
            debug!(conversation_id = id, "conversation expired");
            entries.remove(id);
            return Ok(None);
        }
        Ok(entries.get(id).map(|(_, turns)| turns.clone()))
    }

    fn put(&self, id: &str, turns: &[Turn], ttl: Duration) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow!("conversation store lock poisoned"))?;
        entries.insert(id.to_string(), (Instant::now() + ttl, turns.to_vec()));
        Ok(())
    }
}

/// Redis-backed store shared by every controller instance.
///
/// Each operation opens its own connection, so a Redis restart only fails the
/// requests that were in flight and steps for different ids never queue
/// behind one socket.
pub struct RedisStore {
    client: redis::Client,
}

impl RedisStore {
    /// Connect to Redis (e.g. `redis://127.0.0.1:6379/`). Fails when the
    /// server is unreachable at startup.
    pub fn connect(redis_url: &str) -> Result<Self> {
        let client =
            redis::Client::open(redis_url).with_context(|| format!("open redis {redis_url}"))?;
        client
            .get_connection()
            .with_context(|| format!("connect to redis {redis_url}"))?;
        Ok(Self { client })
    }

    fn connection(&self) -> Result<redis::Connection> {
        self.client.get_connection().context("connect to redis")
    }

    fn key(id: &str) -> String {
        format!("{REDIS_KEY_PREFIX}{id}")
    }
}

/// Redis `SET EX` takes whole seconds; partial seconds round up, minimum 1.
fn expiry_secs(ttl: Duration) -> u64 {
    (ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0)).max(1)
}

impl ConversationStore for RedisStore {
    #[instrument(skip_all, fields(conversation_id = id))]
    fn get(&self, id: &str) -> Result<Option<Vec<Turn>>> {
        let mut conn = self.connection()?;
        let raw: Option<String> = conn.get(Self::key(id)).context("redis GET")?;
        match raw {
            Some(raw) => {
                let turns =
                    serde_json::from_str(&raw).context("decode stored conversation history")?;
                Ok(Some(turns))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip_all, fields(conversation_id = id, turns = turns.len()))]
    fn put(&self, id: &str, turns: &[Turn], ttl: Duration) -> Result<()> {
        let payload = serde_json::to_string(turns).context("encode conversation history")?;
        let mut conn = self.connection()?;
        let ttl_secs = expiry_secs(ttl);
        let _: () = conn
            .set_ex(Self::key(id), payload, ttl_secs)
            .context("redis SET EX")?;
        debug!(ttl_secs, "conversation persisted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trips_history() {
        let store = MemoryStore::new();
        assert_eq!(store.get("c-1").expect("get"), None);

        let turns = vec![Turn::initiator("task"), Turn::responder("{}")];
        store
            .put("c-1", &turns, Duration::from_secs(60))
            .expect("put");
        assert_eq!(store.get("c-1").expect("get"), Some(turns));
    }

    #[test]
    fn memory_store_overwrites_whole_history() {
        let store = MemoryStore::new();
        store
            .put("c-1", &[Turn::initiator("a")], Duration::from_secs(60))
            .expect("put");
        let longer = vec![Turn::initiator("a"), Turn::responder("b")];
        store
            .put("c-1", &longer, Duration::from_secs(60))
            .expect("put");
        assert_eq!(store.get("c-1").expect("get"), Some(longer));
    }

    #[test]
    fn memory_store_forgets_expired_conversations() {
        let store = MemoryStore::new();
        store
            .put("c-1", &[Turn::initiator("a")], Duration::ZERO)
            .expect("put");
        assert_eq!(store.get("c-1").expect("get"), None);
    }

    #[test]
    fn redis_expiry_rounds_partial_seconds_up() {
        assert_eq!(expiry_secs(Duration::ZERO), 1);
        assert_eq!(expiry_secs(Duration::from_millis(200)), 1);
        assert_eq!(expiry_secs(Duration::from_secs(1)), 1);
        assert_eq!(expiry_secs(Duration::from_millis(1900)), 2);
        assert_eq!(expiry_secs(Duration::from_secs(3600)), 3600);
    }

    #[test]
    fn redis_connect_fails_fast_when_unreachable() {
        let err = RedisStore::connect("redis://127.0.0.1:1/").err().expect("error");
        assert!(format!("{err:#}").contains("connect to redis"));
    }

    #[test]
    fn redis_keys_are_namespaced() {
        assert_eq!(RedisStore::key("abc"), "agent:conversation:abc");
    }
}
