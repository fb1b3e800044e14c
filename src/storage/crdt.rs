// src/storage/crdt.rs

//! Gossip-replicated store built on chitchat.
//!
//! Every replica writes only its own share of a counter into its chitchat
//! node state; reads sum the shares of all live replicas, which makes each
//! counter a grow-only CRDT. Values written with `set` are per-replica
//! registers resolved last-writer-wins. Counters and registers live in
//! separate namespaces: `get` prefers a live counter, `increment` never
//! touches registers. Replication is eventually consistent, so two replicas
//! can briefly disagree on a count.

use async_trait::async_trait;
use chitchat::transport::UdpTransport;
use chitchat::{
    spawn_chitchat, Chitchat, ChitchatConfig, ChitchatHandle, ChitchatId, FailureDetectorConfig,
};
use parking_lot::Mutex as SyncMutex;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::clock::SharedClock;
use crate::config::CrdtConfig;
use crate::error::{Result, StorageError};
use crate::storage::{deadline, encode_counter, BufferedPipeline, StorageBackend};

const CLUSTER_ID: &str = "replaygate";

fn counter_key(key: &str) -> String {
    format!("c|{}", key)
}

fn register_key(key: &str) -> String {
    format!("r|{}", key)
}

/// One replica's contribution to a counter: `"{count}|{expires_ms}"`
#[derive(Debug, Clone, Copy, PartialEq)]
struct Share {
    count: i64,
    expires_ms: Option<i64>,
}

/// One replica's register: `"{written_ms}|{expires_ms}|{hex value}"`
#[derive(Debug, Clone, PartialEq)]
struct Register {
    written_ms: i64,
    expires_ms: Option<i64>,
    value: Vec<u8>,
}

fn live(expires_ms: Option<i64>, now_ms: i64) -> bool {
    expires_ms.map_or(true, |at| at > now_ms)
}

fn format_expiry(expires_ms: Option<i64>) -> String {
    expires_ms.map(|ms| ms.to_string()).unwrap_or_default()
}

fn parse_expiry(raw: &str) -> Option<Option<i64>> {
    if raw.is_empty() {
        Some(None)
    } else {
        raw.parse().ok().map(Some)
    }
}

impl Share {
    fn encode(&self) -> String {
        format!("{}|{}", self.count, format_expiry(self.expires_ms))
    }

    fn decode(raw: &str) -> Option<Self> {
        let (count, expires) = raw.split_once('|')?;
        Some(Self {
            count: count.parse().ok()?,
            expires_ms: parse_expiry(expires)?,
        })
    }
}

impl Register {
    fn encode(&self) -> String {
        let hex: String = self.value.iter().map(|b| format!("{:02x}", b)).collect();
        format!("{}|{}|{}", self.written_ms, format_expiry(self.expires_ms), hex)
    }

    fn decode(raw: &str) -> Option<Self> {
        let mut parts = raw.splitn(3, '|');
        let written_ms = parts.next()?.parse().ok()?;
        let expires_ms = parse_expiry(parts.next()?)?;
        let hex = parts.next()?;
        if !hex.is_ascii() || hex.len() % 2 != 0 {
            return None;
        }
        let value = (0..hex.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
            .collect::<Option<Vec<u8>>>()?;
        Some(Self {
            written_ms,
            expires_ms,
            value,
        })
    }
}

/// Sum of every live replica's live share, or `None` when no share is live
fn sum_shares(chitchat: &Chitchat, key: &str, now_ms: i64) -> Option<i64> {
    let mut total = None;
    for node_id in chitchat.live_nodes() {
        let share = chitchat
            .node_state(node_id)
            .and_then(|state| state.get(key))
            .and_then(|raw| Share::decode(raw))
            .filter(|share| live(share.expires_ms, now_ms));
        if let Some(share) = share {
            total = Some(total.unwrap_or(0) + share.count);
        }
    }
    total
}

/// Newest live register across replicas; ties go to the larger node id
fn newest_register(chitchat: &Chitchat, key: &str, now_ms: i64) -> Option<Register> {
    let mut newest: Option<(Register, String)> = None;
    for node_id in chitchat.live_nodes() {
        let register = chitchat
            .node_state(node_id)
            .and_then(|state| state.get(key))
            .and_then(|raw| Register::decode(raw))
            .filter(|register| live(register.expires_ms, now_ms));
        let Some(register) = register else {
            continue;
        };
        let wins = match &newest {
            None => true,
            Some((current, writer)) => {
                (register.written_ms, node_id.node_id.as_str()) > (current.written_ms, writer.as_str())
            }
        };
        if wins {
            newest = Some((register, node_id.node_id.clone()));
        }
    }
    newest.map(|(register, _)| register)
}

struct Replica {
    node_id: String,
    gossip_addr: SocketAddr,
    clock: SharedClock,
    chitchat: Arc<Mutex<Chitchat>>,
    handle: Mutex<Option<ChitchatHandle>>,
    /// Keys this replica wrote, with their expiry, for the sweeper
    owned: SyncMutex<HashMap<String, Option<i64>>>,
    sweeper: SyncMutex<Option<JoinHandle<()>>>,
}

/// Replicated counter store
#[derive(Clone)]
pub struct CrdtStorage {
    inner: Arc<Replica>,
}

impl fmt::Debug for CrdtStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrdtStorage")
            .field("node_id", &self.inner.node_id)
            .field("gossip_addr", &self.inner.gossip_addr)
            .finish()
    }
}

// Port 0 cannot be advertised to peers, so pick a concrete free port first
async fn resolve_gossip_addr(bind_addr: &str) -> Result<SocketAddr> {
    let addr = tokio::net::lookup_host(bind_addr)
        .await
        .map_err(|e| StorageError::Replication(format!("resolve {}: {}", bind_addr, e)))?
        .next()
        .ok_or_else(|| StorageError::Replication(format!("{} resolved to nothing", bind_addr)))?;
    if addr.port() != 0 {
        return Ok(addr);
    }
    let socket = std::net::UdpSocket::bind(addr)
        .map_err(|e| StorageError::Replication(format!("bind {}: {}", addr, e)))?;
    socket
        .local_addr()
        .map_err(|e| StorageError::Replication(e.to_string()).into())
}

impl CrdtStorage {
    pub fn node_id(&self) -> &str {
        &self.inner.node_id
    }

    /// Address peers should list to reach this replica
    pub fn gossip_addr(&self) -> SocketAddr {
        self.inner.gossip_addr
    }

    pub async fn live_node_count(&self) -> usize {
        self.inner.chitchat.lock().await.live_nodes().count()
    }

    fn now_ms(&self) -> i64 {
        self.inner.clock.now().timestamp_millis()
    }

    fn expiry_ms(&self, ttl: Duration) -> Option<i64> {
        deadline(self.inner.clock.now(), ttl).map(|at| at.timestamp_millis())
    }

    fn remember(&self, chitchat_key: &str, expires_ms: Option<i64>) {
        self.inner
            .owned
            .lock()
            .insert(chitchat_key.to_string(), expires_ms);
    }

    // Deletes this replica's expired keys so its gossip state stays bounded
    async fn sweep(replica: Weak<Replica>, every: Duration) {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            let Some(inner) = replica.upgrade() else {
                break;
            };
            let now_ms = inner.clock.now().timestamp_millis();
            let expired: Vec<String> = {
                let mut owned = inner.owned.lock();
                let expired: Vec<String> = owned
                    .iter()
                    .filter(|(_, expires)| !live(**expires, now_ms))
                    .map(|(key, _)| key.clone())
                    .collect();
                for key in &expired {
                    owned.remove(key);
                }
                expired
            };
            if expired.is_empty() {
                continue;
            }
            let mut chitchat = inner.chitchat.lock().await;
            for key in &expired {
                chitchat.self_node_state().delete(key);
            }
            debug!(removed = expired.len(), "swept expired replicated keys");
        }
    }
}

#[async_trait]
impl StorageBackend for CrdtStorage {
    type Config = CrdtConfig;
    type Pipeline = BufferedPipeline;

    async fn open(config: Self::Config, clock: SharedClock) -> Result<Self> {
        let node_id = if config.node_id.trim().is_empty() {
            format!("replaygate-{}", uuid::Uuid::new_v4())
        } else {
            config.node_id.clone()
        };
        let gossip_addr = resolve_gossip_addr(&config.bind_addr).await?;

        info!(
            node_id = %node_id,
            gossip_addr = %gossip_addr,
            peers = ?config.peers,
            "starting replicated store"
        );

        let chitchat_config = ChitchatConfig {
            chitchat_id: ChitchatId {
                node_id: node_id.clone(),
                generation_id: 0,
                gossip_advertise_addr: gossip_addr,
            },
            cluster_id: CLUSTER_ID.to_string(),
            gossip_interval: config.gossip_interval,
            listen_addr: gossip_addr,
            seed_nodes: config.peers.clone(),
            failure_detector_config: FailureDetectorConfig {
                initial_interval: config.gossip_interval,
                ..Default::default()
            },
            marked_for_deletion_grace_period: Duration::from_secs(3600),
            catchup_callback: None,
            extra_liveness_predicate: None,
        };

        let handle = spawn_chitchat(chitchat_config, Vec::new(), &UdpTransport)
            .await
            .map_err(|e| StorageError::Replication(e.to_string()))?;

        let inner = Arc::new(Replica {
            node_id,
            gossip_addr,
            clock,
            chitchat: handle.chitchat(),
            handle: Mutex::new(Some(handle)),
            owned: SyncMutex::new(HashMap::new()),
            sweeper: SyncMutex::new(None),
        });
        let sweeper = tokio::spawn(Self::sweep(Arc::downgrade(&inner), config.gossip_interval));
        *inner.sweeper.lock() = Some(sweeper);

        Ok(Self { inner })
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now_ms = self.now_ms();
        let chitchat = self.inner.chitchat.lock().await;
        if let Some(total) = sum_shares(&chitchat, &counter_key(key), now_ms) {
            return Ok(Some(encode_counter(total)));
        }
        Ok(newest_register(&chitchat, &register_key(key), now_ms).map(|r| r.value))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let register = Register {
            written_ms: self.now_ms(),
            expires_ms: ttl.and_then(|ttl| self.expiry_ms(ttl)),
            value: value.to_vec(),
        };
        let chitchat_key = register_key(key);

        let mut chitchat = self.inner.chitchat.lock().await;
        chitchat
            .self_node_state()
            .set(&chitchat_key, register.encode());
        self.remember(&chitchat_key, register.expires_ms);
        Ok(())
    }

    async fn increment(&self, key: &str, amount: i64) -> Result<i64> {
        let now_ms = self.now_ms();
        let chitchat_key = counter_key(key);
        let mut chitchat = self.inner.chitchat.lock().await;

        // An expired local share restarts from zero without a TTL
        let current = chitchat
            .self_node_state()
            .get(&chitchat_key)
            .and_then(|raw| Share::decode(raw))
            .filter(|share| live(share.expires_ms, now_ms))
            .unwrap_or(Share {
                count: 0,
                expires_ms: None,
            });
        let updated = Share {
            count: current.count + amount,
            expires_ms: current.expires_ms,
        };
        chitchat
            .self_node_state()
            .set(&chitchat_key, updated.encode());
        self.remember(&chitchat_key, updated.expires_ms);

        debug!(key = %chitchat_key, local = updated.count, "incremented replicated counter");
        Ok(sum_shares(&chitchat, &chitchat_key, now_ms).unwrap_or(updated.count))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now_ms = self.now_ms();
        let expires_ms = self.expiry_ms(ttl);
        let mut chitchat = self.inner.chitchat.lock().await;
        let mut applied = false;

        let counter = counter_key(key);
        let share = chitchat
            .self_node_state()
            .get(&counter)
            .and_then(|raw| Share::decode(raw))
            .filter(|share| live(share.expires_ms, now_ms));
        if let Some(share) = share {
            let share = Share { expires_ms, ..share };
            chitchat.self_node_state().set(&counter, share.encode());
            self.remember(&counter, expires_ms);
            applied = true;
        }

        let register = register_key(key);
        let stored = chitchat
            .self_node_state()
            .get(&register)
            .and_then(|raw| Register::decode(raw))
            .filter(|r| live(r.expires_ms, now_ms));
        if let Some(stored) = stored {
            let stored = Register { expires_ms, ..stored };
            chitchat.self_node_state().set(&register, stored.encode());
            self.remember(&register, expires_ms);
            applied = true;
        }

        Ok(applied)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Err(StorageError::Unsupported(format!(
            "delete of {:?}: replicated counters only grow",
            key
        ))
        .into())
    }

    fn pipeline(&self) -> Self::Pipeline {
        BufferedPipeline::default()
    }

    async fn execute_pipeline(&self, pipeline: Self::Pipeline) -> Result<Vec<Result<Vec<u8>>>> {
        Ok(pipeline.run(self).await)
    }

    async fn close(&self) -> Result<()> {
        if let Some(sweeper) = self.inner.sweeper.lock().take() {
            sweeper.abort();
        }
        let handle = self.inner.handle.lock().await.take();
        if let Some(handle) = handle {
            info!(node_id = %self.inner.node_id, "stopping replicated store");
            handle
                .shutdown()
                .await
                .map_err(|e| StorageError::Close(format!("chitchat shutdown: {:?}", e)))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_share_encoding() {
        let share = Share {
            count: 7,
            expires_ms: Some(1_700_000_000_000),
        };
        assert_eq!(Share::decode(&share.encode()), Some(share));
        assert_eq!(
            Share::decode("3|"),
            Some(Share {
                count: 3,
                expires_ms: None
            })
        );
        assert_eq!(Share::decode("x|1"), None);
    }

    #[test]
    fn test_register_encoding_keeps_binary_values() {
        let register = Register {
            written_ms: 42,
            expires_ms: None,
            value: vec![0, 255, b'|', 7],
        };
        assert_eq!(Register::decode(&register.encode()), Some(register));
        assert_eq!(Register::decode("1||abc"), None, "odd hex length");
    }

    #[test]
    fn test_register_rejects_non_ascii_payload() {
        // Even byte length, but the first pair ends inside a multi-byte char
        assert_eq!(Register::decode("1||1\u{e9}1"), None);
        assert_eq!(Register::decode("1||\u{e9}\u{e9}"), None);
        assert_eq!(Register::decode("1||zz"), None);
    }
}
