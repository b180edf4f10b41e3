//! Client role glue (§4.9 "Client"): tracked insert/lookup requests,
//! retried automatically until the worker that owns the key replies.
//!
//! Grounded on the original's `KeyInfoData`/`KeyInsertReqOneShot`/
//! `KeyInfoReqOneShot` pair: a shared outcome cell keyed by the request's
//! key, paired with a `DoListItem` that drives retransmission. Unlike the
//! master and worker, which each run a handful of long-lived items on one
//! shared do-list, a client may have thousands of keys in flight at once;
//! each gets its own one-shot `DoListItem` and its own lightweight retry
//! task rather than being multiplexed through a single ticking list.

use crate::config::Config;
use parking_lot::Mutex;
use ringkv_codec::message::Kind;
use ringkv_codec::payload::{KeyInfo, KeyInfoInsert, NetAddress, WirePayload};
use ringkv_codec::Message;
use ringkv_core::do_list::{DoListItem, ItemKind};
use ringkv_core::CompositeKey;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Notify;

/// A dedicated retry thread in the original polls `usleep(_maxRequestSleepTime)`
/// between attempts; the async equivalent is a short sleep between
/// `try_fire` checks, with the actual retransmission cadence governed by
/// the item's own backoff.
const RETRY_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Tracks one in-flight insert or lookup. `chunk`/`subchunk` hold the
/// request's own values until completion, at which point they are
/// overwritten with the worker-reported ones (identical on success,
/// informative on a duplicate-key mismatch).
pub struct RequestTracker {
    pub key: CompositeKey,
    pub chunk: AtomicI32,
    pub subchunk: AtomicI32,
    success: AtomicBool,
    finished: AtomicBool,
    item: DoListItem,
    notify: Notify,
}

impl RequestTracker {
    fn new(key: CompositeKey, chunk: i32, subchunk: i32, kind: ItemKind) -> Arc<Self> {
        Arc::new(Self {
            key,
            chunk: AtomicI32::new(chunk),
            subchunk: AtomicI32::new(subchunk),
            success: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            item: DoListItem::one_shot(kind),
            notify: Notify::new(),
        })
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn is_success(&self) -> bool {
        self.success.load(Ordering::SeqCst)
    }

    pub async fn wait(&self) {
        while !self.is_finished() {
            self.notify.notified().await;
        }
    }

    fn complete(&self, chunk: i32, subchunk: i32, success: bool) {
        self.chunk.store(chunk, Ordering::SeqCst);
        self.subchunk.store(subchunk, Ordering::SeqCst);
        self.success.store(success, Ordering::SeqCst);
        self.finished.store(true, Ordering::SeqCst);
        self.item.info_received();
        self.item.mark_for_removal();
        self.notify.notify_waiters();
    }
}

pub struct ClientState {
    pub config: Config,
    pub own_udp_addr: SocketAddr,
    pub default_worker_addr: SocketAddr,
    pub outgoing: UnboundedSender<(SocketAddr, Message)>,
    waiting_inserts: Mutex<HashMap<CompositeKey, Arc<RequestTracker>>>,
    waiting_lookups: Mutex<HashMap<CompositeKey, Arc<RequestTracker>>>,
}

impl ClientState {
    pub fn new(
        config: Config,
        own_udp_addr: SocketAddr,
        default_worker_addr: SocketAddr,
        outgoing: UnboundedSender<(SocketAddr, Message)>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            own_udp_addr,
            default_worker_addr,
            outgoing,
            waiting_inserts: Mutex::new(HashMap::new()),
            waiting_lookups: Mutex::new(HashMap::new()),
        })
    }

    fn send(&self, to: SocketAddr, message: Message) {
        let _ = self.outgoing.send((to, message));
    }

    fn requester_address(&self) -> NetAddress {
        NetAddress { ip: self.own_udp_addr.ip().to_string(), udp_port: self.own_udp_addr.port(), tcp_port: 0 }
    }

    /// §4.9 `keyInsertReq`: returns the existing tracker if this key is
    /// already in flight with the same value, an error on a conflicting
    /// resubmission, or registers a new one-shot retry and returns it.
    pub async fn insert_req(self: &Arc<Self>, key: CompositeKey, chunk: i32, subchunk: i32) -> Result<Arc<RequestTracker>, ringkv_core::Error> {
        loop {
            {
                let map = self.waiting_inserts.lock();
                if let Some(existing) = map.get(&key) {
                    if existing.chunk.load(Ordering::SeqCst) == chunk && existing.subchunk.load(Ordering::SeqCst) == subchunk {
                        return Ok(Arc::clone(existing));
                    }
                    return Err(ringkv_core::Error::DuplicateKeyMismatch { key_int: key.int_part(), key_str: key.str_part().to_string() });
                }
                if map.len() <= self.config.max_inserts {
                    break;
                }
            }
            tokio::time::sleep(RETRY_POLL_INTERVAL).await;
        }

        let tracker = RequestTracker::new(key.clone(), chunk, subchunk, ItemKind::ClientInsert);
        self.waiting_inserts.lock().insert(key, Arc::clone(&tracker));
        self.spawn_insert_retry(Arc::clone(&tracker));
        Ok(tracker)
    }

    pub async fn lookup_req(self: &Arc<Self>, key: CompositeKey) -> Arc<RequestTracker> {
        loop {
            {
                let map = self.waiting_lookups.lock();
                if let Some(existing) = map.get(&key) {
                    return Arc::clone(existing);
                }
                if map.len() <= self.config.max_lookups {
                    break;
                }
            }
            tokio::time::sleep(RETRY_POLL_INTERVAL).await;
        }

        let tracker = RequestTracker::new(key.clone(), 0, 0, ItemKind::ClientLookup);
        self.waiting_lookups.lock().insert(key, Arc::clone(&tracker));
        self.spawn_lookup_retry(Arc::clone(&tracker));
        tracker
    }

    fn send_insert(&self, tracker: &RequestTracker) {
        let payload = KeyInfoInsert {
            requester: self.requester_address(),
            keyinfo: KeyInfo {
                key_int: tracker.key.int_part(),
                key_str: tracker.key.str_part().to_string(),
                chunk: tracker.chunk.load(Ordering::SeqCst),
                subchunk: tracker.subchunk.load(Ordering::SeqCst),
                success: false,
            },
            hops: 0,
        };
        if let Ok(element) = payload.to_element(ringkv_codec::buffer::MAX_UDP_PAYLOAD) {
            self.send(self.default_worker_addr, Message::new(Kind::KeyInsertReq, 0, "client", 0).with_body(element));
        }
    }

    fn send_lookup(&self, tracker: &RequestTracker) {
        let payload = KeyInfoInsert {
            requester: self.requester_address(),
            keyinfo: KeyInfo { key_int: tracker.key.int_part(), key_str: tracker.key.str_part().to_string(), chunk: 0, subchunk: 0, success: false },
            hops: 0,
        };
        if let Ok(element) = payload.to_element(ringkv_codec::buffer::MAX_UDP_PAYLOAD) {
            self.send(self.default_worker_addr, Message::new(Kind::KeyInfoReq, 0, "client", 0).with_body(element));
        }
    }

    fn spawn_insert_retry(self: &Arc<Self>, tracker: Arc<RequestTracker>) {
        let state = Arc::clone(self);
        tokio::spawn(async move {
            while !tracker.item.should_remove() {
                if tracker.item.try_fire() {
                    state.send_insert(&tracker);
                    tracker.item.command_finished();
                }
                tokio::time::sleep(RETRY_POLL_INTERVAL).await;
            }
            state.waiting_inserts.lock().remove(&tracker.key);
        });
    }

    fn spawn_lookup_retry(self: &Arc<Self>, tracker: Arc<RequestTracker>) {
        let state = Arc::clone(self);
        tokio::spawn(async move {
            while !tracker.item.should_remove() {
                if tracker.item.try_fire() {
                    state.send_lookup(&tracker);
                    tracker.item.command_finished();
                }
                tokio::time::sleep(RETRY_POLL_INTERVAL).await;
            }
            state.waiting_lookups.lock().remove(&tracker.key);
        });
    }

    fn handle_key_insert_complete(&self, info: KeyInfo) {
        let key = CompositeKey::new(info.key_int, info.key_str);
        let Some(tracker) = self.waiting_inserts.lock().get(&key).cloned() else {
            log::warn!("KEY_INSERT_COMPLETE for untracked key ({}, {:?})", key.int_part(), key.str_part());
            return;
        };
        tracker.complete(info.chunk, info.subchunk, info.success);
    }

    fn handle_key_info(&self, info: KeyInfo) {
        let key = CompositeKey::new(info.key_int, info.key_str);
        let Some(tracker) = self.waiting_lookups.lock().get(&key).cloned() else {
            log::warn!("KEY_INFO for untracked key ({}, {:?})", key.int_part(), key.str_part());
            return;
        };
        tracker.complete(info.chunk, info.subchunk, info.success);
    }
}

pub struct ClientHandler {
    pub state: Arc<ClientState>,
}

#[async_trait::async_trait]
impl ringkv_core::udp_server::MessageHandler for ClientHandler {
    async fn handle(&self, message: Message, from: SocketAddr) -> Option<Vec<u8>> {
        match message.envelope.kind {
            Kind::KeyInsertComplete => {
                let info = KeyInfo::from_bytes(message.body_bytes().ok()?).ok()?;
                self.state.handle_key_insert_complete(info);
                None
            }
            Kind::KeyInfo => {
                let info = KeyInfo::from_bytes(message.body_bytes().ok()?).ok()?;
                self.state.handle_key_info(info);
                None
            }
            Kind::MsgReceived => None,
            other => {
                log::warn!("client received unexpected kind {other:?} from {from}");
                None
            }
        }
    }
}

