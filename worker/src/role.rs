//! Worker role glue (§4.9): registration, worker-list maintenance, request
//! handling/forwarding, and right-neighbor monitoring.

use crate::config::Config;
use parking_lot::Mutex;
use ringkv_codec::message::Kind;
use ringkv_codec::payload::{KeyInfo, KeyInfoInsert, NetAddress, WirePayload, WorkerListItem};
use ringkv_codec::{Buffer, Element, Message};
use ringkv_core::do_list::{DoList, DoListItem, ItemKind};
use ringkv_core::neighbor;
use ringkv_core::router::{route, RouteDecision};
use ringkv_core::worker_list::{NetworkAddress, WorkerId, WorkerList};
use ringkv_core::{key_store::InsertOutcome, key_store::LookupOutcome, CompositeKey, KeyStore};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::UnboundedSender;

pub struct WorkerState {
    pub id: AtomicU32,
    pub left_id: AtomicU32,
    pub right_id: AtomicU32,
    pub store: KeyStore,
    pub known_workers: Mutex<WorkerList>,
    pub config: Config,
    pub own_udp_addr: SocketAddr,
    pub own_tcp_addr: SocketAddr,
    pub master_addr: SocketAddr,
    pub outgoing: UnboundedSender<(SocketAddr, Message)>,
    pub do_list: DoList,
    pub register_item: DoListItem,
    pub pull_worker_list_item: DoListItem,
    pub monitor_right_item: DoListItem,
}

impl WorkerState {
    pub fn new(
        config: Config,
        own_udp_addr: SocketAddr,
        own_tcp_addr: SocketAddr,
        master_addr: SocketAddr,
        outgoing: UnboundedSender<(SocketAddr, Message)>,
    ) -> Self {
        let register_item = DoListItem::one_shot(ItemKind::RegisterWithMaster);
        let pull_worker_list_item = DoListItem::heartbeat(ItemKind::PullWorkerList);
        let monitor_right_item = DoListItem::heartbeat(ItemKind::MonitorRightNeighbor);

        let do_list = DoList::new();
        do_list.add(register_item.clone());
        do_list.add(pull_worker_list_item.clone());
        do_list.add(monitor_right_item.clone());

        Self {
            id: AtomicU32::new(0),
            left_id: AtomicU32::new(0),
            right_id: AtomicU32::new(0),
            store: KeyStore::new(config.recent_add_window),
            known_workers: Mutex::new(WorkerList::new()),
            config,
            own_udp_addr,
            own_tcp_addr,
            master_addr,
            outgoing,
            do_list,
            register_item,
            pull_worker_list_item,
            monitor_right_item,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id.load(Ordering::SeqCst)
    }

    fn send(&self, to: SocketAddr, message: Message) {
        let _ = self.outgoing.send((to, message));
    }

    /// Registration do-list command (§4.9 "register with master if id
    /// invalid"): sends `MAST_WORKER_ADD_REQ` carrying our own addresses.
    pub fn send_register_request(&self) {
        let addr = NetAddress {
            ip: self.own_udp_addr.ip().to_string(),
            udp_port: self.own_udp_addr.port(),
            tcp_port: self.own_tcp_addr.port(),
        };
        let Ok(element) = addr.to_element(ringkv_codec::buffer::MAX_UDP_PAYLOAD) else { return };
        self.send(self.master_addr, Message::new(Kind::MastWorkerAddReq, 0, "worker", 0).with_body(element));
    }

    pub fn send_pull_worker_list(&self) {
        self.send(self.master_addr, Message::new(Kind::MastWorkerListReq, 0, "worker", 0));
    }

    fn send_worker_info_request(&self, id: WorkerId) {
        self.send(
            self.master_addr,
            Message::new(Kind::MastWorkerInfoReq, 0, "worker", 0).with_body(Element::U32(id)),
        );
    }

    /// §4.6 "Key count and range report", sent periodically to the master.
    pub fn send_keys_info_to_master(&self) {
        let (map_size, recent_adds, range) = self.store.report();
        let info = ringkv_codec::payload::WorkerKeysInfo {
            id: self.id(),
            map_size: map_size as u32,
            recent_adds: recent_adds as u32,
            range: ringkv_core::to_wire_range(&range),
            left: ringkv_codec::payload::Neighbor { id: self.left_id.load(Ordering::SeqCst) },
            right: ringkv_codec::payload::Neighbor { id: self.right_id.load(Ordering::SeqCst) },
        };
        let Ok(element) = info.to_element(ringkv_codec::buffer::MAX_UDP_PAYLOAD) else { return };
        self.send(self.master_addr, Message::new(Kind::WorkerKeysInfo, 0, "worker", 0).with_body(element));
    }

    /// §4.6 insert + §4.8 forward. `from` is only used for a `MSG_RECEIVED`
    /// parse-error reply; successful completions always go to the
    /// requester address embedded in the payload.
    fn handle_insert(&self, payload: KeyInfoInsert) {
        let key = CompositeKey::new(payload.keyinfo.key_int, payload.keyinfo.key_str.clone());
        let requester = socket_addr_of(&payload.requester);

        match self.store.insert(key.clone(), payload.keyinfo.chunk, payload.keyinfo.subchunk) {
            InsertOutcome::Stored { chunk, subchunk } => {
                if let Some(addr) = requester {
                    let info = KeyInfo {
                        key_int: key.int_part(),
                        key_str: key.str_part().to_string(),
                        chunk,
                        subchunk,
                        success: true,
                    };
                    if let Ok(el) = info.to_element(ringkv_codec::buffer::MAX_UDP_PAYLOAD) {
                        self.send(addr, Message::new(Kind::KeyInsertComplete, 0, "worker", 0).with_body(el));
                    }
                }
            }
            InsertOutcome::DuplicateMismatch { chunk, subchunk } => {
                log::error!("duplicate key mismatch for ({}, {:?}): kept ({chunk}, {subchunk})", key.int_part(), key.str_part());
                if let Some(addr) = requester {
                    let info = KeyInfo { key_int: key.int_part(), key_str: key.str_part().to_string(), chunk, subchunk, success: false };
                    if let Ok(el) = info.to_element(ringkv_codec::buffer::MAX_UDP_PAYLOAD) {
                        self.send(addr, Message::new(Kind::KeyInsertComplete, 0, "worker", 0).with_body(el));
                    }
                }
            }
            InsertOutcome::OutOfRange => self.forward(key, payload, Kind::KeyInsertReq),
        }
    }

    fn handle_lookup(&self, payload: KeyInfoInsert) {
        let key = CompositeKey::new(payload.keyinfo.key_int, payload.keyinfo.key_str.clone());
        let requester = socket_addr_of(&payload.requester);

        match self.store.lookup(&key) {
            LookupOutcome::Found { chunk, subchunk } => {
                if let Some(addr) = requester {
                    let info = KeyInfo { key_int: key.int_part(), key_str: key.str_part().to_string(), chunk, subchunk, success: true };
                    if let Ok(el) = info.to_element(ringkv_codec::buffer::MAX_UDP_PAYLOAD) {
                        self.send(addr, Message::new(Kind::KeyInfo, 0, "worker", 0).with_body(el));
                    }
                }
            }
            LookupOutcome::NotFound => {
                if let Some(addr) = requester {
                    let info = KeyInfo { key_int: key.int_part(), key_str: key.str_part().to_string(), chunk: 0, subchunk: 0, success: false };
                    if let Ok(el) = info.to_element(ringkv_codec::buffer::MAX_UDP_PAYLOAD) {
                        self.send(addr, Message::new(Kind::KeyInfo, 0, "worker", 0).with_body(el));
                    }
                }
            }
            LookupOutcome::OutOfRange => self.forward(key, payload, Kind::KeyInfoReq),
        }
    }

    fn forward(&self, key: CompositeKey, mut payload: KeyInfoInsert, kind: Kind) {
        let list = self.known_workers.lock();
        let own_range = self.store.range();
        let decision = route(
            &list,
            self.id(),
            &own_range.min,
            self.left_id.load(Ordering::SeqCst),
            self.right_id.load(Ordering::SeqCst),
            &key,
            payload.hops,
            ringkv_core::router::DEFAULT_HOPS_MAX,
        );
        drop(list);

        match decision {
            RouteDecision::ForwardToOwner(addr) | RouteDecision::ForwardToNeighbor(addr) => {
                payload.hops += 1;
                if let (Ok(el), Some(target)) = (payload.to_element(ringkv_codec::buffer::MAX_UDP_PAYLOAD), to_socket_addr(&addr)) {
                    self.send(target, Message::new(kind, 0, "worker", 0).with_body(el));
                }
            }
            RouteDecision::Drop(reason) => {
                log::warn!("dropping request for key ({}, {:?}): {reason:?}", key.int_part(), key.str_part());
            }
        }
    }
}

fn socket_addr_of(addr: &NetAddress) -> Option<SocketAddr> {
    format!("{}:{}", addr.ip, addr.udp_port).parse().ok()
}

fn to_socket_addr(addr: &NetworkAddress) -> Option<SocketAddr> {
    format!("{}:{}", addr.ip, addr.port).parse().ok()
}

pub struct WorkerHandler {
    pub state: Arc<WorkerState>,
}

#[async_trait::async_trait]
impl ringkv_core::udp_server::MessageHandler for WorkerHandler {
    async fn handle(&self, message: Message, from: SocketAddr) -> Option<Vec<u8>> {
        match message.envelope.kind {
            Kind::MastWorkerInfo => {
                let item = WorkerListItem::from_bytes(message.body_bytes().ok()?).ok()?;
                if self.state.id() == 0 {
                    self.state.id.store(item.id, Ordering::SeqCst);
                    log::info!("registered with master, assigned id {}", item.id);
                    self.state.register_item.info_received();
                    self.state.register_item.command_finished();
                } else if let (Some(addr), Some(range)) = (item.address.as_ref(), item.range.as_ref()) {
                    let net_addr = NetworkAddress::new(addr.ip.clone(), addr.udp_port);
                    let _ = self.state.known_workers.lock().update_entry(
                        item.id,
                        Some(net_addr),
                        Some(NetworkAddress::new(addr.ip.clone(), addr.tcp_port)),
                        Some(ringkv_core::from_wire_range(range)),
                    );
                }
                None
            }

            Kind::MastWorkerList => {
                let list = ringkv_codec::payload::MastWorkerList::from_bytes(message.body_bytes().ok()?).ok()?;
                let new_ids = self.state.known_workers.lock().merge_ids(list.workers.iter().map(|w| w.id));
                for id in new_ids {
                    self.state.send_worker_info_request(id);
                }
                self.state.pull_worker_list_item.command_finished();
                None
            }

            Kind::WorkerLeftNeighbor => {
                let mut body = Buffer::from_bytes(message.body_bytes().ok()?);
                let id = Element::safe_decode(&mut body).ok()??.into_u32().ok()?;
                self.state.left_id.store(id, Ordering::SeqCst);
                None
            }

            Kind::WorkerRightNeighbor => {
                let mut body = Buffer::from_bytes(message.body_bytes().ok()?);
                let id = Element::safe_decode(&mut body).ok()??.into_u32().ok()?;
                self.state.right_id.store(id, Ordering::SeqCst);
                None
            }

            Kind::KeyInsertReq => {
                let payload = KeyInfoInsert::from_bytes(message.body_bytes().ok()?).ok()?;
                self.state.handle_insert(payload);
                None
            }

            Kind::KeyInfoReq => {
                let payload = KeyInfoInsert::from_bytes(message.body_bytes().ok()?).ok()?;
                self.state.handle_lookup(payload);
                None
            }

            Kind::MsgReceived => None,

            other => {
                log::warn!("worker received unexpected kind {other:?} from {from}");
                None
            }
        }
    }
}

/// Server side of the right-neighbor TCP link (§4.7.1): accepts the left
/// neighbor's connection, runs the handshake, then serves whatever shift
/// rounds that connection drives until it closes. Each accepted
/// connection is handled on its own task; a worker expects at most one at
/// a time (its left neighbor), but nothing here assumes that.
pub async fn accept_loop(state: Arc<WorkerState>, listener: TcpListener) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                log::warn!("tcp accept failed: {e}");
                continue;
            }
        };
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(e) = serve_left_connection(state, stream).await {
                log::warn!("left-neighbor connection from {peer} ended with error: {e}");
            }
        });
    }
}

async fn serve_left_connection(state: Arc<WorkerState>, stream: TcpStream) -> Result<(), ringkv_core::Error> {
    let right_id = state.right_id.load(Ordering::SeqCst);
    let (mut framed, _left_info) = neighbor::accept_left(stream, state.id(), &state.store, right_id).await?;

    loop {
        let Some(element) = framed.read_element().await? else { return Ok(()) };
        let kind = element.into_u16().map_err(ringkv_core::Error::Protocol)?;

        if kind == Kind::ShiftToRight as u16 {
            let list = neighbor::receive_shift_to_right(&mut framed).await?;
            let pairs = list.pairs.into_iter().map(|p| {
                let key = CompositeKey::new(p.key_int, p.key_str);
                (key, p.chunk, p.subchunk)
            });
            state.store.receive_shifted_to_right(pairs.collect());
        } else if kind == Kind::ShiftFromRight as u16 {
            let _len = framed.read_u32().await?;
            let request: ringkv_codec::payload::KeyShiftRequest = framed.read_payload().await?;
            neighbor::serve_shift_from_right(&mut framed, &state.store, request.keys_to_shift as usize).await?;
            let ack = framed.read_element().await?.ok_or(ringkv_codec::Error::Incomplete)?;
            if ack.into_u16().map_err(ringkv_core::Error::Protocol)? != Kind::ShiftFromRightReceived as u16 {
                log::warn!("expected SHIFT_FROM_RIGHT_RECEIVED ack");
            }
        } else {
            log::warn!("unexpected tag {kind} on left-neighbor connection");
            return Ok(());
        }
    }
}

/// One "monitor right neighbor" round (§4.7): open a fresh connection to
/// the right neighbor, exchange key info, and shift a batch of keys in
/// whichever direction rebalances the two workers, per
/// `config.threshold_neighbor_shift`. The connection closes at the end of
/// every round rather than being held across ticks, since nothing in the
/// shift protocol assumes a long-lived link and a fresh TCP round avoids
/// keeping a stream alive in shared state between ticks.
pub async fn monitor_tick(state: Arc<WorkerState>) {
    let right_id = state.right_id.load(Ordering::SeqCst);
    if right_id == 0 {
        state.monitor_right_item.command_finished();
        return;
    }

    let right_tcp_addr = state.known_workers.lock().get(right_id).and_then(|e| e.tcp_addr.clone());
    let Some(right_tcp_addr) = right_tcp_addr.and_then(|a| to_socket_addr(&a)) else {
        state.monitor_right_item.command_finished();
        return;
    };

    let left_id = state.left_id.load(Ordering::SeqCst);
    let result = neighbor::connect_to_right(right_tcp_addr, state.id(), right_id, &state.store, left_id).await;

    match result {
        Ok((mut framed, right_info)) => {
            let own_count = state.store.key_count() as f64;
            let right_count = right_info.map_size as f64;
            let threshold = state.config.threshold_neighbor_shift;
            let max_to_shift = state.config.max_keys_to_shift;

            if own_count > right_count * threshold && own_count > right_count {
                let excess = ((own_count - right_count) / 2.0) as usize;
                let to_shift = excess.min(max_to_shift).min((own_count / 3.0) as usize);
                if to_shift >= 1 {
                    if let Err(e) = neighbor::shift_to_right(&mut framed, &state.store, to_shift).await {
                        log::warn!("shift to right {right_id} failed: {e}");
                    }
                }
            } else if right_count > own_count * threshold && right_count > own_count {
                let deficit = ((right_count - own_count) / 2.0) as usize;
                let to_shift = deficit.min(max_to_shift).min((right_count / 3.0) as usize);
                if to_shift >= 1 {
                    match neighbor::request_shift_from_right(&mut framed, to_shift as u32).await {
                        Ok(list) => {
                            let pairs = list
                                .pairs
                                .into_iter()
                                .map(|p| (CompositeKey::new(p.key_int, p.key_str), p.chunk, p.subchunk))
                                .collect();
                            state.store.receive_shifted_from_right(pairs);
                        }
                        Err(e) => log::warn!("shift from right {right_id} failed: {e}"),
                    }
                }
            }
        }
        Err(e) => log::warn!("monitor round with right neighbor {right_id} failed: {e}"),
    }

    state.monitor_right_item.command_finished();
}
