//! Master role glue (§4.9): worker registration, key-count reports, and
//! neighbor assignment for ring rebalancing.

use crate::config::Config;
use parking_lot::Mutex;
use ringkv_codec::message::Kind;
use ringkv_codec::payload::{MastWorkerList, NetAddress, WirePayload, WorkerKeysInfo, WorkerListItem};
use ringkv_codec::{Buffer, Element, Message};
use ringkv_core::worker_list::{NetworkAddress, WorkerId, WorkerList};
use ringkv_core::to_wire_range;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

pub struct MasterState {
    pub workers: Mutex<WorkerList>,
    pub adding_worker_id: Mutex<Option<WorkerId>>,
    pub config: Config,
    pub outgoing: UnboundedSender<(NetworkAddress, Message)>,
}

impl MasterState {
    pub fn new(config: Config, outgoing: UnboundedSender<(NetworkAddress, Message)>) -> Self {
        Self { workers: Mutex::new(WorkerList::new()), adding_worker_id: Mutex::new(None), config, outgoing }
    }

    /// §4.9 "`_assign_neighbor_if_needed`". Queues any resulting
    /// neighbor-assignment messages on `outgoing` for the caller to send.
    fn assign_neighbor_if_needed(&self, just_updated: Option<WorkerId>) {
        let mut adding = self.adding_worker_id.lock();
        let mut workers = self.workers.lock();

        if let Some(pending_id) = *adding {
            if just_updated == Some(pending_id) {
                if let Some(entry) = workers.get(pending_id) {
                    if entry.range.valid {
                        let _ = workers.activate(pending_id);
                        *adding = None;
                    }
                }
            }
            return;
        }

        if workers.has_multiple_right_edges() {
            log::error!("fatal topology: more than one worker reports unlimited=true");
            return;
        }

        if workers.average_key_count() <= self.config.max_keys_per_worker as f64 {
            return;
        }

        let Some(inactive_id) = workers.first_inactive() else { return };
        let Some(right_edge_id) = workers.right_edge() else { return };
        if inactive_id == right_edge_id {
            return;
        }

        let right_edge_addr = workers.get(right_edge_id).and_then(|e| e.udp_addr.clone());
        let inactive_addr = workers.get(inactive_id).and_then(|e| e.udp_addr.clone());

        if let (Some(right_addr), Some(inactive_addr)) = (right_edge_addr, inactive_addr) {
            let right_left_id = workers.get(right_edge_id).map(|e| e.left_id).unwrap_or(0);
            let _ = workers.set_neighbors(right_edge_id, right_left_id, inactive_id);
            let _ = workers.set_neighbors(inactive_id, right_edge_id, 0);

            let _ = self.outgoing.send((
                right_addr,
                Message::new(Kind::WorkerRightNeighbor, 0, "master", 0).with_body(Element::U32(inactive_id)),
            ));
            let _ = self.outgoing.send((
                inactive_addr,
                Message::new(Kind::WorkerLeftNeighbor, 0, "master", 0).with_body(Element::U32(right_edge_id)),
            ));

            *adding = Some(inactive_id);
            log::debug!("assigning worker {inactive_id} as new right neighbor of {right_edge_id}");
        }
    }
}

pub struct MasterHandler {
    pub state: Arc<MasterState>,
}

#[async_trait::async_trait]
impl ringkv_core::udp_server::MessageHandler for MasterHandler {
    async fn handle(&self, message: Message, from: SocketAddr) -> Option<Vec<u8>> {
        let capacity = ringkv_codec::buffer::MAX_UDP_PAYLOAD;

        match message.envelope.kind {
            Kind::MastWorkerAddReq => {
                let addr = NetAddress::from_bytes(message.body_bytes().ok()?).ok()?;
                let udp_addr = NetworkAddress::new(addr.ip.clone(), addr.udp_port);
                let tcp_addr = NetworkAddress::new(addr.ip, addr.tcp_port);

                let id = match self.state.workers.lock().add_worker(udp_addr, tcp_addr) {
                    Ok(entry) => entry.id,
                    Err(e) => {
                        log::warn!("add_worker from {from} rejected: {e}");
                        return None;
                    }
                };

                self.dispatch_followups(id);

                let item = WorkerListItem { id, address: None, range: None };
                let mut buf = Buffer::with_capacity(capacity);
                Message::new(Kind::MastWorkerInfo, message.envelope.msg_id, "master", 0)
                    .with_body(item.to_element(capacity).ok()?)
                    .encode(&mut buf)
                    .ok()?;
                Some(buf.written().to_vec())
            }

            Kind::WorkerKeysInfo => {
                let info = WorkerKeysInfo::from_bytes(message.body_bytes().ok()?).ok()?;
                let range = ringkv_core::from_wire_range(&info.range);

                {
                    let mut workers = self.state.workers.lock();
                    if let Err(e) = workers.update_entry(info.id, None, None, Some(range)) {
                        log::warn!("update_entry for worker {} failed: {e}", info.id);
                        return None;
                    }
                    if let Some(entry) = workers.get_mut(info.id) {
                        entry.key_count = info.map_size;
                        entry.recent_add_count = info.recent_adds;
                    }
                }

                self.dispatch_followups(info.id);
                None
            }

            Kind::MastWorkerListReq => {
                let ids: Vec<WorkerListItem> = self
                    .state
                    .workers
                    .lock()
                    .ids()
                    .map(|id| WorkerListItem { id, address: None, range: None })
                    .collect();

                let mut buf = Buffer::with_capacity(capacity);
                Message::new(Kind::MastWorkerList, message.envelope.msg_id, "master", 0)
                    .with_body(MastWorkerList { workers: ids }.to_element(capacity).ok()?)
                    .encode(&mut buf)
                    .ok()?;
                Some(buf.written().to_vec())
            }

            Kind::MastWorkerInfoReq => {
                let mut body = Buffer::from_bytes(message.body_bytes().ok()?);
                let id = Element::safe_decode(&mut body).ok()??.into_u32().ok()?;

                let workers = self.state.workers.lock();
                let entry = workers.get(id)?;
                let item = WorkerListItem {
                    id,
                    address: entry.udp_addr.as_ref().map(|a| NetAddress {
                        ip: a.ip.clone(),
                        udp_port: a.port,
                        tcp_port: entry.tcp_addr.as_ref().map(|t| t.port).unwrap_or(0),
                    }),
                    range: Some(to_wire_range(&entry.range)),
                };

                let mut buf = Buffer::with_capacity(capacity);
                Message::new(Kind::MastWorkerInfo, message.envelope.msg_id, "master", 0)
                    .with_body(item.to_element(capacity).ok()?)
                    .encode(&mut buf)
                    .ok()?;
                Some(buf.written().to_vec())
            }

            Kind::MastInfoReq => {
                let mut buf = Buffer::with_capacity(capacity);
                Message::new(Kind::MastInfo, message.envelope.msg_id, "master", 0).encode(&mut buf).ok()?;
                Some(buf.written().to_vec())
            }

            Kind::MsgReceived => None,

            other => {
                log::warn!("master received unexpected kind {other:?} from {from}");
                None
            }
        }
    }
}

impl MasterHandler {
    /// The UDP server's handler contract only returns a single reply to
    /// the original sender, so any neighbor-assignment broadcast this
    /// update triggers is queued on `state.outgoing` and drained by the
    /// sender task in `main.rs`.
    fn dispatch_followups(&self, just_updated: WorkerId) {
        self.state.assign_neighbor_if_needed(Some(just_updated));
    }
}
