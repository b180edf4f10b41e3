#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

mod config;
mod role;

use ringkv_core::do_list::ItemKind;
use ringkv_core::udp_server::SendGuard;
use role::{WorkerHandler, WorkerState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, UdpSocket};
use tokio::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = config::Config::load()?;
    simple_logger::init_with_level(config.log_level)?;
    log::info!("worker starting: udp {} tcp {}", config.w_port_udp, config.w_port_tcp);

    let master_addr: SocketAddr = format!("{}:{}", config.master_host, config.master_port_udp).parse()?;
    let udp_bind: SocketAddr = format!("0.0.0.0:{}", config.w_port_udp).parse()?;
    let tcp_bind: SocketAddr = format!("0.0.0.0:{}", config.w_port_tcp).parse()?;

    let socket = Arc::new(UdpSocket::bind(udp_bind).await?);
    let own_udp_addr = socket.local_addr()?;
    let listener = TcpListener::bind(tcp_bind).await?;
    let own_tcp_addr = listener.local_addr()?;

    let (outgoing_tx, mut outgoing_rx) = tokio::sync::mpsc::unbounded_channel();
    let state = Arc::new(WorkerState::new(config, own_udp_addr, own_tcp_addr, master_addr, outgoing_tx));

    let send = SendGuard::new(Arc::clone(&socket));
    tokio::spawn(async move {
        while let Some((addr, message)) = outgoing_rx.recv().await {
            let mut buf = ringkv_codec::Buffer::with_capacity(ringkv_codec::buffer::MAX_UDP_PAYLOAD);
            if message.encode(&mut buf).is_ok() {
                send.send_to(buf.written(), addr).await;
            }
        }
    });

    tokio::spawn(role::accept_loop(Arc::clone(&state), listener));

    let do_list_state = Arc::clone(&state);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(do_list_state.config.loop_sleep_time.max(Duration::from_millis(50)));
        loop {
            interval.tick().await;
            do_list_state.do_list.tick(|item| match item.kind() {
                ItemKind::RegisterWithMaster => do_list_state.send_register_request(),
                ItemKind::PullWorkerList => do_list_state.send_pull_worker_list(),
                ItemKind::MonitorRightNeighbor => {
                    tokio::spawn(role::monitor_tick(Arc::clone(&do_list_state)));
                }
                other => log::warn!("worker do-list fired unexpected item kind {other:?}"),
            });
        }
    });

    let keys_info_state = Arc::clone(&state);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(10));
        loop {
            interval.tick().await;
            if keys_info_state.id() != 0 {
                keys_info_state.send_keys_info_to_master();
            }
        }
    });

    let handler = Arc::new(WorkerHandler { state });
    ringkv_core::udp_server::run(socket, handler).await?;
    Ok(())
}
