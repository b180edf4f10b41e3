#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

mod config;
mod role;

use ringkv_core::udp_server::SendGuard;
use role::{MasterHandler, MasterState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = config::Config::load()?;
    simple_logger::init_with_level(config.log_level)?;
    log::info!("master starting on udp port {}", config.port_udp);

    let (outgoing_tx, mut outgoing_rx) = tokio::sync::mpsc::unbounded_channel();
    let state = Arc::new(MasterState::new(config, outgoing_tx));

    let addr: SocketAddr = format!("0.0.0.0:{}", state.config.port_udp).parse()?;
    let socket = Arc::new(UdpSocket::bind(addr).await?);
    let send = SendGuard::new(Arc::clone(&socket));

    tokio::spawn(async move {
        while let Some((addr, message)) = outgoing_rx.recv().await {
            let Ok(target): Result<SocketAddr, _> = format!("{}:{}", addr.ip, addr.port).parse() else {
                log::warn!("cannot parse neighbor-assignment target {}:{}", addr.ip, addr.port);
                continue;
            };
            let mut buf = ringkv_codec::Buffer::with_capacity(ringkv_codec::buffer::MAX_UDP_PAYLOAD);
            if message.encode(&mut buf).is_ok() {
                send.send_to(buf.written(), target).await;
            }
        }
    });

    let handler = Arc::new(MasterHandler { state });
    ringkv_core::udp_server::run(socket, handler).await?;
    Ok(())
}
