#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

mod config;
mod role;

use clap::Parser;
use config::{Cli, Config};
use ringkv_core::udp_server::SendGuard;
use ringkv_core::CompositeKey;
use role::{ClientHandler, ClientState};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

/// §4.9 "bench": the original's `appClientNum` derives each record's
/// chunk/subchunk deterministically from the key so a lookup can verify
/// the round trip without a side channel.
fn calc_chunk(j: u64) -> i32 {
    (j % 10000) as i32
}

fn calc_subchunk(j: u64) -> i32 {
    (j % 100) as i32
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load_with_cli(&cli)?;
    simple_logger::init_with_level(config.log_level)?;

    let default_worker_addr: SocketAddr = format!("{}:{}", config.def_worker_host, config.def_worker_port_udp).parse()?;
    let udp_bind: SocketAddr = format!("0.0.0.0:{}", config.client_port_udp).parse()?;
    let socket = Arc::new(tokio::net::UdpSocket::bind(udp_bind).await?);
    let own_udp_addr = socket.local_addr()?;
    log::info!("client bound to {own_udp_addr}, default worker {default_worker_addr}");

    let (outgoing_tx, mut outgoing_rx) = tokio::sync::mpsc::unbounded_channel();
    let state = ClientState::new(config, own_udp_addr, default_worker_addr, outgoing_tx);

    let send = SendGuard::new(Arc::clone(&socket));
    tokio::spawn(async move {
        while let Some((addr, message)) = outgoing_rx.recv().await {
            let mut buf = ringkv_codec::Buffer::with_capacity(ringkv_codec::buffer::MAX_UDP_PAYLOAD);
            if message.encode(&mut buf).is_ok() {
                send.send_to(buf.written(), addr).await;
            }
        }
    });

    let handler = Arc::new(ClientHandler { state: Arc::clone(&state) });
    tokio::spawn(ringkv_core::udp_server::run(socket, handler));

    if let Some(bench) = cli.bench.clone() {
        let [start, end] = bench[..] else {
            anyhow::bail!("--bench takes exactly START and END");
        };
        run_bench(Arc::clone(&state), start, end).await;
        return Ok(());
    }

    log::info!("client idle, serving replies only (pass --bench START END to self-test)");
    std::future::pending::<()>().await;
    Ok(())
}

/// Mirrors `appClientNum.cc`: insert every key in `start..=end` (or the
/// reverse range if `start > end`, matching the original's two loop
/// directions), wait for completion, then look every key back up and
/// verify the reported chunk/subchunk match what was inserted.
async fn run_bench(state: Arc<ClientState>, start: u64, end: u64) {
    let keys: Vec<u64> = if end >= start { (start..=end).collect() } else { (end..=start).rev().collect() };
    let total = keys.len();
    log::info!("bench: inserting {total} keys ({start}..={end})");

    let insert_started = Instant::now();
    let mut trackers = Vec::with_capacity(total);
    for &j in &keys {
        let key = CompositeKey::new(j, "");
        match state.insert_req(key, calc_chunk(j), calc_subchunk(j)).await {
            Ok(tracker) => trackers.push((j, tracker)),
            Err(e) => log::warn!("bench: insert_req({j}) rejected: {e}"),
        }
    }

    let mut insert_success = 0usize;
    let mut insert_failed = 0usize;
    for (j, tracker) in &trackers {
        tracker.wait().await;
        if tracker.is_success() {
            insert_success += 1;
        } else {
            insert_failed += 1;
            log::warn!("bench: insert for key {j} did not succeed");
        }
    }
    log::info!(
        "bench: insert phase done in {:.2}s, {insert_success} succeeded, {insert_failed} failed",
        insert_started.elapsed().as_secs_f64()
    );

    let lookup_started = Instant::now();
    let mut lookup_trackers = Vec::with_capacity(total);
    for &j in &keys {
        let key = CompositeKey::new(j, "");
        let tracker = state.lookup_req(key).await;
        lookup_trackers.push((j, tracker));
    }

    let mut lookup_success = 0usize;
    let mut lookup_mismatch = 0usize;
    for (j, tracker) in &lookup_trackers {
        tracker.wait().await;
        let expected_chunk = calc_chunk(*j);
        let expected_subchunk = calc_subchunk(*j);
        let got_chunk = tracker.chunk.load(std::sync::atomic::Ordering::SeqCst);
        let got_subchunk = tracker.subchunk.load(std::sync::atomic::Ordering::SeqCst);
        if tracker.is_success() && got_chunk == expected_chunk && got_subchunk == expected_subchunk {
            lookup_success += 1;
        } else {
            lookup_mismatch += 1;
            log::warn!(
                "bench: lookup mismatch for key {j}: expected ({expected_chunk}, {expected_subchunk}), got ({got_chunk}, {got_subchunk})"
            );
        }
    }
    log::info!(
        "bench: lookup phase done in {:.2}s, {lookup_success} verified, {lookup_mismatch} mismatched",
        lookup_started.elapsed().as_secs_f64()
    );
}
