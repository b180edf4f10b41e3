//! Right-neighbor TCP link: handshake (§4.7.1) and shift protocol (§4.7.2,
//! §4.7.3).
//!
//! Only the right link is an active outbound connection; the left link is
//! the symmetric half of a peer's right link, accepted by the TCP server
//! loop. Framed reads use the shared codec's buffered reader driven in a
//! loop, per the spec's requirement that element framing run in a
//! dedicated task rather than the UDP dispatch task.

use crate::error::Error;
use crate::key::{CompositeKey, KeyRange};
use crate::key_store::KeyStore;
use crate::wire::{from_wire_range, to_wire_range};
use ringkv_codec::message::Kind;
use ringkv_codec::payload::{KeyInfo, KeyList, KeyShiftRequest, Neighbor, WirePayload, WorkerKeysInfo};
use ringkv_codec::{Buffer, Element};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// TCP stream framing buffer size; a handshake/shift frame is small
/// relative to a UDP datagram but unbounded in principle (a large key
/// batch), so this is generous.
const STREAM_BUF_CAPACITY: usize = 1 << 20;

/// Reads length-delimited element frames off a `TcpStream`, growing its
/// internal buffer via `read`/`compact` exactly as §4.2 describes for TCP.
pub struct FramedStream {
    stream: TcpStream,
    buf: Buffer,
}

impl FramedStream {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream, buf: Buffer::with_capacity(STREAM_BUF_CAPACITY) }
    }

    pub async fn write_element(&mut self, element: &Element) -> Result<(), Error> {
        let mut out = Buffer::with_capacity(STREAM_BUF_CAPACITY);
        element.encode(&mut out)?;
        self.stream.write_all(out.written()).await?;
        Ok(())
    }

    /// Reads until one complete element is available, EOF is reached with
    /// nothing decoded (`Ok(None)`), or a decode error occurs.
    pub async fn read_element(&mut self) -> Result<Option<Element>, Error> {
        loop {
            if let Some(element) = Element::safe_decode(&mut self.buf)? {
                self.buf.compact();
                return Ok(Some(element));
            }

            self.buf.compact();
            let n = self.stream.read(self.buf.spare_capacity_mut()).await?;
            if n == 0 {
                return Ok(None);
            }
            self.buf.advance_write(n)?;
        }
    }

    pub async fn write_u32(&mut self, v: u32) -> Result<(), Error> {
        self.write_element(&Element::U32(v)).await
    }

    pub async fn read_u32(&mut self) -> Result<u32, Error> {
        self.read_element().await?.ok_or(ringkv_codec::Error::Incomplete)?.into_u32().map_err(Into::into)
    }

    pub async fn write_payload(&mut self, payload: &impl WirePayload) -> Result<(), Error> {
        self.write_element(&payload.to_element(STREAM_BUF_CAPACITY)?).await
    }

    pub async fn read_payload<T: WirePayload>(&mut self) -> Result<T, Error> {
        let element = self.read_element().await?.ok_or(ringkv_codec::Error::Incomplete)?;
        T::from_bytes(&element.into_bytes()?).map_err(Into::into)
    }
}

fn keys_info(id: u32, store: &KeyStore, left_id: u32, right_id: u32) -> WorkerKeysInfo {
    let (map_size, recent_adds, range) = store.report();
    WorkerKeysInfo {
        id,
        map_size: map_size as u32,
        recent_adds: recent_adds as u32,
        range: to_wire_range(&range),
        left: Neighbor { id: left_id },
        right: Neighbor { id: right_id },
    }
}

/// Client side of §4.7.1: dial the right neighbor, verify its id, announce
/// ourselves, and adopt the range feedback it sends back. Returns the open
/// stream (kept alive for subsequent shift rounds) and the neighbor's
/// reported key info.
pub async fn connect_to_right(
    addr: std::net::SocketAddr,
    own_id: u32,
    expected_right_id: u32,
    own_store: &KeyStore,
    left_id: u32,
) -> Result<(FramedStream, WorkerKeysInfo), Error> {
    let stream = TcpStream::connect(addr).await?;
    let mut framed = FramedStream::new(stream);

    let reported_id = framed.read_u32().await?;
    if reported_id != expected_right_id {
        return Err(Error::FatalTopology(format!(
            "right neighbor id mismatch: expected {expected_right_id}, got {reported_id}"
        )));
    }

    framed.write_element(&Element::U16(Kind::ImYourLNeighbor as u16)).await?;
    let own_info = keys_info(own_id, own_store, left_id, expected_right_id);
    framed.write_payload(&own_info).await?;

    let right_info: WorkerKeysInfo = framed.read_payload().await?;

    let right_min = CompositeKey::new(right_info.range.min_int, right_info.range.min_str.clone());
    own_store.set_range(KeyRange::bounded(own_store.range().min, right_min));

    Ok((framed, right_info))
}

/// Server side of §4.7.1, run once per accepted connection (at most one:
/// the right neighbor's left link). Adopts or refines our own range and
/// replies with our own key info.
pub async fn accept_left(
    stream: TcpStream,
    own_id: u32,
    own_store: &KeyStore,
    right_id: u32,
) -> Result<(FramedStream, WorkerKeysInfo), Error> {
    let mut framed = FramedStream::new(stream);
    framed.write_u32(own_id).await?;

    let greeting = framed.read_element().await?.ok_or(ringkv_codec::Error::Incomplete)?;
    if greeting.into_u16()? != Kind::ImYourLNeighbor as u16 {
        return Err(Error::Protocol(ringkv_codec::Error::Protocol("expected IM_YOUR_L_NEIGHBOR".into())));
    }

    let left_info: WorkerKeysInfo = framed.read_payload().await?;
    let left_range = from_wire_range(&left_info.range);

    let current = own_store.range();
    if !current.valid {
        // §4.7.1: adopt min = increment(left.range.max); inherit
        // unlimited from the left neighbor, else a placeholder max equal
        // to min until this worker receives its first key.
        let new_min = left_range.max.successor();
        let new_range = if left_range.unlimited {
            KeyRange::unlimited_from(new_min.clone())
        } else {
            KeyRange::bounded(new_min.clone(), new_min.successor())
        };
        own_store.set_range(new_range);
    } else if own_store.key_count() > 0 {
        // Our key map is non-empty: narrow min to our first key so the
        // left neighbor's subsequent max update (read back by its
        // `connect_to_right`) matches our actual data.
        if let Some(first_key) = own_store.first_key() {
            let mut updated = current;
            updated.min = first_key;
            own_store.set_range(updated);
        }
    }

    let own_info = keys_info(own_id, own_store, left_info.id, right_id);
    framed.write_payload(&own_info).await?;

    Ok((framed, left_info))
}

/// TO-RIGHT (§4.7.2): run by the left/client side of an established link.
/// On any I/O error the staged keys are rolled back before returning,
/// satisfying §4.7.3.
pub async fn shift_to_right(framed: &mut FramedStream, store: &KeyStore, count: usize) -> Result<usize, Error> {
    let Some(staging) = store.begin_shift_to_right(count) else {
        return Ok(0);
    };

    let result = async {
        let pairs = KeyList {
            pairs: staging
                .keys
                .iter()
                .map(|(k, chunk, subchunk)| KeyInfo {
                    key_int: k.int_part(),
                    key_str: k.str_part().to_string(),
                    chunk: *chunk,
                    subchunk: *subchunk,
                    success: true,
                })
                .collect(),
        };

        framed.write_element(&Element::U16(Kind::ShiftToRight as u16)).await?;
        framed.write_u32(pairs.pairs.len() as u32).await?;
        framed.write_payload(&pairs).await?;

        let ack = framed.read_element().await?.ok_or(ringkv_codec::Error::Incomplete)?;
        if ack.into_u16()? != Kind::ShiftToRightReceived as u16 {
            return Err(Error::Protocol(ringkv_codec::Error::Protocol("expected SHIFT_TO_RIGHT_RECEIVED".into())));
        }

        Ok::<(), Error>(())
    }
    .await;

    match result {
        Ok(()) => {
            let moved = staging.keys.len();
            store.commit_shift_to_right();
            Ok(moved)
        }
        Err(e) => {
            store.rollback_shift_to_right();
            Err(e)
        }
    }
}

/// Receiving side of TO-RIGHT, run on the worker's dedicated "accept from
/// left" task. Insertion is idempotent (§4.7.3): a conflicting value is
/// logged and dropped, never overwritten.
pub async fn receive_shift_to_right(framed: &mut FramedStream) -> Result<KeyList, Error> {
    let _len = framed.read_u32().await?;
    let list: KeyList = framed.read_payload().await?;
    framed.write_element(&Element::U16(Kind::ShiftToRightReceived as u16)).await?;
    Ok(list)
}

/// FROM-RIGHT request (§4.7.2), sent by the left/client side.
pub async fn request_shift_from_right(framed: &mut FramedStream, count: u32) -> Result<KeyList, Error> {
    framed.write_element(&Element::U16(Kind::ShiftFromRight as u16)).await?;
    framed.write_u32(count).await?;
    framed.write_payload(&KeyShiftRequest { keys_to_shift: count }).await?;

    let list: KeyList = framed.read_payload().await?;
    framed.write_element(&Element::U16(Kind::ShiftFromRightReceived as u16)).await?;
    Ok(list)
}

/// Right-side handling of a FROM-RIGHT request: stage and send back the
/// smallest `count` keys.
pub async fn serve_shift_from_right(framed: &mut FramedStream, store: &KeyStore, count: usize) -> Result<usize, Error> {
    let Some(staging) = store.begin_shift_from_right(count) else {
        framed.write_payload(&KeyList { pairs: Vec::new() }).await?;
        return Ok(0);
    };

    let pairs = KeyList {
        pairs: staging
            .keys
            .iter()
            .map(|(k, chunk, subchunk)| KeyInfo {
                key_int: k.int_part(),
                key_str: k.str_part().to_string(),
                chunk: *chunk,
                subchunk: *subchunk,
                success: true,
            })
            .collect(),
    };

    let result = framed.write_payload(&pairs).await;
    match result {
        Ok(()) => {
            let moved = staging.keys.len();
            store.commit_shift_from_right();
            Ok(moved)
        }
        Err(e) => {
            store.rollback_shift_from_right();
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn handshake_propagates_the_right_neighbors_min_as_our_max() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let right_store = KeyStore::default();
        right_store.set_range(KeyRange::unlimited_from(CompositeKey::new(100, "")));

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            accept_left(stream, 2, &right_store, 0).await.unwrap();
        });

        let left_store = KeyStore::default();
        left_store.set_range(KeyRange::bounded(CompositeKey::min(), CompositeKey::new(200, "")));

        let (mut _framed, right_info) =
            connect_to_right(addr, 1, 2, &left_store, 0).await.unwrap();

        assert_eq!(right_info.id, 2);
        assert_eq!(left_store.range().max, CompositeKey::new(100, ""));

        tokio::time::timeout(Duration::from_secs(1), server).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn a_to_right_shift_round_trips_and_updates_the_receivers_min() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let left_store = KeyStore::default();
        left_store.set_range(KeyRange::unlimited_from(CompositeKey::min()));
        for i in 0..10u64 {
            left_store.insert(CompositeKey::new(i, ""), i as i32, 0);
        }

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut framed = FramedStream::new(stream);
            let kind = framed.read_element().await.unwrap().unwrap().into_u16().unwrap();
            assert_eq!(kind, Kind::ShiftToRight as u16);
            receive_shift_to_right(&mut framed).await.unwrap()
        });

        let client = TcpStream::connect(addr).await.unwrap();
        let mut framed = FramedStream::new(client);
        let moved = shift_to_right(&mut framed, &left_store, 3).await.unwrap();
        assert_eq!(moved, 3);
        assert_eq!(left_store.key_count(), 7);

        let received = tokio::time::timeout(Duration::from_secs(1), server).await.unwrap().unwrap();
        assert_eq!(received.pairs.len(), 3);
    }
}
