//! Structured payload bodies carried inside a message's `STRING` element
//! (§6.1). Each type serializes as a flat concatenation of elements using
//! the same tag scheme as the envelope; there is no separate schema
//! language, matching the "any equivalent structured serialization" note
//! in the spec.

use crate::{Buffer, Element, Error};

/// Encode/decode a structured payload as a self-contained element stream
/// that can be embedded as one message body `STRING`.
pub trait WirePayload: Sized {
    fn encode_into(&self, buf: &mut Buffer) -> Result<(), Error>;
    fn decode_from(buf: &mut Buffer) -> Result<Self, Error>;

    fn to_bytes(&self, capacity: usize) -> Result<Vec<u8>, Error> {
        let mut buf = Buffer::with_capacity(capacity);
        self.encode_into(&mut buf)?;
        Ok(buf.written().to_vec())
    }

    fn to_element(&self, capacity: usize) -> Result<Element, Error> {
        Ok(Element::bytes(self.to_bytes(capacity)?))
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let mut buf = Buffer::from_bytes(bytes);
        Self::decode_from(&mut buf)
    }
}

fn next(buf: &mut Buffer) -> Result<Element, Error> {
    Element::safe_decode(buf)?.ok_or(Error::Incomplete)
}

/// `(u64, string)` key, chunk/subchunk location, and a success flag for the
/// lookup/insert reply path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyInfo {
    pub key_int: u64,
    pub key_str: String,
    pub chunk: i32,
    pub subchunk: i32,
    pub success: bool,
}

impl WirePayload for KeyInfo {
    fn encode_into(&self, buf: &mut Buffer) -> Result<(), Error> {
        Element::U64(self.key_int).encode(buf)?;
        Element::str(self.key_str.clone()).encode(buf)?;
        Element::U32(self.chunk as u32).encode(buf)?;
        Element::U32(self.subchunk as u32).encode(buf)?;
        Element::U16(self.success as u16).encode(buf)
    }

    fn decode_from(buf: &mut Buffer) -> Result<Self, Error> {
        Ok(KeyInfo {
            key_int: next(buf)?.into_u64()?,
            key_str: next(buf)?.into_string()?,
            chunk: next(buf)?.into_u32()? as i32,
            subchunk: next(buf)?.into_u32()? as i32,
            success: next(buf)?.into_u16()? != 0,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetAddress {
    pub ip: String,
    pub udp_port: u16,
    pub tcp_port: u16,
}

impl WirePayload for NetAddress {
    fn encode_into(&self, buf: &mut Buffer) -> Result<(), Error> {
        Element::str(self.ip.clone()).encode(buf)?;
        Element::U16(self.udp_port).encode(buf)?;
        Element::U16(self.tcp_port).encode(buf)
    }

    fn decode_from(buf: &mut Buffer) -> Result<Self, Error> {
        Ok(NetAddress {
            ip: next(buf)?.into_string()?,
            udp_port: next(buf)?.into_u16()?,
            tcp_port: next(buf)?.into_u16()?,
        })
    }
}

/// An insert request plus the requester's return address and the
/// forwarding hop counter (§4.8).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyInfoInsert {
    pub requester: NetAddress,
    pub keyinfo: KeyInfo,
    pub hops: u32,
}

impl WirePayload for KeyInfoInsert {
    fn encode_into(&self, buf: &mut Buffer) -> Result<(), Error> {
        self.requester.encode_into(buf)?;
        self.keyinfo.encode_into(buf)?;
        Element::U32(self.hops).encode(buf)
    }

    fn decode_from(buf: &mut Buffer) -> Result<Self, Error> {
        Ok(KeyInfoInsert {
            requester: NetAddress::decode_from(buf)?,
            keyinfo: KeyInfo::decode_from(buf)?,
            hops: next(buf)?.into_u32()?,
        })
    }
}

/// A worker's ownership interval, wire form of [`crate::Element`]-encoded
/// `CompositeKey` bounds (§3 `KeyRange`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerRange {
    pub valid: bool,
    pub min_int: u64,
    pub min_str: String,
    pub max_int: u64,
    pub max_str: String,
    pub max_unlimited: bool,
}

impl WirePayload for WorkerRange {
    fn encode_into(&self, buf: &mut Buffer) -> Result<(), Error> {
        Element::U16(self.valid as u16).encode(buf)?;
        Element::U64(self.min_int).encode(buf)?;
        Element::str(self.min_str.clone()).encode(buf)?;
        Element::U64(self.max_int).encode(buf)?;
        Element::str(self.max_str.clone()).encode(buf)?;
        Element::U16(self.max_unlimited as u16).encode(buf)
    }

    fn decode_from(buf: &mut Buffer) -> Result<Self, Error> {
        Ok(WorkerRange {
            valid: next(buf)?.into_u16()? != 0,
            min_int: next(buf)?.into_u64()?,
            min_str: next(buf)?.into_string()?,
            max_int: next(buf)?.into_u64()?,
            max_str: next(buf)?.into_string()?,
            max_unlimited: next(buf)?.into_u16()? != 0,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Neighbor {
    pub id: u32,
}

impl WirePayload for Neighbor {
    fn encode_into(&self, buf: &mut Buffer) -> Result<(), Error> {
        Element::U32(self.id).encode(buf)
    }

    fn decode_from(buf: &mut Buffer) -> Result<Self, Error> {
        Ok(Neighbor { id: next(buf)?.into_u32()? })
    }
}

/// A worker's key count, range and neighbor ids, exchanged with the master
/// and at the start of every range-determination TCP round (§4.6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerKeysInfo {
    pub id: u32,
    pub map_size: u32,
    pub recent_adds: u32,
    pub range: WorkerRange,
    pub left: Neighbor,
    pub right: Neighbor,
}

impl WirePayload for WorkerKeysInfo {
    fn encode_into(&self, buf: &mut Buffer) -> Result<(), Error> {
        Element::U32(self.id).encode(buf)?;
        Element::U32(self.map_size).encode(buf)?;
        Element::U32(self.recent_adds).encode(buf)?;
        self.range.encode_into(buf)?;
        self.left.encode_into(buf)?;
        self.right.encode_into(buf)
    }

    fn decode_from(buf: &mut Buffer) -> Result<Self, Error> {
        Ok(WorkerKeysInfo {
            id: next(buf)?.into_u32()?,
            map_size: next(buf)?.into_u32()?,
            recent_adds: next(buf)?.into_u32()?,
            range: WorkerRange::decode_from(buf)?,
            left: Neighbor::decode_from(buf)?,
            right: Neighbor::decode_from(buf)?,
        })
    }
}

/// One entry of a worker-list broadcast: an id, with optional address and
/// range (present once the master or worker has learned them).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerListItem {
    pub id: u32,
    pub address: Option<NetAddress>,
    pub range: Option<WorkerRange>,
}

impl WirePayload for WorkerListItem {
    fn encode_into(&self, buf: &mut Buffer) -> Result<(), Error> {
        Element::U32(self.id).encode(buf)?;
        Element::U16(self.address.is_some() as u16).encode(buf)?;
        if let Some(addr) = &self.address {
            addr.encode_into(buf)?;
        }
        Element::U16(self.range.is_some() as u16).encode(buf)?;
        if let Some(range) = &self.range {
            range.encode_into(buf)?;
        }
        Ok(())
    }

    fn decode_from(buf: &mut Buffer) -> Result<Self, Error> {
        let id = next(buf)?.into_u32()?;

        let address = if next(buf)?.into_u16()? != 0 {
            Some(NetAddress::decode_from(buf)?)
        } else {
            None
        };

        let range = if next(buf)?.into_u16()? != 0 {
            Some(WorkerRange::decode_from(buf)?)
        } else {
            None
        };

        Ok(WorkerListItem { id, address, range })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MastWorkerList {
    pub workers: Vec<WorkerListItem>,
}

impl WirePayload for MastWorkerList {
    fn encode_into(&self, buf: &mut Buffer) -> Result<(), Error> {
        Element::U32(self.workers.len() as u32).encode(buf)?;
        for item in &self.workers {
            item.encode_into(buf)?;
        }
        Ok(())
    }

    fn decode_from(buf: &mut Buffer) -> Result<Self, Error> {
        let count = next(buf)?.into_u32()?;
        let mut workers = Vec::with_capacity(count as usize);
        for _ in 0..count {
            workers.push(WorkerListItem::decode_from(buf)?);
        }
        Ok(MastWorkerList { workers })
    }
}

/// Parse-error / generic-ack status codes used by [`MsgReceived`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    ParseErr,
}

impl Status {
    fn to_u16(self) -> u16 {
        match self {
            Status::Success => 0,
            Status::ParseErr => 1,
        }
    }

    fn from_u16(v: u16) -> Status {
        match v {
            0 => Status::Success,
            _ => Status::ParseErr,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgReceived {
    pub original_id: u64,
    pub original_kind: u16,
    pub status: Status,
    pub err_msg: String,
}

impl WirePayload for MsgReceived {
    fn encode_into(&self, buf: &mut Buffer) -> Result<(), Error> {
        Element::U64(self.original_id).encode(buf)?;
        Element::U16(self.original_kind).encode(buf)?;
        Element::U16(self.status.to_u16()).encode(buf)?;
        Element::str(self.err_msg.clone()).encode(buf)
    }

    fn decode_from(buf: &mut Buffer) -> Result<Self, Error> {
        Ok(MsgReceived {
            original_id: next(buf)?.into_u64()?,
            original_kind: next(buf)?.into_u16()?,
            status: Status::from_u16(next(buf)?.into_u16()?),
            err_msg: next(buf)?.into_string()?,
        })
    }
}

/// A batch of `(key, chunk, subchunk)` pairs shifted between neighbors
/// (§4.7.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyList {
    pub pairs: Vec<KeyInfo>,
}

impl WirePayload for KeyList {
    fn encode_into(&self, buf: &mut Buffer) -> Result<(), Error> {
        Element::U32(self.pairs.len() as u32).encode(buf)?;
        for pair in &self.pairs {
            pair.encode_into(buf)?;
        }
        Ok(())
    }

    fn decode_from(buf: &mut Buffer) -> Result<Self, Error> {
        let count = next(buf)?.into_u32()?;
        let mut pairs = Vec::with_capacity(count as usize);
        for _ in 0..count {
            pairs.push(KeyInfo::decode_from(buf)?);
        }
        Ok(KeyList { pairs })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyShiftRequest {
    pub keys_to_shift: u32,
}

impl WirePayload for KeyShiftRequest {
    fn encode_into(&self, buf: &mut Buffer) -> Result<(), Error> {
        Element::U32(self.keys_to_shift).encode(buf)
    }

    fn decode_from(buf: &mut Buffer) -> Result<Self, Error> {
        Ok(KeyShiftRequest { keys_to_shift: next(buf)?.into_u32()? })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_info_round_trips() {
        let info = KeyInfo {
            key_int: 0,
            key_str: "asdf_1".into(),
            chunk: 4001,
            subchunk: 200001,
            success: true,
        };

        let bytes = info.to_bytes(256).unwrap();
        assert_eq!(KeyInfo::from_bytes(&bytes).unwrap(), info);
    }

    #[test]
    fn worker_keys_info_round_trips_with_nested_range() {
        let info = WorkerKeysInfo {
            id: 2,
            map_size: 40,
            recent_adds: 3,
            range: WorkerRange {
                valid: true,
                min_int: 0,
                min_str: "m".into(),
                max_int: 0,
                max_str: String::new(),
                max_unlimited: true,
            },
            left: Neighbor { id: 1 },
            right: Neighbor { id: 0 },
        };

        let bytes = info.to_bytes(512).unwrap();
        assert_eq!(WorkerKeysInfo::from_bytes(&bytes).unwrap(), info);
    }

    #[test]
    fn worker_list_item_optional_fields_round_trip() {
        let item = WorkerListItem { id: 3, address: None, range: None };
        let bytes = item.to_bytes(64).unwrap();
        assert_eq!(WorkerListItem::from_bytes(&bytes).unwrap(), item);

        let item_with_addr = WorkerListItem {
            id: 3,
            address: Some(NetAddress { ip: "10.0.0.1".into(), udp_port: 9876, tcp_port: 9877 }),
            range: None,
        };
        let bytes = item_with_addr.to_bytes(64).unwrap();
        assert_eq!(WorkerListItem::from_bytes(&bytes).unwrap(), item_with_addr);
    }

    #[test]
    fn mast_worker_list_round_trips() {
        let list = MastWorkerList {
            workers: vec![
                WorkerListItem { id: 1, address: None, range: None },
                WorkerListItem { id: 2, address: None, range: None },
            ],
        };

        let bytes = list.to_bytes(256).unwrap();
        assert_eq!(MastWorkerList::from_bytes(&bytes).unwrap(), list);
    }
}
