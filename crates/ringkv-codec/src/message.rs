use crate::{Buffer, Element, Error};

/// The full enumeration of message kinds the core must recognize (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Kind {
    MsgReceived = 100,
    Test = 101,
    MastInfoReq = 110,
    MastInfo = 111,
    MastWorkerListReq = 112,
    MastWorkerList = 113,
    MastWorkerInfoReq = 114,
    MastWorkerInfo = 115,
    MastWorkerAddReq = 116,
    WorkerKeysInfoReq = 120,
    WorkerKeysInfo = 121,
    KeyInsertReq = 130,
    KeyInsertComplete = 131,
    KeyInfoReq = 132,
    KeyInfo = 133,
    WorkerLeftNeighbor = 140,
    WorkerRightNeighbor = 141,
    ImYourLNeighbor = 142,
    ImYourRNeighbor = 143,
    NeighborVerified = 144,
    ShiftToRight = 150,
    ShiftToRightReceived = 151,
    ShiftFromRight = 152,
    ShiftFromRightReceived = 153,
}

impl Kind {
    pub fn from_u16(v: u16) -> Result<Self, Error> {
        Ok(match v {
            100 => Self::MsgReceived,
            101 => Self::Test,
            110 => Self::MastInfoReq,
            111 => Self::MastInfo,
            112 => Self::MastWorkerListReq,
            113 => Self::MastWorkerList,
            114 => Self::MastWorkerInfoReq,
            115 => Self::MastWorkerInfo,
            116 => Self::MastWorkerAddReq,
            120 => Self::WorkerKeysInfoReq,
            121 => Self::WorkerKeysInfo,
            130 => Self::KeyInsertReq,
            131 => Self::KeyInsertComplete,
            132 => Self::KeyInfoReq,
            133 => Self::KeyInfo,
            140 => Self::WorkerLeftNeighbor,
            141 => Self::WorkerRightNeighbor,
            142 => Self::ImYourLNeighbor,
            143 => Self::ImYourRNeighbor,
            144 => Self::NeighborVerified,
            150 => Self::ShiftToRight,
            151 => Self::ShiftToRightReceived,
            152 => Self::ShiftFromRight,
            153 => Self::ShiftFromRightReceived,
            other => return Err(Error::Protocol(format!("unknown message kind {other}"))),
        })
    }
}

/// The fixed four-element envelope every message begins with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub kind: Kind,
    pub msg_id: u64,
    pub sender_host: String,
    pub sender_port: u32,
}

/// A full message: envelope plus kind-specific elements, most commonly a
/// single `STRING` carrying an embedded structured payload (§6.1).
#[derive(Debug, Clone)]
pub struct Message {
    pub envelope: Envelope,
    pub body: Vec<Element>,
}

impl Message {
    pub fn new(kind: Kind, msg_id: u64, sender_host: impl Into<String>, sender_port: u32) -> Self {
        Self {
            envelope: Envelope {
                kind,
                msg_id,
                sender_host: sender_host.into(),
                sender_port,
            },
            body: Vec::new(),
        }
    }

    pub fn with_body(mut self, element: Element) -> Self {
        self.body.push(element);
        self
    }

    pub fn encode(&self, buf: &mut Buffer) -> Result<(), Error> {
        Element::U16(self.envelope.kind as u16).encode(buf)?;
        Element::U64(self.envelope.msg_id).encode(buf)?;
        Element::str(self.envelope.sender_host.clone()).encode(buf)?;
        Element::U32(self.envelope.sender_port).encode(buf)?;

        for element in &self.body {
            element.encode(buf)?;
        }

        Ok(())
    }

    /// Decode one full message, leaving the buffer positioned just past it.
    ///
    /// Returns `Ok(None)` if the envelope itself is not yet fully available;
    /// a datagram is expected to contain a complete message in one shot, so
    /// this mainly protects against a truncated UDP receive.
    pub fn decode(buf: &mut Buffer) -> Result<Option<Message>, Error> {
        let checkpoint = buf.read_pos();

        let kind = match Element::safe_decode(buf)? {
            Some(el) => Kind::from_u16(el.into_u16()?)?,
            None => return Ok(None),
        };

        let msg_id = match Element::safe_decode(buf)? {
            Some(el) => el.into_u64()?,
            None => {
                buf.set_read_pos(checkpoint);
                return Ok(None);
            }
        };

        let sender_host = match Element::safe_decode(buf)? {
            Some(el) => el.into_string()?,
            None => {
                buf.set_read_pos(checkpoint);
                return Ok(None);
            }
        };

        let sender_port = match Element::safe_decode(buf)? {
            Some(el) => el.into_u32()?,
            None => {
                buf.set_read_pos(checkpoint);
                return Ok(None);
            }
        };

        let mut body = Vec::new();
        loop {
            match Element::safe_decode(buf)? {
                Some(el) => body.push(el),
                None => break,
            }
        }

        Ok(Some(Message {
            envelope: Envelope {
                kind,
                msg_id,
                sender_host,
                sender_port,
            },
            body,
        }))
    }

    /// Convenience accessor for the common case of a single embedded
    /// structured payload, returned as raw bytes (the payload need not be
    /// valid UTF-8 — see [`crate::payload`]).
    pub fn body_bytes(&self) -> Result<&[u8], Error> {
        match self.body.first() {
            Some(Element::Str(bytes)) => Ok(bytes.as_slice()),
            Some(_) => Err(Error::Protocol("expected STRING body element".into())),
            None => Err(Error::Protocol("message has no body".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips() {
        let msg = Message::new(Kind::KeyInsertReq, 7, "worker-1.local", 9876)
            .with_body(Element::str("payload"));

        let mut buf = Buffer::with_capacity(MAX_UDP_PAYLOAD_TEST);
        msg.encode(&mut buf).unwrap();

        let decoded = Message::decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.envelope.kind, Kind::KeyInsertReq);
        assert_eq!(decoded.envelope.msg_id, 7);
        assert_eq!(decoded.envelope.sender_host, "worker-1.local");
        assert_eq!(decoded.envelope.sender_port, 9876);
        assert_eq!(decoded.body_bytes().unwrap(), b"payload");
    }

    const MAX_UDP_PAYLOAD_TEST: usize = crate::buffer::MAX_UDP_PAYLOAD;

    #[test]
    fn unknown_kind_is_rejected() {
        let mut buf = Buffer::with_capacity(64);
        Element::U16(9999).encode(&mut buf).unwrap();
        assert!(matches!(Kind::from_u16(9999), Err(Error::Protocol(_))));
        let _ = buf; // kind parsed eagerly; buffer unused beyond this check
    }
}
