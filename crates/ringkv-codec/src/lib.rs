//! Framed element codec for the ringkv ring protocol.
//!
//! The wire format is a self-describing concatenation of tag-prefixed
//! elements (§4.1): a single byte selects `STRING`/`U16`/`U32`/`U64`,
//! followed by the big-endian payload. A message is a fixed four-element
//! envelope (`kind`, `msg_id`, `sender_host`, `sender_port`) followed by
//! zero or more kind-specific elements.

pub mod buffer;
pub mod error;
pub mod message;
pub mod payload;

pub use buffer::Buffer;
pub use error::Error;
pub use message::{Envelope, Kind, Message};

/// Tag byte that precedes every encoded element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    String = 1,
    U16 = 2,
    U32 = 3,
    U64 = 4,
}

impl Tag {
    pub fn from_byte(byte: u8) -> Result<Self, Error> {
        Ok(match byte {
            1 => Self::String,
            2 => Self::U16,
            3 => Self::U32,
            4 => Self::U64,
            other => return Err(Error::Protocol(format!("unknown element tag {other}"))),
        })
    }
}

/// A single decoded wire element.
///
/// `STRING` carries raw bytes (§4.1: "no NUL", not a UTF-8 guarantee) since
/// it doubles as the envelope for a kind-specific binary payload (§6.1);
/// callers that need text call [`Element::into_string`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Element {
    Str(Vec<u8>),
    U16(u16),
    U32(u32),
    U64(u64),
}

impl Element {
    pub fn str(s: impl Into<String>) -> Element {
        Element::Str(s.into().into_bytes())
    }

    pub fn bytes(bytes: Vec<u8>) -> Element {
        Element::Str(bytes)
    }

    pub fn encode(&self, buf: &mut Buffer) -> Result<(), Error> {
        match self {
            Element::Str(bytes) => {
                buf.append(&[Tag::String as u8])?;
                buf.append(&(bytes.len() as u32).to_be_bytes())?;
                buf.append(bytes)
            }
            Element::U16(v) => {
                buf.append(&[Tag::U16 as u8])?;
                buf.append(&v.to_be_bytes())
            }
            Element::U32(v) => {
                buf.append(&[Tag::U32 as u8])?;
                buf.append(&v.to_be_bytes())
            }
            Element::U64(v) => {
                buf.append(&[Tag::U64 as u8])?;
                buf.append(&v.to_be_bytes())
            }
        }
    }

    /// Decode one element, rolling both cursors back on a truncated frame.
    ///
    /// Returns `Ok(None)` when the buffer does not yet hold a full element;
    /// the caller should retry once more bytes have arrived (§4.2 "safe
    /// retrieve").
    pub fn safe_decode(buf: &mut Buffer) -> Result<Option<Element>, Error> {
        let checkpoint = buf.read_pos();

        match Self::try_decode(buf) {
            Ok(element) => Ok(Some(element)),
            Err(Error::Incomplete) => {
                buf.set_read_pos(checkpoint);
                Ok(None)
            }
            Err(e) => {
                buf.set_read_pos(checkpoint);
                Err(e)
            }
        }
    }

    fn try_decode(buf: &mut Buffer) -> Result<Element, Error> {
        let mut tag_byte = [0u8; 1];
        buf.retrieve(&mut tag_byte)?;

        Ok(match Tag::from_byte(tag_byte[0])? {
            Tag::String => {
                let mut len_bytes = [0u8; 4];
                buf.retrieve(&mut len_bytes)?;
                let len = u32::from_be_bytes(len_bytes) as usize;

                let mut data = vec![0u8; len];
                buf.retrieve(&mut data)?;

                Element::Str(data)
            }
            Tag::U16 => {
                let mut b = [0u8; 2];
                buf.retrieve(&mut b)?;
                Element::U16(u16::from_be_bytes(b))
            }
            Tag::U32 => {
                let mut b = [0u8; 4];
                buf.retrieve(&mut b)?;
                Element::U32(u32::from_be_bytes(b))
            }
            Tag::U64 => {
                let mut b = [0u8; 8];
                buf.retrieve(&mut b)?;
                Element::U64(u64::from_be_bytes(b))
            }
        })
    }

    pub fn into_string(self) -> Result<String, Error> {
        match self {
            Element::Str(bytes) => String::from_utf8(bytes)
                .map_err(|e| Error::Protocol(format!("invalid utf8 string: {e}"))),
            other => Err(Error::Protocol(format!("expected STRING, got {other:?}"))),
        }
    }

    pub fn into_bytes(self) -> Result<Vec<u8>, Error> {
        match self {
            Element::Str(bytes) => Ok(bytes),
            other => Err(Error::Protocol(format!("expected STRING, got {other:?}"))),
        }
    }

    pub fn into_u16(self) -> Result<u16, Error> {
        match self {
            Element::U16(v) => Ok(v),
            other => Err(Error::Protocol(format!("expected U16, got {other:?}"))),
        }
    }

    pub fn into_u32(self) -> Result<u32, Error> {
        match self {
            Element::U32(v) => Ok(v),
            other => Err(Error::Protocol(format!("expected U32, got {other:?}"))),
        }
    }

    pub fn into_u64(self) -> Result<u64, Error> {
        match self {
            Element::U64(v) => Ok(v),
            other => Err(Error::Protocol(format!("expected U64, got {other:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(el: Element) {
        let mut buf = Buffer::with_capacity(6000);
        el.encode(&mut buf).unwrap();
        let decoded = Element::safe_decode(&mut buf).unwrap().unwrap();
        assert_eq!(el, decoded);
    }

    #[test]
    fn round_trips_every_element_kind() {
        roundtrip(Element::str("asdf_1"));
        roundtrip(Element::str(""));
        roundtrip(Element::U16(0xBEEF));
        roundtrip(Element::U32(0xDEAD_BEEF));
        roundtrip(Element::U64(0xDEAD_BEEF_CAFE_F00D));
    }

    #[test]
    fn encoding_is_big_endian_on_the_wire() {
        let mut buf = Buffer::with_capacity(64);
        Element::U32(0x0102_0304).encode(&mut buf).unwrap();

        let mut tag = [0u8; 1];
        buf.retrieve(&mut tag).unwrap();
        assert_eq!(tag[0], Tag::U32 as u8);

        let mut payload = [0u8; 4];
        buf.retrieve(&mut payload).unwrap();
        assert_eq!(payload, [0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn truncated_frame_rolls_back_and_reports_none() {
        let mut buf = Buffer::with_capacity(64);
        Element::U64(42).encode(&mut buf).unwrap();

        // Drop the last byte so the element is one short.
        let read_before = buf.read_pos();
        buf.truncate_write(buf.write_pos() - 1);

        assert_eq!(Element::safe_decode(&mut buf).unwrap(), None);
        assert_eq!(buf.read_pos(), read_before);

        // Once the missing byte arrives decoding succeeds.
        buf.append(&[0]).unwrap();
        assert_eq!(Element::safe_decode(&mut buf).unwrap(), Some(Element::U64(42)));
    }

    #[test]
    fn unknown_tag_is_a_protocol_error() {
        let mut buf = Buffer::with_capacity(64);
        buf.append(&[0xFF]).unwrap();
        assert!(matches!(Element::safe_decode(&mut buf), Err(Error::Protocol(_))));
    }
}
