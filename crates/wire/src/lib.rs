//! Wire framing for the replication data channel: a length-delimited
//! [`ItemCodec`] for the binary item stream, and the small JSON
//! [`Handshake`] that precedes it (§6).
//!
//! Framing is `[u32 big-endian length][payload]`, the same shape as the
//! network layer's message codec, so a reader sees one format for
//! length-delimited records across the whole system.

use bytes::{Buf, BufMut, BytesMut};
use perspectivedb_merge_tree::codec::{decode_item, encode_item};
use perspectivedb_merge_tree::TreeError;
use perspectivedb_types::{Item, Version};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

const LENGTH_PREFIX_BYTES: usize = 4;

/// Failures from encoding or decoding a framed item.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WireError {
    #[error("frame of {0} bytes exceeds the configured maximum of {1} bytes")]
    FrameTooLarge(usize, usize),

    #[error("failed to decode item: {0}")]
    Item(#[from] TreeError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A [`tokio_util::codec::Encoder`]/[`tokio_util::codec::Decoder`] pair for
/// [`Item`]s, framed as `[u32 length][json body]`.
///
/// `version_size` is threaded through to [`decode_item`]/[`encode_item`]
/// since a version's encoded width is a per-tree configuration value, not
/// something recoverable from the wire bytes alone.
#[derive(Debug)]
pub struct ItemCodec {
    version_size: usize,
    max_frame_size: usize,
    frame_len: Option<usize>,
}

impl ItemCodec {
    #[must_use]
    pub fn new(version_size: usize, max_frame_size: usize) -> Self {
        Self {
            version_size,
            max_frame_size,
            frame_len: None,
        }
    }
}

impl Encoder<Item> for ItemCodec {
    type Error = WireError;

    fn encode(&mut self, item: Item, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = encode_item(&item);
        if payload.len() > self.max_frame_size {
            return Err(WireError::FrameTooLarge(payload.len(), self.max_frame_size));
        }
        #[allow(
            clippy::cast_possible_truncation,
            reason = "checked against max_frame_size above"
        )]
        let len = payload.len() as u32;
        dst.reserve(LENGTH_PREFIX_BYTES + payload.len());
        dst.put_u32(len);
        dst.put_slice(&payload);
        Ok(())
    }
}

impl Decoder for ItemCodec {
    type Item = Item;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let frame_len = match self.frame_len {
            Some(len) => len,
            None => {
                if src.len() < LENGTH_PREFIX_BYTES {
                    return Ok(None);
                }
                let len = u32::from_be_bytes(src[..LENGTH_PREFIX_BYTES].try_into().unwrap_or_default());
                let len = usize::try_from(len).unwrap_or(usize::MAX);
                if len > self.max_frame_size {
                    return Err(WireError::FrameTooLarge(len, self.max_frame_size));
                }
                let _ = src.split_to(LENGTH_PREFIX_BYTES);
                self.frame_len = Some(len);
                len
            }
        };

        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        let payload = src.split_to(frame_len);
        self.frame_len = None;
        let item = decode_item(&payload, self.version_size)?;
        Ok(Some(item))
    }
}

/// Where a replication reader wants a remote's tail to start: from the very
/// beginning, or exclusive of a version it has already seen.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum StartPoint {
    FromBeginning(bool),
    FromVersion(String),
}

impl StartPoint {
    #[must_use]
    pub fn version(v: &Version) -> Self {
        Self::FromVersion(v.to_base64())
    }
}

/// The small JSON request that precedes the binary item stream: who the
/// caller is, and where to resume from.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Handshake {
    pub auth: Option<serde_json::Value>,
    pub start: StartPoint,
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;
    use perspectivedb_types::{derive_version, Body, Header, Id};
    use tokio_test::io::Builder;
    use tokio_util::codec::FramedRead;

    use super::*;

    fn sample_item() -> Item {
        let header = Header {
            id: Id::from("X"),
            v: None,
            pa: Vec::new(),
            pe: None,
            i: Some(1),
            c: false,
            d: false,
        };
        let body = Body::new();
        let mut item = Item::new(header, body);
        item.header.v = Some(derive_version(b"{}", &[], 3));
        item
    }

    #[test]
    fn round_trips_a_single_item() {
        let mut codec = ItemCodec::new(3, 1 << 20);
        let mut buf = BytesMut::new();
        let item = sample_item();
        codec.encode(item.clone(), &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.header.id, item.header.id);
        assert_eq!(decoded.header.v, item.header.v);
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_returns_none_on_partial_length_prefix() {
        let mut codec = ItemCodec::new(3, 1 << 20);
        let mut buf = BytesMut::from(&b"\x00\x00"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn decode_returns_none_on_partial_body() {
        let mut codec = ItemCodec::new(3, 1 << 20);
        let mut full = BytesMut::new();
        codec.encode(sample_item(), &mut full).unwrap();

        let mut partial = BytesMut::from(&full[..full.len() - 1]);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        // Feeding the remaining byte completes the frame.
        partial.put_u8(full[full.len() - 1]);
        assert!(codec.decode(&mut partial).unwrap().is_some());
    }

    #[test]
    fn encode_rejects_oversized_frame() {
        let mut codec = ItemCodec::new(3, 4);
        let mut buf = BytesMut::new();
        let err = codec.encode(sample_item(), &mut buf).unwrap_err();
        assert!(matches!(err, WireError::FrameTooLarge(_, 4)));
    }

    #[test]
    fn decode_rejects_frame_over_max_size_before_buffering_it() {
        let mut codec = ItemCodec::new(3, 4);
        let mut buf = BytesMut::new();
        buf.put_u32(1000);
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, WireError::FrameTooLarge(1000, 4)));
    }

    #[test]
    fn decodes_multiple_frames_from_one_buffer() {
        let mut codec = ItemCodec::new(3, 1 << 20);
        let mut buf = BytesMut::new();
        let a = sample_item();
        let mut b = sample_item();
        b.header.i = Some(2);
        codec.encode(a.clone(), &mut buf).unwrap();
        codec.encode(b.clone(), &mut buf).unwrap();

        let first = codec.decode(&mut buf).unwrap().unwrap();
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.header.i, a.header.i);
        assert_eq!(second.header.i, b.header.i);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[tokio::test]
    async fn framed_read_yields_each_item_in_order_off_a_real_async_stream() {
        let a = sample_item();
        let mut b = sample_item();
        b.header.i = Some(2);

        let mut buffer = BytesMut::new();
        let mut codec = ItemCodec::new(3, 1 << 20);
        codec.encode(a.clone(), &mut buffer).unwrap();
        codec.encode(b.clone(), &mut buffer).unwrap();

        let mut stream = Builder::new().read(&buffer.freeze()).build();
        let mut framed = FramedRead::new(&mut stream, ItemCodec::new(3, 1 << 20));

        let first = framed.next().await.unwrap().unwrap();
        assert_eq!(first.header.v, a.header.v);

        let second = framed.next().await.unwrap().unwrap();
        assert_eq!(second.header.i, b.header.i);

        assert!(framed.next().await.is_none());
    }

    #[test]
    fn handshake_round_trips_from_beginning() {
        let handshake = Handshake {
            auth: Some(serde_json::json!({"token": "abc"})),
            start: StartPoint::FromBeginning(true),
        };
        let json = serde_json::to_string(&handshake).unwrap();
        let parsed: Handshake = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, handshake);
    }

    #[test]
    fn handshake_round_trips_from_version() {
        let v = derive_version(b"{}", &[], 3);
        let handshake = Handshake {
            auth: None,
            start: StartPoint::version(&v),
        };
        let json = serde_json::to_string(&handshake).unwrap();
        let parsed: Handshake = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, handshake);
        assert_eq!(parsed.start, StartPoint::FromVersion(v.to_base64()));
    }
}
