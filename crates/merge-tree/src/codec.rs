//! Serialization of a full [`Item`] for storage as a dskey value.
//!
//! The body is already JSON (`perspectivedb_types::Body`), so the item
//! envelope is JSON too rather than introducing a second wire format: `id`
//! and `pe` (arbitrary byte strings) are carried as base64, everything else
//! maps directly.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use perspectivedb_types::{Body, Header, Id, Item, Perspective, Version};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TreeError;

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct Envelope {
    id: String,
    v: Option<String>,
    pa: Vec<String>,
    pe: Option<String>,
    i: Option<u64>,
    c: bool,
    d: bool,
    b: Body,
}

pub fn encode_item(item: &Item) -> Vec<u8> {
    let envelope = Envelope {
        id: URL_SAFE_NO_PAD.encode(item.header.id.as_bytes()),
        v: item.header.v.as_ref().map(Version::to_base64),
        pa: item.header.pa.iter().map(Version::to_base64).collect(),
        pe: item
            .header
            .pe
            .as_ref()
            .map(|pe| URL_SAFE_NO_PAD.encode(pe.as_bytes())),
        i: item.header.i,
        c: item.header.c,
        d: item.header.d,
        b: item.body.clone(),
    };
    serde_json::to_vec(&envelope).unwrap_or_default()
}

pub fn decode_item(bytes: &[u8], v_size: usize) -> Result<Item, TreeError> {
    let envelope: Envelope = serde_json::from_slice(bytes)
        .map_err(|err| TreeError::InvalidHeader {
            id: String::new(),
            reason: format!("stored item is not valid envelope JSON: {err}"),
        })?;

    let id_bytes = URL_SAFE_NO_PAD
        .decode(&envelope.id)
        .map_err(|err| TreeError::InvalidHeader {
            id: envelope.id.clone(),
            reason: format!("id is not valid base64: {err}"),
        })?;
    let id = Id::from_bytes_unchecked(id_bytes);

    let v = envelope
        .v
        .as_deref()
        .map(|s| Version::from_base64(s, v_size))
        .transpose()
        .map_err(|err| TreeError::InvalidHeader {
            id: format!("{id:?}"),
            reason: format!("stored version is invalid: {err}"),
        })?;

    let pa = envelope
        .pa
        .iter()
        .map(|s| Version::from_base64(s, v_size))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| TreeError::InvalidHeader {
            id: format!("{id:?}"),
            reason: format!("stored parent version is invalid: {err}"),
        })?;

    let pe = envelope
        .pe
        .map(|s| {
            URL_SAFE_NO_PAD
                .decode(s)
                .map(Perspective::from_bytes_unchecked)
        })
        .transpose()
        .map_err(|err| TreeError::InvalidHeader {
            id: format!("{id:?}"),
            reason: format!("stored perspective is not valid base64: {err}"),
        })?;

    Ok(Item::new(
        Header {
            id,
            v,
            pa,
            pe,
            i: envelope.i,
            c: envelope.c,
            d: envelope.d,
        },
        envelope.b,
    ))
}

/// Extracts the body as a plain JSON value, for hooks/filters that want to
/// inspect attributes without depending on `Body`'s concrete type.
#[must_use]
pub fn body_as_value(body: &Body) -> Value {
    Value::Object(body.clone())
}

#[cfg(test)]
mod tests {
    use perspectivedb_types::CONFLICT_BIT;

    use super::*;

    #[test]
    fn encode_decode_round_trips() {
        let header = Header {
            id: Id::from("order-1"),
            v: Some(Version::from_raw([1_u8, 2, 3])),
            pa: vec![Version::from_raw([0_u8, 0, 1])],
            pe: Some(Perspective::from("peer-a")),
            i: Some(5),
            c: true,
            d: false,
        };
        let mut body = Body::new();
        let _ = body.insert("k".to_owned(), Value::from("v"));
        let item = Item::new(header, body);

        let encoded = encode_item(&item);
        let decoded = decode_item(&encoded, 3).unwrap();

        assert_eq!(item, decoded);
        assert_ne!(decoded.header.opt_byte() & CONFLICT_BIT, 0);
    }

    #[test]
    fn extra_top_level_keys_are_rejected() {
        let raw = serde_json::json!({
            "id": URL_SAFE_NO_PAD.encode(b"X"),
            "v": null,
            "pa": [],
            "pe": null,
            "i": null,
            "c": false,
            "d": false,
            "b": {},
            "unexpected": "field",
        });

        let err = decode_item(&serde_json::to_vec(&raw).unwrap(), 3).unwrap_err();
        assert!(matches!(err, TreeError::InvalidHeader { .. }));
    }

    #[test]
    fn non_mapping_body_is_rejected() {
        let raw = serde_json::json!({
            "id": URL_SAFE_NO_PAD.encode(b"X"),
            "v": null,
            "pa": [],
            "pe": null,
            "i": null,
            "c": false,
            "d": false,
            "b": "not a mapping",
        });

        let err = decode_item(&serde_json::to_vec(&raw).unwrap(), 3).unwrap_err();
        assert!(matches!(err, TreeError::InvalidHeader { .. }));
    }

    #[test]
    fn missing_id_is_rejected() {
        let raw = serde_json::json!({
            "v": null,
            "pa": [],
            "pe": null,
            "i": null,
            "c": false,
            "d": false,
            "b": {},
        });

        let err = decode_item(&serde_json::to_vec(&raw).unwrap(), 3).unwrap_err();
        assert!(matches!(err, TreeError::InvalidHeader { .. }));
    }
}
