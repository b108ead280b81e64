//! Byte-exact key encoding, private to a single [`crate::tree::Tree`].
//!
//! Every key a tree writes starts with a tree prefix
//! (`len(name) || name || 0x00 || type`), followed by one of five
//! type-specific layouts. `i` and `v` are encoded big-endian at a fixed
//! width (`iSize`, `vSize`), so lexical byte order on the underlying store
//! matches numeric order.

use perspectivedb_types::{Id, Perspective, Version};

const DSKEY: u8 = 0x01;
const IKEY: u8 = 0x02;
const HEADKEY: u8 = 0x03;
const VKEY: u8 = 0x04;
const USKEY: u8 = 0x05;

/// Big-endian encodes `value` into exactly `size` bytes.
///
/// `value` is assumed to fit: `size` is at most 6 bytes wide (48 bits),
/// comfortably above any realistic insertion sequence or truncated hash
/// width, so callers never need to check for overflow before calling this.
fn encode_fixed(value: u64, size: usize) -> Vec<u8> {
    let full = value.to_be_bytes();
    full[full.len() - size..].to_vec()
}

fn decode_fixed(bytes: &[u8]) -> u64 {
    let mut buf = [0_u8; 8];
    buf[8 - bytes.len()..].copy_from_slice(bytes);
    u64::from_be_bytes(buf)
}

fn push_label(out: &mut Vec<u8>, label: &[u8]) {
    out.push(u8::try_from(label.len()).unwrap_or(u8::MAX));
    out.extend_from_slice(label);
    out.push(0x00);
}

/// Writes the tree-prefix common to every key this tree produces.
pub fn prefix(tree_name: &[u8], key_type: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(tree_name.len() + 3);
    push_label(&mut out, tree_name);
    out.push(key_type);
    out
}

/// `len(id) || id || 0x00 || iSize || i`, value: serialized item.
pub fn dskey(tree_name: &[u8], id: &Id, i_size: usize, i: u64) -> Vec<u8> {
    let mut out = prefix(tree_name, DSKEY);
    push_label(&mut out, id.as_bytes());
    out.extend(encode_fixed(i, i_size));
    out
}

/// `iSize || i`, value: headkey bytes.
pub fn ikey(tree_name: &[u8], i_size: usize, i: u64) -> Vec<u8> {
    let mut out = prefix(tree_name, IKEY);
    out.extend(encode_fixed(i, i_size));
    out
}

/// `len(id) || id || 0x00 || vSize || v`, value: headval.
pub fn headkey(tree_name: &[u8], id: &Id, v_size: usize, v: &Version) -> Vec<u8> {
    let mut out = prefix(tree_name, HEADKEY);
    push_label(&mut out, id.as_bytes());
    out.extend_from_slice(&pad_version(v, v_size));
    out
}

/// `vSize || v`, value: dskey.
pub fn vkey(tree_name: &[u8], v_size: usize, v: &Version) -> Vec<u8> {
    let mut out = prefix(tree_name, VKEY);
    out.extend_from_slice(&pad_version(v, v_size));
    out
}

/// `len(pe) || pe || 0x00 || iSize || i`, value: the vkey last written from
/// that perspective.
pub fn uskey(tree_name: &[u8], pe: &Perspective, i_size: usize, i: u64) -> Vec<u8> {
    let mut out = prefix(tree_name, USKEY);
    push_label(&mut out, pe.as_bytes());
    out.extend(encode_fixed(i, i_size));
    out
}

fn pad_version(v: &Version, v_size: usize) -> Vec<u8> {
    let bytes = v.as_bytes();
    debug_assert_eq!(
        bytes.len(),
        v_size,
        "version byte length must match the tree's configured vSize"
    );
    bytes.to_vec()
}

/// The half-open range `[prefix(id), prefix(id) + 0xff)` over headkeys for
/// one id, i.e. every headkey for that id regardless of `v`.
pub fn headkey_range(tree_name: &[u8], id: &Id) -> (Vec<u8>, Vec<u8>) {
    let mut start = prefix(tree_name, HEADKEY);
    push_label(&mut start, id.as_bytes());
    let mut end = start.clone();
    end.push(0xff);
    (start, end)
}

/// The half-open range over all headkeys in this tree.
pub fn headkey_range_all(tree_name: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let start = prefix(tree_name, HEADKEY);
    let mut end = start.clone();
    end.push(0xff);
    (start, end)
}

/// The half-open range over every uskey entry for one perspective. Each
/// append from that perspective adds a new entry keyed by `i`, so the
/// "current" value is whichever entry has the largest `i`, found by
/// scanning this range in reverse.
pub fn uskey_range(tree_name: &[u8], pe: &Perspective) -> (Vec<u8>, Vec<u8>) {
    let mut start = prefix(tree_name, USKEY);
    push_label(&mut start, pe.as_bytes());
    let mut end = start.clone();
    end.push(0xff);
    (start, end)
}

/// The half-open range over all ikeys in this tree, i.e. insertion order.
pub fn ikey_range_all(tree_name: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let start = prefix(tree_name, IKEY);
    let mut end = start.clone();
    end.push(0xff);
    (start, end)
}

/// The half-open range over ikeys with `i >= from` (used to resume a
/// tailing stream without re-reading everything already emitted).
pub fn ikey_range_from(tree_name: &[u8], i_size: usize, from: u64) -> (Vec<u8>, Vec<u8>) {
    let start = ikey(tree_name, i_size, from);
    let mut end = prefix(tree_name, IKEY);
    end.push(0xff);
    (start, end)
}

/// Parses a headval: `optByte || iSize || i`.
#[must_use]
pub fn decode_headval(bytes: &[u8]) -> (u8, u64) {
    let opt_byte = bytes[0];
    let i = decode_fixed(&bytes[1..]);
    (opt_byte, i)
}

#[must_use]
pub fn encode_headval(opt_byte: u8, i_size: usize, i: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + i_size);
    out.push(opt_byte);
    out.extend(encode_fixed(i, i_size));
    out
}

/// A structured view of every key subtype this module composes, used to
/// test that composing and parsing round-trip for the full domain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Key {
    Dskey { id: Id, i: u64 },
    Ikey { i: u64 },
    Headkey { id: Id, v: Version },
    Vkey { v: Version },
    Uskey { pe: Perspective, i: u64 },
}

impl Key {
    #[must_use]
    pub fn compose(&self, tree_name: &[u8], i_size: usize, v_size: usize) -> Vec<u8> {
        match self {
            Self::Dskey { id, i } => dskey(tree_name, id, i_size, *i),
            Self::Ikey { i } => ikey(tree_name, i_size, *i),
            Self::Headkey { id, v } => headkey(tree_name, id, v_size, v),
            Self::Vkey { v } => vkey(tree_name, v_size, v),
            Self::Uskey { pe, i } => uskey(tree_name, pe, i_size, *i),
        }
    }

    /// Parses `bytes`, a key known to have been composed by this tree, back
    /// into its structured form.
    #[must_use]
    pub fn parse(bytes: &[u8], i_size: usize, v_size: usize) -> Option<Self> {
        let name_len = usize::from(*bytes.first()?);
        let mut cursor = 1 + name_len;
        if *bytes.get(cursor)? != 0x00 {
            return None;
        }
        cursor += 1;
        let key_type = *bytes.get(cursor)?;
        cursor += 1;
        let rest = bytes.get(cursor..)?;

        match key_type {
            DSKEY => {
                let (id, rest) = parse_label(rest)?;
                let i = decode_fixed(rest.get(..i_size)?);
                Some(Self::Dskey { id: Id::from_bytes_unchecked(id), i })
            }
            IKEY => {
                let i = decode_fixed(rest.get(..i_size)?);
                Some(Self::Ikey { i })
            }
            HEADKEY => {
                let (id, rest) = parse_label(rest)?;
                let v = Version::from_raw(rest.get(..v_size)?.to_vec());
                Some(Self::Headkey { id: Id::from_bytes_unchecked(id), v })
            }
            VKEY => {
                let v = Version::from_raw(rest.get(..v_size)?.to_vec());
                Some(Self::Vkey { v })
            }
            USKEY => {
                let (pe, rest) = parse_label(rest)?;
                let i = decode_fixed(rest.get(..i_size)?);
                Some(Self::Uskey {
                    pe: Perspective::from_bytes_unchecked(pe),
                    i,
                })
            }
            _ => None,
        }
    }
}

fn parse_label(bytes: &[u8]) -> Option<(&[u8], &[u8])> {
    let len = usize::from(*bytes.first()?);
    let label = bytes.get(1..1 + len)?;
    if *bytes.get(1 + len)? != 0x00 {
        return None;
    }
    Some((label, bytes.get(2 + len..)?))
}

#[cfg(test)]
mod tests {
    use perspectivedb_types::Version;

    use super::*;

    fn id(s: &str) -> Id {
        Id::from(s)
    }

    #[test]
    fn dskey_layout_round_trips_fields() {
        let tree = b"local";
        let key = dskey(tree, &id("X"), 3, 7);

        // prefix: len("local")=5, "local", 0x00, type=0x01
        assert_eq!(key[0], 5);
        assert_eq!(&key[1..6], b"local");
        assert_eq!(key[6], 0x00);
        assert_eq!(key[7], DSKEY);

        // id segment: len("X")=1, "X", 0x00
        assert_eq!(key[8], 1);
        assert_eq!(key[9], b'X');
        assert_eq!(key[10], 0x00);

        // iSize=3, i=7
        assert_eq!(&key[11..14], &[0, 0, 7]);
        assert_eq!(key.len(), 14);
    }

    #[test]
    fn fixed_width_encoding_preserves_numeric_order() {
        let a = encode_fixed(1, 3);
        let b = encode_fixed(2, 3);
        let c = encode_fixed(255, 3);
        let d = encode_fixed(256, 3);
        assert!(a < b);
        assert!(c < d);
    }

    #[test]
    fn decode_fixed_inverts_encode_fixed() {
        for value in [0_u64, 1, 255, 256, 65535, 1 << 40] {
            let encoded = encode_fixed(value, 6);
            assert_eq!(decode_fixed(&encoded), value);
        }
    }

    #[test]
    fn headval_round_trips() {
        let encoded = encode_headval(0x03, 4, 123_456);
        let (opt_byte, i) = decode_headval(&encoded);
        assert_eq!(opt_byte, 0x03);
        assert_eq!(i, 123_456);
    }

    #[test]
    fn headkey_range_bounds_are_exclusive_upper() {
        let tree = b"local";
        let target_id = id("X");
        let (start, end) = headkey_range(tree, &target_id);

        let v = Version::from_raw([0_u8, 0, 1]);
        let key = headkey(tree, &target_id, 3, &v);

        assert!(key.as_slice() >= start.as_slice());
        assert!(key.as_slice() < end.as_slice());
    }

    #[test]
    fn compose_then_parse_round_trips_for_every_subtype() {
        let tree = b"remote-a";
        let i_size = 4;
        let v_size = 5;

        let keys = vec![
            Key::Dskey { id: id("order-1"), i: 42 },
            Key::Ikey { i: 1_000_000 },
            Key::Headkey {
                id: id("order-1"),
                v: Version::from_raw([1_u8, 2, 3, 4, 5]),
            },
            Key::Vkey {
                v: Version::from_raw([9_u8, 8, 7, 6, 5]),
            },
            Key::Uskey {
                pe: Perspective::from("peer-b"),
                i: 7,
            },
        ];

        for key in keys {
            let composed = key.compose(tree, i_size, v_size);
            let parsed = Key::parse(&composed, i_size, v_size).unwrap();
            assert_eq!(key, parsed);
        }
    }

    #[test]
    fn different_key_subtypes_never_collide() {
        let tree = b"local";
        let target_id = id("X");
        let v = Version::from_raw([1_u8, 2, 3]);

        let ds = dskey(tree, &target_id, 3, 1);
        let ik = ikey(tree, 3, 1);
        let hk = headkey(tree, &target_id, 3, &v);
        let vk = vkey(tree, 3, &v);

        assert_ne!(ds[tree.len() + 2], ik[tree.len() + 2]);
        assert_ne!(ik[tree.len() + 2], hk[tree.len() + 2]);
        assert_ne!(hk[tree.len() + 2], vk[tree.len() + 2]);
    }
}
