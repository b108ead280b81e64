use crate::canonical::Body;
use crate::id::{Id, Perspective};
use crate::version::Version;

/// The `CONFLICT` bit of a headval's opt byte.
pub const CONFLICT_BIT: u8 = 0x01;
/// The `DELETE` bit of a headval's opt byte.
pub const DELETE_BIT: u8 = 0x02;

/// An item's header. The body is carried alongside, never inside, since the
/// storage path treats it as an opaque byte buffer and only the read/filter
/// path decodes it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    pub id: Id,
    /// Absent until assigned by a write path (local derivation, or present
    /// on arrival for remote items).
    pub v: Option<Version>,
    /// Ordered parent list; empty for a root item.
    pub pa: Vec<Version>,
    /// Present on items received from or stored under a remote perspective.
    pub pe: Option<Perspective>,
    /// Local insertion sequence, assigned by the owning tree on append.
    pub i: Option<u64>,
    pub c: bool,
    pub d: bool,
}

impl Header {
    #[must_use]
    pub fn root(id: Id) -> Self {
        Self {
            id,
            v: None,
            pa: Vec::new(),
            pe: None,
            i: None,
            c: false,
            d: false,
        }
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.pa.is_empty()
    }

    #[must_use]
    pub fn opt_byte(&self) -> u8 {
        let mut byte = 0;
        if self.c {
            byte |= CONFLICT_BIT;
        }
        if self.d {
            byte |= DELETE_BIT;
        }
        byte
    }
}

/// An item: a header plus its opaque body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Item {
    pub header: Header,
    pub body: Body,
}

impl Item {
    #[must_use]
    pub fn new(header: Header, body: Body) -> Self {
        Self { header, body }
    }
}
