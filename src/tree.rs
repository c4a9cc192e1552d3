//! The decoded parse tree: a pure data structure with no decoding behavior
//! of its own. Built bottom-up by [`crate::decode`] and then only
//! traversed, never mutated, by the renderer.

/// One node of the decoded tree: either a nested block or a leaf record.
#[derive(Debug, Clone)]
pub enum Node<'input> {
    Block(Block<'input>),
    Record(Record<'input>),
}

impl<'input> Node<'input> {
    #[must_use]
    pub fn is_block(&self) -> bool {
        matches!(self, Self::Block(_))
    }

    #[must_use]
    pub fn is_record(&self) -> bool {
        matches!(self, Self::Record(_))
    }

    /// The block or record id. Block ids may be zero (`BLOCKINFO`); a Block
    /// is distinguished from a Record by which variant holds it, not by id.
    #[must_use]
    pub fn id(&self) -> u64 {
        match self {
            Self::Block(b) => u64::from(b.id),
            Self::Record(r) => r.id,
        }
    }

    #[must_use]
    pub fn as_block(&self) -> Option<&Block<'input>> {
        match self {
            Self::Block(b) => Some(b),
            Self::Record(_) => None,
        }
    }

    #[must_use]
    pub fn as_record(&self) -> Option<&Record<'input>> {
        match self {
            Self::Record(r) => Some(r),
            Self::Block(_) => None,
        }
    }
}

/// A nested, length-prefixed container for child blocks and records.
#[derive(Debug, Clone)]
pub struct Block<'input> {
    pub id: u32,
    /// Declared length in 32-bit words, as written in the stream. Used for
    /// skip semantics and reporting; not authoritative over the actual
    /// number of bits consumed by the children (see §8's quantified
    /// invariant, checked in tests, not enforced at decode time since
    /// unknown blocks are skipped by length alone).
    pub dword_length: u32,
    pub children: Vec<Node<'input>>,
}

/// A leaf datum: an id plus an ordered list of unsigned 64-bit operands,
/// optionally terminated by a borrowed blob.
#[derive(Debug, Clone)]
pub struct Record<'input> {
    pub id: u64,
    pub operands: Vec<u64>,
    pub blob: Option<&'input [u8]>,
}

impl<'input> Record<'input> {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operands.is_empty() && self.blob.is_none()
    }

    /// Interpret the operands as bytes and decode them as a UTF-8 string,
    /// as used for `BLOCKNAME`/`SETRECORDNAME`/metadata string records.
    pub fn operands_as_string(&self) -> Result<String, std::string::FromUtf8Error> {
        String::from_utf8(self.operands.iter().map(|&b| b as u8).collect())
    }
}
