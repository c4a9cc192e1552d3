//! Abbreviation descriptors: the user-defined schemas that let a bitstream
//! encode records in fewer bits than the generic `UNABBREV_RECORD` form.

use num_enum::TryFromPrimitive;

/// One parameter of an abbreviation definition.
///
/// `Literal` has no on-wire 3-bit encoding of its own: it's synthesized from
/// a leading flag bit read ahead of the 3-bit operand-type code, so it's
/// represented here as its own variant rather than widening the code field.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Literal(u64),
    Fixed(u8),
    Vbr(u8),
    Char6,
    /// Must be followed by exactly one element-type parameter on the wire;
    /// that parameter is folded into this variant during `DEFINE_ABBREV`
    /// parsing so an `Array` value is always structurally complete.
    Array(Box<ElementOperand>),
    /// Must be the last parameter of an abbreviation.
    Blob,
}

/// The operand kinds legal as an array's element type. A strict subset of
/// [`Operand`]: arrays of arrays and arrays of blobs aren't part of the
/// format.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ElementOperand {
    Literal(u64),
    Fixed(u8),
    Vbr(u8),
    Char6,
}

#[derive(Debug, Clone, Default)]
pub struct Abbreviation {
    pub operands: Vec<Operand>,
}

impl Abbreviation {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operands.is_empty()
    }
}

/// Record ids recognized inside the `BLOCKINFO` block (id 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum BlockInfoCode {
    SetBid = 1,
    BlockName = 2,
    SetRecordName = 3,
}
