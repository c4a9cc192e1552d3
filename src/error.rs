//! Structured error taxonomy for the bitstream core and the DXBC container
//! walker. Every variant carries the byte offset at which the problem was
//! detected, matching LLVM's own bitstream reader diagnostics.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("truncated bitstream at byte offset {offset}")]
    Truncated { offset: usize },

    #[error("bad magic at byte offset {offset}: expected {expected:?}, found {found:?}")]
    BadMagic {
        offset: usize,
        expected: [u8; 4],
        found: [u8; 4],
    },

    #[error("bad abbreviation at byte offset {offset}: {reason}")]
    BadAbbrev { offset: usize, reason: String },

    #[error("VBR overflow at byte offset {offset}: accumulated value exceeds target width")]
    VbrOverflow { offset: usize },

    #[error("invalid six-bit character code {code} at byte offset {offset}")]
    BadChar6 { offset: usize, code: u64 },

    #[error("block nesting violation at byte offset {offset}: {reason}")]
    NestingViolation { offset: usize, reason: String },

    #[error("invalid DXBC container: {reason}")]
    ContainerInvalid { reason: String },
}

impl DecodeError {
    pub(crate) fn from_bits_error(err: crate::bits::Error, offset: usize) -> Self {
        match err {
            crate::bits::Error::BufferOverflow => Self::Truncated { offset },
            crate::bits::Error::VbrOverflow => Self::VbrOverflow { offset },
            crate::bits::Error::Alignment => Self::NestingViolation {
                offset,
                reason: "cursor is not aligned as the operation requires".to_string(),
            },
        }
    }
}
