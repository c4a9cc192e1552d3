//! Structural decoder for DXBC containers and the DXIL/LLVM bitcode chunks
//! they carry.
//!
//! [`container`] walks the outer DXBC chunk table, [`header`] parses the
//! small fixed prologue in front of the bitstream, [`decode`] turns the
//! bitstream itself into a [`tree::Block`], and [`render`] prints that tree.

pub mod abbrev;
mod bits;
pub mod container;
pub mod decode;
pub mod error;
pub mod header;
pub mod render;
pub mod tree;

/// Definitions from `LLVMBitCodes.h`
pub mod schema {
    /// IDs of blocks and records inside the blocks
    pub mod blocks;
}

pub use self::bits::Cursor;
pub use self::container::DxbcContainer;
pub use self::decode::BitstreamDecoder;
pub use self::error::DecodeError;
pub use self::render::TreeRenderer;
pub use self::tree::{Block, Node, Record};
