//! The bitstream decoder: the hard, interesting part of this crate. Turns a
//! borrowed byte slice into a [`tree::Block`] by walking the block-info
//! table and abbreviation-context stack described in LLVM's bitstream
//! format.

use std::collections::HashMap;
use std::sync::Arc;

use crate::abbrev::{Abbreviation, BlockInfoCode, ElementOperand, Operand};
use crate::bits::Cursor;
use crate::error::DecodeError;
use crate::tree::{Block, Node, Record};

pub const BITCODE_MAGIC: [u8; 4] = [0x42, 0x43, 0xC0, 0xDE];

const END_BLOCK: u64 = 0;
const ENTER_SUBBLOCK: u64 = 1;
const DEFINE_ABBREV: u64 = 2;
const UNABBREV_RECORD: u64 = 3;
const FIRST_APPLICATION_ABBREV: u64 = 4;

/// Block-info block id, reserved by the format.
pub const BLOCKINFO_BLOCK_ID: u32 = 0;

/// Diagnostic names registered for a block id via `BLOCKNAME`/
/// `SETRECORDNAME` inside `BLOCKINFO`, plus the permanent abbreviations
/// registered for it.
#[derive(Debug, Clone, Default)]
pub struct BlockInfo {
    pub name: Option<String>,
    pub record_names: HashMap<u64, String>,
    abbrevs: Vec<Arc<Abbreviation>>,
}

enum TailPolicy {
    /// Assert the cursor is exactly at end after the top-level block.
    Strict,
    /// Accept trailing padding as long as every remaining bit is zero.
    AllZero,
}

/// Decodes one bitstream at a time. Keeps a block-info table that persists
/// across the whole decode; everything else (the abbreviation context
/// stack) lives on the Rust call stack as `decode_block_body` recurses.
#[derive(Debug, Default)]
pub struct BitstreamDecoder {
    block_info: HashMap<u32, BlockInfo>,
}

impl BitstreamDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn block_info(&self) -> &HashMap<u32, BlockInfo> {
        &self.block_info
    }

    /// Decode a complete bitstream, asserting the cursor is at end once the
    /// single top-level block has closed.
    pub fn decode<'input>(&mut self, data: &'input [u8]) -> Result<Block<'input>, DecodeError> {
        self.decode_with_tail_policy(data, TailPolicy::Strict)
    }

    /// As [`Self::decode`], but accepts trailing padding as long as it's
    /// all-zero bits, per the relaxed tail policy noted for some producers.
    pub fn decode_lenient<'input>(
        &mut self,
        data: &'input [u8],
    ) -> Result<Block<'input>, DecodeError> {
        self.decode_with_tail_policy(data, TailPolicy::AllZero)
    }

    fn decode_with_tail_policy<'input>(
        &mut self,
        data: &'input [u8],
        policy: TailPolicy,
    ) -> Result<Block<'input>, DecodeError> {
        if data.len() < 4 || data[0..4] != BITCODE_MAGIC {
            let mut found = [0u8; 4];
            let n = data.len().min(4);
            found[..n].copy_from_slice(&data[..n]);
            return Err(DecodeError::BadMagic {
                offset: 0,
                expected: BITCODE_MAGIC,
                found,
            });
        }

        let mut cursor = Cursor::new(&data[4..]);
        // The very first abbreviation id at top level is read with a
        // hardcoded width of 2 bits; this is the convention for the
        // pre-block reads that precede any block context existing at all.
        let offset = cursor.byte_offset() + 4;
        let abbrev_id = cursor
            .read(2)
            .map_err(|e| DecodeError::from_bits_error(e, offset))?;
        if abbrev_id != ENTER_SUBBLOCK {
            return Err(DecodeError::NestingViolation {
                offset,
                reason: "expected top-level ENTER_SUBBLOCK".to_string(),
            });
        }

        let block = match self.decode_entered_block(&mut cursor)? {
            Some(Node::Block(block)) => block,
            Some(Node::Record(_)) => unreachable!("decode_entered_block never yields a Record"),
            None => {
                return Err(DecodeError::NestingViolation {
                    offset,
                    reason: "top-level block must not be BLOCKINFO".to_string(),
                });
            }
        };

        match policy {
            TailPolicy::Strict => {
                if !cursor.at_end() {
                    return Err(DecodeError::NestingViolation {
                        offset: cursor.byte_offset() + 4,
                        reason: "trailing data after top-level block".to_string(),
                    });
                }
            }
            TailPolicy::AllZero => {
                while !cursor.at_end() {
                    let offset = cursor.byte_offset() + 4;
                    let bit = cursor
                        .read(1)
                        .map_err(|e| DecodeError::from_bits_error(e, offset))?;
                    if bit != 0 {
                        return Err(DecodeError::NestingViolation {
                            offset,
                            reason: "trailing data after top-level block is not all zero"
                                .to_string(),
                        });
                    }
                }
            }
        }

        Ok(block)
    }

    /// Decode the id/width/length prologue of a just-entered block and
    /// dispatch: `BLOCKINFO` (id 0) is consumed for its side effects on the
    /// block-info table and yields no tree node; every other block id
    /// decodes its body and yields `Some(Node::Block(..))`.
    fn decode_entered_block<'input>(
        &mut self,
        cursor: &mut Cursor<'input>,
    ) -> Result<Option<Node<'input>>, DecodeError> {
        let offset = cursor.byte_offset();
        let block_id = cursor
            .read_vbr(8)
            .map_err(|e| DecodeError::from_bits_error(e, offset))? as u32;
        let new_abbrev_width = cursor
            .read_vbr(4)
            .map_err(|e| DecodeError::from_bits_error(e, offset))? as u8;
        if new_abbrev_width == 0 {
            return Err(DecodeError::BadAbbrev {
                offset,
                reason: "abbreviation width must be at least 1 bit".to_string(),
            });
        }
        cursor
            .align32()
            .map_err(|e| DecodeError::from_bits_error(e, offset))?;
        let dword_length = cursor
            .read(32)
            .map_err(|e| DecodeError::from_bits_error(e, offset))? as u32;
        let mut body = cursor
            .take_slice(dword_length as usize * 4)
            .map_err(|e| DecodeError::from_bits_error(e, offset))?;

        if block_id == BLOCKINFO_BLOCK_ID {
            self.read_block_info(&mut body, new_abbrev_width)?;
            Ok(None)
        } else {
            let block = self.decode_block_body(&mut body, block_id, new_abbrev_width, dword_length)?;
            Ok(Some(Node::Block(block)))
        }
    }

    /// The main per-block decode loop: dispatches END_BLOCK, ENTER_SUBBLOCK,
    /// DEFINE_ABBREV, UNABBREV_RECORD and application abbreviation ids.
    fn decode_block_body<'input>(
        &mut self,
        cursor: &mut Cursor<'input>,
        block_id: u32,
        abbrev_width: u8,
        dword_length: u32,
    ) -> Result<Block<'input>, DecodeError> {
        let mut block_local: Vec<Arc<Abbreviation>> = Vec::new();
        let mut children = Vec::new();

        loop {
            if cursor.at_end() {
                return Err(DecodeError::NestingViolation {
                    offset: cursor.byte_offset(),
                    reason: format!("missing END_BLOCK for block {block_id}"),
                });
            }
            let offset = cursor.byte_offset();
            let abbrev_id = cursor
                .read(abbrev_width)
                .map_err(|e| DecodeError::from_bits_error(e, offset))?;

            match abbrev_id {
                END_BLOCK => {
                    cursor
                        .align32()
                        .map_err(|e| DecodeError::from_bits_error(e, offset))?;
                    break;
                }
                ENTER_SUBBLOCK => {
                    if let Some(node) = self.decode_entered_block(cursor)? {
                        children.push(node);
                    }
                }
                DEFINE_ABBREV => {
                    let abbrev = self.define_abbrev(cursor)?;
                    block_local.push(Arc::new(abbrev));
                }
                UNABBREV_RECORD => {
                    children.push(Node::Record(Self::decode_unabbrev_record(cursor)?));
                }
                _ => {
                    let abbrev_index = (abbrev_id - FIRST_APPLICATION_ABBREV) as usize;
                    let global_len = self
                        .block_info
                        .get(&block_id)
                        .map_or(0, |info| info.abbrevs.len());
                    let abbrev = if abbrev_index < global_len {
                        self.block_info.get(&block_id).unwrap().abbrevs[abbrev_index].clone()
                    } else {
                        block_local
                            .get(abbrev_index - global_len)
                            .cloned()
                            .ok_or(DecodeError::BadAbbrev {
                                offset,
                                reason: format!(
                                    "no such abbreviation {abbrev_id} in block {block_id}"
                                ),
                            })?
                    };
                    children.push(Node::Record(Self::decode_abbreviated_record(
                        cursor, &abbrev,
                    )?));
                }
            }
        }

        Ok(Block {
            id: block_id,
            dword_length,
            children,
        })
    }

    fn decode_unabbrev_record<'input>(
        cursor: &mut Cursor<'input>,
    ) -> Result<Record<'input>, DecodeError> {
        let offset = cursor.byte_offset();
        let id = cursor
            .read_vbr(6)
            .map_err(|e| DecodeError::from_bits_error(e, offset))?;
        let count = cursor
            .read_vbr(6)
            .map_err(|e| DecodeError::from_bits_error(e, offset))? as usize;
        let mut operands = Vec::with_capacity(count.min(16));
        for _ in 0..count {
            operands.push(
                cursor
                    .read_vbr(6)
                    .map_err(|e| DecodeError::from_bits_error(e, offset))?,
            );
        }
        Ok(Record {
            id,
            operands,
            blob: None,
        })
    }

    fn decode_abbreviated_record<'input>(
        cursor: &mut Cursor<'input>,
        abbrev: &Abbreviation,
    ) -> Result<Record<'input>, DecodeError> {
        let offset = cursor.byte_offset();
        let mut params = abbrev.operands.iter();
        let first = params.next().ok_or(DecodeError::BadAbbrev {
            offset,
            reason: "abbreviation has no operands".to_string(),
        })?;
        let id = Self::read_operand(cursor, first)?;

        let mut operands = Vec::new();
        let mut blob = None;
        for op in params {
            match op {
                Operand::Array(elem) => {
                    let len = cursor
                        .read_vbr(6)
                        .map_err(|e| DecodeError::from_bits_error(e, cursor.byte_offset()))?;
                    operands.reserve(len as usize);
                    for _ in 0..len {
                        operands.push(Self::read_element(cursor, elem)?);
                    }
                }
                Operand::Blob => {
                    blob = Some(
                        cursor
                            .read_blob()
                            .map_err(|e| DecodeError::from_bits_error(e, cursor.byte_offset()))?,
                    );
                }
                other => operands.push(Self::read_operand(cursor, other)?),
            }
        }

        Ok(Record { id, operands, blob })
    }

    fn read_operand(cursor: &mut Cursor<'_>, op: &Operand) -> Result<u64, DecodeError> {
        let offset = cursor.byte_offset();
        match op {
            Operand::Literal(v) => Ok(*v),
            Operand::Fixed(width) => cursor
                .read(*width)
                .map_err(|e| DecodeError::from_bits_error(e, offset)),
            Operand::Vbr(width) => cursor
                .read_vbr(*width)
                .map_err(|e| DecodeError::from_bits_error(e, offset)),
            Operand::Char6 => Ok(cursor
                .read_char6()
                .map_err(|e| DecodeError::from_bits_error(e, offset))? as u64),
            Operand::Array(_) | Operand::Blob => Err(DecodeError::BadAbbrev {
                offset,
                reason: "Array/Blob cannot supply a record id or a plain operand".to_string(),
            }),
        }
    }

    fn read_element(cursor: &mut Cursor<'_>, elem: &ElementOperand) -> Result<u64, DecodeError> {
        let offset = cursor.byte_offset();
        match elem {
            ElementOperand::Literal(v) => Ok(*v),
            ElementOperand::Fixed(width) => cursor
                .read(*width)
                .map_err(|e| DecodeError::from_bits_error(e, offset)),
            ElementOperand::Vbr(width) => cursor
                .read_vbr(*width)
                .map_err(|e| DecodeError::from_bits_error(e, offset)),
            ElementOperand::Char6 => Ok(cursor
                .read_char6()
                .map_err(|e| DecodeError::from_bits_error(e, offset))? as u64),
        }
    }

    /// Parse one `DEFINE_ABBREV` descriptor: operand count as a 5-bit VBR,
    /// then that many parameters (a leading literal-flag bit, then either an
    /// 8-bit VBR literal value or a 3-bit encoding code).
    fn define_abbrev(&self, cursor: &mut Cursor<'_>) -> Result<Abbreviation, DecodeError> {
        let offset = cursor.byte_offset();
        let num_ops = cursor
            .read_vbr(5)
            .map_err(|e| DecodeError::from_bits_error(e, offset))? as usize;
        let mut remaining = num_ops;
        let mut operands = Vec::with_capacity(num_ops);
        while remaining > 0 {
            operands.push(Self::read_abbrev_param(cursor, &mut remaining)?);
        }
        Ok(Abbreviation { operands })
    }

    fn read_abbrev_param(
        cursor: &mut Cursor<'_>,
        remaining: &mut usize,
    ) -> Result<Operand, DecodeError> {
        let offset = cursor.byte_offset();
        *remaining -= 1;

        let is_literal = cursor
            .read(1)
            .map_err(|e| DecodeError::from_bits_error(e, offset))?;
        if is_literal == 1 {
            let value = cursor
                .read_vbr(8)
                .map_err(|e| DecodeError::from_bits_error(e, offset))?;
            return Ok(Operand::Literal(value));
        }

        let code = cursor
            .read(3)
            .map_err(|e| DecodeError::from_bits_error(e, offset))?;
        Ok(match code {
            1 => Operand::Fixed(
                cursor
                    .read_vbr(5)
                    .map_err(|e| DecodeError::from_bits_error(e, offset))? as u8,
            ),
            2 => Operand::Vbr(
                cursor
                    .read_vbr(5)
                    .map_err(|e| DecodeError::from_bits_error(e, offset))? as u8,
            ),
            3 => {
                if *remaining == 0 {
                    return Err(DecodeError::BadAbbrev {
                        offset,
                        reason: "Array must be followed by an element-type parameter".to_string(),
                    });
                }
                let elem = Self::read_abbrev_param(cursor, remaining)?;
                let elem = match elem {
                    Operand::Literal(v) => ElementOperand::Literal(v),
                    Operand::Fixed(w) => ElementOperand::Fixed(w),
                    Operand::Vbr(w) => ElementOperand::Vbr(w),
                    Operand::Char6 => ElementOperand::Char6,
                    Operand::Array(_) | Operand::Blob => {
                        return Err(DecodeError::BadAbbrev {
                            offset,
                            reason: "Array element type must not itself be Array or Blob"
                                .to_string(),
                        });
                    }
                };
                Operand::Array(Box::new(elem))
            }
            4 => Operand::Char6,
            5 => {
                if *remaining != 0 {
                    return Err(DecodeError::BadAbbrev {
                        offset,
                        reason: "Blob must be the last operand".to_string(),
                    });
                }
                Operand::Blob
            }
            _ => {
                return Err(DecodeError::BadAbbrev {
                    offset,
                    reason: format!("reserved abbreviation operand encoding {code}"),
                });
            }
        })
    }

    /// Process the `BLOCKINFO` block (id 0): every unabbreviated record is
    /// interpreted as `SETBID`, `BLOCKNAME`, or `SETRECORDNAME` and folded
    /// into `self.block_info`; `DEFINE_ABBREV` registers a permanent
    /// abbreviation against the current `SETBID` target.
    fn read_block_info(
        &mut self,
        cursor: &mut Cursor<'_>,
        abbrev_width: u8,
    ) -> Result<(), DecodeError> {
        let mut current_block_id: Option<u32> = None;
        loop {
            let offset = cursor.byte_offset();
            let abbrev_id = cursor
                .read(abbrev_width)
                .map_err(|e| DecodeError::from_bits_error(e, offset))?;
            match abbrev_id {
                END_BLOCK => {
                    cursor
                        .align32()
                        .map_err(|e| DecodeError::from_bits_error(e, offset))?;
                    return Ok(());
                }
                ENTER_SUBBLOCK => {
                    return Err(DecodeError::NestingViolation {
                        offset,
                        reason: "nested block inside BLOCKINFO".to_string(),
                    });
                }
                DEFINE_ABBREV => {
                    let block_id = current_block_id.ok_or(DecodeError::BadAbbrev {
                        offset,
                        reason: "DEFINE_ABBREV in BLOCKINFO before SETBID".to_string(),
                    })?;
                    let abbrev = self.define_abbrev(cursor)?;
                    self.block_info
                        .entry(block_id)
                        .or_default()
                        .abbrevs
                        .push(Arc::new(abbrev));
                }
                UNABBREV_RECORD => {
                    let record = Self::decode_unabbrev_record(cursor)?;
                    let code = u8::try_from(record.id)
                        .ok()
                        .and_then(|c| BlockInfoCode::try_from(c).ok())
                        .ok_or(DecodeError::BadAbbrev {
                            offset,
                            reason: format!("unknown BLOCKINFO record id {}", record.id),
                        })?;
                    match code {
                        BlockInfoCode::SetBid => {
                            let id = *record.operands.first().ok_or(DecodeError::BadAbbrev {
                                offset,
                                reason: "SETBID record has no operand".to_string(),
                            })?;
                            current_block_id = Some(id as u32);
                        }
                        BlockInfoCode::BlockName => {
                            let block_id = current_block_id.ok_or(DecodeError::BadAbbrev {
                                offset,
                                reason: "BLOCKNAME before SETBID".to_string(),
                            })?;
                            if let Ok(name) = record.operands_as_string() {
                                self.block_info.entry(block_id).or_default().name = Some(name);
                            }
                        }
                        BlockInfoCode::SetRecordName => {
                            let block_id = current_block_id.ok_or(DecodeError::BadAbbrev {
                                offset,
                                reason: "SETRECORDNAME before SETBID".to_string(),
                            })?;
                            let (&record_id, name_bytes) = record.operands.split_first().ok_or(
                                DecodeError::BadAbbrev {
                                    offset,
                                    reason: "SETRECORDNAME record has no operands".to_string(),
                                },
                            )?;
                            let name: String =
                                name_bytes.iter().map(|&b| b as u8 as char).collect();
                            self.block_info
                                .entry(block_id)
                                .or_default()
                                .record_names
                                .insert(record_id, name);
                        }
                    }
                }
                _ => {
                    return Err(DecodeError::BadAbbrev {
                        offset,
                        reason: "abbreviated record inside BLOCKINFO before any DEFINE_ABBREV"
                            .to_string(),
                    });
                }
            }
        }
    }
}
