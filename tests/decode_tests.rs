//! Hand-constructed bitstreams exercising the decoder end to end. There are
//! no binary fixtures to read here (unlike a real DXIL file); every stream
//! below is built bit-by-bit with [`BitWriter`] to pin down exact encodings.

use dxil_dump::decode::BitstreamDecoder;
use dxil_dump::tree::Node;

/// Minimal LSB-first bit packer mirroring the wire format `Cursor` reads.
struct BitWriter {
    bytes: Vec<u8>,
    acc: u64,
    nbits: u32,
}

impl BitWriter {
    fn new() -> Self {
        Self {
            bytes: Vec::new(),
            acc: 0,
            nbits: 0,
        }
    }

    fn push(&mut self, value: u64, width: u32) {
        self.acc |= value << self.nbits;
        self.nbits += width;
        while self.nbits >= 8 {
            self.bytes.push((self.acc & 0xff) as u8);
            self.acc >>= 8;
            self.nbits -= 8;
        }
    }

    fn push_vbr(&mut self, mut value: u64, width: u32) {
        let test_bit = 1u64 << (width - 1);
        let mask = test_bit - 1;
        loop {
            let low = value & mask;
            value >>= width - 1;
            if value != 0 {
                self.push(low | test_bit, width);
            } else {
                self.push(low, width);
                break;
            }
        }
    }

    fn align32(&mut self) {
        if self.nbits > 0 {
            self.bytes.push((self.acc & 0xff) as u8);
            self.acc = 0;
            self.nbits = 0;
        }
        while self.bytes.len() % 4 != 0 {
            self.bytes.push(0);
        }
    }

    fn finish(mut self) -> Vec<u8> {
        if self.nbits > 0 {
            self.bytes.push((self.acc & 0xff) as u8);
        }
        self.bytes
    }
}

const BC_MAGIC: [u8; 4] = [0x42, 0x43, 0xC0, 0xDE];

const ENTER_SUBBLOCK: u64 = 1;
const END_BLOCK: u64 = 0;
const DEFINE_ABBREV: u64 = 2;
const UNABBREV_RECORD: u64 = 3;

/// Wrap a pre-built block body (abbrev_width-wide abbrev ids, closed with
/// its own `END_BLOCK` + 32-bit alignment) in the outer
/// `ENTER_SUBBLOCK`/block-id/width/length prologue, and prepend the magic.
fn wrap_top_level_block(block_id: u64, abbrev_width: u32, body: Vec<u8>) -> Vec<u8> {
    assert_eq!(body.len() % 4, 0, "block body must already be word-aligned");
    let mut bw = BitWriter::new();
    bw.push(ENTER_SUBBLOCK, 2);
    bw.push_vbr(block_id, 8);
    bw.push_vbr(abbrev_width as u64, 4);
    bw.align32();
    bw.push((body.len() / 4) as u64, 32);
    let mut bytes = bw.finish();
    bytes.extend_from_slice(&body);

    let mut out = Vec::with_capacity(4 + bytes.len());
    out.extend_from_slice(&BC_MAGIC);
    out.extend_from_slice(&bytes);
    out
}

#[test]
fn magic_only_stream_is_truncated() {
    let mut decoder = BitstreamDecoder::new();
    let err = decoder.decode(&BC_MAGIC).unwrap_err();
    assert!(matches!(
        err,
        dxil_dump::DecodeError::Truncated { .. } | dxil_dump::DecodeError::NestingViolation { .. }
    ));
}

#[test]
fn well_formed_empty_block_decodes_with_no_children() {
    let mut body = BitWriter::new();
    body.push(END_BLOCK, 2);
    body.align32();
    let stream = wrap_top_level_block(8, 2, body.finish());

    let mut decoder = BitstreamDecoder::new();
    let block = decoder.decode(&stream).unwrap();
    assert_eq!(block.id, 8);
    assert_eq!(block.dword_length, 1);
    assert!(block.children.is_empty());
}

#[test]
fn bad_magic_is_rejected() {
    let mut decoder = BitstreamDecoder::new();
    let err = decoder.decode(b"nope").unwrap_err();
    assert!(matches!(err, dxil_dump::DecodeError::BadMagic { .. }));
}

#[test]
fn unabbreviated_record_round_trips() {
    let mut body = BitWriter::new();
    body.push(UNABBREV_RECORD, 2);
    body.push_vbr(5, 6); // record id
    body.push_vbr(2, 6); // operand count
    body.push_vbr(10, 6);
    body.push_vbr(20, 6);
    body.push(END_BLOCK, 2);
    body.align32();

    let stream = wrap_top_level_block(99, 2, body.finish());

    let mut decoder = BitstreamDecoder::new();
    let block = decoder.decode(&stream).unwrap();
    assert_eq!(block.id, 99);
    assert_eq!(block.children.len(), 1);
    let Node::Record(record) = &block.children[0] else {
        panic!("expected a record");
    };
    assert_eq!(record.id, 5);
    assert_eq!(record.operands, vec![10, 20]);
    assert!(record.blob.is_none());
}

#[test]
fn define_abbrev_then_use_decodes_fixed_and_vbr_operands() {
    let mut body = BitWriter::new();

    // DEFINE_ABBREV: 2 operands — record id as Fixed(4), then a Vbr(6) value.
    body.push(DEFINE_ABBREV, 3);
    body.push_vbr(2, 5); // numops = 2
    body.push(0, 1); // not literal
    body.push(1, 3); // encoding code 1 = Fixed
    body.push_vbr(4, 5); // width = 4
    body.push(0, 1); // not literal
    body.push(2, 3); // encoding code 2 = Vbr
    body.push_vbr(6, 5); // width = 6

    // Use abbreviation id 4 (first application abbrev).
    body.push(4, 3);
    body.push(7, 4); // record id, Fixed(4)
    body.push_vbr(42, 6); // value, Vbr(6)

    body.push(END_BLOCK, 3);
    body.align32();

    let stream = wrap_top_level_block(12, 3, body.finish());

    let mut decoder = BitstreamDecoder::new();
    let block = decoder.decode(&stream).unwrap();
    assert_eq!(block.children.len(), 1);
    let Node::Record(record) = &block.children[0] else {
        panic!("expected a record");
    };
    assert_eq!(record.id, 7);
    assert_eq!(record.operands, vec![42]);
}

#[test]
fn abbreviated_array_of_char6_decodes_a_string() {
    let mut body = BitWriter::new();

    // DEFINE_ABBREV: record id literal 1, then an Array of Char6.
    body.push(DEFINE_ABBREV, 3);
    body.push_vbr(3, 5); // numops = 3: literal id, array marker, char6 element
    body.push(1, 1); // literal
    body.push_vbr(1, 8); // literal value = 1 (record id)
    body.push(0, 1); // not literal
    body.push(3, 3); // encoding code 3 = Array
    body.push(0, 1); // element: not literal
    body.push(4, 3); // element encoding code 4 = Char6

    // Use it to encode "ab" (array length 2, then two char6 codes).
    body.push(4, 3);
    body.push_vbr(2, 6); // array length
    body.push(0, 6); // 'a'
    body.push(1, 6); // 'b'

    body.push(END_BLOCK, 3);
    body.align32();

    let stream = wrap_top_level_block(17, 3, body.finish());

    let mut decoder = BitstreamDecoder::new();
    let block = decoder.decode(&stream).unwrap();
    let Node::Record(record) = &block.children[0] else {
        panic!("expected a record");
    };
    assert_eq!(record.id, 1);
    let s: String = record.operands.iter().map(|&c| c as u8 as char).collect();
    assert_eq!(s, "ab");
}

#[test]
fn abbreviated_blob_round_trips() {
    let mut body = BitWriter::new();

    body.push(DEFINE_ABBREV, 3);
    body.push_vbr(2, 5); // numops = 2: literal id, blob
    body.push(1, 1);
    body.push_vbr(9, 8); // literal record id = 9
    body.push(0, 1);
    body.push(5, 3); // encoding code 5 = Blob

    body.push(4, 3);
    body.push_vbr(5, 6); // blob length
    body.align32();
    body.bytes.extend_from_slice(b"HELLO");
    body.align32();

    body.push(END_BLOCK, 3);
    body.align32();

    let stream = wrap_top_level_block(21, 3, body.finish());

    let mut decoder = BitstreamDecoder::new();
    let block = decoder.decode(&stream).unwrap();
    let Node::Record(record) = &block.children[0] else {
        panic!("expected a record");
    };
    assert_eq!(record.id, 9);
    assert_eq!(record.blob, Some(&b"HELLO"[..]));
}

#[test]
fn blockinfo_abbrev_is_inherited_by_a_later_block_with_the_same_id() {
    const TARGET_BLOCK_ID: u64 = 55;

    // BLOCKINFO body: SETBID(TARGET_BLOCK_ID), then DEFINE_ABBREV for a
    // Fixed(4) record id plus a Fixed(8) value.
    let mut blockinfo_body = BitWriter::new();
    blockinfo_body.push(UNABBREV_RECORD, 2);
    blockinfo_body.push_vbr(1, 6); // SETBID
    blockinfo_body.push_vbr(1, 6); // operand count
    blockinfo_body.push_vbr(TARGET_BLOCK_ID, 6);

    blockinfo_body.push(DEFINE_ABBREV, 2);
    blockinfo_body.push_vbr(2, 5);
    blockinfo_body.push(0, 1);
    blockinfo_body.push(1, 3); // Fixed
    blockinfo_body.push_vbr(4, 5);
    blockinfo_body.push(0, 1);
    blockinfo_body.push(1, 3); // Fixed
    blockinfo_body.push_vbr(8, 5);

    blockinfo_body.push(END_BLOCK, 2);
    blockinfo_body.align32();

    // The target block's own body only enters abbrev id 4 (no local
    // DEFINE_ABBREV of its own); the abbreviation must come from BLOCKINFO.
    // Its abbrev width must be at least 3 bits to represent id 4 at all.
    let mut target_body = BitWriter::new();
    target_body.push(4, 3);
    target_body.push(3, 4); // record id
    target_body.push(200, 8); // value
    target_body.push(END_BLOCK, 3);
    target_body.align32();

    // Top level: BLOCKINFO block, then the target block, both as siblings
    // inside one outer wrapper block so they share a BitstreamDecoder state.
    let mut outer_body = BitWriter::new();
    outer_body.push(ENTER_SUBBLOCK, 2);
    outer_body.push_vbr(0, 8); // BLOCKINFO block id
    outer_body.push_vbr(2, 4);
    outer_body.align32();
    outer_body.push((blockinfo_body.bytes.len() as u64) / 4, 32);
    let finished_blockinfo = blockinfo_body.finish();
    assert_eq!(finished_blockinfo.len() % 4, 0);
    outer_body.bytes.extend_from_slice(&finished_blockinfo);

    outer_body.push(ENTER_SUBBLOCK, 2);
    outer_body.push_vbr(TARGET_BLOCK_ID, 8);
    outer_body.push_vbr(3, 4);
    outer_body.align32();
    let finished_target = target_body.finish();
    assert_eq!(finished_target.len() % 4, 0);
    outer_body.push((finished_target.len() as u64) / 4, 32);
    outer_body.bytes.extend_from_slice(&finished_target);

    outer_body.push(END_BLOCK, 2);
    outer_body.align32();

    let stream = wrap_top_level_block(1, 2, outer_body.finish());

    let mut decoder = BitstreamDecoder::new();
    let block = decoder.decode(&stream).unwrap();
    let Node::Block(target) = block
        .children
        .iter()
        .find(|n| n.is_block() && n.id() == TARGET_BLOCK_ID)
        .unwrap()
    else {
        panic!("expected the target block to appear");
    };
    let Node::Record(record) = &target.children[0] else {
        panic!("expected a record");
    };
    assert_eq!(record.id, 3);
    assert_eq!(record.operands, vec![200]);
}
