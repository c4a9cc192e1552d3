//! The outer DXBC container: fourcc header, chunk offset table, and the
//! per-chunk `{fourcc, dataLength}` walk. This layer has no opinion on what
//! a chunk's bytes mean; it just hands payload slices to [`crate::header`]
//! and [`crate::decode`].

use crate::error::DecodeError;

pub const DXBC_MAGIC: [u8; 4] = *b"DXBC";

const FOURCC_DXIL: [u8; 4] = *b"DXIL";
const FOURCC_ILDB: [u8; 4] = *b"ILDB";
const FOURCC_ILDN: [u8; 4] = *b"ILDN";
const FOURCC_SFI0: [u8; 4] = *b"SFI0";

/// The 32-byte DXBC file header, preceding the chunk offset table.
#[derive(Debug, Clone, Copy)]
pub struct DxbcHeader {
    pub hash: [u8; 16],
    pub major_version: u16,
    pub minor_version: u16,
    pub file_length: u32,
    pub chunk_count: u32,
}

impl DxbcHeader {
    pub const WIRE_LEN: usize = 4 + 16 + 2 + 2 + 4 + 4;

    fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < Self::WIRE_LEN {
            return Err(DecodeError::Truncated { offset: data.len() });
        }
        let fourcc = &data[0..4];
        if fourcc != DXBC_MAGIC {
            let mut found = [0u8; 4];
            found.copy_from_slice(fourcc);
            return Err(DecodeError::BadMagic {
                offset: 0,
                expected: DXBC_MAGIC,
                found,
            });
        }
        let mut hash = [0u8; 16];
        hash.copy_from_slice(&data[4..20]);
        let major_version = u16::from_le_bytes([data[20], data[21]]);
        let minor_version = u16::from_le_bytes([data[22], data[23]]);
        let file_length = u32::from_le_bytes(data[24..28].try_into().unwrap());
        let chunk_count = u32::from_le_bytes(data[28..32].try_into().unwrap());

        if file_length as usize != data.len() {
            return Err(DecodeError::ContainerInvalid {
                reason: format!(
                    "DXBC fileLength ({file_length}) does not match actual buffer size ({})",
                    data.len()
                ),
            });
        }

        Ok(Self {
            hash,
            major_version,
            minor_version,
            file_length,
            chunk_count,
        })
    }
}

/// One chunk's fourcc and payload, borrowed from the container buffer.
#[derive(Debug, Clone, Copy)]
pub struct Chunk<'input> {
    pub fourcc: [u8; 4],
    pub data: &'input [u8],
}

impl Chunk<'_> {
    #[must_use]
    pub fn fourcc_str(&self) -> String {
        self.fourcc
            .iter()
            .map(|&b| if b.is_ascii_graphic() { b as char } else { '?' })
            .collect()
    }
}

/// A parsed DXBC container: the header plus every chunk, in file order.
#[derive(Debug, Clone)]
pub struct DxbcContainer<'input> {
    pub header: DxbcHeader,
    pub chunks: Vec<Chunk<'input>>,
}

impl<'input> DxbcContainer<'input> {
    /// Parse the file header, chunk offset table, and every chunk header in
    /// one pass. Unknown fourccs are kept (for listing) but not specially
    /// interpreted here; that happens at the call site.
    pub fn parse(data: &'input [u8]) -> Result<Self, DecodeError> {
        let header = DxbcHeader::parse(data)?;

        let offsets_start = DxbcHeader::WIRE_LEN;
        let offsets_len = header.chunk_count as usize * 4;
        let offsets_bytes = data
            .get(offsets_start..offsets_start + offsets_len)
            .ok_or(DecodeError::Truncated {
                offset: offsets_start,
            })?;

        let mut chunks = Vec::with_capacity(header.chunk_count as usize);
        for (idx, raw) in offsets_bytes.chunks_exact(4).enumerate() {
            let offset = u32::from_le_bytes(raw.try_into().unwrap()) as usize;
            let chunk_header = data
                .get(offset..offset + 8)
                .ok_or(DecodeError::Truncated { offset })?;
            let mut fourcc = [0u8; 4];
            fourcc.copy_from_slice(&chunk_header[0..4]);
            let data_length = u32::from_le_bytes(chunk_header[4..8].try_into().unwrap()) as usize;
            let payload = data
                .get(offset + 8..offset + 8 + data_length)
                .ok_or(DecodeError::Truncated { offset: offset + 8 })?;

            tracing::debug!(idx, fourcc = %String::from_utf8_lossy(&fourcc), data_length, "read chunk header");
            chunks.push(Chunk {
                fourcc,
                data: payload,
            });
        }

        Ok(Self { header, chunks })
    }

    #[must_use]
    pub fn find(&self, fourcc: &[u8; 4]) -> Option<&Chunk<'input>> {
        self.chunks.iter().find(|c| &c.fourcc == fourcc)
    }

    /// The bitcode-bearing chunk, preferring the debug-info `ILDB` chunk
    /// over the release `DXIL` chunk when both are present, since `ILDB`
    /// retains names and source-level debug metadata that `DXIL` strips.
    #[must_use]
    pub fn bitcode_chunk(&self) -> Option<&Chunk<'input>> {
        self.find(&FOURCC_ILDB).or_else(|| self.find(&FOURCC_DXIL))
    }

    #[must_use]
    pub fn debug_name_chunk(&self) -> Option<&Chunk<'input>> {
        self.find(&FOURCC_ILDN)
    }

    #[must_use]
    pub fn features_chunk(&self) -> Option<&Chunk<'input>> {
        self.find(&FOURCC_SFI0)
    }
}

#[cfg(test)]
fn build_container(chunks: &[(&[u8; 4], &[u8])]) -> Vec<u8> {
    let offsets_len = chunks.len() * 4;
    let mut chunk_bytes = Vec::new();
    let mut offsets = Vec::new();
    let header_and_offsets_len = DxbcHeader::WIRE_LEN + offsets_len;
    for (fourcc, payload) in chunks {
        offsets.push((header_and_offsets_len + chunk_bytes.len()) as u32);
        chunk_bytes.extend_from_slice(*fourcc);
        chunk_bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        chunk_bytes.extend_from_slice(payload);
    }

    let mut buf = Vec::new();
    buf.extend_from_slice(&DXBC_MAGIC);
    buf.extend_from_slice(&[0u8; 16]); // hash
    buf.extend_from_slice(&1u16.to_le_bytes()); // major
    buf.extend_from_slice(&0u16.to_le_bytes()); // minor
    let file_length_offset = buf.len();
    buf.extend_from_slice(&0u32.to_le_bytes()); // file_length, patched below
    buf.extend_from_slice(&(chunks.len() as u32).to_le_bytes());
    for offset in &offsets {
        buf.extend_from_slice(&offset.to_le_bytes());
    }
    buf.extend_from_slice(&chunk_bytes);

    let file_length = buf.len() as u32;
    buf[file_length_offset..file_length_offset + 4].copy_from_slice(&file_length.to_le_bytes());
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_header_and_chunks() {
        let buf = build_container(&[(b"DXIL", b"hello"), (b"SFI0", &[1, 0, 0, 0, 0, 0, 0, 0])]);
        let container = DxbcContainer::parse(&buf).unwrap();
        assert_eq!(container.header.major_version, 1);
        assert_eq!(container.header.chunk_count, 2);
        assert_eq!(container.chunks.len(), 2);
        assert_eq!(container.find(&FOURCC_DXIL).unwrap().data, b"hello");
        assert_eq!(container.chunks[0].fourcc_str(), "DXIL");
    }

    #[test]
    fn bad_fourcc_is_rejected() {
        let mut buf = build_container(&[(b"DXIL", b"x")]);
        buf[0] = b'X'; // corrupt the magic
        let err = DxbcContainer::parse(&buf).unwrap_err();
        assert!(matches!(err, DecodeError::BadMagic { .. }));
    }

    #[test]
    fn file_length_mismatch_is_rejected() {
        let mut buf = build_container(&[(b"DXIL", b"x")]);
        buf.push(0); // trailing byte the header's file_length doesn't account for
        let err = DxbcContainer::parse(&buf).unwrap_err();
        assert!(matches!(err, DecodeError::ContainerInvalid { .. }));
    }

    #[test]
    fn bitcode_chunk_prefers_ildb_over_dxil() {
        let buf = build_container(&[(b"DXIL", b"release"), (b"ILDB", b"debug")]);
        let container = DxbcContainer::parse(&buf).unwrap();
        assert_eq!(container.bitcode_chunk().unwrap().data, b"debug");
    }

    #[test]
    fn bitcode_chunk_falls_back_to_dxil_when_no_ildb() {
        let buf = build_container(&[(b"DXIL", b"release")]);
        let container = DxbcContainer::parse(&buf).unwrap();
        assert_eq!(container.bitcode_chunk().unwrap().data, b"release");
    }
}
