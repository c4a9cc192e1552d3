//! Fixed-layout header decoding for the bitcode chunk's small prologue and
//! the optional debug-name chunk. Peripheral to the bitstream core, but a
//! DXIL dump is useless without printing what shader kind and model it is.

use bitflags::bitflags;

use crate::error::DecodeError;

pub const DXIL_MAGIC: [u8; 4] = *b"DXIL";

/// `ProgramType` index into the shader-kind table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderKind {
    Pixel,
    Vertex,
    Geometry,
    Hull,
    Domain,
    Compute,
    Library,
    RayGeneration,
    Intersection,
    AnyHit,
    ClosestHit,
    Miss,
    Callable,
    Mesh,
    Amplification,
    Unknown(u16),
}

impl ShaderKind {
    const TABLE: &'static [(&'static str, ShaderKind)] = &[
        ("Pixel", ShaderKind::Pixel),
        ("Vertex", ShaderKind::Vertex),
        ("Geometry", ShaderKind::Geometry),
        ("Hull", ShaderKind::Hull),
        ("Domain", ShaderKind::Domain),
        ("Compute", ShaderKind::Compute),
        ("Library", ShaderKind::Library),
        ("RayGeneration", ShaderKind::RayGeneration),
        ("Intersection", ShaderKind::Intersection),
        ("AnyHit", ShaderKind::AnyHit),
        ("ClosestHit", ShaderKind::ClosestHit),
        ("Miss", ShaderKind::Miss),
        ("Callable", ShaderKind::Callable),
        ("Mesh", ShaderKind::Mesh),
        ("Amplification", ShaderKind::Amplification),
    ];

    #[must_use]
    pub fn from_index(index: u16) -> Self {
        Self::TABLE
            .get(index as usize)
            .map(|(_, kind)| *kind)
            .unwrap_or(Self::Unknown(index))
    }

    #[must_use]
    pub fn name(&self) -> String {
        match self {
            Self::Unknown(index) => format!("Unknown({index})"),
            other => Self::TABLE
                .iter()
                .find(|(_, kind)| kind == other)
                .map(|(name, _)| (*name).to_string())
                .unwrap_or_else(|| "Unknown".to_string()),
        }
    }
}

/// Shader model: high nibble of `ProgramVersion` is major, low nibble minor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderModel {
    pub major: u8,
    pub minor: u8,
}

impl ShaderModel {
    #[must_use]
    pub fn from_program_version(version: u16) -> Self {
        Self {
            major: ((version >> 4) & 0xf) as u8,
            minor: (version & 0xf) as u8,
        }
    }
}

/// The bitcode chunk's small fixed prologue, preceding the actual bitstream.
#[derive(Debug, Clone, Copy)]
pub struct ProgramHeader {
    pub shader_model: ShaderModel,
    pub shader_kind: ShaderKind,
    pub size_in_uint32: u32,
    pub dxil_version: u32,
    pub bitcode_offset: u32,
    pub bitcode_size: u32,
}

impl ProgramHeader {
    pub const WIRE_LEN: usize = 2 + 2 + 4 + 4 + 4 + 4 + 4;

    /// Parse the prologue from the start of a DXIL/ILDB chunk payload.
    /// `chunk_len` is the declared length of the whole chunk, used to check
    /// the `bitcode_offset + bitcode_size == chunk_size - prologue_prefix`
    /// invariant.
    pub fn parse(data: &[u8], chunk_len: usize) -> Result<Self, DecodeError> {
        if data.len() < Self::WIRE_LEN {
            return Err(DecodeError::Truncated { offset: data.len() });
        }
        let program_version = u16::from_le_bytes([data[0], data[1]]);
        let program_type = u16::from_le_bytes([data[2], data[3]]);
        let size_in_uint32 = u32::from_le_bytes(data[4..8].try_into().unwrap());
        let dxil_magic = &data[8..12];
        if dxil_magic != DXIL_MAGIC {
            let mut found = [0u8; 4];
            found.copy_from_slice(dxil_magic);
            return Err(DecodeError::BadMagic {
                offset: 8,
                expected: DXIL_MAGIC,
                found,
            });
        }
        let dxil_version = u32::from_le_bytes(data[12..16].try_into().unwrap());
        let bitcode_offset = u32::from_le_bytes(data[16..20].try_into().unwrap());
        let bitcode_size = u32::from_le_bytes(data[20..24].try_into().unwrap());

        // bitcode_offset is measured from DxilMagic (byte 8), so the prologue
        // prefix in the invariant below is 8 (ProgramVersion + ProgramType +
        // SizeInUint32) plus the offset itself.
        let prologue_prefix = 8 + bitcode_offset as usize;
        if prologue_prefix + bitcode_size as usize != chunk_len {
            return Err(DecodeError::ContainerInvalid {
                reason: format!(
                    "DXIL header invariant violated: bitcode_offset ({bitcode_offset}) + \
                     bitcode_size ({bitcode_size}) != chunk_size ({chunk_len}) - prologue_prefix (8)"
                ),
            });
        }

        Ok(Self {
            shader_model: ShaderModel::from_program_version(program_version),
            shader_kind: ShaderKind::from_index(program_type),
            size_in_uint32,
            dxil_version,
            bitcode_offset,
            bitcode_size,
        })
    }

    /// Byte range of the bitstream within the chunk payload, relative to the
    /// start of the payload (i.e. relative to `ProgramVersion`, not to
    /// `DxilMagic`).
    #[must_use]
    pub fn bitcode_range(&self) -> std::ops::Range<usize> {
        let start = 8 + self.bitcode_offset as usize;
        start..(start + self.bitcode_size as usize)
    }
}

bitflags! {
    /// Feature bits carried by the `SFI0` chunk. Unknown bits are preserved
    /// rather than rejected: new shader models keep adding to this field.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Features: u64 {
        const DOUBLE_PRECISION_FLOATING_POINT = 1 << 0;
        const RAW_AND_STRUCTURED_BUFFERS = 1 << 1;
        const UAVS_AT_EVERY_SHADER_STAGE = 1 << 2;
        const UAV_64_SLOTS = 1 << 3;
        const MINIMUM_PRECISION_DATA_TYPES = 1 << 4;
        const DOUBLE_PRECISION_EXTENSIONS_FOR_11_1 = 1 << 5;
        const SHADER_EXTENSIONS_FOR_11_1 = 1 << 6;
        const COMPARISON_FILTERING_FOR_FEATURE_LEVEL_9 = 1 << 7;
        const TILED_RESOURCES = 1 << 8;
        const PS_OUTPUT_STENCIL_REF = 1 << 9;
        const PS_INNER_COVERAGE = 1 << 10;
        const TYPED_UAV_LOAD_ADDITIONAL_FORMATS = 1 << 11;
        const RASTER_ORDERED_UAVS = 1 << 12;
        const MULTIVIEW_FROM_ANY_SHADER = 1 << 13;
        const WAVE_LEVEL_OPERATIONS = 1 << 14;
        const INT64_OPS = 1 << 15;
        const VIEW_INSTANCING = 1 << 16;
        const BARYCENTRICS = 1 << 17;
        const USE_NATIVE_LOW_PRECISION = 1 << 18;
        const SHADING_RATE = 1 << 19;
        const RAYTRACING_TIER_1_1 = 1 << 20;
        const SAMPLER_FEEDBACK = 1 << 21;

        const _ = !0;
    }
}

impl Features {
    pub const WIRE_LEN: usize = 8;

    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < Self::WIRE_LEN {
            return Err(DecodeError::Truncated { offset: data.len() });
        }
        Ok(Self::from_bits_retain(u64::from_le_bytes(
            data[..8].try_into().unwrap(),
        )))
    }
}

/// The optional `ILDN` chunk: a 16-bit flags field, a 16-bit length, and the
/// NUL-terminated shader source name.
#[derive(Debug, Clone)]
pub struct DebugName {
    pub flags: u16,
    pub name: String,
}

impl DebugName {
    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < 4 {
            return Err(DecodeError::Truncated { offset: data.len() });
        }
        let flags = u16::from_le_bytes([data[0], data[1]]);
        let name_len = u16::from_le_bytes([data[2], data[3]]) as usize;
        let name_bytes =
            data.get(4..4 + name_len)
                .ok_or(DecodeError::Truncated { offset: data.len() })?;
        let name = String::from_utf8_lossy(name_bytes)
            .trim_end_matches('\0')
            .to_string();
        Ok(Self { flags, name })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program_header_bytes(bitcode_offset: u32, bitcode_size: u32, extra: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&0x63u16.to_le_bytes()); // ProgramVersion: model 6.3
        buf.extend_from_slice(&0u16.to_le_bytes()); // ProgramType: Pixel
        buf.extend_from_slice(&0u32.to_le_bytes()); // SizeInUint32, unchecked here
        buf.extend_from_slice(&DXIL_MAGIC);
        buf.extend_from_slice(&0x101u32.to_le_bytes()); // DxilVersion
        buf.extend_from_slice(&bitcode_offset.to_le_bytes());
        buf.extend_from_slice(&bitcode_size.to_le_bytes());
        buf.extend_from_slice(extra);
        buf
    }

    #[test]
    fn parses_a_well_formed_program_header() {
        let bitcode = vec![0u8; 16];
        let data = program_header_bytes(16, bitcode.len() as u32, &bitcode);
        let chunk_len = data.len();
        let header = ProgramHeader::parse(&data, chunk_len).unwrap();
        assert_eq!(header.shader_model, ShaderModel { major: 6, minor: 3 });
        assert_eq!(header.shader_kind, ShaderKind::Pixel);
        assert_eq!(header.dxil_version, 0x101);
        assert_eq!(header.bitcode_range(), 24..40);
        assert_eq!(&data[header.bitcode_range()], &bitcode[..]);
    }

    #[test]
    fn rejects_wrong_magic() {
        let mut data = program_header_bytes(0, 4, &[0u8; 4]);
        data[8] = b'X';
        let chunk_len = data.len();
        let err = ProgramHeader::parse(&data, chunk_len).unwrap_err();
        assert!(matches!(err, DecodeError::BadMagic { .. }));
    }

    #[test]
    fn rejects_size_invariant_violation() {
        let data = program_header_bytes(0, 4, &[0u8; 4]);
        let err = ProgramHeader::parse(&data, data.len() + 1).unwrap_err();
        assert!(matches!(err, DecodeError::ContainerInvalid { .. }));
    }

    #[test]
    fn unknown_shader_kind_falls_back_to_the_raw_index() {
        assert_eq!(ShaderKind::from_index(999), ShaderKind::Unknown(999));
        assert_eq!(ShaderKind::Unknown(999).name(), "Unknown(999)");
    }

    #[test]
    fn features_round_trips_known_and_unknown_bits() {
        let bits: u64 = (1 << 0) | (1 << 21) | (1 << 40);
        let data = bits.to_le_bytes();
        let features = Features::parse(&data).unwrap();
        assert!(features.contains(Features::DOUBLE_PRECISION_FLOATING_POINT));
        assert!(features.contains(Features::SAMPLER_FEEDBACK));
        assert_eq!(features.bits(), bits);
    }

    #[test]
    fn debug_name_trims_the_nul_terminator() {
        let mut data = Vec::new();
        data.extend_from_slice(&0u16.to_le_bytes()); // flags
        let name = b"shader.hlsl\0";
        data.extend_from_slice(&(name.len() as u16).to_le_bytes());
        data.extend_from_slice(name);
        let debug_name = DebugName::parse(&data).unwrap();
        assert_eq!(debug_name.name, "shader.hlsl");
    }
}
