// Quantization block layouts and per-block extraction (Q4_0, Q4_1, Q8_0)

use half::f16;
use tracing::trace;

use crate::error::UnpackError;
use super::config::Q4_1CodeOffset;

// ---------------------------------------------------------------------------
// GGML tensor type IDs (matches ggml_type enum in ggml.h)
// ---------------------------------------------------------------------------

/// Tensor data types that can appear in a GGUF tensor directory.
///
/// The discriminant values match the GGML type IDs. Only Q4_0, Q4_1 and Q8_0
/// can be unpacked; the rest are listed so a directory entry can be tagged
/// and then rejected with a useful message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum GgmlType {
    F32 = 0,
    F16 = 1,
    Q4_0 = 2,
    Q4_1 = 3,
    // 4 and 5 were Q4_2 / Q4_3, removed upstream
    Q5_0 = 6,
    Q5_1 = 7,
    Q8_0 = 8,
    Q8_1 = 9,
    Q2K = 10,
    Q3K = 11,
    Q4K = 12,
    Q5K = 13,
    Q6K = 14,
    Q8K = 15,
    IQ2XXS = 16,
    IQ2XS = 17,
    IQ3XXS = 18,
    IQ1S = 19,
    IQ4NL = 20,
    IQ3S = 21,
    IQ2S = 22,
    IQ4XS = 23,
    I8 = 24,
    I16 = 25,
    I32 = 26,
    I64 = 27,
    F64 = 28,
    IQ1M = 29,
    BF16 = 30,
}

impl GgmlType {
    const ALL: [GgmlType; 29] = [
        Self::F32,
        Self::F16,
        Self::Q4_0,
        Self::Q4_1,
        Self::Q5_0,
        Self::Q5_1,
        Self::Q8_0,
        Self::Q8_1,
        Self::Q2K,
        Self::Q3K,
        Self::Q4K,
        Self::Q5K,
        Self::Q6K,
        Self::Q8K,
        Self::IQ2XXS,
        Self::IQ2XS,
        Self::IQ3XXS,
        Self::IQ1S,
        Self::IQ4NL,
        Self::IQ3S,
        Self::IQ2S,
        Self::IQ4XS,
        Self::I8,
        Self::I16,
        Self::I32,
        Self::I64,
        Self::F64,
        Self::IQ1M,
        Self::BF16,
    ];

    /// Convert a raw type id from a tensor directory into a `GgmlType`.
    pub fn from_u32(v: u32) -> Result<Self, UnpackError> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| *t as u32 == v)
            .ok_or(UnpackError::UnknownTensorType(v))
    }

    /// Name as printed by the ggml tooling.
    pub fn name(self) -> &'static str {
        match self {
            Self::F32 => "F32",
            Self::F16 => "F16",
            Self::Q4_0 => "Q4_0",
            Self::Q4_1 => "Q4_1",
            Self::Q5_0 => "Q5_0",
            Self::Q5_1 => "Q5_1",
            Self::Q8_0 => "Q8_0",
            Self::Q8_1 => "Q8_1",
            Self::Q2K => "Q2_K",
            Self::Q3K => "Q3_K",
            Self::Q4K => "Q4_K",
            Self::Q5K => "Q5_K",
            Self::Q6K => "Q6_K",
            Self::Q8K => "Q8_K",
            Self::IQ2XXS => "IQ2_XXS",
            Self::IQ2XS => "IQ2_XS",
            Self::IQ3XXS => "IQ3_XXS",
            Self::IQ1S => "IQ1_S",
            Self::IQ4NL => "IQ4_NL",
            Self::IQ3S => "IQ3_S",
            Self::IQ2S => "IQ2_S",
            Self::IQ4XS => "IQ4_XS",
            Self::I8 => "I8",
            Self::I16 => "I16",
            Self::I32 => "I32",
            Self::I64 => "I64",
            Self::F64 => "F64",
            Self::IQ1M => "IQ1_M",
            Self::BF16 => "BF16",
        }
    }
}

impl std::fmt::Display for GgmlType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// QuantType: the three unpackable schemes
// ---------------------------------------------------------------------------

/// Number of codes per block, shared by all three schemes.
pub const QK: usize = 32;

/// Q4_0 block: `d: f16 | qs: [u8; 16]` = 18 bytes.
pub const Q4_0_BLOCK_BYTES: usize = 18;

/// Q4_1 block: `d: f16 | m: f16 | qs: [u8; 16]` = 20 bytes.
pub const Q4_1_BLOCK_BYTES: usize = 20;

/// Q8_0 block: `d: f16 | qs: [i8; 32]` = 34 bytes.
pub const Q8_0_BLOCK_BYTES: usize = 34;

/// A quantization scheme this crate can unpack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuantType {
    /// 4-bit codes, f16 scale, bias derived as `-8 * scale`.
    Q4_0,
    /// 4-bit codes, f16 scale and f16 bias stored in the block.
    Q4_1,
    /// 8-bit codes, f16 scale, bias derived as `-128 * scale`.
    Q8_0,
}

impl QuantType {
    /// Size in bytes of one source block.
    pub const fn block_byte_size(self) -> usize {
        match self {
            Self::Q4_0 => Q4_0_BLOCK_BYTES,
            Self::Q4_1 => Q4_1_BLOCK_BYTES,
            Self::Q8_0 => Q8_0_BLOCK_BYTES,
        }
    }

    /// Codes stored per byte of packed output.
    pub const fn weights_per_byte(self) -> usize {
        match self {
            Self::Q4_0 | Self::Q4_1 => 2,
            Self::Q8_0 => 1,
        }
    }

    /// Codes held by one 32-bit output word (8 for 4-bit, 4 for 8-bit).
    pub const fn codes_per_word(self) -> usize {
        self.weights_per_byte() * 4
    }

    /// Bytes of packed codes produced per block (16 for 4-bit, 32 for 8-bit).
    pub const fn packed_block_bytes(self) -> usize {
        QK / self.weights_per_byte()
    }

    /// Number of source bytes needed for `n_elements` values, or `None` on
    /// overflow. `n_elements` is assumed to be a multiple of [`QK`].
    pub fn data_size(self, n_elements: usize) -> Option<usize> {
        (n_elements / QK).checked_mul(self.block_byte_size())
    }

    /// Read logical code `k` (0..32) out of one block's packed output.
    #[inline]
    pub fn code_at(self, packed: &[u8], k: usize) -> u8 {
        match self {
            Self::Q8_0 => packed[k],
            Self::Q4_0 | Self::Q4_1 => (packed[k / 2] >> ((k % 2) * 4)) & 0x0F,
        }
    }

    pub fn name(self) -> &'static str {
        GgmlType::from(self).name()
    }
}

impl std::fmt::Display for QuantType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl From<QuantType> for GgmlType {
    fn from(q: QuantType) -> Self {
        match q {
            QuantType::Q4_0 => GgmlType::Q4_0,
            QuantType::Q4_1 => GgmlType::Q4_1,
            QuantType::Q8_0 => GgmlType::Q8_0,
        }
    }
}

impl TryFrom<GgmlType> for QuantType {
    /// The rejected type is handed back so the caller can report it.
    type Error = GgmlType;

    fn try_from(t: GgmlType) -> Result<Self, Self::Error> {
        match t {
            GgmlType::Q4_0 => Ok(Self::Q4_0),
            GgmlType::Q4_1 => Ok(Self::Q4_1),
            GgmlType::Q8_0 => Ok(Self::Q8_0),
            other => Err(other),
        }
    }
}

// ---------------------------------------------------------------------------
// Field readers
// ---------------------------------------------------------------------------

/// Read a little-endian f16 field at `offset`, keeping the bit pattern as is.
#[inline]
fn read_f16(block: &[u8], offset: usize) -> f16 {
    f16::from_bits(u16::from_le_bytes([block[offset], block[offset + 1]]))
}

/// Copy the 16 code bytes starting at `start` out of a 4-bit block.
#[inline]
fn code_window(block: &[u8], start: usize) -> [u8; 16] {
    let mut codes = [0u8; 16];
    codes.copy_from_slice(&block[start..start + 16]);
    codes
}

// ---------------------------------------------------------------------------
// Nibble unpacking
// ---------------------------------------------------------------------------

/// Repack the 16 code bytes of a 4-bit block into 32 dense nibbles.
///
/// In the GGUF layout code `j` of the first half lives in the low nibble of
/// byte `j` and code `j + 16` in the high nibble of the same byte. The output
/// stores codes in logical order, two per byte, low nibble first:
///
/// ```text
/// out[0..8]   <- low  nibbles of src[0..16]   (codes  0..16)
/// out[8..16]  <- high nibbles of src[0..16]   (codes 16..32)
/// ```
pub fn unpack_32_4(src: &[u8; 16]) -> [u8; 16] {
    let mut out = [0u8; 16];
    for (j, &byte) in src.iter().enumerate() {
        let shift = (j % 2) * 4;
        out[j / 2] |= (byte & 0x0F) << shift;
        out[8 + j / 2] |= (byte >> 4) << shift;
    }
    out
}

/// Map a stored `i8` code to the unsigned code used in the output.
///
/// Flipping the top bit adds 128 modulo 256, so `code - 128 == b as i8`.
/// Applying it twice gives back `b`.
#[inline]
pub const fn flip_sign_bit(b: u8) -> u8 {
    b ^ 0x80
}

// ---------------------------------------------------------------------------
// Block extractors
// ---------------------------------------------------------------------------
//
// Each extractor walks `data` one block at a time and writes one scale, one
// bias, and `packed_block_bytes()` bytes of codes per block. The caller sizes
// the outputs; extra trailing input bytes are never produced because the
// assembler checks the byte length up front.

/// Extract (codes, scales, biases) from Q4_0 blocks.
///
/// Layout: `|d: f16|32 x 4-bit codes|`. The bias is `-8 * d`, so
/// `code * d + bias == (code - 8) * d`.
pub fn extract_q4_0(data: &[u8], weights: &mut [u8], scales: &mut [f16], biases: &mut [f16]) {
    let blocks = data.chunks_exact(Q4_0_BLOCK_BYTES);
    let n_blocks = blocks.len();
    for (((block, out), scale), bias) in blocks
        .zip(weights.chunks_exact_mut(16))
        .zip(scales.iter_mut())
        .zip(biases.iter_mut())
    {
        let d = read_f16(block, 0);
        *scale = d;
        *bias = f16::from_f32(-8.0 * d.to_f32());
        out.copy_from_slice(&unpack_32_4(&code_window(block, 2)));
    }
    trace!(n_blocks, "extracted Q4_0 blocks");
}

/// Extract (codes, scales, biases) from Q4_1 blocks.
///
/// Layout: `|d: f16|m: f16|32 x 4-bit codes|`. Scale and bias are both copied
/// verbatim. `offset` chooses which 16 bytes feed the nibble unpacker; see
/// [`Q4_1CodeOffset`].
pub fn extract_q4_1(
    data: &[u8],
    weights: &mut [u8],
    scales: &mut [f16],
    biases: &mut [f16],
    offset: Q4_1CodeOffset,
) {
    let start = offset.code_start();
    let blocks = data.chunks_exact(Q4_1_BLOCK_BYTES);
    let n_blocks = blocks.len();
    for (((block, out), scale), bias) in blocks
        .zip(weights.chunks_exact_mut(16))
        .zip(scales.iter_mut())
        .zip(biases.iter_mut())
    {
        *scale = read_f16(block, 0);
        *bias = read_f16(block, 2);
        out.copy_from_slice(&unpack_32_4(&code_window(block, start)));
    }
    trace!(n_blocks, code_start = start, "extracted Q4_1 blocks");
}

/// Extract (codes, scales, biases) from Q8_0 blocks.
///
/// Layout: `|d: f16|32 x i8 codes|`. Codes are shifted to unsigned by flipping
/// the sign bit and the bias is `-128 * d`.
pub fn extract_q8_0(data: &[u8], weights: &mut [u8], scales: &mut [f16], biases: &mut [f16]) {
    let blocks = data.chunks_exact(Q8_0_BLOCK_BYTES);
    let n_blocks = blocks.len();
    for (((block, out), scale), bias) in blocks
        .zip(weights.chunks_exact_mut(QK))
        .zip(scales.iter_mut())
        .zip(biases.iter_mut())
    {
        let d = read_f16(block, 0);
        *scale = d;
        *bias = f16::from_f32(-128.0 * d.to_f32());
        for (dst, &src) in out.iter_mut().zip(&block[2..]) {
            *dst = flip_sign_bit(src);
        }
    }
    trace!(n_blocks, "extracted Q8_0 blocks");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
