/*! IQ compression parameters and the decompressor seam.

The receive pipeline only needs to know how many bytes a PRB occupies
on the wire and how to turn those bytes back into complex samples.
The latter is behind the [`IqDecompressor`] trait so exotic codecs can
be plugged in; the crate ships the two the RU emulator exercises:
uncompressed bit-packed IQ and block floating point (BFP).
*/
use serde::{Deserialize, Serialize};

use crate::{Complex, Error, Float, Result};

/// Number of subcarriers in a physical resource block.
pub const NOF_SUBCARRIERS_PER_RB: usize = 12;

/// Maximum allowed bit width of compressed IQ data.
pub const MAX_IQ_WIDTH: u8 = 16;

/// Compression type used to (de)compress IQ samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    /// No compression.
    None,
    /// Block floating point compression.
    #[default]
    Bfp,
    /// Block scaling compression.
    #[serde(rename = "block scaling")]
    BlockScaling,
    /// Mu-law compression.
    #[serde(rename = "mu law")]
    MuLaw,
    /// Modulation compression.
    Modulation,
    /// BFP + selective RE sending.
    #[serde(rename = "bfp selective")]
    BfpSelective,
    /// Modulation compression + selective RE sending.
    #[serde(rename = "modulation selective")]
    ModSelective,
}

impl CompressionType {
    /// Wire value in the low nibble of udCompHdr.
    pub fn to_wire(self) -> u8 {
        match self {
            CompressionType::None => 0,
            CompressionType::Bfp => 1,
            CompressionType::BlockScaling => 2,
            CompressionType::MuLaw => 3,
            CompressionType::Modulation => 4,
            CompressionType::BfpSelective => 5,
            CompressionType::ModSelective => 6,
        }
    }

    /// Decodes the low nibble of udCompHdr.
    pub fn from_wire(value: u8) -> Option<Self> {
        Some(match value & 0x0f {
            0 => CompressionType::None,
            1 => CompressionType::Bfp,
            2 => CompressionType::BlockScaling,
            3 => CompressionType::MuLaw,
            4 => CompressionType::Modulation,
            5 => CompressionType::BfpSelective,
            6 => CompressionType::ModSelective,
            _ => return None,
        })
    }
}

/// IQ data compression parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionParams {
    /// Compression kind.
    pub kind: CompressionType,
    /// Width of each I and Q sample on the wire, `[1, 16]`.
    pub data_width: u8,
}

impl CompressionParams {
    /// Encodes the udCompHdr octet: `(iqWidth << 4) | compMeth`.
    ///
    /// A width of 16 encodes as 0 in the 4-bit field.
    pub fn to_wire_header(&self) -> u8 {
        ((self.data_width & 0x0f) << 4) | self.kind.to_wire()
    }

    /// Decodes a udCompHdr octet.
    pub fn from_wire_header(octet: u8) -> Option<Self> {
        let width = octet >> 4;
        Some(Self {
            kind: CompressionType::from_wire(octet)?,
            data_width: if width == 0 { MAX_IQ_WIDTH } else { width },
        })
    }

    /// Size in bytes of one compressed PRB.
    pub fn prb_bytes(&self) -> usize {
        let mut bits = usize::from(self.data_width) * NOF_SUBCARRIERS_PER_RB * 2;
        if matches!(self.kind, CompressionType::Bfp) {
            // One exponent octet per PRB.
            bits += 8;
        }
        bits.div_ceil(8)
    }
}

impl Default for CompressionParams {
    fn default() -> Self {
        Self {
            kind: CompressionType::Bfp,
            data_width: 9,
        }
    }
}

/// Turns compressed PRB bytes back into complex samples.
pub trait IqDecompressor: Send + Sync {
    /// Decompresses `data` into `out`.
    ///
    /// `out` holds `nof_prbs * 12` samples and `data` holds
    /// `nof_prbs * params.prb_bytes()` bytes.
    fn decompress(&self, out: &mut [Complex], data: &[u8], params: &CompressionParams)
    -> Result<()>;
}

/// Creates a decompressor for the given compression kind.
///
/// Only `none` and `bfp` are implemented in-crate; everything else is
/// rejected here, at configuration time.
pub fn create_decompressor(kind: CompressionType) -> Result<Box<dyn IqDecompressor>> {
    match kind {
        CompressionType::None => Ok(Box::new(NoneDecompressor)),
        CompressionType::Bfp => Ok(Box::new(BfpDecompressor)),
        other => Err(Error::UnsupportedCompression(format!("{other:?}"))),
    }
}

/// Reads big-endian bit fields out of a byte stream.
struct BitReader<'a> {
    data: &'a [u8],
    bit_pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, bit_pos: 0 }
    }

    /// Reads `width` bits as an unsigned value, MSB first.
    fn read(&mut self, width: u8) -> Result<u32> {
        let mut value = 0u32;
        for _ in 0..width {
            let byte = self.bit_pos / 8;
            if byte >= self.data.len() {
                return Err(Error::UplaneDecode("IQ data ran out of bits".into()));
            }
            let bit = (self.data[byte] >> (7 - self.bit_pos % 8)) & 1;
            value = (value << 1) | u32::from(bit);
            self.bit_pos += 1;
        }
        Ok(value)
    }

    /// Reads `width` bits as a sign-extended value.
    fn read_signed(&mut self, width: u8) -> Result<i32> {
        let raw = self.read(width)?;
        let sign_bit = 1u32 << (width - 1);
        if raw & sign_bit != 0 {
            Ok((raw | !(sign_bit | (sign_bit - 1))) as i32)
        } else {
            Ok(raw as i32)
        }
    }
}

/// Uncompressed bit-packed IQ samples.
///
/// Each sample is a `data_width`-bit signed fixed point value; the
/// dequantized range is `[-1, 1)`.
pub struct NoneDecompressor;

impl IqDecompressor for NoneDecompressor {
    fn decompress(
        &self,
        out: &mut [Complex],
        data: &[u8],
        params: &CompressionParams,
    ) -> Result<()> {
        let width = params.data_width;
        let scale = 1.0 / (1u32 << (width - 1)) as Float;
        let mut reader = BitReader::new(data);
        for sample in out.iter_mut() {
            let re = reader.read_signed(width)? as Float * scale;
            let im = reader.read_signed(width)? as Float * scale;
            *sample = Complex::new(re, im);
        }
        Ok(())
    }
}

/// Block floating point decompression.
///
/// Each PRB carries one exponent octet followed by 24 packed
/// `data_width`-bit mantissas; the sample value is
/// `mantissa * 2^exponent / 2^15`.
pub struct BfpDecompressor;

impl IqDecompressor for BfpDecompressor {
    fn decompress(
        &self,
        out: &mut [Complex],
        data: &[u8],
        params: &CompressionParams,
    ) -> Result<()> {
        let width = params.data_width;
        let prb_bytes = params.prb_bytes();
        for (prb, samples) in out.chunks_mut(NOF_SUBCARRIERS_PER_RB).enumerate() {
            let start = prb * prb_bytes;
            if start + prb_bytes > data.len() {
                return Err(Error::UplaneDecode("IQ data ran out of PRBs".into()));
            }
            let chunk = &data[start..start + prb_bytes];
            let exponent = chunk[0] & 0x0f;
            let scale = (1u32 << exponent) as Float / 32768.0;
            let mut reader = BitReader::new(&chunk[1..]);
            for sample in samples.iter_mut() {
                let re = reader.read_signed(width)? as Float * scale;
                let im = reader.read_signed(width)? as Float * scale;
                *sample = Complex::new(re, im);
            }
        }
        Ok(())
    }
}
