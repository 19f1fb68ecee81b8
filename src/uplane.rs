/*! O-RAN User-Plane message codec.

A User-Plane message is a 4-byte radio application header (direction,
payload version, filter index and the frame/subframe/slot/symbol
timestamp tri-octet) followed by one or more data sections, each
carrying a PRB range and the compressed IQ samples for it.

The decoder is fed the OFH payload of an eCPRI IQ-data packet. Two
zero-allocation peek helpers give the message receiver access to the
filter index and the timestamp before committing to a full decode.

Messages built by the RU emulator side use the header writers at the
bottom of this module; the canned-frame scheme only restamps
[`write_timestamp`] and the eCPRI sequence id at transmission time.
*/
use crate::compression::{CompressionParams, IqDecompressor, NOF_SUBCARRIERS_PER_RB};
use crate::message::{DataDirection, FilterIndex};
use crate::slot::{Scs, SlotPoint, SlotSymbolPoint};
use crate::{Complex, Error, Result};

/// Size of the User-Plane radio application header in bytes.
pub const RADIO_APP_HEADER_SIZE: usize = 4;

/// Size of a section header in bytes, excluding udCompHdr.
pub const SECTION_HEADER_SIZE: usize = 4;

/// Size of the udCompHdr plus its reserved octet.
pub const COMPRESSION_HEADER_SIZE: usize = 2;

/// User-Plane payload version this crate implements.
pub const OFH_PAYLOAD_VERSION: u8 = 1;

/// Whether the on-wire sections carry a udCompHdr describing their own
/// compression, or compression is a static out-of-band agreement.
///
/// Either way the two header octets are present on the wire; in static
/// mode their content is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionHeaderMode {
    /// udCompHdr is ignored; the configured parameters apply.
    #[default]
    Static,
    /// udCompHdr is decoded per section.
    Dynamic,
}

/// Decoded header parameters of a User-Plane message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UplaneMessageParams {
    /// Data direction.
    pub direction: DataDirection,
    /// Payload version.
    pub payload_version: u8,
    /// Filter index.
    pub filter_index: FilterIndex,
    /// Slot the message belongs to.
    pub slot: SlotPoint,
    /// Symbol identifier within the slot.
    pub symbol_id: u8,
}

/// One decoded User-Plane data section.
#[derive(Debug, Clone)]
pub struct UplaneSection {
    /// Section identifier.
    pub section_id: u16,
    /// True when every resource block is used (rb bit clear).
    pub is_every_rb_used: bool,
    /// True when the section applies to the current symbol (symInc clear).
    pub use_current_symbol_number: bool,
    /// First PRB of the section.
    pub start_prb: u16,
    /// Number of PRBs in the section.
    pub nof_prbs: u16,
    /// Decompressed IQ samples, `nof_prbs * 12` of them.
    pub iq_samples: Vec<Complex>,
}

/// A fully decoded User-Plane message.
#[derive(Debug, Clone)]
pub struct UplaneMessage {
    /// Header parameters.
    pub params: UplaneMessageParams,
    /// Data sections, at least one.
    pub sections: Vec<UplaneSection>,
}

/// Peeks the filter index without decoding the message.
pub fn peek_filter_index(payload: &[u8]) -> Result<FilterIndex> {
    let first = payload
        .first()
        .ok_or_else(|| Error::UplaneDecode("empty message".into()))?;
    Ok(FilterIndex::from_wire(*first))
}

/// Peeks the slot and symbol without decoding the message.
pub fn peek_slot_symbol_point(
    payload: &[u8],
    nof_symbols: u8,
    scs: Scs,
) -> Result<SlotSymbolPoint> {
    if payload.len() < RADIO_APP_HEADER_SIZE {
        return Err(Error::UplaneDecode("message too short to peek slot".into()));
    }
    let frame = payload[1];
    let subframe = payload[2] >> 4;
    let slot_id = (u32::from(payload[2] & 0x0f) << 2) | u32::from(payload[3] >> 6);
    let symbol = payload[3] & 0x3f;

    let slot = SlotPoint::from_wire(scs, frame, subframe, slot_id)
        .ok_or_else(|| Error::UplaneDecode(format!("invalid timestamp {subframe}:{slot_id}")))?;
    if symbol >= nof_symbols {
        return Err(Error::UplaneDecode(format!("invalid symbol id '{symbol}'")));
    }
    Ok(SlotSymbolPoint::new(slot, symbol, nof_symbols))
}

/// O-RAN User-Plane message decoder.
pub struct UplaneMessageDecoder {
    scs: Scs,
    nof_symbols: u8,
    ru_nof_prbs: u16,
    compr_params: CompressionParams,
    header_mode: CompressionHeaderMode,
    decompressor: Box<dyn IqDecompressor>,
}

impl UplaneMessageDecoder {
    /// Creates a decoder.
    ///
    /// `ru_nof_prbs` is the cell bandwidth in PRBs; a section with
    /// `numPrb == 0` covers that many PRBs.
    pub fn new(
        scs: Scs,
        nof_symbols: u8,
        ru_nof_prbs: u16,
        compr_params: CompressionParams,
        header_mode: CompressionHeaderMode,
        decompressor: Box<dyn IqDecompressor>,
    ) -> Self {
        Self {
            scs,
            nof_symbols,
            ru_nof_prbs,
            compr_params,
            header_mode,
            decompressor,
        }
    }

    /// Decodes a complete User-Plane message.
    pub fn decode(&self, payload: &[u8]) -> Result<UplaneMessage> {
        if payload.len() < RADIO_APP_HEADER_SIZE {
            return Err(Error::UplaneDecode(
                "message too short for the radio application header".into(),
            ));
        }

        let direction = DataDirection::from_wire(payload[0] >> 7);
        let payload_version = (payload[0] >> 4) & 0x7;
        if payload_version != OFH_PAYLOAD_VERSION {
            return Err(Error::UplaneDecode(format!(
                "unsupported payload version '{payload_version}'"
            )));
        }
        let filter_index = FilterIndex::from_wire(payload[0]);
        let point = peek_slot_symbol_point(payload, self.nof_symbols, self.scs)?;

        let params = UplaneMessageParams {
            direction,
            payload_version,
            filter_index,
            slot: point.slot(),
            symbol_id: point.symbol_index(),
        };

        let mut sections = Vec::new();
        let mut rest = &payload[RADIO_APP_HEADER_SIZE..];
        while !rest.is_empty() {
            let (section, used) = self.decode_section(rest)?;
            sections.push(section);
            rest = &rest[used..];
        }
        if sections.is_empty() {
            return Err(Error::UplaneDecode("message carries no sections".into()));
        }

        Ok(UplaneMessage { params, sections })
    }

    /// Decodes one section, returning it and the bytes consumed.
    fn decode_section(&self, data: &[u8]) -> Result<(UplaneSection, usize)> {
        let header_size = SECTION_HEADER_SIZE + COMPRESSION_HEADER_SIZE;
        if data.len() < header_size {
            return Err(Error::UplaneDecode("truncated section header".into()));
        }

        let section_id = (u16::from(data[0]) << 4) | u16::from(data[1] >> 4);
        let is_every_rb_used = (data[1] >> 3) & 0x1 == 0;
        let use_current_symbol_number = (data[1] >> 2) & 0x1 == 0;
        let start_prb = (u16::from(data[1] & 0x3) << 8) | u16::from(data[2]);
        let nof_prbs = match data[3] {
            0 => self.ru_nof_prbs,
            n => u16::from(n),
        };

        let compr = match self.header_mode {
            CompressionHeaderMode::Static => self.compr_params,
            CompressionHeaderMode::Dynamic => {
                let params = CompressionParams::from_wire_header(data[4]).ok_or_else(|| {
                    Error::UplaneDecode(format!("invalid udCompHdr {:#04x}", data[4]))
                })?;
                if params.kind != self.compr_params.kind {
                    return Err(Error::UplaneDecode(format!(
                        "unexpected compression kind {:?}",
                        params.kind
                    )));
                }
                params
            }
        };

        let iq_size = usize::from(nof_prbs) * compr.prb_bytes();
        let iq_start = header_size;
        if data.len() < iq_start + iq_size {
            return Err(Error::UplaneDecode(format!(
                "section IQ data needs {} bytes, {} available",
                iq_size,
                data.len() - iq_start
            )));
        }

        let mut iq_samples =
            vec![Complex::default(); usize::from(nof_prbs) * NOF_SUBCARRIERS_PER_RB];
        self.decompressor
            .decompress(&mut iq_samples, &data[iq_start..iq_start + iq_size], &compr)?;

        Ok((
            UplaneSection {
                section_id,
                is_every_rb_used,
                use_current_symbol_number,
                start_prb,
                nof_prbs,
                iq_samples,
            },
            iq_start + iq_size,
        ))
    }
}

/// Writes the 4-byte radio application header.
pub fn write_radio_app_header(
    buf: &mut [u8],
    direction: DataDirection,
    filter: FilterIndex,
    slot: SlotPoint,
    symbol: u8,
) {
    let dir_bit = match direction {
        DataDirection::Uplink => 0,
        DataDirection::Downlink => 1,
    };
    buf[0] = (dir_bit << 7) | (OFH_PAYLOAD_VERSION << 4) | filter.to_wire();
    write_timestamp(&mut buf[1..4], slot, symbol);
}

/// Writes the frame/subframe/slot/symbol tri-octet into `buf[0..3]`.
pub fn write_timestamp(buf: &mut [u8], slot: SlotPoint, symbol: u8) {
    buf[0] = (slot.sfn() & 0xff) as u8;
    buf[1] = ((slot.subframe_index() as u8) << 4) | ((slot.subframe_slot_index() >> 2) as u8);
    buf[2] = (((slot.subframe_slot_index() & 0x3) as u8) << 6) | (symbol & 0x3f);
}

/// Writes a section header plus udCompHdr, `SECTION_HEADER_SIZE +
/// COMPRESSION_HEADER_SIZE` bytes in total.
pub fn write_section_header(
    buf: &mut [u8],
    section_id: u16,
    start_prb: u16,
    nof_prbs: u16,
    compr: &CompressionParams,
) {
    buf[0] = (section_id >> 4) as u8;
    // rb = 0 (every RB used), symInc = 0 (current symbol number).
    buf[1] = ((section_id & 0xf) as u8) << 4 | ((start_prb >> 8) as u8 & 0x3);
    buf[2] = start_prb as u8;
    buf[3] = if nof_prbs > 255 { 0 } else { nof_prbs as u8 };
    buf[4] = compr.to_wire_header();
    buf[5] = 0;
}
