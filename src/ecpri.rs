/*! eCPRI packet codec.

Only the two message types Open Fronthaul uses are recognized: IQ data
(`0x00`) and real-time control (`0x02`). The protocol revision must be
1 and concatenation is not supported.

Some Radio Units fill the common header payload-size field with a
value that does not match the actual frame, so the decoder comes in
two flavors: one that trusts the header field and one that ignores it
and takes whatever bytes remain in the frame.
*/

use crate::{Error, Result};

/// eCPRI protocol revision implemented by this crate.
pub const ECPRI_PROTOCOL_REVISION: u8 = 1;

/// Size of the eCPRI common header in bytes.
pub const ECPRI_COMMON_HEADER_SIZE: usize = 4;

/// Size of the message-type-specific parameter block in bytes.
pub const ECPRI_TYPE_PARAMS_SIZE: usize = 4;

/// eCPRI message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcpriMessageType {
    /// IQ data transfer (type 0).
    IqData,
    /// Real-time control data (type 2).
    RtControlData,
}

impl EcpriMessageType {
    /// Wire value of the message type octet.
    pub fn to_wire(self) -> u8 {
        match self {
            EcpriMessageType::IqData => 0x00,
            EcpriMessageType::RtControlData => 0x02,
        }
    }
}

/// eCPRI common header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommonHeader {
    /// Protocol revision.
    pub revision: u8,
    /// True when this is the last packet (concatenation bit clear).
    pub is_last_packet: bool,
    /// Message type.
    pub msg_type: EcpriMessageType,
    /// Payload size in bytes, counted after the common header.
    pub payload_size: usize,
}

/// Message-type-specific parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeParameters {
    /// IQ data transfer parameters.
    IqData {
        /// Physical channel identifier; carries the eAxC.
        pc_id: u16,
        /// Sequence identifier; the top octet is the message counter.
        seq_id: u16,
    },
    /// Real-time control parameters.
    RtControl {
        /// Real-time control identifier.
        rtc_id: u16,
        /// Sequence identifier.
        seq_id: u16,
    },
}

/// Decoded eCPRI packet parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketParameters {
    /// Common header.
    pub header: CommonHeader,
    /// Type-specific parameters.
    pub type_params: TypeParameters,
}

/// How the decoder treats the payload-size header field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PayloadSizeMode {
    /// Slice the payload to exactly the declared size.
    #[default]
    TrustHeader,
    /// Ignore the declared size; the payload is the rest of the frame.
    IgnoreHeader,
}

/// eCPRI packet decoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct PacketDecoder {
    mode: PayloadSizeMode,
}

impl PacketDecoder {
    /// Creates a decoder with the given payload-size handling.
    pub fn new(mode: PayloadSizeMode) -> Self {
        Self { mode }
    }

    /// Decodes a packet, returning its parameters and the OFH payload.
    pub fn decode<'a>(&self, packet: &'a [u8]) -> Result<(PacketParameters, &'a [u8])> {
        if packet.len() < ECPRI_COMMON_HEADER_SIZE + ECPRI_TYPE_PARAMS_SIZE {
            return Err(Error::MalformedFrame("shorter than the eCPRI headers"));
        }

        let first = packet[0];
        let revision = first >> 4;
        if revision != ECPRI_PROTOCOL_REVISION {
            return Err(Error::UnsupportedEcpri("protocol revision is not 1"));
        }
        if first & 0x1 != 0 {
            return Err(Error::UnsupportedEcpri("concatenation is not supported"));
        }

        let msg_type = match packet[1] {
            0x00 => EcpriMessageType::IqData,
            0x02 => EcpriMessageType::RtControlData,
            other => return Err(Error::UnknownEcpriType(other)),
        };
        let payload_size = usize::from(u16::from_be_bytes([packet[2], packet[3]]));

        let rest = &packet[ECPRI_COMMON_HEADER_SIZE..];
        let id = u16::from_be_bytes([rest[0], rest[1]]);
        let seq_id = u16::from_be_bytes([rest[2], rest[3]]);
        let type_params = match msg_type {
            EcpriMessageType::IqData => TypeParameters::IqData { pc_id: id, seq_id },
            EcpriMessageType::RtControlData => TypeParameters::RtControl { rtc_id: id, seq_id },
        };

        let data = &rest[ECPRI_TYPE_PARAMS_SIZE..];
        let payload = match self.mode {
            PayloadSizeMode::TrustHeader => {
                if payload_size < ECPRI_TYPE_PARAMS_SIZE || payload_size > rest.len() {
                    return Err(Error::MalformedFrame(
                        "payload size field does not fit the frame",
                    ));
                }
                &data[..payload_size - ECPRI_TYPE_PARAMS_SIZE]
            }
            PayloadSizeMode::IgnoreHeader => data,
        };

        Ok((
            PacketParameters {
                header: CommonHeader {
                    revision,
                    is_last_packet: true,
                    msg_type,
                    payload_size,
                },
                type_params,
            },
            payload,
        ))
    }
}

/// Writes an eCPRI IQ-data packet header into the first 8 bytes of `buf`.
///
/// `payload_size` counts everything after the common header, including
/// the pc_id/seq_id block.
pub fn write_iq_data_header(buf: &mut [u8], payload_size: u16, pc_id: u16, seq_id: u16) {
    buf[0] = ECPRI_PROTOCOL_REVISION << 4;
    buf[1] = EcpriMessageType::IqData.to_wire();
    buf[2..4].copy_from_slice(&payload_size.to_be_bytes());
    buf[4..6].copy_from_slice(&pc_id.to_be_bytes());
    buf[6..8].copy_from_slice(&seq_id.to_be_bytes());
}
