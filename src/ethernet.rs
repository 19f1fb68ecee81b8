/*! Ethernet framing and the NIC seams.

The crate never opens a NIC itself. Ingress frames arrive through the
[`FrameNotifier`] trait and egress frames leave through [`FrameSender`];
DPDK, raw sockets or an in-process loopback all fit behind these two.

What lives here is the pure wire layer: MAC addresses, the 802.1Q VLAN
Ethernet header codec, and the move-only receive buffer handle.
*/
use itertools::Itertools;

use crate::{Error, Result};

/// Ethernet type assigned to eCPRI traffic.
pub const ECPRI_ETH_TYPE: u16 = 0xaefe;

/// 802.1Q tag protocol identifier.
pub const VLAN_TPID: u16 = 0x8100;

/// Length of a MAC address in bytes.
pub const ETH_ADDR_LEN: usize = 6;

/// Ethernet header length without a VLAN tag.
pub const ETH_HEADER_LEN: usize = 14;

/// Ethernet header length with a VLAN tag.
pub const ETH_VLAN_HEADER_LEN: usize = 18;

/// Maximum number of frames a single send burst may carry.
pub const MAX_BURST_SIZE: usize = 64;

/// An Ethernet MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MacAddress(pub [u8; ETH_ADDR_LEN]);

impl MacAddress {
    /// Parses the common colon-separated hex form.
    pub fn parse(s: &str) -> Result<Self> {
        let bytes: Vec<u8> = s
            .split(':')
            .map(|part| u8::from_str_radix(part, 16))
            .try_collect()
            .map_err(|_| Error::InvalidMacAddress(s.to_string()))?;
        let arr: [u8; ETH_ADDR_LEN] = bytes
            .try_into()
            .map_err(|_| Error::InvalidMacAddress(s.to_string()))?;
        Ok(Self(arr))
    }

    /// The raw bytes.
    pub fn octets(&self) -> &[u8; ETH_ADDR_LEN] {
        &self.0
    }
}

impl std::fmt::Display for MacAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:02x}", self.0.iter().format(":"))
    }
}

impl std::str::FromStr for MacAddress {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Decoded Ethernet header parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VlanFrameParams {
    /// Destination MAC address.
    pub mac_dst_address: MacAddress,
    /// Source MAC address.
    pub mac_src_address: MacAddress,
    /// Tag control information, when the frame carried a VLAN tag.
    pub tci: Option<u16>,
    /// Ethernet type field.
    pub eth_type: u16,
}

/// Builds Ethernet frames, with or without the 802.1Q tag.
#[derive(Debug, Clone)]
pub struct VlanFrameBuilder {
    params: VlanFrameParams,
}

impl VlanFrameBuilder {
    /// Creates a builder. A `tci` of `None` selects untagged frames.
    pub fn new(params: VlanFrameParams) -> Self {
        Self { params }
    }

    /// Length of the header this builder writes.
    pub fn header_len(&self) -> usize {
        if self.params.tci.is_some() {
            ETH_VLAN_HEADER_LEN
        } else {
            ETH_HEADER_LEN
        }
    }

    /// Writes the Ethernet header into the start of `frame`.
    ///
    /// `frame` must be at least [`Self::header_len`] bytes.
    pub fn write_header(&self, frame: &mut [u8]) {
        frame[0..6].copy_from_slice(self.params.mac_dst_address.octets());
        frame[6..12].copy_from_slice(self.params.mac_src_address.octets());
        match self.params.tci {
            Some(tci) => {
                frame[12..14].copy_from_slice(&VLAN_TPID.to_be_bytes());
                frame[14..16].copy_from_slice(&tci.to_be_bytes());
                frame[16..18].copy_from_slice(&self.params.eth_type.to_be_bytes());
            }
            None => {
                frame[12..14].copy_from_slice(&self.params.eth_type.to_be_bytes());
            }
        }
    }

    /// Builds a complete frame around the given payload.
    pub fn build(&self, payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![0u8; self.header_len() + payload.len()];
        self.write_header(&mut frame);
        frame[self.header_len()..].copy_from_slice(payload);
        frame
    }
}

/// Decodes Ethernet frames, transparently handling an 802.1Q tag.
#[derive(Debug, Clone, Copy, Default)]
pub struct VlanFrameDecoder;

impl VlanFrameDecoder {
    /// Creates a decoder.
    pub fn new() -> Self {
        Self
    }

    /// Decodes the header, returning the parameters and the payload.
    pub fn decode<'a>(&self, frame: &'a [u8]) -> Result<(VlanFrameParams, &'a [u8])> {
        if frame.len() < ETH_HEADER_LEN {
            return Err(Error::MalformedFrame("shorter than the Ethernet header"));
        }
        let mut params = VlanFrameParams {
            mac_dst_address: MacAddress(frame[0..6].try_into().unwrap()),
            mac_src_address: MacAddress(frame[6..12].try_into().unwrap()),
            tci: None,
            eth_type: u16::from_be_bytes([frame[12], frame[13]]),
        };
        if params.eth_type != VLAN_TPID {
            return Ok((params, &frame[ETH_HEADER_LEN..]));
        }
        if frame.len() < ETH_VLAN_HEADER_LEN {
            return Err(Error::MalformedFrame("shorter than the VLAN header"));
        }
        params.tci = Some(u16::from_be_bytes([frame[14], frame[15]]));
        params.eth_type = u16::from_be_bytes([frame[16], frame[17]]);
        Ok((params, &frame[ETH_VLAN_HEADER_LEN..]))
    }
}

/// A move-only handle to one received Ethernet frame.
///
/// The borrow returned by [`data`](RxBuffer::data) must not be kept
/// past the notifier callback; the buffer owns the bytes and frees
/// them when dropped.
#[derive(Debug)]
pub struct RxBuffer(Vec<u8>);

impl RxBuffer {
    /// Wraps the given bytes.
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }

    /// The received frame bytes.
    pub fn data(&self) -> &[u8] {
        &self.0
    }
}

/// Ingress seam: something that wants to see received Ethernet frames.
pub trait FrameNotifier: Send + Sync {
    /// Notifies the reception of a frame from the underlying link.
    fn on_new_frame(&self, buffer: RxBuffer);
}

/// Egress seam: something that can put Ethernet frames on the wire.
///
/// A single call carries at most [`MAX_BURST_SIZE`] frames. Frames
/// exceeding the link MTU are dropped by the implementation with a
/// warning.
pub trait FrameSender: Send + Sync {
    /// Sends the given burst of frames.
    fn send(&self, frames: &[&[u8]]);
}

/// Control seam of an Ethernet receiver implementation.
///
/// `start` installs the notifier and returns once the receive loop is
/// confirmed running; `stop` returns once it has exited.
pub trait ReceiverController: Send + Sync {
    /// Starts the receive loop, delivering frames to `notifier`.
    fn start(&self, notifier: std::sync::Arc<dyn FrameNotifier>);
    /// Stops the receive loop.
    fn stop(&self);
}
