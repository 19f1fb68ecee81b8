#![warn(missing_docs)]
/*! This crate provides the lower layers of an O-RAN 7.2x split Open
Fronthaul (OFH) link: the Distributed Unit receive path, and an RU
emulator that mirrors it for testing a DU over a real or simulated
Ethernet link.

It speaks eCPRI revision 1 over (optionally VLAN tagged) Ethernet, and
decodes O-RAN User-Plane IQ messages into shared resource grids and
PRACH buffers, paced by an over-the-air (OTA) symbol clock.

# Architecture overview

The receive side is a per-packet pipeline feeding slot/symbol indexed
repositories:

```text
 [ Ethernet frame (FrameNotifier) ]
           ↓
    [ VLAN decode + filter ]
           ↓
    [ eCPRI decode + filter ]
           ↓
    [ Sequence id check ]
           ↓
 [ Slot + filter index peek ]──→ [ Rx window statistics ]
           ↓
 [ uplink data flow | PRACH data flow ]
           ↓ validate against C-Plane context repository
           ↓ write decompressed REs into grid / PRACH buffer
    [ symbol complete? ]
           ↓
   [ symbol reorderer ]──→ [ UplaneRxSymbolNotifier ]
```

In parallel, the OTA symbol clock ticks a reception window checker
(early/on-time/late statistics) and a closed-window handler that
force-delivers partially filled grids once their reception deadline
has passed, so the upstream consumer always sees every symbol exactly
once, in ascending order, flagged valid or not.

The [`emulator`] module implements the inverse side: it receives DU
C-Plane messages and answers with pre-built User-Plane bursts whose
headers are restamped with the live slot, symbol and sequence id.

Ethernet NIC access, thread creation and the PHY are external
collaborators behind the [`ethernet`] and [`notifier`] traits; the
IQ codecs are pluggable behind [`compression::IqDecompressor`].
*/

pub mod bitmap;
pub mod closed_window;
pub mod compression;
pub mod config;
pub mod cplane;
pub mod ecpri;
pub mod emulator;
pub mod ethernet;
pub mod executor;
pub mod grid;
pub mod message;
pub mod metrics;
pub mod notifier;
pub mod prach;
pub mod prach_flow;
pub mod receiver;
pub mod reorder;
pub mod sequence_id;
pub mod slot;
pub mod uplane;
pub mod uplink_flow;
pub mod uplink_repo;
pub mod window;

/// Float type used. Usually f32, but not guaranteed.
pub type Float = f32;

/// Complex (I/Q) data.
pub type Complex = num_complex::Complex<Float>;

/// Fronthaul error.
///
/// Wire decoding errors are recovered locally by the receive pipeline
/// (the packet is dropped and a counter incremented); they only reach
/// the caller from the codec APIs directly. Configuration errors are
/// fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Frame too short or otherwise not decodable as Ethernet.
    #[error("malformed Ethernet frame: {0}")]
    MalformedFrame(&'static str),

    /// eCPRI header with wrong revision or the concatenation bit set.
    #[error("unsupported eCPRI packet: {0}")]
    UnsupportedEcpri(&'static str),

    /// eCPRI message type other than IQ data or real-time control.
    #[error("unknown eCPRI message type {0:#04x}")]
    UnknownEcpriType(u8),

    /// eAxC value not present in the configured lists.
    #[error("eAxC '{0}' is not configured in reception")]
    UnconfiguredEaxc(u16),

    /// User-Plane message could not be decoded.
    #[error("User-Plane decode: {0}")]
    UplaneDecode(String),

    /// Unsupported or unimplemented compression kind.
    #[error("unsupported compression: {0}")]
    UnsupportedCompression(String),

    /// Invalid configuration detected at startup.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A MAC address string that did not parse.
    #[error("invalid MAC address '{0}'")]
    InvalidMacAddress(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for fronthaul operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
pub mod tests {
    //! Test helper functions.
    use super::*;

    /// For testing, assert that two slices are almost equal.
    ///
    /// Floating point numbers are almost never exactly equal.
    pub fn assert_almost_equal_complex(left: &[Complex], right: &[Complex]) {
        assert_eq!(
            left.len(),
            right.len(),
            "\nleft: {:?}\nright: {:?}",
            left,
            right
        );
        for i in 0..left.len() {
            let dist = (left[i] - right[i]).norm_sqr().sqrt();
            if dist > 0.001 {
                assert_eq!(
                    left[i], right[i],
                    "\nElement {i}:\nleft: {:?}\nright: {:?}",
                    left, right
                );
            }
        }
    }
}
