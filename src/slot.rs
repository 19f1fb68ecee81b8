/*! Slot and symbol points on the 5G NR timing wheel.

All Open Fronthaul scheduling state is indexed by a point in time
expressed as (SFN, subframe, slot, symbol). Internally the SFN counts
modulo 1024, but the OFH wire format only carries its low 8 bits, so
distances between two points seen on the wire are computed on the
smaller mod-256-SFN group. Wrap-around is resolved to the half-period:
a distance is always in `[-period/2, period/2)`.
*/
use serde::{Deserialize, Serialize};

/// Number of subframes per 10 ms frame.
pub const NOF_SUBFRAMES_PER_FRAME: u32 = 10;

/// Number of system frame numbers before the internal counter wraps.
pub const NOF_SFNS: u32 = 1024;

/// SFN values representable on the Open Fronthaul wire (one octet).
pub const SFN_WIRE_MAX: u32 = 256;

/// Maximum number of OFDM symbols in a slot (normal cyclic prefix).
pub const MAX_NSYMB_PER_SLOT: usize = 14;

/// Number of OFDM symbols in a slot with extended cyclic prefix.
pub const NSYMB_PER_SLOT_EXT_CP: usize = 12;

/// Cyclic prefix type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CyclicPrefix {
    /// Normal cyclic prefix, 14 symbols per slot.
    #[default]
    Normal,
    /// Extended cyclic prefix, 12 symbols per slot.
    Extended,
}

impl CyclicPrefix {
    /// Number of OFDM symbols per slot for this cyclic prefix.
    pub fn nof_symbols(&self) -> usize {
        match self {
            CyclicPrefix::Normal => MAX_NSYMB_PER_SLOT,
            CyclicPrefix::Extended => NSYMB_PER_SLOT_EXT_CP,
        }
    }
}

/// Subcarrier spacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Scs {
    /// 15 kHz, numerology 0.
    #[serde(rename = "15kHz")]
    Khz15,
    /// 30 kHz, numerology 1.
    #[default]
    #[serde(rename = "30kHz")]
    Khz30,
    /// 60 kHz, numerology 2.
    #[serde(rename = "60kHz")]
    Khz60,
    /// 120 kHz, numerology 3.
    #[serde(rename = "120kHz")]
    Khz120,
}

impl Scs {
    /// The numerology µ, as defined in TS 38.211.
    pub fn numerology(&self) -> u32 {
        match self {
            Scs::Khz15 => 0,
            Scs::Khz30 => 1,
            Scs::Khz60 => 2,
            Scs::Khz120 => 3,
        }
    }

    /// Subcarrier spacing in kHz.
    pub fn khz(&self) -> u32 {
        15 << self.numerology()
    }

    /// Number of slots in a 1 ms subframe.
    pub fn nof_slots_per_subframe(&self) -> u32 {
        1 << self.numerology()
    }

    /// Number of slots in a 10 ms frame.
    pub fn nof_slots_per_frame(&self) -> u32 {
        NOF_SUBFRAMES_PER_FRAME * self.nof_slots_per_subframe()
    }

    /// Average OFDM symbol duration in nanoseconds, assuming normal CP.
    pub fn symbol_duration_ns(&self) -> f64 {
        1e6 / (MAX_NSYMB_PER_SLOT as f64 * self.nof_slots_per_subframe() as f64)
    }
}

/// A (SFN, subframe, slot) tuple for a given numerology.
///
/// Stored as a flat slot count so arithmetic is plain modular
/// arithmetic on the `NOF_SFNS`-frame wheel.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SlotPoint {
    scs: Scs,
    count: u32,
}

impl SlotPoint {
    /// Creates a slot point from SFN and slot index within the frame.
    pub fn new(scs: Scs, sfn: u32, slot_index: u32) -> Self {
        debug_assert!(sfn < NOF_SFNS);
        debug_assert!(slot_index < scs.nof_slots_per_frame());
        Self {
            scs,
            count: sfn * scs.nof_slots_per_frame() + slot_index,
        }
    }

    /// Creates a slot point from SFN, subframe and slot within the subframe.
    pub fn from_parts(scs: Scs, sfn: u32, subframe: u32, slot: u32) -> Self {
        Self::new(scs, sfn, subframe * scs.nof_slots_per_subframe() + slot)
    }

    /// Creates a slot point from the wire tri-octet fields, checking ranges.
    ///
    /// The wire SFN is 8 bits; it maps to the same value internally.
    pub fn from_wire(scs: Scs, sfn: u8, subframe: u8, slot: u32) -> Option<Self> {
        if u32::from(subframe) >= NOF_SUBFRAMES_PER_FRAME || slot >= scs.nof_slots_per_subframe() {
            return None;
        }
        Some(Self::from_parts(scs, sfn.into(), subframe.into(), slot))
    }

    /// Subcarrier spacing of this point.
    pub fn scs(&self) -> Scs {
        self.scs
    }

    /// System frame number, `[0, 1024)`.
    pub fn sfn(&self) -> u32 {
        self.count / self.scs.nof_slots_per_frame()
    }

    /// Subframe index within the frame, `[0, 10)`.
    pub fn subframe_index(&self) -> u32 {
        self.slot_index() / self.scs.nof_slots_per_subframe()
    }

    /// Slot index within the frame.
    pub fn slot_index(&self) -> u32 {
        self.count % self.scs.nof_slots_per_frame()
    }

    /// Slot index within the subframe.
    pub fn subframe_slot_index(&self) -> u32 {
        self.count % self.scs.nof_slots_per_subframe()
    }

    /// Flat slot count since (SFN 0, slot 0).
    pub fn system_slot(&self) -> u32 {
        self.count
    }

    /// Total number of slots on the internal wheel.
    pub fn nof_slots_per_system_frame(&self) -> u32 {
        NOF_SFNS * self.scs.nof_slots_per_frame()
    }

    /// Flat slot count with the SFN restricted to its wire width.
    ///
    /// Repositories index by this value so that a point and its
    /// mod-256-SFN alias map to the same entry.
    pub fn ofh_system_slot(&self) -> u32 {
        (self.sfn() % SFN_WIRE_MAX) * self.scs.nof_slots_per_frame() + self.slot_index()
    }

    /// The point `n` slots later, wrapping on the internal wheel.
    pub fn plus_slots(&self, n: u32) -> Self {
        Self {
            scs: self.scs,
            count: (self.count + n) % self.nof_slots_per_system_frame(),
        }
    }

    /// The point `n` slots earlier, wrapping on the internal wheel.
    pub fn minus_slots(&self, n: u32) -> Self {
        let period = self.nof_slots_per_system_frame();
        Self {
            scs: self.scs,
            count: (self.count + period - (n % period)) % period,
        }
    }
}

impl std::fmt::Display for SlotPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}.{}", self.sfn(), self.slot_index())
    }
}

impl std::fmt::Debug for SlotPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "SlotPoint({}, sfn={}, slot={})",
            self.scs.khz(),
            self.sfn(),
            self.slot_index()
        )
    }
}

/// A slot point plus a symbol index within the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotSymbolPoint {
    slot: SlotPoint,
    symbol: u8,
    nof_symbols: u8,
}

impl SlotSymbolPoint {
    /// Creates a slot symbol point.
    pub fn new(slot: SlotPoint, symbol: u8, nof_symbols: u8) -> Self {
        debug_assert!(symbol < nof_symbols);
        Self {
            slot,
            symbol,
            nof_symbols,
        }
    }

    /// The slot part.
    pub fn slot(&self) -> SlotPoint {
        self.slot
    }

    /// The symbol index within the slot.
    pub fn symbol_index(&self) -> u8 {
        self.symbol
    }

    /// The number of symbols per slot this point counts with.
    pub fn nof_symbols(&self) -> u8 {
        self.nof_symbols
    }

    /// Flat symbol count with the SFN restricted to its wire width.
    pub fn ofh_raw(&self) -> u32 {
        self.slot.ofh_system_slot() * u32::from(self.nof_symbols) + u32::from(self.symbol)
    }

    /// Total number of symbols on the mod-256-SFN wheel.
    pub fn ofh_period(&self) -> u32 {
        SFN_WIRE_MAX * self.slot.scs().nof_slots_per_frame() * u32::from(self.nof_symbols)
    }

    /// Reconstructs a point from a raw mod-256-SFN symbol count.
    pub fn from_ofh_raw(scs: Scs, raw: u32, nof_symbols: u8) -> Self {
        let nsym = u32::from(nof_symbols);
        let slot_count = (raw / nsym) % (SFN_WIRE_MAX * scs.nof_slots_per_frame());
        Self {
            slot: SlotPoint {
                scs,
                count: slot_count,
            },
            symbol: (raw % nsym) as u8,
            nof_symbols,
        }
    }

    /// The point `n` symbols earlier, borrowing across slot boundaries.
    pub fn minus_symbols(&self, n: u32) -> Self {
        let nsym = u32::from(self.nof_symbols);
        let total = self.slot.system_slot() as u64 * u64::from(nsym) + u64::from(self.symbol);
        let period = self.slot.nof_slots_per_system_frame() as u64 * u64::from(nsym);
        let total = (total + period - u64::from(n) % period) % period;
        Self {
            slot: SlotPoint {
                scs: self.slot.scs(),
                count: (total / u64::from(nsym)) as u32,
            },
            symbol: (total % u64::from(nsym)) as u8,
            nof_symbols: self.nof_symbols,
        }
    }
}

impl std::fmt::Display for SlotSymbolPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}:{}", self.slot, self.symbol)
    }
}

/// Signed distance in symbols between two points on the mod-256-SFN wheel.
///
/// Both points must share numerology and symbols-per-slot. Positive
/// means `lhs` is ahead of `rhs`.
pub fn ofh_symbol_distance(lhs: SlotSymbolPoint, rhs: SlotSymbolPoint) -> i32 {
    debug_assert_eq!(lhs.slot.scs(), rhs.slot.scs());
    debug_assert_eq!(lhs.nof_symbols, rhs.nof_symbols);
    wrap_distance(
        lhs.ofh_raw() as i64 - rhs.ofh_raw() as i64,
        lhs.ofh_period() as i64,
    )
}

/// Resolves a raw difference to `[-period/2, period/2)`.
pub(crate) fn wrap_distance(diff: i64, period: i64) -> i32 {
    let half = period / 2;
    if diff >= half {
        (diff - period) as i32
    } else if diff < -half {
        (diff + period) as i32
    } else {
        diff as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_point_parts() {
        let sp = SlotPoint::from_parts(Scs::Khz30, 17, 3, 1);
        assert_eq!(sp.sfn(), 17);
        assert_eq!(sp.subframe_index(), 3);
        assert_eq!(sp.subframe_slot_index(), 1);
        assert_eq!(sp.slot_index(), 7);
        assert_eq!(format!("{sp}"), "17.7");
    }

    #[test]
    fn from_wire_rejects_bad_fields() {
        assert!(SlotPoint::from_wire(Scs::Khz30, 0, 10, 0).is_none());
        assert!(SlotPoint::from_wire(Scs::Khz30, 0, 0, 2).is_none());
        assert!(SlotPoint::from_wire(Scs::Khz15, 0, 9, 0).is_some());
        assert!(SlotPoint::from_wire(Scs::Khz60, 0, 0, 3).is_some());
    }

    #[test]
    fn slot_arithmetic_wraps() {
        let last = SlotPoint::new(Scs::Khz30, NOF_SFNS - 1, 19);
        assert_eq!(last.plus_slots(1), SlotPoint::new(Scs::Khz30, 0, 0));
        let first = SlotPoint::new(Scs::Khz30, 0, 0);
        assert_eq!(
            first.minus_slots(1),
            SlotPoint::new(Scs::Khz30, NOF_SFNS - 1, 19)
        );
    }

    #[test]
    fn symbol_point_minus_borrows() {
        let sp = SlotSymbolPoint::new(SlotPoint::new(Scs::Khz30, 2, 0), 1, 14);
        let back = sp.minus_symbols(3);
        assert_eq!(back.slot(), SlotPoint::new(Scs::Khz30, 1, 19));
        assert_eq!(back.symbol_index(), 12);
    }

    #[test]
    fn symbol_point_minus_wraps_sfn() {
        let sp = SlotSymbolPoint::new(SlotPoint::new(Scs::Khz30, 0, 0), 0, 14);
        let back = sp.minus_symbols(1);
        assert_eq!(back.slot().sfn(), NOF_SFNS - 1);
        assert_eq!(back.symbol_index(), 13);
    }

    #[test]
    fn distance_simple() {
        let a = SlotSymbolPoint::new(SlotPoint::new(Scs::Khz30, 0, 1), 2, 14);
        let b = SlotSymbolPoint::new(SlotPoint::new(Scs::Khz30, 0, 0), 13, 14);
        assert_eq!(ofh_symbol_distance(a, b), 3);
        assert_eq!(ofh_symbol_distance(b, a), -3);
    }

    #[test]
    fn distance_across_wire_sfn_wrap() {
        // A message stamped late in SFN 255 compared against an OTA point
        // just after the wire SFN wrapped to 0 must look slightly ahead,
        // not a whole period behind.
        let ota = SlotSymbolPoint::new(SlotPoint::new(Scs::Khz30, 0, 0), 1, 14);
        let msg = SlotSymbolPoint::new(SlotPoint::new(Scs::Khz30, 255, 19), 13, 14);
        assert_eq!(ofh_symbol_distance(ota, msg), 2);
    }

    #[test]
    fn distance_uses_wire_sfn_group() {
        // SFN 256 aliases to wire SFN 0.
        let a = SlotSymbolPoint::new(SlotPoint::new(Scs::Khz30, 256, 0), 0, 14);
        let b = SlotSymbolPoint::new(SlotPoint::new(Scs::Khz30, 0, 0), 0, 14);
        assert_eq!(ofh_symbol_distance(a, b), 0);
    }

    #[test]
    fn ofh_raw_round_trips() {
        let sp = SlotSymbolPoint::new(SlotPoint::new(Scs::Khz30, 300, 7), 5, 14);
        let raw = sp.ofh_raw();
        let back = SlotSymbolPoint::from_ofh_raw(Scs::Khz30, raw, 14);
        assert_eq!(back.slot().sfn(), 300 % SFN_WIRE_MAX);
        assert_eq!(back.slot().slot_index(), 7);
        assert_eq!(back.symbol_index(), 5);
    }

    #[test]
    fn scs_helpers() {
        assert_eq!(Scs::Khz30.nof_slots_per_subframe(), 2);
        assert_eq!(Scs::Khz30.nof_slots_per_frame(), 20);
        assert_eq!(Scs::Khz15.khz(), 15);
        assert_eq!(Scs::Khz120.numerology(), 3);
        let dur = Scs::Khz30.symbol_duration_ns();
        assert!((dur - 35714.28).abs() < 1.0);
    }
}
