/*! Uplink Control-Plane scheduling context repository.

When the transmitter encodes an uplink C-Plane message (or, on the RU
emulator side, when one arrives), the scheduling parameters it carried
are published here so the User-Plane receive path can validate every
incoming IQ packet against them.

The whole record packs into a single `u64`, so publishing is one
atomic store and the real-time reader never takes a lock.
*/
use std::sync::atomic::{AtomicU64, Ordering};

use crate::message::{FilterIndex, MAX_SUPPORTED_EAXC_ID_VALUE};
use crate::slot::{NOF_SUBFRAMES_PER_FRAME, SFN_WIRE_MAX, Scs, SlotPoint};

/// Calculates the size of a slot-indexed repository.
///
/// Returns the smallest value `>= minimum` that divides the total
/// number of slots on the mod-256-SFN wheel, so that slot points a
/// whole wheel apart share an index and closer points never collide.
pub fn repository_size(scs: Scs, minimum: usize) -> usize {
    let total = (SFN_WIRE_MAX * NOF_SUBFRAMES_PER_FRAME * scs.nof_slots_per_subframe()) as usize;
    let mut size = minimum.clamp(1, total);
    while total % size != 0 {
        size += 1;
    }
    size
}

/// Repository index for the given slot.
pub fn repository_index(slot: SlotPoint, size: usize) -> usize {
    slot.ofh_system_slot() as usize % size
}

/// The scheduling record an uplink C-Plane message installs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UlCplaneContext {
    /// Filter index the U-Plane traffic must match.
    pub filter_index: FilterIndex,
    /// First scheduled symbol.
    pub start_symbol: u8,
    /// First scheduled PRB.
    pub prb_start: u16,
    /// Number of scheduled PRBs.
    pub nof_prb: u16,
    /// Number of scheduled symbols.
    pub nof_symbols: u8,
}

impl UlCplaneContext {
    /// Packs the record into one 64-bit word.
    pub fn pack(&self) -> u64 {
        u64::from(self.filter_index.to_wire())
            | u64::from(self.start_symbol) << 8
            | u64::from(self.prb_start) << 16
            | u64::from(self.nof_prb) << 32
            | u64::from(self.nof_symbols) << 48
    }

    /// Unpacks a record packed by [`pack`](Self::pack).
    pub fn unpack(data: u64) -> Self {
        Self {
            filter_index: FilterIndex::from_wire(data as u8),
            start_symbol: (data >> 8) as u8,
            prb_start: (data >> 16) as u16,
            nof_prb: (data >> 32) as u16,
            nof_symbols: (data >> 48) as u8,
        }
    }

    /// True when `symbol` falls inside the scheduled symbol range.
    pub fn contains_symbol(&self, symbol: u8) -> bool {
        symbol >= self.start_symbol
            && u16::from(symbol) < u16::from(self.start_symbol) + u16::from(self.nof_symbols)
    }
}

/// Lock-free slot × eAxC store of uplink C-Plane contexts.
///
/// PUSCH and PRACH traffic use two distinct instances.
pub struct UlCplaneContextRepository {
    entries: Vec<[AtomicU64; MAX_SUPPORTED_EAXC_ID_VALUE as usize]>,
}

impl UlCplaneContextRepository {
    /// Creates a repository of the given size (see [`repository_size`]).
    pub fn new(size: usize) -> Self {
        Self {
            entries: (0..size)
                .map(|_| std::array::from_fn(|_| AtomicU64::new(0)))
                .collect(),
        }
    }

    fn entry(&self, slot: SlotPoint, eaxc: u16) -> &AtomicU64 {
        let index = repository_index(slot, self.entries.len());
        &self.entries[index][usize::from(eaxc)]
    }

    /// Publishes a context for the given slot and eAxC.
    pub fn add(&self, slot: SlotPoint, eaxc: u16, context: UlCplaneContext) {
        self.entry(slot, eaxc).store(context.pack(), Ordering::Release);
    }

    /// Reads the context stored for the given slot and eAxC.
    pub fn get(&self, slot: SlotPoint, eaxc: u16) -> UlCplaneContext {
        UlCplaneContext::unpack(self.entry(slot, eaxc).load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_is_a_divisor() {
        // 30 kHz: 256 * 10 * 2 = 5120 slots on the wheel.
        assert_eq!(repository_size(Scs::Khz30, 10), 10);
        assert_eq!(repository_size(Scs::Khz30, 13), 16);
        assert_eq!(repository_size(Scs::Khz30, 17), 20);
        assert_eq!(repository_size(Scs::Khz15, 11), 16);
    }

    #[test]
    fn index_distinguishes_near_slots() {
        let size = repository_size(Scs::Khz30, 10);
        let base = SlotPoint::new(Scs::Khz30, 3, 7);
        let base_index = repository_index(base, size);
        for d in 1..size as u32 {
            assert_ne!(
                repository_index(base.plus_slots(d), size),
                base_index,
                "collision at distance {d}"
            );
        }
        assert_eq!(repository_index(base.plus_slots(size as u32), size), base_index);
    }

    #[test]
    fn index_ignores_high_sfn_bits() {
        let size = repository_size(Scs::Khz30, 10);
        let a = SlotPoint::new(Scs::Khz30, 5, 3);
        let b = SlotPoint::new(Scs::Khz30, 5 + 256, 3);
        assert_eq!(repository_index(a, size), repository_index(b, size));
    }

    #[test]
    fn pack_round_trip() {
        for filter in [
            FilterIndex::Standard,
            FilterIndex::PrachPreambleLong,
            FilterIndex::PrachPreambleShort,
            FilterIndex::Reserved,
        ] {
            for (start_symbol, prb_start, nof_prb, nof_symbols) in
                [(0, 0, 51, 14), (2, 10, 20, 1), (13, 272, 273, 1), (0, 0, 0, 0)]
            {
                let context = UlCplaneContext {
                    filter_index: filter,
                    start_symbol,
                    prb_start,
                    nof_prb,
                    nof_symbols,
                };
                assert_eq!(UlCplaneContext::unpack(context.pack()), context);
            }
        }
    }

    #[test]
    fn add_then_get() {
        let repo = UlCplaneContextRepository::new(repository_size(Scs::Khz30, 10));
        let slot = SlotPoint::from_parts(Scs::Khz30, 0, 0, 1);
        let context = UlCplaneContext {
            filter_index: FilterIndex::Standard,
            start_symbol: 0,
            prb_start: 0,
            nof_prb: 51,
            nof_symbols: 14,
        };
        repo.add(slot, 4, context);
        assert_eq!(repo.get(slot, 4), context);
        // Other eAxC untouched.
        assert_eq!(repo.get(slot, 5), UlCplaneContext::default());
    }

    #[test]
    fn empty_entry_matches_nothing() {
        let repo = UlCplaneContextRepository::new(10);
        let slot = SlotPoint::from_parts(Scs::Khz30, 1, 2, 0);
        let context = repo.get(slot, 0);
        assert_eq!(context.nof_symbols, 0);
        assert!(!context.contains_symbol(0));
    }

    #[test]
    fn symbol_range_check() {
        let context = UlCplaneContext {
            filter_index: FilterIndex::Standard,
            start_symbol: 2,
            prb_start: 0,
            nof_prb: 51,
            nof_symbols: 3,
        };
        assert!(!context.contains_symbol(1));
        assert!(context.contains_symbol(2));
        assert!(context.contains_symbol(4));
        assert!(!context.contains_symbol(5));
    }
}
