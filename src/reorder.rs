/*! In-order delivery of received uplink symbols.

Symbol completions can surface out of order: packets reorder on the
wire, and the closed-window handler force-delivers overdue symbols
while fresher ones are still arriving. Upstream consumers want strict
ascending order, so every delivery goes through a per-slot state word
that buffers early arrivals and releases contiguous runs.

The whole per-slot state fits one `AtomicU32`:

```text
 bits  0..13  received bitmap, one bit per symbol
 bit   14     extended cyclic prefix flag
 bit   15     slot-in-use flag
 bits 16..29  per-symbol validity bitmap
```

One `fetch_or` both records an arrival and decides whether it
unblocked a run of symbols, so the repository never takes a lock.
*/
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::grid::SharedResourceGrid;
use crate::notifier::{UplaneRxSymbolContext, UplaneRxSymbolNotifier};
use crate::prach::{PrachBufferContext, SharedPrachBuffer};
use crate::slot::{CyclicPrefix, MAX_NSYMB_PER_SLOT, SlotPoint};

const VALID_BITMAP_START_BIT: u32 = 16;
const EXTENDED_CP_BIT: u32 = 14;
const USED_SLOT_BIT: u32 = 15;
const USED_SLOT_MASK: u32 = 1 << USED_SLOT_BIT;
const EXTENDED_CP_MASK: u32 = 1 << EXTENDED_CP_BIT;

/// Symbols releasable after one arrival.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolsToNotify {
    /// Contiguous run of symbols to deliver, ascending.
    pub symbols: std::ops::Range<u8>,
    /// Validity bitmap over all symbols of the slot.
    validity: u16,
}

impl SymbolsToNotify {
    /// True when `symbol` was delivered with valid data.
    pub fn is_valid(&self, symbol: u8) -> bool {
        (self.validity >> symbol) & 1 != 0
    }
}

/// Per-slot bookkeeping of which symbols were notified upstream.
pub struct NotifiedGridSymbolRepository {
    entries: Vec<AtomicU32>,
}

impl NotifiedGridSymbolRepository {
    /// Creates a repository of the given size (see
    /// [`crate::cplane::repository_size`]).
    pub fn new(size: usize) -> Self {
        Self {
            entries: (0..size).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    fn entry(&self, slot: SlotPoint) -> &AtomicU32 {
        &self.entries[crate::cplane::repository_index(slot, self.entries.len())]
    }

    /// Marks a slot as in use, expecting symbols from `start_symbol` on.
    ///
    /// Symbols below `start_symbol` are pre-marked as received so they
    /// never gate delivery; used for special slots whose uplink part
    /// starts mid-slot.
    pub fn add(&self, slot: SlotPoint, start_symbol: u8, cp: CyclicPrefix) {
        debug_assert!(usize::from(start_symbol) < MAX_NSYMB_PER_SLOT);
        let mut value = USED_SLOT_MASK;
        if cp == CyclicPrefix::Extended {
            value |= EXTENDED_CP_MASK;
        }
        value |= (1u32 << start_symbol) - 1;
        self.entry(slot).store(value, Ordering::Release);
    }

    /// Records the arrival of `symbol` and computes what to release.
    ///
    /// Returns `None` when the slot was never added, or when an
    /// earlier symbol is still missing. Otherwise returns the run of
    /// symbols unblocked by this arrival; each symbol of a slot
    /// appears in exactly one returned run.
    pub fn update(&self, slot: SlotPoint, symbol: u8, is_valid: bool) -> Option<SymbolsToNotify> {
        debug_assert!(usize::from(symbol) < MAX_NSYMB_PER_SLOT);

        let mut mask = 1u32 << symbol;
        if is_valid {
            mask |= 1u32 << (u32::from(symbol) + VALID_BITMAP_START_BIT);
        }

        let prev = self.entry(slot).fetch_or(mask, Ordering::AcqRel);

        if prev & USED_SLOT_MASK == 0 {
            // Arrival for a slot that was never added; ignore.
            return None;
        }

        if any_previous_symbol_missing(prev, symbol) {
            return None;
        }

        let run = nof_symbols_to_notify(prev, symbol);
        let value = prev | mask;

        if all_symbols_notified(value) {
            // Ready for the next wheel turn.
            self.entry(slot).store(0, Ordering::Release);
        }

        Some(SymbolsToNotify {
            symbols: symbol..symbol + run,
            validity: (value >> VALID_BITMAP_START_BIT) as u16,
        })
    }
}

fn nof_symbols_per_cp(value: u32) -> u8 {
    if value & EXTENDED_CP_MASK != 0 {
        CyclicPrefix::Extended.nof_symbols() as u8
    } else {
        CyclicPrefix::Normal.nof_symbols() as u8
    }
}

fn any_previous_symbol_missing(value: u32, symbol: u8) -> bool {
    (0..symbol).any(|i| (value >> i) & 1 == 0)
}

fn all_symbols_notified(value: u32) -> bool {
    let full = (1u32 << nof_symbols_per_cp(value)) - 1;
    value & full == full
}

/// Length of the contiguous received run starting at `symbol`.
///
/// Works on the pre-update value; the arriving symbol's own bit is
/// taken as set.
fn nof_symbols_to_notify(value: u32, symbol: u8) -> u8 {
    let run_limit = nof_symbols_per_cp(value).saturating_sub(symbol);
    let shifted = value >> symbol;
    for i in 1..run_limit {
        if (shifted >> i) & 1 == 0 {
            return i;
        }
    }
    run_limit
}

/// Notifier decorator that releases symbols in ascending order.
///
/// Both the data-flow completions (valid) and the closed-window
/// deliveries (invalid) pass through here, so a late-but-complete
/// symbol cannot overtake a forced one. PRACH windows are delivered
/// whole and pass straight through.
pub struct RxSymbolReorderer {
    notifier: Arc<dyn UplaneRxSymbolNotifier>,
    repo: Arc<NotifiedGridSymbolRepository>,
}

impl RxSymbolReorderer {
    /// Creates the decorator in front of `notifier`.
    pub fn new(
        notifier: Arc<dyn UplaneRxSymbolNotifier>,
        repo: Arc<NotifiedGridSymbolRepository>,
    ) -> Self {
        Self { notifier, repo }
    }

    /// Access to the underlying symbol repository, for slot set-up.
    pub fn symbol_repository(&self) -> &Arc<NotifiedGridSymbolRepository> {
        &self.repo
    }
}

impl UplaneRxSymbolNotifier for RxSymbolReorderer {
    fn on_new_uplink_symbol(
        &self,
        context: &UplaneRxSymbolContext,
        grid: SharedResourceGrid,
        is_valid: bool,
    ) {
        let Some(run) = self.repo.update(context.slot, context.symbol, is_valid) else {
            return;
        };
        for symbol in run.symbols.clone() {
            let new_context = UplaneRxSymbolContext {
                slot: context.slot,
                symbol,
                sector: context.sector,
            };
            self.notifier.on_new_uplink_symbol(
                &new_context,
                SharedResourceGrid::clone(&grid),
                run.is_valid(symbol),
            );
        }
    }

    fn on_new_prach_window_data(&self, context: &PrachBufferContext, buffer: SharedPrachBuffer) {
        // PRACH notifies all symbols at once, nothing to reorder.
        self.notifier.on_new_prach_window_data(context, buffer);
    }
}
