/*! Uplink resource-grid context repository.

One entry per (slot index, symbol). The PHY binds a shared grid to a
slot with [`add`](UplinkContextRepository::add); the User-Plane data
flow writes decompressed REs into it and tracks coverage in per-port
bitmaps; a symbol whose bitmaps are full is popped by the data flow,
and the closed-window handler pops whatever is left when the reception
deadline passes.

Inserts are deferred: `add` only enqueues, and the OTA symbol pacer
drains the queue through
[`process_pending`](UplinkContextRepository::process_pending). This
keeps the PHY thread from contending on the repository mutex with the
real-time decode path.
*/
use std::collections::VecDeque;
use std::ops::Range;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use log::warn;

use crate::Complex;
use crate::bitmap::BitMap;
use crate::cplane::repository_index;
use crate::grid::{ResourceGridContext, SharedResourceGrid};
use crate::slot::{MAX_NSYMB_PER_SLOT, SlotPoint};

/// One slot-symbol's share of an uplink reception request.
struct UplinkContext {
    symbol: u8,
    context: ResourceGridContext,
    grid: SharedResourceGrid,
    /// REs written so far, one bitmap per port.
    re_written: Vec<BitMap>,
}

impl UplinkContext {
    fn new(symbol: u8, context: ResourceGridContext, grid: SharedResourceGrid) -> Self {
        let (nof_ports, nof_subc) = {
            let g = grid.lock().unwrap();
            (g.nof_ports(), g.nof_subcarriers())
        };
        Self {
            symbol,
            context,
            grid,
            re_written: (0..nof_ports).map(|_| BitMap::new(nof_subc)).collect(),
        }
    }

    fn write(&mut self, port: usize, start_re: usize, iq: &[Complex]) {
        // Skip writing if the given port does not fit in the grid.
        if port >= self.re_written.len() {
            return;
        }
        self.grid
            .lock()
            .unwrap()
            .write(port, usize::from(self.symbol), start_re, iq);
        self.re_written[port].fill(start_re, start_re + iq.len());
    }

    fn is_complete(&self) -> bool {
        self.re_written.iter().all(|port| port.all())
    }
}

/// A grid handle popped out of the repository.
pub struct PoppedGridSymbol {
    /// The reception request the grid belongs to.
    pub context: ResourceGridContext,
    /// The grid itself.
    pub grid: SharedResourceGrid,
}

struct PendingAdd {
    context: ResourceGridContext,
    grid: SharedResourceGrid,
    symbols: Range<usize>,
}

/// Slot × symbol repository of uplink contexts.
pub struct UplinkContextRepository {
    pending: Mutex<VecDeque<PendingAdd>>,
    pending_capacity: usize,
    entries: Mutex<Vec<[Option<UplinkContext>; MAX_NSYMB_PER_SLOT]>>,
    running: AtomicBool,
}

impl UplinkContextRepository {
    /// Creates a repository of the given size (see
    /// [`crate::cplane::repository_size`]).
    pub fn new(size: usize) -> Self {
        Self {
            pending: Mutex::new(VecDeque::with_capacity(size)),
            pending_capacity: size,
            entries: Mutex::new(
                (0..size)
                    .map(|_| std::array::from_fn(|_| None))
                    .collect(),
            ),
            running: AtomicBool::new(true),
        }
    }

    /// Enqueues binding `grid` to every symbol in `symbols` of the
    /// request's slot. The binding happens on the next
    /// [`process_pending`](Self::process_pending).
    pub fn add(&self, context: ResourceGridContext, grid: SharedResourceGrid, symbols: Range<usize>) {
        // Do not accept new entries when the repository was cleared.
        if !self.running.load(Ordering::Relaxed) {
            return;
        }
        let mut pending = self.pending.lock().unwrap();
        if pending.len() >= self.pending_capacity {
            warn!("Failed to enqueue uplink context for slot '{}'", context.slot);
            return;
        }
        pending.push_back(PendingAdd {
            context,
            grid,
            symbols,
        });
    }

    /// Executes the enqueued insertions.
    pub fn process_pending(&self) {
        loop {
            let task = { self.pending.lock().unwrap().pop_front() };
            let Some(task) = task else {
                return;
            };
            let mut entries = self.entries.lock().unwrap();
            let index = repository_index(task.context.slot, entries.len());
            for symbol in task.symbols.clone() {
                entries[index][symbol] = Some(UplinkContext::new(
                    symbol as u8,
                    task.context,
                    SharedResourceGrid::clone(&task.grid),
                ));
            }
        }
    }

    /// Writes REs into the grid bound to (slot, symbol).
    ///
    /// Returns false when no context is bound there.
    pub fn write(
        &self,
        slot: SlotPoint,
        port: usize,
        symbol: usize,
        start_re: usize,
        iq: &[Complex],
    ) -> bool {
        let mut entries = self.entries.lock().unwrap();
        let index = repository_index(slot, entries.len());
        match &mut entries[index][symbol] {
            Some(entry) => {
                entry.write(port, start_re, iq);
                true
            }
            None => false,
        }
    }

    /// Pops the grid for (slot, symbol) if every port's bitmap is full.
    pub fn try_pop_complete(&self, slot: SlotPoint, symbol: usize) -> Option<PoppedGridSymbol> {
        let mut entries = self.entries.lock().unwrap();
        let index = repository_index(slot, entries.len());
        let complete = entries[index][symbol]
            .as_ref()
            .is_some_and(|entry| entry.is_complete());
        if !complete {
            return None;
        }
        entries[index][symbol].take().map(|entry| PoppedGridSymbol {
            context: entry.context,
            grid: entry.grid,
        })
    }

    /// Unconditionally pops whatever is bound to (slot, symbol).
    pub fn pop(&self, slot: SlotPoint, symbol: usize) -> Option<PoppedGridSymbol> {
        let mut entries = self.entries.lock().unwrap();
        let index = repository_index(slot, entries.len());
        entries[index][symbol].take().map(|entry| PoppedGridSymbol {
            context: entry.context,
            grid: entry.grid,
        })
    }

    /// Stops further inserts and clears every entry.
    pub fn clear(&self) {
        self.running.store(false, Ordering::Relaxed);
        self.pending.lock().unwrap().clear();
        let mut entries = self.entries.lock().unwrap();
        for slot in entries.iter_mut() {
            for symbol in slot.iter_mut() {
                *symbol = None;
            }
        }
    }
}
