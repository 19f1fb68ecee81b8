/*! Uplink resource grids.

A resource grid holds the IQ samples of one slot: ports × symbols ×
subcarriers. The PHY produces an empty grid when it requests uplink
reception; the receive path fills it in symbol by symbol and ownership
of the filled symbols moves upstream through the notifier exactly
once.

Grids are shared between the per-symbol repository entries of a slot,
so the handle is reference counted with the sample storage behind a
mutex: many writers while the slot is live, a single mover when each
symbol is delivered.
*/
use std::sync::{Arc, Mutex};

use crate::Complex;
use crate::slot::SlotPoint;

/// IQ sample storage for one slot.
pub struct ResourceGrid {
    nof_ports: usize,
    nof_symbols: usize,
    nof_subcarriers: usize,
    data: Vec<Complex>,
}

impl ResourceGrid {
    /// Creates an all-zero grid.
    pub fn new(nof_ports: usize, nof_symbols: usize, nof_subcarriers: usize) -> Self {
        Self {
            nof_ports,
            nof_symbols,
            nof_subcarriers,
            data: vec![Complex::default(); nof_ports * nof_symbols * nof_subcarriers],
        }
    }

    /// Number of antenna ports.
    pub fn nof_ports(&self) -> usize {
        self.nof_ports
    }

    /// Number of OFDM symbols.
    pub fn nof_symbols(&self) -> usize {
        self.nof_symbols
    }

    /// Number of subcarriers per symbol.
    pub fn nof_subcarriers(&self) -> usize {
        self.nof_subcarriers
    }

    fn offset(&self, port: usize, symbol: usize) -> usize {
        debug_assert!(port < self.nof_ports && symbol < self.nof_symbols);
        (port * self.nof_symbols + symbol) * self.nof_subcarriers
    }

    /// Copies `iq` into the given port/symbol starting at `start_re`.
    pub fn write(&mut self, port: usize, symbol: usize, start_re: usize, iq: &[Complex]) {
        let base = self.offset(port, symbol) + start_re;
        self.data[base..base + iq.len()].copy_from_slice(iq);
    }

    /// Read view of one port/symbol.
    pub fn view(&self, port: usize, symbol: usize) -> &[Complex] {
        let base = self.offset(port, symbol);
        &self.data[base..base + self.nof_subcarriers]
    }
}

/// Reference-counted handle to a [`ResourceGrid`].
pub type SharedResourceGrid = Arc<Mutex<ResourceGrid>>;

/// Creates a shared all-zero grid.
pub fn new_shared_grid(
    nof_ports: usize,
    nof_symbols: usize,
    nof_subcarriers: usize,
) -> SharedResourceGrid {
    Arc::new(Mutex::new(ResourceGrid::new(
        nof_ports,
        nof_symbols,
        nof_subcarriers,
    )))
}

/// Identifies the reception request a grid belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceGridContext {
    /// Slot the grid was requested for.
    pub slot: SlotPoint,
    /// Radio sector identifier.
    pub sector: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slot::Scs;

    #[test]
    fn write_then_view() {
        let mut grid = ResourceGrid::new(2, 14, 51 * 12);
        let iq = vec![Complex::new(1.0, -1.0); 12];
        grid.write(1, 3, 24, &iq);
        let view = grid.view(1, 3);
        assert_eq!(view[23], Complex::default());
        assert_eq!(view[24], Complex::new(1.0, -1.0));
        assert_eq!(view[35], Complex::new(1.0, -1.0));
        assert_eq!(view[36], Complex::default());
        // Other ports untouched.
        assert_eq!(grid.view(0, 3)[24], Complex::default());
    }

    #[test]
    fn shared_grid_clones_point_at_same_storage() {
        let grid = new_shared_grid(1, 14, 12);
        let other = Arc::clone(&grid);
        grid.lock().unwrap().write(0, 0, 0, &[Complex::new(2.0, 0.0)]);
        assert_eq!(other.lock().unwrap().view(0, 0)[0], Complex::new(2.0, 0.0));
        let _ = ResourceGridContext {
            slot: SlotPoint::new(Scs::Khz30, 0, 0),
            sector: 0,
        };
    }
}
