//! Upstream notification seam.
//!
//! The PHY (or any other consumer) receives completed symbols and
//! PRACH windows through this trait. Uplink symbols arrive in strict
//! ascending order per slot, each exactly once; `is_valid == false`
//! flags a partial delivery forced by the closed-window handler.

use crate::grid::SharedResourceGrid;
use crate::prach::{PrachBufferContext, SharedPrachBuffer};
use crate::slot::SlotPoint;

/// Identifies one delivered uplink symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UplaneRxSymbolContext {
    /// Slot of the delivered symbol.
    pub slot: SlotPoint,
    /// Symbol index within the slot.
    pub symbol: u8,
    /// Radio sector identifier.
    pub sector: u32,
}

/// Receives decoded User-Plane reception results.
pub trait UplaneRxSymbolNotifier: Send + Sync {
    /// Notifies one uplink symbol.
    ///
    /// Called in ascending symbol order per slot. `is_valid == false`
    /// means the reception window closed before every RE arrived.
    fn on_new_uplink_symbol(
        &self,
        context: &UplaneRxSymbolContext,
        grid: SharedResourceGrid,
        is_valid: bool,
    );

    /// Notifies one complete PRACH window.
    fn on_new_prach_window_data(&self, context: &PrachBufferContext, buffer: SharedPrachBuffer);
}
