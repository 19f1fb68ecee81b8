/*! Reception window classification.

The OTA symbol pacer publishes the symbol currently on the air; every
received message timestamp is compared against it. A message is
on-time when `distance(OTA, message)` in symbols falls inside
`[sym_start, sym_end]`, early below, late above. Distances run on the
mod-256-SFN symbol wheel so an SFN wrap never misclassifies.

Classification never gates processing: late and early packets still
flow through the pipeline, only the counters differ.
*/
use std::sync::atomic::{AtomicU32, Ordering};

use crate::metrics::{KpiCounter, ReceivedMessagesMetrics};
use crate::slot::{Scs, SlotSymbolPoint, wrap_distance};

/// Reception window expressed in symbol offsets from OTA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RxWindowTimingParameters {
    /// Offset to the earliest on-time symbol distance.
    pub sym_start: u32,
    /// Offset to the latest on-time symbol distance.
    pub sym_end: u32,
}

impl RxWindowTimingParameters {
    /// Converts a `[min, max]` microsecond window into symbol offsets.
    ///
    /// The near edge rounds up and the far edge rounds down, so the
    /// symbol window never extends beyond the configured times.
    pub fn from_window_us(min_us: f64, max_us: f64, scs: Scs) -> Self {
        let symbol_us = scs.symbol_duration_ns() / 1e3;
        Self {
            sym_start: (min_us / symbol_us).ceil() as u32,
            sym_end: (max_us / symbol_us).floor() as u32,
        }
    }
}

/// Classifies received messages as early, on-time or late.
pub struct RxWindowChecker {
    timing_parameters: RxWindowTimingParameters,
    is_disabled: bool,
    ota_raw: AtomicU32,
    on_time_counter: KpiCounter,
    early_counter: KpiCounter,
    late_counter: KpiCounter,
}

impl RxWindowChecker {
    /// Creates a checker. A disabled checker is a no-op.
    pub fn new(is_enabled: bool, timing_parameters: RxWindowTimingParameters) -> Self {
        Self {
            timing_parameters,
            is_disabled: !is_enabled,
            ota_raw: AtomicU32::new(0),
            on_time_counter: KpiCounter::new(),
            early_counter: KpiCounter::new(),
            late_counter: KpiCounter::new(),
        }
    }

    /// True when the checker does nothing.
    pub fn disabled(&self) -> bool {
        self.is_disabled
    }

    /// Publishes the OTA symbol; called once per symbol boundary.
    pub fn on_new_symbol(&self, symbol_point: SlotSymbolPoint) {
        if self.is_disabled {
            return;
        }
        // The OFH raw value restricts the SFN to its wire width.
        self.ota_raw.store(symbol_point.ofh_raw(), Ordering::Relaxed);
    }

    /// Classifies one received message timestamp.
    pub fn update_rx_window_statistics(&self, symbol_point: SlotSymbolPoint) {
        if self.is_disabled {
            return;
        }
        // One load so early and late use the same OTA value.
        let ota_raw = self.ota_raw.load(Ordering::Relaxed);
        let diff = wrap_distance(
            i64::from(ota_raw) - i64::from(symbol_point.ofh_raw()),
            i64::from(symbol_point.ofh_period()),
        );

        if diff > self.timing_parameters.sym_end as i32 {
            self.late_counter.increment();
            return;
        }
        if diff < self.timing_parameters.sym_start as i32 {
            self.early_counter.increment();
            return;
        }
        self.on_time_counter.increment();
    }

    /// Total messages classified on time.
    pub fn nof_on_time_messages(&self) -> u64 {
        self.on_time_counter.value()
    }

    /// Total messages classified early.
    pub fn nof_early_messages(&self) -> u64 {
        self.early_counter.value()
    }

    /// Total messages classified late.
    pub fn nof_late_messages(&self) -> u64 {
        self.late_counter.value()
    }

    /// Metrics accumulated since the previous collection.
    pub fn collect_metrics(&self) -> ReceivedMessagesMetrics {
        ReceivedMessagesMetrics {
            nof_on_time_messages: self.on_time_counter.collect(),
            nof_early_messages: self.early_counter.collect(),
            nof_late_messages: self.late_counter.collect(),
        }
    }

    /// The configured window.
    pub fn timing_parameters(&self) -> RxWindowTimingParameters {
        self.timing_parameters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slot::{Scs, SlotPoint};

    fn point(sfn: u32, slot: u32, symbol: u8) -> SlotSymbolPoint {
        SlotSymbolPoint::new(SlotPoint::new(Scs::Khz30, sfn, slot), symbol, 14)
    }

    fn checker() -> RxWindowChecker {
        RxWindowChecker::new(
            true,
            RxWindowTimingParameters {
                sym_start: 2,
                sym_end: 10,
            },
        )
    }

    #[test]
    fn window_from_microseconds() {
        // 30 kHz symbol is about 35.7 us. Ta4 window [50, 300] us
        // becomes [ceil(1.4), floor(8.4)] symbols.
        let params = RxWindowTimingParameters::from_window_us(50.0, 300.0, Scs::Khz30);
        assert_eq!(params.sym_start, 2);
        assert_eq!(params.sym_end, 8);
    }

    #[test]
    fn classifies_on_time_early_late() {
        let c = checker();
        c.on_new_symbol(point(0, 1, 0));

        // distance(OTA, msg) = 5: inside [2, 10].
        c.update_rx_window_statistics(point(0, 0, 9));
        assert_eq!(c.nof_on_time_messages(), 1);

        // distance 0: ahead of the window start.
        c.update_rx_window_statistics(point(0, 1, 0));
        assert_eq!(c.nof_early_messages(), 1);

        // distance 14: beyond the window end.
        c.update_rx_window_statistics(point(0, 0, 0));
        assert_eq!(c.nof_late_messages(), 1);
        assert_eq!(c.nof_on_time_messages(), 1);
    }

    #[test]
    fn window_edges_are_on_time() {
        let c = checker();
        c.on_new_symbol(point(0, 1, 0));
        c.update_rx_window_statistics(point(0, 0, 12)); // distance 2
        c.update_rx_window_statistics(point(0, 0, 4)); // distance 10
        assert_eq!(c.nof_on_time_messages(), 2);
    }

    #[test]
    fn sfn_wrap_does_not_misclassify() {
        let c = checker();
        // OTA just wrapped to SFN 0; message stamped at the end of the
        // wire SFN range is 3 symbols in the past: on time.
        c.on_new_symbol(point(0, 0, 2));
        c.update_rx_window_statistics(point(255, 19, 13));
        assert_eq!(c.nof_on_time_messages(), 1);
        assert_eq!(c.nof_late_messages(), 0);
    }

    #[test]
    fn internal_sfn_above_wire_range_matches_alias() {
        let c = checker();
        // Pacer runs on the internal 10-bit SFN; 256 aliases to 0.
        c.on_new_symbol(SlotSymbolPoint::new(
            SlotPoint::new(Scs::Khz30, 256, 0),
            5,
            14,
        ));
        c.update_rx_window_statistics(point(0, 0, 0));
        assert_eq!(c.nof_on_time_messages(), 1);
    }

    #[test]
    fn disabled_checker_counts_nothing() {
        let c = RxWindowChecker::new(false, RxWindowTimingParameters::default());
        c.on_new_symbol(point(0, 1, 0));
        c.update_rx_window_statistics(point(0, 0, 0));
        assert_eq!(c.nof_on_time_messages(), 0);
        assert_eq!(c.nof_early_messages(), 0);
        assert_eq!(c.nof_late_messages(), 0);
    }

    #[test]
    fn collect_metrics_reports_deltas() {
        let c = checker();
        c.on_new_symbol(point(0, 1, 0));
        c.update_rx_window_statistics(point(0, 0, 9));
        let metrics = c.collect_metrics();
        assert_eq!(metrics.nof_on_time_messages, 1);
        let metrics = c.collect_metrics();
        assert_eq!(metrics.nof_on_time_messages, 0);
    }
}
