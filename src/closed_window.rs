/*! Closed reception window handler.

The reception window is the only timeout in the pipeline: once the OTA
symbol clock has advanced `notification_delay_in_symbols` past a
symbol, nothing more is coming for it. This handler sweeps the uplink
and PRACH repositories on every OTA tick and force-delivers whatever
is still sitting there, flagged invalid, through the same reorderer
the happy path uses.

The delay is `nof_decoding_symbols + sym_end + 1`: the far edge of the
reception window plus the time budget for decoding a message that
arrived right at the edge.
*/
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, warn};

use crate::config::WarnUnreceivedFrames;
use crate::executor::TaskExecutor;
use crate::metrics::{ClosedRxWindowMetrics, KpiCounter};
use crate::notifier::{UplaneRxSymbolContext, UplaneRxSymbolNotifier};
use crate::prach::PrachContextRepository;
use crate::slot::SlotSymbolPoint;
use crate::uplink_repo::UplinkContextRepository;
use crate::window::RxWindowTimingParameters;

/// Closed reception window handler configuration.
#[derive(Debug, Clone, Copy)]
pub struct ClosedRxWindowHandlerConfig {
    /// Radio sector identifier.
    pub sector: u32,
    /// Symbols the decoder needs to process a message received at the
    /// window edge; delays closing by that much.
    pub nof_symbols_to_process_uplink: u32,
    /// Reception window parameters.
    pub rx_timing_params: RxWindowTimingParameters,
    /// Unreceived-frame warning policy.
    pub warn_unreceived_frames: WarnUnreceivedFrames,
}

/// Symbol-paced sweeper that force-delivers overdue reception state.
pub struct ClosedRxWindowHandler {
    notification_delay_in_symbols: u32,
    sector_id: u32,
    warn_unreceived_frames: WarnUnreceivedFrames,
    log_unreceived_messages: AtomicBool,
    executor: Arc<dyn TaskExecutor>,
    uplink_repo: Arc<UplinkContextRepository>,
    prach_repo: Arc<PrachContextRepository>,
    notifier: Arc<dyn UplaneRxSymbolNotifier>,
    nof_missed_uplink_symbols: KpiCounter,
    nof_missed_prach_contexts: KpiCounter,
    stop_requested: AtomicBool,
}

impl ClosedRxWindowHandler {
    /// Creates the handler. `notifier` is normally the symbol
    /// reorderer so forced deliveries stay ordered.
    pub fn new(
        config: ClosedRxWindowHandlerConfig,
        executor: Arc<dyn TaskExecutor>,
        uplink_repo: Arc<UplinkContextRepository>,
        prach_repo: Arc<PrachContextRepository>,
        notifier: Arc<dyn UplaneRxSymbolNotifier>,
    ) -> Self {
        Self {
            notification_delay_in_symbols: config.nof_symbols_to_process_uplink
                + config.rx_timing_params.sym_end
                + 1,
            sector_id: config.sector,
            warn_unreceived_frames: config.warn_unreceived_frames,
            log_unreceived_messages: AtomicBool::new(
                config.warn_unreceived_frames == WarnUnreceivedFrames::Always,
            ),
            executor,
            uplink_repo,
            prach_repo,
            notifier,
            nof_missed_uplink_symbols: KpiCounter::new(),
            nof_missed_prach_contexts: KpiCounter::new(),
            stop_requested: AtomicBool::new(false),
        }
    }

    /// Re-arms the handler after a stop.
    pub fn start(&self) {
        self.stop_requested.store(false, Ordering::Relaxed);
    }

    /// Stops deferring new sweep tasks.
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::Relaxed);
    }

    /// Begins logging unreceived messages, when the policy asked for
    /// that to happen on traffic detection.
    pub fn start_logging_unreceived_messages(&self) {
        if self.warn_unreceived_frames == WarnUnreceivedFrames::AfterTrafficDetection {
            self.log_unreceived_messages.store(true, Ordering::Relaxed);
        }
    }

    /// Metrics accumulated since the previous collection.
    pub fn collect_metrics(&self) -> ClosedRxWindowMetrics {
        ClosedRxWindowMetrics {
            nof_missed_uplink_symbols: self.nof_missed_uplink_symbols.collect(),
            nof_missed_prach_contexts: self.nof_missed_prach_contexts.collect(),
        }
    }

    /// OTA symbol tick; defers one sweep task onto the uplink executor.
    pub fn on_new_symbol(self: &Arc<Self>, symbol_point: SlotSymbolPoint) {
        if self.stop_requested.load(Ordering::Relaxed) {
            return;
        }
        let internal = symbol_point.minus_symbols(self.notification_delay_in_symbols);
        let handler = Arc::clone(self);
        let deferred = self.executor.defer(Box::new(move || {
            if handler.stop_requested.load(Ordering::Relaxed) {
                return;
            }
            // Bind pending contexts before checking for unhandled ones.
            handler.uplink_repo.process_pending();
            handler.prach_repo.process_pending();

            handler.handle_uplink_context(internal);
            handler.handle_prach_context(internal);
        }));
        if !deferred {
            warn!(
                "Sector#{}: failed to dispatch task for checking for lost messages in reception \
                 for slot '{}' and symbol '{}'",
                self.sector_id,
                symbol_point.slot(),
                symbol_point.symbol_index()
            );
        }
    }

    fn handle_uplink_context(&self, symbol_point: SlotSymbolPoint) {
        let Some(popped) = self
            .uplink_repo
            .pop(symbol_point.slot(), usize::from(symbol_point.symbol_index()))
        else {
            return;
        };

        let context = UplaneRxSymbolContext {
            slot: popped.context.slot,
            symbol: symbol_point.symbol_index(),
            sector: popped.context.sector,
        };
        self.notifier
            .on_new_uplink_symbol(&context, popped.grid, false);

        if self.log_unreceived_messages.load(Ordering::Relaxed) {
            self.nof_missed_uplink_symbols.increment();
            warn!(
                "Sector#{}: missed incoming User-Plane uplink messages for slot '{}', symbol '{}'",
                context.sector, context.slot, context.symbol
            );
        }
        debug!(
            "Sector#{}: notifying incomplete UL symbol in slot '{}', symbol '{}'",
            context.sector, context.slot, context.symbol
        );
    }

    fn handle_prach_context(&self, symbol_point: SlotSymbolPoint) {
        // PRACH is delivered whole; wait for the next slot boundary.
        if symbol_point.symbol_index() != 0 {
            return;
        }
        let slot = symbol_point.slot().minus_slots(1);
        let Some(popped) = self.prach_repo.pop(slot) else {
            return;
        };

        self.notifier
            .on_new_prach_window_data(&popped.context, popped.buffer);

        if self.log_unreceived_messages.load(Ordering::Relaxed) {
            self.nof_missed_prach_contexts.increment();
            warn!(
                "Sector#{}: missed incoming User-Plane PRACH messages for slot '{}'",
                popped.context.sector, popped.context.slot
            );
        }
        debug!(
            "Sector#{}: notifying incomplete PRACH in slot '{}'",
            popped.context.sector, popped.context.slot
        );
    }
}
