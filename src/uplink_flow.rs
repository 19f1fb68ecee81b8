/*! User-Plane uplink (PUSCH) data flow.

Takes the OFH payload of an eCPRI IQ-data packet, decodes it, checks
every claim it makes against the C-Plane scheduling context installed
for its slot and eAxC, writes the decompressed REs into the slot grid
and, when that completed the symbol, pushes it upstream through the
reorderer.

Every rejection is local: log one line, bump the dropped counter,
return. Nothing here can take the pipeline down.
*/
use std::sync::Arc;

use log::{debug, info};

use crate::compression::NOF_SUBCARRIERS_PER_RB;
use crate::cplane::{UlCplaneContext, UlCplaneContextRepository};
use crate::message::FilterIndex;
use crate::metrics::KpiCounter;
use crate::notifier::{UplaneRxSymbolContext, UplaneRxSymbolNotifier};
use crate::slot::SlotPoint;
use crate::uplane::{UplaneMessage, UplaneMessageDecoder, UplaneSection};
use crate::uplink_repo::UplinkContextRepository;

/// Maximum number of PRBs any NR carrier can have.
pub const MAX_NOF_PRBS: u16 = 275;

/// Checks one section's PRB claims against the C-Plane context.
///
/// Shared between the PUSCH and PRACH data flows.
pub(crate) fn are_prb_fields_valid(
    section: &UplaneSection,
    context: &UlCplaneContext,
    sector_id: u32,
) -> bool {
    if section.start_prb > MAX_NOF_PRBS - 1 {
        info!(
            "Sector#{sector_id}: dropped received Open Fronthaul User-Plane packet as the first \
             PRB index '{}' is not valid",
            section.start_prb
        );
        return false;
    }
    if section.start_prb + section.nof_prbs > MAX_NOF_PRBS {
        info!(
            "Sector#{sector_id}: dropped received Open Fronthaul User-Plane packet as the last \
             PRB index '{}' is not valid",
            section.start_prb + section.nof_prbs
        );
        return false;
    }
    if !section.is_every_rb_used {
        info!(
            "Sector#{sector_id}: dropped received Open Fronthaul User-Plane packet as 'every \
             other resource block is used' mode is not supported"
        );
        return false;
    }
    if !section.use_current_symbol_number {
        info!(
            "Sector#{sector_id}: dropped received Open Fronthaul User-Plane packet as \
             'increment the current symbol number and use that' mode is not supported"
        );
        return false;
    }
    if section.start_prb < context.prb_start
        || section.start_prb + section.nof_prbs > context.prb_start + context.nof_prb
    {
        info!(
            "Sector#{sector_id}: dropped received Open Fronthaul User-Plane packet as PRB index \
             range '{}:{}' does not match the expected range '{}:{}'",
            section.start_prb, section.nof_prbs, context.prb_start, context.nof_prb
        );
        return false;
    }
    true
}

/// Uplink User-Plane data flow.
pub struct UplaneUplinkDataFlow {
    sector_id: u32,
    ul_eaxc: Vec<u16>,
    decoder: UplaneMessageDecoder,
    cplane_repo: Arc<UlCplaneContextRepository>,
    uplink_repo: Arc<UplinkContextRepository>,
    notifier: Arc<dyn UplaneRxSymbolNotifier>,
    dropped: KpiCounter,
}

impl UplaneUplinkDataFlow {
    /// Creates the data flow. `notifier` is normally the reorderer.
    pub fn new(
        sector_id: u32,
        ul_eaxc: Vec<u16>,
        decoder: UplaneMessageDecoder,
        cplane_repo: Arc<UlCplaneContextRepository>,
        uplink_repo: Arc<UplinkContextRepository>,
        notifier: Arc<dyn UplaneRxSymbolNotifier>,
    ) -> Self {
        Self {
            sector_id,
            ul_eaxc,
            decoder,
            cplane_repo,
            uplink_repo,
            notifier,
            dropped: KpiCounter::new(),
        }
    }

    /// Handles one eCPRI type-1 (IQ data) message payload.
    pub fn decode_type1_message(&self, eaxc: u16, payload: &[u8]) {
        let message = match self.decoder.decode(payload) {
            Ok(message) => message,
            Err(err) => {
                info!("Sector#{}: {err}", self.sector_id);
                self.dropped.increment();
                return;
            }
        };

        if self.should_message_be_filtered(eaxc, &message) {
            self.dropped.increment();
            return;
        }

        if !self.write_to_resource_grid(eaxc, &message) {
            self.dropped.increment();
            return;
        }

        self.notify_received_symbol(message.params.slot, message.params.symbol_id);
    }

    /// Messages dropped by this flow so far.
    pub fn nof_dropped_messages(&self) -> u64 {
        self.dropped.value()
    }

    /// Dropped messages since the previous collection.
    pub fn collect_dropped_messages(&self) -> u64 {
        self.dropped.collect()
    }

    fn should_message_be_filtered(&self, eaxc: u16, message: &UplaneMessage) -> bool {
        let params = &message.params;
        if params.filter_index == FilterIndex::Reserved || params.filter_index.is_prach() {
            info!(
                "Sector#{}: dropped received Open Fronthaul User-Plane packet for slot '{}' and \
                 symbol '{}' as decoded filter index value '{:?}' is not valid",
                self.sector_id, params.slot, params.symbol_id, params.filter_index
            );
            return true;
        }

        let context = self.cplane_repo.get(params.slot, eaxc);

        if params.filter_index != context.filter_index {
            info!(
                "Sector#{}: dropped received Open Fronthaul User-Plane packet as the expected \
                 filter index '{:?}' does not match with value '{:?}' for slot '{}', symbol '{}' \
                 and eAxC '{}'",
                self.sector_id,
                context.filter_index,
                params.filter_index,
                params.slot,
                params.symbol_id,
                eaxc
            );
            return true;
        }

        if !context.contains_symbol(params.symbol_id) {
            info!(
                "Sector#{}: dropped received Open Fronthaul User-Plane packet as the symbol \
                 index '{}' is invalid for slot '{}', and eAxC '{}'",
                self.sector_id, params.symbol_id, params.slot, eaxc
            );
            return true;
        }

        message
            .sections
            .iter()
            .any(|section| !are_prb_fields_valid(section, &context, self.sector_id))
    }

    fn write_to_resource_grid(&self, eaxc: u16, message: &UplaneMessage) -> bool {
        let Some(port) = self.ul_eaxc.iter().position(|e| *e == eaxc) else {
            debug!(
                "Sector#{}: eAxC '{eaxc}' has no uplink port mapping",
                self.sector_id
            );
            return false;
        };

        for section in &message.sections {
            let start_re = usize::from(section.start_prb) * NOF_SUBCARRIERS_PER_RB;
            let written = self.uplink_repo.write(
                message.params.slot,
                port,
                usize::from(message.params.symbol_id),
                start_re,
                &section.iq_samples,
            );
            if !written {
                info!(
                    "Sector#{}: dropped received Open Fronthaul User-Plane packet as no uplink \
                     context was found for slot '{}', symbol '{}'",
                    self.sector_id, message.params.slot, message.params.symbol_id
                );
                return false;
            }
        }
        true
    }

    fn notify_received_symbol(&self, slot: SlotPoint, symbol: u8) {
        let Some(popped) = self.uplink_repo.try_pop_complete(slot, usize::from(symbol)) else {
            return;
        };

        let context = UplaneRxSymbolContext {
            slot: popped.context.slot,
            symbol,
            sector: popped.context.sector,
        };
        self.notifier.on_new_uplink_symbol(&context, popped.grid, true);
        debug!(
            "Notifying UL symbol in slot '{}', symbol '{}' for sector#{}",
            context.slot, context.symbol, context.sector
        );
    }
}
