/*! User-Plane uplink PRACH data flow.

Mirror of the PUSCH flow for preamble traffic: same decode, an
optional C-Plane check (some deployments never send PRACH C-Plane),
writes into the PRACH buffer repository, and a whole-window
notification once every preamble symbol is complete on every port.

Long-format quirk: RUs exist that stamp symbolId 0 on every PRACH
message no matter what the C-Plane said. With
`ignore_prach_start_symbol` the symbol check tolerates both the
compliant and the quirky numbering.
*/
use std::sync::Arc;

use log::{debug, info};

use crate::compression::NOF_SUBCARRIERS_PER_RB;
use crate::cplane::UlCplaneContextRepository;
use crate::message::FilterIndex;
use crate::metrics::KpiCounter;
use crate::notifier::UplaneRxSymbolNotifier;
use crate::prach::PrachContextRepository;
use crate::slot::SlotPoint;
use crate::uplane::{UplaneMessage, UplaneMessageDecoder};
use crate::uplink_flow::are_prb_fields_valid;

/// Uplink PRACH User-Plane data flow.
pub struct UplanePrachDataFlow {
    sector_id: u32,
    prach_eaxc: Vec<u16>,
    is_prach_cplane_enabled: bool,
    ignore_prach_start_symbol: bool,
    decoder: UplaneMessageDecoder,
    cplane_repo: Arc<UlCplaneContextRepository>,
    prach_repo: Arc<PrachContextRepository>,
    notifier: Arc<dyn UplaneRxSymbolNotifier>,
    dropped: KpiCounter,
}

impl UplanePrachDataFlow {
    /// Creates the data flow.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sector_id: u32,
        prach_eaxc: Vec<u16>,
        is_prach_cplane_enabled: bool,
        ignore_prach_start_symbol: bool,
        decoder: UplaneMessageDecoder,
        cplane_repo: Arc<UlCplaneContextRepository>,
        prach_repo: Arc<PrachContextRepository>,
        notifier: Arc<dyn UplaneRxSymbolNotifier>,
    ) -> Self {
        Self {
            sector_id,
            prach_eaxc,
            is_prach_cplane_enabled,
            ignore_prach_start_symbol,
            decoder,
            cplane_repo,
            prach_repo,
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

        if !self.write_to_prach_buffer(eaxc, &message) {
            self.dropped.increment();
            return;
        }

        self.notify_prach(message.params.slot);
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
        if !params.filter_index.is_prach() {
            info!(
                "Sector#{}: dropped received Open Fronthaul User-Plane packet for slot '{}' and \
                 symbol '{}' as decoded filter index value '{:?}' is not valid",
                self.sector_id, params.slot, params.symbol_id, params.filter_index
            );
            return true;
        }

        // When Control-Plane for PRACH is not configured, skip the check.
        if !self.is_prach_cplane_enabled {
            return false;
        }

        let context = self.cplane_repo.get(params.slot, eaxc);

        if params.filter_index != context.filter_index {
            info!(
                "Sector#{}: dropped received Open Fronthaul User-Plane PRACH packet as the \
                 expected filter index '{:?}' does not match with value '{:?}' for slot '{}', \
                 symbol '{}' and eAxC '{}'",
                self.sector_id,
                context.filter_index,
                params.filter_index,
                params.slot,
                params.symbol_id,
                eaxc
            );
            return true;
        }

        let symbol_valid = if self.ignore_prach_start_symbol
            && context.filter_index == FilterIndex::PrachPreambleLong
        {
            // Quirky RUs number preamble symbols from 0; compliant ones
            // from the C-Plane start symbol. Accept both.
            let local = if params.symbol_id >= context.start_symbol {
                params.symbol_id - context.start_symbol
            } else {
                params.symbol_id
            };
            local < context.nof_symbols
        } else {
            context.contains_symbol(params.symbol_id)
        };

        if !symbol_valid {
            info!(
                "Sector#{}: dropped received Open Fronthaul User-Plane PRACH packet as the \
                 symbol index '{}' is invalid for slot '{}', and eAxC '{}'",
                self.sector_id, params.symbol_id, params.slot, eaxc
            );
            return true;
        }

        message
            .sections
            .iter()
            .any(|section| !are_prb_fields_valid(section, &context, self.sector_id))
    }

    fn write_to_prach_buffer(&self, eaxc: u16, message: &UplaneMessage) -> bool {
        let Some(port) = self.prach_eaxc.iter().position(|e| *e == eaxc) else {
            debug!(
                "Sector#{}: eAxC '{eaxc}' has no PRACH port mapping",
                self.sector_id
            );
            return false;
        };

        for section in &message.sections {
            let start_re = usize::from(section.start_prb) * NOF_SUBCARRIERS_PER_RB;
            let written = self.prach_repo.write(
                message.params.slot,
                port,
                usize::from(message.params.symbol_id),
                start_re,
                &section.iq_samples,
            );
            if !written {
                info!(
                    "Sector#{}: dropped received Open Fronthaul User-Plane PRACH packet as no \
                     PRACH context was found for slot '{}'",
                    self.sector_id, message.params.slot
                );
                return false;
            }
        }
        true
    }

    fn notify_prach(&self, slot: SlotPoint) {
        let Some(popped) = self.prach_repo.try_pop_complete(slot) else {
            return;
        };
        self.notifier
            .on_new_prach_window_data(&popped.context, popped.buffer);
        debug!(
            "Notifying PRACH in slot '{}' for sector#{}",
            popped.context.slot, popped.context.sector
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::compression::{CompressionParams, CompressionType, create_decompressor};
    use crate::cplane::UlCplaneContext;
    use crate::grid::SharedResourceGrid;
    use crate::notifier::UplaneRxSymbolContext;
    use crate::message::DataDirection;
    use crate::prach::{
        PrachBufferContext, PrachFormat, SharedPrachBuffer, new_shared_prach_buffer,
    };
    use crate::slot::Scs;
    use crate::uplane::{
        CompressionHeaderMode, RADIO_APP_HEADER_SIZE, write_radio_app_header, write_section_header,
    };

    #[derive(Default)]
    struct Recorder {
        prach: Mutex<Vec<PrachBufferContext>>,
    }

    impl UplaneRxSymbolNotifier for Recorder {
        fn on_new_uplink_symbol(
            &self,
            _context: &UplaneRxSymbolContext,
            _grid: SharedResourceGrid,
            _is_valid: bool,
        ) {
        }

        fn on_new_prach_window_data(
            &self,
            context: &PrachBufferContext,
            _buffer: SharedPrachBuffer,
        ) {
            self.prach.lock().unwrap().push(*context);
        }
    }

    struct Fixture {
        flow: UplanePrachDataFlow,
        cplane_repo: Arc<UlCplaneContextRepository>,
        prach_repo: Arc<PrachContextRepository>,
        recorder: Arc<Recorder>,
    }

    fn fixture(cplane_enabled: bool, ignore_start: bool) -> Fixture {
        let compr = CompressionParams {
            kind: CompressionType::None,
            data_width: 16,
        };
        let decoder = UplaneMessageDecoder::new(
            Scs::Khz30,
            14,
            273,
            compr,
            CompressionHeaderMode::Static,
            create_decompressor(CompressionType::None).unwrap(),
        );
        let cplane_repo = Arc::new(UlCplaneContextRepository::new(10));
        let prach_repo = Arc::new(PrachContextRepository::new(10));
        let recorder = Arc::new(Recorder::default());
        let flow = UplanePrachDataFlow::new(
            0,
            vec![8],
            cplane_enabled,
            ignore_start,
            decoder,
            Arc::clone(&cplane_repo),
            Arc::clone(&prach_repo),
            Arc::clone(&recorder) as Arc<dyn UplaneRxSymbolNotifier>,
        );
        Fixture {
            flow,
            cplane_repo,
            prach_repo,
            recorder,
        }
    }

    fn prach_message(slot: SlotPoint, symbol: u8, nof_prbs: u16) -> Vec<u8> {
        let compr = CompressionParams {
            kind: CompressionType::None,
            data_width: 16,
        };
        let mut payload = vec![0u8; RADIO_APP_HEADER_SIZE + 6];
        write_radio_app_header(
            &mut payload,
            DataDirection::Uplink,
            FilterIndex::PrachPreambleLong,
            slot,
            symbol,
        );
        write_section_header(&mut payload[RADIO_APP_HEADER_SIZE..], 0, 0, nof_prbs, &compr);
        payload.extend(std::iter::repeat_n(
            0x20u8,
            usize::from(nof_prbs) * compr.prb_bytes(),
        ));
        payload
    }

    fn install(fixture: &Fixture, slot: SlotPoint, start_symbol: u8, override_start: Option<u8>) {
        fixture.cplane_repo.add(
            slot,
            8,
            UlCplaneContext {
                filter_index: FilterIndex::PrachPreambleLong,
                start_symbol,
                prb_start: 0,
                nof_prb: 72,
                nof_symbols: 1,
            },
        );
        fixture.prach_repo.add(
            PrachBufferContext {
                slot,
                sector: 0,
                format: PrachFormat::Format0,
                nof_ports: 1,
                start_symbol,
            },
            new_shared_prach_buffer(PrachFormat::Format0, 1),
            override_start,
        );
        fixture.prach_repo.process_pending();
    }

    #[test]
    fn long_format_window_completes() {
        let fixture = fixture(true, false);
        let slot = SlotPoint::from_parts(Scs::Khz30, 0, 0, 1);
        install(&fixture, slot, 0, None);

        // 72 PRBs cover the whole 839-sample preamble.
        fixture.flow.decode_type1_message(8, &prach_message(slot, 0, 72));
        let delivered = fixture.recorder.prach.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].slot, slot);
        assert_eq!(delivered[0].format, PrachFormat::Format0);
        assert_eq!(fixture.flow.nof_dropped_messages(), 0);
    }

    #[test]
    fn quirky_symbol_zero_accepted_when_configured() {
        let fixture = fixture(true, true);
        let slot = SlotPoint::from_parts(Scs::Khz30, 0, 0, 1);
        // C-Plane says the preamble starts at symbol 2.
        install(&fixture, slot, 2, Some(2));

        // The RU stamps symbolId 0 anyway.
        fixture.flow.decode_type1_message(8, &prach_message(slot, 0, 72));
        assert_eq!(fixture.recorder.prach.lock().unwrap().len(), 1);
        assert_eq!(fixture.flow.nof_dropped_messages(), 0);
    }

    #[test]
    fn quirky_symbol_zero_rejected_by_default() {
        let fixture = fixture(true, false);
        let slot = SlotPoint::from_parts(Scs::Khz30, 0, 0, 1);
        install(&fixture, slot, 2, None);

        fixture.flow.decode_type1_message(8, &prach_message(slot, 0, 72));
        assert_eq!(fixture.flow.nof_dropped_messages(), 1);
        assert!(fixture.recorder.prach.lock().unwrap().is_empty());
    }

    #[test]
    fn cplane_check_skipped_when_disabled() {
        let fixture = fixture(false, false);
        let slot = SlotPoint::from_parts(Scs::Khz30, 0, 0, 1);
        // No C-Plane context at all; only the buffer.
        fixture.prach_repo.add(
            PrachBufferContext {
                slot,
                sector: 0,
                format: PrachFormat::Format0,
                nof_ports: 1,
                start_symbol: 0,
            },
            new_shared_prach_buffer(PrachFormat::Format0, 1),
            None,
        );
        fixture.prach_repo.process_pending();

        fixture.flow.decode_type1_message(8, &prach_message(slot, 0, 72));
        assert_eq!(fixture.recorder.prach.lock().unwrap().len(), 1);
    }

    #[test]
    fn standard_filter_rejected_here() {
        let fixture = fixture(true, false);
        let slot = SlotPoint::from_parts(Scs::Khz30, 0, 0, 1);
        install(&fixture, slot, 0, None);
        let mut payload = prach_message(slot, 0, 72);
        payload[0] &= 0xf0; // standard channel filter
        fixture.flow.decode_type1_message(8, &payload);
        assert_eq!(fixture.flow.nof_dropped_messages(), 1);
    }

    #[test]
    fn missing_buffer_is_dropped() {
        let fixture = fixture(false, false);
        let slot = SlotPoint::from_parts(Scs::Khz30, 0, 0, 1);
        fixture.flow.decode_type1_message(8, &prach_message(slot, 0, 72));
        assert_eq!(fixture.flow.nof_dropped_messages(), 1);
    }
}
