/*! Open Fronthaul receiver.

[`MessageReceiver`] is the per-packet dispatcher: VLAN and eCPRI
decode and filtering, sequence id verdict, reception window
statistics, then handing the OFH payload to the PUSCH or PRACH data
flow depending on the peeked filter index.

[`Receiver`] is the aggregate that owns the whole receive side of a
sector: both data flows, the repositories, the window checker and
closed-window handler, and the start/stop state machine around the
external Ethernet receiver.
*/
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};

use crate::closed_window::{ClosedRxWindowHandler, ClosedRxWindowHandlerConfig};
use crate::compression::create_decompressor;
use crate::config::{ReceiverConfig, max_nof_prbs};
use crate::cplane::{UlCplaneContextRepository, repository_size};
use crate::ecpri::{self, EcpriMessageType, PayloadSizeMode, TypeParameters};
use crate::ethernet::{
    FrameNotifier, MacAddress, ReceiverController, RxBuffer, VlanFrameDecoder, VlanFrameParams,
};
use crate::executor::TaskExecutor;
use crate::grid::{ResourceGridContext, SharedResourceGrid};
use crate::metrics::{
    ClosedRxWindowMetrics, KpiCounter, MessageReceiverMetrics, ReceivedMessagesMetrics,
};
use crate::notifier::UplaneRxSymbolNotifier;
use crate::prach::{PrachBufferContext, PrachContextRepository, SharedPrachBuffer};
use crate::prach_flow::UplanePrachDataFlow;
use crate::reorder::{NotifiedGridSymbolRepository, RxSymbolReorderer};
use crate::sequence_id::{CountingSequenceIdChecker, DummySequenceIdChecker, SequenceIdChecker};
use crate::slot::{CyclicPrefix, Scs, SlotSymbolPoint};
use crate::uplane::{self, CompressionHeaderMode, UplaneMessageDecoder};
use crate::uplink_flow::UplaneUplinkDataFlow;
use crate::uplink_repo::UplinkContextRepository;
use crate::window::{RxWindowChecker, RxWindowTimingParameters};
use crate::{Error, Result};

/// Minimum number of slots the repositories must span.
const MIN_REPO_SIZE_SLOTS: usize = 20;

/// Per-packet Open Fronthaul message handler.
pub struct MessageReceiver {
    sector_id: u32,
    nof_symbols: u8,
    scs: Scs,
    vlan_params: VlanFrameParams,
    ul_eaxc: Vec<u16>,
    ul_prach_eaxc: Vec<u16>,
    warn_unreceived_frames_on_first_rx_message: AtomicBool,
    enable_log_warnings_for_lates: bool,
    window_checker: Arc<RxWindowChecker>,
    window_handler: Arc<ClosedRxWindowHandler>,
    seq_id_checker: Mutex<Box<dyn SequenceIdChecker>>,
    vlan_decoder: VlanFrameDecoder,
    ecpri_decoder: ecpri::PacketDecoder,
    data_flow_uplink: UplaneUplinkDataFlow,
    data_flow_prach: UplanePrachDataFlow,
    dropped: KpiCounter,
    skipped: KpiCounter,
}

impl MessageReceiver {
    fn process_new_frame(&self, frame: &[u8]) {
        let (eth_params, ecpri_pdu) = match self.vlan_decoder.decode(frame) {
            Ok(decoded) => decoded,
            Err(err) => {
                debug!("Sector#{}: {err}", self.sector_id);
                self.dropped.increment();
                return;
            }
        };
        if self.should_ethernet_frame_be_filtered(&eth_params) {
            self.dropped.increment();
            return;
        }

        let (ecpri_params, ofh_pdu) = match self.ecpri_decoder.decode(ecpri_pdu) {
            Ok(decoded) => decoded,
            Err(err) => {
                info!("Sector#{}: {err}", self.sector_id);
                self.dropped.increment();
                return;
            }
        };
        let (eaxc, seq_id) = match self.check_ecpri_packet(&ecpri_params) {
            Ok(fields) => fields,
            Err(err) => {
                info!("Sector#{}: {err}", self.sector_id);
                self.dropped.increment();
                return;
            }
        };

        // Traffic detected: from now on the closed-window handler may
        // warn about unreceived frames.
        if self
            .warn_unreceived_frames_on_first_rx_message
            .swap(false, Ordering::Relaxed)
        {
            self.window_handler.start_logging_unreceived_messages();
        }

        // Verify the sequence identifier; only the top octet counts.
        let nof_skipped = self
            .seq_id_checker
            .lock()
            .unwrap()
            .update_and_compare(eaxc, (seq_id >> 8) as u8);
        if nof_skipped < 0 {
            self.dropped.increment();
            info!(
                "Sector#{}: dropped received Open Fronthaul User-Plane packet for eAxC value \
                 '{eaxc}' as sequence identifier field is from the past",
                self.sector_id
            );
            return;
        }
        if nof_skipped > 0 {
            self.skipped.add(nof_skipped as u64);
            let text = format!(
                "Sector#{}: potentially lost '{nof_skipped}' messages sent by the RU",
                self.sector_id
            );
            if self.enable_log_warnings_for_lates {
                warn!("{text}");
            } else {
                info!("{text}");
            }
        }

        let slot_point = match uplane::peek_slot_symbol_point(ofh_pdu, self.nof_symbols, self.scs) {
            Ok(point) => point,
            Err(_) => {
                info!(
                    "Sector#{}: dropped received Open Fronthaul User-Plane packet as the slot \
                     could not be peeked",
                    self.sector_id
                );
                self.dropped.increment();
                return;
            }
        };

        // Fill the reception window statistics.
        self.window_checker.update_rx_window_statistics(slot_point);

        let filter_type = match uplane::peek_filter_index(ofh_pdu) {
            Ok(filter) => filter,
            Err(_) => {
                info!(
                    "Sector#{}: dropped received Open Fronthaul User-Plane message as the filter \
                     index could not be peeked",
                    self.sector_id
                );
                self.dropped.increment();
                return;
            }
        };

        if filter_type.is_prach() {
            self.data_flow_prach.decode_type1_message(eaxc, ofh_pdu);
        } else {
            self.data_flow_uplink.decode_type1_message(eaxc, ofh_pdu);
        }
    }

    fn should_ethernet_frame_be_filtered(&self, eth_params: &VlanFrameParams) -> bool {
        if eth_params.mac_src_address != self.vlan_params.mac_src_address {
            debug!(
                "Sector#{}: dropped received Ethernet frame as source MAC addresses do not match \
                 (detected={}, expected={})",
                self.sector_id, eth_params.mac_src_address, self.vlan_params.mac_src_address
            );
            return true;
        }
        if eth_params.mac_dst_address != self.vlan_params.mac_dst_address {
            debug!(
                "Sector#{}: dropped received Ethernet frame as destination MAC addresses do not \
                 match (detected={}, expected={})",
                self.sector_id, eth_params.mac_dst_address, self.vlan_params.mac_dst_address
            );
            return true;
        }
        if eth_params.eth_type != self.vlan_params.eth_type {
            info!(
                "Sector#{}: dropped received Ethernet frame as decoded Ethernet type is \
                 '{:#06x}' but expected '{:#06x}'",
                self.sector_id, eth_params.eth_type, self.vlan_params.eth_type
            );
            return true;
        }
        false
    }

    fn check_ecpri_packet(&self, params: &ecpri::PacketParameters) -> Result<(u16, u16)> {
        if params.header.msg_type != EcpriMessageType::IqData {
            return Err(Error::UnsupportedEcpri("message type is not for IQ data"));
        }
        let TypeParameters::IqData { pc_id, seq_id } = params.type_params else {
            return Err(Error::UnsupportedEcpri("message type is not for IQ data"));
        };
        if !self.ul_eaxc.contains(&pc_id) && !self.ul_prach_eaxc.contains(&pc_id) {
            return Err(Error::UnconfiguredEaxc(pc_id));
        }
        Ok((pc_id, seq_id))
    }

    /// Receiver metrics accumulated since the previous collection.
    pub fn collect_metrics(&self) -> MessageReceiverMetrics {
        MessageReceiverMetrics {
            nof_dropped_messages: self.dropped.collect()
                + self.data_flow_uplink.collect_dropped_messages()
                + self.data_flow_prach.collect_dropped_messages(),
            nof_skipped_messages: self.skipped.collect(),
        }
    }

    /// Total dropped messages, including the data flows.
    pub fn nof_dropped_messages(&self) -> u64 {
        self.dropped.value()
            + self.data_flow_uplink.nof_dropped_messages()
            + self.data_flow_prach.nof_dropped_messages()
    }

    /// Total messages the sequence checker flagged as skipped.
    pub fn nof_skipped_messages(&self) -> u64 {
        self.skipped.value()
    }
}

impl FrameNotifier for MessageReceiver {
    fn on_new_frame(&self, buffer: RxBuffer) {
        self.process_new_frame(buffer.data());
    }
}

/// Defers each received frame onto the receiver executor and drops
/// frames once a stop was requested.
pub struct ReceiverTaskDispatcher {
    sector_id: u32,
    receiver: Arc<MessageReceiver>,
    executor: Arc<dyn TaskExecutor>,
    stop_requested: AtomicBool,
}

impl ReceiverTaskDispatcher {
    fn new(sector_id: u32, receiver: Arc<MessageReceiver>, executor: Arc<dyn TaskExecutor>) -> Self {
        Self {
            sector_id,
            receiver,
            executor,
            stop_requested: AtomicBool::new(false),
        }
    }

    fn start(&self) {
        self.stop_requested.store(false, Ordering::Relaxed);
    }

    fn stop(&self) {
        self.stop_requested.store(true, Ordering::Relaxed);
    }
}

impl FrameNotifier for ReceiverTaskDispatcher {
    fn on_new_frame(&self, buffer: RxBuffer) {
        if self.stop_requested.load(Ordering::Relaxed) {
            return;
        }
        let receiver = Arc::clone(&self.receiver);
        if !self
            .executor
            .defer(Box::new(move || receiver.on_new_frame(buffer)))
        {
            warn!(
                "Failed to dispatch receiver task for sector#{}",
                self.sector_id
            );
        }
    }
}

/// Receiver life cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReceiverStatus {
    /// Created, not started.
    Idle = 0,
    /// Receiving.
    Running = 1,
    /// Stop requested, waiting for the receive loop to exit.
    StopRequested = 2,
    /// Stopped.
    Stopped = 3,
}

/// Metrics snapshot of the whole receive side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiverMetrics {
    /// Window classification counters.
    pub received: ReceivedMessagesMetrics,
    /// Message receiver counters.
    pub receiver: MessageReceiverMetrics,
    /// Closed-window counters.
    pub closed_window: ClosedRxWindowMetrics,
}

/// The receive side of one sector.
pub struct Receiver {
    sector_id: u32,
    cp: CyclicPrefix,
    window_checker: Arc<RxWindowChecker>,
    window_handler: Arc<ClosedRxWindowHandler>,
    msg_receiver: Arc<MessageReceiver>,
    dispatcher: Arc<ReceiverTaskDispatcher>,
    uplink_repo: Arc<UplinkContextRepository>,
    prach_repo: Arc<PrachContextRepository>,
    ul_cplane_repo: Arc<UlCplaneContextRepository>,
    prach_cplane_repo: Arc<UlCplaneContextRepository>,
    notified_symbol_repo: Arc<NotifiedGridSymbolRepository>,
    eth_receiver: Arc<dyn ReceiverController>,
    status: AtomicU8,
}

impl Receiver {
    /// Builds the receive side of a sector.
    ///
    /// `rx_executor` runs per-packet work, `uplink_executor` the
    /// closed-window sweeps; `notifier` is the upstream consumer.
    /// Fails only on configuration errors.
    pub fn new(
        config: &ReceiverConfig,
        eth_receiver: Arc<dyn ReceiverController>,
        rx_executor: Arc<dyn TaskExecutor>,
        uplink_executor: Arc<dyn TaskExecutor>,
        notifier: Arc<dyn UplaneRxSymbolNotifier>,
    ) -> Result<Self> {
        config.validate()?;

        let nof_symbols = config.cp.nof_symbols() as u8;
        let nof_prbs = max_nof_prbs(config.cell_bandwidth_mhz, config.scs)?;
        let repo_size = repository_size(config.scs, MIN_REPO_SIZE_SLOTS);

        let vlan_params = VlanFrameParams {
            mac_dst_address: MacAddress::parse(&config.vlan.dst_mac)?,
            mac_src_address: MacAddress::parse(&config.vlan.src_mac)?,
            tci: Some(config.vlan.tci),
            eth_type: config.vlan.ethertype,
        };

        let timing_params = RxWindowTimingParameters::from_window_us(
            config.rx_window.ta4_min_us,
            config.rx_window.ta4_max_us,
            config.scs,
        );

        let uplink_repo = Arc::new(UplinkContextRepository::new(repo_size));
        let prach_repo = Arc::new(PrachContextRepository::new(repo_size));
        let ul_cplane_repo = Arc::new(UlCplaneContextRepository::new(repo_size));
        let prach_cplane_repo = Arc::new(UlCplaneContextRepository::new(repo_size));
        let notified_symbol_repo = Arc::new(NotifiedGridSymbolRepository::new(repo_size));

        let reorderer: Arc<dyn UplaneRxSymbolNotifier> = Arc::new(RxSymbolReorderer::new(
            notifier,
            Arc::clone(&notified_symbol_repo),
        ));

        let window_checker = Arc::new(RxWindowChecker::new(
            config.enable_rx_window_stats,
            timing_params,
        ));

        let window_handler = Arc::new(ClosedRxWindowHandler::new(
            ClosedRxWindowHandlerConfig {
                sector: config.sector,
                // Runs in the same executor as decoding; no extra delay.
                nof_symbols_to_process_uplink: 0,
                rx_timing_params: timing_params,
                warn_unreceived_frames: config.warn_unreceived_ru_frames,
            },
            uplink_executor,
            Arc::clone(&uplink_repo),
            Arc::clone(&prach_repo),
            Arc::clone(&reorderer),
        ));

        let header_mode = if config.static_compression_header {
            CompressionHeaderMode::Static
        } else {
            CompressionHeaderMode::Dynamic
        };
        let ul_decoder = UplaneMessageDecoder::new(
            config.scs,
            nof_symbols,
            nof_prbs,
            config.compression_ul.into(),
            header_mode,
            create_decompressor(config.compression_ul.kind)?,
        );
        let prach_decoder = UplaneMessageDecoder::new(
            config.scs,
            nof_symbols,
            nof_prbs,
            config.compression_prach.into(),
            header_mode,
            create_decompressor(config.compression_prach.kind)?,
        );

        let data_flow_uplink = UplaneUplinkDataFlow::new(
            config.sector,
            config.eaxc.ul.clone(),
            ul_decoder,
            Arc::clone(&ul_cplane_repo),
            Arc::clone(&uplink_repo),
            Arc::clone(&reorderer),
        );
        let data_flow_prach = UplanePrachDataFlow::new(
            config.sector,
            config.eaxc.prach.clone(),
            config.is_prach_cplane_enabled,
            config.ignore_prach_start_symbol,
            prach_decoder,
            Arc::clone(&prach_cplane_repo),
            Arc::clone(&prach_repo),
            Arc::clone(&reorderer),
        );

        let seq_id_checker: Box<dyn SequenceIdChecker> = if config.ignore_ecpri_seq_id {
            Box::new(DummySequenceIdChecker)
        } else {
            Box::new(CountingSequenceIdChecker::new())
        };

        let msg_receiver = Arc::new(MessageReceiver {
            sector_id: config.sector,
            nof_symbols,
            scs: config.scs,
            vlan_params,
            ul_eaxc: config.eaxc.ul.clone(),
            ul_prach_eaxc: config.eaxc.prach.clone(),
            warn_unreceived_frames_on_first_rx_message: AtomicBool::new(
                config.warn_unreceived_ru_frames
                    == crate::config::WarnUnreceivedFrames::AfterTrafficDetection,
            ),
            enable_log_warnings_for_lates: config.enable_log_warnings_for_lates,
            window_checker: Arc::clone(&window_checker),
            window_handler: Arc::clone(&window_handler),
            seq_id_checker: Mutex::new(seq_id_checker),
            vlan_decoder: VlanFrameDecoder::new(),
            ecpri_decoder: ecpri::PacketDecoder::new(if config.ignore_ecpri_payload_size {
                PayloadSizeMode::IgnoreHeader
            } else {
                PayloadSizeMode::TrustHeader
            }),
            data_flow_uplink,
            data_flow_prach,
            dropped: KpiCounter::new(),
            skipped: KpiCounter::new(),
        });

        let dispatcher = Arc::new(ReceiverTaskDispatcher::new(
            config.sector,
            Arc::clone(&msg_receiver),
            rx_executor,
        ));

        Ok(Self {
            sector_id: config.sector,
            cp: config.cp,
            window_checker,
            window_handler,
            msg_receiver,
            dispatcher,
            uplink_repo,
            prach_repo,
            ul_cplane_repo,
            prach_cplane_repo,
            notified_symbol_repo,
            eth_receiver,
            status: AtomicU8::new(ReceiverStatus::Idle as u8),
        })
    }

    /// Current life-cycle status.
    pub fn status(&self) -> ReceiverStatus {
        match self.status.load(Ordering::Acquire) {
            0 => ReceiverStatus::Idle,
            1 => ReceiverStatus::Running,
            2 => ReceiverStatus::StopRequested,
            _ => ReceiverStatus::Stopped,
        }
    }

    /// Starts reception: installs the dispatcher as the Ethernet frame
    /// notifier. Returns once the Ethernet receive loop confirmed it
    /// is running.
    pub fn start(&self) {
        debug!("Sector#{}: starting receiver", self.sector_id);
        self.window_handler.start();
        self.dispatcher.start();
        self.eth_receiver
            .start(Arc::clone(&self.dispatcher) as Arc<dyn FrameNotifier>);
        self.status
            .store(ReceiverStatus::Running as u8, Ordering::Release);
    }

    /// Stops reception. Returns once the Ethernet receive loop exited.
    pub fn stop(&self) {
        self.status
            .store(ReceiverStatus::StopRequested as u8, Ordering::Release);
        self.eth_receiver.stop();
        self.dispatcher.stop();
        self.window_handler.stop();
        self.uplink_repo.clear();
        self.prach_repo.clear();
        self.status
            .store(ReceiverStatus::Stopped as u8, Ordering::Release);
        debug!("Sector#{}: receiver stopped", self.sector_id);
    }

    /// OTA symbol boundary tick; drives the window checker and the
    /// closed-window handler.
    pub fn on_new_symbol(&self, symbol_point: SlotSymbolPoint) {
        self.window_checker.on_new_symbol(symbol_point);
        self.window_handler.on_new_symbol(symbol_point);
    }

    /// Registers an uplink reception request: binds `grid` to the
    /// slot's symbols and arms the in-order delivery bookkeeping.
    pub fn request_uplink_slot(
        &self,
        context: ResourceGridContext,
        grid: SharedResourceGrid,
        symbols: std::ops::Range<usize>,
    ) {
        self.notified_symbol_repo
            .add(context.slot, symbols.start as u8, self.cp);
        self.uplink_repo.add(context, grid, symbols);
    }

    /// Registers a PRACH reception request.
    pub fn request_prach_window(&self, context: PrachBufferContext, buffer: SharedPrachBuffer) {
        self.prach_repo.add(context, buffer, None);
    }

    /// The PUSCH C-Plane context repository.
    pub fn ul_cplane_repository(&self) -> &Arc<UlCplaneContextRepository> {
        &self.ul_cplane_repo
    }

    /// The PRACH C-Plane context repository.
    pub fn prach_cplane_repository(&self) -> &Arc<UlCplaneContextRepository> {
        &self.prach_cplane_repo
    }

    /// The frame notifier to hand to an Ethernet receiver when wiring
    /// by hand instead of through [`start`](Self::start).
    pub fn frame_notifier(&self) -> Arc<dyn FrameNotifier> {
        Arc::clone(&self.dispatcher) as Arc<dyn FrameNotifier>
    }

    /// Direct access to the message receiver (bypasses the executor).
    pub fn message_receiver(&self) -> &Arc<MessageReceiver> {
        &self.msg_receiver
    }

    /// Metrics accumulated since the previous collection.
    pub fn collect_metrics(&self) -> ReceiverMetrics {
        ReceiverMetrics {
            received: self.window_checker.collect_metrics(),
            receiver: self.msg_receiver.collect_metrics(),
            closed_window: self.window_handler.collect_metrics(),
        }
    }
}
