/*! RU emulator.

The inverse side of the link, used to exercise a DU without a radio:
it listens for the DU's uplink C-Plane messages and answers each one
with a burst of canned User-Plane frames whose IQ payload was
pre-generated at startup. Only six header bytes per frame are touched
at transmission time (SFN, subframe, slot, symbol and the sequence
id), so the reply path stays allocation free.

Every received DU message also feeds per-class reception window and
sequence id statistics (DL C-Plane, DL U-Plane, UL C-Plane, PRACH),
which the application prints as a periodic table.
*/
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicU32, Ordering};

use itertools::Itertools;
use log::{debug, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::compression::CompressionParams;
use crate::config::{EmulatorConfig, EmulatorPrachFormat, max_nof_prbs};
use crate::ecpri;
use crate::ethernet::{
    FrameNotifier, FrameSender, MAX_BURST_SIZE, MacAddress, RxBuffer, VlanFrameBuilder,
    VlanFrameParams,
};
use crate::executor::TaskExecutor;
use crate::message::{DataDirection, FilterIndex, MAX_SUPPORTED_EAXC_ID_VALUE, OfhMessageType};
use crate::metrics::KpiCounter;
use crate::prach::PrachFormat;
use crate::sequence_id::{CountingSequenceIdChecker, SequenceIdChecker};
use crate::slot::{MAX_NSYMB_PER_SLOT, Scs, SlotPoint, SlotSymbolPoint, wrap_distance};
use crate::uplane;
use crate::window::RxWindowTimingParameters;
use crate::Result;

/// Ethernet frame size the emulator builds against.
const ETHERNET_FRAME_SIZE: usize = 9000;

/// Supported values of the udCmpHdr field on UL C-Plane messages.
const SUPPORTED_UL_CMPR_HDR: [u8; 2] = [0x00, 0x91];

/// Number of PRBs used by IQ samples of PRACH long format 0.
const PRACH_LONG_FORMAT_NOF_PRB: u16 = 72;

/// Number of PRBs used by IQ samples of PRACH short format B4.
const PRACH_SHORT_FORMAT_NOF_PRB: u16 = 12;

/// Ethernet + eCPRI + OFH header bytes in an emitted U-Plane frame.
const HEADERS_SIZE: usize = 18 + 8 + 10;

/// Aggregated per-class reception statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmulatorRxKpis {
    /// Messages inside the reception window.
    pub rx_on_time: u64,
    /// Messages ahead of the reception window.
    pub rx_early: u64,
    /// Messages behind the reception window.
    pub rx_late: u64,
}

/// Window checker for DU traffic arriving ahead of its OTA time.
///
/// The DU sends T2a in advance, so unlike the DU-side checker this one
/// measures how far the message timestamp is ahead of OTA.
struct EmulatorWindowChecker {
    timing_parameters: RxWindowTimingParameters,
    ota_raw: AtomicU32,
    on_time: KpiCounter,
    early: KpiCounter,
    late: KpiCounter,
}

impl EmulatorWindowChecker {
    fn new(timing_parameters: RxWindowTimingParameters) -> Self {
        Self {
            timing_parameters,
            ota_raw: AtomicU32::new(0),
            on_time: KpiCounter::new(),
            early: KpiCounter::new(),
            late: KpiCounter::new(),
        }
    }

    fn on_new_symbol(&self, symbol_point: SlotSymbolPoint) {
        self.ota_raw.store(symbol_point.ofh_raw(), Ordering::Relaxed);
    }

    fn update_rx_window_statistics(&self, symbol_point: SlotSymbolPoint) {
        let ota_raw = self.ota_raw.load(Ordering::Relaxed);
        let advance = wrap_distance(
            i64::from(symbol_point.ofh_raw()) - i64::from(ota_raw),
            i64::from(symbol_point.ofh_period()),
        );
        if advance < self.timing_parameters.sym_start as i32 {
            self.late.increment();
        } else if advance > self.timing_parameters.sym_end as i32 {
            self.early.increment();
        } else {
            self.on_time.increment();
        }
    }

    fn collect(&self) -> EmulatorRxKpis {
        EmulatorRxKpis {
            rx_on_time: self.on_time.collect(),
            rx_early: self.early.collect(),
            rx_late: self.late.collect(),
        }
    }
}

/// Sequence id checker that keeps per-eAxC error counters.
struct EmulatorSeqIdChecker {
    port_type: &'static str,
    checker: Mutex<CountingSequenceIdChecker>,
    counters: [KpiCounter; MAX_SUPPORTED_EAXC_ID_VALUE as usize],
}

impl EmulatorSeqIdChecker {
    fn new(port_type: &'static str) -> Self {
        Self {
            port_type,
            checker: Mutex::new(CountingSequenceIdChecker::new()),
            counters: std::array::from_fn(|_| KpiCounter::new()),
        }
    }

    fn update_statistics(&self, eaxc: u16, seq_id: u8, symbol_point: SlotSymbolPoint) {
        let nof_skipped = self.checker.lock().unwrap().update_and_compare(eaxc, seq_id);
        if nof_skipped < 0 {
            warn!(
                "Dropped received Open Fronthaul packet for {} eAxC value '{eaxc}' in slot '{}' \
                 symbol '{}' as sequence identifier field is from the past",
                self.port_type,
                symbol_point.slot(),
                symbol_point.symbol_index()
            );
            self.counters[usize::from(eaxc)].increment();
        } else if nof_skipped > 0 {
            warn!(
                "Slot '{}', symbol '{}': potentially lost '{nof_skipped}' messages sent by the DU \
                 on {} eAxC '{eaxc}'",
                symbol_point.slot(),
                symbol_point.symbol_index(),
                self.port_type
            );
            self.counters[usize::from(eaxc)].increment();
        }
    }

    /// Errors per eAxC since the last call, joined with '/'.
    fn collect_error_text(&self, eaxc: &[u16]) -> String {
        eaxc.iter()
            .map(|e| self.counters[usize::from(*e)].collect())
            .join("/")
    }
}

/// Parameters decoded from one received DU message.
#[derive(Debug, Clone, Copy)]
struct RxMessageInfo {
    eaxc: u16,
    direction: DataDirection,
    filter_index: FilterIndex,
    msg_type: OfhMessageType,
    symbol_point: SlotSymbolPoint,
    nof_symbols: u8,
    compr_header: u8,
    seq_id: u8,
}

/// RU emulator: receives OFH traffic and replies with UL packets.
pub struct RuEmulator {
    nof_prbs: u16,
    compr_params: CompressionParams,
    prach_format: PrachFormat,
    prach_filter: FilterIndex,
    nof_prach_symbols: u8,
    dl_eaxc: Vec<u16>,
    ul_eaxc: Vec<u16>,
    prach_eaxc: Vec<u16>,
    dl_cp_window_checker: EmulatorWindowChecker,
    dl_up_window_checker: EmulatorWindowChecker,
    ul_cp_window_checker: EmulatorWindowChecker,
    dl_cp_seq_id_checker: EmulatorSeqIdChecker,
    dl_up_seq_id_checker: EmulatorSeqIdChecker,
    ul_cp_seq_id_checker: EmulatorSeqIdChecker,
    prach_seq_id_checker: EmulatorSeqIdChecker,
    /// Pre-built frames: per UL eAxC, per symbol, one or two frames.
    test_data: Mutex<Vec<Vec<Vec<Vec<u8>>>>>,
    /// Pre-built PRACH frames: per PRACH eAxC, per preamble symbol.
    test_prach: Mutex<Vec<Vec<Vec<u8>>>>,
    seq_counters: Mutex<[u8; MAX_SUPPORTED_EAXC_ID_VALUE as usize]>,
    prach_seq_counters: Mutex<[u8; MAX_SUPPORTED_EAXC_ID_VALUE as usize]>,
    rx_total: KpiCounter,
    tx_total: KpiCounter,
    corrupt: KpiCounter,
    dropped: KpiCounter,
    sender: Arc<dyn FrameSender>,
}

impl RuEmulator {
    /// Builds an emulator; fails only on configuration errors.
    pub fn new(config: &EmulatorConfig, sender: Arc<dyn FrameSender>) -> Result<Self> {
        config.validate()?;

        let nof_prbs = max_nof_prbs(config.bandwidth_mhz, config.scs)?;
        let compr_params: CompressionParams = config.compression.into();
        let prach_format = PrachFormat::from(config.prach_format);
        let prach_filter = match config.prach_format {
            EmulatorPrachFormat::LongFormat0 => FilterIndex::PrachPreambleLong,
            EmulatorPrachFormat::ShortFormatB4 => FilterIndex::PrachPreambleShort,
        };

        let window = |min: f64, max: f64| {
            EmulatorWindowChecker::new(RxWindowTimingParameters::from_window_us(
                min, max, config.scs,
            ))
        };

        let emulator = Self {
            nof_prbs,
            compr_params,
            prach_format,
            prach_filter,
            nof_prach_symbols: prach_format.nof_symbols() as u8,
            dl_eaxc: config.eaxc.dl.clone(),
            ul_eaxc: config.eaxc.ul.clone(),
            prach_eaxc: config.eaxc.prach.clone(),
            dl_cp_window_checker: window(
                config.rx_window.t2a_min_cp_dl_us,
                config.rx_window.t2a_max_cp_dl_us,
            ),
            dl_up_window_checker: window(
                config.rx_window.t2a_min_up_us,
                config.rx_window.t2a_max_up_us,
            ),
            ul_cp_window_checker: window(
                config.rx_window.t2a_min_cp_ul_us,
                config.rx_window.t2a_max_cp_ul_us,
            ),
            dl_cp_seq_id_checker: EmulatorSeqIdChecker::new("DL CP"),
            dl_up_seq_id_checker: EmulatorSeqIdChecker::new("DL UP"),
            ul_cp_seq_id_checker: EmulatorSeqIdChecker::new("UL CP"),
            prach_seq_id_checker: EmulatorSeqIdChecker::new("PRACH"),
            test_data: Mutex::new(Vec::new()),
            test_prach: Mutex::new(Vec::new()),
            seq_counters: Mutex::new([0; MAX_SUPPORTED_EAXC_ID_VALUE as usize]),
            prach_seq_counters: Mutex::new([0; MAX_SUPPORTED_EAXC_ID_VALUE as usize]),
            rx_total: KpiCounter::new(),
            tx_total: KpiCounter::new(),
            corrupt: KpiCounter::new(),
            dropped: KpiCounter::new(),
            sender,
        };

        let frame_builder = VlanFrameBuilder::new(VlanFrameParams {
            mac_dst_address: MacAddress::parse(&config.du_mac)?,
            mac_src_address: MacAddress::parse(&config.ru_mac)?,
            tci: Some(config.vlan_tag),
            eth_type: crate::ethernet::ECPRI_ETH_TYPE,
        });
        *emulator.test_data.lock().unwrap() = emulator.generate_test_data(&frame_builder);
        *emulator.test_prach.lock().unwrap() = emulator.generate_test_prach(&frame_builder);

        Ok(emulator)
    }

    /// Returns a frame notifier that defers each received frame onto
    /// `executor`.
    pub fn notifier(
        self: &Arc<Self>,
        executor: Arc<dyn TaskExecutor>,
    ) -> Arc<dyn FrameNotifier> {
        Arc::new(EmulatorFrameHandler {
            emulator: Arc::clone(self),
            executor,
        })
    }

    /// OTA symbol boundary tick for the window checkers.
    pub fn on_new_symbol(&self, symbol_point: SlotSymbolPoint) {
        self.dl_cp_window_checker.on_new_symbol(symbol_point);
        self.dl_up_window_checker.on_new_symbol(symbol_point);
        self.ul_cp_window_checker.on_new_symbol(symbol_point);
    }

    /// Decodes and processes one received OFH frame.
    pub fn handle_frame(&self, packet: &[u8]) {
        if self.should_packet_be_dropped(packet) {
            self.dropped.increment();
            return;
        }

        let Some(message_info) = self.decode_rx_message(packet) else {
            self.corrupt.increment();
            return;
        };

        if !self.validate_rx_ofh_params(&message_info) {
            self.corrupt.increment();
            return;
        }

        self.rx_total.increment();

        // Check the SeqId field and update the on-time statistics.
        self.window_checker_for(&message_info)
            .update_rx_window_statistics(message_info.symbol_point);
        self.seq_id_checker_for(&message_info).update_statistics(
            message_info.eaxc,
            message_info.seq_id,
            message_info.symbol_point,
        );

        if self.is_ul_uplane_request(&message_info) {
            self.generate_ul_uplane_messages(&message_info);
        } else if self.is_prach_uplane_request(&message_info) {
            self.generate_prach_uplane_messages(&message_info);
        }
    }

    /// Formats the statistics table header.
    pub fn statistics_header() -> String {
        format!(
            "| {:^8} | {:^3} | {:^11} | {:^11} | {:^11} | {:^11} | {:^15} | {:^13} | {:^13} | \
             {:^13} | {:^15} | {:^14} | {:^14} | {:^14} | {:^15} | {:^15} | {:^11} | {:^11} | \
             {:^11} |",
            "TIME",
            "ID",
            "RX_TOTAL",
            "RX_ON_TIME",
            "RX_EARLY",
            "RX_LATE",
            "RX_SEQ_ERR",
            "RX_ON_TIME_C",
            "RX_EARLY_C",
            "RX_LATE_C",
            "RX_SEQ_ERR_C",
            "RX_ON_TIME_C_U",
            "RX_EARLY_C_U",
            "RX_LATE_C_U",
            "RX_SEQ_ERR_C_U",
            "RX_SEQ_ERR_PRACH",
            "RX_CORRUPT",
            "RX_ERR_DROP",
            "TX_TOTAL"
        )
    }

    /// Formats one statistics row; counters reset to zero for the next
    /// collection interval.
    pub fn statistics_row(&self, emu_id: usize) -> String {
        let dl_up = self.dl_up_window_checker.collect();
        let dl_cp = self.dl_cp_window_checker.collect();
        let ul_cp = self.ul_cp_window_checker.collect();

        format!(
            "| {:^8} | {:^3} | {:^11} | {:^11} | {:^11} | {:^11} | {:^15} | {:^13} | {:^13} | \
             {:^13} | {:^15} | {:^14} | {:^14} | {:^14} | {:^15} | {:^15} | {:^11} | {:^11} | \
             {:^11} |",
            wall_clock_hms(),
            emu_id,
            self.rx_total.collect(),
            dl_up.rx_on_time,
            dl_up.rx_early,
            dl_up.rx_late,
            self.dl_up_seq_id_checker.collect_error_text(&self.dl_eaxc),
            dl_cp.rx_on_time,
            dl_cp.rx_early,
            dl_cp.rx_late,
            self.dl_cp_seq_id_checker.collect_error_text(&self.dl_eaxc),
            ul_cp.rx_on_time,
            ul_cp.rx_early,
            ul_cp.rx_late,
            self.ul_cp_seq_id_checker.collect_error_text(&self.ul_eaxc),
            self.prach_seq_id_checker
                .collect_error_text(&self.prach_eaxc),
            self.corrupt.collect(),
            self.dropped.collect(),
            self.tx_total.collect()
        )
    }

    /// Total frames transmitted.
    pub fn nof_tx_frames(&self) -> u64 {
        self.tx_total.value()
    }

    /// Total well-formed frames received.
    pub fn nof_rx_frames(&self) -> u64 {
        self.rx_total.value()
    }

    /// Total corrupt frames received.
    pub fn nof_corrupt_frames(&self) -> u64 {
        self.corrupt.value()
    }

    fn should_packet_be_dropped(&self, packet: &[u8]) -> bool {
        // Drop non OFH packets.
        if packet.len() < 26 {
            debug!("Dropping packet of size smaller than 26 bytes");
            return true;
        }
        let eth_type = u16::from_be_bytes([packet[12], packet[13]]);
        if eth_type != crate::ethernet::ECPRI_ETH_TYPE {
            debug!("Dropping packet as it is not of eCPRI type");
            return true;
        }
        false
    }

    /// Analyzes the content of a received OFH packet.
    ///
    /// DU frames arrive untagged: the eCPRI header starts at byte 14
    /// and the radio application header at byte 22.
    fn decode_rx_message(&self, packet: &[u8]) -> Option<RxMessageInfo> {
        let filter_index = FilterIndex::from_wire(packet[22]);
        if filter_index == FilterIndex::Reserved {
            warn!("Packet is corrupt: unknown filter index decoded");
            return None;
        }

        let msg_type = match packet[15] {
            0x00 => OfhMessageType::UserPlane,
            0x02 => OfhMessageType::ControlPlane,
            other => {
                warn!("Packet is corrupt: unknown eCPRI message type = {other} decoded");
                return None;
            }
        };

        let direction = DataDirection::from_wire(packet[22] >> 7);

        // Peek the timestamp.
        let frame = packet[23];
        let subframe = packet[24] >> 4;
        let slot_id = (u32::from(packet[24] & 0x0f) << 2) | u32::from(packet[25] >> 6);
        let symbol_id = packet[25] & 0x3f;
        let slot = SlotPoint::from_wire(Scs::Khz30, frame, subframe, slot_id)?;
        if usize::from(symbol_id) >= MAX_NSYMB_PER_SLOT {
            warn!("Packet is corrupt: incorrect timestamp = {slot}:{symbol_id}");
            return None;
        }

        let eaxc = u16::from_be_bytes([packet[18], packet[19]]);
        let seq_id = packet[20];

        let (nof_symbols, compr_header) = if filter_index.is_prach() {
            (*packet.get(39)? & 0x0f, *packet.get(33)?)
        } else {
            (*packet.get(35)? & 0x0f, *packet.get(28)?)
        };

        Some(RxMessageInfo {
            eaxc,
            direction,
            filter_index,
            msg_type,
            symbol_point: SlotSymbolPoint::new(slot, symbol_id, MAX_NSYMB_PER_SLOT as u8),
            nof_symbols,
            compr_header,
            seq_id,
        })
    }

    /// Validates decoded message parameters; a failure means the
    /// packet is counted as corrupt.
    fn validate_rx_ofh_params(&self, info: &RxMessageInfo) -> bool {
        if info.direction == DataDirection::Downlink && !self.dl_eaxc.contains(&info.eaxc) {
            warn!(
                "Packet is corrupt: received eAxC = '{}' is not configured in the RU emulator DL \
                 ports list",
                info.eaxc
            );
            return false;
        }

        // The remaining parameters are only checked for UL C-Plane.
        if info.direction != DataDirection::Uplink || info.msg_type != OfhMessageType::ControlPlane
        {
            return true;
        }

        let eaxc_list = if info.filter_index.is_prach() {
            &self.prach_eaxc
        } else {
            &self.ul_eaxc
        };
        if !eaxc_list.contains(&info.eaxc) {
            warn!(
                "Packet is corrupt: received eAxC = '{}' is not configured in the RU emulator \
                 UL/PRACH ports list",
                info.eaxc
            );
            return false;
        }

        if !info.filter_index.is_prach() && usize::from(info.nof_symbols) > MAX_NSYMB_PER_SLOT {
            warn!(
                "Packet is corrupt: incorrect number of symbols = {}",
                info.nof_symbols
            );
            return false;
        }

        if info.filter_index.is_prach() {
            if info.filter_index != self.prach_filter {
                warn!(
                    "Packet is corrupt: incorrect PRACH filter index = {:?}, expected {:?}",
                    info.filter_index, self.prach_filter
                );
                return false;
            }
            if info.nof_symbols > self.nof_prach_symbols {
                warn!(
                    "Packet is corrupt: incorrect number of PRACH symbols = {}, expected {} \
                     symbols",
                    info.nof_symbols, self.nof_prach_symbols
                );
                return false;
            }
        }

        if !SUPPORTED_UL_CMPR_HDR.contains(&info.compr_header) {
            warn!(
                "Packet is corrupt: unsupported UL compression parameters = {:#04x}",
                info.compr_header
            );
            return false;
        }

        true
    }

    fn window_checker_for(&self, info: &RxMessageInfo) -> &EmulatorWindowChecker {
        match (info.direction, info.msg_type) {
            (DataDirection::Uplink, _) => &self.ul_cp_window_checker,
            (DataDirection::Downlink, OfhMessageType::ControlPlane) => &self.dl_cp_window_checker,
            (DataDirection::Downlink, OfhMessageType::UserPlane) => &self.dl_up_window_checker,
        }
    }

    fn seq_id_checker_for(&self, info: &RxMessageInfo) -> &EmulatorSeqIdChecker {
        match (info.direction, info.msg_type) {
            (DataDirection::Uplink, _) => {
                if info.filter_index.is_prach() {
                    &self.prach_seq_id_checker
                } else {
                    &self.ul_cp_seq_id_checker
                }
            }
            (DataDirection::Downlink, OfhMessageType::ControlPlane) => &self.dl_cp_seq_id_checker,
            (DataDirection::Downlink, OfhMessageType::UserPlane) => &self.dl_up_seq_id_checker,
        }
    }

    fn is_ul_uplane_request(&self, info: &RxMessageInfo) -> bool {
        info.direction == DataDirection::Uplink
            && info.msg_type == OfhMessageType::ControlPlane
            && !info.filter_index.is_prach()
    }

    fn is_prach_uplane_request(&self, info: &RxMessageInfo) -> bool {
        info.direction == DataDirection::Uplink
            && info.msg_type == OfhMessageType::ControlPlane
            && info.filter_index.is_prach()
    }

    /// Replies to an UL C-Plane request with canned PUSCH U-Plane data.
    fn generate_ul_uplane_messages(&self, info: &RxMessageInfo) {
        let Some(eaxc_idx) = self.ul_eaxc.iter().position(|e| *e == info.eaxc) else {
            return;
        };
        let mut test_data = self.test_data.lock().unwrap();
        let eaxc_frames = &mut test_data[eaxc_idx];
        let mut seq_counters = self.seq_counters.lock().unwrap();
        let seq_counter = &mut seq_counters[usize::from(info.eaxc)];

        let start = info.symbol_point.symbol_index();
        let end = (start + info.nof_symbols).min(MAX_NSYMB_PER_SLOT as u8);

        // Restamp the runtime header bytes, then send the whole burst.
        for symbol in start..end {
            for frame in eaxc_frames[usize::from(symbol)].iter_mut() {
                set_runtime_header_params(frame, info.symbol_point.slot(), symbol, *seq_counter);
                *seq_counter = seq_counter.wrapping_add(1);
            }
        }
        let burst: Vec<&[u8]> = eaxc_frames[usize::from(start)..usize::from(end)]
            .iter()
            .flat_map(|symbol_frames| symbol_frames.iter().map(Vec::as_slice))
            .take(MAX_BURST_SIZE)
            .collect();
        self.sender.send(&burst);
        self.tx_total.add(burst.len() as u64);
    }

    /// Replies to a PRACH C-Plane request with canned preamble data.
    fn generate_prach_uplane_messages(&self, info: &RxMessageInfo) {
        let Some(eaxc_idx) = self.prach_eaxc.iter().position(|e| *e == info.eaxc) else {
            return;
        };
        let mut test_prach = self.test_prach.lock().unwrap();
        let eaxc_frames = &mut test_prach[eaxc_idx];
        let mut seq_counters = self.prach_seq_counters.lock().unwrap();
        let seq_counter = &mut seq_counters[usize::from(info.eaxc)];

        let start_symbol = info.symbol_point.symbol_index();
        let nof_symbols = info.nof_symbols.min(self.nof_prach_symbols);

        for symbol in 0..nof_symbols {
            let frame = &mut eaxc_frames[usize::from(symbol)];
            set_runtime_header_params(
                frame,
                info.symbol_point.slot(),
                (start_symbol + symbol).min(MAX_NSYMB_PER_SLOT as u8 - 1),
                *seq_counter,
            );
            *seq_counter = seq_counter.wrapping_add(1);
        }
        let burst: Vec<&[u8]> = eaxc_frames[..usize::from(nof_symbols)]
            .iter()
            .map(Vec::as_slice)
            .take(MAX_BURST_SIZE)
            .collect();
        self.sender.send(&burst);
        self.tx_total.add(burst.len() as u64);
    }

    /// Pre-generates PUSCH U-Plane frames for every UL eAxC and symbol.
    ///
    /// Depending on compression one symbol may need two Ethernet
    /// frames; the PRB range is split accordingly.
    fn generate_test_data(&self, frame_builder: &VlanFrameBuilder) -> Vec<Vec<Vec<Vec<u8>>>> {
        let prb_size = self.compr_params.prb_bytes();
        let iq_data_size = usize::from(self.nof_prbs) * prb_size;

        // Number of PRBs carried by each frame of a symbol.
        let nof_frame_prbs: Vec<u16> = if HEADERS_SIZE + iq_data_size > ETHERNET_FRAME_SIZE {
            let first = ((ETHERNET_FRAME_SIZE - HEADERS_SIZE) / prb_size) as u16;
            vec![first, self.nof_prbs - first]
        } else {
            vec![self.nof_prbs]
        };

        self.ul_eaxc
            .iter()
            .map(|eaxc| {
                (0..MAX_NSYMB_PER_SLOT)
                    .map(|symbol| {
                        let mut start_prb = 0u16;
                        nof_frame_prbs
                            .iter()
                            .map(|nof_prbs| {
                                let frame = self.build_static_frame(
                                    frame_builder,
                                    *eaxc,
                                    FilterIndex::Standard,
                                    start_prb,
                                    *nof_prbs,
                                    u64::from(*eaxc) + symbol as u64,
                                );
                                start_prb += nof_prbs;
                                frame
                            })
                            .collect()
                    })
                    .collect()
            })
            .collect()
    }

    /// Pre-generates PRACH U-Plane frames for every PRACH eAxC and
    /// preamble symbol.
    fn generate_test_prach(&self, frame_builder: &VlanFrameBuilder) -> Vec<Vec<Vec<u8>>> {
        let nof_prbs = if self.prach_format.is_long() {
            PRACH_LONG_FORMAT_NOF_PRB
        } else {
            PRACH_SHORT_FORMAT_NOF_PRB
        };

        self.prach_eaxc
            .iter()
            .map(|eaxc| {
                (0..usize::from(self.nof_prach_symbols))
                    .map(|symbol| {
                        self.build_static_frame(
                            frame_builder,
                            *eaxc,
                            self.prach_filter,
                            0,
                            nof_prbs,
                            u64::from(*eaxc) + symbol as u64,
                        )
                    })
                    .collect()
            })
            .collect()
    }

    /// Builds one canned frame: all headers filled, IQ payload random.
    fn build_static_frame(
        &self,
        frame_builder: &VlanFrameBuilder,
        eaxc: u16,
        filter: FilterIndex,
        start_prb: u16,
        nof_prbs: u16,
        seed: u64,
    ) -> Vec<u8> {
        let data_size = usize::from(nof_prbs) * self.compr_params.prb_bytes();
        let mut frame = vec![0u8; HEADERS_SIZE + data_size];

        frame_builder.write_header(&mut frame);
        ecpri::write_iq_data_header(
            &mut frame[18..26],
            (data_size + 10 + ecpri::ECPRI_COMMON_HEADER_SIZE) as u16,
            eaxc,
            // Sub-sequence zero with the E bit set.
            0x0080,
        );
        uplane::write_radio_app_header(
            &mut frame[26..30],
            DataDirection::Uplink,
            filter,
            SlotPoint::new(Scs::Khz30, 0, 0),
            0,
        );
        uplane::write_section_header(
            &mut frame[30..36],
            0,
            start_prb,
            nof_prbs,
            &self.compr_params,
        );

        let mut rng = StdRng::seed_from_u64(seed);
        rng.fill(&mut frame[HEADERS_SIZE..]);
        frame
    }
}

/// Updates the six runtime bytes of a canned frame.
fn set_runtime_header_params(frame: &mut [u8], slot: SlotPoint, symbol: u8, seq_id: u8) {
    // eCPRI sequence id, high octet.
    frame[24] = seq_id;
    // Radio application header timestamp.
    uplane::write_timestamp(&mut frame[27..30], slot, symbol);
}

/// Wall clock as HH:MM:SS (UTC), for the statistics table.
fn wall_clock_hms() -> String {
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!(
        "{:02}:{:02}:{:02}",
        secs / 3600 % 24,
        secs / 60 % 60,
        secs % 60
    )
}

struct EmulatorFrameHandler {
    emulator: Arc<RuEmulator>,
    executor: Arc<dyn TaskExecutor>,
}

impl FrameNotifier for EmulatorFrameHandler {
    fn on_new_frame(&self, buffer: RxBuffer) {
        let emulator = Arc::clone(&self.emulator);
        if !self
            .executor
            .defer(Box::new(move || emulator.handle_frame(buffer.data())))
        {
            warn!("Failed to dispatch receiver task");
        }
    }
}

/// Builds the untagged UL C-Plane message a DU would send, for tests
/// and the loopback demo.
pub fn build_ul_cplane_frame(params: &UlCplaneRequest) -> Vec<u8> {
    // Section type 3 carries the timeOffset/frameStructure/cpLength
    // fields that type 1 does not.
    let section_payload: usize = if params.filter.is_prach() { 18 } else { 14 };
    let mut frame = vec![0u8; 14 + 8 + section_payload];
    frame[0..6].copy_from_slice(params.ru_mac.octets());
    frame[6..12].copy_from_slice(params.du_mac.octets());
    frame[12..14].copy_from_slice(&crate::ethernet::ECPRI_ETH_TYPE.to_be_bytes());

    ecpri::write_iq_data_header(
        &mut frame[14..22],
        (section_payload + 4) as u16,
        params.eaxc,
        u16::from(params.seq_id) << 8 | 0x80,
    );
    // Real-time control message type.
    frame[15] = 0x02;

    // Radio application header.
    frame[22] = (1 << 4) | params.filter.to_wire();
    uplane::write_timestamp(&mut frame[23..26], params.slot, params.start_symbol);
    frame[26] = 1; // numberOfSections
    frame[27] = if params.filter.is_prach() { 3 } else { 1 }; // sectionType

    if params.filter.is_prach() {
        // Section type 3: udCompHdr at byte 33, numSymbol at byte 39.
        frame[33] = params.compr_header;
        frame[36] = (params.start_prb >> 8) as u8 & 0x3;
        frame[37] = params.start_prb as u8;
        frame[38] = if params.nof_prb > 255 {
            0
        } else {
            params.nof_prb as u8
        };
        frame[39] = params.nof_symbols & 0x0f;
    } else {
        // Section type 1: udCompHdr at byte 28, numSymbol at byte 35.
        frame[28] = params.compr_header;
        frame[31] = (params.start_prb >> 8) as u8 & 0x3;
        frame[32] = params.start_prb as u8;
        frame[33] = if params.nof_prb > 255 {
            0
        } else {
            params.nof_prb as u8
        };
        frame[35] = params.nof_symbols & 0x0f;
    }
    frame
}

/// Parameters for [`build_ul_cplane_frame`].
pub struct UlCplaneRequest {
    /// RU (destination) MAC address.
    pub ru_mac: MacAddress,
    /// DU (source) MAC address.
    pub du_mac: MacAddress,
    /// Target eAxC.
    pub eaxc: u16,
    /// Message sequence id.
    pub seq_id: u8,
    /// Channel filter.
    pub filter: FilterIndex,
    /// Scheduled slot.
    pub slot: SlotPoint,
    /// First scheduled symbol.
    pub start_symbol: u8,
    /// Number of scheduled symbols.
    pub nof_symbols: u8,
    /// First scheduled PRB.
    pub start_prb: u16,
    /// Number of scheduled PRBs.
    pub nof_prb: u16,
    /// udCompHdr octet.
    pub compr_header: u8,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CompressionConfig, EaxcConfig};
    use crate::slot::SlotPoint;

    #[derive(Default)]
    struct CapturingSender {
        frames: Mutex<Vec<Vec<u8>>>,
    }

    impl FrameSender for CapturingSender {
        fn send(&self, frames: &[&[u8]]) {
            let mut stored = self.frames.lock().unwrap();
            for frame in frames {
                stored.push(frame.to_vec());
            }
        }
    }

    fn config() -> EmulatorConfig {
        EmulatorConfig {
            ru_mac: "70:b3:d5:e1:5b:06".to_string(),
            du_mac: "00:11:22:33:44:55".to_string(),
            vlan_tag: 2,
            bandwidth_mhz: 20,
            compression: CompressionConfig {
                kind: crate::compression::CompressionType::Bfp,
                width: 9,
            },
            eaxc: EaxcConfig {
                dl: vec![0, 1],
                ul: vec![0, 1],
                prach: vec![4],
            },
            ..EmulatorConfig::default()
        }
    }

    fn emulator() -> (Arc<RuEmulator>, Arc<CapturingSender>) {
        let sender = Arc::new(CapturingSender::default());
        let emulator = Arc::new(
            RuEmulator::new(&config(), Arc::clone(&sender) as Arc<dyn FrameSender>).unwrap(),
        );
        (emulator, sender)
    }

    fn request(slot: SlotPoint, eaxc: u16, seq_id: u8) -> Vec<u8> {
        build_ul_cplane_frame(&UlCplaneRequest {
            ru_mac: MacAddress::parse("70:b3:d5:e1:5b:06").unwrap(),
            du_mac: MacAddress::parse("00:11:22:33:44:55").unwrap(),
            eaxc,
            seq_id,
            filter: FilterIndex::Standard,
            slot,
            start_symbol: 0,
            nof_symbols: 14,
            start_prb: 0,
            nof_prb: 51,
            compr_header: 0x91,
        })
    }

    #[test]
    fn ul_cplane_triggers_full_slot_burst() {
        let (emulator, sender) = emulator();
        let slot = SlotPoint::from_parts(Scs::Khz30, 10, 3, 1);
        emulator.handle_frame(&request(slot, 0, 0));

        let frames = sender.frames.lock().unwrap();
        // 51 PRBs of 9-bit BFP fit one frame per symbol.
        assert_eq!(frames.len(), 14);
        assert_eq!(emulator.nof_tx_frames(), 14);
        assert_eq!(emulator.nof_rx_frames(), 1);

        // Every emitted frame mirrors the requested slot and counts
        // symbols up from the start symbol.
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(frame[27], 10); // SFN
            assert_eq!(frame[28] >> 4, 3); // subframe
            assert_eq!(frame[29] & 0x3f, i as u8); // symbol
            assert_eq!(frame[24], i as u8); // seq id
            assert_eq!(frame[23], 0); // pc_id low byte = eAxC 0
            // VLAN tag on emitted frames.
            assert_eq!(&frame[12..16], &[0x81, 0x00, 0x00, 0x02]);
        }
    }

    #[test]
    fn round_trip_matches_request() {
        let (emulator, sender) = emulator();
        let slot = SlotPoint::from_parts(Scs::Khz30, 1, 0, 1);
        let frame = build_ul_cplane_frame(&UlCplaneRequest {
            ru_mac: MacAddress::parse("70:b3:d5:e1:5b:06").unwrap(),
            du_mac: MacAddress::parse("00:11:22:33:44:55").unwrap(),
            eaxc: 1,
            seq_id: 0,
            filter: FilterIndex::Standard,
            slot,
            start_symbol: 2,
            nof_symbols: 3,
            start_prb: 0,
            nof_prb: 51,
            compr_header: 0x91,
        });
        emulator.handle_frame(&frame);

        let frames = sender.frames.lock().unwrap();
        assert_eq!(frames.len(), 3);
        for (i, reply) in frames.iter().enumerate() {
            // Emitted symbols cover [start_symbol, start_symbol + nof).
            assert_eq!(reply[29] & 0x3f, 2 + i as u8);
            assert_eq!(reply[23], 1);
        }
    }

    #[test]
    fn prach_request_triggers_preamble_burst() {
        let (emulator, sender) = emulator();
        let slot = SlotPoint::from_parts(Scs::Khz30, 0, 0, 1);
        let frame = build_ul_cplane_frame(&UlCplaneRequest {
            ru_mac: MacAddress::parse("70:b3:d5:e1:5b:06").unwrap(),
            du_mac: MacAddress::parse("00:11:22:33:44:55").unwrap(),
            eaxc: 4,
            seq_id: 0,
            filter: FilterIndex::PrachPreambleLong,
            slot,
            start_symbol: 0,
            nof_symbols: 1,
            start_prb: 0,
            nof_prb: 72,
            compr_header: 0x91,
        });
        emulator.handle_frame(&frame);

        let frames = sender.frames.lock().unwrap();
        // Long format 0: one preamble symbol.
        assert_eq!(frames.len(), 1);
        // PRACH filter index on the emitted U-Plane frame.
        assert_eq!(frames[0][26] & 0x0f, 0x1);
    }

    #[test]
    fn non_ecpri_frames_are_dropped() {
        let (emulator, _) = emulator();
        let mut frame = vec![0u8; 64];
        frame[12] = 0x08;
        emulator.handle_frame(&frame);
        assert_eq!(emulator.nof_rx_frames(), 0);
        emulator.handle_frame(&[0u8; 10]);
        assert_eq!(emulator.nof_rx_frames(), 0);
    }

    #[test]
    fn unconfigured_eaxc_is_corrupt() {
        let (emulator, sender) = emulator();
        let slot = SlotPoint::from_parts(Scs::Khz30, 0, 0, 1);
        emulator.handle_frame(&request(slot, 7, 0));
        assert_eq!(emulator.nof_corrupt_frames(), 1);
        assert!(sender.frames.lock().unwrap().is_empty());
    }

    #[test]
    fn bad_compression_header_is_corrupt() {
        let (emulator, sender) = emulator();
        let slot = SlotPoint::from_parts(Scs::Khz30, 0, 0, 1);
        let mut frame = request(slot, 0, 0);
        frame[28] = 0x77;
        emulator.handle_frame(&frame);
        assert_eq!(emulator.nof_corrupt_frames(), 1);
        assert!(sender.frames.lock().unwrap().is_empty());
    }

    #[test]
    fn du_uplane_messages_are_counted_not_answered() {
        let (emulator, sender) = emulator();
        let slot = SlotPoint::from_parts(Scs::Khz30, 0, 0, 1);
        let mut frame = request(slot, 0, 0);
        // Downlink U-Plane: direction bit set, eCPRI type 0.
        frame[15] = 0x00;
        frame[22] |= 0x80;
        emulator.handle_frame(&frame);
        assert_eq!(emulator.nof_rx_frames(), 1);
        assert!(sender.frames.lock().unwrap().is_empty());
    }

    #[test]
    fn seq_id_gap_shows_in_statistics() {
        let (emulator, _) = emulator();
        let slot = SlotPoint::from_parts(Scs::Khz30, 0, 0, 1);
        emulator.handle_frame(&request(slot, 0, 0));
        emulator.handle_frame(&request(slot, 0, 5));
        let row = emulator.statistics_row(0);
        // UL CP seq errors column shows one error on eAxC 0, none on 1.
        assert!(row.contains("1/0"), "row: {row}");
    }

    #[test]
    fn statistics_header_and_row_align() {
        let (emulator, _) = emulator();
        let header = RuEmulator::statistics_header();
        let row = emulator.statistics_row(0);
        assert_eq!(
            header.matches('|').count(),
            row.matches('|').count()
        );
    }

    #[test]
    fn canned_frames_split_when_exceeding_mtu() {
        // 100 MHz, 16-bit uncompressed: 273 PRBs * 48 B > 9000 B.
        let mut cfg = config();
        cfg.bandwidth_mhz = 100;
        cfg.compression = CompressionConfig {
            kind: crate::compression::CompressionType::None,
            width: 16,
        };
        let sender = Arc::new(CapturingSender::default());
        let emulator =
            RuEmulator::new(&cfg, Arc::clone(&sender) as Arc<dyn FrameSender>).unwrap();

        let slot = SlotPoint::from_parts(Scs::Khz30, 0, 0, 1);
        let mut frame = request(slot, 0, 0);
        frame[28] = 0x00; // compression header: none/16
        emulator.handle_frame(&frame);
        // Two frames per symbol.
        assert_eq!(sender.frames.lock().unwrap().len(), 28);
    }
}
