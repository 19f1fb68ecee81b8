//! End-to-end reception scenarios: full Ethernet frames in, notifier
//! callbacks out.

use std::sync::{Arc, Mutex};

use anyhow::Result;

use fronthaul::compression::{CompressionParams, CompressionType};
use fronthaul::config::{CompressionConfig, EaxcConfig, ReceiverConfig, VlanConfig};
use fronthaul::cplane::UlCplaneContext;
use fronthaul::ecpri;
use fronthaul::ethernet::{
    ECPRI_ETH_TYPE, FrameNotifier, MacAddress, ReceiverController, RxBuffer, VlanFrameBuilder,
    VlanFrameParams,
};
use fronthaul::executor::InlineExecutor;
use fronthaul::grid::{ResourceGridContext, SharedResourceGrid, new_shared_grid};
use fronthaul::message::{DataDirection, FilterIndex};
use fronthaul::notifier::{UplaneRxSymbolContext, UplaneRxSymbolNotifier};
use fronthaul::prach::{
    PrachBufferContext, PrachFormat, SharedPrachBuffer, new_shared_prach_buffer,
};
use fronthaul::receiver::Receiver;
use fronthaul::slot::{Scs, SlotPoint, SlotSymbolPoint};
use fronthaul::uplane;

const SRC_MAC: &str = "80:61:5f:0d:df:aa";
const DST_MAC: &str = "00:11:22:33:44:55";
const NOF_PRBS: u16 = 51;

#[derive(Default)]
struct Recorder {
    uplink: Mutex<Vec<(UplaneRxSymbolContext, bool)>>,
    prach: Mutex<Vec<PrachBufferContext>>,
}

impl UplaneRxSymbolNotifier for Recorder {
    fn on_new_uplink_symbol(
        &self,
        context: &UplaneRxSymbolContext,
        _grid: SharedResourceGrid,
        is_valid: bool,
    ) {
        self.uplink.lock().unwrap().push((*context, is_valid));
    }

    fn on_new_prach_window_data(&self, context: &PrachBufferContext, _buffer: SharedPrachBuffer) {
        self.prach.lock().unwrap().push(*context);
    }
}

struct NullEthReceiver;
impl ReceiverController for NullEthReceiver {
    fn start(&self, _notifier: Arc<dyn FrameNotifier>) {}
    fn stop(&self) {}
}

fn config() -> ReceiverConfig {
    ReceiverConfig {
        cell_bandwidth_mhz: 20,
        scs: Scs::Khz30,
        compression_ul: CompressionConfig {
            kind: CompressionType::None,
            width: 16,
        },
        compression_prach: CompressionConfig {
            kind: CompressionType::None,
            width: 16,
        },
        eaxc: EaxcConfig {
            dl: vec![0, 1],
            ul: vec![4, 5],
            prach: vec![8],
        },
        vlan: VlanConfig {
            src_mac: SRC_MAC.to_string(),
            dst_mac: DST_MAC.to_string(),
            tci: 2,
            ethertype: ECPRI_ETH_TYPE,
        },
        ..ReceiverConfig::default()
    }
}

fn build(config: ReceiverConfig) -> (Receiver, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    let receiver = Receiver::new(
        &config,
        Arc::new(NullEthReceiver),
        Arc::new(InlineExecutor),
        Arc::new(InlineExecutor),
        Arc::clone(&recorder) as Arc<dyn UplaneRxSymbolNotifier>,
    )
    .unwrap();
    (receiver, recorder)
}

/// Builds a complete VLAN Ethernet frame with one U-Plane section.
fn uplane_frame(
    eaxc: u16,
    seq_id: u16,
    filter: FilterIndex,
    slot: SlotPoint,
    symbol: u8,
    start_prb: u16,
    nof_prbs: u16,
) -> Vec<u8> {
    let compr = CompressionParams {
        kind: CompressionType::None,
        data_width: 16,
    };
    let mut ofh = vec![0u8; 10];
    uplane::write_radio_app_header(&mut ofh, DataDirection::Uplink, filter, slot, symbol);
    uplane::write_section_header(&mut ofh[4..], 0, start_prb, nof_prbs, &compr);
    ofh.extend(std::iter::repeat_n(
        0x11u8,
        usize::from(nof_prbs) * compr.prb_bytes(),
    ));

    let mut ecpri_pdu = vec![0u8; 8];
    ecpri::write_iq_data_header(&mut ecpri_pdu, (ofh.len() + 4) as u16, eaxc, seq_id);
    ecpri_pdu.extend_from_slice(&ofh);

    VlanFrameBuilder::new(VlanFrameParams {
        mac_dst_address: MacAddress::parse(DST_MAC).unwrap(),
        mac_src_address: MacAddress::parse(SRC_MAC).unwrap(),
        tci: Some(2),
        eth_type: ECPRI_ETH_TYPE,
    })
    .build(&ecpri_pdu)
}

fn install_uplink_context(receiver: &Receiver, slot: SlotPoint, eaxc: u16, nof_ports: usize) {
    receiver.ul_cplane_repository().add(
        slot,
        eaxc,
        UlCplaneContext {
            filter_index: FilterIndex::Standard,
            start_symbol: 0,
            prb_start: 0,
            nof_prb: NOF_PRBS,
            nof_symbols: 14,
        },
    );
    receiver.request_uplink_slot(
        ResourceGridContext { slot, sector: 0 },
        new_shared_grid(nof_ports, 14, usize::from(NOF_PRBS) * 12),
        0..14,
    );
}

/// Ticks the OTA clock at a point whose sweep cannot touch `slot`.
fn bind_pending(receiver: &Receiver, slot: SlotPoint) {
    // Internal point lands mid previous slot: pops nothing there.
    receiver.on_new_symbol(SlotSymbolPoint::new(slot, 5, 14));
}

#[test]
fn e1_happy_path_uplink() -> Result<()> {
    let (receiver, recorder) = build(config());
    let slot = SlotPoint::from_parts(Scs::Khz30, 0, 0, 1);
    install_uplink_context(&receiver, slot, 4, 1);
    bind_pending(&receiver, slot);

    receiver
        .frame_notifier()
        .on_new_frame(RxBuffer::new(uplane_frame(
            4,
            0x0100,
            FilterIndex::Standard,
            slot,
            0,
            0,
            NOF_PRBS,
        )));

    let delivered = recorder.uplink.lock().unwrap();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].0.slot, slot);
    assert_eq!(delivered[0].0.symbol, 0);
    assert!(delivered[0].1);
    assert_eq!(receiver.message_receiver().nof_dropped_messages(), 0);
    Ok(())
}

#[test]
fn e2_seq_id_skip_ahead() -> Result<()> {
    let (receiver, recorder) = build(config());
    let slot = SlotPoint::from_parts(Scs::Khz30, 0, 0, 1);
    install_uplink_context(&receiver, slot, 4, 1);
    bind_pending(&receiver, slot);

    let notifier = receiver.frame_notifier();
    notifier.on_new_frame(RxBuffer::new(uplane_frame(
        4,
        0x0100,
        FilterIndex::Standard,
        slot,
        0,
        0,
        NOF_PRBS,
    )));
    notifier.on_new_frame(RxBuffer::new(uplane_frame(
        4,
        0x0500,
        FilterIndex::Standard,
        slot,
        1,
        0,
        NOF_PRBS,
    )));

    // Both messages processed; three sequence ids were lost in between.
    assert_eq!(recorder.uplink.lock().unwrap().len(), 2);
    assert_eq!(receiver.message_receiver().nof_skipped_messages(), 3);
    assert_eq!(receiver.message_receiver().nof_dropped_messages(), 0);
    Ok(())
}

#[test]
fn e3_seq_id_from_past() -> Result<()> {
    let (receiver, recorder) = build(config());
    let slot = SlotPoint::from_parts(Scs::Khz30, 0, 0, 1);
    install_uplink_context(&receiver, slot, 4, 1);
    bind_pending(&receiver, slot);

    let notifier = receiver.frame_notifier();
    notifier.on_new_frame(RxBuffer::new(uplane_frame(
        4,
        0x0500,
        FilterIndex::Standard,
        slot,
        0,
        0,
        NOF_PRBS,
    )));
    notifier.on_new_frame(RxBuffer::new(uplane_frame(
        4,
        0x0400,
        FilterIndex::Standard,
        slot,
        1,
        0,
        NOF_PRBS,
    )));

    assert_eq!(recorder.uplink.lock().unwrap().len(), 1);
    assert_eq!(receiver.message_receiver().nof_dropped_messages(), 1);

    // The expected counter did not move: 6 is next in line.
    notifier.on_new_frame(RxBuffer::new(uplane_frame(
        4,
        0x0600,
        FilterIndex::Standard,
        slot,
        1,
        0,
        NOF_PRBS,
    )));
    assert_eq!(recorder.uplink.lock().unwrap().len(), 2);
    assert_eq!(receiver.message_receiver().nof_skipped_messages(), 0);
    Ok(())
}

#[test]
fn e4_prb_range_mismatch() -> Result<()> {
    let (receiver, recorder) = build(config());
    let slot = SlotPoint::from_parts(Scs::Khz30, 0, 0, 1);
    // C-Plane grants PRBs 10..30 only.
    receiver.ul_cplane_repository().add(
        slot,
        4,
        UlCplaneContext {
            filter_index: FilterIndex::Standard,
            start_symbol: 0,
            prb_start: 10,
            nof_prb: 20,
            nof_symbols: 14,
        },
    );
    receiver.request_uplink_slot(
        ResourceGridContext { slot, sector: 0 },
        new_shared_grid(1, 14, usize::from(NOF_PRBS) * 12),
        0..14,
    );
    bind_pending(&receiver, slot);

    // U-Plane claims PRBs 5..15.
    receiver
        .frame_notifier()
        .on_new_frame(RxBuffer::new(uplane_frame(
            4,
            0x0100,
            FilterIndex::Standard,
            slot,
            0,
            5,
            10,
        )));

    assert_eq!(receiver.message_receiver().nof_dropped_messages(), 1);
    assert!(recorder.uplink.lock().unwrap().is_empty());
    Ok(())
}

#[test]
fn e5_window_close_with_missing_port() -> Result<()> {
    let (receiver, recorder) = build(ReceiverConfig {
        rx_window: fronthaul::config::RxWindowConfig {
            ta4_min_us: 85.0,
            ta4_max_us: 300.0,
        },
        ..config()
    });
    let slot = SlotPoint::from_parts(Scs::Khz30, 0, 0, 1);
    // Two ports; only port 0 (eAxC 4) will send.
    install_uplink_context(&receiver, slot, 4, 2);
    bind_pending(&receiver, slot);

    receiver
        .frame_notifier()
        .on_new_frame(RxBuffer::new(uplane_frame(
            4,
            0x0100,
            FilterIndex::Standard,
            slot,
            0,
            0,
            NOF_PRBS,
        )));
    assert!(recorder.uplink.lock().unwrap().is_empty());

    // A Ta4 window of [85, 300] us at 30 kHz gives sym_end = 8, so
    // the notification delay is 9 symbols: the sweep for (slot,
    // symbol 0) runs on the OTA tick at (slot, symbol 9).
    receiver.on_new_symbol(SlotSymbolPoint::new(slot, 9, 14));

    let delivered = recorder.uplink.lock().unwrap();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].0.symbol, 0);
    assert!(!delivered[0].1);
    let metrics = receiver.collect_metrics();
    assert_eq!(metrics.closed_window.nof_missed_uplink_symbols, 1);
    Ok(())
}

#[test]
fn e6_prach_long_format_ignore_start_symbol() -> Result<()> {
    let (receiver, recorder) = build(ReceiverConfig {
        ignore_prach_start_symbol: true,
        ..config()
    });
    let slot = SlotPoint::from_parts(Scs::Khz30, 0, 0, 1);

    receiver.prach_cplane_repository().add(
        slot,
        8,
        UlCplaneContext {
            filter_index: FilterIndex::PrachPreambleLong,
            start_symbol: 2,
            prb_start: 0,
            nof_prb: 72,
            nof_symbols: 1,
        },
    );
    receiver.request_prach_window(
        PrachBufferContext {
            slot,
            sector: 0,
            format: PrachFormat::Format0,
            nof_ports: 1,
            start_symbol: 2,
        },
        new_shared_prach_buffer(PrachFormat::Format0, 1),
    );
    bind_pending(&receiver, slot);

    // The RU stamps symbolId 0 even though the C-Plane said 2.
    receiver
        .frame_notifier()
        .on_new_frame(RxBuffer::new(uplane_frame(
            8,
            0x0100,
            FilterIndex::PrachPreambleLong,
            slot,
            0,
            0,
            72,
        )));

    let delivered = recorder.prach.lock().unwrap();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].slot, slot);
    assert_eq!(delivered[0].format, PrachFormat::Format0);
    assert_eq!(receiver.message_receiver().nof_dropped_messages(), 0);
    Ok(())
}

#[test]
fn out_of_order_symbols_are_reordered() -> Result<()> {
    let (receiver, recorder) = build(config());
    let slot = SlotPoint::from_parts(Scs::Khz30, 0, 0, 0);
    install_uplink_context(&receiver, slot, 4, 1);
    bind_pending(&receiver, slot.plus_slots(2));

    let notifier = receiver.frame_notifier();
    // Symbol 1 completes before symbol 0.
    notifier.on_new_frame(RxBuffer::new(uplane_frame(
        4,
        0x0100,
        FilterIndex::Standard,
        slot,
        1,
        0,
        NOF_PRBS,
    )));
    assert!(recorder.uplink.lock().unwrap().is_empty());
    notifier.on_new_frame(RxBuffer::new(uplane_frame(
        4,
        0x0200,
        FilterIndex::Standard,
        slot,
        0,
        0,
        NOF_PRBS,
    )));

    let delivered = recorder.uplink.lock().unwrap();
    let symbols: Vec<u8> = delivered.iter().map(|(c, _)| c.symbol).collect();
    assert_eq!(symbols, vec![0, 1]);
    assert!(delivered.iter().all(|(_, valid)| *valid));
    Ok(())
}

#[test]
fn grid_carries_decoded_samples() -> Result<()> {
    // Capture the delivered grid and check the IQ landed in place.
    #[derive(Default)]
    struct GridCatcher {
        grids: Mutex<Vec<SharedResourceGrid>>,
    }
    impl UplaneRxSymbolNotifier for GridCatcher {
        fn on_new_uplink_symbol(
            &self,
            _context: &UplaneRxSymbolContext,
            grid: SharedResourceGrid,
            _is_valid: bool,
        ) {
            self.grids.lock().unwrap().push(grid);
        }
        fn on_new_prach_window_data(
            &self,
            _context: &PrachBufferContext,
            _buffer: SharedPrachBuffer,
        ) {
        }
    }

    let catcher = Arc::new(GridCatcher::default());
    let receiver = Receiver::new(
        &config(),
        Arc::new(NullEthReceiver),
        Arc::new(InlineExecutor),
        Arc::new(InlineExecutor),
        Arc::clone(&catcher) as Arc<dyn UplaneRxSymbolNotifier>,
    )
    .unwrap();

    let slot = SlotPoint::from_parts(Scs::Khz30, 0, 0, 1);
    install_uplink_context(&receiver, slot, 4, 1);
    bind_pending(&receiver, slot);

    receiver
        .frame_notifier()
        .on_new_frame(RxBuffer::new(uplane_frame(
            4,
            0x0100,
            FilterIndex::Standard,
            slot,
            3,
            0,
            NOF_PRBS,
        )));

    let grids = catcher.grids.lock().unwrap();
    assert_eq!(grids.len(), 1);
    let grid = grids[0].lock().unwrap();
    // Payload byte pattern 0x1111 dequantizes to 0x1111 / 2^15.
    let expected = 0x1111 as f32 / 32768.0;
    let view = grid.view(0, 3);
    assert!((view[0].re - expected).abs() < 1e-4);
    assert!((view[0].im - expected).abs() < 1e-4);
    assert!((view[611].im - expected).abs() < 1e-4);
    Ok(())
}
