//! DU receiver and RU emulator connected by an in-process link.
//!
//! Drives an OTA symbol clock, sends an uplink C-Plane request per
//! slot, lets the emulator answer with canned U-Plane bursts, and
//! prints the emulator statistics table once a second.
//!
//! ```text
//! cargo run --example loopback -- -v --duration 10
//! ```
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use clap::Parser;

use fronthaul::config::{EaxcConfig, EmulatorConfig, ReceiverConfig, VlanConfig};
use fronthaul::cplane::UlCplaneContext;
use fronthaul::emulator::{RuEmulator, UlCplaneRequest, build_ul_cplane_frame};
use fronthaul::ethernet::{ECPRI_ETH_TYPE, FrameNotifier, FrameSender, MacAddress, RxBuffer};
use fronthaul::executor::InlineExecutor;
use fronthaul::grid::{ResourceGridContext, SharedResourceGrid, new_shared_grid};
use fronthaul::message::FilterIndex;
use fronthaul::notifier::{UplaneRxSymbolContext, UplaneRxSymbolNotifier};
use fronthaul::prach::{PrachBufferContext, SharedPrachBuffer};
use fronthaul::receiver::Receiver;
use fronthaul::slot::{Scs, SlotPoint, SlotSymbolPoint};

const RU_MAC: &str = "70:b3:d5:e1:5b:06";
const DU_MAC: &str = "00:11:22:33:44:55";

#[derive(Parser)]
#[command(about = "Open Fronthaul DU/RU loopback demo")]
struct Opt {
    /// Verbosity level (repeat for more).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Seconds to run; default is until interrupted.
    #[arg(long)]
    duration: Option<u64>,

    /// Cell bandwidth in MHz.
    #[arg(long, default_value_t = 20)]
    bandwidth: u32,
}

/// Stands in for the PHY: counts delivered symbols.
#[derive(Default)]
struct PhyStub {
    valid_symbols: AtomicU64,
    invalid_symbols: AtomicU64,
}

impl UplaneRxSymbolNotifier for PhyStub {
    fn on_new_uplink_symbol(
        &self,
        _context: &UplaneRxSymbolContext,
        _grid: SharedResourceGrid,
        is_valid: bool,
    ) {
        if is_valid {
            self.valid_symbols.fetch_add(1, Ordering::Relaxed);
        } else {
            self.invalid_symbols.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn on_new_prach_window_data(&self, _context: &PrachBufferContext, _buffer: SharedPrachBuffer) {}
}

/// Forwards sent frames straight into a frame notifier.
#[derive(Default)]
struct LoopbackLink {
    notifier: Mutex<Option<Arc<dyn FrameNotifier>>>,
}

impl FrameSender for LoopbackLink {
    fn send(&self, frames: &[&[u8]]) {
        let notifier = self.notifier.lock().unwrap();
        if let Some(notifier) = notifier.as_ref() {
            for frame in frames {
                notifier.on_new_frame(RxBuffer::new(frame.to_vec()));
            }
        }
    }
}

fn main() -> Result<()> {
    let opt = Opt::parse();
    stderrlog::new()
        .module(module_path!())
        .module("fronthaul")
        .verbosity(usize::from(opt.verbose) + 1)
        .init()?;

    let eaxc = EaxcConfig {
        dl: vec![0, 1],
        ul: vec![4],
        prach: vec![8],
    };
    let receiver_config = ReceiverConfig {
        cell_bandwidth_mhz: opt.bandwidth,
        eaxc: eaxc.clone(),
        vlan: VlanConfig {
            src_mac: RU_MAC.to_string(),
            dst_mac: DU_MAC.to_string(),
            tci: 2,
            ethertype: ECPRI_ETH_TYPE,
        },
        ..ReceiverConfig::default()
    };
    let emulator_config = EmulatorConfig {
        ru_mac: RU_MAC.to_string(),
        du_mac: DU_MAC.to_string(),
        vlan_tag: 2,
        bandwidth_mhz: opt.bandwidth,
        eaxc,
        ..EmulatorConfig::default()
    };
    let nof_prbs = fronthaul::config::max_nof_prbs(opt.bandwidth, Scs::Khz30)?;

    // Wire the two sides together.
    let phy = Arc::new(PhyStub::default());
    let ru_to_du = Arc::new(LoopbackLink::default());
    let receiver = Receiver::new(
        &receiver_config,
        Arc::new(NullEthReceiver),
        Arc::new(InlineExecutor),
        Arc::new(InlineExecutor),
        Arc::clone(&phy) as Arc<dyn UplaneRxSymbolNotifier>,
    )?;
    *ru_to_du.notifier.lock().unwrap() = Some(receiver.frame_notifier());
    let emulator = Arc::new(RuEmulator::new(
        &emulator_config,
        Arc::clone(&ru_to_du) as Arc<dyn FrameSender>,
    )?);

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || running.store(false, Ordering::Relaxed))?;
    }

    let symbol_duration =
        std::time::Duration::from_nanos(Scs::Khz30.symbol_duration_ns() as u64);
    let started = std::time::Instant::now();
    let mut next_stats = std::time::Instant::now() + std::time::Duration::from_secs(1);
    let mut du_seq_id: u8 = 0;
    let mut slot = SlotPoint::new(Scs::Khz30, 0, 0);

    println!("Running. Press Ctrl-C to stop.");
    println!("{}", RuEmulator::statistics_header());

    while running.load(Ordering::Relaxed) {
        if let Some(duration) = opt.duration {
            if started.elapsed().as_secs() >= duration {
                break;
            }
        }

        // The DU requests uplink reception for the next slot and tells
        // the emulator about it.
        let target = slot.plus_slots(1);
        receiver.ul_cplane_repository().add(
            target,
            4,
            UlCplaneContext {
                filter_index: FilterIndex::Standard,
                start_symbol: 0,
                prb_start: 0,
                nof_prb: nof_prbs,
                nof_symbols: 14,
            },
        );
        receiver.request_uplink_slot(
            ResourceGridContext {
                slot: target,
                sector: 0,
            },
            new_shared_grid(1, 14, usize::from(nof_prbs) * 12),
            0..14,
        );
        emulator.handle_frame(&build_ul_cplane_frame(&UlCplaneRequest {
            ru_mac: MacAddress::parse(RU_MAC)?,
            du_mac: MacAddress::parse(DU_MAC)?,
            eaxc: 4,
            seq_id: du_seq_id,
            filter: FilterIndex::Standard,
            slot: target,
            start_symbol: 0,
            nof_symbols: 14,
            start_prb: 0,
            nof_prb: nof_prbs,
            compr_header: 0x91,
        }));
        du_seq_id = du_seq_id.wrapping_add(1);

        // Tick the OTA clock through the current slot.
        for symbol in 0..14 {
            let point = SlotSymbolPoint::new(slot, symbol, 14);
            receiver.on_new_symbol(point);
            emulator.on_new_symbol(point);
            std::thread::sleep(symbol_duration);
        }
        slot = slot.plus_slots(1);

        if std::time::Instant::now() >= next_stats {
            next_stats += std::time::Duration::from_secs(1);
            println!("{}", emulator.statistics_row(0));
        }
    }

    println!(
        "Delivered {} valid and {} window-closed uplink symbols.",
        phy.valid_symbols.load(Ordering::Relaxed),
        phy.invalid_symbols.load(Ordering::Relaxed)
    );
    Ok(())
}

/// The demo drives frames by hand; no background Ethernet receiver.
struct NullEthReceiver;
impl fronthaul::ethernet::ReceiverController for NullEthReceiver {
    fn start(&self, _notifier: Arc<dyn FrameNotifier>) {}
    fn stop(&self) {}
}
