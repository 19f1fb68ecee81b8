/*! Configuration objects.

Plain serde-derived structs; loading them from a YAML or JSON file and
wiring a CLI on top is the application's business. Validation that can
fail does so here, at startup, never in the packet path.
*/
use serde::{Deserialize, Serialize};

use crate::compression::{CompressionParams, CompressionType};
use crate::ethernet::MacAddress;
use crate::message::{MAX_NOF_SUPPORTED_EAXC, MAX_SUPPORTED_EAXC_ID_VALUE};
use crate::prach::PrachFormat;
use crate::slot::{CyclicPrefix, Scs};
use crate::{Error, Result};

/// When to warn about Radio Unit frames that never arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnUnreceivedFrames {
    /// Never log unreceived frames.
    Never,
    /// Log every unreceived frame.
    Always,
    /// Log unreceived frames once the first frame was received.
    #[default]
    AfterTrafficDetection,
}

/// VLAN Ethernet parameters of the fronthaul link.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VlanConfig {
    /// Source MAC address (the RU, on the receive side).
    pub src_mac: String,
    /// Destination MAC address (the DU, on the receive side).
    pub dst_mac: String,
    /// Tag control information field.
    pub tci: u16,
    /// Ethernet type, eCPRI unless testing something odd.
    pub ethertype: u16,
}

impl Default for VlanConfig {
    fn default() -> Self {
        Self {
            src_mac: "70:b3:d5:e1:5b:06".to_string(),
            dst_mac: "00:11:22:33:44:55".to_string(),
            tci: 1,
            ethertype: crate::ethernet::ECPRI_ETH_TYPE,
        }
    }
}

/// Declared eAxC streams, up to four per direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EaxcConfig {
    /// Downlink eAxC values.
    pub dl: Vec<u16>,
    /// Uplink eAxC values.
    pub ul: Vec<u16>,
    /// PRACH eAxC values.
    pub prach: Vec<u16>,
}

impl Default for EaxcConfig {
    fn default() -> Self {
        Self {
            dl: vec![0, 1],
            ul: vec![0, 1],
            prach: vec![4, 5],
        }
    }
}

/// Compression settings for one traffic class.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Compression kind.
    pub kind: CompressionType,
    /// Sample width in bits.
    pub width: u8,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            kind: CompressionType::Bfp,
            width: 9,
        }
    }
}

impl From<CompressionConfig> for CompressionParams {
    fn from(value: CompressionConfig) -> Self {
        CompressionParams {
            kind: value.kind,
            data_width: value.width,
        }
    }
}

/// Uplink reception window in microseconds (Ta4 parameters).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RxWindowConfig {
    /// Ta4 minimum.
    pub ta4_min_us: f64,
    /// Ta4 maximum.
    pub ta4_max_us: f64,
}

impl Default for RxWindowConfig {
    fn default() -> Self {
        Self {
            ta4_min_us: 85.0,
            ta4_max_us: 500.0,
        }
    }
}

/// Receive-side configuration of one sector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    /// Radio sector identifier.
    pub sector: u32,
    /// Subcarrier spacing.
    pub scs: Scs,
    /// Cyclic prefix.
    pub cp: CyclicPrefix,
    /// Cell bandwidth in MHz.
    pub cell_bandwidth_mhz: u32,
    /// VLAN parameters.
    pub vlan: VlanConfig,
    /// Declared eAxC streams.
    pub eaxc: EaxcConfig,
    /// Uplink compression.
    pub compression_ul: CompressionConfig,
    /// PRACH compression.
    pub compression_prach: CompressionConfig,
    /// Uplink reception window.
    pub rx_window: RxWindowConfig,
    /// Compression is agreed out of band; ignore on-wire udCompHdr.
    pub static_compression_header: bool,
    /// Ignore the eCPRI payload size field (some RUs mis-pad it).
    pub ignore_ecpri_payload_size: bool,
    /// Ignore the eCPRI sequence id field entirely.
    pub ignore_ecpri_seq_id: bool,
    /// Expect C-Plane context for PRACH traffic.
    pub is_prach_cplane_enabled: bool,
    /// Tolerate long-format PRACH messages stamped with symbolId 0.
    pub ignore_prach_start_symbol: bool,
    /// Log late/lost events as warnings instead of info.
    pub enable_log_warnings_for_lates: bool,
    /// Unreceived-frame warning policy.
    pub warn_unreceived_ru_frames: WarnUnreceivedFrames,
    /// Collect reception window statistics.
    pub enable_rx_window_stats: bool,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            sector: 0,
            scs: Scs::Khz30,
            cp: CyclicPrefix::Normal,
            cell_bandwidth_mhz: 20,
            vlan: VlanConfig::default(),
            eaxc: EaxcConfig::default(),
            compression_ul: CompressionConfig::default(),
            compression_prach: CompressionConfig::default(),
            rx_window: RxWindowConfig::default(),
            static_compression_header: true,
            ignore_ecpri_payload_size: false,
            ignore_ecpri_seq_id: false,
            is_prach_cplane_enabled: true,
            ignore_prach_start_symbol: false,
            enable_log_warnings_for_lates: false,
            warn_unreceived_ru_frames: WarnUnreceivedFrames::default(),
            enable_rx_window_stats: true,
        }
    }
}

impl ReceiverConfig {
    /// Checks ranges and address formats; all failures are fatal.
    pub fn validate(&self) -> Result<()> {
        MacAddress::parse(&self.vlan.src_mac)?;
        MacAddress::parse(&self.vlan.dst_mac)?;
        validate_eaxc_list("ul", &self.eaxc.ul)?;
        validate_eaxc_list("dl", &self.eaxc.dl)?;
        validate_eaxc_list("prach", &self.eaxc.prach)?;
        validate_compression(&self.compression_ul)?;
        validate_compression(&self.compression_prach)?;
        max_nof_prbs(self.cell_bandwidth_mhz, self.scs)?;
        if self.rx_window.ta4_min_us > self.rx_window.ta4_max_us {
            return Err(Error::InvalidConfig(
                "Ta4 minimum exceeds Ta4 maximum".to_string(),
            ));
        }
        Ok(())
    }
}

/// PRACH formats the RU emulator can generate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmulatorPrachFormat {
    /// Long preamble format 0.
    #[default]
    LongFormat0,
    /// Short preamble format B4.
    #[serde(rename = "short_format_b4")]
    ShortFormatB4,
}

impl From<EmulatorPrachFormat> for PrachFormat {
    fn from(value: EmulatorPrachFormat) -> Self {
        match value {
            EmulatorPrachFormat::LongFormat0 => PrachFormat::Format0,
            EmulatorPrachFormat::ShortFormatB4 => PrachFormat::B4,
        }
    }
}

/// RU emulator reception windows in microseconds (T2a parameters).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorRxWindowConfig {
    /// T2a maximum for downlink Control-Plane.
    pub t2a_max_cp_dl_us: f64,
    /// T2a minimum for downlink Control-Plane.
    pub t2a_min_cp_dl_us: f64,
    /// T2a maximum for uplink Control-Plane.
    pub t2a_max_cp_ul_us: f64,
    /// T2a minimum for uplink Control-Plane.
    pub t2a_min_cp_ul_us: f64,
    /// T2a maximum for downlink User-Plane.
    pub t2a_max_up_us: f64,
    /// T2a minimum for downlink User-Plane.
    pub t2a_min_up_us: f64,
}

impl Default for EmulatorRxWindowConfig {
    fn default() -> Self {
        Self {
            t2a_max_cp_dl_us: 500.0,
            t2a_min_cp_dl_us: 258.0,
            t2a_max_cp_ul_us: 500.0,
            t2a_min_cp_ul_us: 285.0,
            t2a_max_up_us: 300.0,
            t2a_min_up_us: 85.0,
        }
    }
}

/// RU emulator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    /// RU emulator MAC address.
    pub ru_mac: String,
    /// DU MAC address.
    pub du_mac: String,
    /// VLAN tag control information used on emitted frames.
    pub vlan_tag: u16,
    /// Operating bandwidth in MHz.
    pub bandwidth_mhz: u32,
    /// Subcarrier spacing.
    pub scs: Scs,
    /// Uplink compression.
    pub compression: CompressionConfig,
    /// Reception windows.
    pub rx_window: EmulatorRxWindowConfig,
    /// Declared eAxC streams.
    pub eaxc: EaxcConfig,
    /// PRACH format for canned PRACH bursts.
    pub prach_format: EmulatorPrachFormat,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            ru_mac: "70:b3:d5:e1:5b:06".to_string(),
            du_mac: "00:11:22:33:44:55".to_string(),
            vlan_tag: 1,
            bandwidth_mhz: 100,
            scs: Scs::Khz30,
            compression: CompressionConfig::default(),
            rx_window: EmulatorRxWindowConfig::default(),
            eaxc: EaxcConfig::default(),
            prach_format: EmulatorPrachFormat::default(),
        }
    }
}

impl EmulatorConfig {
    /// Checks ranges and address formats; all failures are fatal.
    pub fn validate(&self) -> Result<()> {
        MacAddress::parse(&self.ru_mac)?;
        MacAddress::parse(&self.du_mac)?;
        validate_eaxc_list("ul", &self.eaxc.ul)?;
        validate_eaxc_list("dl", &self.eaxc.dl)?;
        validate_eaxc_list("prach", &self.eaxc.prach)?;
        validate_compression(&self.compression)?;
        max_nof_prbs(self.bandwidth_mhz, self.scs)?;
        Ok(())
    }
}

fn validate_eaxc_list(name: &str, list: &[u16]) -> Result<()> {
    if list.len() > MAX_NOF_SUPPORTED_EAXC {
        return Err(Error::InvalidConfig(format!(
            "too many {name} eAxC entries: {} (maximum {MAX_NOF_SUPPORTED_EAXC})",
            list.len()
        )));
    }
    for eaxc in list {
        if *eaxc >= MAX_SUPPORTED_EAXC_ID_VALUE {
            return Err(Error::InvalidConfig(format!(
                "{name} eAxC value '{eaxc}' out of range"
            )));
        }
    }
    Ok(())
}

fn validate_compression(config: &CompressionConfig) -> Result<()> {
    if config.width == 0 || config.width > 16 {
        return Err(Error::InvalidConfig(format!(
            "compression width '{}' out of range",
            config.width
        )));
    }
    Ok(())
}

/// Maximum number of PRBs for the given bandwidth and subcarrier
/// spacing (TS 38.104, FR1).
pub fn max_nof_prbs(bandwidth_mhz: u32, scs: Scs) -> Result<u16> {
    let table: &[(u32, u16)] = match scs {
        Scs::Khz15 => &[
            (5, 25),
            (10, 52),
            (15, 79),
            (20, 106),
            (25, 133),
            (30, 160),
            (40, 216),
            (50, 270),
        ],
        Scs::Khz30 => &[
            (5, 11),
            (10, 24),
            (15, 38),
            (20, 51),
            (25, 65),
            (30, 78),
            (40, 106),
            (50, 133),
            (60, 162),
            (70, 189),
            (80, 217),
            (90, 245),
            (100, 273),
        ],
        Scs::Khz60 => &[
            (10, 11),
            (15, 18),
            (20, 24),
            (25, 31),
            (30, 38),
            (40, 51),
            (50, 65),
            (60, 79),
            (70, 93),
            (80, 107),
            (90, 121),
            (100, 135),
        ],
        Scs::Khz120 => {
            return Err(Error::InvalidConfig(
                "120 kHz subcarrier spacing is FR2 only".to_string(),
            ));
        }
    };
    table
        .iter()
        .find(|(bw, _)| *bw == bandwidth_mhz)
        .map(|(_, prbs)| *prbs)
        .ok_or_else(|| {
            Error::InvalidConfig(format!(
                "unsupported bandwidth '{bandwidth_mhz}' MHz for {} kHz",
                scs.khz()
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        ReceiverConfig::default().validate().unwrap();
        EmulatorConfig::default().validate().unwrap();
    }

    #[test]
    fn prb_table() {
        assert_eq!(max_nof_prbs(20, Scs::Khz30).unwrap(), 51);
        assert_eq!(max_nof_prbs(100, Scs::Khz30).unwrap(), 273);
        assert_eq!(max_nof_prbs(20, Scs::Khz15).unwrap(), 106);
        assert_eq!(max_nof_prbs(100, Scs::Khz60).unwrap(), 135);
        assert!(max_nof_prbs(7, Scs::Khz30).is_err());
        assert!(max_nof_prbs(5, Scs::Khz60).is_err());
        assert!(max_nof_prbs(20, Scs::Khz120).is_err());
    }

    #[test]
    fn rejects_bad_eaxc() {
        let mut config = ReceiverConfig::default();
        config.eaxc.ul = vec![0, 1, 2, 3, 4];
        assert!(config.validate().is_err());

        let mut config = ReceiverConfig::default();
        config.eaxc.prach = vec![32];
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_bad_mac() {
        let config = ReceiverConfig {
            vlan: VlanConfig {
                src_mac: "nope".to_string(),
                ..VlanConfig::default()
            },
            ..ReceiverConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidMacAddress(_))
        ));
    }

    #[test]
    fn rejects_inverted_window() {
        let config = ReceiverConfig {
            rx_window: RxWindowConfig {
                ta4_min_us: 600.0,
                ta4_max_us: 500.0,
            },
            ..ReceiverConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: ReceiverConfig = serde_json::from_str(
            r#"{
                "scs": "30kHz",
                "cell_bandwidth_mhz": 20,
                "eaxc": {"ul": [4, 5], "dl": [0, 1], "prach": [8]},
                "ignore_ecpri_payload_size": true,
                "warn_unreceived_ru_frames": "after_traffic_detection"
            }"#,
        )
        .unwrap();
        assert_eq!(config.scs, Scs::Khz30);
        assert_eq!(config.eaxc.ul, vec![4, 5]);
        assert!(config.ignore_ecpri_payload_size);
        assert!(config.is_prach_cplane_enabled);
        assert_eq!(
            config.warn_unreceived_ru_frames,
            WarnUnreceivedFrames::AfterTrafficDetection
        );
        config.validate().unwrap();
    }

    #[test]
    fn emulator_prach_format_conversion() {
        assert_eq!(
            PrachFormat::from(EmulatorPrachFormat::LongFormat0),
            PrachFormat::Format0
        );
        assert_eq!(
            PrachFormat::from(EmulatorPrachFormat::ShortFormatB4),
            PrachFormat::B4
        );
    }
}
