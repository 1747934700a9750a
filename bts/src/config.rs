//! YAML configuration of the BTS
//!
//! Describes the carriers and their timeslots, the scheduler advances and
//! clock tunables, and the simulated transceiver.

use anyhow::{anyhow, Context};
use common::{Arfcn, FrameNumber, Tn, TRX_NR_TS};
use interfaces::sim::SimClockConfig;
use scheduler::{Bts, ClockConfig, DispatchConfig, HoppingParams, Trx};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BtsConfig {
    /// Scheduler configuration
    #[serde(default)]
    pub phy: PhyConfig,
    /// Carriers, the first one is C0
    pub trx: Vec<TrxConfig>,
    /// Simulated transceiver
    #[serde(default)]
    pub sim: SimConfig,
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

/// Scheduler configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PhyConfig {
    /// Frame and RTS advance
    #[serde(flatten)]
    pub dispatch: DispatchConfig,
    /// Clock discipline tunables
    #[serde(default)]
    pub clock: ClockConfig,
}

/// One carrier
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrxConfig {
    /// Absolute radio frequency channel number
    pub arfcn: Arfcn,
    /// Whether the carrier is powered on at startup
    #[serde(default = "default_powered")]
    pub powered: bool,
    /// Timeslots carrying traffic
    #[serde(default)]
    pub active_ts: Vec<u8>,
    /// Requested transmit attenuation in dB
    #[serde(default)]
    pub att_db: u8,
    /// Frequency hopping timeslots
    #[serde(default)]
    pub hopping: Vec<HoppingConfig>,
}

fn default_powered() -> bool {
    true
}

/// Frequency hopping of one timeslot
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HoppingConfig {
    /// Timeslot number
    pub tn: u8,
    /// Hopping sequence number (0 = cyclic)
    pub hsn: u8,
    /// Mobile allocation index offset
    pub maio: u8,
    /// Mobile allocation
    pub arfcn_list: Vec<Arfcn>,
}

/// Simulated transceiver configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimConfig {
    /// First frame number reported
    #[serde(default)]
    pub start_fn: u32,
    /// Frames between clock indications
    #[serde(default = "default_ind_interval")]
    pub clock_ind_interval: u32,
    /// Random clock indication jitter in microseconds
    #[serde(default)]
    pub jitter_us: u64,
    /// Transceiver clock error in ppm
    #[serde(default)]
    pub drift_ppm: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            start_fn: 0,
            clock_ind_interval: default_ind_interval(),
            jitter_us: 0,
            drift_ppm: 0.0,
        }
    }
}

fn default_ind_interval() -> u32 {
    216
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Default log level
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Seconds between statistics reports
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            stats_interval_secs: default_stats_interval(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_stats_interval() -> u64 {
    5
}

impl BtsConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_yaml_str(&contents)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml_str(contents: &str) -> anyhow::Result<Self> {
        let config: BtsConfig = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Single non-hopping carrier on `arfcn` with default settings
    pub fn single_carrier(arfcn: Arfcn) -> Self {
        Self {
            phy: PhyConfig::default(),
            trx: vec![TrxConfig {
                arfcn,
                powered: true,
                active_ts: Vec::new(),
                att_db: 0,
                hopping: Vec::new(),
            }],
            sim: SimConfig::default(),
            log: LogConfig::default(),
        }
    }

    /// Check values serde cannot
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.trx.is_empty() {
            return Err(anyhow!("At least one TRX must be configured"));
        }
        if self.sim.start_fn >= FrameNumber::HYPERFRAME {
            return Err(anyhow!("Invalid start FN: {}", self.sim.start_fn));
        }
        if self.sim.clock_ind_interval == 0 {
            return Err(anyhow!("Clock indication interval must be at least one frame"));
        }
        self.phy.clock.validate()?;

        for (i, trx) in self.trx.iter().enumerate() {
            for &tn in trx.active_ts.iter().chain(trx.hopping.iter().map(|h| &h.tn)) {
                if tn as usize >= TRX_NR_TS {
                    return Err(anyhow!("TRX {}: invalid timeslot {}", i, tn));
                }
            }
        }
        Ok(())
    }

    /// Build the carrier topology
    pub fn build_bts(&self) -> anyhow::Result<Bts> {
        let mut carriers = Vec::with_capacity(self.trx.len());

        for (i, cfg) in self.trx.iter().enumerate() {
            let mut trx = Trx::new(cfg.arfcn);
            for hop in &cfg.hopping {
                let tn = Tn::new(hop.tn).ok_or_else(|| anyhow!("TRX {}: invalid timeslot {}", i, hop.tn))?;
                let params = HoppingParams::new(hop.hsn, hop.maio, hop.arfcn_list.clone())
                    .with_context(|| format!("TRX {} TS {}", i, tn))?;
                trx = trx.with_hopping(tn, params);
            }
            carriers.push(trx);
        }

        Ok(Bts::new(carriers)?)
    }

    /// Frame and RTS advance
    pub fn dispatch_config(&self) -> DispatchConfig {
        self.phy.dispatch
    }

    /// Clock discipline tunables
    pub fn clock_config(&self) -> ClockConfig {
        self.phy.clock
    }

    /// Simulated clock
    pub fn sim_clock_config(&self) -> SimClockConfig {
        SimClockConfig {
            start_fn: FrameNumber::new(self.sim.start_fn),
            ind_interval_frames: self.sim.clock_ind_interval,
            jitter_us: self.sim.jitter_us,
            drift_ppm: self.sim.drift_ppm,
        }
    }
}
