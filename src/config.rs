//! Configuration management for dram-emu.
//!
//! Device configuration is loaded from a single TOML file with sections:
//!
//! ```toml
//! [system]
//! protocol = "DDR4"
//! channels = 1
//! ranks = 2
//! bankgroups = 4
//! banks_per_group = 4
//! rows = 65536
//! columns = 1024
//! device_width = 8
//! bus_width = 64
//! burst_length = 8
//! address_mapping = "rochrababgco"
//! row_buf_policy = "OPEN_PAGE"
//! refresh_policy = "RANK_STAGGERED"
//!
//! [timing]
//! cl = 16
//! # ... (all values in memory-clock cycles)
//! ```
//!
//! All cross-section derived quantities (total banks, request size, address
//! field bit positions) are computed once by [`Config::from_toml_str`], so
//! the rest of the simulator only ever sees validated, ready-to-use values.

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

use crate::dram::Address;

/// Configuration load/validation error. Fatal at init.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML decode error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid address mapping {0:?}: {1}")]
    AddressMapping(String, String),

    #[error("invalid geometry: {0}")]
    Geometry(String),
}

/// Row-buffer management policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RowBufPolicy {
    /// Leave rows open after access; precharge on conflict.
    OpenPage,
    /// Issue fused auto-precharge data commands.
    ClosePage,
}

/// Command queue granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueStructure {
    PerBank,
    PerRank,
}

/// Refresh distribution policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefreshPolicy {
    /// One rank refreshed every tREFI / ranks cycles, round-robin.
    RankStaggered,
    /// All ranks refreshed together every tREFI cycles.
    RankSimultaneous,
    /// One bank refreshed every tREFIb / banks cycles, round-robin.
    BankStaggered,
}

#[derive(Debug, Clone, Deserialize)]
struct SystemSection {
    #[serde(default = "default_protocol")]
    protocol: String,
    channels: usize,
    ranks: usize,
    bankgroups: usize,
    banks_per_group: usize,
    rows: usize,
    columns: usize,
    device_width: usize,
    bus_width: usize,
    burst_length: usize,
    address_mapping: String,
    #[serde(default = "default_row_buf_policy")]
    row_buf_policy: RowBufPolicy,
    #[serde(default = "default_refresh_policy")]
    refresh_policy: RefreshPolicy,
}

fn default_protocol() -> String {
    "DDR4".to_string()
}

fn default_row_buf_policy() -> RowBufPolicy {
    RowBufPolicy::OpenPage
}

fn default_refresh_policy() -> RefreshPolicy {
    RefreshPolicy::RankStaggered
}

#[derive(Debug, Clone, Deserialize)]
struct TimingSection {
    #[serde(default)]
    al: u64,
    cl: u64,
    cwl: u64,
    t_rcd: u64,
    t_rp: u64,
    t_ras: u64,
    t_rfc: u64,
    #[serde(default)]
    t_rfcb: u64,
    t_refi: u64,
    #[serde(default)]
    t_refib: u64,
    t_rrd_s: u64,
    t_rrd_l: u64,
    t_wtr_s: u64,
    t_wtr_l: u64,
    t_faw: u64,
    t_wr: u64,
    t_ccd_s: u64,
    t_ccd_l: u64,
    t_rtp: u64,
    #[serde(default = "default_one")]
    t_rtrs: u64,
    #[serde(default)]
    t_cke: u64,
    #[serde(default)]
    t_ckesr: u64,
    #[serde(default)]
    t_xs: u64,
    #[serde(default)]
    t_xp: u64,
    /// 0 disables the 32-activation window.
    #[serde(default)]
    t_32aw: u64,
    #[serde(default)]
    t_ppd: u64,
}

fn default_one() -> u64 {
    1
}

#[derive(Debug, Clone, Deserialize)]
struct QueueSection {
    cmd_queue_size: usize,
    trans_queue_size: usize,
    #[serde(default = "default_queue_structure")]
    queue_structure: QueueStructure,
    #[serde(default)]
    unified_queue: bool,
    #[serde(default = "default_write_drain_threshold")]
    write_drain_threshold: usize,
}

fn default_queue_structure() -> QueueStructure {
    QueueStructure::PerBank
}

fn default_write_drain_threshold() -> usize {
    8
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct PowerSection {
    enable_self_refresh: bool,
    sref_threshold: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct OtherSection {
    epoch_period: u64,
    output_prefix: String,
    enable_hbm_dual_cmd: bool,
    ideal_memory_latency: u64,
    row_hit_limit: u32,
    cmd_trace: bool,
    addr_trace: bool,
}

impl Default for OtherSection {
    fn default() -> Self {
        Self {
            epoch_period: 100_000,
            output_prefix: "dram_emu_".to_string(),
            enable_hbm_dual_cmd: false,
            ideal_memory_latency: 0,
            row_hit_limit: 4,
            cmd_trace: false,
            addr_trace: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ConfigFile {
    system: SystemSection,
    timing: TimingSection,
    queues: QueueSection,
    #[serde(default)]
    power: PowerSection,
    #[serde(default)]
    other: OtherSection,
}

/// Bit position and mask for one address field.
#[derive(Debug, Clone, Copy, Default)]
struct Field {
    pos: u32,
    mask: u64,
}

/// Validated device configuration with all derived quantities.
///
/// Construct via [`Config::from_file`] or [`Config::from_toml_str`]; both
/// reject impossible geometries so downstream code can index freely.
#[derive(Debug, Clone)]
pub struct Config {
    // topology
    pub protocol: String,
    pub channels: usize,
    pub ranks: usize,
    pub bankgroups: usize,
    pub banks_per_group: usize,
    /// bankgroups * banks_per_group.
    pub banks: usize,
    pub rows: usize,
    pub columns: usize,
    pub device_width: usize,
    pub bus_width: usize,
    pub burst_length: usize,

    // policies
    pub row_buf_policy: RowBufPolicy,
    pub refresh_policy: RefreshPolicy,
    pub queue_structure: QueueStructure,
    pub cmd_queue_size: usize,
    pub trans_queue_size: usize,
    pub unified_queue: bool,
    pub write_drain_threshold: usize,

    // timing (memory-clock cycles)
    pub al: u64,
    pub cl: u64,
    pub cwl: u64,
    pub t_rcd: u64,
    pub t_rp: u64,
    pub t_ras: u64,
    pub t_rc: u64,
    pub t_rfc: u64,
    pub t_rfcb: u64,
    pub t_refi: u64,
    pub t_refib: u64,
    pub t_rrd_s: u64,
    pub t_rrd_l: u64,
    pub t_wtr_s: u64,
    pub t_wtr_l: u64,
    pub t_faw: u64,
    pub t_wr: u64,
    pub t_ccd_s: u64,
    pub t_ccd_l: u64,
    pub t_rtp: u64,
    pub t_rtrs: u64,
    pub t_cke: u64,
    pub t_ckesr: u64,
    pub t_xs: u64,
    pub t_xp: u64,
    pub t_32aw: u64,
    pub t_ppd: u64,

    // derived latencies
    /// Read latency: AL + CL.
    pub rl: u64,
    /// Write latency: AL + CWL.
    pub wl: u64,
    /// Data-bus occupancy of one burst (BL / 2 for DDR).
    pub burst_cycle: u64,
    /// Column command to last data beat returned.
    pub read_delay: u64,
    /// Column command to last data beat written.
    pub write_delay: u64,

    // power / features
    pub enable_self_refresh: bool,
    pub sref_threshold: u64,
    pub enable_hbm_dual_cmd: bool,
    pub ideal_memory_latency: u64,
    pub row_hit_limit: u32,

    // reporting
    pub epoch_period: u64,
    pub output_prefix: String,
    pub cmd_trace: bool,
    pub addr_trace: bool,

    // address decomposition
    /// Low bits dropped before field extraction (one request's worth of
    /// bytes is contiguous).
    pub shift_bits: u32,
    ch: Field,
    ra: Field,
    bg: Field,
    ba: Field,
    ro: Field,
    co: Field,
}

impl Config {
    /// Load and validate a configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_toml_str(&content)?;
        log::info!("loaded config from {}", path.as_ref().display());
        Ok(config)
    }

    /// Parse and validate a configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(content)?;
        Self::build(file)
    }

    fn build(file: ConfigFile) -> Result<Self, ConfigError> {
        let sys = &file.system;
        let t = &file.timing;

        for (name, v) in [
            ("channels", sys.channels),
            ("ranks", sys.ranks),
            ("bankgroups", sys.bankgroups),
            ("banks_per_group", sys.banks_per_group),
            ("rows", sys.rows),
            ("columns", sys.columns),
            ("burst_length", sys.burst_length),
        ] {
            if v == 0 || !v.is_power_of_two() {
                return Err(ConfigError::Geometry(format!(
                    "{} must be a nonzero power of two, got {}",
                    name, v
                )));
            }
        }
        if sys.columns < sys.burst_length {
            return Err(ConfigError::Geometry(format!(
                "columns ({}) smaller than burst_length ({})",
                sys.columns, sys.burst_length
            )));
        }

        let banks = sys.bankgroups * sys.banks_per_group;
        let rl = t.al + t.cl;
        let wl = t.al + t.cwl;
        let burst_cycle = (sys.burst_length / 2) as u64;
        let request_size_bytes = sys.bus_width / 8 * sys.burst_length;

        let mut config = Self {
            protocol: sys.protocol.clone(),
            channels: sys.channels,
            ranks: sys.ranks,
            bankgroups: sys.bankgroups,
            banks_per_group: sys.banks_per_group,
            banks,
            rows: sys.rows,
            columns: sys.columns,
            device_width: sys.device_width,
            bus_width: sys.bus_width,
            burst_length: sys.burst_length,
            row_buf_policy: sys.row_buf_policy,
            refresh_policy: sys.refresh_policy,
            queue_structure: file.queues.queue_structure,
            cmd_queue_size: file.queues.cmd_queue_size,
            trans_queue_size: file.queues.trans_queue_size,
            unified_queue: file.queues.unified_queue,
            write_drain_threshold: file.queues.write_drain_threshold,
            al: t.al,
            cl: t.cl,
            cwl: t.cwl,
            t_rcd: t.t_rcd,
            t_rp: t.t_rp,
            t_ras: t.t_ras,
            t_rc: t.t_ras + t.t_rp,
            t_rfc: t.t_rfc,
            t_rfcb: t.t_rfcb,
            t_refi: t.t_refi,
            t_refib: t.t_refib,
            t_rrd_s: t.t_rrd_s,
            t_rrd_l: t.t_rrd_l,
            t_wtr_s: t.t_wtr_s,
            t_wtr_l: t.t_wtr_l,
            t_faw: t.t_faw,
            t_wr: t.t_wr,
            t_ccd_s: t.t_ccd_s,
            t_ccd_l: t.t_ccd_l,
            t_rtp: t.t_rtp,
            t_rtrs: t.t_rtrs,
            t_cke: t.t_cke,
            t_ckesr: t.t_ckesr,
            t_xs: t.t_xs,
            t_xp: t.t_xp,
            t_32aw: t.t_32aw,
            t_ppd: t.t_ppd,
            rl,
            wl,
            burst_cycle,
            read_delay: rl + burst_cycle,
            write_delay: wl + burst_cycle,
            enable_self_refresh: file.power.enable_self_refresh,
            sref_threshold: file.power.sref_threshold,
            enable_hbm_dual_cmd: file.other.enable_hbm_dual_cmd,
            ideal_memory_latency: file.other.ideal_memory_latency,
            row_hit_limit: file.other.row_hit_limit,
            epoch_period: file.other.epoch_period,
            output_prefix: file.other.output_prefix.clone(),
            cmd_trace: file.other.cmd_trace,
            addr_trace: file.other.addr_trace,
            shift_bits: log2(request_size_bytes),
            ch: Field::default(),
            ra: Field::default(),
            bg: Field::default(),
            ba: Field::default(),
            ro: Field::default(),
            co: Field::default(),
        };
        config.set_address_mapping(&sys.address_mapping)?;
        Ok(config)
    }

    /// Compute per-field bit positions from the 12-char mapping scheme.
    ///
    /// The scheme lists the six 2-char field tokens from MSB to LSB, e.g.
    /// `"rochrababgco"` places rows at the top and columns at the bottom of
    /// the decoded address. The column field only covers the bits above the
    /// burst (one burst's columns are fetched together).
    fn set_address_mapping(&mut self, scheme: &str) -> Result<(), ConfigError> {
        if scheme.len() != 12 || !scheme.is_ascii() {
            return Err(ConfigError::AddressMapping(
                scheme.to_string(),
                "expected exactly 6 two-character fields".to_string(),
            ));
        }

        let widths = [
            ("ch", log2(self.channels)),
            ("ra", log2(self.ranks)),
            ("bg", log2(self.bankgroups)),
            ("ba", log2(self.banks_per_group)),
            ("ro", log2(self.rows)),
            ("co", log2(self.columns) - log2(self.burst_length)),
        ];
        let width_of = |token: &str| widths.iter().find(|(t, _)| *t == token).map(|(_, w)| *w);

        let tokens: Vec<&str> = (0..6).map(|i| &scheme[i * 2..i * 2 + 2]).collect();
        let mut seen: Vec<&str> = Vec::new();
        let mut pos = 0u32;
        // walk LSB-first so each field's position is the running bit offset
        for token in tokens.iter().rev() {
            let width = width_of(token).ok_or_else(|| {
                ConfigError::AddressMapping(
                    scheme.to_string(),
                    format!("unknown field {:?}", token),
                )
            })?;
            if seen.contains(token) {
                return Err(ConfigError::AddressMapping(
                    scheme.to_string(),
                    format!("duplicate field {:?}", token),
                ));
            }
            seen.push(token);
            let field = Field { pos, mask: (1u64 << width) - 1 };
            match *token {
                "ch" => self.ch = field,
                "ra" => self.ra = field,
                "bg" => self.bg = field,
                "ba" => self.ba = field,
                "ro" => self.ro = field,
                "co" => self.co = field,
                _ => unreachable!(),
            }
            pos += width;
        }
        Ok(())
    }

    /// Decompose a physical byte address into a device location.
    pub fn address_mapping(&self, hex_addr: u64) -> Address {
        let addr = hex_addr >> self.shift_bits;
        Address {
            channel: ((addr >> self.ch.pos) & self.ch.mask) as usize,
            rank: ((addr >> self.ra.pos) & self.ra.mask) as usize,
            bankgroup: ((addr >> self.bg.pos) & self.bg.mask) as usize,
            bank: ((addr >> self.ba.pos) & self.ba.mask) as usize,
            row: ((addr >> self.ro.pos) & self.ro.mask) as usize,
            column: ((addr >> self.co.pos) & self.co.mask) as usize,
        }
    }

    /// Channel index for a physical byte address (system-level routing).
    pub fn channel_of(&self, hex_addr: u64) -> usize {
        let addr = hex_addr >> self.shift_bits;
        ((addr >> self.ch.pos) & self.ch.mask) as usize
    }

    /// Flat bank index: `rank * banks + bankgroup * banks_per_group + bank`.
    #[inline]
    pub fn bank_index(&self, rank: usize, bankgroup: usize, bank: usize) -> usize {
        rank * self.banks + bankgroup * self.banks_per_group + bank
    }

    /// True when this config selects the ideal fixed-latency model.
    #[inline]
    pub fn is_ideal(&self) -> bool {
        self.ideal_memory_latency > 0
    }

    /// A small DDR4-like sample configuration (also used by tests).
    pub fn ddr4_sample() -> Self {
        Self::from_toml_str(Self::sample_toml()).expect("sample config must parse")
    }

    /// Sample config file content.
    pub fn sample_toml() -> &'static str {
        r#"# dram-emu sample configuration (DDR4-2400-like, x8)

[system]
protocol = "DDR4"
channels = 1
ranks = 2
bankgroups = 2
banks_per_group = 4
rows = 32768
columns = 1024
device_width = 8
bus_width = 64
burst_length = 8
address_mapping = "rochrababgco"
row_buf_policy = "OPEN_PAGE"
refresh_policy = "RANK_STAGGERED"

[timing]
al = 0
cl = 16
cwl = 12
t_rcd = 16
t_rp = 16
t_ras = 39
t_rfc = 420
t_rfcb = 120
t_refi = 9360
t_refib = 585
t_rrd_s = 4
t_rrd_l = 6
t_wtr_s = 3
t_wtr_l = 9
t_faw = 26
t_wr = 18
t_ccd_s = 4
t_ccd_l = 6
t_rtp = 9
t_rtrs = 1
t_cke = 6
t_ckesr = 7
t_xs = 432
t_xp = 8

[queues]
cmd_queue_size = 8
trans_queue_size = 32
queue_structure = "PER_BANK"
unified_queue = false

[power]
enable_self_refresh = false
sref_threshold = 1000

[other]
epoch_period = 100000
output_prefix = "dram_emu_"
"#
    }
}

/// Floor log2 for power-of-two sizes (validated at load).
fn log2(v: usize) -> u32 {
    v.trailing_zeros()
}
