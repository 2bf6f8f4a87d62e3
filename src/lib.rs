//! dram-emu library
//!
//! Cycle-accurate simulation of JEDEC-style DRAM devices (DDR/HBM
//! families). The simulator consumes a stream of read/write transactions
//! at byte addresses and reproduces the device-level command timing,
//! invoking completion callbacks on the cycle each transaction would
//! finish on real hardware.
//!
//! # Module Organization
//!
//! - [`config`]: TOML device configuration and address mapping
//! - [`dram`]: the core (banks, channel state, command queues, refresh,
//!   controller)
//! - [`system`]: top-level multi-channel systems and the host boundary
//! - [`stats`]: per-channel counters and JSON reporting
//! - [`cpu`]: stimulus front-ends (trace replay, random, stream)

pub mod config;
pub mod cpu;
pub mod dram;
pub mod stats;
pub mod system;
