//! The cycle-accurate DRAM core.
//!
//! This module models one JEDEC-style DRAM device per channel as three
//! cooperating pieces driven by a single per-channel clock:
//!
//! ```text
//!  Transaction                     Controller
//!  ───────────►  trans queues ──► schedule ──► CommandQueue
//!                                                  │ round-robin scan
//!                                                  ▼
//!                                   ChannelState::get_ready_command
//!                                       │ ACT/PRE/REF prerequisite
//!                                       ▼
//!                                  issue command
//!                                       │ timing broadcast
//!                                       ▼
//!              ┌──────────── rank ────────────┐
//!              │ ┌── bankgroup ──┐            │
//!              │ │ Bank Bank ... │  x groups  │   x ranks
//!              │ └───────────────┘            │
//!              └──────────────────────────────┘
//! ```
//!
//! - [`BankState`]: one row buffer, a per-command-kind earliest-legal
//!   cycle table, and the (state, command) transition rules
//! - [`ChannelState`]: the flat bank grid, activation windows, refresh
//!   queue, and the four-scope timing broadcast
//! - [`CommandQueue`]: per-bank/per-rank pending data commands with
//!   emergent FR-FCFS arbitration
//! - [`Refresh`]: the periodic tREFI engine
//! - [`Controller`]: transaction admission, write draining, command
//!   issue, self-refresh policy, and completion tracking

pub mod bank;
pub mod channel;
pub mod command;
pub mod controller;
pub mod queue;
pub mod refresh;
pub mod timing;

pub use bank::{BankMode, BankState};
pub use channel::ChannelState;
pub use command::{Address, Command, CommandKind, Transaction};
pub use controller::Controller;
pub use queue::CommandQueue;
pub use refresh::Refresh;
pub use timing::Timing;
