//! Per-bank state machine.
//!
//! Each physical bank tracks three things:
//! - its row-buffer state (closed, a row open, or self-refresh)
//! - a row-hit counter for the open row (feeds precharge arbitration)
//! - the earliest cycle each command kind may issue to it
//!
//! The bank answers two questions for the scheduler: "what command must
//! execute *now* to make progress toward this request?" and "is that
//! command legal yet?". It never looks outside itself; rank-scope rules
//! (tFAW, refresh fan-out) live in [`crate::dram::ChannelState`].

use crate::dram::command::{Command, CommandKind};

/// Row-buffer state of one bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BankMode {
    /// No row open; ACTIVATE required before data commands.
    Closed,
    /// A row is latched in the row buffer.
    Open,
    /// Rank is in self-refresh; only SREF_EXIT applies.
    Sref,
}

/// State of one physical bank.
#[derive(Debug, Clone)]
pub struct BankState {
    mode: BankMode,
    /// Open row index; `None` iff the bank is not in [`BankMode::Open`].
    open_row: Option<usize>,
    /// Consecutive accesses to the open row since the last activate.
    row_hit_count: u32,
    /// Earliest legal issue cycle per command kind.
    cmd_timing: [u64; CommandKind::COUNT],

    // bank-level-parallelism instrumentation (stats only, not correctness)
    in_serve: bool,
    serve_end_cycle: u64,
    /// Last PRECHARGE prerequisite was demanded by a row conflict rather
    /// than by refresh.
    pre_by_row_conflict: bool,
    /// Last ACTIVATE prerequisite was demanded by a write rather than a
    /// read.
    act_for_write: bool,
}

impl Default for BankState {
    fn default() -> Self {
        Self::new()
    }
}

impl BankState {
    /// Create a closed bank with all command kinds immediately legal.
    pub fn new() -> Self {
        Self {
            mode: BankMode::Closed,
            open_row: None,
            row_hit_count: 0,
            cmd_timing: [0; CommandKind::COUNT],
            in_serve: false,
            serve_end_cycle: 0,
            pre_by_row_conflict: false,
            act_for_write: false,
        }
    }

    /// True when a row is open.
    #[inline]
    pub fn is_row_open(&self) -> bool {
        self.mode == BankMode::Open
    }

    /// True when the bank is closed (precharged).
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.mode == BankMode::Closed
    }

    /// Open row index, if any.
    #[inline]
    pub fn open_row(&self) -> Option<usize> {
        self.open_row
    }

    /// Consecutive accesses to the open row.
    #[inline]
    pub fn row_hit_count(&self) -> u32 {
        self.row_hit_count
    }

    /// Earliest legal cycle for `kind` at this bank.
    #[inline]
    pub fn earliest_cycle(&self, kind: CommandKind) -> u64 {
        self.cmd_timing[kind.index()]
    }

    /// The prerequisite command that must run now to make progress toward
    /// `cmd`, or `None` if the bank's timing does not yet permit it.
    ///
    /// Illegal (state, request) pairs indicate a scheduler bug and abort.
    pub fn get_ready_command(&mut self, cmd: &Command, clk: u64) -> Option<Command> {
        use CommandKind::*;

        let required = match self.mode {
            BankMode::Closed => match cmd.kind {
                Read | ReadPrecharge => {
                    self.act_for_write = false;
                    Activate
                }
                Write | WritePrecharge => {
                    self.act_for_write = true;
                    Activate
                }
                Refresh | RefreshBank | SrefEnter => cmd.kind,
                _ => panic!(
                    "bank closed: no prerequisite for {} at {}",
                    cmd.kind, clk
                ),
            },
            BankMode::Open => match cmd.kind {
                Read | ReadPrecharge | Write | WritePrecharge => {
                    if Some(cmd.row()) == self.open_row {
                        cmd.kind
                    } else {
                        self.pre_by_row_conflict = true;
                        Precharge
                    }
                }
                Refresh | RefreshBank | SrefEnter => {
                    self.pre_by_row_conflict = false;
                    Precharge
                }
                _ => panic!("bank open: no prerequisite for {} at {}", cmd.kind, clk),
            },
            BankMode::Sref => match cmd.kind {
                Read | ReadPrecharge | Write | WritePrecharge | SrefExit => SrefExit,
                _ => panic!(
                    "bank in self-refresh: no prerequisite for {} at {}",
                    cmd.kind, clk
                ),
            },
        };

        if clk >= self.cmd_timing[required.index()] {
            Some(cmd.with_kind(required))
        } else {
            None
        }
    }

    /// Apply the state effect of an issued command.
    ///
    /// Illegal (state, command) pairs indicate a scheduler bug and abort.
    pub fn update_state(&mut self, cmd: &Command) {
        use CommandKind::*;

        match self.mode {
            BankMode::Open => match cmd.kind {
                Read | Write => self.row_hit_count += 1,
                ReadPrecharge | WritePrecharge | Precharge => {
                    self.mode = BankMode::Closed;
                    self.open_row = None;
                    self.row_hit_count = 0;
                }
                _ => panic!("illegal command {} to open bank", cmd.kind),
            },
            BankMode::Closed => match cmd.kind {
                Refresh | RefreshBank => {}
                Activate => {
                    self.mode = BankMode::Open;
                    self.open_row = Some(cmd.row());
                }
                SrefEnter => self.mode = BankMode::Sref,
                _ => panic!("illegal command {} to closed bank", cmd.kind),
            },
            BankMode::Sref => match cmd.kind {
                SrefExit => self.mode = BankMode::Closed,
                _ => panic!("illegal command {} to self-refreshing bank", cmd.kind),
            },
        }
    }

    /// Push back the earliest legal cycle for `kind` to at least `cycle`.
    ///
    /// Monotonic: out-of-order broadcasts from different scopes can only
    /// tighten the constraint.
    #[inline]
    pub fn update_timing(&mut self, kind: CommandKind, cycle: u64) {
        let slot = &mut self.cmd_timing[kind.index()];
        *slot = (*slot).max(cycle);
    }

    // --- bank-level-parallelism instrumentation -------------------------

    #[inline]
    pub fn set_in_serve(&mut self, in_serve: bool) {
        self.in_serve = in_serve;
    }

    #[inline]
    pub fn in_serve(&self) -> bool {
        self.in_serve
    }

    #[inline]
    pub fn set_serve_end_cycle(&mut self, cycle: u64) {
        self.serve_end_cycle = cycle;
    }

    #[inline]
    pub fn serve_end_cycle(&self) -> u64 {
        self.serve_end_cycle
    }

    #[inline]
    pub fn pre_by_row_conflict(&self) -> bool {
        self.pre_by_row_conflict
    }

    #[inline]
    pub fn act_for_write(&self) -> bool {
        self.act_for_write
    }
}
