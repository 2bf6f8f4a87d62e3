//! Channel-wide bank state and timing broadcast.
//!
//! One [`ChannelState`] owns the `rank x bankgroup x bank` grid of
//! [`BankState`]s for a channel, stored as a flat array indexed by
//! `rank * banks + bankgroup * banks_per_group + bank` for cache-friendly
//! per-cycle sweeps.
//!
//! Responsibilities:
//! - route ready-command queries to the right bank, adding the rank-scope
//!   rules a bank cannot see (all-bank refresh drains, activation windows)
//! - after a command issues, broadcast its timing implications to every
//!   bank in each affected locality scope
//! - hold the pending refresh queue and per-rank self-refresh flags

use std::sync::Arc;

use crate::config::Config;
use crate::dram::bank::BankState;
use crate::dram::command::{Address, Command, CommandKind};
use crate::dram::timing::Timing;

/// All bank state for one channel.
pub struct ChannelState {
    config: Arc<Config>,
    timing: Arc<Timing>,

    /// Flat bank grid, see [`Config::bank_index`].
    banks: Vec<BankState>,
    /// Per-rank self-refresh flag.
    rank_is_sref: Vec<bool>,
    /// Pending refresh commands, FIFO.
    refresh_q: Vec<Command>,

    /// Per-rank four-activation window: expiry cycles of the last ACTs.
    four_aw: Vec<Vec<u64>>,
    /// Per-rank 32-activation window (GDDR-style), unused when t32AW = 0.
    thirty_two_aw: Vec<Vec<u64>>,

    /// Consecutive cycles each rank has had every bank idle.
    pub rank_idle_cycles: Vec<u64>,
}

impl ChannelState {
    /// Create the bank grid for one channel, all banks closed.
    pub fn new(config: Arc<Config>, timing: Arc<Timing>) -> Self {
        let total_banks = config.ranks * config.banks;
        Self {
            banks: vec![BankState::new(); total_banks],
            rank_is_sref: vec![false; config.ranks],
            refresh_q: Vec::new(),
            four_aw: vec![Vec::with_capacity(4); config.ranks],
            thirty_two_aw: vec![Vec::with_capacity(32); config.ranks],
            rank_idle_cycles: vec![0; config.ranks],
            config,
            timing,
        }
    }

    #[inline]
    fn bank(&self, rank: usize, bankgroup: usize, bank: usize) -> &BankState {
        &self.banks[self.config.bank_index(rank, bankgroup, bank)]
    }

    #[inline]
    fn bank_mut(&mut self, rank: usize, bankgroup: usize, bank: usize) -> &mut BankState {
        let idx = self.config.bank_index(rank, bankgroup, bank);
        &mut self.banks[idx]
    }

    /// True when the bank has a row open.
    pub fn is_row_open(&self, rank: usize, bankgroup: usize, bank: usize) -> bool {
        self.bank(rank, bankgroup, bank).is_row_open()
    }

    /// Open row of the bank, if any.
    pub fn open_row(&self, rank: usize, bankgroup: usize, bank: usize) -> Option<usize> {
        self.bank(rank, bankgroup, bank).open_row()
    }

    /// Row hits since the bank's last activate.
    pub fn row_hit_count(&self, rank: usize, bankgroup: usize, bank: usize) -> u32 {
        self.bank(rank, bankgroup, bank).row_hit_count()
    }

    /// True when no bank in the rank has a row open.
    pub fn is_all_bank_idle_in_rank(&self, rank: usize) -> bool {
        let base = self.config.bank_index(rank, 0, 0);
        self.banks[base..base + self.config.banks]
            .iter()
            .all(|b| !b.is_row_open())
    }

    /// True when the rank is in self-refresh.
    #[inline]
    pub fn is_rank_self_refreshing(&self, rank: usize) -> bool {
        self.rank_is_sref[rank]
    }

    // --- refresh queue --------------------------------------------------

    /// True when a refresh command is waiting to be serviced.
    #[inline]
    pub fn is_refresh_waiting(&self) -> bool {
        !self.refresh_q.is_empty()
    }

    /// Front of the refresh queue.
    pub fn pending_ref_command(&self) -> &Command {
        self.refresh_q.first().expect("refresh queue is empty")
    }

    /// Enqueue (`need = true`) or retire a per-bank refresh.
    pub fn bank_need_refresh(&mut self, rank: usize, bankgroup: usize, bank: usize, need: bool) {
        if need {
            let addr = Address::bank_only(rank, bankgroup, bank);
            self.refresh_q
                .push(Command::new(CommandKind::RefreshBank, addr, 0));
        } else if let Some(pos) = self.refresh_q.iter().position(|c| {
            c.rank() == rank && c.bankgroup() == bankgroup && c.bank() == bank
        }) {
            self.refresh_q.remove(pos);
        }
    }

    /// Enqueue (`need = true`) or retire an all-bank refresh for a rank.
    pub fn rank_need_refresh(&mut self, rank: usize, need: bool) {
        if need {
            let addr = Address::rank_only(rank);
            self.refresh_q
                .push(Command::new(CommandKind::Refresh, addr, 0));
        } else if let Some(pos) = self.refresh_q.iter().position(|c| c.rank() == rank) {
            self.refresh_q.remove(pos);
        }
    }

    /// True when any refresh is queued for the rank.
    pub fn is_refresh_waiting_for_rank(&self, rank: usize) -> bool {
        self.refresh_q.iter().any(|r| r.rank() == rank)
    }

    /// True when a queued refresh overlaps the target of `cmd`.
    pub fn is_rw_pending_on_ref(&self, cmd: &Command) -> bool {
        self.refresh_q.iter().any(|r| match r.kind {
            CommandKind::Refresh => r.rank() == cmd.rank(),
            CommandKind::RefreshBank => r.same_bank(cmd),
            _ => false,
        })
    }

    // --- ready-command discovery ----------------------------------------

    /// Find the command that must issue now to make progress toward `cmd`,
    /// or `None` if nothing is legal yet.
    ///
    /// Rank-wide requests scan every bank of the rank: the first open bank
    /// yields a PRECHARGE (starting the drain); once all banks are ready
    /// the rank command itself is returned. ACTIVATE prerequisites are
    /// additionally gated by the rank's activation windows.
    pub fn get_ready_command(&mut self, cmd: &Command, clk: u64) -> Option<Command> {
        if cmd.kind.is_rank_wide() {
            let mut num_ready = 0;
            for bg in 0..self.config.bankgroups {
                for b in 0..self.config.banks_per_group {
                    let ready = self.bank_mut(cmd.rank(), bg, b).get_ready_command(cmd, clk);
                    match ready {
                        None => continue,
                        Some(ready) if ready.kind == CommandKind::Precharge => {
                            let mut pre = ready;
                            pre.addr.bankgroup = bg;
                            pre.addr.bank = b;
                            return Some(pre);
                        }
                        Some(_) => num_ready += 1,
                    }
                }
            }
            if num_ready == self.config.banks {
                Some(*cmd)
            } else {
                None
            }
        } else {
            let ready = self
                .bank_mut(cmd.rank(), cmd.bankgroup(), cmd.bank())
                .get_ready_command(cmd, clk)?;
            if ready.kind == CommandKind::Activate && !self.activation_window_ok(ready.rank(), clk)
            {
                return None;
            }
            Some(ready)
        }
    }

    // --- activation windows ---------------------------------------------

    /// True when both rolling activation windows admit another ACT.
    pub fn activation_window_ok(&self, rank: usize, clk: u64) -> bool {
        self.window_ok(&self.four_aw[rank], 4, clk)
            && (self.config.t_32aw == 0 || self.window_ok(&self.thirty_two_aw[rank], 32, clk))
    }

    fn window_ok(&self, window: &[u64], max: usize, clk: u64) -> bool {
        match window.first() {
            Some(&oldest_expiry) => window.len() < max || clk >= oldest_expiry,
            None => true,
        }
    }

    /// Record an ACTIVATE at `clk` in the rank's rolling windows.
    fn update_activation_times(&mut self, rank: usize, clk: u64) {
        let t_faw = self.config.t_faw;
        let window = &mut self.four_aw[rank];
        if window.first().is_some_and(|&expiry| clk >= expiry) {
            window.remove(0);
        }
        window.push(clk + t_faw);

        if self.config.t_32aw > 0 {
            let t_32aw = self.config.t_32aw;
            let window = &mut self.thirty_two_aw[rank];
            if window.first().is_some_and(|&expiry| clk >= expiry) {
                window.remove(0);
            }
            window.push(clk + t_32aw);
        }
    }

    // --- issue ----------------------------------------------------------

    /// Apply an issued command: bank (or rank) state transition, refresh
    /// queue retirement, and the timing broadcast to every affected scope.
    pub fn update_timing_and_states(&mut self, cmd: &Command, clk: u64) {
        self.update_state(cmd);
        self.update_timing(cmd, clk);
    }

    fn update_state(&mut self, cmd: &Command) {
        match cmd.kind {
            CommandKind::Refresh => {
                self.rank_need_refresh(cmd.rank(), false);
                self.for_each_bank_in_rank(cmd.rank(), |bank| bank.update_state(cmd));
            }
            CommandKind::RefreshBank => {
                self.bank_need_refresh(cmd.rank(), cmd.bankgroup(), cmd.bank(), false);
                self.bank_mut(cmd.rank(), cmd.bankgroup(), cmd.bank())
                    .update_state(cmd);
            }
            CommandKind::SrefEnter => {
                self.for_each_bank_in_rank(cmd.rank(), |bank| bank.update_state(cmd));
                self.rank_is_sref[cmd.rank()] = true;
            }
            CommandKind::SrefExit => {
                self.for_each_bank_in_rank(cmd.rank(), |bank| bank.update_state(cmd));
                self.rank_is_sref[cmd.rank()] = false;
            }
            _ => self
                .bank_mut(cmd.rank(), cmd.bankgroup(), cmd.bank())
                .update_state(cmd),
        }
    }

    fn update_timing(&mut self, cmd: &Command, clk: u64) {
        if cmd.kind == CommandKind::Activate {
            self.update_activation_times(cmd.rank(), clk);
        }

        if cmd.kind.is_rank_wide() {
            let timing = Arc::clone(&self.timing);
            self.apply_to_rank(cmd.rank(), timing.same_rank(cmd.kind), clk);
            return;
        }

        let timing = Arc::clone(&self.timing);
        // same bank
        let idx = self.config.bank_index(cmd.rank(), cmd.bankgroup(), cmd.bank());
        apply(&mut self.banks[idx], timing.same_bank(cmd.kind), clk);

        // other banks, same bankgroup
        for b in 0..self.config.banks_per_group {
            if b == cmd.bank() {
                continue;
            }
            let idx = self.config.bank_index(cmd.rank(), cmd.bankgroup(), b);
            apply(
                &mut self.banks[idx],
                timing.other_banks_same_bankgroup(cmd.kind),
                clk,
            );
        }

        // other bankgroups, same rank
        for bg in 0..self.config.bankgroups {
            if bg == cmd.bankgroup() {
                continue;
            }
            for b in 0..self.config.banks_per_group {
                let idx = self.config.bank_index(cmd.rank(), bg, b);
                apply(
                    &mut self.banks[idx],
                    timing.other_bankgroups_same_rank(cmd.kind),
                    clk,
                );
            }
        }

        // other ranks
        for r in 0..self.config.ranks {
            if r == cmd.rank() {
                continue;
            }
            let base = self.config.bank_index(r, 0, 0);
            for bank in &mut self.banks[base..base + self.config.banks] {
                apply(bank, timing.other_ranks(cmd.kind), clk);
            }
        }
    }

    fn apply_to_rank(&mut self, rank: usize, list: &[(CommandKind, u64)], clk: u64) {
        let base = self.config.bank_index(rank, 0, 0);
        for bank in &mut self.banks[base..base + self.config.banks] {
            apply(bank, list, clk);
        }
    }

    fn for_each_bank_in_rank<F: FnMut(&mut BankState)>(&mut self, rank: usize, mut f: F) {
        let base = self.config.bank_index(rank, 0, 0);
        for bank in &mut self.banks[base..base + self.config.banks] {
            f(bank);
        }
    }

    // --- bank-level-parallelism instrumentation -------------------------

    /// Number of banks in the rank currently marked in-serve.
    pub fn in_serve_bank_num(&self, rank: usize) -> usize {
        let base = self.config.bank_index(rank, 0, 0);
        self.banks[base..base + self.config.banks]
            .iter()
            .filter(|b| b.in_serve())
            .count()
    }

    pub fn set_in_serve_bank(&mut self, rank: usize, bg: usize, bank: usize, in_serve: bool) {
        self.bank_mut(rank, bg, bank).set_in_serve(in_serve);
    }

    pub fn set_serve_end_cycle_bank(&mut self, rank: usize, bg: usize, bank: usize, cycle: u64) {
        self.bank_mut(rank, bg, bank).set_serve_end_cycle(cycle);
    }

    pub fn serve_end_cycle_bank(&self, rank: usize, bg: usize, bank: usize) -> u64 {
        self.bank(rank, bg, bank).serve_end_cycle()
    }

    pub fn is_row_closed(&self, rank: usize, bg: usize, bank: usize) -> bool {
        self.bank(rank, bg, bank).is_closed()
    }

    pub fn pre_by_row_conflict_bank(&self, rank: usize, bg: usize, bank: usize) -> bool {
        self.bank(rank, bg, bank).pre_by_row_conflict()
    }

    pub fn act_for_write_bank(&self, rank: usize, bg: usize, bank: usize) -> bool {
        self.bank(rank, bg, bank).act_for_write()
    }
}

/// Bump one bank's earliest-legal cycles with a constraint list.
fn apply(bank: &mut BankState, list: &[(CommandKind, u64)], clk: u64) {
    for &(kind, delay) in list {
        bank.update_timing(kind, clk + delay);
    }
}
