//! Per-bank (or per-rank) command queues.
//!
//! The queues hold only data commands (the read/write family) translated
//! from transactions. Each cycle the controller asks for one command to
//! issue; the queue scans round-robin from a rotating cursor and, for each
//! pending data command, asks [`ChannelState`] which prerequisite could run
//! right now (the data command itself, or an ACT/PRE/SREF_EXIT on the way
//! to it).
//!
//! FR-FCFS is emergent: a row-hit later in a queue becomes timing-ready
//! before an earlier row-miss that still needs PRE+ACT, so scanning in
//! queue order naturally prefers ready commands. Two arbitration rules
//! bound that reordering:
//!
//! - a PRECHARGE may not overtake earlier commands to the same bank, and
//!   is suppressed while row-hits are still pending (up to a configured
//!   starvation cap)
//! - a WRITE may not overtake an earlier READ to the same location
//!
//! While a refresh sequence is in progress the covered queues are masked
//! out of the scan until the refresh commits.

use std::collections::HashSet;
use std::sync::Arc;

use crate::config::{Config, QueueStructure};
use crate::dram::channel::ChannelState;
use crate::dram::command::{Command, CommandKind};

/// Command queues for one channel.
pub struct CommandQueue {
    config: Arc<Config>,
    queues: Vec<Vec<Command>>,
    queue_size: usize,
    /// Rotating scan cursor.
    queue_idx: usize,
    /// True while a refresh sequence occupies some queues.
    is_in_ref: bool,
    /// Queue indices covered by the in-progress refresh.
    ref_q_indices: HashSet<usize>,
    /// Per-rank emptiness, kept current for the self-refresh policy.
    rank_q_empty: Vec<bool>,
    clk: u64,
}

impl CommandQueue {
    /// Create the queue set for one channel.
    pub fn new(config: Arc<Config>) -> Self {
        let num_queues = match config.queue_structure {
            QueueStructure::PerBank => config.ranks * config.banks,
            QueueStructure::PerRank => config.ranks,
        };
        Self {
            queues: vec![Vec::new(); num_queues],
            queue_size: config.cmd_queue_size,
            queue_idx: 0,
            is_in_ref: false,
            ref_q_indices: HashSet::new(),
            rank_q_empty: vec![true; config.ranks],
            clk: 0,
            config,
        }
    }

    /// Advance the queue clock (kept in lock-step with the controller).
    pub fn clock_tick(&mut self) {
        self.clk += 1;
    }

    /// True when rank `rank` has no pending commands.
    #[inline]
    pub fn rank_queues_empty(&self, rank: usize) -> bool {
        self.rank_q_empty[rank]
    }

    fn queue_index(&self, rank: usize, bankgroup: usize, bank: usize) -> usize {
        match self.config.queue_structure {
            QueueStructure::PerRank => rank,
            QueueStructure::PerBank => self.config.bank_index(rank, bankgroup, bank),
        }
    }

    fn rank_of_queue(&self, queue_idx: usize) -> usize {
        match self.config.queue_structure {
            QueueStructure::PerRank => queue_idx,
            QueueStructure::PerBank => queue_idx / self.config.banks,
        }
    }

    /// True when the target queue can take one more command.
    pub fn will_accept_command(&self, rank: usize, bankgroup: usize, bank: usize) -> bool {
        self.queues[self.queue_index(rank, bankgroup, bank)].len() < self.queue_size
    }

    /// Append a data command; `false` when the queue is full (retry next
    /// cycle).
    pub fn add_command(&mut self, cmd: Command) -> bool {
        let idx = self.queue_index(cmd.rank(), cmd.bankgroup(), cmd.bank());
        if self.queues[idx].len() >= self.queue_size {
            return false;
        }
        self.rank_q_empty[cmd.rank()] = false;
        self.queues[idx].push(cmd);
        true
    }

    /// True when every queue is empty.
    pub fn queue_empty(&self) -> bool {
        self.queues.iter().all(|q| q.is_empty())
    }

    /// Total commands pending across all queues.
    pub fn queue_usage(&self) -> usize {
        self.queues.iter().map(|q| q.len()).sum()
    }

    /// Round-robin over the queues for the next issuable command.
    ///
    /// Queues covered by an in-progress refresh are skipped. A returned
    /// data command is removed from its queue; prerequisites stay (their
    /// data command issues on a later cycle).
    pub fn get_command_to_issue(&mut self, channel_state: &mut ChannelState) -> Option<Command> {
        self.scan_for_command(channel_state, None)
    }

    /// Scan for a second same-cycle command of the opposite data/non-data
    /// class (HBM dual-command issue). Commands of the first command's
    /// class are left in place rather than consumed.
    pub fn get_second_command_to_issue(
        &mut self,
        channel_state: &mut ChannelState,
        first_was_data: bool,
    ) -> Option<Command> {
        self.scan_for_command(channel_state, Some(!first_was_data))
    }

    fn scan_for_command(
        &mut self,
        channel_state: &mut ChannelState,
        required_class: Option<bool>,
    ) -> Option<Command> {
        for _ in 0..self.queues.len() {
            self.queue_idx = (self.queue_idx + 1) % self.queues.len();
            if self.is_in_ref && self.ref_q_indices.contains(&self.queue_idx) {
                continue;
            }
            if let Some(cmd) = self.first_ready_in_queue(self.queue_idx, channel_state) {
                if let Some(want_data) = required_class {
                    if cmd.kind.is_read_write() != want_data {
                        continue;
                    }
                }
                if cmd.kind.is_read_write() {
                    self.erase_data_command(&cmd);
                }
                return Some(cmd);
            }
        }
        None
    }

    /// Drive the pending refresh forward: returns the next command of the
    /// refresh sequence (PRE for an open bank, then the refresh itself),
    /// masking the covered queues until the refresh commits.
    pub fn finish_refresh(&mut self, channel_state: &mut ChannelState) -> Option<Command> {
        let ref_cmd = *channel_state.pending_ref_command();
        if !self.is_in_ref {
            self.ref_q_indices = self.covered_queue_indices(&ref_cmd);
            self.is_in_ref = true;
        }

        let cmd = channel_state.get_ready_command(&ref_cmd, self.clk);
        if let Some(cmd) = &cmd {
            if cmd.kind.is_refresh() {
                self.ref_q_indices.clear();
                self.is_in_ref = false;
            }
        }
        cmd
    }

    fn covered_queue_indices(&self, ref_cmd: &Command) -> HashSet<usize> {
        let mut indices = HashSet::new();
        if ref_cmd.kind == CommandKind::Refresh {
            match self.config.queue_structure {
                QueueStructure::PerBank => {
                    for i in 0..self.queues.len() {
                        if self.rank_of_queue(i) == ref_cmd.rank() {
                            indices.insert(i);
                        }
                    }
                }
                QueueStructure::PerRank => {
                    indices.insert(ref_cmd.rank());
                }
            }
        } else {
            indices.insert(self.queue_index(
                ref_cmd.rank(),
                ref_cmd.bankgroup(),
                ref_cmd.bank(),
            ));
        }
        indices
    }

    /// First command in the queue whose prerequisite is legal now and
    /// survives precharge and write-after-read arbitration.
    fn first_ready_in_queue(
        &self,
        queue_idx: usize,
        channel_state: &mut ChannelState,
    ) -> Option<Command> {
        let clk = self.clk;
        for i in 0..self.queues[queue_idx].len() {
            let pending = self.queues[queue_idx][i];
            let Some(cmd) = channel_state.get_ready_command(&pending, clk) else {
                continue;
            };
            if cmd.kind == CommandKind::Precharge {
                if !self.arbitrate_precharge(queue_idx, i, &cmd, channel_state) {
                    continue;
                }
            } else if cmd.kind.is_write() && self.has_write_after_read(queue_idx, i) {
                continue;
            }
            return Some(cmd);
        }
        None
    }

    /// Precharge arbitration: FCFS within the bank, and row-hits drain
    /// first unless the open row has already served `row_hit_limit`
    /// accesses.
    fn arbitrate_precharge(
        &self,
        queue_idx: usize,
        pos: usize,
        cmd: &Command,
        channel_state: &ChannelState,
    ) -> bool {
        let queue = &self.queues[queue_idx];

        for earlier in &queue[..pos] {
            if earlier.same_bank(cmd) {
                return false;
            }
        }

        let open_row = channel_state.open_row(cmd.rank(), cmd.bankgroup(), cmd.bank());
        let pending_row_hits_exist = queue[pos..]
            .iter()
            .any(|later| later.same_bank(cmd) && Some(later.row()) == open_row);

        let rowhit_limit_reached = channel_state.row_hit_count(
            cmd.rank(),
            cmd.bankgroup(),
            cmd.bank(),
        ) >= self.config.row_hit_limit;

        !pending_row_hits_exist || rowhit_limit_reached
    }

    /// True when an earlier read to the same location blocks this write.
    /// (Read-after-write was already resolved at the transaction layer.)
    fn has_write_after_read(&self, queue_idx: usize, pos: usize) -> bool {
        let queue = &self.queues[queue_idx];
        let write = &queue[pos];
        queue[..pos].iter().any(|earlier| {
            earlier.kind.is_read()
                && earlier.same_bank(write)
                && earlier.row() == write.row()
                && earlier.column() == write.column()
        })
    }

    fn erase_data_command(&mut self, cmd: &Command) {
        let idx = self.queue_index(cmd.rank(), cmd.bankgroup(), cmd.bank());
        let pos = self.queues[idx]
            .iter()
            .position(|c| c.hex_addr == cmd.hex_addr && c.kind == cmd.kind)
            .unwrap_or_else(|| panic!("issued command {:#x} not found in queue", cmd.hex_addr));
        self.queues[idx].remove(pos);
        let rank = cmd.rank();
        self.refresh_rank_emptiness(rank);
    }

    fn refresh_rank_emptiness(&mut self, rank: usize) {
        let empty = match self.config.queue_structure {
            QueueStructure::PerRank => self.queues[rank].is_empty(),
            QueueStructure::PerBank => {
                let base = rank * self.config.banks;
                self.queues[base..base + self.config.banks]
                    .iter()
                    .all(|q| q.is_empty())
            }
        };
        self.rank_q_empty[rank] = empty;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dram::command::Address;
    use crate::dram::timing::Timing;

    fn setup() -> (Arc<Config>, CommandQueue, ChannelState) {
        let config = Arc::new(Config::ddr4_sample());
        let timing = Arc::new(Timing::new(&config));
        let state = ChannelState::new(Arc::clone(&config), timing);
        let queue = CommandQueue::new(Arc::clone(&config));
        (config, queue, state)
    }

    fn read_at(bank: usize, row: usize, col: usize, hex: u64) -> Command {
        Command::new(
            CommandKind::Read,
            Address::new(0, 0, 0, bank, row, col),
            hex,
        )
    }

    fn write_at(bank: usize, row: usize, col: usize, hex: u64) -> Command {
        Command::new(
            CommandKind::Write,
            Address::new(0, 0, 0, bank, row, col),
            hex,
        )
    }

    /// Step until the queue hands out a command, with a safety bound.
    fn issue_next(
        queue: &mut CommandQueue,
        state: &mut ChannelState,
        clk: &mut u64,
    ) -> Command {
        for _ in 0..100_000 {
            if let Some(cmd) = queue.get_command_to_issue(state) {
                state.update_timing_and_states(&cmd, *clk);
                return cmd;
            }
            *clk += 1;
            queue.clock_tick();
        }
        panic!("no command became ready");
    }

    #[test]
    fn test_capacity_bound() {
        let (config, mut queue, _) = setup();
        for i in 0..config.cmd_queue_size {
            assert!(queue.add_command(read_at(0, 0, i, i as u64 * 0x40)));
        }
        assert!(!queue.will_accept_command(0, 0, 0));
        assert!(!queue.add_command(read_at(0, 0, 99, 0x9900)));
        // other banks unaffected
        assert!(queue.will_accept_command(0, 0, 1));
    }

    #[test]
    fn test_act_then_read_sequence() {
        let (_, mut queue, mut state) = setup();
        queue.add_command(read_at(0, 5, 0, 0x40));

        let mut clk = 0;
        let first = issue_next(&mut queue, &mut state, &mut clk);
        assert_eq!(first.kind, CommandKind::Activate);
        let second = issue_next(&mut queue, &mut state, &mut clk);
        assert_eq!(second.kind, CommandKind::Read);
        assert!(queue.queue_empty());
    }

    #[test]
    fn test_row_hits_drain_before_conflict_precharge() {
        let (_, mut queue, mut state) = setup();
        // two hits on row 5, then a conflicting row 9, same bank
        queue.add_command(read_at(0, 5, 0, 0x40));
        queue.add_command(read_at(0, 5, 1, 0x80));
        queue.add_command(read_at(0, 9, 0, 0xC0));

        let mut clk = 0;
        let mut kinds = Vec::new();
        for _ in 0..5 {
            kinds.push(issue_next(&mut queue, &mut state, &mut clk).kind);
        }
        assert_eq!(
            kinds,
            vec![
                CommandKind::Activate,
                CommandKind::Read,
                CommandKind::Read,
                CommandKind::Precharge,
                CommandKind::Activate,
            ]
        );
    }

    #[test]
    fn test_write_after_read_dependency_holds_write_back() {
        let (config, mut queue, mut state) = setup();
        // read and write to the same location; read is older
        queue.add_command(read_at(0, 5, 3, 0x40));
        queue.add_command(write_at(0, 5, 3, 0x40));

        let mut clk = 0;
        let first = issue_next(&mut queue, &mut state, &mut clk);
        assert_eq!(first.kind, CommandKind::Activate);
        let second = issue_next(&mut queue, &mut state, &mut clk);
        assert_eq!(second.kind, CommandKind::Read);
        let third = issue_next(&mut queue, &mut state, &mut clk);
        assert_eq!(third.kind, CommandKind::Write);
        // the write had to wait for read-to-write bus turnaround
        assert!(clk >= config.t_rcd + config.rl + config.burst_cycle + 2 - config.wl);
    }

    #[test]
    fn test_refresh_masks_covered_queues() {
        let (config, mut queue, mut state) = setup();
        // open row 5, leaving a row-hit read pending in the queue
        queue.add_command(read_at(0, 5, 0, 0x40));
        queue.add_command(read_at(0, 5, 1, 0x80));
        let mut clk = 0;
        let act = issue_next(&mut queue, &mut state, &mut clk);
        assert_eq!(act.kind, CommandKind::Activate);

        state.rank_need_refresh(0, true);

        // drive the refresh sequence: PRE (after tRAS), then REF (after tRP)
        let mut seen = Vec::new();
        for _ in 0..(config.t_rc * 4) {
            if let Some(cmd) = queue.finish_refresh(&mut state) {
                state.update_timing_and_states(&cmd, clk);
                seen.push(cmd.kind);
                if cmd.kind == CommandKind::Refresh {
                    break;
                }
            } else {
                // refresh stalled on timing: the covered queues are masked,
                // so the ready row-hit read must NOT leak out
                assert!(queue.get_command_to_issue(&mut state).is_none());
            }
            clk += 1;
            queue.clock_tick();
        }
        assert_eq!(seen, vec![CommandKind::Precharge, CommandKind::Refresh]);
        assert!(!state.is_refresh_waiting());

        // after the refresh the reads proceed, blocked until tRFC elapses
        let ref_cycle = clk;
        let next = issue_next(&mut queue, &mut state, &mut clk);
        assert_eq!(next.kind, CommandKind::Activate);
        assert_eq!(clk, ref_cycle + config.t_rfc);
    }

    #[test]
    fn test_rank_emptiness_tracking() {
        let (_, mut queue, mut state) = setup();
        assert!(queue.rank_queues_empty(0));
        queue.add_command(read_at(0, 5, 0, 0x40));
        assert!(!queue.rank_queues_empty(0));

        let mut clk = 0;
        issue_next(&mut queue, &mut state, &mut clk); // ACT
        assert!(!queue.rank_queues_empty(0));
        issue_next(&mut queue, &mut state, &mut clk); // READ, erased
        assert!(queue.rank_queues_empty(0));
    }
}
