//! The inter-command timing constraint matrix.
//!
//! Every issued command pushes back the earliest-legal cycle of other
//! commands at up to four locality scopes:
//!
//! - same bank
//! - other banks in the same bankgroup
//! - banks in other bankgroups of the same rank
//! - banks in other ranks (data-bus turnaround)
//!
//! Rank-wide commands (REFRESH, SREF_ENTER/EXIT) instead carry a single
//! same-rank list applied to every bank of the rank.
//!
//! The table is populated once from the configuration and never mutated;
//! [`crate::dram::ChannelState`] walks the relevant scope lists after each
//! issue and bumps the per-bank earliest-legal timestamps.

use std::sync::Arc;

use crate::config::Config;
use crate::dram::command::CommandKind;

/// One scope's constraints: which kinds are delayed, and by how much.
pub type ConstraintList = Vec<(CommandKind, u64)>;

/// Per-command-kind constraint lists at each locality scope.
#[derive(Debug)]
pub struct Timing {
    same_bank: Vec<ConstraintList>,
    other_banks_same_bankgroup: Vec<ConstraintList>,
    other_bankgroups_same_rank: Vec<ConstraintList>,
    other_ranks: Vec<ConstraintList>,
    same_rank: Vec<ConstraintList>,
}

/// Difference of cycle quantities that may legitimately go negative
/// (e.g. a write-to-read turnaround shorter than the read latency);
/// clamp at zero since a constraint cannot point into the past.
fn delta(a: u64, b: u64) -> u64 {
    a.saturating_sub(b)
}

impl Timing {
    /// Build the constraint matrix for a device configuration.
    pub fn new(config: &Arc<Config>) -> Self {
        use CommandKind::*;

        let burst = config.burst_cycle;

        // column-to-column, same rank
        let read_to_read_l = burst.max(config.t_ccd_l);
        let read_to_read_s = burst.max(config.t_ccd_s);
        let write_to_write_l = burst.max(config.t_ccd_l);
        let write_to_write_s = burst.max(config.t_ccd_s);

        // bus turnaround, same rank
        let read_to_write = delta(config.rl + burst + 2, config.wl);
        let write_to_read_l = config.write_delay + config.t_wtr_l;
        let write_to_read_s = config.write_delay + config.t_wtr_s;

        // rank-to-rank switching
        let read_to_read_o = burst + config.t_rtrs;
        let write_to_write_o = burst;
        let read_to_write_o = delta(config.read_delay + burst + config.t_rtrs, config.write_delay);
        let write_to_read_o = delta(config.write_delay + burst + config.t_rtrs, config.read_delay);

        // column-to-row
        let read_to_precharge = config.al + config.t_rtp;
        let write_to_precharge = config.wl + burst + config.t_wr;
        let precharge_to_activate = config.t_rp;
        let read_to_activate = read_to_precharge + precharge_to_activate;
        let write_to_activate = write_to_precharge + precharge_to_activate;

        // row-to-row
        let activate_to_activate = config.t_rc;
        let activate_to_activate_l = config.t_rrd_l;
        let activate_to_activate_s = config.t_rrd_s;
        let activate_to_precharge = config.t_ras;
        let activate_to_rw = delta(config.t_rcd, config.al);

        // refresh and self-refresh
        let refresh_to_activate = config.t_rfc;
        let refresh_bank_to_activate = config.t_rfcb;
        let sref_enter_to_exit = config.t_ckesr;
        let sref_exit_to_cmd = config.t_xs;

        let mut timing = Self {
            same_bank: vec![ConstraintList::new(); CommandKind::COUNT],
            other_banks_same_bankgroup: vec![ConstraintList::new(); CommandKind::COUNT],
            other_bankgroups_same_rank: vec![ConstraintList::new(); CommandKind::COUNT],
            other_ranks: vec![ConstraintList::new(); CommandKind::COUNT],
            same_rank: vec![ConstraintList::new(); CommandKind::COUNT],
        };

        // READ
        timing.same_bank[Read.index()] = vec![
            (Read, read_to_read_l),
            (Write, read_to_write),
            (ReadPrecharge, read_to_read_l),
            (WritePrecharge, read_to_write),
            (Precharge, read_to_precharge),
        ];
        timing.other_banks_same_bankgroup[Read.index()] = vec![
            (Read, read_to_read_l),
            (Write, read_to_write),
            (ReadPrecharge, read_to_read_l),
            (WritePrecharge, read_to_write),
        ];
        timing.other_bankgroups_same_rank[Read.index()] = vec![
            (Read, read_to_read_s),
            (Write, read_to_write),
            (ReadPrecharge, read_to_read_s),
            (WritePrecharge, read_to_write),
        ];
        timing.other_ranks[Read.index()] = vec![
            (Read, read_to_read_o),
            (Write, read_to_write_o),
            (ReadPrecharge, read_to_read_o),
            (WritePrecharge, read_to_write_o),
        ];

        // READ_PRECHARGE: row is restored automatically, so constrain the
        // next row commands in the same bank; bus constraints elsewhere are
        // identical to READ.
        timing.same_bank[ReadPrecharge.index()] = vec![
            (Activate, read_to_activate),
            (Refresh, read_to_activate),
            (RefreshBank, read_to_activate),
            (SrefEnter, read_to_activate),
        ];
        timing.other_banks_same_bankgroup[ReadPrecharge.index()] =
            timing.other_banks_same_bankgroup[Read.index()].clone();
        timing.other_bankgroups_same_rank[ReadPrecharge.index()] =
            timing.other_bankgroups_same_rank[Read.index()].clone();
        timing.other_ranks[ReadPrecharge.index()] = timing.other_ranks[Read.index()].clone();

        // WRITE
        timing.same_bank[Write.index()] = vec![
            (Read, write_to_read_l),
            (Write, write_to_write_l),
            (ReadPrecharge, write_to_read_l),
            (WritePrecharge, write_to_write_l),
            (Precharge, write_to_precharge),
        ];
        timing.other_banks_same_bankgroup[Write.index()] = vec![
            (Read, write_to_read_l),
            (Write, write_to_write_l),
            (ReadPrecharge, write_to_read_l),
            (WritePrecharge, write_to_write_l),
        ];
        timing.other_bankgroups_same_rank[Write.index()] = vec![
            (Read, write_to_read_s),
            (Write, write_to_write_s),
            (ReadPrecharge, write_to_read_s),
            (WritePrecharge, write_to_write_s),
        ];
        timing.other_ranks[Write.index()] = vec![
            (Read, write_to_read_o),
            (Write, write_to_write_o),
            (ReadPrecharge, write_to_read_o),
            (WritePrecharge, write_to_write_o),
        ];

        // WRITE_PRECHARGE
        timing.same_bank[WritePrecharge.index()] = vec![
            (Activate, write_to_activate),
            (Refresh, write_to_activate),
            (RefreshBank, write_to_activate),
            (SrefEnter, write_to_activate),
        ];
        timing.other_banks_same_bankgroup[WritePrecharge.index()] =
            timing.other_banks_same_bankgroup[Write.index()].clone();
        timing.other_bankgroups_same_rank[WritePrecharge.index()] =
            timing.other_bankgroups_same_rank[Write.index()].clone();
        timing.other_ranks[WritePrecharge.index()] = timing.other_ranks[Write.index()].clone();

        // ACTIVATE
        timing.same_bank[Activate.index()] = vec![
            (Read, activate_to_rw),
            (Write, activate_to_rw),
            (ReadPrecharge, activate_to_rw),
            (WritePrecharge, activate_to_rw),
            (Activate, activate_to_activate),
            (Precharge, activate_to_precharge),
        ];
        timing.other_banks_same_bankgroup[Activate.index()] = vec![
            (Activate, activate_to_activate_l),
            (RefreshBank, activate_to_activate_l),
        ];
        timing.other_bankgroups_same_rank[Activate.index()] = vec![
            (Activate, activate_to_activate_s),
            (RefreshBank, activate_to_activate_s),
        ];

        // PRECHARGE
        timing.same_bank[Precharge.index()] = vec![
            (Activate, precharge_to_activate),
            (Precharge, config.t_ppd),
            (Refresh, precharge_to_activate),
            (RefreshBank, precharge_to_activate),
            (SrefEnter, precharge_to_activate),
        ];

        // REFRESH_BANK
        timing.same_bank[RefreshBank.index()] = vec![
            (Activate, refresh_bank_to_activate),
            (Refresh, refresh_bank_to_activate),
            (RefreshBank, refresh_bank_to_activate),
            (SrefEnter, refresh_bank_to_activate),
        ];
        timing.other_banks_same_bankgroup[RefreshBank.index()] = vec![
            (Activate, activate_to_activate_l),
            (RefreshBank, activate_to_activate_l),
        ];
        timing.other_bankgroups_same_rank[RefreshBank.index()] = vec![
            (Activate, activate_to_activate_s),
            (RefreshBank, activate_to_activate_s),
        ];

        // rank-wide commands
        timing.same_rank[Refresh.index()] = vec![
            (Activate, refresh_to_activate),
            (Refresh, refresh_to_activate),
            (RefreshBank, refresh_to_activate),
            (SrefEnter, refresh_to_activate),
        ];
        timing.same_rank[SrefEnter.index()] = vec![(SrefExit, sref_enter_to_exit)];
        timing.same_rank[SrefExit.index()] = vec![
            (Activate, sref_exit_to_cmd),
            (Refresh, sref_exit_to_cmd),
            (RefreshBank, sref_exit_to_cmd),
            (SrefEnter, sref_exit_to_cmd),
        ];

        timing
    }

    /// Constraints on the issuing bank itself.
    #[inline]
    pub fn same_bank(&self, kind: CommandKind) -> &ConstraintList {
        &self.same_bank[kind.index()]
    }

    /// Constraints on sibling banks in the issuing bankgroup.
    #[inline]
    pub fn other_banks_same_bankgroup(&self, kind: CommandKind) -> &ConstraintList {
        &self.other_banks_same_bankgroup[kind.index()]
    }

    /// Constraints on banks in the other bankgroups of the issuing rank.
    #[inline]
    pub fn other_bankgroups_same_rank(&self, kind: CommandKind) -> &ConstraintList {
        &self.other_bankgroups_same_rank[kind.index()]
    }

    /// Constraints on banks in other ranks of the channel.
    #[inline]
    pub fn other_ranks(&self, kind: CommandKind) -> &ConstraintList {
        &self.other_ranks[kind.index()]
    }

    /// Whole-rank constraints for rank-wide commands.
    #[inline]
    pub fn same_rank(&self, kind: CommandKind) -> &ConstraintList {
        &self.same_rank[kind.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn timing() -> (Arc<Config>, Timing) {
        let config = Arc::new(Config::ddr4_sample());
        let timing = Timing::new(&config);
        (config, timing)
    }

    fn lookup(list: &ConstraintList, kind: CommandKind) -> u64 {
        list.iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, d)| *d)
            .unwrap_or_else(|| panic!("no constraint for {:?}", kind))
    }

    #[test]
    fn test_activate_constraints() {
        let (config, timing) = timing();
        let same = timing.same_bank(CommandKind::Activate);
        assert_eq!(lookup(same, CommandKind::Read), config.t_rcd);
        assert_eq!(lookup(same, CommandKind::Activate), config.t_rc);
        assert_eq!(lookup(same, CommandKind::Precharge), config.t_ras);

        let sibling = timing.other_banks_same_bankgroup(CommandKind::Activate);
        assert_eq!(lookup(sibling, CommandKind::Activate), config.t_rrd_l);
        let cross_group = timing.other_bankgroups_same_rank(CommandKind::Activate);
        assert_eq!(lookup(cross_group, CommandKind::Activate), config.t_rrd_s);

        // activation pacing across ranks comes only from the windows
        assert!(timing.other_ranks(CommandKind::Activate).is_empty());
    }

    #[test]
    fn test_column_spacing_uses_burst_floor() {
        let (config, timing) = timing();
        let same = timing.same_bank(CommandKind::Read);
        assert_eq!(
            lookup(same, CommandKind::Read),
            config.burst_cycle.max(config.t_ccd_l)
        );
        let cross_group = timing.other_bankgroups_same_rank(CommandKind::Read);
        assert_eq!(
            lookup(cross_group, CommandKind::Read),
            config.burst_cycle.max(config.t_ccd_s)
        );
    }

    #[test]
    fn test_write_recovery_dominates_precharge() {
        let (config, timing) = timing();
        let same = timing.same_bank(CommandKind::Write);
        assert_eq!(
            lookup(same, CommandKind::Precharge),
            config.wl + config.burst_cycle + config.t_wr
        );
    }

    #[test]
    fn test_rank_wide_lists() {
        let (config, timing) = timing();
        let refresh = timing.same_rank(CommandKind::Refresh);
        assert_eq!(lookup(refresh, CommandKind::Activate), config.t_rfc);
        let sref_exit = timing.same_rank(CommandKind::SrefExit);
        assert_eq!(lookup(sref_exit, CommandKind::Activate), config.t_xs);
        let sref_enter = timing.same_rank(CommandKind::SrefEnter);
        assert_eq!(lookup(sref_enter, CommandKind::SrefExit), config.t_ckesr);
    }

    #[test]
    fn test_data_commands_never_constrain_rank_lists() {
        let (_, timing) = timing();
        for kind in [CommandKind::Read, CommandKind::Write] {
            assert!(timing.same_rank(kind).is_empty());
        }
    }
}
