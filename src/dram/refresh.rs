//! Periodic refresh scheduling.
//!
//! Every refresh interval the engine enqueues a REFRESH (all-bank) or
//! REFRESH_BANK command into the channel's refresh queue; the controller
//! consumes the queue via [`crate::dram::CommandQueue::finish_refresh`],
//! arbitrating against in-flight traffic.
//!
//! Distribution policies:
//! - rank-staggered: one rank every tREFI / ranks cycles, round-robin
//! - rank-simultaneous: every rank at once, every tREFI cycles
//! - bank-staggered: one bank every tREFIb / banks cycles, round-robin

use std::sync::Arc;

use crate::config::{Config, RefreshPolicy};
use crate::dram::channel::ChannelState;

/// Refresh engine for one channel.
pub struct Refresh {
    config: Arc<Config>,
    clk: u64,
    refresh_interval: u64,
    next_rank: usize,
    next_bankgroup: usize,
    next_bank: usize,
}

impl Refresh {
    /// Create the engine; the interval is derived from the policy.
    pub fn new(config: Arc<Config>) -> Self {
        let refresh_interval = match config.refresh_policy {
            RefreshPolicy::RankSimultaneous => config.t_refi,
            RefreshPolicy::RankStaggered => config.t_refi / config.ranks as u64,
            RefreshPolicy::BankStaggered => config.t_refib / config.banks as u64,
        };
        Self {
            config,
            clk: 0,
            refresh_interval,
            next_rank: 0,
            next_bankgroup: 0,
            next_bank: 0,
        }
    }

    /// Advance one cycle; enqueues refresh work when the interval elapses.
    pub fn clock_tick(&mut self, channel_state: &mut ChannelState) {
        if self.refresh_interval > 0 && self.clk > 0 && self.clk % self.refresh_interval == 0 {
            self.insert_refresh(channel_state);
        }
        self.clk += 1;
    }

    fn insert_refresh(&mut self, channel_state: &mut ChannelState) {
        match self.config.refresh_policy {
            RefreshPolicy::RankSimultaneous => {
                for rank in 0..self.config.ranks {
                    // self-refreshing ranks refresh themselves
                    if !channel_state.is_rank_self_refreshing(rank) {
                        channel_state.rank_need_refresh(rank, true);
                    }
                }
            }
            RefreshPolicy::RankStaggered => {
                if !channel_state.is_rank_self_refreshing(self.next_rank) {
                    log::debug!("refresh queued for rank {} at {}", self.next_rank, self.clk);
                    channel_state.rank_need_refresh(self.next_rank, true);
                }
                self.next_rank = (self.next_rank + 1) % self.config.ranks;
            }
            RefreshPolicy::BankStaggered => {
                if !channel_state.is_rank_self_refreshing(self.next_rank) {
                    channel_state.bank_need_refresh(
                        self.next_rank,
                        self.next_bankgroup,
                        self.next_bank,
                        true,
                    );
                }
                self.advance_bank();
            }
        }
    }

    fn advance_bank(&mut self) {
        self.next_bank += 1;
        if self.next_bank == self.config.banks_per_group {
            self.next_bank = 0;
            self.next_bankgroup += 1;
            if self.next_bankgroup == self.config.bankgroups {
                self.next_bankgroup = 0;
                self.next_rank = (self.next_rank + 1) % self.config.ranks;
            }
        }
    }
}
