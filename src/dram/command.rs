//! Command and transaction vocabulary.
//!
//! Two levels of traffic flow through the simulator:
//! - [`Transaction`]: a host-side read or write at a byte address
//! - [`Command`]: a device-level DRAM command at a decoded location
//!
//! A transaction is translated into exactly one data command (READ/WRITE or
//! their auto-precharge variants); the scheduler then discovers whatever
//! prerequisite commands (ACTIVATE, PRECHARGE, refresh traffic) the bank
//! state demands before the data command may issue.

use std::fmt;

/// Decoded location of a command inside one channel.
///
/// Produced by the configurable address mapping from a 64-bit physical
/// address. Rank-scoped commands (REFRESH, SREF_ENTER/EXIT) only populate
/// the `rank` field; the remaining fields are left at zero and never read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Address {
    /// Channel index.
    pub channel: usize,
    /// Rank index within the channel.
    pub rank: usize,
    /// Bankgroup index within the rank.
    pub bankgroup: usize,
    /// Bank index within the bankgroup.
    pub bank: usize,
    /// Row index within the bank.
    pub row: usize,
    /// Column index within the row.
    pub column: usize,
}

impl Address {
    /// Create a fully decoded address.
    pub fn new(
        channel: usize,
        rank: usize,
        bankgroup: usize,
        bank: usize,
        row: usize,
        column: usize,
    ) -> Self {
        Self { channel, rank, bankgroup, bank, row, column }
    }

    /// Create a rank-scoped address (for rank-wide commands).
    pub fn rank_only(rank: usize) -> Self {
        Self { rank, ..Self::default() }
    }

    /// Create a bank-scoped address (for per-bank refresh).
    pub fn bank_only(rank: usize, bankgroup: usize, bank: usize) -> Self {
        Self { rank, bankgroup, bank, ..Self::default() }
    }
}

/// Device-level DRAM command kinds.
///
/// `ReadPrecharge`/`WritePrecharge` are the fused auto-precharge data
/// commands used by the close-page row-buffer policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum CommandKind {
    Read,
    ReadPrecharge,
    Write,
    WritePrecharge,
    Activate,
    Precharge,
    Refresh,
    RefreshBank,
    SrefEnter,
    SrefExit,
}

impl CommandKind {
    /// Number of command kinds (sizes the per-bank timing table).
    pub const COUNT: usize = 10;

    /// Table index for this kind.
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// True for READ and READ_PRECHARGE.
    #[inline]
    pub fn is_read(self) -> bool {
        matches!(self, CommandKind::Read | CommandKind::ReadPrecharge)
    }

    /// True for WRITE and WRITE_PRECHARGE.
    #[inline]
    pub fn is_write(self) -> bool {
        matches!(self, CommandKind::Write | CommandKind::WritePrecharge)
    }

    /// True for any data command (the read/write family).
    #[inline]
    pub fn is_read_write(self) -> bool {
        self.is_read() || self.is_write()
    }

    /// True for REFRESH and REFRESH_BANK.
    #[inline]
    pub fn is_refresh(self) -> bool {
        matches!(self, CommandKind::Refresh | CommandKind::RefreshBank)
    }

    /// True for commands addressed to a whole rank rather than one bank.
    #[inline]
    pub fn is_rank_wide(self) -> bool {
        matches!(
            self,
            CommandKind::Refresh | CommandKind::SrefEnter | CommandKind::SrefExit
        )
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandKind::Read => "READ",
            CommandKind::ReadPrecharge => "READ_P",
            CommandKind::Write => "WRITE",
            CommandKind::WritePrecharge => "WRITE_P",
            CommandKind::Activate => "ACT",
            CommandKind::Precharge => "PRE",
            CommandKind::Refresh => "REF",
            CommandKind::RefreshBank => "REFb",
            CommandKind::SrefEnter => "SREF_ENTER",
            CommandKind::SrefExit => "SREF_EXIT",
        };
        write!(f, "{}", name)
    }
}

/// A device-level command bound to a decoded location.
///
/// `hex_addr` carries the requester's opaque byte address through the
/// command pipeline so completions can be dispatched back by address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub kind: CommandKind,
    pub addr: Address,
    pub hex_addr: u64,
}

impl Command {
    /// Create a command.
    pub fn new(kind: CommandKind, addr: Address, hex_addr: u64) -> Self {
        Self { kind, addr, hex_addr }
    }

    /// Derive a command of a different kind at the same location.
    pub fn with_kind(&self, kind: CommandKind) -> Self {
        Self { kind, ..*self }
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.addr.rank
    }

    #[inline]
    pub fn bankgroup(&self) -> usize {
        self.addr.bankgroup
    }

    #[inline]
    pub fn bank(&self) -> usize {
        self.addr.bank
    }

    #[inline]
    pub fn row(&self) -> usize {
        self.addr.row
    }

    #[inline]
    pub fn column(&self) -> usize {
        self.addr.column
    }

    /// True if the two commands target the same bank.
    #[inline]
    pub fn same_bank(&self, other: &Command) -> bool {
        self.rank() == other.rank()
            && self.bankgroup() == other.bankgroup()
            && self.bank() == other.bank()
    }
}

impl fmt::Display for Command {
    /// Command-trace line format: `<kind> <rank> <bg> <bank> <row> <col>`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<12} {:>2} {:>2} {:>2} {:>6} {:>6}",
            self.kind.to_string(),
            self.rank(),
            self.bankgroup(),
            self.bank(),
            self.row(),
            self.column()
        )
    }
}

/// A host-side memory request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transaction {
    /// Original 64-bit byte address.
    pub addr: u64,
    /// Write (true) or read (false).
    pub is_write: bool,
    /// Cycle the controller admitted the transaction.
    pub added_cycle: u64,
    /// Cycle the transaction is considered complete; set at data-command
    /// issue, or immediately for buffered writes and bypassed reads.
    pub complete_cycle: u64,
}

impl Transaction {
    /// Create a transaction; cycle fields are filled in at admission/issue.
    pub fn new(addr: u64, is_write: bool) -> Self {
        Self { addr, is_write, added_cycle: 0, complete_cycle: 0 }
    }
}

impl fmt::Display for Transaction {
    /// Address-trace line format: `<hex_addr> <READ|WRITE> <cycle>`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:#x} {} {}",
            self.addr,
            if self.is_write { "WRITE" } else { "READ" },
            self.added_cycle
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert!(CommandKind::Read.is_read());
        assert!(CommandKind::ReadPrecharge.is_read());
        assert!(!CommandKind::Write.is_read());
        assert!(CommandKind::WritePrecharge.is_write());
        assert!(CommandKind::Read.is_read_write());
        assert!(!CommandKind::Activate.is_read_write());
        assert!(CommandKind::Refresh.is_refresh());
        assert!(CommandKind::RefreshBank.is_refresh());
        assert!(CommandKind::Refresh.is_rank_wide());
        assert!(!CommandKind::RefreshBank.is_rank_wide());
        assert!(CommandKind::SrefExit.is_rank_wide());
    }

    #[test]
    fn test_kind_indices_are_dense() {
        let kinds = [
            CommandKind::Read,
            CommandKind::ReadPrecharge,
            CommandKind::Write,
            CommandKind::WritePrecharge,
            CommandKind::Activate,
            CommandKind::Precharge,
            CommandKind::Refresh,
            CommandKind::RefreshBank,
            CommandKind::SrefEnter,
            CommandKind::SrefExit,
        ];
        assert_eq!(kinds.len(), CommandKind::COUNT);
        for (i, k) in kinds.iter().enumerate() {
            assert_eq!(k.index(), i);
        }
    }

    #[test]
    fn test_same_bank() {
        let a = Command::new(
            CommandKind::Read,
            Address::new(0, 1, 2, 3, 42, 7),
            0x1000,
        );
        let b = a.with_kind(CommandKind::Precharge);
        assert!(a.same_bank(&b));
        let mut other = a;
        other.addr.bank = 0;
        assert!(!a.same_bank(&other));
    }

    #[test]
    fn test_transaction_trace_format() {
        let mut t = Transaction::new(0x2468, false);
        t.added_cycle = 99;
        assert_eq!(t.to_string(), "0x2468 READ 99");
    }
}
