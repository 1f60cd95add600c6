use std::ops::Range;

use super::{ColumnLayout, GridGeometry};

/// Direction of a synchronization round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncType {
    /// mirrors push their updates to the master
    Reduce,
    /// masters push their value to the mirrors
    Broadcast,
}

/// Endpoint of an edge whose value an operator writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteLocation {
    Source,
    Destination,
    Any,
}

/// Endpoint of an edge whose value an operator reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadLocation {
    Source,
    Destination,
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endpoint {
    Source,
    Destination,
    Any,
}

impl From<WriteLocation> for Endpoint {
    fn from(location: WriteLocation) -> Self {
        match location {
            WriteLocation::Source => Endpoint::Source,
            WriteLocation::Destination => Endpoint::Destination,
            WriteLocation::Any => Endpoint::Any,
        }
    }
}

impl From<ReadLocation> for Endpoint {
    fn from(location: ReadLocation) -> Self {
        match location {
            ReadLocation::Source => Endpoint::Source,
            ReadLocation::Destination => Endpoint::Destination,
            ReadLocation::Any => Endpoint::Any,
        }
    }
}

/// Which real hosts one host has to talk to in a sync round.
///
/// Source values only ever travel along grid rows and destination values along
/// grid columns, unless blocks are laid out in column groups, where no host
/// can be ruled out.
#[derive(Debug, Clone, Copy)]
pub struct PartnerRule {
    grid: GridGeometry,
    layout: ColumnLayout,
    host: usize,
}

impl PartnerRule {
    pub fn new(grid: GridGeometry, layout: ColumnLayout, host: usize) -> Self {
        Self { grid, layout, host }
    }

    pub fn shares_row(&self, remote: usize) -> bool {
        self.grid.row_id(remote) == self.grid.row_id(self.host)
    }

    pub fn shares_column(&self, remote: usize) -> bool {
        self.grid.column_id(remote) == self.grid.column_id(self.host)
    }

    fn endpoint(sync: SyncType, write: WriteLocation, read: ReadLocation) -> Endpoint {
        match sync {
            SyncType::Reduce => write.into(),
            SyncType::Broadcast => read.into(),
        }
    }

    pub fn is_communication_partner(
        &self,
        remote: usize,
        sync: SyncType,
        write: WriteLocation,
        read: ReadLocation,
    ) -> bool {
        if self.layout == ColumnLayout::Blocked {
            return true;
        }
        match Self::endpoint(sync, write, read) {
            Endpoint::Source => self.shares_row(remote),
            Endpoint::Destination => self.shares_column(remote),
            Endpoint::Any => self.shares_row(remote) || self.shares_column(remote),
        }
    }

    /// Whether `remote` can be left out of a round given whether the node list
    /// shared with it for that round is empty
    pub fn can_skip(
        &self,
        remote: usize,
        sync: SyncType,
        write: WriteLocation,
        read: ReadLocation,
        shared_is_empty: bool,
    ) -> bool {
        if shared_is_empty {
            return true;
        }
        if self.layout == ColumnLayout::RoundRobin
            && Self::endpoint(sync, write, read) == Endpoint::Any
        {
            assert!(
                self.shares_row(remote) || self.shares_column(remote),
                "host {} shares nodes with host {} outside its row and column",
                self.host,
                remote
            );
        }
        !self.is_communication_partner(remote, sync, write, read)
    }
}

/// Local id ranges whose dirty bits a round of `sync` clears: the masters for
/// a broadcast, the mirrors on either side of them for a reduce
pub fn dirty_ranges(
    sync: SyncType,
    begin_master: usize,
    num_owned: usize,
    num_nodes: usize,
) -> Vec<Range<usize>> {
    if num_owned == 0 {
        return Vec::new();
    }
    let end_master = begin_master + num_owned;
    match sync {
        SyncType::Broadcast => vec![begin_master..end_master],
        SyncType::Reduce => [0..begin_master, end_master..num_nodes]
            .into_iter()
            .filter(|range| !range.is_empty())
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(hosts: usize, layout: ColumnLayout, host: usize) -> PartnerRule {
        PartnerRule::new(GridGeometry::new(hosts, 1, false).unwrap(), layout, host)
    }

    #[test]
    fn test_reduce_follows_write_location() {
        // 2 x 2 grid: host 0 shares its row with 1 and its column with 2
        let r = rule(4, ColumnLayout::RoundRobin, 0);
        let read = ReadLocation::Any;
        assert!(r.is_communication_partner(1, SyncType::Reduce, WriteLocation::Source, read));
        assert!(!r.is_communication_partner(2, SyncType::Reduce, WriteLocation::Source, read));
        assert!(r.is_communication_partner(2, SyncType::Reduce, WriteLocation::Destination, read));
        assert!(!r.is_communication_partner(1, SyncType::Reduce, WriteLocation::Destination, read));
        assert!(!r.is_communication_partner(3, SyncType::Reduce, WriteLocation::Any, read));
    }

    #[test]
    fn test_broadcast_follows_read_location() {
        let r = rule(4, ColumnLayout::RoundRobin, 3);
        let write = WriteLocation::Any;
        assert!(r.is_communication_partner(2, SyncType::Broadcast, write, ReadLocation::Source));
        assert!(r.is_communication_partner(1, SyncType::Broadcast, write, ReadLocation::Destination));
        assert!(r.is_communication_partner(1, SyncType::Broadcast, write, ReadLocation::Any));
        assert!(!r.is_communication_partner(0, SyncType::Broadcast, write, ReadLocation::Any));
    }

    #[test]
    fn test_blocked_layout_never_skips() {
        let r = rule(4, ColumnLayout::Blocked, 0);
        assert!(r.is_communication_partner(3, SyncType::Reduce, WriteLocation::Source, ReadLocation::Any));
        assert!(!r.can_skip(3, SyncType::Reduce, WriteLocation::Any, ReadLocation::Any, false));
        assert!(r.can_skip(3, SyncType::Reduce, WriteLocation::Any, ReadLocation::Any, true));
    }

    #[test]
    fn test_partner_relation_is_symmetric() {
        let locations = [WriteLocation::Source, WriteLocation::Destination, WriteLocation::Any];
        for a in 0..6 {
            for b in 0..6 {
                for write in locations {
                    let ab = rule(6, ColumnLayout::RoundRobin, a);
                    let ba = rule(6, ColumnLayout::RoundRobin, b);
                    assert_eq!(
                        ab.is_communication_partner(b, SyncType::Reduce, write, ReadLocation::Any),
                        ba.is_communication_partner(a, SyncType::Reduce, write, ReadLocation::Any)
                    );
                }
            }
        }
    }

    #[test]
    #[should_panic(expected = "outside its row and column")]
    fn test_shared_nodes_off_grid_lines_panic() {
        let r = rule(4, ColumnLayout::RoundRobin, 0);
        r.can_skip(3, SyncType::Reduce, WriteLocation::Any, ReadLocation::Any, false);
    }

    #[test]
    fn test_dirty_ranges() {
        assert_eq!(dirty_ranges(SyncType::Broadcast, 0, 4, 9), vec![0..4]);
        assert_eq!(dirty_ranges(SyncType::Reduce, 0, 4, 9), vec![4..9]);
        assert_eq!(dirty_ranges(SyncType::Reduce, 2, 4, 9), vec![0..2, 6..9]);
        assert!(dirty_ranges(SyncType::Reduce, 0, 4, 4).is_empty());
        assert!(dirty_ranges(SyncType::Broadcast, 0, 0, 3).is_empty());
    }
}
