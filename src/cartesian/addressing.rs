use std::ops::Range;

use anyhow::anyhow;
use log::{debug, error};

use super::{ColumnLayout, GridGeometry, RangeTable};

/// Maps global ids to the hosts that own them and to the grid column that
/// stores their incoming edges, from the point of view of one host.
///
/// Blocks are the ranges of the range table and are indexed by virtual host.
#[derive(Debug, Clone)]
pub struct Addressing {
    grid: GridGeometry,
    ranges: RangeTable,
    layout: ColumnLayout,
    host: usize,
    /// idx = block, element = ids of earlier blocks in the same column
    column_offsets: Vec<u64>,
    /// idx = column, element = ids assigned to that column
    column_sizes: Vec<u64>,
}

impl Addressing {
    pub fn new(
        grid: GridGeometry,
        ranges: RangeTable,
        layout: ColumnLayout,
        host: usize,
    ) -> anyhow::Result<Self> {
        if ranges.num_blocks() != grid.num_virtual_hosts() {
            let err = anyhow!(
                "Range table has {} blocks but the grid has {} virtual hosts",
                ranges.num_blocks(),
                grid.num_virtual_hosts()
            );
            error!("{}", err);
            return Err(err);
        }
        if host >= grid.num_hosts() {
            let err = anyhow!("Host {} outside a grid of {} hosts", host, grid.num_hosts());
            error!("{}", err);
            return Err(err);
        }

        let mut addressing = Self {
            grid,
            ranges,
            layout,
            host,
            column_offsets: Vec::new(),
            column_sizes: vec![0; grid.num_column_hosts()],
        };

        let mut column_offsets = Vec::with_capacity(addressing.ranges.num_blocks());
        for block in 0..addressing.ranges.num_blocks() {
            let column = addressing.column_of_block(block);
            column_offsets.push(addressing.column_sizes[column]);
            addressing.column_sizes[column] += addressing.ranges.block_len(block);
        }
        addressing.column_offsets = column_offsets;
        debug!("Column sizes: {:?}", addressing.column_sizes);

        Ok(addressing)
    }

    pub fn grid(&self) -> &GridGeometry {
        &self.grid
    }

    pub fn ranges(&self) -> &RangeTable {
        &self.ranges
    }

    pub fn layout(&self) -> ColumnLayout {
        self.layout
    }

    pub fn host_id(&self) -> usize {
        self.host
    }

    /// grid column of this host, the same for all of its virtual hosts
    pub fn my_column(&self) -> usize {
        self.grid.column_id(self.host)
    }

    /// virtual host whose range contains `gid`
    pub fn host_of(&self, gid: u64) -> usize {
        self.ranges.block_of(gid)
    }

    pub fn real_owner(&self, gid: u64) -> usize {
        self.grid.virtual_to_real(self.host_of(gid))
    }

    pub fn is_owned(&self, gid: u64) -> bool {
        gid < self.ranges.global_vcount() && self.real_owner(gid) == self.host
    }

    /// virtual hosts of this host, one per decomposition slice
    pub fn owned_blocks(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.grid.decompose_factor()).map(|slice| self.grid.virtual_host(self.host, slice))
    }

    /// global ids owned here, slice by slice
    pub fn owned_ranges(&self) -> impl Iterator<Item = Range<u64>> + '_ {
        self.owned_blocks().map(|block| self.ranges.range(block))
    }

    pub fn num_owned(&self) -> u64 {
        self.owned_blocks().map(|block| self.ranges.block_len(block)).sum()
    }

    pub fn column_of_block(&self, block: usize) -> usize {
        match self.layout {
            ColumnLayout::RoundRobin => block % self.grid.num_column_hosts(),
            ColumnLayout::Blocked => block / self.grid.num_row_hosts(),
        }
    }

    /// column whose hosts store the incoming edges of `gid`
    pub fn column_host(&self, gid: u64) -> usize {
        self.column_of_block(self.host_of(gid))
    }

    /// position of `gid` among all ids assigned to its column
    pub fn column_index(&self, gid: u64) -> usize {
        let block = self.host_of(gid);
        (self.column_offsets[block] + (gid - self.ranges.start(block))) as usize
    }

    pub fn column_size(&self, column: usize) -> usize {
        self.column_sizes[column] as usize
    }

    /// blocks assigned to `column`, in block order
    pub fn blocks_in_column(&self, column: usize) -> impl Iterator<Item = usize> + '_ {
        (0..self.ranges.num_blocks()).filter(move |&block| self.column_of_block(block) == column)
    }

    /// real hosts of this host's grid row other than itself, in column order
    pub fn row_peers(&self) -> impl Iterator<Item = usize> + '_ {
        self.grid.row_members(self.host).filter(move |&peer| peer != self.host)
    }

    /// A virtual host shares one of this host's virtual rows exactly when its
    /// real host sits in this host's grid row.
    pub fn shares_row(&self, vhost: usize) -> bool {
        let real = self.grid.virtual_to_real(vhost);
        self.grid.row_id(real) == self.grid.row_id(self.host)
    }

    /// real host that stores the edges this host sends toward `column`
    pub fn edge_target(&self, column: usize) -> usize {
        self.grid.row_leader(self.host) + column
    }

    /// Virtual hosts of this column whose nodes are needed here only as edge
    /// destinations. Row peers are excluded: their nodes are placed when
    /// scanning the row.
    pub fn incoming_only_blocks(&self) -> impl Iterator<Item = usize> + '_ {
        self.blocks_in_column(self.my_column())
            .filter(move |&block| !self.shares_row(block))
    }
}
