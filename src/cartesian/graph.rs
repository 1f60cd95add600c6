use std::fmt;
use std::ops::Range;
use std::time::Instant;

use anyhow::anyhow;
use indexmap::IndexSet;
use log::{error, info, warn};

use super::{
    dirty_ranges,
    edges::exchange_edges,
    mirrors::{build_mirror_lists, exchange_master_lists},
    statistics::collect_statistics,
    Addressing, Balance, CartesianConfig, FileGraph, GridGeometry, LocalCsr, MessageManager,
    PartnerRule, Payload, RangeTable, ReadLocation, SyncType, Transport, WriteLocation,
};

/// Per-host numbers of a finished partition
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PartitionSummary {
    pub host: usize,
    pub num_nodes: usize,
    pub num_edges: usize,
    pub num_owned: usize,
    pub num_mirrors: usize,
    pub dummy_outgoing_nodes: usize,
    /// local nodes per owned node
    pub replication: f64,
}

impl fmt::Display for PartitionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "host {}: {} nodes ({} owned, {} mirrors, {} dummy), {} edges, replication {:.2}",
            self.host,
            self.num_nodes,
            self.num_owned,
            self.num_mirrors,
            self.dummy_outgoing_nodes,
            self.num_edges,
            self.replication
        )
    }
}

/// The part of a graph one host stores under a cartesian vertex cut: the
/// edges of its grid cell as a local CSR, plus the master and mirror lists
/// the synchronization rounds use.
///
/// Local ids `[begin_master, begin_master + num_owned)` are the masters; all
/// other local nodes are mirrors.
#[derive(Debug)]
pub struct CartesianGraph<E> {
    addr: Addressing,
    partners: PartnerRule,
    local_ids: IndexSet<u64>,
    csr: LocalCsr<E>,
    num_owned: usize,
    begin_master: usize,
    num_nodes_with_edges: usize,
    dummy_outgoing_nodes: usize,
    /// idx = real host, element = global ids mirrored here that it owns
    mirror_nodes: Vec<Vec<u64>>,
    /// idx = real host, element = global ids owned here that it mirrors
    master_nodes: Vec<Vec<u64>>,
}

impl<E: Payload> CartesianGraph<E> {
    /// Range table `config` asks for. Hosts that load only their own rows need
    /// it before building.
    pub fn range_table<G: FileGraph>(
        graph: &G,
        num_hosts: usize,
        config: &CartesianConfig,
    ) -> anyhow::Result<RangeTable> {
        config.validate(num_hosts)?;
        let blocks = num_hosts * config.decompose_factor;
        match config.balance {
            Balance::Nodes => Ok(RangeTable::uniform(blocks, graph.node_count())),
            Balance::NodesAndEdges => {
                RangeTable::balanced(graph, blocks, &config.scale_factors_for(num_hosts))
            }
        }
    }

    /// Partition `graph` over every host reachable through `manager`. Every
    /// host must call this with the same graph and configuration.
    pub fn build<G, T>(
        graph: &G,
        manager: &mut MessageManager<T>,
        config: &CartesianConfig,
    ) -> anyhow::Result<Self>
    where
        G: FileGraph<Payload = E>,
        T: Transport,
    {
        let ranges = Self::range_table(graph, manager.num_hosts(), config)?;
        Self::build_with_ranges(graph, manager, config, ranges)
    }

    pub fn build_with_ranges<G, T>(
        graph: &G,
        manager: &mut MessageManager<T>,
        config: &CartesianConfig,
        ranges: RangeTable,
    ) -> anyhow::Result<Self>
    where
        G: FileGraph<Payload = E>,
        T: Transport,
    {
        let num_hosts = manager.num_hosts();
        let host = manager.host_id();
        config.validate(num_hosts)?;

        if ranges.global_vcount() != graph.node_count() {
            let err = anyhow!(
                "Range table covers {} nodes but the graph has {}",
                ranges.global_vcount(),
                graph.node_count()
            );
            error!("{}", err);
            return Err(err);
        }

        let grid = GridGeometry::new(num_hosts, config.decompose_factor, config.more_column_hosts)?;
        if host == 0 {
            grid.log_layout();
            if !grid.is_vertex_cut() {
                warn!("A {} x {} grid is an edge cut", grid.num_row_hosts(), grid.num_column_hosts());
            }
        }
        let addr = Addressing::new(grid, ranges, config.layout, host)?;

        let timer = Instant::now();
        let mut nodes = collect_statistics(graph, &addr, manager)?;
        let mut csr = LocalCsr::allocate(std::mem::take(&mut nodes.prefix_sum));
        exchange_edges(graph, &addr, &nodes, &mut csr, manager)?;

        let mirror_nodes = build_mirror_lists(&addr, &nodes);
        let master_nodes = exchange_master_lists(&addr, &mirror_nodes, manager)?;
        info!("Graph construction time: {:.3?}", timer.elapsed());

        let partition = Self {
            partners: PartnerRule::new(grid, config.layout, host),
            addr,
            local_ids: nodes.local_ids,
            csr,
            num_owned: nodes.num_owned,
            begin_master: nodes.begin_master,
            num_nodes_with_edges: nodes.num_nodes_with_edges,
            dummy_outgoing_nodes: nodes.dummy_outgoing_nodes,
            mirror_nodes,
            master_nodes,
        };
        info!("{}", partition.summary());
        Ok(partition)
    }

    pub fn host_id(&self) -> usize {
        self.addr.host_id()
    }

    pub fn num_hosts(&self) -> usize {
        self.addr.grid().num_hosts()
    }

    pub fn grid(&self) -> &GridGeometry {
        self.addr.grid()
    }

    pub fn addressing(&self) -> &Addressing {
        &self.addr
    }

    pub fn is_vertex_cut(&self) -> bool {
        self.addr.grid().is_vertex_cut()
    }

    pub fn global_node_count(&self) -> u64 {
        self.addr.ranges().global_vcount()
    }

    pub fn num_nodes(&self) -> usize {
        self.local_ids.len()
    }

    pub fn num_edges(&self) -> usize {
        self.csr.num_edges()
    }

    pub fn num_owned(&self) -> usize {
        self.num_owned
    }

    pub fn begin_master(&self) -> usize {
        self.begin_master
    }

    /// local nodes before the pure destination placeholders
    pub fn num_nodes_with_edges(&self) -> usize {
        self.num_nodes_with_edges
    }

    pub fn dummy_outgoing_nodes(&self) -> usize {
        self.dummy_outgoing_nodes
    }

    pub fn is_owned(&self, gid: u64) -> bool {
        self.addr.is_owned(gid)
    }

    pub fn is_local(&self, gid: u64) -> bool {
        self.is_owned(gid) || self.local_ids.contains(&gid)
    }

    pub fn is_master(&self, lid: u32) -> bool {
        (self.begin_master..self.begin_master + self.num_owned).contains(&(lid as usize))
    }

    pub fn global_to_local(&self, gid: u64) -> Option<u32> {
        self.local_ids.get_index_of(&gid).map(|lid| lid as u32)
    }

    pub fn local_to_global(&self, lid: u32) -> u64 {
        match self.local_ids.get_index(lid as usize) {
            Some(&gid) => gid,
            None => panic!("local id {} out of range ({} nodes)", lid, self.num_nodes()),
        }
    }

    pub fn csr(&self) -> &LocalCsr<E> {
        &self.csr
    }

    /// (local destination, payload) of every edge of local node `lid`
    pub fn edges(&self, lid: u32) -> impl Iterator<Item = (u32, E)> + '_ {
        self.csr.edges(lid)
    }

    pub fn edge_range(&self, lid: u32) -> Range<usize> {
        self.csr.edge_range(lid)
    }

    pub fn edge_destination(&self, edge: usize) -> u32 {
        self.csr.edge_destination(edge)
    }

    pub fn edge_payload(&self, edge: usize) -> E {
        self.csr.edge_payload(edge)
    }

    pub fn mirror_nodes(&self) -> &[Vec<u64>] {
        &self.mirror_nodes
    }

    pub fn master_nodes(&self) -> &[Vec<u64>] {
        &self.master_nodes
    }

    pub fn is_communication_partner(
        &self,
        host: usize,
        sync: SyncType,
        write: WriteLocation,
        read: ReadLocation,
    ) -> bool {
        self.partners.is_communication_partner(host, sync, write, read)
    }

    /// `host` gets nothing from this host in a round of `sync`
    pub fn nothing_to_send(
        &self,
        host: usize,
        sync: SyncType,
        write: WriteLocation,
        read: ReadLocation,
    ) -> bool {
        let shared = match sync {
            SyncType::Reduce => &self.mirror_nodes[host],
            SyncType::Broadcast => &self.master_nodes[host],
        };
        self.partners.can_skip(host, sync, write, read, shared.is_empty())
    }

    /// this host gets nothing from `host` in a round of `sync`
    pub fn nothing_to_recv(
        &self,
        host: usize,
        sync: SyncType,
        write: WriteLocation,
        read: ReadLocation,
    ) -> bool {
        let shared = match sync {
            SyncType::Reduce => &self.master_nodes[host],
            SyncType::Broadcast => &self.mirror_nodes[host],
        };
        self.partners.can_skip(host, sync, write, read, shared.is_empty())
    }

    /// Hand `reset` every local id range whose dirty bits a round of `sync`
    /// leaves stale
    pub fn reset_dirty_range(&self, sync: SyncType, mut reset: impl FnMut(Range<usize>)) {
        for range in dirty_ranges(sync, self.begin_master, self.num_owned, self.num_nodes()) {
            reset(range);
        }
    }

    pub fn summary(&self) -> PartitionSummary {
        let num_mirrors = self.num_nodes() - self.num_owned;
        PartitionSummary {
            host: self.host_id(),
            num_nodes: self.num_nodes(),
            num_edges: self.num_edges(),
            num_owned: self.num_owned,
            num_mirrors,
            dummy_outgoing_nodes: self.dummy_outgoing_nodes,
            replication: if self.num_owned == 0 {
                0.0
            } else {
                self.num_nodes() as f64 / self.num_owned as f64
            },
        }
    }
}
