use std::time::Instant;

use anyhow::anyhow;
use indexmap::IndexSet;
use log::{debug, error, info, warn};
use rayon::prelude::*;

use super::{
    Addressing, AtomicBitSet, ColumnLayout, FileGraph, MessageManager, SendBuffer, Transport,
};

/// Result of the local count over this host's rows
pub(crate) struct LocalCounts {
    /// per slice, node-major: element `i * columns + c` counts the edges of the
    /// slice's `i`th node toward column `c`
    outgoing: Vec<Vec<u64>>,
    /// idx = column, bit = column index of a destination with an incoming edge
    has_incoming: Vec<AtomicBitSet>,
}

/// Counts of the whole grid row as seen from this host after the exchange
pub(crate) struct RowCounts {
    /// this host's counts, same layout as `LocalCounts::outgoing`
    own: Vec<Vec<u64>>,
    /// idx = column of a row peer, per slice its counts toward this column.
    /// The entry of this host's own column is empty.
    peers: Vec<Vec<Vec<u64>>>,
    /// OR over the row of every incoming bitset for this column
    incoming: AtomicBitSet,
}

/// Local node table produced by the statistics pass. The insertion index of a
/// global id in `local_ids` is its local id.
#[derive(Debug, Default)]
pub(crate) struct NodeSet {
    pub(crate) local_ids: IndexSet<u64>,
    /// idx = local id, element = end of that node's edges
    pub(crate) prefix_sum: Vec<u64>,
    pub(crate) num_owned: usize,
    pub(crate) begin_master: usize,
    pub(crate) num_nodes_with_edges: usize,
    pub(crate) dummy_outgoing_nodes: usize,
}

impl NodeSet {
    fn append(&mut self, gid: u64, edges: u64) {
        let (_, inserted) = self.local_ids.insert_full(gid);
        assert!(inserted, "global id {} was assigned a second local id", gid);
        let last = self.prefix_sum.last().copied().unwrap_or(0);
        self.prefix_sum.push(last + edges);
    }

    pub(crate) fn len(&self) -> usize {
        self.local_ids.len()
    }

    pub(crate) fn num_edges(&self) -> u64 {
        self.prefix_sum.last().copied().unwrap_or(0)
    }
}

/// First pass over the graph: count, exchange with the row, then decide which
/// nodes this host stores and how many edges each of them gets.
pub(crate) fn collect_statistics<G: FileGraph, T: Transport>(
    graph: &G,
    addr: &Addressing,
    manager: &mut MessageManager<T>,
) -> anyhow::Result<NodeSet> {
    let counts = count_edges(graph, addr);
    let row = exchange_counts(counts, addr, manager)?;
    let nodes = build_node_set(addr, &row);

    if nodes.len() > u32::MAX as usize {
        let err = anyhow!(
            "{} local nodes do not fit 32 bit local ids",
            nodes.len()
        );
        error!("{}", err);
        return Err(err);
    }

    info!(
        "Statistics pass: {} nodes ({} owned, {} with edges, {} dummy), {} edges",
        nodes.len(),
        nodes.num_owned,
        nodes.num_nodes_with_edges,
        nodes.dummy_outgoing_nodes,
        nodes.num_edges()
    );
    Ok(nodes)
}

/// Count the outgoing edges of every owned node per destination column and
/// mark every destination in the incoming bitset of its column
pub(crate) fn count_edges<G: FileGraph>(graph: &G, addr: &Addressing) -> LocalCounts {
    let columns = addr.grid().num_column_hosts();
    let has_incoming: Vec<AtomicBitSet> = (0..columns)
        .map(|column| AtomicBitSet::new(addr.column_size(column)))
        .collect();

    graph.reset_byte_counters();
    let timer = Instant::now();

    let outgoing = addr
        .owned_ranges()
        .map(|range| {
            let mut counts = vec![0u64; (range.end - range.start) as usize * columns];
            // every row owns its chunk, only the bitsets are shared
            counts
                .par_chunks_mut(columns)
                .enumerate()
                .for_each(|(i, row)| {
                    for (dst, _) in graph.out_edges(range.start + i as u64) {
                        let column = addr.column_host(dst);
                        row[column] += 1;
                        has_incoming[column].set(addr.column_index(dst));
                    }
                });
            counts
        })
        .collect();

    info!(
        "Edge inspection time: {:.3?}, {} bytes read",
        timer.elapsed(),
        graph.bytes_read()
    );

    LocalCounts {
        outgoing,
        has_incoming,
    }
}

/// Send every row peer the counts toward its column together with the
/// incoming bitset of its column, and collect the same from every peer
pub(crate) fn exchange_counts<T: Transport>(
    counts: LocalCounts,
    addr: &Addressing,
    manager: &mut MessageManager<T>,
) -> anyhow::Result<RowCounts> {
    let grid = *addr.grid();
    let host = addr.host_id();
    let columns = grid.num_column_hosts();
    let my_column = addr.my_column();
    let LocalCounts {
        outgoing,
        mut has_incoming,
    } = counts;

    for peer in addr.row_peers() {
        let column = grid.column_id(peer);
        let mut buf = SendBuffer::new();
        for slice_counts in &outgoing {
            let toward: Vec<u64> = slice_counts.chunks(columns).map(|row| row[column]).collect();
            buf.push(&toward);
        }
        buf.push(&has_incoming[column]);
        debug!("Sending {} bytes of statistics to host {}", buf.len(), peer);
        manager.send(peer, buf);
    }
    manager.flush();

    let mut incoming = std::mem::take(&mut has_incoming[my_column]);
    let mut peers: Vec<Option<Vec<Vec<u64>>>> = vec![None; columns];

    manager.receive_messages(columns - 1, |sender, mut buf| {
        if sender >= grid.num_hosts() || sender == host || grid.row_id(sender) != grid.row_id(host)
        {
            let err = anyhow!("Host {} is not a row peer of host {}", sender, host);
            error!("{}", err);
            return Err(err);
        }
        let column = grid.column_id(sender);
        if peers[column].is_some() {
            let err = anyhow!("Received statistics from host {} twice", sender);
            error!("{}", err);
            return Err(err);
        }

        let mut slices = Vec::with_capacity(grid.decompose_factor());
        for slice in 0..grid.decompose_factor() {
            let counts: Vec<u64> = buf.pop()?;
            let expected = addr.ranges().block_len(grid.virtual_host(sender, slice));
            if counts.len() as u64 != expected {
                let err = anyhow!(
                    "Host {} sent {} counts for slice {}, expected {}",
                    sender,
                    counts.len(),
                    slice,
                    expected
                );
                error!("{}", err);
                return Err(err);
            }
            slices.push(counts);
        }

        let bits: AtomicBitSet = buf.pop()?;
        if bits.len() != incoming.len() {
            let err = anyhow!(
                "Host {} sent an incoming bitset of {} bits, expected {}",
                sender,
                bits.len(),
                incoming.len()
            );
            error!("{}", err);
            return Err(err);
        }
        incoming.union_with(&bits);
        peers[column] = Some(slices);
        Ok(())
    })?;
    manager.finish_round();

    debug!(
        "Column {} has {} nodes with incoming edges",
        my_column,
        incoming.count_ones()
    );

    Ok(RowCounts {
        own: outgoing,
        peers: peers.into_iter().map(Option::unwrap_or_default).collect(),
        incoming,
    })
}

/// Assign local ids. Owned nodes come first, then row peers' nodes with edges
/// toward this column, then nodes needed only as destinations.
pub(crate) fn build_node_set(addr: &Addressing, row: &RowCounts) -> NodeSet {
    let grid = addr.grid();
    let columns = grid.num_column_hosts();
    let my_column = addr.my_column();
    let mut nodes = NodeSet::default();

    for (slice, range) in addr.owned_ranges().enumerate() {
        let own = &row.own[slice];
        for (i, gid) in range.enumerate() {
            nodes.append(gid, own[i * columns + my_column]);
        }
    }
    nodes.num_owned = nodes.len();

    for slice in 0..grid.decompose_factor() {
        for peer in addr.row_peers() {
            let vhost = grid.virtual_host(peer, slice);
            let counts = &row.peers[grid.column_id(peer)][slice];
            for (gid, &edges) in addr.ranges().range(vhost).zip(counts) {
                if edges > 0 {
                    nodes.append(gid, edges);
                } else if addr.column_host(gid) == my_column
                    && row.incoming.test(addr.column_index(gid))
                {
                    match addr.layout() {
                        ColumnLayout::Blocked => nodes.dummy_outgoing_nodes += 1,
                        ColumnLayout::RoundRobin => {
                            warn!(
                                "Partitioning of vertices resulted in some inconsistency: node {} of host {}",
                                gid, peer
                            );
                            debug_assert!(false, "node {} should be owned", gid);
                        }
                    }
                    nodes.append(gid, 0);
                }
            }
        }
    }
    nodes.num_nodes_with_edges = nodes.len();

    for block in addr.incoming_only_blocks() {
        for gid in addr.ranges().range(block) {
            if row.incoming.test(addr.column_index(gid)) {
                nodes.append(gid, 0);
            }
        }
    }

    nodes.begin_master = addr
        .owned_ranges()
        .find(|range| !range.is_empty())
        .and_then(|range| nodes.local_ids.get_index_of(&range.start))
        .unwrap_or(0);

    nodes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GridGeometry, LocalTransport, RangeTable};
    use petgraph::{csr::Csr, Directed};

    fn addressing(hosts: usize, vcount: u64, layout: ColumnLayout, host: usize) -> Addressing {
        let grid = GridGeometry::new(hosts, 1, false).unwrap();
        let ranges = RangeTable::uniform(grid.num_virtual_hosts(), vcount);
        Addressing::new(grid, ranges, layout, host).unwrap()
    }

    fn graph(n: usize, edges: &[(u32, u32)]) -> Csr<(), (), Directed, u32> {
        let mut csr = Csr::with_nodes(n);
        for &(src, dst) in edges {
            csr.add_edge(src, dst, ());
        }
        csr
    }

    #[test]
    fn test_count_edges_per_column() {
        // 2 x 2 grid over 8 nodes, host 0 owns 0 and 1
        let addr = addressing(4, 8, ColumnLayout::RoundRobin, 0);
        let csr = graph(8, &[(1, 7), (0, 2), (1, 4), (5, 6)]);

        let counts = count_edges(&csr, &addr);
        assert_eq!(counts.outgoing, vec![vec![0, 1, 1, 1]]);
        // node 4 sits at index 2 of column 0, nodes 2 and 7 at 0 and 3 of column 1
        assert!(counts.has_incoming[0].test(2));
        assert_eq!(counts.has_incoming[0].count_ones(), 1);
        assert!(counts.has_incoming[1].test(0));
        assert!(counts.has_incoming[1].test(3));
        assert_eq!(counts.has_incoming[1].count_ones(), 2);
    }

    #[test]
    fn test_single_host_owns_everything() {
        let addr = addressing(1, 5, ColumnLayout::RoundRobin, 0);
        let csr = graph(5, &[(0, 1), (0, 4), (3, 3), (4, 0)]);
        let mut manager = MessageManager::new(LocalTransport::network(1).remove(0));

        let nodes = collect_statistics(&csr, &addr, &mut manager).unwrap();
        assert_eq!(nodes.num_owned, 5);
        assert_eq!(nodes.num_nodes_with_edges, 5);
        assert_eq!(nodes.begin_master, 0);
        assert_eq!(nodes.prefix_sum, vec![2, 2, 2, 3, 4]);
        assert_eq!(nodes.local_ids.iter().copied().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
        assert_eq!(manager.phase().0, 1);
    }

    #[test]
    fn test_blocked_layout_creates_dummy_node() {
        // blocked 2 x 2 grid: blocks 0 and 1 (nodes 0..4) map to column 0
        let addr = addressing(4, 8, ColumnLayout::Blocked, 0);
        let incoming = AtomicBitSet::new(addr.column_size(0));
        // edge 0 -> 3 stored on host 0, node 3 belongs to row peer host 1
        incoming.set(addr.column_index(3));
        let row = RowCounts {
            own: vec![vec![1, 0, 0, 0]],
            peers: vec![vec![], vec![vec![0, 0]]],
            incoming,
        };

        let nodes = build_node_set(&addr, &row);
        assert_eq!(nodes.local_ids.iter().copied().collect::<Vec<_>>(), vec![0, 1, 3]);
        assert_eq!(nodes.dummy_outgoing_nodes, 1);
        assert_eq!(nodes.num_nodes_with_edges, 3);
        assert_eq!(nodes.prefix_sum, vec![1, 1, 1]);
    }

    #[test]
    fn test_incoming_only_nodes_come_last() {
        // 2 x 2 round robin grid, host 0 stores column 0 = blocks 0 and 2
        let addr = addressing(4, 8, ColumnLayout::RoundRobin, 0);
        let incoming = AtomicBitSet::new(addr.column_size(0));
        // node 5 is in block 2 (host 2), node 4 has no incoming edge
        incoming.set(addr.column_index(5));
        let row = RowCounts {
            own: vec![vec![0, 2, 1, 0]],
            peers: vec![vec![], vec![vec![3, 0]]],
            incoming,
        };

        let nodes = build_node_set(&addr, &row);
        assert_eq!(nodes.local_ids.iter().copied().collect::<Vec<_>>(), vec![0, 1, 2, 5]);
        assert_eq!(nodes.num_owned, 2);
        assert_eq!(nodes.num_nodes_with_edges, 3);
        assert_eq!(nodes.dummy_outgoing_nodes, 0);
        assert_eq!(nodes.prefix_sum, vec![0, 1, 4, 4]);
    }

    #[test]
    #[should_panic(expected = "second local id")]
    fn test_duplicate_gid_panics() {
        let mut nodes = NodeSet::default();
        nodes.append(3, 1);
        nodes.append(3, 0);
    }
}
