use petgraph::{csr::Csr, Directed};

use super::{Payload, Phase, RecvBuffer, SendBuffer};

/// Read access to the graph file every host streams its rows from.
///
/// Only the rows of the caller's own ranges are ever requested, so a reader
/// may load just those.
pub trait FileGraph: Sync {
    type Payload: Payload;

    fn node_count(&self) -> u64;
    fn edge_count(&self) -> u64;
    fn out_degree(&self, node: u64) -> u64;

    /// (destination, payload) of every outgoing edge of `node`, in file order
    fn out_edges(&self, node: u64) -> impl Iterator<Item = (u64, Self::Payload)> + '_;

    /// bytes of edge data read since the last reset, for throughput logging
    fn bytes_read(&self) -> u64 {
        0
    }

    fn reset_byte_counters(&self) {}
}

/// Point-to-point message transport between the hosts of one job.
///
/// Sends only queue: nothing is delivered before `flush`. A receive never
/// blocks and returns at most one message of the requested phase; messages
/// may arrive in any order but are never split or merged.
pub trait Transport {
    fn host_id(&self) -> usize;
    fn num_hosts(&self) -> usize;

    fn send_tagged(&mut self, host: usize, phase: Phase, buf: SendBuffer);
    fn flush(&mut self);

    /// make progress on outstanding sends and receives without blocking
    fn handle_receives(&mut self);

    /// (sender, message) of one pending message tagged with `phase`
    fn receive_tagged(&mut self, phase: Phase) -> Option<(usize, RecvBuffer)>;
}

/// In-memory graphs stand in for graph files in tests and simulations
impl<N: Sync, E: Payload> FileGraph for Csr<N, E, Directed, u32> {
    type Payload = E;

    fn node_count(&self) -> u64 {
        Csr::node_count(self) as u64
    }

    fn edge_count(&self) -> u64 {
        Csr::edge_count(self) as u64
    }

    fn out_degree(&self, node: u64) -> u64 {
        self.neighbors_slice(node as u32).len() as u64
    }

    fn out_edges(&self, node: u64) -> impl Iterator<Item = (u64, E)> + '_ {
        self.neighbors_slice(node as u32)
            .iter()
            .zip(self.edges_slice(node as u32).iter())
            .map(|(&dst, &weight)| (dst as u64, weight))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csr_as_file_graph() {
        let mut csr = Csr::<(), u32, Directed, u32>::with_nodes(3);
        csr.add_edge(0, 2, 7);
        csr.add_edge(0, 1, 5);
        csr.add_edge(2, 0, 1);

        assert_eq!(FileGraph::node_count(&csr), 3);
        assert_eq!(FileGraph::edge_count(&csr), 3);
        assert_eq!(csr.out_degree(0), 2);
        assert_eq!(csr.out_degree(1), 0);
        // petgraph keeps each row sorted by destination
        assert_eq!(csr.out_edges(0).collect::<Vec<_>>(), vec![(1, 5), (2, 7)]);
        assert_eq!(csr.bytes_read(), 0);
    }
}
