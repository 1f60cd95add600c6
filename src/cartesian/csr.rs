use std::ops::Range;

use super::Payload;

/// Local id marking a destination slot that has not been written yet
const UNFILLED: u32 = u32::MAX;

/// Compressed sparse rows of one host. Sized once from the edge-end offsets
/// of the statistics pass and filled in place afterwards.
#[derive(Debug, Clone)]
pub struct LocalCsr<E> {
    /// idx = local node, element = exclusive end of its edges
    edge_end: Vec<u64>,
    /// local ids of destinations
    destinations: Vec<u32>,
    /// empty storage when `E` is `()`
    payloads: Vec<E>,
}

impl<E: Payload> LocalCsr<E> {
    /// Allocate storage for the edges described by `edge_end`, which must be
    /// non-decreasing
    pub fn allocate(edge_end: Vec<u64>) -> Self {
        assert!(
            edge_end.windows(2).all(|w| w[0] <= w[1]),
            "edge end offsets must be non-decreasing"
        );
        let num_edges = edge_end.last().copied().unwrap_or(0) as usize;
        Self {
            edge_end,
            destinations: vec![UNFILLED; num_edges],
            payloads: vec![E::default(); num_edges],
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.edge_end.len()
    }

    pub fn num_edges(&self) -> usize {
        self.destinations.len()
    }

    pub fn edge_begin(&self, node: u32) -> usize {
        match node {
            0 => 0,
            n => self.edge_end[n as usize - 1] as usize,
        }
    }

    pub fn edge_end(&self, node: u32) -> usize {
        self.edge_end[node as usize] as usize
    }

    pub fn edge_range(&self, node: u32) -> Range<usize> {
        self.edge_begin(node)..self.edge_end(node)
    }

    pub fn degree(&self, node: u32) -> usize {
        self.edge_range(node).len()
    }

    pub fn edge_destination(&self, edge: usize) -> u32 {
        self.destinations[edge]
    }

    pub fn edge_payload(&self, edge: usize) -> E {
        self.payloads[edge]
    }

    /// (destination, payload) of every edge of `node`
    pub fn edges(&self, node: u32) -> impl Iterator<Item = (u32, E)> + '_ {
        self.edge_range(node)
            .map(|edge| (self.destinations[edge], self.edge_payload(edge)))
    }

    pub(crate) fn set_edge(&mut self, edge: usize, destination: u32, payload: E) {
        debug_assert_ne!(destination, UNFILLED);
        self.destinations[edge] = destination;
        if E::SIZE > 0 {
            self.payloads[edge] = payload;
        }
    }

    /// every destination slot has been written
    pub fn is_complete(&self) -> bool {
        !self.destinations.contains(&UNFILLED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ranges_from_offsets() {
        let csr = LocalCsr::<()>::allocate(vec![2, 2, 5]);
        assert_eq!(csr.num_nodes(), 3);
        assert_eq!(csr.num_edges(), 5);
        assert_eq!(csr.edge_range(0), 0..2);
        assert_eq!(csr.edge_range(1), 2..2);
        assert_eq!(csr.edge_range(2), 2..5);
        assert_eq!(csr.degree(2), 3);
    }

    #[test]
    fn test_fill_with_payloads() {
        let mut csr = LocalCsr::<f32>::allocate(vec![1, 3]);
        assert!(!csr.is_complete());
        csr.set_edge(0, 1, 0.5);
        csr.set_edge(1, 0, 1.5);
        csr.set_edge(2, 1, 2.5);
        assert!(csr.is_complete());
        assert_eq!(csr.edges(1).collect::<Vec<_>>(), vec![(0, 1.5), (1, 2.5)]);
        assert_eq!(csr.edge_payload(0), 0.5);
    }

    #[test]
    fn test_void_payload_has_no_storage() {
        let csr = LocalCsr::<()>::allocate(vec![4]);
        assert_eq!(std::mem::size_of_val(csr.payloads.as_slice()), 0);
    }

    #[test]
    fn test_empty_graph() {
        let csr = LocalCsr::<u32>::allocate(vec![]);
        assert_eq!(csr.num_edges(), 0);
        assert!(csr.is_complete());
    }

    #[test]
    #[should_panic(expected = "non-decreasing")]
    fn test_decreasing_offsets_panic() {
        LocalCsr::<()>::allocate(vec![3, 2]);
    }
}
