use std::ops::Range;

use anyhow::anyhow;
use log::{debug, error};

use super::FileGraph;

/// Contiguous global id range `[start, end)` of every virtual host.
///
/// The ranges cover `[0, global_vcount)` exactly once, in increasing order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeTable {
    /// idx = virtual host, element = (start, end) exclusive end
    ranges: Vec<(u64, u64)>,
    global_vcount: u64,
}

impl RangeTable {
    /// Given the number of blocks and the global number of vertices, split the
    /// vertices evenly; the first `global_vcount % blocks` blocks take one extra
    pub fn uniform(blocks: usize, global_vcount: u64) -> Self {
        let mut ranges = vec![(0, 0); blocks];
        if blocks == 0 {
            return Self { ranges, global_vcount };
        }

        let per_block = global_vcount / blocks as u64;
        let leftover = global_vcount % blocks as u64;

        for (block, rows) in ranges.iter_mut().enumerate() {
            let block = block as u64;
            let extra = if block < leftover { 1 } else { 0 };
            rows.0 = block * per_block + std::cmp::min(block, leftover);
            rows.1 = rows.0 + per_block + extra;
        }

        Self { ranges, global_vcount }
    }

    /// Split so that every block gets a share of `nodes + edges` proportional
    /// to the scale factor of the real host owning it.
    ///
    /// `scale_factors` has one entry per real host; block `b` belongs to real
    /// host `b % scale_factors.len()`.
    pub fn balanced<G: FileGraph>(
        graph: &G,
        blocks: usize,
        scale_factors: &[u32],
    ) -> anyhow::Result<Self> {
        if scale_factors.is_empty() || blocks % scale_factors.len() != 0 {
            let err = anyhow!(
                "{} scale factors cannot describe {} blocks",
                scale_factors.len(),
                blocks
            );
            error!("{}", err);
            return Err(err);
        }
        if scale_factors.iter().all(|&s| s == 0) {
            let err = anyhow!("At least one scale factor must be non-zero");
            error!("{}", err);
            return Err(err);
        }

        let nodes = graph.node_count();
        // weight_before[n] = n + (edges of nodes before n), monotone in n
        let mut weight_before = Vec::with_capacity(nodes as usize + 1);
        let mut edges_so_far = 0u64;
        for node in 0..nodes {
            weight_before.push(node + edges_so_far);
            edges_so_far += graph.out_degree(node);
        }
        weight_before.push(nodes + edges_so_far);
        let total_weight = nodes + edges_so_far;

        let scale_of = |b: usize| scale_factors[b % scale_factors.len()] as u128;
        let total_scale: u128 = (0..blocks).map(scale_of).sum();

        let mut ranges = Vec::with_capacity(blocks);
        let mut start = 0u64;
        let mut scale_so_far = 0u128;
        for block in 0..blocks {
            scale_so_far += scale_of(block);
            let end = if block + 1 == blocks {
                nodes
            } else {
                let target = (total_weight as u128 * scale_so_far / total_scale) as u64;
                // first boundary whose preceding weight reaches the target
                let boundary = weight_before.partition_point(|&w| w < target) as u64;
                boundary.clamp(start, nodes)
            };
            ranges.push((start, end));
            start = end;
        }

        debug!("Balanced ranges over {} blocks: {:?}", blocks, ranges);
        Ok(Self {
            ranges,
            global_vcount: nodes,
        })
    }

    /// Wrap externally computed ranges after checking that they partition
    /// `[0, global_vcount)`
    pub fn from_ranges(ranges: Vec<(u64, u64)>, global_vcount: u64) -> anyhow::Result<Self> {
        let mut expected_start = 0;
        for (block, &(start, end)) in ranges.iter().enumerate() {
            if start != expected_start || end < start {
                let err = anyhow!(
                    "Range {:?} of block {} does not continue at {}",
                    (start, end),
                    block,
                    expected_start
                );
                error!("{}", err);
                return Err(err);
            }
            expected_start = end;
        }
        if expected_start != global_vcount {
            let err = anyhow!(
                "Ranges cover [0, {}) but the graph has {} vertices",
                expected_start,
                global_vcount
            );
            error!("{}", err);
            return Err(err);
        }
        Ok(Self {
            ranges,
            global_vcount,
        })
    }

    pub fn global_vcount(&self) -> u64 {
        self.global_vcount
    }

    pub fn num_blocks(&self) -> usize {
        self.ranges.len()
    }

    pub fn range(&self, block: usize) -> Range<u64> {
        let (start, end) = self.ranges[block];
        start..end
    }

    pub fn start(&self, block: usize) -> u64 {
        self.ranges[block].0
    }

    pub fn block_len(&self, block: usize) -> u64 {
        let (start, end) = self.ranges[block];
        end - start
    }

    pub fn iter(&self) -> impl Iterator<Item = Range<u64>> + '_ {
        self.ranges.iter().map(|&(start, end)| start..end)
    }

    /// ranges of the virtual hosts `host`, `host + num_hosts`, ... i.e. every
    /// range real host `host` owns
    pub fn host_ranges(&self, host: usize, num_hosts: usize) -> impl Iterator<Item = Range<u64>> + '_ {
        (host..self.ranges.len())
            .step_by(num_hosts.max(1))
            .map(|block| self.range(block))
    }

    /// Block whose range contains `vtx`. Every id of the graph is covered, so
    /// failing to find one means the caller passed an id outside the graph.
    pub fn block_of(&self, vtx: u64) -> usize {
        assert!(
            vtx < self.global_vcount,
            "vertex {} is not covered by the range table ({} vertices)",
            vtx,
            self.global_vcount
        );
        // first block ending after vtx; blocks are contiguous so it starts at or before vtx
        self.ranges.partition_point(|&(_, end)| end <= vtx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use petgraph::csr::Csr;
    use proptest::prelude::*;

    #[test]
    fn test_even_distribution() {
        let table = RangeTable::uniform(4, 100);
        assert_eq!(table.iter().collect::<Vec<_>>(), vec![0..25, 25..50, 50..75, 75..100]);
    }

    #[test]
    fn test_uneven_distribution() {
        let table = RangeTable::uniform(3, 10);
        assert_eq!(table.iter().collect::<Vec<_>>(), vec![0..4, 4..7, 7..10]);
    }

    #[test]
    fn test_zero_vertices() {
        let table = RangeTable::uniform(5, 0);
        assert!(table.iter().all(|r| r.is_empty()));
    }

    #[test]
    fn test_zero_blocks() {
        assert_eq!(RangeTable::uniform(0, 10).num_blocks(), 0);
    }

    #[test]
    fn test_block_ownership() {
        // (0, 3), (3, 6), (6, 8), (8, 10)
        let table = RangeTable::uniform(4, 10);
        let owners: Vec<usize> = (0..10).map(|v| table.block_of(v)).collect();
        assert_eq!(owners, vec![0, 0, 0, 1, 1, 1, 2, 2, 3, 3]);
    }

    #[test]
    fn test_block_ownership_skips_empty_blocks() {
        let table = RangeTable::from_ranges(vec![(0, 2), (2, 2), (2, 2), (2, 5)], 5).unwrap();
        assert_eq!(table.block_of(1), 0);
        assert_eq!(table.block_of(2), 3);
        assert_eq!(table.block_of(4), 3);
    }

    #[test]
    #[should_panic(expected = "not covered")]
    fn test_uncovered_vertex_panics() {
        RangeTable::uniform(2, 4).block_of(4);
    }

    #[test]
    fn test_host_ranges_with_decomposition() {
        // 2 hosts x 2 slices
        let table = RangeTable::uniform(4, 10);
        assert_eq!(table.host_ranges(0, 2).collect::<Vec<_>>(), vec![0..3, 6..8]);
        assert_eq!(table.host_ranges(1, 2).collect::<Vec<_>>(), vec![3..6, 8..10]);
    }

    #[test]
    fn test_from_ranges_rejects_gaps() {
        assert!(RangeTable::from_ranges(vec![(0, 2), (3, 5)], 5).is_err());
        assert!(RangeTable::from_ranges(vec![(0, 2), (2, 4)], 5).is_err());
    }

    #[test]
    fn test_balanced_follows_edges() {
        // node 0 has all the edges
        let mut csr = Csr::<(), (), petgraph::Directed, u32>::with_nodes(8);
        for dst in 1..8 {
            csr.add_edge(0, dst, ());
        }
        let table = RangeTable::balanced(&csr, 2, &[1, 1]).unwrap();
        // total weight 15, node 0 alone weighs 8
        assert_eq!(table.iter().collect::<Vec<_>>(), vec![0..1, 1..8]);
    }

    #[test]
    fn test_balanced_scale_factors() {
        let csr = Csr::<(), (), petgraph::Directed, u32>::with_nodes(12);
        let table = RangeTable::balanced(&csr, 2, &[1, 2]).unwrap();
        assert_eq!(table.iter().collect::<Vec<_>>(), vec![0..4, 4..12]);
        assert!(RangeTable::balanced(&csr, 3, &[1, 2]).is_err());
        assert!(RangeTable::balanced(&csr, 2, &[0, 0]).is_err());
    }

    proptest! {
        #[test]
        fn uniform_ranges_partition_the_vertices(blocks in 1usize..40, vcount in 0u64..5000) {
            let table = RangeTable::uniform(blocks, vcount);
            let mut next = 0;
            for range in table.iter() {
                prop_assert_eq!(range.start, next);
                next = range.end;
            }
            prop_assert_eq!(next, vcount);
            for v in (0..vcount).step_by(7) {
                prop_assert!(table.range(table.block_of(v)).contains(&v));
            }
        }

        #[test]
        fn balanced_ranges_partition_the_vertices(
            degrees in proptest::collection::vec(0u32..6, 1..80),
            hosts in 1usize..5,
            factor in 1usize..3,
        ) {
            let n = degrees.len() as u32;
            let mut csr = Csr::<(), (), petgraph::Directed, u32>::with_nodes(n as usize);
            for (src, &deg) in degrees.iter().enumerate() {
                for k in 0..deg {
                    csr.add_edge(src as u32, (src as u32 + k + 1) % n, ());
                }
            }
            let table = RangeTable::balanced(&csr, hosts * factor, &vec![1; hosts]).unwrap();
            prop_assert_eq!(table.num_blocks(), hosts * factor);
            let mut next = 0;
            for range in table.iter() {
                prop_assert_eq!(range.start, next);
                next = range.end;
            }
            prop_assert_eq!(next, n as u64);
        }
    }
}
