#![allow(dead_code)]

use petgraph::{csr::Csr, Directed};

/// 16 vertex graph, 28 edges
pub const SMALL_EDGE_LIST: [(u32, u32); 28] = [
    (1, 2),
    (1, 4),
    (1, 7),
    (2, 0),
    (2, 4),
    (2, 5),
    (2, 6),
    (3, 0),
    (3, 7),
    (4, 0),
    (4, 10),
    (5, 0),
    (5, 7),
    (5, 11),
    (6, 7),
    (6, 11),
    (8, 9),
    (8, 10),
    (8, 11),
    (8, 14),
    (8, 15),
    (9, 12),
    (9, 14),
    (10, 11),
    (10, 12),
    (10, 13),
    (10, 14),
    (11, 13),
];

/// weight of an edge names it: `src * 100 + dst`
pub fn edge_weight(src: u32, dst: u32) -> u32 {
    src * 100 + dst
}

pub fn weighted_csr(n: usize, edges: &[(u32, u32)]) -> Csr<(), u32, Directed, u32> {
    let mut csr = Csr::with_nodes(n);
    for &(src, dst) in edges {
        csr.add_edge(src, dst, edge_weight(src, dst));
    }
    csr
}

pub fn void_csr(n: usize, edges: &[(u32, u32)]) -> Csr<(), (), Directed, u32> {
    let mut csr = Csr::with_nodes(n);
    for &(src, dst) in edges {
        csr.add_edge(src, dst, ());
    }
    csr
}
