use std::fs::File;
use std::io::{BufWriter, Write};
use std::ops::Range;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{anyhow, bail, Context};
use bytes::{Buf, Bytes, BytesMut};
use log::{debug, error, info};
use memmap2::Mmap;

use super::{FileGraph, Payload, Wire};

const VERSION: u64 = 1;
const HEADER_BYTES: u64 = 4 * 8;

/// Rows made available for one contiguous node range
#[derive(Debug)]
struct Segment<E> {
    nodes: Range<u64>,
    /// global index of the first edge of `nodes.start`
    first_edge: u64,
    /// little endian u32 destinations, a view into the mapped file
    destinations: Bytes,
    payloads: Vec<E>,
}

/// Graph in the binary `.gr` format (version 1, little endian):
///
/// ```text
/// u64 version, u64 payload size, u64 nodes, u64 edges
/// u64 edge end offsets [nodes]
/// u32 destinations [edges], 4 bytes of padding if edges is odd
/// payloads [edges]
/// ```
///
/// The file is memory mapped. Opening decodes the header and the offsets;
/// edge rows must be loaded with [`GrGraph::load_ranges`] before they are
/// visited.
#[derive(Debug)]
pub struct GrGraph<E> {
    data: Bytes,
    num_edges: u64,
    edge_end: Vec<u64>,
    destinations_at: usize,
    payloads_at: usize,
    segments: Vec<Segment<E>>,
    bytes_read: AtomicU64,
}

/// end of `count` items of `width` bytes placed at `start`, None on overflow
fn region_end(start: u64, count: u64, width: u64) -> Option<u64> {
    count.checked_mul(width)?.checked_add(start)
}

impl<E: Payload> GrGraph<E> {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        // SAFETY: the mapping is only read, and graph files are not modified
        // while a partition is being built
        let mmap =
            unsafe { Mmap::map(&file) }.with_context(|| format!("mapping {}", path.display()))?;
        let data = Bytes::from_owner(mmap);
        let file_len = data.len() as u64;

        if file_len < HEADER_BYTES {
            bail!("{} is too short for a .gr header", path.display());
        }
        let mut header = data.slice(..HEADER_BYTES as usize);
        let version = header.get_u64_le();
        let file_payload_size = header.get_u64_le();
        let num_nodes = header.get_u64_le();
        let num_edges = header.get_u64_le();

        if version != VERSION {
            let err = anyhow!("Unsupported .gr version {} in {}", version, path.display());
            error!("{}", err);
            return Err(err);
        }
        // void readers may ignore whatever payload the file carries
        if E::SIZE != 0 && file_payload_size != E::SIZE as u64 {
            let err = anyhow!(
                "{} stores {} byte payloads, reader expects {}",
                path.display(),
                file_payload_size,
                E::SIZE
            );
            error!("{}", err);
            return Err(err);
        }

        // header, offsets, destinations and payloads must all lie in the file
        let destinations_at = region_end(HEADER_BYTES, num_nodes, 8);
        let payloads_at = destinations_at
            .and_then(|start| region_end(start, num_edges, 4))
            .and_then(|end| end.checked_add(num_edges % 2 * 4));
        let required = match E::SIZE {
            0 => payloads_at,
            _ => payloads_at.and_then(|start| region_end(start, num_edges, file_payload_size)),
        };
        let (destinations_at, payloads_at) = match (destinations_at, payloads_at, required) {
            (Some(dst), Some(payloads), Some(required)) if required <= file_len => {
                (dst as usize, payloads as usize)
            }
            _ => {
                let err = anyhow!(
                    "{} declares {} nodes and {} edges but holds only {} bytes",
                    path.display(),
                    num_nodes,
                    num_edges,
                    file_len
                );
                error!("{}", err);
                return Err(err);
            }
        };

        let mut raw = data.slice(HEADER_BYTES as usize..destinations_at);
        let edge_end = (0..num_nodes)
            .map(|_| u64::decode(&mut raw))
            .collect::<anyhow::Result<Vec<u64>>>()
            .context("reading .gr offsets")?;
        if let Some(node) = edge_end.windows(2).position(|w| w[0] > w[1]) {
            let err = anyhow!(
                "{}: edge offsets decrease after node {}",
                path.display(),
                node
            );
            error!("{}", err);
            return Err(err);
        }
        if edge_end.last().copied().unwrap_or(0) != num_edges {
            bail!(
                "{} declares {} edges but its offsets end at {}",
                path.display(),
                num_edges,
                edge_end.last().copied().unwrap_or(0)
            );
        }

        info!(
            "Opened {}: {} nodes, {} edges, {} byte payloads",
            path.display(),
            num_nodes,
            num_edges,
            file_payload_size
        );

        Ok(Self {
            data,
            num_edges,
            edge_end,
            destinations_at,
            payloads_at,
            segments: Vec::new(),
            bytes_read: AtomicU64::new(0),
        })
    }

    fn edge_begin(&self, node: u64) -> u64 {
        match node {
            0 => 0,
            n => self.edge_end[n as usize - 1],
        }
    }

    /// Make the edge rows of every node in `ranges` available. Destinations
    /// stay in the mapping, payloads are decoded. Ranges must not overlap each
    /// other or rows loaded before.
    pub fn load_ranges(
        &mut self,
        ranges: impl IntoIterator<Item = Range<u64>>,
    ) -> anyhow::Result<()> {
        for nodes in ranges {
            if nodes.is_empty() {
                continue;
            }
            if nodes.end > self.edge_end.len() as u64 {
                bail!(
                    "Cannot load nodes {:?} of a graph with {} nodes",
                    nodes,
                    self.edge_end.len()
                );
            }
            if self
                .segments
                .iter()
                .any(|s| s.nodes.start < nodes.end && nodes.start < s.nodes.end)
            {
                bail!("Nodes {:?} overlap rows that are already loaded", nodes);
            }

            // offsets are non-decreasing and end at num_edges, checked on open
            let first_edge = self.edge_begin(nodes.start) as usize;
            let last_edge = self.edge_end[nodes.end as usize - 1] as usize;
            let count = last_edge - first_edge;

            let destinations = self.data.slice(
                self.destinations_at + 4 * first_edge..self.destinations_at + 4 * last_edge,
            );

            let payloads = if E::SIZE > 0 {
                let mut raw = self.data.slice(
                    self.payloads_at + E::SIZE * first_edge..self.payloads_at + E::SIZE * last_edge,
                );
                (0..count)
                    .map(|_| E::decode(&mut raw))
                    .collect::<anyhow::Result<Vec<E>>>()
                    .with_context(|| format!("reading payloads of nodes {:?}", nodes))?
            } else {
                Vec::new()
            };

            debug!("Loaded {} edges of nodes {:?}", count, nodes);
            self.segments.push(Segment {
                nodes,
                first_edge: first_edge as u64,
                destinations,
                payloads,
            });
        }
        self.segments.sort_by_key(|s| s.nodes.start);
        Ok(())
    }

    fn segment_of(&self, node: u64) -> &Segment<E> {
        let idx = self.segments.partition_point(|s| s.nodes.end <= node);
        match self.segments.get(idx) {
            Some(segment) if segment.nodes.contains(&node) => segment,
            _ => panic!("edges of node {} were not loaded", node),
        }
    }
}

impl<E: Payload> FileGraph for GrGraph<E> {
    type Payload = E;

    fn node_count(&self) -> u64 {
        self.edge_end.len() as u64
    }

    fn edge_count(&self) -> u64 {
        self.num_edges
    }

    fn out_degree(&self, node: u64) -> u64 {
        self.edge_end[node as usize] - self.edge_begin(node)
    }

    fn out_edges(&self, node: u64) -> impl Iterator<Item = (u64, E)> + '_ {
        let segment = self.segment_of(node);
        let start = (self.edge_begin(node) - segment.first_edge) as usize;
        let end = (self.edge_end[node as usize] - segment.first_edge) as usize;
        self.bytes_read
            .fetch_add(((end - start) * (4 + E::SIZE)) as u64, Ordering::Relaxed);

        let mut destinations = segment.destinations.slice(4 * start..4 * end);
        (start..end).map(move |edge| {
            let payload = segment.payloads.get(edge).copied().unwrap_or_default();
            (destinations.get_u32_le() as u64, payload)
        })
    }

    fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    fn reset_byte_counters(&self) {
        self.bytes_read.store(0, Ordering::Relaxed);
    }
}

/// Write every node and edge of `graph` as a version 1 `.gr` file
pub fn write_gr<G: FileGraph>(path: impl AsRef<Path>, graph: &G) -> anyhow::Result<()> {
    let path = path.as_ref();
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut out = BufWriter::new(file);
    let payload_size = <G::Payload as Payload>::SIZE;

    let num_nodes = graph.node_count();
    let num_edges = graph.edge_count();

    let mut index = BytesMut::with_capacity(8 * (4 + num_nodes as usize));
    for value in [VERSION, payload_size as u64, num_nodes, num_edges] {
        value.encode(&mut index);
    }
    let mut end = 0u64;
    for node in 0..num_nodes {
        end += graph.out_degree(node);
        end.encode(&mut index);
    }
    out.write_all(&index)?;

    let mut destinations = BytesMut::with_capacity(4 * num_edges as usize + 4);
    let mut payloads = BytesMut::with_capacity(payload_size * num_edges as usize);
    for node in 0..num_nodes {
        for (dst, payload) in graph.out_edges(node) {
            let dst = u32::try_from(dst).context("destination does not fit the .gr format")?;
            dst.encode(&mut destinations);
            payload.encode(&mut payloads);
        }
    }
    if num_edges % 2 == 1 {
        0u32.encode(&mut destinations);
    }
    out.write_all(&destinations)?;
    out.write_all(&payloads)?;
    out.flush()?;

    debug!("Wrote {} nodes and {} edges to {}", num_nodes, num_edges, path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use petgraph::{csr::Csr, Directed};
    use std::path::PathBuf;

    fn scratch_file(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("{}-{}.gr", name, std::process::id()))
    }

    fn weighted() -> Csr<(), u32, Directed, u32> {
        let mut csr = Csr::with_nodes(5);
        csr.add_edge(0, 1, 10);
        csr.add_edge(0, 4, 40);
        csr.add_edge(2, 3, 23);
        csr.add_edge(3, 0, 30);
        csr.add_edge(4, 2, 42);
        csr
    }

    fn write_words(path: &Path, words: &[u64]) {
        let mut raw = BytesMut::new();
        for word in words {
            word.encode(&mut raw);
        }
        std::fs::write(path, &raw).unwrap();
    }

    #[test]
    fn test_partial_load_with_payloads() {
        let path = scratch_file("partial-load");
        write_gr(&path, &weighted()).unwrap();

        let mut graph = GrGraph::<u32>::open(&path).unwrap();
        assert_eq!(graph.node_count(), 5);
        assert_eq!(graph.edge_count(), 5);
        assert_eq!(graph.out_degree(0), 2);

        graph.load_ranges([3..5, 0..1]).unwrap();
        assert_eq!(graph.out_edges(0).collect::<Vec<_>>(), vec![(1, 10), (4, 40)]);
        assert_eq!(graph.out_edges(4).collect::<Vec<_>>(), vec![(2, 42)]);
        assert_eq!(graph.bytes_read(), 24);
        graph.reset_byte_counters();
        assert_eq!(graph.bytes_read(), 0);

        std::fs::remove_file(path).unwrap();
    }

    #[test]
    #[should_panic(expected = "not loaded")]
    fn test_unloaded_rows_panic() {
        let path = scratch_file("unloaded-rows");
        write_gr(&path, &weighted()).unwrap();
        let mut graph = GrGraph::<()>::open(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        graph.load_ranges([0..2]).unwrap();
        graph.out_edges(2).count();
    }

    #[test]
    fn test_void_reader_ignores_payloads() {
        let path = scratch_file("void-reader");
        write_gr(&path, &weighted()).unwrap();
        let mut graph = GrGraph::<()>::open(&path).unwrap();
        graph.load_ranges([0..5]).unwrap();
        assert_eq!(graph.out_edges(3).collect::<Vec<_>>(), vec![(0, ())]);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_payload_size_mismatch_rejected() {
        let path = scratch_file("size-mismatch");
        write_gr(&path, &weighted()).unwrap();
        assert!(GrGraph::<u64>::open(&path).is_err());
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_overlapping_loads_rejected() {
        let path = scratch_file("overlap");
        write_gr(&path, &weighted()).unwrap();
        let mut graph = GrGraph::<u32>::open(&path).unwrap();
        graph.load_ranges([1..3]).unwrap();
        assert!(graph.load_ranges([2..4]).is_err());
        assert!(graph.load_ranges([4..6]).is_err());
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_node_count_beyond_file_rejected() {
        let path = scratch_file("huge-nodes");
        // 8 * nodes overflows u64
        write_words(&path, &[1, 0, u64::MAX / 4, 0]);
        assert!(GrGraph::<()>::open(&path).is_err());

        write_words(&path, &[1, 0, 1000, 0]);
        assert!(GrGraph::<()>::open(&path).is_err());

        write_words(&path, &[1, 4, 1, u64::MAX / 2, u64::MAX / 2]);
        assert!(GrGraph::<u32>::open(&path).is_err());
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_decreasing_offsets_rejected() {
        let path = scratch_file("decreasing-offsets");
        // 2 nodes, 1 edge, offsets [5, 1], one destination plus padding
        write_words(&path, &[1, 0, 2, 1, 5, 1, 0]);
        let err = GrGraph::<()>::open(&path).unwrap_err();
        assert!(err.to_string().contains("decrease"));
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_truncated_payloads() {
        let path = scratch_file("truncated-payloads");
        write_gr(&path, &weighted()).unwrap();
        let len = std::fs::metadata(&path).unwrap().len();
        std::fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_len(len - 4)
            .unwrap();

        assert!(GrGraph::<u32>::open(&path).is_err());
        // destinations are intact, so a void reader still works
        let mut graph = GrGraph::<()>::open(&path).unwrap();
        graph.load_ranges([0..5]).unwrap();
        assert_eq!(graph.out_edges(4).collect::<Vec<_>>(), vec![(2, ())]);
        std::fs::remove_file(path).unwrap();
    }
}
