use std::time::Instant;

use anyhow::anyhow;
use log::{debug, error, info, trace};

use super::{
    statistics::NodeSet, Addressing, FileGraph, LocalCsr, MessageManager, Payload, RecvBuffer,
    SendBuffer, Transport,
};

/// Edges of one source node headed for one column
struct Batch<E> {
    destinations: Vec<u64>,
    payloads: Vec<E>,
}

impl<E: Payload> Batch<E> {
    fn new() -> Self {
        Self {
            destinations: Vec::new(),
            payloads: Vec::new(),
        }
    }

    fn push(&mut self, dst: u64, payload: E) {
        self.destinations.push(dst);
        if E::SIZE > 0 {
            self.payloads.push(payload);
        }
    }

    /// message `(src, destinations[, payloads])`, leaving the batch empty
    fn take_message(&mut self, src: u64) -> SendBuffer {
        let mut buf = SendBuffer::with_capacity(16 + self.destinations.len() * (8 + E::SIZE));
        buf.push(&src);
        buf.push(&self.destinations);
        if E::SIZE > 0 {
            buf.push(&self.payloads);
        }
        self.destinations.clear();
        self.payloads.clear();
        buf
    }
}

fn local_id(nodes: &NodeSet, gid: u64) -> Option<u32> {
    nodes.local_ids.get_index_of(&gid).map(|lid| lid as u32)
}

/// Tracks which mirror nodes have received their edges
struct EdgeReceiver {
    filled: Vec<bool>,
    received: usize,
}

impl EdgeReceiver {
    fn new(num_nodes: usize) -> Self {
        Self {
            filled: vec![false; num_nodes],
            received: 0,
        }
    }

    /// write the edges of one incoming message into the slot of its source
    fn fill<E: Payload>(
        &mut self,
        nodes: &NodeSet,
        csr: &mut LocalCsr<E>,
        sender: usize,
        mut buf: RecvBuffer,
    ) -> anyhow::Result<()> {
        let src: u64 = buf.pop()?;
        let destinations: Vec<u64> = buf.pop()?;
        let payloads: Vec<E> = if E::SIZE > 0 { buf.pop()? } else { Vec::new() };
        if E::SIZE > 0 && payloads.len() != destinations.len() {
            let err = anyhow!(
                "Host {} sent {} payloads for {} edges of node {}",
                sender,
                payloads.len(),
                destinations.len(),
                src
            );
            error!("{}", err);
            return Err(err);
        }

        let lid = local_id(nodes, src).unwrap_or_else(|| {
            panic!("host {} sent edges of node {} which is not local", sender, src)
        });
        assert!(
            lid as usize >= nodes.num_owned,
            "host {} sent edges of node {} which is owned here",
            sender,
            src
        );
        assert!(
            !self.filled[lid as usize],
            "edges of node {} were received twice",
            src
        );

        let slot = csr.edge_range(lid);
        assert_eq!(
            destinations.len(),
            slot.len(),
            "host {} sent {} edges of node {}, expected {}",
            sender,
            destinations.len(),
            src,
            slot.len()
        );

        for (k, (edge, &dst)) in slot.zip(destinations.iter()).enumerate() {
            let dst_lid = local_id(nodes, dst).unwrap_or_else(|| {
                panic!("destination {} of an edge from node {} is not local", dst, src)
            });
            csr.set_edge(edge, dst_lid, payloads.get(k).copied().unwrap_or_default());
        }

        trace!("Filled {} edges of node {} from host {}", destinations.len(), src, sender);
        self.filled[lid as usize] = true;
        self.received += 1;
        Ok(())
    }
}

/// Second pass over the graph: keep the edges this host stores and send every
/// other edge to the host of its destination's column in this grid row.
///
/// Incoming batches are drained after every source node so no host waits on
/// its peers before its own sends are out.
pub(crate) fn exchange_edges<G: FileGraph, T: Transport>(
    graph: &G,
    addr: &Addressing,
    nodes: &NodeSet,
    csr: &mut LocalCsr<G::Payload>,
    manager: &mut MessageManager<T>,
) -> anyhow::Result<()> {
    let columns = addr.grid().num_column_hosts();
    let my_column = addr.my_column();
    let expected = nodes.num_nodes_with_edges - nodes.num_owned - nodes.dummy_outgoing_nodes;

    let mut batches: Vec<Batch<G::Payload>> = (0..columns).map(|_| Batch::new()).collect();
    let mut receiver = EdgeReceiver::new(nodes.len());

    graph.reset_byte_counters();
    let timer = Instant::now();

    for range in addr.owned_ranges() {
        for src in range {
            let lid = local_id(nodes, src)
                .unwrap_or_else(|| panic!("owned node {} has no local id", src));
            let mut cursor = csr.edge_begin(lid);

            for (dst, payload) in graph.out_edges(src) {
                let column = addr.column_host(dst);
                if column == my_column {
                    let dst_lid = local_id(nodes, dst).unwrap_or_else(|| {
                        panic!("destination {} of an edge from node {} is not local", dst, src)
                    });
                    csr.set_edge(cursor, dst_lid, payload);
                    cursor += 1;
                } else {
                    batches[column].push(dst, payload);
                }
            }
            assert_eq!(
                cursor,
                csr.edge_end(lid),
                "node {} has a different number of local edges than counted",
                src
            );

            for (column, batch) in batches.iter_mut().enumerate() {
                if !batch.destinations.is_empty() {
                    let buf = batch.take_message(src);
                    manager.send(addr.edge_target(column), buf);
                }
            }

            while let Some((sender, buf)) = manager.try_receive() {
                receiver.fill(nodes, csr, sender, buf)?;
            }
        }
        manager.flush();
    }

    debug!(
        "Sent all edges, {} of {} mirror nodes filled so far",
        receiver.received, expected
    );
    manager.receive_until(
        &mut receiver,
        |receiver| receiver.received >= expected,
        |receiver, sender, buf| receiver.fill(nodes, csr, sender, buf),
    )?;
    manager.finish_round();
    debug_assert!(csr.is_complete());

    info!(
        "Edge loading time: {:.3?}, {} bytes read",
        timer.elapsed(),
        graph.bytes_read()
    );
    Ok(())
}
