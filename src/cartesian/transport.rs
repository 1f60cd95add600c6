use std::collections::VecDeque;
use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};

use bytes::Bytes;
use log::{trace, warn};

use super::{Phase, RecvBuffer, SendBuffer, Transport};

#[derive(Debug)]
struct Envelope {
    sender: usize,
    phase: Phase,
    payload: Bytes,
}

/// Transport between hosts simulated inside one process, one thread per
/// host. Every host has an unbounded inbox; sends are queued until `flush`.
pub struct LocalTransport {
    host: usize,
    peers: Vec<Sender<Envelope>>,
    inbox: Receiver<Envelope>,
    outbox: Vec<(usize, Envelope)>,
    /// arrived but not yet asked for, in arrival order
    pending: VecDeque<Envelope>,
}

impl LocalTransport {
    /// One connected transport per host; hand element `h` to host `h`
    pub fn network(num_hosts: usize) -> Vec<LocalTransport> {
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..num_hosts).map(|_| channel()).unzip();

        receivers
            .into_iter()
            .enumerate()
            .map(|(host, inbox)| LocalTransport {
                host,
                peers: senders.clone(),
                inbox,
                outbox: Vec::new(),
                pending: VecDeque::new(),
            })
            .collect()
    }

    /// messages received but not yet consumed, over all phases
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

impl Transport for LocalTransport {
    fn host_id(&self) -> usize {
        self.host
    }

    fn num_hosts(&self) -> usize {
        self.peers.len()
    }

    fn send_tagged(&mut self, host: usize, phase: Phase, buf: SendBuffer) {
        assert!(host < self.peers.len(), "no such host {}", host);
        self.outbox.push((
            host,
            Envelope {
                sender: self.host,
                phase,
                payload: buf.freeze(),
            },
        ));
    }

    fn flush(&mut self) {
        for (host, envelope) in self.outbox.drain(..) {
            trace!(
                "Delivering {} bytes to host {} in phase {:?}",
                envelope.payload.len(),
                host,
                envelope.phase
            );
            if self.peers[host].send(envelope).is_err() {
                warn!("Host {} is gone, dropping message", host);
            }
        }
    }

    fn handle_receives(&mut self) {
        loop {
            match self.inbox.try_recv() {
                Ok(envelope) => self.pending.push_back(envelope),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    fn receive_tagged(&mut self, phase: Phase) -> Option<(usize, RecvBuffer)> {
        let pos = self.pending.iter().position(|e| e.phase == phase)?;
        self.pending
            .remove(pos)
            .map(|e| (e.sender, RecvBuffer::new(e.payload)))
    }
}
