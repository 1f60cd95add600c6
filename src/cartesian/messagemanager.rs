use log::{debug, trace};

use super::{RecvBuffer, SendBuffer, Transport};

/// Sequence number of an exchange round. Every message carries the phase it
/// was sent in, so a receiver never mistakes a message of the next round for
/// one of the current round.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Phase(pub u32);

impl Phase {
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

/// Owns a transport and the current phase; every send and receive goes
/// through here so the phase is always passed explicitly.
pub struct MessageManager<T: Transport> {
    transport: T,
    phase: Phase,
}

impl<T: Transport> MessageManager<T> {
    pub fn new(transport: T) -> Self {
        debug!(
            "Initializing MessageManager for host {} of {}",
            transport.host_id(),
            transport.num_hosts()
        );
        Self {
            transport,
            phase: Phase::default(),
        }
    }

    pub fn host_id(&self) -> usize {
        self.transport.host_id()
    }

    pub fn num_hosts(&self) -> usize {
        self.transport.num_hosts()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    pub fn send(&mut self, host: usize, buf: SendBuffer) {
        trace!(
            "Queueing {} bytes for host {} in phase {:?}",
            buf.len(),
            host,
            self.phase
        );
        self.transport.send_tagged(host, self.phase, buf);
    }

    pub fn flush(&mut self) {
        self.transport.flush();
    }

    /// one message of the current phase if any has arrived
    pub fn try_receive(&mut self) -> Option<(usize, RecvBuffer)> {
        self.transport.handle_receives();
        self.transport.receive_tagged(self.phase)
    }

    /// Poll until `done(state)` holds, handing every message of the current
    /// phase to `on_message`. There is no timeout: a peer that never sends
    /// the expected messages stalls this host.
    pub fn receive_until<S>(
        &mut self,
        state: &mut S,
        done: impl Fn(&S) -> bool,
        mut on_message: impl FnMut(&mut S, usize, RecvBuffer) -> anyhow::Result<()>,
    ) -> anyhow::Result<()> {
        while !done(&*state) {
            match self.try_receive() {
                Some((sender, buf)) => {
                    trace!("Received {} bytes from host {}", buf.remaining(), sender);
                    on_message(&mut *state, sender, buf)?;
                }
                None => std::thread::yield_now(),
            }
        }
        Ok(())
    }

    /// receive exactly `expected` messages of the current phase
    pub fn receive_messages(
        &mut self,
        expected: usize,
        mut on_message: impl FnMut(usize, RecvBuffer) -> anyhow::Result<()>,
    ) -> anyhow::Result<()> {
        debug!(
            "Waiting for {} messages in phase {:?}",
            expected, self.phase
        );
        let mut received = 0usize;
        self.receive_until(
            &mut received,
            |received| *received >= expected,
            |received, sender, buf| {
                *received += 1;
                on_message(sender, buf)
            },
        )
    }

    /// close the current exchange round
    pub fn finish_round(&mut self) {
        debug!("Finished phase {:?}", self.phase);
        self.phase = self.phase.next();
    }
}
