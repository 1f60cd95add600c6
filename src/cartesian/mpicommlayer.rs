use bytes::Bytes;
use log::{debug, trace};
use mpi::{
    request::{Request, StaticScope},
    topology::SimpleCommunicator,
    traits::{Communicator, Destination, Source},
    Rank, Tag,
};

use super::{Phase, RecvBuffer, SendBuffer, Transport};

/// A send MPI has not finished with yet. The buffer is leaked to get a
/// `'static` borrow for the request and freed once the request completes.
struct InFlight {
    request: Request<'static, [u8], StaticScope>,
    buffer: *mut [u8],
}

/// # Safety
/// `buffer` must come from `Box::into_raw` and no request may still use it
unsafe fn free_buffer(buffer: *mut [u8]) {
    drop(Box::from_raw(buffer));
}

/// Transport over MPI point-to-point messages, tagged with the phase.
pub struct MpiTransport {
    world: SimpleCommunicator,
    outbox: Vec<(usize, Phase, Bytes)>,
    in_flight: Vec<InFlight>,
}

impl MpiTransport {
    pub fn new(world: SimpleCommunicator) -> Self {
        Self {
            world,
            outbox: Vec::new(),
            in_flight: Vec::new(),
        }
    }

    pub fn world(&self) -> &SimpleCommunicator {
        &self.world
    }

    fn tag(phase: Phase) -> Tag {
        // MPI guarantees at least 32767 usable tags
        assert!(phase.0 <= 32767, "phase {:?} exceeds the MPI tag range", phase);
        phase.0 as Tag
    }

    fn complete_sends(&mut self) {
        let mut running = Vec::with_capacity(self.in_flight.len());
        for InFlight { request, buffer } in self.in_flight.drain(..) {
            match request.test() {
                // SAFETY: the send that borrowed the buffer has completed
                Ok(_) => unsafe { free_buffer(buffer) },
                Err(request) => running.push(InFlight { request, buffer }),
            }
        }
        self.in_flight = running;
    }
}

impl Transport for MpiTransport {
    fn host_id(&self) -> usize {
        self.world.rank() as usize
    }

    fn num_hosts(&self) -> usize {
        self.world.size() as usize
    }

    fn send_tagged(&mut self, host: usize, phase: Phase, buf: SendBuffer) {
        self.outbox.push((host, phase, buf.freeze()));
    }

    fn flush(&mut self) {
        debug!("Posting {} sends", self.outbox.len());
        for (host, phase, bytes) in std::mem::take(&mut self.outbox) {
            let buffer = Box::into_raw(bytes.to_vec().into_boxed_slice());
            // SAFETY: the allocation stays alive until the request completes
            let data: &'static [u8] = unsafe { &*buffer };
            let request = self
                .world
                .process_at_rank(host as Rank)
                .immediate_send_with_tag(StaticScope, data, Self::tag(phase));
            self.in_flight.push(InFlight { request, buffer });
        }
    }

    fn handle_receives(&mut self) {
        self.complete_sends();
    }

    fn receive_tagged(&mut self, phase: Phase) -> Option<(usize, RecvBuffer)> {
        let (message, status) = self
            .world
            .any_process()
            .immediate_matched_probe_with_tag(Self::tag(phase))?;
        let (data, _) = message.matched_receive_vec::<u8>();
        trace!(
            "Received {} bytes from rank {} in phase {:?}",
            data.len(),
            status.source_rank(),
            phase
        );
        Some((status.source_rank() as usize, RecvBuffer::from(data)))
    }
}

impl Drop for MpiTransport {
    fn drop(&mut self) {
        for InFlight { request, buffer } in self.in_flight.drain(..) {
            request.wait();
            // SAFETY: wait returned, the send no longer reads the buffer
            unsafe { free_buffer(buffer) };
        }
    }
}
