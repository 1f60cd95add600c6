use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::bail;
use bytes::{Buf, Bytes, BytesMut};

use super::Wire;

const WORD_BITS: usize = u64::BITS as usize;

/// Fixed-size bitset that can be set from many threads at once.
///
/// Bits only ever go from 0 to 1 while it is shared, so concurrent `set`
/// calls on the same bit are harmless.
#[derive(Debug, Default)]
pub struct AtomicBitSet {
    words: Vec<AtomicU64>,
    len: usize,
}

impl AtomicBitSet {
    pub fn new(len: usize) -> Self {
        let words = (0..len.div_ceil(WORD_BITS))
            .map(|_| AtomicU64::new(0))
            .collect();
        Self { words, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn set(&self, idx: usize) {
        assert!(
            idx < self.len,
            "bit {} out of range for bitset of {}",
            idx,
            self.len
        );
        self.words[idx / WORD_BITS].fetch_or(1 << (idx % WORD_BITS), Ordering::Relaxed);
    }

    pub fn test(&self, idx: usize) -> bool {
        idx < self.len
            && self.words[idx / WORD_BITS].load(Ordering::Relaxed) & (1 << (idx % WORD_BITS)) != 0
    }

    /// bitwise OR `other` into `self`, both must have the same length
    pub fn union_with(&mut self, other: &AtomicBitSet) {
        assert_eq!(self.len, other.len, "bitset length mismatch in union");
        self.words
            .iter_mut()
            .zip(other.words.iter())
            .for_each(|(mine, theirs)| *mine.get_mut() |= theirs.load(Ordering::Relaxed));
    }

    pub fn count_ones(&self) -> usize {
        self.words
            .iter()
            .map(|w| w.load(Ordering::Relaxed).count_ones() as usize)
            .sum()
    }
}

impl Wire for AtomicBitSet {
    fn encode(&self, buf: &mut BytesMut) {
        self.len.encode(buf);
        self.words
            .iter()
            .for_each(|w| w.load(Ordering::Relaxed).encode(buf));
    }

    fn decode(buf: &mut Bytes) -> anyhow::Result<Self> {
        let len = usize::decode(buf)?;
        let nwords = len.div_ceil(WORD_BITS);
        if nwords > buf.remaining() / 8 {
            bail!(
                "bitset of {} bits needs {} words but only {} bytes remain",
                len,
                nwords,
                buf.remaining()
            );
        }
        let mut words = Vec::with_capacity(nwords);
        for _ in 0..nwords {
            words.push(AtomicU64::new(u64::decode(buf)?));
        }
        Ok(Self { words, len })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RecvBuffer, SendBuffer};
    use rayon::prelude::*;

    #[test]
    fn test_set_and_test() {
        let bits = AtomicBitSet::new(130);
        bits.set(0);
        bits.set(64);
        bits.set(129);
        assert!(bits.test(0));
        assert!(bits.test(64));
        assert!(bits.test(129));
        assert!(!bits.test(1));
        assert!(!bits.test(500));
        assert_eq!(bits.count_ones(), 3);
    }

    #[test]
    fn test_concurrent_sets_are_idempotent() {
        let bits = AtomicBitSet::new(1000);
        (0..10_000usize).into_par_iter().for_each(|i| bits.set(i % 500));
        assert_eq!(bits.count_ones(), 500);
        assert!(!bits.test(500));
    }

    #[test]
    fn test_union_and_wire() {
        let mut a = AtomicBitSet::new(70);
        let b = AtomicBitSet::new(70);
        a.set(3);
        b.set(69);
        a.union_with(&b);

        let mut send = SendBuffer::new();
        send.push(&a);
        let mut recv = RecvBuffer::from(send);
        let c: AtomicBitSet = recv.pop().unwrap();
        assert_eq!(c.len(), 70);
        assert!(c.test(3) && c.test(69));
        assert_eq!(c.count_ones(), 2);
    }

    #[test]
    fn test_oversized_length_rejected() {
        let mut send = SendBuffer::new();
        send.push(&(1usize << 40));
        send.push(&0u64);
        let mut recv = RecvBuffer::from(send);
        assert!(recv.pop::<AtomicBitSet>().is_err());
    }
}
