use anyhow::bail;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// A value that can be appended to a [`SendBuffer`] and read back from a
/// [`RecvBuffer`]. Sender and receiver must agree on the exact sequence of
/// types written; nothing about the layout is negotiated on the wire.
pub trait Wire: Sized {
    fn encode(&self, buf: &mut BytesMut);
    fn decode(buf: &mut Bytes) -> anyhow::Result<Self>;
}

/// Edge payload stored alongside each CSR destination.
///
/// `()` is the void payload: it occupies no storage and is never sent.
pub trait Payload: Wire + Copy + Default + Send + Sync + std::fmt::Debug + 'static {
    /// Size in bytes of one payload, on the wire and in graph files
    const SIZE: usize;
}

fn ensure_remaining(buf: &Bytes, needed: usize) -> anyhow::Result<()> {
    if buf.remaining() < needed {
        bail!(
            "message truncated: needed {} bytes but only {} remain",
            needed,
            buf.remaining()
        );
    }
    Ok(())
}

macro_rules! wire_primitive {
    ($($ty:ty => $put:ident, $get:ident);* $(;)?) => {
        $(
            impl Wire for $ty {
                fn encode(&self, buf: &mut BytesMut) {
                    buf.$put(*self)
                }

                fn decode(buf: &mut Bytes) -> anyhow::Result<Self> {
                    ensure_remaining(buf, std::mem::size_of::<$ty>())?;
                    Ok(buf.$get())
                }
            }

            impl Payload for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();
            }
        )*
    };
}

wire_primitive! {
    u8 => put_u8, get_u8;
    u32 => put_u32_le, get_u32_le;
    u64 => put_u64_le, get_u64_le;
    i32 => put_i32_le, get_i32_le;
    i64 => put_i64_le, get_i64_le;
    f32 => put_f32_le, get_f32_le;
    f64 => put_f64_le, get_f64_le;
}

impl Wire for () {
    fn encode(&self, _buf: &mut BytesMut) {}

    fn decode(_buf: &mut Bytes) -> anyhow::Result<Self> {
        Ok(())
    }
}

impl Payload for () {
    const SIZE: usize = 0;
}

// host ids and counts travel as u64 so both ends agree regardless of platform
impl Wire for usize {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64_le(*self as u64)
    }

    fn decode(buf: &mut Bytes) -> anyhow::Result<Self> {
        Ok(usize::try_from(u64::decode(buf)?)?)
    }
}

impl<T: Wire> Wire for Vec<T> {
    fn encode(&self, buf: &mut BytesMut) {
        self.len().encode(buf);
        self.iter().for_each(|item| item.encode(buf));
    }

    fn decode(buf: &mut Bytes) -> anyhow::Result<Self> {
        let len = usize::decode(buf)?;
        // a corrupted length must not turn into a huge allocation
        let mut out = Vec::with_capacity(len.min(buf.remaining()));
        for _ in 0..len {
            out.push(T::decode(buf)?);
        }
        Ok(out)
    }
}

/// Outgoing message under construction
#[derive(Debug, Default)]
pub struct SendBuffer {
    inner: BytesMut,
}

impl SendBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: BytesMut::with_capacity(capacity),
        }
    }

    pub fn push<W: Wire>(&mut self, value: &W) {
        value.encode(&mut self.inner);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn freeze(self) -> Bytes {
        self.inner.freeze()
    }
}

/// Received message, consumed front to back in the order it was written
#[derive(Debug, Clone, Default)]
pub struct RecvBuffer {
    inner: Bytes,
}

impl RecvBuffer {
    pub fn new(inner: Bytes) -> Self {
        Self { inner }
    }

    pub fn pop<W: Wire>(&mut self) -> anyhow::Result<W> {
        W::decode(&mut self.inner)
    }

    pub fn remaining(&self) -> usize {
        self.inner.remaining()
    }
}

impl From<Vec<u8>> for RecvBuffer {
    fn from(value: Vec<u8>) -> Self {
        Self::new(Bytes::from(value))
    }
}

impl From<SendBuffer> for RecvBuffer {
    fn from(value: SendBuffer) -> Self {
        Self::new(value.freeze())
    }
}
