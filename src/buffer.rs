use std::ops::{Deref, DerefMut};

const MIN_CAPACITY: usize = 64;

/// Exclusively owned byte buffer backing the fixed area and variable pool of a
/// batch. Newly exposed bytes are always zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ByteBuffer {
    data: Vec<u8>,
}

impl ByteBuffer {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// Grow (zero filled) or shrink to exactly `len` bytes. Capacity at least
    /// doubles when it has to grow.
    pub fn resize(&mut self, len: usize) {
        if len > self.data.capacity() {
            let target = len.max(self.data.capacity() * 2).max(MIN_CAPACITY);
            self.data.reserve_exact(target - self.data.len());
        }
        self.data.resize(len, 0);
    }

    /// Extend by `additional` zero bytes and return the offset of the first one.
    pub fn extend_zeroed(&mut self, additional: usize) -> usize {
        let offset = self.data.len();
        self.resize(offset + additional);
        offset
    }

    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        let offset = self.extend_zeroed(bytes.len());
        self.data[offset..].copy_from_slice(bytes);
    }

    /// Pad with zeros up to the next multiple of `align`.
    pub fn pad_to(&mut self, align: usize) {
        let rem = self.data.len() % align;
        if rem != 0 {
            self.extend_zeroed(align - rem);
        }
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}

impl From<Vec<u8>> for ByteBuffer {
    fn from(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl From<&[u8]> for ByteBuffer {
    fn from(bytes: &[u8]) -> Self {
        Self {
            data: bytes.to_vec(),
        }
    }
}

impl Deref for ByteBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for ByteBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl AsRef<[u8]> for ByteBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}
