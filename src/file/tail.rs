use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::codec::Endian;
use crate::error::Result;
use crate::hasher::jenkins_hash;
use crate::Error;

// marker + size + ~size + checksum + u64 offset + hash
pub const TAIL_SIZE: usize = 28;
pub const TAIL_MARKER: [u8; 4] = [0xFF; 4];

const TAIL_HASH_INIT: u32 = 1776;
const HASHED_LEN: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tail {
    /// Packed size of the index batch.
    pub index_size: u32,
    pub chained_checksum: u32,
    pub index_offset: u64,
}

impl Tail {
    pub fn encode(&self, endian: Endian) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(TAIL_SIZE);
        match endian {
            Endian::Little => TailEncoder::<_, LittleEndian>::new(&mut buf).encode(self)?,
            Endian::Big => TailEncoder::<_, BigEndian>::new(&mut buf).encode(self)?,
        }
        let hash = jenkins_hash(TAIL_HASH_INIT, &buf[..HASHED_LEN]);
        buf.resize(TAIL_SIZE, 0);
        endian.write_u32(&mut buf[HASHED_LEN..], hash);
        Ok(buf)
    }

    /// Decode and self-check a tail block.
    pub fn decode(bytes: &[u8], endian: Endian) -> Result<Self> {
        if bytes.len() != TAIL_SIZE {
            return Err(Error::InvalidFormat(format!(
                "tail is {} bytes, expected {}",
                bytes.len(),
                TAIL_SIZE
            )));
        }
        if !is_tail(bytes) {
            return Err(Error::InvalidFormat("tail marker missing".to_string()));
        }
        let (tail, complement, hash) = match endian {
            Endian::Little => TailDecoder::<_, LittleEndian>::new(&bytes[4..]).decode()?,
            Endian::Big => TailDecoder::<_, BigEndian>::new(&bytes[4..]).decode()?,
        };
        if complement != !tail.index_size {
            return Err(Error::InvalidFormat(format!(
                "tail size check failed: {:#x} vs complement {:#x}",
                tail.index_size, complement
            )));
        }
        let expected = jenkins_hash(TAIL_HASH_INIT, &bytes[..HASHED_LEN]);
        if hash != expected {
            return Err(Error::InvalidFormat(format!(
                "tail hash {:#010x} != {:#010x}",
                hash, expected
            )));
        }
        Ok(tail)
    }
}

/// Whether bytes at a batch boundary start a tail rather than a batch.
pub fn is_tail(bytes: &[u8]) -> bool {
    bytes.len() >= 4 && bytes[..4] == TAIL_MARKER
}

struct TailEncoder<W: Write, B: ByteOrder> {
    writer: W,
    _order: std::marker::PhantomData<B>,
}

impl<W: Write, B: ByteOrder> TailEncoder<W, B> {
    fn new(writer: W) -> Self {
        Self {
            writer,
            _order: std::marker::PhantomData,
        }
    }

    fn encode(&mut self, tail: &Tail) -> Result<()> {
        self.writer
            .write_all(&TAIL_MARKER)
            .map_err(|e| Error::Encode("tail_marker", e))?;
        self.writer
            .write_u32::<B>(tail.index_size)
            .map_err(|e| Error::Encode("index_size", e))?;
        self.writer
            .write_u32::<B>(!tail.index_size)
            .map_err(|e| Error::Encode("index_size_complement", e))?;
        self.writer
            .write_u32::<B>(tail.chained_checksum)
            .map_err(|e| Error::Encode("chained_checksum", e))?;
        self.writer
            .write_u64::<B>(tail.index_offset)
            .map_err(|e| Error::Encode("index_offset", e))?;
        Ok(())
    }
}

struct TailDecoder<R: Read, B: ByteOrder> {
    reader: R,
    _order: std::marker::PhantomData<B>,
}

impl<R: Read, B: ByteOrder> TailDecoder<R, B> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            _order: std::marker::PhantomData,
        }
    }

    fn decode(&mut self) -> Result<(Tail, u32, u32)> {
        let index_size = self
            .reader
            .read_u32::<B>()
            .map_err(|e| Error::Decode("index_size", e))?;
        let complement = self
            .reader
            .read_u32::<B>()
            .map_err(|e| Error::Decode("index_size_complement", e))?;
        let chained_checksum = self
            .reader
            .read_u32::<B>()
            .map_err(|e| Error::Decode("chained_checksum", e))?;
        let index_offset = self
            .reader
            .read_u64::<B>()
            .map_err(|e| Error::Decode("index_offset", e))?;
        let hash = self
            .reader
            .read_u32::<B>()
            .map_err(|e| Error::Decode("tail_hash", e))?;

        let tail = Tail {
            index_size,
            chained_checksum,
            index_offset,
        };
        Ok((tail, complement, hash))
    }
}
