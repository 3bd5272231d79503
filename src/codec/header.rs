use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use super::compress::Mode;
use super::endian::Endian;
use crate::error::Result;
use crate::Error;

// 7 u32 words + 2 mode bytes + name length + reserved
pub const PREFIX_SIZE: usize = 32;
pub const DIGEST_OFFSET: usize = 16;
pub const NAME_LEN_OFFSET: usize = 30;

pub fn pad4(len: usize) -> usize {
    (len + 3) & !3
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchHeader {
    pub compressed_fixed: u32,
    pub compressed_variable: u32,
    pub nrecords: u32,
    /// Uncompressed pool size, including the leading empty value.
    pub variable_size: u32,
    pub digest: u32,
    pub content_hash: u32,
    /// Fixed area size handed to the compressor (after null compaction).
    pub fixed_coded_size: u32,
    pub fixed_mode: Mode,
    pub variable_mode: Mode,
    pub type_name: String,
}

impl BatchHeader {
    /// Header bytes including the padded type name.
    pub fn encoded_len(&self) -> usize {
        PREFIX_SIZE + pad4(self.type_name.len())
    }

    /// Total packed length: header plus both padded sections.
    pub fn packed_len(&self) -> usize {
        self.encoded_len()
            + pad4(self.compressed_fixed as usize)
            + pad4(self.compressed_variable as usize)
    }

    pub fn encode(&self, endian: Endian) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        match endian {
            Endian::Little => HeaderEncoder::<_, LittleEndian>::new(&mut buf).encode(self)?,
            Endian::Big => HeaderEncoder::<_, BigEndian>::new(&mut buf).encode(self)?,
        }
        Ok(buf)
    }

    pub fn decode(bytes: &[u8], endian: Endian) -> Result<Self> {
        if bytes.len() < PREFIX_SIZE {
            return Err(Error::CorruptData(format!(
                "packed batch of {} bytes is shorter than its header",
                bytes.len()
            )));
        }
        match endian {
            Endian::Little => HeaderDecoder::<_, LittleEndian>::new(bytes).decode(),
            Endian::Big => HeaderDecoder::<_, BigEndian>::new(bytes).decode(),
        }
    }
}

/// Packed length from the fixed 32-byte prefix alone.
pub fn packed_len(prefix: &[u8], endian: Endian) -> Result<usize> {
    if prefix.len() < PREFIX_SIZE {
        return Err(Error::CorruptData("truncated batch header".to_string()));
    }
    let compressed_fixed = endian.read_u32(&prefix[0..]) as usize;
    let compressed_variable = endian.read_u32(&prefix[4..]) as usize;
    let name_len = prefix[NAME_LEN_OFFSET] as usize;
    Ok(PREFIX_SIZE + pad4(name_len) + pad4(compressed_fixed) + pad4(compressed_variable))
}

pub struct HeaderDecoder<R: Read, B: ByteOrder> {
    reader: R,
    _order: std::marker::PhantomData<B>,
}

impl<R: Read, B: ByteOrder> HeaderDecoder<R, B> {
    pub fn new(reader: R) -> Self {
        HeaderDecoder {
            reader,
            _order: std::marker::PhantomData,
        }
    }

    fn word(&mut self, field: &'static str) -> Result<u32> {
        self.reader
            .read_u32::<B>()
            .map_err(|e| Error::Decode(field, e))
    }

    fn byte(&mut self, field: &'static str) -> Result<u8> {
        self.reader.read_u8().map_err(|e| Error::Decode(field, e))
    }

    pub fn decode(&mut self) -> Result<BatchHeader> {
        let compressed_fixed = self.word("compressed_fixed")?;
        let compressed_variable = self.word("compressed_variable")?;
        let nrecords = self.word("nrecords")?;
        let variable_size = self.word("variable_size")?;
        let digest = self.word("digest")?;
        let content_hash = self.word("content_hash")?;
        let fixed_coded_size = self.word("fixed_coded_size")?;
        let fixed_mode = Mode::from_byte(self.byte("fixed_mode")?)?;
        let variable_mode = Mode::from_byte(self.byte("variable_mode")?)?;
        let name_len = self.byte("type_name_len")? as usize;
        let _reserved = self.byte("reserved")?;

        let mut name = vec![0u8; name_len];
        self.reader
            .read_exact(&mut name)
            .map_err(|e| Error::Decode("type_name", e))?;
        let type_name = String::from_utf8(name)
            .map_err(|_| Error::CorruptData("type name is not UTF-8".to_string()))?;

        Ok(BatchHeader {
            compressed_fixed,
            compressed_variable,
            nrecords,
            variable_size,
            digest,
            content_hash,
            fixed_coded_size,
            fixed_mode,
            variable_mode,
            type_name,
        })
    }
}

pub struct HeaderEncoder<W: Write, B: ByteOrder> {
    writer: W,
    _order: std::marker::PhantomData<B>,
}

impl<W: Write, B: ByteOrder> HeaderEncoder<W, B> {
    pub fn new(writer: W) -> Self {
        HeaderEncoder {
            writer,
            _order: std::marker::PhantomData,
        }
    }

    fn word(&mut self, field: &'static str, value: u32) -> Result<()> {
        self.writer
            .write_u32::<B>(value)
            .map_err(|e| Error::Encode(field, e))
    }

    pub fn encode(&mut self, header: &BatchHeader) -> Result<()> {
        let name_len = u8::try_from(header.type_name.len())
            .map_err(|_| Error::Schema(format!("type name {} too long", header.type_name)))?;

        self.word("compressed_fixed", header.compressed_fixed)?;
        self.word("compressed_variable", header.compressed_variable)?;
        self.word("nrecords", header.nrecords)?;
        self.word("variable_size", header.variable_size)?;
        self.word("digest", header.digest)?;
        self.word("content_hash", header.content_hash)?;
        self.word("fixed_coded_size", header.fixed_coded_size)?;

        self.writer
            .write_all(&[
                header.fixed_mode as u8,
                header.variable_mode as u8,
                name_len,
                0,
            ])
            .map_err(|e| Error::Encode("modes", e))?;

        let mut name = header.type_name.as_bytes().to_vec();
        name.resize(pad4(name.len()), 0);
        self.writer
            .write_all(&name)
            .map_err(|e| Error::Encode("type_name", e))?;

        Ok(())
    }
}
