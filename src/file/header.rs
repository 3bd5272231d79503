use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::codec::Endian;
use crate::error::Result;
use crate::Error;

// magic + i32 + i64 + 3 * f64
pub const FILE_HEADER_SIZE: usize = 40;
pub const MAGIC: &[u8; 4] = b"EXv1";

const CHECK_I32: i32 = 0x1234_5678;
const CHECK_I64: i64 = 0x1234_5678_9ABC_DEF0;
#[allow(clippy::approx_constant)]
const CHECK_PI: f64 = 3.14159265358979;

/// Encode the file header in the given byte order.
pub fn encode(endian: Endian) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(FILE_HEADER_SIZE);
    match endian {
        Endian::Little => HeaderEncoder::<_, LittleEndian>::new(&mut buf).encode()?,
        Endian::Big => HeaderEncoder::<_, BigEndian>::new(&mut buf).encode()?,
    }
    Ok(buf)
}

/// Validate a file header and return the byte order it was written in.
pub fn detect(bytes: &[u8]) -> Result<Endian> {
    if bytes.len() < FILE_HEADER_SIZE {
        return Err(Error::InvalidFormat(format!(
            "file header is {} bytes, expected {}",
            bytes.len(),
            FILE_HEADER_SIZE
        )));
    }
    if &bytes[..4] != MAGIC {
        return Err(Error::InvalidFormat(format!(
            "bad magic {:02x?}",
            &bytes[..4]
        )));
    }

    let endian = if LittleEndian::read_i32(&bytes[4..]) == CHECK_I32 {
        Endian::Little
    } else if BigEndian::read_i32(&bytes[4..]) == CHECK_I32 {
        Endian::Big
    } else {
        return Err(Error::InvalidFormat(
            "file header int32 check matches neither byte order".to_string(),
        ));
    };

    match endian {
        Endian::Little => HeaderDecoder::<_, LittleEndian>::new(&bytes[8..]).verify()?,
        Endian::Big => HeaderDecoder::<_, BigEndian>::new(&bytes[8..]).verify()?,
    }
    Ok(endian)
}

struct HeaderEncoder<W: Write, B: ByteOrder> {
    writer: W,
    _order: std::marker::PhantomData<B>,
}

impl<W: Write, B: ByteOrder> HeaderEncoder<W, B> {
    fn new(writer: W) -> Self {
        Self {
            writer,
            _order: std::marker::PhantomData,
        }
    }

    fn encode(&mut self) -> Result<()> {
        self.writer
            .write_all(MAGIC)
            .map_err(|e| Error::Encode("magic", e))?;
        self.writer
            .write_i32::<B>(CHECK_I32)
            .map_err(|e| Error::Encode("check_int32", e))?;
        self.writer
            .write_i64::<B>(CHECK_I64)
            .map_err(|e| Error::Encode("check_int64", e))?;
        self.writer
            .write_f64::<B>(CHECK_PI)
            .map_err(|e| Error::Encode("check_pi", e))?;
        self.writer
            .write_f64::<B>(f64::INFINITY)
            .map_err(|e| Error::Encode("check_inf", e))?;
        self.writer
            .write_f64::<B>(f64::NAN)
            .map_err(|e| Error::Encode("check_nan", e))?;
        Ok(())
    }
}

struct HeaderDecoder<R: Read, B: ByteOrder> {
    reader: R,
    _order: std::marker::PhantomData<B>,
}

impl<R: Read, B: ByteOrder> HeaderDecoder<R, B> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            _order: std::marker::PhantomData,
        }
    }

    fn verify(&mut self) -> Result<()> {
        let int64 = self
            .reader
            .read_i64::<B>()
            .map_err(|e| Error::Decode("check_int64", e))?;
        if int64 != CHECK_I64 {
            return Err(Error::InvalidFormat(format!(
                "file header int64 check {:#x} != {:#x}",
                int64, CHECK_I64
            )));
        }

        let pi = self
            .reader
            .read_f64::<B>()
            .map_err(|e| Error::Decode("check_pi", e))?;
        if pi != CHECK_PI {
            return Err(Error::InvalidFormat(format!(
                "file header double check {} != {}",
                pi, CHECK_PI
            )));
        }

        let inf = self
            .reader
            .read_f64::<B>()
            .map_err(|e| Error::Decode("check_inf", e))?;
        if inf != f64::INFINITY {
            return Err(Error::InvalidFormat(format!(
                "file header infinity check read {}",
                inf
            )));
        }

        let nan = self
            .reader
            .read_f64::<B>()
            .map_err(|e| Error::Decode("check_nan", e))?;
        if !nan.is_nan() {
            return Err(Error::InvalidFormat(format!(
                "file header NaN check read {}",
                nan
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_detects_both_orders() -> Result<()> {
        for endian in [Endian::Little, Endian::Big] {
            let bytes = encode(endian)?;
            assert_eq!(bytes.len(), FILE_HEADER_SIZE);
            assert_eq!(detect(&bytes)?, endian);
        }
        Ok(())
    }

    #[test]
    fn test_header_rejects_damage() -> Result<()> {
        let good = encode(Endian::Little)?;

        let mut bad_magic = good.clone();
        bad_magic[0] = b'X';
        assert!(matches!(detect(&bad_magic), Err(Error::InvalidFormat(_))));

        let mut bad_int = good.clone();
        bad_int[5] ^= 0xFF;
        assert!(matches!(detect(&bad_int), Err(Error::InvalidFormat(_))));

        let mut bad_nan = good.clone();
        bad_nan[32..40].copy_from_slice(&0.0f64.to_le_bytes());
        assert!(matches!(detect(&bad_nan), Err(Error::InvalidFormat(_))));

        assert!(matches!(detect(&good[..20]), Err(Error::InvalidFormat(_))));
        Ok(())
    }
}
