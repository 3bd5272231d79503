//! Variable pool entries.
//!
//! ```text
//! offset 0:  00 00 00 00                       the empty value
//! offset o:  u32 size | size bytes | zero pad   with (o + 4) % 8 == 0
//! ```
//!
//! Sizes are host order in memory and writer order on disk.

use byteorder::{ByteOrder, NativeEndian};

use crate::buffer::ByteBuffer;
use crate::error::Result;
use crate::Error;

/// Bytes an entry occupies after its size word, so the next entry is aligned.
pub fn roundup(size: usize) -> usize {
    size + (12 - size % 8) % 8
}

pub fn init(pool: &mut ByteBuffer) {
    pool.clear();
    pool.extend_zeroed(4);
}

/// Append a value, returning its offset. Empty values all share offset 0.
pub fn append(pool: &mut ByteBuffer, bytes: &[u8]) -> Result<u32> {
    if bytes.is_empty() {
        return Ok(0);
    }
    let size = u32::try_from(bytes.len())
        .map_err(|_| Error::ProtocolMisuse(format!("value of {} bytes", bytes.len())))?;
    let offset = pool.len();
    debug_assert_eq!((offset + 4) % 8, 0);
    let start = pool.extend_zeroed(4 + roundup(bytes.len()));
    NativeEndian::write_u32(&mut pool[start..], size);
    pool[start + 4..start + 4 + bytes.len()].copy_from_slice(bytes);
    u32::try_from(offset).map_err(|_| Error::ProtocolMisuse("variable pool over 4GiB".to_string()))
}

/// Value stored at `offset`, with bounds checks only.
pub fn value(pool: &[u8], offset: u32) -> Result<&[u8]> {
    let offset = offset as usize;
    if offset + 4 > pool.len() {
        return Err(Error::CorruptData(format!(
            "variable offset {} outside pool of {} bytes",
            offset,
            pool.len()
        )));
    }
    let size = NativeEndian::read_u32(&pool[offset..]) as usize;
    let start = offset + 4;
    if start + size > pool.len() {
        return Err(Error::CorruptData(format!(
            "variable value at {} of {} bytes overruns pool of {} bytes",
            offset,
            size,
            pool.len()
        )));
    }
    Ok(&pool[start..start + size])
}

/// Full structural check of one entry: alignment, bounds and zero padding.
pub fn self_check(pool: &[u8], offset: u32) -> Result<()> {
    if pool.len() < 4 || pool[..4] != [0, 0, 0, 0] {
        return Err(Error::CorruptData(
            "variable pool does not start with the empty value".to_string(),
        ));
    }
    if offset == 0 {
        return Ok(());
    }
    let at = offset as usize;
    if (at + 4) % 8 != 0 {
        return Err(Error::CorruptData(format!(
            "misaligned variable offset {}",
            offset
        )));
    }
    let data = value(pool, offset)?;
    let end = at + 4 + roundup(data.len());
    if end > pool.len() {
        return Err(Error::CorruptData(format!(
            "variable padding at {} overruns pool",
            offset
        )));
    }
    if pool[at + 4 + data.len()..end].iter().any(|&b| b != 0) {
        return Err(Error::CorruptData(format!(
            "non-zero padding after variable value at {}",
            offset
        )));
    }
    Ok(())
}

/// Offsets of every entry, in pool order.
pub fn entries(pool: &[u8]) -> Result<Vec<u32>> {
    let mut offsets = Vec::new();
    let mut at = 4;
    while at < pool.len() {
        let offset = u32::try_from(at)
            .map_err(|_| Error::CorruptData("variable pool over 4GiB".to_string()))?;
        let size = value(pool, offset)?.len();
        offsets.push(offset);
        at += 4 + roundup(size);
    }
    if at != pool.len() {
        return Err(Error::CorruptData(format!(
            "variable pool entries end at {} but pool is {} bytes",
            at,
            pool.len()
        )));
    }
    Ok(offsets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundup_keeps_alignment() {
        for size in 0..40 {
            assert_eq!((4 + roundup(size)) % 8, 0, "size {}", size);
            assert!(roundup(size) >= size);
        }
    }

    #[test]
    fn test_append_and_check() -> Result<()> {
        let mut pool = ByteBuffer::new();
        init(&mut pool);

        assert_eq!(append(&mut pool, b"")?, 0);
        let a = append(&mut pool, b"hello")?;
        let b = append(&mut pool, b"12345678")?;
        assert_eq!(a, 4);
        assert_eq!(b, 20);

        assert_eq!(value(&pool, a)?, b"hello");
        assert_eq!(value(&pool, b)?, b"12345678");
        assert_eq!(value(&pool, 0)?, b"");
        self_check(&pool, a)?;
        self_check(&pool, b)?;
        assert_eq!(entries(&pool)?, vec![a, b]);
        Ok(())
    }

    #[test]
    fn test_self_check_failures() -> Result<()> {
        let mut pool = ByteBuffer::new();
        init(&mut pool);
        let a = append(&mut pool, b"abc")?;

        assert!(matches!(self_check(&pool, a + 1), Err(Error::CorruptData(_))));
        assert!(matches!(self_check(&pool, 100), Err(Error::CorruptData(_))));

        let last = pool.len() - 1;
        pool[last] = 7;
        assert!(matches!(self_check(&pool, a), Err(Error::CorruptData(_))));
        Ok(())
    }
}
