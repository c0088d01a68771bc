//! Little-endian byte streams.

use super::error::{SnapshotError, SnapshotResult};

#[derive(Debug, Default)]
pub struct WriteStream {
    buffer: Vec<u8>,
}

impl WriteStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> usize {
        self.buffer.len()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buffer.push(v);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.write_u8(v as u8);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.buffer.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buffer.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_i32(&mut self, v: i32) {
        self.buffer.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.buffer.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_i64(&mut self, v: i64) {
        self.buffer.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_f64(&mut self, v: f64) {
        self.buffer.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_len(&mut self, len: usize) {
        self.write_u32(len as u32);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }
}

pub struct ReadStream<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> ReadStream<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn is_at_end(&self) -> bool {
        self.position == self.data.len()
    }

    /// Borrows the next `len` bytes without copying.
    pub fn read_bytes(&mut self, len: usize) -> SnapshotResult<&'a [u8]> {
        let end = self
            .position
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(SnapshotError::UnexpectedEnd {
                position: self.position,
                wanted: len,
            })?;
        let bytes = &self.data[self.position..end];
        self.position = end;
        Ok(bytes)
    }

    fn read_array<const N: usize>(&mut self) -> SnapshotResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> SnapshotResult<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_bool(&mut self) -> SnapshotResult<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> SnapshotResult<u16> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> SnapshotResult<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_i32(&mut self) -> SnapshotResult<i32> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> SnapshotResult<u64> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    pub fn read_i64(&mut self) -> SnapshotResult<i64> {
        Ok(i64::from_le_bytes(self.read_array()?))
    }

    pub fn read_f64(&mut self) -> SnapshotResult<f64> {
        Ok(f64::from_le_bytes(self.read_array()?))
    }

    /// A `u32` element count, checked against the bytes left assuming
    /// each element takes at least `min_element_size` bytes.
    pub fn read_len(&mut self, min_element_size: usize) -> SnapshotResult<usize> {
        let position = self.position;
        let len = self.read_u32()? as usize;
        let remaining = self.data.len() - self.position;
        if len.saturating_mul(min_element_size) > remaining {
            return Err(SnapshotError::UnexpectedEnd {
                position,
                wanted: len * min_element_size,
            });
        }
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars_round_trip_little_endian() {
        let mut w = WriteStream::new();
        w.write_u32(0x0102_0304);
        w.write_i64(-2);
        w.write_f64(1.5);
        let bytes = w.into_bytes();
        assert_eq!(&bytes[..4], &[4, 3, 2, 1]);

        let mut r = ReadStream::new(&bytes);
        assert_eq!(r.read_u32(), Ok(0x0102_0304));
        assert_eq!(r.read_i64(), Ok(-2));
        assert_eq!(r.read_f64(), Ok(1.5));
        assert!(r.is_at_end());
        assert!(matches!(r.read_u8(), Err(SnapshotError::UnexpectedEnd { .. })));
    }

    #[test]
    fn oversized_lengths_are_rejected_before_allocation() {
        let mut w = WriteStream::new();
        w.write_u32(u32::MAX);
        let bytes = w.into_bytes();
        let mut r = ReadStream::new(&bytes);
        assert!(r.read_len(1).is_err());
    }
}
