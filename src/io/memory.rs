use super::ReadAt;
use std::io::Result;

/// Archive bytes already held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryReader {
    data: Vec<u8>,
}

impl MemoryReader {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl ReadAt for MemoryReader {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let Ok(start) = usize::try_from(offset) else {
            return Ok(0);
        };
        if start >= self.data.len() {
            return Ok(0);
        }
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        Ok(n)
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_past_end_returns_zero() {
        let reader = MemoryReader::new(vec![1, 2, 3]);
        let mut buf = [0u8; 4];
        assert_eq!(reader.read_at(3, &mut buf).unwrap(), 0);
        assert_eq!(reader.read_at(1, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[2, 3]);
    }

    #[test]
    fn read_exact_at_reports_eof() {
        let reader = MemoryReader::new(vec![0; 8]);
        let mut buf = [0u8; 4];
        assert!(reader.read_exact_at(4, &mut buf).is_ok());
        let err = reader.read_exact_at(6, &mut buf).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }
}
