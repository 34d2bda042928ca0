use sha2::{Digest, Sha256};
use std::io::{Result, Write};

/// Write adapter hashing every byte on its way to `inner`.
pub struct HashingForward<'a, W: Write> {
    inner: W,
    hasher: &'a mut Sha256,
    pub counted: u64,
}

impl<'a, W: Write> HashingForward<'a, W> {
    pub fn new(inner: W, hasher: &'a mut Sha256) -> Self {
        Self {
            inner,
            hasher,
            counted: 0,
        }
    }
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<'a, W: Write> Write for HashingForward<'a, W> {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let n = self.inner.write(buf)?;
        // Only what the sink accepted; a short write is retried by the caller.
        self.hasher.update(&buf[..n]);
        self.counted += n as u64;
        Ok(n)
    }
    fn flush(&mut self) -> Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_what_passes_through() {
        let mut hasher = Sha256::new();
        let mut fw = HashingForward::new(Vec::new(), &mut hasher);
        fw.write_all(b"hello ").unwrap();
        fw.write_all(b"world").unwrap();
        assert_eq!(fw.counted, 11);
        let out = fw.into_inner();
        assert_eq!(out, b"hello world");
        assert_eq!(hasher.finalize().as_slice(), Sha256::digest(b"hello world").as_slice());
    }
}
