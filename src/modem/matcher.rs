use thiserror::Error;

// Error line every modem command may answer with instead of its target.
pub const ERROR_MARKER: &[u8] = b"ERROR";

// Target substrings that complete an exchange.
// Targets are checked in the order given. The fixed `ERROR` marker is
// checked before them, so a response that ends on both at once is a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponsePattern {
    targets: Vec<Vec<u8>>,
}

impl ResponsePattern {
    pub fn new<I, T>(targets: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        let targets: Vec<Vec<u8>> = targets
            .into_iter()
            .map(|target| target.as_ref().to_vec())
            .filter(|target| !target.is_empty())
            .collect();
        Self { targets }
    }

    pub fn one(target: impl AsRef<[u8]>) -> Self {
        Self::new([target])
    }

    pub fn ok() -> Self {
        Self::one("OK")
    }
}

// What the buffer-so-far contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scan {
    Pending,
    Target(usize),
    Error,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("response exceeded {limit} bytes without a terminator")]
pub struct BufferOverflow {
    pub limit: usize,
}

// Incremental substring scanner over bytes fed one at a time.
// Every push only has to look at needles ending on the newest byte: any
// occurrence in the buffer ends on some byte, and it was checked when that
// byte arrived. This is the same answer as rescanning the whole buffer.
pub struct ResponseMatcher<'p> {
    pattern: &'p ResponsePattern,
    buf: Vec<u8>,
    limit: usize,
}

impl<'p> ResponseMatcher<'p> {
    pub fn new(pattern: &'p ResponsePattern, limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            pattern,
            buf: Vec::with_capacity(limit.min(1_024)),
            limit,
        }
    }

    pub fn push(&mut self, byte: u8) -> Result<Scan, BufferOverflow> {
        if self.buf.len() >= self.limit {
            return Err(BufferOverflow { limit: self.limit });
        }
        self.buf.push(byte);

        if self.buf.ends_with(ERROR_MARKER) {
            return Ok(Scan::Error);
        }
        for (index, target) in self.pattern.targets.iter().enumerate() {
            if self.buf.ends_with(target) {
                return Ok(Scan::Target(index));
            }
        }
        Ok(Scan::Pending)
    }

    pub fn into_buffer(self) -> Vec<u8> {
        self.buf
    }
}
