//! Deterministic test payloads
//!
//! Every probe object holds `value[i] = i mod modulus` for its absolute byte
//! offset `i`, so content can be checked without keeping a copy around.

/// Deterministic byte pattern generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Payload {
    modulus: usize,
}

/// First offset at which stored bytes diverge from the pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mismatch {
    pub offset: u64,
    pub expected: u8,
    pub actual: u8,
}

impl Payload {
    /// Create a generator. A zero modulus is treated as 1 (all-zero payload);
    /// configuration validation rejects it before it gets here.
    pub fn new(modulus: usize) -> Self {
        Self {
            modulus: modulus.max(1),
        }
    }

    pub fn modulus(&self) -> usize {
        self.modulus
    }

    /// Byte expected at absolute offset `offset`.
    pub fn byte_at(&self, offset: u64) -> u8 {
        (offset % self.modulus as u64) as u8
    }

    /// Fill `buf` with the pattern starting at absolute `offset`.
    pub fn fill(&self, offset: u64, buf: &mut [u8]) {
        let m = self.modulus as u64;
        let mut v = offset % m;
        for b in buf.iter_mut() {
            *b = v as u8;
            v += 1;
            if v == m {
                v = 0;
            }
        }
    }

    pub fn generate(&self, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        self.fill(0, &mut buf);
        buf
    }

    /// Compare `data` (which starts at absolute `offset`) against the pattern.
    pub fn first_mismatch(&self, data: &[u8], offset: u64) -> Option<Mismatch> {
        data.iter().enumerate().find_map(|(i, &actual)| {
            let at = offset + i as u64;
            let expected = self.byte_at(at);
            (actual != expected).then_some(Mismatch {
                offset: at,
                expected,
                actual,
            })
        })
    }
}
