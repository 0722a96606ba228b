use std::hash::Hasher;

/// A deterministic FNV-1a 64-bit hasher.
///
/// Cache fingerprints must be stable across runs so that persisted traces and
/// test expectations stay comparable, which rules out the randomized
/// `DefaultHasher`.
#[derive(Debug)]
pub struct FnvHasher {
    state: u64,
}

impl Default for FnvHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl FnvHasher {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;

    pub fn new() -> Self {
        Self {
            state: Self::OFFSET_BASIS,
        }
    }

    /// Folds a float in after quantizing to centi-units. Fingerprints should
    /// ignore sub-centipixel drift from float round-tripping.
    pub fn write_quantized(&mut self, value: f32) {
        let quantized = if value.is_finite() {
            (value * 100.0).round() as i64
        } else {
            i64::MAX
        };
        self.write_i64(quantized);
    }
}

impl Hasher for FnvHasher {
    fn finish(&self) -> u64 {
        self.state
    }

    fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.state ^= byte as u64;
            self.state = self.state.wrapping_mul(Self::PRIME);
        }
    }
}
