use crate::netdev::Entropy;

const DEFAULT_LFSR_SEED: u64 = 0xACE1u64;

/// Xorshift generator for sequence numbers, local ports and packet ids.
/// Not cryptographic.
#[derive(Clone, Copy, Debug)]
pub struct Lfsr64 {
    state: u64,
}

impl Lfsr64 {
    pub fn with_seed(seed: u64) -> Self {
        let s = if seed == 0 { DEFAULT_LFSR_SEED } else { seed };
        Self { state: s }
    }

    pub fn next(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = if x == 0 { 0xfeedc0de } else { x };
        self.state
    }
}

impl Default for Lfsr64 {
    fn default() -> Self {
        Self::with_seed(DEFAULT_LFSR_SEED)
    }
}

impl Entropy for Lfsr64 {
    fn random_u32(&mut self) -> u32 {
        (self.next() >> 16) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_seed_is_replaced() {
        let mut a = Lfsr64::with_seed(0);
        let mut b = Lfsr64::with_seed(DEFAULT_LFSR_SEED);
        assert_eq!(a.next(), b.next());
    }

    #[test]
    fn sequence_moves() {
        let mut rng = Lfsr64::with_seed(42);
        let first = rng.random_u32();
        let second = rng.random_u32();
        assert_ne!(first, second);
    }
}
