//! Seeded RNG — Mulberry32, counted so a save file can restore the stream.
//!
//! All randomness in the engine goes through `RngState`: battles are
//! reproducible for testing, replays, and debugging, and the replay hash is
//! tied to the exact call sequence. A save file stores `(seed, call_count)`
//! and restores the generator with [`RngState::restore`]. No global state.

use serde::{Deserialize, Serialize};

/// RNG state carried alongside the battle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RngState {
    pub seed: u32,
    pub call_count: u32,
}

impl RngState {
    /// Create RNG with the given seed (call count starts at 0).
    pub fn new(seed: u32) -> Self {
        Self { seed, call_count: 0 }
    }

    /// Rebuild a generator at a known position in its stream.
    pub fn restore(seed: u32, skip_count: u32) -> Self {
        Self {
            seed,
            call_count: skip_count,
        }
    }

    /// Get next random f64 in [0, 1). Advances the call count by 1.
    pub fn next_f64(&mut self) -> f64 {
        self.call_count = self.call_count.wrapping_add(1);
        mulberry32(self.seed.wrapping_add(self.call_count))
    }

    /// Random integer in [low, high] inclusive.
    pub fn randint(&mut self, low: i32, high: i32) -> i32 {
        debug_assert!(low <= high, "randint range inverted: [{low}, {high}]");
        let value = self.next_f64();
        low + (value * (high - low + 1) as f64) as i32
    }

    /// A d20 roll in [1, 20].
    pub fn d20(&mut self) -> i32 {
        self.randint(1, 20)
    }
}

/// Mulberry32 PRNG — fast, good distribution, seedable.
///
/// Takes a u32 input (seed + call count), returns a value in [0, 1).
/// Uses i32 wrapping arithmetic so the stream is bit-exact across targets.
fn mulberry32(input: u32) -> f64 {
    let mut t: i32 = input.wrapping_add(0x6D2B79F5) as i32;

    let lhs = ((t as u32) ^ ((t as u32) >> 15)) as i32;
    let rhs = t | 1;
    t = lhs.wrapping_mul(rhs);

    let lhs2 = ((t as u32) ^ ((t as u32) >> 7)) as i32;
    let rhs2 = t | 61;
    let mul = lhs2.wrapping_mul(rhs2);
    t ^= t.wrapping_add(mul);

    let result = (t as u32) ^ ((t as u32) >> 14);
    result as f64 / 4294967296.0
}
