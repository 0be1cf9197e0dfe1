/*!
 * Per-Thread Backoff Seeds
 *
 * Thread-local xorshift64* generator for randomized contention backoff.
 * Each thread draws its seed from a global counter mixed through
 * SplitMix64 on first use; there is no teardown and no shared state on
 * the generation path.
 */

use std::cell::Cell;
use std::hint;
use std::sync::atomic::{AtomicU64, Ordering};

/// Weyl-sequence increment (golden-ratio gamma) for seed generation.
const SEED_INCREMENT: u64 = 0x9E37_79B9_7F4A_7C15;

static SEED_SOURCE: AtomicU64 = AtomicU64::new(SEED_INCREMENT);

thread_local! {
    static SEED: Cell<u64> = Cell::new(initial_seed());
}

/// One SplitMix64 draw over the global counter; xorshift requires a
/// non-zero state.
fn initial_seed() -> u64 {
    let mut z = SEED_SOURCE.fetch_add(SEED_INCREMENT, Ordering::Relaxed);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^= z >> 31;
    if z == 0 {
        1
    } else {
        z
    }
}

/// Next value of the calling thread's xorshift64* sequence.
pub fn next_u64() -> u64 {
    SEED.with(|seed| {
        let mut x = seed.get();
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        seed.set(x);
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    })
}

/// Jittered spin count in `1..=max`.
pub fn spins(max: u32) -> u32 {
    debug_assert!(max > 0);
    (next_u64() % u64::from(max)) as u32 + 1
}

/// Spin the CPU a jittered number of iterations before a retry.
pub fn spin(max: u32) {
    for _ in 0..spins(max) {
        hint::spin_loop();
    }
}
