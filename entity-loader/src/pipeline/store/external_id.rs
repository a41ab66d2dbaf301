//! Short external identifiers for new entity rows

use rand::Rng;
use std::sync::atomic::{AtomicU32, Ordering};

/// Length of every generated id
pub const EXTERNAL_ID_LEN: usize = 11;

const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

static COUNTER: AtomicU32 = AtomicU32::new(0);

/// Generate a fixed-length base-36 id from a rolling counter, the wall clock
/// in seconds and a random suffix
///
/// 1296 consecutive ids within one second never collide; beyond that the
/// random suffix makes a repeat unlikely. Rows are matched on their business
/// key and stored under a surrogate key, so a repeat is harmless.
pub fn new_external_id() -> String {
    let counter = COUNTER.fetch_add(1, Ordering::Relaxed) as u64;
    let seconds = chrono::Utc::now().timestamp().max(0) as u64;
    let random: u64 = rand::rng().random_range(0..46_656);

    // 6 digits of time, 2 of counter, 3 of randomness
    let mut out = String::with_capacity(EXTERNAL_ID_LEN);
    push_base36(&mut out, seconds % 36u64.pow(6), 6);
    push_base36(&mut out, counter % 1296, 2);
    push_base36(&mut out, random, 3);
    out
}

fn push_base36(out: &mut String, mut value: u64, width: usize) {
    let mut digits = vec![b'0'; width];
    for slot in digits.iter_mut().rev() {
        *slot = ALPHABET[(value % 36) as usize];
        value /= 36;
    }
    out.extend(digits.into_iter().map(char::from));
}
