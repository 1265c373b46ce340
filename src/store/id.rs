//! Time-ordered mail identifiers.
//!
//! Ids are UUIDv7 values in their lowercase hyphenated form, so string
//! order equals creation order. The 12-bit `rand_a` field carries a
//! per-millisecond counter; the remaining 62 bits are random.

use std::sync::Mutex;

use chrono::Utc;
use uuid::{Builder, Uuid};

/// Largest counter value that fits in `rand_a`.
const MAX_COUNTER: u16 = 0x0FFF;

#[derive(Debug, Default)]
struct IdState {
    last_millis: u64,
    counter: u16,
    last_seed: u64,
}

/// Generator for strictly increasing mail ids.
#[derive(Debug, Default)]
pub struct MailIdGenerator {
    state: Mutex<IdState>,
}

impl MailIdGenerator {
    /// Create a new generator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a generator whose ids sort above `last_id`, the largest id
    /// already stored. An absent or foreign id leaves the generator fresh.
    pub fn after(last_id: Option<&str>) -> Self {
        let generator = Self::new();
        if let Some(millis) = last_id.and_then(id_timestamp_millis) {
            let mut state = generator.lock();
            state.last_millis = millis;
            // Forces the next id at this millisecond into the next one.
            state.counter = MAX_COUNTER;
        }
        generator
    }

    /// Next id for the current time.
    ///
    /// Never returns an id lower than or equal to one returned before, even
    /// if the wall clock steps backwards.
    pub fn next_id(&self) -> String {
        let now = Utc::now().timestamp_millis().max(0) as u64;
        let mut state = self.lock();
        let millis = now.max(state.last_millis);
        let (millis, counter) = state.advance(millis);
        build(millis, counter)
    }

    /// Id seeded from a given timestamp.
    ///
    /// Seeds fed in non-decreasing order produce increasing ids. A seed older
    /// than the last one seen yields an id at that older time without
    /// touching the generator state. Seeded and clock-based ids should come
    /// from separate generators.
    pub fn id_at(&self, millis: u64) -> String {
        let mut state = self.lock();
        if millis < state.last_seed {
            return build(millis, 0);
        }
        state.last_seed = millis;
        let millis = millis.max(state.last_millis);
        let (millis, counter) = state.advance(millis);
        build(millis, counter)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, IdState> {
        // Plain integers; a poisoned lock still holds valid data.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl IdState {
    fn advance(&mut self, millis: u64) -> (u64, u16) {
        if millis > self.last_millis {
            self.last_millis = millis;
            self.counter = 0;
        } else if self.counter >= MAX_COUNTER {
            self.last_millis += 1;
            self.counter = 0;
        } else {
            self.counter += 1;
        }
        (self.last_millis, self.counter)
    }
}

fn build(millis: u64, counter: u16) -> String {
    let tail: [u8; 8] = rand::random();
    let mut bytes = [0u8; 10];
    bytes[0] = ((counter >> 8) & 0x0F) as u8;
    bytes[1] = (counter & 0xFF) as u8;
    bytes[2..].copy_from_slice(&tail);
    Builder::from_unix_timestamp_millis(millis, &bytes)
        .into_uuid()
        .to_string()
}

/// Extract the millisecond timestamp embedded in a mail id.
pub fn id_timestamp_millis(id: &str) -> Option<u64> {
    let uuid = Uuid::parse_str(id).ok()?;
    let bytes = uuid.as_bytes();
    let mut millis = 0u64;
    for b in &bytes[..6] {
        millis = (millis << 8) | u64::from(*b);
    }
    Some(millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_strictly_increasing() {
        let generator = MailIdGenerator::new();
        let ids: Vec<String> = (0..5000).map(|_| generator.next_id()).collect();
        for pair in ids.windows(2) {
            assert!(pair[0] < pair[1], "{} !< {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_id_format() {
        let id = MailIdGenerator::new().next_id();
        assert_eq!(id.len(), 36);
        assert_eq!(id, id.to_lowercase());
        assert_eq!(Uuid::parse_str(&id).unwrap().get_version_num(), 7);
    }

    #[test]
    fn test_seeded_ids_keep_seed_order() {
        let generator = MailIdGenerator::new();
        let a = generator.id_at(1_700_000_000_000);
        let b = generator.id_at(1_700_000_000_000);
        let c = generator.id_at(1_700_000_000_001);
        assert!(a < b);
        assert!(b < c);
        assert_eq!(id_timestamp_millis(&a), Some(1_700_000_000_000));
        assert_eq!(id_timestamp_millis(&c), Some(1_700_000_000_001));
    }

    #[test]
    fn test_older_seed_does_not_disturb_sequence() {
        let generator = MailIdGenerator::new();
        let late = generator.id_at(2_000_000_000_000);
        let early = generator.id_at(1_000_000_000_000);
        let later = generator.id_at(2_000_000_000_000);
        assert!(early < late);
        assert!(late < later);
    }

    #[test]
    fn test_counter_overflow_rolls_into_next_millisecond() {
        let generator = MailIdGenerator::new();
        let mut last = generator.id_at(1_000);
        for _ in 0..=MAX_COUNTER as usize + 1 {
            let next = generator.id_at(1_000);
            assert!(last < next);
            last = next;
        }
        assert_eq!(id_timestamp_millis(&last), Some(1_001));
    }

    #[test]
    fn test_generator_continues_after_stored_id() {
        // Stored id from far in the future, as after a clock step back.
        let stored = MailIdGenerator::new().id_at(32_503_680_000_000);
        let generator = MailIdGenerator::after(Some(&stored));

        let first = generator.next_id();
        let second = generator.next_id();
        assert!(stored < first, "{stored} !< {first}");
        assert!(first < second);
        assert_eq!(id_timestamp_millis(&first), Some(32_503_680_000_001));
    }

    #[test]
    fn test_generator_after_nothing_is_fresh() {
        let before = Utc::now().timestamp_millis() as u64;
        for last in [None, Some("1700000000000abcde")] {
            let id = MailIdGenerator::after(last).next_id();
            assert!(id_timestamp_millis(&id).unwrap() >= before);
        }
    }

    #[test]
    fn test_timestamp_of_non_uuid() {
        assert_eq!(id_timestamp_millis("1700000000000abcde"), None);
    }
}
