//! Concurrent interning table
//!
//! Fixed-capacity open-addressing hash table (double hashing) that maps
//! strings to stable slot indices. It never grows: the capacity is chosen
//! once, rounded up to an odd prime, and inserting past it fails with
//! [`Error::TableFull`](crate::Error::TableFull).
//!
//! Slot 0 is never assigned, so a zero marker always means "free" and the
//! marker of a used slot doubles as a cheap first equality check before
//! comparing strings.
//!
//! Lookups do not lock. Inserts are serialized by a write lock. Slots only
//! ever go from free to used, so a published slot never changes again.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};
use tracing::{debug, error};

/// Smallest capacity the double-hash step can work with
pub const MIN_CAPACITY: usize = 3;

/// Largest capacity a table may be created with
pub const MAX_CAPACITY: usize = 1 << 20;

const HASH_SEED: u64 = 5381;

/// Primary string hash, never zero
///
/// `r = r * 33 + byte`, seeded with 5381.
pub fn primary_hash(key: &str) -> u64 {
    let hash = key.bytes().fold(HASH_SEED, |r, b| {
        (r << 5).wrapping_add(r).wrapping_add(u64::from(b))
    });
    hash.max(1)
}

/// Round a requested capacity up to the next odd prime (at least 3)
pub fn next_prime_capacity(requested: usize) -> usize {
    let mut n = requested.max(MIN_CAPACITY) | 1;
    while !is_odd_prime(n) {
        n += 2;
    }
    n
}

/// Trial division, only called with odd numbers
fn is_odd_prime(n: usize) -> bool {
    let mut divider = 3;
    while divider <= n / divider {
        if n % divider == 0 {
            return false;
        }
        divider += 2;
    }
    true
}

struct InternSlot {
    /// 0 = free, otherwise the primary hash of `value`
    marker: AtomicU64,
    value: OnceLock<String>,
}

impl InternSlot {
    fn empty() -> Self {
        Self {
            marker: AtomicU64::new(0),
            value: OnceLock::new(),
        }
    }

    fn is_free(&self) -> bool {
        self.marker.load(Ordering::Acquire) == 0
    }

    fn holds(&self, key: &str, hash: u64) -> bool {
        self.marker.load(Ordering::Acquire) == hash
            && self.value.get().is_some_and(|value| value == key)
    }
}

enum Probe {
    Found(usize),
    Vacant(usize),
    Exhausted,
}

/// Fixed-capacity string interning table
pub struct InternTable {
    slots: Box<[InternSlot]>,
    capacity: usize,
    filled: AtomicUsize,
    write_lock: Mutex<()>,
}

impl InternTable {
    /// Create a table holding at least `requested` strings
    pub fn with_capacity(requested: usize) -> crate::Result<Self> {
        if requested > MAX_CAPACITY {
            return Err(crate::Error::Allocation(format!(
                "hash table of {} entries exceeds the {} entry limit",
                requested, MAX_CAPACITY
            )));
        }

        let capacity = next_prime_capacity(requested);

        let mut slots = Vec::new();
        slots.try_reserve_exact(capacity + 1).map_err(|e| {
            crate::Error::Allocation(format!("could not allocate space for hash table: {}", e))
        })?;
        slots.extend((0..=capacity).map(|_| InternSlot::empty()));

        debug!("using {} entries hash table", capacity);

        Ok(Self {
            slots: slots.into_boxed_slice(),
            capacity,
            filled: AtomicUsize::new(0),
            write_lock: Mutex::new(()),
        })
    }

    /// Number of strings the table can hold
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of strings stored
    pub fn len(&self) -> usize {
        self.filled.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Index of `key`, allocating a slot for it if it is new
    ///
    /// The returned index is in `1..=capacity` and stays the same for the
    /// lifetime of the table.
    pub fn find_or_insert(&self, key: &str) -> crate::Result<usize> {
        let hash = primary_hash(key);

        loop {
            match self.probe(key, hash) {
                Probe::Found(index) => return Ok(index),
                Probe::Vacant(index) => {
                    if let Some(index) = self.insert_at(index, key, hash)? {
                        return Ok(index);
                    }
                    // Another writer took the slot first; probe again
                }
                Probe::Exhausted => {
                    error!("hash table is full ({} entries)", self.capacity);
                    return Err(crate::Error::TableFull {
                        capacity: self.capacity,
                    });
                }
            }
        }
    }

    /// Index of `key` if it has been inserted
    pub fn get(&self, key: &str) -> Option<usize> {
        match self.probe(key, primary_hash(key)) {
            Probe::Found(index) => Some(index),
            Probe::Vacant(_) | Probe::Exhausted => None,
        }
    }

    /// Copy of the string stored at `index`
    pub fn resolve(&self, index: usize) -> Option<String> {
        if index == 0 {
            return None;
        }
        let slot = self.slots.get(index)?;
        if slot.is_free() {
            return None;
        }
        slot.value.get().cloned()
    }

    fn start_index(&self, hash: u64) -> usize {
        match (hash % self.capacity as u64) as usize {
            0 => 1,
            index => index,
        }
    }

    fn probe(&self, key: &str, hash: u64) -> Probe {
        let start = self.start_index(hash);
        let slot = &self.slots[start];

        if slot.is_free() {
            return Probe::Vacant(start);
        }
        if slot.holds(key, hash) {
            return Probe::Found(start);
        }
        debug!(
            "hash collision ('{}' vs '{}')",
            key,
            slot.value.get().map(String::as_str).unwrap_or_default()
        );

        // Second hash; with a prime capacity the walk visits every slot
        let step = 1 + (hash % (self.capacity as u64 - 2)) as usize;
        let mut index = start;
        loop {
            index = if index <= step {
                self.capacity + index - step
            } else {
                index - step
            };

            if index == start {
                return Probe::Exhausted;
            }

            let slot = &self.slots[index];
            if slot.is_free() {
                return Probe::Vacant(index);
            }
            if slot.holds(key, hash) {
                return Probe::Found(index);
            }
        }
    }

    /// Claim a free slot; Ok(None) means the slot was taken meanwhile
    fn insert_at(&self, index: usize, key: &str, hash: u64) -> crate::Result<Option<usize>> {
        if self.filled.load(Ordering::Acquire) >= self.capacity {
            error!("hash table is full ({} entries)", self.capacity);
            return Err(crate::Error::TableFull {
                capacity: self.capacity,
            });
        }

        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let slot = &self.slots[index];
        if !slot.is_free() {
            return Ok(None);
        }

        // The value is only ever set here, under the write lock, before the
        // marker is published
        let _ = slot.value.set(key.to_owned());
        slot.marker.store(hash, Ordering::Release);
        self.filled.fetch_add(1, Ordering::AcqRel);

        Ok(Some(index))
    }
}
