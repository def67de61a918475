//! Random identifier allocation
//!
//! Identifiers are sampled uniformly from `[0, 10^digits)` until one is found
//! that is not a key of the target map. The check and the insert happen under
//! the map shard's write lock, so two concurrent allocations can never claim
//! the same identifier.
//!
//! With the default 8 digits the space holds 10^8 values and a collision is
//! rare until the registry is close to full. As it fills up, the expected
//! number of samples grows as `1 / (1 - load)`; `max_attempts` bounds the
//! worst case and turns it into an `AllocationExhausted` error.

use crate::RendezvousError;
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use rand::Rng;
use rendezvous_proto::{Identifier, DEFAULT_ID_DIGITS};
use tracing::trace;

/// Largest digit width whose space `10^digits` fits in a `u64`
const MAX_DIGITS: u32 = 19;

/// Identifier allocator configuration
#[derive(Debug, Clone)]
pub struct AllocatorConfig {
    /// Decimal digit width of the identifier space
    pub digits: u32,
    /// Samples tried per allocation before giving up
    pub max_attempts: u32,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            digits: DEFAULT_ID_DIGITS,
            max_attempts: 1024,
        }
    }
}

/// Collision-free identifier allocator
#[derive(Debug, Clone)]
pub struct IdAllocator {
    digits: u32,
    space: u64,
    max_attempts: u32,
}

impl IdAllocator {
    /// Validate the configuration
    ///
    /// A zero digit width would leave nothing to sample from, so it is
    /// rejected here instead of spinning at allocation time.
    pub fn new(config: AllocatorConfig) -> Result<Self, RendezvousError> {
        if config.digits == 0 || config.digits > MAX_DIGITS {
            return Err(RendezvousError::AllocationExhausted {
                reason: format!(
                    "identifier digit width must be between 1 and {}, got {}",
                    MAX_DIGITS, config.digits
                ),
            });
        }

        if config.max_attempts == 0 {
            return Err(RendezvousError::AllocationExhausted {
                reason: "max_attempts must be at least 1".to_string(),
            });
        }

        Ok(Self {
            digits: config.digits,
            space: 10u64.pow(config.digits),
            max_attempts: config.max_attempts,
        })
    }

    pub fn digits(&self) -> u32 {
        self.digits
    }

    /// Number of distinct identifiers
    pub fn space(&self) -> u64 {
        self.space
    }

    /// Uniform sample from the identifier space (not checked for collisions)
    pub fn sample(&self) -> Identifier {
        Identifier::new(rand::thread_rng().gen_range(0..self.space))
    }

    /// Claim an unused identifier in `map` and insert `make(id)` under it
    pub fn claim<V, F>(&self, map: &DashMap<Identifier, V>, make: F) -> Result<V, RendezvousError>
    where
        V: Clone,
        F: FnOnce(Identifier) -> V,
    {
        for attempt in 1..=self.max_attempts {
            let id = self.sample();

            match map.entry(id) {
                MapEntry::Vacant(slot) => {
                    let value = make(id);
                    slot.insert(value.clone());
                    return Ok(value);
                }
                MapEntry::Occupied(_) => {
                    trace!("Identifier {} already taken (attempt {})", id, attempt);
                }
            }
        }

        Err(RendezvousError::AllocationExhausted {
            reason: format!(
                "no free identifier after {} attempts ({} in use of {})",
                self.max_attempts,
                map.len(),
                self.space
            ),
        })
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self {
            digits: DEFAULT_ID_DIGITS,
            space: 10u64.pow(DEFAULT_ID_DIGITS),
            max_attempts: AllocatorConfig::default().max_attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_digits_rejected() {
        let result = IdAllocator::new(AllocatorConfig {
            digits: 0,
            max_attempts: 10,
        });
        assert!(matches!(
            result,
            Err(RendezvousError::AllocationExhausted { .. })
        ));
    }

    #[test]
    fn test_too_many_digits_rejected() {
        let result = IdAllocator::new(AllocatorConfig {
            digits: 20,
            max_attempts: 10,
        });
        assert!(result.is_err());

        let widest = IdAllocator::new(AllocatorConfig {
            digits: 19,
            max_attempts: 10,
        })
        .unwrap();
        assert_eq!(widest.space(), 10_000_000_000_000_000_000);
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let result = IdAllocator::new(AllocatorConfig {
            digits: 8,
            max_attempts: 0,
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_samples_stay_in_range() {
        let allocator = IdAllocator::new(AllocatorConfig {
            digits: 2,
            max_attempts: 10,
        })
        .unwrap();

        for _ in 0..1000 {
            assert!(allocator.sample().value() < 100);
        }
    }

    #[test]
    fn test_claim_fills_small_space_without_duplicates() {
        let allocator = IdAllocator::new(AllocatorConfig {
            digits: 1,
            max_attempts: 10_000,
        })
        .unwrap();
        let map: DashMap<Identifier, u64> = DashMap::new();

        for _ in 0..10 {
            allocator.claim(&map, |id| id.value()).unwrap();
        }

        assert_eq!(map.len(), 10);
        for entry in map.iter() {
            assert_eq!(entry.key().value(), *entry.value());
        }
    }

    #[test]
    fn test_claim_exhausted_when_full() {
        let allocator = IdAllocator::new(AllocatorConfig {
            digits: 1,
            max_attempts: 50,
        })
        .unwrap();
        let map: DashMap<Identifier, ()> = DashMap::new();
        for value in 0..10 {
            map.insert(Identifier::new(value), ());
        }

        let result = allocator.claim(&map, |_| ());
        assert!(matches!(
            result,
            Err(RendezvousError::AllocationExhausted { .. })
        ));
        assert_eq!(map.len(), 10);
    }

    #[test]
    fn test_identifier_reusable_after_removal() {
        let allocator = IdAllocator::new(AllocatorConfig {
            digits: 1,
            max_attempts: 10_000,
        })
        .unwrap();
        let map: DashMap<Identifier, ()> = DashMap::new();
        for value in 0..10 {
            if value != 3 {
                map.insert(Identifier::new(value), ());
            }
        }

        // Only one slot left
        allocator.claim(&map, |id| assert_eq!(id, Identifier::new(3))).unwrap();
        map.remove(&Identifier::new(3));
        allocator.claim(&map, |id| assert_eq!(id, Identifier::new(3))).unwrap();
    }
}
