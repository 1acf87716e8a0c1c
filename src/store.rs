use bytes::Bytes;
use num_traits::{CheckedAdd, Zero};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error as ThisError;
use tracing::debug;

pub type Key = Bytes;

/// Milliseconds since the unix epoch.
pub type Timestamp = u64;

type Clock = Box<dyn Fn() -> Timestamp + Send>;

#[derive(Debug, ThisError, PartialEq)]
pub enum StoreError {
    #[error("store is at capacity")]
    Capacity,
    #[error("operation against a key holding the wrong kind of value")]
    WrongType,
    #[error("key does not exist")]
    NotFound,
    #[error("value is not an integer")]
    NotAnInteger,
    #[error("increment would overflow")]
    Overflow,
    #[error("decrement would underflow")]
    Underflow,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Data {
    String(Bytes),
    List(VecDeque<Bytes>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Value {
    pub data: Data,
    pub expires_at: Option<Timestamp>,
}

impl Value {
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum End {
    Front,
    Back,
}

/// The Store holds at most `capacity` keys, each optionally expiring at an absolute wall-clock
/// time. Expired keys are dropped lazily whenever they are touched and in bulk by
/// [`Store::remove_expired_keys`].
///
/// The store is owned by the single thread running the server loop and is never locked. Sharing
/// it between threads would need it wrapped in a `Mutex`.
pub struct Store {
    keys: HashMap<Key, Value>,
    // Ordered by expiry, so the next key to expire is always first.
    ttls: BTreeSet<(Timestamp, Key)>,
    capacity: usize,
    clock: Clock,
}

impl Store {
    pub fn new(capacity: usize) -> Store {
        Store::with_clock(capacity, unix_millis)
    }

    pub fn with_clock(capacity: usize, clock: impl Fn() -> Timestamp + Send + 'static) -> Store {
        Store {
            keys: HashMap::new(),
            ttls: BTreeSet::new(),
            capacity,
            clock: Box::new(clock),
        }
    }

    pub fn now(&self) -> Timestamp {
        (self.clock)()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of keys held, including expired keys not yet removed.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Stores a string value, replacing whatever `key` held before along with its expiry.
    pub fn set(
        &mut self,
        key: Key,
        data: Bytes,
        expires_at: Option<Timestamp>,
    ) -> Result<(), StoreError> {
        self.insert(
            key,
            Value {
                data: Data::String(data),
                expires_at,
            },
        )
    }

    /// Inserts a value. A new key is only admitted while the store is below capacity; nothing is
    /// modified when it is refused.
    pub fn insert(&mut self, key: Key, value: Value) -> Result<(), StoreError> {
        let now = self.now();
        self.expire_if_needed(&key, now);
        self.reserve(&key)?;

        if let Some(old) = self.keys.remove(&key) {
            self.forget_ttl(&key, &old);
        }
        if let Some(expires_at) = value.expires_at {
            self.ttls.insert((expires_at, key.clone()));
        }
        self.keys.insert(key, value);

        Ok(())
    }

    pub fn get(&mut self, key: &[u8]) -> Option<&Value> {
        let now = self.now();
        self.expire_if_needed(key, now);
        self.keys.get(key)
    }

    pub fn exists(&mut self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&mut self, key: &[u8]) -> Option<Value> {
        let now = self.now();
        self.expire_if_needed(key, now);

        let value = self.keys.remove(key)?;
        self.forget_ttl(key, &value);
        Some(value)
    }

    /// Adds `increment` to the integer held at `key`, keeping its expiry. The key must already
    /// exist and hold the decimal representation of a `T`.
    pub fn incr_by<T>(&mut self, key: &[u8], increment: T) -> Result<T, StoreError>
    where
        T: FromStr + ToString + CheckedAdd + Zero + PartialOrd,
    {
        let now = self.now();
        self.expire_if_needed(key, now);

        let value = self.keys.get_mut(key).ok_or(StoreError::NotFound)?;
        let Data::String(data) = &value.data else {
            return Err(StoreError::WrongType);
        };

        let current = std::str::from_utf8(data)
            .ok()
            .and_then(|s| s.parse::<T>().ok())
            .ok_or(StoreError::NotAnInteger)?;

        let Some(updated) = current.checked_add(&increment) else {
            return Err(if increment < T::zero() {
                StoreError::Underflow
            } else {
                StoreError::Overflow
            });
        };

        value.data = Data::String(Bytes::from(updated.to_string()));
        Ok(updated)
    }

    /// Pushes `items` one at a time onto the given end of the list at `key`, creating the list
    /// when the key is absent. Returns the resulting list length.
    pub fn push(
        &mut self,
        key: Key,
        items: impl IntoIterator<Item = Bytes>,
        end: End,
    ) -> Result<usize, StoreError> {
        let now = self.now();
        self.expire_if_needed(&key, now);

        if !self.keys.contains_key(&key) {
            self.reserve(&key)?;
            let value = Value {
                data: Data::List(VecDeque::new()),
                expires_at: None,
            };
            self.keys.insert(key.clone(), value);
        }

        let Some(Value {
            data: Data::List(list),
            ..
        }) = self.keys.get_mut(&key)
        else {
            return Err(StoreError::WrongType);
        };

        for item in items {
            match end {
                End::Front => list.push_front(item),
                End::Back => list.push_back(item),
            }
        }

        Ok(list.len())
    }

    /// Removes every key whose expiry has passed. Returns how many were removed.
    pub fn remove_expired_keys(&mut self) -> usize {
        let now = self.now();

        let expired: Vec<(Timestamp, Key)> = self
            .ttls
            .iter()
            .take_while(|(expires_at, _)| *expires_at <= now)
            .cloned()
            .collect();

        for (when, key) in &expired {
            self.keys.remove(key);
            self.ttls.remove(&(*when, key.clone()));
        }

        if !expired.is_empty() {
            debug!("Removed {} expired keys", expired.len());
        }

        expired.len()
    }

    /// Live entries, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&Key, &Value)> {
        let now = self.now();
        self.keys
            .iter()
            .filter(move |(_, value)| !value.is_expired(now))
    }

    /// Keys carrying an expiry, soonest first.
    pub fn expiring(&self) -> impl Iterator<Item = &Key> {
        self.ttls.iter().map(|(_, key)| key)
    }

    fn reserve(&mut self, key: &[u8]) -> Result<(), StoreError> {
        if self.keys.contains_key(key) || self.keys.len() < self.capacity {
            return Ok(());
        }

        // Expired keys still occupy a slot until swept.
        self.remove_expired_keys();

        if self.keys.len() < self.capacity {
            Ok(())
        } else {
            Err(StoreError::Capacity)
        }
    }

    fn expire_if_needed(&mut self, key: &[u8], now: Timestamp) {
        let expired = self
            .keys
            .get(key)
            .is_some_and(|value| value.is_expired(now));

        if expired {
            if let Some(value) = self.keys.remove(key) {
                self.forget_ttl(key, &value);
            }
        }
    }

    fn forget_ttl(&mut self, key: &[u8], value: &Value) {
        if let Some(expires_at) = value.expires_at {
            self.ttls
                .remove(&(expires_at, Bytes::copy_from_slice(key)));
        }
    }
}

pub fn unix_millis() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as Timestamp)
        .unwrap_or(0)
}
