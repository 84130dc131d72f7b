//! Concurrent, per-key/per-type storage with reader-counted/writer-intent
//! locks — the "closeable reader lock" pattern.
//!
//! Values and lock words live in [`PagedList`]s so their addresses are
//! stable: once a key is registered its slot never moves, which is what
//! lets readers `load`/`fetch_add` directly against the lock word without
//! going through a hash lookup on every access.

use crate::error::{NavError, Result};
use crate::paged::PagedList;
use dashmap::DashMap;
use std::any::{Any, TypeId};
use std::hash::Hash;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::RwLock;

const WRITE_INTENT: i32 = 1 << 30;
const WRITE_LOCK: i32 = i32::MIN;
const READER_MASK: i32 = 0x3FFF_FFFF;

/// Per-type storage column: one value slot and one lock word per registered
/// key index.
struct Column<T> {
    values: PagedList<T>,
    locks: PagedList<AtomicI32>,
}

/// Type-erased handle to a [`Column<T>`], downcast by `acquire_*`.
trait AnyColumn: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn extend_to(&mut self, len: usize);
}

impl<T: Default + Send + Sync + 'static> AnyColumn for Column<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn extend_to(&mut self, len: usize) {
        if self.values.len() < len {
            self.values.resize(len);
        }
        if self.locks.len() < len {
            self.locks.resize(len);
        }
    }
}

/// A scoped read handle. Releases the reader count on drop.
pub struct ReadHandle<'a, T> {
    value: &'a T,
    lock: &'a AtomicI32,
}

impl<T> std::ops::Deref for ReadHandle<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.value
    }
}

impl<T> Drop for ReadHandle<'_, T> {
    fn drop(&mut self) {
        self.lock.fetch_sub(1, Ordering::Release);
    }
}

/// A scoped write handle, acquired with `WRITE_INTENT` already held and
/// promoted to `WRITE_LOCK` before being handed to the caller. Releases the
/// exclusive lock on drop.
pub struct WriteHandle<'a, T> {
    value: &'a mut T,
    lock: &'a AtomicI32,
}

impl<T> std::ops::Deref for WriteHandle<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.value
    }
}

impl<T> std::ops::DerefMut for WriteHandle<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.value
    }
}

impl<T> Drop for WriteHandle<'_, T> {
    fn drop(&mut self) {
        self.lock.store(0, Ordering::Release);
    }
}

/// Storage keyed by `K`, with one independently-locked value per registered
/// type `T`.
///
/// `register_type`/`register_key` are expected to be called from a single
/// coordinator thread (structural mutation); `acquire_read`/`acquire_write`
/// are safe to call concurrently from any thread once registration has
/// happened-before.
pub struct Registry<K> {
    keys: DashMap<K, usize>,
    columns: RwLock<std::collections::HashMap<TypeId, Box<dyn AnyColumn>>>,
    next_index: std::sync::atomic::AtomicUsize,
}

impl<K: Eq + Hash + Clone> Default for Registry<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone> Registry<K> {
    pub fn new() -> Self {
        Self {
            keys: DashMap::new(),
            columns: RwLock::new(std::collections::HashMap::new()),
            next_index: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Reserves storage for type `T`. Idempotent; a prior registration of a
    /// different `T` sharing the same `TypeId` is impossible in safe Rust, so
    /// the only practical `TypeMismatch` source is calling this generically
    /// behind type erasure at a different size — kept for API symmetry with
    /// the spec's contract.
    pub fn register_type<T: Default + Send + Sync + 'static>(&self) -> Result<()> {
        let type_id = TypeId::of::<T>();
        let mut columns = self.columns.write().unwrap();
        if let Some(existing) = columns.get(&type_id) {
            if existing.as_any().downcast_ref::<Column<T>>().is_none() {
                return Err(NavError::TypeMismatch {
                    expected: std::mem::size_of::<T>(),
                    actual: 0,
                });
            }
            return Ok(());
        }
        let len = self.next_index.load(Ordering::Acquire);
        let mut values = PagedList::<T>::new();
        let mut locks = PagedList::<AtomicI32>::new();
        values.resize(len);
        locks.resize(len);
        columns.insert(type_id, Box::new(Column { values, locks }));
        Ok(())
    }

    /// Idempotently assigns (or returns) the stable index for `key`,
    /// extending every registered type's columns to cover it.
    pub fn register_key(&self, key: K) -> usize {
        if let Some(existing) = self.keys.get(&key) {
            return *existing;
        }
        let index = self.next_index.fetch_add(1, Ordering::AcqRel);
        let mut columns = self.columns.write().unwrap();
        for column in columns.values_mut() {
            column.extend_to(index + 1);
        }
        *self.keys.entry(key).or_insert(index)
    }

    pub fn try_get_index(&self, key: &K) -> Option<usize> {
        self.keys.get(key).map(|i| *i)
    }

    fn with_column<T: Default + Send + Sync + 'static, R>(
        &self,
        f: impl FnOnce(&Column<T>) -> Result<R>,
    ) -> Result<R> {
        let columns = self.columns.read().unwrap();
        let column = columns
            .get(&TypeId::of::<T>())
            .ok_or(NavError::KeyNotFound)?;
        let column = column
            .as_any()
            .downcast_ref::<Column<T>>()
            .ok_or(NavError::TypeMismatch { expected: 0, actual: 0 })?;
        f(column)
    }

    pub fn acquire_read<T: Default + Send + Sync + 'static>(
        &self,
        key: &K,
    ) -> Result<ReadHandle<'_, T>> {
        let index = self.try_get_index(key).ok_or(NavError::KeyNotFound)?;
        self.acquire_read_at(index)
    }

    pub fn acquire_read_at<T: Default + Send + Sync + 'static>(
        &self,
        index: usize,
    ) -> Result<ReadHandle<'_, T>> {
        self.with_column::<T, _>(|column| {
            let lock = column.locks.get(index).ok_or(NavError::KeyNotFound)?;
            loop {
                let w = lock.load(Ordering::Acquire);
                if w & (WRITE_INTENT | WRITE_LOCK) != 0 {
                    return Err(NavError::Inaccessible);
                }
                if lock
                    .compare_exchange_weak(w, w + 1, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    break;
                }
            }
            let value = column.values.get(index).ok_or(NavError::KeyNotFound)?;
            // SAFETY: extend the column's lifetime to `&self`'s; `value`'s
            // address is stable (PagedList never moves existing elements)
            // and the lock word just incremented guards against concurrent
            // writers for as long as this handle lives.
            let value: &T = unsafe { &*(value as *const T) };
            let lock: &AtomicI32 = unsafe { &*(lock as *const AtomicI32) };
            Ok(ReadHandle { value, lock })
        })
    }

    /// Acquires `WRITE_INTENT` then polls for readers to drain before
    /// promoting to `WRITE_LOCK`, retrying up to `max_spins` times. Returns
    /// [`NavError::RaceAborted`] if readers never drain within the bound.
    pub fn acquire_write<T: Default + Send + Sync + 'static>(
        &self,
        key: &K,
        max_spins: u32,
    ) -> Result<WriteHandle<'_, T>> {
        let index = self.try_get_index(key).ok_or(NavError::KeyNotFound)?;
        self.acquire_write_at(index, max_spins)
    }

    pub fn acquire_write_at<T: Default + Send + Sync + 'static>(
        &self,
        index: usize,
        max_spins: u32,
    ) -> Result<WriteHandle<'_, T>> {
        self.with_column::<T, _>(|column| {
            let lock = column.locks.get(index).ok_or(NavError::KeyNotFound)?;

            let w = lock.load(Ordering::Acquire);
            if w & (WRITE_INTENT | WRITE_LOCK) != 0 {
                return Err(NavError::Inaccessible);
            }
            lock.compare_exchange(w, w | WRITE_INTENT, Ordering::AcqRel, Ordering::Acquire)
                .map_err(|_| NavError::Inaccessible)?;

            let mut spins = 0;
            loop {
                match lock.compare_exchange(
                    WRITE_INTENT,
                    WRITE_LOCK,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => break,
                    Err(_) if spins < max_spins => {
                        spins += 1;
                        std::hint::spin_loop();
                    }
                    Err(_) => {
                        lock.fetch_and(!WRITE_INTENT, Ordering::AcqRel);
                        return Err(NavError::RaceAborted);
                    }
                }
            }

            // SAFETY: WRITE_LOCK just succeeded via CAS from exactly
            // WRITE_INTENT, meaning the reader count observed was zero and
            // no new reader can succeed AcquireRead until this handle drops
            // and clears the word — so this is the sole live reference.
            let value_ptr = unsafe { column.values.get_unchecked_mut(index) };
            let value: &mut T = unsafe { &mut *value_ptr };
            let lock: &AtomicI32 = unsafe { &*(lock as *const AtomicI32) };
            Ok(WriteHandle { value, lock })
        })
    }
}

#[allow(dead_code)]
fn reader_count(word: i32) -> i32 {
    word & READER_MASK
}
