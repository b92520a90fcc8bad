//! Thread-safe reusable-object cache.
//!
//! [`ObjectPool`] keeps idle instances of `T` and hands them out again instead
//! of allocating. Three acquisition modes are available:
//!
//! | Method                                        | Empty pool behavior                 |
//! |-----------------------------------------------|-------------------------------------|
//! | [`acquire_or_create`](ObjectPool::acquire_or_create) | Calls the factory              |
//! | [`try_acquire`](ObjectPool::try_acquire)      | Returns `None`                      |
//! | [`acquire_async`](ObjectPool::acquire_async)  | Suspends the task until a release   |
//!
//! Released objects go straight to the oldest live waiter, so two suspended
//! tasks are never woken with the same instance.
//!
//! # Examples
//! ```
//! use spindle_web::pool::ObjectPool;
//! use std::sync::Arc;
//!
//! let pool = Arc::new(ObjectPool::with_prefill(2, || Vec::<u8>::with_capacity(4096)));
//!
//! let mut buffer = pool.acquire_owned();
//! buffer.extend_from_slice(b"hello");
//! buffer.release().unwrap();
//!
//! assert!(buffer.release().is_err()); // second release is refused
//! assert_eq!(pool.idle_count(), 2);
//! ```

use crate::errors::PoolError;
use std::{
    collections::VecDeque,
    fmt,
    ops::{Deref, DerefMut},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tokio::sync::oneshot;

type Factory<T> = Box<dyn Fn() -> T + Send + Sync>;

/// A pool of reusable `T` instances.
pub struct ObjectPool<T> {
    state: Mutex<PoolState<T>>,
    factory: Factory<T>,
}

struct PoolState<T> {
    idle: Vec<T>,
    waiters: VecDeque<oneshot::Sender<T>>,
}

impl<T> ObjectPool<T> {
    /// Creates an empty pool that builds new instances with `factory`.
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                waiters: VecDeque::new(),
            }),
            factory: Box::new(factory),
        }
    }

    /// Creates a pool holding `count` instances produced by `factory`.
    ///
    /// The factory is called `count` times, one after another, before the
    /// pool is returned.
    pub fn with_prefill<F>(count: usize, factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let pool = Self::new(factory);
        pool.prefill(count);
        pool
    }

    /// Adds `count` freshly created instances to the idle set.
    pub fn prefill(&self, count: usize) {
        for _ in 0..count {
            let value = (self.factory)();
            self.lock().idle.push(value);
        }
    }

    /// Returns an idle instance, or a new one from the factory.
    #[inline]
    pub fn acquire_or_create(&self) -> T {
        match self.try_acquire() {
            Some(value) => value,
            None => (self.factory)(),
        }
    }

    /// Returns an idle instance without waiting.
    #[inline]
    pub fn try_acquire(&self) -> Option<T> {
        self.lock().idle.pop()
    }

    /// Returns an idle instance, suspending the calling task until another
    /// task releases one when the pool is empty.
    ///
    /// Dropping the returned future before completion gives any instance that
    /// was already handed to it back to the pool.
    pub async fn acquire_async(&self) -> T {
        let receiver = {
            let mut state = self.lock();
            if let Some(value) = state.idle.pop() {
                return value;
            }

            let (sender, receiver) = oneshot::channel();
            state.waiters.push_back(sender);
            receiver
        };

        let mut waiter = Waiter {
            pool: self,
            receiver: Some(receiver),
        };

        let result = match waiter.receiver.as_mut() {
            Some(receiver) => receiver.await.ok(),
            None => None,
        };
        waiter.receiver = None;

        // The sender only disappears together with the pool.
        result.unwrap_or_else(|| (self.factory)())
    }

    /// Returns `value` to the pool, waking the oldest waiter if there is one.
    pub fn release(&self, value: T) {
        let mut value = value;
        let mut state = self.lock();

        while let Some(waiter) = state.waiters.pop_front() {
            match waiter.send(value) {
                Ok(()) => return,
                Err(returned) => value = returned,
            }
        }

        state.idle.push(value);
    }

    /// Async flavor of [`release`](Self::release). Never suspends.
    pub async fn release_async(&self, value: T) {
        self.release(value);
    }

    /// Number of instances currently idle in the pool.
    pub fn idle_count(&self) -> usize {
        self.lock().idle.len()
    }

    /// Number of tasks suspended in [`acquire_async`](Self::acquire_async).
    pub fn waiter_count(&self) -> usize {
        self.lock()
            .waiters
            .iter()
            .filter(|waiter| !waiter.is_closed())
            .count()
    }

    #[inline]
    fn lock(&self) -> MutexGuard<'_, PoolState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> ObjectPool<T> {
    /// Like [`acquire_or_create`](Self::acquire_or_create), wrapped in an
    /// owning handle.
    #[inline]
    pub fn acquire_owned(self: &Arc<Self>) -> Pooled<T> {
        Pooled::new(self.acquire_or_create(), self.clone())
    }

    /// Like [`try_acquire`](Self::try_acquire), wrapped in an owning handle.
    #[inline]
    pub fn try_acquire_owned(self: &Arc<Self>) -> Option<Pooled<T>> {
        let value = self.try_acquire()?;
        Some(Pooled::new(value, self.clone()))
    }

    /// Like [`acquire_async`](Self::acquire_async), wrapped in an owning
    /// handle.
    pub async fn acquire_owned_async(self: &Arc<Self>) -> Pooled<T> {
        let value = self.acquire_async().await;
        Pooled::new(value, self.clone())
    }
}

impl<T> fmt::Debug for ObjectPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("ObjectPool")
            .field("idle", &state.idle.len())
            .field("waiters", &state.waiters.len())
            .finish()
    }
}

struct Waiter<'a, T> {
    pool: &'a ObjectPool<T>,
    receiver: Option<oneshot::Receiver<T>>,
}

impl<T> Drop for Waiter<'_, T> {
    fn drop(&mut self) {
        if let Some(mut receiver) = self.receiver.take() {
            receiver.close();
            if let Ok(value) = receiver.try_recv() {
                self.pool.release(value);
            }
        }
    }
}

/// Owning handle over an object drawn from an [`ObjectPool`].
///
/// The object goes back to the pool exactly once: on an explicit
/// [`release`](Pooled::release) or, failing that, when the handle is dropped.
///
/// # Panics
/// Dereferencing a released handle panics with
/// `pooled object used after release`.
pub struct Pooled<T> {
    value: Option<T>,
    pool: Arc<ObjectPool<T>>,
}

impl<T> Pooled<T> {
    #[inline]
    fn new(value: T, pool: Arc<ObjectPool<T>>) -> Self {
        Self {
            value: Some(value),
            pool,
        }
    }

    /// Returns the object to its pool.
    ///
    /// # Errors
    /// [`PoolError::AlreadyReleased`] when called a second time.
    pub fn release(&mut self) -> Result<(), PoolError> {
        let value = self.value.take().ok_or(PoolError::AlreadyReleased)?;
        self.pool.release(value);
        Ok(())
    }

    /// Whether the object has already gone back to the pool.
    #[inline]
    pub fn is_released(&self) -> bool {
        self.value.is_none()
    }
}

impl<T> Deref for Pooled<T> {
    type Target = T;

    #[inline]
    #[track_caller]
    fn deref(&self) -> &T {
        match &self.value {
            Some(value) => value,
            None => panic!("pooled object used after release"),
        }
    }
}

impl<T> DerefMut for Pooled<T> {
    #[inline]
    #[track_caller]
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.value {
            Some(value) => value,
            None => panic!("pooled object used after release"),
        }
    }
}

impl<T> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            self.pool.release(value);
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pooled").field("value", &self.value).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };
    use tokio::{sync::mpsc, time::timeout};

    fn counting_pool(prefill: usize) -> (Arc<ObjectPool<Box<usize>>>, Arc<AtomicUsize>) {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = created.clone();

        let pool = ObjectPool::with_prefill(prefill, move || {
            Box::new(counter.fetch_add(1, Ordering::SeqCst))
        });

        (Arc::new(pool), created)
    }

    #[test]
    fn prefill_is_sequential() {
        let (pool, created) = counting_pool(4);

        assert_eq!(created.load(Ordering::SeqCst), 4);
        assert_eq!(pool.idle_count(), 4);

        let mut seen: Vec<usize> = (0..4).map(|_| *pool.acquire_or_create()).collect();
        seen.sort_unstable();
        assert_eq!(seen, [0, 1, 2, 3]);
    }

    #[test]
    fn acquire_or_create() {
        let (pool, created) = counting_pool(0);

        assert_eq!(pool.try_acquire(), None);
        assert_eq!(*pool.acquire_or_create(), 0);
        assert_eq!(*pool.acquire_or_create(), 1);
        assert_eq!(created.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn release_keeps_identity() {
        let (pool, created) = counting_pool(0);

        let value = pool.acquire_or_create();
        let address = &*value as *const usize;
        pool.release(value);

        let again = pool.try_acquire().unwrap();
        assert_eq!(&*again as *const usize, address);
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn owner_releases_once() {
        let (pool, _) = counting_pool(1);

        let mut owner = pool.acquire_owned();
        assert_eq!(pool.idle_count(), 0);
        assert!(!owner.is_released());

        assert_eq!(owner.release(), Ok(()));
        assert_eq!(pool.idle_count(), 1);
        assert!(owner.is_released());

        assert_eq!(owner.release(), Err(PoolError::AlreadyReleased));
        drop(owner);
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn owner_releases_on_drop() {
        let (pool, _) = counting_pool(1);

        {
            let mut owner = pool.try_acquire_owned().unwrap();
            **owner += 100;
            assert_eq!(pool.try_acquire_owned().map(|_| ()), None);
        }

        assert_eq!(pool.idle_count(), 1);
        assert_eq!(*pool.try_acquire().unwrap(), 100);
    }

    #[test]
    #[should_panic(expected = "pooled object used after release")]
    fn use_after_release() {
        let (pool, _) = counting_pool(1);

        let mut owner = pool.acquire_owned();
        owner.release().unwrap();
        let _value: usize = **owner;
    }

    #[tokio::test]
    async fn acquire_async_idle() {
        let (pool, created) = counting_pool(1);

        assert_eq!(*pool.acquire_async().await, 0);
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn one_release_wakes_one_waiter() {
        let (pool, _) = counting_pool(2);
        let first = pool.try_acquire().unwrap();
        let second = pool.try_acquire().unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        for id in 0..2 {
            let (pool, tx) = (pool.clone(), tx.clone());
            tokio::spawn(async move {
                let value = pool.acquire_async().await;
                let _ = tx.send((id, value));
            });
        }

        while pool.waiter_count() < 2 {
            tokio::task::yield_now().await;
        }

        pool.release(first);
        let (winner, value_a) = rx.recv().await.unwrap();
        assert!(timeout(Duration::from_millis(50), rx.recv()).await.is_err());
        assert_eq!(pool.waiter_count(), 1);

        pool.release(second);
        let (other, value_b) = rx.recv().await.unwrap();

        assert_ne!(winner, other);
        assert_ne!(*value_a, *value_b);
        assert_eq!(pool.idle_count(), 0);
    }

    #[tokio::test]
    async fn release_async_wakes_waiter() {
        let (pool, created) = counting_pool(1);
        let held = pool.try_acquire().unwrap();

        let waiting = {
            let pool = pool.clone();
            tokio::spawn(async move { *pool.acquire_async().await })
        };

        while pool.waiter_count() < 1 {
            tokio::task::yield_now().await;
        }

        pool.release_async(held).await;
        assert_eq!(waiting.await.unwrap(), 0);
        assert_eq!(pool.waiter_count(), 0);
        assert_eq!(pool.idle_count(), 0);

        pool.release_async(Box::new(7)).await;
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_waiter_is_skipped() {
        let (pool, _) = counting_pool(1);
        let value = pool.try_acquire().unwrap();

        let cancelled = timeout(Duration::from_millis(10), pool.acquire_async()).await;
        assert!(cancelled.is_err());
        assert_eq!(pool.waiter_count(), 0);

        pool.release(value);
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn owned_async() {
        let (pool, _) = counting_pool(0);
        let held = pool.acquire_owned();

        let waiting = {
            let pool = pool.clone();
            tokio::spawn(async move {
                let value = pool.acquire_owned_async().await;
                **value
            })
        };

        while pool.waiter_count() < 1 {
            tokio::task::yield_now().await;
        }
        drop(held);

        assert_eq!(waiting.await.unwrap(), 0);
        assert_eq!(pool.idle_count(), 1);
    }
}
