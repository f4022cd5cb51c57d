use crate::error::PoolError;
use crate::idle::{IdleBuffer, IdleConsumer, IdleProducer, Popped};
use crate::resource::Closer;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

/// The factory a pool invokes on every acquire miss.
pub type ResourceFactory<R, E> = Box<dyn Fn() -> Result<R, E> + Send + Sync + 'static>;

/// A bounded pool of reusable, closable resources.
///
/// `capacity` bounds only the idle buffer. Resources checked out of the pool are
/// not counted, so bursts above capacity are served by the factory and the
/// surplus is closed when it comes back. `acquire` never waits and `release`
/// never blocks on capacity.
///
/// `release` and `close` serialize on one mutex that owns the producer half of
/// the idle buffer. `acquire` only touches the consumer half, which is lock-free.
pub struct ResourcePool<R: Closer, E> {
  pool_name: Arc<String>,
  factory: ResourceFactory<R, E>,
  idle: IdleConsumer<R>,
  producer: Mutex<Option<IdleProducer<R>>>,
  closed: AtomicBool,
}

impl<R: Closer, E> fmt::Debug for ResourcePool<R, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ResourcePool")
      .field("pool_name", &self.pool_name)
      .field("capacity", &self.idle.capacity())
      .field("idle", &self.idle.len())
      .field("closed", &self.is_closed())
      .finish_non_exhaustive()
  }
}

impl<R: Closer, E> ResourcePool<R, E> {
  /// Creates a pool whose idle buffer holds at most `capacity` resources.
  ///
  /// # Errors
  /// Returns `PoolError::InvalidCapacity` if `capacity` is zero.
  pub fn new<F>(pool_name: &str, capacity: usize, factory: F) -> Result<Arc<Self>, PoolError<E>>
  where
    F: Fn() -> Result<R, E> + Send + Sync + 'static,
  {
    if capacity == 0 {
      warn!(pool_name, "Refusing to create a resource pool with zero capacity.");
      return Err(PoolError::InvalidCapacity(capacity));
    }

    let (producer, consumer) = IdleBuffer::new(capacity).split();
    debug!(pool_name, capacity, "Resource pool created.");

    Ok(Arc::new(Self {
      pool_name: Arc::new(pool_name.to_string()),
      factory: Box::new(factory),
      idle: consumer,
      producer: Mutex::new(Some(producer)),
      closed: AtomicBool::new(false),
    }))
  }

  pub fn name(&self) -> &str {
    &self.pool_name
  }

  pub fn capacity(&self) -> usize {
    self.idle.capacity()
  }

  /// Returns the number of resources currently waiting in the idle buffer.
  pub fn idle_count(&self) -> usize {
    self.idle.len()
  }

  pub fn is_closed(&self) -> bool {
    self.closed.load(Ordering::Acquire)
  }

  /// Takes an idle resource, or creates a new one when none is available.
  ///
  /// The factory runs on the calling thread with no pool lock held.
  ///
  /// # Errors
  /// Returns `PoolError::PoolClosed` if the pool was closed and has no idle
  /// resources left, or `PoolError::Creation` with the factory's error on a miss.
  pub fn acquire(&self) -> Result<R, PoolError<E>> {
    match self.idle.try_pop() {
      Popped::Item(resource) => {
        debug!(pool_name = %self.pool_name, "Acquire: shared resource.");
        Ok(resource)
      }
      Popped::Finalized => {
        debug!(pool_name = %self.pool_name, "Acquire: pool is closed and drained.");
        Err(PoolError::PoolClosed)
      }
      Popped::Empty => {
        debug!(pool_name = %self.pool_name, "Acquire: new resource.");
        (self.factory)().map_err(PoolError::Creation)
      }
    }
  }

  /// Returns a resource to the pool.
  ///
  /// The resource is kept if the pool is open and the idle buffer has room;
  /// otherwise it is closed. Close failures are logged and swallowed.
  pub fn release(&self, resource: R) {
    let rejected = {
      let guard = self.producer.lock();
      match guard.as_ref() {
        None => {
          debug!(pool_name = %self.pool_name, "Release: pool closed, closing resource.");
          Some(resource)
        }
        Some(producer) => match producer.try_push(resource) {
          Ok(()) => {
            debug!(pool_name = %self.pool_name, "Release: in queue.");
            None
          }
          Err(resource) => {
            debug!(pool_name = %self.pool_name, "Release: idle buffer full, closing resource.");
            Some(resource)
          }
        },
      }
    };

    // The enqueue-or-discard decision is made under the lock. Closing is not.
    if let Some(resource) = rejected {
      self.discard(resource);
    }
  }

  /// Shuts the pool down and closes every idle resource.
  ///
  /// Idempotent: only the first call finalizes and drains the idle buffer, and
  /// later or concurrent calls return once that is done. Checked-out resources
  /// are closed by whoever releases them afterwards.
  pub fn close(&self) {
    let mut guard = self.producer.lock();
    let Some(producer) = guard.take() else {
      trace!(pool_name = %self.pool_name, "Close: pool already closed.");
      return;
    };

    info!(pool_name = %self.pool_name, "Closing resource pool.");
    self.closed.store(true, Ordering::Release);

    // Finalize before draining so the drain terminates.
    producer.finalize();

    let mut drained = 0usize;
    for resource in self.idle.drain() {
      self.discard(resource);
      drained += 1;
    }
    drop(guard);

    info!(pool_name = %self.pool_name, drained, "Resource pool closed.");
  }

  fn discard(&self, resource: R) {
    if let Err(close_error) = resource.close() {
      warn!(pool_name = %self.pool_name, error = %close_error, "Failed to close discarded resource.");
    }
  }
}

impl<R: Closer, E> Drop for ResourcePool<R, E> {
  fn drop(&mut self) {
    if !self.is_closed() {
      info!(
        pool_name = %*self.pool_name,
        "ResourcePool dropped without an explicit close. Closing idle resources."
      );
      self.close();
    }
  }
}
