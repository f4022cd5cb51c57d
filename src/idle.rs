use crossbeam_channel::{self as channel, Receiver, Sender, TryRecvError};
use std::fmt;

/// Outcome of a non-blocking pop from the idle buffer.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Popped<R> {
  /// An idle resource was available.
  Item(R),
  /// The buffer is empty but still accepts resources.
  Empty,
  /// The buffer has been finalized and fully drained.
  Finalized,
}

/// A fixed-capacity buffer of idle resources.
///
/// Built on a bounded `crossbeam_channel`, which gives lock-free `try_send` and
/// `try_recv` from any thread. Dropping the only sender finalizes the buffer:
/// items already inside stay poppable, and once they are gone every pop reports
/// [`Popped::Finalized`].
#[derive(Debug)]
pub(crate) struct IdleBuffer<R> {
  tx: Sender<R>,
  rx: Receiver<R>,
  capacity: usize,
}

impl<R> IdleBuffer<R> {
  /// Creates an empty buffer holding at most `capacity` resources.
  pub(crate) fn new(capacity: usize) -> Self {
    let (tx, rx) = channel::bounded(capacity);
    Self { tx, rx, capacity }
  }

  /// Splits the buffer into its producer and consumer halves.
  pub(crate) fn split(self) -> (IdleProducer<R>, IdleConsumer<R>) {
    (
      IdleProducer { tx: self.tx },
      IdleConsumer {
        rx: self.rx,
        capacity: self.capacity,
      },
    )
  }
}

/// The single producer half. Dropping it finalizes the buffer.
pub(crate) struct IdleProducer<R> {
  tx: Sender<R>,
}

impl<R> fmt::Debug for IdleProducer<R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("IdleProducer")
      .field("len", &self.tx.len())
      .finish_non_exhaustive()
  }
}

impl<R> IdleProducer<R> {
  /// Places a resource into the buffer without blocking.
  ///
  /// Hands the resource back when the buffer is full.
  pub(crate) fn try_push(&self, resource: R) -> Result<(), R> {
    self.tx.try_send(resource).map_err(|e| e.into_inner())
  }

  /// Finalizes the buffer. No further resources can be pushed.
  pub(crate) fn finalize(self) {
    drop(self.tx);
  }
}

/// The consumer half, shared by every acquirer.
pub(crate) struct IdleConsumer<R> {
  rx: Receiver<R>,
  capacity: usize,
}

impl<R> fmt::Debug for IdleConsumer<R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("IdleConsumer")
      .field("len", &self.rx.len())
      .field("capacity", &self.capacity)
      .finish_non_exhaustive()
  }
}

impl<R> IdleConsumer<R> {
  /// Removes one idle resource without blocking.
  pub(crate) fn try_pop(&self) -> Popped<R> {
    match self.rx.try_recv() {
      Ok(resource) => Popped::Item(resource),
      Err(TryRecvError::Empty) => Popped::Empty,
      Err(TryRecvError::Disconnected) => Popped::Finalized,
    }
  }

  /// Pops every resource currently in the buffer.
  pub(crate) fn drain(&self) -> impl Iterator<Item = R> + '_ {
    self.rx.try_iter()
  }

  pub(crate) fn len(&self) -> usize {
    self.rx.len()
  }

  pub(crate) fn capacity(&self) -> usize {
    self.capacity
  }
}
