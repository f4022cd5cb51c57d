use std::fmt;

/// A resource that can be handed out by a [`ResourcePool`](crate::ResourcePool).
///
/// The pool calls [`Closer::close`] whenever it discards a resource: on release
/// into a full or closed pool, and when draining idle resources during shutdown.
/// Errors are logged by the pool and never reach the caller of `release`/`close`.
pub trait Closer {
  type Error: fmt::Display;

  fn close(self) -> Result<(), Self::Error>;
}

impl<T: Closer> Closer for Box<T> {
  type Error = T::Error;

  fn close(self) -> Result<(), Self::Error> {
    (*self).close()
  }
}
