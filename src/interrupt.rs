//! Interrupt sources sampled by a [`TaskRunner`](crate::TaskRunner) at task boundaries.
//!
//! Each run registers with its source and gets its own [`InterruptRegistration`].
//! A source fans every interrupt out to all live registrations, so concurrent
//! runs on one source are interrupted independently. A run polls its
//! registration without blocking before every task and deregisters it when it
//! consumes an interrupt or reaches a terminal state. Deregistering one run
//! never disarms another.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle as TokioHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, trace, warn, Instrument};

/// An external cancellation source.
pub trait InterruptSource: Send + Sync + 'static {
  /// Starts listening for interrupts on behalf of one run. Interrupts raised
  /// before this call are not delivered to the returned registration.
  fn register(&self) -> io::Result<InterruptRegistration>;
}

#[derive(Debug, Default)]
struct Slot {
  pending: AtomicBool,
}

#[derive(Default)]
struct HubState {
  slots: Vec<Arc<Slot>>,
  listener: Option<CancellationToken>,
}

/// Fans interrupts out to the live registrations of one source.
#[derive(Default)]
struct InterruptHub {
  state: Mutex<HubState>,
}

impl fmt::Debug for InterruptHub {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = self.state.lock();
    f.debug_struct("InterruptHub")
      .field("registrations", &state.slots.len())
      .field("listening", &state.listener.is_some())
      .finish()
  }
}

impl InterruptHub {
  fn attach(self: &Arc<Self>, state: &mut HubState) -> InterruptRegistration {
    let slot = Arc::new(Slot::default());
    state.slots.push(slot.clone());
    trace!(registrations = state.slots.len(), "Interrupt registration added.");
    InterruptRegistration {
      hub: Some(self.clone()),
      slot,
      active: AtomicBool::new(true),
    }
  }

  fn subscribe(self: &Arc<Self>) -> InterruptRegistration {
    let mut state = self.state.lock();
    self.attach(&mut state)
  }

  /// Registers a run, starting the shared listener first if no run holds it.
  fn subscribe_listening<F>(self: &Arc<Self>, start_listener: F) -> io::Result<InterruptRegistration>
  where
    F: FnOnce(Arc<InterruptHub>) -> io::Result<CancellationToken>,
  {
    let mut state = self.state.lock();
    if state.listener.is_none() {
      state.listener = Some(start_listener(self.clone())?);
    }
    Ok(self.attach(&mut state))
  }

  /// Marks an interrupt pending on every live registration. Returns how many were reached.
  fn deliver(&self) -> usize {
    let state = self.state.lock();
    for slot in &state.slots {
      slot.pending.store(true, Ordering::Release);
    }
    state.slots.len()
  }

  fn detach(&self, slot: &Arc<Slot>) {
    let mut state = self.state.lock();
    state.slots.retain(|live| !Arc::ptr_eq(live, slot));
    slot.pending.store(false, Ordering::Release);

    if state.slots.is_empty() {
      if let Some(token) = state.listener.take() {
        token.cancel();
        debug!("Last interrupt registration gone. Listener stopped; the runtime keeps handling SIGINT, the default disposition is not restored.");
      }
    }
  }

  fn registration_count(&self) -> usize {
    self.state.lock().slots.len()
  }
}

/// One run's view of an [`InterruptSource`].
///
/// Dropping it deregisters.
#[derive(Debug)]
pub struct InterruptRegistration {
  hub: Option<Arc<InterruptHub>>,
  slot: Arc<Slot>,
  active: AtomicBool,
}

impl InterruptRegistration {
  /// A registration no interrupt ever reaches.
  pub fn detached() -> Self {
    Self {
      hub: None,
      slot: Arc::new(Slot::default()),
      active: AtomicBool::new(true),
    }
  }

  /// Returns `true` and clears the pending interrupt if one was delivered to
  /// this registration. Never blocks.
  pub fn try_consume(&self) -> bool {
    self.is_active() && self.slot.pending.swap(false, Ordering::AcqRel)
  }

  /// Stops receiving interrupts and discards any pending one. Idempotent.
  pub fn deregister(&self) {
    if self.active.swap(false, Ordering::AcqRel) {
      match &self.hub {
        Some(hub) => hub.detach(&self.slot),
        None => self.slot.pending.store(false, Ordering::Release),
      }
    }
  }

  pub fn is_active(&self) -> bool {
    self.active.load(Ordering::Acquire)
  }
}

impl Drop for InterruptRegistration {
  fn drop(&mut self) {
    self.deregister();
  }
}

/// A source that never interrupts.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoInterrupt;

impl InterruptSource for NoInterrupt {
  fn register(&self) -> io::Result<InterruptRegistration> {
    Ok(InterruptRegistration::detached())
  }
}

/// An in-process interrupt source driven by [`InterruptTrigger`]s.
#[derive(Debug, Default, Clone)]
pub struct ManualInterrupt {
  hub: Arc<InterruptHub>,
}

/// Raises interrupts on the [`ManualInterrupt`] it was created from.
#[derive(Debug, Clone)]
pub struct InterruptTrigger {
  hub: Arc<InterruptHub>,
}

impl ManualInterrupt {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn trigger(&self) -> InterruptTrigger {
    InterruptTrigger { hub: self.hub.clone() }
  }

  /// Returns `true` while at least one run holds a registration.
  pub fn is_registered(&self) -> bool {
    self.registration_count() > 0
  }

  pub fn registration_count(&self) -> usize {
    self.hub.registration_count()
  }
}

impl InterruptTrigger {
  /// Delivers an interrupt to every registered run. Returns `false` if no run
  /// is registered, in which case the interrupt is dropped.
  pub fn raise(&self) -> bool {
    let reached = self.hub.deliver();
    if reached > 0 {
      trace!(reached, "Manual interrupt raised.");
      true
    } else {
      debug!("Manual interrupt raised while unregistered; dropped.");
      false
    }
  }
}

impl InterruptSource for ManualInterrupt {
  fn register(&self) -> io::Result<InterruptRegistration> {
    Ok(self.hub.subscribe())
  }
}

/// Listens for the process interrupt signal (SIGINT / Ctrl-C).
///
/// One listener task is shared by all live registrations and stopped when the
/// last one deregisters. `register` must be called from within a Tokio runtime.
/// Once registered, the process no longer terminates on SIGINT by default, for
/// the rest of its life.
#[derive(Debug, Default, Clone)]
pub struct CtrlCInterrupt {
  hub: Arc<InterruptHub>,
}

impl CtrlCInterrupt {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn registration_count(&self) -> usize {
    self.hub.registration_count()
  }
}

impl InterruptSource for CtrlCInterrupt {
  fn register(&self) -> io::Result<InterruptRegistration> {
    self.hub.subscribe_listening(|hub| {
      let tokio_handle = TokioHandle::try_current().map_err(io::Error::other)?;
      let token = CancellationToken::new();

      #[cfg(unix)]
      let listen = {
        let _guard = tokio_handle.enter();
        let signal = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;
        listen_for_interrupt(signal, hub, token.clone())
      };
      #[cfg(not(unix))]
      let listen = listen_for_interrupt(hub, token.clone());

      tokio_handle.spawn(listen.instrument(info_span!("interrupt_listener")));
      debug!("Interrupt listener started.");
      Ok(token)
    })
  }
}

#[cfg(unix)]
async fn listen_for_interrupt(mut signal: tokio::signal::unix::Signal, hub: Arc<InterruptHub>, token: CancellationToken) {
  loop {
    tokio::select! {
      biased;
      _ = token.cancelled() => break,
      received = signal.recv() => match received {
        Some(()) => {
          let reached = hub.deliver();
          info!(reached, "Interrupt signal received.");
        }
        None => {
          warn!("Interrupt signal stream closed.");
          break;
        }
      },
    }
  }
  trace!("Interrupt listener stopped.");
}

#[cfg(not(unix))]
async fn listen_for_interrupt(hub: Arc<InterruptHub>, token: CancellationToken) {
  loop {
    tokio::select! {
      biased;
      _ = token.cancelled() => break,
      received = tokio::signal::ctrl_c() => match received {
        Ok(()) => {
          let reached = hub.deliver();
          info!(reached, "Ctrl-C received.");
        }
        Err(e) => {
          warn!("Failed to listen for Ctrl-C: {}", e);
          break;
        }
      },
    }
  }
  trace!("Interrupt listener stopped.");
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_manual_interrupt_dropped_while_unregistered() {
    let source = ManualInterrupt::new();
    let trigger = source.trigger();

    assert!(!trigger.raise());
    let registration = source.register().unwrap();
    assert!(
      !registration.try_consume(),
      "Interrupt raised before registration leaked into the run"
    );
  }

  #[test]
  fn test_manual_interrupt_consumed_once() {
    let source = ManualInterrupt::new();
    let trigger = source.trigger();
    let registration = source.register().unwrap();

    assert!(trigger.raise());
    assert!(trigger.raise());
    assert!(registration.try_consume());
    assert!(!registration.try_consume());
  }

  #[test]
  fn test_manual_deregister_discards_pending_interrupt() {
    let source = ManualInterrupt::new();
    let trigger = source.trigger();
    let first = source.register().unwrap();
    assert!(trigger.raise());

    first.deregister();
    assert!(!first.try_consume());
    assert!(!source.is_registered());

    let second = source.register().unwrap();
    assert!(!second.try_consume());

    second.deregister();
    second.deregister();
    assert!(!trigger.raise());
  }

  #[test]
  fn test_registrations_are_independent() {
    let source = ManualInterrupt::new();
    let trigger = source.trigger();
    let short_run = source.register().unwrap();
    let long_run = source.register().unwrap();
    assert_eq!(source.registration_count(), 2);

    // Consuming on one registration leaves the other's interrupt pending.
    assert!(trigger.raise());
    assert!(short_run.try_consume());
    short_run.deregister();
    assert!(long_run.try_consume());

    // The other run stays armed after the first one deregisters.
    assert!(source.is_registered());
    assert!(trigger.raise());
    assert!(long_run.try_consume());
    assert!(!short_run.try_consume());
  }

  #[test]
  fn test_dropping_registration_deregisters() {
    let source = ManualInterrupt::new();
    let registration = source.register().unwrap();
    assert!(source.is_registered());

    drop(registration);
    assert!(!source.is_registered());
    assert!(!source.trigger().raise());
  }

  #[test]
  fn test_no_interrupt_never_fires() {
    let registration = NoInterrupt.register().unwrap();
    assert!(!registration.try_consume());
    registration.deregister();
    assert!(!registration.is_active());
  }

  #[test]
  fn test_ctrl_c_register_outside_runtime_fails() {
    let source = CtrlCInterrupt::new();
    assert!(source.register().is_err());
    assert_eq!(source.registration_count(), 0);
    assert!(source.hub.state.lock().listener.is_none());
  }

  #[tokio::test]
  async fn test_ctrl_c_listener_shared_until_last_deregister() {
    let source = CtrlCInterrupt::new();
    let first = source.register().unwrap();
    let second = source.register().unwrap();
    assert_eq!(source.registration_count(), 2);
    assert!(source.hub.state.lock().listener.is_some());

    first.deregister();
    assert!(source.hub.state.lock().listener.is_some(), "Listener must outlive the first run");
    second.deregister();
    assert!(source.hub.state.lock().listener.is_none());
    second.deregister();
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn test_ctrl_c_delivers_sigint_once() {
    let source = CtrlCInterrupt::new();
    let registration = source.register().unwrap();

    let status = std::process::Command::new("kill")
      .arg("-INT")
      .arg(std::process::id().to_string())
      .status()
      .expect("Failed to run kill");
    assert!(status.success());

    let mut delivered = false;
    for _ in 0..200 {
      if registration.try_consume() {
        delivered = true;
        break;
      }
      tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert!(delivered, "SIGINT was not delivered to the registration");
    assert!(!registration.try_consume(), "A single SIGINT must be consumed once");

    registration.deregister();
    assert!(!registration.try_consume());
    let next = source.register().unwrap();
    assert!(!next.try_consume(), "A consumed SIGINT must not reach a later run");
  }
}
