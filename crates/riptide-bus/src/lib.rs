//! Synchronous, in-order event bus shared by the riptide client runtime.
//!
//! Handlers are invoked with mutable access to the context that owns the bus,
//! which lets them register or remove handlers while an emit is in progress.

use std::fmt;

use thiserror::Error;
use tracing::trace;

mod once;

pub use once::{OnceCallback, OnceGate};

/// Stable token returned by [`EventBus::on`]; stays valid regardless of other
/// registrations or removals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler#{}", self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BusError {
    #[error("no handler registered under {0}")]
    UnknownHandler(HandlerId),
}

pub type BusResult<T> = Result<T, BusError>;

pub type Handler<C, P> = Box<dyn FnMut(&mut C, &P)>;

/// Implemented by the context that owns an [`EventBus`] so [`EventBus::emit`]
/// can hand that context to every handler.
pub trait BusHost<P>: Sized {
    fn bus(&mut self) -> &mut EventBus<Self, P>;
}

struct Subscription<C, P> {
    id: HandlerId,
    name: String,
    // `None` while the handler is running.
    handler: Option<Handler<C, P>>,
}

pub struct EventBus<C, P> {
    next_id: u64,
    subscriptions: Vec<Subscription<C, P>>,
}

impl<C, P> Default for EventBus<C, P> {
    fn default() -> Self {
        Self {
            next_id: 0,
            subscriptions: Vec::new(),
        }
    }
}

impl<C, P> fmt::Debug for EventBus<C, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field(
                "subscriptions",
                &self
                    .subscriptions
                    .iter()
                    .map(|sub| (sub.id, sub.name.as_str()))
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl<C, P> EventBus<C, P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `name`. Handlers for the same name run in
    /// registration order.
    pub fn on(&mut self, name: impl Into<String>, handler: Handler<C, P>) -> HandlerId {
        let id = HandlerId(self.next_id);
        self.next_id += 1;
        let name = name.into();
        trace!(target: "riptide::bus", %id, event = %name, "handler registered");
        self.subscriptions.push(Subscription {
            id,
            name,
            handler: Some(handler),
        });
        id
    }

    /// Removes exactly the handler registered under `id`.
    pub fn off(&mut self, id: HandlerId) -> BusResult<()> {
        let position = self
            .subscriptions
            .iter()
            .position(|sub| sub.id == id)
            .ok_or(BusError::UnknownHandler(id))?;
        self.subscriptions.remove(position);
        trace!(target: "riptide::bus", %id, "handler removed");
        Ok(())
    }

    pub fn handler_count(&self, name: &str) -> usize {
        self.subscriptions
            .iter()
            .filter(|sub| sub.name == name)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    fn matching(&self, name: &str) -> Vec<HandlerId> {
        self.subscriptions
            .iter()
            .filter(|sub| sub.name == name)
            .map(|sub| sub.id)
            .collect()
    }

    fn take(&mut self, id: HandlerId) -> Option<Handler<C, P>> {
        self.subscriptions
            .iter_mut()
            .find(|sub| sub.id == id)
            .and_then(|sub| sub.handler.take())
    }

    fn restore(&mut self, id: HandlerId, handler: Handler<C, P>) {
        // A handler that removed itself while running is dropped here.
        if let Some(sub) = self.subscriptions.iter_mut().find(|sub| sub.id == id) {
            sub.handler = Some(handler);
        }
    }
}

impl<C: BusHost<P>, P> EventBus<C, P> {
    /// Invokes every handler registered for `name` at the time of the call,
    /// synchronously and in registration order. Returns how many ran.
    ///
    /// Handlers added during the emit do not run for it; handlers removed
    /// before being reached are skipped. A handler that re-emits its own event
    /// is not re-entered.
    pub fn emit(ctx: &mut C, name: &str, payload: &P) -> usize {
        let ids = ctx.bus().matching(name);
        if ids.is_empty() {
            trace!(target: "riptide::bus", event = name, "no handlers");
            return 0;
        }

        let mut invoked = 0;
        for id in ids {
            let Some(mut handler) = ctx.bus().take(id) else {
                continue;
            };
            handler(ctx, payload);
            ctx.bus().restore(id, handler);
            invoked += 1;
        }
        invoked
    }
}
