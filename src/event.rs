use futures::future::BoxFuture;
use std::collections::HashMap;

use crate::http::Request;
use crate::worker::{ActivateReport, FetchOutcome, InstallReport};

/// Events the host delivers to the interceptor
#[derive(Debug)]
pub enum Event {
  /// A new version is being installed
  Install,
  /// The installed version is taking over from older ones
  Activate,
  /// A controlled page issued a request
  Fetch(Request),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
  Install,
  Activate,
  Fetch,
}

impl Event {
  pub fn kind(&self) -> EventKind {
    match self {
      Event::Install => EventKind::Install,
      Event::Activate => EventKind::Activate,
      Event::Fetch(_) => EventKind::Fetch,
    }
  }
}

/// What a handler resolved to once its event settled
#[derive(Debug)]
pub enum Settled {
  Installed(InstallReport),
  Activated(ActivateReport),
  Fetched(FetchOutcome),
  /// No handler took the event
  Ignored,
}

type Handler = Box<dyn Fn(Event) -> BoxFuture<'static, Settled> + Send + Sync>;

/// Registration table mapping each event kind to its handler
#[derive(Default)]
pub struct Registry {
  handlers: HashMap<EventKind, Handler>,
}

impl Registry {
  /// Register `handler` for `kind`, replacing any previous one
  pub fn on<F>(&mut self, kind: EventKind, handler: F)
  where
    F: Fn(Event) -> BoxFuture<'static, Settled> + Send + Sync + 'static,
  {
    self.handlers.insert(kind, Box::new(handler));
  }

  /// Start the handler for `event`, or `None` if nothing is registered for it
  pub fn dispatch(&self, event: Event) -> Option<BoxFuture<'static, Settled>> {
    self
      .handlers
      .get(&event.kind())
      .map(|handler| handler(event))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use futures::FutureExt;

  #[tokio::test]
  async fn test_dispatch_routes_by_kind() {
    let mut registry = Registry::default();
    registry.on(EventKind::Install, |_| {
      async { Settled::Installed(InstallReport::default()) }.boxed()
    });

    let settled = registry.dispatch(Event::Install).unwrap().await;
    assert!(matches!(settled, Settled::Installed(_)));
    assert!(registry.dispatch(Event::Activate).is_none());
  }
}
