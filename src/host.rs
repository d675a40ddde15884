//! The hosting side of the interceptor: delivers lifecycle and fetch events.
//!
//! A single dispatch loop consumes events from a channel. Install and activate
//! are awaited to completion before the next event is taken, so no request is
//! routed by a half-installed or half-activated version. Fetch events are
//! spawned and run interleaved. Until the interceptor has activated and
//! claimed, requests go straight to the network.

use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

use crate::cache::CacheResult;
use crate::event::{Event, EventKind, Registry, Settled};
use crate::http::{Request, Response};
use crate::network::Network;
use crate::worker::{ActivateReport, FetchOutcome, InstallReport};

/// Lifecycle position of the hosted interceptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Parsed,
  Installing,
  Installed,
  Activating,
  Activated,
}

/// An event waiting to be dispatched, with the channel its settlement goes back on
struct Envelope {
  event: Event,
  reply: oneshot::Sender<Settled>,
}

/// Install result, plus the activation it triggered when skip-waiting was requested
#[derive(Debug)]
pub struct InstallOutcome {
  pub install: InstallReport,
  pub activation: Option<ActivateReport>,
}

/// Handle for delivering events to a running dispatch loop
#[derive(Clone)]
pub struct Host {
  tx: mpsc::UnboundedSender<Envelope>,
  state: watch::Receiver<WorkerState>,
  network: Arc<dyn Network>,
}

impl Host {
  /// Start the dispatch loop. `network` serves requests that are not intercepted.
  pub fn spawn(registry: Registry, network: Arc<dyn Network>) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(WorkerState::Parsed);

    tokio::spawn(dispatch_loop(registry, rx, state_tx));

    Self {
      tx,
      state: state_rx,
      network,
    }
  }

  pub fn state(&self) -> WorkerState {
    *self.state.borrow()
  }

  /// Install the interceptor, activating it right away if it asks to skip waiting.
  pub async fn install(&self) -> Result<InstallOutcome> {
    let install = match self.deliver(Event::Install).await? {
      Settled::Installed(report) => report,
      Settled::Ignored => InstallReport::default(),
      other => return Err(eyre!("Unexpected settlement for install: {:?}", other)),
    };

    let activation = if install.skip_waiting {
      Some(self.activate().await?)
    } else {
      None
    };

    Ok(InstallOutcome {
      install,
      activation,
    })
  }

  pub async fn activate(&self) -> Result<ActivateReport> {
    match self.deliver(Event::Activate).await? {
      Settled::Activated(report) => Ok(report),
      Settled::Ignored => Ok(ActivateReport::default()),
      other => Err(eyre!("Unexpected settlement for activate: {:?}", other)),
    }
  }

  /// Issue a request as a controlled page would.
  ///
  /// Dropping the returned future abandons the request.
  pub async fn fetch(&self, request: Request) -> Result<CacheResult<Response>> {
    match self.deliver(Event::Fetch(request.clone())).await? {
      Settled::Fetched(FetchOutcome::Responded(result)) => Ok(result),
      Settled::Fetched(FetchOutcome::Failed(e)) => Err(e),
      Settled::Fetched(FetchOutcome::PassThrough) | Settled::Ignored => {
        let response = self.network.fetch(&request).await?;
        Ok(CacheResult::from_network(response))
      }
      other => Err(eyre!("Unexpected settlement for fetch: {:?}", other)),
    }
  }

  async fn deliver(&self, event: Event) -> Result<Settled> {
    let (reply, settled) = oneshot::channel();
    self
      .tx
      .send(Envelope { event, reply })
      .map_err(|_| eyre!("Host dispatch loop has stopped"))?;
    settled
      .await
      .map_err(|_| eyre!("Event was dropped before it settled"))
  }
}

async fn dispatch_loop(
  registry: Registry,
  mut rx: mpsc::UnboundedReceiver<Envelope>,
  state: watch::Sender<WorkerState>,
) {
  let mut controlled = false;

  while let Some(Envelope { event, reply }) = rx.recv().await {
    match event.kind() {
      EventKind::Install => {
        let active = *state.borrow() == WorkerState::Activated;
        state.send_replace(WorkerState::Installing);
        let settled = settle(&registry, event).await;
        // A re-install leaves the active version in control until it activates again
        state.send_replace(if active {
          WorkerState::Activated
        } else {
          WorkerState::Installed
        });
        let _ = reply.send(settled);
      }
      EventKind::Activate => {
        state.send_replace(WorkerState::Activating);
        let settled = settle(&registry, event).await;
        if let Settled::Activated(report) = &settled {
          controlled = report.claim;
        }
        state.send_replace(WorkerState::Activated);
        let _ = reply.send(settled);
      }
      EventKind::Fetch => {
        let intercept = controlled && *state.borrow() == WorkerState::Activated;
        match intercept.then(|| registry.dispatch(event)).flatten() {
          Some(handling) => {
            tokio::spawn(respond(handling, reply));
          }
          None => {
            let _ = reply.send(Settled::Fetched(FetchOutcome::PassThrough));
          }
        }
      }
    }
  }

  debug!("Dispatch loop finished");
}

async fn settle(registry: &Registry, event: Event) -> Settled {
  match registry.dispatch(event) {
    Some(handling) => handling.await,
    None => Settled::Ignored,
  }
}

/// Run a fetch handler unless the requester goes away first.
async fn respond(handling: BoxFuture<'static, Settled>, mut reply: oneshot::Sender<Settled>) {
  let settled = tokio::select! {
    _ = reply.closed() => None,
    settled = handling => Some(settled),
  };

  match settled {
    Some(settled) => {
      let _ = reply.send(settled);
    }
    None => debug!("Fetch abandoned by requester"),
  }
}
