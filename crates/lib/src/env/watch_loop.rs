//! Background polling of watched graphs.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::artifact::PortMap;

use super::types::RunOutcome;
use super::{EnvError, Environment, WatchEvent};

/// Control handle of a running watch loop.
///
/// Dropping the handle stops a non-daemon loop after its current poll. A
/// daemon loop keeps polling until [`WatchHandle::stop`] is called or the
/// runtime shuts down.
#[derive(Debug)]
pub struct WatchHandle {
  stop: watch::Sender<bool>,
  task: Option<JoinHandle<()>>,
  events: mpsc::UnboundedReceiver<WatchEvent>,
  daemon: bool,
}

impl WatchHandle {
  pub fn is_daemon(&self) -> bool {
    self.daemon
  }

  /// Stop the loop, waiting for an in-flight poll to finish.
  pub async fn stop(mut self) -> Result<(), EnvError> {
    let _ = self.stop.send(true);
    match self.task.take() {
      Some(task) => task.await.map_err(|e| EnvError::Worker(e.to_string())),
      None => Ok(()),
    }
  }

  /// Next event, or `None` once the loop has exited.
  pub async fn next_event(&mut self) -> Option<WatchEvent> {
    self.events.recv().await
  }

  /// Next event if one is already queued.
  pub fn try_event(&mut self) -> Option<WatchEvent> {
    self.events.try_recv().ok()
  }
}

impl Drop for WatchHandle {
  fn drop(&mut self) {
    if !self.daemon {
      let _ = self.stop.send(true);
    }
  }
}

impl Environment {
  /// Poll every watched graph each `poll_interval`, rebuilding those whose
  /// sources changed. Must be called inside a tokio runtime.
  ///
  /// Polls never overlap: a poll that outlasts the interval delays the next.
  pub fn run_forever(self: &Arc<Self>, poll_interval: Duration, daemon: bool) -> WatchHandle {
    let (stop_tx, mut stop_rx) = watch::channel(false);
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let env = Arc::clone(self);

    let task = tokio::spawn(async move {
      let mut ticker = time::interval(poll_interval.max(Duration::from_millis(1)));
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
      let mut stop_open = true;
      info!(interval = ?poll_interval, daemon, "watch loop started");

      loop {
        tokio::select! {
          biased;

          changed = stop_rx.changed(), if stop_open => match changed {
            Ok(()) if *stop_rx.borrow() => break,
            Ok(()) => {}
            Err(_) if daemon => stop_open = false,
            Err(_) => break,
          },

          _ = ticker.tick() => {
            for graph in env.watched() {
              let event = poll_graph(&env, graph).await;
              let _ = event_tx.send(event);
            }
          }
        }
      }
      info!("watch loop stopped");
    });

    WatchHandle {
      stop: stop_tx,
      task: Some(task),
      events: event_rx,
      daemon,
    }
  }
}

async fn poll_graph(env: &Arc<Environment>, graph: String) -> WatchEvent {
  let worker = Arc::clone(env);
  let name = graph.clone();
  let joined = tokio::task::spawn_blocking(move || worker.run_inner(&name, PortMap::new())).await;
  let result = joined.unwrap_or_else(|e| Err(EnvError::Worker(e.to_string())));

  match result {
    Ok((_, RunOutcome::Built)) => {
      info!(graph = %graph, "rebuilt");
      WatchEvent::Rebuilt { graph }
    }
    Ok((_, RunOutcome::Unchanged | RunOutcome::Cached)) => {
      debug!(graph = %graph, "unchanged");
      WatchEvent::Unchanged { graph }
    }
    Err(e) => {
      warn!(graph = %graph, error = %e, "watched graph failed");
      WatchEvent::Failed {
        graph,
        error: e.to_string(),
      }
    }
  }
}
