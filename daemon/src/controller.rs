//! Event loop that owns the call session
//!
//! One task holds the [`CallLifecycle`] and is the only thing that mutates
//! it. Commands, fetch results, poll ticks and timer deadlines are handled
//! one at a time, so no locking is needed; stale work from an earlier
//! session is recognised by its epoch and dropped.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{self, Instant};
use tracing::{debug, info};

use crate::backend::{CallBackend, Intent, Mode};
use crate::events::CallEvent;
use crate::poller::{FetchResult, PollingEngine};
use crate::state::{Applied, CallLifecycle, CallView, LifecycleError};

/// Errors returned through a [`ControllerHandle`]
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("call controller is not running")]
    Stopped,
}

/// Requests handled by the controller loop
#[derive(Debug)]
pub enum Command {
    /// Start tracking a call that the backend has placed
    Begin {
        call_id: String,
        intent: Intent,
        mode: Mode,
        reply: oneshot::Sender<Result<CallView, LifecycleError>>,
    },
    /// Abandon the current call, if any
    Reset { reply: oneshot::Sender<CallView> },
}

/// Cloneable handle for talking to a running controller
#[derive(Clone)]
pub struct ControllerHandle {
    command_tx: mpsc::Sender<Command>,
    view_rx: watch::Receiver<CallView>,
}

impl ControllerHandle {
    pub async fn begin(
        &self,
        call_id: String,
        intent: Intent,
        mode: Mode,
    ) -> Result<CallView, ControllerError> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(Command::Begin {
                call_id,
                intent,
                mode,
                reply,
            })
            .await
            .map_err(|_| ControllerError::Stopped)?;
        Ok(rx.await.map_err(|_| ControllerError::Stopped)??)
    }

    pub async fn reset(&self) -> Result<CallView, ControllerError> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(Command::Reset { reply })
            .await
            .map_err(|_| ControllerError::Stopped)?;
        rx.await.map_err(|_| ControllerError::Stopped)
    }

    /// Latest published view of the session
    pub fn view(&self) -> CallView {
        self.view_rx.borrow().clone()
    }

    /// Watch the view for changes
    pub fn subscribe_view(&self) -> watch::Receiver<CallView> {
        self.view_rx.clone()
    }
}

/// Owns the lifecycle and drives polling and timers for it
pub struct CallController {
    lifecycle: CallLifecycle,
    poller: PollingEngine,
    results_rx: mpsc::Receiver<FetchResult>,
    command_rx: mpsc::Receiver<Command>,
    view_tx: watch::Sender<CallView>,
}

impl CallController {
    /// Create a controller and the handle used to reach it
    pub fn new(
        backend: Arc<dyn CallBackend>,
        event_tx: broadcast::Sender<CallEvent>,
    ) -> (Self, ControllerHandle) {
        let (command_tx, command_rx) = mpsc::channel(16);
        let (results_tx, results_rx) = mpsc::channel(4);
        let (view_tx, view_rx) = watch::channel(CallView::default());

        let controller = Self {
            lifecycle: CallLifecycle::new(event_tx),
            poller: PollingEngine::new(backend, results_tx),
            results_rx,
            command_rx,
            view_tx,
        };

        (
            controller,
            ControllerHandle {
                command_tx,
                view_rx,
            },
        )
    }

    /// Run until every handle has been dropped
    pub async fn run(mut self) {
        info!("call controller started");

        loop {
            let deadline = self.lifecycle.next_deadline();

            tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },

                Some(result) = self.results_rx.recv() => {
                    self.handle_fetch_result(result);
                }

                _ = self.poller.next_tick() => {
                    self.poller.fire();
                }

                _ = wait_until(deadline) => {
                    self.lifecycle.on_deadline(Instant::now());
                }
            }

            self.reconcile();
        }

        self.poller.stop();
        info!("call controller stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Begin {
                call_id,
                intent,
                mode,
                reply,
            } => {
                let result = self
                    .lifecycle
                    .start_call(call_id, intent, mode, Instant::now())
                    .map(|_| {
                        self.reconcile();
                        self.lifecycle.view()
                    });
                let _ = reply.send(result);
            }
            Command::Reset { reply } => {
                self.lifecycle.reset();
                self.poller.cancel_fetch_once();
                self.reconcile();
                let _ = reply.send(self.lifecycle.view());
            }
        }
    }

    fn handle_fetch_result(&mut self, result: FetchResult) {
        let applied = self.lifecycle.apply_snapshot(
            result.epoch,
            &result.call_id,
            &result.snapshot,
            Instant::now(),
        );
        debug!(call_id = %result.call_id, epoch = result.epoch, ?applied, "transcript applied");

        if applied == Applied::Finished {
            info!(call_id = %result.call_id, "call finished");
        }
    }

    /// Bring the poller and the published view in line with the lifecycle
    fn reconcile(&mut self) {
        match self.lifecycle.polling_target() {
            Some(target) if !self.poller.is_polling_for(target.epoch) => {
                self.poller.start(target.epoch, target.call_id, target.interval);
            }
            Some(_) => {}
            None if self.poller.is_active() => self.poller.stop(),
            None => {}
        }

        if let Some((epoch, call_id)) = self.lifecycle.take_results_refresh() {
            self.poller.fetch_once(epoch, call_id);
        }

        let view = self.lifecycle.view();
        self.view_tx.send_if_modified(|current| {
            if *current == view {
                false
            } else {
                *current = view;
                true
            }
        });
    }
}

/// Sleep until `deadline`, or forever if there is none
async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
