//! Unix domain socket server for IPC
//!
//! Provides request-response communication and push notifications for
//! call events to subscribed clients.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::backend::Door;
use crate::events::CallEvent;
use crate::flow::{CallDesk, FlowError};
use crate::state::CallView;

use super::protocol::{DaemonStatus, DoorInfo, Notification, Request, Response, MAX_FRAME_LEN};

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    state: Arc<ServerState>,
    shutdown_tx: broadcast::Sender<()>,
}

/// Shared server state
struct ServerState {
    desk: CallDesk,
    start_time: std::time::Instant,
    /// Source of call events for subscribed clients
    event_tx: broadcast::Sender<CallEvent>,
}

/// Produced by a connection's request side, in request order
enum Outgoing {
    Reply(Response),
    Subscribe,
}

/// Pushes a subscribed client receives
struct Subscription {
    events: broadcast::Receiver<CallEvent>,
    views: watch::Receiver<CallView>,
}

impl Server {
    /// Create a new IPC server bound to `socket_path`
    pub fn new(
        socket_path: &Path,
        desk: CallDesk,
        event_tx: broadcast::Sender<CallEvent>,
    ) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Set socket permissions to owner-only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        let state = Arc::new(ServerState {
            desk,
            start_time: std::time::Instant::now(),
            event_tx,
        });

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener: Some(listener),
            state,
            shutdown_tx,
        })
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("server not initialized")?;

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let state = Arc::clone(&self.state);
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, state) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Handle a single client connection
    async fn handle_client(stream: UnixStream, state: Arc<ServerState>) -> Result<()> {
        let (reader, mut writer) = stream.into_split();

        // Requests are read and served on their own task, so neither a
        // half-read frame nor a slow backend call holds back notifications
        let (outgoing_tx, mut outgoing_rx) = mpsc::channel(8);
        let event_tx = state.event_tx.clone();
        let desk = state.desk.clone();
        let request_task = tokio::spawn(async move {
            if let Err(e) = Self::serve_requests(reader, &state, outgoing_tx).await {
                debug!(?e, "request reader stopped");
            }
        });

        let mut subscription: Option<Subscription> = None;

        let result = loop {
            tokio::select! {
                outgoing = outgoing_rx.recv() => {
                    let Some(outgoing) = outgoing else {
                        debug!("client disconnected");
                        break Ok(());
                    };

                    let response = match outgoing {
                        Outgoing::Subscribe => {
                            if subscription.is_none() {
                                subscription = Some(Subscription {
                                    events: event_tx.subscribe(),
                                    views: desk.subscribe_view(),
                                });
                                debug!("client subscribed to notifications");
                            }
                            Response::Subscribed
                        }
                        Outgoing::Reply(response) => response,
                    };

                    if let Err(e) = Self::send_message(&mut writer, &response).await {
                        break Err(e);
                    }
                }

                notification = next_notification(&mut subscription) => {
                    if let Some(notification) = notification {
                        if let Err(e) = Self::send_message(&mut writer, &notification).await {
                            break Err(e);
                        }
                    }
                }
            }
        };

        request_task.abort();
        result
    }

    /// Read length-prefixed frames until EOF and answer them one at a time
    async fn serve_requests(
        mut reader: OwnedReadHalf,
        state: &ServerState,
        outgoing_tx: mpsc::Sender<Outgoing>,
    ) -> Result<()> {
        let mut len_buf = [0u8; 4];

        loop {
            // Read message length (4-byte little-endian)
            match reader.read_exact(&mut len_buf).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(e) => return Err(e.into()),
            }

            let len = u32::from_le_bytes(len_buf) as usize;
            if len > MAX_FRAME_LEN {
                warn!(len, "message too large, disconnecting");
                return Ok(());
            }

            // Read message body
            let mut msg_buf = vec![0u8; len];
            reader.read_exact(&mut msg_buf).await?;

            let outgoing = match serde_json::from_slice::<Request>(&msg_buf) {
                Ok(Request::Subscribe) => Outgoing::Subscribe,
                Ok(request) => {
                    debug!(?request, "received request");
                    Outgoing::Reply(Self::process_request(request, state).await)
                }
                Err(e) => Outgoing::Reply(Response::Error {
                    code: "bad_request".to_string(),
                    message: format!("failed to parse request: {}", e),
                }),
            };
            if outgoing_tx.send(outgoing).await.is_err() {
                return Ok(());
            }
        }
    }

    /// Send a length-prefixed JSON message
    async fn send_message<T: Serialize>(writer: &mut OwnedWriteHalf, msg: &T) -> Result<()> {
        let msg_bytes = serde_json::to_vec(msg)?;
        let msg_len = (msg_bytes.len() as u32).to_le_bytes();

        writer.write_all(&msg_len).await?;
        writer.write_all(&msg_bytes).await?;

        Ok(())
    }

    /// Process a request and return a response
    async fn process_request(request: Request, state: &ServerState) -> Response {
        let desk = &state.desk;

        let result: std::result::Result<Response, FlowError> = match request {
            Request::Ping => Ok(Response::Pong),

            Request::GetStatus => Ok(Response::Status(DaemonStatus {
                default_mode: desk.default_mode(),
                uptime_secs: state.start_time.elapsed().as_secs(),
                call: desk.view(),
                ..DaemonStatus::default()
            })),

            Request::Subscribe => Ok(Response::Subscribed),

            Request::ExtractIntent { text, mode } => desk
                .extract_intent(&text, mode)
                .await
                .map(|intent| Response::Intent { intent }),

            Request::StartCall { intent, mode } => {
                desk.start_call(intent, mode).await.map(call_started)
            }

            Request::Call { text, mode } => desk.quick_call(&text, mode).await.map(call_started),

            Request::Reset => desk.reset().await.map(|_| Response::Reset),

            Request::GetSummary => Ok(Response::Summary {
                text: desk.summary(),
            }),

            Request::GetDoors => Ok(Response::Doors {
                doors: Door::ALL.into_iter().map(DoorInfo::from).collect(),
            }),

            Request::GetProfile => desk
                .backend()
                .get_profile()
                .await
                .map(|profile| Response::Profile { profile })
                .map_err(FlowError::from),

            Request::UpdateProfile { update } => desk
                .backend()
                .update_profile(&update)
                .await
                .map(|profile| Response::Profile { profile })
                .map_err(FlowError::from),

            Request::CompleteOnboarding {
                name,
                favourite_thing,
                mode,
            } => {
                let mode = mode.unwrap_or(desk.default_mode());
                desk.backend()
                    .complete_onboarding(&name, &favourite_thing, mode)
                    .await
                    .map(Response::Onboarded)
                    .map_err(FlowError::from)
            }

            Request::GetTheme { favourite } => desk
                .backend()
                .get_theme(favourite.as_deref())
                .await
                .map(|theme| Response::Theme { theme })
                .map_err(FlowError::from),
        };

        result.unwrap_or_else(|e| {
            debug!(code = e.code(), error = %e, "request failed");
            Response::Error {
                code: e.code().to_string(),
                message: e.to_string(),
            }
        })
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

fn call_started(call: CallView) -> Response {
    Response::CallStarted {
        call_id: call.call_id.clone().unwrap_or_default(),
        call,
    }
}

/// Next push for a subscribed client; pending forever if not subscribed.
/// Resolves to `None` when there is nothing to send this round.
async fn next_notification(subscription: &mut Option<Subscription>) -> Option<Notification> {
    let Some(sub) = subscription.as_mut() else {
        return std::future::pending().await;
    };

    tokio::select! {
        event = sub.events.recv() => match event {
            Ok(event) => Some(Notification::CallEvent { event }),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "call event receiver lagged");
                None
            }
            Err(broadcast::error::RecvError::Closed) => {
                *subscription = None;
                None
            }
        },
        changed = sub.views.changed() => match changed {
            Ok(()) => Some(Notification::CallUpdated {
                call: sub.views.borrow_and_update().clone(),
            }),
            Err(_) => {
                *subscription = None;
                None
            }
        },
    }
}
