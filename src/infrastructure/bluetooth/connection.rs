//! RFCOMM connection worker.
//!
//! Each connection attempt runs as one background task. The attempt is
//! bounded by a connect deadline and by a cancellation token; cancelling
//! closes the underlying stream, which deterministically unblocks the
//! worker. Every attempt reports its outcome as [`ConnectionResult`]
//! events; a failing attempt never dies silently.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::models::{
    AppEvent, BluetoothDevice, BluetoothMessage, ConnectionResult, ConnectionState,
};
use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::adapter::{
    BluetoothAdapter, RfcommStream, RfcommTarget, SPP_UUID,
};

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub target: RfcommTarget,
    pub connect_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            target: RfcommTarget::default(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl ConnectionConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        let service_uuid = match settings.spp_service_uuid.parse() {
            Ok(uuid) => uuid,
            Err(err) => {
                warn!(
                    "Invalid service UUID {:?} in settings ({}), using SPP",
                    settings.spp_service_uuid, err
                );
                SPP_UUID
            }
        };
        Self {
            target: RfcommTarget {
                service_uuid,
                channel: settings.rfcomm_channel,
            },
            connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
        }
    }
}

/// Handle to a running connection worker.
pub struct ConnectionHandle {
    device: BluetoothDevice,
    cancel: CancellationToken,
    outgoing: mpsc::UnboundedSender<String>,
    task: tokio::task::JoinHandle<()>,
}

impl ConnectionHandle {
    /// Spawns a worker that attempts to connect to `device` and, on
    /// success, runs a line-oriented transfer loop until cancelled or the
    /// peer hangs up.
    pub fn spawn(
        adapter: Arc<dyn BluetoothAdapter>,
        device: BluetoothDevice,
        config: ConnectionConfig,
        events: mpsc::UnboundedSender<AppEvent>,
        local_name: String,
    ) -> Self {
        let cancel = CancellationToken::new();
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_attempt(
            adapter,
            device.clone(),
            config,
            events,
            local_name,
            cancel.clone(),
            outgoing_rx,
        ));
        Self {
            device,
            cancel,
            outgoing: outgoing_tx,
            task,
        }
    }

    /// Tears the connection down. Best-effort: never reports a failure to
    /// the caller, and is safe to call at any point of the attempt,
    /// including before a socket was ever opened.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Queues a line of text for the peer. Returns false once the worker
    /// has stopped.
    pub fn send_text(&self, text: String) -> bool {
        self.outgoing.send(text).is_ok()
    }

    pub fn device(&self) -> &BluetoothDevice {
        &self.device
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

fn send_state(events: &mpsc::UnboundedSender<AppEvent>, state: ConnectionState) {
    let _ = events.send(AppEvent::ConnectionStateChanged(state));
}

fn send_result(events: &mpsc::UnboundedSender<AppEvent>, result: ConnectionResult) {
    let _ = events.send(AppEvent::Connection(result));
}

async fn run_attempt(
    adapter: Arc<dyn BluetoothAdapter>,
    device: BluetoothDevice,
    config: ConnectionConfig,
    events: mpsc::UnboundedSender<AppEvent>,
    local_name: String,
    cancel: CancellationToken,
    outgoing: mpsc::UnboundedReceiver<String>,
) {
    // Discovery degrades link setup and must be off before connecting.
    if let Err(err) = adapter.cancel_discovery().await {
        warn!("Could not cancel discovery before connecting: {}", err);
    }

    send_state(&events, ConnectionState::Connecting);
    info!(
        "Connecting to {} on RFCOMM channel {}",
        device.address, config.target.channel
    );

    let connect = adapter.open_rfcomm(device.address, config.target);
    let stream = tokio::select! {
        _ = cancel.cancelled() => {
            info!("Connection attempt to {} cancelled", device.address);
            send_state(&events, ConnectionState::Closed);
            return;
        }
        outcome = timeout(config.connect_timeout, connect) => match outcome {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => {
                fail(&events, format!("Connecting to {} failed: {}", device.address, err));
                return;
            }
            Err(_) => {
                fail(
                    &events,
                    format!(
                        "Connecting to {} timed out after {:?}",
                        device.address, config.connect_timeout
                    ),
                );
                return;
            }
        }
    };

    info!("Connected to {}", device.address);
    send_state(&events, ConnectionState::Connected);
    send_result(&events, ConnectionResult::Established);

    transfer(stream, &device, &events, &local_name, &cancel, outgoing).await;
    send_state(&events, ConnectionState::Closed);
}

fn fail(events: &mpsc::UnboundedSender<AppEvent>, reason: String) {
    error!("{}", reason);
    send_state(events, ConnectionState::Failed);
    send_result(events, ConnectionResult::Error(reason));
    send_state(events, ConnectionState::Closed);
}

/// Reads newline-delimited text from the peer and writes queued outgoing
/// lines, until cancellation, peer hangup, or an I/O error.
async fn transfer(
    stream: Box<dyn RfcommStream>,
    device: &BluetoothDevice,
    events: &mpsc::UnboundedSender<AppEvent>,
    local_name: &str,
    cancel: &CancellationToken,
    mut outgoing: mpsc::UnboundedReceiver<String>,
) {
    let peer_name = device.label();
    let (reader, mut writer) = tokio::io::split(stream);
    let mut lines = BufReader::new(reader).lines();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Transfer loop for {} cancelled", device.address);
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(text)) => {
                    send_result(events, ConnectionResult::TransferSucceeded(BluetoothMessage {
                        text,
                        sender_name: peer_name.clone(),
                        is_from_local_user: false,
                    }));
                }
                Ok(None) => {
                    info!("Peer {} closed the connection", device.address);
                    break;
                }
                Err(err) => {
                    let reason = format!("Connection to {} lost: {}", device.address, err);
                    error!("{}", reason);
                    send_result(events, ConnectionResult::Error(reason));
                    break;
                }
            },
            text = outgoing.recv() => {
                let Some(text) = text else { break };
                if let Err(err) = write_line(&mut writer, &text).await {
                    let reason = format!("Sending to {} failed: {}", device.address, err);
                    error!("{}", reason);
                    send_result(events, ConnectionResult::Error(reason));
                    break;
                }
                send_result(events, ConnectionResult::TransferSucceeded(BluetoothMessage {
                    text,
                    sender_name: local_name.to_string(),
                    is_from_local_user: true,
                }));
            }
        }
    }

    // Close failures are logged and swallowed, never surfaced to the caller.
    if let Err(err) = writer.shutdown().await {
        error!("Could not close the RFCOMM socket: {}", err);
    }
}

async fn write_line<W: AsyncWriteExt + Unpin>(writer: &mut W, text: &str) -> std::io::Result<()> {
    writer.write_all(text.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}
