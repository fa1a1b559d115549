//! Multiplexed daemon connection.
//!
//! A [`Channel`] owns one long-lived TCP connection shared by a whole client
//! tree. Outbound frames are funneled through a writer task; a reader task
//! routes inbound frames by call id to the pending unary call or open stream
//! they belong to. Closing the channel cancels both tasks and fails every
//! pending call.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::protocol::{ClientFrame, ServerFrame};
use crate::{OlvidError, Result};

/// Where an inbound frame for a given call id should be routed.
enum PendingCall {
    Unary(oneshot::Sender<Result<Value>>),
    Stream(mpsc::UnboundedSender<Result<Value>>),
}

struct ChannelInner {
    target: String,
    outbound: mpsc::UnboundedSender<ClientFrame>,
    calls: Mutex<HashMap<u64, PendingCall>>,
    next_call_id: AtomicU64,
    token: CancellationToken,
    io_tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Handle to the shared daemon connection.
///
/// Cheap to clone; all clones refer to the same connection. Only the root
/// client calls [`Channel::close`].
#[derive(Clone)]
pub(crate) struct Channel {
    inner: Arc<ChannelInner>,
}

impl Channel {
    /// Opens a connection to `target` (`hostname:port`).
    pub(crate) async fn open(target: &str) -> Result<Self> {
        let stream = TcpStream::connect(target)
            .await
            .map_err(|source| OlvidError::ConnectionFailed {
                target: target.to_string(),
                source,
            })?;
        let (read_half, write_half) = stream.into_split();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(ChannelInner {
            target: target.to_string(),
            outbound,
            calls: Mutex::new(HashMap::new()),
            next_call_id: AtomicU64::new(1),
            token: CancellationToken::new(),
            io_tasks: Mutex::new(Vec::new()),
        });

        let writer = tokio::spawn(run_writer(
            write_half,
            outbound_rx,
            inner.token.clone(),
        ));
        let reader = tokio::spawn(run_reader(read_half, Arc::clone(&inner)));
        inner.io_tasks.lock().extend([writer, reader]);

        debug!(target = %target, "connected to daemon");
        Ok(Self { inner })
    }

    /// Issues a unary call and awaits its result.
    pub(crate) async fn unary(
        &self,
        method: &str,
        client_key: &str,
        params: Value,
    ) -> Result<Value> {
        let id = self.next_call_id();
        let (tx, rx) = oneshot::channel();
        self.inner.calls.lock().insert(id, PendingCall::Unary(tx));
        self.send_call(id, method, client_key, params)?;
        match rx.await {
            Ok(result) => result,
            // Reader task dropped the sender during teardown.
            Err(_) => Err(self.closed_error()),
        }
    }

    /// Opens a server-streaming call.
    ///
    /// Dropping the returned stream cancels the call on the daemon side.
    pub(crate) fn open_stream(
        &self,
        method: &str,
        client_key: &str,
        params: Value,
    ) -> Result<CallStream> {
        let id = self.next_call_id();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.calls.lock().insert(id, PendingCall::Stream(tx));
        self.send_call(id, method, client_key, params)?;
        Ok(CallStream {
            id,
            rx,
            channel: self.clone(),
        })
    }

    /// Closes the connection and fails all pending calls.
    pub(crate) async fn close(&self) {
        self.inner.token.cancel();
        let tasks: Vec<_> = self.inner.io_tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
        self.fail_pending();
        debug!(target = %self.inner.target, "daemon connection closed");
    }

    fn next_call_id(&self) -> u64 {
        self.inner.next_call_id.fetch_add(1, Ordering::Relaxed)
    }

    fn send_call(&self, id: u64, method: &str, client_key: &str, params: Value) -> Result<()> {
        let frame = ClientFrame::Call {
            id,
            method: method.to_string(),
            client_key: client_key.to_string(),
            params,
        };
        if self.inner.outbound.send(frame).is_err() {
            self.inner.calls.lock().remove(&id);
            return Err(self.closed_error());
        }
        Ok(())
    }

    fn send_cancel(&self, id: u64) {
        // Best effort; the connection may already be gone.
        let _ = self.inner.outbound.send(ClientFrame::cancel(id));
    }

    fn remove_call(&self, id: u64) {
        self.inner.calls.lock().remove(&id);
    }

    fn fail_pending(&self) {
        let pending: Vec<PendingCall> = {
            let mut calls = self.inner.calls.lock();
            calls.drain().map(|(_, call)| call).collect()
        };
        for call in pending {
            let err = self.closed_error();
            match call {
                PendingCall::Unary(tx) => {
                    let _ = tx.send(Err(err));
                }
                PendingCall::Stream(tx) => {
                    let _ = tx.send(Err(err));
                }
            }
        }
    }

    fn closed_error(&self) -> OlvidError {
        OlvidError::Transport(format!("connection to {} closed", self.inner.target))
    }
}

/// Receiving side of a server-streaming call.
pub(crate) struct CallStream {
    id: u64,
    rx: mpsc::UnboundedReceiver<Result<Value>>,
    channel: Channel,
}

impl CallStream {
    /// Next stream element; `None` once the stream ended cleanly.
    pub(crate) async fn next(&mut self) -> Option<Result<Value>> {
        self.rx.recv().await
    }

    pub(crate) fn poll_next_value(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Result<Value>>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for CallStream {
    fn drop(&mut self) {
        self.channel.remove_call(self.id);
        self.channel.send_cancel(self.id);
    }
}

async fn run_writer(
    write_half: OwnedWriteHalf,
    mut outbound_rx: mpsc::UnboundedReceiver<ClientFrame>,
    token: CancellationToken,
) {
    let mut write_half = write_half;
    loop {
        let frame = tokio::select! {
            biased;
            () = token.cancelled() => break,
            frame = outbound_rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };
        let mut line = match serde_json::to_string(&frame) {
            Ok(line) => line,
            Err(e) => {
                warn!("failed to encode frame: {e}");
                continue;
            }
        };
        line.push('\n');
        if let Err(e) = write_half.write_all(line.as_bytes()).await {
            warn!("daemon connection write failed: {e}");
            token.cancel();
            break;
        }
    }
}

async fn run_reader(read_half: OwnedReadHalf, inner: Arc<ChannelInner>) {
    let mut lines = BufReader::new(read_half).lines();
    loop {
        let line = tokio::select! {
            biased;
            () = inner.token.cancelled() => break,
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<ServerFrame>(&line) {
                    Ok(frame) => route_frame(&inner, frame),
                    Err(e) => warn!("discarding unparseable daemon frame: {e}"),
                }
            }
            Ok(None) => {
                debug!(target = %inner.target, "daemon closed the connection");
                break;
            }
            Err(e) => {
                warn!(target = %inner.target, "daemon connection read failed: {e}");
                break;
            }
        }
    }
    // Connection is unusable from here on; unblock every caller.
    inner.token.cancel();
    let channel = Channel { inner };
    channel.fail_pending();
}

fn route_frame(inner: &Arc<ChannelInner>, frame: ServerFrame) {
    let mut calls = inner.calls.lock();
    let Some(call) = calls.remove(&frame.id) else {
        // Late frame for a cancelled or completed call.
        debug!(call_id = frame.id, "dropping frame for unknown call");
        return;
    };
    match call {
        PendingCall::Unary(tx) => {
            let result = if let Some(error) = frame.error {
                Err(OlvidError::Daemon(error))
            } else if let Some(result) = frame.result {
                Ok(result)
            } else {
                Err(OlvidError::Transport(
                    "unary call answered without a result".to_string(),
                ))
            };
            let _ = tx.send(result);
        }
        PendingCall::Stream(tx) => {
            if let Some(error) = frame.error {
                // Terminates the stream; the entry stays removed.
                let _ = tx.send(Err(OlvidError::Daemon(error)));
                return;
            }
            if frame.done {
                // Dropping the sender ends the stream cleanly.
                return;
            }
            if let Some(item) = frame.item {
                if tx.send(Ok(item)).is_err() {
                    // Receiver side dropped; stop routing this stream.
                    return;
                }
            } else {
                debug!(call_id = frame.id, "stream frame without item or done");
            }
            calls.insert(frame.id, PendingCall::Stream(tx));
        }
    }
}
