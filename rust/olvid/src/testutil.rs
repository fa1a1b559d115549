//! Test utilities: a scriptable in-process daemon.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::listener::NotificationType;
use crate::protocol::{ClientFrame, ServerFrame};

/// Polls `predicate` until it holds, panicking after a few seconds.
pub(crate) async fn assert_eventually(predicate: impl Fn() -> bool) {
    for _ in 0..500 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

/// A call frame observed by the mock daemon.
#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub method: String,
    pub client_key: String,
    pub params: Value,
}

struct Subscription {
    call_id: u64,
    out: mpsc::UnboundedSender<ServerFrame>,
}

#[derive(Default)]
struct DaemonState {
    /// Unary results by method name. Unconfigured methods answer `{}`.
    responses: Mutex<HashMap<String, Value>>,
    /// Page frames by method name, for streamed list commands.
    pages: Mutex<HashMap<String, Vec<Value>>>,
    /// Subscription attempts to reject with an error, by method name.
    subscription_failures: Mutex<HashMap<String, u32>>,
    requests: Mutex<Vec<RecordedRequest>>,
    subscriptions: Mutex<HashMap<String, Vec<Subscription>>>,
}

/// A scriptable daemon on a local TCP port.
///
/// Answers unary calls from a response table, serves list commands from
/// page tables, keeps subscription streams open until cancelled, and can
/// push notification frames into them.
pub(crate) struct MockDaemon {
    target: String,
    state: Arc<DaemonState>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl MockDaemon {
    pub(crate) async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock daemon");
        let target = listener
            .local_addr()
            .expect("mock daemon addr")
            .to_string();
        let state = Arc::new(DaemonState::default());
        let tasks = Arc::new(Mutex::new(Vec::new()));
        let accept_state = state.clone();
        let conn_tasks = tasks.clone();
        let accept = tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                let state = accept_state.clone();
                conn_tasks
                    .lock()
                    .push(tokio::spawn(run_connection(socket, state)));
            }
        });
        tasks.lock().push(accept);
        Self {
            target,
            state,
            tasks,
        }
    }

    /// `host:port` to connect a client to.
    pub(crate) fn target(&self) -> &str {
        &self.target
    }

    /// Scripts the result of a unary method.
    pub(crate) fn set_response(&self, method: &str, result: Value) {
        self.state
            .responses
            .lock()
            .insert(method.to_string(), result);
    }

    /// Scripts the page frames of a streamed list method.
    pub(crate) fn set_pages(&self, method: &str, pages: Vec<Value>) {
        self.state.pages.lock().insert(method.to_string(), pages);
    }

    /// Rejects the next `count` subscription attempts for a type.
    pub(crate) fn fail_next_subscriptions(&self, notification_type: NotificationType, count: u32) {
        self.state
            .subscription_failures
            .lock()
            .insert(notification_type.subscribe_method().to_string(), count);
    }

    /// Sends one notification to every open subscription of a type.
    pub(crate) fn push_notification(&self, notification_type: NotificationType, payload: Value) {
        let subscriptions = self.state.subscriptions.lock();
        let Some(subscriptions) = subscriptions.get(notification_type.subscribe_method()) else {
            return;
        };
        for subscription in subscriptions {
            let _ = subscription
                .out
                .send(ServerFrame::item(subscription.call_id, payload.clone()));
        }
    }

    /// Number of open subscription streams for a type, across all
    /// connections.
    pub(crate) fn subscription_count(&self, notification_type: NotificationType) -> usize {
        let mut subscriptions = self.state.subscriptions.lock();
        let Some(subscriptions) = subscriptions.get_mut(notification_type.subscribe_method())
        else {
            return 0;
        };
        subscriptions.retain(|subscription| !subscription.out.is_closed());
        subscriptions.len()
    }

    /// Every call frame received so far.
    pub(crate) fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().clone()
    }

    /// Requests for one method.
    pub(crate) fn requests_for(&self, method: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.method == method)
            .collect()
    }
}

impl Drop for MockDaemon {
    fn drop(&mut self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

async fn run_connection(socket: TcpStream, state: Arc<DaemonState>) {
    let (reader, mut writer) = socket.into_split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerFrame>();
    let writer_task = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            let Ok(mut line) = serde_json::to_string(&frame) else {
                return;
            };
            line.push('\n');
            if writer.write_all(line.as_bytes()).await.is_err() {
                return;
            }
        }
    });

    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let Ok(frame) = serde_json::from_str::<ClientFrame>(&line) else {
            continue;
        };
        match frame {
            ClientFrame::Call {
                id,
                method,
                client_key,
                params,
            } => {
                state.requests.lock().push(RecordedRequest {
                    method: method.clone(),
                    client_key,
                    params,
                });
                handle_call(&state, &out_tx, id, &method);
            }
            ClientFrame::Cancel { id, .. } => {
                let mut subscriptions = state.subscriptions.lock();
                for open in subscriptions.values_mut() {
                    open.retain(|subscription| subscription.call_id != id);
                }
            }
        }
    }
    writer_task.abort();
}

fn handle_call(
    state: &Arc<DaemonState>,
    out: &mpsc::UnboundedSender<ServerFrame>,
    id: u64,
    method: &str,
) {
    if method.starts_with("SubscribeTo") {
        let mut failures = state.subscription_failures.lock();
        if let Some(remaining) = failures.get_mut(method) {
            if *remaining > 0 {
                *remaining -= 1;
                let _ = out.send(ServerFrame::error(id, "subscription refused"));
                return;
            }
        }
        drop(failures);
        state
            .subscriptions
            .lock()
            .entry(method.to_string())
            .or_default()
            .push(Subscription {
                call_id: id,
                out: out.clone(),
            });
        return;
    }
    if let Some(pages) = state.pages.lock().get(method) {
        for page in pages {
            let _ = out.send(ServerFrame::item(id, page.clone()));
        }
        let _ = out.send(ServerFrame::done(id));
        return;
    }
    let result = state
        .responses
        .lock()
        .get(method)
        .cloned()
        .unwrap_or_else(|| json!({}));
    let _ = out.send(ServerFrame::result(id, result));
}
