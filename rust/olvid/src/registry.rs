//! Shared listener registry and notification dispatch.
//!
//! One registry per connection, shared by every client of a tree. The
//! registry keeps at most one subscription stream per notification type:
//! the first listener of a type opens the stream, removing the last one
//! tears it down. Received events fan out to every listener of the type,
//! each handler running in its own task so a slow or panicking handler
//! cannot stall the others.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::FutureExt;
use parking_lot::Mutex;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn};

use crate::listener::{NotificationListener, NotificationType};
use crate::stubs::NotificationStub;

/// Consecutive stream failures tolerated before a subscription is
/// abandoned. Resets after every received event.
const MAX_RESUBSCRIBE_ATTEMPTS: u32 = 5;
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

struct TypeEntry {
    listeners: Vec<Arc<NotificationListener>>,
    task: JoinHandle<()>,
    token: CancellationToken,
}

pub(crate) struct RegistryInner {
    stub: NotificationStub,
    entries: Mutex<HashMap<NotificationType, TypeEntry>>,
    /// Tracks in-flight handler tasks so `stop` can await them.
    handler_tasks: TaskTracker,
    /// Notified when a listener is removed or finishes.
    listener_changed: Notify,
    stopped: AtomicBool,
}

#[derive(Clone)]
pub(crate) struct ListenerRegistry {
    inner: Arc<RegistryInner>,
}

impl ListenerRegistry {
    pub(crate) fn new(stub: NotificationStub) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                stub,
                entries: Mutex::new(HashMap::new()),
                handler_tasks: TaskTracker::new(),
                listener_changed: Notify::new(),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    /// Registers a listener, opening the subscription stream for its type
    /// if it is the first one. Re-adding a registered listener is a no-op.
    pub(crate) fn add_listener(&self, listener: Arc<NotificationListener>) {
        if self.inner.stopped.load(Ordering::Acquire) {
            warn!(
                listener = listener.key(),
                "listener added to a stopped registry, ignoring"
            );
            return;
        }
        let notification_type = listener.notification_type();
        let mut entries = self.inner.entries.lock();
        match entries.get_mut(&notification_type) {
            Some(entry) => {
                if entry.listeners.iter().any(|l| l.id() == listener.id()) {
                    return;
                }
                entry.listeners.push(listener);
            }
            None => {
                let token = CancellationToken::new();
                let task = tokio::spawn(run_stream_task(
                    self.inner.clone(),
                    notification_type,
                    token.clone(),
                ));
                debug!(%notification_type, "first listener, subscribing");
                entries.insert(
                    notification_type,
                    TypeEntry {
                        listeners: vec![listener],
                        task,
                        token,
                    },
                );
            }
        }
    }

    /// Removes a listener; tears the subscription stream down if it was
    /// the last one of its type.
    pub(crate) async fn remove_listener(&self, listener: &Arc<NotificationListener>) {
        let drained = {
            let mut entries = self.inner.entries.lock();
            let Some(entry) = entries.get_mut(&listener.notification_type()) else {
                return;
            };
            let before = entry.listeners.len();
            entry.listeners.retain(|l| l.id() != listener.id());
            if entry.listeners.len() == before {
                return;
            }
            if entry.listeners.is_empty() {
                entries.remove(&listener.notification_type())
            } else {
                None
            }
        };
        if let Some(entry) = drained {
            debug!(notification_type = %listener.notification_type(), "last listener removed, unsubscribing");
            stop_entry(entry).await;
        }
        self.inner.listener_changed.notify_waiters();
    }

    /// Tears down all subscription streams and awaits in-flight handlers.
    pub(crate) async fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        let drained: Vec<TypeEntry> = {
            let mut entries = self.inner.entries.lock();
            entries.drain().map(|(_, entry)| entry).collect()
        };
        for entry in drained {
            stop_entry(entry).await;
        }
        self.inner.handler_tasks.close();
        self.inner.handler_tasks.wait().await;
        self.inner.listener_changed.notify_waiters();
    }

    /// Future resolving the next time a listener is removed or finishes.
    /// Create it before inspecting listener state to avoid missed wakeups.
    pub(crate) fn listener_changed(&self) -> Notified<'_> {
        self.inner.listener_changed.notified()
    }
}

async fn stop_entry(entry: TypeEntry) {
    entry.token.cancel();
    if let Err(err) = entry.task.await {
        if !err.is_cancelled() {
            warn!(error = %err, "subscription task failed during teardown");
        }
    }
}

/// Owns one notification type's subscription stream, redialing on
/// transient failures until cancelled or out of attempts.
async fn run_stream_task(
    inner: Arc<RegistryInner>,
    notification_type: NotificationType,
    token: CancellationToken,
) {
    let mut attempts: u32 = 0;
    loop {
        let mut stream = match inner.stub.subscribe(notification_type) {
            Ok(stream) => stream,
            Err(err) => {
                warn!(%notification_type, error = %err, "subscription failed");
                if !retry_delay(&token, &mut attempts).await {
                    return;
                }
                continue;
            }
        };
        debug!(%notification_type, "notification stream opened");
        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => return,
                element = stream.next() => match element {
                    Some(Ok(value)) => {
                        attempts = 0;
                        dispatch(&inner, notification_type, value);
                    }
                    Some(Err(err)) => {
                        warn!(%notification_type, error = %err, "notification stream failed");
                        break;
                    }
                    // A clean close from the daemon is retriable too.
                    None => {
                        debug!(%notification_type, "notification stream closed");
                        break;
                    }
                },
            }
        }
        if !retry_delay(&token, &mut attempts).await {
            return;
        }
    }
}

/// Waits before the next subscription attempt. False means give up:
/// either cancelled or out of attempts.
async fn retry_delay(token: &CancellationToken, attempts: &mut u32) -> bool {
    *attempts += 1;
    if *attempts > MAX_RESUBSCRIBE_ATTEMPTS {
        error!("giving up on subscription after {MAX_RESUBSCRIBE_ATTEMPTS} attempts");
        return false;
    }
    tokio::select! {
        biased;
        () = token.cancelled() => false,
        () = tokio::time::sleep(RESUBSCRIBE_DELAY) => true,
    }
}

/// Fans one raw event out to every listener of its type. Each handler
/// runs in its own tracked task.
fn dispatch(inner: &Arc<RegistryInner>, notification_type: NotificationType, value: serde_json::Value) {
    let notification = match notification_type.decode(value) {
        Ok(notification) => notification,
        Err(err) => {
            warn!(%notification_type, error = %err, "dropping undecodable notification");
            return;
        }
    };
    let listeners: Vec<Arc<NotificationListener>> = {
        let entries = inner.entries.lock();
        match entries.get(&notification_type) {
            Some(entry) => entry.listeners.clone(),
            None => return,
        }
    };
    for listener in listeners {
        if listener.is_finished() {
            continue;
        }
        let notification = notification.clone();
        let registry = ListenerRegistry {
            inner: inner.clone(),
        };
        inner.handler_tasks.spawn(async move {
            let delivery = std::panic::AssertUnwindSafe(listener.deliver(notification));
            if delivery.catch_unwind().await.is_err() {
                error!(listener = listener.key(), "listener handler panicked");
            }
            // One-shot listeners come off the registry as soon as their
            // limit is reached, closing the stream if they were the last.
            if listener.is_finished() {
                registry.remove_listener(&listener).await;
                registry.inner.listener_changed.notify_waiters();
            }
        });
    }
}
