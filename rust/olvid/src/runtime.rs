//! Process-wide registry of running clients and signal-driven shutdown.
//!
//! Every root or child client registers here while it runs. A single
//! background task, installed on first registration, waits for a stop
//! signal and stops every running client, which closes their
//! connections and ends `wait_for_listeners_end` waits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{error, info};

use crate::client::ClientInner;

static RUNNING_CLIENTS: Mutex<Vec<Weak<ClientInner>>> = Mutex::new(Vec::new());
static SIGNAL_TASK_INSTALLED: AtomicBool = AtomicBool::new(false);

pub(crate) fn register_client(client: &Arc<ClientInner>) {
    RUNNING_CLIENTS.lock().push(Arc::downgrade(client));
    if !SIGNAL_TASK_INSTALLED.swap(true, Ordering::AcqRel) {
        tokio::spawn(signal_task());
    }
}

pub(crate) fn deregister_client(client: &Arc<ClientInner>) {
    RUNNING_CLIENTS
        .lock()
        .retain(|weak| weak.strong_count() > 0 && !std::ptr::eq(weak.as_ptr(), Arc::as_ptr(client)));
}

/// Stops every currently running client.
pub(crate) fn stop_all_running_clients() {
    let clients: Vec<Arc<ClientInner>> = RUNNING_CLIENTS
        .lock()
        .iter()
        .filter_map(Weak::upgrade)
        .collect();
    for client in clients {
        tokio::spawn(client.stop());
    }
}

async fn signal_task() {
    loop {
        match wait_for_stop_signal().await {
            Ok(()) => {
                info!("stop signal received, stopping all running clients");
                stop_all_running_clients();
            }
            Err(err) => {
                error!(error = %err, "cannot listen for stop signals");
                return;
            }
        }
    }
}

#[cfg(unix)]
async fn wait_for_stop_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::select! {
        _ = sigterm.recv() => Ok(()),
        _ = sigint.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_stop_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
