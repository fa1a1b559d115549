//! The daemon client: connection lifecycle, listeners, commands.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use futures_util::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::{self, ClientConfig};
use crate::datatypes::{
    Contact, Discussion, Identity, IdentityDetails, Invitation, Message, MessageFilter, MessageId,
    StorageElement,
};
use crate::listener::NotificationListener;
use crate::registry::ListenerRegistry;
use crate::runtime;
use crate::stubs::{ElementStream, StubHolder};
use crate::transport::Channel;
use crate::{OlvidError, Result};

/// A connection-scoped handle to the Olvid daemon.
///
/// A root client owns a connection; child clients created with
/// [`OlvidClient::new_child`] share it under their own client key.
/// Stopping a client stops its children first, removes its listeners,
/// and, for a root client, closes the connection.
///
/// Cloning is cheap and yields a handle to the same client.
#[derive(Clone)]
pub struct OlvidClient {
    inner: Arc<ClientInner>,
}

pub(crate) struct ClientInner {
    client_key: Arc<str>,
    server_target: String,
    parent: Option<Weak<ClientInner>>,
    children: Mutex<Vec<Arc<ClientInner>>>,
    channel: Channel,
    stubs: StubHolder,
    registry: ListenerRegistry,
    /// Listeners registered through this client, removed on stop.
    listeners: Mutex<HashMap<u64, Arc<NotificationListener>>>,
    tasks: TaskTracker,
    stopped: AtomicBool,
    stopped_notify: Notify,
}

impl OlvidClient {
    /// Connects to the daemon, resolving key and target from the
    /// environment and the key file.
    pub async fn connect() -> Result<Self> {
        Self::connect_with(ClientConfig::default()).await
    }

    /// Connects with explicit configuration; unset fields fall back to
    /// environment variables, the key file, and built-in defaults.
    pub async fn connect_with(client_config: ClientConfig) -> Result<Self> {
        let ClientConfig {
            client_key,
            server_target,
        } = client_config;
        let client_key = config::resolve_client_key(client_key, None)?;
        let server_target = config::resolve_server_target(server_target, None);
        let channel = Channel::open(&server_target).await?;
        let client = Self::assemble(client_key, server_target, channel, None, None);
        info!(
            target = client.inner.server_target,
            "connected to the daemon"
        );
        Ok(client)
    }

    /// Creates a child client sharing this client's connection and
    /// listener registry, with this client's key as the key fallback.
    pub fn new_child(&self) -> Result<Self> {
        self.new_child_with(ClientConfig::default())
    }

    /// Creates a child client with explicit configuration.
    ///
    /// Fails with [`OlvidError::ParentStopped`] once this client has
    /// been stopped.
    pub fn new_child_with(&self, client_config: ClientConfig) -> Result<Self> {
        if self.inner.stopped.load(Ordering::Acquire) {
            return Err(OlvidError::ParentStopped);
        }
        let client_key =
            config::resolve_client_key(client_config.client_key, Some(&self.inner.client_key))?;
        let child = Self::assemble(
            client_key,
            self.inner.server_target.clone(),
            self.inner.channel.clone(),
            Some(self.inner.registry.clone()),
            Some(Arc::downgrade(&self.inner)),
        );
        self.inner.children.lock().push(child.inner.clone());
        debug!(parent = %self.inner.client_key, "child client created");
        Ok(child)
    }

    fn assemble(
        client_key: String,
        server_target: String,
        channel: Channel,
        registry: Option<ListenerRegistry>,
        parent: Option<Weak<ClientInner>>,
    ) -> Self {
        let client_key: Arc<str> = client_key.into();
        let stubs = StubHolder::new(channel.clone(), client_key.clone());
        let registry =
            registry.unwrap_or_else(|| ListenerRegistry::new(stubs.notification.clone()));
        let inner = Arc::new(ClientInner {
            client_key,
            server_target,
            parent,
            children: Mutex::new(Vec::new()),
            channel,
            stubs,
            registry,
            listeners: Mutex::new(HashMap::new()),
            tasks: TaskTracker::new(),
            stopped: AtomicBool::new(false),
            stopped_notify: Notify::new(),
        });
        runtime::register_client(&inner);
        Self { inner }
    }

    /// Stops this client: children first, then its listeners; a root
    /// client also tears down subscriptions and closes the connection.
    /// Stopping twice is a logged no-op.
    pub async fn stop(&self) {
        self.inner.stop().await;
    }

    /// Registers a listener on this client.
    ///
    /// The first listener of a notification type opens that type's
    /// subscription stream. Re-adding a registered listener has no
    /// additional effect.
    pub fn add_listener(
        &self,
        listener: impl Into<Arc<NotificationListener>>,
    ) -> Result<Arc<NotificationListener>> {
        self.ensure_running()?;
        let listener = listener.into();
        self.inner
            .listeners
            .lock()
            .insert(listener.id(), listener.clone());
        self.inner.registry.add_listener(listener.clone());
        Ok(listener)
    }

    /// Removes a listener; closes its notification stream if it was the
    /// last one of its type across the whole client tree.
    pub async fn remove_listener(&self, listener: &Arc<NotificationListener>) {
        self.inner.listeners.lock().remove(&listener.id());
        self.inner.registry.remove_listener(listener).await;
    }

    /// Removes every listener registered through this client.
    pub async fn remove_all_listeners(&self) {
        let listeners: Vec<_> = {
            let mut listeners = self.inner.listeners.lock();
            listeners.drain().map(|(_, listener)| listener).collect()
        };
        for listener in &listeners {
            self.inner.registry.remove_listener(listener).await;
        }
    }

    /// True when every listener registered through this client has
    /// finished (or none remain). Finished listeners are pruned.
    pub fn are_listeners_finished(&self) -> bool {
        let mut listeners = self.inner.listeners.lock();
        listeners.retain(|_, listener| !listener.is_finished());
        listeners.is_empty()
    }

    /// Waits until this client's listeners have all finished or the
    /// client is stopped. Returns immediately if either already holds.
    pub async fn wait_for_listeners_end(&self) {
        loop {
            // Create the futures before checking, so a change between
            // the check and the await still wakes us.
            let changed = self.inner.registry.listener_changed();
            let stopped = self.inner.stopped_notify.notified();
            if self.inner.stopped.load(Ordering::Acquire) || self.are_listeners_finished() {
                return;
            }
            tokio::select! {
                () = changed => {}
                () = stopped => {}
            }
        }
    }

    /// Spawns a background task tied to this client's lifetime tracker.
    pub fn add_background_task<F>(&self, name: &str, task: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        debug!(task = name, "spawning background task");
        self.inner.tasks.spawn(task)
    }

    /// The client key sent with every call.
    pub fn client_key(&self) -> &str {
        &self.inner.client_key
    }

    /// The `host:port` this client tree is connected to.
    pub fn server_target(&self) -> &str {
        &self.inner.server_target
    }

    /// True once [`OlvidClient::stop`] ran (or a stop signal did).
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_stopped() {
            return Err(OlvidError::ClientStopped);
        }
        Ok(())
    }

    // Identity commands.

    /// Retrieves the current identity.
    pub async fn identity_get(&self) -> Result<Identity> {
        debug!("identity_get");
        self.ensure_running()?;
        self.inner.stubs.identity.get().await
    }

    /// Publishes new identity details.
    pub async fn identity_update_details(&self, details: &IdentityDetails) -> Result<Identity> {
        debug!("identity_update_details");
        self.ensure_running()?;
        self.inner.stubs.identity.update_details(details).await
    }

    /// Sets the identity's API key.
    pub async fn identity_set_api_key(&self, api_key: &str) -> Result<()> {
        debug!("identity_set_api_key");
        self.ensure_running()?;
        self.inner.stubs.identity.set_api_key(api_key).await
    }

    // Invitation commands.

    /// Streams all pending invitations.
    pub fn invitation_list(&self) -> Result<ElementStream<Invitation>> {
        debug!("invitation_list");
        self.ensure_running()?;
        self.inner.stubs.invitation.list()
    }

    /// Retrieves one invitation.
    pub async fn invitation_get(&self, invitation_id: i64) -> Result<Invitation> {
        debug!("invitation_get");
        self.ensure_running()?;
        self.inner.stubs.invitation.get(invitation_id).await
    }

    /// Sends an invitation to an Olvid invitation url.
    pub async fn invitation_new(&self, invitation_url: &str) -> Result<Invitation> {
        debug!("invitation_new");
        self.ensure_running()?;
        self.inner
            .stubs
            .invitation
            .new_invitation(invitation_url)
            .await
    }

    /// Accepts a received invitation.
    pub async fn invitation_accept(&self, invitation_id: i64) -> Result<()> {
        debug!("invitation_accept");
        self.ensure_running()?;
        self.inner.stubs.invitation.accept(invitation_id).await
    }

    /// Declines a received invitation.
    pub async fn invitation_decline(&self, invitation_id: i64) -> Result<()> {
        debug!("invitation_decline");
        self.ensure_running()?;
        self.inner.stubs.invitation.decline(invitation_id).await
    }

    /// Deletes an invitation.
    pub async fn invitation_delete(&self, invitation_id: i64) -> Result<()> {
        debug!("invitation_delete");
        self.ensure_running()?;
        self.inner.stubs.invitation.delete(invitation_id).await
    }

    // Contact commands.

    /// Streams all contacts.
    pub fn contact_list(&self) -> Result<ElementStream<Contact>> {
        debug!("contact_list");
        self.ensure_running()?;
        self.inner.stubs.contact.list()
    }

    /// Retrieves one contact.
    pub async fn contact_get(&self, contact_id: i64) -> Result<Contact> {
        debug!("contact_get");
        self.ensure_running()?;
        self.inner.stubs.contact.get(contact_id).await
    }

    /// Deletes a contact.
    pub async fn contact_delete(&self, contact_id: i64) -> Result<()> {
        debug!("contact_delete");
        self.ensure_running()?;
        self.inner.stubs.contact.delete(contact_id).await
    }

    /// Introduces two contacts to each other.
    pub async fn contact_introduction(
        &self,
        first_contact_id: i64,
        second_contact_id: i64,
    ) -> Result<()> {
        debug!("contact_introduction");
        self.ensure_running()?;
        self.inner
            .stubs
            .contact
            .introduction(first_contact_id, second_contact_id)
            .await
    }

    // Discussion commands.

    /// Streams all discussions.
    pub fn discussion_list(&self) -> Result<ElementStream<Discussion>> {
        debug!("discussion_list");
        self.ensure_running()?;
        self.inner.stubs.discussion.list()
    }

    /// Retrieves one discussion.
    pub async fn discussion_get(&self, discussion_id: i64) -> Result<Discussion> {
        debug!("discussion_get");
        self.ensure_running()?;
        self.inner.stubs.discussion.get(discussion_id).await
    }

    /// Retrieves the one-to-one discussion with a contact.
    pub async fn discussion_get_by_contact(&self, contact_id: i64) -> Result<Discussion> {
        debug!("discussion_get_by_contact");
        self.ensure_running()?;
        self.inner.stubs.discussion.get_by_contact(contact_id).await
    }

    /// Deletes every message of a discussion.
    pub async fn discussion_empty(&self, discussion_id: i64) -> Result<()> {
        debug!("discussion_empty");
        self.ensure_running()?;
        self.inner.stubs.discussion.empty(discussion_id).await
    }

    // Message commands.

    /// Streams messages matching `filter`.
    pub fn message_list(&self, filter: &MessageFilter) -> Result<ElementStream<Message>> {
        debug!("message_list");
        self.ensure_running()?;
        self.inner.stubs.message.list(filter)
    }

    /// Retrieves one message.
    pub async fn message_get(&self, message_id: &MessageId) -> Result<Message> {
        debug!("message_get");
        self.ensure_running()?;
        self.inner.stubs.message.get(message_id).await
    }

    /// Sends a message in a discussion and returns it.
    pub async fn message_send(&self, discussion_id: i64, body: &str) -> Result<Message> {
        debug!(discussion_id, "message_send");
        self.ensure_running()?;
        self.inner.stubs.message.send(discussion_id, body).await
    }

    /// Deletes a message.
    pub async fn message_delete(&self, message_id: &MessageId) -> Result<()> {
        debug!("message_delete");
        self.ensure_running()?;
        self.inner.stubs.message.delete(message_id).await
    }

    /// Reacts to a message with an emoji; an empty reaction clears it.
    pub async fn message_react(&self, message_id: &MessageId, reaction: &str) -> Result<()> {
        debug!("message_react");
        self.ensure_running()?;
        self.inner.stubs.message.react(message_id, reaction).await
    }

    /// Edits the body of a sent message.
    pub async fn message_update_body(
        &self,
        message_id: &MessageId,
        body: &str,
    ) -> Result<Message> {
        debug!("message_update_body");
        self.ensure_running()?;
        self.inner.stubs.message.update_body(message_id, body).await
    }

    // Storage commands (daemon-side key/value store scoped by client key).

    /// Streams every element of this client's storage.
    pub fn storage_list(&self) -> Result<ElementStream<StorageElement>> {
        debug!("storage_list");
        self.ensure_running()?;
        self.inner.stubs.storage.list()
    }

    /// Reads a storage value.
    pub async fn storage_get(&self, key: &str) -> Result<Option<String>> {
        debug!(key, "storage_get");
        self.ensure_running()?;
        self.inner.stubs.storage.get(key).await
    }

    /// Writes a storage value; returns the previous value, if any.
    pub async fn storage_set(&self, key: &str, value: &str) -> Result<Option<String>> {
        debug!(key, "storage_set");
        self.ensure_running()?;
        self.inner.stubs.storage.set(key, value).await
    }

    /// Removes a storage key; returns the removed value, if any.
    pub async fn storage_unset(&self, key: &str) -> Result<Option<String>> {
        debug!(key, "storage_unset");
        self.ensure_running()?;
        self.inner.stubs.storage.unset(key).await
    }
}

impl std::fmt::Debug for OlvidClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OlvidClient")
            .field("server_target", &self.inner.server_target)
            .field("root", &self.inner.parent.is_none())
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}

impl ClientInner {
    /// Stops this client and its subtree. Boxed so the recursion through
    /// children has a nameable future type.
    pub(crate) fn stop(self: &Arc<Self>) -> BoxFuture<'static, ()> {
        let inner = self.clone();
        async move {
            if inner.stopped.swap(true, Ordering::AcqRel) {
                warn!("client already stopped");
                return;
            }
            let children: Vec<Arc<ClientInner>> = {
                let mut children = inner.children.lock();
                children.drain(..).collect()
            };
            for child in children {
                child.stop().await;
            }
            let listeners: Vec<Arc<NotificationListener>> = {
                let mut listeners = inner.listeners.lock();
                listeners.drain().map(|(_, listener)| listener).collect()
            };
            for listener in &listeners {
                inner.registry.remove_listener(listener).await;
            }
            match &inner.parent {
                // Detach so the parent's own stop skips this subtree.
                Some(parent) => {
                    if let Some(parent) = parent.upgrade() {
                        parent
                            .children
                            .lock()
                            .retain(|child| !Arc::ptr_eq(child, &inner));
                    }
                }
                // The root owns the shared registry and the connection.
                None => {
                    inner.registry.stop().await;
                    inner.channel.close().await;
                }
            }
            runtime::deregister_client(&inner);
            inner.tasks.close();
            inner.stopped_notify.notify_waiters();
            debug!("client stopped");
        }
        .boxed()
    }
}
