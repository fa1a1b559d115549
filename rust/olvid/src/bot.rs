//! Bot facade: a named client plus command registration.

use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::client::OlvidClient;
use crate::command::Command;
use crate::config::ClientConfig;
use crate::datatypes::Message;
use crate::listener::NotificationListener;
use crate::Result;

/// A named [`OlvidClient`] with explicit listener and command wiring.
///
/// The bot derefs to its client, so the whole command API is available
/// on it directly. Handlers are declared up front with
/// [`OlvidBot::register_notification`] and [`OlvidBot::add_command`];
/// each registration opens at most one subscription stream per
/// notification type.
pub struct OlvidBot {
    name: String,
    client: OlvidClient,
    commands: Mutex<Vec<Arc<Command>>>,
}

impl OlvidBot {
    /// Connects a new bot, resolving configuration like
    /// [`OlvidClient::connect`].
    pub async fn connect(name: impl Into<String>) -> Result<Self> {
        Self::connect_with(name, ClientConfig::default()).await
    }

    /// Connects a new bot with explicit configuration.
    pub async fn connect_with(name: impl Into<String>, client_config: ClientConfig) -> Result<Self> {
        let client = OlvidClient::connect_with(client_config).await?;
        Ok(Self::from_client(name, client))
    }

    /// Wraps an existing client (for example a child client) into a bot.
    pub fn from_client(name: impl Into<String>, client: OlvidClient) -> Self {
        let name = name.into();
        info!(bot = name, "bot ready");
        Self {
            name,
            client,
            commands: Mutex::new(Vec::new()),
        }
    }

    /// The bot's name, used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The underlying client handle.
    pub fn client(&self) -> &OlvidClient {
        &self.client
    }

    /// Registers a notification listener on the bot's client.
    pub fn register_notification(
        &self,
        listener: impl Into<Arc<NotificationListener>>,
    ) -> Result<Arc<NotificationListener>> {
        let listener = self.client.add_listener(listener)?;
        debug!(bot = self.name, listener = listener.key(), "listener registered");
        Ok(listener)
    }

    /// Registers a handler for every received message.
    pub fn on_message_received<F, Fut>(&self, handler: F) -> Result<Arc<NotificationListener>>
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.register_notification(NotificationListener::message_received(handler))
    }

    /// Registers a command; its handler fires on received messages whose
    /// body matches the command's pattern.
    pub fn add_command(&self, command: Command) -> Result<Arc<Command>> {
        let command = Arc::new(command);
        self.client.add_listener(command.listener().clone())?;
        debug!(bot = self.name, pattern = command.pattern(), "command registered");
        self.commands.lock().push(command.clone());
        Ok(command)
    }

    /// Removes a command and its underlying listener.
    pub async fn remove_command(&self, command: &Arc<Command>) {
        self.commands
            .lock()
            .retain(|registered| !Arc::ptr_eq(registered, command));
        self.client.remove_listener(command.listener()).await;
    }

    /// True if `body` would trigger at least one registered command.
    pub fn is_message_body_a_valid_command(&self, body: &str) -> bool {
        self.commands
            .lock()
            .iter()
            .any(|command| command.match_str(body))
    }
}

impl Deref for OlvidBot {
    type Target = OlvidClient;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

impl std::fmt::Debug for OlvidBot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OlvidBot")
            .field("name", &self.name)
            .field("commands", &self.commands.lock().len())
            .field("client", &self.client)
            .finish()
    }
}
