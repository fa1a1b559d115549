//! Rust client SDK for the Olvid daemon.
//!
//! This crate lets you drive an Olvid daemon over its RPC interface: send
//! commands (messages, contacts, groups, discussions, storage) and react to
//! daemon notifications through typed listeners.
//!
//! # Getting started
//!
//! An [`OlvidClient`] authenticates with a client key and connects to a
//! daemon at `hostname:port`. Both are resolved at construction time: an
//! explicit [`ClientConfig`] value wins, then the parent client's value (for
//! child clients), then the `OLVID_CLIENT_KEY` / `DAEMON_HOSTNAME` /
//! `DAEMON_PORT` environment variables, then a local `.client_key` file (key
//! only) or `localhost:50051` (target only).
//!
//! ```no_run
//! use olvid::OlvidClient;
//!
//! # async fn func() -> olvid::Result<()> {
//! let client = OlvidClient::connect().await?;
//! let identity = client.identity_get().await?;
//! println!("connected as {}", identity.display_name);
//! client.stop().await;
//! # Ok(()) }
//! ```
//!
//! # Notifications
//!
//! Register a [`NotificationListener`] for any [`NotificationType`]. The
//! first listener for a type lazily opens a server-streaming subscription;
//! every received event is fanned out to all listeners of that type, each
//! handler running as its own task.
//!
//! ```no_run
//! use olvid::{NotificationListener, OlvidClient};
//!
//! # async fn func() -> olvid::Result<()> {
//! let client = OlvidClient::connect().await?;
//! client.add_listener(NotificationListener::message_received(|message| async move {
//!     println!("received: {}", message.body);
//! }))?;
//! client.wait_for_listeners_end().await;
//! # Ok(()) }
//! ```
//!
//! # Bots and commands
//!
//! [`OlvidBot`] layers a command facade on top of a client: a [`Command`] is
//! a message-received listener gated by a regex match on the message body.
//!
//! # Shared connections
//!
//! A client created with [`OlvidClient::new_child`] shares its parent's
//! daemon connection and listener registry. Stopping a client stops its
//! children first; only the root client (no parent) closes the shared
//! connection. A `SIGTERM` received by the process schedules a stop of every
//! running client.

#![warn(missing_docs)]

use thiserror::Error;

mod bot;
mod client;
mod command;
mod config;
mod datatypes;
pub mod listener;
mod protocol;
mod registry;
mod runtime;
mod stubs;
#[cfg(test)]
mod tests;
#[cfg(test)]
mod testutil;
mod transport;

pub use bot::OlvidBot;
pub use client::OlvidClient;
pub use command::Command;
pub use config::ClientConfig;
pub use datatypes::{
    Contact, Discussion, Group, Identity, IdentityDetails, Invitation, InvitationStatus, Message,
    MessageFilter, MessageId, StorageElement,
};
pub use listener::{Notification, NotificationListener, NotificationType};
pub use stubs::ElementStream;

/// An error type for errors generated by this crate.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum OlvidError {
    /// No client key was provided and none could be resolved from the
    /// environment or the key file.
    #[error("client key not found")]
    ClientKeyNotFound,
    /// A child client was constructed against a parent that has already been
    /// stopped.
    #[error("parent client has been stopped")]
    ParentStopped,
    /// A mutating operation was attempted on a stopped client.
    #[error("client has been stopped")]
    ClientStopped,
    /// Failed to establish the daemon connection.
    #[error("connection to {target} failed: {source}")]
    ConnectionFailed {
        /// The `hostname:port` the connection was attempted against.
        target: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The daemon connection was lost or closed while a call was in flight.
    #[error("transport error: {0}")]
    Transport(String),
    /// The daemon answered a call with an error.
    #[error("daemon error: {0}")]
    Daemon(String),
    /// A command pattern failed to compile.
    #[error("invalid command pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
    /// A daemon payload could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
    /// An I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, OlvidError>;
