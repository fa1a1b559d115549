//! Daemon domain types.
//!
//! These mirror the payloads exchanged with the daemon; they are plain data
//! and carry no connection state.

use serde::{Deserialize, Serialize};

/// The public details attached to an identity or contact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityDetails {
    /// First name.
    #[serde(default)]
    pub first_name: String,
    /// Last name.
    #[serde(default)]
    pub last_name: String,
    /// Position within `company`.
    #[serde(default)]
    pub position: String,
    /// Company or organization.
    #[serde(default)]
    pub company: String,
}

/// The daemon-side identity this client key is bound to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Display name computed by the daemon.
    #[serde(default)]
    pub display_name: String,
    /// Published identity details.
    #[serde(default)]
    pub details: IdentityDetails,
}

/// Identifies a message within the daemon.
///
/// Message ids are scoped by direction: an inbound and an outbound message
/// may share the same numeric id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId {
    /// Numeric id, unique within a direction.
    pub id: i64,
    /// True for messages sent by this identity.
    #[serde(default)]
    pub outbound: bool,
}

/// A message in a discussion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Message id.
    pub id: MessageId,
    /// The discussion this message belongs to.
    pub discussion_id: i64,
    /// Sending contact, absent for outbound messages.
    #[serde(default)]
    pub sender_id: Option<i64>,
    /// Message body.
    #[serde(default)]
    pub body: String,
}

/// Filter for [`crate::OlvidClient::message_list`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageFilter {
    /// Only list messages in this discussion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discussion_id: Option<i64>,
    /// Only list messages whose body contains this text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_contains: Option<String>,
}

/// A contact of the current identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    /// Contact id.
    pub id: i64,
    /// Display name computed by the daemon.
    #[serde(default)]
    pub display_name: String,
    /// Published details, when known.
    #[serde(default)]
    pub details: IdentityDetails,
}

/// A group this identity is a member of.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Group id.
    pub id: i64,
    /// Group name.
    #[serde(default)]
    pub name: String,
    /// Group description.
    #[serde(default)]
    pub description: String,
}

/// A discussion, backed by either a one-to-one contact or a group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discussion {
    /// Discussion id.
    pub id: i64,
    /// Discussion title.
    #[serde(default)]
    pub title: String,
    /// Set for one-to-one discussions.
    #[serde(default)]
    pub contact_id: Option<i64>,
    /// Set for group discussions.
    #[serde(default)]
    pub group_id: Option<i64>,
}

/// Invitation progress, as tracked by the daemon.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvitationStatus {
    /// Waiting on one of the two parties.
    #[default]
    Pending,
    /// Accepted, channel establishment in progress.
    Accepted,
    /// Declined by either party.
    Declined,
}

/// An inbound or outbound invitation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invitation {
    /// Invitation id.
    pub id: i64,
    /// Display name of the other party.
    #[serde(default)]
    pub display_name: String,
    /// Current status.
    #[serde(default)]
    pub status: InvitationStatus,
}

/// A key/value element in the daemon-side storage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageElement {
    /// Storage key.
    pub key: String,
    /// Stored value.
    #[serde(default)]
    pub value: String,
}
