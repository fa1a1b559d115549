//! Typed call surfaces over a [`Channel`].
//!
//! One stub per daemon service, each a thin wrapper that attaches the
//! client key, names the wire method, and decodes the response. List
//! commands stream page frames from the daemon and flatten them into
//! an [`ElementStream`] of elements.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use futures_util::Stream;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::datatypes::{
    Contact, Discussion, Identity, IdentityDetails, Invitation, Message, MessageFilter, MessageId,
    StorageElement,
};
use crate::listener::NotificationType;
use crate::transport::{CallStream, Channel};
use crate::{OlvidError, Result};

/// Shared plumbing of every service stub.
#[derive(Clone)]
struct ServiceStub {
    channel: Channel,
    client_key: Arc<str>,
}

impl ServiceStub {
    async fn unary<R: DeserializeOwned>(&self, method: &str, params: Value) -> Result<R> {
        let result = self.channel.unary(method, &self.client_key, params).await?;
        serde_json::from_value(result).map_err(OlvidError::Decode)
    }

    /// Unary call whose response body is ignored.
    async fn unary_empty(&self, method: &str, params: Value) -> Result<()> {
        self.channel.unary(method, &self.client_key, params).await?;
        Ok(())
    }

    fn stream<T>(
        &self,
        method: &str,
        params: Value,
        decode_page: fn(Value) -> Result<Vec<T>>,
    ) -> Result<ElementStream<T>> {
        let call = self
            .channel
            .open_stream(method, &self.client_key, params)?;
        Ok(ElementStream {
            call,
            buffered: VecDeque::new(),
            decode_page,
        })
    }
}

/// Elements of a streamed list command.
///
/// The daemon answers list commands with a stream of page frames; this
/// stream flattens them, yielding one element at a time.
pub struct ElementStream<T> {
    call: CallStream,
    buffered: VecDeque<T>,
    decode_page: fn(Value) -> Result<Vec<T>>,
}

impl<T: Unpin> Stream for ElementStream<T> {
    type Item = Result<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.as_mut().get_mut();
        loop {
            if let Some(element) = this.buffered.pop_front() {
                return Poll::Ready(Some(Ok(element)));
            }
            match ready!(this.call.poll_next_value(cx)) {
                None => return Poll::Ready(None),
                Some(Err(err)) => return Poll::Ready(Some(Err(err))),
                Some(Ok(page)) => match (this.decode_page)(page) {
                    // Empty pages are legal, poll for the next one.
                    Ok(elements) => this.buffered.extend(elements),
                    Err(err) => return Poll::Ready(Some(Err(err))),
                },
            }
        }
    }
}

impl<T> std::fmt::Debug for ElementStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElementStream")
            .field("buffered", &self.buffered.len())
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct IdentityResponse {
    identity: Identity,
}

#[derive(Deserialize)]
struct InvitationResponse {
    invitation: Invitation,
}

#[derive(Deserialize)]
struct ContactResponse {
    contact: Contact,
}

#[derive(Deserialize)]
struct DiscussionResponse {
    discussion: Discussion,
}

#[derive(Deserialize)]
struct MessageResponse {
    message: Message,
}

#[derive(Deserialize)]
struct StorageValueResponse {
    #[serde(default)]
    value: Option<String>,
}

/// Identity service commands.
#[derive(Clone)]
pub(crate) struct IdentityCommandStub(ServiceStub);

impl IdentityCommandStub {
    pub(crate) async fn get(&self) -> Result<Identity> {
        let response: IdentityResponse = self.0.unary("IdentityGet", Value::Null).await?;
        Ok(response.identity)
    }

    pub(crate) async fn update_details(&self, details: &IdentityDetails) -> Result<Identity> {
        let response: IdentityResponse = self
            .0
            .unary("IdentityUpdateDetails", json!({"details": details}))
            .await?;
        Ok(response.identity)
    }

    pub(crate) async fn set_api_key(&self, api_key: &str) -> Result<()> {
        self.0
            .unary_empty("IdentitySetApiKey", json!({"api_key": api_key}))
            .await
    }
}

/// Invitation service commands.
#[derive(Clone)]
pub(crate) struct InvitationCommandStub(ServiceStub);

impl InvitationCommandStub {
    pub(crate) fn list(&self) -> Result<ElementStream<Invitation>> {
        self.0.stream("InvitationList", Value::Null, |page| {
            #[derive(Deserialize)]
            struct Page {
                #[serde(default)]
                invitations: Vec<Invitation>,
            }
            Ok(serde_json::from_value::<Page>(page)?.invitations)
        })
    }

    pub(crate) async fn get(&self, invitation_id: i64) -> Result<Invitation> {
        let response: InvitationResponse = self
            .0
            .unary("InvitationGet", json!({"invitation_id": invitation_id}))
            .await?;
        Ok(response.invitation)
    }

    pub(crate) async fn new_invitation(&self, invitation_url: &str) -> Result<Invitation> {
        let response: InvitationResponse = self
            .0
            .unary("InvitationNew", json!({"invitation_url": invitation_url}))
            .await?;
        Ok(response.invitation)
    }

    pub(crate) async fn accept(&self, invitation_id: i64) -> Result<()> {
        self.0
            .unary_empty("InvitationAccept", json!({"invitation_id": invitation_id}))
            .await
    }

    pub(crate) async fn decline(&self, invitation_id: i64) -> Result<()> {
        self.0
            .unary_empty("InvitationDecline", json!({"invitation_id": invitation_id}))
            .await
    }

    pub(crate) async fn delete(&self, invitation_id: i64) -> Result<()> {
        self.0
            .unary_empty("InvitationDelete", json!({"invitation_id": invitation_id}))
            .await
    }
}

/// Contact service commands.
#[derive(Clone)]
pub(crate) struct ContactCommandStub(ServiceStub);

impl ContactCommandStub {
    pub(crate) fn list(&self) -> Result<ElementStream<Contact>> {
        self.0.stream("ContactList", Value::Null, |page| {
            #[derive(Deserialize)]
            struct Page {
                #[serde(default)]
                contacts: Vec<Contact>,
            }
            Ok(serde_json::from_value::<Page>(page)?.contacts)
        })
    }

    pub(crate) async fn get(&self, contact_id: i64) -> Result<Contact> {
        let response: ContactResponse = self
            .0
            .unary("ContactGet", json!({"contact_id": contact_id}))
            .await?;
        Ok(response.contact)
    }

    pub(crate) async fn delete(&self, contact_id: i64) -> Result<()> {
        self.0
            .unary_empty("ContactDelete", json!({"contact_id": contact_id}))
            .await
    }

    pub(crate) async fn introduction(
        &self,
        first_contact_id: i64,
        second_contact_id: i64,
    ) -> Result<()> {
        self.0
            .unary_empty(
                "ContactIntroduction",
                json!({
                    "first_contact_id": first_contact_id,
                    "second_contact_id": second_contact_id,
                }),
            )
            .await
    }
}

/// Discussion service commands.
#[derive(Clone)]
pub(crate) struct DiscussionCommandStub(ServiceStub);

impl DiscussionCommandStub {
    pub(crate) fn list(&self) -> Result<ElementStream<Discussion>> {
        self.0.stream("DiscussionList", Value::Null, |page| {
            #[derive(Deserialize)]
            struct Page {
                #[serde(default)]
                discussions: Vec<Discussion>,
            }
            Ok(serde_json::from_value::<Page>(page)?.discussions)
        })
    }

    pub(crate) async fn get(&self, discussion_id: i64) -> Result<Discussion> {
        let response: DiscussionResponse = self
            .0
            .unary("DiscussionGet", json!({"discussion_id": discussion_id}))
            .await?;
        Ok(response.discussion)
    }

    pub(crate) async fn get_by_contact(&self, contact_id: i64) -> Result<Discussion> {
        let response: DiscussionResponse = self
            .0
            .unary("DiscussionGetByContact", json!({"contact_id": contact_id}))
            .await?;
        Ok(response.discussion)
    }

    pub(crate) async fn empty(&self, discussion_id: i64) -> Result<()> {
        self.0
            .unary_empty("DiscussionEmpty", json!({"discussion_id": discussion_id}))
            .await
    }
}

/// Message service commands.
#[derive(Clone)]
pub(crate) struct MessageCommandStub(ServiceStub);

impl MessageCommandStub {
    pub(crate) fn list(&self, filter: &MessageFilter) -> Result<ElementStream<Message>> {
        self.0
            .stream("MessageList", json!({"filter": filter}), |page| {
                #[derive(Deserialize)]
                struct Page {
                    #[serde(default)]
                    messages: Vec<Message>,
                }
                Ok(serde_json::from_value::<Page>(page)?.messages)
            })
    }

    pub(crate) async fn get(&self, message_id: &MessageId) -> Result<Message> {
        let response: MessageResponse = self
            .0
            .unary("MessageGet", json!({"message_id": message_id}))
            .await?;
        Ok(response.message)
    }

    pub(crate) async fn send(&self, discussion_id: i64, body: &str) -> Result<Message> {
        let response: MessageResponse = self
            .0
            .unary(
                "MessageSend",
                json!({"discussion_id": discussion_id, "body": body}),
            )
            .await?;
        Ok(response.message)
    }

    pub(crate) async fn delete(&self, message_id: &MessageId) -> Result<()> {
        self.0
            .unary_empty("MessageDelete", json!({"message_id": message_id}))
            .await
    }

    pub(crate) async fn react(&self, message_id: &MessageId, reaction: &str) -> Result<()> {
        self.0
            .unary_empty(
                "MessageReact",
                json!({"message_id": message_id, "reaction": reaction}),
            )
            .await
    }

    pub(crate) async fn update_body(&self, message_id: &MessageId, body: &str) -> Result<Message> {
        let response: MessageResponse = self
            .0
            .unary(
                "MessageUpdateBody",
                json!({"message_id": message_id, "body": body}),
            )
            .await?;
        Ok(response.message)
    }
}

/// Storage service commands (per-client key/value store).
#[derive(Clone)]
pub(crate) struct StorageCommandStub(ServiceStub);

impl StorageCommandStub {
    pub(crate) fn list(&self) -> Result<ElementStream<StorageElement>> {
        self.0.stream("StorageList", Value::Null, |page| {
            #[derive(Deserialize)]
            struct Page {
                #[serde(default)]
                elements: Vec<StorageElement>,
            }
            Ok(serde_json::from_value::<Page>(page)?.elements)
        })
    }

    pub(crate) async fn get(&self, key: &str) -> Result<Option<String>> {
        let response: StorageValueResponse =
            self.0.unary("StorageGet", json!({"key": key})).await?;
        Ok(response.value)
    }

    /// Sets `key` and returns the previous value, if any.
    pub(crate) async fn set(&self, key: &str, value: &str) -> Result<Option<String>> {
        let response: StorageValueResponse = self
            .0
            .unary("StorageSet", json!({"key": key, "value": value}))
            .await?;
        Ok(response.value)
    }

    /// Removes `key` and returns the previous value, if any.
    pub(crate) async fn unset(&self, key: &str) -> Result<Option<String>> {
        let response: StorageValueResponse =
            self.0.unary("StorageUnset", json!({"key": key})).await?;
        Ok(response.value)
    }
}

/// Notification subscriptions.
#[derive(Clone)]
pub(crate) struct NotificationStub(ServiceStub);

impl NotificationStub {
    /// Opens the server stream for one notification type. Raw elements
    /// are decoded by the registry's dispatch loop.
    pub(crate) fn subscribe(&self, notification_type: NotificationType) -> Result<CallStream> {
        self.0.channel.open_stream(
            notification_type.subscribe_method(),
            &self.0.client_key,
            Value::Null,
        )
    }
}

/// All service stubs of one client, sharing a channel and client key.
#[derive(Clone)]
pub(crate) struct StubHolder {
    pub(crate) identity: IdentityCommandStub,
    pub(crate) invitation: InvitationCommandStub,
    pub(crate) contact: ContactCommandStub,
    pub(crate) discussion: DiscussionCommandStub,
    pub(crate) message: MessageCommandStub,
    pub(crate) storage: StorageCommandStub,
    pub(crate) notification: NotificationStub,
}

impl StubHolder {
    pub(crate) fn new(channel: Channel, client_key: Arc<str>) -> Self {
        let stub = ServiceStub {
            channel,
            client_key,
        };
        Self {
            identity: IdentityCommandStub(stub.clone()),
            invitation: InvitationCommandStub(stub.clone()),
            contact: ContactCommandStub(stub.clone()),
            discussion: DiscussionCommandStub(stub.clone()),
            message: MessageCommandStub(stub.clone()),
            storage: StorageCommandStub(stub.clone()),
            notification: NotificationStub(stub),
        }
    }
}
