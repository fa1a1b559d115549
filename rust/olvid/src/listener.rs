//! Notification types and listeners.
//!
//! The daemon exposes a fixed set of notification categories, each with its
//! own server-streaming subscription and payload. A [`NotificationListener`]
//! binds an async handler to one [`NotificationType`]; the registry fans
//! every received event out to all listeners of that type.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};

use crate::datatypes::{Contact, Discussion, Group, IdentityDetails, Invitation, Message};
use crate::{OlvidError, Result};

/// Sentinel for listeners without a delivery limit.
const UNLIMITED: u64 = u64::MAX;

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

macro_rules! notifications {
    (
        $(
            $(#[$vmeta:meta])*
            $variant:ident => $payload:ident {
                $(
                    $(#[$fmeta:meta])*
                    $field:ident : $fty:ty
                ),* $(,)?
            }
        ),* $(,)?
    ) => {
        /// One of the daemon's notification categories.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum NotificationType {
            $(
                $(#[$vmeta])*
                $variant,
            )*
        }

        impl NotificationType {
            /// Every notification type, in wire order.
            pub const ALL: &'static [NotificationType] = &[
                $(NotificationType::$variant,)*
            ];

            /// Wire name of this notification type.
            pub fn name(self) -> &'static str {
                match self {
                    $(NotificationType::$variant => stringify!($variant),)*
                }
            }

            /// Method name of this type's subscription call.
            pub(crate) fn subscribe_method(self) -> &'static str {
                match self {
                    $(NotificationType::$variant => concat!("SubscribeTo", stringify!($variant)),)*
                }
            }

            /// Decodes a raw stream element into a typed notification.
            pub(crate) fn decode(self, value: serde_json::Value) -> Result<Notification> {
                match self {
                    $(
                        NotificationType::$variant => Ok(Notification::$variant(
                            serde_json::from_value::<$payload>(value).map_err(OlvidError::Decode)?,
                        )),
                    )*
                }
            }
        }

        impl std::fmt::Display for NotificationType {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.name())
            }
        }

        $(
            $(#[$vmeta])*
            #[derive(Debug, Clone, Default, Serialize, Deserialize)]
            pub struct $payload {
                $(
                    $(#[$fmeta])*
                    pub $field: $fty,
                )*
            }
        )*

        /// A decoded daemon notification.
        ///
        /// Events that describe a state change ("updated" notifications)
        /// carry both the new state and the previous value.
        #[derive(Debug, Clone)]
        pub enum Notification {
            $(
                $(#[$vmeta])*
                $variant($payload),
            )*
        }

        impl Notification {
            /// The category of this notification.
            pub fn notification_type(&self) -> NotificationType {
                match self {
                    $(Notification::$variant(_) => NotificationType::$variant,)*
                }
            }
        }
    };
}

notifications! {
    /// A new invitation was received.
    InvitationReceived => InvitationReceivedNotification {
        /// The received invitation.
        invitation: Invitation,
    },
    /// An invitation was deleted (accepted, declined or withdrawn).
    InvitationDeleted => InvitationDeletedNotification {
        /// The deleted invitation.
        invitation: Invitation,
    },
    /// A new contact was added.
    ContactNew => ContactNewNotification {
        /// The new contact.
        contact: Contact,
    },
    /// A contact was deleted.
    ContactDeleted => ContactDeletedNotification {
        /// The deleted contact.
        contact: Contact,
    },
    /// A contact published new details.
    ContactDetailsUpdated => ContactDetailsUpdatedNotification {
        /// The contact, with its new details applied.
        contact: Contact,
        /// The details before the update.
        previous_details: IdentityDetails,
    },
    /// A new group was created or joined.
    GroupNew => GroupNewNotification {
        /// The new group.
        group: Group,
    },
    /// A group was disbanded or left.
    GroupDeleted => GroupDeletedNotification {
        /// The deleted group.
        group: Group,
    },
    /// A group was renamed.
    GroupNameUpdated => GroupNameUpdatedNotification {
        /// The group, with its new name applied.
        group: Group,
        /// The name before the update.
        previous_name: String,
    },
    /// A new discussion was created.
    DiscussionNew => DiscussionNewNotification {
        /// The new discussion.
        discussion: Discussion,
    },
    /// A discussion was locked (its contact or group is gone).
    DiscussionLocked => DiscussionLockedNotification {
        /// The locked discussion.
        discussion: Discussion,
    },
    /// A discussion title changed.
    DiscussionTitleUpdated => DiscussionTitleUpdatedNotification {
        /// The discussion, with its new title applied.
        discussion: Discussion,
        /// The title before the update.
        previous_title: String,
    },
    /// A message was received.
    MessageReceived => MessageReceivedNotification {
        /// The received message.
        message: Message,
    },
    /// A message was sent from another device of this identity.
    MessageSent => MessageSentNotification {
        /// The sent message.
        message: Message,
    },
    /// A message was deleted.
    MessageDeleted => MessageDeletedNotification {
        /// The deleted message.
        message: Message,
    },
    /// A message body was edited.
    MessageBodyUpdated => MessageBodyUpdatedNotification {
        /// The message, with its new body applied.
        message: Message,
        /// The body before the edit.
        previous_body: String,
    },
    /// A reaction was added to a message.
    MessageReactionAdded => MessageReactionAddedNotification {
        /// The message the reaction applies to.
        message: Message,
        /// The reaction, as an emoji string.
        reaction: String,
    },
}

type BoxedHandler = Box<dyn Fn(Notification) -> BoxFuture<'static, ()> + Send + Sync>;
type BoxedFilter = Box<dyn Fn(&Notification) -> bool + Send + Sync>;

/// A handler bound to one notification type.
///
/// A listener is identified by a process-unique id; registering the same
/// listener twice has no additional effect. Listeners run until removed,
/// unless given a delivery limit with [`NotificationListener::with_count`],
/// after which they mark themselves finished and stop firing.
pub struct NotificationListener {
    id: u64,
    key: String,
    notification_type: NotificationType,
    handler: BoxedHandler,
    filter: Option<BoxedFilter>,
    remaining: AtomicU64,
    finished: AtomicBool,
}

impl NotificationListener {
    /// Creates a listener for `notification_type` backed by `handler`.
    pub fn new<F, Fut>(notification_type: NotificationType, handler: F) -> Self
    where
        F: Fn(Notification) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            id,
            key: format!("{}-{id}", notification_type.name()),
            notification_type,
            handler: Box::new(move |notification| handler(notification).boxed()),
            filter: None,
            remaining: AtomicU64::new(UNLIMITED),
            finished: AtomicBool::new(false),
        }
    }

    /// Overrides the listener key used in logs.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Marks the listener finished after `count` deliveries.
    #[must_use]
    pub fn with_count(self, count: u64) -> Self {
        self.remaining.store(count, Ordering::Relaxed);
        if count == 0 {
            self.finished.store(true, Ordering::Relaxed);
        }
        self
    }

    /// Installs a predicate evaluated before the handler; non-matching
    /// events are discarded and do not count as deliveries.
    pub(crate) fn with_filter(
        mut self,
        filter: impl Fn(&Notification) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }

    /// Listener for [`NotificationType::MessageReceived`], called with the
    /// received message.
    pub fn message_received<F, Fut>(handler: F) -> Self
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::new(NotificationType::MessageReceived, move |notification| {
            let fut = match notification {
                Notification::MessageReceived(payload) => Some(handler(payload.message)),
                _ => None,
            };
            async move {
                if let Some(fut) = fut {
                    fut.await;
                }
            }
        })
    }

    /// Listener for [`NotificationType::MessageSent`].
    pub fn message_sent<F, Fut>(handler: F) -> Self
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::new(NotificationType::MessageSent, move |notification| {
            let fut = match notification {
                Notification::MessageSent(payload) => Some(handler(payload.message)),
                _ => None,
            };
            async move {
                if let Some(fut) = fut {
                    fut.await;
                }
            }
        })
    }

    /// Listener for [`NotificationType::MessageBodyUpdated`], called with
    /// the updated message and its previous body.
    pub fn message_body_updated<F, Fut>(handler: F) -> Self
    where
        F: Fn(Message, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::new(NotificationType::MessageBodyUpdated, move |notification| {
            let fut = match notification {
                Notification::MessageBodyUpdated(payload) => {
                    Some(handler(payload.message, payload.previous_body))
                }
                _ => None,
            };
            async move {
                if let Some(fut) = fut {
                    fut.await;
                }
            }
        })
    }

    /// Listener for [`NotificationType::ContactNew`].
    pub fn contact_new<F, Fut>(handler: F) -> Self
    where
        F: Fn(Contact) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::new(NotificationType::ContactNew, move |notification| {
            let fut = match notification {
                Notification::ContactNew(payload) => Some(handler(payload.contact)),
                _ => None,
            };
            async move {
                if let Some(fut) = fut {
                    fut.await;
                }
            }
        })
    }

    /// Listener for [`NotificationType::InvitationReceived`].
    pub fn invitation_received<F, Fut>(handler: F) -> Self
    where
        F: Fn(Invitation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::new(NotificationType::InvitationReceived, move |notification| {
            let fut = match notification {
                Notification::InvitationReceived(payload) => Some(handler(payload.invitation)),
                _ => None,
            };
            async move {
                if let Some(fut) = fut {
                    fut.await;
                }
            }
        })
    }

    /// The notification type this listener is bound to.
    pub fn notification_type(&self) -> NotificationType {
        self.notification_type
    }

    /// Process-unique listener id.
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Listener key, used in logs.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// True once the listener's one-shot condition was met (or it was
    /// marked finished explicitly).
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Marks the listener finished; it will no longer fire and will be
    /// pruned by [`crate::OlvidClient::are_listeners_finished`].
    pub fn mark_finished(&self) {
        self.finished.store(true, Ordering::Release);
    }

    /// Runs the handler for one event, honoring the filter and the
    /// delivery limit.
    pub(crate) async fn deliver(&self, notification: Notification) {
        if self.is_finished() {
            return;
        }
        if let Some(filter) = &self.filter {
            if !filter(&notification) {
                return;
            }
        }
        (self.handler)(notification).await;
        self.mark_delivered();
    }

    fn mark_delivered(&self) {
        let decremented = self.remaining.fetch_update(
            Ordering::AcqRel,
            Ordering::Acquire,
            |remaining| match remaining {
                UNLIMITED | 0 => None,
                n => Some(n - 1),
            },
        );
        if decremented == Ok(1) {
            self.mark_finished();
        }
    }
}

impl PartialEq for NotificationListener {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for NotificationListener {}

impl std::hash::Hash for NotificationListener {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl std::fmt::Debug for NotificationListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationListener")
            .field("key", &self.key)
            .field("notification_type", &self.notification_type)
            .field("finished", &self.is_finished())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    use serde_json::json;

    use super::*;

    #[test]
    fn subscribe_method_names_follow_the_wire_convention() {
        assert_eq!(
            NotificationType::MessageReceived.subscribe_method(),
            "SubscribeToMessageReceived"
        );
        assert_eq!(
            NotificationType::ContactDetailsUpdated.subscribe_method(),
            "SubscribeToContactDetailsUpdated"
        );
    }

    #[test]
    fn decode_updated_event_keeps_both_fields() {
        let value = json!({
            "message": {"id": {"id": 1, "outbound": false}, "discussion_id": 2, "body": "new"},
            "previous_body": "old",
        });
        let notification = NotificationType::MessageBodyUpdated.decode(value).unwrap();
        let Notification::MessageBodyUpdated(payload) = notification else {
            panic!("wrong variant");
        };
        assert_eq!(payload.message.body, "new");
        assert_eq!(payload.previous_body, "old");
    }

    #[test]
    fn decode_rejects_mismatched_payload() {
        let err = NotificationType::MessageReceived
            .decode(json!({"contact": {"id": 1}}))
            .unwrap_err();
        assert!(matches!(err, OlvidError::Decode(_)));
    }

    #[tokio::test]
    async fn count_listener_finishes_after_limit() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let listener = NotificationListener::message_received(move |_| {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        })
        .with_count(2);

        let event = Notification::MessageReceived(MessageReceivedNotification::default());
        listener.deliver(event.clone()).await;
        assert!(!listener.is_finished());
        listener.deliver(event.clone()).await;
        assert!(listener.is_finished());
        // Finished listeners no longer fire.
        listener.deliver(event).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn filtered_events_do_not_count_as_deliveries() {
        let listener = NotificationListener::new(NotificationType::MessageReceived, |_| async {})
            .with_filter(|_| false)
            .with_count(1);
        listener
            .deliver(Notification::MessageReceived(
                MessageReceivedNotification::default(),
            ))
            .await;
        assert!(!listener.is_finished());
    }

    #[test]
    fn typed_ctor_targets_its_notification_type() {
        let listener = NotificationListener::contact_new(|_| async {});
        assert_eq!(listener.notification_type(), NotificationType::ContactNew);
    }
}
