//! Regex-triggered message commands.

use std::future::Future;
use std::sync::Arc;

use regex::Regex;

use crate::datatypes::Message;
use crate::listener::{Notification, NotificationListener};
use crate::Result;

/// A message-received listener gated by a regex over the message body.
///
/// Commands are registered on an [`crate::OlvidBot`]; only messages whose
/// body matches the pattern reach the handler, and non-matching messages
/// do not count against a delivery limit.
pub struct Command {
    pattern: Regex,
    listener: Arc<NotificationListener>,
}

impl Command {
    /// Compiles `pattern` and binds it to `handler`.
    ///
    /// Returns [`crate::OlvidError::InvalidPattern`] if the pattern is not
    /// a valid regex.
    pub fn new<F, Fut>(pattern: &str, handler: F) -> Result<Self>
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let pattern = Regex::new(pattern)?;
        let filter_pattern = pattern.clone();
        let listener = NotificationListener::message_received(handler)
            .with_key(format!("command:{pattern}"))
            .with_filter(move |notification| match notification {
                Notification::MessageReceived(payload) => {
                    filter_pattern.is_match(&payload.message.body)
                }
                _ => false,
            });
        Ok(Self {
            pattern,
            listener: Arc::new(listener),
        })
    }

    /// The compiled body pattern.
    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    /// True if `body` would trigger this command.
    pub fn match_str(&self, body: &str) -> bool {
        self.pattern.is_match(body)
    }

    pub(crate) fn listener(&self) -> &Arc<NotificationListener> {
        &self.listener
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("pattern", &self.pattern.as_str())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use assert_matches::assert_matches;

    use super::*;
    use crate::listener::MessageReceivedNotification;
    use crate::OlvidError;

    fn message_with_body(body: &str) -> Notification {
        Notification::MessageReceived(MessageReceivedNotification {
            message: Message {
                body: body.to_string(),
                ..Message::default()
            },
        })
    }

    #[test]
    fn anchored_pattern_matches_prefix_only() {
        let command = Command::new("^!help", |_| async {}).unwrap();
        assert!(command.match_str("!help"));
        assert!(command.match_str("!help me"));
        assert!(!command.match_str("hello"));
        assert!(!command.match_str("say !help"));
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let err = Command::new("(unclosed", |_| async {}).unwrap_err();
        assert_matches!(err, OlvidError::InvalidPattern(_));
    }

    #[tokio::test]
    async fn handler_only_fires_on_matching_bodies() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let command = Command::new("^!ping", move |_| {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();

        let listener = command.listener().clone();
        listener.deliver(message_with_body("!ping")).await;
        listener.deliver(message_with_body("pong")).await;
        listener.deliver(message_with_body("!ping again")).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
