//! Escalation notifications.
//!
//! The executor enqueues one [`NotificationRequest`] per applied escalation.
//! [`FanOut`] later renders a message per recipient and hands it to a
//! [`Notifier`]. Delivery is at-least-once and never affects ticket state.

pub mod fanout;
pub mod notifier;
pub mod request;

pub use fanout::{FanOut, FanOutReport};
pub use notifier::{notifier_from_config, LogNotifier, Notifier, WebhookNotifier};
pub use request::{
    DeliveryStatus, Notification, NotificationRequest, QueuedNotification, RecipientRole,
};
