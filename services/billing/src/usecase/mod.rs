pub mod dispatch;
pub mod notification;
pub mod outbox;
pub mod reconcile;
pub mod webhook;
