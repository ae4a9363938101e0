pub mod dispatch;
pub mod idempotency;
pub mod notifications;
pub mod outbox;
pub mod retry;
