pub mod classify;
pub mod retry;

pub use classify::{is_transient, message_is_transient};
pub use retry::{execute_with_retry, Reconnect, RetryPolicy};
