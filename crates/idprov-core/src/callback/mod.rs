//! Callback/notification gateway.
//!
//! Reports the terminal status of an execution to the caller that triggered
//! it, using the one-shot callback token carried by the trigger event. The
//! gateway claims the token in a `CallbackLedger` before sending, so a token
//! yields at most one delivered notification.

pub mod channel;
pub mod gateway;
pub mod token;
