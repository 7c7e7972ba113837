//! Terminal UI served to the browser.
//!
//! - **chat**: echo chat application mounted on each session's device
//! - **keys**: raw input bytes to key presses
//! - **history**: bounded scroll history shown above the prompt

pub mod chat;
pub mod history;
pub mod keys;

pub use chat::ChatApp;
