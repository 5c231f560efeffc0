//! Shared protocol definitions for the `LanChat` line-oriented wire format.

pub mod codec;
pub mod event;

pub use event::{ChatEvent, MessageIdentity};
