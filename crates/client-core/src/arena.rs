//! Saved messages referenced by handle
//!
//! Scripts save a message when they send it and refer to it later, usually to
//! retransmit it verbatim. The arena hands out a [`MessageHandle`] and keeps an
//! `Arc` to the message; saved messages are never modified.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use tfm_sip_core::Message;

/// Handle of a message saved in a [`MessageArena`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageHandle(u64);

impl fmt::Display for MessageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "msg#{}", self.0)
    }
}

#[derive(Debug, Default)]
pub struct MessageArena {
    messages: DashMap<MessageHandle, Arc<Message>>,
    next: AtomicU64,
}

impl MessageArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save(&self, message: impl Into<Message>) -> MessageHandle {
        let handle = MessageHandle(self.next.fetch_add(1, Ordering::Relaxed));
        self.messages.insert(handle, Arc::new(message.into()));
        handle
    }

    pub fn get(&self, handle: MessageHandle) -> Option<Arc<Message>> {
        self.messages.get(&handle).map(|m| Arc::clone(m.value()))
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
