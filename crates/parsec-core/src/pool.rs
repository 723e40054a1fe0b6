//! Free-list pool for message contexts.
//!
//! Acquire-reset-release is enforced by construction: the only way to get
//! a pooled context is through a [`MessageGuard`], and the only way to
//! give it back is to drop the guard, which resets it first. A context
//! can therefore never be observed with a previous call's state.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

use crate::message::Message;

/// Default number of contexts kept on the free list.
pub const DEFAULT_POOL_CAPACITY: usize = 128;

/// Free-list pool of [`Message`] contexts.
pub struct MessagePool {
    free: Mutex<Vec<Box<Message>>>,
    capacity: usize,
}

impl MessagePool {
    /// Creates a pool with the default capacity.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::with_capacity(DEFAULT_POOL_CAPACITY)
    }

    /// Creates a pool keeping at most `capacity` idle contexts.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            free: Mutex::new(Vec::new()),
            capacity,
        })
    }

    /// Acquires a context, reusing a pooled one when available.
    #[must_use]
    pub fn acquire(self: &Arc<Self>) -> MessageGuard {
        let msg = self
            .free
            .lock()
            .ok()
            .and_then(|mut free| free.pop())
            .map_or_else(
                || Box::new(Message::new()),
                |mut msg| {
                    msg.mark_begin();
                    msg
                },
            );
        MessageGuard {
            msg: Some(msg),
            pool: Arc::clone(self),
        }
    }

    /// Number of contexts currently on the free list.
    #[must_use]
    pub fn idle(&self) -> usize {
        self.free.lock().map(|free| free.len()).unwrap_or(0)
    }

    fn release(&self, mut msg: Box<Message>) {
        msg.reset();
        if let Ok(mut free) = self.free.lock() {
            if free.len() < self.capacity {
                free.push(msg);
            }
        }
    }
}

/// Owned handle to a pooled [`Message`].
///
/// Dereferences to the context; dropping the guard resets the context and
/// returns it to the pool.
pub struct MessageGuard {
    msg: Option<Box<Message>>,
    pool: Arc<MessagePool>,
}

impl Deref for MessageGuard {
    type Target = Message;

    fn deref(&self) -> &Message {
        self.msg.as_ref().expect("message taken")
    }
}

impl DerefMut for MessageGuard {
    fn deref_mut(&mut self) -> &mut Message {
        self.msg.as_mut().expect("message taken")
    }
}

impl Drop for MessageGuard {
    fn drop(&mut self) {
        if let Some(msg) = self.msg.take() {
            self.pool.release(msg);
        }
    }
}
