//! The channel store: `channelId -> {send, recv, trySend, tryRecv}`
//! backed by a FIFO queue for `mpsc`/`spsc`/`mpmc`, and a
//! per-waiting-receiver mailbox for `broadcast` — a subscriber that
//! joins after a send misses that message.
//!
//! Buffer size 0 is synchronous rendezvous: a `send` only completes once
//! some task is already blocked in `recv`; otherwise it blocks in turn.
//! Negative buffer sizes are treated as unbounded.

use crate::task::TaskId;
use fxhash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;
use weft_core::value::{ChannelVariant, Value};

pub type ChannelId = compact_str::CompactString;

struct ChannelState {
    variant: ChannelVariant,
    capacity: i64,
    queue: VecDeque<Value>,
    /// Tasks currently blocked in `recv`/`tryRecv`-found-empty, used only
    /// to decide whether a rendezvous (`capacity == 0`) send may proceed
    /// and to know who a `broadcast` send should deliver to.
    waiting_receivers: FxHashSet<TaskId>,
    /// `broadcast` only: values queued for a specific receiver that was
    /// already waiting when they were sent.
    mailboxes: FxHashMap<TaskId, VecDeque<Value>>,
}

impl ChannelState {
    fn new(variant: ChannelVariant, capacity: i64) -> Self {
        Self {
            variant,
            capacity,
            queue: VecDeque::new(),
            waiting_receivers: FxHashSet::default(),
            mailboxes: FxHashMap::default(),
        }
    }
}

#[derive(Default)]
pub struct ChannelStore {
    channels: FxHashMap<ChannelId, ChannelState>,
    next_id: u64,
}

/// Outcome of a blocking channel op — mirrors
/// [`weft_core::cfg::ChannelPoll`] without depending on the CFG module
/// directly, since `bool`/`Option` results (`trySend`/`tryRecv`) also
/// flow through here.
pub enum Poll {
    Ready(Value),
    Pending,
}

impl ChannelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, variant: ChannelVariant, capacity: i64) -> ChannelId {
        self.next_id += 1;
        let id = compact_str::format_compact!("chan{}", self.next_id);
        self.channels.insert(id.clone(), ChannelState::new(variant, capacity));
        id
    }

    fn room_available(chan: &ChannelState) -> bool {
        chan.capacity < 0 || (chan.queue.len() as i64) < chan.capacity
    }

    pub fn send(&mut self, id: &str, task: &TaskId, value: Value) -> Poll {
        let Some(chan) = self.channels.get_mut(id) else {
            return Poll::Ready(Value::error(weft_core::error::ErrorCode::DomainError, "unknown channel"));
        };
        if chan.variant == ChannelVariant::Broadcast {
            for recv in chan.waiting_receivers.drain().collect::<Vec<_>>() {
                chan.mailboxes.entry(recv).or_default().push_back(value.clone());
            }
            return Poll::Ready(Value::Void);
        }
        if chan.capacity == 0 {
            if chan.waiting_receivers.is_empty() {
                return Poll::Pending;
            }
            chan.queue.push_back(value);
            return Poll::Ready(Value::Void);
        }
        if Self::room_available(chan) {
            chan.queue.push_back(value);
            Poll::Ready(Value::Void)
        } else {
            let _ = task;
            Poll::Pending
        }
    }

    pub fn try_send(&mut self, id: &str, task: &TaskId, value: Value) -> Value {
        match self.send(id, task, value) {
            Poll::Ready(_) => Value::Bool(true),
            Poll::Pending => Value::Bool(false),
        }
    }

    pub fn recv(&mut self, id: &str, task: &TaskId) -> Poll {
        let Some(chan) = self.channels.get_mut(id) else {
            return Poll::Ready(Value::error(weft_core::error::ErrorCode::DomainError, "unknown channel"));
        };
        if chan.variant == ChannelVariant::Broadcast {
            if let Some(mailbox) = chan.mailboxes.get_mut(task) {
                if let Some(v) = mailbox.pop_front() {
                    return Poll::Ready(v);
                }
            }
            chan.waiting_receivers.insert(task.clone());
            chan.mailboxes.entry(task.clone()).or_default();
            return Poll::Pending;
        }
        if let Some(v) = chan.queue.pop_front() {
            chan.waiting_receivers.remove(task);
            Poll::Ready(v)
        } else {
            chan.waiting_receivers.insert(task.clone());
            Poll::Pending
        }
    }

    pub fn try_recv(&mut self, id: &str, task: &TaskId) -> Value {
        let Some(chan) = self.channels.get_mut(id) else {
            return Value::error(weft_core::error::ErrorCode::DomainError, "unknown channel");
        };
        if chan.variant == ChannelVariant::Broadcast {
            if let Some(v) = chan.mailboxes.get_mut(task).and_then(|m| m.pop_front()) {
                return Value::some(v);
            }
            return Value::none();
        }
        match chan.queue.pop_front() {
            Some(v) => Value::some(v),
            None => Value::none(),
        }
    }
}
