//! Refresh notifications for hosts.
//!
//! Inside the app, a batch that changed anything emits a
//! [`PerceptionRefreshEvent`]. Hosts that live outside the ECS (render
//! layers, socket bridges) subscribe through the [`RefreshHub`] and receive
//! the same notification as an envelope on a channel.

use bevy::prelude::{Event, Resource};
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::Serialize;
use std::sync::Mutex;

/// Fired after a batch whose application changed at least one pair state.
#[derive(Event, Debug, Clone, Copy)]
pub struct PerceptionRefreshEvent {
    pub frame: u64,
    pub changed_pairs: u32,
}

/// Channel form of [`PerceptionRefreshEvent`] for out-of-process consumers.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RefreshEnvelope {
    pub frame: u64,
    pub changed_pairs: u32,
    pub clock_ms: u64,
}

/// Broadcast hub. Subscribers that hang up are dropped on the next publish.
#[derive(Resource, Debug, Default)]
pub struct RefreshHub {
    subscribers: Mutex<Vec<Sender<RefreshEnvelope>>>,
}

impl RefreshHub {
    pub fn subscribe(&self) -> Receiver<RefreshEnvelope> {
        let (sender, receiver) = unbounded();
        let mut guard = self
            .subscribers
            .lock()
            .expect("refresh subscribers mutex poisoned");
        guard.push(sender);
        receiver
    }

    pub fn publish(&self, envelope: RefreshEnvelope) {
        let mut guard = self
            .subscribers
            .lock()
            .expect("refresh subscribers mutex poisoned");
        guard.retain(|sender| sender.send(envelope).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .expect("refresh subscribers mutex poisoned")
            .len()
    }
}
