// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::atomic::{AtomicU64, Ordering};

/// Carries events of type `T` from any thread to a single consumer.
///
/// [`EventBus::publish`] never blocks. A bounded bus whose consumer falls
/// behind drops its oldest events to make room for new ones.
#[derive(Debug)]
pub struct EventBus<T: Clone + Send + 'static> {
    sender: flume::Sender<T>,
    receiver: flume::Receiver<T>,
    dropped: AtomicU64,
}

impl<T: Clone + Send + 'static> EventBus<T> {
    /// Creates a new bus with an unbounded channel.
    pub fn new() -> Self {
        let (sender, receiver) = flume::unbounded();
        Self {
            sender,
            receiver,
            dropped: AtomicU64::new(0),
        }
    }

    /// Creates a bus holding at most `capacity` undelivered events.
    pub fn bounded(capacity: usize) -> Self {
        let (sender, receiver) = flume::bounded(capacity.max(1));
        Self {
            sender,
            receiver,
            dropped: AtomicU64::new(0),
        }
    }

    /// Sends an event. On a full bus the oldest queued event is discarded.
    pub fn publish(&self, event: T) {
        log::trace!("Publishing an event.");
        let mut event = event;
        loop {
            match self.sender.try_send(event) {
                Ok(()) => return,
                Err(flume::TrySendError::Full(returned)) => {
                    if self.receiver.try_recv().is_ok() {
                        let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        if dropped.is_power_of_two() {
                            log::warn!("Event queue full: {dropped} event(s) dropped so far.");
                        }
                    }
                    event = returned;
                }
                Err(flume::TrySendError::Disconnected(_)) => {
                    log::error!("Failed to send event: receiver disconnected.");
                    return;
                }
            }
        }
    }

    /// Number of events discarded because the bus was full.
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Returns a clone of the sender end of the channel. Sending through it
    /// on a full bounded bus blocks until the consumer drains.
    pub fn sender(&self) -> flume::Sender<T> {
        self.sender.clone()
    }

    /// Returns a clone of the receiver end. Receivers compete: each event is
    /// delivered to exactly one of them.
    pub fn subscribe(&self) -> flume::Receiver<T> {
        self.receiver.clone()
    }

    /// Takes every event published so far without blocking.
    pub fn drain(&self) -> Vec<T> {
        self.receiver.try_iter().collect()
    }
}

impl<T: Clone + Send + 'static> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    enum TestEvent {
        Resized { width: u32, height: u32 },
        Shutdown,
    }

    #[test]
    fn drain_returns_events_in_order() {
        let bus = EventBus::new();
        bus.publish(TestEvent::Resized {
            width: 4,
            height: 2,
        });
        bus.publish(TestEvent::Shutdown);

        assert_eq!(
            bus.drain(),
            vec![
                TestEvent::Resized {
                    width: 4,
                    height: 2
                },
                TestEvent::Shutdown
            ]
        );
        assert!(bus.drain().is_empty());
    }

    #[test]
    fn bounded_bus_keeps_the_newest_events() {
        let bus = EventBus::bounded(3);
        for width in 0..10 {
            bus.publish(TestEvent::Resized { width, height: 1 });
        }

        let expected: Vec<_> = (7..10)
            .map(|width| TestEvent::Resized { width, height: 1 })
            .collect();
        assert_eq!(bus.drain(), expected);
        assert_eq!(bus.dropped_events(), 7);

        bus.publish(TestEvent::Shutdown);
        assert_eq!(bus.drain(), vec![TestEvent::Shutdown]);
        assert_eq!(bus.dropped_events(), 7);
    }

    #[test]
    fn send_from_thread() {
        let bus = EventBus::new();
        let sender = bus.sender();
        let handle = thread::spawn(move || {
            sender.send(TestEvent::Shutdown).expect("send from thread");
        });
        handle.join().expect("thread panicked");

        let received = bus
            .subscribe()
            .recv_timeout(Duration::from_millis(100))
            .expect("event should arrive");
        assert_eq!(received, TestEvent::Shutdown);
    }
}
