//! An in-process fake of [`EventBus`], used by the service and worker test
//! suites to exercise redelivery and dead-lettering without PostgreSQL.

use crate::bus::{EventBus, Message};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use timeline_core::error::ServiceResult;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Clone)]
struct Entry {
    payload: serde_json::Value,
    receive_count: i32,
    in_flight: bool,
    visible_at: Instant,
    receipt_handle: Option<Uuid>,
}

#[derive(Default)]
struct State {
    events: VecDeque<Entry>,
    dead_letters: Vec<Entry>,
}

pub struct FakeEventBus {
    state: Mutex<State>,
    visibility_timeout: Duration,
    max_receives: i32,
}

impl FakeEventBus {
    pub fn new(visibility_timeout: Duration, max_receives: i32) -> Self {
        Self {
            state: Mutex::new(State::default()),
            visibility_timeout,
            max_receives,
        }
    }

    pub fn dead_letter_count(&self) -> usize {
        self.state.lock().unwrap().dead_letters.len()
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().unwrap().events.len()
    }
}

impl Default for FakeEventBus {
    fn default() -> Self {
        Self::new(Duration::from_secs(30), 3)
    }
}

#[async_trait]
impl EventBus for FakeEventBus {
    async fn publish(&self, payload: serde_json::Value) -> ServiceResult<()> {
        let mut state = self.state.lock().unwrap();
        state.events.push_back(Entry {
            payload,
            receive_count: 0,
            in_flight: false,
            visible_at: Instant::now(),
            receipt_handle: None,
        });
        Ok(())
    }

    async fn receive(&self, max_count: i64, wait_secs: u64) -> ServiceResult<Vec<Message>> {
        let deadline = Instant::now() + Duration::from_secs(wait_secs);
        loop {
            let claimed = {
                let mut state = self.state.lock().unwrap();
                let now = Instant::now();
                let mut claimed = Vec::new();
                for entry in state.events.iter_mut() {
                    if claimed.len() as i64 >= max_count {
                        break;
                    }
                    if entry.in_flight && entry.visible_at > now {
                        continue;
                    }
                    entry.receive_count += 1;
                    entry.in_flight = true;
                    entry.visible_at = now + self.visibility_timeout;
                    entry.receipt_handle = Some(Uuid::new_v4());
                    claimed.push(entry.clone());
                }

                state.events.retain(|entry| {
                    if entry.receive_count > self.max_receives {
                        state.dead_letters.push(entry.clone());
                        false
                    } else {
                        true
                    }
                });

                claimed
                    .into_iter()
                    .filter(|entry| entry.receive_count <= self.max_receives)
                    .map(|entry| Message {
                        receipt_handle: entry.receipt_handle.expect("claimed entries have a handle"),
                        payload: entry.payload,
                        receive_count: entry.receive_count,
                    })
                    .collect::<Vec<_>>()
            };

            if !claimed.is_empty() || Instant::now() >= deadline {
                return Ok(claimed);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn ack(&self, receipt_handle: Uuid) -> ServiceResult<()> {
        let mut state = self.state.lock().unwrap();
        state
            .events
            .retain(|entry| entry.receipt_handle != Some(receipt_handle));
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_then_receive_then_ack_drains_queue() {
        let bus = FakeEventBus::default();
        bus.publish(serde_json::json!({"post_id": 1})).await.unwrap();
        let messages = bus.receive(10, 0).await.unwrap();
        assert_eq!(messages.len(), 1);
        bus.ack(messages[0].receipt_handle).await.unwrap();
        assert_eq!(bus.pending_count(), 0);
    }

    #[tokio::test]
    async fn unacked_message_becomes_visible_again_after_timeout() {
        let bus = FakeEventBus::new(Duration::from_millis(20), 5);
        bus.publish(serde_json::json!({"post_id": 1})).await.unwrap();
        let first = bus.receive(10, 0).await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(bus.receive(10, 0).await.unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(30)).await;
        let redelivered = bus.receive(10, 0).await.unwrap();
        assert_eq!(redelivered.len(), 1);
        assert_eq!(redelivered[0].receive_count, 2);
    }

    #[tokio::test]
    async fn dead_letters_after_max_receives() {
        let bus = FakeEventBus::new(Duration::from_millis(5), 2);
        bus.publish(serde_json::json!({"post_id": 1})).await.unwrap();

        for _ in 0..2 {
            bus.receive(10, 0).await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(bus.dead_letter_count(), 1);
        assert_eq!(bus.pending_count(), 0);
    }
}
