//! Broadcast channel for engine events.
//!
//! Events are published after the mutation they describe has been committed.
//! Publishing never fails the caller: with no subscribers the event is dropped.

use orderhub_types::EngineEvent;
use tokio::sync::broadcast;

/// Default capacity of the broadcast buffer.
pub const DEFAULT_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct EventBus {
	sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity);
		Self { sender }
	}

	pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
		self.sender.subscribe()
	}

	pub fn publish(&self, event: EngineEvent) {
		if self.sender.send(event).is_err() {
			tracing::trace!("No event subscribers");
		}
	}
}

impl Default for EventBus {
	fn default() -> Self {
		Self::new(DEFAULT_CAPACITY)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use orderhub_types::OrderEvent;

	#[tokio::test]
	async fn test_publish_reaches_every_subscriber() {
		let bus = EventBus::new(8);
		let mut first = bus.subscribe();
		let mut second = bus.subscribe();

		bus.publish(EngineEvent::Order(OrderEvent::PaymentConfirmed { order_id: 3 }));

		for rx in [&mut first, &mut second] {
			match rx.recv().await.unwrap() {
				EngineEvent::Order(OrderEvent::PaymentConfirmed { order_id }) => {
					assert_eq!(order_id, 3)
				},
				other => panic!("unexpected event {:?}", other),
			}
		}
	}

	#[test]
	fn test_publish_without_subscribers_is_silent() {
		EventBus::default().publish(EngineEvent::MarkupRulesChanged { active_rules: 0 });
	}
}
