//! Strict one-in-flight message queue between capture and controller.
//!
//! The head of the queue is the message currently awaiting acknowledgment.
//! Nothing behind it is transmitted until the controller acks the head, which
//! lets the controller simulate an input and screenshot the result before the
//! next human input is released.

use std::collections::VecDeque;

use crate::capture::events::CaptureMessage;
use crate::model::ActionType;

/// Result of an acknowledgment from the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum AckOutcome {
    /// The next queued message must be transmitted now.
    Transmit(CaptureMessage),
    /// The queue is empty; idle-wait detection should be armed.
    Drained,
    /// An ack arrived with nothing in flight.
    Unexpected,
}

#[derive(Debug, Default)]
pub struct ActionChannel {
    queue: VecDeque<CaptureMessage>,
    last_transmitted: Option<CaptureMessage>,
    /// The last transmitted message was already re-sent as `wait`.
    wait_sent: bool,
}

impl ActionChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message. Returns it back if it has to be transmitted
    /// immediately because the queue was empty.
    pub fn enqueue(&mut self, message: CaptureMessage) -> Option<CaptureMessage> {
        if message.action_type != ActionType::Wait {
            self.wait_sent = false;
        }
        self.queue.push_back(message);
        if self.queue.len() == 1 {
            self.transmit_head()
        } else {
            None
        }
    }

    pub fn acknowledge(&mut self) -> AckOutcome {
        if self.queue.pop_front().is_none() {
            return AckOutcome::Unexpected;
        }
        match self.transmit_head() {
            Some(message) => AckOutcome::Transmit(message),
            None => AckOutcome::Drained,
        }
    }

    /// Re-send the last transmitted message retyped as `wait`, at most once
    /// per genuine message. Only valid while the queue is empty.
    pub fn retransmit_as_wait(&mut self) -> Option<CaptureMessage> {
        if !self.queue.is_empty() || self.wait_sent {
            return None;
        }
        let mut wait = self.last_transmitted.clone()?;
        wait.action_type = ActionType::Wait;
        self.wait_sent = true;
        self.queue.push_back(wait);
        self.transmit_head()
    }

    pub fn in_flight(&self) -> Option<&CaptureMessage> {
        self.queue.front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn last_transmitted(&self) -> Option<&CaptureMessage> {
        self.last_transmitted.as_ref()
    }

    /// Drop queued messages that were never transmitted. The in-flight head
    /// stays so that its pending ack still lines up.
    pub fn discard_pending(&mut self) -> usize {
        let pending = self.queue.len().saturating_sub(1);
        self.queue.truncate(1);
        pending
    }

    pub fn reset(&mut self) {
        self.queue.clear();
        self.last_transmitted = None;
        self.wait_sent = false;
    }

    fn transmit_head(&mut self) -> Option<CaptureMessage> {
        let head = self.queue.front()?.clone();
        self.last_transmitted = Some(head.clone());
        Some(head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EventPayload;

    fn msg(action_type: ActionType) -> CaptureMessage {
        CaptureMessage::new(action_type, EventPayload::None)
    }

    #[test]
    fn first_message_transmits_immediately_the_rest_wait_for_ack() {
        let mut channel = ActionChannel::new();
        assert_eq!(
            channel.enqueue(msg(ActionType::Click)),
            Some(msg(ActionType::Click))
        );
        assert_eq!(channel.enqueue(msg(ActionType::Keys)), None);
        assert_eq!(channel.enqueue(msg(ActionType::Scroll)), None);
        assert_eq!(channel.len(), 3);

        assert_eq!(
            channel.acknowledge(),
            AckOutcome::Transmit(msg(ActionType::Keys))
        );
        assert_eq!(
            channel.acknowledge(),
            AckOutcome::Transmit(msg(ActionType::Scroll))
        );
        assert_eq!(channel.acknowledge(), AckOutcome::Drained);
        assert_eq!(channel.acknowledge(), AckOutcome::Unexpected);
    }

    #[test]
    fn wait_retransmission_happens_once_per_message() {
        let mut channel = ActionChannel::new();
        channel.enqueue(msg(ActionType::Mousemove));
        assert_eq!(channel.acknowledge(), AckOutcome::Drained);

        let wait = channel.retransmit_as_wait().unwrap();
        assert_eq!(wait.action_type, ActionType::Wait);
        assert_eq!(channel.acknowledge(), AckOutcome::Drained);
        assert_eq!(channel.retransmit_as_wait(), None);

        channel.enqueue(msg(ActionType::Click));
        channel.acknowledge();
        assert!(channel.retransmit_as_wait().is_some());
    }

    #[test]
    fn no_wait_while_busy_or_before_any_message() {
        let mut channel = ActionChannel::new();
        assert_eq!(channel.retransmit_as_wait(), None);
        channel.enqueue(msg(ActionType::Click));
        assert_eq!(channel.retransmit_as_wait(), None);
    }

    #[test]
    fn discard_pending_keeps_in_flight_head() {
        let mut channel = ActionChannel::new();
        channel.enqueue(msg(ActionType::Click));
        channel.enqueue(msg(ActionType::Keys));
        channel.enqueue(msg(ActionType::Keys));
        assert_eq!(channel.discard_pending(), 2);
        assert_eq!(
            channel.in_flight().map(|m| m.action_type),
            Some(ActionType::Click)
        );
        assert_eq!(channel.acknowledge(), AckOutcome::Drained);
    }
}
