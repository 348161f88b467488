use std::collections::VecDeque;

use crate::models::PaymentEvent;

/// Capped most-recent-N payment history log.
pub struct PaymentHistory {
    entries: VecDeque<PaymentEvent>,
    cap: usize,
}

impl PaymentHistory {
    pub fn new(cap: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            cap: cap.max(1),
        }
    }

    pub fn push(&mut self, event: PaymentEvent) {
        self.entries.push_back(event);
        while self.entries.len() > self.cap {
            self.entries.pop_front();
        }
    }

    /// Newest first.
    pub fn recent(&self) -> Vec<PaymentEvent> {
        self.entries.iter().rev().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PaymentDirection, PaymentOutcome};

    fn payment(id: &str, at: u64) -> PaymentEvent {
        PaymentEvent {
            id: id.into(),
            amount: 100,
            fee: 1,
            mint: Some("https://a.mint".into()),
            direction: PaymentDirection::Sent,
            outcome: PaymentOutcome::Settled,
            at,
        }
    }

    #[test]
    fn history_is_capped_at_most_recent_n() {
        let mut history = PaymentHistory::new(3);
        for i in 0..5u64 {
            history.push(payment(&format!("p{i}"), i));
        }
        assert_eq!(history.len(), 3);
        let ids: Vec<String> = history.recent().iter().map(|p| p.id.clone()).collect();
        assert_eq!(ids, vec!["p4", "p3", "p2"]);
    }
}
