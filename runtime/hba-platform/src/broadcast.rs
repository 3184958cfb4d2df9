//! Broadcaster - fan-out of resource updates to subscribers
//!
//! Each resource key (`"<component>/<resource>"`) owns a list of crossbeam
//! senders. Publishing clones the line into every live subscriber's channel;
//! subscribers whose receiver was dropped are pruned on the next publish.

use std::cell::RefCell;
use std::collections::HashMap;

use crossbeam::channel::{self, Receiver, Sender};
use log::trace;

#[derive(Default)]
pub struct Broadcaster {
    topics: RefCell<HashMap<String, Vec<Sender<String>>>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a resource. Lines arrive in publish order.
    pub fn subscribe(&self, key: &str) -> Receiver<String> {
        let (tx, rx) = channel::unbounded();
        self.topics
            .borrow_mut()
            .entry(key.to_string())
            .or_default()
            .push(tx);
        rx
    }

    pub fn subscriber_count(&self, key: &str) -> usize {
        self.topics.borrow().get(key).map_or(0, Vec::len)
    }

    pub fn has_subscribers(&self, key: &str) -> bool {
        self.subscriber_count(key) > 0
    }

    /// Deliver `line` to every subscriber of `key`.
    ///
    /// # Returns
    /// Number of subscribers that received the line.
    pub fn publish(&self, key: &str, line: &str) -> usize {
        let mut topics = self.topics.borrow_mut();
        let Some(senders) = topics.get_mut(key) else {
            return 0;
        };
        senders.retain(|tx| tx.send(line.to_string()).is_ok());
        let delivered = senders.len();
        if senders.is_empty() {
            topics.remove(key);
        }
        trace!("{}: delivered to {} subscriber(s)", key, delivered);
        delivered
    }

    /// Like [`Broadcaster::publish`], but only formats the line when someone
    /// is listening.
    pub fn publish_with<F>(&self, key: &str, format: F) -> usize
    where
        F: FnOnce() -> String,
    {
        if !self.has_subscribers(key) {
            return 0;
        }
        let line = format();
        self.publish(key, &line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_publish_without_subscribers() {
        let b = Broadcaster::new();
        assert_eq!(b.publish("serial_fpga/rawin", "ab\n"), 0);
    }

    #[test]
    fn test_publish_reaches_every_subscriber_in_order() {
        let b = Broadcaster::new();
        let rx1 = b.subscribe("bb4io/buttons");
        let rx2 = b.subscribe("bb4io/buttons");

        assert_eq!(b.publish("bb4io/buttons", "1\n"), 2);
        assert_eq!(b.publish("bb4io/buttons", "2\n"), 2);

        assert_eq!(rx1.try_iter().collect::<Vec<_>>(), vec!["1\n", "2\n"]);
        assert_eq!(rx2.try_iter().collect::<Vec<_>>(), vec!["1\n", "2\n"]);
    }

    #[test]
    fn test_topics_are_isolated() {
        let b = Broadcaster::new();
        let rx = b.subscribe("quad/counts");
        b.publish("bb4io/buttons", "1\n");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let b = Broadcaster::new();
        let rx = b.subscribe("quad/counts");
        drop(b.subscribe("quad/counts"));
        assert_eq!(b.subscriber_count("quad/counts"), 2);

        assert_eq!(b.publish("quad/counts", "7\n"), 1);
        assert_eq!(b.subscriber_count("quad/counts"), 1);
        assert_eq!(rx.recv().unwrap(), "7\n");

        drop(rx);
        b.publish("quad/counts", "8\n");
        assert!(!b.has_subscribers("quad/counts"));
    }

    #[test]
    fn test_publish_with_is_lazy() {
        let b = Broadcaster::new();
        let formatted = Cell::new(false);
        b.publish_with("serial_fpga/rawin", || {
            formatted.set(true);
            String::from("ac\n")
        });
        assert!(!formatted.get());

        let rx = b.subscribe("serial_fpga/rawin");
        assert_eq!(b.publish_with("serial_fpga/rawin", || String::from("ac\n")), 1);
        assert_eq!(rx.recv().unwrap(), "ac\n");
    }
}
