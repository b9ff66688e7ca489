//! Publisher and subscriber handles.
//!
//! A handle keeps its graph, and with it the backing memory, alive. Dropping
//! it decrements the live count in the region header under the update lock.

use super::Graph;
use crate::consumer::Consume;
use crate::sequencer::Produce;
use std::fmt;
use std::sync::Arc;

pub struct Publisher {
    pub(super) producer: Arc<dyn Produce>,
    pub(super) graph: Arc<Graph>,
    pub(super) name: String,
}

impl Publisher {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn graph(&self) -> &Arc<Graph> {
        &self.graph
    }
}

impl Produce for Publisher {
    #[inline]
    fn available(&self) -> usize {
        self.producer.available()
    }

    #[inline]
    fn next(&self) -> i64 {
        self.producer.next()
    }

    #[inline]
    fn claim(&self, amount: usize) -> i64 {
        self.producer.claim(amount)
    }

    #[inline]
    fn try_claim(&self, amount: usize) -> i64 {
        self.producer.try_claim(amount)
    }

    #[inline]
    fn publish(&self, seq: i64) {
        self.producer.publish(seq);
    }

    #[inline]
    fn publish_range(&self, lo: i64, hi: i64) {
        self.producer.publish_range(lo, hi);
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        self.graph.detach(&self.graph.header().pubs, "publisher", &self.name);
    }
}

impl fmt::Debug for Publisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("name", &self.name)
            .field("next", &self.producer.next())
            .finish()
    }
}

pub struct Subscriber {
    pub(super) consumer: Box<dyn Consume>,
    pub(super) graph: Arc<Graph>,
    pub(super) name: String,
}

impl Subscriber {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn graph(&self) -> &Arc<Graph> {
        &self.graph
    }
}

impl Consume for Subscriber {
    #[inline]
    fn available(&self) -> usize {
        self.consumer.available()
    }

    #[inline]
    fn last(&self) -> i64 {
        self.consumer.last()
    }

    #[inline]
    fn consume(&self, seq: i64) -> i64 {
        self.consumer.consume(seq)
    }

    #[inline]
    fn consumable(&self, seq: i64) -> i64 {
        self.consumer.consumable(seq)
    }

    #[inline]
    fn release(&self, seq: i64) {
        self.consumer.release(seq);
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.graph.detach(&self.graph.header().subs, "subscriber", &self.name);
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("name", &self.name)
            .field("last", &self.consumer.last())
            .finish()
    }
}
