use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::EndpointSelection;

/// Picks which configured endpoint receives the next upstream request.
pub trait EndpointSelector: Send + Sync + fmt::Debug {
    /// Return an index in `0..count`. `count` is never zero.
    fn select(&self, count: usize) -> usize;

    fn name(&self) -> &'static str;
}

/// Cycles through endpoints in order.
#[derive(Debug, Default)]
pub struct RoundRobin {
    next: AtomicUsize,
}

impl EndpointSelector for RoundRobin {
    fn select(&self, count: usize) -> usize {
        self.next.fetch_add(1, Ordering::Relaxed) % count
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}

/// Picks a uniformly random endpoint.
#[derive(Debug, Default)]
pub struct RandomChoice;

impl EndpointSelector for RandomChoice {
    fn select(&self, count: usize) -> usize {
        fastrand::usize(..count)
    }

    fn name(&self) -> &'static str {
        "random"
    }
}

#[must_use]
pub fn selector_for(selection: EndpointSelection) -> Box<dyn EndpointSelector> {
    match selection {
        EndpointSelection::RoundRobin => Box::new(RoundRobin::default()),
        EndpointSelection::Random => Box::new(RandomChoice),
    }
}
