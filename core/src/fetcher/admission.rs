//! Per-host admission state: token counters and buffered request queues

use crate::request::SubRequest;
use std::collections::{HashMap, VecDeque};

/// Token pool and FIFO backlog, both keyed by origin host
///
/// A host starts with `max_per_host` tokens. Dispatching a request consumes
/// one; completing a network fetch returns one, unless the release is
/// immediately handed to a buffered request. Buffered requests drain in
/// arrival order per host; no ordering is kept across hosts.
#[derive(Debug)]
pub(crate) struct HostTokenPool {
    max_per_host: usize,
    available: HashMap<String, usize>,
    buffered: HashMap<String, VecDeque<SubRequest>>,
}

impl HostTokenPool {
    pub(crate) fn new(max_per_host: usize) -> Self {
        Self {
            max_per_host,
            available: HashMap::new(),
            buffered: HashMap::new(),
        }
    }

    /// Tokens currently available for a host
    pub(crate) fn available(&self, host: &str) -> usize {
        self.available.get(host).copied().unwrap_or(self.max_per_host)
    }

    /// Consume `count` tokens for a host
    pub(crate) fn consume(&mut self, host: &str, count: usize) {
        let remaining = self.available(host).saturating_sub(count);
        self.available.insert(host.to_string(), remaining);
    }

    /// Return one token to a host
    pub(crate) fn release(&mut self, host: &str) {
        let tokens = self.available(host) + 1;
        self.available.insert(host.to_string(), tokens);
    }

    /// Append a request to its host's backlog
    pub(crate) fn buffer(&mut self, request: SubRequest) {
        self.buffered
            .entry(request.host.clone())
            .or_default()
            .push_back(request);
    }

    /// Pop the oldest buffered request for a host
    pub(crate) fn pop_buffered(&mut self, host: &str) -> Option<SubRequest> {
        let queue = self.buffered.get_mut(host)?;
        let request = queue.pop_front();
        if queue.is_empty() {
            self.buffered.remove(host);
        }
        request
    }

    /// Number of buffered requests for a host
    #[cfg(test)]
    pub(crate) fn buffered_len(&self, host: &str) -> usize {
        self.buffered.get(host).map(VecDeque::len).unwrap_or(0)
    }
}
