use std::time::{Duration, Instant};

/// Which deadline elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
    /// Nothing was received for the idle timeout.
    Idle,
    /// The current request took longer than the request timeout.
    Request,
}

/// Per-connection deadlines.
///
/// Pure clock arithmetic: the connection loop reports activity and asks
/// whether a deadline has passed, nothing here runs on its own.
#[derive(Debug, Clone)]
pub struct ConnectionTimer {
    idle_timeout: Duration,
    request_timeout: Duration,
    idle_deadline: Instant,
    request_deadline: Option<Instant>,
}

impl ConnectionTimer {
    pub fn new(idle_timeout: Duration, request_timeout: Duration, now: Instant) -> Self {
        Self {
            idle_timeout,
            request_timeout,
            idle_deadline: now + idle_timeout,
            request_deadline: None,
        }
    }

    /// Pushes the idle deadline back; called whenever bytes arrive.
    pub fn record_activity(&mut self, now: Instant) {
        self.idle_deadline = now + self.idle_timeout;
    }

    /// Arms the request deadline unless a request is already being timed.
    pub fn start_request(&mut self, now: Instant) {
        if self.request_deadline.is_none() {
            self.request_deadline = Some(now + self.request_timeout);
        }
    }

    /// Clears the request deadline once a request completed or failed.
    pub fn finish_request(&mut self) {
        self.request_deadline = None;
    }

    pub fn request_in_progress(&self) -> bool {
        self.request_deadline.is_some()
    }

    /// The deadline that has passed at `now`, if any.
    pub fn expired(&self, now: Instant) -> Option<Deadline> {
        match self.request_deadline {
            Some(deadline) if now >= deadline => Some(Deadline::Request),
            _ if now >= self.idle_deadline => Some(Deadline::Idle),
            _ => None,
        }
    }

    /// Has any deadline elapsed as of now?
    pub fn poll_timeout(&self) -> bool {
        self.expired(Instant::now()).is_some()
    }

    /// The earliest pending deadline, to bound the next blocking read.
    pub fn next_deadline(&self) -> Instant {
        match self.request_deadline {
            Some(deadline) => deadline.min(self.idle_deadline),
            None => self.idle_deadline,
        }
    }
}
