//! Per-IP sliding-window connection rate limiter (§4.4, §5: the only
//! process-global mutable state besides the session registry).

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

struct SlidingWindow {
    window: Duration,
    max_actions: usize,
    timestamps: VecDeque<Instant>,
}

impl SlidingWindow {
    fn new(window: Duration, max_actions: usize) -> Self {
        Self {
            window,
            max_actions,
            timestamps: VecDeque::new(),
        }
    }

    /// Returns `true` if the connection is within the limit and records it.
    fn try_record(&mut self) -> bool {
        let now = Instant::now();
        let window = self.window;
        self.timestamps.retain(|&t| now.duration_since(t) < window);
        if self.timestamps.len() >= self.max_actions {
            return false;
        }
        self.timestamps.push_back(now);
        true
    }

    fn is_empty(&mut self) -> bool {
        let now = Instant::now();
        let window = self.window;
        self.timestamps.retain(|&t| now.duration_since(t) < window);
        self.timestamps.is_empty()
    }
}

/// Tracks a sliding window of connection attempts per source IP.
pub struct ConnectionRateLimiter {
    window: Duration,
    max_connections: usize,
    windows: Mutex<HashMap<IpAddr, SlidingWindow>>,
}

impl ConnectionRateLimiter {
    pub fn new(window_secs: u64, max_connections: usize) -> Self {
        Self {
            window: Duration::from_secs(window_secs),
            max_connections,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `true` if a new connection from `addr` is permitted.
    pub fn try_admit(&self, addr: IpAddr) -> bool {
        let mut windows = self.windows.lock();
        let entry = windows
            .entry(addr)
            .or_insert_with(|| SlidingWindow::new(self.window, self.max_connections));
        entry.try_record()
    }

    /// Opportunistic cleanup on disconnect: drop an IP's window entirely
    /// once it is empty, so the map does not grow unboundedly.
    pub fn cleanup(&self, addr: &IpAddr) {
        let mut windows = self.windows.lock();
        if let Some(entry) = windows.get_mut(addr) {
            if entry.is_empty() {
                windows.remove(addr);
            }
        }
    }
}
