//! Port allocator

use std::collections::BTreeSet;
use std::sync::Mutex;

use tracing::debug;

use crate::errors::EngineError;

#[derive(Debug)]
struct PoolState {
    in_use: BTreeSet<u16>,
    /// Next port to try; rotates so a released port is not handed out again right away
    cursor: u16,
}

/// Bounded pool of ports drawn from a contiguous range (inclusive)
#[derive(Debug)]
pub struct PortAllocator {
    start: u16,
    end: u16,
    state: Mutex<PoolState>,
}

impl PortAllocator {
    /// Create an allocator over `start..=end`
    pub fn new(start: u16, end: u16) -> Result<Self, EngineError> {
        if start == 0 || start > end {
            return Err(EngineError::ConfigError(format!(
                "Invalid port range: {}-{}",
                start, end
            )));
        }

        Ok(Self {
            start,
            end,
            state: Mutex::new(PoolState {
                in_use: BTreeSet::new(),
                cursor: start,
            }),
        })
    }

    pub fn range(&self) -> (u16, u16) {
        (self.start, self.end)
    }

    /// Total number of ports in the range
    pub fn capacity(&self) -> usize {
        usize::from(self.end - self.start) + 1
    }

    /// Hand out a free port, failing fast when the range is exhausted
    pub fn allocate(&self) -> Result<u16, EngineError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let capacity = self.capacity();
        if state.in_use.len() >= capacity {
            return Err(EngineError::PortExhausted {
                start: self.start,
                end: self.end,
            });
        }

        let mut candidate = state.cursor;
        for _ in 0..capacity {
            if !state.in_use.contains(&candidate) {
                state.in_use.insert(candidate);
                state.cursor = self.next_after(candidate);
                debug!("Allocated port {}", candidate);
                return Ok(candidate);
            }
            candidate = self.next_after(candidate);
        }

        Err(EngineError::PortExhausted {
            start: self.start,
            end: self.end,
        })
    }

    /// Mark a specific port as in use (reload of persisted deployments)
    pub fn reserve(&self, port: u16) -> Result<(), EngineError> {
        if port < self.start || port > self.end {
            return Err(EngineError::ValidationError(format!(
                "Port {} outside range {}-{}",
                port, self.start, self.end
            )));
        }
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.in_use.insert(port);
        Ok(())
    }

    /// Return a port to the pool. Releasing a free port is a no-op.
    pub fn release(&self, port: u16) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.in_use.remove(&port) {
            debug!("Released port {}", port);
        }
    }

    pub fn is_in_use(&self, port: u16) -> bool {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.in_use.contains(&port)
    }

    pub fn in_use(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.in_use.len()
    }

    pub fn available(&self) -> usize {
        self.capacity() - self.in_use()
    }

    fn next_after(&self, port: u16) -> u16 {
        if port >= self.end {
            self.start
        } else {
            port + 1
        }
    }
}
