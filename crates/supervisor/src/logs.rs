//! Capped ring buffers for child stdout/stderr.
//!
//! One reader task per pipe drains lines into the ring; API readers take
//! snapshots. The cap keeps a noisy child from growing host memory.

use std::{collections::VecDeque, sync::Arc};

use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    sync::Mutex,
};

/// Lines kept per stream.
pub const RING_CAPACITY: usize = 1024;

/// Last-N-lines buffer for one child stream.
pub struct LogRing {
    capacity: usize,
    lines: Mutex<VecDeque<String>>,
}

impl Default for LogRing {
    fn default() -> Self {
        Self::new(RING_CAPACITY)
    }
}

impl LogRing {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            lines: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
        }
    }

    pub async fn push(&self, line: String) {
        let mut lines = self.lines.lock().await;
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// Current contents, oldest first.
    pub async fn snapshot(&self) -> Vec<String> {
        self.lines.lock().await.iter().cloned().collect()
    }

    /// The most recent `n` lines joined for crash diagnostics.
    pub async fn tail(&self, n: usize) -> String {
        let lines = self.lines.lock().await;
        let skip = lines.len().saturating_sub(n);
        lines
            .iter()
            .skip(skip)
            .cloned()
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Drain a child pipe into a ring until EOF. Runs as its own task.
pub fn spawn_reader<R>(stream: R, ring: Arc<LogRing>) -> tokio::task::JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    let trimmed = line.trim_end_matches(['\r', '\n']);
                    if !trimmed.is_empty() {
                        ring.push(trimmed.to_string()).await;
                    }
                },
                Err(_) => break,
            }
        }
    })
}
