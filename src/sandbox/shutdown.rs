use std::time::Duration;

use tokio::time::Instant;

use super::process_table::{ProcessTable, Signal};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Pids touched while reclaiming a tree
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Reclaimed {
    /// Processes that received the graceful signal, the leader last
    pub terminated: Vec<u32>,
    /// Processes still running at the deadline that were force-killed
    pub killed: Vec<u32>,
}

/// Two-phase teardown of a supervised child and every process below it
///
/// Phase one sends a graceful termination to every descendant and then to the
/// leader, so all of them share one grace window ending at `deadline`. Phase
/// two force-kills whatever is left. The waiting phase is a future raced
/// against the deadline, so it is simply dropped when time runs out.
///
/// The leader is only observed through the table, never waited on, so the
/// caller still owns reaping it.
pub struct TreeReaper<'a, T: ProcessTable + ?Sized> {
    table: &'a T,
    poll_interval: Duration,
}

impl<'a, T: ProcessTable + ?Sized> TreeReaper<'a, T> {
    pub fn new(table: &'a T) -> Self {
        Self {
            table,
            poll_interval: POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub async fn reclaim(&self, leader: u32, deadline: Instant) -> Reclaimed {
        // Listed before the leader is signalled, while they still hang below it
        let descendants = self.table.list_descendants(leader);
        if !descendants.is_empty() {
            log::debug!(
                "Terminating {} descendant(s) of process {leader}",
                descendants.len()
            );
        }

        let mut terminated: Vec<u32> = descendants
            .into_iter()
            .filter(|&pid| self.deliver(pid, Signal::Terminate))
            .collect();
        if self.deliver_leader(leader, Signal::Terminate) {
            terminated.push(leader);
        }
        if terminated.is_empty() {
            return Reclaimed::default();
        }

        let survivors = match tokio::time::timeout_at(deadline, self.wait_exited(&terminated)).await
        {
            Ok(()) => Vec::new(),
            Err(_) => self.table.still_running(&terminated),
        };

        let killed: Vec<u32> = survivors
            .into_iter()
            .filter(|&pid| {
                let delivered = if pid == leader {
                    self.deliver_leader(pid, Signal::Kill)
                } else {
                    self.deliver(pid, Signal::Kill)
                };
                if delivered {
                    log::debug!("Killed stubborn process {pid}");
                }
                delivered
            })
            .collect();

        Reclaimed { terminated, killed }
    }

    async fn wait_exited(&self, pids: &[u32]) {
        loop {
            if self.table.still_running(pids).is_empty() {
                return;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Returns whether the signal reached a live process
    fn deliver(&self, pid: u32, signal: Signal) -> bool {
        match self.table.signal(pid, signal) {
            Ok(true) => true,
            Ok(false) => {
                log::debug!("Process {pid} already exited");
                false
            }
            Err(e) => {
                log::warn!("Error sending {signal:?} to process {pid}: {e}");
                false
            }
        }
    }

    /// Signals the leader's whole group, or the leader alone if that fails
    fn deliver_leader(&self, leader: u32, signal: Signal) -> bool {
        match self.table.signal_group(leader, signal) {
            Ok(true) => true,
            Ok(false) => self.deliver(leader, signal),
            Err(e) => {
                log::warn!("Error sending {signal:?} to process group {leader}: {e}");
                self.deliver(leader, signal)
            }
        }
    }
}
