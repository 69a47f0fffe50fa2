use std::collections::{HashMap, HashSet, VecDeque};
use std::io;

use sysinfo::{Pid, ProcessStatus, System};

/// Signals the supervisor sends while tearing a tree down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Terminate,
    Kill,
}

impl Signal {
    fn as_raw(self) -> libc::c_int {
        match self {
            Self::Terminate => libc::SIGTERM,
            Self::Kill => libc::SIGKILL,
        }
    }
}

/// What the supervisor needs from the OS process table
///
/// Signalling a process that no longer exists is not an error: it returns
/// `Ok(false)`.
pub trait ProcessTable: Send + Sync {
    /// Every live process below `pid`, children before grandchildren
    fn list_descendants(&self, pid: u32) -> Vec<u32>;

    fn signal(&self, pid: u32, signal: Signal) -> io::Result<bool>;

    fn signal_group(&self, pgid: u32, signal: Signal) -> io::Result<bool>;

    /// The subset of `pids` that has not exited yet; zombies count as exited
    fn still_running(&self, pids: &[u32]) -> Vec<u32>;
}

/// [`ProcessTable`] backed by `sysinfo` snapshots and `kill(2)`
#[derive(Debug, Default)]
pub struct SystemProcessTable;

impl SystemProcessTable {
    fn snapshot() -> System {
        let mut system = System::new();
        system.refresh_processes();
        system
    }
}

impl ProcessTable for SystemProcessTable {
    fn list_descendants(&self, pid: u32) -> Vec<u32> {
        let system = Self::snapshot();

        let mut children: HashMap<Pid, Vec<Pid>> = HashMap::new();
        for (proc_pid, process) in system.processes() {
            if let Some(parent) = process.parent() {
                children.entry(parent).or_default().push(*proc_pid);
            }
        }

        let root = Pid::from_u32(pid);
        let mut queue = VecDeque::from([root]);
        let mut seen: HashSet<Pid> = HashSet::from([root]);
        let mut descendants = Vec::new();
        while let Some(current) = queue.pop_front() {
            if let Some(kids) = children.get(&current) {
                for child in kids {
                    if seen.insert(*child) {
                        descendants.push(child.as_u32());
                        queue.push_back(*child);
                    }
                }
            }
        }

        descendants
    }

    fn signal(&self, pid: u32, signal: Signal) -> io::Result<bool> {
        send(pid, signal, false)
    }

    fn signal_group(&self, pgid: u32, signal: Signal) -> io::Result<bool> {
        send(pgid, signal, true)
    }

    fn still_running(&self, pids: &[u32]) -> Vec<u32> {
        if pids.is_empty() {
            return Vec::new();
        }
        let system = Self::snapshot();
        pids.iter()
            .copied()
            .filter(|pid| {
                system.process(Pid::from_u32(*pid)).is_some_and(|p| {
                    !matches!(p.status(), ProcessStatus::Zombie | ProcessStatus::Dead)
                })
            })
            .collect()
    }
}

fn send(pid: u32, signal: Signal, group: bool) -> io::Result<bool> {
    // 0 and out-of-range ids would address our own group or every process
    let target = match libc::pid_t::try_from(pid) {
        Ok(p) if p > 0 => p,
        _ => return Ok(false),
    };
    let target = if group { -target } else { target };

    let result = unsafe { libc::kill(target, signal.as_raw()) };
    if result == 0 {
        return Ok(true);
    }

    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(false)
    } else {
        Err(err)
    }
}
