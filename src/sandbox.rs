mod capture;
mod process_table;
mod shutdown;
mod supervisor;

pub use process_table::{ProcessTable, Signal, SystemProcessTable};
pub use shutdown::{Reclaimed, TreeReaper};
pub use supervisor::Supervisor;

/// Bytes captured from a program that exited on its own
#[derive(Debug)]
pub struct RawOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Negated signal number when the process was ended by a signal
    pub return_code: Option<i32>,
}

/// How a supervised run ended
#[derive(Debug)]
pub enum Outcome {
    Completed(RawOutput),
    /// The deadline fired; whatever the program printed is discarded
    TimedOut,
    Cancelled,
}
