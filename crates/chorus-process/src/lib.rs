//! Child-process supervision for Chorus.
//!
//! [`monitor::OutputMonitor`] streams a child's stdout/stderr line-by-line
//! into log files, a rolling tail, and an event channel. The
//! [`supervisor::ProcessSupervisor`] keeps the per-agent registry, evaluates
//! trigger callbacks (output matches with debounce, exit filters, timeouts),
//! and walks the SIGTERM → grace → SIGKILL ladder on termination.

pub mod callbacks;
pub mod models;
pub mod monitor;
pub mod supervisor;

pub use models::{
    CallbackAction, ExitFilter, HookTrigger, ProcessCallback, ProcessStatus, ProcessType,
    TrackedProcess,
};
pub use supervisor::{ProcessEventSink, ProcessSupervisor, SpawnRequest};
