pub mod command;
pub mod escalation;
pub mod handle;
pub mod lifecycle;
pub mod signals;
pub mod supervisor;

pub use command::{HelperCommand, MOUNT_FLAGS};
pub use escalation::{Escalation, KillAllByName, KillProcessGroup};
pub use handle::{OutputCapture, OutputLine, ProcessHandle, Stream};
pub use lifecycle::ExitStatus;
pub use signals::{ShutdownSignals, SignalEvent};
pub use supervisor::{ProcessSupervisor, DEFAULT_GRACE_PERIOD};
