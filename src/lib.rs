//! Rclone Mount Manager - supervise rclone mount helpers from a menu
//!
//! One helper process per mounted remote, started with a fixed set of
//! VFS cache flags, watched for liveness and always torn down on the way
//! out (unmount, replacement, quit, Ctrl+C or an unexpected error).
//!
//! ## Components
//!
//! - **Process Supervisor**: launch, probe and stop helpers with a grace
//!   period and a pluggable escalation policy
//! - **Mount Registry**: remote name to mount table with single-mount
//!   replacement and best-effort shutdown
//! - **Remotes**: `rclone listremotes` enumeration
//! - **UI**: line-based menus and the drive monitor

pub mod config;
pub mod error;
pub mod process;
pub mod registry;
pub mod remotes;
pub mod target;
pub mod ui;

// Re-export commonly used types
pub use config::{EscalationPolicy, ManagerConfig, MountMode};
pub use error::{EnumerationError, LaunchError, ManagerError, MountError, Result, StopWarning};
pub use process::{HelperCommand, ProcessHandle, ProcessSupervisor, ShutdownSignals};
pub use registry::{MountRegistry, ShutdownReport, TrackedMount, UnmountReport};
pub use target::MountTarget;
