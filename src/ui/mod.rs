pub mod console;
pub mod menu;
pub mod monitor;
pub mod table;

pub use console::Console;
pub use menu::MountManagerUi;
pub use monitor::{probe, DriveState};
