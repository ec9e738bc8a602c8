//! Emergency halt controls.

mod killswitch;

pub use killswitch::{KillSwitch, KillSwitchState};
