// src/grbl/mod.rs - GRBL 1.1 line protocol
pub mod command;
pub mod response;
pub mod settings;
pub mod status;

pub use command::{Axis, MotionCommand, MoveMode, Realtime, UnknownAxis};
pub use response::{alarm_description, error_description, GrblResponse};
pub use settings::{GrblSettings, SettingMismatch};
pub use status::{MachineState, Position, StatusReport};
