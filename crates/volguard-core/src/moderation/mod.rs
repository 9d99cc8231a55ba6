//! Violation tracking and the punishment state machine.

mod gateway;
mod pipeline;
mod punishment;
mod tracker;

pub use gateway::{send_dm, Member, ModerationGateway};
pub use pipeline::{run_exceed_loop, ExceedEvent, ExceedHandler, HandledExceed};
pub use punishment::{calculate_warnings_until_next, next_punishment, PunishmentEngine, PunishmentOutcome};
pub use tracker::ViolationTracker;
