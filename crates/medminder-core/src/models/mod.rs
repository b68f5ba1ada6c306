//! Domain models for the medminder system.

mod adherence;
mod alert;
mod device;
mod dose;
mod patient;
mod reminder;

pub use adherence::*;
pub use alert::*;
pub use device::*;
pub use dose::*;
pub use patient::*;
pub use reminder::*;

use chrono::{Local, NaiveDateTime, Timelike};

/// Current local civil time, truncated to whole seconds.
///
/// All scheduling uses the deployment's civil clock so that a dose lands on the
/// calendar day the patient sees, not a UTC-shifted one.
pub fn civil_now() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}
