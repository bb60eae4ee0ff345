//! Session ownership and the single-flight discipline.

pub mod guard;
pub mod pool;

pub use guard::{FlightTicket, SingleFlight};
pub use pool::{SessionHandle, SessionPool};
