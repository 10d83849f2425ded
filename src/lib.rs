//! Dining philosophers, Chandy–Misra style.
//!
//! Philosophers never share a lock around chopsticks. Each runs its own loop
//! and hands chopsticks over by message: a chopstick is given up on request
//! only once it is dirty (used since it was received), which keeps the
//! dinner free of both deadlock and starvation.

pub mod chopstick;
pub mod config;
pub mod error;
pub mod mailbox;
pub mod message;
pub mod philosopher;
pub mod sink;
pub mod table;

pub type PhilosopherId = usize;
pub type ChopstickId = usize;

pub use config::DinnerConfig;
pub use error::{DinnerError, ProtocolViolation, TopologyError};
pub use philosopher::{Report, State};
pub use sink::Sink;
pub use table::{DinnerReport, Seat, Table};
