//! Status reporting: conditions, setters, and the updaters that write them

pub mod clock;
pub mod conditions;
pub mod group;
pub mod prepare;
pub mod queue;
pub mod retry;
pub mod setters;
pub mod updater;

pub use clock::{Clock, FakeClock, SystemClock};
pub use group::{FatalError, LeaderAwareGroupUpdater};
pub use queue::{Queue, QueueObject};
pub use retry::{poll_with_backoff, Backoff, PollError};
pub use updater::{Setter, UpdateRequest, Updater};
