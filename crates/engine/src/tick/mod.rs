pub mod scheduler;
pub mod sink;

pub use scheduler::{Scheduler, TickBudget, TickReport};
pub use sink::{BlockSink, LevelNotice, NullSink, RecordingSink, SinkEvent};
