pub mod capabilities;
pub mod events;
pub mod priority;
pub mod record;

pub use capabilities::QueueCapabilities;
pub use events::JobEvent;
pub use priority::JobPriority;
pub use record::{JobStatus, LeasedJob, QueueEntry};
