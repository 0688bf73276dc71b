mod handle;
pub mod poller;
pub mod starvation;

pub use handle::{CancelHandle, CollectorStream};
pub use poller::{Poller, SnapshotStream, start_polling};
pub use starvation::{AlertStream, Hysteresis, StarvationDetector, start_detecting};
