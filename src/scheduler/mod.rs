mod demand;
mod sweep;

pub use demand::{DemandScheduler, VisibilityEvent};
pub use sweep::{SweepPhase, SweepPoller, SweepStatus};
