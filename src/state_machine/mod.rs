// Document job state machine
//
// Statuses, the events that move between them, and the conditional transition
// applied atomically by the job status store.

pub mod events;
pub mod states;
pub mod transitions;

pub use events::JobEvent;
pub use states::JobStatus;
pub use transitions::{allowed_edges, JobTransition, TransitionOutcome};
