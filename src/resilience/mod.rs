//! # Resilience Module
//!
//! Fault tolerance for the long-running loops: a bounded retry policy with per-call
//! timeouts for external heavy calls, and a consecutive-error tracker that decides
//! when a loop should rebuild its store connection.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use eventgraph_core::resilience::RetryPolicy;
//! use std::time::Duration;
//!
//! # async fn example() -> eventgraph_core::error::PipelineResult<()> {
//! let policy = RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(30));
//! let pages = policy
//!     .call("extract_document", |_attempt| async { Ok::<_, _>(42u32) })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod error_tracker;
pub mod retry;

pub use error_tracker::{ConsecutiveErrorTracker, ErrorAction};
pub use retry::RetryPolicy;
