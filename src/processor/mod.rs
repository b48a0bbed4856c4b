//! # Item Processing
//!
//! Raw ingress, source plugins, the monitored symbol universe and the per-source
//! [`ItemProcessor`] loop that moves raw items to the processed namespace.

pub mod ingress;
pub mod item_processor;
pub mod plugin;

pub use ingress::RawIngress;
pub use item_processor::{ItemProcessor, ProcessOutcome};
pub use plugin::{EnrichmentService, JsonSourcePlugin, NoEnrichment, SourcePlugin, SymbolUniverse};
