pub mod analyzer;
pub mod charts;
pub mod cleaner;
pub mod pipeline;
pub mod reporter;
pub mod scheduler;

pub use analyzer::Analyzer;
pub use cleaner::{CleanReport, Cleaner};
pub use pipeline::{LiveRunner, Pipeline, PipelineRunner, RunSummary};
pub use reporter::{DeliveryOutcome, DeliveryReport, Reporter};
pub use scheduler::{Scheduler, SchedulerState, TickOutcome};
