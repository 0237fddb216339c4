//! Background triggers and multi-model runs on top of the parley engine.
//!
//! - [`scheduler`]: interval-driven trigger checks with in-flight dedup
//! - [`trigger_executor`]: baseline-aware evaluation of a single trigger
//! - [`verdict`]: the fenced JSON verdict grammar
//! - [`fanout`] and [`council`]: comparison and council runs
//!
//! Every collaborator (provider registry, tool executor, store) is passed in
//! at construction.

pub mod council;
pub mod events;
pub mod fanout;
pub mod scheduler;
pub mod store;
pub mod trigger_executor;
pub mod verdict;

pub use council::{CouncilConfig, CouncilOutcome, CHAIRMAN_SYSTEM_PROMPT};
pub use events::{FanoutEvent, FanoutEvents, MemberState, MemberStatus};
pub use fanout::{ComparisonResponse, FanoutError, FanoutOrchestrator};
pub use scheduler::{PassReport, SchedulerConfig, TriggerObserver, TriggerScheduler};
pub use store::{InMemoryTriggerStore, StoreError, TriggerStore};
pub use trigger_executor::{Evaluation, TriggerEvaluator, TriggerExecutor, TriggerExecutorConfig};
pub use verdict::{interpret, parse_verdict, ParsedVerdict, Verdict, VerdictError};
