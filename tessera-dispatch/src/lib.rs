//! Routes filter requests to the modern pipeline first, falling back to the legacy path when
//! the pipeline lacks a capability, and owns the session wiring around them.

pub mod config;
pub mod context;
pub mod dispatcher;
pub mod engine;
pub mod legacy;
pub mod request;
pub mod sink;
pub mod status;
pub mod task;

pub use config::{Config, load_config};
pub use context::SessionContext;
pub use dispatcher::{CapabilityGap, DispatchOutcome, DispatchReport, Served, ServedBy, StranglerDispatcher};
pub use engine::{BuilderPipeline, ModernPipeline, PipelineError};
pub use legacy::LegacyPath;
pub use request::{DispatchRequest, DispatchRequestKind};
pub use sink::{FilterApplication, RecordingSink, ResultSink, StoreSubsetSink};
pub use task::{DispatchOutput, DispatchTask};
