//! # Reconcile
//!
//! A dependency-aware engine for converging declared cloud resources.
//!
//! ## Core Concepts
//!
//! - **ResourceDescriptor**: A declared resource with properties that may
//!   reference config values or the outputs of other resources
//! - **ResourceGraph**: Validated, acyclic graph built from descriptors
//! - **ExecutionPlan**: Waves of nodes whose dependencies all sit in earlier waves
//! - **Provider**: Adapter that reads, creates, updates and deletes resources
//! - **Engine**: Applies a plan wave by wave with bounded parallelism, retrying
//!   eventual-consistency failures and checkpointing RunState after each wave
//!
//! ## Example
//!
//! ```
//! use reconcile::{
//!     Engine, ExecuteOptions, ExecutionPlan, GraphBuilder, BuildConfig, MemoryProvider,
//!     MemoryStore, NoProgress, ResourceDescriptor, ResourceKind, Value,
//! };
//!
//! let descriptors = vec![
//!     ResourceDescriptor::new(ResourceKind::Project, "hub")
//!         .property("project_id", Value::config("hub.project_id"))
//!         .property("name", "Hub"),
//!     ResourceDescriptor::new(ResourceKind::Service, "enable-iam")
//!         .property("project", Value::output("hub", "project_id"))
//!         .property("service", "iam.googleapis.com"),
//! ];
//!
//! let config = BuildConfig::new().with("hub.project_id", "hub-1234");
//! let graph = GraphBuilder::new(config).build(descriptors)?;
//! let plan = ExecutionPlan::new(&graph);
//! assert_eq!(plan.waves, vec![vec!["hub".to_string()], vec!["enable-iam".to_string()]]);
//!
//! let provider = MemoryProvider::new();
//! let store = MemoryStore::new();
//! let result = Engine::new(&provider, &store, ExecuteOptions::default())
//!     .apply(&graph, &plan, &[], &mut NoProgress)?;
//! assert!(result.is_success());
//! # Ok::<(), reconcile::Error>(())
//! ```
//!
//! ## Provider Traits
//!
//! - [`Provider`]: Talks to the backing API
//! - [`StateStore`]: Persists [`RunState`] between runs
//! - [`ProgressCallback`]: Receives wave and node progress
//! - [`RetryCallback`]: Observes retries of eventually-consistent failures
//!
//! None of these pull in UI or signal handling, so the engine can be driven
//! from a CLI, a test, or a service.

pub mod context;
pub mod diff;
pub mod error;
pub mod executor;
pub mod graph;
pub mod memory;
pub mod planner;
pub mod provider;
pub mod resource;
pub mod retry;
pub mod state;
pub mod types;
pub mod value;

// Re-export main types at crate root
pub use context::{CancelToken, NoProgress, ProgressCallback};
pub use diff::{DiffSummary, ResourceDiff, compute_diffs, group_by_kind};
pub use error::{ConfigError, Error, ErrorCategory, ProviderError, Result, StateError};
pub use executor::Engine;
pub use graph::{BuildConfig, GraphBuilder, ResourceGraph, ResourceNode};
pub use memory::{Fault, MemoryProvider, MemoryStore};
pub use planner::ExecutionPlan;
pub use provider::{Action, Observed, Provider, ensure};
pub use resource::{ResourceDescriptor, ResourceKind};
pub use retry::{LogCallback, NoCallback, RetryCallback, RetryOutcome, RetryPolicy, RetryState, with_retry};
pub use state::{JsonFileStore, NodeStatus, ResourceRecord, RunState, STATE_SCHEMA_VERSION, StateStore};
pub use types::{ExecuteOptions, ExecuteSummary, ExportSpec, NodeReport, RunResult};
pub use value::{Attributes, OutputRef, Properties, Value};
