//! A self-hosted feature-flag evaluation engine: deterministic hashing and
//! bucketing, a sandboxed expression language for rules and segments, a
//! progressive-rollout decision procedure, and a per-tenant definition
//! store. HTTP transport, auth, and the admin surface live elsewhere —
//! this crate exposes the traits and types they call against.

pub mod config;
pub mod context;
pub mod decision;
pub mod error;
pub mod expr;
pub mod facade;
pub mod hashing;
pub mod model;
pub mod store;

pub use config::EngineConfig;
pub use context::EvalContext;
pub use decision::DecisionResult;
pub use error::{EngineError, EngineResult};
pub use expr::Now;
pub use facade::EvaluationFacade;
pub use model::{FlagDefinition, FlagType, RolloutStep, TenantDocument, TenantKey, Variation};
pub use store::{InMemoryTenantStore, TenantStore};
