//! KumoFlow Cloud Core
//!
//! Provider-neutral building blocks for declarative management of remote
//! cloud resources: resource descriptors, the asynchronous operation
//! convergence poller, the resource lifecycle trait, and the recorded
//! state store.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────┐
//! │                 resource handlers                 │
//! │      (kumoflow-cloud-azure, future providers)     │
//! └──────────────────┬────────────────────────────────┘
//!                    │ implements
//! ┌──────────────────▼────────────────────────────────┐
//! │                 kumoflow-cloud                    │
//! │  ┌─────────────────────────────────────────────┐  │
//! │  │  trait ResourceLifecycle { create, read,    │  │
//! │  │                            update, delete } │  │
//! │  └─────────────────────────────────────────────┘  │
//! │  ┌──────────────┐  ┌──────────────┐  ┌─────────┐  │
//! │  │  Convergence │  │  Descriptors │  │  State  │  │
//! │  │   (poller)   │  │  (identity)  │  │  store  │  │
//! │  └──────────────┘  └──────────────┘  └─────────┘  │
//! └───────────────────────────────────────────────────┘
//! ```
//!
//! Mutating calls against a cloud management plane are accepted long before
//! the resource reaches a terminal state. The [`poll::Convergence`] loop is
//! what turns an accepted write into a settled one: it repeatedly derives a
//! typed status from the remote representation and blocks until the status
//! matches a target set, proving creation, update, or (by absence) deletion.

pub mod descriptor;
pub mod error;
pub mod poll;
pub mod provider;
pub mod state;

// Re-exports
pub use descriptor::{PathSegment, ResourceDescriptor};
pub use error::{CloudError, Result};
pub use poll::{
    Convergence, ConvergeError, MissingBehavior, Observation, PollOutcome, StatusProbe, Transience,
};
pub use provider::ResourceLifecycle;
pub use state::{CloudState, ResourceRecord, ResourceStatus, StateLock, StateStore};
