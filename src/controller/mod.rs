pub mod client;
pub mod context;
pub mod deployer;
pub mod error;
pub mod ledger;
pub mod reconciler;
pub mod state_machine;

pub use client::{KubeClient, KubeClientImpl, PolicyResource, TransportLayer, connect};
pub use context::Context;
pub use deployer::{Deployer, decode};
pub use error::{Error, Result, is_already_exists, is_not_found};
pub use ledger::{AnnotationLedger, Ledger};
pub use reconciler::{Action, PolicyReconciler, ReconcileReport, ReconciliationMode};
pub use state_machine::{PolicyEvent, PolicyPhase, PolicyStates};
