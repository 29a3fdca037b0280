pub mod cdevents;
pub mod cluster;
pub mod colour;
pub mod context;
pub mod cutover;
pub mod engine;
pub mod helm;
pub mod manager;
pub mod manifest;
pub mod names;
pub mod release;
pub mod retry;
pub mod rollback;
pub mod scale;
pub mod standard;

pub use context::Context;
pub use cutover::{run_cutover, CutoverError, CutoverReport, CutoverRequest};
pub use engine::{deploy, DeployError, DeployOutcome};
pub use rollback::{deploy_with_rollback, rollback, ReleaseFailure, RollbackError};
