pub mod environment;
pub mod instance_management;
pub mod observability;
pub mod permissions;
pub mod reconciliation;
pub mod verification;
