pub mod repo;

pub use repo::{ExistenceVerifier, HttpExistenceVerifier};
