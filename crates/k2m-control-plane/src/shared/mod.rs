pub mod config;
pub mod error;
pub mod timeout;
pub mod types;
#[cfg(test)]
pub(crate) mod testing;
