pub mod api;
pub mod config;
pub mod stats;
pub mod types;
pub mod worker;

#[cfg(test)]
mod tests;
