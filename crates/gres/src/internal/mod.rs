#[macro_use]
pub(crate) mod common;
pub mod alloc;
pub mod config;
pub mod resources;

#[cfg(test)]
pub mod tests;
