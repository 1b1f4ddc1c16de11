pub mod accounting;
pub mod admission;
pub mod engine;
pub mod rebase;
pub(crate) mod selection;
