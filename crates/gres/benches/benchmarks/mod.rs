pub mod alloc;
pub mod step;
