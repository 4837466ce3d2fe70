pub mod common;
pub mod errors;
pub mod events;
pub mod filter;
