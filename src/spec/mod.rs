pub mod catalog;
pub mod types;

mod defs;
