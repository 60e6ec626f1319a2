pub mod types;

pub mod parse;
pub mod tokenize;

mod define;
mod generate;
mod layout;
pub mod walk;
