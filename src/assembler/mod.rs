pub mod ast;
pub mod conductor;
pub mod data;
pub mod eval;
pub mod lang;
pub mod model;
pub mod output;
pub mod phases;
pub mod scope;

pub use conductor::{assemble_str, Assembler, Error, Options};
pub use output::{intel_hex, ContentBlock, Output};
