#[macro_use]
mod macros;
mod parse;
pub use parse::{parse, split_words, template_segments, Error};
pub mod ast;
