//! Package engine — lexing, parsing, argument resolution, job execution.

pub mod abi;
pub mod config;
pub mod diff;
pub mod executor;
pub mod jobs;
pub mod lexer;
pub mod parser;
pub mod resolver;
pub mod symbols;
pub mod tester;
pub mod types;
