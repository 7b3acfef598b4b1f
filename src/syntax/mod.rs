//! Front end for brine, the script language the embedded runtime evaluates.
//!
//! The surface is deliberately small: `eval_string` sources are expression
//! programs (literals, globals, calls, `eval { .. }` blocks, `require`),
//! not module files, so there is no interner, no span table, and no
//! recovery machinery here. A lex or parse failure is reported as a single
//! message and becomes a runtime error at the eval boundary.

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod token;
