// tkc — Tile Kernel Compiler
//
// Library root. Front-end (lexer, parser, resolve) builds SSA modules; the
// pass pipeline infers alignment and layouts, inserts shared-memory copies,
// allocates shared memory and hands the result to a lowering.

pub mod align;
pub mod alloc;
pub mod ast;
pub mod cfg;
pub mod config;
pub mod copy_insert;
pub mod diag;
pub mod dot;
pub mod id;
pub mod ir;
pub mod layout;
pub mod lexer;
pub mod logging;
pub mod lower;
pub mod parser;
pub mod pass;
pub mod pipeline;
pub mod resolve;
pub mod target;
pub mod verify;
