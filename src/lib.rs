// Declare modules publicly so they are part of the library interface
pub mod config;
pub mod environment;
pub mod evaluator;
pub mod interpreter;
pub mod lexer;
pub mod module;
pub mod parser;
pub mod pretty_print;
pub mod primitives;
pub mod source;
pub mod special_forms;
pub mod types;

pub use config::{Config, ConfigError, EditMode};
pub use environment::{EnvError, Env, Environment};
pub use evaluator::{
    ErrorKind, EvalError, EvalResult, apply, evaluate, set_max_eval_depth, with_eval_stack,
};
pub use interpreter::{Error, Interpreter};
pub use lexer::{LexerError, Token, TokenKind, tokenize};
pub use module::{FileModuleLoader, MemoryModuleLoader, Module, ModuleError, ModuleLoader};
pub use parser::{ParseError, Parser, parse_program, parse_str};
pub use source::Span;
pub use special_forms::special_form_identifiers;
pub use types::{Closure, Node, Procedure, Sexpr, Symbol};
