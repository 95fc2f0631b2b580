use crate::config::Config;
use crate::environment::{Env, Environment};
use crate::evaluator::{self, EvalError, EvalResult};
use crate::module::{FileModuleLoader, ModuleLoader};
use crate::parser::{ParseError, parse_program};
use crate::source::Span;
use crate::types::Node;
use std::path::Path;
use std::rc::Rc;
use thiserror::Error;

/// Anything that can go wrong running source text.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Eval(#[from] EvalError),
    #[error("Could not read '{path}': {message}")]
    Io { path: String, message: String },
}

/// Owns a root environment and the module loader its `import` forms use.
///
/// Closures stored in the root frame keep that frame alive through their captured
/// environment, so dropping the interpreter clears the frame and unloads every module.
pub struct Interpreter {
    global_env: Env,
    loader: Rc<dyn ModuleLoader>,
}

impl Interpreter {
    /// An interpreter importing modules from `config.load_paths`.
    pub fn new(config: &Config) -> Self {
        let loader: Rc<dyn ModuleLoader> =
            Rc::new(FileModuleLoader::new(config.load_paths.clone()));
        Self::with_loader(loader)
    }

    pub fn with_loader(loader: Rc<dyn ModuleLoader>) -> Self {
        let global_env = Environment::new_global_populated();
        global_env
            .borrow_mut()
            .set_module_loader(Rc::downgrade(&loader));
        Interpreter { global_env, loader }
    }

    pub fn global_env(&self) -> &Env {
        &self.global_env
    }

    pub fn loader(&self) -> &Rc<dyn ModuleLoader> {
        &self.loader
    }

    pub fn evaluate(&self, node: &Node) -> EvalResult {
        evaluator::evaluate(node, &self.global_env)
    }

    /// Evaluates every form in `source`, returning the value of the last (nil if none).
    pub fn eval_str(&self, source: &str) -> Result<Node, Error> {
        let forms = parse_program(source)?;
        let mut result = Node::new_nil(Span::default());
        for form in &forms {
            result = self.evaluate(form)?;
        }
        Ok(result)
    }

    /// Reads and evaluates a script file.
    pub fn run_file(&self, path: &Path) -> Result<Node, Error> {
        let source = std::fs::read_to_string(path).map_err(|e| Error::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        tracing::debug!(path = %path.display(), "running script");
        self.eval_str(&source)
    }

    /// Calls a procedure value (typically one returned by `eval_str`) from the host.
    pub fn apply(&self, procedure: &Node, args: Vec<Node>) -> EvalResult {
        evaluator::apply(procedure, args, &self.global_env, procedure.span)
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new(&Config::default())
    }
}

impl Drop for Interpreter {
    fn drop(&mut self) {
        self.loader.unload_all();
        self.global_env.borrow_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::ErrorKind;
    use crate::module::MemoryModuleLoader;
    use std::rc::Weak;

    fn assert_eval(interpreter: &Interpreter, input: &str, expected: &str) {
        match interpreter.eval_str(input) {
            Ok(result) => assert_eq!(result.to_string(), expected, "Input: '{}'", input),
            Err(e) => panic!("Evaluation failed for input '{}': {}", input, e),
        }
    }

    #[test]
    fn test_eval_str_returns_last_value() {
        let interpreter = Interpreter::default();
        assert_eval(&interpreter, "(define x 2) (define y 3) (* x y)", "6");
        assert_eval(&interpreter, "", "nil");
        assert_eval(&interpreter, "; only a comment", "nil");
    }

    #[test]
    fn test_state_persists_between_calls() {
        let interpreter = Interpreter::default();
        interpreter
            .eval_str("(define counter (fn [n] (+ n 1)))")
            .unwrap();
        assert_eval(&interpreter, "(counter 41)", "42");
    }

    #[test]
    fn test_errors_are_distinguished() {
        let interpreter = Interpreter::default();
        assert!(matches!(
            interpreter.eval_str("(+ 1"),
            Err(Error::Parse(ParseError::UnexpectedEof(_)))
        ));
        match interpreter.eval_str("(undefined)") {
            Err(Error::Eval(e)) => assert_eq!(e.kind(), ErrorKind::UnboundSymbol),
            other => panic!("expected an evaluation error, got {:?}", other),
        }
    }

    #[test]
    fn test_host_apply() {
        let interpreter = Interpreter::default();
        let adder = interpreter
            .eval_str("(fn [a b] (+ a b))")
            .unwrap();
        let args = vec![
            Node::new_number(2.0, Span::default()),
            Node::new_number(5.0, Span::default()),
        ];
        assert_eq!(interpreter.apply(&adder, args).unwrap().to_string(), "7");

        let err = interpreter.apply(&adder, vec![]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Arity);
    }

    #[test]
    fn test_imports_through_loader() {
        let memory = Rc::new(MemoryModuleLoader::new());
        memory.add_source(
            "greet",
            "(define hello (fn [name] (str \"hello \" name))) (export hello)",
        );
        let interpreter = Interpreter::with_loader(memory);
        assert_eval(
            &interpreter,
            "(import greet :as g) (g/hello \"lisp\")",
            "\"hello lisp\"",
        );
    }

    #[test]
    fn test_run_file_missing() {
        let interpreter = Interpreter::default();
        let err = interpreter
            .run_file(Path::new("definitely/not/here.lpy"))
            .unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }

    #[test]
    fn test_drop_breaks_closure_cycles() {
        let weak_env: Weak<_> = {
            let interpreter = Interpreter::default();
            interpreter
                .eval_str("(define loop-forever (fn [n] (recur n)))")
                .unwrap();
            Rc::downgrade(interpreter.global_env())
        };
        assert!(weak_env.upgrade().is_none());
    }
}
