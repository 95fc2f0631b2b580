use crate::environment::{EnvError, Env, Environment, RECUR_TARGET};
use crate::module::ModuleError;
use crate::source::Span;
use crate::special_forms;
use crate::types::{Closure, Node, Procedure, Sexpr, insert_entry};
use std::cell::Cell;
use std::rc::Rc;
use thiserror::Error;

/// Nested evaluations allowed before `evaluate` gives up with `EvalError::DepthExceeded`.
///
/// Each level costs a few kilobytes of host stack in unoptimized builds, so the
/// default needs a larger stack than the 8 MiB main thread. The binaries evaluate
/// inside `with_eval_stack`.
pub const DEFAULT_MAX_EVAL_DEPTH: usize = 2_000;

/// Stack size for threads that evaluate with the default depth limit.
pub const EVAL_STACK_SIZE: usize = 64 * 1024 * 1024;

/// Runs `f` to completion on a new thread with `EVAL_STACK_SIZE` bytes of stack.
///
/// A panic on that thread is resumed on the caller's.
pub fn with_eval_stack<F, T>(f: F) -> std::io::Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let handle = std::thread::Builder::new()
        .name("lispy-eval".to_string())
        .stack_size(EVAL_STACK_SIZE)
        .spawn(f)?;
    match handle.join() {
        Ok(value) => Ok(value),
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

thread_local! {
    static EVAL_DEPTH: Cell<usize> = const { Cell::new(0) };
    static MAX_EVAL_DEPTH: Cell<usize> = const { Cell::new(DEFAULT_MAX_EVAL_DEPTH) };
}

/// Sets the nesting limit for evaluation on the current thread, returning the old one.
pub fn set_max_eval_depth(depth: usize) -> usize {
    MAX_EVAL_DEPTH.with(|max| max.replace(depth))
}

pub fn max_eval_depth() -> usize {
    MAX_EVAL_DEPTH.with(|max| max.get())
}

/// Counts one level of evaluation nesting for as long as it lives.
struct DepthGuard;

impl DepthGuard {
    fn enter(span: Span) -> EvalResult<Self> {
        let limit = max_eval_depth();
        let depth = EVAL_DEPTH.with(|depth| {
            let current = depth.get() + 1;
            depth.set(current);
            current
        });
        if depth > limit {
            EVAL_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
            return Err(EvalError::DepthExceeded { limit, span });
        }
        Ok(DepthGuard)
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        EVAL_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

pub(crate) fn arguments_word(count: &usize) -> &'static str {
    if *count == 1 { "argument" } else { "arguments" }
}

// --- Evaluation Error ---
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error(transparent)]
    Env(#[from] EnvError), // UnboundSymbol
    #[error("Syntax error: {0}")]
    Syntax(String, Span), // Malformed special form
    #[error(
        "Arity error: {} expects {} {}, got {}",
        .name, .expected, arguments_word(.expected), .actual
    )]
    Arity {
        name: String,
        expected: usize,
        actual: usize,
        span: Span,
    },
    #[error("Not callable: {0}")]
    NotCallable(Sexpr, Span),
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String, Span), // Primitive misuse: wrong count or type
    #[error("{0}")]
    Module(ModuleError, Span),
    #[error("Uncaught throw: {0}")]
    Thrown(Node),
    #[error(
        "Maximum recursion depth ({limit}) exceeded; use 'recur' for deep iteration"
    )]
    DepthExceeded { limit: usize, span: Span },
}

/// Flat view of the error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Syntax,
    UnboundSymbol,
    Arity,
    NotCallable,
    InvalidArguments,
    Module,
    Thrown,
    DepthExceeded,
}

impl EvalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EvalError::Env(EnvError::UnboundSymbol(..)) => ErrorKind::UnboundSymbol,
            EvalError::Syntax(..) => ErrorKind::Syntax,
            EvalError::Arity { .. } => ErrorKind::Arity,
            EvalError::NotCallable(..) => ErrorKind::NotCallable,
            EvalError::InvalidArguments(..) => ErrorKind::InvalidArguments,
            EvalError::Module(..) => ErrorKind::Module,
            EvalError::Thrown(_) => ErrorKind::Thrown,
            EvalError::DepthExceeded { .. } => ErrorKind::DepthExceeded,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            EvalError::Env(EnvError::UnboundSymbol(_, span))
            | EvalError::Syntax(_, span)
            | EvalError::Arity { span, .. }
            | EvalError::NotCallable(_, span)
            | EvalError::InvalidArguments(_, span)
            | EvalError::Module(_, span)
            | EvalError::DepthExceeded { span, .. } => *span,
            EvalError::Thrown(node) => node.span,
        }
    }

    pub(crate) fn syntax(message: impl Into<String>, span: Span) -> Self {
        EvalError::Syntax(message.into(), span)
    }
}

// Result type alias for convenience
pub type EvalResult<T = Node> = Result<T, EvalError>;

/// Outcome of evaluating an expression that may sit in tail position.
pub(crate) enum Flow {
    Value(Node),
    TailCall(TailCall),
}

/// Request, produced only by `recur`, to re-enter `target` with new arguments.
/// Consumed by the trampoline that owns `target`; never a language value.
pub(crate) struct TailCall {
    pub target: Rc<Closure>,
    pub args: Vec<Node>,
    pub span: Span,
}

// --- Evaluate Function ---

/// Evaluates a given AST Node within the specified environment.
///
/// A `recur` whose tail call would escape through here (i.e. one used outside
/// tail position) is reported as a syntax error.
pub fn evaluate(node: &Node, env: &Env) -> EvalResult {
    match evaluate_flow(node, env)? {
        Flow::Value(value) => Ok(value),
        Flow::TailCall(tail_call) => Err(EvalError::syntax(
            "'recur' can only be used in tail position",
            tail_call.span,
        )),
    }
}

/// Evaluates `node` in tail position: a `recur` result is handed back to the caller
/// instead of being rejected.
pub(crate) fn evaluate_flow(node: &Node, env: &Env) -> EvalResult<Flow> {
    let _guard = DepthGuard::enter(node.span)?;
    match &node.kind {
        Sexpr::Symbol(sym) => Ok(Flow::Value(env.borrow().get(sym.name(), node.span)?)),

        Sexpr::Vector(items) => {
            let values = evaluate_all(items, env)?;
            Ok(Flow::Value(Node::new_vector(values, node.span)))
        }

        Sexpr::Map(entries) => {
            // A repeated key keeps its first position and its last value.
            let mut evaluated = Vec::with_capacity(entries.len());
            for (key, value) in entries.iter() {
                let key = evaluate(key, env)?;
                let value = evaluate(value, env)?;
                insert_entry(&mut evaluated, key, value);
            }
            Ok(Flow::Value(Node::new_map(evaluated, node.span)))
        }

        Sexpr::List(elements) => match elements.split_first() {
            None => Err(EvalError::syntax(
                "Cannot evaluate an empty list as a call or special form",
                node.span,
            )),
            Some((head, rest)) => {
                if let Sexpr::Symbol(sym) = &head.kind {
                    if let Some(handler) = special_forms::lookup(sym.name()) {
                        return handler(rest, env, node.span);
                    }
                }
                let operator = evaluate(head, env)?;
                let args = evaluate_all(rest, env)?;
                apply(&operator, args, env, node.span).map(Flow::Value)
            }
        },

        // Self-evaluating atoms
        Sexpr::Nil
        | Sexpr::Boolean(_)
        | Sexpr::Number(_)
        | Sexpr::String(_)
        | Sexpr::Keyword(_)
        | Sexpr::Procedure(_) => Ok(Flow::Value(node.clone())),
    }
}

/// Evaluates each node left to right.
pub(crate) fn evaluate_all(nodes: &[Node], env: &Env) -> EvalResult<Vec<Node>> {
    nodes.iter().map(|node| evaluate(node, env)).collect()
}

/// Evaluates a body in order, discarding all but the last value; the last form is
/// evaluated in tail position.
pub(crate) fn evaluate_body(body: &[Node], env: &Env, span: Span) -> EvalResult<Flow> {
    match body.split_last() {
        Some((last, init)) => {
            for expr in init {
                evaluate(expr, env)?;
            }
            evaluate_flow(last, env)
        }
        None => Ok(Flow::Value(Node::new_nil(span))),
    }
}

/// Calls `operator` with already evaluated `args`.
///
/// This is the single entry point for invoking any callable; builtins that take a
/// function argument go through here too.
pub fn apply(operator: &Node, args: Vec<Node>, env: &Env, span: Span) -> EvalResult {
    match &operator.kind {
        Sexpr::Procedure(Procedure::Primitive(func, _)) => func(args, env, span),
        Sexpr::Procedure(target @ (Procedure::Closure(closure) | Procedure::Loop(closure))) => {
            check_arity(target, closure, args.len(), span)?;
            run_trampoline(target, closure, args, span)
        }
        other => Err(EvalError::NotCallable(other.clone(), operator.span)),
    }
}

fn check_arity(target: &Procedure, closure: &Closure, actual: usize, span: Span) -> EvalResult<()> {
    if actual != closure.arity() {
        return Err(EvalError::Arity {
            name: target.to_string(),
            expected: closure.arity(),
            actual,
            span,
        });
    }
    Ok(())
}

/// Runs a closure or loop body, re-entering it for every `recur` instead of
/// recursing, so host stack depth stays constant in the iteration count.
fn run_trampoline(
    target: &Procedure,
    closure: &Rc<Closure>,
    mut args: Vec<Node>,
    span: Span,
) -> EvalResult {
    tracing::trace!(procedure = %target, "entering trampoline");
    let target_node = Node::new(Sexpr::Procedure(target.clone()), span);
    let mut iterations: usize = 0;
    loop {
        let frame = Environment::new_enclosed(closure.env.clone());
        {
            let mut frame_mut = frame.borrow_mut();
            // Later params shadow earlier ones with the same name.
            for (param, arg) in closure.params.iter().zip(args) {
                frame_mut.define(param.name().to_string(), arg);
            }
            frame_mut.define(RECUR_TARGET.to_string(), target_node.clone());
        }

        match evaluate_body(&closure.body, &frame, span)? {
            Flow::Value(result) => {
                tracing::trace!(procedure = %target, iterations, "leaving trampoline");
                return Ok(result);
            }
            Flow::TailCall(tail_call) => {
                if !Rc::ptr_eq(&tail_call.target, closure) {
                    return Err(EvalError::syntax(
                        "'recur' target does not match the enclosing fn or loop",
                        tail_call.span,
                    ));
                }
                check_arity(target, closure, tail_call.args.len(), tail_call.span)?;
                args = tail_call.args;
                iterations += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse_program, parse_str};
    use crate::types::Symbol;

    // Evaluates every form in `input`, returning the last value.
    fn eval_in(input: &str, env: &Env) -> EvalResult {
        let nodes = match parse_program(input) {
            Ok(nodes) => nodes,
            Err(e) => panic!("Parsing failed for input '{}': {}", input, e),
        };
        let mut result = Node::new_nil(Span::default());
        for node in &nodes {
            result = evaluate(node, env)?;
        }
        Ok(result)
    }

    fn assert_eval_kind(input: &str, expected_kind: Sexpr) {
        let env = Environment::new_global_populated();
        match eval_in(input, &env) {
            Ok(result_node) => assert_eq!(result_node.kind, expected_kind, "Input: '{}'", input),
            Err(e) => panic!("Evaluation failed for input '{}': {}", input, e),
        }
    }

    fn assert_eval_display(input: &str, expected: &str) {
        let env = Environment::new_global_populated();
        match eval_in(input, &env) {
            Ok(result_node) => assert_eq!(result_node.to_string(), expected, "Input: '{}'", input),
            Err(e) => panic!("Evaluation failed for input '{}': {}", input, e),
        }
    }

    fn assert_eval_error(input: &str, expected: ErrorKind) {
        let env = Environment::new_global_populated();
        match eval_in(input, &env) {
            Ok(result) => panic!(
                "Expected evaluation to fail for input '{}', but got: {}",
                input, result
            ),
            Err(e) => assert_eq!(e.kind(), expected, "Input: '{}', got error: {:?}", input, e),
        }
    }

    #[test]
    fn test_eval_self_evaluating() {
        assert_eval_kind("123", Sexpr::Number(123.0));
        assert_eval_kind("-4.5", Sexpr::Number(-4.5));
        assert_eval_kind("true", Sexpr::Boolean(true));
        assert_eval_kind("false", Sexpr::Boolean(false));
        assert_eval_kind("nil", Sexpr::Nil);
        assert_eval_kind(r#""hello""#, Sexpr::String("hello".to_string()));
        assert_eval_kind(":key", Sexpr::Keyword("key".to_string()));
    }

    #[test]
    fn test_eval_is_idempotent_for_atoms_and_bound_symbols() {
        let env = Environment::new_global_populated();
        eval_in("(define x [1 2])", &env).unwrap();
        for input in ["42", "\"s\"", "x", ":k"] {
            let node = parse_str(input).unwrap();
            let first = evaluate(&node, &env).unwrap();
            let second = evaluate(&node, &env).unwrap();
            assert_eq!(first, second, "Input: '{}'", input);
        }
    }

    #[test]
    fn test_eval_symbol_lookup() {
        let env = Environment::new();
        env.borrow_mut()
            .define("x".to_string(), Node::new_number(100.0, Span::default()));
        let node = parse_str("x").unwrap();
        assert_eq!(evaluate(&node, &env).unwrap().kind, Sexpr::Number(100.0));

        let unbound = parse_str("y").unwrap();
        let err = evaluate(&unbound, &env).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnboundSymbol);
        assert_eq!(err.span(), Span::new(0, 1));
    }

    #[test]
    fn test_eval_empty_list_is_error() {
        assert_eval_error("()", ErrorKind::Syntax);
    }

    #[test]
    fn test_eval_vector_and_map_literals_evaluate_elements() {
        assert_eval_display("[1 (+ 1 1) \"three\"]", "[1 2 \"three\"]");
        assert_eval_display("(let [k :a] {k (* 2 3)})", "{:a 6}");
    }

    #[test]
    fn test_eval_primitive_calls() {
        assert_eval_kind("(+ 1 2)", Sexpr::Number(3.0));
        assert_eval_kind("(+ 1 (* 2 3))", Sexpr::Number(7.0));
        assert_eval_kind("(- (+ 5 5) (* 2 3))", Sexpr::Number(4.0));
    }

    #[test]
    fn test_eval_not_callable() {
        assert_eval_error("(1 2 3)", ErrorKind::NotCallable);
        assert_eval_error("(\"hello\" 1)", ErrorKind::NotCallable);
        assert_eval_error("([1 2] 0)", ErrorKind::NotCallable);
    }

    #[test]
    fn test_operands_evaluated_left_to_right() {
        let env = Environment::new_global_populated();
        let err = eval_in("(+ 1 first-missing second-missing)", &env).unwrap_err();
        assert_eq!(err.to_string(), "Unbound symbol: 'first-missing'");

        let err = eval_in("(list (throw :first) (throw :second))", &env).unwrap_err();
        assert_eq!(err, EvalError::Thrown(Node::new_keyword("first", Span::default())));
    }

    #[test]
    fn test_closure_application() {
        assert_eval_kind("((fn [x] (+ x 1)) 5)", Sexpr::Number(6.0));
        assert_eval_kind("((fn [] 7))", Sexpr::Number(7.0));
        assert_eval_kind("((fn [x y] (* x y)) 3 4)", Sexpr::Number(12.0));
        // Body forms run in order, value of the last is returned
        assert_eval_kind("((fn [x] 1 2 x) 3)", Sexpr::Number(3.0));
    }

    #[test]
    fn test_closure_arity_error() {
        assert_eval_error("((fn [x] x))", ErrorKind::Arity);
        assert_eval_error("((fn [x] x) 1 2)", ErrorKind::Arity);
        assert_eval_error("((fn [] 1) 1)", ErrorKind::Arity);
    }

    #[test]
    fn test_closure_body_runs_in_fresh_frame_over_defining_env() {
        let env = Environment::new_global_populated();
        let result = eval_in(
            "(define x 10)
             (define add-x (fn [y] (+ x y)))
             (define shadow (fn [x] (add-x 1)))
             (shadow 100)",
            &env,
        )
        .unwrap();
        // Lexical: add-x sees the global x, not shadow's parameter
        assert_eq!(result.kind, Sexpr::Number(11.0));
    }

    #[test]
    fn test_later_param_shadows_earlier() {
        assert_eval_kind("((fn [a a] a) 1 2)", Sexpr::Number(2.0));
    }

    #[test]
    fn test_closure_sees_later_definitions() {
        let env = Environment::new_global_populated();
        let result = eval_in(
            "(define f (fn [] later))
             (define later 5)
             (f)",
            &env,
        )
        .unwrap();
        assert_eq!(result.kind, Sexpr::Number(5.0));
    }

    #[test]
    fn test_mutual_recursion_through_defines() {
        let env = Environment::new_global_populated();
        let result = eval_in(
            "(define my-even? (fn [n] (if (= n 0) true (my-odd? (- n 1)))))
             (define my-odd? (fn [n] (if (= n 0) false (my-even? (- n 1)))))
             [(my-even? 10) (my-odd? 7) (my-even? 3)]",
            &env,
        )
        .unwrap();
        assert_eq!(result.to_string(), "[true true false]");
    }

    #[test]
    fn test_counter_closures_capture_by_reference() {
        let env = Environment::new_global_populated();
        let result = eval_in(
            "(define make-adder (fn [n] (fn [x] (+ x n))))
             (define add5 (make-adder 5))
             (define add10 (make-adder 10))
             [(add5 1) (add10 1)]",
            &env,
        )
        .unwrap();
        assert_eq!(result.to_string(), "[6 11]");
    }

    #[test]
    fn test_loop_recur_is_stack_safe() {
        assert_eval_kind(
            "(loop [n 100000] (if (<= n 0) \"done\" (recur (- n 1))))",
            Sexpr::String("done".to_string()),
        );
    }

    #[test]
    fn test_fn_recur_is_stack_safe() {
        assert_eval_kind(
            "(define sum-to (fn [n acc] (if (= n 0) acc (recur (- n 1) (+ acc n)))))
             (sum-to 100000 0)",
            Sexpr::Number(5000050000.0),
        );
    }

    #[test]
    fn test_recur_outside_fn_or_loop() {
        assert_eval_error("(recur 1)", ErrorKind::Syntax);
        assert_eval_error("(let [x 1] (recur x))", ErrorKind::Syntax);
    }

    #[test]
    fn test_recur_wrong_arity() {
        assert_eval_error("(loop [n 1] (recur))", ErrorKind::Arity);
        assert_eval_error("((fn [a b] (recur a)) 1 2)", ErrorKind::Arity);
    }

    #[test]
    fn test_recur_outside_tail_position_does_not_leak() {
        assert_eval_error("(loop [n 1] (+ 1 (recur 0)))", ErrorKind::Syntax);
        assert_eval_error("((fn [n] (define x (recur n))) 1)", ErrorKind::Syntax);
        assert_eval_error("(loop [n 1] (recur 0) n)", ErrorKind::Syntax);
        assert_eval_error("(loop [n 1] [(recur 0)])", ErrorKind::Syntax);
    }

    #[test]
    fn test_recur_in_nested_closure_targets_that_closure() {
        // The inner fn's recur re-enters the inner fn, not the loop
        assert_eval_kind(
            "(loop [i 0]
               (if (< i 3)
                 (recur (+ i 1))
                 ((fn [k acc] (if (= k 0) (+ acc i) (recur (- k 1) (+ acc 1)))) 4 0)))",
            Sexpr::Number(7.0),
        );
    }

    #[test]
    fn test_host_can_apply_returned_closure() {
        let env = Environment::new_global_populated();
        let square = eval_in("(fn [x] (* x x))", &env).unwrap();
        let result = apply(
            &square,
            vec![Node::new_number(9.0, Span::default())],
            &env,
            Span::default(),
        )
        .unwrap();
        assert_eq!(result.kind, Sexpr::Number(81.0));

        let err = apply(&square, vec![], &env, Span::default()).unwrap_err();
        assert!(matches!(err, EvalError::Arity { expected: 1, actual: 0, .. }));
    }

    #[test]
    fn test_apply_loop_context_directly() {
        let env = Environment::new_global_populated();
        let body = parse_str("(if (< n 5) (recur (+ n 1)) n)").unwrap();
        let closure = Rc::new(Closure::new(vec![Symbol::new("n")], vec![body], env.clone()));
        let operator = Node::new(Sexpr::Procedure(Procedure::Loop(closure)), Span::default());
        let result = apply(
            &operator,
            vec![Node::new_number(0.0, Span::default())],
            &env,
            Span::default(),
        )
        .unwrap();
        assert_eq!(result.kind, Sexpr::Number(5.0));
    }

    const COUNT_DOWN: &str = "(define f (fn [n] (if (= n 0) 0 (+ 1 (f (- n 1))))))";

    #[test]
    fn test_deep_recursion_is_a_recoverable_error() {
        with_eval_stack(|| {
            let env = Environment::new_global_populated();
            eval_in(COUNT_DOWN, &env).unwrap();
            let err = eval_in("(f 1000)", &env).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::DepthExceeded);
            assert!(err.to_string().contains("recur"), "{}", err);

            // The same environment keeps working afterwards
            assert_eq!(eval_in("(f 10)", &env).unwrap().to_string(), "10");
            assert_eq!(EVAL_DEPTH.with(|depth| depth.get()), 0);
        })
        .unwrap();
    }

    #[test]
    fn test_depth_limit_applies_to_mutual_recursion() {
        let previous = set_max_eval_depth(100);
        let env = Environment::new_global_populated();
        let result = eval_in(
            "(define even (fn [n] (if (= n 0) true (odd (- n 1)))))
             (define odd (fn [n] (if (= n 0) false (even (- n 1)))))
             (even 500)",
            &env,
        );
        let shallow = eval_in("(even 4)", &env);
        set_max_eval_depth(previous);

        assert_eq!(result.unwrap_err().kind(), ErrorKind::DepthExceeded);
        assert_eq!(shallow.unwrap().to_string(), "true");
    }

    #[test]
    fn test_depth_error_can_be_caught() {
        let previous = set_max_eval_depth(100);
        let env = Environment::new_global_populated();
        let result = eval_in(
            &format!("{} (try (f 500) (catch e :caught))", COUNT_DOWN),
            &env,
        );
        set_max_eval_depth(previous);
        assert_eq!(result.unwrap().to_string(), ":caught");
    }

    #[test]
    fn test_recur_is_not_limited_by_depth() {
        let previous = set_max_eval_depth(100);
        let env = Environment::new_global_populated();
        let result = eval_in(
            "((fn [n acc] (if (= n 0) acc (recur (- n 1) (+ acc 1)))) 10000 0)",
            &env,
        );
        set_max_eval_depth(previous);
        assert_eq!(result.unwrap().to_string(), "10000");
    }

    #[test]
    fn test_duplicate_map_literal_keys() {
        assert_eval_display("(count {:a 1 :a 2})", "1");
        assert_eval_display("(get {:a 1 :a 2} :a)", "2");
        assert_eval_display("{:a 1 :a 2}", "{:a 2}");
        assert_eval_display("{:a 1 :b 2 :a 3}", "{:a 3, :b 2}");
    }

    #[test]
    fn test_error_display() {
        let env = Environment::new_global_populated();
        let err = eval_in("undefined-thing", &env).unwrap_err();
        assert_eq!(err.to_string(), "Unbound symbol: 'undefined-thing'");

        let err = eval_in("((fn [x] x))", &env).unwrap_err();
        assert_eq!(err.to_string(), "Arity error: #<fn(x)> expects 1 argument, got 0");
    }
}
