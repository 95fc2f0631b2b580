use super::{expect_symbol, sequence_items, value};
use crate::environment::{Env, Environment, RECUR_TARGET};
use crate::evaluator::{
    EvalError, EvalResult, Flow, TailCall, apply, evaluate, evaluate_all, evaluate_body,
};
use crate::source::Span;
use crate::types::{Closure, Node, Procedure, Sexpr, Symbol};
use std::rc::Rc;

/// `(define name value-expr)`: binds in the current frame and returns the value.
pub(super) fn evaluate_define(operands: &[Node], env: &Env, span: Span) -> EvalResult<Flow> {
    if let [name, value_expr] = operands {
        let name = expect_symbol(name, "define")?;
        // The value is evaluated before the frame is borrowed for the insert.
        let result = evaluate(value_expr, env)?;
        env.borrow_mut()
            .define(name.name().to_string(), result.clone());
        value(result)
    } else {
        Err(EvalError::syntax(
            format!(
                "'define' expects a symbol and a value expression, got {} operands",
                operands.len()
            ),
            span,
        ))
    }
}

/// `(fn [params...] body...)`: captures `env` by reference. The body is not evaluated.
pub(super) fn evaluate_fn(operands: &[Node], env: &Env, span: Span) -> EvalResult<Flow> {
    let [params, body @ ..] = operands else {
        return Err(EvalError::syntax(
            "'fn' requires a parameter vector and at least one body expression",
            span,
        ));
    };
    if body.is_empty() {
        return Err(EvalError::syntax(
            "'fn' must have at least one expression in its body",
            span,
        ));
    }
    let params = sequence_items(params, "fn", "its parameter list")?
        .iter()
        .map(|param| expect_symbol(param, "fn"))
        .collect::<EvalResult<Vec<Symbol>>>()?;

    let closure = Closure::new(params, body.to_vec(), env.clone());
    value(Node::new(
        Sexpr::Procedure(Procedure::Closure(Rc::new(closure))),
        span,
    ))
}

/// Splits `[sym init sym init ...]` into its pairs.
fn binding_pairs<'a>(
    operands: &'a [Node],
    form: &str,
    span: Span,
) -> EvalResult<(Vec<(Symbol, &'a Node)>, &'a [Node])> {
    let [bindings, body @ ..] = operands else {
        return Err(EvalError::syntax(
            format!(
                "'{}' requires a bindings vector and at least one body expression",
                form
            ),
            span,
        ));
    };
    if body.is_empty() {
        return Err(EvalError::syntax(
            format!("'{}' must have at least one expression in its body", form),
            span,
        ));
    }
    let items = sequence_items(bindings, form, "its bindings")?;
    if items.len() % 2 != 0 {
        return Err(EvalError::syntax(
            format!(
                "Bindings in '{}' must be symbol-value pairs, found {} elements",
                form,
                items.len()
            ),
            bindings.span,
        ));
    }
    let mut pairs = Vec::with_capacity(items.len() / 2);
    for pair in items.chunks_exact(2) {
        pairs.push((expect_symbol(&pair[0], form)?, &pair[1]));
    }
    Ok((pairs, body))
}

/// `(let [sym init ...] body...)` with sequential binding in one child frame.
pub(super) fn evaluate_let(operands: &[Node], env: &Env, span: Span) -> EvalResult<Flow> {
    let (pairs, body) = binding_pairs(operands, "let", span)?;
    let let_env = Environment::new_enclosed(env.clone());
    for (sym, init) in pairs {
        let init_value = evaluate(init, &let_env)?;
        let_env.borrow_mut().define(sym.name().to_string(), init_value);
    }
    evaluate_body(body, &let_env, span)
}

/// `(loop [sym init ...] body...)`: binds like `let`, then runs the body as a
/// recursion target with the initial values as its first arguments.
pub(super) fn evaluate_loop(operands: &[Node], env: &Env, span: Span) -> EvalResult<Flow> {
    let (pairs, body) = binding_pairs(operands, "loop", span)?;

    // Initializers see earlier bindings of the same loop.
    let seed_env = Environment::new_enclosed(env.clone());
    let mut params = Vec::with_capacity(pairs.len());
    let mut initial_values = Vec::with_capacity(pairs.len());
    for (sym, init) in pairs {
        let init_value = evaluate(init, &seed_env)?;
        seed_env
            .borrow_mut()
            .define(sym.name().to_string(), init_value.clone());
        params.push(sym);
        initial_values.push(init_value);
    }

    let loop_context = Rc::new(Closure::new(params, body.to_vec(), env.clone()));
    let operator = Node::new(Sexpr::Procedure(Procedure::Loop(loop_context)), span);
    apply(&operator, initial_values, env, span).map(Flow::Value)
}

/// `(recur args...)`: evaluates the arguments and hands a tail call to the
/// enclosing trampoline. Never transfers control itself.
pub(super) fn evaluate_recur(operands: &[Node], env: &Env, span: Span) -> EvalResult<Flow> {
    let args = evaluate_all(operands, env)?;
    let target = env.borrow().get(RECUR_TARGET, span).map_err(|_| {
        EvalError::syntax("'recur' can only be used within a fn or loop body", span)
    })?;
    let Some(closure) = (match &target.kind {
        Sexpr::Procedure(procedure) => procedure.closure().cloned(),
        _ => None,
    }) else {
        return Err(EvalError::syntax("'recur' target is not a fn or loop", span));
    };
    if args.len() != closure.arity() {
        return Err(EvalError::Arity {
            name: "recur".to_string(),
            expected: closure.arity(),
            actual: args.len(),
            span,
        });
    }
    Ok(Flow::TailCall(TailCall {
        target: closure,
        args,
        span,
    }))
}
