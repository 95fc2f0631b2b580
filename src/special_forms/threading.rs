use super::value;
use crate::environment::Env;
use crate::evaluator::{EvalError, EvalResult, Flow, evaluate};
use crate::source::Span;
use crate::types::{Node, Sexpr};

/// `(quote expr)`: `expr` itself, unevaluated.
pub(super) fn evaluate_quote(operands: &[Node], _env: &Env, span: Span) -> EvalResult<Flow> {
    if let [quoted] = operands {
        value(quoted.clone())
    } else {
        Err(EvalError::syntax(
            format!("'quote' expects exactly 1 argument, got {}", operands.len()),
            span,
        ))
    }
}

#[derive(Clone, Copy)]
enum Position {
    First,
    Last,
}

/// `(-> x (f a) g)` evaluates as `(g (f x a))`.
pub(super) fn evaluate_thread_first(operands: &[Node], env: &Env, span: Span) -> EvalResult<Flow> {
    thread(operands, env, span, "->", Position::First)
}

/// `(->> x (f a) g)` evaluates as `(g (f a x))`.
pub(super) fn evaluate_thread_last(operands: &[Node], env: &Env, span: Span) -> EvalResult<Flow> {
    thread(operands, env, span, "->>", Position::Last)
}

fn thread(
    operands: &[Node],
    env: &Env,
    span: Span,
    form: &str,
    position: Position,
) -> EvalResult<Flow> {
    let [initial, steps @ ..] = operands else {
        return Err(EvalError::syntax(
            format!("'{}' requires an initial value", form),
            span,
        ));
    };
    let mut current = evaluate(initial, env)?;
    for step in steps {
        let call = rewrite_step(step, current, form, position)?;
        current = evaluate(&call, env)?;
    }
    value(current)
}

/// Builds the call form for one step, injecting the running value quoted so it
/// is not evaluated a second time.
fn rewrite_step(step: &Node, current: Node, form: &str, position: Position) -> EvalResult<Node> {
    let injected = Node::new_quote(current, step.span);
    let items = match &step.kind {
        Sexpr::List(items) => {
            let Some((head, args)) = items.split_first() else {
                return Err(EvalError::syntax(
                    format!("'{}' cannot thread through an empty list", form),
                    step.span,
                ));
            };
            let mut call = Vec::with_capacity(items.len() + 1);
            call.push(head.clone());
            match position {
                Position::First => {
                    call.push(injected);
                    call.extend(args.iter().cloned());
                }
                Position::Last => {
                    call.extend(args.iter().cloned());
                    call.push(injected);
                }
            }
            call
        }
        // A bare step such as a symbol is called with the value as its only argument.
        _ => vec![step.clone(), injected],
    };
    Ok(Node::new_list(items, step.span))
}
