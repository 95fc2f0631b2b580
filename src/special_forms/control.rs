use super::{expect_symbol, sequence_items, value};
use crate::environment::{Env, Environment};
use crate::evaluator::{EvalError, EvalResult, Flow, evaluate, evaluate_body, evaluate_flow};
use crate::source::Span;
use crate::types::{Node, Sexpr};

/// `(if cond then [else])`. Both branches are in tail position.
pub(super) fn evaluate_if(operands: &[Node], env: &Env, span: Span) -> EvalResult<Flow> {
    if let [condition, consequent, maybe_alternate @ ..] = operands
        && maybe_alternate.len() <= 1
    {
        if evaluate(condition, env)?.is_truthy() {
            evaluate_flow(consequent, env)
        } else if let [alternate] = maybe_alternate {
            evaluate_flow(alternate, env)
        } else {
            value(Node::new_nil(span))
        }
    } else {
        Err(EvalError::syntax(
            format!(
                "'if' expects a condition, a consequent and an optional alternate, got {} operands",
                operands.len()
            ),
            span, // Span of the whole (if ...) form
        ))
    }
}

/// `(cond test result ...)`: the result of the first truthy test, or nil.
pub(super) fn evaluate_cond(operands: &[Node], env: &Env, span: Span) -> EvalResult<Flow> {
    if operands.is_empty() || operands.len() % 2 != 0 {
        return Err(EvalError::syntax(
            "'cond' requires one or more test/result pairs",
            span,
        ));
    }
    for clause in operands.chunks_exact(2) {
        if evaluate(&clause[0], env)?.is_truthy() {
            return evaluate_flow(&clause[1], env);
        }
    }
    value(Node::new_nil(span))
}

/// `(when test body...)`: nil when the test is falsey; the test value when the body is empty.
pub(super) fn evaluate_when(operands: &[Node], env: &Env, span: Span) -> EvalResult<Flow> {
    let [test, body @ ..] = operands else {
        return Err(EvalError::syntax("'when' requires a test expression", span));
    };
    let test_value = evaluate(test, env)?;
    if !test_value.is_truthy() {
        value(Node::new_nil(span))
    } else if body.is_empty() {
        value(test_value)
    } else {
        evaluate_body(body, env, span)
    }
}

/// `(and expr...)`: first falsey value, else the last value; `(and)` is true.
pub(super) fn evaluate_and(operands: &[Node], env: &Env, span: Span) -> EvalResult<Flow> {
    let mut last = Node::new_bool(true, span);
    for operand in operands {
        last = evaluate(operand, env)?;
        if !last.is_truthy() {
            break;
        }
    }
    value(last)
}

/// `(or expr...)`: first truthy value, else the last value; `(or)` is nil.
pub(super) fn evaluate_or(operands: &[Node], env: &Env, span: Span) -> EvalResult<Flow> {
    let mut last = Node::new_nil(span);
    for operand in operands {
        last = evaluate(operand, env)?;
        if last.is_truthy() {
            break;
        }
    }
    value(last)
}

/// `(doseq [sym coll] body...)`: runs the body once per element for its effects.
pub(super) fn evaluate_doseq(operands: &[Node], env: &Env, span: Span) -> EvalResult<Flow> {
    let [binding, body @ ..] = operands else {
        return Err(EvalError::syntax(
            "'doseq' expects a [binding collection] vector and a body",
            span,
        ));
    };
    if body.is_empty() {
        return Err(EvalError::syntax(
            "'doseq' must have at least one expression in its body",
            span,
        ));
    }
    let [sym, collection_expr] = sequence_items(binding, "doseq", "its binding")? else {
        return Err(EvalError::syntax(
            "'doseq' binding vector must have exactly 2 elements [binding collection]",
            binding.span,
        ));
    };
    let sym = expect_symbol(sym, "doseq")?;

    let collection = evaluate(collection_expr, env)?;
    let items = match &collection.kind {
        Sexpr::Vector(items) | Sexpr::List(items) => items.clone(),
        Sexpr::Nil => Default::default(),
        other => {
            return Err(EvalError::InvalidArguments(
                format!(
                    "'doseq' collection must be a vector or list, got {}",
                    other.type_name()
                ),
                collection_expr.span,
            ));
        }
    };

    let loop_env = Environment::new_enclosed(env.clone());
    for item in items.iter() {
        loop_env
            .borrow_mut()
            .define(sym.name().to_string(), item.clone());
        for expr in body {
            evaluate(expr, &loop_env)?;
        }
    }
    value(Node::new_nil(span))
}

/// `(throw value)`: raises any value, catchable by `try`.
pub(super) fn evaluate_throw(operands: &[Node], env: &Env, span: Span) -> EvalResult<Flow> {
    let [thrown] = operands else {
        return Err(EvalError::syntax(
            format!("'throw' expects exactly 1 argument, got {}", operands.len()),
            span,
        ));
    };
    let mut thrown_value = evaluate(thrown, env)?;
    thrown_value.span = span;
    Err(EvalError::Thrown(thrown_value))
}

struct CatchClause<'a> {
    binding: String,
    body: &'a [Node],
}

/// `(try body (catch e handler...) (finally cleanup...))`, both clauses optional.
///
/// `catch` binds the thrown value, or the message of any other evaluation error.
/// `finally` runs on every path; an error it raises replaces the outcome.
pub(super) fn evaluate_try(operands: &[Node], env: &Env, span: Span) -> EvalResult<Flow> {
    let [body, clauses @ ..] = operands else {
        return Err(EvalError::syntax(
            "'try' expects at least 1 argument (body)",
            span,
        ));
    };

    let mut catch_clause: Option<CatchClause> = None;
    let mut finally_body: Option<&[Node]> = None;
    for clause in clauses {
        let (head, rest) = match &clause.kind {
            Sexpr::List(items) => match items.split_first() {
                Some((head, rest)) => (head.as_symbol().map(|sym| sym.name()), rest),
                None => (None, &items[..]),
            },
            _ => (None, &[][..]),
        };
        match head {
            Some("catch") if catch_clause.is_none() => {
                let [binding, handler @ ..] = rest else {
                    return Err(EvalError::syntax(
                        "'catch' expects a binding symbol and a handler body",
                        clause.span,
                    ));
                };
                if handler.is_empty() {
                    return Err(EvalError::syntax(
                        "'catch' expects a binding symbol and a handler body",
                        clause.span,
                    ));
                }
                catch_clause = Some(CatchClause {
                    binding: expect_symbol(binding, "catch")?.name().to_string(),
                    body: handler,
                });
            }
            Some("finally") if finally_body.is_none() => {
                if rest.is_empty() {
                    return Err(EvalError::syntax(
                        "'finally' expects at least one cleanup expression",
                        clause.span,
                    ));
                }
                finally_body = Some(rest);
            }
            Some("catch") | Some("finally") => {
                return Err(EvalError::syntax(
                    "'try' can only have one 'catch' and one 'finally' clause",
                    clause.span,
                ));
            }
            _ => {
                return Err(EvalError::syntax(
                    "'try' clauses must be lists starting with 'catch' or 'finally'",
                    clause.span,
                ));
            }
        }
    }

    let outcome = match (evaluate(body, env), catch_clause) {
        (Err(error), Some(catch)) => {
            let caught = match error {
                EvalError::Thrown(thrown) => thrown,
                other => Node::new_string(&other.to_string(), other.span()),
            };
            let catch_env = Environment::new_enclosed(env.clone());
            catch_env.borrow_mut().define(catch.binding, caught);
            let mut result = Ok(Node::new_nil(span));
            for expr in catch.body {
                result = evaluate(expr, &catch_env);
                if result.is_err() {
                    break;
                }
            }
            result
        }
        (outcome, _) => outcome,
    };

    if let Some(cleanup) = finally_body {
        for expr in cleanup {
            evaluate(expr, env)?;
        }
    }
    outcome.map(Flow::Value)
}
