//! Handlers for the reserved head symbols.
//!
//! A handler receives the operands of its form (the head symbol already stripped),
//! the current environment and the span of the whole form. Handlers returning
//! `Flow::TailCall` only do so from tail positions; the evaluator rejects a tail
//! call that surfaces anywhere else.

mod binding;
mod control;
mod module;
mod threading;

use crate::environment::Env;
use crate::evaluator::{EvalError, EvalResult, Flow};
use crate::source::Span;
use crate::types::{Node, Sexpr, Symbol};
use std::collections::HashSet;

pub(crate) type SpecialForm = fn(&[Node], &Env, Span) -> EvalResult<Flow>;

const SPECIAL_FORMS: &[(&str, SpecialForm)] = &[
    ("quote", threading::evaluate_quote),
    ("if", control::evaluate_if),
    ("define", binding::evaluate_define),
    ("fn", binding::evaluate_fn),
    ("let", binding::evaluate_let),
    ("loop", binding::evaluate_loop),
    ("recur", binding::evaluate_recur),
    ("->", threading::evaluate_thread_first),
    ("->>", threading::evaluate_thread_last),
    ("cond", control::evaluate_cond),
    ("when", control::evaluate_when),
    ("and", control::evaluate_and),
    ("or", control::evaluate_or),
    ("doseq", control::evaluate_doseq),
    ("throw", control::evaluate_throw),
    ("try", control::evaluate_try),
    ("import", module::evaluate_import),
    ("export", module::evaluate_export),
];

/// The handler registered for `name`, if `name` is a special form.
pub(crate) fn lookup(name: &str) -> Option<SpecialForm> {
    SPECIAL_FORMS
        .iter()
        .find(|(form, _)| *form == name)
        .map(|(_, handler)| *handler)
}

/// Names of all special forms, e.g. for REPL completion.
pub fn special_form_identifiers() -> HashSet<String> {
    SPECIAL_FORMS
        .iter()
        .map(|(name, _)| name.to_string())
        .collect()
}

/// Elements of a `[...]` or `(...)` form, as used by binding vectors and parameter lists.
fn sequence_items<'a>(node: &'a Node, form: &str, what: &str) -> EvalResult<&'a [Node]> {
    match &node.kind {
        Sexpr::Vector(items) | Sexpr::List(items) => Ok(items),
        other => Err(EvalError::syntax(
            format!(
                "'{}' expects {} to be a vector, got {}",
                form,
                what,
                other.type_name()
            ),
            node.span,
        )),
    }
}

fn expect_symbol(node: &Node, form: &str) -> EvalResult<Symbol> {
    match node.as_symbol() {
        Some(sym) => Ok(sym.clone()),
        None => Err(EvalError::syntax(
            format!(
                "'{}' expects a symbol, got {}: {}",
                form,
                node.kind.type_name(),
                node
            ),
            node.span,
        )),
    }
}

fn value(node: Node) -> EvalResult<Flow> {
    Ok(Flow::Value(node))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        assert!(lookup("if").is_some());
        assert!(lookup("->>").is_some());
        assert!(lookup("iff").is_none());
        assert!(lookup("+").is_none());
    }

    #[test]
    fn test_identifiers_cover_table() {
        let ids = special_form_identifiers();
        assert_eq!(ids.len(), SPECIAL_FORMS.len());
        for name in ["define", "fn", "let", "loop", "recur", "import", "export", "->"] {
            assert!(ids.contains(name), "missing {}", name);
        }
    }
}
