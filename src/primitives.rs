//! Host-provided functions registered in every root environment.
//!
//! Every primitive has the signature `(args, env, call span) -> EvalResult` and
//! reports misuse as `EvalError::InvalidArguments`. Primitives that call a function
//! argument go through `evaluator::apply`.

use std::cmp::Ordering;
use std::io::Write;

use crate::environment::{Env, Environment};
use crate::evaluator::{EvalError, EvalResult, apply};
use crate::source::Span;
use crate::types::{Node, Sexpr, insert_entry};

// Checks the number of arguments
macro_rules! check_arity {
    // Variant for minimum number of args
    ($args:expr, min $expected:expr, $span:expr, $name:expr) => {
        if $args.len() < $expected {
            return Err(EvalError::InvalidArguments(
                format!(
                    "Primitive '{}' expects at least {} {}, got {}",
                    $name,
                    $expected,
                    if $expected == 1 { "argument" } else { "arguments" },
                    $args.len()
                ),
                $span,
            ));
        }
    };
    ($args:expr, $expected:expr, $span:expr, $name:expr) => {
        if $args.len() != $expected {
            return Err(EvalError::InvalidArguments(
                format!(
                    "Primitive '{}' expects exactly {} {}, got {}",
                    $name,
                    $expected,
                    if $expected == 1 { "argument" } else { "arguments" },
                    $args.len()
                ),
                $span,
            ));
        }
    };
    // Variant for range of args (inclusive)
    ($args:expr, $min:expr, $max:expr, $span:expr, $name:expr) => {
        if !($min..=$max).contains(&$args.len()) {
            return Err(EvalError::InvalidArguments(
                format!(
                    "Primitive '{}' expects between {} and {} arguments, got {}",
                    $name,
                    $min,
                    $max,
                    $args.len()
                ),
                $span,
            ));
        }
    };
}

// Extracts a number from a Node or returns an InvalidArguments error
macro_rules! expect_number {
    ($node:expr, $span:expr, $name:expr) => {
        match $node.kind {
            Sexpr::Number(n) => n,
            _ => {
                return Err(EvalError::InvalidArguments(
                    format!(
                        "Primitive '{}' expects number arguments, got {}",
                        $name,
                        $node.kind.type_name()
                    ),
                    $span,
                ));
            }
        }
    };
}

fn type_error(name: &str, expected: &str, node: &Node, span: Span) -> EvalError {
    EvalError::InvalidArguments(
        format!(
            "Primitive '{}' expects {}, got {}",
            name,
            expected,
            node.kind.type_name()
        ),
        span,
    )
}

/// Elements of a list or vector; nil counts as empty.
fn expect_seq<'a>(node: &'a Node, span: Span, name: &str) -> EvalResult<&'a [Node]> {
    match &node.kind {
        Sexpr::List(items) | Sexpr::Vector(items) => Ok(items),
        Sexpr::Nil => Ok(&[]),
        _ => Err(type_error(name, "a list or vector", node, span)),
    }
}

fn expect_string<'a>(node: &'a Node, span: Span, name: &str) -> EvalResult<&'a str> {
    match &node.kind {
        Sexpr::String(s) => Ok(s),
        _ => Err(type_error(name, "a string", node, span)),
    }
}

/// A non-negative whole number usable as an index.
fn expect_index(node: &Node, span: Span, name: &str) -> EvalResult<usize> {
    match node.kind {
        Sexpr::Number(n) if n >= 0.0 && n.fract() == 0.0 => Ok(n as usize),
        _ => Err(type_error(name, "a non-negative integer index", node, span)),
    }
}

/// Rebuilds a sequence of the same kind as `template` (vector stays vector, else list).
fn same_seq(template: &Node, items: Vec<Node>, span: Span) -> Node {
    match template.kind {
        Sexpr::Vector(_) => Node::new_vector(items, span),
        _ => Node::new_list(items, span),
    }
}

// --- Arithmetic ---

fn fold_numbers<F: Fn(f64, f64) -> f64>(
    args: &[Node],
    span: Span,
    start: f64,
    func: F,
    operator: &str,
) -> EvalResult {
    let mut acc = start;
    for arg in args {
        acc = func(acc, expect_number!(arg, span, operator));
    }
    Ok(Node::new_number(acc, span))
}

pub fn prim_add(args: Vec<Node>, _env: &Env, span: Span) -> EvalResult {
    // (+) -> 0
    // (+ 1 2 3) -> 6
    fold_numbers(&args, span, 0.0, |acc, val| acc + val, "+")
}

pub fn prim_sub(args: Vec<Node>, _env: &Env, span: Span) -> EvalResult {
    // (- x) -> -x
    // (- x y z) -> x - y - z
    check_arity!(args, min 1, span, "-");
    let first = expect_number!(args[0], span, "-");
    if args.len() == 1 {
        return Ok(Node::new_number(-first, span));
    }
    fold_numbers(&args[1..], span, first, |acc, val| acc - val, "-")
}

pub fn prim_mul(args: Vec<Node>, _env: &Env, span: Span) -> EvalResult {
    // (*) -> 1
    fold_numbers(&args, span, 1.0, |acc, val| acc * val, "*")
}

pub fn prim_div(args: Vec<Node>, _env: &Env, span: Span) -> EvalResult {
    check_arity!(args, min 1, span, "/");
    let first = expect_number!(args[0], span, "/");
    let (mut acc, divisors) = if args.len() == 1 {
        (1.0, &args[..])
    } else {
        (first, &args[1..])
    };
    for divisor in divisors {
        let d = expect_number!(divisor, span, "/");
        if d == 0.0 {
            return Err(EvalError::InvalidArguments(
                "Division by zero".to_string(),
                divisor.span,
            ));
        }
        acc /= d;
    }
    Ok(Node::new_number(acc, span))
}

pub fn prim_mod(args: Vec<Node>, _env: &Env, span: Span) -> EvalResult {
    check_arity!(args, 2, span, "mod");
    let dividend = expect_number!(args[0], span, "mod");
    let divisor = expect_number!(args[1], span, "mod");
    if divisor == 0.0 {
        return Err(EvalError::InvalidArguments(
            "Modulo by zero".to_string(),
            args[1].span,
        ));
    }
    // Result takes the sign of the divisor
    Ok(Node::new_number(
        dividend - divisor * (dividend / divisor).floor(),
        span,
    ))
}

pub fn prim_abs(args: Vec<Node>, _env: &Env, span: Span) -> EvalResult {
    check_arity!(args, 1, span, "abs");
    Ok(Node::new_number(expect_number!(args[0], span, "abs").abs(), span))
}

pub fn prim_min(args: Vec<Node>, _env: &Env, span: Span) -> EvalResult {
    check_arity!(args, min 1, span, "min");
    let first = expect_number!(args[0], span, "min");
    fold_numbers(&args[1..], span, first, f64::min, "min")
}

pub fn prim_max(args: Vec<Node>, _env: &Env, span: Span) -> EvalResult {
    check_arity!(args, min 1, span, "max");
    let first = expect_number!(args[0], span, "max");
    fold_numbers(&args[1..], span, first, f64::max, "max")
}

// --- Comparison ---

fn compare_numbers<F: Fn(f64, f64) -> bool>(
    args: &[Node],
    span: Span,
    compare: F,
    operator: &str,
) -> EvalResult {
    check_arity!(args, min 2, span, operator);
    let mut previous = expect_number!(args[0], span, operator);
    let mut result = true;
    // Every argument is type checked even once the answer is known.
    for arg in &args[1..] {
        let current = expect_number!(arg, span, operator);
        result = result && compare(previous, current);
        previous = current;
    }
    Ok(Node::new_bool(result, span))
}

/// Structural equality on any values; procedures compare by identity.
pub fn prim_equals(args: Vec<Node>, _env: &Env, span: Span) -> EvalResult {
    check_arity!(args, min 2, span, "=");
    let all_equal = args.windows(2).all(|pair| pair[0] == pair[1]);
    Ok(Node::new_bool(all_equal, span))
}

pub fn prim_less_than(args: Vec<Node>, _env: &Env, span: Span) -> EvalResult {
    compare_numbers(&args, span, |left, right| left < right, "<")
}

pub fn prim_less_than_or_equals(args: Vec<Node>, _env: &Env, span: Span) -> EvalResult {
    compare_numbers(&args, span, |left, right| left <= right, "<=")
}

pub fn prim_greater_than(args: Vec<Node>, _env: &Env, span: Span) -> EvalResult {
    compare_numbers(&args, span, |left, right| left > right, ">")
}

pub fn prim_greater_than_or_equals(args: Vec<Node>, _env: &Env, span: Span) -> EvalResult {
    compare_numbers(&args, span, |left, right| left >= right, ">=")
}

pub fn prim_not(args: Vec<Node>, _env: &Env, span: Span) -> EvalResult {
    check_arity!(args, 1, span, "not");
    Ok(Node::new_bool(!args[0].is_truthy(), span))
}

// --- Collections ---

pub fn prim_list(args: Vec<Node>, _env: &Env, span: Span) -> EvalResult {
    Ok(Node::new_list(args, span))
}

pub fn prim_vector(args: Vec<Node>, _env: &Env, span: Span) -> EvalResult {
    Ok(Node::new_vector(args, span))
}

pub fn prim_hash_map(args: Vec<Node>, _env: &Env, span: Span) -> EvalResult {
    if args.len() % 2 != 0 {
        return Err(EvalError::InvalidArguments(
            "Primitive 'hash-map' expects key-value pairs".to_string(),
            span,
        ));
    }
    let mut entries: Vec<(Node, Node)> = Vec::with_capacity(args.len() / 2);
    let mut args = args.into_iter();
    while let (Some(key), Some(value)) = (args.next(), args.next()) {
        insert_entry(&mut entries, key, value);
    }
    Ok(Node::new_map(entries, span))
}

pub fn prim_first(args: Vec<Node>, _env: &Env, span: Span) -> EvalResult {
    check_arity!(args, 1, span, "first");
    let items = expect_seq(&args[0], span, "first")?;
    Ok(items
        .first()
        .cloned()
        .unwrap_or_else(|| Node::new_nil(span)))
}

pub fn prim_rest(args: Vec<Node>, _env: &Env, span: Span) -> EvalResult {
    check_arity!(args, 1, span, "rest");
    let items = expect_seq(&args[0], span, "rest")?;
    let tail = items.get(1..).unwrap_or_default().to_vec();
    Ok(same_seq(&args[0], tail, span))
}

pub fn prim_nth(args: Vec<Node>, _env: &Env, span: Span) -> EvalResult {
    // (nth coll index [default])
    check_arity!(args, 2, 3, span, "nth");
    let items = expect_seq(&args[0], span, "nth")?;
    let index = expect_index(&args[1], span, "nth")?;
    match (items.get(index), args.get(2)) {
        (Some(item), _) => Ok(item.clone()),
        (None, Some(default)) => Ok(default.clone()),
        (None, None) => Err(EvalError::InvalidArguments(
            format!(
                "Index {} out of bounds for collection of length {}",
                index,
                items.len()
            ),
            args[1].span,
        )),
    }
}

pub fn prim_count(args: Vec<Node>, _env: &Env, span: Span) -> EvalResult {
    check_arity!(args, 1, span, "count");
    let count = match &args[0].kind {
        Sexpr::List(items) | Sexpr::Vector(items) => items.len(),
        Sexpr::Map(entries) => entries.len(),
        Sexpr::String(s) => s.chars().count(),
        Sexpr::Nil => 0,
        _ => return Err(type_error("count", "a collection or string", &args[0], span)),
    };
    Ok(Node::new_number(count as f64, span))
}

pub fn prim_conj(args: Vec<Node>, _env: &Env, span: Span) -> EvalResult {
    // Vectors grow at the end, lists (and nil) at the front.
    check_arity!(args, min 2, span, "conj");
    let (collection, elements) = (&args[0], &args[1..]);
    match &collection.kind {
        Sexpr::Vector(items) => {
            let mut result = items.to_vec();
            result.extend(elements.iter().cloned());
            Ok(Node::new_vector(result, span))
        }
        Sexpr::List(_) | Sexpr::Nil => {
            let items = expect_seq(collection, span, "conj")?;
            let result = elements.iter().rev().chain(items).cloned().collect();
            Ok(Node::new_list(result, span))
        }
        _ => Err(type_error("conj", "a list or vector", collection, span)),
    }
}

pub fn prim_cons(args: Vec<Node>, _env: &Env, span: Span) -> EvalResult {
    // (cons item coll) -> (item ..coll)
    check_arity!(args, 2, span, "cons");
    let items = expect_seq(&args[1], span, "cons")?;
    let mut result = Vec::with_capacity(items.len() + 1);
    result.push(args[0].clone());
    result.extend(items.iter().cloned());
    Ok(Node::new_list(result, span))
}

pub fn prim_concat(args: Vec<Node>, _env: &Env, span: Span) -> EvalResult {
    // Result has the type of the first argument; (concat) is [].
    let Some(first) = args.first() else {
        return Ok(Node::new_vector(vec![], span));
    };
    let mut result = Vec::new();
    for arg in &args {
        result.extend(expect_seq(arg, span, "concat")?.iter().cloned());
    }
    Ok(same_seq(first, result, span))
}

pub fn prim_reverse(args: Vec<Node>, _env: &Env, span: Span) -> EvalResult {
    check_arity!(args, 1, span, "reverse");
    if let Sexpr::String(s) = &args[0].kind {
        return Ok(Node::new_string(&s.chars().rev().collect::<String>(), span));
    }
    let items = expect_seq(&args[0], span, "reverse")?;
    let reversed = items.iter().rev().cloned().collect();
    Ok(same_seq(&args[0], reversed, span))
}

/// Largest vector `range` will build.
pub const MAX_RANGE_LENGTH: usize = 10_000_000;

pub fn prim_range(args: Vec<Node>, _env: &Env, span: Span) -> EvalResult {
    // (range end), (range start end), (range start end step)
    check_arity!(args, 1, 3, span, "range");
    let mut numbers = Vec::with_capacity(args.len());
    for arg in &args {
        numbers.push(expect_number!(arg, span, "range"));
    }
    let (start, end, step) = match numbers[..] {
        [end] => (0.0, end, 1.0),
        [start, end] => (start, end, 1.0),
        [start, end, step] => (start, end, step),
        _ => unreachable!("arity checked above"),
    };
    if !(start.is_finite() && end.is_finite() && step.is_finite()) {
        return Err(EvalError::InvalidArguments(
            "Primitive 'range' expects finite numbers".to_string(),
            span,
        ));
    }
    if step == 0.0 {
        return Err(EvalError::InvalidArguments(
            "Primitive 'range' step must not be zero".to_string(),
            span,
        ));
    }
    let length = ((end - start) / step).ceil().max(0.0);
    if length > MAX_RANGE_LENGTH as f64 {
        return Err(EvalError::InvalidArguments(
            format!(
                "Primitive 'range' would produce {} elements, the limit is {}",
                length, MAX_RANGE_LENGTH
            ),
            span,
        ));
    }
    let items = (0..length as usize)
        .map(|i| Node::new_number(start + i as f64 * step, span))
        .collect();
    Ok(Node::new_vector(items, span))
}

pub fn prim_is_empty(args: Vec<Node>, _env: &Env, span: Span) -> EvalResult {
    check_arity!(args, 1, span, "empty?");
    let empty = match &args[0].kind {
        Sexpr::List(items) | Sexpr::Vector(items) => items.is_empty(),
        Sexpr::Map(entries) => entries.is_empty(),
        Sexpr::String(s) => s.is_empty(),
        Sexpr::Nil => true,
        _ => return Err(type_error("empty?", "a collection or string", &args[0], span)),
    };
    Ok(Node::new_bool(empty, span))
}

pub fn prim_get(args: Vec<Node>, _env: &Env, span: Span) -> EvalResult {
    // (get coll key [default]); missing keys yield the default or nil
    check_arity!(args, 2, 3, span, "get");
    let key = &args[1];
    let found = match &args[0].kind {
        Sexpr::Map(entries) => entries
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value.clone()),
        Sexpr::Vector(items) | Sexpr::List(items) => match key.kind {
            Sexpr::Number(n) if n >= 0.0 && n.fract() == 0.0 => items.get(n as usize).cloned(),
            _ => None,
        },
        Sexpr::Nil => None,
        _ => return Err(type_error("get", "a map or vector", &args[0], span)),
    };
    Ok(found
        .or_else(|| args.get(2).cloned())
        .unwrap_or_else(|| Node::new_nil(span)))
}

pub fn prim_assoc(args: Vec<Node>, _env: &Env, span: Span) -> EvalResult {
    // (assoc map key value ...) or (assoc vector index value ...)
    check_arity!(args, min 3, span, "assoc");
    if args.len() % 2 == 0 {
        return Err(EvalError::InvalidArguments(
            "Primitive 'assoc' expects key-value pairs after the collection".to_string(),
            span,
        ));
    }
    let pairs = args[1..].chunks_exact(2);
    match &args[0].kind {
        Sexpr::Map(entries) => {
            let mut entries = entries.to_vec();
            for pair in pairs {
                insert_entry(&mut entries, pair[0].clone(), pair[1].clone());
            }
            Ok(Node::new_map(entries, span))
        }
        Sexpr::Nil => {
            let mut entries = Vec::new();
            for pair in pairs {
                insert_entry(&mut entries, pair[0].clone(), pair[1].clone());
            }
            Ok(Node::new_map(entries, span))
        }
        Sexpr::Vector(items) => {
            let mut items = items.to_vec();
            for pair in pairs {
                let index = expect_index(&pair[0], span, "assoc")?;
                match index.cmp(&items.len()) {
                    Ordering::Less => items[index] = pair[1].clone(),
                    Ordering::Equal => items.push(pair[1].clone()),
                    Ordering::Greater => {
                        return Err(EvalError::InvalidArguments(
                            format!("Index {} out of bounds for assoc", index),
                            pair[0].span,
                        ));
                    }
                }
            }
            Ok(Node::new_vector(items, span))
        }
        _ => Err(type_error("assoc", "a map or vector", &args[0], span)),
    }
}

fn expect_map<'a>(node: &'a Node, span: Span, name: &str) -> EvalResult<&'a [(Node, Node)]> {
    match &node.kind {
        Sexpr::Map(entries) => Ok(entries),
        Sexpr::Nil => Ok(&[]),
        _ => Err(type_error(name, "a map or nil", node, span)),
    }
}

pub fn prim_dissoc(args: Vec<Node>, _env: &Env, span: Span) -> EvalResult {
    // (dissoc map key ...); nil stays nil, missing keys are ignored
    check_arity!(args, min 1, span, "dissoc");
    if matches!(args[0].kind, Sexpr::Nil) {
        return Ok(Node::new_nil(span));
    }
    let removed = &args[1..];
    let entries = expect_map(&args[0], span, "dissoc")?
        .iter()
        .filter(|(key, _)| !removed.contains(key))
        .cloned()
        .collect();
    Ok(Node::new_map(entries, span))
}

pub fn prim_keys(args: Vec<Node>, _env: &Env, span: Span) -> EvalResult {
    check_arity!(args, 1, span, "keys");
    let entries = expect_map(&args[0], span, "keys")?;
    let keys = entries.iter().map(|(key, _)| key.clone()).collect();
    Ok(Node::new_list(keys, span))
}

pub fn prim_vals(args: Vec<Node>, _env: &Env, span: Span) -> EvalResult {
    check_arity!(args, 1, span, "vals");
    let entries = expect_map(&args[0], span, "vals")?;
    let values = entries.iter().map(|(_, value)| value.clone()).collect();
    Ok(Node::new_list(values, span))
}

pub fn prim_merge(args: Vec<Node>, _env: &Env, span: Span) -> EvalResult {
    // Later maps win on duplicate keys; (merge) is {}
    let mut merged = Vec::new();
    for arg in &args {
        for (key, value) in expect_map(arg, span, "merge")? {
            insert_entry(&mut merged, key.clone(), value.clone());
        }
    }
    Ok(Node::new_map(merged, span))
}

// --- Higher-order ---

pub fn prim_map(args: Vec<Node>, env: &Env, span: Span) -> EvalResult {
    // (map f coll) -> [(f x) ...]
    check_arity!(args, 2, span, "map");
    let items = expect_seq(&args[1], span, "map")?;
    let mut results = Vec::with_capacity(items.len());
    for item in items {
        results.push(apply(&args[0], vec![item.clone()], env, span)?);
    }
    Ok(Node::new_vector(results, span))
}

pub fn prim_filter(args: Vec<Node>, env: &Env, span: Span) -> EvalResult {
    // (filter pred coll) -> [x ...] for which (pred x) is truthy
    check_arity!(args, 2, span, "filter");
    let items = expect_seq(&args[1], span, "filter")?;
    let mut results = Vec::new();
    for item in items {
        if apply(&args[0], vec![item.clone()], env, span)?.is_truthy() {
            results.push(item.clone());
        }
    }
    Ok(Node::new_vector(results, span))
}

pub fn prim_reduce(args: Vec<Node>, env: &Env, span: Span) -> EvalResult {
    // (reduce f coll) or (reduce f init coll)
    check_arity!(args, 2, 3, span, "reduce");
    let func = &args[0];
    let (mut acc, items) = if args.len() == 3 {
        (args[1].clone(), expect_seq(&args[2], span, "reduce")?)
    } else {
        match expect_seq(&args[1], span, "reduce")? {
            // (reduce f []) -> (f)
            [] => return apply(func, vec![], env, span),
            [first, rest @ ..] => (first.clone(), rest),
        }
    };
    for item in items {
        acc = apply(func, vec![acc, item.clone()], env, span)?;
    }
    Ok(acc)
}

pub fn prim_apply(args: Vec<Node>, env: &Env, span: Span) -> EvalResult {
    // (apply f x y [z ...]) -> (f x y z ...)
    check_arity!(args, min 2, span, "apply");
    let (func, rest) = (&args[0], &args[1..]);
    let Some((last, leading)) = rest.split_last() else {
        unreachable!("arity checked above");
    };
    let mut call_args = leading.to_vec();
    call_args.extend(expect_seq(last, span, "apply")?.iter().cloned());
    apply(func, call_args, env, span)
}

pub fn prim_some(args: Vec<Node>, env: &Env, span: Span) -> EvalResult {
    // (some pred coll) -> first truthy (pred x), or nil
    check_arity!(args, 2, span, "some");
    for item in expect_seq(&args[1], span, "some")? {
        let result = apply(&args[0], vec![item.clone()], env, span)?;
        if result.is_truthy() {
            return Ok(result);
        }
    }
    Ok(Node::new_nil(span))
}

pub fn prim_every(args: Vec<Node>, env: &Env, span: Span) -> EvalResult {
    // (every? pred coll); true for an empty collection
    check_arity!(args, 2, span, "every?");
    for item in expect_seq(&args[1], span, "every?")? {
        if !apply(&args[0], vec![item.clone()], env, span)?.is_truthy() {
            return Ok(Node::new_bool(false, span));
        }
    }
    Ok(Node::new_bool(true, span))
}

/// Ordering used by `sort` without a comparator: numbers, strings, keywords,
/// symbols and booleans each among themselves.
fn natural_order(left: &Node, right: &Node, span: Span) -> EvalResult<Ordering> {
    let ordering = match (&left.kind, &right.kind) {
        (Sexpr::Number(a), Sexpr::Number(b)) => a.partial_cmp(b),
        (Sexpr::String(a), Sexpr::String(b)) | (Sexpr::Keyword(a), Sexpr::Keyword(b)) => {
            Some(a.cmp(b))
        }
        (Sexpr::Symbol(a), Sexpr::Symbol(b)) => Some(a.name().cmp(b.name())),
        (Sexpr::Boolean(a), Sexpr::Boolean(b)) => Some(a.cmp(b)),
        _ => None,
    };
    ordering.ok_or_else(|| {
        EvalError::InvalidArguments(
            format!("Primitive 'sort' cannot compare {} with {}", left, right),
            span,
        )
    })
}

/// Ordering from a user comparator: a number is read by its sign, a boolean
/// as "left sorts first".
fn comparator_order(
    comparator: &Node,
    left: &Node,
    right: &Node,
    env: &Env,
    span: Span,
) -> EvalResult<Ordering> {
    let result = apply(comparator, vec![left.clone(), right.clone()], env, span)?;
    match result.kind {
        Sexpr::Number(n) => Ok(n.partial_cmp(&0.0).unwrap_or(Ordering::Equal)),
        Sexpr::Boolean(true) => Ok(Ordering::Less),
        Sexpr::Boolean(false) => {
            let reversed = apply(comparator, vec![right.clone(), left.clone()], env, span)?;
            Ok(if reversed.is_truthy() {
                Ordering::Greater
            } else {
                Ordering::Equal
            })
        }
        _ => Err(type_error(
            "sort",
            "a comparator returning a number or boolean",
            &result,
            span,
        )),
    }
}

/// Stable merge sort that stops at the first comparison error.
fn merge_sort<F>(mut items: Vec<Node>, compare: &mut F) -> EvalResult<Vec<Node>>
where
    F: FnMut(&Node, &Node) -> EvalResult<Ordering>,
{
    if items.len() <= 1 {
        return Ok(items);
    }
    let right = merge_sort(items.split_off(items.len() / 2), compare)?;
    let left = merge_sort(items, compare)?;
    let mut merged = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    loop {
        let take_right = match (left.peek(), right.peek()) {
            (Some(l), Some(r)) => compare(r, l)? == Ordering::Less,
            _ => break,
        };
        if take_right {
            merged.extend(right.next());
        } else {
            merged.extend(left.next());
        }
    }
    merged.extend(left);
    merged.extend(right);
    Ok(merged)
}

pub fn prim_sort(args: Vec<Node>, env: &Env, span: Span) -> EvalResult {
    // (sort coll) or (sort comparator coll) -> sorted vector
    check_arity!(args, 1, 2, span, "sort");
    let (comparator, collection) = match args.len() {
        1 => (None, &args[0]),
        _ => (Some(&args[0]), &args[1]),
    };
    let items = expect_seq(collection, span, "sort")?.to_vec();
    let sorted = match comparator {
        Some(comparator) => merge_sort(items, &mut |a: &Node, b: &Node| {
            comparator_order(comparator, a, b, env, span)
        })?,
        None => merge_sort(items, &mut |a: &Node, b: &Node| natural_order(a, b, span))?,
    };
    Ok(Node::new_vector(sorted, span))
}

// --- Strings ---

pub fn prim_str(args: Vec<Node>, _env: &Env, span: Span) -> EvalResult {
    let joined: String = args
        .iter()
        .map(|arg| arg.kind.to_display_string())
        .collect();
    Ok(Node::new_string(&joined, span))
}

pub fn prim_split(args: Vec<Node>, _env: &Env, span: Span) -> EvalResult {
    // (split string separator) -> ["part" ...]
    check_arity!(args, 2, span, "split");
    let s = expect_string(&args[0], span, "split")?;
    let separator = expect_string(&args[1], span, "split")?;
    let parts: Vec<Node> = if separator.is_empty() {
        s.chars()
            .map(|c| Node::new_string(&c.to_string(), span))
            .collect()
    } else {
        s.split(separator)
            .map(|part| Node::new_string(part, span))
            .collect()
    };
    Ok(Node::new_vector(parts, span))
}

pub fn prim_join(args: Vec<Node>, _env: &Env, span: Span) -> EvalResult {
    // (join coll separator) -> "a,b"
    check_arity!(args, 2, span, "join");
    let items = expect_seq(&args[0], span, "join")?;
    let separator = expect_string(&args[1], span, "join")?;
    let parts: Vec<String> = items
        .iter()
        .map(|item| item.kind.to_display_string())
        .collect();
    Ok(Node::new_string(&parts.join(separator), span))
}

// --- Predicates ---

macro_rules! is_type {
    ($args:expr, $type:pat, $name:expr, $span:expr) => {{
        check_arity!($args, 1, $span, $name);
        Ok(Node::new_bool(matches!($args[0].kind, $type), $span))
    }};
}

pub fn prim_is_nil(args: Vec<Node>, _env: &Env, span: Span) -> EvalResult {
    is_type!(args, Sexpr::Nil, "nil?", span)
}

pub fn prim_is_number(args: Vec<Node>, _env: &Env, span: Span) -> EvalResult {
    is_type!(args, Sexpr::Number(_), "number?", span)
}

pub fn prim_is_string(args: Vec<Node>, _env: &Env, span: Span) -> EvalResult {
    is_type!(args, Sexpr::String(_), "string?", span)
}

pub fn prim_is_symbol(args: Vec<Node>, _env: &Env, span: Span) -> EvalResult {
    is_type!(args, Sexpr::Symbol(_), "symbol?", span)
}

pub fn prim_is_keyword(args: Vec<Node>, _env: &Env, span: Span) -> EvalResult {
    is_type!(args, Sexpr::Keyword(_), "keyword?", span)
}

pub fn prim_is_boolean(args: Vec<Node>, _env: &Env, span: Span) -> EvalResult {
    is_type!(args, Sexpr::Boolean(_), "boolean?", span)
}

pub fn prim_is_fn(args: Vec<Node>, _env: &Env, span: Span) -> EvalResult {
    is_type!(args, Sexpr::Procedure(_), "fn?", span)
}

pub fn prim_is_vector(args: Vec<Node>, _env: &Env, span: Span) -> EvalResult {
    is_type!(args, Sexpr::Vector(_), "vector?", span)
}

pub fn prim_is_list(args: Vec<Node>, _env: &Env, span: Span) -> EvalResult {
    is_type!(args, Sexpr::List(_), "list?", span)
}

pub fn prim_is_map(args: Vec<Node>, _env: &Env, span: Span) -> EvalResult {
    is_type!(args, Sexpr::Map(_), "map?", span)
}

// --- Output ---

fn display_joined(args: &[Node]) -> String {
    args.iter()
        .map(|arg| arg.kind.to_display_string())
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn prim_print(args: Vec<Node>, _env: &Env, span: Span) -> EvalResult {
    print!("{}", display_joined(&args));
    std::io::stdout().flush().map_err(|e| {
        EvalError::InvalidArguments(format!("Could not write to stdout: {}", e), span)
    })?;
    Ok(Node::new_nil(span))
}

pub fn prim_println(args: Vec<Node>, _env: &Env, span: Span) -> EvalResult {
    println!("{}", display_joined(&args));
    Ok(Node::new_nil(span))
}

/// Registers the standard library in `env`.
pub fn register_all(env: &mut Environment) {
    env.add_primitive("+", prim_add);
    env.add_primitive("-", prim_sub);
    env.add_primitive("*", prim_mul);
    env.add_primitive("/", prim_div);
    env.add_primitive("mod", prim_mod);
    env.add_primitive("abs", prim_abs);
    env.add_primitive("min", prim_min);
    env.add_primitive("max", prim_max);

    env.add_primitive("=", prim_equals);
    env.add_primitive("<", prim_less_than);
    env.add_primitive("<=", prim_less_than_or_equals);
    env.add_primitive(">", prim_greater_than);
    env.add_primitive(">=", prim_greater_than_or_equals);
    env.add_primitive("not", prim_not);

    env.add_primitive("list", prim_list);
    env.add_primitive("vector", prim_vector);
    env.add_primitive("hash-map", prim_hash_map);
    env.add_primitive("first", prim_first);
    env.add_primitive("rest", prim_rest);
    env.add_primitive("nth", prim_nth);
    env.add_primitive("count", prim_count);
    env.add_primitive("conj", prim_conj);
    env.add_primitive("cons", prim_cons);
    env.add_primitive("concat", prim_concat);
    env.add_primitive("reverse", prim_reverse);
    env.add_primitive("range", prim_range);
    env.add_primitive("empty?", prim_is_empty);
    env.add_primitive("get", prim_get);
    env.add_primitive("assoc", prim_assoc);
    env.add_primitive("dissoc", prim_dissoc);
    env.add_primitive("keys", prim_keys);
    env.add_primitive("vals", prim_vals);
    env.add_primitive("merge", prim_merge);

    env.add_primitive("map", prim_map);
    env.add_primitive("filter", prim_filter);
    env.add_primitive("reduce", prim_reduce);
    env.add_primitive("apply", prim_apply);
    env.add_primitive("some", prim_some);
    env.add_primitive("every?", prim_every);
    env.add_primitive("sort", prim_sort);

    env.add_primitive("str", prim_str);
    env.add_primitive("split", prim_split);
    env.add_primitive("join", prim_join);

    env.add_primitive("nil?", prim_is_nil);
    env.add_primitive("number?", prim_is_number);
    env.add_primitive("string?", prim_is_string);
    env.add_primitive("symbol?", prim_is_symbol);
    env.add_primitive("keyword?", prim_is_keyword);
    env.add_primitive("boolean?", prim_is_boolean);
    env.add_primitive("fn?", prim_is_fn);
    env.add_primitive("vector?", prim_is_vector);
    env.add_primitive("list?", prim_is_list);
    env.add_primitive("map?", prim_is_map);

    env.add_primitive("print", prim_print);
    env.add_primitive("println", prim_println);
}
