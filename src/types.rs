use crate::environment::Env;
use crate::evaluator::EvalResult;
use crate::source::Span;
use std::fmt;
use std::rc::Rc;

/// An immutable name. Two symbols are equal when their names are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Symbol(Rc<str>);

impl Symbol {
    pub fn new(name: &str) -> Self {
        Symbol(Rc::from(name))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Symbol {
    fn from(name: &str) -> Self {
        Symbol::new(name)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: Sexpr, // The actual S-expression data
    pub span: Span,  // The source span it covers
}

// Spans are location metadata; two nodes are equal when their data is.
impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl Node {
    pub fn new(kind: Sexpr, span: Span) -> Self {
        Node { kind, span }
    }

    pub fn new_nil(span: Span) -> Self {
        Node::new(Sexpr::Nil, span)
    }

    pub fn new_bool(b: bool, span: Span) -> Self {
        Node::new(Sexpr::Boolean(b), span)
    }

    pub fn new_number(n: f64, span: Span) -> Self {
        Node::new(Sexpr::Number(n), span)
    }

    pub fn new_string(s: &str, span: Span) -> Self {
        Node::new(Sexpr::String(s.to_string()), span)
    }

    pub fn new_symbol(name: &str, span: Span) -> Self {
        Node::new(Sexpr::Symbol(Symbol::new(name)), span)
    }

    pub fn new_keyword(name: &str, span: Span) -> Self {
        Node::new(Sexpr::Keyword(name.to_string()), span)
    }

    pub fn new_list(items: Vec<Node>, span: Span) -> Self {
        Node::new(Sexpr::List(Rc::new(items)), span)
    }

    pub fn new_vector(items: Vec<Node>, span: Span) -> Self {
        Node::new(Sexpr::Vector(Rc::new(items)), span)
    }

    pub fn new_map(entries: Vec<(Node, Node)>, span: Span) -> Self {
        Node::new(Sexpr::Map(Rc::new(entries)), span)
    }

    pub fn new_primitive(func: PrimitiveFunc, name: &str, span: Span) -> Self {
        Node::new(
            Sexpr::Procedure(Procedure::Primitive(func, name.to_string())),
            span,
        )
    }

    /// Builds `(quote expr)`, as produced by the `'expr` reader shorthand.
    pub fn new_quote(quoted: Node, quote_span: Span) -> Self {
        let span = quote_span.merge(&quoted.span);
        Node::new_list(vec![Node::new_symbol("quote", quote_span), quoted], span)
    }

    pub fn as_symbol(&self) -> Option<&Symbol> {
        match &self.kind {
            Sexpr::Symbol(sym) => Some(sym),
            _ => None,
        }
    }

    pub fn is_truthy(&self) -> bool {
        self.kind.is_truthy()
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}

/// Both code and data. The reader produces the atom and composite variants;
/// `Procedure` only ever appears as the result of evaluation.
#[derive(Debug, Clone)]
pub enum Sexpr {
    Nil,
    Boolean(bool),
    Number(f64),
    String(String),
    Symbol(Symbol),
    Keyword(String),                // :name, stored without the colon
    List(Rc<Vec<Node>>),            // (f a b) call forms and quoted lists
    Vector(Rc<Vec<Node>>),          // [a b]
    Map(Rc<Vec<(Node, Node)>>),     // {k v}, insertion ordered
    Procedure(Procedure),
}

impl Sexpr {
    /// Only `false` and `nil` are falsey.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Sexpr::Boolean(false) | Sexpr::Nil)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Sexpr::Nil => "nil",
            Sexpr::Boolean(_) => "boolean",
            Sexpr::Number(_) => "number",
            Sexpr::String(_) => "string",
            Sexpr::Symbol(_) => "symbol",
            Sexpr::Keyword(_) => "keyword",
            Sexpr::List(_) => "list",
            Sexpr::Vector(_) => "vector",
            Sexpr::Map(_) => "map",
            Sexpr::Procedure(_) => "procedure",
        }
    }

    /// Text used by `str` and `print`: strings are not quoted and nil is empty.
    pub fn to_display_string(&self) -> String {
        match self {
            Sexpr::String(s) => s.clone(),
            Sexpr::Nil => String::new(),
            other => other.to_string(),
        }
    }
}

// Maps compare as sets of entries; everything else structurally.
impl PartialEq for Sexpr {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Sexpr::Nil, Sexpr::Nil) => true,
            (Sexpr::Boolean(a), Sexpr::Boolean(b)) => a == b,
            (Sexpr::Number(a), Sexpr::Number(b)) => a == b,
            (Sexpr::String(a), Sexpr::String(b)) => a == b,
            (Sexpr::Symbol(a), Sexpr::Symbol(b)) => a == b,
            (Sexpr::Keyword(a), Sexpr::Keyword(b)) => a == b,
            (Sexpr::List(a), Sexpr::List(b)) | (Sexpr::Vector(a), Sexpr::Vector(b)) => a == b,
            (Sexpr::Map(a), Sexpr::Map(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(key, value)| {
                        b.iter()
                            .any(|(other_key, other_value)| key == other_key && value == other_value)
                    })
            }
            (Sexpr::Procedure(a), Sexpr::Procedure(b)) => a == b,
            _ => false,
        }
    }
}

/// Sets `key` in map entries: an existing key keeps its position and takes the new
/// value, a new key is appended.
pub(crate) fn insert_entry(entries: &mut Vec<(Node, Node)>, key: Node, value: Node) {
    match entries.iter_mut().find(|(existing, _)| *existing == key) {
        Some(entry) => entry.1 = value,
        None => entries.push((key, value)),
    }
}

fn write_seq(f: &mut fmt::Formatter<'_>, items: &[Node]) -> fmt::Result {
    let mut first = true;
    for item in items {
        if !first {
            write!(f, " ")?;
        }
        write!(f, "{}", item)?;
        first = false;
    }
    Ok(())
}

impl fmt::Display for Sexpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sexpr::Nil => write!(f, "nil"),
            Sexpr::Boolean(b) => write!(f, "{}", b),
            Sexpr::Number(n) => write!(f, "{}", n),
            Sexpr::String(str) => {
                write!(
                    f,
                    "\"{}\"",
                    str.chars().fold(String::new(), |mut acc, char| {
                        match char {
                            '"' => acc.push_str("\\\""),
                            '\\' => acc.push_str("\\\\"),
                            '\n' => acc.push_str("\\n"),
                            '\r' => acc.push_str("\\r"),
                            '\t' => acc.push_str("\\t"),
                            c => acc.push(c),
                        }
                        acc
                    })
                )
            }
            Sexpr::Symbol(s) => write!(f, "{}", s),
            Sexpr::Keyword(k) => write!(f, ":{}", k),
            Sexpr::List(items) => {
                write!(f, "(")?;
                write_seq(f, items)?;
                write!(f, ")")
            }
            Sexpr::Vector(items) => {
                write!(f, "[")?;
                write_seq(f, items)?;
                write!(f, "]")
            }
            Sexpr::Map(entries) => {
                write!(f, "{{")?;
                let mut first = true;
                for (key, value) in entries.iter() {
                    if !first {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} {}", key, value)?;
                    first = false;
                }
                write!(f, "}}")
            }
            Sexpr::Procedure(procedure) => write!(f, "{}", procedure),
        }
    }
}

/// Host-provided callable: `(argument values, calling environment, call span) -> value`.
pub type PrimitiveFunc = fn(Vec<Node>, &Env, Span) -> EvalResult;

/// User-level function value. Produced by `fn`, and (as a loop context) by `loop`.
/// Never mutated after creation.
pub struct Closure {
    pub params: Vec<Symbol>,
    pub body: Vec<Node>,
    pub env: Env, // Defining environment, captured by reference
}

impl Closure {
    pub fn new(params: Vec<Symbol>, body: Vec<Node>, env: Env) -> Self {
        Closure { params, body, env }
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    fn write_params(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.params.iter().map(Symbol::name).collect();
        write!(f, "({})", names.join(" "))
    }
}

// The captured environment may contain this very closure, so Debug stops at the params.
impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Closure")?;
        self.write_params(f)
    }
}

/// The closed set of callables `apply` knows how to invoke.
#[derive(Clone)]
pub enum Procedure {
    Primitive(PrimitiveFunc, String), // The function pointer and its name (for display/debug)
    Closure(Rc<Closure>),
    Loop(Rc<Closure>), // Recursion target synthesized by `loop`
}

impl Procedure {
    /// The closure behind a `fn` or `loop` value; `None` for primitives.
    pub fn closure(&self) -> Option<&Rc<Closure>> {
        match self {
            Procedure::Primitive(..) => None,
            Procedure::Closure(closure) | Procedure::Loop(closure) => Some(closure),
        }
    }
}

impl fmt::Display for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Procedure::Primitive(_, name) => write!(f, "#<primitive:{}>", name),
            Procedure::Closure(closure) => {
                write!(f, "#<fn")?;
                closure.write_params(f)?;
                write!(f, ">")
            }
            Procedure::Loop(closure) => {
                write!(f, "#<loop")?;
                closure.write_params(f)?;
                write!(f, ">")
            }
        }
    }
}

impl fmt::Debug for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Procedure::Primitive(_, name) => write!(f, "Primitive({})", name),
            Procedure::Closure(closure) => write!(f, "{:?}", closure),
            Procedure::Loop(closure) => write!(f, "Loop{:?}", closure),
        }
    }
}

// Primitives compare by name, closures by identity.
impl PartialEq for Procedure {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Procedure::Primitive(_, n1), Procedure::Primitive(_, n2)) => n1 == n2,
            (Procedure::Closure(c1), Procedure::Closure(c2))
            | (Procedure::Loop(c1), Procedure::Loop(c2)) => Rc::ptr_eq(c1, c2),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::Environment;

    fn num(n: f64) -> Node {
        Node::new_number(n, Span::default())
    }

    #[test]
    fn test_truthiness() {
        assert!(!Sexpr::Nil.is_truthy());
        assert!(!Sexpr::Boolean(false).is_truthy());
        assert!(Sexpr::Boolean(true).is_truthy());
        assert!(Sexpr::Number(0.0).is_truthy());
        assert!(Sexpr::String(String::new()).is_truthy());
        assert!(Sexpr::Vector(Rc::new(vec![])).is_truthy());
    }

    #[test]
    fn test_node_equality_ignores_span() {
        assert_eq!(
            Node::new_number(1.0, Span::new(0, 1)),
            Node::new_number(1.0, Span::new(7, 8))
        );
        assert_eq!(Symbol::new("x"), Symbol::from("x"));
    }

    #[test]
    fn test_map_equality_is_order_independent() {
        let span = Span::default();
        let key = |name: &str| Node::new_keyword(name, span);
        let ab = Node::new_map(vec![(key("a"), num(1.0)), (key("b"), num(2.0))], span);
        let ba = Node::new_map(vec![(key("b"), num(2.0)), (key("a"), num(1.0))], span);
        let a = Node::new_map(vec![(key("a"), num(1.0))], span);
        assert_eq!(ab, ba);
        assert_ne!(ab, a);
        assert_ne!(a, Node::new_map(vec![(key("a"), num(2.0))], span));
    }

    #[test]
    fn test_insert_entry_replaces_in_place() {
        let span = Span::default();
        let mut entries = Vec::new();
        insert_entry(&mut entries, Node::new_keyword("a", span), num(1.0));
        insert_entry(&mut entries, Node::new_keyword("b", span), num(2.0));
        insert_entry(&mut entries, Node::new_keyword("a", span), num(3.0));
        assert_eq!(Node::new_map(entries, span).to_string(), "{:a 3, :b 2}");
    }

    #[test]
    fn test_display() {
        let span = Span::default();
        let list = Node::new_list(vec![Node::new_symbol("+", span), num(1.0), num(2.5)], span);
        assert_eq!(list.to_string(), "(+ 1 2.5)");

        let vector = Node::new_vector(vec![num(1.0), Node::new_nil(span)], span);
        assert_eq!(vector.to_string(), "[1 nil]");

        let map = Node::new_map(
            vec![
                (Node::new_keyword("a", span), num(1.0)),
                (Node::new_string("b", span), Node::new_bool(false, span)),
            ],
            span,
        );
        assert_eq!(map.to_string(), "{:a 1, \"b\" false}");

        assert_eq!(Node::new_string("a\"b", span).to_string(), "\"a\\\"b\"");
        assert_eq!(Sexpr::String("plain".into()).to_display_string(), "plain");
        assert_eq!(Sexpr::Nil.to_display_string(), "");
    }

    #[test]
    fn test_procedure_display_and_identity() {
        let env = Environment::new();
        let closure = Rc::new(Closure::new(
            vec![Symbol::new("x"), Symbol::new("y")],
            vec![num(1.0)],
            env,
        ));
        let as_fn = Procedure::Closure(closure.clone());
        let as_loop = Procedure::Loop(closure.clone());
        assert_eq!(as_fn.to_string(), "#<fn(x y)>");
        assert_eq!(as_loop.to_string(), "#<loop(x y)>");
        assert_eq!(format!("{:?}", as_fn), "Closure(x y)");
        assert_eq!(as_fn, Procedure::Closure(closure.clone()));
        assert_ne!(as_fn, as_loop);

        let other = Rc::new(Closure::new(vec![], vec![num(1.0)], Environment::new()));
        assert_ne!(as_fn, Procedure::Closure(other));
    }
}
