use super::{expect_symbol, value};
use crate::environment::Env;
use crate::evaluator::{EvalError, EvalResult, Flow};
use crate::module::ModuleError;
use crate::source::Span;
use crate::types::{Node, Sexpr};

/// `(export sym...)`: adds names to the public surface of the module being loaded.
pub(super) fn evaluate_export(operands: &[Node], env: &Env, span: Span) -> EvalResult<Flow> {
    let Some(module) = env.borrow().current_module() else {
        return Err(EvalError::syntax(
            "'export' can only be used inside a module",
            span,
        ));
    };
    if operands.is_empty() {
        return Err(EvalError::syntax(
            "'export' requires at least one symbol",
            span,
        ));
    }
    for operand in operands {
        let sym = expect_symbol(operand, "export")?;
        module.add_export(sym.name());
    }
    value(Node::new_nil(span))
}

enum ImportStyle {
    All,
    Prefixed(String),
    Only(Vec<String>),
}

/// `(import name)`, `(import name :as prefix)` or `(import name :only [sym...])`.
pub(super) fn evaluate_import(operands: &[Node], env: &Env, span: Span) -> EvalResult<Flow> {
    let [name_node, options @ ..] = operands else {
        return Err(EvalError::syntax("'import' requires a module name", span));
    };
    let module_name = name_or_symbol(name_node).ok_or_else(|| {
        EvalError::syntax(
            "'import' module name must be a string or symbol",
            name_node.span,
        )
    })?;
    let style = parse_import_style(options, span)?;

    let Some(loader) = env.borrow().module_loader() else {
        return Err(EvalError::Module(
            ModuleError::NoLoader {
                module: module_name,
            },
            span,
        ));
    };
    tracing::debug!(module = %module_name, "importing module");
    let module = loader
        .load_module(&module_name)
        .map_err(|e| EvalError::Module(e, span))?;

    let bindings: Vec<(String, Node)> = match style {
        ImportStyle::All => module.get_all_exports().into_iter().collect(),
        ImportStyle::Prefixed(prefix) => module
            .get_all_exports()
            .into_iter()
            .map(|(name, value)| (format!("{}/{}", prefix, name), value))
            .collect(),
        ImportStyle::Only(names) => names
            .into_iter()
            .map(|name| {
                module
                    .get_exported_value(&name)
                    .map(|value| (name, value))
                    .map_err(|e| EvalError::Module(e, span))
            })
            .collect::<EvalResult<_>>()?,
    };

    let mut env_mut = env.borrow_mut();
    for (name, value) in bindings {
        env_mut.define(name, value);
    }
    value(Node::new_nil(span))
}

fn name_or_symbol(node: &Node) -> Option<String> {
    match &node.kind {
        Sexpr::String(name) => Some(name.clone()),
        Sexpr::Symbol(sym) => Some(sym.name().to_string()),
        _ => None,
    }
}

fn parse_import_style(options: &[Node], span: Span) -> EvalResult<ImportStyle> {
    match options {
        [] => Ok(ImportStyle::All),
        [option, argument] => match &option.kind {
            Sexpr::Keyword(keyword) if keyword == "as" => name_or_symbol(argument)
                .map(ImportStyle::Prefixed)
                .ok_or_else(|| {
                    EvalError::syntax(
                        "'import :as' prefix must be a string or symbol",
                        argument.span,
                    )
                }),
            Sexpr::Keyword(keyword) if keyword == "only" => {
                let items = match &argument.kind {
                    Sexpr::List(items) | Sexpr::Vector(items) => items,
                    _ => {
                        return Err(EvalError::syntax(
                            "'import :only' requires a list of symbols",
                            argument.span,
                        ));
                    }
                };
                let names = items
                    .iter()
                    .map(|item| {
                        expect_symbol(item, "import :only").map(|sym| sym.name().to_string())
                    })
                    .collect::<EvalResult<Vec<_>>>()?;
                Ok(ImportStyle::Only(names))
            }
            _ => Err(EvalError::syntax(
                format!("Unknown import option: {}", option),
                option.span,
            )),
        },
        _ => Err(EvalError::syntax(
            "'import' accepts a module name optionally followed by ':as prefix' or ':only [symbols]'",
            span,
        )),
    }
}

#[cfg(test)]
mod tests {
    use crate::environment::Environment;
    use crate::evaluator::{ErrorKind, EvalError, evaluate};
    use crate::module::{MemoryModuleLoader, ModuleError, ModuleLoader};
    use crate::parser::parse_program;
    use crate::types::Node;
    use std::rc::Rc;

    const MATH: &str = "
        (define square (fn [x] (* x x)))
        (define cube (fn [x] (* x (square x))))
        (define secret 42)
        (export square cube)";

    struct Fixture {
        // Keeps the loader alive; the environment only holds a weak reference.
        _loader: Rc<dyn ModuleLoader>,
        env: crate::environment::Env,
    }

    fn fixture(modules: &[(&str, &str)]) -> Fixture {
        let memory = Rc::new(MemoryModuleLoader::new());
        for (name, source) in modules {
            memory.add_source(name, source);
        }
        let loader: Rc<dyn ModuleLoader> = memory;
        let env = Environment::new_global_populated();
        env.borrow_mut().set_module_loader(Rc::downgrade(&loader));
        Fixture {
            _loader: loader,
            env,
        }
    }

    fn eval(fixture: &Fixture, input: &str) -> Result<Node, EvalError> {
        let mut result = Node::new_nil(Default::default());
        for node in parse_program(input).unwrap() {
            result = evaluate(&node, &fixture.env)?;
        }
        Ok(result)
    }

    fn assert_eval(fixture: &Fixture, input: &str, expected: &str) {
        match eval(fixture, input) {
            Ok(result) => assert_eq!(result.to_string(), expected, "Input: '{}'", input),
            Err(e) => panic!("Evaluation failed for input '{}': {}", input, e),
        }
    }

    #[test]
    fn test_import_all_exports() {
        let fx = fixture(&[("math", MATH)]);
        assert_eval(&fx, "(import \"math\")", "nil");
        assert_eval(&fx, "(cube 3)", "27");
        assert_eq!(
            eval(&fx, "secret").unwrap_err().kind(),
            ErrorKind::UnboundSymbol
        );
    }

    #[test]
    fn test_import_with_prefix() {
        let fx = fixture(&[("math", MATH)]);
        assert_eval(&fx, "(import \"math\" :as \"m\") (m/square 4)", "16");
        assert_eval(&fx, "(import math :as mm) (mm/cube 2)", "8");
        assert_eq!(
            eval(&fx, "square").unwrap_err().kind(),
            ErrorKind::UnboundSymbol
        );
    }

    #[test]
    fn test_import_only() {
        let fx = fixture(&[("math", MATH)]);
        assert_eval(&fx, "(import \"math\" :only (square)) (square 5)", "25");
        assert_eq!(eval(&fx, "cube").unwrap_err().kind(), ErrorKind::UnboundSymbol);
        assert_eval(&fx, "(import \"math\" :only [cube]) (cube 1)", "1");
    }

    #[test]
    fn test_import_only_unexported_names_the_module() {
        let fx = fixture(&[("math", MATH)]);
        match eval(&fx, "(import \"math\" :only (secret))") {
            Err(EvalError::Module(ModuleError::NotExported { module, symbol }, _)) => {
                assert_eq!(module, "math");
                assert_eq!(symbol, "secret");
            }
            other => panic!("expected NotExported, got {:?}", other),
        }
    }

    #[test]
    fn test_modules_import_modules() {
        let fx = fixture(&[
            ("math", MATH),
            (
                "geometry",
                "(import \"math\" :as \"m\")
                 (define area (fn [side] (m/square side)))
                 (export area)",
            ),
        ]);
        assert_eval(&fx, "(import \"geometry\") (area 6)", "36");
    }

    #[test]
    fn test_module_closures_see_their_own_scope() {
        let fx = fixture(&[(
            "counter",
            "(define base 100) (define offset (fn [x] (+ base x))) (export offset)",
        )]);
        assert_eval(&fx, "(define base 0) (import \"counter\") (offset 1)", "101");
    }

    #[test]
    fn test_import_errors() {
        let fx = fixture(&[("math", MATH), ("broken", "(define x")]);
        let err = eval(&fx, "(import \"missing\")").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Module);
        assert!(err.to_string().contains("missing"));

        let err = eval(&fx, "(import \"broken\")").unwrap_err();
        assert!(matches!(err, EvalError::Module(ModuleError::Parse { .. }, _)));

        assert_eq!(eval(&fx, "(import)").unwrap_err().kind(), ErrorKind::Syntax);
        assert_eq!(eval(&fx, "(import 1)").unwrap_err().kind(), ErrorKind::Syntax);
        assert_eq!(
            eval(&fx, "(import \"math\" :bogus x)").unwrap_err().kind(),
            ErrorKind::Syntax
        );
        assert_eq!(
            eval(&fx, "(import \"math\" :only 1)").unwrap_err().kind(),
            ErrorKind::Syntax
        );
    }

    #[test]
    fn test_import_without_loader() {
        let env = Environment::new_global_populated();
        let node = &parse_program("(import \"math\")").unwrap()[0];
        match evaluate(node, &env) {
            Err(EvalError::Module(ModuleError::NoLoader { module }, _)) => {
                assert_eq!(module, "math")
            }
            other => panic!("expected NoLoader, got {:?}", other),
        }
    }

    #[test]
    fn test_export_outside_module() {
        let fx = fixture(&[]);
        assert_eq!(
            eval(&fx, "(define x 1) (export x)").unwrap_err().kind(),
            ErrorKind::Syntax
        );
    }

    #[test]
    fn test_export_syntax_in_module() {
        let fx = fixture(&[("empty", "(export)"), ("numeric", "(export 1)")]);
        let err = eval(&fx, "(import \"empty\")").unwrap_err();
        assert!(matches!(err, EvalError::Module(ModuleError::Evaluation { .. }, _)));
        assert!(err.to_string().contains("at least one symbol"));
        assert!(eval(&fx, "(import \"numeric\")").is_err());
    }
}
