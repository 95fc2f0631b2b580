use crate::evaluator::arguments_word;
use crate::interpreter::Error;
use crate::{EnvError, EvalError, ParseError, Span};
use ariadne::{Label, Report, ReportKind, Source};
use std::io;
use std::ops::Range;

type Diagnostic<'a> = Report<'a, (&'a str, Range<usize>)>;

fn report<'a>(source_name: &'a str, span: Span, message: String, label: String) -> Diagnostic<'a> {
    Report::build(ReportKind::Error, (source_name, span.to_range()))
        .with_message(message)
        .with_label(Label::new((source_name, span.to_range())).with_message(label))
        .finish()
}

impl EvalError {
    fn to_report<'a>(&self, source_name: &'a str) -> Diagnostic<'a> {
        let span = self.span();
        match self {
            EvalError::Env(EnvError::UnboundSymbol(symbol, _)) => report(
                source_name,
                span,
                format!("Unbound symbol `{}`", symbol),
                "This symbol is not defined in the current scope".to_string(),
            ),
            EvalError::Syntax(message, _) => report(
                source_name,
                span,
                "Syntax error".to_string(),
                message.clone(),
            ),
            EvalError::Arity {
                name,
                expected,
                actual,
                ..
            } => report(
                source_name,
                span,
                format!("Wrong number of arguments to {}", name),
                format!(
                    "Expected {} {}, got {}",
                    expected,
                    arguments_word(expected),
                    actual
                ),
            ),
            EvalError::NotCallable(sexpr, _) => report(
                source_name,
                span,
                format!("Not callable: {}", sexpr),
                format!("A {} cannot be called as a procedure", sexpr.type_name()),
            ),
            EvalError::InvalidArguments(message, _) => report(
                source_name,
                span,
                "Invalid arguments".to_string(),
                message.clone(),
            ),
            EvalError::Module(error, _) => report(
                source_name,
                span,
                format!("Module error in '{}'", error.module()),
                error.to_string(),
            ),
            EvalError::Thrown(value) => report(
                source_name,
                span,
                format!("Uncaught throw: {}", value),
                "Thrown here".to_string(),
            ),
            EvalError::DepthExceeded { limit, .. } => report(
                source_name,
                span,
                format!("Maximum recursion depth ({}) exceeded", limit),
                "Non-tail recursion nested too deeply here; use 'recur' instead".to_string(),
            ),
        }
    }

    /// Writes an annotated diagnostic for this error to stderr.
    pub fn pretty_print(&self, source_name: &str, input: &str) -> io::Result<()> {
        self.to_report(source_name)
            .eprint((source_name, Source::from(input)))
    }
}

impl ParseError {
    fn to_report<'a>(&self, source_name: &'a str, input: &str) -> Diagnostic<'a> {
        match self {
            ParseError::UnexpectedToken { found, expected } => report(
                source_name,
                found.span,
                format!("Unexpected token: {}", found.kind),
                format!("Expected {}", expected),
            ),
            ParseError::UnexpectedEof(expected) => {
                let end = input.len();
                report(
                    source_name,
                    Span::new(end, end),
                    "Unexpected end of input".to_string(),
                    format!("Expected {}", expected),
                )
            }
            ParseError::LexerError(lex_err) => report(
                source_name,
                lex_err.span,
                "Lexer error".to_string(),
                lex_err.error.to_string(),
            ),
            ParseError::OddMapLiteral(span) => report(
                source_name,
                *span,
                "Invalid map literal".to_string(),
                "Map literals need an even number of forms".to_string(),
            ),
        }
    }

    /// Writes an annotated diagnostic for this error to stderr.
    pub fn pretty_print(&self, source_name: &str, input: &str) -> io::Result<()> {
        self.to_report(source_name, input)
            .eprint((source_name, Source::from(input)))
    }
}

impl Error {
    /// Writes a diagnostic for this error to stderr.
    pub fn pretty_print(&self, source_name: &str, input: &str) -> io::Result<()> {
        match self {
            Error::Parse(e) => e.pretty_print(source_name, input),
            Error::Eval(e) => e.pretty_print(source_name, input),
            Error::Io { .. } => {
                eprintln!("Error: {}", self);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Interpreter;

    fn render(report: Diagnostic<'_>, source_name: &str, input: &str) -> String {
        let mut buffer = Vec::new();
        report
            .write((source_name, Source::from(input)), &mut buffer)
            .unwrap();
        String::from_utf8(buffer).unwrap()
    }

    #[test]
    fn test_eval_error_report_mentions_symbol() {
        let input = "(+ 1 missing)";
        let interpreter = Interpreter::default();
        let Err(Error::Eval(err)) = interpreter.eval_str(input) else {
            panic!("expected an evaluation error");
        };
        let output = render(err.to_report("test"), "test", input);
        assert!(output.contains("Unbound symbol `missing`"), "{}", output);
    }

    #[test]
    fn test_arity_report_uses_singular() {
        let input = "((fn [x] x))";
        let interpreter = Interpreter::default();
        let Err(Error::Eval(err)) = interpreter.eval_str(input) else {
            panic!("expected an evaluation error");
        };
        let output = render(err.to_report("test"), "test", input);
        assert!(output.contains("Expected 1 argument, got 0"), "{}", output);
    }

    #[test]
    fn test_parse_error_report_at_end_of_input() {
        let input = "(define x";
        let interpreter = Interpreter::default();
        let Err(Error::Parse(err)) = interpreter.eval_str(input) else {
            panic!("expected a parse error");
        };
        let output = render(err.to_report("test", input), "test", input);
        assert!(output.contains("Unexpected end of input"), "{}", output);
    }
}
