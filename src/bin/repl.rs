use std::borrow::Cow;

use lispy::{
    Config, EditMode, Env, Interpreter, TokenKind, special_form_identifiers, tokenize,
    with_eval_stack,
};
use rustyline::error::ReadlineError;
use rustyline::highlight::{CmdKind, Highlighter};
use rustyline::validate::{ValidationContext, ValidationResult, Validator};
use rustyline::{Cmd, Completer, Context, Editor, EventHandler, KeyCode, KeyEvent, Modifiers};
use rustyline::{Helper, Highlighter, Hinter, Validator};
use tracing_subscriber::EnvFilter;

const SOURCE_NAME: &str = "repl";

/// Completes the symbol under the cursor from bound identifiers and special forms.
struct LispyCompleter {
    env: Env,
}

impl LispyCompleter {
    fn new(env: Env) -> Self {
        LispyCompleter { env }
    }
}

impl rustyline::completion::Completer for LispyCompleter {
    type Candidate = String;
    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<String>)> {
        let Ok(tokens) = tokenize(&line[..pos]) else {
            return Ok((pos, vec![]));
        };
        let Some(TokenKind::Symbol(prefix)) = tokens.last().map(|t| t.kind.clone()) else {
            return Ok((pos, vec![]));
        };
        let mut candidates: Vec<String> = self
            .env
            .borrow()
            .get_identifiers()
            .union(&special_form_identifiers())
            .filter_map(|id| id.strip_prefix(prefix.as_str()).map(str::to_string))
            .filter(|rest| !rest.is_empty())
            .collect();
        candidates.sort();
        Ok((pos, candidates))
    }
}

#[derive(Completer, Helper, Highlighter, Hinter, Validator)]
struct InputValidator {
    #[rustyline(Validator)]
    validator: LispyValidator,
    #[rustyline(Highlighter)]
    highlighter: LispyHighlighter,
    #[rustyline(Completer)]
    completer: LispyCompleter,
}

fn is_matching(opening: char, closing: char) -> bool {
    matches!((opening, closing), ('(', ')') | ('[', ']') | ('{', '}'))
}

/// Keeps reading lines until every bracket and string is closed.
struct LispyValidator;

impl Validator for LispyValidator {
    fn validate(&self, ctx: &mut ValidationContext) -> rustyline::Result<ValidationResult> {
        let input = ctx.input();
        let mut stack = Vec::new();
        let mut in_string = false;
        let mut in_comment = false;
        let mut escape = false;

        for (i, c) in input.chars().enumerate() {
            if in_comment {
                in_comment = c != '\n';
                continue;
            }
            if in_string {
                if escape {
                    escape = false;
                } else if c == '\\' {
                    escape = true;
                } else if c == '"' {
                    in_string = false;
                }
                continue;
            }

            match c {
                '"' => in_string = true,
                ';' => in_comment = true,
                '(' | '[' | '{' => stack.push(c),
                ')' | ']' | '}' => match stack.pop() {
                    Some(opening) if is_matching(opening, c) => {}
                    _ => {
                        return Ok(ValidationResult::Invalid(Some(format!(
                            "  - Unmatched '{}' at position {}",
                            c, i
                        ))));
                    }
                },
                _ => {}
            }
        }

        if in_string || !stack.is_empty() {
            Ok(ValidationResult::Incomplete)
        } else {
            Ok(ValidationResult::Valid(None))
        }
    }
}

/// Colours strings and the bracket pair next to the cursor.
struct LispyHighlighter;

impl Highlighter for LispyHighlighter {
    fn highlight<'l>(&self, line: &'l str, pos: usize) -> Cow<'l, str> {
        // Opening bracket, its offset in `line` and its offset in `highlighted`
        let mut stack: Vec<(char, usize, usize)> = Vec::new();
        let mut highlighted = String::new();
        let mut in_string = false;
        let mut escape = false;
        let cursor = pos.checked_sub(1);

        for (i, c) in line.char_indices() {
            if in_string {
                if escape {
                    escape = false;
                } else if c == '\\' {
                    escape = true;
                } else if c == '"' {
                    in_string = false;
                }
                highlighted.push_str(&format!("\x1b[32m{}\x1b[0m", c)); // Green for strings
                continue;
            }

            match c {
                '"' => {
                    in_string = true;
                    highlighted.push_str(&format!("\x1b[32m{}\x1b[0m", c));
                }
                '(' | '[' | '{' => {
                    stack.push((c, i, highlighted.len()));
                    highlighted.push(c);
                }
                ')' | ']' | '}' => match stack.pop() {
                    Some((opening, opened_at, at)) if is_matching(opening, c) => {
                        if cursor == Some(i) || cursor == Some(opened_at) {
                            highlighted.push_str(&format!("\x1b[34m{}\x1b[0m", c)); // Blue for the matched pair
                            highlighted.replace_range(at..=at, &format!("\x1b[1;34m{}\x1b[0m", opening));
                        } else {
                            highlighted.push(c);
                        }
                    }
                    Some((opening, _, at)) => {
                        highlighted.push_str(&format!("\x1b[31m{}\x1b[0m", c)); // Red for mismatches
                        highlighted.replace_range(at..=at, &format!("\x1b[1;31m{}\x1b[0m", opening));
                    }
                    None => highlighted.push_str(&format!("\x1b[31m{}\x1b[0m", c)),
                },
                _ => highlighted.push(c),
            }
        }

        Cow::Owned(highlighted)
    }

    fn highlight_char(&self, _line: &str, _pos: usize, _kind: CmdKind) -> bool {
        true
    }
}

fn editor_mode(mode: EditMode) -> rustyline::EditMode {
    match mode {
        EditMode::Vi => rustyline::EditMode::Vi,
        EditMode::Emacs => rustyline::EditMode::Emacs,
    }
}

fn main() -> rustyline::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env().unwrap_or_else(|e| {
        eprintln!("Configuration error: {}, using defaults", e);
        Config::default()
    });

    // The interpreter is single-threaded, so the whole session lives on one thread.
    with_eval_stack(move || run_repl(&config))?
}

fn run_repl(config: &Config) -> rustyline::Result<()> {
    println!("Lispy REPL v{}", env!("CARGO_PKG_VERSION"));
    println!("Type 'exit' or press Ctrl-D to quit.");

    let interpreter = Interpreter::new(config);
    let h = InputValidator {
        highlighter: LispyHighlighter,
        validator: LispyValidator,
        completer: LispyCompleter::new(interpreter.global_env().clone()),
    };
    let editor_config = rustyline::config::Config::builder()
        .edit_mode(editor_mode(config.edit_mode))
        .build();
    let mut rl = Editor::with_config(editor_config)?;
    rl.set_helper(Some(h));
    rl.bind_sequence(
        KeyEvent(KeyCode::Char('s'), Modifiers::CTRL),
        EventHandler::Simple(Cmd::Newline),
    );
    if rl.load_history(&config.history_file).is_err() {
        println!("No previous history.");
    }

    loop {
        match rl.readline("lispy> ") {
            Ok(line) => {
                rl.add_history_entry(line.as_str())?;
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }
                if input.eq_ignore_ascii_case("exit") {
                    break;
                }

                match interpreter.eval_str(input) {
                    Ok(result) => println!("{}", result),
                    Err(e) => {
                        if e.pretty_print(SOURCE_NAME, input).is_err() {
                            eprintln!("Error: {}", e);
                        }
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                // Ctrl-C
                println!("Interrupted. Type 'exit' or Ctrl-D to quit.");
            }
            Err(ReadlineError::Eof) => {
                // Ctrl-D
                println!("\nExiting.");
                break;
            }
            Err(err) => {
                eprintln!("Readline Error: {:?}", err);
                break;
            }
        }
    }
    rl.save_history(&config.history_file)
}
