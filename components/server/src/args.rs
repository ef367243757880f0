//! Command-line interpretation.
//!
//! Arguments are grouped first: before a user file or eval string is seen,
//! tokens starting with `-` are runtime flags and the first other token is
//! the user file; everything after that belongs to the script. The runtime
//! flags are then scanned in order. `-v` and `-uv` end the scan, so a flag
//! after them is never looked at; `-h` and the other known flags accumulate;
//! an unknown flag forces REPL mode and is reported once the scan is over,
//! unless a version or help dump was requested.

use crate::error::UsageError;
use std::path::Path;

/// Usage text printed for `-h`/`--help`.
pub const HELP: &str = "Usage: corten-node [options] [ script.js ] [arguments]

Options:
  -v, --version        print version
  -uv, --uv-version    print loop version
  -i, --interactive    force repl
  -e, --eval script    evaluate script
  -p, --print          evaluate script and print result
  --no-deprecation     silence deprecation warnings
  --trace-deprecation  trace deprecation warnings
";

/// What the server runs once arguments are processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Run a user script file
    File,
    /// Evaluate the eval string
    Eval,
    /// Interactive read-eval-print loop
    #[default]
    Repl,
}

/// Boolean switches set by the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags {
    /// `--no-deprecation`
    pub no_deprecation: bool,
    /// `--trace-deprecation`
    pub trace_deprecation: bool,
    /// `--throw-deprecation`
    pub throw_deprecation: bool,
    /// `-i`, an unknown flag, or no arguments at all
    pub force_repl: bool,
    /// Any of `-p`, `--print`, `-pe`
    pub print_eval: bool,
}

/// Everything the command line decides about a run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerState {
    /// Selected run mode
    pub run_mode: RunMode,
    /// Command-line switches
    pub flags: Flags,
    /// Flags meant for the runtime, in command-line order
    pub runtime_args: Vec<String>,
    /// Arguments after the user file or eval string
    pub user_args: Vec<String>,
    /// The user script, `./`-prefixed when relative
    pub user_file: Option<String>,
    /// Source given to `-e`/`-p`
    pub eval_string: Option<String>,
}

/// A request to print something and exit without running scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dump {
    /// `-v`, `--version`
    Version,
    /// `-uv`, `--uv-version`
    LoopVersion,
    /// `-h`, `--help`
    Help,
}

/// Outcome of the runtime-flag scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Start the loop in the resolved mode
    Run(RunMode),
    /// Print and exit
    Dump(Dump),
}

/// Result of [`parse_args`].
///
/// The state is returned even when the scan fails, so the flags recorded up
/// to the failure (notably `force_repl`) remain observable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedArgs {
    /// Grouped arguments and flags
    pub state: ServerState,
    /// What to do next
    pub directive: Result<Directive, UsageError>,
}

fn is_eval_arg(arg: &str) -> bool {
    matches!(arg, "--eval" | "-e" | "--print" | "-pe" | "-p")
}

/// Interprets a raw argument vector (without the program name).
pub fn parse_args<S: AsRef<str>>(args: &[S]) -> ParsedArgs {
    let mut state = ServerState::default();
    if args.is_empty() {
        state.flags.force_repl = true;
        return ParsedArgs {
            state,
            directive: Ok(Directive::Run(RunMode::Repl)),
        };
    }

    if let Err(e) = group(args, &mut state) {
        return ParsedArgs {
            state,
            directive: Err(e),
        };
    }

    let directive = scan_runtime_flags(&mut state).map(|directive| match directive {
        Some(dump) => Directive::Dump(dump),
        None => Directive::Run(resolve_mode(&mut state)),
    });
    ParsedArgs { state, directive }
}

fn group<S: AsRef<str>>(args: &[S], state: &mut ServerState) -> Result<(), UsageError> {
    let mut i = 0;
    while i < args.len() {
        let arg = args[i].as_ref();
        if is_eval_arg(arg) {
            let is_eval = arg.contains('e');
            let is_print = arg.contains('p');

            if is_eval && i + 1 >= args.len() {
                return Err(UsageError::MissingArgument(arg.to_string()));
            }
            state.flags.print_eval |= is_print;

            if is_eval {
                i += 1;
                state.eval_string = Some(args[i].as_ref().to_string());
            } else if let Some(next) = args.get(i + 1).map(AsRef::as_ref) {
                // The expression for -p/--print is optional: a following
                // switch is not consumed, and "\-" escapes a leading dash.
                if !next.starts_with('-') {
                    i += 1;
                    let expression = next.strip_prefix('\\').filter(|rest| rest.starts_with('-'));
                    state.eval_string = Some(expression.unwrap_or(next).to_string());
                }
            }
        } else if state.user_file.is_none() && state.eval_string.is_none() {
            if arg.starts_with('-') {
                state.runtime_args.push(arg.to_string());
            } else {
                state.user_file = Some(arg.to_string());
            }
        } else {
            state.user_args.push(arg.to_string());
        }
        i += 1;
    }

    if let Some(file) = state.user_file.take() {
        state.user_file = Some(dot_prefixed(&file));
    }
    Ok(())
}

fn dot_prefixed(file: &str) -> String {
    let path = Path::new(file);
    if path.is_absolute() {
        file.to_string()
    } else {
        Path::new(".").join(path).to_string_lossy().into_owned()
    }
}

fn scan_runtime_flags(state: &mut ServerState) -> Result<Option<Dump>, UsageError> {
    let mut help = false;
    let mut dump = None;
    let mut unknown = None;
    for arg in &state.runtime_args {
        match arg.as_str() {
            "-h" | "--help" => help = true,
            "-v" | "--version" => {
                dump = Some(Dump::Version);
                break;
            }
            "-uv" | "--uv-version" => {
                dump = Some(Dump::LoopVersion);
                break;
            }
            "--no-deprecation" => state.flags.no_deprecation = true,
            "--trace-deprecation" => state.flags.trace_deprecation = true,
            "--throw-deprecation" => state.flags.throw_deprecation = true,
            "-i" | "--interactive" => state.flags.force_repl = true,
            other => {
                unknown = Some(other.to_string());
                state.flags.force_repl = true;
            }
        }
    }

    if dump.is_none() && help {
        dump = Some(Dump::Help);
    }
    match (dump, unknown) {
        (Some(dump), _) => Ok(Some(dump)),
        (None, Some(flag)) => Err(UsageError::UnrecognizedFlag(flag)),
        (None, None) => Ok(None),
    }
}

fn resolve_mode(state: &mut ServerState) -> RunMode {
    state.run_mode = if state.flags.force_repl {
        RunMode::Repl
    } else if state.eval_string.is_some() {
        RunMode::Eval
    } else if state.user_file.is_some() {
        RunMode::File
    } else {
        RunMode::Repl
    };
    state.run_mode
}
