//! Interactive REPL (Read-Eval-Print Loop) for inkling.

use std::io::{self, BufRead, Write};

use super::error::InterpreterResult;
use super::interpreter::Interpreter;

/// REPL configuration.
#[derive(Debug, Clone)]
pub struct ReplConfig {
    /// Prompt string.
    pub prompt: String,
    /// Show timing information.
    pub timing: bool,
}

impl Default for ReplConfig {
    fn default() -> Self {
        Self {
            prompt: "inkling> ".into(),
            timing: false,
        }
    }
}

/// What the loop should do after a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Continue,
    Exit,
}

/// The interactive REPL.
pub struct Repl {
    interp: Interpreter,
    config: ReplConfig,
    history: Vec<String>,
}

impl Repl {
    /// Create a new REPL around an interpreter.
    pub fn new(interp: Interpreter) -> Self {
        Self::with_config(interp, ReplConfig::default())
    }

    /// Create a REPL with custom configuration.
    pub fn with_config(interp: Interpreter, config: ReplConfig) -> Self {
        Self {
            interp,
            config,
            history: Vec::new(),
        }
    }

    pub fn interpreter(&mut self) -> &mut Interpreter {
        &mut self.interp
    }

    /// Run the REPL on stdin/stdout.
    pub fn run(&mut self) -> InterpreterResult<()> {
        let stdin = io::stdin();
        let stdout = io::stdout();
        self.run_with(stdin.lock(), stdout.lock())
    }

    /// Run the REPL over arbitrary streams. Fragments may span several
    /// lines; one is complete when its braces balance and it ends with
    /// `;` or `}`.
    pub fn run_with<R: BufRead, W: Write>(&mut self, mut input: R, mut out: W) -> InterpreterResult<()> {
        self.print_banner(&mut out)?;
        let mut pending = String::new();

        loop {
            let prompt = if pending.is_empty() { self.config.prompt.as_str() } else { "     -> " };
            write!(out, "{}", prompt)?;
            out.flush()?;

            let mut line = String::new();
            if input.read_line(&mut line)? == 0 {
                writeln!(out)?;
                break;
            }
            let line = line.trim_end();

            if pending.is_empty() {
                if line.trim().is_empty() {
                    continue;
                }
                if is_command(line) {
                    self.history.push(line.trim().to_string());
                    if self.handle_command(line.trim(), &mut out)? == Step::Exit {
                        break;
                    }
                    continue;
                }
            } else {
                pending.push('\n');
            }
            pending.push_str(line);

            if !is_complete(&pending) {
                continue;
            }
            let fragment = std::mem::take(&mut pending);
            self.history.push(fragment.clone());
            self.eval(&fragment, &mut out)?;
        }

        Ok(())
    }

    fn eval<W: Write>(&mut self, fragment: &str, out: &mut W) -> io::Result<()> {
        let start = std::time::Instant::now();
        let result = self.interp.process(fragment);
        write!(out, "{}", self.interp.take_output())?;
        match result {
            Ok(_) => {
                if self.config.timing {
                    writeln!(out, "Time: {:.3}ms", start.elapsed().as_secs_f64() * 1000.0)?;
                }
            }
            Err(e) => {
                writeln!(out, "Error: {}", e)?;
                for diag in e.diagnostics().iter().skip(1) {
                    writeln!(out, "  {}", diag)?;
                }
            }
        }
        Ok(())
    }

    fn print_banner<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "inkling {}", env!("CARGO_PKG_VERSION"))?;
        writeln!(out, "Type .help for commands, or enter declarations and expressions.")?;
        writeln!(out)
    }

    fn handle_command<W: Write>(&mut self, cmd: &str, out: &mut W) -> io::Result<Step> {
        let cmd = cmd.trim_start_matches(&['.', '\\'][..]);
        let parts: Vec<&str> = cmd.split_whitespace().collect();
        let command = parts.first().map(|s| s.to_lowercase());

        match command.as_deref() {
            Some("help") | Some("h") | Some("?") => {
                self.print_help(out)?;
            }
            Some("quit") | Some("exit") | Some("q") => {
                return Ok(Step::Exit);
            }
            Some("undo") => {
                let count = match parts.get(1).map(|n| n.parse::<usize>()) {
                    None => 1,
                    Some(Ok(n)) => n,
                    Some(Err(_)) => {
                        writeln!(out, "Usage: .undo [count]")?;
                        return Ok(Step::Continue);
                    }
                };
                match self.interp.unload(count) {
                    Ok(n) => writeln!(out, "Unloaded {} fragment(s)", n)?,
                    Err(e) => writeln!(out, "Error: {}", e)?,
                }
            }
            Some("history") => {
                writeln!(out, "Fragment History:")?;
                for (i, entry) in self.history.iter().enumerate() {
                    writeln!(out, "  {}: {}", i + 1, entry)?;
                }
            }
            Some("transactions") => match self.interp.parser().summaries() {
                Ok(summaries) => {
                    for summary in summaries {
                        writeln!(
                            out,
                            "  {} {} groups={} nested={}",
                            summary.id,
                            summary.state,
                            summary.groups.len(),
                            summary.nested.len()
                        )?;
                    }
                }
                Err(e) => writeln!(out, "Error: {}", e)?,
            },
            Some("timing") => {
                self.config.timing = !self.config.timing;
                writeln!(out, "Timing: {}", if self.config.timing { "on" } else { "off" })?;
            }
            Some(cmd) => {
                writeln!(out, "Unknown command: .{}", cmd)?;
                writeln!(out, "Type .help for available commands")?;
            }
            None => {}
        }

        Ok(Step::Continue)
    }

    fn print_help<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "Commands:")?;
        writeln!(out, "  .help, .h, .?           Show this help message")?;
        writeln!(out, "  .quit, .exit, .q        Exit the REPL")?;
        writeln!(out, "  .undo [n]               Unload the last n fragments (default 1)")?;
        writeln!(out, "  .transactions           List committed transactions")?;
        writeln!(out, "  .history                Show fragment history")?;
        writeln!(out, "  .timing                 Toggle timing display")?;
        writeln!(out)?;
        writeln!(out, "Fragments:")?;
        writeln!(out, "  int x = 1;              Declare a global")?;
        writeln!(out, "  int f(int a) {{ ... }}    Define a function")?;
        writeln!(out, "  x * 2;                  Evaluate and print a value")?;
        writeln!(out)
    }
}

fn is_command(input: &str) -> bool {
    let input = input.trim_start();
    input.starts_with('.') || input.starts_with('\\')
}

fn is_complete(fragment: &str) -> bool {
    let depth = fragment.chars().fold(0i32, |depth, c| match c {
        '{' => depth + 1,
        '}' => depth - 1,
        _ => depth,
    });
    let trimmed = fragment.trim_end();
    depth <= 0 && (trimmed.ends_with(';') || trimmed.ends_with('}'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(input: &str) -> String {
        let mut repl = Repl::new(Interpreter::new());
        let mut out = Vec::new();
        repl.run_with(input.as_bytes(), &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_is_complete() {
        assert!(is_complete("int x = 1;"));
        assert!(!is_complete("int f() {"));
        assert!(!is_complete("int f() { return 1;"));
        assert!(is_complete("int f() {\n return 1;\n}"));
        assert!(!is_complete("1 + 2"));
    }

    #[test]
    fn test_evaluates_and_prints_values() {
        let out = session("int x = 2;\nx * 21;\n");
        assert!(out.contains("(int) 42"), "{}", out);
    }

    #[test]
    fn test_multiline_function() {
        let out = session("int f() {\n  return 5;\n}\nint v = f();\nv;\n");
        assert!(out.contains("(int) 5"), "{}", out);
    }

    #[test]
    fn test_undo_and_errors() {
        let out = session("int y = 3;\n.undo\ny;\n.undo 5\n.quit\nnever;\n");
        assert!(out.contains("Unloaded 1 fragment(s)"), "{}", out);
        assert!(out.contains("Error: fragment rejected during analysis"), "{}", out);
        assert!(out.contains("Error: transaction error"), "{}", out);
        assert!(!out.contains("never"), "{}", out);
    }

    #[test]
    fn test_unknown_command() {
        let out = session(".frobnicate\n");
        assert!(out.contains("Unknown command: .frobnicate"));
    }
}
