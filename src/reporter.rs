use colored::Colorize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Compile,
    Runtime,
}

/// Where in the source a compile error was noticed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Context {
    /// The offending token's lexeme.
    At(String),
    /// The parser ran out of input.
    AtEnd,
    /// No usable location, e.g. the token itself is a scan error.
    None,
}

#[derive(Debug)]
pub struct Report {
    pub phase: Phase,
    pub msg: String,
    pub line: usize,
    pub context: Context,
}

impl Report {
    pub fn new(phase: Phase, msg: String, line: usize, context: Context) -> Self {
        Self {
            phase,
            msg,
            line,
            context,
        }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.phase {
            Phase::Compile => {
                write!(f, "line {}", self.line)?;
                match &self.context {
                    Context::At(lexeme) => write!(f, ", at '{}'", lexeme)?,
                    Context::AtEnd => write!(f, ", at end")?,
                    Context::None => {}
                }
                write!(f, ": {}.", self.msg)
            }
            Phase::Runtime => write!(f, "{}\n[line {}] in script", self.msg, self.line),
        }
    }
}

pub trait Reporter {
    fn error(&mut self, report: Report);
}

pub struct CliReporter {
    errors_count: usize,
}

impl CliReporter {
    pub fn new() -> Self {
        Self { errors_count: 0 }
    }
}

impl Reporter for CliReporter {
    fn error(&mut self, report: Report) {
        self.errors_count += 1;
        eprintln!("{} {}", "error:".red().bold(), report);
    }
}

/// Collects reports instead of printing them. Test builds only.
#[cfg(test)]
pub struct ErrorsTracker {
    pub reports: Vec<Report>,
}

#[cfg(test)]
impl ErrorsTracker {
    pub fn new() -> Self {
        Self {
            reports: Vec::new(),
        }
    }
}

#[cfg(test)]
impl Reporter for ErrorsTracker {
    fn error(&mut self, report: Report) {
        self.reports.push(report);
    }
}

#[cfg(test)]
mod tests {
    use super::{Context, Phase, Report};

    #[test]
    fn compile_reports_point_at_the_token() {
        let report = Report::new(
            Phase::Compile,
            "expected an expression".to_string(),
            3,
            Context::At(";".to_string()),
        );
        assert_eq!(report.to_string(), "line 3, at ';': expected an expression.");

        let report = Report::new(
            Phase::Compile,
            "expected ';' after expression".to_string(),
            7,
            Context::AtEnd,
        );
        assert_eq!(
            report.to_string(),
            "line 7, at end: expected ';' after expression."
        );
    }

    #[test]
    fn runtime_reports_name_the_line() {
        let report = Report::new(
            Phase::Runtime,
            "operands must be numbers".to_string(),
            2,
            Context::None,
        );
        assert_eq!(
            report.to_string(),
            "operands must be numbers\n[line 2] in script"
        );
    }
}
