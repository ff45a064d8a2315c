//! # Diagnostic rendering
//!
//! The one sink `giggly_core::diagnostics::Diagnostic` actually gets printed through:
//! a source excerpt with a caret underline under the offending span, colored the way
//! the reference driver colors its own compiler errors.

use colored::Colorize;
use giggly_core::diagnostics::Diagnostic;

pub fn render(diagnostic: &Diagnostic) {
    eprintln!("{} {}", "error:".red().bold(), diagnostic.message());
    eprintln!(
        "  {} {}:{}:{}",
        "-->".blue().bold(),
        diagnostic.file,
        diagnostic.start_line,
        diagnostic.start_col
    );

    if let Some(line) = diagnostic.source.lines().nth(diagnostic.start_line.saturating_sub(1)) {
        let gutter = format!("{}", diagnostic.start_line);
        eprintln!("   {} {}", "|".blue().bold(), "".normal());
        eprintln!(" {} {} {}", gutter.blue().bold(), "|".blue().bold(), line);

        let underline_width = if diagnostic.end_line == diagnostic.start_line && diagnostic.end_col > diagnostic.start_col {
            diagnostic.end_col - diagnostic.start_col
        } else {
            1
        };
        let padding = " ".repeat(diagnostic.start_col.saturating_sub(1));
        let caret = "^".repeat(underline_width.max(1));
        eprintln!("   {} {}{}", "|".blue().bold(), padding, caret.red().bold());
    }

    if let Some(fix) = &diagnostic.suggested_fix {
        eprintln!("   {} {}: {}", "=".blue().bold(), "help".green().bold(), fix);
    }
}
