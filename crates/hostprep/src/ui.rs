//! UI helpers for the hostprep CLI.
//!
//! Provides consistent formatting for console output during provisioning.

use colored::Colorize;

use crate::step::StepOutcome;

/// Print the hostprep banner.
pub fn print_banner() {
    println!();
    println!("{}", "  hostprep".cyan().bold());
    println!("  {}", "Resumable development host provisioning".bright_black());
    println!();
}

/// Print a section header.
pub fn print_section(title: &str) {
    println!();
    println!("{}", "═".repeat(70).bright_black());
    println!("{}", title.cyan().bold());
    println!("{}", "═".repeat(70).bright_black());
    println!();
}

/// Print a progress step with step number.
pub fn print_progress_step(current: usize, total: usize, message: &str) {
    println!(
        "{} {} {}",
        format!("[{current}/{total}]").bright_black(),
        "▶".cyan(),
        message.bold()
    );
}

/// Print a success message.
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message.green());
}

/// Print a warning message.
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message.yellow());
}

/// Print an error message to the diagnostic stream.
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message.red());
}

/// Print an info message.
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Print how a step ended, under its progress line.
pub fn print_step_outcome(label: &str, outcome: &StepOutcome) {
    println!("  {}", step_outcome_line(label, outcome));
}

fn step_outcome_line(label: &str, outcome: &StepOutcome) -> String {
    match outcome {
        StepOutcome::Success => format!("{} {}", "✓".green(), label.green()),
        StepOutcome::Skipped => format!(
            "{} {} {}",
            "✓".green(),
            label,
            "(already satisfied)".bright_black()
        ),
        StepOutcome::Failed(reason) => format!("{} {} - {}", "✗".red(), label, reason.red()),
    }
}

/// Print a key-value pair.
pub fn print_kv(key: &str, value: &str) {
    println!("  {} {}", format!("{key}:").bright_black(), value.green());
}

/// Print a plan entry with a progress marker.
pub fn print_plan_entry(index: usize, name: &str, detail: &str, marker: PlanMarker) {
    let symbol = match marker {
        PlanMarker::Done => "✓".green(),
        PlanMarker::Next => "→".cyan(),
        PlanMarker::Pending => "·".bright_black(),
    };
    println!(
        "  {symbol} {} {} {}",
        format!("{:>2}.", index + 1).bright_black(),
        name.bold(),
        detail.bright_black()
    );
}

/// Progress marker for [`print_plan_entry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanMarker {
    Done,
    Next,
    Pending,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_outcome_line_names_outcome() {
        colored::control::set_override(false);

        assert_eq!(
            step_outcome_line("Install Git", &StepOutcome::Success),
            "✓ Install Git"
        );
        assert_eq!(
            step_outcome_line("Install Git", &StepOutcome::Skipped),
            "✓ Install Git (already satisfied)"
        );
        assert_eq!(
            step_outcome_line("Install Git", &StepOutcome::Failed("exit status 100".into())),
            "✗ Install Git - exit status 100"
        );
    }
}
