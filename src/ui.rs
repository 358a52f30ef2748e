use colored::{ColoredString, Colorize};
use reconcile::Status;

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Status rendered as a fixed-width colored label
pub fn status(status: Status) -> ColoredString {
    let label = format!("{:<8}", status.to_string());
    match status {
        Status::Applied => label.green(),
        Status::Todo => label.yellow(),
        Status::Running => label.blue(),
        Status::Failed => label.red().bold(),
        Status::Unknown | Status::None => label.dimmed(),
    }
}

/// Indent every line of a multi-line block
pub fn indented(text: &str, prefix: &str) -> String {
    text.lines()
        .map(|line| format!("{prefix}{line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indented() {
        assert_eq!(indented("a\nb", "    "), "    a\n    b");
        assert_eq!(indented("", "  "), "");
    }

    #[test]
    fn test_status_label_is_padded() {
        colored::control::set_override(false);
        assert_eq!(status(Status::Todo).to_string(), "todo    ");
        assert_eq!(status(Status::Applied).to_string(), "applied ");
    }
}
