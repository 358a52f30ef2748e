use anyhow::Result;
use colored::Colorize;
use serde_json::Value;

use crate::Context;
use crate::journal;
use crate::ui;

pub fn run(ctx: &Context, lines: usize) -> Result<()> {
    let entries = journal::tail(&ctx.config.journal_path, lines)?;
    if entries.is_empty() {
        ui::dim("Journal is empty");
    }
    for entry in &entries {
        println!("{}", format_entry(entry));
    }
    Ok(())
}

fn format_entry(entry: &Value) -> String {
    let field = |key: &str| entry.get(key).and_then(Value::as_str).unwrap_or_default();
    let mut line = format!("{} {}", field("ts").dimmed(), field("msg"));
    if !field("grp").is_empty() {
        line = format!("{line} {}", format!("[{}]", field("grp")).dimmed());
    }
    match field("st") {
        "failed" => line.red().to_string(),
        _ => line,
    }
}
