use anyhow::Result;
use colored::Colorize;
use reconcile::Registry;

pub fn run(json: bool) -> Result<()> {
    let catalog = Registry::with_builtin().descriptions();
    if json {
        println!("{}", serde_json::to_string_pretty(&catalog)?);
        return Ok(());
    }
    for kind in catalog {
        println!("{} {}", kind.name.bold(), format!("({})", kind.description).dimmed());
        for param in kind.parameters {
            println!("    {:<12} {:<10} {}", param.id, param.kind.to_string().cyan(), param.title);
        }
    }
    Ok(())
}
