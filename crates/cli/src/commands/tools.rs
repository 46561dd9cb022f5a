//! `rago tools`: The federated catalog.

use super::Runtime;
use rago_config::AppConfig;

pub async fn run(config: &AppConfig, all: bool) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = Runtime::build(config)?;
    runtime.servers.start_all().await;

    let mut tools = runtime.registry.list();
    tools.retain(|t| all || (!t.hidden && t.available));
    tools.sort_by(|a, b| a.name.cmp(&b.name));

    if tools.is_empty() {
        println!("No tools available.");
    }
    for tool in &tools {
        let mut flags = Vec::new();
        if tool.hidden {
            flags.push("hidden");
        }
        if !tool.available {
            flags.push("offline");
        }
        if tool.cacheable {
            flags.push("cached");
        }
        let flags = if flags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", flags.join(", "))
        };
        println!("  {:<36} {:<6} {}{flags}", tool.name, tool.provider.as_str(), tool.description);
    }

    runtime.servers.stop_all().await;
    Ok(())
}
