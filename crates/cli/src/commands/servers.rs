//! `rago servers`: Catalog and health.

use super::Runtime;
use rago_config::AppConfig;

pub async fn run(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = Runtime::build(config)?;
    let descriptors = runtime.servers.list();
    if descriptors.is_empty() {
        println!("No servers configured. Add them to mcpServers.json in ~/.rago or the working directory.");
        return Ok(());
    }

    runtime.servers.start_all().await;

    println!("Servers");
    println!("=======");
    for health in runtime.servers.health() {
        let kind = descriptors
            .iter()
            .find(|d| d.name == health.name)
            .map(|d| d.transport.kind())
            .unwrap_or("?");
        println!(
            "  {:<20} {:<6} {:<9} tools={:<3} errors={}",
            health.name,
            kind,
            health.state.as_str(),
            health.tool_count,
            health.consecutive_errors
        );
        if let Some(uptime) = health.uptime_ms {
            println!("      up {:.1}s", uptime as f64 / 1000.0);
        }
        if let Some(error) = &health.last_error {
            println!("      last error: {error}");
        }
    }

    runtime.servers.stop_all().await;
    Ok(())
}
