//! `rago call`: Invoke one federated tool.

use super::Runtime;
use rago_config::AppConfig;
use serde_json::Value;

pub async fn run(config: &AppConfig, tool: &str, args: &str) -> Result<(), Box<dyn std::error::Error>> {
    let args: Value = serde_json::from_str(args).map_err(|e| format!("Arguments are not valid JSON: {e}"))?;
    let runtime = Runtime::build(config)?;

    let result = runtime.registry.call(tool, args).await;
    runtime.servers.stop_all().await;

    let output = result.map_err(|e| format!("{} ({})", e, e.kind()))?;
    match output.data {
        Some(data) => println!("{}", serde_json::to_string_pretty(&data)?),
        None => println!("{}", output.text),
    }
    Ok(())
}
