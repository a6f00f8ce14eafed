//! `refdesk tools` — connect to the tool server and list what it offers.

use super::render::OutputMode;
use super::runtime::{load_config, tool_client};

pub async fn run(mode: OutputMode) -> Result<bool, Box<dyn std::error::Error>> {
    let config = load_config()?;
    let client = tool_client(&config);

    let count = client
        .connect()
        .await
        .map_err(|e| format!("Could not reach the tool server: {e}"))?;
    let tools = client.tools().await;
    client.shutdown().await;

    match mode {
        OutputMode::Json => println!("{}", serde_json::to_string_pretty(&tools)?),
        OutputMode::Human => {
            println!("🧰 {count} tool(s) available\n");
            for tool in &tools {
                println!("  {}", tool.name);
                println!("      {}", tool.description);
                if let Some(props) = tool.parameters.get("properties").and_then(|p| p.as_object()) {
                    let names: Vec<&str> = props.keys().map(String::as_str).collect();
                    println!("      args: {}", names.join(", "));
                }
            }
        }
    }
    Ok(true)
}
