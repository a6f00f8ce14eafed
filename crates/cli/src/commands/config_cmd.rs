//! `refdesk config` — Configuration management commands.

use refdesk_config::{AppConfig, GuardrailMode};

pub async fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating configuration...");

    match AppConfig::load() {
        Ok(config) => {
            println!("   ✅ Config parsed successfully");

            let warnings = warnings(&config);
            if warnings.is_empty() {
                println!("   ✅ All checks passed");
            } else {
                println!();
                for w in &warnings {
                    println!("   ⚠️  {w}");
                }
            }

            println!();
            println!("   Model:          {}", config.provider.model);
            println!("   Endpoint:       {}", config.provider.api_url);
            println!(
                "   Tool server:    {} {}",
                config.tool_server.command,
                config.tool_server.args.join(" ")
            );
            println!("   Guardrail:      {:?}", config.guardrail.mode);
            println!("   Max iterations: {}", config.agent.max_iterations);
        }
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

/// Problems that do not stop the config from loading.
fn warnings(config: &AppConfig) -> Vec<&'static str> {
    let mut warnings = Vec::new();

    if config.needs_api_key() {
        warnings.push("No API key set (set OPENAI_API_KEY or REFDESK_API_KEY)");
    }

    if config.guardrail.mode == GuardrailMode::Model
        && config.guardrail.timeout_secs > config.provider.request_timeout_secs
    {
        warnings.push("guardrail.timeout_secs exceeds provider.request_timeout_secs");
    }

    if let Some(dir) = &config.tool_server.working_dir
        && !dir.is_dir()
    {
        warnings.push("tool_server.working_dir does not exist");
    }

    warnings
}

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    if config.provider.api_key.is_some() {
        config.provider.api_key = Some("[REDACTED]".into());
    }
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = AppConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
    Ok(())
}

pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");

    if config_path.exists() {
        println!("⚠️  Config already exists at: {}", config_path.display());
        println!("   Edit it manually or delete it and re-run `refdesk config init`.");
        return Ok(());
    }

    std::fs::create_dir_all(&config_dir)?;
    std::fs::write(&config_path, AppConfig::default_toml())?;
    println!("✅ Created config.toml at: {}", config_path.display());
    println!("\n📝 Next steps:");
    println!("   1. Set OPENAI_API_KEY or add api_key under [provider]");
    println!("   2. Point [tool_server] at your reference-data server");
    println!("   3. Run: refdesk chat\n");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_is_valid() {
        let path = AppConfig::config_dir().join("config.toml");
        assert!(path.to_str().unwrap().contains("config.toml"));
    }

    #[test]
    fn default_config_warns_about_missing_key() {
        let w = warnings(&AppConfig::default());
        assert_eq!(w, vec!["No API key set (set OPENAI_API_KEY or REFDESK_API_KEY)"]);
    }

    #[test]
    fn missing_working_dir_warns() {
        let mut config = AppConfig::default();
        config.provider.api_key = Some("sk".into());
        config.tool_server.working_dir = Some("/definitely/not/here/refdesk".into());
        assert_eq!(warnings(&config), vec!["tool_server.working_dir does not exist"]);
    }
}
