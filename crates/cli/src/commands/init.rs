//! `kbrelay init`: Write the default configuration file.

use kbrelay_config::AppConfig;
use std::path::Path;

pub fn run(config_path: &Path, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    if config_path.exists() && !force {
        println!("  Config already exists: {}", config_path.display());
        println!("  Use --force to overwrite.");
        return Ok(());
    }

    if let Some(dir) = config_path.parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            std::fs::create_dir_all(dir)?;
            println!("✅ Created config directory: {}", dir.display());
        }
    }

    std::fs::write(config_path, AppConfig::default_toml())?;
    println!("✅ Wrote {}", config_path.display());
    println!();
    println!("Next steps:");
    println!("  1. Set backend.base_url, agent_id and agent_alias_id");
    println!("  2. Export KBRELAY_API_KEY if the backend needs a token");
    println!("  3. Run `kbrelay doctor`, then `kbrelay serve`");

    Ok(())
}
