//! `vellum config`.

use std::path::Path;

use anyhow::Result;
use vellum_config::ResolvedConfig;
use vellum_config::loader::user_config_path;

use super::OutputFormat;
use crate::theme::Theme;

/// Render the resolved configuration with its sources as TOML comments.
pub(crate) fn render_toml(resolved: &ResolvedConfig) -> Result<String> {
    let mut out = String::new();
    if resolved.loaded_files.is_empty() {
        out.push_str("# sources: embedded defaults\n");
    }
    for file in &resolved.loaded_files {
        out.push_str(&format!("# file: {file}\n"));
    }
    for path in &resolved.env_overrides {
        out.push_str(&format!("# from environment: {path}\n"));
    }
    out.push('\n');
    out.push_str(&resolved.to_toml()?);
    Ok(out)
}

/// Print the resolved configuration.
pub(crate) fn show_config(resolved: &ResolvedConfig, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(resolved)?),
        OutputFormat::Pretty => print!("{}", render_toml(resolved)?),
    }
    Ok(())
}

/// Print where configuration is read from.
pub(crate) fn show_paths(explicit: Option<&Path>) {
    println!("{}", Theme::header("Configuration sources"));
    println!("  {}", Theme::dimmed("embedded defaults"));
    match (explicit, user_config_path()) {
        (Some(path), _) => println!("  {} (--config)", path.display()),
        (None, Some(path)) if path.exists() => println!("  {}", path.display()),
        (None, Some(path)) => println!(
            "  {}",
            Theme::dimmed(&format!("{} (not present)", path.display()))
        ),
        (None, None) => println!(
            "{}",
            Theme::warning("No user config directory on this platform")
        ),
    }
    println!("  {}", Theme::dimmed("VELLUM_* environment variables"));
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use vellum_config::loader::load_with_env;

    use super::*;

    #[test]
    fn test_render_marks_sources() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("vellum.toml");
        std::fs::write(&path, "[sandbox]\nkind = \"worker\"\n").unwrap();
        let env = HashMap::from([("VELLUM_MAX_PORTS".to_string(), "8".to_string())]);

        let resolved = load_with_env(Some(&path), &env).unwrap();
        let rendered = render_toml(&resolved).unwrap();

        assert!(rendered.contains(&format!("# file: {}", path.display())));
        assert!(rendered.contains("# from environment: bridge.max_ports"));
        assert!(rendered.contains("kind = \"worker\""));
        assert!(rendered.contains("max_ports = 8"));
    }
}
