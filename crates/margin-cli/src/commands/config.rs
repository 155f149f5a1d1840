//! Config command handlers

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use margin_core::{Config, MAX_CONFIDENCE};

use crate::output::{Output, OutputFormat};

fn or_unset<T: ToString>(value: Option<T>) -> String {
    value
        .map(|v| v.to_string())
        .unwrap_or_else(|| "(not set)".to_string())
}

/// Show current configuration
pub fn show(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            output.json(&serde_json::json!({
                "data_dir": config.data_dir,
                "library_path": config.library_path(),
                "auto_apply_threshold": config.auto_apply_threshold,
                "destination": config.destination.to_string(),
                "collect_news_clippings": config.collect_news_clippings,
                "news_clippings_target": config.news_clippings_target,
                "reader_exports": config.reader_exports,
                "log_file": config.log_file
            }))?;
        }
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            let effective_path = config_path
                .cloned()
                .unwrap_or_else(Config::config_file_path);
            println!("Configuration:");
            println!("  data_dir:               {}", config.data_dir.display());
            println!("  library_path:           {}", config.library_path().display());
            println!("  auto_apply_threshold:   {}", config.auto_apply_threshold);
            println!("  destination:            {}", config.destination);
            println!("  collect_news_clippings: {}", config.collect_news_clippings);
            println!(
                "  news_clippings_target:  {}",
                or_unset(config.news_clippings_target)
            );
            if config.reader_exports.is_empty() {
                println!("  reader_exports:         (none)");
            }
            for path in &config.reader_exports {
                println!("  reader_exports:         {}", path.display());
            }
            println!(
                "  log_file:               {}",
                or_unset(config.log_file.as_ref().map(|p| p.display()))
            );
            println!();
            println!("Config file: {}", effective_path.display());
        }
    }

    Ok(())
}

fn optional_path(value: &str) -> Option<PathBuf> {
    if value.is_empty() || value == "none" {
        None
    } else {
        Some(value.into())
    }
}

/// Apply one `key = value` change to a configuration
fn apply(config: &mut Config, key: &str, value: &str) -> Result<()> {
    match key {
        "data_dir" => {
            config.data_dir = value.into();
        }
        "library_path" => {
            config.library_path = optional_path(value);
        }
        "auto_apply_threshold" => {
            let threshold: u8 = value
                .parse()
                .context("Invalid value for auto_apply_threshold. Use a number from 0 to 5.")?;
            if threshold > MAX_CONFIDENCE {
                bail!("auto_apply_threshold must be between 0 and {}", MAX_CONFIDENCE);
            }
            config.auto_apply_threshold = threshold;
        }
        "destination" => {
            config.destination = value.parse()?;
        }
        "collect_news_clippings" => {
            config.collect_news_clippings = value
                .parse()
                .context("Invalid value for collect_news_clippings. Use 'true' or 'false'.")?;
        }
        "news_clippings_target" => {
            config.news_clippings_target = if value.is_empty() || value == "none" {
                None
            } else {
                Some(
                    value
                        .parse()
                        .context("Invalid value for news_clippings_target. Use a library id.")?,
                )
            };
        }
        "reader_exports" => {
            // Adds one file; "none" clears the list
            match optional_path(value) {
                Some(path) if !config.reader_exports.contains(&path) => {
                    config.reader_exports.push(path)
                }
                Some(_) => {}
                None => config.reader_exports.clear(),
            }
        }
        "log_file" => {
            config.log_file = optional_path(value);
        }
        _ => {
            bail!(
                "Unknown configuration key: '{}'\n\
                 Valid keys: data_dir, library_path, auto_apply_threshold, destination, \
                 collect_news_clippings, news_clippings_target, reader_exports, log_file",
                key
            );
        }
    }
    Ok(())
}

/// Set a configuration value
pub fn set(
    key: String,
    value: String,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    let mut config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    apply(&mut config, &key, &value)?;

    // Save to the CLI-specified path or default
    let save_path = config_path
        .cloned()
        .unwrap_or_else(Config::config_file_path);
    config
        .save_to_path(&save_path)
        .context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use margin_core::Destination;

    #[test]
    fn test_apply_values() {
        let mut config = Config::default();

        apply(&mut config, "auto_apply_threshold", "4").unwrap();
        apply(&mut config, "destination", "structured").unwrap();
        apply(&mut config, "collect_news_clippings", "true").unwrap();
        apply(&mut config, "news_clippings_target", "12").unwrap();

        assert_eq!(config.auto_apply_threshold, 4);
        assert_eq!(config.destination, Destination::Structured);
        assert_eq!(config.news_clippings(), Some(12));
    }

    #[test]
    fn test_apply_rejects_bad_values() {
        let mut config = Config::default();
        assert!(apply(&mut config, "auto_apply_threshold", "6").is_err());
        assert!(apply(&mut config, "auto_apply_threshold", "high").is_err());
        assert!(apply(&mut config, "destination", "margins").is_err());
        assert!(apply(&mut config, "colour", "red").is_err());
        assert_eq!(config.auto_apply_threshold, 3);
    }

    #[test]
    fn test_reader_exports_accumulate() {
        let mut config = Config::default();
        apply(&mut config, "reader_exports", "/a.json").unwrap();
        apply(&mut config, "reader_exports", "/b.json").unwrap();
        apply(&mut config, "reader_exports", "/a.json").unwrap();
        assert_eq!(config.reader_exports.len(), 2);

        apply(&mut config, "reader_exports", "none").unwrap();
        assert!(config.reader_exports.is_empty());
    }

    #[test]
    fn test_set_writes_config_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            format!("data_dir = {:?}\n", dir.path().join("data").display().to_string()),
        )
        .unwrap();

        set(
            "destination".into(),
            "structured".into(),
            Some(&path),
            &Output::new(OutputFormat::Quiet),
        )
        .unwrap();

        let saved = std::fs::read_to_string(&path).unwrap();
        assert!(saved.contains("destination = \"structured\""));
    }
}
