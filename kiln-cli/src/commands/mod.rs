//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod locate;
mod pipeline;
mod store;

use anyhow::{Context, Result};
use clap::Subcommand;
use kiln_core::domain::pipeline::PipelineKind;
use kiln_core::domain::properties::BuildProperties;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// List both pipeline templates and their steps
    Pipelines,
    /// Show the command each step would run for a property set
    Render {
        /// Pipeline template (tarball or package)
        #[arg(long)]
        pipeline: PipelineKind,

        /// Properties as key=value pairs (e.g., buildstyle=rpm distro=el7)
        #[arg(short, long, value_parser = parse_key_val)]
        param: Vec<(String, String)>,

        /// Print the rendered steps as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print where a run's tarball and packages are stored
    Locate {
        /// Properties as key=value pairs (e.g., change=123 patchset=4)
        #[arg(short, long, value_parser = parse_key_val)]
        param: Vec<(String, String)>,
    },
    /// Check that the artifact store is up
    Health,
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Pipelines => pipeline::list_pipelines(config),
        Commands::Render {
            pipeline,
            param,
            json,
        } => pipeline::render_pipeline(config, pipeline, param, json),
        Commands::Locate { param } => locate::locate(config, param),
        Commands::Health => store::health(config).await,
    }
}

/// Parse a single key=value pair
fn parse_key_val(s: &str) -> Result<(String, String)> {
    let pos = s
        .find('=')
        .ok_or_else(|| anyhow::anyhow!("invalid KEY=value: no `=` found in `{}`", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

/// Builds run properties the way a worker would before the first step
fn run_properties(config: &Config, params: Vec<(String, String)>) -> Result<BuildProperties> {
    let mut props = BuildProperties::from_pairs(params).context("Invalid property")?;
    props.set_default("bburl", &config.script_base_url)?;
    props.set_default("bbmaster", &config.store_url)?;
    Ok(props)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            store_url: "http://build.example.org".to_string(),
            script_base_url: "http://scripts/".to_string(),
            repo_url: "https://git.example.org/lustre".to_string(),
        }
    }

    #[test]
    fn test_parse_key_val() {
        assert_eq!(
            parse_key_val("distro=el7").unwrap(),
            ("distro".to_string(), "el7".to_string())
        );
        assert_eq!(
            parse_key_val("spltag=a=b").unwrap(),
            ("spltag".to_string(), "a=b".to_string())
        );
        assert_eq!(
            parse_key_val("zfstag=").unwrap(),
            ("zfstag".to_string(), String::new())
        );
        assert!(parse_key_val("distro").is_err());
    }

    #[test]
    fn test_run_properties_fill_worker_defaults() {
        let props = run_properties(
            &config(),
            vec![("bbmaster".to_string(), "mirror.example.org".to_string())],
        )
        .unwrap();
        assert_eq!(props.bburl.as_deref(), Some("http://scripts/"));
        assert_eq!(props.bbmaster.as_deref(), Some("mirror.example.org"));
    }

    #[test]
    fn test_run_properties_reject_unknown_style() {
        let params = vec![("buildstyle".to_string(), "msi".to_string())];
        assert!(run_properties(&config(), params).is_err());
    }
}
