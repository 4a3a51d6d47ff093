//! The command-line arguments and configuration system for [crate::convert] and the `modernize`
//! binary.

use clap::Parser;
use config::FileFormat::Toml;
use directories::ProjectDirs;
use modernize_core::config::{Config, unknown_field_warning, unknown_top_level_keys};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Command-line arguments for the `modernize` binary.
#[derive(Debug, Parser)]
#[command(about = "Translate a Python codebase into an organized Go module tree")]
pub struct Args {
    /// Set a configuration value; format $NAME=$VALUE.
    #[arg(long, short)]
    pub config: Vec<String>,

    /// Ignore cached translations and convert every file again.
    #[arg(long, short)]
    pub force: bool,

    /// Path to the Python file or directory to translate.
    // Should always be present unless using a flag like --print-config-path
    pub input: Option<PathBuf>,

    /// Prints out the location of the config file.
    #[arg(long)]
    pub print_config_path: bool,

    /// Path to the output directory receiving the Go module tree.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Number of files converted concurrently.
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Domain knowledge passed into every prompt. May be repeated.
    #[arg(long = "hint")]
    pub hints: Vec<String>,
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("no home directory to hold the user config file")]
    NoHomeDirectory,
    #[error("failed to parse config value {0:?}; no '=' found")]
    ConfigArgument(String),
    #[error("invalid configuration: {0}")]
    Config(#[from] config::ConfigError),
    #[error("no input given; pass a path or set `input` in the config file")]
    MissingInput,
    #[error("the number of workers must be at least 1")]
    NoWorkers,
}

/// Performs parsing and validation of the config; to be called by main() before executing any code
/// that tries to retrieve the config.
///
/// Returns the config, or None if a command line flag that calls for an early exit (such as
/// --print-config-path) was provided.
pub fn initialize(args: &Args) -> Result<Option<Config>, CliError> {
    let dirs = ProjectDirs::from("", "", "modernize").ok_or(CliError::NoHomeDirectory)?;
    if args.print_config_path {
        println!("Config file location: {:?}", config_file(dirs.config_dir()));
        return Ok(None);
    }
    load_config(args, dirs.config_dir()).map(Some)
}

fn load_config(args: &Args, config_dir: &Path) -> Result<Config, CliError> {
    let mut settings = config::Config::builder()
        .add_source(config::File::from_str(
            include_str!("../default_config.toml"),
            Toml,
        ))
        .add_source(config::File::from(config_file(config_dir)).required(false))
        .add_source(config::File::from(PathBuf::from("config.toml")).required(false));
    for config_arg in &args.config {
        let Some((name, value)) = config_arg.split_once('=') else {
            return Err(CliError::ConfigArgument(config_arg.clone()));
        };
        settings = settings.set_override(name, value)?;
    }

    if args.force {
        settings = settings.set_override("force", true)?;
    }
    if let Some(workers) = args.workers {
        settings = settings.set_override("workers", workers.to_string())?;
    }

    // Paths cannot be passed through an override without a lossy conversion to a string, so a
    // blank value is set here and replaced after deserialization.
    if args.input.is_some() {
        settings = settings.set_override("input", " ")?;
    }
    if args.output.is_some() {
        settings = settings.set_override("output", " ")?;
    }

    let built = settings.build()?;
    if let Ok(table) = built.clone().try_deserialize::<config::Map<String, config::Value>>() {
        unknown_field_warning("", &unknown_top_level_keys(table.keys()));
    }
    let mut config: Config = built.try_deserialize()?;
    if let Some(ref input) = args.input {
        config.input = input.clone();
    }
    if let Some(ref output) = args.output {
        config.output = output.clone();
    }
    config.business_hints.extend(args.hints.iter().cloned());
    if config.input.as_os_str().is_empty() {
        return Err(CliError::MissingInput);
    }
    if config.workers == 0 {
        return Err(CliError::NoWorkers);
    }
    Ok(config)
}

/// Returns the config file path, given the config directory.
fn config_file(config_dir: &Path) -> PathBuf {
    [config_dir, "translate.toml".as_ref()].iter().collect()
}

#[cfg(test)]
mod tests {
    #[cfg(not(miri))]
    #[test]
    fn load_config_test() {
        use super::*;
        use modernize_core::test_util::tempdir;
        use std::{fs, io::Write as _};
        let config_dir = tempdir().unwrap();

        let config = load_config(
            &Args::parse_from(["", "a", "--output=/tmp/out"]),
            config_dir.path(),
        )
        .unwrap();
        assert_eq!(config.input, AsRef::<Path>::as_ref("a"));
        assert_eq!(config.workers, 4);
        assert!(!config.force);

        fs::File::create(config_file(config_dir.path()))
            .unwrap()
            .write_all(
                br#"
                    input = "b"
                    business_hints = ["Amounts are in cents."]
                    [tools.llm_translation]
                    address = "127.0.0.1"
                    model = "gpt-oss"
                "#,
            )
            .unwrap();
        let config = load_config(
            &Args::parse_from(["", "--output=/tmp/out", "--hint", "Fiscal years start in April."]),
            config_dir.path(),
        )
        .unwrap();
        assert_eq!(config.input, AsRef::<Path>::as_ref("b"));
        assert_eq!(
            config.business_hints,
            ["Amounts are in cents.", "Fiscal years start in April."]
        );
        let llm: llm_translation::Config = config
            .tool_config("llm_translation", &llm_translation::Config::fields())
            .unwrap();
        assert_eq!(llm.llm.model, "gpt-oss");
        assert_eq!(llm.max_retries, 2);

        // Verify the --config flag overrides the user's config file.
        assert_eq!(
            load_config(
                &Args::parse_from(["", "--config", "input=c", "--output=/tmp/out"]),
                config_dir.path()
            )
            .unwrap()
            .input,
            AsRef::<Path>::as_ref("c")
        );
        // Verify the positional input overrides all the configuration options.
        assert_eq!(
            load_config(
                &Args::parse_from(["", "--config", "input=d", "d", "--output=/tmp/out"]),
                config_dir.path()
            )
            .unwrap()
            .input,
            AsRef::<Path>::as_ref("d")
        );
        // Verify --force and --workers reach the config.
        let config = load_config(
            &Args::parse_from(["", "--force", "--workers", "8", "--output=/tmp/out"]),
            config_dir.path(),
        )
        .unwrap();
        assert!(config.force);
        assert_eq!(config.workers, 8);

        assert!(matches!(
            load_config(
                &Args::parse_from(["", "--config", "workers", "--output=/tmp/out"]),
                config_dir.path()
            ),
            Err(CliError::ConfigArgument(_))
        ));
        assert!(matches!(
            load_config(
                &Args::parse_from(["", "--workers", "0", "--output=/tmp/out"]),
                config_dir.path()
            ),
            Err(CliError::NoWorkers)
        ));
    }
}
