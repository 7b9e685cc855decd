//! # Command Line Interface
//!
//! This module defines command line interface for binaries. `Clap` is used
//! for easy generation of help messages and handling arguments.

use crate::config::BridgeConfig;
use crate::errors::BridgeError;
use crate::types::KeyPurpose;
use crate::utils;
use clap::Parser;
use std::env;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::exit;
use std::str::FromStr;
use tracing::level_filters::LevelFilter;
use tracing::Level;

/// Bridge coordinator: watches deposits and drives threshold signing.
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// TOML formatted configuration file.
    pub config_file: Option<PathBuf>,
    /// Verbosity level, ranging from 0 (none) to 5 (highest)
    #[arg(short, long, default_value_t = 3)]
    pub verbose: u8,
}

/// Runs distributed key generation for one key purpose.
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct KeygenArgs {
    /// Key purpose to generate.
    #[arg(long, value_enum)]
    pub purpose: KeyPurpose,
    /// Minimum number of signers.
    #[arg(long)]
    pub threshold: usize,
    /// Number of registry members to include, all if not given.
    #[arg(long)]
    pub committee: Option<usize>,
    /// TOML formatted configuration file.
    pub config_file: Option<PathBuf>,
    /// Verbosity level, ranging from 0 (none) to 5 (highest)
    #[arg(short, long, default_value_t = 3)]
    pub verbose: u8,
}

/// Parse given iterator. This is good for isolated environments, like tests.
fn parse_from<P, I, T>(itr: I) -> Result<P, BridgeError>
where
    P: Parser,
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    match P::try_parse_from(itr) {
        Ok(c) => Ok(c),
        Err(e) => Err(BridgeError::ConfigError(e.to_string())),
    }
}

fn level_filter(verbose: u8) -> Option<LevelFilter> {
    match verbose {
        0 => None,
        other => Some(LevelFilter::from_level(
            Level::from_str(&other.to_string()).unwrap_or(Level::INFO),
        )),
    }
}

/// Reads configuration from the environment if it is complete, otherwise
/// from the given TOML file.
fn read_configuration(config_file: Option<PathBuf>) -> Result<BridgeConfig, BridgeError> {
    match BridgeConfig::from_env() {
        Ok(config) => {
            tracing::info!(
                "All the environment variables are set. Using them instead of configuration file..."
            );
            return Ok(config);
        }
        Err(BridgeError::EnvVarNotSet(_, name)) => {
            tracing::info!("Environment variable {name} is not set, using configuration file...");
        }
        Err(e) => return Err(e),
    }

    let Some(config_file) = config_file else {
        return Err(BridgeError::ConfigError(
            "Neither environment variables are set nor a configuration file is provided".into(),
        ));
    };

    BridgeConfig::try_parse_file(config_file)
}

/// Gets configuration from CLI, for binaries. If there are any errors, prints
/// error and exits the program.
///
/// Steps:
///
/// 1. Get CLI arguments
/// 2. Initialize logger
/// 3. Get configuration, either from environment variables or configuration
///    file
pub fn get_configuration_from_cli() -> (BridgeConfig, Args) {
    let args: Args = match parse_from(env::args()) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e}");
            exit(1);
        }
    };

    if let Err(e) = utils::initialize_logger(level_filter(args.verbose)) {
        eprintln!("{e}");
        exit(1);
    }

    match read_configuration(args.config_file.clone()) {
        Ok(config) => (config, args),
        Err(e) => {
            tracing::error!("Can't read configuration: {e}");
            exit(1);
        }
    }
}

/// Same as [`get_configuration_from_cli`] for the key generation binary.
pub fn get_keygen_configuration_from_cli() -> (BridgeConfig, KeygenArgs) {
    let args: KeygenArgs = match parse_from(env::args()) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e}");
            exit(1);
        }
    };

    if let Err(e) = utils::initialize_logger(level_filter(args.verbose)) {
        eprintln!("{e}");
        exit(1);
    }

    match read_configuration(args.config_file.clone()) {
        Ok(config) => (config, args),
        Err(e) => {
            tracing::error!("Can't read configuration: {e}");
            exit(1);
        }
    }
}
