use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::ArgMatches;
use tally_auth::{Credentials, authorization_header};
use tally_config::{Config, OverridableConfig};

use crate::cliapp::make_app;
use crate::setup;

/// Runs the command line application.
pub fn execute() -> Result<()> {
    let app = make_app();
    let matches = app.get_matches();

    let config_path = matches
        .get_one::<PathBuf>("config")
        .cloned()
        .unwrap_or_else(|| PathBuf::from(".tally"));

    let mut config = Config::from_path(&config_path)?;
    config.apply_override(extract_config_args(&matches))?;

    match matches.subcommand() {
        Some(("run", _)) => run(config),
        Some(("config", matches)) => manage_config(&config, matches),
        Some(("token", matches)) => manage_token(&config, matches),
        _ => unreachable!(),
    }
}

/// Extracts config overrides from the command line and the environment.
///
/// Clap reads the environment variables named in the app definition, so both sources end up in
/// the same arguments.
fn extract_config_args(matches: &ArgMatches) -> OverridableConfig {
    let value = |name: &str| matches.get_one::<String>(name).cloned();

    OverridableConfig {
        app_name: value("app_name"),
        redis_url: value("redis_url"),
        metchan_url: value("metchan_url"),
        verbose: value("verbose"),
        partitions: value("partitions"),
        secrets: value("secrets"),
    }
}

pub fn manage_config(config: &Config, matches: &ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("show", _)) => {
            let yaml = config.to_yaml_string()?;
            write!(io::stdout().lock(), "{yaml}")?;
            Ok(())
        }
        _ => unreachable!(),
    }
}

pub fn manage_token(config: &Config, matches: &ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("generate", matches)) => {
            let Some(key) = config.auth_keys().first() else {
                bail!("no secrets configured, set auth.secrets or TALLY_SECRETS");
            };

            let user = matches
                .get_one::<String>("user")
                .context("missing user")?;
            let secret = matches
                .get_one::<String>("secret")
                .context("missing secret")?;

            let token = Credentials::new(user.as_str(), secret.as_str()).encrypt(key);

            let mut stdout = io::stdout().lock();
            writeln!(stdout, "token: {token}")?;
            writeln!(stdout, "authorization: {}", authorization_header(&token))?;
            Ok(())
        }
        _ => unreachable!(),
    }
}

pub fn run(config: Config) -> Result<()> {
    setup::check_config(&config)?;
    setup::init_logging(&config);
    setup::dump_spawn_infos(&config);
    setup::run(config)
}
