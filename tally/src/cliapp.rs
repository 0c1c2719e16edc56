//! This module implements the definition of the command line app.

use clap::builder::ValueParser;
use clap::{Arg, Command};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const ABOUT: &str = "Aggregates tenant metrics and exports them to a time-series API.";

pub fn make_app() -> Command {
    Command::new("tally")
        .disable_help_subcommand(true)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .max_term_width(79)
        .version(VERSION)
        .about(ABOUT)
        .arg(
            Arg::new("config")
                .value_name("CONFIG")
                .long("config")
                .short('c')
                .global(true)
                .value_parser(ValueParser::path_buf())
                .default_value(".tally")
                .help("The path to the config folder."),
        )
        .arg(
            Arg::new("app_name")
                .long("app-name")
                .global(true)
                .env("TALLY_APP_NAME")
                .help("The namespace of Redis keys, leases and self-metrics."),
        )
        .arg(
            Arg::new("redis_url")
                .long("redis-url")
                .global(true)
                .env("TALLY_REDIS_URL")
                .help("The URL of the Redis server."),
        )
        .arg(
            Arg::new("metchan_url")
                .long("metchan-url")
                .global(true)
                .env("TALLY_METCHAN_URL")
                .help("The gauges API URL receiving tally's own metrics, with credentials."),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .global(true)
                .env("TALLY_VERBOSE")
                .help("Print self-metrics to stdout (true or false)."),
        )
        .arg(
            Arg::new("partitions")
                .long("partitions")
                .global(true)
                .env("TALLY_PARTITIONS")
                .help("Number of partitions of the outlet."),
        )
        .arg(
            Arg::new("secrets")
                .long("secrets")
                .global(true)
                .env("TALLY_SECRETS")
                .hide_env_values(true)
                .help("Colon separated fernet keys for authentication tokens."),
        )
        .subcommand(Command::new("run").about("Run tally").after_help(
            "This runs the outlet and the self-metrics channel in the foreground until \
             it is shut down with SIGINT or SIGTERM.",
        ))
        .subcommand(
            Command::new("config")
                .about("Manage the tally config")
                .subcommand_required(true)
                .subcommand(
                    Command::new("show")
                        .about("Show the effective configuration")
                        .after_help(
                            "This prints the configuration after applying defaults, \
                             environment variables and command line overrides.",
                        ),
                ),
        )
        .subcommand(
            Command::new("token")
                .about("Manage authentication tokens")
                .subcommand_required(true)
                .subcommand(
                    Command::new("generate")
                        .about("Generate an authentication token")
                        .after_help(
                            "This encrypts the credentials with the first configured \
                             secret. Receivers accept the token as Basic authentication.",
                        )
                        .arg(
                            Arg::new("user")
                                .long("user")
                                .short('u')
                                .value_name("USER")
                                .required(true)
                                .help("The user name at the gauges API."),
                        )
                        .arg(
                            Arg::new("secret")
                                .long("secret")
                                .short('s')
                                .value_name("SECRET")
                                .required(true)
                                .help("The password or API token at the gauges API."),
                        ),
                ),
        )
}
