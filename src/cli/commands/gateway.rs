use crate::gateway::client::{GatewayConfig, DEFAULT_LIST_TIMEOUT, DEFAULT_TIMEOUT};
use anyhow::Result;
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;
use std::time::Duration;

pub const ARG_GATEWAY_URL: &str = "gateway-url";
pub const ARG_GATEWAY_KEY: &str = "gateway-key";
pub const ARG_GATEWAY_TIMEOUT: &str = "gateway-timeout";
pub const ARG_GATEWAY_LIST_TIMEOUT: &str = "gateway-list-timeout";

/// Gateway admin API connection settings.
///
/// # Errors
/// Returns an error if the URL or key is missing or blank.
pub fn parse(matches: &ArgMatches) -> Result<GatewayConfig> {
    let read_required = |id: &str| -> Result<String> {
        matches
            .get_one::<String>(id)
            .cloned()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("missing required argument: --{id}"))
    };

    let url = read_required(ARG_GATEWAY_URL)?;
    let key = SecretString::from(read_required(ARG_GATEWAY_KEY)?);

    let seconds = |id: &str, default: Duration| {
        matches
            .get_one::<u64>(id)
            .copied()
            .map_or(default, Duration::from_secs)
    };

    Ok(GatewayConfig::new(url, key)
        .with_timeout(seconds(ARG_GATEWAY_TIMEOUT, DEFAULT_TIMEOUT))
        .with_list_timeout(seconds(ARG_GATEWAY_LIST_TIMEOUT, DEFAULT_LIST_TIMEOUT)))
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_GATEWAY_URL)
                .long(ARG_GATEWAY_URL)
                .help("Gateway admin API base URL, example: http://apisix:9180/apisix/admin")
                .env("GATEKEEP_GATEWAY_URL")
                .required(true),
        )
        .arg(
            Arg::new(ARG_GATEWAY_KEY)
                .long(ARG_GATEWAY_KEY)
                .help("Gateway admin API key")
                .env("GATEKEEP_GATEWAY_KEY")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_GATEWAY_TIMEOUT)
                .long(ARG_GATEWAY_TIMEOUT)
                .help("Timeout in seconds for single consumer and group calls")
                .env("GATEKEEP_GATEWAY_TIMEOUT")
                .default_value("5")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_GATEWAY_LIST_TIMEOUT)
                .long(ARG_GATEWAY_LIST_TIMEOUT)
                .help("Timeout in seconds for list calls")
                .env("GATEKEEP_GATEWAY_LIST_TIMEOUT")
                .default_value("20")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}
