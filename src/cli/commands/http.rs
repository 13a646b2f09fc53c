use crate::api::{ApiConfig, DEFAULT_ADMIN_USERNAME, DEFAULT_FORWARDED_HEADER, DEFAULT_FRONTEND_URL};
use anyhow::{Context, Result};
use axum::http::HeaderName;
use clap::{builder::BoolishValueParser, Arg, ArgAction, ArgMatches, Command};

pub const ARG_TRUST_PROXY: &str = "trust-proxy";
pub const ARG_FORWARDED_HEADER: &str = "forwarded-header";
pub const ARG_ADMIN_USERNAME: &str = "admin-username";
pub const ARG_FRONTEND_URL: &str = "frontend-url";

/// # Errors
/// Returns an error if the forwarded header is not a valid header name.
pub fn parse(matches: &ArgMatches) -> Result<ApiConfig> {
    let read = |id: &str, default: &str| {
        matches
            .get_one::<String>(id)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| default.to_string())
    };

    let forwarded_header = read(ARG_FORWARDED_HEADER, DEFAULT_FORWARDED_HEADER);
    HeaderName::from_bytes(forwarded_header.as_bytes())
        .with_context(|| format!("invalid --{ARG_FORWARDED_HEADER}: {forwarded_header}"))?;

    Ok(ApiConfig::new()
        .with_trust_proxy(
            matches
                .get_one::<bool>(ARG_TRUST_PROXY)
                .copied()
                .unwrap_or(true),
        )
        .with_forwarded_header(forwarded_header)
        .with_admin_username(read(ARG_ADMIN_USERNAME, DEFAULT_ADMIN_USERNAME))
        .with_frontend_url(read(ARG_FRONTEND_URL, DEFAULT_FRONTEND_URL)))
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_TRUST_PROXY)
                .long(ARG_TRUST_PROXY)
                .help("Take the client address from the forwarded header")
                .env("GATEKEEP_TRUST_PROXY")
                .default_value("true")
                .action(ArgAction::Set)
                .value_parser(BoolishValueParser::new()),
        )
        .arg(
            Arg::new(ARG_FORWARDED_HEADER)
                .long(ARG_FORWARDED_HEADER)
                .help("Header carrying the client address when behind a proxy")
                .env("GATEKEEP_FORWARDED_HEADER")
                .default_value(DEFAULT_FORWARDED_HEADER),
        )
        .arg(
            Arg::new(ARG_ADMIN_USERNAME)
                .long(ARG_ADMIN_USERNAME)
                .help("Gateway consumer allowed to use the admin endpoints")
                .env("GATEKEEP_ADMIN_USERNAME")
                .default_value(DEFAULT_ADMIN_USERNAME),
        )
        .arg(
            Arg::new(ARG_FRONTEND_URL)
                .long(ARG_FRONTEND_URL)
                .help("Frontend URL, used for CORS and the federated login redirect")
                .env("GATEKEEP_FRONTEND_URL")
                .default_value(DEFAULT_FRONTEND_URL),
        )
}
