use crate::accounts::{AccountPolicy, DEFAULT_ACCOUNT_TYPE, DEFAULT_RESET_URL};
use clap::{Arg, ArgMatches, Command};

pub const ARG_DEFAULT_ACCOUNT_TYPE: &str = "default-account-type";
pub const ARG_RESET_URL: &str = "reset-url";

#[must_use]
pub fn policy(matches: &ArgMatches) -> AccountPolicy {
    let read = |id: &str, default: &str| {
        matches
            .get_one::<String>(id)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| default.to_string())
    };

    AccountPolicy::new()
        .with_default_account_type(read(ARG_DEFAULT_ACCOUNT_TYPE, DEFAULT_ACCOUNT_TYPE))
        .with_reset_url(read(ARG_RESET_URL, DEFAULT_RESET_URL))
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_DEFAULT_ACCOUNT_TYPE)
                .long(ARG_DEFAULT_ACCOUNT_TYPE)
                .help("Rate-limit profile assigned to accounts created without one")
                .env("GATEKEEP_DEFAULT_ACCOUNT_TYPE")
                .default_value(DEFAULT_ACCOUNT_TYPE),
        )
        .arg(
            Arg::new(ARG_RESET_URL)
                .long(ARG_RESET_URL)
                .help("Password reset page, the token is appended as ?t=<token>")
                .env("GATEKEEP_RESET_URL")
                .default_value(DEFAULT_RESET_URL),
        )
}
