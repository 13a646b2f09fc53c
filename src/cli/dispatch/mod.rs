//! Maps validated CLI matches to the action to run.

use crate::api::Settings;
use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{accounts, gateway, http, login};
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or invalid.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    let settings = Settings {
        gateway: gateway::parse(matches)?,
        throttle: login::throttle(matches),
        tokens: login::tokens(matches),
        accounts: accounts::policy(matches),
        api: http::parse(matches)?,
    };

    Ok(Action::Server(Args {
        port,
        dsn,
        settings,
    }))
}
