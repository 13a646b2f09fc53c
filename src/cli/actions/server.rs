use crate::{api, api::Settings};
use anyhow::Result;
use tracing::debug;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub settings: Settings,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database or gateway settings are unusable or the
/// server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    debug!("Settings: {:?}", args.settings);

    api::new(args.port, args.dsn, args.settings).await
}
