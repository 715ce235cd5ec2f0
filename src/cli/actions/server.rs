use crate::cli::actions::Action;
use crate::farmgate::new;
use anyhow::{Context, Result};
use url::Url;

/// Handle the server action
pub async fn handle(action: Action) -> Result<()> {
    match action {
        Action::Server { port, dsn } => {
            // Fail fast on an unparseable DSN instead of at pool setup.
            Url::parse(&dsn).context("invalid database DSN")?;

            new(port, dsn).await?;
        }
    }

    Ok(())
}
