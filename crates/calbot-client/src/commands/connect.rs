//! User connection commands.

use tracing::info;

use crate::config::ClientConfig;
use crate::error::ClientResult;

use super::build_engine;

/// Prints the connect link for `user`.
pub fn connect(config: &ClientConfig, user: &str) -> ClientResult<()> {
    let engine = build_engine(config)?;
    println!(
        "[Click here to link your Google calendar.]({})",
        engine.connect_url(user)
    );
    Ok(())
}

/// Stops the user's channel and removes their credential, cache and
/// registration.
pub async fn disconnect(config: &ClientConfig, user: &str) -> ClientResult<()> {
    let engine = build_engine(config)?;
    engine.disconnect(user).await?;
    info!(user_id = user, "disconnected");
    println!("Disconnected {} from Google Calendar.", user);
    Ok(())
}
