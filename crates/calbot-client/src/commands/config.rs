//! Configuration commands.

use std::path::Path;

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::secret::SecretRef;

/// Dump the current configuration to stdout with secrets masked.
pub fn dump(config: &ClientConfig, path: &Path) -> ClientResult<()> {
    let toml_str = toml::to_string_pretty(&redacted(config))
        .map_err(|e| ClientError::Config(format!("failed to serialize config: {}", e)))?;
    println!("# config.toml ({})", path.display());
    println!("{}", toml_str);
    Ok(())
}

/// Validate the configuration.
pub fn validate(config: &ClientConfig) -> ClientResult<()> {
    config.validate()?;
    println!("Configuration is valid.");
    Ok(())
}

/// Show the configuration file path.
pub fn path(path: &Path) -> ClientResult<()> {
    println!("config: {}", path.display());
    Ok(())
}

fn redacted(config: &ClientConfig) -> ClientConfig {
    let mask = |value: &Option<String>| value.as_deref().map(|v| SecretRef::parse(v).redacted());
    let mut copy = config.clone();
    copy.google.client_secret = mask(&config.google.client_secret);
    copy.bot.token = mask(&config.bot.token);
    copy
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_masks_plain_secrets() {
        let config = ClientConfig::parse(
            r#"
[google]
client_id = "id.apps.googleusercontent.com"
client_secret = "hunter2"

[bot]
token = "env::BOT_TOKEN"
"#,
        )
        .unwrap();

        let copy = redacted(&config);
        assert_eq!(copy.google.client_id, config.google.client_id);
        assert_eq!(copy.google.client_secret.as_deref(), Some("********"));
        assert_eq!(copy.bot.token.as_deref(), Some("env::BOT_TOKEN"));
    }
}
