//! Secret references in configuration values.
//!
//! Values in `config.toml` can point at secrets stored outside the file:
//!
//! - `pass::path/in/store`: first line of `pass show path/in/store`
//! - `env::VAR_NAME`: the value of `$VAR_NAME`
//! - anything else is the secret itself

use std::process::Command;

/// A parsed configuration value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretRef<'a> {
    Pass(&'a str),
    Env(&'a str),
    Plain(&'a str),
}

impl<'a> SecretRef<'a> {
    pub fn parse(value: &'a str) -> Self {
        if let Some(path) = value.strip_prefix("pass::") {
            Self::Pass(path)
        } else if let Some(var) = value.strip_prefix("env::") {
            Self::Env(var)
        } else {
            Self::Plain(value)
        }
    }

    pub fn resolve(&self) -> Result<String, String> {
        match *self {
            Self::Pass(path) => resolve_pass(path),
            Self::Env(var) => {
                std::env::var(var).map_err(|_| format!("environment variable `{}` is not set", var))
            }
            Self::Plain(value) => Ok(value.to_string()),
        }
    }

    /// Printable form: references are kept, plain secrets are masked.
    pub fn redacted(&self) -> String {
        match *self {
            Self::Pass(path) => format!("pass::{}", path),
            Self::Env(var) => format!("env::{}", var),
            Self::Plain("") => String::new(),
            Self::Plain(_) => "********".to_string(),
        }
    }
}

/// Resolves a value that may contain a secret reference prefix.
pub fn resolve(value: &str) -> Result<String, String> {
    SecretRef::parse(value).resolve()
}

fn resolve_pass(path: &str) -> Result<String, String> {
    let output = Command::new("pass")
        .arg("show")
        .arg(path)
        .output()
        .map_err(|e| format!("failed to run `pass show {}`: {}", path, e))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!(
            "`pass show {}` failed ({}): {}",
            path,
            output.status,
            stderr.trim()
        ));
    }

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(|line| line.trim_end().to_string())
        .filter(|line| !line.is_empty())
        .ok_or_else(|| format!("`pass show {}` produced no secret", path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_prefixes() {
        assert_eq!(SecretRef::parse("pass::chat/bot"), SecretRef::Pass("chat/bot"));
        assert_eq!(SecretRef::parse("env::BOT_TOKEN"), SecretRef::Env("BOT_TOKEN"));
        assert_eq!(SecretRef::parse("bot-token"), SecretRef::Plain("bot-token"));
    }

    #[test]
    fn plain_text_passthrough() {
        assert_eq!(resolve("bot-token").unwrap(), "bot-token");
        assert_eq!(resolve("").unwrap(), "");
    }

    #[test]
    fn env_reference_resolves() {
        unsafe {
            std::env::set_var("_CALBOT_TEST_SECRET", "my-secret-value");
        }
        assert_eq!(resolve("env::_CALBOT_TEST_SECRET").unwrap(), "my-secret-value");
        unsafe {
            std::env::remove_var("_CALBOT_TEST_SECRET");
        }
    }

    #[test]
    fn missing_env_var_errors() {
        let err = resolve("env::_CALBOT_NONEXISTENT_VAR_12345").unwrap_err();
        assert!(err.contains("not set"));
    }

    #[test]
    fn missing_pass_entry_errors() {
        // Fails either on the missing entry or on the missing `pass` binary.
        assert!(resolve("pass::nonexistent/entry/that/should/not/exist/12345").is_err());
    }

    #[test]
    fn redaction_keeps_references_only() {
        assert_eq!(SecretRef::parse("env::X").redacted(), "env::X");
        assert_eq!(SecretRef::parse("pass::a/b").redacted(), "pass::a/b");
        assert_eq!(SecretRef::parse("hunter2").redacted(), "********");
    }
}
