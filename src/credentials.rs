//! Access-token lookup
//!
//! Tokens are read from an environment variable first and from a secret file
//! at `<secrets_dir>/<scope>/<key>` second. The resolved token is handed to
//! the components that need it; the process environment is never modified.

use crate::config::CredentialsConfig;
use crate::error::{QaBotError, Result};
use std::path::PathBuf;

/// Resolve the model-hosting token from the real environment
pub fn resolve_token(config: &CredentialsConfig) -> Result<String> {
    resolve_token_with(config, |key| std::env::var(key).ok())
}

/// Resolve the model-hosting token with a custom variable lookup
pub fn resolve_token_with<F>(config: &CredentialsConfig, lookup: F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(token) = lookup(&config.token_env).filter(|t| !t.trim().is_empty()) {
        log::debug!("Using token from ${}", config.token_env);
        return Ok(token.trim().to_string());
    }

    if let Some(path) = secret_path(config) {
        if path.exists() {
            let token = std::fs::read_to_string(&path)?;
            let token = token.trim();
            if token.is_empty() {
                return Err(QaBotError::Credential(format!(
                    "Secret file {} is empty",
                    path.display()
                )));
            }
            log::debug!("Using token from secret {}/{}", config.secret_scope, config.secret_key);
            return Ok(token.to_string());
        }
    }

    Err(QaBotError::Credential(format!(
        "No token found: set ${} or provide secret {}/{}",
        config.token_env, config.secret_scope, config.secret_key
    )))
}

/// Token for the registry tracking server, if one is configured
pub fn resolve_registry_token(config: &CredentialsConfig) -> Option<String> {
    std::env::var(&config.registry_token_env)
        .ok()
        .filter(|t| !t.trim().is_empty())
}

fn secret_path(config: &CredentialsConfig) -> Option<PathBuf> {
    config
        .secrets_dir
        .as_ref()
        .map(|dir| dir.join(&config.secret_scope).join(&config.secret_key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_env_takes_precedence() {
        let dir = TempDir::new().unwrap();
        let config = CredentialsConfig {
            secrets_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let secret = dir.path().join(&config.secret_scope);
        std::fs::create_dir_all(&secret).unwrap();
        std::fs::write(secret.join(&config.secret_key), "from-file").unwrap();

        let token = resolve_token_with(&config, |key| {
            (key == "HUGGINGFACEHUB_API_TOKEN").then(|| "hf_env\n".to_string())
        })
        .unwrap();
        assert_eq!(token, "hf_env");
    }

    #[test]
    fn test_secret_file_fallback() {
        let dir = TempDir::new().unwrap();
        let config = CredentialsConfig {
            secrets_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let secret = dir.path().join("solution-accelerator-cicd");
        std::fs::create_dir_all(&secret).unwrap();
        std::fs::write(secret.join("huggingface"), "hf_file\n").unwrap();

        assert_eq!(resolve_token_with(&config, no_env).unwrap(), "hf_file");
    }

    #[test]
    fn test_missing_token() {
        let config = CredentialsConfig::default();
        let err = resolve_token_with(&config, no_env).unwrap_err();
        assert!(matches!(err, QaBotError::Credential(_)));
        assert!(err.to_string().contains("HUGGINGFACEHUB_API_TOKEN"));
    }

    #[test]
    fn test_empty_secret_file() {
        let dir = TempDir::new().unwrap();
        let config = CredentialsConfig {
            secrets_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let secret = dir.path().join(&config.secret_scope);
        std::fs::create_dir_all(&secret).unwrap();
        std::fs::write(secret.join(&config.secret_key), "  ").unwrap();

        assert!(resolve_token_with(&config, no_env).is_err());
    }
}
