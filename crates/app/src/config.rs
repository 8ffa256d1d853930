//! Command-line and environment configuration for the server binary.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use clap::Parser;
use practice_core::model::{ParseIdError, UserId};
use practice_core::{CatalogError, ProblemCatalog};
use services::StaticTokenAuth;
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("invalid --db value: {raw}")]
    InvalidDbUrl { raw: String },
    #[error("invalid token grant {raw:?}: expected <token>=<user-id>")]
    InvalidToken { raw: String },
    #[error("failed to read catalog {path}: {source}")]
    CatalogFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Progress tracking HTTP server.
#[derive(Debug, Clone, Parser)]
#[command(name = "practice-server", version, about)]
pub struct Config {
    /// Address to listen on.
    #[arg(long, env = "PRACTICE_BIND", default_value = "127.0.0.1:8080")]
    pub bind: SocketAddr,

    /// SQLite database URL or path.
    #[arg(long = "db", env = "PRACTICE_DB_URL", default_value = "sqlite://practice.sqlite3")]
    pub db_url: String,

    /// JSON problem list replacing the built-in catalog.
    #[arg(long, env = "PRACTICE_CATALOG")]
    pub catalog: Option<PathBuf>,

    /// Session tokens accepted by the API, as `<token>=<user-id>`.
    #[arg(long = "token", env = "PRACTICE_TOKENS", value_delimiter = ',')]
    pub tokens: Vec<TokenGrant>,
}

impl Config {
    /// # Errors
    ///
    /// Returns `ConfigError` if the catalog file cannot be read or parsed.
    pub fn load_catalog(&self) -> Result<ProblemCatalog, ConfigError> {
        let Some(path) = &self.catalog else {
            return Ok(ProblemCatalog::builtin()?);
        };
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::CatalogFile {
            path: path.clone(),
            source,
        })?;
        Ok(ProblemCatalog::from_json(&raw)?)
    }

    #[must_use]
    pub fn authenticator(&self) -> StaticTokenAuth {
        self.tokens
            .iter()
            .map(|grant| (grant.token.clone(), grant.user.clone()))
            .collect()
    }
}

/// One `<token>=<user-id>` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub token: String,
    pub user: UserId,
}

impl FromStr for TokenGrant {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidToken {
            raw: raw.to_owned(),
        };
        let (token, user) = raw.split_once('=').ok_or_else(invalid)?;
        let token = token.trim();
        if token.is_empty() {
            return Err(invalid());
        }
        let user = UserId::new(user).map_err(|_: ParseIdError| invalid())?;
        Ok(Self {
            token: token.to_owned(),
            user,
        })
    }
}

pub fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

/// Creates the database file and its parent directories if missing.
///
/// # Errors
///
/// Returns `ConfigError` for URLs without a file path or when the file
/// cannot be created.
pub fn prepare_sqlite_file(db_url: &str) -> Result<(), ConfigError> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ConfigError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ConfigError::InvalidDbUrl {
            raw: db_url.to_string(),
        });
    }

    let path = Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use services::Authenticator;

    #[test]
    fn parses_flags_and_token_grants() {
        let config = Config::try_parse_from([
            "practice-server",
            "--bind",
            "0.0.0.0:9000",
            "--db",
            "sqlite::memory:",
            "--token",
            "s3cret=alice,other=bob",
        ])
        .unwrap();

        assert_eq!(config.bind.port(), 9000);
        assert_eq!(config.db_url, "sqlite::memory:");
        assert_eq!(config.tokens.len(), 2);

        let auth = config.authenticator();
        assert_eq!(
            auth.current_user("other").map(|u| u.id),
            Some(UserId::new("bob").unwrap())
        );
    }

    #[test]
    fn rejects_malformed_grants() {
        assert!("no-separator".parse::<TokenGrant>().is_err());
        assert!("=alice".parse::<TokenGrant>().is_err());
        assert!("token=  ".parse::<TokenGrant>().is_err());
    }

    #[test]
    fn relative_paths_become_absolute_urls() {
        let url = normalize_sqlite_url("sqlite:data/practice.sqlite3".into());
        assert!(url.starts_with("sqlite:///"));
        assert!(url.ends_with("data/practice.sqlite3"));
        assert_eq!(
            normalize_sqlite_url("sqlite::memory:".into()),
            "sqlite::memory:"
        );
    }

    #[test]
    fn prepares_missing_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("db.sqlite3");
        prepare_sqlite_file(&format!("sqlite://{}", path.display())).unwrap();
        assert!(path.exists());
        assert!(prepare_sqlite_file("postgres://x").is_err());
    }

    #[test]
    fn builtin_catalog_is_default() {
        let config = Config::try_parse_from(["practice-server"]).unwrap();
        assert!(!config.load_catalog().unwrap().is_empty());
    }
}
