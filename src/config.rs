// Configuration input: where the homeserver lives and which access token to
// use. Matches the original config.yaml shape; the core only ever reads it.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Connection settings for the homeserver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Homeserver domain, e.g. `matrix.example.org`.
    pub matrix_domain: String,
    /// Bearer token used on every gateway call.
    pub matrix_token: String,
}

impl Config {
    /// Load configuration.
    ///
    /// Precedence: `MXSTICKERS_DOMAIN` + `MXSTICKERS_TOKEN` environment
    /// variables, then `config.yaml` in the working directory, then
    /// `mxstickers/config.yaml` under the user's config directory.
    pub fn load() -> Result<Self> {
        if let (Ok(matrix_domain), Ok(matrix_token)) =
            (env::var("MXSTICKERS_DOMAIN"), env::var("MXSTICKERS_TOKEN"))
        {
            return Ok(Self {
                matrix_domain,
                matrix_token,
            });
        }

        let local = PathBuf::from("config.yaml");
        if local.exists() {
            return Self::from_file(&local);
        }
        if let Some(dir) = dirs::config_dir() {
            let fallback = dir.join("mxstickers").join("config.yaml");
            if fallback.exists() {
                return Self::from_file(&fallback);
            }
        }

        Err(Error::Config(
            "no config.yaml found and MXSTICKERS_DOMAIN/MXSTICKERS_TOKEN are not set".to_string(),
        ))
    }

    /// Parse a YAML config file with `matrix_domain` and `matrix_token` keys.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        serde_yaml::from_str(&raw)
            .map_err(|err| Error::Config(format!("{}: {err}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn yaml_config_parses() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "matrix_domain: matrix.example.org").unwrap();
        writeln!(file, "matrix_token: syt_secret").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.matrix_domain, "matrix.example.org");
        assert_eq!(config.matrix_token, "syt_secret");
    }

    #[test]
    fn broken_yaml_is_a_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "matrix_domain only").unwrap();

        let err = Config::from_file(file.path()).expect_err("must fail");
        assert!(matches!(err, Error::Config(_)));
    }
}
