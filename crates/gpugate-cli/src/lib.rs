// Copyright 2025 gpugate Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # gpugate CLI
//!
//! Command-line interface for the gpugate inference router.
//!
//! - `gpugate serve`: run the router and its HTTP ingress
//! - `gpugate status`: print a running router's fleet table
//! - `gpugate probe`: one health probe round over a config's backends
//! - `gpugate validate`: check a config file

pub mod probe;
pub mod status;

use anyhow::Result;
use std::path::PathBuf;

/// Environment variable consulted when `--config` is not given.
pub const CONFIG_ENV: &str = "GPUGATE_CONFIG";

/// Picks the config file: the explicit flag wins over the environment.
pub fn resolve_config_path(flag: Option<String>, env: Option<String>) -> Result<PathBuf> {
    flag.or(env)
        .filter(|p| !p.trim().is_empty())
        .map(PathBuf::from)
        .ok_or_else(|| {
            anyhow::anyhow!(
                "No config file given: pass --config <FILE> or set {}",
                CONFIG_ENV
            )
        })
}

/// Validates that a URL string starts with http:// or https://
pub fn validate_http_url(url: &str, description: &str) -> Result<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(anyhow::anyhow!(
            "Invalid {}: '{}' must start with http:// or https://",
            description,
            url
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_beats_env() {
        let path = resolve_config_path(Some("a.yaml".into()), Some("b.yaml".into())).unwrap();
        assert_eq!(path, PathBuf::from("a.yaml"));
    }

    #[test]
    fn test_env_fallback() {
        let path = resolve_config_path(None, Some("/etc/gpugate.yaml".into())).unwrap();
        assert_eq!(path, PathBuf::from("/etc/gpugate.yaml"));
    }

    #[test]
    fn test_missing_config() {
        let err = resolve_config_path(None, None).unwrap_err();
        assert!(err.to_string().contains(CONFIG_ENV));
        assert!(resolve_config_path(None, Some("  ".into())).is_err());
    }

    #[test]
    fn test_validate_http_url() {
        assert!(validate_http_url("http://127.0.0.1:8080", "router").is_ok());
        assert!(validate_http_url("https://gate.internal", "router").is_ok());
        assert!(validate_http_url("127.0.0.1:8080", "router").is_err());
    }
}
