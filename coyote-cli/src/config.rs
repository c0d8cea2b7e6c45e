//! Dual-location configuration loading: a user-level file under
//! `~/.coyote/config.json`, a project-level file under
//! `./.coyote/config.json` that overrides it, mirrored from the
//! teacher's `ConfigLoader` (user config first, project config wins).

use std::path::PathBuf;

use coyote_core::config::PartialRuntimeConfig;
use coyote_core::RuntimeConfig;
use tracing::debug;

use crate::error::CliError;

pub const CONFIG_DIR: &str = ".coyote";
pub const CONFIG_FILE: &str = "config.json";

pub fn user_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(CONFIG_DIR).join(CONFIG_FILE))
}

pub fn project_config_path() -> PathBuf {
    PathBuf::from(".").join(CONFIG_DIR).join(CONFIG_FILE)
}

/// Load defaults, then layer the user-level file over them, then the
/// project-level file over that. Either file may be absent; an absent
/// file is not an error, a malformed one is.
pub fn load() -> Result<RuntimeConfig, CliError> {
    let mut config = RuntimeConfig::default();

    if let Some(path) = user_config_path() {
        if let Some(partial) = read_partial(&path)? {
            debug!(path = %path.display(), "loaded user-level config");
            config = config.merged_with(partial);
        }
    }

    let project_path = project_config_path();
    if let Some(partial) = read_partial(&project_path)? {
        debug!(path = %project_path.display(), "loaded project-level config");
        config = config.merged_with(partial);
    }

    Ok(config)
}

fn read_partial(path: &PathBuf) -> Result<Option<PartialRuntimeConfig>, CliError> {
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(path)?;
    let partial = PartialRuntimeConfig::from_json(&text)?;
    Ok(Some(partial))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_config_path_lands_under_the_home_directory() {
        if let Some(path) = user_config_path() {
            assert!(path.ends_with(".coyote/config.json"));
        }
    }

    #[test]
    fn project_config_path_is_relative_to_the_working_directory() {
        assert!(project_config_path().ends_with(".coyote/config.json"));
    }

    #[test]
    fn read_partial_returns_none_for_a_missing_file() {
        let path = PathBuf::from("/nonexistent/path/does/not/exist.json");
        assert!(read_partial(&path).unwrap().is_none());
    }

    #[test]
    fn read_partial_parses_an_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"seed": 42, "iterations": 7}"#).unwrap();

        let partial = read_partial(&path).unwrap().expect("file exists");
        assert_eq!(partial.seed, Some(42));
        assert_eq!(partial.iterations, Some(7));
    }

    #[test]
    fn read_partial_reports_malformed_json_as_a_usage_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "not json").unwrap();

        let err = read_partial(&path).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
