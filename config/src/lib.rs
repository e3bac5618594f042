//! Load configuration from XDG `config.toml` and project `.env` files, then apply to the
//! process environment with priority: **existing env > .env (later files win) > XDG**.
//!
//! Also provides `${VAR}` interpolation for string values read from config files.

mod dotenv;
mod xdg_toml;

use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("xdg config path: {0}")]
    XdgPath(String),
    #[error("read xdg config: {0}")]
    XdgRead(std::io::Error),
    #[error("parse xdg toml: {0}")]
    XdgParse(#[from] toml::de::Error),
    #[error("read .env: {0}")]
    DotenvRead(std::io::Error),
}

/// Loads config from XDG `config.toml` and an ordered list of `.env` files, then sets
/// environment variables only for keys that are **not** already set (so existing env has
/// highest priority).
///
/// Order of precedence when a key is missing in the process environment:
/// 1. Value from the **last** `.env` file in `env_files` that defines it (later files win)
/// 2. Value from `$XDG_CONFIG_HOME/<app_name>/config.toml` `[env]` table
///
/// * `app_name`: e.g. `"minion"` — used for XDG path `~/.config/<app_name>/config.toml`.
/// * `env_files`: `.env` paths in declared order; missing files are skipped.
pub fn load_and_apply(app_name: &str, env_files: &[&Path]) -> Result<(), LoadError> {
    let xdg_map = xdg_toml::load_env_map(app_name)?;
    let dotenv_map = load_env_files(env_files)?;

    let mut keys: std::collections::HashSet<String> = xdg_map.keys().cloned().collect();
    keys.extend(dotenv_map.keys().cloned());

    for key in keys {
        if std::env::var(&key).is_ok() {
            continue; // existing env wins
        }
        let value = dotenv_map.get(&key).or_else(|| xdg_map.get(&key)).cloned();
        if let Some(v) = value {
            std::env::set_var(&key, v);
        }
    }

    Ok(())
}

/// Merges `.env` files in declared order into one map; later files override earlier ones.
/// Missing files are skipped. Does not touch the process environment.
pub fn load_env_files(env_files: &[&Path]) -> Result<HashMap<String, String>, LoadError> {
    let mut merged = HashMap::new();
    for path in env_files {
        let map = dotenv::load_env_map(path).map_err(LoadError::DotenvRead)?;
        merged.extend(map);
    }
    Ok(merged)
}

/// Expands `${VAR}` references in `s` from the process environment.
/// Unknown variables are left as-is; `$` without braces is not interpolated.
pub fn interpolate(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match std::env::var(name) {
                    Ok(v) => out.push_str(&v),
                    Err(_) => {
                        out.push_str("${");
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                return out;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn existing_env_wins() {
        env::set_var("MINION_CONFIG_TEST_EXISTING", "from_env");
        let _ = load_and_apply("minion", &[]);
        assert_eq!(
            env::var("MINION_CONFIG_TEST_EXISTING").as_deref(),
            Ok("from_env")
        );
        env::remove_var("MINION_CONFIG_TEST_EXISTING");
    }

    #[test]
    fn load_and_apply_no_config_ok() {
        let r = load_and_apply("config-crate-nonexistent-app-xyz", &[]);
        assert!(r.is_ok());
    }

    #[test]
    fn later_env_file_overrides_earlier() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.env");
        let b = dir.path().join("b.env");
        std::fs::write(&a, "SHARED=first\nONLY_A=1\n").unwrap();
        std::fs::write(&b, "SHARED=second\n").unwrap();
        let merged = load_env_files(&[a.as_path(), b.as_path()]).unwrap();
        assert_eq!(merged.get("SHARED"), Some(&"second".to_string()));
        assert_eq!(merged.get("ONLY_A"), Some(&"1".to_string()));
    }

    #[test]
    fn missing_env_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.env");
        let merged = load_env_files(&[missing.as_path()]).unwrap();
        assert!(merged.is_empty());
    }

    #[test]
    fn interpolate_expands_known_vars() {
        env::set_var("MINION_INTERP_TEST", "abc");
        assert_eq!(interpolate("x-${MINION_INTERP_TEST}-y"), "x-abc-y");
        env::remove_var("MINION_INTERP_TEST");
    }

    #[test]
    fn interpolate_leaves_unknown_vars() {
        env::remove_var("MINION_INTERP_UNSET");
        assert_eq!(
            interpolate("a ${MINION_INTERP_UNSET} b"),
            "a ${MINION_INTERP_UNSET} b"
        );
    }

    #[test]
    fn interpolate_ignores_unclosed_brace() {
        assert_eq!(interpolate("tail ${OPEN"), "tail ${OPEN");
    }
}
