use crate::error::BackendError;
use anyhow::{anyhow, Context, Result};
use regex::Regex;
use serde_json::Value as JsonValue;
use std::env;
use std::process::Command;
use std::sync::OnceLock;
use tracing::debug;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{([A-Z0-9_]+)\}").expect("placeholder pattern"))
}

/// Expands `${VAR}` through `lookup`. `${APP_BIN}` reads `CHI_FORMS_APP_BIN`
/// (quoted when it holds whitespace) and falls back to `chi-app`.
pub fn expand_with(cmdline: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    placeholder_re()
        .replace_all(cmdline, |caps: &regex::Captures| {
            let key = &caps[1];
            if key == "APP_BIN" {
                return match lookup("CHI_FORMS_APP_BIN") {
                    // Keep it a single arg for shlex::split
                    Some(v) if v.chars().any(char::is_whitespace) => {
                        format!("\"{}\"", v.replace('"', "\\\""))
                    }
                    Some(v) => v,
                    None => "chi-app".to_string(),
                };
            }
            lookup(key).unwrap_or_default()
        })
        .to_string()
}

pub fn expand_cmdline_env(cmdline: &str) -> String {
    expand_with(cmdline, |k| env::var(k).ok())
}

pub fn split_cmdline(cmdline: &str) -> Result<Vec<String>> {
    let expanded = expand_cmdline_env(cmdline);
    let parts = shlex::split(&expanded).ok_or_else(|| anyhow!("Failed to parse command line"))?;
    if parts.is_empty() {
        return Err(anyhow!("Empty command line"));
    }
    Ok(parts)
}

/// `per_page` / `startDate` → `--per-page` / `--start-date`.
pub fn kebab_flag(key: &str) -> String {
    let mut out = String::from("--");
    for (i, ch) in key.chars().enumerate() {
        match ch {
            '_' | ' ' | '.' => out.push('-'),
            c if c.is_ascii_uppercase() => {
                if i > 0 && !out.ends_with('-') {
                    out.push('-');
                }
                out.push(c.to_ascii_lowercase());
            }
            c => out.push(c),
        }
    }
    out
}

/// Runs `args[0]` with the rest as arguments. Stdout JSON on success; on a
/// non-zero exit a JSON error envelope on stderr (or stdout) is returned as
/// is so the caller can read its field errors.
pub fn run_args_to_json(args: &[String]) -> Result<JsonValue, BackendError> {
    let (program, rest) = args
        .split_first()
        .ok_or_else(|| BackendError::Transport("Empty command line".into()))?;
    debug!(%program, args = ?rest, "running command");
    let output = Command::new(program)
        .args(rest)
        .env("CHI_FORMS_JSON", "1")
        .output()
        .with_context(|| format!("spawning {program}"))?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    if output.status.success() {
        return Ok(serde_json::from_str(stdout.trim())?);
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    for text in [stderr.trim(), stdout.trim()] {
        if let Ok(v) = serde_json::from_str::<JsonValue>(text) {
            if v.is_object() {
                return Ok(v);
            }
        }
    }
    Err(BackendError::Transport(format!(
        "Command failed: {}\n{}",
        args.join(" "),
        stderr.trim()
    )))
}

pub fn run_cmdline_to_json(cmdline: &str) -> Result<JsonValue> {
    let parts = split_cmdline(cmdline)?;
    run_args_to_json(&parts).map_err(|e| anyhow!("{e}").context(format!("running {cmdline}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn placeholders_expand_and_app_bin_is_quoted() {
        let vars = env_of(&[("TENANT", "acme"), ("CHI_FORMS_APP_BIN", "/opt/my app/bin")]);
        let out = expand_with("${APP_BIN} business list --tenant ${TENANT} ${MISSING}", |k| {
            vars.get(k).cloned()
        });
        assert_eq!(out, "\"/opt/my app/bin\" business list --tenant acme ");
        assert_eq!(
            shlex::split(&out).unwrap(),
            vec!["/opt/my app/bin", "business", "list", "--tenant", "acme"]
        );
        assert_eq!(expand_with("${APP_BIN}", |_| None), "chi-app");
    }

    #[test]
    fn flags_are_kebab_case() {
        assert_eq!(kebab_flag("per_page"), "--per-page");
        assert_eq!(kebab_flag("startDate"), "--start-date");
        assert_eq!(kebab_flag("status__in"), "--status--in");
        assert_eq!(kebab_flag("search"), "--search");
    }

    #[test]
    fn empty_command_lines_are_rejected() {
        assert!(split_cmdline("   ").is_err());
        assert!(split_cmdline("echo 'unterminated").is_err());
        assert!(run_args_to_json(&[]).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn failing_commands_hand_back_their_error_envelope() {
        let ok = run_cmdline_to_json(r#"sh -c 'echo "{\"ok\": true, \"data\": 1}"'"#).unwrap();
        assert_eq!(ok["data"], 1);
        let args: Vec<String> = [
            "sh",
            "-c",
            r#"echo '{"ok": false, "data": {"message": "nope"}}' >&2; exit 3"#,
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let v = run_args_to_json(&args).unwrap();
        assert_eq!(v["ok"], false);
        let plain: Vec<String> = ["sh", "-c", "echo boom >&2; exit 1"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert!(matches!(run_args_to_json(&plain), Err(BackendError::Transport(m)) if m.contains("boom")));
    }
}
