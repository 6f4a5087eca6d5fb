// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use clap::Parser;

fn parse(args: &[&str]) -> anyhow::Result<Config> {
    let mut full = vec!["attache"];
    full.extend(args);
    Ok(Config::try_parse_from(full)?)
}

#[test]
fn defaults() -> anyhow::Result<()> {
    let config = parse(&[])?;
    assert_eq!(config.port, 9700);
    assert_eq!(config.max_sessions, 10);
    assert!(config.api_keys.is_empty());
    assert_eq!(config.effective_agent_args(), vec!["--dangerously-skip-permissions"]);
    config.validate()?;
    Ok(())
}

#[test]
fn api_keys_repeatable() -> anyhow::Result<()> {
    let config = parse(&["--api-key", "a", "--api-key", "b"])?;
    assert_eq!(config.api_keys, vec!["a", "b"]);
    Ok(())
}

#[test]
fn agent_args_override_replaces_default() -> anyhow::Result<()> {
    let config = parse(&["--agent-arg", "--resume"])?;
    assert_eq!(config.effective_agent_args(), vec!["--resume"]);
    Ok(())
}

#[test]
fn state_paths_derive_from_state_dir() -> anyhow::Result<()> {
    let config = parse(&["--state-dir", "/tmp/attache-test"])?;
    assert_eq!(config.registry_path(), PathBuf::from("/tmp/attache-test/sessions.json"));
    assert_eq!(config.db_path(), PathBuf::from("/tmp/attache-test/messages.db"));
    assert_eq!(config.log_dir(), PathBuf::from("/tmp/attache-test/logs"));
    Ok(())
}

#[test]
fn validation_rejects_bad_values() -> anyhow::Result<()> {
    let config = parse(&["--max-sessions", "0"])?;
    assert!(config.validate().is_err());

    let config = parse(&["--log-format", "yaml"])?;
    assert!(config.validate().is_err());
    Ok(())
}
