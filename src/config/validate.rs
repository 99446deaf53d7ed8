// src/config/validate.rs

use std::collections::HashSet;

use crate::config::model::{
    ConfigFile, RawConfigFile, TaskConfig, VariantConfig, merge_variant_tasks,
};
use crate::dag::TaskGraph;
use crate::errors::{DeployError, Result};
use crate::stage::Host;
use crate::template::{is_valid_env_key, render_command};
use crate::types::parse_duration;
use crate::vars::VariableMap;

/// Release id used while checking variables at load time. The real one is
/// only known at run start, and it is always a literal.
const VALIDATION_RELEASE: &str = "00000000000000";

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = DeployError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_global_config(cfg)?;
    validate_stages(cfg)?;
    validate_tasks(cfg)?;
    validate_variables(cfg)?;
    Ok(())
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<()> {
    if cfg.config.application.trim().is_empty() {
        return Err(DeployError::ConfigError(
            "[config].application must be set".to_string(),
        ));
    }

    if cfg.config.flow.is_empty() {
        return Err(DeployError::ConfigError(
            "[config].flow must list at least one lifecycle event".to_string(),
        ));
    }
    let mut seen = HashSet::new();
    for event in cfg.config.flow.iter() {
        if event.trim().is_empty() {
            return Err(DeployError::ConfigError(
                "[config].flow contains an empty event name".to_string(),
            ));
        }
        if !seen.insert(event.as_str()) {
            return Err(DeployError::ConfigError(format!(
                "[config].flow lists event '{event}' twice"
            )));
        }
    }

    if cfg.config.keep_releases == 0 {
        return Err(DeployError::ConfigError(
            "[config].keep_releases must be >= 1 (got 0)".to_string(),
        ));
    }

    if let Some(timeout) = cfg.config.command_timeout.as_deref() {
        parse_duration(timeout).map_err(|e| {
            DeployError::ConfigError(format!("[config].command_timeout: {e}"))
        })?;
    }

    if let Some(stage) = cfg.config.default_stage.as_deref() {
        if !cfg.stage.contains_key(stage) {
            return Err(DeployError::UnknownStage(stage.to_string()));
        }
    }

    check_env_keys("[env]", cfg.env.keys())?;

    Ok(())
}

fn validate_stages(cfg: &RawConfigFile) -> Result<()> {
    if cfg.stage.is_empty() {
        return Err(DeployError::ConfigError(
            "config must contain at least one [stage.<name>] section".to_string(),
        ));
    }

    for (name, stage) in cfg.stage.iter() {
        if stage.hosts.is_empty() {
            return Err(DeployError::ConfigError(format!(
                "stage '{name}' has no hosts"
            )));
        }
        for host in stage.hosts.iter() {
            Host::from_config(host)?;
        }
        check_env_keys(&format!("[stage.{name}.env]"), stage.env.keys())?;
    }

    Ok(())
}

fn validate_tasks(cfg: &RawConfigFile) -> Result<()> {
    for (tasks, _) in task_sets(cfg)? {
        TaskGraph::from_tasks(cfg.config.flow.clone(), tasks.iter().cloned())?;
        for task in tasks.iter() {
            validate_task(cfg, task)?;
        }
    }
    Ok(())
}

fn validate_task(cfg: &RawConfigFile, task: &TaskConfig) -> Result<()> {
    for stage in task.stages.iter() {
        if !cfg.stage.contains_key(stage) {
            return Err(DeployError::UnknownStage(stage.clone()));
        }
    }

    if let Some(timeout) = task.timeout.as_deref() {
        parse_duration(timeout).map_err(|e| {
            DeployError::ConfigError(format!("task '{}': timeout: {e}", task.name))
        })?;
    }

    check_env_keys(&format!("task '{}' env", task.name), task.env.keys())?;

    Ok(())
}

/// Every stage, with and without each variant, must resolve all of its
/// variables and render every command of every task that runs in it.
fn validate_variables(cfg: &RawConfigFile) -> Result<()> {
    for (tasks, variant) in task_sets(cfg)? {
        for (stage_name, stage) in cfg.stage.iter() {
            let mut vars = VariableMap::with_builtins(
                &cfg.config.application,
                stage_name,
                VALIDATION_RELEASE,
                cfg.config.keep_releases,
            );
            vars.layer(&cfg.vars);
            if let Some(variant) = variant {
                vars.layer(&variant.vars);
            }
            vars.layer(&stage.vars);
            vars.resolve_all()?;

            let mut env = cfg.env.clone();
            env.extend(stage.env.iter().map(|(k, v)| (k.clone(), v.clone())));

            for task in tasks.iter().filter(|t| t.runs_in_stage(stage_name)) {
                let mut task_env = env.clone();
                task_env.extend(task.env.iter().map(|(k, v)| (k.clone(), v.clone())));
                for spec in task.commands.iter() {
                    render_command(spec, &task_env, &vars)?;
                }
            }
        }
    }
    Ok(())
}

/// The base task list followed by one merged list per variant.
fn task_sets(cfg: &RawConfigFile) -> Result<Vec<(Vec<TaskConfig>, Option<&VariantConfig>)>> {
    let mut sets = vec![(cfg.task.clone(), None)];
    for variant in cfg.variant.values() {
        sets.push((merge_variant_tasks(&cfg.task, Some(variant))?, Some(variant)));
    }
    Ok(sets)
}

fn check_env_keys<'a>(section: &str, keys: impl Iterator<Item = &'a String>) -> Result<()> {
    for key in keys {
        if !is_valid_env_key(key) {
            return Err(DeployError::ConfigError(format!(
                "{section}: '{key}' is not a valid environment variable name"
            )));
        }
    }
    Ok(())
}
