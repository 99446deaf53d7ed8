#![allow(dead_code)]

use std::collections::BTreeMap;

use deploydag::config::{
    CommandSpec, ConfigFile, ConfigSection, HostConfig, HostTable, RawConfigFile, SshSection,
    StageConfig, TaskConfig, VariantConfig,
};
use deploydag::errors::Result;
use deploydag::types::Transport;

/// Builder for `ConfigFile` to simplify test setup.
///
/// Starts with `application = "app"` and no stages; add at least one stage
/// before calling `build()`.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                config: ConfigSection {
                    application: "app".to_string(),
                    ..ConfigSection::default()
                },
                ssh: SshSection::default(),
                vars: BTreeMap::new(),
                env: BTreeMap::new(),
                stage: BTreeMap::new(),
                task: Vec::new(),
                variant: BTreeMap::new(),
            },
        }
    }

    pub fn application(mut self, name: &str) -> Self {
        self.config.config.application = name.to_string();
        self
    }

    pub fn default_stage(mut self, name: &str) -> Self {
        self.config.config.default_stage = Some(name.to_string());
        self
    }

    pub fn flow(mut self, events: &[&str]) -> Self {
        self.config.config.flow = events.iter().map(|e| e.to_string()).collect();
        self
    }

    pub fn parallel(mut self, val: bool) -> Self {
        self.config.config.parallel = val;
        self
    }

    pub fn command_timeout(mut self, duration: &str) -> Self {
        self.config.config.command_timeout = Some(duration.to_string());
        self
    }

    /// Stage whose hosts are `"[user@]address[:port]"` strings.
    pub fn with_stage(mut self, name: &str, hosts: &[&str]) -> Self {
        let stage = self.config.stage.entry(name.to_string()).or_default();
        stage
            .hosts
            .extend(hosts.iter().map(|h| HostConfig::Address(h.to_string())));
        self
    }

    /// Add a host with roles to a stage (creating the stage if needed).
    pub fn with_role_host(mut self, stage: &str, address: &str, roles: &[&str]) -> Self {
        let stage = self.config.stage.entry(stage.to_string()).or_default();
        stage.hosts.push(HostConfig::Detailed(HostTable {
            address: address.to_string(),
            user: None,
            port: None,
            roles: roles.iter().map(|r| r.to_string()).collect(),
        }));
        self
    }

    pub fn with_stage_var(mut self, stage: &str, key: &str, value: &str) -> Self {
        self.stage_mut(stage).vars.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_stage_env(mut self, stage: &str, key: &str, value: &str) -> Self {
        self.stage_mut(stage).env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_stage_transport(mut self, stage: &str, transport: Transport) -> Self {
        self.stage_mut(stage).transport = Some(transport);
        self
    }

    pub fn with_var(mut self, key: &str, value: &str) -> Self {
        self.config.vars.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.config.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_task(mut self, task: TaskConfig) -> Self {
        self.config.task.push(task);
        self
    }

    pub fn with_variant(mut self, name: &str, variant: VariantConfig) -> Self {
        self.config.variant.insert(name.to_string(), variant);
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn try_build(self) -> Result<ConfigFile> {
        ConfigFile::try_from(self.config)
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }

    fn stage_mut(&mut self, name: &str) -> &mut StageConfig {
        self.config.stage.entry(name.to_string()).or_default()
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `TaskConfig`.
pub struct TaskConfigBuilder {
    task: TaskConfig,
}

impl TaskConfigBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            task: TaskConfig {
                name: name.to_string(),
                desc: None,
                commands: vec![],
                after: vec![],
                roles: vec![],
                stages: vec![],
                env: BTreeMap::new(),
                timeout: None,
            },
        }
    }

    pub fn desc(mut self, desc: &str) -> Self {
        self.task.desc = Some(desc.to_string());
        self
    }

    pub fn command(mut self, line: &str) -> Self {
        self.task.commands.push(CommandSpec::Shell(line.to_string()));
        self
    }

    pub fn args(mut self, args: &[&str]) -> Self {
        self.task
            .commands
            .push(CommandSpec::Args(args.iter().map(|a| a.to_string()).collect()));
        self
    }

    pub fn after(mut self, event: &str) -> Self {
        self.task.after.push(event.to_string());
        self
    }

    pub fn role(mut self, role: &str) -> Self {
        self.task.roles.push(role.to_string());
        self
    }

    pub fn stage(mut self, stage: &str) -> Self {
        self.task.stages.push(stage.to_string());
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.task.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn timeout(mut self, duration: &str) -> Self {
        self.task.timeout = Some(duration.to_string());
        self
    }

    pub fn build(self) -> TaskConfig {
        self.task
    }
}

/// Builder for `VariantConfig`.
pub struct VariantConfigBuilder {
    variant: VariantConfig,
}

impl VariantConfigBuilder {
    pub fn new() -> Self {
        Self {
            variant: VariantConfig::default(),
        }
    }

    pub fn var(mut self, key: &str, value: &str) -> Self {
        self.variant.vars.insert(key.to_string(), value.to_string());
        self
    }

    pub fn task(mut self, task: TaskConfig) -> Self {
        self.variant.task.push(task);
        self
    }

    pub fn build(self) -> VariantConfig {
        self.variant
    }
}

impl Default for VariantConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
