// src/stage.rs

//! Stage resolution: stage name → target hosts + layered variables.
//!
//! Variable precedence, lowest to highest:
//! built-in defaults < `[vars]` < `[variant.<name>.vars]` < `[stage.<name>.vars]`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::debug;

use crate::config::{ConfigFile, HostConfig, VariantConfig};
use crate::errors::{DeployError, Result};
use crate::types::Transport;
use crate::vars::VariableMap;

/// A single target host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Host {
    pub address: String,
    pub user: Option<String>,
    pub port: Option<u16>,
    /// Roles this host plays. Empty matches every role filter.
    pub roles: Vec<String>,
}

impl Host {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            user: None,
            port: None,
            roles: Vec::new(),
        }
    }

    /// Parse `[user@]address[:port]`.
    pub fn parse(spec: &str) -> Result<Self> {
        let spec = spec.trim();
        let (user, rest) = match spec.split_once('@') {
            Some((user, rest)) => (Some(user.to_string()), rest),
            None => (None, spec),
        };

        let (address, port) = match rest.rsplit_once(':') {
            // An address that itself contains ':' (IPv6) never carries a port here.
            Some((addr, port)) if !addr.contains(':') => {
                let port = port.parse::<u16>().map_err(|_| {
                    DeployError::ConfigError(format!("invalid port in host '{spec}'"))
                })?;
                (addr.to_string(), Some(port))
            }
            _ => (rest.to_string(), None),
        };

        if address.is_empty() || user.as_deref() == Some("") {
            return Err(DeployError::ConfigError(format!(
                "invalid host entry '{spec}'"
            )));
        }

        Ok(Self {
            address,
            user,
            port,
            roles: Vec::new(),
        })
    }

    pub fn from_config(cfg: &HostConfig) -> Result<Self> {
        match cfg {
            HostConfig::Address(spec) => Self::parse(spec),
            HostConfig::Detailed(table) => {
                if table.address.trim().is_empty() {
                    return Err(DeployError::ConfigError(
                        "host table with empty address".to_string(),
                    ));
                }
                Ok(Self {
                    address: table.address.trim().to_string(),
                    user: table.user.clone(),
                    port: table.port,
                    roles: table.roles.clone(),
                })
            }
        }
    }

    /// Whether this host should run a task with the given role filter.
    pub fn matches_roles(&self, roles: &[String]) -> bool {
        roles.is_empty() || self.roles.is_empty() || self.roles.iter().any(|r| roles.contains(r))
    }

    /// `user@address`, or just `address`.
    pub fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{user}@{}", self.address),
            None => self.address.clone(),
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)
    }
}

/// A resolved stage. Immutable once built; variables are shared by `Arc`.
#[derive(Debug, Clone)]
pub struct Stage {
    pub name: String,
    pub hosts: Vec<Host>,
    pub vars: Arc<VariableMap>,
    /// `[env]` merged with the stage's own `env`.
    pub env: BTreeMap<String, String>,
    pub transport: Transport,
}

/// Resolves stage names against a validated config.
#[derive(Debug, Clone)]
pub struct StageResolver<'a> {
    cfg: &'a ConfigFile,
    release: String,
    variant: Option<&'a VariantConfig>,
    host_filter: Option<GlobSet>,
}

impl<'a> StageResolver<'a> {
    pub fn new(cfg: &'a ConfigFile, release: impl Into<String>) -> Self {
        Self {
            cfg,
            release: release.into(),
            variant: None,
            host_filter: None,
        }
    }

    /// Layer the named variant's variables. Fails on an unknown variant.
    pub fn with_variant(mut self, name: Option<&str>) -> Result<Self> {
        self.variant = match name {
            Some(name) => Some(self.cfg.variant.get(name).ok_or_else(|| {
                DeployError::ConfigError(format!("unknown variant '{name}'"))
            })?),
            None => None,
        };
        Ok(self)
    }

    /// Keep only hosts whose address matches one of the glob patterns.
    pub fn with_host_filter(mut self, patterns: &[String]) -> Result<Self> {
        if patterns.is_empty() {
            self.host_filter = None;
            return Ok(self);
        }

        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = Glob::new(pattern).map_err(|e| {
                DeployError::ConfigError(format!("invalid host pattern '{pattern}': {e}"))
            })?;
            builder.add(glob);
        }
        let set = builder
            .build()
            .map_err(|e| DeployError::ConfigError(format!("building host filter: {e}")))?;
        self.host_filter = Some(set);
        Ok(self)
    }

    /// Resolve `name` to a [`Stage`]. Pure lookup, no side effects.
    pub fn resolve(&self, name: &str) -> Result<Stage> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DeployError::UnknownStage(String::new()));
        }

        let stage_cfg = self
            .cfg
            .stage
            .get(name)
            .ok_or_else(|| DeployError::UnknownStage(name.to_string()))?;

        let mut hosts = stage_cfg
            .hosts
            .iter()
            .map(Host::from_config)
            .collect::<Result<Vec<_>>>()?;

        if let Some(filter) = &self.host_filter {
            hosts.retain(|h| filter.is_match(&h.address));
            if hosts.is_empty() {
                return Err(DeployError::ConfigError(format!(
                    "host filter matches no host of stage '{name}'"
                )));
            }
        }

        if hosts.is_empty() {
            return Err(DeployError::ConfigError(format!(
                "stage '{name}' has no hosts"
            )));
        }

        let ssh = &self.cfg.ssh;
        for host in hosts.iter_mut() {
            if host.user.is_none() {
                host.user = ssh.user.clone();
            }
            if host.port.is_none() {
                host.port = ssh.port;
            }
        }

        let mut vars = VariableMap::with_builtins(
            &self.cfg.config.application,
            name,
            &self.release,
            self.cfg.config.keep_releases,
        );
        vars.layer(&self.cfg.vars);
        if let Some(variant) = self.variant {
            vars.layer(&variant.vars);
        }
        vars.layer(&stage_cfg.vars);

        let mut env = self.cfg.env.clone();
        env.extend(stage_cfg.env.iter().map(|(k, v)| (k.clone(), v.clone())));

        let transport = stage_cfg.transport.unwrap_or(self.cfg.config.transport);

        debug!(
            stage = name,
            hosts = hosts.len(),
            vars = vars.len(),
            ?transport,
            "resolved stage"
        );

        Ok(Stage {
            name: name.to_string(),
            hosts,
            vars: Arc::new(vars),
            env,
            transport,
        })
    }
}
