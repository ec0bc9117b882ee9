//! Environment-driven configuration.
//!
//! | Variable | Effect |
//! |----------|--------|
//! | `NODEGROUP_HOSTNAME` | Host name used for identity instead of the processor name |
//! | `NODEGROUP_HOSTS` | `name=addr,...` table; switches resolution to [`StaticResolver`] |
//! | `NODEGROUP_SLURM_CHECK` | `0`/`false`/`no`/`off` disables the SLURM node-count check |

use std::env;

use crate::error::{Error, Result};
use crate::identity::{DnsResolver, HostResolver, StaticResolver};

/// Host name override.
pub const HOSTNAME_ENV: &str = "NODEGROUP_HOSTNAME";
/// Static host table.
pub const HOSTS_ENV: &str = "NODEGROUP_HOSTS";
/// SLURM cross-check switch.
pub const SLURM_CHECK_ENV: &str = "NODEGROUP_SLURM_CHECK";

/// Discovery settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Host name to resolve instead of the processor name.
    pub hostname: Option<String>,
    /// Static host table; `None` means resolve through DNS.
    pub hosts: Option<StaticResolver>,
    /// Compare the discovered node count with `SLURM_NNODES`.
    pub slurm_check: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            hostname: None,
            hosts: None,
            slurm_check: true,
        }
    }
}

impl Config {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Read the configuration through `lookup`, which maps a variable name to its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let hostname = lookup(HOSTNAME_ENV)
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty());
        let hosts = lookup(HOSTS_ENV)
            .map(|spec| StaticResolver::parse(&spec))
            .transpose()?;
        let slurm_check = match lookup(SLURM_CHECK_ENV) {
            Some(v) => parse_flag(SLURM_CHECK_ENV, &v)?,
            None => true,
        };
        Ok(Config {
            hostname,
            hosts,
            slurm_check,
        })
    }

    /// The resolver these settings select.
    pub fn resolver(&self) -> Box<dyn HostResolver> {
        match &self.hosts {
            Some(table) => Box::new(table.clone()),
            None => Box::new(DnsResolver),
        }
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::InvalidArgument(format!(
            "{key}={other} is not a boolean"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_variables() {
        assert_eq!(Config::from_lookup(lookup(&[])).unwrap(), Config::default());
    }

    #[test]
    fn reads_every_variable() {
        let cfg = Config::from_lookup(lookup(&[
            (HOSTNAME_ENV, " n007 "),
            (HOSTS_ENV, "n007=10.0.0.7"),
            (SLURM_CHECK_ENV, "off"),
        ]))
        .unwrap();
        assert_eq!(cfg.hostname.as_deref(), Some("n007"));
        assert_eq!(cfg.hosts.as_ref().map(StaticResolver::len), Some(1));
        assert!(!cfg.slurm_check);
        assert_eq!(cfg.resolver().resolve("n007").unwrap().to_string(), "10.0.0.7");
    }

    #[test]
    fn blank_hostname_is_ignored() {
        let cfg = Config::from_lookup(lookup(&[(HOSTNAME_ENV, "  ")])).unwrap();
        assert_eq!(cfg.hostname, None);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            Config::from_lookup(lookup(&[(SLURM_CHECK_ENV, "maybe")])),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            Config::from_lookup(lookup(&[(HOSTS_ENV, "n0")])),
            Err(Error::InvalidArgument(_))
        ));
    }
}
