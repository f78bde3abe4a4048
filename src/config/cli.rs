//! Command-line arguments for the `cluster_probe` diagnostic binary

use std::path::PathBuf;

use clap::Parser;

use super::router_config::{AuthConfig, NodeAddress, ReadPreference, RouterConfig};
use crate::utils::ConfigError;

/// Discover a Valkey/Redis cluster, print its slot layout and optionally route one command
#[derive(Parser, Debug, Clone)]
#[command(name = "cluster_probe")]
#[command(version, about, long_about = None)]
#[command(trailing_var_arg = true)]
pub struct ProbeArgs {
    /// YAML router configuration (seeds and options); flags below override it
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Seed node as host:port (repeatable)
    #[arg(short = 's', long = "seed", action = clap::ArgAction::Append)]
    pub seeds: Vec<NodeAddress>,

    /// Password for AUTH
    #[arg(short = 'a', long = "auth")]
    pub password: Option<String>,

    /// Username for ACL AUTH (requires --auth)
    #[arg(long = "user")]
    pub username: Option<String>,

    /// Read preference for read-only commands
    #[arg(long = "read-from", value_enum)]
    pub read_preference: Option<ReadPreference>,

    /// Attempt budget per command
    #[arg(long = "max-attempts")]
    pub max_attempts: Option<u32>,

    /// Print slot and owner for this key (repeatable)
    #[arg(short = 'k', long = "key", action = clap::ArgAction::Append)]
    pub keys: Vec<String>,

    /// Emit JSON instead of text
    #[arg(long = "json")]
    pub json: bool,

    /// Verbose logging
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short = 'q', long = "quiet")]
    pub quiet: bool,

    /// Command to route through the cluster, e.g. `GET foo`
    #[arg(allow_hyphen_values = true)]
    pub command: Vec<String>,
}

impl ProbeArgs {
    pub fn validate(&self) -> Result<(), String> {
        if self.username.is_some() && self.password.is_none() {
            return Err("--user requires --auth to be set".to_string());
        }
        if self.config.is_none() && self.seeds.is_empty() {
            return Err("either --config or at least one --seed is required".to_string());
        }
        if self.max_attempts == Some(0) {
            return Err("--max-attempts must be at least 1".to_string());
        }
        Ok(())
    }

    /// Build the router configuration: file first, then flag overrides
    pub fn to_router_config(&self) -> Result<RouterConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => RouterConfig::from_file(path)?,
            None => RouterConfig::default(),
        };

        if !self.seeds.is_empty() {
            config.seeds = self.seeds.clone();
        }
        if let Some(password) = &self.password {
            config.auth = Some(AuthConfig {
                password: password.clone(),
                username: self.username.clone(),
            });
        }
        if let Some(pref) = self.read_preference {
            config.read_preference = pref;
        }
        if let Some(attempts) = self.max_attempts {
            config.max_attempts = attempts;
        }

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_args_override_defaults() {
        let args = ProbeArgs::parse_from([
            "cluster_probe",
            "--seed",
            "127.0.0.1:7000",
            "-s",
            "127.0.0.1:7001",
            "--read-from",
            "any",
            "-k",
            "foo",
            "GET",
            "foo",
        ]);
        assert!(args.validate().is_ok());
        assert_eq!(args.command, vec!["GET", "foo"]);
        assert_eq!(args.keys, vec!["foo"]);

        let config = args.to_router_config().unwrap();
        assert_eq!(config.seeds.len(), 2);
        assert_eq!(config.read_preference, ReadPreference::Any);
        assert_eq!(config.max_attempts, 5);
    }

    #[test]
    fn test_probe_args_validation() {
        let args = ProbeArgs::parse_from(["cluster_probe"]);
        assert!(args.validate().is_err());

        let args = ProbeArgs::parse_from(["cluster_probe", "-s", "h:1", "--user", "bob"]);
        assert!(args.validate().is_err());
    }
}
