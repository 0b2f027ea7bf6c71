use std::net::SocketAddrV4;
use std::path::PathBuf;

use config::{Config, ConfigError, File};
use log::LevelFilter;
use serde::Deserialize;
use structopt::StructOpt;

use crate::field::{FieldId, CANONICAL_FIELDS};

/// Command-line surface, a `structopt`-derived `Opts` covering every
/// configuration knob the exporter needs.
#[derive(Debug, StructOpt)]
#[structopt(name = "ipfix-exporter")]
pub struct Opts {
    /// Log level to use
    #[structopt(long = "--log", default_value = "Info")]
    pub log_level: LevelFilter,

    /// Optional TOML/INI file overriding the compiled-in defaults
    #[structopt(long = "--config")]
    pub config_file: Option<PathBuf>,

    /// IP:port the exporter sends UDP packets from
    #[structopt(long = "--exporter")]
    pub exporter_addr: Option<SocketAddrV4>,

    /// IP:port of the IPFIX collector
    #[structopt(long = "--collector")]
    pub collector_addr: Option<SocketAddrV4>,

    /// IP:port for the Prometheus-style metrics endpoint
    #[structopt(short = "-m", long = "--metrics")]
    pub metrics_addr: Option<std::net::SocketAddr>,
}

/// The fully resolved configuration the core runs with.
#[derive(Debug, Clone, PartialEq)]
pub struct ExporterConfig {
    pub exporter_addr: SocketAddrV4,
    pub collector_addr: SocketAddrV4,
    pub idle_timeout_ms: i64,
    pub active_timeout_ms: i64,
    pub poll_period_s: u64,
    pub template_refresh_s: u64,
    pub max_message_bytes: usize,
    pub max_flows: usize,
    pub observation_domain_id: u32,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        ExporterConfig {
            exporter_addr: "0.0.0.0:9995".parse().unwrap(),
            // 4739 is the IANA-assigned port for IPFIX over UDP (RFC 7011 §10.3.6).
            collector_addr: "127.0.0.1:4739".parse().unwrap(),
            idle_timeout_ms: 10_000,
            active_timeout_ms: 30_000,
            poll_period_s: 10,
            template_refresh_s: 300,
            max_message_bytes: 1400,
            max_flows: 1_000_000,
            observation_domain_id: 0,
        }
    }
}

impl ExporterConfig {
    /// The canonical nine-field template, as `(identifier, size)` pairs,
    /// ready for [`crate::template::TemplateSet::build`].
    pub fn template_fields(&self) -> Vec<(FieldId, u16)> {
        CANONICAL_FIELDS.iter().map(|&id| (id, id.canonical_size())).collect()
    }

    /// Layers configuration: compiled-in defaults, overridden by an optional
    /// config file, overridden in turn by explicit CLI flags.
    pub fn load(opts: &Opts) -> Result<Self, ConfigError> {
        let mut resolved = ExporterConfig::default();

        if let Some(path) = &opts.config_file {
            let mut raw = Config::new();
            raw.merge(File::from(path.clone()))?;
            let overrides: FileOverrides = raw.try_into()?;
            overrides.apply(&mut resolved)?;
        }

        if let Some(addr) = opts.exporter_addr {
            resolved.exporter_addr = addr;
        }
        if let Some(addr) = opts.collector_addr {
            resolved.collector_addr = addr;
        }

        Ok(resolved)
    }
}

/// Every field in [`ExporterConfig`] is optional here: only the keys present
/// in the user's config file are applied, everything else keeps its default.
#[derive(Debug, Default, Deserialize)]
struct FileOverrides {
    exporter_addr: Option<String>,
    collector_addr: Option<String>,
    idle_timeout_ms: Option<i64>,
    active_timeout_ms: Option<i64>,
    poll_period_s: Option<u64>,
    template_refresh_s: Option<u64>,
    max_message_bytes: Option<usize>,
    max_flows: Option<usize>,
    observation_domain_id: Option<u32>,
}

impl FileOverrides {
    fn apply(self, resolved: &mut ExporterConfig) -> Result<(), ConfigError> {
        if let Some(v) = self.exporter_addr {
            resolved.exporter_addr = v.parse().map_err(|e| ConfigError::Message(format!("invalid exporter_addr {:?}: {}", v, e)))?;
        }
        if let Some(v) = self.collector_addr {
            resolved.collector_addr = v.parse().map_err(|e| ConfigError::Message(format!("invalid collector_addr {:?}: {}", v, e)))?;
        }
        if let Some(v) = self.idle_timeout_ms {
            resolved.idle_timeout_ms = v;
        }
        if let Some(v) = self.active_timeout_ms {
            resolved.active_timeout_ms = v;
        }
        if let Some(v) = self.poll_period_s {
            resolved.poll_period_s = v;
        }
        if let Some(v) = self.template_refresh_s {
            resolved.template_refresh_s = v;
        }
        if let Some(v) = self.max_message_bytes {
            resolved.max_message_bytes = v;
        }
        if let Some(v) = self.max_flows {
            resolved.max_flows = v;
        }
        if let Some(v) = self.observation_domain_id {
            resolved.observation_domain_id = v;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let cfg = ExporterConfig::default();
        assert_eq!(cfg.idle_timeout_ms, 10_000);
        assert_eq!(cfg.active_timeout_ms, 30_000);
        assert_eq!(cfg.poll_period_s, 10);
    }

    #[test]
    fn template_fields_contains_all_nine_canonical_fields() {
        let cfg = ExporterConfig::default();
        assert_eq!(cfg.template_fields().len(), 9);
    }
}
