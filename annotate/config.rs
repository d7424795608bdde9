//! TOML configuration of a whole annotation run.
//!
//! Relative paths are resolved against the directory holding the
//! configuration file, so a configuration can travel with its data.

use crate::features::ProbeCount;
use crate::table::{CALL_RATE, SAMPLE_ID};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read or write configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration file: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Configuration file '{}' already exists; refusing to overwrite it", .0.display())]
    AlreadyExists(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DigCnvConfig {
    pub inputs: Inputs,
    pub call_rates: CallRates,
    #[serde(default)]
    pub probes: Probes,
    pub annotation: Annotation,
    pub model: ModelLocation,
    pub merge: MergeTool,
    #[serde(default)]
    pub output: Output,
}

/// Raw outputs of the two CNV callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Inputs {
    pub penncnv: PathBuf,
    pub quantisnp: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CallRates {
    pub path: PathBuf,
    #[serde(default = "default_individual_colname")]
    pub individual_colname: String,
    #[serde(default = "default_callrate_colname")]
    pub callrate_colname: String,
}

fn default_individual_colname() -> String {
    SAMPLE_ID.to_string()
}

fn default_callrate_colname() -> String {
    CALL_RATE.to_string()
}

/// Probe count of the genotyping array. `count` wins over `pfb_path`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Probes {
    pub pfb_path: Option<PathBuf>,
    pub count: Option<i64>,
}

impl Probes {
    pub fn source(&self) -> ProbeCount {
        match (self.count, &self.pfb_path) {
            (Some(count), Some(_)) => {
                log::warn!("Both a probe count and a PFB file are configured; using the count");
                ProbeCount::Fixed(count)
            }
            (Some(count), None) => ProbeCount::Fixed(count),
            (None, Some(path)) => ProbeCount::PfbFile(path.clone()),
            (None, None) => ProbeCount::Unspecified,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Annotation {
    pub centromeres: PathBuf,
    pub segdups: PathBuf,
    /// Per-sample micro-array quality summary, joined when present.
    pub quality: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelLocation {
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MergeTool {
    pub script: PathBuf,
    #[serde(default = "default_perl")]
    pub perl: PathBuf,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_perl() -> PathBuf {
    PathBuf::from("perl")
}

fn default_timeout_secs() -> u64 {
    3600
}

impl MergeTool {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Output {
    /// Where the classified CNV table is written. Nothing is written if absent.
    pub path: Option<PathBuf>,
}

const EXAMPLE_CONFIG: &str = r#"# DigCNV annotation run.
# Relative paths are resolved against the directory of this file.

[inputs]
penncnv = "<Path to PennCNV file>"
quantisnp = "<Path to QuantiSNP file>"

[call_rates]
path = "<Path to CallRates file>"
individual_colname = "SampleID"
callrate_colname = "CallRate"

[probes]
# Either the number of probes of the array or a PFB file to count them from.
pfb_path = "<Path to PFB file>"
# count = 700000

[annotation]
centromeres = "<Path to centromere regions file>"
segdups = "<Path to segmental duplication regions file>"
# quality = "<Path to micro-array quality file>"

[model]
path = "<Path to trained DigCNV model>"

[merge]
script = "<Path to CNVision_format_merge_ukbb.pl>"
perl = "perl"
timeout_secs = 3600

[output]
path = "<Path to output file>"
"#;

impl DigCnvConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::from_toml_str(&fs::read_to_string(path)?)?;
        if let Some(base) = path.parent() {
            config.resolve_relative_to(base);
        }
        log::info!("Configuration read from '{}'", path.display());
        Ok(config)
    }

    /// Writes a commented template with placeholder paths.
    pub fn write_example(path: &Path) -> Result<(), ConfigError> {
        if path.exists() {
            return Err(ConfigError::AlreadyExists(path.to_path_buf()));
        }
        fs::write(path, EXAMPLE_CONFIG)?;
        log::info!("Example configuration written to '{}'", path.display());
        Ok(())
    }

    fn resolve_relative_to(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() && !p.as_os_str().is_empty() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.inputs.penncnv);
        resolve(&mut self.inputs.quantisnp);
        resolve(&mut self.call_rates.path);
        if let Some(p) = self.probes.pfb_path.as_mut() {
            resolve(p);
        }
        resolve(&mut self.annotation.centromeres);
        resolve(&mut self.annotation.segdups);
        if let Some(p) = self.annotation.quality.as_mut() {
            resolve(p);
        }
        resolve(&mut self.model.path);
        resolve(&mut self.merge.script);
        if let Some(p) = self.output.path.as_mut() {
            resolve(p);
        }
    }
}
