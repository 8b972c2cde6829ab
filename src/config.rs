use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub staging: Staging,
    #[serde(default)]
    pub plain: Plain,
    #[serde(default)]
    pub helpers: Helpers,
    #[serde(default)]
    pub store: Store,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        Ok(cfg)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "warn".into(),
            json: false,
            write_to_file: false,
            file_path: "".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Staging {
    /// Directory for spill files; empty means the system temp dir.
    pub spill_dir: String,
    pub spill_prefix: String,
    pub spill_suffix: String,
    pub chunk_bytes: usize,
}
impl Default for Staging {
    fn default() -> Self {
        Self {
            spill_dir: "".into(),
            spill_prefix: "pdlcount_".into(),
            spill_suffix: ".prn".into(),
            chunk_bytes: crate::stage::MEGABYTE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Plain {
    pub lines_per_page: u32,
}
impl Default for Plain {
    fn default() -> Self {
        Self { lines_per_page: 66 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Helpers {
    /// Wall-clock limit for one helper run; 0 disables the limit.
    pub timeout_seconds: u64,
    pub postscript: HelperCommand,
}
impl Default for Helpers {
    fn default() -> Self {
        Self {
            timeout_seconds: 120,
            postscript: HelperCommand::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HelperCommand {
    /// Program name; `a|b` lists alternatives tried in order on PATH.
    pub program: String,
    /// Arguments; `{input}` is replaced with the staged file path.
    pub args: Vec<String>,
    pub output: HelperOutputMode,
}

impl Default for HelperCommand {
    fn default() -> Self {
        default_postscript_helper()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HelperOutputMode {
    /// Count `%%HiResBoundingBox` lines across stdout and stderr.
    BboxLines,
    /// Trimmed stdout is the page count.
    Count,
}

fn default_postscript_helper() -> HelperCommand {
    HelperCommand {
        program: "gs".into(),
        args: vec![
            "-q".into(),
            "-dBATCH".into(),
            "-dNOPAUSE".into(),
            "-dSAFER".into(),
            "-sDEVICE=bbox".into(),
            "{input}".into(),
        ],
        output: HelperOutputMode::BboxLines,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Store {
    pub path: String,
}
impl Default for Store {
    fn default() -> Self {
        Self {
            path: "pdlcount-jobs.json".into(),
        }
    }
}
