use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::SyncError;
use crate::script::functions::FunctionFilter;

pub const DEFAULT_REPO: &str = "https://github.com/ProjectIgnis/CardScripts.git";
pub const DEFAULT_API_BASE: &str = "https://db.ygoprodeck.com/api/v7/cardinfo.php";
const DEFAULT_CONFIG_FILE: &str = "ignis.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FunctionMode {
    All,
    Named,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub db_path: PathBuf,
    /// Git URL or local checkout of the card scripts repository.
    pub repo: String,
    /// Where a remote `repo` is cloned to.
    pub clone_dir: PathBuf,
    pub scripts_subdir: String,
    pub script_ext: String,
    pub function_mode: FunctionMode,
    pub log_tail: usize,
    pub api_base: String,
    pub api_timeout_secs: u64,
}

impl Settings {
    /// Defaults, then `ignis.toml` (or `explicit`), then `IGNIS_*` env vars.
    pub fn load(explicit: Option<&Path>) -> Result<Self, SyncError> {
        let mut builder = Config::builder()
            .set_default("db_path", "data/cards.sqlite")?
            .set_default("repo", DEFAULT_REPO)?
            .set_default("clone_dir", "CardScripts")?
            .set_default("scripts_subdir", "official")?
            .set_default("script_ext", "lua")?
            .set_default("function_mode", "all")?
            .set_default("log_tail", 10)?
            .set_default("api_base", DEFAULT_API_BASE)?
            .set_default("api_timeout_secs", 15)?;

        builder = match explicit {
            Some(path) => builder.add_source(File::from(path)),
            None => builder.add_source(File::with_name(DEFAULT_CONFIG_FILE).required(false)),
        };

        let settings = builder
            .add_source(Environment::with_prefix("IGNIS"))
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    pub fn function_filter(&self) -> FunctionFilter {
        match self.function_mode {
            FunctionMode::All => FunctionFilter::All,
            FunctionMode::Named => FunctionFilter::conventional(),
        }
    }
}
