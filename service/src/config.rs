use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use millstone::SourceScript;
use serde_json;

use errors::*;
use scheduling::ScheduleSpec;

const DEFAULT_EXEC_LOG_CAPACITY: usize = 1000;

/// `ScriptConfig` is one entry of the script registry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScriptConfig {
    /// Path of the user script.
    pub script_path: PathBuf,
    /// Optional directory searched for modules after the script's own directory.
    #[serde(default)]
    pub library_path: Option<PathBuf>,
    #[serde(default)]
    pub description: Option<String>,
    /// Arguments used when a task is registered without any.
    #[serde(default)]
    pub default_args: Vec<String>,
}

impl ScriptConfig {
    pub fn new<P: Into<PathBuf>>(script_path: P) -> Self {
        ScriptConfig {
            script_path: script_path.into(),
            library_path: None,
            description: None,
            default_args: Vec::new(),
        }
    }

    pub fn load_script(&self) -> Result<SourceScript> {
        SourceScript::from_file(&self.script_path)
            .chain_err(|| format!("Unable to load script {}", self.script_path.display()))
    }

    fn resolve_against(&mut self, base: &Path) {
        if self.script_path.is_relative() {
            self.script_path = base.join(&self.script_path);
        }
        if let Some(ref mut library_path) = self.library_path {
            if library_path.is_relative() {
                *library_path = base.join(&library_path);
            }
        }
    }
}

/// `ScriptRegistry` decides which scripts tasks may be registered for.
pub trait ScriptRegistry: Send + Sync {
    fn script_config(&self, script_id: &str) -> Option<&ScriptConfig>;

    /// Sorted ids of every registered script.
    fn script_ids(&self) -> Vec<String>;

    fn is_allowed(&self, script_id: &str) -> bool {
        self.script_config(script_id).is_some()
    }
}

/// A recurring run configured in the service configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub script_id: String,
    #[serde(default)]
    pub args: Option<Vec<String>>,
    pub start_hour: u32,
    pub start_minute: u32,
    /// Seconds between two runs.
    pub interval: u64,
}

impl ScheduleConfig {
    pub fn spec(&self) -> Result<ScheduleSpec> {
        ScheduleSpec::new(self.start_hour, self.start_minute, self.interval)
    }
}

/// `ServiceConfig` is the configuration of service mode, read from a JSON file.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub scripts: BTreeMap<String, ScriptConfig>,
    #[serde(default)]
    pub schedules: Vec<ScheduleConfig>,
    #[serde(default)]
    pub exec_log_capacity: Option<usize>,
}

impl ServiceConfig {
    /// Reads a configuration file. Relative script and library paths are taken relative to the
    /// directory of the file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .chain_err(|| format!("Unable to open config file {}", path.display()))?;
        let mut config: ServiceConfig = serde_json::from_reader(file)
            .chain_err(|| format!("Unable to parse config file {}", path.display()))?;

        if let Some(base) = path.parent() {
            for script in config.scripts.values_mut() {
                script.resolve_against(base);
            }
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: ServiceConfig =
            serde_json::from_str(json).chain_err(|| "Unable to parse service config")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for schedule in &self.schedules {
            if !self.scripts.contains_key(&schedule.script_id) {
                return Err(ErrorKind::ScriptNotAllowed(schedule.script_id.clone()).into());
            }
            schedule.spec()?;
        }
        Ok(())
    }

    pub fn exec_log_capacity(&self) -> usize {
        self.exec_log_capacity.unwrap_or(DEFAULT_EXEC_LOG_CAPACITY)
    }
}

impl ScriptRegistry for ServiceConfig {
    fn script_config(&self, script_id: &str) -> Option<&ScriptConfig> {
        self.scripts.get(script_id)
    }

    fn script_ids(&self) -> Vec<String> {
        self.scripts.keys().cloned().collect()
    }
}

/// `CmdConfig` is the registry used in CLI mode. It only knows the script given on the command
/// line, registered under its file name.
#[derive(Clone, Debug)]
pub struct CmdConfig {
    script_id: String,
    script: ScriptConfig,
}

impl CmdConfig {
    pub fn new<P: Into<PathBuf>>(script_path: P, library_path: Option<PathBuf>) -> Self {
        let mut script = ScriptConfig::new(script_path);
        script.library_path = library_path;
        let script_id = script
            .script_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        CmdConfig { script_id, script }
    }

    pub fn script_id(&self) -> &str {
        &self.script_id
    }
}

impl ScriptRegistry for CmdConfig {
    fn script_config(&self, script_id: &str) -> Option<&ScriptConfig> {
        if script_id == self.script_id {
            Some(&self.script)
        } else {
            None
        }
    }

    fn script_ids(&self) -> Vec<String> {
        vec![self.script_id.clone()]
    }
}
