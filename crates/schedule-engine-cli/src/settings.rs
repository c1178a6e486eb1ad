//! Project and user settings files, loaded once into configuration layers.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use schedule_engine::layers::{builtin_defaults, ConfigLayer, LayerKind, LayerStack};
use schedule_engine::validate::validate_settings;
use serde_json::{Map, Value};
use tracing::debug;

/// Project settings, looked up in the working directory.
pub const PROJECT_FILE: &str = "meetup-scheduler-local.json";
/// User settings, looked up under the platform config directory.
pub const USER_FILE: &str = "config.json";
const APP_DIR: &str = "meetup-scheduler";

/// `<config dir>/meetup-scheduler/config.json`, if the platform has one.
pub fn default_user_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join(USER_FILE))
}

#[derive(Debug, Clone, Default)]
pub struct Settings {
    project: Value,
    user: Value,
    project_path: Option<PathBuf>,
    user_path: Option<PathBuf>,
}

impl Settings {
    /// Read both settings files. Missing files count as empty settings.
    pub fn load(project: &Path, user: Option<&Path>) -> Result<Self> {
        let project_path = project.to_path_buf();
        let user_path = user.map(Path::to_path_buf).or_else(default_user_path);
        Ok(Self {
            project: read_optional(&project_path)?,
            user: match &user_path {
                Some(path) => read_optional(path)?,
                None => Value::Object(Map::new()),
            },
            project_path: Some(project_path),
            user_path,
        })
    }

    /// Structural problems in either file, as `<file>: <path>: <message>`.
    pub fn issues(&self) -> Vec<String> {
        [(&self.project, &self.project_path), (&self.user, &self.user_path)]
            .into_iter()
            .flat_map(|(settings, path)| {
                let file = path
                    .as_deref()
                    .map_or_else(|| "settings".to_string(), |p| p.display().to_string());
                validate_settings(settings)
                    .into_iter()
                    .map(move |issue| format!("{file}: {issue}"))
            })
            .collect()
    }

    /// The builtin, user, project and cli layers.
    pub fn stack(&self, cli: Map<String, Value>) -> LayerStack {
        LayerStack::new(vec![
            builtin_defaults(),
            ConfigLayer::from_settings(LayerKind::User, &self.user),
            ConfigLayer::from_settings(LayerKind::Project, &self.project),
            ConfigLayer::of(LayerKind::Cli, cli),
        ])
    }

    /// The `defaults` blocks merged, project entries over user entries.
    pub fn defaults_block(&self) -> Map<String, Value> {
        let mut merged = Map::new();
        for settings in [&self.user, &self.project] {
            if let Some(Value::Object(defaults)) = settings.get("defaults") {
                for (key, value) in defaults {
                    merged.insert(key.clone(), value.clone());
                }
            }
        }
        merged
    }

    /// The `series.<name>` block, project first.
    pub fn series(&self, name: &str) -> Option<&Map<String, Value>> {
        [&self.project, &self.user]
            .into_iter()
            .find_map(|settings| settings.get("series")?.get(name)?.as_object())
    }
}

fn read_optional(path: &Path) -> Result<Value> {
    if !path.exists() {
        debug!(path = %path.display(), "settings file not found");
        return Ok(Value::Object(Map::new()));
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read settings file {}", path.display()))?;
    let value: Value = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse settings file {}", path.display()))?;
    if !value.is_object() {
        bail!("settings file {} must contain a JSON object", path.display());
    }
    debug!(path = %path.display(), "loaded settings");
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;

    fn write(dir: &Path, name: &str, value: Value) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, value.to_string()).unwrap();
        path
    }

    #[test]
    fn test_missing_files_are_empty() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("nope.json"), Some(&dir.path().join("also-nope.json"))).unwrap();
        assert!(settings.defaults_block().is_empty());
        assert!(settings.series("monthly").is_none());
    }

    #[test]
    fn test_project_defaults_override_user() {
        let dir = tempfile::tempdir().unwrap();
        let project = write(dir.path(), "project.json", json!({"defaults": {"duration": 90}}));
        let user = write(
            dir.path(),
            "user.json",
            json!({"defaults": {"duration": "1h", "groupUrlname": "rust-nyc"}}),
        );
        let settings = Settings::load(&project, Some(&user)).unwrap();
        let defaults = settings.defaults_block();
        assert_eq!(defaults["duration"], json!(90));
        assert_eq!(defaults["groupUrlname"], json!("rust-nyc"));
    }

    #[test]
    fn test_stack_orders_layers() {
        let settings = Settings::default();
        let names: Vec<_> = settings.stack(Map::new()).iter().map(|l| l.name().to_string()).collect();
        assert_eq!(names, ["cli", "project", "user", "builtin"]);
    }

    #[test]
    fn test_series_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let project = write(
            dir.path(),
            "project.json",
            json!({"series": {"monthly": {"duration": 150}}}),
        );
        let settings = Settings::load(&project, Some(&dir.path().join("none.json"))).unwrap();
        assert_eq!(settings.series("monthly").unwrap()["duration"], json!(150));
    }

    #[test]
    fn test_issues_name_the_file_and_path() {
        let dir = tempfile::tempdir().unwrap();
        let project = write(dir.path(), "project.json", json!({"defaults": {"duration": "2H"}}));
        let user = write(dir.path(), "user.json", json!({"venueAliases": {"hq": "123"}}));
        let settings = Settings::load(&project, Some(&user)).unwrap();
        assert_eq!(
            settings.issues(),
            [format!(
                "{}: defaults.duration: must be a positive number of minutes or a duration like 2h30m",
                project.display()
            )]
        );
    }

    #[test]
    fn test_non_object_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let project = write(dir.path(), "project.json", json!([1, 2, 3]));
        let err = Settings::load(&project, Some(&dir.path().join("none.json"))).unwrap_err();
        assert!(err.to_string().contains("must contain a JSON object"));
    }
}
