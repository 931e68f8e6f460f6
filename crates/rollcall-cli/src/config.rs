use anyhow::{Context, Result};
use rollcall_core::annotate::AnnotationConfig;
use rollcall_core::{DetectorConfig, EmbedderConfig, RecognitionConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Cascade file looked up in `model_dir` unless overridden.
pub const CASCADE_FILE: &str = "haarcascade_frontalface_default.xml";
/// Embedding model looked up in `model_dir` unless overridden.
pub const EMBEDDING_FILE: &str = "facenet.onnx";

/// CLI configuration: TOML file, then `ROLLCALL_*` environment overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory containing the cascade and embedding model files.
    pub model_dir: PathBuf,
    /// Directory holding `enrollment.json` and `attendance.jsonl`.
    pub data_dir: PathBuf,
    /// Explicit cascade path; defaults to `model_dir/CASCADE_FILE`.
    pub cascade_model: Option<PathBuf>,
    /// Explicit embedding model path; defaults to `model_dir/EMBEDDING_FILE`.
    pub embedding_model: Option<PathBuf>,
    pub detector: DetectorConfig,
    pub embedder: EmbedderConfig,
    pub recognition: RecognitionConfig,
    pub annotation: AnnotationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_dir: rollcall_core::default_model_dir(),
            data_dir: default_data_dir(),
            cascade_model: None,
            embedding_model: None,
            detector: DetectorConfig::default(),
            embedder: EmbedderConfig::default(),
            recognition: RecognitionConfig::default(),
            annotation: AnnotationConfig::default(),
        }
    }
}

impl Config {
    /// Load from `explicit`, `$ROLLCALL_CONFIG`, or the XDG config file when
    /// present, then apply environment overrides.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("ROLLCALL_CONFIG").ok().map(PathBuf::from))
            .or_else(|| Some(default_config_path()).filter(|p| p.exists()));

        let mut config = match path {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config =
            toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Apply `ROLLCALL_*` overrides read through `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup("ROLLCALL_MODEL_DIR") {
            self.model_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("ROLLCALL_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(path) = lookup("ROLLCALL_CASCADE_MODEL") {
            self.cascade_model = Some(PathBuf::from(path));
        }
        if let Some(path) = lookup("ROLLCALL_EMBEDDING_MODEL") {
            self.embedding_model = Some(PathBuf::from(path));
        }
        if let Some(threshold) = env_f32(&lookup, "ROLLCALL_SIMILARITY_THRESHOLD") {
            self.recognition.similarity_threshold = threshold;
        }
    }

    pub fn cascade_path(&self) -> PathBuf {
        self.cascade_model
            .clone()
            .unwrap_or_else(|| self.model_dir.join(CASCADE_FILE))
    }

    pub fn embedding_model_path(&self) -> PathBuf {
        self.embedding_model
            .clone()
            .unwrap_or_else(|| self.model_dir.join(EMBEDDING_FILE))
    }

    pub fn enrollment_path(&self) -> PathBuf {
        self.data_dir.join("enrollment.json")
    }

    pub fn attendance_path(&self) -> PathBuf {
        self.data_dir.join("attendance.jsonl")
    }
}

fn env_f32(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<f32> {
    let raw = lookup(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring non-numeric override");
            None
        }
    }
}

fn xdg_dir(var: &str, fallback: &str) -> PathBuf {
    std::env::var(var).map(PathBuf::from).unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        PathBuf::from(home).join(fallback)
    })
}

fn default_data_dir() -> PathBuf {
    xdg_dir("XDG_DATA_HOME", ".local/share").join("rollcall")
}

fn default_config_path() -> PathBuf {
    xdg_dir("XDG_CONFIG_HOME", ".config").join("rollcall/config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.recognition.similarity_threshold, 0.8);
        assert_eq!(config.detector.min_neighbors, 5);
        assert_eq!(config.embedder.input_size, 160);
        assert!(config.cascade_path().ends_with(CASCADE_FILE));
        assert!(config.embedding_model_path().ends_with(EMBEDDING_FILE));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            model_dir = "/opt/rollcall/models"

            [detector]
            min_neighbors = 3

            [recognition]
            similarity_threshold = 0.75
            "#,
        )
        .unwrap();
        assert_eq!(config.model_dir, PathBuf::from("/opt/rollcall/models"));
        assert_eq!(config.detector.min_neighbors, 3);
        assert_eq!(config.detector.min_size, 30);
        assert_eq!(config.recognition.similarity_threshold, 0.75);
        assert_eq!(
            config.cascade_path(),
            PathBuf::from("/opt/rollcall/models").join(CASCADE_FILE)
        );
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("ROLLCALL_MODEL_DIR", "/models"),
            ("ROLLCALL_DATA_DIR", "/data"),
            ("ROLLCALL_EMBEDDING_MODEL", "/elsewhere/net.onnx"),
            ("ROLLCALL_SIMILARITY_THRESHOLD", "0.65"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.cascade_path(), PathBuf::from("/models").join(CASCADE_FILE));
        assert_eq!(config.embedding_model_path(), PathBuf::from("/elsewhere/net.onnx"));
        assert_eq!(config.enrollment_path(), PathBuf::from("/data/enrollment.json"));
        assert_eq!(config.recognition.similarity_threshold, 0.65);
    }

    #[test]
    fn test_bad_threshold_override_ignored() {
        let mut config = Config::default();
        config.apply_overrides(|k| (k == "ROLLCALL_SIMILARITY_THRESHOLD").then(|| "high".to_string()));
        assert_eq!(config.recognition.similarity_threshold, 0.8);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "data_dir = \"/srv/rollcall\"\n").unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.attendance_path(), PathBuf::from("/srv/rollcall/attendance.jsonl"));
        assert!(Config::from_file(&dir.path().join("missing.toml")).is_err());
    }
}
