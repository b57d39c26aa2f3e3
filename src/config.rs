use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub models: ModelsConfig,
    pub preprocessing: PreprocessingConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

impl AppConfig {
    /// Reads the YAML config at `path`. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<(Self, bool)> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok((Self::default(), false));
        }
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_yaml(&content)?;
        Ok((config, true))
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        // An empty document deserializes to unit, not to a map
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_upload_mb: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8501,
            max_upload_mb: 20,
        }
    }
}

impl ServerConfig {
    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb * 1024 * 1024
    }
}

#[derive(Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct ModelsConfig {
    pub feature_extractor: ExtractorConfig,
    pub classifier: ClassifierConfig,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct ExtractorConfig {
    pub path: PathBuf,
    pub intra_threads: usize,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("resnet50_feature_extractor.onnx"),
            intra_threads: 4,
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct ClassifierConfig {
    pub path: PathBuf,
    pub format: Option<ClassifierFormat>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("lightgbm_classifier.txt"),
            format: None,
        }
    }
}

impl ClassifierConfig {
    /// Explicit format, else `.onnx` means ONNX and anything else a LightGBM text dump.
    pub fn resolved_format(&self) -> ClassifierFormat {
        if let Some(format) = self.format {
            return format;
        }
        match self.path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("onnx") => ClassifierFormat::Onnx,
            _ => ClassifierFormat::LightGbm,
        }
    }
}

#[derive(Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierFormat {
    Onnx,
    #[serde(alias = "lgbm")]
    LightGbm,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct PreprocessingConfig {
    pub image_size: u32,
    pub mode: NormalizationMode,
    pub layout: TensorLayout,
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self {
            image_size: 224,
            mode: NormalizationMode::Caffe,
            layout: TensorLayout::Nhwc,
        }
    }
}

/// Pixel normalization schemes used by Keras `preprocess_input`.
#[derive(Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
#[serde(rename_all = "lowercase")]
pub enum NormalizationMode {
    /// BGR, zero-centered on the ImageNet mean, unscaled.
    Caffe,
    /// Scaled to [-1, 1].
    Tf,
    /// Scaled to [0, 1] then standardized with ImageNet mean/std.
    Torch,
}

#[derive(Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    Nhwc,
    Nchw,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_from_empty_document() {
        let config = AppConfig::from_yaml("").unwrap();
        assert_eq!(config.server.port, 8501);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.preprocessing.image_size, 224);
        assert_eq!(config.preprocessing.mode, NormalizationMode::Caffe);
        assert_eq!(config.preprocessing.layout, TensorLayout::Nhwc);
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn test_partial_document_keeps_other_defaults() {
        let yaml = r#"
server:
  port: 9000
models:
  classifier:
    path: models/classifier.onnx
preprocessing:
  mode: torch
  layout: nchw
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.max_upload_mb, 20);
        assert_eq!(config.models.feature_extractor.intra_threads, 4);
        assert_eq!(
            config.models.classifier.resolved_format(),
            ClassifierFormat::Onnx
        );
        assert_eq!(config.preprocessing.mode, NormalizationMode::Torch);
        assert_eq!(config.preprocessing.layout, TensorLayout::Nchw);
    }

    #[test]
    fn test_classifier_format_inference() {
        let mut conf = ClassifierConfig {
            path: PathBuf::from("model.TXT"),
            format: None,
        };
        assert_eq!(conf.resolved_format(), ClassifierFormat::LightGbm);

        conf.path = PathBuf::from("model.ONNX");
        assert_eq!(conf.resolved_format(), ClassifierFormat::Onnx);

        // Explicit format wins over the extension
        conf.format = Some(ClassifierFormat::LightGbm);
        assert_eq!(conf.resolved_format(), ClassifierFormat::LightGbm);
    }

    #[test]
    fn test_lgbm_alias() {
        let conf: ClassifierConfig = serde_yaml::from_str("format: lgbm").unwrap();
        assert_eq!(conf.format, Some(ClassifierFormat::LightGbm));
    }

    #[test]
    fn test_invalid_mode_rejected() {
        let result = AppConfig::from_yaml("preprocessing:\n  mode: sepia\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let (config, found) = AppConfig::load("definitely_missing_config.yaml").unwrap();
        assert!(!found);
        assert_eq!(config.server.port, 8501);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "server:\n  host: 127.0.0.1\n  max_upload_mb: 5").unwrap();

        let (config, found) = AppConfig::load(file.path()).unwrap();
        assert!(found);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.max_upload_bytes(), 5 * 1024 * 1024);
    }
}
