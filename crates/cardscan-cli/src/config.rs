use std::path::PathBuf;

/// Runtime settings, loaded from environment variables.
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Optional TOML file with extraction tunables.
    pub extraction_config: Option<PathBuf>,
    /// Tesseract executable.
    pub tesseract: PathBuf,
    /// `TESSDATA_PREFIX` override for Tesseract.
    pub tessdata: Option<PathBuf>,
    /// JSON file holding enrolled face embeddings.
    pub corpus_path: PathBuf,
}

impl Config {
    /// Load configuration from `CARDSCAN_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = env_path("CARDSCAN_MODEL_DIR").unwrap_or_else(cardscan_core::default_model_dir);

        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("cardscan");

        Self {
            model_dir,
            extraction_config: env_path("CARDSCAN_CONFIG"),
            tesseract: env_path("CARDSCAN_TESSERACT").unwrap_or_else(|| PathBuf::from("tesseract")),
            tessdata: env_path("CARDSCAN_TESSDATA"),
            corpus_path: env_path("CARDSCAN_CORPUS").unwrap_or_else(|| data_dir.join("corpus.json")),
        }
    }

    /// Path to the SCRFD detection model.
    pub fn detector_model_path(&self) -> PathBuf {
        self.model_dir.join(cardscan_core::DETECTOR_MODEL)
    }

    /// Path to the ArcFace recognition model.
    pub fn recognizer_model_path(&self) -> PathBuf {
        self.model_dir.join(cardscan_core::RECOGNIZER_MODEL)
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}
