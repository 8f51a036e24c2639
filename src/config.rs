use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::{fs, io};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_template_path")]
    pub template_path: PathBuf,
    /// Directory the report photos are dropped into.
    #[serde(default = "default_images_dir")]
    pub images_dir: PathBuf,
    #[serde(default = "default_true")]
    pub make_backup: bool,
    #[serde(default)]
    pub fallback_trigger: FallbackTrigger,
    #[serde(default)]
    pub vision: VisionSection,
    #[serde(default)]
    pub ocr: OcrSection,
    /// Per-slot file name overrides, relative to `images_dir` unless absolute.
    #[serde(default)]
    pub images: BTreeMap<String, PathBuf>,
}

fn default_template_path() -> PathBuf {
    PathBuf::from("Others/daily_report_template.xlsx")
}

fn default_images_dir() -> PathBuf {
    PathBuf::from("Others")
}

fn default_true() -> bool {
    true
}

/// When the text-recognition fallback runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackTrigger {
    /// Only when the vision path produced no field at all.
    #[default]
    NoFields,
    /// Whenever any extracted field is still absent.
    AnyMissing,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VisionSection {
    #[serde(default = "default_vision_url")]
    pub base_url: String,
    #[serde(default = "default_vision_model")]
    pub model: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_vision_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_vision_model() -> String {
    "gemini-1.5-flash".to_string()
}

fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    1000
}

fn default_timeout_secs() -> u64 {
    60
}

impl Default for VisionSection {
    fn default() -> Self {
        Self {
            base_url: default_vision_url(),
            model: default_vision_model(),
            api_key_env: default_api_key_env(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OcrSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_ocr_binary")]
    pub binary: String,
    #[serde(default = "default_ocr_lang")]
    pub lang: String,
    /// Tesseract page segmentation mode; 6 = a single uniform block of text.
    #[serde(default = "default_psm")]
    pub psm: u8,
}

fn default_ocr_binary() -> String {
    "tesseract".to_string()
}

fn default_ocr_lang() -> String {
    "eng".to_string()
}

fn default_psm() -> u8 {
    6
}

impl Default for OcrSection {
    fn default() -> Self {
        Self {
            enabled: true,
            binary: default_ocr_binary(),
            lang: default_ocr_lang(),
            psm: default_psm(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            template_path: default_template_path(),
            images_dir: default_images_dir(),
            make_backup: true,
            fallback_trigger: FallbackTrigger::default(),
            vision: VisionSection::default(),
            ocr: OcrSection::default(),
            images: BTreeMap::new(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load `path`, or fall back to defaults if the file does not exist.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        match fs::read_to_string(path.as_ref()) {
            Ok(content) => Ok(toml::from_str(&content)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Resolve the photo for an image slot, honouring `[images]` overrides.
    pub fn image_path(&self, slot: &str, default_file: &str) -> PathBuf {
        match self.images.get(slot) {
            Some(file) => self.images_dir.join(file),
            None => self.images_dir.join(default_file),
        }
    }
}
