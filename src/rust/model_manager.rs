use std::path::{Path, PathBuf};
use std::fs;
use std::io;
use std::sync::Arc;
use std::env;
use tokio::sync::Mutex;
use sha2::{Sha256, Digest};

pub const DEFAULT_HUB_URL: &str = "https://huggingface.co";
pub const CACHE_ENV_VAR: &str = "SEQCLASS_CACHE";

pub const MODEL_FILE: &str = "model.onnx";
pub const MODEL_FP16_FILE: &str = "model_fp16.onnx";
pub const TOKENIZER_FILE: &str = "tokenizer.json";
pub const CONFIG_FILE: &str = "config.json";

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Base architecture not downloaded: {0}")]
    NotDownloaded(String),
    #[error("Download error: {0}")]
    DownloadError(#[from] reqwest::Error),
    #[error("Download of {url} failed with HTTP status {status}")]
    HttpStatus {
        url: String,
        status: u16,
    },
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Hash mismatch: expected {expected}, got {actual} for {file_name}")]
    HashMismatch {
        file_name: String,
        expected: String,
        actual: String,
    },
}

/// One file to fetch from a hub repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    /// Path inside the hub repository, e.g. `onnx/model.onnx`
    pub remote_path: String,
    /// File name inside the local architecture directory
    pub local_name: String,
    /// Expected SHA-256 of the file, hex encoded
    pub sha256: Option<String>,
    /// A missing optional file is skipped instead of failing the download
    pub optional: bool,
}

impl RemoteFile {
    pub fn required(remote_path: impl Into<String>, local_name: impl Into<String>) -> Self {
        Self {
            remote_path: remote_path.into(),
            local_name: local_name.into(),
            sha256: None,
            optional: false,
        }
    }

    pub fn optional(remote_path: impl Into<String>, local_name: impl Into<String>) -> Self {
        Self { optional: true, ..Self::required(remote_path, local_name) }
    }

    pub fn with_sha256(mut self, sha256: impl Into<String>) -> Self {
        self.sha256 = Some(sha256.into());
        self
    }
}

/// The files that make up a base architecture in a hub repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadManifest {
    pub files: Vec<RemoteFile>,
}

impl DownloadManifest {
    /// Layout produced by the common ONNX export tooling: graphs under `onnx/`,
    /// tokenizer and config at the repository root.
    pub fn onnx_export() -> Self {
        Self {
            files: vec![
                RemoteFile::required("onnx/model.onnx", MODEL_FILE),
                RemoteFile::optional("onnx/model_fp16.onnx", MODEL_FP16_FILE),
                RemoteFile::required("tokenizer.json", TOKENIZER_FILE),
                RemoteFile::required("config.json", CONFIG_FILE),
            ],
        }
    }
}

impl Default for DownloadManifest {
    fn default() -> Self {
        Self::onnx_export()
    }
}

/// Local files of a resolved base architecture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchitectureFiles {
    pub model: PathBuf,
    /// Half-precision export, when one was downloaded
    pub model_fp16: Option<PathBuf>,
    pub tokenizer: PathBuf,
    pub config: PathBuf,
}

/// Resolves base architectures to files in a local cache and fetches them
/// from a model hub when asked to.
#[derive(Clone, Debug)]
pub struct ModelManager {
    models_dir: PathBuf,
    hub_url: String,
    download_lock: Arc<Mutex<()>>,
}

impl ModelManager {
    /// Creates a new ModelManager with the default models directory
    pub fn new_default() -> io::Result<Self> {
        Self::new(Self::get_default_models_dir())
    }

    /// Returns the default models directory path
    pub fn get_default_models_dir() -> PathBuf {
        Self::resolve_models_dir(env::var_os(CACHE_ENV_VAR).map(PathBuf::from))
    }

    /// Picks the models directory, preferring `cache_override` (the value of
    /// `SEQCLASS_CACHE`) when it is set.
    pub fn resolve_models_dir(cache_override: Option<PathBuf>) -> PathBuf {
        // 1. Explicit override
        if let Some(path) = cache_override {
            return path.join("models");
        }

        // 2. Use platform-specific cache directory
        if let Some(cache_dir) = dirs::cache_dir() {
            return cache_dir.join("seqclass").join("models");
        }

        // 3. Fallback to user's home directory
        if let Some(home_dir) = dirs::home_dir() {
            return home_dir.join(".cache").join("seqclass").join("models");
        }

        // 4. If all else fails, use system temp directory (platform agnostic)
        env::temp_dir().join("seqclass").join("models")
    }

    pub fn new<P: AsRef<Path>>(models_dir: P) -> io::Result<Self> {
        let models_dir = models_dir.as_ref().to_path_buf();
        fs::create_dir_all(&models_dir)?;
        Ok(Self {
            models_dir,
            hub_url: DEFAULT_HUB_URL.to_string(),
            download_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Points downloads at a different hub, e.g. a mirror
    pub fn with_hub_url(mut self, hub_url: impl Into<String>) -> Self {
        self.hub_url = hub_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Directory holding the files of `architecture`. Hub identifiers such as
    /// `microsoft/deberta-v3-base` map to a single directory level.
    pub fn get_architecture_dir(&self, architecture: &str) -> PathBuf {
        self.models_dir.join(architecture.replace('/', "--"))
    }

    pub fn get_model_path(&self, architecture: &str) -> PathBuf {
        self.get_architecture_dir(architecture).join(MODEL_FILE)
    }

    pub fn get_fp16_model_path(&self, architecture: &str) -> PathBuf {
        self.get_architecture_dir(architecture).join(MODEL_FP16_FILE)
    }

    pub fn get_tokenizer_path(&self, architecture: &str) -> PathBuf {
        self.get_architecture_dir(architecture).join(TOKENIZER_FILE)
    }

    pub fn get_config_path(&self, architecture: &str) -> PathBuf {
        self.get_architecture_dir(architecture).join(CONFIG_FILE)
    }

    pub fn is_architecture_downloaded(&self, architecture: &str) -> bool {
        let model_path = self.get_model_path(architecture);
        let tokenizer_path = self.get_tokenizer_path(architecture);
        let config_path = self.get_config_path(architecture);
        log::debug!("Checking if architecture {} is downloaded:", architecture);
        log::debug!("  Model path: {:?} (exists: {})", model_path, model_path.exists());
        log::debug!("  Tokenizer path: {:?} (exists: {})", tokenizer_path, tokenizer_path.exists());
        log::debug!("  Config path: {:?} (exists: {})", config_path, config_path.exists());
        model_path.exists() && tokenizer_path.exists() && config_path.exists()
    }

    /// Resolves the local files of a downloaded architecture.
    pub fn architecture_files(&self, architecture: &str) -> Result<ArchitectureFiles, ModelError> {
        if !self.is_architecture_downloaded(architecture) {
            return Err(ModelError::NotDownloaded(format!(
                "'{}' not found under {:?}; download it first with ModelManager::download_architecture()",
                architecture, self.models_dir
            )));
        }
        let fp16 = self.get_fp16_model_path(architecture);
        Ok(ArchitectureFiles {
            model: self.get_model_path(architecture),
            model_fp16: fp16.exists().then_some(fp16),
            tokenizer: self.get_tokenizer_path(architecture),
            config: self.get_config_path(architecture),
        })
    }

    pub async fn download_architecture(
        &self,
        architecture: &str,
        manifest: &DownloadManifest,
    ) -> Result<(), ModelError> {
        let _lock = self.download_lock.lock().await;

        let dir = self.get_architecture_dir(architecture);
        log::info!("Creating architecture directory at {:?}", dir);
        fs::create_dir_all(&dir)?;

        for file in &manifest.files {
            let path = dir.join(&file.local_name);
            if path.exists() {
                match &file.sha256 {
                    Some(expected) if !self.verify_file(&path, expected)? => {
                        log::warn!("{} failed verification, redownloading", file.local_name);
                    }
                    _ => {
                        log::info!("{} already present", file.local_name);
                        continue;
                    }
                }
            }

            let url = format!("{}/{}/resolve/main/{}", self.hub_url, architecture, file.remote_path);
            match self.download_and_verify_file(&url, &path, file).await {
                Ok(()) => {}
                Err(ModelError::HttpStatus { status: 404, .. }) if file.optional => {
                    log::info!("Optional file {} not published, skipping", file.remote_path);
                }
                Err(e) => {
                    log::error!("Failed to fetch {}: {}", file.remote_path, e);
                    // Cleanup on failure
                    let _ = self.remove_download(architecture);
                    return Err(e);
                }
            }
        }

        log::info!("Architecture {} ready to use", architecture);
        Ok(())
    }

    fn verify_file(&self, path: &Path, expected_hash: &str) -> Result<bool, ModelError> {
        log::debug!("Verifying file: {:?}", path);
        let bytes = fs::read(path)?;
        let hash = sha256_hex(&bytes);
        log::debug!("Calculated hash: {}", hash);
        log::debug!("Expected hash:   {}", expected_hash);
        Ok(hash.eq_ignore_ascii_case(expected_hash))
    }

    /// Checks every manifest file with a known hash. Files without a hash only
    /// need to exist.
    pub fn verify_architecture(
        &self,
        architecture: &str,
        manifest: &DownloadManifest,
    ) -> Result<bool, ModelError> {
        let dir = self.get_architecture_dir(architecture);
        for file in &manifest.files {
            let path = dir.join(&file.local_name);
            if !path.exists() {
                if file.optional {
                    continue;
                }
                log::info!("{:?} does not exist", path);
                return Ok(false);
            }
            if let Some(expected) = &file.sha256 {
                if !self.verify_file(&path, expected)? {
                    log::info!("{:?} failed hash verification", path);
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    async fn download_and_verify_file(
        &self,
        url: &str,
        path: &Path,
        file: &RemoteFile,
    ) -> Result<(), ModelError> {
        log::info!("Downloading {} to {:?}", url, path);
        let response = reqwest::get(url).await?;
        if !response.status().is_success() {
            return Err(ModelError::HttpStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        let bytes = response.bytes().await?;
        log::info!("Downloaded {} bytes", bytes.len());

        if let Some(expected) = &file.sha256 {
            let hash = sha256_hex(&bytes);
            if !hash.eq_ignore_ascii_case(expected) {
                log::error!("{} hash mismatch: expected {}, got {}", file.local_name, expected, hash);
                return Err(ModelError::HashMismatch {
                    file_name: file.local_name.clone(),
                    expected: expected.clone(),
                    actual: hash,
                });
            }
        }

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, bytes)?;
        Ok(())
    }

    pub fn remove_download(&self, architecture: &str) -> Result<(), ModelError> {
        let dir = self.get_architecture_dir(architecture);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }

    /// Ensures that an architecture is downloaded and verified.
    /// If it doesn't exist, it will be downloaded.
    /// If verification fails, it will be re-downloaded.
    pub async fn ensure_downloaded(
        &self,
        architecture: &str,
        manifest: &DownloadManifest,
    ) -> Result<ArchitectureFiles, ModelError> {
        if !self.is_architecture_downloaded(architecture) {
            log::info!("Architecture {} not found, downloading...", architecture);
            self.download_architecture(architecture, manifest).await?;
        } else if !self.verify_architecture(architecture, manifest)? {
            log::info!("Architecture {} failed verification, re-downloading...", architecture);
            self.remove_download(architecture)?;
            self.download_architecture(architecture, manifest).await?;
        }
        self.architecture_files(architecture)
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
