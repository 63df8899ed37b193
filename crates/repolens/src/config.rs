#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};

use crate::chunking::DEFAULT_CHUNK_SIZE;
use crate::retrieval::DEFAULT_TOP_K;
use crate::types::{EmbeddingConfig, ProjectConfig};

pub const DATA_DIRNAME: &str = ".repolens";
pub const CONFIG_FILENAME: &str = "config.json";

pub fn data_dir(project_root: &Path) -> PathBuf {
    project_root.join(DATA_DIRNAME)
}

pub fn config_path(project_root: &Path) -> PathBuf {
    data_dir(project_root).join(CONFIG_FILENAME)
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "nomic-embed-text".to_string(),
            timeout_secs: 30,
            concurrency: 4,
        }
    }
}

pub fn create_default_config(project_root: &Path) -> ProjectConfig {
    ProjectConfig {
        version: 1,
        root_dir: project_root.to_string_lossy().to_string(),
        include: default_include_patterns(),
        exclude: default_exclude_patterns(),
        max_file_size: 1024 * 1024,
        chunk_size: DEFAULT_CHUNK_SIZE,
        top_k: DEFAULT_TOP_K,
        embedding: EmbeddingConfig::default(),
    }
}

/// Loads `.repolens/config.json`, or the defaults when it does not exist.
pub fn load_config(project_root: &Path) -> std::io::Result<ProjectConfig> {
    let path = config_path(project_root);
    if !path.exists() {
        return Ok(create_default_config(project_root));
    }

    let raw = fs::read_to_string(&path)?;
    let mut config: ProjectConfig = serde_json::from_str(&raw)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
    config.root_dir = project_root.to_string_lossy().to_string();
    if config.chunk_size == 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "chunk_size must be greater than zero",
        ));
    }
    Ok(config)
}

pub fn save_config(project_root: &Path, config: &ProjectConfig) -> std::io::Result<()> {
    let path = config_path(project_root);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut to_save = config.clone();
    to_save.root_dir = ".".to_string();
    let raw = serde_json::to_string_pretty(&to_save)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
    fs::write(path, raw)
}

pub fn add_include_patterns(config: &mut ProjectConfig, patterns: &[String]) {
    for pattern in patterns {
        if !config.include.contains(pattern) {
            config.include.push(pattern.clone());
        }
    }
}

pub fn add_exclude_patterns(config: &mut ProjectConfig, patterns: &[String]) {
    for pattern in patterns {
        if !config.exclude.contains(pattern) {
            config.exclude.push(pattern.clone());
        }
    }
}

/// Everything is indexed; files without a grammar get whole-file chunks.
pub fn default_include_patterns() -> Vec<String> {
    vec!["**/*".to_string()]
}

pub fn default_exclude_patterns() -> Vec<String> {
    vec![
        "**/.git/**",
        "**/node_modules/**",
        "**/dist/**",
        "**/build/**",
        "**/coverage/**",
        "**/.next/**",
        "**/.nuxt/**",
        "**/.vscode/**",
        "**/.idea/**",
        "**/.repolens/**",
        "**/target/**",
        "**/__pycache__/**",
        "**/.venv/**",
        "**/*.min.js",
        "**/package-lock.json",
        "**/yarn.lock",
        "**/pnpm-lock.yaml",
        "**/Cargo.lock",
        "**/.DS_Store",
        "**/Thumbs.db",
        "**/.gitkeep",
    ]
    .into_iter()
    .map(std::string::ToString::to_string)
    .collect()
}
