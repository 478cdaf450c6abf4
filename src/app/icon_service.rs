use crate::app::fs_probe::{FsProbe, RealFsProbe};
use crate::core::{AppError, AppResult, ResultExt};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use wait_timeout::ChildExt;

const ICON_PROTOCOL: &str = "app-icon://";
const ICON_FILE_EXTENSION: &str = ".ico";
const DEFAULT_EXTRACT_TIMEOUT: Duration = Duration::from_secs(10);

/// Persistent key/value store for extracted icon bytes. Entries are created
/// once and never mutated; `put` must be atomic per key so a concurrent
/// reader never observes a half-written entry.
pub trait IconStore: Send + Sync {
    fn has(&self, key: &str) -> bool;
    fn get(&self, key: &str) -> Option<PathBuf>;
    fn put(&self, key: &str, bytes: &[u8]) -> AppResult<PathBuf>;
}

/// Directory-backed store mapping each cache key to `<key>.png`, surviving
/// process restarts.
pub struct DirIconStore {
    dir: PathBuf,
    temp_seq: AtomicU64,
}

impl DirIconStore {
    pub fn new(dir: impl Into<PathBuf>) -> AppResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_code("icon_cache_dir_create_failed", "创建图标缓存目录失败")
            .with_ctx("dir", dir.to_string_lossy())?;
        Ok(Self {
            dir,
            temp_seq: AtomicU64::new(0),
        })
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.png"))
    }
}

impl IconStore for DirIconStore {
    fn has(&self, key: &str) -> bool {
        self.entry_path(key).exists()
    }

    fn get(&self, key: &str) -> Option<PathBuf> {
        let path = self.entry_path(key);
        path.exists().then_some(path)
    }

    fn put(&self, key: &str, bytes: &[u8]) -> AppResult<PathBuf> {
        let final_path = self.entry_path(key);
        // Write-then-rename keeps the entry atomic per key; racing writers on
        // the same key are fine, last complete rename wins.
        let temp_path = self.dir.join(format!(
            "{key}.png.tmp-{}-{}",
            std::process::id(),
            self.temp_seq.fetch_add(1, Ordering::Relaxed)
        ));
        fs::write(&temp_path, bytes)
            .with_code("icon_cache_write_failed", "写入图标缓存失败")
            .with_ctx("cacheKey", key)?;
        if let Err(error) = fs::rename(&temp_path, &final_path) {
            let _ = fs::remove_file(&temp_path);
            return Err(AppError::new("icon_cache_write_failed", "写入图标缓存失败")
                .with_context("cacheKey", key)
                .with_source(error));
        }
        Ok(final_path)
    }
}

/// Structured stdout of the extraction tool.
#[derive(Debug, Clone, Deserialize)]
struct ExtractToolResult {
    success: bool,
    #[serde(default)]
    path: String,
    #[serde(default)]
    error: Option<String>,
}

/// Outcome of asking the collaborator for an icon.
#[derive(Debug, Clone)]
pub enum IconExtraction {
    /// The tool produced a PNG at this path.
    Extracted(PathBuf),
    /// The tool ran and answered that this source yields no usable icon
    /// (including timeouts and malformed output). Memoized by the caller.
    Unavailable(String),
}

/// Single-purpose external collaborator invoked with `(path, index)`.
pub trait IconExtractor: Send + Sync {
    fn extract(&self, source: &Path, index: u32) -> AppResult<IconExtraction>;
}

/// Subprocess extractor: `extracticon <path> <index>` printing a JSON result
/// on stdout. The invocation is bounded by a timeout; an expired timeout
/// counts as an unsuccessful answer, not a transport error.
pub struct ExtractIconTool {
    tool_path: PathBuf,
    timeout: Duration,
}

impl ExtractIconTool {
    pub fn new(tool_path: impl Into<PathBuf>) -> Self {
        Self {
            tool_path: tool_path.into(),
            timeout: DEFAULT_EXTRACT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl IconExtractor for ExtractIconTool {
    fn extract(&self, source: &Path, index: u32) -> AppResult<IconExtraction> {
        if !self.tool_path.exists() {
            return Err(AppError::new("icon_tool_missing", "图标提取工具不存在")
                .with_context("tool", self.tool_path.to_string_lossy()));
        }

        let mut child = Command::new(&self.tool_path)
            .arg(source)
            .arg(index.to_string())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .with_code("icon_tool_spawn_failed", "启动图标提取工具失败")
            .with_ctx("tool", self.tool_path.to_string_lossy())?;

        let Some(status) = child
            .wait_timeout(self.timeout)
            .with_code("icon_tool_wait_failed", "等待图标提取工具失败")?
        else {
            let _ = child.kill();
            let _ = child.wait();
            tracing::warn!(
                event = "icon_extract_timeout",
                source = %source.display(),
                timeout_secs = self.timeout.as_secs()
            );
            return Ok(IconExtraction::Unavailable("timeout".to_string()));
        };

        let mut stdout = String::new();
        if let Some(mut pipe) = child.stdout.take() {
            pipe.read_to_string(&mut stdout)
                .with_code("icon_tool_read_failed", "读取图标提取输出失败")?;
        }

        if !status.success() {
            return Ok(IconExtraction::Unavailable(format!("status={status}")));
        }

        match serde_json::from_str::<ExtractToolResult>(stdout.trim()) {
            Ok(result) if result.success && !result.path.is_empty() => {
                Ok(IconExtraction::Extracted(PathBuf::from(result.path)))
            }
            Ok(result) => Ok(IconExtraction::Unavailable(
                result.error.unwrap_or_else(|| "no icon".to_string()),
            )),
            Err(error) => {
                tracing::warn!(
                    event = "icon_extract_malformed_output",
                    source = %source.display(),
                    error = error.to_string()
                );
                Ok(IconExtraction::Unavailable("malformed output".to_string()))
            }
        }
    }
}

/// Content-addressed icon resolution. One instance per process owns the
/// persistent store, the extraction collaborator and an in-memory locator
/// layer; resolution never fails outward, degrading to the default icon.
pub struct IconService {
    store: Box<dyn IconStore>,
    extractor: Box<dyn IconExtractor>,
    probe: Box<dyn FsProbe>,
    default_icon: PathBuf,
    memory: Mutex<HashMap<String, String>>,
}

impl IconService {
    pub fn new(
        store: Box<dyn IconStore>,
        extractor: Box<dyn IconExtractor>,
        default_icon: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            extractor,
            probe: Box::new(RealFsProbe),
            default_icon: default_icon.into(),
            memory: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_probe(mut self, probe: Box<dyn FsProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Resolve a raw `DisplayIcon` reference to a displayable locator.
    ///
    /// Accepted shapes: a bare executable/DLL path, the same path suffixed
    /// with `,<index>` (index defaults to 0 when absent or unparsable), or a
    /// direct path to an `.ico` file which bypasses extraction entirely.
    pub fn resolve_icon(&self, display_icon: &str) -> String {
        let icon_ref = display_icon.replace('"', "");
        let icon_ref = icon_ref.trim();
        if icon_ref.is_empty() {
            return self.default_locator();
        }

        if let Some((source, raw_index)) = icon_ref.split_once(',') {
            let index = raw_index.trim().parse::<u32>().unwrap_or(0);
            return self.resolve_icon_at(source.trim(), index);
        }

        if icon_ref.to_ascii_lowercase().ends_with(ICON_FILE_EXTENSION) {
            if self.probe.exists(icon_ref) {
                return file_locator(icon_ref);
            }
            tracing::warn!(event = "icon_source_missing", source = icon_ref);
            return self.default_locator();
        }

        self.resolve_icon_at(icon_ref, 0)
    }

    pub fn default_locator(&self) -> String {
        file_locator(&self.default_icon)
    }

    /// Resolve an executable source at an explicit icon index.
    pub fn resolve_icon_at(&self, source: &str, index: u32) -> String {
        let key = cache_key(source, index);

        if let Some(locator) = self.memory_get(&key) {
            return locator;
        }
        if let Some(path) = self.store.get(&key) {
            tracing::debug!(event = "icon_cache_hit", source, index, cache_key = %key);
            let locator = file_locator(path);
            self.memory_put(&key, &locator);
            return locator;
        }

        // A source that is absent right now is not memoized: a transient
        // "not found yet" must not poison the cache for this key.
        if !self.probe.exists(source) {
            tracing::warn!(event = "icon_source_missing", source);
            return self.default_locator();
        }

        tracing::info!(event = "icon_extract_started", source, index);
        match self.extractor.extract(Path::new(source), index) {
            Ok(IconExtraction::Extracted(png_path)) => match fs::read(&png_path) {
                Ok(bytes) => self.persist(&key, &bytes),
                Err(error) => {
                    tracing::warn!(
                        event = "icon_extract_output_unreadable",
                        source,
                        path = %png_path.display(),
                        error = error.to_string()
                    );
                    self.persist_default(&key)
                }
            },
            Ok(IconExtraction::Unavailable(reason)) => {
                tracing::warn!(event = "icon_extract_unavailable", source, index, reason = %reason);
                // Memoize the failure so a source known to yield no icon is
                // not re-extracted on every lookup.
                self.persist_default(&key)
            }
            Err(error) => {
                // The tool could not run at all; environmental, so the key
                // stays uncached and heals once the tool is back.
                tracing::warn!(
                    event = "icon_extract_failed",
                    source,
                    index,
                    code = error.code.as_str(),
                    error = error.to_string()
                );
                self.default_locator()
            }
        }
    }

    fn persist(&self, key: &str, bytes: &[u8]) -> String {
        match self.store.put(key, bytes) {
            Ok(path) => {
                let locator = file_locator(path);
                self.memory_put(key, &locator);
                locator
            }
            Err(error) => {
                tracing::warn!(
                    event = "icon_cache_put_failed",
                    cache_key = key,
                    error = error.to_string()
                );
                self.default_locator()
            }
        }
    }

    fn persist_default(&self, key: &str) -> String {
        match fs::read(&self.default_icon) {
            Ok(bytes) => self.persist(key, &bytes),
            Err(error) => {
                tracing::warn!(
                    event = "icon_default_unreadable",
                    path = %self.default_icon.display(),
                    error = error.to_string()
                );
                self.default_locator()
            }
        }
    }

    fn memory_get(&self, key: &str) -> Option<String> {
        self.memory
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned()
    }

    fn memory_put(&self, key: &str, locator: &str) {
        self.memory
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key.to_string(), locator.to_string());
    }
}

/// Deterministic digest over the normalized source and icon index. Records
/// sharing an icon source (common for suite installers) share the entry.
pub fn cache_key(source: &str, index: u32) -> String {
    let normalized = normalize_source_key(source);
    blake3::hash(format!("{normalized}:{index}").as_bytes())
        .to_hex()
        .to_string()
}

fn normalize_source_key(source: &str) -> String {
    let trimmed = source.trim();
    #[cfg(target_os = "windows")]
    {
        trimmed.replace('/', "\\").to_ascii_lowercase()
    }
    #[cfg(not(target_os = "windows"))]
    {
        trimmed.to_string()
    }
}

/// Locator consumable by the presentation layer without knowledge of the
/// storage layout.
fn file_locator(path: impl AsRef<Path>) -> String {
    format!(
        "{ICON_PROTOCOL}{}",
        urlencoding::encode(path.as_ref().to_string_lossy().as_ref())
    )
}

#[cfg(test)]
#[path = "../../tests/app/icon_service_tests.rs"]
mod icon_service_tests;
