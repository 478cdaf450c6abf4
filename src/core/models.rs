use serde::{Deserialize, Serialize};

/// One row of the software inventory, exactly as the external enumerator
/// reports it (PascalCase fields come from the registry property names).
/// Immutable after ingestion; a fresh snapshot replaces the whole set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InstalledApp {
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub display_version: String,
    #[serde(default)]
    pub publisher: String,
    /// Raw `YYYYMMDD` from the registry; reformatted to `YYYY-MM-DD` at
    /// ingestion, empty stays empty.
    #[serde(default)]
    pub install_date: String,
    #[serde(default)]
    pub uninstall_string: String,
    #[serde(default)]
    pub install_location: String,
    #[serde(default)]
    pub display_icon: String,
    #[serde(default)]
    pub registry_key: String,
    /// Assigned sequentially at ingestion (`app-<index>`); stable only within
    /// one inventory snapshot.
    #[serde(rename = "appId", default)]
    pub app_id: String,
}

/// JSON envelope printed by the enumerator executable.
#[derive(Debug, Clone, Deserialize)]
pub struct InventoryEnvelope {
    pub success: bool,
    #[serde(default)]
    pub apps: Option<Vec<InstalledApp>>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Result of splitting a raw uninstall command line. `path` existed on the
/// filesystem at parse time; `args` is the raw trailing text, possibly empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub path: String,
    pub args: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvalidAppKind {
    /// Registry metadata survives an install directory that is gone.
    Registry,
    /// Uninstall command cannot be resolved to an existing executable.
    Uninstaller,
    /// Residual program data left behind on disk.
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemediationAction {
    ClearRegistryEntry,
    ForceRemove,
    DeleteFiles,
}

impl RemediationAction {
    pub fn label(self) -> &'static str {
        match self {
            Self::ClearRegistryEntry => "清理注册表项",
            Self::ForceRemove => "强制移除",
            Self::DeleteFiles => "删除文件",
        }
    }
}

/// One classified problem. `path` is the concrete target the remediation
/// collaborator acts on (a registry key path or a filesystem path), never a
/// display-only string.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidAppDto {
    pub name: String,
    pub kind: InvalidAppKind,
    pub category: String,
    pub details: String,
    pub path: String,
    pub action: RemediationAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidAppsSummaryDto {
    pub registry_count: usize,
    pub file_count: usize,
    pub uninstaller_count: usize,
    /// Placeholder figure, not a filesystem walk. Kept constant on purpose.
    pub total_size: String,
}
