use crate::core::models::{InstalledApp, InventoryEnvelope};
use crate::core::{AppError, AppResult, ResultExt};
use std::path::PathBuf;
use std::process::Command;

/// Boundary to the external enumerator. It supplies the full, unfiltered
/// record set for one snapshot; this core never schedules the enumeration.
pub trait InventoryProvider: Send + Sync {
    fn fetch_raw(&self) -> AppResult<String>;
}

/// Provider invoking the enumerator executable and returning its stdout.
pub struct CommandInventoryProvider {
    program: PathBuf,
}

impl CommandInventoryProvider {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl InventoryProvider for CommandInventoryProvider {
    fn fetch_raw(&self) -> AppResult<String> {
        let output = Command::new(&self.program)
            .output()
            .with_code("inventory_exec_failed", "执行应用清单程序失败")
            .with_ctx("program", self.program.to_string_lossy())?;
        if !output.status.success() {
            return Err(AppError::new("inventory_source_failed", "获取应用列表失败")
                .with_context("status", output.status.to_string())
                .with_cause(String::from_utf8_lossy(&output.stderr).trim().to_string()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Load one inventory snapshot: parse the enumerator envelope, format install
/// dates and assign sequential ids. Enumeration failure is the only hard
/// error this core propagates to its caller.
pub fn load_installed_apps(provider: &dyn InventoryProvider) -> AppResult<Vec<InstalledApp>> {
    tracing::info!(event = "inventory_fetch_started");
    let raw = provider.fetch_raw()?;

    let envelope: InventoryEnvelope = serde_json::from_str(raw.trim())
        .with_code("inventory_parse_failed", "解析应用清单失败")?;
    if !envelope.success {
        return Err(
            AppError::new("inventory_source_failed", "获取应用列表失败")
                .with_cause(envelope.error.unwrap_or_default()),
        );
    }

    let mut apps = envelope.apps.unwrap_or_default();
    for (index, app) in apps.iter_mut().enumerate() {
        app.install_date = format_install_date(&app.install_date);
        app.app_id = format!("app-{index}");
    }

    tracing::info!(event = "inventory_loaded", count = apps.len());
    Ok(apps)
}

/// `YYYYMMDD` becomes `YYYY-MM-DD`; empty stays empty, anything else passes
/// through unchanged.
fn format_install_date(raw: &str) -> String {
    if raw.len() == 8 && raw.bytes().all(|byte| byte.is_ascii_digit()) {
        return format!("{}-{}-{}", &raw[0..4], &raw[4..6], &raw[6..8]);
    }
    raw.to_string()
}

#[cfg(test)]
#[path = "../../tests/app/inventory_service_tests.rs"]
mod inventory_service_tests;
