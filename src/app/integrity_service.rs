use crate::app::fs_probe::FsProbe;
use crate::app::uninstall_command::split_command_line;
use crate::core::models::{
    InstalledApp, InvalidAppDto, InvalidAppKind, InvalidAppsSummaryDto, RemediationAction,
};

const PROGRAM_DATA_ROOT: &str = "C:\\ProgramData";
const REGISTRY_HIVE_CATEGORY: &str = "HKEY_LOCAL_MACHINE";
const UNINSTALLER_CATEGORY: &str = "卸载程序";
const PROGRAM_DATA_CATEGORY: &str = "程序数据";
const UNKNOWN_UNINSTALL_PATH: &str = "未知";
/// The aggregate size is a placeholder, not a filesystem walk. The original
/// ships the same constant; computing a real figure would change observable
/// behavior, so it stays a named limitation.
const SUMMARY_TOTAL_SIZE_PLACEHOLDER: &str = "1.2GB";

/// Classify every record of the current snapshot. Pure aside from the
/// injected filesystem probe; a record may contribute zero to three issues.
///
/// Issue order is fully determined by input order: record order first, then
/// registry orphan, broken uninstaller, leftover data within a record.
pub fn check_installed_apps(apps: &[InstalledApp], probe: &dyn FsProbe) -> Vec<InvalidAppDto> {
    let mut invalid = Vec::new();
    for app in apps {
        invalid.extend(check_registry_orphan(app, probe));
        invalid.extend(check_broken_uninstaller(app, probe));
        invalid.extend(check_leftover_data(app, probe));
    }
    tracing::info!(
        event = "integrity_check_finished",
        apps = apps.len(),
        issues = invalid.len()
    );
    invalid
}

/// Registry metadata still present while the install directory is gone.
fn check_registry_orphan(app: &InstalledApp, probe: &dyn FsProbe) -> Option<InvalidAppDto> {
    if app.install_location.is_empty() || probe.exists(&app.install_location) {
        return None;
    }
    Some(InvalidAppDto {
        name: app.display_name.clone(),
        kind: InvalidAppKind::Registry,
        category: REGISTRY_HIVE_CATEGORY.to_string(),
        details: format!(
            "{} 的注册表项仍然存在，但安装目录已不存在",
            app.display_name
        ),
        path: app.registry_key.clone(),
        action: RemediationAction::ClearRegistryEntry,
    })
}

/// Uninstall command that is empty, unparseable, or points at a file that no
/// longer exists.
fn check_broken_uninstaller(app: &InstalledApp, probe: &dyn FsProbe) -> Option<InvalidAppDto> {
    let resolved = split_command_line(&app.uninstall_string, probe);
    let broken = app.uninstall_string.is_empty()
        || match resolved {
            None => true,
            Some(parsed) => !probe.exists(&parsed.path),
        };
    if !broken {
        return None;
    }
    let path = if app.uninstall_string.is_empty() {
        UNKNOWN_UNINSTALL_PATH.to_string()
    } else {
        app.uninstall_string.clone()
    };
    Some(InvalidAppDto {
        name: app.display_name.clone(),
        kind: InvalidAppKind::Uninstaller,
        category: UNINSTALLER_CATEGORY.to_string(),
        details: "卸载程序文件不存在或已损坏".to_string(),
        path,
        action: RemediationAction::ForceRemove,
    })
}

/// Residual program data under the fixed ProgramData root.
fn check_leftover_data(app: &InstalledApp, probe: &dyn FsProbe) -> Option<InvalidAppDto> {
    let leftover_path = format!(
        "{PROGRAM_DATA_ROOT}\\{}\\{}",
        app.publisher, app.display_name
    );
    if !probe.exists(&leftover_path) {
        return None;
    }
    Some(InvalidAppDto {
        name: app.display_name.clone(),
        kind: InvalidAppKind::File,
        category: PROGRAM_DATA_CATEGORY.to_string(),
        details: "发现已卸载软件的残留文件和文件夹".to_string(),
        path: leftover_path,
        action: RemediationAction::DeleteFiles,
    })
}

/// Counts derive from the issue list; the size figure is the documented
/// placeholder.
pub fn summarize_invalid_apps(invalid: &[InvalidAppDto]) -> InvalidAppsSummaryDto {
    let count_of = |kind: InvalidAppKind| invalid.iter().filter(|item| item.kind == kind).count();
    InvalidAppsSummaryDto {
        registry_count: count_of(InvalidAppKind::Registry),
        file_count: count_of(InvalidAppKind::File),
        uninstaller_count: count_of(InvalidAppKind::Uninstaller),
        total_size: SUMMARY_TOTAL_SIZE_PLACEHOLDER.to_string(),
    }
}

#[cfg(test)]
#[path = "../../tests/app/integrity_service_tests.rs"]
mod integrity_service_tests;
