use crate::app::fs_probe::FsProbe;
use crate::core::models::ParsedCommand;

const EXE_MARKER: &str = ".exe";

/// Best-effort split of a raw uninstall command line into an executable path
/// and its argument tail. Third-party installers write these strings with
/// every quoting mistake imaginable, so the splitter prefers recovery over
/// strictness: it accepts the longest prefix that actually exists on disk and
/// returns `None` instead of erroring when nothing can be resolved.
///
/// A quoted prefix whose candidate path does not exist falls through to the
/// unquoted marker scan over the raw string.
pub fn split_command_line(raw: &str, probe: &dyn FsProbe) -> Option<ParsedCommand> {
    if let Some(parsed) = quoted_prefix(raw, probe) {
        return Some(parsed);
    }
    marker_scan(raw, probe)
}

fn quoted_prefix(raw: &str, probe: &dyn FsProbe) -> Option<ParsedCommand> {
    let rest = raw.strip_prefix('"')?;
    let end = rest.find('"')?;
    let candidate = &rest[..end];
    if candidate.is_empty() || !probe.exists(candidate) {
        return None;
    }
    Some(ParsedCommand {
        path: candidate.to_string(),
        args: rest[end + 1..].trim().to_string(),
    })
}

fn marker_scan(raw: &str, probe: &dyn FsProbe) -> Option<ParsedCommand> {
    let marker = find_exe_marker(raw)?;
    let split = marker + EXE_MARKER.len();
    let path_part = &raw[..split];

    if probe.exists(path_part) {
        return Some(ParsedCommand {
            path: path_part.to_string(),
            args: raw[split..].trim().to_string(),
        });
    }

    backtrack(raw, path_part, probe)
}

/// Walk the candidate back one path-separator boundary at a time, longest
/// prefix first, accepting a prefix that exists and still ends with the
/// executable marker. Handles both separator styles in one pass.
fn backtrack(raw: &str, path_part: &str, probe: &dyn FsProbe) -> Option<ParsedCommand> {
    let mut end = path_part.len();
    while let Some(cut) = path_part[..end].rfind(['\\', '/']) {
        if cut == 0 {
            break;
        }
        let candidate = &path_part[..cut];
        if ends_with_exe_marker(candidate) && probe.exists(candidate) {
            return Some(ParsedCommand {
                path: candidate.to_string(),
                args: raw[candidate.len()..].trim().to_string(),
            });
        }
        end = cut;
    }
    None
}

fn find_exe_marker(raw: &str) -> Option<usize> {
    raw.as_bytes()
        .windows(EXE_MARKER.len())
        .position(|window| window.eq_ignore_ascii_case(EXE_MARKER.as_bytes()))
}

fn ends_with_exe_marker(candidate: &str) -> bool {
    let bytes = candidate.as_bytes();
    bytes.len() >= EXE_MARKER.len()
        && bytes[bytes.len() - EXE_MARKER.len()..].eq_ignore_ascii_case(EXE_MARKER.as_bytes())
}

#[cfg(test)]
#[path = "../../tests/app/uninstall_command_tests.rs"]
mod uninstall_command_tests;
