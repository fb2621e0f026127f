//! JSON report output.

use std::path::Path;

use serde::Serialize;

/// Pretty-print `report` to `path`, creating parent directories.
pub fn write_report<T: Serialize>(path: &Path, report: &T) -> Result<(), String> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|error| {
            format!("report_dir_create_failed path={} error={error}", parent.display())
        })?;
    }
    let payload = serde_json::to_vec_pretty(report)
        .map_err(|error| format!("report_serialize_failed error={error}"))?;
    std::fs::write(path, payload)
        .map_err(|error| format!("report_write_failed path={} error={error}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::PowerSweepConfig;

    #[test]
    fn writes_nested_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/report.json");
        let config = PowerSweepConfig::default();
        write_report(&path, &config).unwrap();
        let back: PowerSweepConfig =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(back, config);
    }
}
