use chrono::{DateTime, Local};
use std::fs;
use std::path::PathBuf;

pub fn resolve_path(path_str: &str) -> Result<PathBuf, String> {
    let resolved_path = if path_str.starts_with("~") {
        let expanded_str = shellexpand::tilde(path_str);
        PathBuf::from(expanded_str.to_string())
    } else {
        PathBuf::from(path_str)
    };

    if resolved_path.exists() {
        fs::canonicalize(&resolved_path).map_err(|e| format!("Could not canonicalize path: {}", e))
    } else {
        Ok(resolved_path)
    }
}

/// Timestamp used in dump names and remote backup locations.
pub fn backup_timestamp(now: DateTime<Local>) -> String {
    now.format("%Y_%m_%d_%H_%M_%S").to_string()
}

/// `dump_YYYY_MM_DD_hh_mm_ss.sql`
pub fn dump_file_name(now: DateTime<Local>) -> String {
    format!("dump_{}.sql", backup_timestamp(now))
}

/// `backup/<databaseType>_<databaseName>/<fileName>`
pub fn object_key(db_type: &str, database_name: &str, file_name: &str) -> String {
    format!("backup/{}_{}/{}", db_type, database_name, file_name)
}
