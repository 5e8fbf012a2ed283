use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use rollcall_store::MemoryBackends;

use crate::error::{io_err, DaemonError};

type Workbook = BTreeMap<String, Vec<Vec<String>>>;

/// Fixture loaded into the in-memory workbooks at startup.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SeedFile {
    pub main: Workbook,
    pub rush: Workbook,
}

impl SeedFile {
    pub fn load(path: &Path) -> Result<SeedFile, DaemonError> {
        let contents = fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Create every table. Returns how many were created.
    pub fn apply(self, backends: &MemoryBackends) -> usize {
        let mut count = 0;
        for (title, rows) in self.main {
            backends.main.seed(&title, rows);
            count += 1;
        }
        for (title, rows) in self.rush {
            backends.rush.seed(&title, rows);
            count += 1;
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::Config;
    use rollcall_store::Context;
    use tempfile::TempDir;

    #[test]
    fn fixture_populates_both_workbooks() {
        let dir = TempDir::new().expect("dir");
        let path = dir.path().join("seed.json");
        fs::write(
            &path,
            r#"{"main": {"Sigma": [["Email","Name","Position"],["a@x","A","Alpha"]]},
                "rush": {"Rush Index": [["ID","Name"]]}}"#,
        )
        .expect("write");

        let (_ctx, backends) = Context::in_memory(Config::default());
        let created = SeedFile::load(&path).expect("load").apply(&backends);
        assert_eq!(created, 2);
        assert_eq!(
            backends.main.snapshot("Sigma").map(|rows| rows.len()),
            Some(2)
        );
        assert_eq!(backends.rush.titles(), vec!["Rush Index".to_string()]);
    }

    #[test]
    fn malformed_fixture_is_a_json_error() {
        let dir = TempDir::new().expect("dir");
        let path = dir.path().join("seed.json");
        fs::write(&path, "{not json").expect("write");
        assert!(matches!(SeedFile::load(&path), Err(DaemonError::Json(_))));
    }
}
