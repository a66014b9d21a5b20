//! Append-only JSON results store.
//!
//! Results live in a single JSON array file so historical records stay
//! trivially parsable; the record format itself only ever evolves
//! additively.

use meshbench_core::domain::{Result, ResultRecord};
use std::path::Path;
use tracing::debug;

/// Append a record to the results file, creating it (and its parent
/// directory) when missing.
pub fn append_result(path: &Path, record: &ResultRecord) -> Result<()> {
    let mut records = if path.exists() {
        load_results(path)?
    } else {
        Vec::new()
    };
    records.push(record.clone());

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, serde_json::to_string_pretty(&records)?)?;
    debug!(path = %path.display(), total = records.len(), "result appended");
    Ok(())
}

/// Load every record from a results file.
pub fn load_results(path: &Path) -> Result<Vec<ResultRecord>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ChallengeEngine;
    use crate::fakes::{ScriptedInstance, ScriptedSandbox};
    use crate::simulator::SourceSet;
    use meshbench_core::domain::{Level, Role};
    use std::sync::Arc;

    async fn sample_record() -> ResultRecord {
        let sandbox = Arc::new(
            ScriptedSandbox::new().with_role(Role::Source, ScriptedInstance::silent),
        );
        ChallengeEngine::new(sandbox)
            .evaluate("test-model", Level::Echo, &SourceSet::single("handler"))
            .await
    }

    #[tokio::test]
    async fn test_append_creates_and_accumulates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("evaluation").join("results.json");

        let record = sample_record().await;
        append_result(&path, &record).expect("first append");
        append_result(&path, &record).expect("second append");

        let records = load_results(&path).expect("load");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].model, "test-model");
    }

    #[tokio::test]
    async fn test_roundtrip_preserves_fields() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("results.json");

        let record = sample_record().await;
        append_result(&path, &record).expect("append");
        let records = load_results(&path).expect("load");

        assert_eq!(records[0], record);
    }
}
