use crate::models::Task;
use crate::SyncResult;
use sha2::{Digest, Sha256};

/// SHA-256 of the task's JSON encoding, hex encoded.
///
/// Sent alongside every upsert so the server can detect payloads mangled in
/// transit before they overwrite its copy.
pub fn task_checksum(task: &Task) -> SyncResult<String> {
    let json = serde_json::to_vec(task)?;
    let mut hasher = Sha256::new();
    hasher.update(&json);
    Ok(hex::encode(hasher.finalize()))
}

pub fn verify_checksum(task: &Task, expected: &str) -> SyncResult<bool> {
    Ok(task_checksum(task)?.eq_ignore_ascii_case(expected))
}
