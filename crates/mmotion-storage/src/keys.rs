//! Object key derivation.
//!
//! Keys are opaque strings to the rest of the system; this module is the
//! only place their shape is known. Inputs are staged under `uploads/`,
//! results under `outputs/{job_id}/` so the result key for a job is fully
//! deterministic and written at most once per job.

use mmotion_models::JobId;
use uuid::Uuid;

/// Prefix every staged input key must carry.
pub const UPLOADS_PREFIX: &str = "uploads/";

/// Prefix for result objects.
pub const OUTPUTS_PREFIX: &str = "outputs/";

/// Derive a fresh staging key for submitted bytes.
pub fn input_key(owner: &str, filename: Option<&str>) -> String {
    let name = filename
        .map(sanitize_filename)
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "input".to_string());
    format!("{UPLOADS_PREFIX}{owner}/{}-{name}", Uuid::new_v4())
}

/// Derive the result key for a job. Deterministic per job id.
pub fn result_key(job_id: &JobId) -> String {
    format!("{OUTPUTS_PREFIX}{job_id}/output")
}

/// Check that a client-supplied key points at staged input.
pub fn is_staged_input_key(key: &str) -> bool {
    key.starts_with(UPLOADS_PREFIX) && !key.contains("..") && key.len() > UPLOADS_PREFIX.len()
}

fn sanitize_filename(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_key_deterministic() {
        let id = JobId::from_string("job-9");
        assert_eq!(result_key(&id), "outputs/job-9/output");
        assert_eq!(result_key(&id), result_key(&id));
    }

    #[test]
    fn test_input_key_prefix_and_sanitization() {
        let key = input_key("alice", Some("my page!.png"));
        assert!(key.starts_with("uploads/alice/"));
        assert!(key.ends_with("-mypage.png"));
        assert!(is_staged_input_key(&key));
    }

    #[test]
    fn test_staged_key_validation() {
        assert!(is_staged_input_key("uploads/alice/abc-input.png"));
        assert!(!is_staged_input_key("outputs/job-1/output"));
        assert!(!is_staged_input_key("uploads/"));
        assert!(!is_staged_input_key("uploads/../secrets"));
    }
}
