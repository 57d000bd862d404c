use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::error::{TranscodeError, TranscodeResult};

/// Tenant descriptor carried on every job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ProjectRef {
    #[serde(rename = "$id")]
    #[validate(custom(function = "validate_uid"))]
    pub id: String,
}

/// Message published on the transcoding queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct TranscodeJob {
    #[validate(nested)]
    pub project: ProjectRef,
    #[serde(rename = "videoId")]
    #[validate(custom(function = "validate_uid"))]
    pub video_id: String,
    #[serde(rename = "profileId")]
    #[validate(custom(function = "validate_uid"))]
    pub profile_id: String,
}

impl TranscodeJob {
    pub fn new(project: &str, video_id: &str, profile_id: &str) -> Self {
        Self {
            project: ProjectRef {
                id: project.to_string(),
            },
            video_id: video_id.to_string(),
            profile_id: profile_id.to_string(),
        }
    }

    /// Parses and validates a raw queue payload.
    pub fn from_slice(payload: &[u8]) -> TranscodeResult<Self> {
        let job: TranscodeJob = serde_json::from_slice(payload)
            .map_err(|e| TranscodeError::InvalidJob(e.to_string()))?;
        job.validate()
            .map_err(|e| TranscodeError::InvalidJob(e.to_string()))?;
        Ok(job)
    }

    pub fn project_id(&self) -> &str {
        &self.project.id
    }
}

/// Identifiers end up in workspace paths and storage keys.
pub fn validate_uid(value: &str) -> Result<(), ValidationError> {
    let well_formed = (1..=36).contains(&value.len())
        && value != "."
        && value != ".."
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));

    if well_formed {
        Ok(())
    } else {
        Err(ValidationError::new("uid")
            .with_message("must be 1-36 characters of [A-Za-z0-9._-]".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_job() {
        let job = TranscodeJob::from_slice(
            br#"{"project": {"$id": "console"}, "videoId": "v1", "profileId": "p_720"}"#,
        )
        .unwrap();

        assert_eq!(job, TranscodeJob::new("console", "v1", "p_720"));
        assert_eq!(job.project_id(), "console");
    }

    #[test]
    fn test_rejects_malformed_payload() {
        let err = TranscodeJob::from_slice(br#"{"videoId": "v1"}"#).unwrap_err();
        assert_eq!(err.code(), "invalid_job");
    }

    #[test]
    fn test_rejects_unsafe_ids() {
        for bad in ["..", "a/b", "", "x y"] {
            let payload = serde_json::json!({
                "project": {"$id": "p"},
                "videoId": bad,
                "profileId": "f"
            });
            let raw = serde_json::to_vec(&payload).unwrap();
            assert!(TranscodeJob::from_slice(&raw).is_err(), "{bad:?} accepted");
        }
    }

    #[test]
    fn test_uid_rules() {
        assert!(validate_uid("abc-DEF_1.2").is_ok());
        assert!(validate_uid(&"a".repeat(36)).is_ok());
        assert!(validate_uid(&"a".repeat(37)).is_err());
        assert!(validate_uid(".").is_err());
    }
}
