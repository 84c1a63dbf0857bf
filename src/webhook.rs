//! Push event payload

use serde::Deserialize;
use tracing::info;

use crate::error::WebhookError;

const BRANCH_REF_PREFIX: &str = "refs/heads/";

#[derive(Deserialize)]
struct RawPushEvent {
    #[serde(rename = "ref")]
    git_ref: Option<String>,
}

/// The part of a GitHub push event we act on. Everything else in the
/// payload is ignored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushEvent {
    pub git_ref: String,
}

impl PushEvent {
    /// A `null` body or a missing/`null` ref decodes as an empty ref, so
    /// deliveries such as `ping` are simply not branch pushes.
    pub fn from_slice(body: &[u8]) -> Result<Self, WebhookError> {
        let raw: Option<RawPushEvent> = serde_json::from_slice(body).map_err(|e| {
            info!("Could not parse JSON body: {:?}", e);
            WebhookError::BadRequest
        })?;
        Ok(Self {
            git_ref: raw.and_then(|r| r.git_ref).unwrap_or_default(),
        })
    }

    /// Branch name for `refs/heads/<branch>` refs, the raw ref otherwise.
    pub fn branch(&self) -> &str {
        self.git_ref
            .strip_prefix(BRANCH_REF_PREFIX)
            .unwrap_or(&self.git_ref)
    }

    pub fn is_push_to(&self, branch: &str) -> bool {
        self.git_ref
            .strip_prefix(BRANCH_REF_PREFIX)
            .is_some_and(|b| b == branch)
    }
}
