//! Compute requests and their coalescing identity.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use eco_common::{IndexKind, IndexRequest, RasterImage};

/// A request to compute indices for one image.
#[derive(Debug, Clone)]
pub struct ComputeRequest {
    pub image: RasterImage,
    pub indices: IndexRequest,
    /// Overrides the configured default deadline
    pub deadline: Option<Duration>,
}

impl ComputeRequest {
    pub fn new(image: RasterImage, indices: IndexRequest) -> Self {
        Self {
            image,
            indices,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Outcome of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub task_id: Uuid,
    /// Joined an identical pending or running task
    pub coalesced: bool,
}

/// Identity of a request: image, requested kinds and parameter signature.
///
/// The requested set is used rather than its expansion: `{rsei}` may reuse
/// stored components while `{heat, rsei}` must produce a heat result, so the
/// two are different work.
pub fn task_signature(image_id: Uuid, requested: &[IndexKind], parameters: &str) -> String {
    let mut kinds: Vec<&str> = requested.iter().map(|k| k.as_str()).collect();
    kinds.sort_unstable();
    kinds.dedup();
    format!("{}:{}:{}", image_id, kinds.join(","), parameters)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(names: &[&str]) -> Vec<IndexKind> {
        IndexRequest::parse(names).unwrap().kinds().collect()
    }

    #[test]
    fn test_signature_uses_requested_set() {
        let image = Uuid::nil();
        assert_ne!(
            task_signature(image, &kinds(&["rsei"]), "abc"),
            task_signature(image, &kinds(&["heat", "rsei"]), "abc")
        );
        assert_eq!(
            task_signature(image, &kinds(&["rsei", "ndvi"]), "abc"),
            task_signature(image, &kinds(&["ndvi", "rsei"]), "abc")
        );
        assert_ne!(
            task_signature(image, &kinds(&["rsei"]), "abc"),
            task_signature(image, &kinds(&["rsei"]), "abd")
        );
    }
}
