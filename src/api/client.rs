//! Client for the upstream activity counter API.
//!
//! Fetches per-group cumulative snapshots. The upstream is assumed to be
//! partially unreliable: ranked metadata may be missing, member arrays may be
//! truncated, and 429/5xx responses are routine. Every call runs under the
//! shared retry policy and may go out through a rotated egress path.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::models::Member;
use crate::proxy::ProxyRotation;
use crate::retry::RetryPolicy;

use super::UpstreamError;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
/// 30s allows for slow upstream responses while failing fast enough that a
/// batch pass over many groups cannot hang on one of them.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// One group's snapshot as upstream reports it, after validation.
#[derive(Debug, Clone)]
pub struct UpstreamGroup {
    pub group_id: u64,
    pub name: Option<String>,
    /// Ranked metadata; upstream sometimes omits it.
    pub rank: Option<u32>,
    pub members: Vec<Member>,
}

// Wire types, kept private: everything downstream sees validated models.

#[derive(Debug, Deserialize)]
struct GroupActivityResponse {
    #[serde(default)]
    group: Option<GroupMetaRaw>,
    members: Vec<MemberRaw>,
}

#[derive(Debug, Deserialize)]
struct GroupMetaRaw {
    name: Option<String>,
    rank: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct MemberRaw {
    id: Option<u64>,
    #[serde(rename = "displayName")]
    display_name: Option<String>,
    #[serde(rename = "cumulativeCounts", default)]
    cumulative_counts: Vec<u64>,
}

/// Client for the upstream activity API.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
pub struct UpstreamClient {
    client: Client,
    base_url: String,
    policy: RetryPolicy,
    proxies: ProxyRotation,
}

impl UpstreamClient {
    pub fn new(
        base_url: String,
        policy: RetryPolicy,
        proxies: ProxyRotation,
    ) -> Result<Self, UpstreamError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            policy,
            proxies,
        })
    }

    /// Fetch one group's cumulative snapshot, retrying transient failures
    /// with backoff and a fresh egress path per attempt.
    pub async fn fetch_group(&mut self, group_id: u64) -> Result<UpstreamGroup, UpstreamError> {
        let url = format!("{}/groups/{}/activity", self.base_url, group_id);
        let base_client = self.client.clone();
        let proxies = &mut self.proxies;

        let outcome = self
            .policy
            .run(
                "fetch group activity",
                |attempt| {
                    let client = match proxies.next_proxy() {
                        Some(proxy) => Self::proxied_client(proxy).unwrap_or_else(|| {
                            warn!(proxy, "could not build proxied client, going direct");
                            base_client.clone()
                        }),
                        None => base_client.clone(),
                    };
                    let url = url.clone();
                    async move {
                        debug!(url = %url, attempt, "fetching group snapshot");
                        Self::get_group(&client, &url).await
                    }
                },
                UpstreamError::is_retryable,
            )
            .await;

        let response = outcome.into_result()?;
        Ok(Self::validate(group_id, response))
    }

    async fn get_group(
        client: &Client,
        url: &str,
    ) -> Result<GroupActivityResponse, UpstreamError> {
        let response = client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                UpstreamError::Timeout
            } else {
                UpstreamError::Network(e)
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::from_status(status, &body));
        }

        let text = response.text().await.map_err(UpstreamError::Network)?;
        serde_json::from_str(&text).map_err(|e| {
            UpstreamError::DataInvalid(format!("unparseable group payload: {}", e))
        })
    }

    /// Drop members missing required fields instead of failing the whole
    /// group; upstream truncation is routine and a partial roster is still
    /// a usable roster.
    fn validate(group_id: u64, raw: GroupActivityResponse) -> UpstreamGroup {
        let mut members = Vec::with_capacity(raw.members.len());
        for m in raw.members {
            match (m.id, m.display_name) {
                (Some(id), Some(display_name)) if !display_name.is_empty() => {
                    members.push(Member {
                        id,
                        display_name,
                        cumulative: m.cumulative_counts,
                    });
                }
                (id, _) => {
                    warn!(group_id, member_id = ?id, "skipping member with missing fields");
                }
            }
        }

        let (name, rank) = match raw.group {
            Some(meta) => (meta.name, meta.rank),
            None => (None, None),
        };
        if rank.is_none() {
            debug!(group_id, "upstream omitted ranked metadata");
        }

        UpstreamGroup {
            group_id,
            name,
            rank,
            members,
        }
    }

    fn proxied_client(proxy_url: &str) -> Option<Client> {
        let proxy = reqwest::Proxy::all(proxy_url).ok()?;
        Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .proxy(proxy)
            .build()
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_skips_incomplete_members() {
        let raw = GroupActivityResponse {
            group: Some(GroupMetaRaw {
                name: Some("Club".into()),
                rank: Some(3),
            }),
            members: vec![
                MemberRaw {
                    id: Some(1),
                    display_name: Some("Alice".into()),
                    cumulative_counts: vec![100, 200],
                },
                MemberRaw {
                    id: None,
                    display_name: Some("Ghost".into()),
                    cumulative_counts: vec![],
                },
                MemberRaw {
                    id: Some(3),
                    display_name: None,
                    cumulative_counts: vec![5],
                },
            ],
        };

        let group = UpstreamClient::validate(9, raw);
        assert_eq!(group.group_id, 9);
        assert_eq!(group.rank, Some(3));
        assert_eq!(group.members.len(), 1);
        assert_eq!(group.members[0].display_name, "Alice");
    }

    #[test]
    fn test_parse_payload_with_missing_metadata() {
        let json = r#"{
            "members": [
                {"id": 11, "displayName": "A", "cumulativeCounts": [0, 1500]},
                {"id": 12, "displayName": "B"}
            ]
        }"#;
        let parsed: GroupActivityResponse = serde_json::from_str(json).unwrap();
        let group = UpstreamClient::validate(4, parsed);
        assert_eq!(group.name, None);
        assert_eq!(group.rank, None);
        assert_eq!(group.members.len(), 2);
        assert_eq!(group.members[0].cumulative, vec![0, 1500]);
        // Truncated member arrays are tolerated as empty series.
        assert!(group.members[1].cumulative.is_empty());
    }

    #[test]
    fn test_missing_members_field_is_invalid() {
        let parsed = serde_json::from_str::<GroupActivityResponse>(r#"{"group": {}}"#);
        assert!(parsed.is_err());
    }
}
