//! CT policy: obtain SCTs from two distinct log operators.
//!
//! One submission task runs per operator group, with task i held back by
//! (i-1) * stagger so the leading pair races immediately and the rest only
//! spend log quota when the leaders are slow. The first two successes from
//! distinct groups win; everything still in flight is cancelled.

pub mod client;

use crate::config::{CtConfig, CtLogConfig};
use crate::error::{CaError, Result};
use crate::metrics::SharedMetrics;
use jiff::Timestamp;
use rand::seq::{IndexedRandom, SliceRandom};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

pub use client::{HttpLogClient, LogClient, MockLogClient, Sct, encode_sct_list};

pub struct CtPolicy {
    config: CtConfig,
    client: Arc<dyn LogClient>,
    metrics: SharedMetrics,
}

impl CtPolicy {
    pub fn new(config: CtConfig, client: Arc<dyn LogClient>, metrics: SharedMetrics) -> Self {
        Self {
            config,
            client,
            metrics,
        }
    }

    /// Pick, per group, one log whose temporal shard covers the
    /// certificate's notAfter.
    fn eligible_logs(&self, not_after: Timestamp) -> Vec<(String, CtLogConfig)> {
        let mut rng = rand::rng();
        let mut picks = Vec::new();
        for group in &self.config.groups {
            let covering: Vec<&CtLogConfig> = group
                .logs
                .iter()
                .filter(|log| log.start_inclusive <= not_after && not_after < log.end_exclusive)
                .collect();
            if let Some(log) = covering.choose(&mut rng) {
                picks.push((group.name.clone(), (*log).clone()));
            } else {
                tracing::warn!(
                    group = %group.name,
                    %not_after,
                    "no log in group covers the certificate lifetime"
                );
            }
        }
        picks.shuffle(&mut rng);
        picks
    }

    /// Collect two SCTs from distinct operator groups for a
    /// precertificate chain (leaf first).
    pub async fn get_scts(
        &self,
        precert_chain: Vec<Vec<u8>>,
        not_after: Timestamp,
    ) -> Result<Vec<Sct>> {
        let picks = self.eligible_logs(not_after);
        if picks.len() < 2 {
            return Err(CaError::missing_scts(format!(
                "only {} operator group(s) have a log covering notAfter {}",
                picks.len(),
                not_after
            )));
        }

        let stagger = Duration::from_millis(self.config.stagger_ms);
        let started = std::time::Instant::now();
        let mut tasks: JoinSet<(String, Result<Sct>)> = JoinSet::new();
        for (index, (group, log)) in picks.into_iter().enumerate() {
            let client = self.client.clone();
            let chain = precert_chain.clone();
            let delay = stagger * index.saturating_sub(1) as u32;
            tasks.spawn(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let outcome = client.submit_precert(&log, &chain).await;
                (group, outcome)
            });
        }

        let mut scts = Vec::with_capacity(2);
        let mut failures = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let (group, outcome) = match joined {
                Ok(result) => result,
                Err(e) => {
                    failures.push(format!("submission task failed: {}", e));
                    continue;
                }
            };
            match outcome {
                Ok(sct) => {
                    tracing::debug!(group = %group, "SCT received");
                    scts.push(sct);
                    if scts.len() == 2 {
                        // dropping the set cancels the stragglers
                        drop(tasks);
                        self.metrics
                            .sct_latency
                            .observe(started.elapsed().as_secs_f64());
                        return Ok(scts);
                    }
                }
                Err(e) => failures.push(format!("group {}: {}", group, e)),
            }
        }
        Err(CaError::missing_scts(format!(
            "got {} of 2 SCTs; failures: [{}]",
            scts.len(),
            failures.join("; ")
        )))
    }

    /// Fire-and-forget submissions of a precertificate to the
    /// informational logs.
    pub fn submit_info_logs(&self, precert_chain: Vec<Vec<u8>>, not_after: Timestamp) {
        self.best_effort(&self.config.info_logs, precert_chain, not_after, false);
    }

    /// Fire-and-forget submissions of the final certificate.
    pub fn submit_final_cert(&self, final_chain: Vec<Vec<u8>>, not_after: Timestamp) {
        self.best_effort(&self.config.final_logs, final_chain, not_after, true);
    }

    fn best_effort(
        &self,
        logs: &[CtLogConfig],
        chain: Vec<Vec<u8>>,
        not_after: Timestamp,
        is_final: bool,
    ) {
        for log in logs {
            if !(log.start_inclusive <= not_after && not_after < log.end_exclusive) {
                continue;
            }
            let client = self.client.clone();
            let log = log.clone();
            let chain = chain.clone();
            tokio::spawn(async move {
                let outcome = if is_final {
                    client.submit_final(&log, &chain).await
                } else {
                    client.submit_precert(&log, &chain).await
                };
                if let Err(e) = outcome {
                    tracing::warn!(log = %log.url, "best-effort CT submission failed: {}", e);
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CtGroupConfig;
    use crate::metrics::MetricsRegistry;

    fn log(url: &str) -> CtLogConfig {
        CtLogConfig {
            url: url.to_string(),
            key: "bG9nLWtleQ==".to_string(),
            start_inclusive: "2020-01-01T00:00:00Z".parse().unwrap(),
            end_exclusive: "2030-01-01T00:00:00Z".parse().unwrap(),
        }
    }

    fn config(groups: &[(&str, &str)]) -> CtConfig {
        CtConfig {
            groups: groups
                .iter()
                .map(|(name, url)| CtGroupConfig {
                    name: name.to_string(),
                    logs: vec![log(url)],
                })
                .collect(),
            stagger_ms: 20,
            info_logs: vec![],
            final_logs: vec![],
        }
    }

    fn policy(config: CtConfig, client: MockLogClient) -> CtPolicy {
        CtPolicy::new(config, Arc::new(client), Arc::new(MetricsRegistry::new()))
    }

    fn not_after() -> Timestamp {
        "2026-01-01T00:00:00Z".parse().unwrap()
    }

    #[tokio::test]
    async fn two_distinct_groups_win() {
        let policy = policy(
            config(&[("argon", "https://argon/1"), ("nimbus", "https://nimbus/1")]),
            MockLogClient::new(),
        );
        let scts = policy.get_scts(vec![vec![0x30]], not_after()).await.unwrap();
        assert_eq!(scts.len(), 2);
        assert_ne!(scts[0].log_id, scts[1].log_id);
    }

    #[tokio::test]
    async fn slow_leader_is_replaced_by_later_group() {
        let client = MockLogClient::new().delay("https://argon/1", Duration::from_secs(30));
        let policy = policy(
            config(&[
                ("argon", "https://argon/1"),
                ("nimbus", "https://nimbus/1"),
                ("sabre", "https://sabre/1"),
            ]),
            client,
        );
        let scts = tokio::time::timeout(
            Duration::from_secs(5),
            policy.get_scts(vec![vec![0x30]], not_after()),
        )
        .await
        .expect("should finish well before the slow log")
        .unwrap();
        assert_eq!(scts.len(), 2);
    }

    #[tokio::test]
    async fn all_failures_reported_per_group() {
        let client = MockLogClient::new()
            .fail("https://argon/1")
            .fail("https://nimbus/1");
        let policy = policy(
            config(&[("argon", "https://argon/1"), ("nimbus", "https://nimbus/1")]),
            client,
        );
        let err = policy.get_scts(vec![vec![0x30]], not_after()).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::MissingScts);
        let detail = err.to_string();
        assert!(detail.contains("argon"));
        assert!(detail.contains("nimbus"));
    }

    #[tokio::test]
    async fn one_group_is_not_enough() {
        let policy = policy(config(&[("argon", "https://argon/1")]), MockLogClient::new());
        let err = policy.get_scts(vec![vec![0x30]], not_after()).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::MissingScts);
    }

    #[tokio::test]
    async fn temporal_window_filters_logs() {
        let mut config = config(&[("argon", "https://argon/1"), ("nimbus", "https://nimbus/1")]);
        // argon's only log shard ends before our notAfter
        config.groups[0].logs[0].end_exclusive = "2024-01-01T00:00:00Z".parse().unwrap();
        let policy = policy(config, MockLogClient::new());
        let err = policy.get_scts(vec![vec![0x30]], not_after()).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::MissingScts);
    }

    #[tokio::test]
    async fn cancellation_surfaces_as_timeout_for_caller() {
        let client = MockLogClient::new()
            .delay("https://argon/1", Duration::from_secs(10))
            .delay("https://nimbus/1", Duration::from_secs(10));
        let policy = policy(
            config(&[("argon", "https://argon/1"), ("nimbus", "https://nimbus/1")]),
            client,
        );
        let outcome = tokio::time::timeout(
            Duration::from_millis(100),
            policy.get_scts(vec![vec![0x30]], not_after()),
        )
        .await;
        assert!(outcome.is_err());
    }
}
