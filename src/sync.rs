//! Batch synchronization driver.
//!
//! One pass walks the configured groups sequentially with a small delay
//! between them, running the full pipeline per group: fetch snapshot, roll
//! the ledger over the calendar boundary if needed, recompute every current
//! row from upstream truth, write the table, refresh the cache. Failures are
//! contained per group and retried in bounded rounds; one broken group never
//! blocks the rest of the batch.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate};
use tracing::{debug, info, warn};

use crate::api::UpstreamClient;
use crate::archive::{self, RolloverOutcome};
use crate::cache::SmartCache;
use crate::config::GroupConfig;
use crate::delta::daily_gains;
use crate::models::{
    GroupSnapshot, LedgerRow, LedgerTable, Member, MonthSection, TransferIndex, TransferRecord,
};
use crate::period::Period;
use crate::quota::QuotaProfile;
use crate::reconcile;
use crate::retry::RetryPolicy;
use crate::store::{schema, FileLedgerStore, StoreError};

// ============================================================================
// Constants
// ============================================================================

/// Bounded retry rounds per pass: one initial walk plus two more over the
/// groups that failed.
const MAX_ROUNDS: u32 = 3;

/// Base delay before a retry round; the second round waits twice this.
const ROUND_DELAY_SECS: u64 = 30;

/// Per-group update cooldown throttle.
///
/// A plain map of last-update instants, constructed by the caller and handed
/// to the orchestrator. A group updated more recently than the minimum
/// interval is skipped for the rest of the pass.
pub struct CooldownTracker {
    min_interval: Duration,
    last_update: HashMap<String, Instant>,
}

impl CooldownTracker {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_update: HashMap::new(),
        }
    }

    /// Whether enough time has passed since the group's last marked update.
    pub fn ready(&self, group: &str) -> bool {
        match self.last_update.get(group) {
            Some(at) => at.elapsed() >= self.min_interval,
            None => true,
        }
    }

    pub fn mark(&mut self, group: &str) {
        self.last_update.insert(group.to_string(), Instant::now());
    }
}

/// Per-group result of one pass.
#[derive(Debug)]
pub enum GroupOutcome {
    Synced {
        members: usize,
        departed: usize,
        rollover: RolloverOutcome,
        attempts: u32,
    },
    SkippedCooldown,
    Failed { attempts: u32, error: String },
}

#[derive(Debug)]
pub struct GroupReport {
    pub group: String,
    pub outcome: GroupOutcome,
}

#[derive(Debug, Default)]
pub struct SyncReport {
    pub groups: Vec<GroupReport>,
    pub rounds: u32,
}

impl SyncReport {
    pub fn failed_groups(&self) -> Vec<&str> {
        self.groups
            .iter()
            .filter(|r| matches!(r.outcome, GroupOutcome::Failed { .. }))
            .map(|r| r.group.as_str())
            .collect()
    }
}

/// Owns every collaborator a pass needs. All state is explicit and injected
/// at construction; nothing here is process-global.
pub struct SyncOrchestrator {
    client: UpstreamClient,
    store: FileLedgerStore,
    cache: SmartCache,
    groups: Vec<GroupConfig>,
    cooldown: CooldownTracker,
    transfers: TransferIndex,
    write_policy: RetryPolicy,
    inter_group_delay: Duration,
}

impl SyncOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: UpstreamClient,
        store: FileLedgerStore,
        cache: SmartCache,
        groups: Vec<GroupConfig>,
        cooldown: CooldownTracker,
        transfers: TransferIndex,
        write_policy: RetryPolicy,
        inter_group_delay: Duration,
    ) -> Self {
        Self {
            client,
            store,
            cache,
            groups,
            cooldown,
            transfers,
            write_policy,
            inter_group_delay,
        }
    }

    pub fn cache_mut(&mut self) -> &mut SmartCache {
        &mut self.cache
    }

    pub fn store(&self) -> &FileLedgerStore {
        &self.store
    }

    /// Run one full pass over every configured group as of `today`.
    pub async fn run_pass(&mut self, today: NaiveDate) -> SyncReport {
        let mut report = SyncReport::default();
        self.seed_transfer_index(today);

        let mut pending: Vec<GroupConfig> = self.groups.clone();
        let mut round = 0;

        while !pending.is_empty() && round < MAX_ROUNDS {
            round += 1;
            if round > 1 {
                let delay = Duration::from_secs(ROUND_DELAY_SECS * (round as u64 - 1));
                info!(round, failed = pending.len(), delay_secs = delay.as_secs(), "retry round");
                tokio::time::sleep(delay).await;
            }

            let mut still_failing = Vec::new();
            for group in pending {
                if !self.cooldown.ready(&group.name) {
                    debug!(group = %group.name, "within cooldown, skipping");
                    report.groups.push(GroupReport {
                        group: group.name.clone(),
                        outcome: GroupOutcome::SkippedCooldown,
                    });
                    continue;
                }

                match self.run_group(&group, today).await {
                    Ok(outcome) => {
                        self.cooldown.mark(&group.name);
                        // Drop the stale report entry from an earlier round.
                        report.groups.retain(|r| r.group != group.name);
                        report.groups.push(GroupReport {
                            group: group.name.clone(),
                            outcome,
                        });
                    }
                    Err(e) => {
                        warn!(group = %group.name, round, error = %format!("{e:#}"), "group sync failed");
                        report.groups.retain(|r| r.group != group.name);
                        report.groups.push(GroupReport {
                            group: group.name.clone(),
                            outcome: GroupOutcome::Failed {
                                attempts: round,
                                error: format!("{e:#}"),
                            },
                        });
                        still_failing.push(group);
                    }
                }

                tokio::time::sleep(self.inter_group_delay).await;
            }
            pending = still_failing;
        }

        report.rounds = round;
        let failed = report.failed_groups();
        if failed.is_empty() {
            info!(groups = report.groups.len(), rounds = round, "sync pass complete");
        } else {
            warn!(?failed, rounds = round, "sync pass complete with failures");
        }
        report
    }

    /// Full pipeline for one group.
    async fn run_group(&mut self, group: &GroupConfig, today: NaiveDate) -> Result<GroupOutcome> {
        let upstream = self
            .client
            .fetch_group(group.group_id)
            .await
            .with_context(|| format!("Failed to fetch snapshot for '{}'", group.name))?;
        if let Some(ref upstream_name) = upstream.name {
            if upstream_name != &group.name {
                debug!(
                    configured = %group.name,
                    upstream = %upstream_name,
                    "group name differs upstream, keeping configured name"
                );
            }
        }
        let snapshot = GroupSnapshot::new(
            group.group_id,
            group.name.clone(),
            upstream.rank,
            group.quota_per_day,
            upstream.members,
        );
        self.sync_snapshot(group, snapshot, today).await
    }

    /// Everything after the fetch: rollover, current-block rebuild, retried
    /// write, cache refresh.
    async fn sync_snapshot(
        &mut self,
        group: &GroupConfig,
        snapshot: GroupSnapshot,
        today: NaiveDate,
    ) -> Result<GroupOutcome> {
        let mut table = self
            .store
            .read_table(&group.name, today)
            .with_context(|| format!("Failed to read ledger table for '{}'", group.name))?;

        let alignment = series_alignment(&table, &snapshot, today);
        let next_first_values = alignment.next_first_values(&snapshot);

        let rollover = archive::roll_over(&mut table, &next_first_values, today);
        if let RolloverOutcome::Closed { ref label, kind } = rollover {
            info!(group = %group.name, label, ?kind, "closed month section");
            self.record_transfers_from(&group.name, &table, today);
        }
        let backfilled = archive::backfill_final_day(&mut table, &next_first_values, today);
        if backfilled > 0 {
            debug!(group = %group.name, backfilled, "late final-day backfill");
        }

        let reconciled = reconcile::reconcile(&snapshot);
        let departed = reconciled.departed.len();
        let prior_archive = prior_period_archive(&table, today);

        let members = match &rollover {
            RolloverOutcome::PendingClose { .. } => {
                // The held block still belongs to the old period. Only late
                // old-period data may rewrite it, and never with fewer
                // recorded days than it already has.
                let rows = build_current_rows(
                    &snapshot,
                    &reconciled.active,
                    prior_archive,
                    &self.transfers,
                    0,
                );
                let current = table
                    .current
                    .as_mut()
                    .ok_or_else(|| anyhow::anyhow!("held close without a current block"))?;
                if matches!(alignment, SeriesAlignment::OldPeriod { .. })
                    && rows_max_data_day(&rows) >= current.max_data_day()
                    && !rows.is_empty()
                {
                    current.rows = rows;
                } else {
                    debug!(
                        group = %group.name,
                        "snapshot would shrink the held block, keeping stored rows"
                    );
                }
                current.rows.len()
            }
            _ => {
                // Rewrite the current block wholesale from upstream truth,
                // using only the series portion that belongs to its period.
                let rows = build_current_rows(
                    &snapshot,
                    &reconciled.active,
                    prior_archive,
                    &self.transfers,
                    alignment.current_series_offset(),
                );
                let members = rows.len();
                if let Some(ref mut current) = table.current {
                    current.rows = rows;
                }
                members
            }
        };

        let store = &self.store;
        let group_name = group.name.clone();
        let table_ref = &table;
        let outcome = self
            .write_policy
            .run(
                "write ledger table",
                |_| {
                    let group_name = group_name.clone();
                    async move { store.write_table(&group_name, table_ref) }
                },
                StoreError::is_retryable,
            )
            .await;
        let attempts = match &outcome {
            crate::retry::RetryOutcome::Success { attempts, .. } => *attempts,
            crate::retry::RetryOutcome::Exhausted { attempts, .. }
            | crate::retry::RetryOutcome::Aborted { attempts, .. } => *attempts,
        };
        outcome
            .into_result()
            .with_context(|| format!("Failed to write ledger table for '{}'", group.name))?;

        // Cache refreshes immediately so readers see this pass's result.
        self.cache.invalidate(&group.name);
        self.cache.set(&group.name, schema::to_rows(&table));

        info!(group = %group.name, members, departed, "group synced");
        Ok(GroupOutcome::Synced {
            members,
            departed,
            rollover,
            attempts,
        })
    }

    /// Load every group's stored table and remember each member's last known
    /// balance from the most recently closed period, so a member flagged at
    /// one group can be traced back to another within the same pass.
    fn seed_transfer_index(&mut self, today: NaiveDate) {
        self.transfers.prune();
        for group in &self.groups {
            let table = match self.store.read_table(&group.name, today) {
                Ok(table) => table,
                Err(e) => {
                    warn!(group = %group.name, error = %e, "skipping transfer seed");
                    continue;
                }
            };
            insert_transfer_records(&mut self.transfers, &group.name, &table, today);
        }
        debug!(records = self.transfers.len(), "transfer index seeded");
    }

    fn record_transfers_from(&mut self, group: &str, table: &LedgerTable, today: NaiveDate) {
        insert_transfer_records(&mut self.transfers, group, table, today);
    }
}

/// Which period the upstream series is indexed against.
///
/// Around a month boundary upstream lags: for a while it keeps serving the
/// old period's series, eventually extended with the new period's first
/// recordings, before resetting to a fresh series for the new period. The
/// fetch-back slot and the portion of the series that belongs to the current
/// block both depend on which of those shapes we are looking at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SeriesAlignment {
    /// Series slots are days of the still-open old period; slot
    /// `old_day_count` (if present) is the new period's first recording.
    OldPeriod { old_day_count: usize },
    /// Series slots are days of today's period; slot 0 is the new period's
    /// first recording.
    TodayPeriod,
}

fn series_alignment(
    table: &LedgerTable,
    snapshot: &GroupSnapshot,
    today: NaiveDate,
) -> SeriesAlignment {
    let closing = table
        .current
        .as_ref()
        .filter(|section| section.period != Period::of(today));
    let Some(section) = closing else {
        return SeriesAlignment::TodayPeriod;
    };

    let old_day_count = section.period.day_count() as usize;
    let extended = snapshot
        .members
        .iter()
        .any(|m| m.cumulative.len() > old_day_count);
    if extended {
        return SeriesAlignment::OldPeriod { old_day_count };
    }
    // No slot past the boundary. A series with more data days than the new
    // month has had calendar days so far can only be the old period's; a
    // short one means upstream already reset.
    if snapshot.max_data_day <= today.day() {
        SeriesAlignment::TodayPeriod
    } else {
        SeriesAlignment::OldPeriod { old_day_count }
    }
}

impl SeriesAlignment {
    /// Per-member first recorded value of the new period, the fetch-back
    /// source for closing and backfilling the old block. Empty when the
    /// series has no data past the old period's boundary.
    fn next_first_values(&self, snapshot: &GroupSnapshot) -> HashMap<u64, u64> {
        let slot = match self {
            SeriesAlignment::OldPeriod { old_day_count } => {
                if snapshot
                    .members
                    .iter()
                    .all(|m| m.cumulative.len() <= *old_day_count)
                {
                    return HashMap::new();
                }
                *old_day_count as u32 + 1
            }
            SeriesAlignment::TodayPeriod => 1,
        };
        snapshot
            .members
            .iter()
            .map(|m| (m.id, m.value_on(slot)))
            .collect()
    }

    /// How many leading series slots belong to the old period and must be
    /// skipped when building rows for today's current block.
    fn current_series_offset(&self) -> usize {
        match self {
            SeriesAlignment::OldPeriod { old_day_count } => *old_day_count,
            SeriesAlignment::TodayPeriod => 0,
        }
    }
}

fn rows_max_data_day(rows: &[LedgerRow]) -> u32 {
    rows.iter()
        .flat_map(|r| r.days.iter().rposition(|&v| v > 0).map(|i| i as u32 + 1))
        .max()
        .unwrap_or(0)
}

/// The archived section for the period immediately before today's, if any.
fn prior_period_archive(table: &LedgerTable, today: NaiveDate) -> Option<&MonthSection> {
    let prior = Period::of(today).prev();
    table
        .last_archived()
        .filter(|section| section.period == prior)
}

fn insert_transfer_records(
    transfers: &mut TransferIndex,
    group: &str,
    table: &LedgerTable,
    today: NaiveDate,
) {
    let Some(section) = prior_period_archive(table, today) else {
        return;
    };
    for row in &section.rows {
        let balance = row.period_end_snapshot.unwrap_or_else(|| row.latest_total());
        if balance == 0 {
            continue;
        }
        transfers.insert(TransferRecord {
            member_id: row.member_id,
            prior_group: group.to_string(),
            period_end_cumulative: balance,
            period: section.period,
        });
    }
}

/// Recompute every active member's current row from the fresh snapshot.
/// `series_offset` drops leading slots that belong to an earlier period.
fn build_current_rows(
    snapshot: &GroupSnapshot,
    active: &[Member],
    prior_archive: Option<&MonthSection>,
    transfers: &TransferIndex,
    series_offset: usize,
) -> Vec<LedgerRow> {
    let target_day = snapshot.max_data_day.saturating_sub(series_offset as u32);
    let mut rows = Vec::with_capacity(active.len());
    for member in active {
        let series: &[u64] = member.cumulative.get(series_offset..).unwrap_or(&[]);
        let gains = daily_gains(series);
        let profile = QuotaProfile::from_gains(&gains, snapshot.quota_per_day);
        let flagged = reconcile::possible_transfer(member.id, profile.start_day, prior_archive);
        if flagged {
            match reconcile::resolve_transfer(transfers, member.id, &snapshot.name) {
                Some(record) => info!(
                    group = %snapshot.name,
                    member_id = member.id,
                    member = %member.display_name,
                    prior_group = %record.prior_group,
                    prior_balance = record.period_end_cumulative,
                    "member likely transferred in"
                ),
                None => debug!(
                    group = %snapshot.name,
                    member_id = member.id,
                    "possible transfer, no prior group found"
                ),
            }
        }

        rows.push(LedgerRow {
            member_id: member.id,
            display_name: member.display_name.clone(),
            days: series.to_vec(),
            start_day: profile.start_day,
            effective_target: profile.effective_target(target_day),
            is_new_member: profile.is_new_member(),
            period_end_snapshot: None,
            possible_transfer: flagged,
        });
    }
    rows
}
