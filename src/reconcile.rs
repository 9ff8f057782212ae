//! Membership reconciliation across sync cycles.
//!
//! Classifies each member of a fresh snapshot as still-active or departed,
//! and flags members who look like they transferred in from another group.
//! The transfer flag is a heuristic: a member who merely missed the day-1
//! upstream update looks identical, so the flag marks rows for review rather
//! than asserting a transfer.

use tracing::debug;

use crate::models::{GroupSnapshot, Member, MonthSection, TransferIndex, TransferRecord};

/// Result of the presence test over one snapshot.
#[derive(Debug)]
pub struct Reconciled {
    /// Members with a positive cumulative at the group's max data day; these
    /// make up the rewritten current block.
    pub active: Vec<Member>,
    /// Members dropped this pass. Their history survives only where already
    /// archived.
    pub departed: Vec<Member>,
}

/// Split a snapshot's members by the presence test: a member is still in the
/// group only if they have a positive cumulative value at the group's
/// current max data day.
pub fn reconcile(snapshot: &GroupSnapshot) -> Reconciled {
    let mut active = Vec::with_capacity(snapshot.members.len());
    let mut departed = Vec::new();

    for member in &snapshot.members {
        if snapshot.max_data_day > 0 && member.value_on(snapshot.max_data_day) > 0 {
            active.push(member.clone());
        } else {
            debug!(
                group = %snapshot.name,
                member_id = member.id,
                member = %member.display_name,
                max_data_day = snapshot.max_data_day,
                "member failed presence test, dropping from current block"
            );
            departed.push(member.clone());
        }
    }

    Reconciled { active, departed }
}

/// Possible-transfer heuristic: the member is absent from the prior period's
/// archived roster for this group and their accounting starts on day 2
/// (data from day 2 onward, but never a day-1 value).
pub fn possible_transfer(
    member_id: u64,
    start_day: u32,
    prior_archive: Option<&MonthSection>,
) -> bool {
    if start_day != 2 {
        return false;
    }
    match prior_archive {
        Some(section) => section.find_member(member_id).is_none(),
        // No archived history at all: nothing to be absent from, so a day-2
        // start alone is not evidence of a transfer.
        None => false,
    }
}

/// Locate a flagged member's last known balance at a different group.
pub fn resolve_transfer<'a>(
    index: &'a TransferIndex,
    member_id: u64,
    current_group: &str,
) -> Option<&'a TransferRecord> {
    index
        .lookup(member_id)
        .filter(|record| record.prior_group != current_group)
}
