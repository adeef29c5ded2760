//! Checks applied to untrusted messages before any state changes.
//!
//! Every failure is a protocol violation and bans the sending peer.

use super::entities::{BatchedSigShares, SigShare, NO_SESSION_ID};
use super::inventory::SharesInventory;
use crate::events::ProtocolViolation;
use shared_types::Quorum;
use std::collections::HashSet;

/// Number of entries in one message is within its cap.
pub fn check_message_cap(
    command: &'static str,
    count: usize,
    max: usize,
) -> Result<(), ProtocolViolation> {
    if count > max {
        return Err(ProtocolViolation::TooManyEntries { command, count, max });
    }
    Ok(())
}

/// The sentinel id may never be announced.
pub fn check_session_id(session_id: u32) -> Result<(), ProtocolViolation> {
    if session_id == NO_SESSION_ID {
        return Err(ProtocolViolation::InvalidSessionId);
    }
    Ok(())
}

/// Inventory length equals the quorum size.
pub fn check_inventory_size(inv: &SharesInventory, quorum: &Quorum) -> Result<(), ProtocolViolation> {
    if inv.len() != quorum.size() {
        return Err(ProtocolViolation::InventorySizeMismatch {
            expected: quorum.size(),
            actual: inv.len(),
        });
    }
    Ok(())
}

/// Member index is in range and the member is valid.
pub fn check_member(member: u16, quorum: &Quorum) -> Result<(), ProtocolViolation> {
    if usize::from(member) >= quorum.size() {
        return Err(ProtocolViolation::MemberOutOfRange {
            member,
            size: quorum.size(),
        });
    }
    if !quorum.is_valid_member(member) {
        return Err(ProtocolViolation::InvalidMember { member });
    }
    Ok(())
}

/// Members of a batch are unique, in range and valid.
pub fn check_batched_members(batch: &BatchedSigShares, quorum: &Quorum) -> Result<(), ProtocolViolation> {
    let mut seen = HashSet::with_capacity(batch.len());
    for (member, _) in &batch.sig_shares {
        if !seen.insert(*member) {
            return Err(ProtocolViolation::DuplicateMember { member: *member });
        }
        check_member(*member, quorum)?;
    }
    Ok(())
}

/// A directly pushed share names a member of its quorum.
pub fn check_direct_share(share: &SigShare, quorum: &Quorum) -> Result<(), ProtocolViolation> {
    check_member(share.quorum_member, quorum)
}
