//! Family member verification.
//!
//! Each candidate is re-confirmed against the images. Only candidates the
//! oracle confirms survive: one marked unverified, or left out of an
//! otherwise usable reply, is dropped; there is no down-weighting. Reply
//! entries map back to candidates by their echoed number, or by position
//! when the number is missing, and anything that maps to no candidate is
//! ignored, so the candidate list can only shrink. A failed call, an
//! unparseable reply or an empty list leaves the candidates untouched.

use crate::oracle::{ExtractionOracle, PageImage};
use crate::prompts::{self, FAMILY_BACKFILL_KEYS};
use crate::reply::{self, VerifiedMember};
use intake_model::Extraction;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VerifyOutcome {
    /// The oracle answered with a usable verification list.
    pub available: bool,
    pub verified: usize,
    pub dropped: usize,
    pub backfilled: usize,
}

fn assign_replies(members: &[VerifiedMember], candidates: usize) -> Vec<Option<&VerifiedMember>> {
    let mut slots: Vec<Option<&VerifiedMember>> = vec![None; candidates];
    for (position, member) in members.iter().enumerate() {
        let target = match member.index {
            Some(number) => number.checked_sub(1),
            None => Some(position),
        };
        if let Some(slot) = target.and_then(|i| slots.get_mut(i)) {
            if slot.is_none() {
                *slot = Some(member);
            }
        }
    }
    slots
}

pub async fn verify_family(
    oracle: &dyn ExtractionOracle,
    images: &[PageImage],
    extraction: &mut Extraction,
    max_tokens: u32,
) -> VerifyOutcome {
    let mut outcome = VerifyOutcome::default();
    if extraction.family_members.is_empty() {
        return outcome;
    }

    let prompt = prompts::verify_family(&extraction.family_members);
    let members = match oracle.complete(images, &prompt, max_tokens).await {
        Ok(text) => match reply::parse_verification(&text) {
            Ok(Some(members)) if !members.is_empty() => members,
            Ok(_) => {
                tracing::warn!("verification reply had no usable family_members list; keeping candidates");
                return outcome;
            }
            Err(e) => {
                tracing::warn!(error = %e, "verification reply unparseable; keeping candidates");
                return outcome;
            }
        },
        Err(e) => {
            tracing::warn!(error = %e, "verification call failed; keeping candidates");
            return outcome;
        }
    };
    outcome.available = true;

    let slots = assign_replies(&members, extraction.family_members.len());
    let candidates = std::mem::take(&mut extraction.family_members);
    for (mut candidate, reply) in candidates.into_iter().zip(slots) {
        match reply {
            Some(reply) if !reply.verified => {
                tracing::info!(
                    relationship = %candidate.relationship,
                    name = %candidate.display_name(),
                    reason = reply.reason.as_deref().unwrap_or("not verified"),
                    "dropping unverified family member"
                );
                outcome.dropped += 1;
            }
            Some(reply) => {
                for key in FAMILY_BACKFILL_KEYS {
                    if candidate.attr(key).is_none() {
                        if let Some(value) = reply.data.get(*key).filter(|v| !v.trim().is_empty()) {
                            candidate.data.insert(key.to_string(), value.clone());
                            outcome.backfilled += 1;
                        }
                    }
                }
                outcome.verified += 1;
                extraction.family_members.push(candidate);
            }
            None => {
                tracing::info!(
                    relationship = %candidate.relationship,
                    name = %candidate.display_name(),
                    "dropping family member missing from verification reply"
                );
                outcome.dropped += 1;
            }
        }
    }
    outcome
}
