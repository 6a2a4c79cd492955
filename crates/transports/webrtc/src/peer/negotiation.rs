//! Per-peer perfect negotiation
//!
//! Both sides of a pair may start an offer at the same time (glare). The
//! collision is resolved without a coordinator: the side with the
//! lexicographically smaller id is *polite* and rolls its own offer back,
//! the other side ignores the incoming offer and waits for its answer.
//!
//! Remote candidates that arrive before any remote description are queued
//! and applied in arrival order once one is set. Candidate failures are
//! logged and counted; while an offer is being ignored they are expected
//! and suppressed entirely.

use super::transport::{PeerTransport, SignalingState};
use crate::signaling::{IceCandidate, OutboundSignal, SessionDescription, SignalingChannel};
use crate::{PeerId, Result};
use serde::Serialize;
use std::collections::VecDeque;
use tracing::{debug, info, instrument, warn};

/// Whether the local side defers during a collision with `remote_id`
///
/// Exactly one side of any pair is polite, and both sides agree on which.
pub fn is_polite(local_id: &str, remote_id: &str) -> bool {
    local_id < remote_id
}

/// Offer-side negotiation phase of one peer
///
/// Replaces the `making offer` / `ignoring offer` flag pair. An offer can
/// be made while a previously ignored offer is still being ignored;
/// `resume_ignoring` carries that over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "phase")]
pub enum OfferPhase {
    /// Nothing in flight
    #[default]
    Idle,
    /// A local offer is being built and applied
    MakingOffer {
        /// Return to [`OfferPhase::IgnoringOffer`] once the offer is out
        resume_ignoring: bool,
    },
    /// The last colliding remote offer was ignored
    IgnoringOffer,
    /// The peer is gone
    Closed,
}

/// Outcome of handling negotiation-needed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferAttempt {
    /// Offer applied locally and sent
    Sent,
    /// Another exchange was already in flight; nothing was sent
    Superseded,
}

/// Outcome of handling a remote offer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferOutcome {
    /// Offer applied and answered
    Accepted {
        /// Our own in-flight offer was rolled back first
        rolled_back: bool,
    },
    /// Colliding offer dropped; our offer wins
    Ignored,
}

/// Outcome of handling a remote answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerOutcome {
    /// Answer applied
    Applied,
    /// No local offer in flight; answer dropped
    Discarded,
}

/// Outcome of handling a remote candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateOutcome {
    /// Queued until a remote description exists
    Buffered,
    /// Applied to the transport
    Applied,
    /// Rejected by the transport; logged
    Failed,
    /// Rejected while ignoring an offer; not logged
    Suppressed,
    /// Peer is closed
    Dropped,
}

/// Per-peer negotiation counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NegotiationStats {
    /// Offers sent
    pub offers_sent: u64,
    /// Answers sent
    pub answers_sent: u64,
    /// Local offers rolled back for a polite collision
    pub rollbacks: u64,
    /// Remote offers ignored for an impolite collision
    pub ignored_offers: u64,
    /// Answers received with no offer in flight
    pub discarded_answers: u64,
    /// Candidates queued before a remote description
    pub candidates_buffered: u64,
    /// Candidates applied
    pub candidates_applied: u64,
    /// Candidates that failed to apply
    pub candidates_failed: u64,
    /// Candidate failures suppressed while ignoring an offer
    pub candidates_suppressed: u64,
}

/// Negotiation state machine for one remote peer
#[derive(Debug)]
pub struct PeerNegotiator {
    local_id: PeerId,
    remote_id: PeerId,
    polite: bool,
    phase: OfferPhase,
    pending_candidates: VecDeque<IceCandidate>,
    stats: NegotiationStats,
}

impl PeerNegotiator {
    /// Negotiator for the pair (`local_id`, `remote_id`)
    pub fn new(local_id: impl Into<PeerId>, remote_id: impl Into<PeerId>) -> Self {
        let local_id = local_id.into();
        let remote_id = remote_id.into();
        let polite = is_polite(&local_id, &remote_id);
        Self {
            local_id,
            remote_id,
            polite,
            phase: OfferPhase::Idle,
            pending_candidates: VecDeque::new(),
            stats: NegotiationStats::default(),
        }
    }

    /// Remote peer id
    pub fn remote_id(&self) -> &str {
        &self.remote_id
    }

    /// Whether we defer during collisions
    pub fn is_polite(&self) -> bool {
        self.polite
    }

    /// Current phase
    pub fn phase(&self) -> OfferPhase {
        self.phase
    }

    /// Whether a local offer is being made
    pub fn is_making_offer(&self) -> bool {
        matches!(self.phase, OfferPhase::MakingOffer { .. })
    }

    /// Whether the last colliding offer is being ignored
    pub fn is_ignoring_offer(&self) -> bool {
        matches!(
            self.phase,
            OfferPhase::IgnoringOffer
                | OfferPhase::MakingOffer {
                    resume_ignoring: true
                }
        )
    }

    /// Number of queued remote candidates
    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    /// Counters
    pub fn stats(&self) -> NegotiationStats {
        self.stats
    }

    /// Build, apply and send an offer
    ///
    /// Skipped when the connection left `stable` while the offer was being
    /// built. The making-offer phase is cleared whatever the outcome.
    #[instrument(skip_all, fields(peer_id = %self.remote_id))]
    pub async fn on_negotiation_needed(
        &mut self,
        transport: &dyn PeerTransport,
        signaling: &dyn SignalingChannel,
    ) -> Result<OfferAttempt> {
        if self.phase == OfferPhase::Closed {
            return Ok(OfferAttempt::Superseded);
        }

        self.phase = OfferPhase::MakingOffer {
            resume_ignoring: self.is_ignoring_offer(),
        };
        let result = self.make_offer(transport, signaling).await;

        if let OfferPhase::MakingOffer { resume_ignoring } = self.phase {
            self.phase = if resume_ignoring {
                OfferPhase::IgnoringOffer
            } else {
                OfferPhase::Idle
            };
        }
        result
    }

    async fn make_offer(
        &mut self,
        transport: &dyn PeerTransport,
        signaling: &dyn SignalingChannel,
    ) -> Result<OfferAttempt> {
        let offer = transport.create_offer().await?;

        let state = transport.signaling_state();
        if state != SignalingState::Stable {
            debug!("Skipping offer to {}: signaling state is {}", self.remote_id, state);
            return Ok(OfferAttempt::Superseded);
        }

        transport.set_local_description(offer.clone()).await?;
        signaling
            .send(OutboundSignal::Offer {
                target_id: self.remote_id.clone(),
                description: offer,
            })
            .await?;

        self.stats.offers_sent += 1;
        debug!("{} sent offer to {}", self.local_id, self.remote_id);
        Ok(OfferAttempt::Sent)
    }

    /// Handle a remote offer
    ///
    /// On collision the impolite side drops the offer; the polite side rolls
    /// back its own offer and answers.
    #[instrument(skip_all, fields(peer_id = %self.remote_id))]
    pub async fn on_offer(
        &mut self,
        description: SessionDescription,
        transport: &dyn PeerTransport,
        signaling: &dyn SignalingChannel,
    ) -> Result<OfferOutcome> {
        if self.phase == OfferPhase::Closed {
            return Ok(OfferOutcome::Ignored);
        }

        let state = transport.signaling_state();
        let collision = self.is_making_offer() || state != SignalingState::Stable;

        if collision && !self.polite {
            self.phase = match self.phase {
                OfferPhase::MakingOffer { .. } => OfferPhase::MakingOffer {
                    resume_ignoring: true,
                },
                _ => OfferPhase::IgnoringOffer,
            };
            self.stats.ignored_offers += 1;
            info!(
                "Offer collision with {}: ignoring theirs ({} is impolite)",
                self.remote_id, self.local_id
            );
            return Ok(OfferOutcome::Ignored);
        }

        let mut rolled_back = false;
        if collision && state == SignalingState::HaveLocalOffer {
            transport.rollback().await?;
            rolled_back = true;
            self.stats.rollbacks += 1;
            info!(
                "Offer collision with {}: rolled back ours ({} is polite)",
                self.remote_id, self.local_id
            );
        }

        self.phase = match self.phase {
            OfferPhase::MakingOffer { .. } => OfferPhase::MakingOffer {
                resume_ignoring: false,
            },
            _ => OfferPhase::Idle,
        };

        transport.set_remote_description(description).await?;
        self.drain_candidates(transport).await;

        let answer = transport.create_answer().await?;
        transport.set_local_description(answer.clone()).await?;
        signaling
            .send(OutboundSignal::Answer {
                target_id: self.remote_id.clone(),
                description: answer,
            })
            .await?;

        self.stats.answers_sent += 1;
        debug!("{} answered offer from {}", self.local_id, self.remote_id);
        Ok(OfferOutcome::Accepted { rolled_back })
    }

    /// Handle a remote answer; only valid with a local offer in flight
    #[instrument(skip_all, fields(peer_id = %self.remote_id))]
    pub async fn on_answer(
        &mut self,
        description: SessionDescription,
        transport: &dyn PeerTransport,
    ) -> Result<AnswerOutcome> {
        let state = transport.signaling_state();
        if self.phase == OfferPhase::Closed || state != SignalingState::HaveLocalOffer {
            self.stats.discarded_answers += 1;
            debug!("Discarding answer from {} in state {}", self.remote_id, state);
            return Ok(AnswerOutcome::Discarded);
        }

        transport.set_remote_description(description).await?;
        self.drain_candidates(transport).await;
        Ok(AnswerOutcome::Applied)
    }

    /// Handle a remote candidate: queue it or apply it
    #[instrument(skip_all, fields(peer_id = %self.remote_id))]
    pub async fn on_candidate(
        &mut self,
        candidate: IceCandidate,
        transport: &dyn PeerTransport,
    ) -> CandidateOutcome {
        if self.phase == OfferPhase::Closed {
            return CandidateOutcome::Dropped;
        }

        if !transport.has_remote_description() {
            self.pending_candidates.push_back(candidate);
            self.stats.candidates_buffered += 1;
            debug!(
                "Buffered candidate from {} ({} pending)",
                self.remote_id,
                self.pending_candidates.len()
            );
            return CandidateOutcome::Buffered;
        }

        self.apply_candidate(candidate, transport).await
    }

    /// Queue candidates received before this negotiator existed
    pub fn buffer_candidates(&mut self, candidates: impl IntoIterator<Item = IceCandidate>) {
        for candidate in candidates {
            self.pending_candidates.push_back(candidate);
            self.stats.candidates_buffered += 1;
        }
    }

    /// Apply every queued candidate in arrival order; returns how many were applied
    pub async fn drain_candidates(&mut self, transport: &dyn PeerTransport) -> usize {
        let queued = std::mem::take(&mut self.pending_candidates);
        if queued.is_empty() {
            return 0;
        }

        let total = queued.len();
        let mut applied = 0;
        for candidate in queued {
            if self.apply_candidate(candidate, transport).await == CandidateOutcome::Applied {
                applied += 1;
            }
        }
        debug!(
            "Drained {} buffered candidates from {} ({} applied)",
            total, self.remote_id, applied
        );
        applied
    }

    async fn apply_candidate(
        &mut self,
        candidate: IceCandidate,
        transport: &dyn PeerTransport,
    ) -> CandidateOutcome {
        match transport.add_ice_candidate(candidate).await {
            Ok(()) => {
                self.stats.candidates_applied += 1;
                CandidateOutcome::Applied
            }
            Err(_) if self.is_ignoring_offer() => {
                self.stats.candidates_suppressed += 1;
                CandidateOutcome::Suppressed
            }
            Err(e) => {
                self.stats.candidates_failed += 1;
                warn!("Failed to apply candidate from {}: {}", self.remote_id, e);
                CandidateOutcome::Failed
            }
        }
    }

    /// Release all state; further messages are dropped. Returns the number
    /// of queued candidates discarded.
    pub fn close(&mut self) -> usize {
        self.phase = OfferPhase::Closed;
        let discarded = self.pending_candidates.len();
        self.pending_candidates.clear();
        discarded
    }
}
