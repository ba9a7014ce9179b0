//! Subscription Controller
//!
//! Owns the subscription book and pause state of one session and turns API
//! calls into [`ControlMessage`]s.
//!
//! # Design
//!
//! State is updated optimistically when a request is issued. Each request is
//! recorded in a pending table keyed by [`RequestId`], holding only the
//! changes it actually made. When the server acknowledges:
//!
//! - Accepted: the pending entry is dropped
//! - Rejected: exactly the recorded changes are undone and a [`NegativeAck`]
//!   is returned for the consumer
//!
//! Subscribing an already subscribed pair still emits a request (the server is
//! the source of truth) but records no change. Unsubscribing a pair that is
//! not subscribed emits nothing.
//!
//! An acknowledgement without a request id settles the oldest pending request
//! sent under the same message code. The table holds at most
//! [`MAX_PENDING_REQUESTS`] entries; past that the oldest is treated as
//! accepted.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use crate::domain::control::{
    ControlAction, ControlMessage, RequestId, TouchlineOptions, request_code,
};
use crate::domain::streaming::{Ack, AckStatus, Scrip, ScripError};
use crate::domain::subscription::{PauseState, SubscriptionBook, SubscriptionMode};

/// Upper bound on requests awaiting acknowledgement.
pub const MAX_PENDING_REQUESTS: usize = 1024;

// =============================================================================
// Errors
// =============================================================================

/// Local validation failures of control calls. None of them change state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError {
    /// Scrip list was empty.
    #[error("scrip list cannot be empty")]
    EmptyScripList,

    /// An entry was not `segment_token`.
    #[error(transparent)]
    InvalidScripFormat(#[from] ScripError),

    /// A pause/resume request in the opposite direction is still pending.
    #[error("cannot {requested} while a {pending} request is awaiting acknowledgement")]
    ConflictingPauseRequest {
        /// Direction of the pending request.
        pending: &'static str,
        /// Direction of the rejected call.
        requested: &'static str,
    },
}

/// A server rejection of an optimistically applied request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NegativeAck {
    /// Rejected request.
    pub request_id: RequestId,
    /// What the request did.
    pub action: ControlAction,
    /// Mode of the request; `None` for pause/resume.
    pub mode: Option<SubscriptionMode>,
    /// Scrips whose local state was rolled back.
    pub scrips: Vec<Scrip>,
    /// Server status code.
    pub code: i32,
    /// Server reason, when supplied.
    pub reason: Option<String>,
}

impl fmt::Display for NegativeAck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} request {} rejected (code {})",
            self.action.as_str(),
            self.request_id,
            self.code
        )?;
        if let Some(mode) = self.mode {
            write!(f, " for {}", mode.as_str())?;
        }
        if !self.scrips.is_empty() {
            let scrips: Vec<_> = self.scrips.iter().map(ToString::to_string).collect();
            write!(f, " [{}]", scrips.join(", "))?;
        }
        if let Some(reason) = &self.reason {
            write!(f, ": {reason}")?;
        }
        Ok(())
    }
}

/// Result of matching an acknowledgement against pending requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    /// Pending request confirmed.
    Confirmed(RequestId),
    /// Pending request rejected and rolled back.
    Rejected(NegativeAck),
    /// No pending request carries this identity.
    Unmatched,
}

// =============================================================================
// Pending Requests
// =============================================================================

#[derive(Debug, Clone)]
struct PendingRequest {
    action: ControlAction,
    mode: Option<SubscriptionMode>,
    /// Scrips whose book entry this request changed.
    applied: Vec<Scrip>,
    is_pause: bool,
    previous_pause: PauseState,
}

const fn pause_label(is_pause: bool) -> &'static str {
    if is_pause { "pause" } else { "resume" }
}

// =============================================================================
// Controller
// =============================================================================

/// Subscription and pause state of one session.
#[derive(Debug, Default)]
pub struct SubscriptionController {
    book: SubscriptionBook,
    pause: PauseState,
    pending: HashMap<RequestId, PendingRequest>,
    next_request_id: u64,
    touchline: TouchlineOptions,
}

impl SubscriptionController {
    /// Create a controller with the session's touchline options.
    #[must_use]
    pub fn new(touchline: TouchlineOptions) -> Self {
        Self {
            touchline,
            ..Self::default()
        }
    }

    /// Subscribe scrips under a mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the list is empty or an entry is not
    /// `segment_token`. State is untouched on error.
    pub fn subscribe<S: AsRef<str>>(
        &mut self,
        scrips: &[S],
        mode: SubscriptionMode,
    ) -> Result<ControlMessage, SubscriptionError> {
        let scrips = parse_scrips(scrips)?;
        let applied = self.book.add(mode, &scrips);
        let request_id = self.track(PendingRequest {
            action: ControlAction::Subscribe,
            mode: Some(mode),
            applied,
            is_pause: false,
            previous_pause: self.pause,
        });

        Ok(ControlMessage::subscribe(
            request_id,
            mode,
            scrips,
            self.touchline,
        ))
    }

    /// Unsubscribe scrips from a mode.
    ///
    /// Returns `None` when none of the scrips were subscribed under the mode.
    /// Otherwise the request names only the scrips that were.
    ///
    /// # Errors
    ///
    /// Same validation as [`SubscriptionController::subscribe`].
    pub fn unsubscribe<S: AsRef<str>>(
        &mut self,
        scrips: &[S],
        mode: SubscriptionMode,
    ) -> Result<Option<ControlMessage>, SubscriptionError> {
        let scrips = parse_scrips(scrips)?;
        let removed = self.book.remove(mode, &scrips);
        if removed.is_empty() {
            return Ok(None);
        }

        let request_id = self.track(PendingRequest {
            action: ControlAction::Unsubscribe,
            mode: Some(mode),
            applied: removed.clone(),
            is_pause: false,
            previous_pause: self.pause,
        });

        Ok(Some(ControlMessage::unsubscribe(request_id, mode, removed)))
    }

    /// Pause (`true`) or resume (`false`) the broadcast.
    ///
    /// # Errors
    ///
    /// Returns [`SubscriptionError::ConflictingPauseRequest`] while a request
    /// in the opposite direction is awaiting acknowledgement.
    pub fn set_pause(&mut self, paused: bool) -> Result<ControlMessage, SubscriptionError> {
        if let Some(pending) = self
            .pending
            .values()
            .find(|p| p.action == ControlAction::PauseResume && p.is_pause != paused)
        {
            return Err(SubscriptionError::ConflictingPauseRequest {
                pending: pause_label(pending.is_pause),
                requested: pause_label(paused),
            });
        }

        let previous_pause = self.pause;
        self.pause = PauseState::from_paused(paused);
        let request_id = self.track(PendingRequest {
            action: ControlAction::PauseResume,
            mode: None,
            applied: Vec::new(),
            is_pause: paused,
            previous_pause,
        });

        Ok(ControlMessage::pause_resume(request_id, paused))
    }

    /// Match a server acknowledgement against pending requests.
    pub fn reconcile(&mut self, ack: &Ack) -> AckOutcome {
        let Some(request_id) = ack
            .request_id
            .map(RequestId)
            .or_else(|| self.oldest_pending(ack.message_code))
        else {
            return AckOutcome::Unmatched;
        };

        match &ack.status {
            AckStatus::Accepted => {
                if self.pending.remove(&request_id).is_some() {
                    AckOutcome::Confirmed(request_id)
                } else {
                    AckOutcome::Unmatched
                }
            }
            AckStatus::Rejected { code, reason } => match self.rollback(request_id) {
                Some(mut nack) => {
                    nack.code = *code;
                    nack.reason.clone_from(reason);
                    AckOutcome::Rejected(nack)
                }
                None => AckOutcome::Unmatched,
            },
        }
    }

    /// Undo the changes a pending request made.
    ///
    /// Used on negative acknowledgement and when a request could not be sent.
    /// Returns `None` if the request is not pending.
    pub fn rollback(&mut self, request_id: RequestId) -> Option<NegativeAck> {
        let pending = self.pending.remove(&request_id)?;

        match (pending.action, pending.mode) {
            (ControlAction::Subscribe, Some(mode)) => {
                self.book.remove(mode, &pending.applied);
            }
            (ControlAction::Unsubscribe, Some(mode)) => {
                self.book.add(mode, &pending.applied);
            }
            (ControlAction::PauseResume, _) => self.pause = pending.previous_pause,
            _ => {}
        }

        Some(NegativeAck {
            request_id,
            action: pending.action,
            mode: pending.mode,
            scrips: pending.applied,
            code: 0,
            reason: None,
        })
    }

    /// Drop all state. Request ids keep counting.
    pub fn reset(&mut self) {
        self.book.clear();
        self.pause = PauseState::default();
        self.pending.clear();
    }

    /// Current subscriptions.
    #[must_use]
    pub const fn book(&self) -> &SubscriptionBook {
        &self.book
    }

    /// Current pause state.
    #[must_use]
    pub const fn pause_state(&self) -> PauseState {
        self.pause
    }

    /// Number of requests awaiting acknowledgement.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn oldest_pending(&self, message_code: u32) -> Option<RequestId> {
        self.pending
            .iter()
            .filter(|(_, p)| request_code(p.mode) == message_code)
            .map(|(id, _)| *id)
            .min()
    }

    fn track(&mut self, pending: PendingRequest) -> RequestId {
        if self.pending.len() >= MAX_PENDING_REQUESTS
            && let Some(oldest) = self.pending.keys().min().copied()
        {
            self.pending.remove(&oldest);
            tracing::debug!(request_id = %oldest, "Pending table full, settling oldest request");
        }

        self.next_request_id += 1;
        let request_id = RequestId(self.next_request_id);
        self.pending.insert(request_id, pending);
        request_id
    }
}

/// Parse and de-duplicate a scrip list, keeping first-seen order.
///
/// # Errors
///
/// Returns [`SubscriptionError::EmptyScripList`] for an empty list and
/// [`SubscriptionError::InvalidScripFormat`] for the first bad entry.
pub fn parse_scrips<S: AsRef<str>>(scrips: &[S]) -> Result<Vec<Scrip>, SubscriptionError> {
    if scrips.is_empty() {
        return Err(SubscriptionError::EmptyScripList);
    }

    let mut parsed: Vec<Scrip> = Vec::with_capacity(scrips.len());
    for entry in scrips {
        let scrip: Scrip = entry.as_ref().parse()?;
        if !parsed.contains(&scrip) {
            parsed.push(scrip);
        }
    }

    Ok(parsed)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ack(request_id: RequestId, status: AckStatus) -> Ack {
        Ack {
            request_id: Some(request_id.0),
            message_code: 347,
            status,
        }
    }

    fn rejected(code: i32) -> AckStatus {
        AckStatus::Rejected {
            code,
            reason: Some("not permitted".to_string()),
        }
    }

    #[test]
    fn subscribe_emits_request_and_updates_book() {
        let mut controller = SubscriptionController::default();

        let msg = controller
            .subscribe(&["1_22", "1_2885"], SubscriptionMode::Ltp)
            .unwrap();

        assert_eq!(msg.action, ControlAction::Subscribe);
        assert_eq!(msg.scrips, vec![Scrip::new(1, 22), Scrip::new(1, 2885)]);
        assert!(controller.book().contains(&Scrip::new(1, 22), SubscriptionMode::Ltp));
        assert_eq!(controller.pending_count(), 1);
    }

    #[test]
    fn subscribe_twice_still_emits_but_state_matches_once() {
        let mut controller = SubscriptionController::default();
        controller.subscribe(&["1_22"], SubscriptionMode::Ltp).unwrap();
        let once = controller.book().clone();

        let second = controller.subscribe(&["1_22"], SubscriptionMode::Ltp).unwrap();

        assert_eq!(second.scrips, vec![Scrip::new(1, 22)]);
        assert_eq!(controller.book(), &once);
    }

    #[test]
    fn invalid_entry_leaves_state_untouched() {
        let mut controller = SubscriptionController::default();

        let err = controller
            .subscribe(&["1_22", "bogus"], SubscriptionMode::Ltp)
            .unwrap_err();

        assert!(matches!(err, SubscriptionError::InvalidScripFormat(_)));
        assert!(controller.book().is_empty());
        assert_eq!(controller.pending_count(), 0);
    }

    #[test]
    fn empty_list_is_rejected() {
        let mut controller = SubscriptionController::default();
        let empty: [&str; 0] = [];

        assert_eq!(
            controller.subscribe(&empty, SubscriptionMode::BestFive),
            Err(SubscriptionError::EmptyScripList)
        );
        assert_eq!(
            controller.unsubscribe(&empty, SubscriptionMode::BestFive),
            Err(SubscriptionError::EmptyScripList)
        );
    }

    #[test]
    fn unsubscribe_unknown_pair_emits_nothing() {
        let mut controller = SubscriptionController::default();

        let msg = controller.unsubscribe(&["1_22"], SubscriptionMode::Ltp).unwrap();

        assert!(msg.is_none());
        assert!(controller.book().is_empty());
        assert_eq!(controller.pending_count(), 0);
    }

    #[test]
    fn unsubscribe_names_only_subscribed_scrips() {
        let mut controller = SubscriptionController::default();
        controller.subscribe(&["1_22"], SubscriptionMode::Ltp).unwrap();

        let msg = controller
            .unsubscribe(&["1_22", "1_2885"], SubscriptionMode::Ltp)
            .unwrap()
            .unwrap();

        assert_eq!(msg.scrips, vec![Scrip::new(1, 22)]);
        assert!(controller.book().is_empty());
    }

    #[test]
    fn duplicate_entries_are_collapsed() {
        assert_eq!(
            parse_scrips(&["1_22", "1_22", "2_5"]).unwrap(),
            vec![Scrip::new(1, 22), Scrip::new(2, 5)]
        );
    }

    #[test]
    fn positive_ack_confirms() {
        let mut controller = SubscriptionController::default();
        let msg = controller.subscribe(&["1_22"], SubscriptionMode::Ltp).unwrap();

        let outcome = controller.reconcile(&ack(msg.request_id, AckStatus::Accepted));

        assert_eq!(outcome, AckOutcome::Confirmed(msg.request_id));
        assert_eq!(controller.pending_count(), 0);
        assert!(controller.book().contains(&Scrip::new(1, 22), SubscriptionMode::Ltp));
    }

    #[test]
    fn negative_ack_restores_previous_book_exactly() {
        let mut controller = SubscriptionController::default();
        let first = controller.subscribe(&["1_22"], SubscriptionMode::Ltp).unwrap();
        controller.reconcile(&ack(first.request_id, AckStatus::Accepted));
        let before = controller.book().clone();

        let msg = controller
            .subscribe(&["1_22", "1_2885"], SubscriptionMode::Ltp)
            .unwrap();
        let outcome = controller.reconcile(&ack(msg.request_id, rejected(16)));

        let AckOutcome::Rejected(nack) = outcome else {
            panic!("expected rejection, got {outcome:?}");
        };
        // 1_22 was already subscribed, so only 1_2885 is rolled back.
        assert_eq!(nack.scrips, vec![Scrip::new(1, 2885)]);
        assert_eq!(nack.mode, Some(SubscriptionMode::Ltp));
        assert_eq!(nack.code, 16);
        assert_eq!(controller.book(), &before);
    }

    #[test]
    fn negative_ack_on_unsubscribe_resubscribes() {
        let mut controller = SubscriptionController::default();
        controller.subscribe(&["1_22"], SubscriptionMode::Touchline).unwrap();
        let before = controller.book().clone();

        let msg = controller
            .unsubscribe(&["1_22"], SubscriptionMode::Touchline)
            .unwrap()
            .unwrap();
        controller.reconcile(&ack(msg.request_id, rejected(1)));

        assert_eq!(controller.book(), &before);
    }

    #[test]
    fn unmatched_acks_change_nothing() {
        let mut controller = SubscriptionController::default();
        controller.subscribe(&["1_22"], SubscriptionMode::Ltp).unwrap();

        assert_eq!(
            controller.reconcile(&ack(RequestId(99), rejected(1))),
            AckOutcome::Unmatched
        );
        let no_id = Ack {
            request_id: None,
            message_code: 101,
            status: AckStatus::Accepted,
        };
        assert_eq!(controller.reconcile(&no_id), AckOutcome::Unmatched);
        assert_eq!(controller.pending_count(), 1);
    }

    #[test]
    fn pause_rollback_restores_previous_state() {
        let mut controller = SubscriptionController::default();

        let msg = controller.set_pause(true).unwrap();
        assert!(controller.pause_state().is_paused());

        controller.reconcile(&ack(msg.request_id, rejected(3)));
        assert_eq!(controller.pause_state(), PauseState::Resumed);
    }

    #[test]
    fn opposite_pause_request_conflicts_while_pending() {
        let mut controller = SubscriptionController::default();
        let pause = controller.set_pause(true).unwrap();

        assert_eq!(
            controller.set_pause(false),
            Err(SubscriptionError::ConflictingPauseRequest {
                pending: "pause",
                requested: "resume",
            })
        );
        // Repeating the same direction is allowed.
        assert!(controller.set_pause(true).is_ok());

        controller.reconcile(&ack(pause.request_id, AckStatus::Accepted));
    }

    #[test]
    fn resume_allowed_after_pause_confirmed() {
        let mut controller = SubscriptionController::default();
        let pause = controller.set_pause(true).unwrap();
        controller.reconcile(&ack(pause.request_id, AckStatus::Accepted));

        let resume = controller.set_pause(false).unwrap();

        assert!(!resume.is_pause);
        assert!(!controller.pause_state().is_paused());
    }

    #[test]
    fn request_ids_are_unique_and_increasing() {
        let mut controller = SubscriptionController::default();
        let a = controller.subscribe(&["1_22"], SubscriptionMode::Ltp).unwrap();
        let b = controller.set_pause(true).unwrap();

        assert!(b.request_id > a.request_id);
    }

    #[test]
    fn touchline_options_are_attached() {
        let options = TouchlineOptions {
            native: true,
            ltp_change_only: false,
        };
        let mut controller = SubscriptionController::new(options);

        let msg = controller
            .subscribe(&["1_22"], SubscriptionMode::Touchline)
            .unwrap();

        assert_eq!(msg.touchline, options);
    }

    #[test]
    fn negative_ack_display_names_scrips_and_reason() {
        let nack = NegativeAck {
            request_id: RequestId(4),
            action: ControlAction::Subscribe,
            mode: Some(SubscriptionMode::BestFive),
            scrips: vec![Scrip::new(1, 22)],
            code: 16,
            reason: Some("limit reached".to_string()),
        };

        assert_eq!(
            nack.to_string(),
            "subscribe request 4 rejected (code 16) for best_five [1_22]: limit reached"
        );
    }

    fn ack_without_id(message_code: u32, status: AckStatus) -> Ack {
        Ack {
            request_id: None,
            message_code,
            status,
        }
    }

    #[test]
    fn ack_without_id_settles_pause_so_resume_is_allowed() {
        let mut controller = SubscriptionController::default();
        let pause = controller.set_pause(true).unwrap();

        let outcome = controller.reconcile(&ack_without_id(106, AckStatus::Accepted));

        assert_eq!(outcome, AckOutcome::Confirmed(pause.request_id));
        assert_eq!(controller.pending_count(), 0);
        assert!(controller.set_pause(false).is_ok());
        assert_eq!(controller.pause_state(), PauseState::Resumed);
    }

    #[test]
    fn ack_without_id_settles_oldest_request_with_same_code() {
        let mut controller = SubscriptionController::default();
        let first = controller.subscribe(&["1_22"], SubscriptionMode::Ltp).unwrap();
        let depth = controller
            .subscribe(&["1_22"], SubscriptionMode::BestFive)
            .unwrap();
        let second = controller.subscribe(&["1_2885"], SubscriptionMode::Ltp).unwrap();

        assert_eq!(
            controller.reconcile(&ack_without_id(347, AckStatus::Accepted)),
            AckOutcome::Confirmed(first.request_id)
        );

        match controller.reconcile(&ack_without_id(347, rejected(5))) {
            AckOutcome::Rejected(nack) => {
                assert_eq!(nack.request_id, second.request_id);
                assert_eq!(nack.scrips, vec![Scrip::new(1, 2885)]);
            }
            other => panic!("expected rejection, got {other:?}"),
        }
        assert!(!controller.book().contains(&Scrip::new(1, 2885), SubscriptionMode::Ltp));

        assert_eq!(controller.pending_count(), 1);
        assert_eq!(
            controller.reconcile(&ack_without_id(127, AckStatus::Accepted)),
            AckOutcome::Confirmed(depth.request_id)
        );
        assert_eq!(
            controller.reconcile(&ack_without_id(347, AckStatus::Accepted)),
            AckOutcome::Unmatched
        );
    }

    #[test]
    fn pending_table_is_bounded() {
        let mut controller = SubscriptionController::default();
        let first = controller.subscribe(&["1_1"], SubscriptionMode::Ltp).unwrap();

        for token in 2..=u32::try_from(MAX_PENDING_REQUESTS).unwrap() + 10 {
            controller
                .subscribe(&[format!("1_{token}")], SubscriptionMode::Ltp)
                .unwrap();
        }

        assert_eq!(controller.pending_count(), MAX_PENDING_REQUESTS);
        assert_eq!(
            controller.reconcile(&ack(first.request_id, AckStatus::Accepted)),
            AckOutcome::Unmatched
        );
        assert!(controller.book().contains(&Scrip::new(1, 1), SubscriptionMode::Ltp));
    }
}
