//! The per-contact conversation state machine.
//!
//! Two states: `Idle` and `AwaitingConfirmation`. An idle contact's text is
//! classified and, for action intents, checked against the account
//! directory before any entity extraction. A complete entity set moves the
//! contact to `AwaitingConfirmation`; the next "sim" runs the action and
//! "não" drops it. Anything else re-prompts and changes nothing.
//!
//! Every turn ends with at least one reply. Store and NLU failures become a
//! generic apology and a failed log entry; the next turn starts clean.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::intent::{Intent, IntentCategory};
use super::replies;
use super::state::{missing_fields, ConversationState, Entities};
use super::ConversationError;
use crate::actions::{ActionContext, ActionRegistry};
use crate::nlu::{Nlu, NluError};
use crate::store::{AccountDirectory, LogEntry, SessionStore};
use crate::whatsapp::dispatcher::{Delivery, Replier};

/// Answers accepted as "yes".
pub const AFFIRMATIVE: [&str; 2] = ["sim", "s"];

/// Answers accepted as "no".
pub const NEGATIVE: [&str; 3] = ["não", "nao", "n"];

/// Default bound on a single NLU call.
pub const DEFAULT_NLU_TIMEOUT: Duration = Duration::from_secs(20);

/// Branch taken by one turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The pending action ran and the contact is idle again.
    Confirmed(Intent),
    /// The pending action was dropped.
    Cancelled,
    /// The answer was neither yes nor no; still awaiting confirmation.
    Reprompted,
    /// Canned greeting or help reply.
    Informational(Intent),
    /// Recognised intent that is not available yet.
    NotAvailable(Intent),
    /// Unrecognised text.
    Fallback,
    /// Required fields were missing; the contact stays idle.
    MissingFields(Vec<String>),
    /// Confirmation prompt sent and state persisted.
    AwaitingConfirmation(Intent),
    /// The sender's phone is not linked to an account.
    LinkRequired,
    /// The turn failed and the apology path ran.
    Failed,
}

/// Drives one contact's dialogue, one message at a time.
///
/// Callers must serialise [`handle`](Self::handle) per sender; the
/// [`ConversationRouter`](super::router::ConversationRouter) does this.
pub struct ConversationEngine {
    sessions: Arc<dyn SessionStore>,
    accounts: Arc<dyn AccountDirectory>,
    nlu: Arc<dyn Nlu>,
    actions: Arc<ActionRegistry>,
    replier: Arc<dyn Replier>,
    nlu_timeout: Duration,
}

impl std::fmt::Debug for ConversationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationEngine")
            .field("actions", &self.actions)
            .field("nlu_timeout", &self.nlu_timeout)
            .finish_non_exhaustive()
    }
}

impl ConversationEngine {
    /// Create an engine over its collaborators.
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        accounts: Arc<dyn AccountDirectory>,
        nlu: Arc<dyn Nlu>,
        actions: Arc<ActionRegistry>,
        replier: Arc<dyn Replier>,
    ) -> Self {
        Self {
            sessions,
            accounts,
            nlu,
            actions,
            replier,
            nlu_timeout: DEFAULT_NLU_TIMEOUT,
        }
    }

    /// Override the per-call NLU timeout.
    #[must_use]
    pub fn with_nlu_timeout(mut self, timeout: Duration) -> Self {
        self.nlu_timeout = timeout;
        self
    }

    /// Process one inbound message from `sender_id`.
    ///
    /// Never fails: adapter errors are answered with an apology and logged
    /// as a failed turn.
    pub async fn handle(&self, sender_id: &str, text: &str) -> TurnOutcome {
        let span = info_span!("turn", turn_id = %Uuid::new_v4(), sender_id);
        async {
            match self.process(sender_id, text).await {
                Ok(outcome) => {
                    debug!(?outcome, "turn complete");
                    outcome
                }
                Err(e) => {
                    error!(error = %e, "turn failed");
                    self.log(LogEntry::failed(sender_id, &e.to_string())).await;
                    if let Err(reply_err) = self.reply(sender_id, replies::APOLOGY, None).await {
                        warn!(error = %reply_err, "failed to send apology");
                    }
                    TurnOutcome::Failed
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn process(&self, sender_id: &str, text: &str) -> Result<TurnOutcome, ConversationError> {
        let state = self.sessions.get_state(sender_id).await?;
        self.log(LogEntry::inbound(sender_id, text)).await;

        match state {
            ConversationState::AwaitingConfirmation { intent, entities } => {
                self.resolve_confirmation(sender_id, text, intent, &entities).await
            }
            ConversationState::Idle => self.route_intent(sender_id, text).await,
        }
    }

    // -----------------------------------------------------------------------
    // AwaitingConfirmation
    // -----------------------------------------------------------------------

    async fn resolve_confirmation(
        &self,
        sender_id: &str,
        text: &str,
        intent: Intent,
        entities: &Entities,
    ) -> Result<TurnOutcome, ConversationError> {
        let answer = text.trim().to_lowercase();

        if AFFIRMATIVE.contains(&answer.as_str()) {
            let Some(account_id) = self.accounts.resolve_account(sender_id).await? else {
                // Link removed while the confirmation was pending.
                self.sessions.set_state(sender_id, &ConversationState::Idle).await?;
                self.reply(sender_id, replies::LINK_REQUIRED, Some(intent)).await?;
                return Ok(TurnOutcome::LinkRequired);
            };
            let ctx = ActionContext {
                sender_id,
                account_id: &account_id,
                entities,
                replier: self.replier.as_ref(),
            };
            // On failure the state is kept so the contact can answer again.
            self.actions.execute(intent, ctx).await?;
            self.sessions.set_state(sender_id, &ConversationState::Idle).await?;
            info!(%intent, %account_id, "action confirmed");
            return Ok(TurnOutcome::Confirmed(intent));
        }

        if NEGATIVE.contains(&answer.as_str()) {
            self.sessions.set_state(sender_id, &ConversationState::Idle).await?;
            self.reply(sender_id, replies::CANCELLED, Some(intent)).await?;
            info!(%intent, "action cancelled");
            return Ok(TurnOutcome::Cancelled);
        }

        self.reply(sender_id, replies::REPROMPT, Some(intent)).await?;
        Ok(TurnOutcome::Reprompted)
    }

    // -----------------------------------------------------------------------
    // Idle
    // -----------------------------------------------------------------------

    async fn route_intent(&self, sender_id: &str, text: &str) -> Result<TurnOutcome, ConversationError> {
        let intent = self.with_timeout(self.nlu.detect_intent(text)).await?;
        debug!(%intent, "intent detected");

        match intent.category() {
            IntentCategory::Informational => {
                let reply = if intent == Intent::Help {
                    replies::HELP
                } else {
                    replies::GREETING
                };
                self.reply(sender_id, reply, Some(intent)).await?;
                Ok(TurnOutcome::Informational(intent))
            }
            IntentCategory::Action if self.actions.contains(intent) => {
                self.collect_entities(sender_id, text, intent).await
            }
            IntentCategory::Action | IntentCategory::InDevelopment => {
                self.reply(sender_id, replies::NOT_AVAILABLE, Some(intent)).await?;
                Ok(TurnOutcome::NotAvailable(intent))
            }
            IntentCategory::Unknown => {
                self.reply(sender_id, replies::FALLBACK, Some(intent)).await?;
                Ok(TurnOutcome::Fallback)
            }
        }
    }

    async fn collect_entities(
        &self,
        sender_id: &str,
        text: &str,
        intent: Intent,
    ) -> Result<TurnOutcome, ConversationError> {
        if self.accounts.resolve_account(sender_id).await?.is_none() {
            info!(%intent, "sender not linked to an account");
            self.reply(sender_id, replies::LINK_REQUIRED, Some(intent)).await?;
            return Ok(TurnOutcome::LinkRequired);
        }

        let required = intent.required_fields();
        let entities = self
            .with_timeout(self.nlu.extract_entities(text, required))
            .await?;

        let missing = missing_fields(&entities, required);
        if !missing.is_empty() {
            debug!(%intent, ?missing, "incomplete entities");
            self.reply(sender_id, &replies::missing_fields(intent, &missing), Some(intent))
                .await?;
            return Ok(TurnOutcome::MissingFields(missing));
        }

        let prompt = self
            .with_timeout(self.nlu.generate_confirmation_text(intent, &entities))
            .await?;
        let state = ConversationState::AwaitingConfirmation { intent, entities };
        self.sessions.set_state(sender_id, &state).await?;
        self.reply(sender_id, &prompt, Some(intent)).await?;
        Ok(TurnOutcome::AwaitingConfirmation(intent))
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    async fn with_timeout<T>(
        &self,
        call: impl Future<Output = Result<T, NluError>>,
    ) -> Result<T, NluError> {
        match tokio::time::timeout(self.nlu_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(NluError::Timeout(self.nlu_timeout.as_secs())),
        }
    }

    async fn reply(
        &self,
        sender_id: &str,
        text: &str,
        intent: Option<Intent>,
    ) -> Result<(), ConversationError> {
        if self.replier.send_text(sender_id, text).await? == Delivery::Sent {
            let mut entry = LogEntry::outbound(sender_id, text);
            if let Some(intent) = intent {
                entry = entry.with_intent(intent.as_str());
            }
            self.log(entry).await;
        }
        Ok(())
    }

    /// Best effort: a log failure never affects the turn.
    async fn log(&self, entry: LogEntry) {
        if let Err(e) = self.sessions.append_log(&entry).await {
            warn!(error = %e, "failed to append message log");
        }
    }
}
