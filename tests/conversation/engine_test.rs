//! Tests for the ConversationEngine state machine.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use zapdesk::actions::ActionRegistry;
use zapdesk::conversation::engine::{ConversationEngine, TurnOutcome};
use zapdesk::conversation::intent::Intent;
use zapdesk::conversation::replies;
use zapdesk::conversation::state::ConversationState;
use zapdesk::store::{Database, Direction, LogStatus};

use crate::support::{
    awaiting_client, BrokenReplier, CountingNlu, Fixture, MemoryDirectory, MemorySessionStore,
    NoopSessionStore, RecordingAction, RecordingReplier, ACTION_DONE, CREATE_CLIENT_TEXT, LINKED,
    UNLINKED,
};

fn assert_state_invariant(state: &ConversationState) {
    if let ConversationState::AwaitingConfirmation { intent, entities } = state {
        for field in intent.required_fields() {
            assert!(entities.contains_key(*field), "missing {field} in pending state");
        }
        assert!(!entities.is_empty());
    }
}

// ---------------------------------------------------------------------------
// End-to-end scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn linked_sender_complete_request_awaits_confirmation() {
    let f = Fixture::new();

    let outcome = f.engine.handle(LINKED, CREATE_CLIENT_TEXT).await;
    assert_eq!(outcome, TurnOutcome::AwaitingConfirmation(Intent::CreateClient));

    match f.sessions.state(LINKED) {
        ConversationState::AwaitingConfirmation { intent, entities } => {
            assert_eq!(intent, Intent::CreateClient);
            assert_eq!(entities.get("nome"), Some(&json!("Maria Santos")));
            assert_eq!(entities.get("email"), Some(&json!("maria@email.com")));
            assert_eq!(entities.get("telefone"), Some(&json!("(11) 98765-4321")));
        }
        ConversationState::Idle => panic!("expected pending confirmation"),
    }

    let texts = f.replier.texts();
    assert_eq!(texts.len(), 1);
    assert!(texts[0].contains("Maria Santos"));
    assert!(texts[0].contains(replies::CONFIRM_QUESTION));
    assert_eq!(f.action.calls(), 0);
}

#[tokio::test]
async fn unlinked_sender_is_asked_to_link_before_extraction() {
    let f = Fixture::new();

    let outcome = f.engine.handle(UNLINKED, CREATE_CLIENT_TEXT).await;
    assert_eq!(outcome, TurnOutcome::LinkRequired);
    assert_eq!(f.replier.texts(), vec![replies::LINK_REQUIRED.to_owned()]);
    assert_eq!(f.sessions.state(UNLINKED), ConversationState::Idle);
    assert_eq!(f.sessions.set_calls(), 0);
    assert_eq!(f.nlu.extract_calls.load(Ordering::SeqCst), 0);
    assert_eq!(f.nlu.confirm_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn greeting_gets_canned_reply_without_state_change() {
    let f = Fixture::new();

    let outcome = f.engine.handle(LINKED, "oi").await;
    assert_eq!(outcome, TurnOutcome::Informational(Intent::Greeting));
    assert_eq!(f.replier.texts(), vec![replies::GREETING.to_owned()]);
    assert_eq!(f.sessions.set_calls(), 0);
    assert_eq!(f.sessions.state(LINKED), ConversationState::Idle);
}

#[tokio::test]
async fn help_gets_help_text() {
    let f = Fixture::new();
    let outcome = f.engine.handle(UNLINKED, "ajuda").await;
    assert_eq!(outcome, TurnOutcome::Informational(Intent::Help));
    assert_eq!(f.replier.texts(), vec![replies::HELP.to_owned()]);
}

#[tokio::test]
async fn in_development_intent_is_not_available() {
    let f = Fixture::new();
    let outcome = f.engine.handle(LINKED, "quero agendar uma reunião amanhã").await;
    assert_eq!(outcome, TurnOutcome::NotAvailable(Intent::ScheduleAppointment));
    assert_eq!(f.replier.texts(), vec![replies::NOT_AVAILABLE.to_owned()]);
    assert_eq!(f.sessions.set_calls(), 0);
}

#[tokio::test]
async fn unknown_text_gets_fallback() {
    let f = Fixture::new();
    let outcome = f.engine.handle(LINKED, "qual a previsão do tempo?").await;
    assert_eq!(outcome, TurnOutcome::Fallback);
    assert_eq!(f.replier.texts(), vec![replies::FALLBACK.to_owned()]);
    assert_eq!(f.sessions.set_calls(), 0);
}

#[tokio::test]
async fn action_intent_without_handler_is_not_available() {
    let sessions = Arc::new(NoopSessionStore);
    let replier = Arc::new(RecordingReplier::default());
    let engine = ConversationEngine::new(
        sessions as _,
        Arc::new(MemoryDirectory::linking(LINKED, "acct-1")) as _,
        Arc::new(CountingNlu::default()) as _,
        Arc::new(ActionRegistry::new()),
        Arc::clone(&replier) as _,
    );

    let outcome = engine.handle(LINKED, CREATE_CLIENT_TEXT).await;
    assert_eq!(outcome, TurnOutcome::NotAvailable(Intent::CreateClient));
    assert_eq!(replier.texts(), vec![replies::NOT_AVAILABLE.to_owned()]);
}

// ---------------------------------------------------------------------------
// Entity collection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_fields_are_listed_and_state_stays_idle() {
    let f = Fixture::new();

    let outcome = f.engine.handle(LINKED, "cadastrar cliente Maria Santos").await;
    assert_eq!(
        outcome,
        TurnOutcome::MissingFields(vec!["email".to_owned(), "telefone".to_owned()])
    );
    assert_eq!(f.sessions.state(LINKED), ConversationState::Idle);
    assert_eq!(f.sessions.set_calls(), 0);
    assert_eq!(f.nlu.confirm_calls.load(Ordering::SeqCst), 0);

    let texts = f.replier.texts();
    assert_eq!(texts.len(), 1);
    assert!(texts[0].contains("E-mail"));
    assert!(texts[0].contains("Telefone"));
    assert!(texts[0].contains("Exemplo"));
}

#[tokio::test]
async fn partial_entities_do_not_accumulate_across_turns() {
    let f = Fixture::new();

    f.engine.handle(LINKED, "cadastrar cliente Maria Santos").await;
    let outcome = f
        .engine
        .handle(LINKED, "email maria@email.com, telefone (11) 98765-4321")
        .await;
    assert_eq!(outcome, TurnOutcome::Fallback);
    assert_eq!(f.sessions.state(LINKED), ConversationState::Idle);
}

// ---------------------------------------------------------------------------
// Confirmation resolution
// ---------------------------------------------------------------------------

#[tokio::test]
async fn yes_runs_handler_once_and_resets_state() {
    let f = Fixture::new();
    f.sessions.seed(LINKED, awaiting_client());

    let outcome = f.engine.handle(LINKED, "sim").await;
    assert_eq!(outcome, TurnOutcome::Confirmed(Intent::CreateClient));
    assert_eq!(f.action.calls(), 1);
    assert_eq!(f.sessions.state(LINKED), ConversationState::Idle);
    assert_eq!(f.replier.texts(), vec![ACTION_DONE.to_owned()]);
    assert_eq!(f.nlu.total_calls(), 0);

    let account = f.action.last_account.lock().expect("account lock").clone();
    assert_eq!(account.map(|a| a.0), Some("acct-1".to_owned()));
}

#[tokio::test]
async fn yes_is_case_and_whitespace_insensitive() {
    for answer in ["S", "  Sim ", "SIM"] {
        let f = Fixture::new();
        f.sessions.seed(LINKED, awaiting_client());
        let outcome = f.engine.handle(LINKED, answer).await;
        assert_eq!(outcome, TurnOutcome::Confirmed(Intent::CreateClient), "{answer:?}");
    }
}

#[tokio::test]
async fn no_resets_state_without_running_handler() {
    for answer in ["não", "nao", "n", "NÃO"] {
        let f = Fixture::new();
        f.sessions.seed(LINKED, awaiting_client());

        let outcome = f.engine.handle(LINKED, answer).await;
        assert_eq!(outcome, TurnOutcome::Cancelled, "{answer:?}");
        assert_eq!(f.action.calls(), 0);
        assert_eq!(f.sessions.state(LINKED), ConversationState::Idle);
        assert_eq!(f.replier.texts(), vec![replies::CANCELLED.to_owned()]);
    }
}

#[tokio::test]
async fn ambiguous_answer_reprompts_and_keeps_state() {
    let f = Fixture::new();
    f.sessions.seed(LINKED, awaiting_client());

    let outcome = f.engine.handle(LINKED, "talvez").await;
    assert_eq!(outcome, TurnOutcome::Reprompted);
    assert_eq!(f.action.calls(), 0);
    assert_eq!(f.sessions.state(LINKED), awaiting_client());
    assert_eq!(f.sessions.set_calls(), 0);
    assert_eq!(f.replier.texts(), vec![replies::REPROMPT.to_owned()]);
    assert_eq!(f.nlu.total_calls(), 0);
}

#[tokio::test]
async fn full_round_trip_from_request_to_commit() {
    let f = Fixture::new();

    f.engine.handle(LINKED, CREATE_CLIENT_TEXT).await;
    assert_state_invariant(&f.sessions.state(LINKED));
    f.engine.handle(LINKED, "hmm").await;
    assert_state_invariant(&f.sessions.state(LINKED));
    let outcome = f.engine.handle(LINKED, "sim").await;

    assert_eq!(outcome, TurnOutcome::Confirmed(Intent::CreateClient));
    assert_eq!(f.action.calls(), 1);
    assert_eq!(f.sessions.state(LINKED), ConversationState::Idle);
    assert_eq!(f.replier.count(), 3);
}

#[tokio::test]
async fn confirmation_after_unlink_requires_link_and_resets() {
    let f = Fixture::new();
    f.sessions.seed(LINKED, awaiting_client());
    f.directory.unlink(LINKED);

    let outcome = f.engine.handle(LINKED, "sim").await;
    assert_eq!(outcome, TurnOutcome::LinkRequired);
    assert_eq!(f.action.calls(), 0);
    assert_eq!(f.sessions.state(LINKED), ConversationState::Idle);
}

#[tokio::test]
async fn failed_handler_keeps_pending_state_for_retry() {
    let f = Fixture::build(CountingNlu::default(), RecordingAction::failing());
    f.sessions.seed(LINKED, awaiting_client());

    let outcome = f.engine.handle(LINKED, "sim").await;
    assert_eq!(outcome, TurnOutcome::Failed);
    assert_eq!(f.sessions.state(LINKED), awaiting_client());
    assert_eq!(f.replier.texts(), vec![replies::APOLOGY.to_owned()]);
}

#[tokio::test]
async fn lost_completion_reply_does_not_repeat_the_record() {
    let db = Database::open_in_memory().await.expect("open db");
    let sessions = Arc::new(MemorySessionStore::default());
    let replier = Arc::new(BrokenReplier::default());
    let engine = ConversationEngine::new(
        Arc::clone(&sessions) as _,
        Arc::new(MemoryDirectory::linking(LINKED, "acct-1")) as _,
        Arc::new(CountingNlu::default()) as _,
        Arc::new(ActionRegistry::with_defaults(db.pool().clone())),
        Arc::clone(&replier) as _,
    );
    sessions.seed(LINKED, awaiting_client());

    let outcome = engine.handle(LINKED, "sim").await;
    assert_eq!(outcome, TurnOutcome::Confirmed(Intent::CreateClient));
    assert_eq!(sessions.state(LINKED), ConversationState::Idle);
    assert!(replier.attempts() >= 1);

    // A repeated "sim" is an ordinary idle message now.
    let outcome = engine.handle(LINKED, "sim").await;
    assert_ne!(outcome, TurnOutcome::Confirmed(Intent::CreateClient));

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM business_records")
        .fetch_one(db.pool())
        .await
        .expect("count");
    assert_eq!(count, 1);
}

// ---------------------------------------------------------------------------
// Error handling
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn stuck_nlu_times_out_with_apology() {
    let f = Fixture::build_with_timeout(
        CountingNlu::with_delay(Duration::from_secs(120)),
        RecordingAction::default(),
        Duration::from_secs(5),
    );

    let outcome = f.engine.handle(LINKED, "oi").await;
    assert_eq!(outcome, TurnOutcome::Failed);
    assert_eq!(f.replier.texts(), vec![replies::APOLOGY.to_owned()]);

    let failed: Vec<_> = f
        .sessions
        .logs()
        .into_iter()
        .filter(|e| e.status == LogStatus::Failed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert!(failed[0].text.contains("timed out"));
}

#[tokio::test]
async fn state_write_failure_is_surfaced_as_failure() {
    let f = Fixture::new();
    f.sessions.fail_set();

    let outcome = f.engine.handle(LINKED, CREATE_CLIENT_TEXT).await;
    assert_eq!(outcome, TurnOutcome::Failed);
    assert_eq!(f.replier.texts(), vec![replies::APOLOGY.to_owned()]);
    assert_eq!(f.sessions.state(LINKED), ConversationState::Idle);
}

#[tokio::test]
async fn state_read_failure_is_answered_and_next_turn_works() {
    let f = Fixture::new();
    f.sessions.fail_get();
    assert_eq!(f.engine.handle(LINKED, "oi").await, TurnOutcome::Failed);

    let g = Fixture::new();
    assert_eq!(
        g.engine.handle(LINKED, "oi").await,
        TurnOutcome::Informational(Intent::Greeting)
    );
}

#[tokio::test]
async fn log_failures_are_swallowed() {
    let f = Fixture::new();
    f.sessions.fail_log();

    assert_eq!(
        f.engine.handle(LINKED, "oi").await,
        TurnOutcome::Informational(Intent::Greeting)
    );
    assert_eq!(
        f.engine.handle(LINKED, CREATE_CLIENT_TEXT).await,
        TurnOutcome::AwaitingConfirmation(Intent::CreateClient)
    );
    assert!(f.sessions.logs().is_empty());
}

#[tokio::test]
async fn inbound_and_outbound_messages_are_logged() {
    let f = Fixture::new();
    f.engine.handle(LINKED, "oi").await;

    let logs = f.sessions.logs();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0].direction, Direction::Inbound);
    assert_eq!(logs[0].status, LogStatus::Received);
    assert_eq!(logs[0].text, "oi");
    assert_eq!(logs[1].direction, Direction::Outbound);
    assert_eq!(logs[1].intent.as_deref(), Some("greeting"));
}

// ---------------------------------------------------------------------------
// Determinism
// ---------------------------------------------------------------------------

#[tokio::test]
async fn same_input_with_stateless_store_takes_same_branch() {
    let replier = Arc::new(RecordingReplier::default());
    let engine = ConversationEngine::new(
        Arc::new(NoopSessionStore) as _,
        Arc::new(MemoryDirectory::linking(LINKED, "acct-1")) as _,
        Arc::new(CountingNlu::default()) as _,
        Arc::new(ActionRegistry::new()),
        Arc::clone(&replier) as _,
    );

    for text in [CREATE_CLIENT_TEXT, "oi", "sim", "blá blá"] {
        let first = engine.handle(LINKED, text).await;
        let second = engine.handle(LINKED, text).await;
        assert_eq!(first, second, "{text:?}");
    }
}
