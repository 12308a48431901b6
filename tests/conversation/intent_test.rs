//! Tests for intent labels and routing metadata.

use zapdesk::conversation::intent::{field_label, Intent, IntentCategory, ALL_INTENTS};

#[test]
fn labels_parse_leniently() {
    assert_eq!(Intent::from_label("create-client"), Intent::CreateClient);
    assert_eq!(Intent::from_label("  CREATE_CLIENT "), Intent::CreateClient);
    assert_eq!(Intent::from_label("greeting"), Intent::Greeting);
    assert_eq!(Intent::from_label("delete-everything"), Intent::Unknown);
    assert_eq!(Intent::from_label(""), Intent::Unknown);
}

#[test]
fn every_label_round_trips_through_from_label() {
    for intent in ALL_INTENTS {
        assert_eq!(Intent::from_label(intent.as_str()), intent);
        assert_eq!(intent.to_string(), intent.as_str());
    }
}

#[test]
fn categories_match_routing_table() {
    assert_eq!(Intent::CreateClient.category(), IntentCategory::Action);
    assert_eq!(Intent::Greeting.category(), IntentCategory::Informational);
    assert_eq!(Intent::Help.category(), IntentCategory::Informational);
    for intent in [
        Intent::CreateProject,
        Intent::ScheduleAppointment,
        Intent::RecordTransaction,
        Intent::ListClients,
    ] {
        assert_eq!(intent.category(), IntentCategory::InDevelopment, "{intent}");
    }
    assert_eq!(Intent::Unknown.category(), IntentCategory::Unknown);
}

#[test]
fn only_create_client_requires_fields() {
    assert_eq!(
        Intent::CreateClient.required_fields(),
        &["nome", "email", "telefone"]
    );
    assert_eq!(Intent::CreateClient.record_kind(), Some("client"));
    assert!(Intent::CreateClient.example().is_some());
    for intent in ALL_INTENTS.into_iter().filter(|i| *i != Intent::CreateClient) {
        assert!(intent.required_fields().is_empty(), "{intent}");
        assert!(intent.record_kind().is_none(), "{intent}");
    }
}

#[test]
fn serde_uses_kebab_case_labels() {
    let json = serde_json::to_string(&Intent::ScheduleAppointment).expect("serialize");
    assert_eq!(json, "\"schedule-appointment\"");
    let parsed: Intent = serde_json::from_str("\"list-clients\"").expect("deserialize");
    assert_eq!(parsed, Intent::ListClients);
}

#[test]
fn field_labels_are_human_readable() {
    assert_eq!(field_label("nome"), "Nome");
    assert_eq!(field_label("email"), "E-mail");
    assert_eq!(field_label("telefone"), "Telefone");
    assert_eq!(field_label("cidade"), "cidade");
}
