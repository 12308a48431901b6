//! Intent labels and their routing metadata.

use serde::{Deserialize, Serialize};

/// Intent label from the fixed set understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Intent {
    /// Register a new client.
    CreateClient,
    /// Open a new project.
    CreateProject,
    /// Book an appointment.
    ScheduleAppointment,
    /// Record an income or expense.
    RecordTransaction,
    /// List registered clients.
    ListClients,
    /// Salutation.
    Greeting,
    /// Usage help.
    Help,
    /// Text the NLU could not classify.
    Unknown,
}

/// How the engine routes an intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentCategory {
    /// Collects entities and asks for confirmation before acting.
    Action,
    /// Answered with a canned reply.
    Informational,
    /// Recognised but not available yet.
    InDevelopment,
    /// Fallback sentinel.
    Unknown,
}

/// Every intent, in declaration order.
pub const ALL_INTENTS: [Intent; 8] = [
    Intent::CreateClient,
    Intent::CreateProject,
    Intent::ScheduleAppointment,
    Intent::RecordTransaction,
    Intent::ListClients,
    Intent::Greeting,
    Intent::Help,
    Intent::Unknown,
];

impl Intent {
    /// Wire label, e.g. `create-client`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateClient => "create-client",
            Self::CreateProject => "create-project",
            Self::ScheduleAppointment => "schedule-appointment",
            Self::RecordTransaction => "record-transaction",
            Self::ListClients => "list-clients",
            Self::Greeting => "greeting",
            Self::Help => "help",
            Self::Unknown => "unknown",
        }
    }

    /// Parse a label. Anything unrecognised is [`Intent::Unknown`].
    pub fn from_label(label: &str) -> Self {
        let label = label.trim().to_lowercase().replace('_', "-");
        ALL_INTENTS
            .into_iter()
            .find(|intent| intent.as_str() == label)
            .unwrap_or(Self::Unknown)
    }

    /// Routing category.
    pub fn category(&self) -> IntentCategory {
        match self {
            Self::CreateClient => IntentCategory::Action,
            Self::CreateProject
            | Self::ScheduleAppointment
            | Self::RecordTransaction
            | Self::ListClients => IntentCategory::InDevelopment,
            Self::Greeting | Self::Help => IntentCategory::Informational,
            Self::Unknown => IntentCategory::Unknown,
        }
    }

    /// Entity fields that must be present before confirmation.
    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            Self::CreateClient => &["nome", "email", "telefone"],
            _ => &[],
        }
    }

    /// Example phrasing shown when required fields are missing.
    pub fn example(&self) -> Option<&'static str> {
        match self {
            Self::CreateClient => Some(
                "cadastrar cliente Maria Santos, email maria@email.com, telefone (11) 98765-4321",
            ),
            _ => None,
        }
    }

    /// Kind of business record the intent writes, if any.
    pub fn record_kind(&self) -> Option<&'static str> {
        match self {
            Self::CreateClient => Some("client"),
            _ => None,
        }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Human label for an entity field.
pub fn field_label(field: &str) -> &str {
    match field {
        "nome" => "Nome",
        "email" => "E-mail",
        "telefone" => "Telefone",
        other => other,
    }
}
