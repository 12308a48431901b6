//! Canned user-facing texts (Brazilian Portuguese).

use super::intent::{field_label, Intent};

/// Reply to a greeting.
pub const GREETING: &str = "Olá! 👋 Sou o assistente do Zapdesk. \
Posso cadastrar clientes para você. Envie \"ajuda\" para ver os comandos.";

/// Reply to a help request.
pub const HELP: &str = "Comandos disponíveis:\n\
• cadastrar cliente <nome>, email <email>, telefone <telefone>\n\
\n\
Em breve: projetos, agendamentos, lançamentos financeiros e listagem de clientes.";

/// Reply for recognised intents that are not implemented yet.
pub const NOT_AVAILABLE: &str =
    "🚧 Essa funcionalidade ainda está em desenvolvimento. Envie \"ajuda\" para ver o que já está disponível.";

/// Reply for unclassifiable text.
pub const FALLBACK: &str =
    "Não entendi sua mensagem. Pode reformular? Envie \"ajuda\" para ver os comandos disponíveis.";

/// Reply when the sender's phone is not linked to an account.
pub const LINK_REQUIRED: &str = "🔒 Seu número ainda não está vinculado a uma conta. \
Vincule seu telefone no painel do Zapdesk e tente novamente.";

/// Acknowledgement of a negative confirmation.
pub const CANCELLED: &str = "❌ Operação cancelada.";

/// Re-prompt for an ambiguous confirmation answer.
pub const REPROMPT: &str = "Por favor, responda \"sim\" para confirmar ou \"não\" para cancelar.";

/// Generic failure reply.
pub const APOLOGY: &str = "⚠️ Ocorreu um erro ao processar sua mensagem. Tente novamente em instantes.";

/// Question appended to every confirmation prompt.
pub const CONFIRM_QUESTION: &str = "Confirma? (sim/não)";

/// Reply listing the fields missing for an intent.
pub fn missing_fields(intent: Intent, missing: &[String]) -> String {
    let labels: Vec<&str> = missing.iter().map(|f| field_label(f)).collect();
    let mut text = format!("Faltam informações: {}.", labels.join(", "));
    if let Some(example) = intent.example() {
        text.push_str("\nExemplo: ");
        text.push_str(example);
    }
    text
}
