//! Deterministic keyword and regex NLU.
//!
//! Intent rules run against a normalised copy of the text (lowercase, no
//! diacritics) so "não", "nao", "Cadastrar" and "cadastrar" all match the
//! same way. Entities are extracted from the original text to keep names
//! in their original case.

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use super::{Nlu, NluError};
use crate::conversation::intent::{field_label, Intent};
use crate::conversation::replies;
use crate::conversation::state::{display_value, Entities};

/// Intent rules, tested in order. First match wins.
const INTENT_RULES: [(Intent, &str); 7] = [
    (
        Intent::CreateClient,
        r"\b(cadastr\w*|registr\w*|criar|crie|adicion\w*|incluir|novo|nova)\s+(um\s+|uma\s+|o\s+|a\s+)?(novo\s+)?cliente\b",
    ),
    (
        Intent::ListClients,
        r"\b(listar|liste|lista|ver|mostr\w*|quais)\s+(os\s+|meus\s+|todos\s+os\s+)?clientes\b",
    ),
    (
        Intent::CreateProject,
        r"\b(cadastr\w*|criar|crie|abrir|novo|nova)\s+(um\s+|o\s+)?(novo\s+)?projeto\b",
    ),
    (
        Intent::ScheduleAppointment,
        r"\b(agend\w*|marcar|remarcar|reuniao|compromisso)\b",
    ),
    (
        Intent::RecordTransaction,
        r"\b(receita|despesa|lancamento|lancar|pagamento|recebi|paguei|gastei|transacao)\b",
    ),
    (Intent::Help, r"\b(ajuda|help|comandos|menu|socorro)\b"),
    (
        Intent::Greeting,
        r"^\W*(oi+|ola|bom dia|boa tarde|boa noite|e ai|eai|hey|hello|hi)\b",
    ),
];

const EMAIL_PATTERN: &str = r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}";
const PHONE_PATTERN: &str = r"(?:\+?55\s?)?\(?\d{2}\)?\s?9?\d{4}[\-\s]?\d{4}";
const NAME_AFTER_KEYWORD: &str = r"(?i)\bnome\b\s*[:\-]?\s*([^,;\n]+)";
const NAME_AFTER_CLIENT: &str = r"(?i)\bcliente\b\s*[:\-]?\s*([^,;\n]+)";
/// Where a captured name stops when the text has no commas.
const NAME_TERMINATOR: &str = r"(?i)\s+(?:e\s+)?(?:e-?mail|telefone|tel|fone|celular|whats\w*)\b|\s+\S+@|\s+[\d(+]";

/// Keyword and regex NLU backend.
#[derive(Debug, Clone)]
pub struct RulesNlu {
    intent_rules: Vec<(Intent, Regex)>,
    email: Option<Regex>,
    phone: Option<Regex>,
    name_after_keyword: Option<Regex>,
    name_after_client: Option<Regex>,
    name_terminator: Option<Regex>,
}

impl Default for RulesNlu {
    fn default() -> Self {
        Self::new()
    }
}

impl RulesNlu {
    /// Compile the rule set.
    pub fn new() -> Self {
        let intent_rules = INTENT_RULES
            .iter()
            .filter_map(|(intent, pattern)| Regex::new(pattern).ok().map(|re| (*intent, re)))
            .collect();
        Self {
            intent_rules,
            email: Regex::new(EMAIL_PATTERN).ok(),
            phone: Regex::new(PHONE_PATTERN).ok(),
            name_after_keyword: Regex::new(NAME_AFTER_KEYWORD).ok(),
            name_after_client: Regex::new(NAME_AFTER_CLIENT).ok(),
            name_terminator: Regex::new(NAME_TERMINATOR).ok(),
        }
    }

    /// Classify normalised text. Never fails.
    pub fn classify(&self, text: &str) -> Intent {
        let normalized = normalize(text);
        self.intent_rules
            .iter()
            .find(|(_, re)| re.is_match(&normalized))
            .map_or(Intent::Unknown, |(intent, _)| *intent)
    }

    /// Extract the requested fields from `text`.
    pub fn extract(&self, text: &str, fields: &[&str]) -> Entities {
        let mut entities = Entities::new();
        for field in fields {
            let value = match *field {
                "email" => find_match(self.email.as_ref(), text),
                "telefone" => find_match(self.phone.as_ref(), text),
                "nome" => self.extract_name(text),
                other => extract_labelled(other, text),
            };
            if let Some(value) = value {
                entities.insert((*field).to_owned(), Value::String(value));
            }
        }
        entities
    }

    fn extract_name(&self, text: &str) -> Option<String> {
        let raw = [&self.name_after_keyword, &self.name_after_client]
            .into_iter()
            .filter_map(Option::as_ref)
            .find_map(|re| re.captures(text).and_then(|c| c.get(1)))
            .map(|m| m.as_str())?;

        let cut = match &self.name_terminator {
            Some(re) => re.find(raw).map_or(raw, |m| &raw[..m.start()]),
            None => raw,
        };
        let name = cut.trim().trim_end_matches(['.', ':', '-']).trim();
        (!name.is_empty()).then(|| name.to_owned())
    }
}

fn find_match(re: Option<&Regex>, text: &str) -> Option<String> {
    re?.find(text).map(|m| m.as_str().trim().to_owned())
}

fn extract_labelled(field: &str, text: &str) -> Option<String> {
    let pattern = format!(r"(?i)\b{}\b\s*[:\-]?\s*([^,;\n]+)", regex::escape(field));
    let re = Regex::new(&pattern).ok()?;
    let value = re.captures(text)?.get(1)?.as_str().trim();
    (!value.is_empty()).then(|| value.to_owned())
}

/// Lowercase and strip Portuguese diacritics.
pub fn normalize(text: &str) -> String {
    text.trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            other => other,
        })
        .collect()
}

/// Template confirmation prompt listing each entity.
pub fn confirmation_template(intent: Intent, entities: &Entities) -> String {
    let title = match intent {
        Intent::CreateClient => "📋 Confirme o cadastro do cliente:",
        _ => "📋 Confirme os dados:",
    };
    let mut text = String::from(title);
    let ordered: Vec<&str> = if intent.required_fields().is_empty() {
        entities.keys().map(String::as_str).collect()
    } else {
        intent.required_fields().to_vec()
    };
    for field in ordered {
        if let Some(value) = entities.get(field) {
            text.push_str(&format!("\n• {}: {}", field_label(field), display_value(value)));
        }
    }
    text.push_str("\n\n");
    text.push_str(replies::CONFIRM_QUESTION);
    text
}

#[async_trait]
impl Nlu for RulesNlu {
    async fn detect_intent(&self, text: &str) -> Result<Intent, NluError> {
        Ok(self.classify(text))
    }

    async fn extract_entities(&self, text: &str, fields: &[&str]) -> Result<Entities, NluError> {
        Ok(self.extract(text, fields))
    }

    async fn generate_confirmation_text(
        &self,
        intent: Intent,
        entities: &Entities,
    ) -> Result<String, NluError> {
        Ok(confirmation_template(intent, entities))
    }
}
