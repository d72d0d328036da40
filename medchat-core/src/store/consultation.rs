//! Client-side texts of the medical assistant: welcome messages, titles and
//! the notices the store appends on its own.

use crate::format::truncate_chars;

/// Conversations live under this single storage key.
pub const STORAGE_KEY: &str = "medical_conversations";

pub const OFFLINE_NOTICE: &str = "🔄 Votre message sera envoyé quand la connexion sera rétablie...";

pub const RESPONSE_TIMEOUT_NOTICE: &str =
    "⏱️ Le serveur médical n'a pas répondu à temps. Veuillez renvoyer votre message.";

const GENERIC_SERVER_ERROR: &str = "Une erreur est survenue";

const GREETING: &str = "👋 Bonjour ! Je suis votre assistant médical IA.";

/// Keyword → title, checked in order.
const DISEASE_TITLES: &[(&str, &str)] = &[
    ("bronchite", "🫁 Consultation Bronchite"),
    ("asthme", "🫁 Consultation Asthme"),
    ("pneumonie", "🫁 Consultation Pneumonie"),
    ("grippe", "🤒 Consultation Grippe"),
    ("covid", "🦠 Consultation COVID-19"),
];

/// Opening bot message of a consultation, optionally seeded with a
/// suspected disease from an upstream analysis.
pub fn welcome_text(seed_disease: Option<&str>) -> String {
    match seed_disease.map(str::trim).filter(|d| !d.is_empty()) {
        Some(disease) => format!(
            "{}\n\n🔬 D'après l'analyse de votre enregistrement vocal, il se pourrait qu'il s'agisse d'une {}.\n\nNous allons maintenant procéder à quelques questions pour vérifier cela.",
            GREETING, disease
        ),
        None => format!(
            "{}\n\n🔬 Je suis là pour vous aider à analyser vos symptômes. Quelle maladie souhaitez-vous que nous analysions ensemble ?",
            GREETING
        ),
    }
}

/// Title derived from the first user message.
pub fn medical_title(first_message: &str) -> String {
    let lowered = first_message.to_lowercase();
    if let Some((_, title)) = DISEASE_TITLES
        .iter()
        .find(|(keyword, _)| lowered.contains(keyword))
    {
        return title.to_string();
    }

    if first_message.chars().count() <= 30 {
        format!("🩺 {}", first_message)
    } else {
        format!("🩺 {}...", truncate_chars(first_message, 25))
    }
}

/// Visible text for a backend `error` event.
pub fn server_error_text(message: &str) -> String {
    let message = if message.trim().is_empty() {
        GENERIC_SERVER_ERROR
    } else {
        message
    };
    format!("⚠️ Erreur: {}", message)
}

/// Visible text for a transport failure.
pub fn connection_error_text(error: &str, server_url: &str) -> String {
    format!(
        "❌ Erreur de connexion: {}\n\n🔄 Vérifiez que le serveur médical fonctionne sur {}",
        error, server_url
    )
}
