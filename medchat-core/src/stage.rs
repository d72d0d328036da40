//! Consultation stage inference
//!
//! The chat backend never reports where a consultation stands, so the
//! store infers it from bot text. The rules are phrasing-specific, which is
//! why they sit behind [`StageClassifier`]: a different script or language
//! only needs a different classifier.

use crate::types::ConsultationStage;

/// Maps bot text to an advisory consultation stage.
pub trait StageClassifier: Send + Sync {
    /// Stage suggested by a bot message.
    fn classify(&self, text: &str) -> ConsultationStage;

    /// Whether the message closes the consultation, regardless of what
    /// [`classify`](Self::classify) returned.
    fn is_completion(&self, text: &str) -> bool {
        self.classify(text) == ConsultationStage::Completed
    }
}

/// Keyword rule: any phrase present selects the stage.
#[derive(Debug, Clone)]
pub struct StageRule {
    pub stage: ConsultationStage,
    pub phrases: Vec<String>,
}

impl StageRule {
    pub fn new(stage: ConsultationStage, phrases: &[&str]) -> Self {
        Self {
            stage,
            phrases: phrases.iter().map(|p| p.to_lowercase()).collect(),
        }
    }

    fn matches(&self, lowered: &str) -> bool {
        self.phrases.iter().any(|p| lowered.contains(p.as_str()))
    }
}

/// Case-insensitive keyword classifier; the first matching rule wins.
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    rules: Vec<StageRule>,
    completion: Vec<String>,
}

impl KeywordClassifier {
    pub fn new(rules: Vec<StageRule>, completion_markers: &[&str]) -> Self {
        Self {
            rules,
            completion: completion_markers.iter().map(|m| m.to_lowercase()).collect(),
        }
    }

    /// Rules for the French medical assistant script.
    pub fn french_medical() -> Self {
        Self::new(
            vec![
                StageRule::new(ConsultationStage::Initial, &["quelle maladie", "bonjour"]),
                StageRule::new(
                    ConsultationStage::AskingSymptoms,
                    &["symptômes courants", "avez-vous", "répondez par"],
                ),
                StageRule::new(
                    ConsultationStage::AdditionalSymptoms,
                    &["autres symptômes", "décrivez", "tapez 'aucun'"],
                ),
                StageRule::new(
                    ConsultationStage::Analysis,
                    &[
                        "analyser",
                        "agents médicaux",
                        "peut prendre quelques instants",
                    ],
                ),
                StageRule::new(
                    ConsultationStage::Completed,
                    &["analyse médicale terminée", "conseils et recommandations"],
                ),
            ],
            &["analyse médicale terminée", "conseils et recommandations"],
        )
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::french_medical()
    }
}

impl StageClassifier for KeywordClassifier {
    fn classify(&self, text: &str) -> ConsultationStage {
        let lowered = text.to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.matches(&lowered))
            .map(|rule| rule.stage)
            .unwrap_or(ConsultationStage::Unknown)
    }

    fn is_completion(&self, text: &str) -> bool {
        let lowered = text.to_lowercase();
        self.completion.iter().any(|m| lowered.contains(m.as_str()))
    }
}

/// Phrases in a user message that usually start the analysis phase.
const ANALYSIS_TRIGGERS: &[&str] = &["aucun", "analyser"];

/// Phrases in the last message that make a typing signal mean "analysing".
const ANALYSIS_HINTS: &[&str] = &["analyser", "analyse", "agents médicaux"];

/// Whether sending `text` likely kicks off the analysis.
pub fn triggers_analysis(text: &str) -> bool {
    let lowered = text.to_lowercase();
    ANALYSIS_TRIGGERS.iter().any(|t| lowered.contains(t))
}

/// Whether a typing signal after `text` means the bot is analysing.
pub fn hints_analysis(text: &str) -> bool {
    let lowered = text.to_lowercase();
    ANALYSIS_HINTS.iter().any(|t| lowered.contains(t))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_script_stages() {
        let c = KeywordClassifier::french_medical();
        assert_eq!(
            c.classify("Quelle maladie souhaitez-vous analyser ?"),
            ConsultationStage::Initial
        );
        assert_eq!(
            c.classify("Avez-vous de la fièvre ? Répondez par oui ou non."),
            ConsultationStage::AskingSymptoms
        );
        assert_eq!(
            c.classify("Avez-vous d'autres symptômes ?"),
            ConsultationStage::AskingSymptoms,
            "earlier rule wins when phrases overlap"
        );
        assert_eq!(
            c.classify("Décrivez vos AUTRES SYMPTÔMES ou tapez 'aucun'"),
            ConsultationStage::AdditionalSymptoms
        );
        assert_eq!(
            c.classify("Nos agents médicaux travaillent, cela peut prendre quelques instants"),
            ConsultationStage::Analysis
        );
        assert_eq!(
            c.classify("=== CONSEILS ET RECOMMANDATIONS ==="),
            ConsultationStage::Completed
        );
        assert_eq!(c.classify("Merci."), ConsultationStage::Unknown);
    }

    #[test]
    fn test_completion_overrides_priority() {
        let c = KeywordClassifier::french_medical();
        let text = "Bonjour ! ANALYSE MÉDICALE TERMINÉE";
        assert_eq!(c.classify(text), ConsultationStage::Initial);
        assert!(c.is_completion(text));
        assert!(!c.is_completion("Analyse en cours"));
    }

    #[test]
    fn test_default_completion_uses_classify() {
        struct Fixed;
        impl StageClassifier for Fixed {
            fn classify(&self, _text: &str) -> ConsultationStage {
                ConsultationStage::Completed
            }
        }
        assert!(Fixed.is_completion("anything"));
    }

    #[test]
    fn test_analysis_heuristics() {
        assert!(triggers_analysis("Aucun autre symptôme"));
        assert!(triggers_analysis("vous pouvez analyser"));
        assert!(!triggers_analysis("asthme"));
        assert!(hints_analysis("Je vais lancer l'ANALYSE"));
        assert!(!hints_analysis("Avez-vous de la toux ?"));
    }
}
