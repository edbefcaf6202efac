use super::conversation::TranscriptEntry;
use super::response::{
    ConjugationForm, Correction, NaturalAlternative, StructuredResponse, TenseExplanation,
    VerbConjugation, VocabularyEntry,
};
use super::types::TutorSettings;

const EXAMPLE_CONVERSATION: &str = include_str!("example_conversation.json");

const MOCK_GREETING: &str = "¡Excelente pregunta! Te ayudo con eso.";

/// Offline reply built from simple keyword checks on the learner's input.
pub fn mock_response(input: &str, settings: &TutorSettings) -> StructuredResponse {
    let lower = input.to_lowercase();
    let mut reply = StructuredResponse::plain(MOCK_GREETING);

    if settings.always_correct_sentences {
        if lower.contains("hola") && !lower.contains('¡') {
            reply.corrections = Some(vec![Correction {
                original: input.to_string(),
                corrected: input.replacen("hola", "¡Hola!", 1),
                explanation: "Missing opening exclamation mark for greetings.".to_string(),
                has_issue: true,
            }]);
        } else if lower.contains("como") && lower.contains("estas") {
            reply.corrections = Some(vec![Correction {
                original: input.to_string(),
                corrected: input.replacen("como", "¿cómo?", 1),
                explanation: "Missing accent on \"cómo\" and question marks.".to_string(),
                has_issue: true,
            }]);
        }
    }

    if settings.track_vocabulary {
        let words: Vec<VocabularyEntry> = input
            .split(' ')
            .filter(|w| w.chars().count() > 2)
            .take(3)
            .map(|w| VocabularyEntry {
                word: w.to_string(),
                translation: Some(format!("[{} translation]", w)),
                part_of_speech: Some("noun".to_string()),
            })
            .collect();
        if !words.is_empty() {
            reply.vocabulary = Some(words);
        }
    }

    if settings.show_verb_conjugations && (lower.contains("estar") || lower.contains("ser")) {
        let forms = [
            ("yo", "estoy"),
            ("tú", "estás"),
            ("él/ella/usted", "está"),
            ("nosotros", "estamos"),
            ("vosotros", "estáis"),
            ("ellos/ellas/ustedes", "están"),
        ];
        reply.verb_conjugations = Some(vec![VerbConjugation {
            verb: "estar".to_string(),
            tense: "present".to_string(),
            conjugations: forms
                .iter()
                .map(|(pronoun, form)| ConjugationForm {
                    pronoun: pronoun.to_string(),
                    form: form.to_string(),
                })
                .collect(),
            explanation: "Use \"estar\" for temporary states and locations.".to_string(),
        }]);
    }

    if settings.suggest_natural_alternatives && reply.corrections.is_some() {
        reply.natural_alternatives = Some(vec![NaturalAlternative {
            original: input.to_string(),
            alternatives: vec![
                "¿Cómo estás?".to_string(),
                "¿Qué tal estás?".to_string(),
                "¿Cómo te va?".to_string(),
            ],
            explanation: "These are more natural ways to ask how someone is doing.".to_string(),
            has_issue: true,
        }]);
    }

    if settings.explain_tense_usage && lower.contains("ayer") && lower.contains("voy") {
        reply.tense_explanation = Some(vec![TenseExplanation {
            original_tense: "presente".to_string(),
            correct_tense: "pretérito".to_string(),
            explanation: "Use the preterite tense for completed actions in the past.".to_string(),
            examples: vec![
                "Ayer fui al parque.".to_string(),
                "La semana pasada visité a mi familia.".to_string(),
            ],
            has_issue: true,
        }]);
    }

    reply
}

/// The canned three-exchange Spanish conversation.
pub fn example_conversation() -> Vec<TranscriptEntry> {
    match serde_json::from_str(EXAMPLE_CONVERSATION) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::error!("Failed to load example conversation: {}", e);
            Vec::new()
        }
    }
}

/// Example conversation with every disabled feature stripped from the replies.
pub fn filter_example(settings: &TutorSettings) -> Vec<TranscriptEntry> {
    example_conversation()
        .into_iter()
        .map(|mut entry| {
            entry.structured = entry.structured.map(|s| s.restricted_to(settings));
            entry
        })
        .collect()
}
