use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::types::TutorSettings;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correction {
    #[serde(default, deserialize_with = "lenient")]
    pub original: String,
    #[serde(default, deserialize_with = "lenient")]
    pub corrected: String,
    #[serde(default, deserialize_with = "lenient")]
    pub explanation: String,
    #[serde(default, deserialize_with = "lenient")]
    pub has_issue: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VocabularyEntry {
    #[serde(default, deserialize_with = "lenient")]
    pub word: String,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub translation: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub part_of_speech: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NaturalAlternative {
    #[serde(default, deserialize_with = "lenient")]
    pub original: String,
    #[serde(default, deserialize_with = "lenient")]
    pub alternatives: Vec<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub explanation: String,
    #[serde(default, deserialize_with = "lenient")]
    pub has_issue: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConjugationForm {
    #[serde(default, deserialize_with = "lenient")]
    pub pronoun: String,
    #[serde(default, deserialize_with = "lenient")]
    pub form: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerbConjugation {
    #[serde(default, deserialize_with = "lenient")]
    pub verb: String,
    #[serde(default, deserialize_with = "lenient")]
    pub tense: String,
    #[serde(default, deserialize_with = "lenient")]
    pub conjugations: Vec<ConjugationForm>,
    #[serde(default, deserialize_with = "lenient")]
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenseExplanation {
    #[serde(default, alias = "original", deserialize_with = "lenient")]
    pub original_tense: String,
    #[serde(default, deserialize_with = "lenient")]
    pub correct_tense: String,
    #[serde(default, deserialize_with = "lenient")]
    pub explanation: String,
    #[serde(default, deserialize_with = "lenient")]
    pub examples: Vec<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub has_issue: bool,
}

/// Field decoder for model output: null or mistyped values fall back to the
/// field's default instead of rejecting the whole item.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    match serde_json::from_value(value) {
        Ok(v) => Ok(v),
        Err(e) => {
            tracing::debug!("Using default for mistyped field: {}", e);
            Ok(T::default())
        }
    }
}

/// The reply contract the model is asked to follow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredResponse {
    pub response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corrections: Option<Vec<Correction>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vocabulary: Option<Vec<VocabularyEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub natural_alternatives: Option<Vec<NaturalAlternative>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verb_conjugations: Option<Vec<VerbConjugation>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tense_explanation: Option<Vec<TenseExplanation>>,
}

impl StructuredResponse {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            response: text.into(),
            ..Self::default()
        }
    }

    pub fn vocabulary(&self) -> &[VocabularyEntry] {
        self.vocabulary.as_deref().unwrap_or(&[])
    }

    /// Subset of the response a learner should see under `settings`.
    ///
    /// Disabled features are dropped, items without `has_issue` set are
    /// hidden, alternatives that repeat a correction are removed, and tense
    /// notes survive only when both tenses are named and differ.
    pub fn for_display(&self, settings: &TutorSettings) -> StructuredResponse {
        let corrections: Vec<Correction> = if settings.always_correct_sentences {
            self.corrections
                .iter()
                .flatten()
                .filter(|c| c.has_issue)
                .cloned()
                .collect()
        } else {
            Vec::new()
        };

        let vocabulary: Vec<VocabularyEntry> = if settings.track_vocabulary {
            self.vocabulary
                .iter()
                .flatten()
                .filter(|v| !v.word.trim().is_empty())
                .cloned()
                .collect()
        } else {
            Vec::new()
        };

        let corrected_texts: Vec<&str> = self
            .corrections
            .iter()
            .flatten()
            .map(|c| c.corrected.as_str())
            .collect();

        let natural_alternatives: Vec<NaturalAlternative> = if settings.suggest_natural_alternatives {
            self.natural_alternatives
                .iter()
                .flatten()
                .filter(|alt| alt.has_issue)
                .filter(|alt| {
                    !alt.alternatives
                        .iter()
                        .any(|a| corrected_texts.contains(&a.as_str()))
                })
                .cloned()
                .collect()
        } else {
            Vec::new()
        };

        let verb_conjugations: Vec<VerbConjugation> = if settings.show_verb_conjugations {
            self.verb_conjugations.iter().flatten().cloned().collect()
        } else {
            Vec::new()
        };

        let tense_explanation: Vec<TenseExplanation> = if settings.explain_tense_usage {
            self.tense_explanation
                .iter()
                .flatten()
                .filter(|t| t.has_issue)
                .filter(|t| {
                    let from = t.original_tense.trim();
                    let to = t.correct_tense.trim();
                    !from.is_empty() && !to.is_empty() && from != to
                })
                .cloned()
                .collect()
        } else {
            Vec::new()
        };

        StructuredResponse {
            response: self.response.clone(),
            corrections: non_empty(corrections),
            vocabulary: non_empty(vocabulary),
            natural_alternatives: non_empty(natural_alternatives),
            verb_conjugations: non_empty(verb_conjugations),
            tense_explanation: non_empty(tense_explanation),
        }
    }

    /// Keeps only the fields whose toggle is on, without any per-item filtering.
    pub fn restricted_to(&self, settings: &TutorSettings) -> StructuredResponse {
        StructuredResponse {
            response: self.response.clone(),
            corrections: self
                .corrections
                .clone()
                .filter(|_| settings.always_correct_sentences),
            vocabulary: self.vocabulary.clone().filter(|_| settings.track_vocabulary),
            natural_alternatives: self
                .natural_alternatives
                .clone()
                .filter(|_| settings.suggest_natural_alternatives),
            verb_conjugations: self
                .verb_conjugations
                .clone()
                .filter(|_| settings.show_verb_conjugations),
            tense_explanation: self
                .tense_explanation
                .clone()
                .filter(|_| settings.explain_tense_usage),
        }
    }
}

fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

/// Conjugations of every verb sharing one tense, laid out as a table.
#[derive(Debug, Clone, PartialEq)]
pub struct ConjugationTable {
    pub tense: String,
    pub verbs: Vec<VerbConjugation>,
    pub pronouns: Vec<String>,
}

const IMPERATIVE_PRONOUNS: [&str; 4] = ["tú", "usted", "vosotros", "ustedes"];

impl ConjugationTable {
    pub fn form(&self, verb_index: usize, pronoun: &str) -> &str {
        self.verbs
            .get(verb_index)
            .and_then(|v| v.conjugations.iter().find(|c| c.pronoun == pronoun))
            .map(|c| c.form.as_str())
            .unwrap_or("")
    }
}

/// Groups conjugations by tense, keeping first-seen order for tenses and pronouns.
pub fn conjugation_tables(conjugations: &[VerbConjugation]) -> Vec<ConjugationTable> {
    let mut tables: Vec<ConjugationTable> = Vec::new();

    for conj in conjugations {
        match tables.iter_mut().find(|t| t.tense == conj.tense) {
            Some(table) => table.verbs.push(conj.clone()),
            None => tables.push(ConjugationTable {
                tense: conj.tense.clone(),
                verbs: vec![conj.clone()],
                pronouns: Vec::new(),
            }),
        }
    }

    for table in &mut tables {
        let pronouns: Vec<String> = if table.tense.to_lowercase().contains("imperativo") {
            IMPERATIVE_PRONOUNS.iter().map(|p| p.to_string()).collect()
        } else {
            let mut seen: Vec<String> = Vec::new();
            for verb in &table.verbs {
                for c in &verb.conjugations {
                    if !seen.contains(&c.pronoun) {
                        seen.push(c.pronoun.clone());
                    }
                }
            }
            seen
        };
        table.pronouns = pronouns
            .into_iter()
            .filter(|p| !p.trim().is_empty())
            .collect();
    }

    tables
}

/// Decodes the model's reply. Never fails: unusable output becomes a plain
/// response carrying the raw text.
pub fn parse_structured_response(raw: &str) -> StructuredResponse {
    let cleaned = strip_code_fences(raw);

    let value: Value = match serde_json::from_str(cleaned) {
        Ok(v) => v,
        Err(_e) => {
            let sanitized = sanitize_json_trailing_commas(cleaned);
            match serde_json::from_str(&sanitized) {
                Ok(v) => v,
                Err(e) => {
                    tracing::debug!("Reply is not JSON ({}), showing raw text", e);
                    return StructuredResponse::plain(raw.trim());
                }
            }
        }
    };

    let obj = match value {
        Value::Object(obj) => obj,
        other => {
            tracing::debug!("Reply JSON is not an object: {}", excerpt(&other.to_string()));
            return StructuredResponse::plain(raw.trim());
        }
    };

    let response = obj
        .get("response")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| raw.trim().to_string());

    StructuredResponse {
        response,
        corrections: decode_items(obj.get("corrections")),
        vocabulary: decode_items(obj.get("vocabulary")),
        natural_alternatives: decode_items(obj.get("natural_alternatives")),
        verb_conjugations: decode_items(obj.get("verb_conjugations")),
        tense_explanation: decode_items(obj.get("tense_explanation")),
    }
}

fn decode_items<T: DeserializeOwned>(value: Option<&Value>) -> Option<Vec<T>> {
    let items = value?.as_array()?;
    let decoded: Vec<T> = items
        .iter()
        .filter(|item| {
            if !item.is_object() {
                tracing::debug!("Skipping non-object item: {}", excerpt(&item.to_string()));
            }
            item.is_object()
        })
        .filter_map(|item| match serde_json::from_value(item.clone()) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::debug!("Skipping malformed item: {}", e);
                None
            }
        })
        .collect();
    Some(decoded)
}

/// Removes a surrounding markdown fence along with any language tag after it.
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric()),
    };
    body.trim_end().trim_end_matches("```").trim()
}

fn excerpt(text: &str) -> String {
    if text.chars().count() > 200 {
        format!("{}…", text.chars().take(200).collect::<String>())
    } else {
        text.to_string()
    }
}

fn sanitize_json_trailing_commas(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;
    let mut escape = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            if escape {
                escape = false;
                continue;
            }
            if c == '\\' {
                escape = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        if c == '"' {
            in_string = true;
            out.push(c);
            continue;
        }

        if c == ',' {
            let mut look = chars.clone();
            while let Some(n) = look.peek() {
                if n.is_whitespace() {
                    look.next();
                } else {
                    break;
                }
            }
            if matches!(look.peek(), Some(']') | Some('}')) {
                continue;
            }
        }

        out.push(c);
    }

    out
}
