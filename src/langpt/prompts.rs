use super::types::TutorSettings;

/// Languages offered in the settings picker, as `(code, display name)`.
pub const AVAILABLE_LANGUAGES: [(&str, &str); 20] = [
    ("spanish", "Spanish"),
    ("french", "French"),
    ("german", "German"),
    ("italian", "Italian"),
    ("portuguese", "Portuguese"),
    ("japanese", "Japanese"),
    ("chinese", "Chinese"),
    ("korean", "Korean"),
    ("russian", "Russian"),
    ("arabic", "Arabic"),
    ("dutch", "Dutch"),
    ("swedish", "Swedish"),
    ("norwegian", "Norwegian"),
    ("danish", "Danish"),
    ("polish", "Polish"),
    ("turkish", "Turkish"),
    ("greek", "Greek"),
    ("hebrew", "Hebrew"),
    ("hindi", "Hindi"),
    ("thai", "Thai"),
];

pub fn is_available_language(code: &str) -> bool {
    AVAILABLE_LANGUAGES.iter().any(|(c, _)| *c == code)
}

pub fn language_name(code: &str) -> &str {
    if let Some((_, name)) = AVAILABLE_LANGUAGES.iter().find(|(c, _)| *c == code) {
        return name;
    }
    match code {
        "en" => "English",
        "fr" => "French",
        "es" => "Spanish",
        "de" => "German",
        "it" => "Italian",
        "pt" => "Portuguese",
        "ja" | "jp" => "Japanese",
        "ko" => "Korean",
        "zh" | "cn" => "Chinese",
        "nl" => "Dutch",
        "sv" => "Swedish",
        "ru" => "Russian",
        "ar" => "Arabic",
        "hi" => "Hindi",
        "tr" => "Turkish",
        "pl" => "Polish",
        "th" => "Thai",
        "el" => "Greek",
        "he" | "iw" => "Hebrew",
        "da" => "Danish",
        "no" | "nb" => "Norwegian",
        // If someone types the full language name, pass it through
        _ => code,
    }
}

/// JSON shape the model is asked to return. Only enabled features appear.
pub fn response_shape(settings: &TutorSettings) -> String {
    let lang_name = language_name(&settings.target_language);
    let mut fields: Vec<String> = vec![format!(
        "  \"response\": \"your conversational reply, written in {lang_name}\""
    )];

    if settings.always_correct_sentences {
        fields.push(
            r#"  "corrections": [
    { "original": "the user's sentence", "corrected": "the corrected sentence", "explanation": "why it was wrong", "has_issue": true }
  ]"#
            .to_string(),
        );
    }

    if settings.track_vocabulary {
        fields.push(
            r#"  "vocabulary": [
    { "word": "a useful word from the exchange", "translation": "English translation", "part_of_speech": "noun|verb|adjective|adverb|..." }
  ]"#
            .to_string(),
        );
    }

    if settings.suggest_natural_alternatives {
        fields.push(
            r#"  "natural_alternatives": [
    { "original": "the user's phrase", "alternatives": ["a more natural phrasing", "another option"], "explanation": "why these sound more natural", "has_issue": true }
  ]"#
            .to_string(),
        );
    }

    if settings.show_verb_conjugations {
        fields.push(
            r#"  "verb_conjugations": [
    { "verb": "infinitive", "tense": "tense name", "conjugations": [ { "pronoun": "...", "form": "..." } ], "explanation": "when this form is used" }
  ]"#
            .to_string(),
        );
    }

    if settings.explain_tense_usage {
        fields.push(
            r#"  "tense_explanation": [
    { "original_tense": "tense the user used", "correct_tense": "tense that should be used", "explanation": "why", "examples": ["example sentence"], "has_issue": true }
  ]"#
            .to_string(),
        );
    }

    format!("{{\n{}\n}}", fields.join(",\n"))
}

/// Numbered behaviour rules matching the enabled features.
pub fn response_rules(settings: &TutorSettings) -> Vec<String> {
    let mut rules: Vec<String> = Vec::new();

    if settings.always_correct_sentences {
        let mut focus: Vec<&str> = vec!["grammar", "spelling"];
        if settings.correct_punctuation {
            focus.push("punctuation");
        }
        if settings.correct_capitalization {
            focus.push("capitalization");
        }
        if settings.correct_accents {
            focus.push("accents and diacritics");
        }
        let mut rule = format!(
            "Check every sentence the user writes for {} errors and list each one in \"corrections\" with an explanation.",
            focus.join(", ")
        );
        let ignored: Vec<&str> = [
            (!settings.correct_punctuation, "punctuation"),
            (!settings.correct_capitalization, "capitalization"),
            (!settings.correct_accents, "missing accents"),
        ]
        .into_iter()
        .filter_map(|(skip, name)| skip.then_some(name))
        .collect();
        if !ignored.is_empty() {
            rule.push_str(&format!(
                " Do not report differences that are only about {}.",
                ignored.join(" or ")
            ));
        }
        rules.push(rule);
    }

    if settings.track_vocabulary {
        rules.push(
            "List the important or new words from the exchange in \"vocabulary\" with their translation and part of speech."
                .to_string(),
        );
    }

    if settings.suggest_natural_alternatives {
        rules.push(
            "When the user's phrasing is correct but unnatural, suggest more natural or colloquial ways to say it in \"natural_alternatives\"."
                .to_string(),
        );
    }

    if settings.show_verb_conjugations {
        rules.push(
            "If the user makes a verb conjugation error, provide all the conjugations for that verb in the relevant tense in \"verb_conjugations\"."
                .to_string(),
        );
    }

    if settings.explain_tense_usage {
        rules.push(
            "When the user uses the wrong tense, explain which tense should be used and why, with examples, in \"tense_explanation\"."
                .to_string(),
        );
    }

    if let Some(custom) = settings.custom_instructions() {
        rules.push(format!("Additional instructions: {custom}"));
    }

    rules.push(
        "Set \"has_issue\" to false for items where the user made no mistake; such items are not shown."
            .to_string(),
    );
    rules.push("Always be encouraging and patient. Adapt to the user's skill level.".to_string());
    rules.push(
        "Return ONLY the JSON object. No markdown, no code fences, no text outside the JSON."
            .to_string(),
    );

    rules
}

/// System message for the conversation. Deterministic for a given settings value.
pub fn system_prompt(settings: &TutorSettings) -> String {
    let lang_name = language_name(&settings.target_language);
    let rules = response_rules(settings)
        .iter()
        .enumerate()
        .map(|(i, r)| format!("{}. {}", i + 1, r))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"You are LanGPT, an AI language learning assistant specialized in teaching {lang_name}. Your role is to help users learn {lang_name} effectively.

Respond with a JSON object in exactly this shape:

{shape}

Rules:
{rules}"#,
        lang_name = lang_name,
        shape = response_shape(settings),
        rules = rules,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_has_only_response_when_everything_is_off() {
        let shape = response_shape(&TutorSettings::default());
        assert!(shape.contains("\"response\""));
        for field in [
            "corrections",
            "vocabulary",
            "natural_alternatives",
            "verb_conjugations",
            "tense_explanation",
        ] {
            assert!(!shape.contains(field), "unexpected {field}");
        }
    }

    #[test]
    fn shape_follows_toggles() {
        let settings = TutorSettings {
            track_vocabulary: true,
            explain_tense_usage: true,
            ..TutorSettings::default()
        };
        let shape = response_shape(&settings);
        assert!(shape.contains("\"vocabulary\""));
        assert!(shape.contains("\"tense_explanation\""));
        assert!(!shape.contains("\"corrections\""));
        assert!(!shape.contains("\"verb_conjugations\""));
    }

    #[test]
    fn correction_rule_mentions_ignored_categories() {
        let settings = TutorSettings {
            always_correct_sentences: true,
            correct_accents: true,
            ..TutorSettings::default()
        };
        let rules = response_rules(&settings);
        assert!(rules[0].contains("accents and diacritics"));
        assert!(rules[0].contains("only about punctuation or capitalization"));
    }

    #[test]
    fn blank_custom_instructions_are_skipped() {
        let mut settings = TutorSettings::default();
        settings.custom_instructions = Some("  ".to_string());
        assert!(!system_prompt(&settings).contains("Additional instructions"));

        settings.custom_instructions = Some("Use only the present tense.".to_string());
        assert!(system_prompt(&settings)
            .contains("Additional instructions: Use only the present tense."));
    }

    #[test]
    fn prompt_is_deterministic_and_names_language() {
        let mut settings = TutorSettings::all_features();
        settings.target_language = "fr".to_string();
        let a = system_prompt(&settings);
        let b = system_prompt(&settings.clone());
        assert_eq!(a, b);
        assert!(a.contains("specialized in teaching French"));
        assert!(a.trim_end().ends_with("no text outside the JSON."));
    }

    #[test]
    fn language_name_handles_codes_and_passthrough() {
        assert_eq!(language_name("spanish"), "Spanish");
        assert_eq!(language_name("ja"), "Japanese");
        assert_eq!(language_name("Klingon"), "Klingon");
        assert!(is_available_language("thai"));
        assert!(!is_available_language("th"));
    }
}
