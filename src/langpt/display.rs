use std::fmt::Write;

use super::response::{conjugation_tables, StructuredResponse};
use super::types::TutorSettings;

const PRONOUN_WIDTH: usize = 20;
const FORM_WIDTH: usize = 14;

/// Renders a tutor reply as plain-text cards for the terminal.
pub fn render_reply(reply: &StructuredResponse, settings: &TutorSettings) -> String {
    let shown = reply.for_display(settings);
    let mut out = String::new();
    let _ = writeln!(out, "{}", shown.response);

    if let Some(corrections) = &shown.corrections {
        section(&mut out, "Corrections");
        for c in corrections {
            let _ = writeln!(out, "  {} -> {}", c.original, c.corrected);
            if !c.explanation.is_empty() {
                let _ = writeln!(out, "    {}", c.explanation);
            }
        }
    }

    if let Some(words) = &shown.vocabulary {
        section(&mut out, "Vocabulary");
        for v in words {
            let mut line = format!("  {}", v.word);
            if let Some(t) = &v.translation {
                let _ = write!(line, " - {}", t);
            }
            if let Some(pos) = &v.part_of_speech {
                let _ = write!(line, " ({})", pos);
            }
            let _ = writeln!(out, "{}", line);
        }
    }

    if let Some(alternatives) = &shown.natural_alternatives {
        section(&mut out, "Natural Alternatives");
        for alt in alternatives {
            for text in &alt.alternatives {
                let _ = writeln!(out, "  \u{2022} {}", text);
            }
            if !alt.explanation.is_empty() {
                let _ = writeln!(out, "    {}", alt.explanation);
            }
        }
    }

    if let Some(conjugations) = &shown.verb_conjugations {
        section(&mut out, "Verb Conjugations");
        for table in conjugation_tables(conjugations) {
            let names: Vec<&str> = table.verbs.iter().map(|v| v.verb.as_str()).collect();
            let _ = writeln!(out, "  {} [{}]", names.join(" | "), table.tense);

            if !table.pronouns.is_empty() {
                let mut header = format!("  {:<width$}", "", width = PRONOUN_WIDTH);
                for name in &names {
                    let _ = write!(header, "{:<width$}", name, width = FORM_WIDTH);
                }
                let _ = writeln!(out, "{}", header.trim_end());

                for pronoun in &table.pronouns {
                    let mut row = format!("  {:<width$}", pronoun, width = PRONOUN_WIDTH);
                    for idx in 0..table.verbs.len() {
                        let _ = write!(row, "{:<width$}", table.form(idx, pronoun), width = FORM_WIDTH);
                    }
                    let _ = writeln!(out, "{}", row.trim_end());
                }
            } else {
                // infinitive-style entries have no pronoun column
                for verb in &table.verbs {
                    for c in &verb.conjugations {
                        let _ = writeln!(out, "  {}", c.form);
                    }
                }
            }

            for verb in &table.verbs {
                if !verb.explanation.is_empty() {
                    let _ = writeln!(out, "    {}", verb.explanation);
                }
            }
        }
    }

    if let Some(notes) = &shown.tense_explanation {
        section(&mut out, "Tense Usage");
        for note in notes {
            let _ = writeln!(out, "  {}", note.original_tense);
            let _ = writeln!(out, "  Use: {}", note.correct_tense);
            if !note.explanation.is_empty() {
                let _ = writeln!(out, "    {}", note.explanation);
            }
            if !note.examples.is_empty() {
                let _ = writeln!(out, "    Examples: {}", note.examples.join(", "));
            }
        }
    }

    out
}

fn section(out: &mut String, title: &str) {
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", title);
}
