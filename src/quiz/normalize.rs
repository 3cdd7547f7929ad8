//! Best-effort recovery of a [`QuizItem`] from free-form model output.
//!
//! The backend is asked for bare JSON but regularly wraps it in code fences,
//! adds a sentence before or after it, or breaks lines inside string values.
//! Everything in here is about getting from that text to a quiz that can be
//! shown; callers only ever see [`normalize`].

use serde_json::Value;

use super::{AnswerOption, QuizItem};

const CODE_FENCE: &str = "```";

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("no JSON object boundaries found")]
    NoJsonObject { raw: String },
    #[error("invalid JSON: {source}")]
    InvalidJson {
        #[source]
        source: serde_json::Error,
        raw: String,
    },
    #[error("question is missing")]
    MissingQuestion { raw: String },
    #[error("answerOptions is missing or not an array")]
    MissingAnswerOptions { raw: String },
}

impl NormalizeError {
    /// The text that failed to normalize, for diagnostics.
    pub fn raw(&self) -> &str {
        match self {
            NormalizeError::NoJsonObject { raw }
            | NormalizeError::InvalidJson { raw, .. }
            | NormalizeError::MissingQuestion { raw }
            | NormalizeError::MissingAnswerOptions { raw } => raw,
        }
    }
}

pub fn normalize(raw: &str) -> Result<QuizItem, NormalizeError> {
    let unfenced = strip_code_fences(raw);
    let object = json_object_span(unfenced).ok_or_else(|| NormalizeError::NoJsonObject {
        raw: raw.to_string(),
    })?;
    let collapsed = collapse_whitespace(object);

    let value: Value = serde_json::from_str(&collapsed).map_err(|source| {
        NormalizeError::InvalidJson {
            source,
            raw: collapsed.clone(),
        }
    })?;

    quiz_from_value(value, &collapsed).map(QuizItem::repair)
}

fn strip_code_fences(text: &str) -> &str {
    let mut text = text.trim();

    if let Some(rest) = text.strip_prefix(CODE_FENCE) {
        // Optional language tag right after the opening fence.
        let tag_len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'))
            .unwrap_or(rest.len());
        text = rest[tag_len..].trim_start();
    }
    if let Some(rest) = text.strip_suffix(CODE_FENCE) {
        text = rest.trim_end();
    }

    text
}

/// The span from the first `{` to the last `}`, both included.
fn json_object_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if start >= end {
        return None;
    }
    Some(&text[start..=end])
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn quiz_from_value(value: Value, raw: &str) -> Result<QuizItem, NormalizeError> {
    let Value::Object(mut object) = value else {
        return Err(NormalizeError::MissingQuestion {
            raw: raw.to_string(),
        });
    };

    let question = match object.remove("question") {
        Some(Value::String(q)) if !q.trim().is_empty() => q,
        _ => {
            return Err(NormalizeError::MissingQuestion {
                raw: raw.to_string(),
            })
        }
    };

    let options = match object.remove("answerOptions") {
        Some(Value::Array(options)) => options,
        _ => {
            return Err(NormalizeError::MissingAnswerOptions {
                raw: raw.to_string(),
            })
        }
    };

    let explanation = object
        .remove("keyword_explanation")
        .or_else(|| object.remove("keywordExplanation"))
        .and_then(|v| match v {
            Value::String(s) => Some(s),
            _ => None,
        })
        .unwrap_or_default();

    let answer_options = options.into_iter().filter_map(option_from_value).collect();

    Ok(QuizItem::new(question, answer_options, explanation))
}

/// Entries that are not objects carry nothing to show and are dropped; the
/// padding step refills the list afterwards.
fn option_from_value(value: Value) -> Option<AnswerOption> {
    let option = match value {
        Value::Object(option) => option,
        other => {
            log::debug!("Dropping non-object answer option: {}", other);
            return None;
        }
    };

    let text = match option.get("text") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };
    let is_correct = match option.get("isCorrect") {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    };
    let rationale = option
        .get("rationale")
        .and_then(Value::as_str)
        .unwrap_or_default();

    Some(AnswerOption::new(text, is_correct).with_rationale(rationale))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quiz::{DEFAULT_EXPLANATION, PLACEHOLDER_OPTION_TEXT};

    const WELL_FORMED: &str = r#"{
  "question": "1192年に源頼朝が開いた政権は？",
  "answerOptions": [
    {"text":"室町幕府","isCorrect":false,"rationale":"足利氏の政権"},
    {"text":"鎌倉幕府","isCorrect":true,"rationale":"正解"},
    {"text":"江戸幕府","isCorrect":false,"rationale":"徳川氏の政権"}
  ],
  "keyword_explanation": "鎌倉幕府は武家政権の始まり"
}"#;

    fn correct_flags(item: &QuizItem) -> Vec<bool> {
        item.answer_options.iter().map(|a| a.is_correct).collect()
    }

    #[test]
    fn parses_plain_json() {
        let quiz = normalize(WELL_FORMED).unwrap();

        assert_eq!(quiz.question, "1192年に源頼朝が開いた政権は？");
        assert_eq!(correct_flags(&quiz), vec![false, true, false]);
        assert_eq!(quiz.answer_options[0].rationale, "足利氏の政権");
        assert_eq!(quiz.keyword_explanation, "鎌倉幕府は武家政権の始まり");
    }

    #[test]
    fn strips_code_fence_with_language_tag() {
        let fenced = format!("```json\n{}\n```", WELL_FORMED);
        assert_eq!(normalize(&fenced).unwrap(), normalize(WELL_FORMED).unwrap());
    }

    #[test]
    fn strips_code_fence_without_language_tag() {
        let fenced = format!("```\n{}\n```\n", WELL_FORMED);
        assert_eq!(normalize(&fenced).unwrap(), normalize(WELL_FORMED).unwrap());
    }

    #[test]
    fn extracts_object_from_surrounding_prose() {
        let wrapped = format!("こちらが問題です: {} 楽しんでください", WELL_FORMED);
        assert_eq!(normalize(&wrapped).unwrap(), normalize(WELL_FORMED).unwrap());
    }

    #[test]
    fn span_runs_from_first_open_to_last_close_brace() {
        assert_eq!(json_object_span("x {a} y {b} z"), Some("{a} y {b}"));
        assert_eq!(json_object_span("} before {"), None);
        assert_eq!(json_object_span("no braces"), None);
    }

    #[test]
    fn fails_without_object_boundaries() {
        let err = normalize("申し訳ありません、生成できませんでした。").unwrap_err();
        assert!(matches!(err, NormalizeError::NoJsonObject { .. }));
        assert_eq!(err.to_string(), "no JSON object boundaries found");

        let err = normalize("} reversed {").unwrap_err();
        assert!(matches!(err, NormalizeError::NoJsonObject { .. }));
    }

    #[test]
    fn invalid_json_keeps_offending_text() {
        let err = normalize(r#"{"question": "q", "answerOptions": [ }"#).unwrap_err();

        match &err {
            NormalizeError::InvalidJson { raw, .. } => assert!(raw.contains("answerOptions")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.raw().starts_with('{'));
    }

    #[test]
    fn literal_newlines_inside_strings_are_collapsed() {
        let raw = "{\"question\": \"一行目\n二行目\", \"answerOptions\": [{\"text\":\"a\",\"isCorrect\":true}], \"keyword_explanation\": \"x\r\ny\"}";
        let quiz = normalize(raw).unwrap();

        assert_eq!(quiz.question, "一行目 二行目");
        assert_eq!(quiz.keyword_explanation, "x y");
    }

    #[test]
    fn missing_answer_options_cannot_be_repaired() {
        let err = normalize(r#"{"question":"q","keyword_explanation":"e"}"#).unwrap_err();
        assert!(matches!(err, NormalizeError::MissingAnswerOptions { .. }));

        let err = normalize(r#"{"question":"q","answerOptions":"a,b,c"}"#).unwrap_err();
        assert!(matches!(err, NormalizeError::MissingAnswerOptions { .. }));
    }

    #[test]
    fn missing_question_is_rejected() {
        let err = normalize(r#"{"answerOptions":[]}"#).unwrap_err();
        assert!(matches!(err, NormalizeError::MissingQuestion { .. }));
    }

    #[test]
    fn pads_to_three_options() {
        let quiz = normalize(
            r#"{"question":"q","answerOptions":[{"text":"a","isCorrect":true}],"keyword_explanation":"e"}"#,
        )
        .unwrap();

        assert_eq!(quiz.answer_options.len(), 3);
        assert_eq!(quiz.answer_options[1].text, PLACEHOLDER_OPTION_TEXT);
        assert_eq!(quiz.answer_options[2].text, PLACEHOLDER_OPTION_TEXT);
        assert_eq!(correct_flags(&quiz), vec![true, false, false]);
    }

    #[test]
    fn never_truncates_long_option_lists() {
        let quiz = normalize(
            r#"{"question":"q","answerOptions":[
                {"text":"a","isCorrect":false},{"text":"b","isCorrect":false},
                {"text":"c","isCorrect":false},{"text":"d","isCorrect":true}]}"#,
        )
        .unwrap();

        assert_eq!(quiz.answer_options.len(), 4);
        assert_eq!(correct_flags(&quiz), vec![false, false, false, true]);
    }

    #[test]
    fn first_correct_option_wins() {
        let quiz = normalize(
            r#"{"question":"q","answerOptions":[
                {"text":"a","isCorrect":false},{"text":"b","isCorrect":true},
                {"text":"c","isCorrect":true}]}"#,
        )
        .unwrap();

        assert_eq!(correct_flags(&quiz), vec![false, true, false]);
    }

    #[test]
    fn no_correct_option_marks_the_first() {
        let quiz = normalize(
            r#"{"question":"q","answerOptions":[
                {"text":"a","isCorrect":false},{"text":"b"},{"text":"c","isCorrect":false}]}"#,
        )
        .unwrap();

        assert_eq!(correct_flags(&quiz), vec![true, false, false]);
    }

    #[test]
    fn defaults_missing_or_empty_explanation() {
        let missing = normalize(r#"{"question":"q","answerOptions":[]}"#).unwrap();
        assert_eq!(missing.keyword_explanation, DEFAULT_EXPLANATION);

        let empty =
            normalize(r#"{"question":"q","answerOptions":[],"keyword_explanation":""}"#).unwrap();
        assert_eq!(empty.keyword_explanation, DEFAULT_EXPLANATION);
    }

    #[test]
    fn non_object_options_are_dropped_then_padded() {
        let quiz = normalize(
            r#"{"question":"q","answerOptions":["a", {"text":"b","isCorrect":true}, 3]}"#,
        )
        .unwrap();

        assert_eq!(quiz.answer_options.len(), 3);
        assert_eq!(quiz.answer_options[0].text, "b");
        assert_eq!(correct_flags(&quiz), vec![true, false, false]);
    }

    #[test]
    fn normalizing_twice_changes_nothing() {
        let inputs = [
            WELL_FORMED.to_string(),
            r#"{"question":"q","answerOptions":[{"text":"a","isCorrect":true},{"text":"b","isCorrect":true}]}"#
                .to_string(),
            "```json\n{\"question\":\"q\",\"answerOptions\":[]}\n```".to_string(),
        ];

        for raw in inputs {
            let once = normalize(&raw).unwrap();
            let again = normalize(&serde_json::to_string(&once).unwrap()).unwrap();
            assert_eq!(once, again, "not idempotent for {raw}");
        }
    }
}
