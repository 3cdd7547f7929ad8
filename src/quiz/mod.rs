pub mod ai_helper;
pub mod client;
pub mod controller;
pub mod display;
pub mod normalize;
pub mod session;

/// Minimum number of answer options a displayable quiz carries.
pub const MIN_ANSWER_OPTIONS: usize = 3;

pub const PLACEHOLDER_OPTION_TEXT: &str = "選択肢X";
pub const DEFAULT_EXPLANATION: &str = "解説が利用できません。";

/// One generated question for a keyword.
///
/// Field names on the wire follow the format the generation prompt asks the
/// backend for, so the same type is used for the upstream text, the
/// `/api/generate` response and the chat front-end.
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct QuizItem {
    pub question: String,
    #[serde(rename = "answerOptions")]
    pub answer_options: Vec<AnswerOption>,
    #[serde(rename = "keyword_explanation", alias = "keywordExplanation", default)]
    pub keyword_explanation: String,
}

impl QuizItem {
    pub fn new(
        question: String,
        answer_options: Vec<AnswerOption>,
        keyword_explanation: String,
    ) -> Self {
        Self {
            question,
            answer_options,
            keyword_explanation,
        }
    }

    /// Locally synthesized quiz shown once generation has failed for good.
    pub fn fallback(keyword: &str) -> Self {
        Self {
            question: format!("\"{}\"に関する問題（APIエラー）", keyword),
            answer_options: vec![
                AnswerOption::new("選択肢A", false),
                AnswerOption::new("選択肢B（正解）", true),
                AnswerOption::new("選択肢C", false),
            ],
            keyword_explanation: format!(
                "※APIエラーのため、仮の問題です。キーワード「{}」について学習しましょう。",
                keyword
            ),
        }
    }

    /// Brings the item back to the displayable shape: at least
    /// [`MIN_ANSWER_OPTIONS`] options, exactly one correct option (the first
    /// one marked wins, the first option is picked if none is) and a
    /// non-empty explanation. Excess options are kept.
    pub fn repair(mut self) -> Self {
        while self.answer_options.len() < MIN_ANSWER_OPTIONS {
            self.answer_options
                .push(AnswerOption::new(PLACEHOLDER_OPTION_TEXT, false));
        }

        let mut found = false;
        for option in self.answer_options.iter_mut() {
            if option.is_correct {
                if found {
                    option.is_correct = false;
                } else {
                    found = true;
                }
            }
        }
        if !found {
            // Padding above guarantees there is a first option.
            if let Some(first) = self.answer_options.first_mut() {
                first.is_correct = true;
            }
        }

        if self.keyword_explanation.trim().is_empty() {
            self.keyword_explanation = DEFAULT_EXPLANATION.to_string();
        }

        self
    }

    pub fn correct_index(&self) -> Option<usize> {
        self.answer_options.iter().position(|a| a.is_correct)
    }

    pub fn correct_option(&self) -> Option<&AnswerOption> {
        self.answer_options.iter().find(|a| a.is_correct)
    }
}

#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct AnswerOption {
    #[serde(default)]
    pub text: String,
    #[serde(rename = "isCorrect", default)]
    pub is_correct: bool,
    #[serde(default)]
    pub rationale: String,
}

impl AnswerOption {
    pub fn new(text: impl Into<String>, is_correct: bool) -> Self {
        Self {
            text: text.into(),
            is_correct,
            rationale: String::new(),
        }
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = rationale.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn correct_count(item: &QuizItem) -> usize {
        item.answer_options.iter().filter(|a| a.is_correct).count()
    }

    #[test]
    fn fallback_mentions_keyword_and_has_one_correct_option() {
        let quiz = QuizItem::fallback("鎌倉幕府");

        assert!(quiz.question.contains("鎌倉幕府"));
        assert!(quiz.keyword_explanation.contains("鎌倉幕府"));
        assert_eq!(quiz.answer_options.len(), 3);
        assert_eq!(correct_count(&quiz), 1);
        assert_eq!(quiz.correct_index(), Some(1));
    }

    #[test]
    fn repair_pads_short_option_lists() {
        let quiz = QuizItem::new(
            "問題".to_string(),
            vec![AnswerOption::new("一", true)],
            "解説".to_string(),
        )
        .repair();

        assert_eq!(quiz.answer_options.len(), 3);
        assert_eq!(quiz.answer_options[1].text, PLACEHOLDER_OPTION_TEXT);
        assert!(!quiz.answer_options[2].is_correct);
        assert_eq!(quiz.correct_index(), Some(0));
    }

    #[test]
    fn repair_keeps_excess_options() {
        let options = (0..5)
            .map(|i| AnswerOption::new(format!("選択肢{}", i), i == 3))
            .collect();
        let quiz = QuizItem::new("問題".into(), options, "解説".into()).repair();

        assert_eq!(quiz.answer_options.len(), 5);
        assert_eq!(quiz.correct_index(), Some(3));
    }

    #[test]
    fn repair_is_idempotent() {
        let quiz = QuizItem::new(
            "問題".into(),
            vec![AnswerOption::new("a", false), AnswerOption::new("b", false)],
            "   ".into(),
        );
        let once = quiz.repair();
        let twice = once.clone().repair();

        assert_eq!(once, twice);
        assert_eq!(once.keyword_explanation, DEFAULT_EXPLANATION);
    }

    #[test]
    fn serializes_with_prompt_field_names() {
        let value = serde_json::to_value(QuizItem::fallback("K")).unwrap();

        assert!(value.get("answerOptions").is_some());
        assert!(value.get("keyword_explanation").is_some());
        assert_eq!(value["answerOptions"][1]["isCorrect"], true);
    }

    #[test]
    fn accepts_camel_case_explanation_alias() {
        let quiz: QuizItem = serde_json::from_str(
            r#"{"question":"q","answerOptions":[],"keywordExplanation":"e"}"#,
        )
        .unwrap();

        assert_eq!(quiz.keyword_explanation, "e");
    }
}
