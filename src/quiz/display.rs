//! Text shown to the player. Kept apart from the bot so it can be tested
//! without a chat.

use super::session::{AnswerOutcome, QuizSession};
use super::QuizItem;

pub const NEXT_QUESTION: &str = "次の問題";
pub const FALLBACK_NOTICE: &str = "API生成に3回失敗しました。フォールバック問題を表示します。";
pub const GENERATING_NOTICE: &str = "問題を生成しています。少々お待ちください…";
pub const COMPLETION_NOTICE: &str = "全問終了！お疲れ様でした！";

/// Button label for option `index`, e.g. `2. 鎌倉幕府`.
pub fn option_label(index: usize, text: &str) -> String {
    format!("{}. {}", index + 1, text)
}

pub fn option_labels(quiz: &QuizItem) -> Vec<String> {
    quiz.answer_options
        .iter()
        .enumerate()
        .map(|(i, a)| option_label(i, &a.text))
        .collect()
}

/// Maps a reply back to an option index. Accepts a bare number, a button
/// label or the option text itself.
pub fn parse_choice(reply: &str, quiz: &QuizItem) -> Option<usize> {
    let reply = reply.trim();
    let options = quiz.answer_options.len();

    let number = reply
        .split_once(". ")
        .map(|(n, _)| n)
        .unwrap_or(reply)
        .trim();
    if let Ok(n) = number.parse::<usize>() {
        if (1..=options).contains(&n) {
            return Some(n - 1);
        }
    }

    quiz.answer_options.iter().position(|a| a.text == reply)
}

pub fn question_message(session: &QuizSession, quiz: &QuizItem) -> String {
    let mut text = format!(
        "問題 {}/{}\n{}\n",
        session.current_index() + 1,
        session.total(),
        quiz.question
    );
    for label in option_labels(quiz) {
        text.push('\n');
        text.push_str(&label);
    }
    text
}

pub fn outcome_message(quiz: &QuizItem, outcome: &AnswerOutcome) -> String {
    let mut text = if outcome.is_correct {
        "✅ 正解！".to_string()
    } else {
        let correct = quiz
            .answer_options
            .get(outcome.correct_index)
            .map(|a| a.text.as_str())
            .unwrap_or_default();
        format!("❌ 不正解… 正解は「{}」", correct)
    };

    let rationale = quiz
        .answer_options
        .get(outcome.choice)
        .map(|a| a.rationale.trim())
        .filter(|r| !r.is_empty());
    if let Some(rationale) = rationale {
        text.push_str(&format!("\n（{}）", rationale));
    }

    text.push_str(&format!(
        "\n\n解説:\n{}\n\n{}",
        quiz.keyword_explanation, outcome.progress
    ));
    text
}

pub fn completion_message(correct: usize, total: usize) -> String {
    format!("{}\n{}問中{}問正解でした。", COMPLETION_NOTICE, total, correct)
}
