//! State of one era's run through its keywords.
//!
//! A [`QuizSession`] is a plain value: the chat front-end stores it in the
//! dialogue and the request task works on its own copy, so nothing here is
//! shared or global. Every transition checks the current [`Phase`] and
//! refuses the ones the state machine does not allow.

use std::fmt;
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;

use super::QuizItem;
use crate::catalog::KeywordCatalog;

/// How many times a failed request is retried before falling back.
pub const MAX_RETRIES: u32 = 3;
pub const RETRY_DELAY: Duration = Duration::from_millis(1500);

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SessionError {
    #[error("選択された時代にキーワードが登録されていません")]
    NoKeywords { era: String },
    #[error("no question is waiting for an answer")]
    NotDisplaying,
    #[error("this question has already been answered")]
    AlreadyAnswered,
    #[error("option {choice} does not exist")]
    InvalidChoice { choice: usize },
    #[error("no request is pending")]
    NotRequesting,
    #[error("the session is already finished")]
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Phase {
    Requesting,
    Retrying { attempt: u32 },
    Displaying { quiz: QuizItem, fallback: bool },
    Answered { quiz: QuizItem, choice: usize },
    Finished,
}

/// What to do after a failed request.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureAction {
    Retry { attempt: u32, delay: Duration },
    FallBack,
}

/// What comes after the "next" trigger.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Request { keyword: String },
    Finished { correct: usize, total: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnswerOutcome {
    pub choice: usize,
    pub correct_index: usize,
    pub is_correct: bool,
    pub progress: Progress,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub remaining: usize,
    pub answered: usize,
    pub correct: usize,
}

impl Progress {
    /// Share of correct answers, in percent.
    pub fn rate(&self) -> f64 {
        if self.answered == 0 {
            return 0.0;
        }
        self.correct as f64 / self.answered as f64 * 100.0
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "残り問題: {}問 | 現在の正解率: {:.1}%",
            self.remaining,
            self.rate()
        )
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct QuizSession {
    id: SessionId,
    era: String,
    keywords: Vec<String>,
    current_index: usize,
    correct_count: usize,
    retry_count: u32,
    phase: Phase,
}

impl QuizSession {
    /// Starts a run over the era's keywords in random order. Refuses an
    /// unknown or empty era without creating anything.
    pub fn start<R: Rng>(
        catalog: &KeywordCatalog,
        era: &str,
        rng: &mut R,
    ) -> Result<Self, SessionError> {
        let keywords = match catalog.keywords(era) {
            Some(keywords) if !keywords.is_empty() => keywords,
            _ => {
                return Err(SessionError::NoKeywords {
                    era: era.to_string(),
                })
            }
        };

        let mut keywords = keywords.to_vec();
        keywords.shuffle(rng);

        Ok(Self {
            id: SessionId(rng.gen()),
            era: era.to_string(),
            keywords,
            current_index: 0,
            correct_count: 0,
            retry_count: 0,
            phase: Phase::Requesting,
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn era(&self) -> &str {
        &self.era
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn total(&self) -> usize {
        self.keywords.len()
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn correct_count(&self) -> usize {
        self.correct_count
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn current_keyword(&self) -> Option<&str> {
        self.keywords.get(self.current_index).map(String::as_str)
    }

    pub fn is_requesting(&self) -> bool {
        matches!(self.phase, Phase::Requesting | Phase::Retrying { .. })
    }

    /// The question currently on screen, answered or not.
    pub fn current_quiz(&self) -> Option<&QuizItem> {
        match &self.phase {
            Phase::Displaying { quiz, .. } | Phase::Answered { quiz, .. } => Some(quiz),
            _ => None,
        }
    }

    /// Requesting → Displaying with a normalized quiz.
    pub fn quiz_ready(&mut self, quiz: QuizItem) -> Result<(), SessionError> {
        if self.phase != Phase::Requesting {
            return Err(SessionError::NotRequesting);
        }
        self.retry_count = 0;
        self.phase = Phase::Displaying {
            quiz,
            fallback: false,
        };
        Ok(())
    }

    /// Requesting → Retrying while retries are left, otherwise falls back to
    /// the local quiz for the current keyword and displays it.
    pub fn request_failed(&mut self) -> Result<FailureAction, SessionError> {
        if self.phase != Phase::Requesting {
            return Err(SessionError::NotRequesting);
        }
        let keyword = self
            .current_keyword()
            .ok_or(SessionError::Finished)?
            .to_string();

        if self.retry_count < MAX_RETRIES {
            self.retry_count += 1;
            self.phase = Phase::Retrying {
                attempt: self.retry_count,
            };
            return Ok(FailureAction::Retry {
                attempt: self.retry_count,
                delay: RETRY_DELAY,
            });
        }

        self.show_fallback(&keyword);
        Ok(FailureAction::FallBack)
    }

    /// Requesting → Displaying the fallback quiz without using up the
    /// remaining retries, for failures another attempt cannot fix.
    pub fn give_up(&mut self) -> Result<(), SessionError> {
        if self.phase != Phase::Requesting {
            return Err(SessionError::NotRequesting);
        }
        let keyword = self
            .current_keyword()
            .ok_or(SessionError::Finished)?
            .to_string();
        self.show_fallback(&keyword);
        Ok(())
    }

    fn show_fallback(&mut self, keyword: &str) {
        self.retry_count = 0;
        self.phase = Phase::Displaying {
            quiz: QuizItem::fallback(keyword),
            fallback: true,
        };
    }

    /// Retrying → Requesting for the same keyword, once the delay is over.
    pub fn retry_due(&mut self) -> Result<(), SessionError> {
        match self.phase {
            Phase::Retrying { .. } => {
                self.phase = Phase::Requesting;
                Ok(())
            }
            _ => Err(SessionError::NotRequesting),
        }
    }

    /// Records the single answer allowed for the displayed question.
    pub fn answer(&mut self, choice: usize) -> Result<AnswerOutcome, SessionError> {
        let quiz = match &self.phase {
            Phase::Displaying { quiz, .. } => quiz,
            Phase::Answered { .. } => return Err(SessionError::AlreadyAnswered),
            Phase::Finished => return Err(SessionError::Finished),
            _ => return Err(SessionError::NotDisplaying),
        };
        let option = quiz
            .answer_options
            .get(choice)
            .ok_or(SessionError::InvalidChoice { choice })?;

        let is_correct = option.is_correct;
        let correct_index = quiz.correct_index().unwrap_or_default();
        let quiz = quiz.clone();

        if is_correct {
            self.correct_count += 1;
        }
        self.phase = Phase::Answered { quiz, choice };

        Ok(AnswerOutcome {
            choice,
            correct_index,
            is_correct,
            progress: self.progress(),
        })
    }

    /// Progress counting the current question as answered.
    pub fn progress(&self) -> Progress {
        let answered = (self.current_index + 1).min(self.total());
        Progress {
            remaining: self.total().saturating_sub(self.current_index + 1),
            answered,
            correct: self.correct_count,
        }
    }

    /// Moves past an answered question.
    pub fn next(&mut self) -> Result<Step, SessionError> {
        match self.phase {
            Phase::Answered { .. } => {}
            Phase::Finished => return Err(SessionError::Finished),
            _ => return Err(SessionError::NotDisplaying),
        }

        self.current_index += 1;
        self.retry_count = 0;
        match self.current_keyword().map(str::to_string) {
            Some(keyword) => {
                self.phase = Phase::Requesting;
                Ok(Step::Request { keyword })
            }
            None => {
                self.phase = Phase::Finished;
                Ok(Step::Finished {
                    correct: self.correct_count,
                    total: self.total(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quiz::AnswerOption;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn catalog() -> KeywordCatalog {
        [("鎌倉", "元寇"), ("鎌倉", "御成敗式目"), ("鎌倉", "執権")]
            .into_iter()
            .map(|(e, k)| (e.to_string(), k.to_string()))
            .collect()
    }

    fn quiz(correct: usize) -> QuizItem {
        QuizItem::new(
            "問題".into(),
            (0..3)
                .map(|i| AnswerOption::new(format!("選択肢{}", i), i == correct))
                .collect(),
            "解説".into(),
        )
    }

    fn started() -> QuizSession {
        QuizSession::start(&catalog(), "鎌倉", &mut StdRng::seed_from_u64(7)).unwrap()
    }

    #[test]
    fn start_shuffles_all_keywords() {
        let session = started();

        let mut keywords = session.keywords().to_vec();
        keywords.sort();
        assert_eq!(keywords, vec!["元寇", "執権", "御成敗式目"]);
        assert_eq!(session.current_index(), 0);
        assert_eq!(session.retry_count(), 0);
        assert!(session.is_requesting());
    }

    #[test]
    fn start_refuses_unknown_or_empty_era() {
        let err = QuizSession::start(&catalog(), "平安", &mut StdRng::seed_from_u64(1))
            .unwrap_err();
        assert_eq!(
            err,
            SessionError::NoKeywords {
                era: "平安".into()
            }
        );
        assert_eq!(err.to_string(), "選択された時代にキーワードが登録されていません");
    }

    #[test]
    fn failures_retry_three_times_then_fall_back() {
        let mut session = started();
        let keyword = session.current_keyword().unwrap().to_string();

        for attempt in 1..=MAX_RETRIES {
            assert_eq!(
                session.request_failed().unwrap(),
                FailureAction::Retry {
                    attempt,
                    delay: RETRY_DELAY
                }
            );
            assert_eq!(session.retry_count(), attempt);
            session.retry_due().unwrap();
            assert_eq!(session.current_keyword(), Some(keyword.as_str()));
        }

        assert_eq!(session.request_failed().unwrap(), FailureAction::FallBack);
        assert_eq!(session.retry_count(), 0);
        assert_eq!(session.current_index(), 0);
        match session.phase() {
            Phase::Displaying { quiz, fallback } => {
                assert!(fallback);
                assert!(quiz.keyword_explanation.contains(&keyword));
            }
            other => panic!("unexpected phase: {other:?}"),
        }
    }

    #[test]
    fn give_up_shows_fallback_immediately() {
        let mut session = started();
        session.request_failed().unwrap();
        assert_eq!(session.give_up(), Err(SessionError::NotRequesting));

        session.retry_due().unwrap();
        session.give_up().unwrap();
        assert_eq!(session.retry_count(), 0);
        assert!(matches!(
            session.phase(),
            Phase::Displaying { fallback: true, .. }
        ));
    }

    #[test]
    fn success_resets_retry_count() {
        let mut session = started();
        session.request_failed().unwrap();
        session.retry_due().unwrap();
        session.quiz_ready(quiz(0)).unwrap();

        assert_eq!(session.retry_count(), 0);
        assert!(session.current_quiz().is_some());
    }

    #[test]
    fn transitions_out_of_order_are_refused() {
        let mut session = started();
        assert_eq!(session.answer(0), Err(SessionError::NotDisplaying));
        assert_eq!(session.next(), Err(SessionError::NotDisplaying));
        assert_eq!(session.retry_due(), Err(SessionError::NotRequesting));

        session.request_failed().unwrap();
        assert_eq!(session.quiz_ready(quiz(0)), Err(SessionError::NotRequesting));
    }

    #[test]
    fn answers_are_scored_once() {
        let mut session = started();
        session.quiz_ready(quiz(2)).unwrap();

        let outcome = session.answer(2).unwrap();
        assert!(outcome.is_correct);
        assert_eq!(outcome.correct_index, 2);
        assert_eq!(session.correct_count(), 1);

        assert_eq!(session.answer(2), Err(SessionError::AlreadyAnswered));
        assert_eq!(session.correct_count(), 1);
    }

    #[test]
    fn wrong_answer_reveals_correct_index() {
        let mut session = started();
        session.quiz_ready(quiz(1)).unwrap();

        let outcome = session.answer(0).unwrap();
        assert!(!outcome.is_correct);
        assert_eq!(outcome.correct_index, 1);
        assert_eq!(outcome.progress.to_string(), "残り問題: 2問 | 現在の正解率: 0.0%");
    }

    #[test]
    fn out_of_range_choice_is_rejected() {
        let mut session = started();
        session.quiz_ready(quiz(0)).unwrap();

        assert_eq!(
            session.answer(3),
            Err(SessionError::InvalidChoice { choice: 3 })
        );
        assert!(matches!(session.phase(), Phase::Displaying { .. }));
    }

    #[test]
    fn progress_line_matches_display_format() {
        let progress = Progress {
            remaining: 1,
            answered: 3,
            correct: 2,
        };
        assert_eq!(progress.to_string(), "残り問題: 1問 | 現在の正解率: 66.7%");
    }

    #[test]
    fn runs_through_every_keyword_exactly_once() {
        let catalog: KeywordCatalog = [("明治", "A"), ("明治", "B")]
            .into_iter()
            .map(|(e, k)| (e.to_string(), k.to_string()))
            .collect();
        let mut session =
            QuizSession::start(&catalog, "明治", &mut StdRng::seed_from_u64(42)).unwrap();

        let mut seen = vec![session.current_keyword().unwrap().to_string()];
        loop {
            session.quiz_ready(quiz(0)).unwrap();
            session.answer(0).unwrap();
            assert!(session.correct_count() <= session.current_index() + 1);

            match session.next().unwrap() {
                Step::Request { keyword } => seen.push(keyword),
                Step::Finished { correct, total } => {
                    assert_eq!((correct, total), (2, 2));
                    break;
                }
            }
        }

        seen.sort();
        assert_eq!(seen, vec!["A", "B"]);
        assert_eq!(session.phase(), &Phase::Finished);
        assert_eq!(session.next(), Err(SessionError::Finished));
    }
}
