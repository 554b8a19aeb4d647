use crate::bank::{QuestionBank, LEVELS};
use crate::engine::effect::{Effect, ReportItem};
use crate::engine::session::AnswerRecord;
use crate::ledger::UserRecord;

/// Above this many questions the itemized breakdown is dropped and only the
/// aggregate score is reported. A display guard, not a scoring rule.
pub const REPORT_ITEM_LIMIT: usize = 20;

/// Build the completion report from the result log, in original answer
/// order. Score and total are always derived from the log itself.
pub fn build_report(
    bank: &QuestionBank,
    topic: &str,
    level: &str,
    results: &[AnswerRecord],
) -> Effect {
    let score = results.iter().filter(|r| r.was_correct).count();
    let total = results.len();

    let items = if total > REPORT_ITEM_LIMIT {
        Vec::new()
    } else {
        results
            .iter()
            .enumerate()
            .map(|(position, record)| {
                let question = bank.question(topic, level, record.question_index);
                ReportItem {
                    number: position + 1,
                    was_correct: record.was_correct,
                    question: question
                        .map(|q| first_line(&q.text).to_string())
                        .unwrap_or_default(),
                    correct_option: question
                        .and_then(|q| q.options.get(q.correct_index))
                        .cloned()
                        .unwrap_or_default(),
                }
            })
            .collect()
    };

    Effect::ShowReport {
        score,
        total,
        items,
    }
}

/// Text body of the pinned summary surface: one line per known level.
pub fn render_summary(record: &UserRecord) -> String {
    let mut lines = Vec::with_capacity(LEVELS.len() + 1);
    lines.push(format!("📊 {}", record.display_name));
    for (key, label) in LEVELS {
        let score = record.scores.get(*key).copied().unwrap_or_default();
        lines.push(format!("{label}: {} of {}", score.correct, score.total));
    }
    lines.join("\n")
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LevelScore;

    fn bank() -> QuestionBank {
        QuestionBank::from_json(
            r#"{"permissions": {"junior": [
                {"question": "Who owns /etc/shadow?\nHint: not you.",
                 "options": ["root", "daemon"], "correct": 0},
                {"question": "chmod 600 grants group what?",
                 "options": ["nothing", "read"], "correct": 0}
            ]}}"#,
        )
        .unwrap()
    }

    #[test]
    fn itemizes_in_original_order() {
        let results = vec![
            AnswerRecord {
                question_index: 0,
                was_correct: true,
            },
            AnswerRecord {
                question_index: 1,
                was_correct: false,
            },
        ];
        let Effect::ShowReport {
            score,
            total,
            items,
        } = build_report(&bank(), "permissions", "junior", &results)
        else {
            panic!("expected a report");
        };

        assert_eq!((score, total), (1, 2));
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].number, 1);
        assert!(items[0].was_correct);
        // multi-line question text collapses to its first line
        assert_eq!(items[0].question, "Who owns /etc/shadow?");
        assert_eq!(items[0].correct_option, "root");
        assert!(!items[1].was_correct);
        assert_eq!(items[1].correct_option, "nothing");
    }

    #[test]
    fn long_quizzes_drop_the_breakdown() {
        let at_limit: Vec<AnswerRecord> = (0..REPORT_ITEM_LIMIT)
            .map(|i| AnswerRecord {
                question_index: i,
                was_correct: i % 2 == 0,
            })
            .collect();
        let over_limit: Vec<AnswerRecord> = (0..REPORT_ITEM_LIMIT + 1)
            .map(|i| AnswerRecord {
                question_index: i,
                was_correct: true,
            })
            .collect();

        let Effect::ShowReport { items, .. } =
            build_report(&bank(), "permissions", "junior", &at_limit)
        else {
            panic!("expected a report");
        };
        assert_eq!(items.len(), REPORT_ITEM_LIMIT);

        let Effect::ShowReport {
            score,
            total,
            items,
        } = build_report(&bank(), "permissions", "junior", &over_limit)
        else {
            panic!("expected a report");
        };
        assert!(items.is_empty());
        assert_eq!((score, total), (21, 21));
    }

    #[test]
    fn summary_lists_every_level() {
        let mut record = UserRecord::new(7, "Alice");
        record.scores.insert(
            "junior".to_string(),
            LevelScore {
                correct: 3,
                total: 5,
            },
        );

        let text = render_summary(&record);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "📊 Alice");
        assert_eq!(lines[1], "Junior: 3 of 5");
        assert_eq!(lines[2], "Middle: 0 of 0");
        assert_eq!(lines[3], "Senior: 0 of 0");
    }
}
