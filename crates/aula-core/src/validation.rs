use std::collections::HashSet;

use crate::types::QuizRecord;

const MIN_CHOICE_OPTIONS: usize = 2;

/// Offline checks mirroring the backend's import rules.
///
/// Returns one message per problem; an empty list means the record is
/// acceptable. Question numbers in messages are 1-based list positions.
pub fn validate_quiz_record(quiz: &QuizRecord) -> Vec<String> {
    let mut problems = Vec::new();

    if quiz.title.trim().is_empty() {
        problems.push("quiz title is required".to_owned());
    }
    if quiz.questions.is_empty() {
        problems.push("quiz has no questions".to_owned());
    }

    let mut seen_orders = HashSet::new();
    for (index, question) in quiz.questions.iter().enumerate() {
        let number = index + 1;

        if question.question_text.trim().is_empty() {
            problems.push(format!("question {number}: question text is required"));
        }
        if question.points < 1 {
            problems.push(format!("question {number}: points must be at least 1"));
        }
        if !seen_orders.insert(question.order) {
            problems.push(format!(
                "question {number}: order {} is already used by another question",
                question.order
            ));
        }

        let mut option_orders = HashSet::new();
        for (option_index, option) in question.options.iter().enumerate() {
            if option.option_text.trim().is_empty() {
                problems.push(format!(
                    "question {number}: option {} has no text",
                    option_index + 1
                ));
            }
            if !option_orders.insert(option.order) {
                problems.push(format!(
                    "question {number}: option order {} is repeated",
                    option.order
                ));
            }
        }

        if question.question_type.uses_options() {
            if question.options.len() < MIN_CHOICE_OPTIONS {
                problems.push(format!(
                    "question {number}: needs at least {MIN_CHOICE_OPTIONS} options"
                ));
            }
            if !question.options.iter().any(|option| option.is_correct) {
                problems.push(format!(
                    "question {number}: needs at least one correct option"
                ));
            }
        }
    }

    problems
}
