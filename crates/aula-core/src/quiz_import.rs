//! Parsers turning interchange files into a [`QuizRecord`].
//!
//! Structured payloads are JSON documents shaped like one quiz. Tabular
//! payloads are CSV files carrying one `(question, option)` pair per row;
//! rows sharing the same question text are merged into a single question.

use std::{collections::HashMap, path::Path};

use serde::Deserialize;
use serde_json::Value;

use crate::{
    error::{AulaError, ErrorCategory},
    types::{ImportFormat, OptionRecord, QuestionRecord, QuestionType, QuizRecord, QuizType},
};

const DEFAULT_POINTS: u32 = 1;
const UNTITLED_QUIZ: &str = "quiz";

/// One file handed to the import pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRequest {
    /// Raw file contents.
    pub text: String,
    pub format: ImportFormat,
    /// Name of the source file; its stem is the default quiz title.
    pub file_name: String,
    /// Course chosen by the caller, used when the payload names none.
    pub fallback_course: Option<u64>,
}

impl ImportRequest {
    pub fn new(
        text: impl Into<String>,
        format: ImportFormat,
        file_name: impl Into<String>,
        fallback_course: Option<u64>,
    ) -> Self {
        Self {
            text: text.into(),
            format,
            file_name: file_name.into(),
            fallback_course,
        }
    }
}

/// Pick the parser for a file by its extension (`.json` or `.csv`).
pub fn detect_format(file_name: &str) -> Option<ImportFormat> {
    let extension = Path::new(file_name)
        .extension()?
        .to_str()?
        .to_ascii_lowercase();
    match extension.as_str() {
        "json" => Some(ImportFormat::Structured),
        "csv" => Some(ImportFormat::Tabular),
        _ => None,
    }
}

/// Parse an import request into a quiz record with a resolved course.
pub fn parse_quiz(request: &ImportRequest) -> Result<QuizRecord, AulaError> {
    match request.format {
        ImportFormat::Structured => parse_structured(
            &request.text,
            &request.file_name,
            request.fallback_course,
        ),
        ImportFormat::Tabular => {
            parse_tabular(&request.text, &request.file_name, request.fallback_course)
        }
    }
}

#[derive(Debug, Deserialize)]
struct QuizDocument {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    course: Option<Value>,
    #[serde(default)]
    quiz_type: Option<QuizType>,
    #[serde(default)]
    time_limit_minutes: Option<u32>,
    #[serde(default)]
    max_attempts: Option<u32>,
    #[serde(default)]
    passing_score: Option<u32>,
    #[serde(default)]
    questions: Vec<QuestionDocument>,
}

#[derive(Debug, Deserialize)]
struct QuestionDocument {
    #[serde(default, alias = "text", alias = "question")]
    question_text: Option<String>,
    #[serde(default)]
    question_type: Option<String>,
    #[serde(default)]
    points: Option<u32>,
    #[serde(default)]
    order: Option<u32>,
    #[serde(default)]
    explanation: Option<String>,
    #[serde(default)]
    options: Vec<OptionEntry>,
    /// Correct options named by text or by 0-based position.
    #[serde(default, alias = "correctAnswers")]
    correct_answers: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OptionEntry {
    Text(String),
    Record(OptionDocument),
}

#[derive(Debug, Deserialize)]
struct OptionDocument {
    #[serde(default, alias = "text")]
    option_text: Option<String>,
    #[serde(default)]
    is_correct: bool,
    #[serde(default)]
    order: Option<u32>,
}

/// Parse a JSON quiz document.
///
/// An embedded `course` wins over `fallback_course`.
pub fn parse_structured(
    text: &str,
    file_name: &str,
    fallback_course: Option<u64>,
) -> Result<QuizRecord, AulaError> {
    let document: QuizDocument = serde_json::from_str(text).map_err(|err| {
        AulaError::new(
            ErrorCategory::Serialization,
            "invalid_structured_payload",
            format!("{file_name}: {err}"),
        )
    })?;

    let course = resolve_course(document.course.as_ref(), fallback_course)?;
    let title = non_blank(document.title).unwrap_or_else(|| title_from_file_name(file_name));

    let questions = document
        .questions
        .into_iter()
        .enumerate()
        .map(|(index, question)| QuestionRecord {
            question_text: question.question_text.unwrap_or_default().trim().to_owned(),
            question_type: question
                .question_type
                .as_deref()
                .map(QuestionType::parse_lenient)
                .unwrap_or_default(),
            points: question
                .points
                .filter(|points| *points >= 1)
                .unwrap_or(DEFAULT_POINTS),
            order: question.order.unwrap_or(sequence_number(index)),
            explanation: non_blank(question.explanation),
            options: question
                .options
                .into_iter()
                .enumerate()
                .map(|(option_index, option)| {
                    let (text, flagged, order) = match option {
                        OptionEntry::Text(text) => (text, false, None),
                        OptionEntry::Record(record) => (
                            record.option_text.unwrap_or_default(),
                            record.is_correct,
                            record.order,
                        ),
                    };
                    let option_text = text.trim().to_owned();
                    let listed =
                        listed_as_correct(&question.correct_answers, &option_text, option_index);
                    OptionRecord {
                        option_text,
                        is_correct: flagged || listed,
                        order: order.unwrap_or(sequence_number(option_index)),
                    }
                })
                .collect(),
        })
        .collect();

    Ok(QuizRecord {
        title,
        description: non_blank(document.description).unwrap_or_default(),
        course,
        quiz_type: document.quiz_type,
        time_limit_minutes: document.time_limit_minutes,
        max_attempts: document.max_attempts,
        passing_score: document.passing_score,
        questions,
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TabularRow {
    #[serde(alias = "question_text")]
    question: Option<String>,
    question_type: Option<String>,
    points: Option<String>,
    explanation: Option<String>,
    #[serde(alias = "option")]
    option_text: Option<String>,
    is_correct: Option<String>,
    quiz_title: Option<String>,
    quiz_description: Option<String>,
}

/// Parse a CSV quiz where each row is one `(question, option)` pair.
///
/// Questions keep first-seen order; the first row of a question supplies its
/// type, points and explanation.
pub fn parse_tabular(
    text: &str,
    file_name: &str,
    fallback_course: Option<u64>,
) -> Result<QuizRecord, AulaError> {
    let course = fallback_course.ok_or_else(missing_course)?;

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers = reader
        .headers()
        .map_err(|err| tabular_error(file_name, &err))?
        .iter()
        .map(|header| header.trim_start_matches('\u{feff}').to_ascii_lowercase())
        .collect::<Vec<_>>();
    reader.set_headers(csv::StringRecord::from(headers));

    let mut title = None;
    let mut description = None;
    let mut questions: Vec<QuestionRecord> = Vec::new();
    let mut index_by_text: HashMap<String, usize> = HashMap::new();

    for row in reader.deserialize::<TabularRow>() {
        let row = row.map_err(|err| tabular_error(file_name, &err))?;

        if title.is_none() {
            title = non_blank(row.quiz_title);
        }
        if description.is_none() {
            description = non_blank(row.quiz_description);
        }

        let Some(question_text) = non_blank(row.question) else {
            continue;
        };

        let index = match index_by_text.get(&question_text) {
            Some(index) => *index,
            None => {
                let index = questions.len();
                questions.push(QuestionRecord {
                    question_text: question_text.clone(),
                    question_type: row
                        .question_type
                        .as_deref()
                        .map(QuestionType::parse_lenient)
                        .unwrap_or_default(),
                    points: parse_points(row.points.as_deref()),
                    order: sequence_number(index),
                    explanation: non_blank(row.explanation),
                    options: Vec::new(),
                });
                index_by_text.insert(question_text, index);
                index
            }
        };

        if let Some(option_text) = non_blank(row.option_text) {
            let question = &mut questions[index];
            let order = sequence_number(question.options.len());
            question.options.push(OptionRecord {
                option_text,
                is_correct: is_true_flag(row.is_correct.as_deref()),
                order,
            });
        }
    }

    Ok(QuizRecord {
        title: title.unwrap_or_else(|| title_from_file_name(file_name)),
        description: description.unwrap_or_default(),
        course,
        quiz_type: None,
        time_limit_minutes: None,
        max_attempts: None,
        passing_score: None,
        questions,
    })
}

/// Source file name without directories or extension.
pub fn title_from_file_name(file_name: &str) -> String {
    Path::new(file_name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::trim)
        .filter(|stem| !stem.is_empty())
        .unwrap_or(UNTITLED_QUIZ)
        .to_owned()
}

fn resolve_course(embedded: Option<&Value>, fallback: Option<u64>) -> Result<u64, AulaError> {
    match embedded {
        None | Some(Value::Null) => fallback.ok_or_else(missing_course),
        Some(Value::Number(number)) => number.as_u64().ok_or_else(|| invalid_course(embedded)),
        Some(Value::String(raw)) if raw.trim().is_empty() => fallback.ok_or_else(missing_course),
        Some(Value::String(raw)) => raw.trim().parse().map_err(|_| invalid_course(embedded)),
        Some(_) => Err(invalid_course(embedded)),
    }
}

fn missing_course() -> AulaError {
    AulaError::precondition(
        "missing_course",
        "the file names no course and no course was selected",
    )
}

fn invalid_course(raw: Option<&Value>) -> AulaError {
    let shown = raw.map(Value::to_string).unwrap_or_default();
    AulaError::new(
        ErrorCategory::Serialization,
        "invalid_course_reference",
        format!("course reference {shown} is not a course id"),
    )
}

fn tabular_error(file_name: &str, err: &csv::Error) -> AulaError {
    let location = err
        .position()
        .map(|pos| format!(" (line {})", pos.line()))
        .unwrap_or_default();
    AulaError::new(
        ErrorCategory::Serialization,
        "invalid_tabular_payload",
        format!("{file_name}{location}: {err}"),
    )
}

fn listed_as_correct(correct_answers: &[Value], option_text: &str, option_index: usize) -> bool {
    correct_answers.iter().any(|answer| match answer {
        Value::String(text) => text.trim() == option_text,
        Value::Number(number) => number
            .as_u64()
            .is_some_and(|position| usize::try_from(position) == Ok(option_index)),
        _ => false,
    })
}

fn parse_points(raw: Option<&str>) -> u32 {
    raw.and_then(|value| value.trim().parse::<u32>().ok())
        .filter(|points| *points >= 1)
        .unwrap_or(DEFAULT_POINTS)
}

fn is_true_flag(raw: Option<&str>) -> bool {
    raw.is_some_and(|value| value.trim().eq_ignore_ascii_case("true"))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn sequence_number(index: usize) -> u32 {
    u32::try_from(index).map_or(u32::MAX, |index| index.saturating_add(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tabular(text: &str) -> QuizRecord {
        parse_tabular(text, "Evaluación Básica.csv", Some(7)).expect("csv should parse")
    }

    #[test]
    fn groups_rows_by_question_text() {
        let quiz = tabular(
            "question,option_text,is_correct\n\
             Q1,A,true\n\
             Q1,B,false\n\
             Q2,C,\n",
        );

        assert_eq!(quiz.questions.len(), 2);

        let first = &quiz.questions[0];
        assert_eq!(first.question_text, "Q1");
        assert_eq!(first.options.len(), 2);
        assert_eq!(first.options[0].option_text, "A");
        assert!(first.options[0].is_correct);
        assert_eq!(first.options[1].option_text, "B");
        assert!(!first.options[1].is_correct);
        assert_eq!((first.options[0].order, first.options[1].order), (1, 2));

        let second = &quiz.questions[1];
        assert_eq!(second.question_text, "Q2");
        assert_eq!(second.options.len(), 1);
        assert!(!second.options[0].is_correct);
        assert_eq!((first.order, second.order), (1, 2));
    }

    #[test]
    fn missing_type_and_points_use_defaults() {
        let quiz = tabular("question,option_text\nQ1,A\n");
        assert_eq!(quiz.questions[0].question_type, QuestionType::MultipleChoice);
        assert_eq!(quiz.questions[0].points, 1);
    }

    #[test]
    fn blank_or_invalid_cells_use_defaults() {
        let quiz = tabular(
            "question,question_type,points,option_text,is_correct\n\
             Q1,,,A,yes\n\
             Q2,matching,0,B,TRUE\n\
             Q3,essay,3,,\n",
        );
        assert_eq!(quiz.questions[0].question_type, QuestionType::MultipleChoice);
        assert_eq!(quiz.questions[0].points, 1);
        assert!(!quiz.questions[0].options[0].is_correct);

        assert_eq!(quiz.questions[1].question_type, QuestionType::MultipleChoice);
        assert_eq!(quiz.questions[1].points, 1);
        assert!(quiz.questions[1].options[0].is_correct);

        assert_eq!(quiz.questions[2].question_type, QuestionType::Essay);
        assert_eq!(quiz.questions[2].points, 3);
        assert!(quiz.questions[2].options.is_empty());
    }

    #[test]
    fn first_row_of_a_question_wins_metadata() {
        let quiz = tabular(
            "question,question_type,points,explanation,option_text\n\
             Q1,true_false,2,Porque sí,Verdadero\n\
             Q1,essay,9,Otra,Falso\n",
        );
        assert_eq!(quiz.questions.len(), 1);
        let question = &quiz.questions[0];
        assert_eq!(question.question_type, QuestionType::TrueFalse);
        assert_eq!(question.points, 2);
        assert_eq!(question.explanation.as_deref(), Some("Porque sí"));
        assert_eq!(question.options.len(), 2);
    }

    #[test]
    fn headers_are_case_insensitive_and_accept_aliases() {
        let quiz = tabular("\u{feff}Question_Text,Option,IS_CORRECT\nQ1,A,True\n");
        assert_eq!(quiz.questions[0].question_text, "Q1");
        assert_eq!(quiz.questions[0].options[0].option_text, "A");
        assert!(quiz.questions[0].options[0].is_correct);
    }

    #[test]
    fn quoted_cells_keep_commas() {
        let quiz = tabular("question,option_text\n\"Fondo, serie y expediente\",\"A, B\"\n");
        assert_eq!(quiz.questions[0].question_text, "Fondo, serie y expediente");
        assert_eq!(quiz.questions[0].options[0].option_text, "A, B");
    }

    #[test]
    fn rows_without_question_text_are_ignored() {
        let quiz = tabular("question,option_text\n,orphan\nQ1,A\n\n");
        assert_eq!(quiz.questions.len(), 1);
        assert_eq!(quiz.questions[0].options.len(), 1);
    }

    #[test]
    fn title_defaults_to_file_stem_unless_column_present() {
        let quiz = tabular("question,option_text\nQ1,A\n");
        assert_eq!(quiz.title, "Evaluación Básica");
        assert_eq!(quiz.course, 7);

        let quiz = tabular("quiz_title,question,option_text\n,Q1,A\nPreservación Digital,Q1,B\n");
        assert_eq!(quiz.title, "Preservación Digital");
    }

    #[test]
    fn tabular_without_course_is_rejected() {
        let err = parse_tabular("question\nQ1\n", "quiz.csv", None)
            .expect_err("tabular import needs a selected course");
        assert_eq!(err.code, "missing_course");
        assert_eq!(err.category, ErrorCategory::Precondition);
    }

    #[test]
    fn structured_without_course_adopts_fallback() {
        let quiz = parse_structured(
            r#"{"title": "Archivística I", "questions": []}"#,
            "a.json",
            Some(12),
        )
        .expect("json should parse");
        assert_eq!(quiz.course, 12);
    }

    #[test]
    fn structured_course_is_kept_over_fallback() {
        let quiz = parse_structured(
            r#"{"title": "Archivística I", "course": 3, "questions": []}"#,
            "a.json",
            Some(12),
        )
        .expect("json should parse");
        assert_eq!(quiz.course, 3);

        let quiz = parse_structured(r#"{"title": "T", "course": "5"}"#, "a.json", None)
            .expect("numeric string course should parse");
        assert_eq!(quiz.course, 5);
    }

    #[test]
    fn structured_without_any_course_fails() {
        let err = parse_structured(r#"{"title": "T"}"#, "a.json", None)
            .expect_err("course must come from somewhere");
        assert_eq!(err.code, "missing_course");

        let err = parse_structured(r#"{"title": "T", "course": "historia"}"#, "a.json", Some(1))
            .expect_err("non-numeric course must fail");
        assert_eq!(err.code, "invalid_course_reference");
    }

    #[test]
    fn structured_questions_get_defaults_and_aliases() {
        let quiz = parse_structured(
            r#"{
                "title": "  ",
                "course": 1,
                "quiz_type": "exam",
                "questions": [
                    {"text": "Q1", "options": [{"text": "A", "is_correct": true}, {"option_text": "B"}]},
                    {"question_text": "Q2", "question_type": "essay", "points": 4, "order": 9}
                ]
            }"#,
            "exports/final.json",
            None,
        )
        .expect("json should parse");

        assert_eq!(quiz.title, "final");
        assert_eq!(quiz.quiz_type, Some(QuizType::Exam));
        let first = &quiz.questions[0];
        assert_eq!(first.question_text, "Q1");
        assert_eq!(first.question_type, QuestionType::MultipleChoice);
        assert_eq!((first.points, first.order), (1, 1));
        assert_eq!(first.options[1].option_text, "B");
        assert_eq!(first.options[1].order, 2);
        assert!(!first.options[1].is_correct);

        let second = &quiz.questions[1];
        assert_eq!(second.question_type, QuestionType::Essay);
        assert_eq!((second.points, second.order), (4, 9));
    }

    #[test]
    fn plain_string_options_take_correctness_from_answer_list() {
        let quiz = parse_structured(
            r#"{"title":"Archivos","course":1,"questions":[
                {"text":"Q1","options":["A","B","C"],"correctAnswers":["A"]},
                {"text":"Q2","options":["Sí","No"],"correctAnswers":[1]}
            ]}"#,
            "archivos.json",
            None,
        )
        .expect("string options should parse");

        let first = &quiz.questions[0];
        assert_eq!(
            first
                .options
                .iter()
                .map(|option| (option.option_text.as_str(), option.is_correct, option.order))
                .collect::<Vec<_>>(),
            vec![("A", true, 1), ("B", false, 2), ("C", false, 3)]
        );

        let second = &quiz.questions[1];
        assert!(!second.options[0].is_correct);
        assert!(second.options[1].is_correct);
    }

    #[test]
    fn object_and_string_options_can_mix() {
        let quiz = parse_structured(
            r#"{"course":1,"questions":[{"text":"Q","options":[{"text":"A","is_correct":true},"B"]}]}"#,
            "mixed.json",
            None,
        )
        .expect("mixed options should parse");
        let options = &quiz.questions[0].options;
        assert!(options[0].is_correct);
        assert_eq!(options[1].option_text, "B");
        assert!(!options[1].is_correct);
    }

    #[test]
    fn structured_zero_points_become_one() {
        let quiz = parse_structured(
            r#"{"course":1,"questions":[{"text":"Q","points":0}]}"#,
            "points.json",
            None,
        )
        .expect("should parse");
        assert_eq!(quiz.questions[0].points, 1);
    }

    #[test]
    fn malformed_json_is_a_serialization_error() {
        let err = parse_structured("{not json", "broken.json", Some(1))
            .expect_err("broken json must fail");
        assert_eq!(err.category, ErrorCategory::Serialization);
        assert!(err.message.starts_with("broken.json"));
    }

    #[test]
    fn dispatches_on_import_format() {
        let request = ImportRequest::new("question\nQ1\n", ImportFormat::Tabular, "q.csv", Some(2));
        let quiz = parse_quiz(&request).expect("tabular dispatch");
        assert_eq!(quiz.questions.len(), 1);

        let request = ImportRequest::new(r#"{"title": "J"}"#, ImportFormat::Structured, "q.json", Some(2));
        let quiz = parse_quiz(&request).expect("structured dispatch");
        assert_eq!(quiz.title, "J");
    }

    #[test]
    fn detects_format_from_extension() {
        assert_eq!(detect_format("quiz.JSON"), Some(ImportFormat::Structured));
        assert_eq!(detect_format("dir/quiz.csv"), Some(ImportFormat::Tabular));
        assert_eq!(detect_format("quiz.xlsx"), None);
        assert_eq!(detect_format("quiz"), None);
    }
}
