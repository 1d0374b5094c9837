//! The question evaluator agent.
//!
//! Scores an existing question on the seven-feature scale: stem length by
//! rule, the remaining six by a single model call against a fixed rubric.
//! An unusable model response is retried once and then replaced by an
//! all-2 sentinel so the generation loop stays live.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use wastepro_core::{AgentBehavior, AgentHandle, Parcel, Result};
use wastepro_llm::{json_schema_format, repair, ChatClient, ChatMessage, LlmGateway, PromptRequest};

use crate::features::FEATURE_KEYS;

pub const TOPIC_EVALUATE: &str = "Evaluate/SCQ/Evaluation";

/// Sentinel grade used when the model cannot produce a usable scoring.
const SENTINEL_GRADE: u8 = 2;

const RUBRIC: &str = "\
1. stem_technical_term_density
   Rate how many technical terms appear in the question stem.
   - 1 = Few (0-2 terms)
   - 2 = Moderate (3-4 terms)
   - 3 = Many (5 or more)

2. stem_cognitive_level
   Determine the cognitive level of the stem based on Bloom's taxonomy.
   - 1 = Recall (remembering facts)
   - 2 = Understanding (conceptual comprehension)
   - 3 = Analysis/Evaluation (critical reasoning)

3. option_average_length
   Evaluate the average length of the options.
   - 1 = Short (1-4 words)
   - 2 = Medium (5-8 words)
   - 3 = Long (9 or more words)

4. option_similarity
   Assess similarity among the options in wording or meaning.
   - 1 = Low similarity
   - 2 = Moderate similarity
   - 3 = High similarity

5. stem_option_similarity
   Evaluate how relevant the options are to the stem.
   - 1 = High relevance
   - 2 = Moderate relevance
   - 3 = Low relevance

6. high_distractor_count
   Count plausible (attractive but incorrect) distractors.
   - 1 = 1 strong distractor
   - 2 = 2 strong distractors
   - 3 = 3 strong distractors";

pub struct ScqEvaluator {
    chat: OnceLock<Arc<dyn ChatClient>>,
}

impl ScqEvaluator {
    pub fn new() -> Self {
        Self {
            chat: OnceLock::new(),
        }
    }

    /// Use an explicit chat seam instead of the bus gateway.
    pub fn with_chat(chat: Arc<dyn ChatClient>) -> Self {
        let evaluator = Self::new();
        let _ = evaluator.chat.set(chat);
        evaluator
    }

    async fn evaluate(&self, question: &Value) -> Map<String, Value> {
        let stem = question
            .get("stem")
            .and_then(Value::as_str)
            .unwrap_or_default();

        let mut grades = Map::new();
        grades.insert(
            FEATURE_KEYS[0].to_string(),
            Value::from(grade_stem_length(stem)),
        );
        for (key, value) in self.grade_with_model(question).await {
            grades.insert(key, value);
        }
        grades
    }

    /// Features 2..7 via one rubric-scored model call. Retried once; the
    /// sentinel keeps the caller's loop live when the model misbehaves.
    async fn grade_with_model(&self, question: &Value) -> Map<String, Value> {
        let chat = self.chat.get().expect("chat seam installed at activation");
        let request = Self::scoring_request(question);

        for attempt in 1..=2 {
            match chat.chat(request.clone()).await {
                Ok(response) => match Self::parse_grades(&response) {
                    Some(grades) => return grades,
                    None => warn!(attempt, "unusable evaluation output"),
                },
                Err(e) => warn!(attempt, error = %e, "evaluation call failed"),
            }
        }
        debug!("falling back to sentinel grades");
        FEATURE_KEYS[1..]
            .iter()
            .map(|&key| (key.to_string(), Value::from(SENTINEL_GRADE)))
            .collect()
    }

    fn scoring_request(question: &Value) -> PromptRequest {
        let user_content = format!(
            "Evaluate the following Single Choice Question (SCQ). Use ONLY \
             the SCQ content for your judgment.\n\nSCQ:\n{question}\n\n\
             Score the SCQ on the six features below. For each feature, \
             assign a score of 1, 2, or 3 based on its definition.\n\n{RUBRIC}\n\n\
             Return ONLY a JSON object with those six keys and integer scores."
        );
        let schema_properties: Map<String, Value> = FEATURE_KEYS[1..]
            .iter()
            .map(|&key| {
                (
                    key.to_string(),
                    json!({"type": "integer", "minimum": 1, "maximum": 3}),
                )
            })
            .collect();
        PromptRequest::from_messages(vec![
            ChatMessage::system(
                "You are an exam question evaluator. Evaluate the SCQ strictly \
                 according to the scoring rules provided. Use only the SCQ \
                 content itself. Return ONLY a JSON object with the required \
                 keys and numeric scores. Do NOT include explanations, \
                 comments, or additional text.",
            ),
            ChatMessage::user(user_content),
        ])
        .with_response_format(json_schema_format(
            "evaluate_question",
            json!({
                "type": "object",
                "properties": schema_properties,
                "required": FEATURE_KEYS[1..].to_vec(),
                "additionalProperties": false,
            }),
        ))
    }

    /// All six keys present, integers in `1..=3`; anything else is
    /// unusable.
    fn parse_grades(response: &str) -> Option<Map<String, Value>> {
        let parsed = repair::parse_object(response).ok()?;
        let mut grades = Map::new();
        for &key in &FEATURE_KEYS[1..] {
            let grade = parsed.get(key)?.as_u64()?;
            if !(1..=3).contains(&grade) {
                return None;
            }
            grades.insert(key.to_string(), Value::from(grade));
        }
        Some(grades)
    }
}

impl Default for ScqEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

/// Rule-based stem length grading.
///
/// CJK characters and Latin words are counted separately; the larger
/// count decides the language and its thresholds.
pub fn grade_stem_length(stem: &str) -> u8 {
    let stem = stem.trim();
    let cjk_count = stem
        .chars()
        .filter(|c| ('\u{4e00}'..='\u{9fff}').contains(c))
        .count();
    let word_count = stem
        .split(|c: char| !c.is_ascii_alphabetic())
        .filter(|word| !word.is_empty())
        .count();
    let total_units = cjk_count + word_count;

    if cjk_count >= word_count {
        match total_units {
            0..=15 => 1,
            16..=30 => 2,
            _ => 3,
        }
    } else {
        match total_units {
            0..=10 => 1,
            11..=20 => 2,
            _ => 3,
        }
    }
}

#[async_trait]
impl AgentBehavior for ScqEvaluator {
    fn name(&self) -> &str {
        "scq.evaluation.wastepro"
    }

    async fn on_activate(&self, agent: &AgentHandle) -> Result<()> {
        if self.chat.get().is_none() {
            let _ = self.chat.set(Arc::new(LlmGateway::new(agent.clone())));
        }
        agent.subscribe(TOPIC_EVALUATE).await
    }

    async fn on_message(
        &self,
        _agent: &AgentHandle,
        _topic: &str,
        parcel: Parcel,
    ) -> Result<Option<Parcel>> {
        let mut assessment = match parcel.content() {
            Value::Object(map) => map.clone(),
            _ => {
                return Ok(Some(Parcel::error(
                    "InvalidRequest",
                    "assessment must be a mapping",
                )))
            }
        };
        let question = match assessment.get("question") {
            Some(question) => question.clone(),
            None => {
                return Ok(Some(Parcel::error(
                    "InvalidRequest",
                    "assessment carries no question",
                )))
            }
        };

        let evaluation = self.evaluate(&question).await;
        debug!(?evaluation, "question graded");
        assessment.insert("evaluation".into(), Value::Object(evaluation));
        Ok(Some(assessment.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use wastepro_llm::{LlmError, LlmResult};

    struct ScriptedChat {
        responses: Mutex<Vec<LlmResult<String>>>,
    }

    impl ScriptedChat {
        fn new(responses: Vec<LlmResult<String>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into_iter().rev().collect()),
            })
        }
    }

    #[async_trait]
    impl ChatClient for ScriptedChat {
        async fn chat(&self, _request: PromptRequest) -> LlmResult<String> {
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(LlmError::InvalidResponse("script exhausted".into())))
        }
    }

    fn question() -> Value {
        json!({
            "stem": "Which regulation governs bottom ash reuse in municipal facilities?",
            "option_A": "Clause 30-3",
            "option_B": "Clause 15-1",
            "option_C": "Clause 26-4",
            "option_D": "Clause 10-2",
            "answer": "C",
        })
    }

    #[test]
    fn chinese_stem_thresholds() {
        assert_eq!(grade_stem_length("廢棄物分類"), 1);
        assert_eq!(grade_stem_length("廢棄物分類與處理方式包含焚化掩埋與回收再利用等"), 2);
        assert_eq!(grade_stem_length(&"廢".repeat(31)), 3);
    }

    #[test]
    fn english_stem_thresholds() {
        assert_eq!(grade_stem_length("What is waste?"), 1);
        assert_eq!(
            grade_stem_length(
                "Which of the following options best describes the process of municipal waste?"
            ),
            2
        );
        let long = "word ".repeat(25);
        assert_eq!(grade_stem_length(&long), 3);
    }

    #[test]
    fn language_is_decided_by_the_larger_count() {
        // Three CJK characters vs five English words: English thresholds.
        assert_eq!(grade_stem_length("垃圾焚化 is handled by local plants"), 1);
    }

    #[tokio::test]
    async fn valid_model_scores_are_used() {
        let scores = json!({
            "stem_technical_term_density": 3,
            "stem_cognitive_level": 2,
            "option_average_length": 1,
            "option_similarity": 2,
            "stem_option_similarity": 1,
            "high_distractor_count": 2,
        });
        let evaluator =
            ScqEvaluator::with_chat(ScriptedChat::new(vec![Ok(scores.to_string())]));
        let grades = evaluator.evaluate(&question()).await;

        assert_eq!(grades.len(), 7);
        assert_eq!(grades["stem_technical_term_density"], json!(3));
        // Rule-based feature 1 is present alongside the model scores.
        assert!(grades.contains_key("stem_length"));
    }

    #[tokio::test]
    async fn invalid_output_is_retried_once_then_sentinel() {
        let evaluator = ScqEvaluator::with_chat(ScriptedChat::new(vec![
            Ok("not json".into()),
            Ok("{\"stem_cognitive_level\": 9}".into()),
        ]));
        let grades = evaluator.evaluate(&question()).await;

        for &key in &FEATURE_KEYS[1..] {
            assert_eq!(grades[key], json!(2), "sentinel expected for {key}");
        }
    }

    #[tokio::test]
    async fn out_of_range_scores_are_rejected() {
        let bad = json!({
            "stem_technical_term_density": 0,
            "stem_cognitive_level": 2,
            "option_average_length": 1,
            "option_similarity": 2,
            "stem_option_similarity": 1,
            "high_distractor_count": 2,
        });
        let evaluator = ScqEvaluator::with_chat(ScriptedChat::new(vec![
            Ok(bad.to_string()),
            Ok(bad.to_string()),
        ]));
        let grades = evaluator.evaluate(&question()).await;
        assert_eq!(grades["stem_technical_term_density"], json!(2));
    }
}
