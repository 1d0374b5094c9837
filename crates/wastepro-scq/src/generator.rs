//! The single-choice question generator agent.
//!
//! One request produces one question: pick a concept under the requested
//! document/section, draw related facts, flatten their relations into
//! source text, sample a feature-weight combination matching the target
//! difficulty, and have the model write the question against the sampled
//! feature levels. An optional closed loop grades the result through the
//! evaluator and retries until the measured difficulty is close enough.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use wastepro_core::config::ScqServiceConfig;
use wastepro_core::{AgentBehavior, AgentHandle, Parcel, Result};
use wastepro_kg::{GraphNode, StoreResolver};
use wastepro_llm::{json_schema_format, repair, ChatClient, ChatMessage, LlmGateway, PromptRequest};

use crate::error::{ScqError, ScqResult};
use crate::evaluator;
use crate::features::{difficulty_target, FeatureVector};
use crate::ranker::build_ranker;
use crate::sampler::sample_feature_vector;

pub const TOPIC_CREATE: &str = "Create/SCQ/Generation";

/// Stem prefix of the reserved error-placeholder question.
pub const ERROR_STEM: &str = "【系統錯誤】無法產生題目，請稍後重試。";

/// Deadline for KG queries inside the generation path.
const KG_TIMEOUT: Duration = Duration::from_secs(20);

/// Deadline for one evaluator round-trip.
const EVALUATE_TIMEOUT: Duration = Duration::from_secs(120);

/// Model-output parse attempts per generation.
const PARSE_RETRIES: usize = 3;

/// Whole-procedure attempts when the evaluator loop is on.
const LOOP_ATTEMPTS: usize = 3;

/// Accepted distance between measured and target grade.
const ACCEPT_MARGIN: f64 = 1.5;

/// Attempted concept/fact draws while collecting text materials.
const MAX_DRAWS: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionCriteria {
    pub question_id: String,
    pub subject: String,
    pub document: String,
    #[serde(default)]
    pub section: Option<Vec<String>>,
    pub difficulty: u32,
}

/// A generated question with its exact wire keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub stem: String,
    #[serde(rename = "option_A")]
    pub option_a: String,
    #[serde(rename = "option_B")]
    pub option_b: String,
    #[serde(rename = "option_C")]
    pub option_c: String,
    #[serde(rename = "option_D")]
    pub option_d: String,
    pub answer: String,
}

impl Question {
    pub fn option(&self, letter: &str) -> Option<&str> {
        match letter {
            "A" => Some(&self.option_a),
            "B" => Some(&self.option_b),
            "C" => Some(&self.option_c),
            "D" => Some(&self.option_d),
            _ => None,
        }
    }

    /// The reserved placeholder returned when the model output is
    /// unusable, so downstream consumers still receive a well-formed
    /// question.
    pub fn error_placeholder() -> Self {
        Self {
            stem: ERROR_STEM.to_string(),
            option_a: "請重新送出請求".into(),
            option_b: "請確認知識圖譜內容".into(),
            option_c: "請聯絡系統管理員".into(),
            option_d: "以上皆可".into(),
            answer: "D".into(),
        }
    }
}

pub struct SingleChoiceGenerator {
    resolver: Arc<dyn StoreResolver>,
    options: ScqServiceConfig,
    chat: OnceLock<Arc<dyn ChatClient>>,
}

impl SingleChoiceGenerator {
    pub fn new(resolver: Arc<dyn StoreResolver>, options: ScqServiceConfig) -> Self {
        Self {
            resolver,
            options,
            chat: OnceLock::new(),
        }
    }

    /// Use an explicit chat seam instead of the bus gateway.
    pub fn with_chat(
        resolver: Arc<dyn StoreResolver>,
        options: ScqServiceConfig,
        chat: Arc<dyn ChatClient>,
    ) -> Self {
        let generator = Self::new(resolver, options);
        let _ = generator.chat.set(chat);
        generator
    }

    async fn create_question(
        &self,
        agent: &AgentHandle,
        criteria: &QuestionCriteria,
        target: f64,
    ) -> ScqResult<(FeatureVector, Question)> {
        if !self.options.evaluation {
            return self.generate_once(agent, criteria, target).await;
        }

        let mut best: Option<(f64, FeatureVector, Question)> = None;
        for attempt in 1..=LOOP_ATTEMPTS {
            let (vector, question) = self.generate_once(agent, criteria, target).await?;
            match self.evaluate(agent, criteria, &question).await {
                Ok(measured) => {
                    let distance = (measured.weighted_grade() - target).abs();
                    debug!(attempt, distance, "evaluator verdict");
                    if distance <= ACCEPT_MARGIN {
                        return Ok((vector, question));
                    }
                    if best.as_ref().map_or(true, |(d, _, _)| distance < *d) {
                        best = Some((distance, vector, question));
                    }
                }
                Err(e) => {
                    warn!(attempt, error = %e, "evaluation unavailable");
                    if best.is_none() {
                        best = Some((f64::INFINITY, vector, question));
                    }
                }
            }
        }
        let (distance, vector, question) = best.expect("at least one attempt recorded");
        info!(distance, "no attempt within margin; returning the closest");
        Ok((vector, question))
    }

    async fn generate_once(
        &self,
        agent: &AgentHandle,
        criteria: &QuestionCriteria,
        target: f64,
    ) -> ScqResult<(FeatureVector, Question)> {
        // 1. Candidate concepts for the document/section.
        let reply = agent
            .publish_sync(
                wastepro_kg::TOPIC_CONCEPTS_QUERY,
                json!({
                    "kg_name": criteria.subject,
                    "document": criteria.document,
                    "section": criteria.section,
                }),
                KG_TIMEOUT,
            )
            .await?;
        let concepts: Vec<GraphNode> = reply
            .get("concepts")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| ScqError::InvalidCriteria(format!("bad concepts reply: {e}")))?
            .unwrap_or_default();
        if concepts.is_empty() {
            return Err(ScqError::NoConcepts);
        }

        // 2. Direct store access for fact traversal, via the access point.
        let reply = agent
            .publish_sync(
                wastepro_kg::TOPIC_ACCESS_POINT,
                json!({ "kg_name": criteria.subject }),
                KG_TIMEOUT,
            )
            .await?;
        let bolt_url = reply
            .get("bolt_url")
            .and_then(Value::as_str)
            .ok_or_else(|| ScqError::InvalidCriteria("access point carried no bolt_url".into()))?
            .to_string();
        let store = self.resolver.resolve(&bolt_url)?;
        let ranker = build_ranker(&self.options.ranker, store.clone())?;

        // 3. Source sentences from length-1 fact paths.
        let needed = (criteria.difficulty as usize / 3).max(10);
        let mut materials: Vec<String> = Vec::new();
        for _ in 0..MAX_DRAWS {
            let concept = match ranker.rank_concepts(&concepts).await {
                Some(concept) => concept,
                None => break,
            };
            for fact in ranker.rank_facts(&concept).await? {
                for (source, relation, object) in store.fact_neighbors(&fact.element_id).await? {
                    let sentence = format!("{} {} {}", source.name, relation, object.name);
                    if !materials.contains(&sentence) {
                        materials.push(sentence);
                    }
                }
            }
            if materials.len() >= needed {
                break;
            }
        }
        if materials.is_empty() {
            return Err(ScqError::NoTextMaterials);
        }
        debug!(
            collected = materials.len(),
            needed, "text materials gathered"
        );

        // 4. Feature-weight combination for the target score.
        let vector = sample_feature_vector(target, &mut rand::thread_rng());

        // 5..6. Model call with schema-enforced keys, with parse retries
        // and the placeholder as the last resort.
        let request = Self::generation_request(&vector, &materials);
        let mut question = None;
        for attempt in 1..=PARSE_RETRIES {
            let chat = self.chat.get().expect("chat seam installed at activation");
            match chat.chat(request.clone()).await {
                Ok(response) => match Self::parse_question(&response) {
                    Ok(parsed) => {
                        question = Some(parsed);
                        break;
                    }
                    Err(e) => warn!(attempt, error = %e, "unusable generation output"),
                },
                Err(e) => warn!(attempt, error = %e, "generation call failed"),
            }
        }
        let mut question = match question {
            Some(question) => question,
            None => return Ok((vector, Question::error_placeholder())),
        };

        // 7. Normalize, clean, and defeat positional bias.
        question.answer = normalize_answer(&question.answer);
        clean_question(&mut question);
        shuffle_options(&mut question, &mut rand::thread_rng());

        Ok((vector, question))
    }

    fn generation_request(vector: &FeatureVector, materials: &[String]) -> PromptRequest {
        let instructions = format!(
            "You are an exam question creator tasked with generating \
             multiple-choice questions based on the given features and text. \
             Follow these instructions carefully:\n\
             1. Create a single-answer multiple-choice question (4 options: A, B, C, D).\n\
             2. Include the correct answer and ensure the correct option is \
             distributed randomly (not concentrated in A).\n\
             3. Do not provide explanations or analysis of the question or answer.\n\
             4. Use only the provided text as the factual source.\n\n\
             Features:\n{}\n\nText:\n{}",
            vector.describe(),
            materials.join("\n")
        );
        PromptRequest::from_messages(vec![
            ChatMessage::system(
                "You are a helpful exam question generator. Provide your response in JSON format.",
            ),
            ChatMessage::user(instructions),
        ])
        .with_response_format(json_schema_format(
            "generate_question",
            json!({
                "type": "object",
                "properties": {
                    "stem": {"type": "string"},
                    "option_A": {"type": "string"},
                    "option_B": {"type": "string"},
                    "option_C": {"type": "string"},
                    "option_D": {"type": "string"},
                    "answer": {"type": "string"},
                },
                "required": ["stem", "option_A", "option_B", "option_C", "option_D", "answer"],
                "additionalProperties": false,
            }),
        ))
    }

    fn parse_question(response: &str) -> ScqResult<Question> {
        let map = repair::parse_object(response)?;
        let question: Question = serde_json::from_value(Value::Object(map))
            .map_err(|e| ScqError::Llm(wastepro_llm::LlmError::InvalidResponse(e.to_string())))?;
        if question.stem.trim().is_empty() {
            return Err(ScqError::Llm(wastepro_llm::LlmError::InvalidResponse(
                "empty stem".into(),
            )));
        }
        Ok(question)
    }

    async fn evaluate(
        &self,
        agent: &AgentHandle,
        criteria: &QuestionCriteria,
        question: &Question,
    ) -> ScqResult<FeatureVector> {
        let reply = agent
            .publish_sync(
                evaluator::TOPIC_EVALUATE,
                json!({
                    "question_criteria": criteria,
                    "question": question,
                }),
                EVALUATE_TIMEOUT,
            )
            .await?;
        reply
            .get("evaluation")
            .and_then(Value::as_object)
            .and_then(FeatureVector::from_map)
            .ok_or_else(|| {
                ScqError::Llm(wastepro_llm::LlmError::InvalidResponse(
                    "evaluation reply carried no usable feature grades".into(),
                ))
            })
    }
}

/// Map free-form answer spellings onto `A..D`, with `D` as the fallback.
pub fn normalize_answer(raw: &str) -> String {
    let trimmed = raw.trim();
    let upper = trimmed.to_ascii_uppercase();
    let candidate = upper.strip_prefix("OPTION_").unwrap_or(&upper);
    let candidate = candidate.strip_prefix("OPTION ").unwrap_or(candidate);

    match candidate.chars().next() {
        Some(letter @ 'A'..='D') => letter.to_string(),
        Some(digit @ '1'..='4') => {
            let index = digit as u8 - b'1';
            char::from(b'A' + index).to_string()
        }
        _ => "D".to_string(),
    }
}

fn has_cjk(text: &str) -> bool {
    text.chars().any(|c| ('\u{4e00}'..='\u{9fff}').contains(&c))
}

/// Whitespace cleanup per language: CJK text drops all whitespace,
/// everything else is trimmed.
pub fn clean_text(text: &str) -> String {
    if has_cjk(text) {
        text.chars().filter(|c| !c.is_whitespace()).collect()
    } else {
        text.trim().to_string()
    }
}

fn clean_question(question: &mut Question) {
    question.stem = clean_text(&question.stem);
    question.option_a = clean_text(&question.option_a);
    question.option_b = clean_text(&question.option_b);
    question.option_c = clean_text(&question.option_c);
    question.option_d = clean_text(&question.option_d);
}

/// Shuffle the options and re-point the answer letter, preserving the
/// answer text. Questions already answered `D` keep the model's layout.
fn shuffle_options(question: &mut Question, rng: &mut impl rand::Rng) {
    if question.answer == "D" {
        return;
    }
    let answer_text = match question.option(&question.answer) {
        Some(text) => text.to_string(),
        None => return,
    };
    let mut options = [
        question.option_a.clone(),
        question.option_b.clone(),
        question.option_c.clone(),
        question.option_d.clone(),
    ];
    options.shuffle(rng);
    let position = options
        .iter()
        .position(|option| *option == answer_text)
        .unwrap_or(3);
    question.option_a = options[0].clone();
    question.option_b = options[1].clone();
    question.option_c = options[2].clone();
    question.option_d = options[3].clone();
    question.answer = char::from(b'A' + position as u8).to_string();
}

#[async_trait]
impl AgentBehavior for SingleChoiceGenerator {
    fn name(&self) -> &str {
        "scq.generation.wastepro"
    }

    async fn on_activate(&self, agent: &AgentHandle) -> Result<()> {
        if self.chat.get().is_none() {
            let _ = self.chat.set(Arc::new(LlmGateway::new(agent.clone())));
        }
        agent.subscribe(TOPIC_CREATE).await
    }

    async fn on_message(
        &self,
        agent: &AgentHandle,
        _topic: &str,
        parcel: Parcel,
    ) -> Result<Option<Parcel>> {
        let criteria: QuestionCriteria = match serde_json::from_value(parcel.content().clone()) {
            Ok(criteria) => criteria,
            Err(e) => {
                return Ok(Some(Parcel::error(
                    "InvalidRequest",
                    format!("malformed question criteria: {e}"),
                )))
            }
        };
        let target = match difficulty_target(criteria.difficulty) {
            Some(target) => target,
            None => {
                return Ok(Some(Parcel::error(
                    "InvalidRequest",
                    format!("unsupported difficulty: {}", criteria.difficulty),
                )))
            }
        };

        match self.create_question(agent, &criteria, target).await {
            Ok((vector, question)) => {
                let mut enriched: Map<String, Value> =
                    serde_json::to_value(&criteria)
                        .ok()
                        .and_then(|v| v.as_object().cloned())
                        .unwrap_or_default();
                enriched.insert("feature_levels".into(), Value::Object(vector.to_map()));
                enriched.insert("weighted_grade".into(), json!(vector.weighted_grade()));
                Ok(Some(
                    json!({
                        "question_criteria": enriched,
                        "question": question,
                    })
                    .into(),
                ))
            }
            Err(e) => {
                warn!(question_id = %criteria.question_id, error = %e, "generation failed");
                Ok(Some(Parcel::error(e.kind(), e.to_string())))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answer_normalization_table() {
        assert_eq!(normalize_answer("B"), "B");
        assert_eq!(normalize_answer(" c "), "C");
        assert_eq!(normalize_answer("option_A"), "A");
        assert_eq!(normalize_answer("Option B"), "B");
        assert_eq!(normalize_answer("2"), "B");
        assert_eq!(normalize_answer("4"), "D");
        assert_eq!(normalize_answer("A. the first"), "A");
        assert_eq!(normalize_answer("none of these"), "D");
        assert_eq!(normalize_answer(""), "D");
    }

    #[test]
    fn cjk_text_drops_whitespace_latin_text_is_trimmed() {
        assert_eq!(clean_text("廢 棄 物 處理"), "廢棄物處理");
        assert_eq!(clean_text("  bottom ash  "), "bottom ash");
    }

    #[test]
    fn shuffle_preserves_the_answer_text() {
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let mut question = Question {
                stem: "S".into(),
                option_a: "a".into(),
                option_b: "b".into(),
                option_c: "c".into(),
                option_d: "d".into(),
                answer: "B".into(),
            };
            shuffle_options(&mut question, &mut rng);
            assert_eq!(question.option(&question.answer), Some("b"));
        }
    }

    #[test]
    fn answer_d_keeps_layout() {
        let mut question = Question {
            stem: "S".into(),
            option_a: "a".into(),
            option_b: "b".into(),
            option_c: "c".into(),
            option_d: "d".into(),
            answer: "D".into(),
        };
        shuffle_options(&mut question, &mut rand::thread_rng());
        assert_eq!(question.option_a, "a");
        assert_eq!(question.answer, "D");
    }

    #[test]
    fn placeholder_is_well_formed() {
        let question = Question::error_placeholder();
        assert!(question.stem.starts_with("【系統錯誤】"));
        assert_eq!(question.answer, "D");
    }

    #[test]
    fn question_wire_keys_are_exact() {
        let question = Question {
            stem: "S".into(),
            option_a: "a".into(),
            option_b: "b".into(),
            option_c: "c".into(),
            option_d: "d".into(),
            answer: "B".into(),
        };
        let value = serde_json::to_value(&question).unwrap();
        assert_eq!(value["option_A"], json!("a"));
        assert_eq!(value["option_D"], json!("d"));
    }
}
