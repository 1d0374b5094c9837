//! LLM-driven fact/concept extraction and deterministic triplet assembly.
//!
//! A page of text goes through four model-mediated steps — fact listing,
//! concept clustering, fact-to-fact relation extraction, and alias lookup —
//! followed by deterministic assembly into graph triplets along the page's
//! section path. Facts the clustering step cannot place are collected
//! under a synthetic `others` concept so no fact node is left without an
//! `is_a` edge.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use wastepro_kg::{NodeKind, NodeSpec, Triplet};
use wastepro_llm::{repair, ChatClient, LlmError, PromptRequest};

use crate::error::RetrievalResult;

/// Name of the synthetic concept for unplaced facts.
pub const ORPHAN_CONCEPT: &str = "others";

/// Extra clustering passes for facts the first pass left unplaced.
const CLUSTER_RETRY_PASSES: usize = 2;

pub struct FactConceptExtractor {
    chat: Arc<dyn ChatClient>,
    with_aliases: bool,
}

impl FactConceptExtractor {
    pub fn new(chat: Arc<dyn ChatClient>) -> Self {
        Self {
            chat,
            with_aliases: true,
        }
    }

    /// Skip the alias lookup step.
    pub fn without_aliases(mut self) -> Self {
        self.with_aliases = false;
        self
    }

    /// Extract a page into triplets for the deepest matching section path.
    pub async fn extract(
        &self,
        page_text: &str,
        section_path: &[String],
        meta: Option<Value>,
    ) -> RetrievalResult<Vec<Triplet>> {
        if page_text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let mut facts = self.identify_facts(page_text).await?;
        let mut hierarchy = self.cluster_concepts(&facts, page_text).await?;

        let pairs = self.relate_facts(&facts, page_text).await?;
        let known: HashSet<&str> = facts.iter().map(String::as_str).collect();
        let discovered: Vec<String> = pairs
            .iter()
            .flat_map(|[start, _, end]| [start, end])
            .filter(|name| !known.contains(name.as_str()))
            .cloned()
            .collect();
        if !discovered.is_empty() {
            debug!(count = discovered.len(), "clustering newly discovered facts");
            let extra = self.cluster_concepts(&discovered, page_text).await?;
            merge_hierarchy(&mut hierarchy, extra);
            facts.extend(dedupe(discovered));
        }

        bind_orphans(&mut hierarchy, &facts);

        let aliases = if self.with_aliases {
            let mut keys: Vec<String> = facts.clone();
            keys.extend(hierarchy.iter().map(|(concept, _)| concept.clone()));
            self.fetch_aliases(&keys).await
        } else {
            HashMap::new()
        };

        Ok(assemble_triplets(
            section_path,
            meta,
            &hierarchy,
            &pairs,
            &aliases,
        ))
    }

    /// Step 1: a comma-separated list of the page's entities.
    async fn identify_facts(&self, page_text: &str) -> RetrievalResult<Vec<String>> {
        let prompt = format!(
            "List every entity that can be found in the context below: nouns, \
             noun phrases, gerunds, quantities with their units, and the items \
             of parenthesized lists. Reply with one comma-separated list and \
             nothing else.\n# context:\n{page_text}"
        );
        let response = self
            .chat
            .chat(PromptRequest::from_prompt(prompt))
            .await?;

        // Some models insist on a JSON array; accept either shape.
        let items: Vec<String> = match repair::parse_value(&response) {
            Ok(Value::Array(values)) => values
                .into_iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => response
                .split([',', '\n'])
                .map(|item| item.trim().trim_matches(['"', '[', ']', '-']).trim())
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect(),
        };
        Ok(dedupe(items))
    }

    /// Step 2: cluster facts under concepts, recursing on whatever the
    /// model leaves out.
    async fn cluster_concepts(
        &self,
        facts: &[String],
        page_text: &str,
    ) -> RetrievalResult<Vec<(String, Vec<String>)>> {
        if facts.is_empty() {
            return Ok(Vec::new());
        }

        let mut hierarchy: Vec<(String, Vec<String>)> = Vec::new();
        let mut remaining: Vec<String> = facts.to_vec();

        for _ in 0..=CLUSTER_RETRY_PASSES {
            if remaining.is_empty() {
                break;
            }
            let prompt = format!(
                "Group each entity below under a higher-level concept. Every \
                 entity must appear under exactly one concept. Reply with a \
                 single JSON object mapping each concept name to the array of \
                 its entities, and nothing else.\n# entities:\n{}\n# context:\n{page_text}",
                serde_json::to_string(&remaining).unwrap_or_default()
            );
            let response = self
                .chat
                .chat(PromptRequest::from_prompt(prompt))
                .await?;
            let parsed = repair::parse_object(&response)?;

            let wanted: HashSet<String> = remaining.iter().cloned().collect();
            let mut placed = HashSet::new();
            for (concept, members) in parsed {
                let members: Vec<String> = members
                    .as_array()
                    .map(|values| {
                        values
                            .iter()
                            .filter_map(|v| v.as_str().map(str::to_string))
                            .filter(|name| wanted.contains(name))
                            .collect()
                    })
                    .unwrap_or_default();
                if members.is_empty() {
                    continue;
                }
                placed.extend(members.iter().cloned());
                merge_entry(&mut hierarchy, concept, members);
            }
            remaining.retain(|fact| !placed.contains(fact));
        }

        if !remaining.is_empty() {
            debug!(count = remaining.len(), "facts left for the orphan concept");
            merge_entry(&mut hierarchy, ORPHAN_CONCEPT.to_string(), remaining);
        }
        Ok(hierarchy)
    }

    /// Step 3: fact-to-fact relations as `[start, relation, end]` triples.
    async fn relate_facts(
        &self,
        facts: &[String],
        page_text: &str,
    ) -> RetrievalResult<Vec<[String; 3]>> {
        if facts.is_empty() {
            return Ok(Vec::new());
        }
        let prompt = format!(
            "# entities: {}\n# context: {page_text}\nThese entities were \
             extracted from the context above. Extract the relationships \
             between them as a JSON array of three-element arrays \
             [start_entity, relation, end_entity], and nothing else.",
            serde_json::to_string(facts).unwrap_or_default()
        );
        let response = self
            .chat
            .chat(PromptRequest::from_prompt(prompt))
            .await?;
        let parsed = repair::parse_value(&response)?;

        let mut pairs = Vec::new();
        if let Value::Array(items) = parsed {
            for item in items {
                let fields: Option<Vec<String>> = item.as_array().map(|values| {
                    values
                        .iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect()
                });
                match fields {
                    Some(fields) if fields.len() == 3 => {
                        pairs.push([fields[0].clone(), fields[1].clone(), fields[2].clone()]);
                    }
                    _ => warn!(triple = %item, "skipping malformed fact relation"),
                }
            }
        }
        Ok(pairs)
    }

    /// Step 4: English aliases per term; failures degrade to no aliases.
    async fn fetch_aliases(&self, keys: &[String]) -> HashMap<String, Vec<String>> {
        if keys.is_empty() {
            return HashMap::new();
        }
        let prompt = format!(
            "Provide English aliases for each item in the array below. Reply \
             with a single JSON object mapping every item to an array of \
             aliases, and nothing else.\n# array:\n{}",
            serde_json::to_string(keys).unwrap_or_default()
        );
        let response = match self.chat.chat(PromptRequest::from_prompt(prompt)).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "alias lookup failed");
                return HashMap::new();
            }
        };
        match repair::parse_object(&response) {
            Ok(map) => map
                .into_iter()
                .filter_map(|(key, value)| {
                    let aliases: Vec<String> = value
                        .as_array()?
                        .iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect();
                    Some((key, aliases))
                })
                .collect(),
            Err(LlmError::InvalidResponse(message)) => {
                warn!(%message, "alias response unusable");
                HashMap::new()
            }
            Err(_) => HashMap::new(),
        }
    }
}

fn dedupe(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

fn merge_entry(hierarchy: &mut Vec<(String, Vec<String>)>, concept: String, members: Vec<String>) {
    match hierarchy.iter_mut().find(|(name, _)| *name == concept) {
        Some((_, existing)) => {
            for member in members {
                if !existing.contains(&member) {
                    existing.push(member);
                }
            }
        }
        None => hierarchy.push((concept, members)),
    }
}

fn merge_hierarchy(
    hierarchy: &mut Vec<(String, Vec<String>)>,
    extra: Vec<(String, Vec<String>)>,
) {
    for (concept, members) in extra {
        merge_entry(hierarchy, concept, members);
    }
}

/// Any fact missing from the hierarchy lands under `others`.
fn bind_orphans(hierarchy: &mut Vec<(String, Vec<String>)>, facts: &[String]) {
    let placed: HashSet<&str> = hierarchy
        .iter()
        .flat_map(|(_, members)| members.iter().map(String::as_str))
        .collect();
    let orphans: Vec<String> = facts
        .iter()
        .filter(|fact| !placed.contains(fact.as_str()))
        .cloned()
        .collect();
    if !orphans.is_empty() {
        merge_entry(hierarchy, ORPHAN_CONCEPT.to_string(), orphans);
    }
}

/// Deterministic assembly of the page's triplets.
///
/// Section chain first (`part_of`, with the path root as the document
/// node), then concept placement (`include_in` to the deepest path
/// element), fact classification (`is_a`), and finally free-form
/// fact-to-fact relations.
pub fn assemble_triplets(
    section_path: &[String],
    meta: Option<Value>,
    hierarchy: &[(String, Vec<String>)],
    fact_pairs: &[[String; 3]],
    aliases: &HashMap<String, Vec<String>>,
) -> Vec<Triplet> {
    let alias_of = |name: &str| aliases.get(name).cloned().unwrap_or_default();
    let mut triplets = Vec::new();

    for i in 0..section_path.len().saturating_sub(1) {
        let parent = if i == 0 {
            let mut doc = NodeSpec::new(NodeKind::Document, section_path[0].clone());
            if let Some(meta) = &meta {
                doc = doc.with_meta(meta.clone());
            }
            doc
        } else {
            NodeSpec::new(NodeKind::Structure, section_path[i].clone())
        };
        triplets.push(Triplet::new(
            NodeSpec::new(NodeKind::Structure, section_path[i + 1].clone()),
            "part_of",
            parent,
        ));
    }

    let deepest = match section_path.last() {
        Some(name) => name.clone(),
        None => return triplets,
    };
    let target_kind = if section_path.len() == 1 {
        NodeKind::Document
    } else {
        NodeKind::Structure
    };
    let mut target = NodeSpec::new(target_kind, deepest);
    if target_kind == NodeKind::Document {
        if let Some(meta) = &meta {
            target = target.with_meta(meta.clone());
        }
    }

    for (concept, members) in hierarchy {
        let concept_spec =
            NodeSpec::new(NodeKind::Concept, concept.clone()).with_aliases(alias_of(concept));
        triplets.push(Triplet::new(
            concept_spec.clone(),
            "include_in",
            target.clone(),
        ));
        for member in members {
            triplets.push(Triplet::new(
                NodeSpec::new(NodeKind::Fact, member.clone()).with_aliases(alias_of(member)),
                "is_a",
                concept_spec.clone(),
            ));
        }
    }

    for [start, relation, end] in fact_pairs {
        triplets.push(Triplet::new(
            NodeSpec::new(NodeKind::Fact, start.clone()),
            relation.clone(),
            NodeSpec::new(NodeKind::Fact, end.clone()),
        ));
    }

    triplets
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use wastepro_llm::LlmResult;

    /// Replays scripted responses in call order.
    struct ScriptedChat {
        responses: Mutex<Vec<String>>,
    }

    impl ScriptedChat {
        fn new(responses: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.iter().rev().map(|s| s.to_string()).collect()),
            })
        }
    }

    #[async_trait]
    impl ChatClient for ScriptedChat {
        async fn chat(&self, _request: PromptRequest) -> LlmResult<String> {
            Ok(self
                .responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| "{}".to_string()))
        }
    }

    fn path(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn empty_page_yields_no_triplets() {
        let chat = ScriptedChat::new(&[]);
        let extractor = FactConceptExtractor::new(chat);
        let triplets = extractor
            .extract("   ", &path(&["Doc"]), None)
            .await
            .unwrap();
        assert!(triplets.is_empty());
    }

    #[tokio::test]
    async fn full_page_extraction_assembles_all_relation_kinds() {
        let chat = ScriptedChat::new(&[
            // facts
            "cat, mat",
            // concept clustering
            r#"{"animal": ["cat"], "object": ["mat"]}"#,
            // fact-fact relations
            r#"[["cat", "sits on", "mat"]]"#,
            // aliases
            r#"{"cat": ["feline"], "animal": ["creature"]}"#,
        ]);
        let extractor = FactConceptExtractor::new(chat);
        let triplets = extractor
            .extract(
                "The cat is on the mat.",
                &path(&["Doc", "ch1"]),
                Some(serde_json::json!({"title": "Doc"})),
            )
            .await
            .unwrap();

        // part_of: ch1 -> Doc (document, carrying meta)
        let part_of: Vec<_> = triplets
            .iter()
            .filter(|t| t.1.name == "part_of")
            .collect();
        assert_eq!(part_of.len(), 1);
        assert_eq!(part_of[0].0.name, "ch1");
        assert_eq!(part_of[0].2.kind, NodeKind::Document);
        assert!(part_of[0].2.meta.is_some());

        // include_in: both concepts to the deepest structure
        let include_in: Vec<_> = triplets
            .iter()
            .filter(|t| t.1.name == "include_in")
            .collect();
        assert_eq!(include_in.len(), 2);
        assert!(include_in
            .iter()
            .all(|t| t.2.kind == NodeKind::Structure && t.2.name == "ch1"));

        // is_a with aliases threaded through
        let is_a: Vec<_> = triplets.iter().filter(|t| t.1.name == "is_a").collect();
        assert_eq!(is_a.len(), 2);
        let cat = is_a.iter().find(|t| t.0.name == "cat").unwrap();
        assert_eq!(cat.0.aliases, vec!["feline".to_string()]);
        assert_eq!(cat.2.aliases, vec!["creature".to_string()]);

        // free-form fact relation
        assert!(triplets
            .iter()
            .any(|t| t.1.name == "sits on" && t.0.name == "cat" && t.2.name == "mat"));
    }

    #[tokio::test]
    async fn unplaced_facts_land_under_others() {
        let chat = ScriptedChat::new(&[
            "cat, mat, dog",
            // First clustering pass places only the cat.
            r#"{"animal": ["cat"]}"#,
            // Both retry passes still ignore the stragglers.
            r#"{}"#,
            r#"{}"#,
            // No relations, no aliases.
            "[]",
            "{}",
        ]);
        let extractor = FactConceptExtractor::new(chat);
        let triplets = extractor
            .extract("text", &path(&["Doc"]), None)
            .await
            .unwrap();

        let others: Vec<_> = triplets
            .iter()
            .filter(|t| t.1.name == "is_a" && t.2.name == ORPHAN_CONCEPT)
            .map(|t| t.0.name.clone())
            .collect();
        assert_eq!(others, vec!["mat".to_string(), "dog".to_string()]);

        // The synthetic concept binds like any other concept.
        assert!(triplets
            .iter()
            .any(|t| t.0.name == ORPHAN_CONCEPT && t.1.name == "include_in"));
    }

    #[tokio::test]
    async fn discovered_relation_facts_get_clustered() {
        let chat = ScriptedChat::new(&[
            "cat",
            r#"{"animal": ["cat"]}"#,
            // The relation step mentions a fact the list step missed.
            r#"[["cat", "chases", "mouse"]]"#,
            // Clustering pass for the newly discovered fact only.
            r#"{"animal": ["mouse"]}"#,
            // aliases
            "{}",
        ]);
        let extractor = FactConceptExtractor::new(chat);
        let triplets = extractor
            .extract("text", &path(&["Doc"]), None)
            .await
            .unwrap();

        assert!(triplets
            .iter()
            .any(|t| t.0.name == "mouse" && t.1.name == "is_a" && t.2.name == "animal"));
    }

    #[tokio::test]
    async fn malformed_relation_triples_are_dropped() {
        let chat = ScriptedChat::new(&[
            "cat, mat",
            r#"{"animal": ["cat"], "object": ["mat"]}"#,
            r#"[["cat", "on"], ["cat", "sits on", "mat"], "junk"]"#,
            "{}",
        ]);
        let extractor = FactConceptExtractor::new(chat);
        let triplets = extractor
            .extract("text", &path(&["Doc"]), None)
            .await
            .unwrap();

        let free_form: Vec<_> = triplets
            .iter()
            .filter(|t| t.1.name != "is_a" && t.1.name != "include_in" && t.1.name != "part_of")
            .collect();
        assert_eq!(free_form.len(), 1);
        assert_eq!(free_form[0].1.name, "sits on");
    }

    #[test]
    fn section_chain_links_every_level() {
        let triplets = assemble_triplets(
            &path(&["Doc", "ch1", "ch1-1"]),
            None,
            &[],
            &[],
            &HashMap::new(),
        );
        assert_eq!(triplets.len(), 2);
        assert_eq!(triplets[0].0.name, "ch1");
        assert_eq!(triplets[0].2.kind, NodeKind::Document);
        assert_eq!(triplets[1].0.name, "ch1-1");
        assert_eq!(triplets[1].2.kind, NodeKind::Structure);
        assert_eq!(triplets[1].2.name, "ch1");
    }
}
