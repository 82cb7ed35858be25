//! Weighted score fusion.
//!
//! Each source is normalized to `[0, 1]` on its own, then
//! `fused = w_lex * lex + w_vec * vec` with a missing source counting as 0.
//! Output is sorted by fused score descending, ties by `doc_id` ascending, and
//! truncated to `top_k`. An empty vector list runs through exactly the same
//! code, which makes the lexical-only ranking a special case of the general one.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use askdb_core::config::{FusionSettings, Normalization};
use askdb_core::types::{DocId, FusedHit, Meta, SearchHit, SourceKind};

#[derive(Debug, Clone)]
pub struct ResultFuser {
    lexical_weight: f32,
    vector_weight: f32,
    normalization: Normalization,
}

impl Default for ResultFuser {
    fn default() -> Self { Self::new(&FusionSettings::default()) }
}

#[derive(Default)]
struct Candidate {
    lexical: f32,
    vector: f32,
    sources: BTreeSet<SourceKind>,
    snippet: String,
    text: String,
    metadata: Meta,
}

impl ResultFuser {
    pub fn new(settings: &FusionSettings) -> Self {
        Self {
            lexical_weight: settings.lexical_weight,
            vector_weight: settings.vector_weight,
            normalization: settings.normalization,
        }
    }

    pub fn fuse(&self, lexical: &[SearchHit], vector: &[SearchHit], top_k: usize) -> Vec<FusedHit> {
        let mut candidates: BTreeMap<DocId, Candidate> = BTreeMap::new();
        for (kind, hits) in [(SourceKind::Lexical, lexical), (SourceKind::Vector, vector)] {
            for (hit, normalized) in self.normalize(kind, hits) {
                let c = candidates.entry(hit.doc_id.clone()).or_default();
                match kind {
                    SourceKind::Lexical => c.lexical = normalized,
                    SourceKind::Vector => c.vector = normalized,
                }
                if c.sources.is_empty() {
                    c.snippet = hit.snippet.clone();
                    c.text = hit.passage().to_string();
                }
                for (k, v) in &hit.metadata {
                    c.metadata.entry(k.clone()).or_insert_with(|| v.clone());
                }
                c.sources.insert(kind);
            }
        }

        let mut fused: Vec<FusedHit> = candidates
            .into_iter()
            .map(|(doc_id, c)| FusedHit {
                doc_id,
                fused_score: self.lexical_weight * c.lexical + self.vector_weight * c.vector,
                contributing_sources: c.sources,
                snippet: c.snippet,
                text: c.text,
                metadata: c.metadata,
            })
            .collect();
        fused.sort_by(|a, b| b.fused_score.total_cmp(&a.fused_score).then_with(|| a.doc_id.cmp(&b.doc_id)));
        fused.truncate(top_k);
        fused
    }

    /// One entry per distinct doc id (best raw score wins), paired with its
    /// normalized score. Non-finite scores are ignored.
    fn normalize<'a>(&self, kind: SourceKind, hits: &'a [SearchHit]) -> Vec<(&'a SearchHit, f32)> {
        let mut best: HashMap<&str, &SearchHit> = HashMap::new();
        let mut order: Vec<&str> = Vec::new();
        for hit in hits.iter().filter(|h| h.score.is_finite()) {
            let id = hit.doc_id.as_str();
            let replace = match best.get(id) {
                Some(prev) => hit.score > prev.score,
                None => {
                    order.push(id);
                    true
                }
            };
            if replace {
                best.insert(id, hit);
            }
        }
        let unique: Vec<&SearchHit> = order.into_iter().filter_map(|id| best.get(id).copied()).collect();
        let (min, max) = match self.normalization {
            Normalization::PerRequest => unique.iter().fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), h| (lo.min(h.score), hi.max(h.score))),
            Normalization::Fixed { lexical_min, lexical_max, vector_min, vector_max } => match kind {
                SourceKind::Lexical => (lexical_min, lexical_max),
                SourceKind::Vector => (vector_min, vector_max),
            },
        };
        let range = max - min;
        unique
            .into_iter()
            .map(|h| {
                // A single hit, or all hits scoring the same, are all top of their list.
                let n = if range > f32::EPSILON { ((h.score - min) / range).clamp(0.0, 1.0) } else { 1.0 };
                (h, n)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use askdb_core::types::META_URL;

    fn hit(id: &str, score: f32, source: SourceKind) -> SearchHit {
        let mut metadata = Meta::new();
        metadata.insert(META_URL.into(), format!("https://example.org/{id}"));
        SearchHit { doc_id: id.into(), score, source, snippet: format!("snippet {id}"), metadata }
    }

    fn ids(hits: &[FusedHit]) -> Vec<&str> { hits.iter().map(|h| h.doc_id.as_str()).collect() }

    #[test]
    fn overlapping_hits_combine_both_sources() {
        let fuser = ResultFuser::default();
        let lex = vec![hit("a", 10.0, SourceKind::Lexical), hit("b", 5.0, SourceKind::Lexical), hit("c", 0.0, SourceKind::Lexical)];
        let vec = vec![hit("b", 0.9, SourceKind::Vector), hit("d", 0.1, SourceKind::Vector)];
        let fused = fuser.fuse(&lex, &vec, 10);
        // b: 0.5*0.5 + 0.5*1.0 = 0.75, a: 0.5, d: 0.0, c: 0.0
        assert_eq!(ids(&fused), vec!["b", "a", "c", "d"]);
        assert!((fused[0].fused_score - 0.75).abs() < 1e-6);
        assert_eq!(fused[0].contributing_sources, [SourceKind::Lexical, SourceKind::Vector].into_iter().collect());
        assert_eq!(fused[0].url(), "https://example.org/b");
        assert_eq!(fused[0].snippet, "snippet b");
    }

    #[test]
    fn single_hit_normalizes_to_one() {
        let fused = ResultFuser::default().fuse(&[hit("a", 3.2, SourceKind::Lexical)], &[], 5);
        assert_eq!(fused.len(), 1);
        assert!((fused[0].fused_score - 0.5).abs() < 1e-6);
    }

    #[test]
    fn duplicate_doc_in_one_list_keeps_best_score() {
        let lex = vec![hit("a", 1.0, SourceKind::Lexical), hit("a", 4.0, SourceKind::Lexical), hit("b", 2.0, SourceKind::Lexical)];
        let fused = ResultFuser::default().fuse(&lex, &[], 5);
        assert_eq!(ids(&fused), vec!["a", "b"]);
    }

    #[test]
    fn fixed_normalization_clamps() {
        let settings = FusionSettings {
            normalization: Normalization::Fixed { lexical_min: 0.0, lexical_max: 10.0, vector_min: 0.0, vector_max: 1.0 },
            ..FusionSettings::default()
        };
        let fused = ResultFuser::new(&settings).fuse(&[hit("a", 25.0, SourceKind::Lexical), hit("b", 5.0, SourceKind::Lexical)], &[], 5);
        assert!((fused[0].fused_score - 0.5).abs() < 1e-6);
        assert!((fused[1].fused_score - 0.25).abs() < 1e-6);
    }

    #[test]
    fn non_finite_scores_are_dropped() {
        let fused = ResultFuser::default().fuse(&[hit("a", f32::NAN, SourceKind::Lexical), hit("b", 1.0, SourceKind::Lexical)], &[], 5);
        assert_eq!(ids(&fused), vec!["b"]);
    }
}
