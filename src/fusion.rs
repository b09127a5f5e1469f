//! Reciprocal Rank Fusion.
//!
//! Combines the ranked lists of independent retrieval channels into one
//! ranking. Each channel contributes `weight / (k + rank)` per document
//! (1-based rank, absent documents contribute nothing), so a document ranked
//! consistently well across channels outranks one that scores well in a
//! single channel only. Pure and synchronous: callers fetch the channel
//! lists first, then fuse.

use std::collections::{BTreeMap, HashMap};

/// Default damping constant.
pub const DEFAULT_RRF_K: f64 = 60.0;

/// Per-call fusion parameters.
#[derive(Debug, Clone)]
pub struct FusionOptions {
    /// Damping constant added to every rank
    pub k: f64,
    /// Per-channel weights; channels not listed weigh 1.0
    pub weights: HashMap<String, f64>,
}

impl Default for FusionOptions {
    fn default() -> Self {
        Self {
            k: DEFAULT_RRF_K,
            weights: HashMap::new(),
        }
    }
}

impl FusionOptions {
    pub fn with_weight(mut self, channel: &str, weight: f64) -> Self {
        self.weights.insert(channel.to_string(), weight);
        self
    }

    fn weight(&self, channel: &str) -> f64 {
        self.weights.get(channel).copied().unwrap_or(1.0)
    }
}

/// One document in the fused ranking.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedItem {
    pub doc_id: String,
    pub fused_score: f64,
    /// Best (lowest) 1-based rank across all channels, used as tie breaker
    pub best_rank: usize,
    /// 1-based rank per channel the document appeared in
    pub channel_ranks: BTreeMap<String, usize>,
}

/// Fuse per-channel ranked document lists into one global ranking.
///
/// Output order is exactly reproducible: fused score descending, ties broken
/// by best single-channel rank, then by document id.
pub fn fuse(channels: &[(String, Vec<String>)], opts: &FusionOptions) -> Vec<FusedItem> {
    let mut items: BTreeMap<String, FusedItem> = BTreeMap::new();

    for (channel, ranked) in channels {
        let weight = opts.weight(channel);
        for (index, doc_id) in ranked.iter().enumerate() {
            let rank = index + 1;
            let contribution = weight / (opts.k + rank as f64);
            let item = items.entry(doc_id.clone()).or_insert_with(|| FusedItem {
                doc_id: doc_id.clone(),
                fused_score: 0.0,
                best_rank: rank,
                channel_ranks: BTreeMap::new(),
            });
            item.fused_score += contribution;
            item.best_rank = item.best_rank.min(rank);
            item.channel_ranks.insert(channel.clone(), rank);
        }
    }

    let mut fused: Vec<FusedItem> = items.into_values().collect();
    fused.sort_by(|a, b| {
        b.fused_score
            .total_cmp(&a.fused_score)
            .then_with(|| a.best_rank.cmp(&b.best_rank))
            .then_with(|| a.doc_id.cmp(&b.doc_id))
    });
    fused
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(name: &str, docs: &[&str]) -> (String, Vec<String>) {
        (
            name.to_string(),
            docs.iter().map(|d| d.to_string()).collect(),
        )
    }

    fn score_of(fused: &[FusedItem], doc: &str) -> f64 {
        fused
            .iter()
            .find(|item| item.doc_id == doc)
            .map(|item| item.fused_score)
            .unwrap_or(0.0)
    }

    #[test]
    fn concrete_three_channel_scenario() {
        let channels = vec![
            channel("vector", &["doc1", "doc2", "doc3"]),
            channel("graph", &["doc1", "doc4", "doc2"]),
            channel("keyword", &["doc5", "doc1", "doc3"]),
        ];
        let fused = fuse(&channels, &FusionOptions::default());

        assert_eq!(fused[0].doc_id, "doc1");
        let expected = 1.0 / 61.0 + 1.0 / 61.0 + 1.0 / 62.0;
        assert!((score_of(&fused, "doc1") - expected).abs() < 1e-12);
    }

    #[test]
    fn top_rank_in_every_channel_gives_three_over_sixty_one() {
        let channels = vec![
            channel("vector", &["doc1"]),
            channel("graph", &["doc1"]),
            channel("keyword", &["doc1"]),
        ];
        let fused = fuse(&channels, &FusionOptions::default());

        let expected = 3.0 / 61.0;
        assert!((fused[0].fused_score - expected).abs() < 1e-12);
        assert!(format!("{:.5}", fused[0].fused_score).starts_with("0.04918"));
    }

    #[test]
    fn consensus_beats_single_channel_winner() {
        // X: rank 1 in two channels, rank 3 in the third.
        // Y: rank 1 in one channel, absent elsewhere.
        for k in [1.0, 10.0, 60.0, 500.0] {
            let channels = vec![
                channel("vector", &["x", "y2", "y3"]),
                channel("graph", &["x", "other"]),
                channel("keyword", &["y", "other", "x"]),
            ];
            let opts = FusionOptions {
                k,
                ..Default::default()
            };
            let fused = fuse(&channels, &opts);
            assert!(
                score_of(&fused, "x") > score_of(&fused, "y"),
                "consensus failed for k={k}"
            );
        }
    }

    #[test]
    fn absent_documents_contribute_nothing() {
        let channels = vec![
            channel("vector", &["a", "b"]),
            channel("graph", &["a"]),
        ];
        let fused = fuse(&channels, &FusionOptions::default());

        let b = fused.iter().find(|i| i.doc_id == "b").unwrap();
        assert_eq!(b.channel_ranks.len(), 1);
        assert!((b.fused_score - 1.0 / 62.0).abs() < 1e-12);
    }

    #[test]
    fn raising_a_channel_weight_boosts_only_its_documents() {
        let channels = vec![
            channel("vector", &["a", "b"]),
            channel("keyword", &["c"]),
        ];

        let base = fuse(&channels, &FusionOptions::default());
        let boosted = fuse(
            &channels,
            &FusionOptions::default().with_weight("vector", 2.0),
        );

        assert!(score_of(&boosted, "a") > score_of(&base, "a"));
        assert!(score_of(&boosted, "b") > score_of(&base, "b"));
        assert_eq!(score_of(&boosted, "c"), score_of(&base, "c"));
    }

    #[test]
    fn zero_weight_silences_a_channel() {
        let channels = vec![
            channel("vector", &["a"]),
            channel("keyword", &["b"]),
        ];
        let fused = fuse(
            &channels,
            &FusionOptions::default().with_weight("keyword", 0.0),
        );

        assert_eq!(fused[0].doc_id, "a");
        assert_eq!(score_of(&fused, "b"), 0.0);
    }

    #[test]
    fn ties_break_by_best_rank_then_doc_id() {
        // Both docs get the same fused score from symmetric positions.
        let channels = vec![
            channel("vector", &["a", "b"]),
            channel("graph", &["b", "a"]),
        ];
        let fused = fuse(&channels, &FusionOptions::default());

        assert_eq!(fused[0].fused_score, fused[1].fused_score);
        assert_eq!(fused[0].best_rank, 1);
        // Equal best ranks as well, so doc id decides.
        assert_eq!(fused[0].doc_id, "a");
        assert_eq!(fused[1].doc_id, "b");
    }

    #[test]
    fn output_is_reproducible() {
        let channels = vec![
            channel("vector", &["d3", "d1", "d2"]),
            channel("graph", &["d2", "d3"]),
            channel("keyword", &["d1", "d4"]),
        ];
        let first = fuse(&channels, &FusionOptions::default());
        let second = fuse(&channels, &FusionOptions::default());
        assert_eq!(first, second);
    }

    #[test]
    fn empty_input_fuses_to_nothing() {
        assert!(fuse(&[], &FusionOptions::default()).is_empty());
        let empty_channels = vec![channel("vector", &[])];
        assert!(fuse(&empty_channels, &FusionOptions::default()).is_empty());
    }

    #[test]
    fn k_is_overridable_per_call() {
        let channels = vec![channel("vector", &["a"])];
        let opts = FusionOptions {
            k: 0.5,
            ..Default::default()
        };
        let fused = fuse(&channels, &opts);
        assert!((fused[0].fused_score - 1.0 / 1.5).abs() < 1e-12);
    }

    #[test]
    fn duplicate_listing_in_one_channel_keeps_best_rank() {
        let channels = vec![channel("vector", &["a", "a"])];
        let fused = fuse(&channels, &FusionOptions::default());
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].best_rank, 1);
    }
}
