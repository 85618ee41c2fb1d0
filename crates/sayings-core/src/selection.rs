use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::{Category, Saying, SayingId};

/// Read access the selection engine needs from a catalog.
pub trait SayingSource {
    /// Sayings in `category`, in catalog storage order.
    fn list_by_category(&self, category: Category) -> Vec<&Saying>;
}

impl SayingSource for [Saying] {
    fn list_by_category(&self, category: Category) -> Vec<&Saying> {
        self.iter().filter(|saying| saying.category == category).collect()
    }
}

impl SayingSource for Vec<Saying> {
    fn list_by_category(&self, category: Category) -> Vec<&Saying> {
        self.as_slice().list_by_category(category)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub struct CategoryStats {
    pub category: Category,
    pub total: usize,
    pub shown: usize,
    pub remaining: usize,
    pub percent_complete: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub struct OverallStats {
    pub total_sayings: usize,
    pub total_shown: usize,
    pub percentage_explored: usize,
    pub categories_with_progress: usize,
}

/// Serves random sayings per category without repeating one until the
/// whole category has been shown, then starts a new cycle.
///
/// History is kept per category in a fixed table and lives only as long as
/// the engine.
#[derive(Debug, Clone)]
pub struct SelectionEngine<R = StdRng> {
    history: [Vec<SayingId>; Category::COUNT],
    rng: R,
}

impl SelectionEngine<StdRng> {
    #[must_use]
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }
}

impl Default for SelectionEngine<StdRng> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Rng> SelectionEngine<R> {
    pub fn with_rng(rng: R) -> Self {
        Self { history: Default::default(), rng }
    }

    /// Pick the next saying for `category`.
    ///
    /// Returns `None` only when the category has no sayings; history is not
    /// touched in that case. When every saying has already been shown the
    /// category history is cleared before picking.
    pub fn next<'a, S>(&mut self, source: &'a S, category: Category) -> Option<&'a Saying>
    where
        S: SayingSource + ?Sized,
    {
        let candidates = source.list_by_category(category);
        if candidates.is_empty() {
            tracing::debug!(category = %category, "no sayings in category");
            return None;
        }
        let total = candidates.len();

        let history = &mut self.history[category.index()];
        if history.len() >= total {
            tracing::info!(
                category = %category,
                "resetting category history: all sayings have been shown"
            );
            history.clear();
        }

        let mut pool = candidates
            .iter()
            .copied()
            .filter(|saying| !history.contains(&saying.id))
            .collect::<Vec<_>>();
        if pool.is_empty() {
            tracing::warn!(category = %category, "empty selection pool; using full category");
            pool = candidates;
        }

        let picked = pool[self.rng.gen_range(0..pool.len())];
        history.push(picked.id.clone());

        tracing::debug!(
            category = %category,
            id = %picked.id,
            shown = history.len(),
            total,
            "selected saying"
        );
        Some(picked)
    }

    pub fn reset_history(&mut self, category: Category) {
        self.history[category.index()].clear();
        tracing::info!(category = %category, "reset category history");
    }

    pub fn reset_all(&mut self) {
        for history in &mut self.history {
            history.clear();
        }
        tracing::info!("reset history for all categories");
    }

    /// Ids shown in `category` since its last reset, in selection order.
    #[must_use]
    pub fn history(&self, category: Category) -> &[SayingId] {
        &self.history[category.index()]
    }

    #[must_use]
    pub fn stats<S>(&self, source: &S, category: Category) -> CategoryStats
    where
        S: SayingSource + ?Sized,
    {
        let total = source.list_by_category(category).len();
        let shown = self.history(category).len();
        CategoryStats {
            category,
            total,
            shown,
            remaining: total.saturating_sub(shown),
            percent_complete: rounded_percent(shown, total),
        }
    }

    #[must_use]
    pub fn has_unseen<S>(&self, source: &S, category: Category) -> bool
    where
        S: SayingSource + ?Sized,
    {
        self.stats(source, category).remaining > 0
    }

    #[must_use]
    pub fn overall_stats<S>(&self, source: &S) -> OverallStats
    where
        S: SayingSource + ?Sized,
    {
        let total_sayings: usize =
            Category::ALL.iter().map(|category| source.list_by_category(*category).len()).sum();
        let total_shown: usize = self.history.iter().map(Vec::len).sum();
        OverallStats {
            total_sayings,
            total_shown,
            percentage_explored: rounded_percent(total_shown, total_sayings),
            categories_with_progress: self.history.iter().filter(|ids| !ids.is_empty()).count(),
        }
    }
}

/// `round(100 * part / whole)` with halves rounded up, or 0 for an empty whole.
fn rounded_percent(part: usize, whole: usize) -> usize {
    if whole == 0 {
        return 0;
    }
    (200 * part + whole) / (2 * whole)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use proptest::prelude::*;

    use super::*;

    fn mk_saying(id: &str, category: Category) -> Saying {
        Saying {
            id: SayingId::from(id),
            text: format!("testo {id}"),
            translation: format!("text {id}"),
            category,
            usage_context: "fixture".to_string(),
        }
    }

    fn mk_catalog(counts: [usize; Category::COUNT]) -> Vec<Saying> {
        Category::ALL
            .into_iter()
            .zip(counts)
            .flat_map(|(category, count)| {
                (1..=count).map(move |n| mk_saying(&format!("{category}_{n}"), category))
            })
            .collect()
    }

    fn pick_id(engine: &mut SelectionEngine, catalog: &[Saying], category: Category) -> SayingId {
        match engine.next(catalog, category) {
            Some(saying) => saying.id.clone(),
            None => panic!("category {category} should not be empty"),
        }
    }

    #[test]
    fn three_picks_are_a_permutation_then_fourth_resets() {
        let catalog = mk_catalog([3, 0, 0, 0, 0]);
        let mut engine = SelectionEngine::seeded(7);

        let first_cycle = (0..3)
            .map(|_| pick_id(&mut engine, &catalog, Category::Warm))
            .collect::<BTreeSet<_>>();
        let expected: BTreeSet<SayingId> =
            ["warm_1", "warm_2", "warm_3"].map(SayingId::from).into_iter().collect();
        assert_eq!(first_cycle, expected);

        assert_eq!(
            engine.stats(catalog.as_slice(), Category::Warm),
            CategoryStats {
                category: Category::Warm,
                total: 3,
                shown: 3,
                remaining: 0,
                percent_complete: 100,
            }
        );
        assert!(!engine.has_unseen(catalog.as_slice(), Category::Warm));

        let fourth = pick_id(&mut engine, &catalog, Category::Warm);
        assert!(expected.contains(&fourth));
        assert_eq!(engine.history(Category::Warm), &[fourth]);
        assert_eq!(engine.stats(catalog.as_slice(), Category::Warm).shown, 1);
    }

    #[test]
    fn singleton_category_always_returns_same_saying() {
        let catalog = mk_catalog([0, 0, 1, 0, 0]);
        let mut engine = SelectionEngine::seeded(1);
        for _ in 0..5 {
            assert_eq!(pick_id(&mut engine, &catalog, Category::Formal).as_str(), "formal_1");
            assert_eq!(engine.history(Category::Formal).len(), 1);
        }
    }

    #[test]
    fn empty_category_returns_none_without_touching_history() {
        let catalog = mk_catalog([2, 0, 0, 0, 0]);
        let mut engine = SelectionEngine::seeded(3);
        pick_id(&mut engine, &catalog, Category::Warm);

        assert!(engine.next(catalog.as_slice(), Category::Humorous).is_none());
        assert!(engine.history(Category::Humorous).is_empty());
        assert_eq!(engine.history(Category::Warm).len(), 1);
        assert_eq!(engine.stats(catalog.as_slice(), Category::Humorous).percent_complete, 0);
    }

    #[test]
    fn histories_are_independent_per_category() {
        let catalog = mk_catalog([2, 2, 0, 0, 0]);
        let mut engine = SelectionEngine::seeded(11);
        pick_id(&mut engine, &catalog, Category::Warm);
        pick_id(&mut engine, &catalog, Category::Warm);
        pick_id(&mut engine, &catalog, Category::Sarcastic);

        engine.reset_history(Category::Warm);
        assert!(engine.history(Category::Warm).is_empty());
        assert_eq!(engine.history(Category::Sarcastic).len(), 1);

        engine.reset_all();
        assert!(Category::ALL.iter().all(|category| engine.history(*category).is_empty()));
    }

    #[test]
    fn history_with_removed_ids_resets_instead_of_failing() {
        let mut catalog = mk_catalog([3, 0, 0, 0, 0]);
        let mut engine = SelectionEngine::seeded(5);
        pick_id(&mut engine, &catalog, Category::Warm);
        pick_id(&mut engine, &catalog, Category::Warm);
        catalog.retain(|saying| saying.id.as_str() == "warm_3");

        // Two stale ids against one candidate: exhaustion triggers a reset.
        assert_eq!(pick_id(&mut engine, &catalog, Category::Warm).as_str(), "warm_3");
        assert_eq!(engine.history(Category::Warm).len(), 1);
    }

    #[test]
    fn overall_stats_aggregate_progress() {
        let catalog = mk_catalog([3, 3, 3, 3, 3]);
        let mut engine = SelectionEngine::seeded(9);
        pick_id(&mut engine, &catalog, Category::Warm);
        pick_id(&mut engine, &catalog, Category::Warm);
        pick_id(&mut engine, &catalog, Category::Wise);

        assert_eq!(
            engine.overall_stats(catalog.as_slice()),
            OverallStats {
                total_sayings: 15,
                total_shown: 3,
                percentage_explored: 20,
                categories_with_progress: 2,
            }
        );
    }

    #[test]
    fn percent_rounds_half_up() {
        assert_eq!(rounded_percent(1, 3), 33);
        assert_eq!(rounded_percent(2, 3), 67);
        assert_eq!(rounded_percent(1, 8), 13);
        assert_eq!(rounded_percent(0, 0), 0);
        assert_eq!(rounded_percent(4, 4), 100);
    }

    proptest! {
        #[test]
        fn property_no_repeat_until_exhaustion(seed in any::<u64>(), size in 2_usize..12, cycles in 1_usize..4) {
            let catalog = mk_catalog([0, 0, 0, size, 0]);
            let mut engine = SelectionEngine::seeded(seed);

            for _ in 0..cycles {
                let mut seen = BTreeSet::new();
                for shown in 1..=size {
                    let id = pick_id(&mut engine, &catalog, Category::Humorous);
                    prop_assert!(seen.insert(id), "saying repeated before exhaustion");
                    prop_assert_eq!(engine.history(Category::Humorous).len(), shown);
                }
                prop_assert_eq!(seen.len(), size);
                prop_assert!(!engine.has_unseen(catalog.as_slice(), Category::Humorous));
            }
        }
    }

    proptest! {
        #[test]
        fn property_stats_stay_consistent(seed in any::<u64>(), size in 0_usize..8, picks in 0_usize..20) {
            let catalog = mk_catalog([size, 1, 0, 0, 0]);
            let mut engine = SelectionEngine::seeded(seed);
            for _ in 0..picks {
                let _ = engine.next(catalog.as_slice(), Category::Warm);
            }

            let stats = engine.stats(catalog.as_slice(), Category::Warm);
            prop_assert_eq!(stats.total, size);
            prop_assert!(stats.shown <= stats.total);
            prop_assert_eq!(stats.shown + stats.remaining, stats.total);
            prop_assert!(stats.percent_complete <= 100);
            if size > 0 && picks > 0 {
                prop_assert!(stats.shown >= 1);
            }
        }
    }
}
