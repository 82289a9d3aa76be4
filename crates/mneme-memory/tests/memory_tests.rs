#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, Utc};
    use mneme_core::*;
    use mneme_memory::*;
    use serde_json::json;
    use std::sync::Arc;
    use tokio::sync::watch;
    use uuid::Uuid;

    fn store() -> Arc<SqliteStore> {
        Arc::new(SqliteStore::open_in_memory().unwrap())
    }

    fn shared(store: &Arc<SqliteStore>) -> Arc<dyn RecordStore> {
        store.clone()
    }

    fn days_ago(days: i64) -> DateTime<Utc> {
        Utc::now() - Duration::days(days)
    }

    fn entry(owner: &str, tier: Tier, category: Category, content: &str) -> MemoryEntry {
        MemoryEntry::new(owner, tier, category, content)
    }

    fn no_cancel() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    /// A store whose backend is gone.
    struct UnavailableStore;

    fn offline<T>() -> Result<T> {
        Err(MnemeError::StoreUnavailable("database is locked".into()))
    }

    impl RecordStore for UnavailableStore {
        fn put(&self, _: &MemoryEntry) -> Result<MemoryId> {
            offline()
        }
        fn get(&self, _: MemoryId) -> Result<MemoryEntry> {
            offline()
        }
        fn query(&self, _: &MemoryFilter) -> Result<Vec<MemoryEntry>> {
            offline()
        }
        fn delete(&self, _: MemoryId) -> Result<()> {
            offline()
        }
        fn update_importance_and_access(&self, _: MemoryId, _: &EntryUpdate) -> Result<()> {
            offline()
        }
        fn scan_batch(
            &self,
            _: DateTime<Utc>,
            _: Option<MemoryId>,
            _: usize,
        ) -> Result<Vec<MemoryEntry>> {
            offline()
        }
        fn stats(&self, _: &str) -> Result<MemoryStats> {
            offline()
        }
        fn owners(&self) -> Result<Vec<AgentId>> {
            offline()
        }
    }

    // ── Scorer ─────────────────────────────────────────────────

    mod scorer {
        use super::*;
        use mneme_config::ScoringConfig;

        #[test]
        fn test_default_table() {
            let scorer = ImportanceScorer::default();
            assert!(approx(scorer.score(Category::Task, false, false, false), 0.7));
            assert!(approx(scorer.score(Category::Task, true, false, false), 0.4));
            assert!(approx(scorer.score(Category::Knowledge, true, true, false), 0.9));
            assert!(approx(scorer.score(Category::Solution, true, false, true), 0.8));
            assert!(approx(scorer.score(Category::Conversation, true, false, false), 0.3));
        }

        #[test]
        fn test_semantic_without_signal_scores_as_episode() {
            let scorer = ImportanceScorer::default();
            assert!(approx(scorer.score(Category::Knowledge, true, false, true), 0.4));
            assert!(approx(scorer.score(Category::Solution, false, true, false), 0.7));
        }

        #[test]
        fn test_failure_outranks_success() {
            let scorer = ImportanceScorer::default();
            assert!(
                scorer.score(Category::Task, false, false, false)
                    > scorer.score(Category::Task, true, false, false)
            );
        }

        #[test]
        fn test_score_bounded_and_deterministic_for_all_inputs() {
            let configs = [
                ScoringConfig::default(),
                ScoringConfig {
                    knowledge: 1.7,
                    solution: -0.2,
                    episodic_failure: f64::NAN,
                    conversation: 3.0,
                    ..ScoringConfig::default()
                },
            ];
            for config in configs {
                let scorer = ImportanceScorer::new(config);
                for category in Category::ALL {
                    for succeeded in [true, false] {
                        for knowledge in [true, false] {
                            for solution in [true, false] {
                                let a = scorer.score(category, succeeded, knowledge, solution);
                                let b = scorer.score(category, succeeded, knowledge, solution);
                                assert!((0.0..=1.0).contains(&a), "{category} scored {a}");
                                assert_eq!(a.to_bits(), b.to_bits());
                            }
                        }
                    }
                }
            }
        }

        #[test]
        fn test_confidence_is_configured_constant() {
            assert!(approx(ImportanceScorer::default().confidence(), 1.0));
            let scorer = ImportanceScorer::new(ScoringConfig {
                confidence: 0.6,
                ..ScoringConfig::default()
            });
            assert!(approx(scorer.confidence(), 0.6));
        }
    }

    // ── Classifier ─────────────────────────────────────────────

    mod classifier {
        use super::*;

        fn classifier(store: &Arc<SqliteStore>) -> MemoryClassifier {
            MemoryClassifier::new(shared(store), ImportanceScorer::default())
        }

        fn review_task() -> TaskDescriptor {
            TaskDescriptor::new("reviewer", "code_review", "Review the parser module")
                .with_param("path", "src/parser.rs")
        }

        fn of_category(entries: &[MemoryEntry], category: Category) -> Vec<&MemoryEntry> {
            entries.iter().filter(|e| e.category == category).collect()
        }

        #[test]
        fn test_failed_task_records_episode() {
            let store = store();
            let outcome = TaskOutcome::failure("timeout talking to model", 12.5);
            let entries = classifier(&store).on_task_completed(&review_task(), &outcome);

            assert_eq!(entries.len(), 1);
            let episode = &entries[0];
            assert_eq!(episode.tier, Tier::Episodic);
            assert_eq!(episode.category, Category::Task);
            assert!(approx(episode.importance, 0.7));
            assert!(episode.tags.contains("code_review"));
            assert!(episode.tags.contains("episodic"));
            assert!(episode.content.contains("failed after 12.50s"));
            assert!(episode.content.contains("timeout talking to model"));
            assert_eq!(episode.context["success"], json!(false));

            assert_eq!(store.get(episode.id).unwrap(), *episode);
        }

        #[test]
        fn test_review_summary_adds_knowledge() {
            let store = store();
            let outcome = TaskOutcome::success(
                Some(json!({"review": {"summary": "Parser handles nested generics poorly", "score": 6}})),
                3.0,
            );
            let entries = classifier(&store).on_task_completed(&review_task(), &outcome);

            assert_eq!(entries.len(), 2);
            let episode = of_category(&entries, Category::Task)[0];
            let knowledge = of_category(&entries, Category::Knowledge)[0];
            assert!(approx(episode.importance, 0.4));
            assert!(approx(knowledge.importance, 0.9));
            assert_eq!(knowledge.tier, Tier::Semantic);
            assert_eq!(knowledge.content, "Parser handles nested generics poorly");
            assert!(knowledge.tags.contains("knowledge"));
            assert!(knowledge.related_memory_ids.contains(&episode.id));

            let related = store.related(&store.get(knowledge.id).unwrap()).unwrap();
            assert_eq!(related.len(), 1);
            assert_eq!(related[0].id, episode.id);
        }

        #[test]
        fn test_plain_summary_string_is_knowledge() {
            let store = store();
            let outcome = TaskOutcome::success(Some(json!({"summary": "Use a Pratt parser"})), 1.0);
            let entries = classifier(&store).classify(&review_task(), &outcome);
            assert_eq!(of_category(&entries, Category::Knowledge).len(), 1);
        }

        #[test]
        fn test_suggestions_add_solution() {
            let store = store();
            let outcome = TaskOutcome::success(
                Some(json!({"suggestions": ["split the lexer", "add fuzzing", "cache tokens"]})),
                2.0,
            );
            let entries = classifier(&store).on_task_completed(&review_task(), &outcome);

            assert_eq!(entries.len(), 2);
            assert!(of_category(&entries, Category::Knowledge).is_empty());
            let episode = of_category(&entries, Category::Task)[0];
            let solution = of_category(&entries, Category::Solution)[0];
            assert!(approx(episode.importance, 0.4));
            assert!(approx(solution.importance, 0.8));
            assert_eq!(solution.content, "split the lexer; add fuzzing; cache tokens");
            assert!(solution.tags.contains("suggestions"));
            assert_eq!(store.count().unwrap(), 2);
        }

        #[test]
        fn test_failed_task_ignores_result_signals() {
            let store = store();
            let mut outcome = TaskOutcome::failure("crashed", 0.5);
            outcome.result = Some(json!({"summary": "partial", "suggestions": ["retry"]}));
            let entries = classifier(&store).classify(&review_task(), &outcome);
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].category, Category::Task);
        }

        #[test]
        fn test_empty_signals_are_ignored() {
            let store = store();
            let outcome = TaskOutcome::success(
                Some(json!({"summary": "   ", "suggestions": [], "review": 42})),
                0.1,
            );
            let entries = classifier(&store).classify(&review_task(), &outcome);
            assert_eq!(entries.len(), 1);
        }

        #[test]
        fn test_entry_counts_bounded_for_all_outcomes() {
            let store = store();
            let classifier = classifier(&store);
            let results = [
                None,
                Some(json!("plain text")),
                Some(json!({"summary": "s"})),
                Some(json!({"suggestions": ["a"]})),
                Some(json!({"summary": "s", "review": "r", "suggestions": ["a", "b"]})),
            ];
            for succeeded in [true, false] {
                for result in &results {
                    let outcome = TaskOutcome {
                        succeeded,
                        result: result.clone(),
                        error_message: None,
                        execution_time_secs: 1.0,
                    };
                    let entries = classifier.classify(&review_task(), &outcome);
                    assert_eq!(of_category(&entries, Category::Task).len(), 1);
                    assert!(of_category(&entries, Category::Knowledge).len() <= 1);
                    assert!(of_category(&entries, Category::Solution).len() <= 1);
                    assert!(entries.iter().all(|e| e.validate().is_ok()));
                }
            }
        }

        #[test]
        fn test_unavailable_store_degrades_to_empty() {
            let classifier =
                MemoryClassifier::new(Arc::new(UnavailableStore), ImportanceScorer::default());
            let outcome = TaskOutcome::success(Some(json!({"summary": "x"})), 1.0);
            assert!(classifier.on_task_completed(&review_task(), &outcome).is_empty());
        }
    }

    // ── Store ──────────────────────────────────────────────────

    mod store {
        use super::*;

        #[test]
        fn test_put_get_roundtrip() {
            let store = store();
            let original = entry("a1", Tier::Semantic, Category::Knowledge, "Rust has no GC")
                .with_context(json!({"source": "docs", "n": 3}))
                .with_tags(["rust", "memory"])
                .with_importance(0.65)
                .with_confidence(0.9)
                .with_related(Uuid::new_v4());
            let id = store.put(&original).unwrap();
            assert_eq!(id, original.id);
            assert_eq!(store.get(id).unwrap(), original);
        }

        #[test]
        fn test_persists_across_reopen() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("memory.db");
            let original = entry("a1", Tier::Episodic, Category::Task, "ran a task");
            {
                let store = SqliteStore::open(&path).unwrap();
                store.put(&original).unwrap();
            }
            let store = SqliteStore::open(&path).unwrap();
            assert_eq!(store.get(original.id).unwrap(), original);
        }

        #[test]
        fn test_duplicate_id_rejected() {
            let store = store();
            let e = entry("a1", Tier::Working, Category::Conversation, "hi");
            store.put(&e).unwrap();
            let err = store.put(&e).unwrap_err();
            assert!(matches!(err, MnemeError::InvalidEntry { .. }));
        }

        #[test]
        fn test_invalid_entries_rejected() {
            let store = store();
            let no_owner = entry(" ", Tier::Working, Category::Conversation, "hi");
            assert!(matches!(
                store.put(&no_owner),
                Err(MnemeError::InvalidEntry { .. })
            ));

            let mut out_of_range = entry("a1", Tier::Working, Category::Conversation, "hi");
            out_of_range.importance = 1.5;
            assert!(matches!(
                store.put(&out_of_range),
                Err(MnemeError::InvalidEntry { .. })
            ));

            let mut self_related = entry("a1", Tier::Working, Category::Conversation, "hi");
            self_related.related_memory_ids.insert(self_related.id);
            assert!(store.put(&self_related).is_err());
            assert_eq!(store.count().unwrap(), 0);
        }

        #[test]
        fn test_missing_ids_are_not_found() {
            let store = store();
            let id = Uuid::new_v4();
            assert!(matches!(store.get(id), Err(MnemeError::NotFound(x)) if x == id));
            assert!(matches!(store.delete(id), Err(MnemeError::NotFound(_))));
            assert!(matches!(
                store.update_importance_and_access(id, &EntryUpdate::touch()),
                Err(MnemeError::NotFound(_))
            ));
        }

        #[test]
        fn test_update_touches_and_consolidates() {
            let store = store();
            let e = entry("a1", Tier::Episodic, Category::Task, "x").with_created_at(days_ago(2));
            store.put(&e).unwrap();

            store.update_importance_and_access(e.id, &EntryUpdate::touch()).unwrap();
            store.update_importance_and_access(e.id, &EntryUpdate::touch()).unwrap();
            let touched = store.get(e.id).unwrap();
            assert_eq!(touched.access_count, 2);
            assert!(touched.accessed_at > e.accessed_at);
            assert!(approx(touched.importance, e.importance));
            assert!(touched.last_consolidated_at.is_none());

            let at = Utc::now();
            store
                .update_importance_and_access(e.id, &EntryUpdate::consolidate(1.4, at))
                .unwrap();
            let consolidated = store.get(e.id).unwrap();
            assert!(approx(consolidated.importance, 1.0));
            assert_eq!(consolidated.access_count, 2);
            assert!(consolidated.last_consolidated_at.is_some());
            assert_eq!(consolidated.created_at, e.created_at);
            assert_eq!(consolidated.content, e.content);
        }

        #[test]
        fn test_query_filters_and_order() {
            let store = store();
            let low = entry("a1", Tier::Episodic, Category::Task, "deployed frontend")
                .with_tags(["deploy"])
                .with_importance(0.2);
            let high = entry("a1", Tier::Semantic, Category::Knowledge, "the Parser is slow")
                .with_tags(["parser"])
                .with_importance(0.9);
            let other = entry("a2", Tier::Semantic, Category::Knowledge, "parser tricks")
                .with_importance(0.95);
            for e in [&low, &high, &other] {
                store.put(e).unwrap();
            }

            let all = store.query(&MemoryFilter::for_owner("a1")).unwrap();
            assert_eq!(
                all.iter().map(|e| e.id).collect::<Vec<_>>(),
                vec![high.id, low.id]
            );

            let semantic = store.query(&MemoryFilter::for_owner("a1").tier(Tier::Semantic)).unwrap();
            assert_eq!(semantic.len(), 1);

            let tagged = store.query(&MemoryFilter::for_owner("a1").tags(["deploy", "nope"])).unwrap();
            assert_eq!(tagged[0].id, low.id);
            assert_eq!(tagged.len(), 1);

            let text = store.query(&MemoryFilter::default().text("PARSER")).unwrap();
            assert_eq!(text.len(), 2);

            let either = store
                .query(&MemoryFilter::for_owner("a1").tags(["deploy"]).text("parser").match_any())
                .unwrap();
            assert_eq!(either.len(), 2);
            let both = store
                .query(&MemoryFilter::for_owner("a1").tags(["deploy"]).text("parser"))
                .unwrap();
            assert!(both.is_empty());

            let important = store.query(&MemoryFilter::default().min_importance(0.9)).unwrap();
            assert_eq!(important.len(), 2);
            let unimportant = store.query(&MemoryFilter::default().max_importance(0.9)).unwrap();
            assert_eq!(unimportant.len(), 1);

            let limited = store.query(&MemoryFilter::default().limit(1)).unwrap();
            assert_eq!(limited[0].id, other.id);
        }

        #[test]
        fn test_text_search_treats_wildcards_literally() {
            let store = store();
            store
                .put(&entry("a1", Tier::Working, Category::Conversation, "100% done"))
                .unwrap();
            store
                .put(&entry("a1", Tier::Working, Category::Conversation, "100 items"))
                .unwrap();
            let hits = store.query(&MemoryFilter::default().text("100%")).unwrap();
            assert_eq!(hits.len(), 1);
            assert_eq!(hits[0].content, "100% done");
        }

        #[test]
        fn test_text_search_folds_non_ascii_case() {
            let store = store();
            let review = entry("a1", Tier::Semantic, Category::Knowledge, "Überprüfung der Schnittstelle")
                .with_importance(0.6);
            let greek = entry("a1", Tier::Semantic, Category::Knowledge, "ΣΥΝΟΨΗ της αλλαγής")
                .with_importance(0.5);
            let other = entry("a1", Tier::Semantic, Category::Knowledge, "unrelated note");
            for e in [&review, &greek, &other] {
                store.put(e).unwrap();
            }

            let hits = store.query(&MemoryFilter::default().text("überprüfung")).unwrap();
            assert_eq!(hits.iter().map(|e| e.id).collect::<Vec<_>>(), vec![review.id]);

            let hits = store.query(&MemoryFilter::default().text("Συνοψη")).unwrap();
            assert_eq!(hits.iter().map(|e| e.id).collect::<Vec<_>>(), vec![greek.id]);

            let both = MemoryFilter::default().text("ÜBERPRÜFUNG συνοψη");
            assert_eq!(store.query(&both).unwrap().len(), 2);
            let first = store.query(&both.limit(1)).unwrap();
            assert_eq!(first.iter().map(|e| e.id).collect::<Vec<_>>(), vec![review.id]);
        }

        #[test]
        fn test_text_and_tags_combine_per_match_mode() {
            let store = store();
            let tagged = entry("a1", Tier::Episodic, Category::Task, "Deployed the frontend")
                .with_tags(["deploy"]);
            let untagged = entry("a1", Tier::Episodic, Category::Task, "Frontend build broke");
            let tag_only = entry("a1", Tier::Episodic, Category::Task, "Rolled back")
                .with_tags(["deploy"]);
            for e in [&tagged, &untagged, &tag_only] {
                store.put(e).unwrap();
            }

            let all = MemoryFilter::default().tags(["deploy"]).text("frontend");
            let hits = store.query(&all).unwrap();
            assert_eq!(hits.iter().map(|e| e.id).collect::<Vec<_>>(), vec![tagged.id]);

            assert_eq!(store.query(&all.match_any()).unwrap().len(), 3);
        }

        #[test]
        fn test_query_related_to() {
            let store = store();
            let source = entry("a1", Tier::Episodic, Category::Task, "source");
            let linked = entry("a1", Tier::Semantic, Category::Knowledge, "linked").with_related(source.id);
            let unlinked = entry("a1", Tier::Semantic, Category::Knowledge, "unlinked");
            for e in [&source, &linked, &unlinked] {
                store.put(e).unwrap();
            }

            let hits = store
                .query(&MemoryFilter::for_owner("a1").related_to(source.id))
                .unwrap();
            assert_eq!(hits.iter().map(|e| e.id).collect::<Vec<_>>(), vec![linked.id]);
            assert!(store
                .query(&MemoryFilter::for_owner("b2").related_to(source.id))
                .unwrap()
                .is_empty());
        }

        #[test]
        fn test_scan_batch_pages_by_id() {
            let store = store();
            for i in 0..5 {
                store
                    .put(
                        &entry("a1", Tier::Episodic, Category::Task, &format!("old {i}"))
                            .with_created_at(days_ago(3)),
                    )
                    .unwrap();
            }
            store
                .put(&entry("a1", Tier::Episodic, Category::Task, "fresh"))
                .unwrap();

            let cutoff = Utc::now() - Duration::days(1);
            let mut seen = Vec::new();
            let mut after = None;
            loop {
                let batch = store.scan_batch(cutoff, after, 2).unwrap();
                assert!(batch.len() <= 2);
                let Some(last) = batch.last() else { break };
                after = Some(last.id);
                seen.extend(batch.into_iter().map(|e| e.id));
            }
            assert_eq!(seen.len(), 5);
            let mut sorted = seen.clone();
            sorted.sort();
            assert_eq!(seen, sorted);
        }

        #[test]
        fn test_stats_and_owners() {
            let store = store();
            store
                .put(&entry("a1", Tier::Working, Category::Conversation, "hi").with_importance(0.3))
                .unwrap();
            store
                .put(&entry("a1", Tier::Episodic, Category::Task, "t").with_importance(0.4))
                .unwrap();
            store
                .put(&entry("a1", Tier::Semantic, Category::Knowledge, "k").with_importance(0.9))
                .unwrap();
            store
                .put(&entry("b2", Tier::Semantic, Category::Solution, "s"))
                .unwrap();

            let stats = store.stats("a1").unwrap();
            assert_eq!(
                (stats.working, stats.episodic, stats.semantic, stats.total),
                (1, 1, 1, 3)
            );
            assert!(approx(stats.average_importance, 0.533));

            let empty = store.stats("nobody").unwrap();
            assert_eq!(empty.total, 0);
            assert!(approx(empty.average_importance, 0.0));

            assert_eq!(store.owners().unwrap(), vec!["a1".to_string(), "b2".to_string()]);
        }

        #[test]
        fn test_related_skips_deleted_targets() {
            let store = store();
            let source = entry("a1", Tier::Episodic, Category::Task, "source");
            let gone = entry("a1", Tier::Episodic, Category::Task, "gone");
            let linked = entry("a1", Tier::Semantic, Category::Knowledge, "fact")
                .with_related(source.id)
                .with_related(gone.id);
            for e in [&source, &gone, &linked] {
                store.put(e).unwrap();
            }
            store.delete(gone.id).unwrap();

            let related = store.related(&linked).unwrap();
            assert_eq!(related.len(), 1);
            assert_eq!(related[0].id, source.id);
        }
    }

    // ── Sweeper ────────────────────────────────────────────────

    mod sweeper {
        use super::*;
        use mneme_config::SweepConfig;
        use mneme_memory::sweeper::{PROMOTED_TAG, decay};

        fn sweeper(store: &Arc<SqliteStore>, config: SweepConfig) -> Sweeper {
            Sweeper::new(shared(store), config)
        }

        #[test]
        fn test_decay_never_increases() {
            for i in 0..=20 {
                let importance = i as f64 / 20.0;
                for j in 0..=10 {
                    let factor = j as f64 / 10.0;
                    let decayed = decay(importance, factor);
                    assert!(decayed <= importance, "{importance} x {factor} -> {decayed}");
                    assert!(decayed >= 0.0);
                }
            }
        }

        #[test]
        fn test_sweep_decays_old_entries_only() {
            let store = store();
            let old = entry("a1", Tier::Episodic, Category::Task, "old")
                .with_importance(0.5)
                .with_created_at(days_ago(2));
            let young = entry("a1", Tier::Episodic, Category::Task, "young").with_importance(0.5);
            store.put(&old).unwrap();
            store.put(&young).unwrap();

            let report = sweeper(&store, SweepConfig::default()).sweep(&no_cancel());
            assert_eq!(report.scanned, 1);
            assert_eq!(report.decayed, 1);
            assert_eq!(report.pruned, 0);
            assert!(!report.cancelled && !report.aborted);

            let old_after = store.get(old.id).unwrap();
            assert!(approx(old_after.importance, 0.4));
            assert!(old_after.last_consolidated_at.is_some());
            assert_eq!(store.get(young.id).unwrap(), young);
        }

        #[test]
        fn test_prunes_decayed_stale_unused_entry() {
            let store = store();
            let stale = entry("a1", Tier::Episodic, Category::Task, "stale")
                .with_importance(0.0625)
                .with_created_at(days_ago(31));
            store.put(&stale).unwrap();

            let report = sweeper(&store, SweepConfig::default()).sweep(&no_cancel());
            assert_eq!(report.pruned, 1);
            assert!(matches!(store.get(stale.id), Err(MnemeError::NotFound(_))));
        }

        #[test]
        fn test_keeps_used_or_recent_low_importance_entries() {
            let store = store();
            let mut used = entry("a1", Tier::Episodic, Category::Task, "used")
                .with_importance(0.05)
                .with_created_at(days_ago(40));
            used.access_count = 5;
            let recent = entry("a1", Tier::Episodic, Category::Task, "recent")
                .with_importance(0.05)
                .with_created_at(days_ago(10));
            let important = entry("a1", Tier::Semantic, Category::Knowledge, "important")
                .with_importance(0.9)
                .with_created_at(days_ago(90));
            for e in [&used, &recent, &important] {
                store.put(e).unwrap();
            }

            let report = sweeper(&store, SweepConfig::default()).sweep(&no_cancel());
            assert_eq!(report.pruned, 0);
            assert_eq!(report.decayed, 3);
            assert_eq!(store.count().unwrap(), 3);
        }

        #[test]
        fn test_promotes_frequently_used_episode_once() {
            let store = store();
            let mut episode = entry("a1", Tier::Episodic, Category::Task, "fixed flaky test")
                .with_tags(["testing"])
                .with_importance(0.7)
                .with_created_at(days_ago(3));
            episode.access_count = 4;
            store.put(&episode).unwrap();

            let sweeper = sweeper(&store, SweepConfig::default());
            let report = sweeper.sweep(&no_cancel());
            assert_eq!(report.promoted, 1);

            let promoted = store
                .query(&MemoryFilter::for_owner("a1").tier(Tier::Semantic))
                .unwrap();
            assert_eq!(promoted.len(), 1);
            let learned = &promoted[0];
            assert_eq!(learned.content, "Learned: fixed flaky test");
            assert!(approx(learned.importance, 0.77));
            assert!(learned.related_memory_ids.contains(&episode.id));
            assert!(learned.tags.contains("testing"));

            let source = store.get(episode.id).unwrap();
            assert!(approx(source.importance, 0.56));
            assert!(source.last_consolidated_at.is_some());

            let again = sweeper.sweep(&no_cancel());
            assert_eq!(again.promoted, 0);
            assert_eq!(store.count().unwrap(), 2);
        }

        #[test]
        fn test_promotes_episode_once_it_becomes_frequently_used() {
            let store = store();
            let episode = entry("a1", Tier::Episodic, Category::Task, "tuned the cache")
                .with_importance(1.0)
                .with_created_at(days_ago(3));
            let knowledge = entry("a1", Tier::Semantic, Category::Knowledge, "cache notes")
                .with_related(episode.id)
                .with_created_at(days_ago(3));
            store.put(&episode).unwrap();
            store.put(&knowledge).unwrap();

            let sweeper = sweeper(&store, SweepConfig::default());
            assert_eq!(sweeper.sweep(&no_cancel()).promoted, 0);

            for _ in 0..4 {
                store
                    .update_importance_and_access(episode.id, &EntryUpdate::touch())
                    .unwrap();
            }
            assert_eq!(sweeper.sweep(&no_cancel()).promoted, 1);

            // Still above both thresholds, but already promoted
            let source = store.get(episode.id).unwrap();
            assert!(approx(source.importance, 0.64));
            assert_eq!(source.access_count, 4);
            assert_eq!(sweeper.sweep(&no_cancel()).promoted, 0);

            let learned = store
                .query(&MemoryFilter::for_owner("a1").tags([PROMOTED_TAG]))
                .unwrap();
            assert_eq!(learned.len(), 1);
            assert_eq!(learned[0].content, "Learned: tuned the cache");
            assert!(learned[0].related_memory_ids.contains(&episode.id));
        }

        #[test]
        fn test_extreme_age_settings_do_not_overflow() {
            let store = store();
            let stale = entry("a1", Tier::Episodic, Category::Task, "stale")
                .with_importance(0.0625)
                .with_created_at(days_ago(31));
            store.put(&stale).unwrap();

            let config = SweepConfig {
                retention_days: 1_000_000_000_000,
                ..SweepConfig::default()
            };
            let report = sweeper(&store, config).sweep(&no_cancel());
            assert_eq!(report.pruned, 0);
            assert_eq!(report.decayed, 1);
            let kept = store.get(stale.id).unwrap();
            assert!(approx(kept.importance, 0.05));

            for min_age_hours in [u64::MAX, 1_000_000_000_000] {
                let config = SweepConfig {
                    min_age_hours,
                    ..SweepConfig::default()
                };
                let report = sweeper(&store, config).sweep(&no_cancel());
                assert_eq!(report, SweepReport::default());
            }
            assert_eq!(store.get(stale.id).unwrap(), kept);
        }

        #[test]
        fn test_promotion_can_be_disabled() {
            let store = store();
            let mut episode = entry("a1", Tier::Episodic, Category::Task, "x")
                .with_importance(0.9)
                .with_created_at(days_ago(3));
            episode.access_count = 10;
            store.put(&episode).unwrap();

            let config = SweepConfig {
                promote_episodic: false,
                ..SweepConfig::default()
            };
            let report = sweeper(&store, config).sweep(&no_cancel());
            assert_eq!(report.promoted, 0);
            assert_eq!(store.count().unwrap(), 1);
        }

        #[test]
        fn test_walks_every_batch() {
            let store = store();
            for i in 0..7 {
                store
                    .put(
                        &entry("a1", Tier::Episodic, Category::Task, &format!("e{i}"))
                            .with_created_at(days_ago(2)),
                    )
                    .unwrap();
            }
            let config = SweepConfig {
                batch_size: 2,
                ..SweepConfig::default()
            };
            let report = sweeper(&store, config).sweep(&no_cancel());
            assert_eq!(report.scanned, 7);
            assert_eq!(report.decayed, 7);
        }

        #[test]
        fn test_cancelled_before_first_batch_touches_nothing() {
            let store = store();
            let e = entry("a1", Tier::Episodic, Category::Task, "x")
                .with_importance(0.0625)
                .with_created_at(days_ago(60));
            store.put(&e).unwrap();

            let (_tx, cancel) = watch::channel(true);
            let report = sweeper(&store, SweepConfig::default()).sweep(&cancel);
            assert!(report.cancelled);
            assert_eq!(report.scanned, 0);
            assert_eq!(store.get(e.id).unwrap(), e);
        }

        #[test]
        fn test_unavailable_store_aborts() {
            let sweeper = Sweeper::new(Arc::new(UnavailableStore), SweepConfig::default());
            let report = sweeper.sweep(&no_cancel());
            assert!(report.aborted);
            assert_eq!(report.scanned, 0);
        }

        #[test]
        fn test_merges_low_importance_duplicates() {
            let store = store();
            let mut first = entry("a1", Tier::Working, Category::Conversation, "said hello")
                .with_tags(["greeting"])
                .with_importance(0.2)
                .with_created_at(days_ago(4));
            first.access_count = 1;
            let mut second = entry("a1", Tier::Working, Category::Conversation, "said hello")
                .with_tags(["chat"])
                .with_importance(0.25)
                .with_created_at(days_ago(2));
            second.access_count = 2;
            let other_owner = entry("b2", Tier::Working, Category::Conversation, "said hello")
                .with_importance(0.2)
                .with_created_at(days_ago(2));
            for e in [&first, &second, &other_owner] {
                store.put(e).unwrap();
            }

            let config = SweepConfig {
                merge_duplicates: true,
                ..SweepConfig::default()
            };
            let report = sweeper(&store, config).sweep(&no_cancel());
            assert_eq!(report.merged, 2);

            let remaining = store.query(&MemoryFilter::for_owner("a1")).unwrap();
            assert_eq!(remaining.len(), 1);
            let merged = &remaining[0];
            assert_eq!(merged.access_count, 3);
            assert!(merged.tags.contains("greeting") && merged.tags.contains("chat"));
            assert!(approx(merged.importance, 0.2));
            assert_eq!(merged.created_at, first.created_at);
            assert!(store.get(other_owner.id).is_ok());
        }

        #[test]
        fn test_merge_leaves_young_duplicates() {
            let store = store();
            let first = entry("a1", Tier::Working, Category::Conversation, "said hello").with_importance(0.2);
            let second = entry("a1", Tier::Working, Category::Conversation, "said hello").with_importance(0.2);
            store.put(&first).unwrap();
            store.put(&second).unwrap();

            let config = SweepConfig {
                merge_duplicates: true,
                batch_size: 1,
                ..SweepConfig::default()
            };
            let report = sweeper(&store, config).sweep(&no_cancel());
            assert_eq!(report.merged, 0);
            assert_eq!(store.get(first.id).unwrap(), first);
            assert_eq!(store.get(second.id).unwrap(), second);
        }

        #[test]
        fn test_merge_walks_every_batch() {
            let store = store();
            for _ in 0..5 {
                store
                    .put(
                        &entry("a1", Tier::Working, Category::Conversation, "said hello")
                            .with_importance(0.2)
                            .with_created_at(days_ago(2)),
                    )
                    .unwrap();
            }

            let config = SweepConfig {
                merge_duplicates: true,
                batch_size: 2,
                ..SweepConfig::default()
            };
            let report = sweeper(&store, config).sweep(&no_cancel());
            assert_eq!(report.merged, 5);
            assert_eq!(store.count().unwrap(), 1);
        }
    }

    // ── Retrieval ──────────────────────────────────────────────

    mod retrieval {
        use super::*;
        use mneme_config::RetrievalConfig;
        use mneme_memory::retrieval::recency_weight;

        fn engine(store: &Arc<SqliteStore>) -> RetrievalEngine {
            RetrievalEngine::new(shared(store), RetrievalConfig::default())
        }

        fn seed(store: &SqliteStore) -> (MemoryEntry, MemoryEntry, MemoryEntry) {
            let parser = entry("a1", Tier::Semantic, Category::Knowledge, "The parser struggles with generics")
                .with_tags(["code_review"])
                .with_importance(0.9)
                .with_created_at(days_ago(1));
            let deploy = entry("a1", Tier::Episodic, Category::Task, "Deployed the frontend")
                .with_tags(["deploy"])
                .with_importance(0.4);
            let foreign = entry("b2", Tier::Semantic, Category::Knowledge, "parser notes")
                .with_tags(["code_review"])
                .with_importance(1.0);
            for e in [&parser, &deploy, &foreign] {
                store.put(e).unwrap();
            }
            (parser, deploy, foreign)
        }

        #[test]
        fn test_unmatched_tags_yield_empty() {
            let store = store();
            seed(&store);
            let query = QueryContext::new().with_tags(["astronomy"]);
            assert!(engine(&store).retrieve("a1", &query, 5).is_empty());
        }

        #[test]
        fn test_tag_or_text_matches_within_owner() {
            let store = store();
            let (parser, deploy, _) = seed(&store);

            let by_tag = engine(&store).retrieve("a1", &QueryContext::new().with_tags(["code_review"]), 5);
            assert_eq!(by_tag.iter().map(|e| e.id).collect::<Vec<_>>(), vec![parser.id]);

            let by_text = engine(&store).retrieve("a1", &QueryContext::new().with_text("frontend"), 5);
            assert_eq!(by_text.iter().map(|e| e.id).collect::<Vec<_>>(), vec![deploy.id]);

            let either = QueryContext::new().with_tags(["code_review"]).with_text("frontend");
            assert_eq!(engine(&store).retrieve("a1", &either, 5).len(), 2);
        }

        #[test]
        fn test_text_matches_regardless_of_case_in_any_script() {
            let store = store();
            let review = entry("a1", Tier::Semantic, Category::Knowledge, "Überprüfung der Schnittstelle")
                .with_tags(["code_review"]);
            store.put(&review).unwrap();

            for text in ["Überprüfung", "überprüfung", "ÜBERPRÜFUNG"] {
                let results = engine(&store).retrieve("a1", &QueryContext::new().with_text(text), 5);
                assert_eq!(results.iter().map(|e| e.id).collect::<Vec<_>>(), vec![review.id], "{text}");
            }
        }

        #[test]
        fn test_no_criteria_returns_all_of_owner() {
            let store = store();
            seed(&store);
            let results = engine(&store).retrieve("a1", &QueryContext::new(), 0);
            assert_eq!(results.len(), 2);
            assert!(results.iter().all(|e| e.owner_agent_id == "a1"));
        }

        #[test]
        fn test_structured_filters_apply() {
            let store = store();
            let (parser, _, _) = seed(&store);
            let query = QueryContext::new().with_tier(Tier::Semantic);
            let results = engine(&store).retrieve("a1", &query, 5);
            assert_eq!(results.len(), 1);
            assert_eq!(results[0].id, parser.id);

            let query = QueryContext::new().with_min_importance(0.95);
            assert!(engine(&store).retrieve("a1", &query, 5).is_empty());
        }

        #[test]
        fn test_recency_outweighs_stale_importance() {
            let store = store();
            let stale = entry("a1", Tier::Semantic, Category::Knowledge, "old insight")
                .with_importance(0.9)
                .with_created_at(days_ago(30));
            let fresh = entry("a1", Tier::Episodic, Category::Task, "new event").with_importance(0.4);
            store.put(&stale).unwrap();
            store.put(&fresh).unwrap();

            let results = engine(&store).retrieve("a1", &QueryContext::new(), 5);
            assert_eq!(results[0].id, fresh.id);
            assert_eq!(results[1].id, stale.id);
        }

        #[test]
        fn test_repeated_retrieval_is_stable() {
            let store = store();
            for i in 0..6 {
                store
                    .put(
                        &entry("a1", Tier::Episodic, Category::Task, &format!("task {i}"))
                            .with_importance(0.5)
                            .with_created_at(days_ago(i % 3)),
                    )
                    .unwrap();
            }
            let engine = engine(&store);
            let now = Utc::now();
            let first: Vec<_> = engine
                .retrieve_at(now, "a1", &QueryContext::new(), 6)
                .into_iter()
                .map(|e| e.id)
                .collect();
            let second: Vec<_> = engine
                .retrieve_at(now, "a1", &QueryContext::new(), 6)
                .into_iter()
                .map(|e| e.id)
                .collect();
            assert_eq!(first, second);
        }

        #[test]
        fn test_max_results_and_default() {
            let store = store();
            for i in 0..15 {
                store
                    .put(&entry("a1", Tier::Working, Category::Conversation, &format!("m{i}")))
                    .unwrap();
            }
            let engine = engine(&store);
            assert_eq!(engine.retrieve("a1", &QueryContext::new(), 3).len(), 3);
            assert_eq!(engine.retrieve("a1", &QueryContext::new(), 0).len(), 10);
        }

        #[test]
        fn test_retrieval_records_access() {
            let store = store();
            let (parser, _, _) = seed(&store);
            let query = QueryContext::new().with_tags(["code_review"]);
            let results = engine(&store).retrieve("a1", &query, 1);
            assert_eq!(results[0].access_count, 1);
            assert_eq!(store.get(parser.id).unwrap().access_count, 1);

            engine(&store).retrieve("a1", &query, 1);
            assert_eq!(store.get(parser.id).unwrap().access_count, 2);
        }

        #[test]
        fn test_unavailable_store_yields_empty() {
            let engine = RetrievalEngine::new(Arc::new(UnavailableStore), RetrievalConfig::default());
            assert!(engine.retrieve("a1", &QueryContext::new(), 5).is_empty());
        }

        #[test]
        fn test_recency_weight_curve() {
            assert!(approx(recency_weight(0.0, 168.0, 0.1), 1.0));
            assert!(approx(recency_weight(168.0, 168.0, 0.1), 0.5));
            assert!(approx(recency_weight(336.0, 168.0, 0.1), 0.25));
            assert!(approx(recency_weight(10_000.0, 168.0, 0.1), 0.1));
        }

        #[test]
        fn test_format_context() {
            assert_eq!(format_context(&[]), "");

            let store = store();
            let (parser, deploy, _) = seed(&store);
            let block = format_context(&[parser, deploy]);
            assert!(block.starts_with("## Relevant Context from Memory"));
            assert!(block.contains("**[Fact]** (knowledge, importance 0.90)"));
            assert!(block.contains("**[Event]** (task, importance 0.40)"));
            assert!(block.contains("Deployed the frontend"));
        }
    }

    // ── Periodic sweeper ───────────────────────────────────────

    mod periodic {
        use super::*;
        use mneme_config::SweepConfig;

        #[tokio::test]
        async fn test_run_periodic_sweeps_then_stops_on_shutdown() {
            let store = store();
            let old = entry("a1", Tier::Episodic, Category::Task, "old")
                .with_importance(0.5)
                .with_created_at(days_ago(2));
            store.put(&old).unwrap();

            let sweeper = Arc::new(Sweeper::new(shared(&store), SweepConfig::default()));
            let (tx, rx) = watch::channel(false);
            let handle = tokio::spawn(sweeper.run_periodic(rx));

            let mut swept = false;
            for _ in 0..500 {
                if store.get(old.id).unwrap().last_consolidated_at.is_some() {
                    swept = true;
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
            assert!(swept, "first sweep never ran");

            tx.send(true).unwrap();
            tokio::time::timeout(std::time::Duration::from_secs(5), handle)
                .await
                .expect("sweeper did not stop")
                .unwrap();
        }
    }
}
