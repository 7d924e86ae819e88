#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::NaiveDate;

    use crate::models::{StartLessonRequest, SubmitQuizRequest};
    use crate::progress::store::{CURRENT_USER_KEY, progress_key};
    use crate::progress::{
        CompletionOutcome, DirectoryBackend, KeyValueBackend, MemoryBackend, ProgressEvent,
        ProgressRecord, ProgressStore, RetryPolicy, SyncClient, SyncOutcome, TopicLessons,
        TopicProgress,
    };
    use crate::test::fixed_clock::FixedClock;
    use crate::test::mock_remote::{ScriptedRemote, rejected, server_error};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).expect("valid date")
    }

    fn greetings() -> Vec<String> {
        vec!["hola".to_string(), "adios".to_string(), "gracias".to_string()]
    }

    struct Fixture {
        store: ProgressStore,
        backend: Arc<MemoryBackend>,
        clock: Arc<FixedClock>,
    }

    fn fixture() -> Fixture {
        let backend = Arc::new(MemoryBackend::new());
        let clock = Arc::new(FixedClock::new(day(10)));
        let store = ProgressStore::new(backend.clone(), clock.clone());
        Fixture {
            store,
            backend,
            clock,
        }
    }

    fn synced_fixture(remote: Arc<ScriptedRemote>) -> Fixture {
        let Fixture {
            store,
            backend,
            clock,
        } = fixture();
        let sync = SyncClient::new(
            remote,
            RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::ZERO,
            },
        );
        Fixture {
            store: store.with_sync(sync),
            backend,
            clock,
        }
    }

    async fn complete(store: &ProgressStore, lesson_id: &str) -> CompletionOutcome {
        store
            .mark_lesson_complete("maria", lesson_id, "greetings", &greetings(), "spanish", 0)
            .await
            .expect("completion should persist")
    }

    #[test]
    fn test_missing_record_yields_default() {
        let f = fixture();

        let record = f.store.get_user_progress("nobody");

        assert_eq!(record, ProgressRecord::new(day(10)));
        assert_eq!(record.study_streak, 1);
        assert!(record.completed_lessons.is_empty());
    }

    #[test]
    fn test_corrupt_record_yields_default() {
        let f = fixture();
        f.backend
            .set(&progress_key("maria"), "{not json")
            .expect("raw write");

        let record = f.store.get_user_progress("maria");

        assert_eq!(record, ProgressRecord::new(day(10)));
    }

    #[test]
    fn test_save_then_get_round_trips() {
        let f = fixture();
        let mut record = ProgressRecord::new(day(3));
        record.insert_completed("hola");
        record.set_quiz_score("hola", 90);
        record.add_words_learned(12);
        record.add_time_spent("hola", 7);

        f.store
            .save_user_progress("maria", &record)
            .expect("save should succeed");

        assert_eq!(f.store.get_user_progress("maria"), record);
    }

    #[test]
    fn test_record_is_stored_under_camel_case_keys() {
        let f = fixture();
        f.store
            .save_user_progress("maria", &ProgressRecord::new(day(10)))
            .expect("save should succeed");

        let raw = f
            .backend
            .get("learning_progress::maria")
            .expect("raw read")
            .expect("record present");
        let json: serde_json::Value = serde_json::from_str(&raw).expect("stored JSON");

        assert_eq!(json["studyStreak"], 1);
        assert_eq!(json["lastStudyDate"], "2024-01-10");
        assert!(json["completedLessons"].as_array().is_some());
    }

    #[test]
    fn test_older_records_without_optional_maps_still_load() {
        let f = fixture();
        f.backend
            .set(
                &progress_key("maria"),
                r#"{"completedLessons":["hola"],"lastStudyDate":"2024-01-09","studyStreak":3}"#,
            )
            .expect("raw write");

        let record = f.store.get_user_progress("maria");

        assert_eq!(record.completed_lessons, vec!["hola".to_string()]);
        assert_eq!(record.study_streak, 3);
        assert!(record.quiz_scores.is_empty());
        assert_eq!(record.words_learned, 0);
    }

    #[tokio::test]
    async fn test_topic_rollup_grows_with_each_completion() {
        let f = fixture();

        let mut percentages = Vec::new();
        for lesson in greetings() {
            complete(&f.store, &lesson).await;
            percentages.push(f.store.get_topic_progress("maria", "greetings").percentage);
        }

        assert_eq!(percentages, vec![33, 67, 100]);
        assert_eq!(
            f.store.get_topic_progress("maria", "greetings"),
            TopicProgress {
                completed: 3,
                total: 3,
                percentage: 100,
            }
        );
    }

    #[tokio::test]
    async fn test_completion_is_idempotent() {
        let remote = Arc::new(ScriptedRemote::new());
        let f = synced_fixture(remote.clone());

        let first = complete(&f.store, "hola").await;
        let after_first = f.store.get_user_progress("maria");

        f.clock.set(day(11));
        let second = complete(&f.store, "hola").await;
        let after_second = f.store.get_user_progress("maria");

        assert!(matches!(first, CompletionOutcome::Completed { .. }));
        assert!(matches!(second, CompletionOutcome::AlreadyCompleted));
        assert_eq!(after_first, after_second, "nothing changes on a repeat");
        assert_eq!(after_second.completed_lessons, vec!["hola".to_string()]);
        assert_eq!(remote.calls(), 1, "no remote call for a repeat");
    }

    #[tokio::test]
    async fn test_streak_follows_completion_dates() {
        let f = fixture();

        complete(&f.store, "hola").await;
        assert_eq!(f.store.get_user_progress("maria").study_streak, 1);

        f.clock.set(day(11));
        complete(&f.store, "adios").await;
        assert_eq!(f.store.get_user_progress("maria").study_streak, 2);

        f.clock.set(day(15));
        complete(&f.store, "gracias").await;
        let record = f.store.get_user_progress("maria");
        assert_eq!(record.study_streak, 1);
        assert_eq!(record.last_study_date, day(15));
    }

    #[tokio::test]
    async fn test_time_is_recorded_only_when_positive() {
        let f = fixture();

        f.store
            .mark_lesson_complete("maria", "hola", "greetings", &greetings(), "spanish", 0)
            .await
            .expect("completion");
        f.store
            .mark_lesson_complete("maria", "adios", "greetings", &greetings(), "spanish", 9)
            .await
            .expect("completion");

        let record = f.store.get_user_progress("maria");
        assert!(!record.time_spent.contains_key("hola"));
        assert_eq!(record.time_spent.get("adios"), Some(&9));
    }

    #[tokio::test]
    async fn test_failed_sync_keeps_local_completion() {
        let remote = Arc::new(ScriptedRemote::failing_with(vec![rejected(422)]));
        let f = synced_fixture(remote.clone());

        let outcome = complete(&f.store, "hola").await;

        match outcome {
            CompletionOutcome::Completed {
                record,
                sync: Some(SyncOutcome::Diverged { attempts, .. }),
            } => {
                assert_eq!(attempts, 1);
                assert!(record.is_lesson_completed("hola"));
            }
            other => panic!("expected a diverged completion, got {:?}", other),
        }
        assert!(f.store.is_lesson_completed("maria", "hola"));
    }

    #[tokio::test]
    async fn test_detached_completion_saves_before_push_finishes() {
        let remote = Arc::new(ScriptedRemote::failing_with(vec![server_error(503)]));
        let f = synced_fixture(remote.clone());

        let detached = f
            .store
            .mark_lesson_complete_detached("maria", "hola", "greetings", &greetings(), "spanish", 5)
            .expect("completion should persist")
            .expect("first completion");

        assert!(detached.record.is_lesson_completed("hola"));
        assert!(f.store.is_lesson_completed("maria", "hola"));

        let push = detached.sync.expect("sync configured");
        let outcome = push.await.expect("push task");
        assert!(outcome.is_synced());
        assert_eq!(remote.calls(), 2, "one retry after the 503");

        let repeat = f
            .store
            .mark_lesson_complete_detached("maria", "hola", "greetings", &greetings(), "spanish", 5)
            .expect("repeat");
        assert!(repeat.is_none());
        assert_eq!(remote.calls(), 2);
    }

    #[tokio::test]
    async fn test_completion_without_sync_reports_no_outcome() {
        let f = fixture();

        match complete(&f.store, "hola").await {
            CompletionOutcome::Completed { sync, .. } => assert!(sync.is_none()),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_lesson_start_is_pushed_without_local_change() {
        let remote = Arc::new(ScriptedRemote::new());
        let f = synced_fixture(remote.clone());

        let outcome = f
            .store
            .record_lesson_start(&StartLessonRequest {
                lesson_id: "hola".to_string(),
                course_id: "spanish".to_string(),
                topic_id: "greetings".to_string(),
            })
            .await;

        assert!(outcome.is_some_and(|o| o.is_synced()));
        assert_eq!(remote.calls(), 1);
        assert!(f.backend.get(&progress_key("maria")).expect("read").is_none());
    }

    #[tokio::test]
    async fn test_quiz_keeps_latest_score_locally() {
        let remote = Arc::new(ScriptedRemote::new());
        let f = synced_fixture(remote.clone());

        for score in [80.0, 60.4] {
            let outcome = f
                .store
                .record_quiz(
                    "maria",
                    &SubmitQuizRequest {
                        lesson_id: "hola".to_string(),
                        course_id: "spanish".to_string(),
                        score,
                        total_questions: 10,
                        correct_answers: 6,
                    },
                )
                .await
                .expect("quiz should persist");
            assert!(outcome.is_some_and(|o| o.is_synced()));
        }

        let record = f.store.get_user_progress("maria");
        assert_eq!(record.quiz_scores.get("hola"), Some(&60));
        assert_eq!(remote.calls(), 2);
    }

    #[test]
    fn test_quiz_score_is_clamped() {
        let f = fixture();

        f.store
            .add_quiz_score("maria", "hola", 250)
            .expect("score should persist");

        assert_eq!(
            f.store.get_user_progress("maria").quiz_scores.get("hola"),
            Some(&100)
        );
    }

    #[tokio::test]
    async fn test_full_resync_drops_unlisted_topics() {
        let f = fixture();
        complete(&f.store, "hola").await;

        let record = f
            .store
            .update_all_topic_progress(
                "maria",
                &[TopicLessons::new("numbers", ["uno", "dos"])],
            )
            .expect("resync should persist");

        assert!(!record.topic_progress.contains_key("greetings"));
        assert_eq!(record.topic_progress["numbers"].percentage, 0);
        assert_eq!(f.store.get_user_progress("maria"), record);
    }

    #[tokio::test]
    async fn test_completion_percentage() {
        let f = fixture();
        complete(&f.store, "hola").await;

        assert_eq!(f.store.completion_percentage("maria", 4), 25);
        assert_eq!(f.store.completion_percentage("maria", 0), 0);
    }

    #[test]
    fn test_identities_are_isolated() {
        let f = fixture();

        f.store.add_words_learned("maria", 5).expect("save");
        f.store.add_time_spent("juan", "hola", 3).expect("save");

        assert_eq!(f.store.get_user_progress("maria").words_learned, 5);
        assert_eq!(f.store.get_user_progress("juan").words_learned, 0);
        assert!(f.store.get_user_progress("maria").time_spent.is_empty());
    }

    #[test]
    fn test_events_are_broadcast() {
        let f = fixture();
        let mut events = f.store.subscribe();

        f.store.add_words_learned("maria", 1).expect("save");
        f.store.reset_progress("maria").expect("reset");

        assert_eq!(
            events.try_recv().expect("update event"),
            ProgressEvent::Updated {
                username: "maria".to_string()
            }
        );
        assert_eq!(
            events.try_recv().expect("reset event"),
            ProgressEvent::Reset {
                username: "maria".to_string()
            }
        );
    }

    #[test]
    fn test_reset_returns_to_defaults() {
        let f = fixture();
        f.store.add_words_learned("maria", 40).expect("save");

        f.store.reset_progress("maria").expect("reset");

        assert_eq!(
            f.store.get_user_progress("maria"),
            ProgressRecord::new(day(10))
        );
    }

    #[test]
    fn test_logout_clears_pointer_but_keeps_record() {
        let f = fixture();
        f.store.set_current_user("maria").expect("login");
        f.store.add_words_learned("maria", 2).expect("save");
        assert_eq!(f.store.current_user().as_deref(), Some("maria"));

        f.store.logout().expect("logout");

        assert!(f.store.current_user().is_none());
        assert!(f.backend.get(CURRENT_USER_KEY).expect("read").is_none());
        assert_eq!(f.store.get_user_progress("maria").words_learned, 2);
    }

    #[test]
    fn test_directory_backend_persists_across_reopen() {
        let dir = tempfile::tempdir().expect("temp dir");

        {
            let backend = Arc::new(DirectoryBackend::open(dir.path()).expect("open"));
            let store = ProgressStore::new(backend, Arc::new(FixedClock::new(day(10))));
            store.add_words_learned("maria", 8).expect("save");
            store.set_current_user("maria").expect("pointer");
        }

        let backend = Arc::new(DirectoryBackend::open(dir.path()).expect("reopen"));
        let store = ProgressStore::new(backend, Arc::new(FixedClock::new(day(12))));

        assert_eq!(store.current_user().as_deref(), Some("maria"));
        assert_eq!(store.get_user_progress("maria").words_learned, 8);
    }

    #[test]
    fn test_directory_backend_encodes_keys_and_tolerates_missing_files() {
        let dir = tempfile::tempdir().expect("temp dir");
        let backend = DirectoryBackend::open(dir.path()).expect("open");

        backend
            .set("learning_progress::a/b", "{}")
            .expect("write awkward key");
        assert_eq!(
            backend.get("learning_progress::a/b").expect("read").as_deref(),
            Some("{}")
        );

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .expect("list")
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["learning_progress%3A%3Aa%2Fb.json".to_string()]);

        backend.remove("never-written").expect("missing key removal is fine");
        assert!(backend.get("never-written").expect("read").is_none());
    }
}
