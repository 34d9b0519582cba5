//! End-to-end download behavior through the library facade, driven by a
//! scripted transcoder instead of a real ffmpeg binary.

mod common;

use common::{test_config, wait_terminal, wait_terminals, wait_until, ScriptedSpawner};
use mediastash::{DownloadRequest, Error, Library, StashEvent};
use tempfile::tempdir;

fn request(id: &str, url: &str, number: u32) -> DownloadRequest {
    DownloadRequest {
        episode_id: id.to_string(),
        collection: "Test Show".to_string(),
        episode_number: number,
        url: url.to_string(),
        headers: Vec::new(),
        poster_url: None,
        subtitles: Vec::new(),
    }
}

mod completion {
    use super::*;

    #[tokio::test]
    async fn test_download_commits_atomically_and_records_manifest() {
        let root = tempdir().unwrap();
        let library =
            Library::with_spawner(root.path(), test_config(), ScriptedSpawner::completing(256))
                .unwrap();
        let mut events = library.subscribe();

        library
            .download(request("show-ep-1", "scripted://a", 1))
            .await
            .unwrap();

        let end = wait_terminal(&mut events, "show-ep-1").await;
        let StashEvent::Completed { path, size, .. } = end else {
            panic!("expected completion, got {end:?}");
        };
        assert_eq!(size, 256);
        assert!(path.ends_with("Test Show/Episode_1.mp4"));
        assert!(path.is_file());
        // No temp debris survives a successful commit.
        let dir = root.path().join("Test Show");
        assert!(!dir.join("Episode_1.mp4.tmp").exists());

        let manifest = mediastash::manifest::load(&dir).await.unwrap();
        assert_eq!(manifest.collection_name, "Test Show");
        assert_eq!(manifest.episodes.len(), 1);
        assert_eq!(manifest.episodes[0].id, "show-ep-1");
        assert_eq!(manifest.episodes[0].size, Some(256));
        assert!(!manifest.episodes[0].discovered);
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_and_ends_at_one_hundred() {
        let root = tempdir().unwrap();
        let library =
            Library::with_spawner(root.path(), test_config(), ScriptedSpawner::completing(256))
                .unwrap();
        let mut events = library.subscribe();

        library
            .download(request("show-ep-1", "scripted://a", 1))
            .await
            .unwrap();

        let mut percents = Vec::new();
        loop {
            let event = events.recv().await.unwrap();
            if event.episode_id() != "show-ep-1" {
                continue;
            }
            match event {
                StashEvent::Progress { sample, .. } => percents.push(sample.percent),
                StashEvent::Completed { .. } => break,
                StashEvent::Failed { error, .. } => panic!("download failed: {error}"),
                _ => {}
            }
        }
        assert!(!percents.is_empty());
        assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{percents:?}");
        assert_eq!(*percents.last().unwrap(), 100);
        // Only the verified commit reports 100.
        assert!(percents[..percents.len() - 1].iter().all(|p| *p <= 99));
    }

    #[tokio::test]
    async fn test_existing_valid_output_short_circuits() {
        let root = tempdir().unwrap();
        let dir = root.path().join("Test Show");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join("Episode_1.mp4"), vec![0u8; 256])
            .await
            .unwrap();

        // A failing transcoder proves nothing is ever spawned.
        let spawner = ScriptedSpawner::failing();
        let library =
            Library::with_spawner(root.path(), test_config(), spawner.clone()).unwrap();
        let mut events = library.subscribe();

        library
            .download(request("show-ep-1", "scripted://a", 1))
            .await
            .unwrap();

        let end = wait_terminal(&mut events, "show-ep-1").await;
        assert!(matches!(end, StashEvent::Completed { size: 256, .. }));
        assert!(!spawner.spawned("scripted://a"));
    }
}

mod failure {
    use super::*;

    #[tokio::test]
    async fn test_failed_process_leaves_no_partial_output_or_record() {
        let root = tempdir().unwrap();
        let library =
            Library::with_spawner(root.path(), test_config(), ScriptedSpawner::failing()).unwrap();
        let mut events = library.subscribe();

        library
            .download(request("show-ep-1", "scripted://a", 1))
            .await
            .unwrap();

        let end = wait_terminal(&mut events, "show-ep-1").await;
        assert!(matches!(end, StashEvent::Failed { .. }));

        let dir = root.path().join("Test Show");
        assert!(!dir.join("Episode_1.mp4").exists());
        assert!(!dir.join("Episode_1.mp4.tmp").exists());
        let manifest = mediastash::manifest::load(&dir).await.unwrap();
        assert!(manifest.episodes.is_empty());
    }

    #[tokio::test]
    async fn test_stalled_transcoder_is_killed() {
        let root = tempdir().unwrap();
        // Emits one line, then goes silent without its gate ever opening.
        let spawner = ScriptedSpawner::gated(256);
        let config = mediastash::StashConfig {
            stall_timeout: std::time::Duration::from_millis(100),
            ..test_config()
        };
        let library = Library::with_spawner(root.path(), config, spawner.clone()).unwrap();
        let mut events = library.subscribe();

        library
            .download(request("show-ep-1", "scripted://a", 1))
            .await
            .unwrap();

        let end = wait_terminal(&mut events, "show-ep-1").await;
        let StashEvent::Failed { error, .. } = end else {
            panic!("expected failure, got {end:?}");
        };
        assert!(error.contains("No data from source"), "{error}");
        let dir = root.path().join("Test Show");
        assert!(!dir.join("Episode_1.mp4").exists());
        assert!(!dir.join("Episode_1.mp4.tmp").exists());
    }

    #[tokio::test]
    async fn test_undersized_output_is_rejected() {
        let root = tempdir().unwrap();
        // Payload below min_valid_media_bytes.
        let spawner = ScriptedSpawner::completing(16);
        let library = Library::with_spawner(root.path(), test_config(), spawner).unwrap();
        let mut events = library.subscribe();

        library
            .download(request("show-ep-1", "scripted://a", 1))
            .await
            .unwrap();

        let end = wait_terminal(&mut events, "show-ep-1").await;
        let StashEvent::Failed { error, .. } = end else {
            panic!("expected failure, got {end:?}");
        };
        assert!(error.contains("too small"), "{error}");
        assert!(!root.path().join("Test Show/Episode_1.mp4").exists());
    }
}

mod queueing {
    use super::*;

    #[tokio::test]
    async fn test_duplicate_submission_is_rejected_while_tracked() {
        let root = tempdir().unwrap();
        let spawner = ScriptedSpawner::gated(256);
        let library = Library::with_spawner(root.path(), test_config(), spawner.clone()).unwrap();
        let mut events = library.subscribe();

        library
            .download(request("show-ep-1", "scripted://a", 1))
            .await
            .unwrap();
        wait_until("first job spawned", || spawner.spawned("scripted://a")).await;

        let err = library
            .download(request("show-ep-1", "scripted://a", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateJob(_)));

        // After the terminal event the id may be submitted again.
        spawner.release("scripted://a");
        wait_terminal(&mut events, "show-ep-1").await;
        let err = library
            .download(request("show-ep-1", "scripted://a", 1))
            .await;
        assert!(err.is_ok());
    }

    #[tokio::test]
    async fn test_fifo_admission_with_three_slots() {
        let root = tempdir().unwrap();
        let spawner = ScriptedSpawner::gated(256);
        let library = Library::with_spawner(root.path(), test_config(), spawner.clone()).unwrap();
        let mut events = library.subscribe();

        for (i, url) in ["a", "b", "c", "d", "e"].iter().enumerate() {
            library
                .download(request(
                    &format!("ep-{url}"),
                    &format!("scripted://{url}"),
                    i as u32 + 1,
                ))
                .await
                .unwrap();
        }

        // Admission into the running set and the actual spawn are separate
        // steps, so wait for the spawns themselves.
        wait_until("first three spawned", || {
            spawner.spawned("scripted://a")
                && spawner.spawned("scripted://b")
                && spawner.spawned("scripted://c")
        })
        .await;
        assert_eq!(library.running_downloads(), 3);
        assert_eq!(library.queued_downloads(), 2);
        assert!(!spawner.spawned("scripted://d"));

        // Finishing one admits the oldest waiter, not the newest.
        spawner.release("scripted://b");
        let end = wait_terminal(&mut events, "ep-b").await;
        assert!(matches!(end, StashEvent::Completed { .. }));
        wait_until("fourth job admitted", || spawner.spawned("scripted://d")).await;
        assert!(!spawner.spawned("scripted://e"));

        for url in ["a", "c", "d", "e"] {
            spawner.release(&format!("scripted://{url}"));
        }
        let ends = wait_terminals(&mut events, &["ep-a", "ep-c", "ep-d", "ep-e"]).await;
        for (id, end) in &ends {
            assert!(matches!(end, StashEvent::Completed { .. }), "{id}: {end:?}");
        }
    }

    #[tokio::test]
    async fn test_concurrent_completions_keep_every_manifest_record() {
        let root = tempdir().unwrap();
        let spawner = ScriptedSpawner::gated(256);
        let library = Library::with_spawner(root.path(), test_config(), spawner.clone()).unwrap();
        let mut events = library.subscribe();

        // Three downloads into the same collection, released at once so
        // their manifest writes land back to back.
        for (i, url) in ["a", "b", "c"].iter().enumerate() {
            library
                .download(request(
                    &format!("ep-{url}"),
                    &format!("scripted://{url}"),
                    i as u32 + 1,
                ))
                .await
                .unwrap();
        }
        wait_until("all three spawned", || {
            spawner.spawned("scripted://a")
                && spawner.spawned("scripted://b")
                && spawner.spawned("scripted://c")
        })
        .await;
        for url in ["a", "b", "c"] {
            spawner.release(&format!("scripted://{url}"));
        }

        let ends = wait_terminals(&mut events, &["ep-a", "ep-b", "ep-c"]).await;
        for (id, end) in &ends {
            assert!(matches!(end, StashEvent::Completed { .. }), "{id}: {end:?}");
        }

        let dir = root.path().join("Test Show");
        let m = mediastash::manifest::load(&dir).await.unwrap();
        let mut ids: Vec<&str> = m.episodes.iter().map(|e| e.id.as_str()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["ep-a", "ep-b", "ep-c"]);

        // No stray manifest temp files either.
        let leftover = std::fs::read_dir(&dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .any(|e| e.file_name().to_string_lossy().ends_with(".tmp"));
        assert!(!leftover);
    }

    #[tokio::test]
    async fn test_cancel_running_download_cleans_up_collection() {
        let root = tempdir().unwrap();
        let spawner = ScriptedSpawner::gated(256);
        let library = Library::with_spawner(root.path(), test_config(), spawner.clone()).unwrap();
        let mut events = library.subscribe();

        library
            .download(request("show-ep-1", "scripted://a", 1))
            .await
            .unwrap();
        wait_until("job spawned", || spawner.spawned("scripted://a")).await;

        assert!(library
            .cancel("show-ep-1", Some("Test Show"))
            .await
            .unwrap());
        let end = wait_terminal(&mut events, "show-ep-1").await;
        assert!(matches!(end, StashEvent::Cancelled { .. }));

        // Nothing playable was produced, so the whole directory is gone.
        wait_until("collection directory removed", || {
            !root.path().join("Test Show").exists()
        })
        .await;
    }

    #[tokio::test]
    async fn test_cancel_queued_job_never_starts() {
        let root = tempdir().unwrap();
        let spawner = ScriptedSpawner::gated(256);
        let config = mediastash::StashConfig {
            max_concurrent_downloads: 1,
            ..test_config()
        };
        let library = Library::with_spawner(root.path(), config, spawner.clone()).unwrap();
        let mut events = library.subscribe();

        library
            .download(request("ep-a", "scripted://a", 1))
            .await
            .unwrap();
        wait_until("first job spawned", || spawner.spawned("scripted://a")).await;
        library
            .download(request("ep-b", "scripted://b", 2))
            .await
            .unwrap();
        assert_eq!(library.queued_downloads(), 1);

        assert!(library.cancel("ep-b", None).await.unwrap());
        let end = wait_terminal(&mut events, "ep-b").await;
        assert!(matches!(end, StashEvent::Cancelled { .. }));
        assert_eq!(library.queued_downloads(), 0);

        // Freeing the slot must not revive the cancelled waiter.
        spawner.release("scripted://a");
        let end = wait_terminal(&mut events, "ep-a").await;
        assert!(matches!(end, StashEvent::Completed { .. }));
        assert!(!spawner.spawned("scripted://b"));
    }

    #[tokio::test]
    async fn test_cancel_after_completion_leaves_collection_intact() {
        let root = tempdir().unwrap();
        let library =
            Library::with_spawner(root.path(), test_config(), ScriptedSpawner::completing(256))
                .unwrap();
        let mut events = library.subscribe();

        library
            .download(request("show-ep-1", "scripted://a", 1))
            .await
            .unwrap();
        let end = wait_terminal(&mut events, "show-ep-1").await;
        assert!(matches!(end, StashEvent::Completed { .. }));

        // A late cancel with a sweep request finds nothing to cancel and
        // must leave the committed media and its record alone.
        assert!(!library
            .cancel("show-ep-1", Some("Test Show"))
            .await
            .unwrap());
        let dir = root.path().join("Test Show");
        assert!(dir.join("Episode_1.mp4").is_file());
        let manifest = mediastash::manifest::load(&dir).await.unwrap();
        assert_eq!(manifest.episodes.len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_unknown_id_reports_false() {
        let root = tempdir().unwrap();
        let library =
            Library::with_spawner(root.path(), test_config(), ScriptedSpawner::completing(256))
                .unwrap();
        assert!(!library.cancel("nope", None).await.unwrap());
    }
}
