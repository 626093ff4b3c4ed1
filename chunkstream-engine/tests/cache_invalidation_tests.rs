//! Chunk cache invalidation through full streaming sessions

mod helpers;

use chunkstream_engine::processing::ProcessingMode;
use chunkstream_engine::signature::FileSignatureService;
use chunkstream_engine::streaming::{StreamOutcome, StreamRequest};
use helpers::audio_generator::generate_ramp_wav;
use helpers::*;
use std::path::Path;
use std::sync::Arc;

/// File names cached for a track, sorted
fn cached_files(cache_root: &Path, track_id: i64) -> Vec<String> {
    let dir = cache_root.join(format!("track_{}", track_id));
    let mut names: Vec<String> = match std::fs::read_dir(&dir) {
        Ok(entries) => entries
            .flatten()
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}

async fn stream_warm(harness: &Harness) -> (StreamOutcome, usize) {
    let transport = ScriptedTransport::recording().into_arc();
    let outcome = harness
        .controller
        .start_stream(transport.clone(), StreamRequest::enhanced(1, "warm", 1.0))
        .await
        .unwrap();
    (outcome, transport.delivered_samples().len())
}

#[tokio::test]
async fn test_second_stream_is_served_from_cache() {
    let (dir, track) = ramp_track(1, 2500);
    let enhancer = Arc::new(CountingEnhancer::new());
    let harness = Harness::new(dir.path(), enhancer.clone(), vec![track], streaming_config());

    assert_eq!(stream_warm(&harness).await, (StreamOutcome::Completed { chunks_delivered: 3 }, 2500));
    assert_eq!(stream_warm(&harness).await, (StreamOutcome::Completed { chunks_delivered: 3 }, 2500));

    assert_eq!(enhancer.calls(), 3);
    assert_eq!(cached_files(harness.pipeline.cache().root(), 1).len(), 3);
}

#[tokio::test]
async fn test_modified_source_replaces_stale_entries() {
    let (dir, track) = ramp_track(1, 2500);
    let enhancer = Arc::new(CountingEnhancer::new());
    let harness = Harness::new(
        dir.path(),
        enhancer.clone(),
        vec![track.clone()],
        streaming_config(),
    );
    stream_warm(&harness).await;
    let before = cached_files(harness.pipeline.cache().root(), 1);
    assert_eq!(before.len(), 3);

    // Different length, so the signature changes even within one mtime tick
    generate_ramp_wav(&track.filepath, 2600).unwrap();
    let signature = FileSignatureService.generate(&track.filepath);

    let (outcome, delivered) = stream_warm(&harness).await;
    assert_eq!(outcome, StreamOutcome::Completed { chunks_delivered: 3 });
    assert_eq!(delivered, 2600);
    assert_eq!(enhancer.calls(), 6);

    let after = cached_files(harness.pipeline.cache().root(), 1);
    assert_eq!(after.len(), 3);
    let suffix = format!("_{}.wav", signature);
    assert!(after.iter().all(|name| name.ends_with(&suffix)), "{:?}", after);
    assert!(before.iter().all(|name| !after.contains(name)));
}

#[tokio::test]
async fn test_purge_stale_removes_old_signatures() {
    let (dir, track) = ramp_track(1, 2500);
    let harness = Harness::new(
        dir.path(),
        Arc::new(CountingEnhancer::new()),
        vec![track.clone()],
        streaming_config(),
    );
    stream_warm(&harness).await;

    assert_eq!(harness.pipeline.purge_stale(&track), 0);

    generate_ramp_wav(&track.filepath, 2600).unwrap();
    assert_eq!(harness.pipeline.purge_stale(&track), 3);
    assert!(cached_files(harness.pipeline.cache().root(), 1).is_empty());
}

#[tokio::test]
async fn test_unreadable_entry_fails_chunk_then_recovers() {
    let (dir, track) = ramp_track(1, 2500);
    let enhancer = Arc::new(CountingEnhancer::new());
    let harness = Harness::new(
        dir.path(),
        enhancer.clone(),
        vec![track.clone()],
        streaming_config(),
    );
    stream_warm(&harness).await;

    let processor = harness
        .pipeline
        .open(track, ProcessingMode::enhanced("warm", 1.0))
        .await
        .unwrap();
    let corrupt = harness
        .pipeline
        .cache()
        .path_for(&processor.cache_key(1).unwrap());
    std::fs::write(&corrupt, b"not a wav file").unwrap();

    let (outcome, delivered) = stream_warm(&harness).await;
    assert_eq!(
        outcome,
        StreamOutcome::Failed {
            chunk_index: 1,
            recovery_position: 0.75
        }
    );
    assert_eq!(delivered, 750);
    assert!(!corrupt.exists());

    let (outcome, delivered) = stream_warm(&harness).await;
    assert_eq!(outcome, StreamOutcome::Completed { chunks_delivered: 3 });
    assert_eq!(delivered, 2500);
    assert_eq!(enhancer.calls(), 4);
}

#[tokio::test]
async fn test_leftover_partial_write_is_not_a_hit() {
    let (dir, track) = ramp_track(1, 2500);
    let enhancer = Arc::new(CountingEnhancer::new());
    let harness = Harness::new(
        dir.path(),
        enhancer.clone(),
        vec![track.clone()],
        streaming_config(),
    );

    let processor = harness
        .pipeline
        .open(track, ProcessingMode::enhanced("warm", 1.0))
        .await
        .unwrap();
    let final_path = harness
        .pipeline
        .cache()
        .path_for(&processor.cache_key(0).unwrap());
    let partial = final_path.with_file_name(format!(
        "{}.partial",
        final_path.file_name().unwrap().to_str().unwrap()
    ));
    std::fs::create_dir_all(partial.parent().unwrap()).unwrap();
    std::fs::write(&partial, b"interrupted").unwrap();

    let (outcome, _) = stream_warm(&harness).await;
    assert_eq!(outcome, StreamOutcome::Completed { chunks_delivered: 3 });
    assert_eq!(enhancer.calls(), 3);
    assert!(final_path.exists());
    assert!(!partial.exists());
}

#[tokio::test]
async fn test_presets_and_intensities_cache_separately() {
    let (dir, track) = ramp_track(1, 2500);
    let enhancer = Arc::new(CountingEnhancer::new());
    let harness = Harness::new(dir.path(), enhancer.clone(), vec![track], streaming_config());

    for (preset, intensity) in [("warm", 1.0), ("bright", 1.0), ("warm", 0.5), ("warm", 0.5)] {
        let transport = ScriptedTransport::recording().into_arc();
        let outcome = harness
            .controller
            .start_stream(transport, StreamRequest::enhanced(1, preset, intensity))
            .await
            .unwrap();
        assert_eq!(outcome, StreamOutcome::Completed { chunks_delivered: 3 });
    }

    assert_eq!(enhancer.calls(), 9);
    assert_eq!(cached_files(harness.pipeline.cache().root(), 1).len(), 9);
}
