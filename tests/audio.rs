//! Shared sink integration tests
//!
//! Drives the sink's render clock directly; no audio hardware is needed.

use std::sync::Arc;
use std::time::Duration;

use tutor_mascot::analysis::ContextState;
use tutor_mascot::audio::{PlaybackEvent, PlaybackState, UserGesture};
use tutor_mascot::{
    AnalysisRegistry, AvatarView, LipSyncConfig, MascotAudio, Scene, SinkSettings, Utterance,
};

mod common;

use common::{fast_settings, play_to_end, play_with_clock, pump, tone, tone_wav};

fn mount(audio: &Arc<MascotAudio>, registry: &Arc<AnalysisRegistry>) -> AvatarView {
    AvatarView::mount(
        Arc::clone(audio),
        Arc::clone(registry),
        Scene::default_head(),
        LipSyncConfig::default(),
    )
}

#[tokio::test]
async fn test_sink_is_a_singleton() {
    let audio = Arc::new(MascotAudio::new(fast_settings()));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let audio = Arc::clone(&audio);
            tokio::spawn(async move { audio.sink() })
        })
        .collect();

    let first = audio.sink();
    for handle in handles {
        let sink = handle.await.unwrap();
        assert!(Arc::ptr_eq(&first, &sink));
        assert_eq!(first.id(), sink.id());
    }
}

#[tokio::test]
async fn test_views_share_one_analysis_graph() {
    let audio = Arc::new(MascotAudio::new(fast_settings()));
    let registry = Arc::new(AnalysisRegistry::default());
    let sink = audio.sink();

    let views: Vec<_> = (0..4).map(|_| mount(&audio, &registry)).collect();
    assert_eq!(sink.route_installs(), 1);
    assert_eq!(registry.attachment_count(), 1);
    assert_eq!(registry.consumer_count(sink.id()), 4);

    let route = sink.route().unwrap();
    assert_eq!(route.analyser_count(), 1);

    drop(views);
    assert_eq!(registry.attachment_count(), 0);
    assert_eq!(route.analyser_count(), 0);
    // The output route outlives its analysers
    assert!(sink.route().is_some());

    let _view = mount(&audio, &registry);
    assert_eq!(sink.route_installs(), 1);
    assert_eq!(route.analyser_count(), 1);
}

#[tokio::test]
async fn test_every_source_released_exactly_once() {
    let audio = Arc::new(MascotAudio::new(fast_settings()));
    let sink = audio.sink();
    let utterances: Vec<_> = (0..5).map(|i| tone(600 + i * 10)).collect();

    for utterance in &utterances {
        assert!(play_with_clock(&audio, utterance).await);
        play_to_end(&sink);
    }

    let before = sink.release_stats();
    assert_eq!(before.allocated, 5);
    assert_eq!(before.superseded, 4);
    assert_eq!(before.live(), 1);

    assert!(audio.dispose());
    assert!(!audio.dispose());

    let after = sink.release_stats();
    assert_eq!(after.superseded, 4);
    assert_eq!(after.disposed, 1);
    assert_eq!(after.ignored, 0);
    assert_eq!(after.live(), 0);
}

#[tokio::test]
async fn test_stop_then_replay_reuses_source() {
    let audio = Arc::new(MascotAudio::new(fast_settings()));
    let sink = audio.sink();
    let utterance = tone(4800);

    assert!(play_with_clock(&audio, &utterance).await);
    pump(&sink, 2);
    let handle = sink.status().source.unwrap();

    audio.stop();
    let stopped = sink.status();
    assert!(stopped.is_paused());
    assert_eq!(stopped.position, 0);
    assert_eq!(stopped.source, Some(handle));

    assert!(play_with_clock(&audio, &utterance).await);
    let replay = sink.status();
    assert_eq!(replay.state, PlaybackState::Playing);
    assert_eq!(replay.source, Some(handle));
    assert_eq!(sink.release_stats().allocated, 1);
    assert_eq!(sink.release_stats().superseded, 0);
}

#[tokio::test]
async fn test_reused_source_reports_new_request() {
    let audio = Arc::new(MascotAudio::new(fast_settings()));
    let sink = audio.sink();
    let bytes = tone_wav(2400, 0.5);

    let first = Utterance::new(bytes.clone());
    let second = Utterance::new(bytes);
    assert_ne!(first.id, second.id);

    assert!(play_with_clock(&audio, &first).await);
    play_to_end(&sink);

    let mut events = sink.playback_events();
    assert!(play_with_clock(&audio, &second).await);
    assert_eq!(sink.current_request(), Some(second.id));
    assert_eq!(sink.release_stats().allocated, 1);
    assert_eq!(
        events.recv().await.unwrap(),
        PlaybackEvent::Started {
            request_id: second.id
        }
    );

    play_to_end(&sink);
    assert_eq!(
        events.recv().await.unwrap(),
        PlaybackEvent::Ended {
            request_id: second.id
        }
    );
}

#[tokio::test]
async fn test_two_views_animate_independently_of_each_other() {
    let audio = Arc::new(MascotAudio::new(fast_settings()));
    let registry = Arc::new(AnalysisRegistry::default());
    let sink = audio.sink();

    let mut first = mount(&audio, &registry);
    let mut second = mount(&audio, &registry);

    assert!(play_with_clock(&audio, &tone(24_000)).await);
    pump(&sink, 2);

    let a = first.frame(Duration::from_millis(16));
    let b = second.frame(Duration::from_millis(16));
    assert!(a.active && b.active);
    assert!(a.mouth > 0.0);
    assert!(b.mouth > 0.0);

    drop(first);
    assert_eq!(registry.consumer_count(sink.id()), 1);

    pump(&sink, 1);
    let b = second.frame(Duration::from_millis(16));
    assert!(b.mouth > 0.0);
    assert_eq!(sink.status().state, PlaybackState::Playing);
}

#[tokio::test]
async fn test_view_mounted_mid_playback_binds_immediately() {
    let audio = Arc::new(MascotAudio::new(fast_settings()));
    let registry = Arc::new(AnalysisRegistry::default());
    let sink = audio.sink();

    assert!(play_with_clock(&audio, &tone(24_000)).await);

    let mut view = mount(&audio, &registry);
    assert_eq!(view.bound_sink(), Some(sink.id()));
    pump(&sink, 2);
    assert!(view.frame(Duration::from_millis(16)).mouth > 0.0);
}

#[tokio::test]
async fn test_superseded_load_never_plays_and_is_released() {
    let settings = SinkSettings {
        ready_timeout: Duration::from_secs(5),
        ..SinkSettings::default()
    };
    let audio = Arc::new(MascotAudio::new(settings));
    let sink = audio.sink();
    let mut events = sink.playback_events();

    let pending = tone(1200);
    let replacement = tone(1300);

    let first = {
        let audio = Arc::clone(&audio);
        let pending = pending.clone();
        tokio::spawn(async move { audio.load_and_play(&pending).await })
    };

    // Wait for the first source to be installed, with no render tick yet
    while sink.current_request() != Some(pending.id) {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    assert!(play_with_clock(&audio, &replacement).await);
    assert!(!first.await.unwrap());

    let stats = sink.release_stats();
    assert_eq!(stats.allocated, 2);
    assert_eq!(stats.superseded, 1);
    assert_eq!(sink.current_request(), Some(replacement.id));

    assert_eq!(
        events.recv().await.unwrap(),
        PlaybackEvent::Started {
            request_id: replacement.id
        }
    );
}

#[tokio::test]
async fn test_gesture_gate_and_suspended_route() {
    let settings = SinkSettings {
        require_gesture: true,
        ..fast_settings()
    };
    let audio = Arc::new(MascotAudio::new(settings));
    let registry = Arc::new(AnalysisRegistry::default());
    let sink = audio.sink();
    let mut view = mount(&audio, &registry);

    let route = sink.route().unwrap();
    assert_eq!(route.state(), ContextState::Suspended);

    let utterance = tone(24_000);
    assert!(!play_with_clock(&audio, &utterance).await);
    assert!(view.frame(Duration::from_millis(16)).mouth.abs() < f32::EPSILON);

    audio.on_user_gesture(UserGesture::Pointer);
    assert_eq!(route.state(), ContextState::Running);

    assert!(play_with_clock(&audio, &utterance).await);
    pump(&sink, 2);
    assert!(view.frame(Duration::from_millis(16)).mouth > 0.0);
}

#[tokio::test]
async fn test_mouth_decays_after_stop() {
    let audio = Arc::new(MascotAudio::new(fast_settings()));
    let registry = Arc::new(AnalysisRegistry::default());
    let sink = audio.sink();
    let mut view = mount(&audio, &registry);

    assert!(play_with_clock(&audio, &tone(24_000)).await);
    for _ in 0..5 {
        pump(&sink, 1);
        view.frame(Duration::from_millis(16));
    }

    audio.stop();
    let mut previous = view.frame(Duration::from_millis(16)).mouth;
    assert!(previous > 0.0);
    for _ in 0..20 {
        let state = view.frame(Duration::from_millis(16));
        assert!(!state.active);
        assert!(state.mouth < previous);
        previous = state.mouth;
    }
}

#[tokio::test]
async fn test_torn_down_sink_gives_silent_taps() {
    let audio = Arc::new(MascotAudio::new(fast_settings()));
    let registry = Arc::new(AnalysisRegistry::default());
    let sink = audio.sink();
    assert!(audio.dispose());

    let view = mount(&audio, &registry);
    assert!(!view.is_tapped());
    assert_eq!(sink.route_installs(), 0);
    assert!(!audio.load_and_play(&tone(100)).await);
}
