//! Conversation integration tests against an in-memory backend

use std::sync::Arc;

use tutor_mascot::conversation::FAILURE_MARKER;
use tutor_mascot::voice::{Recording, SAMPLE_RATE};
use tutor_mascot::{Conversation, Error, MascotAudio, Mode, ReadAloud, Reply, TutorBackend};

mod common;

use common::{FakeBackend, fast_settings, play_to_end};

fn conversation(mode: Mode, backend: &Arc<FakeBackend>) -> (Conversation, Arc<MascotAudio>) {
    let audio = Arc::new(MascotAudio::new(fast_settings()));
    let backend: Arc<dyn TutorBackend> = Arc::clone(backend) as Arc<dyn TutorBackend>;
    let conversation = Conversation::new(mode, backend, Arc::clone(&audio));
    (conversation, audio)
}

#[tokio::test]
async fn test_ask_speaks_the_answer() {
    let backend = Arc::new(FakeBackend::default());
    let (mut convo, audio) = conversation(Mode::Ask, &backend);

    let index = convo.send("  what is a limit?  ").await.unwrap();
    assert_eq!(index, 0);

    let turn = &convo.turns()[0];
    assert_eq!(turn.user, "what is a limit?");
    assert_eq!(turn.reply, Reply::Answer("answer to what is a limit?".to_string()));
    assert!(turn.audio.is_some());
    assert_eq!(convo.speaking(), Some(0));
    assert!(audio.sink().status().state == tutor_mascot::audio::PlaybackState::Playing);

    assert_eq!(
        backend.calls(),
        vec![
            "query:what is a limit?".to_string(),
            "tts:answer to what is a limit?".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_blank_input_is_ignored() {
    let backend = Arc::new(FakeBackend::default());
    let (mut convo, _audio) = conversation(Mode::Ask, &backend);

    assert!(convo.send("   ").await.is_none());
    assert!(convo.turns().is_empty());
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn test_chat_keeps_first_session_and_resets() {
    let backend = Arc::new(FakeBackend::with_session("s-1"));
    let (mut convo, _audio) = conversation(Mode::Chat, &backend);

    convo.send("hello").await;
    assert_eq!(convo.session_id(), Some("s-1"));
    convo.send("again").await;

    convo.reset().await;
    assert!(convo.session_id().is_none());
    // Second reset has no session to clear
    convo.reset().await;

    let chats: Vec<_> = backend
        .calls()
        .into_iter()
        .filter(|c| !c.starts_with("tts:"))
        .collect();
    assert_eq!(
        chats,
        vec![
            "chat:hello:-".to_string(),
            "chat:again:s-1".to_string(),
            "reset:s-1".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_backend_failure_marks_turn_and_does_not_block() {
    let backend = Arc::new(FakeBackend {
        fail_answers: true,
        ..FakeBackend::default()
    });
    let (mut convo, _audio) = conversation(Mode::Chat, &backend);

    let index = convo.send("hello").await.unwrap();
    let turn = &convo.turns()[index];
    assert!(matches!(turn.reply, Reply::Failed(_)));
    assert_eq!(turn.reply.display(), FAILURE_MARKER);
    assert!(turn.audio.is_none());
    assert!(convo.speaking().is_none());

    assert_eq!(convo.send("still there?").await, Some(1));
    assert_eq!(convo.turns().len(), 2);

    // A failed turn has nothing to read aloud
    assert_eq!(convo.read_aloud(index).await.unwrap(), ReadAloud::NoSuchMessage);
    assert!(!backend.calls().iter().any(|c| c.starts_with("tts:")));
}

#[tokio::test]
async fn test_tts_failure_leaves_turn_silent() {
    let backend = Arc::new(FakeBackend {
        fail_tts: true,
        ..FakeBackend::default()
    });
    let (mut convo, _audio) = conversation(Mode::Ask, &backend);

    let index = convo.send("why?").await.unwrap();
    let turn = &convo.turns()[index];
    assert_eq!(turn.reply.answer(), Some("answer to why?"));
    assert!(turn.audio.is_none());
    assert!(convo.speaking().is_none());

    // Reading aloud retries synthesis and reports the failure
    assert!(matches!(convo.read_aloud(index).await, Err(Error::Tts(_))));
}

#[tokio::test]
async fn test_read_aloud_toggles_and_reuses_source() {
    let backend = Arc::new(FakeBackend::default());
    let (mut convo, audio) = conversation(Mode::Ask, &backend);
    let sink = audio.sink();

    convo.send("first").await;
    convo.send("second").await;
    assert_eq!(convo.speaking(), Some(1));

    // Toggle off the speaking turn
    assert_eq!(convo.read_aloud(1).await.unwrap(), ReadAloud::Stopped);
    assert!(convo.speaking().is_none());
    assert!(sink.status().is_paused());

    // Replay an earlier turn, then the later one again
    assert_eq!(convo.read_aloud(0).await.unwrap(), ReadAloud::Started);
    assert_eq!(convo.speaking(), Some(0));
    assert_eq!(convo.read_aloud(1).await.unwrap(), ReadAloud::Started);
    assert_eq!(convo.speaking(), Some(1));

    // Audio was synthesized once per turn
    let tts_calls = backend.calls().iter().filter(|c| c.starts_with("tts:")).count();
    assert_eq!(tts_calls, 2);

    // Out of range turns never play
    assert_eq!(convo.read_aloud(9).await.unwrap(), ReadAloud::NoSuchMessage);
}

#[tokio::test]
async fn test_speaking_clears_when_playback_ends() {
    let backend = Arc::new(FakeBackend::default());
    let (mut convo, audio) = conversation(Mode::Ask, &backend);

    convo.send("short").await;
    assert_eq!(convo.speaking(), Some(0));

    convo.refresh_speaking();
    assert_eq!(convo.speaking(), Some(0));

    play_to_end(&audio.sink());
    convo.refresh_speaking();
    assert!(convo.speaking().is_none());
}

#[tokio::test]
async fn test_stop_all_clears_indicator() {
    let backend = Arc::new(FakeBackend::default());
    let (mut convo, audio) = conversation(Mode::Ask, &backend);

    convo.send("stop me").await;
    convo.stop_all();
    assert!(convo.speaking().is_none());
    assert_eq!(audio.sink().status().position, 0);

    convo.clear();
    assert!(convo.turns().is_empty());
}

#[tokio::test]
async fn test_transcribe_sends_wav() {
    let backend = Arc::new(FakeBackend::default());
    let (convo, _audio) = conversation(Mode::Ask, &backend);

    let empty = Recording {
        samples: Vec::new(),
        sample_rate: SAMPLE_RATE,
    };
    assert!(matches!(convo.transcribe(&empty).await, Err(Error::Stt(_))));

    let recording = Recording {
        samples: vec![0.1; 1600],
        sample_rate: SAMPLE_RATE,
    };
    let text = convo.transcribe(&recording).await.unwrap();
    assert_eq!(text, "what is a derivative");
    assert_eq!(backend.calls(), vec![format!("stt:{}", 44 + 1600 * 2)]);
}

#[tokio::test]
async fn test_upload_accepts_only_pdf() {
    let backend = Arc::new(FakeBackend::default());
    let (convo, _audio) = conversation(Mode::Ask, &backend);

    let dir = std::env::temp_dir().join(format!("mascot-upload-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();

    let notes = dir.join("notes.txt");
    std::fs::write(&notes, b"plain text").unwrap();
    assert!(matches!(convo.upload(&notes).await, Err(Error::Tutor(_))));

    let pdf = dir.join("Calculus.PDF");
    std::fs::write(&pdf, b"%PDF-1.4 test").unwrap();
    assert_eq!(convo.upload(&pdf).await.unwrap(), "Stored 3 chunks");
    assert_eq!(backend.calls(), vec!["upload:Calculus.PDF:13".to_string()]);

    std::fs::remove_dir_all(&dir).unwrap();
}
