use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

use tutor_mascot::audio::{AudioSink, PlaybackEvent, UserGesture};
use tutor_mascot::voice::{self, samples_to_wav};
use tutor_mascot::{
    Animator, AnalysisRegistry, AvatarView, Config, Conversation, MascotAudio, Mode,
    OutputDevice, ReadAloud, RenderState, TutorClient, Utterance,
};

/// Mascot - talking tutor avatar
#[derive(Parser)]
#[command(name = "mascot", version, about)]
struct Cli {
    /// Tutor backend URL (overrides config)
    #[arg(long)]
    backend: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Do not draw the mouth meter
    #[arg(long)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ask a one-off question and hear the answer
    Ask {
        /// Question text
        question: String,
    },
    /// Interactive chat (/reset, /read N, /stop, /quit)
    Chat,
    /// Play an MP3 or WAV file through the mascot
    Speak {
        /// Audio file
        file: PathBuf,
    },
    /// Record a spoken question and transcribe it
    Listen {
        /// Recording length in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
        /// Ask the transcribed question
        #[arg(long)]
        ask: bool,
    },
    /// Upload a PDF to the tutor's knowledge store
    Upload {
        /// PDF file
        file: PathBuf,
    },
    /// Test speaker output and lip-sync with a tone
    TestSpeaker,
    /// Check that the tutor backend is up
    Health,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn,tutor_mascot=info",
        1 => "info,tutor_mascot=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    if let Some(url) = cli.backend {
        config.backend.url = url.trim_end_matches('/').to_string();
    }

    let backend = Arc::new(TutorClient::new(&config.backend)?);

    match cli.command {
        Command::Health => {
            let conversation =
                Conversation::new(Mode::Ask, backend, Arc::new(MascotAudio::default()));
            let ok = conversation.health().await?;
            println!("{}: {}", config.backend.url, if ok { "ok" } else { "unhealthy" });
            Ok(())
        }
        Command::Upload { file } => {
            let conversation =
                Conversation::new(Mode::Ask, backend, Arc::new(MascotAudio::default()));
            let detail = conversation.upload(&file).await?;
            println!("{detail}");
            Ok(())
        }
        Command::Ask { question } => {
            let stage = Stage::open(&config, cli.quiet)?;
            let mut conversation = Conversation::new(Mode::Ask, backend, stage.audio());
            ask_and_wait(&mut conversation, &stage, &question).await;
            stage.close().await;
            Ok(())
        }
        Command::Listen { duration, ask } => {
            println!("Listening for {duration} seconds...");
            let recording = voice::record(Duration::from_secs(duration)).await?;
            let stage = Stage::open(&config, cli.quiet)?;
            let mut conversation = Conversation::new(Mode::Ask, backend, stage.audio());

            let text = conversation.transcribe(&recording).await?;
            println!("You said: {text}");
            if ask && !text.is_empty() {
                ask_and_wait(&mut conversation, &stage, &text).await;
            }
            stage.close().await;
            Ok(())
        }
        Command::Chat => {
            let stage = Stage::open(&config, cli.quiet)?;
            let conversation = Conversation::new(Mode::Chat, backend, stage.audio());
            let result = chat(conversation, &stage).await;
            stage.close().await;
            result
        }
        Command::Speak { file } => {
            let stage = Stage::open(&config, cli.quiet)?;
            let result = speak_file(&stage, &file).await;
            stage.close().await;
            result
        }
        Command::TestSpeaker => {
            println!("Playing a 440Hz tone for 2 seconds...");
            let stage = Stage::open(&config, cli.quiet)?;
            let rate = config.audio.output_rate;
            let wav = samples_to_wav(&test_tone(rate, 440.0, 2.0), rate)?;
            let played = stage.play_and_wait(&Utterance::new(wav)).await;
            stage.close().await;

            if played {
                println!("If you heard the tone and saw the meter move, output and lip-sync work.");
            } else {
                println!("Playback did not start; check audio.require_gesture and the output device.");
            }
            Ok(())
        }
    }
}

/// Audio sink, output, and a running avatar for one command
struct Stage {
    audio: Arc<MascotAudio>,
    registry: Arc<AnalysisRegistry>,
    output: Option<OutputDevice>,
    clock: Option<JoinHandle<()>>,
    animator: Animator,
    meter: Option<JoinHandle<()>>,
}

impl Stage {
    fn open(config: &Config, quiet: bool) -> anyhow::Result<Self> {
        let audio = Arc::new(MascotAudio::new(config.audio.clone()));
        let registry = Arc::new(AnalysisRegistry::new(config.analysis.clone()));
        let sink = audio.sink();

        // Running a command counts as user activation
        audio.on_user_gesture(UserGesture::Key);

        let (output, clock) = match OutputDevice::start(Arc::clone(&sink)) {
            Ok(output) => (Some(output), None),
            Err(e) => {
                tracing::warn!(error = %e, "no audio output, rendering silently");
                (None, Some(spawn_headless_clock(sink)))
            }
        };

        let scene = config.avatar.load_scene()?;
        let view = AvatarView::mount(
            Arc::clone(&audio),
            Arc::clone(&registry),
            scene,
            config.lipsync.clone(),
        );
        let animator = Animator::spawn(view, config.avatar.fps);
        let meter = (!quiet).then(|| spawn_meter(animator.frames()));

        Ok(Self {
            audio,
            registry,
            output,
            clock,
            animator,
            meter,
        })
    }

    fn audio(&self) -> Arc<MascotAudio> {
        Arc::clone(&self.audio)
    }

    fn gesture(&self) {
        self.audio.on_user_gesture(UserGesture::Key);
        self.registry.resume_if_suspended();
    }

    async fn play_and_wait(&self, utterance: &Utterance) -> bool {
        let sink = self.audio.sink();
        let events = sink.playback_events();
        if !self.audio.load_and_play(utterance).await {
            return false;
        }
        wait_for_end(&sink, events, utterance.id).await;
        true
    }

    async fn close(self) {
        if let Some(meter) = self.meter {
            meter.abort();
            eprint!("\r{:60}\r", "");
        }
        drop(self.animator.stop().await);
        self.audio.dispose();
        if let Some(clock) = self.clock {
            clock.abort();
        }
        drop(self.output);
    }
}

async fn ask_and_wait(conversation: &mut Conversation, stage: &Stage, question: &str) {
    let sink = stage.audio.sink();
    let events = sink.playback_events();

    let Some(index) = conversation.send(question).await else {
        return;
    };
    let turn = &conversation.turns()[index];
    println!("{}", turn.reply.display());

    if conversation.speaking() == Some(index)
        && let Some(utterance) = &turn.audio
    {
        wait_for_end(&sink, events, utterance.id).await;
    }
}

async fn chat(mut conversation: Conversation, stage: &Stage) -> anyhow::Result<()> {
    println!("Chat with the tutor. Commands: /reset, /read N, /stop, /quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        conversation.refresh_speaking();
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        stage.gesture();
        let line = line.trim();

        match line.split_once(' ').map_or((line, ""), |(cmd, rest)| (cmd, rest.trim())) {
            ("/quit" | "/exit", _) => break,
            ("/stop", _) => conversation.stop_all(),
            ("/reset", _) => {
                conversation.reset().await;
                conversation.clear();
                println!("Session cleared.");
            }
            ("/read", n) => match n.parse::<usize>() {
                Ok(n) if n >= 1 => match conversation.read_aloud(n - 1).await {
                    Ok(ReadAloud::Started) => println!("Reading message {n}."),
                    Ok(ReadAloud::Stopped) => println!("Stopped."),
                    Ok(ReadAloud::NotStarted) => println!("Could not play message {n}."),
                    Ok(ReadAloud::NoSuchMessage) => println!("No answer to read at {n}."),
                    Err(e) => println!("Read aloud failed: {e}"),
                },
                _ => println!("Usage: /read N"),
            },
            _ => {
                if let Some(index) = conversation.send(line).await {
                    let turn = &conversation.turns()[index];
                    println!("[{}] {}", index + 1, turn.reply.display());
                }
            }
        }
    }

    conversation.stop_all();
    conversation.reset().await;
    Ok(())
}

async fn speak_file(stage: &Stage, path: &Path) -> anyhow::Result<()> {
    let bytes = tokio::fs::read(path).await?;
    if !stage.play_and_wait(&Utterance::new(bytes)).await {
        anyhow::bail!("could not play {}", path.display());
    }
    Ok(())
}

/// Wait for `request` to finish playing, or Ctrl-C
async fn wait_for_end(
    sink: &AudioSink,
    mut events: tokio::sync::broadcast::Receiver<PlaybackEvent>,
    request: uuid::Uuid,
) {
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                sink.stop();
                return;
            }
            event = events.recv() => match event {
                Ok(PlaybackEvent::Ended { request_id }) if request_id == request => return,
                Ok(_) | Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            },
        }

        if sink.status().is_paused() && !sink.status().is_ended() {
            return;
        }
    }
}

/// Pull the sink in real time when there is no output device
fn spawn_headless_clock(sink: Arc<AudioSink>) -> JoinHandle<()> {
    const BLOCK: Duration = Duration::from_millis(10);
    let frames = (sink.sample_rate() / 100) as usize;

    tokio::spawn(async move {
        let mut block = vec![0.0_f32; frames];
        let mut interval = tokio::time::interval(BLOCK);
        loop {
            interval.tick().await;
            sink.render(&mut block);
        }
    })
}

/// Draw the mouth level on stderr while audio plays
fn spawn_meter(mut frames: watch::Receiver<RenderState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut drawn = false;
        while frames.changed().await.is_ok() {
            let state = *frames.borrow_and_update();
            if state.active || state.mouth > 0.01 {
                eprint!("\r{}", meter_line(&state));
                drawn = true;
            } else if drawn {
                eprint!("\r{:60}\r", "");
                drawn = false;
            }
        }
    })
}

fn meter_line(state: &RenderState) -> String {
    const WIDTH: usize = 30;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let filled = (state.mouth * WIDTH as f32).round().min(WIDTH as f32) as usize;
    format!(
        "mouth [{}{}] smile {:.2}",
        "█".repeat(filled),
        " ".repeat(WIDTH - filled),
        state.smile
    )
}

#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn test_tone(rate: u32, frequency: f32, seconds: f32) -> Vec<f32> {
    let count = (rate as f32 * seconds) as usize;
    (0..count)
        .map(|i| {
            let t = i as f32 / rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect()
}
