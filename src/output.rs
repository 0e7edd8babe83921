use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::config::SpeechConfig;
use crate::error::{GuideError, Result};

/// Strength of a haptic pulse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HapticIntensity {
    Light,
    Medium,
    Heavy,
}

impl fmt::Display for HapticIntensity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HapticIntensity::Light => write!(f, "light"),
            HapticIntensity::Medium => write!(f, "medium"),
            HapticIntensity::Heavy => write!(f, "heavy"),
        }
    }
}

/// Longest wait for the final utterance once the session has ended
const FINAL_UTTERANCE_LIMIT: Duration = Duration::from_secs(5);

/// Requests the engine emits toward the platform
#[derive(Debug, Clone, PartialEq)]
pub enum OutputRequest {
    Speech(String),
    Haptic(HapticIntensity),
    Alert { title: String, message: String },
}

impl OutputRequest {
    pub fn speech(text: impl Into<String>) -> Self {
        OutputRequest::Speech(text.into())
    }

    pub fn alert(title: impl Into<String>, message: impl Into<String>) -> Self {
        OutputRequest::Alert {
            title: title.into(),
            message: message.into(),
        }
    }
}

/// Text-to-speech through an external program.
///
/// Holds at most one utterance: a new request kills and reaps the previous
/// process before starting its own.
pub struct Speaker {
    program: Option<(String, Vec<String>)>,
    current: Option<Child>,
}

impl Speaker {
    pub fn new(config: &SpeechConfig) -> Self {
        let program = config
            .enabled
            .then(|| (config.command.clone(), config.args.clone()));
        Speaker {
            program,
            current: None,
        }
    }

    /// Log-only speaker, used for replays and when no TTS backend exists
    pub fn silent() -> Self {
        Speaker {
            program: None,
            current: None,
        }
    }

    pub fn is_audible(&self) -> bool {
        self.program.is_some()
    }

    pub fn in_flight(&mut self) -> bool {
        match self.current.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Let the last utterance play out, killing it only after `limit`
    pub async fn finish(&mut self, limit: Duration) {
        if !self.in_flight() {
            self.current = None;
            return;
        }
        let Some(child) = self.current.as_mut() else {
            return;
        };
        match timeout(limit, child.wait()).await {
            Ok(Ok(status)) => debug!("Final utterance finished: {}", status),
            Ok(Err(e)) => debug!("Failed to wait for utterance: {}", e),
            Err(_) => {
                warn!("Final utterance still playing after {}s, stopping it", limit.as_secs());
                self.stop().await;
            }
        }
        self.current = None;
    }

    /// Stop any utterance still playing
    pub async fn stop(&mut self) {
        if let Some(mut child) = self.current.take() {
            if let Ok(None) = child.try_wait() {
                debug!("Interrupting previous utterance");
                if let Err(e) = child.kill().await {
                    debug!("Failed to stop utterance: {}", e);
                }
            }
        }
    }

    pub async fn speak(&mut self, text: &str) -> Result<()> {
        self.stop().await;
        info!("Speech: {}", text);

        let Some((command, args)) = &self.program else {
            return Ok(());
        };

        let child = Command::new(command)
            .args(args)
            .arg(text)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| GuideError::Speech(format!("{}: {}", command, e)))?;
        self.current = Some(child);
        Ok(())
    }
}

/// Renders output requests: speech through the speaker, haptics and alerts
/// through the log.
pub struct OutputDispatcher {
    speaker: Speaker,
    drain_limit: Duration,
}

impl OutputDispatcher {
    pub fn new(speaker: Speaker) -> Self {
        if !speaker.is_audible() {
            info!("No speech backend, utterances are only logged");
        }
        OutputDispatcher {
            speaker,
            drain_limit: FINAL_UTTERANCE_LIMIT,
        }
    }

    pub fn with_drain_limit(mut self, limit: Duration) -> Self {
        self.drain_limit = limit;
        self
    }

    pub async fn dispatch(&mut self, request: OutputRequest) {
        match request {
            OutputRequest::Speech(text) => {
                if let Err(e) = self.speaker.speak(&text).await {
                    warn!("Speech request failed: {}", e);
                }
            }
            OutputRequest::Haptic(intensity) => {
                info!("Haptic pulse: {}", intensity);
            }
            OutputRequest::Alert { title, message } => {
                warn!("Alert: {} - {}", title, message);
                eprintln!("[{}] {}", title, message);
            }
        }
    }

    /// Drain requests until every sender is gone.
    ///
    /// The last utterance (usually the goodbye) plays to completion, bounded
    /// by the drain limit.
    pub async fn run(mut self, mut rx: mpsc::Receiver<OutputRequest>) {
        while let Some(request) = rx.recv().await {
            self.dispatch(request).await;
        }
        self.speaker.finish(self.drain_limit).await;
        debug!("Output dispatcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_silent_speaker_never_spawns() {
        let mut speaker = Speaker::silent();
        assert!(!speaker.is_audible());
        speaker.speak("hello").await.unwrap();
        assert!(!speaker.in_flight());
    }

    #[tokio::test]
    async fn test_missing_backend_is_an_error() {
        let config = SpeechConfig {
            enabled: true,
            command: "definitely-not-a-tts-binary".to_string(),
            args: vec![],
        };
        let mut speaker = Speaker::new(&config);
        assert!(speaker.is_audible());
        assert!(matches!(
            speaker.speak("hello").await,
            Err(GuideError::Speech(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_new_utterance_replaces_previous() {
        let config = SpeechConfig {
            enabled: true,
            command: "sleep".to_string(),
            args: vec![],
        };
        let mut speaker = Speaker::new(&config);

        speaker.speak("5").await.unwrap();
        assert!(speaker.in_flight());
        speaker.speak("5").await.unwrap();
        assert!(speaker.in_flight());

        speaker.stop().await;
        assert!(!speaker.in_flight());
    }

    #[tokio::test]
    async fn test_dispatcher_swallows_failures() {
        let config = SpeechConfig {
            enabled: true,
            command: "definitely-not-a-tts-binary".to_string(),
            args: vec![],
        };
        let (tx, rx) = mpsc::channel(8);
        let handle = tokio::spawn(OutputDispatcher::new(Speaker::new(&config)).run(rx));

        tx.send(OutputRequest::speech("one")).await.unwrap();
        tx.send(OutputRequest::Haptic(HapticIntensity::Heavy)).await.unwrap();
        tx.send(OutputRequest::alert("Title", "Body")).await.unwrap();
        drop(tx);

        handle.await.unwrap();
    }

    #[cfg(unix)]
    fn marker_speaker(marker: &std::path::Path, delay: &str) -> Speaker {
        // Text lands in $1 and is ignored; the marker proves the run completed
        Speaker::new(&SpeechConfig {
            enabled: true,
            command: "sh".to_string(),
            args: vec![
                "-c".to_string(),
                format!("sleep {}; touch '{}'", delay, marker.display()),
                "speaker".to_string(),
            ],
        })
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_goodbye_plays_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("spoken");
        let dispatcher = OutputDispatcher::new(marker_speaker(&marker, "0.3"));

        let (tx, rx) = mpsc::channel(4);
        let handle = tokio::spawn(dispatcher.run(rx));
        tx.send(OutputRequest::speech("Audio guidance stopped.")).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        assert!(marker.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stuck_goodbye_is_cut_off() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("spoken");
        let dispatcher = OutputDispatcher::new(marker_speaker(&marker, "30"))
            .with_drain_limit(Duration::from_millis(200));

        let (tx, rx) = mpsc::channel(4);
        let handle = tokio::spawn(dispatcher.run(rx));
        tx.send(OutputRequest::speech("Audio guidance stopped.")).await.unwrap();
        drop(tx);

        timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
        assert!(!marker.exists());
    }
}
