//! `ffmpeg` transcoder
//!
//! Every call works inside its own `voice-XXXXXX` directory under the speech
//! temp root. The directory is a [`tempfile::TempDir`], so it disappears when
//! the call returns, fails, or is cancelled by a deadline.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{SpeechError, SynthesizedAudio, Transcoder};

/// Transcodes to OGG/Opus by shelling out to `ffmpeg`
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    binary: String,
    bitrate: String,
    temp_root: PathBuf,
}

impl FfmpegTranscoder {
    pub fn new(binary: impl Into<String>, bitrate: impl Into<String>, temp_root: &Path) -> Self {
        Self {
            binary: binary.into(),
            bitrate: bitrate.into(),
            temp_root: temp_root.to_path_buf(),
        }
    }

    fn input_args(audio: &SynthesizedAudio, input: &Path) -> Vec<String> {
        let mut args = Vec::new();
        if let SynthesizedAudio::Pcm {
            sample_rate,
            channels,
            ..
        } = audio
        {
            args.extend([
                "-f".to_string(),
                "s16le".to_string(),
                "-ar".to_string(),
                sample_rate.to_string(),
                "-ac".to_string(),
                channels.to_string(),
            ]);
        }
        args.push("-i".to_string());
        args.push(input.to_string_lossy().into_owned());
        args
    }

    fn output_args(&self, output: &Path) -> Vec<String> {
        vec![
            "-c:a".to_string(),
            "libopus".to_string(),
            "-b:a".to_string(),
            self.bitrate.clone(),
            "-vbr".to_string(),
            "on".to_string(),
            "-application".to_string(),
            "voip".to_string(),
            output.to_string_lossy().into_owned(),
        ]
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn to_voice_note(&self, audio: SynthesizedAudio) -> Result<Vec<u8>, SpeechError> {
        tokio::fs::create_dir_all(&self.temp_root).await?;
        let workdir = tempfile::Builder::new()
            .prefix("voice-")
            .tempdir_in(&self.temp_root)?;

        let (bytes, input_name) = match &audio {
            SynthesizedAudio::Pcm { samples, .. } => (samples.as_slice(), "input.pcm".to_string()),
            SynthesizedAudio::Encoded { bytes, format } => {
                (bytes.as_slice(), format!("input.{}", format.extension()))
            }
        };
        let input = workdir.path().join(input_name);
        let output = workdir.path().join("voice.ogg");

        tokio::fs::write(&input, bytes).await?;

        let mut args = vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-y".to_string(),
        ];
        args.extend(Self::input_args(&audio, &input));
        args.extend(self.output_args(&output));

        debug!("Running {} {}", self.binary, args.join(" "));

        let result = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await;

        match result {
            Ok(out) if out.status.success() => {
                let encoded = tokio::fs::read(&output).await.map_err(|e| {
                    SpeechError::Transcode(format!("ffmpeg produced no output: {}", e))
                })?;
                Ok(encoded)
            }
            Ok(out) => {
                let err = String::from_utf8_lossy(&out.stderr);
                warn!("ffmpeg failed: {}", err.trim());
                Err(SpeechError::Transcode(format!(
                    "ffmpeg exited with {}: {}",
                    out.status,
                    err.trim()
                )))
            }
            Err(e) => Err(SpeechError::Transcode(format!(
                "Failed to execute {}: {}",
                self.binary, e
            ))),
        }
    }

    async fn check_health(&self) -> bool {
        Command::new(&self.binary)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }
}
