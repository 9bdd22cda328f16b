//! Settings file and command-line overrides.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;

use livestream_config::{AudioConfig, Orientation, VideoConfig};
use livestream_engine::{LiveStreamOptions, DEFAULT_RTMP_URL};

#[derive(Parser, Debug)]
#[command(name = "livestream")]
#[command(about = "Stream to an RTMP or SRT ingest", long_about = None)]
pub struct Args {
    /// JSON settings file
    #[arg(long, env = "LIVESTREAM_SETTINGS")]
    pub settings: Option<PathBuf>,

    /// Ingest URL (rtmp:// or srt://)
    #[arg(long, env = "LIVESTREAM_URL", default_value = DEFAULT_RTMP_URL)]
    pub url: String,

    /// Stream key
    #[arg(long, env = "LIVESTREAM_STREAM_KEY")]
    pub stream_key: String,

    /// Video size as WIDTHxHEIGHT (e.g. 1280x720)
    #[arg(long, env = "LIVESTREAM_RESOLUTION")]
    pub resolution: Option<String>,

    /// Video bitrate in bits per second
    #[arg(long, env = "LIVESTREAM_VIDEO_BITRATE")]
    pub video_bitrate: Option<u32>,

    /// Audio bitrate in bits per second
    #[arg(long, env = "LIVESTREAM_AUDIO_BITRATE")]
    pub audio_bitrate: Option<u32>,

    /// Stream in landscape orientation
    #[arg(long, env = "LIVESTREAM_LANDSCAPE", default_value = "false")]
    pub landscape: bool,

    /// Stop after this many seconds
    #[arg(long, env = "LIVESTREAM_DURATION")]
    pub duration: Option<u64>,
}

impl Args {
    /// Apply command-line overrides on top of the settings file.
    pub fn apply(&self, options: &mut LiveStreamOptions) -> Result<()> {
        if let Some(resolution) = &self.resolution {
            let (width, height) = parse_size(resolution)?;
            options.video = Some(VideoConfig::from_size(width, height)?);
        }

        if let Some(bitrate) = self.video_bitrate {
            let video = options.video.clone().unwrap_or_default();
            options.video = Some(video.with_bitrate(bitrate));
        }

        if let Some(bitrate) = self.audio_bitrate {
            options.audio = Some(AudioConfig::new(bitrate));
        }

        if self.landscape {
            options.orientation = Orientation::LandscapeLeft;
        }

        Ok(())
    }
}

fn parse_size(value: &str) -> Result<(u32, u32)> {
    let (width, height) = value
        .split_once(['x', 'X'])
        .with_context(|| format!("Expected WIDTHxHEIGHT, got '{}'", value))?;
    let width = width
        .trim()
        .parse()
        .with_context(|| format!("Invalid width in '{}'", value))?;
    let height = height
        .trim()
        .parse()
        .with_context(|| format!("Invalid height in '{}'", value))?;
    Ok((width, height))
}

/// Load options from a JSON file, or defaults without one.
pub fn load(path: Option<&Path>) -> Result<LiveStreamOptions> {
    let Some(path) = path else {
        return Ok(LiveStreamOptions::default());
    };

    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings from {}", path.display()))?;
    let options = serde_json::from_str(&contents)
        .with_context(|| format!("Invalid settings in {}", path.display()))?;
    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use livestream_config::Resolution;

    #[test]
    fn test_load_settings_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "audio": {{"bitrate": 96000}},
                "orientation": "LandscapeRight",
                "camera": {{"id": "cam1", "position": "Back", "max_zoom": 4.0}}
            }}"#
        )
        .unwrap();

        let options = load(Some(file.path())).unwrap();
        assert_eq!(options.audio.unwrap().bitrate, 96_000);
        assert_eq!(options.orientation, Orientation::LandscapeRight);
        assert_eq!(options.camera.unwrap().id, "cam1");
        assert!(options.video.is_some());
    }

    #[test]
    fn test_load_without_file() {
        assert_eq!(load(None).unwrap(), LiveStreamOptions::default());
    }

    #[test]
    fn test_load_rejects_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();

        assert!(load(Some(&path)).is_err());
        assert!(load(Some(&dir.path().join("missing.json"))).is_err());
    }

    #[test]
    fn test_overrides() {
        let args = Args::try_parse_from([
            "livestream",
            "--stream-key",
            "key1",
            "--resolution",
            "640x360",
            "--video-bitrate",
            "900000",
            "--landscape",
        ])
        .unwrap();
        assert_eq!(args.url, DEFAULT_RTMP_URL);

        let mut options = LiveStreamOptions::default();
        args.apply(&mut options).unwrap();

        let video = options.video.unwrap();
        assert_eq!(video.resolution, Resolution::Wide360p);
        assert_eq!(video.bitrate, 900_000);
        assert_eq!(options.orientation, Orientation::LandscapeLeft);
    }

    #[test]
    fn test_unsupported_resolution() {
        let args = Args::try_parse_from([
            "livestream",
            "--stream-key",
            "key1",
            "--resolution",
            "1000x1000",
        ])
        .unwrap();

        assert!(args.apply(&mut LiveStreamOptions::default()).is_err());
        assert!(parse_size("1280by720").is_err());
    }
}
