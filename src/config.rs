//! Configuration constants for the voice recorder
//! Values a user may tune live in `settings.json`; these are the fixed ones.

use std::time::Duration;

/// Identifiers used to locate per-user directories
pub const QUALIFIER: &str = "com";
pub const ORGANIZATION: &str = "voicerecorder";
pub const APPLICATION: &str = "voice_recorder";

pub const SETTINGS_FILE: &str = "settings.json";
pub const RECORDS_DIR: &str = "records";

/// WAV output format
pub const BITS_PER_SAMPLE: u16 = 16;
pub const RECORD_EXTENSION: &str = "wav";

/// Extensions shown in the records list
pub const AUDIO_EXTENSIONS: [&str; 3] = ["wav", "mp3", "ogg"];

/// Recorder defaults
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;
pub const DEFAULT_CHANNELS: u16 = 2;
pub const DEFAULT_FRAMES_PER_BUFFER: u32 = 1024;
pub const DEFAULT_DURATION_SECS: u32 = 5;
pub const DEFAULT_FILENAME: &str = "record";

pub const MAX_CHANNELS: u16 = 32;

/// How often the capture worker checks the stop flag while waiting for frames
pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);
