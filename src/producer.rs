//! Record production: capture, name, persist
//!
//! A recording runs on one worker thread that owns the capture stream and
//! watches a stop flag. When the flag is raised (or a fixed duration has been
//! captured) the worker closes the stream, picks a free file name and writes
//! the WAV file. The caller never has to block on the stream itself.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::audio::{AudioError, Capture, CaptureParams, CpalCapture};
use crate::config::STOP_POLL_INTERVAL;
use crate::naming::generate_unique_name;
use crate::settings::RecorderSettings;
use crate::writer::write_record;

/// Attempts at claiming a fresh file name before giving up
const NAME_ATTEMPTS: usize = 16;

#[derive(Error, Debug)]
pub enum RecorderError {
    #[error(transparent)]
    Audio(#[from] AudioError),
    #[error("Failed to write record: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to encode WAV: {0}")]
    Wav(#[from] hound::Error),
    #[error("Recording already in progress")]
    AlreadyRecording,
    #[error("Not currently recording")]
    NotRecording,
    #[error("No audio captured")]
    NothingCaptured,
    #[error("Recording worker panicked")]
    WorkerPanicked,
}

/// Everything a worker needs to produce one record
#[derive(Debug, Clone)]
struct CaptureJob {
    params: CaptureParams,
    records_dir: PathBuf,
    stem: String,
    /// Stop by itself after this many seconds
    duration: Option<u32>,
}

/// A recording that has been told to stop but may still be writing its file.
pub struct PendingRecord {
    handle: JoinHandle<Result<PathBuf, RecorderError>>,
}

impl PendingRecord {
    /// Blocks until the worker has written the file.
    pub fn wait(self) -> Result<PathBuf, RecorderError> {
        self.handle
            .join()
            .map_err(|_| RecorderError::WorkerPanicked)?
    }

    /// Waits on a helper thread and hands the outcome to `on_done`. Joining the
    /// returned handle guarantees the file is finished.
    pub fn wait_in_background<F>(self, on_done: F) -> io::Result<JoinHandle<()>>
    where
        F: FnOnce(Result<PathBuf, RecorderError>) + Send + 'static,
    {
        thread::Builder::new()
            .name("record-saver".into())
            .spawn(move || on_done(self.wait()))
    }
}

pub struct RecordProducer<C: Capture = CpalCapture> {
    capture: Arc<C>,
    settings: RecorderSettings,
    records_dir: PathBuf,
    stop_flag: Arc<AtomicBool>,
    worker: Option<JoinHandle<Result<PathBuf, RecorderError>>>,
}

impl<C: Capture> RecordProducer<C> {
    pub fn new(capture: C, settings: RecorderSettings, records_dir: PathBuf) -> Self {
        Self {
            capture: Arc::new(capture),
            settings,
            records_dir,
            stop_flag: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    pub fn records_dir(&self) -> &Path {
        &self.records_dir
    }

    pub fn settings(&self) -> &RecorderSettings {
        &self.settings
    }

    /// Swaps in new settings; refused while a recording is running.
    pub fn reconfigure(&mut self, settings: RecorderSettings, records_dir: PathBuf) -> Result<(), RecorderError> {
        if self.worker.is_some() {
            return Err(RecorderError::AlreadyRecording);
        }
        self.settings = settings;
        self.records_dir = records_dir;
        Ok(())
    }

    /// True while a worker is still capturing or writing.
    pub fn is_recording(&self) -> bool {
        self.worker.as_ref().is_some_and(|worker| !worker.is_finished())
    }

    /// Starts an open-ended recording on a worker thread.
    pub fn start_recording(&mut self) -> Result<(), RecorderError> {
        self.spawn_worker(None)
    }

    /// Starts a recording that stops by itself after the configured duration.
    pub fn start_timed_recording(&mut self) -> Result<(), RecorderError> {
        self.spawn_worker(Some(self.settings.duration))
    }

    /// Raises the stop flag and hands back the worker without waiting for it.
    pub fn stop_recording(&mut self) -> Result<PendingRecord, RecorderError> {
        let handle = self.worker.take().ok_or(RecorderError::NotRecording)?;
        self.stop_flag.store(true, Ordering::Release);
        tracing::info!("Stop requested");
        Ok(PendingRecord { handle })
    }

    pub fn stop_and_wait(&mut self) -> Result<PathBuf, RecorderError> {
        self.stop_recording()?.wait()
    }

    /// Takes the worker once it has finished by itself (timed recordings).
    pub fn take_finished(&mut self) -> Option<PendingRecord> {
        if self.worker.as_ref()?.is_finished() {
            self.worker.take().map(|handle| PendingRecord { handle })
        } else {
            None
        }
    }

    /// Records for the configured duration on the calling thread.
    pub fn produce_record(&self) -> Result<PathBuf, RecorderError> {
        if self.worker.is_some() {
            return Err(RecorderError::AlreadyRecording);
        }
        let never_stop = AtomicBool::new(false);
        run_capture(&*self.capture, &self.job(Some(self.settings.duration)), &never_stop)
    }

    fn job(&self, duration: Option<u32>) -> CaptureJob {
        CaptureJob {
            params: CaptureParams::from(&self.settings),
            records_dir: self.records_dir.clone(),
            stem: self.settings.default_filename.trim().to_string(),
            duration,
        }
    }

    fn spawn_worker(&mut self, duration: Option<u32>) -> Result<(), RecorderError> {
        if self.worker.is_some() {
            return Err(RecorderError::AlreadyRecording);
        }

        // A fresh flag per worker: a worker that is still draining after an
        // earlier stop must not be revived by this one.
        let stop_flag = Arc::new(AtomicBool::new(false));
        self.stop_flag = stop_flag.clone();

        let capture = self.capture.clone();
        let job = self.job(duration);

        let handle = thread::Builder::new()
            .name("record-worker".into())
            .spawn(move || {
                let result = run_capture(&*capture, &job, &stop_flag);
                match &result {
                    Ok(path) => tracing::info!(path = %path.display(), "Record saved"),
                    Err(e) => tracing::error!("Recording failed: {}", e),
                }
                result
            })?;

        self.worker = Some(handle);
        tracing::info!(?duration, "Recording started");
        Ok(())
    }
}

impl<C: Capture> Drop for RecordProducer<C> {
    fn drop(&mut self) {
        // Let an unfinished worker save what it has instead of capturing forever.
        if self.worker.is_some() {
            self.stop_flag.store(true, Ordering::Release);
        }
    }
}

/// The whole pipeline for one record: open, collect until stopped, close,
/// name, write.
fn run_capture<C: Capture + ?Sized>(
    capture: &C,
    job: &CaptureJob,
    stop: &AtomicBool,
) -> Result<PathBuf, RecorderError> {
    let (tx, rx) = mpsc::channel();
    let stream = capture.open(&job.params, tx)?;
    let format = stream.format();
    let limit = job.duration.map(|secs| format.samples_for(secs));
    // A stalled device must not keep a timed recording open forever.
    let deadline = job
        .duration
        .map(|secs| Instant::now() + Duration::from_secs(u64::from(secs)));

    let mut frames: Vec<Vec<i16>> = Vec::new();
    let mut collected = 0usize;

    loop {
        if stop.load(Ordering::Acquire)
            || limit.is_some_and(|limit| collected >= limit)
            || deadline.is_some_and(|deadline| Instant::now() >= deadline)
        {
            break;
        }
        match rx.recv_timeout(STOP_POLL_INTERVAL) {
            Ok(frame) => {
                collected += frame.len();
                frames.push(frame);
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    // Closing the stream drops its sender; whatever it queued before that is kept.
    drop(stream);
    for frame in rx.try_iter() {
        collected += frame.len();
        frames.push(frame);
    }

    let channels = usize::from(format.channels.max(1));
    let keep = limit.map_or(collected, |limit| collected.min(limit));
    truncate_frames(&mut frames, keep - keep % channels);

    if frames.is_empty() {
        return Err(RecorderError::NothingCaptured);
    }

    tracing::debug!(
        samples = keep - keep % channels,
        frames = frames.len(),
        "Capture finished"
    );

    persist(&job.records_dir, &job.stem, |path| write_record(path, format, &frames))
}

/// Shortens `frames` so they hold exactly `len` samples, dropping empty frames.
fn truncate_frames(frames: &mut Vec<Vec<i16>>, len: usize) {
    let mut remaining = len;
    frames.retain_mut(|frame| {
        frame.truncate(remaining);
        remaining -= frame.len();
        !frame.is_empty()
    });
}

/// Claims a free name and writes to it, probing again if another writer took
/// the name in between.
fn persist<F>(dir: &Path, stem: &str, mut write: F) -> Result<PathBuf, RecorderError>
where
    F: FnMut(&Path) -> Result<(), RecorderError>,
{
    let mut last_err = None;
    for _ in 0..NAME_ATTEMPTS {
        let path = generate_unique_name(dir, stem);
        match write(&path) {
            Ok(()) => return Ok(path),
            Err(RecorderError::Io(e)) if e.kind() == io::ErrorKind::AlreadyExists => {
                tracing::debug!(path = %path.display(), "Name taken while writing, probing again");
                last_err = Some(RecorderError::Io(e));
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or(RecorderError::NothingCaptured))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{OpenCapture, StreamFormat};
    use hound::WavReader;
    use std::fs;
    use std::sync::mpsc::Sender;
    use tempfile::TempDir;

    /// Queues `frames` on open. With `hold_open` the stream stays alive until
    /// the handle is dropped, like a real microphone.
    struct FakeCapture {
        format: StreamFormat,
        frames: Vec<Vec<i16>>,
        hold_open: bool,
    }

    impl FakeCapture {
        fn finite(frames: Vec<Vec<i16>>) -> Self {
            Self {
                format: StreamFormat { sample_rate: 8000, channels: 1 },
                frames,
                hold_open: false,
            }
        }

        fn endless(frames: Vec<Vec<i16>>) -> Self {
            Self { hold_open: true, ..Self::finite(frames) }
        }
    }

    impl Capture for FakeCapture {
        fn open(&self, _params: &CaptureParams, sink: Sender<Vec<i16>>) -> Result<OpenCapture, AudioError> {
            for frame in &self.frames {
                sink.send(frame.clone()).unwrap();
            }
            if self.hold_open {
                Ok(OpenCapture::new(self.format, sink))
            } else {
                Ok(OpenCapture::new(self.format, ()))
            }
        }
    }

    /// Produces frames from its own thread until the stream is dropped.
    struct StreamingCapture;

    struct StopOnDrop(Arc<AtomicBool>);

    impl Drop for StopOnDrop {
        fn drop(&mut self) {
            self.0.store(true, Ordering::Release);
        }
    }

    impl Capture for StreamingCapture {
        fn open(&self, params: &CaptureParams, sink: Sender<Vec<i16>>) -> Result<OpenCapture, AudioError> {
            let closed = Arc::new(AtomicBool::new(false));
            let closed_clone = closed.clone();
            let channels = params.channels as usize;
            thread::spawn(move || {
                while !closed_clone.load(Ordering::Acquire) {
                    if sink.send(vec![7; 64 * channels]).is_err() {
                        break;
                    }
                    thread::sleep(Duration::from_millis(1));
                }
            });
            let format = StreamFormat { sample_rate: params.sample_rate, channels: params.channels };
            Ok(OpenCapture::new(format, StopOnDrop(closed)))
        }
    }

    struct NoDevice;

    impl Capture for NoDevice {
        fn open(&self, _params: &CaptureParams, _sink: Sender<Vec<i16>>) -> Result<OpenCapture, AudioError> {
            Err(AudioError::NoInputDevice)
        }
    }

    struct BrokenBackend;

    impl Capture for BrokenBackend {
        fn open(&self, _params: &CaptureParams, _sink: Sender<Vec<i16>>) -> Result<OpenCapture, AudioError> {
            panic!("backend blew up");
        }
    }

    fn settings(duration: u32) -> RecorderSettings {
        RecorderSettings {
            freq: 8000,
            channels: 1,
            duration,
            default_filename: "take".into(),
            ..Default::default()
        }
    }

    fn read_samples(path: &Path) -> Vec<i16> {
        WavReader::open(path)
            .unwrap()
            .samples::<i16>()
            .map(Result::unwrap)
            .collect()
    }

    #[test]
    fn start_then_stop_writes_everything_captured() {
        let dir = TempDir::new().unwrap();
        let capture = FakeCapture::endless(vec![vec![1, 2, 3], vec![4, 5]]);
        let mut producer = RecordProducer::new(capture, settings(5), dir.path().to_path_buf());

        producer.start_recording().unwrap();
        assert!(producer.is_recording());
        thread::sleep(Duration::from_millis(20));

        let path = producer.stop_and_wait().unwrap();
        assert_eq!(path, dir.path().join("take_1.wav"));
        assert_eq!(read_samples(&path), vec![1, 2, 3, 4, 5]);
        assert!(!producer.is_recording());
    }

    #[test]
    fn consecutive_recordings_get_distinct_names() {
        let dir = TempDir::new().unwrap();
        let capture = FakeCapture::endless(vec![vec![9; 16]]);
        let mut producer = RecordProducer::new(capture, settings(5), dir.path().to_path_buf());

        producer.start_recording().unwrap();
        let first = producer.stop_recording().unwrap();
        // Restarting right away is allowed even though the first is still saving.
        producer.start_recording().unwrap();
        let second = producer.stop_recording().unwrap();

        let mut paths = vec![first.wait().unwrap(), second.wait().unwrap()];
        paths.sort();
        assert_eq!(paths, vec![dir.path().join("take_1.wav"), dir.path().join("take_2.wav")]);
    }

    #[test]
    fn existing_records_are_never_overwritten() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("take_1.wav"), b"older").unwrap();

        let mut producer =
            RecordProducer::new(FakeCapture::endless(vec![vec![1; 4]]), settings(5), dir.path().to_path_buf());
        producer.start_recording().unwrap();
        let path = producer.stop_and_wait().unwrap();

        assert_eq!(path, dir.path().join("take_2.wav"));
        assert_eq!(fs::read(dir.path().join("take_1.wav")).unwrap(), b"older");
    }

    #[test]
    fn double_start_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut producer =
            RecordProducer::new(FakeCapture::endless(vec![vec![1]]), settings(5), dir.path().to_path_buf());

        producer.start_recording().unwrap();
        assert!(matches!(producer.start_recording(), Err(RecorderError::AlreadyRecording)));
        assert!(matches!(producer.produce_record(), Err(RecorderError::AlreadyRecording)));
        producer.stop_and_wait().unwrap();
    }

    #[test]
    fn stop_without_start_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut producer =
            RecordProducer::new(FakeCapture::finite(vec![]), settings(5), dir.path().to_path_buf());

        assert!(matches!(producer.stop_recording(), Err(RecorderError::NotRecording)));
    }

    #[test]
    fn silence_is_not_saved() {
        let dir = TempDir::new().unwrap();
        let mut producer =
            RecordProducer::new(FakeCapture::endless(vec![]), settings(5), dir.path().to_path_buf());

        producer.start_recording().unwrap();
        assert!(matches!(producer.stop_and_wait(), Err(RecorderError::NothingCaptured)));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn device_errors_surface_from_wait() {
        let dir = TempDir::new().unwrap();
        let mut producer = RecordProducer::new(NoDevice, settings(5), dir.path().to_path_buf());

        producer.start_recording().unwrap();
        let result = producer.stop_and_wait();
        assert!(matches!(result, Err(RecorderError::Audio(AudioError::NoInputDevice))));
    }

    #[test]
    fn failed_open_is_collected_without_a_stop() {
        let dir = TempDir::new().unwrap();
        let mut producer = RecordProducer::new(NoDevice, settings(5), dir.path().to_path_buf());

        producer.start_recording().unwrap();
        let started = Instant::now();
        let pending = loop {
            if let Some(pending) = producer.take_finished() {
                break pending;
            }
            assert!(started.elapsed() < Duration::from_secs(5), "failed worker was never collected");
            thread::sleep(Duration::from_millis(5));
        };

        assert!(matches!(pending.wait(), Err(RecorderError::Audio(AudioError::NoInputDevice))));
        assert!(matches!(producer.stop_recording(), Err(RecorderError::NotRecording)));
    }

    #[test]
    fn worker_panic_is_reported() {
        let dir = TempDir::new().unwrap();
        let mut producer = RecordProducer::new(BrokenBackend, settings(5), dir.path().to_path_buf());

        producer.start_recording().unwrap();
        assert!(matches!(producer.stop_and_wait(), Err(RecorderError::WorkerPanicked)));
        // The producer is usable again afterwards.
        assert!(!producer.is_recording());
    }

    #[test]
    fn timed_recording_of_a_silent_stream_ends_on_time() {
        let dir = TempDir::new().unwrap();
        let mut producer =
            RecordProducer::new(FakeCapture::endless(vec![]), settings(1), dir.path().to_path_buf());

        let started = Instant::now();
        producer.start_timed_recording().unwrap();
        let pending = loop {
            if let Some(pending) = producer.take_finished() {
                break pending;
            }
            assert!(started.elapsed() < Duration::from_secs(5), "timed recording never finished");
            thread::sleep(Duration::from_millis(10));
        };

        assert!(matches!(pending.wait(), Err(RecorderError::NothingCaptured)));
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn produce_record_of_a_silent_stream_returns() {
        let dir = TempDir::new().unwrap();
        let producer =
            RecordProducer::new(FakeCapture::endless(vec![]), settings(1), dir.path().to_path_buf());

        assert!(matches!(producer.produce_record(), Err(RecorderError::NothingCaptured)));
    }

    #[test]
    fn background_wait_finishes_the_file_before_join_returns() {
        let dir = TempDir::new().unwrap();
        let mut producer =
            RecordProducer::new(FakeCapture::endless(vec![vec![2; 32]]), settings(5), dir.path().to_path_buf());

        producer.start_recording().unwrap();
        let pending = producer.stop_recording().unwrap();

        let (tx, rx) = mpsc::channel();
        let saver = pending
            .wait_in_background(move |result| tx.send(result).unwrap())
            .unwrap();
        saver.join().unwrap();

        let path = rx.try_recv().unwrap().unwrap();
        assert_eq!(read_samples(&path), vec![2; 32]);
    }

    #[test]
    fn produce_record_stops_at_the_duration() {
        let dir = TempDir::new().unwrap();
        // 1 s at 8 kHz mono is 8000 samples; offer more than that.
        let frames = vec![vec![3; 3000], vec![4; 3000], vec![5; 3000]];
        let producer =
            RecordProducer::new(FakeCapture::endless(frames), settings(1), dir.path().to_path_buf());

        let path = producer.produce_record().unwrap();
        let samples = read_samples(&path);
        assert_eq!(samples.len(), 8000);
        assert_eq!(samples[0], 3);
        assert_eq!(samples[7999], 5);
    }

    #[test]
    fn produce_record_keeps_a_short_stream() {
        let dir = TempDir::new().unwrap();
        let producer =
            RecordProducer::new(FakeCapture::finite(vec![vec![1; 100]]), settings(1), dir.path().to_path_buf());

        assert_eq!(read_samples(&producer.produce_record().unwrap()).len(), 100);
    }

    #[test]
    fn timed_recording_finishes_by_itself() {
        let dir = TempDir::new().unwrap();
        let mut settings = settings(1);
        settings.channels = 2;
        let mut producer = RecordProducer::new(StreamingCapture, settings, dir.path().to_path_buf());

        producer.start_timed_recording().unwrap();
        let pending = loop {
            if let Some(pending) = producer.take_finished() {
                break pending;
            }
            thread::sleep(Duration::from_millis(10));
        };

        let path = pending.wait().unwrap();
        let reader = WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.len(), 16_000);
    }

    #[test]
    fn partial_sample_frames_are_trimmed() {
        let dir = TempDir::new().unwrap();
        let capture = FakeCapture {
            format: StreamFormat { sample_rate: 8000, channels: 2 },
            frames: vec![vec![1, 2, 3]],
            hold_open: false,
        };
        let producer = RecordProducer::new(capture, settings(1), dir.path().to_path_buf());

        assert_eq!(read_samples(&producer.produce_record().unwrap()), vec![1, 2]);
    }

    #[test]
    fn truncate_frames_drops_the_tail() {
        let mut frames = vec![vec![1, 2, 3], vec![4, 5, 6], vec![7]];
        truncate_frames(&mut frames, 4);
        assert_eq!(frames, vec![vec![1, 2, 3], vec![4]]);

        truncate_frames(&mut frames, 0);
        assert!(frames.is_empty());
    }

    #[test]
    fn reconfigure_is_refused_while_recording() {
        let dir = TempDir::new().unwrap();
        let mut producer =
            RecordProducer::new(FakeCapture::endless(vec![vec![1]]), settings(5), dir.path().to_path_buf());

        producer.start_recording().unwrap();
        let moved = dir.path().join("elsewhere");
        assert!(matches!(
            producer.reconfigure(settings(2), moved.clone()),
            Err(RecorderError::AlreadyRecording)
        ));
        producer.stop_and_wait().unwrap();

        producer.reconfigure(settings(2), moved.clone()).unwrap();
        assert_eq!(producer.records_dir(), moved.as_path());
        assert_eq!(producer.settings().duration, 2);
    }
}
