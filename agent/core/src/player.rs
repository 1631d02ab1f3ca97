//! Display Controller (consumer)
//!
//! Drives validated animations on the display, one at a time, at the
//! configured frame rate. In continuous mode it drains the
//! [`AnimationQueue`] and never fails on an empty queue: while waiting it
//! shows a loading bar (before the first animation) or an animated
//! placeholder. In single-shot and replay modes it loops a fixed set of
//! animations until shutdown.
//!
//! Script execution and frame pacing happen on the blocking pool; shutdown
//! reaches the running script through its cancellation handle and is
//! observed within one frame.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::animation::{Animation, AnimationId};
use crate::display::{center_line, CapturingDisplay, DisplayDriver, SharedDisplay};
use crate::error::PipelineError;
use crate::generator::{capture_path, SOURCE_EXTENSION};
use crate::progress::{ProgressSnapshot, ProgressTracker};
use crate::queue::AnimationQueue;
use crate::sandbox::{InvokeParams, RunOutcome, Sandbox};
use crate::shutdown::Shutdown;

/// Pause between animations after clearing
const INTER_ANIMATION_GAP: Duration = Duration::from_millis(200);

/// Extra wall-clock allowance beyond twice the duration
const PLAYBACK_SLACK: Duration = Duration::from_secs(5);

/// Cells in the loading bar
const BAR_CELLS: usize = 10;

/// Playback parameters
#[derive(Clone, Debug)]
pub struct PlaybackSettings {
    /// Seconds each animation plays
    pub duration_secs: f64,
    /// Frames per second
    pub frame_rate: u32,
    /// Where playback captures are written
    pub output_dir: PathBuf,
    /// Write playback captures
    pub capture_frames: bool,
}

impl PlaybackSettings {
    /// Frames played per animation
    #[must_use]
    pub fn frame_budget(&self) -> u64 {
        (self.duration_secs * f64::from(self.frame_rate)).round().max(1.0) as u64
    }

    /// Wall-clock ceiling for one animation
    #[must_use]
    pub fn time_ceiling(&self) -> Duration {
        Duration::from_secs_f64(self.duration_secs.max(0.0) * 2.0) + PLAYBACK_SLACK
    }

    fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.frame_rate.max(1)))
    }
}

/// How one playback ended
#[derive(Clone, Debug, PartialEq)]
pub enum PlayResult {
    /// Ran to completion or to the frame budget
    Finished {
        /// Frames drawn
        frames: u64,
    },
    /// Shutdown stopped it
    Interrupted {
        /// Frames drawn
        frames: u64,
    },
    /// The script faulted or could not be loaded
    Failed {
        /// Failure text
        error: String,
    },
}

/// Frame for the loading screen: `LOADING nnn%` over a 10-cell bar
#[must_use]
pub fn loading_frame(snapshot: &ProgressSnapshot) -> (String, String) {
    let percent = usize::from(snapshot.percent());
    let filled = (percent * BAR_CELLS / 100).min(BAR_CELLS);
    let bar = format!("[{}{}]", "█".repeat(filled), " ".repeat(BAR_CELLS - filled));
    (
        center_line(&format!("LOADING {percent:>3}%")),
        center_line(&bar),
    )
}

/// Frame for the placeholder shown while the queue is empty
#[must_use]
pub fn placeholder_frame(tick: u64) -> (String, String) {
    const SPINNER: [char; 4] = ['|', '/', '-', '\\'];
    let dots = ".".repeat((tick % 4) as usize + 1);
    (
        center_line(&format!("GENERATING{dots:<4}")),
        center_line(&SPINNER[(tick % 4) as usize].to_string()),
    )
}

/// The consumer worker
pub struct DisplayController {
    display: Arc<Mutex<CapturingDisplay>>,
    sandbox: Arc<dyn Sandbox>,
    settings: PlaybackSettings,
    progress: Option<Arc<ProgressTracker>>,
    shutdown: Shutdown,
    played: AtomicU64,
}

impl DisplayController {
    /// Controller over a display driver
    pub fn new(
        driver: Box<dyn DisplayDriver>,
        sandbox: Arc<dyn Sandbox>,
        settings: PlaybackSettings,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            display: Arc::new(Mutex::new(CapturingDisplay::new(driver))),
            sandbox,
            settings,
            progress: None,
            shutdown,
            played: AtomicU64::new(0),
        }
    }

    /// Show generation progress on the loading screen
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<ProgressTracker>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Animations played so far
    #[must_use]
    pub fn played(&self) -> u64 {
        self.played.load(Ordering::Relaxed)
    }

    /// Play one animation once
    ///
    /// When `capture_suffix` is set and captures are enabled, the frames are
    /// written to `frame_captures/<id><suffix>.jsonl`.
    pub async fn play(&self, animation: &mut Animation, capture_suffix: Option<&str>) -> PlayResult {
        animation.mark_playing();
        let capture = capture_suffix.filter(|_| self.settings.capture_frames);

        let sandbox = Arc::clone(&self.sandbox);
        let display = Arc::clone(&self.display);
        let source = animation.source.clone();
        let entry = animation.entry_point.clone();
        let id = animation.id.as_str().to_string();
        let recording = capture.is_some();
        let params = InvokeParams::new(self.settings.duration_secs)
            .with_frame_budget(self.settings.frame_budget())
            .with_time_ceiling(self.settings.time_ceiling())
            .with_cancel(self.shutdown.clone());

        tracing::info!(
            animation_id = %animation.id,
            description = %animation.description,
            "Playing"
        );

        let task = tokio::task::spawn_blocking(move || {
            let program = sandbox.load(&source, &entry)?;
            if recording {
                display.lock().begin(&id);
            }
            let shared: SharedDisplay = display.clone();
            let outcome = program.invoke(shared, &params);
            let captured = display.lock().finish();
            outcome.map(|outcome| (outcome, captured))
        });

        let result = match task.await {
            Ok(Ok((outcome, captured))) => {
                if let (Some(suffix), Some(captured)) = (capture, captured) {
                    let path = capture_path(&self.settings.output_dir, animation.id.as_str(), suffix);
                    let mut extra = serde_json::Map::new();
                    extra.insert("idea".into(), animation.description.clone().into());
                    extra.insert("playback".into(), true.into());
                    match captured.save_jsonl(&path, extra) {
                        Ok(()) => tracing::debug!(path = %path.display(), "Playback capture saved"),
                        Err(e) => tracing::warn!(error = %e, "Failed to save playback capture"),
                    }
                }
                match outcome {
                    RunOutcome::Cancelled { frames } => PlayResult::Interrupted { frames },
                    other => PlayResult::Finished {
                        frames: other.frames(),
                    },
                }
            }
            Ok(Err(e)) => PlayResult::Failed {
                error: e.to_string(),
            },
            Err(e) => PlayResult::Failed {
                error: format!("playback task failed: {e}"),
            },
        };

        match &result {
            PlayResult::Finished { frames } => {
                tracing::debug!(animation_id = %animation.id, frames, "Playback finished");
            }
            PlayResult::Interrupted { frames } => {
                tracing::info!(animation_id = %animation.id, frames, "Playback interrupted");
            }
            PlayResult::Failed { error } => {
                tracing::warn!(animation_id = %animation.id, error = %error, "Playback failed");
            }
        }

        animation.retire();
        self.played.fetch_add(1, Ordering::Relaxed);
        self.clear_between().await;
        result
    }

    async fn clear_between(&self) {
        if let Err(e) = self.display.lock().clear() {
            tracing::warn!(error = %e, "Failed to clear display");
        }
        tokio::select! {
            () = tokio::time::sleep(INTER_ANIMATION_GAP) => {}
            () = self.shutdown.wait() => {}
        }
    }

    fn show(&self, (line1, line2): (String, String)) {
        if let Err(e) = self.display.lock().write_frame(&line1, &line2) {
            tracing::warn!(error = %e, "Failed to draw status frame");
        }
    }

    /// Render the loading screen once from the current progress
    pub fn show_loading(&self) {
        if let Some(progress) = &self.progress {
            self.show(loading_frame(&progress.snapshot()));
        }
    }

    /// Wait for the next queued animation, drawing status frames meanwhile
    async fn next_animation(&self, queue: &AnimationQueue) -> Option<Animation> {
        if let Some(animation) = queue.try_get() {
            return Some(animation);
        }

        let first = self.played() == 0;
        tracing::debug!(first, "Queue empty, waiting");

        let get = queue.get();
        tokio::pin!(get);
        let mut ticker = tokio::time::interval(self.settings.frame_interval());
        let mut tick = 0u64;

        loop {
            tokio::select! {
                animation = &mut get => return animation,
                () = self.shutdown.wait() => return None,
                _ = ticker.tick() => {
                    if first && self.progress.is_some() {
                        self.show_loading();
                    } else {
                        self.show(placeholder_frame(tick));
                    }
                    tick += 1;
                }
            }
        }
    }

    /// Play queued animations until shutdown
    ///
    /// Returns the number of animations played.
    pub async fn run_queue(&self, queue: &AnimationQueue) -> u64 {
        let mut count = 0;
        while !self.shutdown.is_triggered() {
            let Some(mut animation) = self.next_animation(queue).await else {
                break;
            };
            tracing::debug!(queue_len = queue.len(), "Dequeued animation");
            if let PlayResult::Interrupted { .. } =
                self.play(&mut animation, Some("_playback")).await
            {
                break;
            }
            count += 1;
        }
        tracing::info!(played = count, "Display controller stopped");
        count
    }

    /// Loop one animation until shutdown, capturing only the first loop
    pub async fn run_single(&self, mut animation: Animation) -> u64 {
        let mut loops = 0;
        while !self.shutdown.is_triggered() {
            let suffix = (loops == 0).then_some("_playback");
            match self.play(&mut animation, suffix).await {
                PlayResult::Interrupted { .. } => break,
                PlayResult::Failed { .. } if loops == 0 => break,
                _ => loops += 1,
            }
        }
        tracing::info!(loops, "Single-shot playback stopped");
        loops
    }

    /// Loop every playable `anim_*` script in a directory until shutdown
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Input`] if the directory cannot be read or
    /// holds no playable animations.
    pub async fn replay(&self, dir: &Path) -> Result<u64, PipelineError> {
        let mut animations = self.load_replay_dir(dir)?;
        tracing::info!(count = animations.len(), dir = %dir.display(), "Replaying animations");

        let mut passes = 0u64;
        'outer: while !self.shutdown.is_triggered() {
            for animation in &mut animations {
                let suffix = (passes == 0).then_some("_replay");
                if let PlayResult::Interrupted { .. } = self.play(animation, suffix).await {
                    break 'outer;
                }
                if self.shutdown.is_triggered() {
                    break 'outer;
                }
            }
            passes += 1;
        }
        Ok(passes)
    }

    fn load_replay_dir(&self, dir: &Path) -> Result<Vec<Animation>, PipelineError> {
        let input_err = |source| PipelineError::Input {
            path: dir.to_path_buf(),
            source,
        };

        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
            .map_err(input_err)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension().is_some_and(|ext| ext == SOURCE_EXTENSION)
                    && path
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .is_some_and(|s| s.starts_with("anim_"))
            })
            .collect();
        paths.sort();

        let mut animations = Vec::new();
        for path in paths {
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let source = match std::fs::read_to_string(&path) {
                Ok(source) => source,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable script");
                    continue;
                }
            };
            match self.sandbox.load(&source, stem) {
                Ok(program) => animations.push(Animation::new(
                    AnimationId::new(stem),
                    source,
                    program.entry_point(),
                    format!("replay of {stem}"),
                )),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping script that fails to load");
                }
            }
        }

        if animations.is_empty() {
            return Err(input_err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no playable anim_*.rhai scripts",
            )));
        }
        Ok(animations)
    }
}
