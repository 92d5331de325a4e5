use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::models::{BatchEvent, Phase, PhaseStatus, RunOutcome};

const LOG_LINES: usize = 200;

#[derive(Debug, Clone, PartialEq)]
pub enum FileStatus {
    Pending,
    Working(Phase, f32),
    Done,
    Interrupted,
    Error(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum View {
    Main,
    About,
}

pub struct App {
    pub files: Vec<(String, FileStatus)>,
    /// Scan order, used to find a row by input path.
    paths: Vec<PathBuf>,
    job_rows: HashMap<String, usize>,
    pub input: PathBuf,
    pub output: PathBuf,
    pub view: View,
    pub selected: usize,
    pub scroll_offset: usize,
    pub should_quit: bool,
    pub paused: bool,
    pub completed: usize,
    pub skipped_dirs: usize,
    pub outcome: Option<RunOutcome>,
    pub log: VecDeque<String>,
    /// Visible height of the file table (updated each frame by the renderer)
    pub visible_rows: usize,
    pub started: Instant,
    pub finished_after: Option<Duration>,
}

impl App {
    pub fn new(paths: Vec<PathBuf>, input: PathBuf, output: PathBuf) -> Self {
        let files = paths
            .iter()
            .map(|p| {
                let name = p
                    .strip_prefix(&input)
                    .unwrap_or(p)
                    .display()
                    .to_string();
                (name, FileStatus::Pending)
            })
            .collect();
        Self {
            files,
            paths,
            job_rows: HashMap::new(),
            input,
            output,
            view: View::Main,
            selected: 0,
            scroll_offset: 0,
            should_quit: false,
            paused: false,
            completed: 0,
            skipped_dirs: 0,
            outcome: None,
            log: VecDeque::new(),
            visible_rows: 20,
            started: Instant::now(),
            finished_after: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    fn push_log(&mut self, line: String) {
        if self.log.len() == LOG_LINES {
            self.log.pop_front();
        }
        self.log.push_back(line);
    }

    fn row_for_job(&mut self, job_id: &str) -> Option<&mut (String, FileStatus)> {
        let row = *self.job_rows.get(job_id)?;
        self.files.get_mut(row)
    }

    /// Fold one batch event into the view state.
    pub fn apply(&mut self, event: BatchEvent) {
        match event {
            BatchEvent::Started {
                already_processed,
                skipped_dirs,
                ..
            } => {
                self.completed = already_processed;
                self.skipped_dirs = skipped_dirs;
                if skipped_dirs > 0 {
                    self.push_log(format!("{} unreadable entries skipped", skipped_dirs));
                }
            }
            BatchEvent::FileStarted { job_id, index, .. } => {
                self.job_rows.insert(job_id, index);
                if let Some(row) = self.files.get_mut(index) {
                    row.1 = FileStatus::Working(Phase::Detect, 0.0);
                }
            }
            BatchEvent::Phase {
                job_id,
                phase,
                status,
                percent,
            } => {
                if let Some(row) = self.row_for_job(&job_id) {
                    let percent = match status {
                        PhaseStatus::Start => 0.0,
                        PhaseStatus::Progress => percent,
                        PhaseStatus::Done => 100.0,
                    };
                    row.1 = FileStatus::Working(phase, percent);
                }
            }
            BatchEvent::Log {
                job_id,
                phase,
                message,
            } => self.push_log(format!("{} [{}] {}", job_id, phase, message)),
            BatchEvent::FileCompleted {
                job_id, completed, ..
            } => {
                self.completed = completed;
                if let Some(row) = self.row_for_job(&job_id) {
                    row.1 = FileStatus::Done;
                }
            }
            BatchEvent::FileInterrupted { job_id } => {
                if let Some(row) = self.row_for_job(&job_id) {
                    row.1 = FileStatus::Interrupted;
                }
            }
            BatchEvent::FileFailed { path, message } => {
                if let Some(index) = self.paths.iter().position(|p| *p == path) {
                    self.files[index].1 = FileStatus::Error(message.clone());
                }
                self.push_log(format!("{}: {}", path.display(), message));
            }
            BatchEvent::Paused => self.paused = true,
            BatchEvent::Resumed => self.paused = false,
            BatchEvent::Finished { outcome } => {
                self.paused = false;
                self.finished_after = Some(self.started.elapsed());
                self.outcome = Some(outcome);
            }
        }
    }

    pub fn total(&self) -> usize {
        self.files.len()
    }

    pub fn select_next(&mut self) {
        if !self.files.is_empty() {
            self.selected = (self.selected + 1).min(self.files.len() - 1);
            self.ensure_visible();
        }
    }

    pub fn select_prev(&mut self) {
        self.selected = self.selected.saturating_sub(1);
        self.ensure_visible();
    }

    /// Adjust scroll_offset so that self.selected is within the visible window.
    fn ensure_visible(&mut self) {
        if self.visible_rows == 0 {
            return;
        }
        if self.selected < self.scroll_offset {
            self.scroll_offset = self.selected;
        } else if self.selected >= self.scroll_offset + self.visible_rows {
            self.scroll_offset = self.selected - self.visible_rows + 1;
        }
    }
}
