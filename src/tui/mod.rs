pub mod app;
pub mod ui;

use std::io;
use std::sync::mpsc;
use std::time::Duration;

use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;

use crate::batch::{BatchOrchestrator, StartRequest};
use crate::models::{BatchEvent, RunOutcome};
use crate::scanner::scan_wav_files;

use app::{App, View};

/// Leaves raw mode and the alternate screen when dropped.
struct TerminalGuard;

impl TerminalGuard {
    fn enter() -> Result<Self> {
        enable_raw_mode()?;
        let guard = TerminalGuard;
        io::stdout().execute(EnterAlternateScreen)?;
        Ok(guard)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = io::stdout().execute(LeaveAlternateScreen);
    }
}

/// Run `setup` first and start the batch only once it succeeded. When
/// `start` fails the setup value is dropped before returning.
fn launch<T>(
    batch: &BatchOrchestrator,
    request: StartRequest,
    setup: impl FnOnce() -> Result<T>,
) -> Result<(T, mpsc::Receiver<BatchEvent>)> {
    let ready = setup()?;
    let (tx, rx) = mpsc::channel::<BatchEvent>();
    batch.start(request, tx)?;
    Ok((ready, rx))
}

/// Run a batch with a live dashboard. Quitting mid-run cancels the batch.
pub fn run(batch: &BatchOrchestrator, request: StartRequest) -> Result<Option<RunOutcome>> {
    let files = scan_wav_files(&request.input).files;
    if files.is_empty() {
        anyhow::bail!("No WAV files found in {}", request.input.display());
    }
    let mut app = App::new(files, request.input.clone(), request.output.clone());

    let (guard, rx) = launch(batch, request, TerminalGuard::enter)?;
    let result = Terminal::new(CrosstermBackend::new(io::stdout()))
        .map_err(anyhow::Error::from)
        .and_then(|mut terminal| run_loop(&mut terminal, &mut app, batch, &rx));
    drop(guard);

    if batch.is_running() {
        batch.cancel();
    }
    batch.join();
    for event in rx.try_iter() {
        app.apply(event);
    }
    result.map(|()| app.outcome)
}

fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    batch: &BatchOrchestrator,
    rx: &mpsc::Receiver<BatchEvent>,
) -> Result<()> {
    loop {
        terminal.draw(|frame| ui::render(frame, app))?;

        // Drain batch events
        while let Ok(event) = rx.try_recv() {
            app.apply(event);
        }

        // Poll for key events
        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                match app.view {
                    View::Main => match key.code {
                        KeyCode::Char('q') => {
                            app.should_quit = true;
                        }
                        KeyCode::Char('p') => {
                            batch.pause();
                        }
                        KeyCode::Char('r') => {
                            batch.resume();
                        }
                        KeyCode::Char('c') => {
                            batch.cancel();
                        }
                        KeyCode::Char('a') => {
                            app.view = View::About;
                        }
                        KeyCode::Char('j') | KeyCode::Down => {
                            app.select_next();
                        }
                        KeyCode::Char('k') | KeyCode::Up => {
                            app.select_prev();
                        }
                        _ => {}
                    },
                    View::About => match key.code {
                        KeyCode::Esc | KeyCode::Char('q') => {
                            app.view = View::Main;
                        }
                        _ => {}
                    },
                }
            }
        }

        if app.should_quit {
            break;
        }
    }

    Ok(())
}
