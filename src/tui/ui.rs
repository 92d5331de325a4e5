use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table};
use ratatui::Frame;

use super::app::{App, FileStatus, View};
use crate::format::{format_duration, format_outcome};
use crate::models::RunOutcome;

const ACCENT: Color = Color::Cyan;
const DIM: Color = Color::DarkGray;
const COMPLETE_COLOR: Color = Color::Green;
const ERROR_COLOR: Color = Color::Red;
const PROGRESS_COLOR: Color = Color::Yellow;

pub fn render(frame: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Min(5),    // File table
            Constraint::Length(6), // Log tail
            Constraint::Length(3), // Summary
            Constraint::Length(1), // Footer
        ])
        .split(frame.area());

    render_header(frame, app, chunks[0]);
    render_file_table(frame, app, chunks[1]);
    render_log(frame, app, chunks[2]);
    render_summary(frame, app, chunks[3]);
    render_footer(frame, app, chunks[4]);

    if app.view == View::About {
        render_about_overlay(frame);
    }
}

fn render_header(frame: &mut Frame, app: &App, area: Rect) {
    let text = vec![Line::from(vec![
        Span::styled("In: ", Style::default().fg(DIM)),
        Span::styled(
            app.input.display().to_string(),
            Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
        ),
        Span::raw("  "),
        Span::styled("Out: ", Style::default().fg(DIM)),
        Span::styled(app.output.display().to_string(), Style::default().fg(DIM)),
    ])];

    let block = Block::default()
        .title(Span::styled(
            " Bulk Normalizer ",
            Style::default().fg(ACCENT).add_modifier(Modifier::BOLD),
        ))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(ACCENT));

    frame.render_widget(Paragraph::new(text).block(block), area);
}

fn progress_bar(percent: f32) -> String {
    let bar_width = 12;
    let filled = ((percent / 100.0).clamp(0.0, 1.0) * bar_width as f32) as usize;
    format!(
        "{}{} {:>3}%",
        "\u{2588}".repeat(filled),
        "\u{2591}".repeat(bar_width - filled),
        percent as u32
    )
}

fn render_file_table(frame: &mut Frame, app: &mut App, area: Rect) {
    // 2 for borders, 1 for header
    let inner_height = area.height.saturating_sub(3) as usize;
    app.visible_rows = inner_height;

    let total = app.files.len();
    let scroll_info = if total > inner_height {
        format!(
            " [{}-{}/{}] ",
            app.scroll_offset + 1,
            (app.scroll_offset + inner_height).min(total),
            total
        )
    } else {
        String::new()
    };

    let header = Row::new(vec![
        Cell::from("#").style(Style::default().fg(DIM)),
        Cell::from("File").style(Style::default().fg(DIM)),
        Cell::from("Phase").style(Style::default().fg(DIM)),
        Cell::from("Progress").style(Style::default().fg(DIM)),
        Cell::from("").style(Style::default().fg(DIM)),
    ])
    .height(1);

    let end = (app.scroll_offset + inner_height).min(app.files.len());
    let rows: Vec<Row> = app.files[app.scroll_offset..end]
        .iter()
        .enumerate()
        .map(|(vi, (name, status))| {
            let actual_index = app.scroll_offset + vi;
            let style = if actual_index == app.selected {
                Style::default().bg(Color::DarkGray)
            } else {
                Style::default()
            };
            let (phase, detail, mark) = match status {
                FileStatus::Pending => (
                    Cell::from(""),
                    Cell::from(""),
                    Cell::from("\u{00b7}").style(Style::default().fg(DIM)),
                ),
                FileStatus::Working(phase, pct) => (
                    Cell::from(phase.as_str()),
                    Cell::from(progress_bar(*pct)).style(Style::default().fg(PROGRESS_COLOR)),
                    Cell::from("\u{27f3}").style(Style::default().fg(PROGRESS_COLOR)),
                ),
                FileStatus::Done => (
                    Cell::from("done"),
                    Cell::from(""),
                    Cell::from("\u{2713}").style(Style::default().fg(COMPLETE_COLOR)),
                ),
                FileStatus::Interrupted => (
                    Cell::from("paused").style(Style::default().fg(PROGRESS_COLOR)),
                    Cell::from(""),
                    Cell::from("\u{00b7}").style(Style::default().fg(PROGRESS_COLOR)),
                ),
                FileStatus::Error(msg) => (
                    Cell::from("ERR").style(Style::default().fg(ERROR_COLOR)),
                    Cell::from(msg.as_str()).style(Style::default().fg(ERROR_COLOR)),
                    Cell::from("\u{2717}").style(Style::default().fg(ERROR_COLOR)),
                ),
            };
            Row::new(vec![
                Cell::from(format!("{}", actual_index + 1)),
                Cell::from(name.as_str()),
                phase,
                detail,
                mark,
            ])
            .style(style)
        })
        .collect();

    let widths = [
        Constraint::Length(4),
        Constraint::Min(20),
        Constraint::Length(8),
        Constraint::Length(30),
        Constraint::Length(2),
    ];

    let block = Block::default()
        .title(Span::styled(scroll_info, Style::default().fg(DIM)))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(ACCENT));

    let table = Table::new(rows, widths).header(header).block(block);
    frame.render_widget(table, area);
}

fn render_log(frame: &mut Frame, app: &App, area: Rect) {
    let height = area.height.saturating_sub(2) as usize;
    let lines: Vec<Line> = app
        .log
        .iter()
        .skip(app.log.len().saturating_sub(height))
        .map(|l| Line::from(Span::styled(l.as_str(), Style::default().fg(DIM))))
        .collect();
    let block = Block::default()
        .title(" Log ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(DIM));
    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_summary(frame: &mut Frame, app: &App, area: Rect) {
    let elapsed = app
        .finished_after
        .unwrap_or_else(|| app.started.elapsed())
        .as_secs_f64();
    let (text, color) = match &app.outcome {
        Some(outcome @ RunOutcome::Verified { .. }) => (
            format!("{} in {}", format_outcome(outcome), format_duration(elapsed)),
            COMPLETE_COLOR,
        ),
        Some(outcome) => (format_outcome(outcome), ERROR_COLOR),
        None => {
            let state = if app.paused { "Paused" } else { "Running" };
            (
                format!(
                    "{} ({}/{} complete, {})",
                    state,
                    app.completed,
                    app.total(),
                    format_duration(elapsed)
                ),
                Color::White,
            )
        }
    };
    let paragraph = Paragraph::new(Span::styled(text, Style::default().fg(color)))
        .alignment(Alignment::Center)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(ACCENT)),
        );
    frame.render_widget(paragraph, area);
}

fn render_footer(frame: &mut Frame, app: &App, area: Rect) {
    let keys = match (&app.view, app.is_finished(), app.paused) {
        (View::About, _, _) => "[Esc] close",
        (View::Main, true, _) => "[a]bout  [q]uit",
        (View::Main, false, true) => "[r]esume  [c]ancel  [a]bout  [q]uit",
        (View::Main, false, false) => "[p]ause  [c]ancel  [a]bout  [q]uit",
    };
    let footer = Paragraph::new(keys)
        .style(Style::default().fg(DIM))
        .alignment(Alignment::Center);
    frame.render_widget(footer, area);
}

fn render_about_overlay(frame: &mut Frame) {
    let area = centered_rect(44, 9, frame.area());
    frame.render_widget(Clear, area);

    let text = vec![
        Line::from(Span::styled(
            "Bulk Normalizer",
            Style::default().fg(ACCENT).add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
        Line::from(format!("Version {}", env!("CARGO_PKG_VERSION"))),
        Line::from(""),
        Line::from("Peak / loudness normalization for WAV folders."),
        Line::from(""),
        Line::from(Span::styled("[Esc] close", Style::default().fg(DIM))),
    ];

    let block = Block::default()
        .title(" About ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(ACCENT));

    let paragraph = Paragraph::new(text)
        .alignment(Alignment::Center)
        .block(block);
    frame.render_widget(paragraph, area);
}

fn centered_rect(width: u16, height: u16, area: Rect) -> Rect {
    let x = area.x + area.width.saturating_sub(width) / 2;
    let y = area.y + area.height.saturating_sub(height) / 2;
    Rect::new(x, y, width.min(area.width), height.min(area.height))
}
