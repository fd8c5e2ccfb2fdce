use crate::app::{App, LogViewport};
use crate::theme::{
    ansi_style, outcome_color, outcome_icon, zebra_row_style, ERROR_STYLE, GAP_STYLE,
    HEADER_STYLE, MUTED_STYLE, SELECTED_STYLE,
};
use chrono::Local;
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap},
    Frame,
};
use std::mem;
use syncron_core::ansi::segment;
use syncron_core::{human_bytes, LogPart, LogWindow, Run};
use syncron_live::controller::should_autoscroll;
use syncron_live::{
    ActiveSession, JobsModel, RunModel, RunsModel, SyncState, SyncView, View,
};

pub fn render(frame: &mut Frame, app: &App) {
    let size = frame.size();
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(0),
            Constraint::Length(1),
        ])
        .split(size);
    frame.render_widget(render_header(app), layout[0]);
    render_body(frame, app, layout[1]);
    frame.render_widget(render_footer(app), layout[2]);
}

fn render_header(app: &App) -> Paragraph<'static> {
    let crumbs = app.state.view.crumbs();
    let mut spans = Vec::new();
    for (index, crumb) in crumbs.iter().enumerate() {
        if index > 0 {
            spans.push(Span::styled(" > ", MUTED_STYLE));
        }
        let style = if crumb.target.is_none() {
            HEADER_STYLE
        } else {
            MUTED_STYLE
        };
        spans.push(Span::styled(crumb.label.clone(), style));
    }
    let state = match app.session() {
        Some(session) => session.state().to_string(),
        None => "paused".to_string(),
    };
    spans.push(Span::styled(format!("  [{state}]"), MUTED_STYLE));
    Paragraph::new(Line::from(spans))
}

fn render_footer(app: &App) -> Paragraph<'static> {
    let keys = match app.state.view {
        View::Jobs => "enter runs  l latest log  r retry  q quit",
        View::Runs { .. } => "enter log  m more  f refresh  esc back  r retry  q quit",
        View::Log { .. } => "e/E expand  end follow  esc back  r retry  q quit",
    };
    let mut spans = vec![Span::styled(keys.to_string(), MUTED_STYLE)];
    let note = app
        .status_note
        .clone()
        .or_else(|| app.session().and_then(ActiveSession::inline_error));
    if let Some(note) = note {
        spans.push(Span::raw("  "));
        spans.push(Span::styled(note, ERROR_STYLE));
    }
    Paragraph::new(Line::from(spans))
}

fn render_body(frame: &mut Frame, app: &App, area: Rect) {
    let Some(session) = app.session() else {
        frame.render_widget(
            Paragraph::new("paused while the window is in the background").style(MUTED_STYLE),
            area,
        );
        return;
    };
    if session.state() == SyncState::Closed {
        let error = session
            .error()
            .unwrap_or_else(|| "connection closed".to_string());
        let text = vec![
            Line::from(Span::styled(error, ERROR_STYLE)),
            Line::from(Span::styled("press r to reconnect", MUTED_STYLE)),
        ];
        frame.render_widget(Paragraph::new(text).wrap(Wrap { trim: false }), area);
        return;
    }
    match session {
        ActiveSession::Jobs(sync) => sync.read(|view| render_jobs(frame, app, view, area)),
        ActiveSession::Runs(sync) => sync.read(|view| render_runs(frame, app, view, area)),
        ActiveSession::Run(sync) => sync.read(|view| render_log(frame, app, view, area)),
    }
}

fn loading<M>(view: &SyncView<M>) -> bool {
    matches!(view.state, SyncState::Idle | SyncState::Snapshotting)
}

fn render_list(frame: &mut Frame, app: &App, title: String, items: Vec<ListItem<'static>>, area: Rect) {
    let mut state = ListState::default();
    if !items.is_empty() {
        state.select(Some(app.selected.min(items.len() - 1)));
    }
    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(title))
        .highlight_style(SELECTED_STYLE);
    frame.render_stateful_widget(list, area, &mut state);
}

fn render_jobs(frame: &mut Frame, app: &App, view: &SyncView<JobsModel>, area: Rect) {
    if loading(view) {
        frame.render_widget(Paragraph::new("loading jobs...").style(MUTED_STYLE), area);
        return;
    }
    let items = view
        .model
        .list()
        .into_iter()
        .enumerate()
        .map(|(index, job)| {
            let outcome = job.outcome();
            let status = job
                .latest_run
                .as_ref()
                .map(Run::describe_status)
                .unwrap_or_else(|| "never ran".to_string());
            let line = Line::from(vec![
                Span::styled(
                    format!("{} ", outcome_icon(outcome)),
                    Style::new().fg(outcome_color(outcome)),
                ),
                Span::raw(format!("{:<28} ", job.name)),
                Span::styled(format!("{:<28} ", job.key().to_string()), MUTED_STYLE),
                Span::styled(status, Style::new().fg(outcome_color(outcome))),
            ]);
            ListItem::new(line).style(zebra_row_style(index))
        })
        .collect();
    let title = format!("jobs ({})", view.model.jobs.len());
    render_list(frame, app, title, items, area);
}

fn format_duration(ms: u64) -> String {
    let secs = ms / 1000;
    match secs {
        0..=59 => format!("{}.{:01}s", secs, (ms % 1000) / 100),
        60..=3599 => format!("{}m{:02}s", secs / 60, secs % 60),
        _ => format!("{}h{:02}m", secs / 3600, (secs % 3600) / 60),
    }
}

fn run_line(run: &Run) -> Line<'static> {
    let outcome = Some(run.outcome());
    let mut status = run.describe_status();
    if let Some(progress) = run.progress.filter(|_| !run.is_terminal()) {
        status = format!(
            "{:.0}% eta {}s",
            progress.percent * 100.0,
            progress.eta_seconds
        );
    }
    Line::from(vec![
        Span::styled(
            format!("{} ", outcome_icon(outcome)),
            Style::new().fg(outcome_color(outcome)),
        ),
        Span::raw(format!("{:<20} ", run.id)),
        Span::styled(
            format!(
                "{} ",
                run.date.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
            ),
            MUTED_STYLE,
        ),
        Span::styled(format!("{status:<28} "), Style::new().fg(outcome_color(outcome))),
        Span::raw(format!("{:>8} ", format_duration(run.duration_ms))),
        Span::styled(format!("{:>6}", human_bytes(run.log_len)), MUTED_STYLE),
    ])
}

fn render_runs(frame: &mut Frame, app: &App, view: &SyncView<RunsModel>, area: Rect) {
    if loading(view) {
        frame.render_widget(Paragraph::new("loading runs...").style(MUTED_STYLE), area);
        return;
    }
    let items = view
        .model
        .runs
        .iter()
        .enumerate()
        .map(|(index, run)| ListItem::new(run_line(run)).style(zebra_row_style(index)))
        .collect();
    let more = if view.model.loading_more {
        ", loading more"
    } else if view.model.exhausted {
        ""
    } else {
        ", m for more"
    };
    let title = format!("runs ({}{more})", view.model.runs.len());
    render_list(frame, app, title, items, area);
}

/// Identifies the content of a log window. Within one session a window only
/// grows, so the loaded byte count changes with every edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogShape {
    session: u64,
    run_id: String,
    loaded: u64,
    parts: usize,
}

impl LogShape {
    pub fn of(session: u64, run: &Run) -> Self {
        Self {
            session,
            run_id: run.id.clone(),
            loaded: run.log.loaded_bytes(),
            parts: run.log.parts().len(),
        }
    }
}

/// Styled lines of the shown log, rebuilt only when the window changes.
#[derive(Default)]
pub struct LogLineCache {
    shape: Option<LogShape>,
    lines: Vec<Line<'static>>,
}

impl LogLineCache {
    pub fn refresh(&mut self, shape: LogShape, log: &LogWindow) -> &[Line<'static>] {
        if self.shape.as_ref() != Some(&shape) {
            self.lines = log_lines(log);
            self.shape = Some(shape);
        }
        &self.lines
    }
}

/// Flattens the loaded parts into styled lines. A gap becomes one marker line.
fn log_lines(log: &LogWindow) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    let mut current: Vec<Span<'static>> = Vec::new();
    for part in log.parts() {
        match part {
            LogPart::Text(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                for span in segment(&text) {
                    let style = ansi_style(&span.classes);
                    let mut pieces = span.text.split('\n').peekable();
                    while let Some(piece) = pieces.next() {
                        let piece = piece.trim_end_matches('\r');
                        if !piece.is_empty() {
                            current.push(Span::styled(piece.to_string(), style));
                        }
                        if pieces.peek().is_some() {
                            lines.push(Line::from(mem::take(&mut current)));
                        }
                    }
                }
            }
            LogPart::Gap(gap) => {
                if !current.is_empty() {
                    lines.push(Line::from(mem::take(&mut current)));
                }
                lines.push(Line::from(Span::styled(
                    format!(
                        "... {} not loaded (bytes {}..{}), e/E to expand ...",
                        human_bytes(gap.len()),
                        gap.from,
                        gap.to
                    ),
                    GAP_STYLE,
                )));
            }
        }
    }
    if !current.is_empty() {
        lines.push(Line::from(current));
    }
    lines
}

fn render_log(frame: &mut Frame, app: &App, view: &SyncView<RunModel>, area: Rect) {
    if loading(view) {
        frame.render_widget(Paragraph::new("loading log...").style(MUTED_STYLE), area);
        return;
    }
    if let Some(reason) = view.model.deleted.as_ref() {
        frame.render_widget(
            Paragraph::new(format!("run deleted: {reason}")).style(ERROR_STYLE),
            area,
        );
        return;
    }
    let Some(run) = view.model.run.as_ref() else {
        return;
    };
    let outcome = run.outcome();
    let mut title = format!(
        "{} | {} | {}",
        run.id,
        run.describe_status(),
        human_bytes(run.log_len)
    );
    if view.model.catching_up || view.pending > 0 {
        title.push_str(" | fetching");
    }

    let mut cache = app.log_lines.borrow_mut();
    let lines = cache.refresh(LogShape::of(app.sessions.activations(), run), &run.log);
    let height = area.height.saturating_sub(2) as usize;
    let bottom = lines.len().saturating_sub(height);
    let top = if should_autoscroll(outcome, app.log_follow) {
        bottom
    } else {
        app.log_top.min(bottom)
    };
    app.log_viewport.set(LogViewport { top, bottom });
    let visible: Vec<Line<'static>> = lines.iter().skip(top).take(height).cloned().collect();
    let block = Block::default()
        .borders(Borders::ALL)
        .title(Span::styled(title, Style::new().fg(outcome_color(Some(outcome)))));
    frame.render_widget(Paragraph::new(visible).block(block), area);
}
