mod export;
mod help;
mod state;

use crate::cli::{build_config, Cli};
use crate::engine::{format_energy, format_thickness};
use crate::model::{RunEvent, RunResult, RunState};
use crate::orchestrator::{self, UiCommand};
use crate::text_summary::{build_text_summary, format_elapsed};
use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use export::{copy_to_clipboard, export_result_json, export_result_log, save_and_show_path};
use help::draw_help;
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, Paragraph, Tabs},
    Terminal,
};
use state::{FormField, UiState};
use std::{io, time::Duration, time::Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

const LOG_PAGE: usize = 20;

pub async fn run(args: Cli) -> Result<()> {
    let (event_tx, event_rx) = mpsc::unbounded_channel::<RunEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();

    // TUI runs in a dedicated thread to keep all blocking I/O out of the Tokio runtime.
    let ui_args = args.clone();
    let ui_handle = std::thread::spawn(move || run_threaded(ui_args, event_rx, cmd_tx));

    let launch = args.run_on_launch.then(|| build_config(&args));
    let res = orchestrator::run_controller(launch, event_tx, cmd_rx).await;

    let join_res = tokio::task::spawn_blocking(move || ui_handle.join()).await;
    if let Ok(joined) = join_res {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(anyhow::anyhow!("TUI thread panicked")),
        }
    }

    res
}

/// Run the TUI loop on a dedicated thread.
pub fn run_threaded(
    args: Cli,
    mut event_rx: UnboundedReceiver<RunEvent>,
    cmd_tx: UnboundedSender<UiCommand>,
) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).ok();

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;
    terminal.clear().ok();

    let initial_load = terminal
        .size()
        .map(|size| ((size.height as usize).saturating_sub(2) * 3).max(20))
        .unwrap_or(66);

    let mut state = init_state(&args, initial_load);

    let tick_rate = Duration::from_millis(100);
    let mut last_tick = Instant::now();

    let res = loop {
        // Drain events without blocking so output bursts never stall input handling.
        while let Ok(ev) = event_rx.try_recv() {
            handle_event(&args, &mut state, ev);
        }

        if last_tick.elapsed() >= tick_rate {
            terminal.draw(|f| draw(f.area(), f, &state)).ok();
            last_tick = Instant::now();
        }

        if event::poll(Duration::from_millis(10)).unwrap_or(false) {
            if let Ok(Event::Key(k)) = event::read() {
                if handle_key(&mut state, k, &cmd_tx) {
                    break Ok(());
                }
            }
        }
    };

    disable_raw_mode().ok();
    let mut stdout = io::stdout();
    execute!(stdout, LeaveAlternateScreen).ok();
    res
}

fn init_state(args: &Cli, initial_load: usize) -> UiState {
    let runs_dir = match crate::storage::runs_dir(args.history_dir.as_deref()) {
        Ok(dir) => Some(dir),
        Err(e) => {
            tracing::warn!("history unavailable: {e:#}");
            None
        }
    };
    let history = runs_dir
        .as_deref()
        .and_then(|dir| crate::storage::load_recent(dir, initial_load).ok())
        .unwrap_or_default();

    UiState {
        form: build_config(args),
        auto_save: args.auto_save,
        initial_history_load_size: initial_load,
        history_loaded_count: history.len(),
        history,
        runs_dir,
        info: "Press r to run, ? for help".into(),
        ..Default::default()
    }
}

/// Route one engine event into the UI state.
fn handle_event(args: &Cli, state: &mut UiState, ev: RunEvent) {
    state.run_state.on_event(&ev);
    match ev {
        RunEvent::Finished { result } => handle_run_completed(args, state, *result),
        other => apply_event(state, other),
    }
}

fn apply_event(state: &mut UiState, ev: RunEvent) {
    match ev {
        RunEvent::Started { command_line } => {
            state.editing = None;
            state.info = "Simulation started".into();
            state.begin_run(command_line);
        }
        RunEvent::Line { text } => state.push_log(text),
        RunEvent::Progress { percent } => {
            state.progress = state.progress.max(percent.min(100));
        }
        RunEvent::Info(info) => state.info = info.to_message(),
        RunEvent::Finished { .. } => {}
    }
}

fn handle_run_completed(args: &Cli, state: &mut UiState, r: RunResult) {
    let reload_size = (state.history_loaded_count + 1).max(state.initial_history_load_size);
    let processed =
        orchestrator::process_run_completion(args, reload_size, state.auto_save, &r);

    state.progress = r.progress;
    state.run_start = None;
    state.info = build_text_summary(&r)
        .lines
        .pop()
        .unwrap_or_else(|| r.status.label().to_string());
    if let Some(path) = processed.auto_saved_path.as_ref() {
        state.info = format!("{} (saved: {})", state.info, path.display());
    }
    if !processed.export_messages.is_empty() {
        state.info = processed.export_messages.join("; ");
    }
    state.last_result = Some(r);

    state.history = processed.history;
    state.history_loaded_count = state.history.len();
    if state.tab == 1 {
        state.history_selected = 0;
        state.history_scroll_offset = 0;
    }
}

/// Apply one key press. Returns true when the UI should exit.
fn handle_key(state: &mut UiState, k: KeyEvent, cmd_tx: &UnboundedSender<UiCommand>) -> bool {
    if k.kind != KeyEventKind::Press {
        return false;
    }
    if state.editing.is_some() {
        if k.modifiers == KeyModifiers::CONTROL && k.code == KeyCode::Char('c') {
            let _ = cmd_tx.send(UiCommand::Quit);
            return true;
        }
        handle_edit_key(state, k.code);
        return false;
    }
    match (k.modifiers, k.code) {
        (_, KeyCode::Char('q')) | (KeyModifiers::CONTROL, KeyCode::Char('c')) => {
            let _ = cmd_tx.send(UiCommand::Quit);
            return true;
        }
        (_, KeyCode::Tab) => {
            state.tab = (state.tab + 1) % 3;
            if state.tab == 1 {
                state.history_selected = 0;
                state.history_scroll_offset = 0;
            }
        }
        (_, KeyCode::Char('?')) => state.tab = 2,
        (_, KeyCode::Char('a')) => {
            state.auto_save = !state.auto_save;
            state.info = if state.auto_save {
                "Auto-save enabled".into()
            } else {
                "Auto-save disabled".into()
            };
        }
        _ if state.tab == 0 => handle_run_key(state, k.code, cmd_tx),
        _ if state.tab == 1 => handle_history_key(state, k.code),
        _ => {}
    }
    false
}

/// Keys while a text field is open: every character goes into the field.
fn handle_edit_key(state: &mut UiState, code: KeyCode) {
    let Some(edit) = state.editing.as_mut() else {
        return;
    };
    match code {
        KeyCode::Enter => state.commit_edit(),
        KeyCode::Esc => state.cancel_edit(),
        KeyCode::Backspace => {
            edit.buffer.pop();
        }
        KeyCode::Char(c) => edit.buffer.push(c),
        _ => {}
    }
}

fn handle_run_key(state: &mut UiState, code: KeyCode, cmd_tx: &UnboundedSender<UiCommand>) {
    let running = state.run_state.is_running();
    match code {
        KeyCode::Char('r') => {
            if running {
                state.info = crate::model::InfoEvent::StartRejected.to_message();
            } else {
                state.run_state.acknowledge();
                state.info = "Starting simulation…".into();
                let _ = cmd_tx.send(UiCommand::Start(Box::new(state.form.clone())));
            }
        }
        KeyCode::Char('x') => {
            if running {
                let _ = cmd_tx.send(UiCommand::Stop);
            } else {
                state.info = crate::model::InfoEvent::NoActiveRun.to_message();
            }
        }
        KeyCode::Char('s') => {
            if let Some(r) = state.last_result.clone() {
                save_and_show_path(&r, state);
            } else {
                state.info = "No finished run to save yet.".into();
            }
        }
        KeyCode::Char('c') => {
            state.clear_log();
            state.run_state.acknowledge();
            if !running {
                state.progress = 0;
            }
        }
        KeyCode::Char(c @ ('t' | 'u' | 'm' | 'n')) => {
            if running {
                state.info = "Settings are locked while a simulation runs".into();
                return;
            }
            let form = &mut state.form;
            match c {
                't' => form.particle = form.particle.next(),
                'u' => form.energy_unit = form.energy_unit.next(),
                'm' => form.material = form.material.next(),
                _ => form.thread_count = form.thread_count.next(),
            }
        }
        KeyCode::Char('f') => state.focus_next(),
        KeyCode::Enter => state.begin_edit(),
        KeyCode::PageUp => state.scroll_log_up(LOG_PAGE),
        KeyCode::PageDown => state.scroll_log_down(LOG_PAGE),
        KeyCode::Up => state.scroll_log_up(1),
        KeyCode::Down => state.scroll_log_down(1),
        KeyCode::End => state.log_scroll = 0,
        _ => {}
    }
}

fn handle_history_key(state: &mut UiState, code: KeyCode) {
    let selected = (state.history_selected < state.history.len()).then_some(state.history_selected);
    match code {
        KeyCode::Char('r') => refresh_history(state),
        KeyCode::Up | KeyCode::Char('k') => {
            if state.history_selected > 0 {
                state.history_selected -= 1;
                if state.history_selected < state.history_scroll_offset {
                    state.history_scroll_offset = state.history_selected;
                }
            }
        }
        KeyCode::Down | KeyCode::Char('j') => {
            if state.history_selected + 1 < state.history.len() {
                state.history_selected += 1;
                load_more_history(state);
            }
        }
        KeyCode::Char('e') => {
            if let Some(i) = selected {
                match export_result_json(&state.history[i]) {
                    Ok(p) => {
                        state.last_exported_path = Some(p.to_string_lossy().to_string());
                        state.info =
                            format!("Exported JSON: {} (press 'y' to copy path)", p.display());
                    }
                    Err(e) => state.info = format!("JSON export failed: {e:#}"),
                }
            }
        }
        KeyCode::Char('l') => {
            if let Some(i) = selected {
                match export_result_log(&state.history[i]) {
                    Ok(p) => {
                        state.last_exported_path = Some(p.to_string_lossy().to_string());
                        state.info =
                            format!("Exported log: {} (press 'y' to copy path)", p.display());
                    }
                    Err(e) => state.info = format!("Log export failed: {e:#}"),
                }
            }
        }
        KeyCode::Char('y') => {
            if let Some(path) = state.last_exported_path.clone() {
                state.info = match copy_to_clipboard(&path) {
                    Ok(()) => format!("✓ Copied to clipboard: {}", shorten(&path, 60)),
                    Err(e) => format!("Clipboard copy failed: {e:#}"),
                };
            } else {
                state.info = "No exported file path to copy. Export a file first (e/l)".into();
            }
        }
        KeyCode::Char('d') => {
            let (Some(i), Some(dir)) = (selected, state.runs_dir.clone()) else {
                return;
            };
            match crate::storage::delete_run(&dir, &state.history[i]) {
                Ok(()) => {
                    state.history.remove(i);
                    state.history_loaded_count = state.history.len();
                    state.clamp_history_selection();
                    state.info = "Deleted".into();
                }
                Err(e) => state.info = format!("Delete failed: {e:#}"),
            }
        }
        _ => {}
    }
}

fn refresh_history(state: &mut UiState) {
    let Some(dir) = state.runs_dir.clone() else {
        state.info = "Refresh failed: no history directory".into();
        return;
    };
    let reload_size = state
        .initial_history_load_size
        .max(state.history_loaded_count);
    match crate::storage::load_recent(&dir, reload_size) {
        Ok(new_history) => {
            let old_count = state.history.len();
            state.history = new_history;
            state.history_loaded_count = state.history.len();
            state.clamp_history_selection();

            let new_count = state.history.len();
            state.info = if new_count > old_count {
                format!("Refreshed: {} new run(s)", new_count - old_count)
            } else if new_count < old_count {
                format!("Refreshed: {} run(s) removed", old_count - new_count)
            } else {
                "Refreshed".into()
            };
        }
        Err(e) => state.info = format!("Refresh failed: {e:#}"),
    }
}

/// Load another page once the selection nears the end of what is loaded.
fn load_more_history(state: &mut UiState) {
    let load_threshold = state.history_loaded_count.saturating_sub(10);
    if state.history_selected < load_threshold
        || state.history_loaded_count != state.history.len()
    {
        return;
    }
    let Some(dir) = state.runs_dir.as_deref() else {
        return;
    };
    let want = state.history.len() + state.history.len().max(20);
    if let Ok(more) = crate::storage::load_recent(dir, want) {
        if more.len() > state.history.len() {
            state.history = more;
            state.history_loaded_count = state.history.len();
        }
    }
}

fn shorten(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{head}...")
    } else {
        s.to_string()
    }
}

fn state_color(s: RunState) -> Color {
    match s {
        RunState::Idle => Color::Gray,
        RunState::Running => Color::Cyan,
        RunState::Completed => Color::Green,
        RunState::Failed => Color::Red,
        RunState::Aborted => Color::Yellow,
    }
}

/// Highlight Geant4 warnings and errors in the relayed output.
fn log_line_style(line: &str) -> Style {
    let lower = line.to_ascii_lowercase();
    if lower.contains("error") || lower.contains("fatal") || lower.contains("exception") {
        Style::default().fg(Color::Red)
    } else if lower.contains("warning") {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default()
    }
}

fn draw(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0)].as_ref())
        .split(area);

    let tabs = Tabs::new(vec![Line::from("Run"), Line::from("History"), Line::from("Help")])
        .select(state.tab)
        .block(Block::default().borders(Borders::ALL).title("g4-shield-cli"))
        .highlight_style(Style::default().fg(Color::Yellow));
    f.render_widget(tabs, chunks[0]);

    match state.tab {
        0 => draw_run(chunks[1], f, state),
        1 => draw_history(chunks[1], f, state),
        _ => draw_help(chunks[1], f),
    }
}

fn draw_run(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Length(7),
                Constraint::Length(3),
                Constraint::Min(3),
            ]
            .as_ref(),
        )
        .split(area);

    let form = &state.form;
    let key = |k: &'static str| Span::styled(k, Style::default().fg(Color::Magenta));
    let label = |l: &'static str| Span::styled(l, Style::default().fg(Color::Gray));

    let elapsed = state
        .run_start
        .map(|t| format_elapsed(Duration::from_secs(t.elapsed().as_secs())))
        .unwrap_or_else(|| "-".into());

    let running = state.run_state.is_running();
    let field = |f: FormField, shown: String| -> Span<'static> {
        match &state.editing {
            Some(edit) if edit.field == f => Span::styled(
                format!("{}▏", edit.buffer),
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
            ),
            _ if state.focus == f && !running => {
                Span::styled(shown, Style::default().add_modifier(Modifier::REVERSED))
            }
            _ => Span::raw(shown),
        }
    };

    let lines = vec![
        Line::from(vec![
            label("Executable: "),
            field(
                FormField::Executable,
                form.executable_path.display().to_string(),
            ),
            label("   Macro: "),
            field(FormField::Macro, form.macro_file_or_default().to_string()),
        ]),
        Line::from(vec![
            label("Particle "),
            key("[t]"),
            Span::raw(format!(": {:<8}", form.particle)),
            label("Energy: "),
            field(FormField::Energy, format_energy(form.energy_value)),
            Span::raw(" "),
            key("[u]"),
            Span::raw(format!(" {}", form.energy_unit)),
        ]),
        Line::from(vec![
            label("Shield "),
            key("[m]"),
            Span::raw(format!(": {} ", form.material)),
            field(FormField::Thickness, format_thickness(form.thickness_cm)),
            Span::raw(" cm   "),
            label("Events: "),
            field(FormField::Events, form.event_count.to_string()),
            label("   Threads "),
            key("[n]"),
            Span::raw(format!(": {}", form.thread_count)),
        ]),
        Line::from(vec![
            label("Status: "),
            Span::styled(
                format!(" {} ", state.run_state.label()),
                Style::default()
                    .fg(Color::Black)
                    .bg(state_color(state.run_state))
                    .add_modifier(Modifier::BOLD),
            ),
            label("   Elapsed: "),
            Span::raw(elapsed),
            label("   Auto-save: "),
            Span::raw(if state.auto_save { "on" } else { "off" }),
        ]),
        match &state.editing {
            Some(edit) => Line::from(vec![
                Span::styled("Editing ", Style::default().fg(Color::Gray)),
                Span::raw(edit.field.label()),
                Span::styled(": Enter applies, Esc cancels   ", Style::default().fg(Color::Gray)),
                Span::raw(state.info.as_str()),
            ]),
            None => Line::from(vec![
                Span::styled("Info: ", Style::default().fg(Color::Gray)),
                Span::raw(state.info.as_str()),
            ]),
        },
    ];
    let form_block = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title("Simulation"),
    );
    f.render_widget(form_block, chunks[0]);

    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("Progress"))
        .gauge_style(Style::default().fg(state_color(state.run_state)))
        .percent(u16::from(state.progress.min(100)))
        .label(format!("{}%", state.progress));
    f.render_widget(gauge, chunks[1]);

    let visible = (chunks[2].height as usize).saturating_sub(2);
    let end = state.log.len().saturating_sub(state.log_scroll);
    let start = end.saturating_sub(visible);
    let log_lines: Vec<Line> = state.log[start..end]
        .iter()
        .map(|l| Line::styled(l.as_str(), log_line_style(l)))
        .collect();

    let mut title = format!("Output ({} lines", state.log.len() + state.log_dropped);
    if state.log_dropped > 0 {
        title.push_str(&format!(", {} trimmed", state.log_dropped));
    }
    title.push(')');
    if state.log_scroll > 0 {
        title.push_str(" [scrolled, End to follow]");
    }
    let cmd_line = state.command_line.as_deref().unwrap_or("");
    let log = Paragraph::new(log_lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title(title)
            .title_bottom(Line::from(cmd_line).style(Style::default().fg(Color::DarkGray))),
    );
    f.render_widget(log, chunks[2]);
}

/// RFC 3339 UTC timestamp rendered in local time, or as-is when unparseable.
fn format_timestamp(s: &str) -> String {
    use time::format_description::well_known::Rfc3339;

    let Ok(utc) = time::OffsetDateTime::parse(s, &Rfc3339) else {
        return s.to_string();
    };
    let fmt = time::macros::format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second] [offset_hour sign:mandatory]:[offset_minute]"
    );
    let dt = match time::UtcOffset::current_local_offset() {
        Ok(offset) => utc.to_offset(offset),
        Err(_) => utc,
    };
    dt.format(&fmt).unwrap_or_else(|_| s.to_string())
}

fn draw_history(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let mut lines: Vec<Line> = Vec::new();
    let max_items = (area.height as usize).saturating_sub(5).max(1);

    let total_count = state.history.len();
    let current_pos = if total_count > 0 {
        state.history_selected + 1
    } else {
        0
    };
    let key = |k: &'static str| Span::styled(k, Style::default().fg(Color::Magenta));

    lines.push(Line::from(vec![
        Span::raw(format!("History ({current_pos}/{total_count}) - ")),
        key("↑/↓/j/k"),
        Span::raw(": navigate, "),
        key("r"),
        Span::raw(": refresh, "),
        key("d"),
        Span::raw(": delete, "),
        key("e"),
        Span::raw(": export JSON, "),
        key("l"),
        Span::raw(": export log"),
    ]));
    lines.push(Line::from(vec![
        Span::styled("Info: ", Style::default().fg(Color::Gray)),
        Span::raw(state.info.as_str()),
    ]));
    lines.push(Line::from(""));

    if state.history.is_empty() {
        lines.push(Line::from(Span::styled(
            "No saved runs yet.",
            Style::default().fg(Color::Gray),
        )));
    }

    let scroll_offset = {
        let mut offset = state
            .history_scroll_offset
            .min(total_count.saturating_sub(1));
        if state.history_selected < offset {
            offset = state.history_selected;
        } else if state.history_selected >= offset + max_items {
            offset = state.history_selected + 1 - max_items;
        }
        offset
    };

    for (idx, r) in state
        .history
        .iter()
        .enumerate()
        .skip(scroll_offset)
        .take(max_items)
    {
        let is_selected = idx == state.history_selected;
        let base = if is_selected {
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::REVERSED)
        } else {
            Style::default()
        };
        let status_style = if is_selected {
            base
        } else {
            Style::default().fg(match r.status {
                crate::model::RunStatus::Completed => Color::Green,
                crate::model::RunStatus::Failed => Color::Red,
                crate::model::RunStatus::Aborted => Color::Yellow,
            })
        };
        let cfg = &r.config;

        lines.push(Line::from(vec![
            Span::styled(
                format!("{:>3}. ", idx + 1),
                if is_selected {
                    base
                } else {
                    Style::default().fg(Color::Gray)
                },
            ),
            Span::styled(if is_selected { "> " } else { "  " }, base),
            Span::styled(format_timestamp(&r.timestamp_utc), base),
            Span::styled("  ", base),
            Span::styled(format!("{:<9}", r.status.label()), status_style),
            Span::styled(
                format!(
                    " {} {} {} → {} {} cm  exit {}  {}",
                    cfg.particle,
                    format_energy(cfg.energy_value),
                    cfg.energy_unit,
                    cfg.material.code(),
                    format_thickness(cfg.thickness_cm),
                    r.exit_code,
                    format_elapsed(Duration::from_secs(r.duration.as_secs())),
                ),
                base,
            ),
        ]));
    }

    let p = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("History"));
    f.render_widget(p, area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InfoEvent, Particle, RunConfig, RunStatus, ThreadCount};
    use clap::Parser;

    fn press(c: char) -> KeyEvent {
        KeyEvent::new(KeyCode::Char(c), KeyModifiers::NONE)
    }

    fn finished(status: RunStatus) -> RunResult {
        RunResult {
            run_id: "feedfacecafebeef".into(),
            timestamp_utc: "2026-05-04T10:20:30Z".into(),
            config: RunConfig::default(),
            command_line: "./main vis.mac Pb 10 gamma '1.0 MeV'".into(),
            exit_code: if status == RunStatus::Completed { 0 } else { 1 },
            status,
            progress: 100,
            duration: Duration::from_secs(3),
            output_lines: vec!["done".into()],
        }
    }

    #[test]
    fn started_resets_per_run_state() {
        let mut state = UiState::default();
        state.push_log("old".into());
        state.progress = 70;
        state.last_result = Some(finished(RunStatus::Completed));

        let ev = RunEvent::Started {
            command_line: "./main vis.mac".into(),
        };
        state.run_state.on_event(&ev);
        apply_event(&mut state, ev);

        assert!(state.run_state.is_running());
        assert!(state.log.is_empty());
        assert_eq!(state.progress, 0);
        assert!(state.last_result.is_none());
        assert_eq!(state.command_line.as_deref(), Some("./main vis.mac"));
    }

    #[test]
    fn progress_never_goes_backwards() {
        let mut state = UiState::default();
        apply_event(&mut state, RunEvent::Progress { percent: 40 });
        apply_event(&mut state, RunEvent::Progress { percent: 20 });
        assert_eq!(state.progress, 40);
    }

    #[test]
    fn lines_and_info_update_state() {
        let mut state = UiState::default();
        apply_event(&mut state, RunEvent::Line { text: "a".into() });
        apply_event(&mut state, RunEvent::Line { text: "b".into() });
        apply_event(&mut state, RunEvent::Info(InfoEvent::StillStopping));
        assert_eq!(state.log, ["a", "b"]);
        assert_eq!(state.info, "Still stopping…");
    }

    #[test]
    fn log_is_capped() {
        let mut state = UiState::default();
        for i in 0..state::MAX_LOG_LINES + 5 {
            state.push_log(i.to_string());
        }
        assert_eq!(state.log.len(), state::MAX_LOG_LINES);
        assert_eq!(state.log_dropped, 5);
        assert_eq!(state.log[0], "5");
    }

    #[test]
    fn run_key_sends_form_and_is_refused_while_running() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut state = UiState::default();
        state.form.particle = Particle::Neutron;

        assert!(!handle_key(&mut state, press('r'), &tx));
        match rx.try_recv() {
            Ok(UiCommand::Start(cfg)) => assert_eq!(cfg.particle, Particle::Neutron),
            _ => panic!("expected a start command"),
        }

        state.run_state = RunState::Running;
        handle_key(&mut state, press('r'), &tx);
        assert!(rx.try_recv().is_err());
        assert_eq!(state.info, InfoEvent::StartRejected.to_message());
    }

    #[test]
    fn stop_key_only_sends_while_running() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut state = UiState::default();

        handle_key(&mut state, press('x'), &tx);
        assert!(rx.try_recv().is_err());
        assert_eq!(state.info, "No simulation is running");

        state.run_state = RunState::Running;
        handle_key(&mut state, press('x'), &tx);
        assert!(matches!(rx.try_recv(), Ok(UiCommand::Stop)));
    }

    #[test]
    fn form_cycles_only_when_idle() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut state = UiState::default();

        handle_key(&mut state, press('t'), &tx);
        assert_eq!(state.form.particle, Particle::Electron);
        handle_key(&mut state, press('n'), &tx);
        assert_eq!(state.form.thread_count, ThreadCount::Fixed(1));

        state.run_state = RunState::Running;
        handle_key(&mut state, press('t'), &tx);
        assert_eq!(state.form.particle, Particle::Electron);
    }

    #[test]
    fn quit_sends_quit_and_exits() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut state = UiState::default();
        assert!(handle_key(&mut state, press('q'), &tx));
        assert!(matches!(rx.try_recv(), Ok(UiCommand::Quit)));
    }

    #[test]
    fn clear_acknowledges_finished_run() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut state = UiState {
            run_state: RunState::Failed,
            ..Default::default()
        };
        state.push_log("boom".into());
        handle_key(&mut state, press('c'), &tx);
        assert!(state.log.is_empty());
        assert_eq!(state.run_state, RunState::Idle);
    }

    #[test]
    fn finished_run_is_saved_and_listed() {
        let dir = tempfile::tempdir().unwrap();
        let args = Cli::parse_from([
            "g4-shield-cli",
            "--history-dir",
            dir.path().to_str().unwrap(),
        ]);
        let mut state = init_state(&args, 20);
        assert!(state.history.is_empty());

        handle_event(
            &args,
            &mut state,
            RunEvent::Started {
                command_line: "./main".into(),
            },
        );
        handle_event(
            &args,
            &mut state,
            RunEvent::Finished {
                result: Box::new(finished(RunStatus::Failed)),
            },
        );

        assert_eq!(state.run_state, RunState::Failed);
        assert_eq!(state.history.len(), 1);
        assert!(state.last_result.is_some());
        assert!(state
            .info
            .starts_with("Simulation ended abnormally (exit code 1)"));
    }

    #[test]
    fn history_delete_removes_file_and_entry() {
        let dir = tempfile::tempdir().unwrap();
        crate::storage::save_run(dir.path(), &finished(RunStatus::Completed)).unwrap();
        let args = Cli::parse_from([
            "g4-shield-cli",
            "--history-dir",
            dir.path().to_str().unwrap(),
        ]);
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut state = init_state(&args, 20);
        assert_eq!(state.history.len(), 1);

        state.tab = 1;
        handle_key(&mut state, press('d'), &tx);
        assert!(state.history.is_empty());
        assert_eq!(state.info, "Deleted");
        assert!(crate::storage::load_recent(dir.path(), 20)
            .unwrap()
            .is_empty());
    }

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn type_text(state: &mut UiState, tx: &UnboundedSender<UiCommand>, text: &str) {
        for c in text.chars() {
            assert!(!handle_key(state, press(c), tx));
        }
    }

    /// Open the focused field, clear it and type `text` without committing.
    fn replace_field(
        state: &mut UiState,
        tx: &UnboundedSender<UiCommand>,
        field: FormField,
        text: &str,
    ) {
        state.focus = field;
        handle_key(state, key(KeyCode::Enter), tx);
        let len = state.editing.as_ref().map(|e| e.buffer.chars().count()).unwrap_or(0);
        for _ in 0..len {
            handle_key(state, key(KeyCode::Backspace), tx);
        }
        type_text(state, tx, text);
    }

    #[test]
    fn focus_cycles_through_text_fields() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut state = UiState::default();
        let mut seen = vec![state.focus];
        for _ in 0..FormField::ALL.len() {
            handle_key(&mut state, press('f'), &tx);
            seen.push(state.focus);
        }
        assert_eq!(&seen[..5], &FormField::ALL);
        assert_eq!(seen[5], FormField::Executable);
    }

    #[test]
    fn edit_opens_with_current_value() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut state = UiState::default();
        state.focus = FormField::Energy;
        handle_key(&mut state, key(KeyCode::Enter), &tx);
        let edit = state.editing.as_ref().unwrap();
        assert_eq!(edit.field, FormField::Energy);
        assert_eq!(edit.buffer, "1.0");
    }

    #[test]
    fn every_text_field_can_be_edited() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut state = UiState::default();

        replace_field(&mut state, &tx, FormField::Executable, "/opt/g4/shield");
        handle_key(&mut state, key(KeyCode::Enter), &tx);
        replace_field(&mut state, &tx, FormField::Macro, "run1.mac");
        handle_key(&mut state, key(KeyCode::Enter), &tx);
        replace_field(&mut state, &tx, FormField::Energy, "662");
        handle_key(&mut state, key(KeyCode::Enter), &tx);
        replace_field(&mut state, &tx, FormField::Thickness, "2.5");
        handle_key(&mut state, key(KeyCode::Enter), &tx);
        replace_field(&mut state, &tx, FormField::Events, "50000");
        handle_key(&mut state, key(KeyCode::Enter), &tx);

        assert!(state.editing.is_none());
        assert_eq!(state.form.executable_path, std::path::PathBuf::from("/opt/g4/shield"));
        assert_eq!(state.form.macro_file.as_deref(), Some("run1.mac"));
        assert_eq!(state.form.energy_value, 662.0);
        assert_eq!(state.form.thickness_cm, 2.5);
        assert_eq!(state.form.event_count, 50_000);
        assert_eq!(state.info, "Set event count to 50000");
    }

    #[test]
    fn blank_macro_goes_back_to_default() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut state = UiState::default();
        state.form.macro_file = Some("old.mac".into());
        replace_field(&mut state, &tx, FormField::Macro, "");
        handle_key(&mut state, key(KeyCode::Enter), &tx);
        assert_eq!(state.form.macro_file, None);
        assert_eq!(state.info, "Set macro file to vis.mac (default)");
    }

    #[test]
    fn invalid_values_keep_the_editor_open() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut state = UiState::default();
        let before = state.form.clone();

        replace_field(&mut state, &tx, FormField::Energy, "-5");
        handle_key(&mut state, key(KeyCode::Enter), &tx);
        assert!(state.editing.is_some());
        assert!(state.info.contains("energy"), "{}", state.info);
        handle_key(&mut state, key(KeyCode::Esc), &tx);

        replace_field(&mut state, &tx, FormField::Thickness, "thick");
        handle_key(&mut state, key(KeyCode::Enter), &tx);
        assert!(state.info.contains("thickness must be a number"));
        handle_key(&mut state, key(KeyCode::Esc), &tx);

        replace_field(&mut state, &tx, FormField::Events, "0");
        handle_key(&mut state, key(KeyCode::Enter), &tx);
        assert!(state.info.contains("event count"));
        handle_key(&mut state, key(KeyCode::Esc), &tx);

        replace_field(&mut state, &tx, FormField::Executable, "   ");
        handle_key(&mut state, key(KeyCode::Enter), &tx);
        assert!(state.info.contains("executable path is empty"));
        handle_key(&mut state, key(KeyCode::Esc), &tx);

        assert!(state.editing.is_none());
        assert_eq!(state.form, before);
    }

    #[test]
    fn editing_captures_command_keys() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut state = UiState::default();
        replace_field(&mut state, &tx, FormField::Executable, "./qrx");
        assert!(rx.try_recv().is_err());
        assert_eq!(state.tab, 0);
        handle_key(&mut state, key(KeyCode::Enter), &tx);
        assert_eq!(state.form.executable_path, std::path::PathBuf::from("./qrx"));
    }

    #[test]
    fn form_is_locked_while_running() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut state = UiState {
            run_state: RunState::Running,
            ..Default::default()
        };
        handle_key(&mut state, press('f'), &tx);
        assert_eq!(state.focus, FormField::Executable);
        handle_key(&mut state, key(KeyCode::Enter), &tx);
        assert!(state.editing.is_none());
        assert_eq!(state.info, "Settings are locked while a simulation runs");
    }

    #[test]
    fn run_start_closes_an_open_edit() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut state = UiState::default();
        replace_field(&mut state, &tx, FormField::Energy, "9");
        let ev = RunEvent::Started {
            command_line: "./main".into(),
        };
        state.run_state.on_event(&ev);
        apply_event(&mut state, ev);
        assert!(state.editing.is_none());
        assert_eq!(state.form.energy_value, 1.0);
    }

    #[test]
    fn unparseable_timestamp_is_shown_verbatim() {
        assert_eq!(format_timestamp("yesterday"), "yesterday");
        assert!(format_timestamp("2026-05-04T10:20:30Z").starts_with("2026-05-0"));
    }
}
