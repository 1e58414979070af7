use ratatui::{
    layout::Rect,
    style::Color,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

fn key_line(key: &'static str, pad: usize, what: &'static str) -> Line<'static> {
    Line::from(vec![
        Span::raw("  "),
        Span::styled(key, Style::default().fg(Color::Magenta)),
        Span::raw(" ".repeat(pad)),
        Span::raw(what),
    ])
}

pub fn draw_help(area: Rect, f: &mut Frame) {
    let p = Paragraph::new(vec![
        Line::from("Keybinds:"),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("q", Style::default().fg(Color::Magenta)),
            Span::raw(" / "),
            Span::styled("Ctrl-C", Style::default().fg(Color::Magenta)),
            Span::raw("  Quit (stops a running simulation)"),
        ]),
        key_line("tab", 9, "Switch tabs"),
        key_line("?", 11, "Show this help"),
        key_line("a", 11, "Toggle auto-save"),
        Line::from(""),
        Line::from("Run tab:"),
        key_line("r", 11, "Run simulation with the current form"),
        key_line("x", 11, "Stop the running simulation"),
        key_line("s", 11, "Save last result to history"),
        key_line("c", 11, "Clear log"),
        key_line("t", 11, "Cycle particle"),
        key_line("u", 11, "Cycle energy unit"),
        key_line("m", 11, "Cycle shield material"),
        key_line("n", 11, "Cycle thread count"),
        key_line("f", 11, "Focus next text field (executable, macro, energy, thickness, events)"),
        key_line("Enter", 7, "Edit focused field (Enter applies, Esc cancels)"),
        key_line("PgUp/PgDn", 3, "Scroll log (End follows output)"),
        Line::from(""),
        Line::from("History tab:"),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("↑/↓", Style::default().fg(Color::Magenta)),
            Span::raw(" or "),
            Span::styled("j/k", Style::default().fg(Color::Magenta)),
            Span::raw("  Navigate"),
        ]),
        key_line("e", 11, "Export selected as JSON"),
        key_line("l", 11, "Export selected output log"),
        key_line("y", 11, "Copy exported path to clipboard"),
        key_line("d", 11, "Delete selected"),
        key_line("r", 11, "Refresh history"),
        Line::from(""),
        Line::from("The form is locked while a simulation runs."),
    ])
    .block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(p, area);
}
