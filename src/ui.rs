// 🖥️ Staging viewer - read-only terminal table over the staged receipts

use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};
use receipt_ledger::{Amount, StagingRecord, StagingSnapshot, ValidationStatus};
use std::collections::BTreeMap;
use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Staging,
    LastRun,
}

impl Page {
    pub fn next(&self) -> Self {
        match self {
            Page::Staging => Page::LastRun,
            Page::LastRun => Page::Staging,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Page::Staging => "Staging",
            Page::LastRun => "Last Run",
        }
    }
}

pub struct App {
    pub snapshot: StagingSnapshot,
    pub state: TableState,
    pub current_page: Page,
    pub show_detail: bool,
}

impl App {
    pub fn new(snapshot: StagingSnapshot) -> Self {
        let mut state = TableState::default();
        if !snapshot.table.is_empty() {
            state.select(Some(0));
        }

        Self {
            snapshot,
            state,
            current_page: Page::Staging,
            show_detail: false,
        }
    }

    fn rows(&self) -> &[StagingRecord] {
        self.snapshot.table.rows()
    }

    pub fn toggle_detail(&mut self) {
        self.show_detail = !self.show_detail;
    }

    pub fn selected_row(&self) -> Option<&StagingRecord> {
        self.state.selected().and_then(|i| self.rows().get(i))
    }

    pub fn next(&mut self) {
        let len = self.rows().len();
        if len == 0 {
            return;
        }
        let i = match self.state.selected() {
            Some(i) if i + 1 < len => i + 1,
            _ => 0,
        };
        self.state.select(Some(i));
    }

    pub fn previous(&mut self) {
        let len = self.rows().len();
        if len == 0 {
            return;
        }
        let i = match self.state.selected() {
            Some(0) | None => len - 1,
            Some(i) => i - 1,
        };
        self.state.select(Some(i));
    }

    pub fn page_down(&mut self) {
        let len = self.rows().len();
        if len == 0 {
            return;
        }
        let i = self.state.selected().map(|i| (i + 20).min(len - 1)).unwrap_or(0);
        self.state.select(Some(i));
    }

    pub fn page_up(&mut self) {
        let i = self.state.selected().map(|i| i.saturating_sub(20)).unwrap_or(0);
        self.state.select(Some(i));
    }

    /// Staged total per currency
    pub fn totals(&self) -> BTreeMap<String, Amount> {
        let mut totals: BTreeMap<String, Amount> = BTreeMap::new();
        for row in self.rows() {
            let entry = totals.entry(row.currency.clone()).or_insert(Amount::from_minor(0));
            *entry = Amount::from_minor(entry.minor() + row.amount.minor());
        }
        totals
    }
}

pub fn run_ui(app: &mut App) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        println!("Error: {:?}", err);
    }

    Ok(())
}

fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
) -> io::Result<()> {
    loop {
        terminal.draw(|f| ui(f, app))?;

        if let Event::Key(key) = event::read()? {
            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => return Ok(()),
                KeyCode::Enter => app.toggle_detail(),
                KeyCode::Tab | KeyCode::BackTab => app.current_page = app.current_page.next(),
                KeyCode::Down | KeyCode::Char('j') => app.next(),
                KeyCode::Up | KeyCode::Char('k') => app.previous(),
                KeyCode::PageDown => app.page_down(),
                KeyCode::PageUp => app.page_up(),
                KeyCode::Home => app.state.select(Some(0)),
                KeyCode::End => {
                    if !app.rows().is_empty() {
                        app.state.select(Some(app.rows().len() - 1));
                    }
                }
                _ => {}
            }
        }
    }
}

fn ui(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header with navigation
            Constraint::Min(0),    // Content area
            Constraint::Length(3), // Status bar
        ])
        .split(f.size());

    render_header(f, chunks[0], app);

    match app.current_page {
        Page::Staging if app.show_detail => {
            let content_chunks = Layout::default()
                .direction(Direction::Horizontal)
                .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
                .split(chunks[1]);

            render_table(f, content_chunks[0], app);
            render_detail_panel(f, content_chunks[1], app);
        }
        Page::Staging => render_table(f, chunks[1], app),
        Page::LastRun => render_last_run(f, chunks[1], app),
    }

    render_status_bar(f, chunks[2], app);
}

fn render_header(f: &mut Frame, area: Rect, app: &App) {
    let mut spans = vec![];
    for (i, page) in [Page::Staging, Page::LastRun].iter().enumerate() {
        if i > 0 {
            spans.push(Span::raw(" │ "));
        }
        let style = if *page == app.current_page {
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
        } else {
            Style::default().fg(Color::DarkGray)
        };
        spans.push(Span::styled(page.title().to_string(), style));
    }

    spans.push(Span::raw("  |  "));
    spans.push(Span::styled(
        format!("Staged: {}", app.rows().len()),
        Style::default().fg(Color::White),
    ));
    for (currency, total) in app.totals() {
        spans.push(Span::raw("  "));
        spans.push(Span::styled(
            format!("{} {}", total, currency),
            Style::default().fg(Color::Green),
        ));
    }

    let header = Paragraph::new(vec![Line::from(spans)])
        .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(Color::Cyan)));

    f.render_widget(header, area);
}

fn confidence_color(confidence: u8) -> Color {
    match confidence {
        80..=100 => Color::Green,
        50..=79 => Color::Yellow,
        _ => Color::Red,
    }
}

fn render_table(f: &mut Frame, area: Rect, app: &mut App) {
    let header_cells = ["Date", "Description", "Amount", "Tax", "Cur", "Conf", "File"]
        .iter()
        .map(|h| {
            Cell::from(*h).style(
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD),
            )
        });

    let header = Row::new(header_cells)
        .style(Style::default().bg(Color::DarkGray))
        .height(1);

    let rows = app.rows().iter().map(|row| {
        let cells = vec![
            Cell::from(row.staging_date()),
            Cell::from(truncate(&row.description, 30)),
            Cell::from(row.amount.to_string()),
            Cell::from(row.tax.map(|t| t.to_string()).unwrap_or_default()),
            Cell::from(row.currency.clone()),
            Cell::from(row.confidence.to_string())
                .style(Style::default().fg(confidence_color(row.confidence))),
            Cell::from(truncate(&row.done_filename, 40)),
        ];

        Row::new(cells).height(1)
    });

    let table = Table::new(
        rows,
        [
            Constraint::Length(12),
            Constraint::Length(32),
            Constraint::Length(12),
            Constraint::Length(10),
            Constraint::Length(5),
            Constraint::Length(6),
            Constraint::Min(20),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(" Staged Receipts "),
    )
    .highlight_style(
        Style::default()
            .bg(Color::DarkGray)
            .add_modifier(Modifier::BOLD),
    )
    .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, &mut app.state);
}

fn label(text: &str) -> Span<'static> {
    Span::styled(
        format!("  {}: ", text),
        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
    )
}

fn render_last_run(f: &mut Frame, area: Rect, app: &App) {
    let mut content = vec![Line::from("")];

    match &app.snapshot.last_run {
        Some(run) => {
            let c = run.counters;
            content.push(Line::from(vec![label("Run"), Span::raw(run.run_id.to_string())]));
            content.push(Line::from(vec![
                label("Finished"),
                Span::raw(run.finished_at.format("%Y-%m-%d %H:%M:%S UTC").to_string()),
            ]));
            content.push(Line::from(""));
            content.push(Line::from(vec![label("Processed"), Span::raw(c.processed.to_string())]));
            content.push(Line::from(vec![
                label("Succeeded"),
                Span::styled(c.succeeded.to_string(), Style::default().fg(Color::Green)),
            ]));
            content.push(Line::from(vec![
                label("Duplicates"),
                Span::styled(c.duplicates.to_string(), Style::default().fg(Color::Yellow)),
            ]));
            content.push(Line::from(vec![
                label("Errors"),
                Span::styled(c.errors.to_string(), Style::default().fg(Color::Red)),
            ]));
        }
        None => content.push(Line::from("  No scan has run yet")),
    }

    content.push(Line::from(""));
    content.push(Line::from("  ─────────────────────────────────────"));
    content.push(Line::from(""));

    let (status, color) = match &app.snapshot.status {
        Some(status @ ValidationStatus::Ready { .. }) => (status.describe(), Color::Green),
        Some(status @ ValidationStatus::NothingToImport { .. }) => (status.describe(), Color::DarkGray),
        Some(status) => (status.describe(), Color::Red),
        None => ("ledger not available".to_string(), Color::DarkGray),
    };
    content.push(Line::from(vec![
        label("Import"),
        Span::styled(wrap_text(&status, 70), Style::default().fg(color)),
    ]));

    let paragraph = Paragraph::new(content).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(" Last Scan "),
    );

    f.render_widget(paragraph, area);
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let selected = app.state.selected().map(|i| i + 1).unwrap_or(0);

    let status_spans = vec![
        Span::styled(
            format!(" Row: {}/{} ", selected, app.rows().len()),
            Style::default().fg(Color::Cyan),
        ),
        Span::raw(" | "),
        Span::styled("Enter", Style::default().fg(Color::Yellow)),
        Span::raw(" Details | "),
        Span::styled("Tab", Style::default().fg(Color::Yellow)),
        Span::raw(" Page | "),
        Span::styled("↑/↓", Style::default().fg(Color::Yellow)),
        Span::raw(" Nav | "),
        Span::styled("PgUp/PgDn", Style::default().fg(Color::Yellow)),
        Span::raw(" Fast | "),
        Span::styled("q", Style::default().fg(Color::Red)),
        Span::raw(" Quit"),
    ];

    let status_bar = Paragraph::new(vec![Line::from(status_spans)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White)),
    );

    f.render_widget(status_bar, area);
}

fn render_detail_panel(f: &mut Frame, area: Rect, app: &App) {
    let row = match app.selected_row() {
        Some(r) => r,
        None => {
            let no_selection = Paragraph::new("No receipt selected").block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(Color::Yellow))
                    .title(" Receipt Details "),
            );
            f.render_widget(no_selection, area);
            return;
        }
    };

    let content = vec![
        Line::from(""),
        Line::from(vec![label("Date"), Span::raw(row.staging_date())]),
        Line::from(""),
        Line::from(vec![
            label("Amount"),
            Span::styled(row.amount.to_string(), Style::default().fg(Color::Green)),
            Span::raw(" "),
            Span::raw(row.currency.clone()),
        ]),
        Line::from(""),
        Line::from(vec![
            label("Tax"),
            Span::raw(row.tax.map(|t| t.to_string()).unwrap_or_else(|| "-".to_string())),
            Span::raw(
                row.tax_percentage
                    .map(|p| format!(" ({}%)", p))
                    .unwrap_or_default(),
            ),
        ]),
        Line::from(""),
        Line::from(vec![
            label("Confidence"),
            Span::styled(
                row.confidence.to_string(),
                Style::default().fg(confidence_color(row.confidence)),
            ),
        ]),
        Line::from(""),
        Line::from("  ─────────────────────────────────────"),
        Line::from(""),
        Line::from(vec![Span::styled(
            "  PROVENANCE",
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED),
        )]),
        Line::from(""),
        Line::from(vec![
            label("File"),
            Span::styled(row.done_filename.clone(), Style::default().fg(Color::Green)),
        ]),
        Line::from(""),
        Line::from(vec![
            label("Hash"),
            Span::styled(row.hash.short().to_string(), Style::default().fg(Color::Green)),
        ]),
        Line::from(""),
        Line::from("  ─────────────────────────────────────"),
        Line::from(""),
        Line::from(vec![
            Span::raw("  "),
            Span::styled(
                wrap_text(&row.description, 35),
                Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
            ),
        ]),
        Line::from(""),
        Line::from(vec![Span::styled(
            "  Press Enter to close",
            Style::default()
                .fg(Color::DarkGray)
                .add_modifier(Modifier::ITALIC),
        )]),
    ];

    let detail_panel = Paragraph::new(content).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Yellow))
            .title(" Receipt Details "),
    );

    f.render_widget(detail_panel, area);
}

/// Char-safe: descriptions are free text
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

fn wrap_text(text: &str, width: usize) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        if !current.is_empty() && current.chars().count() + word.chars().count() + 1 > width {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }

    lines.join("\n  ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use receipt_ledger::{fingerprint, StagingTable};

    fn row(description: &str, currency: &str, minor: i64) -> StagingRecord {
        StagingRecord {
            amount: Amount::from_minor(minor),
            tax: None,
            tax_percentage: None,
            description: description.to_string(),
            currency: currency.to_string(),
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            confidence: 75,
            hash: fingerprint(description.as_bytes()),
            done_filename: format!("20240101-{}.jpg", description),
        }
    }

    fn app(rows: Vec<StagingRecord>) -> App {
        App::new(StagingSnapshot {
            table: StagingTable::from_rows(rows),
            last_run: None,
            status: None,
        })
    }

    #[test]
    fn test_navigation_wraps() {
        let mut app = app(vec![row("a", "EUR", 100), row("b", "EUR", 200)]);
        assert_eq!(app.state.selected(), Some(0));

        app.previous();
        assert_eq!(app.state.selected(), Some(1));
        app.next();
        assert_eq!(app.state.selected(), Some(0));
        app.page_down();
        assert_eq!(app.selected_row().map(|r| r.description.as_str()), Some("b"));
    }

    #[test]
    fn test_totals_per_currency() {
        let app = app(vec![row("a", "EUR", 100), row("b", "USD", 250), row("c", "EUR", 50)]);
        let totals = app.totals();

        assert_eq!(totals.get("EUR"), Some(&Amount::from_minor(150)));
        assert_eq!(totals.get("USD"), Some(&Amount::from_minor(250)));
    }

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(truncate("Café au lait", 20), "Café au lait");
        assert_eq!(truncate("Bäckerei Müller GmbH", 10), "Bäckere...");
    }
}
