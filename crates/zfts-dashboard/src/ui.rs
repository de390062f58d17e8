use crate::app::{App, EditField};
use crate::theme;
use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table, TableState, Wrap},
    Frame,
};
use zfts_core::{Backend, ButtonState, DisplayState, HealthState, JobRow};
use zfts_monitor::Monitor;

const COLUMN_TITLES: [&str; 9] = [
    "ID", "File", "State", "Progress", "Rate", "Remaining", "Size", "Pri", "Actions",
];

pub fn render(f: &mut Frame, app: &App, monitor: &Monitor) {
    let area = f.size();
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(0),
            Constraint::Length(1),
        ])
        .split(area);
    render_header(f, monitor, chunks[0]);

    let panels = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(chunks[1]);
    render_backend(f, app, monitor, Backend::Ground, panels[0]);
    render_backend(f, app, monitor, Backend::Air, panels[1]);
    render_footer(f, app, chunks[2]);

    if app.help_open {
        render_help(f, area);
    }
}

fn render_header(f: &mut Frame, monitor: &Monitor, area: Rect) {
    let mut lines = vec![Line::from(vec![
        Span::styled("ZFTS Transfer Monitor", theme::TITLE_STYLE),
        Span::raw("   "),
        Span::styled(monitor.user_display_name(), theme::HEADER_STYLE),
    ])];
    if let Some(detail) = monitor.user_detail() {
        lines.push(Line::from(Span::styled(detail.to_string(), theme::MUTED_STYLE)));
    }
    let note = monitor.status_note().unwrap_or("");
    lines.push(Line::from(Span::raw(note.to_string())));
    f.render_widget(Paragraph::new(lines), area);
}

fn render_backend(f: &mut Frame, app: &App, monitor: &Monitor, backend: Backend, area: Rect) {
    let session = monitor.session(backend);
    let health = session.health();
    let mut title = vec![
        Span::styled(format!(" {backend} "), theme::TITLE_STYLE),
        Span::styled(
            health.status_text(),
            Style::new()
                .fg(theme::health_color(health.state()))
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(format!(" · {}", health.latency_text())),
        Span::styled(poll_text(monitor, backend), theme::MUTED_STYLE),
    ];
    if health.state() != HealthState::Idle && !monitor.is_probing(backend) {
        title.push(Span::styled("· probe off ", theme::MUTED_STYLE));
    }
    if backend == Backend::Ground && monitor.push_live() {
        title.push(Span::styled("· push ", theme::MUTED_STYLE));
    }
    let border_style = if app.focus == backend {
        theme::FOCUS_BORDER
    } else {
        Style::default()
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(border_style)
        .title(Line::from(title));
    let inner = block.inner(area);
    f.render_widget(block, area);

    let parts = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1), Constraint::Min(0)])
        .split(inner);
    f.render_widget(Paragraph::new(info_line(app, monitor, backend)), parts[0]);

    let view = session.view();
    if let Some(placeholder) = view.placeholder(backend) {
        let paragraph = Paragraph::new(Span::styled(placeholder, theme::MUTED_STYLE))
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true });
        f.render_widget(paragraph, parts[1]);
        return;
    }

    let rows: Vec<Row> = view
        .rows()
        .iter()
        .enumerate()
        .map(|(index, row)| job_row(app, backend, index, row))
        .collect();
    let header = Row::new(COLUMN_TITLES.iter().map(|title| Cell::from(*title)))
        .style(theme::HEADER_STYLE);
    let widths = [
        Constraint::Length(6),
        Constraint::Min(16),
        Constraint::Length(8),
        Constraint::Length(9),
        Constraint::Length(14),
        Constraint::Length(10),
        Constraint::Length(10),
        Constraint::Length(4),
        Constraint::Length(36),
    ];
    let table = Table::new(rows, widths)
        .header(header)
        .highlight_style(if app.focus == backend {
            theme::SELECTED_STYLE
        } else {
            Style::default()
        });
    let mut state = TableState::default();
    state.select(app.selected_index(backend, view.rows().len()));
    f.render_stateful_widget(table, parts[1], &mut state);
}

fn poll_text(monitor: &Monitor, backend: Backend) -> String {
    if monitor.is_polling(backend) {
        let secs = monitor.session(backend).poll_interval().as_secs();
        format!(" · poll {secs}s ")
    } else {
        " · poll paused ".to_string()
    }
}

fn info_line(app: &App, monitor: &Monitor, backend: Backend) -> Line<'static> {
    let platform = monitor
        .session(backend)
        .view()
        .platform_name()
        .map(|name| format!("Sending Platform Name: {name}"));
    match backend {
        Backend::Ground => Line::from(Span::raw(platform.unwrap_or_default())),
        Backend::Air => {
            let field = |label: &'static str, value: &str, field: EditField| {
                let style = if app.editing == Some(field) {
                    theme::INPUT_STYLE
                } else {
                    Style::default()
                };
                vec![
                    Span::styled(label, theme::MUTED_STYLE),
                    Span::styled(format!("[{value}]"), style),
                ]
            };
            let mut spans = field("Host ", &app.host_input, EditField::Host);
            spans.push(Span::raw("  "));
            spans.extend(field("Port ", &app.port_input, EditField::Port));
            if let Some(platform) = platform {
                spans.push(Span::raw(format!("   {platform}")));
            }
            Line::from(spans)
        }
    }
}

fn job_row(app: &App, backend: Backend, index: usize, row: &JobRow) -> Row<'static> {
    let running = row.display_state == DisplayState::Running;
    let priority_style = if row.buttons.priority_enabled {
        Style::default()
    } else {
        theme::BUTTON_DISABLED
    };
    let priority = if app.has_priority_draft(backend, row) {
        format!("{}*", app.priority_for(backend, row))
    } else {
        app.priority_for(backend, row).to_string()
    };
    let actions = Line::from(vec![
        button_span(row.buttons.start),
        Span::raw(" "),
        button_span(row.buttons.stop),
        Span::raw(" "),
        button_span(row.buttons.cancel),
    ]);
    Row::new(vec![
        Cell::from(row.job.id.to_string()),
        Cell::from(row.job.file_name.clone()),
        Cell::from(Span::styled(
            row.display_state.label(),
            Style::new().fg(theme::state_color(running)),
        )),
        Cell::from(row.percent.clone()),
        Cell::from(row.rate.clone()),
        Cell::from(row.remaining.clone()),
        Cell::from(row.size.clone()),
        Cell::from(Span::styled(priority, priority_style)),
        Cell::from(actions),
    ])
    .style(theme::zebra_row_style(index))
}

fn button_span(button: ButtonState) -> Span<'static> {
    let style = if button.busy {
        theme::BUTTON_BUSY
    } else if button.enabled {
        theme::BUTTON_ENABLED
    } else {
        theme::BUTTON_DISABLED
    };
    Span::styled(format!("[{}]", button.label), style)
}

fn render_footer(f: &mut Frame, app: &App, area: Rect) {
    let hint = if app.editing.is_some() {
        "Enter apply · Tab host/port · Esc cancel"
    } else {
        "Tab focus · j/k select · s start · x stop · c cancel · 1-5 priority · p apply priority · [/] poll · h/o edit Air · a connect · d disconnect · ? help · q quit"
    };
    f.render_widget(Paragraph::new(Span::styled(hint, theme::MUTED_STYLE)), area);
}

fn render_help(f: &mut Frame, area: Rect) {
    let popup = centered_rect(60, 70, area);
    let block = Block::default()
        .borders(Borders::ALL)
        .title("Help")
        .border_style(theme::HEADER_STYLE);
    let inner = block.inner(popup);
    f.render_widget(Clear, popup);
    f.render_widget(block, popup);

    let bindings = [
        ("Tab", "Switch between Ground and Air"),
        ("j / Down", "Next job"),
        ("k / Up", "Previous job"),
        ("s", "Start selected job at chosen priority"),
        ("x", "Stop selected job"),
        ("c", "Cancel selected job"),
        ("1-5, +/-", "Choose priority"),
        ("p", "Send priority change only"),
        ("[ / ]", "Slower / faster poll"),
        ("h / o", "Edit Air host / port"),
        ("a", "Connect Air"),
        ("d", "Disconnect Air"),
        ("?", "Toggle help"),
        ("q / Esc", "Quit"),
    ];
    let mut text = vec![
        Line::from(Span::styled(
            "Keyboard Shortcuts",
            Style::default().add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
    ];
    for (key, action) in bindings {
        text.push(Line::from(vec![
            Span::styled(format!("{key:<10}"), theme::KEY_STYLE),
            Span::raw(action),
        ]));
    }
    f.render_widget(Paragraph::new(text).wrap(Wrap { trim: true }), inner);
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1])[1]
}
