use ratatui::style::{Color, Modifier, Style};
use zfts_core::HealthState;

pub const TITLE_STYLE: Style = Style::new()
    .fg(Color::Rgb(142, 192, 124))
    .add_modifier(Modifier::BOLD);
pub const HEADER_STYLE: Style = Style::new()
    .fg(Color::Rgb(250, 189, 47))
    .add_modifier(Modifier::BOLD);
pub const SELECTED_STYLE: Style = Style::new()
    .bg(Color::Rgb(131, 165, 152))
    .fg(Color::Black)
    .add_modifier(Modifier::BOLD);
pub const MUTED_STYLE: Style = Style::new().fg(Color::Rgb(146, 131, 116));
pub const KEY_STYLE: Style = Style::new().fg(Color::Cyan);
pub const FOCUS_BORDER: Style = Style::new().fg(Color::Cyan);
pub const BUTTON_ENABLED: Style = Style::new()
    .fg(Color::Rgb(235, 219, 178))
    .add_modifier(Modifier::BOLD);
pub const BUTTON_DISABLED: Style = Style::new().fg(Color::Rgb(102, 92, 84));
pub const BUTTON_BUSY: Style = Style::new()
    .fg(Color::Rgb(250, 189, 47))
    .add_modifier(Modifier::ITALIC);
pub const INPUT_STYLE: Style = Style::new()
    .fg(Color::Black)
    .bg(Color::Rgb(250, 189, 47));

pub fn zebra_row_style(index: usize) -> Style {
    let bg = if index % 2 == 0 {
        Color::Rgb(18, 20, 26)
    } else {
        Color::Rgb(24, 27, 34)
    };
    Style::new().bg(bg)
}

pub fn health_color(state: HealthState) -> Color {
    match state {
        HealthState::Live => Color::Rgb(184, 187, 38),
        HealthState::Connecting => Color::Rgb(250, 189, 47),
        HealthState::Unreachable => Color::Rgb(251, 73, 52),
        HealthState::Idle => Color::Rgb(146, 131, 116),
    }
}

pub fn state_color(running: bool) -> Color {
    if running {
        Color::Rgb(131, 165, 152)
    } else {
        Color::Rgb(146, 131, 116)
    }
}
