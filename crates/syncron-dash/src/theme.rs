use ratatui::style::{Color, Modifier, Style};
use syncron_core::Outcome;

pub const HEADER_STYLE: Style = Style::new()
    .fg(Color::Rgb(142, 192, 124))
    .add_modifier(Modifier::BOLD);
pub const SELECTED_STYLE: Style = Style::new()
    .bg(Color::Rgb(131, 165, 152))
    .fg(Color::Black)
    .add_modifier(Modifier::BOLD);
pub const MUTED_STYLE: Style = Style::new().fg(Color::Rgb(146, 131, 116));
pub const ERROR_STYLE: Style = Style::new()
    .fg(Color::Rgb(251, 73, 52))
    .add_modifier(Modifier::BOLD);
pub const GAP_STYLE: Style = Style::new()
    .fg(Color::Rgb(250, 189, 47))
    .add_modifier(Modifier::ITALIC);

pub fn zebra_row_style(index: usize) -> Style {
    let bg = if index % 2 == 0 {
        Color::Rgb(18, 20, 26)
    } else {
        Color::Rgb(24, 27, 34)
    };
    Style::new().bg(bg)
}

pub fn outcome_color(outcome: Option<Outcome>) -> Color {
    match outcome {
        Some(Outcome::Success) => Color::Rgb(184, 187, 38),
        Some(Outcome::Failure) => Color::Rgb(251, 73, 52),
        Some(Outcome::Running) => Color::Rgb(131, 165, 152),
        None => Color::Rgb(146, 131, 116),
    }
}

pub mod icons {
    pub const SUCCESS: &str = "x";
    pub const FAILURE: &str = "!";
    pub const RUNNING: &str = ">";
    pub const NEVER_RAN: &str = ".";
}

pub fn outcome_icon(outcome: Option<Outcome>) -> &'static str {
    match outcome {
        Some(Outcome::Success) => icons::SUCCESS,
        Some(Outcome::Failure) => icons::FAILURE,
        Some(Outcome::Running) => icons::RUNNING,
        None => icons::NEVER_RAN,
    }
}

fn ansi_color(code: u16) -> Option<Color> {
    let color = match code % 10 {
        0 => Color::Black,
        1 => Color::Red,
        2 => Color::Green,
        3 => Color::Yellow,
        4 => Color::Blue,
        5 => Color::Magenta,
        6 => Color::Cyan,
        7 => Color::Gray,
        _ => return None,
    };
    Some(color)
}

fn ansi_bright(code: u16) -> Option<Color> {
    let color = match code % 10 {
        0 => Color::DarkGray,
        1 => Color::LightRed,
        2 => Color::LightGreen,
        3 => Color::LightYellow,
        4 => Color::LightBlue,
        5 => Color::LightMagenta,
        6 => Color::LightCyan,
        7 => Color::White,
        _ => return None,
    };
    Some(color)
}

/// Terminal style for a set of `ansi-<code>` classes. Unknown classes are ignored.
pub fn ansi_style<'a>(classes: impl IntoIterator<Item = &'a String>) -> Style {
    let mut style = Style::new();
    for class in classes {
        let Some(code) = class
            .strip_prefix("ansi-")
            .and_then(|code| code.parse::<u16>().ok())
        else {
            continue;
        };
        style = match code {
            1 => style.add_modifier(Modifier::BOLD),
            2 => style.add_modifier(Modifier::DIM),
            3 => style.add_modifier(Modifier::ITALIC),
            4 => style.add_modifier(Modifier::UNDERLINED),
            7 => style.add_modifier(Modifier::REVERSED),
            30..=37 => ansi_color(code).map_or(style, |color| style.fg(color)),
            40..=47 => ansi_color(code).map_or(style, |color| style.bg(color)),
            90..=97 => ansi_bright(code).map_or(style, |color| style.fg(color)),
            100..=107 => ansi_bright(code).map_or(style, |color| style.bg(color)),
            _ => style,
        };
    }
    style
}
