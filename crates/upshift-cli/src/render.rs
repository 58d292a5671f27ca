use anstyle::{AnsiColor, Effects, Style};

fn success_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightGreen.into()))
        .effects(Effects::BOLD)
}

fn error_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightRed.into()))
        .effects(Effects::BOLD)
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}

pub(crate) fn success(message: &str) {
    println!("{}", colorize(success_style(), message));
}

pub(crate) fn error(message: &str) {
    println!("{}", colorize(error_style(), message));
}

pub(crate) fn info(message: &str) {
    println!("{message}");
}
