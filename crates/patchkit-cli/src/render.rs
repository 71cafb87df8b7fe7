use std::io::IsTerminal;
use std::time::SystemTime;

use anstyle::{AnsiColor, Effects, Style};
use patchkit_feed::PackageInfo;
use patchkit_installer::{EnvironmentDescriptor, TeardownReport};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum OutputStyle {
    Plain,
    Rich,
}

pub(crate) fn current_output_style() -> OutputStyle {
    resolve_output_style(std::io::stdout().is_terminal())
}

/// Rich output needs a terminal on stdout. Logs go to stderr and do not
/// affect the choice.
pub(crate) fn resolve_output_style(stdout_is_tty: bool) -> OutputStyle {
    if stdout_is_tty {
        OutputStyle::Rich
    } else {
        OutputStyle::Plain
    }
}

pub(crate) fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    match style {
        OutputStyle::Plain => message.to_string(),
        OutputStyle::Rich => format!("{} {message}", status_badge(status)),
    }
}

pub(crate) fn print_status(style: OutputStyle, status: &str, message: &str) {
    let line = render_status_line(style, status, message);
    match style {
        OutputStyle::Plain => println!("{line}"),
        OutputStyle::Rich => {
            let badge = status_badge(status);
            let rest = line.strip_prefix(&badge).unwrap_or(&line);
            println!("{}{rest}", colorize(status_style(status), &badge));
        }
    }
}

fn status_badge(status: &str) -> String {
    format!("[{}]", status.to_ascii_uppercase())
}

fn status_style(status: &str) -> Style {
    let color = match status {
        "ok" => AnsiColor::BrightGreen,
        "warn" => AnsiColor::BrightYellow,
        "err" => AnsiColor::BrightRed,
        _ => AnsiColor::BrightBlue,
    };
    Style::new()
        .fg_color(Some(color.into()))
        .effects(Effects::BOLD)
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}

pub(crate) fn format_descriptor_lines(descriptor: &EnvironmentDescriptor) -> Vec<String> {
    let mut lines = vec![
        format!("root: {}", descriptor.root.display()),
        format!("source: {}", descriptor.source_root.display()),
        format!("tool: {}", descriptor.tool_path.display()),
        format!("sdk: {}", descriptor.sdk_dir.display()),
        format!("msbuild sdks: {}", descriptor.msbuild_sdks_dir.display()),
    ];
    for (key, value) in &descriptor.overlay {
        lines.push(format!("env {key}={value}"));
    }
    lines
}

pub(crate) fn format_package_lines(packages: &[PackageInfo]) -> Vec<String> {
    packages
        .iter()
        .map(|package| {
            let mut line = format!(
                "{} {} ({})",
                package.id,
                package.version,
                unix_seconds(package.last_write_time)
            );
            if package.symbols {
                line.push_str(" [symbols]");
            }
            line
        })
        .collect()
}

pub(crate) fn format_teardown_lines(report: &TeardownReport) -> Vec<(&'static str, String)> {
    if report.is_clean() {
        return vec![("ok", format!("removed {}", report.root.display()))];
    }
    report
        .warnings
        .iter()
        .map(|warning| ("warn", warning.to_string()))
        .collect()
}

fn unix_seconds(time: SystemTime) -> u64 {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}
