//! Full-screen renderer.
//!
//! Every frame repaints the whole screen from `SessionState` and the task
//! snapshot, so the output depends on nothing else.

use std::fmt::Write as _;

use crate::core::types::{EditTarget, Mode, Registration, RegistrationStep, SessionState, Task};

pub const CLEAR_SCREEN: &str = "\x1b[2J";
pub const CURSOR_HOME: &str = "\x1b[H";
pub const HIDE_CURSOR: &str = "\x1b[?25l";
pub const SHOW_CURSOR: &str = "\x1b[?25h";
pub const ENTER_ALT_SCREEN: &str = "\x1b[?1049h";
pub const LEAVE_ALT_SCREEN: &str = "\x1b[?1049l";
pub const DISABLE_WRAP: &str = "\x1b[?7l";
pub const ENABLE_WRAP: &str = "\x1b[?7h";

pub const NEW_TASK_LABEL: &str = "New task: ";
pub const EDIT_TASK_LABEL: &str = "Edit task: ";
pub const SET_PASSWORD_LABEL: &str = "Choose a password: ";
pub const CONFIRM_PASSWORD_LABEL: &str = "Confirm password: ";
pub const FAREWELL: &str = "Goodbye!";

const BROWSE_HINT: &str =
    "Commands: ↑/↓: Navigate • Space: Toggle • Enter: Edit • Tab: New • Delete: Remove • Ctrl+C: Exit";
const EDIT_HINT: &str = "Commands: ←/→: Move cursor • Enter: Save • Tab: Cancel • Ctrl+C: Exit";
const EMPTY_LIST: &str = "No tasks yet. Press Tab to add one.";

/// Header, separator, hint and blank line.
const HEADER_ROWS: u16 = 4;
/// Separator and prompt overwritten at the bottom while editing.
const EDIT_FOOTER_ROWS: u16 = 2;

/// Bytes that put the client terminal into session mode.
pub fn enter_session() -> Vec<u8> {
    format!("{ENTER_ALT_SCREEN}{DISABLE_WRAP}").into_bytes()
}

/// Bytes that restore the client terminal, followed by `lines` on the main screen.
pub fn leave_session(lines: &[&str]) -> Vec<u8> {
    let mut out = format!("{SHOW_CURSOR}{ENABLE_WRAP}{LEAVE_ALT_SCREEN}");
    for line in lines {
        out.push_str(line);
        out.push_str("\r\n");
    }
    out.into_bytes()
}

/// Render a complete frame.
pub fn render(state: &SessionState, snapshot: &[Task]) -> Vec<u8> {
    let mut out = String::with_capacity(1024);
    out.push_str(CLEAR_SCREEN);
    out.push_str(CURSOR_HOME);
    out.push_str(HIDE_CURSOR);

    match &state.mode {
        Mode::Registering(registration) => render_registration(&mut out, state, registration),
        Mode::Browsing | Mode::Editing(_) => render_tasks(&mut out, state, snapshot),
    }
    out.into_bytes()
}

fn render_registration(out: &mut String, state: &SessionState, registration: &Registration) {
    let width = usize::from(state.viewport.width);
    line(out, &format!("Welcome, {}!", state.identity));
    line(out, &separator(width));
    line(
        out,
        "No account exists for this username yet. Choose a password to register.",
    );
    line(out, "");

    let label = match registration.step {
        RegistrationStep::SetPassword => SET_PASSWORD_LABEL,
        RegistrationStep::ConfirmPassword => CONFIRM_PASSWORD_LABEL,
    };
    let masked = "*".repeat(registration.buffer.chars().count());
    line(out, &format!("{label}{masked}"));

    if let Some(notice) = &registration.notice {
        line(out, "");
        line(out, notice);
        line(out, "Press any key to continue.");
    }
}

fn render_tasks(out: &mut String, state: &SessionState, snapshot: &[Task]) {
    let width = usize::from(state.viewport.width);
    let height = state.viewport.height.max(1);
    let editing = match &state.mode {
        Mode::Editing(edit) => Some(edit),
        _ => None,
    };

    line(out, &format!("Tasks for {}", state.identity));
    line(out, &separator(width));
    line(out, if editing.is_some() { EDIT_HINT } else { BROWSE_HINT });
    line(out, "");

    let edit_rows = if editing.is_some() { EDIT_FOOTER_ROWS } else { 0 };
    let footer_rows = edit_rows + u16::from(state.status.is_some());
    let list_rows = usize::from(height.saturating_sub(HEADER_ROWS + footer_rows));

    if snapshot.is_empty() {
        if list_rows > 0 {
            line(out, EMPTY_LIST);
        }
    } else {
        let first = first_visible_row(state.selected, list_rows);
        for (index, task) in snapshot.iter().enumerate().skip(first).take(list_rows) {
            let marker = if editing.is_none() && index == state.selected {
                "> "
            } else {
                "  "
            };
            let checkbox = if task.completed { "[✓]" } else { "[ ]" };
            line(
                out,
                &format!("{marker}{checkbox} {}. {}", index + 1, task.text),
            );
        }
    }

    if let Some(status) = &state.status {
        let row = height.saturating_sub(footer_rows - 1).max(1);
        move_to(out, row, 1);
        out.push_str(status);
    }

    if let Some(edit) = editing {
        let label = match edit.target {
            EditTarget::NewTask => NEW_TASK_LABEL,
            EditTarget::ExistingTask(_) => EDIT_TASK_LABEL,
        };
        let prompt_row = height;
        move_to(out, height.saturating_sub(1).max(1), 1);
        out.push_str(&separator(width));
        move_to(out, prompt_row, 1);
        out.push_str(label);
        out.push_str(&edit.text);
        out.push_str(SHOW_CURSOR);
        let column = label.chars().count() + edit.cursor + 1;
        move_to(out, prompt_row, u16::try_from(column).unwrap_or(u16::MAX));
    }
}

/// First task index shown so that `selected` stays inside a window of `rows`.
fn first_visible_row(selected: usize, rows: usize) -> usize {
    if rows == 0 || selected < rows {
        0
    } else {
        selected + 1 - rows
    }
}

fn line(out: &mut String, text: &str) {
    out.push_str(text);
    out.push_str("\r\n");
}

fn separator(width: usize) -> String {
    "─".repeat(width)
}

fn move_to(out: &mut String, row: u16, col: u16) {
    let _ = write!(out, "\x1b[{row};{col}H");
}
