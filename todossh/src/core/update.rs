//! Session state machine: applies one [`KeyEvent`] to a [`SessionState`].
//!
//! `apply` never touches a store. Mutations come back as [`StoreCommand`]s for
//! the session loop to execute; the loop then refreshes the snapshot and
//! re-clamps the selection before the next frame.

use tracing::debug;

use crate::core::types::{
    EditBuffer, EditTarget, KeyEvent, Mode, Registration, RegistrationStep, SessionState,
    StoreCommand, Task,
};

/// Outcome of applying one event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transition {
    /// Store mutations to execute, in order.
    pub commands: Vec<StoreCommand>,
    /// Visible state changed; the screen must be repainted.
    pub redraw: bool,
    /// The session must end.
    pub quit: bool,
}

impl Transition {
    fn none() -> Self {
        Self::default()
    }

    fn redraw() -> Self {
        Self {
            redraw: true,
            ..Self::default()
        }
    }

    fn quit() -> Self {
        Self {
            quit: true,
            ..Self::default()
        }
    }

    fn command(command: StoreCommand) -> Self {
        Self {
            commands: vec![command],
            redraw: true,
            quit: false,
        }
    }
}

/// Apply `event` to `state` given the current task `snapshot`.
pub fn apply(state: &mut SessionState, event: KeyEvent, snapshot: &[Task]) -> Transition {
    if matches!(event, KeyEvent::Interrupt | KeyEvent::EndOfInput) {
        debug!(user = %state.identity, ?event, "session termination requested");
        return Transition::quit();
    }

    // A status line lives for exactly one frame.
    let had_status = state.status.take().is_some();

    let mut transition = match state.mode {
        Mode::Registering(_) => apply_registering(state, event),
        Mode::Browsing => apply_browsing(state, event, snapshot),
        Mode::Editing(_) => apply_editing(state, event),
    };
    transition.redraw |= had_status;
    transition
}

fn apply_registering(state: &mut SessionState, event: KeyEvent) -> Transition {
    let min_len = state.min_password_len;
    let Mode::Registering(registration) = &mut state.mode else {
        return Transition::none();
    };

    if registration.notice.take().is_some() {
        return Transition::redraw();
    }

    match event {
        KeyEvent::Enter => match registration.step {
            RegistrationStep::SetPassword => {
                if registration.buffer.chars().count() < min_len {
                    registration.buffer.clear();
                    registration.notice = Some(format!(
                        "Password must be at least {min_len} characters long."
                    ));
                } else {
                    registration.pending_password = Some(std::mem::take(&mut registration.buffer));
                    registration.step = RegistrationStep::ConfirmPassword;
                }
                Transition::redraw()
            }
            RegistrationStep::ConfirmPassword => {
                let confirmed = registration.pending_password.as_deref()
                    == Some(registration.buffer.as_str());
                if !confirmed {
                    *registration = Registration {
                        notice: Some("Passwords do not match. Please try again.".to_string()),
                        ..Registration::new()
                    };
                    return Transition::redraw();
                }
                let password = registration.pending_password.take().unwrap_or_default();
                let username = state.identity.clone();
                state.mode = Mode::Browsing;
                state.selected = 0;
                Transition::command(StoreCommand::RegisterCredential { username, password })
            }
        },
        KeyEvent::Backspace => {
            if registration.buffer.pop().is_some() {
                Transition::redraw()
            } else {
                Transition::none()
            }
        }
        KeyEvent::Printable(byte) => {
            registration.buffer.push(char::from(byte));
            Transition::redraw()
        }
        _ => Transition::none(),
    }
}

fn apply_browsing(state: &mut SessionState, event: KeyEvent, snapshot: &[Task]) -> Transition {
    let selected = snapshot.get(state.selected);
    match event {
        KeyEvent::Tab => {
            state.mode = Mode::Editing(EditBuffer {
                target: EditTarget::NewTask,
                text: String::new(),
                cursor: 0,
            });
            Transition::redraw()
        }
        KeyEvent::Enter => match selected {
            Some(task) => {
                state.mode = Mode::Editing(EditBuffer {
                    target: EditTarget::ExistingTask(task.id),
                    text: task.text.clone(),
                    cursor: task.text.chars().count(),
                });
                Transition::redraw()
            }
            None => Transition::none(),
        },
        KeyEvent::ArrowUp => {
            let target = state.selected.saturating_sub(1);
            move_selection(state, target)
        }
        KeyEvent::ArrowDown => {
            let target = (state.selected + 1).min(snapshot.len().saturating_sub(1));
            move_selection(state, target)
        }
        KeyEvent::Printable(b' ') => match selected {
            Some(task) => Transition::command(StoreCommand::ToggleTask(task.id)),
            None => Transition::none(),
        },
        // The selection is re-clamped against the refreshed snapshot, so a
        // failed delete leaves it where it was.
        KeyEvent::Delete => match selected {
            Some(task) => Transition::command(StoreCommand::DeleteTask(task.id)),
            None => Transition::none(),
        },
        _ => Transition::none(),
    }
}

fn move_selection(state: &mut SessionState, target: usize) -> Transition {
    if target == state.selected {
        return Transition::none();
    }
    state.selected = target;
    Transition::redraw()
}

fn apply_editing(state: &mut SessionState, event: KeyEvent) -> Transition {
    let Mode::Editing(edit) = &mut state.mode else {
        return Transition::none();
    };

    match event {
        KeyEvent::Tab => {
            state.mode = Mode::Browsing;
            Transition::redraw()
        }
        KeyEvent::Enter => {
            let text = edit.text.trim().to_string();
            let target = edit.target;
            state.mode = Mode::Browsing;
            if text.is_empty() {
                return Transition::redraw();
            }
            Transition::command(match target {
                EditTarget::NewTask => StoreCommand::AddTask(text),
                EditTarget::ExistingTask(id) => StoreCommand::UpdateTask { id, text },
            })
        }
        KeyEvent::Backspace => {
            if edit.cursor == 0 {
                return Transition::none();
            }
            edit.cursor -= 1;
            let at = byte_index(&edit.text, edit.cursor);
            edit.text.remove(at);
            Transition::redraw()
        }
        KeyEvent::Delete => {
            if edit.cursor >= edit.text.chars().count() {
                return Transition::none();
            }
            let at = byte_index(&edit.text, edit.cursor);
            edit.text.remove(at);
            Transition::redraw()
        }
        KeyEvent::ArrowLeft => {
            if edit.cursor == 0 {
                return Transition::none();
            }
            edit.cursor -= 1;
            Transition::redraw()
        }
        KeyEvent::ArrowRight => {
            if edit.cursor >= edit.text.chars().count() {
                return Transition::none();
            }
            edit.cursor += 1;
            Transition::redraw()
        }
        KeyEvent::Printable(byte) => {
            let at = byte_index(&edit.text, edit.cursor);
            edit.text.insert(at, char::from(byte));
            edit.cursor += 1;
            Transition::redraw()
        }
        _ => Transition::none(),
    }
}

/// Byte offset of the `chars`-th character (or the end of `text`).
fn byte_index(text: &str, chars: usize) -> usize {
    text.char_indices()
        .nth(chars)
        .map_or(text.len(), |(idx, _)| idx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::task;

    fn type_text(state: &mut SessionState, text: &str, snapshot: &[Task]) -> Vec<Transition> {
        text.bytes()
            .map(|byte| apply(state, KeyEvent::Printable(byte), snapshot))
            .collect()
    }

    fn editing(state: &SessionState) -> &EditBuffer {
        match &state.mode {
            Mode::Editing(edit) => edit,
            other => panic!("expected editing mode, got {other:?}"),
        }
    }

    fn registration(state: &SessionState) -> &Registration {
        match &state.mode {
            Mode::Registering(registration) => registration,
            other => panic!("expected registering mode, got {other:?}"),
        }
    }

    #[test]
    fn scenario_add_task_from_empty_list() {
        let mut state = SessionState::browsing("alice");
        let snapshot: Vec<Task> = Vec::new();

        let mut commands = apply(&mut state, KeyEvent::Tab, &snapshot).commands;
        for transition in type_text(&mut state, "buy milk", &snapshot) {
            commands.extend(transition.commands);
        }
        commands.extend(apply(&mut state, KeyEvent::Enter, &snapshot).commands);

        assert_eq!(commands, vec![StoreCommand::AddTask("buy milk".to_string())]);
        assert_eq!(state.mode, Mode::Browsing);
    }

    #[test]
    fn scenario_space_toggles_selected_task() {
        let mut state = SessionState::browsing("alice");
        let snapshot = vec![task(1, "a", false)];

        let transition = apply(&mut state, KeyEvent::Printable(b' '), &snapshot);
        assert_eq!(transition.commands, vec![StoreCommand::ToggleTask(1)]);
        assert!(transition.redraw);
    }

    #[test]
    fn scenario_short_password_is_rejected() {
        let mut state = SessionState::registering("bob");
        type_text(&mut state, "abc", &[]);
        let transition = apply(&mut state, KeyEvent::Enter, &[]);

        assert!(transition.commands.is_empty());
        let registration = registration(&state);
        assert_eq!(registration.step, RegistrationStep::SetPassword);
        assert!(registration.buffer.is_empty());
        assert!(registration.notice.is_some());
    }

    #[test]
    fn scenario_password_set_and_confirmed() {
        let mut state = SessionState::registering("bob");
        type_text(&mut state, "abcdef", &[]);
        apply(&mut state, KeyEvent::Enter, &[]);
        {
            let registration = registration(&state);
            assert_eq!(registration.step, RegistrationStep::ConfirmPassword);
            assert_eq!(registration.pending_password.as_deref(), Some("abcdef"));
            assert!(registration.buffer.is_empty());
        }

        type_text(&mut state, "abcdef", &[]);
        let transition = apply(&mut state, KeyEvent::Enter, &[]);
        assert_eq!(
            transition.commands,
            vec![StoreCommand::RegisterCredential {
                username: "bob".to_string(),
                password: "abcdef".to_string(),
            }]
        );
        assert_eq!(state.mode, Mode::Browsing);
    }

    #[test]
    fn mismatched_confirmation_reverts_to_first_step() {
        let mut state = SessionState::registering("bob");
        type_text(&mut state, "abcdef", &[]);
        apply(&mut state, KeyEvent::Enter, &[]);
        type_text(&mut state, "abcdeX", &[]);
        let transition = apply(&mut state, KeyEvent::Enter, &[]);

        assert!(transition.commands.is_empty());
        let registration = registration(&state);
        assert_eq!(registration.step, RegistrationStep::SetPassword);
        assert_eq!(registration.pending_password, None);
        assert!(registration.buffer.is_empty());
        assert!(registration.notice.is_some());
    }

    #[test]
    fn notice_swallows_exactly_one_keypress() {
        let mut state = SessionState::registering("bob");
        apply(&mut state, KeyEvent::Enter, &[]);
        assert!(registration(&state).notice.is_some());

        let dismiss = apply(&mut state, KeyEvent::Printable(b'x'), &[]);
        assert!(dismiss.redraw);
        assert!(registration(&state).notice.is_none());
        assert!(registration(&state).buffer.is_empty());

        apply(&mut state, KeyEvent::Printable(b'x'), &[]);
        assert_eq!(registration(&state).buffer, "x");
    }

    #[test]
    fn registration_ignores_navigation_keys() {
        let mut state = SessionState::registering("bob");
        type_text(&mut state, "ab", &[]);
        for event in [
            KeyEvent::ArrowLeft,
            KeyEvent::ArrowRight,
            KeyEvent::ArrowUp,
            KeyEvent::Tab,
            KeyEvent::Delete,
        ] {
            let transition = apply(&mut state, event, &[]);
            assert_eq!(transition, Transition::none());
        }
        apply(&mut state, KeyEvent::Backspace, &[]);
        assert_eq!(registration(&state).buffer, "a");
    }

    #[test]
    fn interrupt_and_end_of_input_quit_in_every_mode() {
        for mut state in [
            SessionState::browsing("a"),
            SessionState::registering("a"),
            SessionState {
                mode: Mode::Editing(EditBuffer {
                    target: EditTarget::NewTask,
                    text: String::new(),
                    cursor: 0,
                }),
                ..SessionState::browsing("a")
            },
        ] {
            assert!(apply(&mut state.clone(), KeyEvent::Interrupt, &[]).quit);
            assert!(apply(&mut state, KeyEvent::EndOfInput, &[]).quit);
        }
    }

    #[test]
    fn enter_edits_selected_task_with_cursor_at_end() {
        let mut state = SessionState::browsing("alice");
        let snapshot = vec![task(1, "one", false), task(4, "four", true)];
        apply(&mut state, KeyEvent::ArrowDown, &snapshot);
        apply(&mut state, KeyEvent::Enter, &snapshot);

        let edit = editing(&state);
        assert_eq!(edit.target, EditTarget::ExistingTask(4));
        assert_eq!(edit.text, "four");
        assert_eq!(edit.cursor, 4);

        type_text(&mut state, "!", &snapshot);
        let transition = apply(&mut state, KeyEvent::Enter, &snapshot);
        assert_eq!(
            transition.commands,
            vec![StoreCommand::UpdateTask {
                id: 4,
                text: "four!".to_string()
            }]
        );
    }

    #[test]
    fn enter_on_empty_list_stays_browsing() {
        let mut state = SessionState::browsing("alice");
        let transition = apply(&mut state, KeyEvent::Enter, &[]);
        assert_eq!(transition, Transition::none());
        assert_eq!(state.mode, Mode::Browsing);
    }

    #[test]
    fn tab_aborts_edit_without_commands() {
        let mut state = SessionState::browsing("alice");
        apply(&mut state, KeyEvent::Tab, &[]);
        type_text(&mut state, "x", &[]);
        let transition = apply(&mut state, KeyEvent::Tab, &[]);
        assert!(transition.commands.is_empty());
        assert_eq!(state.mode, Mode::Browsing);
    }

    #[test]
    fn enter_with_single_char_adds_it() {
        let mut state = SessionState::browsing("alice");
        apply(&mut state, KeyEvent::Tab, &[]);
        type_text(&mut state, "x", &[]);
        let transition = apply(&mut state, KeyEvent::Enter, &[]);
        assert_eq!(transition.commands, vec![StoreCommand::AddTask("x".to_string())]);
        assert_eq!(state.mode, Mode::Browsing);
    }

    #[test]
    fn whitespace_only_edit_issues_no_command() {
        let mut state = SessionState::browsing("alice");
        apply(&mut state, KeyEvent::Tab, &[]);
        type_text(&mut state, "   ", &[]);
        let transition = apply(&mut state, KeyEvent::Enter, &[]);
        assert!(transition.commands.is_empty());
        assert_eq!(state.mode, Mode::Browsing);
    }

    #[test]
    fn edit_text_is_trimmed() {
        let mut state = SessionState::browsing("alice");
        apply(&mut state, KeyEvent::Tab, &[]);
        type_text(&mut state, "  walk dog ", &[]);
        let transition = apply(&mut state, KeyEvent::Enter, &[]);
        assert_eq!(
            transition.commands,
            vec![StoreCommand::AddTask("walk dog".to_string())]
        );
    }

    #[test]
    fn cursor_editing_inserts_and_deletes_in_place() {
        let mut state = SessionState::browsing("alice");
        apply(&mut state, KeyEvent::Tab, &[]);
        type_text(&mut state, "acd", &[]);
        apply(&mut state, KeyEvent::ArrowLeft, &[]);
        apply(&mut state, KeyEvent::ArrowLeft, &[]);
        type_text(&mut state, "b", &[]);
        assert_eq!(editing(&state).text, "abcd");
        assert_eq!(editing(&state).cursor, 2);

        apply(&mut state, KeyEvent::Delete, &[]);
        assert_eq!(editing(&state).text, "abd");
        apply(&mut state, KeyEvent::Backspace, &[]);
        assert_eq!(editing(&state).text, "ad");
        assert_eq!(editing(&state).cursor, 1);
    }

    #[test]
    fn cursor_stays_within_buffer_bounds() {
        let mut state = SessionState::browsing("alice");
        apply(&mut state, KeyEvent::Tab, &[]);
        let script = [
            KeyEvent::ArrowLeft,
            KeyEvent::Backspace,
            KeyEvent::Printable(b'a'),
            KeyEvent::ArrowRight,
            KeyEvent::ArrowRight,
            KeyEvent::Delete,
            KeyEvent::Printable(b'b'),
            KeyEvent::ArrowLeft,
            KeyEvent::ArrowLeft,
            KeyEvent::ArrowLeft,
            KeyEvent::Delete,
            KeyEvent::Delete,
            KeyEvent::Delete,
            KeyEvent::Backspace,
            KeyEvent::Printable(b'c'),
            KeyEvent::ArrowRight,
        ];
        for event in script {
            apply(&mut state, event, &[]);
            let edit = editing(&state);
            assert!(edit.cursor <= edit.text.chars().count(), "{event:?}");
        }
        assert_eq!(editing(&state).text, "c");
    }

    #[test]
    fn editing_handles_non_ascii_existing_text() {
        let mut state = SessionState::browsing("alice");
        let snapshot = vec![task(1, "café", false)];
        apply(&mut state, KeyEvent::Enter, &snapshot);
        assert_eq!(editing(&state).cursor, 4);
        apply(&mut state, KeyEvent::Backspace, &snapshot);
        assert_eq!(editing(&state).text, "caf");
    }

    #[test]
    fn arrows_clamp_selection() {
        let mut state = SessionState::browsing("alice");
        let snapshot = vec![task(1, "a", false), task(2, "b", false)];

        assert_eq!(apply(&mut state, KeyEvent::ArrowUp, &snapshot), Transition::none());
        apply(&mut state, KeyEvent::ArrowDown, &snapshot);
        apply(&mut state, KeyEvent::ArrowDown, &snapshot);
        assert_eq!(state.selected, 1);

        let mut empty = SessionState::browsing("alice");
        apply(&mut empty, KeyEvent::ArrowDown, &[]);
        assert_eq!(empty.selected, 0);
    }

    #[test]
    fn arrow_up_down_ignored_while_editing() {
        let mut state = SessionState::browsing("alice");
        let snapshot = vec![task(1, "a", false), task(2, "b", false)];
        apply(&mut state, KeyEvent::Tab, &snapshot);
        assert_eq!(apply(&mut state, KeyEvent::ArrowDown, &snapshot), Transition::none());
        assert_eq!(state.selected, 0);
    }

    #[test]
    fn delete_last_row_selects_new_last_row() {
        let mut state = SessionState::browsing("alice");
        let snapshot = vec![task(1, "a", false), task(2, "b", false), task(3, "c", false)];
        state.selected = 2;

        let transition = apply(&mut state, KeyEvent::Delete, &snapshot);
        assert_eq!(transition.commands, vec![StoreCommand::DeleteTask(3)]);
        assert_eq!(state.selected, 2);

        state.clamp_selection(snapshot.len() - 1);
        assert_eq!(state.selected, 1);
    }

    #[test]
    fn delete_middle_row_keeps_index() {
        let mut state = SessionState::browsing("alice");
        let snapshot = vec![task(1, "a", false), task(2, "b", false), task(3, "c", false)];
        state.selected = 1;

        apply(&mut state, KeyEvent::Delete, &snapshot);
        state.clamp_selection(snapshot.len() - 1);
        assert_eq!(state.selected, 1);
    }

    #[test]
    fn delete_only_row_selects_zero() {
        let mut state = SessionState::browsing("alice");
        let snapshot = vec![task(7, "only", false)];
        let transition = apply(&mut state, KeyEvent::Delete, &snapshot);
        assert_eq!(transition.commands, vec![StoreCommand::DeleteTask(7)]);
        state.clamp_selection(0);
        assert_eq!(state.selected, 0);
    }

    #[test]
    fn delete_leaves_selection_until_snapshot_refresh() {
        let mut state = SessionState::browsing("alice");
        let snapshot = vec![task(1, "a", false), task(2, "b", false)];
        state.selected = 1;

        let transition = apply(&mut state, KeyEvent::Delete, &snapshot);
        assert_eq!(transition.commands, vec![StoreCommand::DeleteTask(2)]);
        // The store may still refuse the delete; the row stays selected.
        assert_eq!(state.selected, 1);
        state.clamp_selection(snapshot.len());
        assert_eq!(state.selected, 1);
    }

    #[test]
    fn selection_stays_in_bounds_under_any_navigation() {
        for len in 0..5u64 {
            let mut snapshot: Vec<Task> = (1..=len).map(|id| task(id, "t", false)).collect();
            let mut state = SessionState::browsing("alice");
            let script = [
                KeyEvent::ArrowDown,
                KeyEvent::ArrowDown,
                KeyEvent::Delete,
                KeyEvent::ArrowDown,
                KeyEvent::ArrowDown,
                KeyEvent::ArrowDown,
                KeyEvent::ArrowUp,
                KeyEvent::Delete,
                KeyEvent::Delete,
                KeyEvent::ArrowUp,
            ];
            for event in script {
                let transition = apply(&mut state, event, &snapshot);
                for command in transition.commands {
                    if let StoreCommand::DeleteTask(id) = command {
                        snapshot.retain(|t| t.id != id);
                    }
                }
                state.clamp_selection(snapshot.len());
                assert!(
                    state.selected <= snapshot.len().saturating_sub(1),
                    "len {len} after {event:?}"
                );
            }
        }
    }

    #[test]
    fn other_printable_keys_are_ignored_while_browsing() {
        let mut state = SessionState::browsing("alice");
        let snapshot = vec![task(1, "a", false)];
        assert_eq!(
            apply(&mut state, KeyEvent::Printable(b'q'), &snapshot),
            Transition::none()
        );
    }

    #[test]
    fn status_line_is_cleared_by_next_event() {
        let mut state = SessionState::browsing("alice");
        state.status = Some("could not save".to_string());
        let transition = apply(&mut state, KeyEvent::Printable(b'q'), &[]);
        assert!(transition.redraw);
        assert_eq!(state.status, None);
    }
}
