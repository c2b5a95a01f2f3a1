use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

/// Y-axis ceilings the user steps through with PgUp/PgDn, in CPM.
pub(crate) const Y_MAX_TABLE: [u32; 13] = [
    10, 25, 50, 75, 100, 250, 500, 750, 1000, 2500, 5000, 7500, 10000,
];

/// One user command, decoded from a key press. `SeekBy` units are
/// epochs except `SeekByInterval`, which moves by the current
/// averaging interval.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Action {
    Quit,
    SeekByInterval(i64),
    SeekBy(i64),
    SeekHome,
    SeekEnd,
    YMaxUp,
    YMaxDown,
    IntervalUp,
    IntervalDown,
    ToggleView,
    SaveParams,
    LoadParams,
    ResetDefaults,
}

pub(crate) fn action_for(key: KeyEvent) -> Option<Action> {
    if key.modifiers.contains(KeyModifiers::CONTROL)
        && matches!(key.code, KeyCode::Char('c') | KeyCode::Char('d'))
    {
        return Some(Action::Quit);
    }
    match key.code {
        KeyCode::Char('q') => Some(Action::Quit),
        KeyCode::Left => Some(Action::SeekByInterval(-1)),
        KeyCode::Right => Some(Action::SeekByInterval(1)),
        KeyCode::Char(',') => Some(Action::SeekBy(-60)),
        KeyCode::Char('.') => Some(Action::SeekBy(60)),
        KeyCode::Char('<') => Some(Action::SeekBy(-3600)),
        KeyCode::Char('>') => Some(Action::SeekBy(3600)),
        KeyCode::Home => Some(Action::SeekHome),
        KeyCode::End => Some(Action::SeekEnd),
        KeyCode::PageUp => Some(Action::YMaxUp),
        KeyCode::PageDown => Some(Action::YMaxDown),
        KeyCode::Char('+') | KeyCode::Char('=') => Some(Action::IntervalUp),
        KeyCode::Char('-') => Some(Action::IntervalDown),
        KeyCode::Char('h') => Some(Action::ToggleView),
        KeyCode::Char('s') => Some(Action::SaveParams),
        KeyCode::Char('l') => Some(Action::LoadParams),
        KeyCode::Char('r') => Some(Action::ResetDefaults),
        _ => None,
    }
}

/// Next table entry above (or below) the current ceiling, saturating
/// at the table's ends. A value off the table snaps to its nearest
/// table neighbour in the requested direction.
pub(crate) fn step_y_max(current: u32, up: bool) -> u32 {
    if up {
        *Y_MAX_TABLE
            .iter()
            .find(|&&entry| entry > current)
            .unwrap_or(&Y_MAX_TABLE[Y_MAX_TABLE.len() - 1])
    } else {
        *Y_MAX_TABLE
            .iter()
            .rev()
            .find(|&&entry| entry < current)
            .unwrap_or(&Y_MAX_TABLE[0])
    }
}

/// Human span label for the visible plot width.
pub(crate) fn span_label(seconds: u64) -> String {
    if seconds >= 7200 {
        format!("{} hours", seconds / 3600)
    } else if seconds >= 120 {
        format!("{} mins", seconds / 60)
    } else {
        format!("{seconds} secs")
    }
}
