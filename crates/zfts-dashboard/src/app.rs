use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use std::collections::HashMap;
use zfts_core::{Action, Backend, JobRow, LedgerKey, MAX_PRIORITY, MIN_PRIORITY};
use zfts_monitor::{AirTarget, Monitor, DEFAULT_AIR_PORT};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditField {
    Host,
    Port,
}

/// View-side state: focus, selection, priority drafts and the Air target being edited.
pub struct App {
    pub focus: Backend,
    selected: HashMap<Backend, usize>,
    priority_drafts: HashMap<LedgerKey, u8>,
    pub host_input: String,
    pub port_input: String,
    pub editing: Option<EditField>,
    pub help_open: bool,
    should_quit: bool,
}

impl App {
    pub fn new(target: &AirTarget) -> Self {
        Self {
            focus: Backend::Ground,
            selected: HashMap::new(),
            priority_drafts: HashMap::new(),
            host_input: target.host.clone(),
            port_input: target.port.to_string(),
            editing: None,
            help_open: false,
            should_quit: false,
        }
    }

    pub fn should_quit(&self) -> bool {
        self.should_quit
    }

    pub fn selected_index(&self, backend: Backend, row_count: usize) -> Option<usize> {
        if row_count == 0 {
            return None;
        }
        let index = self.selected.get(&backend).copied().unwrap_or(0);
        Some(index.min(row_count - 1))
    }

    /// Priority shown in the selector: the user's pending choice, else the job's own.
    pub fn priority_for(&self, backend: Backend, row: &JobRow) -> u8 {
        self.priority_drafts
            .get(&LedgerKey::new(backend, row.job.id))
            .copied()
            .unwrap_or(row.job.priority)
    }

    pub fn has_priority_draft(&self, backend: Backend, row: &JobRow) -> bool {
        self.priority_drafts
            .get(&LedgerKey::new(backend, row.job.id))
            .is_some_and(|draft| *draft != row.job.priority)
    }

    pub fn input_target(&self) -> AirTarget {
        let port = self.port_input.trim().parse().unwrap_or(DEFAULT_AIR_PORT);
        AirTarget::new(self.host_input.clone(), port)
    }

    pub fn handle_key(&mut self, key: KeyEvent, monitor: &mut Monitor) {
        if let Some(field) = self.editing {
            self.handle_edit_key(field, key, monitor);
            return;
        }
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            self.should_quit = true;
            return;
        }
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => {
                if self.help_open {
                    self.help_open = false;
                } else {
                    self.should_quit = true;
                }
            }
            KeyCode::Char('?') => self.help_open = !self.help_open,
            KeyCode::Tab | KeyCode::BackTab => self.focus = self.focus.other(),
            KeyCode::Char('j') | KeyCode::Down => self.move_selection(monitor, 1),
            KeyCode::Char('k') | KeyCode::Up => self.move_selection(monitor, -1),
            KeyCode::Char('s') => self.run_action(monitor, Action::Start),
            KeyCode::Char('x') => self.run_action(monitor, Action::Stop),
            KeyCode::Char('c') => self.run_action(monitor, Action::Cancel),
            KeyCode::Char(digit @ '1'..='5') => {
                let priority = digit as u8 - b'0';
                self.choose_priority(monitor, priority);
            }
            KeyCode::Char('+') | KeyCode::Char('=') => self.step_priority(monitor, 1),
            KeyCode::Char('-') => self.step_priority(monitor, -1),
            KeyCode::Char('p') => self.apply_priority(monitor),
            KeyCode::Char(']') => monitor.cycle_poll_interval(self.focus, true),
            KeyCode::Char('[') => monitor.cycle_poll_interval(self.focus, false),
            KeyCode::Char('h') => {
                self.focus = Backend::Air;
                self.editing = Some(EditField::Host);
            }
            KeyCode::Char('o') => {
                self.focus = Backend::Air;
                self.editing = Some(EditField::Port);
            }
            KeyCode::Char('a') => {
                self.focus = Backend::Air;
                let _ = monitor.connect_air(self.input_target());
            }
            KeyCode::Char('d') => monitor.disconnect_air(),
            _ => {}
        }
    }

    fn handle_edit_key(&mut self, field: EditField, key: KeyEvent, monitor: &mut Monitor) {
        match key.code {
            KeyCode::Esc => {
                let current = monitor.air_target().clone();
                self.host_input = current.host;
                self.port_input = current.port.to_string();
                self.editing = None;
            }
            KeyCode::Enter => {
                self.editing = None;
                let _ = monitor.retarget_air(self.input_target());
            }
            KeyCode::Tab => {
                self.editing = Some(match field {
                    EditField::Host => EditField::Port,
                    EditField::Port => EditField::Host,
                });
            }
            KeyCode::Backspace => {
                self.edit_buffer(field).pop();
            }
            KeyCode::Char(ch) => {
                let buffer = self.edit_buffer(field);
                match field {
                    EditField::Host if !ch.is_whitespace() => buffer.push(ch),
                    EditField::Port if ch.is_ascii_digit() && buffer.len() < 5 => buffer.push(ch),
                    _ => {}
                }
            }
            _ => {}
        }
    }

    fn edit_buffer(&mut self, field: EditField) -> &mut String {
        match field {
            EditField::Host => &mut self.host_input,
            EditField::Port => &mut self.port_input,
        }
    }

    fn move_selection(&mut self, monitor: &Monitor, delta: isize) {
        let count = monitor.session(self.focus).view().rows().len();
        let Some(current) = self.selected_index(self.focus, count) else {
            return;
        };
        let next = (current as isize + delta).clamp(0, count as isize - 1) as usize;
        self.selected.insert(self.focus, next);
    }

    fn selected_row(&self, monitor: &Monitor) -> Option<JobRow> {
        let rows = monitor.session(self.focus).view().rows();
        let index = self.selected_index(self.focus, rows.len())?;
        rows.get(index).cloned()
    }

    fn run_action(&mut self, monitor: &mut Monitor, action: Action) {
        let Some(row) = self.selected_row(monitor) else {
            monitor.set_status_note(format!("No {} job selected", self.focus));
            return;
        };
        let button = match action {
            Action::Start => row.buttons.start,
            Action::Stop => row.buttons.stop,
            Action::Cancel => row.buttons.cancel,
        };
        if !button.enabled {
            monitor.set_status_note(format!(
                "{} is not available for job {} ({})",
                button.label, row.job.id, row.display_state.label()
            ));
            return;
        }
        let backend = self.focus;
        let priority = match action {
            Action::Start => Some(self.priority_for(backend, &row)),
            _ => None,
        };
        if monitor.dispatch(backend, row.job.id, action, priority).is_ok() {
            self.priority_drafts
                .remove(&LedgerKey::new(backend, row.job.id));
        }
    }

    fn choose_priority(&mut self, monitor: &mut Monitor, priority: u8) {
        let Some(row) = self.selected_row(monitor) else {
            return;
        };
        if !row.buttons.priority_enabled {
            let note = format!("{} priority is locked while unavailable", self.focus);
            monitor.set_status_note(note);
            return;
        }
        self.priority_drafts
            .insert(LedgerKey::new(self.focus, row.job.id), priority);
    }

    fn step_priority(&mut self, monitor: &mut Monitor, delta: i16) {
        let Some(row) = self.selected_row(monitor) else {
            return;
        };
        let current = self.priority_for(self.focus, &row) as i16;
        let next = (current + delta).clamp(MIN_PRIORITY as i16, MAX_PRIORITY as i16) as u8;
        self.choose_priority(monitor, next);
    }

    fn apply_priority(&mut self, monitor: &mut Monitor) {
        let Some(row) = self.selected_row(monitor) else {
            return;
        };
        let backend = self.focus;
        let priority = self.priority_for(backend, &row);
        if monitor.set_priority(backend, row.job.id, priority).is_ok() {
            self.priority_drafts
                .remove(&LedgerKey::new(backend, row.job.id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use zfts_core::{PendingAction, Snapshot, TransferJob};
    use zfts_monitor::endpoint::parse_base_url;
    use zfts_monitor::probe::ProbeSettings;
    use zfts_monitor::{MonitorConfig, MonitorEvent, SnapshotSource, TransferClient};

    struct Harness {
        app: App,
        monitor: Monitor,
        _rx: mpsc::Receiver<MonitorEvent>,
        _state: tempfile::TempDir,
    }

    fn harness() -> Harness {
        let state = tempfile::tempdir().unwrap();
        let config = MonitorConfig {
            ground_url: parse_base_url("http://127.0.0.1:9/api").unwrap(),
            proxy_url: parse_base_url("http://127.0.0.1:9").unwrap(),
            air_target: None,
            ground_poll: Duration::from_secs(5),
            air_poll: Duration::from_secs(5),
            probe: ProbeSettings::default(),
            push_enabled: false,
            state_dir: state.path().to_path_buf(),
            auto_reconnect_delay: Duration::from_millis(600),
        };
        let (tx, rx) = mpsc::channel(64);
        let monitor = Monitor::new(config, TransferClient::new().unwrap(), tx);
        let app = App::new(monitor.air_target());
        Harness {
            app,
            monitor,
            _rx: rx,
            _state: state,
        }
    }

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn job(id: i64, started: bool) -> TransferJob {
        TransferJob {
            id,
            file_name: format!("file-{id}"),
            started,
            percent_complete: 0.0,
            rate: 0.0,
            bytes_received: 0,
            file_size: 100,
            priority: 2,
        }
    }

    fn load_ground(monitor: &mut Monitor, jobs: Vec<TransferJob>) {
        monitor.apply_event(MonitorEvent::Snapshot {
            backend: Backend::Ground,
            epoch: 0,
            source: SnapshotSource::Poll,
            result: Ok(Snapshot {
                platform_name: None,
                status: jobs,
            }),
        });
    }

    #[tokio::test]
    async fn start_uses_chosen_priority_and_marks_pending() {
        let mut h = harness();
        load_ground(&mut h.monitor, vec![job(1, false), job(3, false)]);

        h.app.handle_key(key(KeyCode::Down), &mut h.monitor);
        h.app.handle_key(key(KeyCode::Char('4')), &mut h.monitor);
        let row = h.monitor.session(Backend::Ground).view().rows()[1].clone();
        assert_eq!(h.app.priority_for(Backend::Ground, &row), 4);

        h.app.handle_key(key(KeyCode::Char('s')), &mut h.monitor);
        assert_eq!(
            h.monitor.ledger().get(Backend::Ground, 3),
            Some(PendingAction::Starting)
        );
        assert!(!h.app.has_priority_draft(Backend::Ground, &row));
    }

    #[tokio::test]
    async fn disabled_button_is_not_dispatched() {
        let mut h = harness();
        load_ground(&mut h.monitor, vec![job(1, true)]);

        h.app.handle_key(key(KeyCode::Char('s')), &mut h.monitor);
        assert!(h.monitor.ledger().is_empty());
        assert!(h
            .monitor
            .status_note()
            .is_some_and(|note| note.starts_with("Start is not available")));
    }

    #[tokio::test]
    async fn selection_is_clamped_to_rows() {
        let mut h = harness();
        load_ground(&mut h.monitor, vec![job(1, false), job(2, false)]);
        for _ in 0..5 {
            h.app.handle_key(key(KeyCode::Char('j')), &mut h.monitor);
        }
        assert_eq!(h.app.selected_index(Backend::Ground, 2), Some(1));
        assert_eq!(h.app.selected_index(Backend::Ground, 0), None);
    }

    #[tokio::test]
    async fn host_edit_escape_restores_current_target() {
        let mut h = harness();
        h.app.handle_key(key(KeyCode::Char('h')), &mut h.monitor);
        assert_eq!(h.app.editing, Some(EditField::Host));
        for ch in "air".chars() {
            h.app.handle_key(key(KeyCode::Char(ch)), &mut h.monitor);
        }
        assert_eq!(h.app.host_input, "air");
        h.app.handle_key(key(KeyCode::Esc), &mut h.monitor);
        assert_eq!(h.app.editing, None);
        assert_eq!(h.app.host_input, "");
    }

    #[tokio::test]
    async fn port_edit_accepts_digits_only() {
        let mut h = harness();
        h.app.port_input.clear();
        h.app.handle_key(key(KeyCode::Char('o')), &mut h.monitor);
        for ch in "19a7x13".chars() {
            h.app.handle_key(key(KeyCode::Char(ch)), &mut h.monitor);
        }
        assert_eq!(h.app.port_input, "19713");
        h.app.handle_key(key(KeyCode::Enter), &mut h.monitor);
        assert_eq!(h.monitor.air_target().port, 19713);
    }

    #[tokio::test]
    async fn connect_with_empty_host_shows_notice() {
        let mut h = harness();
        h.app.handle_key(key(KeyCode::Char('a')), &mut h.monitor);
        assert_eq!(h.monitor.status_note(), Some("Enter hostname/IP"));
        assert_eq!(h.app.focus, Backend::Air);
    }

    #[tokio::test]
    async fn quit_closes_help_first() {
        let mut h = harness();
        h.app.handle_key(key(KeyCode::Char('?')), &mut h.monitor);
        h.app.handle_key(key(KeyCode::Char('q')), &mut h.monitor);
        assert!(!h.app.should_quit());
        h.app.handle_key(key(KeyCode::Char('q')), &mut h.monitor);
        assert!(h.app.should_quit());
    }
}
