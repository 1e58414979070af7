use crate::engine::{format_energy, format_thickness};
use crate::model::{RunConfig, RunResult, RunState};
use std::path::PathBuf;
use std::time::Instant;

/// Log lines kept for display; the full log lives in the run result.
pub const MAX_LOG_LINES: usize = 5000;

const FORM_LOCKED: &str = "Settings are locked while a simulation runs";

/// Form fields entered as text. The enumerated ones are cycled with their own keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormField {
    #[default]
    Executable,
    Macro,
    Energy,
    Thickness,
    Events,
}

impl FormField {
    pub const ALL: [FormField; 5] = [
        FormField::Executable,
        FormField::Macro,
        FormField::Energy,
        FormField::Thickness,
        FormField::Events,
    ];

    pub fn label(self) -> &'static str {
        match self {
            FormField::Executable => "executable",
            FormField::Macro => "macro file",
            FormField::Energy => "energy",
            FormField::Thickness => "thickness",
            FormField::Events => "event count",
        }
    }

    pub fn next(self) -> Self {
        let i = Self::ALL.iter().position(|f| *f == self).unwrap_or(0);
        Self::ALL[(i + 1) % Self::ALL.len()]
    }

    /// Current value as editable text.
    pub fn read(self, cfg: &RunConfig) -> String {
        match self {
            FormField::Executable => cfg.executable_path.display().to_string(),
            FormField::Macro => cfg.macro_file.clone().unwrap_or_default(),
            FormField::Energy => format_energy(cfg.energy_value),
            FormField::Thickness => format_thickness(cfg.thickness_cm),
            FormField::Events => cfg.event_count.to_string(),
        }
    }

    /// `cfg` with this field replaced by `text`, if the result validates.
    pub fn apply(self, cfg: &RunConfig, text: &str) -> Result<RunConfig, String> {
        let text = text.trim();
        let mut next = cfg.clone();
        match self {
            FormField::Executable => next.executable_path = PathBuf::from(text),
            FormField::Macro => {
                next.macro_file = (!text.is_empty()).then(|| text.to_string());
            }
            FormField::Energy => {
                next.energy_value = text
                    .parse()
                    .map_err(|_| format!("energy must be a number, got '{text}'"))?;
            }
            FormField::Thickness => {
                next.thickness_cm = text
                    .parse()
                    .map_err(|_| format!("thickness must be a number, got '{text}'"))?;
            }
            FormField::Events => {
                next.event_count = text
                    .parse()
                    .map_err(|_| format!("event count must be a whole number, got '{text}'"))?;
            }
        }
        next.validate().map_err(|e| e.to_string())?;
        Ok(next)
    }
}

/// A text field being edited; the form changes only on commit.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldEdit {
    pub field: FormField,
    pub buffer: String,
}

pub struct UiState {
    pub tab: usize,
    pub form: RunConfig,
    pub focus: FormField,
    pub editing: Option<FieldEdit>,
    pub run_state: RunState,
    pub info: String,
    pub command_line: Option<String>,
    pub progress: u8,
    pub run_start: Option<Instant>,

    pub log: Vec<String>,
    pub log_dropped: usize,     // Lines trimmed from the front of `log`
    pub log_scroll: usize,      // Lines scrolled up from the bottom (0 = follow)

    pub last_result: Option<RunResult>,
    pub history: Vec<RunResult>,
    pub history_selected: usize, // Index of selected history item (0 = most recent)
    pub history_scroll_offset: usize,
    pub history_loaded_count: usize,
    pub initial_history_load_size: usize, // Initial load size based on terminal height
    pub runs_dir: Option<PathBuf>,
    pub auto_save: bool,
    pub last_exported_path: Option<String>,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            tab: 0,
            form: RunConfig::default(),
            focus: FormField::default(),
            editing: None,
            run_state: RunState::Idle,
            info: String::new(),
            command_line: None,
            progress: 0,
            run_start: None,
            log: Vec::new(),
            log_dropped: 0,
            log_scroll: 0,
            last_result: None,
            history: Vec::new(),
            history_selected: 0,
            history_scroll_offset: 0,
            history_loaded_count: 0,
            initial_history_load_size: 66, // Default initial load size
            runs_dir: None,
            auto_save: true,
            last_exported_path: None,
        }
    }
}

impl UiState {
    pub fn push_log(&mut self, line: String) {
        self.log.push(line);
        if self.log.len() > MAX_LOG_LINES {
            let excess = self.log.len() - MAX_LOG_LINES;
            let _ = self.log.drain(0..excess);
            self.log_dropped += excess;
        }
    }

    pub fn clear_log(&mut self) {
        self.log.clear();
        self.log_dropped = 0;
        self.log_scroll = 0;
    }

    /// Reset per-run display state when a new run starts.
    pub fn begin_run(&mut self, command_line: String) {
        self.clear_log();
        self.command_line = Some(command_line);
        self.progress = 0;
        self.run_start = Some(Instant::now());
        self.last_result = None;
    }

    pub fn focus_next(&mut self) {
        if self.run_state.is_running() {
            self.info = FORM_LOCKED.into();
            return;
        }
        self.focus = self.focus.next();
    }

    /// Start editing the focused field with its current value.
    pub fn begin_edit(&mut self) {
        if self.run_state.is_running() {
            self.info = FORM_LOCKED.into();
            return;
        }
        self.info.clear();
        self.editing = Some(FieldEdit {
            field: self.focus,
            buffer: self.focus.read(&self.form),
        });
    }

    /// Apply the edit. An invalid value keeps the editor open with the reason shown.
    pub fn commit_edit(&mut self) {
        let Some(edit) = self.editing.take() else {
            return;
        };
        if self.run_state.is_running() {
            self.info = FORM_LOCKED.into();
            return;
        }
        match edit.field.apply(&self.form, &edit.buffer) {
            Ok(cfg) => {
                self.form = cfg;
                let shown = match edit.field.read(&self.form) {
                    v if v.is_empty() => format!("{} (default)", self.form.macro_file_or_default()),
                    v => v,
                };
                self.info = format!("Set {} to {shown}", edit.field.label());
            }
            Err(reason) => {
                self.info = reason;
                self.editing = Some(edit);
            }
        }
    }

    pub fn cancel_edit(&mut self) {
        if self.editing.take().is_some() {
            self.info = "Edit cancelled".into();
        }
    }

    pub fn scroll_log_up(&mut self, by: usize) {
        let max = self.log.len().saturating_sub(1);
        self.log_scroll = (self.log_scroll + by).min(max);
    }

    pub fn scroll_log_down(&mut self, by: usize) {
        self.log_scroll = self.log_scroll.saturating_sub(by);
    }

    /// Clamp history selection after the list changed size.
    pub fn clamp_history_selection(&mut self) {
        if self.history.is_empty() {
            self.history_selected = 0;
            self.history_scroll_offset = 0;
            return;
        }
        if self.history_selected >= self.history.len() {
            self.history_selected = self.history.len() - 1;
        }
        if self.history_scroll_offset >= self.history.len() {
            self.history_scroll_offset = self.history.len().saturating_sub(20);
        }
    }
}
