use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Exit code reported when the child never ran or was killed by a signal.
pub const SENTINEL_EXIT_CODE: i32 = -1;

/// Macro file passed when the form leaves it blank.
pub const DEFAULT_MACRO_FILE: &str = "vis.mac";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum Particle {
    #[serde(rename = "gamma")]
    #[value(name = "gamma")]
    Gamma,
    #[serde(rename = "e-")]
    #[value(name = "e-")]
    Electron,
    #[serde(rename = "e+")]
    #[value(name = "e+")]
    Positron,
    #[serde(rename = "proton")]
    #[value(name = "proton")]
    Proton,
    #[serde(rename = "neutron")]
    #[value(name = "neutron")]
    Neutron,
    #[serde(rename = "alpha")]
    #[value(name = "alpha")]
    Alpha,
}

impl Particle {
    pub const ALL: [Particle; 6] = [
        Particle::Gamma,
        Particle::Electron,
        Particle::Positron,
        Particle::Proton,
        Particle::Neutron,
        Particle::Alpha,
    ];

    /// Geant4 particle name passed on the command line.
    pub fn code(self) -> &'static str {
        match self {
            Particle::Gamma => "gamma",
            Particle::Electron => "e-",
            Particle::Positron => "e+",
            Particle::Proton => "proton",
            Particle::Neutron => "neutron",
            Particle::Alpha => "alpha",
        }
    }

    pub fn next(self) -> Self {
        cycle(&Self::ALL, self)
    }
}

impl fmt::Display for Particle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum EnergyUnit {
    #[serde(rename = "MeV")]
    #[value(name = "MeV", alias = "mev")]
    MeV,
    #[serde(rename = "GeV")]
    #[value(name = "GeV", alias = "gev")]
    GeV,
    #[serde(rename = "keV")]
    #[value(name = "keV", alias = "kev")]
    KeV,
}

impl EnergyUnit {
    pub const ALL: [EnergyUnit; 3] = [EnergyUnit::MeV, EnergyUnit::GeV, EnergyUnit::KeV];

    pub fn symbol(self) -> &'static str {
        match self {
            EnergyUnit::MeV => "MeV",
            EnergyUnit::GeV => "GeV",
            EnergyUnit::KeV => "keV",
        }
    }

    pub fn next(self) -> Self {
        cycle(&Self::ALL, self)
    }
}

impl fmt::Display for EnergyUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Shielding material. Serialized as its short code; unknown codes load as lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Material {
    Lead,
    Iron,
    Concrete,
    Water,
    Polyethylene,
}

/// Label → material lookup. Matching is case-insensitive.
const MATERIAL_LABELS: &[(&str, Material)] = &[
    ("pb", Material::Lead),
    ("lead", Material::Lead),
    ("lead (pb)", Material::Lead),
    ("g4_pb", Material::Lead),
    ("fe", Material::Iron),
    ("iron", Material::Iron),
    ("iron (fe)", Material::Iron),
    ("g4_fe", Material::Iron),
    ("concrete", Material::Concrete),
    ("g4_concrete", Material::Concrete),
    ("water", Material::Water),
    ("h2o", Material::Water),
    ("water (h2o)", Material::Water),
    ("g4_water", Material::Water),
    ("polyethylene", Material::Polyethylene),
    ("pe", Material::Polyethylene),
    ("polyethylene (pe)", Material::Polyethylene),
    ("g4_polyethylene", Material::Polyethylene),
    ("铅", Material::Lead),
    ("铅 (pb)", Material::Lead),
    ("铁", Material::Iron),
    ("铁 (fe)", Material::Iron),
    ("混凝土", Material::Concrete),
    ("混凝土 (concrete)", Material::Concrete),
    ("水", Material::Water),
    ("水 (h2o)", Material::Water),
    ("聚乙烯", Material::Polyethylene),
    ("聚乙烯 (pe)", Material::Polyethylene),
];

impl Material {
    pub const ALL: [Material; 5] = [
        Material::Lead,
        Material::Iron,
        Material::Concrete,
        Material::Water,
        Material::Polyethylene,
    ];

    /// Short code passed to the simulation.
    pub fn code(self) -> &'static str {
        match self {
            Material::Lead => "Pb",
            Material::Iron => "Fe",
            Material::Concrete => "Concrete",
            Material::Water => "Water",
            Material::Polyethylene => "Polyethylene",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Material::Lead => "Lead",
            Material::Iron => "Iron",
            Material::Concrete => "Concrete",
            Material::Water => "Water",
            Material::Polyethylene => "Polyethylene",
        }
    }

    pub fn lookup(label: &str) -> Option<Self> {
        let needle = label.trim().to_ascii_lowercase();
        MATERIAL_LABELS
            .iter()
            .find(|(l, _)| *l == needle)
            .map(|(_, m)| *m)
    }

    /// Lookup with the lead fallback.
    pub fn from_label(label: &str) -> Self {
        Self::lookup(label).unwrap_or(Material::Lead)
    }

    pub fn next(self) -> Self {
        cycle(&Self::ALL, self)
    }
}

impl FromStr for Material {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::lookup(s).ok_or_else(|| {
            let known: Vec<&str> = Self::ALL.iter().map(|m| m.code()).collect();
            format!("unknown material '{s}' (expected one of: {})", known.join(", "))
        })
    }
}

impl From<String> for Material {
    fn from(s: String) -> Self {
        Material::from_label(&s)
    }
}

impl From<Material> for String {
    fn from(m: Material) -> Self {
        m.code().to_string()
    }
}

impl fmt::Display for Material {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name(), self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ThreadCount {
    #[default]
    Auto,
    Fixed(u32),
}

impl ThreadCount {
    const PRESETS: [ThreadCount; 5] = [
        ThreadCount::Auto,
        ThreadCount::Fixed(1),
        ThreadCount::Fixed(2),
        ThreadCount::Fixed(4),
        ThreadCount::Fixed(8),
    ];

    /// Steps through auto, 1, 2, 4, 8. Off-preset values restart at auto.
    pub fn next(self) -> Self {
        match Self::PRESETS.iter().position(|t| *t == self) {
            Some(i) => Self::PRESETS[(i + 1) % Self::PRESETS.len()],
            None => ThreadCount::Auto,
        }
    }
}

impl FromStr for ThreadCount {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("auto") {
            return Ok(ThreadCount::Auto);
        }
        match s.parse::<u32>() {
            Ok(0) => Err("thread count must be at least 1".into()),
            Ok(n) => Ok(ThreadCount::Fixed(n)),
            Err(_) => Err(format!("invalid thread count '{s}' (expected 'auto' or a number)")),
        }
    }
}

impl fmt::Display for ThreadCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreadCount::Auto => f.write_str("auto"),
            ThreadCount::Fixed(n) => write!(f, "{n}"),
        }
    }
}

fn cycle<T: Copy + PartialEq>(all: &[T], current: T) -> T {
    let i = all.iter().position(|v| *v == current).unwrap_or(0);
    all[(i + 1) % all.len()]
}

/// Form values for one simulation run. Frozen once the run starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub executable_path: PathBuf,
    #[serde(default)]
    pub macro_file: Option<String>,
    pub particle: Particle,
    pub energy_value: f64,
    pub energy_unit: EnergyUnit,
    pub material: Material,
    pub thickness_cm: f64,
    pub event_count: u64,
    #[serde(default)]
    pub thread_count: ThreadCount,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            executable_path: PathBuf::from("./main"),
            macro_file: None,
            particle: Particle::Gamma,
            energy_value: 1.0,
            energy_unit: EnergyUnit::MeV,
            material: Material::Lead,
            thickness_cm: 10.0,
            event_count: 1000,
            thread_count: ThreadCount::Auto,
        }
    }
}

impl RunConfig {
    /// Check numeric fields the form cannot constrain by type.
    pub fn validate(&self) -> Result<(), crate::error::LaunchError> {
        use crate::error::LaunchError;

        if self.executable_path.as_os_str().is_empty() {
            return Err(LaunchError::InvalidConfig(
                "executable path is empty".into(),
            ));
        }
        if !self.energy_value.is_finite() || self.energy_value <= 0.0 {
            return Err(LaunchError::InvalidConfig(format!(
                "energy must be a positive number, got {}",
                self.energy_value
            )));
        }
        if !self.thickness_cm.is_finite() || self.thickness_cm < 0.0 {
            return Err(LaunchError::InvalidConfig(format!(
                "thickness must be zero or positive, got {}",
                self.thickness_cm
            )));
        }
        if self.event_count == 0 {
            return Err(LaunchError::InvalidConfig(
                "event count must be at least 1".into(),
            ));
        }
        if self.thread_count == ThreadCount::Fixed(0) {
            return Err(LaunchError::InvalidConfig(
                "thread count must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Macro file to pass, falling back to the default when blank.
    pub fn macro_file_or_default(&self) -> &str {
        match self.macro_file.as_deref().map(str::trim) {
            Some(m) if !m.is_empty() => m,
            _ => DEFAULT_MACRO_FILE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Completed,
    Failed,
    Aborted,
}

impl RunStatus {
    pub fn label(self) -> &'static str {
        match self {
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
            RunStatus::Aborted => "ABORTED",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RunEvent {
    Started {
        command_line: String,
    },
    Line {
        text: String,
    },
    Progress {
        percent: u8,
    },
    Info(InfoEvent),
    Finished {
        // Boxed: the result carries the whole output log.
        result: Box<RunResult>,
    },
}

/// Structured info events emitted by the controller and engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InfoEvent {
    Message(String),
    StartRejected,
    ExecutableMissing { path: PathBuf },
    InvalidConfig { reason: String },
    StopRequested,
    NoActiveRun,
    StillStopping,
}

impl InfoEvent {
    pub fn to_message(&self) -> String {
        match self {
            InfoEvent::Message(msg) => msg.clone(),
            InfoEvent::StartRejected => {
                "A run is already in progress; stop it before starting another".to_string()
            }
            InfoEvent::ExecutableMissing { path } => {
                format!("Executable not found: {}", path.display())
            }
            InfoEvent::InvalidConfig { reason } => format!("Invalid configuration: {reason}"),
            InfoEvent::StopRequested => "Stopping simulation…".to_string(),
            InfoEvent::NoActiveRun => "No simulation is running".to_string(),
            InfoEvent::StillStopping => "Still stopping…".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: String,
    #[serde(default)]
    pub timestamp_utc: String,
    pub config: RunConfig,
    pub command_line: String,
    pub exit_code: i32,
    pub status: RunStatus,
    #[serde(default)]
    pub progress: u8,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    #[serde(default)]
    pub output_lines: Vec<String>,
}

/// Presentation-facing run state, driven only by [`RunEvent`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
    Aborted,
}

impl RunState {
    pub fn on_event(&mut self, ev: &RunEvent) {
        match ev {
            RunEvent::Started { .. } => *self = RunState::Running,
            RunEvent::Finished { result } => {
                *self = match result.status {
                    RunStatus::Completed => RunState::Completed,
                    RunStatus::Failed => RunState::Failed,
                    RunStatus::Aborted => RunState::Aborted,
                }
            }
            RunEvent::Line { .. } | RunEvent::Progress { .. } | RunEvent::Info(_) => {}
        }
    }

    /// Return a finished state to idle. Running is left alone.
    pub fn acknowledge(&mut self) {
        if *self != RunState::Running {
            *self = RunState::Idle;
        }
    }

    pub fn is_running(self) -> bool {
        self == RunState::Running
    }

    pub fn label(self) -> &'static str {
        match self {
            RunState::Idle => "READY",
            RunState::Running => "RUNNING",
            RunState::Completed => "COMPLETED",
            RunState::Failed => "FAILED",
            RunState::Aborted => "ABORTED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finished(status: RunStatus) -> RunEvent {
        RunEvent::Finished {
            result: Box::new(RunResult {
                run_id: "1".into(),
                timestamp_utc: String::new(),
                config: RunConfig::default(),
                command_line: "./main".into(),
                exit_code: 0,
                status,
                progress: 0,
                duration: Duration::ZERO,
                output_lines: Vec::new(),
            }),
        }
    }

    #[test]
    fn material_lookup_accepts_codes_and_names() {
        assert_eq!(Material::lookup("Pb"), Some(Material::Lead));
        assert_eq!(Material::lookup("lead"), Some(Material::Lead));
        assert_eq!(Material::lookup("Lead (Pb)"), Some(Material::Lead));
        assert_eq!(Material::lookup(" H2O "), Some(Material::Water));
        assert_eq!(Material::lookup("PE"), Some(Material::Polyethylene));
        assert_eq!(Material::lookup("unobtainium"), None);
    }

    #[test]
    fn material_lookup_accepts_chinese_labels() {
        assert_eq!(Material::lookup("铅"), Some(Material::Lead));
        assert_eq!(Material::lookup("铁 (Fe)"), Some(Material::Iron));
        assert_eq!(Material::lookup("混凝土 (Concrete)"), Some(Material::Concrete));
        assert_eq!(Material::lookup("水 (H2O)"), Some(Material::Water));
        assert_eq!(Material::lookup("聚乙烯 (PE)"), Some(Material::Polyethylene));
        assert_eq!(Material::from_label("聚乙烯"), Material::Polyethylene);
    }

    #[test]
    fn material_unknown_label_falls_back_to_lead() {
        assert_eq!(Material::from_label("unobtainium"), Material::Lead);
        assert_eq!(Material::from_label(""), Material::Lead);
        assert!("unobtainium".parse::<Material>().is_err());
    }

    #[test]
    fn material_serializes_as_code() {
        let json = serde_json::to_string(&Material::Polyethylene).unwrap();
        assert_eq!(json, "\"Polyethylene\"");
        let back: Material = serde_json::from_str("\"Fe\"").unwrap();
        assert_eq!(back, Material::Iron);
        let fallback: Material = serde_json::from_str("\"G4_Cu\"").unwrap();
        assert_eq!(fallback, Material::Lead);
    }

    #[test]
    fn particle_codes_are_geant4_names() {
        let codes: Vec<&str> = Particle::ALL.iter().map(|p| p.code()).collect();
        assert_eq!(codes, ["gamma", "e-", "e+", "proton", "neutron", "alpha"]);
    }

    #[test]
    fn thread_count_parsing() {
        assert_eq!("auto".parse::<ThreadCount>(), Ok(ThreadCount::Auto));
        assert_eq!("AUTO".parse::<ThreadCount>(), Ok(ThreadCount::Auto));
        assert_eq!("4".parse::<ThreadCount>(), Ok(ThreadCount::Fixed(4)));
        assert!("0".parse::<ThreadCount>().is_err());
        assert!("many".parse::<ThreadCount>().is_err());
    }

    #[test]
    fn thread_count_cycles_through_presets() {
        assert_eq!(ThreadCount::Auto.next(), ThreadCount::Fixed(1));
        assert_eq!(ThreadCount::Fixed(8).next(), ThreadCount::Auto);
        assert_eq!(ThreadCount::Fixed(3).next(), ThreadCount::Auto);
    }

    #[test]
    fn validate_rejects_bad_numbers() {
        let ok = RunConfig::default();
        assert!(ok.validate().is_ok());

        let mut c = ok.clone();
        c.energy_value = 0.0;
        assert!(c.validate().is_err());

        let mut c = ok.clone();
        c.energy_value = f64::NAN;
        assert!(c.validate().is_err());

        let mut c = ok.clone();
        c.thickness_cm = -1.0;
        assert!(c.validate().is_err());

        let mut c = ok.clone();
        c.thickness_cm = 0.0;
        assert!(c.validate().is_ok());

        let mut c = ok;
        c.event_count = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn blank_macro_uses_default() {
        let mut c = RunConfig::default();
        assert_eq!(c.macro_file_or_default(), "vis.mac");
        c.macro_file = Some("   ".into());
        assert_eq!(c.macro_file_or_default(), "vis.mac");
        c.macro_file = Some("run1.mac".into());
        assert_eq!(c.macro_file_or_default(), "run1.mac");
    }

    #[test]
    fn run_state_follows_events() {
        let mut s = RunState::default();
        assert_eq!(s, RunState::Idle);

        s.on_event(&RunEvent::Started {
            command_line: "./main".into(),
        });
        assert!(s.is_running());

        s.on_event(&RunEvent::Line { text: "x".into() });
        s.acknowledge();
        assert!(s.is_running());

        s.on_event(&finished(RunStatus::Aborted));
        assert_eq!(s, RunState::Aborted);
        s.acknowledge();
        assert_eq!(s, RunState::Idle);

        s.on_event(&finished(RunStatus::Failed));
        assert_eq!(s, RunState::Failed);
        s.on_event(&finished(RunStatus::Completed));
        assert_eq!(s, RunState::Completed);
    }
}
