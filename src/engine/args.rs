//! Maps a [`RunConfig`] onto the simulation's positional arguments.
//!
//! Canonical order:
//! `[macro_file_or_default, material_code, thickness_cm, particle_code, "<energy> <unit>"]`

use crate::error::LaunchError;
use crate::model::{RunConfig, ThreadCount};
use std::path::{Path, PathBuf};

/// Environment variable Geant4 reads to force the worker thread count.
pub const THREADS_ENV: &str = "G4FORCENUMBEROFTHREADS";

/// Everything needed to spawn one simulation process.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
}

impl LaunchSpec {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            envs: Vec::new(),
        }
    }

    pub fn from_config(cfg: &RunConfig) -> Self {
        let mut spec = Self::new(cfg.executable_path.clone(), build_args(cfg));
        if let ThreadCount::Fixed(n) = cfg.thread_count {
            spec.envs.push((THREADS_ENV.to_string(), n.to_string()));
        }
        spec
    }

    /// Shell-style rendering for logs and history. Never executed.
    pub fn command_line(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(quote(&self.program.to_string_lossy()));
        parts.extend(self.args.iter().map(|a| quote(a)));
        parts.join(" ")
    }
}

pub fn build_args(cfg: &RunConfig) -> Vec<String> {
    vec![
        cfg.macro_file_or_default().to_string(),
        cfg.material.code().to_string(),
        format_thickness(cfg.thickness_cm),
        cfg.particle.code().to_string(),
        format!("{} {}", format_energy(cfg.energy_value), cfg.energy_unit.symbol()),
    ]
}

/// Shortest decimal form: 10.0 → "10", 2.5 → "2.5".
pub fn format_thickness(cm: f64) -> String {
    format!("{cm}")
}

/// Always carries a decimal point: 1.0 → "1.0", 0.662 → "0.662".
pub fn format_energy(value: f64) -> String {
    format!("{value:?}")
}

/// Refuse paths that name a missing file. Bare program names are left to
/// the OS search path and surface as spawn failures instead.
pub fn check_executable(path: &Path) -> Result<(), LaunchError> {
    let has_dir = path
        .parent()
        .map(|p| !p.as_os_str().is_empty())
        .unwrap_or(false);
    if (has_dir || path.is_absolute()) && !path.exists() {
        return Err(LaunchError::NotFound(path.to_path_buf()));
    }
    Ok(())
}

fn quote(s: &str) -> String {
    let plain = !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./+=:,@%".contains(c));
    if plain {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EnergyUnit, Material, Particle};

    fn gamma_lead() -> RunConfig {
        RunConfig {
            particle: Particle::Gamma,
            energy_value: 1.0,
            energy_unit: EnergyUnit::MeV,
            material: Material::Lead,
            thickness_cm: 10.0,
            event_count: 1000,
            ..RunConfig::default()
        }
    }

    #[test]
    fn canonical_argument_order() {
        assert_eq!(
            build_args(&gamma_lead()),
            ["vis.mac", "Pb", "10", "gamma", "1.0 MeV"]
        );
    }

    #[test]
    fn explicit_macro_file_leads() {
        let cfg = RunConfig {
            macro_file: Some("shield.mac".into()),
            material: Material::Polyethylene,
            thickness_cm: 2.5,
            particle: Particle::Neutron,
            energy_value: 14.1,
            energy_unit: EnergyUnit::MeV,
            ..RunConfig::default()
        };
        assert_eq!(
            build_args(&cfg),
            ["shield.mac", "Polyethylene", "2.5", "neutron", "14.1 MeV"]
        );
    }

    #[test]
    fn codes_are_stable_across_calls() {
        for m in Material::ALL {
            for p in Particle::ALL {
                let cfg = RunConfig {
                    material: m,
                    particle: p,
                    ..RunConfig::default()
                };
                let first = build_args(&cfg);
                let second = build_args(&cfg);
                assert_eq!(first, second);
                assert_eq!(first[1], m.code());
                assert_eq!(first[3], p.code());
            }
        }
    }

    #[test]
    fn energy_keeps_decimal_point() {
        assert_eq!(format_energy(1.0), "1.0");
        assert_eq!(format_energy(0.662), "0.662");
        assert_eq!(format_energy(250.0), "250.0");
        assert_eq!(format_thickness(10.0), "10");
        assert_eq!(format_thickness(0.5), "0.5");
    }

    #[test]
    fn thread_count_goes_to_environment() {
        let auto = LaunchSpec::from_config(&gamma_lead());
        assert!(auto.envs.is_empty());

        let fixed = LaunchSpec::from_config(&RunConfig {
            thread_count: ThreadCount::Fixed(4),
            ..gamma_lead()
        });
        assert_eq!(fixed.envs, [(THREADS_ENV.to_string(), "4".to_string())]);
        assert_eq!(fixed.args, build_args(&gamma_lead()));
    }

    #[test]
    fn command_line_quotes_spaces() {
        let spec = LaunchSpec::from_config(&gamma_lead());
        assert_eq!(spec.command_line(), "./main vis.mac Pb 10 gamma '1.0 MeV'");
    }

    #[test]
    fn missing_path_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("main");
        assert!(matches!(
            check_executable(&missing),
            Err(LaunchError::NotFound(_))
        ));

        std::fs::write(&missing, b"").unwrap();
        assert!(check_executable(&missing).is_ok());

        // Bare names resolve through PATH at spawn time.
        assert!(check_executable(Path::new("geant4-shield")).is_ok());
    }
}
