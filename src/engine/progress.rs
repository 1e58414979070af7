//! Coarse progress estimation from the simulation's output.
//!
//! Explicit markers win over the line-count heuristic: once the output has
//! reported its own progress, line counting stops contributing.

/// Heuristic updates happen every this many lines.
const HEURISTIC_STRIDE: u64 = 10;
/// The heuristic never claims more than this before the process exits.
const HEURISTIC_CAP: u8 = 90;
/// Only a successful exit reports 100.
const EXPLICIT_CAP: u8 = 99;

#[derive(Debug, Clone)]
pub struct ProgressTracker {
    event_count: u64,
    lines: u64,
    explicit: bool,
    last: u8,
}

impl ProgressTracker {
    pub fn new(event_count: u64) -> Self {
        Self {
            event_count,
            lines: 0,
            explicit: false,
            last: 0,
        }
    }

    pub fn current(&self) -> u8 {
        self.last
    }

    /// Feed one output line. Returns a new percentage when it went up.
    pub fn observe_line(&mut self, line: &str) -> Option<u8> {
        self.lines += 1;

        if let Some(p) = explicit_percent(line, self.event_count) {
            self.explicit = true;
            return self.advance(p.min(EXPLICIT_CAP));
        }

        if !self.explicit && self.lines % HEURISTIC_STRIDE == 0 {
            let p = (self.lines / HEURISTIC_STRIDE).min(HEURISTIC_CAP as u64) as u8;
            return self.advance(p);
        }
        None
    }

    /// Called once the process exited with code 0.
    pub fn complete(&mut self) -> Option<u8> {
        self.advance(100)
    }

    fn advance(&mut self, p: u8) -> Option<u8> {
        let p = p.min(100);
        if p > self.last {
            self.last = p;
            Some(p)
        } else {
            None
        }
    }
}

fn explicit_percent(line: &str, event_count: u64) -> Option<u8> {
    if let Some(id) = event_start_id(line) {
        if event_count == 0 {
            return None;
        }
        // Event ids are zero-based, so `id` events are done when event `id` starts.
        let done = id.min(event_count);
        return Some((done * 100 / event_count) as u8);
    }

    let lower = line.to_lowercase();
    if lower.contains("progress") || lower.contains("checkpoint") || line.contains("进度") {
        return last_percentage(line).map(|p| p.clamp(0.0, 100.0) as u8);
    }
    None
}

/// Geant4 prints `--> Event 42 starts.` when `/run/printProgress` is set.
fn event_start_id(line: &str) -> Option<u64> {
    let rest = line.trim_start().strip_prefix("--> Event ")?;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() || !rest[digits.len()..].trim_start().starts_with("starts") {
        return None;
    }
    digits.parse().ok()
}

/// Last `NN%` or `NN.N%` token in the line.
fn last_percentage(line: &str) -> Option<f64> {
    let bytes = line.as_bytes();
    let mut found = None;
    for (i, b) in bytes.iter().enumerate() {
        if *b != b'%' {
            continue;
        }
        let mut start = i;
        while start > 0 && (bytes[start - 1].is_ascii_digit() || bytes[start - 1] == b'.') {
            start -= 1;
        }
        if start < i {
            if let Ok(v) = line[start..i].parse::<f64>() {
                found = Some(v);
            }
        }
    }
    found
}
