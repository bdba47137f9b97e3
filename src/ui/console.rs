//! Text rendering for the terminal front end.
//!
//! Everything here returns strings so the REPL decides where they go.
//! Colors follow `console`'s global switch, see [`Renderer::new`].

use console::{Style, Term};

use crate::engine::protocol::{TurnReport, TurnView};
use crate::model::session::{Outcome, Progression, SessionStatus};
use crate::model::turn_result::RiskLevel;

const MIN_WIDTH: usize = 80;
const PROGRESS_WIDTH: usize = 34;
const TRAFFIC_WIDTH: usize = 22;

pub const THREAT_FRAMES: [&str; 3] = [
    " .-^-._.-^-._.-^-._ ATTACK TRAFFIC .-^-._.-^-._.-^-._ ",
    "  ~^~^~^~^~^~^~^~^~ ATTACK TRAFFIC ~^~^~^~^~^~^~^~^~  ",
    " .-^-._.-^-._.-^-._ ATTACK TRAFFIC .-^-._.-^-._.-^-._ ",
];

const SCORING_GUIDE: &str = "How to enter actions:
- Write one concrete action per turn in plain English.
- Good format: <check data> or <apply mitigation> + <target system>.
- You can ask for \"hint\" or \"help\", but that still uses a turn.
- Type \"quit\" to leave.";

const COURSE_GUIDE: &str =
    "Type your actions in plain English. Type 'hint' for a nudge. Type 'quit' to exit.";

/// Snapshot of the scoring status panel.
#[derive(Debug, Clone, Copy)]
pub struct PanelState<'a> {
    pub turn: u32,
    pub turn_limit: Option<u32>,
    pub status: SessionStatus,
    pub risk_level: RiskLevel,
    pub checkpoint: &'a str,
    pub progress_score: u8,
}

pub struct Renderer {
    width: usize,
}

impl Renderer {
    /// Turns styling off globally when `no_color` is set.
    pub fn new(no_color: bool) -> Self {
        if no_color {
            console::set_colors_enabled(false);
        }
        let (_, columns) = Term::stdout().size();
        Self::with_width(usize::from(columns))
    }

    pub fn with_width(width: usize) -> Self {
        Self { width: width.max(MIN_WIDTH) }
    }

    pub fn banner(&self, progression: Progression, course: Option<&str>) -> String {
        let title = match (progression, course) {
            (Progression::Scoring, _) => "Booting incident response console...".to_string(),
            (_, Some(course)) => format!("Course: {course}"),
            (_, None) => "Course".to_string(),
        };
        Style::new().cyan().bold().apply_to(title).to_string()
    }

    pub fn threat_frame(&self, frame: &str) -> String {
        Style::new().red().bold().apply_to(frame).to_string()
    }

    pub fn guide(&self, progression: Progression) -> String {
        let text = if progression.is_course() { COURSE_GUIDE } else { SCORING_GUIDE };
        Style::new().dim().apply_to(text).to_string()
    }

    pub fn prompt(&self, progression: Progression, turn: u32, turn_limit: Option<u32>) -> String {
        let label = match (progression, turn_limit) {
            (Progression::Scoring, Some(limit)) => format!("\nTurn {turn}/{limit} > "),
            (Progression::Scoring, None) => format!("\nTurn {turn} > "),
            (_, _) => "\n\nYour action> ".to_string(),
        };
        Style::new().bold().apply_to(label).to_string()
    }

    pub fn panel(&self, state: &PanelState<'_>) -> String {
        let width = self.width;
        let hline = Style::new().cyan().apply_to("=".repeat(width));
        let sep = Style::new().black().bright().apply_to("-".repeat(width));
        let title = format!("{:=^width$}", " INCIDENT RESPONSE CONSOLE ");
        let frame = THREAT_FRAMES[state.turn as usize % THREAT_FRAMES.len()];
        let pressure = 100 - state.progress_score.min(100);

        let turns = match state.turn_limit {
            Some(limit) => format!(
                "Turn {}/{} | Turns Left: {}",
                state.turn,
                limit,
                limit.saturating_sub(state.turn)
            ),
            None => format!("Turn {}", state.turn),
        };

        let mut lines = vec![
            hline.to_string(),
            Style::new().cyan().bold().apply_to(title).to_string(),
            hline.to_string(),
            self.threat_frame(&format!("{frame:^width$}")),
            sep.to_string(),
            format!(" {turns} | Status: {}", state.status.label().to_uppercase()),
            format!(
                " Risk Level: {} {:8} | Checkpoint: {}",
                risk_label(state.risk_level),
                state.risk_level.as_str().to_uppercase(),
                Style::new().white().bold().apply_to(state.checkpoint)
            ),
            format!(
                " Mitigation Progress {} {:3}%",
                Style::new().green().apply_to(progress_bar(state.progress_score, PROGRESS_WIDTH)),
                state.progress_score
            ),
            format!(
                " Attack Pressure     {} {:3}%",
                Style::new().red().apply_to(progress_bar(pressure, PROGRESS_WIDTH)),
                pressure
            ),
            sep.to_string(),
            format!(
                " Request Storm: {}   SYN Flood: {}",
                Style::new().magenta().apply_to(traffic_bar(state.risk_level, TRAFFIC_WIDTH)),
                Style::new().yellow().apply_to(traffic_bar(state.risk_level, TRAFFIC_WIDTH))
            ),
        ];
        lines.push(hline.to_string());
        lines.join("\n")
    }

    /// Full rendering of one accepted turn, intro included.
    pub fn turn_report(&self, report: &TurnReport, status: SessionStatus) -> String {
        let mut out = match &report.view {
            TurnView::Scored {
                narration,
                checkpoint,
                risk_level,
                progress_score,
                hint_used,
                bad_action,
                ..
            } => {
                let mut lines = vec![
                    self.panel(&PanelState {
                        turn: report.turn,
                        turn_limit: report.turn_limit,
                        status,
                        risk_level: *risk_level,
                        checkpoint,
                        progress_score: *progress_score,
                    }),
                    String::new(),
                    Style::new().bold().apply_to("--- Turn Result ---").to_string(),
                    narration.clone(),
                    format!("Checkpoint: {checkpoint}"),
                    format!("Risk: {}", risk_level.as_str()),
                    format!("Progress: {progress_score}%"),
                ];
                if *hint_used {
                    lines.push(Style::new().yellow().apply_to("Hint used this turn.").to_string());
                }
                if *bad_action {
                    lines.push(Style::new().red().bold().apply_to("Unsafe action detected.").to_string());
                }
                if let Some(limit) = report.turn_limit {
                    lines.push(format!("Turns left: {}", limit.saturating_sub(report.turn)));
                }
                lines.join("\n")
            }
            TurnView::Course { stage, narrative, education, hint, .. } => {
                let mut blocks = Vec::new();
                if !stage.trim().is_empty() {
                    blocks.push(format!(
                        "\n{} {}",
                        Style::new().cyan().bold().apply_to("STAGE:"),
                        stage.trim()
                    ));
                }
                if !narrative.trim().is_empty() {
                    blocks.push(format!("\n{}", narrative.trim()));
                }
                if let Some(education) = education.as_deref().map(str::trim).filter(|e| !e.is_empty()) {
                    blocks.push(format!(
                        "\n{} {education}",
                        Style::new().green().bold().apply_to("Learning:")
                    ));
                }
                if let Some(hint) = hint {
                    blocks.push(format!("\n{} {hint}", Style::new().yellow().bold().apply_to("Hint:")));
                }
                blocks.join("\n")
            }
        };

        if !report.corrections.is_empty() {
            let names: Vec<&str> = report
                .corrections
                .corrections
                .iter()
                .map(|c| c.short_name())
                .collect();
            out.push_str(&format!(
                "\n{}",
                Style::new().dim().apply_to(format!("Guardrails: {}", names.join(", ")))
            ));
        }
        out
    }

    pub fn outcome(&self, progression: Progression, outcome: Outcome) -> String {
        let (style, text) = match outcome {
            Outcome::Won => (
                Style::new().green().bold(),
                "\nOutcome: You contained the incident and restored stable service.",
            ),
            Outcome::Lost => (
                Style::new().red().bold(),
                "\nOutcome: The incident overwhelmed your defences.",
            ),
            Outcome::TurnLimit if progression.is_course() => (
                Style::new().red().bold(),
                "\n\nTurn limit reached. Course result: FAIL",
            ),
            Outcome::TurnLimit => (
                Style::new().red().bold(),
                "\nTurn limit reached. The incident was not contained in time.",
            ),
            Outcome::Passed => (Style::new().green().bold(), "\n\nCourse result: PASS"),
            Outcome::Failed => (Style::new().red().bold(), "\n\nCourse result: FAIL"),
        };
        style.apply_to(text).to_string()
    }

    pub fn notice(&self, text: &str) -> String {
        Style::new().yellow().apply_to(text).to_string()
    }

    pub fn error(&self, text: &str) -> String {
        Style::new().red().bold().apply_to(text).to_string()
    }
}

pub fn progress_bar(score: u8, width: usize) -> String {
    let filled = usize::from(score.min(100)) * width / 100;
    format!("[{}{}]", "#".repeat(filled), "-".repeat(width - filled))
}

pub fn traffic_bar(level: RiskLevel, width: usize) -> String {
    let filled = match level {
        RiskLevel::Low => width * 6 / 22,
        RiskLevel::Medium => width / 2,
        RiskLevel::High => width * 17 / 22,
        RiskLevel::Critical => width,
    };
    format!("[{}{}]", "|".repeat(filled), ".".repeat(width - filled))
}

fn risk_label(level: RiskLevel) -> String {
    let (label, style) = match level {
        RiskLevel::Low => ("[GREEN ]", Style::new().black().on_green().bold()),
        RiskLevel::Medium => ("[YELLOW]", Style::new().black().on_yellow().bold()),
        RiskLevel::High => ("[ORANGE]", Style::new().black().on_color256(208).bold()),
        RiskLevel::Critical => ("[ RED  ]", Style::new().white().bright().on_red().bold()),
    };
    style.apply_to(label).to_string()
}
