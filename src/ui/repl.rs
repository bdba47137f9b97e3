use std::io::{BufRead, Write};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::engine::engine::Engine;
use crate::engine::llm_client::ChatBackend;
use crate::engine::protocol::{EngineResponse, TurnReport};
use crate::model::session::{Outcome, Progression};
use crate::ui::console::{PanelState, Renderer, THREAT_FRAMES};

const FRAME_DELAY: Duration = Duration::from_millis(180);

/// How an interactive session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    Finished(Outcome),
    Quit,
    InputEnded,
}

pub struct Repl<'a, R, W> {
    renderer: &'a Renderer,
    input: R,
    output: W,
    animate: bool,
}

impl<'a, R: BufRead, W: Write> Repl<'a, R, W> {
    pub fn new(renderer: &'a Renderer, input: R, output: W, animate: bool) -> Self {
        Self { renderer, input, output, animate }
    }

    #[cfg(test)]
    pub fn into_output(self) -> W {
        self.output
    }

    /// Banner, threat animation for scoring and the command guide.
    pub fn intro(&mut self, progression: Progression, course: Option<&str>) -> Result<()> {
        writeln!(self.output, "{}", self.renderer.banner(progression, course))?;
        if !progression.is_course() {
            for frame in THREAT_FRAMES {
                write!(self.output, "\r{}", self.renderer.threat_frame(frame))?;
                self.output.flush()?;
                if self.animate {
                    thread::sleep(FRAME_DELAY);
                }
            }
            writeln!(self.output, "\n")?;
        }
        writeln!(self.output, "{}", self.renderer.guide(progression))?;
        Ok(())
    }

    pub fn show_report<B: ChatBackend>(&mut self, engine: &Engine<B>, report: &TurnReport) -> Result<()> {
        let status = engine.session().status;
        writeln!(self.output, "{}", self.renderer.turn_report(report, status))?;
        Ok(())
    }

    /// Read actions until the session ends, the player quits or input runs out.
    pub fn run<B: ChatBackend>(&mut self, engine: &mut Engine<B>) -> Result<SessionEnd> {
        let progression = engine.settings().progression;

        if !progression.is_course() {
            let session = engine.session();
            let panel = self.renderer.panel(&PanelState {
                turn: session.turn,
                turn_limit: engine.settings().limits.turn_limit,
                status: session.status,
                risk_level: session.risk_level,
                checkpoint: &session.checkpoint,
                progress_score: session.progress_score,
            });
            writeln!(self.output, "{panel}")?;
        }

        let mut line = String::new();
        loop {
            let next_turn = engine.session().turn + 1;
            let prompt = self
                .renderer
                .prompt(progression, next_turn, engine.settings().limits.turn_limit);
            write!(self.output, "{prompt}")?;
            self.output.flush()?;

            line.clear();
            let read = self.input.read_line(&mut line).context("failed to read player input")?;
            if read == 0 {
                writeln!(self.output, "\n{}", self.renderer.notice("Input ended."))?;
                return Ok(SessionEnd::InputEnded);
            }

            match engine.submit(&line)? {
                EngineResponse::EmptyInput => {
                    writeln!(self.output, "{}", self.renderer.notice("Please enter an action."))?;
                }
                EngineResponse::Quit => {
                    writeln!(self.output, "Session ended.")?;
                    return Ok(SessionEnd::Quit);
                }
                EngineResponse::TurnFailed { reason } => {
                    writeln!(self.output, "{}", self.renderer.error(&format!("Turn failed: {reason}")))?;
                    writeln!(self.output, "{}", self.renderer.notice("Nothing was recorded. Try again."))?;
                }
                EngineResponse::TurnPlayed(report) => {
                    self.show_report(engine, &report)?;
                    if let Some(outcome) = report.outcome {
                        writeln!(self.output, "{}", self.renderer.outcome(progression, outcome))?;
                        return Ok(SessionEnd::Finished(outcome));
                    }
                }
            }
        }
    }
}
