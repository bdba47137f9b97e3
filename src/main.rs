mod config;
mod engine;
mod model;
mod ui;

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::config::Settings;
use crate::engine::content::{load_course_prompt, load_prompt_file};
use crate::engine::engine::Engine;
use crate::engine::llm_client::{Gateway, OllamaClient};
use crate::model::session::Progression;
use crate::ui::console::Renderer;
use crate::ui::repl::Repl;

/// Play an LLM-judged incident scenario or security course in the terminal.
#[derive(Debug, Parser)]
#[command(name = "scenario_runner", version, about)]
struct Cli {
    /// Game mode: scoring, verdict or staged
    #[arg(long)]
    mode: Option<Progression>,

    /// Course directory name under the courses dir
    #[arg(long)]
    course: Option<String>,

    /// Model name served by Ollama
    #[arg(long)]
    model: Option<String>,

    /// Ollama base URL
    #[arg(long)]
    host: Option<String>,

    /// Maximum turns, 0 for unlimited
    #[arg(long)]
    turn_limit: Option<u32>,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Disable the intro animation
    #[arg(long)]
    no_anim: bool,

    /// Settings file to use instead of the default location
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log engine internals at debug level
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn apply(&self, settings: &mut Settings) {
        if let Some(mode) = self.mode {
            settings.mode = Some(mode);
        }
        if let Some(course) = &self.course {
            settings.course = Some(course.clone());
        }
        if let Some(model) = &self.model {
            settings.model = model.clone();
        }
        if let Some(host) = &self.host {
            settings.host = host.clone();
        }
        if let Some(limit) = self.turn_limit {
            settings.turn_limit = Some(limit);
        }
        settings.no_color |= self.no_color;
        settings.no_anim |= self.no_anim;
    }
}

fn init_tracing(verbose: bool) {
    // RUST_LOG overrides; --verbose => debug; else warn
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose {
            "scenario_runner=debug"
        } else {
            "scenario_runner=warn"
        })
    });
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let mut settings = Settings::load(cli.config.as_deref())?;
    settings.apply_env()?;
    cli.apply(&mut settings);

    let progression = settings.progression();
    let course = settings.course_name()?;
    let system_prompt = match course {
        Some(course) => load_course_prompt(&settings.courses_dir, course)
            .with_context(|| format!("could not load course '{course}'"))?,
        None => load_prompt_file(&settings.prompt_file).context("could not load prompt file")?,
    };
    debug!(?settings, "configuration resolved");

    let renderer = Renderer::new(settings.no_color);
    let stdin = io::stdin();
    let mut repl = Repl::new(&renderer, stdin.lock(), io::stdout(), !settings.no_anim);
    repl.intro(progression, course)?;

    let client = OllamaClient::new(&settings.host, &settings.model, settings.temperature());
    let gateway = Gateway::new(client);
    gateway
        .wait_for_model(settings.ready_retries, settings.ready_interval())
        .with_context(|| {
            format!(
                "model is not ready; start Ollama and run `ollama pull {}`",
                settings.model
            )
        })?;

    let mut engine = Engine::new(gateway, settings.engine_settings(), system_prompt);
    info!(%progression, model = %settings.model, "session starting");

    if let Some(report) = engine.start().context("failed to start the course")? {
        repl.show_report(&engine, &report)?;
    }

    let end = repl.run(&mut engine)?;
    info!(?end, turns = engine.session().turn, "session finished");
    Ok(())
}
