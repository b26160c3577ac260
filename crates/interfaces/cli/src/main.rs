//! Operator console for the simulation server.
//!
//! Boots (forks) a simulation and drops into a line-based REPL: `run <N>`
//! advances the world, the `print …` family inspects agent state, and
//! `call -- …` commands talk to the model directly.  No command failure
//! is fatal; errors print and the prompt comes back.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use simulacra_config::SimulationConfig;
use simulacra_llm::{HttpModel, LanguageModel};
use simulacra_memory::NodeKind;
use simulacra_persona::Persona;
use simulacra_runtime::SimulationServer;

#[derive(Debug, Parser)]
#[command(
    name = "simulacra",
    version,
    about = "Tick-driven generative-simulacra backend server"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "config/simulacra.toml")]
    config: String,
    /// Simulation to fork from (prompted for when omitted).
    #[arg(long)]
    fork: Option<String>,
    /// Name of the new simulation (prompted for when omitted).
    #[arg(long)]
    sim: Option<String>,
}

fn prompt_line(prompt: &str) -> Result<String> {
    print!("{prompt}");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = SimulationConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config))?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.telemetry.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let fork = match cli.fork {
        Some(fork) => fork,
        None => prompt_line("Enter the name of the forked simulation: ")?,
    };
    let sim = match cli.sim {
        Some(sim) => sim,
        None => prompt_line("Enter the name of the new simulation: ")?,
    };

    let llm: Arc<dyn LanguageModel> = Arc::new(HttpModel::new(config.llm.clone()));
    let mut server = SimulationServer::new(config, llm.clone(), &fork, &sim)?;

    println!("Simulation {sim} forked from {fork}. Type a command (run <N>, save, fin, exit, print …).");
    loop {
        let command = prompt_line("Enter option: ")?;
        if command.is_empty() {
            continue;
        }
        match dispatch(&mut server, llm.as_ref(), &command).await {
            Ok(ReplFlow::Continue) => {}
            Ok(ReplFlow::Quit) => break,
            Err(err) => println!("Error: {err:#}"),
        }
    }
    Ok(())
}

enum ReplFlow {
    Continue,
    Quit,
}

async fn dispatch(
    server: &mut SimulationServer,
    llm: &dyn LanguageModel,
    command: &str,
) -> Result<ReplFlow> {
    let lower = command.to_lowercase();

    if matches!(lower.as_str(), "f" | "fin" | "finish" | "save and finish") {
        server.save()?;
        return Ok(ReplFlow::Quit);
    }
    if lower == "exit" {
        server.discard()?;
        return Ok(ReplFlow::Quit);
    }
    if lower == "save" {
        server.save()?;
        return Ok(ReplFlow::Continue);
    }
    if let Some(count) = lower.strip_prefix("run ") {
        let count: u64 = count.trim().parse().context("run expects a step count")?;
        server.run(count).await?;
        return Ok(ReplFlow::Continue);
    }

    if lower == "print all persona schedule" {
        for name in server.persona_names().to_vec() {
            let persona = server.persona(&name).context("unknown persona")?;
            println!("{name}\n{}---", persona.scratch.daily_schedule_summary());
        }
        return Ok(ReplFlow::Continue);
    }
    if let Some(name) = command.strip_prefix("print hourly org persona schedule ") {
        let persona = lookup(server, name)?;
        println!("{}", persona.scratch.hourly_org_summary());
        return Ok(ReplFlow::Continue);
    }
    if let Some(name) = command.strip_prefix("print persona schedule ") {
        let persona = lookup(server, name)?;
        println!("{}", persona.scratch.daily_schedule_summary());
        return Ok(ReplFlow::Continue);
    }
    if let Some(name) = command.strip_prefix("print persona current tile ") {
        let persona = lookup(server, name)?;
        println!("{:?}", persona.scratch.curr_tile);
        return Ok(ReplFlow::Continue);
    }
    if let Some(name) = command.strip_prefix("print persona chatting with buffer ") {
        let persona = lookup(server, name)?;
        for (partner, count) in &persona.scratch.chatting_with_buffer {
            println!("{partner}: {count}");
        }
        return Ok(ReplFlow::Continue);
    }
    if let Some(name) = command.strip_prefix("print persona associative memory (event) ") {
        let persona = lookup(server, name)?;
        println!("{}", persona.a_mem.render_seq(NodeKind::Event));
        return Ok(ReplFlow::Continue);
    }
    if let Some(name) = command.strip_prefix("print persona associative memory (thought) ") {
        let persona = lookup(server, name)?;
        println!("{}", persona.a_mem.render_seq(NodeKind::Thought));
        return Ok(ReplFlow::Continue);
    }
    if let Some(name) = command.strip_prefix("print persona associative memory (chat) ") {
        let persona = lookup(server, name)?;
        println!("{}", persona.a_mem.render_seq(NodeKind::Chat));
        return Ok(ReplFlow::Continue);
    }
    if let Some(name) = command.strip_prefix("print persona spatial memory ") {
        let persona = lookup(server, name)?;
        println!("{}", persona.s_mem.render());
        return Ok(ReplFlow::Continue);
    }
    if lower == "print current time" {
        println!("{}", server.curr_time.format("%B %d, %Y, %H:%M:%S"));
        println!("steps: {}", server.step);
        return Ok(ReplFlow::Continue);
    }
    if let Some(coords) = command.strip_prefix("print tile event ") {
        let tile = parse_tile(coords)?;
        match server.maze.try_tile(tile) {
            Some(details) => {
                for event in &details.events {
                    println!("{event}");
                }
            }
            None => bail!("tile {tile:?} is out of bounds"),
        }
        return Ok(ReplFlow::Continue);
    }
    if let Some(coords) = command.strip_prefix("print tile details ") {
        let tile = parse_tile(coords)?;
        match server.maze.try_tile(tile) {
            Some(details) => println!("{details:#?}"),
            None => bail!("tile {tile:?} is out of bounds"),
        }
        return Ok(ReplFlow::Continue);
    }

    if let Some(name) = command.strip_prefix("call -- analysis ") {
        analysis_session(server, llm, name.trim()).await?;
        return Ok(ReplFlow::Continue);
    }
    if let Some(path) = command.strip_prefix("call -- load history ") {
        let injected = server.load_history(path.trim()).await?;
        println!("injected {injected} whispers");
        return Ok(ReplFlow::Continue);
    }

    bail!("unknown command: {command}");
}

fn lookup<'a>(server: &'a SimulationServer, name: &str) -> Result<&'a Persona> {
    server
        .persona(name.trim())
        .with_context(|| format!("unknown persona {name:?}"))
}

fn parse_tile(raw: &str) -> Result<(usize, usize)> {
    let mut parts = raw.split(',').map(str::trim);
    let x = parts
        .next()
        .and_then(|v| v.parse().ok())
        .context("expected x, y")?;
    let y = parts
        .next()
        .and_then(|v| v.parse().ok())
        .context("expected x, y")?;
    Ok((x, y))
}

/// A stateless interview with a persona: nothing said here is saved to
/// its memory.
async fn analysis_session(
    server: &SimulationServer,
    llm: &dyn LanguageModel,
    name: &str,
) -> Result<()> {
    let persona = lookup(server, name)?;
    println!("Interviewing {name}. Type end_convo to finish.");

    let mut history = String::new();
    loop {
        let line = prompt_line("> ")?;
        if line == "end_convo" {
            break;
        }
        let prompt = format!(
            "{}\n[Interview transcript]\n{history}Interviewer: {line}\n{name}:",
            persona.scratch.identity_summary(),
        );
        let reply = llm
            .complete(&prompt)
            .await
            .unwrap_or_else(|_| "...".to_string());
        let reply = reply.trim();
        println!("{name}: {reply}");
        history.push_str(&format!("Interviewer: {line}\n{name}: {reply}\n"));
    }
    Ok(())
}
