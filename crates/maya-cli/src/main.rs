use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::{CommandFactory, Parser, Subcommand};
use maya_bus::{EventBus, Topic};
use maya_core::*;
use maya_schema::{ConsoleEvent, FeedbackKind, MessageId, Mode, ModelKind, SessionIdentity};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const DEFAULT_PROMPT: &str = "You are Maya, a warm and upbeat sustainable lifestyle creator.";

#[derive(Parser)]
#[command(name = "maya", version, about = "Evaluation console for the Maya persona")]
struct Cli {
    #[arg(long, default_value = "maya.yaml", help = "Console configuration file")]
    config: PathBuf,

    #[arg(long, help = "Override the backend base URL")]
    backend: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Chat with the persona; every reply is scored")]
    Chat {
        #[arg(long, help = "Generation model (gemini, openai, claude)")]
        model: Option<ModelKind>,
        #[arg(long, help = "Initial system prompt when the store has none")]
        prompt: Option<String>,
    },
    #[command(about = "Poll live metrics and prompt quality until interrupted")]
    Monitor {
        #[arg(long, help = "Poll once and exit")]
        once: bool,
    },
    #[command(subcommand, about = "Built-in test scenarios")]
    Scenarios(ScenarioCommands),
    #[command(about = "Compare models side by side with a reflection loop per model")]
    Compare {
        #[arg(help = "Message to send to every model")]
        message: String,
        #[arg(long, help = "System prompt; defaults to the active stored prompt")]
        prompt: Option<String>,
    },
    #[command(subcommand, about = "Prompt versions")]
    Prompt(PromptCommands),
    #[command(about = "Validate the configuration file")]
    Validate,
}

#[derive(Subcommand)]
enum ScenarioCommands {
    #[command(about = "List scenarios")]
    List,
    #[command(about = "Run one scenario against the active prompt")]
    Run {
        id: String,
        #[arg(long, help = "Rate the result afterwards (like or dislike)")]
        rate: Option<String>,
    },
}

#[derive(Subcommand)]
enum PromptCommands {
    #[command(about = "Show the version log")]
    History,
    #[command(about = "Show the latest quality verdict")]
    Quality,
    #[command(about = "Request an improved prompt from the reflection service")]
    Improve {
        #[arg(long, help = "Commit the suggestion without asking")]
        approve: bool,
        #[arg(long, help = "Reason recorded with the new version")]
        reason: Option<String>,
    },
}

fn init_logging(config: &ConsoleConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(config.logging.filter.as_deref().unwrap_or("info"))
    });

    let (file_layer, guard) = match &config.logging.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_appender = tracing_appender::rolling::daily(dir, "maya.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(guard)
}

fn parse_feedback(raw: &str) -> Result<FeedbackKind> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "like" | "+" | "up" => Ok(FeedbackKind::Like),
        "dislike" | "-" | "down" => Ok(FeedbackKind::Dislike),
        other => Err(anyhow!("expected like or dislike, got {other}")),
    }
}

fn describe(outcome: &maya_schema::ScoreOutcome) -> String {
    match outcome {
        maya_schema::ScoreOutcome::Scored(record) => format!("{:.1}", record.overall),
        maya_schema::ScoreOutcome::Malformed => "malformed evaluation".to_string(),
        maya_schema::ScoreOutcome::Failed { reason } => format!("evaluation failed ({reason})"),
    }
}

fn read_line(prompt: &str) -> Result<Option<String>> {
    print!("{prompt}");
    std::io::stdout().flush()?;
    let mut input = String::new();
    if std::io::stdin().read_line(&mut input)? == 0 {
        return Ok(None);
    }
    Ok(Some(input.trim().to_string()))
}

/// Print bus events as they arrive.
fn spawn_event_printer(mut rx: tokio::sync::mpsc::Receiver<ConsoleEvent>) {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                ConsoleEvent::EvaluationCompleted {
                    message_id,
                    outcome,
                } => println!("  [score #{message_id}] {}", describe(&outcome)),
                ConsoleEvent::RollingEvaluationCompleted {
                    pair_count,
                    outcome,
                } => println!("  [rolling after {pair_count} turns] {}", describe(&outcome)),
                ConsoleEvent::QualityDegraded {
                    prompt_id,
                    average,
                    threshold,
                } => println!(
                    "  [quality] prompt {prompt_id} degraded: {average:.1} < {threshold:.1}; run `maya prompt improve`"
                ),
                ConsoleEvent::SessionRotated { session_id } => {
                    println!("  [session] active prompt changed, new session {session_id}")
                }
                ConsoleEvent::MetricsUpdated {
                    total_conversations,
                    avg_response_time,
                    satisfaction,
                    gauge,
                } => println!(
                    "conversations={total_conversations} avg_response={avg_response_time:.2}s satisfaction={satisfaction:.2}/5 health={gauge}"
                ),
                other => tracing::debug!(?other, "event"),
            }
        }
    });
}

async fn current_prompt(services: &Services, prompt_id: &str) -> Option<String> {
    match services.prompts.history(prompt_id).await {
        Ok(history) => history.last().map(|v| v.text.clone()),
        Err(e) => {
            tracing::warn!(prompt_id, error = %e, "could not load prompt history");
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = ConsoleConfig::load(&cli.config)?;
    if let Some(url) = &cli.backend {
        config.backend.base_url = url.clone();
    }
    let _guard = init_logging(&config)?;

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let services = Services::from_backend(config.backend.build());
    match command {
        Commands::Validate => {
            validate_config(&config)?;
            println!(
                "Config valid. backend={} prompt_id={} model={}",
                config.backend.base_url, config.prompt_id, config.default_model
            );
        }
        Commands::Chat { model, prompt } => {
            if let Some(model) = model {
                config.default_model = model;
            }
            run_chat(&config, services, prompt).await?;
        }
        Commands::Monitor { once } => run_monitor(&config, services, once).await?,
        Commands::Scenarios(cmd) => run_scenarios(&config, services, cmd).await?,
        Commands::Compare { message, prompt } => {
            run_compare(&config, services, message, prompt).await?
        }
        Commands::Prompt(cmd) => run_prompt(&config, services, cmd).await?,
    }
    Ok(())
}

async fn run_chat(config: &ConsoleConfig, services: Services, prompt: Option<String>) -> Result<()> {
    let bus = EventBus::default();
    spawn_event_printer(
        bus.subscribe_many(&[
            Topic::EvaluationCompleted,
            Topic::RollingEvaluationCompleted,
            Topic::QualityDegraded,
            Topic::SessionRotated,
        ])
        .await,
    );

    let initial = match current_prompt(&services, &config.prompt_id).await {
        Some(stored) => stored,
        None => prompt.unwrap_or_else(|| DEFAULT_PROMPT.to_string()),
    };
    let console = Arc::new(Console::new(
        config,
        services,
        initial,
        Some(bus.publisher()),
    ));

    let quality = console.quality_monitor();
    let _quality_poller = spawn_poller("quality", config.polling.quality_interval(), move || {
        let quality = quality.clone();
        async move {
            quality.poll().await;
        }
    });
    let _prompt_sync = console.spawn_prompt_sync(config.polling.quality_interval());

    println!("Maya console ({}). Commands: /like, /dislike, /sync, quit", console.model());
    println!("---");

    let mut last_reply: Option<MessageId> = None;
    while let Some(input) = read_line("> ")? {
        match input.as_str() {
            "" => continue,
            "quit" | "exit" => break,
            "/sync" => match console.sync_active_prompt().await {
                Ok(true) => println!("Active prompt updated."),
                Ok(false) => println!("Active prompt unchanged."),
                Err(e) => eprintln!("Error: {e}"),
            },
            "/like" | "/dislike" => {
                let Some(id) = last_reply else {
                    println!("Nothing to rate yet.");
                    continue;
                };
                let kind = parse_feedback(&input[1..])?;
                match console.submit_feedback(id, kind).await {
                    Ok(record) => println!("Recorded {kind} (adjusted {:.1}).", record.scores.overall),
                    Err(ConsoleError::FeedbackDisabled) => {
                        println!("Reply has no score yet; choice kept locally.")
                    }
                    Err(e) => eprintln!("Error: {e}"),
                }
            }
            text => {
                let turn = console.send_message(text).await;
                println!("Maya: {}", turn.reply.content);
                last_reply = Some(turn.reply.id);
            }
        }
    }
    Ok(())
}

async fn run_monitor(config: &ConsoleConfig, services: Services, once: bool) -> Result<()> {
    let bus = EventBus::default();
    spawn_event_printer(
        bus.subscribe_many(&[Topic::MetricsUpdated, Topic::QualityDegraded])
            .await,
    );

    let metrics = Arc::new(
        MetricsAggregator::new(services.feedback.clone(), config.metrics)
            .with_publisher(bus.publisher()),
    );
    let quality = Arc::new(
        QualityMonitor::new(
            config.prompt_id.clone(),
            config.default_model,
            services.prompts.clone(),
            services.reflection.clone(),
        )
        .with_publisher(bus.publisher()),
    );

    if once {
        match metrics.poll().await {
            Some(snapshot) => println!("{}", serde_json::to_string_pretty(&snapshot)?),
            None => println!("No metrics available."),
        }
        match quality.poll().await {
            Some(status) => println!("{}", serde_json::to_string_pretty(&status)?),
            None => println!("Not enough data for a quality verdict."),
        }
        return Ok(());
    }

    let polled_metrics = metrics.clone();
    let metrics_poller = spawn_poller("metrics", config.polling.metrics_interval(), move || {
        let metrics = polled_metrics.clone();
        async move {
            metrics.poll().await;
        }
    });
    let polled_quality = quality.clone();
    let quality_poller = spawn_poller("quality", config.polling.quality_interval(), move || {
        let quality = polled_quality.clone();
        async move {
            quality.poll().await;
        }
    });

    tokio::signal::ctrl_c().await?;
    metrics_poller.shutdown().await;
    quality_poller.shutdown().await;
    Ok(())
}

async fn run_scenarios(
    config: &ConsoleConfig,
    services: Services,
    cmd: ScenarioCommands,
) -> Result<()> {
    let scorer = Arc::new(FeedbackScorer::new(services.feedback.clone(), config.feedback));
    let active = current_prompt(&services, &config.prompt_id)
        .await
        .unwrap_or_else(|| DEFAULT_PROMPT.to_string());
    let runner = ScenarioRunner::new(
        services.generation,
        services.evaluation,
        services.prompts,
        scorer,
        config.prompt_id.clone(),
        config.default_model,
    );

    match cmd {
        ScenarioCommands::List => {
            for scenario in runner.scenarios().await {
                println!(
                    "{:>3}  {:<30} [{}] themes: {}",
                    scenario.id,
                    scenario.name,
                    scenario.category,
                    scenario.expected_themes.join(", ")
                );
            }
        }
        ScenarioCommands::Run { id, rate } => {
            let result = runner.run(&id, &active).await?;
            println!("Maya: {}", result.response_text);
            println!(
                "Score: {} ({:.2}s)",
                describe(&result.outcome),
                result.latency.as_secs_f64()
            );
            if let Some(rate) = rate {
                let kind = parse_feedback(&rate)?;
                match runner.feedback(&id, kind).await {
                    Ok(record) => println!("Recorded {kind} (adjusted {:.1}).", record.scores.overall),
                    Err(ConsoleError::FeedbackDisabled) => {
                        println!("Result has no score; feedback not submitted.")
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
    }
    Ok(())
}

async fn run_compare(
    config: &ConsoleConfig,
    services: Services,
    message: String,
    prompt: Option<String>,
) -> Result<()> {
    let prompt = match prompt {
        Some(prompt) => prompt,
        None => current_prompt(&services, &config.prompt_id)
            .await
            .unwrap_or_else(|| DEFAULT_PROMPT.to_string()),
    };
    let controller = Arc::new(ReflectionController::new(
        services.generation.clone(),
        services.evaluation.clone(),
        services.reflection.clone(),
        config.reflection.max_iterations,
    ));
    let scorer = Arc::new(FeedbackScorer::new(services.feedback.clone(), config.feedback));
    let runner = ComparisonRunner::new(controller, scorer);

    let result = runner
        .run(&prompt, ComparisonInput::Manual(message), SessionIdentity::new())
        .await;
    for run in &result.runs {
        print_run(run);
    }
    for (model, reason) in &result.failures {
        println!("{}: failed ({reason})", model.label());
    }

    println!("Rate with `<model> like|dislike`, or quit.");
    while let Some(input) = read_line("> ")? {
        if input.is_empty() {
            continue;
        }
        if input == "quit" || input == "exit" {
            break;
        }
        let mut parts = input.split_whitespace();
        let (Some(model), Some(kind)) = (parts.next(), parts.next()) else {
            println!("Expected `<model> like|dislike`.");
            continue;
        };
        let model: ModelKind = match model.parse() {
            Ok(model) => model,
            Err(e) => {
                println!("{e}");
                continue;
            }
        };
        let kind = match parse_feedback(kind) {
            Ok(kind) => kind,
            Err(e) => {
                println!("{e}");
                continue;
            }
        };
        match runner.feedback(Mode::Manual, model, kind).await {
            Ok(outcome) => match outcome.step {
                ReflectionStep::Accepted => println!("{}: accepted.", model.label()),
                ReflectionStep::Exhausted => {
                    println!("{}: retry budget exhausted.", model.label())
                }
                ReflectionStep::Iterated(report) => {
                    print_run(&ModelRun {
                        model,
                        estimated_cost: estimate_cost(model, &report.entry.response_text),
                        latency: report.generation_latency,
                        entry: report.entry,
                    });
                }
            },
            Err(e) => eprintln!("Error: {e}"),
        }
    }
    Ok(())
}

fn print_run(run: &ModelRun) {
    println!(
        "{} (iteration {}, {:.2}s, ~${:.5}): {}",
        run.model.label(),
        run.entry.iteration,
        run.latency.as_secs_f64(),
        run.estimated_cost,
        describe(&run.entry.scores)
    );
    println!("  {}", run.entry.response_text);
}

async fn run_prompt(
    config: &ConsoleConfig,
    services: Services,
    cmd: PromptCommands,
) -> Result<()> {
    let monitor = QualityMonitor::new(
        config.prompt_id.clone(),
        config.default_model,
        services.prompts.clone(),
        services.reflection.clone(),
    );

    match cmd {
        PromptCommands::History => {
            let history = monitor.refresh_history().await?;
            if history.is_empty() {
                println!("No versions stored for prompt {}.", config.prompt_id);
            }
            for (index, version) in history.iter().enumerate() {
                println!(
                    "#{index} {} {}",
                    version.created_at.as_deref().unwrap_or("-"),
                    version.reason.as_deref().unwrap_or("")
                );
                println!("    {}", version.text);
            }
        }
        PromptCommands::Quality => match monitor.poll().await {
            Some(status) => println!(
                "average {:.1} threshold {:.1} degraded {} recent {:?}",
                status.average, status.threshold, status.degraded, status.recent_scores
            ),
            None => println!("Not enough data for a quality verdict."),
        },
        PromptCommands::Improve { approve, reason } => {
            monitor.poll().await;
            monitor.refresh_history().await?;
            let staged = monitor.request_improvement().await?;
            println!("Suggested prompt:\n{}\n", staged.prompt);

            let confirmed = approve
                || matches!(
                    read_line("Commit this version? [y/N] ")?.as_deref(),
                    Some("y") | Some("yes")
                );
            if confirmed {
                let version = monitor.approve(reason).await?;
                println!(
                    "Committed new version ({}).",
                    version.reason.as_deref().unwrap_or_default()
                );
            } else {
                monitor.cancel().await;
                println!("Discarded.");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_chat_with_model() {
        let cli = Cli::try_parse_from(["maya", "chat", "--model", "openai"]).unwrap();
        assert!(matches!(
            cli.command.unwrap(),
            Commands::Chat {
                model: Some(ModelKind::OpenAi),
                ..
            }
        ));
    }

    #[test]
    fn rejects_unknown_model() {
        assert!(Cli::try_parse_from(["maya", "chat", "--model", "llama"]).is_err());
    }

    #[test]
    fn parses_scenario_run_with_rating() {
        let cli = Cli::try_parse_from(["maya", "scenarios", "run", "2", "--rate", "like"]).unwrap();
        assert!(matches!(
            cli.command.unwrap(),
            Commands::Scenarios(ScenarioCommands::Run { rate: Some(_), .. })
        ));
    }

    #[test]
    fn parses_prompt_improve_flags() {
        let cli = Cli::try_parse_from(["maya", "prompt", "improve", "--approve"]).unwrap();
        assert!(matches!(
            cli.command.unwrap(),
            Commands::Prompt(PromptCommands::Improve { approve: true, reason: None })
        ));
    }

    #[test]
    fn default_config_path() {
        let cli = Cli::try_parse_from(["maya", "validate"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("maya.yaml"));
    }

    #[test]
    fn feedback_words() {
        assert_eq!(parse_feedback(" Like ").unwrap(), FeedbackKind::Like);
        assert_eq!(parse_feedback("-").unwrap(), FeedbackKind::Dislike);
        assert!(parse_feedback("meh").is_err());
    }
}
