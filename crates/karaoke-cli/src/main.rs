use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use console::{style, StyledObject};
use indicatif::{ProgressBar, ProgressStyle};
use karaoke_config::{validate, ClientConfig, ConfigOverrides};
use karaoke_core::{
    convert_graph, paths,
    url::{self, LogTarget, UrlConfig},
    util::{format_duration_millis, truncate_chars},
    BlueOceanApi, BuildState, HttpApi, KaraokeEvent, NodesInformation, RenderNode, RenderState,
    RunDetailsView, RunIdentity,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::EnvFilter;

/// karaoke: follow Jenkins pipeline runs from the terminal
///
/// Tails stage graphs, steps and logs of a Blue Ocean pipeline run while it
/// executes, the way the run details page does in the browser.
#[derive(Parser)]
#[command(name = "karaoke", version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the client YAML config (defaults to the global configs directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the Jenkins root URL from the config
    #[arg(long, global = true)]
    jenkins_url: Option<String>,

    /// Override the Blue Ocean organization from the config
    #[arg(long, global = true)]
    organization: Option<String>,

    /// Override the log re-poll interval in milliseconds
    #[arg(long, global = true)]
    speed: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

/// Identifies one run of a pipeline.
#[derive(Args)]
struct RunArgs {
    /// Pipeline name, with folders separated by '/'
    #[arg(short, long)]
    pipeline: String,

    /// Run number
    #[arg(short, long)]
    run: String,

    /// Branch of a multi-branch pipeline
    #[arg(short, long)]
    branch: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow a run live until it finishes
    Follow {
        #[command(flatten)]
        run: RunArgs,

        /// Open on a specific stage instead of following the running one
        #[arg(long)]
        node: Option<String>,

        /// Use the full-screen terminal view
        #[arg(long)]
        tui: bool,
    },

    /// Print a log once
    Log {
        #[command(flatten)]
        run: RunArgs,

        /// Stage whose log to print, or the stage a --step belongs to
        #[arg(long)]
        node: Option<String>,

        /// Step whose log to print (scoped to --node if given)
        #[arg(long)]
        step: Option<String>,

        /// Fetch the complete log instead of the server's default tail
        #[arg(long)]
        all: bool,

        /// Also write the log to the logs directory
        #[arg(long)]
        save: bool,
    },

    /// Print the stage graph of a run
    Nodes {
        #[command(flatten)]
        run: RunArgs,
    },

    /// Validate a client config without connecting
    Validate,
}

impl RunArgs {
    fn identity(&self, config: &ClientConfig) -> RunIdentity {
        RunIdentity {
            organization: config.organization.clone(),
            pipeline_name: self.pipeline.clone(),
            branch_name: self.branch.clone(),
            run_id: self.run.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load .env if present
    let _ = dotenvy::dotenv();

    let tui = matches!(cli.command, Commands::Follow { tui: true, .. });

    // The full-screen view owns the terminal, so it gets no log output
    if !tui {
        let filter = if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("warn")
        };

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .without_time()
            .init();
    }

    let overrides = ConfigOverrides {
        jenkins_url: cli.jenkins_url.clone(),
        organization: cli.organization.clone(),
        karaoke_speed_ms: cli.speed,
    };

    match cli.command {
        Commands::Validate => cmd_validate(cli.config, &overrides),

        Commands::Follow { run, node, tui } => {
            let config = resolve_config(cli.config.as_deref(), &overrides)?;
            cmd_follow(&config, &run, node, tui).await
        }

        Commands::Log {
            run,
            node,
            step,
            all,
            save,
        } => {
            let config = resolve_config(cli.config.as_deref(), &overrides)?;
            cmd_log(&config, &run, node, step, all, save).await
        }

        Commands::Nodes { run } => {
            let config = resolve_config(cli.config.as_deref(), &overrides)?;
            cmd_nodes(&config, &run).await
        }
    }
}

/// Load the client config and apply command-line overrides.
///
/// Uses `--config` if given, otherwise `<configs_dir>/client.yaml`. When no
/// config file exists a `--jenkins-url` alone is enough.
fn resolve_config(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<ClientConfig> {
    let default_path = paths::default_config_path();
    let explicit = path.is_some();
    let path = path.unwrap_or(&default_path);

    let mut config = if path.exists() {
        ClientConfig::from_file(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?
    } else if explicit {
        anyhow::bail!("Config file not found: {}", path.display());
    } else if let Some(ref url) = overrides.jenkins_url {
        ClientConfig::new(url.clone())
    } else {
        anyhow::bail!(
            "No client config found.\n  Searched:\n    {}\n  Pass --config <FILE> or --jenkins-url <URL>.",
            default_path.display()
        );
    };
    config.apply_overrides(overrides);

    let validation = validate(&config);
    if !validation.is_valid() {
        eprintln!("{} Config validation failed:", style("✗").red().bold());
        for err in &validation.errors {
            eprintln!("  {} {err}", style("•").red());
        }
        anyhow::bail!("Invalid client config");
    }
    for warning in &validation.warnings {
        eprintln!("  {} {warning}", style("⚠").yellow());
    }

    Ok(config)
}

fn spinner(message: &str) -> ProgressBar {
    let s = ProgressBar::new_spinner();
    if let Ok(template) = ProgressStyle::with_template("  {spinner:.cyan} {msg}") {
        s.set_style(template.tick_strings(&[
            "⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏",
        ]));
    }
    s.set_message(message.to_string());
    s.enable_steady_tick(Duration::from_millis(100));
    s
}

fn state_icon(state: RenderState) -> StyledObject<&'static str> {
    match state {
        RenderState::Success => style("✓").green().bold(),
        RenderState::Failure => style("✗").red().bold(),
        RenderState::Running => style("▶").cyan().bold(),
        RenderState::Queued => style("○").dim(),
        RenderState::NotBuilt => style("⊘").dim(),
        RenderState::Unknown => style("?").yellow(),
    }
}

fn status_icon(status: &str) -> StyledObject<&'static str> {
    match status {
        "success" => style("✓").green().bold(),
        "failure" => style("✗").red().bold(),
        "unstable" | "aborted" => style("⚠").yellow().bold(),
        "running" => style("▶").cyan().bold(),
        _ => style("○").dim(),
    }
}

fn flatten_states(graph: &[RenderNode]) -> Vec<(String, RenderState)> {
    let mut out = Vec::new();
    for node in graph {
        out.push((node.id.clone(), node.state));
        for child in &node.children {
            out.push((child.id.clone(), child.state));
        }
    }
    out
}

fn print_graph(graph: &[RenderNode], selected: Option<&str>) {
    for node in graph {
        let marker = if selected == Some(node.id.as_str()) {
            style("◀").cyan()
        } else {
            style(" ")
        };
        println!(
            "  {} {} {} {}",
            state_icon(node.state),
            style(&node.name).bold(),
            style(format!("({}%)", node.complete_percent)).dim(),
            marker
        );
        for child in &node.children {
            let marker = if selected == Some(child.id.as_str()) {
                style("◀").cyan()
            } else {
                style(" ")
            };
            println!(
                "    {} {} {}",
                state_icon(child.state),
                child.name,
                marker
            );
        }
    }
}

/// Spawn a task that listens for KaraokeEvents and renders CLI output.
fn spawn_cli_display(mut rx: mpsc::UnboundedReceiver<KaraokeEvent>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut spinner_bar: Option<ProgressBar> = None;
        let mut last_graph: Vec<(String, RenderState)> = Vec::new();
        let mut step_states: HashMap<String, Option<BuildState>> = HashMap::new();
        let mut step_names: HashMap<String, String> = HashMap::new();

        while let Some(event) = rx.recv().await {
            match event {
                KaraokeEvent::Mounted {
                    run_id,
                    pipeline_name,
                    supports_graph,
                    follow_along,
                } => {
                    println!(
                        "\n{} {} #{} ({})",
                        style("Run:").bold().cyan(),
                        style(&pipeline_name).bold(),
                        run_id,
                        style(if follow_along { "following" } else { "finished" }).dim()
                    );
                    println!("{}", style("─".repeat(60)).dim());
                    if supports_graph {
                        spinner_bar = Some(spinner("Waiting for stage graph..."));
                    }
                }

                KaraokeEvent::NodesUpdated {
                    graph, selected, ..
                } => {
                    if let Some(s) = spinner_bar.take() {
                        s.finish_and_clear();
                    }
                    let states = flatten_states(&graph);
                    if states != last_graph {
                        println!("\n{}", style("Stages").bold());
                        print_graph(&graph, selected.as_deref());
                        last_graph = states;
                    }
                }

                KaraokeEvent::StepsUpdated { steps, .. } => {
                    for step in steps {
                        step_names.insert(step.id.clone(), step.display_name.clone());
                        let previous = step_states.insert(step.id.clone(), step.state);
                        if previous == Some(step.state) {
                            continue;
                        }
                        let duration = step
                            .duration_in_millis
                            .filter(|_| step.is_finished())
                            .map(|d| format!(" {}", format_duration_millis(d)))
                            .unwrap_or_default();
                        println!(
                            "  {} {}{}",
                            status_icon(step.display_status()),
                            truncate_chars(&step.display_name, 70),
                            style(duration).dim()
                        );
                    }
                }

                KaraokeEvent::LogUpdated { step, lines, .. } => {
                    let gutter = match step.as_deref().and_then(|id| step_names.get(id)) {
                        Some(name) => format!("{} │", truncate_chars(name, 12)),
                        None => "│".to_string(),
                    };
                    for line in lines {
                        println!("    {} {}", style(&gutter).dim(), line);
                    }
                }

                KaraokeEvent::StepCollapsed { step } => {
                    let name = step_names.get(&step).cloned().unwrap_or(step);
                    println!(
                        "  {} {}",
                        style("✓").green(),
                        style(format!("{name} finished")).dim()
                    );
                }

                KaraokeEvent::FollowChanged { follow_along } => {
                    let label = if follow_along {
                        "following the running stage"
                    } else {
                        "pinned"
                    };
                    println!("  {} {}", style("↻").yellow(), style(label).dim());
                }

                KaraokeEvent::RunUpdated { state, result } => {
                    if state == Some(BuildState::Finished) {
                        let status = result.map(|r| r.as_str()).unwrap_or("unknown");
                        println!("{}", style("─".repeat(60)).dim());
                        println!(
                            "{} Run finished: {}",
                            status_icon(status),
                            style(status).bold()
                        );
                    }
                }

                KaraokeEvent::FetchFailed {
                    resource, error, ..
                } => {
                    if let Some(s) = spinner_bar.take() {
                        s.finish_and_clear();
                    }
                    eprintln!(
                        "  {} Failed to fetch {}: {}",
                        style("✗").red().bold(),
                        resource,
                        truncate_chars(&error, 100)
                    );
                }

                KaraokeEvent::StreamDegraded { reason } => {
                    eprintln!(
                        "  {} Live events unavailable ({}), polling only",
                        style("⚠").yellow(),
                        truncate_chars(&reason, 80)
                    );
                }

                KaraokeEvent::Unmounted { .. } => {
                    if let Some(s) = spinner_bar.take() {
                        s.finish_and_clear();
                    }
                }
            }
        }
    })
}

/// The run has ended and everything the view asked for has arrived.
fn is_settled(view: &RunDetailsView) -> bool {
    let loaded = if view.supports_graph {
        view.steps.is_some()
    } else {
        view.run_log.is_some()
    } || view.last_error.is_some();

    let logs_done = !view.follow_along
        || (view.run_log.as_ref().map_or(true, |l| !l.has_more)
            && view.step_logs.values().all(|l| !l.has_more));

    view.run_state == Some(BuildState::Finished) && loaded && logs_done
}

async fn wait_until_settled(view: &mut watch::Receiver<RunDetailsView>) {
    const GRACE: Duration = Duration::from_millis(500);
    loop {
        if is_settled(&view.borrow_and_update()) {
            tokio::time::sleep(GRACE).await;
            if !view.has_changed().unwrap_or(false) {
                return;
            }
            continue;
        }
        if view.changed().await.is_err() {
            return;
        }
    }
}

async fn cmd_follow(
    config: &ClientConfig,
    run: &RunArgs,
    node: Option<String>,
    tui: bool,
) -> Result<()> {
    let identity = run.identity(config);
    let (tx, rx) = mpsc::unbounded_channel();
    let pipeline = karaoke_core::open_run(config, identity, node, tx)
        .await
        .with_context(|| format!("Failed to open run {} #{}", run.pipeline, run.run))?;

    if tui {
        return karaoke_tui::run_tui(pipeline, rx).await;
    }

    let handle = pipeline.handle();
    let mut view = pipeline.subscribe_view();
    let display = spawn_cli_display(rx);
    let task = tokio::spawn(pipeline.run());

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\n  {} Interrupted", style("⚠").yellow());
        }
        _ = wait_until_settled(&mut view) => {}
    }

    handle.shutdown();
    task.await.context("Run view task failed")?;
    let _ = display.await;

    let status = view.borrow().run_status.clone();
    println!(
        "\n{} {} #{}: {}",
        style("Done!").green().bold(),
        run.pipeline,
        run.run,
        status
    );
    Ok(())
}

/// Log URL and download file name for `karaoke log`.
fn log_location(
    config: &ClientConfig,
    run: &RunArgs,
    node: Option<String>,
    step: Option<String>,
    all: bool,
) -> (String, String) {
    let identity = run.identity(config);
    let url_config = UrlConfig::for_run(&config.app_url_base(), &identity)
        .with_node(node.clone())
        .with_fetch_all(all);
    let run_log = url::run_log_url(&url_config);
    let stem = run_log.file_name.trim_end_matches(".txt");

    match (step, node) {
        (Some(step), _) => (
            url::log_url(&url_config, &LogTarget::Step(step.clone())),
            format!("{stem}-step-{step}.txt"),
        ),
        (None, Some(node)) => (
            url::log_url(&url_config, &LogTarget::Node(node.clone())),
            format!("{stem}-node-{node}.txt"),
        ),
        (None, None) => (run_log.url.clone(), run_log.file_name.clone()),
    }
}

async fn cmd_log(
    config: &ClientConfig,
    run: &RunArgs,
    node: Option<String>,
    step: Option<String>,
    all: bool,
    save: bool,
) -> Result<()> {
    let (log_url, file_name) = log_location(config, run, node, step, all);

    let api = HttpApi::new(config).context("Failed to create HTTP client")?;
    let chunk = api
        .fetch_log(&log_url, None)
        .await
        .with_context(|| format!("Failed to fetch log: {log_url}"))?;

    let lines = chunk.lines();
    for line in &lines {
        println!("{line}");
    }
    if chunk.has_more && !all {
        eprintln!(
            "\n  {} Log is still being written; pass --all for the complete log",
            style("⚠").yellow()
        );
    }

    if save {
        let dir = paths::logs_dir();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let path = dir.join(&file_name);
        let mut contents = lines.join("\n");
        contents.push('\n');
        std::fs::write(&path, contents)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        eprintln!(
            "  {} Saved {} lines to {}",
            style("✓").green().bold(),
            lines.len(),
            path.display()
        );
    }

    Ok(())
}

async fn cmd_nodes(config: &ClientConfig, run: &RunArgs) -> Result<()> {
    let identity = run.identity(config);
    let url_config = UrlConfig::for_run(&config.app_url_base(), &identity);
    let api = HttpApi::new(config).context("Failed to create HTTP client")?;

    let summary = api
        .fetch_run(&url::run_url(&url_config))
        .await
        .with_context(|| format!("Failed to fetch run {} #{}", run.pipeline, run.run))?;
    if !summary.supports_node_graph() {
        println!(
            "{} {} #{} has no stage graph ({})",
            style("ℹ").cyan(),
            run.pipeline,
            run.run,
            summary.display_status()
        );
        return Ok(());
    }

    let nodes = api
        .fetch_nodes(&url::node_base_url(&url_config))
        .await
        .context("Failed to fetch nodes")?;
    let graph = convert_graph(&nodes, summary.is_finished()).context("Malformed stage graph")?;
    let information = NodesInformation::from_nodes(&nodes);

    println!(
        "\n{} {} #{} {}",
        style("Run:").bold().cyan(),
        style(&run.pipeline).bold(),
        run.run,
        style(format!("({})", summary.display_status())).dim()
    );
    println!("{}", style("─".repeat(60)).dim());
    print_graph(&graph, information.focused().map(|n| n.id.as_str()));

    if !information.model.is_empty() {
        println!("\n  {}:", style("Details").bold());
        for node in &information.model {
            let indent = if node.is_parallel { "    " } else { "  " };
            let duration = node
                .duration_in_millis
                .map(format_duration_millis)
                .unwrap_or_else(|| "-".to_string());
            println!(
                "  {indent}{} (id={}, {}{})",
                node.title,
                style(&node.id).cyan(),
                duration,
                if node.has_logs { ", logs" } else { "" }
            );
        }
    }

    Ok(())
}

fn cmd_validate(path: Option<PathBuf>, overrides: &ConfigOverrides) -> Result<()> {
    let path = path.unwrap_or_else(paths::default_config_path);
    let mut config = ClientConfig::from_file(&path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    config.apply_overrides(overrides);

    let validation = validate(&config);

    if validation.is_valid() {
        println!(
            "{} Config is valid: {} (organization={})",
            style("✓").green().bold(),
            config.jenkins_url,
            config.organization
        );
        println!(
            "  karaoke speed: {}ms, request timeout: {}s, events: {}",
            config.karaoke_speed_ms,
            config.request_timeout_secs,
            if config.events.enabled { "on" } else { "off" }
        );
    } else {
        eprintln!("{} Config validation failed:", style("✗").red().bold());
        for err in &validation.errors {
            eprintln!("  {} {err}", style("•").red());
        }
    }

    for warning in &validation.warnings {
        eprintln!("  {} {warning}", style("⚠").yellow());
    }

    if !validation.is_valid() {
        anyhow::bail!("Validation failed");
    }

    Ok(())
}
