#![recursion_limit = "256"]

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use burn::backend::wgpu::WgpuDevice;
use burn::backend::{Autodiff, Wgpu};
use clap::Parser;
use crossterm::event::{self, Event, KeyCode};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;

use selfplay_coach::ai::BurnNetwork;
use selfplay_coach::checkpoint::DirCheckpointStore;
use selfplay_coach::coach::{IterationController, Phase};
use selfplay_coach::config::CoachConfig;
use selfplay_coach::game::ConnectFour;
use selfplay_coach::training::{
    ChannelMetricsSink, CsvMetricsSink, DirShardStore, FanOutMetricsSink, LogMetricsSink,
    TrainingUpdate,
};
use selfplay_coach::ui::training_dashboard::{DashboardState, TrainingStatus};
use selfplay_coach::ui::training_view;

type Backend = Autodiff<Wgpu<f32, i32>>;

/// Train a Connect Four agent with batched self-play and gated updates.
#[derive(Parser)]
#[command(name = "train", about = "Batched self-play training with model gating")]
struct Cli {
    /// Path to TOML configuration file
    #[arg(long, default_value = "coach.toml")]
    config: PathBuf,

    /// Run in headless mode (log output and a progress bar, no TUI dashboard)
    #[arg(long)]
    headless: bool,

    /// Override the last iteration to run
    #[arg(long)]
    iterations: Option<usize>,

    /// Override the number of self-play workers
    #[arg(long)]
    workers: Option<usize>,

    /// Override games per iteration
    #[arg(long)]
    games: Option<usize>,

    /// Ignore existing checkpoints and start at iteration 1
    #[arg(long)]
    fresh: bool,

    /// Print the default configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.print_config {
        print!("{}", CoachConfig::default_toml().context("serializing default config")?);
        return Ok(());
    }

    // The dashboard owns the terminal, so only warnings get through there.
    let default_filter = if cli.headless { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    let mut config = CoachConfig::load_or_default(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;

    // Apply CLI overrides
    if let Some(iterations) = cli.iterations {
        config.run.num_iters = iterations;
    }
    if let Some(workers) = cli.workers {
        config.selfplay.workers = workers;
    }
    if let Some(games) = cli.games {
        config.selfplay.games_per_iteration = games;
    }
    if cli.fresh {
        config.run.load_model = false;
        config.run.start_iter = 1;
    }
    config.reconcile();
    config.validate().context("validating config")?;

    let (update_tx, update_rx) = mpsc::channel::<TrainingUpdate>();
    let stop = Arc::new(AtomicBool::new(false));
    let headless = cli.headless;
    let total_iterations = config.run.num_iters;
    let games = config.selfplay.games_per_iteration;

    let coach_config = config.clone();
    let coach_stop = Arc::clone(&stop);
    let training_handle = thread::Builder::new()
        .name("coach".into())
        .spawn(move || run_coach(coach_config, update_tx, coach_stop, headless))
        .context("spawning training thread")?;

    let ui_result = if headless {
        run_headless(update_rx, games);
        Ok(())
    } else {
        run_dashboard_ui(update_rx, &stop, total_iterations)
    };

    let training_result = training_handle
        .join()
        .map_err(|_| anyhow!("training thread panicked"))?;
    ui_result?;
    training_result
}

/// Build the collaborators and run the controller to completion.
fn run_coach(
    config: CoachConfig,
    updates: mpsc::Sender<TrainingUpdate>,
    stop: Arc<AtomicBool>,
    headless: bool,
) -> Result<()> {
    let device = WgpuDevice::default();
    let mut network = BurnNetwork::<Backend>::for_game::<ConnectFour>(config.training.clone(), device.clone());
    if let Some(seed) = config.run.seed {
        network = network.with_seed(seed);
    }
    let past = BurnNetwork::<Backend>::for_game::<ConnectFour>(config.training.clone(), device);

    let checkpoints = DirCheckpointStore::new(&config.run.checkpoint_dir);
    let shards = DirShardStore::new(&config.run.data_dir)
        .with_context(|| format!("opening data dir {}", config.run.data_dir.display()))?;
    let csv = CsvMetricsSink::create(&config.run.metrics_dir, &config.run.run_name)
        .with_context(|| format!("opening metrics dir {}", config.run.metrics_dir.display()))?;
    info!("writing metrics to {}", csv.path().display());
    let metrics = if headless {
        FanOutMetricsSink::new().with(csv).with(LogMetricsSink)
    } else {
        FanOutMetricsSink::new()
            .with(csv)
            .with(ChannelMetricsSink::new(updates.clone()))
    };

    let mut controller: IterationController<ConnectFour, _> = IterationController::new(
        config,
        network,
        past,
        Box::new(checkpoints),
        Box::new(shards),
        Box::new(metrics),
    )
    .with_updates(updates.clone())
    .with_stop_flag(stop);

    let start = match controller.discover() {
        Ok(start) => start,
        Err(e) => {
            let _ = updates.send(TrainingUpdate::Failed(e.to_string()));
            return Err(e).context("discovering checkpoints");
        }
    };
    info!("starting at iteration {start}");

    let state = controller.learn().context("training loop")?;
    info!(
        "training stopped at iteration {} after {} passes",
        state.current_iter,
        state.attempt - 1
    );
    Ok(())
}

/// Drive a progress bar per self-play phase until the controller is done.
fn run_headless(update_rx: mpsc::Receiver<TrainingUpdate>, games: usize) {
    let style = ProgressStyle::default_bar()
        .template("{msg} {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} games ({per_sec}, eta {eta})")
        .map(|s| s.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    let mut bar: Option<ProgressBar> = None;

    // Ends when the training thread drops its senders.
    for update in update_rx {
        match update {
            TrainingUpdate::Phase {
                phase: Phase::SelfPlay,
                ..
            } => {
                let pb = ProgressBar::new(games as u64);
                pb.set_style(style.clone());
                pb.set_message("Generating samples");
                bar = Some(pb);
            }
            TrainingUpdate::SelfPlayProgress { completed, .. } => {
                if let Some(pb) = &bar {
                    pb.set_position(completed as u64);
                }
            }
            TrainingUpdate::Phase {
                phase: Phase::Persist,
                ..
            } => {
                if let Some(pb) = bar.take() {
                    pb.finish();
                }
            }
            TrainingUpdate::Failed(_) => {
                if let Some(pb) = bar.take() {
                    pb.abandon();
                }
            }
            _ => {}
        }
    }
}

fn run_dashboard_ui(
    update_rx: mpsc::Receiver<TrainingUpdate>,
    stop: &AtomicBool,
    total_iterations: usize,
) -> Result<()> {
    enable_raw_mode().context("enabling raw mode")?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen).context("entering alternate screen")?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("creating terminal")?;

    let mut dashboard = DashboardState::new(total_iterations);
    let frame_duration = Duration::from_millis(100);

    let result = loop {
        while let Ok(update) = update_rx.try_recv() {
            dashboard.apply(update);
        }

        if let Err(e) = terminal.draw(|f| training_view::render(f, &dashboard)) {
            break Err(e).context("drawing dashboard");
        }

        if event::poll(frame_duration).unwrap_or(false) {
            if let Ok(Event::Key(key)) = event::read() {
                if matches!(key.code, KeyCode::Char('q') | KeyCode::Char('Q')) {
                    match dashboard.status {
                        TrainingStatus::Running => {
                            stop.store(true, Ordering::SeqCst);
                            dashboard.request_stop();
                        }
                        // Second press, or training is over: leave.
                        _ => break Ok(()),
                    }
                }
            }
        }
    };

    // Terminal cleanup; use let _ = to avoid double-panic
    let _ = disable_raw_mode();
    let _ = execute!(terminal.backend_mut(), LeaveAlternateScreen);
    let _ = terminal.show_cursor();
    result
}
