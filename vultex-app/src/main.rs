#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::undocumented_unsafe_blocks)]

use std::fs::{self, File};

use clap::Parser;
use tracing_subscriber::{Layer, layer::SubscriberExt, util::SubscriberInitExt};
use vultex::{
    bootstrap::Bootstrap,
    instance::InstanceConfig,
    log::VulkanLogLevel,
};
use winit::{
    application::ApplicationHandler,
    dpi::LogicalSize,
    event::WindowEvent,
    event_loop::ControlFlow,
    window::{Window as WinitWindow, WindowAttributes},
};

const WIDTH: u32 = 800;
const HEIGHT: u32 = 600;

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, clap::ValueEnum)]
enum TracingLogLevel {
    Off,
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl TracingLogLevel {
    fn for_build() -> Self {
        if cfg!(debug_assertions) {
            TracingLogLevel::Trace
        } else {
            TracingLogLevel::Info
        }
    }
}

impl From<TracingLogLevel> for tracing_subscriber::filter::LevelFilter {
    fn from(value: TracingLogLevel) -> Self {
        use tracing_subscriber::filter::LevelFilter;
        match value {
            TracingLogLevel::Off => LevelFilter::OFF,
            TracingLogLevel::Trace => LevelFilter::TRACE,
            TracingLogLevel::Debug => LevelFilter::DEBUG,
            TracingLogLevel::Info => LevelFilter::INFO,
            TracingLogLevel::Warn => LevelFilter::WARN,
            TracingLogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum CliVulkanLogLevel {
    Off,
    Verbose,
    Info,
    Warning,
    Error,
}

impl From<CliVulkanLogLevel> for Option<VulkanLogLevel> {
    fn from(value: CliVulkanLogLevel) -> Self {
        match value {
            CliVulkanLogLevel::Off => None,
            CliVulkanLogLevel::Verbose => Some(VulkanLogLevel::Verbose),
            CliVulkanLogLevel::Info => Some(VulkanLogLevel::Info),
            CliVulkanLogLevel::Warning => Some(VulkanLogLevel::Warning),
            CliVulkanLogLevel::Error => Some(VulkanLogLevel::Error),
        }
    }
}

/// Bring up a window and a Vulkan device, then wait for the window to close.
#[derive(clap::Parser, Debug)]
struct CliArgs {
    /// Defaults to `trace` in debug builds and `info` in release builds.
    #[arg(short, long)]
    tracing_log_level: Option<TracingLogLevel>,
    /// Validation layer verbosity. Defaults to `verbose` in debug builds and
    /// `off` in release builds.
    #[arg(short, long)]
    graphics_debug_level: Option<CliVulkanLogLevel>,
}

impl CliArgs {
    fn instance_config(&self) -> InstanceConfig {
        let mut config = InstanceConfig::default();
        if let Some(level) = self.graphics_debug_level {
            config.diagnostics = level.into();
        }
        config
    }
}

fn init_tracing(level: TracingLogLevel) -> eyre::Result<()> {
    if level == TracingLogLevel::Off {
        return Ok(());
    }

    let app_dirs = directories::ProjectDirs::from("", "vultex", "vultex-app");
    let log_dir = match app_dirs
        .as_ref()
        .and_then(|x| x.runtime_dir().or_else(|| Some(x.data_dir())))
        .map(|p| p.to_owned())
    {
        Some(path) => path,
        None => std::env::current_dir()?,
    };
    fs::create_dir_all(&log_dir)?;

    let mut log_file_path = log_dir;
    log_file_path.push("log-file");
    log_file_path.set_extension("txt");
    let log_file = File::create(&log_file_path)?;
    let file_log = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    let stdout_log = tracing_subscriber::fmt::layer().pretty();

    tracing_subscriber::registry()
        .with(
            stdout_log
                .with_filter(tracing_subscriber::filter::LevelFilter::from(
                    level,
                ))
                .and_then(file_log),
        )
        .init();

    tracing::debug!("log_file_path: {}", log_file_path.display());
    Ok(())
}

fn main() -> eyre::Result<()> {
    let cli_args = CliArgs::parse();
    init_tracing(
        cli_args
            .tracing_log_level
            .unwrap_or_else(TracingLogLevel::for_build),
    )?;
    tracing::debug!("cli_args: {:?}", cli_args);

    let event_loop = winit::event_loop::EventLoop::builder().build()?;

    let mut app = AppRunner {
        state: Some(App::Initializing(InitializingState {
            config: cli_args.instance_config(),
        })),
        failure: None,
    };

    tracing::trace!("Entering main event loop");
    event_loop.run_app(&mut app)?;

    app.into_exit_result()
}

#[derive(Debug)]
struct AppRunner {
    state: Option<App>,
    /// First fatal startup error. Turns into a non-zero exit code.
    failure: Option<eyre::Report>,
}

#[derive(Debug)]
enum App {
    Initializing(InitializingState),
    Running(RunningState),
    Exiting(ExitingState),
}

#[derive(Debug)]
struct InitializingState {
    config: InstanceConfig,
}

#[derive(Debug)]
struct RunningState {
    // Declared before the window so it is dropped first.
    bootstrap: Bootstrap,
    win: WinitWindow,
}

#[derive(Debug)]
struct ExitingState {}

impl ApplicationHandler for AppRunner {
    fn resumed(&mut self, event_loop: &winit::event_loop::ActiveEventLoop) {
        let Some(initializing_state) = self.take_initializing() else {
            return;
        };
        event_loop.set_control_flow(ControlFlow::Wait);

        tracing::info!("Initialize window");
        let win = match event_loop.create_window(
            WindowAttributes::default()
                .with_title("Vultex")
                .with_inner_size(LogicalSize::new(WIDTH, HEIGHT))
                .with_resizable(false),
        ) {
            Ok(w) => w,
            Err(e) => {
                self.fail_initializing(
                    eyre::eyre!("Error while creating window: {e}"),
                    event_loop,
                );
                return;
            }
        };

        let mut bootstrap = match Bootstrap::new(&initializing_state.config, &win)
        {
            Ok(b) => b,
            Err(e) => {
                self.fail_initializing(e.into(), event_loop);
                return;
            }
        };
        if let Err(e) = bootstrap.mark_running() {
            tracing::warn!("{}", e);
        }
        tracing::info!(
            "Bootstrap reached {:?}, device score {}",
            bootstrap.stage(),
            bootstrap.device_score()
        );

        tracing::info!("Start loop");
        tracing::debug!("State transition: Initializing -> Running");
        self.state = Some(App::Running(RunningState { bootstrap, win }));
    }

    fn window_event(
        &mut self,
        event_loop: &winit::event_loop::ActiveEventLoop,
        window_id: winit::window::WindowId,
        window_event: WindowEvent,
    ) {
        let is_running_window = matches!(
            &self.state,
            Some(App::Running(running_state)) if running_state.win.id() == window_id
        );
        if !is_running_window {
            return;
        }

        if matches!(window_event, WindowEvent::CloseRequested) {
            tracing::trace!("Close window request received for window");
            self.exit_from_running(event_loop);
        }
    }
}

impl AppRunner {
    fn take_initializing(&mut self) -> Option<InitializingState> {
        match self.state.take() {
            Some(App::Initializing(s)) => Some(s),
            other => {
                self.state = other;
                None
            }
        }
    }

    fn record_failure(&mut self, report: eyre::Report) {
        tracing::error!("{:#}", report);
        if self.failure.is_none() {
            self.failure = Some(report);
        }
    }

    fn fail_initializing(
        &mut self,
        report: eyre::Report,
        event_loop: &winit::event_loop::ActiveEventLoop,
    ) {
        self.record_failure(report);
        self.transition_to_exiting("Initializing", event_loop);
    }

    fn into_exit_result(self) -> eyre::Result<()> {
        match self.failure {
            Some(report) => Err(report),
            None => Ok(()),
        }
    }

    fn transition_to_exiting(
        &mut self,
        from_state: &'static str,
        event_loop: &winit::event_loop::ActiveEventLoop,
    ) {
        tracing::debug!("State transition: {} -> Exiting", from_state);
        self.state = Some(App::Exiting(ExitingState {}));
        event_loop.exit();
    }

    fn exit_from_running(
        &mut self,
        event_loop: &winit::event_loop::ActiveEventLoop,
    ) {
        match self.state.take() {
            Some(App::Running(RunningState { bootstrap, win })) => {
                tracing::info!("Loop finished");
                bootstrap.teardown();
                drop(win);
                self.transition_to_exiting("Running", event_loop);
            }
            other => {
                tracing::warn!(
                    "Requested Running -> Exiting transition while not in \
                     Running state"
                );
                self.state = other;
                event_loop.exit();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exited_runner() -> AppRunner {
        AppRunner {
            state: Some(App::Exiting(ExitingState {})),
            failure: None,
        }
    }

    #[test]
    fn clean_exit_returns_ok() {
        assert!(exited_runner().into_exit_result().is_ok());
    }

    #[test]
    fn window_creation_failure_exits_with_error() {
        let mut app = exited_runner();
        app.record_failure(eyre::eyre!(
            "Error while creating window: no display"
        ));

        let err = app.into_exit_result().unwrap_err();
        assert_eq!(err.to_string(), "Error while creating window: no display");
    }

    #[test]
    fn first_failure_is_kept() {
        let mut app = exited_runner();
        app.record_failure(
            vultex::bootstrap::BootstrapError::NoDevicesFound.into(),
        );
        app.record_failure(eyre::eyre!("later failure"));

        let err = app.into_exit_result().unwrap_err();
        assert_eq!(err.to_string(), "Failed to find GPUs with Vulkan support");
    }
}
