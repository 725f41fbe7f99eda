//! # Marionette CLI
//!
//! 主从遥操作的操作员入口。
//!
//! ```bash
//! # 生成默认配置
//! marionette-cli config init --path teleop.toml
//!
//! # 无硬件试运行（仿真臂 + 键盘踏板）
//! marionette-cli run --mock
//!
//! # 真实夹爪 + 仿真臂（厂商臂适配器在此接入）
//! marionette-cli run --port /dev/ttyUSB0 --gripper triggered
//!
//! # 夹爪单独调试
//! marionette-cli gripper open --port /dev/ttyUSB0
//! ```
//!
//! 退出码：0 = 正常（含 Ctrl-C 中断），1 = 配置/设备错误，
//! 2 = 同步收敛耗尽。

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info};

#[cfg(unix)]
mod pedal;
mod status;

use marionette_gripper::{DirectGripper, Gripper, TriggeredGripper};
use marionette_modbus::{ModbusClient, SerialConfig, SerialPortTransport};
use marionette_teleop::{
    GrippedArm, GripperVariant, JointVector, MockArm, SessionController, SessionError,
    SyncEngine, SyncError, TeleopConfig,
};
use status::TerminalStatusSink;

/// 同步收敛耗尽的专用退出码
const EXIT_SYNC_EXHAUSTED: u8 = 2;

/// Marionette CLI - 主从遥操作工具
#[derive(Parser, Debug)]
#[command(name = "marionette-cli")]
#[command(about = "Leader-follower teleoperation with pedal-gated engagement", long_about = None)]
#[command(version)]
struct Cli {
    /// 配置文件路径（缺省使用内置默认值）
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// 日志详细程度（-v debug，-vv trace）
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 运行遥操作会话
    Run {
        /// 仿真模式：不连接任何硬件
        #[arg(long)]
        mock: bool,

        /// 夹爪串口（覆盖配置文件）
        #[arg(long)]
        port: Option<String>,

        /// 夹爪变体（覆盖配置文件）
        #[arg(long, value_enum)]
        gripper: Option<GripperArg>,

        /// 不使用夹爪（6 槽位关节向量）
        #[arg(long)]
        no_gripper: bool,

        /// 控制频率（Hz，覆盖配置文件）
        #[arg(long)]
        rate_hz: Option<f64>,

        /// 踏板键（单字符，默认空格）
        #[arg(long, default_value = " ")]
        pedal_key: char,
    },

    /// 配置管理
    #[command(subcommand)]
    Config(ConfigCommand),

    /// 夹爪单独调试
    #[command(subcommand)]
    Gripper(GripperCommand),
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// 写出默认配置文件
    Init {
        #[arg(long, default_value = "teleop.toml")]
        path: PathBuf,
    },
    /// 显示生效配置
    Show,
}

#[derive(Subcommand, Debug)]
enum GripperCommand {
    /// 初始化并张开
    Open(GripperArgs),
    /// 初始化并闭合
    Close(GripperArgs),
    /// 读取当前位置
    Position(GripperArgs),
}

#[derive(clap::Args, Debug)]
struct GripperArgs {
    /// 串口（覆盖配置文件）
    #[arg(long)]
    port: Option<String>,

    /// 夹爪变体（覆盖配置文件）
    #[arg(long, value_enum)]
    gripper: Option<GripperArg>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum GripperArg {
    Direct,
    Triggered,
}

impl From<GripperArg> for GripperVariant {
    fn from(arg: GripperArg) -> Self {
        match arg {
            GripperArg::Direct => GripperVariant::Direct,
            GripperArg::Triggered => GripperVariant::Triggered,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match dispatch(cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        },
    }
}

fn init_tracing(verbose: u8) {
    use tracing_subscriber::EnvFilter;

    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn dispatch(cli: Cli) -> Result<ExitCode> {
    let mut config = match &cli.config {
        Some(path) => TeleopConfig::load_from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => TeleopConfig::default(),
    };

    match cli.command {
        Commands::Run {
            mock,
            port,
            gripper,
            no_gripper,
            rate_hz,
            pedal_key,
        } => {
            if let Some(port) = port {
                config.serial.port = port;
            }
            if let Some(variant) = gripper {
                config.gripper.variant = variant.into();
            }
            if no_gripper {
                config.gripper.enabled = false;
            }
            if let Some(rate) = rate_hz {
                config.control.rate_hz = rate;
            }
            run_session(&config, mock, pedal_key)
        },
        Commands::Config(ConfigCommand::Init { path }) => {
            TeleopConfig::default().save_to_file(&path)?;
            println!("Wrote default config to {}", path.display());
            Ok(ExitCode::SUCCESS)
        },
        Commands::Config(ConfigCommand::Show) => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(ExitCode::SUCCESS)
        },
        Commands::Gripper(cmd) => run_gripper_command(&config, cmd),
    }
}

/// 打开串口并构造配置的夹爪变体
fn open_gripper(config: &TeleopConfig) -> Result<Box<dyn Gripper>> {
    let serial = SerialConfig {
        port: config.serial.port.clone(),
        baud_rate: config.serial.baud_rate,
        timeout: std::time::Duration::from_millis(config.serial.timeout_ms),
    };
    let transport = SerialPortTransport::open(&serial)
        .with_context(|| format!("failed to open gripper port {}", serial.port))?;
    let client = ModbusClient::new(transport, config.serial.device_addr);

    let gripper: Box<dyn Gripper> = match config.gripper.variant {
        GripperVariant::Direct => Box::new(DirectGripper::new(client)),
        GripperVariant::Triggered => Box::new(TriggeredGripper::new(client)),
    };
    gripper.initialize().context("gripper initialization failed")?;
    gripper.set_force(config.gripper.default_force)?;
    gripper.set_speed(config.gripper.default_speed)?;
    Ok(gripper)
}

fn run_gripper_command(config: &TeleopConfig, cmd: GripperCommand) -> Result<ExitCode> {
    let (args, action): (&GripperArgs, &str) = match &cmd {
        GripperCommand::Open(args) => (args, "open"),
        GripperCommand::Close(args) => (args, "close"),
        GripperCommand::Position(args) => (args, "position"),
    };

    let mut config = config.clone();
    if let Some(port) = &args.port {
        config.serial.port = port.clone();
    }
    if let Some(variant) = args.gripper {
        config.gripper.variant = variant.into();
    }

    let gripper = open_gripper(&config)?;
    match action {
        "open" => {
            gripper.move_to_blocking(config.gripper.open_position)?;
            println!("Gripper opened");
        },
        "close" => {
            gripper.move_to_blocking(0.0)?;
            println!("Gripper closed");
        },
        _ => {
            let position = gripper.read_position()?;
            println!("Gripper position: {:.3}", position);
        },
    }
    Ok(ExitCode::SUCCESS)
}

fn run_session(config: &TeleopConfig, mock: bool, pedal_key: char) -> Result<ExitCode> {
    // === 关停标志：Ctrl-C 置位，tick 循环与接近门循环内检查 ===
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::Release);
        })
        .context("failed to install Ctrl-C handler")?;
    }

    let arm_dof = 6;
    let total_dof = if config.gripper.enabled {
        arm_dof + 1
    } else {
        arm_dof
    };

    // === 拖动臂：厂商适配器边界 ===
    // 真实拖动臂驱动在此接入；当前提供仿真臂用于带夹爪的链路试运行。
    let leader = MockArm::frozen(JointVector::zeros(total_dof));

    // === 随动臂 ===
    let follower: Box<dyn marionette_teleop::ArmInterface> = if mock || !config.gripper.enabled {
        Box::new(MockArm::responsive(JointVector::zeros(total_dof)))
    } else {
        let gripper = open_gripper(config)?;
        Box::new(GrippedArm::new(
            MockArm::responsive(JointVector::zeros(arm_dof)),
            gripper,
            config.gripper.open_position,
        ))
    };

    // === 踏板 ===
    #[cfg(unix)]
    let pedal = pedal::KeyboardPedal::spawn(pedal_key as u8, shutdown.clone())
        .context("failed to set up keyboard pedal")?;
    #[cfg(not(unix))]
    let pedal: marionette_teleop::ScriptedPedal = {
        let _ = pedal_key;
        anyhow::bail!("keyboard pedal requires a unix terminal")
    };

    info!("Starting teleoperation with the pedal on key {:?}", pedal_key);
    println!("Step 1: double press the pedal to calibrate");
    println!("Step 2: press and hold the pedal to teleoperate");
    println!("Step 3: release the pedal to pause; idle for 5 s to invalidate calibration");

    let mut session = SessionController::new(
        leader,
        follower,
        pedal,
        TerminalStatusSink,
        config.pedal_config(),
        SyncEngine::new(config.sync_config()),
        config.loop_config(),
    );

    match session.run(shutdown) {
        Ok(outcome) => {
            info!("Session ended: {:?}", outcome);
            Ok(ExitCode::SUCCESS)
        },
        Err(SessionError::Sync(SyncError::Exhausted { attempts })) => {
            error!(
                "Could not synchronize leader and follower after {} attempts",
                attempts
            );
            Ok(ExitCode::from(EXIT_SYNC_EXHAUSTED))
        },
        Err(e) => Err(e.into()),
    }
}
