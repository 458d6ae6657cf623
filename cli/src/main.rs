use std::fs::File;
use std::io::{self, Read};
use std::rc::Rc;

use clap::{Args, Parser, Subcommand};
use futures::future::join_all;
use pixi_panel::channel::SharedChannel;
use pixi_panel::codec;
use pixi_panel::config::{ConfigError, DEFAULT_BOARD_URL, DEFAULT_CONFIG_GROUP, Timeouts};
use pixi_panel::device::{self, BoardInfo};
use pixi_panel::pwm::{self, PwmStep};
use pixi_panel::widgets::{self, LcdPanel, Sequencer, lcd_panel::LcdPanelConfig};
use pixi_panel::{ChannelError, ConfigStore, Host, HttpChannel, LoadReport, Page, PanelConfig, StoreError, WidgetContext};
use serde_json::Value;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("command failed: {0}")]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("invalid config document: {0}")]
    Document(#[from] codec::CodecError),
    #[error("failed to read input: {0}")]
    Io(#[from] io::Error),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "pixi-panel", about = "PiXi board control panel CLI")]
struct Cli {
    /// Board base URL.
    #[arg(long, env = "PIXI_URL", default_value = DEFAULT_BOARD_URL)]
    url: String,

    /// Camera URL prefix; derived from the board host when unset.
    #[arg(long, env = "PIXI_CAMERA_URL")]
    camera_url: Option<String>,

    /// Store group for saved configs.
    #[arg(long, env = "PIXI_CONFIG_GROUP", default_value = DEFAULT_CONFIG_GROUP)]
    group: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Library, board and FPGA versions.
    Info,
    /// Commands the board understands.
    Commands,
    /// GPIO state table.
    Gpio {
        /// Show the Linux sysfs view instead of the PiXi controllers.
        #[arg(long)]
        sys: bool,
    },
    /// Put text on the LCD panel.
    Lcd { text: String },
    Pwm(PwmCommand),
    /// Widget types that can appear in a config.
    Widgets,
    Config(ConfigCommand),
    /// Load a saved config and fire every sequencer in it.
    Sequence { name: String },
}

#[derive(Args, Debug)]
struct PwmCommand {
    #[command(subcommand)]
    command: PwmSubcommand,
}

#[derive(Subcommand, Debug)]
enum PwmSubcommand {
    /// Set one PWM unit's duty cycle.
    Set { pwm: i64, percent: f64 },
    /// Fire a timed run. Without steps every unit fires at 100%, one second apart.
    Sequence {
        #[arg(long = "step", value_name = "PWM=PERCENT[@MS]")]
        steps: Vec<PwmStep>,
    },
}

#[derive(Args, Debug)]
struct ConfigCommand {
    #[command(subcommand)]
    command: ConfigSubcommand,
}

#[derive(Subcommand, Debug)]
enum ConfigSubcommand {
    List,
    /// Rebuild a saved config and print its widgets.
    Show { name: String },
    /// Store a config document read from a file.
    Save {
        name: String,
        #[arg(long, default_value = "-", help = "Input file path, or - for stdin")]
        input: String,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = resolve_config(&cli)?;
    debug!(base_url = %config.base_url, group = %config.group, "panel config");
    let channel: SharedChannel = Rc::new(HttpChannel::new(&config.base_url, config.timeouts)?);
    let ctx = WidgetContext::new(channel.clone(), config.camera_url.clone());

    match cli.command {
        Command::Info => run_info(&channel).await,
        Command::Commands => run_commands(&channel).await,
        Command::Gpio { sys } => run_gpio(&channel, sys).await,
        Command::Lcd { text } => run_lcd(&ctx, text).await,
        Command::Pwm(pwm_cmd) => run_pwm(&channel, pwm_cmd).await,
        Command::Widgets => {
            for name in widgets::builtin().names() {
                println!("{name}");
            }
            Ok(())
        }
        Command::Config(config_cmd) => run_config(&ctx, &config.group, config_cmd).await,
        Command::Sequence { name } => run_sequence(&ctx, &config.group, &name).await,
    }
}

fn resolve_config(cli: &Cli) -> Result<PanelConfig, CliError> {
    let mut config = PanelConfig::for_url(&cli.url)?;
    if let Some(camera_url) = &cli.camera_url {
        config.camera_url.clone_from(camera_url);
    }
    config.group.clone_from(&cli.group);
    config.timeouts = Timeouts::from_env();
    Ok(config)
}

async fn run_info(channel: &SharedChannel) -> Result<(), CliError> {
    let info = BoardInfo::fetch(channel.as_ref()).await;
    println!("library version:  {}", info.lib_version);
    println!("board revision:   {}", info.board_revision);
    println!("board version:    {}", info.board_version);
    println!("FPGA build time:  {}", info.fpga_build_time);
    Ok(())
}

async fn run_commands(channel: &SharedChannel) -> Result<(), CliError> {
    for command in device::fetch_commands(channel.as_ref()).await? {
        match command.description {
            Some(description) => println!("{:<28} {description}", command.method),
            None => println!("{}", command.method),
        }
    }
    Ok(())
}

async fn run_gpio(channel: &SharedChannel, sys: bool) -> Result<(), CliError> {
    let table = if sys {
        serde_json::to_value(device::fetch_sys_gpio_states(channel.as_ref()).await?)?
    } else {
        serde_json::to_value(device::fetch_gpio_states(channel.as_ref()).await?)?
    };
    print_json(&table)
}

async fn run_lcd(ctx: &WidgetContext, text: String) -> Result<(), CliError> {
    let panel = LcdPanel::new(ctx, LcdPanelConfig::default());
    panel.set_text(text).await;
    let status = panel.status();
    if status.is_empty() {
        println!("ok");
    } else {
        println!("error: {status}");
    }
    Ok(())
}

async fn run_pwm(channel: &SharedChannel, command: PwmCommand) -> Result<(), CliError> {
    match command.command {
        PwmSubcommand::Set { pwm, percent } => {
            pwm::set_percent(channel.as_ref(), pwm, percent).await?;
            println!("pwm {pwm} set to {percent}%");
        }
        PwmSubcommand::Sequence { steps } => {
            let steps = if steps.is_empty() { pwm::default_bank() } else { steps };
            for outcome in pwm::run_sequence(channel.clone(), steps).await {
                let mark = if outcome.ok { "ok" } else { "error" };
                println!("{:<16} {mark}: {}", outcome.step.to_string(), outcome.status);
            }
        }
    }
    Ok(())
}

async fn run_config(ctx: &WidgetContext, group: &str, config: ConfigCommand) -> Result<(), CliError> {
    let store = ConfigStore::new(ctx.channel.clone());
    match config.command {
        ConfigSubcommand::List => {
            for name in store.list(group).await? {
                println!("{name}");
            }
            Ok(())
        }
        ConfigSubcommand::Show { name } => {
            let mut host = Host::new(widgets::builtin(), ctx.clone(), Page::new());
            let report = store.load_into(&mut host, group, &name).await?;
            print_report(&report);
            println!("{}", host.surface().render());
            Ok(())
        }
        ConfigSubcommand::Save { name, input } => {
            let text = read_input(&input)?;
            let nodes = codec::decode_document(&text)?;
            store.save(group, &name, &nodes).await?;
            println!("saved {} widget(s) to {group}/{name}", nodes.len());
            Ok(())
        }
    }
}

async fn run_sequence(ctx: &WidgetContext, group: &str, name: &str) -> Result<(), CliError> {
    let store = ConfigStore::new(ctx.channel.clone());
    let mut host = Host::new(widgets::builtin(), ctx.clone(), Page::new());
    let report = store.load_into(&mut host, group, name).await?;
    print_report(&report);

    let runs: Vec<_> = host
        .widgets_of::<Sequencer>()
        .into_iter()
        .map(|(_, sequencer)| sequencer.fire_all())
        .collect();
    if runs.is_empty() {
        println!("no sequencer in {group}/{name}");
        return Ok(());
    }
    join_all(runs).await;

    println!("{}", host.surface().render());
    Ok(())
}

fn print_report(report: &LoadReport) {
    for skipped in &report.skipped {
        eprintln!("skipped #{} ({}): {}", skipped.index, skipped.class, skipped.reason);
    }
}

fn read_input(path: &str) -> Result<String, CliError> {
    let mut text = String::new();
    if path == "-" {
        io::stdin().read_to_string(&mut text)?;
    } else {
        File::open(path)?.read_to_string(&mut text)?;
    }
    Ok(text)
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
