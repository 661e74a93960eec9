use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use dlmode_core::pit::PitTable;
use dlmode_core::session::{DeviceSession, FlashStep, PitSource, SessionConfig, SessionError};
use dlmode_core::settings::Setting;
use dlmode_core::transport::{DeviceSelector, NusbConnector};
use dlmode_core::{TracingObserver, resolve};
use tracing::{error, info, warn};

type UsbSession = DeviceSession<NusbConnector, TracingObserver>;

#[derive(Parser, Debug)]
#[command(author, version, about = "Samsung Download Mode flash tool (Pure Rust)", long_about = None)]
struct Args {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// USB vendor id of the device, hex
    #[arg(long, global = true, value_parser = parse_hex_u16, requires = "pid")]
    vid: Option<u16>,

    /// USB product id of the device, hex
    #[arg(long, global = true, value_parser = parse_hex_u16, requires = "vid")]
    pid: Option<u16>,

    /// Seconds to keep polling for a device
    #[arg(long, global = true)]
    wait: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Look for a device in Download Mode
    Detect,
    /// Inspect partition tables
    Pit {
        #[command(subcommand)]
        command: PitCommand,
    },
    /// Show which partition an image would be written to
    Resolve {
        image: String,
        /// PIT file to resolve against
        #[arg(long)]
        pit: Option<PathBuf>,
    },
    /// Flash one image
    Flash {
        image: PathBuf,
        /// PIT file to verify against (downloaded from the device otherwise)
        #[arg(long)]
        pit: Option<PathBuf>,
        /// Skip loading a PIT
        #[arg(long, conflicts_with = "pit")]
        no_pit: bool,
    },
    /// Reboot the device
    Reboot,
    /// Show or change persisted settings
    Settings {
        /// Setting to change (auto_reboot, verify_on_flash, safe_mode)
        name: Option<String>,
        value: Option<bool>,
    },
}

#[derive(Subcommand, Debug)]
enum PitCommand {
    /// Print a PIT from a file or the device
    Show {
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Parse and validate a PIT file
    Check { file: PathBuf },
    /// Download the device PIT into a file
    Dump { output: PathBuf },
}

fn parse_hex_u16(s: &str) -> Result<u16, String> {
    u16::from_str_radix(s.trim_start_matches("0x").trim_start_matches("0X"), 16).map_err(|e| e.to_string())
}

fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "dlmode").map(|dirs| dirs.config_dir().join("config.toml"))
}

fn load_config(args: &Args) -> Result<(SessionConfig, Option<PathBuf>)> {
    let path = args.config.clone().or_else(default_config_path);
    let mut config = match &path {
        Some(p) if p.exists() => SessionConfig::load_from_file(p).with_context(|| format!("loading {}", p.display()))?,
        _ => SessionConfig::default(),
    };
    if let (Some(vid), Some(pid)) = (args.vid, args.pid) {
        config.device = DeviceSelector::Ids { vid, pid };
    }
    if let Some(wait) = args.wait {
        config.detect_wait_secs = wait;
    }
    Ok((config, path))
}

fn save_config(config: &SessionConfig, path: Option<&Path>) -> Result<()> {
    let path = path.ok_or_else(|| anyhow!("no config directory; pass --config"))?;
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    config.save_to_file(path)?;
    info!(path = %path.display(), "Settings saved");
    Ok(())
}

fn connect(config: SessionConfig) -> Result<UsbSession, SessionError> {
    let mut session = DeviceSession::new(NusbConnector, config);
    let (vid, pid) = session.detect()?;
    println!("Device {vid:04X}:{pid:04X} in Download Mode");
    Ok(session)
}

fn run_flash(session: &mut UsbSession, image: &Path) -> Result<(), SessionError> {
    let cancel = session.cancel_token();
    if let Err(e) = ctrlc::set_handler(move || cancel.cancel()) {
        warn!(error = %e, "Ctrl-C handler not installed");
    }

    let target = session.begin_flash(image)?;
    println!("Flashing {} -> {}", image.display(), target);
    loop {
        match session.step_flash()? {
            FlashStep::Progress(progress) => println!("  {progress}"),
            FlashStep::Complete(summary) => {
                println!("Flashed {} bytes to {}", summary.bytes, summary.partition);
                if summary.rebooted {
                    println!("Device rebooting");
                }
                if let Some(reason) = &summary.reboot_error {
                    warn!("Image written, but the device did not reboot: {reason}");
                }
                return Ok(());
            }
        }
    }
}

fn run(args: Args) -> Result<()> {
    let (config, config_path) = load_config(&args)?;

    match args.command {
        Command::Detect => {
            connect(config)?;
        }
        Command::Pit { command } => match command {
            PitCommand::Show { file: Some(file) } => {
                print!("{}", PitTable::read_from_file(file)?);
            }
            PitCommand::Show { file: None } => {
                let mut session = connect(config)?;
                print!("{}", session.load_pit(PitSource::Device)?);
            }
            PitCommand::Check { file } => {
                let table = PitTable::read_from_file(&file)?;
                table.validate()?;
                println!("{}: {} partitions, valid", file.display(), table.entry_count());
            }
            PitCommand::Dump { output } => {
                let mut session = connect(config)?;
                let table = session.load_pit(PitSource::Device)?;
                table.write_to_file(&output)?;
                println!("Wrote {} bytes to {}", table.serialized_size(), output.display());
            }
        },
        Command::Resolve { image, pit } => {
            let table = pit.map(PitTable::read_from_file).transpose()?;
            match resolve(&image, table.as_ref()) {
                Some(resolution) => println!("{image} -> {resolution}"),
                None => return Err(anyhow!("cannot determine partition for '{image}'")),
            }
        }
        Command::Flash { image, pit, no_pit } => {
            let mut session = connect(config)?;
            match (pit, no_pit) {
                (_, true) => {}
                (Some(file), false) => {
                    session.load_pit(PitSource::File(file))?;
                }
                (None, false) => {
                    session.load_pit(PitSource::Device)?;
                }
            }
            run_flash(&mut session, &image)?;
        }
        Command::Reboot => {
            let mut session = connect(config)?;
            session.reboot()?;
            println!("Device rebooting");
        }
        Command::Settings { name, value } => {
            let mut session = DeviceSession::new(NusbConnector, config);
            if let Some(name) = name {
                let setting: Setting = name.parse().map_err(|e: String| anyhow!(e))?;
                session.enter_settings()?;
                match value {
                    Some(value) => session.settings_mut()?.set(setting, value),
                    None => println!("{setting} = {}", session.settings().get(setting)),
                }
                session.leave_settings()?;
                if value.is_some() {
                    save_config(session.config(), config_path.as_deref())?;
                }
            }
            print!("{}", session.settings());
        }
    }
    Ok(())
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = run(args) {
        match e.downcast_ref::<SessionError>() {
            Some(session_error) => error!("{}", session_error.status_message()),
            None => error!("Error: {:#}", e),
        }
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_ids() {
        assert_eq!(parse_hex_u16("04E8"), Ok(0x04E8));
        assert_eq!(parse_hex_u16("0x685d"), Ok(0x685D));
        assert!(parse_hex_u16("zz").is_err());
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from(["dlmode", "flash", "recovery.img", "--no-pit", "-v"]).unwrap();
        assert!(args.verbose);
        assert!(matches!(args.command, Command::Flash { no_pit: true, .. }));

        let args = Args::try_parse_from(["dlmode", "--vid", "04e8", "--pid", "6601", "detect"]).unwrap();
        assert_eq!((args.vid, args.pid), (Some(0x04E8), Some(0x6601)));
        assert!(Args::try_parse_from(["dlmode", "--vid", "04e8", "detect"]).is_err());
    }

    #[test]
    fn test_cli_overrides_config() {
        let dir = std::env::temp_dir().join(format!("dlmode-cli-test-{}", std::process::id()));
        let path = dir.join("config.toml");
        let args = Args::try_parse_from([
            "dlmode",
            "--config",
            path.to_str().unwrap(),
            "--vid",
            "1234",
            "--pid",
            "5678",
            "--wait",
            "3",
            "detect",
        ])
        .unwrap();
        let (config, config_path) = load_config(&args).unwrap();
        assert_eq!(config_path, Some(path));
        assert_eq!(config.detect_wait_secs, 3);
        assert_eq!(
            config.device,
            DeviceSelector::Ids {
                vid: 0x1234,
                pid: 0x5678
            }
        );
    }
}
