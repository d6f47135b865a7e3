// rp_watch.rs
// Use it like this:
//   rp_watch live --addr host:port --user me --config plant.json --seconds 60
//   rp_watch replay --db-path rp_capture.db watch-1
//   rp_watch systems --addr host:port
// `live` logs in, subscribes to order updates and prints every order notification as a
// JSON line. `replay` prints the frames of a capture session the same way.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use log::{info, warn};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use yarp::{
  client::RithmicClient,
  conn_log::{load_frames, LogDirection},
  decode_record,
  session::SessionConfig,
  templates, Record,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Watch Rithmic order plant traffic", long_about = None)]
struct Args {
  #[clap(subcommand)]
  command: Command,
}

#[derive(Parser, Debug)]
enum Command {
  /// Connect to an order plant and print order notifications.
  Live(LiveArgs),
  /// Print the frames of a previously captured session.
  Replay(ReplayArgs),
  /// List the system names a gateway serves (no login needed).
  Systems(SystemsArgs),
}

#[derive(Parser, Debug)]
struct SystemsArgs {
  #[arg(long)]
  addr: String,
}

#[derive(Parser, Debug)]
struct LiveArgs {
  /// Order plant address (host:port).
  #[arg(long)]
  addr: String,

  /// JSON file with session settings; flags below override it.
  #[arg(long)]
  config: Option<PathBuf>,

  #[arg(long)]
  user: Option<String>,

  /// Falls back to the RITHMIC_PASSWORD environment variable.
  #[arg(long)]
  password: Option<String>,

  #[arg(long)]
  system_name: Option<String>,

  /// Stop after this many seconds; runs until killed when absent.
  #[arg(long)]
  seconds: Option<u64>,

  /// Capture every frame into this SQLite database.
  #[arg(long)]
  db_path: Option<PathBuf>,

  /// Session name for the capture.
  #[arg(long, default_value = "watch")]
  session_name: String,

  /// Write the order book snapshot here on exit.
  #[arg(long)]
  snapshot: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct ReplayArgs {
  /// Capture session to print.
  #[arg()]
  session_name: String,

  #[arg(long, default_value = "rp_capture.db")]
  db_path: PathBuf,

  /// Also print the frames this client sent.
  #[arg(long)]
  include_sent: bool,
}

fn print_record(record: &Record) {
  match serde_json::to_string(record) {
    Ok(line) => println!("{}", line),
    Err(e) => warn!("Cannot print template {}: {}", record.template_id, e),
  }
}

fn session_config(args: &LiveArgs) -> Result<SessionConfig> {
  let mut config = match &args.config {
    Some(path) => {
      let text = std::fs::read_to_string(path).with_context(|| format!("Reading {:?}", path))?;
      serde_json::from_str(&text).with_context(|| format!("Parsing {:?}", path))?
    }
    None => SessionConfig::default(),
  };
  if let Some(user) = &args.user {
    config.user = user.clone();
  }
  if let Some(password) = &args.password {
    config.password = password.clone();
  } else if let Ok(password) = std::env::var("RITHMIC_PASSWORD") {
    config.password = password;
  }
  if let Some(system_name) = &args.system_name {
    config.system_name = system_name.clone();
  }
  if config.user.is_empty() {
    return Err(anyhow!("No user given (--user or the config file)"));
  }
  Ok(config)
}

fn live(args: LiveArgs) -> Result<()> {
  let config = session_config(&args)?;
  info!("Session settings: {:?}", config);
  let log_config = args
    .db_path
    .as_ref()
    .map(|path| (path.to_string_lossy().into_owned(), args.session_name.clone()));

  let client = RithmicClient::new(config, log_config);
  for id in [templates::RITHMIC_ORDER_NOTIFICATION, templates::EXCHANGE_ORDER_NOTIFICATION] {
    client.register_callback(id, print_record);
  }
  let login = client.connect(&args.addr).context("Connecting to the order plant")?;
  info!("Logged in: fcm={:?} ib={:?}", login.fcm_id, login.ib_id);

  let started = Instant::now();
  let session = client.session();
  while session.is_logged_in() {
    if let Some(limit) = args.seconds {
      if started.elapsed() >= Duration::from_secs(limit) {
        break;
      }
    }
    thread::sleep(Duration::from_millis(200));
  }
  if !session.is_logged_in() {
    warn!("Connection lost after {:?}", started.elapsed());
  }

  if let Some(path) = &args.snapshot {
    let text = client.orders().snapshot().to_json()?;
    std::fs::write(path, text).with_context(|| format!("Writing {:?}", path))?;
    info!("Order book written to {:?}", path);
  }
  client.disconnect()?;
  Ok(())
}

fn replay(args: ReplayArgs) -> Result<()> {
  if !args.db_path.exists() {
    return Err(anyhow!("Database path does not exist: {:?}", args.db_path));
  }
  let frames = load_frames(&args.db_path, &args.session_name)?;
  info!("{} frames in session '{}'", frames.len(), args.session_name);
  for frame in frames {
    if frame.direction == LogDirection::Send && !args.include_sent {
      continue;
    }
    match decode_record(&frame.payload) {
      Ok(record) => print_record(&record),
      Err(e) => warn!("{} frame at {:.1}ms: {}", frame.direction, frame.relative_timestamp_ms, e),
    }
  }
  Ok(())
}

fn systems(args: SystemsArgs) -> Result<()> {
  let client = RithmicClient::new(SessionConfig::default(), None);
  let systems = client.list_systems(&args.addr).context("Requesting system info")?;
  for name in systems {
    println!("{}", name);
  }
  Ok(())
}

fn main() -> Result<()> {
  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
  let args = Args::parse();
  match args.command {
    Command::Live(args) => live(args),
    Command::Replay(args) => replay(args),
    Command::Systems(args) => systems(args),
  }
}
