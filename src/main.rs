use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::Value;

use rpiradio::config::{self, Config};
use rpiradio::control::{send_request, ControlRequest, ControlResponse};
use rpiradio::logging;

#[derive(Parser)]
#[command(name = "rpiradio", version, about = "Internet radio daemon and remote control")]
struct Cli {
  /// Config file (default: $RPIRADIO_CONFIG or /etc/rpiradio/config.json)
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Run the daemon in the foreground
  Daemon,
  /// Play the current station, or station N (1-based)
  Play { station: Option<u32> },
  /// Stop playback
  Stop,
  /// Next station
  Next,
  /// Previous station
  Prev,
  /// Pause/resume, or start playing if idle
  Toggle,
  /// Show the volume, or set it: N, up or down
  Volume {
    #[arg(allow_hyphen_values = true)]
    value: Option<String>,
  },
  /// List stations
  List,
  /// Show playback status
  Status,
  /// Reload config and playlist
  Reload,
}

impl Command {
  fn request(&self) -> Option<ControlRequest> {
    let request = match self {
      Command::Daemon => return None,
      Command::Play { station: Some(n) } => ControlRequest::new("play").with_arg("station", *n),
      Command::Play { station: None } => ControlRequest::new("play"),
      Command::Stop => ControlRequest::new("stop"),
      Command::Next => ControlRequest::new("next"),
      Command::Prev => ControlRequest::new("prev"),
      Command::Toggle => ControlRequest::new("toggle"),
      Command::Volume { value: Some(v) } => {
        ControlRequest::new("volume").with_arg("value", v.as_str())
      }
      Command::Volume { value: None } => ControlRequest::new("volume"),
      Command::List => ControlRequest::new("list"),
      Command::Status => ControlRequest::new("status"),
      Command::Reload => ControlRequest::new("reload"),
    };
    Some(request)
  }
}

fn main() -> ExitCode {
  let cli = Cli::parse();
  let config_path = cli.config.clone().unwrap_or_else(config::config_path);

  let runtime = match tokio::runtime::Builder::new_current_thread()
    .enable_all()
    .build()
  {
    Ok(runtime) => runtime,
    Err(e) => {
      eprintln!("Error: cannot start runtime: {e}");
      return ExitCode::FAILURE;
    }
  };

  match cli.command.request() {
    None => runtime.block_on(run_daemon(config_path)),
    Some(request) => runtime.block_on(run_client(&config_path, request)),
  }
}

async fn run_daemon(config_path: PathBuf) -> ExitCode {
  logging::init(&Config::default().log_level);
  let config = Config::load(&config_path);
  logging::apply(&config.log_level);

  match rpiradio::run(config, config_path).await {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      log::error!("{}", e);
      ExitCode::FAILURE
    }
  }
}

async fn run_client(config_path: &Path, request: ControlRequest) -> ExitCode {
  logging::init("warn");
  let config = Config::load(config_path);
  let is_list = request.command == "list";

  let response = match send_request(Path::new(&config.ipc_socket_path), &request).await {
    Ok(response) => response,
    Err(e) => {
      eprintln!("Error: {e}");
      return ExitCode::FAILURE;
    }
  };

  print_response(response, is_list)
}

fn print_response(response: ControlResponse, is_list: bool) -> ExitCode {
  let data = match response.into_result() {
    Ok(data) => data,
    Err(message) => {
      eprintln!("Error: {message}");
      return ExitCode::FAILURE;
    }
  };

  match data {
    Some(Value::Array(stations)) if is_list => {
      for (i, station) in stations.iter().enumerate() {
        let name = station.get("name").and_then(Value::as_str).unwrap_or("?");
        let url = station.get("url").and_then(Value::as_str).unwrap_or("");
        println!("{}. {}  [{}]", i + 1, name, url);
      }
    }
    Some(Value::String(s)) => println!("{s}"),
    Some(other) => match serde_json::to_string_pretty(&other) {
      Ok(text) => println!("{text}"),
      Err(_) => println!("{other}"),
    },
    None => println!("ok"),
  }
  ExitCode::SUCCESS
}
