use std::{path::PathBuf, time::Duration};

use anyhow::Context;
use futures::StreamExt;
use rover_client::{Control, Video};
use shared::control::{Action, Command, Response};
use structopt::StructOpt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::LinesStream;

#[derive(Debug, StructOpt)]
#[structopt(name = "rover-client", about = "Drives a rover and watches its camera")]
struct Options {
    #[structopt(long, default_value = "127.0.0.1")]
    host: String,
    #[structopt(long, default_value = "5000")]
    control_port: u16,
    #[structopt(long, default_value = "5001")]
    video_port: u16,
    #[structopt(subcommand)]
    mode: Mode,
}

#[derive(Debug, StructOpt)]
enum Mode {
    /// Sends one command and prints the response
    Send {
        action: String,
        value: Option<f64>,
    },
    /// Reads commands from standard input, one per line
    Drive {
        /// Interval of the heartbeat sent while no command is typed
        #[structopt(long, default_value = "1000")]
        heartbeat_ms: u64,
    },
    /// Receives the video stream
    Watch {
        /// Stop after this many frames
        #[structopt(long)]
        frames: Option<usize>,
        /// Where to save the most recent frame on exit
        #[structopt(long, parse(from_os_str))]
        snapshot: Option<PathBuf>,
        /// Send start_camera before watching
        #[structopt(long)]
        start_camera: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    /* initialize the logger */
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("rover_client=info")).init();
    let options = Options::from_args();
    let control_addr = (options.host.as_str(), options.control_port);
    let video_addr = (options.host.as_str(), options.video_port);
    match options.mode {
        Mode::Send { action, value } => {
            let mut control = Control::connect(control_addr).await
                .with_context(|| format!("Could not connect to {}:{}", options.host, options.control_port))?;
            let response = control.send(Command { action, value }).await?;
            print(&response);
        },
        Mode::Drive { heartbeat_ms } => {
            let mut control = Control::connect(control_addr).await
                .with_context(|| format!("Could not connect to {}:{}", options.host, options.control_port))?;
            drive(&mut control, Duration::from_millis(heartbeat_ms)).await?;
        },
        Mode::Watch { frames, snapshot, start_camera } => {
            if start_camera {
                let mut control = Control::connect(control_addr).await
                    .with_context(|| format!("Could not connect to {}:{}", options.host, options.control_port))?;
                print(&control.send(Command::new(Action::StartCamera)).await?);
            }
            let mut video = Video::connect(video_addr).await
                .with_context(|| format!("Could not connect to {}:{}", options.host, options.video_port))?;
            let watched = video.watch(frames, tokio::signal::ctrl_c()).await?;
            log::info!("Received {} frames", watched.received);
            if let (Some(path), Some(frame)) = (snapshot, watched.last) {
                tokio::fs::write(&path, &frame).await
                    .with_context(|| format!("Could not write {}", path.display()))?;
                log::info!("Saved snapshot to {}", path.display());
            }
        },
    }
    Ok(())
}

fn print(response: &Response) {
    println!("{:?}: {} (speed {}, horizontal {}, vertical {})",
        response.status, response.message,
        response.current_speed, response.current_h_angle, response.current_v_angle);
}

async fn drive(control: &mut Control, heartbeat: Duration) -> anyhow::Result<()> {
    let mut lines = LinesStream::new(BufReader::new(tokio::io::stdin()).lines());
    let mut heartbeat = tokio::time::interval(heartbeat);
    log::info!("Commands: w/s/a/d/q, 1-9 for the speed or <action> [value], exit to quit");
    loop {
        tokio::select! {
            line = lines.next() => {
                let line = match line {
                    Some(line) => line?,
                    None => break,
                };
                match line.trim() {
                    "" => continue,
                    "exit" => break,
                    line => match rover_client::parse_command(line) {
                        Ok(command) => {
                            print(&control.send(command).await?);
                            heartbeat.reset();
                        },
                        Err(error) => log::warn!("{}", error),
                    }
                }
            },
            _ = heartbeat.tick() => {
                let response = control.send(Command::new(Action::Ping)).await?;
                log::debug!("Heartbeat: {}", response.message);
            }
        }
    }
    /* never leave the rover driving */
    print(&control.send(Command::new(Action::Stop)).await?);
    Ok(())
}
