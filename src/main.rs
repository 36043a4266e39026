use std::sync::Arc;

use anyhow::Context;
use shared::control::{Action, Command};
use structopt::StructOpt;
use tokio::{net::TcpListener, sync::{broadcast, mpsc}};
use tokio_util::sync::CancellationToken;

mod camera;
mod config;
mod drive;
mod network;
mod vehicle;

/// Frames queued per video client before it starts skipping
const FRAME_QUEUE_LEN: usize = 2;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    /* initialize the logger */
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("rover=info")).init();
    let options = config::Options::from_args();

    /* bind first so that nothing is driven if the ports are taken */
    let control_listener = TcpListener::bind(options.control_address()).await
        .with_context(|| format!("Could not bind control port {}", options.control_address()))?;
    let video_listener = TcpListener::bind(options.video_address()).await
        .with_context(|| format!("Could not bind video port {}", options.video_address()))?;

    /* hardware */
    let board = options.board().context("Could not initialize the board")?;
    let driver = drive::Driver::new(board, options.turn_policy);
    let camera = camera::Camera::new(options.camera_source()?, options.camera_settings());
    log::info!("Using {:?} board, {:?} turns and camera {}", options.board, driver.policy(), camera.name());
    log::debug!("Pin assignment {:?}, motor PWM at {} Hz", options.pins(), options.motor_frequency);

    /* the vehicle task owns the driver and the camera lifecycle */
    let (frames_tx, _) = broadcast::channel(FRAME_QUEUE_LEN);
    let (vehicle_tx, vehicle_rx) = mpsc::unbounded_channel();
    let vehicle_task = tokio::spawn(vehicle::new(
        vehicle_rx, driver, Arc::new(camera), frames_tx.clone(), options.vehicle_settings()));
    let vehicle = vehicle::Handle::new(vehicle_tx);
    if options.camera_autostart {
        let response = vehicle.execute(Command::new(Action::StartCamera)).await?;
        if !response.is_ok() {
            log::warn!("Camera did not start: {}", response.message);
        }
    }

    /* servers */
    let shutdown = CancellationToken::new();
    let control_task = tokio::spawn(network::control::serve(
        control_listener, vehicle.clone(), options.idle_timeout(), shutdown.clone()));
    let video_task = tokio::spawn(network::video::serve(
        video_listener, frames_tx, options.send_timeout(), shutdown.clone()));

    if let Err(error) = shutdown_signal().await {
        log::error!("Could not listen for shutdown signals: {}", error);
    }
    log::info!("Shutting down");
    shutdown.cancel();
    let (control_result, video_result) = tokio::join!(control_task, video_task);
    for (server, result) in [("Control", control_result), ("Video", video_result)] {
        match result {
            Ok(Ok(_)) => {},
            Ok(Err(error)) => log::error!("{} server failed: {}", server, error),
            Err(error) => log::error!("Joining {} server failed: {}", server.to_lowercase(), error),
        }
    }
    /* dropping the last handle stops the vehicle, which releases the outputs */
    drop(vehicle);
    vehicle_task.await.context("Joining vehicle task failed")?;
    Ok(())
}

async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = terminate.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await
}
