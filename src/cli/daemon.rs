use crate::config::Config;
use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

#[cfg(unix)]
use std::os::unix::process::CommandExt;

fn pid_file() -> PathBuf {
    crate::paths::conclave_home().join("conclaved.pid")
}

fn log_file() -> PathBuf {
    crate::paths::conclave_home().join("conclaved.log")
}

fn is_process_running(pid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

async fn is_port_listening(port: u16) -> bool {
    tokio::time::timeout(
        Duration::from_secs(1),
        tokio::net::TcpStream::connect(format!("127.0.0.1:{port}")),
    )
    .await
    .map(|r| r.is_ok())
    .unwrap_or(false)
}

pub async fn start(config: &Config, port_override: Option<u16>, root: Option<PathBuf>) -> Result<()> {
    let port = port_override.unwrap_or(config.server.port);

    if is_port_listening(port).await {
        println!("conclaved already running on port {port}");
        return Ok(());
    }

    let path = pid_file();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let exe = std::env::current_exe().context("failed to get current executable path")?;
    let log = log_file();
    let mut args = vec!["--foreground".to_string(), "--port".to_string(), port.to_string()];
    if let Some(r) = &root {
        args.push("--root".to_string());
        args.push(r.display().to_string());
    }

    let log_out = fs::File::create(&log).context("failed to create daemon log file")?;
    let log_err = log_out.try_clone()?;

    #[allow(unused_mut)]
    let mut command = std::process::Command::new(&exe);
    command
        .args(&args)
        .stdout(log_out)
        .stderr(log_err)
        .stdin(std::process::Stdio::null());
    #[cfg(unix)]
    command.process_group(0);

    let child = command.spawn().context("failed to spawn daemon process")?;
    let pid = child.id();
    fs::write(&path, pid.to_string())?;

    let mut ready = false;
    for _ in 0..30 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if is_port_listening(port).await {
            ready = true;
            break;
        }
    }

    if ready {
        println!("conclaved started on http://127.0.0.1:{port}/healthz (PID {pid})");
    } else {
        println!("conclaved spawned (PID {pid}) but not yet reachable on port {port}");
        println!("check logs at {}", log.display());
    }
    Ok(())
}

pub async fn stop() -> Result<()> {
    let path = pid_file();
    let Some(pid) = fs::read_to_string(&path).ok().and_then(|s| s.trim().parse::<u32>().ok()) else {
        println!("conclaved: no PID file found; may not be running.");
        return Ok(());
    };

    if !is_process_running(pid) {
        println!("conclaved: process {pid} is not running. Cleaning up PID file.");
        let _ = fs::remove_file(&path);
        return Ok(());
    }

    let _ = std::process::Command::new("kill").args(["-TERM", &pid.to_string()]).status();
    tokio::time::sleep(Duration::from_millis(500)).await;

    if is_process_running(pid) {
        let _ = std::process::Command::new("kill").args(["-9", &pid.to_string()]).status();
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    let _ = fs::remove_file(&path);
    println!("conclaved stopped (PID {pid})");
    Ok(())
}

pub async fn status(config: &Config, port_override: Option<u16>) -> Result<()> {
    let port = port_override.unwrap_or(config.server.port);
    let listening = is_port_listening(port).await;
    let pid = fs::read_to_string(pid_file()).ok().and_then(|s| s.trim().parse::<u32>().ok());

    match (listening, pid) {
        (true, Some(pid)) => println!("conclaved: running on port {port} (PID {pid})"),
        (true, None) => println!("conclaved: running on port {port}"),
        (false, Some(pid)) if is_process_running(pid) => {
            println!("conclaved: process alive (PID {pid}) but port {port} not listening")
        }
        (false, Some(_)) => println!("conclaved: not running (stale PID file)"),
        (false, None) => println!("conclaved: not running"),
    }
    Ok(())
}
