use clap::{App, Arg};
use heatcoil::config::{Backend, InterlockConfig};
use heatcoil::protocol::{self, Reply, Request};
use heatcoil::sysfs::SysfsLines;
use heatcoil::{Channel, CoilController, ControlSurface, SimulatedLines};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let matches = App::new("heatcoild")
        .version("0.1.0")
        .about("Heating coil interlock daemon")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("JSON configuration file")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("listen")
                .short("l")
                .long("listen")
                .value_name("ADDR")
                .help("Address to serve the control channels on")
                .takes_value(true),
        )
        .get_matches();

    let mut config = match matches.value_of("config") {
        Some(path) => InterlockConfig::load(path)?,
        None => InterlockConfig::default(),
    };
    if let Some(addr) = matches.value_of("listen") {
        config.listen_addr = addr.to_string();
    }

    let controller = match &config.backend {
        Backend::Simulated => {
            warn!("using simulated coil and sensor");
            CoilController::start(config.clone(), SimulatedLines::with_map(config.pins))?
        }
        Backend::Sysfs { root } => CoilController::start(config.clone(), SysfsLines::new(root))?,
    };

    let listener = match TcpListener::bind(&config.listen_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %config.listen_addr, error = %e, "failed to bind");
            controller.shutdown().await?;
            return Err(e.into());
        }
    };
    info!(addr = %config.listen_addr, "serving heatcoil.temp and heatcoil.status");

    let server = tokio::spawn(serve(listener, controller.surface()));

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");

    // Aborting the server drops every client task, releasing their channels.
    server.abort();
    let _ = server.await;

    let report = controller.shutdown().await?;
    info!(cycles = report.cycles, trips = report.trips, "heatcoild stopped");
    Ok(())
}

async fn serve(listener: TcpListener, surface: ControlSurface) {
    let mut clients = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    info!(%addr, "client connected");
                    let surface = surface.clone();
                    clients.spawn(async move {
                        if let Err(e) = handle_client(stream, surface).await {
                            warn!(%addr, error = %e, "client error");
                        }
                        info!(%addr, "client disconnected");
                    });
                }
                Err(e) => error!(error = %e, "failed to accept connection"),
            },
            Some(_) = clients.join_next(), if !clients.is_empty() => {}
        }
    }
}

async fn handle_client(stream: TcpStream, surface: ControlSurface) -> Result<(), BoxError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    let Some(first) = lines.next_line().await? else {
        return Ok(());
    };
    let channel = match first.parse::<Channel>() {
        Ok(channel) => channel,
        Err(e) => {
            writer.write_all(Reply::Fault(e.to_string()).encode().as_bytes()).await?;
            return Ok(());
        }
    };

    let handle = surface.open(channel);
    writer.write_all(Reply::Opened(channel).encode().as_bytes()).await?;

    while let Some(line) = lines.next_line().await? {
        let reply = match Request::parse(&line) {
            Ok(Some(request)) => protocol::execute(&handle, request),
            Ok(None) => continue,
            Err(e) => Reply::Fault(e.to_string()),
        };
        writer.write_all(reply.encode().as_bytes()).await?;
    }

    handle.release()?;
    Ok(())
}
