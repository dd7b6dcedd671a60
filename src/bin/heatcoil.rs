use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use colored::*;
use heatcoil::protocol::{Reply, Request};
use heatcoil::{Channel, TemperatureReading};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::{self, Instant};

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: &str = "7878";

type BoxError = Box<dyn std::error::Error>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let matches = App::new("heatcoil")
        .version("0.1.0")
        .about("🔥 Heating coil interlock client")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("host")
                .short("H")
                .long("host")
                .value_name("HOST")
                .help("Daemon host address")
                .takes_value(true)
                .default_value(DEFAULT_HOST)
                .global(true),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Daemon port")
                .takes_value(true)
                .default_value(DEFAULT_PORT)
                .global(true),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Output format")
                .takes_value(true)
                .possible_values(&["json", "table", "compact"])
                .default_value("table")
                .global(true),
        )
        .subcommand(SubCommand::with_name("temp").about("🌡️  Read the coil temperature"))
        .subcommand(SubCommand::with_name("status").about("📊 Read the heater state"))
        .subcommand(
            SubCommand::with_name("heat")
                .about("🔥 Turn the coil on and supervise it")
                .long_about(
                    "Turns the coil on and keeps the status channel open while printing the \
                     temperature. The coil turns off when the duration ends, on Ctrl-C, or if \
                     this client goes away.",
                )
                .arg(
                    Arg::with_name("duration")
                        .short("d")
                        .long("duration")
                        .value_name("SECONDS")
                        .help("How long to keep the coil on")
                        .takes_value(true)
                        .default_value("10")
                        .validator(|v| v.parse::<u64>().map(|_| ()).map_err(|_| "duration must be whole seconds".into())),
                ),
        )
        .subcommand(SubCommand::with_name("off").about("❄️  Turn the coil off"))
        .subcommand(
            SubCommand::with_name("monitor")
                .about("📈 Print the coil temperature periodically")
                .arg(
                    Arg::with_name("duration")
                        .short("d")
                        .long("duration")
                        .value_name("SECONDS")
                        .help("Monitor duration in seconds (default: until Ctrl-C)")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("refresh")
                        .short("r")
                        .long("refresh")
                        .value_name("MS")
                        .help("Refresh interval in milliseconds")
                        .takes_value(true)
                        .default_value("1000"),
                ),
        )
        .get_matches();

    let target = Target {
        host: matches.value_of("host").unwrap_or(DEFAULT_HOST).to_string(),
        port: matches.value_of("port").unwrap_or(DEFAULT_PORT).parse()?,
        format: Format::from_arg(matches.value_of("format")),
    };

    match matches.subcommand() {
        ("temp", _) => handle_temp(&target).await?,
        ("status", _) => handle_status(&target).await?,
        ("heat", Some(sub)) => handle_heat(&target, sub).await?,
        ("off", _) => handle_off(&target).await?,
        ("monitor", Some(sub)) => handle_monitor(&target, sub).await?,
        _ => println!("{}", "No command specified. Use --help for usage information.".yellow()),
    }

    Ok(())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Format {
    Json,
    Table,
    Compact,
}

impl Format {
    fn from_arg(value: Option<&str>) -> Self {
        match value {
            Some("json") => Format::Json,
            Some("compact") => Format::Compact,
            _ => Format::Table,
        }
    }
}

struct Target {
    host: String,
    port: u16,
    format: Format,
}

/// One open channel on the daemon.
struct Session {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Session {
    async fn open(target: &Target, channel: Channel) -> Result<Self, BoxError> {
        let stream = TcpStream::connect((target.host.as_str(), target.port)).await?;
        let (reader, mut writer) = stream.into_split();
        writer.write_all(format!("{}\n", channel.device_name()).as_bytes()).await?;

        let mut session = Self {
            lines: BufReader::new(reader).lines(),
            writer,
        };
        match session.next_reply().await? {
            Reply::Opened(opened) if opened == channel => Ok(session),
            Reply::Fault(message) => Err(message.into()),
            other => Err(format!("unexpected reply {other:?}").into()),
        }
    }

    async fn request(&mut self, request: Request<'_>) -> Result<Reply, BoxError> {
        self.writer.write_all(request.encode().as_bytes()).await?;
        self.next_reply().await
    }

    async fn read(&mut self) -> Result<String, BoxError> {
        match self.request(Request::Read).await? {
            Reply::Data(data) => Ok(data),
            Reply::Fault(message) => Err(message.into()),
            other => Err(format!("unexpected reply {other:?}").into()),
        }
    }

    async fn next_reply(&mut self) -> Result<Reply, BoxError> {
        let line = self
            .lines
            .next_line()
            .await?
            .ok_or("daemon closed the connection")?;
        Ok(Reply::parse(&line)?)
    }
}

async fn read_temperature(session: &mut Session) -> Result<TemperatureReading, BoxError> {
    let ticks: u16 = session.read().await?.parse()?;
    Ok(TemperatureReading::from_ticks(ticks))
}

async fn read_heater_on(session: &mut Session) -> Result<bool, BoxError> {
    Ok(session.read().await? == "1")
}

fn print_temperature(reading: TemperatureReading, format: Format) {
    match format {
        Format::Json => println!(
            "{}",
            serde_json::json!({
                "ticks": reading.ticks(),
                "celsius": reading.celsius(),
                "fahrenheit": reading.fahrenheit(),
            })
        ),
        Format::Compact => println!("{}", reading.ticks()),
        Format::Table => {
            println!("{} {}", "🌡️".bright_red(), "Coil Temperature".bright_blue().bold());
            println!("  {:<12} {}", "Ticks:".bright_white(), reading.ticks());
            println!("  {:<12} {:.2} °C", "Celsius:".bright_white(), reading.celsius());
            println!("  {:<12} {:.2} °F", "Fahrenheit:".bright_white(), reading.fahrenheit());
        }
    }
}

fn print_heater(on: bool, format: Format) {
    match format {
        Format::Json => println!("{}", serde_json::json!({ "heater_on": on })),
        Format::Compact => println!("{}", u8::from(on)),
        Format::Table => {
            let state = if on { "ON".bright_red().bold() } else { "OFF".bright_green().bold() };
            println!("{} {} {}", "📊".bright_blue(), "Heater:".bright_white(), state);
        }
    }
}

async fn handle_temp(target: &Target) -> Result<(), BoxError> {
    let mut session = Session::open(target, Channel::Temperature).await?;
    let reading = read_temperature(&mut session).await?;
    print_temperature(reading, target.format);
    Ok(())
}

async fn handle_status(target: &Target) -> Result<(), BoxError> {
    // Closing the status channel turns the coil off.
    let mut session = Session::open(target, Channel::Status).await?;
    let on = read_heater_on(&mut session).await?;
    print_heater(on, target.format);
    Ok(())
}

async fn handle_off(target: &Target) -> Result<(), BoxError> {
    let mut session = Session::open(target, Channel::Status).await?;
    session.request(Request::Write("0")).await?;
    print_heater(read_heater_on(&mut session).await?, target.format);
    Ok(())
}

async fn handle_heat(target: &Target, matches: &ArgMatches<'_>) -> Result<(), BoxError> {
    let duration = Duration::from_secs(matches.value_of("duration").unwrap_or("10").parse()?);

    let mut status = Session::open(target, Channel::Status).await?;
    let mut temp = Session::open(target, Channel::Temperature).await?;

    match status.request(Request::Write("1")).await? {
        Reply::Refused { ticks, soft_limit } => {
            let reading = TemperatureReading::from_ticks(ticks);
            println!(
                "{} {} ({:.1} °C > {:.1} °C)",
                "❌".red(),
                "Coil too hot to turn on".bright_red(),
                reading.celsius(),
                TemperatureReading::from_ticks(soft_limit).celsius()
            );
            return Ok(());
        }
        Reply::Fault(message) => return Err(message.into()),
        _ => println!("{} {}", "🔥".bright_red(), "Coil on".bright_red().bold()),
    }

    let deadline = Instant::now() + duration;
    let mut interval = time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                println!("{}", "Interrupted".yellow());
                break;
            }
        }

        let reading = read_temperature(&mut temp).await?;
        let on = read_heater_on(&mut status).await?;
        print_line(reading, Some(on), target.format);

        if !on {
            println!("{} {}", "⚠️".yellow(), "Interlock turned the coil off".bright_yellow());
            break;
        }
        if Instant::now() >= deadline {
            break;
        }
    }

    status.request(Request::Write("0")).await?;
    println!("{} {}", "❄️".bright_cyan(), "Coil off".bright_green());
    Ok(())
}

async fn handle_monitor(target: &Target, matches: &ArgMatches<'_>) -> Result<(), BoxError> {
    let refresh = Duration::from_millis(matches.value_of("refresh").unwrap_or("1000").parse()?);
    let deadline = match matches.value_of("duration") {
        Some(secs) => Some(Instant::now() + Duration::from_secs(secs.parse()?)),
        None => None,
    };

    let mut temp = Session::open(target, Channel::Temperature).await?;
    let mut interval = time::interval(refresh);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => break,
        }

        let reading = read_temperature(&mut temp).await?;
        print_line(reading, None, target.format);

        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
    }
    Ok(())
}

/// `on` is `None` when the heater state was not sampled.
fn print_line(reading: TemperatureReading, on: Option<bool>, format: Format) {
    match format {
        Format::Json => println!(
            "{}",
            serde_json::json!({ "ticks": reading.ticks(), "celsius": reading.celsius(), "heater_on": on })
        ),
        Format::Compact => match on {
            Some(on) => println!("{} {}", reading.ticks(), u8::from(on)),
            None => println!("{}", reading.ticks()),
        },
        Format::Table => {
            let state = match on {
                Some(true) => "ON ".bright_red(),
                Some(false) => "OFF".bright_green(),
                None => "".normal(),
            };
            println!(
                "  {:>5} ticks  {:>7.2} °C  {:>7.2} °F  {}",
                reading.ticks(),
                reading.celsius(),
                reading.fahrenheit(),
                state
            );
        }
    }
}
