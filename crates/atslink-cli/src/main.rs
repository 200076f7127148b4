//! Command-line front-end for ACE 2 (v6) alarm panels.
//!
//! # Usage
//!
//! ```bash
//! # Panel descriptor
//! atslink --host 192.168.1.50 --encryptionKey $KEY --pin 1234 info
//!
//! # Arm area 1 full, forcing past blocking zones
//! atslink --host 192.168.1.50 --encryptionKey $KEY --pin 1234 arm 1 full --force
//!
//! # Live change events until Ctrl-C
//! atslink --host 192.168.1.50 --encryptionKey $KEY --pin 1234 monitor
//! ```
//!
//! Exit codes: 0 on success, 1 on configuration errors, 2 when the panel
//! or an operation fails.

// The one crate whose job is talking to the terminal
#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::process::ExitCode;

use atslink_client::{
    ArmOutcome, Auth, CancelToken, ChangeEvent, Client, ClientConfig, ControlOutcome, DoorOp,
    EntityKind, SetType, cancel_pair,
};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// ACE 2 (v6) panel client
#[derive(Parser, Debug)]
#[command(name = "atslink")]
#[command(about = "Talk to ACE 2 (v6) alarm panels over TCP/IP")]
#[command(version)]
struct Args {
    /// Panel host name or address
    #[arg(long, env = "ATSLINK_HOST")]
    host: String,

    /// Panel TCP port
    #[arg(long, env = "ATSLINK_PORT", default_value_t = 3001)]
    port: u16,

    /// The panel's 24/36/48-character encryption password
    #[arg(long = "encryptionKey", env = "ATSLINK_ENCRYPTION_KEY")]
    encryption_key: String,

    /// PIN login (standard panels)
    #[arg(long, env = "ATSLINK_PIN")]
    pin: Option<String>,

    /// Account user name (extended family panels)
    #[arg(long, env = "ATSLINK_USERNAME")]
    username: Option<String>,

    /// Account password (extended family panels)
    #[arg(long, env = "ATSLINK_PASSWORD")]
    password: Option<String>,

    /// Log filter (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SetArg {
    Full,
    Part1,
    Part2,
}

impl From<SetArg> for SetType {
    fn from(value: SetArg) -> Self {
        match value {
            SetArg::Full => Self::Full,
            SetArg::Part1 => Self::Part1,
            SetArg::Part2 => Self::Part2,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the panel descriptor
    Info,
    /// Print change events until interrupted
    Monitor,
    /// Arm areas (all valid areas when none is given)
    Arm {
        /// Area number
        area: Option<u16>,
        /// Set variant, full when omitted
        #[arg(value_enum)]
        set_type: Option<SetArg>,
        /// Force past faulted, active or inhibited zones
        #[arg(long)]
        force: bool,
    },
    /// Disarm areas (all valid areas when none is given)
    Disarm {
        /// Area number
        area: Option<u16>,
    },
    /// List zones with their status
    Zones,
    /// List areas with their status
    Areas,
    /// List outputs with their status
    Outputs,
    /// List triggers with their status
    Triggers,
    /// List doors with their status
    Doors,
    /// Inhibit a zone for one arming cycle
    Inhibit { zone: u16 },
    /// Clear a zone inhibit
    Uninhibit { zone: u16 },
    /// Switch an output on
    Activate { output: u16 },
    /// Switch an output off
    Deactivate { output: u16 },
    /// Raise a trigger flag
    TriggerActivate { trigger: u16 },
    /// Clear a trigger flag
    TriggerDeactivate { trigger: u16 },
    /// Lock a door
    DoorLock { door: u16 },
    /// Unlock a door until locked again
    DoorUnlock { door: u16 },
    /// Unlock a door for the panel's standard time
    DoorUnlockStandard { door: u16 },
    /// Unlock a door for a number of seconds
    DoorUnlockTimed { door: u16, seconds: u16 },
    /// Take a door out of service
    DoorDisable { door: u16 },
    /// Put a door back in service
    DoorEnable { door: u16 },
    /// Print the most recent event-log records
    #[command(name = "eventLog")]
    EventLog {
        /// Maximum records to read
        #[arg(default_value_t = 10)]
        count: usize,
    },
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            // Configuration problems exit 1, including usage errors
            let _ = e.print();
            return ExitCode::from(1);
        },
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    let auth = match build_auth(&args) {
        Ok(auth) => auth,
        Err(message) => {
            eprintln!("{message}");
            return ExitCode::from(1);
        },
    };

    let Ok(runtime) = tokio::runtime::Runtime::new() else {
        eprintln!("could not start the async runtime");
        return ExitCode::from(1);
    };

    match runtime.block_on(run(args, auth)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{message}");
            ExitCode::from(2)
        },
    }
}

fn build_auth(args: &Args) -> Result<Auth, String> {
    match (&args.pin, &args.username, &args.password) {
        (Some(pin), None, None) => Ok(Auth::Pin(pin.clone())),
        (None, Some(username), Some(password)) => Ok(Auth::Account {
            username: username.clone(),
            password: password.clone(),
        }),
        (Some(_), Some(_), _) | (Some(_), _, Some(_)) => {
            Err("use either --pin or --username/--password, not both".to_string())
        },
        _ => Err("missing credentials: pass --pin, or --username and --password".to_string()),
    }
}

async fn run(args: Args, auth: Auth) -> Result<(), String> {
    let config = ClientConfig::new(args.host.clone(), args.port, args.encryption_key.clone(), auth);
    let mut client = Client::connect(config).await.map_err(|e| e.to_string())?;

    let result = dispatch(&mut client, args.command).await;
    client.disconnect().await;
    result
}

async fn dispatch(client: &mut Client, command: Command) -> Result<(), String> {
    match command {
        Command::Info => {
            let info = client.panel();
            println!("product:  {}", info.product);
            println!("model:    {}", info.model.as_deref().unwrap_or("unknown"));
            println!("firmware: {}", info.firmware);
            match info.protocol_version {
                Some(v) => println!("protocol: {v}"),
                None => println!("protocol: unknown"),
            }
            match &info.serial_text {
                Some(text) => println!("serial:   {text}"),
                None => println!("serial:   unknown"),
            }
            println!("limits:   {} areas, {} zones", info.max_areas, info.max_zones);
            if let Some(user) = client.user_name() {
                println!("user:     {user}");
            }
            Ok(())
        },
        Command::Monitor => monitor(client).await,
        Command::Arm { area, set_type, force } => {
            let areas = resolve_areas(client, area).await?;
            let set_type = set_type.unwrap_or(SetArg::Full);
            let outcome = client
                .arm(&areas, set_type.into(), force, &CancelToken::none())
                .await
                .map_err(|e| e.to_string())?;
            render_arm_outcome(&areas, &outcome)
        },
        Command::Disarm { area } => {
            let areas = resolve_areas(client, area).await?;
            client.disarm(&areas).await.map_err(|e| e.to_string())?;
            println!("disarmed area(s) {areas:?}");
            Ok(())
        },
        Command::Zones => list(client, EntityKind::Zone).await,
        Command::Areas => list(client, EntityKind::Area).await,
        Command::Outputs => list(client, EntityKind::Output).await,
        Command::Triggers => list(client, EntityKind::Trigger).await,
        Command::Doors => list(client, EntityKind::Door).await,
        Command::Inhibit { zone } => {
            client.inhibit_zone(zone).await.map_err(|e| e.to_string())?;
            println!("zone {zone} inhibited");
            Ok(())
        },
        Command::Uninhibit { zone } => {
            client.uninhibit_zone(zone).await.map_err(|e| e.to_string())?;
            println!("zone {zone} uninhibited");
            Ok(())
        },
        Command::Activate { output } => {
            client.set_output(output, true).await.map_err(|e| e.to_string())?;
            println!("output {output} activated");
            Ok(())
        },
        Command::Deactivate { output } => {
            client.set_output(output, false).await.map_err(|e| e.to_string())?;
            println!("output {output} deactivated");
            Ok(())
        },
        Command::TriggerActivate { trigger } => {
            render_outcome(client.set_trigger(trigger, true).await, "trigger", trigger)
        },
        Command::TriggerDeactivate { trigger } => {
            render_outcome(client.set_trigger(trigger, false).await, "trigger", trigger)
        },
        Command::DoorLock { door } => {
            render_outcome(client.door_operation(door, DoorOp::Lock).await, "door", door)
        },
        Command::DoorUnlock { door } => {
            render_outcome(client.door_operation(door, DoorOp::Unlock).await, "door", door)
        },
        Command::DoorUnlockStandard { door } => render_outcome(
            client.door_operation(door, DoorOp::UnlockStandard).await,
            "door",
            door,
        ),
        Command::DoorUnlockTimed { door, seconds } => render_outcome(
            client.door_operation(door, DoorOp::UnlockTimed(seconds)).await,
            "door",
            door,
        ),
        Command::DoorDisable { door } => {
            render_outcome(client.door_operation(door, DoorOp::Disable).await, "door", door)
        },
        Command::DoorEnable { door } => {
            render_outcome(client.door_operation(door, DoorOp::Enable).await, "door", door)
        },
        Command::EventLog { count } => event_log(client, count).await,
    }
}

async fn resolve_areas(client: &mut Client, area: Option<u16>) -> Result<Vec<u16>, String> {
    if let Some(area) = area {
        return Ok(vec![area]);
    }
    client.load_inventory().await.map_err(|e| e.to_string())?;
    let areas: Vec<u16> = client
        .inventory()
        .valid
        .get(&EntityKind::Area)
        .map(|set| set.iter().copied().collect())
        .unwrap_or_default();
    if areas.is_empty() {
        return Err("the panel reports no valid areas".to_string());
    }
    Ok(areas)
}

fn render_arm_outcome(areas: &[u16], outcome: &ArmOutcome) -> Result<(), String> {
    match outcome {
        ArmOutcome::Armed => {
            println!("armed area(s) {areas:?}");
            Ok(())
        },
        ArmOutcome::Faults(zones) => {
            Err(format!("arming failed: {} faulted zone(s) {zones:?}", zones.len()))
        },
        ArmOutcome::ActiveZones(zones) => {
            Err(format!("arming failed: {} active zone(s) {zones:?}", zones.len()))
        },
        ArmOutcome::InhibitedZones(zones) => {
            Err(format!("arming failed: {} inhibited zone(s) {zones:?}", zones.len()))
        },
        ArmOutcome::ForceFailed { state } => {
            Err(format!("force arm failed, panel stayed in state {state:#06x}"))
        },
        ArmOutcome::TimedOut => Err("arming timed out".to_string()),
    }
}

fn render_outcome(
    result: Result<ControlOutcome, atslink_client::ClientError>,
    kind: &str,
    id: u16,
) -> Result<(), String> {
    match result {
        Ok(ControlOutcome::Done) => {
            println!("{kind} {id}: done");
            Ok(())
        },
        Ok(ControlOutcome::Skipped { reason }) => {
            println!("{kind} {id}: skipped ({reason})");
            Ok(())
        },
        Err(e) => Err(e.to_string()),
    }
}

async fn list(client: &mut Client, kind: EntityKind) -> Result<(), String> {
    client.load_inventory().await.map_err(|e| e.to_string())?;
    let statuses = client.entity_statuses(kind).await.map_err(|e| e.to_string())?;

    if statuses.is_empty() {
        println!("no {}s configured", kind.label());
        return Ok(());
    }
    for status in statuses {
        let name = status.name.clone().unwrap_or_default();
        let flags = status.active_flags();
        let rendered =
            if flags.is_empty() { "-".to_string() } else { flags.join(", ") };
        println!("{:>4}  {:<30}  {rendered}", status.id, name);
    }
    Ok(())
}

async fn monitor(client: &mut Client) -> Result<(), String> {
    client.load_inventory().await.map_err(|e| e.to_string())?;

    let (canceller, token) = cancel_pair();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        canceller.cancel();
    });

    let (events_tx, mut events_rx) = mpsc::channel::<ChangeEvent>(64);
    let printer = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            let label = match &event.name {
                Some(name) => format!("{} ({name})", event.id),
                None => event.id.to_string(),
            };
            println!(
                "{} {label} {} -> {}",
                event.kind.label(),
                render_bytes(event.old.as_deref()),
                render_bytes(Some(&event.new)),
            );
        }
    });

    println!("monitoring; Ctrl-C to stop");
    let result = client.run_monitor(events_tx, &token).await.map_err(|e| e.to_string());
    printer.abort();
    result
}

fn render_bytes(bytes: Option<&[u8]>) -> String {
    match bytes {
        None => "(new)".to_string(),
        Some(bytes) => bytes.iter().map(|b| format!("{b:02x}")).collect(),
    }
}

async fn event_log(client: &mut Client, count: usize) -> Result<(), String> {
    let stream = client.open_event_log(count).await.map_err(|e| e.to_string())?;
    let records =
        stream.collect(&CancelToken::none()).await.map_err(|e| e.to_string())?;

    if records.is_empty() {
        println!("event log is empty");
        return Ok(());
    }
    for record in records {
        let when = record
            .timestamp
            .map_or_else(|| "????-??-?? ??:??:??".to_string(), |ts| ts.to_string());
        println!(
            "{when}  seq {:>3}  event {:#06x} class {}/{}  {} {} area {}  {}",
            record.sequence,
            record.event_id,
            record.class_id,
            record.sub_id,
            record.entity_id,
            render_detail(&record.details),
            record.area,
            record.description,
        );
    }
    Ok(())
}

fn render_detail(details: &[u8; 7]) -> String {
    details.iter().map(|b| format!("{b:02x}")).collect()
}
