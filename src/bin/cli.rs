// Classroom sync CLI
// Checks a running server and joins rooms as instructor or student from the terminal

use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::io::{self, BufRead, Write};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use classroom_sync::classroom::{AnnotationData, AnnotationDraft, AnnotationKind, ClientMessage, Role, ServerMessage};
use classroom_sync::client::{ClassroomClient, ClientEvent, ClientSession, ConnectionState, ReconnectPolicy};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Parser)]
#[command(name = "classroom-cli")]
#[command(about = "Classroom sync server CLI", long_about = None)]
struct Cli {
    /// Server address (default: 127.0.0.1:8080)
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check server health endpoint
    Health,

    /// List running rooms
    Rooms,

    /// Show one room's state
    Room {
        room_id: String,
    },

    /// Create a room bound to a material
    CreateRoom {
        /// Material ID from the catalog
        #[arg(short, long)]
        material_id: String,

        /// Room ID (a random 6-digit id when omitted)
        #[arg(short, long)]
        room_id: Option<String>,
    },

    /// Join a room and drive it from the terminal
    Join {
        #[arg(short, long)]
        room_id: String,

        #[arg(long, value_enum, default_value_t = CliRole::Student)]
        role: CliRole,

        /// Display name (optional)
        #[arg(short, long)]
        name: Option<String>,

        /// Material to bind if the join creates the room
        #[arg(short, long)]
        material_id: Option<String>,
    },

    /// Run validation scenarios against the server
    Validate {
        /// Material ID used for the scenario rooms
        #[arg(short, long)]
        material_id: String,

        /// Run all validation scenarios
        #[arg(short, long)]
        all: bool,

        /// Run one scenario
        #[arg(short, long)]
        scenario: Option<String>,
    },

    /// Interactive mode - send raw JSON frames
    Interactive,
}

#[derive(Clone, Copy, ValueEnum)]
enum CliRole {
    Instructor,
    Student,
}

impl From<CliRole> for Role {
    fn from(role: CliRole) -> Self {
        match role {
            CliRole::Instructor => Role::Instructor,
            CliRole::Student => Role::Student,
        }
    }
}

const SCENARIOS: &[(&str, &str)] = &[
    ("connection", "Basic WebSocket connection test"),
    ("late-join", "Late joiner receives the current state"),
    ("authority", "Student commands are rejected"),
    ("laser-expiry", "Laser annotations expire after 3 seconds"),
    ("unknown-material", "Room creation with an unknown material fails"),
];

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Health => {
            check_health(&cli.server).await;
        }
        Commands::Rooms => {
            list_rooms(&cli.server).await;
        }
        Commands::Room { room_id } => {
            show_room(&cli.server, room_id).await;
        }
        Commands::CreateRoom { material_id, room_id } => {
            create_room(&cli.server, material_id, room_id.as_deref()).await;
        }
        Commands::Join {
            room_id,
            role,
            name,
            material_id,
        } => {
            join_room(&cli.server, room_id, (*role).into(), name.clone(), material_id.clone()).await;
        }
        Commands::Validate { material_id, all, scenario } => {
            if *all {
                run_all_validations(&cli.server, material_id).await;
            } else if let Some(s) = scenario {
                run_scenario(&cli.server, material_id, s).await;
            } else {
                println!("{}", "Use --all or --scenario <name>".yellow());
                list_scenarios();
            }
        }
        Commands::Interactive => {
            interactive_mode(&cli.server).await;
        }
    }
}

async fn check_health(server: &str) {
    println!("{}", "Checking server health...".cyan());

    let url = format!("http://{}/health", server);
    match reqwest::get(&url).await {
        Ok(resp) if resp.status().is_success() => {
            println!("{} Health check passed", "✓".green());
            if let Ok(body) = resp.json::<Value>().await {
                println!("  Status: {}", body["status"].as_str().unwrap_or("unknown"));
                println!("  Service: {}", body["service"].as_str().unwrap_or("unknown"));
                println!("  Version: {}", body["version"].as_str().unwrap_or("unknown"));
                println!("  Rooms: {}", body["rooms"]);
            }
        }
        Ok(resp) => {
            println!("{} Health check failed with status: {}", "✗".red(), resp.status());
        }
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
        }
    }
}

async fn list_rooms(server: &str) {
    let url = format!("http://{}/api/rooms", server);
    match reqwest::get(&url).await.and_then(|r| r.error_for_status()) {
        Ok(resp) => {
            let body: Value = match resp.json().await {
                Ok(body) => body,
                Err(e) => {
                    println!("{} Invalid response: {}", "✗".red(), e);
                    return;
                }
            };
            let rooms = body["rooms"].as_array().cloned().unwrap_or_default();
            if rooms.is_empty() {
                println!("No rooms running");
                return;
            }
            println!("{}", format!("{} room(s)", rooms.len()).bold());
            for room in rooms {
                print_room_summary(&room);
            }
        }
        Err(e) => {
            println!("{} Request failed: {}", "✗".red(), e);
        }
    }
}

async fn show_room(server: &str, room_id: &str) {
    let url = format!("http://{}/api/rooms/{}", server, room_id);
    match reqwest::get(&url).await {
        Ok(resp) if resp.status().is_success() => match resp.json::<Value>().await {
            Ok(room) => {
                print_room_summary(&room);
                match serde_json::to_string_pretty(&room) {
                    Ok(pretty) => println!("{}", pretty.bright_black()),
                    Err(e) => println!("{} {}", "✗".red(), e),
                }
            }
            Err(e) => println!("{} Invalid response: {}", "✗".red(), e),
        },
        Ok(resp) => {
            println!("{} Room {} not available ({})", "✗".red(), room_id, resp.status());
        }
        Err(e) => {
            println!("{} Request failed: {}", "✗".red(), e);
        }
    }
}

fn print_room_summary(room: &Value) {
    println!(
        "  {} material={} page={}/{} sync={} instructor={} participants={} annotations={}",
        room["roomId"].as_str().unwrap_or("?").cyan(),
        room["materialId"].as_str().unwrap_or("?"),
        room["currentPage"],
        room["totalPages"],
        room["syncEnabled"],
        room["instructorId"].as_str().unwrap_or("-"),
        room["participants"].as_array().map_or(0, Vec::len),
        room["annotations"].as_array().map_or(0, Vec::len),
    );
}

async fn create_room(server: &str, material_id: &str, room_id: Option<&str>) {
    println!("{}", "Creating room...".cyan());

    let url = format!("http://{}/api/rooms", server);
    let body = json!({ "materialId": material_id, "roomId": room_id });

    match reqwest::Client::new().post(&url).json(&body).send().await {
        Ok(resp) => {
            let status = resp.status();
            let body = resp.json::<Value>().await.unwrap_or(Value::Null);
            if status.is_success() {
                println!("{} Room created", "✓".green());
                println!("  Room ID: {}", body["roomId"].as_str().unwrap_or("?"));
                println!("  Material: {}", body["materialId"].as_str().unwrap_or("?"));
                println!("  Pages: {}", body["totalPages"]);
            } else {
                println!("{} {}: {}", "✗".red(), status, body["error"].as_str().unwrap_or("unknown error"));
            }
        }
        Err(e) => {
            println!("{} Request failed: {}", "✗".red(), e);
        }
    }
}

async fn join_room(server: &str, room_id: &str, role: Role, name: Option<String>, material_id: Option<String>) {
    println!("{}", "Joining room...".cyan());
    println!("  Room ID: {}", room_id);
    println!("  Role: {:?}", role);

    let mut session = ClientSession::new(room_id, role);
    if let Some(name) = name {
        session = session.with_name(name);
    }
    if let Some(material_id) = material_id {
        session = session.with_material(material_id);
    }

    let url = format!("ws://{}/ws", server);
    let mut client = ClassroomClient::connect(url, session, ReconnectPolicy::default());

    // stdin is blocking; read it on its own thread
    let (line_tx, mut lines) = mpsc::unbounded_channel::<String>();
    std::thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if line_tx.send(line).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    println!("Type {} for commands, {} to leave\n", "help".cyan(), "quit".cyan());
    let mut current_page = 1;

    loop {
        tokio::select! {
            event = client.next_event() => match event {
                Some(ClientEvent::State(state)) => print_state(state),
                Some(ClientEvent::Message(message)) => {
                    if let ServerMessage::RoomState(snapshot) = &message {
                        current_page = snapshot.current_page;
                    }
                    if let ServerMessage::PageChanged { page_number, .. } = &message {
                        current_page = *page_number;
                    }
                    print_event(&message);
                }
                Some(ClientEvent::Rejected { kind, message }) => {
                    println!("{} Join refused ({:?}): {}", "✗".red(), kind, message);
                }
                Some(ClientEvent::GaveUp) | None => {
                    println!("{} Connection lost, giving up", "✗".red());
                    break;
                }
            },
            line = lines.recv() => {
                let Some(line) = line else { break };
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }
                if input == "quit" || input == "exit" {
                    break;
                }
                if input == "help" {
                    print_join_help(role);
                    continue;
                }
                match parse_command(input, role, current_page, room_id) {
                    Ok(command) => {
                        if let Err(e) = client.send(command) {
                            println!("{} {}", "✗".yellow(), e);
                        }
                    }
                    Err(e) => println!("{} {}", "✗".yellow(), e),
                }
            }
        }
    }

    client.close().await;
    println!("Goodbye!");
}

fn print_state(state: ConnectionState) {
    match state {
        ConnectionState::Connecting => println!("{} Connecting...", "…".yellow()),
        ConnectionState::Joined => println!("{} Joined", "✓".green()),
        ConnectionState::Disconnected => println!("{} Disconnected", "✗".red()),
    }
}

fn print_event(message: &ServerMessage) {
    match message {
        ServerMessage::RoomState(snapshot) => {
            println!(
                "{} room {} page {}/{} sync={} annotations={} participants={}",
                "◀ state".green(),
                snapshot.room_id.cyan(),
                snapshot.current_page,
                snapshot.total_pages,
                snapshot.sync_enabled,
                snapshot.annotations.len(),
                snapshot.participants.len()
            );
            if let Some(point) = &snapshot.important_point {
                println!("  {} {}", "important:".bold(), point.title);
            }
        }
        ServerMessage::RoomError { kind, message } => {
            println!("{} {:?}: {}", "◀ error".red(), kind, message);
        }
        ServerMessage::ImportantShow(point) => {
            println!("{} {}", "◀ important".magenta().bold(), point.title.bold());
            for item in &point.points {
                println!("    • {}", item);
            }
        }
        other => match serde_json::to_string(other) {
            Ok(text) => println!("{} {}", "◀".green(), text.bright_white()),
            Err(_) => println!("{} {}", "◀".green(), other.event_name()),
        },
    }
}

fn parse_command(input: &str, role: Role, current_page: u32, room_id: &str) -> Result<ClientMessage, String> {
    let mut parts = input.split_whitespace();
    let command = parts.next().unwrap_or_default();
    let args: Vec<&str> = parts.collect();

    let number = |index: usize, what: &str| -> Result<f64, String> {
        args.get(index)
            .ok_or_else(|| format!("missing {what}"))?
            .parse::<f64>()
            .map_err(|_| format!("{what} must be a number"))
    };
    let page = |index: usize| -> Result<u32, String> {
        match args.get(index) {
            Some(raw) => raw.parse().map_err(|_| "page must be a positive number".to_string()),
            None => Ok(current_page),
        }
    };

    let message = match command {
        "page" | "p" => {
            let page_number: u32 = args
                .first()
                .ok_or("usage: page <number>")?
                .parse()
                .map_err(|_| "page must be a positive number")?;
            match role {
                Role::Instructor => ClientMessage::PageChange { page_number },
                Role::Student => ClientMessage::UpdatePage { page_number },
            }
        }
        "next" => ClientMessage::PageChange { page_number: current_page + 1 },
        "prev" => ClientMessage::PageChange { page_number: current_page.saturating_sub(1).max(1) },
        "sync" => match args.first().copied() {
            Some("on") => ClientMessage::SyncToggle { enabled: true },
            Some("off") => ClientMessage::SyncToggle { enabled: false },
            _ => return Err("usage: sync on|off".into()),
        },
        "laser" => ClientMessage::AnnotationAdd(AnnotationDraft {
            page_number: current_page,
            kind: AnnotationKind::Laser,
            data: AnnotationData::Laser {
                x: number(0, "x")?,
                y: number(1, "y")?,
                timestamp: chrono::Utc::now().timestamp_millis(),
            },
            color: "#ff0000".to_string(),
            temporary: None,
        }),
        "pin" => ClientMessage::AnnotationAdd(AnnotationDraft {
            page_number: current_page,
            kind: AnnotationKind::Pin,
            data: AnnotationData::Pin {
                x: number(0, "x")?,
                y: number(1, "y")?,
                label: (args.len() > 2).then(|| args[2..].join(" ")),
                size: None,
            },
            color: "#ff9800".to_string(),
            temporary: None,
        }),
        "circle" => ClientMessage::AnnotationAdd(AnnotationDraft {
            page_number: current_page,
            kind: AnnotationKind::Circle,
            data: AnnotationData::Circle {
                cx: number(0, "cx")?,
                cy: number(1, "cy")?,
                radius: number(2, "radius")?,
                stroke_width: 2.0,
                fill: None,
            },
            color: "#2196f3".to_string(),
            temporary: None,
        }),
        "remove" => ClientMessage::AnnotationRemove {
            id: args.first().ok_or("usage: remove <annotation id>")?.to_string(),
        },
        "clear" => ClientMessage::AnnotationClear {
            page_number: if args.is_empty() { None } else { Some(page(0)?) },
        },
        "important" => {
            // important Title | point one | point two
            let text = args.join(" ");
            let mut pieces = text.split('|').map(str::trim);
            let title = pieces.next().filter(|t| !t.is_empty()).ok_or("usage: important <title> | <point> | ...")?;
            ClientMessage::ImportantDisplay {
                title: title.to_string(),
                points: pieces.filter(|p| !p.is_empty()).map(str::to_string).collect(),
            }
        }
        "dismiss" => ClientMessage::ImportantDismiss,
        "state" => ClientMessage::RequestState { room_id: room_id.to_string() },
        "leave" => ClientMessage::Leave { room_id: room_id.to_string() },
        other => return Err(format!("unknown command '{other}', type 'help'")),
    };
    Ok(message)
}

fn print_join_help(role: Role) {
    println!("\n{}", "Room Commands".bold());
    println!("{}", "─".repeat(60));
    println!("  {}                 request a fresh room state", "state".cyan());
    println!("  {}                 leave the room", "leave".cyan());
    match role {
        Role::Instructor => {
            println!("  {}          change the room page", "page <n>".cyan());
            println!("  {}            move one page", "next / prev".cyan());
            println!("  {}          follow mode for students", "sync on|off".cyan());
            println!("  {}          laser pointer (expires after 3s)", "laser <x> <y>".cyan());
            println!("  {}  persistent pin", "pin <x> <y> [label]".cyan());
            println!("  {}    circle outline", "circle <cx> <cy> <r>".cyan());
            println!("  {}           remove an annotation", "remove <id>".cyan());
            println!("  {}          clear all or one page", "clear [page]".cyan());
            println!("  {}  show an important point", "important <title> | <point> | ...".cyan());
            println!("  {}               hide the important point", "dismiss".cyan());
        }
        Role::Student => {
            println!("  {}          report your page while sync is off", "page <n>".cyan());
        }
    }
    println!("\n{}: quit, exit", "Commands".bold());
    println!();
}

fn list_scenarios() {
    println!("\n{}", "Available Validation Scenarios:".bold());
    for (name, description) in SCENARIOS {
        println!("  {} - {}", name.cyan(), description);
    }
    println!("\nExample: classroom-cli validate --material-id rebar-1 --scenario late-join");
}

async fn run_scenario(server: &str, material_id: &str, scenario: &str) {
    println!("\n{} {}", "Running scenario:".bold(), scenario.cyan());
    println!("{}", "─".repeat(60));

    let result = match scenario {
        "connection" => validate_connection(server).await,
        "late-join" => validate_late_join(server, material_id).await,
        "authority" => validate_authority(server, material_id).await,
        "laser-expiry" => validate_laser_expiry(server, material_id).await,
        "unknown-material" => validate_unknown_material(server).await,
        _ => {
            println!("{} Unknown scenario: {}", "✗".red(), scenario);
            list_scenarios();
            return;
        }
    };

    match result {
        Ok(()) => println!("\n{} Scenario passed", "✓".green().bold()),
        Err(e) => println!("\n{} Scenario failed: {}", "✗".red().bold(), e),
    }
}

async fn run_all_validations(server: &str, material_id: &str) {
    println!("\n{}", "Running All Validation Tests".bold().green());
    println!("{}\n", "═".repeat(60).green());

    let mut passed = 0;
    for (name, description) in SCENARIOS {
        println!("{} {}", "▶".cyan(), description);
        let result = match *name {
            "connection" => validate_connection(server).await,
            "late-join" => validate_late_join(server, material_id).await,
            "authority" => validate_authority(server, material_id).await,
            "laser-expiry" => validate_laser_expiry(server, material_id).await,
            _ => validate_unknown_material(server).await,
        };
        match result {
            Ok(()) => {
                passed += 1;
                println!("{} {}\n", "✓".green(), name);
            }
            Err(e) => println!("{} {}: {}\n", "✗".red(), name, e),
        }
    }

    println!("{}", "═".repeat(60));
    let summary = format!("{}/{} scenarios passed", passed, SCENARIOS.len());
    if passed == SCENARIOS.len() {
        println!("{}", summary.green().bold());
    } else {
        println!("{}", summary.red().bold());
    }
}

fn scenario_room() -> String {
    format!("cli-{}", rand::random::<u32>())
}

async fn connect(server: &str) -> Result<Socket, String> {
    let url = format!("ws://{}/ws", server);
    connect_async(&url)
        .await
        .map(|(socket, _)| socket)
        .map_err(|e| format!("connection failed: {e}"))
}

async fn send_event(socket: &mut Socket, frame: Value) -> Result<(), String> {
    socket
        .send(Message::Text(frame.to_string()))
        .await
        .map_err(|e| format!("send failed: {e}"))
}

/// Reads frames until `event` arrives, skipping everything else.
async fn wait_for_event(socket: &mut Socket, event: &str, within: Duration) -> Result<Value, String> {
    let deadline = Instant::now() + within;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match timeout(remaining, socket.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                let frame: Value = serde_json::from_str(&text).map_err(|e| e.to_string())?;
                if frame["event"] == event {
                    return Ok(frame["data"].clone());
                }
            }
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(e))) => return Err(e.to_string()),
            Ok(None) => return Err("connection closed".to_string()),
            Err(_) => return Err(format!("timed out waiting for {event}")),
        }
    }
}

async fn join_as(server: &str, room_id: &str, role: &str, material_id: &str) -> Result<(Socket, Value), String> {
    let mut socket = connect(server).await?;
    send_event(
        &mut socket,
        json!({"event": "room:join", "data": {"roomId": room_id, "role": role, "materialId": material_id}}),
    )
    .await?;
    let state = wait_for_event(&mut socket, "room:state", Duration::from_secs(3)).await?;
    Ok((socket, state))
}

async fn validate_connection(server: &str) -> Result<(), String> {
    let socket = connect(server).await?;
    println!("{} WebSocket connection successful", "✓".green());
    drop(socket);
    Ok(())
}

async fn validate_late_join(server: &str, material_id: &str) -> Result<(), String> {
    let room_id = scenario_room();
    println!("  Step 1: Instructor joins {}", room_id);
    let (mut instructor, _) = join_as(server, &room_id, "instructor", material_id).await?;

    println!("  Step 2: Instructor moves to page 2 and pins a note");
    send_event(&mut instructor, json!({"event": "page:change", "data": {"pageNumber": 2}})).await?;
    wait_for_event(&mut instructor, "page:changed", Duration::from_secs(3)).await?;
    send_event(
        &mut instructor,
        json!({"event": "annotation:add", "data": {
            "pageNumber": 2, "type": "pin", "color": "red",
            "data": {"type": "pin", "x": 50.0, "y": 50.0}
        }}),
    )
    .await?;
    wait_for_event(&mut instructor, "annotation:added", Duration::from_secs(3)).await?;

    println!("  Step 3: Student joins late");
    let (_student, state) = join_as(server, &room_id, "student", material_id).await?;
    if state["currentPage"] != 2 {
        return Err(format!("expected page 2, got {}", state["currentPage"]));
    }
    if state["annotations"].as_array().map_or(0, Vec::len) != 1 {
        return Err("expected one annotation in the snapshot".to_string());
    }
    println!("{} Student received page 2 with the annotation", "✓".green());
    Ok(())
}

async fn validate_authority(server: &str, material_id: &str) -> Result<(), String> {
    let room_id = scenario_room();
    let (_instructor, _) = join_as(server, &room_id, "instructor", material_id).await?;
    let (mut student, _) = join_as(server, &room_id, "student", material_id).await?;

    send_event(&mut student, json!({"event": "page:change", "data": {"pageNumber": 2}})).await?;
    let error = wait_for_event(&mut student, "room:error", Duration::from_secs(3)).await?;
    if error["kind"] != "authority" {
        return Err(format!("expected authority error, got {}", error));
    }
    println!("{} Student page change rejected: {}", "✓".green(), error["message"]);
    Ok(())
}

async fn validate_laser_expiry(server: &str, material_id: &str) -> Result<(), String> {
    let room_id = scenario_room();
    let (mut instructor, _) = join_as(server, &room_id, "instructor", material_id).await?;
    let (mut student, _) = join_as(server, &room_id, "student", material_id).await?;

    send_event(
        &mut instructor,
        json!({"event": "annotation:add", "data": {
            "pageNumber": 1, "type": "laser", "color": "red",
            "data": {"type": "laser", "x": 10.0, "y": 20.0, "timestamp": 0}
        }}),
    )
    .await?;

    let added = wait_for_event(&mut student, "annotation:added", Duration::from_secs(3)).await?;
    let started = Instant::now();
    println!("  Laser {} added, waiting for expiry...", added["id"]);

    let removed = wait_for_event(&mut student, "annotation:removed", Duration::from_secs(5)).await?;
    if removed["id"] != added["id"] {
        return Err(format!("unexpected removal {}", removed["id"]));
    }
    println!("{} Laser expired after {:?}", "✓".green(), started.elapsed());
    Ok(())
}

async fn validate_unknown_material(server: &str) -> Result<(), String> {
    let url = format!("http://{}/api/rooms", server);
    let resp = reqwest::Client::new()
        .post(&url)
        .json(&json!({"materialId": "no-such-material"}))
        .send()
        .await
        .map_err(|e| e.to_string())?;

    if resp.status() != reqwest::StatusCode::NOT_FOUND {
        return Err(format!("expected 404, got {}", resp.status()));
    }
    println!("{} Unknown material rejected with 404", "✓".green());
    Ok(())
}

async fn interactive_mode(server: &str) {
    println!("\n{}", "Interactive Mode".bold().green());
    println!("{}", "═".repeat(60).green());
    println!("Type {} for help, {} to quit\n", "help".cyan(), "quit".cyan());

    let socket = match connect(server).await {
        Ok(socket) => socket,
        Err(e) => {
            println!("{} Cannot connect to server: {}", "✗".red(), e);
            return;
        }
    };
    println!("{} Connected to server", "✓".green());

    let (mut write, mut read) = socket.split();

    let receive_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = read.next().await {
            if let Message::Text(text) = msg {
                println!("\n{} {}", "◀".green(), text.bright_white());
            }
        }
    });

    loop {
        print!("{} ", "►".cyan());
        let _ = io::stdout().flush();

        let mut input = String::new();
        if io::stdin().read_line(&mut input).is_err() {
            break;
        }
        let input = input.trim();

        if input.is_empty() {
            continue;
        }
        if input == "quit" || input == "exit" {
            println!("Goodbye!");
            break;
        }
        if input == "help" {
            print_interactive_help();
            continue;
        }

        match ClientMessage::from_json(input) {
            Ok(message) => {
                let frame = match serde_json::to_string(&message) {
                    Ok(frame) => frame,
                    Err(e) => {
                        println!("{} {}", "✗".red(), e);
                        continue;
                    }
                };
                if write.send(Message::Text(frame)).await.is_ok() {
                    println!("{} {} sent", "✓".green(), message.event_name());
                } else {
                    println!("{} Failed to send message", "✗".red());
                    break;
                }
            }
            Err(e) => println!("{} {}. Type 'help' for examples.", "✗".yellow(), e),
        }
    }

    receive_task.abort();
}

fn print_interactive_help() {
    println!("\n{}", "Interactive Mode Commands".bold());
    println!("{}", "─".repeat(60));
    println!("Send JSON frames directly to the server.\n");

    println!("{}", "Example Frames:".bold());
    println!("\n{}:", "Join as instructor".cyan());
    println!(r#"  {{"event":"room:join","data":{{"roomId":"123456","role":"instructor","name":"Sato"}}}}"#);

    println!("\n{}:", "Join as student".cyan());
    println!(r#"  {{"event":"room:join","data":{{"roomId":"123456","role":"student"}}}}"#);

    println!("\n{}:", "Change page".cyan());
    println!(r#"  {{"event":"page:change","data":{{"pageNumber":3}}}}"#);

    println!("\n{}:", "Laser pointer".cyan());
    println!(r#"  {{"event":"annotation:add","data":{{"pageNumber":3,"type":"laser","color":"red","data":{{"type":"laser","x":40,"y":60,"timestamp":0}}}}}}"#);

    println!("\n{}:", "Request state".cyan());
    println!(r#"  {{"event":"room:request-state","data":{{"roomId":"123456"}}}}"#);

    println!("\n{}: quit, exit", "Commands".bold());
    println!();
}
