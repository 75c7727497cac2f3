use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use contract_api::{default_sqlite_path, serve, ContractApi};
use contract_kernel::{Catalog, GoalRegistry};
use contracts::{Command, CommandPayload, ContractView, SessionConfig};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn print_usage() {
    println!("contract-cli <command>");
    println!("commands:");
    println!("  catalog <catalog.json>");
    println!("    lists normalized contract definitions");
    println!("  run <session_id> <catalog.json> <commands.json> [sqlite_path]");
    println!("    applies a JSON array of command payloads and persists the session");
    println!("  status <session_id> <catalog.json> [sqlite_path]");
    println!("    resumes a persisted session and prints its contract views");
    println!("  serve [addr]");
    println!("    default addr: 127.0.0.1:8080");
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn parse_socket_addr(value: Option<&String>) -> Result<SocketAddr, String> {
    let raw = value.map(String::as_str).unwrap_or("127.0.0.1:8080");
    raw.parse::<SocketAddr>()
        .map_err(|_| format!("invalid addr: {raw}"))
}

fn parse_sqlite_path(value: Option<&String>) -> String {
    value
        .map(String::to_string)
        .filter(|path| !path.trim().is_empty())
        .unwrap_or_else(default_sqlite_path)
}

fn required<'a>(args: &'a [String], index: usize, label: &str) -> Result<&'a String, String> {
    args.get(index).ok_or_else(|| format!("missing {label}"))
}

fn load_catalog(path: &str) -> Result<Arc<Catalog>, String> {
    Catalog::from_path(path)
        .map(Arc::new)
        .map_err(|err| format!("failed to load catalog {path}: {err}"))
}

fn load_payloads(path: &str) -> Result<Vec<CommandPayload>, String> {
    let document = std::fs::read_to_string(path)
        .map_err(|err| format!("failed to read commands {path}: {err}"))?;
    serde_json::from_str(&document).map_err(|err| format!("invalid commands {path}: {err}"))
}

fn print_views(label: &str, views: &[ContractView]) {
    println!("{label}: {}", views.len());
    for view in views {
        let mut line = format!(
            "  {} \"{}\" advance={} reward={} fee={}",
            view.contract_id, view.title, view.advance, view.reward, view.fee
        );
        if let Some(availability) = view.availability {
            line.push_str(&format!(" availability={availability:?}"));
        }
        if let Some(next_action) = &view.next_action {
            line.push_str(&format!(" next_action={next_action}"));
        }
        if let Some(can_cancel) = view.can_cancel {
            line.push_str(&format!(" can_cancel={can_cancel}"));
        }
        println!("{line}");
    }
}

fn list_catalog(args: &[String]) -> Result<(), String> {
    let catalog = load_catalog(required(args, 2, "catalog path")?)?;
    println!("contracts: {}", catalog.len());
    for definition in catalog.get_all().values() {
        let goals = definition
            .goals
            .keys()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(",");
        let requirements = definition
            .requirements
            .as_ref()
            .map(|requirements| {
                format!(
                    " rank>={} after=[{}]",
                    requirements.min_rank.unwrap_or(0),
                    requirements.contracts.join(",")
                )
            })
            .unwrap_or_default();
        println!(
            "  {} advance={} reward={} fee={} goals=[{}]{}",
            definition.contract_id,
            definition.advance,
            definition.reward,
            definition.fee,
            goals,
            requirements
        );
    }
    Ok(())
}

fn run_session(args: &[String]) -> Result<(), String> {
    let session_id = required(args, 2, "session_id")?.clone();
    let catalog = load_catalog(required(args, 3, "catalog path")?)?;
    let payloads = load_payloads(required(args, 4, "commands path")?)?;
    let sqlite_path = parse_sqlite_path(args.get(5));

    let config = SessionConfig {
        session_id: session_id.clone(),
        ..SessionConfig::default()
    };
    let mut api = ContractApi::from_config(config, catalog);
    api.attach_sqlite_store(PathBuf::from(&sqlite_path))
        .map_err(|err| format!("failed to attach sqlite store: {err}"))?;
    api.initialize_session_storage(true)
        .map_err(|err| format!("failed to initialize session storage: {err}"))?;

    for payload in payloads {
        let command = Command::new(api.next_command_id("cli"), session_id.as_str(), payload);
        let command_id = command.command_id.clone();
        let result = api.submit_command(command);
        match result.error {
            Some(error) => println!(
                "{command_id} rejected {:?}: {}",
                error.error_code, error.message
            ),
            None => println!("{command_id} accepted applied={}", result.applied),
        }
    }

    if let Some(error) = api.last_persistence_error() {
        return Err(format!("persistence error after run: {error}"));
    }

    info!(%session_id, sqlite = %sqlite_path, "session run finished");
    println!("{} sqlite={}", api.status(), sqlite_path);
    Ok(())
}

fn show_status(args: &[String]) -> Result<(), String> {
    let session_id = required(args, 2, "session_id")?;
    let catalog = load_catalog(required(args, 3, "catalog path")?)?;
    let sqlite_path = parse_sqlite_path(args.get(4));

    let api = ContractApi::resume_from_sqlite(
        PathBuf::from(&sqlite_path),
        session_id,
        catalog,
        Arc::new(GoalRegistry::with_default_handlers()),
    )
    .map_err(|err| format!("failed to resume session: {err}"))?;

    println!("{}", api.status());
    print_views("active", &api.active_contracts());
    print_views("available", &api.available_contracts());
    print_views("almost_available", &api.almost_available_contracts());
    Ok(())
}

fn exit_with_usage(err: String) -> ! {
    eprintln!("error: {err}");
    print_usage();
    std::process::exit(2);
}

#[tokio::main]
async fn main() {
    init_tracing();

    let args: Vec<String> = env::args().collect();
    let command = args.get(1).map(String::as_str);

    match command {
        Some("catalog") => {
            if let Err(err) = list_catalog(&args) {
                exit_with_usage(err);
            }
        }
        Some("run") => {
            if let Err(err) = run_session(&args) {
                exit_with_usage(err);
            }
        }
        Some("status") => {
            if let Err(err) = show_status(&args) {
                exit_with_usage(err);
            }
        }
        Some("serve") => match parse_socket_addr(args.get(2)) {
            Ok(addr) => {
                println!("serving api on http://{addr}");
                if let Err(err) = serve(addr).await {
                    eprintln!("server error: {err}");
                    std::process::exit(1);
                }
            }
            Err(err) => exit_with_usage(err),
        },
        _ => {
            print_usage();
        }
    }
}
