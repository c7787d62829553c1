//! board-admin CLI tool
//!
//! Operator commands for a running board node.
//!
//! Usage:
//!   board-admin ping
//!   board-admin status
//!   board-admin finalize [--force] [--epoch <n>]
//!   board-admin gc
//!   board-admin candidates

use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;

/// Admin command sent over the socket.
#[derive(Debug, Serialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
enum AdminCommand {
    Ping,
    Status,
    Finalize {
        force: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        epoch: Option<u64>,
    },
    Gc,
    Candidates,
}

/// Response from admin command.
#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum AdminResponse {
    Ok { message: String },
    Error { error: String },
    List { items: Vec<String> },
    Status {
        epoch: u64,
        seconds_left: u64,
        proposals: usize,
        accepted: usize,
        latest_finalized_epoch: Option<u64>,
    },
    Pong,
}

fn print_usage() {
    eprintln!("board-admin - Operate a Mosaic board node");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  board-admin ping                              Check if daemon is running");
    eprintln!("  board-admin status                            Show epoch and ledger summary");
    eprintln!("  board-admin finalize [--force] [--epoch <n>]  Close an epoch now");
    eprintln!("  board-admin gc                                Expire and drop stale proposals");
    eprintln!("  board-admin candidates                        List proposals due for closing");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  BOARD_ADMIN_SOCKET  Path to admin socket (default: ./board-data/admin.sock)");
}

fn get_socket_path() -> PathBuf {
    std::env::var("BOARD_ADMIN_SOCKET")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./board-data/admin.sock"))
}

fn send_command(cmd: AdminCommand) -> Result<AdminResponse, String> {
    let socket_path = get_socket_path();

    let mut stream = UnixStream::connect(&socket_path).map_err(|e| {
        format!(
            "Failed to connect to board-node at {:?}: {}\n\
             Is the board-node running?",
            socket_path, e
        )
    })?;

    // Send command
    let cmd_json = serde_json::to_string(&cmd).map_err(|e| e.to_string())?;
    writeln!(stream, "{}", cmd_json).map_err(|e| e.to_string())?;

    // Read response
    let mut reader = BufReader::new(&stream);
    let mut response_line = String::new();
    reader
        .read_line(&mut response_line)
        .map_err(|e| e.to_string())?;

    serde_json::from_str(&response_line).map_err(|e| format!("Invalid response: {}", e))
}

fn parse_finalize(args: &[String]) -> Result<AdminCommand, String> {
    let mut force = false;
    let mut epoch = None;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--force" | "-f" => force = true,
            "--epoch" => {
                let value = iter.next().ok_or("--epoch requires a value")?;
                epoch = Some(
                    value
                        .parse()
                        .map_err(|_| format!("invalid epoch: {}", value))?,
                );
            }
            other => return Err(format!("unknown finalize option: {}", other)),
        }
    }
    Ok(AdminCommand::Finalize { force, epoch })
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    let cmd = match args[1].as_str() {
        "ping" => AdminCommand::Ping,
        "status" => AdminCommand::Status,
        "finalize" => match parse_finalize(&args[2..]) {
            Ok(cmd) => cmd,
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        },
        "gc" => AdminCommand::Gc,
        "candidates" => AdminCommand::Candidates,
        "-h" | "--help" | "help" => {
            print_usage();
            std::process::exit(0);
        }
        other => {
            eprintln!("Unknown command: {}", other);
            print_usage();
            std::process::exit(1);
        }
    };

    match send_command(cmd) {
        Ok(response) => match response {
            AdminResponse::Ok { message } => {
                println!("{}", message);
            }
            AdminResponse::Error { error } => {
                eprintln!("Error: {}", error);
                std::process::exit(1);
            }
            AdminResponse::List { items } => {
                if items.is_empty() {
                    println!("(none)");
                } else {
                    for item in items {
                        println!("{}", item);
                    }
                }
            }
            AdminResponse::Status {
                epoch,
                seconds_left,
                proposals,
                accepted,
                latest_finalized_epoch,
            } => {
                println!("epoch:           {} ({}s left)", epoch, seconds_left);
                println!("proposals:       {}", proposals);
                println!("accepted:        {}", accepted);
                match latest_finalized_epoch {
                    Some(e) => println!("last finalized:  {}", e),
                    None => println!("last finalized:  (none)"),
                }
            }
            AdminResponse::Pong => {
                println!("pong - board-node is running");
            }
        },
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }
}
