//! earshot-admin CLI tool
//!
//! Talks to a running earshot-node over its admin socket.
//!
//! Usage:
//!   earshot-admin link <name> <member_id>
//!   earshot-admin unlink <name>
//!   earshot-admin list-links
//!   earshot-admin players
//!   earshot-admin ping

use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;

#[derive(Debug, Serialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
enum AdminCommand {
    Link { name: String, identity: String },
    Unlink { name: String },
    ListLinks,
    Players,
    Ping,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum AdminResponse {
    Ok { message: String },
    Error { error: String },
    List { items: Vec<String> },
    Pong,
}

fn print_usage() {
    eprintln!("earshot-admin - Manage a running earshot-node");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  earshot-admin link <name> <member_id>  Link a player to a member by hand");
    eprintln!("  earshot-admin unlink <name>            Remove a player's link");
    eprintln!("  earshot-admin list-links               List stored links");
    eprintln!("  earshot-admin players                  List players currently reporting");
    eprintln!("  earshot-admin ping                     Check if the node is running");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  EARSHOT_ADMIN_SOCKET  Path to admin socket (default: <data dir>/admin.sock)");
    eprintln!("  EARSHOT_DATA_DIR      Node data directory (default: ./earshot-data)");
}

/// Same resolution order the node uses when binding the socket.
fn socket_path_from(lookup: impl Fn(&str) -> Option<String>) -> PathBuf {
    if let Some(path) = lookup("EARSHOT_ADMIN_SOCKET") {
        return PathBuf::from(path);
    }
    let data_dir = lookup("EARSHOT_DATA_DIR").unwrap_or_else(|| "./earshot-data".to_string());
    PathBuf::from(data_dir).join("admin.sock")
}

fn send_command(cmd: AdminCommand) -> Result<AdminResponse, String> {
    let socket_path = socket_path_from(|key| std::env::var(key).ok());

    let mut stream = UnixStream::connect(&socket_path).map_err(|e| {
        format!(
            "Failed to connect to earshot-node at {:?}: {}\n\
             Is earshot-node running?",
            socket_path, e
        )
    })?;

    let cmd_json = serde_json::to_string(&cmd).map_err(|e| e.to_string())?;
    writeln!(stream, "{}", cmd_json).map_err(|e| e.to_string())?;

    let mut reader = BufReader::new(&stream);
    let mut response_line = String::new();
    reader
        .read_line(&mut response_line)
        .map_err(|e| e.to_string())?;

    serde_json::from_str(&response_line).map_err(|e| format!("Invalid response: {}", e))
}

fn require(args: &[String], count: usize, usage: &str) -> Vec<String> {
    if args.len() < count + 2 {
        eprintln!("Error: {} requires {}", args[1], usage);
        std::process::exit(1);
    }
    args[2..count + 2].to_vec()
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    let cmd = match args[1].as_str() {
        "link" => {
            let mut rest = require(&args, 2, "a name and a member id").into_iter();
            AdminCommand::Link {
                name: rest.next().unwrap_or_default(),
                identity: rest.next().unwrap_or_default(),
            }
        }
        "unlink" => AdminCommand::Unlink {
            name: require(&args, 1, "a name").remove(0),
        },
        "list-links" => AdminCommand::ListLinks,
        "players" => AdminCommand::Players,
        "ping" => AdminCommand::Ping,
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
        Ok(AdminResponse::Ok { message }) => println!("{}", message),
        Ok(AdminResponse::Error { error }) => {
            eprintln!("Error: {}", error);
            std::process::exit(1);
        }
        Ok(AdminResponse::List { items }) => {
            if items.is_empty() {
                println!("(none)");
            }
            for item in items {
                println!("{}", item);
            }
        }
        Ok(AdminResponse::Pong) => println!("pong - earshot-node is running"),
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }
}
