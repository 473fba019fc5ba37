//! Interactive REPL driving the control point end-to-end: starts discovery,
//! then accepts the command table below on stdin until `exit`.
//!
//! Grounded in `test_upnp.c`'s `CMDLIST`/`process_command` for the command
//! surface (help/loglevel/leak/leakfull/listdev/refresh/printdev/browse/
//! metadata/ls/action/exit) and in `examples/av_transport_cli.rs` for using
//! `clap::Parser` to parse a line's tokens into a command enum.

use std::{sync::Arc, time::Duration};

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use upnp_cp::{config::Config, discovery::Discovery, registry::Registry, vfs::Vfs};

#[derive(Parser, Debug)]
#[command(no_binary_name = true, multicall = false)]
enum Command {
    /// Print the command table.
    Help,
    /// Set the maximum tracing verbosity (0=error .. 3=trace).
    Loglevel { level: u8 },
    /// Not applicable in this crate: no talloc allocator to report on.
    Leak,
    /// Not applicable in this crate: no talloc allocator to report on.
    Leakfull,
    /// List every device currently in the registry.
    Listdev,
    /// Re-run discovery.
    Refresh,
    /// Print one device's status string.
    Printdev { devname: String },
    /// BrowseDirectChildren on a raw ObjectID.
    Browse { devname: String, object_id: String },
    /// BrowseMetadata on a raw ObjectID.
    Metadata { devname: String, object_id: String },
    /// List a VFS path.
    Ls { devname: String, path: String },
    /// Invoke an arbitrary action (no arguments) on a named service.
    Action {
        devname: String,
        service_type: String,
        action_name: String,
    },
    /// Leave the REPL.
    Exit,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env();
    let client = reqwest::Client::new();
    let registry = Arc::new(Registry::new(client, config));
    let discovery = Arc::new(Discovery::new(registry.clone()));
    let cancellation = CancellationToken::new();

    tokio::spawn({
        let discovery = discovery.clone();
        let cancellation = cancellation.clone();
        async move {
            if let Err(err) = discovery.listen(cancellation).await {
                tracing::error!(error = %err, "ssdp listener exited");
            }
        }
    });
    tokio::spawn(registry.clone().run_expiry_sweep(
        Duration::from_secs(30),
        cancellation.clone(),
    ));

    discovery.search(config.discovery_timeout).await?;

    let vfs = Vfs::new(registry.clone(), true);
    println!("upnp-cp ready. Type 'help' for commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let tokens = line.split_whitespace();
        let command = match Command::try_parse_from(tokens) {
            Ok(c) => c,
            Err(err) => {
                println!("{err}");
                continue;
            }
        };

        match command {
            Command::Help => print_commands(),
            Command::Loglevel { level } => {
                println!("loglevel is controlled by RUST_LOG in this crate; requested {level}");
            }
            Command::Leak | Command::Leakfull => {
                println!("not applicable: this crate has no talloc-style allocator to report on");
            }
            Command::Listdev => {
                for device in registry.devices() {
                    println!("{}", device.status_string());
                }
            }
            Command::Refresh => {
                discovery.search(config.discovery_timeout).await?;
                println!("refreshed");
            }
            Command::Printdev { devname } => match registry.find_by_name(&devname) {
                Some(device) => println!("{}", device.status_string()),
                None => println!("unknown device: {devname}"),
            },
            Command::Browse { devname, object_id } => {
                let Some(device) = registry.find_by_name(&devname) else {
                    println!("unknown device: {devname}");
                    continue;
                };
                let Some(cd) = device.content_directory() else {
                    println!("{devname} has no ContentDirectory service");
                    continue;
                };
                match cd.browse_children(&object_id).await {
                    Some(children) => {
                        for object in children.objects.lock().unwrap().iter() {
                            println!("  {}", object.title);
                        }
                    }
                    None => println!("browse failed"),
                }
            }
            Command::Metadata { devname, object_id } => {
                let Some(device) = registry.find_by_name(&devname) else {
                    println!("unknown device: {devname}");
                    continue;
                };
                let Some(cd) = device.content_directory() else {
                    println!("{devname} has no ContentDirectory service");
                    continue;
                };
                match cd.browse_metadata(&object_id).await {
                    Some(object) => println!("  {}", object.title),
                    None => println!("metadata failed"),
                }
            }
            Command::Ls { devname, path } => {
                println!("ls '{path}' :");
                match vfs.list(&format!("/{devname}/{path}")).await {
                    Ok(entries) => {
                        for entry in entries {
                            println!("  {}", entry.name);
                        }
                    }
                    Err(err) => println!("{err}"),
                }
            }
            Command::Action {
                devname,
                service_type,
                action_name,
            } => {
                let Some(device) = registry.find_by_name(&devname) else {
                    println!("unknown device: {devname}");
                    continue;
                };
                let Some(service) = device
                    .services
                    .iter()
                    .find(|s| s.service_type().to_string() == service_type)
                else {
                    println!("{devname} has no service of type {service_type}");
                    continue;
                };
                match service
                    .core()
                    .send_action(&action_name, &[], config.max_content_length)
                    .await
                {
                    Ok(Ok(response)) => {
                        for (name, value) in &response.arguments {
                            println!("  {name} = {value}");
                        }
                    }
                    Ok(Err(fault)) => println!("action faulted: {fault}"),
                    Err(err) => println!("action failed: {err}"),
                }
            }
            Command::Exit => {
                cancellation.cancel();
                break;
            }
        }
    }

    Ok(())
}

fn print_commands() {
    println!("Valid Commands:");
    println!("  {:<14} {}", "help", "");
    println!("  {:<14} {}", "loglevel", "<max log level (0-3)>");
    println!("  {:<14} {}", "leak", "");
    println!("  {:<14} {}", "leakfull", "");
    println!("  {:<14} {}", "listdev", "");
    println!("  {:<14} {}", "refresh", "");
    println!("  {:<14} {}", "printdev", "<devname>");
    println!("  {:<14} {}", "browse", "<devname> <objectId>");
    println!("  {:<14} {}", "metadata", "<devname> <objectId>");
    println!("  {:<14} {}", "ls", "<devname> <path>");
    println!(
        "  {:<14} {}",
        "action", "<devname> <serviceType> <actionName>"
    );
    println!("  {:<14} {}", "exit", "");
}
