//! Composition root and line-command shell for the lamp bridge.
//! Wires the logger, transport, connection manager and preset store
//! together, auto-connects to the lamp, and then drives it from stdin.

use std::sync::Arc;

use anyhow::Result;
use log::{error, info};
use tokio::io::{AsyncBufReadExt, BufReader};

use blelamp_bridge::config::LampConfig;
use blelamp_bridge::core::bluetooth::{
    event_channel, AdapterState, BluestTransport, Hsv, LampManager, PatternKind, ScanMode,
};
use blelamp_bridge::logging;
use blelamp_bridge::store::{LampPreset, PresetStore};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = logging::setup_logging(log::Level::Info);

    let config = LampConfig::load(&LampConfig::default_path()).await;
    let store = PresetStore::open_default();

    let (events, receiver) = event_channel();
    let transport = Arc::new(BluestTransport::new(events).await?);
    let manager = LampManager::new(transport, receiver, config.device_name.clone());

    // Scanning is blocked until the radio is up.
    let mut snapshots = manager.subscribe();
    while snapshots.borrow().adapter_state != AdapterState::PoweredOn {
        snapshots.changed().await?;
    }
    manager.start_scan(ScanMode::AutoConnect).await?;

    println!("Type 'help' for commands.");
    let mut last_color: Option<Hsv> = None;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let command = match parts.first() {
            Some(&c) => c,
            None => continue,
        };

        let outcome = match command {
            "help" => {
                print_help();
                Ok(())
            }
            "scan" => manager.start_scan(ScanMode::AutoConnect).await.map_err(Into::into),
            "status" => manager.request_status().await.map_err(Into::into),
            "color" => match parse_color(&parts[1..]) {
                Some(color) => {
                    last_color = Some(color);
                    manager.set_color(color).await.map_err(Into::into)
                }
                None => usage("color HUE SAT VAL (each 0-255)"),
            },
            "pattern" => match parts.get(1).and_then(|name| parse_pattern(name)) {
                Some(pattern) => manager
                    .set_pattern(pattern, last_color)
                    .await
                    .map_err(Into::into),
                None => usage("pattern solid|fire|pacifica|rainbow|meteor|rotate"),
            },
            "rotate" => match parts.get(1).and_then(|s| s.parse::<u16>().ok()) {
                Some(secs) => manager.set_rotation(secs).await.map_err(Into::into),
                None => usage("rotate SECONDS (0-65535)"),
            },
            "save" => match (parts.get(1), last_color) {
                (Some(name), Some(color)) => {
                    store.save(LampPreset::new(*name, color)).await
                }
                (Some(_), None) => usage("set a color first, then save NAME"),
                _ => usage("save NAME"),
            },
            "load" => match parts.get(1) {
                Some(name) => match store.get(name).await {
                    Some(preset) => {
                        let color = preset.color();
                        last_color = Some(color);
                        manager.set_color(color).await.map_err(Into::into)
                    }
                    None => usage("no preset with that name"),
                },
                None => usage("load NAME"),
            },
            "presets" => {
                for preset in store.list().await {
                    println!("  {}  {}", preset.name, preset.color());
                }
                Ok(())
            }
            "delete" => match parts.get(1) {
                Some(name) => store.delete(name).await,
                None => usage("delete NAME"),
            },
            "disconnect" => manager.disconnect().await.map_err(Into::into),
            "quit" | "exit" => break,
            other => usage(&format!("unknown command '{}'; try 'help'", other)),
        };

        if let Err(e) = outcome {
            error!("{}", e);
        }
    }

    manager.disconnect().await.ok();
    info!("Bye.");
    Ok(())
}

fn print_help() {
    println!("Commands:");
    println!("  scan                 rescan and auto-connect to the lamp");
    println!("  status               request the lamp's current status");
    println!("  color H S V          set color (HSV, each 0-255)");
    println!("  pattern NAME         solid|fire|pacifica|rainbow|meteor|rotate");
    println!("  rotate SECONDS       seconds between patterns in rotate mode");
    println!("  save NAME            save the last color as a preset");
    println!("  load NAME            send a saved preset to the lamp");
    println!("  presets              list saved presets");
    println!("  delete NAME          delete a preset");
    println!("  disconnect           drop the lamp connection");
    println!("  quit                 exit");
}

fn usage(message: &str) -> Result<()> {
    println!("usage: {}", message);
    Ok(())
}

fn parse_color(args: &[&str]) -> Option<Hsv> {
    if args.len() != 3 {
        return None;
    }
    Some(Hsv::new(
        args[0].parse().ok()?,
        args[1].parse().ok()?,
        args[2].parse().ok()?,
    ))
}

fn parse_pattern(name: &str) -> Option<PatternKind> {
    match name.to_ascii_lowercase().as_str() {
        "solid" | "solidfill" | "color" => Some(PatternKind::SolidFill),
        "fire" => Some(PatternKind::Fire),
        "pacifica" | "waves" => Some(PatternKind::Pacifica),
        "rainbow" => Some(PatternKind::Rainbow),
        "meteor" => Some(PatternKind::Meteor),
        "rotate" | "rotation" => Some(PatternKind::Rotate),
        _ => None,
    }
}
