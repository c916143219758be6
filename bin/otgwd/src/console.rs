//! ---
//! otgw_section: "05-networking-external-interfaces"
//! otgw_subsection: "binary"
//! otgw_type: "source"
//! otgw_scope: "code"
//! otgw_description: "Operator console feeding commands to the bridge."
//! otgw_version: "v0.0.0-prealpha"
//! otgw_owner: "tbd"
//! ---
//! Line-oriented operator console on stdin.
//!
//! Stands in for the home-automation frontend: setpoint and reset commands
//! are queued to the bridge, `status` prints the last published values.

use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use otgw_core::{BridgeCommand, BridgeHandle, Channel, MemorySink};
use otgw_sim::SimulatedBoiler;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConsoleCommand {
    Bridge(BridgeCommand),
    Status,
    Help,
}

const HELP: &str = "commands: dhw <celsius> | room <celsius> | reset | status | help";

/// Parse one console line. Blank lines yield `None`.
pub fn parse_line(line: &str) -> Result<Option<ConsoleCommand>> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let command = match verb.to_ascii_lowercase().as_str() {
        "dhw" => ConsoleCommand::Bridge(BridgeCommand::SetDhwSetpoint(temperature(
            words.next(),
        )?)),
        "room" => ConsoleCommand::Bridge(BridgeCommand::SetRoomSetpoint(temperature(
            words.next(),
        )?)),
        "reset" => ConsoleCommand::Bridge(BridgeCommand::ResetBoiler),
        "status" => ConsoleCommand::Status,
        "help" | "?" => ConsoleCommand::Help,
        other => bail!("unknown command '{other}'"),
    };
    if let Some(extra) = words.next() {
        bail!("unexpected argument '{extra}'");
    }
    Ok(Some(command))
}

fn temperature(word: Option<&str>) -> Result<f32> {
    let word = word.ok_or_else(|| anyhow!("missing temperature"))?;
    let value: f32 = word
        .parse()
        .with_context(|| format!("'{word}' is not a temperature"))?;
    if !value.is_finite() {
        bail!("'{word}' is not a temperature");
    }
    Ok(value)
}

/// Read commands until stdin closes or shutdown fires.
pub async fn run(
    handle: BridgeHandle,
    sink: Arc<MemorySink>,
    boiler: Arc<SimulatedBoiler>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    info!("{HELP}");
    loop {
        let line = tokio::select! {
            _ = shutdown.recv() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            info!("console input closed");
            break;
        };
        match parse_line(&line) {
            Ok(None) => {}
            Ok(Some(ConsoleCommand::Bridge(command))) => {
                handle.send(command).await?;
                info!(?command, "command queued");
            }
            Ok(Some(ConsoleCommand::Status)) => println!("{}", status(&sink, &boiler)),
            Ok(Some(ConsoleCommand::Help)) => println!("{HELP}"),
            Err(err) => warn!(error = %err, "{HELP}"),
        }
    }
    Ok(())
}

fn status(sink: &MemorySink, boiler: &SimulatedBoiler) -> serde_json::Value {
    let state = sink.snapshot();
    let sensors: serde_json::Map<_, _> = state
        .sensors
        .iter()
        .map(|(kind, value)| (kind.to_string(), json!(value)))
        .collect();
    let flags: serde_json::Map<_, _> = state
        .flags
        .iter()
        .map(|(kind, on)| (kind.as_str().to_owned(), json!(on)))
        .collect();
    let climate: serde_json::Map<_, _> = [Channel::Dhw, Channel::Room]
        .into_iter()
        .filter_map(|channel| {
            state
                .climate
                .get(&channel)
                .map(|climate| (channel.to_string(), json!(climate)))
        })
        .collect();
    let boiler = boiler.snapshot();
    json!({
        "sensors": sensors,
        "flags": flags,
        "climate": climate,
        "boiler": {
            "water_setpoint": boiler.water_setpoint,
            "dhw_setpoint": boiler.dhw_setpoint,
            "room_setpoint": boiler.room_setpoint,
            "resets": boiler.resets,
        },
    })
}
