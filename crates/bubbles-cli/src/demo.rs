//! Several simulated devices sharing one in-memory radio
//!
//! Shows the protocol from the first device's point of view: the others
//! enter, one shares its position, one says hello, one walks away.

use std::time::Duration;

use bubbles_core::{Coordinates, PeerIdentity, RadioAddress};
use bubbles_harness::RadioMesh;
use bubbles_runtime::{BubblesContext, ContextBuilder};
use tokio::sync::broadcast::error::RecvError;
use tracing::info;

use crate::config::CliConfig;
use crate::error::{CliError, Result};
use crate::output::Output;

const NAMES: [&str; 6] = ["You", "Ana", "Bo", "Cy", "Dee", "Eli"];

/// Time between simulated advertisement rounds
const BEACON_INTERVAL: Duration = Duration::from_secs(1);

pub async fn run(
    config: &CliConfig,
    devices: usize,
    duration: Duration,
    output: Output,
) -> Result<()> {
    if !(2..=NAMES.len()).contains(&devices) {
        return Err(CliError::input(format!(
            "the demo runs between 2 and {} devices",
            NAMES.len()
        )));
    }

    let mesh = RadioMesh::new().with_jitter(3);
    let mut contexts: Vec<BubblesContext> = Vec::with_capacity(devices);
    for (index, name) in NAMES.iter().take(devices).enumerate() {
        let radio = mesh.radio(mesh_address(index).as_str());
        let identity = PeerIdentity::new(format!("sim-{:02}", index))?;
        let context = ContextBuilder::new(identity)
            .with_name(*name)
            .with_config(config.protocol.clone())
            .spawn(radio)?;
        contexts.push(context);
    }

    // Spread the others out from the first device
    let first = mesh_address(0);
    for index in 1..devices {
        mesh.set_rssi(&first, &mesh_address(index), -48 - 7 * index as i16);
    }

    let mut events = contexts[0].subscribe();
    for context in &contexts {
        context.start_communications().await?;
    }
    output.note(&format!("{} simulated devices, you are {}", devices, NAMES[0]));

    let deadline = tokio::time::sleep(duration);
    tokio::pin!(deadline);
    let mut beacon = tokio::time::interval(BEACON_INTERVAL);
    let mut round = 0u32;
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => break,
            _ = beacon.tick() => {
                round += 1;
                mesh.beacon().await;
                act(round, &mesh, &contexts).await?;
            }
            event = events.recv() => match event {
                Ok(event) => output.event(&event),
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
        }
    }

    output.note("who is near you now:");
    output.peers(&contexts[0].peers());
    for context in &mut contexts {
        context.shutdown().await?;
    }
    info!("demo finished");
    Ok(())
}

fn mesh_address(index: usize) -> RadioAddress {
    RadioAddress::new(format!("sim:{:02}", index))
}

/// Scripted behaviour of the simulated neighbours
async fn act(round: u32, mesh: &RadioMesh, contexts: &[BubblesContext]) -> Result<()> {
    let last = contexts.len() - 1;
    match round {
        3 => {
            contexts[1]
                .update_location(Coordinates::new(52.5163, 13.3777))
                .await?
        }
        5 => contexts[last].send_message("hello, anyone around?").await?,
        8 if last >= 2 => {
            contexts[1].update_status("Ana (away)").await?;
        }
        12 if last >= 2 => {
            info!("{} walks out of range", NAMES[last]);
            mesh.go_silent(&mesh_address(last)).await;
            contexts[last].stop_communications().await?;
        }
        _ => {}
    }
    Ok(())
}
