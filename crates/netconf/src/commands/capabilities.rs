//! `netconf capabilities`

use netconf_config::ResolvedDevice;
use netconf_proto::CapabilitySet;
use netconf_core::Strategy;
use serde::Serialize;

use crate::cli::GlobalOpts;
use crate::commands::connect;
use crate::error::CliError;
use crate::output;

#[derive(Debug, Serialize)]
struct Report {
    device: String,
    session_id: u32,
    framing: String,
    write_strategy: Option<String>,
    local: Vec<String>,
    peer: Vec<String>,
}

fn uris(set: &CapabilitySet) -> Vec<String> {
    set.iter().map(netconf_proto::Capability::to_uri).collect()
}

pub async fn handle(device: ResolvedDevice, global: &GlobalOpts) -> Result<(), CliError> {
    let session = connect(&device).await?;

    let report = Report {
        device: device.id.to_string(),
        session_id: session.session_id(),
        framing: session.framing().to_string(),
        write_strategy: Strategy::select(session.peer_capabilities()).map(|s| s.to_string()),
        local: uris(session.local_capabilities()),
        peer: uris(session.peer_capabilities()),
    };
    session.close().await?;

    let color = output::should_color(global.color);
    let rendered = output::render(global.output, &report, |r| {
        let mut lines = vec![
            format!("{} {}", output::heading("device:", color), r.device),
            format!("{} {}", output::heading("session-id:", color), r.session_id),
            format!("{} {}", output::heading("framing:", color), r.framing),
            format!(
                "{} {}",
                output::heading("write strategy:", color),
                r.write_strategy.as_deref().unwrap_or("none")
            ),
            output::heading("peer capabilities:", color),
        ];
        lines.extend(r.peer.iter().map(|uri| format!("  {uri}")));
        lines.push(output::heading("our capabilities:", color));
        lines.extend(r.local.iter().map(|uri| format!("  {uri}")));
        lines.join("\n")
    })?;
    output::print_output(&rendered, global.quiet);
    Ok(())
}
