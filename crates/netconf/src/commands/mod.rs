//! Command dispatch: bridges CLI args -> device session -> output.

pub mod capabilities;
pub mod edit;
pub mod get_config;
pub mod serve;
pub mod util;

use netconf_config::ResolvedDevice;
use netconf_core::Session;
use tokio::net::TcpStream;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a device-bound command to the appropriate handler.
pub async fn dispatch(
    cmd: Command,
    device: ResolvedDevice,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match cmd {
        Command::Capabilities => capabilities::handle(device, global).await,
        Command::GetConfig(args) => get_config::handle(device, args, global).await,
        Command::Edit(args) => edit::handle(device, args, global).await,
        // Serve and Completions are handled before dispatch
        Command::Serve(_) | Command::Completions(_) => Ok(()),
    }
}

/// Open a TCP connection and negotiate a client session.
pub async fn connect(device: &ResolvedDevice) -> Result<Session, CliError> {
    let address = device.id.address();
    let stream = tokio::time::timeout(device.session.negotiation_timeout, TcpStream::connect(address))
        .await
        .map_err(|_| CliError::ConnectionFailed {
            device: device.id.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"),
        })?
        .map_err(|source| CliError::ConnectionFailed {
            device: device.id.to_string(),
            source,
        })?;
    stream.set_nodelay(true)?;

    tracing::debug!(device = %device.id, "connected, negotiating");
    Ok(Session::connect(stream, device.id.clone(), &device.session).await?)
}
