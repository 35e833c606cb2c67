//! `netconf serve`: the in-memory device over TCP.

use netconf_core::{ListKeys, MemoryServer, RemoteDeviceId, ServerConfig};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::cli::{GlobalOpts, ServeArgs};
use crate::commands::util;
use crate::error::CliError;
use crate::output;

pub async fn handle(args: ServeArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let mut list_keys = ListKeys::new();
    for raw in &args.list_keys {
        let (list, key) = util::parse_list_key(raw)?;
        list_keys = list_keys.with_list(list, [key]);
    }

    let server = MemoryServer::new(ServerConfig {
        candidate: args.candidate,
        list_keys,
        ..ServerConfig::default()
    });
    if let Some(seed) = &args.seed {
        server.seed(&util::read_xml(seed)?).await;
    }

    let listener = TcpListener::bind(args.listen).await?;
    let local = listener.local_addr()?;
    info!(address = %local, candidate = args.candidate, "serving in-memory datastore");
    output::print_output(&format!("listening on {local}"), global.quiet);

    let mut clients = 0_u64;
    loop {
        tokio::select! {
            biased;
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, shutting down");
                break;
            }
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                clients += 1;
                let Ok(peer_id) = RemoteDeviceId::new(format!("client-{clients}"), peer) else {
                    continue;
                };
                let server = server.clone();
                tokio::spawn(async move {
                    if let Err(e) = server.serve(stream, peer_id.clone()).await {
                        warn!(peer = %peer_id, error = %e, "client session failed");
                    }
                });
            }
        }
    }
    Ok(())
}
