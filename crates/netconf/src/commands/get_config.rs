//! `netconf get-config`

use netconf_config::ResolvedDevice;
use netconf_core::{NetconfError, PayloadCodec, RpcService, XmlPayloadCodec};
use netconf_proto::{Datastore, Rpc, XmlElement, rpc::subtree_filter};
use serde_json::json;

use crate::cli::{GetConfigArgs, GlobalOpts, SourceArg};
use crate::commands::{connect, util};
use crate::error::CliError;
use crate::output;

pub async fn handle(
    device: ResolvedDevice,
    args: GetConfigArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let source = match args.source {
        SourceArg::Running => Datastore::Running,
        SourceArg::Candidate => Datastore::Candidate,
        SourceArg::Startup => Datastore::Startup,
    };
    let path = args.path.as_deref().map(util::parse_path).transpose()?;

    let filter = match (&args.filter, &path) {
        (Some(file), _) => Some(subtree_filter([util::read_xml(file)?])),
        (None, Some(path)) => XmlPayloadCodec.filter_for(path).map_err(|e| CliError::Validation {
            field: "path".into(),
            reason: e.to_string(),
        })?,
        (None, None) => None,
    };

    let session = connect(&device).await?;
    let reply = session.invoke(Rpc::GetConfig { source, filter }).await;
    session.close().await?;

    let reply = reply?.into_result().map_err(|errors| NetconfError::Rpc {
        device: device.id.clone(),
        operation: "get-config".into(),
        errors,
    })?;
    let data = reply.data.unwrap_or_else(|| XmlElement::netconf("data"));

    let selected = match &path {
        Some(path) => XmlPayloadCodec
            .parse_data(path, &data)
            .map_err(|e| CliError::Validation {
                field: "path".into(),
                reason: e.to_string(),
            })?,
        None => Some(data),
    };

    let xml = selected.map(|el| el.to_xml());
    let rendered = output::render(global.output, &json!({ "data": &xml }), |_| {
        xml.clone().unwrap_or_default()
    })?;
    output::print_output(&rendered, global.quiet);
    Ok(())
}
