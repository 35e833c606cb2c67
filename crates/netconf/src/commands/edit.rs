//! `netconf edit`: one edit, one write transaction.

use std::sync::Arc;

use netconf_config::ResolvedDevice;
use netconf_core::{NetconfDevice, NetconfError, Store, XmlPayloadCodec};
use serde_json::json;

use crate::cli::{EditArgs, EditOperationArg, GlobalOpts};
use crate::commands::{connect, util};
use crate::error::CliError;
use crate::output;

pub async fn handle(
    device: ResolvedDevice,
    args: EditArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let path = util::parse_path(&args.path)?;
    let data = match (args.operation, &args.file) {
        (EditOperationArg::Delete, _) => None,
        (_, Some(file)) => Some(util::read_xml(file)?),
        (_, None) => {
            return Err(CliError::Validation {
                field: "file".into(),
                reason: "replace and merge need --file".into(),
            });
        }
    };

    let session = connect(&device).await?;
    let mount = NetconfDevice::new(
        Arc::new(session.clone()),
        Arc::new(XmlPayloadCodec),
        device.device.clone(),
    );
    let strategy = mount.write_strategy()?;

    let result: Result<(), NetconfError> = async {
        let tx = mount.transaction().await?;
        match (args.operation, data) {
            (EditOperationArg::Replace, Some(data)) => {
                tx.put(Store::Configuration, path.clone(), data).await?;
            }
            (EditOperationArg::Merge, Some(data)) => {
                tx.merge(Store::Configuration, path.clone(), data).await?;
            }
            _ => tx.delete(Store::Configuration, path.clone()).await?,
        }
        tx.commit().await
    }
    .await;
    mount.shutdown().await;
    session.close().await?;
    result?;

    let color = output::should_color(global.color);
    let operation = format!("{:?}", args.operation).to_lowercase();
    let report = json!({
        "device": device.id.to_string(),
        "path": path.to_string(),
        "operation": operation,
        "strategy": strategy.to_string(),
    });
    let rendered = output::render(global.output, &report, |_| {
        output::success(
            &format!("committed {operation} at {path} via {strategy}"),
            color,
        )
    })?;
    output::print_output(&rendered, global.quiet);
    Ok(())
}
