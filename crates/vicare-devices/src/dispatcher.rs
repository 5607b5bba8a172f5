//! Capability writes turned into remote commands.

use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use vicare_core::VicareEvent;

use crate::capability::{CapabilityDescriptor, CommandTemplate};
use crate::context::DeviceContext;
use crate::error::{DeviceError, Result};
use crate::state::DeviceState;
use crate::table::CapabilityTable;

/// A remote command ready to be sent.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCommand {
    pub name: String,
    pub body: Value,
}

/// Translate a write of `value` into the remote command for `descriptor`.
pub fn build_command(descriptor: &CapabilityDescriptor, value: &Value) -> Result<RemoteCommand> {
    match &descriptor.command {
        Some(CommandTemplate::ValueAsCommand) => Ok(RemoteCommand {
            name: descriptor.command_for_value(value),
            body: Value::Object(Map::new()),
        }),
        Some(CommandTemplate::Named {
            name,
            parameter_mapping,
        }) => {
            let mut body = Map::new();
            for remote_param in parameter_mapping.values() {
                body.insert(remote_param.clone(), value.clone());
            }
            Ok(RemoteCommand {
                name: name.clone(),
                body: Value::Object(body),
            })
        }
        None => Err(DeviceError::InvalidValue(format!(
            "{} is read-only",
            descriptor.capability_name
        ))),
    }
}

/// Send the command for a capability write, then mirror the mapped value
/// locally.
///
/// Remote failures propagate as [`DeviceError::CommandExecution`] carrying
/// the remote message.
pub async fn execute_command(
    ctx: &DeviceContext,
    state: &mut DeviceState,
    path: &str,
    descriptor: &CapabilityDescriptor,
    value: Value,
) -> Result<()> {
    let command = build_command(descriptor, &value)?;

    debug!(
        category = "command",
        device_id = %ctx.device_id,
        feature = %path,
        command = %command.name,
        body = %command.body,
        "Executing command"
    );

    if let Err(source) = ctx
        .remote
        .execute_command(&ctx.address, path, &command.name, command.body)
        .await
    {
        warn!(
            category = "command",
            device_id = %ctx.device_id,
            feature = %path,
            command = %command.name,
            error = %source,
            "Command failed"
        );
        return Err(DeviceError::CommandExecution {
            feature: path.to_string(),
            command: command.name,
            source,
        });
    }

    info!(
        category = "command",
        device_id = %ctx.device_id,
        feature = %path,
        command = %command.name,
        "Command accepted"
    );
    ctx.publish(
        VicareEvent::CommandExecuted {
            device_id: ctx.device_id.clone(),
            feature: path.to_string(),
            command: command.name.clone(),
        },
        "command",
    )
    .await;

    // Host-side form, as sync would store it (`true` -> `activate`)
    let local = descriptor.map_read(&value);
    ctx.write_if_changed(state, &descriptor.capability_name, local, "command")
        .await?;
    Ok(())
}

/// Register host listeners for every commandable capability of eligible
/// paths, once per path.
///
/// Returns the number of paths newly registered.
pub async fn register_listeners(
    table: &CapabilityTable,
    state: &mut DeviceState,
    ctx: &DeviceContext,
) -> Result<usize> {
    let mut registered = 0;
    for (path, feature) in table.iter() {
        if state.registered_listeners.contains(path) || !state.is_eligible(path, feature) {
            continue;
        }
        let writable: Vec<&CapabilityDescriptor> =
            feature.capabilities.iter().filter(|c| c.is_writable()).collect();
        if writable.is_empty() {
            continue;
        }
        for descriptor in writable {
            ctx.host
                .register_capability_listener(&descriptor.capability_name)
                .await?;
        }
        state.registered_listeners.insert(path.to_string());
        registered += 1;
    }
    Ok(registered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::paths;
    use serde_json::json;

    #[test]
    fn test_named_command_body() {
        let table = CapabilityTable::viessmann();
        let desc = table.get_capability(paths::HEATING_CIRCUIT_0_TARGET).unwrap();
        let cmd = build_command(desc, &json!(21)).unwrap();
        assert_eq!(cmd.name, "setTemperature");
        assert_eq!(cmd.body, json!({ "targetTemperature": 21 }));
    }

    #[test]
    fn test_value_as_command() {
        let table = CapabilityTable::viessmann();
        let desc = table.get_capability(paths::HOT_WATER_CHARGE).unwrap();
        let cmd = build_command(desc, &json!(true)).unwrap();
        assert_eq!(cmd.name, "activate");
        assert_eq!(cmd.body, json!({}));

        let cmd = build_command(desc, &json!("deactivate")).unwrap();
        assert_eq!(cmd.name, "deactivate");
    }

    #[test]
    fn test_read_only_capability() {
        let table = CapabilityTable::viessmann();
        let desc = table.get_capability(paths::OUTSIDE_TEMP).unwrap();
        assert!(matches!(
            build_command(desc, &json!(1)),
            Err(DeviceError::InvalidValue(_))
        ));
    }
}
