//! Prepare operations on the companion server.
//!
//! Preparing sends the operation name plus its variables and stores the
//! returned ready-to-run payload on the descriptor. Nothing runs until the
//! payload is opened on an operation channel.

use iapadmin_protocol::client::{InstanceOperationRequest, OperationRequest, Variables};
use iapadmin_protocol::{Instance, PreparedOperation};
use tracing::{info, warn};

use crate::api::CompanionApi;
use crate::catalog::{Catalog, OperationDescriptor, Param};
use crate::error::Result;

const LABEL_MAX_CHARS: usize = 20;
const LABEL_KEEP_CHARS: usize = 19;

/// Tab title for a session. Display only, never used for addressing.
pub fn tab_label(text: &str) -> String {
    if text.chars().count() <= LABEL_MAX_CHARS {
        return text.to_string();
    }
    let mut out: String = text.chars().take(LABEL_KEEP_CHARS).collect();
    out.push_str("...");
    out
}

/// Operation params first, then common params; a common param wins on a
/// name collision.
pub fn collect_variables(params: &[Param], commons: &Variables) -> Variables {
    let mut variables: Variables = params
        .iter()
        .map(|p| (p.name.clone(), p.value.clone()))
        .collect();
    variables.extend(commons.iter().map(|(k, v)| (k.clone(), v.clone())));
    variables
}

/// Prepare `op`. A failure records its message on the descriptor and keeps
/// whatever was prepared before.
pub async fn prepare(
    api: &dyn CompanionApi,
    op: &mut OperationDescriptor,
    commons: &Variables,
) -> Result<PreparedOperation> {
    let request = OperationRequest {
        name: op.name.clone(),
        variables: collect_variables(&op.params, commons),
    };

    match api.send_operation(&request).await {
        Ok(prepared) => {
            info!(
                component = "dispatcher",
                event = "dispatcher.prepared",
                operation = %op.name,
                hash = %prepared.hash,
                "Operation prepared"
            );
            op.prepared = Some(prepared.clone());
            op.error = None;
            Ok(prepared)
        }
        Err(err) => {
            warn!(
                component = "dispatcher",
                event = "dispatcher.prepare_failed",
                operation = %op.name,
                error = %err,
                "Operation prepare failed"
            );
            op.error = Some(err.user_message());
            Err(err)
        }
    }
}

/// Prepare an instance-scoped operation against `instance`.
pub async fn prepare_instance_operation(
    api: &dyn CompanionApi,
    op: &OperationDescriptor,
    instance: &Instance,
    commons: &Variables,
) -> Result<PreparedOperation> {
    let request = InstanceOperationRequest {
        name: op.name.clone(),
        instance: instance.clone(),
        variables: collect_variables(&op.params, commons),
    };
    let prepared = api.send_instance_operation(&request).await?;
    info!(
        component = "dispatcher",
        event = "dispatcher.instance_prepared",
        operation = %op.name,
        instance = %instance.name,
        hash = %prepared.hash,
        "Instance operation prepared"
    );
    Ok(prepared)
}

/// Prepare every member of a workflow in order, stopping at the first failure.
pub async fn prepare_workflow(
    api: &dyn CompanionApi,
    catalog: &mut Catalog,
    workflow: &str,
) -> Result<Vec<PreparedOperation>> {
    let members = catalog.workflow(workflow)?.members.clone();
    let commons = catalog.common_variables();

    let mut prepared = Vec::with_capacity(members.len());
    for id in members {
        prepared.push(prepare(api, catalog.operation_mut(id), &commons).await?);
    }
    Ok(prepared)
}
