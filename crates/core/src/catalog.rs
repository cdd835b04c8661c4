//! Config model and operation catalog.
//!
//! Flattens the server's configuration document into editable operation
//! forms. Workflows refer to catalog operations by `OperationId`, so a value
//! edited through a workflow is the same value the standalone form shows.

use iapadmin_protocol::client::Variables;
use iapadmin_protocol::{ConfigDocument, OperationSpec, ParamSpec, PreparedOperation};

use crate::error::{ClientError, Result};

/// A parameter with its current operator-entered value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub spec: ParamSpec,
    pub value: String,
}

impl Param {
    fn from_spec(name: String, spec: ParamSpec) -> Self {
        let value = spec.default.clone();
        Self { name, spec, value }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Single,
    Workflow,
}

/// Runnable form for one configured operation
#[derive(Debug, Clone, PartialEq)]
pub struct OperationDescriptor {
    pub name: String,
    pub description: String,
    pub params: Vec<Param>,
    /// Ready-to-run payload from the last successful prepare
    pub prepared: Option<PreparedOperation>,
    /// Message from the last failed prepare
    pub error: Option<String>,
}

impl OperationDescriptor {
    fn from_spec(spec: OperationSpec) -> Self {
        Self {
            name: spec.name,
            description: spec.description,
            params: spec
                .params
                .into_iter()
                .map(|(name, spec)| Param::from_spec(name, spec))
                .collect(),
            prepared: None,
            error: None,
        }
    }

    pub fn param(&self, name: &str) -> Option<&Param> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn set_param(&mut self, name: &str, value: impl Into<String>) -> Result<()> {
        let param = self
            .params
            .iter_mut()
            .find(|p| p.name == name)
            .ok_or_else(|| ClientError::UnknownParameter(name.to_string()))?;
        param.value = value.into();
        Ok(())
    }

    pub fn clear_prepared(&mut self) {
        self.prepared = None;
    }
}

/// Index of an operation in the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperationId(usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workflow {
    pub name: String,
    pub description: String,
    pub members: Vec<OperationId>,
}

/// Features the loaded configuration turns on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub rdp: bool,
    pub pre_rdp: bool,
    pub common_params: bool,
    pub project_operation: bool,
    pub workflows: bool,
    pub instance_operations: bool,
}

/// Listing entry for display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub kind: OperationKind,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    common: Vec<Param>,
    operations: Vec<OperationDescriptor>,
    instance_operations: Vec<OperationDescriptor>,
    workflows: Vec<Workflow>,
    pre_rdp_operations: Vec<String>,
    project_operation: Option<String>,
    capabilities: Capabilities,
}

impl Catalog {
    /// Build the catalog from a configuration document.
    ///
    /// An `error` in the document is passed through; a document that turns
    /// nothing on is `EmptyConfig`; a workflow naming an unknown operation is
    /// `InvalidConfig`.
    pub fn from_document(doc: ConfigDocument) -> Result<Self> {
        if let Some(error) = doc.error.as_deref().filter(|e| !e.is_empty()) {
            return Err(ClientError::Server(error.to_string()));
        }

        let project_operation = doc.project_operation_name().map(str::to_string);
        let enable_rdp = doc.enable_rdp;
        let is_empty = doc.operations.is_empty()
            && doc.instance_operations.is_empty()
            && doc.workflows.is_empty()
            && doc.pre_rdp_operations.is_empty()
            && project_operation.is_none()
            && enable_rdp != Some(true);
        if is_empty {
            return Err(ClientError::EmptyConfig);
        }

        let common: Vec<Param> = doc
            .common_params
            .into_iter()
            .map(|(name, spec)| Param::from_spec(name, spec))
            .collect();
        let operations: Vec<OperationDescriptor> = doc
            .operations
            .into_iter()
            .map(OperationDescriptor::from_spec)
            .collect();
        let instance_operations: Vec<OperationDescriptor> = doc
            .instance_operations
            .into_iter()
            .map(OperationDescriptor::from_spec)
            .collect();

        let mut workflows = Vec::with_capacity(doc.workflows.len());
        for spec in doc.workflows {
            let mut members = Vec::with_capacity(spec.operations.len());
            for op_name in &spec.operations {
                let index = operations
                    .iter()
                    .position(|op| &op.name == op_name)
                    .ok_or_else(|| {
                        ClientError::InvalidConfig(format!(
                            "workflow {} references unknown operation {}",
                            spec.name, op_name
                        ))
                    })?;
                members.push(OperationId(index));
            }
            workflows.push(Workflow {
                name: spec.name,
                description: spec.description,
                members,
            });
        }

        let pre_rdp_operations: Vec<String> = doc
            .pre_rdp_operations
            .iter()
            .map(|entry| entry.name().to_string())
            .collect();

        let capabilities = Capabilities {
            rdp: enable_rdp != Some(false),
            pre_rdp: !pre_rdp_operations.is_empty(),
            common_params: !common.is_empty(),
            project_operation: project_operation.is_some(),
            workflows: !workflows.is_empty(),
            instance_operations: !instance_operations.is_empty(),
        };

        Ok(Self {
            common,
            operations,
            instance_operations,
            workflows,
            pre_rdp_operations,
            project_operation,
            capabilities,
        })
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn common(&self) -> &[Param] {
        &self.common
    }

    pub fn set_common(&mut self, name: &str, value: impl Into<String>) -> Result<()> {
        let param = self
            .common
            .iter_mut()
            .find(|p| p.name == name)
            .ok_or_else(|| ClientError::UnknownParameter(name.to_string()))?;
        param.value = value.into();
        Ok(())
    }

    /// Current common-parameter values keyed by name
    pub fn common_variables(&self) -> Variables {
        self.common
            .iter()
            .map(|p| (p.name.clone(), p.value.clone()))
            .collect()
    }

    pub fn operations(&self) -> &[OperationDescriptor] {
        &self.operations
    }

    pub fn operation_id(&self, name: &str) -> Option<OperationId> {
        self.operations
            .iter()
            .position(|op| op.name == name)
            .map(OperationId)
    }

    pub fn operation(&self, id: OperationId) -> &OperationDescriptor {
        &self.operations[id.0]
    }

    pub fn operation_mut(&mut self, id: OperationId) -> &mut OperationDescriptor {
        &mut self.operations[id.0]
    }

    pub fn operation_named(&self, name: &str) -> Result<&OperationDescriptor> {
        self.operation_id(name)
            .map(|id| self.operation(id))
            .ok_or_else(|| ClientError::UnknownOperation(name.to_string()))
    }

    pub fn operation_named_mut(&mut self, name: &str) -> Result<&mut OperationDescriptor> {
        let id = self
            .operation_id(name)
            .ok_or_else(|| ClientError::UnknownOperation(name.to_string()))?;
        Ok(self.operation_mut(id))
    }

    pub fn instance_operations(&self) -> &[OperationDescriptor] {
        &self.instance_operations
    }

    pub fn instance_operation(&self, name: &str) -> Result<&OperationDescriptor> {
        self.instance_operations
            .iter()
            .find(|op| op.name == name)
            .ok_or_else(|| ClientError::UnknownOperation(name.to_string()))
    }

    pub fn workflows(&self) -> &[Workflow] {
        &self.workflows
    }

    pub fn workflow(&self, name: &str) -> Result<&Workflow> {
        self.workflows
            .iter()
            .find(|wf| wf.name == name)
            .ok_or_else(|| ClientError::UnknownOperation(name.to_string()))
    }

    pub fn pre_rdp_operations(&self) -> &[String] {
        &self.pre_rdp_operations
    }

    pub fn project_operation(&self) -> Option<&str> {
        self.project_operation.as_deref()
    }

    /// Operations and workflows in catalog order
    pub fn entries(&self) -> Vec<CatalogEntry> {
        let singles = self.operations.iter().map(|op| CatalogEntry {
            kind: OperationKind::Single,
            name: op.name.clone(),
            description: op.description.clone(),
        });
        let workflows = self.workflows.iter().map(|wf| CatalogEntry {
            kind: OperationKind::Workflow,
            name: wf.name.clone(),
            description: wf.description.clone(),
        });
        singles.chain(workflows).collect()
    }
}
