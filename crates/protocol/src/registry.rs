//! Typed registry of the tools one server connection exposes.

use refdesk_core::ToolDescriptor;
use tracing::warn;

use crate::jsonrpc::ToolInfo;
use crate::schema::ArgumentSchema;

/// A discovered tool with its compiled argument schema.
#[derive(Debug, Clone)]
pub struct RegisteredTool {
    pub descriptor: ToolDescriptor,
    pub schema: ArgumentSchema,
}

/// Name → {descriptor, schema}, in discovery order.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a `tools/list` answer. Duplicate names keep the first entry.
    pub fn from_discovered(infos: Vec<ToolInfo>) -> Self {
        let mut registry = Self::new();
        for info in infos {
            let description = info
                .description
                .filter(|d| !d.trim().is_empty())
                .unwrap_or_else(|| format!("Tool named {}", info.name));
            let descriptor = ToolDescriptor::new(info.name, description, info.input_schema);
            registry.register(descriptor);
        }
        registry
    }

    pub fn register(&mut self, descriptor: ToolDescriptor) -> bool {
        if self.get(&descriptor.name).is_some() {
            warn!(tool = %descriptor.name, "Duplicate tool name from server, keeping the first");
            return false;
        }
        let schema = ArgumentSchema::compile(&descriptor.parameters);
        self.tools.push(RegisteredTool { descriptor, schema });
        true
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.iter().find(|t| t.descriptor.name == name)
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.iter().map(|t| t.descriptor.clone()).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.descriptor.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
