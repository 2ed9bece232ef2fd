use herd_core::KernelError;

use crate::tool::Tool;

/// In-memory table of tools, keyed by name, iterated in registration
/// order. The registry exclusively owns every record; lookups are linear
/// because the table is small by contract.
#[derive(Debug)]
pub struct Registry {
    tools: Vec<Tool>,
    max_tools: usize,
}

impl Registry {
    pub fn new(max_tools: usize) -> Self {
        Self {
            tools: Vec::new(),
            max_tools: max_tools.max(1),
        }
    }

    pub fn register(&mut self, tool: Tool) -> Result<(), KernelError> {
        if self.tools.iter().any(|t| t.name() == tool.name()) {
            return Err(KernelError::AlreadyExists(tool.name().to_string()));
        }
        if self.tools.len() >= self.max_tools {
            return Err(KernelError::InvalidArg(format!(
                "registry is full ({} tools)",
                self.max_tools
            )));
        }
        self.tools.push(tool);
        Ok(())
    }

    /// Remove and return the record; the caller decides how to wind the
    /// child down before dropping it.
    pub fn unregister(&mut self, name: &str) -> Result<Tool, KernelError> {
        let idx = self
            .tools
            .iter()
            .position(|t| t.name() == name)
            .ok_or_else(|| KernelError::NotFound(name.to_string()))?;
        Ok(self.tools.remove(idx))
    }

    pub fn find(&self, name: &str) -> Option<&Tool> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut Tool> {
        self.tools.iter_mut().find(|t| t.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tool> {
        self.tools.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Tool> {
        self.tools.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
