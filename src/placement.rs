/// The default device holding the shared variables.
pub const DEFAULT_PS_DEVICE: &str = "/device:CPU:0";

/// Operation kinds that own variable storage.
const VARIABLE_OPS: &[&str] = &["Variable", "VariableV2", "VarHandleOp"];

/// A description of a graph operation, enough to decide where it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDef {
    pub name: String,
    pub op: String,
}

impl NodeDef {
    /// Creates a new `NodeDef`.
    ///
    /// # Arguments
    /// * `name` - The name of the operation.
    /// * `op` - The kind of the operation.
    pub fn new(name: impl Into<String>, op: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            op: op.into(),
        }
    }

    /// Whether this operation holds a variable.
    pub fn is_variable(&self) -> bool {
        VARIABLE_OPS.contains(&self.op.as_str())
    }
}

/// Decides the device each operation of a tower is placed on.
pub trait Placement {
    /// Returns the device identifier for `node`.
    fn place(&self, node: &NodeDef) -> String;
}

impl<F> Placement for F
where
    F: Fn(&NodeDef) -> String,
{
    fn place(&self, node: &NodeDef) -> String {
        self(node)
    }
}

/// Places the variables on a single parameter device so every tower shares them,
/// and the rest of the tower's operations on its own GPU.
#[derive(Debug, Clone)]
pub struct GpuAssignment {
    gpu: usize,
    ps_device: String,
}

impl GpuAssignment {
    /// Creates a new `GpuAssignment` with the variables on `DEFAULT_PS_DEVICE`.
    ///
    /// # Arguments
    /// * `gpu` - The index of the GPU the tower runs on.
    pub fn new(gpu: usize) -> Self {
        Self {
            gpu,
            ps_device: DEFAULT_PS_DEVICE.to_string(),
        }
    }

    /// Overrides the device holding the variables.
    pub fn with_ps_device(mut self, ps_device: impl Into<String>) -> Self {
        self.ps_device = ps_device.into();
        self
    }

    pub fn gpu(&self) -> usize {
        self.gpu
    }

    pub fn ps_device(&self) -> &str {
        &self.ps_device
    }
}

impl Placement for GpuAssignment {
    fn place(&self, node: &NodeDef) -> String {
        if node.is_variable() {
            self.ps_device.clone()
        } else {
            format!("/gpu:{}", self.gpu)
        }
    }
}

/// Closure form of `GpuAssignment`.
///
/// # Arguments
/// * `gpu` - The index of the GPU the tower runs on.
/// * `ps_device` - The device holding the variables.
///
/// # Returns
/// A placement function for a single tower.
pub fn assign_to_gpu(gpu: usize, ps_device: String) -> impl Fn(&NodeDef) -> String {
    let assignment = GpuAssignment::new(gpu).with_ps_device(ps_device);
    move |node| assignment.place(node)
}
