use serde::{Deserialize, Serialize};

/// A 2D canvas coordinate. Y grows downward, as on the host canvas.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn offset_by(self, offset: Offset) -> Self {
        Self {
            x: self.x + offset.dx,
            y: self.y + offset.dy,
        }
    }

    pub fn offset_to(self, other: Point) -> Offset {
        Offset {
            dx: other.x - self.x,
            dy: other.y - self.y,
        }
    }
}

/// Vector between a source node's and a target node's positions.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Offset {
    pub dx: f64,
    pub dy: f64,
}

impl Offset {
    pub fn new(dx: f64, dy: f64) -> Self {
        Self { dx, dy }
    }
}

/// Coarse functional category of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeCategory {
    InputParam,
    OutputParam,
    DataParam,
    GeometryPrimitive,
    GeometrySurface,
    GeometryMesh,
    MathBasic,
    MathTrig,
    MathDomain,
    ListAccess,
    ListModify,
    TreeModify,
    Transform,
    Logic,
    Utility,
    Unknown,
}

impl NodeCategory {
    pub const ALL: [NodeCategory; 16] = [
        NodeCategory::InputParam,
        NodeCategory::OutputParam,
        NodeCategory::DataParam,
        NodeCategory::GeometryPrimitive,
        NodeCategory::GeometrySurface,
        NodeCategory::GeometryMesh,
        NodeCategory::MathBasic,
        NodeCategory::MathTrig,
        NodeCategory::MathDomain,
        NodeCategory::ListAccess,
        NodeCategory::ListModify,
        NodeCategory::TreeModify,
        NodeCategory::Transform,
        NodeCategory::Logic,
        NodeCategory::Utility,
        NodeCategory::Unknown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            NodeCategory::InputParam => "input_param",
            NodeCategory::OutputParam => "output_param",
            NodeCategory::DataParam => "data_param",
            NodeCategory::GeometryPrimitive => "geometry_primitive",
            NodeCategory::GeometrySurface => "geometry_surface",
            NodeCategory::GeometryMesh => "geometry_mesh",
            NodeCategory::MathBasic => "math_basic",
            NodeCategory::MathTrig => "math_trig",
            NodeCategory::MathDomain => "math_domain",
            NodeCategory::ListAccess => "list_access",
            NodeCategory::ListModify => "list_modify",
            NodeCategory::TreeModify => "tree_modify",
            NodeCategory::Transform => "transform",
            NodeCategory::Logic => "logic",
            NodeCategory::Utility => "utility",
            NodeCategory::Unknown => "unknown",
        }
    }

    /// Input and output parameters count as "parameters" for connection kinds.
    /// Pass-through data nodes behave like components there.
    pub fn is_parameter(self) -> bool {
        matches!(self, NodeCategory::InputParam | NodeCategory::OutputParam)
    }
}

/// The four canonical connection families used for spacing statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionKind {
    ParamToComponent,
    ComponentToComponent,
    ComponentToParam,
    ParamToParam,
}

impl ConnectionKind {
    pub fn between(source: NodeCategory, target: NodeCategory) -> Self {
        match (source.is_parameter(), target.is_parameter()) {
            (true, false) => ConnectionKind::ParamToComponent,
            (false, true) => ConnectionKind::ComponentToParam,
            (true, true) => ConnectionKind::ParamToParam,
            (false, false) => ConnectionKind::ComponentToComponent,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionKind::ParamToComponent => "param_to_component",
            ConnectionKind::ComponentToComponent => "component_to_component",
            ConnectionKind::ComponentToParam => "component_to_param",
            ConnectionKind::ParamToParam => "param_to_param",
        }
    }
}

/// Raw node record as observed on the canvas. Optional fields are resolved to
/// defaults by the graph builder, never deeper in the algorithms.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasNode {
    #[serde(alias = "guid")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub subcategory: String,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_count: Option<usize>,
}

impl CanvasNode {
    pub fn new(id: &str, name: &str, x: f64, y: f64) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            x,
            y,
            ..Default::default()
        }
    }

    pub fn with_category(mut self, category: &str, subcategory: &str) -> Self {
        self.category = category.to_string();
        self.subcategory = subcategory.to_string();
        self
    }

    pub fn with_size(mut self, width: f64, height: f64) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn with_ports(mut self, inputs: usize, outputs: usize) -> Self {
        self.input_count = Some(inputs);
        self.output_count = Some(outputs);
        self
    }
}

/// Raw directed wire from an output port to an input port.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasWire {
    #[serde(alias = "sourceGuid", alias = "source_guid")]
    pub source: String,
    #[serde(alias = "targetGuid", alias = "target_guid")]
    pub target: String,
    #[serde(default, alias = "sourceOutput", alias = "source_output")]
    pub source_port: usize,
    #[serde(default, alias = "targetInput", alias = "target_input")]
    pub target_port: usize,
}

impl CanvasWire {
    pub fn new(source: &str, target: &str) -> Self {
        Self {
            source: source.to_string(),
            target: target.to_string(),
            source_port: 0,
            target_port: 0,
        }
    }

    pub fn with_ports(mut self, source_port: usize, target_port: usize) -> Self {
        self.source_port = source_port;
        self.target_port = target_port;
        self
    }
}

/// One observed canvas state: the input to both learning and layout.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasSnapshot {
    #[serde(default, alias = "components")]
    pub nodes: Vec<CanvasNode>,
    #[serde(default)]
    pub wires: Vec<CanvasWire>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl CanvasSnapshot {
    pub fn new(nodes: Vec<CanvasNode>, wires: Vec<CanvasWire>) -> Self {
        Self {
            nodes,
            wires,
            label: None,
        }
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }
}
