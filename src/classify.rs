//! Maps nodes to a [`NodeCategory`].
//!
//! Static classification walks an ordered rule list and the first rule that
//! produces a category wins. Dynamic classification re-labels the dual-role
//! parameter nodes from their actual wiring, which is what layout uses.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::graph::{CanvasGraph, Node};
use crate::ir::NodeCategory;

/// The fields classification looks at. Port presence is `None` when the
/// snapshot did not declare it.
#[derive(Debug, Clone, Copy)]
pub struct ClassifyInput<'a> {
    pub name: &'a str,
    pub category: &'a str,
    pub subcategory: &'a str,
    pub has_inputs: Option<bool>,
    pub has_outputs: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifyRule {
    ExactName,
    ExactCategory,
    ExactSubcategory,
    CategoryPattern,
    PortRole,
    Fallback,
}

/// Evaluation order of the static rules.
pub const RULES: [ClassifyRule; 6] = [
    ClassifyRule::ExactName,
    ClassifyRule::ExactCategory,
    ClassifyRule::ExactSubcategory,
    ClassifyRule::CategoryPattern,
    ClassifyRule::PortRole,
    ClassifyRule::Fallback,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub category: NodeCategory,
    pub rule: ClassifyRule,
}

const ALWAYS_INPUT: [&str; 9] = [
    "Number Slider",
    "Boolean Toggle",
    "Value List",
    "MD Slider",
    "Digit Scroller",
    "Colour Swatch",
    "Gradient",
    "Graph Mapper",
    "Image Sampler",
];

const ALWAYS_OUTPUT: [&str; 2] = ["Data Recorder", "Param Viewer"];

/// Parameter nodes whose role depends on which side is wired.
const DUAL_ROLE: [&str; 12] = [
    "Panel", "Point", "Curve", "Surface", "Brep", "Mesh", "Geometry", "Integer", "Number", "Text",
    "Data", "Boolean",
];

static NAME_TABLE: Lazy<HashMap<&'static str, NodeCategory>> = Lazy::new(|| {
    use NodeCategory::*;
    let groups: [(NodeCategory, &[&str]); 16] = [
        (InputParam, &ALWAYS_INPUT),
        (InputParam, &["Panel"]),
        (OutputParam, &ALWAYS_OUTPUT),
        (
            DataParam,
            &[
                "Point", "Curve", "Surface", "Brep", "Mesh", "Geometry", "Integer", "Number",
                "Text", "Data", "Relay", "Boolean",
            ],
        ),
        (
            GeometryPrimitive,
            &[
                "Circle", "Circle CNR", "Arc", "Arc 3Pt", "Line", "Line SDL", "Polyline",
                "Rectangle", "Polygon", "Construct Point", "Deconstruct Point", "Pt", "Plane",
                "XY Plane", "XZ Plane", "YZ Plane", "Interpolate", "Nurbs Curve", "Divide Curve",
                "Vector XYZ", "Unit X", "Unit Y", "Unit Z", "Amplitude",
            ],
        ),
        (
            GeometrySurface,
            &[
                "Sphere", "Box", "Center Box", "Cylinder", "Cone", "Extrude", "Loft", "Sweep1",
                "Sweep2", "Pipe", "Cap Holes", "Boundary Surface", "Solid Union",
                "Solid Difference", "Solid Intersection", "Region Union", "Region Difference",
            ],
        ),
        (
            GeometryMesh,
            &[
                "Mesh Box", "Mesh Sphere", "Mesh Surface", "Mesh Brep", "Mesh Join",
                "Mesh Split", "Construct Mesh", "Deconstruct Mesh", "Mesh Faces", "Mesh Vertices",
            ],
        ),
        (
            MathBasic,
            &[
                "Addition", "Subtraction", "Multiplication", "Division", "Negative", "Absolute",
                "Power", "Square Root", "Modulus", "Pi", "Expression", "Evaluate",
                "Mass Addition", "Average", "Minimum", "Maximum", "Round", "Truncate", "Ceiling",
                "Floor",
            ],
        ),
        (
            MathTrig,
            &["Sine", "Cosine", "Tangent", "ArcSine", "ArcCosine", "ArcTangent"],
        ),
        (
            MathDomain,
            &[
                "Domain", "Construct Domain", "Deconstruct Domain", "Remap Numbers", "Bounds",
                "Range", "Series", "Random", "Jitter", "Fibonacci",
            ],
        ),
        (
            Transform,
            &[
                "Move", "Rotate", "Rotate Axis", "Scale", "Scale NU", "Mirror", "Orient",
                "Project", "Offset Curve", "Offset Surface", "Linear Array", "Polar Array",
                "Rectangular Array", "Curve Array", "Box Morph", "Surface Morph", "Twist",
                "Bend", "Shear",
            ],
        ),
        (
            ListAccess,
            &[
                "List Item", "List Length", "First Item", "Last Item", "Null Item", "Tree Item",
                "Tree Branch", "Relative Item", "Pick'n'Choose", "Item Index", "Member Index",
            ],
        ),
        (
            ListModify,
            &[
                "Reverse List", "Shift List", "Sort List", "Partition List", "Split List",
                "Cull Pattern", "Cull Index", "Cull Nth", "Dispatch", "Sift Pattern",
                "Replace Items", "Insert Items", "Merge", "Entwine", "Cross Reference",
                "Longest List", "Shortest List", "Clean Tree", "Repeat Data", "Duplicate Data",
                "Sequence", "Stack Data", "Concatenate",
            ],
        ),
        (
            TreeModify,
            &[
                "Flatten", "Flatten Tree", "Graft", "Graft Tree", "Simplify Tree", "Unflatten",
                "Path Mapper", "Explode Tree", "Trim Tree", "Prune Tree", "Tree Statistics",
                "Flip Matrix", "Match Tree", "Replace Paths", "Split Tree", "Construct Path",
                "Deconstruct Path",
            ],
        ),
        (
            Logic,
            &[
                "Gate And", "Gate Or", "Gate Not", "Gate Xor", "Equality", "Similarity",
                "Larger Than", "Smaller Than", "Mass Or", "Mass And",
            ],
        ),
        (Utility, &["Stream Filter", "Stream Gate", "Data Dam"]),
    ];
    let mut table = HashMap::new();
    for (category, names) in groups {
        for name in names {
            table.entry(*name).or_insert(category);
        }
    }
    table
});

static CATEGORY_TABLE: Lazy<HashMap<&'static str, NodeCategory>> = Lazy::new(|| {
    use NodeCategory::*;
    let groups: [(NodeCategory, &[&str]); 13] = [
        (MathBasic, &["Operators", "Script", "Polynomials", "Matrix", "Analysis", "Wombat"]),
        (MathTrig, &["Trig"]),
        (MathDomain, &["Domain", "Time", "Division"]),
        (Transform, &["Transform", "Euclidean", "Affine", "Morph", "Array", "OpenNest"]),
        (
            GeometryPrimitive,
            &["Curve", "Spline", "Vector", "Point", "Plane", "Grid", "Primitive", "Clipper"],
        ),
        (
            GeometrySurface,
            &[
                "Surface", "Freeform", "SubD", "Intersect", "Mathematical", "Physical", "Region",
                "Shape",
            ],
        ),
        (GeometryMesh, &["Mesh", "Triangulation"]),
        (ListModify, &["Sets", "Sequence", "Text"]),
        (ListAccess, &["List"]),
        (TreeModify, &["Tree", "TreeSloth"]),
        (Logic, &["Boolean"]),
        (
            Utility,
            &["Util", "Elefront", "LunchBox", "Pufferfish", "Kangaroo", "Ladybug", "Honeybee"],
        ),
        (
            OutputParam,
            &["Display", "Colour", "Preview", "Dimensions", "Drafting", "Rhino", "Human"],
        ),
    ];
    let mut table = HashMap::new();
    for (category, names) in groups {
        for name in names {
            table.entry(*name).or_insert(category);
        }
    }
    table
});

/// Loose prefix rules for category strings the exact table does not know,
/// such as plugin tabs with numbered prefixes or version suffixes.
static CATEGORY_PATTERNS: Lazy<Vec<(Regex, NodeCategory)>> = Lazy::new(|| {
    let rules: [(&str, NodeCategory); 10] = [
        (r"(?i)^(\d+\s+)?params?\b", NodeCategory::InputParam),
        (r"(?i)^(\d+\s+)?(bake|display|preview)", NodeCategory::OutputParam),
        (r"(?i)^math", NodeCategory::MathBasic),
        (r"(?i)^(vector|curve|point)", NodeCategory::GeometryPrimitive),
        (r"(?i)^(surface|brep|solid)", NodeCategory::GeometrySurface),
        (r"(?i)^mesh", NodeCategory::GeometryMesh),
        (r"(?i)^(set|list)", NodeCategory::ListModify),
        (r"(?i)^tree", NodeCategory::TreeModify),
        (r"(?i)^(transform|xform)", NodeCategory::Transform),
        (r"(?i)^(elefront|kangaroo|ladybug|honeybee|lb-|hb-)", NodeCategory::Utility),
    ];
    rules
        .into_iter()
        .filter_map(|(pattern, category)| Regex::new(pattern).ok().map(|re| (re, category)))
        .collect()
});

fn apply_rule(rule: ClassifyRule, input: &ClassifyInput<'_>) -> Option<NodeCategory> {
    match rule {
        ClassifyRule::ExactName => NAME_TABLE.get(input.name).copied(),
        ClassifyRule::ExactCategory => CATEGORY_TABLE.get(input.category).copied(),
        ClassifyRule::ExactSubcategory => CATEGORY_TABLE.get(input.subcategory).copied(),
        ClassifyRule::CategoryPattern => [input.category, input.subcategory]
            .into_iter()
            .filter(|label| !label.is_empty())
            .find_map(|label| {
                CATEGORY_PATTERNS
                    .iter()
                    .find(|(re, _)| re.is_match(label))
                    .map(|(_, category)| *category)
            }),
        ClassifyRule::PortRole => match (input.has_inputs, input.has_outputs) {
            (Some(false), Some(true)) => Some(NodeCategory::InputParam),
            (Some(true), Some(false)) => Some(NodeCategory::OutputParam),
            _ => None,
        },
        ClassifyRule::Fallback => Some(NodeCategory::Unknown),
    }
}

pub fn classify_static(input: &ClassifyInput<'_>) -> Classification {
    for rule in RULES {
        if let Some(category) = apply_rule(rule, input) {
            return Classification { category, rule };
        }
    }
    Classification {
        category: NodeCategory::Unknown,
        rule: ClassifyRule::Fallback,
    }
}

/// Category for one node given whether it actually has incoming and outgoing
/// wires.
pub fn classify_dynamic(node: &Node, has_incoming: bool, has_outgoing: bool) -> NodeCategory {
    let name = node.name.as_str();
    if DUAL_ROLE.contains(&name) {
        return match (has_incoming, has_outgoing) {
            (true, false) => NodeCategory::OutputParam,
            (true, true) => NodeCategory::DataParam,
            (false, _) => NodeCategory::InputParam,
        };
    }
    if ALWAYS_INPUT.contains(&name) {
        return NodeCategory::InputParam;
    }
    if ALWAYS_OUTPUT.contains(&name) {
        return NodeCategory::OutputParam;
    }
    classify_static(&ClassifyInput {
        name,
        category: &node.category_label,
        subcategory: &node.subcategory_label,
        has_inputs: Some(has_incoming),
        has_outputs: Some(has_outgoing),
    })
    .category
}

/// Wiring-aware categories for every node in the graph.
pub fn dynamic_categories(graph: &CanvasGraph) -> HashMap<String, NodeCategory> {
    graph
        .iter()
        .map(|node| {
            let has_incoming = !graph.incoming(&node.id).is_empty();
            let has_outgoing = !graph.outgoing(&node.id).is_empty();
            (
                node.id.clone(),
                classify_dynamic(node, has_incoming, has_outgoing),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::ir::{CanvasNode, CanvasSnapshot, CanvasWire};

    fn input<'a>(name: &'a str, category: &'a str, subcategory: &'a str) -> ClassifyInput<'a> {
        ClassifyInput {
            name,
            category,
            subcategory,
            has_inputs: None,
            has_outputs: None,
        }
    }

    #[test]
    fn exact_name_beats_category() {
        let result = classify_static(&input("Sine", "Display", "Preview"));
        assert_eq!(result.category, NodeCategory::MathTrig);
        assert_eq!(result.rule, ClassifyRule::ExactName);
    }

    #[test]
    fn category_beats_subcategory() {
        let result = classify_static(&input("Custom", "Trig", "Mesh"));
        assert_eq!(result.category, NodeCategory::MathTrig);
        assert_eq!(result.rule, ClassifyRule::ExactCategory);
        let result = classify_static(&input("Custom", "Maths", "Domain"));
        assert_eq!(result.category, NodeCategory::MathDomain);
        assert_eq!(result.rule, ClassifyRule::ExactSubcategory);
    }

    #[test]
    fn pattern_matches_unknown_labels() {
        let result = classify_static(&input("Bake Layer", "06 Bake", ""));
        assert_eq!(result.category, NodeCategory::OutputParam);
        assert_eq!(result.rule, ClassifyRule::CategoryPattern);
        let result = classify_static(&input("Tri", "MathsPlus", ""));
        assert_eq!(result.category, NodeCategory::MathBasic);
    }

    #[test]
    fn port_role_applies_only_when_declared() {
        let mut mystery = input("Mystery", "", "");
        assert_eq!(classify_static(&mystery).category, NodeCategory::Unknown);
        assert_eq!(classify_static(&mystery).rule, ClassifyRule::Fallback);
        mystery.has_inputs = Some(false);
        mystery.has_outputs = Some(true);
        assert_eq!(classify_static(&mystery).category, NodeCategory::InputParam);
        mystery.has_inputs = Some(true);
        mystery.has_outputs = Some(false);
        assert_eq!(classify_static(&mystery).category, NodeCategory::OutputParam);
    }

    #[test]
    fn dual_role_nodes_follow_wiring() {
        let snapshot = CanvasSnapshot::new(
            vec![
                CanvasNode::new("p1", "Panel", 0.0, 0.0),
                CanvasNode::new("add", "Addition", 150.0, 0.0),
                CanvasNode::new("p2", "Panel", 300.0, 0.0),
                CanvasNode::new("n", "Number", 300.0, 100.0),
                CanvasNode::new("out", "Sine", 450.0, 100.0),
                CanvasNode::new("lonely", "Panel", 0.0, 300.0),
            ],
            vec![
                CanvasWire::new("p1", "add"),
                CanvasWire::new("add", "p2"),
                CanvasWire::new("add", "n"),
                CanvasWire::new("n", "out"),
            ],
        );
        let graph = CanvasGraph::build(&snapshot, &EngineConfig::default());
        let categories = dynamic_categories(&graph);
        assert_eq!(categories["p1"], NodeCategory::InputParam);
        assert_eq!(categories["p2"], NodeCategory::OutputParam);
        assert_eq!(categories["n"], NodeCategory::DataParam);
        assert_eq!(categories["lonely"], NodeCategory::InputParam);
        assert_eq!(categories["add"], NodeCategory::MathBasic);
    }

    #[test]
    fn unknown_components_use_actual_wiring() {
        let snapshot = CanvasSnapshot::new(
            vec![CanvasNode::new("a", "Widget", 0.0, 0.0), CanvasNode::new("b", "Gizmo", 150.0, 0.0)],
            vec![CanvasWire::new("a", "b")],
        );
        let graph = CanvasGraph::build(&snapshot, &EngineConfig::default());
        let categories = dynamic_categories(&graph);
        assert_eq!(categories["a"], NodeCategory::InputParam);
        assert_eq!(categories["b"], NodeCategory::OutputParam);
    }
}
